use crate::serde_helpers::default_true;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use url::Url;

pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

const fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Per server instance configuration, immutable after load.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    pub server: ServerConfig,
    /// Tool names permitted to surface to clients; empty means "no static
    /// restriction".
    #[serde(default)]
    pub allow_tools: HashSet<String>,
    /// Statically declared proxy tools. When non-empty, `tools/call` is
    /// restricted to these names and per-tool security overrides apply.
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub server_type: String,
    pub transport: Transport,
    #[serde(rename = "mcpServerURL")]
    pub mcp_server_url: String,
    /// Outbound call timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,
    #[serde(default)]
    pub security_schemes: Vec<SecurityScheme>,
    #[serde(default)]
    pub default_downstream_security: Option<SecurityRef>,
    #[serde(default)]
    pub default_upstream_security: Option<SecurityRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// StreamableHTTP: one POST per JSON-RPC call.
    Http,
    /// SSE: long-lived GET stream plus POSTs to an announced endpoint.
    Sse,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityScheme {
    pub id: String,
    #[serde(rename = "type")]
    pub scheme_type: SchemeType,
    /// apiKey only: where the key goes.
    #[serde(rename = "in", default)]
    pub location: Option<ApiKeyLocation>,
    /// apiKey only: header or query parameter name.
    #[serde(default)]
    pub name: Option<String>,
    /// http only: bearer or basic.
    #[serde(default)]
    pub scheme: Option<HttpAuthScheme>,
    #[serde(
        default,
        deserialize_with = "edgeline_env::serde_helpers::deserialize_option_string_env"
    )]
    pub default_credential: Option<String>,
    /// Whether a credential found on the client request may be forwarded.
    #[serde(default = "default_true")]
    pub passthrough: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SchemeType {
    ApiKey,
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyLocation {
    Header,
    Query,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpAuthScheme {
    Bearer,
    Basic,
}

/// Reference to a security scheme, optionally with an explicit credential
/// that wins over passthrough and scheme defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRef {
    pub id: String,
    #[serde(
        default,
        deserialize_with = "edgeline_env::serde_helpers::deserialize_option_string_env"
    )]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub args: Vec<ToolArg>,
    #[serde(default)]
    pub request_template: RequestTemplate,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestTemplate {
    #[serde(default)]
    pub security: Option<SecurityRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolArg {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub arg_type: ArgType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(rename = "enum", default)]
    pub r#enum: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ArgType {
    #[must_use]
    pub const fn json_schema_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl ProxyConfig {
    /// Parse and validate a YAML config document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` on malformed YAML or on semantic violations
    /// (unknown scheme references, incomplete schemes, duplicate args, ...).
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-references and per-item completeness.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.server.server_type != "mcp-proxy" {
            return invalid(format!(
                "unsupported server type '{}', expected 'mcp-proxy'",
                self.server.server_type
            ));
        }
        if self.server.timeout == 0 {
            return invalid("timeout must be greater than zero".to_string());
        }
        self.backend_url()?;

        let mut ids = HashSet::new();
        for scheme in &self.server.security_schemes {
            validate_security_scheme(scheme)?;
            if !ids.insert(scheme.id.as_str()) {
                return invalid(format!("duplicate security scheme id '{}'", scheme.id));
            }
        }

        for r in [
            self.server.default_downstream_security.as_ref(),
            self.server.default_upstream_security.as_ref(),
        ]
        .into_iter()
        .flatten()
        {
            if !ids.contains(r.id.as_str()) {
                return invalid(format!("security scheme not found: {}", r.id));
            }
        }

        let mut tool_names = HashSet::new();
        for tool in &self.tools {
            validate_tool_config(tool)?;
            if !tool_names.insert(tool.name.as_str()) {
                return invalid(format!("duplicate tool name '{}'", tool.name));
            }
            if let Some(sec) = &tool.request_template.security
                && !ids.contains(sec.id.as_str())
            {
                return invalid(format!("security scheme not found: {}", sec.id));
            }
        }

        Ok(())
    }

    /// The backend MCP endpoint as a parsed absolute URL.
    pub fn backend_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.server.mcp_server_url).map_err(|e| {
            ConfigError::Invalid(format!(
                "mcpServerURL '{}' is not an absolute URL: {e}",
                self.server.mcp_server_url
            ))
        })
    }

    #[must_use]
    pub fn scheme(&self, id: &str) -> Option<&SecurityScheme> {
        self.server.security_schemes.iter().find(|s| s.id == id)
    }

    #[must_use]
    pub fn tool(&self, name: &str) -> Option<&ToolConfig> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// The security reference applied to backend calls for this tool:
    /// per-tool override first, then the server-wide upstream default.
    #[must_use]
    pub fn upstream_security_for(&self, tool_name: Option<&str>) -> Option<&SecurityRef> {
        tool_name
            .and_then(|name| self.tool(name))
            .and_then(|t| t.request_template.security.as_ref())
            .or(self.server.default_upstream_security.as_ref())
    }

    /// The scheme used to extract a passthrough credential from the client
    /// request. Falls back to the upstream scheme when no downstream default
    /// is configured.
    #[must_use]
    pub fn downstream_scheme_for(&self, upstream: &SecurityRef) -> Option<&SecurityScheme> {
        self.server
            .default_downstream_security
            .as_ref()
            .map_or_else(
                || self.scheme(&upstream.id),
                |downstream| self.scheme(&downstream.id),
            )
    }
}

fn validate_security_scheme(scheme: &SecurityScheme) -> Result<(), ConfigError> {
    let invalid = |msg: String| Err(ConfigError::Invalid(msg));

    if scheme.id.is_empty() {
        return invalid("security scheme id is required".to_string());
    }
    match scheme.scheme_type {
        SchemeType::ApiKey => {
            if scheme.name.as_deref().unwrap_or_default().is_empty() {
                return invalid(format!(
                    "security scheme '{}': name is required for apiKey type",
                    scheme.id
                ));
            }
            if scheme.location.is_none() {
                return invalid(format!(
                    "security scheme '{}': 'in' is required for apiKey type",
                    scheme.id
                ));
            }
        }
        SchemeType::Http => {
            if scheme.scheme.is_none() {
                return invalid(format!(
                    "security scheme '{}': scheme is required for http type",
                    scheme.id
                ));
            }
        }
    }
    Ok(())
}

fn validate_tool_config(tool: &ToolConfig) -> Result<(), ConfigError> {
    let invalid = |msg: String| Err(ConfigError::Invalid(msg));

    if tool.name.is_empty() {
        return invalid("tool name is required".to_string());
    }
    if tool.description.is_empty() {
        return invalid(format!("tool '{}': description is required", tool.name));
    }

    let mut arg_names: HashMap<&str, ()> = HashMap::new();
    for arg in &tool.args {
        if arg.name.is_empty() {
            return invalid(format!("tool '{}': argument name is required", tool.name));
        }
        if arg_names.insert(arg.name.as_str(), ()).is_some() {
            return invalid(format!(
                "tool '{}': duplicate argument name '{}'",
                tool.name, arg.name
            ));
        }
        if arg.description.is_empty() {
            return invalid(format!(
                "tool '{}': argument description is required for '{}'",
                tool.name, arg.name
            ));
        }
    }
    Ok(())
}
