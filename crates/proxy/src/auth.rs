//! Security scheme application for backend calls.
//!
//! Pure with respect to side effects: the functions here rewrite a header
//! list and a URL and never touch the network. Credential precedence is
//! explicit override, then passthrough (when the scheme allows it), then the
//! scheme's default.

use crate::config::{ApiKeyLocation, HttpAuthScheme, SchemeType, SecurityScheme};
use crate::context::ResolvedAuth;
use crate::error::{ErrorKind, ProxyError};
use base64::Engine as _;
use url::Url;

pub const AUTHORIZATION: &str = "Authorization";

/// Lift a passthrough credential from the client's request headers.
///
/// apiKey schemes read the header the scheme names; http schemes read
/// `Authorization`. Query-located api keys have no client-side counterpart.
#[must_use]
pub fn extract_passthrough(
    headers: &[(String, String)],
    scheme: &SecurityScheme,
) -> Option<String> {
    if !scheme.passthrough {
        return None;
    }
    let wanted = match scheme.scheme_type {
        SchemeType::ApiKey => match scheme.location {
            Some(ApiKeyLocation::Header) => scheme.name.as_deref()?,
            _ => return None,
        },
        SchemeType::Http => AUTHORIZATION,
    };
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
        .map(|(_, value)| value.clone())
}

/// Apply the scheme to an outbound header list and URL.
///
/// # Errors
///
/// `AuthMissing` when no credential is available from any source.
pub fn apply_security(
    scheme: &SecurityScheme,
    auth: &ResolvedAuth,
    headers: &mut Vec<(String, String)>,
    url: &mut Url,
) -> Result<(), ProxyError> {
    let credential = auth
        .explicit_credential
        .clone()
        .or_else(|| {
            auth.passthrough_credential
                .clone()
                .filter(|_| scheme.passthrough)
        })
        .or_else(|| scheme.default_credential.clone())
        .ok_or_else(|| {
            ProxyError::new(
                ErrorKind::AuthMissing,
                "mcp-proxy:auth:credential_missing",
                format!("no credential available for scheme {}", scheme.id),
            )
        })?;

    match scheme.scheme_type {
        SchemeType::ApiKey => {
            let name = scheme.name.as_deref().unwrap_or_default();
            match scheme.location {
                Some(ApiKeyLocation::Header) | None => set_header(headers, name, &credential),
                Some(ApiKeyLocation::Query) => set_query_param(url, name, &credential),
            }
        }
        SchemeType::Http => {
            let value = match scheme.scheme {
                Some(HttpAuthScheme::Bearer) | None => prefixed(&credential, "Bearer "),
                Some(HttpAuthScheme::Basic) => basic_value(&credential),
            };
            set_header(headers, AUTHORIZATION, &value);
        }
    }
    Ok(())
}

/// Apply the request's resolved security scheme, if any, looking the scheme
/// up in config. An unknown id here means validation was bypassed.
pub(crate) fn apply_resolved(
    config: &crate::config::ProxyConfig,
    auth: &ResolvedAuth,
    headers: &mut Vec<(String, String)>,
    url: &mut Url,
) -> Result<(), ProxyError> {
    let Some(id) = auth.scheme_id.as_deref() else {
        return Ok(());
    };
    let Some(scheme) = config.scheme(id) else {
        return Err(ProxyError::new(
            ErrorKind::Internal,
            "mcp-proxy:auth:scheme_not_found",
            format!("security scheme not found: {id}"),
        ));
    };
    apply_security(scheme, auth, headers, url)
}

/// Replace-if-present (case-insensitive) or append-if-absent.
fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    for (existing, existing_value) in headers.iter_mut() {
        if existing.eq_ignore_ascii_case(name) {
            *existing_value = value.to_string();
            return;
        }
    }
    headers.push((name.to_string(), value.to_string()));
}

/// Set/override one query parameter, preserving the others.
fn set_query_param(url: &mut Url, name: &str, value: &str) {
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != name)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(retained.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .append_pair(name, value);
}

fn prefixed(credential: &str, prefix: &str) -> String {
    if credential.starts_with(prefix) {
        credential.to_string()
    } else {
        format!("{prefix}{credential}")
    }
}

/// `Basic` credentials may arrive as a raw `user:pass` pair, a pre-encoded
/// token, or a full header value.
fn basic_value(credential: &str) -> String {
    if credential.starts_with("Basic ") {
        return credential.to_string();
    }
    if credential.contains(':') {
        let b64 = base64::engine::general_purpose::STANDARD.encode(credential);
        return format!("Basic {b64}");
    }
    format!("Basic {credential}")
}
