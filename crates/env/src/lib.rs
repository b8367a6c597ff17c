/// Parse a boolean-like env var.
///
/// Truthy values (case-insensitive): `1`, `true`, `yes`, `y`, `on`.
#[must_use]
pub fn flag(name: &str) -> bool {
    matches!(
        std::env::var(name)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// Parse a positive (`> 0`) u64 env var.
#[must_use]
pub fn positive_u64(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}

/// Expand `${VAR}` occurrences in a string using environment variables.
///
/// Returns an error if a referenced env var is missing.
///
/// # Errors
///
/// Returns `Err(...)` when a referenced environment variable is not set.
pub fn expand_env_string(s: &str) -> Result<String, String> {
    let mut result = s.to_string();
    let mut start = 0usize;

    while let Some(dollar_pos) = result[start..].find("${") {
        let abs_pos = start + dollar_pos;
        if let Some(end_pos) = result[abs_pos..].find('}') {
            let var_name = &result[abs_pos + 2..abs_pos + end_pos];
            let var_value = std::env::var(var_name).map_err(|_| {
                format!("Environment variable '{var_name}' not found (referenced in config)")
            })?;
            result = format!(
                "{}{}{}",
                &result[..abs_pos],
                var_value,
                &result[abs_pos + end_pos + 1..]
            );
            start = abs_pos + var_value.len();
        } else {
            start = abs_pos + 2;
        }
    }

    Ok(result)
}

pub mod serde_helpers {
    use super::expand_env_string;
    use serde::{Deserialize, Deserializer};

    /// Deserialize `Option<String>` expanding `${ENV}` references inside the value.
    ///
    /// Credentials in config files are the main consumer; a literal value without
    /// `${...}` passes through unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error when the value is not a string or when env expansion fails.
    pub fn deserialize_option_string_env<'de, D>(
        deserializer: D,
    ) -> std::result::Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error as DeError;

        let value = Option::<String>::deserialize(deserializer)?;
        match value {
            None => Ok(None),
            Some(s) => expand_env_string(&s).map(Some).map_err(D::Error::custom),
        }
    }
}
