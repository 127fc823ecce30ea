//! Environment-variable helpers shared by every `*Config::from_env`.
//!
//! Missing variables fall back to the supplied default; present but
//! unparsable values are a [`CoreError::Validation`] so misconfiguration
//! fails fast at startup instead of silently using the default.

use std::str::FromStr;

use crate::error::CoreError;

/// Read `key` from the environment and parse it, or return `default`.
pub fn env_or<T>(key: &str, default: T) -> Result<T, CoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

/// Read a string variable, or return `default`.
pub fn env_string_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, CoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| CoreError::Validation(format!("{key} has invalid value '{raw}': {e}")))
}
