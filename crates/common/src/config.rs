//! Configuration helpers following 12-factor app principles
//!
//! All configuration is loaded from environment variables to ensure
//! clean separation between code and config. A `.env` file, when present,
//! is loaded first and never overrides variables already set.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::fmt::Display;
use std::str::FromStr;

/// Load a `.env` file from the current directory or its parents, if any
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "Failed to load environment file"),
    }
}

/// Read a variable, treating an empty value the same as an unset one
pub fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Read a variable or fall back to `default`
pub fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

/// Read and parse a variable; `Ok(None)` when unset
pub fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    env_opt(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| anyhow!("{e}"))
                .with_context(|| format!("{key} has an invalid value: {raw:?}"))
        })
        .transpose()
}

/// Read a strictly positive integer; zero is rejected
pub fn env_positive(key: &str) -> Result<Option<u64>> {
    match env_parse::<u64>(key)? {
        Some(0) => Err(anyhow!("{key} must be greater than zero")),
        other => Ok(other),
    }
}
