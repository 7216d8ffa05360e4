//! Environment variable helpers
//!
//! Every helper distinguishes "unset" (`Ok(None)`) from "set but unusable"
//! (`Err(RecoveryError::Config)`), so a typo in a deployment surfaces as an
//! error instead of silently falling back to a default.

use crate::{RecoveryError, Result};
use std::env;
use std::str::FromStr;

/// Read a variable; empty values count as unset.
pub fn get_env(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(val) if val.trim().is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(RecoveryError::Config(format!(
            "environment variable {} contains invalid UTF-8",
            key
        ))),
    }
}

/// Read and parse a variable
pub fn get_env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key)?
        .map(|val| {
            val.trim().parse::<T>().map_err(|e| {
                RecoveryError::Config(format!("invalid value for {}: {} ({})", key, val, e))
            })
        })
        .transpose()
}

/// Read a boolean flag (`true/1/yes/on`, `false/0/no/off`)
pub fn get_env_bool(key: &str) -> Result<Option<bool>> {
    let Some(val) = get_env(key)? else {
        return Ok(None);
    };
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(Some(true)),
        "false" | "0" | "no" | "off" => Ok(Some(false)),
        _ => Err(RecoveryError::Config(format!(
            "invalid boolean for {}: {}",
            key, val
        ))),
    }
}

/// Read a comma separated list, dropping blank items
pub fn get_env_list(key: &str) -> Result<Option<Vec<String>>> {
    Ok(get_env(key)?.map(|val| {
        val.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }))
}

/// `build_env_key("RECOVERY_", "retry_attempts")` is `RECOVERY_RETRY_ATTEMPTS`
pub fn build_env_key(prefix: &str, name: &str) -> String {
    format!("{}{}", prefix, name.to_uppercase())
}
