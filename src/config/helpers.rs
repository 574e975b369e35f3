use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::str::FromStr;

use crate::error::ConfigError;

/// A snapshot of environment variables.
///
/// Resolution reads from a snapshot instead of the live process
/// environment so it can be tested without mutating global state.
#[derive(Debug, Clone, Default)]
pub struct EnvVars {
    vars: BTreeMap<String, String>,
    not_unicode: BTreeSet<String>,
}

impl EnvVars {
    /// Capture the current process environment.
    pub fn from_process() -> Self {
        let mut env = Self::default();
        for (key, value) in std::env::vars_os() {
            let Some(key) = key.to_str().map(str::to_string) else {
                continue;
            };
            match value.into_string() {
                Ok(value) => {
                    env.vars.insert(key, value);
                }
                Err(_) => {
                    env.not_unicode.insert(key);
                }
            }
        }
        env
    }

    /// Build a snapshot from explicit pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            not_unicode: BTreeSet::new(),
        }
    }

    /// All variables starting with `prefix`, with the prefix stripped.
    ///
    /// Entries whose stripped name is empty are skipped.
    pub fn with_prefix(&self, prefix: &str) -> Vec<(String, String)> {
        self.vars
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(prefix)
                    .filter(|name| !name.is_empty())
                    .map(|name| (name.to_string(), v.clone()))
            })
            .collect()
    }
}

/// Read an optional variable. Empty values count as unset.
pub(crate) fn optional_env(env: &EnvVars, key: &str) -> Result<Option<String>, ConfigError> {
    if env.not_unicode.contains(key) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "not valid unicode".to_string(),
        });
    }
    Ok(env
        .vars
        .get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty()))
}

/// Parse an optional variable, falling back to `default` when unset.
pub(crate) fn parse_optional_env<T>(env: &EnvVars, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    optional_env(env, key)?
        .map(|s| {
            s.parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            })
        })
        .transpose()
        .map(|v| v.unwrap_or(default))
}

/// Parse an optional boolean variable.
pub(crate) fn parse_bool_env(env: &EnvVars, key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_env(env, key)? {
        None => Ok(default),
        Some(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("must be 'true' or 'false', got '{s}'"),
            }),
        },
    }
}
