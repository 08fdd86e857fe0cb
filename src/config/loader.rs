//! Configuration Loader
//!
//! Dead-simple loader:
//! 0. Loads a `.env` file if present (via dotenvy)
//! 1. Reads one TOML file (explicit path or `TASKER_CONFIG_PATH`)
//! 2. Substitutes `${VAR}` / `${VAR:-default}` references from the environment
//! 3. Deserializes to [`TaskerConfig`]
//! 4. Validates, reporting every violation at once

use std::path::Path;

use super::error::{ConfigResult, ConfigurationError};
use super::TaskerConfig;

/// Zero-state configuration loader; all functions are associated functions
#[derive(Debug)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from `TASKER_CONFIG_PATH`
    pub fn load_from_env() -> ConfigResult<TaskerConfig> {
        dotenvy::dotenv().ok();

        let config_path = std::env::var("TASKER_CONFIG_PATH").map_err(|_| {
            ConfigurationError::invalid_value(
                "TASKER_CONFIG_PATH",
                "",
                "environment variable not set; point it at a TOML configuration file",
            )
        })?;

        tracing::info!(config_path = %config_path, "Loading configuration from TASKER_CONFIG_PATH");

        Self::load_from_path(Path::new(&config_path))
    }

    /// Load configuration from a specific TOML file
    pub fn load_from_path(path: &Path) -> ConfigResult<TaskerConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

        let config = Self::load_from_str(&contents, &path.display().to_string())?;

        tracing::info!(
            path = %path.display(),
            profiles = config.profiles.len(),
            worker = config.worker.as_deref(),
            backend = %config.broker.backend,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Parse, substitute and validate TOML configuration text
    pub fn load_from_str(contents: &str, source_name: &str) -> ConfigResult<TaskerConfig> {
        let substituted = Self::substitute_env_vars(contents)?;

        let config: TaskerConfig = toml::from_str(&substituted)
            .map_err(|e| ConfigurationError::parse_error(source_name, e))?;

        config.validate_config()?;

        tracing::debug!(source = %source_name, "Configuration validated");
        Ok(config)
    }

    /// Replace `${VAR}` and `${VAR:-default}` with environment values
    ///
    /// Substituted values are escaped so they cannot break out of TOML strings.
    /// A reference to an unset variable without a default is an error.
    pub fn substitute_env_vars(content: &str) -> ConfigResult<String> {
        let mut result = String::with_capacity(content.len());
        let mut rest = content;

        while let Some(start) = rest.find("${") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];

            let Some(end) = after.find('}') else {
                return Err(ConfigurationError::parse_error(
                    "environment substitution",
                    "unterminated '${' expression",
                ));
            };

            let expression = &after[..end];
            let (name, default) = match expression.find(":-") {
                Some(pos) => (&expression[..pos], Some(&expression[pos + 2..])),
                None => (expression, None),
            };

            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
            {
                return Err(ConfigurationError::invalid_value(
                    "environment variable",
                    name,
                    "names must be upper-case letters, digits and underscores",
                ));
            }

            let value = match (std::env::var(name), default) {
                (Ok(value), _) => value,
                (Err(_), Some(default)) => default.to_string(),
                (Err(_), None) => {
                    return Err(ConfigurationError::invalid_value(
                        "environment variable",
                        name,
                        "referenced in configuration but not set and no default given",
                    ))
                }
            };

            result.push_str(&escape_toml_string(&value));
            rest = &after[end + 1..];
        }

        result.push_str(rest);
        Ok(result)
    }
}

fn escape_toml_string(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
}
