//! Layered configuration loading.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use crate::{ArbiterConfig, ConfigError, LogFormat};

/// Loads configuration in layers; later layers override earlier ones.
///
/// 1. Built-in defaults
/// 2. A TOML or JSON file
/// 3. `PREFIX__SECTION__KEY` environment variables
///
/// # Example
///
/// ```no_run
/// use arbiter_config::ConfigLoader;
///
/// # fn main() -> Result<(), arbiter_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_file("/etc/arbiter/pdp.toml")?
///     .with_env_prefix("ARBITER")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: ArbiterConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a loader starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ArbiterConfig::default(),
            env_prefix: None,
        }
    }

    /// Reset to default values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = ArbiterConfig::default();
        self
    }

    /// Start from the development preset.
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = ArbiterConfig::development();
        self
    }

    /// Start from the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = ArbiterConfig::production();
        self
    }

    /// Load a `.toml` or `.json` file. Sections absent from the file take
    /// their defaults.
    ///
    /// # Errors
    ///
    /// Fails if the file is missing, unreadable, malformed, has an unknown
    /// extension or contains unknown fields.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        self.config = parse(&content, &format).map_err(|e| match e {
            ConfigError::ValidationError(_) => ConfigError::validation_error(format!(
                "unsupported configuration file format: {}",
                path.display()
            )),
            other => other,
        })?;
        Ok(self)
    }

    /// Load a file if it exists.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration text in the given format (`toml` or `json`).
    ///
    /// # Errors
    ///
    /// Fails on malformed content, unknown fields or an unknown format.
    ///
    /// # Example
    ///
    /// ```
    /// use arbiter_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [policy]
    ///     policy_set_id = "grid-policy"
    ///     paps = ["https://pap.example.org/query"]
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.policy.paps.len(), 1);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = parse(content, &format.to_lowercase())?;
        Ok(self)
    }

    /// Enable environment overrides of the form `PREFIX__SECTION__KEY`,
    /// e.g. `ARBITER__POLICY__RETENTION_INTERVAL_MINS=10`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load variables from a `.env` file in the working directory, if any.
    #[must_use]
    pub fn with_dotenv(self) -> Self {
        let _ = dotenvy::dotenv();
        self
    }

    /// Apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Fails on an unparsable override or an invalid final configuration.
    pub fn load(mut self) -> Result<ArbiterConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let vars: HashMap<String, String> = env::vars()
                .filter(|(k, _)| k.starts_with(&prefix))
                .collect();
            self.apply_env_vars(&vars, &prefix)?;
        }

        self.config.validate()?;
        Ok(self.config)
    }

    /// Return the configuration without overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> ArbiterConfig {
        self.config
    }

    fn apply_env_vars(&mut self, vars: &HashMap<String, String>, prefix: &str) -> Result<(), ConfigError> {
        for (key, value) in vars {
            self.apply_env_var(key, value, prefix)?;
        }
        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let Some(rest) = key.strip_prefix(prefix).and_then(|k| k.strip_prefix("__")) else {
            return Ok(());
        };
        let parts: Vec<&str> = rest.split("__").collect();
        let config = &mut self.config;

        match parts.as_slice() {
            ["SERVICE", "SERVICE_NAME"] => config.service.service_name = value.to_string(),
            ["SERVICE", "ENTITY_ID"] => config.service.entity_id = value.to_string(),
            ["SERVICE", "HTTP_ADDR"] => config.service.http_addr = value.to_string(),
            ["SERVICE", "ADMIN_ADDR"] => config.service.admin_addr = value.to_string(),
            ["SERVICE", "SHUTDOWN_TIMEOUT_SECS"] => {
                config.service.shutdown_timeout_secs = parse_int(key, value)?;
            }
            ["SERVICE", "REQUEST_TIMEOUT_MS"] => {
                config.service.request_timeout_ms = parse_int(key, value)?;
            }
            ["SERVICE", "PIP_TIMEOUT_MS"] => config.service.pip_timeout_ms = parse_int(key, value)?,

            ["POLICY", "POLICY_SET_ID"] => config.policy.policy_set_id = value.to_string(),
            ["POLICY", "PAPS"] => {
                config.policy.paps = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
            }
            ["POLICY", "RETENTION_INTERVAL_MINS"] => {
                config.policy.retention_interval_mins = parse_int(key, value)?;
            }
            ["POLICY", "FETCH_TIMEOUT_MS"] => config.policy.fetch_timeout_ms = parse_int(key, value)?,
            ["POLICY", "STARTUP_RETRIES"] => config.policy.startup_retries = parse_int(key, value)?,
            ["POLICY", "STARTUP_BACKOFF_MS"] => {
                config.policy.startup_backoff_ms = parse_int(key, value)?;
            }

            ["ADMISSION", "MAX_REQUESTS"] => config.admission.max_requests = parse_int(key, value)?,
            ["ADMISSION", "MAX_REQUEST_QUEUE_SIZE"] => {
                config.admission.max_request_queue_size = parse_int(key, value)?;
            }
            ["ADMISSION", "UNBOUNDED_QUEUE"] => {
                config.admission.unbounded_queue = parse_flag(key, value)?;
            }

            ["TELEMETRY", "LOGGING", "ENABLED"] => {
                config.telemetry.logging.enabled = parse_flag(key, value)?;
            }
            ["TELEMETRY", "LOGGING", "LEVEL"] => config.telemetry.logging.level = value.to_string(),
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                config.telemetry.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => return Err(ConfigError::env_parse_error(key, "expected 'json' or 'pretty'")),
                };
            }
            ["TELEMETRY", "LOGGING", "INCLUDE_LOCATION"] => {
                config.telemetry.logging.include_location = parse_flag(key, value)?;
            }
            ["TELEMETRY", "METRICS", "ENABLED"] => {
                config.telemetry.metrics.enabled = parse_flag(key, value)?;
            }
            ["TELEMETRY", "METRICS", "ADDR"] => {
                config.telemetry.metrics.addr = (!value.is_empty()).then(|| value.to_string());
            }

            _ => {}
        }

        Ok(())
    }
}

fn parse(content: &str, format: &str) -> Result<ArbiterConfig, ConfigError> {
    match format {
        "toml" => Ok(toml::from_str(content)?),
        "json" => Ok(serde_json::from_str(content)?),
        other => Err(ConfigError::validation_error(format!(
            "unsupported configuration format: {other}"
        ))),
    }
}

fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
