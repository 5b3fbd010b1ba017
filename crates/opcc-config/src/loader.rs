// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading.
//!
//! # Loading Pipeline
//!
//! 1. Read the file and pick the format from its extension
//! 2. Resolve `${VAR}` / `${VAR:default}` placeholders
//! 3. Parse YAML, TOML or JSON into [`ClientConfig`]
//! 4. Apply environment variable overrides
//! 5. Validate
//!
//! # Environment Variable Override
//!
//! ```text
//! OPCC_CLIENT_ID=line-3-client
//! OPCC_LOG_LEVEL=debug
//! OPCC_LOG_FORMAT=json
//! OPCC_SERVERS_0_ENABLED=false
//! OPCC_SERVERS_0_ENDPOINT=opc.tcp://10.0.0.12:4840
//! ```

use std::env;
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::{ClientConfig, LogFormat, LogLevel};

/// Default environment variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "OPCC";

// =============================================================================
// ConfigLoader
// =============================================================================

/// Loads [`ClientConfig`] from files or strings.
///
/// # Examples
///
/// ```no_run
/// use opcc_config::loader::ConfigLoader;
///
/// let config = ConfigLoader::new().load("opcc.yaml").unwrap();
/// println!("{} servers", config.servers.len());
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Environment variable prefix.
    env_prefix: String,

    /// Whether placeholders and overrides are resolved.
    resolve_env_vars: bool,
}

impl ConfigLoader {
    /// Creates a loader with the `OPCC` prefix.
    pub fn new() -> Self {
        Self {
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            resolve_env_vars: true,
        }
    }

    /// Creates a builder.
    pub fn builder() -> ConfigLoaderBuilder {
        ConfigLoaderBuilder::new()
    }

    /// Sets the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables environment variable resolution.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Loads and validates a configuration file.
    ///
    /// The format follows the extension: `.yaml`/`.yml`, `.toml` or `.json`.
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<ClientConfig> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let content = self.read_file(path)?;
        let format = ConfigFormat::from_path(path)?;
        let mut config = self.parse_content(&content, format, path)?;

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }

        config.validate()?;
        self.warn_server_issues(&config);

        debug!(
            servers = config.servers.len(),
            tags = config.tags.len(),
            subscriptions = config.subscriptions.len(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Parses and validates configuration content.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<ClientConfig> {
        let content = if self.resolve_env_vars {
            self.resolve_env_placeholders(content)
        } else {
            content.to_string()
        };
        let mut config: ClientConfig = parse_str(&content, format)?;

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }

        config.validate()?;
        self.warn_server_issues(&config);
        Ok(config)
    }

    fn read_file(&self, path: &Path) -> ConfigResult<String> {
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))
    }

    fn parse_content(&self, content: &str, format: ConfigFormat, path: &Path) -> ConfigResult<ClientConfig> {
        let content = if self.resolve_env_vars {
            self.resolve_env_placeholders(content)
        } else {
            content.to_string()
        };

        parse_str(&content, format).map_err(|e| match e {
            ConfigError::Serialization { message } => ConfigError::parse(path, message),
            other => other,
        })
    }

    /// Resolves `${VAR_NAME}` and `${VAR_NAME:default}` placeholders.
    ///
    /// Unset variables without a default keep their placeholder.
    fn resolve_env_placeholders(&self, content: &str) -> String {
        let mut result = String::with_capacity(content.len());
        let mut chars = content.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' || chars.peek() != Some(&'{') {
                result.push(c);
                continue;
            }
            chars.next();

            let mut var_content = String::new();
            let mut found_close = false;
            for c in chars.by_ref() {
                if c == '}' {
                    found_close = true;
                    break;
                }
                var_content.push(c);
            }

            if !found_close {
                result.push_str("${");
                result.push_str(&var_content);
                continue;
            }

            let (var_name, default_value) = match var_content.split_once(':') {
                Some((name, default)) => (name, Some(default)),
                None => (var_content.as_str(), None),
            };

            match (env::var(var_name), default_value) {
                (Ok(value), _) => result.push_str(&value),
                (Err(_), Some(default)) => result.push_str(default),
                (Err(_), None) => {
                    warn!(variable = var_name, "Environment variable not found");
                    result.push_str("${");
                    result.push_str(var_name);
                    result.push('}');
                }
            }
        }

        result
    }

    fn var(&self, suffix: &str) -> (String, Option<String>) {
        let name = format!("{}_{}", self.env_prefix, suffix);
        let value = env::var(&name).ok();
        (name, value)
    }

    fn apply_env_overrides(&self, config: &mut ClientConfig) -> ConfigResult<()> {
        if let (_, Some(value)) = self.var("CLIENT_ID") {
            config.client.id = value;
        }

        if let (name, Some(value)) = self.var("LOG_LEVEL") {
            config.logging.level = parse_log_level(&value)
                .ok_or_else(|| ConfigError::invalid_env_var(name, "expected trace, debug, info, warn or error"))?;
        }
        if let (name, Some(value)) = self.var("LOG_FORMAT") {
            config.logging.format = parse_log_format(&value)
                .ok_or_else(|| ConfigError::invalid_env_var(name, "expected text, json or compact"))?;
        }

        for (i, server) in config.servers.iter_mut().enumerate() {
            if let (_, Some(value)) = self.var(&format!("SERVERS_{}_ENABLED", i)) {
                server.enabled = parse_bool(&value);
            }
            if let (_, Some(value)) = self.var(&format!("SERVERS_{}_ENDPOINT", i)) {
                server.endpoint = value;
            }
        }

        Ok(())
    }

    fn warn_server_issues(&self, config: &ClientConfig) {
        for (server_id, issue) in config.server_issues() {
            warn!(server_id = %server_id, error = %issue, "Server will be marked failed at startup");
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ConfigLoaderBuilder
// =============================================================================

/// Builder for [`ConfigLoader`].
#[derive(Debug, Default)]
pub struct ConfigLoaderBuilder {
    env_prefix: Option<String>,
    resolve_env_vars: Option<bool>,
}

impl ConfigLoaderBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the environment prefix.
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Enables or disables environment variable resolution.
    pub fn resolve_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = Some(enabled);
        self
    }

    /// Builds the loader.
    pub fn build(self) -> ConfigLoader {
        let mut loader = ConfigLoader::new();
        if let Some(prefix) = self.env_prefix {
            loader.env_prefix = prefix;
        }
        if let Some(enabled) = self.resolve_env_vars {
            loader.resolve_env_vars = enabled;
        }
        loader
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            Some(other) => Err(ConfigError::unsupported_format(other)),
            None => Err(ConfigError::unsupported_format("(no extension)")),
        }
    }

    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yaml",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_str<T: DeserializeOwned>(content: &str, format: ConfigFormat) -> ConfigResult<T> {
    match format {
        ConfigFormat::Yaml => yaml_parse(content),
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| ConfigError::serialization(e.to_string())),
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| ConfigError::serialization(e.to_string())),
    }
}

/// YAML goes through the `config` crate.
fn yaml_parse<T: DeserializeOwned>(content: &str) -> ConfigResult<T> {
    let config = config::Config::builder()
        .add_source(config::File::from_str(content, config::FileFormat::Yaml))
        .build()
        .map_err(|e| ConfigError::serialization(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::serialization(e.to_string()))
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "true" | "1" | "yes" | "on" | "enabled"
    )
}

/// Parses a log level name.
pub fn parse_log_level(value: &str) -> Option<LogLevel> {
    match value.to_lowercase().as_str() {
        "trace" => Some(LogLevel::Trace),
        "debug" => Some(LogLevel::Debug),
        "info" => Some(LogLevel::Info),
        "warn" | "warning" => Some(LogLevel::Warn),
        "error" => Some(LogLevel::Error),
        _ => None,
    }
}

/// Parses a log format name.
pub fn parse_log_format(value: &str) -> Option<LogFormat> {
    match value.to_lowercase().as_str() {
        "text" | "pretty" => Some(LogFormat::Text),
        "json" => Some(LogFormat::Json),
        "compact" => Some(LogFormat::Compact),
        _ => None,
    }
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Loads configuration from a file with default settings.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<ClientConfig> {
    ConfigLoader::new().load(path)
}

/// Loads configuration from a string with default settings.
pub fn load_config_str(content: &str, format: ConfigFormat) -> ConfigResult<ClientConfig> {
    ConfigLoader::new().load_from_str(content, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcc_core::types::{DeadbandType, ServerId};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn create_test_yaml() -> String {
        r#"
client:
  id: line-3

servers:
  - id: plant-ua
    protocol: opc-ua
    endpoint: opc.tcp://plc-01:4840
    operation_timeout: 3s
  - id: historian
    protocol: hda
    endpoint: opc.hda://historian/Vendor.HDA.1
    enabled: false

tags:
  - id: boiler_temp
    server_id: plant-ua
    address: "ns=2;s=Boiler.Temperature"
    data_type: float64
    scale: 0.1
    eu_range:
      low: 0.0
      high: 200.0
  - id: valve_setpoint
    server_id: plant-ua
    address: "ns=2;s=Valve.Setpoint"
    data_type: int32
    writable: true
    critical: true

subscriptions:
  - server_id: plant-ua
    publishing_interval: 500ms
    items:
      - tag_id: boiler_temp
        deadband_type: percent
        deadband_value: 2.5
        queue_size: 5
        discard_oldest: false

write:
  rate_limit:
    requests_per_second: 5
    burst_size: 2
    key: user_server
  validation_rules:
    - tag_id: valve_setpoint
      min: 0
      max: 100

buffer:
  capacity: 2048
  drain_interval: 250ms

logging:
  level: debug
  format: json
"#
        .to_string()
    }

    #[test]
    fn test_load_yaml() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        file.write_all(create_test_yaml().as_bytes()).unwrap();

        let loader = ConfigLoader::new().with_env_prefix("OPCC_TEST_LOAD_YAML");
        let config = loader.load(file.path()).unwrap();

        assert_eq!(config.client.id, "line-3");
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].operation_timeout, Duration::from_secs(3));
        assert!(!config.servers[1].enabled);
        assert_eq!(config.tags[0].scale, 0.1);
        assert_eq!(config.subscriptions[0].publishing_interval, Duration::from_millis(500));
        let item = &config.subscriptions[0].items[0];
        assert_eq!(item.deadband_type, DeadbandType::Percent);
        assert_eq!(item.queue_size, 5);
        assert!(!item.discard_oldest);
        assert_eq!(config.write.rate_limit.burst_size, 2);
        assert_eq!(config.buffer.capacity, 2048);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.server_issues().is_empty());
    }

    #[test]
    fn test_load_toml_and_json() {
        let toml = r#"
[client]
id = "toml-client"

[[servers]]
id = "ac"
protocol = "ae"
endpoint = "opc.ae://alarms/Vendor.AE.1"
"#;
        let loader = ConfigLoader::new().with_env_vars(false);
        let config = loader.load_from_str(toml, ConfigFormat::Toml).unwrap();
        assert_eq!(config.client.id, "toml-client");
        assert_eq!(config.servers[0].id, ServerId::new("ac"));

        let json = r#"{"servers":[{"id":"ua","protocol":"ua","endpoint":"opc.tcp://h:4840"}]}"#;
        let config = loader.load_from_str(json, ConfigFormat::Json).unwrap();
        assert_eq!(config.servers[0].operation_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_config_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("opcc.yaml")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("opcc.yml")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("opcc.toml")).unwrap(), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("opcc.json")).unwrap(), ConfigFormat::Json);
        assert!(ConfigFormat::from_path(Path::new("opcc.ini")).is_err());
    }

    #[test]
    fn test_env_placeholder_with_default() {
        let loader = ConfigLoader::new();
        let result = loader.resolve_env_placeholders("endpoint: ${OPCC_TEST_NONEXISTENT_VAR:opc.tcp://localhost:4840}");
        assert_eq!(result, "endpoint: opc.tcp://localhost:4840");
    }

    #[test]
    fn test_env_placeholder_resolution() {
        env::set_var("OPCC_TEST_PLACEHOLDER_HOST", "plc-07");
        let loader = ConfigLoader::new();
        let result = loader.resolve_env_placeholders("opc.tcp://${OPCC_TEST_PLACEHOLDER_HOST}:4840");
        assert_eq!(result, "opc.tcp://plc-07:4840");

        let result = loader.resolve_env_placeholders("x: ${OPCC_TEST_UNSET_NO_DEFAULT}");
        assert_eq!(result, "x: ${OPCC_TEST_UNSET_NO_DEFAULT}");
    }

    #[test]
    fn test_env_overrides() {
        env::set_var("OPCC_TEST_OVR_CLIENT_ID", "override-client");
        env::set_var("OPCC_TEST_OVR_LOG_LEVEL", "warn");
        env::set_var("OPCC_TEST_OVR_SERVERS_1_ENABLED", "true");

        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        file.write_all(create_test_yaml().as_bytes()).unwrap();

        let config = ConfigLoader::builder()
            .env_prefix("OPCC_TEST_OVR")
            .build()
            .load(file.path())
            .unwrap();
        assert_eq!(config.client.id, "override-client");
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert!(config.servers[1].enabled);
    }

    #[test]
    fn test_invalid_log_level_override() {
        env::set_var("OPCC_TEST_BADLVL_LOG_LEVEL", "loud");
        let loader = ConfigLoader::new().with_env_prefix("OPCC_TEST_BADLVL");
        let err = loader.load_from_str("{}", ConfigFormat::Json).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { .. }));
    }

    #[test]
    fn test_parse_error_carries_path() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        file.write_all(b"{ not json").unwrap();
        let err = ConfigLoader::new().load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_file_not_found() {
        let result = ConfigLoader::new().load("/nonexistent/path/opcc.yaml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_parse_helpers() {
        assert!(parse_bool("yes"));
        assert!(!parse_bool("off"));
        assert_eq!(parse_log_level("WARNING"), Some(LogLevel::Warn));
        assert_eq!(parse_log_level("loud"), None);
        assert_eq!(parse_log_format("compact"), Some(LogFormat::Compact));
    }
}
