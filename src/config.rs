use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

use crate::relay::link::DEFAULT_HOSTS;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

/// Where relayed bytes are staged between download and upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Disk,
    Memory,
    Sqlite,
}

#[derive(Deserialize)]
struct ConfigFile {
    /// Bot token. May be omitted in the file and supplied via BOT_TOKEN.
    #[serde(default)]
    telegram_bot_token: String,
    /// Base URL of the link-unlocking API.
    #[serde(default = "default_unlock_api_base")]
    unlock_api_base: String,
    #[serde(default)]
    storage: StorageBackend,
    #[serde(default = "default_extract_timeout_secs")]
    extract_timeout_secs: u64,
    #[serde(default = "default_max_transfer_bytes")]
    max_transfer_bytes: u64,
    /// Accepted link hosts. Empty means the built-in TeraBox list.
    #[serde(default)]
    allowed_hosts: Vec<String>,
    /// Directory for state files (database, staging, logs). Defaults to
    /// the current directory.
    data_dir: Option<String>,
    /// Port for the liveness endpoint (disabled when unset).
    health_port: Option<u16>,
}

fn default_unlock_api_base() -> String {
    "https://wdzone-terabox-api.vercel.app/api".to_string()
}

fn default_extract_timeout_secs() -> u64 {
    60
}

fn default_max_transfer_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}

pub struct Config {
    pub telegram_bot_token: String,
    pub unlock_api_base: String,
    pub storage: StorageBackend,
    pub extract_timeout_secs: u64,
    pub max_transfer_bytes: u64,
    pub allowed_hosts: Vec<String>,
    /// Directory for state files (database, staging, logs).
    pub data_dir: PathBuf,
    pub health_port: Option<u16>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        let env_token = std::env::var("BOT_TOKEN").ok().filter(|t| !t.is_empty());
        Self::build(file, env_token)
    }

    fn build(file: ConfigFile, env_token: Option<String>) -> Result<Self, ConfigError> {
        // Environment wins over the file so deployments can keep the token
        // out of the config.
        let token = env_token.unwrap_or(file.telegram_bot_token);

        if token.is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token is required (config file or BOT_TOKEN)".into(),
            ));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }

        if Url::parse(&file.unlock_api_base).is_err() {
            return Err(ConfigError::Validation(format!(
                "unlock_api_base is not a valid URL: '{}'",
                file.unlock_api_base
            )));
        }

        if file.max_transfer_bytes == 0 {
            return Err(ConfigError::Validation("max_transfer_bytes must be positive".into()));
        }

        let allowed_hosts = if file.allowed_hosts.is_empty() {
            DEFAULT_HOSTS.iter().map(|h| h.to_string()).collect()
        } else {
            file.allowed_hosts
                .into_iter()
                .map(|h| h.to_lowercase())
                .collect()
        };

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            telegram_bot_token: token,
            unlock_api_base: file.unlock_api_base,
            storage: file.storage,
            extract_timeout_secs: file.extract_timeout_secs,
            max_transfer_bytes: file.max_transfer_bytes,
            allowed_hosts,
            data_dir,
            health_port: file.health_port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn parse(content: &str) -> ConfigFile {
        serde_json::from_str(content).unwrap()
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_valid_config_with_defaults() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdefGHIjklMNOpqrsTUVwxyz"
        }"#);
        let config = Config::load(file.path()).expect("should load valid config");
        assert_eq!(config.storage, StorageBackend::Disk);
        assert_eq!(config.max_transfer_bytes, 2 * 1024 * 1024 * 1024);
        assert_eq!(config.extract_timeout_secs, 60);
        assert!(config.allowed_hosts.contains(&"terabox.com".to_string()));
        assert!(config.health_port.is_none());
    }

    #[test]
    fn test_storage_backend_parses_lowercase() {
        let file = parse(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "storage": "sqlite"
        }"#);
        let config = Config::build(file, None).unwrap();
        assert_eq!(config.storage, StorageBackend::Sqlite);
    }

    #[test]
    fn test_env_token_overrides_file() {
        let file = parse(r#"{"telegram_bot_token": "111111:filetoken"}"#);
        let config = Config::build(file, Some("222222:envtoken".to_string())).unwrap();
        assert_eq!(config.telegram_bot_token, "222222:envtoken");
    }

    #[test]
    fn test_env_token_fills_missing_file_token() {
        let file = parse("{}");
        let config = Config::build(file, Some("222222:envtoken".to_string())).unwrap();
        assert_eq!(config.telegram_bot_token, "222222:envtoken");
    }

    #[test]
    fn test_missing_token() {
        let file = parse("{}");
        let err = assert_err(Config::build(file, None));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("telegram_bot_token"));
    }

    #[test]
    fn test_invalid_token_format_no_colon() {
        let file = parse(r#"{"telegram_bot_token": "invalid_token_no_colon"}"#);
        let err = assert_err(Config::build(file, None));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("invalid"));
    }

    #[test]
    fn test_invalid_token_format_non_numeric_id() {
        let file = parse(r#"{"telegram_bot_token": "notanumber:ABCdef"}"#);
        let err = assert_err(Config::build(file, None));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_invalid_api_base() {
        let file = parse(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "unlock_api_base": "not a url"
        }"#);
        let err = assert_err(Config::build(file, None));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("unlock_api_base"));
    }

    #[test]
    fn test_zero_transfer_ceiling_rejected() {
        let file = parse(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "max_transfer_bytes": 0
        }"#);
        let err = assert_err(Config::build(file, None));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_custom_hosts_lowercased() {
        let file = parse(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "allowed_hosts": ["Example.COM"]
        }"#);
        let config = Config::build(file, None).unwrap();
        assert_eq!(config.allowed_hosts, vec!["example.com".to_string()]);
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load("/nonexistent/path/config.json"));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
