use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config/scanner.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid value {value:?} for {key}")]
    InvalidEnv { key: String, value: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub rate_limit: RateLimitConfig,
    pub mock: MockConfig,
    /// Replaces the built-in category catalog when set.
    pub catalog_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8081 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub base_model_path: PathBuf,
    pub projector_path: PathBuf,
    /// llama.cpp server executable, looked up on PATH unless it contains a separator.
    pub server_binary: String,
    /// Fixed port for the model server; a free loopback port is picked when unset.
    pub server_port: Option<u16>,
    pub context_size: u32,
    pub gpu_layers: u32,
    pub max_tokens: u32,
    pub max_inference_secs: u64,
    pub startup_timeout_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_model_path: PathBuf::from("./models/ggml-model-q4_k.gguf"),
            projector_path: PathBuf::from("./models/mmproj-model-f16.gguf"),
            server_binary: "llama-server".to_string(),
            server_port: None,
            context_size: 2048,
            gpu_layers: 1,
            max_tokens: 256,
            max_inference_secs: 30,
            startup_timeout_secs: 120,
            backoff_base_secs: 5,
            backoff_max_secs: 300,
        }
    }
}

impl ModelConfig {
    pub fn max_inference_time(&self) -> Duration {
        Duration::from_secs(self.max_inference_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Scans admitted per window and client; 0 disables the limit.
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window_secs: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    pub seed: Option<u64>,
}

impl AppConfig {
    /// Defaults, then the YAML file (if any), then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("SCANNER_CONFIG")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                default.exists().then_some(default)
            });

        let mut config = match path {
            Some(path) => {
                log::info!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&source)
    }

    pub fn from_yaml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("PORT") {
            self.server.port = parse_env("PORT", &value)?;
        }
        if let Some(value) = lookup("MODEL_PATH") {
            self.model.base_model_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("MMPROJ_PATH") {
            self.model.projector_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("LLAMA_SERVER_BIN") {
            self.model.server_binary = value;
        }
        if let Some(value) = lookup("MODEL_CONTEXT_SIZE") {
            self.model.context_size = parse_env("MODEL_CONTEXT_SIZE", &value)?;
        }
        if let Some(value) = lookup("MODEL_MAX_INFERENCE_SECS") {
            self.model.max_inference_secs = parse_env("MODEL_MAX_INFERENCE_SECS", &value)?;
        }
        if let Some(value) = lookup("MODEL_GPU_LAYERS") {
            self.model.gpu_layers = parse_env("MODEL_GPU_LAYERS", &value)?;
        }
        if let Some(value) = lookup("RATE_LIMIT_MAX") {
            self.rate_limit.max_requests = parse_env("RATE_LIMIT_MAX", &value)?;
        }
        if let Some(value) = lookup("RATE_LIMIT_WINDOW_SECS") {
            self.rate_limit.window_secs = parse_env("RATE_LIMIT_WINDOW_SECS", &value)?;
        }
        if let Some(value) = lookup("MOCK_SEED") {
            self.mock.seed = Some(parse_env("MOCK_SEED", &value)?);
        }
        if let Some(value) = lookup("CATALOG_PATH") {
            self.catalog_path = Some(PathBuf::from(value));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_service_contract() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.rate_limit.window(), Duration::from_secs(60));
        assert_eq!(config.model.context_size, 2048);
        assert_eq!(config.model.max_inference_time(), Duration::from_secs(30));
        assert!(config.mock.seed.is_none());
        assert!(config.catalog_path.is_none());
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let config = AppConfig::from_yaml_str(
            "model:\n  context_size: 4096\nrate_limit:\n  window_secs: 30\nmock:\n  seed: 9\n",
        )
        .unwrap();
        assert_eq!(config.model.context_size, 4096);
        assert_eq!(config.model.server_binary, "llama-server");
        assert_eq!(config.rate_limit.window_secs, 30);
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.mock.seed, Some(9));
    }

    #[test]
    fn config_file_is_read_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server:\n  port: 9000").unwrap();
        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);

        let missing = AppConfig::from_file(Path::new("/nonexistent/scanner.yaml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("PORT", "9090"),
                ("MODEL_PATH", "/srv/models/base.gguf"),
                ("RATE_LIMIT_MAX", "10"),
                ("MOCK_SEED", "1234"),
            ]))
            .unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.model.base_model_path, PathBuf::from("/srv/models/base.gguf"));
        assert_eq!(config.rate_limit.max_requests, 10);
        assert_eq!(config.mock.seed, Some(1234));
    }

    #[test]
    fn bad_numeric_environment_value_is_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_env(env(&[("MODEL_CONTEXT_SIZE", "lots")]));
        match result {
            Err(ConfigError::InvalidEnv { key, value }) => {
                assert_eq!(key, "MODEL_CONTEXT_SIZE");
                assert_eq!(value, "lots");
            }
            other => panic!("expected InvalidEnv, got {:?}", other),
        }
    }
}
