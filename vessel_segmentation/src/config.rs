use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_cors_allowed_origins")]
    pub cors_allowed_origins: Vec<String>,
    #[serde(default = "default_max_concurrent_predictions")]
    pub max_concurrent_predictions: usize,
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,
}

fn default_max_body_bytes() -> usize {
    15 * 1024 * 1024
}

fn default_cors_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3001".to_string(),
        "http://127.0.0.1:3001".to_string(),
    ]
}

fn default_max_concurrent_predictions() -> usize {
    4
}

fn default_queue_timeout_ms() -> u64 {
    30_000
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub model_dir: PathBuf,
    pub onnx_file: String,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(default = "default_input_dim")]
    pub input_width: u32,
    #[serde(default = "default_input_dim")]
    pub input_height: u32,
    #[serde(default)]
    pub layout: TensorLayout,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default)]
    pub fallback: FallbackMode,
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

fn default_input_dim() -> u32 {
    256
}

fn default_threshold() -> f32 {
    0.5
}

/// Memory order of the model input tensor.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    #[default]
    Nhwc,
    Nchw,
}

impl TensorLayout {
    pub fn as_str(&self) -> &'static str {
        match self {
            TensorLayout::Nhwc => "nhwc",
            TensorLayout::Nchw => "nchw",
        }
    }
}

/// What to serve when the ONNX file is missing.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    #[default]
    Proxy,
    None,
}

impl ModelConfig {
    pub fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }

    pub fn model_file_exists(&self) -> bool {
        self.get_path().is_file()
    }
}

pub trait Validatable {
    fn validate(&self) -> Result<(), String>;
}

impl Validatable for ModelConfig {
    fn validate(&self) -> Result<(), String> {
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(format!(
                "Model threshold must be in (0, 1), got {}",
                self.threshold
            ));
        }
        if self.input_width == 0 || self.input_height == 0 {
            return Err(format!(
                "Model input size must be non-zero, got {}x{}",
                self.input_width, self.input_height
            ));
        }
        if self.num_instances == 0 {
            return Err("Model num_instances must be at least 1".to_string());
        }
        if self.fallback == FallbackMode::None && !self.model_file_exists() {
            return Err(format!("Model file not found: {:?}", self.get_path()));
        }
        Ok(())
    }
}

impl Validatable for ServerConfig {
    fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_predictions == 0 {
            return Err("Server max_concurrent_predictions must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir().map_err(|e| {
        config::ConfigError::Message(format!("Failed to determine the current directory: {}", e))
    })?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("VS")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;
    validate_config(&config)?;

    Ok(config)
}

// Runs before the subscriber exists, so failures travel in the error only.
fn validate_config(config: &Config) -> Result<(), config::ConfigError> {
    config
        .server
        .validate()
        .and_then(|_| config.model.validate())
        .map_err(|e| config::ConfigError::Message(format!("Configuration validation failed: {}", e)))
}
