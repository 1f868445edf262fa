use std::time::Duration;

use config::{Config, File};
use fusion_core::{FusionConfig, SourceId};
use serde::Deserialize;
use snafu::ResultExt;

use crate::error::{
    Error, Result,
    error::{ConfigSnafu, InvalidEnvironmentSnafu, MissingEnvironmentSnafu},
};

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub log_level: LogLevel,
    pub environment: Environment,
    #[serde(default)]
    pub fusion: FusionConfig,
    pub consumer: ConsumerSettings,
    #[serde(default)]
    pub sources: Vec<SourceSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerSettings {
    #[serde(with = "humantime_serde")]
    pub commit_interval: Duration,
    pub max_line_length: usize,
    pub reconnect: ReconnectSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectSettings {
    #[serde(with = "humantime_serde")]
    pub min_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Retry forever when unset.
    pub max_attempts: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceSettings {
    pub id: SourceId,
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Environment {
    Local,
    Development,
    Production,
    Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Settings {
    pub fn new() -> Result<Self> {
        let environment: Environment = std::env::var("APP_ENVIRONMENT")
            .context(MissingEnvironmentSnafu)?
            .try_into()?;

        Config::builder()
            .add_source(
                File::with_name(&format!("config/{}", environment.as_str().to_lowercase()))
                    .required(true),
            )
            .add_source(config::Environment::with_prefix("VESSEL_FUSION").separator("__"))
            .set_override("environment", environment.as_str())
            .context(ConfigSnafu)?
            .build()
            .context(ConfigSnafu)?
            .try_deserialize()
            .context(ConfigSnafu)
    }
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "Local",
            Environment::Development => "Development",
            Environment::Production => "Production",
            Environment::Test => "Test",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "local" => Ok(Environment::Local),
            "development" => Ok(Environment::Development),
            "production" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            _ => InvalidEnvironmentSnafu { value }.fail(),
        }
    }
}

impl LogLevel {
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
