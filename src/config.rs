//! Startup configuration
//!
//! Values come from the process environment, optionally layered on top of a
//! TOML file. The file is read from `RELAY_CONFIG` when set, otherwise from
//! `<config dir>/mqtt-mastodon-relay/config.toml` if that file exists.
//! Environment variables always win over file values, and empty variables
//! count as unset.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::mqtt::config::{BrokerAddress, MqttConfig};
use crate::relay::RelaySettings;

/// Posting target used when neither the message nor the configuration names one
pub const DEFAULT_MASTODON_SERVER: &str = "https://botsin.space";

const CONFIG_DIR: &str = "mqtt-mastodon-relay";
const CONFIG_FILE: &str = "config.toml";

const ENV_BROKER: &str = "MQTT_BROKER";
const ENV_CLIENT_ID: &str = "MQTT_CLIENT_ID";
const ENV_TOPIC: &str = "MQTT_TOPIC";
const ENV_USERNAME: &str = "MQTT_USERNAME";
const ENV_PASSWORD: &str = "MQTT_PASSWORD";
const ENV_DEFAULT_SERVER: &str = "MASTODON_DEFAULT_SERVER";
const ENV_MESSAGE_TIMEOUT: &str = "RELAY_MESSAGE_TIMEOUT_SECS";
const ENV_CONFIG_PATH: &str = "RELAY_CONFIG";

const DEFAULT_MESSAGE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_KEEP_ALIVE_SECS: u64 = 30;
const DEFAULT_RECONNECT_DELAY_SECS: u64 = 1;
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid broker address '{address}': {reason}")]
    InvalidBroker { address: String, reason: String },

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Optional file layer; every key may be overridden from the environment
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    pub broker: Option<String>,
    pub client_id: Option<String>,
    pub topic: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub default_server: Option<String>,
    pub message_timeout_secs: Option<u64>,
    pub keep_alive_secs: Option<u64>,
    pub reconnect_delay_secs: Option<u64>,
    pub drain_timeout_secs: Option<u64>,
    pub channel_capacity: Option<usize>,
}

impl FileConfig {
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded config file {}", path.display());
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub mqtt: MqttConfig,
    pub default_server: String,
    pub message_timeout: Duration,
}

impl RelayConfig {
    /// Reads the configuration from the process environment
    pub async fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok()).await
    }

    pub async fn load_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match non_empty(&lookup, ENV_CONFIG_PATH) {
            Some(path) => FileConfig::load(Path::new(&path)).await?,
            None => match default_config_path() {
                Some(path) if tokio::fs::try_exists(&path).await.unwrap_or(false) => {
                    FileConfig::load(&path).await?
                }
                _ => {
                    debug!("No config file found, using environment only");
                    FileConfig::default()
                }
            },
        };

        Self::resolve(file, lookup)
    }

    /// Merges the file layer with environment overrides
    pub fn resolve<F>(file: FileConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |key: &'static str, fallback: Option<String>| {
            non_empty(&lookup, key).or(fallback.filter(|v| !v.is_empty()))
        };

        let broker = pick(ENV_BROKER, file.broker).ok_or(ConfigError::Missing(ENV_BROKER))?;
        let broker: BrokerAddress = broker.parse()?;
        let client_id =
            pick(ENV_CLIENT_ID, file.client_id).ok_or(ConfigError::Missing(ENV_CLIENT_ID))?;
        let topic = pick(ENV_TOPIC, file.topic).ok_or(ConfigError::Missing(ENV_TOPIC))?;
        let username = pick(ENV_USERNAME, file.username);
        let password = pick(ENV_PASSWORD, file.password);

        let default_server = pick(ENV_DEFAULT_SERVER, file.default_server)
            .unwrap_or_else(|| DEFAULT_MASTODON_SERVER.to_string());

        let message_timeout_secs = match non_empty(&lookup, ENV_MESSAGE_TIMEOUT) {
            Some(raw) => parse_secs(ENV_MESSAGE_TIMEOUT, &raw)?,
            None => file
                .message_timeout_secs
                .unwrap_or(DEFAULT_MESSAGE_TIMEOUT_SECS),
        };
        if message_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: ENV_MESSAGE_TIMEOUT,
                value: "0".to_string(),
            });
        }

        let mqtt = MqttConfig {
            broker,
            client_id,
            topic,
            username,
            password,
            keep_alive: Duration::from_secs(
                file.keep_alive_secs.unwrap_or(DEFAULT_KEEP_ALIVE_SECS),
            ),
            reconnect_delay: Duration::from_secs(
                file.reconnect_delay_secs
                    .unwrap_or(DEFAULT_RECONNECT_DELAY_SECS),
            ),
            drain_timeout: Duration::from_secs(
                file.drain_timeout_secs.unwrap_or(DEFAULT_DRAIN_TIMEOUT_SECS),
            ),
            channel_capacity: file
                .channel_capacity
                .unwrap_or(DEFAULT_CHANNEL_CAPACITY)
                .max(1),
        };

        Ok(RelayConfig {
            mqtt,
            default_server,
            message_timeout: Duration::from_secs(message_timeout_secs),
        })
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            default_server: self.default_server.clone(),
            message_timeout: self.message_timeout,
        }
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|value| !value.is_empty())
}

fn parse_secs(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
    })
}

fn default_config_path() -> Option<PathBuf> {
    let mut path = dirs::config_dir()?;
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    Some(path)
}
