//! Connector configuration
//!
//! Options are resolved through the [`ConfigProvider`] capability, which is
//! implemented once per supported file format. Each format addresses the same
//! five options with its own schema:
//!
//! | option | TOML (section/key) | JSON path |
//! |---|---|---|
//! | address | `sensu/connection` | `Sensu.Connection.Address` |
//! | subscriptions | `sensu/subscriptions` | `Sensu.Connection.Subscriptions` |
//! | client name | `sensu/client_name` | `Sensu.Client.Name` |
//! | client address | `sensu/client_address` | `Sensu.Client.Address` |
//! | keepalive interval | `sensu/keepalive_interval` | `Sensu.Connection.KeepaliveInterval` |

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::trace;

use crate::error::ConfigError;

/// The named options the connector needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigOption {
    Address,
    Subscriptions,
    ClientName,
    ClientAddress,
    KeepaliveInterval,
}

impl ConfigOption {
    pub const ALL: [ConfigOption; 5] = [
        ConfigOption::Address,
        ConfigOption::Subscriptions,
        ConfigOption::ClientName,
        ConfigOption::ClientAddress,
        ConfigOption::KeepaliveInterval,
    ];

    /// Section and key in section/key documents
    pub fn section_key(self) -> (&'static str, &'static str) {
        match self {
            ConfigOption::Address => ("sensu", "connection"),
            ConfigOption::Subscriptions => ("sensu", "subscriptions"),
            ConfigOption::ClientName => ("sensu", "client_name"),
            ConfigOption::ClientAddress => ("sensu", "client_address"),
            ConfigOption::KeepaliveInterval => ("sensu", "keepalive_interval"),
        }
    }

    /// Path of nested object keys in JSON documents
    pub fn json_path(self) -> &'static [&'static str] {
        match self {
            ConfigOption::Address => &["Sensu", "Connection", "Address"],
            ConfigOption::Subscriptions => &["Sensu", "Connection", "Subscriptions"],
            ConfigOption::ClientName => &["Sensu", "Client", "Name"],
            ConfigOption::ClientAddress => &["Sensu", "Client", "Address"],
            ConfigOption::KeepaliveInterval => &["Sensu", "Connection", "KeepaliveInterval"],
        }
    }
}

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Human-readable key of `option` in this format's schema
    pub fn key(self, option: ConfigOption) -> String {
        match self {
            ConfigFormat::Toml => {
                let (section, key) = option.section_key();
                format!("{section}/{key}")
            }
            ConfigFormat::Json => option.json_path().join("."),
        }
    }

    fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(ConfigFormat::Json),
            "toml" | "ini" | "conf" => Some(ConfigFormat::Toml),
            _ => None,
        }
    }
}

/// Raw value of an option before it is interpreted
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    String(String),
    Integer(i64),
    List(Vec<String>),
    /// Present, but of a shape no option accepts
    Unsupported(String),
}

/// Named-option lookup over one configuration document
pub trait ConfigProvider: Send + Sync {
    fn format(&self) -> ConfigFormat;

    /// Raw value of `option`, or `None` if the document does not set it
    fn lookup(&self, option: ConfigOption) -> Option<OptionValue>;
}

/// JSON documents (`{"Sensu": {"Connection": {...}, "Client": {...}}}`)
#[derive(Debug, Clone)]
pub struct JsonConfig {
    root: serde_json::Value,
}

impl JsonConfig {
    pub fn new(root: serde_json::Value) -> Self {
        Self { root }
    }

    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content).map(Self::new)
    }
}

impl ConfigProvider for JsonConfig {
    fn format(&self) -> ConfigFormat {
        ConfigFormat::Json
    }

    fn lookup(&self, option: ConfigOption) -> Option<OptionValue> {
        let value = option
            .json_path()
            .iter()
            .try_fold(&self.root, |node, key| node.get(*key))?;

        use serde_json::Value;
        Some(match value {
            Value::Null => return None,
            Value::String(s) => OptionValue::String(s.clone()),
            Value::Number(n) => match n.as_i64() {
                Some(i) => OptionValue::Integer(i),
                None => OptionValue::Unsupported(n.to_string()),
            },
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map_or_else(|| OptionValue::Unsupported(value.to_string()), OptionValue::List),
            other => OptionValue::Unsupported(other.to_string()),
        })
    }
}

/// Section/key documents written as TOML (`[sensu]` with one key per option)
#[derive(Debug, Clone)]
pub struct TomlConfig {
    root: toml::Table,
}

impl TomlConfig {
    pub fn new(root: toml::Table) -> Self {
        Self { root }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content).map(Self::new)
    }
}

impl ConfigProvider for TomlConfig {
    fn format(&self) -> ConfigFormat {
        ConfigFormat::Toml
    }

    fn lookup(&self, option: ConfigOption) -> Option<OptionValue> {
        let (section, key) = option.section_key();
        let value = self.root.get(section)?.as_table()?.get(key)?;

        use toml::Value;
        Some(match value {
            Value::String(s) => OptionValue::String(s.clone()),
            Value::Integer(i) => OptionValue::Integer(*i),
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map_or_else(|| OptionValue::Unsupported(value.to_string()), OptionValue::List),
            other => OptionValue::Unsupported(other.to_string()),
        })
    }
}

/// Load a configuration file, choosing the provider by file extension
pub fn load_file(path: &Path) -> Result<Box<dyn ConfigProvider>, ConfigError> {
    let format = ConfigFormat::from_path(path)
        .ok_or_else(|| ConfigError::UnsupportedFormat(path.to_path_buf()))?;

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let parse_error = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let provider: Box<dyn ConfigProvider> = match format {
        ConfigFormat::Json => {
            Box::new(JsonConfig::parse(&content).map_err(|e| parse_error(e.to_string()))?)
        }
        ConfigFormat::Toml => {
            Box::new(TomlConfig::parse(&content).map_err(|e| parse_error(e.to_string()))?)
        }
    };

    trace!("loaded {format:?} config from {}", path.display());
    Ok(provider)
}

/// `~/.config/sensu-bridge/config.toml`, if it exists
pub fn default_config_path() -> Option<PathBuf> {
    let path = dirs::home_dir()?.join(".config/sensu-bridge/config.toml");
    path.exists().then_some(path)
}

/// Backoff schedule used by `reconnect`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Delay before `attempt` (1-based): doubles each time, capped at `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Shortest keepalive interval accepted
pub const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);

/// Fully resolved connector settings
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorSettings {
    /// AMQP URI of the broker
    pub address: String,

    /// Subscription topics, ordered and without duplicates
    pub subscriptions: Vec<String>,

    /// Client identity reported to the server
    pub client_name: String,

    /// Client network address reported in keepalives
    pub client_address: String,

    pub keepalive_interval: Duration,

    pub reconnect: ReconnectPolicy,
}

impl ConnectorSettings {
    /// Resolve every option from `provider`
    ///
    /// Fails on the first option that is missing or malformed.
    pub fn from_provider(provider: &dyn ConfigProvider) -> Result<Self, ConfigError> {
        let address = require_string(provider, ConfigOption::Address)?;
        let subscriptions = require_subscriptions(provider)?;
        let client_name = require_string(provider, ConfigOption::ClientName)?;
        if client_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: provider.format().key(ConfigOption::ClientName),
                reason: "client name must not be empty".to_string(),
            });
        }
        let client_address = require_string(provider, ConfigOption::ClientAddress)?;
        let keepalive_interval = require_interval(provider)?;

        Ok(Self {
            address,
            subscriptions,
            client_name,
            client_address,
            keepalive_interval,
            reconnect: ReconnectPolicy::default(),
        })
    }

    /// Check the invariants `from_provider` enforces on settings built by hand
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "client_name".to_string(),
                reason: "client name must not be empty".to_string(),
            });
        }
        if self.keepalive_interval < MIN_KEEPALIVE_INTERVAL {
            return Err(ConfigError::InvalidValue {
                key: "keepalive_interval".to_string(),
                reason: format!(
                    "interval must be at least 1 second, got {:?}",
                    self.keepalive_interval
                ),
            });
        }
        Ok(())
    }

    pub fn with_reconnect_policy(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Name of the per-client fanout exchange
    pub fn exchange_name(&self) -> String {
        format!("client:{}", self.client_name)
    }
}

fn require(provider: &dyn ConfigProvider, option: ConfigOption) -> Result<OptionValue, ConfigError> {
    provider.lookup(option).ok_or_else(|| ConfigError::Missing {
        key: provider.format().key(option),
    })
}

fn require_string(provider: &dyn ConfigProvider, option: ConfigOption) -> Result<String, ConfigError> {
    match require(provider, option)? {
        OptionValue::String(s) => Ok(s),
        _ => Err(ConfigError::InvalidType {
            key: provider.format().key(option),
            expected: "string",
        }),
    }
}

fn require_subscriptions(provider: &dyn ConfigProvider) -> Result<Vec<String>, ConfigError> {
    let option = ConfigOption::Subscriptions;
    let raw = match require(provider, option)? {
        OptionValue::String(s) => s.split(',').map(str::to_string).collect(),
        OptionValue::List(items) => items,
        _ => {
            return Err(ConfigError::InvalidType {
                key: provider.format().key(option),
                expected: "comma-separated string or list of strings",
            });
        }
    };

    let subscriptions = normalize_subscriptions(raw);
    if subscriptions.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: provider.format().key(option),
            reason: "at least one subscription is required".to_string(),
        });
    }
    Ok(subscriptions)
}

/// Trim entries, drop empty ones and keep the first occurrence of duplicates
pub fn normalize_subscriptions(raw: Vec<String>) -> Vec<String> {
    let mut subscriptions: Vec<String> = Vec::with_capacity(raw.len());
    for entry in raw {
        let entry = entry.trim();
        if !entry.is_empty() && !subscriptions.iter().any(|s| s == entry) {
            subscriptions.push(entry.to_string());
        }
    }
    subscriptions
}

fn require_interval(provider: &dyn ConfigProvider) -> Result<Duration, ConfigError> {
    let option = ConfigOption::KeepaliveInterval;
    let key = || provider.format().key(option);

    let seconds = match require(provider, option)? {
        OptionValue::Integer(i) => i,
        OptionValue::String(s) => s.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key(),
            reason: format!("'{s}' is not a whole number of seconds"),
        })?,
        _ => {
            return Err(ConfigError::InvalidType {
                key: key(),
                expected: "integer",
            });
        }
    };

    if seconds < 1 {
        return Err(ConfigError::InvalidValue {
            key: key(),
            reason: format!("interval must be at least 1 second, got {seconds}"),
        });
    }
    Ok(Duration::from_secs(seconds as u64))
}
