use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use bridge_api::{OverflowPolicy, parse_identity_list};
use bridge_codec::DEFAULT_MAX_FRAME;
use broadcast_server::BroadcastConfig;

use crate::SinkError;

// ═══════════════════════════════════════════════════════════════
//  Sink Config
// ═══════════════════════════════════════════════════════════════

/// Настройки broadcast sink'а. Ключи принимаются как в snake_case,
/// так и в camelCase (`batchSize`, `transactionTime`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SinkConfig {
    /// Имя sink'а для логов и счётчиков.
    #[serde(default = "default_name")]
    pub name: String,
    /// Адрес, на котором слушает broadcast сервер.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Разрешённые identity, через запятую и/или перевод строки.
    #[serde(default = "default_users")]
    pub users: String,
    /// Максимум событий в одной транзакции.
    #[serde(default = "default_batch_size", alias = "batchSize")]
    pub batch_size: usize,
    /// Бюджет времени на batch, отсчитывается от последнего commit'а (мс).
    #[serde(
        default = "default_transaction_time_ms",
        alias = "transactionTime",
        alias = "transaction_time"
    )]
    pub transaction_time_ms: u64,
    /// Размер очереди исходящих batch'ей на одного клиента.
    #[serde(default = "default_client_buffer", alias = "clientBuffer")]
    pub client_buffer: usize,
    /// Стратегия при переполнении очереди клиента.
    #[serde(default)]
    pub overflow: OverflowPolicy,
    #[serde(default = "default_write_timeout_ms", alias = "writeTimeout")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout_ms", alias = "handshakeTimeout")]
    pub handshake_timeout_ms: u64,
    /// Максимальный размер одного фрейма, 0 = без ограничения.
    #[serde(default = "default_max_frame", alias = "maxFrame")]
    pub max_frame: usize,
}

fn default_name() -> String {
    "broadcast".into()
}
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    9090
}
fn default_users() -> String {
    "user_default".into()
}
fn default_batch_size() -> usize {
    128
}
fn default_transaction_time_ms() -> u64 {
    5000
}
fn default_client_buffer() -> usize {
    64
}
fn default_write_timeout_ms() -> u64 {
    5000
}
fn default_handshake_timeout_ms() -> u64 {
    10_000
}
fn default_max_frame() -> usize {
    DEFAULT_MAX_FRAME
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            host: default_host(),
            port: default_port(),
            users: default_users(),
            batch_size: default_batch_size(),
            transaction_time_ms: default_transaction_time_ms(),
            client_buffer: default_client_buffer(),
            overflow: OverflowPolicy::default(),
            write_timeout_ms: default_write_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            max_frame: default_max_frame(),
        }
    }
}

impl SinkConfig {
    /// Apply host-style key/value options on top of the current values,
    /// then validate. Unknown keys are logged and ignored.
    pub fn configure(&mut self, options: &HashMap<String, String>) -> Result<(), SinkError> {
        for (key, value) in options {
            let value = value.trim();
            match key.as_str() {
                "name" => self.name = value.to_string(),
                "host" => self.host = value.to_string(),
                "port" => self.port = parse_num(key, value)?,
                "users" => self.users = value.to_string(),
                "batchSize" | "batch_size" => self.batch_size = parse_num(key, value)?,
                "transactionTime" | "transaction_time" | "transaction_time_ms" => {
                    self.transaction_time_ms = parse_num(key, value)?
                }
                "clientBuffer" | "client_buffer" => self.client_buffer = parse_num(key, value)?,
                "overflow" => {
                    self.overflow = value.parse().map_err(|e: bridge_api::BridgeError| {
                        SinkError::Config(e.to_string())
                    })?
                }
                "writeTimeout" | "write_timeout_ms" => self.write_timeout_ms = parse_num(key, value)?,
                "handshakeTimeout" | "handshake_timeout_ms" => {
                    self.handshake_timeout_ms = parse_num(key, value)?
                }
                "maxFrame" | "max_frame" => self.max_frame = parse_num(key, value)?,
                _ => tracing::warn!(sink = %self.name, key = %key, "unknown sink option ignored"),
            }
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), SinkError> {
        if self.batch_size == 0 {
            return Err(SinkError::Config("batch_size must be at least 1".into()));
        }
        if self.transaction_time_ms == 0 {
            return Err(SinkError::Config("transaction_time must be at least 1 ms".into()));
        }
        if self.client_buffer == 0 {
            return Err(SinkError::Config("client_buffer must be at least 1".into()));
        }
        if self.user_set().is_empty() {
            return Err(SinkError::Config("users must name at least one identity".into()));
        }
        Ok(())
    }

    pub fn user_set(&self) -> BTreeSet<String> {
        parse_identity_list(&self.users)
    }

    pub fn transaction_time(&self) -> Duration {
        Duration::from_millis(self.transaction_time_ms)
    }

    pub fn broadcast_config(&self) -> BroadcastConfig {
        let mut config = BroadcastConfig::new(self.host.clone(), self.port, self.user_set());
        config.client_buffer = self.client_buffer;
        config.overflow = self.overflow;
        config.write_timeout = Duration::from_millis(self.write_timeout_ms);
        config.handshake_timeout = Duration::from_millis(self.handshake_timeout_ms);
        config.max_frame = self.max_frame;
        config
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, SinkError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| SinkError::Config(format!("{key} = '{value}': {e}")))
}
