use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};

use bridge_api::OverflowPolicy;
use bridge_channel::MemoryChannelConfig;
use bridge_sink::SinkConfig;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "bridge-server", about = "Мост: транзакционная очередь → TCP broadcast")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Запустить сервер
    Serve(ServeArgs),
    /// Проверить конфиг и напечатать итоговые настройки
    CheckConfig(ServeArgs),
}

#[derive(Args, Clone, Debug, Default)]
pub struct ServeArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, default_value = "config.toml", env = "BRIDGE_CONFIG")]
    pub config: String,

    /// Адрес broadcast сервера (перекрывает [sink].host)
    #[arg(long)]
    pub host: Option<String>,

    /// Порт broadcast сервера (перекрывает [sink].port)
    #[arg(long)]
    pub port: Option<u16>,

    /// Разрешённые identity через запятую (перекрывает [sink].users)
    #[arg(long)]
    pub users: Option<String>,

    /// Максимум событий в batch'е
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Бюджет времени batch'а в мс
    #[arg(long)]
    pub transaction_time: Option<u64>,

    /// Стратегия переполнения очереди клиента: drop | disconnect | back_pressure
    #[arg(long)]
    pub overflow: Option<OverflowPolicy>,

    /// Порт line ingest (включает [ingest], если его нет в конфиге)
    #[arg(long)]
    pub ingest_port: Option<u16>,
}

// ═══════════════════════════════════════════════════════════════
//  TOML Config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub channel: MemoryChannelConfig,
    /// Line ingest: каждая строка из TCP → событие в канале.
    #[serde(default)]
    pub ingest: Option<IngestConfig>,
    #[serde(default)]
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    #[serde(default = "default_ingest_host")]
    pub host: String,
    #[serde(default = "default_ingest_port")]
    pub port: u16,
    /// Максимальная длина строки в байтах.
    #[serde(default = "default_max_line")]
    pub max_line: usize,
}

fn default_ingest_host() -> String {
    "0.0.0.0".into()
}
fn default_ingest_port() -> u16 {
    9191
}
fn default_max_line() -> usize {
    1024 * 1024
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            host: default_ingest_host(),
            port: default_ingest_port(),
            max_line: default_max_line(),
        }
    }
}

/// Пауза между вызовами `process()`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    /// Прирост паузы за каждый подряд идущий Backoff (мс).
    #[serde(default = "default_backoff_increment_ms")]
    pub backoff_increment_ms: u64,
    /// Потолок паузы (мс).
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Период логирования счётчиков (с), 0 = выключено.
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
}

fn default_backoff_increment_ms() -> u64 {
    1000
}
fn default_max_backoff_ms() -> u64 {
    5000
}
fn default_report_interval_secs() -> u64 {
    60
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            backoff_increment_ms: default_backoff_increment_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            report_interval_secs: default_report_interval_secs(),
        }
    }
}

impl RunnerConfig {
    /// Delay after `consecutive` Backoff results in a row.
    pub fn backoff_delay(&self, consecutive: u32) -> Duration {
        let ms = self
            .backoff_increment_ms
            .saturating_mul(u64::from(consecutive))
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    pub fn report_interval(&self) -> Option<Duration> {
        (self.report_interval_secs > 0).then(|| Duration::from_secs(self.report_interval_secs))
    }
}

impl ServerConfig {
    /// Итоговая конфигурация: defaults < config.toml < CLI.
    ///
    /// Отсутствующий файл означает «всё по умолчанию».
    pub fn load(args: &ServeArgs) -> Result<Self, ServerError> {
        let mut config = match std::fs::read_to_string(&args.config) {
            Ok(content) => Self::parse(&content)
                .map_err(|detail| ServerError::Config { context: "parse", detail: format!("'{}': {detail}", args.config) })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(config = %args.config, "config file not found, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(ServerError::Config { context: "read", detail: format!("'{}': {e}", args.config) });
            }
        };
        config.apply_args(args);
        config
            .sink
            .validate()
            .map_err(|e| ServerError::Config { context: "sink", detail: e.to_string() })?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    fn apply_args(&mut self, args: &ServeArgs) {
        let sink = &mut self.sink;
        if let Some(host) = &args.host {
            sink.host = host.clone();
        }
        if let Some(port) = args.port {
            sink.port = port;
        }
        if let Some(users) = &args.users {
            sink.users = users.clone();
        }
        if let Some(n) = args.batch_size {
            sink.batch_size = n;
        }
        if let Some(ms) = args.transaction_time {
            sink.transaction_time_ms = ms;
        }
        if let Some(overflow) = args.overflow {
            sink.overflow = overflow;
        }
        if let Some(port) = args.ingest_port {
            self.ingest.get_or_insert_with(IngestConfig::default).port = port;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_file_parses() {
        let config = ServerConfig::parse(
            r#"
            [sink]
            port = 9500
            users = "alice,bob"
            batchSize = 32
            transactionTime = 1500

            [channel]
            capacity = 500

            [ingest]
            port = 9600

            [runner]
            max_backoff_ms = 2000
            "#,
        )
        .unwrap();
        assert_eq!(config.sink.port, 9500);
        assert_eq!(config.sink.batch_size, 32);
        assert_eq!(config.sink.transaction_time_ms, 1500);
        assert_eq!(config.channel.capacity, 500);
        assert_eq!(config.channel.keep_alive_ms, 3000);
        assert_eq!(config.ingest.unwrap().port, 9600);
        assert_eq!(config.runner.max_backoff_ms, 2000);
        assert_eq!(config.runner.backoff_increment_ms, 1000);
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config = ServerConfig::parse("").unwrap();
        assert_eq!(config.sink.port, 9090);
        assert!(config.ingest.is_none());
    }

    #[test]
    fn unknown_section_is_rejected() {
        assert!(ServerConfig::parse("[sinks]\nport = 1").is_err());
    }

    #[test]
    fn cli_overrides_file() {
        let mut config = ServerConfig::parse("[sink]\nport = 9500\nbatchSize = 32").unwrap();
        let args = ServeArgs {
            port: Some(9700),
            users: Some("carol".into()),
            ingest_port: Some(9800),
            ..ServeArgs::default()
        };
        config.apply_args(&args);
        assert_eq!(config.sink.port, 9700);
        assert_eq!(config.sink.batch_size, 32);
        assert_eq!(config.sink.users, "carol");
        assert_eq!(config.ingest.unwrap().port, 9800);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let args = ServeArgs { config: "/nonexistent/bridge.toml".into(), ..ServeArgs::default() };
        let config = ServerConfig::load(&args).unwrap();
        assert_eq!(config.sink.batch_size, 128);
    }

    #[test]
    fn backoff_grows_linearly_then_caps() {
        let runner = RunnerConfig::default();
        assert_eq!(runner.backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(runner.backoff_delay(3), Duration::from_millis(3000));
        assert_eq!(runner.backoff_delay(9), Duration::from_millis(5000));
        assert_eq!(runner.backoff_delay(u32::MAX), Duration::from_millis(5000));
    }
}
