use std::time::Duration;

use clap::Parser;

#[derive(Parser, Clone, Debug)]
#[command(name = "bridge-tail", about = "Подписаться на broadcast и печатать события как JSON")]
pub struct TailArgs {
    /// Адрес broadcast сервера
    #[arg(long, default_value = "127.0.0.1:9090", env = "BRIDGE_TAIL_ADDR")]
    pub addr: String,

    /// Identity для handshake
    #[arg(long, default_value = "user_default", env = "BRIDGE_TAIL_IDENTITY")]
    pub identity: String,

    /// Печатать body в base64 вместо UTF-8
    #[arg(long)]
    pub base64: bool,

    /// Выйти после N событий
    #[arg(long)]
    pub count: Option<u64>,

    /// Таймаут подключения и handshake, секунды
    #[arg(long, default_value_t = 10)]
    pub connect_timeout: u64,
}

impl TailArgs {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout.max(1))
    }
}
