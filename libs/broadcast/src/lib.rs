//! TCP fan-out server.
//!
//! Клиенты подключаются, проходят handshake (`AUTH <identity>`), после чего
//! получают каждый batch как последовательность length-prefixed фреймов.
//! Каждый клиент обслуживается своей writer task с ограниченной очередью;
//! медленный клиент никогда не блокирует остальных.

mod client;
mod config;
mod connection;
mod registry;
mod server;

pub use client::BroadcastClient;
pub use config::BroadcastConfig;
pub use registry::{ConnectionSnapshot, ConnectionStats};
pub use server::BroadcastServer;
