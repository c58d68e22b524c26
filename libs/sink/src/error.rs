use crate::lifecycle::SinkState;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink '{name}' is {state}, process() requires started")]
    NotStarted { name: String, state: SinkState },

    #[error("sink '{name}' cannot {op} while {state}")]
    InvalidState { name: String, op: &'static str, state: SinkState },

    #[error("sink '{name}' stopped: broadcast server at {addr} is no longer running")]
    ServerFailed { name: String, addr: std::net::SocketAddr },

    #[error("start: {0}")]
    Start(#[from] bridge_api::BridgeError),

    #[error("config: {0}")]
    Config(String),
}
