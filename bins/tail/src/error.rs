#[derive(Debug, thiserror::Error)]
pub enum TailError {
    #[error("connect {addr}: {source}")]
    Connect { addr: String, source: bridge_api::BridgeError },

    #[error("{0}")]
    Denied(String),

    #[error("connect {0}: timed out")]
    Timeout(String),

    #[error("stream: {0}")]
    Stream(#[from] bridge_api::BridgeError),

    #[error("output: {0}")]
    Output(#[from] std::io::Error),

    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}
