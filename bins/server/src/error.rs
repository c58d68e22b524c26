#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("sink: {0}")]
    Sink(#[from] bridge_sink::SinkError),

    #[error("{0}")]
    Bridge(#[from] bridge_api::BridgeError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
