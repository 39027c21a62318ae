/// Result type alias for firehose operations.
pub type Result<T> = std::result::Result<T, FirehoseError>;

#[derive(Debug, thiserror::Error)]
pub enum FirehoseError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Websocket error: {0}")]
    Websocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Stream closed by remote")]
    Disconnected,

    #[error("Session expired")]
    ExpiredToken,

    #[error("Blocklist refresh timed out")]
    RefreshTimeout,

    #[error("XRPC error (status {status}): {message}")]
    Api { status: u16, message: String },
}
