use thiserror::Error;

/// Failures of the push channel.  None of these are fatal: the engine reports
/// them and keeps running on whatever state it already has.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Outbound send attempted while the channel is not open.
    #[error("channel is not open")]
    NotOpen,
    /// `open()` called on a transport that already holds a live connection.
    #[error("channel is already open")]
    AlreadyOpen,
    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("channel error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
}
