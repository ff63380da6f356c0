use thiserror::Error;

/// Top-level error type for Doorbell.
#[derive(Debug, Error)]
pub enum DoorbellError {
    /// Error from the calendar service.
    #[error("calendar error: {0}")]
    Calendar(String),

    /// Error from a messaging channel.
    #[error("channel error: {0}")]
    Channel(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Persistent store error (missing or corrupt data file).
    #[error("storage error: {0}")]
    Storage(String),

    /// Error relaying to the music player client.
    #[error("player error: {0}")]
    Player(String),

    /// Error ringing the chime or speaking the announcement.
    #[error("chime error: {0}")]
    Chime(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
