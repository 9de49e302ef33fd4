//! Error types for the easel orchestration core.

/// Top-level error type for the display orchestration core.
#[derive(Debug, thiserror::Error)]
pub enum EaselError {
    /// A content producer failed to generate an artifact.
    #[error("content error: {0}")]
    Content(String),

    /// The display sink rejected an artifact.
    #[error("display error: {0}")]
    Display(String),

    /// Invalid schedule edit (duplicate loop name, bad time window, ...).
    #[error("config error: {0}")]
    Config(String),

    /// I/O error (persistence, cache, status snapshot).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Request slot or completion channel error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EaselError>;
