use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A source stream could not be opened or read to completion.
    #[error("failed to read {source_name} source: {reason}")]
    Source { source_name: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking parse worker panicked or was cancelled.
    #[error("source worker failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

impl Error {
    pub fn source_failure(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Error::Source {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }
}

/// Delivery failures reported by a notification channel.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification transport failed: {0}")]
    Transport(String),

    #[error("notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("notification outbox write failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        NotifyError::Transport(err.to_string())
    }
}
