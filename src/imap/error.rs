use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImapError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Mailbox error: {0}")]
    Mailbox(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Expunge error: {0}")]
    Expunge(String),

    #[error("Timeout: no new email found within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Client not connected. Call login() first.")]
    NotConnected,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid search criteria: {0}")]
    InvalidCriteria(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ImapError {
    /// Whether a watch loop may keep polling after this error.
    ///
    /// Only per-message fetch failures are soft; everything else ends the watch.
    pub fn is_soft(&self) -> bool {
        matches!(self, ImapError::Fetch(_))
    }
}

impl From<async_imap::error::Error> for ImapError {
    fn from(err: async_imap::error::Error) -> Self {
        match err {
            async_imap::error::Error::Io(e) => ImapError::Connection(e.to_string()),
            async_imap::error::Error::No(msg) => ImapError::Internal(format!("NO: {}", msg)),
            async_imap::error::Error::Bad(msg) => ImapError::Internal(format!("BAD: {}", msg)),
            async_imap::error::Error::Parse(e) => ImapError::Decode(e.to_string()),
            _ => ImapError::Internal(err.to_string()),
        }
    }
}

impl From<std::io::Error> for ImapError {
    fn from(err: std::io::Error) -> Self {
        ImapError::Connection(err.to_string())
    }
}
