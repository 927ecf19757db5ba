use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SMTP protocol error: {0}")]
    SmtpProtocol(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Email not found: {0}")]
    NotFound(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Too many recipients (max {0})")]
    TooManyRecipients(usize),

    #[error("Message too large (max {0} bytes)")]
    MessageTooLarge(usize),
}

/// Failures reported to relay callbacks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("outgoing relay is not configured")]
    NotConfigured,

    #[error("email had no recipients")]
    NoRecipients,

    #[error("relay queue is full")]
    QueueFull,

    #[error("relay queue is closed")]
    Closed,

    #[error("relay attempt timed out")]
    Timeout,

    #[error("delivery failed: {0}")]
    Delivery(String),
}

pub type Result<T> = std::result::Result<T, MailError>;
