/// Shared error type used across all Mando crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("session store: {0}")]
    Store(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("intent not found: {0}")]
    IntentNotFound(String),

    #[error("action not found: {0}")]
    ActionNotFound(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error is transient (worth retrying with backoff).
    ///
    /// Timeouts, 5xx-class HTTP failures, and connection resets are
    /// transient. Validation, auth, and invariant failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::Http(_) | Error::Io(_) => true,
            Error::Provider { message, .. } | Error::Store(message) => {
                // Adapters embed the upstream status in the message.
                message.contains("HTTP 5") || message.contains("connection")
            }
            _ => false,
        }
    }

    /// Whether this error is critical for an execution (triggers rollback):
    /// timeouts, connection errors, and authentication/authorization
    /// failures.
    pub fn is_critical(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::Auth(_) => true,
            Error::Http(message) => message.contains("connection"),
            Error::Provider { message, .. } => {
                message.contains("HTTP 401") || message.contains("HTTP 403")
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
