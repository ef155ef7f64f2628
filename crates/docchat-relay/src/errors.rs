/// Errors produced while resolving, opening, or relaying a chat turn.
///
/// Errors returned by [`crate::Relay::start`] happen before any chunk reached
/// the client and are reported as HTTP statuses by the caller. Errors yielded
/// later by the backend stream become a single terminal
/// [`crate::ClientEvent::Error`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// No valid session credential was found for the caller.
    #[error("unauthenticated: no valid session")]
    Unauthenticated,
    /// The chat turn itself is invalid (for example an empty prompt).
    #[error("validation error: {0}")]
    Validation(String),
    /// Invalid relay or backend configuration.
    #[error("config error: {0}")]
    Config(String),
    /// The backend could not be reached, answered with a non-success status,
    /// or produced nothing within the first-byte bound.
    #[error("backend unavailable: {message}")]
    BackendUnavailable {
        message: String,
        status_code: Option<u16>,
        timed_out: bool,
    },
    /// The backend stream broke after it had started, or its bytes could not
    /// be decoded back into text.
    #[error("transport interrupted: {message}")]
    TransportInterrupted { message: String },
    /// The relay is shutting down and no longer accepts or continues turns.
    #[error("relay aborted")]
    Aborted,
}

impl RelayError {
    /// Creates a backend-unavailable error, optionally carrying the HTTP
    /// status the backend answered with.
    pub fn backend(message: impl Into<String>, status_code: Option<u16>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
            status_code,
            timed_out: false,
        }
    }

    /// Creates the error used when the backend misses the first-byte bound.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
            status_code: None,
            timed_out: true,
        }
    }

    /// Creates a mid-stream transport error.
    pub fn interrupted(message: impl Into<String>) -> Self {
        Self::TransportInterrupted {
            message: message.into(),
        }
    }

    /// Returns true when the backend missed the first-byte bound.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable {
                timed_out: true,
                ..
            }
        )
    }

    /// Returns the human-readable message forwarded to the browser.
    pub fn message(&self) -> String {
        match self {
            Self::BackendUnavailable { message, .. } | Self::TransportInterrupted { message } => {
                message.clone()
            }
            Self::Validation(message) | Self::Config(message) => message.clone(),
            Self::Unauthenticated => "Unauthorized".to_string(),
            Self::Aborted => "Relay is shutting down".to_string(),
        }
    }
}
