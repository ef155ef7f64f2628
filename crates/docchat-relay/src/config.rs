use std::time::Duration;

use crate::errors::RelayError;
use crate::model::RelayOptions;

/// Configuration for relaying to an HTTP inference backend.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Base URL of the backend; chat turns are posted to `<base_url>/chat`.
    pub base_url: String,
    /// Bound on establishing the TCP/TLS connection.
    pub connect_timeout: Duration,
    /// Bound on waiting for the first chunk after the request is sent.
    pub first_byte_timeout: Duration,
    /// Event buffer between the relay task and the response body.
    pub stream_buffer_capacity: usize,
    pub allow_anonymous: bool,
}

impl RelayConfig {
    /// Creates a config with default timeouts for the given backend.
    pub fn new(base_url: impl Into<String>) -> Self {
        let options = RelayOptions::default();
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(10),
            first_byte_timeout: options.first_byte_timeout,
            stream_buffer_capacity: options.stream_buffer_capacity,
            allow_anonymous: options.allow_anonymous,
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn first_byte_timeout(mut self, timeout: Duration) -> Self {
        self.first_byte_timeout = timeout;
        self
    }

    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.stream_buffer_capacity = capacity;
        self
    }

    pub fn allow_anonymous(mut self, allow: bool) -> Self {
        self.allow_anonymous = allow;
        self
    }

    /// Checks the URL scheme and that bounds are non-zero.
    pub fn validate(&self) -> Result<(), RelayError> {
        let base = self.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(RelayError::Config(format!(
                "backend base URL must start with http:// or https:// (got '{base}')"
            )));
        }
        if self.connect_timeout.is_zero() || self.first_byte_timeout.is_zero() {
            return Err(RelayError::Config("relay timeouts must be greater than 0".into()));
        }
        if self.stream_buffer_capacity == 0 {
            return Err(RelayError::Config(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn options(&self) -> RelayOptions {
        RelayOptions {
            first_byte_timeout: self.first_byte_timeout,
            stream_buffer_capacity: self.stream_buffer_capacity,
            allow_anonymous: self.allow_anonymous,
        }
    }

    pub(crate) fn chat_url(&self) -> String {
        format!("{}/chat", self.base_url.trim().trim_end_matches('/'))
    }
}
