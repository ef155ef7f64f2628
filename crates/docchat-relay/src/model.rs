use std::time::Duration;

use crate::identity::Credential;

/// One user submission: prompt, target document, and the caller's credential.
///
/// Built once per inbound request and consumed by [`crate::Relay::start`].
#[derive(Clone, Debug)]
pub struct ChatTurnRequest {
    /// Correlation id used in logs only.
    pub turn_id: uuid::Uuid,
    pub prompt: String,
    pub document_id: String,
    pub credential: Credential,
}

impl ChatTurnRequest {
    pub fn new(
        prompt: impl Into<String>,
        document_id: impl Into<String>,
        credential: Credential,
    ) -> Self {
        Self {
            turn_id: uuid::Uuid::new_v4(),
            prompt: prompt.into(),
            document_id: document_id.into(),
            credential,
        }
    }
}

/// One decoded text fragment in backend arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendChunk {
    pub text: String,
}

impl BackendChunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Timing and buffering knobs shared by every turn a relay runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayOptions {
    /// Upper bound between sending the backend request and the first chunk.
    pub first_byte_timeout: Duration,
    /// Bounded event buffer between the relay task and the response body.
    pub stream_buffer_capacity: usize,
    /// Forward anonymous callers instead of rejecting them.
    pub allow_anonymous: bool,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            first_byte_timeout: Duration::from_secs(30),
            stream_buffer_capacity: 128,
            allow_anonymous: false,
        }
    }
}
