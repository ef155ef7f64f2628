//! Common imports for relay users.
pub use crate::{
    BackendChunk, ChatTurnRequest, ClientEvent, Credential, InferenceBackend, Relay, RelayConfig,
    RelayError, RelayStream, SessionClaims,
};
