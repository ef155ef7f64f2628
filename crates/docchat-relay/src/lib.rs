//! Streaming chat relay between a signed-in browser session and a document
//! inference backend.
//!
//! A chat turn flows through three stages:
//!
//! 1. [`identity::resolve_credential`] turns a decoded session into a
//!    [`Credential`] (or the anonymous one).
//! 2. [`Relay::start`] posts the turn to an [`InferenceBackend`] and waits for
//!    its first chunk. Failures up to that point are returned as errors.
//! 3. The returned [`RelayStream`] yields one [`ClientEvent`] per backend chunk
//!    in arrival order, ending cleanly or with exactly one error event.
//!
//! ```no_run
//! use docchat_relay::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), RelayError> {
//! let relay = Relay::http(RelayConfig::new("http://127.0.0.1:8000"))?;
//! let credential = Credential::new("user-1", "id-token");
//! let mut stream = relay
//!     .start(ChatTurnRequest::new("Summarize page 1", "doc-1", credential))
//!     .await?;
//!
//! while let Some(event) = stream.next_event().await {
//!     print!("{}", String::from_utf8_lossy(&event.encode()));
//! }
//! # Ok(())
//! # }
//! ```

/// Backend contract and the reqwest-based implementation.
pub mod backend;
/// Relay configuration for HTTP backends.
pub mod config;
/// Incremental UTF-8 decoding of backend reads.
pub mod decode;
/// Relay error taxonomy.
pub mod errors;
/// Browser-facing event records and their parser.
pub mod event;
/// Session claims and caller credentials.
pub mod identity;
/// Chat turn, chunk, and option types.
pub mod model;
/// Common imports.
pub mod prelude;
/// Relay entry point and per-turn event stream.
pub mod relay;

pub use backend::{BackendChatBody, ChunkStream, HttpBackend, InferenceBackend, USER_ID_HEADER};
pub use config::RelayConfig;
pub use errors::RelayError;
pub use event::{ClientEvent, EventParser, parse_events};
pub use identity::{ANONYMOUS_USER_ID, Credential, SessionClaims, resolve_credential};
pub use model::{BackendChunk, ChatTurnRequest, RelayOptions};
pub use relay::{Relay, RelayBuilder, RelayStream, ShutdownHandle};
