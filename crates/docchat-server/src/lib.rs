//! HTTP front for the document chat relay.
//!
//! Decodes the caller's session, relays each chat turn to the inference
//! backend through [`docchat_relay::Relay`], and streams the answer back as
//! `data: {...}` records.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`app`] | State, router, and server lifecycle |
//! | [`config`] | Environment and CLI configuration |
//! | [`error`] | Pre-stream JSON error responses |
//! | [`mock_backend`] | Built-in stand-in inference backend |
//! | [`observability`] | Logging setup |
//! | [`routes`] | Chat and health handlers |
//! | [`session`] | Session cookie verification |

pub mod app;
pub mod config;
pub mod error;
pub mod mock_backend;
pub mod observability;
pub mod routes;
pub mod session;
