//! Backend inference service contract and its HTTP implementation.

use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::config::RelayConfig;
use crate::decode::Utf8ChunkDecoder;
use crate::errors::RelayError;
use crate::model::{BackendChunk, ChatTurnRequest};

/// Header carrying the caller's user id to the backend.
pub const USER_ID_HEADER: &str = "X-User-Id";

/// Lazy, single-pass sequence of decoded backend chunks.
///
/// Dropping the stream releases the underlying connection.
pub type ChunkStream =
    Pin<Box<dyn futures::Stream<Item = Result<BackendChunk, RelayError>> + Send + 'static>>;

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// A service that answers a chat turn with an incrementally produced text.
#[async_trait::async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Opens one backend stream for the turn.
    ///
    /// Errors returned here happen before any chunk exists. Errors yielded by
    /// the stream are mid-stream failures and end it.
    async fn open(&self, turn: &ChatTurnRequest) -> Result<ChunkStream, RelayError>;
}

/// JSON body posted to `<base_url>/chat`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendChatBody {
    pub message: String,
    pub document_id: String,
    pub user_id: String,
}

impl BackendChatBody {
    pub fn from_turn(turn: &ChatTurnRequest) -> Self {
        Self {
            message: turn.prompt.clone(),
            document_id: turn.document_id.clone(),
            user_id: turn.credential.user_id().to_string(),
        }
    }
}

/// Backend reached over HTTP with reqwest.
pub struct HttpBackend {
    client: reqwest::Client,
    config: RelayConfig,
}

impl HttpBackend {
    pub fn new(config: RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build backend client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait::async_trait]
impl InferenceBackend for HttpBackend {
    async fn open(&self, turn: &ChatTurnRequest) -> Result<ChunkStream, RelayError> {
        let url = self.config.chat_url();
        debug!(turn_id = %turn.turn_id, user_id = %turn.credential.user_id(), %url, "opening backend stream");

        let response = self
            .client
            .post(&url)
            .bearer_auth(turn.credential.bearer_token())
            .header(USER_ID_HEADER, turn.credential.user_id())
            .json(&BackendChatBody::from_turn(turn))
            .send()
            .await
            .map_err(|e| RelayError::backend(format!("Backend request failed: {e}"), None))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::backend(
                format!("Server responded with status: {}", status.as_u16()),
                Some(status.as_u16()),
            ));
        }

        let bytes_stream: ByteStream = Box::pin(response.bytes_stream());
        Ok(Box::pin(decoded_chunk_stream(bytes_stream)))
    }
}

/// Turns raw body reads into text chunks, one per read that decodes to text.
fn decoded_chunk_stream(
    bytes_stream: ByteStream,
) -> impl futures::Stream<Item = Result<BackendChunk, RelayError>> + Send {
    struct State {
        bytes_stream: ByteStream,
        decoder: Utf8ChunkDecoder,
    }

    stream::try_unfold(
        State {
            bytes_stream,
            decoder: Utf8ChunkDecoder::default(),
        },
        |mut state| async move {
            loop {
                match state.bytes_stream.next().await {
                    Some(Ok(bytes)) => {
                        if let Some(text) = state.decoder.push_chunk(&bytes)? {
                            return Ok(Some((BackendChunk::new(text), state)));
                        }
                    }
                    Some(Err(e)) => {
                        return Err(RelayError::interrupted(format!(
                            "Backend stream interrupted: {e}"
                        )));
                    }
                    None => {
                        let dangling = state.decoder.finish();
                        debug!(
                            skipped = state.decoder.skipped_bytes(),
                            dangling,
                            "backend body finished"
                        );
                        return Ok(None);
                    }
                }
            }
        },
    )
}
