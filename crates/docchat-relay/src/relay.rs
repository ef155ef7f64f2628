use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::StreamExt as _;
use tokio::sync::{mpsc, watch};
use tracing::{Instrument as _, debug, error, info, info_span, warn};

use crate::backend::{ChunkStream, HttpBackend, InferenceBackend};
use crate::config::RelayConfig;
use crate::errors::RelayError;
use crate::event::ClientEvent;
use crate::identity::Credential;
use crate::model::{BackendChunk, ChatTurnRequest, RelayOptions};

/// Handle that ends every in-flight and future turn of a relay.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Requests shutdown.
    ///
    /// Streams that already started emit one terminal error event; new turns
    /// fail with [`RelayError::Aborted`].
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Relays chat turns from a backend to browser-facing event streams.
#[derive(Clone)]
pub struct Relay {
    backend: Arc<dyn InferenceBackend>,
    options: RelayOptions,
    shutdown: ShutdownHandle,
}

impl Relay {
    pub fn builder() -> RelayBuilder {
        RelayBuilder::default()
    }

    /// Builds a relay over [`HttpBackend`] using the config's timeouts.
    pub fn http(config: RelayConfig) -> Result<Self, RelayError> {
        let options = config.options();
        Self::builder()
            .backend(Arc::new(HttpBackend::new(config)?))
            .first_byte_timeout(options.first_byte_timeout)
            .stream_buffer_capacity(options.stream_buffer_capacity)
            .allow_anonymous(options.allow_anonymous)
            .build()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Rejects anonymous callers unless the relay was built to forward them.
    pub fn admit(&self, credential: &Credential) -> Result<(), RelayError> {
        if credential.is_anonymous() && !self.options.allow_anonymous {
            return Err(RelayError::Unauthenticated);
        }
        Ok(())
    }

    /// Opens the backend and waits for its first chunk before committing to a
    /// stream.
    ///
    /// Every failure up to and including the first chunk is returned here, so
    /// the caller can still answer with an HTTP status. After `Ok`, failures
    /// arrive as a single terminal [`ClientEvent::Error`] on the stream.
    pub async fn start(&self, turn: ChatTurnRequest) -> Result<RelayStream, RelayError> {
        self.admit(&turn.credential)?;
        if turn.prompt.trim().is_empty() {
            return Err(RelayError::Validation("prompt must not be empty".into()));
        }
        if self.shutdown.is_triggered() {
            return Err(RelayError::Aborted);
        }

        let span = info_span!(
            "chat_turn",
            turn_id = %turn.turn_id,
            document_id = %turn.document_id
        );
        self.open_turn(turn).instrument(span).await
    }

    async fn open_turn(&self, turn: ChatTurnRequest) -> Result<RelayStream, RelayError> {
        let turn_id = turn.turn_id;
        let timeout = self.options.first_byte_timeout;
        info!(user_id = %turn.credential.user_id(), "starting chat relay");

        let opened = tokio::time::timeout(timeout, async {
            let mut chunks = self.backend.open(&turn).await?;
            let first = match chunks.next().await {
                Some(Ok(chunk)) => Some(chunk),
                Some(Err(err)) => return Err(err),
                None => None,
            };
            Ok((first, chunks))
        })
        .await;

        let (first, chunks) = match opened {
            Ok(Ok(opened)) => opened,
            Ok(Err(err)) => {
                warn!(error = %err, "backend failed before first chunk");
                return Err(err);
            }
            Err(_) => {
                warn!(?timeout, "backend missed first-byte timeout");
                return Err(RelayError::timeout(format!(
                    "Backend did not respond within {} ms",
                    timeout.as_millis()
                )));
            }
        };

        let (tx, rx) = mpsc::channel(self.options.stream_buffer_capacity);
        tokio::spawn(
            relay_task(first, chunks, tx, self.shutdown.tx.subscribe()).in_current_span(),
        );

        Ok(RelayStream { turn_id, rx })
    }
}

/// Builder for [`Relay`].
#[derive(Default)]
pub struct RelayBuilder {
    backend: Option<Arc<dyn InferenceBackend>>,
    options: RelayOptions,
}

impl RelayBuilder {
    pub fn backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn first_byte_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.options.first_byte_timeout = timeout;
        self
    }

    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.options.stream_buffer_capacity = capacity;
        self
    }

    /// Forward callers without a credential as the anonymous user.
    pub fn allow_anonymous(mut self, allow: bool) -> Self {
        self.options.allow_anonymous = allow;
        self
    }

    pub fn build(self) -> Result<Relay, RelayError> {
        let backend = self
            .backend
            .ok_or_else(|| RelayError::Config("relay requires an inference backend".into()))?;
        if self.options.stream_buffer_capacity == 0 {
            return Err(RelayError::Config(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        if self.options.first_byte_timeout.is_zero() {
            return Err(RelayError::Config(
                "first_byte_timeout must be greater than 0".into(),
            ));
        }
        let (tx, _rx) = watch::channel(false);
        Ok(Relay {
            backend,
            options: self.options,
            shutdown: ShutdownHandle { tx: Arc::new(tx) },
        })
    }
}

/// Ordered event stream for one chat turn.
///
/// Yields text events in backend order and ends after either the last text
/// event or a single error event. Dropping it cancels the turn and releases
/// the backend connection.
pub struct RelayStream {
    turn_id: uuid::Uuid,
    rx: mpsc::Receiver<ClientEvent>,
}

impl RelayStream {
    pub fn turn_id(&self) -> uuid::Uuid {
        self.turn_id
    }

    /// Waits for the next event; `None` once the stream is closed.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.rx.recv().await
    }

    /// Drains the stream into a list of events.
    pub async fn collect_events(mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        events
    }
}

impl futures::Stream for RelayStream {
    type Item = ClientEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Single writer of a turn's events: read one chunk, emit one event, repeat.
async fn relay_task(
    first: Option<BackendChunk>,
    mut chunks: ChunkStream,
    tx: mpsc::Sender<ClientEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    if *shutdown_rx.borrow_and_update() {
        let _ = tx.send(ClientEvent::Error(RelayError::Aborted.message())).await;
        return;
    }

    let mut seq = 0_u64;
    let mut watch_shutdown = true;
    if let Some(chunk) = first {
        debug!(seq, "relaying backend chunk");
        if tx.send(ClientEvent::Text(chunk.text)).await.is_err() {
            debug!("client disconnected; releasing backend stream");
            return;
        }
        seq += 1;
    }

    loop {
        tokio::select! {
            biased;
            _ = tx.closed() => {
                debug!(seq, "client disconnected; releasing backend stream");
                return;
            }
            changed = shutdown_rx.changed(), if watch_shutdown => {
                match changed {
                    Ok(()) if *shutdown_rx.borrow() => {
                        warn!(seq, "relay shutting down; ending stream");
                        let _ = tx.send(ClientEvent::Error(RelayError::Aborted.message())).await;
                        return;
                    }
                    Ok(()) => {}
                    // Relay dropped; its handle can no longer fire.
                    Err(_) => watch_shutdown = false,
                }
            }
            next = chunks.next() => {
                match next {
                    Some(Ok(chunk)) => {
                        debug!(seq, "relaying backend chunk");
                        if tx.send(ClientEvent::Text(chunk.text)).await.is_err() {
                            debug!(seq, "client disconnected; releasing backend stream");
                            return;
                        }
                        seq += 1;
                    }
                    Some(Err(err)) => {
                        error!(seq, error = %err, "backend stream failed after start");
                        let _ = tx.send(ClientEvent::Error(err.message())).await;
                        return;
                    }
                    None => {
                        info!(chunks = seq, "chat relay completed");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Credential;
    use futures::stream;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    enum FakeBehavior {
        OpenError(RelayError),
        Chunks(Vec<Result<BackendChunk, RelayError>>),
        /// Yields the chunks, then never ends.
        ChunksThenPending(Vec<&'static str>),
        NeverResponds,
    }

    struct FakeBackend {
        behavior: FakeBehavior,
        opens: Arc<AtomicUsize>,
        reads: Arc<AtomicUsize>,
        dropped: Arc<AtomicBool>,
    }

    impl FakeBackend {
        fn new(behavior: FakeBehavior) -> Self {
            Self {
                behavior,
                opens: Arc::new(AtomicUsize::new(0)),
                reads: Arc::new(AtomicUsize::new(0)),
                dropped: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl InferenceBackend for FakeBackend {
        async fn open(&self, _turn: &ChatTurnRequest) -> Result<ChunkStream, RelayError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                FakeBehavior::OpenError(err) => Err(err.clone()),
                FakeBehavior::Chunks(items) => Ok(Box::pin(stream::iter(items.clone()))),
                FakeBehavior::ChunksThenPending(texts) => {
                    let guard = DropFlag(self.dropped.clone());
                    let reads = self.reads.clone();
                    let items: Vec<Result<BackendChunk, RelayError>> =
                        texts.iter().map(|t| Ok(BackendChunk::new(*t))).collect();
                    let counted = stream::iter(items)
                        .chain(stream::pending())
                        .inspect(move |_| {
                            reads.fetch_add(1, Ordering::SeqCst);
                        })
                        .map(move |item| {
                            let _ = &guard;
                            item
                        });
                    Ok(Box::pin(counted))
                }
                FakeBehavior::NeverResponds => {
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    fn relay_with(backend: FakeBackend) -> Relay {
        Relay::builder()
            .backend(Arc::new(backend))
            .first_byte_timeout(Duration::from_millis(200))
            .build()
            .expect("relay")
    }

    fn turn() -> ChatTurnRequest {
        ChatTurnRequest::new("Summarize page 1", "doc-1", Credential::new("user-1", "tok"))
    }

    fn ok_chunks(texts: &[&str]) -> Vec<Result<BackendChunk, RelayError>> {
        texts.iter().map(|t| Ok(BackendChunk::new(*t))).collect()
    }

    #[tokio::test]
    async fn relays_every_chunk_in_order_then_closes() {
        let relay = relay_with(FakeBackend::new(FakeBehavior::Chunks(ok_chunks(&[
            "The ",
            "report ",
            "shows growth.",
        ]))));
        let events = relay.start(turn()).await.expect("start").collect_events().await;
        assert_eq!(
            events,
            vec![
                ClientEvent::Text("The ".into()),
                ClientEvent::Text("report ".into()),
                ClientEvent::Text("shows growth.".into()),
            ]
        );
    }

    #[tokio::test]
    async fn mid_stream_failure_yields_exactly_one_terminal_error() {
        let mut items = ok_chunks(&["a", "b"]);
        items.push(Err(RelayError::interrupted("connection reset")));
        items.push(Ok(BackendChunk::new("never")));
        let relay = relay_with(FakeBackend::new(FakeBehavior::Chunks(items)));

        let events = relay.start(turn()).await.expect("start").collect_events().await;
        assert_eq!(
            events,
            vec![
                ClientEvent::Text("a".into()),
                ClientEvent::Text("b".into()),
                ClientEvent::Error("connection reset".into()),
            ]
        );
    }

    #[tokio::test]
    async fn non_success_status_fails_before_stream_start() {
        let backend = FakeBackend::new(FakeBehavior::OpenError(RelayError::backend(
            "Server responded with status: 500",
            Some(500),
        )));
        let relay = relay_with(backend);
        let err = match relay.start(turn()).await {
            Ok(_) => panic!("expected start failure"),
            Err(err) => err,
        };
        assert_eq!(err.message(), "Server responded with status: 500");
    }

    #[tokio::test]
    async fn failure_before_first_chunk_is_a_start_error() {
        let relay = relay_with(FakeBackend::new(FakeBehavior::Chunks(vec![Err(
            RelayError::interrupted("reset"),
        )])));
        assert!(matches!(
            relay.start(turn()).await,
            Err(RelayError::TransportInterrupted { .. })
        ));
    }

    #[tokio::test]
    async fn empty_backend_body_closes_without_events() {
        let relay = relay_with(FakeBackend::new(FakeBehavior::Chunks(vec![])));
        let events = relay.start(turn()).await.expect("start").collect_events().await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn silent_backend_hits_first_byte_timeout() {
        let relay = relay_with(FakeBackend::new(FakeBehavior::NeverResponds));
        let err = match relay.start(turn()).await {
            Ok(_) => panic!("expected timeout"),
            Err(err) => err,
        };
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn blank_prompt_is_rejected_without_opening_backend() {
        let backend = FakeBackend::new(FakeBehavior::Chunks(vec![]));
        let opens = backend.opens.clone();
        let relay = relay_with(backend);
        let turn = ChatTurnRequest::new("  ", "doc", Credential::new("u", "t"));
        assert!(matches!(
            relay.start(turn).await,
            Err(RelayError::Validation(_))
        ));
        assert_eq!(opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dropping_the_stream_releases_the_backend() {
        let backend = FakeBackend::new(FakeBehavior::ChunksThenPending(vec!["one ", "two "]));
        let dropped = backend.dropped.clone();
        let reads = backend.reads.clone();
        let relay = relay_with(backend);

        let mut stream = relay.start(turn()).await.expect("start");
        assert_eq!(stream.next_event().await, Some(ClientEvent::Text("one ".into())));
        drop(stream);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !dropped.load(Ordering::SeqCst) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "backend stream was not released"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(reads.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn shutdown_ends_open_streams_with_one_error() {
        let relay = relay_with(FakeBackend::new(FakeBehavior::ChunksThenPending(vec![
            "partial ",
        ])));
        let mut stream = relay.start(turn()).await.expect("start");
        assert_eq!(
            stream.next_event().await,
            Some(ClientEvent::Text("partial ".into()))
        );

        relay.shutdown_handle().trigger();
        assert_eq!(
            stream.next_event().await,
            Some(ClientEvent::Error("Relay is shutting down".into()))
        );
        assert_eq!(stream.next_event().await, None);
        assert!(matches!(relay.start(turn()).await, Err(RelayError::Aborted)));
    }

    #[tokio::test]
    async fn anonymous_caller_is_rejected_without_opening_backend() {
        let backend = FakeBackend::new(FakeBehavior::Chunks(ok_chunks(&["hi"])));
        let opens = backend.opens.clone();
        let relay = relay_with(backend);
        let turn = ChatTurnRequest::new("Summarize", "doc", Credential::anonymous());
        assert!(matches!(
            relay.start(turn).await,
            Err(RelayError::Unauthenticated)
        ));
        assert!(relay.admit(&Credential::new("user-1", "")).is_err());
        assert_eq!(opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn anonymous_caller_is_forwarded_when_allowed() {
        let relay = Relay::builder()
            .backend(Arc::new(FakeBackend::new(FakeBehavior::Chunks(ok_chunks(&[
                "hi",
            ])))))
            .allow_anonymous(true)
            .build()
            .expect("relay");
        let turn = ChatTurnRequest::new("Summarize", "doc", Credential::anonymous());
        let events = relay.start(turn).await.expect("start").collect_events().await;
        assert_eq!(events, vec![ClientEvent::Text("hi".into())]);
    }

    #[test]
    fn builder_requires_backend_and_positive_capacity() {
        assert!(matches!(
            Relay::builder().build(),
            Err(RelayError::Config(_))
        ));
        let result = Relay::builder()
            .backend(Arc::new(FakeBackend::new(FakeBehavior::Chunks(vec![]))))
            .stream_buffer_capacity(0)
            .build();
        assert!(matches!(result, Err(RelayError::Config(_))));
    }
}
