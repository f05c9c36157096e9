//! The consumer side of a chat: drives one turn at a time from a transport
//! through the decoder and reducer, publishing snapshots as frames land.

use crate::codec::{Decoded, FrameDecoder};
use crate::config::SessionOptions;
use crate::error::{StreamError, StreamResult};
use crate::protocol::ChatRequest;
use crate::reducer::{Notice, SessionState, TurnPhase};
use crate::tools::ToolRegistry;
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info};

pub type ByteStream = BoxStream<'static, StreamResult<Vec<u8>>>;

/// Opens the byte stream for one turn: the in-process mock backend or an
/// HTTP connection.
pub trait TurnTransport: Send + Sync {
    fn open(&self, request: ChatRequest) -> BoxFuture<'static, StreamResult<ByteStream>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Finished,
    Cancelled,
    Failed,
}

pub struct ChatSession {
    transport: Arc<dyn TurnTransport>,
    options: SessionOptions,
    state: Arc<watch::Sender<SessionState>>,
    notices: broadcast::Sender<Notice>,
    running: Arc<Mutex<bool>>,
    cancel: Mutex<Option<oneshot::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<TurnOutcome>>>,
}

impl ChatSession {
    pub fn new(
        transport: Arc<dyn TurnTransport>,
        options: SessionOptions,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::new(registry));
        let (notices, _) = broadcast::channel(64);
        Self {
            transport,
            options,
            state: Arc::new(state),
            notices,
            running: Arc::new(Mutex::new(false)),
            cancel: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Snapshots as a stream; intermediate states may be skipped when the
    /// reader is slower than the turn.
    pub fn updates(&self) -> WatchStream<SessionState> {
        WatchStream::new(self.state.subscribe())
    }

    /// One-shot notices (parse errors, ordering problems, aborted streams).
    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Records the user message and starts streaming the answer.
    pub async fn submit_user_turn(&self, request: ChatRequest) -> StreamResult<()> {
        {
            let mut running = self.running.lock().await;
            if *running {
                return Err(StreamError::TurnInProgress);
            }
            *running = true;
        }

        let mut state = self.snapshot();
        state.push_user_message(&request.message, &request.attachments);
        state.await_turn();
        self.state.send_replace(state.clone());

        let (cancel_tx, cancel_rx) = oneshot::channel();
        *self.cancel.lock().await = Some(cancel_tx);

        let turn = Turn {
            transport: Arc::clone(&self.transport),
            max_silence: self.options.max_silence,
            publisher: Arc::clone(&self.state),
            notices: self.notices.clone(),
        };
        let running = Arc::clone(&self.running);
        let handle = tokio::spawn(async move {
            let outcome = turn.run(request, state, cancel_rx).await;
            *running.lock().await = false;
            outcome
        });
        *self.handle.lock().await = Some(handle);

        Ok(())
    }

    /// Stops the active turn. Returns false when there was nothing to stop.
    pub async fn cancel_turn(&self) -> bool {
        match self.cancel.lock().await.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Waits for the most recently submitted turn to end.
    pub async fn wait(&self) -> Option<TurnOutcome> {
        let handle = self.handle.lock().await.take()?;
        handle.await.ok()
    }
}

struct Turn {
    transport: Arc<dyn TurnTransport>,
    max_silence: Duration,
    publisher: Arc<watch::Sender<SessionState>>,
    notices: broadcast::Sender<Notice>,
}

impl Turn {
    async fn run(
        &self,
        request: ChatRequest,
        mut state: SessionState,
        mut cancel: oneshot::Receiver<()>,
    ) -> TurnOutcome {
        let opened = tokio::select! {
            biased;
            _ = &mut cancel => {
                debug!("turn cancelled before the stream opened");
                state.cancel();
                return self.finish(state, TurnOutcome::Cancelled);
            }
            opened = tokio::time::timeout(self.max_silence, self.transport.open(request)) => opened,
        };

        let mut stream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                state.fail(&err);
                return self.finish(state, TurnOutcome::Failed);
            }
            Err(_) => {
                state.fail(&StreamError::Timeout(self.max_silence));
                return self.finish(state, TurnOutcome::Failed);
            }
        };

        let mut decoder = FrameDecoder::new();
        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = &mut cancel => {
                    info!("turn cancelled");
                    state.cancel();
                    break TurnOutcome::Cancelled;
                }
                next = tokio::time::timeout(self.max_silence, stream.next()) => next,
            };

            match next {
                Err(_) => {
                    state.fail(&StreamError::Timeout(self.max_silence));
                    break TurnOutcome::Failed;
                }
                Ok(Some(Err(err))) => {
                    state.fail(&err);
                    break TurnOutcome::Failed;
                }
                Ok(Some(Ok(chunk))) => {
                    let mut done = false;
                    for item in decoder.push(&chunk) {
                        done |= matches!(item, Ok(Decoded::Done));
                        state.apply(item);
                    }
                    self.publish(&mut state);
                    if done {
                        break outcome_of(&state);
                    }
                }
                Ok(None) => {
                    if let Some(item) = decoder.finish() {
                        state.apply(item);
                    }
                    state.end_of_stream();
                    break outcome_of(&state);
                }
            }
        };

        // Dropping the stream closes the producer side.
        drop(stream);
        self.finish(state, outcome)
    }

    fn finish(&self, mut state: SessionState, outcome: TurnOutcome) -> TurnOutcome {
        self.publish(&mut state);
        debug!(?outcome, "turn ended");
        outcome
    }

    fn publish(&self, state: &mut SessionState) {
        for notice in state.take_notices() {
            let _ = self.notices.send(notice);
        }
        self.publisher.send_replace(state.clone());
    }
}

fn outcome_of(state: &SessionState) -> TurnOutcome {
    match state.phase() {
        TurnPhase::Finished => TurnOutcome::Finished,
        TurnPhase::Failed => TurnOutcome::Failed,
        _ => TurnOutcome::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::codec::encode;
    use crate::config::StreamTiming;
    use crate::producer::Producer;
    use crate::protocol::{Frame, MessageMetadata, ResponseConfig};
    use crate::reducer::{NoticeKind, Role};
    use crate::store::KnowledgeStore;
    use std::collections::VecDeque;
    use tokio::time::timeout;

    struct ScriptedTransport {
        chunks: Vec<Vec<u8>>,
        hang: bool,
    }

    impl TurnTransport for ScriptedTransport {
        fn open(&self, _request: ChatRequest) -> BoxFuture<'static, StreamResult<ByteStream>> {
            let chunks = self.chunks.clone();
            let hang = self.hang;
            Box::pin(async move {
                let head = futures::stream::iter(chunks.into_iter().map(Ok));
                let stream: ByteStream = if hang {
                    head.chain(futures::stream::pending()).boxed()
                } else {
                    head.boxed()
                };
                Ok(stream)
            })
        }
    }

    /// Hands out one scripted stream per turn, in order.
    struct QueuedTransport {
        turns: std::sync::Mutex<VecDeque<Vec<Vec<u8>>>>,
    }

    impl QueuedTransport {
        fn new(turns: Vec<Vec<Vec<u8>>>) -> Self {
            Self {
                turns: std::sync::Mutex::new(turns.into()),
            }
        }
    }

    impl TurnTransport for QueuedTransport {
        fn open(&self, _request: ChatRequest) -> BoxFuture<'static, StreamResult<ByteStream>> {
            let chunks = self.turns.lock().unwrap().pop_front().unwrap_or_default();
            Box::pin(async move {
                let stream: ByteStream = futures::stream::iter(chunks.into_iter().map(Ok)).boxed();
                Ok(stream)
            })
        }
    }

    struct BrokenTransport;

    impl TurnTransport for BrokenTransport {
        fn open(&self, _request: ChatRequest) -> BoxFuture<'static, StreamResult<ByteStream>> {
            Box::pin(async { Err(StreamError::Transport("connection refused".to_string())) })
        }
    }

    fn session(transport: impl TurnTransport + 'static, max_silence: Duration) -> ChatSession {
        ChatSession::new(
            Arc::new(transport),
            SessionOptions { max_silence },
            Arc::new(ToolRegistry::builtin()),
        )
    }

    fn partial_turn() -> Vec<Vec<u8>> {
        [
            Frame::Start {
                message_metadata: MessageMetadata { created_at: 1 },
            },
            Frame::TextStart {
                id: "m".to_string(),
            },
            Frame::TextDelta {
                id: "m".to_string(),
                delta: "Hel".to_string(),
            },
        ]
        .iter()
        .map(|frame| encode(frame).unwrap().into_bytes())
        .collect()
    }

    #[tokio::test]
    async fn local_turn_runs_to_completion() {
        let backend = MockBackend::new(Arc::new(KnowledgeStore::sample()), StreamTiming::instant());
        let session = session(backend, Duration::from_secs(5));

        session
            .submit_user_turn(ChatRequest::new("search pricing"))
            .await
            .unwrap();
        assert_eq!(session.wait().await, Some(TurnOutcome::Finished));

        let state = session.snapshot();
        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.messages()[0].role, Role::User);
        assert_eq!(state.messages()[0].text(), "search pricing");
        let answer = &state.messages()[1];
        assert_eq!(answer.tool_calls().count(), 1);
        assert!(answer.text().contains("pricing"));

        session
            .submit_user_turn(ChatRequest::new("hello again"))
            .await
            .unwrap();
        assert_eq!(session.wait().await, Some(TurnOutcome::Finished));
        assert_eq!(session.snapshot().messages().len(), 4);
    }

    #[tokio::test]
    async fn chunked_delivery_matches_whole_delivery() {
        let config = ResponseConfig::Text {
            text: "Streaming über kleine Stücke".to_string(),
        };
        let mut wire = Vec::new();
        Producer::new(StreamTiming::instant())
            .produce(&config, &mut wire)
            .await
            .unwrap();

        let chunks: Vec<Vec<u8>> = wire.chunks(3).map(|chunk| chunk.to_vec()).collect();
        let session = session(
            ScriptedTransport {
                chunks,
                hang: false,
            },
            Duration::from_secs(5),
        );
        session.submit_user_turn(ChatRequest::new("go")).await.unwrap();

        assert_eq!(session.wait().await, Some(TurnOutcome::Finished));
        let state = session.snapshot();
        assert_eq!(
            state.current_message().unwrap().text(),
            "Streaming über kleine Stücke"
        );
    }

    #[tokio::test]
    async fn cancel_keeps_partial_text() {
        let session = session(
            ScriptedTransport {
                chunks: partial_turn(),
                hang: true,
            },
            Duration::from_secs(30),
        );
        let mut updates = session.subscribe();

        session.submit_user_turn(ChatRequest::new("go")).await.unwrap();
        timeout(
            Duration::from_secs(5),
            updates.wait_for(|state| {
                state
                    .current_message()
                    .is_some_and(|message| message.text() == "Hel")
            }),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(session.cancel_turn().await);
        assert_eq!(session.wait().await, Some(TurnOutcome::Cancelled));

        let state = session.snapshot();
        assert_eq!(state.phase(), TurnPhase::Cancelled);
        assert_eq!(state.current_message().unwrap().text(), "Hel");
        assert!(!session.cancel_turn().await);
    }

    #[tokio::test]
    async fn second_submit_while_running_is_rejected() {
        let session = session(
            ScriptedTransport {
                chunks: partial_turn(),
                hang: true,
            },
            Duration::from_secs(30),
        );

        session.submit_user_turn(ChatRequest::new("one")).await.unwrap();
        assert!(matches!(
            session.submit_user_turn(ChatRequest::new("two")).await,
            Err(StreamError::TurnInProgress)
        ));

        session.cancel_turn().await;
        session.wait().await;
        session.submit_user_turn(ChatRequest::new("three")).await.unwrap();
        session.cancel_turn().await;
        assert_eq!(session.wait().await, Some(TurnOutcome::Cancelled));
    }

    #[tokio::test]
    async fn silence_fails_the_turn_with_timeout() {
        let session = session(
            ScriptedTransport {
                chunks: partial_turn(),
                hang: true,
            },
            Duration::from_millis(50),
        );
        let mut notices = session.subscribe_notices();

        session.submit_user_turn(ChatRequest::new("go")).await.unwrap();
        assert_eq!(session.wait().await, Some(TurnOutcome::Failed));

        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.kind, NoticeKind::Timeout);
        let state = session.snapshot();
        assert_eq!(state.phase(), TurnPhase::Failed);
        assert_eq!(state.current_message().unwrap().text(), "Hel");
    }

    #[tokio::test]
    async fn early_end_of_stream_is_cancelled_not_failed() {
        let session = session(
            ScriptedTransport {
                chunks: partial_turn(),
                hang: false,
            },
            Duration::from_secs(5),
        );
        let mut notices = session.subscribe_notices();

        session.submit_user_turn(ChatRequest::new("go")).await.unwrap();
        assert_eq!(session.wait().await, Some(TurnOutcome::Cancelled));
        assert_eq!(notices.recv().await.unwrap().kind, NoticeKind::StreamAborted);
    }

    #[tokio::test]
    async fn transport_errors_are_retryable_failures() {
        let session = session(BrokenTransport, Duration::from_secs(5));
        let mut notices = session.subscribe_notices();

        session.submit_user_turn(ChatRequest::new("go")).await.unwrap();
        assert_eq!(session.wait().await, Some(TurnOutcome::Failed));
        assert_eq!(notices.recv().await.unwrap().kind, NoticeKind::Transport);
        assert_eq!(session.snapshot().messages().len(), 1);
    }

    async fn full_turn() -> Vec<Vec<u8>> {
        let mut wire = Vec::new();
        Producer::new(StreamTiming::instant())
            .produce(
                &ResponseConfig::Text {
                    text: "first answer".to_string(),
                },
                &mut wire,
            )
            .await
            .unwrap();
        vec![wire]
    }

    #[tokio::test]
    async fn empty_stream_on_first_turn_is_aborted() {
        let session = session(QueuedTransport::new(vec![Vec::new()]), Duration::from_secs(5));
        let mut notices = session.subscribe_notices();

        session.submit_user_turn(ChatRequest::new("go")).await.unwrap();
        assert_eq!(session.wait().await, Some(TurnOutcome::Cancelled));
        assert_eq!(session.snapshot().phase(), TurnPhase::Cancelled);
        assert_eq!(notices.recv().await.unwrap().kind, NoticeKind::StreamAborted);
    }

    #[tokio::test]
    async fn empty_stream_after_finished_turn_is_aborted() {
        let session = session(
            QueuedTransport::new(vec![full_turn().await, Vec::new()]),
            Duration::from_secs(5),
        );
        let mut notices = session.subscribe_notices();

        session.submit_user_turn(ChatRequest::new("one")).await.unwrap();
        assert_eq!(session.wait().await, Some(TurnOutcome::Finished));
        assert_eq!(session.snapshot().phase(), TurnPhase::Finished);

        session.submit_user_turn(ChatRequest::new("two")).await.unwrap();
        assert_eq!(session.wait().await, Some(TurnOutcome::Cancelled));

        let state = session.snapshot();
        assert_eq!(state.phase(), TurnPhase::Cancelled);
        assert_eq!(state.messages().len(), 3);
        assert_eq!(state.messages()[1].text(), "first answer");
        assert_eq!(notices.recv().await.unwrap().kind, NoticeKind::StreamAborted);
    }

    #[tokio::test]
    async fn cancel_before_start_marks_the_turn_cancelled() {
        let session = session(
            ScriptedTransport {
                chunks: Vec::new(),
                hang: true,
            },
            Duration::from_secs(30),
        );

        session.submit_user_turn(ChatRequest::new("go")).await.unwrap();
        assert_eq!(session.snapshot().phase(), TurnPhase::Awaiting);
        assert!(session.cancel_turn().await);
        assert_eq!(session.wait().await, Some(TurnOutcome::Cancelled));

        let state = session.snapshot();
        assert_eq!(state.phase(), TurnPhase::Cancelled);
        assert!(state.current_message().is_none());
    }
}
