use crate::config::StreamTiming;
use crate::error::StreamError;
use crate::producer::{ChannelSink, Producer};
use crate::protocol::{ChatRequest, ResponseConfig};
use crate::scenario::select_response;
use crate::session::{ByteStream, TurnTransport};
use crate::store::KnowledgeStore;
use futures::StreamExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

/// The simulated chat backend: picks a canned response and streams it from
/// a background producer task.
#[derive(Clone)]
pub struct MockBackend {
    store: Arc<KnowledgeStore>,
    timing: StreamTiming,
}

impl MockBackend {
    pub fn new(store: Arc<KnowledgeStore>, timing: StreamTiming) -> Self {
        Self { store, timing }
    }

    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    pub async fn response_for(&self, request: &ChatRequest) -> ResponseConfig {
        match &request.response {
            Some(config) => config.clone(),
            None => select_response(&request.message, &self.store).await,
        }
    }

    /// Starts producing `config`. Dropping the returned stream closes the
    /// producer's sink, which stops it at its next write.
    pub fn stream(&self, config: ResponseConfig) -> UnboundedReceiverStream<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let producer = Producer::new(self.timing.clone());

        tokio::spawn(async move {
            let mut sink = ChannelSink::new(tx);
            match producer.produce(&config, &mut sink).await {
                Ok(()) => {}
                Err(StreamError::SinkClosed) => debug!("consumer went away; producer stopped"),
                Err(err) => warn!(%err, "producer failed"),
            }
        });

        UnboundedReceiverStream::new(rx)
    }
}

impl TurnTransport for MockBackend {
    fn open(&self, request: ChatRequest) -> BoxFuture<'static, Result<ByteStream, StreamError>> {
        let backend = self.clone();
        Box::pin(async move {
            let config = backend.response_for(&request).await;
            info!(response = kind_of(&config), "streaming mock response");
            let stream: ByteStream = backend
                .stream(config)
                .map(|chunk| Ok(chunk.into_bytes()))
                .boxed();
            Ok(stream)
        })
    }
}

pub(crate) fn kind_of(config: &ResponseConfig) -> &'static str {
    match config {
        ResponseConfig::Text { .. } => "text",
        ResponseConfig::RagSuccess { .. } => "rag-success",
        ResponseConfig::RagError { .. } => "rag-error",
        ResponseConfig::Artifact { .. } => "artifact",
    }
}
