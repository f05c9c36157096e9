//! Mock backend side of the chat stream: turns a [`ResponseConfig`] into the
//! ordered frame sequence a real model backend would send.

use crate::codec;
use crate::config::{StreamTiming, pause};
use crate::error::{StreamError, StreamResult};
use crate::protocol::{ArtifactData, ArtifactKind, Frame, MessageMetadata, ResponseConfig};
use crate::tools::{KNOWLEDGE_SEARCH, KnowledgeSearchInput};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Destination for encoded frames. Writes never block.
pub trait FrameSink {
    fn write(&mut self, chunk: String) -> StreamResult<()>;
    fn close(&mut self);
}

/// Sink backed by an unbounded channel; the receiving half is the byte
/// stream handed to the consumer or the HTTP body.
pub struct ChannelSink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx: Some(tx) }
    }
}

impl FrameSink for ChannelSink {
    fn write(&mut self, chunk: String) -> StreamResult<()> {
        match &self.tx {
            Some(tx) => tx.send(chunk).map_err(|_| StreamError::SinkClosed),
            None => Err(StreamError::SinkClosed),
        }
    }

    fn close(&mut self) {
        self.tx.take();
    }
}

impl FrameSink for Vec<u8> {
    fn write(&mut self, chunk: String) -> StreamResult<()> {
        self.extend_from_slice(chunk.as_bytes());
        Ok(())
    }

    fn close(&mut self) {}
}

pub struct Producer {
    timing: StreamTiming,
}

impl Producer {
    pub fn new(timing: StreamTiming) -> Self {
        Self { timing }
    }

    /// Writes the whole turn for `config` and closes the sink, also when
    /// production stops early.
    pub async fn produce<S: FrameSink>(
        &self,
        config: &ResponseConfig,
        sink: &mut S,
    ) -> StreamResult<()> {
        let result = self.write_turn(config, sink).await;
        sink.close();
        result
    }

    async fn write_turn<S: FrameSink>(
        &self,
        config: &ResponseConfig,
        sink: &mut S,
    ) -> StreamResult<()> {
        pause(self.timing.initial).await;
        emit(
            sink,
            &Frame::Start {
                message_metadata: MessageMetadata {
                    created_at: chrono::Utc::now().timestamp_millis(),
                },
            },
        )?;

        match config {
            ResponseConfig::Text { .. } => {}
            ResponseConfig::RagSuccess { rag_data, .. } => {
                let output = serde_json::to_value(&rag_data.documents)?;
                self.write_tool_call(sink, &rag_data.query, output).await?;
            }
            ResponseConfig::RagError {
                query, rag_error, ..
            } => {
                // The call itself completes; the failure travels in the output.
                let output = json!({ "error": rag_error });
                self.write_tool_call(sink, query, output).await?;
            }
            ResponseConfig::Artifact { artifact_data, .. } => {
                self.write_artifact(sink, artifact_data).await?;
            }
        }

        pause(self.timing.phase).await;
        self.write_text(sink, config.text()).await?;

        pause(self.timing.phase).await;
        emit(sink, &Frame::FinishStep)?;
        emit(sink, &Frame::Finish)?;
        sink.write(codec::encode_done())?;
        debug!("turn complete");
        Ok(())
    }

    async fn write_tool_call<S: FrameSink>(
        &self,
        sink: &mut S,
        query: &str,
        output: serde_json::Value,
    ) -> StreamResult<()> {
        let tool_call_id = format!("call_{}", Uuid::new_v4().simple());
        debug!(%tool_call_id, tool = KNOWLEDGE_SEARCH, "streaming tool call");

        emit(
            sink,
            &Frame::ToolInputStart {
                tool_call_id: tool_call_id.clone(),
                tool_name: KNOWLEDGE_SEARCH.to_string(),
            },
        )?;
        let input = serde_json::to_value(KnowledgeSearchInput {
            query: query.to_string(),
            limit: None,
        })?;
        emit(
            sink,
            &Frame::ToolInputAvailable {
                tool_call_id: tool_call_id.clone(),
                input,
            },
        )?;

        pause(self.timing.tool).await;
        emit(
            sink,
            &Frame::ToolOutputAvailable {
                tool_call_id,
                output,
            },
        )?;
        emit(sink, &Frame::FinishStep)
    }

    async fn write_artifact<S: FrameSink>(
        &self,
        sink: &mut S,
        artifact: &ArtifactData,
    ) -> StreamResult<()> {
        let id = Uuid::new_v4().to_string();
        debug!(artifact_id = %id, kind = artifact.kind.as_str(), "streaming artifact");

        emit(sink, &Frame::DataId { data: id })?;
        emit(
            sink,
            &Frame::DataTitle {
                data: artifact.title.clone(),
            },
        )?;
        emit(
            sink,
            &Frame::DataKind {
                data: artifact.kind,
            },
        )?;
        if let Some(language) = &artifact.language {
            emit(
                sink,
                &Frame::DataLanguage {
                    data: language.clone(),
                },
            )?;
        }

        for (idx, line) in artifact.content.split('\n').enumerate() {
            if idx > 0 {
                pause(self.timing.line).await;
            }
            let data = line.to_string();
            let frame = if artifact.kind == ArtifactKind::Code {
                Frame::DataCodeDelta { data }
            } else {
                Frame::DataTextDelta { data }
            };
            emit(sink, &frame)?;
        }

        emit(sink, &Frame::DataFinish)
    }

    async fn write_text<S: FrameSink>(&self, sink: &mut S, text: &str) -> StreamResult<()> {
        let id = format!("msg_{}", Uuid::new_v4().simple());
        emit(sink, &Frame::TextStart { id: id.clone() })?;

        for (idx, delta) in word_deltas(text).into_iter().enumerate() {
            if idx > 0 {
                pause(self.timing.word).await;
            }
            emit(
                sink,
                &Frame::TextDelta {
                    id: id.clone(),
                    delta: delta.to_string(),
                },
            )?;
        }

        emit(sink, &Frame::TextEnd { id })
    }
}

fn emit<S: FrameSink>(sink: &mut S, frame: &Frame) -> StreamResult<()> {
    sink.write(codec::encode(frame)?)
}

/// Splits `text` into word deltas. Each word after the first carries the
/// whitespace that preceded it, so the deltas concatenate back to `text`.
/// Always yields at least one delta.
pub fn word_deltas(text: &str) -> Vec<&str> {
    let mut deltas = Vec::new();
    let mut start = 0;
    let mut in_word = false;

    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if in_word {
                deltas.push(&text[start..idx]);
                start = idx;
                in_word = false;
            }
        } else {
            in_word = true;
        }
    }

    if start < text.len() || deltas.is_empty() {
        deltas.push(&text[start..]);
    }
    deltas
}
