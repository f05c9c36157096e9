use serde::{Deserialize, Serialize};

/// Marker header advertising which frame protocol a chat stream speaks.
pub const STREAM_PROTOCOL_HEADER: &str = "x-vercel-ai-ui-message-stream";
pub const STREAM_PROTOCOL_VERSION: &str = "v1";

/// One event on the wire, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    #[serde(rename = "start", rename_all = "camelCase")]
    Start { message_metadata: MessageMetadata },
    #[serde(rename = "text-start")]
    TextStart { id: String },
    #[serde(rename = "text-delta")]
    TextDelta { id: String, delta: String },
    #[serde(rename = "text-end")]
    TextEnd { id: String },
    #[serde(rename = "tool-input-start", rename_all = "camelCase")]
    ToolInputStart {
        tool_call_id: String,
        tool_name: String,
    },
    #[serde(rename = "tool-input-available", rename_all = "camelCase")]
    ToolInputAvailable {
        tool_call_id: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool-output-available", rename_all = "camelCase")]
    ToolOutputAvailable {
        tool_call_id: String,
        output: serde_json::Value,
    },
    #[serde(rename = "tool-output-error", rename_all = "camelCase")]
    ToolOutputError {
        tool_call_id: String,
        error_text: String,
    },
    #[serde(rename = "data-id")]
    DataId { data: String },
    #[serde(rename = "data-title")]
    DataTitle { data: String },
    #[serde(rename = "data-kind")]
    DataKind { data: ArtifactKind },
    #[serde(rename = "data-language")]
    DataLanguage { data: String },
    #[serde(rename = "data-codeDelta")]
    DataCodeDelta { data: String },
    #[serde(rename = "data-textDelta")]
    DataTextDelta { data: String },
    #[serde(rename = "data-finish")]
    DataFinish,
    #[serde(rename = "finish-step")]
    FinishStep,
    #[serde(rename = "finish")]
    Finish,
    #[serde(rename = "error", rename_all = "camelCase")]
    Error { error_text: String },
}

impl Frame {
    /// The `type` discriminant as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Start { .. } => "start",
            Frame::TextStart { .. } => "text-start",
            Frame::TextDelta { .. } => "text-delta",
            Frame::TextEnd { .. } => "text-end",
            Frame::ToolInputStart { .. } => "tool-input-start",
            Frame::ToolInputAvailable { .. } => "tool-input-available",
            Frame::ToolOutputAvailable { .. } => "tool-output-available",
            Frame::ToolOutputError { .. } => "tool-output-error",
            Frame::DataId { .. } => "data-id",
            Frame::DataTitle { .. } => "data-title",
            Frame::DataKind { .. } => "data-kind",
            Frame::DataLanguage { .. } => "data-language",
            Frame::DataCodeDelta { .. } => "data-codeDelta",
            Frame::DataTextDelta { .. } => "data-textDelta",
            Frame::DataFinish => "data-finish",
            Frame::FinishStep => "finish-step",
            Frame::Finish => "finish",
            Frame::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    #[default]
    Text,
    Code,
    Image,
    Spreadsheet,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Text => "text",
            ArtifactKind::Code => "code",
            ArtifactKind::Image => "image",
            ArtifactKind::Spreadsheet => "spreadsheet",
        }
    }
}

/// Canned answer the mock backend streams back for one user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ResponseConfig {
    Text {
        text: String,
    },
    RagSuccess {
        text: String,
        #[serde(rename = "ragData")]
        rag_data: RagData,
    },
    RagError {
        text: String,
        #[serde(default)]
        query: String,
        #[serde(rename = "ragError")]
        rag_error: String,
    },
    Artifact {
        text: String,
        #[serde(rename = "artifactData")]
        artifact_data: ArtifactData,
    },
}

impl ResponseConfig {
    pub fn text(&self) -> &str {
        match self {
            ResponseConfig::Text { text }
            | ResponseConfig::RagSuccess { text, .. }
            | ResponseConfig::RagError { text, .. }
            | ResponseConfig::Artifact { text, .. } => text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagData {
    pub query: String,
    pub documents: Vec<RetrievedDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub id: String,
    pub title: String,
    pub content: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactData {
    pub title: String,
    pub kind: ArtifactKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttachment {
    pub name: String,
    pub media_type: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<FileAttachment>,
    /// Forces a specific canned response instead of picking one from the
    /// message text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseConfig>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            attachments: Vec::new(),
            response: None,
        }
    }

    pub fn with_response(mut self, response: ResponseConfig) -> Self {
        self.response = Some(response);
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NewDocumentRequest {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frames_serialize_with_wire_names() {
        let frame = Frame::ToolInputStart {
            tool_call_id: "call_1".to_string(),
            tool_name: "searchKnowledgeBase".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "tool-input-start", "toolCallId": "call_1", "toolName": "searchKnowledgeBase"})
        );

        let start = Frame::Start {
            message_metadata: MessageMetadata { created_at: 42 },
        };
        assert_eq!(
            serde_json::to_value(&start).unwrap(),
            json!({"type": "start", "messageMetadata": {"createdAt": 42}})
        );

        assert_eq!(
            serde_json::to_value(Frame::DataCodeDelta {
                data: "x".to_string()
            })
            .unwrap(),
            json!({"type": "data-codeDelta", "data": "x"})
        );
        assert_eq!(
            serde_json::to_value(Frame::FinishStep).unwrap(),
            json!({"type": "finish-step"})
        );
    }

    #[test]
    fn unit_frames_ignore_extra_fields() {
        let frame: Frame =
            serde_json::from_value(json!({"type": "data-finish", "data": null})).unwrap();
        assert_eq!(frame, Frame::DataFinish);
    }

    #[test]
    fn response_config_uses_tagged_payloads() {
        let config: ResponseConfig = serde_json::from_value(json!({
            "type": "rag-error",
            "text": "Sorry.",
            "ragError": "Connection timeout"
        }))
        .unwrap();

        match config {
            ResponseConfig::RagError {
                text,
                query,
                rag_error,
            } => {
                assert_eq!(text, "Sorry.");
                assert!(query.is_empty());
                assert_eq!(rag_error, "Connection timeout");
            }
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[test]
    fn kind_matches_serialized_type() {
        let frames = vec![
            Frame::TextDelta {
                id: "m".to_string(),
                delta: "hi".to_string(),
            },
            Frame::DataKind {
                data: ArtifactKind::Spreadsheet,
            },
            Frame::Finish,
        ];
        for frame in frames {
            let value = serde_json::to_value(&frame).unwrap();
            assert_eq!(value["type"], frame.kind());
        }
    }
}
