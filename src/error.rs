use std::time::Duration;
use thiserror::Error;

pub type StreamResult<T> = Result<T, StreamError>;

/// A frame whose payload could not be parsed. Decoding carries on with the
/// next frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed frame `{raw}`: {message}")]
pub struct FrameParseError {
    pub raw: String,
    pub message: String,
}

/// A frame that references state the consumer never opened, or that tries
/// to move something backwards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolOrderError {
    #[error("text buffer `{0}` is already open")]
    DuplicateTextStart(String),
    #[error("no open text buffer for `{0}`")]
    UnknownText(String),
    #[error("tool call `{0}` already started")]
    DuplicateToolStart(String),
    #[error("tool call `{id}` cannot move from {from} to {to}")]
    ToolRegression {
        id: String,
        from: &'static str,
        to: &'static str,
    },
    #[error("`{0}` frame arrived after the turn finished")]
    AfterFinish(&'static str),
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    FrameParse(#[from] FrameParseError),

    #[error(transparent)]
    ProtocolOrder(#[from] ProtocolOrderError),

    #[error("stream ended before the turn finished")]
    StreamAborted,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no data received for {0:?}")]
    Timeout(Duration),

    #[error("frame sink closed")]
    SinkClosed,

    #[error("a turn is already in progress")]
    TurnInProgress,

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Whether resubmitting the same turn could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
