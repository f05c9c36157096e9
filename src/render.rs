use crate::reducer::{
    ArtifactState, ArtifactStatus, ChatMessage, MessagePart, Notice, Role, SessionState,
    ToolCallState, ToolState,
};
use std::collections::HashSet;
use std::io::{self, Write};

pub fn message_lines(message: &ChatMessage) -> Vec<String> {
    let header = match message.role {
        Role::User => "You:",
        Role::Assistant => "Assistant:",
    };
    let mut lines = vec![header.to_string()];

    for part in &message.parts {
        match part {
            MessagePart::Text(text) => {
                for line in text.text.lines() {
                    lines.push(format!("  {}", line));
                }
            }
            MessagePart::File(file) => {
                lines.push(format!("  [file] {} ({})", file.name, file.media_type))
            }
            MessagePart::Tool(call) => lines.push(format!("  {}", tool_line(call))),
        }
    }
    lines
}

pub fn tool_line(call: &ToolCallState) -> String {
    let detail = match (&call.state, &call.output, &call.error) {
        (ToolState::OutputError, _, Some(error)) => format!("error: {}", error),
        (ToolState::OutputAvailable, Some(output), _) => match output.error_message() {
            Some(error) => format!("error: {}", error),
            None => output.summary(),
        },
        (_, _, _) => match &call.input {
            Some(input) => input.to_string(),
            None => String::from("..."),
        },
    };
    format!("tool {} [{}] {}", call.tool_name, call.state.as_str(), detail)
}

pub fn artifact_lines(artifact: &ArtifactState) -> Vec<String> {
    let mut header = format!("artifact: {} ({}", artifact.title, artifact.kind.as_str());
    if let Some(language) = &artifact.language {
        header.push_str(", ");
        header.push_str(language);
    }
    header.push(')');

    let mut lines = vec![header];
    for line in artifact.content.split('\n') {
        lines.push(format!("  | {}", line));
    }
    lines
}

pub fn notice_line(notice: &Notice) -> String {
    format!("! {:?}: {}", notice.kind, notice.message)
}

/// Writes a streaming turn incrementally: text as it grows, tool updates as
/// they change state, and the artifact once it is complete.
#[derive(Debug, Default)]
pub struct LivePrinter {
    printed_text: usize,
    printed_tools: HashSet<(String, &'static str)>,
    printed_artifact: Option<String>,
}

impl LivePrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update<W: Write>(&mut self, state: &SessionState, out: &mut W) -> io::Result<()> {
        let Some(message) = state
            .current_message()
            .filter(|message| message.role == Role::Assistant)
        else {
            return Ok(());
        };

        for call in message.tool_calls() {
            let key = (call.tool_call_id.clone(), call.state.as_str());
            if self.printed_tools.insert(key) {
                writeln!(out, "{}", tool_line(call))?;
            }
        }

        if let Some(artifact) = state.artifact() {
            let already = self.printed_artifact.as_deref() == Some(artifact.id.as_str());
            if artifact.status == ArtifactStatus::Idle && !already {
                for line in artifact_lines(artifact) {
                    writeln!(out, "{}", line)?;
                }
                self.printed_artifact = Some(artifact.id.clone());
            }
        }

        let text = message.text();
        if text.len() > self.printed_text && text.is_char_boundary(self.printed_text) {
            write!(out, "{}", &text[self.printed_text..])?;
            self.printed_text = text.len();
        }
        out.flush()
    }

    /// Remembers an artifact that existed before this turn so it is not
    /// printed again.
    pub fn skip_artifact(&mut self, state: &SessionState) {
        self.printed_artifact = state.artifact().map(|artifact| artifact.id.clone());
    }
}
