//! SSE framing for the chat stream.
//!
//! Every frame is a single `data: <json>` line followed by a blank line. The
//! stream ends with the literal `data: [DONE]` sentinel, which is not JSON.

use crate::error::FrameParseError;
use crate::protocol::Frame;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";
const DELIMITER: &[u8] = b"\n\n";

/// A complete unit pulled off the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Frame(Frame),
    Done,
}

pub type DecodeItem = Result<Decoded, FrameParseError>;

/// Result of splitting a buffer into complete frames.
#[derive(Debug, Default)]
pub struct Decoding {
    pub frames: Vec<DecodeItem>,
    /// Trailing bytes of an incomplete frame, to be prepended to the next
    /// chunk.
    pub remainder: Vec<u8>,
}

pub fn encode(frame: &Frame) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(frame)?;
    Ok(format!("{}{}\n\n", DATA_PREFIX, json))
}

pub fn encode_done() -> String {
    format!("{}{}\n\n", DATA_PREFIX, DONE_SENTINEL)
}

/// Splits `buffer` on blank lines. Carriage returns are dropped first so
/// CRLF-framed streams decode the same as LF ones.
pub fn decode(buffer: &[u8]) -> Decoding {
    let normalized: Vec<u8> = buffer.iter().copied().filter(|b| *b != b'\r').collect();
    let mut frames = Vec::new();
    let mut rest = normalized.as_slice();

    while let Some(idx) = find_delimiter(rest) {
        let (block, tail) = rest.split_at(idx);
        rest = &tail[DELIMITER.len()..];
        if let Some(item) = parse_block(block) {
            frames.push(item);
        }
    }

    Decoding {
        frames,
        remainder: rest.to_vec(),
    }
}

/// Incremental decoder holding the partial frame between reads.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<DecodeItem> {
        // The buffer holds no delimiter yet; one can only end inside the new bytes.
        let mut search_from = self.buffer.len().saturating_sub(DELIMITER.len() - 1);
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut frames = Vec::new();
        let mut consumed = 0;
        while let Some(idx) = find_delimiter(&self.buffer[search_from..]) {
            let end = search_from + idx;
            if let Some(item) = parse_block(&self.buffer[consumed..end]) {
                frames.push(item);
            }
            consumed = end + DELIMITER.len();
            search_from = consumed;
        }
        self.buffer.drain(..consumed);
        frames
    }

    /// Bytes received since the last complete frame.
    pub fn remainder(&self) -> &[u8] {
        &self.buffer
    }

    /// Flushes a final frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<DecodeItem> {
        let block = std::mem::take(&mut self.buffer);
        parse_block(&block)
    }
}

fn find_delimiter(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(DELIMITER.len())
        .position(|window| window == DELIMITER)
}

fn parse_block(block: &[u8]) -> Option<DecodeItem> {
    let raw = String::from_utf8_lossy(block);
    let data = extract_sse_data(&raw)?;

    if data == DONE_SENTINEL {
        return Some(Ok(Decoded::Done));
    }

    Some(
        serde_json::from_str::<Frame>(&data)
            .map(Decoded::Frame)
            .map_err(|err| FrameParseError {
                raw: data,
                message: err.to_string(),
            }),
    )
}

fn extract_sse_data(raw: &str) -> Option<String> {
    let mut data_lines = Vec::new();
    for line in raw.lines() {
        if let Some(data) = line.strip_prefix("data:") {
            data_lines.push(data.strip_prefix(' ').unwrap_or(data));
        }
    }

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}
