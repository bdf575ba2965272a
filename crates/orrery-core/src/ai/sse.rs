//! Incremental SSE parser for the completion stream.
//!
//! The completion service sends newline-delimited frames: comments (`:`
//! prefix), blank separators, and `data: <json>` frames ending with a
//! literal `data: [DONE]` sentinel. A frame may be split across two
//! physical reads, so the parser holds the unconsumed tail and re-joins it
//! with the next chunk before re-scanning for newlines.

use serde_json::Value;

/// Stateful parser fed raw response-body chunks, yielding text deltas.
///
/// Non-restartable: once the `[DONE]` sentinel has been seen, further
/// input is ignored.
pub struct SseStreamParser {
    /// Unconsumed tail carried between feeds.
    buffer: Vec<u8>,
    done: bool,
}

impl SseStreamParser {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            done: false,
        }
    }

    /// Whether the terminal `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one chunk of the response body, returning the text deltas it
    /// completed. Empty deltas are dropped, not passed through.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut deltas = Vec::new();
        if self.done {
            return deltas;
        }

        self.buffer.extend_from_slice(chunk);

        while !self.done {
            let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') else {
                break;
            };
            let rest = self.buffer.split_off(newline + 1);
            let mut line = std::mem::replace(&mut self.buffer, rest);
            line.pop(); // the newline itself
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            let text = String::from_utf8_lossy(&line);
            let text = text.as_ref();

            // Comments and blank separators carry no payload.
            if text.is_empty() || text.starts_with(':') {
                continue;
            }

            let Some(payload) = text.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.strip_prefix(' ').unwrap_or(payload);

            if payload == "[DONE]" {
                self.done = true;
                break;
            }

            match serde_json::from_str::<Value>(payload) {
                Ok(json) => {
                    if let Some(delta) = extract_delta(&json) {
                        deltas.push(delta);
                    }
                }
                Err(_) => {
                    // The chunk boundary likely fell inside the JSON
                    // payload: push the frame back in front of the tail
                    // (without the consumed newline) and retry once more
                    // data arrives.
                    let mut rebuffered = Vec::with_capacity(line.len() + self.buffer.len());
                    rebuffered.extend_from_slice(&line);
                    rebuffered.append(&mut self.buffer);
                    self.buffer = rebuffered;
                    break;
                }
            }
        }

        deltas
    }
}

impl Default for SseStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull `choices[0].delta.content` out of a parsed frame.
/// Absent or empty content is valid and yields no delta.
fn extract_delta(json: &Value) -> Option<String> {
    let content = json
        .get("choices")?
        .as_array()?
        .first()?
        .get("delta")?
        .get("content")?
        .as_str()?;
    if content.is_empty() {
        None
    } else {
        Some(content.to_string())
    }
}
