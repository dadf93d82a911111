//! Incremental decoder for the newline-delimited status stream

use tracing::debug;

use delve_core::{DelveError, DelveResult, ErrorContext, StreamFrame};

/// Splits an arbitrary byte stream into [`StreamFrame`]s.
///
/// Bytes are buffered until a full line is available, so chunk boundaries may
/// fall anywhere, including inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
    line_number: usize,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns every frame completed by it, in order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<DelveResult<StreamFrame>> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            self.line_number += 1;
            if let Some(frame) = self.decode_line(&line[..line.len() - 1]) {
                frames.push(frame);
            }
        }
        frames
    }

    /// End of input. A complete trailing object without a newline is still a
    /// frame; a truncated one is dropped.
    pub fn finish(&mut self) -> Option<StreamFrame> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        self.line_number += 1;
        match self.decode_line(&rest)? {
            Ok(frame) => Some(frame),
            Err(e) => {
                debug!(line = self.line_number, error = %e, "Dropping truncated trailing frame");
                None
            }
        }
    }

    /// Bytes waiting for a newline
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn decode_line(&self, line: &[u8]) -> Option<DelveResult<StreamFrame>> {
        let text = match std::str::from_utf8(line) {
            Ok(text) => text.trim(),
            Err(e) => return Some(Err(self.parse_error(format!("invalid UTF-8: {}", e)))),
        };
        if text.is_empty() {
            return None;
        }
        Some(
            serde_json::from_str::<StreamFrame>(text)
                .map_err(|e| self.parse_error(format!("malformed frame: {}", e))),
        )
    }

    fn parse_error(&self, message: String) -> DelveError {
        DelveError::Parse {
            message,
            context: ErrorContext::new("ndjson_decoder")
                .with_metadata("line", &self.line_number.to_string()),
        }
    }
}
