//! JSON-lines framing for streamed engine output.

use bytes::{Buf, BytesMut};

/// Splits a byte stream into complete lines.
///
/// Works on raw bytes so a multi-byte character split across two network
/// chunks is reassembled before decoding.
#[derive(Debug, Default)]
pub(super) struct LineDecoder {
    buffer: BytesMut,
}

impl LineDecoder {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed. Blank lines are
    /// dropped and a trailing `\r` is stripped.
    pub(super) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw = self.buffer.split_to(newline);
            self.buffer.advance(1);
            if let Some(line) = clean(&raw) {
                lines.push(line);
            }
        }
        lines
    }

    /// Whatever is left once the stream has ended without a final newline.
    pub(super) fn finish(&mut self) -> Option<String> {
        let rest = self.buffer.split();
        clean(&rest)
    }
}

fn clean(raw: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches('\r').trim();
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}
