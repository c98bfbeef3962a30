//! Line reassembly for the chunked HTTP (SSE) transport.
//!
//! Network chunks split records at arbitrary byte offsets, including inside a
//! multi-byte UTF-8 sequence. [`ChunkBuffer`] keeps the incomplete tail and
//! only hands out `data:` payloads once their terminating newline arrived.

const DATA_PREFIX: &str = "data:";

#[derive(Debug, Default)]
pub struct ChunkBuffer {
    /// Text after the last newline seen so far.
    carry: String,
    /// Bytes of a UTF-8 sequence cut off by a chunk boundary.
    pending_bytes: Vec<u8>,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw chunk; returns the `data:` payloads it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let text = self.decode_utf8(chunk);
        self.carry.push_str(&text);

        let Some(last_newline) = self.carry.rfind('\n') else {
            return Vec::new();
        };

        let rest = self.carry.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.carry, rest);

        complete.split('\n').filter_map(data_payload).collect()
    }

    /// End of stream: clears all state.
    ///
    /// A trailing record without its newline is dropped, not parsed.
    pub fn finish(&mut self) {
        if !self.carry.trim().is_empty() || !self.pending_bytes.is_empty() {
            tracing::debug!(
                leftover_len = self.carry.len() + self.pending_bytes.len(),
                "Discarding incomplete trailing SSE record"
            );
        }
        self.carry.clear();
        self.pending_bytes.clear();
    }

    /// Whether an incomplete record is currently buffered.
    pub fn has_partial(&self) -> bool {
        !self.carry.is_empty() || !self.pending_bytes.is_empty()
    }

    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        self.pending_bytes.extend_from_slice(chunk);

        match std::str::from_utf8(&self.pending_bytes) {
            Ok(text) => {
                let text = text.to_string();
                self.pending_bytes.clear();
                text
            }
            // Sequence cut at the end of the chunk: keep the tail for the next push.
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                let text = String::from_utf8_lossy(&self.pending_bytes[..valid]).into_owned();
                self.pending_bytes.drain(..valid);
                text
            }
            Err(_) => {
                let text = String::from_utf8_lossy(&self.pending_bytes).into_owned();
                self.pending_bytes.clear();
                text
            }
        }
    }
}

fn data_payload(line: &str) -> Option<String> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let data = line.strip_prefix(DATA_PREFIX)?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.trim().is_empty() {
        return None;
    }
    Some(data.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Frame, decode};

    #[test]
    fn test_single_chunk_multiple_records() {
        let mut buffer = ChunkBuffer::new();
        let records = buffer.push(
            b"data: {\"type\":\"content\",\"content\":\"a\"}\n\ndata: {\"type\":\"done\"}\n\n",
        );
        assert_eq!(
            records,
            vec![
                r#"{"type":"content","content":"a"}"#.to_string(),
                r#"{"type":"done"}"#.to_string(),
            ]
        );
        assert!(!buffer.has_partial());
    }

    #[test]
    fn test_record_split_across_chunks() {
        let whole = b"data: {\"type\":\"content\",\"content\":\"hi\"}\n";

        let mut reference = ChunkBuffer::new();
        let expected = reference.push(whole);
        assert_eq!(expected.len(), 1);

        let mut buffer = ChunkBuffer::new();
        assert!(buffer.push(b"data: {\"typ").is_empty());
        assert!(buffer.has_partial());
        let records = buffer.push(b"e\":\"content\",\"content\":\"hi\"}\n");
        assert_eq!(records, expected);
        assert_eq!(
            decode(&records[0]).unwrap(),
            Frame::Content {
                content: "hi".to_string()
            }
        );
    }

    #[test]
    fn test_every_split_point_yields_same_record() {
        let whole = "data: {\"type\":\"content\",\"content\":\"héllo ✓\"}\n".as_bytes();
        let mut reference = ChunkBuffer::new();
        let expected = reference.push(whole);

        for split in 1..whole.len() {
            let mut buffer = ChunkBuffer::new();
            let mut records = buffer.push(&whole[..split]);
            records.extend(buffer.push(&whole[split..]));
            assert_eq!(records, expected, "split at byte {}", split);
        }
    }

    #[test]
    fn test_many_small_chunks() {
        let whole = b"event: message\ndata: {\"type\":\"done\"}\n";
        let mut buffer = ChunkBuffer::new();
        let mut records = Vec::new();
        for byte in whole.iter() {
            records.extend(buffer.push(std::slice::from_ref(byte)));
        }
        assert_eq!(records, vec![r#"{"type":"done"}"#.to_string()]);
    }

    #[test]
    fn test_non_data_lines_are_skipped() {
        let mut buffer = ChunkBuffer::new();
        let records = buffer.push(b": keep-alive\r\nevent: content\r\nid: 7\r\ndata:{\"type\":\"done\"}\r\n\r\n");
        assert_eq!(records, vec![r#"{"type":"done"}"#.to_string()]);
    }

    #[test]
    fn test_finish_discards_trailing_partial_record() {
        let mut buffer = ChunkBuffer::new();
        assert!(buffer.push(b"data: {\"type\":\"done\"}").is_empty());
        buffer.finish();
        assert!(!buffer.has_partial());
        assert!(buffer.push(b"\n").is_empty());
    }
}
