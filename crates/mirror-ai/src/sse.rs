//! Incremental decoder for `event:`/`data:` frames.
//!
//! Shared by the client-side reader and the upstream Gemini transport.

/// Event name assumed when a frame carries no `event:` line.
pub const DEFAULT_EVENT: &str = "message";

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: String,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

impl Frame {
    /// Parses `data` as JSON, substituting an empty object when it is not.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::from_str(&self.data)
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()))
    }
}

/// Byte-level frame splitter.
///
/// Bytes after the last boundary are kept and prefixed to the next push, so
/// a boundary or a multi-byte character split across reads still decodes.
#[derive(Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every frame completed by it.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf) {
            let frame_bytes: Vec<u8> = self.buf.drain(..idx + delim_len).take(idx).collect();
            if let Some(frame) = parse_frame(&frame_bytes) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Bytes received after the last complete frame.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }
}

fn find_frame_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len() && &buf[i..i + 4] == b"\r\n\r\n" {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

fn parse_frame(bytes: &[u8]) -> Option<Frame> {
    let text = String::from_utf8_lossy(bytes);
    let mut event: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim());
        }
    }
    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(Frame {
        event: event.unwrap_or_else(|| DEFAULT_EVENT.to_string()),
        data: data_lines.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIRE: &str = concat!(
        "event: start\ndata: {\"ok\":true}\n\n",
        "event: delta\ndata: {\"text\":\"h\u{e9}llo\"}\n\n",
        ": keep-alive\n\n",
        "data: {\"text\":\"untyped\"}\r\n\r\n",
        "event: done\ndata: {\"reply\":\"h\u{e9}llo\"}\n\n",
    );

    #[test]
    fn split_at_any_offset_matches_single_read() {
        let bytes = WIRE.as_bytes();
        let whole = FrameDecoder::new().push_chunk(bytes);
        assert_eq!(whole.len(), 4);

        for split in 0..=bytes.len() {
            let mut decoder = FrameDecoder::new();
            let mut frames = decoder.push_chunk(&bytes[..split]);
            frames.extend(decoder.push_chunk(&bytes[split..]));
            assert_eq!(frames, whole, "split at {split}");
            assert!(decoder.pending().is_empty());
        }
    }

    #[test]
    fn missing_event_line_defaults_to_message() {
        let frames = FrameDecoder::new().push_chunk(b"data: {\"a\":1}\n\n");
        assert_eq!(frames[0].event, DEFAULT_EVENT);
        assert_eq!(frames[0].payload()["a"], 1);
    }

    #[test]
    fn malformed_payload_becomes_empty_object() {
        let frames = FrameDecoder::new().push_chunk(b"event: delta\ndata: {not json\n\n");
        assert_eq!(frames[0].payload(), serde_json::json!({}));
    }

    #[test]
    fn incomplete_frame_is_retained() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push_chunk(b"event: delta\ndata: {}\n").is_empty());
        assert_eq!(decoder.pending(), b"event: delta\ndata: {}\n");
        assert_eq!(decoder.push_chunk(b"\n").len(), 1);
    }
}
