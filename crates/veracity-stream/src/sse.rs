//! Incremental Server-Sent-Events record framing.
//!
//! Framing is byte-level: a record boundary is a blank line, so multi-byte
//! UTF-8 sequences split across network reads never corrupt a frame. Comment
//! lines (`: keepalive`) are dropped during parsing and never surface as
//! frames.

/// One parsed SSE record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub id: Option<u64>,
    pub event: Option<String>,
    pub data: String,
}

/// Streaming decoder fed raw network chunks of arbitrary size.
#[derive(Default)]
pub struct SseFrameDecoder {
    buf: Vec<u8>,
}

impl SseFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every complete frame now available. The
    /// trailing partial record stays buffered for the next chunk.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some((idx, delim_len)) = find_record_delimiter(&self.buf) {
            let record = self.buf[..idx].to_vec();
            self.buf.drain(..idx + delim_len);
            if let Some(frame) = parse_record(&record) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Gives the retained partial record one final parse attempt. Called when
    /// the underlying read signals end-of-stream.
    pub fn flush(&mut self) -> Option<SseFrame> {
        if self.buf.is_empty() {
            return None;
        }
        let record = std::mem::take(&mut self.buf);
        parse_record(&record)
    }
}

fn find_record_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len()
            && buf[i] == b'\r'
            && buf[i + 1] == b'\n'
            && buf[i + 2] == b'\r'
            && buf[i + 3] == b'\n'
        {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

fn parse_record(bytes: &[u8]) -> Option<SseFrame> {
    if bytes.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let mut id: Option<u64> = None;
    let mut event: Option<String> = None;
    let mut data_lines: Vec<String> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("id:") {
            id = rest.trim_start().parse().ok();
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim_start().to_string());
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start().to_string());
        }
    }
    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        id,
        event,
        data: data_lines.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_split_across_chunk_boundary() {
        let mut decoder = SseFrameDecoder::new();
        let first = decoder.push_chunk(b"id: 1\nevent: chunk\ndata: {\"partial\":\"hel");
        assert!(first.is_empty());
        let second = decoder.push_chunk(b"lo\"}\n\n");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, Some(1));
        assert_eq!(second[0].event.as_deref(), Some("chunk"));
        assert!(second[0].data.contains("hello"));
    }

    #[test]
    fn multibyte_character_split_between_reads_survives() {
        let encoded = "id: 1\nevent: chunk\ndata: {\"partial\":\"héllo\"}\n\n".as_bytes();
        // Split inside the two-byte encoding of 'é'.
        let cut = encoded.iter().position(|b| *b == 0xc3).unwrap() + 1;
        let mut decoder = SseFrameDecoder::new();
        assert!(decoder.push_chunk(&encoded[..cut]).is_empty());
        let frames = decoder.push_chunk(&encoded[cut..]);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].data.contains("héllo"));
    }

    #[test]
    fn comment_only_records_are_invisible() {
        let mut decoder = SseFrameDecoder::new();
        let frames = decoder.push_chunk(b": keepalive\n\nid: 1\nevent: status\ndata: {}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("status"));
    }

    #[test]
    fn crlf_delimited_records_are_accepted() {
        let mut decoder = SseFrameDecoder::new();
        let frames = decoder.push_chunk(b"id: 2\r\nevent: status\r\ndata: {}\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id, Some(2));
    }

    #[test]
    fn flush_parses_the_trailing_partial_record() {
        let mut decoder = SseFrameDecoder::new();
        assert!(decoder.push_chunk(b"id: 3\nevent: complete\ndata: {\"success\":true}").is_empty());
        let frame = decoder.flush().expect("trailing record parsed");
        assert_eq!(frame.event.as_deref(), Some("complete"));
        assert!(decoder.flush().is_none());
    }
}
