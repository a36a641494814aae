/// Append-only buffer for raw text received from an in-progress model
/// response.
///
/// The buffer grows monotonically for the lifetime of a session. The one
/// exception is `remove_range`, used by the extractor after a marked section
/// has been finally resolved: the matched region can never contribute to a
/// later extraction, so dropping it bounds buffer growth without losing
/// pending information.
#[derive(Debug, Default)]
pub struct ChunkAccumulator {
    buffer: String,
}

impl ChunkAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a raw chunk. Pure state mutation, no failure modes.
    pub fn append(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
    }

    /// Current accumulated text.
    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Removes `range` from the buffer. Only called for regions that have
    /// been finally extracted; `range` must lie on char boundaries.
    pub fn remove_range(&mut self, range: std::ops::Range<usize>) {
        self.buffer.replace_range(range, "");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_accumulates_in_order() {
        let mut acc = ChunkAccumulator::new();
        acc.append("hello ");
        acc.append("world");
        assert_eq!(acc.as_str(), "hello world");
    }

    #[test]
    fn remove_range_drops_resolved_region_only() {
        let mut acc = ChunkAccumulator::new();
        acc.append("before[marked]after");
        acc.remove_range(6..14);
        assert_eq!(acc.as_str(), "beforeafter");
    }
}
