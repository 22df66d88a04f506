//! Record splitter: turns a character stream into records and batch boundaries.

use super::types::{SeparatorSet, Tuple};

/// Outcome of feeding a separator to the splitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitEvent {
    /// A record was completed.
    Tuple(Tuple),
    /// An empty record was seen: the current batch ends here.
    Flush,
}

/// Stateful character-to-record converter.
///
/// Every character consumed advances `head_count`, separators included.
/// A completed record is tagged with the offset of its first character.
#[derive(Debug, Clone)]
pub struct RecordSplitter {
    separators: SeparatorSet,
    buffer: String,
    head_count: u64,
    record_start: u64,
}

impl RecordSplitter {
    #[must_use]
    pub fn new(separators: SeparatorSet) -> Self {
        Self {
            separators,
            buffer: String::new(),
            head_count: 0,
            record_start: 0,
        }
    }

    /// Replace the separator set; applies to characters fed from now on.
    pub fn set_separators(&mut self, separators: SeparatorSet) {
        self.separators = separators;
    }

    #[must_use]
    pub fn separators(&self) -> &SeparatorSet {
        &self.separators
    }

    /// Total characters consumed so far.
    #[must_use]
    pub fn head_count(&self) -> u64 {
        self.head_count
    }

    /// Text of the record currently being accumulated.
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Consume one character.
    pub fn feed(&mut self, ch: char) -> Option<SplitEvent> {
        let event = if self.separators.contains(ch) {
            if self.buffer.is_empty() {
                Some(SplitEvent::Flush)
            } else {
                let text = std::mem::take(&mut self.buffer);
                Some(SplitEvent::Tuple(Tuple::new(self.record_start, text)))
            }
        } else {
            if self.buffer.is_empty() {
                self.record_start = self.head_count;
            }
            self.buffer.push(ch);
            None
        };
        self.head_count += 1;
        event
    }

    /// Consume a string, collecting the events it produces.
    pub fn feed_str(&mut self, text: &str) -> Vec<SplitEvent> {
        text.chars().filter_map(|ch| self.feed(ch)).collect()
    }

    /// Surface an unterminated trailing record, as if a separator followed it.
    ///
    /// `head_count` is left untouched since no character was read.
    pub fn finish(&mut self) -> Option<Tuple> {
        if self.buffer.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.buffer);
        Some(Tuple::new(self.record_start, text))
    }
}

impl Default for RecordSplitter {
    fn default() -> Self {
        Self::new(SeparatorSet::default())
    }
}
