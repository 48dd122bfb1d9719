/// Decides when streamed text has grown enough to re-run output guardrails.
#[derive(Debug, Clone)]
pub struct OutputDebouncer {
    threshold: usize,
    checked_len: usize,
}

impl OutputDebouncer {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            checked_len: 0,
        }
    }

    /// Report the current text length. Returns `true` when the text added
    /// since the last check exceeds the threshold, and marks it checked.
    pub fn observe(&mut self, text_len: usize) -> bool {
        if text_len.saturating_sub(self.checked_len) > self.threshold {
            self.checked_len = text_len;
            true
        } else {
            false
        }
    }

    /// Characters received since the last check.
    pub fn pending(&self, text_len: usize) -> usize {
        text_len.saturating_sub(self.checked_len)
    }
}
