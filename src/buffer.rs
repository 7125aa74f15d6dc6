use std::mem;
use std::sync::Mutex;

/// Shared accumulator for raw text arriving from the link.
///
/// One writer role (the read loop) appends; one drain role (session
/// finalization) takes the whole content. Both serialize on the same lock,
/// so a drain can never observe a half-appended chunk or leave bytes behind
/// for a later session.
#[derive(Debug, Default)]
pub struct SampleBuffer {
    content: Mutex<String>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append decoded text at the tail, in arrival order.
    pub fn append(&self, text: &str) {
        self.content.lock().unwrap().push_str(text);
    }

    /// Take the entire current content and reset the buffer to empty, as one
    /// atomic step. Called once per session, at finalization.
    pub fn drain_and_reset(&self) -> String {
        mem::take(&mut *self.content.lock().unwrap())
    }

    /// Number of accumulated bytes.
    pub fn len(&self) -> usize {
        self.content.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
