/// Folds streamed text fragments into the turn currently being generated.
///
/// Owned by a single relay loop, so no synchronization.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    turn_complete: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one fragment. Empty fragments are ignored; returns whether
    /// anything was added.
    ///
    /// A fragment arriving after a completed turn starts a new one.
    pub fn push(&mut self, fragment: &str) -> bool {
        if fragment.is_empty() {
            return false;
        }
        if self.turn_complete {
            self.text.clear();
            self.turn_complete = false;
        }
        self.text.push_str(fragment);
        true
    }

    /// The text accumulated so far in the open turn.
    pub fn partial(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn is_turn_complete(&self) -> bool {
        self.turn_complete
    }

    /// Closes the turn and hands back its text, leaving the buffer empty.
    /// Returns `None` when the turn produced no text.
    pub fn complete_turn(&mut self) -> Option<String> {
        self.turn_complete = true;
        if self.text.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.text))
        }
    }
}
