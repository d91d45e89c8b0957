//! Turn transcript aggregation
//!
//! Streaming transcription fragments are buffered per speaker until the
//! service signals turn completion, then committed as immutable entries.
//! Partial fragments never appear in the committed log.

/// Who said it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    /// The human side of the conversation
    User,
    /// The model's spoken reply
    Model,
}

/// One committed line of the conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    /// Which direction the text came from
    pub speaker: Speaker,
    /// Finalized text for the turn
    pub text: String,
}

/// Accumulates partial transcription fragments into committed turns
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    input_buffer: String,
    output_buffer: String,
    log: Vec<TranscriptEntry>,
}

impl TranscriptAggregator {
    /// Create an empty aggregator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment of the user's transcription
    pub fn push_input(&mut self, text: &str) {
        self.input_buffer.push_str(text);
    }

    /// Append a fragment of the model's transcription
    pub fn push_output(&mut self, text: &str) {
        self.output_buffer.push_str(text);
    }

    /// Commit the current turn
    ///
    /// Trims both buffers and appends one entry per non-empty buffer, user
    /// first then model, then clears both for the next turn. Returns the
    /// entries committed by this call.
    pub fn commit_turn(&mut self) -> Vec<TranscriptEntry> {
        let input = std::mem::take(&mut self.input_buffer);
        let output = std::mem::take(&mut self.output_buffer);

        let mut committed = Vec::new();
        let input = input.trim();
        if !input.is_empty() {
            committed.push(TranscriptEntry {
                speaker: Speaker::User,
                text: input.to_string(),
            });
        }
        let output = output.trim();
        if !output.is_empty() {
            committed.push(TranscriptEntry {
                speaker: Speaker::Model,
                text: output.to_string(),
            });
        }

        self.log.extend(committed.iter().cloned());
        committed
    }

    /// The committed log, in turn order
    #[must_use]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.log
    }

    /// Whether any fragments are buffered for the current turn
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.input_buffer.is_empty() || !self.output_buffer.is_empty()
    }
}
