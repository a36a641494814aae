/// Input content sent to a model run.
///
/// Text-first; non-exhaustive so new content kinds can be added without
/// breaking callers.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub enum InputPart {
    /// Plain text input.
    Text(String),
    /// Structured JSON input, serialized into the prompt.
    Json(serde_json::Value),
}

/// Token accounting reported by the provider at end of stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Final result of a completed run.
///
/// Providers here are delta-only streams, so the transcript is exactly the
/// concatenation of every `OutputDelta` the run produced, plus the metadata
/// reported at stream end.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunOutput {
    /// Full text transcript in emission order.
    pub text: String,
    /// Vendor-specific stop reason when available (for example `end_turn`).
    pub finish_reason: Option<String>,
    /// Token usage when the provider reported it.
    pub usage: Option<TokenUsage>,
}
