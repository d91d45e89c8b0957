//! Configuration for the conversation client

/// Default model identifier for the realtime service
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Default voice identity for spoken replies
pub const DEFAULT_VOICE: &str = "Zephyr";

/// Default system instruction
pub const DEFAULT_SYSTEM_INSTRUCTION: &str =
    "You are a helpful and friendly AI assistant. Be concise and clear in your responses.";

/// Conversation configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API credential for the remote service, from `GEMINI_API_KEY`.
    /// Absence is a fatal error at connect time, never silently bypassed.
    pub credential: Option<String>,

    /// Model identifier
    pub model: String,

    /// Voice identity for spoken replies
    pub voice: String,

    /// System instruction for the model
    pub system_instruction: String,
}

impl Config {
    /// Load configuration from the process environment
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            credential: std::env::var("GEMINI_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
        }
    }
}
