use serde::{Deserialize, Serialize};

/// Token accounting returned with every chat completion.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    /// Tokens consumed by the request messages.
    #[serde(default)]
    pub prompt_tokens: u64,

    /// Tokens produced in the reply.
    #[serde(default)]
    pub completion_tokens: u64,

    /// Sum of prompt and completion tokens, as reported by the service.
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    /// Create a new `Usage`; the total is derived from the two halves.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}
