// Public modules
pub mod chat_completion;
pub mod chat_message;
pub mod usage;

// Re-exports
pub use chat_completion::{ChatCompletion, ChatCompletionRequest, Choice};
pub use chat_message::{ChatMessage, Role};
pub use usage::Usage;
