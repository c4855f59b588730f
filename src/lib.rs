// Public modules
pub mod attachments;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod store;
pub mod tokens;
pub mod types;
pub mod utils;

// Re-exports
pub use attachments::AttachmentReader;
pub use client::{ChatBackend, OpenAiClient};
pub use config::{DeploymentConfig, DeploymentKind, Settings};
pub use error::{Error, Result};
pub use observability::register_biometrics;
pub use store::{ConversationDatabase, ConversationRecord, ConversationSummary};
pub use tokens::{Cl100kCounter, TokenCounter};
pub use types::*;
