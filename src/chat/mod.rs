//! Interactive chat over a stored conversation.
//!
//! - [`config`]: CLI argument parsing and per-session configuration
//! - [`session`]: conversation state, trimming, attachments and persistence
//! - [`commands`]: slash command parsing
//! - [`render`]: terminal output

mod commands;
mod config;
mod render;
mod session;

pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig};
pub use render::{PlainTextRenderer, Renderer, format_markdown};
pub use session::{ChatSession, PLACEHOLDER_TITLE_PREFIX, SessionStats, auto_title};
