use serde::{Deserialize, Serialize};

use crate::types::{ChatMessage, Usage};

/// Body of a `POST .../chat/completions` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionRequest<'a> {
    /// Model name; Azure ignores it in favor of the deployment in the URL.
    pub model: &'a str,

    /// The conversation to complete.
    pub messages: &'a [ChatMessage],
}

impl<'a> ChatCompletionRequest<'a> {
    /// Create a request for `model` over `messages`.
    pub fn new(model: &'a str, messages: &'a [ChatMessage]) -> Self {
        Self { model, messages }
    }
}

/// One candidate reply inside a [`ChatCompletion`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    /// Position of this choice in the response.
    #[serde(default)]
    pub index: u32,

    /// The generated message.
    pub message: ChatMessage,

    /// Why generation stopped (`stop`, `length`, `content_filter`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Response of the chat-completions endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    /// Identifier assigned by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Model that served the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Generated replies; obelisca only ever asks for one.
    #[serde(default)]
    pub choices: Vec<Choice>,

    /// Token usage, when the service reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatCompletion {
    /// Build a completion holding a single assistant reply.
    pub fn from_reply(reply: impl Into<String>, usage: Option<Usage>) -> Self {
        Self {
            id: None,
            model: None,
            choices: vec![Choice {
                index: 0,
                message: ChatMessage::assistant(reply),
                finish_reason: Some("stop".to_string()),
            }],
            usage,
        }
    }

    /// Text of the first choice, if there is one.
    pub fn reply(&self) -> Option<&str> {
        self.choices
            .first()
            .map(|choice| choice.message.content.as_str())
    }
}
