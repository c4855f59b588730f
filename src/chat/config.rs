//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and the resolved
//! per-session configuration built from the arguments and the settings file.

use std::path::PathBuf;

use arrrg_derive::CommandLine;

use crate::config::{
    DEFAULT_MAX_CONTEXT_TOKENS, DEFAULT_SYSTEM_PROMPT, DeploymentConfig, SETTINGS_FILE, Settings,
    resource_path,
};
use crate::error::{Error, Result};

/// Command-line arguments for the obelisca-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Settings file to read deployments from.
    #[arrrg(optional, "Settings file (default: settings.yaml next to the binary)", "PATH")]
    pub settings: Option<String>,

    /// Conversation database location.
    #[arrrg(optional, "Conversation database (default: from settings)", "PATH")]
    pub database: Option<String>,

    /// Deployment to use for new conversations.
    #[arrrg(optional, "Deployment name for new conversations", "NAME")]
    pub deployment: Option<String>,

    /// Stored conversation to resume.
    #[arrrg(optional, "Resume the stored conversation with this id", "ID")]
    pub conversation: Option<i64>,

    /// Token budget for the conversation history.
    #[arrrg(optional, "Max context tokens (default: from settings)", "TOKENS")]
    pub max_context_tokens: Option<usize>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

impl ChatArgs {
    /// The settings file these arguments point at.
    pub fn settings_path(&self) -> PathBuf {
        self.settings
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| resource_path(SETTINGS_FILE))
    }

    /// The database these arguments point at, falling back to the settings.
    pub fn database_path(&self, settings: &Settings) -> PathBuf {
        self.database
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| settings.database_path())
    }
}

/// Configuration for a chat session.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Deployment the session talks to.
    pub deployment: DeploymentConfig,

    /// Seed prompt placed at the head of a new history.
    pub system_prompt: String,

    /// Token budget for the history.
    pub max_context_tokens: usize,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    pub fn new() -> Self {
        Self {
            deployment: DeploymentConfig::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
            use_color: true,
        }
    }

    /// Resolves command-line arguments against loaded settings.
    ///
    /// Naming a deployment that the settings do not define is an error.
    pub fn resolve(args: &ChatArgs, settings: &Settings) -> Result<Self> {
        let deployment = match &args.deployment {
            Some(name) => settings.find_deployment(name).cloned().ok_or_else(|| {
                Error::configuration(
                    format!("no deployment configuration found for '{name}'"),
                    Some("deployment".to_string()),
                )
            })?,
            None => settings.default_deployment().clone(),
        };
        Ok(Self {
            deployment,
            system_prompt: settings.system_prompt.clone(),
            max_context_tokens: args
                .max_context_tokens
                .unwrap_or(settings.max_context_tokens),
            use_color: !args.no_color,
        })
    }

    /// Sets the deployment.
    pub fn with_deployment(mut self, deployment: DeploymentConfig) -> Self {
        self.deployment = deployment;
        self
    }

    /// Sets the seed prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Sets the history token budget.
    pub fn with_max_context_tokens(mut self, max_context_tokens: usize) -> Self {
        self.max_context_tokens = max_context_tokens;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_DEPLOYMENT_NAME;

    const SETTINGS: &str = r#"
system_prompt: Be brief.
max_context_tokens: 4096
deployments:
  - type: openai
    endpoint: https://api.openai.com/v1
    deployment_name: gpt-4o
  - type: azure
    endpoint: https://example.openai.azure.com
    deployment_name: team-gpt
    api_version: 2024-02-01
"#;

    #[test]
    fn default_config() {
        let config = ChatConfig::new();
        assert_eq!(config.deployment.deployment_name, DEFAULT_DEPLOYMENT_NAME);
        assert_eq!(config.max_context_tokens, 100_000);
        assert!(config.use_color);
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn resolve_uses_settings_defaults() {
        let settings = Settings::from_yaml_str(SETTINGS).unwrap();
        let config = ChatConfig::resolve(&ChatArgs::default(), &settings).unwrap();
        assert_eq!(config.deployment.deployment_name, "gpt-4o");
        assert_eq!(config.system_prompt, "Be brief.");
        assert_eq!(config.max_context_tokens, 4096);
        assert!(config.use_color);
    }

    #[test]
    fn resolve_honors_arguments() {
        let settings = Settings::from_yaml_str(SETTINGS).unwrap();
        let args = ChatArgs {
            deployment: Some("team-gpt".to_string()),
            max_context_tokens: Some(512),
            no_color: true,
            ..ChatArgs::default()
        };
        let config = ChatConfig::resolve(&args, &settings).unwrap();
        assert_eq!(config.deployment.deployment_name, "team-gpt");
        assert_eq!(config.max_context_tokens, 512);
        assert!(!config.use_color);
    }

    #[test]
    fn resolve_rejects_unknown_deployment() {
        let settings = Settings::from_yaml_str(SETTINGS).unwrap();
        let args = ChatArgs {
            deployment: Some("missing".to_string()),
            ..ChatArgs::default()
        };
        let err = ChatConfig::resolve(&args, &settings).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn database_argument_overrides_settings() {
        let settings = Settings::default();
        let args = ChatArgs {
            database: Some("/tmp/chat.db".to_string()),
            ..ChatArgs::default()
        };
        assert_eq!(args.database_path(&settings), PathBuf::from("/tmp/chat.db"));
        assert_eq!(
            ChatArgs::default().database_path(&settings),
            settings.database_path()
        );
    }

    #[test]
    fn config_builder_pattern() {
        let config = ChatConfig::new()
            .with_system_prompt("Test prompt")
            .with_max_context_tokens(2048)
            .without_color();
        assert_eq!(config.system_prompt, "Test prompt");
        assert_eq!(config.max_context_tokens, 2048);
        assert!(!config.use_color);
    }
}
