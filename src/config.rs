//! Deployment settings and file locations.
//!
//! Settings live in a YAML file (`settings.yaml` next to the executable by
//! default):
//!
//! ```yaml
//! max_context_tokens: 100000
//! deployments:
//!   - type: azure
//!     endpoint: https://example.openai.azure.com/
//!     deployment_name: gpt-4o
//!     api_version: 2024-12-01-preview
//!   - type: openai
//!     deployment_name: gpt-4o-mini
//! ```
//!
//! API keys are never stored in the file; they come from `OPENAI_API_KEY` or
//! `AZURE_OPENAI_API_KEY` depending on the deployment type.

use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Default settings file name, resolved next to the executable.
pub const SETTINGS_FILE: &str = "settings.yaml";

/// Default database file name.
pub const DATABASE_FILE: &str = "conversations.db";

/// Default endpoint for the public OpenAI API.
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";

/// Default model when a deployment does not name one.
pub const DEFAULT_DEPLOYMENT_NAME: &str = "gpt-3.5-turbo";

/// Default context window budget for a conversation, in tokens.
pub const DEFAULT_MAX_CONTEXT_TOKENS: usize = 100_000;

/// Environment variable holding the key for OpenAI deployments.
pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Environment variable holding the key for Azure OpenAI deployments.
pub const AZURE_API_KEY_VAR: &str = "AZURE_OPENAI_API_KEY";

/// Persona used when the settings file does not supply a system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Obelisca Divergencia da Silva, a helpful programming assistant. \
Please answer user questions and consider any attached file content as additional context. \
You should always adhere to technical information. \
If outputting Python code, then use camelCase. \
If naming Python files, then use camelCase. \
Use Markdown formatting in your answers. \
Always format code using Markdown code blocks, with the programming language specified at the start. \
When outputting code always use four spaces for indentation. \
When outputting code always preserve existing comments.";

/// The flavor of API a deployment speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentKind {
    /// api.openai.com or any compatible endpoint.
    #[default]
    OpenAi,
    /// An Azure OpenAI resource.
    Azure,
}

impl DeploymentKind {
    /// Name of the environment variable holding this kind's API key.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            DeploymentKind::OpenAi => OPENAI_API_KEY_VAR,
            DeploymentKind::Azure => AZURE_API_KEY_VAR,
        }
    }
}

impl fmt::Display for DeploymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentKind::OpenAi => write!(f, "openai"),
            DeploymentKind::Azure => write!(f, "azure"),
        }
    }
}

impl FromStr for DeploymentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(DeploymentKind::OpenAi),
            "azure" => Ok(DeploymentKind::Azure),
            other => Err(Error::configuration(
                format!("unknown deployment type: {other}"),
                Some("type".to_string()),
            )),
        }
    }
}

/// One configured model endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentConfig {
    /// Label of the entry in the settings file.
    pub section: String,
    /// API flavor.
    #[serde(rename = "type")]
    pub kind: DeploymentKind,
    /// Base URL of the service.
    pub endpoint: String,
    /// Model name (OpenAI) or deployment name (Azure).
    pub deployment_name: String,
    /// `api-version` query parameter; required for Azure.
    pub api_version: String,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            section: "Default".to_string(),
            kind: DeploymentKind::OpenAi,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            deployment_name: DEFAULT_DEPLOYMENT_NAME.to_string(),
            api_version: String::new(),
        }
    }
}

impl DeploymentConfig {
    /// Checks that the fields required by this deployment's kind are present.
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            DeploymentKind::Azure => {
                if self.endpoint.is_empty()
                    || self.deployment_name.is_empty()
                    || self.api_version.is_empty()
                {
                    return Err(Error::configuration(
                        "missing required Azure OpenAI configuration",
                        Some(self.section.clone()),
                    ));
                }
            }
            DeploymentKind::OpenAi => {
                if self.endpoint.is_empty() || self.deployment_name.is_empty() {
                    return Err(Error::configuration(
                        "deployment_name is not set for OpenAI configuration",
                        Some(self.section.clone()),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Reads the API key for this deployment from the process environment.
    pub fn api_key(&self) -> Result<String> {
        self.api_key_from(|var| env::var(var).ok())
    }

    /// Reads the API key through `lookup`, which maps a variable name to its value.
    pub fn api_key_from<F>(&self, lookup: F) -> Result<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = self.kind.api_key_var();
        match lookup(var) {
            Some(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            _ => Err(Error::authentication(format!(
                "API key environment variable {var} is not set"
            ))),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawDeployment {
    section: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    endpoint: Option<String>,
    deployment_name: Option<String>,
    api_version: Option<String>,
}

impl RawDeployment {
    fn resolve(self, position: usize) -> Result<DeploymentConfig> {
        let defaults = DeploymentConfig::default();
        let kind = match self.kind.as_deref() {
            Some(kind) => kind.parse()?,
            None => defaults.kind,
        };
        let field = |value: Option<String>, default: String| {
            value
                .map(|v| v.trim().to_string())
                .unwrap_or(default)
        };
        Ok(DeploymentConfig {
            section: self
                .section
                .unwrap_or_else(|| format!("Deployment_Config_{}", position + 1)),
            kind,
            endpoint: field(self.endpoint, defaults.endpoint),
            deployment_name: field(self.deployment_name, defaults.deployment_name),
            api_version: field(self.api_version, defaults.api_version),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    #[serde(default)]
    deployments: Vec<RawDeployment>,
    system_prompt: Option<String>,
    max_context_tokens: Option<usize>,
    database: Option<PathBuf>,
}

/// Resolved application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Configured deployments; never empty.
    pub deployments: Vec<DeploymentConfig>,
    /// Seed prompt for new conversations.
    pub system_prompt: String,
    /// Token budget for the conversation history.
    pub max_context_tokens: usize,
    /// Explicit database location, if configured.
    pub database: Option<PathBuf>,
    /// File the settings were read from, if any.
    pub source: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            deployments: vec![DeploymentConfig::default()],
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
            database: None,
            source: None,
        }
    }
}

impl Settings {
    /// Loads settings from `path`.
    ///
    /// A missing file yields the defaults; a malformed file is an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Reading deployment configurations from: {}", path.display());
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!("Settings file {} not found; using defaults", path.display());
                return Ok(Settings {
                    source: Some(path.to_path_buf()),
                    ..Settings::default()
                });
            }
            Err(err) => {
                return Err(Error::io(
                    format!("failed to read settings file {}", path.display()),
                    err,
                ));
            }
        };
        let mut settings = Self::from_yaml_str(&text)?;
        settings.source = Some(path.to_path_buf());
        Ok(settings)
    }

    /// Parses settings from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let raw: RawSettings = if text.trim().is_empty() {
            RawSettings::default()
        } else {
            serde_yaml::from_str(text)?
        };

        let mut deployments = Vec::with_capacity(raw.deployments.len());
        for (position, deployment) in raw.deployments.into_iter().enumerate() {
            let deployment = deployment.resolve(position)?;
            info!("Loaded deployment: {}", deployment.deployment_name);
            deployments.push(deployment);
        }
        if deployments.is_empty() {
            warn!("No deployment configurations found in settings.");
            deployments.push(DeploymentConfig::default());
        }

        Ok(Settings {
            deployments,
            system_prompt: raw
                .system_prompt
                .filter(|prompt| !prompt.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            max_context_tokens: raw
                .max_context_tokens
                .unwrap_or(DEFAULT_MAX_CONTEXT_TOKENS),
            database: raw.database,
            source: None,
        })
    }

    /// Finds a deployment by its deployment name.
    pub fn find_deployment(&self, deployment_name: &str) -> Option<&DeploymentConfig> {
        self.deployments
            .iter()
            .find(|d| d.deployment_name == deployment_name)
    }

    /// The deployment used when none is selected explicitly.
    pub fn default_deployment(&self) -> &DeploymentConfig {
        // from_yaml_str and Default both guarantee at least one entry.
        &self.deployments[0]
    }

    /// Location of the conversation database.
    ///
    /// A relative `database` setting is resolved against the settings file's
    /// directory; without one the database sits next to the settings file.
    pub fn database_path(&self) -> PathBuf {
        let base = self
            .source
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| resource_path(""));
        match &self.database {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => base.join(path),
            None => base.join(DATABASE_FILE),
        }
    }
}

/// Resolves `relative` against the directory holding the running executable.
pub fn resource_path<P: AsRef<Path>>(relative: P) -> PathBuf {
    let base = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join(relative)
}
