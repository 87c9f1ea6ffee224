//! Runtime configuration.
//!
//! Settings are assembled once at startup from the parsed [`Cli`] (which
//! itself falls back to environment variables) and an optional YAML assistant
//! profile. Everything downstream receives plain structs; nothing reads the
//! environment after this point.

use crate::cli::Cli;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument};
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {name} URL `{value}`: {source}")]
    InvalidUrl {
        name: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error("could not read assistant profile {}: {source}", .path.display())]
    ProfileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse assistant profile {}: {source}", .path.display())]
    ProfileParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Pre-existing remote resources to reuse instead of creating new ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceIds {
    pub assistant_id: Option<String>,
    pub thread_id: Option<String>,
}

/// How long and how often a run is polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait before every status check.
    pub interval: Duration,
    /// Maximum number of status checks.
    pub max_attempts: u32,
    /// Give up once this much time has passed since polling started.
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 120,
            max_wait: Duration::from_secs(600),
        }
    }
}

/// How the assistant is created when no assistant id is configured, and what
/// each run is told to do.
///
/// # YAML
///
/// ```yaml
/// name: News Summarizer
/// model: gpt-3.5-turbo-16k
/// instructions: You are a personal article summarizer Assistant ...
/// run_instructions: Summarize the news on this topic {topic}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AssistantProfile {
    pub name: String,
    pub model: String,
    pub instructions: String,
    /// Per-run instructions; `{topic}` is replaced with the submitted topic.
    pub run_instructions: String,
}

impl Default for AssistantProfile {
    fn default() -> Self {
        Self {
            name: "News Summarizer".to_string(),
            model: "gpt-3.5-turbo-16k".to_string(),
            instructions: "You are a personal article summarizer Assistant who knows how to take a \
                           list of article's titles and descriptions and then write a short summary \
                           of all the news articles"
                .to_string(),
            run_instructions: "Summarize the news on this topic: {topic}".to_string(),
        }
    }
}

impl AssistantProfile {
    pub fn run_instructions_for(&self, topic: &str) -> String {
        self.run_instructions.replace("{topic}", topic)
    }
}

/// Load an [`AssistantProfile`] from a YAML file. Missing keys keep their defaults.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load_profile(path: &std::path::Path) -> Result<AssistantProfile, ConfigError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::ProfileRead {
            path: path.to_path_buf(),
            source,
        })?;
    let profile: AssistantProfile = serde_yaml::from_str(&raw).map_err(|source| ConfigError::ProfileParse {
        path: path.to_path_buf(),
        source,
    })?;
    info!(name = %profile.name, model = %profile.model, "Loaded assistant profile");
    Ok(profile)
}

/// Everything one orchestrator needs besides its API clients.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub ids: ResourceIds,
    pub profile: AssistantProfile,
    pub policy: PollPolicy,
}

/// Fully resolved program settings.
#[derive(Clone)]
pub struct Settings {
    pub news_api_key: String,
    pub news_api_url: Url,
    pub page_size: u32,
    pub openai_api_key: String,
    pub openai_base_url: Url,
    /// Retries after a transient assistant API failure.
    pub max_retries: usize,
    pub orchestrator: OrchestratorConfig,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("news_api_url", &self.news_api_url.as_str())
            .field("page_size", &self.page_size)
            .field("openai_base_url", &self.openai_base_url.as_str())
            .field("max_retries", &self.max_retries)
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

fn parse_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
        name,
        value: value.to_string(),
        source,
    })
}

impl Settings {
    pub async fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        if cli.page_size == 0 {
            return Err(ConfigError::Zero("--page-size"));
        }
        if cli.max_polls == 0 {
            return Err(ConfigError::Zero("--max-polls"));
        }
        if cli.max_wait_secs == 0 {
            return Err(ConfigError::Zero("--max-wait-secs"));
        }

        let profile = match &cli.config {
            Some(path) => load_profile(path).await?,
            None => AssistantProfile::default(),
        };

        Ok(Self {
            news_api_key: cli.news_api_key.clone(),
            news_api_url: parse_url("news API", &cli.news_api_url)?,
            page_size: cli.page_size,
            openai_api_key: cli.openai_api_key.clone(),
            openai_base_url: parse_url("OpenAI", &cli.openai_base_url)?,
            max_retries: cli.max_retries,
            orchestrator: OrchestratorConfig {
                ids: ResourceIds {
                    assistant_id: cli.assistant_id.clone().filter(|id| !id.is_empty()),
                    thread_id: cli.thread_id.clone().filter(|id| !id.is_empty()),
                },
                profile,
                policy: PollPolicy {
                    interval: Duration::from_secs(cli.poll_interval_secs),
                    max_attempts: cli.max_polls,
                    max_wait: Duration::from_secs(cli.max_wait_secs),
                },
            },
        })
    }
}
