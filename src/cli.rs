//! Command-line interface definitions for News Assistant.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Every global option can also be provided through an environment variable
//! (or a `.env` file, which is loaded before parsing).

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::assistant::client::DEFAULT_OPENAI_BASE_URL;
use crate::news::DEFAULT_NEWS_API_URL;

/// Command-line arguments for the News Assistant application.
///
/// # Examples
///
/// ```sh
/// # Serve the web form on the default address
/// news_assistant serve
///
/// # Summarize one topic in the terminal, reusing an existing assistant
/// news_assistant --assistant-id asst_123 ask bitcoin
///
/// # Only print the articles the news API returns
/// news_assistant news "rust language"
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// NewsAPI key
    #[arg(long, env = "NEWS_API_KEY", hide_env_values = true)]
    pub news_api_key: String,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: String,

    /// Base URL of the assistant API
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    pub openai_base_url: String,

    /// News search endpoint
    #[arg(long, env = "NEWS_API_URL", default_value = DEFAULT_NEWS_API_URL)]
    pub news_api_url: String,

    /// Existing assistant to reuse instead of creating one
    #[arg(long, env = "ASSISTANT_ID")]
    pub assistant_id: Option<String>,

    /// Existing thread to reuse instead of creating one
    #[arg(long, env = "THREAD_ID")]
    pub thread_id: Option<String>,

    /// Optional path to an assistant profile (YAML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Articles requested per news search
    #[arg(long, default_value_t = 5)]
    pub page_size: u32,

    /// Seconds to wait between run status checks
    #[arg(long, default_value_t = 5)]
    pub poll_interval_secs: u64,

    /// Maximum number of run status checks before giving up
    #[arg(long, default_value_t = 120)]
    pub max_polls: u32,

    /// Maximum seconds to wait for a run before giving up
    #[arg(long, default_value_t = 600)]
    pub max_wait_secs: u64,

    /// Retries after a transient assistant API failure
    #[arg(long, default_value_t = 5)]
    pub max_retries: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Serve the topic form over HTTP
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:8501")]
        bind: SocketAddr,
    },
    /// Summarize the news for one topic and print the result
    Ask {
        /// Topic to search and summarize
        topic: String,
    },
    /// Print the articles found for a topic without summarizing them
    News {
        /// Topic to search
        topic: String,
    },
}
