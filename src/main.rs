//! # News Assistant
//!
//! Fetches news articles for a topic and has a hosted assistant summarize them.
//!
//! ## Features
//!
//! - Searches the NewsAPI `everything` endpoint for a topic
//! - Creates (or reuses) an assistant that can call a local `get_news` function
//! - Drives each assistant run to completion, serving its function calls
//! - Shows the summary and the run's step trace in a one-form web page
//!
//! ## Usage
//!
//! ```sh
//! news_assistant serve --bind 127.0.0.1:8501
//! news_assistant ask bitcoin
//! news_assistant news bitcoin
//! ```
//!
//! ## Architecture
//!
//! 1. **News**: [`news`] turns a topic into a page of articles
//! 2. **Dispatch**: [`dispatch`] maps assistant function calls to local code
//! 3. **Orchestration**: [`orchestrator`] creates the run and polls it to a summary
//! 4. **Presentation**: [`web`] renders the form, summary, and step trace

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod assistant;
mod cli;
mod config;
mod dispatch;
mod models;
mod news;
mod orchestrator;
mod utils;
mod web;

use assistant::OpenAiAssistants;
use assistant::retry::Backoff;
use cli::{Cli, Command};
use config::Settings;
use dispatch::Dispatcher;
use news::{NewsClient, NewsSource};
use orchestrator::summarize_topic;
use utils::format_timestamp;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // .env first so RUST_LOG and the API keys in it are visible below.
    let dotenv = dotenvy::dotenv();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("news_assistant starting up");
    match dotenv {
        Ok(path) => debug!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => debug!("No .env file found"),
        Err(e) => warn!(error = %e, "Failed to load .env; continuing with the process environment"),
    }

    let args = Cli::parse();
    debug!(command = ?args.command, "Parsed CLI arguments");

    let settings = Settings::from_cli(&args).await?;
    debug!(?settings, "Resolved settings");

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let news = NewsClient::new(
        http.clone(),
        settings.news_api_url.clone(),
        settings.news_api_key.clone(),
    );
    let api = OpenAiAssistants::new(
        http,
        settings.openai_base_url.as_str(),
        settings.openai_api_key.clone(),
    )
    .with_backoff(Backoff::new(settings.max_retries, Duration::from_secs(1)));

    match args.command {
        Command::News { topic } => {
            let articles = news
                .fetch(&topic, settings.page_size)
                .await
                .ok_or("news API request failed; see the log for details")?;
            info!(count = articles.len(), "Printing articles");
            for article in &articles {
                println!("{}", article.brief());
            }
        }
        Command::Ask { topic } => {
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            let dispatcher = Dispatcher::new(news, settings.page_size);

            match summarize_topic(&api, &dispatcher, &settings.orchestrator, &topic, &cancel).await {
                Ok(briefing) => {
                    println!("{}\n", briefing.summary);
                    println!("Run steps ({}):", briefing.run_id);
                    for step in &briefing.steps {
                        println!(
                            "  {}  {:<16} {:<10} {}",
                            format_timestamp(step.created_at),
                            step.kind,
                            step.status,
                            step.detail()
                        );
                    }
                }
                Err(e) => {
                    error!(error = %e, %topic, "Summarization failed");
                    return Err(e.into());
                }
            }
        }
        Command::Serve { bind } => {
            let shutdown = CancellationToken::new();
            cancel_on_ctrl_c(shutdown.clone());
            let state = web::AppState {
                api: Arc::new(api),
                dispatcher: Arc::new(Dispatcher::new(news, settings.page_size)),
                config: Arc::new(settings.orchestrator.clone()),
                shutdown,
            };
            web::serve(state, bind).await?;
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}

/// Cancel `token` when the process receives Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; shutting down");
            token.cancel();
        }
    });
}
