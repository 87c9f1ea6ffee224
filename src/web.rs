//! The topic form served over HTTP.
//!
//! `GET /` renders an empty form. `POST /` runs one complete submission with a
//! fresh orchestrator and renders either the summary and the run's step trace,
//! or a visible failure block. Submissions share nothing except the HTTP
//! clients, so concurrent users never see each other's runs.

use crate::assistant::OpenAiAssistants;
use crate::config::OrchestratorConfig;
use crate::dispatch::Dispatcher;
use crate::news::NewsClient;
use crate::orchestrator::{Briefing, OrchestrationError, summarize_topic};
use crate::utils::format_timestamp;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::{Form, Router};
use html_escape::{encode_double_quoted_attribute, encode_text};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

#[derive(Clone)]
pub struct AppState {
    pub api: Arc<OpenAiAssistants>,
    pub dispatcher: Arc<Dispatcher<NewsClient>>,
    pub config: Arc<OrchestratorConfig>,
    /// Cancelled on shutdown; every submission polls under a child token.
    pub shutdown: CancellationToken,
}

#[derive(Debug, Deserialize)]
pub struct TopicForm {
    #[serde(default)]
    pub topic: String,
}

/// What the page shows below the form.
#[derive(Debug)]
pub enum Page<'a> {
    Empty,
    Invalid(&'a str),
    Done(&'a Briefing),
    Failed { topic: &'a str, message: String },
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index).post(submit))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the form until `state.shutdown` is cancelled.
pub async fn serve(state: AppState, bind: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "Serving topic form");
    let shutdown = state.shutdown.clone();
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn index() -> Html<String> {
    Html(render_page(&Page::Empty))
}

async fn health() -> &'static str {
    "ok"
}

#[instrument(level = "info", skip_all, fields(topic = %form.topic))]
async fn submit(State(state): State<AppState>, Form(form): Form<TopicForm>) -> (StatusCode, Html<String>) {
    let topic = form.topic.trim();
    if topic.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Html(render_page(&Page::Invalid("Enter a topic to summarize."))),
        );
    }

    let cancel = state.shutdown.child_token();
    let outcome = summarize_topic(
        state.api.as_ref(),
        state.dispatcher.as_ref(),
        &state.config,
        topic,
        &cancel,
    )
    .await;
    respond(topic, outcome)
}

/// Turn a submission outcome into a status code and page.
pub fn respond(topic: &str, outcome: Result<Briefing, OrchestrationError>) -> (StatusCode, Html<String>) {
    match outcome {
        Ok(briefing) => {
            info!(run_id = %briefing.run_id, steps = briefing.steps.len(), "Rendered summary");
            (StatusCode::OK, Html(render_page(&Page::Done(&briefing))))
        }
        Err(e) => {
            error!(error = %e, "Submission failed");
            let page = Page::Failed {
                topic,
                message: e.to_string(),
            };
            (StatusCode::BAD_GATEWAY, Html(render_page(&page)))
        }
    }
}

const HEAD: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>News Summarizer</title>
<style>
body { font-family: sans-serif; max-width: 52rem; margin: 2rem auto; }
textarea { width: 100%; min-height: 12rem; }
.failure { border: 1px solid #b00; background: #fee; padding: 0.5rem 1rem; }
table { border-collapse: collapse; } td, th { padding: 0.2rem 0.6rem; text-align: left; }
</style>
</head>
<body>
<h1>News Summarizer</h1>
"#;

const TAIL: &str = "</body>\n</html>\n";

pub fn render_page(page: &Page<'_>) -> String {
    let topic = match page {
        Page::Done(briefing) => briefing.topic.as_str(),
        Page::Failed { topic, .. } => *topic,
        Page::Empty | Page::Invalid(_) => "",
    };

    let mut html = String::from(HEAD);
    html.push_str(&format!(
        r#"<form method="post" action="/">
<label for="topic">Enter topic:</label>
<input id="topic" name="topic" type="text" value="{}" required>
<button type="submit">Run Assistant</button>
</form>
"#,
        encode_double_quoted_attribute(topic)
    ));

    match page {
        Page::Empty => {}
        Page::Invalid(message) => {
            html.push_str(&format!("<p class=\"failure\">{}</p>\n", encode_text(message)));
        }
        Page::Done(briefing) => {
            html.push_str(&format!(
                "<h2>Summary</h2>\n<textarea readonly>{}</textarea>\n",
                encode_text(&briefing.summary)
            ));
            html.push_str(&render_steps(briefing));
        }
        Page::Failed { message, .. } => {
            html.push_str(&format!(
                "<div class=\"failure\"><h2>Failure</h2>\n<p>{}</p></div>\n",
                encode_text(message)
            ));
        }
    }

    html.push_str(TAIL);
    html
}

fn render_steps(briefing: &Briefing) -> String {
    let mut html = format!(
        "<h2>Run steps</h2>\n<p>Run <code>{}</code></p>\n<table>\n<tr><th>Created</th><th>Type</th><th>Status</th><th>Detail</th></tr>\n",
        encode_text(&briefing.run_id)
    );
    for step in &briefing.steps {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            format_timestamp(step.created_at),
            encode_text(&step.kind),
            encode_text(&step.status),
            encode_text(&step.detail()),
        ));
    }
    html.push_str("</table>\n");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::retry::Backoff;
    use crate::assistant::types::{Role, RunStatus, RunStep};
    use crate::orchestrator::tests::{FixedNews, ScriptedApi, fast_policy, text_message};
    use serde_json::json;
    use url::Url;

    fn briefing(summary: &str) -> Briefing {
        Briefing {
            topic: "bitcoin".to_string(),
            run_id: "run_1".to_string(),
            summary: summary.to_string(),
            steps: vec![
                serde_json::from_value::<RunStep>(json!({
                    "id": "step_1",
                    "type": "tool_calls",
                    "status": "completed",
                    "created_at": 1700000000,
                    "step_details": { "tool_calls": [{ "function": { "name": "get_news" } }] }
                }))
                .unwrap(),
            ],
        }
    }

    #[test]
    fn test_empty_page_has_form() {
        let html = render_page(&Page::Empty);
        assert!(html.contains(r#"<form method="post" action="/">"#));
        assert!(html.contains(r#"name="topic""#));
        assert!(!html.contains("<h2>Summary</h2>"));
    }

    #[test]
    fn test_done_page_shows_summary_and_steps() {
        let b = briefing("Bitcoin climbed.");
        let html = render_page(&Page::Done(&b));
        assert!(html.contains("<textarea readonly>Bitcoin climbed.</textarea>"));
        assert!(html.contains("<td>get_news</td>"));
        assert!(html.contains("2023-11-14 22:13:20 UTC"));
        assert!(html.contains(r#"value="bitcoin""#));
    }

    #[test]
    fn test_remote_text_is_escaped() {
        let b = briefing("<script>alert(1)</script>");
        let html = render_page(&Page::Done(&b));
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));

        let page = Page::Failed {
            topic: r#""><b>"#,
            message: "x".to_string(),
        };
        assert!(!render_page(&page).contains(r#""><b>"#));
    }

    #[tokio::test]
    async fn test_empty_completion_renders_failure() {
        let mut api = ScriptedApi::with_statuses(&[RunStatus::Completed]);
        api.messages = Vec::new();
        let dispatcher = Dispatcher::new(FixedNews(Some(Vec::new())), 5);
        let config = OrchestratorConfig {
            policy: fast_policy(),
            ..Default::default()
        };

        let outcome = summarize_topic(&api, &dispatcher, &config, "bitcoin", &CancellationToken::new()).await;
        let (status, Html(body)) = respond("bitcoin", outcome);

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body.contains("<h2>Failure</h2>"));
        assert!(body.contains("has no messages"));
        assert!(!body.contains("<textarea"));
    }

    #[tokio::test]
    async fn test_successful_outcome_renders_ok() {
        let mut api = ScriptedApi::with_statuses(&[RunStatus::Completed]);
        api.messages = vec![text_message("msg_1", Role::Assistant, "All quiet.")];
        let dispatcher = Dispatcher::new(FixedNews(Some(Vec::new())), 5);
        let config = OrchestratorConfig {
            policy: fast_policy(),
            ..Default::default()
        };

        let outcome = summarize_topic(&api, &dispatcher, &config, "bitcoin", &CancellationToken::new()).await;
        let (status, Html(body)) = respond("bitcoin", outcome);

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("All quiet."));
    }

    async fn spawn_shell() -> (SocketAddr, CancellationToken) {
        // Nothing listens on port 9; these tests never reach the remote APIs.
        let http = reqwest::Client::new();
        let news = NewsClient::new(http.clone(), Url::parse("http://127.0.0.1:9/v2/everything").unwrap(), "k");
        let shutdown = CancellationToken::new();
        let state = AppState {
            api: Arc::new(OpenAiAssistants::new(http, "http://127.0.0.1:9/v1", "sk").with_backoff(Backoff::none())),
            dispatcher: Arc::new(Dispatcher::new(news, 5)),
            config: Arc::new(OrchestratorConfig::default()),
            shutdown: shutdown.clone(),
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(state)).await.unwrap();
        });
        (addr, shutdown)
    }

    #[tokio::test]
    async fn test_router_serves_form_and_rejects_blank_topic() {
        let (addr, _shutdown) = spawn_shell().await;
        let client = reqwest::Client::new();

        let index = client.get(format!("http://{addr}/")).send().await.unwrap();
        assert_eq!(index.status().as_u16(), 200);
        assert!(index.text().await.unwrap().contains("Enter topic:"));

        let health = client.get(format!("http://{addr}/health")).send().await.unwrap();
        assert_eq!(health.text().await.unwrap(), "ok");

        let blank = client
            .post(format!("http://{addr}/"))
            .header("content-type", "application/x-www-form-urlencoded")
            .body("topic=+++")
            .send()
            .await
            .unwrap();
        assert_eq!(blank.status().as_u16(), 400);
        assert!(blank.text().await.unwrap().contains("Enter a topic to summarize."));
    }

    #[tokio::test]
    async fn test_unreachable_service_renders_failure() {
        let (addr, _shutdown) = spawn_shell().await;

        let response = reqwest::Client::new()
            .post(format!("http://{addr}/"))
            .header("content-type", "application/x-www-form-urlencoded")
            .body("topic=bitcoin")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 502);
        let body = response.text().await.unwrap();
        assert!(body.contains("<h2>Failure</h2>"));
        assert!(body.contains(r#"value="bitcoin""#));
    }
}
