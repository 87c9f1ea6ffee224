//! HTTP client for the hosted assistant service.
//!
//! [`AssistantApi`] is the seam the run orchestrator talks to; [`OpenAiAssistants`]
//! implements it against the OpenAI Assistants v2 REST endpoints. Every request
//! goes through a [`Backoff`] so rate limiting and server hiccups are absorbed
//! here instead of surfacing as orchestration failures.

use super::retry::Backoff;
use super::types::{
    Assistant, CreateAssistantRequest, ListOrder, ListResponse, Message, Role, Run, RunStep,
    Thread, ToolOutput,
};
use crate::utils::truncate_for_log;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::fmt;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Default base URL of the hosted assistant service.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Page size requested from list endpoints (the service maximum).
const LIST_LIMIT: &str = "100";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("service responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ApiError::Status { status, .. } => *status == 429 || *status >= 500,
            ApiError::Decode { .. } => false,
        }
    }

    /// Whether the request failed before reaching the service, so repeating
    /// it cannot apply a write twice.
    pub fn never_sent(&self) -> bool {
        matches!(self, ApiError::Transport(e) if e.is_connect())
    }
}

/// Operations of the hosted assistant service used by this program.
pub trait AssistantApi {
    async fn create_assistant(&self, request: &CreateAssistantRequest) -> Result<Assistant, ApiError>;

    async fn retrieve_assistant(&self, assistant_id: &str) -> Result<Assistant, ApiError>;

    async fn create_thread(&self) -> Result<Thread, ApiError>;

    async fn retrieve_thread(&self, thread_id: &str) -> Result<Thread, ApiError>;

    async fn create_message(&self, thread_id: &str, role: Role, content: &str) -> Result<Message, ApiError>;

    /// List a thread's messages sorted by creation time in `order`.
    async fn list_messages(&self, thread_id: &str, order: ListOrder) -> Result<Vec<Message>, ApiError>;

    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        instructions: Option<&str>,
    ) -> Result<Run, ApiError>;

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, ApiError>;

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, ApiError>;

    /// Steps of a run in execution order.
    async fn list_run_steps(&self, thread_id: &str, run_id: &str) -> Result<Vec<RunStep>, ApiError>;
}

/// [`AssistantApi`] over the OpenAI Assistants v2 REST API.
#[derive(Clone)]
pub struct OpenAiAssistants {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    backoff: Backoff,
}

impl fmt::Debug for OpenAiAssistants {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiAssistants")
            .field("base_url", &self.base_url)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl OpenAiAssistants {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<T, ApiError> {
        // Writes such as run creation are not idempotent: a 5xx or timeout may
        // arrive after the service applied them.
        let retry_if: fn(&ApiError) -> bool = if method == Method::GET {
            ApiError::is_transient
        } else {
            ApiError::never_sent
        };
        self.backoff
            .run(path, retry_if, || self.send_once(method.clone(), path, query, body.as_ref()))
            .await
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<T, ApiError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self
            .http
            .request(method, &url)
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        debug!(%status, path, bytes = text.len(), "Assistant API response");

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: truncate_for_log(&text, 500),
            });
        }

        serde_json::from_str(&text).map_err(|source| ApiError::Decode {
            path: path.to_string(),
            source,
        })
    }
}

impl AssistantApi for OpenAiAssistants {
    #[instrument(level = "info", skip_all, fields(name = %request.name, model = %request.model))]
    async fn create_assistant(&self, request: &CreateAssistantRequest) -> Result<Assistant, ApiError> {
        self.send(Method::POST, "assistants", &[], Some(json!(request))).await
    }

    #[instrument(level = "info", skip(self))]
    async fn retrieve_assistant(&self, assistant_id: &str) -> Result<Assistant, ApiError> {
        self.send(Method::GET, &format!("assistants/{assistant_id}"), &[], None)
            .await
    }

    #[instrument(level = "info", skip(self))]
    async fn create_thread(&self) -> Result<Thread, ApiError> {
        self.send(Method::POST, "threads", &[], Some(json!({}))).await
    }

    #[instrument(level = "info", skip(self))]
    async fn retrieve_thread(&self, thread_id: &str) -> Result<Thread, ApiError> {
        self.send(Method::GET, &format!("threads/{thread_id}"), &[], None)
            .await
    }

    #[instrument(level = "info", skip(self, content), fields(%role, bytes = content.len()))]
    async fn create_message(&self, thread_id: &str, role: Role, content: &str) -> Result<Message, ApiError> {
        let body = json!({ "role": role, "content": content });
        self.send(Method::POST, &format!("threads/{thread_id}/messages"), &[], Some(body))
            .await
    }

    #[instrument(level = "info", skip(self))]
    async fn list_messages(&self, thread_id: &str, order: ListOrder) -> Result<Vec<Message>, ApiError> {
        let page: ListResponse<Message> = self
            .send(
                Method::GET,
                &format!("threads/{thread_id}/messages"),
                &[("order", order.as_str()), ("limit", LIST_LIMIT)],
                None,
            )
            .await?;
        Ok(page.data)
    }

    #[instrument(level = "info", skip(self, instructions))]
    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        instructions: Option<&str>,
    ) -> Result<Run, ApiError> {
        let mut body = json!({ "assistant_id": assistant_id });
        if let Some(instructions) = instructions {
            body["instructions"] = json!(instructions);
        }
        self.send(Method::POST, &format!("threads/{thread_id}/runs"), &[], Some(body))
            .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, ApiError> {
        self.send(Method::GET, &format!("threads/{thread_id}/runs/{run_id}"), &[], None)
            .await
    }

    #[instrument(level = "info", skip(self, outputs), fields(count = outputs.len()))]
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, ApiError> {
        let body = json!({ "tool_outputs": outputs });
        self.send(
            Method::POST,
            &format!("threads/{thread_id}/runs/{run_id}/submit_tool_outputs"),
            &[],
            Some(body),
        )
        .await
    }

    #[instrument(level = "info", skip(self))]
    async fn list_run_steps(&self, thread_id: &str, run_id: &str) -> Result<Vec<RunStep>, ApiError> {
        let page: ListResponse<RunStep> = self
            .send(
                Method::GET,
                &format!("threads/{thread_id}/runs/{run_id}/steps"),
                &[("order", ListOrder::Asc.as_str()), ("limit", LIST_LIMIT)],
                None,
            )
            .await?;
        if page.has_more {
            warn!(shown = page.data.len(), "Run has more steps than one page; the rest are not listed");
        }
        Ok(page.data)
    }
}
