//! Drives one assistant run from creation to a summary.
//!
//! A [`RunOrchestrator`] holds at most one assistant, one thread, and one run.
//! After a run is started, [`RunOrchestrator::poll_until_terminal`] checks its
//! status on a fixed interval:
//!
//! ```text
//! queued / in_progress / cancelling / unknown ──▶ keep polling
//! requires_action ──▶ dispatch every tool call ──▶ submit outputs ──▶ keep polling
//! completed ──▶ newest thread message becomes the summary
//! failed / cancelled / expired / incomplete ──▶ OrchestrationError::RunFailed
//! ```
//!
//! Polling is bounded by a [`PollPolicy`] and can be interrupted with a
//! [`CancellationToken`].

use crate::assistant::types::{
    Assistant, CreateAssistantRequest, ListOrder, Message, Role, Run, RunStatus, RunStep, Thread,
    ToolOutput,
};
use crate::assistant::{ApiError, AssistantApi};
use crate::config::{AssistantProfile, OrchestratorConfig, PollPolicy, ResourceIds};
use crate::dispatch::{Capability, DispatchError, Dispatcher};
use crate::news::NewsSource;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("assistant API call failed: {0}")]
    Api(#[from] ApiError),

    #[error("tool call {tool_call_id} failed: {source}")]
    Dispatch {
        tool_call_id: String,
        #[source]
        source: DispatchError,
    },

    #[error("run {run_id} ended with status `{status}`: {}", .detail.as_deref().unwrap_or("no error detail"))]
    RunFailed {
        run_id: String,
        status: RunStatus,
        detail: Option<String>,
    },

    #[error("run {run_id} requires an unsupported action `{kind}`")]
    UnsupportedAction { run_id: String, kind: String },

    #[error("run {run_id} completed but the thread has no messages")]
    EmptyCompletion { run_id: String },

    #[error("run {run_id} still `{last_status}` after {attempts} status checks ({elapsed:?})")]
    Timeout {
        run_id: String,
        last_status: RunStatus,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("cancelled {}", cancelled_stage(.run_id))]
    Cancelled { run_id: Option<String> },

    #[error("no run has been started")]
    NoActiveRun,

    #[error("run {run_id} is still in flight")]
    RunInFlight { run_id: String },
}

fn cancelled_stage(run_id: &Option<String>) -> String {
    match run_id {
        Some(id) => format!("while polling run {id}"),
        None => "before a run was started".to_string(),
    }
}

/// Where a polling loop got to, kept outside it so a timeout can report it.
#[derive(Debug, Clone, Copy)]
struct PollProgress {
    attempts: u32,
    last_status: RunStatus,
}

/// Owns the assistant/thread/run triple of one submission.
pub struct RunOrchestrator<'a, A, N> {
    api: &'a A,
    dispatcher: &'a Dispatcher<N>,
    ids: ResourceIds,
    policy: PollPolicy,
    assistant: Option<Assistant>,
    thread: Option<Thread>,
    run: Option<Run>,
    summary: Option<String>,
}

impl<'a, A, N> RunOrchestrator<'a, A, N>
where
    A: AssistantApi,
    N: NewsSource,
{
    /// An orchestrator that has not touched the service yet.
    pub fn new(api: &'a A, dispatcher: &'a Dispatcher<N>, ids: ResourceIds, policy: PollPolicy) -> Self {
        Self {
            api,
            dispatcher,
            ids,
            policy,
            assistant: None,
            thread: None,
            run: None,
            summary: None,
        }
    }

    /// Build an orchestrator and resolve its assistant and thread up front.
    pub async fn connect(
        api: &'a A,
        dispatcher: &'a Dispatcher<N>,
        ids: ResourceIds,
        profile: &AssistantProfile,
        policy: PollPolicy,
    ) -> Result<Self, OrchestrationError> {
        let mut orchestrator = Self::new(api, dispatcher, ids, policy);
        orchestrator.ensure_assistant(profile).await?;
        orchestrator.ensure_thread().await?;
        Ok(orchestrator)
    }

    pub fn assistant(&self) -> Option<&Assistant> {
        self.assistant.as_ref()
    }

    pub fn thread(&self) -> Option<&Thread> {
        self.thread.as_ref()
    }

    pub fn run(&self) -> Option<&Run> {
        self.run.as_ref()
    }

    /// Reuse the held or configured assistant, or create one from `profile`.
    ///
    /// A configured id is retrieved as-is; its configuration is not compared
    /// against `profile`.
    #[instrument(level = "info", skip_all)]
    pub async fn ensure_assistant(&mut self, profile: &AssistantProfile) -> Result<&Assistant, OrchestrationError> {
        let assistant = match self.assistant.take() {
            Some(assistant) => assistant,
            None => match self.ids.assistant_id.as_deref() {
                Some(id) => {
                    let assistant = self.api.retrieve_assistant(id).await?;
                    info!(assistant_id = %assistant.id, "Reusing configured assistant");
                    assistant
                }
                None => {
                    let request = CreateAssistantRequest {
                        model: profile.model.clone(),
                        name: profile.name.clone(),
                        instructions: profile.instructions.clone(),
                        tools: Capability::tool_specs(),
                    };
                    let assistant = self.api.create_assistant(&request).await?;
                    info!(assistant_id = %assistant.id, "Created assistant");
                    assistant
                }
            },
        };
        let assistant: &Assistant = self.assistant.insert(assistant);
        Ok(assistant)
    }

    /// Reuse the held or configured thread, or create an empty one.
    #[instrument(level = "info", skip_all)]
    pub async fn ensure_thread(&mut self) -> Result<&Thread, OrchestrationError> {
        let thread = match self.thread.take() {
            Some(thread) => thread,
            None => match self.ids.thread_id.as_deref() {
                Some(id) => {
                    let thread = self.api.retrieve_thread(id).await?;
                    info!(thread_id = %thread.id, "Reusing configured thread");
                    thread
                }
                None => {
                    let thread = self.api.create_thread().await?;
                    info!(thread_id = %thread.id, "Created thread");
                    thread
                }
            },
        };
        let thread: &Thread = self.thread.insert(thread);
        Ok(thread)
    }

    /// Append a message to the thread.
    ///
    /// Without a thread this does nothing and returns `Ok(None)`.
    #[instrument(level = "info", skip(self, content))]
    pub async fn post_message(&mut self, role: Role, content: &str) -> Result<Option<Message>, OrchestrationError> {
        let Some(thread) = &self.thread else {
            warn!("No thread yet; message not posted");
            return Ok(None);
        };
        let message = self.api.create_message(&thread.id, role, content).await?;
        debug!(message_id = %message.id, "Posted message");
        Ok(Some(message))
    }

    /// Start a run of the assistant over the thread.
    ///
    /// Without an assistant or a thread this does nothing and returns `Ok(None)`.
    #[instrument(level = "info", skip_all)]
    pub async fn start_run(&mut self, instructions: Option<&str>) -> Result<Option<&Run>, OrchestrationError> {
        let (Some(assistant), Some(thread)) = (&self.assistant, &self.thread) else {
            warn!("Assistant or thread missing; run not started");
            return Ok(None);
        };
        if let Some(run) = &self.run {
            if !run.status.is_terminal() {
                return Err(OrchestrationError::RunInFlight { run_id: run.id.clone() });
            }
        }

        let run = self.api.create_run(&thread.id, &assistant.id, instructions).await?;
        info!(run_id = %run.id, status = %run.status, "Started run");
        self.summary = None;
        let run: &Run = self.run.insert(run);
        Ok(Some(run))
    }

    /// Poll the current run until it completes, fails, or the policy runs out.
    ///
    /// On completion the newest thread message is recorded as the summary and
    /// returned.
    #[instrument(level = "info", skip_all, fields(run_id))]
    pub async fn poll_until_terminal(&mut self, cancel: &CancellationToken) -> Result<String, OrchestrationError> {
        let (thread_id, run_id, last_status) = match (&self.thread, &self.run) {
            (Some(thread), Some(run)) => (thread.id.clone(), run.id.clone(), run.status),
            _ => return Err(OrchestrationError::NoActiveRun),
        };
        tracing::Span::current().record("run_id", run_id.as_str());

        let started = Instant::now();
        // Far enough out to never fire when `max_wait` overflows the clock.
        let deadline = started
            .checked_add(self.policy.max_wait)
            .unwrap_or_else(|| started + Duration::from_secs(86_400 * 365));
        let mut progress = PollProgress {
            attempts: 0,
            last_status,
        };

        // Cancellation and the wall-clock bound cover whole iterations, so a
        // status check stuck in API retries or tool dispatch is cut short too.
        let outcome = {
            let polling = timeout_at(deadline, self.poll_iterations(&thread_id, &run_id, &mut progress));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                finished = polling => Some(finished),
            }
        };

        let completed = match outcome {
            None => {
                warn!(attempts = progress.attempts, "Polling cancelled");
                return Err(OrchestrationError::Cancelled { run_id: Some(run_id) });
            }
            Some(Ok(result)) => result?,
            Some(Err(_elapsed)) => None,
        };
        if let Some(summary) = completed {
            return Ok(summary);
        }

        let elapsed = started.elapsed();
        warn!(attempts = progress.attempts, ?elapsed, status = %progress.last_status, "Gave up waiting for run");
        Err(OrchestrationError::Timeout {
            run_id,
            last_status: progress.last_status,
            attempts: progress.attempts,
            elapsed,
        })
    }

    /// Status checks until the run completes (`Some(summary)`), fails, or the
    /// attempt budget is spent (`None`).
    async fn poll_iterations(
        &mut self,
        thread_id: &str,
        run_id: &str,
        progress: &mut PollProgress,
    ) -> Result<Option<String>, OrchestrationError> {
        while progress.attempts < self.policy.max_attempts {
            sleep(self.policy.interval).await;
            progress.attempts += 1;

            let run = self.api.retrieve_run(thread_id, run_id).await?;
            progress.last_status = run.status;
            debug!(attempts = progress.attempts, status = %run.status, "Polled run");

            match run.status {
                RunStatus::Completed => {
                    self.run = Some(run);
                    let summary = self.latest_message_text(thread_id, run_id).await?;
                    info!(attempts = progress.attempts, bytes = summary.len(), "Run completed");
                    self.summary = Some(summary.clone());
                    return Ok(Some(summary));
                }
                RunStatus::RequiresAction => {
                    let outputs = self.serve_required_action(&run).await?;
                    let run = self.api.submit_tool_outputs(thread_id, run_id, &outputs).await?;
                    info!(count = outputs.len(), status = %run.status, "Submitted tool outputs");
                    progress.last_status = run.status;
                    self.run = Some(run);
                }
                status if status.is_failure() => {
                    let detail = run.last_error.as_ref().map(ToString::to_string);
                    warn!(%status, ?detail, "Run ended without completing");
                    self.run = Some(run);
                    return Err(OrchestrationError::RunFailed {
                        run_id: run_id.to_string(),
                        status,
                        detail,
                    });
                }
                _ => {
                    self.run = Some(run);
                }
            }
        }
        Ok(None)
    }

    /// Dispatch every outstanding tool call of `run`. The first failure aborts
    /// the whole batch.
    async fn serve_required_action(&self, run: &Run) -> Result<Vec<ToolOutput>, OrchestrationError> {
        let Some(action) = &run.required_action else {
            return Err(OrchestrationError::UnsupportedAction {
                run_id: run.id.clone(),
                kind: "none".to_string(),
            });
        };
        if action.kind != "submit_tool_outputs" {
            return Err(OrchestrationError::UnsupportedAction {
                run_id: run.id.clone(),
                kind: action.kind.clone(),
            });
        }

        let mut outputs = Vec::with_capacity(action.tool_calls().len());
        for call in action.tool_calls() {
            let output = self
                .dispatcher
                .dispatch(&call.function)
                .await
                .map_err(|source| OrchestrationError::Dispatch {
                    tool_call_id: call.id.clone(),
                    source,
                })?;
            outputs.push(ToolOutput {
                tool_call_id: call.id.clone(),
                output,
            });
        }
        Ok(outputs)
    }

    async fn latest_message_text(&self, thread_id: &str, run_id: &str) -> Result<String, OrchestrationError> {
        let messages = self.api.list_messages(thread_id, ListOrder::Desc).await?;
        let latest = messages
            .into_iter()
            .next()
            .ok_or_else(|| OrchestrationError::EmptyCompletion {
                run_id: run_id.to_string(),
            })?;
        Ok(latest.text())
    }

    /// The summary of the last completed run, if any.
    pub fn get_summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Steps the current run executed, oldest first. Empty when no run exists.
    pub async fn list_run_steps(&self) -> Result<Vec<RunStep>, OrchestrationError> {
        let (Some(thread), Some(run)) = (&self.thread, &self.run) else {
            return Ok(Vec::new());
        };
        Ok(self.api.list_run_steps(&thread.id, &run.id).await?)
    }
}

/// Outcome of one successful topic submission.
#[derive(Debug, Clone)]
pub struct Briefing {
    pub topic: String,
    pub run_id: String,
    pub summary: String,
    pub steps: Vec<RunStep>,
}

/// Run one full submission: resolve assistant and thread, post the topic,
/// start a run, and poll it to a summary.
///
/// Cancelling `cancel` stops the submission at whatever stage it is in. The
/// step trace is best effort: failing to list it is logged and yields an empty
/// trace rather than discarding the summary.
#[instrument(level = "info", skip(api, dispatcher, config, cancel))]
pub async fn summarize_topic<A, N>(
    api: &A,
    dispatcher: &Dispatcher<N>,
    config: &OrchestratorConfig,
    topic: &str,
    cancel: &CancellationToken,
) -> Result<Briefing, OrchestrationError>
where
    A: AssistantApi,
    N: NewsSource,
{
    let prepare = async {
        let mut orchestrator =
            RunOrchestrator::connect(api, dispatcher, config.ids.clone(), &config.profile, config.policy).await?;
        if let (Some(assistant), Some(thread)) = (orchestrator.assistant(), orchestrator.thread()) {
            debug!(assistant_id = %assistant.id, thread_id = %thread.id, "Connected");
        }

        orchestrator.post_message(Role::User, topic).await?;
        let instructions = config.profile.run_instructions_for(topic);
        let run_id = match orchestrator.start_run(Some(&instructions)).await? {
            Some(run) => run.id.clone(),
            None => return Err(OrchestrationError::NoActiveRun),
        };
        Ok::<_, OrchestrationError>((orchestrator, run_id))
    };
    let (mut orchestrator, run_id) = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            warn!("Cancelled before the run started");
            return Err(OrchestrationError::Cancelled { run_id: None });
        }
        prepared = prepare => prepared?,
    };

    orchestrator.poll_until_terminal(cancel).await?;
    let summary = orchestrator
        .get_summary()
        .map(str::to_string)
        .ok_or_else(|| OrchestrationError::EmptyCompletion { run_id: run_id.clone() })?;
    if let Some(run) = orchestrator.run() {
        debug!(run_id = %run.id, status = %run.status, "Run finished");
    }

    let steps = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            warn!("Cancelled while listing run steps");
            Vec::new()
        }
        listed = orchestrator.list_run_steps() => match listed {
            Ok(steps) => steps,
            Err(e) => {
                warn!(error = %e, "Could not list run steps");
                Vec::new()
            }
        },
    };

    Ok(Briefing {
        topic: topic.to_string(),
        run_id,
        summary,
        steps,
    })
}
