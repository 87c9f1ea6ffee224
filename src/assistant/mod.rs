//! Hosted assistant service: wire types, HTTP client, and retry policy.
//!
//! # Submodules
//!
//! - [`types`]: Assistants, threads, messages, runs, and run steps as the service returns them
//! - [`client`]: The [`AssistantApi`] trait and its OpenAI implementation
//! - [`retry`]: Exponential backoff applied to every request

pub mod client;
pub mod retry;
pub mod types;

pub use client::{ApiError, AssistantApi, OpenAiAssistants};
