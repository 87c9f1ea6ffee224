//! Local functions the assistant may call mid-run.
//!
//! Every callable is a variant of [`Capability`]. The assistant refers to them
//! by wire name; [`Capability::from_name`] maps the name back and
//! [`Dispatcher::dispatch`] executes it with an exhaustive `match`, so adding a
//! capability forces both its declaration and its execution to be written.

use crate::assistant::types::{FunctionCall, ToolSpec};
use crate::models::Article;
use crate::news::NewsSource;
use itertools::Itertools;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown function `{0}` requested by the assistant")]
    UnknownCapability(String),

    #[error("invalid arguments for `{function}`: {source}")]
    InvalidArguments {
        function: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("`{0}` requires a non-empty topic")]
    MissingTopic(&'static str),

    #[error("news search for `{topic}` returned no usable response")]
    NewsUnavailable { topic: String },
}

/// Functions this program can run on behalf of the assistant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Fetch the first page of news articles for a topic.
    GetNews,
}

impl Capability {
    pub const ALL: [Capability; 1] = [Capability::GetNews];

    /// Name the assistant uses to request this capability.
    pub fn name(self) -> &'static str {
        match self {
            Capability::GetNews => "get_news",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, DispatchError> {
        Self::ALL
            .into_iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| DispatchError::UnknownCapability(name.to_string()))
    }

    /// The declaration sent to the service when the assistant is created.
    pub fn tool_spec(self) -> ToolSpec {
        match self {
            Capability::GetNews => ToolSpec::function(
                self.name(),
                "Get the list of articles/news for the given topic",
                json!({
                    "type": "object",
                    "properties": {
                        "topic": {
                            "type": "string",
                            "description": "The topic for the news, e.g. bitcoin"
                        }
                    },
                    "required": ["topic"]
                }),
            ),
        }
    }

    pub fn tool_specs() -> Vec<ToolSpec> {
        Self::ALL.into_iter().map(Capability::tool_spec).collect()
    }
}

#[derive(Debug, Deserialize)]
struct GetNewsArgs {
    topic: String,
}

/// Executes assistant-requested function calls.
#[derive(Debug)]
pub struct Dispatcher<N> {
    news: N,
    page_size: u32,
}

impl<N: NewsSource> Dispatcher<N> {
    pub fn new(news: N, page_size: u32) -> Self {
        Self { news, page_size }
    }

    /// Run one function call and return the text submitted back to the run.
    #[instrument(level = "info", skip_all, fields(function = %call.name))]
    pub async fn dispatch(&self, call: &FunctionCall) -> Result<String, DispatchError> {
        match Capability::from_name(&call.name)? {
            Capability::GetNews => {
                let args: GetNewsArgs =
                    serde_json::from_str(&call.arguments).map_err(|source| DispatchError::InvalidArguments {
                        function: call.name.clone(),
                        source,
                    })?;
                let topic = args.topic.trim();
                if topic.is_empty() {
                    return Err(DispatchError::MissingTopic(Capability::GetNews.name()));
                }

                let articles = self
                    .news
                    .fetch(topic, self.page_size)
                    .await
                    .ok_or_else(|| DispatchError::NewsUnavailable {
                        topic: topic.to_string(),
                    })?;

                // Article blocks are joined back to back, with no extra separator.
                let output = articles.iter().map(Article::brief).join("");
                info!(%topic, count = articles.len(), bytes = output.len(), "Served get_news");
                Ok(output)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Returns canned articles and records every request.
    #[derive(Default)]
    struct StubNews {
        articles: Option<Vec<Article>>,
        requests: Mutex<Vec<(String, u32)>>,
    }

    impl NewsSource for StubNews {
        async fn fetch(&self, topic: &str, max_results: u32) -> Option<Vec<Article>> {
            self.requests.lock().unwrap().push((topic.to_string(), max_results));
            self.articles.clone()
        }
    }

    fn article(title: &str) -> Article {
        Article {
            source_name: "Wire".to_string(),
            author: Some("Reporter".to_string()),
            title: title.to_string(),
            description: Some(format!("About {title}")),
            url: format!("https://example.com/{title}"),
            content: None,
        }
    }

    fn call(name: &str, arguments: &str) -> FunctionCall {
        FunctionCall {
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    #[tokio::test]
    async fn test_get_news_concatenates_article_briefs() {
        let stub = StubNews {
            articles: Some(vec![article("one"), article("two")]),
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(stub, 5);

        let output = dispatcher
            .dispatch(&call("get_news", r#"{"topic":"bitcoin"}"#))
            .await
            .unwrap();

        assert_eq!(output, format!("{}{}", article("one").brief(), article("two").brief()));
        assert_eq!(*dispatcher.news.requests.lock().unwrap(), vec![("bitcoin".to_string(), 5)]);
    }

    #[tokio::test]
    async fn test_get_news_with_no_articles_is_empty_output() {
        let stub = StubNews {
            articles: Some(Vec::new()),
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(stub, 5);

        let output = dispatcher.dispatch(&call("get_news", r#"{"topic":"x"}"#)).await.unwrap();
        assert_eq!(output, "");
    }

    #[tokio::test]
    async fn test_unknown_function_fails() {
        let dispatcher = Dispatcher::new(StubNews::default(), 5);

        let err = dispatcher.dispatch(&call("get_weather", "{}")).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownCapability(ref name) if name == "get_weather"));
        assert!(dispatcher.news.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_arguments_fail() {
        let dispatcher = Dispatcher::new(StubNews::default(), 5);

        let err = dispatcher.dispatch(&call("get_news", r#"{"subject":"x"}"#)).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidArguments { .. }));

        let err = dispatcher.dispatch(&call("get_news", r#"{"topic":"  "}"#)).await.unwrap_err();
        assert!(matches!(err, DispatchError::MissingTopic("get_news")));
    }

    #[tokio::test]
    async fn test_news_failure_is_reported() {
        let dispatcher = Dispatcher::new(StubNews::default(), 5);

        let err = dispatcher.dispatch(&call("get_news", r#"{"topic":"bitcoin"}"#)).await.unwrap_err();
        assert!(matches!(err, DispatchError::NewsUnavailable { ref topic } if topic == "bitcoin"));
    }

    #[test]
    fn test_capability_names_round_trip() {
        for capability in Capability::ALL {
            assert_eq!(Capability::from_name(capability.name()).unwrap(), capability);
        }
    }

    #[test]
    fn test_get_news_tool_spec_requires_topic() {
        let specs = Capability::tool_specs();
        assert_eq!(specs.len(), 1);
        let function = specs[0].function.as_ref().unwrap();
        assert_eq!(specs[0].kind, "function");
        assert_eq!(function.name, "get_news");
        assert_eq!(function.parameters["required"], json!(["topic"]));
        assert_eq!(function.parameters["properties"]["topic"]["type"], "string");
    }
}
