//! News-search client.
//!
//! Queries the NewsAPI `/v2/everything` endpoint for a topic and normalizes the
//! first page of results into [`Article`]s. There is deliberately no retry,
//! pagination, or caching here: the assistant asks again if it needs more.
//!
//! # Failure behavior
//!
//! | Upstream outcome | Result |
//! |------------------|--------|
//! | 2xx with `status: "ok"` | `Some(articles)` |
//! | non-2xx, or `status: "error"` | `Some(vec![])` |
//! | transport / decoding error | `None` |

use crate::models::{Article, NewsApiResponse};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// Default endpoint of the news-search API.
pub const DEFAULT_NEWS_API_URL: &str = "https://newsapi.org/v2/everything";

/// Largest `pageSize` the news-search API accepts.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Anything that can turn a topic into a page of articles.
pub trait NewsSource {
    /// Fetch at most `max_results` articles about `topic`.
    ///
    /// Returns `None` when no usable answer could be obtained at all (network
    /// failure); an upstream rejection yields an empty list instead.
    async fn fetch(&self, topic: &str, max_results: u32) -> Option<Vec<Article>>;
}

/// HTTP client for the news-search API.
#[derive(Clone)]
pub struct NewsClient {
    http: reqwest::Client,
    endpoint: Url,
    api_key: String,
}

impl std::fmt::Debug for NewsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewsClient")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

impl NewsClient {
    pub fn new(http: reqwest::Client, endpoint: Url, api_key: impl Into<String>) -> Self {
        Self {
            http,
            endpoint,
            api_key: api_key.into(),
        }
    }

    fn request_url(&self, topic: &str, page_size: u32) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("q", topic)
            .append_pair("apiKey", &self.api_key)
            .append_pair("pageSize", &page_size.to_string());
        url
    }
}

impl NewsSource for NewsClient {
    #[instrument(level = "info", skip(self), fields(%topic, max_results))]
    async fn fetch(&self, topic: &str, max_results: u32) -> Option<Vec<Article>> {
        let page_size = max_results.clamp(1, MAX_PAGE_SIZE);
        // The URL carries the API key, so it is never logged.
        let url = self.request_url(topic, page_size);

        let response = match self.http.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                error!(error = %e, "Error occurred during news API request");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "News API returned a non-success status; no articles");
            return Some(Vec::new());
        }

        let body: NewsApiResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "Failed to decode news API response");
                return None;
            }
        };

        if body.status != "ok" {
            warn!(status = %body.status, "News API reported an error status; no articles");
            return Some(Vec::new());
        }

        let total_results = body.total_results;
        let articles: Vec<Article> = body
            .articles
            .into_iter()
            .take(page_size as usize)
            .map(Article::from)
            .collect();

        info!(count = articles.len(), total_results, "Fetched news articles");
        debug!(titles = ?articles.iter().map(|a| a.title.as_str()).collect::<Vec<_>>(), "Article titles");
        Some(articles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    #[derive(Clone)]
    struct MockNews {
        status: StatusCode,
        body: Value,
        seen: Arc<Mutex<Vec<HashMap<String, String>>>>,
    }

    async fn everything(
        State(mock): State<MockNews>,
        Query(params): Query<HashMap<String, String>>,
    ) -> (StatusCode, Json<Value>) {
        mock.seen.lock().unwrap().push(params);
        (mock.status, Json(mock.body.clone()))
    }

    async fn spawn_news_api(status: StatusCode, body: Value) -> (Url, MockNews) {
        let mock = MockNews {
            status,
            body,
            seen: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .route("/v2/everything", get(everything))
            .with_state(mock.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let url = Url::parse(&format!("http://{addr}/v2/everything")).unwrap();
        (url, mock)
    }

    fn article_json(i: usize) -> Value {
        json!({
            "source": { "id": null, "name": format!("Source {i}") },
            "author": if i % 2 == 0 { Value::Null } else { json!("Reporter") },
            "title": format!("Headline {i}"),
            "description": format!("Description {i}"),
            "url": format!("https://example.com/{i}"),
            "content": null
        })
    }

    fn ok_body(n: usize) -> Value {
        json!({
            "status": "ok",
            "totalResults": 1000,
            "articles": (0..n).map(article_json).collect::<Vec<_>>()
        })
    }

    #[tokio::test]
    async fn test_fetch_returns_articles_and_sends_query() {
        let (url, mock) = spawn_news_api(StatusCode::OK, ok_body(2)).await;
        let client = NewsClient::new(reqwest::Client::new(), url, "secret");

        let articles = client.fetch("bitcoin", 5).await.unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].title, "Headline 0");
        assert_eq!(articles[1].url, "https://example.com/1");

        let seen = mock.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["q"], "bitcoin");
        assert_eq!(seen[0]["apiKey"], "secret");
        assert_eq!(seen[0]["pageSize"], "5");
    }

    #[tokio::test]
    async fn test_fetch_never_exceeds_page_size() {
        let (url, _mock) = spawn_news_api(StatusCode::OK, ok_body(7)).await;
        let client = NewsClient::new(reqwest::Client::new(), url, "k");

        let articles = client.fetch("rust", 3).await.unwrap();
        assert_eq!(articles.len(), 3);
        for article in &articles {
            assert!(!article.title.is_empty());
            assert!(!article.url.is_empty());
        }
    }

    #[tokio::test]
    async fn test_page_size_is_clamped_to_upstream_limit() {
        let (url, mock) = spawn_news_api(StatusCode::OK, ok_body(1)).await;
        let client = NewsClient::new(reqwest::Client::new(), url, "k");

        client.fetch("rust", 500).await.unwrap();
        client.fetch("rust", 0).await.unwrap();

        let seen = mock.seen.lock().unwrap();
        assert_eq!(seen[0]["pageSize"], "100");
        assert_eq!(seen[1]["pageSize"], "1");
    }

    #[tokio::test]
    async fn test_non_success_status_yields_empty() {
        let body = json!({ "status": "error", "code": "apiKeyInvalid", "message": "bad key" });
        let (url, _mock) = spawn_news_api(StatusCode::UNAUTHORIZED, body).await;
        let client = NewsClient::new(reqwest::Client::new(), url, "bad");

        assert_eq!(client.fetch("bitcoin", 5).await, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_error_status_in_body_yields_empty() {
        let body = json!({ "status": "error", "code": "rateLimited", "message": "slow down" });
        let (url, _mock) = spawn_news_api(StatusCode::OK, body).await;
        let client = NewsClient::new(reqwest::Client::new(), url, "k");

        assert_eq!(client.fetch("bitcoin", 5).await, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_network_failure_yields_none() {
        // Bind and immediately release a port so nothing is listening on it.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("http://{addr}/v2/everything")).unwrap();
        let client = NewsClient::new(reqwest::Client::new(), url, "k");
        assert_eq!(client.fetch("bitcoin", 5).await, None);
    }

    #[test]
    fn test_debug_hides_api_key() {
        let client = NewsClient::new(
            reqwest::Client::new(),
            Url::parse(DEFAULT_NEWS_API_URL).unwrap(),
            "super-secret",
        );
        assert!(!format!("{client:?}").contains("super-secret"));
    }
}
