//! Data models for news-search results.
//!
//! This module defines the article types that flow from the news-search API
//! into the assistant's tool outputs:
//! - [`NewsApiResponse`]: Raw response body of the `/v2/everything` endpoint
//! - [`NewsApiArticle`]: One raw article record inside that response
//! - [`Article`]: The normalized article handed to the rest of the program
//!
//! The raw types mirror the upstream JSON schema (camelCase where the API uses
//! it) so that missing optional fields deserialize to `None` instead of failing.

use serde::{Deserialize, Serialize};

/// Response body of the news-search endpoint.
///
/// On success `status` is `"ok"`. Error bodies carry `"error"` together with
/// `code`/`message`, which is why every field has a default.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsApiResponse {
    /// `"ok"` or `"error"`.
    #[serde(default)]
    pub status: String,
    /// Total number of matches upstream, not the size of this page.
    #[serde(default)]
    pub total_results: u64,
    /// The first page of articles.
    #[serde(default)]
    pub articles: Vec<NewsApiArticle>,
}

/// The publication an article came from.
#[derive(Debug, Default, Deserialize)]
pub struct NewsApiSource {
    #[cfg(test)]
    pub id: Option<String>,
    pub name: Option<String>,
}

/// One article record exactly as the news-search API returns it.
#[derive(Debug, Deserialize)]
pub struct NewsApiArticle {
    #[serde(default)]
    pub source: NewsApiSource,
    pub author: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub content: Option<String>,
}

/// A normalized news article.
///
/// Produced once per fetch and never persisted. `title` and `url` are always
/// present (empty when upstream omitted them); the remaining text fields stay
/// optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Article {
    /// Display name of the publication.
    pub source_name: String,
    pub author: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub url: String,
    pub content: Option<String>,
}

impl From<NewsApiArticle> for Article {
    fn from(raw: NewsApiArticle) -> Self {
        Self {
            source_name: raw.source.name.unwrap_or_default(),
            author: raw.author,
            title: raw.title.unwrap_or_default(),
            description: raw.description,
            url: raw.url.unwrap_or_default(),
            content: raw.content,
        }
    }
}

impl Article {
    /// Render the article as the short text block the assistant reads.
    ///
    /// Absent optional fields are written as `None`.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// Title: Bitcoin rallies,
    /// Author: Jane Doe,
    /// Source: Reuters,
    /// Description: Prices climbed overnight.
    /// URL: https://example.com/btc
    /// ```
    pub fn brief(&self) -> String {
        format!(
            "\nTitle: {},\nAuthor: {},\nSource: {},\nDescription: {}\nURL: {}\n",
            self.title,
            self.author.as_deref().unwrap_or("None"),
            self.source_name,
            self.description.as_deref().unwrap_or("None"),
            self.url,
        )
    }
}
