//! Web search with chat-ready formatting.
//!
//! [`search`] never fails: provider errors and timeouts turn into a
//! friendly retry message, an empty result set into a "try different
//! keywords" message.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::SearchConfig;

pub const NO_RESULTS: &str =
    "I couldn't find any relevant results for that search. Maybe try different keywords?";
pub const SEARCH_FAILED: &str = "I encountered an issue with the web search. Let me try that again or you could try rephrasing your query.";

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub body: String,
    pub href: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn text_search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
}

/// DuckDuckGo Instant Answer API (`format=json`).
pub struct DuckDuckGoSearch {
    url: String,
    client: reqwest::Client,
}

impl DuckDuckGoSearch {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("thara-chat/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            url: config.url.clone(),
            client,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default)]
    heading: String,
    #[serde(default)]
    abstract_text: String,
    #[serde(default, rename = "AbstractURL")]
    abstract_url: String,
    #[serde(default)]
    related_topics: Vec<RelatedTopic>,
}

/// Either a single topic or a named group of topics.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RelatedTopic {
    Topic {
        #[serde(rename = "Text")]
        text: String,
        #[serde(rename = "FirstURL")]
        first_url: String,
    },
    Group {
        #[serde(rename = "Topics")]
        topics: Vec<RelatedTopic>,
    },
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    async fn text_search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .with_context(|| format!("search request to {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("search API error {}: {}", status, body);
        }

        let answer: InstantAnswer = response
            .json()
            .await
            .context("Invalid search response")?;
        Ok(collect_hits(answer, max_results))
    }
}

fn collect_hits(answer: InstantAnswer, max_results: usize) -> Vec<SearchHit> {
    let mut hits = Vec::new();
    if !answer.abstract_text.is_empty() {
        hits.push(SearchHit {
            title: answer.heading,
            body: answer.abstract_text,
            href: answer.abstract_url,
        });
    }

    let mut stack: Vec<RelatedTopic> = answer.related_topics.into_iter().rev().collect();
    while let Some(topic) = stack.pop() {
        if hits.len() >= max_results {
            break;
        }
        match topic {
            RelatedTopic::Topic { text, first_url } => {
                let (title, body) = match text.split_once(" - ") {
                    Some((title, body)) => (title.to_string(), body.to_string()),
                    None => (text.clone(), text),
                };
                hits.push(SearchHit {
                    title,
                    body,
                    href: first_url,
                });
            }
            RelatedTopic::Group { topics } => stack.extend(topics.into_iter().rev()),
        }
    }

    hits.truncate(max_results);
    hits
}

pub fn format_results(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return NO_RESULTS.to_string();
    }
    let formatted: Vec<String> = hits
        .iter()
        .map(|h| format!("🔍 **{}**\n{}\n📎 {}\n", h.title, h.body, h.href))
        .collect();
    format!("Here are some web results I found:\n\n{}", formatted.join("\n"))
}

/// Runs a search bounded by `timeout` and formats the outcome.
pub async fn search(
    provider: &dyn SearchProvider,
    query: &str,
    max_results: usize,
    timeout: Duration,
) -> String {
    match tokio::time::timeout(timeout, provider.text_search(query, max_results)).await {
        Ok(Ok(mut hits)) => {
            hits.truncate(max_results);
            format_results(&hits)
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "web search failed");
            SEARCH_FAILED.to_string()
        }
        Err(_) => {
            tracing::error!(timeout_secs = timeout.as_secs(), "web search timed out");
            SEARCH_FAILED.to_string()
        }
    }
}

pub fn create_search(config: &SearchConfig) -> Result<Box<dyn SearchProvider>> {
    Ok(Box::new(DuckDuckGoSearch::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSearch(Result<Vec<SearchHit>, String>);

    #[async_trait]
    impl SearchProvider for FixedSearch {
        async fn text_search(&self, _query: &str, _max: usize) -> Result<Vec<SearchHit>> {
            self.0.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    struct SlowSearch;

    #[async_trait]
    impl SearchProvider for SlowSearch {
        async fn text_search(&self, _query: &str, _max: usize) -> Result<Vec<SearchHit>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![])
        }
    }

    fn hit(n: usize) -> SearchHit {
        SearchHit {
            title: format!("Title {}", n),
            body: format!("Body {}", n),
            href: format!("https://example.com/{}", n),
        }
    }

    #[tokio::test]
    async fn results_are_capped_and_formatted() {
        let provider = FixedSearch(Ok((1..=5).map(hit).collect()));
        let out = search(&provider, "rust", 3, Duration::from_secs(5)).await;
        assert_eq!(
            out,
            "Here are some web results I found:\n\n\
             🔍 **Title 1**\nBody 1\n📎 https://example.com/1\n\n\
             🔍 **Title 2**\nBody 2\n📎 https://example.com/2\n\n\
             🔍 **Title 3**\nBody 3\n📎 https://example.com/3\n"
        );
    }

    #[tokio::test]
    async fn empty_and_failed_searches_have_friendly_messages() {
        let empty = FixedSearch(Ok(vec![]));
        assert_eq!(search(&empty, "q", 3, Duration::from_secs(5)).await, NO_RESULTS);

        let failing = FixedSearch(Err("network down".to_string()));
        assert_eq!(
            search(&failing, "q", 3, Duration::from_secs(5)).await,
            SEARCH_FAILED
        );
    }

    #[tokio::test]
    async fn timeout_is_a_failure() {
        assert_eq!(
            search(&SlowSearch, "q", 3, Duration::from_millis(50)).await,
            SEARCH_FAILED
        );
    }

    #[test]
    fn instant_answer_topics_are_flattened() {
        let json = serde_json::json!({
            "Heading": "Rust",
            "AbstractText": "A systems language.",
            "AbstractURL": "https://en.wikipedia.org/wiki/Rust",
            "RelatedTopics": [
                {"Text": "Cargo - Package manager", "FirstURL": "https://a"},
                {"Name": "See also", "Topics": [
                    {"Text": "Ferris", "FirstURL": "https://b"}
                ]}
            ]
        });
        let answer: InstantAnswer = serde_json::from_value(json).unwrap();
        let hits = collect_hits(answer, 3);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].title, "Rust");
        assert_eq!(hits[1].title, "Cargo");
        assert_eq!(hits[1].body, "Package manager");
        assert_eq!(hits[2].href, "https://b");
    }
}
