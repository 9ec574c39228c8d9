use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// One news item as consumed by the strategy and recorded in daily
/// snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsArticle {
    pub headline: String,
    pub summary: String,
    pub source: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub category: Option<String>,
}

/// Polls a set of RSS/Atom feeds and yields only articles not seen on a
/// previous tick. One broken feed never blocks the others.
pub struct NewsAggregator {
    http: Client,
    feed_urls: Vec<String>,
    seen_urls: HashSet<String>,
}

impl NewsAggregator {
    pub fn new(feed_urls: Vec<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(NewsAggregator {
            http,
            feed_urls,
            seen_urls: HashSet::new(),
        })
    }

    /// Fetch every configured feed and return the articles that are new
    /// since the last call, newest last. Feed failures are logged and
    /// skipped.
    pub async fn fetch_new_articles(&mut self) -> Vec<NewsArticle> {
        let mut fresh = Vec::new();
        for url in self.feed_urls.clone() {
            match self.fetch_feed(&url).await {
                Ok(articles) => {
                    for article in articles {
                        if self.seen_urls.insert(article.url.clone()) {
                            fresh.push(article);
                        }
                    }
                }
                Err(e) => warn!("News feed {} failed: {}", url, e),
            }
        }

        // The seen-set only needs to cover recent history; reset before it
        // grows without bound on a long-running loop.
        if self.seen_urls.len() > 50_000 {
            warn!("News dedup set exceeded 50k entries, resetting");
            self.seen_urls.clear();
        }

        fresh.sort_by_key(|a| a.published_at);
        fresh
    }

    async fn fetch_feed(&self, url: &str) -> Result<Vec<NewsArticle>> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .context("Feed request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("feed returned status {}", resp.status());
        }
        let body = resp.bytes().await.context("Failed to read feed body")?;
        let feed = feed_rs::parser::parse(body.as_ref()).context("Failed to parse feed")?;

        let source = feed
            .title
            .as_ref()
            .map(|t| t.content.clone())
            .unwrap_or_else(|| url.to_string());

        let mut articles = Vec::new();
        for entry in feed.entries {
            let Some(link) = entry.links.first().map(|l| l.href.clone()) else {
                continue;
            };
            let headline = entry
                .title
                .as_ref()
                .map(|t| t.content.trim().to_string())
                .unwrap_or_default();
            if headline.is_empty() {
                continue;
            }
            let summary = entry
                .summary
                .as_ref()
                .map(|t| t.content.trim().to_string())
                .unwrap_or_default();
            let published_at = entry.published.or(entry.updated).unwrap_or_else(Utc::now);
            let category = entry.categories.first().map(|c| c.term.clone());

            articles.push(NewsArticle {
                headline,
                summary,
                source: source.clone(),
                url: link,
                published_at,
                category,
            });
        }
        debug!("Fetched {} entries from {}", articles.len(), url);
        Ok(articles)
    }
}
