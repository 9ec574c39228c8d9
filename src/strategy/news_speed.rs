use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use tracing::{debug, warn};

use crate::llm::LlmClient;
use crate::marketdata::MarketRecord;
use crate::models::{Direction, Signal};
use crate::news::NewsArticle;
use crate::strategy::SignalSource;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it",
    "its", "of", "on", "or", "that", "the", "to", "was", "were", "will", "with",
];

/// LLM-backed news strategy: for each breaking article, shortlist the
/// markets whose question text overlaps the article, ask the model which
/// are affected and in which direction, and turn its judgments into
/// signals. Low-confidence and low-edge judgments are dropped here so the
/// risk filter only sees plausible candidates.
pub struct NewsSpeedStrategy {
    llm: LlmClient,
    min_edge: f64,
    min_confidence: u8,
    max_markets_per_cycle: usize,
}

impl NewsSpeedStrategy {
    pub fn new(
        llm: LlmClient,
        min_edge: f64,
        min_confidence: u8,
        max_markets_per_cycle: usize,
    ) -> Self {
        NewsSpeedStrategy {
            llm,
            min_edge,
            min_confidence,
            max_markets_per_cycle: max_markets_per_cycle.max(1),
        }
    }

    async fn signals_for_article(
        &self,
        article: &NewsArticle,
        markets: &[MarketRecord],
    ) -> Result<Vec<Signal>> {
        let candidates = select_candidate_markets(article, markets, self.max_markets_per_cycle);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = build_prompt(article, &candidates);
        debug!(
            "Asking {} about '{}' against {} markets",
            self.llm.model(),
            article.headline,
            candidates.len()
        );
        let response = self
            .llm
            .complete("You output strict JSON and nothing else.", &prompt)
            .await?;
        let affected = parse_llm_response(&response);
        if affected.is_empty() {
            debug!("No affected markets for '{}'", article.headline);
            return Ok(Vec::new());
        }

        let by_id: HashMap<&str, &MarketRecord> = candidates
            .iter()
            .map(|m| (m.market_id.as_str(), *m))
            .collect();

        let mut signals = Vec::new();
        for row in affected {
            let Some(market_id) = field_as_string(&row, "market_id") else {
                continue;
            };
            let Some(market) = by_id.get(market_id.as_str()) else {
                continue;
            };
            let Some(direction) = field_as_string(&row, "direction")
                .and_then(|s| Direction::from_str(&s).ok())
            else {
                continue;
            };

            let confidence = row
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            if confidence < self.min_confidence as f64 {
                continue;
            }
            let confidence = confidence.clamp(1.0, 10.0) as u8;

            let Some(estimated_prob) = row.get("estimated_prob").and_then(Value::as_f64) else {
                continue;
            };
            let estimated_prob = estimated_prob.clamp(0.0, 1.0);

            let current_odds = market.price_for(direction).clamp(0.0, 1.0);
            let edge = estimated_prob - current_odds;
            if edge < self.min_edge {
                continue;
            }

            signals.push(Signal {
                timestamp: Utc::now(),
                market_id,
                market_question: market.question.clone(),
                direction,
                current_odds,
                estimated_prob,
                edge,
                confidence,
                reasoning: field_as_string(&row, "reasoning").unwrap_or_default(),
                news_headline: article.headline.clone(),
            });
        }
        Ok(signals)
    }
}

#[async_trait]
impl SignalSource for NewsSpeedStrategy {
    fn name(&self) -> &'static str {
        "news_speed"
    }

    async fn generate_signals(
        &self,
        articles: &[NewsArticle],
        markets: &[MarketRecord],
    ) -> Result<Vec<Signal>> {
        let mut signals = Vec::new();
        if articles.is_empty() || markets.is_empty() {
            return Ok(signals);
        }

        for article in articles {
            // One bad article (or one failed model call) must not sink the
            // rest of the batch.
            match self.signals_for_article(article, markets).await {
                Ok(mut batch) => signals.append(&mut batch),
                Err(e) => warn!("Signal generation failed for '{}': {}", article.headline, e),
            }
        }
        Ok(signals)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    let stop: HashSet<&str> = STOPWORDS.iter().copied().collect();
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| w.len() > 2 && !stop.contains(w))
        .map(str::to_string)
        .collect()
}

/// Rank markets by token overlap with the article and keep the best few.
/// Falls back to the head of the market list when nothing overlaps, so the
/// model still gets a shortlist to reject.
fn select_candidate_markets<'a>(
    article: &NewsArticle,
    markets: &'a [MarketRecord],
    max_candidates: usize,
) -> Vec<&'a MarketRecord> {
    let query = format!("{}\n{}", article.headline, article.summary);
    let tokens: HashSet<String> = tokenize(&query).into_iter().collect();
    if tokens.is_empty() {
        return markets.iter().take(max_candidates).collect();
    }

    let mut scored: Vec<(usize, &MarketRecord)> = markets
        .iter()
        .filter(|m| !m.question.is_empty())
        .filter_map(|m| {
            let q_tokens: HashSet<String> = tokenize(&m.question).into_iter().collect();
            let score = tokens.intersection(&q_tokens).count();
            (score > 0).then_some((score, m))
        })
        .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0));
    let candidates: Vec<&MarketRecord> = scored
        .into_iter()
        .take(max_candidates)
        .map(|(_, m)| m)
        .collect();

    if candidates.is_empty() {
        markets.iter().take(max_candidates).collect()
    } else {
        candidates
    }
}

fn build_prompt(article: &NewsArticle, markets: &[&MarketRecord]) -> String {
    let simplified: Vec<Value> = markets
        .iter()
        .map(|m| {
            json!({
                "market_id": m.market_id,
                "question": m.question,
                "yes_price": m.yes_price,
                "no_price": m.no_price,
                "end_date": m.end_date,
                "volume_24h": m.volume_24h,
            })
        })
        .collect();
    let markets_json = serde_json::to_string(&simplified).unwrap_or_else(|_| "[]".into());

    format!(
        "You are a careful prediction market analyst. Return ONLY valid JSON.\n\n\
         Breaking news:\n\"{}\"\n\"{}\"\n\n\
         Active markets (subset):\n{}\n\n\
         Task:\n\
         1) Identify which markets are directly affected by this news.\n\
         2) For each affected market, output:\n\
         - market_id (string)\n\
         - direction (\"YES\" or \"NO\") for the side to buy\n\
         - estimated_prob (0.0-1.0) for that side being correct\n\
         - confidence (1-10)\n\
         - reasoning (short)\n\n\
         JSON schema:\n\
         {{\n  \"affected_markets\": [\n    {{\n      \"market_id\": \"123\",\n      \
         \"direction\": \"YES\",\n      \"estimated_prob\": 0.75,\n      \
         \"confidence\": 8,\n      \"reasoning\": \"...\"\n    }}\n  ]\n}}\n\n\
         If none, return {{\"affected_markets\": []}}.\n",
        article.headline, article.summary, markets_json
    )
}

/// Parse the model's reply into affected-market rows. Accepts strict JSON
/// first; falls back to the outermost brace-delimited block for models that
/// wrap their answer in prose or code fences. Unparseable replies yield an
/// empty list, never an error.
fn parse_llm_response(response: &str) -> Vec<Value> {
    let text = response.trim();
    let parsed: Option<Value> = serde_json::from_str(text).ok().or_else(|| {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        if end <= start {
            return None;
        }
        serde_json::from_str(&text[start..=end]).ok()
    });

    let Some(Value::Array(rows)) = parsed.and_then(|v| v.get("affected_markets").cloned()) else {
        return Vec::new();
    };
    rows.into_iter().filter(|r| r.is_object()).collect()
}

fn field_as_string(row: &Value, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
