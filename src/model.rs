//! Shared domain types flowing through the pipeline.
//!
//! `NormalizedArticle` is the only shape adapters and the HTTP endpoint hand to
//! the pipeline; its required fields are checked once by the normalizer and not
//! re-validated downstream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub type ArticleId = i64;

/// Source-authority classification: 1 (social/unverified) ..= 5 (official/regulatory).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SourceTier(u8);

impl SourceTier {
    pub const SOCIAL: SourceTier = SourceTier(1);
    pub const MAJOR: SourceTier = SourceTier(4);
    pub const OFFICIAL: SourceTier = SourceTier(5);

    pub fn new(tier: u8) -> Option<Self> {
        (1..=5).contains(&tier).then_some(Self(tier))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for SourceTier {
    fn default() -> Self {
        Self::MAJOR
    }
}

impl TryFrom<u8> for SourceTier {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        SourceTier::new(v).ok_or_else(|| format!("tier must be within 1..=5, got {v}"))
    }
}

impl From<SourceTier> for u8 {
    fn from(t: SourceTier) -> u8 {
        t.0
    }
}

impl fmt::Display for SourceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// A registered news source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub tier: SourceTier,
    pub reliability: f32,
    pub rate_limit_per_min: u32,
    pub enabled: bool,
}

/// Validated, adapter-independent article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedArticle {
    pub external_id: String,
    pub source: String,
    pub tier: SourceTier,
    pub title: String,
    pub title_translated: Option<String>,
    pub summary: String,
    pub body: Option<String>,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub symbols: Vec<String>,
    pub entities: BTreeMap<String, Vec<String>>,
    pub region: Option<String>,
    pub lang: String,
    pub tags: Vec<String>,
    pub commentary: Option<String>,
}

impl NormalizedArticle {
    /// First extracted symbol, used by the relevance factor.
    pub fn primary_symbol(&self) -> Option<&str> {
        self.symbols.first().map(String::as_str)
    }

    /// Title and summary joined for keyword scans.
    pub fn headline_text(&self) -> String {
        format!("{} {}", self.title, self.summary)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Urgent,
    Digest,
    Suppressed,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Urgent => "urgent",
            Channel::Digest => "digest",
            Channel::Suppressed => "suppressed",
        }
    }

    /// Channels a digest pass draws from.
    pub fn deliverable() -> [Channel; 2] {
        [Channel::Urgent, Channel::Digest]
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "urgent" => Ok(Channel::Urgent),
            "digest" => Ok(Channel::Digest),
            "suppressed" => Ok(Channel::Suppressed),
            other => Err(format!("unknown channel `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStatus {
    Pending,
    Sent,
}

impl RoutingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RoutingStatus::Pending => "pending",
            RoutingStatus::Sent => "sent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushOutcome {
    Success,
    Failed,
}

impl PushOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            PushOutcome::Success => "success",
            PushOutcome::Failed => "failed",
        }
    }
}

/// Persisted routing decision, one row per article.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingState {
    pub article_id: ArticleId,
    pub channel: Channel,
    pub status: RoutingStatus,
    pub fade_level: u8,
    pub upgrade_flag: bool,
    pub routed_at: DateTime<Utc>,
}

/// Append-only audit row for a single delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct PushRecord {
    pub article_id: ArticleId,
    pub channel: Channel,
    pub message_id: Option<i64>,
    pub outcome: PushOutcome,
    pub error: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// Everything the formatter needs to render one chat message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushItem {
    pub article_id: ArticleId,
    pub source: String,
    pub title: String,
    pub title_translated: Option<String>,
    pub summary: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub composite: f64,
    pub commentary: Option<String>,
    pub channel: Channel,
}

impl PushItem {
    pub fn from_article(
        article_id: ArticleId,
        article: &NormalizedArticle,
        composite: f64,
        channel: Channel,
    ) -> Self {
        Self {
            article_id,
            source: article.source.clone(),
            title: article.title.clone(),
            title_translated: article.title_translated.clone(),
            summary: article.summary.clone(),
            url: article.url.clone(),
            published_at: article.published_at,
            composite,
            commentary: article.commentary.clone(),
            channel,
        }
    }

    /// Title shown to readers; a translated variant wins when present.
    pub fn display_title(&self) -> &str {
        self.title_translated
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.title)
    }
}
