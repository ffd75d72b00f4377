//! ImpactRank: seven normalized factors in [0,1] folded into a 0–10 composite.
//!
//! Factors:
//! - `freshness`      : piecewise time decay from `published_at`
//! - `source_quality` : fixed tier table
//! - `relevance`      : overlap with the caller's tracked symbols
//! - `impact`         : strongest keyword category in title + summary
//! - `novelty`        : how crowded the symbol has been over the last 6h
//! - `corroboration`  : supplied by the caller (dedup sightings)
//! - `attention`      : reserved for social signals, always 0 for now
//!
//! Composite = round(Σ factor × weight × 10, 1 decimal), clamped to [0,10].
//! Weights are re-weighted for market hours / holdings and renormalized to sum 1.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::error::ScoringError;
use crate::model::{NormalizedArticle, SourceTier};

/// Factor values in [0,1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Factors {
    pub freshness: f64,
    pub source_quality: f64,
    pub relevance: f64,
    pub impact: f64,
    pub novelty: f64,
    pub corroboration: f64,
    pub attention: f64,
}

impl Factors {
    fn named(&self) -> [(&'static str, f64); 7] {
        [
            ("freshness", self.freshness),
            ("source_quality", self.source_quality),
            ("relevance", self.relevance),
            ("impact", self.impact),
            ("novelty", self.novelty),
            ("corroboration", self.corroboration),
            ("attention", self.attention),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub freshness: f64,
    pub source_quality: f64,
    pub relevance: f64,
    pub impact: f64,
    pub novelty: f64,
    pub corroboration: f64,
    pub attention: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            freshness: 0.20,
            source_quality: 0.20,
            relevance: 0.15,
            impact: 0.20,
            novelty: 0.10,
            corroboration: 0.10,
            attention: 0.05,
        }
    }
}

impl Weights {
    pub fn sum(&self) -> f64 {
        self.freshness
            + self.source_quality
            + self.relevance
            + self.impact
            + self.novelty
            + self.corroboration
            + self.attention
    }

    fn all(&self) -> [f64; 7] {
        [
            self.freshness,
            self.source_quality,
            self.relevance,
            self.impact,
            self.novelty,
            self.corroboration,
            self.attention,
        ]
    }

    /// Scale every weight so the set sums to 1.0.
    pub fn normalized(&self) -> Result<Self, ScoringError> {
        if self.all().iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ScoringError::InvalidWeights(
                "weights must be finite and non-negative".into(),
            ));
        }
        let total = self.sum();
        if total <= f64::EPSILON {
            return Err(ScoringError::InvalidWeights("weights sum to zero".into()));
        }
        Ok(Self {
            freshness: self.freshness / total,
            source_quality: self.source_quality / total,
            relevance: self.relevance / total,
            impact: self.impact / total,
            novelty: self.novelty / total,
            corroboration: self.corroboration / total,
            attention: self.attention / total,
        })
    }

    /// Apply the optional contexts, then renormalize.
    pub fn for_context(&self, ctx: &ScoringContext) -> Result<Self, ScoringError> {
        let mut w = *self;
        if ctx.market_hours {
            w.freshness *= 1.25;
            w.impact *= 1.25;
            w.source_quality *= 0.75;
        }
        if ctx.has_holdings {
            w.relevance *= 1.5;
        }
        w.normalized()
    }
}

/// Caller-supplied inputs that are not derivable from the article alone.
#[derive(Debug, Clone, Default)]
pub struct ScoringContext {
    pub now: Option<DateTime<Utc>>,
    pub tracked_symbols: HashSet<String>,
    pub market_hours: bool,
    pub has_holdings: bool,
    /// Articles sharing a symbol seen over the last 6h.
    pub recent_symbol_mentions: u32,
    /// Corroboration factor in [0,1]; see [`corroboration_factor`].
    pub corroboration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub factors: Factors,
    pub composite: f64,
    pub weights_used: Weights,
}

#[derive(Debug, Clone, Default)]
pub struct ImpactScorer {
    base_weights: Weights,
}

impl ImpactScorer {
    pub fn score_article(
        &self,
        article: &NormalizedArticle,
        tier: SourceTier,
        ctx: &ScoringContext,
    ) -> Result<ScoreResult, ScoringError> {
        let now = ctx.now.unwrap_or_else(Utc::now);
        let factors = Factors {
            freshness: freshness(now - article.published_at),
            source_quality: source_quality(Some(tier)),
            relevance: relevance(article, &ctx.tracked_symbols),
            impact: impact(&article.headline_text()),
            novelty: novelty(ctx.recent_symbol_mentions),
            corroboration: ctx.corroboration.clamp(0.0, 1.0),
            attention: 0.0,
        };
        let weights = self.base_weights.for_context(ctx)?;
        let composite = composite(&factors, &weights)?;
        debug!(
            target: "scoring",
            composite,
            categories = ?impact_categories(&article.headline_text()),
            market_hours = ctx.market_hours,
            "article scored"
        );
        Ok(ScoreResult {
            factors,
            composite,
            weights_used: weights,
        })
    }
}

/// Weighted sum ×10, one decimal, clamped to [0,10].
pub fn composite(f: &Factors, w: &Weights) -> Result<f64, ScoringError> {
    for (name, v) in f.named() {
        if !v.is_finite() {
            return Err(ScoringError::NonFinite(name));
        }
    }
    let raw: f64 = f
        .named()
        .iter()
        .zip(w.all())
        .map(|((_, v), w)| v.clamp(0.0, 1.0) * w)
        .sum();
    Ok(((raw * 10.0 * 10.0).round() / 10.0).clamp(0.0, 10.0))
}

/// Piecewise time decay. Negative ages (clock skew) count as brand new.
pub fn freshness(age: Duration) -> f64 {
    let mins = age.num_seconds().max(0) as f64 / 60.0;
    let lerp = |from: f64, to: f64, start: f64, end: f64| from + (to - from) * (mins - start) / (end - start);
    if mins < 5.0 {
        1.0
    } else if mins < 60.0 {
        lerp(0.9, 0.8, 5.0, 60.0)
    } else if mins < 6.0 * 60.0 {
        lerp(0.8, 0.5, 60.0, 360.0)
    } else if mins < 24.0 * 60.0 {
        lerp(0.5, 0.1, 360.0, 1440.0)
    } else if mins < 48.0 * 60.0 {
        lerp(0.1, 0.0, 1440.0, 2880.0)
    } else {
        0.0
    }
}

pub fn source_quality(tier: Option<SourceTier>) -> f64 {
    match tier.map(SourceTier::get) {
        Some(5) => 1.0,
        Some(4) => 0.85,
        Some(3) => 0.65,
        Some(2) => 0.40,
        Some(1) => 0.20,
        _ => 0.5,
    }
}

const LONG_TITLE_CHARS: usize = 60;
const LONG_SUMMARY_CHARS: usize = 200;

pub fn relevance(article: &NormalizedArticle, tracked: &HashSet<String>) -> f64 {
    let mut score: f64 = if tracked.is_empty() {
        0.5
    } else if article
        .primary_symbol()
        .is_some_and(|s| tracked.contains(&s.to_ascii_uppercase()))
    {
        0.5
    } else if article
        .symbols
        .iter()
        .any(|s| tracked.contains(&s.to_ascii_uppercase()))
    {
        0.3
    } else {
        0.0
    };

    if article.title.chars().count() > LONG_TITLE_CHARS {
        score += 0.1;
    }
    if article.summary.chars().count() > LONG_SUMMARY_CHARS {
        score += 0.1;
    }
    score.min(1.0)
}

struct ImpactCategory {
    name: &'static str,
    weight: f64,
    re: Regex,
}

fn category(name: &'static str, weight: f64, pattern: &str) -> ImpactCategory {
    ImpactCategory {
        name,
        weight,
        re: Regex::new(pattern).expect("impact category regex"),
    }
}

static IMPACT_CATEGORIES: Lazy<Vec<ImpactCategory>> = Lazy::new(|| {
    vec![
        category("bankruptcy", 1.0, r"(?i)\b(bankrupt\w*|chapter 11|insolven\w*|default(s|ed)? on)\b"),
        category("merger", 0.95, r"(?i)\b(merger|acquisition|acquires?|acquired|takeover|buyout)\b"),
        category("earnings", 0.9, r"(?i)\b(earnings|quarterly results|revenue|profit|eps|guidance)\b"),
        category("lawsuit", 0.8, r"(?i)\b(lawsuit|sued|sues|litigation|settlement|antitrust|probe)\b"),
        category("executive", 0.75, r"(?i)\b(ceo|cfo|chief executive|resigns?|steps down|appoint(s|ed)?)\b"),
        category("rating", 0.7, r"(?i)\b(upgrades?|downgrades?|upgraded|downgraded|price target)\b"),
        category("contract", 0.65, r"(?i)\b(contract|deal worth|awarded|partnership)\b"),
        category("dividend", 0.6, r"(?i)\b(dividends?|payout|special distribution)\b"),
        category("product", 0.5, r"(?i)\b(launch(es|ed)?|unveil(s|ed)?|new product|rollout)\b"),
    ]
});

/// Highest weight among matched keyword categories; 0 when nothing matches.
pub fn impact(text: &str) -> f64 {
    IMPACT_CATEGORIES
        .iter()
        .filter(|c| c.re.is_match(text))
        .map(|c| c.weight)
        .fold(0.0, f64::max)
}

/// Names of matched impact categories, strongest first.
pub fn impact_categories(text: &str) -> Vec<&'static str> {
    IMPACT_CATEGORIES
        .iter()
        .filter(|c| c.re.is_match(text))
        .map(|c| c.name)
        .collect()
}

pub fn novelty(recent_mentions: u32) -> f64 {
    match recent_mentions {
        0 => 1.0,
        1 => 0.8,
        2..=3 => 0.6,
        4..=5 => 0.4,
        _ => 0.2,
    }
}

/// Map dedup `seen_count` to a factor: a single sighting corroborates nothing,
/// five or more saturate.
pub fn corroboration_factor(seen_count: u32) -> f64 {
    (seen_count.saturating_sub(1) as f64 / 4.0).min(1.0)
}

/// US regular session (09:30–16:00 America/New_York, Mon–Fri), holidays ignored.
pub fn is_us_market_hours(now: DateTime<Utc>) -> bool {
    let offset_h = if is_us_eastern_dst(now) { -4 } else { -5 };
    let local = now + Duration::hours(offset_h);
    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    let minutes = local.hour() * 60 + local.minute();
    (9 * 60 + 30..16 * 60).contains(&minutes)
}

/// DST runs from the second Sunday of March 07:00 UTC to the first Sunday of
/// November 06:00 UTC.
fn is_us_eastern_dst(now: DateTime<Utc>) -> bool {
    let year = now.year();
    let start = NaiveDate::from_weekday_of_month_opt(year, 3, Weekday::Sun, 2)
        .and_then(|d| d.and_hms_opt(7, 0, 0));
    let end = NaiveDate::from_weekday_of_month_opt(year, 11, Weekday::Sun, 1)
        .and_then(|d| d.and_hms_opt(6, 0, 0));
    match (start, end) {
        (Some(s), Some(e)) => {
            let n = now.naive_utc();
            n >= s && n < e
        }
        _ => false,
    }
}
