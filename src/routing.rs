//! Channel selection with repeat-story fade and escalation detection.
//!
//! Base rule: composite >= 10.0 goes `urgent`, everything else `digest`.
//! Fade levels for a topic lineage then downgrade the base channel:
//!
//! | fade | urgent     | digest     |
//! |------|------------|------------|
//! | 0    | urgent     | digest     |
//! | 1–2  | digest     | digest     |
//! | 3–4  | digest     | suppressed |
//! | 5    | suppressed | suppressed |

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::model::{ArticleId, Channel, RoutingState, RoutingStatus};
use crate::store::NewsStore;

pub const URGENT_THRESHOLD: f64 = 10.0;
pub const MAX_FADE: u8 = 5;
pub const UPGRADE_DELTA: f64 = 2.0;
pub const FADE_WINDOW_HOURS: i64 = 24;

pub fn determine_channel(composite: f64) -> Channel {
    if composite >= URGENT_THRESHOLD {
        Channel::Urgent
    } else {
        Channel::Digest
    }
}

pub fn apply_fade(base: Channel, fade_level: u8) -> Channel {
    match (fade_level, base) {
        (f, _) if f >= MAX_FADE => Channel::Suppressed,
        (f, Channel::Urgent) if f >= 1 => Channel::Digest,
        (f, Channel::Digest) if f >= 3 => Channel::Suppressed,
        (_, channel) => channel,
    }
}

/// Fade level for a new sighting given the highest level seen in the lineage.
pub fn next_fade(previous: Option<u8>) -> u8 {
    match previous {
        Some(p) => p.saturating_add(1).min(MAX_FADE),
        None => 0,
    }
}

/// True when the composite rose by at least 2.0. Compared in tenths since
/// composites carry one decimal.
pub fn is_upgrade(new_composite: f64, previous: Option<f64>) -> bool {
    previous.is_some_and(|prev| ((new_composite - prev) * 10.0).round() >= UPGRADE_DELTA * 10.0)
}

#[derive(Debug, Clone, Default)]
pub struct RouteContext {
    pub topic_hash: Option<String>,
    /// Composite of the same story before this sighting, if any.
    pub previous_composite: Option<f64>,
    pub now: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteDecision {
    pub channel: Channel,
    pub fade_level: u8,
    pub upgrade_flag: bool,
    pub should_push: bool,
    /// False when not even the fallback row could be written; such an item
    /// is invisible to the digest until it is routed again.
    pub persisted: bool,
}

impl RouteDecision {
    fn fallback() -> Self {
        Self {
            channel: Channel::Digest,
            fade_level: 0,
            upgrade_flag: false,
            should_push: false,
            persisted: true,
        }
    }

    fn state(&self, article_id: ArticleId, now: DateTime<Utc>) -> RoutingState {
        RoutingState {
            article_id,
            channel: self.channel,
            status: RoutingStatus::Pending,
            fade_level: self.fade_level,
            upgrade_flag: self.upgrade_flag,
            routed_at: now,
        }
    }
}

pub struct NewsRouter {
    store: Arc<dyn NewsStore>,
}

impl NewsRouter {
    pub fn new(store: Arc<dyn NewsStore>) -> Self {
        Self { store }
    }

    /// Decide and persist the channel for an article. Storage failures are
    /// logged and fall back to a `digest` row, written on a second attempt.
    pub async fn route_news_item(
        &self,
        article_id: ArticleId,
        composite: f64,
        ctx: &RouteContext,
    ) -> RouteDecision {
        let now = ctx.now.unwrap_or_else(Utc::now);
        let decision = match self.route(article_id, composite, ctx, now).await {
            Ok(d) => d,
            Err(e) => {
                warn!(
                    target: "router",
                    error = %e,
                    article_id,
                    "routing store error, falling back to digest"
                );
                counter!("route_store_errors_total").increment(1);
                let mut fallback = RouteDecision::fallback();
                if let Err(e) = self.store.upsert_routing(&fallback.state(article_id, now)).await {
                    warn!(
                        target: "router",
                        error = %e,
                        article_id,
                        "fallback route not stored, article will not reach a digest"
                    );
                    fallback.persisted = false;
                }
                fallback
            }
        };

        counter!("route_decisions_total", "channel" => decision.channel.as_str()).increment(1);
        debug!(
            target: "router",
            article_id,
            composite,
            channel = %decision.channel,
            fade = decision.fade_level,
            upgrade = decision.upgrade_flag,
            "routed"
        );
        decision
    }

    async fn route(
        &self,
        article_id: ArticleId,
        composite: f64,
        ctx: &RouteContext,
        now: DateTime<Utc>,
    ) -> Result<RouteDecision, StoreError> {
        let previous_fade = match ctx.topic_hash.as_deref() {
            Some(topic) => {
                self.store
                    .max_fade_for_topic(topic, now - Duration::hours(FADE_WINDOW_HOURS), article_id)
                    .await?
            }
            None => None,
        };
        let fade_level = next_fade(previous_fade);
        let channel = apply_fade(determine_channel(composite), fade_level);
        let decision = RouteDecision {
            channel,
            fade_level,
            upgrade_flag: is_upgrade(composite, ctx.previous_composite),
            should_push: channel == Channel::Urgent,
            persisted: true,
        };
        self.store.upsert_routing(&decision.state(article_id, now)).await?;
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_channel_is_binary() {
        assert_eq!(determine_channel(10.0), Channel::Urgent);
        assert_eq!(determine_channel(9.9), Channel::Digest);
        assert_eq!(determine_channel(5.0), Channel::Digest);
        assert_eq!(determine_channel(0.0), Channel::Digest);
    }

    #[test]
    fn fade_table() {
        assert_eq!(apply_fade(Channel::Urgent, 0), Channel::Urgent);
        assert_eq!(apply_fade(Channel::Urgent, 1), Channel::Digest);
        assert_eq!(apply_fade(Channel::Digest, 2), Channel::Digest);
        assert_eq!(apply_fade(Channel::Urgent, 3), Channel::Digest);
        assert_eq!(apply_fade(Channel::Digest, 3), Channel::Suppressed);
        assert_eq!(apply_fade(Channel::Urgent, 5), Channel::Suppressed);
        assert_eq!(apply_fade(Channel::Digest, 5), Channel::Suppressed);
    }

    #[test]
    fn fade_saturates() {
        assert_eq!(next_fade(None), 0);
        assert_eq!(next_fade(Some(0)), 1);
        assert_eq!(next_fade(Some(4)), 5);
        assert_eq!(next_fade(Some(5)), 5);
    }

    #[test]
    fn upgrade_needs_two_points() {
        assert!(is_upgrade(7.2, Some(5.2)));
        assert!(is_upgrade(9.0, Some(3.0)));
        assert!(!is_upgrade(7.1, Some(5.2)));
        assert!(!is_upgrade(7.0, None));
        assert!(!is_upgrade(3.0, Some(9.0)));
    }
}
