// src/ingest/mod.rs
pub mod config;
pub mod feed;
pub mod providers;
pub mod types;

use chrono::{DateTime, Utc};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

use crate::classify::Classifier;
use crate::ingest::feed::parse_feed_date;
use crate::ingest::types::{RawRecord, Rejection};
use crate::model::{NormalizedArticle, SourceTier};

pub const MAX_SUMMARY_CHARS: usize = 2000;
pub const MAX_BODY_CHARS: usize = 20_000;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_events_total", "Records parsed from feeds.");
        describe_counter!("ingest_kept_total", "Records accepted by the normalizer.");
        describe_counter!(
            "ingest_filtered_total",
            "Records rejected by the normalizer."
        );
        describe_counter!("ingest_provider_errors_total", "Feed fetch/parse errors.");
        describe_counter!(
            "ingest_actions_total",
            "Pipeline outcomes per article, by action."
        );
        describe_counter!("dedup_decisions_total", "Dedupe decisions, by reason.");
        describe_counter!("push_attempts_total", "Chat delivery attempts, by outcome.");
        describe_counter!("route_decisions_total", "Routing decisions, by channel.");
        describe_counter!(
            "route_store_errors_total",
            "Routing store failures that fell back to digest."
        );
        describe_counter!("scheduler_runs_total", "Timer ticks, by job.");
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when the ingest cycle last ran."
        );
        describe_gauge!("digest_last_run_ts", "Unix ts when the digest last ran.");
        describe_gauge!("cleanup_last_run_ts", "Unix ts when cache cleanup last ran.");
    });
}

/// Normalize text: decode entities, strip tags, straighten quotes, collapse whitespace, cap length.
pub fn normalize_text(s: &str, max_chars: usize) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap
    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect();
    }
    out
}

/// The Normalizer: turn an adapter record into a [`NormalizedArticle`], or
/// reject it when external_id, title, url or a parseable published_at is missing.
pub fn normalize_record(
    rec: RawRecord,
    classifier: &dyn Classifier,
) -> Result<NormalizedArticle, Rejection> {
    let reject = |reason: &str| Rejection {
        source: rec.source.clone(),
        reason: reason.to_string(),
    };

    let source = rec.source.trim().to_string();
    if source.is_empty() {
        return Err(reject("missing source"));
    }
    let external_id = rec
        .guid
        .as_deref()
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .ok_or_else(|| reject("missing external_id"))?
        .to_string();
    let title = normalize_text(rec.title.as_deref().unwrap_or_default(), 500);
    if title.is_empty() {
        return Err(reject("missing title"));
    }
    let link = rec
        .link
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .ok_or_else(|| reject("missing url"))?;
    let url = parse_http_url(link).ok_or_else(|| reject("invalid url"))?;
    let published_at: DateTime<Utc> = rec
        .pub_date
        .as_deref()
        .and_then(parse_feed_date)
        .ok_or_else(|| reject("missing or unparseable published_at"))?;

    let summary_src = rec
        .description
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .or(rec.content.as_deref())
        .unwrap_or_default();
    let summary = normalize_text(summary_src, MAX_SUMMARY_CHARS);
    let body = rec
        .content
        .as_deref()
        .map(|c| normalize_text(c, MAX_BODY_CHARS))
        .filter(|c| !c.is_empty());

    let text = format!("{title} {summary}");
    let symbols = classifier.symbols(&text);
    let entities = classifier.entities(&text);
    let region = rec
        .region
        .clone()
        .filter(|r| !r.trim().is_empty())
        .or_else(|| classifier.region(&source, &text));

    let mut tags: Vec<String> = Vec::new();
    let events = entities.get("events").cloned().unwrap_or_default();
    for t in rec.categories.iter().map(|c| normalize_text(c, 64)).chain(events) {
        let t = t.to_lowercase();
        if !t.is_empty() && !tags.contains(&t) {
            tags.push(t);
        }
    }

    Ok(NormalizedArticle {
        external_id,
        tier: rec.tier.and_then(SourceTier::new).unwrap_or_default(),
        source,
        title,
        title_translated: None,
        summary,
        body,
        url,
        published_at,
        symbols,
        entities,
        region,
        lang: rec
            .lang
            .clone()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| "en".to_string()),
        tags,
        commentary: None,
    })
}

/// Absolute http(s) URL, re-serialized by the `url` crate.
pub fn parse_http_url(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return None;
    }
    Some(parsed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::KeywordClassifier;

    fn record() -> RawRecord {
        RawRecord {
            source: "Acme Wire".into(),
            tier: Some(3),
            guid: Some("urn:acme:1".into()),
            title: Some("Acme (NASDAQ: ACME) beats <b>earnings</b>".into()),
            link: Some("https://wire.example.com/acme-beats".into()),
            description: Some("<p>Quarterly profit&nbsp;rose &amp; shares jumped.</p>".into()),
            content: None,
            pub_date: Some("Tue, 04 Mar 2025 14:30:00 GMT".into()),
            categories: vec!["Markets".into()],
            region: None,
            lang: None,
        }
    }

    #[test]
    fn normalize_text_strips_tags_and_collapses_ws() {
        let out = normalize_text("  Hello,&nbsp;&nbsp; <i>world</i>!  ", 100);
        assert_eq!(out, "Hello, world !");
        assert_eq!(normalize_text("“quoted”", 100), "\"quoted\"");
        assert_eq!(normalize_text("abcdef", 3), "abc");
    }

    #[test]
    fn complete_record_normalizes() {
        let a = normalize_record(record(), &KeywordClassifier).unwrap();
        assert_eq!(a.external_id, "urn:acme:1");
        assert_eq!(a.title, "Acme (NASDAQ: ACME) beats earnings");
        assert_eq!(a.summary, "Quarterly profit rose & shares jumped.");
        assert_eq!(a.tier.get(), 3);
        assert_eq!(a.symbols, vec!["ACME".to_string()]);
        assert_eq!(a.lang, "en");
        assert!(a.tags.contains(&"markets".to_string()));
        assert!(a.tags.contains(&"earnings".to_string()));
    }

    #[test]
    fn records_missing_required_fields_are_rejected() {
        let mut r = record();
        r.guid = None;
        assert_eq!(
            normalize_record(r, &KeywordClassifier).unwrap_err().reason,
            "missing external_id"
        );

        let mut r = record();
        r.title = Some("  <br/> ".into());
        assert!(normalize_record(r, &KeywordClassifier).is_err());

        let mut r = record();
        r.link = Some("not a url".into());
        assert_eq!(normalize_record(r, &KeywordClassifier).unwrap_err().reason, "invalid url");

        let mut r = record();
        r.pub_date = Some("sometime".into());
        assert!(normalize_record(r, &KeywordClassifier).is_err());
    }

    #[test]
    fn only_http_urls_with_hosts() {
        assert!(parse_http_url("https://example.com/a?b=1").is_some());
        assert!(parse_http_url("ftp://example.com/a").is_none());
        assert!(parse_http_url("mailto:x@example.com").is_none());
    }
}
