// src/ingest/feed.rs
//! RSS 2.0 and Atom parsing into [`RawRecord`]s.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::error::FeedFetchError;
use crate::ingest::types::{FeedSpec, RawRecord};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: RssChannel,
}

#[derive(Debug, Deserialize)]
struct RssChannel {
    #[serde(rename = "item", default)]
    item: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    guid: Option<Text>,
    #[serde(rename = "category", default)]
    category: Vec<Text>,
    #[serde(rename = "encoded", alias = "content:encoded")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    id: Option<String>,
    title: Option<Text>,
    #[serde(rename = "link", default)]
    link: Vec<AtomLink>,
    summary: Option<Text>,
    content: Option<Text>,
    published: Option<String>,
    updated: Option<String>,
    #[serde(rename = "category", default)]
    category: Vec<AtomCategory>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomCategory {
    #[serde(rename = "@term")]
    term: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Rss,
    Atom,
}

/// Sniff the document root.
pub fn detect_format(xml: &str) -> Option<FeedFormat> {
    let rss = xml.find("<rss");
    let atom = xml.find("<feed");
    match (rss, atom) {
        (Some(r), Some(a)) => Some(if r < a { FeedFormat::Rss } else { FeedFormat::Atom }),
        (Some(_), None) => Some(FeedFormat::Rss),
        (None, Some(_)) => Some(FeedFormat::Atom),
        (None, None) => None,
    }
}

/// RFC 2822 (RSS) or RFC 3339 (Atom); `chrono` catches the looser variants,
/// and offset-less dates are taken as UTC.
pub fn parse_feed_date(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    let from_time = OffsetDateTime::parse(ts, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(ts, &Rfc3339))
        .ok()
        .and_then(|dt| DateTime::from_timestamp(dt.unix_timestamp(), dt.nanosecond()));
    from_time
        .or_else(|| {
            DateTime::parse_from_rfc2822(ts)
                .or_else(|_| DateTime::parse_from_rfc3339(ts))
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
        .or_else(|| parse_naive_utc(ts))
}

/// Offset-less `YYYY-MM-DD[( |T)HH:MM[:SS]]`, read as UTC.
fn parse_naive_utc(ts: &str) -> Option<DateTime<Utc>> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(ts, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(ts, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

pub fn parse_feed(xml: &str, feed: &FeedSpec) -> Result<Vec<RawRecord>, FeedFetchError> {
    let t0 = std::time::Instant::now();
    let clean = scrub_html_entities_for_xml(xml);
    let parse_err = |e: quick_xml::de::DeError| FeedFetchError::Parse {
        feed: feed.source.clone(),
        message: e.to_string(),
    };

    let records = match detect_format(&clean) {
        Some(FeedFormat::Rss) => {
            let rss: Rss = from_str(&clean).map_err(parse_err)?;
            rss.channel
                .item
                .into_iter()
                .map(|it| RawRecord {
                    source: feed.source.clone(),
                    tier: Some(feed.tier.get()),
                    guid: it
                        .guid
                        .map(|g| g.value.trim().to_string())
                        .filter(|g| !g.is_empty())
                        .or_else(|| it.link.clone()),
                    title: it.title,
                    link: it.link.map(|l| l.trim().to_string()),
                    description: it.description,
                    content: it.content,
                    pub_date: it.pub_date,
                    categories: it.category.into_iter().map(|c| c.value).collect(),
                    region: feed.region.clone(),
                    lang: feed.lang.clone(),
                })
                .collect::<Vec<_>>()
        }
        Some(FeedFormat::Atom) => {
            let atom: AtomFeed = from_str(&clean).map_err(parse_err)?;
            atom.entry
                .into_iter()
                .map(|e| {
                    let link = e
                        .link
                        .iter()
                        .find(|l| l.rel.as_deref().unwrap_or("alternate") == "alternate")
                        .or_else(|| e.link.first())
                        .and_then(|l| l.href.clone());
                    RawRecord {
                        source: feed.source.clone(),
                        tier: Some(feed.tier.get()),
                        guid: e.id.or_else(|| link.clone()),
                        title: e.title.map(|t| t.value),
                        link,
                        description: e.summary.map(|t| t.value),
                        content: e.content.map(|t| t.value),
                        pub_date: e.published.or(e.updated),
                        categories: e.category.into_iter().filter_map(|c| c.term).collect(),
                        region: feed.region.clone(),
                        lang: feed.lang.clone(),
                    }
                })
                .collect()
        }
        None => {
            return Err(FeedFetchError::Parse {
                feed: feed.source.clone(),
                message: "document is neither RSS nor Atom".into(),
            })
        }
    };

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("ingest_parse_ms").record(ms);
    counter!("ingest_events_total").increment(records.len() as u64);
    Ok(records)
}

// HTML entities XML does not define show up in real feeds.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn dates_in_both_formats() {
        let want = Utc.with_ymd_and_hms(2025, 3, 4, 14, 30, 0).unwrap();
        assert_eq!(parse_feed_date("Tue, 04 Mar 2025 14:30:00 +0000"), Some(want));
        assert_eq!(parse_feed_date("Tue, 04 Mar 2025 09:30:00 -0500"), Some(want));
        assert_eq!(parse_feed_date("2025-03-04T14:30:00Z"), Some(want));
        assert_eq!(parse_feed_date("2025-03-04T16:30:00+02:00"), Some(want));
        assert_eq!(parse_feed_date("yesterday"), None);
    }

    #[test]
    fn naive_dates_are_utc() {
        let want = Utc.with_ymd_and_hms(2025, 3, 4, 14, 30, 0).unwrap();
        assert_eq!(parse_feed_date("2025-03-04 14:30:00"), Some(want));
        assert_eq!(parse_feed_date("2025-03-04T14:30:00"), Some(want));
        assert_eq!(parse_feed_date("2025-03-04 14:30"), Some(want));
        assert_eq!(
            parse_feed_date("2025-03-04"),
            Some(Utc.with_ymd_and_hms(2025, 3, 4, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_feed_date("2025-13-04"), None);
    }

    #[test]
    fn sniffs_root() {
        assert_eq!(detect_format("<?xml?><rss version=\"2.0\">"), Some(FeedFormat::Rss));
        assert_eq!(
            detect_format("<feed xmlns=\"http://www.w3.org/2005/Atom\">"),
            Some(FeedFormat::Atom)
        );
        assert_eq!(detect_format("<html></html>"), None);
    }
}
