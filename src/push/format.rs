//! Chat message rendering (HTML parse mode).
//!
//! Layout:
//! ```text
//! <b>title</b>
//! source · channel · score/10
//!
//! summary
//!
//! <i>commentary</i>
//!
//! <a href="url">Read at source</a>
//! #tags
//! ```
//! Length is measured in UTF-16 code units, the unit the chat API counts in.

use crate::classify::{region_tag, score_tier_tag, Classifier};
use crate::model::PushItem;

/// Hard per-message ceiling of the delivery API.
pub const MAX_MESSAGE_LEN: usize = 4096;

const ELLIPSIS: char = '…';

/// Hashtag line inputs: score tier, region, event categories.
pub fn hashtags(item: &PushItem, classifier: &dyn Classifier) -> Vec<String> {
    let text = format!("{} {}", item.title, item.summary);
    let mut tags = vec![score_tier_tag(item.composite).to_string()];
    if let Some(region) = classifier.region(&item.source, &text) {
        tags.push(region_tag(&region));
    }
    for cat in classifier.event_categories(&text) {
        tags.push(cat.hashtag().to_string());
    }
    tags
}

pub fn format_message(item: &PushItem, tags: &[String]) -> String {
    format_message_with_cap(item, tags, MAX_MESSAGE_LEN)
}

/// Render `item` so the result never exceeds `cap` UTF-16 units. Title and
/// commentary are each held to a quarter of the cap; the summary takes what
/// is left and is cut with an ellipsis. The source link is always kept.
pub fn format_message_with_cap(item: &PushItem, tags: &[String], cap: usize) -> String {
    let source = html_escape::encode_text(&item.source);
    let header = format!(
        "{} · {} · {:.1}/10",
        source,
        item.channel.as_str(),
        item.composite
    );
    let link = format!(
        "<a href=\"{}\">Read at {}</a>",
        html_escape::encode_double_quoted_attribute(&item.url),
        source
    );
    let tag_line = tags.join(" ");
    let commentary = item
        .commentary
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    let summary = item.summary.trim();

    // everything except the variable text blocks
    let mut fixed = len16("<b></b>\n") + len16(&header) + len16("\n\n") + len16(&link);
    if !tag_line.is_empty() {
        fixed += len16("\n") + len16(&tag_line);
    }
    if !summary.is_empty() {
        fixed += len16("\n\n");
    }
    if commentary.is_some() {
        fixed += len16("\n\n<i></i>");
    }
    if fixed >= cap {
        // no room for the layout: title over the bare URL, which is never cut
        let url = html_escape::encode_text(&item.url);
        let url_len = len16(&url);
        if url_len + 1 >= cap {
            return fit_escaped(item.display_title(), cap);
        }
        let title = fit_escaped(item.display_title(), cap - url_len - 1);
        return format!("{title}\n{url}");
    }

    let mut budget = cap - fixed;
    let title = fit_escaped(item.display_title(), budget.min(cap / 4));
    budget -= len16(&title);
    let commentary = commentary.map(|c| fit_escaped(c, budget.min(cap / 4)));
    budget -= commentary.as_deref().map(len16).unwrap_or(0);
    let summary = fit_escaped(summary, budget);

    let mut out = format!("<b>{title}</b>\n{header}");
    if !summary.is_empty() {
        out.push_str("\n\n");
        out.push_str(&summary);
    }
    if let Some(c) = commentary {
        out.push_str("\n\n<i>");
        out.push_str(&c);
        out.push_str("</i>");
    }
    out.push_str("\n\n");
    out.push_str(&link);
    if !tag_line.is_empty() {
        out.push('\n');
        out.push_str(&tag_line);
    }
    out
}

pub fn len16(s: &str) -> usize {
    s.encode_utf16().count()
}

/// HTML-escape `raw`, cutting on a character boundary (never inside an
/// entity) and appending `…` when it does not fit in `budget` units.
fn fit_escaped(raw: &str, budget: usize) -> String {
    let full = html_escape::encode_text(raw);
    if len16(&full) <= budget {
        return full.into_owned();
    }
    if budget == 0 {
        return String::new();
    }
    let room = budget - ELLIPSIS.len_utf16();
    let mut out = String::new();
    let mut used = 0;
    let mut buf = [0u8; 4];
    for ch in raw.chars() {
        let esc = html_escape::encode_text(ch.encode_utf8(&mut buf));
        let n = len16(&esc);
        if used + n > room {
            break;
        }
        out.push_str(&esc);
        used += n;
    }
    let trimmed = out.trim_end().len();
    out.truncate(trimmed);
    out.push(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::KeywordClassifier;
    use crate::model::Channel;
    use chrono::Utc;

    fn item(summary: &str) -> PushItem {
        PushItem {
            article_id: 1,
            source: "Reuters".into(),
            title: "Acme beats earnings".into(),
            title_translated: None,
            summary: summary.into(),
            url: "https://news.example.com/acme?a=1&b=2".into(),
            published_at: Utc::now(),
            composite: 8.4,
            commentary: None,
            channel: Channel::Digest,
        }
    }

    #[test]
    fn short_message_is_complete() {
        let msg = format_message(&item("Profit up <10%> & more"), &["#HighImpact".into()]);
        assert!(msg.starts_with("<b>Acme beats earnings</b>\nReuters · digest · 8.4/10"));
        assert!(msg.contains("Profit up &lt;10%&gt; &amp; more"));
        assert!(msg.contains("href=\"https://news.example.com/acme?a=1&amp;b=2\""));
        assert!(msg.ends_with("#HighImpact"));
        assert!(!msg.contains('…'));
    }

    #[test]
    fn long_summary_is_cut_with_ellipsis_and_link_kept() {
        let long = "Lorem ipsum & dolor ".repeat(600);
        let msg = format_message(&item(&long), &["#HighImpact".into(), "#Global".into()]);
        assert!(len16(&msg) <= MAX_MESSAGE_LEN);
        assert!(msg.contains('…'));
        assert!(msg.contains("<a href=\"https://news.example.com/acme?a=1&amp;b=2\">Read at Reuters</a>"));
        assert!(msg.ends_with("#HighImpact #Global"));
    }

    #[test]
    fn never_splits_an_entity() {
        let msg = format_message_with_cap(&item(&"&".repeat(500)), &[], 300);
        assert!(len16(&msg) <= 300);
        let body = msg.split("\n\n").nth(1).unwrap();
        assert!(body.trim_end_matches('…').split("&amp;").all(|s| s.is_empty()));
    }

    #[test]
    fn oversized_url_is_kept_whole_without_markup() {
        let mut it = item("Summary");
        it.title = "Acme beats earnings on strong cloud demand".into();
        it.url = format!("https://news.example.com/{}?a=1&b=2", "x".repeat(230));
        let msg = format_message_with_cap(&it, &["#HighImpact".into()], 300);
        assert!(len16(&msg) <= 300);
        assert!(!msg.contains("<a "));
        let escaped = html_escape::encode_text(&it.url).into_owned();
        assert!(msg.ends_with(&format!("\n{escaped}")), "{msg}");
        assert!(msg.starts_with("Acme"));
    }

    #[test]
    fn url_longer_than_the_cap_falls_back_to_the_title() {
        let mut it = item("Summary");
        it.url = format!("https://news.example.com/{}", "x".repeat(400));
        let msg = format_message_with_cap(&it, &[], 300);
        assert_eq!(msg, "Acme beats earnings");
    }

    #[test]
    fn translated_title_and_commentary_render() {
        let mut it = item("Summary");
        it.title_translated = Some("Acme übertrifft Erwartungen".into());
        it.commentary = Some("Watch guidance.".into());
        let msg = format_message(&it, &[]);
        assert!(msg.starts_with("<b>Acme übertrifft Erwartungen</b>"));
        assert!(msg.contains("<i>Watch guidance.</i>"));
    }

    #[test]
    fn hashtags_combine_three_classifiers() {
        let tags = hashtags(&item("Shares rally after the earnings beat"), &KeywordClassifier);
        assert_eq!(tags[0], "#HighImpact");
        assert!(tags.contains(&"#Global".to_string()));
        assert!(tags.contains(&"#Earnings".to_string()));
        assert!(tags.contains(&"#Markets".to_string()));
    }
}
