//! Heuristic text classifiers: symbols, region, event categories, score tier.
//!
//! The pipeline only sees the [`Classifier`] trait so a model-backed
//! implementation can replace [`KeywordClassifier`] without touching control flow.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventCategory {
    Earnings,
    MergersAcquisitions,
    MonetaryPolicy,
    Ipo,
    Legal,
    ExecutiveChange,
    Crisis,
    Buyback,
    Dividend,
    AnalystRating,
    Regulation,
    ProductLaunch,
    Innovation,
    MarketMovement,
}

impl EventCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            EventCategory::Earnings => "earnings",
            EventCategory::MergersAcquisitions => "m_and_a",
            EventCategory::MonetaryPolicy => "monetary_policy",
            EventCategory::Ipo => "ipo",
            EventCategory::Legal => "legal",
            EventCategory::ExecutiveChange => "executive_change",
            EventCategory::Crisis => "crisis",
            EventCategory::Buyback => "buyback",
            EventCategory::Dividend => "dividend",
            EventCategory::AnalystRating => "analyst_rating",
            EventCategory::Regulation => "regulation",
            EventCategory::ProductLaunch => "product_launch",
            EventCategory::Innovation => "innovation",
            EventCategory::MarketMovement => "market_movement",
        }
    }

    pub fn hashtag(self) -> &'static str {
        match self {
            EventCategory::Earnings => "#Earnings",
            EventCategory::MergersAcquisitions => "#MnA",
            EventCategory::MonetaryPolicy => "#MonetaryPolicy",
            EventCategory::Ipo => "#IPO",
            EventCategory::Legal => "#Legal",
            EventCategory::ExecutiveChange => "#Leadership",
            EventCategory::Crisis => "#Crisis",
            EventCategory::Buyback => "#Buyback",
            EventCategory::Dividend => "#Dividend",
            EventCategory::AnalystRating => "#AnalystRating",
            EventCategory::Regulation => "#Regulation",
            EventCategory::ProductLaunch => "#ProductLaunch",
            EventCategory::Innovation => "#Innovation",
            EventCategory::MarketMovement => "#Markets",
        }
    }
}

pub trait Classifier: Send + Sync {
    /// Ticker symbols mentioned in the text, upper-case, first mention first.
    fn symbols(&self, text: &str) -> Vec<String>;

    /// Region of a story: source lookup first, then text keywords.
    fn region(&self, source: &str, text: &str) -> Option<String>;

    fn event_categories(&self, text: &str) -> Vec<EventCategory>;

    /// `tickers` and `events` entity lists for storage.
    fn entities(&self, text: &str) -> BTreeMap<String, Vec<String>> {
        let mut map = BTreeMap::new();
        let tickers = self.symbols(text);
        if !tickers.is_empty() {
            map.insert("tickers".to_string(), tickers);
        }
        let events: Vec<String> = self
            .event_categories(text)
            .into_iter()
            .map(|c| c.as_str().to_string())
            .collect();
        if !events.is_empty() {
            map.insert("events".to_string(), events);
        }
        map
    }
}

/// Score-tier hashtag for a composite in [0,10].
pub fn score_tier_tag(composite: f64) -> &'static str {
    if composite >= 8.0 {
        "#HighImpact"
    } else if composite >= 5.0 {
        "#MediumImpact"
    } else {
        "#LowImpact"
    }
}

/// Region hashtag, e.g. `US` → `#US`.
pub fn region_tag(region: &str) -> String {
    let cleaned: String = region.chars().filter(|c| c.is_alphanumeric()).collect();
    format!("#{cleaned}")
}

static CASHTAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([A-Z]{1,5}(?:\.[A-Z])?)\b").unwrap());
static EXCHANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\((?i:NASDAQ|NYSE|NYSE American|NYSEARCA|AMEX|OTC|TSX|LSE)\s*:\s*([A-Z]{1,5}(?:\.[A-Z])?)\)")
        .unwrap()
});

const SOURCE_REGIONS: &[(&str, &str)] = &[
    ("sec", "US"),
    ("federal reserve", "US"),
    ("fed", "US"),
    ("wall street journal", "US"),
    ("wsj", "US"),
    ("cnbc", "US"),
    ("marketwatch", "US"),
    ("business wire", "US"),
    ("pr newswire", "US"),
    ("globenewswire", "US"),
    ("ecb", "EU"),
    ("european central bank", "EU"),
    ("financial times", "UK"),
    ("bank of england", "UK"),
    ("nikkei", "Japan"),
    ("bank of japan", "Japan"),
    ("caixin", "China"),
    ("xinhua", "China"),
    ("scmp", "HongKong"),
    ("reuters", "Global"),
    ("bloomberg", "Global"),
];

static REGION_KEYWORDS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        ("US", Regex::new(r"(?i)\b(u\.s\.|united states|wall street|nasdaq|nyse|s&p 500|dow jones|federal reserve|the fed|treasury)").unwrap()),
        ("EU", Regex::new(r"(?i)\b(ecb|eurozone|euro area|european union|brussels)\b").unwrap()),
        ("UK", Regex::new(r"(?i)\b(britain|british|bank of england|ftse|london)\b").unwrap()),
        ("China", Regex::new(r"(?i)\b(china|chinese|beijing|shanghai|shenzhen|yuan|pboc)\b").unwrap()),
        ("Japan", Regex::new(r"(?i)\b(japan|japanese|tokyo|nikkei|bank of japan|boj|yen)\b").unwrap()),
        ("HongKong", Regex::new(r"(?i)\b(hong kong|hang seng|hkex)\b").unwrap()),
    ]
});

static EVENT_PATTERNS: Lazy<Vec<(EventCategory, Regex)>> = Lazy::new(|| {
    use EventCategory::*;
    let p = |re: &str| Regex::new(re).unwrap();
    vec![
        (Earnings, p(r"(?i)\b(earnings|quarterly results|revenue|profit|eps|guidance|beats estimates|misses estimates)\b")),
        (MergersAcquisitions, p(r"(?i)\b(merger|merge|acquisition|acquires?|acquired|takeover|buyout|to buy)\b")),
        (MonetaryPolicy, p(r"(?i)\b(interest rates?|rate (cut|hike)s?|fomc|central bank|monetary policy|basis points|inflation target)\b")),
        (Ipo, p(r"(?i)\b(ipo|initial public offering|goes public|public debut|listing debut)\b")),
        (Legal, p(r"(?i)\b(lawsuit|sued|sues|litigation|settlement|court|antitrust|class action)\b")),
        (ExecutiveChange, p(r"(?i)\b(ceo|cfo|chief executive|resigns?|steps down|appoint(s|ed)?|names new)\b")),
        (Crisis, p(r"(?i)\b(bankrupt\w*|chapter 11|insolven\w*|default(s|ed)?|crisis|collapse[sd]?|bailout)\b")),
        (Buyback, p(r"(?i)\b(buybacks?|share repurchases?|repurchase program)\b")),
        (Dividend, p(r"(?i)\b(dividends?|payout)\b")),
        (AnalystRating, p(r"(?i)\b(upgrades?|downgrades?|upgraded|downgraded|price target|outperform|underperform|overweight|underweight)\b")),
        (Regulation, p(r"(?i)\b(regulators?|regulation|regulatory|sec filing|fined|sanctions?|compliance)\b")),
        (ProductLaunch, p(r"(?i)\b(launch(es|ed)?|unveil(s|ed)?|new product|rollout|release[sd]?)\b")),
        (Innovation, p(r"(?i)\b(ai|artificial intelligence|breakthrough|patent|chip|semiconductor|quantum)\b")),
        (MarketMovement, p(r"(?i)\b(rall(y|ies|ied)|plunge[sd]?|surge[sd]?|soar(s|ed)?|tumble[sd]?|sell-?off|record high|slump(s|ed)?)\b")),
    ]
});

// single-word names must match a whole word so `sec` does not hit `second`
fn source_matches(source: &str, name: &str) -> bool {
    if name.contains(' ') {
        source.contains(name)
    } else {
        source
            .split(|c: char| !c.is_alphanumeric())
            .any(|w| w == name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier;

impl Classifier for KeywordClassifier {
    fn symbols(&self, text: &str) -> Vec<String> {
        let mut out: Vec<(usize, String)> = CASHTAG_RE
            .captures_iter(text)
            .chain(EXCHANGE_RE.captures_iter(text))
            .filter_map(|c| c.get(1).map(|m| (m.start(), m.as_str().to_ascii_uppercase())))
            .collect();
        out.sort_by_key(|(pos, _)| *pos);

        let mut symbols: Vec<String> = Vec::with_capacity(out.len());
        for (_, s) in out {
            if !symbols.contains(&s) {
                symbols.push(s);
            }
        }
        symbols
    }

    fn region(&self, source: &str, text: &str) -> Option<String> {
        let source = source.to_lowercase();
        if let Some((_, region)) = SOURCE_REGIONS
            .iter()
            .find(|(name, _)| source_matches(&source, name))
        {
            return Some((*region).to_string());
        }
        REGION_KEYWORDS
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(region, _)| (*region).to_string())
    }

    fn event_categories(&self, text: &str) -> Vec<EventCategory> {
        EVENT_PATTERNS
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(c, _)| *c)
            .collect()
    }
}
