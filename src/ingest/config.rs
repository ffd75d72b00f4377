// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ingest::types::FeedSpec;
use crate::model::SourceTier;

const ENV_PATH: &str = "FEEDS_CONFIG_PATH";

/// Adapters and their feeds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedCatalog {
    #[serde(default)]
    pub adapters: Vec<AdapterConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub feeds: Vec<FeedSpec>,
}

fn enabled_by_default() -> bool {
    true
}

impl FeedCatalog {
    pub fn enabled_adapters(&self) -> impl Iterator<Item = &AdapterConfig> {
        self.adapters.iter().filter(|a| a.enabled && !a.feeds.is_empty())
    }

    /// Built-in catalog used when no file is configured.
    pub fn default_seed() -> Self {
        let feed = |source: &str, url: &str, tier: u8, reliability: f32, region: &str| FeedSpec {
            source: source.to_string(),
            url: url.to_string(),
            tier: SourceTier::new(tier).unwrap_or_default(),
            reliability,
            rate_limit_per_min: 30,
            fetch_interval_secs: 900,
            timeout_secs: 10,
            region: Some(region.to_string()),
            lang: Some("en".to_string()),
        };
        Self {
            adapters: vec![
                AdapterConfig {
                    name: "official".into(),
                    enabled: true,
                    feeds: vec![
                        feed("SEC", "https://www.sec.gov/news/pressreleases.rss", 5, 0.98, "US"),
                        feed(
                            "Federal Reserve",
                            "https://www.federalreserve.gov/feeds/press_all.xml",
                            5,
                            0.98,
                            "US",
                        ),
                    ],
                },
                AdapterConfig {
                    name: "major-media".into(),
                    enabled: true,
                    feeds: vec![
                        feed("CNBC", "https://www.cnbc.com/id/100003114/device/rss/rss.html", 4, 0.85, "US"),
                        feed("WSJ Markets", "https://feeds.a.dj.com/rss/RSSMarketsMain.xml", 4, 0.9, "US"),
                    ],
                },
                AdapterConfig {
                    name: "wires".into(),
                    enabled: true,
                    feeds: vec![
                        feed(
                            "MarketWatch",
                            "https://feeds.content.dowjones.io/public/rss/mw_topstories",
                            3,
                            0.75,
                            "US",
                        ),
                        feed(
                            "GlobeNewswire",
                            "https://www.globenewswire.com/RssFeed/orgclass/1/feedTitle/GlobeNewswire%20-%20News%20about%20Public%20Companies",
                            3,
                            0.6,
                            "US",
                        ),
                    ],
                },
            ],
        }
    }

    /// Trim names, drop feeds without source or URL, drop repeated URLs.
    fn cleaned(mut self) -> Self {
        let mut seen_urls = HashSet::new();
        for adapter in &mut self.adapters {
            adapter.name = adapter.name.trim().to_string();
            adapter.feeds.retain_mut(|f| {
                f.source = f.source.trim().to_string();
                f.url = f.url.trim().to_string();
                !f.source.is_empty() && !f.url.is_empty() && seen_urls.insert(f.url.clone())
            });
        }
        self.adapters.retain(|a| !a.name.is_empty());
        self
    }
}

/// Load a catalog from an explicit path. Supports TOML or JSON formats.
pub fn load_catalog_from(path: &Path) -> Result<FeedCatalog> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading feed catalog from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_catalog(&content, ext.as_str())
        .with_context(|| format!("parsing feed catalog {}", path.display()))
}

/// Load the catalog using env var + fallbacks:
/// 1) $FEEDS_CONFIG_PATH
/// 2) config/feeds.toml
/// 3) config/feeds.json
/// 4) built-in seed
pub fn load_catalog_default() -> Result<FeedCatalog> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_catalog_from(&pb);
        }
        return Err(anyhow!("{ENV_PATH} points to non-existent path"));
    }
    let toml_p = PathBuf::from("config/feeds.toml");
    if toml_p.exists() {
        return load_catalog_from(&toml_p);
    }
    let json_p = PathBuf::from("config/feeds.json");
    if json_p.exists() {
        return load_catalog_from(&json_p);
    }
    Ok(FeedCatalog::default_seed())
}

pub fn parse_catalog(s: &str, hint_ext: &str) -> Result<FeedCatalog> {
    let catalog: FeedCatalog = if hint_ext == "json" || s.trim_start().starts_with('{') {
        serde_json::from_str(s)?
    } else {
        toml::from_str(s)?
    };
    Ok(catalog.cleaned())
}
