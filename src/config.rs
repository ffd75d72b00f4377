use anyhow::{Context, Result};
use std::collections::HashSet;
use std::time::Duration;

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub ingest_secret: Option<String>,
    pub telegram: Option<TelegramConfig>,
    pub ingest_interval: Duration,
    pub digest_interval: Duration,
    pub cleanup_interval: Duration,
    pub digest_lookback_hours: i64,
    pub digest_top_n: u32,
    pub ingest_lookback_hours: i64,
    pub adapter_batch_limit: usize,
    pub tracked_symbols: HashSet<String>,
    pub holdings: HashSet<String>,
    pub market_hours_weighting: bool,
    pub push_base_delay: Duration,
    pub push_send_delay: Duration,
}

#[derive(Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

// keep the token out of logs
impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"***")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from any key lookup; unset and blank values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let telegram = match (get("TELEGRAM_BOT_TOKEN"), get("TELEGRAM_CHAT_ID")) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramConfig { bot_token, chat_id }),
            _ => None,
        };

        Ok(Self {
            database_url: get("DATABASE_URL")
                .context("Required environment variable 'DATABASE_URL' is not set")?,
            ingest_secret: get("INGEST_SECRET"),
            telegram,
            ingest_interval: Duration::from_secs(parse_or(&get, "INGEST_INTERVAL_SECS", 900)?),
            digest_interval: Duration::from_secs(parse_or(&get, "DIGEST_INTERVAL_SECS", 7200)?),
            cleanup_interval: Duration::from_secs(parse_or(&get, "CLEANUP_INTERVAL_SECS", 21_600)?),
            digest_lookback_hours: parse_or(&get, "DIGEST_LOOKBACK_HOURS", 12)?,
            digest_top_n: parse_or(&get, "DIGEST_TOP_N", 10)?,
            ingest_lookback_hours: parse_or(&get, "INGEST_LOOKBACK_HOURS", 24)?,
            adapter_batch_limit: parse_or(&get, "ADAPTER_BATCH_LIMIT", 200)?,
            tracked_symbols: symbol_set(get("TRACKED_SYMBOLS")),
            holdings: symbol_set(get("HOLDINGS")),
            market_hours_weighting: parse_bool(get("MARKET_HOURS_WEIGHTING"), true)?,
            push_base_delay: Duration::from_millis(parse_or(&get, "PUSH_BASE_DELAY_MS", 1000)?),
            push_send_delay: Duration::from_millis(parse_or(&get, "PUSH_SEND_DELAY_MS", 1100)?),
        })
    }

    /// Relevance is measured against tracked symbols and holdings together.
    pub fn relevance_symbols(&self) -> HashSet<String> {
        self.tracked_symbols.union(&self.holdings).cloned().collect()
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(v) => v
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{v}'")),
        None => Ok(default),
    }
}

fn parse_bool(v: Option<String>, default: bool) -> Result<bool> {
    match v.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => anyhow::bail!("expected a boolean, got '{other}'"),
    }
}

fn symbol_set(v: Option<String>) -> HashSet<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().trim_start_matches('$').to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply() {
        let c = cfg(&[("DATABASE_URL", "postgres://localhost/news")]).unwrap();
        assert_eq!(c.ingest_interval, Duration::from_secs(900));
        assert_eq!(c.digest_interval, Duration::from_secs(7200));
        assert_eq!(c.cleanup_interval, Duration::from_secs(21_600));
        assert_eq!(c.digest_lookback_hours, 12);
        assert_eq!(c.digest_top_n, 10);
        assert!(c.market_hours_weighting);
        assert!(c.telegram.is_none());
        assert!(c.ingest_secret.is_none());
    }

    #[test]
    fn database_url_is_required() {
        let err = cfg(&[]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn lists_flags_and_numbers_parse() {
        let c = cfg(&[
            ("DATABASE_URL", "postgres://x"),
            ("TRACKED_SYMBOLS", " aapl, $msft ,,"),
            ("HOLDINGS", "NVDA"),
            ("MARKET_HOURS_WEIGHTING", "off"),
            ("DIGEST_TOP_N", "5"),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_CHAT_ID", "-100200"),
        ])
        .unwrap();
        assert_eq!(c.tracked_symbols.len(), 2);
        assert!(c.tracked_symbols.contains("MSFT"));
        assert_eq!(c.relevance_symbols().len(), 3);
        assert!(!c.market_hours_weighting);
        assert_eq!(c.digest_top_n, 5);
        assert!(!format!("{:?}", c.telegram).contains("123:abc"));
    }

    #[test]
    fn bad_number_is_an_error() {
        assert!(cfg(&[("DATABASE_URL", "x"), ("DIGEST_TOP_N", "ten")]).is_err());
    }
}
