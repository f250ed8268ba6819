//! # Metric Source — Engagement Counter Scraping
//!
//! Reads the engagement counter (like count) of a live stream from its public
//! watch page. The page embeds the count inside an inline `<script>` as
//! `"likeCount":"<digits>"`; the scraper walks every script element and takes
//! the first well-formed occurrence.
//!
//! Fetch failures are not errors from the caller's point of view: the poller
//! logs them and waits for the next tick, so [`MetricSource::fetch_metric`]
//! returns `Option<u64>`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_WATCH_URL: &str = "https://www.youtube.com/watch";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

const LIKE_COUNT_KEY: &str = "\"likeCount\":\"";
const MAX_TRACKED_ID_LEN: usize = 64;

pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Option<u64>> + Send + 'a>>;

/// Anything that can report the current metric for a tracked id.
pub trait MetricSource: Send + Sync {
    fn fetch_metric<'a>(&'a self, tracked_id: &'a str) -> FetchFuture<'a>;
}

/// Scrapes the public watch page over HTTPS.
pub struct WatchPageSource {
    client: reqwest::Client,
    base_url: String,
}

impl WatchPageSource {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        url::Url::parse(base_url)?;
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(WatchPageSource {
            client,
            base_url: base_url.to_string(),
        })
    }

    pub fn page_url(&self, tracked_id: &str) -> anyhow::Result<url::Url> {
        Ok(url::Url::parse_with_params(
            &self.base_url,
            &[("v", tracked_id)],
        )?)
    }

    async fn fetch(&self, tracked_id: &str) -> anyhow::Result<Option<u64>> {
        let url = self.page_url(tracked_id)?;
        let response = self.client.get(url).send().await?.error_for_status()?;
        let html = response.text().await?;
        Ok(parse_like_count(&html))
    }
}

impl MetricSource for WatchPageSource {
    fn fetch_metric<'a>(&'a self, tracked_id: &'a str) -> FetchFuture<'a> {
        Box::pin(async move {
            match self.fetch(tracked_id).await {
                Ok(Some(n)) => {
                    debug!(tracked_id, value = n, "metric fetched");
                    Some(n)
                }
                Ok(None) => {
                    warn!(tracked_id, "like count not found on watch page");
                    None
                }
                Err(e) => {
                    warn!(tracked_id, error = %e, "metric fetch failed");
                    None
                }
            }
        })
    }
}

/// Extract the like count from a watch page.
pub fn parse_like_count(html: &str) -> Option<u64> {
    let document = scraper::Html::parse_document(html);
    let script_sel = scraper::Selector::parse("script").ok()?;
    document
        .select(&script_sel)
        .map(|s| s.text().collect::<String>())
        .filter(|text| text.contains(LIKE_COUNT_KEY))
        .find_map(|text| find_like_count(&text))
}

fn find_like_count(text: &str) -> Option<u64> {
    let mut rest = text;
    while let Some(pos) = rest.find(LIKE_COUNT_KEY) {
        rest = &rest[pos + LIKE_COUNT_KEY.len()..];
        let digits_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits_len > 0 && rest[digits_len..].starts_with('"') {
            if let Ok(n) = rest[..digits_len].parse() {
                return Some(n);
            }
        }
    }
    None
}

/// Accept a bare stream id or a watch/short URL and return the id.
pub fn normalize_tracked_id(input: &str) -> Result<String, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("tracked id is required".to_string());
    }
    let candidate = if input.contains("://") {
        let parsed = url::Url::parse(input).map_err(|e| format!("invalid URL: {}", e))?;
        let from_query = parsed
            .query_pairs()
            .find(|(k, _)| k == "v")
            .map(|(_, v)| v.into_owned());
        match from_query {
            Some(v) => v,
            None => parsed
                .path_segments()
                .and_then(|mut segs| segs.next_back())
                .unwrap_or("")
                .to_string(),
        }
    } else {
        input.to_string()
    };

    let valid = !candidate.is_empty()
        && candidate.len() <= MAX_TRACKED_ID_LEN
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(format!("invalid tracked id '{}'", input));
    }
    Ok(candidate)
}
