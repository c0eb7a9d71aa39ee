//! Polite article fetching: pending rows drain through a shared rate
//! limiter, bodies are extracted and hashed, and suspiciously thin results
//! get one retry through the render relay (headless browser) before the row
//! is settled.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::constants::{BROWSER_UA, MIN_ARTICLE_WORDS};
use crate::error::{Error, Result};
use crate::models::FetchedArticle;
use crate::services::news::extract::{
    detect_lang, extract_main_text, extract_published, extract_title, word_count,
};
use crate::services::source_client::{CallOptions, SourceClient};
use crate::services::symbol_linker::link_symbols_from_title;
use crate::services::warehouse::Warehouse;
use crate::utils::sha256_hex;

/// Token-less pacing shared across in-flight fetches: every acquire reserves
/// the next slot, so the request rate never exceeds the configured budget
/// even with concurrent workers.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_ok: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(rate_per_sec: f64) -> Self {
        Self {
            min_interval: Duration::from_secs_f64(1.0 / rate_per_sec.max(0.1)),
            next_ok: Mutex::new(Instant::now()),
        }
    }

    pub async fn acquire(&self) {
        let wait = {
            let mut next = self.next_ok.lock().await;
            let now = Instant::now();
            let slot = (*next).max(now);
            *next = slot + self.min_interval;
            slot.saturating_duration_since(now)
        };
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Render relay for JS-walled or blocked pages: `{base}/render?url=...`.
    pub render_base: Option<String>,
    pub rate_per_sec: f64,
    /// Link titles only against this known-ticker set when present.
    pub link_known_only: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self { render_base: None, rate_per_sec: 1.0, link_known_only: true }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchSummary {
    pub ok: bool,
    pub fetched: usize,
    pub failed: usize,
    pub rendered: usize,
    pub links_written: usize,
}

pub struct NewsFetcher {
    warehouse: Warehouse,
    client: SourceClient,
    config: FetcherConfig,
    limiter: Arc<RateLimiter>,
}

impl NewsFetcher {
    pub fn new(warehouse: Warehouse, client: SourceClient, config: FetcherConfig) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.rate_per_sec));
        Self { warehouse, client, config, limiter }
    }

    pub async fn run(&self, limit: i64) -> Result<FetchSummary> {
        let urls = self.warehouse.pending_article_urls(limit).await?;
        if urls.is_empty() {
            info!("No pending articles");
            return Ok(FetchSummary { ok: true, fetched: 0, failed: 0, rendered: 0, links_written: 0 });
        }

        let known: std::collections::HashSet<String> = if self.config.link_known_only {
            self.warehouse.known_tickers().await?.into_iter().collect()
        } else {
            Default::default()
        };
        let known_ref = if self.config.link_known_only { Some(&known) } else { None };

        let mut summary = FetchSummary { ok: true, fetched: 0, failed: 0, rendered: 0, links_written: 0 };
        for url in &urls {
            match self.fetch_one(url).await {
                Ok(article) => {
                    if article.fetch_method == "render" {
                        summary.rendered += 1;
                    }
                    self.warehouse.mark_article_fetched(&article).await?;
                    summary.fetched += 1;

                    // Title links are cheap and high-precision; body linking
                    // runs in the derived pass over fetched rows.
                    if let Some(title) = &article.title {
                        for link in link_symbols_from_title(title, known_ref) {
                            self.warehouse.ensure_symbol(&link.ticker).await?;
                            self.warehouse
                                .upsert_article_symbol(url, &link.ticker, link.confidence, &link.method)
                                .await?;
                            summary.links_written += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Article fetch failed");
                    self.warehouse.mark_article_failed(url, &e.to_string()).await?;
                    summary.failed += 1;
                }
            }
        }

        info!(summary = %serde_json::to_string(&summary).unwrap_or_default(), "News fetch done");
        Ok(summary)
    }

    async fn fetch_one(&self, url: &str) -> Result<FetchedArticle> {
        self.limiter.acquire().await;
        let opts = CallOptions::default().header("user-agent", BROWSER_UA);

        let (html, mut method) = match self.client.get(url, &opts).await {
            Ok(resp) => (resp.text, "http".to_string()),
            // Blocked (403 and friends): go straight to the render path.
            Err(Error::SourceTerminal { status, .. }) if status == 403 => {
                (self.fetch_rendered(url).await?, "render".to_string())
            }
            Err(e) => return Err(e),
        };

        let mut text = extract_main_text(&html);
        let mut title = extract_title(&html);
        let mut published_at = extract_published(&html);
        let mut wc = word_count(&text);

        // Thin body usually means a JS-rendered page; retry once rendered.
        if wc < MIN_ARTICLE_WORDS && method == "http" && self.config.render_base.is_some() {
            debug!(url = %url, words = wc, "Thin extraction, retrying via render relay");
            match self.fetch_rendered(url).await {
                Ok(rendered) => {
                    let rendered_text = extract_main_text(&rendered);
                    if word_count(&rendered_text) > wc {
                        title = extract_title(&rendered).or(title);
                        published_at = extract_published(&rendered).or(published_at);
                        text = rendered_text;
                        wc = word_count(&text);
                        method = "render".to_string();
                    }
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "Render retry failed, keeping http body");
                }
            }
        }

        if text.trim().is_empty() {
            return Err(Error::Parse("Empty body after extraction".to_string()));
        }

        Ok(FetchedArticle {
            url: url.to_string(),
            title,
            published_at,
            content_sha256: sha256_hex(text.as_bytes()),
            word_count: wc,
            lang: detect_lang(&text),
            fetch_method: method,
            text,
        })
    }

    async fn fetch_rendered(&self, url: &str) -> Result<String> {
        let base = self
            .config
            .render_base
            .as_deref()
            .ok_or_else(|| Error::Config("No render relay configured".to_string()))?;
        self.limiter.acquire().await;
        let rendered = reqwest::Url::parse_with_params(
            &format!("{}/render", base.trim_end_matches('/')),
            &[("url", url)],
        )
        .map_err(|e| Error::Config(format!("Bad render relay URL: {}", e)))?;
        let opts = CallOptions::with_timeout(45_000).header("user-agent", BROWSER_UA);
        let resp = self.client.get(rendered.as_str(), &opts).await?;
        Ok(resp.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limiter_spaces_out_acquires() {
        let limiter = RateLimiter::new(50.0); // 20ms spacing
        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire().await;
        }
        // first slot free, three paced waits
        assert!(start.elapsed() >= Duration::from_millis(55));
    }
}
