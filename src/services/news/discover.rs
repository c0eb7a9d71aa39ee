//! Article discovery: RSS feeds first, then category-listing backfill.
//!
//! Every discovered URL lands in `articles` as pending; the fetcher picks it
//! up later. A seed is finished once three consecutive listing pages yield
//! nothing new, and when every enabled seed is finished the global
//! `backfill.done` flag is set (external reset re-opens seeds).

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::constants::{BROWSER_UA, NO_NEW_PAGES_STOP};
use crate::error::Result;
use crate::models::ArticleMeta;
use crate::services::news::rss::{normalize_url, parse_rss};
use crate::services::source_client::{CallOptions, SourceClient};
use crate::services::warehouse::Warehouse;

static RE_ARTICLE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://(?:www\.)?(?:vietstock\.vn|fili\.vn)/\d{4}/\d{2}/[^\s"']+?\.htm"#)
        .unwrap()
});
static RE_REL_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"/\d{4}/\d{2}/[^\s"']+?\.htm"#).unwrap());

/// Pull every absolute or site-relative article URL out of a listing page.
pub fn extract_article_urls(html: &str) -> Vec<String> {
    let mut urls: Vec<String> = RE_ARTICLE_URL
        .find_iter(html)
        .map(|m| normalize_url(m.as_str()))
        .collect();
    for m in RE_REL_URL.find_iter(html) {
        urls.push(format!("https://vietstock.vn{}", m.as_str()));
    }
    urls.sort();
    urls.dedup();
    urls
}

#[derive(Debug, Clone)]
pub struct DiscoverConfig {
    /// Relay fronting the blocked upstream; feed and listing URLs are passed
    /// through `{relay}/fetch?url=...` when set.
    pub relay_base: Option<String>,
    pub listing_base: String,
    pub rss_limit: usize,
    pub budget_pages: u32,
    pub rate_per_sec: f64,
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            relay_base: None,
            listing_base: "https://vietstock.vn/StartPage/ChannelContentPage".to_string(),
            rss_limit: 500,
            budget_pages: 200,
            rate_per_sec: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoverSummary {
    pub ok: bool,
    pub feeds: usize,
    pub discovered: usize,
    pub backfill_pages: u32,
    pub backfill_done: bool,
}

pub struct NewsDiscovery {
    warehouse: Warehouse,
    client: SourceClient,
    config: DiscoverConfig,
}

impl NewsDiscovery {
    pub fn new(warehouse: Warehouse, client: SourceClient, config: DiscoverConfig) -> Self {
        Self { warehouse, client, config }
    }

    fn routed(&self, url: &str) -> String {
        match &self.config.relay_base {
            Some(base) => {
                let relayed = reqwest::Url::parse_with_params(
                    &format!("{}/fetch", base.trim_end_matches('/')),
                    &[("url", url)],
                );
                match relayed {
                    Ok(u) => u.to_string(),
                    Err(_) => url.to_string(),
                }
            }
            None => url.to_string(),
        }
    }

    async fn get_page(&self, url: &str) -> Result<String> {
        let opts = CallOptions::default().header("user-agent", BROWSER_UA);
        let resp = self.client.get(&self.routed(url), &opts).await?;
        Ok(resp.text)
    }

    pub async fn run(&self) -> Result<DiscoverSummary> {
        let pace = std::time::Duration::from_secs_f64(1.0 / self.config.rate_per_sec.max(0.1));
        let mut discovered = 0usize;

        // Stage 1: RSS feeds.
        let feeds = self.warehouse.list_feeds().await?;
        for feed_url in &feeds {
            match self.get_page(feed_url).await {
                Ok(xml) => {
                    let items = parse_rss(&xml);
                    let mut newest: Option<String> = None;
                    for item in items.iter().take(self.config.rss_limit) {
                        let meta = ArticleMeta {
                            url: normalize_url(&item.url),
                            source: "rss".to_string(),
                            title: item.title.clone(),
                            published_at: item.published_at,
                            feed_url: Some(feed_url.clone()),
                        };
                        self.warehouse.upsert_article_pending(&meta).await?;
                        discovered += 1;
                        if let Some(pub_at) = item.published_at {
                            let iso = pub_at.to_rfc3339();
                            if newest.as_deref().map_or(true, |n| iso.as_str() > n) {
                                newest = Some(iso);
                            }
                        }
                    }
                    self.warehouse.touch_feed(feed_url, newest.as_deref()).await?;
                }
                Err(e) => {
                    warn!(feed_url = %feed_url, error = %e, "Feed read failed, continuing");
                }
            }
            tokio::time::sleep(pace).await;
        }

        // Stage 2: listing-page backfill per enabled, unfinished seed.
        let mut backfill_pages = 0u32;
        let seeds = self.warehouse.pending_seeds().await?;
        'seeds: for (seed_url, channel_id, mut next_page, mut no_new) in seeds {
            let Some(channel_id) = channel_id else { continue };
            loop {
                if backfill_pages >= self.config.budget_pages {
                    break 'seeds;
                }
                let page_url = format!(
                    "{}?channelID={}&page={}",
                    self.config.listing_base, channel_id, next_page
                );
                match self.get_page(&page_url).await {
                    Ok(html) => {
                        let urls = extract_article_urls(&html);
                        let known = self.warehouse.known_article_count(&urls).await?;
                        let new_count = urls.len() as i64 - known;
                        for url in &urls {
                            let meta = ArticleMeta {
                                url: url.clone(),
                                source: "backfill".to_string(),
                                title: url.clone(),
                                published_at: None,
                                feed_url: None,
                            };
                            self.warehouse.upsert_article_pending(&meta).await?;
                            discovered += 1;
                        }

                        no_new = if new_count == 0 { no_new + 1 } else { 0 };
                        next_page += 1;
                        let done = no_new as u32 >= NO_NEW_PAGES_STOP;
                        self.warehouse
                            .advance_crawl_state(&seed_url, next_page, no_new, done, None)
                            .await?;
                        if done {
                            info!(seed_url = %seed_url, pages = next_page - 1, "Seed backfill done");
                            backfill_pages += 1;
                            break;
                        }
                    }
                    Err(e) => {
                        self.warehouse.record_crawl_error(&seed_url, &e.to_string()).await?;
                        backfill_pages += 1;
                        break;
                    }
                }
                backfill_pages += 1;
                tokio::time::sleep(pace).await;
            }
        }

        // Global flag: all enabled seeds finished.
        let remaining = self.warehouse.undone_seed_count().await?;
        let backfill_done = remaining == 0;
        if backfill_done {
            self.warehouse.kv_set("backfill.done", "1").await?;
        }

        let summary = DiscoverSummary {
            ok: true,
            feeds: feeds.len(),
            discovered,
            backfill_pages,
            backfill_done,
        };
        info!(summary = %serde_json::to_string(&summary).unwrap_or_default(), "Discovery done");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_absolute_and_relative_urls() {
        let html = r#"
            <a href="https://vietstock.vn/2026/02/fpt-lai-lon-737.htm">x</a>
            <a href="/2026/01/hpg-mo-rong-123.htm">y</a>
            <a href="https://fili.vn/2026/02/vnm-chia-co-tuc.htm">z</a>
            <a href="https://vietstock.vn/about.htm">not an article</a>
            <a href="https://vietstock.vn/2026/02/fpt-lai-lon-737.htm">dup</a>
        "#;
        let urls = extract_article_urls(html);
        assert_eq!(urls.len(), 3);
        assert!(urls.contains(&"https://vietstock.vn/2026/01/hpg-mo-rong-123.htm".to_string()));
        assert!(urls.iter().all(|u| u.contains("/2026/")));
    }
}
