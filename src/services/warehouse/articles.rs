use chrono::{DateTime, Utc};
use sqlx::Row;

use super::Warehouse;
use crate::constants::{MAX_STORED_ERROR_LEN, NEWS_SNIPPET_CHARS};
use crate::error::Result;
use crate::models::{ArticleMeta, FetchStatus, FetchedArticle, NewsRow};
use crate::utils::truncate_chars;

/// Keyset cursor over (published_at DESC, url DESC).
#[derive(Debug, Clone)]
pub struct NewsCursor {
    pub before_published_at: DateTime<Utc>,
    pub before_url: String,
}

impl Warehouse {
    /// Register a discovered article as pending. Re-discovery refreshes the
    /// metadata but never downgrades a fetched row back to pending.
    pub async fn upsert_article_pending(&self, meta: &ArticleMeta) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO articles (url, source, title, published_at, feed_url, fetch_status, discovered_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', now())
            ON CONFLICT (url) DO UPDATE SET
              title = CASE WHEN EXCLUDED.title <> EXCLUDED.url THEN EXCLUDED.title ELSE articles.title END,
              published_at = COALESCE(EXCLUDED.published_at, articles.published_at),
              feed_url = COALESCE(EXCLUDED.feed_url, articles.feed_url),
              ingested_at = now()
            "#,
        )
        .bind(&meta.url)
        .bind(&meta.source)
        .bind(&meta.title)
        .bind(meta.published_at)
        .bind(&meta.feed_url)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Count how many of the given URLs are already known; used by discovery
    /// to decide when a listing page stopped yielding new articles.
    pub async fn known_article_count(&self, urls: &[String]) -> Result<i64> {
        if urls.is_empty() {
            return Ok(0);
        }
        let n: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM articles WHERE url = ANY($1)",
        )
        .bind(urls)
        .fetch_one(self.pool())
        .await?;
        Ok(n)
    }

    pub async fn mark_article_fetched(&self, art: &FetchedArticle) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE articles SET
              fetch_status = $9,
              fetched_at = now(),
              title = COALESCE($2, title),
              published_at = COALESCE($3, published_at),
              text = $4,
              content_sha256 = $5,
              word_count = $6,
              lang = COALESCE($7, lang),
              fetch_method = $8,
              fetch_error = NULL
            WHERE url = $1
            "#,
        )
        .bind(&art.url)
        .bind(&art.title)
        .bind(art.published_at)
        .bind(&art.text)
        .bind(&art.content_sha256)
        .bind(art.word_count as i32)
        .bind(&art.lang)
        .bind(&art.fetch_method)
        .bind(FetchStatus::Fetched.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn mark_article_failed(&self, url: &str, err: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE articles SET
              fetch_status = $3,
              fetched_at = now(),
              fetch_error = $2
            WHERE url = $1
            "#,
        )
        .bind(url)
        .bind(truncate_chars(err, MAX_STORED_ERROR_LEN))
        .bind(FetchStatus::Failed.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Pending URLs in discovery order.
    pub async fn pending_article_urls(&self, limit: i64) -> Result<Vec<String>> {
        let urls: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT url FROM articles
            WHERE fetch_status = 'pending'
            ORDER BY discovered_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(urls)
    }

    /// Confidence only ever goes up for a given (article, ticker) pair.
    pub async fn upsert_article_symbol(
        &self,
        article_url: &str,
        ticker: &str,
        confidence: f64,
        method: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO article_symbols (article_url, ticker, confidence, method)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (article_url, ticker) DO UPDATE SET
              confidence = GREATEST(article_symbols.confidence, EXCLUDED.confidence),
              method = CASE WHEN EXCLUDED.confidence > article_symbols.confidence
                            THEN EXCLUDED.method ELSE article_symbols.method END
            "#,
        )
        .bind(article_url)
        .bind(ticker)
        .bind(confidence)
        .bind(method)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Fetched articles newest-first with aggregated ticker links. When
    /// `ticker` is set, only articles linked to it.
    pub async fn query_news(
        &self,
        ticker: Option<&str>,
        cursor: Option<&NewsCursor>,
        limit: i64,
    ) -> Result<Vec<NewsRow>> {
        let rows = sqlx::query(
            r#"
            SELECT a.url, a.title, a.source, a.published_at,
                   left(coalesce(a.text, ''), $5) AS snippet,
                   COALESCE(
                     array_agg(s.ticker ORDER BY s.ticker)
                       FILTER (WHERE s.ticker IS NOT NULL),
                     '{}'
                   ) AS tickers
            FROM articles a
            LEFT JOIN article_symbols s ON s.article_url = a.url
            WHERE a.fetch_status = 'fetched'
              AND ($1::text IS NULL OR EXISTS (
                    SELECT 1 FROM article_symbols t
                    WHERE t.article_url = a.url AND t.ticker = $1))
              AND ($2::timestamptz IS NULL
                   OR a.published_at < $2
                   OR (a.published_at = $2 AND a.url < $3))
            GROUP BY a.url
            ORDER BY a.published_at DESC NULLS LAST, a.url DESC
            LIMIT $4
            "#,
        )
        .bind(ticker)
        .bind(cursor.map(|c| c.before_published_at))
        .bind(cursor.map(|c| c.before_url.clone()))
        .bind(limit)
        .bind(NEWS_SNIPPET_CHARS as i32)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                let published_at: Option<DateTime<Utc>> = row.try_get("published_at")?;
                Ok(NewsRow {
                    url: row.try_get("url")?,
                    title: row.try_get("title")?,
                    source: row.try_get("source")?,
                    published_at: published_at.map(|dt| dt.to_rfc3339()),
                    snippet: row.try_get("snippet")?,
                    tickers: row.try_get("tickers")?,
                })
            })
            .collect()
    }

    // --- feed / seed / crawl-state discovery bookkeeping ---

    pub async fn list_feeds(&self) -> Result<Vec<String>> {
        let feeds: Vec<String> =
            sqlx::query_scalar("SELECT feed_url FROM feeds ORDER BY feed_url")
                .fetch_all(self.pool())
                .await?;
        Ok(feeds)
    }

    pub async fn touch_feed(&self, feed_url: &str, newest_published: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE feeds SET
              last_checked_at = now(),
              last_seen_published_at = COALESCE($2, last_seen_published_at),
              updated_at = now()
            WHERE feed_url = $1
            "#,
        )
        .bind(feed_url)
        .bind(newest_published)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Enabled seeds joined with crawl state, not-yet-done first.
    pub async fn pending_seeds(&self) -> Result<Vec<(String, Option<i32>, i32, i32)>> {
        sqlx::query(
            r#"
            INSERT INTO crawl_state (seed_url)
            SELECT seed_url FROM seeds WHERE enabled = true
            ON CONFLICT (seed_url) DO NOTHING
            "#,
        )
        .execute(self.pool())
        .await?;

        let rows = sqlx::query(
            r#"
            SELECT s.seed_url, s.channel_id, cs.next_page, cs.no_new_pages_count
            FROM seeds s
            JOIN crawl_state cs ON cs.seed_url = s.seed_url
            WHERE s.enabled = true AND cs.done = false
            ORDER BY cs.last_crawled_at NULLS FIRST, s.seed_url
            "#,
        )
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok((
                    row.try_get("seed_url")?,
                    row.try_get("channel_id")?,
                    row.try_get("next_page")?,
                    row.try_get("no_new_pages_count")?,
                ))
            })
            .collect()
    }

    pub async fn advance_crawl_state(
        &self,
        seed_url: &str,
        next_page: i32,
        no_new_pages_count: i32,
        done: bool,
        oldest_seen: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE crawl_state SET
              next_page = $2,
              no_new_pages_count = $3,
              done = $4,
              oldest_seen_published_at = LEAST(
                COALESCE(oldest_seen_published_at, $5), COALESCE($5, oldest_seen_published_at)),
              last_crawled_at = now(),
              last_error = NULL
            WHERE seed_url = $1
            "#,
        )
        .bind(seed_url)
        .bind(next_page)
        .bind(no_new_pages_count)
        .bind(done)
        .bind(oldest_seen)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn record_crawl_error(&self, seed_url: &str, err: &str) -> Result<()> {
        sqlx::query(
            "UPDATE crawl_state SET last_error = $2, last_crawled_at = now() WHERE seed_url = $1",
        )
        .bind(seed_url)
        .bind(truncate_chars(err, MAX_STORED_ERROR_LEN))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn undone_seed_count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar(
            r#"
            SELECT count(*)
            FROM crawl_state cs
            JOIN seeds s ON s.seed_url = cs.seed_url
            WHERE s.enabled = true AND cs.done = false
            "#,
        )
        .fetch_one(self.pool())
        .await?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::warehouse::test_warehouse;

    #[tokio::test]
    async fn link_confidence_is_monotone() {
        let Some(wh) = test_warehouse().await else { return };
        let url = format!("https://example.vn/{}/a.htm", crate::utils::now_ms());
        let meta = ArticleMeta {
            url: url.clone(),
            source: "rss".to_string(),
            title: "FPT tăng mạnh".to_string(),
            published_at: Some(chrono::Utc::now()),
            feed_url: None,
        };
        wh.upsert_article_pending(&meta).await.unwrap();

        wh.upsert_article_symbol(&url, "FPT", 0.95, "title_paren").await.unwrap();
        wh.upsert_article_symbol(&url, "FPT", 0.60, "body_token").await.unwrap();

        let row = sqlx::query("SELECT confidence, method FROM article_symbols WHERE article_url = $1 AND ticker = 'FPT'")
            .bind(&url)
            .fetch_one(wh.pool())
            .await
            .unwrap();
        let conf: f64 = row.try_get("confidence").unwrap();
        let method: String = row.try_get("method").unwrap();
        assert_eq!(conf, 0.95);
        assert_eq!(method, "title_paren");
    }
}
