use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;

use crate::models::{Period, Statement, Tf};
use crate::server::params::{parse_before_ts, parse_limit, parse_tf, parse_ticker};
use crate::server::response::{ApiCode, ApiError, ApiResult};
use crate::server::AppState;
use crate::services::warehouse::articles::NewsCursor;
use crate::services::warehouse::corporate_actions::CaCursor;
use crate::utils::{evaluate_freshness, now_ms, parse_timestamp};

fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let presented = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if presented != Some(state.api_key.as_str()) {
        return Err(ApiError::new(ApiCode::Unauthorized));
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn healthz(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    check_auth(&state, &headers)?;
    match state.warehouse.ping().await {
        Ok(db) => Ok(Json(json!({ "ok": true, "db": db }))),
        Err(_) => Err(ApiError::new(ApiCode::DbUnreachable)),
    }
}

#[derive(Debug, Deserialize)]
pub struct CandlesQuery {
    ticker: Option<String>,
    tf: Option<String>,
    #[serde(rename = "beforeTs")]
    before_ts: Option<String>,
    limit: Option<String>,
}

#[instrument(skip(state, headers))]
pub async fn candles(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<CandlesQuery>,
) -> ApiResult<Json<Value>> {
    check_auth(&state, &headers)?;
    let ticker = parse_ticker(q.ticker.as_deref())?;
    let tf = parse_tf(q.tf.as_deref())?;
    let before_ts = parse_before_ts(q.before_ts.as_deref())?;
    let limit = parse_limit(q.limit.as_deref())?;

    let rows = state.warehouse.query_candles(&ticker, tf, before_ts, limit).await?;
    Ok(Json(json!({
        "ok": true,
        "ticker": ticker,
        "tf": tf.as_str(),
        "count": rows.len(),
        "rows": rows,
    })))
}

#[derive(Debug, Deserialize)]
pub struct TfQuery {
    tf: Option<String>,
    limit: Option<String>,
}

#[instrument(skip(state, headers))]
pub async fn latest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<TfQuery>,
) -> ApiResult<Json<Value>> {
    check_auth(&state, &headers)?;
    let tf = parse_tf(q.tf.as_deref())?;
    let limit = parse_limit(q.limit.as_deref())?;
    let rows = state.warehouse.query_latest(tf, limit).await?;
    Ok(Json(json!({ "ok": true, "tf": tf.as_str(), "count": rows.len(), "rows": rows })))
}

#[instrument(skip(state, headers))]
pub async fn top_movers(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<TfQuery>,
) -> ApiResult<Json<Value>> {
    check_auth(&state, &headers)?;
    let tf = parse_tf(q.tf.as_deref())?;
    let limit = parse_limit(q.limit.as_deref())?;
    let rows = state.warehouse.query_top_movers(tf, limit).await?;
    Ok(Json(json!({ "ok": true, "tf": tf.as_str(), "count": rows.len(), "rows": rows })))
}

#[derive(Debug, Deserialize)]
pub struct NewsQuery {
    ticker: Option<String>,
    limit: Option<String>,
    #[serde(rename = "beforePublishedAt")]
    before_published_at: Option<String>,
    #[serde(rename = "beforeUrl")]
    before_url: Option<String>,
}

fn news_cursor(q: &NewsQuery) -> Result<Option<NewsCursor>, ApiError> {
    match (&q.before_published_at, &q.before_url) {
        (None, None) => Ok(None),
        (Some(ts), Some(url)) => {
            let before_published_at = parse_timestamp(ts)
                .map_err(|_| ApiError::with_message(ApiCode::MissingParam, "beforePublishedAt"))?;
            Ok(Some(NewsCursor { before_published_at, before_url: url.clone() }))
        }
        _ => Err(ApiError::with_message(
            ApiCode::MissingParam,
            "beforePublishedAt and beforeUrl must be supplied together",
        )),
    }
}

async fn news_response(
    state: &AppState,
    ticker: Option<String>,
    q: &NewsQuery,
) -> ApiResult<Json<Value>> {
    let limit = parse_limit(q.limit.as_deref())?;
    let cursor = news_cursor(q)?;
    let rows = state
        .warehouse
        .query_news(ticker.as_deref(), cursor.as_ref(), limit)
        .await?;

    let next_cursor = if rows.len() as i64 == limit {
        rows.last().and_then(|last| {
            last.published_at.as_ref().map(|pub_at| {
                json!({ "beforePublishedAt": pub_at, "beforeUrl": last.url })
            })
        })
    } else {
        None
    };

    let mut body = json!({ "ok": true, "count": rows.len(), "rows": rows });
    if let Some(ticker) = ticker {
        body["ticker"] = json!(ticker);
    }
    if let Some(cursor) = next_cursor {
        body["nextCursor"] = cursor;
    }
    Ok(Json(body))
}

#[instrument(skip(state, headers))]
pub async fn news_latest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<NewsQuery>,
) -> ApiResult<Json<Value>> {
    check_auth(&state, &headers)?;
    news_response(&state, None, &q).await
}

#[instrument(skip(state, headers))]
pub async fn news_by_ticker(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<NewsQuery>,
) -> ApiResult<Json<Value>> {
    check_auth(&state, &headers)?;
    let ticker = parse_ticker(q.ticker.as_deref())?;
    news_response(&state, Some(ticker), &q).await
}

#[derive(Debug, Deserialize)]
pub struct FundamentalsQuery {
    ticker: Option<String>,
    period: Option<String>,
    statement: Option<String>,
    limit: Option<String>,
}

#[instrument(skip(state, headers))]
pub async fn fundamentals_latest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<FundamentalsQuery>,
) -> ApiResult<Json<Value>> {
    check_auth(&state, &headers)?;
    let ticker = parse_ticker(q.ticker.as_deref())?;
    let period = Period::parse(q.period.as_deref().unwrap_or("Q"))
        .map_err(|_| ApiError::with_message(ApiCode::MissingParam, "period"))?;
    let statement = q
        .statement
        .as_deref()
        .map(Statement::parse)
        .transpose()
        .map_err(|_| ApiError::with_message(ApiCode::MissingParam, "statement"))?;
    let limit = parse_limit(q.limit.as_deref())?;

    let rows = state
        .warehouse
        .query_fi_latest(&ticker, period, statement, limit)
        .await?;
    Ok(Json(json!({
        "ok": true,
        "ticker": ticker,
        "period": period.as_str(),
        "statement": statement.map(|s| s.as_str()),
        "count": rows.len(),
        "rows": rows,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ScreenerQuery {
    metric: Option<String>,
    period: Option<String>,
    statement: Option<String>,
    min: Option<f64>,
    max: Option<f64>,
    limit: Option<String>,
}

#[instrument(skip(state, headers))]
pub async fn screener(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<ScreenerQuery>,
) -> ApiResult<Json<Value>> {
    check_auth(&state, &headers)?;
    let metric = q
        .metric
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::with_message(ApiCode::MissingParam, "metric"))?;
    let period = Period::parse(q.period.as_deref().unwrap_or("Q"))
        .map_err(|_| ApiError::with_message(ApiCode::MissingParam, "period"))?;
    let statement = q
        .statement
        .as_deref()
        .map(Statement::parse)
        .transpose()
        .map_err(|_| ApiError::with_message(ApiCode::MissingParam, "statement"))?;
    let limit = parse_limit(q.limit.as_deref())?;

    let rows = state
        .warehouse
        .screen_fi_latest(metric, period, statement, q.min, q.max, limit)
        .await?;
    Ok(Json(json!({
        "ok": true,
        "metric": metric,
        "period": period.as_str(),
        "statement": statement.map(|s| s.as_str()),
        "count": rows.len(),
        "rows": rows,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CaQuery {
    ticker: Option<String>,
    limit: Option<String>,
    #[serde(rename = "beforeExDate")]
    before_ex_date: Option<String>,
    #[serde(rename = "beforeId")]
    before_id: Option<String>,
}

fn ca_cursor(q: &CaQuery) -> Result<Option<CaCursor>, ApiError> {
    match (&q.before_ex_date, &q.before_id) {
        (None, None) => Ok(None),
        (Some(date), Some(id)) => {
            let before_ex_date = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map_err(|_| ApiError::with_message(ApiCode::MissingParam, "beforeExDate"))?;
            Ok(Some(CaCursor { before_ex_date, before_id: id.clone() }))
        }
        _ => Err(ApiError::with_message(
            ApiCode::MissingParam,
            "beforeExDate and beforeId must be supplied together",
        )),
    }
}

async fn ca_response(
    state: &AppState,
    ticker: Option<String>,
    q: &CaQuery,
) -> ApiResult<Json<Value>> {
    let limit = parse_limit(q.limit.as_deref())?;
    let cursor = ca_cursor(q)?;
    let rows = state
        .warehouse
        .query_corporate_actions(ticker.as_deref(), cursor.as_ref(), limit)
        .await?;

    let next_cursor = if rows.len() as i64 == limit {
        rows.last().and_then(|last| {
            last.ex_date
                .as_ref()
                .map(|ex| json!({ "beforeExDate": ex, "beforeId": last.id }))
        })
    } else {
        None
    };

    let mut body = json!({ "ok": true, "count": rows.len(), "rows": rows });
    if let Some(ticker) = ticker {
        body["ticker"] = json!(ticker);
    }
    if let Some(cursor) = next_cursor {
        body["nextCursor"] = cursor;
    }
    Ok(Json(body))
}

#[instrument(skip(state, headers))]
pub async fn corporate_actions_latest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<CaQuery>,
) -> ApiResult<Json<Value>> {
    check_auth(&state, &headers)?;
    ca_response(&state, None, &q).await
}

#[instrument(skip(state, headers))]
pub async fn corporate_actions_by_ticker(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<CaQuery>,
) -> ApiResult<Json<Value>> {
    check_auth(&state, &headers)?;
    let ticker = parse_ticker(q.ticker.as_deref())?;
    ca_response(&state, Some(ticker), &q).await
}

/// Composed dashboard: the market_stats KPI table as a metric map.
#[instrument(skip_all)]
pub async fn analytics_overview(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    check_auth(&state, &headers)?;
    let stats = state.warehouse.market_stats_all().await?;
    let mut metrics = serde_json::Map::new();
    for stat in stats {
        metrics.insert(
            stat.metric.clone(),
            json!({
                "value": stat.value_numeric,
                "text": stat.value_text,
                "asofTs": stat.asof_ts,
            }),
        );
    }
    Ok(Json(json!({ "ok": true, "metrics": metrics })))
}

#[instrument(skip(state, headers))]
pub async fn context_ticker(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(ticker): Path<String>,
) -> ApiResult<Json<Value>> {
    check_auth(&state, &headers)?;
    let ticker = parse_ticker(Some(&ticker))?;
    let context = state
        .warehouse
        .symbol_context(&ticker)
        .await?
        .ok_or_else(|| ApiError::with_message(ApiCode::NotFound, ticker.clone()))?;
    Ok(Json(json!({ "ok": true, "context": context })))
}

/// Overall pipeline health: DB reachability, repair-queue depth, candle
/// frontier freshness, and the news backfill flag.
#[instrument(skip_all)]
pub async fn overall_health(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    check_auth(&state, &headers)?;
    let db = state.warehouse.ping().await.map_err(|_| ApiError::new(ApiCode::DbUnreachable))?;
    let depth = state.warehouse.repair_queue_depth().await?;

    let max_ts = state
        .warehouse
        .market_stat("candles_max_ts")
        .await?
        .and_then(|s| s.value_numeric)
        .map(|v| v as i64);
    // stale past two daily bars
    let freshness = evaluate_freshness(now_ms(), max_ts, 2 * Tf::D1.interval_ms());

    let backfill_done = state
        .warehouse
        .kv_get("backfill.done")
        .await?
        .map(|v| v == "1")
        .unwrap_or(false);

    Ok(Json(json!({
        "ok": true,
        "db": db,
        "repairQueue": depth,
        "candlesFrontier": freshness,
        "newsBackfillDone": backfill_done,
    })))
}
