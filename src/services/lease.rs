//! Weak leader election per (job, shard) backed by the `leases` table.
//!
//! A row is held while `now < lease_until_ms AND now < last_progress_ms +
//! stale_window`; the moment either side fails, any caller may take it over.
//! Claims are single atomic upserts so two workers racing on the same shard
//! resolve inside the warehouse, not in process memory.

use sqlx::Row;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::services::warehouse::Warehouse;
use crate::utils::now_ms;

pub const MIN_LEASE_MS: i64 = 30_000;
pub const MAX_LEASE_MS: i64 = 1_800_000;

#[derive(Debug, Clone)]
pub struct LeaseRow {
    pub job: String,
    pub shard: i32,
    pub owner_id: String,
    pub lease_until_ms: i64,
    pub last_progress_ms: i64,
    pub meta: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Acquired,
    Held(LeaseRow),
}

impl ClaimOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, ClaimOutcome::Acquired)
    }
}

/// Claimability predicate. Boundary: a lease expiring exactly now is free
/// (holding requires now strictly before lease_until_ms), and likewise for
/// the staleness window.
pub fn can_claim(
    existing: Option<(i64, i64)>, // (lease_until_ms, last_progress_ms)
    now: i64,
    stale_ms: i64,
) -> bool {
    match existing {
        None => true,
        Some((lease_until_ms, last_progress_ms)) => {
            lease_until_ms <= now || last_progress_ms + stale_ms <= now
        }
    }
}

#[derive(Debug, Clone)]
pub struct LeaseCoordinator {
    warehouse: Warehouse,
}

impl LeaseCoordinator {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    /// Try to take (job, shard). One atomic statement: insert-or-steal with
    /// the takeover condition in the conflict WHERE clause. On success,
    /// `last_progress_ms` never moves backwards.
    pub async fn try_claim(
        &self,
        job: &str,
        shard: i32,
        owner_id: &str,
        lease_ms: i64,
        stale_minutes: i64,
        meta: Option<&str>,
    ) -> Result<ClaimOutcome> {
        if !(MIN_LEASE_MS..=MAX_LEASE_MS).contains(&lease_ms) {
            return Err(Error::Validation(format!(
                "lease_ms must be in [{}, {}], got {}",
                MIN_LEASE_MS, MAX_LEASE_MS, lease_ms
            )));
        }
        if stale_minutes < 1 {
            return Err(Error::Validation("stale_minutes must be >= 1".to_string()));
        }

        let now = now_ms();
        let stale_ms = stale_minutes * 60_000;

        let res = sqlx::query(
            r#"
            INSERT INTO leases (job, shard, owner_id, lease_until_ms, last_progress_ms, meta, updated_at)
            VALUES ($1, $2, $3, $4 + $5, $4, $6, $4)
            ON CONFLICT (job, shard) DO UPDATE SET
              owner_id = EXCLUDED.owner_id,
              lease_until_ms = EXCLUDED.lease_until_ms,
              last_progress_ms = GREATEST(leases.last_progress_ms, $4),
              meta = COALESCE(EXCLUDED.meta, leases.meta),
              updated_at = $4
            WHERE leases.lease_until_ms <= $4
               OR leases.last_progress_ms + $7 <= $4
            "#,
        )
        .bind(job)
        .bind(shard)
        .bind(owner_id)
        .bind(now)
        .bind(lease_ms)
        .bind(meta)
        .bind(stale_ms)
        .execute(self.warehouse.pool())
        .await
        .map_err(|e| Error::CoordinationUnavailable(e.to_string()))?;

        if res.rows_affected() > 0 {
            info!(job, shard, owner_id, lease_ms, "Lease acquired");
            return Ok(ClaimOutcome::Acquired);
        }

        let holder = self
            .get(job, shard)
            .await?
            .ok_or_else(|| Error::CoordinationUnavailable("lease row vanished".to_string()))?;
        debug!(job, shard, holder = %holder.owner_id, "Lease held elsewhere");
        Ok(ClaimOutcome::Held(holder))
    }

    /// Extend the lease. Owner must still match; progress is untouched.
    pub async fn renew(&self, job: &str, shard: i32, owner_id: &str, lease_ms: i64) -> Result<bool> {
        let now = now_ms();
        let res = sqlx::query(
            r#"
            UPDATE leases
            SET lease_until_ms = $4 + $5, updated_at = $4
            WHERE job = $1 AND shard = $2 AND owner_id = $3
            "#,
        )
        .bind(job)
        .bind(shard)
        .bind(owner_id)
        .bind(now)
        .bind(lease_ms)
        .execute(self.warehouse.pool())
        .await
        .map_err(|e| Error::CoordinationUnavailable(e.to_string()))?;
        Ok(res.rows_affected() > 0)
    }

    /// Liveness heartbeat that defeats stale-takeover. Owner must match.
    pub async fn report_progress(
        &self,
        job: &str,
        shard: i32,
        owner_id: &str,
        meta: Option<&str>,
    ) -> Result<bool> {
        let now = now_ms();
        let res = sqlx::query(
            r#"
            UPDATE leases
            SET last_progress_ms = $4, meta = COALESCE($5, meta), updated_at = $4
            WHERE job = $1 AND shard = $2 AND owner_id = $3
            "#,
        )
        .bind(job)
        .bind(shard)
        .bind(owner_id)
        .bind(now)
        .bind(meta)
        .execute(self.warehouse.pool())
        .await
        .map_err(|e| Error::CoordinationUnavailable(e.to_string()))?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn get(&self, job: &str, shard: i32) -> Result<Option<LeaseRow>> {
        let row = sqlx::query(
            r#"
            SELECT job, shard, owner_id, lease_until_ms, last_progress_ms, meta
            FROM leases WHERE job = $1 AND shard = $2
            "#,
        )
        .bind(job)
        .bind(shard)
        .fetch_optional(self.warehouse.pool())
        .await
        .map_err(|e| Error::CoordinationUnavailable(e.to_string()))?;

        row.map(|row| {
            Ok(LeaseRow {
                job: row.try_get("job")?,
                shard: row.try_get("shard")?,
                owner_id: row.try_get("owner_id")?,
                lease_until_ms: row.try_get("lease_until_ms")?,
                last_progress_ms: row.try_get("last_progress_ms")?,
                meta: row.try_get("meta")?,
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::warehouse::test_warehouse;

    #[test]
    fn claim_predicate_boundaries() {
        let stale = 30 * 60_000;
        // missing row
        assert!(can_claim(None, 1000, stale));
        // held: both guards alive
        assert!(!can_claim(Some((2000, 900)), 1000, stale));
        // lease expiring exactly now is claimable (strict < to hold)
        assert!(can_claim(Some((1000, 1000)), 1000, stale));
        // stale progress opens the row even with a live lease
        let now = 100 * 60_000;
        assert!(can_claim(Some((now + 60_000, now - stale)), now, stale));
        assert!(!can_claim(Some((now + 60_000, now - stale + 1)), now, stale));
    }

    #[tokio::test]
    async fn stale_takeover_and_owner_fencing() {
        let Some(wh) = test_warehouse().await else { return };
        let coord = LeaseCoordinator::new(wh.clone());
        let job = format!("test_job_{}", now_ms());

        // A claims
        let out = coord.try_claim(&job, 0, "A", 300_000, 30, None).await.unwrap();
        assert!(out.is_acquired());

        // B denied while A holds
        let out = coord.try_claim(&job, 0, "B", 300_000, 30, None).await.unwrap();
        match out {
            ClaimOutcome::Held(row) => assert_eq!(row.owner_id, "A"),
            ClaimOutcome::Acquired => panic!("claim should have been denied"),
        }

        // expire A's lease directly, then B takes over
        sqlx::query("UPDATE leases SET lease_until_ms = $3 WHERE job = $1 AND shard = $2")
            .bind(&job)
            .bind(0)
            .bind(now_ms() - 1)
            .execute(wh.pool())
            .await
            .unwrap();
        let out = coord.try_claim(&job, 0, "B", 300_000, 30, None).await.unwrap();
        assert!(out.is_acquired());

        // A lost ownership: renew and progress both fence
        assert!(!coord.renew(&job, 0, "A", 300_000).await.unwrap());
        assert!(!coord.report_progress(&job, 0, "A", None).await.unwrap());
        assert!(coord.report_progress(&job, 0, "B", Some("{}")).await.unwrap());
    }

    #[tokio::test]
    async fn claim_validates_bounds() {
        let Some(wh) = test_warehouse().await else { return };
        let coord = LeaseCoordinator::new(wh);
        assert!(coord.try_claim("j", 0, "o", 10, 30, None).await.is_err());
        assert!(coord.try_claim("j", 0, "o", 60_000, 0, None).await.is_err());
    }
}
