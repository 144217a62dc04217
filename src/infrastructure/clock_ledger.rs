// Per-user monotonic clock and ordered record log.
// Grounded on `database.rs::create_object_with_id`'s transaction-scoped
// insert-then-cache shape, replacing the shard-aware ID generator with a
// strictly per-user +1 sequence guarded by the `(user_uuid, clock)` unique
// constraint.

use chrono::Utc;
use sqlx::Row;
use tracing::instrument;

use crate::error::{AppError, AppResult};
use crate::models::SourceKind;

pub struct ClockLedger;

impl ClockLedger {
    /// Atomically reads `User.clock`, computes `clock + 1`, inserts a
    /// `ClockRecord`, updates `User.clock`, and returns the new value. Must
    /// be called inside an already-open transaction so the caller's content
    /// row insert shares its atomicity.
    #[instrument(skip(tx))]
    pub async fn next_clock(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        user_uuid: &str,
        source_kind: SourceKind,
    ) -> AppResult<i64> {
        let current: Option<i64> = sqlx::query("SELECT clock FROM cnode_users WHERE user_uuid = ?")
            .bind(user_uuid)
            .fetch_optional(&mut **tx)
            .await?
            .map(|r| r.get("clock"));

        let current = current
            .ok_or_else(|| AppError::Internal(format!("no cnode_users row for {user_uuid}")))?;
        let next = current + 1;

        sqlx::query(
            "INSERT INTO clock_records (user_uuid, clock, source_kind, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_uuid)
        .bind(next)
        .bind(source_kind.as_str())
        .bind(Utc::now())
        .execute(&mut **tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                AppError::ClockConflict(format!(
                    "clock {next} already recorded for user {user_uuid}"
                ))
            }
            _ => AppError::from(e),
        })?;

        sqlx::query("UPDATE cnode_users SET clock = ? WHERE user_uuid = ?")
            .bind(next)
            .bind(user_uuid)
            .execute(&mut **tx)
            .await?;

        Ok(next)
    }

    /// Allocates `count` consecutive clocks for a batch write (the
    /// directory-plus-variants case), preserving insertion order.
    #[instrument(skip(tx))]
    pub async fn next_clocks(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        user_uuid: &str,
        source_kind: SourceKind,
        count: usize,
    ) -> AppResult<Vec<i64>> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(Self::next_clock(tx, user_uuid, source_kind).await?);
        }
        Ok(out)
    }
}
