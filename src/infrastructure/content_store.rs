// Append-only write of metadata/file rows under one atomic transaction per
// logical operation. Grounded on `database.rs`'s
// `delete_object`/`create_association` shape: a single `pool.begin()`,
// a sequence of statements, one `tx.commit()`; any `?` before commit rolls
// everything back.

use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use tracing::instrument;
use uuid::Uuid;

use crate::error::AppResult;
use crate::infrastructure::clock_ledger::ClockLedger;
use crate::infrastructure::db::ensure_user_row;
use crate::models::{FileType, NewFile, NewTrack, NewUserMeta, SourceKind, WriteReceipt};

#[derive(Clone)]
pub struct ContentStore {
    pool: SqlitePool,
}

impl ContentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Resolves (creating if absent) the local `user_uuid` for a wallet.
    /// Exposed so callers (HTTP handlers, the sync worker) can share one
    /// UUID-minting policy.
    pub async fn resolve_user_uuid(&self, wallet: &str) -> AppResult<String> {
        if let Some(existing) = sqlx::query_scalar::<_, String>(
            "SELECT user_uuid FROM cnode_users WHERE wallet = ?",
        )
        .bind(wallet)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok(existing);
        }
        Ok(Uuid::new_v4().to_string())
    }

    #[instrument(skip(self, payload))]
    pub async fn write_user_meta(
        &self,
        wallet: &str,
        payload: NewUserMeta,
    ) -> AppResult<WriteReceipt> {
        let user_uuid = self.resolve_user_uuid(wallet).await?;
        let mut tx = self.pool.begin().await?;
        ensure_user_row(&mut tx, &user_uuid, wallet).await?;
        let clock = ClockLedger::next_clock(&mut tx, &user_uuid, SourceKind::UserMeta).await?;

        sqlx::query(
            "INSERT INTO audius_users (user_uuid, clock, multihash, data, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&user_uuid)
        .bind(clock)
        .bind(&payload.multihash)
        .bind(payload.data.to_string())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(WriteReceipt { user_uuid, clock })
    }

    #[instrument(skip(self, payload))]
    pub async fn write_track(&self, wallet: &str, payload: NewTrack) -> AppResult<WriteReceipt> {
        let user_uuid = self.resolve_user_uuid(wallet).await?;
        let mut tx = self.pool.begin().await?;
        ensure_user_row(&mut tx, &user_uuid, wallet).await?;
        let clock = ClockLedger::next_clock(&mut tx, &user_uuid, SourceKind::Track).await?;

        sqlx::query(
            "INSERT INTO tracks (user_uuid, clock, multihash, data, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&user_uuid)
        .bind(clock)
        .bind(&payload.multihash)
        .bind(payload.data.to_string())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(WriteReceipt { user_uuid, clock })
    }

    /// Applies an external ledger block number to a user without minting a
    /// new clock: `latestBlockNumber` is monotonically non-decreasing.
    #[instrument(skip(self))]
    pub async fn bump_latest_block_number(&self, wallet: &str, block_number: i64) -> AppResult<()> {
        let user_uuid = self.resolve_user_uuid(wallet).await?;
        let mut tx = self.pool.begin().await?;
        ensure_user_row(&mut tx, &user_uuid, wallet).await?;

        sqlx::query(
            "UPDATE cnode_users SET latest_block_number = MAX(latest_block_number, ?) WHERE user_uuid = ?",
        )
        .bind(block_number)
        .bind(&user_uuid)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Batch file write: allocates consecutive clocks in insertion order
    /// within one transaction.
    #[instrument(skip(self, payloads))]
    pub async fn write_files(
        &self,
        wallet: &str,
        payloads: Vec<NewFile>,
    ) -> AppResult<Vec<WriteReceipt>> {
        let user_uuid = self.resolve_user_uuid(wallet).await?;
        let mut tx = self.pool.begin().await?;
        ensure_user_row(&mut tx, &user_uuid, wallet).await?;

        let mut receipts = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let clock = ClockLedger::next_clock(&mut tx, &user_uuid, SourceKind::File).await?;

            sqlx::query(
                "INSERT INTO files (user_uuid, clock, multihash, storage_path, file_type, dir_multihash, file_name, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&user_uuid)
            .bind(clock)
            .bind(&payload.multihash)
            .bind(&payload.storage_path)
            .bind(file_type_str(payload.file_type))
            .bind(&payload.dir_multihash)
            .bind(&payload.file_name)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

            receipts.push(WriteReceipt {
                user_uuid: user_uuid.clone(),
                clock,
            });
        }

        tx.commit().await?;
        Ok(receipts)
    }
}

fn file_type_str(ft: FileType) -> &'static str {
    ft.as_str()
}
