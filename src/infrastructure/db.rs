// Schema and row-level persistence for the five content-addressed tables.
// Grounded on `infrastructure/sqlite_database.rs`'s `initialize()` (drop+
// create DDL, index creation) and `database.rs`'s transaction-scoped query
// helpers.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqlitePool, Row};

use crate::error::{AppError, AppResult};
use crate::models::{ClockRecord, FileRow, FileType, SourceKind, TrackRow, User, UserMetaRow};

/// Read-side boundary implemented by `Db`, mirroring the
/// `DatabaseInterface`/`SqliteDatabase` split in `infrastructure/database.rs`:
/// the export endpoint, sync worker, and read path depend on this trait's
/// surface rather than on SQLite directly, so a future non-SQLite backend
/// only needs a new impl.
#[async_trait]
pub trait CNodeStore: Send + Sync {
    async fn get_user_by_wallet(&self, wallet: &str) -> AppResult<Option<User>>;
    async fn get_clock_records_in_range(
        &self,
        user_uuid: &str,
        min: i64,
        max: i64,
    ) -> AppResult<Vec<ClockRecord>>;
    async fn get_user_metas_in_range(
        &self,
        user_uuid: &str,
        min: i64,
        max: i64,
    ) -> AppResult<Vec<UserMetaRow>>;
    async fn get_tracks_in_range(
        &self,
        user_uuid: &str,
        min: i64,
        max: i64,
    ) -> AppResult<Vec<TrackRow>>;
    async fn get_files_in_range(
        &self,
        user_uuid: &str,
        min: i64,
        max: i64,
    ) -> AppResult<Vec<FileRow>>;
    async fn find_file_by_cid(&self, cid: &str) -> AppResult<Option<FileRow>>;
    async fn find_dir_entry(&self, dir_cid: &str, file_name: &str) -> AppResult<Option<FileRow>>;
}

#[derive(Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("failed to connect: {e}")))?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cnode_users (
                user_uuid TEXT PRIMARY KEY,
                wallet TEXT NOT NULL UNIQUE,
                latest_block_number INTEGER NOT NULL,
                clock INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS clock_records (
                user_uuid TEXT NOT NULL,
                clock INTEGER NOT NULL,
                source_kind TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_uuid, clock)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audius_users (
                user_uuid TEXT NOT NULL,
                clock INTEGER NOT NULL,
                multihash TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_uuid, clock)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tracks (
                user_uuid TEXT NOT NULL,
                clock INTEGER NOT NULL,
                multihash TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_uuid, clock)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                user_uuid TEXT NOT NULL,
                clock INTEGER NOT NULL,
                multihash TEXT NOT NULL,
                storage_path TEXT NOT NULL,
                file_type TEXT NOT NULL,
                dir_multihash TEXT,
                file_name TEXT,
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_uuid, clock)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_multihash ON files(multihash)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_files_dir ON files(dir_multihash, file_name)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_user_by_wallet(&self, wallet: &str) -> AppResult<Option<User>> {
        let row = sqlx::query(
            "SELECT user_uuid, wallet, latest_block_number, clock, created_at FROM cnode_users WHERE wallet = ?",
        )
        .bind(wallet)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| row_to_user(&r)))
    }

    pub async fn get_user_by_uuid(&self, user_uuid: &str) -> AppResult<Option<User>> {
        let row = sqlx::query(
            "SELECT user_uuid, wallet, latest_block_number, clock, created_at FROM cnode_users WHERE user_uuid = ?",
        )
        .bind(user_uuid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| row_to_user(&r)))
    }

    pub async fn get_clock_records_in_range(
        &self,
        user_uuid: &str,
        min: i64,
        max: i64,
    ) -> AppResult<Vec<ClockRecord>> {
        let rows = sqlx::query(
            "SELECT user_uuid, clock, source_kind, created_at FROM clock_records
             WHERE user_uuid = ? AND clock BETWEEN ? AND ? ORDER BY clock ASC",
        )
        .bind(user_uuid)
        .bind(min)
        .bind(max)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ClockRecord {
                user_uuid: r.get("user_uuid"),
                clock: r.get("clock"),
                source_kind: SourceKind::from_str(&r.get::<String, _>("source_kind"))
                    .unwrap_or(SourceKind::UserMeta),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    pub async fn get_user_metas_in_range(
        &self,
        user_uuid: &str,
        min: i64,
        max: i64,
    ) -> AppResult<Vec<UserMetaRow>> {
        let rows = sqlx::query(
            "SELECT user_uuid, clock, multihash, data, created_at FROM audius_users
             WHERE user_uuid = ? AND clock BETWEEN ? AND ? ORDER BY clock ASC",
        )
        .bind(user_uuid)
        .bind(min)
        .bind(max)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                let data: String = r.get("data");
                Ok(UserMetaRow {
                    user_uuid: r.get("user_uuid"),
                    clock: r.get("clock"),
                    multihash: r.get("multihash"),
                    data: serde_json::from_str(&data)
                        .map_err(|e| AppError::SerializationError(e.to_string()))?,
                    created_at: r.get("created_at"),
                })
            })
            .collect()
    }

    pub async fn get_tracks_in_range(
        &self,
        user_uuid: &str,
        min: i64,
        max: i64,
    ) -> AppResult<Vec<TrackRow>> {
        let rows = sqlx::query(
            "SELECT user_uuid, clock, multihash, data, created_at FROM tracks
             WHERE user_uuid = ? AND clock BETWEEN ? AND ? ORDER BY clock ASC",
        )
        .bind(user_uuid)
        .bind(min)
        .bind(max)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                let data: String = r.get("data");
                Ok(TrackRow {
                    user_uuid: r.get("user_uuid"),
                    clock: r.get("clock"),
                    multihash: r.get("multihash"),
                    data: serde_json::from_str(&data)
                        .map_err(|e| AppError::SerializationError(e.to_string()))?,
                    created_at: r.get("created_at"),
                })
            })
            .collect()
    }

    pub async fn get_files_in_range(
        &self,
        user_uuid: &str,
        min: i64,
        max: i64,
    ) -> AppResult<Vec<FileRow>> {
        let rows = sqlx::query(
            "SELECT user_uuid, clock, multihash, storage_path, file_type, dir_multihash, file_name, created_at
             FROM files WHERE user_uuid = ? AND clock BETWEEN ? AND ? ORDER BY clock ASC",
        )
        .bind(user_uuid)
        .bind(min)
        .bind(max)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| row_to_file(&r)).collect())
    }

    pub async fn find_file_by_cid(&self, cid: &str) -> AppResult<Option<FileRow>> {
        let row = sqlx::query(
            "SELECT user_uuid, clock, multihash, storage_path, file_type, dir_multihash, file_name, created_at
             FROM files WHERE multihash = ? LIMIT 1",
        )
        .bind(cid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| row_to_file(&r)))
    }

    pub async fn find_dir_entry(&self, dir_cid: &str, file_name: &str) -> AppResult<Option<FileRow>> {
        let row = sqlx::query(
            "SELECT user_uuid, clock, multihash, storage_path, file_type, dir_multihash, file_name, created_at
             FROM files WHERE dir_multihash = ? AND file_name = ? LIMIT 1",
        )
        .bind(dir_cid)
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| row_to_file(&r)))
    }
}

#[async_trait]
impl CNodeStore for Db {
    async fn get_user_by_wallet(&self, wallet: &str) -> AppResult<Option<User>> {
        Db::get_user_by_wallet(self, wallet).await
    }

    async fn get_clock_records_in_range(
        &self,
        user_uuid: &str,
        min: i64,
        max: i64,
    ) -> AppResult<Vec<ClockRecord>> {
        Db::get_clock_records_in_range(self, user_uuid, min, max).await
    }

    async fn get_user_metas_in_range(
        &self,
        user_uuid: &str,
        min: i64,
        max: i64,
    ) -> AppResult<Vec<UserMetaRow>> {
        Db::get_user_metas_in_range(self, user_uuid, min, max).await
    }

    async fn get_tracks_in_range(
        &self,
        user_uuid: &str,
        min: i64,
        max: i64,
    ) -> AppResult<Vec<TrackRow>> {
        Db::get_tracks_in_range(self, user_uuid, min, max).await
    }

    async fn get_files_in_range(
        &self,
        user_uuid: &str,
        min: i64,
        max: i64,
    ) -> AppResult<Vec<FileRow>> {
        Db::get_files_in_range(self, user_uuid, min, max).await
    }

    async fn find_file_by_cid(&self, cid: &str) -> AppResult<Option<FileRow>> {
        Db::find_file_by_cid(self, cid).await
    }

    async fn find_dir_entry(&self, dir_cid: &str, file_name: &str) -> AppResult<Option<FileRow>> {
        Db::find_dir_entry(self, dir_cid, file_name).await
    }
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> User {
    User {
        user_uuid: row.get("user_uuid"),
        wallet: row.get("wallet"),
        latest_block_number: row.get("latest_block_number"),
        clock: row.get("clock"),
        created_at: row.get("created_at"),
    }
}

fn row_to_file(row: &sqlx::sqlite::SqliteRow) -> FileRow {
    FileRow {
        user_uuid: row.get("user_uuid"),
        clock: row.get("clock"),
        multihash: row.get("multihash"),
        storage_path: row.get("storage_path"),
        file_type: FileType::from_str(&row.get::<String, _>("file_type"))
            .unwrap_or(FileType::Metadata),
        dir_multihash: row.get("dir_multihash"),
        file_name: row.get("file_name"),
        created_at: row.get("created_at"),
    }
}

impl Db {
    /// Commits a full import batch in one transaction, in dependency order:
    /// upsert the user row, then clock records, then non-track files, then
    /// tracks, then track (audio) files, then
    /// user-metas. Any failure rolls back the whole batch.
    pub async fn commit_import(
        &self,
        user: &User,
        clock_records: &[ClockRecord],
        user_metas: &[UserMetaRow],
        tracks: &[TrackRow],
        files: &[FileRow],
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO cnode_users (user_uuid, wallet, latest_block_number, clock, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_uuid) DO UPDATE SET
                wallet = excluded.wallet,
                latest_block_number = MAX(cnode_users.latest_block_number, excluded.latest_block_number),
                clock = excluded.clock",
        )
        .bind(&user.user_uuid)
        .bind(&user.wallet)
        .bind(user.latest_block_number)
        .bind(user.clock)
        .bind(user.created_at)
        .execute(&mut *tx)
        .await?;

        for record in clock_records {
            sqlx::query(
                "INSERT OR IGNORE INTO clock_records (user_uuid, clock, source_kind, created_at)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&record.user_uuid)
            .bind(record.clock)
            .bind(record.source_kind.as_str())
            .bind(record.created_at)
            .execute(&mut *tx)
            .await?;
        }

        let (non_track_files, track_files): (Vec<_>, Vec<_>) =
            files.iter().partition(|f| f.file_type != FileType::Audio);

        for file in non_track_files {
            insert_file_row(&mut tx, file).await?;
        }

        for track in tracks {
            sqlx::query(
                "INSERT OR IGNORE INTO tracks (user_uuid, clock, multihash, data, created_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&track.user_uuid)
            .bind(track.clock)
            .bind(&track.multihash)
            .bind(track.data.to_string())
            .bind(track.created_at)
            .execute(&mut *tx)
            .await?;
        }

        for file in track_files {
            insert_file_row(&mut tx, file).await?;
        }

        for meta in user_metas {
            sqlx::query(
                "INSERT OR IGNORE INTO audius_users (user_uuid, clock, multihash, data, created_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&meta.user_uuid)
            .bind(meta.clock)
            .bind(&meta.multihash)
            .bind(meta.data.to_string())
            .bind(meta.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

async fn insert_file_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    file: &FileRow,
) -> AppResult<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO files
         (user_uuid, clock, multihash, storage_path, file_type, dir_multihash, file_name, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&file.user_uuid)
    .bind(file.clock)
    .bind(&file.multihash)
    .bind(&file.storage_path)
    .bind(file.file_type.as_str())
    .bind(&file.dir_multihash)
    .bind(&file.file_name)
    .bind(file.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Helper shared by the content store and the import commit path:
/// insert-or-ignore the `cnode_users` row and return
/// whether it already existed.
pub async fn ensure_user_row(
    executor: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_uuid: &str,
    wallet: &str,
) -> AppResult<bool> {
    let existing = sqlx::query("SELECT 1 FROM cnode_users WHERE user_uuid = ?")
        .bind(user_uuid)
        .fetch_optional(&mut **executor)
        .await?;

    if existing.is_some() {
        return Ok(true);
    }

    sqlx::query(
        "INSERT INTO cnode_users (user_uuid, wallet, latest_block_number, clock, created_at)
         VALUES (?, ?, 0, 0, ?)",
    )
    .bind(user_uuid)
    .bind(wallet)
    .bind(Utc::now())
    .execute(&mut **executor)
    .await?;

    Ok(false)
}
