// Bounded-range read of a user's clock-ordered records and CIDs. Grounded
// on the read-then-serialize handler shape used elsewhere in this crate's
// HTTP layer, adapted to a single-snapshot multi-table read instead of a
// single object lookup.

use std::collections::HashMap;

use tracing::instrument;

use crate::error::{AppError, AppResult};
use crate::infrastructure::db::Db;
use crate::models::{CNodeUserExport, ClockInfo, ExportResponse, PeerInfo};

#[derive(Clone)]
pub struct ExportService {
    db: Db,
}

impl ExportService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// `MAX_RANGE`: the widest clock window a single export
    /// call will return, regardless of the caller's requested `clock_range_max`.
    #[instrument(skip(self))]
    pub async fn export(
        &self,
        wallets: &[String],
        clock_range_min: i64,
        clock_range_max: Option<i64>,
        max_range: i64,
        peer_endpoints: Vec<String>,
    ) -> AppResult<ExportResponse> {
        let effective_max = match clock_range_max {
            Some(requested_max) => requested_max.min(clock_range_min + max_range - 1),
            None => clock_range_min + max_range - 1,
        };

        if clock_range_min > effective_max {
            return Err(AppError::BadRequest(format!(
                "clock_range_min ({clock_range_min}) exceeds effective max ({effective_max})"
            )));
        }

        let mut cnode_users = HashMap::new();

        for wallet in wallets {
            let Some(user) = self.db.get_user_by_wallet(wallet).await? else {
                continue;
            };

            let true_clock = user.clock;
            let window_max = effective_max.min(true_clock);

            let clock_records = self
                .db
                .get_clock_records_in_range(&user.user_uuid, clock_range_min, window_max)
                .await?;
            let user_metas = self
                .db
                .get_user_metas_in_range(&user.user_uuid, clock_range_min, window_max)
                .await?;
            let tracks = self
                .db
                .get_tracks_in_range(&user.user_uuid, clock_range_min, window_max)
                .await?;
            let files = self
                .db
                .get_files_in_range(&user.user_uuid, clock_range_min, window_max)
                .await?;

            // Clamp the advertised clock to the window: the stored row is
            // never mutated, only this response DTO.
            let mut windowed_user = user.clone();
            windowed_user.clock = window_max;

            cnode_users.insert(
                user.user_uuid.clone(),
                CNodeUserExport {
                    user: windowed_user,
                    clock_records,
                    user_metas,
                    tracks,
                    files,
                    clock_info: ClockInfo {
                        local_clock_max: true_clock,
                        requested_clock_range_min: clock_range_min,
                        requested_clock_range_max: effective_max,
                    },
                },
            );
        }

        Ok(ExportResponse {
            cnode_users,
            peer_info: PeerInfo {
                endpoints: peer_endpoints,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::content_store::ContentStore;
    use crate::models::{NewFile, NewUserMeta, FileType};

    async fn setup() -> (Db, ContentStore) {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let store = ContentStore::new(db.pool.clone());
        (db, store)
    }

    #[tokio::test]
    async fn export_clamps_to_max_range() {
        let (db, store) = setup().await;
        let wallet = "0xabc".to_string();

        for i in 0..10 {
            store
                .write_user_meta(
                    &wallet,
                    NewUserMeta {
                        multihash: format!("Qm{i}"),
                        data: serde_json::json!({ "i": i }),
                    },
                )
                .await
                .unwrap();
        }

        let export = ExportService::new(db);
        let resp = export
            .export(&[wallet.clone()], 1, None, 3, vec![])
            .await
            .unwrap();

        let entry = resp.cnode_users.values().next().unwrap();
        assert_eq!(entry.user.clock, 3);
        assert_eq!(entry.clock_info.local_clock_max, 10);
        assert_eq!(entry.clock_records.len(), 3);
    }

    #[tokio::test]
    async fn export_rejects_bad_range() {
        let (db, _store) = setup().await;
        let export = ExportService::new(db);
        let result = export.export(&["0xabc".to_string()], 5, Some(2), 100, vec![]).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn export_skips_files_of_type_dir_but_lists_them() {
        let (db, store) = setup().await;
        let wallet = "0xdir".to_string();
        store
            .write_files(
                &wallet,
                vec![NewFile {
                    multihash: "QmDir".to_string(),
                    storage_path: "/data/QmDir".to_string(),
                    file_type: FileType::Dir,
                    dir_multihash: None,
                    file_name: None,
                }],
            )
            .await
            .unwrap();

        let export = ExportService::new(db);
        let resp = export.export(&[wallet], 1, None, 100, vec![]).await.unwrap();
        let entry = resp.cnode_users.values().next().unwrap();
        assert_eq!(entry.files.len(), 1);
        assert_eq!(entry.files[0].file_type, FileType::Dir);
    }
}
