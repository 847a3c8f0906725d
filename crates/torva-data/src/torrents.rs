//! Torrent record repository.

use chrono::Utc;
use sqlx::Row;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use torva_core::{TorrentFile, TorrentRecord, TorrentStatus};
use uuid::Uuid;

use crate::error::Result;
use crate::store::{Store, clamp_i64, map_query_err, to_u32, to_u64};

/// Insert payload for a freshly admitted torrent.
#[derive(Debug, Clone)]
pub struct NewTorrent {
    /// Record identifier assigned by the caller.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// 40-hex infohash.
    pub info_hash: String,
    /// Name hint; blank until metadata arrives for magnet admissions.
    pub name: String,
    /// Magnet URI when the torrent was admitted from one.
    pub magnet_uri: Option<String>,
    /// Initial status reported by the engine.
    pub status: TorrentStatus,
    /// Total payload size, when already known.
    pub total_size: u64,
}

/// Minimal projection used by the retention sweeper.
#[derive(Debug, Clone)]
pub struct ExpiredTorrent {
    /// Record identifier.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// 40-hex infohash.
    pub info_hash: String,
    /// Display name, for log lines.
    pub name: String,
}

const RECORD_COLUMNS: &str = "id, user_id, info_hash, name, magnet_uri, status, total_size, \
     downloaded_size, uploaded_size, download_speed, upload_speed, progress, peers, seeds, \
     files, zip_path, zip_size, error_message, started_at, completed_at, expires_at, created_at";

impl Store {
    /// Persist a freshly admitted torrent.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn create_torrent(&self, torrent: &NewTorrent) -> Result<()> {
        sqlx::query(
            "INSERT INTO torrents (id, user_id, info_hash, name, magnet_uri, status, total_size, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(torrent.id)
        .bind(torrent.user_id)
        .bind(&torrent.info_hash)
        .bind(&torrent.name)
        .bind(torrent.magnet_uri.as_deref())
        .bind(torrent.status.as_str())
        .bind(clamp_i64(torrent.total_size))
        .bind(Utc::now())
        .execute(self.pool())
        .await
        .map_err(map_query_err("create torrent"))?;
        Ok(())
    }

    /// Fetch one torrent record by id, including its file listing.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_torrent(&self, id: Uuid) -> Result<Option<TorrentRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM torrents WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_query_err("fetch torrent"))?;
        row.map(|row| record_from_row(&row)).transpose()
    }

    /// Fetch the newest record a user holds for an infohash.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_torrent_by_info_hash(
        &self,
        user_id: Uuid,
        info_hash: &str,
    ) -> Result<Option<TorrentRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM torrents
             WHERE user_id = $1 AND info_hash = $2
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(user_id)
        .bind(info_hash)
        .fetch_optional(self.pool())
        .await
        .map_err(map_query_err("fetch torrent by infohash"))?;
        row.map(|row| record_from_row(&row)).transpose()
    }

    /// Page through a user's torrents, newest first. Returns the page and the
    /// user's total count.
    ///
    /// # Errors
    ///
    /// Returns an error if either query fails.
    pub async fn list_torrents_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<TorrentRecord>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM torrents WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(self.pool())
            .await
            .map_err(map_query_err("count torrents for user"))?;

        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM torrents
             WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await
        .map_err(map_query_err("list torrents for user"))?;

        let records = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok((records, total))
    }

    /// Page through every torrent on the platform, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if either query fails.
    pub async fn list_all_torrents(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<TorrentRecord>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM torrents")
            .fetch_one(self.pool())
            .await
            .map_err(map_query_err("count torrents"))?;

        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM torrents ORDER BY created_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await
        .map_err(map_query_err("list torrents"))?;

        let records = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok((records, total))
    }

    /// All records that should be replayed into the engine after a restart.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_resumable_torrents(&self) -> Result<Vec<TorrentRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM torrents
             WHERE status NOT IN ('failed', 'cancelled')
             ORDER BY created_at"
        ))
        .fetch_all(self.pool())
        .await
        .map_err(map_query_err("list resumable torrents"))?;
        rows.iter().map(record_from_row).collect()
    }

    /// Persist one tick's progress numbers in a single statement.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_torrent_progress(
        &self,
        id: Uuid,
        status: TorrentStatus,
        progress: f64,
        downloaded: u64,
        uploaded: u64,
        download_speed: f64,
        upload_speed: f64,
        peers: u32,
        seeds: u32,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE torrents SET status = $1, progress = $2, downloaded_size = $3,
             uploaded_size = $4, download_speed = $5, upload_speed = $6, peers = $7, seeds = $8
             WHERE id = $9",
        )
        .bind(status.as_str())
        .bind(progress)
        .bind(clamp_i64(downloaded))
        .bind(clamp_i64(uploaded))
        .bind(download_speed)
        .bind(upload_speed)
        .bind(i32::try_from(peers).unwrap_or(i32::MAX))
        .bind(i32::try_from(seeds).unwrap_or(i32::MAX))
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(map_query_err("update torrent progress"))?;
        Ok(())
    }

    /// Commit the completion transition.
    ///
    /// The statement is guarded on `completed_at IS NULL` so the transition
    /// is committed at most once; replays return `false` and leave
    /// `completed_at`/`expires_at` untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn complete_torrent(&self, id: Uuid, retention_days: u32) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE torrents
             SET status = 'completed', progress = 100, completed_at = NOW(),
                 expires_at = NOW() + make_interval(days => $1)
             WHERE id = $2 AND completed_at IS NULL",
        )
        .bind(i32::try_from(retention_days).unwrap_or(i32::MAX))
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(map_query_err("complete torrent"))?;
        Ok(result.rows_affected() > 0)
    }

    /// Persist the canonical name and total size once metadata is known.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn update_torrent_metadata(
        &self,
        id: Uuid,
        name: &str,
        total_size: u64,
    ) -> Result<()> {
        sqlx::query("UPDATE torrents SET name = $1, total_size = $2 WHERE id = $3")
            .bind(name)
            .bind(clamp_i64(total_size))
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_query_err("update torrent metadata"))?;
        Ok(())
    }

    /// Replace the persisted file listing.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn update_torrent_files(&self, id: Uuid, files: &[TorrentFile]) -> Result<()> {
        sqlx::query("UPDATE torrents SET files = $1 WHERE id = $2")
            .bind(Json(files))
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_query_err("update torrent files"))?;
        Ok(())
    }

    /// Record the packaged archive for a completed multi-file torrent.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn update_torrent_zip(&self, id: Uuid, zip_path: &str, zip_size: u64) -> Result<()> {
        sqlx::query("UPDATE torrents SET zip_path = $1, zip_size = $2 WHERE id = $3")
            .bind(zip_path)
            .bind(clamp_i64(zip_size))
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_query_err("update torrent zip"))?;
        Ok(())
    }

    /// Move the record to `failed` and store the failure detail.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn set_torrent_error(&self, id: Uuid, message: &str) -> Result<()> {
        sqlx::query("UPDATE torrents SET status = 'failed', error_message = $1 WHERE id = $2")
            .bind(message)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_query_err("set torrent error"))?;
        Ok(())
    }

    /// Set the lifecycle status alone (pause/resume transitions).
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn set_torrent_status(&self, id: Uuid, status: TorrentStatus) -> Result<()> {
        sqlx::query("UPDATE torrents SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_query_err("set torrent status"))?;
        Ok(())
    }

    /// Delete the record; dependent tokens cascade away with it.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_torrent(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM torrents WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_query_err("delete torrent"))?;
        Ok(())
    }

    /// Count a user's records in `pending`/`downloading`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_active_torrents(&self, user_id: Uuid) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM torrents
             WHERE user_id = $1 AND status IN ('pending', 'downloading')",
        )
        .bind(user_id)
        .fetch_one(self.pool())
        .await
        .map_err(map_query_err("count active torrents"))
    }

    /// Every record whose retention deadline has passed.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_expired_torrents(&self) -> Result<Vec<ExpiredTorrent>> {
        let rows = sqlx::query(
            "SELECT id, user_id, info_hash, name FROM torrents WHERE expires_at < NOW()",
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_query_err("list expired torrents"))?;

        let mut expired = Vec::with_capacity(rows.len());
        for row in rows {
            expired.push(ExpiredTorrent {
                id: row.try_get("id")?,
                user_id: row.try_get("user_id")?,
                info_hash: row.try_get("info_hash")?,
                name: row.try_get::<Option<String>, _>("name")?.unwrap_or_default(),
            });
        }
        Ok(expired)
    }
}

fn record_from_row(row: &PgRow) -> Result<TorrentRecord> {
    let status_label: String = row.try_get("status")?;
    let status = TorrentStatus::parse(&status_label).unwrap_or_else(|| {
        tracing::warn!(status = %status_label, "unknown torrent status in store; treating as stalled");
        TorrentStatus::Stalled
    });
    let files: Json<Vec<TorrentFile>> = row.try_get("files")?;

    Ok(TorrentRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        info_hash: row.try_get("info_hash")?,
        name: row.try_get::<Option<String>, _>("name")?.unwrap_or_default(),
        magnet_uri: row.try_get("magnet_uri")?,
        status,
        total_size: to_u64(row.try_get("total_size")?),
        downloaded: to_u64(row.try_get("downloaded_size")?),
        uploaded: to_u64(row.try_get("uploaded_size")?),
        download_speed: row.try_get("download_speed")?,
        upload_speed: row.try_get("upload_speed")?,
        progress: row.try_get("progress")?,
        peers: to_u32(row.try_get("peers")?),
        seeds: to_u32(row.try_get("seeds")?),
        files: files.0,
        zip_path: row.try_get("zip_path")?,
        zip_size: to_u64(row.try_get::<Option<i64>, _>("zip_size")?.unwrap_or(0)),
        error_message: row.try_get("error_message")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}
