//! Download-token and refresh-token repositories.
//!
//! Download tokens are capabilities: storage is keyed by the token value and
//! deliberately carries no user index. Consumption increments the counter in
//! the same guarded statement so the `max_downloads` ceiling holds under
//! concurrent requests.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use crate::error::Result;
use crate::store::{Store, map_query_err, to_u32};

/// A single-purpose download capability.
#[derive(Debug, Clone)]
pub struct DownloadTokenRecord {
    /// Row identifier.
    pub id: Uuid,
    /// Torrent the token grants access to.
    pub torrent_id: Uuid,
    /// Relative payload (or archive) path the token binds to.
    pub file_path: String,
    /// Opaque 256-bit URL-safe token value.
    pub token: String,
    /// Validity deadline.
    pub expires_at: DateTime<Utc>,
    /// Downloads consumed so far.
    pub download_count: u32,
    /// Download ceiling.
    pub max_downloads: u32,
    /// Row creation instant.
    pub created_at: DateTime<Utc>,
}

impl DownloadTokenRecord {
    /// Whether the token would still admit a download right now.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at && self.download_count < self.max_downloads
    }
}

const TOKEN_COLUMNS: &str =
    "id, torrent_id, file_path, token, expires_at, download_count, max_downloads, created_at";

impl Store {
    /// Persist a freshly minted download token.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn create_download_token(
        &self,
        torrent_id: Uuid,
        file_path: &str,
        token: &str,
        max_downloads: u32,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO download_tokens (torrent_id, file_path, token, expires_at, max_downloads)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(torrent_id)
        .bind(file_path)
        .bind(token)
        .bind(expires_at)
        .bind(i32::try_from(max_downloads).unwrap_or(i32::MAX))
        .execute(self.pool())
        .await
        .map_err(map_query_err("create download token"))?;
        Ok(())
    }

    /// Fetch a token row without consuming it.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_download_token(&self, token: &str) -> Result<Option<DownloadTokenRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {TOKEN_COLUMNS} FROM download_tokens WHERE token = $1"
        ))
        .bind(token)
        .fetch_optional(self.pool())
        .await
        .map_err(map_query_err("fetch download token"))?;
        row.map(|row| token_from_row(&row)).transpose()
    }

    /// Atomically consume one use of a token.
    ///
    /// The expiry and counter guards live in the statement itself, so two
    /// racing requests can never push `download_count` past `max_downloads`.
    /// Returns the post-increment row, or `None` when the token is unknown,
    /// expired, or exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn consume_download_token(
        &self,
        token: &str,
    ) -> Result<Option<DownloadTokenRecord>> {
        let row = sqlx::query(&format!(
            "UPDATE download_tokens
             SET download_count = download_count + 1
             WHERE token = $1 AND expires_at > NOW() AND download_count < max_downloads
             RETURNING {TOKEN_COLUMNS}"
        ))
        .bind(token)
        .fetch_optional(self.pool())
        .await
        .map_err(map_query_err("consume download token"))?;
        row.map(|row| token_from_row(&row)).transpose()
    }

    /// Persist a refresh-token digest.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn save_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO refresh_tokens (user_id, token_hash, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(self.pool())
        .await
        .map_err(map_query_err("save refresh token"))?;
        Ok(())
    }

    /// Resolve an unexpired refresh-token digest to its user.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_refresh_token_user(&self, token_hash: &str) -> Result<Option<Uuid>> {
        sqlx::query_scalar(
            "SELECT user_id FROM refresh_tokens WHERE token_hash = $1 AND expires_at > NOW()",
        )
        .bind(token_hash)
        .fetch_optional(self.pool())
        .await
        .map_err(map_query_err("fetch refresh token"))
    }

    /// Delete one refresh-token digest (logout).
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_refresh_token(&self, token_hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .execute(self.pool())
            .await
            .map_err(map_query_err("delete refresh token"))?;
        Ok(())
    }
}

fn token_from_row(row: &PgRow) -> Result<DownloadTokenRecord> {
    Ok(DownloadTokenRecord {
        id: row.try_get("id")?,
        torrent_id: row.try_get("torrent_id")?,
        file_path: row.try_get::<Option<String>, _>("file_path")?.unwrap_or_default(),
        token: row.try_get("token")?,
        expires_at: row.try_get("expires_at")?,
        download_count: to_u32(row.try_get("download_count")?),
        max_downloads: to_u32(row.try_get("max_downloads")?),
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token_record(expires_in: Duration, count: u32, max: u32) -> DownloadTokenRecord {
        DownloadTokenRecord {
            id: Uuid::nil(),
            torrent_id: Uuid::nil(),
            file_path: "payload.bin".to_string(),
            token: "t".to_string(),
            expires_at: Utc::now() + expires_in,
            download_count: count,
            max_downloads: max,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn token_validity_window() {
        let now = Utc::now();
        assert!(token_record(Duration::hours(1), 0, 10).is_valid(now));
        assert!(!token_record(Duration::hours(-1), 0, 10).is_valid(now));
        assert!(!token_record(Duration::hours(1), 10, 10).is_valid(now));
        assert!(token_record(Duration::hours(1), 9, 10).is_valid(now));
    }
}
