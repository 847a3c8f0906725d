//! Append-only usage log, aggregated by calendar month for the bandwidth
//! quota gate.

use serde_json::json;
use uuid::Uuid;

use crate::error::Result;
use crate::store::{Store, clamp_i64, map_query_err};

/// Action label for a download that started streaming.
pub(crate) const ACTION_DOWNLOAD_STARTED: &str = "download_started";
/// Action label for a completed torrent; the only action the monthly quota
/// aggregates.
pub(crate) const ACTION_DOWNLOAD_COMPLETED: &str = "download_completed";

impl Store {
    /// Append a usage row.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn log_usage(
        &self,
        user_id: Uuid,
        action: &str,
        bytes_transferred: u64,
        metadata: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO usage_logs (user_id, action, bytes_transferred, metadata)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(user_id)
        .bind(action)
        .bind(clamp_i64(bytes_transferred))
        .bind(json!({ "detail": metadata }))
        .execute(self.pool())
        .await
        .map_err(map_query_err("log usage"))?;
        Ok(())
    }

    /// Append a `download_started` row.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn log_download_started(
        &self,
        user_id: Uuid,
        bytes: u64,
        detail: &str,
    ) -> Result<()> {
        self.log_usage(user_id, ACTION_DOWNLOAD_STARTED, bytes, detail).await
    }

    /// Append a `download_completed` row.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn log_download_completed(
        &self,
        user_id: Uuid,
        bytes: u64,
        detail: &str,
    ) -> Result<()> {
        self.log_usage(user_id, ACTION_DOWNLOAD_COMPLETED, bytes, detail).await
    }

    /// Bytes of completed downloads since the first of the current month.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_monthly_usage(&self, user_id: Uuid) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COALESCE(SUM(bytes_transferred), 0)::BIGINT FROM usage_logs
             WHERE user_id = $1 AND action = 'download_completed'
             AND created_at >= date_trunc('month', CURRENT_DATE)",
        )
        .bind(user_id)
        .fetch_one(self.pool())
        .await
        .map_err(map_query_err("aggregate monthly usage"))
    }
}
