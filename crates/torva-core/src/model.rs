//! Core torrent domain types shared across the workspace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle states a torrent record can be in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TorrentStatus {
    /// Admitted, metadata not yet known.
    Pending,
    /// Actively exchanging pieces with the swarm.
    Downloading,
    /// Payload complete and the engine is still serving peers.
    Seeding,
    /// Payload complete; retention clock is running.
    Completed,
    /// Terminal failure (metadata timeout, engine error).
    Failed,
    /// Peer ceiling dropped to zero on user request.
    Paused,
    /// No metadata progress and no connected peers.
    Stalled,
    /// Removed by the user before completion.
    Cancelled,
}

impl TorrentStatus {
    /// Stable wire/database label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Seeding => "seeding",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
            Self::Stalled => "stalled",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a stable label back into a status.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pending" => Some(Self::Pending),
            "downloading" => Some(Self::Downloading),
            "seeding" => Some(Self::Seeding),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "paused" => Some(Self::Paused),
            "stalled" => Some(Self::Stalled),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether the record counts against the concurrent-download quota.
    #[must_use]
    pub const fn counts_as_active(self) -> bool {
        matches!(self, Self::Pending | Self::Downloading)
    }

    /// Whether the record never returns to the engine after a restart.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TorrentStatus {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Download priority for an individual file within a torrent.
#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FilePriority {
    /// Do not download the file.
    Skip,
    /// Throttled priority.
    Low,
    /// Default priority assigned by the engine.
    #[default]
    Normal,
    /// Fetch ahead of everything else.
    High,
}

/// Individual file exposed by a torrent's metainfo.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TorrentFile {
    /// Relative path of the file within the torrent payload.
    pub path: String,
    /// Total size of the file in bytes.
    pub size: u64,
    /// Completion percentage (0-100) for this file.
    pub progress: f64,
    /// Current download priority.
    #[serde(default)]
    pub priority: FilePriority,
}

/// Durable torrent record as stored and served to API consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentRecord {
    /// Record identifier; one per (user, admission).
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// 40-hex infohash coordinating swarm participation.
    pub info_hash: String,
    /// Display name; canonicalised once metadata arrives.
    pub name: String,
    /// Magnet URI the torrent was admitted with, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magnet_uri: Option<String>,
    /// Current lifecycle status.
    pub status: TorrentStatus,
    /// Total payload size in bytes (0 until metadata is known).
    pub total_size: u64,
    /// Bytes downloaded so far.
    pub downloaded: u64,
    /// Bytes uploaded so far.
    pub uploaded: u64,
    /// Last observed download rate in bytes per second.
    pub download_speed: f64,
    /// Last observed upload rate in bytes per second.
    pub upload_speed: f64,
    /// Completion percentage (0-100).
    pub progress: f64,
    /// Connected peers at the last tick.
    pub peers: u32,
    /// Connected seeders at the last tick.
    pub seeds: u32,
    /// File listing; empty until metadata is known.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<TorrentFile>,
    /// Relative path of the packaged archive, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip_path: Option<String>,
    /// Size of the packaged archive in bytes.
    pub zip_size: u64,
    /// Failure detail for `failed` records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// When the first piece was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Completion commit instant; written at most once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Retention deadline; `completed_at + plan.retention_days`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Row creation instant.
    pub created_at: DateTime<Utc>,
}

/// One tick's view of a managed torrent, produced by the update pipeline and
/// consumed by the reducer and the SSE broadcaster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Record identifier the update applies to.
    pub id: Uuid,
    /// Owning user of the engine participation.
    #[serde(skip)]
    pub user_id: Uuid,
    /// 40-hex infohash.
    pub info_hash: String,
    /// Derived lifecycle status.
    pub status: TorrentStatus,
    /// Completion percentage (0-100).
    pub progress: f64,
    /// Bytes downloaded so far.
    pub downloaded: u64,
    /// Bytes uploaded so far.
    pub uploaded: u64,
    /// Download rate in bytes per second since the previous tick.
    pub download_speed: f64,
    /// Upload rate in bytes per second since the previous tick.
    pub upload_speed: f64,
    /// Connected peers.
    pub peers: u32,
    /// Connected seeders.
    pub seeds: u32,
    /// Torrent name once metadata is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Total payload size in bytes.
    pub total_size: u64,
    /// File listing, rebuilt every tick.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<TorrentFile>,
    /// Failure detail; presence routes the update down the error commit path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusUpdate {
    /// Skeleton update carrying only identity; used for synthesised
    /// transitions (metadata timeout, admission acknowledgements).
    #[must_use]
    pub fn bare(id: Uuid, user_id: Uuid, info_hash: impl Into<String>, status: TorrentStatus) -> Self {
        Self {
            id,
            user_id,
            info_hash: info_hash.into(),
            status,
            progress: 0.0,
            downloaded: 0,
            uploaded: 0,
            download_speed: 0.0,
            upload_speed: 0.0,
            peers: 0,
            seeds: 0,
            name: None,
            total_size: 0,
            files: Vec::new(),
            error: None,
        }
    }

    /// Same as [`StatusUpdate::bare`] but tagged with a failure message.
    #[must_use]
    pub fn failed(id: Uuid, user_id: Uuid, info_hash: impl Into<String>, error: impl Into<String>) -> Self {
        let mut update = Self::bare(id, user_id, info_hash, TorrentStatus::Failed);
        update.error = Some(error.into());
        update
    }
}

/// Completion percentage (0-100) with a zero-total guard.
#[must_use]
pub fn percent_complete(completed: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        {
            (completed as f64 / total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_round_trip() {
        let variants = [
            TorrentStatus::Pending,
            TorrentStatus::Downloading,
            TorrentStatus::Seeding,
            TorrentStatus::Completed,
            TorrentStatus::Failed,
            TorrentStatus::Paused,
            TorrentStatus::Stalled,
            TorrentStatus::Cancelled,
        ];
        for status in variants {
            assert_eq!(TorrentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TorrentStatus::parse("exists"), None);
    }

    #[test]
    fn active_statuses_match_quota_definition() {
        assert!(TorrentStatus::Pending.counts_as_active());
        assert!(TorrentStatus::Downloading.counts_as_active());
        assert!(!TorrentStatus::Completed.counts_as_active());
        assert!(!TorrentStatus::Paused.counts_as_active());
    }

    #[test]
    fn terminal_statuses_stay_out_of_the_engine() {
        assert!(TorrentStatus::Failed.is_terminal());
        assert!(TorrentStatus::Cancelled.is_terminal());
        assert!(!TorrentStatus::Completed.is_terminal());
    }

    #[test]
    fn percent_handles_zero_total() {
        assert!(percent_complete(0, 0).abs() < f64::EPSILON);
        assert!((percent_complete(5, 10) - 50.0).abs() < f64::EPSILON);
        assert!((percent_complete(10, 10) - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn update_serialisation_drops_empty_fields() {
        let update = StatusUpdate::bare(
            Uuid::nil(),
            Uuid::nil(),
            "0000000000000000000000000000000000000000",
            TorrentStatus::Pending,
        );
        let value = serde_json::to_value(&update).expect("serialise update");
        assert!(value.get("files").is_none());
        assert!(value.get("error").is_none());
        assert!(value.get("user_id").is_none());
        assert_eq!(value["status"], "pending");
    }

    #[test]
    fn failed_update_carries_message() {
        let update = StatusUpdate::failed(Uuid::nil(), Uuid::nil(), "aa", "timeout");
        assert_eq!(update.status, TorrentStatus::Failed);
        assert_eq!(update.error.as_deref(), Some("timeout"));
    }
}
