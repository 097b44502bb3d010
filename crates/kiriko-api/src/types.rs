//! Wire types for the backend REST API.
//!
//! Field names and enum values mirror the backend's JSON exactly; timestamps
//! arrive as naive-UTC ISO-8601 strings and parse into `chrono::NaiveDateTime`.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ── Jobs ───────────────────────────────────────────────────────────

/// Lifecycle status shared by scan and trim jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Completed, failed, and cancelled jobs never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    FullLibrary,
    SingleFile,
    Directory,
    BumperOnly,
    LogoOnly,
}

/// A scan job row as returned by `/api/scan/*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: i64,
    pub scan_type: ScanType,
    pub status: JobStatus,
    #[serde(default)]
    pub target_path: Option<String>,
    #[serde(default)]
    pub media_file_id: Option<i64>,
    #[serde(default)]
    pub total_files: u64,
    #[serde(default)]
    pub processed_files: u64,
    #[serde(default)]
    pub issues_found: u64,
    #[serde(default)]
    pub progress_pct: f64,
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub started_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub completed_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Parameters for starting a new scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanRequest {
    pub scan_type: ScanType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_file_id: Option<i64>,
}

// ── Trim jobs ──────────────────────────────────────────────────────

/// A trim job row as returned by `/api/media/{id}/trim-jobs/*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrimJob {
    pub id: i64,
    pub media_file_id: i64,
    #[serde(default)]
    pub issue_id: Option<i64>,
    pub status: JobStatus,
    pub remove_start: f64,
    pub remove_end: f64,
    #[serde(default)]
    pub remove_duration: f64,
    #[serde(default)]
    pub original_duration: Option<f64>,
    #[serde(default)]
    pub backup_path: Option<String>,
    #[serde(default)]
    pub elapsed_seconds: Option<f64>,
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub started_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub completed_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Segment to remove from a media file, in seconds from the start.
#[derive(Debug, Clone, Serialize)]
pub struct TrimRequest {
    pub remove_start: f64,
    pub remove_end: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<i64>,
}

// ── Sync ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Live library-sync progress from `/api/plex/sync/status`.
///
/// An idle sync reports only `{"status": "idle"}`; every other field defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub status: SyncState,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub processed: u64,
    #[serde(default)]
    pub imported: u64,
    #[serde(default)]
    pub updated: u64,
    #[serde(default)]
    pub removed: u64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            status: SyncState::Idle,
            total: 0,
            processed: 0,
            imported: 0,
            updated: 0,
            removed: 0,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }
}

// ── Connection status ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub thumb: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub machine_id: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathPrefix {
    #[serde(default)]
    pub plex: String,
    #[serde(default)]
    pub local: String,
}

/// Full connection state from `/api/plex/status`, fetched on load and cached
/// client-side until explicitly invalidated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    #[serde(default)]
    pub account: Account,
    #[serde(default)]
    pub server: ServerInfo,
    #[serde(default)]
    pub path_prefix: PathPrefix,
    #[serde(default)]
    pub sync: SyncStatus,
    #[serde(default)]
    pub library_keys: Vec<String>,
}

// ── Auth handshake ─────────────────────────────────────────────────

/// Response to `/api/plex/auth/start`: the one-time code the user enters at
/// the authorization URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStart {
    pub pin_id: i64,
    pub pin_code: String,
    pub auth_url: String,
    #[serde(default)]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthPoll {
    pub authenticated: bool,
}

// ── Server & library discovery ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConnection {
    pub uri: String,
    #[serde(default)]
    pub local: bool,
    #[serde(default)]
    pub relay: bool,
}

/// A Plex Media Server reachable by the authenticated account.
/// Connections arrive sorted local-first by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCandidate {
    pub name: String,
    pub machine_id: String,
    #[serde(default)]
    pub owned: bool,
    pub best_url: String,
    #[serde(default)]
    pub connections: Vec<ServerConnection>,
}

/// The server the user picked, submitted to `/api/plex/server`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerPick {
    pub name: String,
    pub machine_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    Movie,
    Show,
    Artist,
    Photo,
    #[serde(other)]
    Other,
}

/// A library section on the connected server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibrarySection {
    pub key: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: SectionKind,
    #[serde(default)]
    pub selected: bool,
}

// ── Media ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Movie,
    Episode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Bumper,
    ChannelLogo,
    Commercial,
}

/// A detected issue on a media file; trim sessions are usually seeded from one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaIssue {
    pub id: i64,
    pub media_file_id: i64,
    pub issue_type: IssueType,
    pub start_seconds: f64,
    pub end_seconds: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub resolved_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub resolution_method: Option<String>,
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
}

/// A media record from `/api/media/{id}`; `issues` is present only on the
/// detail endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFile {
    pub id: i64,
    pub path: String,
    pub title: String,
    pub media_type: MediaType,
    #[serde(default)]
    pub series_title: Option<String>,
    #[serde(default)]
    pub season_number: Option<u32>,
    #[serde(default)]
    pub episode_number: Option<u32>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub file_size_bytes: Option<u64>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub plex_id: Option<String>,
    #[serde(default)]
    pub plex_library: Option<String>,
    #[serde(default)]
    pub last_scanned: Option<NaiveDateTime>,
    #[serde(default)]
    pub added_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub issue_count: u64,
    #[serde(default)]
    pub unresolved_issues: u64,
    #[serde(default)]
    pub issues: Vec<MediaIssue>,
}

/// Aggregate counters from `/api/media/stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaStats {
    #[serde(default)]
    pub total_files: u64,
    #[serde(default)]
    pub scanned_files: u64,
    #[serde(default)]
    pub unscanned_files: u64,
    #[serde(default)]
    pub total_issues: u64,
    #[serde(default)]
    pub unresolved_issues: u64,
    #[serde(default)]
    pub bumpers_found: u64,
    #[serde(default)]
    pub logos_found: u64,
    #[serde(default)]
    pub files_with_issues: u64,
    #[serde(default)]
    pub clean_files: u64,
}

// ── Response envelopes ─────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SavedResponse {
    pub saved: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncStarted {
    pub started: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncCancelled {
    pub cancelled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Disconnected {
    pub disconnected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_job_parses_backend_shape() {
        let json = r#"{
            "id": 7,
            "scan_type": "full_library",
            "status": "running",
            "target_path": "/media",
            "media_file_id": null,
            "total_files": 120,
            "processed_files": 45,
            "issues_found": 3,
            "progress_pct": 37.5,
            "created_at": "2026-08-07T10:15:00.123456",
            "started_at": "2026-08-07T10:15:01.000000",
            "completed_at": null,
            "duration_seconds": null,
            "error_message": null
        }"#;
        let job: ScanJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.id, 7);
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.scan_type, ScanType::FullLibrary);
        assert!(job.started_at.is_some());
        assert!(!job.status.is_terminal());
    }

    #[test]
    fn idle_sync_status_defaults() {
        let status: SyncStatus = serde_json::from_str(r#"{"status": "idle"}"#).unwrap();
        assert_eq!(status.status, SyncState::Idle);
        assert_eq!(status.total, 0);
        assert!(status.error.is_none());
    }

    #[test]
    fn unknown_section_kind_maps_to_other() {
        let section: LibrarySection = serde_json::from_str(
            r#"{"key": "9", "title": "Podcasts", "type": "podcast"}"#,
        )
        .unwrap();
        assert_eq!(section.kind, SectionKind::Other);
        assert!(!section.selected);
    }

    #[test]
    fn trim_request_omits_absent_issue() {
        let req = TrimRequest {
            remove_start: 10.0,
            remove_end: 15.0,
            issue_id: None,
        };
        let body = serde_json::to_string(&req).unwrap();
        assert!(!body.contains("issue_id"));
    }
}
