//! Scripted fake backend for driver tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use kiriko_api::types::{
    AuthStart, ConnectionStatus, JobStatus, LibrarySection, MediaFile, MediaStats, MediaType,
    ScanJob, ScanRequest, ScanType, ServerCandidate, ServerPick, SyncStatus, TrimJob, TrimRequest,
};
use kiriko_api::{Api, ApiError};

/// Fake `Api` that replays scripted responses and records every call.
///
/// Queued responses (`VecDeque`) pop per call; the last element repeats once
/// the queue is down to one. Endpoints listed in `fail` return a 500.
#[derive(Default)]
pub struct FakeApi {
    calls: Mutex<Vec<&'static str>>,
    fail: Mutex<HashSet<&'static str>>,

    pub status: Mutex<Option<ConnectionStatus>>,
    pub auth_start: Mutex<Option<AuthStart>>,
    pub auth_polls: Mutex<VecDeque<bool>>,
    pub servers: Mutex<Vec<ServerCandidate>>,
    pub libraries: Mutex<Vec<LibrarySection>>,
    pub active_jobs: Mutex<VecDeque<Vec<ScanJob>>>,
    pub scan_jobs: Mutex<HashMap<i64, ScanJob>>,
    pub sync_statuses: Mutex<VecDeque<SyncStatus>>,
    pub media: Mutex<HashMap<i64, MediaFile>>,
    pub submit_trim_response: Mutex<Option<TrimJob>>,
    pub trim_polls: Mutex<VecDeque<TrimJob>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_endpoint(&self, name: &'static str) {
        self.fail.lock().unwrap().insert(name);
    }

    pub fn calls_to(&self, name: &'static str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == name).count()
    }

    fn record(&self, name: &'static str) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push(name);
        if self.fail.lock().unwrap().contains(name) {
            return Err(ApiError::Api {
                status: 500,
                message: format!("{name} failed"),
            });
        }
        Ok(())
    }

    fn next<T: Clone>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
        let mut q = queue.lock().unwrap();
        if q.len() > 1 {
            q.pop_front()
        } else {
            q.front().cloned()
        }
    }
}

/// A running scan job with the given progress counters.
pub fn scan_job(id: i64, status: JobStatus, processed: u64, total: u64, issues: u64) -> ScanJob {
    ScanJob {
        id,
        scan_type: ScanType::FullLibrary,
        status,
        target_path: None,
        media_file_id: None,
        total_files: total,
        processed_files: processed,
        issues_found: issues,
        progress_pct: 0.0,
        created_at: None,
        started_at: None,
        completed_at: None,
        duration_seconds: None,
        error_message: None,
    }
}

pub fn trim_job(id: i64, media_id: i64, status: JobStatus) -> TrimJob {
    TrimJob {
        id,
        media_file_id: media_id,
        issue_id: None,
        status,
        remove_start: 10.0,
        remove_end: 15.0,
        remove_duration: 5.0,
        original_duration: Some(120.0),
        backup_path: None,
        elapsed_seconds: None,
        created_at: None,
        started_at: None,
        completed_at: None,
        error_message: None,
    }
}

pub fn media_file(id: i64, duration: f64) -> MediaFile {
    MediaFile {
        id,
        path: format!("/media/file-{id}.mkv"),
        title: format!("File {id}"),
        media_type: MediaType::Episode,
        series_title: None,
        season_number: None,
        episode_number: None,
        duration_seconds: Some(duration),
        file_size_bytes: None,
        resolution: None,
        codec: None,
        container: None,
        plex_id: None,
        plex_library: None,
        last_scanned: None,
        added_at: None,
        issue_count: 0,
        unresolved_issues: 0,
        issues: Vec::new(),
    }
}

fn missing(name: &str) -> ApiError {
    ApiError::Api {
        status: 404,
        message: format!("no scripted response for {name}"),
    }
}

impl Api for FakeApi {
    async fn connection_status(&self) -> Result<ConnectionStatus, ApiError> {
        self.record("connection_status")?;
        self.status
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| missing("connection_status"))
    }

    async fn start_auth(&self) -> Result<AuthStart, ApiError> {
        self.record("start_auth")?;
        self.auth_start
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| missing("start_auth"))
    }

    async fn poll_auth(&self, _pin_id: i64) -> Result<bool, ApiError> {
        self.record("poll_auth")?;
        Self::next(&self.auth_polls).ok_or_else(|| missing("poll_auth"))
    }

    async fn list_servers(&self) -> Result<Vec<ServerCandidate>, ApiError> {
        self.record("list_servers")?;
        Ok(self.servers.lock().unwrap().clone())
    }

    async fn select_server(&self, _pick: ServerPick) -> Result<(), ApiError> {
        self.record("select_server")
    }

    async fn list_libraries(&self) -> Result<Vec<LibrarySection>, ApiError> {
        self.record("list_libraries")?;
        Ok(self.libraries.lock().unwrap().clone())
    }

    async fn save_library_selection(&self, _keys: Vec<String>) -> Result<(), ApiError> {
        self.record("save_library_selection")
    }

    async fn start_sync(&self) -> Result<bool, ApiError> {
        self.record("start_sync")?;
        Ok(true)
    }

    async fn sync_status(&self) -> Result<SyncStatus, ApiError> {
        self.record("sync_status")?;
        Ok(Self::next(&self.sync_statuses).unwrap_or_default())
    }

    async fn cancel_sync(&self) -> Result<bool, ApiError> {
        self.record("cancel_sync")?;
        Ok(true)
    }

    async fn disconnect(&self) -> Result<(), ApiError> {
        self.record("disconnect")
    }

    async fn active_scan_jobs(&self) -> Result<Vec<ScanJob>, ApiError> {
        self.record("active_scan_jobs")?;
        Ok(Self::next(&self.active_jobs).unwrap_or_default())
    }

    async fn get_scan_job(&self, id: i64) -> Result<ScanJob, ApiError> {
        self.record("get_scan_job")?;
        self.scan_jobs
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| missing("get_scan_job"))
    }

    async fn start_scan(&self, req: ScanRequest) -> Result<ScanJob, ApiError> {
        self.record("start_scan")?;
        let mut job = scan_job(1, JobStatus::Pending, 0, 0, 0);
        job.scan_type = req.scan_type;
        Ok(job)
    }

    async fn cancel_scan_job(&self, _id: i64) -> Result<(), ApiError> {
        self.record("cancel_scan_job")
    }

    async fn get_media(&self, id: i64) -> Result<MediaFile, ApiError> {
        self.record("get_media")?;
        self.media
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| missing("get_media"))
    }

    async fn media_stats(&self) -> Result<MediaStats, ApiError> {
        self.record("media_stats")?;
        Ok(MediaStats::default())
    }

    async fn submit_trim(&self, _media_id: i64, _req: TrimRequest) -> Result<TrimJob, ApiError> {
        self.record("submit_trim")?;
        self.submit_trim_response
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| missing("submit_trim"))
    }

    async fn get_trim_job(&self, _media_id: i64, _job_id: i64) -> Result<TrimJob, ApiError> {
        self.record("get_trim_job")?;
        Self::next(&self.trim_polls).ok_or_else(|| missing("get_trim_job"))
    }
}
