//! The backend service interface.
//!
//! The HTTP client implements this trait; controllers and tests depend on it
//! rather than on `reqwest`, so every flow can run against a scripted fake.

use std::future::Future;

use crate::error::ApiError;
use crate::types::{
    AuthStart, ConnectionStatus, LibrarySection, MediaFile, MediaStats, ScanJob, ScanRequest,
    ServerCandidate, ServerPick, SyncStatus, TrimJob, TrimRequest,
};

/// Everything the client consumes from the backend.
///
/// All operations are idempotent-safe to retry except `start_auth`,
/// `select_server`, `save_library_selection`, `start_scan`, and `submit_trim`,
/// which callers must only retry on explicit user action.
pub trait Api: Send + Sync {
    /// Full connection state; called on load and after any mutation that
    /// invalidates the cached copy.
    fn connection_status(&self)
        -> impl Future<Output = Result<ConnectionStatus, ApiError>> + Send;

    /// Request a one-time code and the URL the user authorizes it at.
    fn start_auth(&self) -> impl Future<Output = Result<AuthStart, ApiError>> + Send;

    /// Whether the user has authorized the code yet.
    fn poll_auth(&self, pin_id: i64) -> impl Future<Output = Result<bool, ApiError>> + Send;

    fn list_servers(&self)
        -> impl Future<Output = Result<Vec<ServerCandidate>, ApiError>> + Send;

    fn select_server(&self, pick: ServerPick)
        -> impl Future<Output = Result<(), ApiError>> + Send;

    fn list_libraries(&self)
        -> impl Future<Output = Result<Vec<LibrarySection>, ApiError>> + Send;

    fn save_library_selection(
        &self,
        keys: Vec<String>,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Kick off a background library sync. `false` means one was already
    /// running, not an error.
    fn start_sync(&self) -> impl Future<Output = Result<bool, ApiError>> + Send;

    fn sync_status(&self) -> impl Future<Output = Result<SyncStatus, ApiError>> + Send;

    /// Request the running sync to stop. `false` means none was running.
    fn cancel_sync(&self) -> impl Future<Output = Result<bool, ApiError>> + Send;

    fn disconnect(&self) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Jobs with non-terminal status; terminal jobs drop out of this list.
    fn active_scan_jobs(&self) -> impl Future<Output = Result<Vec<ScanJob>, ApiError>> + Send;

    fn get_scan_job(&self, id: i64) -> impl Future<Output = Result<ScanJob, ApiError>> + Send;

    fn start_scan(&self, req: ScanRequest)
        -> impl Future<Output = Result<ScanJob, ApiError>> + Send;

    fn cancel_scan_job(&self, id: i64) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn get_media(&self, id: i64) -> impl Future<Output = Result<MediaFile, ApiError>> + Send;

    fn media_stats(&self) -> impl Future<Output = Result<MediaStats, ApiError>> + Send;

    fn submit_trim(
        &self,
        media_id: i64,
        req: TrimRequest,
    ) -> impl Future<Output = Result<TrimJob, ApiError>> + Send;

    fn get_trim_job(
        &self,
        media_id: i64,
        job_id: i64,
    ) -> impl Future<Output = Result<TrimJob, ApiError>> + Send;
}
