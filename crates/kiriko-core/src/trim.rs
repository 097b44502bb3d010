//! Interactive trim sessions.
//!
//! A session binds a clamped start/end range over one media file to a
//! double-confirmation gate and, after submission, a private poll loop that
//! follows the trim job to a terminal status. The range invariants hold on
//! every mutation path (drag, numeric input, programmatic reset), so an
//! invalid segment can never reach the submit call.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::watch;

use kiriko_api::types::{JobStatus, MediaFile, MediaIssue, TrimJob, TrimRequest};
use kiriko_api::Api;

use crate::cache::Caches;
use crate::error::CoreError;

/// Shortest removable segment, in seconds. The backend enforces the same
/// bound at submit time; the client makes violations unrepresentable.
pub const MIN_REMOVE_SECS: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimHandle {
    Start,
    End,
}

/// A clamped `[start, end]` segment within `[0, duration]`, always at least
/// `MIN_REMOVE_SECS` long. Any mutation clears a pending confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct TrimSelection {
    duration: f64,
    start: f64,
    end: f64,
    confirmed: bool,
}

impl TrimSelection {
    pub fn new(duration: f64) -> Self {
        let duration = duration.max(MIN_REMOVE_SECS);
        Self {
            duration,
            start: 0.0,
            end: duration,
            confirmed: false,
        }
    }

    /// Seed from requested bounds, clamping them into the valid domain.
    pub fn with_range(duration: f64, start: f64, end: f64) -> Self {
        let mut selection = Self::new(duration);
        selection.set_end(end);
        selection.set_start(start);
        // Re-clamp the end against the settled start.
        selection.set_end(end.max(selection.start + MIN_REMOVE_SECS));
        selection.confirmed = false;
        selection
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn remove_duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn confirmed(&self) -> bool {
        self.confirmed
    }

    /// Move the start handle toward `value`, clamped to `[0, end − 0.5]`.
    pub fn set_start(&mut self, value: f64) {
        self.start = value.clamp(0.0, self.end - MIN_REMOVE_SECS);
        self.confirmed = false;
    }

    /// Move the end handle toward `value`, clamped to `[start + 0.5, duration]`.
    pub fn set_end(&mut self, value: f64) {
        self.end = value.clamp(self.start + MIN_REMOVE_SECS, self.duration);
        self.confirmed = false;
    }

    pub fn drag(&mut self, handle: TrimHandle, position: f64) {
        match handle {
            TrimHandle::Start => self.set_start(position),
            TrimHandle::End => self.set_end(position),
        }
    }

    /// First activation arms the gate; the second (with the range unchanged)
    /// confirms it.
    fn activate(&mut self) -> bool {
        if self.confirmed {
            true
        } else {
            self.confirmed = true;
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrimPhase {
    Editing,
    Submitting,
    InFlight { job_id: i64 },
    Completed { job_id: i64 },
    Failed { job_id: i64, message: String },
}

/// One trim dialog's worth of state. Pure: the controller feeds results in.
#[derive(Debug, Clone)]
pub struct TrimSession {
    media_id: i64,
    issue_id: Option<i64>,
    pub selection: TrimSelection,
    pub phase: TrimPhase,
    pub error: Option<String>,
}

impl TrimSession {
    /// Requires the media duration to be known; the backend refuses to trim
    /// files it has not measured.
    pub fn new(media: &MediaFile) -> Result<Self, CoreError> {
        let duration = media.duration_seconds.ok_or(CoreError::DurationUnknown)?;
        Ok(Self {
            media_id: media.id,
            issue_id: None,
            selection: TrimSelection::new(duration),
            phase: TrimPhase::Editing,
            error: None,
        })
    }

    /// Seed the range from a detected issue; resolving it is delegated to the
    /// backend via the submitted issue id.
    pub fn for_issue(media: &MediaFile, issue: &MediaIssue) -> Result<Self, CoreError> {
        let duration = media.duration_seconds.ok_or(CoreError::DurationUnknown)?;
        Ok(Self {
            media_id: media.id,
            issue_id: Some(issue.id),
            selection: TrimSelection::with_range(duration, issue.start_seconds, issue.end_seconds),
            phase: TrimPhase::Editing,
            error: None,
        })
    }

    pub fn media_id(&self) -> i64 {
        self.media_id
    }

    /// The editor is locked from submission until the job is terminal.
    pub fn is_locked(&self) -> bool {
        matches!(self.phase, TrimPhase::Submitting | TrimPhase::InFlight { .. })
    }

    /// A dialog may only close once no destructive work is in flight.
    pub fn can_close(&self) -> bool {
        !self.is_locked()
    }

    pub fn drag(&mut self, handle: TrimHandle, position: f64) {
        if matches!(self.phase, TrimPhase::Editing) {
            self.selection.drag(handle, position);
        }
    }

    pub fn set_start(&mut self, value: f64) {
        if matches!(self.phase, TrimPhase::Editing) {
            self.selection.set_start(value);
        }
    }

    pub fn set_end(&mut self, value: f64) {
        if matches!(self.phase, TrimPhase::Editing) {
            self.selection.set_end(value);
        }
    }

    /// The confirm button. Returns the request to submit on the second
    /// activation; the first only arms the gate.
    pub fn activate(&mut self) -> Option<TrimRequest> {
        if !matches!(self.phase, TrimPhase::Editing) {
            return None;
        }
        if !self.selection.activate() {
            return None;
        }
        self.error = None;
        self.phase = TrimPhase::Submitting;
        Some(TrimRequest {
            remove_start: self.selection.start(),
            remove_end: self.selection.end(),
            issue_id: self.issue_id,
        })
    }

    /// Outcome of the submit call.
    pub fn submitted(&mut self, result: Result<&TrimJob, String>) {
        if !matches!(self.phase, TrimPhase::Submitting) {
            return;
        }
        match result {
            Ok(job) => {
                self.phase = TrimPhase::InFlight { job_id: job.id };
            }
            Err(message) => {
                // Back to the editable state; retry is the user's call.
                self.phase = TrimPhase::Editing;
                self.selection.confirmed = false;
                self.error = Some(message);
            }
        }
    }

    /// A polled snapshot of the in-flight job. Returns true when it reached a
    /// terminal status and polling should stop.
    pub fn job_update(&mut self, job: &TrimJob) -> bool {
        let TrimPhase::InFlight { job_id } = self.phase else {
            return true;
        };
        if job.id != job_id {
            return false;
        }
        match job.status {
            JobStatus::Completed => {
                self.phase = TrimPhase::Completed { job_id };
                true
            }
            JobStatus::Failed | JobStatus::Cancelled => {
                let message = job
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "trim job failed".to_string());
                self.phase = TrimPhase::Failed { job_id, message };
                true
            }
            JobStatus::Pending | JobStatus::Running => false,
        }
    }

    /// After a failure: drop the job id and the confirmation, back to editing.
    /// Nothing is resubmitted until the user activates again.
    pub fn retry(&mut self) {
        if let TrimPhase::Failed { message, .. } = &self.phase {
            self.error = Some(message.clone());
            self.phase = TrimPhase::Editing;
            self.selection.confirmed = false;
        }
    }
}

// ── Controller ─────────────────────────────────────────────────────

struct TrimShared {
    session: Mutex<TrimSession>,
    tx: watch::Sender<TrimSession>,
}

impl TrimShared {
    fn update<R>(&self, f: impl FnOnce(&mut TrimSession) -> R) -> R {
        let mut session = self.session.lock().expect("trim lock poisoned");
        let result = f(&mut session);
        self.tx.send_replace(session.clone());
        result
    }
}

/// Owns a `TrimSession` and runs its submit + poll lifecycle.
pub struct TrimController<S: Api + 'static> {
    service: Arc<S>,
    caches: Arc<Caches>,
    interval: Duration,
    shared: Arc<TrimShared>,
}

impl<S: Api + 'static> TrimController<S> {
    /// Open a session for `media_id`, optionally seeded from one of its
    /// issues. The media record comes through the cache.
    pub async fn open(
        service: Arc<S>,
        caches: Arc<Caches>,
        media_id: i64,
        issue_id: Option<i64>,
        interval: Duration,
    ) -> Result<Self, CoreError> {
        let media = {
            let service = service.clone();
            caches
                .media
                .get_or_fetch(media_id, || async move { service.get_media(media_id).await })
                .await?
        };
        let session = match issue_id {
            Some(issue_id) => {
                let issue = media
                    .issues
                    .iter()
                    .find(|i| i.id == issue_id)
                    .ok_or_else(|| kiriko_api::ApiError::Api {
                        status: 404,
                        message: format!("issue {issue_id} not found on media {media_id}"),
                    })?;
                TrimSession::for_issue(&media, issue)?
            }
            None => TrimSession::new(&media)?,
        };
        let (tx, _) = watch::channel(session.clone());
        Ok(Self {
            service,
            caches,
            interval,
            shared: Arc::new(TrimShared {
                session: Mutex::new(session),
                tx,
            }),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<TrimSession> {
        self.shared.tx.subscribe()
    }

    pub fn session(&self) -> TrimSession {
        self.shared.session.lock().expect("trim lock poisoned").clone()
    }

    pub fn drag(&self, handle: TrimHandle, position: f64) {
        self.shared.update(|s| s.drag(handle, position));
    }

    pub fn set_start(&self, value: f64) {
        self.shared.update(|s| s.set_start(value));
    }

    pub fn set_end(&self, value: f64) {
        self.shared.update(|s| s.set_end(value));
    }

    pub fn retry(&self) {
        self.shared.update(|s| s.retry());
    }

    /// Confirm-button press. The second activation submits and starts the
    /// poll loop.
    pub fn activate(&self) {
        let Some(request) = self.shared.update(|s| s.activate()) else {
            return;
        };
        let media_id = self.session().media_id();
        let service = self.service.clone();
        let caches = self.caches.clone();
        let interval = self.interval;
        let shared = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            match service.submit_trim(media_id, request).await {
                Ok(job) => {
                    let Some(strong) = shared.upgrade() else {
                        return;
                    };
                    strong.update(|s| s.submitted(Ok(&job)));
                    drop(strong);
                    poll_to_terminal(shared, service, caches, media_id, job.id, interval).await;
                }
                Err(e) => {
                    if let Some(strong) = shared.upgrade() {
                        strong.update(|s| s.submitted(Err(e.to_string())));
                    }
                }
            }
        });
    }
}

/// Single-subscriber poll loop: follow one job to a terminal status, then
/// invalidate what its completion made stale. The session going away stops
/// the loop; the backend job itself continues either way.
async fn poll_to_terminal<S: Api>(
    shared: Weak<TrimShared>,
    service: Arc<S>,
    caches: Arc<Caches>,
    media_id: i64,
    job_id: i64,
    interval: Duration,
) {
    loop {
        tokio::time::sleep(interval).await;
        let Some(strong) = shared.upgrade() else {
            return;
        };
        match service.get_trim_job(media_id, job_id).await {
            Ok(job) => {
                let terminal = strong.update(|s| s.job_update(&job));
                if terminal {
                    if job.status == JobStatus::Completed {
                        caches.media.invalidate(media_id);
                        caches.stats.invalidate();
                    }
                    return;
                }
            }
            // Transient: keep polling, the job is still the backend's truth.
            Err(e) => tracing::debug!(job_id, error = %e, "trim job poll failed; retrying"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{media_file, trim_job, FakeApi};
    use std::collections::VecDeque;
    use tokio::time::sleep;

    #[test]
    fn clamps_follow_the_nearest_valid_position() {
        // duration=120, issue at 10..15
        let mut selection = TrimSelection::with_range(120.0, 10.0, 15.0);
        assert_eq!((selection.start(), selection.end()), (10.0, 15.0));

        // Drag the end handle left past the minimum: clamps to start + 0.5.
        selection.drag(TrimHandle::End, 9.7);
        assert_eq!(selection.end(), 10.5);

        // Drag the start handle right past the end: clamps to end − 0.5.
        selection.drag(TrimHandle::Start, 11.0);
        assert_eq!(selection.start(), 10.0);

        // Domain bounds hold too.
        selection.drag(TrimHandle::Start, -3.0);
        assert_eq!(selection.start(), 0.0);
        selection.drag(TrimHandle::End, 500.0);
        assert_eq!(selection.end(), 120.0);
    }

    #[test]
    fn invariants_hold_on_every_mutation_path() {
        let mut selection = TrimSelection::new(60.0);
        for (handle, position) in [
            (TrimHandle::Start, 59.9),
            (TrimHandle::End, 0.0),
            (TrimHandle::Start, -10.0),
            (TrimHandle::End, 1000.0),
            (TrimHandle::End, 0.2),
        ] {
            selection.drag(handle, position);
            assert!(selection.start() >= 0.0);
            assert!(selection.end() <= selection.duration());
            assert!(selection.remove_duration() >= MIN_REMOVE_SECS);
        }
    }

    #[test]
    fn confirmation_gate_requires_two_activations() {
        let media = media_file(5, 120.0);
        let mut session = TrimSession::new(&media).unwrap();
        session.set_start(10.0);
        session.set_end(15.0);

        // First activation arms only.
        assert!(session.activate().is_none());
        assert!(session.selection.confirmed());
        assert!(matches!(session.phase, TrimPhase::Editing));

        // Second activation produces exactly one request.
        let request = session.activate().unwrap();
        assert_eq!(request.remove_start, 10.0);
        assert_eq!(request.remove_end, 15.0);
        assert!(matches!(session.phase, TrimPhase::Submitting));

        // Locked now: no third request.
        assert!(session.activate().is_none());
    }

    #[test]
    fn changing_the_range_resets_the_gate() {
        let media = media_file(5, 120.0);
        let mut session = TrimSession::new(&media).unwrap();
        session.set_start(10.0);
        session.set_end(15.0);

        assert!(session.activate().is_none());
        session.set_end(16.0);
        assert!(!session.selection.confirmed());
        // Armed again, not submitted.
        assert!(session.activate().is_none());
        assert!(session.activate().is_some());
    }

    #[test]
    fn editor_is_disabled_while_in_flight() {
        let media = media_file(5, 120.0);
        let mut session = TrimSession::new(&media).unwrap();
        session.set_start(10.0);
        session.set_end(15.0);
        session.activate();
        session.activate();
        let job = trim_job(9, 5, JobStatus::Pending);
        session.submitted(Ok(&job));

        assert!(session.is_locked());
        assert!(!session.can_close());
        session.set_start(0.0);
        session.drag(TrimHandle::End, 100.0);
        assert_eq!(session.selection.start(), 10.0);
        assert_eq!(session.selection.end(), 15.0);
    }

    #[test]
    fn failure_surfaces_message_and_retry_re_arms_editing() {
        let media = media_file(5, 120.0);
        let mut session = TrimSession::new(&media).unwrap();
        session.set_start(10.0);
        session.set_end(15.0);
        session.activate();
        session.activate();
        let job = trim_job(9, 5, JobStatus::Pending);
        session.submitted(Ok(&job));

        let mut failed = trim_job(9, 5, JobStatus::Failed);
        failed.error_message = Some("ffmpeg produced no output".into());
        assert!(session.job_update(&failed));
        assert!(matches!(session.phase, TrimPhase::Failed { .. }));
        assert!(session.can_close());

        session.retry();
        assert!(matches!(session.phase, TrimPhase::Editing));
        assert!(!session.selection.confirmed());
        assert_eq!(session.error.as_deref(), Some("ffmpeg produced no output"));
        // No automatic resubmission: the next activate only arms the gate.
        assert!(session.activate().is_none());
    }

    #[test]
    fn submission_error_reverts_to_editing() {
        let media = media_file(5, 120.0);
        let mut session = TrimSession::new(&media).unwrap();
        session.activate();
        session.activate();
        session.submitted(Err("422: segment too short".into()));
        assert!(matches!(session.phase, TrimPhase::Editing));
        assert!(!session.selection.confirmed());
        assert_eq!(session.error.as_deref(), Some("422: segment too short"));
    }

    #[test]
    fn issue_seeds_are_clamped_on_construction() {
        let media = media_file(5, 120.0);
        let mut issue = kiriko_api::types::MediaIssue {
            id: 3,
            media_file_id: 5,
            issue_type: kiriko_api::types::IssueType::Bumper,
            start_seconds: -2.0,
            end_seconds: 0.1,
            duration: 2.1,
            confidence: None,
            description: None,
            resolved: false,
            resolved_at: None,
            resolution_method: None,
            created_at: None,
        };
        let session = TrimSession::for_issue(&media, &issue).unwrap();
        assert!(session.selection.start() >= 0.0);
        assert!(session.selection.remove_duration() >= MIN_REMOVE_SECS);

        issue.start_seconds = 10.0;
        issue.end_seconds = 15.0;
        let session = TrimSession::for_issue(&media, &issue).unwrap();
        assert_eq!(session.selection.start(), 10.0);
        assert_eq!(session.selection.end(), 15.0);
    }

    #[tokio::test(start_paused = true)]
    async fn controller_submits_polls_and_invalidates_on_completion() {
        let api = Arc::new(FakeApi::new());
        api.media.lock().unwrap().insert(5, media_file(5, 120.0));
        *api.submit_trim_response.lock().unwrap() = Some(trim_job(9, 5, JobStatus::Pending));
        *api.trim_polls.lock().unwrap() = VecDeque::from([
            trim_job(9, 5, JobStatus::Running),
            trim_job(9, 5, JobStatus::Completed),
        ]);
        let caches = Arc::new(Caches::new());
        caches.stats.put(Default::default());

        let controller = TrimController::open(
            api.clone(),
            caches.clone(),
            5,
            None,
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert!(caches.media.peek(5).is_some());

        controller.set_start(10.0);
        controller.set_end(15.0);
        controller.activate();
        assert_eq!(api.calls_to("submit_trim"), 0);
        controller.activate();

        sleep(Duration::from_millis(100)).await;
        assert_eq!(api.calls_to("submit_trim"), 1);
        assert!(controller.session().is_locked());

        // Two poll ticks: running, then completed.
        sleep(Duration::from_secs(3)).await;
        assert_eq!(api.calls_to("get_trim_job"), 2);
        assert!(matches!(
            controller.session().phase,
            TrimPhase::Completed { job_id: 9 }
        ));
        assert!(controller.session().can_close());
        assert!(caches.media.peek(5).is_none());
        assert!(caches.stats.peek().is_none());
    }
}
