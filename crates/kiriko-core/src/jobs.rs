//! Job-lifecycle notifications.
//!
//! A `JobMonitor` watches a poller feed of active jobs and derives a toast
//! phase from it: hidden while nothing runs, running while the feed is
//! non-empty, then completed or failed once the job leaves the feed and its
//! terminal record has been fetched. Two instances exist (scan jobs and
//! library sync) sharing the same state machine.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use kiriko_api::types::{JobStatus, ScanJob, SyncState, SyncStatus};
use kiriko_api::{Api, ApiError};

use crate::cache::Caches;
use crate::poller::{PollControl, PollHandle, Poller};

/// How long a completed toast stays visible before hiding itself.
pub const DISMISS_AFTER: Duration = Duration::from_secs(5);

/// Registry keys for the shared job feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobFeedKey {
    ActiveScans,
    Sync,
}

/// The slice of a job the toast renders, common to scan and sync jobs.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub id: i64,
    pub status: JobStatus,
    pub processed: u64,
    pub total: u64,
    pub issues_found: u64,
    pub error: Option<String>,
}

impl From<&ScanJob> for JobSnapshot {
    fn from(job: &ScanJob) -> Self {
        Self {
            id: job.id,
            status: job.status,
            processed: job.processed_files,
            total: job.total_files,
            issues_found: job.issues_found,
            error: job.error_message.clone(),
        }
    }
}

impl JobSnapshot {
    /// Project the singleton sync record onto the common job shape.
    /// Idle means "no job", not a job in some state.
    pub fn from_sync(status: &SyncStatus) -> Option<Self> {
        let mapped = match status.status {
            SyncState::Idle => return None,
            SyncState::Running => JobStatus::Running,
            SyncState::Completed => JobStatus::Completed,
            SyncState::Cancelled => JobStatus::Cancelled,
            SyncState::Failed => JobStatus::Failed,
        };
        Some(Self {
            id: 0,
            status: mapped,
            processed: status.processed,
            total: status.total,
            issues_found: 0,
            error: status.error.clone(),
        })
    }
}

// ── State machine ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToastPhase {
    #[default]
    Hidden,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub enum ToastEvent {
    /// A new snapshot of the active-jobs feed.
    Feed(Vec<JobSnapshot>),
    /// The follow-up fetch of the departed job's full record came back.
    /// `None` when the record was unavailable.
    Resolved(Option<JobSnapshot>),
    /// The auto-dismiss timer fired. Stale generations are ignored.
    DismissElapsed(u64),
    /// User dismissed the toast.
    Dismiss,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToastEffect {
    /// Fetch the full record of the job that just left the feed.
    Resolve(i64),
    /// Start the auto-dismiss timer for this generation.
    ScheduleDismiss { generation: u64, after: Duration },
    /// The library changed: drop media/stats caches. Emitted once per
    /// completion transition, never per tick.
    InvalidateListings,
}

/// Pure toast state. `apply` returns the side effects for the driver to run,
/// so every transition is testable without timers or a network.
#[derive(Debug, Clone, Default)]
pub struct ToastState {
    pub phase: ToastPhase,
    pub job: Option<JobSnapshot>,
    /// A follow-up fetch is outstanding; guards the "exactly one" rule.
    resolving: bool,
    /// Bumped whenever a pending dismiss must be cancelled.
    dismiss_generation: u64,
}

impl ToastState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: ToastEvent) -> Vec<ToastEffect> {
        match event {
            ToastEvent::Feed(jobs) => {
                let active = jobs.into_iter().find(|j| j.status.is_active());
                match active {
                    Some(job) => {
                        // Cancels any scheduled dismiss and any pending
                        // resolution: a fresh job owns the toast now.
                        self.dismiss_generation += 1;
                        self.resolving = false;
                        self.phase = ToastPhase::Running;
                        self.job = Some(job);
                        Vec::new()
                    }
                    None => {
                        if self.phase == ToastPhase::Running && !self.resolving {
                            if let Some(job) = &self.job {
                                self.resolving = true;
                                return vec![ToastEffect::Resolve(job.id)];
                            }
                        }
                        Vec::new()
                    }
                }
            }
            ToastEvent::Resolved(record) => {
                if !self.resolving {
                    // A new job took over while the fetch was in flight.
                    return Vec::new();
                }
                self.resolving = false;
                match record {
                    Some(job) if job.status == JobStatus::Completed => {
                        self.phase = ToastPhase::Completed;
                        self.job = Some(job);
                        self.dismiss_generation += 1;
                        vec![
                            ToastEffect::InvalidateListings,
                            ToastEffect::ScheduleDismiss {
                                generation: self.dismiss_generation,
                                after: DISMISS_AFTER,
                            },
                        ]
                    }
                    Some(job) if job.status == JobStatus::Failed => {
                        self.phase = ToastPhase::Failed;
                        self.job = Some(job);
                        Vec::new()
                    }
                    // Cancelled, still-active, or unavailable: hide quietly.
                    _ => {
                        self.phase = ToastPhase::Hidden;
                        self.job = None;
                        Vec::new()
                    }
                }
            }
            ToastEvent::DismissElapsed(generation) => {
                if generation == self.dismiss_generation && self.phase == ToastPhase::Completed {
                    self.phase = ToastPhase::Hidden;
                    self.job = None;
                }
                Vec::new()
            }
            ToastEvent::Dismiss => {
                self.dismiss_generation += 1;
                self.resolving = false;
                self.phase = ToastPhase::Hidden;
                self.job = None;
                Vec::new()
            }
        }
    }
}

// ── Driver ─────────────────────────────────────────────────────────

/// What subscribers see: the phase plus the job it refers to.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToastSnapshot {
    pub phase: ToastPhase,
    pub job: Option<JobSnapshot>,
}

type Resolver = Arc<dyn Fn(i64) -> BoxFuture<'static, Result<Option<JobSnapshot>, ApiError>> + Send + Sync>;
type CancelFn = Arc<dyn Fn(i64) -> BoxFuture<'static, Result<(), ApiError>> + Send + Sync>;

struct MonitorShared {
    state: Mutex<ToastState>,
    tx: watch::Sender<ToastSnapshot>,
    resolver: Resolver,
    invalidate: Arc<dyn Fn() + Send + Sync>,
}

/// Drives a `ToastState` from a live poller feed.
pub struct JobMonitor {
    shared: Arc<MonitorShared>,
    cancel: CancelFn,
    feed_task: JoinHandle<()>,
}

impl JobMonitor {
    /// Monitor for scan jobs: feed is the active-scan list, resolution via
    /// the job record, cancel via the scan endpoint.
    pub fn scan<S: Api + 'static>(
        service: Arc<S>,
        caches: Arc<Caches>,
        poller: &Poller<JobFeedKey, Vec<JobSnapshot>>,
        interval: Duration,
    ) -> Self {
        let feed = {
            let service = service.clone();
            poller.subscribe(
                JobFeedKey::ActiveScans,
                move || {
                    let service = service.clone();
                    async move {
                        let jobs = service.active_scan_jobs().await?;
                        Ok(jobs.iter().map(JobSnapshot::from).collect::<Vec<_>>())
                    }
                },
                move |_| PollControl::Repeat(interval),
            )
        };
        let resolver: Resolver = {
            let service = service.clone();
            Arc::new(move |id| {
                let service = service.clone();
                Box::pin(async move {
                    let job = service.get_scan_job(id).await?;
                    Ok(Some(JobSnapshot::from(&job)))
                })
            })
        };
        let cancel: CancelFn = Arc::new(move |id| {
            let service = service.clone();
            Box::pin(async move { service.cancel_scan_job(id).await })
        });
        let invalidate = Arc::new(move || caches.invalidate_listings());
        Self::spawn(feed, resolver, cancel, invalidate)
    }

    /// Monitor for library sync: the singleton status record projects to a
    /// zero-or-one-element feed, and resolution re-reads the same record.
    pub fn sync<S: Api + 'static>(
        service: Arc<S>,
        caches: Arc<Caches>,
        poller: &Poller<JobFeedKey, Vec<JobSnapshot>>,
        interval: Duration,
    ) -> Self {
        let feed = {
            let service = service.clone();
            poller.subscribe(
                JobFeedKey::Sync,
                move || {
                    let service = service.clone();
                    async move {
                        let status = service.sync_status().await?;
                        Ok(JobSnapshot::from_sync(&status)
                            .filter(|j| j.status.is_active())
                            .into_iter()
                            .collect::<Vec<_>>())
                    }
                },
                move |_| PollControl::Repeat(interval),
            )
        };
        let resolver: Resolver = {
            let service = service.clone();
            Arc::new(move |_id| {
                let service = service.clone();
                Box::pin(async move {
                    let status = service.sync_status().await?;
                    Ok(JobSnapshot::from_sync(&status))
                })
            })
        };
        let cancel: CancelFn = Arc::new(move |_id| {
            let service = service.clone();
            Box::pin(async move { service.cancel_sync().await.map(|_| ()) })
        });
        // A finished sync changed the library and the connection record's
        // embedded sync state.
        let invalidate = Arc::new(move || {
            caches.invalidate_listings();
            caches.connection.invalidate();
        });
        Self::spawn(feed, resolver, cancel, invalidate)
    }

    fn spawn(
        mut feed: PollHandle<Vec<JobSnapshot>>,
        resolver: Resolver,
        cancel: CancelFn,
        invalidate: Arc<dyn Fn() + Send + Sync>,
    ) -> Self {
        let (tx, _) = watch::channel(ToastSnapshot::default());
        let shared = Arc::new(MonitorShared {
            state: Mutex::new(ToastState::new()),
            tx,
            resolver,
            invalidate,
        });

        let feed_task = tokio::spawn({
            let shared = shared.clone();
            async move {
                if let Some(jobs) = feed.latest() {
                    dispatch(&shared, ToastEvent::Feed(jobs));
                }
                while feed.changed().await {
                    if let Some(jobs) = feed.latest() {
                        dispatch(&shared, ToastEvent::Feed(jobs));
                    }
                }
            }
        });

        Self {
            shared,
            cancel,
            feed_task,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ToastSnapshot> {
        self.shared.tx.subscribe()
    }

    pub fn snapshot(&self) -> ToastSnapshot {
        let state = self.shared.state.lock().expect("toast lock poisoned");
        ToastSnapshot {
            phase: state.phase,
            job: state.job.clone(),
        }
    }

    /// User dismissed the toast (the only way out of `Failed`).
    pub fn dismiss(&self) {
        dispatch(&self.shared, ToastEvent::Dismiss);
    }

    /// Ask the backend to cancel the currently displayed job. A failed
    /// cancellation leaves the toast alone and is not retried; the feed
    /// catches up either way.
    pub fn cancel_active(&self) {
        let job_id = {
            let state = self.shared.state.lock().expect("toast lock poisoned");
            match (&state.phase, &state.job) {
                (ToastPhase::Running, Some(job)) => job.id,
                _ => return,
            }
        };
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = cancel(job_id).await {
                tracing::warn!(job_id, error = %e, "job cancellation request failed");
            }
        });
    }
}

impl Drop for JobMonitor {
    fn drop(&mut self) {
        self.feed_task.abort();
    }
}

fn dispatch(shared: &Arc<MonitorShared>, event: ToastEvent) {
    let effects = {
        let mut state = shared.state.lock().expect("toast lock poisoned");
        let effects = state.apply(event);
        shared.tx.send_replace(ToastSnapshot {
            phase: state.phase,
            job: state.job.clone(),
        });
        effects
    };

    for effect in effects {
        match effect {
            ToastEffect::Resolve(id) => {
                let shared = shared.clone();
                tokio::spawn(async move {
                    let record = match (shared.resolver)(id).await {
                        Ok(record) => record,
                        Err(e) => {
                            tracing::debug!(job_id = id, error = %e, "terminal-record fetch failed");
                            None
                        }
                    };
                    dispatch(&shared, ToastEvent::Resolved(record));
                });
            }
            ToastEffect::ScheduleDismiss { generation, after } => {
                let shared = shared.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    dispatch(&shared, ToastEvent::DismissElapsed(generation));
                });
            }
            ToastEffect::InvalidateListings => (shared.invalidate)(),
        }
    }
}
