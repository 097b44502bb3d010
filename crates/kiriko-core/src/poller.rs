//! Shared polling subscriptions.
//!
//! A `Poller` is a reference-counted registry keyed by request signature: the
//! first subscriber to a key starts one fetch-then-sleep loop, later
//! subscribers share it, and the loop stops when the last handle drops.
//! Results fan out through a `watch` channel, so every subscriber observes the
//! same snapshot and no key ever issues more than one scheduled fetch per tick.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use kiriko_api::ApiError;

/// Decision returned by an interval policy after each applied result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollControl {
    /// Fetch again after this long.
    Repeat(Duration),
    /// Resource is settled: cancel the timer, keep the last value available.
    Stop,
}

type Fetch<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, ApiError>> + Send + Sync>;
type Policy<T> = Arc<dyn Fn(Option<&T>) -> PollControl + Send + Sync>;

struct Entry<T> {
    subscribers: usize,
    tx: watch::Sender<Option<T>>,
    fetch: Fetch<T>,
    policy: Policy<T>,
    /// Sequence number handed to the most recently issued request.
    issued: u64,
    /// Sequence number of the most recently applied response. A response is
    /// applied only if its sequence is not below this, so a stale in-flight
    /// fetch can never overwrite a fresher result.
    applied: u64,
    stopped: bool,
    task: Option<JoinHandle<()>>,
}

struct Inner<K, T> {
    entries: Mutex<HashMap<K, Entry<T>>>,
}

impl<K, T> Inner<K, T>
where
    K: Eq + Hash,
    T: Clone,
{
    /// Apply a fetched value under the sequence guard. Returns false when the
    /// key is gone (torn down) or the response lost the race.
    fn apply(&self, key: &K, seq: u64, value: T) -> bool {
        let mut entries = self.entries.lock().expect("poller lock poisoned");
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        if seq < entry.applied {
            tracing::trace!(seq, applied = entry.applied, "discarding stale poll response");
            return false;
        }
        entry.applied = seq;
        entry.tx.send_replace(Some(value));
        true
    }

    /// Hand out the fetch and the next sequence number, or None if the key is
    /// gone or settled.
    fn next_request(&self, key: &K, allow_stopped: bool) -> Option<(Fetch<T>, u64)> {
        let mut entries = self.entries.lock().expect("poller lock poisoned");
        let entry = entries.get_mut(key)?;
        if entry.stopped && !allow_stopped {
            return None;
        }
        entry.issued += 1;
        Some((entry.fetch.clone(), entry.issued))
    }

    /// Evaluate the interval policy on the latest value; marks the entry
    /// stopped when the policy says so.
    fn control(&self, key: &K) -> Option<PollControl> {
        let mut entries = self.entries.lock().expect("poller lock poisoned");
        let entry = entries.get_mut(key)?;
        let control = {
            let latest = entry.tx.borrow();
            (entry.policy)(latest.as_ref())
        };
        if control == PollControl::Stop {
            entry.stopped = true;
        }
        Some(control)
    }

    fn release(&self, key: &K) {
        let mut entries = self.entries.lock().expect("poller lock poisoned");
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        entry.subscribers -= 1;
        if entry.subscribers == 0 {
            let entry = entries.remove(key).expect("entry present");
            if let Some(task) = entry.task {
                task.abort();
            }
        }
    }
}

/// A live subscription. Dropping it detaches; dropping the last handle for a
/// key aborts the poll loop and discards any in-flight result on arrival.
pub struct PollHandle<T> {
    rx: watch::Receiver<Option<T>>,
    _guard: ReleaseGuard,
}

struct ReleaseGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl<T: Clone> PollHandle<T> {
    /// Latest applied snapshot, `None` until the first fetch lands.
    pub fn latest(&self) -> Option<T> {
        self.rx.borrow().clone()
    }

    /// Wait for the next applied snapshot. Returns false once the
    /// subscription is torn down.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// A raw receiver for consumers that run their own select loop.
    pub fn receiver(&self) -> watch::Receiver<Option<T>> {
        self.rx.clone()
    }
}

/// Reference-counted polling registry. One instance per snapshot type; keys
/// distinguish resources within it.
pub struct Poller<K, T> {
    inner: Arc<Inner<K, T>>,
}

impl<K, T> Clone for Poller<K, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, T> Default for Poller<K, T>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> Poller<K, T>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to `key`. The first subscriber supplies the fetch and policy
    /// and starts the loop (one immediate fetch, then `policy`-driven ticks);
    /// later subscribers share the running loop and their fetch/policy are
    /// ignored. A key whose policy already said `Stop` keeps serving its last
    /// value without restarting.
    pub fn subscribe<F, Fut, P>(&self, key: K, fetch: F, policy: P) -> PollHandle<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
        P: Fn(Option<&T>) -> PollControl + Send + Sync + 'static,
    {
        let rx = {
            let mut entries = self.inner.entries.lock().expect("poller lock poisoned");
            if let Some(entry) = entries.get_mut(&key) {
                entry.subscribers += 1;
                entry.tx.subscribe()
            } else {
                let (tx, rx) = watch::channel(None);
                let fetch: Fetch<T> = Arc::new(move || Box::pin(fetch()));
                entries.insert(
                    key.clone(),
                    Entry {
                        subscribers: 1,
                        tx,
                        fetch,
                        policy: Arc::new(policy),
                        issued: 0,
                        applied: 0,
                        stopped: false,
                        task: None,
                    },
                );
                let task = tokio::spawn(poll_loop(self.inner.clone(), key.clone()));
                entries
                    .get_mut(&key)
                    .expect("entry just inserted")
                    .task = Some(task);
                rx
            }
        };

        let inner = self.inner.clone();
        let release_key = key;
        PollHandle {
            rx,
            _guard: ReleaseGuard {
                release: Some(Box::new(move || inner.release(&release_key))),
            },
        }
    }

    /// Issue one extra fetch for `key` right now, without disturbing the
    /// timer. Goes through the same sequence guard as scheduled ticks, so a
    /// slow tick racing this refresh cannot clobber the fresher result.
    /// No-op for unknown or settled keys.
    pub fn refresh(&self, key: &K) {
        let Some((fetch, seq)) = self.inner.next_request(key, false) else {
            return;
        };
        let inner = self.inner.clone();
        let key = key.clone();
        tokio::spawn(async move {
            match fetch().await {
                Ok(value) => {
                    inner.apply(&key, seq, value);
                }
                Err(e) => tracing::debug!(error = %e, "manual refresh failed"),
            }
        });
    }

    #[cfg(test)]
    fn subscriber_count(&self, key: &K) -> usize {
        self.inner
            .entries
            .lock()
            .unwrap()
            .get(key)
            .map(|e| e.subscribers)
            .unwrap_or(0)
    }
}

async fn poll_loop<K, T>(inner: Arc<Inner<K, T>>, key: K)
where
    K: Eq + Hash,
    T: Clone,
{
    loop {
        let Some((fetch, seq)) = inner.next_request(&key, true) else {
            return;
        };
        match fetch().await {
            Ok(value) => {
                if !inner.apply(&key, seq, value) {
                    return;
                }
            }
            // Transient failure: skip this tick, keep the previous value,
            // fetch again at the next interval.
            Err(e) => tracing::debug!(error = %e, "poll fetch failed; retrying at next tick"),
        }
        match inner.control(&key) {
            Some(PollControl::Repeat(interval)) => tokio::time::sleep(interval).await,
            Some(PollControl::Stop) | None => return,
        }
    }
}
