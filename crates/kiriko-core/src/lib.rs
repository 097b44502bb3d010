//! Client-side orchestration for the Kiriko backend.
//!
//! The pieces: a reference-counted [`poller`] that shares periodic fetches
//! between subscribers, [`jobs`] monitors that turn active-job feeds into
//! toast notifications, the [`connect`] account-linking state machine, and
//! [`trim`] sessions that carry a clamped cut range through submission and
//! job tracking. [`cache`] holds the explicitly-invalidated shared records
//! and [`config`] the on-disk settings.

pub mod cache;
pub mod config;
pub mod connect;
pub mod error;
pub mod jobs;
pub mod poller;
pub mod trim;

#[cfg(test)]
pub(crate) mod testutil;

pub use cache::Caches;
pub use config::AppConfig;
pub use connect::{ConnectPhase, ConnectState, ConnectionController};
pub use error::CoreError;
pub use jobs::{JobFeedKey, JobMonitor, JobSnapshot, ToastPhase, ToastSnapshot};
pub use poller::{PollControl, PollHandle, Poller};
pub use trim::{TrimController, TrimHandle, TrimSelection, TrimSession};
