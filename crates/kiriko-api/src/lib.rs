//! Typed REST client for the Kiriko backend.
//!
//! `types` mirrors the backend's wire format, `service::Api` is the trait seam
//! the orchestration layer and tests program against, and `client::Client` is
//! the `reqwest` implementation.

pub mod client;
pub mod error;
pub mod service;
pub mod types;

pub use client::Client;
pub use error::ApiError;
pub use service::Api;
