//! # Pulsewatch Service Worker
//!
//! Offline cache manager for the heart-monitor dashboard.
//!
//! ## Features
//!
//! - **Precache**: the app shell is fetched and stored before a version may activate
//! - **Versioned buckets**: superseded buckets are deleted on activation
//! - **Fetch interception**: cache-first reads with write-through on miss
//! - **Offline fallback**: a cached document stands in for failed reads
//! - **Push**: push messages become notifications
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer (worker host)
//!     │
//!     ├── ServiceWorkerRegistration
//!     │       ├── installing (CacheManager)
//!     │       ├── waiting    (CacheManager)
//!     │       └── active     (CacheManager)
//!     │
//!     ├── Clients (open pages)
//!     │
//!     └── CacheStore
//!             └── Cache "{prefix}-v{version}"
//!                     └── RequestKey → CacheEntry
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod container;
pub mod fetch;
pub mod push;
pub mod worker;

pub use cache::{Cache, CacheEntry, CacheStore, MemoryCacheStore, RequestKey};
pub use clients::{Client, Clients};
pub use container::{ServiceWorkerContainer, ServiceWorkerEvent, ServiceWorkerRegistration};
pub use fetch::{FetchEvent, FetchResponse, ResponseSource};
pub use push::{Notification, NotificationAction, PushEvent};
pub use worker::{ActivationReport, CacheManager};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SwError {
    #[error("Precache failed for {url}: {reason}")]
    Precache { url: String, reason: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<pulsewatch_common::PulseError> for SwError {
    fn from(e: pulsewatch_common::PulseError) -> Self {
        SwError::Config(e.to_string())
    }
}

impl From<pulsewatch_net::NetError> for SwError {
    fn from(e: pulsewatch_net::NetError) -> Self {
        SwError::Network(e.to_string())
    }
}

// ==================== Types ====================

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceWorkerState {
    /// Built, install not started.
    #[default]
    Parsed,
    /// Precaching the manifest.
    Installing,
    /// Precache complete, waiting for activation.
    Installed,
    /// Deleting stale buckets and claiming clients.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced or install failed.
    Redundant,
}

impl ServiceWorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceWorkerState::Parsed => "parsed",
            ServiceWorkerState::Installing => "installing",
            ServiceWorkerState::Installed => "installed",
            ServiceWorkerState::Activating => "activating",
            ServiceWorkerState::Activated => "activated",
            ServiceWorkerState::Redundant => "redundant",
        }
    }
}
