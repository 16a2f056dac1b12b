//! Pulsewatch Core Library
//!
//! This crate provides the configuration, the precache manifest, cache bucket
//! naming and the worker host contract shared by the page and worker sides of
//! the offline subsystem.

pub mod config;
pub mod host;
pub mod manifest;

pub use config::{Environment, FallbackConfig, FallbackScope, NotificationConfig, OfflineConfig};
pub use host::{HostError, RegistrationInfo, WorkerHost};
pub use manifest::{CacheName, PrecacheManifest};
