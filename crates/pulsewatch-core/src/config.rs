//! Offline subsystem configuration

use pulsewatch_common::{PulseError, PulseResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;
use url::Url;

use crate::manifest::{CacheName, PrecacheManifest, SHELL_ASSETS};

/// Offline subsystem configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Origin every precache path is resolved against
    pub origin: String,

    /// Cache bucket naming
    pub cache: CacheConfig,

    /// Origin-relative assets fetched on install
    pub precache: Vec<String>,

    /// Offline fallback document
    pub fallback: FallbackConfig,

    /// Attempts per precache entry before install fails
    pub precache_attempts: u32,

    /// Worker script path registered by the page
    pub worker_script: String,

    /// Deployment environment
    pub environment: Environment,

    /// Push notification presentation
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Stable bucket name prefix
    pub prefix: String,

    /// Bucket version, bumped on every deploy that changes cached assets
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Document served when a read misses the cache and the network is down
    pub document: Option<String>,

    /// Which reads may receive the fallback document
    pub scope: FallbackScope,
}

/// Requests eligible for the offline fallback document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackScope {
    /// Any read request.
    #[default]
    AllReads,
    /// Only top-level navigations.
    Navigations,
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Notification title
    pub title: String,

    /// Body used when a push message carries no payload
    pub default_body: String,

    /// Icon and badge asset
    pub icon: String,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:8080/".to_string(),
            cache: CacheConfig::default(),
            precache: SHELL_ASSETS.iter().map(|s| s.to_string()).collect(),
            fallback: FallbackConfig::default(),
            precache_attempts: 3,
            worker_script: "/sw.js".to_string(),
            environment: Environment::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: "heart-monitor".to_string(),
            version: 1,
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            // The app shell is already precached
            document: Some("/index.html".to_string()),
            scope: FallbackScope::AllReads,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: "Heart Monitor System".to_string(),
            default_body: "New health alert".to_string(),
            icon: "/icon-192x192.png".to_string(),
        }
    }
}

impl OfflineConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> PulseResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "Loaded offline config");
        Self::from_json_str(&raw)
    }

    /// Parse and validate a JSON config document.
    pub fn from_json_str(raw: &str) -> PulseResult<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| PulseError::config_with_source("malformed offline config", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the worker relies on.
    pub fn validate(&self) -> PulseResult<()> {
        self.origin_url()?;

        if self.cache.prefix.is_empty() {
            return Err(PulseError::config("cache prefix must not be empty"));
        }
        if self.cache.version == 0 {
            return Err(PulseError::config("cache version starts at 1"));
        }
        if self.precache_attempts == 0 {
            return Err(PulseError::config("precache_attempts must be at least 1"));
        }
        if !self.worker_script.starts_with('/') {
            return Err(PulseError::config(format!(
                "worker script '{}' must be origin-relative",
                self.worker_script
            )));
        }

        for (i, path) in self.precache.iter().enumerate() {
            if !path.starts_with('/') {
                return Err(PulseError::config(format!(
                    "precache entry '{path}' must be origin-relative"
                )));
            }
            if self.precache[..i].contains(path) {
                return Err(PulseError::config(format!(
                    "duplicate precache entry '{path}'"
                )));
            }
        }

        if let Some(ref document) = self.fallback.document {
            if !document.starts_with('/') {
                return Err(PulseError::config(format!(
                    "fallback document '{document}' must be origin-relative"
                )));
            }
        }

        Ok(())
    }

    /// Parsed origin.
    pub fn origin_url(&self) -> PulseResult<Url> {
        Url::parse(&self.origin)
            .map_err(|e| PulseError::config_with_source(format!("invalid origin '{}'", self.origin), e))
    }

    /// Name of the bucket this configuration's worker owns.
    pub fn cache_name(&self) -> CacheName {
        CacheName::new(self.cache.prefix.clone(), self.cache.version)
    }

    /// Precache manifest; the fallback document is always part of it.
    pub fn manifest(&self) -> PulseResult<PrecacheManifest> {
        let manifest = PrecacheManifest::new(self.precache.iter().cloned())?;
        Ok(match self.fallback.document {
            Some(ref document) => manifest.with_entry(document.clone()),
            None => manifest,
        })
    }

    /// Whether the page should register the worker at all.
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}
