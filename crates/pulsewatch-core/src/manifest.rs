//! Precache manifest and cache bucket naming.

use std::fmt;

use pulsewatch_common::{PulseError, PulseResult};
use serde::{Deserialize, Serialize};
use url::Url;

/// Shell assets that must be cached before a worker version may activate.
pub const SHELL_ASSETS: [&str; 5] = [
    "/",
    "/index.html",
    "/manifest.webmanifest",
    "/icon-192x192.png",
    "/icon-512x512.png",
];

/// Version-tagged cache bucket name, rendered as `{prefix}-v{version}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheName {
    prefix: String,
    version: u32,
}

impl CacheName {
    /// Create a cache name.
    pub fn new(prefix: impl Into<String>, version: u32) -> Self {
        Self {
            prefix: prefix.into(),
            version,
        }
    }

    /// Parse a bucket name of the form `{prefix}-v{version}`.
    pub fn parse(name: &str) -> Option<Self> {
        let (prefix, version) = name.rsplit_once("-v")?;
        if prefix.is_empty() {
            return None;
        }
        let version = version.parse().ok()?;
        Some(Self::new(prefix, version))
    }

    /// Bucket name prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Bucket version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Whether `name` is exactly this bucket's full name.
    pub fn matches(&self, name: &str) -> bool {
        name == self.to_string()
    }
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-v{}", self.prefix, self.version)
    }
}

/// Ordered, de-duplicated list of origin-relative asset paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecacheManifest {
    entries: Vec<String>,
}

impl PrecacheManifest {
    /// Build a manifest, dropping duplicates while keeping first-seen order.
    pub fn new<I, S>(paths: I) -> PulseResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entries: Vec<String> = Vec::new();
        for path in paths {
            let path = path.into();
            if !path.starts_with('/') {
                return Err(PulseError::InvalidArgument(format!(
                    "precache entry '{path}' must be origin-relative"
                )));
            }
            if !entries.contains(&path) {
                entries.push(path);
            }
        }
        Ok(Self { entries })
    }

    /// The application shell manifest.
    pub fn shell() -> Self {
        Self {
            entries: SHELL_ASSETS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Append a path unless it is already listed.
    pub fn with_entry(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        if !self.entries.contains(&path) {
            self.entries.push(path);
        }
        self
    }

    /// Paths in manifest order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.iter().any(|e| e == path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve every entry against `origin`.
    pub fn resolve(&self, origin: &Url) -> PulseResult<Vec<Url>> {
        self.entries
            .iter()
            .map(|path| {
                origin.join(path).map_err(|e| {
                    PulseError::config_with_source(format!("cannot resolve '{path}'"), e)
                })
            })
            .collect()
    }
}

impl Default for PrecacheManifest {
    fn default() -> Self {
        Self::shell()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_name_display_and_parse() {
        let name = CacheName::new("heart-monitor", 3);
        assert_eq!(name.to_string(), "heart-monitor-v3");
        assert_eq!(CacheName::parse("heart-monitor-v3"), Some(name.clone()));
        assert!(name.matches("heart-monitor-v3"));
        assert!(!name.matches("heart-monitor-v2"));
        assert_eq!(CacheName::parse("v1"), None);
        assert_eq!(CacheName::parse("heart-monitor-vx"), None);
    }

    #[test]
    fn test_manifest_dedups_in_order() {
        let manifest = PrecacheManifest::new(["/", "/index.html", "/"]).unwrap();
        assert_eq!(manifest.paths().collect::<Vec<_>>(), vec!["/", "/index.html"]);
    }

    #[test]
    fn test_manifest_rejects_relative_paths() {
        assert!(PrecacheManifest::new(["index.html"]).is_err());
    }

    #[test]
    fn test_shell_manifest() {
        let manifest = PrecacheManifest::shell();
        assert_eq!(manifest.len(), 5);
        assert!(manifest.contains("/manifest.webmanifest"));
        assert_eq!(manifest.clone().with_entry("/index.html").len(), 5);
        assert_eq!(manifest.with_entry("/offline.html").len(), 6);
    }

    #[test]
    fn test_resolve_against_origin() {
        let origin = Url::parse("https://monitor.example/").unwrap();
        let urls = PrecacheManifest::shell().resolve(&origin).unwrap();
        assert_eq!(urls[0].as_str(), "https://monitor.example/");
        assert_eq!(urls[3].as_str(), "https://monitor.example/icon-192x192.png");
    }
}
