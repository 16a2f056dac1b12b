//! Cache buckets and the store that owns them.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use pulsewatch_net::{Request, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

use crate::SwError;

/// Identity of a cacheable request: method plus absolute URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    method: Method,
    url: Url,
}

impl RequestKey {
    /// Key for a read request. Returns `None` for anything but GET and HEAD.
    pub fn for_request(request: &Request) -> Option<Self> {
        if !request.is_read() {
            return None;
        }
        Some(Self::new(request.method.clone(), &request.url))
    }

    /// GET key for a URL.
    pub fn get(url: &Url) -> Self {
        Self::new(Method::GET, url)
    }

    fn new(method: Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self { method, url }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A cached response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Final response URL, after any redirects.
    pub url: Url,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers in order; repeated names and non-UTF-8 values are kept.
    pub headers: Vec<(String, Bytes)>,

    /// Response body.
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Capture `response` as observed for `key`.
    pub fn from_response(key: &RequestKey, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    Bytes::copy_from_slice(value.as_bytes()),
                )
            })
            .collect();

        Self {
            url: response.url.clone(),
            method: key.method.to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body.clone(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild the response this entry was captured from.
    pub fn to_response(&self) -> Response {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_maybe_shared(value.clone()),
            ) {
                headers.append(name, value);
            }
        }

        Response {
            url: self.url.clone(),
            status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            headers,
            body: self.body.clone(),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A single named cache bucket.
#[derive(Debug, Default, Clone)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries.
    entries: HashMap<RequestKey, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, key: &RequestKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Store an entry, replacing any previous one for the same key.
    pub fn put(&mut self, key: RequestKey, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    /// Delete entry.
    pub fn delete(&mut self, key: &RequestKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// All keys.
    pub fn keys(&self) -> Vec<&RequestKey> {
        self.entries.keys().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Bucket storage seen by the worker.
///
/// Writes to a bucket that was never opened fail with [`SwError::NotFound`],
/// so a deleted bucket is never resurrected by a late write.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Open a bucket, creating it if it does not exist.
    async fn open(&self, name: &str) -> Result<(), SwError>;

    /// Check if a bucket exists.
    async fn has(&self, name: &str) -> bool;

    /// All bucket names.
    async fn names(&self) -> Vec<String>;

    /// Delete a bucket. `Ok(false)` if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool, SwError>;

    /// Look up a request in a bucket. A missing bucket is a miss.
    async fn match_entry(&self, name: &str, key: &RequestKey) -> Result<Option<CacheEntry>, SwError>;

    /// Store an entry in an existing bucket.
    async fn put(&self, name: &str, key: RequestKey, entry: CacheEntry) -> Result<(), SwError>;

    /// Open a bucket and store every entry as one step.
    async fn put_all(&self, name: &str, entries: Vec<(RequestKey, CacheEntry)>) -> Result<(), SwError>;

    /// Keys stored in a bucket.
    async fn keys(&self, name: &str) -> Result<Vec<RequestKey>, SwError>;

    /// Delete every bucket whose name satisfies `predicate`.
    ///
    /// Every matching bucket is attempted; one failure does not stop the rest.
    async fn delete_where(
        &self,
        predicate: &(dyn for<'n> Fn(&'n str) -> bool + Send + Sync),
    ) -> Vec<(String, Result<bool, SwError>)> {
        let mut results = Vec::new();
        for name in self.names().await {
            if predicate(&name) {
                let result = self.delete(&name).await;
                results.push((name, result));
            }
        }
        results
    }
}

/// In-process cache store.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    caches: RwLock<HashMap<String, Cache>>,
}

impl MemoryCacheStore {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of a bucket, for inspection.
    pub async fn snapshot(&self, name: &str) -> Option<Cache> {
        self.caches.read().await.get(name).cloned()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn open(&self, name: &str) -> Result<(), SwError> {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name));
        Ok(())
    }

    async fn has(&self, name: &str) -> bool {
        self.caches.read().await.contains_key(name)
    }

    async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn delete(&self, name: &str) -> Result<bool, SwError> {
        let removed = self.caches.write().await.remove(name).is_some();
        debug!(cache = name, removed, "Deleted cache");
        Ok(removed)
    }

    async fn match_entry(&self, name: &str, key: &RequestKey) -> Result<Option<CacheEntry>, SwError> {
        let caches = self.caches.read().await;
        Ok(caches
            .get(name)
            .and_then(|cache| cache.match_request(key))
            .cloned())
    }

    async fn put(&self, name: &str, key: RequestKey, entry: CacheEntry) -> Result<(), SwError> {
        let mut caches = self.caches.write().await;
        let cache = caches
            .get_mut(name)
            .ok_or_else(|| SwError::NotFound(format!("cache {name}")))?;
        trace!(cache = name, key = %key, "Cache put");
        cache.put(key, entry);
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: Vec<(RequestKey, CacheEntry)>) -> Result<(), SwError> {
        let mut caches = self.caches.write().await;
        let cache = caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name));
        for (key, entry) in entries {
            cache.put(key, entry);
        }
        Ok(())
    }

    async fn keys(&self, name: &str) -> Result<Vec<RequestKey>, SwError> {
        let caches = self.caches.read().await;
        let cache = caches
            .get(name)
            .ok_or_else(|| SwError::NotFound(format!("cache {name}")))?;
        Ok(cache.keys().into_iter().cloned().collect())
    }
}
