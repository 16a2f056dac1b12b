//! The cache manager: one worker version and the bucket it owns.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::try_join_all;
use http::StatusCode;
use pulsewatch_common::{retry_with_backoff, RetryConfig};
use pulsewatch_core::{CacheName, FallbackScope, OfflineConfig, PrecacheManifest};
use pulsewatch_net::{Fetcher, Request};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheStore, RequestKey};
use crate::clients::Clients;
use crate::fetch::{FetchEvent, FetchResponse};
use crate::push::{Notification, PushEvent};
use crate::{ServiceWorkerId, ServiceWorkerState, SwError};

/// Result of an activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Stale buckets removed.
    pub deleted: Vec<String>,
    /// Stale buckets that could not be removed, with the reason.
    pub failed: Vec<(String, String)>,
    /// Clients whose controller changed to this worker.
    pub claimed: Vec<String>,
}

/// A failed precache attempt and whether another attempt may succeed.
struct PrecacheFailure {
    error: SwError,
    transient: bool,
}

impl fmt::Display for PrecacheFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

/// Server-side and throttling statuses; other error statuses will not change on retry.
fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

/// One worker version.
pub struct CacheManager {
    id: ServiceWorkerId,
    config: OfflineConfig,
    origin: Url,
    cache_name: CacheName,
    manifest: PrecacheManifest,
    state: RwLock<ServiceWorkerState>,
    skip_waiting: AtomicBool,
    retry: RetryConfig,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<RwLock<Clients>>,
}

impl CacheManager {
    /// Build a worker for `config`. The config is validated here.
    pub fn new(
        config: OfflineConfig,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        clients: Arc<RwLock<Clients>>,
    ) -> Result<Self, SwError> {
        config.validate()?;
        let origin = config.origin_url()?;
        let manifest = config.manifest()?;
        let cache_name = config.cache_name();
        let retry = RetryConfig::with_attempts(config.precache_attempts);

        Ok(Self {
            id: ServiceWorkerId::new(),
            config,
            origin,
            cache_name,
            manifest,
            state: RwLock::new(ServiceWorkerState::Parsed),
            skip_waiting: AtomicBool::new(false),
            retry,
            store,
            fetcher,
            clients,
        })
    }

    /// Override the precache retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn cache_name(&self) -> &CacheName {
        &self.cache_name
    }

    pub fn manifest(&self) -> &PrecacheManifest {
        &self.manifest
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    /// Current state.
    pub async fn state(&self) -> ServiceWorkerState {
        *self.state.read().await
    }

    /// Whether install finished and asked to activate without waiting.
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::Acquire)
    }

    async fn set_state(&self, state: ServiceWorkerState) {
        *self.state.write().await = state;
        debug!(worker = self.id.raw(), cache = %self.cache_name, state = state.as_str(), "Worker state changed");
    }

    /// Move from `from` to `to`, failing if the worker is elsewhere.
    async fn transition(&self, from: ServiceWorkerState, to: ServiceWorkerState) -> Result<(), SwError> {
        let mut state = self.state.write().await;
        if *state != from {
            return Err(SwError::State(format!(
                "expected worker in state {}, found {}",
                from.as_str(),
                state.as_str()
            )));
        }
        *state = to;
        debug!(worker = self.id.raw(), cache = %self.cache_name, state = to.as_str(), "Worker state changed");
        Ok(())
    }

    /// Mark this worker as replaced or failed.
    pub async fn mark_redundant(&self) {
        self.set_state(ServiceWorkerState::Redundant).await;
    }

    // ==================== Install ====================

    /// Precache the manifest into the current bucket.
    ///
    /// Every entry is fetched before anything is written. If any entry fails
    /// the worker becomes redundant and the bucket is left untouched.
    pub async fn install(&self) -> Result<(), SwError> {
        self.transition(ServiceWorkerState::Parsed, ServiceWorkerState::Installing)
            .await?;
        info!(cache = %self.cache_name, entries = self.manifest.len(), "Precaching manifest");

        match self.precache().await {
            Ok(()) => {
                self.set_state(ServiceWorkerState::Installed).await;
                self.skip_waiting.store(true, Ordering::Release);
                info!(cache = %self.cache_name, "Install complete");
                Ok(())
            }
            Err(e) => {
                error!(cache = %self.cache_name, error = %e, "Install failed");
                self.mark_redundant().await;
                Err(e)
            }
        }
    }

    async fn precache(&self) -> Result<(), SwError> {
        let urls = self.manifest.resolve(&self.origin)?;
        let entries = try_join_all(urls.into_iter().map(|url| self.precache_entry(url))).await?;
        self.store.put_all(&self.cache_name.to_string(), entries).await
    }

    async fn precache_entry(&self, url: Url) -> Result<(RequestKey, CacheEntry), SwError> {
        retry_with_backoff(
            &self.retry,
            |failure: &PrecacheFailure| failure.transient,
            || {
                let url = url.clone();
                async move {
                    let key = RequestKey::get(&url);
                    let response = self
                        .fetcher
                        .fetch(Request::get(url.clone()))
                        .await
                        .map_err(|e| PrecacheFailure {
                            transient: e.is_transient(),
                            error: SwError::Precache {
                                url: url.to_string(),
                                reason: e.to_string(),
                            },
                        })?;
                    if !response.ok() {
                        return Err(PrecacheFailure {
                            transient: is_transient_status(response.status),
                            error: SwError::Precache {
                                url: url.to_string(),
                                reason: format!("status {}", response.status),
                            },
                        });
                    }
                    let entry = CacheEntry::from_response(&key, &response);
                    Ok((key, entry))
                }
            },
        )
        .await
        .map_err(|failure| failure.error)
    }

    // ==================== Activate ====================

    /// Delete every stale bucket, then claim all open clients.
    pub async fn activate(&self) -> Result<ActivationReport, SwError> {
        self.transition(ServiceWorkerState::Installed, ServiceWorkerState::Activating)
            .await?;
        let mut report = ActivationReport::default();

        let current = self.cache_name.to_string();
        let is_stale = move |name: &str| name != current;
        for (name, result) in self.store.delete_where(&is_stale).await {
            match result {
                Ok(_) => {
                    info!(cache = %name, "Deleted stale cache");
                    report.deleted.push(name);
                }
                Err(e) => {
                    warn!(cache = %name, error = %e, "Failed to delete stale cache");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        report.claimed = self.clients.write().await.claim(self.id);

        self.set_state(ServiceWorkerState::Activated).await;
        info!(
            cache = %self.cache_name,
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            claimed = report.claimed.len(),
            "Worker activated"
        );

        Ok(report)
    }

    // ==================== Fetch ====================

    /// Answer a fetch: cache first, then network with write-through.
    pub async fn handle_fetch(&self, event: FetchEvent) -> Result<FetchResponse, SwError> {
        let FetchEvent {
            request,
            is_navigation,
            ..
        } = event;

        let Some(key) = RequestKey::for_request(&request) else {
            debug!(url = %request.url, method = %request.method, "Passing write through to network");
            let response = self.fetcher.fetch(request).await?;
            return Ok(FetchResponse::from_network(response));
        };

        let bucket = self.cache_name.to_string();

        match self.store.match_entry(&bucket, &key).await {
            Ok(Some(entry)) => {
                debug!(key = %key, "Cache hit");
                return Ok(FetchResponse::from_cache(entry.to_response()));
            }
            Ok(None) => debug!(key = %key, "Cache miss"),
            Err(e) => warn!(key = %key, error = %e, "Cache lookup failed, treating as miss"),
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    let entry = CacheEntry::from_response(&key, &response);
                    if let Err(e) = self.store.put(&bucket, key.clone(), entry).await {
                        warn!(key = %key, error = %e, "Failed to cache network response");
                    }
                }
                Ok(FetchResponse::from_network(response))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Network fetch failed");
                if let Some(fallback) = self.fallback(is_navigation).await {
                    info!(key = %key, "Serving offline fallback");
                    return Ok(FetchResponse::fallback(fallback));
                }
                Err(e.into())
            }
        }
    }

    async fn fallback(&self, is_navigation: bool) -> Option<pulsewatch_net::Response> {
        let document = self.config.fallback.document.as_deref()?;
        if self.config.fallback.scope == FallbackScope::Navigations && !is_navigation {
            return None;
        }

        let url = self.origin.join(document).ok()?;
        let bucket = self.cache_name.to_string();
        match self.store.match_entry(&bucket, &RequestKey::get(&url)).await {
            Ok(entry) => entry.map(|e| e.to_response()),
            Err(e) => {
                warn!(document, error = %e, "Fallback lookup failed");
                None
            }
        }
    }

    // ==================== Push ====================

    /// Notification for a push message.
    pub fn push_notification(&self, event: &PushEvent) -> Notification {
        Notification::for_push(event, &self.config.notifications)
    }
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("id", &self.id)
            .field("cache_name", &self.cache_name.to_string())
            .field("origin", &self.origin.as_str())
            .finish_non_exhaustive()
    }
}
