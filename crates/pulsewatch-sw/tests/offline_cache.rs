//! Cache manager and worker host behaviour against a scripted network.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};
use pulsewatch_common::RetryConfig;
use pulsewatch_core::{FallbackScope, HostError, OfflineConfig, PrecacheManifest, WorkerHost};
use pulsewatch_net::{Fetcher, NetError, Request, Response};
use pulsewatch_sw::{
    CacheEntry, CacheManager, CacheStore, Clients, FetchEvent, MemoryCacheStore, PushEvent,
    RequestKey, ResponseSource, ServiceWorkerContainer, ServiceWorkerEvent, ServiceWorkerState,
    SwError,
};
use tokio::sync::RwLock;
use url::Url;

const ORIGIN: &str = "https://monitor.example/";

// ==================== Scripted network ====================

/// Network double: fixed routes, an offline switch and a call log.
#[derive(Default)]
struct ScriptedFetcher {
    routes: Mutex<HashMap<String, (StatusCode, Bytes)>>,
    failing: Mutex<HashSet<String>>,
    offline: AtomicBool,
    calls: Mutex<Vec<(Method, String)>>,
}

impl ScriptedFetcher {
    fn shell() -> Arc<Self> {
        let fetcher = Self::default();
        for path in PrecacheManifest::shell().paths() {
            fetcher.route(path, StatusCode::OK, format!("asset {path}"));
        }
        Arc::new(fetcher)
    }

    fn route(&self, path: &str, status: StatusCode, body: impl Into<Bytes>) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.into()));
    }

    fn fail(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_string());
    }

    fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn calls_to(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, p)| p == path)
            .count()
    }

    fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        let path = request.url.path().to_string();
        self.calls
            .lock()
            .unwrap()
            .push((request.method.clone(), path.clone()));

        if self.offline.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&path) {
            return Err(NetError::RequestFailed(format!("{path}: connection refused")));
        }

        let route = self.routes.lock().unwrap().get(&path).cloned();
        Ok(match route {
            Some((status, body)) => Response::new(request.url, status, body),
            None => Response::new(request.url, StatusCode::NOT_FOUND, ""),
        })
    }
}

/// Store whose deletes of one bucket always fail.
struct StickyStore {
    inner: MemoryCacheStore,
    sticky: String,
}

#[async_trait]
impl CacheStore for StickyStore {
    async fn open(&self, name: &str) -> Result<(), SwError> {
        self.inner.open(name).await
    }

    async fn has(&self, name: &str) -> bool {
        self.inner.has(name).await
    }

    async fn names(&self) -> Vec<String> {
        self.inner.names().await
    }

    async fn delete(&self, name: &str) -> Result<bool, SwError> {
        if name == self.sticky {
            return Err(SwError::Cache(format!("{name} is locked")));
        }
        self.inner.delete(name).await
    }

    async fn match_entry(&self, name: &str, key: &RequestKey) -> Result<Option<CacheEntry>, SwError> {
        self.inner.match_entry(name, key).await
    }

    async fn put(&self, name: &str, key: RequestKey, entry: CacheEntry) -> Result<(), SwError> {
        self.inner.put(name, key, entry).await
    }

    async fn put_all(&self, name: &str, entries: Vec<(RequestKey, CacheEntry)>) -> Result<(), SwError> {
        self.inner.put_all(name, entries).await
    }

    async fn keys(&self, name: &str) -> Result<Vec<RequestKey>, SwError> {
        self.inner.keys(name).await
    }
}

// ==================== Helpers ====================

fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

fn config(version: u32) -> OfflineConfig {
    let mut config = OfflineConfig::default();
    config.origin = ORIGIN.to_string();
    config.cache.version = version;
    config
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter: false,
        ..RetryConfig::with_attempts(2)
    }
}

fn manager(
    config: OfflineConfig,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<ScriptedFetcher>,
) -> CacheManager {
    CacheManager::new(config, store, fetcher, Arc::new(RwLock::new(Clients::new())))
        .unwrap()
        .with_retry(fast_retry())
}

async fn active_manager(store: Arc<MemoryCacheStore>, fetcher: Arc<ScriptedFetcher>) -> CacheManager {
    let worker = manager(config(1), store, fetcher);
    worker.install().await.unwrap();
    worker.activate().await.unwrap();
    worker
}

async fn bucket_paths(store: &MemoryCacheStore, name: &str) -> Vec<String> {
    let mut paths: Vec<String> = store
        .keys(name)
        .await
        .unwrap()
        .iter()
        .map(|k| k.url().path().to_string())
        .collect();
    paths.sort();
    paths
}

fn sorted(paths: &[&str]) -> Vec<String> {
    let mut paths: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
    paths.sort();
    paths
}

// ==================== Install ====================

#[tokio::test]
async fn test_install_precaches_shell() {
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = ScriptedFetcher::shell();
    let worker = manager(config(1), store.clone(), fetcher.clone());

    worker.install().await.unwrap();

    assert_eq!(worker.state().await, ServiceWorkerState::Installed);
    assert!(worker.skip_waiting_requested());
    assert_eq!(
        bucket_paths(&store, "heart-monitor-v1").await,
        sorted(&[
            "/",
            "/index.html",
            "/manifest.webmanifest",
            "/icon-192x192.png",
            "/icon-512x512.png",
        ])
    );
    assert_eq!(fetcher.call_count(), 5);
}

#[tokio::test]
async fn test_reinstall_into_populated_bucket_changes_nothing() {
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = ScriptedFetcher::shell();

    manager(config(1), store.clone(), fetcher.clone())
        .install()
        .await
        .unwrap();
    let before = bucket_paths(&store, "heart-monitor-v1").await;
    let index = RequestKey::get(&url("/index.html"));
    let body_before = store
        .match_entry("heart-monitor-v1", &index)
        .await
        .unwrap()
        .unwrap()
        .body;

    manager(config(1), store.clone(), fetcher.clone())
        .install()
        .await
        .unwrap();

    assert_eq!(bucket_paths(&store, "heart-monitor-v1").await, before);
    let body_after = store
        .match_entry("heart-monitor-v1", &index)
        .await
        .unwrap()
        .unwrap()
        .body;
    assert_eq!(body_before, body_after);
    assert_eq!(store.names().await, vec!["heart-monitor-v1".to_string()]);
}

#[tokio::test]
async fn test_failed_precache_writes_nothing() {
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = ScriptedFetcher::shell();
    fetcher.fail("/icon-512x512.png");

    let worker = manager(config(1), store.clone(), fetcher.clone());
    let err = worker.install().await.unwrap_err();

    assert!(matches!(err, SwError::Precache { ref url, .. } if url.ends_with("/icon-512x512.png")));
    assert_eq!(worker.state().await, ServiceWorkerState::Redundant);
    assert!(!worker.skip_waiting_requested());
    assert!(!store.has("heart-monitor-v1").await);
    // Retried once before giving up.
    assert_eq!(fetcher.calls_to("/icon-512x512.png"), 2);
}

#[tokio::test]
async fn test_precache_rejects_error_status() {
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = ScriptedFetcher::shell();
    fetcher.route("/manifest.webmanifest", StatusCode::INTERNAL_SERVER_ERROR, "");

    let worker = manager(config(1), store.clone(), fetcher.clone());
    let err = worker.install().await.unwrap_err();

    assert!(matches!(err, SwError::Precache { ref reason, .. } if reason.contains("500")));
    assert!(store.names().await.is_empty());
    // Server errors are worth another attempt.
    assert_eq!(fetcher.calls_to("/manifest.webmanifest"), 2);
}

#[tokio::test]
async fn test_missing_asset_is_not_retried() {
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = ScriptedFetcher::shell();
    let mut config = config(1);
    config.precache.push("/charts.js".to_string());

    let worker = manager(config, store.clone(), fetcher.clone());
    let err = worker.install().await.unwrap_err();

    assert!(matches!(err, SwError::Precache { ref reason, .. } if reason.contains("404")));
    assert_eq!(fetcher.calls_to("/charts.js"), 1);
    assert!(store.names().await.is_empty());
}

#[tokio::test]
async fn test_precache_recovers_from_transient_failure() {
    struct FlakyOnce {
        inner: Arc<ScriptedFetcher>,
        tripped: AtomicBool,
    }

    #[async_trait]
    impl Fetcher for FlakyOnce {
        async fn fetch(&self, request: Request) -> Result<Response, NetError> {
            if request.url.path() == "/" && !self.tripped.swap(true, Ordering::SeqCst) {
                return Err(NetError::Timeout(Duration::from_secs(30)));
            }
            self.inner.fetch(request).await
        }
    }

    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = Arc::new(FlakyOnce {
        inner: ScriptedFetcher::shell(),
        tripped: AtomicBool::new(false),
    });
    let worker = CacheManager::new(
        config(1),
        store.clone(),
        fetcher,
        Arc::new(RwLock::new(Clients::new())),
    )
    .unwrap()
    .with_retry(fast_retry());

    worker.install().await.unwrap();
    assert_eq!(store.keys("heart-monitor-v1").await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_install_twice_is_rejected() {
    let worker = manager(config(1), Arc::new(MemoryCacheStore::new()), ScriptedFetcher::shell());
    worker.install().await.unwrap();
    assert!(matches!(worker.install().await, Err(SwError::State(_))));
}

// ==================== Activate ====================

#[tokio::test]
async fn test_activation_deletes_stale_versions() {
    let store = Arc::new(MemoryCacheStore::new());
    store.open("heart-monitor-v1").await.unwrap();
    store.open("heart-monitor-v2").await.unwrap();

    let worker = manager(config(3), store.clone(), ScriptedFetcher::shell());
    worker.install().await.unwrap();
    let report = worker.activate().await.unwrap();

    assert_eq!(store.names().await, vec!["heart-monitor-v3".to_string()]);
    assert_eq!(
        report.deleted,
        vec!["heart-monitor-v1".to_string(), "heart-monitor-v2".to_string()]
    );
    assert!(report.failed.is_empty());
    assert_eq!(worker.state().await, ServiceWorkerState::Activated);
}

#[tokio::test]
async fn test_activation_removes_every_non_current_bucket() {
    let store = Arc::new(MemoryCacheStore::new());
    for name in ["v1", "v2", "scratch", "heart-monitor-v7"] {
        store.open(name).await.unwrap();
    }

    let worker = manager(config(3), store.clone(), ScriptedFetcher::shell());
    worker.install().await.unwrap();
    worker.activate().await.unwrap();

    assert_eq!(store.names().await, vec!["heart-monitor-v3".to_string()]);
}

#[tokio::test]
async fn test_activation_continues_past_failed_delete() {
    let store = Arc::new(StickyStore {
        inner: MemoryCacheStore::new(),
        sticky: "heart-monitor-v1".to_string(),
    });
    store.open("heart-monitor-v1").await.unwrap();
    store.open("heart-monitor-v2").await.unwrap();

    let worker = CacheManager::new(
        config(3),
        store.clone(),
        ScriptedFetcher::shell(),
        Arc::new(RwLock::new(Clients::new())),
    )
    .unwrap();
    worker.install().await.unwrap();
    let report = worker.activate().await.unwrap();

    assert_eq!(report.deleted, vec!["heart-monitor-v2".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "heart-monitor-v1");
    assert_eq!(worker.state().await, ServiceWorkerState::Activated);
    assert_eq!(
        store.names().await,
        vec!["heart-monitor-v1".to_string(), "heart-monitor-v3".to_string()]
    );
}

#[tokio::test]
async fn test_activation_claims_open_pages() {
    let clients = Arc::new(RwLock::new(Clients::new()));
    let page = clients.write().await.open_window(ORIGIN).unwrap();

    let worker = CacheManager::new(
        config(1),
        Arc::new(MemoryCacheStore::new()),
        ScriptedFetcher::shell(),
        clients.clone(),
    )
    .unwrap();
    worker.install().await.unwrap();
    let report = worker.activate().await.unwrap();

    assert_eq!(report.claimed, vec![page.id.clone()]);
    assert_eq!(
        clients.read().await.get(&page.id).unwrap().controller,
        Some(worker.id())
    );
}

#[tokio::test]
async fn test_activate_before_install_is_rejected() {
    let worker = manager(config(1), Arc::new(MemoryCacheStore::new()), ScriptedFetcher::shell());
    assert!(matches!(worker.activate().await, Err(SwError::State(_))));
    assert_eq!(worker.state().await, ServiceWorkerState::Parsed);
}

// ==================== Fetch ====================

#[tokio::test]
async fn test_cached_read_skips_network() {
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = ScriptedFetcher::shell();
    let worker = active_manager(store, fetcher.clone()).await;
    fetcher.reset_calls();

    let response = worker
        .handle_fetch(FetchEvent::navigation(Request::get(url("/index.html"))))
        .await
        .unwrap();

    assert_eq!(response.source, ResponseSource::Cache);
    assert_eq!(response.response.text().unwrap(), "asset /index.html");
    assert_eq!(fetcher.call_count(), 0);
}

#[tokio::test]
async fn test_fragment_does_not_defeat_cache() {
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = ScriptedFetcher::shell();
    let worker = active_manager(store, fetcher.clone()).await;
    fetcher.reset_calls();

    let response = worker
        .handle_fetch(FetchEvent::new(Request::get(url("/index.html#readings"))))
        .await
        .unwrap();

    assert!(response.is_from_cache());
    assert_eq!(fetcher.call_count(), 0);
}

#[tokio::test]
async fn test_miss_writes_through() {
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = ScriptedFetcher::shell();
    fetcher.route("/api/readings", StatusCode::OK, r#"{"hr":72}"#);
    let worker = active_manager(store.clone(), fetcher.clone()).await;
    fetcher.reset_calls();

    let first = worker
        .handle_fetch(FetchEvent::new(Request::get(url("/api/readings"))))
        .await
        .unwrap();
    assert_eq!(first.source, ResponseSource::Network);
    assert_eq!(first.response.text().unwrap(), r#"{"hr":72}"#);
    assert_eq!(fetcher.call_count(), 1);

    let second = worker
        .handle_fetch(FetchEvent::new(Request::get(url("/api/readings"))))
        .await
        .unwrap();
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.response, first.response);
    assert_eq!(fetcher.call_count(), 1);
}

#[tokio::test]
async fn test_write_through_copy_matches_live_response() {
    /// Serves the shell, and `/api/readings` as a redirect to `/api/v2/readings`
    /// carrying paging links.
    struct PagedApi {
        shell: Arc<ScriptedFetcher>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl Fetcher for PagedApi {
        async fn fetch(&self, request: Request) -> Result<Response, NetError> {
            if request.url.path() != "/api/readings" {
                return self.shell.fetch(request).await;
            }
            *self.calls.lock().unwrap() += 1;
            let mut response = Response::new(url("/api/v2/readings"), StatusCode::OK, "[72,74]");
            response.headers.append(
                http::header::LINK,
                http::HeaderValue::from_static("</api/v2/readings?page=2>; rel=\"next\""),
            );
            response.headers.append(
                http::header::LINK,
                http::HeaderValue::from_static("</api/v2/readings?page=5>; rel=\"last\""),
            );
            response.headers.append(
                http::header::VARY,
                http::HeaderValue::from_bytes(b"x-ward-\xa7").unwrap(),
            );
            Ok(response)
        }
    }

    let fetcher = Arc::new(PagedApi {
        shell: ScriptedFetcher::shell(),
        calls: Mutex::new(0),
    });
    let worker = CacheManager::new(
        config(1),
        Arc::new(MemoryCacheStore::new()),
        fetcher.clone(),
        Arc::new(RwLock::new(Clients::new())),
    )
    .unwrap();
    worker.install().await.unwrap();
    worker.activate().await.unwrap();

    let live = worker
        .handle_fetch(FetchEvent::new(Request::get(url("/api/readings"))))
        .await
        .unwrap();
    let cached = worker
        .handle_fetch(FetchEvent::new(Request::get(url("/api/readings"))))
        .await
        .unwrap();

    assert_eq!(live.source, ResponseSource::Network);
    assert_eq!(cached.source, ResponseSource::Cache);
    assert_eq!(*fetcher.calls.lock().unwrap(), 1);
    assert_eq!(cached.response.url, url("/api/v2/readings"));
    assert_eq!(
        cached.response.headers.get_all(http::header::LINK).iter().count(),
        2
    );
    assert_eq!(cached.response, live.response);
}

#[tokio::test]
async fn test_error_status_is_not_cached() {
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = ScriptedFetcher::shell();
    let worker = active_manager(store.clone(), fetcher.clone()).await;

    let response = worker
        .handle_fetch(FetchEvent::new(Request::get(url("/api/missing"))))
        .await
        .unwrap();

    assert_eq!(response.response.status, StatusCode::NOT_FOUND);
    let key = RequestKey::get(&url("/api/missing"));
    assert!(store
        .match_entry("heart-monitor-v1", &key)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_writes_bypass_cache() {
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = ScriptedFetcher::shell();
    fetcher.route("/api/readings", StatusCode::CREATED, r#"{"saved":true}"#);
    let worker = active_manager(store.clone(), fetcher.clone()).await;
    fetcher.reset_calls();

    for _ in 0..2 {
        let response = worker
            .handle_fetch(FetchEvent::new(Request::post(url("/api/readings"), r#"{"hr":72}"#)))
            .await
            .unwrap();
        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(response.response.status, StatusCode::CREATED);
    }

    assert_eq!(fetcher.call_count(), 2);
    assert_eq!(bucket_paths(&store, "heart-monitor-v1").await.len(), 5);
    let key = RequestKey::get(&url("/api/readings"));
    assert!(store
        .match_entry("heart-monitor-v1", &key)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_failed_write_is_not_replaced_by_fallback() {
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = ScriptedFetcher::shell();
    let worker = active_manager(store.clone(), fetcher.clone()).await;
    fetcher.set_offline(true);

    let err = worker
        .handle_fetch(FetchEvent::navigation(Request::post(url("/api/readings"), "{}")))
        .await
        .unwrap_err();

    assert!(matches!(err, SwError::Network(_)));
    assert_eq!(bucket_paths(&store, "heart-monitor-v1").await.len(), 5);
}

#[tokio::test]
async fn test_offline_miss_serves_fallback() {
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = ScriptedFetcher::shell();
    let worker = active_manager(store, fetcher.clone()).await;
    fetcher.set_offline(true);

    let response = worker
        .handle_fetch(FetchEvent::new(Request::get(url("/history"))))
        .await
        .unwrap();

    assert_eq!(response.source, ResponseSource::Fallback);
    assert_eq!(response.response.text().unwrap(), "asset /index.html");
}

#[tokio::test]
async fn test_navigation_only_fallback() {
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = ScriptedFetcher::shell();
    let mut config = config(1);
    config.fallback.scope = FallbackScope::Navigations;
    let worker = manager(config, store, fetcher.clone());
    worker.install().await.unwrap();
    worker.activate().await.unwrap();
    fetcher.set_offline(true);

    let subresource = worker
        .handle_fetch(FetchEvent::new(Request::get(url("/api/readings"))))
        .await;
    assert!(matches!(subresource, Err(SwError::Network(_))));

    let navigation = worker
        .handle_fetch(FetchEvent::navigation(Request::get(url("/history"))))
        .await
        .unwrap();
    assert_eq!(navigation.source, ResponseSource::Fallback);
}

#[tokio::test]
async fn test_offline_miss_without_fallback_fails() {
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = ScriptedFetcher::shell();
    let mut config = config(1);
    config.fallback.document = None;
    let worker = manager(config, store, fetcher.clone());
    worker.install().await.unwrap();
    worker.activate().await.unwrap();
    fetcher.set_offline(true);

    let err = worker
        .handle_fetch(FetchEvent::new(Request::get(url("/api/readings"))))
        .await
        .unwrap_err();
    assert!(matches!(err, SwError::Network(_)));

    // Cached reads still work offline.
    let cached = worker
        .handle_fetch(FetchEvent::new(Request::get(url("/"))))
        .await
        .unwrap();
    assert!(cached.is_from_cache());
}

#[tokio::test]
async fn test_concurrent_reads_share_bucket() {
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = ScriptedFetcher::shell();
    for i in 0..8 {
        fetcher.route(&format!("/api/readings/{i}"), StatusCode::OK, format!("{i}"));
    }
    let worker = Arc::new(active_manager(store.clone(), fetcher.clone()).await);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let worker = worker.clone();
            tokio::spawn(async move {
                worker
                    .handle_fetch(FetchEvent::new(Request::get(url(&format!("/api/readings/{i}")))))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(store.keys("heart-monitor-v1").await.unwrap().len(), 13);
}

// ==================== Push ====================

#[tokio::test]
async fn test_push_notification_uses_config() {
    let mut config = config(1);
    config.notifications.title = "Ward 4 Monitor".to_string();
    let worker = manager(config, Arc::new(MemoryCacheStore::new()), ScriptedFetcher::shell());

    let notification = worker.push_notification(&PushEvent::new("SpO2 below 90%"));
    assert_eq!(notification.title, "Ward 4 Monitor");
    assert_eq!(notification.body, "SpO2 below 90%");
}

// ==================== Worker host ====================

async fn container(
    fetcher: Arc<ScriptedFetcher>,
) -> (
    ServiceWorkerContainer,
    tokio::sync::mpsc::UnboundedReceiver<ServiceWorkerEvent>,
    Arc<MemoryCacheStore>,
) {
    let store = Arc::new(MemoryCacheStore::new());
    let (container, rx) = ServiceWorkerContainer::new(store.clone(), fetcher);
    (container.with_retry(fast_retry()), rx, store)
}

fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ServiceWorkerEvent>) -> Vec<ServiceWorkerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_register_installs_and_activates() {
    let fetcher = ScriptedFetcher::shell();
    let (container, mut rx, store) = container(fetcher).await;
    let page = container.clients().write().await.open_window(ORIGIN).unwrap();
    container.deploy("/sw.js", config(1)).await.unwrap();

    let info = container.register("/sw.js").await.unwrap();

    assert_eq!(info.scope, "/");
    assert_eq!(info.cache_name, "heart-monitor-v1");
    let active = container.active("/").await.unwrap();
    assert_eq!(active.state().await, ServiceWorkerState::Activated);
    assert!(store.has("heart-monitor-v1").await);

    let states: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            ServiceWorkerEvent::StateChange { new_state, .. } => Some(new_state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            ServiceWorkerState::Installing,
            ServiceWorkerState::Installed,
            ServiceWorkerState::Activating,
            ServiceWorkerState::Activated,
        ]
    );
    assert_eq!(
        container.clients().read().await.get(&page.id).unwrap().controller,
        Some(active.id())
    );
}

#[tokio::test]
async fn test_upgrade_replaces_bucket() {
    let fetcher = ScriptedFetcher::shell();
    let (container, _rx, store) = container(fetcher).await;
    container.deploy("/sw.js", config(1)).await.unwrap();
    container.register_script("/sw.js").await.unwrap();
    let v1 = container.active("/").await.unwrap();

    container.deploy("/sw.js", config(2)).await.unwrap();
    let info = container.register_script("/sw.js").await.unwrap();

    assert_eq!(info.cache_name, "heart-monitor-v2");
    assert_eq!(store.names().await, vec!["heart-monitor-v2".to_string()]);
    assert_eq!(v1.state().await, ServiceWorkerState::Redundant);
}

#[tokio::test]
async fn test_failed_upgrade_keeps_old_version_serving() {
    let fetcher = ScriptedFetcher::shell();
    let (container, _rx, store) = container(fetcher.clone()).await;
    container.deploy("/sw.js", config(1)).await.unwrap();
    container.register_script("/sw.js").await.unwrap();

    let mut next = config(2);
    next.precache.push("/charts.js".to_string());
    container.deploy("/sw.js", next).await.unwrap();

    let err = container.register("/sw.js").await.unwrap_err();
    assert!(matches!(err, HostError::InstallFailed(_)));

    let active = container.active("/").await.unwrap();
    assert_eq!(active.cache_name().to_string(), "heart-monitor-v1");
    assert_eq!(active.state().await, ServiceWorkerState::Activated);
    assert_eq!(store.names().await, vec!["heart-monitor-v1".to_string()]);

    fetcher.set_offline(true);
    let response = container
        .handle_fetch(FetchEvent::new(Request::get(url("/manifest.webmanifest"))))
        .await
        .unwrap();
    assert!(response.is_from_cache());
}

#[tokio::test]
async fn test_register_unknown_script() {
    let (container, _rx, _store) = container(ScriptedFetcher::shell()).await;
    let err = container.register("/missing.js").await.unwrap_err();
    assert!(matches!(err, HostError::ScriptNotFound(_)));
}

#[tokio::test]
async fn test_uncontrolled_fetch_goes_to_network() {
    let fetcher = ScriptedFetcher::shell();
    let (container, _rx, store) = container(fetcher.clone()).await;

    let response = container
        .handle_fetch(FetchEvent::new(Request::get(url("/index.html"))))
        .await
        .unwrap();

    assert_eq!(response.source, ResponseSource::Network);
    assert_eq!(fetcher.call_count(), 1);
    assert!(store.names().await.is_empty());
}

#[tokio::test]
async fn test_page_opened_after_activation_bypasses_worker() {
    let fetcher = ScriptedFetcher::shell();
    let (container, _rx, _store) = container(fetcher.clone()).await;
    container.deploy("/sw.js", config(1)).await.unwrap();
    container.register_script("/sw.js").await.unwrap();
    let late_page = container.clients().write().await.open_window(ORIGIN).unwrap();
    fetcher.reset_calls();

    let from_late_page = container
        .handle_fetch(FetchEvent::new(Request::get(url("/index.html"))).with_client(&late_page.id))
        .await
        .unwrap();
    assert_eq!(from_late_page.source, ResponseSource::Network);
    assert_eq!(fetcher.call_count(), 1);

    // Its next navigation is handled by the worker.
    let navigation = container
        .handle_fetch(FetchEvent::navigation(Request::get(url("/index.html"))).with_client(&late_page.id))
        .await
        .unwrap();
    assert!(navigation.is_from_cache());
    assert_eq!(fetcher.call_count(), 1);
}

#[tokio::test]
async fn test_push_emits_notification() {
    let (container, mut rx, _store) = container(ScriptedFetcher::shell()).await;
    container.deploy("/sw.js", config(1)).await.unwrap();
    container.register_script("/sw.js").await.unwrap();
    drain(&mut rx);

    let notification = container
        .handle_push("/", PushEvent::new("Irregular rhythm detected"))
        .await
        .unwrap();

    let events = drain(&mut rx);
    assert!(matches!(
        events.as_slice(),
        [ServiceWorkerEvent::ShowNotification(n)] if *n == notification
    ));
    assert_eq!(notification.body, "Irregular rhythm detected");
}

#[tokio::test]
async fn test_unregister() {
    let (container, _rx, store) = container(ScriptedFetcher::shell()).await;
    container.deploy("/sw.js", config(1)).await.unwrap();
    container.register_script("/sw.js").await.unwrap();
    let worker = container.active("/").await.unwrap();

    assert!(container.unregister("/").await.unwrap());
    assert!(!container.unregister("/").await.unwrap());
    assert!(container.active("/").await.is_none());
    assert_eq!(worker.state().await, ServiceWorkerState::Redundant);
    // Buckets outlive the registration.
    assert!(store.has("heart-monitor-v1").await);
}
