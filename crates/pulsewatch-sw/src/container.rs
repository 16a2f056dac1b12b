//! The worker host: deploys scripts, runs registrations and routes events.

use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use pulsewatch_common::RetryConfig;
use pulsewatch_core::{HostError, OfflineConfig, RegistrationInfo, WorkerHost};
use pulsewatch_net::Fetcher;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{error, info, warn};

use crate::cache::CacheStore;
use crate::clients::Clients;
use crate::fetch::{FetchEvent, FetchResponse};
use crate::push::{Notification, PushEvent};
use crate::worker::{ActivationReport, CacheManager};
use crate::{ServiceWorkerId, ServiceWorkerState, SwError};

// ==================== Registration ====================

/// A service worker registration.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope path.
    pub scope: String,

    /// Script path.
    pub script: String,

    /// Installing worker.
    pub installing: Option<Arc<CacheManager>>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<Arc<CacheManager>>,

    /// Active worker.
    pub active: Option<Arc<CacheManager>>,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            script: script.into(),
            installing: None,
            waiting: None,
            active: None,
        }
    }
}

/// Scope for a script: the directory it lives in.
fn scope_for(script_path: &str) -> String {
    match script_path.rsplit_once('/') {
        Some((dir, _)) => format!("{dir}/"),
        None => "/".to_string(),
    }
}

// ==================== Events ====================

/// Service worker events.
#[derive(Debug, Clone)]
pub enum ServiceWorkerEvent {
    /// State changed.
    StateChange {
        registration_scope: String,
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// Update found.
    UpdateFound { registration_scope: String },
    /// Controller changed.
    ControllerChange {
        client_id: String,
        worker_id: ServiceWorkerId,
    },
    /// Notification requested by a push message.
    ShowNotification(Notification),
}

// ==================== Container ====================

/// Worker host for one origin.
pub struct ServiceWorkerContainer {
    /// Deployed scripts, by path.
    scripts: RwLock<HashMap<String, OfflineConfig>>,

    /// Registrations by scope.
    registrations: RwLock<HashMap<String, ServiceWorkerRegistration>>,

    /// Serializes register/unregister jobs.
    jobs: Mutex<()>,

    /// Bucket storage.
    store: Arc<dyn CacheStore>,

    /// Network.
    fetcher: Arc<dyn Fetcher>,

    /// Clients.
    clients: Arc<RwLock<Clients>>,

    /// Precache retry override for every worker built here.
    retry: Option<RetryConfig>,

    /// Event sender for state changes.
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a new container.
    pub fn new(
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                scripts: RwLock::new(HashMap::new()),
                registrations: RwLock::new(HashMap::new()),
                jobs: Mutex::new(()),
                store,
                fetcher,
                clients: Arc::new(RwLock::new(Clients::new())),
                retry: None,
                event_tx,
            },
            event_rx,
        )
    }

    /// Override the precache retry policy of every worker built here.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Clients.
    pub fn clients(&self) -> Arc<RwLock<Clients>> {
        Arc::clone(&self.clients)
    }

    /// Bucket storage.
    pub fn store(&self) -> Arc<dyn CacheStore> {
        Arc::clone(&self.store)
    }

    /// Publish a worker script. A later registration of `script_path` builds
    /// its worker from `config`.
    pub async fn deploy(&self, script_path: &str, config: OfflineConfig) -> Result<(), SwError> {
        config.validate()?;
        info!(script = script_path, cache = %config.cache_name(), "Deployed worker script");
        self.scripts
            .write()
            .await
            .insert(script_path.to_string(), config);
        Ok(())
    }

    /// Register (or update) the worker at `script_path`.
    ///
    /// The new worker is installed and, on success, activated immediately.
    /// On failure the previously active worker keeps serving.
    pub async fn register_script(&self, script_path: &str) -> Result<RegistrationInfo, SwError> {
        let _job = self.jobs.lock().await;

        let config = self
            .scripts
            .read()
            .await
            .get(script_path)
            .cloned()
            .ok_or_else(|| SwError::NotFound(format!("script {script_path}")))?;

        let scope = scope_for(script_path);
        let mut worker = CacheManager::new(
            config,
            Arc::clone(&self.store),
            Arc::clone(&self.fetcher),
            Arc::clone(&self.clients),
        )?;
        if let Some(ref retry) = self.retry {
            worker = worker.with_retry(retry.clone());
        }
        let worker = Arc::new(worker);

        {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .entry(scope.clone())
                .or_insert_with(|| ServiceWorkerRegistration::new(scope.clone(), script_path));
            registration.script = script_path.to_string();
            registration.installing = Some(Arc::clone(&worker));
        }
        self.emit(ServiceWorkerEvent::UpdateFound {
            registration_scope: scope.clone(),
        });
        self.emit_state(&scope, &worker, ServiceWorkerState::Installing);

        if let Err(e) = worker.install().await {
            self.clear_installing(&scope, &worker).await;
            self.emit_state(&scope, &worker, ServiceWorkerState::Redundant);
            return Err(SwError::RegistrationFailed(e.to_string()));
        }

        {
            let mut registrations = self.registrations.write().await;
            if let Some(registration) = registrations.get_mut(&scope) {
                registration.installing = None;
                registration.waiting = Some(Arc::clone(&worker));
            }
        }
        self.emit_state(&scope, &worker, ServiceWorkerState::Installed);

        if worker.skip_waiting_requested() {
            self.activate_waiting(&scope).await?;
        }

        Ok(RegistrationInfo {
            scope,
            script: script_path.to_string(),
            cache_name: worker.cache_name().to_string(),
        })
    }

    async fn clear_installing(&self, scope: &str, worker: &Arc<CacheManager>) {
        let mut registrations = self.registrations.write().await;
        if let Some(registration) = registrations.get_mut(scope) {
            if registration
                .installing
                .as_ref()
                .is_some_and(|w| Arc::ptr_eq(w, worker))
            {
                registration.installing = None;
            }
        }
    }

    /// Activate the waiting worker of `scope`, retiring the previous one.
    pub async fn activate_waiting(&self, scope: &str) -> Result<ActivationReport, SwError> {
        let waiting = self
            .registrations
            .read()
            .await
            .get(scope)
            .and_then(|r| r.waiting.clone())
            .ok_or_else(|| SwError::NotFound(format!("waiting worker for {scope}")))?;

        self.emit_state(scope, &waiting, ServiceWorkerState::Activating);
        let report = match waiting.activate().await {
            Ok(report) => report,
            Err(e) => {
                error!(scope, error = %e, "Activation failed");
                waiting.mark_redundant().await;
                if let Some(registration) = self.registrations.write().await.get_mut(scope) {
                    registration.waiting = None;
                }
                self.emit_state(scope, &waiting, ServiceWorkerState::Redundant);
                return Err(e);
            }
        };

        let previous = {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .get_mut(scope)
                .ok_or_else(|| SwError::NotFound(format!("registration {scope}")))?;
            registration.waiting = None;
            registration.active.replace(Arc::clone(&waiting))
        };

        if let Some(previous) = previous {
            previous.mark_redundant().await;
            self.emit_state(scope, &previous, ServiceWorkerState::Redundant);
        }
        self.emit_state(scope, &waiting, ServiceWorkerState::Activated);
        for client_id in &report.claimed {
            self.emit(ServiceWorkerEvent::ControllerChange {
                client_id: client_id.clone(),
                worker_id: waiting.id(),
            });
        }

        Ok(report)
    }

    /// The active worker for `scope`.
    pub async fn active(&self, scope: &str) -> Option<Arc<CacheManager>> {
        self.registrations
            .read()
            .await
            .get(scope)
            .and_then(|r| r.active.clone())
    }

    /// Active worker whose scope covers `path`, longest scope first.
    async fn controller_for(&self, path: &str) -> Option<Arc<CacheManager>> {
        let registrations = self.registrations.read().await;
        registrations
            .iter()
            .filter(|(scope, r)| path.starts_with(scope.as_str()) && r.active.is_some())
            .max_by_key(|(scope, _)| scope.len())
            .and_then(|(_, r)| r.active.clone())
    }

    /// Route a page fetch. Without an active worker, or from a page no worker
    /// controls, it goes straight to the network. Navigations are always
    /// routed by scope.
    pub async fn handle_fetch(&self, event: FetchEvent) -> Result<FetchResponse, SwError> {
        let controller = if self.from_uncontrolled_page(&event).await {
            None
        } else {
            self.controller_for(event.request.url.path()).await
        };

        match controller {
            Some(worker) => worker.handle_fetch(event).await,
            None => {
                let response = self.fetcher.fetch(event.request).await?;
                Ok(FetchResponse::from_network(response))
            }
        }
    }

    async fn from_uncontrolled_page(&self, event: &FetchEvent) -> bool {
        if event.is_navigation {
            return false;
        }
        let Some(ref client_id) = event.client_id else {
            return false;
        };
        self.clients
            .read()
            .await
            .get(client_id)
            .is_some_and(|client| client.controller.is_none())
    }

    /// Deliver a push message to the active worker of `scope`.
    pub async fn handle_push(&self, scope: &str, event: PushEvent) -> Result<Notification, SwError> {
        let worker = self
            .active(scope)
            .await
            .ok_or_else(|| SwError::NotFound(format!("active worker for {scope}")))?;
        let notification = worker.push_notification(&event);
        self.emit(ServiceWorkerEvent::ShowNotification(notification.clone()));
        Ok(notification)
    }

    /// Unregister a scope. Its workers become redundant; buckets are kept.
    pub async fn unregister(&self, scope: &str) -> Result<bool, SwError> {
        let _job = self.jobs.lock().await;
        let Some(registration) = self.registrations.write().await.remove(scope) else {
            return Ok(false);
        };

        for worker in [registration.installing, registration.waiting, registration.active]
            .into_iter()
            .flatten()
        {
            worker.mark_redundant().await;
            self.clients.write().await.release(worker.id());
            self.emit_state(scope, &worker, ServiceWorkerState::Redundant);
        }
        Ok(true)
    }

    fn emit_state(&self, scope: &str, worker: &CacheManager, new_state: ServiceWorkerState) {
        self.emit(ServiceWorkerEvent::StateChange {
            registration_scope: scope.to_string(),
            worker_id: worker.id(),
            new_state,
        });
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        if self.event_tx.send(event).is_err() {
            warn!("Service worker event receiver dropped");
        }
    }
}

#[async_trait]
impl WorkerHost for ServiceWorkerContainer {
    async fn register(&self, script_path: &str) -> Result<RegistrationInfo, HostError> {
        self.register_script(script_path).await.map_err(|e| match e {
            SwError::NotFound(m) => HostError::ScriptNotFound(m),
            SwError::RegistrationFailed(m) | SwError::Precache { reason: m, .. } => {
                HostError::InstallFailed(m)
            }
            other => HostError::ActivationFailed(other.to_string()),
        })
    }
}
