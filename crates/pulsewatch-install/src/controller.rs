//! Install controller: holds the deferred prompt and registers the worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pulsewatch_core::{HostError, OfflineConfig, RegistrationInfo, WorkerHost};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::prompt::{BeforeInstallPromptEvent, UserChoice};

/// Events the page receives from the platform.
#[derive(Debug)]
pub enum PageEvent {
    /// The app became installable.
    BeforeInstallPrompt(BeforeInstallPromptEvent),
    /// The app was installed.
    AppInstalled,
}

/// Sending half of the page's event subscription.
#[derive(Debug, Clone)]
pub struct PageEventBus {
    tx: mpsc::UnboundedSender<PageEvent>,
}

impl PageEventBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PageEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver an event. Returns `false` once the page stopped listening.
    pub fn dispatch(&self, event: PageEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Result of [`InstallController::trigger_install`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallOutcome {
    Accepted,
    Dismissed,
    /// No prompt was held; nothing happened.
    Unavailable,
}

impl From<UserChoice> for InstallOutcome {
    fn from(choice: UserChoice) -> Self {
        match choice {
            UserChoice::Accepted => InstallOutcome::Accepted,
            UserChoice::Dismissed => InstallOutcome::Dismissed,
        }
    }
}

/// Result of worker registration. Diagnostic only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationStatus {
    Registered(RegistrationInfo),
    /// Not a production build.
    Skipped,
    Failed(HostError),
    AlreadyActivated,
}

/// Page-side install controller.
pub struct InstallController {
    config: OfflineConfig,
    deferred: Mutex<Option<BeforeInstallPromptEvent>>,
    available: watch::Sender<bool>,
    activated: AtomicBool,
}

impl InstallController {
    pub fn new(config: OfflineConfig) -> Self {
        let (available, _) = watch::channel(false);
        Self {
            config,
            deferred: Mutex::new(None),
            available,
            activated: AtomicBool::new(false),
        }
    }

    /// Whether an install prompt can be shown right now.
    pub fn is_install_available(&self) -> bool {
        *self.available.borrow()
    }

    /// Follow the install-available flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.available.subscribe()
    }

    /// React to a platform event.
    pub async fn handle_event(&self, event: PageEvent) {
        match event {
            PageEvent::BeforeInstallPrompt(prompt) => {
                prompt.prevent_default();
                let mut held = self.deferred.lock().await;
                let replaced = held.replace(prompt).is_some();
                self.available.send_replace(true);
                drop(held);
                debug!(replaced, "Install prompt deferred");
            }
            PageEvent::AppInstalled => {
                let mut held = self.deferred.lock().await;
                let dropped = held.take().is_some();
                self.available.send_replace(false);
                drop(held);
                info!(dropped_prompt = dropped, "App installed");
            }
        }
    }

    /// Show the deferred prompt and wait for the user's answer.
    ///
    /// The prompt is consumed whatever the answer; without one this is a
    /// no-op returning [`InstallOutcome::Unavailable`].
    ///
    /// The install-available flag drops to `false` as soon as the prompt is
    /// taken, before the user has answered. A prompt can only be shown once,
    /// so there is nothing left to offer while the answer is pending.
    pub async fn trigger_install(&self) -> InstallOutcome {
        let mut held = self.deferred.lock().await;
        let Some(mut prompt) = held.take() else {
            debug!("No install prompt held");
            return InstallOutcome::Unavailable;
        };
        self.available.send_replace(false);
        drop(held);

        prompt.prompt();
        let outcome = InstallOutcome::from(prompt.user_choice().await);
        info!(outcome = ?outcome, "Install prompt resolved");
        outcome
    }

    /// Register the worker script once per page load.
    ///
    /// Registration only happens in production builds; a failure is logged
    /// and does not affect the page.
    pub async fn activate(&self, host: &dyn WorkerHost) -> RegistrationStatus {
        if self.activated.swap(true, Ordering::AcqRel) {
            return RegistrationStatus::AlreadyActivated;
        }
        if !self.config.is_production() {
            debug!(environment = ?self.config.environment, "Skipping worker registration");
            return RegistrationStatus::Skipped;
        }

        let script = self.config.worker_script.as_str();
        match host.register(script).await {
            Ok(info) => {
                info!(script, scope = %info.scope, cache = %info.cache_name, "Worker registered");
                RegistrationStatus::Registered(info)
            }
            Err(e) => {
                error!(script, error = %e, "Worker registration failed");
                RegistrationStatus::Failed(e)
            }
        }
    }

    /// [`activate`](Self::activate) on a background task.
    pub fn spawn_activate(self: &Arc<Self>, host: Arc<dyn WorkerHost>) -> JoinHandle<RegistrationStatus> {
        let controller = Arc::clone(self);
        tokio::spawn(async move { controller.activate(host.as_ref()).await })
    }

    /// Drain the page's event subscription until it closes.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<PageEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        debug!("Page event bus closed");
    }
}

impl std::fmt::Debug for InstallController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallController")
            .field("available", &self.is_install_available())
            .field("activated", &self.activated.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
