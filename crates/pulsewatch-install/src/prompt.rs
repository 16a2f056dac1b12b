//! The platform's install-readiness event.
//!
//! A [`BeforeInstallPromptEvent`] is handed to the page; the matching
//! [`PlatformPrompt`] stays with the platform, which uses it to see whether
//! its native banner was suppressed and to answer the prompt once shown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

/// The user's answer to the install prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserChoice {
    Accepted,
    Dismissed,
}

impl UserChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserChoice::Accepted => "accepted",
            UserChoice::Dismissed => "dismissed",
        }
    }
}

/// Install-readiness event, page side.
#[derive(Debug)]
pub struct BeforeInstallPromptEvent {
    platforms: Vec<String>,
    default_prevented: Arc<AtomicBool>,
    prompt_tx: Option<oneshot::Sender<()>>,
    user_choice: oneshot::Receiver<UserChoice>,
}

/// Install-readiness event, platform side.
#[derive(Debug)]
pub struct PlatformPrompt {
    default_prevented: Arc<AtomicBool>,
    prompt_rx: oneshot::Receiver<()>,
    choice_tx: oneshot::Sender<UserChoice>,
}

/// Answers a prompt that has been shown.
#[derive(Debug)]
pub struct ChoiceResponder {
    choice_tx: oneshot::Sender<UserChoice>,
}

impl BeforeInstallPromptEvent {
    /// Create a linked event pair.
    pub fn new(platforms: impl IntoIterator<Item = impl Into<String>>) -> (Self, PlatformPrompt) {
        let default_prevented = Arc::new(AtomicBool::new(false));
        let (prompt_tx, prompt_rx) = oneshot::channel();
        let (choice_tx, user_choice) = oneshot::channel();

        (
            Self {
                platforms: platforms.into_iter().map(Into::into).collect(),
                default_prevented: Arc::clone(&default_prevented),
                prompt_tx: Some(prompt_tx),
                user_choice,
            },
            PlatformPrompt {
                default_prevented,
                prompt_rx,
                choice_tx,
            },
        )
    }

    /// Platforms the app can be installed on.
    pub fn platforms(&self) -> &[String] {
        &self.platforms
    }

    /// Suppress the platform's own install banner.
    pub fn prevent_default(&self) {
        self.default_prevented.store(true, Ordering::Release);
    }

    pub fn is_default_prevented(&self) -> bool {
        self.default_prevented.load(Ordering::Acquire)
    }

    /// Show the install prompt. Calling it again has no effect.
    pub fn prompt(&mut self) {
        if let Some(tx) = self.prompt_tx.take() {
            if tx.send(()).is_err() {
                debug!("Platform no longer listening for the install prompt");
            }
        }
    }

    /// Wait for the user's answer.
    ///
    /// A platform that goes away without answering counts as a dismissal.
    pub async fn user_choice(self) -> UserChoice {
        self.user_choice.await.unwrap_or(UserChoice::Dismissed)
    }
}

impl PlatformPrompt {
    /// Whether the page suppressed the native banner.
    pub fn banner_suppressed(&self) -> bool {
        self.default_prevented.load(Ordering::Acquire)
    }

    /// Wait until the page shows the prompt.
    ///
    /// Returns `None` if the page dropped the event without prompting.
    pub async fn prompted(self) -> Option<ChoiceResponder> {
        match self.prompt_rx.await {
            Ok(()) => Some(ChoiceResponder {
                choice_tx: self.choice_tx,
            }),
            Err(_) => None,
        }
    }
}

impl ChoiceResponder {
    /// Deliver the user's answer. Returns `false` if nobody is waiting.
    pub fn respond(self, choice: UserChoice) -> bool {
        self.choice_tx.send(choice).is_ok()
    }
}
