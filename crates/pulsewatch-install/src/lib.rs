//! # Pulsewatch Install
//!
//! Page-side installability for the dashboard.
//!
//! The platform announces that the app can be installed with a
//! [`BeforeInstallPromptEvent`]. The [`InstallController`] suppresses the
//! native banner, keeps the event, and replays it when the UI asks through
//! [`InstallController::trigger_install`]. A held event is used at most once.
//!
//! On page start the controller also registers the offline worker script with
//! a [`pulsewatch_core::WorkerHost`].
//!
//! ```text
//! platform ──PageEventBus──▶ InstallController ──watch<bool>──▶ UI
//!                                  │
//!                                  └──register("/sw.js")──▶ WorkerHost
//! ```

pub mod controller;
pub mod prompt;

pub use controller::{InstallController, InstallOutcome, PageEvent, PageEventBus, RegistrationStatus};
pub use prompt::{BeforeInstallPromptEvent, ChoiceResponder, PlatformPrompt, UserChoice};
