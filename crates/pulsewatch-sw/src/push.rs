//! Push messages and the notifications they produce.

use pulsewatch_core::NotificationConfig;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Vibration pattern for health alerts, in milliseconds.
pub const ALERT_VIBRATION: [u32; 3] = [100, 50, 100];

/// A push message delivered to the worker.
#[derive(Debug, Clone, Default)]
pub struct PushEvent {
    /// Text payload, if any.
    pub data: Option<String>,
}

impl PushEvent {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: Some(data.into()),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// Button shown on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

/// A notification the platform should display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    /// Ms since epoch.
    pub date_of_arrival: u64,
    pub primary_key: u32,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    /// Build the health-alert notification for a push message.
    ///
    /// An empty or missing payload falls back to the configured default body.
    pub fn for_push(event: &PushEvent, config: &NotificationConfig) -> Self {
        let body = event
            .data
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&config.default_body)
            .to_string();

        Self {
            title: config.title.clone(),
            body,
            icon: config.icon.clone(),
            badge: config.icon.clone(),
            vibrate: ALERT_VIBRATION.to_vec(),
            date_of_arrival: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
            primary_key: 1,
            actions: vec![
                NotificationAction {
                    action: "explore".to_string(),
                    title: "View details".to_string(),
                    icon: config.icon.clone(),
                },
                NotificationAction {
                    action: "close".to_string(),
                    title: "Close".to_string(),
                    icon: config.icon.clone(),
                },
            ],
        }
    }
}
