// crates/sync-engine/src/notify.rs
//! User-facing notifications
//!
//! The UI layer supplies a sink (toasts, a status bar). Without one,
//! notifications are only logged.

use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Notification severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl NotificationLevel {
    fn log_level(self) -> log::Level {
        match self {
            Self::Info | Self::Success => log::Level::Info,
            Self::Warning => log::Level::Warn,
            Self::Error => log::Level::Error,
        }
    }
}

/// A human-readable message for the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.level, self.message)
    }
}

/// Receives notifications from the sync manager
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Sink that writes notifications to the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, notification: Notification) {
        log::log!(notification.level.log_level(), "{}", notification.message);
    }
}

/// Sink that keeps every notification, for tests and diagnostics
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    entries: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Returns true if a notification at `level` mentions `needle`
    pub fn contains(&self, level: NotificationLevel, needle: &str) -> bool {
        self.notifications()
            .iter()
            .any(|n| n.level == level && n.message.contains(needle))
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(notification);
        }
    }
}

/// Optional sink wrapper used by the manager
#[derive(Clone, Default)]
pub(crate) struct Notifier {
    sink: Option<Arc<dyn NotificationSink>>,
}

impl Notifier {
    pub(crate) fn new(sink: Option<Arc<dyn NotificationSink>>) -> Self {
        Self { sink }
    }

    pub(crate) fn send(&self, level: NotificationLevel, message: impl Into<String>) {
        let notification = Notification::new(level, message);
        match &self.sink {
            Some(sink) => sink.notify(notification),
            None => log::debug!("No notification sink: {}", notification),
        }
    }

    pub(crate) fn success(&self, message: impl Into<String>) {
        self.send(NotificationLevel::Success, message);
    }

    pub(crate) fn warning(&self, message: impl Into<String>) {
        self.send(NotificationLevel::Warning, message);
    }

    pub(crate) fn error(&self, message: impl Into<String>) {
        self.send(NotificationLevel::Error, message);
    }
}
