//! Desktop notifier (external collaborator).
//!
//! Urgency is `{normal, critical}`; icon is `{info, warning, error}`, mapped
//! to freedesktop.org icon names. Emission failures must never propagate,
//! so `DesktopNotifier` logs and swallows them.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Normal,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Icon {
    Info,
    Warning,
    Error,
}

impl Icon {
    fn freedesktop_name(self) -> &'static str {
        match self {
            Icon::Info => "dialog-information",
            Icon::Warning => "dialog-warning",
            Icon::Error => "dialog-error",
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, summary: &str, body: &str, urgency: Urgency, icon: Icon, timeout_ms: u64);
}

/// Emits desktop notifications via `notify-rust`. Best-effort: any failure to
/// reach the desktop notification daemon is logged at `warn` and dropped.
pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn notify(&self, summary: &str, body: &str, urgency: Urgency, icon: Icon, timeout_ms: u64) {
        use notify_rust::{Notification, Timeout, Urgency as NrUrgency};

        let nr_urgency = match urgency {
            Urgency::Normal => NrUrgency::Normal,
            Urgency::Critical => NrUrgency::Critical,
        };

        let result = Notification::new()
            .summary(summary)
            .body(body)
            .icon(icon.freedesktop_name())
            .urgency(nr_urgency)
            .timeout(Timeout::Milliseconds(timeout_ms as u32))
            .show();

        if let Err(e) = result {
            tracing::warn!(error = %e, "desktop notification failed to emit");
        }
    }
}

/// No-op notifier for tests and headless environments.
#[derive(Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _summary: &str, _body: &str, _urgency: Urgency, _icon: Icon, _timeout_ms: u64) {}
}
