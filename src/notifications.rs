use std::fmt;

use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Info => "info",
            Self::Success => "ok",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Where user-facing outcome messages go. Presentation is up to the host.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: Level, message: &str);
}

/// Sends every notification to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, level: Level, message: &str) {
        match level {
            Level::Info | Level::Success => info!(target: "velasync::notify", "{}", message),
            Level::Warning => warn!(target: "velasync::notify", "{}", message),
            Level::Error => error!(target: "velasync::notify", "{}", message),
        }
    }
}
