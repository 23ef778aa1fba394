// SPDX-License-Identifier: CEPL-1.0
//! Diagnostics sink shared by every engine object.
//!
//! The sink is a plain function value. `log` never fails; `fail` reports an
//! unrecoverable condition and hands back a [`Fatal`] for the caller to
//! propagate, which terminates the operation that triggered it.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    Verbose,
    Info,
    Warning,
    Error,
    Misc,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Verbose => "verbose",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Misc => "misc",
        })
    }
}

/// An unrecoverable setup or GPU error, naming the operation that failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{op}: {message}")]
pub struct Fatal {
    pub op: String,
    pub message: String,
}

type SinkFn = dyn Fn(Severity, &str) + Send + Sync;

#[derive(Clone)]
pub struct Diagnostics {
    sink: Arc<SinkFn>,
}

impl Diagnostics {
    pub fn new(sink: impl Fn(Severity, &str) + Send + Sync + 'static) -> Self {
        Self { sink: Arc::new(sink) }
    }

    /// Sink that forwards everything to `tracing`.
    pub fn tracing() -> Self {
        Self::new(|severity, text| match severity {
            Severity::Verbose => tracing::trace!("{text}"),
            Severity::Info => tracing::info!("{text}"),
            Severity::Warning => tracing::warn!("{text}"),
            Severity::Error => tracing::error!("{text}"),
            Severity::Misc => tracing::debug!("{text}"),
        })
    }

    pub fn log(&self, severity: Severity, text: &str) {
        (self.sink)(severity, text);
    }

    pub fn info(&self, text: &str) {
        self.log(Severity::Info, text);
    }

    pub fn warn(&self, text: &str) {
        self.log(Severity::Warning, text);
    }

    /// Reports a fatal condition through the sink and returns it.
    #[must_use]
    pub fn fail(&self, op: impl Into<String>, message: impl Into<String>) -> Fatal {
        let fatal = Fatal {
            op: op.into(),
            message: message.into(),
        };
        self.log(Severity::Error, &fatal.to_string());
        fatal
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::tracing()
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn capture() -> (Diagnostics, Arc<Mutex<Vec<(Severity, String)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let diag = Diagnostics::new(move |sev, text| {
            sink_seen.lock().unwrap().push((sev, text.to_owned()));
        });
        (diag, seen)
    }

    #[test]
    fn log_reaches_sink_with_severity() {
        let (diag, seen) = capture();
        diag.log(Severity::Verbose, "layer chatter");
        diag.warn("Cannot find layer: VK_LAYER_X");
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (Severity::Verbose, "layer chatter".to_owned()));
        assert_eq!(seen[1].0, Severity::Warning);
    }

    #[test]
    fn fail_logs_an_error_and_names_the_operation() {
        let (diag, seen) = capture();
        let fatal = diag.fail("create_instance", "no required validation layers");
        assert_eq!(fatal.op, "create_instance");
        assert_eq!(
            fatal.to_string(),
            "create_instance: no required validation layers"
        );
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, Severity::Error);
        assert_eq!(seen[0].1, fatal.to_string());
    }
}
