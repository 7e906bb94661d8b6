//! Collects diagnostics raised while state is loaded or saved.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::diagnostic::Diagnostic;
use crate::severity::Severity;

/// Where state loaders report problems they chose to survive.
///
/// Passing a sink to a loader opts into graceful degradation: unreadable
/// state and forced-rebuild reasons land here and the load falls back to
/// "no prior state" instead of returning an error. The sink can be shared
/// between threads.
pub struct DiagnosticSink {
    reported: Mutex<Vec<Diagnostic>>,
    failed: AtomicBool,
}

impl DiagnosticSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self {
            reported: Mutex::new(Vec::new()),
            failed: AtomicBool::new(false),
        }
    }

    /// Records `diag` and mirrors it as a `tracing` event of the same level.
    pub fn emit(&self, diag: Diagnostic) {
        match diag.severity {
            Severity::Info => tracing::info!(code = %diag.code, "{}", diag.message),
            Severity::Warning => tracing::warn!(code = %diag.code, "{}", diag.message),
            Severity::Error => {
                self.failed.store(true, Ordering::Relaxed);
                tracing::error!(code = %diag.code, "{}", diag.message);
            }
        }
        self.reported.lock().unwrap().push(diag);
    }

    /// Whether an error-severity diagnostic was ever emitted. Draining the
    /// sink does not reset this.
    pub fn has_errors(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    /// Removes and returns everything reported so far.
    pub fn take_all(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.reported.lock().unwrap())
    }

    /// Copies everything reported so far, leaving the sink as is.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.reported.lock().unwrap().clone()
    }
}

impl Default for DiagnosticSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::DiagnosticCode;

    fn unreadable_snapshot() -> Diagnostic {
        Diagnostic::warning(DiagnosticCode::SOURCE_STATE_CORRUPTED, "checksum mismatch")
    }

    fn io_failure() -> Diagnostic {
        Diagnostic::error(DiagnosticCode::STATE_IO, "permission denied")
    }

    #[test]
    fn degraded_load_is_not_a_failure() {
        let sink = DiagnosticSink::new();
        sink.emit(unreadable_snapshot());
        sink.emit(Diagnostic::info(DiagnosticCode::CONFIGURATION_CHANGED, "compiler changed"));
        assert!(!sink.has_errors());
        assert_eq!(sink.diagnostics().len(), 2);
    }

    #[test]
    fn failure_survives_draining() {
        let sink = DiagnosticSink::new();
        sink.emit(io_failure());
        sink.emit(unreadable_snapshot());

        let drained = sink.take_all();
        assert_eq!(drained[0].code, DiagnosticCode::STATE_IO);
        assert_eq!(drained[1].code, DiagnosticCode::SOURCE_STATE_CORRUPTED);
        assert!(sink.take_all().is_empty());
        assert!(sink.has_errors());
    }

    #[test]
    fn shared_between_threads() {
        use std::sync::Arc;

        let sink = Arc::new(DiagnosticSink::new());
        let workers: Vec<_> = (0..4)
            .map(|i| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        sink.emit(if i == 3 { io_failure() } else { unreadable_snapshot() });
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(sink.has_errors());
        assert_eq!(sink.diagnostics().len(), 100);
    }
}
