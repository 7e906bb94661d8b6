//! Decides when an incremental build would cost more than starting over.

use kiln_diagnostics::{Diagnostic, DiagnosticCode, DiagnosticSink};

use crate::stats::TargetStateContainer;

/// Percentage of the last clean rebuild an incremental build may reach
/// before a full rebuild is forced, unless configured.
pub const DEFAULT_THRESHOLD_PERCENT: u8 = 95;

/// Compares the estimated cost of building the dirty targets with the
/// duration of the last successful clean rebuild.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RebuildHeuristic {
    threshold_percent: u8,
}

impl RebuildHeuristic {
    /// Creates a heuristic firing at `threshold_percent` of the last clean rebuild.
    /// Values above 100 are clamped.
    pub fn new(threshold_percent: u8) -> Self {
        Self {
            threshold_percent: threshold_percent.min(100),
        }
    }

    /// The configured percentage.
    pub fn threshold_percent(&self) -> u8 {
        self.threshold_percent
    }

    /// Returns the threshold in milliseconds for a clean rebuild that took
    /// `last_rebuild_ms`, or `None` if no usable rebuild was recorded.
    pub fn threshold_ms(&self, last_rebuild_ms: i64) -> Option<i64> {
        let threshold = last_rebuild_ms.saturating_mul(i64::from(self.threshold_percent)) / 100;
        (threshold > 0).then_some(threshold)
    }

    /// Returns a reason to rebuild everything when the summed average build
    /// times of `dirty` targets reach the threshold.
    ///
    /// Targets without a recorded average contribute nothing. Without a
    /// recorded clean rebuild the heuristic never fires.
    pub fn should_force_full_rebuild<'a, I>(&self, dirty: I, last_rebuild_ms: i64) -> Option<String>
    where
        I: IntoIterator<Item = &'a TargetStateContainer>,
    {
        let Some(threshold) = self.threshold_ms(last_rebuild_ms) else {
            tracing::debug!("rebuild heuristic: no stats available");
            return None;
        };

        let mut estimated: i64 = 0;
        let mut affected = 0usize;
        for state in dirty {
            if let Some(average) = state.is_correct().then(|| state.average_build_time()).flatten() {
                estimated = estimated.saturating_add(average);
                affected += 1;
            }
        }
        tracing::debug!(affected, estimated_ms = estimated, threshold_ms = threshold, "rebuild heuristic");

        if estimated < threshold {
            return None;
        }
        tracing::info!(
            estimated_ms = estimated,
            last_rebuild_ms,
            threshold_ms = threshold,
            "too many targets require recompilation"
        );
        Some(format!(
            "too many targets require recompilation ({affected} targets, estimated {estimated} ms, \
             threshold {threshold} ms), forcing full rebuild"
        ))
    }

    /// Like [`should_force_full_rebuild`](Self::should_force_full_rebuild),
    /// reporting a forced rebuild to `sink`. Returns whether to rebuild everything.
    pub fn check<'a, I>(&self, dirty: I, last_rebuild_ms: i64, sink: &DiagnosticSink) -> bool
    where
        I: IntoIterator<Item = &'a TargetStateContainer>,
    {
        let Some(reason) = self.should_force_full_rebuild(dirty, last_rebuild_ms) else {
            return false;
        };
        sink.emit(
            Diagnostic::info(DiagnosticCode::REBUILD_CHEAPER, reason)
                .with_note(format!("last clean rebuild took {last_rebuild_ms} ms")),
        );
        true
    }
}

impl Default for RebuildHeuristic {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD_PERCENT)
    }
}
