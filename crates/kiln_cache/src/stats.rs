//! Long-lived per-target build statistics.

use std::fmt;

use kiln_common::{schema_version_digest, SchemaEnum};

/// A statistic tracked for every target across builds. Values are milliseconds.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TargetStatistic {
    /// Rolling average of incremental build durations.
    AverageBuildTime,
    /// Duration of the most recent successful clean rebuild.
    LastSuccessfulRebuildDuration,
}

impl TargetStatistic {
    /// Number of statistics.
    pub const COUNT: usize = 2;
}

impl SchemaEnum for TargetStatistic {
    const ALL: &'static [Self] = &[
        TargetStatistic::AverageBuildTime,
        TargetStatistic::LastSuccessfulRebuildDuration,
    ];

    fn name(self) -> &'static str {
        match self {
            TargetStatistic::AverageBuildTime => "AVERAGE_BUILD_TIME",
            TargetStatistic::LastSuccessfulRebuildDuration => "LAST_SUCCESSFUL_REBUILD_DURATION",
        }
    }

    fn ordinal(self) -> usize {
        self as usize
    }
}

impl fmt::Display for TargetStatistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetStatistic::AverageBuildTime => f.write_str("average build time"),
            TargetStatistic::LastSuccessfulRebuildDuration => {
                f.write_str("last successful rebuild duration")
            }
        }
    }
}

/// One slot per [`TargetStatistic`] plus a trailing schema version digest.
///
/// A container read back from disk may have any shape; [`is_correct`](Self::is_correct)
/// tells whether it was written by the current schema. A zero statistic
/// means "no data yet".
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TargetStateContainer {
    values: Vec<i64>,
}

impl TargetStateContainer {
    /// Creates a container with every statistic unset.
    pub fn new() -> Self {
        let mut values = vec![0; TargetStatistic::COUNT + 1];
        values[TargetStatistic::COUNT] = Self::version_digest() as i64;
        Self { values }
    }

    /// Wraps a record read from storage without validating it.
    pub fn from_record(values: Vec<i64>) -> Self {
        Self { values }
    }

    /// The raw record, suitable for storage.
    pub fn as_record(&self) -> &[i64] {
        &self.values
    }

    /// The version digest of [`TargetStatistic`].
    pub fn version_digest() -> u64 {
        schema_version_digest::<TargetStatistic>()
    }

    /// `true` when the length and trailing version digest match the current schema.
    pub fn is_correct(&self) -> bool {
        self.values.len() == TargetStatistic::COUNT + 1
            && self.values[TargetStatistic::COUNT] as u64 == Self::version_digest()
    }

    /// Returns a statistic. Must only be called on a correct container.
    pub fn get(&self, stat: TargetStatistic) -> i64 {
        self.values[stat.ordinal()]
    }

    /// Sets a statistic. Must only be called on a correct container.
    pub fn set(&mut self, stat: TargetStatistic, value: i64) {
        self.values[stat.ordinal()] = value;
    }

    /// Rolling average build time, or `None` before the first recorded build.
    pub fn average_build_time(&self) -> Option<i64> {
        Some(self.get(TargetStatistic::AverageBuildTime)).filter(|&v| v > 0)
    }

    /// Duration of the last successful clean rebuild, if one was recorded.
    pub fn last_successful_rebuild_duration(&self) -> Option<i64> {
        Some(self.get(TargetStatistic::LastSuccessfulRebuildDuration)).filter(|&v| v > 0)
    }

    /// Folds the duration of a finished build into the rolling average.
    ///
    /// The first sample is taken as-is; later samples are averaged with the
    /// previous value.
    pub fn record_build(&mut self, elapsed_ms: i64) {
        let elapsed_ms = elapsed_ms.max(0);
        let average = match self.average_build_time() {
            Some(previous) => (previous + elapsed_ms) / 2,
            None => elapsed_ms,
        };
        self.set(TargetStatistic::AverageBuildTime, average);
    }

    /// Records the duration of a successful clean rebuild.
    pub fn record_clean_rebuild(&mut self, elapsed_ms: i64) {
        self.set(TargetStatistic::LastSuccessfulRebuildDuration, elapsed_ms.max(0));
    }
}

impl Default for TargetStateContainer {
    fn default() -> Self {
        Self::new()
    }
}
