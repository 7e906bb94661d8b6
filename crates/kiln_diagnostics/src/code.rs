//! Diagnostic codes with category prefixes for structured identification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The category of a diagnostic code, determining its prefix letter.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Category {
    /// Incremental state was discarded and a full rebuild is required, prefixed with `R`.
    Rebuild,
    /// Persisted state could not be decoded, prefixed with `C`.
    Corruption,
    /// Filesystem failures, prefixed with `I`.
    Io,
}

impl Category {
    /// Returns the single-character prefix for this category.
    pub fn prefix(self) -> char {
        match self {
            Category::Rebuild => 'R',
            Category::Corruption => 'C',
            Category::Io => 'I',
        }
    }
}

/// A structured diagnostic code combining a category prefix and a numeric identifier.
///
/// Displayed as the category prefix followed by a zero-padded 3-digit number,
/// e.g. `R001`, `C002`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct DiagnosticCode {
    /// The category of this diagnostic.
    pub category: Category,
    /// The numeric identifier within the category.
    pub number: u16,
}

impl DiagnosticCode {
    /// Stored configuration digests differ from the current ones.
    pub const CONFIGURATION_CHANGED: Self = Self::new(Category::Rebuild, 1);
    /// The state file was written by an incompatible format version.
    pub const FORMAT_VERSION_CHANGED: Self = Self::new(Category::Rebuild, 2);
    /// Too many targets are dirty; a clean rebuild is estimated to be cheaper.
    pub const REBUILD_CHEAPER: Self = Self::new(Category::Rebuild, 3);
    /// The source state file is unreadable.
    pub const SOURCE_STATE_CORRUPTED: Self = Self::new(Category::Corruption, 1);
    /// The target stats store is unreadable.
    pub const TARGET_STATS_CORRUPTED: Self = Self::new(Category::Corruption, 2);
    /// A state file could not be read or written.
    pub const STATE_IO: Self = Self::new(Category::Io, 1);

    /// Creates a new diagnostic code.
    pub const fn new(category: Category, number: u16) -> Self {
        Self { category, number }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:03}", self.category.prefix(), self.number)
    }
}
