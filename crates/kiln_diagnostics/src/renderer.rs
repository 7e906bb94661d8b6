//! Plain-text rendering of diagnostics for terminal output.

use crate::diagnostic::Diagnostic;

/// Trait for rendering diagnostics into formatted output strings.
pub trait DiagnosticRenderer {
    /// Renders a single diagnostic into a formatted string.
    fn render(&self, diag: &Diagnostic) -> String;
}

/// Renders diagnostics in a rustc-style terminal format:
///
/// ```text
/// info[R001]: compiler options changed (stored 3f, current 9k)
///   --> .kiln/app/sources.kst
///    = note: all sources will be recompiled
/// ```
pub struct TerminalRenderer;

impl DiagnosticRenderer for TerminalRenderer {
    fn render(&self, diag: &Diagnostic) -> String {
        let mut out = format!("{}[{}]: {}\n", diag.severity, diag.code, diag.message);
        if let Some(file) = &diag.file {
            out.push_str(&format!("  --> {}\n", file.display()));
        }
        for note in &diag.notes {
            out.push_str(&format!("   = note: {note}\n"));
        }
        out
    }
}
