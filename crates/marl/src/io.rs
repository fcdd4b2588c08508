use std::io::{self, Write as _};

use crate::error::Diagnostic;

/// Trait for receiving diagnostics emitted during `build` and `run`.
///
/// Implement this trait to capture or redirect engine diagnostics. The
/// default implementation [`StderrSink`] writes to standard error.
pub trait DiagnosticSink {
    /// Called once for each diagnostic the engine produces.
    fn emit(&mut self, diag: &Diagnostic);
}

/// Default sink that writes the `Display` form of each diagnostic to
/// standard error, one per line.
#[derive(Debug, Default)]
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn emit(&mut self, diag: &Diagnostic) {
        // Failing to write a diagnostic must not fail the operation that
        // produced it.
        let _ = writeln!(io::stderr(), "{diag}");
    }
}

/// Sink that accumulates diagnostics in memory.
///
/// Useful in tests and in embedders that surface script errors through
/// their own UI instead of a terminal.
#[derive(Debug, Default)]
pub struct CollectSink {
    diags: Vec<Diagnostic>,
}

impl CollectSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diags
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.diags.is_empty()
    }

    /// Drains and returns the collected diagnostics.
    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diags)
    }
}

impl DiagnosticSink for CollectSink {
    fn emit(&mut self, diag: &Diagnostic) {
        self.diags.push(diag.clone());
    }
}
