//! Compiler configuration and metrics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Configuration for the trace compiler.
#[derive(Debug, Clone)]
pub struct JitConfig {
    /// Apply the opportunistic GOT-load rewrites (x86-64 indirect→direct,
    /// AArch64 ADRP+LDR→MOVZ). Disable when diagnosing bad patches: the
    /// non-relaxed encodings are simpler to audit in a disassembly.
    pub relax_got_loads: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            relax_got_loads: true,
        }
    }
}

/// Atomic counters for compile and release events.
#[derive(Debug, Default)]
pub struct JitMetrics {
    /// Traces compiled and published.
    pub compilations: AtomicU64,
    /// Compilations abandoned on an OS failure.
    pub compile_failures: AtomicU64,
    /// Total bytes of pages currently or previously mapped for traces.
    pub bytes_mapped: AtomicU64,
    /// Compiled regions released back to the OS.
    pub regions_freed: AtomicU64,
}

impl JitMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of (compilations, failures, bytes mapped, regions freed).
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.compilations.load(Ordering::Relaxed),
            self.compile_failures.load(Ordering::Relaxed),
            self.bytes_mapped.load(Ordering::Relaxed),
            self.regions_freed.load(Ordering::Relaxed),
        )
    }

    pub(crate) fn record_success(&self, bytes: u64) {
        self.compilations.fetch_add(1, Ordering::Relaxed);
        self.bytes_mapped.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.compile_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_release(&self) {
        self.regions_freed.fetch_add(1, Ordering::Relaxed);
    }
}
