//! Error type for JIT memory operations.
//!
//! Every variant is a transient OS condition: the caller's expected policy is
//! to discard the trace and keep interpreting. Bugs (bad relocation math,
//! malformed stencil tables) are not errors; they are debug assertions.

use thiserror::Error;

/// Errors surfaced to the host interpreter.
///
/// The display strings double as the warning text emitted through `tracing`
/// at the failure site, tagged with the raw OS error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JitError {
    /// The OS refused to provide anonymous pages.
    #[error("JIT unable to allocate memory ({errno})")]
    AllocationFailed { errno: i32 },
    /// The OS refused to unmap a previously allocated region.
    #[error("JIT unable to free memory ({errno})")]
    ReleaseFailed { errno: i32 },
    /// The RW→RX permission transition failed; the region must be freed.
    #[error("JIT unable to protect executable memory ({errno})")]
    ProtectionFailed { errno: i32 },
    /// The instruction-cache flush failed; treated like a protection failure.
    #[error("JIT unable to flush instruction cache ({errno})")]
    CacheFlushFailed { errno: i32 },
}
