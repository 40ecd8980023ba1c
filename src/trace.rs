//! Micro-op traces and the executor handle.
//!
//! The trace is produced by the upstream optimizer and treated as opaque
//! input; the executor handle is owned by the host runtime, which serializes
//! all access to it. This crate reads only `exit_count` and writes only the
//! three `jit_*` fields.

/// Opcode of the uop that begins every normal trace.
pub const START_EXECUTOR: u16 = 0;
/// Opcode of the uop that begins cold-exit continuation traces.
pub const COLD_EXIT: u16 = 1;
/// Tag of the tail-guard group appended after the last uop; not produced by
/// the optimizer.
pub const FATAL_ERROR: u16 = 2;

/// Which of the three mutually exclusive branch-metadata layouts a uop
/// carries. Selects the patch-vector entries populated at emit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UopFormat {
    /// `target` is populated.
    Target,
    /// `exit_index` (and possibly `error_target`) are populated.
    Exit,
    /// `jump_target` (and possibly `error_target`) are populated.
    Jump,
}

/// One micro-op of a trace.
///
/// Only the fields selected by `format` are meaningful; the others are left
/// zero by the optimizer.
#[derive(Debug, Clone, Copy)]
pub struct UopInstruction {
    pub opcode: u16,
    pub format: UopFormat,
    pub oparg: u32,
    pub operand: u64,
    pub target: u32,
    pub exit_index: u32,
    pub error_target: u32,
    pub jump_target: u32,
}

impl UopInstruction {
    /// A target-format uop with all metadata zeroed.
    pub fn new(opcode: u16) -> Self {
        Self {
            opcode,
            format: UopFormat::Target,
            oparg: 0,
            operand: 0,
            target: 0,
            exit_index: 0,
            error_target: 0,
            jump_target: 0,
        }
    }
}

/// The host-owned object a compiled region is attached to.
///
/// `jit_code` is the entry pointer, `jit_side_entry` the post-trampoline
/// entry (`jit_code + trampoline_code_size`), `jit_size` the mapped size for
/// the eventual release. All three are set together on successful compile
/// and cleared together on free.
#[derive(Debug)]
pub struct ExecutorHandle {
    /// Number of side-exit slots this executor owns; exit-format uops must
    /// index below it.
    pub exit_count: u32,
    pub jit_code: *const u8,
    pub jit_side_entry: *const u8,
    pub jit_size: usize,
}

impl ExecutorHandle {
    pub fn new(exit_count: u32) -> Self {
        Self {
            exit_count,
            jit_code: std::ptr::null(),
            jit_side_entry: std::ptr::null(),
            jit_size: 0,
        }
    }

    /// Whether a compiled region is currently attached.
    pub fn is_compiled(&self) -> bool {
        !self.jit_code.is_null()
    }
}
