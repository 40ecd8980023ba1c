//! The trace compiler.
//!
//! Walks a uop trace twice: once to size the region, once to emit into it.
//! The region is one contiguous page-aligned allocation split into a code
//! half and a data half:
//!
//! ```text
//! [ trampoline code | uop code ... | guard code | tramp data | uop data ... | padding ]
//!   \____________________ code half ___________/ \_______ data half _______/
//! ```
//!
//! All writes land while the region is RW; `mark_executable` flips it to RX
//! before the entry points are published on the executor handle. Nothing
//! here takes a lock: the stencil tables are immutable and the host
//! serializes access to each executor.

#![allow(unsafe_op_in_unsafe_fn)]

use std::ptr::NonNull;

use tracing::debug;

use crate::errors::JitError;
use crate::memory;
use crate::reloc;
use crate::stencils::{HoleValue, Patches, StencilGroup, StencilTables};
use crate::trace::{ExecutorHandle, UopFormat, UopInstruction, COLD_EXIT, FATAL_ERROR, START_EXECUTOR};
use crate::types::{JitConfig, JitMetrics};

/// Compiles uop traces against a baked stencil table.
///
/// Stateless apart from configuration and counters; one compiler may serve
/// any number of independent executors concurrently.
pub struct JitCompiler {
    tables: &'static StencilTables,
    config: JitConfig,
    metrics: JitMetrics,
}

impl JitCompiler {
    pub fn new(tables: &'static StencilTables) -> Self {
        Self::with_config(tables, JitConfig::default())
    }

    pub fn with_config(tables: &'static StencilTables, config: JitConfig) -> Self {
        Self {
            tables,
            config,
            metrics: JitMetrics::new(),
        }
    }

    pub fn metrics(&self) -> &JitMetrics {
        &self.metrics
    }

    /// Compile `trace` and attach the result to `executor`.
    ///
    /// On error a warning has already been emitted and the executor is
    /// unchanged; the caller is expected to keep interpreting. Pair every
    /// successful compile with a later [`Self::free`].
    #[expect(unsafe_code, reason = "emits machine code into freshly mapped pages")]
    pub fn compile(
        &self,
        executor: &mut ExecutorHandle,
        trace: &[UopInstruction],
    ) -> Result<(), JitError> {
        debug_assert!(!trace.is_empty());
        debug_assert!(matches!(trace[0].opcode, START_EXECUTOR | COLD_EXIT));

        // First pass: find the total compiled size. The starts vector gets
        // one extra entry so the guard group doubles as the fall-through
        // target of a length-1 trace.
        let trampoline = &self.tables.trampoline;
        let guard = self.tables.group(FATAL_ERROR);
        let mut instruction_starts = Vec::with_capacity(trace.len().saturating_add(1));
        let mut code_size = trampoline.code.body_size();
        let mut data_size = trampoline.data.body_size();
        for uop in trace {
            let group = self.tables.group(uop.opcode);
            instruction_starts.push(code_size);
            code_size = code_size.saturating_add(group.code.body_size());
            data_size = data_size.saturating_add(group.data.body_size());
        }
        instruction_starts.push(code_size);
        code_size = code_size.saturating_add(guard.code.body_size());
        data_size = data_size.saturating_add(guard.data.body_size());

        // Round up to the next page multiple.
        let page_size = memory::page_size();
        debug_assert!(page_size.is_power_of_two());
        let padding = page_size - ((code_size + data_size) & (page_size - 1));
        let total_size = code_size + data_size + padding;
        let region = memory::alloc(total_size).inspect_err(|_| self.metrics.record_failure())?;

        // Second pass: emit. Code cursor from the region start, data cursor
        // from the end of the code half.
        let code_base = region.as_ptr();
        let mut code = code_base;
        let mut data = unsafe { code_base.add(code_size) };
        let top = unsafe { code_base.add(trampoline.code.body_size()) };

        // The trampoline adapts the native calling convention to the one
        // used inside the region; where the two coincide its body is empty
        // and this emits nothing.
        {
            let mut patches = Patches::new();
            patches[HoleValue::Code] = code as u64;
            patches[HoleValue::Continue] = code as u64 + trampoline.code.body_size() as u64;
            patches[HoleValue::Data] = data as u64;
            patches[HoleValue::Executor] = std::ptr::from_mut(executor) as u64;
            patches[HoleValue::Top] = top as u64;
            unsafe { self.emit(trampoline, &patches) };
            code = unsafe { code.add(trampoline.code.body_size()) };
            data = unsafe { data.add(trampoline.data.body_size()) };
        }

        for uop in trace {
            let group = self.tables.group(uop.opcode);
            let mut patches = Patches::new();
            patches[HoleValue::Code] = code as u64;
            patches[HoleValue::Continue] = code as u64 + group.code.body_size() as u64;
            patches[HoleValue::Data] = data as u64;
            patches[HoleValue::Executor] = std::ptr::from_mut(executor) as u64;
            patches[HoleValue::Oparg] = u64::from(uop.oparg);
            #[cfg(target_pointer_width = "64")]
            {
                patches[HoleValue::Operand] = uop.operand;
            }
            #[cfg(target_pointer_width = "32")]
            {
                patches[HoleValue::OperandHi] = uop.operand >> 32;
                patches[HoleValue::OperandLo] = uop.operand & u64::from(u32::MAX);
            }
            match uop.format {
                UopFormat::Target => {
                    patches[HoleValue::Target] = u64::from(uop.target);
                }
                UopFormat::Exit => {
                    debug_assert!(uop.exit_index < executor.exit_count);
                    patches[HoleValue::ExitIndex] = u64::from(uop.exit_index);
                    if (uop.error_target as usize) < trace.len() {
                        patches[HoleValue::ErrorTarget] = unsafe {
                            code_base.add(instruction_starts[uop.error_target as usize]) as u64
                        };
                    }
                }
                UopFormat::Jump => {
                    debug_assert!((uop.jump_target as usize) < trace.len());
                    patches[HoleValue::JumpTarget] = unsafe {
                        code_base.add(instruction_starts[uop.jump_target as usize]) as u64
                    };
                    if (uop.error_target as usize) < trace.len() {
                        patches[HoleValue::ErrorTarget] = unsafe {
                            code_base.add(instruction_starts[uop.error_target as usize]) as u64
                        };
                    }
                }
            }
            patches[HoleValue::Top] = unsafe { code_base.add(instruction_starts[1]) as u64 };
            unsafe { self.emit(group, &patches) };
            code = unsafe { code.add(group.code.body_size()) };
            data = unsafe { data.add(group.data.body_size()) };
        }

        // Tail guard: traps any accidental fall-through past the last uop
        // before it reaches the data half.
        {
            let mut patches = Patches::new();
            patches[HoleValue::Code] = code as u64;
            patches[HoleValue::Continue] = code as u64;
            patches[HoleValue::Data] = data as u64;
            patches[HoleValue::Executor] = std::ptr::from_mut(executor) as u64;
            patches[HoleValue::Top] = code as u64;
            unsafe { self.emit(guard, &patches) };
            code = unsafe { code.add(guard.code.body_size()) };
            data = unsafe { data.add(guard.data.body_size()) };
        }

        debug_assert_eq!(code as usize, code_base as usize + code_size);
        debug_assert_eq!(data as usize, code_base as usize + code_size + data_size);

        if let Err(err) = memory::mark_executable(region, total_size) {
            let _ = memory::free(region, total_size);
            self.metrics.record_failure();
            return Err(err);
        }

        executor.jit_code = code_base;
        executor.jit_side_entry = top;
        executor.jit_size = total_size;
        self.metrics.record_success(total_size as u64);
        debug!(code_size, data_size, total_size, "compiled trace");
        Ok(())
    }

    /// Copy a group's data body, then its code body, patching each in place.
    ///
    /// Data goes first because code-stencil holes may target data-stencil
    /// addresses; both land before execution permission is granted.
    ///
    /// # Safety
    ///
    /// `patches[Data]` and `patches[Code]` must point into a writable region
    /// with room for the respective bodies.
    #[expect(unsafe_code, reason = "raw copies into the staged RW region")]
    #[allow(clippy::as_conversions)]
    unsafe fn emit(&self, group: &StencilGroup, patches: &Patches) {
        let relax = self.config.relax_got_loads;
        let data = patches[HoleValue::Data] as usize as *mut u8;
        std::ptr::copy_nonoverlapping(group.data.body.as_ptr(), data, group.data.body.len());
        reloc::patch(data, &group.data, patches, relax);
        let code = patches[HoleValue::Code] as usize as *mut u8;
        std::ptr::copy_nonoverlapping(group.code.body.as_ptr(), code, group.code.body.len());
        reloc::patch(code, &group.code, patches, relax);
    }

    /// Detach and release `executor`'s compiled region.
    ///
    /// The handle is cleared before the pages go back to the OS, so a
    /// release failure (reported as a warning) cannot leave a dangling entry
    /// point. Idempotent: a handle with no region attached is left
    /// untouched.
    pub fn free(&self, executor: &mut ExecutorHandle) {
        let Some(region) = NonNull::new(executor.jit_code.cast_mut()) else {
            return;
        };
        let size = executor.jit_size;
        executor.jit_code = std::ptr::null();
        executor.jit_side_entry = std::ptr::null();
        executor.jit_size = 0;
        // Failure is unraisable here: the warning has been logged and the
        // handle is already cleared.
        let _ = memory::free(region, size);
        self.metrics.record_release();
        debug!(size, "released trace region");
    }
}
