//! # stencil-jit
//!
//! A copy-and-patch JIT backend for a bytecode-interpreter runtime.
//!
//! The upstream tracing tier hands us a linear trace of micro-ops (uops); we
//! materialize it as one contiguous, page-aligned region of native code plus
//! a companion data block, ready for the interpreter to enter. Each uop maps
//! to a precompiled machine-code template (a *stencil*) with symbolic holes;
//! compiling a trace is a matter of copying the templates back to back and
//! filling every hole with the right runtime address or immediate.
//!
//! ## Architecture
//!
//! ```text
//! uop trace ──► size pass ──► page alloc (RW) ──► emit ──► RW→RX flip ──► publish
//!                │                                 │                        │
//!                │  per-uop stencil sizes          │  copy bodies,          │  executor.jit_code
//!                │  + trampoline + tail guard      │  patch holes           │  executor.jit_side_entry
//! ```
//!
//! The hard part is the relocation engine ([`reloc`]): a minimal in-process
//! relocating loader that performs the bit-exact arithmetic for every
//! relocation convention the offline stencil builder can emit (x86-64
//! PC-relative, AArch64 ADRP/ADD pairs and MOVK chains, GOT-load
//! relaxations), unified behind one dispatch.
//!
//! ## Out of scope
//!
//! The trace optimizer that produces the uop sequence, the offline builder
//! that compiles stencil templates, and the executor object lifecycle all
//! live in the host runtime. This crate only reads the executor's exit count
//! and writes its three JIT fields.

pub mod bits;
pub mod compiler;
pub mod errors;
pub mod memory;
pub mod reloc;
pub mod stencils;
pub mod trace;
pub mod types;

pub use compiler::JitCompiler;
pub use errors::JitError;
pub use stencils::{Hole, HoleKind, HoleValue, Patches, Stencil, StencilGroup, StencilTables};
pub use trace::{ExecutorHandle, UopFormat, UopInstruction};
pub use types::{JitConfig, JitMetrics};
