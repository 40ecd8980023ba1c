//! Baked stencil tables for the host target.
//!
//! This file is the output slot of the offline stencil builder, which
//! compiles one template pair per uop opcode and regenerates the tables for
//! each target. The checked-in copy carries only the two entry tags and the
//! fatal-error guard, enough for the crate to build and its tests to link
//! before the first generation; real per-opcode groups replace [`TABLES`]
//! wholesale.

use super::{Stencil, StencilGroup, StencilTables};

const EMPTY: Stencil = Stencil { body: &[], holes: &[] };

const EMPTY_GROUP: StencilGroup = StencilGroup { code: EMPTY, data: EMPTY };

/// Host trap instruction, used by the tail guard to catch any fall-through
/// past the last uop before it reaches the data half.
#[cfg(target_arch = "x86_64")]
const TRAP: &[u8] = &[0x0F, 0x0B]; // ud2
#[cfg(target_arch = "aarch64")]
const TRAP: &[u8] = &[0x00, 0x00, 0x20, 0xD4]; // brk #0
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
const TRAP: &[u8] = &[];

const TRAP_GROUP: StencilGroup = StencilGroup {
    code: Stencil { body: TRAP, holes: &[] },
    data: EMPTY,
};

// Indexed by the opcode tags in `crate::trace`.
static GROUPS: [StencilGroup; 3] = [
    EMPTY_GROUP, // START_EXECUTOR
    EMPTY_GROUP, // COLD_EXIT
    TRAP_GROUP,  // FATAL_ERROR
];

/// The tables the host runtime compiles against. On targets where native and
/// JIT calling conventions coincide, the trampoline body is empty and its
/// emission is a zero-byte copy.
pub static TABLES: StencilTables = StencilTables {
    trampoline: EMPTY_GROUP,
    groups: &GROUPS,
};
