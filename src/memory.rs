//! Executable page management.
//!
//! Thin wrapper over the OS: anonymous RW page allocation, release, and the
//! one-way RW→RX transition with an instruction-cache flush. The region is
//! never writable and executable at the same time, and never reverts to
//! writable.
//!
//! Every failure is reported as a `tracing` warning carrying the OS error
//! code and returned as a [`JitError`]; this layer never aborts the process.

#[cfg(unix)]
use std::io;
use std::ptr::NonNull;

use tracing::warn;

use crate::errors::JitError;

#[cfg(test)]
thread_local! {
    /// When set, the next [`alloc`] on this thread fails with `ENOMEM`.
    pub(crate) static FAIL_NEXT_ALLOC: std::cell::Cell<bool> =
        const { std::cell::Cell::new(false) };
}

/// System page size, queried once.
#[cfg(unix)]
#[allow(clippy::as_conversions)]
pub fn page_size() -> usize {
    static PAGE_SIZE: std::sync::OnceLock<usize> = std::sync::OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        #[expect(unsafe_code, reason = "sysconf is a pure query")]
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        size as usize
    })
}

#[cfg(not(unix))]
pub fn page_size() -> usize {
    4096
}

#[cfg(unix)]
fn last_errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Reserve and commit `size` bytes of anonymous read+write memory.
///
/// `size` must be a positive multiple of the page size. On refusal the OS
/// error is logged and returned; the caller is expected to fall back to
/// interpreted execution.
#[cfg(unix)]
#[expect(unsafe_code, reason = "mmap of fresh anonymous pages")]
pub fn alloc(size: usize) -> Result<NonNull<u8>, JitError> {
    debug_assert!(size > 0);
    debug_assert_eq!(size % page_size(), 0);
    #[cfg(test)]
    if FAIL_NEXT_ALLOC.with(|fail| fail.replace(false)) {
        warn!("JIT unable to allocate memory ({})", libc::ENOMEM);
        return Err(JitError::AllocationFailed { errno: libc::ENOMEM });
    }
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        let errno = last_errno();
        warn!("JIT unable to allocate memory ({errno})");
        return Err(JitError::AllocationFailed { errno });
    }
    NonNull::new(ptr.cast()).ok_or(JitError::AllocationFailed { errno: 0 })
}

/// Release a region previously returned by [`alloc`]. `base` and `size` must
/// match the allocation exactly.
#[cfg(unix)]
#[expect(unsafe_code, reason = "munmap of a region this module mapped")]
pub fn free(base: NonNull<u8>, size: usize) -> Result<(), JitError> {
    debug_assert!(size > 0);
    debug_assert_eq!(size % page_size(), 0);
    let rc = unsafe { libc::munmap(base.as_ptr().cast(), size) };
    if rc != 0 {
        let errno = last_errno();
        warn!("JIT unable to free memory ({errno})");
        return Err(JitError::ReleaseFailed { errno });
    }
    Ok(())
}

/// Transition `[base, base + size)` to read+execute and flush the
/// instruction cache over it.
///
/// No thread may ever observe the region as both writable and executable;
/// the flush must happen before any control transfer into the region
/// (mandatory on AArch64, where a remote core may otherwise fetch stale
/// instructions).
#[cfg(unix)]
#[expect(unsafe_code, reason = "mprotect to RX on a region this module mapped")]
pub fn mark_executable(base: NonNull<u8>, size: usize) -> Result<(), JitError> {
    if size == 0 {
        return Ok(());
    }
    debug_assert_eq!(size % page_size(), 0);
    let rc = unsafe {
        libc::mprotect(
            base.as_ptr().cast(),
            size,
            libc::PROT_READ | libc::PROT_EXEC,
        )
    };
    if rc != 0 {
        let errno = last_errno();
        warn!("JIT unable to protect executable memory ({errno})");
        return Err(JitError::ProtectionFailed { errno });
    }
    flush_instruction_cache(base, size)
}

/// Flush the instruction cache over `[base, base + len)`.
///
/// A no-op on coherent-cache hosts (x86), but the call is made
/// unconditionally so the AArch64 path can never be skipped by accident.
#[cfg(target_os = "macos")]
#[expect(unsafe_code, reason = "libSystem cache-control call")]
pub fn flush_instruction_cache(base: NonNull<u8>, len: usize) -> Result<(), JitError> {
    extern "C" {
        fn sys_icache_invalidate(start: *mut libc::c_void, len: libc::size_t);
    }
    unsafe { sys_icache_invalidate(base.as_ptr().cast(), len) };
    Ok(())
}

#[cfg(all(unix, not(target_os = "macos")))]
#[expect(unsafe_code, reason = "compiler-rt cache-control call")]
pub fn flush_instruction_cache(base: NonNull<u8>, len: usize) -> Result<(), JitError> {
    extern "C" {
        fn __clear_cache(begin: *mut libc::c_char, end: *mut libc::c_char);
    }
    unsafe {
        __clear_cache(
            base.as_ptr().cast(),
            base.as_ptr().add(len).cast(),
        )
    };
    Ok(())
}

// Non-unix hosts: report the documented failures so compile() degrades to
// the interpreter fallback path.

#[cfg(not(unix))]
pub fn alloc(_size: usize) -> Result<NonNull<u8>, JitError> {
    warn!("JIT unable to allocate memory (0)");
    Err(JitError::AllocationFailed { errno: 0 })
}

#[cfg(not(unix))]
pub fn free(_base: NonNull<u8>, _size: usize) -> Result<(), JitError> {
    Err(JitError::ReleaseFailed { errno: 0 })
}

#[cfg(not(unix))]
pub fn mark_executable(_base: NonNull<u8>, _size: usize) -> Result<(), JitError> {
    Err(JitError::ProtectionFailed { errno: 0 })
}

#[cfg(not(unix))]
pub fn flush_instruction_cache(_base: NonNull<u8>, _len: usize) -> Result<(), JitError> {
    Err(JitError::CacheFlushFailed { errno: 0 })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_a_power_of_two() {
        let page = page_size();
        assert!(page > 0);
        assert!(page.is_power_of_two());
    }

    #[test]
    fn alloc_returns_page_aligned_writable_memory() {
        let page = page_size();
        let base = alloc(page * 2).expect("allocation failed");
        assert_eq!(base.as_ptr() as usize % page, 0);
        #[expect(unsafe_code, reason = "writing freshly mapped RW pages")]
        unsafe {
            base.as_ptr().write(0xC3);
            assert_eq!(base.as_ptr().read(), 0xC3);
        }
        free(base, page * 2).expect("release failed");
    }

    #[test]
    fn mark_executable_keeps_contents_readable() {
        let page = page_size();
        let base = alloc(page).expect("allocation failed");
        #[expect(unsafe_code, reason = "writing freshly mapped RW pages")]
        unsafe {
            base.as_ptr().write(0x90);
        }
        mark_executable(base, page).expect("protection failed");
        #[expect(unsafe_code, reason = "RX pages stay readable")]
        unsafe {
            assert_eq!(base.as_ptr().read(), 0x90);
        }
        free(base, page).expect("release failed");
    }

    #[test]
    fn mark_executable_of_empty_region_is_a_no_op() {
        let page = page_size();
        let base = alloc(page).expect("allocation failed");
        assert_eq!(mark_executable(base, 0), Ok(()));
        free(base, page).expect("release failed");
    }
}
