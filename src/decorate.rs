//! Marker emission around a decorated call
//!
//! `enter` writes the pre-marker, `leave` the post-marker, both through the
//! real (resolved) write routine. A depth counter per kind makes nested
//! intercepted calls for the same logical operation silent: some stdio
//! implementations flush through another hooked routine, and the marker would
//! otherwise show up twice.

use std::ffi::c_void;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errno::ErrnoGuard;

/// Where a wrapped routine writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Raw descriptor, markers go through `write`
    Fd(RawFd),
    /// stdio stream, markers go through `fwrite` so they stay ordered with
    /// buffered data
    Stream(*mut libc::FILE),
}

impl Target {
    /// Descriptor behind the target, -1 for a NULL stream
    pub fn fd(&self) -> RawFd {
        match *self {
            Target::Fd(fd) => fd,
            Target::Stream(stream) if stream.is_null() => -1,
            Target::Stream(stream) => unsafe { libc::fileno(stream) },
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Target::Fd(_) => Kind::Fd,
            Target::Stream(_) => Kind::Stream,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Fd = 0,
    Stream = 1,
}

/// Recursion depth per decoration kind
#[derive(Debug, Default)]
pub struct Depth {
    levels: [AtomicUsize; 2],
}

impl Depth {
    pub const fn new() -> Self {
        Self {
            levels: [AtomicUsize::new(0), AtomicUsize::new(0)],
        }
    }

    /// Increment; returns true for the outermost level
    pub fn enter(&self, kind: Kind) -> bool {
        self.levels[kind as usize].fetch_add(1, Ordering::AcqRel) == 0
    }

    /// Decrement; returns true when the outermost level is left
    pub fn leave(&self, kind: Kind) -> bool {
        let level = &self.levels[kind as usize];
        // Never wrap below zero on an unbalanced leave
        match level.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1)) {
            Ok(previous) => previous == 1,
            Err(_) => false,
        }
    }

    pub fn current(&self, kind: Kind) -> usize {
        self.levels[kind as usize].load(Ordering::Acquire)
    }
}

/// Raw output routines used for markers
pub type WriteFn =
    unsafe extern "C" fn(libc::c_int, *const c_void, libc::size_t) -> libc::ssize_t;
pub type FwriteFn = unsafe extern "C" fn(
    *const c_void,
    libc::size_t,
    libc::size_t,
    *mut libc::FILE,
) -> libc::size_t;

/// Write `bytes` to `target` through the real routine for its kind
///
/// The routine is only resolved when needed. Marker output is best effort:
/// short writes and errors are ignored, and `errno` is left as it was.
pub fn emit(
    target: Target,
    bytes: &[u8],
    write: impl FnOnce() -> WriteFn,
    fwrite: impl FnOnce() -> FwriteFn,
) {
    if bytes.is_empty() {
        return;
    }
    let _errno = ErrnoGuard::new();
    unsafe {
        match target {
            Target::Fd(fd) => {
                write()(fd, bytes.as_ptr().cast(), bytes.len());
            }
            Target::Stream(stream) => {
                fwrite()(bytes.as_ptr().cast(), bytes.len(), 1, stream);
            }
        }
    }
}
