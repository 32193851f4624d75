//! fdcolor-preload - the interposition library
//!
//! Built as a shared object and loaded ahead of libc with `LD_PRELOAD`. It
//! exports wrappers for the output routines, the descriptor management calls
//! and the process image calls of the C library. All state lives in one
//! [`InterceptionContext`] from the `fdcolor` crate.
//!
//! Wrappers are only exported from the shared object itself. In this crate's
//! own unit tests they are ordinary functions that forward to the real libc.
//!
//! The printf/err/error/execl families take C variadic arguments. Their
//! bodies are C (`csrc/variadic.c`) and forward to the `va_list` wrappers;
//! the `shim` module exports the public names.

use std::sync::atomic::{AtomicBool, Ordering};

use fdcolor::config::ProcessEnv;
use fdcolor::resolver::DlsymResolver;
use fdcolor::InterceptionContext;

#[macro_use]
mod macros;

mod fds;
mod output;
mod process;
#[cfg(all(
    not(test),
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
mod shim;

static CONTEXT: InterceptionContext = InterceptionContext::new(DlsymResolver, ProcessEnv);
static LOGGING: AtomicBool = AtomicBool::new(false);

/// The process-wide context
///
/// The first caller also installs the file logger. A wrapper reached again
/// while that is running skips it instead of waiting on itself.
pub(crate) fn context() -> &'static InterceptionContext {
    if !LOGGING.load(Ordering::Acquire) && !LOGGING.swap(true, Ordering::AcqRel) {
        fdcolor::errno::preserving(fdcolor::log::install);
    }
    &CONTEXT
}
