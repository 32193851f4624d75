//! Process creation and image replacement
//!
//! A new image starts with fresh memory, so the tracked set crosses `exec`
//! only through the environment. Every exec form is funneled into one of
//! `execve`, `execvpe` or `fexecve` with an explicit environment array that
//! carries the current set.

use std::ffi::{c_char, c_int};

use fdcolor::errno::ErrnoGuard;
use fdcolor::resolver::Slot;
use libc::pid_t;

use crate::context;

type Argv = *const *const c_char;

extern "C" {
    #[link_name = "environ"]
    static ENVIRON: Argv;
}

pub(crate) fn current_environment() -> Argv {
    unsafe { ENVIRON }
}

/// `vfork` shares memory with the parent until the child execs. Descriptor
/// bookkeeping in the child would corrupt the parent's set, so this is a
/// plain `fork`.
#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn vfork() -> pid_t {
    static REAL: Slot = Slot::new();
    let real: unsafe extern "C" fn() -> pid_t = unsafe { REAL.get(context().resolver(), c"fork") };
    tracing::debug!("vfork replaced by fork");
    unsafe { real() }
}

/// Run `exec` with the environment for the new image
///
/// The returned value and `errno` are those of the failed `exec`.
unsafe fn with_child_environment(envp: Argv, exec: impl FnOnce(Argv) -> c_int) -> c_int {
    let child = unsafe { context().child_environment(envp) };
    let result = exec(child.as_ref().map_or(envp, |env| env.as_ptr()));
    let _errno = ErrnoGuard::new();
    drop(child);
    result
}

type ExecveFn = unsafe extern "C" fn(*const c_char, Argv, Argv) -> c_int;

unsafe fn real_execve(path: *const c_char, argv: Argv, envp: Argv) -> c_int {
    static REAL: Slot = Slot::new();
    let real: ExecveFn = unsafe { REAL.get(context().resolver(), c"execve") };
    unsafe { with_child_environment(envp, |envp| real(path, argv, envp)) }
}

unsafe fn real_execvpe(file: *const c_char, argv: Argv, envp: Argv) -> c_int {
    static REAL: Slot = Slot::new();
    let real: ExecveFn = unsafe { REAL.get(context().resolver(), c"execvpe") };
    unsafe { with_child_environment(envp, |envp| real(file, argv, envp)) }
}

#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn execve(path: *const c_char, argv: Argv, envp: Argv) -> c_int {
    unsafe { real_execve(path, argv, envp) }
}

#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn execv(path: *const c_char, argv: Argv) -> c_int {
    unsafe { real_execve(path, argv, current_environment()) }
}

#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn execvp(file: *const c_char, argv: Argv) -> c_int {
    unsafe { real_execvpe(file, argv, current_environment()) }
}

#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn execvpe(file: *const c_char, argv: Argv, envp: Argv) -> c_int {
    unsafe { real_execvpe(file, argv, envp) }
}

#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn fexecve(fd: c_int, argv: Argv, envp: Argv) -> c_int {
    static REAL: Slot = Slot::new();
    let real: unsafe extern "C" fn(c_int, Argv, Argv) -> c_int =
        unsafe { REAL.get(context().resolver(), c"fexecve") };
    unsafe { with_child_environment(envp, |envp| real(fd, argv, envp)) }
}
