//! Descriptor duplication and closing
//!
//! The real call runs first for duplication, so a failed call changes
//! nothing. Closing forgets the descriptor before the real call: whatever
//! the outcome, the number no longer names the stream that was tracked.

use std::ffi::c_int;

use fdcolor::resolver::Slot;
use libc::FILE;

use crate::context;

#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn dup(oldfd: c_int) -> c_int {
    static REAL: Slot = Slot::new();
    let context = context();
    let real: unsafe extern "C" fn(c_int) -> c_int = unsafe { REAL.get(context.resolver(), c"dup") };
    let newfd = unsafe { real(oldfd) };
    if newfd != -1 {
        context.dup_fd(oldfd, newfd);
    }
    newfd
}

#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn dup2(oldfd: c_int, newfd: c_int) -> c_int {
    static REAL: Slot = Slot::new();
    let context = context();
    let real: unsafe extern "C" fn(c_int, c_int) -> c_int =
        unsafe { REAL.get(context.resolver(), c"dup2") };
    let result = unsafe { real(oldfd, newfd) };
    if result != -1 {
        context.dup_fd(oldfd, result);
    }
    result
}

#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn dup3(oldfd: c_int, newfd: c_int, flags: c_int) -> c_int {
    static REAL: Slot = Slot::new();
    let context = context();
    let real: unsafe extern "C" fn(c_int, c_int, c_int) -> c_int =
        unsafe { REAL.get(context.resolver(), c"dup3") };
    let result = unsafe { real(oldfd, newfd, flags) };
    if result != -1 {
        context.dup_fd(oldfd, result);
    }
    result
}

fn duplicates(cmd: c_int) -> bool {
    cmd == libc::F_DUPFD || cmd == libc::F_DUPFD_CLOEXEC
}

/// `fcntl` with its optional argument taken as one machine word
///
/// Every command passes either nothing, an int or a pointer in the first
/// integer argument register on these targets, so forwarding that register
/// unchanged is exact.
#[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
unsafe fn forward_fcntl(
    slot: &'static Slot,
    name: &std::ffi::CStr,
    fd: c_int,
    cmd: c_int,
    arg: libc::c_ulong,
) -> c_int {
    let context = context();
    let real: unsafe extern "C" fn(c_int, c_int, libc::c_ulong) -> c_int =
        unsafe { slot.get(context.resolver(), name) };
    let result = unsafe { real(fd, cmd, arg) };
    if duplicates(cmd) && result != -1 {
        context.dup_fd(fd, result);
    }
    result
}

#[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn fcntl(fd: c_int, cmd: c_int, arg: libc::c_ulong) -> c_int {
    static REAL: Slot = Slot::new();
    unsafe { forward_fcntl(&REAL, c"fcntl", fd, cmd, arg) }
}

#[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn fcntl64(fd: c_int, cmd: c_int, arg: libc::c_ulong) -> c_int {
    static REAL: Slot = Slot::new();
    unsafe { forward_fcntl(&REAL, c"fcntl64", fd, cmd, arg) }
}

#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn close(fd: c_int) -> c_int {
    static REAL: Slot = Slot::new();
    let context = context();
    let real: unsafe extern "C" fn(c_int) -> c_int = unsafe { REAL.get(context.resolver(), c"close") };
    context.close_fd(fd);
    unsafe { real(fd) }
}

#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn fclose(stream: *mut FILE) -> c_int {
    static REAL: Slot = Slot::new();
    let context = context();
    let real: unsafe extern "C" fn(*mut FILE) -> c_int =
        unsafe { REAL.get(context.resolver(), c"fclose") };
    if !stream.is_null() {
        context.close_fd(unsafe { libc::fileno(stream) });
    }
    unsafe { real(stream) }
}
