//! Ambient `errno` preservation
//!
//! Every piece of bookkeeping done on behalf of an intercepted call may clobber
//! `errno` (isatty, dlsym, malloc, setenv). The caller must observe exactly the
//! value the wrapped routine left behind, so bookkeeping runs under a guard.

use nix::errno::Errno;

/// Restores the `errno` captured at construction when dropped
#[must_use = "errno is restored when the guard is dropped"]
pub struct ErrnoGuard {
    saved: i32,
}

impl ErrnoGuard {
    pub fn new() -> Self {
        Self {
            saved: Errno::last_raw(),
        }
    }

    /// The value that will be restored
    pub fn saved(&self) -> i32 {
        self.saved
    }
}

impl Default for ErrnoGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ErrnoGuard {
    fn drop(&mut self) {
        Errno::set_raw(self.saved);
    }
}

/// Run `f` without letting it change `errno`
pub fn preserving<T>(f: impl FnOnce() -> T) -> T {
    let _guard = ErrnoGuard::new();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_restores_errno() {
        Errno::set_raw(libc::EBADF);
        {
            let guard = ErrnoGuard::new();
            assert_eq!(guard.saved(), libc::EBADF);
            Errno::set_raw(libc::ENOTTY);
        }
        assert_eq!(Errno::last_raw(), libc::EBADF);
    }

    #[test]
    fn test_preserving_returns_value() {
        Errno::set_raw(libc::EINTR);
        let value = preserving(|| {
            // isatty on a closed descriptor sets EBADF
            unsafe { libc::isatty(-1) }
        });
        assert_eq!(value, 0);
        assert_eq!(Errno::last_raw(), libc::EINTR);
    }
}
