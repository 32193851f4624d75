//! Lookup of the next definition of an interposed routine
//!
//! This is the only platform-specific seam of the layer. Everything else asks
//! a [`Resolve`] implementation for a symbol, so unit tests can substitute a
//! table of fake routines for `dlsym(RTLD_NEXT, ...)`.

use std::ffi::{c_void, CStr};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::errno::ErrnoGuard;
use crate::error::{Error, Result};

/// Finds the implementation a wrapper forwards to
pub trait Resolve {
    fn resolve(&self, name: &CStr) -> Result<NonNull<c_void>>;
}

/// `dlsym(RTLD_NEXT, name)`: the definition following this library in the
/// process's search order
#[derive(Debug, Clone, Copy, Default)]
pub struct DlsymResolver;

impl Resolve for DlsymResolver {
    fn resolve(&self, name: &CStr) -> Result<NonNull<c_void>> {
        // dlsym may touch errno even when it succeeds
        let _errno = ErrnoGuard::new();
        unsafe {
            // Clear any stale error first
            libc::dlerror();
            let symbol = libc::dlsym(libc::RTLD_NEXT, name.as_ptr());
            let error = libc::dlerror();
            if !error.is_null() {
                return Err(Error::SymbolNotFound {
                    name: name.to_string_lossy().into_owned(),
                    reason: CStr::from_ptr(error).to_string_lossy().into_owned(),
                });
            }
            NonNull::new(symbol).ok_or_else(|| Error::SymbolNotFound {
                name: name.to_string_lossy().into_owned(),
                reason: "resolved to NULL".to_string(),
            })
        }
    }
}

/// Cached address of one resolved routine
///
/// Written at most once with a "resolve if empty" check. Two callers racing on
/// an empty slot both resolve the same name and store the same address.
#[derive(Debug)]
pub struct Slot {
    address: AtomicPtr<c_void>,
}

impl Slot {
    pub const fn new() -> Self {
        Self {
            address: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub fn is_resolved(&self) -> bool {
        !self.address.load(Ordering::Acquire).is_null()
    }

    /// Address for `name`, resolving on first use
    ///
    /// Aborts the process when the routine cannot be found: there is nothing
    /// to forward to, and calling ourselves would recurse forever.
    pub fn address(&self, resolver: &impl Resolve, name: &CStr) -> NonNull<c_void> {
        if let Some(address) = NonNull::new(self.address.load(Ordering::Acquire)) {
            return address;
        }
        match resolver.resolve(name) {
            Ok(address) => {
                self.address.store(address.as_ptr(), Ordering::Release);
                address
            }
            Err(err) => {
                tracing::error!(%err, "cannot forward intercepted call");
                std::process::abort();
            }
        }
    }

    /// Typed function pointer for `name`
    ///
    /// # Safety
    ///
    /// `F` must be an `extern "C"` function pointer type matching the real
    /// signature of `name`.
    pub unsafe fn get<F: Copy>(&self, resolver: &impl Resolve, name: &CStr) -> F {
        debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<*mut c_void>());
        let address = self.address(resolver, name).as_ptr();
        unsafe { std::mem::transmute_copy::<*mut c_void, F>(&address) }
    }
}

impl Default for Slot {
    fn default() -> Self {
        Self::new()
    }
}
