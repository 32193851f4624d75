//! The interception context: all process-wide state of the layer
//!
//! One value owns the tracked descriptor set, the settings read at first use,
//! the recursion depth counters and the resolved marker routines. The preload
//! library keeps exactly one of these in a static; tests build their own with
//! a fake resolver and an in-memory environment.
//!
//! Initialization is lazy. The first query (from any wrapper) reads the
//! environment once; later calls only load an atomic.
//!
//! Nothing here waits on a lock. Wrappers run inside signal handlers and in
//! children forked from multithreaded programs, where a lock may be held by
//! code that will never release it.

use std::ffi::c_char;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::OnceLock;

use crate::codec::{self, ChildEnvironment};
use crate::config::{Environment, Markers, ProcessEnv, Settings, ENV_FDS, ENV_PRIVATE_FDS};
use crate::decorate::{self, Depth, FwriteFn, Target, WriteFn};
use crate::errno::ErrnoGuard;
use crate::resolver::{DlsymResolver, Resolve, Slot};
use crate::tracked::{SharedFds, TrackedFds};

const UNINITIALIZED: u8 = 0;
const INITIALIZING: u8 = 1;
const INITIALIZED: u8 = 2;

pub struct InterceptionContext<R = DlsymResolver, E = ProcessEnv> {
    resolver: R,
    env: E,
    state: AtomicU8,
    tracked: SharedFds,
    /// A descriptor list variable was present at initialization
    configured: AtomicBool,
    force_write: AtomicBool,
    markers: OnceLock<Markers>,
    depth: Depth,
    write: Slot,
    fwrite: Slot,
}

impl<R: Resolve, E: Environment> InterceptionContext<R, E> {
    pub const fn new(resolver: R, env: E) -> Self {
        Self {
            resolver,
            env,
            state: AtomicU8::new(UNINITIALIZED),
            tracked: SharedFds::new(),
            configured: AtomicBool::new(false),
            force_write: AtomicBool::new(false),
            markers: OnceLock::new(),
            depth: Depth::new(),
            write: Slot::new(),
            fwrite: Slot::new(),
        }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    pub fn environment(&self) -> &E {
        &self.env
    }

    pub fn is_initialized(&self) -> bool {
        self.state.load(Ordering::Acquire) == INITIALIZED
    }

    /// Load settings and the tracked set on first call
    ///
    /// A call arriving while initialization is running (a hook triggered from
    /// inside it) returns immediately and sees an empty set.
    pub fn ensure_initialized(&self) {
        if self.is_initialized() {
            return;
        }
        if self
            .state
            .compare_exchange(UNINITIALIZED, INITIALIZING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.initialize();
            self.state.store(INITIALIZED, Ordering::Release);
        }
    }

    fn initialize(&self) {
        debug_assert_eq!(self.state.load(Ordering::Acquire), INITIALIZING);
        let _errno = ErrnoGuard::new();

        let settings = Settings::load(&self.env);
        let tracked = match settings.fds.as_deref() {
            Some(_) if settings.ignored => {
                tracing::debug!("program is ignored, tracking disabled");
                TrackedFds::new()
            }
            Some(text) => codec::decode(text),
            None => TrackedFds::new(),
        };
        tracing::debug!(
            source = ?settings.source,
            tracked = %codec::encode(&tracked),
            force_write = settings.force_write,
            "initialized from environment"
        );

        self.force_write
            .store(settings.force_write, Ordering::Release);
        self.configured
            .store(settings.configured(), Ordering::Release);
        // Only this function writes the markers, and the state machine runs
        // it at most once
        let stored = self.markers.set(settings.markers).is_ok();
        debug_assert!(stored, "markers written twice");

        if !self.tracked.store(&tracked) {
            tracing::warn!("tracked descriptor list busy during initialization");
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.ensure_initialized();
        self.tracked.count()
    }

    pub fn is_tracked(&self, fd: RawFd) -> bool {
        self.tracked_count() != 0 && self.tracked.contains(fd)
    }

    /// Copy of the current set
    pub fn snapshot(&self) -> TrackedFds {
        self.ensure_initialized();
        self.tracked.snapshot()
    }

    /// `None` until initialization has finished
    pub fn markers(&self) -> Option<&Markers> {
        self.markers.get()
    }

    /// Tracked, and a terminal unless forced
    ///
    /// Invalid descriptors are rejected before any terminal check.
    pub fn should_decorate(&self, fd: RawFd) -> bool {
        let _errno = ErrnoGuard::new();
        if fd < 0 || !self.is_tracked(fd) {
            return false;
        }
        self.force_write.load(Ordering::Acquire) || unsafe { libc::isatty(fd) } == 1
    }

    /// Decorate the call about to be made on `target`
    ///
    /// The pre-marker is written now, the post-marker when the returned guard
    /// is dropped. Drop the guard right after the wrapped call returns.
    pub fn decorate(&self, target: Target) -> Decoration<'_, R, E> {
        let active = self.should_decorate(target.fd());
        if active {
            self.enter(target);
        }
        Decoration {
            context: self,
            target: active.then_some(target),
        }
    }

    /// Pre-marker, unless nested inside another decorated call of this kind
    pub fn enter(&self, target: Target) {
        if self.depth.enter(target.kind()) {
            if let Some(markers) = self.markers() {
                self.emit(target, &markers.pre);
            }
        }
    }

    /// Post-marker when the outermost decorated call finishes
    pub fn leave(&self, target: Target) {
        if self.depth.leave(target.kind()) {
            if let Some(markers) = self.markers() {
                self.emit(target, &markers.post);
            }
        }
    }

    fn emit(&self, target: Target, bytes: &[u8]) {
        decorate::emit(
            target,
            bytes,
            || unsafe { self.write.get::<WriteFn>(&self.resolver, c"write") },
            || unsafe { self.fwrite.get::<FwriteFn>(&self.resolver, c"fwrite") },
        );
    }

    /// `newfd` now refers to what `oldfd` refers to
    ///
    /// A tracked source makes the copy tracked; an untracked source clears
    /// whatever `newfd` meant before.
    pub fn dup_fd(&self, oldfd: RawFd, newfd: RawFd) {
        let _errno = ErrnoGuard::new();
        if self.tracked_count() == 0 {
            return;
        }
        let changed = if self.tracked.contains(oldfd) {
            self.tracked.add(newfd)
        } else {
            self.tracked.remove(newfd)
        };
        match changed {
            Some(true) => {}
            Some(false) => return,
            None => {
                tracing::warn!(oldfd, newfd, "tracked descriptor list busy, duplicate not recorded");
                return;
            }
        }
        let encoded = codec::encode(&self.tracked.snapshot());
        tracing::debug!(oldfd, newfd, tracked = %encoded, "duplicated descriptor");
        self.sync_environment(&encoded);
    }

    /// `fd` was closed, forget it
    pub fn close_fd(&self, fd: RawFd) {
        let _errno = ErrnoGuard::new();
        if self.tracked_count() == 0 {
            return;
        }
        match self.tracked.remove(fd) {
            Some(true) => {}
            Some(false) => return,
            None => {
                tracing::warn!(fd, "tracked descriptor list busy, close not recorded");
                return;
            }
        }
        let encoded = codec::encode(&self.tracked.snapshot());
        tracing::debug!(fd, tracked = %encoded, "closed descriptor");
        self.sync_environment(&encoded);
    }

    /// Keep this process's own environment in step with the set, for children
    /// started by routines that read it directly
    fn sync_environment(&self, encoded: &str) {
        self.env.set_var(ENV_PRIVATE_FDS, encoded);
        self.env.remove_var(ENV_FDS);
    }

    /// Environment for a new process image built from `envp`
    ///
    /// `None` when the layer was never configured: the caller's array is then
    /// passed on untouched.
    ///
    /// # Safety
    ///
    /// `envp` must be NULL or a NULL-terminated array of C strings that
    /// outlives the result.
    pub unsafe fn child_environment(&self, envp: *const *const c_char) -> Option<ChildEnvironment> {
        let _errno = ErrnoGuard::new();
        self.ensure_initialized();
        if !self.configured.load(Ordering::Acquire) {
            return None;
        }
        let encoded = codec::encode(&self.tracked.snapshot());
        tracing::debug!(tracked = %encoded, "propagating to new image");
        Some(unsafe { ChildEnvironment::new(envp, &encoded) })
    }
}

impl Default for InterceptionContext {
    fn default() -> Self {
        Self::new(DlsymResolver, ProcessEnv)
    }
}

/// Pending post-marker of a decorated call
#[must_use = "the post-marker is written when the decoration is dropped"]
pub struct Decoration<'a, R: Resolve, E: Environment> {
    context: &'a InterceptionContext<R, E>,
    target: Option<Target>,
}

impl<R: Resolve, E: Environment> Decoration<'_, R, E> {
    pub fn is_active(&self) -> bool {
        self.target.is_some()
    }
}

impl<R: Resolve, E: Environment> Drop for Decoration<'_, R, E> {
    fn drop(&mut self) {
        if let Some(target) = self.target.take() {
            self.context.leave(target);
        }
    }
}
