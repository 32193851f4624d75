//! Set of descriptors whose output gets decorated
//!
//! Low descriptors (the ones almost every program uses) live in a directly
//! indexed table. Anything at or above [`STATIC_SLOTS`] goes into an overflow
//! list that grows by [`GROWTH_STEP`] entries at a time, so no bound on the
//! largest descriptor is assumed.
//!
//! Iteration order is the serialization order: table entries ascending, then
//! overflow entries in insertion order.
//!
//! [`SharedFds`] is the process-wide form. It is reached from signal handlers
//! and from forked children of multithreaded programs, so it never blocks:
//! the table is atomic and the overflow list is only ever `try_lock`ed.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};

/// Descriptors below this value are looked up by index
pub const STATIC_SLOTS: usize = 128;

/// Overflow capacity is extended by this many entries when full
pub const GROWTH_STEP: usize = 10;

#[derive(Debug, Clone)]
pub struct TrackedFds {
    table: [bool; STATIC_SLOTS],
    overflow: Vec<RawFd>,
    count: usize,
}

impl TrackedFds {
    pub const fn new() -> Self {
        Self {
            table: [false; STATIC_SLOTS],
            overflow: Vec::new(),
            count: 0,
        }
    }

    /// Build a set from descriptors, skipping duplicates and negatives
    pub fn from_fds(fds: impl IntoIterator<Item = RawFd>) -> Self {
        let mut set = Self::new();
        for fd in fds {
            set.add(fd);
        }
        set
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        match slot(fd) {
            Some(Slot::Table(index)) => self.table[index],
            Some(Slot::Overflow) => self.overflow.contains(&fd),
            None => false,
        }
    }

    /// Insert `fd`; returns whether the set changed
    ///
    /// A failed overflow allocation drops the insertion: the descriptor is
    /// simply not decorated.
    pub fn add(&mut self, fd: RawFd) -> bool {
        match slot(fd) {
            Some(Slot::Table(index)) => {
                if self.table[index] {
                    return false;
                }
                self.table[index] = true;
            }
            Some(Slot::Overflow) => {
                if !push_overflow(&mut self.overflow, fd) {
                    return false;
                }
            }
            None => return false,
        }
        self.count += 1;
        true
    }

    /// Remove `fd`; returns whether it was present
    ///
    /// Overflow capacity is kept, it is reused by later insertions.
    pub fn remove(&mut self, fd: RawFd) -> bool {
        let removed = match slot(fd) {
            Some(Slot::Table(index)) => std::mem::replace(&mut self.table[index], false),
            Some(Slot::Overflow) => remove_overflow(&mut self.overflow, fd),
            None => false,
        };
        if removed {
            self.count -= 1;
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn clear(&mut self) {
        self.table = [false; STATIC_SLOTS];
        self.overflow.clear();
        self.count = 0;
    }

    /// Allocated overflow entries
    pub fn overflow_capacity(&self) -> usize {
        self.overflow.capacity()
    }

    pub fn iter(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.table
            .iter()
            .enumerate()
            .filter(|(_, tracked)| **tracked)
            .map(|(index, _)| index as RawFd)
            .chain(self.overflow.iter().copied())
    }
}

impl Default for TrackedFds {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for TrackedFds {
    /// Same members, regardless of insertion order
    fn eq(&self, other: &Self) -> bool {
        self.count == other.count
            && self.table == other.table
            && self.overflow.iter().all(|fd| other.overflow.contains(fd))
    }
}

impl Eq for TrackedFds {}

/// Tracked set shared between threads, signal handlers and forked children
///
/// Table lookups and updates are single atomic operations. The overflow list
/// sits behind a mutex that is only tried: when it is held elsewhere (another
/// thread, the code a signal handler interrupted, or a thread that no longer
/// exists after `fork`) an overflow descriptor reads as untracked and an
/// update to it is skipped, reported as `None`.
#[derive(Debug)]
pub struct SharedFds {
    table: [AtomicBool; STATIC_SLOTS],
    overflow: Mutex<Vec<RawFd>>,
    count: AtomicUsize,
}

impl SharedFds {
    pub const fn new() -> Self {
        Self {
            table: [const { AtomicBool::new(false) }; STATIC_SLOTS],
            overflow: Mutex::new(Vec::new()),
            count: AtomicUsize::new(0),
        }
    }

    fn try_overflow(&self) -> Option<MutexGuard<'_, Vec<RawFd>>> {
        match self.overflow.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        match slot(fd) {
            Some(Slot::Table(index)) => self.table[index].load(Ordering::Acquire),
            Some(Slot::Overflow) => self
                .try_overflow()
                .is_some_and(|overflow| overflow.contains(&fd)),
            None => false,
        }
    }

    /// Insert `fd`; whether the set changed, `None` if the overflow list was
    /// busy
    pub fn add(&self, fd: RawFd) -> Option<bool> {
        let added = match slot(fd) {
            Some(Slot::Table(index)) => !self.table[index].swap(true, Ordering::AcqRel),
            Some(Slot::Overflow) => push_overflow(&mut *self.try_overflow()?, fd),
            None => false,
        };
        if added {
            self.count.fetch_add(1, Ordering::AcqRel);
        }
        Some(added)
    }

    /// Remove `fd`; whether it was present, `None` if the overflow list was
    /// busy
    pub fn remove(&self, fd: RawFd) -> Option<bool> {
        let removed = match slot(fd) {
            Some(Slot::Table(index)) => self.table[index].swap(false, Ordering::AcqRel),
            Some(Slot::Overflow) => remove_overflow(&mut *self.try_overflow()?, fd),
            None => false,
        };
        if removed {
            self.count.fetch_sub(1, Ordering::AcqRel);
        }
        Some(removed)
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Make this the same set as `set`
    ///
    /// Returns false, leaving the overflow part as it was, if the overflow
    /// list was busy.
    pub fn store(&self, set: &TrackedFds) -> bool {
        let Some(mut overflow) = self.try_overflow() else {
            return false;
        };
        for (slot, &tracked) in self.table.iter().zip(set.table.iter()) {
            slot.store(tracked, Ordering::Release);
        }
        overflow.clear();
        overflow.extend_from_slice(&set.overflow);
        self.count.store(set.count, Ordering::Release);
        true
    }

    /// Copy of the current set
    ///
    /// Overflow entries are left out if the overflow list is busy.
    pub fn snapshot(&self) -> TrackedFds {
        let mut set = TrackedFds::new();
        for (index, slot) in self.table.iter().enumerate() {
            if slot.load(Ordering::Acquire) {
                set.table[index] = true;
                set.count += 1;
            }
        }
        match self.try_overflow() {
            Some(overflow) => {
                for &fd in overflow.iter() {
                    set.add(fd);
                }
            }
            None => tracing::warn!("tracked descriptor list busy, overflow entries left out"),
        }
        set
    }

    #[cfg(test)]
    pub(crate) fn hold_overflow(&self) -> MutexGuard<'_, Vec<RawFd>> {
        self.overflow.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for SharedFds {
    fn default() -> Self {
        Self::new()
    }
}

/// Append `fd` unless present, growing by [`GROWTH_STEP`] when full
///
/// A failed allocation drops the insertion: the descriptor is simply not
/// decorated.
fn push_overflow(overflow: &mut Vec<RawFd>, fd: RawFd) -> bool {
    if overflow.contains(&fd) {
        return false;
    }
    if overflow.len() == overflow.capacity() && overflow.try_reserve_exact(GROWTH_STEP).is_err() {
        tracing::warn!(
            fd,
            capacity = overflow.capacity(),
            "could not grow tracked descriptor list"
        );
        return false;
    }
    overflow.push(fd);
    true
}

/// Order-preserving removal
fn remove_overflow(overflow: &mut Vec<RawFd>, fd: RawFd) -> bool {
    match overflow.iter().position(|&x| x == fd) {
        Some(position) => {
            overflow.remove(position);
            true
        }
        None => false,
    }
}

enum Slot {
    Table(usize),
    Overflow,
}

fn slot(fd: RawFd) -> Option<Slot> {
    let index = usize::try_from(fd).ok()?;
    if index < STATIC_SLOTS {
        Some(Slot::Table(index))
    } else {
        Some(Slot::Overflow)
    }
}
