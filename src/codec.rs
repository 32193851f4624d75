//! Descriptor list encoding for environment propagation
//!
//! Format: each descriptor in decimal followed by a comma, e.g. `"2,4,"`.
//! The empty string is the empty set. Malformed or negative entries are
//! skipped when decoding.
//!
//! [`ChildEnvironment`] builds the environment block handed to a new process
//! image: a copy of the caller's array with the propagated list written in and
//! the user-facing list dropped.

use std::ffi::{c_char, CStr, CString};
use std::fmt::Write as _;
use std::os::unix::io::RawFd;

use crate::config::{ENV_FDS, ENV_PRIVATE_FDS};
use crate::error::{Error, Result};
use crate::tracked::TrackedFds;

/// Decimal digits of the largest descriptor that gets serialized
pub const MAX_ENTRY_WIDTH: usize = 10;

const SEPARATOR: char = ',';

/// Parse a single list entry
pub fn parse_entry(entry: &str) -> Result<RawFd> {
    let invalid = || Error::InvalidEntry {
        entry: entry.to_string(),
    };
    if entry.is_empty() || !entry.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    entry.parse::<RawFd>().map_err(|_| invalid())
}

/// Decode a descriptor list
///
/// Entries are only taken when terminated by a separator, matching the
/// trailing-comma format written by [`encode`]; empty entries are ignored.
pub fn decode(text: &str) -> TrackedFds {
    let mut set = TrackedFds::new();
    let mut entries: Vec<&str> = text.split(SEPARATOR).collect();
    // Whatever follows the last separator is unterminated
    entries.pop();

    for entry in entries.into_iter().filter(|entry| !entry.is_empty()) {
        match parse_entry(entry) {
            Ok(fd) => {
                set.add(fd);
            }
            Err(err) => tracing::debug!(%err, "skipping descriptor list entry"),
        }
    }
    set
}

/// Encode a descriptor set in iteration order
pub fn encode(set: &TrackedFds) -> String {
    let mut out = String::with_capacity(encoded_len_bound(set.count()));
    for fd in set.iter() {
        match encode_entry(fd) {
            Ok(entry) => {
                out.push_str(entry.as_str());
                out.push(SEPARATOR);
            }
            Err(err) => tracing::warn!(%err, "descriptor not propagated"),
        }
    }
    out
}

/// Upper bound of the encoded length of `count` descriptors
pub fn encoded_len_bound(count: usize) -> usize {
    count * (MAX_ENTRY_WIDTH + 1)
}

/// Fixed-width decimal buffer for one entry
struct Entry {
    buf: [u8; MAX_ENTRY_WIDTH],
    len: usize,
}

impl Entry {
    fn as_str(&self) -> &str {
        // Only ASCII digits are ever written
        std::str::from_utf8(&self.buf[..self.len]).unwrap_or_default()
    }
}

impl std::fmt::Write for Entry {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        let end = self.len + s.len();
        if end > self.buf.len() {
            return Err(std::fmt::Error);
        }
        self.buf[self.len..end].copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}

fn encode_entry(fd: RawFd) -> Result<Entry> {
    let mut entry = Entry {
        buf: [0; MAX_ENTRY_WIDTH],
        len: 0,
    };
    write!(entry, "{fd}").map_err(|_| Error::EntryTooWide {
        fd,
        width: MAX_ENTRY_WIDTH,
    })?;
    Ok(entry)
}

/// Environment block for a new process image
///
/// Entries are borrowed from the caller's array, which is never modified;
/// only the propagated list entry is owned. The caller's array must outlive
/// this value.
pub struct ChildEnvironment {
    _private: CString,
    pointers: Vec<*const c_char>,
}

impl ChildEnvironment {
    /// Copy `envp` (NULL is the empty environment) and write `encoded` as the
    /// propagated list
    ///
    /// An existing propagated entry is overwritten in place, later duplicates
    /// are dropped, otherwise the entry is appended. The user-facing list is
    /// removed: it has been consumed.
    ///
    /// # Safety
    ///
    /// `envp` must be NULL or a NULL-terminated array of NUL-terminated
    /// strings that stays valid while the result is used.
    pub unsafe fn new(envp: *const *const c_char, encoded: &str) -> Self {
        let private = CString::new(format!("{ENV_PRIVATE_FDS}={encoded}")).unwrap_or_default();
        let mut pointers = Vec::new();
        let mut replaced = false;

        for entry in unsafe { entries(envp) } {
            let bytes = unsafe { CStr::from_ptr(entry) }.to_bytes();
            if has_name(bytes, ENV_FDS) {
                continue;
            }
            if has_name(bytes, ENV_PRIVATE_FDS) {
                if !replaced {
                    pointers.push(private.as_ptr());
                    replaced = true;
                }
                continue;
            }
            pointers.push(entry);
        }
        if !replaced {
            pointers.push(private.as_ptr());
        }
        pointers.push(std::ptr::null());

        Self {
            _private: private,
            pointers,
        }
    }

    /// NULL-terminated array suitable for `execve`
    pub fn as_ptr(&self) -> *const *const c_char {
        self.pointers.as_ptr()
    }

    /// Entries without the terminator
    pub fn len(&self) -> usize {
        self.pointers.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Iterate a NULL-terminated pointer array
///
/// # Safety
///
/// `array` must be NULL or NULL-terminated.
pub unsafe fn entries<'a>(array: *const *const c_char) -> impl Iterator<Item = *const c_char> + 'a {
    let mut index = 0;
    std::iter::from_fn(move || {
        if array.is_null() {
            return None;
        }
        let entry = unsafe { *array.add(index) };
        if entry.is_null() {
            return None;
        }
        index += 1;
        Some(entry)
    })
}

fn has_name(entry: &[u8], name: &str) -> bool {
    entry
        .strip_prefix(name.as_bytes())
        .is_some_and(|rest| rest.first() == Some(&b'='))
}
