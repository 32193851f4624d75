//! Settings read from the environment at first use
//!
//! The tracked descriptor list comes from one of two variables: the
//! user-facing `FDCOLOR_FDS`, consumed once, or `FDCOLOR_PRIVATE_FDS`, which
//! this layer writes for its descendants. Marker strings, the force flag and
//! the ignore list are read in the same pass.

use std::ffi::{CStr, CString, OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// User-facing list of descriptors to decorate
pub const ENV_FDS: &str = "FDCOLOR_FDS";
/// List propagated to children after the layer has taken over
pub const ENV_PRIVATE_FDS: &str = "FDCOLOR_PRIVATE_FDS";
pub const ENV_PRE_STRING: &str = "FDCOLOR_PRE_STRING";
pub const ENV_POST_STRING: &str = "FDCOLOR_POST_STRING";
/// Decorate even when the descriptor is not a terminal (tests)
pub const ENV_FORCE_WRITE: &str = "FDCOLOR_FORCE_WRITE";
/// Comma separated program names for which tracking is disabled
pub const ENV_IGNORED_BINARIES: &str = "FDCOLOR_IGNORED_BINARIES";

/// Bright red
pub const DEFAULT_PRE_STRING: &[u8] = b"\x1b[91m";
/// Reset all attributes
pub const DEFAULT_POST_STRING: &[u8] = b"\x1b[0m";

/// Access to a process environment
///
/// `ProcessEnv` is the real one; tests hand the context an in-memory map.
pub trait Environment {
    fn var_os(&self, name: &str) -> Option<OsString>;
    fn set_var(&self, name: &str, value: &str);
    fn remove_var(&self, name: &str);
    /// Base name of the running program, if known
    fn program_name(&self) -> Option<OsString>;
}

/// The environment of the current process
///
/// Goes to libc directly: std's environment lock may be held by a thread
/// that does not exist in a forked child.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn var_os(&self, name: &str) -> Option<OsString> {
        let name = CString::new(name).ok()?;
        let value = unsafe { libc::getenv(name.as_ptr()) };
        if value.is_null() {
            return None;
        }
        let value = unsafe { CStr::from_ptr(value) };
        Some(OsStr::from_bytes(value.to_bytes()).to_os_string())
    }

    fn set_var(&self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (CString::new(name), CString::new(value)) {
            unsafe { libc::setenv(name.as_ptr(), value.as_ptr(), 1) };
        }
    }

    fn remove_var(&self, name: &str) {
        if let Ok(name) = CString::new(name) {
            unsafe { libc::unsetenv(name.as_ptr()) };
        }
    }

    fn program_name(&self) -> Option<OsString> {
        let argv0 = std::env::args_os().next()?;
        Path::new(&argv0).file_name().map(|name| name.to_os_string())
    }
}

/// Where the tracked list was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdSource {
    /// `FDCOLOR_FDS`
    User,
    /// `FDCOLOR_PRIVATE_FDS`
    Propagated,
    /// Neither variable was set
    Unset,
}

/// Begin/end decoration bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    pub pre: Vec<u8>,
    pub post: Vec<u8>,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            pre: DEFAULT_PRE_STRING.to_vec(),
            post: DEFAULT_POST_STRING.to_vec(),
        }
    }
}

/// Everything the interception context needs from its environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Encoded descriptor list, `None` when unset
    pub fds: Option<String>,
    pub source: FdSource,
    pub markers: Markers,
    pub force_write: bool,
    /// The running program is on the ignore list
    pub ignored: bool,
}

impl Settings {
    pub fn load(env: &impl Environment) -> Self {
        let (fds, source) = match env.var_os(ENV_FDS) {
            Some(value) => (Some(lossy(value)), FdSource::User),
            None => match env.var_os(ENV_PRIVATE_FDS) {
                Some(value) => (Some(lossy(value)), FdSource::Propagated),
                None => (None, FdSource::Unset),
            },
        };

        let pre = env
            .var_os(ENV_PRE_STRING)
            .map(|value| value.as_bytes().to_vec())
            .unwrap_or_else(|| DEFAULT_PRE_STRING.to_vec());
        let post = env
            .var_os(ENV_POST_STRING)
            .map(|value| value.as_bytes().to_vec())
            .unwrap_or_else(|| DEFAULT_POST_STRING.to_vec());

        let force_write = env
            .var_os(ENV_FORCE_WRITE)
            .is_some_and(|value| !value.is_empty());

        let ignored = match (env.var_os(ENV_IGNORED_BINARIES), env.program_name()) {
            (Some(list), Some(program)) => is_ignored(list.as_bytes(), program.as_bytes()),
            _ => false,
        };

        Self {
            fds,
            source,
            markers: Markers { pre, post },
            force_write,
            ignored,
        }
    }

    /// Whether either descriptor variable was present
    pub fn configured(&self) -> bool {
        self.source != FdSource::Unset
    }
}

/// Match `program` against a comma separated list of names
pub fn is_ignored(list: &[u8], program: &[u8]) -> bool {
    list.split(|&b| b == b',')
        .filter(|name| !name.is_empty())
        .any(|name| name == program)
}

fn lossy(value: OsString) -> String {
    value.to_string_lossy().into_owned()
}
