//! Best-effort diagnostic log files
//!
//! Inside an interposed process nothing may be written to the program's own
//! descriptors, and nothing may go through the interception catalogue. Log
//! lines therefore go to files that the user created beforehand, opened
//! append-only for each record and written with raw system calls:
//!
//! - `./fdcolor_debug_log.txt` receives everything
//! - `$HOME/fdcolor_warning_log.txt` receives warnings and errors
//!
//! A missing file means no logging; files are never created.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;

pub const DEBUG_LOG_FILE: &str = "fdcolor_debug_log.txt";
pub const WARNING_LOG_FILE: &str = "fdcolor_warning_log.txt";

/// Routes records to the debug and warning files
#[derive(Debug, Clone)]
pub struct LogFiles {
    debug: Option<CString>,
    warning: Option<CString>,
}

impl LogFiles {
    /// Files that exist right now
    pub fn discover() -> Self {
        let home = std::env::var_os("HOME").map(PathBuf::from);
        Self::in_dirs(Path::new("."), home.as_deref())
    }

    pub fn in_dirs(cwd: &Path, home: Option<&Path>) -> Self {
        Self {
            debug: existing(cwd.join(DEBUG_LOG_FILE)),
            warning: home.and_then(|home| existing(home.join(WARNING_LOG_FILE))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.debug.is_none() && self.warning.is_none()
    }

    /// Most verbose level any file accepts
    pub fn max_level(&self) -> Option<Level> {
        if self.debug.is_some() {
            Some(Level::DEBUG)
        } else if self.warning.is_some() {
            Some(Level::WARN)
        } else {
            None
        }
    }

    fn path_for(&self, level: &Level) -> Option<&CString> {
        if *level <= Level::WARN {
            self.warning.as_ref().or(self.debug.as_ref())
        } else {
            self.debug.as_ref()
        }
    }
}

fn existing(path: PathBuf) -> Option<CString> {
    if !path.is_file() {
        return None;
    }
    CString::new(path.as_os_str().as_bytes()).ok()
}

/// One record's worth of appending to a log file
pub struct LogSink {
    fd: libc::c_int,
}

impl LogSink {
    fn open(path: Option<&CString>) -> Self {
        let fd = match path {
            Some(path) => unsafe {
                libc::syscall(
                    libc::SYS_openat,
                    libc::AT_FDCWD,
                    path.as_ptr(),
                    libc::O_WRONLY | libc::O_APPEND | libc::O_CLOEXEC,
                ) as libc::c_int
            },
            None => -1,
        };
        Self { fd }
    }
}

impl io::Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fd < 0 {
            // Silently swallowed: logging is optional
            return Ok(buf.len());
        }
        let written =
            unsafe { libc::syscall(libc::SYS_write, self.fd, buf.as_ptr(), buf.len()) };
        if written < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(written as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe { libc::syscall(libc::SYS_close, self.fd) };
        }
    }
}

impl<'a> MakeWriter<'a> for LogFiles {
    type Writer = LogSink;

    fn make_writer(&'a self) -> Self::Writer {
        LogSink::open(self.debug.as_ref())
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        LogSink::open(self.path_for(meta.level()))
    }
}

/// Install the file subscriber if any log file exists
///
/// Does nothing when another subscriber is already global in this copy of
/// `tracing` or when no file is present.
pub fn install() {
    let files = LogFiles::discover();
    let Some(level) = files.max_level() else {
        return;
    };
    let subscriber = tracing_subscriber::fmt()
        .with_writer(files)
        .with_max_level(level)
        .with_ansi(false)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
