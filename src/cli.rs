//! CLI argument parsing for the fdcolor launcher

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;

use crate::codec;
use crate::config::{
    ENV_FDS, ENV_FORCE_WRITE, ENV_IGNORED_BINARIES, ENV_POST_STRING, ENV_PRE_STRING,
};
use crate::tracked::TrackedFds;

/// File name of the interposition library
pub const PRELOAD_LIBRARY: &str = "libfdcolor_preload.so";

#[derive(Parser, Debug)]
#[command(name = "fdcolor")]
#[command(version)]
#[command(
    about = "Run a command with output on chosen descriptors wrapped in color markers",
    long_about = None
)]
pub struct Cli {
    /// Descriptor to decorate (repeatable, default: 2)
    #[arg(short = 'd', long = "fd", value_name = "FD")]
    pub fds: Vec<i32>,

    /// Bytes written before decorated output (default: bright red)
    #[arg(long = "pre", value_name = "STRING")]
    pub pre: Option<String>,

    /// Bytes written after decorated output (default: reset)
    #[arg(long = "post", value_name = "STRING")]
    pub post: Option<String>,

    /// Decorate even when the descriptor is not a terminal
    #[arg(short = 'f', long = "force")]
    pub force: bool,

    /// Program name for which decoration is disabled (repeatable)
    #[arg(long = "ignore", value_name = "NAME")]
    pub ignore: Vec<String>,

    /// Path of the preload library (default: next to this executable)
    #[arg(long = "library", value_name = "PATH")]
    pub library: Option<PathBuf>,

    /// Enable debug logging of the launcher to stderr
    #[arg(long = "debug")]
    pub debug: bool,

    /// Command to run (use -- to separate from launcher arguments)
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Environment changes applied before replacing the launcher with the command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub library: PathBuf,
    pub vars: Vec<(String, OsString)>,
}

impl LaunchPlan {
    /// `existing_preload` is the current `LD_PRELOAD`, kept after the library
    pub fn new(cli: &Cli, library: PathBuf, existing_preload: Option<OsString>) -> Result<Self> {
        if let Some(fd) = cli.fds.iter().find(|&&fd| fd < 0) {
            bail!("Invalid descriptor: {}", fd);
        }
        let fds = if cli.fds.is_empty() {
            TrackedFds::from_fds([libc::STDERR_FILENO])
        } else {
            TrackedFds::from_fds(cli.fds.iter().copied())
        };

        let mut preload = library.clone().into_os_string();
        if let Some(existing) = existing_preload.filter(|value| !value.is_empty()) {
            preload.push(" ");
            preload.push(existing);
        }

        let mut vars = vec![
            ("LD_PRELOAD".to_string(), preload),
            (ENV_FDS.to_string(), codec::encode(&fds).into()),
        ];
        if let Some(pre) = &cli.pre {
            vars.push((ENV_PRE_STRING.to_string(), pre.into()));
        }
        if let Some(post) = &cli.post {
            vars.push((ENV_POST_STRING.to_string(), post.into()));
        }
        if cli.force {
            vars.push((ENV_FORCE_WRITE.to_string(), "1".into()));
        }
        if !cli.ignore.is_empty() {
            let list: String = cli.ignore.iter().map(|name| format!("{name},")).collect();
            vars.push((ENV_IGNORED_BINARIES.to_string(), list.into()));
        }

        Ok(Self { library, vars })
    }
}

/// The library given on the command line, or the one next to `exe`
pub fn locate_library(explicit: Option<&Path>, exe: &Path) -> Result<PathBuf> {
    let candidate = match explicit {
        Some(path) => path.to_path_buf(),
        None => exe
            .parent()
            .context("Launcher path has no parent directory")?
            .join(PRELOAD_LIBRARY),
    };
    if !candidate.is_file() {
        bail!("Preload library not found: {}", candidate.display());
    }
    // The dynamic loader resolves LD_PRELOAD entries relative to the cwd of
    // every descendant, so make the path absolute
    candidate
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", candidate.display()))
}
