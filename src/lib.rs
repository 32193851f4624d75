//! fdcolor - decorate terminal output per file descriptor
//!
//! Output routines of a host program are interposed (see the
//! `fdcolor-preload` library) so that everything written to a tracked
//! descriptor is wrapped in a pair of marker strings, ANSI colors by default,
//! when that descriptor is a terminal. This crate holds the portable parts:
//!
//! - [`tracked`]: the set of decorated descriptors
//! - [`codec`]: how the set travels through the environment to child images
//! - [`context`]: process-wide state, lazy initialization, dup/close bookkeeping
//! - [`decorate`]: marker emission with recursion suppression
//! - [`resolver`]: lookup of the real routines behind the wrappers
//!
//! The `fdcolor` binary is a launcher that preloads the library into a command.

pub mod cli;
pub mod codec;
pub mod config;
pub mod context;
pub mod decorate;
pub mod errno;
pub mod error;
pub mod log;
pub mod resolver;
pub mod tracked;

pub use context::InterceptionContext;
pub use error::{Error, Result};
pub use tracked::TrackedFds;
