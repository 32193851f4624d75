//! End-to-end runs of real programs under the preload library
//!
//! Output goes to pipes here, never to a terminal, so every decorating run
//! passes `--force`. The library must have been built next to the launcher
//! (`cargo build --workspace`); when it is missing the tests are skipped.

use std::path::PathBuf;

use assert_cmd::Command;
use fdcolor::cli::PRELOAD_LIBRARY;
use predicates::prelude::*;

fn library() -> Option<PathBuf> {
    let launcher = PathBuf::from(env!("CARGO_BIN_EXE_fdcolor"));
    let library = launcher.parent()?.join(PRELOAD_LIBRARY);
    if library.is_file() {
        Some(library)
    } else {
        eprintln!("skipping: {} not built", library.display());
        None
    }
}

/// Launcher with the library and bracket markers, running `sh -c script`
fn fdcolor(library: &PathBuf, args: &[&str], script: &str) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_fdcolor"));
    cmd.env_remove("LD_PRELOAD")
        .arg("--library")
        .arg(library)
        .args(["--pre", "<", "--post", ">"])
        .args(args)
        .args(["--", "sh", "-c", script]);
    cmd
}

#[test]
fn test_stderr_is_wrapped_when_forced() {
    let Some(library) = library() else { return };
    fdcolor(&library, &["--force"], "echo hi >&2")
        .assert()
        .success()
        .stderr(predicate::str::contains("<hi\n>"));
}

#[test]
fn test_untracked_stdout_is_untouched() {
    let Some(library) = library() else { return };
    fdcolor(&library, &["--force"], "echo out")
        .assert()
        .success()
        .stdout(predicate::eq("out\n"));
}

#[test]
fn test_pipe_is_not_decorated_without_force() {
    let Some(library) = library() else { return };
    fdcolor(&library, &[], "echo hi >&2")
        .assert()
        .success()
        .stderr(predicate::eq("hi\n"));
}

#[test]
fn test_selected_descriptor_only() {
    let Some(library) = library() else { return };
    fdcolor(&library, &["--force", "--fd", "1"], "echo out; echo err >&2")
        .assert()
        .success()
        .stdout(predicate::str::contains("<out\n>"))
        .stderr(predicate::eq("err\n"));
}

#[test]
fn test_duplicate_of_tracked_descriptor_is_decorated() {
    let Some(library) = library() else { return };
    fdcolor(&library, &["--force"], "exec 3>&2; echo copy >&3")
        .assert()
        .success()
        .stderr(predicate::str::contains("<copy\n>"));
}

#[test]
fn test_set_survives_exec() {
    let Some(library) = library() else { return };
    fdcolor(&library, &["--force"], "exec sh -c 'echo nested >&2'")
        .assert()
        .success()
        .stderr(predicate::str::contains("<nested\n>"));
}

#[test]
fn test_child_environment_carries_private_list() {
    let Some(library) = library() else { return };
    fdcolor(&library, &["--force"], "env")
        .assert()
        .success()
        .stdout(predicate::str::contains("FDCOLOR_PRIVATE_FDS=2,"))
        .stdout(predicate::str::contains("FDCOLOR_FDS=").not());
}

#[test]
fn test_ignored_program_is_not_decorated() {
    let Some(library) = library() else { return };
    fdcolor(&library, &["--force", "--ignore", "sh"], "echo hi >&2")
        .assert()
        .success()
        .stderr(predicate::eq("hi\n"));
}

#[test]
fn test_exit_status_is_preserved() {
    let Some(library) = library() else { return };
    fdcolor(&library, &["--force"], "exit 42")
        .assert()
        .code(42);
}

#[test]
fn test_error_report_is_wrapped_once() {
    let Some(library) = library() else { return };
    fdcolor(&library, &["--force"], "exec ls /nonexistent/fdcolor")
        .assert()
        .failure()
        .stderr(
            predicate::str::starts_with("<ls")
                .and(predicate::str::ends_with("No such file or directory\n>"))
                .and(predicate::function(|err: &str| err.matches('<').count() == 1)),
        );
}
