//! Decorated output routines
//!
//! Raw descriptor writes are decorated on the descriptor itself; stdio calls
//! on their stream, so markers land in the same buffer as the payload. The
//! error reporters (`perror`, the `warn`/`err` family, `error`) always print
//! to `stderr`.

use std::ffi::{c_char, c_int, c_uint, c_void, CStr};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use fdcolor::decorate::Target;
use fdcolor::resolver::Slot;
use libc::{size_t, ssize_t, FILE};

/// A `va_list` argument as it is passed between functions
///
/// On the supported targets that is a single pointer: x86_64 passes its
/// one-element array by decay, aarch64 passes the struct by reference.
pub type VaList = *mut c_void;

extern "C" {
    #[link_name = "stdout"]
    static mut STDOUT: *mut FILE;
    #[link_name = "stderr"]
    static mut STDERR: *mut FILE;

    #[link_name = "error_print_progname"]
    static mut ERROR_PRINT_PROGNAME: Option<unsafe extern "C" fn()>;
    #[link_name = "error_message_count"]
    static mut ERROR_MESSAGE_COUNT: c_uint;
    #[link_name = "error_one_per_line"]
    static mut ERROR_ONE_PER_LINE: c_int;
    #[link_name = "program_invocation_name"]
    static mut PROGRAM_INVOCATION_NAME: *mut c_char;
}

pub(crate) fn stdout() -> *mut FILE {
    unsafe { STDOUT }
}

pub(crate) fn stderr() -> *mut FILE {
    unsafe { STDERR }
}

decorated! {
    fn write(fd: c_int, buf: *const c_void, count: size_t) -> ssize_t => Target::Fd(fd);

    fn fwrite(ptr: *const c_void, size: size_t, nmemb: size_t, stream: *mut FILE) -> size_t
        => Target::Stream(stream);
    fn fputs(s: *const c_char, stream: *mut FILE) -> c_int => Target::Stream(stream);
    fn fputc(c: c_int, stream: *mut FILE) -> c_int => Target::Stream(stream);
    fn putc(c: c_int, stream: *mut FILE) -> c_int => Target::Stream(stream);
    fn putchar(c: c_int) -> c_int => Target::Stream(stdout());
    fn puts(s: *const c_char) -> c_int => Target::Stream(stdout());

    // glibc exports no puts_unlocked
    fn fwrite_unlocked(ptr: *const c_void, size: size_t, nmemb: size_t, stream: *mut FILE)
        -> size_t => Target::Stream(stream);
    fn fputs_unlocked(s: *const c_char, stream: *mut FILE) -> c_int => Target::Stream(stream);
    fn fputc_unlocked(c: c_int, stream: *mut FILE) -> c_int => Target::Stream(stream);
    fn putc_unlocked(c: c_int, stream: *mut FILE) -> c_int => Target::Stream(stream);
    fn putchar_unlocked(c: c_int) -> c_int => Target::Stream(stdout());

    fn vprintf(format: *const c_char, ap: VaList) -> c_int => Target::Stream(stdout());
    fn vfprintf(stream: *mut FILE, format: *const c_char, ap: VaList) -> c_int
        => Target::Stream(stream);
    fn __vprintf_chk(flag: c_int, format: *const c_char, ap: VaList) -> c_int
        => Target::Stream(stdout());
    fn __vfprintf_chk(stream: *mut FILE, flag: c_int, format: *const c_char, ap: VaList)
        -> c_int => Target::Stream(stream);
    fn vdprintf(fd: c_int, format: *const c_char, ap: VaList) -> c_int => Target::Fd(fd);
    fn __vdprintf_chk(fd: c_int, flag: c_int, format: *const c_char, ap: VaList) -> c_int
        => Target::Fd(fd);

    fn perror(s: *const c_char) -> () => Target::Stream(stderr());
    fn vwarn(format: *const c_char, ap: VaList) -> () => Target::Stream(stderr());
    fn vwarnx(format: *const c_char, ap: VaList) -> () => Target::Stream(stderr());
}

type VwarnFn = unsafe extern "C" fn(*const c_char, VaList);

/// Print like `vwarn`/`vwarnx`, decorated, then exit
///
/// # Safety
///
/// Same contract as the libc routine named by `real`.
unsafe fn report_and_exit(
    slot: &'static Slot,
    real: &std::ffi::CStr,
    status: c_int,
    format: *const c_char,
    ap: VaList,
) -> ! {
    let context = crate::context();
    let print: VwarnFn = unsafe { slot.get(context.resolver(), real) };
    let decoration = context.decorate(Target::Stream(stderr()));
    unsafe { print(format, ap) };
    drop(decoration);
    unsafe { libc::exit(status) }
}

#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn verr(status: c_int, format: *const c_char, ap: VaList) -> ! {
    static REAL: Slot = Slot::new();
    unsafe { report_and_exit(&REAL, c"vwarn", status, format, ap) }
}

#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn verrx(status: c_int, format: *const c_char, ap: VaList) -> ! {
    static REAL: Slot = Slot::new();
    unsafe { report_and_exit(&REAL, c"vwarnx", status, format, ap) }
}

type VfprintfFn = unsafe extern "C" fn(*mut FILE, *const c_char, VaList) -> c_int;

/// Location of the last `error_at_line` report
static LAST_FILE: AtomicPtr<c_char> = AtomicPtr::new(ptr::null_mut());
static LAST_LINE: AtomicU32 = AtomicU32::new(0);

/// Same file and line as the previous report
fn repeats_last_location(file_name: *const c_char, line_number: c_uint) -> bool {
    let last_file = LAST_FILE.swap(file_name.cast_mut(), Ordering::AcqRel);
    let last_line = LAST_LINE.swap(line_number, Ordering::AcqRel);
    last_line == line_number
        && (ptr::eq(last_file, file_name)
            || (!last_file.is_null()
                && !file_name.is_null()
                && unsafe { libc::strcmp(last_file, file_name) } == 0))
}

fn put(stream: *mut FILE, bytes: &[u8]) {
    unsafe { libc::fwrite(bytes.as_ptr().cast(), 1, bytes.len(), stream) };
}

fn describe(errnum: c_int) -> Vec<u8> {
    let mut buf = [0 as c_char; 256];
    if unsafe { libc::strerror_r(errnum, buf.as_mut_ptr(), buf.len()) } == 0 {
        unsafe { CStr::from_ptr(buf.as_ptr()) }.to_bytes().to_vec()
    } else {
        format!("Unknown system error {errnum}").into_bytes()
    }
}

/// `error(3)` and `error_at_line(3)` on a `va_list`, decorated on `stderr`
///
/// The variadic entry points forward here. Output matches glibc: program
/// name (or `error_print_progname`), location for `error_at_line`, message,
/// the text of `errnum` if non-zero. With `error_one_per_line` set, a repeat
/// of the previous location prints nothing. A non-zero `status` exits.
///
/// # Safety
///
/// `format` and `ap` as for `vfprintf`; `file_name` NULL or a C string.
#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn fdcolor_verror(
    status: c_int,
    errnum: c_int,
    file_name: *const c_char,
    line_number: c_uint,
    at_line: c_int,
    format: *const c_char,
    ap: VaList,
) {
    static REAL: Slot = Slot::new();

    let at_line = at_line != 0;
    if at_line
        && unsafe { ERROR_ONE_PER_LINE } != 0
        && repeats_last_location(file_name, line_number)
    {
        return;
    }

    let context = crate::context();
    let print: VfprintfFn = unsafe { REAL.get(context.resolver(), c"vfprintf") };
    let stream = stderr();
    unsafe { libc::fflush(stdout()) };

    let decoration = context.decorate(Target::Stream(stream));
    match unsafe { ERROR_PRINT_PROGNAME } {
        Some(print_progname) => unsafe { print_progname() },
        None => {
            let name = unsafe { PROGRAM_INVOCATION_NAME };
            if !name.is_null() {
                put(stream, unsafe { CStr::from_ptr(name) }.to_bytes());
            }
            put(stream, if at_line { &b":"[..] } else { &b": "[..] });
        }
    }
    if at_line {
        if file_name.is_null() {
            put(stream, b" ");
        } else {
            put(stream, unsafe { CStr::from_ptr(file_name) }.to_bytes());
            put(stream, format!(":{line_number}: ").as_bytes());
        }
    }
    unsafe {
        print(stream, format, ap);
        ERROR_MESSAGE_COUNT = ERROR_MESSAGE_COUNT.wrapping_add(1);
    }
    if errnum != 0 {
        put(stream, b": ");
        put(stream, &describe(errnum));
    }
    put(stream, b"\n");
    unsafe { libc::fflush(stream) };
    drop(decoration);

    if status != 0 {
        unsafe { libc::exit(status) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{close_stream, drain, empty_va_list, pipe, tracked_stream, Redirect};
    use nix::errno::Errno;
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::Pid;
    use serial_test::serial;

    fn ap(buffer: &mut [u64; 4]) -> VaList {
        buffer.as_mut_ptr().cast()
    }

    fn invocation_name() -> String {
        let name = unsafe { PROGRAM_INVOCATION_NAME };
        unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned()
    }

    /// Run `report` in a child with stderr on the tracked pipe
    fn exit_status_of(report: impl FnOnce()) -> i32 {
        pipe();
        let pid = unsafe { libc::fork() };
        assert!(pid >= 0);
        if pid == 0 {
            let _stderr = Redirect::new(2);
            report();
            unsafe { libc::_exit(0) };
        }
        match waitpid(Pid::from_raw(pid), None).unwrap() {
            WaitStatus::Exited(_, code) => code,
            status => panic!("child did not exit: {status:?}"),
        }
    }

    #[test]
    #[serial]
    fn test_write_on_tracked_descriptor_is_wrapped() {
        let (read, tracked) = pipe();
        let n = unsafe { write(tracked, b"hello".as_ptr().cast(), 5) };
        assert_eq!(n, 5);
        assert_eq!(drain(read), "<hello>");
    }

    #[test]
    #[serial]
    fn test_write_elsewhere_is_untouched() {
        let (read, _) = pipe();
        let mut other = [0; 2];
        assert_eq!(unsafe { libc::pipe(other.as_mut_ptr()) }, 0);

        let n = unsafe { write(other[1], b"plain".as_ptr().cast(), 5) };
        assert_eq!(n, 5);
        assert_eq!(drain(other[0]), "plain");
        assert_eq!(drain(read), "");
        unsafe {
            libc::close(other[0]);
            libc::close(other[1]);
        }
    }

    #[test]
    #[serial]
    fn test_failed_write_keeps_errno() {
        let (read, _) = pipe();
        Errno::set_raw(0);
        let n = unsafe { write(-1, b"x".as_ptr().cast(), 1) };
        assert_eq!(n, -1);
        assert_eq!(Errno::last(), Errno::EBADF);
        assert_eq!(drain(read), "");
    }

    #[test]
    #[serial]
    fn test_stream_on_tracked_descriptor() {
        let (read, tracked) = pipe();
        let copy = unsafe { libc::dup(tracked) };
        // The copy is not tracked: `libc::dup` bypasses the wrapper
        let stream = unsafe { libc::fdopen(copy, c"w".as_ptr()) };
        assert!(!stream.is_null());

        assert!(unsafe { fputs(c"untracked".as_ptr(), stream) } >= 0);
        unsafe { libc::fflush(stream) };
        assert_eq!(drain(read), "untracked");
        unsafe { libc::fclose(stream) };

        let stream = unsafe { libc::fdopen(libc::dup(tracked), c"w".as_ptr()) };
        crate::context().dup_fd(tracked, unsafe { libc::fileno(stream) });
        assert!(unsafe { fputs(c"tracked".as_ptr(), stream) } >= 0);
        unsafe { libc::fflush(stream) };
        assert_eq!(drain(read), "<tracked>");
        crate::context().close_fd(unsafe { libc::fileno(stream) });
        unsafe { libc::fclose(stream) };
    }

    #[test]
    #[serial]
    fn test_character_output_on_tracked_stream() {
        let (read, _) = pipe();
        let stream = tracked_stream();
        unsafe {
            assert_eq!(fputc(c_int::from(b'a'), stream), c_int::from(b'a'));
            assert_eq!(putc(c_int::from(b'b'), stream), c_int::from(b'b'));
            assert_eq!(fputc_unlocked(c_int::from(b'c'), stream), c_int::from(b'c'));
            assert_eq!(putc_unlocked(c_int::from(b'd'), stream), c_int::from(b'd'));
            libc::fflush(stream);
        }
        assert_eq!(drain(read), "<a><b><c><d>");
        close_stream(stream);
    }

    #[test]
    #[serial]
    fn test_block_output_on_tracked_stream() {
        let (read, _) = pipe();
        let stream = tracked_stream();
        unsafe {
            assert_eq!(fwrite(b"xy".as_ptr().cast(), 1, 2, stream), 2);
            assert_eq!(fwrite_unlocked(b"z".as_ptr().cast(), 1, 1, stream), 1);
            assert!(fputs_unlocked(c"w".as_ptr(), stream) >= 0);
            libc::fflush(stream);
        }
        assert_eq!(drain(read), "<xy><z><w>");
        close_stream(stream);
    }

    #[test]
    #[serial]
    fn test_formatted_output_on_tracked_stream() {
        let (read, _) = pipe();
        let stream = tracked_stream();
        let mut args = empty_va_list();
        unsafe {
            assert_eq!(vfprintf(stream, c"formatted".as_ptr(), ap(&mut args)), 9);
            assert_eq!(__vfprintf_chk(stream, 1, c"checked".as_ptr(), ap(&mut args)), 7);
            libc::fflush(stream);
        }
        assert_eq!(drain(read), "<formatted><checked>");
        close_stream(stream);
    }

    #[test]
    #[serial]
    fn test_formatted_output_on_tracked_descriptor() {
        let (read, tracked) = pipe();
        let mut args = empty_va_list();
        unsafe {
            assert_eq!(vdprintf(tracked, c"direct".as_ptr(), ap(&mut args)), 6);
            assert_eq!(__vdprintf_chk(tracked, 1, c"chk".as_ptr(), ap(&mut args)), 3);
        }
        assert_eq!(drain(read), "<direct><chk>");
    }

    #[test]
    #[serial]
    fn test_stdout_routines_follow_descriptor_one() {
        let (read, _) = pipe();
        let mut args = empty_va_list();
        {
            let _stdout = Redirect::new(1);
            unsafe {
                assert_eq!(putchar(c_int::from(b'a')), c_int::from(b'a'));
                assert!(puts(c"line".as_ptr()) >= 0);
                assert_eq!(putchar_unlocked(c_int::from(b'b')), c_int::from(b'b'));
                assert_eq!(vprintf(c"v".as_ptr(), ap(&mut args)), 1);
                assert_eq!(__vprintf_chk(1, c"c".as_ptr(), ap(&mut args)), 1);
            }
        }
        assert_eq!(drain(read), "<a><line\n><b><v><c>");
    }

    #[test]
    #[serial]
    fn test_error_reporters_follow_descriptor_two() {
        let (read, _) = pipe();
        let mut args = empty_va_list();
        {
            let _stderr = Redirect::new(2);
            unsafe {
                Errno::set_raw(libc::ENOENT);
                perror(c"ctx".as_ptr());
                Errno::set_raw(libc::ENOENT);
                vwarn(c"warned".as_ptr(), ap(&mut args));
                vwarnx(c"plain".as_ptr(), ap(&mut args));
            }
        }
        let output = drain(read);
        assert!(output.starts_with("<ctx: No such file or directory\n>"), "{output}");
        assert!(output.contains(": warned: No such file or directory\n>"), "{output}");
        assert!(output.ends_with(": plain\n>"), "{output}");
        assert_eq!(output.matches('<').count(), 3);
    }

    #[test]
    #[serial]
    fn test_verr_writes_post_marker_before_exit() {
        let (read, _) = pipe();
        let status = exit_status_of(|| unsafe {
            let mut args = empty_va_list();
            Errno::set_raw(libc::ENOENT);
            verr(3, c"bye".as_ptr(), ap(&mut args));
        });
        assert_eq!(status, 3);
        let output = drain(read);
        assert!(output.starts_with('<'), "{output}");
        assert!(output.ends_with(": bye: No such file or directory\n>"), "{output}");
    }

    #[test]
    #[serial]
    fn test_verrx_writes_post_marker_before_exit() {
        let (read, _) = pipe();
        let status = exit_status_of(|| unsafe {
            let mut args = empty_va_list();
            verrx(4, c"bye".as_ptr(), ap(&mut args));
        });
        assert_eq!(status, 4);
        let output = drain(read);
        assert!(output.starts_with('<'), "{output}");
        assert!(output.ends_with(": bye\n>"), "{output}");
    }

    #[test]
    #[serial]
    fn test_error_reports_program_and_errno() {
        let (read, _) = pipe();
        let mut args = empty_va_list();
        let count = unsafe { ERROR_MESSAGE_COUNT };
        {
            let _stderr = Redirect::new(2);
            unsafe {
                fdcolor_verror(0, libc::ENOENT, ptr::null(), 0, 0, c"disk full".as_ptr(), ap(&mut args));
                fdcolor_verror(0, 0, ptr::null(), 0, 0, c"no errno".as_ptr(), ap(&mut args));
            }
        }
        let name = invocation_name();
        assert_eq!(
            drain(read),
            format!("<{name}: disk full: No such file or directory\n><{name}: no errno\n>")
        );
        assert_eq!(unsafe { ERROR_MESSAGE_COUNT }, count.wrapping_add(2));
    }

    #[test]
    #[serial]
    fn test_error_at_line_once_per_line() {
        let (read, _) = pipe();
        let mut args = empty_va_list();
        {
            let _stderr = Redirect::new(2);
            unsafe {
                ERROR_ONE_PER_LINE = 1;
                for line in [7, 7, 8] {
                    fdcolor_verror(0, 0, c"src.c".as_ptr(), line, 1, c"bad".as_ptr(), ap(&mut args));
                }
                fdcolor_verror(0, 0, ptr::null(), 9, 1, c"nowhere".as_ptr(), ap(&mut args));
                ERROR_ONE_PER_LINE = 0;
            }
        }
        let name = invocation_name();
        assert_eq!(
            drain(read),
            format!("<{name}:src.c:7: bad\n><{name}:src.c:8: bad\n><{name}: nowhere\n>")
        );
    }

    unsafe extern "C" fn print_progname() {
        put(stderr(), b"PROG ");
    }

    #[test]
    #[serial]
    fn test_error_uses_progname_hook() {
        let (read, _) = pipe();
        let mut args = empty_va_list();
        {
            let _stderr = Redirect::new(2);
            unsafe {
                ERROR_PRINT_PROGNAME = Some(print_progname);
                fdcolor_verror(0, 0, ptr::null(), 0, 0, c"hooked".as_ptr(), ap(&mut args));
                ERROR_PRINT_PROGNAME = None;
            }
        }
        assert_eq!(drain(read), "<PROG hooked\n>");
    }

    #[test]
    #[serial]
    fn test_error_with_status_exits_after_post_marker() {
        let (read, _) = pipe();
        let status = exit_status_of(|| unsafe {
            let mut args = empty_va_list();
            fdcolor_verror(5, 0, ptr::null(), 0, 0, c"fatal".as_ptr(), ap(&mut args));
        });
        assert_eq!(status, 5);
        assert!(drain(read).ends_with(": fatal\n>"));
    }
}
