//! Exported names of the variadic entry points
//!
//! The definitions live in `csrc/variadic.c`, built by the build script.
//! Symbols from linked C objects are not exported from a Rust `cdylib`, so
//! each public name here is a bare jump to its C counterpart. Registers and
//! stack are untouched, the C function sees the caller's arguments as they
//! were passed.

#[cfg(target_arch = "x86_64")]
macro_rules! jump {
    ($target:ident) => {
        core::arch::naked_asm!("jmp {}", sym $target)
    };
}

#[cfg(target_arch = "aarch64")]
macro_rules! jump {
    ($target:ident) => {
        core::arch::naked_asm!("b {}", sym $target)
    };
}

macro_rules! trampolines {
    ($($name:ident => $target:ident;)+) => {
        #[link(name = "fdcolor_variadic", kind = "static")]
        extern "C" {
            $(fn $target();)+
        }

        $(
            #[unsafe(naked)]
            #[no_mangle]
            pub unsafe extern "C" fn $name() {
                jump!($target)
            }
        )+
    };
}

trampolines! {
    printf => fdcolor_printf;
    fprintf => fdcolor_fprintf;
    dprintf => fdcolor_dprintf;
    __printf_chk => fdcolor___printf_chk;
    __fprintf_chk => fdcolor___fprintf_chk;
    __dprintf_chk => fdcolor___dprintf_chk;
    warn => fdcolor_warn;
    warnx => fdcolor_warnx;
    err => fdcolor_err;
    errx => fdcolor_errx;
    error => fdcolor_error;
    error_at_line => fdcolor_error_at_line;
    execl => fdcolor_execl;
    execlp => fdcolor_execlp;
    execle => fdcolor_execle;
}
