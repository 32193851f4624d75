//! Wrapper generation for the output catalogue
//!
//! Every decorated routine has the same shape: resolve the next definition
//! once, decide on the target, emit the pre-marker, forward all arguments
//! unchanged, emit the post-marker, return the real result. Only the
//! signature and the target expression differ, so those are all an entry
//! names.

/// `&'static CStr` with the name of an identifier
macro_rules! symbol {
    ($name:ident) => {
        match ::std::ffi::CStr::from_bytes_with_nul(concat!(stringify!($name), "\0").as_bytes()) {
            Ok(name) => name,
            Err(_) => unreachable!(),
        }
    };
}

/// Define exported wrappers that decorate output on the given target
///
/// ```ignore
/// decorated! {
///     fn fputs(s: *const c_char, stream: *mut FILE) -> c_int => Target::Stream(stream);
/// }
/// ```
macro_rules! decorated {
    ($(
        $(#[$meta:meta])*
        fn $name:ident($($arg:ident: $ty:ty),* $(,)?) -> $ret:ty => $target:expr;
    )+) => {$(
        $(#[$meta])*
        #[cfg_attr(not(test), no_mangle)]
        pub unsafe extern "C" fn $name($($arg: $ty),*) -> $ret {
            const NAME: &::std::ffi::CStr = symbol!($name);
            static REAL: ::fdcolor::resolver::Slot = ::fdcolor::resolver::Slot::new();

            let context = $crate::context();
            let real: unsafe extern "C" fn($($ty),*) -> $ret =
                unsafe { REAL.get(context.resolver(), NAME) };
            let decoration = context.decorate($target);
            let result = unsafe { real($($arg),*) };
            drop(decoration);
            result
        }
    )+};
}
