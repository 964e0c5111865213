//! C ABI for hosts that load the library dynamically.
//!
//! Both conversion entry points return the number of pages written, or `-1`
//! on failure. On failure `*error` receives an error object the caller now
//! owns and must release with exactly one call to `free_error`. On success
//! `*error` is set to null.
//!
//! ```c
//! // tex2img.h
//! #ifndef TEX2IMG_H
//! #define TEX2IMG_H
//!
//! #include <stdint.h>
//!
//! enum {
//!     TEX2IMG_INVALID_ARGUMENT = 1,
//!     TEX2IMG_PARSE_ERROR = 2,
//!     TEX2IMG_COMPILE_ERROR = 3,
//!     TEX2IMG_RASTERIZATION_ERROR = 4,
//!     TEX2IMG_IO_ERROR = 5,
//!     TEX2IMG_INTERNAL_ERROR = 6,
//! };
//!
//! typedef struct {
//!     char* message;
//!     int code;
//! } FfiError;
//!
//! int pdf_to_png(const uint8_t* data, unsigned int data_len,
//!                const char* name, const char* path,
//!                unsigned int width, FfiError** error);
//! int latex_to_png(const char* latex, const char* name, const char* path,
//!                  unsigned int width, FfiError** error);
//! void free_error(FfiError* error);
//!
//! #endif
//! ```

#![deny(unsafe_op_in_unsafe_fn)]

use std::ffi::{CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::slice;

use libc::{c_char, c_int, c_uint};

use crate::error::{panic_message, Error, Result};
use crate::latex::{render_latex, LatexCompiler};
use crate::pipeline::{render_pdf, OutputSpec};

/// Error object handed to the caller on failure.
#[repr(C)]
pub struct FfiError {
    /// Null-terminated UTF-8 description, owned by this object.
    pub message: *mut c_char,
    /// One of the `ErrorCode` values.
    pub code: c_int,
}

impl FfiError {
    fn new(error: &Error) -> Self {
        // Interior NULs would truncate the message on the C side.
        let message = CString::new(error.to_string().replace('\0', "")).unwrap_or_default();
        FfiError {
            message: message.into_raw(),
            code: error.code().as_raw(),
        }
    }
}

/// Release an error object produced by `pdf_to_png` or `latex_to_png`.
///
/// # Safety
///
/// - `error` must come from this library and must not have been freed yet.
/// - Passing null does nothing.
#[no_mangle]
pub unsafe extern "C" fn free_error(error: *mut FfiError) {
    if error.is_null() {
        return;
    }
    // SAFETY: the pointer was produced by `Box::into_raw` in `finish` and
    // ownership comes back exactly once.
    let error = unsafe { Box::from_raw(error) };
    if !error.message.is_null() {
        // SAFETY: the message was produced by `CString::into_raw`.
        drop(unsafe { CString::from_raw(error.message) });
    }
}

/// Render the pages of an in-memory PDF as `{path}/{name}-{n}.png`.
///
/// # Safety
///
/// - `data` must point to `data_len` readable bytes (it may be null when `data_len` is 0).
/// - `name` and `path` must be null or valid null-terminated strings.
/// - `error` must be null or point to writable storage for one pointer.
#[no_mangle]
pub unsafe extern "C" fn pdf_to_png(
    data: *const u8,
    data_len: c_uint,
    name: *const c_char,
    path: *const c_char,
    width: c_uint,
    error: *mut *mut FfiError,
) -> c_int {
    let result = guarded(|| {
        // SAFETY: forwarded from the caller's contract.
        let name = unsafe { str_arg(name, "name") }?;
        let path = unsafe { str_arg(path, "path") }?;
        let spec = OutputSpec::new(name, path, width)?;

        let bytes = if data_len == 0 {
            Vec::new()
        } else if data.is_null() {
            return Err(Error::invalid("data is null"));
        } else {
            // SAFETY: the caller guarantees `data_len` readable bytes; they
            // are copied before the call continues.
            unsafe { slice::from_raw_parts(data, data_len as usize) }.to_vec()
        };

        render_pdf(bytes, &spec)
    });

    // SAFETY: forwarded from the caller's contract.
    unsafe { finish(result, error) }
}

/// Compile LaTeX source and render its pages as `{path}/{name}-{n}.png`.
///
/// The compiler is chosen from `TEX2IMG_ENGINE` and `TEX2IMG_BIN`.
///
/// # Safety
///
/// - `latex`, `name` and `path` must be null or valid null-terminated strings.
/// - `error` must be null or point to writable storage for one pointer.
#[no_mangle]
pub unsafe extern "C" fn latex_to_png(
    latex: *const c_char,
    name: *const c_char,
    path: *const c_char,
    width: c_uint,
    error: *mut *mut FfiError,
) -> c_int {
    let result = guarded(|| {
        // SAFETY: forwarded from the caller's contract.
        let latex = unsafe { str_arg(latex, "latex") }?;
        let name = unsafe { str_arg(name, "name") }?;
        let path = unsafe { str_arg(path, "path") }?;
        let spec = OutputSpec::new(name, path, width)?;
        let compiler = LatexCompiler::from_env()?;

        render_latex(latex, &spec, &compiler)
    });

    // SAFETY: forwarded from the caller's contract.
    unsafe { finish(result, error) }
}

/// Keep panics from unwinding into the caller.
fn guarded(f: impl FnOnce() -> Result<usize>) -> Result<usize> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(Error::Internal(panic_message(payload))))
}

/// Borrow a caller string for the duration of the call.
///
/// # Safety
///
/// `ptr` must be null or a valid null-terminated string that outlives `'a`.
unsafe fn str_arg<'a>(ptr: *const c_char, what: &str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(Error::invalid(format!("{} is null", what)));
    }
    // SAFETY: non-null and null-terminated per the caller's contract.
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|e| Error::invalid(format!("{} is not valid UTF-8: {}", what, e)))
}

/// Flatten a conversion result into the page count / `-1` convention.
///
/// # Safety
///
/// `out_error` must be null or point to writable storage for one pointer.
unsafe fn finish(result: Result<usize>, out_error: *mut *mut FfiError) -> c_int {
    match result {
        Ok(pages) => {
            if !out_error.is_null() {
                // SAFETY: writable per the caller's contract.
                unsafe { *out_error = ptr::null_mut() };
            }
            c_int::try_from(pages).unwrap_or(c_int::MAX)
        }
        Err(e) => {
            log::warn!("conversion failed: {}", e);
            if !out_error.is_null() {
                let error = Box::into_raw(Box::new(FfiError::new(&e)));
                // SAFETY: writable per the caller's contract.
                unsafe { *out_error = error };
            }
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::testing::{file_names, pdf_with_pages, png_size, A4};
    use pretty_assertions::assert_eq;
    use std::ptr::NonNull;
    use tempdir::TempDir;

    fn c(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    /// Read and release an error object.
    fn take(error: *mut FfiError) -> (i32, String) {
        assert!(!error.is_null());
        let taken = unsafe {
            let message = CStr::from_ptr((*error).message).to_str().unwrap().to_string();
            ((*error).code, message)
        };
        unsafe { free_error(error) };
        taken
    }

    fn call_pdf(data: &[u8], name: &CString, path: &CString, width: u32) -> (c_int, *mut FfiError) {
        // Start from a non-null slot to check that success clears it.
        let mut error: *mut FfiError = NonNull::dangling().as_ptr();
        let pages = unsafe {
            pdf_to_png(
                data.as_ptr(),
                data.len() as c_uint,
                name.as_ptr(),
                path.as_ptr(),
                width,
                &mut error,
            )
        };
        (pages, error)
    }

    #[test]
    fn pdf_success_returns_count_and_clears_slot() {
        let dir = TempDir::new("tex2img-ffi").unwrap();
        let path = c(dir.path().to_str().unwrap());

        let (pages, error) = call_pdf(&pdf_with_pages(&[A4, A4]), &c("page"), &path, 800);

        assert_eq!(pages, 2);
        assert!(error.is_null());
        assert_eq!(file_names(dir.path()), vec!["page-1.png", "page-2.png"]);
        assert_eq!(png_size(&dir.path().join("page-1.png")).0, 800);
    }

    #[test]
    fn concurrent_calls_do_not_interfere() {
        let dir = TempDir::new("tex2img-ffi").unwrap();
        let path = c(dir.path().to_str().unwrap());
        let pdf = pdf_with_pages(&[A4, (200, 100), A4]);
        let threads = 8;

        let results: Vec<(c_int, bool)> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|t| {
                    let (path, pdf) = (&path, &pdf);
                    s.spawn(move || {
                        let (pages, error) = call_pdf(pdf, &c(&format!("t{}", t)), path, 50);
                        let cleared = error.is_null();
                        if !cleared {
                            take(error);
                        }
                        (pages, cleared)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results, vec![(3, true); threads]);
        let files = file_names(dir.path());
        assert_eq!(files.len(), threads * 3);
        for t in 0..threads {
            for ordinal in 1..=3 {
                assert!(files.contains(&format!("t{}-{}.png", t, ordinal)));
            }
        }
    }

    #[test]
    fn malformed_pdf_yields_parse_error_object() {
        let dir = TempDir::new("tex2img-ffi").unwrap();
        let out = dir.path().join("out");
        let path = c(out.to_str().unwrap());

        let (pages, error) = call_pdf(b"%PDF-1.7 truncated", &c("page"), &path, 800);

        assert_eq!(pages, -1);
        let (code, message) = take(error);
        assert_eq!(code, ErrorCode::Parse.as_raw());
        assert!(message.starts_with("failed to parse PDF"), "{}", message);
        assert!(!out.exists());
    }

    #[test]
    fn invalid_arguments_are_reported() {
        let dir = TempDir::new("tex2img-ffi").unwrap();
        let path = c(dir.path().to_str().unwrap());
        let pdf = pdf_with_pages(&[A4]);

        let (pages, error) = call_pdf(&pdf, &c("page"), &path, 0);
        assert_eq!(pages, -1);
        assert_eq!(take(error).0, ErrorCode::InvalidArgument.as_raw());

        let (pages, error) = call_pdf(&pdf, &c(""), &path, 100);
        assert_eq!(pages, -1);
        assert_eq!(take(error).0, ErrorCode::InvalidArgument.as_raw());

        let bad_utf8 = CString::new(vec![0xff, 0xfe]).unwrap();
        let (pages, error) = call_pdf(&pdf, &c("page"), &bad_utf8, 100);
        assert_eq!(pages, -1);
        let (code, message) = take(error);
        assert_eq!(code, ErrorCode::InvalidArgument.as_raw());
        assert!(message.contains("path is not valid UTF-8"), "{}", message);

        assert!(file_names(dir.path()).is_empty());
    }

    #[test]
    fn null_pointers_are_invalid_arguments() {
        let dir = TempDir::new("tex2img-ffi").unwrap();
        let path = c(dir.path().to_str().unwrap());
        let name = c("page");

        let mut error = ptr::null_mut();
        let pages = unsafe { pdf_to_png(ptr::null(), 10, name.as_ptr(), path.as_ptr(), 100, &mut error) };
        assert_eq!(pages, -1);
        assert_eq!(take(error), (ErrorCode::InvalidArgument.as_raw(), "invalid argument: data is null".to_string()));

        let mut error = ptr::null_mut();
        let pages = unsafe { pdf_to_png(ptr::null(), 0, ptr::null(), path.as_ptr(), 100, &mut error) };
        assert_eq!(pages, -1);
        assert_eq!(take(error).1, "invalid argument: name is null");
    }

    #[test]
    fn null_error_slot_still_signals_failure() {
        let name = c("page");
        let path = c("/tmp");
        let data = b"garbage";
        let pages = unsafe {
            pdf_to_png(
                data.as_ptr(),
                data.len() as c_uint,
                name.as_ptr(),
                path.as_ptr(),
                100,
                ptr::null_mut(),
            )
        };
        assert_eq!(pages, -1);
    }

    #[test]
    fn io_failures_carry_io_code() {
        let dir = TempDir::new("tex2img-ffi").unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();
        let path = c(blocker.join("out").to_str().unwrap());

        let (pages, error) = call_pdf(&pdf_with_pages(&[A4]), &c("page"), &path, 100);

        assert_eq!(pages, -1);
        assert_eq!(take(error).0, ErrorCode::Io.as_raw());
    }

    #[test]
    fn latex_argument_errors_come_before_compiling() {
        let dir = TempDir::new("tex2img-ffi").unwrap();
        let out = dir.path().join("out");
        let path = c(out.to_str().unwrap());
        let name = c("formula");
        let source = c(r"\documentclass{article}\begin{document}x\end{document}");

        let mut error = ptr::null_mut();
        let pages = unsafe { latex_to_png(source.as_ptr(), name.as_ptr(), path.as_ptr(), 0, &mut error) };
        assert_eq!(pages, -1);
        assert_eq!(take(error).0, ErrorCode::InvalidArgument.as_raw());

        let mut error = ptr::null_mut();
        let pages = unsafe { latex_to_png(ptr::null(), name.as_ptr(), path.as_ptr(), 100, &mut error) };
        assert_eq!(pages, -1);
        assert_eq!(take(error).1, "invalid argument: latex is null");

        assert!(!out.exists());
    }

    #[test]
    fn error_messages_drop_interior_nul() {
        let error = FfiError::new(&Error::Compile("line one\0line two".to_string()));
        let (code, message) = take(Box::into_raw(Box::new(error)));
        assert_eq!(code, ErrorCode::Compile.as_raw());
        assert_eq!(message, "LaTeX compilation failed: line oneline two");
    }

    #[test]
    fn free_error_accepts_null() {
        unsafe { free_error(ptr::null_mut()) };
    }
}
