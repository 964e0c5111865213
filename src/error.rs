//! Error types shared by every conversion stage.

use std::any::Any;
use std::io;
use std::path::Path;

use thiserror::Error;

/// Result type alias for this library.
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error category reported across the C boundary.
///
/// The discriminants are part of the ABI and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Zero width, empty name prefix, null or non-UTF-8 input.
    InvalidArgument = 1,
    /// Malformed or unsupported PDF structure.
    Parse = 2,
    /// The external LaTeX compiler failed.
    Compile = 3,
    /// A specific page could not be converted to a raster image.
    Rasterization = 4,
    /// Directory or file creation, or a write, failed.
    Io = 5,
    /// A panic was caught before it could unwind into the caller.
    Internal = 6,
}

impl ErrorCode {
    /// The raw value written into the error object.
    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

/// Main error type for the library.
#[derive(Debug, Error)]
pub enum Error {
    /// The caller passed an argument the library cannot use.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The input bytes do not decode as a PDF document.
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    /// The LaTeX compiler failed; holds its diagnostic output.
    #[error("LaTeX compilation failed: {0}")]
    Compile(String),

    /// A page could not be rendered.
    #[error("failed to rasterize page {}: {reason}", .page_index + 1)]
    Rasterization {
        /// Zero-based page index.
        page_index: usize,
        /// What went wrong.
        reason: String,
    },

    /// A filesystem operation failed.
    #[error("{context}: {source}")]
    Io {
        /// The operation and path involved.
        context: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// A panic was caught inside the library.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The category of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Error::Parse(_) => ErrorCode::Parse,
            Error::Compile(_) => ErrorCode::Compile,
            Error::Rasterization { .. } => ErrorCode::Rasterization,
            Error::Io { .. } => ErrorCode::Io,
            Error::Internal(_) => ErrorCode::Internal,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    pub(crate) fn rasterization(page_index: usize, reason: impl Into<String>) -> Self {
        Error::Rasterization {
            page_index,
            reason: reason.into(),
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Wrap an I/O error with the path it concerned.
    pub(crate) fn io_at(action: &str, path: &Path, source: io::Error) -> Self {
        Error::io(format!("failed to {} {}", action, path.display()), source)
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
