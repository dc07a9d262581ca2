//! Error handling and C-ABI error codes for ipam

use std::cell::RefCell;
use std::os::raw::c_char;

/// Errors surfaced by the Rust API.
///
/// A precheck that merely *disapproves* of an operation is not an error; it
/// reports `false` (or a [`crate::precheck::Verdict::Rejected`]). Errors are
/// reserved for malformed input and for mutations the engine refuses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("cannot parse {input:?}: {reason}")]
    Parse { input: String, reason: String },
    #[error("{0} overlaps an existing allocation")]
    Overlap(String),
    #[error("{0} would place a prefix inside range territory")]
    RangeConflict(String),
    #[error("{0} has no enclosing prefix allocation")]
    Unanchored(String),
    #[error("range {0} cannot be decomposed into CIDR blocks")]
    Decompose(String),
    #[error("store rejected key: {0}")]
    Store(String),
    #[error("{0} is not allocated")]
    NotFound(String),
    #[error("deleting {0} would leave the tree inconsistent")]
    DeleteRejected(String),
}

impl Error {
    pub(crate) fn parse(input: &str, reason: impl ToString) -> Self {
        Error::Parse {
            input: input.to_owned(),
            reason: reason.to_string(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    ParseFailed = 1,
    Overlap = 2,
    RangeConflict = 3,
    Unanchored = 4,
    DecomposeFailed = 5,
    StoreFailed = 6,
    NotFound = 7,
    DeleteRejected = 8,
    InvalidHandle = 9,
    Utf8Error = 10,
    BufferTooSmall = 11,
    Unknown = 255,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Success => "Success",
            ErrorCode::ParseFailed => "Parse failed",
            ErrorCode::Overlap => "Overlap detected",
            ErrorCode::RangeConflict => "Range conflict",
            ErrorCode::Unanchored => "No enclosing prefix",
            ErrorCode::DecomposeFailed => "Range decomposition failed",
            ErrorCode::StoreFailed => "Store failed",
            ErrorCode::NotFound => "Not found",
            ErrorCode::DeleteRejected => "Deletion rejected",
            ErrorCode::InvalidHandle => "Invalid handle",
            ErrorCode::Utf8Error => "UTF-8 conversion error",
            ErrorCode::BufferTooSmall => "Buffer too small",
            ErrorCode::Unknown => "Unknown error",
        }
    }

    /// Same text as [`ErrorCode::as_str`], NUL-terminated for C callers.
    pub fn as_c_str(self) -> &'static [u8] {
        match self {
            ErrorCode::Success => b"Success\0",
            ErrorCode::ParseFailed => b"Parse failed\0",
            ErrorCode::Overlap => b"Overlap detected\0",
            ErrorCode::RangeConflict => b"Range conflict\0",
            ErrorCode::Unanchored => b"No enclosing prefix\0",
            ErrorCode::DecomposeFailed => b"Range decomposition failed\0",
            ErrorCode::StoreFailed => b"Store failed\0",
            ErrorCode::NotFound => b"Not found\0",
            ErrorCode::DeleteRejected => b"Deletion rejected\0",
            ErrorCode::InvalidHandle => b"Invalid handle\0",
            ErrorCode::Utf8Error => b"UTF-8 conversion error\0",
            ErrorCode::BufferTooSmall => b"Buffer too small\0",
            ErrorCode::Unknown => b"Unknown error\0",
        }
    }
}

// Thread-local last error for C-ABI
thread_local! {
    static LAST_ERROR: RefCell<ErrorCode> = const { RefCell::new(ErrorCode::Success) };
}

pub fn set_last_error(code: ErrorCode) {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = code);
}

pub fn get_last_error() -> ErrorCode {
    LAST_ERROR.with(|cell| *cell.borrow())
}

#[no_mangle]
pub extern "C" fn ipam_last_error() -> ErrorCode {
    get_last_error()
}

#[no_mangle]
pub extern "C" fn ipam_strerror(code: ErrorCode) -> *const c_char {
    code.as_c_str().as_ptr() as *const c_char
}

// Map internal Error to ErrorCode
pub fn map_error(e: &Error) -> ErrorCode {
    match e {
        Error::Parse { .. } => ErrorCode::ParseFailed,
        Error::Overlap(_) => ErrorCode::Overlap,
        Error::RangeConflict(_) => ErrorCode::RangeConflict,
        Error::Unanchored(_) => ErrorCode::Unanchored,
        Error::Decompose(_) => ErrorCode::DecomposeFailed,
        Error::Store(_) => ErrorCode::StoreFailed,
        Error::NotFound(_) => ErrorCode::NotFound,
        Error::DeleteRejected(_) => ErrorCode::DeleteRejected,
    }
}
