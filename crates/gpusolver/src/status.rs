//! Status codes and error types.
//!
//! [`Status`] is the wire-visible enumeration returned by every C entry point.
//! Its discriminants are part of the ABI: new codes are only ever appended.
//! Inside the crate, failures travel as [`SolverError`] and are converted at the
//! API boundary.

use std::ffi::{CStr, c_char};

use thiserror::Error;

use crate::backend::BackendKind;

pub type Result<T> = std::result::Result<T, SolverError>;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success = 0,
    InvalidHandle = 1,
    InvalidPointer = 2,
    InvalidValue = 3,
    InvalidSize = 4,
    AllocFailed = 5,
    BackendNotAvailable = 6,
    InternalError = 7,
    NotImplemented = 8,
    ArchMismatch = 9,
    ZeroPivot = 10,
}

impl Status {
    pub const ALL: [Status; 11] = [
        Status::Success,
        Status::InvalidHandle,
        Status::InvalidPointer,
        Status::InvalidValue,
        Status::InvalidSize,
        Status::AllocFailed,
        Status::BackendNotAvailable,
        Status::InternalError,
        Status::NotImplemented,
        Status::ArchMismatch,
        Status::ZeroPivot,
    ];

    pub fn from_raw(raw: i32) -> Option<Status> {
        usize::try_from(raw)
            .ok()
            .and_then(|index| Status::ALL.get(index).copied())
    }

    pub fn as_str(&self) -> &'static str {
        self.as_cstr()
            .to_str()
            .unwrap_or("GPUSOLVER_STATUS_INTERNAL_ERROR")
    }

    pub(crate) fn as_cstr(&self) -> &'static CStr {
        match self {
            Status::Success => c"GPUSOLVER_STATUS_SUCCESS",
            Status::InvalidHandle => c"GPUSOLVER_STATUS_INVALID_HANDLE",
            Status::InvalidPointer => c"GPUSOLVER_STATUS_INVALID_POINTER",
            Status::InvalidValue => c"GPUSOLVER_STATUS_INVALID_VALUE",
            Status::InvalidSize => c"GPUSOLVER_STATUS_INVALID_SIZE",
            Status::AllocFailed => c"GPUSOLVER_STATUS_ALLOC_FAILED",
            Status::BackendNotAvailable => c"GPUSOLVER_STATUS_BACKEND_NOT_AVAILABLE",
            Status::InternalError => c"GPUSOLVER_STATUS_INTERNAL_ERROR",
            Status::NotImplemented => c"GPUSOLVER_STATUS_NOT_IMPLEMENTED",
            Status::ArchMismatch => c"GPUSOLVER_STATUS_ARCH_MISMATCH",
            Status::ZeroPivot => c"GPUSOLVER_STATUS_ZERO_PIVOT",
        }
    }

    pub(crate) fn as_ptr(&self) -> *const c_char {
        self.as_cstr().as_ptr()
    }

    pub fn is_success(&self) -> bool {
        *self == Status::Success
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("invalid or destroyed handle")]
    InvalidHandle,

    #[error("null pointer for argument `{0}`")]
    InvalidPointer(&'static str),

    #[error("invalid value for argument `{arg}`: {reason}")]
    InvalidValue { arg: &'static str, reason: String },

    #[error("invalid size for argument `{arg}`: {value}")]
    InvalidSize { arg: &'static str, value: i64 },

    #[error("allocation of {bytes} bytes failed")]
    AllocFailed { bytes: usize },

    #[error("{0} backend is not available")]
    BackendNotAvailable(BackendKind),

    #[error("{backend} call {call} failed with status {code}")]
    Backend {
        backend: &'static str,
        call: &'static str,
        code: i32,
        status: Status,
    },

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("memory space mismatch: {0}")]
    ArchMismatch(String),

    #[error("zero pivot at row {row}")]
    ZeroPivot { row: usize },

    #[error("internal error: {0}")]
    Internal(String),
}

impl SolverError {
    pub fn invalid_value(arg: &'static str, reason: impl Into<String>) -> Self {
        SolverError::InvalidValue {
            arg,
            reason: reason.into(),
        }
    }

    /// A byte count that does not fit in `usize`.
    pub fn size_overflow() -> Self {
        SolverError::AllocFailed { bytes: usize::MAX }
    }

    pub fn status(&self) -> Status {
        match self {
            SolverError::InvalidHandle => Status::InvalidHandle,
            SolverError::InvalidPointer(_) => Status::InvalidPointer,
            SolverError::InvalidValue { .. } => Status::InvalidValue,
            SolverError::InvalidSize { .. } => Status::InvalidSize,
            SolverError::AllocFailed { .. } => Status::AllocFailed,
            SolverError::BackendNotAvailable(_) => Status::BackendNotAvailable,
            SolverError::Backend { status, .. } => *status,
            SolverError::NotImplemented(_) => Status::NotImplemented,
            SolverError::ArchMismatch(_) => Status::ArchMismatch,
            SolverError::ZeroPivot { .. } => Status::ZeroPivot,
            SolverError::Internal(_) => Status::InternalError,
        }
    }
}

impl From<SolverError> for Status {
    fn from(err: SolverError) -> Self {
        err.status()
    }
}

impl From<Result<()>> for Status {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Status::Success,
            Err(err) => err.status(),
        }
    }
}

/// Translates a dense-backend (rocBLAS/rocSOLVER) status code.
pub(crate) fn status_from_rocblas(code: i32) -> Status {
    match code {
        0 => Status::Success,
        1 => Status::InvalidHandle,
        2 => Status::NotImplemented,
        3 => Status::InvalidPointer,
        4 => Status::InvalidSize,
        5 => Status::AllocFailed,
        6 => Status::InternalError,
        11 => Status::InvalidValue,
        14 => Status::NotImplemented,
        15 => Status::ArchMismatch,
        _ => Status::InternalError,
    }
}

/// Translates a sparse-backend (rocSPARSE) status code.
pub(crate) fn status_from_rocsparse(code: i32) -> Status {
    match code {
        0 => Status::Success,
        1 => Status::InvalidHandle,
        2 => Status::NotImplemented,
        3 => Status::InvalidPointer,
        4 => Status::InvalidSize,
        5 => Status::AllocFailed,
        6 => Status::InternalError,
        7 => Status::InvalidValue,
        8 => Status::ArchMismatch,
        9 => Status::ZeroPivot,
        10 => Status::InvalidHandle,
        _ => Status::InternalError,
    }
}

/// Translates a device-runtime (HIP) error code.
pub(crate) fn status_from_hip(code: i32) -> Status {
    match code {
        0 => Status::Success,
        1 => Status::InvalidValue,
        2 => Status::AllocFailed,
        98 | 209 => Status::ArchMismatch,
        400 => Status::InvalidHandle,
        _ => Status::InternalError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminants_are_stable() {
        for (code, status) in Status::ALL.iter().enumerate() {
            assert_eq!(*status as i32, code as i32);
        }
    }

    #[test]
    fn names_round_trip_through_c_strings() {
        assert_eq!(Status::ZeroPivot.as_str(), "GPUSOLVER_STATUS_ZERO_PIVOT");
        assert_eq!(Status::Success.to_string(), "GPUSOLVER_STATUS_SUCCESS");
        assert_eq!(Status::from_raw(9), Some(Status::ArchMismatch));
        assert_eq!(Status::from_raw(11), None);
        assert_eq!(Status::from_raw(-1), None);
    }

    #[test]
    fn errors_map_to_distinct_statuses() {
        assert_eq!(
            SolverError::BackendNotAvailable(BackendKind::Sparse).status(),
            Status::BackendNotAvailable
        );
        assert_eq!(
            SolverError::NotImplemented("qr".into()).status(),
            Status::NotImplemented
        );
        assert_eq!(
            SolverError::Internal("boom".into()).status(),
            Status::InternalError
        );
        assert_eq!(Status::from(Ok(())), Status::Success);
    }

    #[test]
    fn unmapped_backend_codes_become_internal_errors() {
        assert_eq!(status_from_rocblas(7), Status::InternalError);
        assert_eq!(status_from_rocblas(1234), Status::InternalError);
        assert_eq!(status_from_rocsparse(13), Status::InternalError);
        assert_eq!(status_from_rocsparse(-1), Status::InternalError);
        assert_eq!(status_from_hip(999), Status::InternalError);
    }

    #[test]
    fn known_backend_codes_are_translated() {
        assert_eq!(status_from_rocblas(4), Status::InvalidSize);
        assert_eq!(status_from_rocblas(11), Status::InvalidValue);
        assert_eq!(status_from_rocsparse(7), Status::InvalidValue);
        assert_eq!(status_from_rocsparse(9), Status::ZeroPivot);
        assert_eq!(status_from_hip(2), Status::AllocFailed);
    }
}
