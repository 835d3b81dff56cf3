use std::result;

use thiserror::Error;

/// Custom result type for dataset operations
pub type Result<T> = result::Result<T, Error>;

/// Error reported by a native engine call
///
/// Carries the engine's message verbatim, the way a CPL error message would
/// be surfaced by a C library.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct NativeError(pub String);

impl NativeError {
    pub fn new(msg: impl Into<String>) -> Self {
        NativeError(msg.into())
    }
}

impl From<std::io::Error> for NativeError {
    fn from(err: std::io::Error) -> NativeError {
        NativeError(err.to_string())
    }
}

/// Result type for native engine calls
pub type NativeResult<T> = result::Result<T, NativeError>;

/// Bridge error codes
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Engine rejected the path or access mode
    #[error("{op}({path:?}) failed: {reason}")]
    OpenFailed {
        path: String,
        op: &'static str,
        reason: NativeError,
    },
    /// Engine rejected the driver, path or creation parameters
    #[error("{op}({path:?}) failed: {reason}")]
    CreateFailed {
        path: String,
        op: &'static str,
        reason: NativeError,
    },
    /// No driver given and none could be inferred
    #[error("{op}({path:?}): no driver named {driver:?}")]
    UnknownDriver {
        path: String,
        op: &'static str,
        driver: String,
    },
    /// Stride shorter than one row of the window
    #[error("{op}({path:?}): stride {stride} is smaller than the row size {min}")]
    InvalidStride {
        path: String,
        op: &'static str,
        stride: usize,
        min: usize,
    },
    /// Size does not satisfy the operation's precondition
    #[error("{op}: invalid size {size} (need {need})")]
    InvalidSize {
        op: &'static str,
        size: usize,
        need: usize,
    },
    /// Negative overview level
    #[error("{op}({path:?}): invalid overview level {level}")]
    InvalidLevel {
        path: String,
        op: &'static str,
        level: i32,
    },
    /// Native windowed I/O failed; destination contents are undefined
    #[error("{op}({path:?}) failed: {reason}")]
    IoFailure {
        path: String,
        op: &'static str,
        reason: NativeError,
    },
    /// Projection or geotransform rejected; cached value unchanged
    #[error("{op}({path:?}) failed: {reason}")]
    MetadataWriteFailed {
        path: String,
        op: &'static str,
        reason: NativeError,
    },
    /// Native overview build failed
    #[error("{op}({path:?}) failed: {reason}")]
    OverviewBuildFailed {
        path: String,
        op: &'static str,
        reason: NativeError,
    },
    /// An overview build is running on this dataset
    #[error("{op}({path:?}): overview build in progress")]
    OverviewBusy { path: String, op: &'static str },
    /// Resize on a fixed-capacity buffer
    #[error("buffer is not resizable")]
    NotResizable,
    /// Allocator refused the request
    #[error("failed to allocate {size} bytes")]
    AllocFailed { size: usize },
    /// Operation on a closed dataset
    #[error("{op}({path:?}): dataset is closed")]
    UseAfterClose { path: String, op: &'static str },
    /// Engine reported a pixel type code this crate does not model
    #[error("{op}({path:?}): unsupported pixel type code {code}")]
    UnsupportedPixelType {
        path: String,
        op: &'static str,
        code: u8,
    },
    /// Virtual file name is not registered
    #[error("virtual file {name:?} not found")]
    NotFound { name: String },
    /// Engine failed to remove a virtual file
    #[error("unlink({name:?}) failed: {reason}")]
    UnlinkFailed { name: String, reason: NativeError },
}

impl Error {
    /// Path of the dataset the error refers to, if any
    pub fn path(&self) -> Option<&str> {
        match self {
            Error::OpenFailed { path, .. }
            | Error::CreateFailed { path, .. }
            | Error::UnknownDriver { path, .. }
            | Error::InvalidStride { path, .. }
            | Error::InvalidLevel { path, .. }
            | Error::IoFailure { path, .. }
            | Error::MetadataWriteFailed { path, .. }
            | Error::OverviewBuildFailed { path, .. }
            | Error::OverviewBusy { path, .. }
            | Error::UseAfterClose { path, .. }
            | Error::UnsupportedPixelType { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Name of the operation that failed, if recorded
    pub fn op(&self) -> Option<&'static str> {
        match self {
            Error::OpenFailed { op, .. }
            | Error::CreateFailed { op, .. }
            | Error::UnknownDriver { op, .. }
            | Error::InvalidStride { op, .. }
            | Error::InvalidSize { op, .. }
            | Error::InvalidLevel { op, .. }
            | Error::IoFailure { op, .. }
            | Error::MetadataWriteFailed { op, .. }
            | Error::OverviewBuildFailed { op, .. }
            | Error::OverviewBusy { op, .. }
            | Error::UseAfterClose { op, .. }
            | Error::UnsupportedPixelType { op, .. } => Some(op),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_path_and_op() {
        let err = Error::IoFailure {
            path: "a.rbr".into(),
            op: "Dataset::read",
            reason: NativeError::new("window out of range"),
        };
        let msg = err.to_string();
        assert!(msg.contains("a.rbr"));
        assert!(msg.contains("Dataset::read"));
        assert!(msg.contains("window out of range"));
        assert_eq!(err.path(), Some("a.rbr"));
        assert_eq!(err.op(), Some("Dataset::read"));
    }

    #[test]
    fn buffer_errors_have_no_path() {
        assert_eq!(Error::NotResizable.path(), None);
        assert_eq!(Error::NotResizable.op(), None);
    }
}
