//! Errors specific to loading, editing or committing a PE image.

use alloc::string::String;

#[cfg(feature = "images")]
use image::ImageError;
#[cfg(feature = "std")]
use std::io::Error as IOError;

/// Error that can occur when reading and parsing bytes.
#[derive(Debug, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
#[cfg_attr(feature = "std", error("cannot read {type_name} at offset {offset:#x}"))]
pub struct ReadError {
    pub type_name: &'static str,
    pub offset:    usize,
}

/// Errors that can occur when loading a PE image and its resource directory.
#[derive(Debug)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum LoadError {
    #[cfg_attr(feature = "std", error("not a portable executable: {0}"))]
    InvalidHeader(String),
    #[cfg_attr(feature = "std", error("truncated image: {0}"))]
    Truncated(ReadError),
    #[cfg_attr(feature = "std", error("invalid resource directory: {0}"))]
    InvalidResources(String),
    #[cfg(feature = "std")]
    #[error("io error: {0}")]
    Io(IOError),
}
impl From<ReadError> for LoadError {
    fn from(error: ReadError) -> Self { LoadError::Truncated(error) }
}
#[cfg(feature = "std")]
impl From<IOError> for LoadError {
    fn from(error: IOError) -> Self { LoadError::Io(error) }
}

/// Errors that can occur when validating edits against the resource directory.
#[derive(Debug)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum ValidationError {
    #[cfg_attr(feature = "std", error("malformed version: {0}"))]
    MalformedVersion(String),
    #[cfg_attr(
        feature = "std",
        error(
            "invalid execution level {0:?}, expected asInvoker, highestAvailable or requireAdministrator"
        )
    )]
    InvalidExecutionLevel(String),
    #[cfg_attr(feature = "std", error("malformed icon: {0}"))]
    MalformedIcon(String),
    #[cfg_attr(feature = "std", error("corrupt version resource: {0}"))]
    CorruptVersionResource(String),
    #[cfg_attr(feature = "std", error("{0} of {1} bytes exceeds the 16 bit length limit"))]
    ValueTooLong(&'static str, usize),
    #[cfg(feature = "images")]
    #[error("invalid image: {0}")]
    InvalidImage(ImageError),
}
#[cfg(feature = "images")]
impl From<ImageError> for ValidationError {
    fn from(error: ImageError) -> Self { ValidationError::InvalidImage(error) }
}

/// Errors that can occur when building and writing the updated image.
#[derive(Debug)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum CommitError {
    #[cfg_attr(feature = "std", error("resource section too large: {0:#x} bytes"))]
    ResourceSectionTooLarge(u64),
    #[cfg_attr(feature = "std", error("not enough space in file header"))]
    NotEnoughSpaceInHeader,
    #[cfg_attr(feature = "std", error("resource name of {0} characters exceeds the 16 bit length limit"))]
    ResourceNameTooLong(usize),
    #[cfg_attr(feature = "std", error("section points outside image: {0} > {1}"))]
    InvalidSectionRange(u64, u64),
    #[cfg(feature = "std")]
    #[error("write failed: {0}")]
    WriteFailed(IOError),
}
#[cfg(feature = "std")]
impl From<IOError> for CommitError {
    fn from(error: IOError) -> Self { CommitError::WriteFailed(error) }
}

/// Errors returned by the [`ResourceUpdater`](crate::ResourceUpdater) facade.
#[cfg(feature = "std")]
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("no image loaded")]
    NotLoaded,
    #[error("cannot read {path}: {source}")]
    Input { path: std::path::PathBuf, source: IOError },
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Commit(#[from] CommitError),
}
#[cfg(feature = "std")]
impl UpdateError {
    /// Returns the process exit code a command line caller reports for this error.
    ///
    /// `1` for commit failures, `2` for an invalid execution level and `3` for load failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            UpdateError::Load(_) | UpdateError::NotLoaded => 3,
            UpdateError::Validation(ValidationError::InvalidExecutionLevel(_)) => 2,
            UpdateError::Input { .. } | UpdateError::Validation(_) | UpdateError::Commit(_) => 1,
        }
    }
}
