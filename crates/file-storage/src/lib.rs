//! Namespaced local file storage
//!
//! This crate keeps "original" files on a local filesystem, partitioned by a
//! namespace, and builds the public links under which a web server exposes them.
//! The filesystem is the only index: a file exists exactly when its resolved path
//! exists.
//!
//! # Layout
//!
//! ```text
//! <root_dir>/
//! └── <sub_dir>/            # e.g. "original"
//!     └── <namespace>/      # "users/42" nests as two directories
//!         └── <name>.<ext>
//! ```
//!
//! The matching public link is `<base_path>/<sub_dir>/<namespace>/<name>.<ext>`.
//!
//! # Example
//!
//! ```no_run
//! use file_storage::{FileStorage, Namespace};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), file_storage::FileStorageError> {
//! let storage = FileStorage::new("/var/www", "original", "https://example.com/");
//! let namespace = Namespace::from_segments(["users", "42"]);
//!
//! storage.copy(Path::new("/tmp/avatar.png"), None, Some(&namespace))?;
//! assert_eq!(
//!     storage.file_link(&namespace, "avatar.png"),
//!     "https://example.com/original/users/42/avatar.png"
//! );
//! # Ok(())
//! # }
//! ```

mod names;
mod namespace;
mod paths;
mod store;
mod upload;

pub use names::{parse_byte_size, split_name_extension};
pub use namespace::Namespace;
pub use paths::PathResolver;
pub use store::FileStorage;
pub use upload::{LocalUpload, Upload, UploadStatus, IMAGE_CONTENT_TYPES};

use std::path::PathBuf;

/// Errors that can occur during file storage operations
#[derive(Debug, thiserror::Error)]
pub enum FileStorageError {
    /// A path was requested without an explicit namespace and no default is set
    #[error("No storage namespace set")]
    NoNamespace,

    /// The file name has no usable extension
    #[error("Invalid file name - no extension: {0}")]
    InvalidName(String),

    /// The destination already holds a file and overwriting was not requested
    #[error("File {0} already exists")]
    AlreadyExists(String),

    /// The local source of a copy does not exist
    #[error("Source file does not exist: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// The upload was rejected at the transport level
    #[error("Upload error: {0}")]
    Upload(String),

    /// A file could not be removed
    #[error("Unable to delete file: {}", .0.display())]
    DeleteFailed(PathBuf),

    /// I/O error occurred while moving, copying or removing a file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FileStorageError>;
