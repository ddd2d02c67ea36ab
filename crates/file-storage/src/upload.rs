//! Inbound upload collaborator
//!
//! Receiving bytes and enforcing transport limits happens elsewhere. Storage only
//! needs to know whether an upload arrived, whether it arrived intact, what it
//! claims to be, and how to move it into place.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Content types accepted as images
pub const IMAGE_CONTENT_TYPES: &[&str] = &["image/gif", "image/png", "image/jpeg", "image/webp"];

/// Transport-level outcome of an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Ok,
    /// Larger than the server-wide limit
    IniSize,
    /// Larger than the form's limit
    FormSize,
    Partial,
    /// No file was selected
    NoFile,
    NoTmpDir,
    CantWrite,
    /// Stopped by a server extension
    Extension,
}

impl UploadStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, UploadStatus::Ok)
    }

    /// Numeric code as reported by common upload handlers
    pub fn code(&self) -> u8 {
        match self {
            UploadStatus::Ok => 0,
            UploadStatus::IniSize => 1,
            UploadStatus::FormSize => 2,
            UploadStatus::Partial => 3,
            UploadStatus::NoFile => 4,
            UploadStatus::NoTmpDir => 6,
            UploadStatus::CantWrite => 7,
            UploadStatus::Extension => 8,
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self {
            UploadStatus::Ok => "ok",
            UploadStatus::IniSize => "file exceeds the server size limit",
            UploadStatus::FormSize => "file exceeds the form size limit",
            UploadStatus::Partial => "file was only partially uploaded",
            UploadStatus::NoFile => "no file was uploaded",
            UploadStatus::NoTmpDir => "missing temporary directory",
            UploadStatus::CantWrite => "failed to write file to disk",
            UploadStatus::Extension => "upload stopped by extension",
        };
        write!(f, "{} ({})", description, self.code())
    }
}

/// An upload received by the transport layer
pub trait Upload {
    /// True when no file was selected at all
    fn is_empty(&self) -> bool {
        self.status() == UploadStatus::NoFile
    }

    fn status(&self) -> UploadStatus;

    /// The file name the client sent
    fn declared_file_name(&self) -> &str;

    /// Sniffed MIME type, if it could be detected
    fn content_type(&self) -> Option<&str>;

    fn size(&self) -> u64;

    fn is_image(&self) -> bool {
        self.content_type()
            .is_some_and(|content_type| IMAGE_CONTENT_TYPES.contains(&content_type))
    }

    /// Persist the uploaded bytes at `destination`, replacing any file there
    fn move_to(&mut self, destination: &Path) -> io::Result<()>;
}

/// An upload already spooled to a local temporary file
#[derive(Debug, Clone)]
pub struct LocalUpload {
    temp_path: PathBuf,
    name: String,
    status: UploadStatus,
    content_type: Option<String>,
    size: u64,
}

impl LocalUpload {
    /// Wrap a received temp file; the content type is sniffed from its bytes
    pub fn new(temp_path: impl Into<PathBuf>, name: impl Into<String>) -> io::Result<Self> {
        let temp_path = temp_path.into();
        let size = fs::metadata(&temp_path)?.len();
        let content_type = infer::get_from_path(&temp_path)?.map(|kind| kind.mime_type().to_string());

        Ok(Self {
            temp_path,
            name: name.into(),
            status: UploadStatus::Ok,
            content_type,
            size,
        })
    }

    /// A form submitted without selecting a file
    pub fn empty() -> Self {
        Self::failed(UploadStatus::NoFile, "")
    }

    /// An upload the transport layer reported as broken
    pub fn failed(status: UploadStatus, name: impl Into<String>) -> Self {
        Self {
            temp_path: PathBuf::new(),
            name: name.into(),
            status,
            content_type: None,
            size: 0,
        }
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }
}

impl Upload for LocalUpload {
    fn status(&self) -> UploadStatus {
        self.status
    }

    fn declared_file_name(&self) -> &str {
        &self.name
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn move_to(&mut self, destination: &Path) -> io::Result<()> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }

        // rename fails across filesystems; fall back to copy and remove
        if let Err(e) = fs::rename(&self.temp_path, destination) {
            debug!(
                "Rename of {} failed ({}), copying instead",
                self.temp_path.display(),
                e
            );
            fs::copy(&self.temp_path, destination)?;
            fs::remove_file(&self.temp_path)?;
        }

        self.temp_path = destination.to_path_buf();
        Ok(())
    }
}
