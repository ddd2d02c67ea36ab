//! Deterministic on-disk thumbnail caching for stored images
//!
//! Originals live in a [`file_storage::FileStorage`]. Resized variants are
//! rendered lazily on first request (or eagerly for configured preset sizes at
//! ingest) and kept next to them under a directory whose name encodes the resize
//! parameters:
//!
//! ```text
//! <root_dir>/
//! ├── original/<namespace>/<name>.<ext>
//! └── thumbs/<namespace>/<token>/<name>.jpg    # token e.g. 100x100, 0x80FSO, 640x480q80
//! ```
//!
//! # Features
//!
//! - **Stable cache keys**: the directory token is a pure function of width,
//!   height, resize flags and quality
//! - **Lazy generation**: a variant is rendered only when its file is missing
//! - **Eager presets**: configured sizes are rendered on save/copy, fail-fast
//! - **Invalidation**: overwriting or deleting an original removes every variant
//! - **Pluggable pixels**: resizing and encoding go through [`ImageProcessor`]
//!
//! Concurrent requests for the same missing variant may both render it. The
//! output is identical, so the last writer wins and nothing is corrupted.

pub mod cache;
pub mod generate;
pub mod naming;
pub mod storage;

pub use cache::{PictureLink, ThumbnailCache, ThumbnailRequest, THUMB_EXTENSION};
pub use generate::{
    calculate_size, create_thumbnail, Background, ImageProcessor, ProcessError, RasterProcessor,
    ThumbnailError,
};
pub use naming::{directory_name, ResizeFlags, DEFAULT_JPEG_QUALITY};
pub use storage::ImageStorage;

use file_storage::{parse_byte_size, FileStorageError, Namespace};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Errors raised by image storage and thumbnail operations
#[derive(Debug, thiserror::Error)]
pub enum ImageStorageError {
    #[error(transparent)]
    Storage(#[from] FileStorageError),

    #[error("Invalid width or height")]
    InvalidDimensions,

    #[error("File is not an image: {0}")]
    NotAnImage(String),

    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    #[error("Invalid size: {0}")]
    InvalidSize(String),

    #[error("Invalid resize flags: {0}")]
    InvalidFlags(String),

    /// A preset variant could not be rendered
    #[error("Error creating thumbnail {name}: {source}")]
    ThumbCache {
        name: String,
        #[source]
        source: ThumbnailError,
    },

    /// Variants of an overwritten original could not be removed
    #[error("Unable to remove stale thumbnails of {0}")]
    StaleThumbnails(String),
}

pub type Result<T> = std::result::Result<T, ImageStorageError>;

/// A preset `WIDTHxHEIGHT` box rendered eagerly on ingest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PresetSize {
    pub width: u32,
    pub height: u32,
}

impl PresetSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl FromStr for PresetSize {
    type Err = ImageStorageError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ImageStorageError::InvalidSize(format!("{} (expected WIDTHxHEIGHT)", s));
        let (width, height) = s
            .split_once(|c| c == 'x' || c == 'X')
            .ok_or_else(invalid)?;
        let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(width) || !all_digits(height) {
            return Err(invalid());
        }
        Ok(Self {
            width: width.parse().map_err(|_| invalid())?,
            height: height.parse().map_err(|_| invalid())?,
        })
    }
}

impl TryFrom<String> for PresetSize {
    type Error = ImageStorageError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PresetSize> for String {
    fn from(size: PresetSize) -> Self {
        size.to_string()
    }
}

impl fmt::Display for PresetSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Storage layout and thumbnail settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageStorageConfig {
    /// Local web root
    pub root_dir: PathBuf,
    /// Originals directory, relative to `root_dir`
    pub original_dir: String,
    /// Thumbnails directory, relative to `root_dir`
    pub thumbs_dir: String,
    /// Prefix of public links, e.g. `https://www.example.com`
    pub base_path: String,
    /// Sizes rendered eagerly on save/copy
    pub sizes: Vec<PresetSize>,
    pub default_namespace: Option<Namespace>,
    /// Fill behind transparent pixels before JPEG encoding
    pub background: Background,
    /// Human size limit for uploads, e.g. `8M`
    pub max_upload_size: Option<String>,
}

impl Default for ImageStorageConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("www"),
            original_dir: "original".to_string(),
            thumbs_dir: "thumbs".to_string(),
            base_path: String::new(),
            sizes: Vec::new(),
            default_namespace: None,
            background: Background::WHITE,
            max_upload_size: None,
        }
    }
}

impl ImageStorageConfig {
    /// Upload limit in bytes, if one is configured
    pub fn max_upload_bytes(&self) -> Result<Option<u64>> {
        self.max_upload_size
            .as_deref()
            .map(|text| {
                parse_byte_size(text)
                    .map(|bytes| bytes as u64)
                    .ok_or_else(|| ImageStorageError::InvalidSize(text.to_string()))
            })
            .transpose()
    }
}
