//! On-disk thumbnail cache
//!
//! Every variant is a file at `<root>/<thumbs>/<namespace>/<token>/<name>.jpg`.
//! A request resolves that path, renders the file if it is missing and returns
//! the public link. There is no index besides the files themselves.

use crate::generate::{create_thumbnail, Background, ImageProcessor, RasterProcessor, ThumbnailError};
use crate::naming::{directory_name, ResizeFlags, DEFAULT_JPEG_QUALITY};
use crate::{ImageStorageError, PresetSize, Result};
use file_storage::{Namespace, PathResolver};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Extension of every rendered variant
pub const THUMB_EXTENSION: &str = ".jpg";

/// Parameters of a picture link request
///
/// Without width and height the request refers to the original file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThumbnailRequest {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub flags: Option<ResizeFlags>,
    pub quality: Option<u8>,
    /// Append a timestamp query so browsers refetch the file
    pub bypass_browser_cache: bool,
}

impl ThumbnailRequest {
    pub fn original() -> Self {
        Self::default()
    }

    pub fn sized(width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            ..Self::default()
        }
    }

    pub fn width(width: u32) -> Self {
        Self {
            width: Some(width),
            ..Self::default()
        }
    }

    pub fn height(height: u32) -> Self {
        Self {
            height: Some(height),
            ..Self::default()
        }
    }

    pub fn with_flags(mut self, flags: ResizeFlags) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn bypass_browser_cache(mut self) -> Self {
        self.bypass_browser_cache = true;
        self
    }

    /// True when no resize dimension is set
    pub fn is_original(&self) -> bool {
        self.width.unwrap_or(0) == 0 && self.height.unwrap_or(0) == 0
    }

    pub fn effective_flags(&self) -> ResizeFlags {
        self.flags.unwrap_or(ResizeFlags::FIT)
    }

    /// Requested quality, with zero meaning the default
    pub fn effective_quality(&self) -> u8 {
        self.quality
            .filter(|quality| *quality > 0)
            .unwrap_or(DEFAULT_JPEG_QUALITY)
    }
}

/// Outcome of a link request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PictureLink {
    Available(String),
    /// The variant could not be rendered; callers show no picture
    Unavailable,
}

impl PictureLink {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PictureLink::Available(link) => Some(link),
            PictureLink::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, PictureLink::Available(_))
    }

    pub fn into_option(self) -> Option<String> {
        match self {
            PictureLink::Available(link) => Some(link),
            PictureLink::Unavailable => None,
        }
    }
}

/// Lazily populated cache of resized JPEG variants
pub struct ThumbnailCache<P = RasterProcessor> {
    resolver: PathResolver,
    processor: P,
    presets: Vec<PresetSize>,
    background: Option<Background>,
}

impl<P: ImageProcessor> ThumbnailCache<P> {
    /// `resolver` points at the thumbnails directory (`<root>/<thumbs>`)
    pub fn new(resolver: PathResolver, processor: P) -> Self {
        Self {
            resolver,
            processor,
            presets: Vec::new(),
            background: Some(Background::WHITE),
        }
    }

    pub fn with_presets(mut self, presets: Vec<PresetSize>) -> Self {
        self.presets = presets;
        self
    }

    /// `None` renders transparent pixels without flattening them first
    pub fn with_background(mut self, background: Option<Background>) -> Self {
        self.background = background;
        self
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn resolver_mut(&mut self) -> &mut PathResolver {
        &mut self.resolver
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn presets(&self) -> &[PresetSize] {
        &self.presets
    }

    /// Path of the variant `token` of `base_name`
    pub fn variant_path(
        &self,
        namespace: Option<&Namespace>,
        base_name: &str,
        token: &str,
    ) -> Result<PathBuf> {
        Ok(self
            .resolver
            .directory(namespace)?
            .join(token)
            .join(variant_file_name(base_name)))
    }

    /// Public link of the variant `token` of `base_name`
    pub fn variant_link(&self, namespace: &Namespace, base_name: &str, token: &str) -> String {
        self.resolver
            .link(namespace, &format!("{}/{}", token, variant_file_name(base_name)))
    }

    /// Link to a resized variant of `original`, rendering it on a cache miss
    ///
    /// A rendering failure yields [`PictureLink::Unavailable`] rather than an error.
    /// An empty namespace falls back to the default one. Fails with
    /// [`ImageStorageError::InvalidDimensions`] when the request has neither width
    /// nor height.
    pub fn link(
        &self,
        original: &Path,
        namespace: &Namespace,
        base_name: &str,
        request: &ThumbnailRequest,
    ) -> Result<PictureLink> {
        let namespace = self.resolver.namespace(Some(namespace))?;
        let flags = request.effective_flags();
        let quality = request.effective_quality();
        let token = directory_name(request.width, request.height, flags, quality)?;
        let destination = self.variant_path(Some(namespace), base_name, &token)?;

        if destination.exists() {
            debug!("Thumbnail cache hit: {}", destination.display());
        } else {
            debug!("Thumbnail cache miss: {}", destination.display());
            let rendered = self.render(
                original,
                &destination,
                request.width,
                request.height,
                flags,
                quality,
            );
            if let Err(e) = rendered {
                warn!("Thumbnail {} unavailable: {}", destination.display(), e);
                return Ok(PictureLink::Unavailable);
            }
        }

        let mut link = self.variant_link(namespace, base_name, &token);
        if request.bypass_browser_cache {
            link.push_str(&format!("?_cache={}", chrono::Utc::now().timestamp()));
        }
        Ok(PictureLink::Available(link))
    }

    /// Delete every cached variant of `base_name` in the namespace
    ///
    /// Looks at files named `<base_name>.jpg` in the namespace's thumbnail
    /// directory and one level of token directories below it. Stops at the first
    /// directory that cannot be read or file that cannot be removed and returns
    /// `false`; files removed before that stay removed.
    pub fn invalidate(&self, namespace: Option<&Namespace>, base_name: &str) -> Result<bool> {
        let directory = self.resolver.directory(namespace)?;
        if !directory.is_dir() {
            return Ok(true);
        }

        let file_name = variant_file_name(base_name);
        let entries = WalkDir::new(&directory)
            .min_depth(1)
            .max_depth(2)
            .sort_by_file_name();

        let mut removed = 0usize;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Unable to scan thumbnails of {}: {}", base_name, e);
                    return Ok(false);
                }
            };
            if !entry.file_type().is_file() || entry.file_name() != file_name.as_str() {
                continue;
            }
            if let Err(e) = fs::remove_file(entry.path()) {
                warn!("Failed to delete thumbnail {}: {}", entry.path().display(), e);
                return Ok(false);
            }
            removed += 1;
        }

        if removed > 0 {
            info!("Removed {} cached thumbnails of {}", removed, base_name);
        }
        Ok(true)
    }

    /// Render every preset size of `original`, stopping at the first failure
    ///
    /// Presets use [`ResizeFlags::FIT`] and the default quality and are always
    /// re-rendered, replacing whatever the cache held.
    pub fn pregenerate(
        &self,
        original: &Path,
        namespace: Option<&Namespace>,
        base_name: &str,
    ) -> Result<()> {
        for preset in &self.presets {
            let (width, height) = (Some(preset.width), Some(preset.height));
            let token = directory_name(width, height, ResizeFlags::FIT, DEFAULT_JPEG_QUALITY)?;
            let destination = self.variant_path(namespace, base_name, &token)?;

            self.render(
                original,
                &destination,
                width,
                height,
                ResizeFlags::FIT,
                DEFAULT_JPEG_QUALITY,
            )
            .map_err(|source| ImageStorageError::ThumbCache {
                name: base_name.to_string(),
                source,
            })?;
        }

        if !self.presets.is_empty() {
            info!("Pre-generated {} thumbnails of {}", self.presets.len(), base_name);
        }
        Ok(())
    }

    fn render(
        &self,
        original: &Path,
        destination: &Path,
        width: Option<u32>,
        height: Option<u32>,
        flags: ResizeFlags,
        quality: u8,
    ) -> std::result::Result<(), ThumbnailError> {
        create_thumbnail(
            &self.processor,
            original,
            destination,
            width,
            height,
            flags,
            quality,
            self.background,
        )
    }
}

fn variant_file_name(base_name: &str) -> String {
    format!("{}{}", base_name, THUMB_EXTENSION)
}
