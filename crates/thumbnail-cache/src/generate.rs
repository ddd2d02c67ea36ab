//! Thumbnail generation pipeline
//!
//! The pixel work sits behind the [`ImageProcessor`] trait so the cache only
//! decides which variant to build and where to write it. [`RasterProcessor`] is
//! the default implementation on top of the `image` crate.

use crate::naming::ResizeFlags;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageEncoder, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Failure reported by an image processor
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to decode {}: {message}", .path.display())]
    Decode { path: PathBuf, message: String },

    #[error("Failed to encode {}: {message}", .path.display())]
    Encode { path: PathBuf, message: String },

    #[error("Invalid resize request: {0}")]
    InvalidGeometry(String),
}

/// Failure of one thumbnail generation attempt
#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    #[error("Original does not exist: {}", .0.display())]
    MissingSource(PathBuf),

    #[error("Unable to create thumbnail directory {}: {source}", .path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Opaque RGB colour used behind transparent pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Background {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Background {
    pub const WHITE: Background = Background {
        red: 255,
        green: 255,
        blue: 255,
    };

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.red, self.green, self.blue)
    }
}

impl Default for Background {
    fn default() -> Self {
        Background::WHITE
    }
}

/// Decode, compose, resize and JPEG-encode images
pub trait ImageProcessor: Send + Sync {
    type Image;

    fn decode(&self, path: &Path) -> Result<Self::Image, ProcessError>;

    fn dimensions(&self, image: &Self::Image) -> (u32, u32);

    fn blank_canvas(&self, width: u32, height: u32, background: Background) -> Self::Image;

    /// Draw `src` onto `dest` with its top-left corner at (`x`, `y`)
    fn place(&self, dest: &mut Self::Image, src: &Self::Image, x: u32, y: u32);

    fn resize(
        &self,
        image: Self::Image,
        width: Option<u32>,
        height: Option<u32>,
        flags: ResizeFlags,
    ) -> Result<Self::Image, ProcessError>;

    fn encode_jpeg(
        &self,
        image: &Self::Image,
        destination: &Path,
        quality: u8,
    ) -> Result<(), ProcessError>;
}

/// Render `source` into a JPEG variant at `destination`
///
/// The destination directory is created when missing; a directory that appears
/// concurrently is fine.
#[allow(clippy::too_many_arguments)]
pub fn create_thumbnail<P: ImageProcessor + ?Sized>(
    processor: &P,
    source: &Path,
    destination: &Path,
    width: Option<u32>,
    height: Option<u32>,
    flags: ResizeFlags,
    quality: u8,
    background: Option<Background>,
) -> Result<(), ThumbnailError> {
    if !source.is_file() {
        return Err(ThumbnailError::MissingSource(source.to_path_buf()));
    }

    if let Some(dir) = destination.parent() {
        fs::create_dir_all(dir).map_err(|source| ThumbnailError::Directory {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let decoded = processor.decode(source)?;
    let image = match background {
        Some(background) => {
            let (w, h) = processor.dimensions(&decoded);
            let mut canvas = processor.blank_canvas(w, h, background);
            processor.place(&mut canvas, &decoded, 0, 0);
            canvas
        }
        None => decoded,
    };

    let resized = processor.resize(image, width, height, flags)?;
    processor.encode_jpeg(&resized, destination, quality)?;

    debug!(
        "Rendered {} -> {} ({:?}x{:?}, {}, q{})",
        source.display(),
        destination.display(),
        width,
        height,
        flags,
        quality
    );
    Ok(())
}

/// Target size for a resize of a `src_width` x `src_height` image
///
/// Missing or zero target dimensions are unconstrained. The result is never
/// smaller than 1x1.
pub fn calculate_size(
    src_width: u32,
    src_height: u32,
    width: Option<u32>,
    height: Option<u32>,
    flags: ResizeFlags,
) -> Result<(u32, u32), ProcessError> {
    let width = width.filter(|w| *w > 0);
    let height = height.filter(|h| *h > 0);
    let (src_w, src_h) = (src_width.max(1) as f64, src_height.max(1) as f64);

    let (new_width, new_height) = if flags.contains(ResizeFlags::STRETCH) {
        let (Some(width), Some(height)) = (width, height) else {
            return Err(ProcessError::InvalidGeometry(
                "stretching requires both width and height".to_string(),
            ));
        };
        if flags.contains(ResizeFlags::SHRINK_ONLY) {
            (
                (src_w * (width as f64 / src_w).min(1.0)).round(),
                (src_h * (height as f64 / src_h).min(1.0)).round(),
            )
        } else {
            (width as f64, height as f64)
        }
    } else {
        let mut scales = Vec::with_capacity(3);
        if let Some(width) = width {
            scales.push(width as f64 / src_w);
        }
        if let Some(height) = height {
            scales.push(height as f64 / src_h);
        }
        if scales.is_empty() {
            return Err(ProcessError::InvalidGeometry(
                "at least width or height must be given".to_string(),
            ));
        }
        if flags.contains(ResizeFlags::FILL) {
            let cover = scales.iter().cloned().fold(f64::MIN, f64::max);
            scales = vec![cover];
        }
        if flags.contains(ResizeFlags::SHRINK_ONLY) {
            scales.push(1.0);
        }
        let scale = scales.iter().cloned().fold(f64::MAX, f64::min);
        ((src_w * scale).round(), (src_h * scale).round())
    };

    Ok(((new_width as u32).max(1), (new_height as u32).max(1)))
}

/// [`ImageProcessor`] backed by the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterProcessor;

impl RasterProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl ImageProcessor for RasterProcessor {
    type Image = DynamicImage;

    fn decode(&self, path: &Path) -> Result<DynamicImage, ProcessError> {
        image::open(path).map_err(|e| ProcessError::Decode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn dimensions(&self, image: &DynamicImage) -> (u32, u32) {
        image.dimensions()
    }

    fn blank_canvas(&self, width: u32, height: u32, background: Background) -> DynamicImage {
        let pixel = Rgba([background.red, background.green, background.blue, 255]);
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, pixel))
    }

    fn place(&self, dest: &mut DynamicImage, src: &DynamicImage, x: u32, y: u32) {
        let top = src.to_rgba8();
        match dest {
            DynamicImage::ImageRgba8(canvas) => {
                imageops::overlay(canvas, &top, x as i64, y as i64);
            }
            other => {
                let mut canvas = other.to_rgba8();
                imageops::overlay(&mut canvas, &top, x as i64, y as i64);
                *other = DynamicImage::ImageRgba8(canvas);
            }
        }
    }

    fn resize(
        &self,
        image: DynamicImage,
        width: Option<u32>,
        height: Option<u32>,
        flags: ResizeFlags,
    ) -> Result<DynamicImage, ProcessError> {
        if flags.contains(ResizeFlags::EXACT) {
            let filled = self.resize(image, width, height, ResizeFlags::FILL)?;
            let (filled_w, filled_h) = filled.dimensions();
            let crop_w = width.filter(|w| *w > 0).unwrap_or(filled_w).min(filled_w);
            let crop_h = height.filter(|h| *h > 0).unwrap_or(filled_h).min(filled_h);
            let left = ((filled_w - crop_w) as f64 / 2.0).round() as u32;
            let top = ((filled_h - crop_h) as f64 / 2.0).round() as u32;
            return Ok(filled.crop_imm(left, top, crop_w, crop_h));
        }

        let (src_w, src_h) = image.dimensions();
        let (new_w, new_h) = calculate_size(src_w, src_h, width, height, flags)?;
        if (new_w, new_h) == (src_w, src_h) {
            return Ok(image);
        }
        Ok(image.resize_exact(new_w, new_h, FilterType::Lanczos3))
    }

    fn encode_jpeg(
        &self,
        image: &DynamicImage,
        destination: &Path,
        quality: u8,
    ) -> Result<(), ProcessError> {
        let encode_error = |message: String| ProcessError::Encode {
            path: destination.to_path_buf(),
            message,
        };

        // JPEG has no alpha channel
        let rgb = image.to_rgb8();
        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
            .write_image(
                &rgb,
                rgb.width(),
                rgb.height(),
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| encode_error(e.to_string()))?;

        // Only complete images reach the cache directory
        fs::write(destination, buffer).map_err(|e| encode_error(e.to_string()))
    }
}
