//! Image ingestion and lookup
//!
//! [`ImageStorage`] ties the original store and the thumbnail cache together:
//! only images are accepted, presets are rendered on ingest, and stale variants
//! are removed before an original is replaced or deleted.

use crate::cache::{PictureLink, ThumbnailCache, ThumbnailRequest};
use crate::generate::{ImageProcessor, RasterProcessor};
use crate::{ImageStorageConfig, ImageStorageError, Result};
use file_storage::{split_name_extension, FileStorage, FileStorageError, Namespace, PathResolver, Upload};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Image store with a deterministic thumbnail cache
pub struct ImageStorage<P = RasterProcessor> {
    files: FileStorage,
    thumbnails: ThumbnailCache<P>,
}

impl ImageStorage<RasterProcessor> {
    pub fn from_config(config: &ImageStorageConfig) -> Result<Self> {
        Self::with_processor(config, RasterProcessor::new())
    }
}

impl<P: ImageProcessor> ImageStorage<P> {
    /// Build a storage from configuration with a custom image processor
    pub fn with_processor(config: &ImageStorageConfig, processor: P) -> Result<Self> {
        let mut originals = PathResolver::new(&config.root_dir, &config.original_dir, &config.base_path);
        let mut thumbs = PathResolver::new(&config.root_dir, &config.thumbs_dir, &config.base_path);
        if let Some(namespace) = &config.default_namespace {
            originals.set_default_namespace(namespace.clone());
            thumbs.set_default_namespace(namespace.clone());
        }

        let mut files = FileStorage::with_resolver(originals);
        files.set_max_upload_size(config.max_upload_bytes()?);

        let thumbnails = ThumbnailCache::new(thumbs, processor)
            .with_presets(config.sizes.clone())
            .with_background(Some(config.background));

        Ok(Self::new(files, thumbnails))
    }

    pub fn new(files: FileStorage, thumbnails: ThumbnailCache<P>) -> Self {
        Self { files, thumbnails }
    }

    pub fn files(&self) -> &FileStorage {
        &self.files
    }

    pub fn thumbnails(&self) -> &ThumbnailCache<P> {
        &self.thumbnails
    }

    pub fn set_default_namespace(&mut self, namespace: impl Into<Namespace>) {
        let namespace = namespace.into();
        self.files.resolver_mut().set_default_namespace(namespace.clone());
        self.thumbnails.resolver_mut().set_default_namespace(namespace);
    }

    pub fn default_namespace(&self) -> Result<&Namespace> {
        Ok(self.files.resolver().default_namespace()?)
    }

    pub fn set_base_path(&mut self, base_path: &str) {
        self.files.resolver_mut().set_base_path(base_path);
        self.thumbnails.resolver_mut().set_base_path(base_path);
    }

    pub fn base_path(&self) -> &str {
        self.files.resolver().base_path()
    }

    pub fn thumbs_dir(&self) -> &str {
        self.thumbnails.resolver().sub_dir()
    }

    /// Path of the original file `name` (including its extension)
    pub fn original_file(&self, name: &str, namespace: Option<&Namespace>) -> Result<PathBuf> {
        Ok(self.files.file_path(name, namespace)?)
    }

    /// Canonical extension for an uploaded image's content type
    pub fn image_extension<U: Upload + ?Sized>(&self, upload: &U) -> Result<&'static str> {
        match upload.content_type() {
            Some("image/gif") => Ok("gif"),
            Some("image/png") => Ok("png"),
            Some("image/jpeg") => Ok("jpg"),
            other => Err(ImageStorageError::InvalidContentType(
                other.unwrap_or("unknown").to_string(),
            )),
        }
    }

    /// Store an uploaded image as `name` and render its preset variants
    ///
    /// With `overwrite`, every cached variant of the previous image is removed
    /// before presets are rendered again. An empty upload changes nothing.
    pub fn save<U: Upload + ?Sized>(
        &self,
        upload: &mut U,
        name: &str,
        overwrite: bool,
        namespace: Option<&Namespace>,
    ) -> Result<()> {
        if upload.is_empty() {
            debug!("Empty upload for {}, nothing to store", name);
            return Ok(());
        }
        if !upload.is_image() {
            return Err(ImageStorageError::NotAnImage(
                upload.declared_file_name().to_string(),
            ));
        }

        let (base_name, extension) = split_name_extension(name)?;
        self.files.save(upload, Some(name), overwrite, namespace)?;

        if overwrite && !self.thumbnails.invalidate(namespace, base_name)? {
            return Err(ImageStorageError::StaleThumbnails(base_name.to_string()));
        }

        self.pregenerate(base_name, extension, namespace)
    }

    /// Copy a local image into the store as `name` and render its presets
    pub fn copy(&self, source: &Path, name: &str, namespace: Option<&Namespace>) -> Result<()> {
        if !source.exists() {
            return Err(FileStorageError::SourceNotFound(source.to_path_buf()).into());
        }

        let content_type = infer::get_from_path(source)
            .map_err(FileStorageError::Io)?
            .map(|kind| kind.mime_type());
        if !content_type.is_some_and(|mime| mime.contains("image")) {
            return Err(ImageStorageError::NotAnImage(source.display().to_string()));
        }

        let (base_name, extension) = split_name_extension(name)?;
        self.files.copy(source, Some(name), namespace)?;
        self.pregenerate(base_name, extension, namespace)
    }

    /// Copy many local images in parallel, each under its own file name
    ///
    /// Every source gets its own result; one failure does not stop the others.
    pub fn copy_batch<F>(
        &self,
        sources: &[PathBuf],
        namespace: Option<&Namespace>,
        progress_callback: F,
    ) -> HashMap<PathBuf, Result<()>>
    where
        F: Fn(usize, usize) + Send + Sync,
    {
        let total = sources.len();
        let completed = AtomicUsize::new(0);

        let results: Vec<(PathBuf, Result<()>)> = sources
            .par_iter()
            .map(|source| {
                let result = match source.file_name().and_then(|name| name.to_str()) {
                    Some(name) => self.copy(source, name, namespace),
                    None => Err(FileStorageError::InvalidName(source.display().to_string()).into()),
                };

                let current = completed.fetch_add(1, Ordering::Relaxed) + 1;
                progress_callback(current, total);

                (source.clone(), result)
            })
            .collect();

        results.into_iter().collect()
    }

    /// Render all preset sizes of a stored original
    pub fn pregenerate(
        &self,
        base_name: &str,
        extension: &str,
        namespace: Option<&Namespace>,
    ) -> Result<()> {
        let original = self.original_file(&format!("{}.{}", base_name, extension), namespace)?;
        self.thumbnails.pregenerate(&original, namespace, base_name)
    }

    /// Public link of a picture or one of its resized variants
    ///
    /// `picture` is the base name, or the full file name when `extension` is
    /// `None`. Without width and height the original's link is returned and the
    /// cache is not involved. An empty namespace falls back to the default one.
    pub fn picture_link(
        &self,
        namespace: &Namespace,
        picture: &str,
        extension: Option<&str>,
        request: &ThumbnailRequest,
    ) -> Result<PictureLink> {
        let (base_name, extension) = match extension {
            Some(extension) => (picture, extension),
            None => split_name_extension(picture)?,
        };
        let file_name = format!("{}.{}", base_name, extension);
        let namespace = self.files.resolver().namespace(Some(namespace))?;

        if request.is_original() {
            return Ok(PictureLink::Available(self.files.file_link(namespace, &file_name)));
        }

        let original = self.files.file_path(&file_name, Some(namespace))?;
        self.thumbnails.link(&original, namespace, base_name, request)
    }

    /// Remove every cached variant of `base_name`
    pub fn invalidate(&self, base_name: &str, namespace: Option<&Namespace>) -> Result<bool> {
        self.thumbnails.invalidate(namespace, base_name)
    }

    /// Delete a picture's variants, then the picture itself
    ///
    /// The original is left untouched when its variants cannot all be removed.
    pub fn delete_picture(
        &self,
        name: &str,
        extension: Option<&str>,
        namespace: Option<&Namespace>,
    ) -> Result<()> {
        let (base_name, extension) = match extension {
            Some(extension) => (name, extension),
            None => split_name_extension(name)?,
        };

        if !self.thumbnails.invalidate(namespace, base_name)? {
            let directory = self.thumbnails.resolver().directory(namespace)?;
            return Err(FileStorageError::DeleteFailed(directory).into());
        }

        let file_name = format!("{}.{}", base_name, extension);
        if !self.files.delete(&file_name, namespace)? {
            return Err(FileStorageError::DeleteFailed(self.files.file_path(&file_name, namespace)?).into());
        }

        info!("Deleted picture {}", file_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(unix)]
    use crate::cache::tests::LockedDir;
    use crate::cache::tests::{write_png, CountingProcessor};
    use crate::PresetSize;
    use anyhow::Result;
    use file_storage::{LocalUpload, UploadStatus};
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn config(temp_dir: &TempDir) -> ImageStorageConfig {
        ImageStorageConfig {
            root_dir: temp_dir.path().join("www"),
            base_path: "https://example.com/".to_string(),
            sizes: vec![PresetSize::new(100, 100)],
            default_namespace: Some(Namespace::from("u/1")),
            ..Default::default()
        }
    }

    fn storage(temp_dir: &TempDir) -> Result<ImageStorage<CountingProcessor>> {
        Ok(ImageStorage::with_processor(&config(temp_dir), CountingProcessor::default())?)
    }

    fn png_upload(temp_dir: &TempDir, name: &str, width: u32, height: u32) -> Result<LocalUpload> {
        let spooled = temp_dir.path().join("spool").join(name);
        write_png(&spooled, width, height)?;
        Ok(LocalUpload::new(&spooled, name)?)
    }

    #[test]
    fn test_save_stores_original_and_presets() -> Result<()> {
        let temp_dir = tempdir()?;
        let storage = storage(&temp_dir)?;
        let mut upload = png_upload(&temp_dir, "a.png", 300, 150)?;

        storage.save(&mut upload, "a.png", false, None)?;

        let www = temp_dir.path().join("www");
        assert!(www.join("original/u/1/a.png").is_file());
        let preset = image::open(www.join("thumbs/u/1/100x100/a.jpg"))?;
        assert_eq!((preset.width(), preset.height()), (100, 50));
        Ok(())
    }

    #[test]
    fn test_save_rejects_non_images() -> Result<()> {
        let temp_dir = tempdir()?;
        let storage = storage(&temp_dir)?;
        let spooled = temp_dir.path().join("notes.txt");
        fs::write(&spooled, b"plain text")?;
        let mut upload = LocalUpload::new(&spooled, "notes.txt")?;

        let result = storage.save(&mut upload, "notes.png", false, None);
        assert!(matches!(result, Err(ImageStorageError::NotAnImage(_))));
        assert!(spooled.exists());
        Ok(())
    }

    #[test]
    fn test_save_empty_upload_is_noop() -> Result<()> {
        let temp_dir = tempdir()?;
        let storage = storage(&temp_dir)?;

        storage.save(&mut LocalUpload::empty(), "a.png", true, None)?;
        assert!(!temp_dir.path().join("www").exists());
        assert_eq!(storage.thumbnails().processor().encoded(), 0);
        Ok(())
    }

    #[test]
    fn test_save_propagates_upload_and_name_errors() -> Result<()> {
        let temp_dir = tempdir()?;
        let storage = storage(&temp_dir)?;

        let mut upload = png_upload(&temp_dir, "a.png", 10, 10)?;
        let result = storage.save(&mut upload, "no-extension", false, None);
        assert!(matches!(
            result,
            Err(ImageStorageError::Storage(FileStorageError::InvalidName(_)))
        ));

        let mut failed = LocalUpload::failed(UploadStatus::CantWrite, "a.png");
        let result = storage.save(&mut failed, "a.png", false, None);
        // A failed upload has no sniffable content, so it is not an image either
        assert!(matches!(result, Err(ImageStorageError::NotAnImage(_))));
        Ok(())
    }

    #[test]
    fn test_save_overwrite_replaces_stale_variants() -> Result<()> {
        let temp_dir = tempdir()?;
        let storage = storage(&temp_dir)?;
        let namespace = Namespace::from("u/1");

        storage.save(&mut png_upload(&temp_dir, "a.png", 300, 150)?, "a.png", false, None)?;
        let lazy = storage.picture_link(&namespace, "a", Some("png"), &ThumbnailRequest::sized(50, 50))?;
        assert!(lazy.is_available());
        let www = temp_dir.path().join("www");
        assert!(www.join("thumbs/u/1/50x50/a.jpg").is_file());

        let again = storage.save(&mut png_upload(&temp_dir, "a.png", 40, 200)?, "a.png", false, None);
        assert!(matches!(
            again,
            Err(ImageStorageError::Storage(FileStorageError::AlreadyExists(_)))
        ));

        storage.save(&mut png_upload(&temp_dir, "a.png", 40, 200)?, "a.png", true, None)?;

        // The lazily created variant is gone, the preset was rendered from the new image
        assert!(!www.join("thumbs/u/1/50x50/a.jpg").exists());
        let preset = image::open(www.join("thumbs/u/1/100x100/a.jpg"))?;
        assert_eq!((preset.width(), preset.height()), (20, 100));
        Ok(())
    }

    #[test]
    fn test_copy_checks_source() -> Result<()> {
        let temp_dir = tempdir()?;
        let storage = storage(&temp_dir)?;

        let missing = storage.copy(&temp_dir.path().join("missing.png"), "m.png", None);
        assert!(matches!(
            missing,
            Err(ImageStorageError::Storage(FileStorageError::SourceNotFound(_)))
        ));

        let text = temp_dir.path().join("readme.md");
        fs::write(&text, b"# hello")?;
        let not_image = storage.copy(&text, "readme.png", None);
        assert!(matches!(not_image, Err(ImageStorageError::NotAnImage(_))));
        Ok(())
    }

    #[test]
    fn test_copy_stores_and_pregenerates() -> Result<()> {
        let temp_dir = tempdir()?;
        let storage = storage(&temp_dir)?;
        let source = temp_dir.path().join("camera").join("IMG_0001.png");
        write_png(&source, 64, 64)?;
        let namespace = Namespace::from("gallery");

        storage.copy(&source, "holiday.png", Some(&namespace))?;

        let www = temp_dir.path().join("www");
        assert!(source.exists());
        assert!(www.join("original/gallery/holiday.png").is_file());
        assert!(www.join("thumbs/gallery/100x100/holiday.jpg").is_file());

        let again = storage.copy(&source, "holiday.png", Some(&namespace));
        assert!(matches!(
            again,
            Err(ImageStorageError::Storage(FileStorageError::AlreadyExists(_)))
        ));
        Ok(())
    }

    #[test]
    fn test_copy_batch_reports_each_source() -> Result<()> {
        let temp_dir = tempdir()?;
        let storage = storage(&temp_dir)?;
        let incoming = temp_dir.path().join("incoming");
        let mut sources = Vec::new();
        for index in 0..4 {
            let path = incoming.join(format!("p{}.png", index));
            write_png(&path, 32, 32)?;
            sources.push(path);
        }
        let text = incoming.join("notes.txt");
        fs::write(&text, b"not a picture")?;
        sources.push(text.clone());

        let calls = AtomicUsize::new(0);
        let results = storage.copy_batch(&sources, None, |current, total| {
            assert!(current <= total);
            calls.fetch_add(1, Ordering::Relaxed);
        });

        assert_eq!(results.len(), 5);
        assert_eq!(calls.load(Ordering::Relaxed), 5);
        assert!(matches!(results[&text], Err(ImageStorageError::NotAnImage(_))));
        for source in &sources[..4] {
            assert!(results[source].is_ok());
        }
        assert!(temp_dir.path().join("www/thumbs/u/1/100x100/p3.jpg").is_file());
        Ok(())
    }

    #[test]
    fn test_picture_link_original_has_no_side_effects() -> Result<()> {
        let temp_dir = tempdir()?;
        let storage = storage(&temp_dir)?;
        let namespace = Namespace::from("u/1");

        let link = storage.picture_link(&namespace, "a.png", None, &ThumbnailRequest::original())?;
        assert_eq!(link.as_str(), Some("https://example.com/original/u/1/a.png"));

        let link = storage.picture_link(&namespace, "a", Some("png"), &ThumbnailRequest::width(0))?;
        assert_eq!(link.as_str(), Some("https://example.com/original/u/1/a.png"));
        assert!(!temp_dir.path().join("www").exists());

        let invalid = storage.picture_link(&namespace, "a", None, &ThumbnailRequest::original());
        assert!(matches!(
            invalid,
            Err(ImageStorageError::Storage(FileStorageError::InvalidName(_)))
        ));
        Ok(())
    }

    #[test]
    fn test_picture_link_for_missing_original_is_unavailable() -> Result<()> {
        let temp_dir = tempdir()?;
        let storage = storage(&temp_dir)?;

        let link = storage.picture_link(
            &Namespace::from("u/1"),
            "ghost.png",
            None,
            &ThumbnailRequest::sized(10, 10),
        )?;
        assert_eq!(link, PictureLink::Unavailable);
        Ok(())
    }

    #[test]
    fn test_delete_picture_removes_variants_then_original() -> Result<()> {
        let temp_dir = tempdir()?;
        let storage = storage(&temp_dir)?;
        let namespace = Namespace::from("u/1");
        storage.save(&mut png_upload(&temp_dir, "a.png", 80, 80)?, "a.png", false, None)?;
        storage.picture_link(&namespace, "a", Some("png"), &ThumbnailRequest::height(20))?;

        storage.delete_picture("a.png", None, None)?;

        let www = temp_dir.path().join("www");
        assert!(!www.join("original/u/1/a.png").exists());
        assert!(!www.join("thumbs/u/1/100x100/a.jpg").exists());
        assert!(!www.join("thumbs/u/1/0x20/a.jpg").exists());

        // Deleting again is not an error
        storage.delete_picture("a", Some("png"), None)?;
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_delete_picture_keeps_original_when_variants_remain() -> Result<()> {
        let temp_dir = tempdir()?;
        let storage = storage(&temp_dir)?;
        storage.save(&mut png_upload(&temp_dir, "a.png", 80, 80)?, "a.png", false, None)?;

        let www = temp_dir.path().join("www");
        let Some(_locked) = LockedDir::lock(&www.join("thumbs/u/1/100x100"), 0o555)? else {
            return Ok(());
        };

        let result = storage.delete_picture("a.png", None, None);
        assert!(matches!(
            result,
            Err(ImageStorageError::Storage(FileStorageError::DeleteFailed(_)))
        ));
        assert!(www.join("original/u/1/a.png").is_file());
        assert!(www.join("thumbs/u/1/100x100/a.jpg").exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_save_overwrite_reports_stale_variants() -> Result<()> {
        let temp_dir = tempdir()?;
        let storage = storage(&temp_dir)?;
        storage.save(&mut png_upload(&temp_dir, "a.png", 80, 80)?, "a.png", false, None)?;
        let rendered = storage.thumbnails().processor().encoded();

        let www = temp_dir.path().join("www");
        let Some(_locked) = LockedDir::lock(&www.join("thumbs/u/1/100x100"), 0o555)? else {
            return Ok(());
        };

        let result = storage.save(&mut png_upload(&temp_dir, "a.png", 40, 40)?, "a.png", true, None);
        assert!(matches!(result, Err(ImageStorageError::StaleThumbnails(ref name)) if name == "a"));
        // Presets are not rendered over stale variants
        assert_eq!(storage.thumbnails().processor().encoded(), rendered);
        Ok(())
    }

    #[test]
    fn test_picture_link_empty_namespace_uses_default() -> Result<()> {
        let temp_dir = tempdir()?;
        let storage = storage(&temp_dir)?;
        storage.save(&mut png_upload(&temp_dir, "a.png", 80, 80)?, "a.png", false, None)?;
        let empty = Namespace::from("");

        let original = storage.picture_link(&empty, "a.png", None, &ThumbnailRequest::original())?;
        assert_eq!(original.as_str(), Some("https://example.com/original/u/1/a.png"));

        let preset = storage.picture_link(&empty, "a.png", None, &ThumbnailRequest::sized(100, 100))?;
        assert_eq!(preset.as_str(), Some("https://example.com/thumbs/u/1/100x100/a.jpg"));
        Ok(())
    }

    #[test]
    fn test_namespace_and_base_path_setters() -> Result<()> {
        let temp_dir = tempdir()?;
        let mut storage = storage(&temp_dir)?;

        storage.set_default_namespace(["shop", "7"].as_slice());
        assert_eq!(storage.default_namespace()?.as_str(), "shop/7");
        assert_eq!(
            storage.original_file("x.png", None)?,
            temp_dir.path().join("www/original/shop/7/x.png")
        );
        assert_eq!(
            storage.thumbnails().variant_path(None, "x", "10x10")?,
            temp_dir.path().join("www/thumbs/shop/7/10x10/x.jpg")
        );

        storage.set_base_path("/media/");
        assert_eq!(storage.base_path(), "/media");
        assert_eq!(storage.thumbs_dir(), "thumbs");
        Ok(())
    }

    #[test]
    fn test_image_extension_from_content_type() -> Result<()> {
        let temp_dir = tempdir()?;
        let storage = storage(&temp_dir)?;

        let upload = png_upload(&temp_dir, "a.png", 4, 4)?;
        assert_eq!(storage.image_extension(&upload)?, "png");

        let text = temp_dir.path().join("t.txt");
        fs::write(&text, b"text")?;
        let upload = LocalUpload::new(&text, "t.txt")?;
        assert!(matches!(
            storage.image_extension(&upload),
            Err(ImageStorageError::InvalidContentType(_))
        ));
        Ok(())
    }
}
