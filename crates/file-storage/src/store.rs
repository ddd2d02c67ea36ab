//! Original file store
//!
//! CRUD over the un-resized "original" files of a namespace. Existence on disk is
//! the only record of a stored file.

use crate::upload::Upload;
use crate::{FileStorageError, Namespace, PathResolver, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Namespaced store for original files
#[derive(Debug, Clone)]
pub struct FileStorage {
    resolver: PathResolver,
    max_upload_size: Option<u64>,
}

impl FileStorage {
    /// Create a store rooted at `<root_dir>/<sub_dir>` with links under `base_path`
    pub fn new(
        root_dir: impl Into<PathBuf>,
        sub_dir: impl Into<String>,
        base_path: impl AsRef<str>,
    ) -> Self {
        Self::with_resolver(PathResolver::new(root_dir, sub_dir, base_path))
    }

    pub fn with_resolver(resolver: PathResolver) -> Self {
        Self {
            resolver,
            max_upload_size: None,
        }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn resolver_mut(&mut self) -> &mut PathResolver {
        &mut self.resolver
    }

    /// Reject uploads larger than `limit` bytes; `None` disables the check
    pub fn set_max_upload_size(&mut self, limit: Option<u64>) {
        self.max_upload_size = limit;
    }

    pub fn max_upload_size(&self) -> Option<u64> {
        self.max_upload_size
    }

    /// Persist an upload as `name` (or its declared file name)
    ///
    /// An empty upload is a no-op. An existing destination is only replaced when
    /// `overwrite` is set.
    pub fn save<U: Upload + ?Sized>(
        &self,
        upload: &mut U,
        name: Option<&str>,
        overwrite: bool,
        namespace: Option<&Namespace>,
    ) -> Result<()> {
        if upload.is_empty() {
            debug!("Empty upload, nothing to save");
            return Ok(());
        }

        let status = upload.status();
        if !status.is_ok() {
            return Err(FileStorageError::Upload(status.to_string()));
        }

        if let Some(limit) = self.max_upload_size {
            if upload.size() > limit {
                return Err(FileStorageError::Upload(format!(
                    "file of {} bytes exceeds the limit of {} bytes",
                    upload.size(),
                    limit
                )));
            }
        }

        let name = match name {
            Some(name) => name.to_string(),
            None => upload.declared_file_name().to_string(),
        };

        let destination = self.file_path(&name, namespace)?;
        if destination.exists() && !overwrite {
            return Err(FileStorageError::AlreadyExists(name));
        }

        upload.move_to(&destination).map_err(|e| {
            FileStorageError::Io(io::Error::new(
                e.kind(),
                format!("Failed to move upload to {}: {}", destination.display(), e),
            ))
        })?;

        info!("Saved upload {} to {}", name, destination.display());
        Ok(())
    }

    /// Copy a local file into the store as `name` (or the source's file name)
    ///
    /// Never overwrites.
    pub fn copy(&self, source: &Path, name: Option<&str>, namespace: Option<&Namespace>) -> Result<()> {
        if !source.exists() {
            return Err(FileStorageError::SourceNotFound(source.to_path_buf()));
        }

        let name = match name {
            Some(name) => name.to_string(),
            None => source
                .file_name()
                .map(|file_name| file_name.to_string_lossy().into_owned())
                .ok_or_else(|| FileStorageError::InvalidName(source.display().to_string()))?,
        };

        let destination = self.file_path(&name, namespace)?;
        if destination.exists() {
            return Err(FileStorageError::AlreadyExists(name));
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                FileStorageError::Io(io::Error::new(
                    e.kind(),
                    format!("Failed to create directory {}: {}", parent.display(), e),
                ))
            })?;
        }

        fs::copy(source, &destination).map_err(|e| {
            FileStorageError::Io(io::Error::new(
                e.kind(),
                format!(
                    "Unable to copy {} to {}: {}",
                    source.display(),
                    destination.display(),
                    e
                ),
            ))
        })?;

        info!("Copied {} to {}", source.display(), destination.display());
        Ok(())
    }

    /// Local path of a stored file
    pub fn file_path(&self, name: &str, namespace: Option<&Namespace>) -> Result<PathBuf> {
        self.resolver.resolve(name, namespace)
    }

    pub fn exists(&self, name: &str, namespace: Option<&Namespace>) -> Result<bool> {
        Ok(self.file_path(name, namespace)?.is_file())
    }

    /// Public link of a stored file; pure string composition
    pub fn file_link(&self, namespace: &Namespace, name: &str) -> String {
        self.resolver.link(namespace, name)
    }

    /// Remove a stored file
    ///
    /// Returns `Ok(true)` when the file is gone afterwards (including when it never
    /// existed) and `Ok(false)` when removal was attempted and failed.
    pub fn delete(&self, name: &str, namespace: Option<&Namespace>) -> Result<bool> {
        let path = self.file_path(name, namespace)?;
        if !path.exists() {
            return Ok(true);
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted {}", path.display());
                Ok(true)
            }
            Err(e) => {
                warn!("Failed to delete {}: {}", path.display(), e);
                Ok(false)
            }
        }
    }
}
