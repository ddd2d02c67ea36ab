//! Filesystem path and public link resolution
//!
//! [`PathResolver`] is pure composition over its configured roots. It never
//! touches the filesystem, so it is safe to call from any context.

use crate::{FileStorageError, Namespace, Result};
use std::path::{Path, PathBuf};

/// Maps (namespace, file name) to a local path and to a public link
#[derive(Debug, Clone)]
pub struct PathResolver {
    root_dir: PathBuf,
    sub_dir: String,
    base_path: String,
    default_namespace: Option<Namespace>,
}

impl PathResolver {
    /// Create a resolver for `<root_dir>/<sub_dir>` published under `base_path`
    pub fn new(
        root_dir: impl Into<PathBuf>,
        sub_dir: impl Into<String>,
        base_path: impl AsRef<str>,
    ) -> Self {
        Self {
            root_dir: root_dir.into(),
            sub_dir: sub_dir.into(),
            base_path: normalize_base_path(base_path.as_ref()),
            default_namespace: None,
        }
    }

    pub fn with_default_namespace(mut self, namespace: impl Into<Namespace>) -> Self {
        self.set_default_namespace(namespace);
        self
    }

    pub fn set_default_namespace(&mut self, namespace: impl Into<Namespace>) {
        let namespace = namespace.into();
        self.default_namespace = (!namespace.is_empty()).then_some(namespace);
    }

    pub fn clear_default_namespace(&mut self) {
        self.default_namespace = None;
    }

    /// The namespace used when a call does not name one
    pub fn default_namespace(&self) -> Result<&Namespace> {
        self.default_namespace
            .as_ref()
            .ok_or(FileStorageError::NoNamespace)
    }

    /// Pick the explicit namespace, falling back to the default one
    ///
    /// An empty explicit namespace counts as absent.
    pub fn namespace<'a>(&'a self, explicit: Option<&'a Namespace>) -> Result<&'a Namespace> {
        match explicit {
            Some(namespace) if !namespace.is_empty() => Ok(namespace),
            _ => self.default_namespace(),
        }
    }

    /// `<root_dir>/<sub_dir>/<namespace>`
    pub fn directory(&self, namespace: Option<&Namespace>) -> Result<PathBuf> {
        let namespace = self.namespace(namespace)?;
        Ok(self.root_dir.join(&self.sub_dir).join(namespace.as_str()))
    }

    /// `<root_dir>/<sub_dir>/<namespace>/<file_name>`
    pub fn resolve(&self, file_name: &str, namespace: Option<&Namespace>) -> Result<PathBuf> {
        Ok(self.directory(namespace)?.join(file_name))
    }

    /// `<base_path>/<sub_dir>/<namespace>/<file_name>`
    ///
    /// Links always take an explicit namespace and never consult the default.
    pub fn link(&self, namespace: &Namespace, file_name: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.base_path, self.sub_dir, namespace, file_name
        )
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn set_root_dir(&mut self, root_dir: impl Into<PathBuf>) {
        self.root_dir = root_dir.into();
    }

    pub fn sub_dir(&self) -> &str {
        &self.sub_dir
    }

    pub fn set_sub_dir(&mut self, sub_dir: impl Into<String>) {
        self.sub_dir = sub_dir.into();
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Trailing slashes are stripped so links never contain `//` after the base
    pub fn set_base_path(&mut self, base_path: impl AsRef<str>) {
        self.base_path = normalize_base_path(base_path.as_ref());
    }
}

fn normalize_base_path(base_path: &str) -> String {
    base_path.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> PathResolver {
        PathResolver::new("/srv/www", "original", "https://cdn.example.com/")
    }

    #[test]
    fn test_resolve_with_explicit_namespace() {
        let resolver = resolver();
        let namespace = Namespace::from_segments(["users", "42"]);

        let path = resolver.resolve("a.png", Some(&namespace)).unwrap();
        assert_eq!(path, PathBuf::from("/srv/www/original/users/42/a.png"));
    }

    #[test]
    fn test_resolve_falls_back_to_default_namespace() {
        let resolver = resolver().with_default_namespace("products");

        let path = resolver.resolve("shoe.jpg", None).unwrap();
        assert_eq!(path, PathBuf::from("/srv/www/original/products/shoe.jpg"));

        // An empty explicit namespace behaves like an omitted one
        let empty = Namespace::new("");
        let path = resolver.resolve("shoe.jpg", Some(&empty)).unwrap();
        assert_eq!(path, PathBuf::from("/srv/www/original/products/shoe.jpg"));
    }

    #[test]
    fn test_resolve_without_any_namespace_fails() {
        let mut resolver = resolver();
        assert!(matches!(
            resolver.resolve("a.png", None),
            Err(FileStorageError::NoNamespace)
        ));
        assert!(matches!(
            resolver.default_namespace(),
            Err(FileStorageError::NoNamespace)
        ));

        resolver.set_default_namespace("");
        assert!(resolver.default_namespace().is_err());

        resolver.set_default_namespace("u/1");
        resolver.clear_default_namespace();
        assert!(resolver.default_namespace().is_err());
    }

    #[test]
    fn test_link_format() {
        let mut resolver = resolver();
        let namespace = Namespace::from("u/1");
        assert_eq!(
            resolver.link(&namespace, "a.png"),
            "https://cdn.example.com/original/u/1/a.png"
        );

        resolver.set_base_path("/static///");
        assert_eq!(resolver.base_path(), "/static");
        assert_eq!(resolver.link(&namespace, "a.png"), "/static/original/u/1/a.png");

        resolver.set_base_path("");
        assert_eq!(resolver.link(&namespace, "a.png"), "/original/u/1/a.png");
    }

    #[test]
    fn test_setters() {
        let mut resolver = resolver();
        resolver.set_root_dir("/data");
        resolver.set_sub_dir("files");
        assert_eq!(resolver.root_dir(), Path::new("/data"));
        assert_eq!(resolver.sub_dir(), "files");

        let path = resolver.resolve("x.txt", Some(&"ns".into())).unwrap();
        assert_eq!(path, PathBuf::from("/data/files/ns/x.txt"));
    }
}
