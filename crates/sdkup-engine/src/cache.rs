use std::{
    fs, io,
    path::PathBuf,
};

use crate::platform::Platform;

/// Derives where a downloaded archive lives:
/// `<root>/<sdk>/<platform>/<version>/<basename of source>`.
#[derive(Debug, Clone)]
pub struct CacheLocator {
    root: PathBuf,
}

impl CacheLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn archive_path(
        &self,
        sdk_name: &str,
        platform: Platform,
        version: &str,
        install_source: &str,
    ) -> PathBuf {
        self.root
            .join(path_component(sdk_name))
            .join(platform.as_str())
            .join(path_component(version))
            .join(source_basename(install_source))
    }

    /// Same as [`archive_path`](Self::archive_path) but creates the parent
    /// directories.
    pub fn ensure_archive_path(
        &self,
        sdk_name: &str,
        platform: Platform,
        version: &str,
        install_source: &str,
    ) -> io::Result<PathBuf> {
        let path = self.archive_path(sdk_name, platform, version, install_source);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(path)
    }
}

/// Last path segment of a URL, without query or fragment.
pub fn source_basename(url: &str) -> String {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment
        .split('?')
        .next()
        .unwrap_or(without_fragment);
    let name = without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("");
    if name.is_empty() || name.contains(':') {
        "artifact.bin".to_string()
    } else {
        path_component(name)
    }
}

/// A single path segment that stays inside its parent directory.
fn path_component(value: &str) -> String {
    let component: String = value
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            other => other,
        })
        .collect();
    match component.as_str() {
        "" | "." | ".." => format!("{}_", component.replace('.', "_")),
        _ => component,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_path_is_keyed_by_sdk_platform_version_and_basename() {
        let cache = CacheLocator::new("/var/cache/sdkup");
        let path = cache.archive_path(
            "android-sdk",
            Platform::Darwin,
            "24.4.1",
            "https://dl.google.com/android/android-sdk_r24.4.1-macosx.zip",
        );
        assert_eq!(
            path,
            PathBuf::from("/var/cache/sdkup/android-sdk/darwin/24.4.1/android-sdk_r24.4.1-macosx.zip")
        );
    }

    #[test]
    fn basename_ignores_query_and_fragment() {
        assert_eq!(source_basename("http://x/sdk.zip?token=1#frag"), "sdk.zip");
        assert_eq!(source_basename("http://x/dir/"), "dir");
        assert_eq!(source_basename("http://"), "artifact.bin");
        assert_eq!(source_basename(""), "artifact.bin");
    }

    #[test]
    fn version_separators_cannot_escape_the_cache() {
        let cache = CacheLocator::new("/c");
        let path = cache.archive_path("sdk", Platform::Linux, "1/../2", "http://x/a.zip");
        assert_eq!(path, PathBuf::from("/c/sdk/linux/1_.._2/a.zip"));

        let dots = cache.archive_path("..", Platform::Linux, "..", "http://x/..");
        assert_eq!(dots, PathBuf::from("/c/___/linux/___/___"));
        assert!(dots
            .components()
            .all(|c| !matches!(c, std::path::Component::ParentDir | std::path::Component::CurDir)));

        let blank = cache.archive_path("sdk", Platform::Linux, " ", "http://x/./");
        assert_eq!(blank, PathBuf::from("/c/sdk/linux/_/__"));
    }

    #[test]
    fn ensure_archive_path_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheLocator::new(dir.path());
        let path = cache
            .ensure_archive_path("android-sdk", Platform::Linux, "24.4.1", "http://x/sdk.zip")
            .unwrap();
        assert!(path.parent().unwrap().is_dir());
        assert!(!path.exists());
    }
}
