//! Archive extraction.
//!
//! Zip archives are unpacked in-process on a blocking thread; the tar family
//! is handed to the system `tar`, which already knows every compressor.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::process::{self, ProcessSpec};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported archive format: {} (expected .zip, .tar.gz, .tgz, .tar.xz or .txz)", .0.display())]
    Unsupported(PathBuf),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid zip archive: {0}")]
    Zip(String),
    #[error("tar failed: {0}")]
    Tar(String),
}

fn io_err(context: impl Into<String>) -> impl FnOnce(io::Error) -> ExtractError {
    let context = context.into();
    move |source| ExtractError::Io { context, source }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Zip,
    TarGz,
    TarXz,
}

fn archive_kind(archive: &Path) -> Option<ArchiveKind> {
    let name = archive.file_name()?.to_string_lossy().to_ascii_lowercase();
    if name.ends_with(".zip") {
        Some(ArchiveKind::Zip)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(ArchiveKind::TarGz)
    } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
        Some(ArchiveKind::TarXz)
    } else {
        None
    }
}

/// Extracts every entry of `archive` into `dest`, which must already exist.
pub async fn extract_archive(archive: &Path, dest: &Path) -> Result<(), ExtractError> {
    let kind = archive_kind(archive).ok_or_else(|| ExtractError::Unsupported(archive.into()))?;

    tracing::info!(
        "Extracting archive {} into {}",
        archive.display(),
        dest.display()
    );

    match kind {
        ArchiveKind::Zip => {
            let archive = archive.to_path_buf();
            let dest = dest.to_path_buf();
            tokio::task::spawn_blocking(move || extract_zip(&archive, &dest))
                .await
                .map_err(|e| ExtractError::Zip(format!("extraction task failed: {e}")))?
        }
        ArchiveKind::TarGz => extract_tar(archive, dest, "-xzf").await,
        ArchiveKind::TarXz => extract_tar(archive, dest, "-xJf").await,
    }
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<(), ExtractError> {
    let file = fs::File::open(archive).map_err(io_err(format!(
        "failed to open archive {}",
        archive.display()
    )))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| ExtractError::Zip(e.to_string()))?;

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| ExtractError::Zip(e.to_string()))?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            tracing::warn!("Skipping zip entry with unsafe path: {}", entry.name());
            continue;
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .map_err(io_err(format!("failed to create {}", out_path.display())))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .map_err(io_err(format!("failed to create {}", parent.display())))?;
        }
        let mut out = fs::File::create(&out_path)
            .map_err(io_err(format!("failed to create {}", out_path.display())))?;
        io::copy(&mut entry, &mut out)
            .map_err(io_err(format!("failed to write {}", out_path.display())))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o7777));
        }
    }

    Ok(())
}

async fn extract_tar(archive: &Path, dest: &Path, mode: &str) -> Result<(), ExtractError> {
    let spec = ProcessSpec::new("tar")
        .arg(mode)
        .arg(archive.to_string_lossy())
        .arg("-C")
        .arg(dest.to_string_lossy());

    let outcome = process::run(&spec)
        .await
        .map_err(|e| ExtractError::Tar(format!("failed to run tar: {e}")))?;

    if !outcome.success() {
        return Err(ExtractError::Tar(format!(
            "exit {}: {}",
            outcome.exit_code_label(),
            outcome.stderr.trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_zip;

    #[test]
    fn archive_kind_follows_extension() {
        assert_eq!(archive_kind(Path::new("a/sdk.ZIP")), Some(ArchiveKind::Zip));
        assert_eq!(archive_kind(Path::new("sdk.tgz")), Some(ArchiveKind::TarGz));
        assert_eq!(archive_kind(Path::new("sdk.tar.xz")), Some(ArchiveKind::TarXz));
        assert_eq!(archive_kind(Path::new("sdk.rar")), None);
    }

    #[tokio::test]
    async fn zip_entries_are_extracted_with_structure() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("sdk.zip");
        write_zip(
            &archive,
            &[
                ("android-sdk-linux/", b"", 0o755),
                ("android-sdk-linux/tools/android", b"#!/bin/sh\n", 0o644),
                ("android-sdk-linux/SDK Readme.txt", b"readme", 0o644),
            ],
        );
        let dest = dir.path().join("out");
        fs::create_dir_all(&dest).unwrap();

        extract_archive(&archive, &dest).await.unwrap();

        assert_eq!(
            fs::read(dest.join("android-sdk-linux/tools/android")).unwrap(),
            b"#!/bin/sh\n"
        );
        assert!(dest.join("android-sdk-linux/SDK Readme.txt").is_file());
    }

    #[tokio::test]
    async fn zip_slip_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(
            &archive,
            &[("../escaped.txt", b"x", 0o644), ("ok.txt", b"y", 0o644)],
        );
        let dest = dir.path().join("out");
        fs::create_dir_all(&dest).unwrap();

        extract_archive(&archive, &dest).await.unwrap();

        assert!(!dir.path().join("escaped.txt").exists());
        assert!(dest.join("ok.txt").exists());
    }

    #[tokio::test]
    async fn corrupt_zip_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        fs::write(&archive, b"definitely not a zip").unwrap();

        let err = extract_archive(&archive, dir.path()).await.unwrap_err();
        assert!(matches!(err, ExtractError::Zip(_)));
    }

    #[tokio::test]
    async fn unknown_extension_is_unsupported() {
        let err = extract_archive(Path::new("/tmp/sdk.rar"), Path::new("/tmp"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_tarball_reports_tar_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_archive(&dir.path().join("missing.tgz"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Tar(_)));
    }
}
