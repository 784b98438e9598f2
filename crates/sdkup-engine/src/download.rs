//! Verified HTTP download into the artifact cache.
//!
//! Bytes are streamed into a uniquely named sibling of the destination while
//! being counted and hashed. Only a file whose size and digest match the
//! expected [`Signature`] is renamed onto the destination, so a partial or
//! corrupt download never appears at the canonical cache path.

use std::{fs, path::Path};

use futures_util::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::DownloadFailure;
use crate::verify::{verify_file, Signature};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// A previously verified file was already at the destination.
    Reused,
    Fetched,
}

/// Makes sure `dest` holds a file matching `signature`, fetching `url` if
/// the cached copy is missing or fails verification.
pub async fn ensure_verified(
    url: &str,
    dest: &Path,
    signature: &Signature,
) -> Result<DownloadOutcome, DownloadFailure> {
    signature.algorithm()?;

    if dest.exists() {
        match verify_file(dest, signature) {
            Ok(()) => {
                tracing::info!("Using cached artifact {}", dest.display());
                return Ok(DownloadOutcome::Reused);
            }
            Err(err) => {
                tracing::warn!(
                    "Cached artifact {} failed verification ({}); downloading again",
                    dest.display(),
                    err
                );
                let _ = fs::remove_file(dest);
            }
        }
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| DownloadFailure::Io(format!("failed to create download dir: {e}")))?;
    }

    tracing::info!("Downloading artifact {}", url);
    fetch_verified(url, dest, signature).await?;
    tracing::info!("Saved artifact {}", dest.display());
    Ok(DownloadOutcome::Fetched)
}

/// Unconditionally fetches `url` and promotes it to `dest` after verification.
pub async fn fetch_verified(
    url: &str,
    dest: &Path,
    signature: &Signature,
) -> Result<(), DownloadFailure> {
    let algorithm = signature.algorithm()?;

    let client = Client::builder()
        .user_agent(concat!("sdkup/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| DownloadFailure::Transport(format!("failed to build http client: {e}")))?;

    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| DownloadFailure::Transport(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(DownloadFailure::HttpStatus(resp.status().as_u16()));
    }

    let tmp = dest.with_extension(format!("tmp-{}", Uuid::new_v4()));
    let result = stream_to_file(resp, &tmp, algorithm.hasher(), signature.bytes).await;
    let (size, digest) = match result {
        Ok(observed) => observed,
        Err(err) => {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
    };

    if let Err(err) = signature.check(size, &digest) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }

    fs::rename(&tmp, dest).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        DownloadFailure::Io(format!("failed to finalize download: {e}"))
    })?;
    Ok(())
}

/// Streams the body into `tmp`, giving up as soon as it grows past `limit`.
async fn stream_to_file(
    resp: reqwest::Response,
    tmp: &Path,
    mut hasher: crate::hashing::ContentHasher,
    limit: u64,
) -> Result<(u64, String), DownloadFailure> {
    let mut file = tokio::fs::File::create(tmp)
        .await
        .map_err(|e| DownloadFailure::Io(format!("failed to create temp file: {e}")))?;

    let mut size = 0u64;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| DownloadFailure::Transport(format!("download read failed: {e}")))?;
        size += chunk.len() as u64;
        if size > limit {
            return Err(DownloadFailure::SizeMismatch {
                expected: limit,
                actual: size,
            });
        }
        hasher.update(&chunk);
        file.write_all(&chunk)
            .await
            .map_err(|e| DownloadFailure::Io(format!("failed to write temp file: {e}")))?;
    }

    file.flush()
        .await
        .map_err(|e| DownloadFailure::Io(format!("failed to flush temp file: {e}")))?;
    drop(file);

    Ok((size, hasher.finalize_hex()))
}
