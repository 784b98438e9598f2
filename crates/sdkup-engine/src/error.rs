use std::path::PathBuf;

use thiserror::Error;

use crate::model::Stage;

/// Why a verified download did not produce a file at the cache path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadFailure {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("server responded with HTTP {0}")]
    HttpStatus(u16),
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
    #[error("unsupported digest '{0}': expected 40 (sha1) or 64 (sha256) hex characters")]
    UnsupportedDigest(String),
    #[error("i/o error: {0}")]
    Io(String),
}

impl DownloadFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::HttpStatus(_) => "http_status",
            Self::SizeMismatch { .. } => "size_mismatch",
            Self::DigestMismatch { .. } => "digest_mismatch",
            Self::UnsupportedDigest(_) => "unsupported_digest",
            Self::Io(_) => "io",
        }
    }
}

/// Terminal failure of a pipeline run.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("no install destination was supplied")]
    MissingInstallDestination,

    #[error("downloading {url} failed: {reason}")]
    DownloadFailed { url: String, reason: DownloadFailure },

    #[error("extracting {} failed: {message}", archive.display())]
    ExtractionFailed { archive: PathBuf, message: String },

    #[error("updating environment variables failed: {message}")]
    VariableUpdateFailed { message: String },

    #[error("{}", post_install_message(*exit_code, stderr))]
    PostInstallFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("stopping the SDK daemon failed: {message}")]
    DaemonKillFailed {
        exit_code: Option<i32>,
        message: String,
    },

    #[error("no installer is registered for platform '{platform}'")]
    UnsupportedPlatform { platform: String },
}

fn post_install_message(exit_code: Option<i32>, stderr: &str) -> String {
    let code = exit_code.map_or_else(|| "signal".to_string(), |code| code.to_string());
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("SDK package installation failed with exit {code}")
    } else {
        format!("SDK package installation failed with exit {code}: {stderr}")
    }
}

impl InstallError {
    /// Stage the failure belongs to; `None` for configuration errors raised
    /// before any stage runs.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::MissingInstallDestination | Self::ExtractionFailed { .. } => Some(Stage::Install),
            Self::DownloadFailed { .. } => Some(Stage::Download),
            Self::VariableUpdateFailed { .. } => Some(Stage::UpdateVariables),
            Self::PostInstallFailed { .. } | Self::DaemonKillFailed { .. } => {
                Some(Stage::PostInstall)
            }
            Self::UnsupportedPlatform { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingInstallDestination => "missing_install_destination",
            Self::DownloadFailed { .. } => "download_failed",
            Self::ExtractionFailed { .. } => "extraction_failed",
            Self::VariableUpdateFailed { .. } => "variable_update_failed",
            Self::PostInstallFailed { .. } => "post_install_failed",
            Self::DaemonKillFailed { .. } => "daemon_kill_failed",
            Self::UnsupportedPlatform { .. } => "unsupported_platform",
        }
    }

    /// Non-identifying context safe to attach to telemetry as-is.
    pub fn telemetry_annotations(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![("error_kind", self.kind().to_string())];
        if let Some(stage) = self.stage() {
            out.push(("stage", stage.as_str().to_string()));
        }
        match self {
            Self::DownloadFailed { reason, .. } => {
                out.push(("download_failure", reason.kind().to_string()))
            }
            Self::PostInstallFailed { exit_code, .. } | Self::DaemonKillFailed { exit_code, .. } => {
                if let Some(code) = exit_code {
                    out.push(("exit_code", code.to_string()));
                }
            }
            Self::UnsupportedPlatform { platform } => out.push(("platform", platform.clone())),
            _ => {}
        }
        out
    }

    /// Captured text that may identify the user (paths, process output).
    pub fn sensitive_annotations(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::PostInstallFailed { stderr, .. } => vec![("stderr", stderr.clone())],
            Self::DaemonKillFailed { message, .. } => vec![("output", message.clone())],
            Self::ExtractionFailed { archive, message } => vec![
                ("archive", archive.display().to_string()),
                ("message", message.clone()),
            ],
            Self::VariableUpdateFailed { message } => vec![("message", message.clone())],
            _ => Vec::new(),
        }
    }
}
