use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::lifecycle::PipelineState;
use crate::platform::Platform;
use crate::verify::Signature;

/// One downloadable SDK artifact as published by a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerDescriptor {
    pub install_source: String,
    pub bytes: u64,
    #[serde(alias = "sha1", alias = "sha256")]
    pub digest: String,
    pub version: String,
}

impl InstallerDescriptor {
    pub fn signature(&self) -> Signature {
        Signature {
            bytes: self.bytes,
            digest: self.digest.clone(),
        }
    }
}

/// The four lifecycle stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Install,
    UpdateVariables,
    PostInstall,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Download,
        Stage::Install,
        Stage::UpdateVariables,
        Stage::PostInstall,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Install => "install",
            Stage::UpdateVariables => "update_variables",
            Stage::PostInstall => "post_install",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stages have already completed for one SDK + version on this host.
///
/// Flags only ever move from `false` to `true` inside the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepFlags {
    pub downloaded: bool,
    pub installed: bool,
    pub variables_set: bool,
    pub post_installed: bool,
}

impl StepFlags {
    pub fn all_done() -> Self {
        Self {
            downloaded: true,
            installed: true,
            variables_set: true,
            post_installed: true,
        }
    }

    pub fn is_satisfied(&self, stage: Stage) -> bool {
        match stage {
            Stage::Download => self.downloaded,
            Stage::Install => self.installed,
            Stage::UpdateVariables => self.variables_set,
            Stage::PostInstall => self.post_installed,
        }
    }

    pub(crate) fn mark_satisfied(&mut self, stage: Stage) {
        match stage {
            Stage::Download => self.downloaded = true,
            Stage::Install => self.installed = true,
            Stage::UpdateVariables => self.variables_set = true,
            Stage::PostInstall => self.post_installed = true,
        }
    }

    pub fn is_complete(&self) -> bool {
        Stage::ALL.iter().all(|stage| self.is_satisfied(*stage))
    }
}

/// Per-run state threaded through the stage bodies.
///
/// `cached_archive_path` is filled by the download stage (or derived when
/// download is skipped) and `resolved_home` by the update-variables stage
/// (or derived when skipped). `state` is where the last run ended, `Failed`
/// included. Nothing here is persisted.
#[derive(Debug, Clone)]
pub struct InstallContext {
    pub install_destination: PathBuf,
    pub software_version: String,
    pub platform: Platform,
    pub cached_archive_path: Option<PathBuf>,
    pub resolved_home: Option<PathBuf>,
    pub state: PipelineState,
}

impl InstallContext {
    pub fn new(
        install_destination: impl Into<PathBuf>,
        software_version: impl Into<String>,
        platform: Platform,
    ) -> Self {
        Self {
            install_destination: install_destination.into(),
            software_version: software_version.into(),
            platform,
            cached_archive_path: None,
            resolved_home: None,
            state: PipelineState::NotStarted,
        }
    }

    pub fn has_destination(&self) -> bool {
        !self.install_destination.as_os_str().is_empty()
    }

    pub fn cached_archive(&self) -> Option<&Path> {
        self.cached_archive_path.as_deref()
    }

    pub fn home(&self) -> Option<&Path> {
        self.resolved_home.as_deref()
    }
}
