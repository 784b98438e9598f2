//! Default stage bodies shared by concrete installers.
//!
//! Installers wrap these in their [`crate::lifecycle::StageTable`] entries and
//! add platform sub-steps (permission fixes, identity switches) around them.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::archive::extract_archive;
use crate::download::{self, DownloadOutcome};
use crate::elevation::RunAs;
use crate::env::{self, profile, EnvironmentStore, VariableUpdate};
use crate::error::{DownloadFailure, InstallError};
use crate::lifecycle::SdkInstaller;
use crate::model::{InstallContext, InstallerDescriptor};
use crate::process::{self, program_name, ProcessSpec};

/// Fetches the descriptor's artifact into the cache, or reuses a cached copy
/// that still verifies, and records its path on the context.
pub async fn default_download<I: SdkInstaller>(
    installer: &I,
    descriptor: &InstallerDescriptor,
    ctx: &mut InstallContext,
) -> Result<(), InstallError> {
    let url = descriptor.install_source.as_str();
    let failed = |reason: DownloadFailure| InstallError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let archive = installer
        .cache()
        .ensure_archive_path(
            installer.sdk_name(),
            ctx.platform,
            &ctx.software_version,
            url,
        )
        .map_err(|e| failed(DownloadFailure::Io(format!("failed to prepare cache: {e}"))))?;

    let outcome = download::ensure_verified(url, &archive, &descriptor.signature())
        .await
        .map_err(failed)?;
    if outcome == DownloadOutcome::Reused {
        tracing::info!("{}: reusing verified archive", installer.sdk_name());
    }

    ctx.cached_archive_path = Some(archive);
    Ok(())
}

/// Creates the destination tree and unpacks the cached archive into it.
pub async fn default_install(ctx: &InstallContext) -> Result<(), InstallError> {
    if !ctx.has_destination() {
        return Err(InstallError::MissingInstallDestination);
    }
    let archive = match ctx.cached_archive() {
        Some(path) if path.is_file() => path.to_path_buf(),
        Some(path) => {
            return Err(InstallError::ExtractionFailed {
                archive: path.to_path_buf(),
                message: "cached archive is missing".into(),
            })
        }
        None => {
            return Err(InstallError::ExtractionFailed {
                archive: PathBuf::new(),
                message: "no archive was downloaded".into(),
            })
        }
    };

    let dest = &ctx.install_destination;
    create_destination(dest).map_err(|e| InstallError::ExtractionFailed {
        archive: archive.clone(),
        message: format!("failed to create {}: {e}", dest.display()),
    })?;

    extract_archive(&archive, dest)
        .await
        .map_err(|e| InstallError::ExtractionFailed {
            archive,
            message: e.to_string(),
        })
}

#[cfg(unix)]
fn create_destination(dest: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o777)
        .create(dest)
}

#[cfg(not(unix))]
fn create_destination(dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)
}

/// Registers the home variable and search-path entries in a persistent
/// store. Re-running with the same input leaves the store untouched.
pub fn persist_in_store(
    store: &mut dyn EnvironmentStore,
    update: &VariableUpdate,
) -> Result<(), InstallError> {
    let report = env::apply_persistent(store, update).map_err(variable_error)?;
    if report.is_noop() {
        tracing::info!("{} already registered", update.home_variable);
    } else {
        tracing::info!(
            "Registered {}={} (added {} path entries)",
            update.home_variable,
            update.home.display(),
            report.added_paths.len()
        );
    }
    Ok(())
}

/// Writes the export block for `home_variable` into a shell profile.
pub fn persist_in_profile(
    profile_path: &Path,
    home_variable: &str,
    home: &Path,
    subdirs: &[&str],
    owner: Option<&RunAs>,
) -> Result<(), InstallError> {
    let outcome = profile::write_export_block(profile_path, home_variable, home, subdirs, owner)
        .map_err(variable_error)?;
    tracing::info!(
        "{} export in {}: {:?}",
        home_variable,
        profile_path.display(),
        outcome
    );
    Ok(())
}

fn variable_error(err: env::EnvError) -> InstallError {
    InstallError::VariableUpdateFailed {
        message: err.to_string(),
    }
}

/// Child processes run by the default post-install body.
#[derive(Debug, Clone)]
pub struct PostInstallPlan {
    /// The SDK's package manager, normally with a prompt rule attached.
    pub package_manager: ProcessSpec,
    /// Stops the SDK's background daemon once packages are installed.
    pub daemon_kill: ProcessSpec,
}

/// Runs the package manager and then stops the daemon.
///
/// Anything on the package manager's stderr fails the stage even when it
/// exits 0; the daemon is never touched after such a failure.
pub async fn default_post_install(plan: &PostInstallPlan) -> Result<(), InstallError> {
    let manager = program_name(&plan.package_manager.program);
    let outcome = process::run(&plan.package_manager).await.map_err(|e| {
        InstallError::PostInstallFailed {
            exit_code: None,
            stderr: format!("failed to launch {manager}: {e}"),
        }
    })?;
    if !outcome.clean() {
        return Err(InstallError::PostInstallFailed {
            exit_code: outcome.exit_code,
            stderr: outcome.stderr,
        });
    }
    if outcome.prompt_answered {
        tracing::info!("{manager}: confirmation prompt answered");
    }

    let daemon = program_name(&plan.daemon_kill.program);
    let outcome = process::run(&plan.daemon_kill).await.map_err(|e| {
        InstallError::DaemonKillFailed {
            exit_code: None,
            message: format!("failed to launch {daemon}: {e}"),
        }
    })?;
    if !outcome.success() {
        let output = if outcome.stderr.trim().is_empty() {
            outcome.stdout.trim()
        } else {
            outcome.stderr.trim()
        };
        return Err(InstallError::DaemonKillFailed {
            exit_code: outcome.exit_code,
            message: format!("{daemon} exited with {}: {output}", outcome.exit_code_label()),
        });
    }
    tracing::info!("{daemon}: daemon stopped");
    Ok(())
}

/// Adds execute permission to an unpacked tool before it is launched.
#[cfg(unix)]
pub fn make_executable(path: &Path) -> Result<(), InstallError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|e| {
        InstallError::PostInstallFailed {
            exit_code: None,
            stderr: format!("failed to mark {} executable: {e}", path.display()),
        }
    })
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) -> Result<(), InstallError> {
    Ok(())
}
