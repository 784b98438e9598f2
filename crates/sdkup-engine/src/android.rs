//! Android SDK installer.
//!
//! The archive unpacks to a single platform-named directory
//! (`android-sdk-linux`, `android-sdk-macosx`, `android-sdk-windows`) which
//! becomes `ANDROID_HOME`. Post-install runs the legacy `tools/android`
//! package manager unattended and then stops any `adb` server it started.

use std::path::{Path, PathBuf};

use crate::cache::CacheLocator;
use crate::elevation::{ElevationContext, RunAs};
use crate::error::InstallError;
use crate::lifecycle::{PlatformDispatch, SdkInstaller, StageFuture, StageTable};
use crate::model::{InstallContext, InstallerDescriptor};
use crate::platform::Platform;
use crate::process::{ProcessSpec, PromptRule};
use crate::stages::{self, PostInstallPlan};

pub const SDK_NAME: &str = "android-sdk";
pub const HOME_VARIABLE: &str = "ANDROID_HOME";
pub const PATH_SUBDIRS: &[&str] = &["tools", "platform-tools"];

pub const DEFAULT_PACKAGES: &[&str] = &[
    "platform-tools",
    "tools",
    "build-tools-23.0.3",
    "android-23",
    "extra-android-support",
    "extra-android-m2repository",
    "extra-google-m2repository",
];

pub fn home_subdir(platform: Platform) -> &'static str {
    match platform {
        Platform::Windows => "android-sdk-windows",
        Platform::Darwin => "android-sdk-macosx",
        Platform::Linux | Platform::Other => "android-sdk-linux",
    }
}

pub fn package_manager_path(home: &Path, platform: Platform) -> PathBuf {
    let name = if platform.is_windows() {
        "android.bat"
    } else {
        "android"
    };
    home.join("tools").join(name)
}

pub fn daemon_path(home: &Path, platform: Platform) -> PathBuf {
    home.join("platform-tools")
        .join(format!("adb{}", platform.executable_extension()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AndroidSdkConfig {
    /// Sub-packages passed to `android update sdk --filter`.
    pub packages: Vec<String>,
    /// Shell profile that receives the export block on POSIX hosts.
    /// Defaults to `~/.bash_profile` of the invoking user.
    pub profile_path: Option<PathBuf>,
}

impl Default for AndroidSdkConfig {
    fn default() -> Self {
        Self {
            packages: DEFAULT_PACKAGES.iter().map(|p| p.to_string()).collect(),
            profile_path: None,
        }
    }
}

pub struct AndroidSdkInstaller {
    cache: CacheLocator,
    elevation: ElevationContext,
    config: AndroidSdkConfig,
}

impl AndroidSdkInstaller {
    pub fn new(cache: CacheLocator, elevation: ElevationContext, config: AndroidSdkConfig) -> Self {
        Self {
            cache,
            elevation,
            config,
        }
    }

    pub fn dispatch() -> PlatformDispatch<Self> {
        let posix: StageTable<Self> = StageTable {
            download,
            install,
            update_variables: update_profile_variables,
            post_install: posix_post_install,
        };
        PlatformDispatch::<Self>::new()
            .register(
                Platform::Windows,
                StageTable {
                    download,
                    install,
                    update_variables: update_registry_variables,
                    post_install: windows_post_install,
                },
            )
            .register(Platform::Darwin, posix)
            .register(Platform::Linux, posix)
    }

    fn home_for(&self, ctx: &InstallContext) -> PathBuf {
        ctx.home()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.sdk_home(ctx))
    }

    /// Identity for child processes. The package manager refuses to run as
    /// root, so on POSIX hosts it runs as whoever invoked `sudo`.
    fn child_identity(&self, platform: Platform) -> Option<RunAs> {
        if platform.is_windows() {
            None
        } else {
            self.elevation.invoking_user().cloned()
        }
    }

    fn profile_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config.profile_path {
            return Some(path.clone());
        }
        // While elevated, HOME belongs to root and must not be used.
        let home = match self.elevation.invoking_user() {
            Some(user) => user.home.clone(),
            None => std::env::var_os("HOME").map(PathBuf::from),
        };
        home.filter(|home| !home.as_os_str().is_empty())
            .map(|home| crate::env::profile::default_profile_path(&home))
    }

    pub fn post_install_plan(&self, ctx: &InstallContext) -> PostInstallPlan {
        let home = self.home_for(ctx);
        let identity = self.child_identity(ctx.platform);
        let package_manager = ProcessSpec::new(package_manager_path(&home, ctx.platform))
            .args(["update", "sdk", "-u", "-a", "--filter"])
            .arg(self.config.packages.join(","))
            .current_dir(&home)
            .run_as(identity.clone())
            .answer_prompt(PromptRule::yes_no());
        let daemon_kill = ProcessSpec::new(daemon_path(&home, ctx.platform))
            .arg("kill-server")
            .run_as(identity);
        PostInstallPlan {
            package_manager,
            daemon_kill,
        }
    }
}

impl SdkInstaller for AndroidSdkInstaller {
    fn sdk_name(&self) -> &str {
        SDK_NAME
    }

    fn cache(&self) -> &CacheLocator {
        &self.cache
    }

    fn sdk_home(&self, ctx: &InstallContext) -> PathBuf {
        ctx.install_destination.join(home_subdir(ctx.platform))
    }
}

fn download<'a>(
    installer: &'a AndroidSdkInstaller,
    descriptor: &'a InstallerDescriptor,
    ctx: &'a mut InstallContext,
) -> StageFuture<'a> {
    Box::pin(stages::default_download(installer, descriptor, ctx))
}

fn install<'a>(
    _installer: &'a AndroidSdkInstaller,
    _descriptor: &'a InstallerDescriptor,
    ctx: &'a mut InstallContext,
) -> StageFuture<'a> {
    Box::pin(async move { stages::default_install(ctx).await })
}

fn update_registry_variables<'a>(
    installer: &'a AndroidSdkInstaller,
    _descriptor: &'a InstallerDescriptor,
    ctx: &'a mut InstallContext,
) -> StageFuture<'a> {
    Box::pin(async move {
        let home = installer.sdk_home(ctx);
        persist_in_registry(&home)?;
        ctx.resolved_home = Some(home);
        Ok(())
    })
}

#[cfg(windows)]
fn persist_in_registry(home: &Path) -> Result<(), InstallError> {
    use crate::env::{registry::RegistryStore, VariableUpdate};

    let mut store =
        RegistryStore::open_user().map_err(|e| InstallError::VariableUpdateFailed {
            message: e.to_string(),
        })?;
    stages::persist_in_store(
        &mut store,
        &VariableUpdate::new(HOME_VARIABLE, home, PATH_SUBDIRS),
    )
}

#[cfg(not(windows))]
fn persist_in_registry(_home: &Path) -> Result<(), InstallError> {
    Err(InstallError::VariableUpdateFailed {
        message: "the Windows registry is not available on this host".into(),
    })
}

fn update_profile_variables<'a>(
    installer: &'a AndroidSdkInstaller,
    _descriptor: &'a InstallerDescriptor,
    ctx: &'a mut InstallContext,
) -> StageFuture<'a> {
    Box::pin(async move {
        let home = installer.sdk_home(ctx);
        let profile = installer
            .profile_path()
            .ok_or_else(|| InstallError::VariableUpdateFailed {
                message: "cannot locate the user's home directory for the shell profile".into(),
            })?;
        stages::persist_in_profile(
            &profile,
            HOME_VARIABLE,
            &home,
            PATH_SUBDIRS,
            installer.elevation.invoking_user(),
        )?;
        ctx.resolved_home = Some(home);
        Ok(())
    })
}

fn windows_post_install<'a>(
    installer: &'a AndroidSdkInstaller,
    _descriptor: &'a InstallerDescriptor,
    ctx: &'a mut InstallContext,
) -> StageFuture<'a> {
    Box::pin(async move {
        let plan = installer.post_install_plan(ctx);
        stages::default_post_install(&plan).await
    })
}

fn posix_post_install<'a>(
    installer: &'a AndroidSdkInstaller,
    _descriptor: &'a InstallerDescriptor,
    ctx: &'a mut InstallContext,
) -> StageFuture<'a> {
    Box::pin(async move {
        let plan = installer.post_install_plan(ctx);
        stages::make_executable(&plan.package_manager.program)?;
        stages::default_post_install(&plan).await
    })
}
