mod catalog;
mod config;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sdkup_engine::android::{self, AndroidSdkConfig, AndroidSdkInstaller};
use sdkup_engine::cache::CacheLocator;
use sdkup_engine::elevation::ElevationContext;
use sdkup_engine::state::StepStore;
use sdkup_engine::{InstallContext, InstallError, LifecycleEngine, PipelineState, Platform, StepFlags};
use tracing::{error, info};

use crate::catalog::Catalog;
use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "sdkup", version, about = "Download, verify and configure third-party SDKs")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Install an SDK, resuming any earlier partial run
    Install {
        sdk: String,
        #[arg(long)]
        version: Option<String>,
        /// Directory the SDK is unpacked into
        #[arg(long)]
        dest: Option<String>,
        /// Override the detected host platform (windows, darwin, linux)
        #[arg(long)]
        platform: Option<String>,
        /// Ignore recorded progress and run every stage
        #[arg(long)]
        force: bool,
    },
    /// Show recorded progress for an SDK
    Status {
        sdk: String,
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        platform: Option<String>,
    },
    /// Forget recorded progress so the next install starts over
    Reset {
        sdk: String,
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        platform: Option<String>,
    },
    /// List the SDK artifacts the catalog knows about
    Catalog,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    sdkup_util::init_tracing()?;
    sdkup_telemetry::init_with_env("sdkup", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let catalog = catalog::load_catalog();

    match cli.cmd {
        Cmd::Install {
            sdk,
            version,
            dest,
            platform,
            force,
        } => {
            let platform = resolve_platform(platform.as_deref())?;
            install(&catalog, &sdk, version.as_deref(), dest, platform, force).await
        }
        Cmd::Status {
            sdk,
            version,
            platform,
        } => {
            let platform = resolve_platform(platform.as_deref())?;
            let version = resolve_version(&catalog, &sdk, version)?;
            let store = StepStore::load_default();
            let key = StepStore::key(&sdk, platform, &version);
            let flags = store.flags(&key);
            println!("{key}: {}", PipelineState::from_flags(&flags).as_str());
            println!("  downloaded={}", flags.downloaded);
            println!("  installed={}", flags.installed);
            println!("  variables_set={}", flags.variables_set);
            println!("  post_installed={}", flags.post_installed);
            if let Some(record) = store.record(&key) {
                println!("  updated_at_unix_millis={}", record.updated_at_unix_millis);
            }
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Reset {
            sdk,
            version,
            platform,
        } => {
            let platform = resolve_platform(platform.as_deref())?;
            let version = resolve_version(&catalog, &sdk, version)?;
            let mut store = StepStore::load_default();
            let key = StepStore::key(&sdk, platform, &version);
            if store.clear(&key) {
                store.save()?;
                println!("cleared {key}");
            } else {
                println!("nothing recorded for {key}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Catalog => {
            tracing::debug!("catalog schema version {}", catalog.schema_version);
            for entry in &catalog.sdks {
                println!("{} ({}) {}", entry.sdk, entry.name, entry.description);
                for release in &entry.versions {
                    for artifact in &release.artifacts {
                        println!(
                            "  {} {:<8} {:>11} bytes  {}",
                            release.version, artifact.platform, artifact.size_bytes, artifact.url
                        );
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn install(
    catalog: &Catalog,
    sdk: &str,
    version: Option<&str>,
    dest: Option<String>,
    platform: Platform,
    force: bool,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    if sdk != android::SDK_NAME {
        return Err(format!("no installer is available for '{sdk}'").into());
    }

    let cfg = AppConfig::load();
    let installer = android_installer(&cfg);
    let dispatch = AndroidSdkInstaller::dispatch();
    let engine = match LifecycleEngine::new(&installer, &dispatch, platform) {
        Ok(engine) => engine,
        Err(err) => return Ok(report_failure(&err)),
    };

    let descriptor = catalog
        .descriptor(sdk, version, platform)
        .ok_or_else(|| {
            format!(
                "catalog has no {sdk} {} artifact for {platform}",
                version.unwrap_or("(default version)")
            )
        })?;

    let dest = dest
        .map(|value| sdkup_util::expand_user(value.trim()))
        .unwrap_or_else(|| cfg.install_dir());
    let key = StepStore::key(sdk, platform, &descriptor.version);
    let mut store = StepStore::load_default();
    let mut flags = if force {
        StepFlags::default()
    } else {
        store.flags(&key)
    };
    let mut ctx = InstallContext::new(dest, descriptor.version.clone(), platform);

    info!("Installing {} {} for {}", sdk, descriptor.version, platform);
    let result = engine.run(&descriptor, &mut flags, &mut ctx).await;
    info!("{sdk} run ended in state {}", ctx.state.as_str());

    store.set(&key, flags);
    store.save_best_effort();

    match result {
        Ok(()) => {
            let home = ctx
                .home()
                .map(|path| path.display().to_string())
                .unwrap_or_default();
            println!("{sdk} {} installed; {}={home}", descriptor.version, android::HOME_VARIABLE);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => Ok(report_failure(&err)),
    }
}

fn android_installer(cfg: &AppConfig) -> AndroidSdkInstaller {
    let mut android_cfg = AndroidSdkConfig {
        profile_path: cfg.profile_path(),
        ..AndroidSdkConfig::default()
    };
    if !cfg.android_packages.is_empty() {
        android_cfg.packages = cfg.android_packages.clone();
    }
    AndroidSdkInstaller::new(
        CacheLocator::new(cfg.cache_dir()),
        ElevationContext::from_env(),
        android_cfg,
    )
}

fn resolve_platform(value: Option<&str>) -> Result<Platform, String> {
    match value {
        Some(value) => value.parse(),
        None => Ok(Platform::detect()),
    }
}

fn resolve_version(
    catalog: &Catalog,
    sdk: &str,
    version: Option<String>,
) -> Result<String, String> {
    match version {
        Some(version) => Ok(version),
        None => catalog
            .default_version(sdk)
            .map(str::to_string)
            .ok_or_else(|| format!("catalog has no versions for '{sdk}'")),
    }
}

fn report_failure(err: &InstallError) -> ExitCode {
    error!("{err}");
    eprintln!("error: {err}");
    ExitCode::from(exit_code(err))
}

fn exit_code(err: &InstallError) -> u8 {
    match err {
        InstallError::MissingInstallDestination => 2,
        InstallError::DownloadFailed { .. } => 3,
        InstallError::ExtractionFailed { .. } => 4,
        InstallError::VariableUpdateFailed { .. } => 5,
        InstallError::PostInstallFailed { .. } => 6,
        InstallError::DaemonKillFailed { .. } => 7,
        InstallError::UnsupportedPlatform { .. } => 8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdkup_engine::DownloadFailure;

    #[test]
    fn every_failure_has_a_distinct_exit_code() {
        let errors = [
            InstallError::MissingInstallDestination,
            InstallError::DownloadFailed {
                url: "http://x".into(),
                reason: DownloadFailure::HttpStatus(404),
            },
            InstallError::ExtractionFailed {
                archive: "a.zip".into(),
                message: "bad".into(),
            },
            InstallError::VariableUpdateFailed {
                message: "denied".into(),
            },
            InstallError::PostInstallFailed {
                exit_code: Some(0),
                stderr: "oops".into(),
            },
            InstallError::DaemonKillFailed {
                exit_code: Some(1),
                message: "adb".into(),
            },
            InstallError::UnsupportedPlatform {
                platform: "other".into(),
            },
        ];
        let mut codes: Vec<u8> = errors.iter().map(exit_code).collect();
        assert!(codes.iter().all(|code| *code > 1));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn platform_flag_accepts_aliases() {
        assert_eq!(resolve_platform(Some("macos")).unwrap(), Platform::Darwin);
        assert_eq!(resolve_platform(None).unwrap(), Platform::detect());
        assert!(resolve_platform(Some("beos")).is_err());
    }

    #[test]
    fn cli_parses_install_flags() {
        let cli = Cli::try_parse_from([
            "sdkup",
            "install",
            "android-sdk",
            "--dest",
            "/opt/sdk",
            "--force",
        ])
        .unwrap();
        match cli.cmd {
            Cmd::Install {
                sdk, dest, force, ..
            } => {
                assert_eq!(sdk, "android-sdk");
                assert_eq!(dest.as_deref(), Some("/opt/sdk"));
                assert!(force);
            }
            _ => panic!("expected install"),
        }
    }
}
