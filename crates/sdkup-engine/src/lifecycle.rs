//! The four-stage install pipeline.
//!
//! Each platform maps to a [`StageTable`] of four stage functions. The engine
//! resolves the host's table once when it is built and then runs the stages
//! strictly in order: satisfied stages are skipped, a completed stage sets
//! its flag before the next one starts, and the first failure ends the run
//! with the failed stage's flag still unset.

use std::collections::HashMap;
use std::path::PathBuf;

use futures_util::future::BoxFuture;

use crate::cache::CacheLocator;
use crate::error::InstallError;
use crate::model::{InstallContext, InstallerDescriptor, Stage, StepFlags};
use crate::platform::Platform;

pub type StageFuture<'a> = BoxFuture<'a, Result<(), InstallError>>;

/// A stage body. It receives the installer's own state, the descriptor being
/// installed and the run's context, which it may update for later stages.
pub type StageFn<I> =
    for<'a> fn(&'a I, &'a InstallerDescriptor, &'a mut InstallContext) -> StageFuture<'a>;

pub struct StageTable<I> {
    pub download: StageFn<I>,
    pub install: StageFn<I>,
    pub update_variables: StageFn<I>,
    pub post_install: StageFn<I>,
}

impl<I> Clone for StageTable<I> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<I> Copy for StageTable<I> {}

impl<I> StageTable<I> {
    pub fn body(&self, stage: Stage) -> StageFn<I> {
        match stage {
            Stage::Download => self.download,
            Stage::Install => self.install,
            Stage::UpdateVariables => self.update_variables,
            Stage::PostInstall => self.post_install,
        }
    }
}

/// Platform → stage table mapping.
pub struct PlatformDispatch<I> {
    tables: HashMap<Platform, StageTable<I>>,
}

impl<I> Default for PlatformDispatch<I> {
    fn default() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }
}

impl<I> PlatformDispatch<I> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, platform: Platform, table: StageTable<I>) -> Self {
        self.tables.insert(platform, table);
        self
    }

    pub fn lookup(&self, platform: Platform) -> Option<StageTable<I>> {
        self.tables.get(&platform).copied()
    }

    pub fn supports(&self, platform: Platform) -> bool {
        self.tables.contains_key(&platform)
    }
}

/// What the engine needs from a concrete installer besides its stage table.
pub trait SdkInstaller: Sync {
    fn sdk_name(&self) -> &str;

    fn cache(&self) -> &CacheLocator;

    /// Directory the home variable points at for this run.
    fn sdk_home(&self, ctx: &InstallContext) -> PathBuf;

    fn cached_archive_path(
        &self,
        descriptor: &InstallerDescriptor,
        ctx: &InstallContext,
    ) -> PathBuf {
        self.cache().archive_path(
            self.sdk_name(),
            ctx.platform,
            &ctx.software_version,
            &descriptor.install_source,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    NotStarted,
    Downloaded,
    Installed,
    VariablesSet,
    PostInstalled,
    Failed,
}

impl PipelineState {
    /// Furthest state reachable by completing stages in order from the start.
    pub fn from_flags(flags: &StepFlags) -> Self {
        let mut state = Self::NotStarted;
        for stage in Stage::ALL {
            if !flags.is_satisfied(stage) {
                break;
            }
            state = state.advance(stage);
        }
        state
    }

    /// Forward transition on success of `stage`. `Failed` is terminal.
    pub fn advance(self, stage: Stage) -> Self {
        match (self, stage) {
            (Self::Failed, _) => Self::Failed,
            (_, Stage::Download) => Self::Downloaded,
            (_, Stage::Install) => Self::Installed,
            (_, Stage::UpdateVariables) => Self::VariablesSet,
            (_, Stage::PostInstall) => Self::PostInstalled,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Downloaded => "downloaded",
            Self::Installed => "installed",
            Self::VariablesSet => "variables_set",
            Self::PostInstalled => "post_installed",
            Self::Failed => "failed",
        }
    }
}

pub struct LifecycleEngine<'i, I> {
    installer: &'i I,
    platform: Platform,
    stages: StageTable<I>,
}

impl<'i, I: SdkInstaller> LifecycleEngine<'i, I> {
    /// Resolves the stage table for `platform`. An unregistered platform is a
    /// configuration error and no stage will ever run.
    pub fn new(
        installer: &'i I,
        dispatch: &PlatformDispatch<I>,
        platform: Platform,
    ) -> Result<Self, InstallError> {
        let stages = dispatch
            .lookup(platform)
            .ok_or_else(|| InstallError::UnsupportedPlatform {
                platform: platform.to_string(),
            })?;
        Ok(Self {
            installer,
            platform,
            stages,
        })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn state_of(flags: &StepFlags) -> PipelineState {
        PipelineState::from_flags(flags)
    }

    pub async fn run(
        &self,
        descriptor: &InstallerDescriptor,
        flags: &mut StepFlags,
        ctx: &mut InstallContext,
    ) -> Result<(), InstallError> {
        let sdk = self.installer.sdk_name();
        ctx.platform = self.platform;

        ctx.state = PipelineState::NotStarted;

        if !ctx.has_destination() {
            let err = InstallError::MissingInstallDestination;
            ctx.state = PipelineState::Failed;
            report_failure(sdk, &err);
            return Err(err);
        }

        for stage in Stage::ALL {
            if flags.is_satisfied(stage) {
                tracing::info!("{sdk}: {stage} already satisfied; skipping");
                sdkup_telemetry::event(
                    "stage.skipped",
                    &[("sdk", sdk), ("stage", stage.as_str())],
                );
                self.restore_skipped(stage, descriptor, ctx);
                ctx.state = ctx.state.advance(stage);
                continue;
            }

            tracing::info!("{sdk}: running {stage} ({})", self.platform);
            let body = self.stages.body(stage);
            if let Err(err) = body(self.installer, descriptor, ctx).await {
                tracing::warn!(
                    "{sdk}: {stage} failed after reaching {}: {err}",
                    ctx.state.as_str()
                );
                ctx.state = PipelineState::Failed;
                report_failure(sdk, &err);
                return Err(err);
            }

            flags.mark_satisfied(stage);
            ctx.state = ctx.state.advance(stage);
            tracing::info!("{sdk}: {stage} complete");
            sdkup_telemetry::event(
                "stage.completed",
                &[
                    ("sdk", sdk),
                    ("stage", stage.as_str()),
                    ("state", ctx.state.as_str()),
                ],
            );
        }

        Ok(())
    }

    /// Re-derives the context a skipped stage would have produced.
    fn restore_skipped(
        &self,
        stage: Stage,
        descriptor: &InstallerDescriptor,
        ctx: &mut InstallContext,
    ) {
        match stage {
            Stage::Download if ctx.cached_archive_path.is_none() => {
                ctx.cached_archive_path =
                    Some(self.installer.cached_archive_path(descriptor, ctx));
            }
            Stage::UpdateVariables if ctx.resolved_home.is_none() => {
                ctx.resolved_home = Some(self.installer.sdk_home(ctx));
            }
            _ => {}
        }
    }
}

fn report_failure(sdk: &str, err: &InstallError) {
    let mut annotations = vec![("sdk", sdk.to_string())];
    annotations.extend(err.telemetry_annotations());
    sdkup_telemetry::error_event(
        "stage.failed",
        err,
        &annotations,
        &err.sensitive_annotations(),
    );
}
