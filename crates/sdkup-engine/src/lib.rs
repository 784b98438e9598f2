//! Step-sequenced SDK acquisition.
//!
//! An SDK install is a fixed four-stage pipeline (download, install,
//! update-variables, post-install). [`lifecycle::LifecycleEngine`] runs the
//! stages in order, skipping those already recorded in [`model::StepFlags`],
//! and dispatches each one through a per-platform [`lifecycle::StageTable`].
//! Concrete installers such as [`android::AndroidSdkInstaller`] fill the table
//! by composing the leaf modules below.

pub mod android;
pub mod archive;
pub mod cache;
pub mod download;
pub mod elevation;
pub mod env;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod platform;
pub mod process;
pub mod stages;
pub mod state;
pub mod verify;

mod hashing;

#[cfg(test)]
mod test_support;

pub use error::{DownloadFailure, InstallError};
pub use lifecycle::{LifecycleEngine, PipelineState, PlatformDispatch, SdkInstaller, StageTable};
pub use model::{InstallContext, InstallerDescriptor, Stage, StepFlags};
pub use platform::Platform;
