use std::{fs, path::PathBuf};

use sdkup_engine::{InstallerDescriptor, Platform};
use serde::Deserialize;
use tracing::warn;

const CATALOG_ENV: &str = "SDKUP_CATALOG";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub(crate) struct Catalog {
    pub(crate) schema_version: u32,
    pub(crate) sdks: Vec<CatalogSdk>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct CatalogSdk {
    pub(crate) sdk: String,
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) versions: Vec<CatalogVersion>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct CatalogVersion {
    pub(crate) version: String,
    pub(crate) artifacts: Vec<CatalogArtifact>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct CatalogArtifact {
    pub(crate) platform: String,
    pub(crate) url: String,
    pub(crate) sha1: String,
    pub(crate) sha256: String,
    pub(crate) size_bytes: u64,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            schema_version: 1,
            sdks: Vec::new(),
        }
    }
}

impl CatalogArtifact {
    fn platform(&self) -> Option<Platform> {
        self.platform.parse().ok()
    }

    /// SHA-256 wins when an entry publishes both.
    fn digest(&self) -> &str {
        if self.sha256.trim().is_empty() {
            self.sha1.trim()
        } else {
            self.sha256.trim()
        }
    }
}

pub(crate) fn load_catalog() -> Catalog {
    if let Ok(path) = std::env::var(CATALOG_ENV) {
        let path = PathBuf::from(path);
        match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Catalog>(&raw) {
                Ok(catalog) => return catalog,
                Err(err) => warn!("Failed to parse catalog {}: {}", path.display(), err),
            },
            Err(err) => warn!("Failed to read catalog {}: {}", path.display(), err),
        }
    }
    default_catalog()
}

fn default_catalog() -> Catalog {
    let raw = include_str!("../catalog.json");
    match serde_json::from_str::<Catalog>(raw) {
        Ok(catalog) => catalog,
        Err(err) => {
            warn!("Failed to parse default catalog: {err}");
            Catalog::default()
        }
    }
}

impl Catalog {
    pub(crate) fn sdk(&self, sdk: &str) -> Option<&CatalogSdk> {
        self.sdks.iter().find(|item| item.sdk == sdk)
    }

    /// Resolves `version` (first listed when `None`) to a descriptor for
    /// `platform`.
    pub(crate) fn descriptor(
        &self,
        sdk: &str,
        version: Option<&str>,
        platform: Platform,
    ) -> Option<InstallerDescriptor> {
        let entry = self.sdk(sdk)?;
        let release = match version {
            Some(wanted) => entry
                .versions
                .iter()
                .find(|item| item.version == wanted.trim())?,
            None => entry.versions.first()?,
        };
        let artifact = release
            .artifacts
            .iter()
            .find(|artifact| artifact.platform() == Some(platform))?;
        Some(InstallerDescriptor {
            install_source: artifact.url.clone(),
            bytes: artifact.size_bytes,
            digest: artifact.digest().to_string(),
            version: release.version.clone(),
        })
    }

    pub(crate) fn default_version(&self, sdk: &str) -> Option<&str> {
        self.sdk(sdk)?
            .versions
            .first()
            .map(|release| release.version.as_str())
    }
}
