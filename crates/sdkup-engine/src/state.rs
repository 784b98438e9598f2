//! Persisted step flags.
//!
//! One JSON file maps `<sdk>-<platform>-<version>` to the [`StepFlags`] of the
//! last run for that artifact, so an interrupted install resumes where it
//! stopped. A missing or unreadable file starts from empty flags.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::StepFlags;
use crate::platform::Platform;

const STATE_FILE: &str = "steps.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    #[serde(default)]
    pub flags: StepFlags,
    #[serde(default)]
    pub updated_at_unix_millis: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedSteps {
    #[serde(default)]
    entries: BTreeMap<String, StepRecord>,
}

#[derive(Debug)]
pub struct StepStore {
    path: PathBuf,
    entries: BTreeMap<String, StepRecord>,
}

impl StepStore {
    pub fn key(sdk: &str, platform: Platform, version: &str) -> String {
        format!("{}-{}-{}", sdk.trim(), platform, version.trim())
    }

    /// Loads the store kept under the sdkup state directory.
    pub fn load_default() -> Self {
        Self::load(sdkup_util::state_file_path(STATE_FILE))
    }

    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<PersistedSteps>(&bytes) {
                Ok(parsed) => parsed.entries,
                Err(e) => {
                    warn!("Failed to parse step state {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("Failed to read step state {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flags(&self, key: &str) -> StepFlags {
        self.entries
            .get(key)
            .map(|record| record.flags)
            .unwrap_or_default()
    }

    pub fn record(&self, key: &str) -> Option<&StepRecord> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &StepRecord)> {
        self.entries.iter().map(|(key, record)| (key.as_str(), record))
    }

    pub fn set(&mut self, key: &str, flags: StepFlags) {
        self.entries.insert(
            key.to_string(),
            StepRecord {
                flags,
                updated_at_unix_millis: sdkup_util::now_millis(),
            },
        );
    }

    /// Forgets `key`; returns whether anything was recorded for it.
    pub fn clear(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn save(&self) -> io::Result<()> {
        let persisted = PersistedSteps {
            entries: self.entries.clone(),
        };
        sdkup_util::write_json_atomic(&self.path, &persisted)
    }

    pub fn save_best_effort(&self) {
        if let Err(e) = self.save() {
            warn!("Failed to persist step state {}: {}", self.path.display(), e);
        }
    }
}
