//! Persistent environment registration.
//!
//! Windows keeps user variables in the registry, so updates go through an
//! [`EnvironmentStore`] and are applied idempotently by [`apply_persistent`].
//! POSIX hosts have no such store; [`profile`] appends an export block to the
//! user's shell profile instead.

use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod profile;
#[cfg(windows)]
pub mod registry;

pub const PATH_VARIABLE: &str = "Path";

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// A persistent name/value store for user environment variables.
pub trait EnvironmentStore {
    fn get(&self, name: &str) -> Result<Option<String>, EnvError>;
    fn set(&mut self, name: &str, value: &str) -> Result<(), EnvError>;

    /// Tells running programs that variables changed so that processes they
    /// launch afterwards see the new values.
    fn announce(&mut self) {}
}

/// A home variable plus the directories to put on the search path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableUpdate {
    pub home_variable: String,
    pub home: PathBuf,
    pub path_entries: Vec<PathBuf>,
}

impl VariableUpdate {
    pub fn new(home_variable: &str, home: &Path, subdirs: &[&str]) -> Self {
        Self {
            home_variable: home_variable.to_string(),
            home: home.to_path_buf(),
            path_entries: subdirs.iter().map(|sub| home.join(sub)).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub home_changed: bool,
    pub added_paths: Vec<String>,
}

impl UpdateReport {
    pub fn is_noop(&self) -> bool {
        !self.home_changed && self.added_paths.is_empty()
    }
}

/// Sets the home variable if it differs and appends missing path entries,
/// separated by `;`. Running it twice leaves the store unchanged the second
/// time.
pub fn apply_persistent(
    store: &mut dyn EnvironmentStore,
    update: &VariableUpdate,
) -> Result<UpdateReport, EnvError> {
    let mut report = UpdateReport::default();
    let home = update.home.display().to_string();

    let current_home = store.get(&update.home_variable)?;
    if current_home.as_deref() != Some(home.as_str()) {
        store.set(&update.home_variable, &home)?;
        report.home_changed = true;
    }

    let mut path_value = store.get(PATH_VARIABLE)?.unwrap_or_default();
    for entry in &update.path_entries {
        let entry = entry.display().to_string();
        if path_contains(&path_value, &entry) {
            continue;
        }
        if !path_value.is_empty() && !path_value.ends_with(';') {
            path_value.push(';');
        }
        path_value.push_str(&entry);
        report.added_paths.push(entry);
    }
    if !report.added_paths.is_empty() {
        store.set(PATH_VARIABLE, &path_value)?;
    }
    if !report.is_noop() {
        store.announce();
    }

    Ok(report)
}

/// Case-insensitive membership test that ignores trailing separators.
pub fn path_contains(path_value: &str, entry: &str) -> bool {
    let wanted = normalize_entry(entry);
    path_value
        .split(';')
        .any(|item| !item.trim().is_empty() && normalize_entry(item) == wanted)
}

fn normalize_entry(entry: &str) -> String {
    entry
        .trim()
        .trim_end_matches(['\\', '/'])
        .to_ascii_lowercase()
}
