use std::{fs, io, path::PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

const CONFIG_FILE: &str = "config.json";

const INSTALL_DIR_ENV: &str = "SDKUP_INSTALL_DIR";
const CACHE_DIR_ENV: &str = "SDKUP_CACHE_DIR";
const PROFILE_ENV: &str = "SDKUP_PROFILE";
const ANDROID_PACKAGES_ENV: &str = "SDKUP_ANDROID_PACKAGES";

/// Settings read from `<data dir>/config.json`. Each field can be overridden
/// by its `SDKUP_*` environment variable, which always wins over the file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct AppConfig {
    pub(crate) install_dir: String,
    pub(crate) cache_dir: String,
    pub(crate) profile_path: String,
    pub(crate) android_packages: Vec<String>,
}

impl AppConfig {
    pub(crate) fn load() -> Self {
        let path = config_path();
        let mut cfg = match fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<AppConfig>(&data) {
                Ok(file_cfg) => file_cfg,
                Err(err) => {
                    warn!("Failed to parse {}: {err}", path.display());
                    AppConfig::default()
                }
            },
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to read {}: {err}", path.display());
                }
                AppConfig::default()
            }
        };

        if let Some(value) = env_value(INSTALL_DIR_ENV) {
            cfg.install_dir = value;
        }
        if let Some(value) = env_value(CACHE_DIR_ENV) {
            cfg.cache_dir = value;
        }
        if let Some(value) = env_value(PROFILE_ENV) {
            cfg.profile_path = value;
        }
        if let Some(value) = env_value(ANDROID_PACKAGES_ENV) {
            cfg.android_packages = value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect();
        }
        cfg
    }

    pub(crate) fn install_dir(&self) -> PathBuf {
        if self.install_dir.trim().is_empty() {
            sdkup_util::data_dir().join("sdks")
        } else {
            sdkup_util::expand_user(self.install_dir.trim())
        }
    }

    pub(crate) fn cache_dir(&self) -> PathBuf {
        if self.cache_dir.trim().is_empty() {
            sdkup_util::cache_dir()
        } else {
            sdkup_util::expand_user(self.cache_dir.trim())
        }
    }

    pub(crate) fn profile_path(&self) -> Option<PathBuf> {
        let value = self.profile_path.trim();
        (!value.is_empty()).then(|| sdkup_util::expand_user(value))
    }
}

fn config_path() -> PathBuf {
    sdkup_util::data_dir().join(CONFIG_FILE)
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ALL_ENV: &[&str] = &[
        INSTALL_DIR_ENV,
        CACHE_DIR_ENV,
        PROFILE_ENV,
        ANDROID_PACKAGES_ENV,
    ];

    fn with_data_dir<T>(f: impl FnOnce(&std::path::Path) -> T) -> T {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var(sdkup_util::DATA_DIR_ENV, dir.path());
        for name in ALL_ENV {
            std::env::remove_var(name);
        }
        let out = f(dir.path());
        std::env::remove_var(sdkup_util::DATA_DIR_ENV);
        for name in ALL_ENV {
            std::env::remove_var(name);
        }
        out
    }

    #[test]
    #[serial]
    fn missing_file_uses_data_dir_defaults() {
        with_data_dir(|root| {
            let cfg = AppConfig::load();
            assert_eq!(cfg, AppConfig::default());
            assert_eq!(cfg.install_dir(), root.join("sdks"));
            assert_eq!(cfg.cache_dir(), root.join("cache"));
            assert!(cfg.profile_path().is_none());
        });
    }

    #[test]
    #[serial]
    fn file_values_are_used() {
        with_data_dir(|root| {
            fs::write(
                root.join(CONFIG_FILE),
                r#"{"install_dir": "/opt/sdks", "android_packages": ["platform-tools"]}"#,
            )
            .unwrap();

            let cfg = AppConfig::load();
            assert_eq!(cfg.install_dir(), PathBuf::from("/opt/sdks"));
            assert_eq!(cfg.android_packages, vec!["platform-tools".to_string()]);
        });
    }

    #[test]
    #[serial]
    fn env_overrides_file() {
        with_data_dir(|root| {
            fs::write(
                root.join(CONFIG_FILE),
                r#"{"install_dir": "/opt/sdks", "profile_path": "/home/dev/.profile"}"#,
            )
            .unwrap();
            std::env::set_var(INSTALL_DIR_ENV, "/srv/sdks");
            std::env::set_var(ANDROID_PACKAGES_ENV, "tools, platform-tools,,");

            let cfg = AppConfig::load();
            assert_eq!(cfg.install_dir(), PathBuf::from("/srv/sdks"));
            assert_eq!(cfg.profile_path(), Some(PathBuf::from("/home/dev/.profile")));
            assert_eq!(
                cfg.android_packages,
                vec!["tools".to_string(), "platform-tools".to_string()]
            );
        });
    }

    #[test]
    #[serial]
    fn malformed_file_is_ignored() {
        with_data_dir(|root| {
            fs::write(root.join(CONFIG_FILE), b"{oops").unwrap();
            assert_eq!(AppConfig::load(), AppConfig::default());
        });
    }
}
