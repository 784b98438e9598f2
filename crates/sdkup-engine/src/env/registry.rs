use winreg::enums::{RegType, HKEY_CURRENT_USER, KEY_READ, KEY_WRITE, REG_EXPAND_SZ, REG_SZ};
use winreg::types::ToRegValue;
use winreg::RegKey;

use super::{EnvError, EnvironmentStore, PATH_VARIABLE};

/// User environment stored under `HKEY_CURRENT_USER\Environment`.
pub struct RegistryStore {
    key: RegKey,
}

impl RegistryStore {
    pub fn open_user() -> Result<Self, EnvError> {
        let hkcu = RegKey::predef(HKEY_CURRENT_USER);
        let key = hkcu
            .open_subkey_with_flags("Environment", KEY_READ | KEY_WRITE)
            .map_err(|source| EnvError::Io {
                context: "failed to open HKCU\\Environment".into(),
                source,
            })?;
        Ok(Self { key })
    }
}

/// Registry type for a rewritten string value. An existing value keeps its
/// type so `%USERPROFILE%`-style entries go on expanding; a new `Path` or a
/// value holding `%` references is stored expandable.
pub(crate) fn string_kind(name: &str, value: &str, existing: Option<&RegType>) -> RegType {
    match existing {
        Some(REG_EXPAND_SZ) => REG_EXPAND_SZ,
        Some(REG_SZ) => REG_SZ,
        _ if name.eq_ignore_ascii_case(PATH_VARIABLE) || value.contains('%') => REG_EXPAND_SZ,
        _ => REG_SZ,
    }
}

impl EnvironmentStore for RegistryStore {
    fn get(&self, name: &str) -> Result<Option<String>, EnvError> {
        match self.key.get_value::<String, _>(name) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(EnvError::Io {
                context: format!("failed to read {name} from the registry"),
                source,
            }),
        }
    }

    fn set(&mut self, name: &str, value: &str) -> Result<(), EnvError> {
        let existing = match self.key.get_raw_value(name) {
            Ok(raw) => Some(raw.vtype),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(source) => {
                return Err(EnvError::Io {
                    context: format!("failed to read {name} from the registry"),
                    source,
                })
            }
        };
        let mut raw = value.to_string().to_reg_value();
        raw.vtype = string_kind(name, value, existing.as_ref());
        self.key
            .set_raw_value(name, &raw)
            .map_err(|source| EnvError::Io {
                context: format!("failed to write {name} to the registry"),
                source,
            })
    }

    fn announce(&mut self) {
        broadcast_environment_change();
    }
}

fn broadcast_environment_change() {
    use windows_sys::Win32::UI::WindowsAndMessaging::{
        SendMessageTimeoutW, HWND_BROADCAST, SMTO_ABORTIFHUNG, WM_SETTINGCHANGE,
    };

    let area: Vec<u16> = "Environment".encode_utf16().chain(Some(0)).collect();
    let mut result = 0usize;
    // SAFETY: `area` is NUL-terminated and lives until the call returns.
    let sent = unsafe {
        SendMessageTimeoutW(
            HWND_BROADCAST,
            WM_SETTINGCHANGE,
            0,
            area.as_ptr() as isize,
            SMTO_ABORTIFHUNG,
            5000,
            &mut result,
        )
    };
    if sent == 0 {
        tracing::warn!("Environment change broadcast timed out or failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_type_is_preserved() {
        assert!(matches!(
            string_kind("Path", r"C:\x", Some(&REG_EXPAND_SZ)),
            REG_EXPAND_SZ
        ));
        assert!(matches!(string_kind("Path", r"C:\x", Some(&REG_SZ)), REG_SZ));
    }

    #[test]
    fn new_path_is_expandable() {
        assert!(matches!(string_kind("Path", r"C:\x", None), REG_EXPAND_SZ));
        assert!(matches!(string_kind("ANDROID_HOME", r"C:\sdk", None), REG_SZ));
        assert!(matches!(
            string_kind("ANDROID_HOME", r"%USERPROFILE%\sdk", None),
            REG_EXPAND_SZ
        ));
    }
}
