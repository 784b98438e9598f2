use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Host platform families the engine can dispatch on.
///
/// `Other` covers any OS without a registered stage table; the engine reports
/// it as unsupported before running anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Darwin,
    Linux,
    Other,
}

impl Platform {
    pub fn detect() -> Self {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Self {
        match os {
            "windows" => Self::Windows,
            "macos" | "darwin" => Self::Darwin,
            "linux" => Self::Linux,
            _ => Self::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Darwin => "darwin",
            Self::Linux => "linux",
            Self::Other => "other",
        }
    }

    pub fn is_windows(self) -> bool {
        matches!(self, Self::Windows)
    }

    pub fn executable_extension(self) -> &'static str {
        match self {
            Self::Windows => ".exe",
            Self::Darwin | Self::Linux | Self::Other => "",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "windows" | "win32" => Ok(Self::Windows),
            "darwin" | "macos" => Ok(Self::Darwin),
            "linux" => Ok(Self::Linux),
            other => Err(format!("unknown platform '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_os_maps_rust_os_names() {
        assert_eq!(Platform::from_os("windows"), Platform::Windows);
        assert_eq!(Platform::from_os("macos"), Platform::Darwin);
        assert_eq!(Platform::from_os("linux"), Platform::Linux);
        assert_eq!(Platform::from_os("freebsd"), Platform::Other);
    }

    #[test]
    fn parse_accepts_aliases_and_rejects_unknown() {
        assert_eq!("win32".parse::<Platform>(), Ok(Platform::Windows));
        assert_eq!("MacOS".parse::<Platform>(), Ok(Platform::Darwin));
        assert!("plan9".parse::<Platform>().is_err());
    }

    #[test]
    fn detect_matches_compile_target() {
        let detected = Platform::detect();
        #[cfg(target_os = "linux")]
        assert_eq!(detected, Platform::Linux);
        #[cfg(target_os = "macos")]
        assert_eq!(detected, Platform::Darwin);
        #[cfg(target_os = "windows")]
        assert_eq!(detected, Platform::Windows);
        let _ = detected;
    }
}
