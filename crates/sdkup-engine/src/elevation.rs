//! Recovering the invoking user when running under `sudo`.
//!
//! `sudo` exports the original identity as `SUDO_UID`/`SUDO_GID`/`SUDO_USER`.
//! The context is resolved once per pipeline and handed to the stages that
//! must act as that user: the package manager refuses to run as root, and
//! files created in the user's home must not end up owned by root.
//!
//! `HOME` is not trusted while elevated: most `sudo` configurations reset it
//! to root's home. The invoking user's home comes from the account database.

use std::path::PathBuf;

pub const SUDO_UID_ENV: &str = "SUDO_UID";
pub const SUDO_GID_ENV: &str = "SUDO_GID";
pub const SUDO_USER_ENV: &str = "SUDO_USER";

/// Identity a child process or created file should be attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunAs {
    pub uid: u32,
    pub gid: u32,
    pub user: Option<String>,
    pub home: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElevationContext {
    invoking_user: Option<RunAs>,
}

impl ElevationContext {
    /// A context for a process that is not elevated.
    pub fn ambient() -> Self {
        Self::default()
    }

    pub fn with_invoking_user(identity: RunAs) -> Self {
        Self {
            invoking_user: Some(identity),
        }
    }

    /// Reads the sudo hints from the process environment. Outside an
    /// elevated process the hints are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok(), running_elevated())
    }

    pub fn from_lookup<F>(lookup: F, elevated: bool) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_hints(lookup, elevated, account_home)
    }

    /// Like [`from_lookup`](Self::from_lookup) with the account-database
    /// query supplied by the caller.
    pub fn from_hints<F, H>(lookup: F, elevated: bool, home_of: H) -> Self
    where
        F: Fn(&str) -> Option<String>,
        H: Fn(u32) -> Option<PathBuf>,
    {
        if !elevated {
            return Self::ambient();
        }
        let uid = lookup(SUDO_UID_ENV).and_then(|v| v.trim().parse::<u32>().ok());
        let gid = lookup(SUDO_GID_ENV).and_then(|v| v.trim().parse::<u32>().ok());
        let (Some(uid), Some(gid)) = (uid, gid) else {
            return Self::ambient();
        };
        if uid == 0 {
            return Self::ambient();
        }
        let user = lookup(SUDO_USER_ENV).filter(|v| !v.trim().is_empty());
        let home = home_of(uid).filter(|home| !home.as_os_str().is_empty());
        if home.is_none() {
            tracing::warn!("No home directory is recorded for uid {uid}");
        }
        tracing::debug!(
            "Elevated process; invoking user is {} ({uid}:{gid})",
            user.as_deref().unwrap_or("<unknown>")
        );
        Self {
            invoking_user: Some(RunAs {
                uid,
                gid,
                user,
                home,
            }),
        }
    }

    pub fn invoking_user(&self) -> Option<&RunAs> {
        self.invoking_user.as_ref()
    }

    pub fn is_elevated(&self) -> bool {
        self.invoking_user.is_some()
    }
}

/// Home directory of `uid` from the account database.
#[cfg(unix)]
pub fn account_home(uid: u32) -> Option<PathBuf> {
    use std::ffi::{CStr, OsStr};
    use std::os::unix::ffi::OsStrExt;

    let mut buf: Vec<libc::c_char> = vec![0; 1024];
    loop {
        // SAFETY: passwd is plain data; getpwuid_r fills it with pointers into
        // `buf`, which outlives every read below.
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut found: *mut libc::passwd = std::ptr::null_mut();
        let rc = unsafe {
            libc::getpwuid_r(
                uid as libc::uid_t,
                &mut pwd,
                buf.as_mut_ptr(),
                buf.len(),
                &mut found,
            )
        };
        if rc == libc::ERANGE && buf.len() < 1 << 20 {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 || found.is_null() || pwd.pw_dir.is_null() {
            return None;
        }
        // SAFETY: pw_dir is a NUL-terminated string inside `buf`.
        let dir = unsafe { CStr::from_ptr(pwd.pw_dir) }.to_bytes();
        return (!dir.is_empty()).then(|| PathBuf::from(OsStr::from_bytes(dir)));
    }
}

#[cfg(not(unix))]
pub fn account_home(_uid: u32) -> Option<PathBuf> {
    None
}

#[cfg(unix)]
fn running_elevated() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn running_elevated() -> bool {
    false
}
