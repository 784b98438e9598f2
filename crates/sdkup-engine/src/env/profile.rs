//! Shell-profile export blocks for POSIX hosts.
//!
//! The block is delimited by marker comments so a re-run recognises its own
//! output: an identical block is left alone, a block for a different home
//! directory is rewritten in place, and anything else is appended.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use super::EnvError;
use crate::elevation::RunAs;

pub const DEFAULT_PROFILE: &str = ".bash_profile";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileOutcome {
    Appended { created: bool },
    Replaced,
    AlreadyPresent,
}

pub fn default_profile_path(home_dir: &Path) -> PathBuf {
    home_dir.join(DEFAULT_PROFILE)
}

fn start_marker(home_variable: &str) -> String {
    format!("# >>> sdkup {home_variable} >>>")
}

fn end_marker(home_variable: &str) -> String {
    format!("# <<< sdkup {home_variable} <<<")
}

/// Renders the export block. Path additions reference the home variable
/// rather than repeating the literal directory.
pub fn render_export_block(home_variable: &str, home: &Path, subdirs: &[&str]) -> String {
    let escaped = home
        .display()
        .to_string()
        .replace('\\', "\\\\")
        .replace('$', "\\$")
        .replace('`', "\\`")
        .replace('"', "\\\"");
    let additions: String = subdirs
        .iter()
        .map(|sub| format!(":${home_variable}/{sub}"))
        .collect();
    format!(
        "{}\nexport {home_variable}=\"{escaped}\"\nexport PATH=\"$PATH{additions}\"\n{}\n",
        start_marker(home_variable),
        end_marker(home_variable)
    )
}

/// Writes the export block into `profile`.
///
/// When the profile did not exist and `owner` is set, the new file is handed
/// to that identity; otherwise an elevated run would leave the user with a
/// root-owned profile.
pub fn write_export_block(
    profile: &Path,
    home_variable: &str,
    home: &Path,
    subdirs: &[&str],
    owner: Option<&RunAs>,
) -> Result<ProfileOutcome, EnvError> {
    let block = render_export_block(home_variable, home, subdirs);
    let existed = profile.exists();

    if existed {
        let content = fs::read_to_string(profile).map_err(|source| EnvError::Io {
            context: format!("failed to read {}", profile.display()),
            source,
        })?;
        if content.contains(&block) {
            return Ok(ProfileOutcome::AlreadyPresent);
        }
        if let Some(updated) = replace_block(&content, home_variable, &block) {
            fs::write(profile, updated).map_err(|source| EnvError::Io {
                context: format!("failed to rewrite {}", profile.display()),
                source,
            })?;
            return Ok(ProfileOutcome::Replaced);
        }
    } else if let Some(parent) = profile.parent() {
        fs::create_dir_all(parent).map_err(|source| EnvError::Io {
            context: format!("failed to create {}", parent.display()),
            source,
        })?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(profile)
        .map_err(|source| EnvError::Io {
            context: format!("failed to open {} for writing", profile.display()),
            source,
        })?;
    file.write_all(format!("\n{block}").as_bytes())
        .map_err(|source| EnvError::Io {
            context: format!("failed to append to {}", profile.display()),
            source,
        })?;

    if !existed {
        if let Some(owner) = owner {
            restore_owner(profile, owner)?;
        }
    }

    Ok(ProfileOutcome::Appended { created: !existed })
}

fn replace_block(content: &str, home_variable: &str, block: &str) -> Option<String> {
    let start = content.find(&start_marker(home_variable))?;
    let end_tag = end_marker(home_variable);
    let end = start + content[start..].find(&end_tag)? + end_tag.len();
    let end = if content[end..].starts_with('\n') {
        end + 1
    } else {
        end
    };
    Some(format!("{}{block}{}", &content[..start], &content[end..]))
}

#[cfg(unix)]
fn restore_owner(path: &Path, owner: &RunAs) -> Result<(), EnvError> {
    tracing::debug!(
        "Resetting owner of {} to {}:{}",
        path.display(),
        owner.uid,
        owner.gid
    );
    std::os::unix::fs::chown(path, Some(owner.uid), Some(owner.gid)).map_err(|source| {
        EnvError::Io {
            context: format!("failed to change owner of {}", path.display()),
            source,
        }
    })
}

#[cfg(not(unix))]
fn restore_owner(_path: &Path, _owner: &RunAs) -> Result<(), EnvError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUBDIRS: &[&str] = &["tools", "platform-tools"];

    #[test]
    fn block_uses_variable_references_for_path() {
        let block = render_export_block(
            "ANDROID_HOME",
            Path::new("/opt/sdk/android-sdk-macosx"),
            SUBDIRS,
        );
        assert!(block.contains("export ANDROID_HOME=\"/opt/sdk/android-sdk-macosx\"\n"));
        assert!(block
            .contains("export PATH=\"$PATH:$ANDROID_HOME/tools:$ANDROID_HOME/platform-tools\""));
        assert!(block.starts_with("# >>> sdkup ANDROID_HOME >>>"));
    }

    #[test]
    fn block_escapes_shell_metacharacters_in_home() {
        let block = render_export_block("ANDROID_HOME", Path::new("/opt/$dk/`x`"), &[]);
        assert!(block.contains(r#"export ANDROID_HOME="/opt/\$dk/\`x\`""#));
    }

    #[test]
    fn missing_profile_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join(".bash_profile");

        let outcome =
            write_export_block(&profile, "ANDROID_HOME", Path::new("/opt/sdk"), SUBDIRS, None)
                .unwrap();

        assert_eq!(outcome, ProfileOutcome::Appended { created: true });
        let content = fs::read_to_string(&profile).unwrap();
        assert!(content.contains("export ANDROID_HOME=\"/opt/sdk\""));
    }

    #[test]
    fn existing_profile_keeps_its_content_and_rerun_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join(".bash_profile");
        fs::write(&profile, "alias ll='ls -l'\n").unwrap();

        let first =
            write_export_block(&profile, "ANDROID_HOME", Path::new("/opt/sdk"), SUBDIRS, None)
                .unwrap();
        let after_first = fs::read_to_string(&profile).unwrap();
        let second =
            write_export_block(&profile, "ANDROID_HOME", Path::new("/opt/sdk"), SUBDIRS, None)
                .unwrap();

        assert_eq!(first, ProfileOutcome::Appended { created: false });
        assert_eq!(second, ProfileOutcome::AlreadyPresent);
        assert!(after_first.starts_with("alias ll='ls -l'\n"));
        assert_eq!(fs::read_to_string(&profile).unwrap(), after_first);
    }

    #[test]
    fn block_for_new_home_replaces_old_one() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join(".bash_profile");
        write_export_block(&profile, "ANDROID_HOME", Path::new("/old"), SUBDIRS, None).unwrap();
        fs::OpenOptions::new()
            .append(true)
            .open(&profile)
            .unwrap()
            .write_all(b"export EDITOR=vim\n")
            .unwrap();

        let outcome =
            write_export_block(&profile, "ANDROID_HOME", Path::new("/new"), SUBDIRS, None)
                .unwrap();

        let content = fs::read_to_string(&profile).unwrap();
        assert_eq!(outcome, ProfileOutcome::Replaced);
        assert!(!content.contains("/old"));
        assert!(content.contains("export ANDROID_HOME=\"/new\""));
        assert!(content.contains("export EDITOR=vim"));
        assert_eq!(content.matches("# >>> sdkup ANDROID_HOME >>>").count(), 1);
    }

    #[test]
    fn unwritable_location_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"").unwrap();
        let profile = blocker.join(".bash_profile");

        let err = write_export_block(&profile, "ANDROID_HOME", Path::new("/opt"), SUBDIRS, None)
            .unwrap_err();
        assert!(matches!(err, EnvError::Io { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn created_profile_is_chowned_to_owner() {
        use std::os::unix::fs::MetadataExt;

        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join(".bash_profile");
        let meta = fs::metadata(dir.path()).unwrap();
        // Chowning to our own ids is always permitted, which lets the
        // ownership path run without privileges.
        let owner = RunAs {
            uid: meta.uid(),
            gid: meta.gid(),
            user: None,
            home: None,
        };

        write_export_block(
            &profile,
            "ANDROID_HOME",
            Path::new("/opt"),
            SUBDIRS,
            Some(&owner),
        )
        .unwrap();

        let created = fs::metadata(&profile).unwrap();
        assert_eq!(created.uid(), owner.uid);
        assert_eq!(created.gid(), owner.gid);
    }
}
