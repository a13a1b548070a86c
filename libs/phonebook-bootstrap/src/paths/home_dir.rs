use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum HomeDirError {
    #[error("neither HOME nor USERPROFILE is set")]
    HomeMissing,
    #[error("home_dir must be an absolute path (after ~ expansion): {0}")]
    AbsoluteRequired(String),
    #[error("failed to create home_dir")]
    Io(#[from] std::io::Error),
}

fn user_home() -> Result<PathBuf, HomeDirError> {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .ok_or(HomeDirError::HomeMissing)
}

/// Resolve the service home directory.
///
/// A configured value may start with `~` and must be absolute once expanded.
/// Without one, `<user home>/<default_subdir>` is used. With `create` the
/// directory is created when missing.
pub fn resolve_home_dir(
    config_home: Option<String>,
    default_subdir: &str,
    create: bool,
) -> Result<PathBuf, HomeDirError> {
    let path = match config_home {
        Some(raw) => {
            let expanded = if raw == "~" {
                user_home()?
            } else if let Some(rest) = raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\")) {
                user_home()?.join(rest)
            } else {
                PathBuf::from(&raw)
            };
            if !expanded.is_absolute() {
                return Err(HomeDirError::AbsoluteRequired(
                    expanded.to_string_lossy().into_owned(),
                ));
            }
            expanded
        }
        None => user_home()?.join(default_subdir),
    };

    if create {
        fs::create_dir_all(&path)?;
    }
    Ok(path)
}

/// Join `file` onto `base` unless it is already absolute.
pub fn resolve_under(base: &Path, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
