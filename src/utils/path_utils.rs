use crate::error::AppError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Expands tilde (~) in a path string to the user's home directory.
pub fn expand_tilde_path_buf(path_str: &str) -> Result<PathBuf, AppError> {
    shellexpand::full(path_str)
        .map(|cow_str| PathBuf::from(cow_str.as_ref()))
        .map_err(|e| AppError::InvalidPath(format!("Failed to expand path '{}': {}", path_str, e)))
}

pub fn home_dir() -> PathBuf {
    PathBuf::from(shellexpand::tilde("~").as_ref())
}

/// Working directory for a terminal: the requested one if it exists, the home directory otherwise.
pub fn terminal_cwd(requested: Option<&str>) -> PathBuf {
    let Some(raw) = requested.map(str::trim).filter(|s| !s.is_empty()) else {
        return home_dir();
    };
    match expand_tilde_path_buf(raw) {
        Ok(path) if path.is_dir() => path,
        Ok(path) => {
            debug!(cwd = %path.display(), "Requested cwd does not exist, using home directory");
            home_dir()
        }
        Err(_) => home_dir(),
    }
}

/// Validates that `path_str` names an existing directory and returns its canonical form.
pub fn existing_dir(path_str: &str, what: &str) -> Result<PathBuf, AppError> {
    if path_str.trim().is_empty() {
        return Err(AppError::InvalidPath(format!("{} path is empty", what)));
    }
    let expanded = expand_tilde_path_buf(path_str)?;
    if !expanded.is_dir() {
        return Err(AppError::InvalidPath(format!(
            "{} path does not exist: {}",
            what,
            expanded.display()
        )));
    }
    Ok(dunce::canonicalize(&expanded).unwrap_or(expanded))
}

/// Returns `candidate` when it exists on disk; on Windows also tries the `.exe` variant.
pub fn existing_file(candidate: &Path) -> Option<PathBuf> {
    if candidate.as_os_str().is_empty() {
        return None;
    }
    if candidate.exists() {
        return Some(candidate.to_path_buf());
    }
    if cfg!(windows) && candidate.extension().is_none() {
        let with_exe = candidate.with_extension("exe");
        if with_exe.exists() {
            return Some(with_exe);
        }
    }
    None
}
