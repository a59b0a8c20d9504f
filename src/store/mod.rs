//! Persistent pipeline state under `<repo>/.remedy/`.
//!
//! Both documents are loaded whole, mutated in memory and written back with
//! an atomic temp-file + rename.

pub mod defects;
pub mod history;

pub use defects::{DefectStats, DefectStore, MergeOutcome};
pub use history::{FixAttemptRecord, FixHistory, HistoryStats, StrategyStats, SuccessRates};

use crate::error::StoreError;
use chrono::Utc;
use serde::de::DeserializeOwned;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const STATE_DIR: &str = ".remedy";
const DEFECTS_FILE: &str = "defects.json";
const HISTORY_FILE: &str = "fix_history.json";
const BACKUPS_DIR: &str = "backups";

/// Document schema version written into every state file.
pub const STATE_VERSION: u32 = 1;

/// Locations of the state files for one repository.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(repo_root: &Path) -> Self {
        Self {
            root: repo_root.join(STATE_DIR),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn defects_path(&self) -> PathBuf {
        self.root.join(DEFECTS_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.root.join(HISTORY_FILE)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join(BACKUPS_DIR)
    }

    /// Create the state directory and keep it out of version control.
    pub fn ensure(&self) -> Result<(), StoreError> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root).map_err(|source| StoreError::Write {
                path: self.root.clone(),
                source,
            })?;
        }
        if let Err(err) = self.ensure_ignored() {
            // Ignore-file upkeep is best effort.
            debug!(error = %err, "could not add state dir to ignore file");
        }
        Ok(())
    }

    fn ensure_ignored(&self) -> io::Result<()> {
        let Some(repo_root) = self.root.parent() else {
            return Ok(());
        };
        let entry = format!("{}/", STATE_DIR);

        let gitignore_path = repo_root.join(".gitignore");
        if gitignore_path.exists() {
            return append_ignore_entry(&gitignore_path, &entry);
        }

        let git_dir = repo_root.join(".git");
        if git_dir.is_dir() {
            let info_dir = git_dir.join("info");
            fs::create_dir_all(&info_dir)?;
            return append_ignore_entry(&info_dir.join("exclude"), &entry);
        }

        Ok(())
    }
}

fn append_ignore_entry(path: &Path, entry: &str) -> io::Result<()> {
    let content = fs::read_to_string(path).unwrap_or_default();
    let already_present = content.lines().any(|line| {
        let trimmed = line.trim();
        trimmed == entry || trimmed == STATE_DIR
    });
    if already_present {
        return Ok(());
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if !content.trim().is_empty() && !content.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "# remedy state")?;
    writeln!(file, "{}", entry)?;
    Ok(())
}

/// Replace `path` with `content` via a sibling temp file and a rename.
pub fn write_atomic(path: &Path, content: &str) -> Result<(), StoreError> {
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, content).map_err(write_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        let _ = fs::set_permissions(&tmp_path, perms);
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(write_err(err));
    }
    Ok(())
}

/// Read a JSON document.
///
/// `Ok(None)` when the file is absent, or when it is corrupt: the corrupt
/// copy is moved aside to `<name>.corrupt-<timestamp>` so the next save
/// cannot destroy it. Other I/O failures are returned.
pub(crate) fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    match serde_json::from_str::<T>(&content) {
        Ok(doc) => Ok(Some(doc)),
        Err(err) => {
            let preserved = preserve_corrupt(path);
            warn!(
                path = %path.display(),
                error = %err,
                preserved = ?preserved,
                "state file is corrupt, starting empty"
            );
            Ok(None)
        }
    }
}

fn preserve_corrupt(path: &Path) -> Option<PathBuf> {
    let file_name = path.file_name()?.to_string_lossy().to_string();
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");
    let target = path.with_file_name(format!("{}.corrupt-{}", file_name, stamp));
    fs::rename(path, &target).ok()?;
    Some(target)
}

pub(crate) fn to_pretty_json<T: serde::Serialize>(
    value: &T,
    what: &'static str,
) -> Result<String, StoreError> {
    serde_json::to_string_pretty(value).map_err(|source| StoreError::Serialize { what, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_atomic_replaces_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/doc.json");
        write_atomic(&path, "one").unwrap();
        write_atomic(&path, "two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn corrupt_document_is_preserved_and_treated_as_missing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("defects.json");
        fs::write(&path, "{ not json").unwrap();

        let doc: Option<serde_json::Value> = read_document(&path).unwrap();
        assert!(doc.is_none());
        assert!(!path.exists());

        let preserved: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with("defects.json.corrupt-"))
            .collect();
        assert_eq!(preserved.len(), 1);
    }

    #[test]
    fn ensure_adds_state_dir_to_existing_gitignore_once() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".gitignore"), "target/").unwrap();
        let state = StateDir::new(tmp.path());
        state.ensure().unwrap();
        state.ensure().unwrap();

        let ignore = fs::read_to_string(tmp.path().join(".gitignore")).unwrap();
        assert_eq!(ignore.matches(".remedy/").count(), 1);
        assert!(ignore.starts_with("target/\n"));
        assert!(state.root().is_dir());
    }
}
