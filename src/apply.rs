//! Transactional apply: backup, write, verify, then keep or roll back.
//!
//! The working tree is never left half-applied. A change that fails
//! verification is undone byte for byte; if even that fails the run stops
//! with [`ApplyError`] and the backup stays on disk.

use crate::error::ApplyError;
use crate::fix::EditTarget;
use crate::util::{resolve_repo_file, slugify, RepoPath};
use crate::verify::{VerificationOutcome, Verifier};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The change passed verification and stays.
    Success { verification: VerificationOutcome },
    /// Verification failed; the file is back to its original bytes.
    Reverted {
        reason: String,
        verification: VerificationOutcome,
    },
    /// The change could not be written; nothing was verified.
    FailedToApply { reason: String },
}

impl ApplyOutcome {
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            ApplyOutcome::Success { .. } => None,
            ApplyOutcome::Reverted { reason, .. } | ApplyOutcome::FailedToApply { reason } => {
                Some(reason)
            }
        }
    }
}

/// One candidate edit.
#[derive(Debug, Clone, Copy)]
pub struct Edit<'a> {
    pub file: &'a Path,
    pub target: EditTarget,
    pub code: &'a str,
}

pub struct ApplyEngine {
    repo_root: PathBuf,
    backups_dir: PathBuf,
}

impl ApplyEngine {
    pub fn new(repo_root: impl Into<PathBuf>, backups_dir: PathBuf) -> Self {
        Self {
            repo_root: repo_root.into(),
            backups_dir,
        }
    }

    pub fn apply(&self, edit: Edit<'_>, verifier: &dyn Verifier) -> Result<ApplyOutcome, ApplyError> {
        let resolved = match resolve_repo_file(&self.repo_root, edit.file) {
            Ok(resolved) => resolved,
            Err(reason) => return Ok(ApplyOutcome::FailedToApply { reason }),
        };

        let backup = match self.backup(&resolved) {
            Ok(backup) => backup,
            Err(reason) => return Ok(ApplyOutcome::FailedToApply { reason }),
        };

        let new_content = match fs::read(&resolved.absolute)
            .map_err(|e| format!("Failed to read {}: {}", resolved.relative.display(), e))
            .and_then(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|_| format!("{} is not valid UTF-8", resolved.relative.display()))
            })
            .and_then(|original| splice(&original, edit.target, edit.code))
        {
            Ok(content) => content,
            Err(reason) => {
                discard_backup(&backup);
                return Ok(ApplyOutcome::FailedToApply { reason });
            }
        };

        if let Err(err) = fs::write(&resolved.absolute, new_content) {
            self.restore(&resolved, &backup)?;
            return Ok(ApplyOutcome::FailedToApply {
                reason: format!("Failed to write {}: {}", resolved.relative.display(), err),
            });
        }
        debug!(file = %resolved.relative.display(), "candidate written, verifying");

        let verification = verifier.verify(&self.repo_root);
        if verification.passed {
            discard_backup(&backup);
            info!(file = %resolved.relative.display(), "verification passed");
            return Ok(ApplyOutcome::Success { verification });
        }

        self.restore(&resolved, &backup)?;
        info!(
            file = %resolved.relative.display(),
            reason = %verification.summary,
            "verification failed, change rolled back"
        );
        Ok(ApplyOutcome::Reverted {
            reason: format!("verification failed: {}", verification.summary),
            verification,
        })
    }

    fn backup(&self, resolved: &RepoPath) -> Result<PathBuf, String> {
        fs::create_dir_all(&self.backups_dir)
            .map_err(|e| format!("Failed to create backup dir: {}", e))?;
        let name = format!(
            "{}-{}.bak",
            slugify(&resolved.relative.to_string_lossy(), 120),
            Utc::now().format("%Y%m%dT%H%M%S%3f")
        );
        let backup = self.backups_dir.join(name);
        fs::copy(&resolved.absolute, &backup)
            .map_err(|e| format!("Failed to back up {}: {}", resolved.relative.display(), e))?;
        Ok(backup)
    }

    /// Put the backup back and prove the bytes match before deleting it.
    fn restore(&self, resolved: &RepoPath, backup: &Path) -> Result<(), ApplyError> {
        fs::copy(backup, &resolved.absolute).map_err(|source| ApplyError::RestoreFailed {
            target: resolved.absolute.clone(),
            backup: backup.to_path_buf(),
            source,
        })?;

        let restored = fs::read(&resolved.absolute).map_err(|source| ApplyError::RestoreFailed {
            target: resolved.absolute.clone(),
            backup: backup.to_path_buf(),
            source,
        })?;
        let original = fs::read(backup).map_err(|source| ApplyError::RestoreFailed {
            target: resolved.absolute.clone(),
            backup: backup.to_path_buf(),
            source,
        })?;
        if restored != original {
            return Err(ApplyError::RestoreMismatch {
                target: resolved.absolute.clone(),
                backup: backup.to_path_buf(),
            });
        }

        discard_backup(backup);
        Ok(())
    }
}

fn discard_backup(backup: &Path) {
    if let Err(err) = fs::remove_file(backup) {
        warn!(backup = %backup.display(), error = %err, "could not remove backup");
    }
}

/// Build the new file content.
///
/// A region edit replaces exactly lines `start..=end` and keeps everything
/// else verbatim. The file's line-ending style and its trailing newline (or
/// lack of one) are kept in both modes.
pub fn splice(original: &str, target: EditTarget, code: &str) -> Result<String, String> {
    let eol = if original.contains("\r\n") { "\r\n" } else { "\n" };
    let replacement = code.lines().collect::<Vec<_>>().join(eol);

    match target {
        EditTarget::WholeFile => {
            let mut content = replacement;
            if original.ends_with('\n') && !content.is_empty() {
                content.push_str(eol);
            }
            Ok(content)
        }
        EditTarget::Region(region) => {
            let lines: Vec<&str> = original.split_inclusive('\n').collect();
            if region.start == 0 || region.start > region.end || region.end > lines.len() {
                return Err(format!(
                    "Region {}-{} is outside the file ({} lines)",
                    region.start,
                    region.end,
                    lines.len()
                ));
            }

            let mut content = String::with_capacity(original.len() + code.len());
            for line in &lines[..region.start - 1] {
                content.push_str(line);
            }
            content.push_str(&replacement);
            let region_had_terminator = lines[region.end - 1].ends_with('\n');
            if region_had_terminator && !replacement.is_empty() {
                content.push_str(eol);
            }
            for line in &lines[region.end..] {
                content.push_str(line);
            }
            Ok(content)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::LineRegion;
    use std::cell::RefCell;
    use tempfile::TempDir;

    struct FixedVerifier {
        passed: bool,
        seen: RefCell<Vec<String>>,
        watch: PathBuf,
    }

    impl FixedVerifier {
        fn new(passed: bool, watch: PathBuf) -> Self {
            Self {
                passed,
                seen: RefCell::new(Vec::new()),
                watch,
            }
        }
    }

    impl Verifier for FixedVerifier {
        fn verify(&self, _repo_root: &Path) -> VerificationOutcome {
            self.seen
                .borrow_mut()
                .push(fs::read_to_string(&self.watch).unwrap_or_default());
            if self.passed {
                VerificationOutcome::pass("ok")
            } else {
                VerificationOutcome::fail("2 tests failed")
            }
        }

        fn describe(&self) -> String {
            "fixed".to_string()
        }
    }

    fn region(start: usize, end: usize) -> EditTarget {
        EditTarget::Region(LineRegion { start, end })
    }

    fn backups_left(dir: &Path) -> usize {
        fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn splice_replaces_only_the_region() {
        let original = "a\nb\nc\nd\n";
        assert_eq!(splice(original, region(2, 3), "B\nC").unwrap(), "a\nB\nC\nd\n");
        assert_eq!(splice(original, region(4, 4), "D\nE\n").unwrap(), "a\nb\nc\nD\nE\n");
        assert_eq!(splice("a\nb", region(2, 2), "x").unwrap(), "a\nx");
        assert!(splice(original, region(3, 9), "x").is_err());
    }

    #[test]
    fn splice_preserves_crlf_and_trailing_newline() {
        assert_eq!(splice("a\r\nb\r\n", region(1, 1), "A").unwrap(), "A\r\nb\r\n");
        assert_eq!(splice("a\r\nb\r\n", EditTarget::WholeFile, "x\ny\n").unwrap(), "x\r\ny\r\n");
        assert_eq!(splice("a", EditTarget::WholeFile, "b\n").unwrap(), "b");
    }

    #[test]
    fn passing_verification_keeps_the_change() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("lib.py");
        fs::write(&file, "x = 1\ny = 'a' + 1\nz = 3\n").unwrap();
        let backups = tmp.path().join(".remedy/backups");

        let engine = ApplyEngine::new(tmp.path(), backups.clone());
        let verifier = FixedVerifier::new(true, file.clone());
        let outcome = engine
            .apply(
                Edit {
                    file: Path::new("lib.py"),
                    target: region(2, 2),
                    code: "y = 'a' + str(1)",
                },
                &verifier,
            )
            .unwrap();

        assert!(matches!(outcome, ApplyOutcome::Success { .. }));
        assert_eq!(fs::read_to_string(&file).unwrap(), "x = 1\ny = 'a' + str(1)\nz = 3\n");
        assert_eq!(verifier.seen.borrow()[0], "x = 1\ny = 'a' + str(1)\nz = 3\n");
        assert_eq!(backups_left(&backups), 0);
    }

    #[test]
    fn failing_verification_restores_identical_bytes() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("lib.py");
        let original: &[u8] = b"x = 1\r\ny = 'a' + 1\r\n\xe2\x9c\x93 = 3";
        fs::write(&file, original).unwrap();
        let backups = tmp.path().join(".remedy/backups");

        let engine = ApplyEngine::new(tmp.path(), backups.clone());
        let verifier = FixedVerifier::new(false, file.clone());
        let outcome = engine
            .apply(
                Edit {
                    file: Path::new("lib.py"),
                    target: EditTarget::WholeFile,
                    code: "broken",
                },
                &verifier,
            )
            .unwrap();

        match outcome {
            ApplyOutcome::Reverted { reason, .. } => assert!(reason.contains("2 tests failed")),
            other => panic!("expected revert, got {:?}", other),
        }
        assert_eq!(verifier.seen.borrow()[0], "broken");
        assert_eq!(fs::read(&file).unwrap(), original);
        assert_eq!(backups_left(&backups), 0);
    }

    #[test]
    fn unresolvable_targets_fail_to_apply_without_touching_anything() {
        let tmp = TempDir::new().unwrap();
        let engine = ApplyEngine::new(tmp.path(), tmp.path().join(".remedy/backups"));
        let verifier = FixedVerifier::new(true, tmp.path().join("none"));

        for path in ["missing.rs", "../escape.rs", "/etc/passwd", ""] {
            let outcome = engine
                .apply(
                    Edit {
                        file: Path::new(path),
                        target: EditTarget::WholeFile,
                        code: "x",
                    },
                    &verifier,
                )
                .unwrap();
            assert!(matches!(outcome, ApplyOutcome::FailedToApply { .. }), "{}", path);
        }
        assert!(verifier.seen.borrow().is_empty());
    }

    #[test]
    fn stale_region_fails_to_apply_and_cleans_backup() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.ts"), "one\n").unwrap();
        let backups = tmp.path().join(".remedy/backups");
        let engine = ApplyEngine::new(tmp.path(), backups.clone());
        let verifier = FixedVerifier::new(true, tmp.path().join("a.ts"));

        let outcome = engine
            .apply(
                Edit {
                    file: Path::new("a.ts"),
                    target: region(5, 7),
                    code: "x",
                },
                &verifier,
            )
            .unwrap();
        assert!(matches!(outcome, ApplyOutcome::FailedToApply { .. }));
        assert_eq!(fs::read_to_string(tmp.path().join("a.ts")).unwrap(), "one\n");
        assert_eq!(backups_left(&backups), 0);
    }
}
