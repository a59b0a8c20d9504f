//! Error types shared across the pipeline.
//!
//! Only the failures that must stop a run get a type here. Parse problems,
//! unavailable reasoning backends and failed verifications are ordinary
//! outcomes and travel as values instead.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Persistence failures. Always fatal for the current run.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures of the apply engine that leave the tree in an unknown state.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("failed to restore {target} from backup {backup}: {source}")]
    RestoreFailed {
        target: PathBuf,
        backup: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("restored {target} does not match its backup {backup}")]
    RestoreMismatch { target: PathBuf, backup: PathBuf },
}
