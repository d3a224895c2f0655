//! On-disk format for trained models.
//!
//! The artifact is a JSON envelope `{format, version, saved_at, state}` where `state`
//! carries the classifier, scaler parameters, window shape and model details.
//! Floats are written with round-trip precision so a reloaded model predicts
//! exactly what the saved one did.

use crate::application::ml::model::TrainedModel;
use crate::domain::errors::{MlError, MlResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const ARTIFACT_FORMAT: &str = "rustrade-ml/model";
pub const ARTIFACT_VERSION: u32 = 1;

#[derive(Serialize)]
struct ArtifactOut<'a> {
    format: &'a str,
    version: u32,
    saved_at: DateTime<Utc>,
    state: &'a TrainedModel,
}

/// Envelope fields read before the state, so unknown formats and newer versions
/// are reported as such instead of as parse errors.
#[derive(Deserialize)]
struct ArtifactHeader {
    format: Option<String>,
    version: Option<u32>,
}

#[derive(Deserialize)]
struct ArtifactIn {
    saved_at: DateTime<Utc>,
    state: TrainedModel,
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn io_error(path: &Path, source: io::Error) -> MlError {
    MlError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn corrupt(path: &Path, reason: impl ToString) -> MlError {
    MlError::CorruptArtifact {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Serializes `state` to `path`, creating parent directories and replacing any
/// existing file.
pub fn write_artifact(state: &TrainedModel, path: &Path) -> MlResult<()> {
    let envelope = ArtifactOut {
        format: ARTIFACT_FORMAT,
        version: ARTIFACT_VERSION,
        saved_at: Utc::now(),
        state,
    };
    let content = serde_json::to_vec(&envelope).map_err(|e| io_error(path, e.into()))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
    }

    // Atomic write: write to temp file then rename
    let temp = temp_path(path);
    fs::write(&temp, &content).map_err(|e| io_error(&temp, e))?;
    if let Err(e) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(io_error(path, e));
    }

    info!("Wrote model artifact to {:?} ({} bytes)", path, content.len());
    Ok(())
}

/// Reads and validates an artifact written by `write_artifact`.
pub fn read_artifact(path: &Path) -> MlResult<TrainedModel> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(MlError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(io_error(path, e)),
    };

    let header: ArtifactHeader =
        serde_json::from_slice(&content).map_err(|e| corrupt(path, e))?;
    match header.format.as_deref() {
        Some(ARTIFACT_FORMAT) => {}
        Some(other) => return Err(corrupt(path, format!("unknown format {:?}", other))),
        None => return Err(corrupt(path, "missing format tag")),
    }
    let version = header
        .version
        .ok_or_else(|| corrupt(path, "missing version"))?;
    if version > ARTIFACT_VERSION {
        return Err(MlError::UnsupportedArtifactVersion {
            path: path.to_path_buf(),
            found: version,
            supported: ARTIFACT_VERSION,
        });
    }
    if version == 0 {
        return Err(corrupt(path, "version 0"));
    }

    let artifact: ArtifactIn = serde_json::from_slice(&content).map_err(|e| corrupt(path, e))?;
    artifact
        .state
        .check_consistency()
        .map_err(|reason| corrupt(path, reason))?;

    debug!("Artifact {:?} saved at {}", path, artifact.saved_at);
    Ok(artifact.state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rustrade-ml-{}-{}", uuid::Uuid::new_v4(), name))
    }

    #[test]
    fn test_missing_file() {
        let path = scratch("missing.json");
        assert!(matches!(
            read_artifact(&path),
            Err(MlError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let path = scratch("garbage.json");
        fs::write(&path, b"\x00\x01 definitely not a model").unwrap();
        assert!(matches!(
            read_artifact(&path),
            Err(MlError::CorruptArtifact { .. })
        ));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_foreign_json_is_corrupt() {
        let path = scratch("foreign.json");
        fs::write(&path, r#"{"format": "something-else", "version": 1}"#).unwrap();
        assert!(matches!(
            read_artifact(&path),
            Err(MlError::CorruptArtifact { .. })
        ));

        fs::write(&path, r#"[1, 2, 3]"#).unwrap();
        assert!(matches!(
            read_artifact(&path),
            Err(MlError::CorruptArtifact { .. })
        ));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_newer_version_is_unsupported() {
        let path = scratch("future.json");
        let content = format!(
            r#"{{"format": "{}", "version": {}, "saved_at": "2030-01-01T00:00:00Z", "state": {{}}}}"#,
            ARTIFACT_FORMAT,
            ARTIFACT_VERSION + 1
        );
        fs::write(&path, content).unwrap();
        assert!(matches!(
            read_artifact(&path),
            Err(MlError::UnsupportedArtifactVersion { found: 2, supported: 1, .. })
        ));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_truncated_state_is_corrupt() {
        let path = scratch("truncated.json");
        let content = format!(
            r#"{{"format": "{}", "version": 1, "saved_at": "2024-01-01T00:00:00Z", "state": {{"window_size": 3}}}}"#,
            ARTIFACT_FORMAT
        );
        fs::write(&path, content).unwrap();
        assert!(matches!(
            read_artifact(&path),
            Err(MlError::CorruptArtifact { .. })
        ));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_temp_path_keeps_extension() {
        assert_eq!(
            temp_path(Path::new("/data/ml/model.bin")),
            PathBuf::from("/data/ml/model.bin.tmp")
        );
    }
}
