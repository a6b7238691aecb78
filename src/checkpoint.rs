//! Named snapshots of cell model parameters.
//!
//! Each checkpoint is one pretty-printed JSON file `<name>.json` in the store
//! directory.

use crate::error::{Result, SimError};
use crate::plant::CellParameters;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const EXTENSION: &str = "json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub name: String,
    #[serde(default)]
    pub notes: String,
    pub parameters: CellParameters,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save(&self, name: &str, parameters: &CellParameters, notes: &str) -> Result<PathBuf> {
        let path = self.path_for(name)?;
        parameters.validate()?;

        let checkpoint = Checkpoint {
            name: name.to_string(),
            notes: notes.to_string(),
            parameters: parameters.clone(),
        };
        fs::write(&path, serde_json::to_string_pretty(&checkpoint)?)?;

        info!(name, path = %path.display(), "checkpoint saved");
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<Checkpoint> {
        Self::load_file(self.path_for(name)?)
    }

    /// Read a checkpoint file from an arbitrary path.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Checkpoint> {
        let text = fs::read_to_string(path.as_ref())?;
        let checkpoint: Checkpoint = serde_json::from_str(&text)?;
        checkpoint.parameters.validate()?;
        Ok(checkpoint)
    }

    /// Names of all checkpoints in the store, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !name.starts_with('.');
        if !valid {
            return Err(SimError::invalid(format!("invalid checkpoint name: {:?}", name)));
        }
        Ok(self.dir.join(format!("{}.{}", name, EXTENSION)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_then_load_restores_parameters() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::open(tmp.path()).unwrap();

        let params = CellParameters {
            r1_ohm: 1.2e-3,
            c2_farad: 12_000.0,
            ..CellParameters::default()
        };
        let path = store.save("fitted_1", &params, "after pulse fit").unwrap();
        assert!(path.ends_with("fitted_1.json"));

        let loaded = store.load("fitted_1").unwrap();
        assert_eq!(loaded.parameters, params);
        assert_eq!(loaded.notes, "after pulse fit");
    }

    #[test]
    fn test_list_is_sorted_and_ignores_other_files() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::open(tmp.path().join("nested")).unwrap();
        let params = CellParameters::default();
        store.save("b", &params, "").unwrap();
        store.save("a", &params, "").unwrap();
        fs::write(store.dir().join("README.txt"), "not a checkpoint").unwrap();

        assert_eq!(store.list().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_missing_checkpoint_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::open(tmp.path()).unwrap();
        assert!(matches!(store.load("nope"), Err(SimError::Io(_))));
    }

    #[test]
    fn test_path_like_names_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::open(tmp.path()).unwrap();
        let params = CellParameters::default();
        assert!(matches!(
            store.save("../escape", &params, ""),
            Err(SimError::InvalidArgument(_))
        ));
        assert!(store.save("", &params, "").is_err());
    }
}
