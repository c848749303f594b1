//! Model persistence.

use std::fs;
use std::path::{Path, PathBuf};

use skylink_common::model::Model;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("model file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("model file {path} is not valid TOML: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("model could not be serialized: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub trait ModelStore {
    fn load(&mut self) -> Result<Model, StoreError>;
    fn save(&mut self, model: &Model) -> Result<(), StoreError>;
}

/// Stores the model as a TOML document. Writes go through a sibling temp
/// file and a rename.
#[derive(Debug, Clone)]
pub struct TomlModelStore {
    path: PathBuf,
}

impl TomlModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl ModelStore for TomlModelStore {
    fn load(&mut self) -> Result<Model, StoreError> {
        let text = fs::read_to_string(&self.path).map_err(|e| self.io_err(e))?;
        toml::from_str(&text).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&mut self, model: &Model) -> Result<(), StoreError> {
        let text = toml::to_string(model)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, text).map_err(|e| self.io_err(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))
    }
}

/// In-memory store that keeps the last saved model and counts saves.
#[derive(Debug, Default, Clone)]
pub struct MemoryModelStore {
    pub initial: Model,
    pub saved: Option<Model>,
    pub saves: usize,
}

impl MemoryModelStore {
    pub fn new(initial: Model) -> Self {
        Self {
            initial,
            saved: None,
            saves: 0,
        }
    }
}

impl ModelStore for MemoryModelStore {
    fn load(&mut self) -> Result<Model, StoreError> {
        Ok(self.saved.clone().unwrap_or_else(|| self.initial.clone()))
    }

    fn save(&mut self, model: &Model) -> Result<(), StoreError> {
        self.saved = Some(model.clone());
        self.saves += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skylink_common::band::{Band, BandSet};
    use skylink_common::model::{InterfaceParams, RadioKind, RadioLinkParams};

    fn sample_model() -> Model {
        let mut model = Model {
            vehicle_id: 0x1234,
            ..Model::default()
        };
        let bands = BandSet::new(&[Band::B24, Band::B58]);
        let mut wlan = InterfaceParams::new(RadioKind::Wifi, "wlan0", bands);
        wlan.assigned_link = Some(0);
        model.radio_interfaces.push(wlan);
        model.radio_links.push(RadioLinkParams::new(2_472_000));
        model
    }

    #[test]
    fn toml_store_roundtrip() {
        let dir = std::env::temp_dir().join(format!("skylink-store-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let mut store = TomlModelStore::new(dir.join("model.toml"));

        let model = sample_model();
        store.save(&model).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, model);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_file_is_io_error() {
        let mut store = TomlModelStore::new("/nonexistent/skylink/model.toml");
        assert!(matches!(store.load(), Err(StoreError::Io { .. })));
    }

    #[test]
    fn memory_store_counts_saves() {
        let mut store = MemoryModelStore::new(sample_model());
        assert_eq!(store.load().unwrap().vehicle_id, 0x1234);
        let mut m = sample_model();
        m.vehicle_id = 9;
        store.save(&m).unwrap();
        store.save(&m).unwrap();
        assert_eq!(store.saves, 2);
        assert_eq!(store.load().unwrap().vehicle_id, 9);
    }
}
