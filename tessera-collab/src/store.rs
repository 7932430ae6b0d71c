//! Maps served by the hub.

use std::collections::BTreeMap;
use std::path::Path;

use tessera_core::{read_map_file, TileMap};

use crate::server::ServerConfig;

/// One project holding named maps.
///
/// The hub only reads from the store; relayed edits are never applied to
/// these maps.
#[derive(Debug, Clone)]
pub struct MapStore {
    project: String,
    maps: BTreeMap<String, TileMap>,
}

impl MapStore {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            maps: BTreeMap::new(),
        }
    }

    /// Read every map listed in the configuration. Maps that fail to load
    /// are logged and skipped.
    pub fn load(config: &ServerConfig) -> Self {
        let mut store = Self::new(config.project_name.clone());
        for path in &config.maps {
            let Some(name) = map_name(path) else {
                log::warn!("Ignoring map path without a file name: {}", path.display());
                continue;
            };
            match read_map_file(path) {
                Ok(map) => {
                    log::info!("Loaded map {name} from {}", path.display());
                    store.insert(name, map);
                }
                Err(e) => log::warn!("Map not loaded: {}: {e}", path.display()),
            }
        }
        store
    }

    /// Add or replace a map.
    pub fn insert(&mut self, name: impl Into<String>, map: TileMap) {
        self.maps.insert(name.into(), map);
    }

    pub fn get(&self, name: &str) -> Option<&TileMap> {
        self.maps.get(name)
    }

    pub fn project_name(&self) -> &str {
        &self.project
    }

    pub fn project_names(&self) -> Vec<String> {
        vec![self.project.clone()]
    }

    pub fn has_project(&self, name: &str) -> bool {
        self.project == name
    }

    /// Map names in sorted order.
    pub fn map_names(&self) -> Vec<String> {
        self.maps.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }
}

/// A map is named after its file stem: `maps/level1.json` is `level1`.
fn map_name(path: &Path) -> Option<String> {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
}
