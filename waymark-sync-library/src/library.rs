//! Preset library collaborator interface and its JSON-file backed store.
//!
//! The sync core only needs three operations: import (insert or update by
//! identity), identity lookup, and delete by index. `PresetStore` is not safe
//! for concurrent mutation; callers serialize writes through one gate.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LibraryError, Result};
use crate::preset::WaymarkPreset;

/// Operations the sync engine performs against the local preset library.
pub trait PresetLibrary: Send {
    /// Insert `preset` as `<name_prefix><preset.name>`, or replace the entry
    /// with the same identity. Returns the resulting index.
    fn import_preset(&mut self, preset: &WaymarkPreset, name_prefix: &str) -> Result<usize>;

    /// Index of the entry with the same content identity as `preset`.
    fn identity_index_of(&self, preset: &WaymarkPreset) -> Option<usize>;

    /// Delete the entry at `index`. Returns `false` if out of range.
    fn delete_preset(&mut self, index: usize) -> bool;

    fn len(&self) -> usize;

    fn name_at(&self, index: usize) -> Option<&str>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete every entry whose name contains `tag`. Returns how many went.
    fn delete_tagged(&mut self, tag: &str) -> usize {
        let matching: Vec<usize> = (0..self.len())
            .filter(|&i| self.name_at(i).is_some_and(|name| name.contains(tag)))
            .collect();
        // Highest index first so earlier indices stay valid
        matching
            .into_iter()
            .rev()
            .filter(|&i| self.delete_preset(i))
            .count()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LibraryDocument {
    #[serde(default)]
    presets: Vec<WaymarkPreset>,
}

/// Ordered preset collection, optionally persisted to a JSON file after
/// every mutation.
#[derive(Debug, Default)]
pub struct PresetStore {
    presets: Vec<WaymarkPreset>,
    path: Option<PathBuf>,
}

impl PresetStore {
    /// An empty store that never touches disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open the library at `path`, starting empty if the file is absent.
    pub fn open(path: &Path) -> Result<Self> {
        let presets = if path.exists() {
            let contents = fs::read_to_string(path).map_err(|source| LibraryError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let doc: LibraryDocument =
                serde_json::from_str(&contents).map_err(|source| LibraryError::Corrupt {
                    path: path.to_path_buf(),
                    source,
                })?;
            doc.presets
        } else {
            Vec::new()
        };
        log::info!("Opened preset library {:?} ({} presets)", path, presets.len());
        Ok(Self {
            presets,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn presets(&self) -> &[WaymarkPreset] {
        &self.presets
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source| LibraryError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let doc = LibraryDocument {
            presets: self.presets.clone(),
        };
        let json = serde_json::to_string_pretty(&doc).map_err(LibraryError::Decode)?;

        // Atomic save: write to temp file then rename to prevent corruption on crash
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json).map_err(io_err)?;
        fs::rename(&temp_path, path).map_err(io_err)?;
        Ok(())
    }
}

impl PresetLibrary for PresetStore {
    fn import_preset(&mut self, preset: &WaymarkPreset, name_prefix: &str) -> Result<usize> {
        if preset.is_empty() {
            return Err(LibraryError::Invalid {
                name: preset.name.clone(),
                reason: "no waymark is placed".to_string(),
            });
        }

        let mut entry = preset.clone();
        entry.name = format!("{name_prefix}{}", preset.name);

        let index = match self.identity_index_of(preset) {
            Some(index) => {
                self.presets[index] = entry;
                index
            }
            None => {
                self.presets.push(entry);
                self.presets.len() - 1
            }
        };
        self.persist()?;
        Ok(index)
    }

    fn identity_index_of(&self, preset: &WaymarkPreset) -> Option<usize> {
        let identity = preset.identity();
        self.presets.iter().position(|p| p.identity() == identity)
    }

    fn delete_preset(&mut self, index: usize) -> bool {
        if index >= self.presets.len() {
            return false;
        }
        let removed = self.presets.remove(index);
        if let Err(e) = self.persist() {
            log::error!("Failed to persist library after deleting '{}': {}", removed.name, e);
        }
        true
    }

    fn len(&self) -> usize {
        self.presets.len()
    }

    fn name_at(&self, index: usize) -> Option<&str> {
        self.presets.get(index).map(|p| p.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::Waymark;

    fn preset(name: &str, map_id: u16, x: f32) -> WaymarkPreset {
        let mark = Waymark {
            x,
            y: 0.0,
            z: 100.0,
            id: 0,
            active: true,
        };
        WaymarkPreset {
            name: name.to_string(),
            map_id,
            a: mark,
            ..WaymarkPreset::default()
        }
    }

    #[test]
    fn test_import_inserts_with_prefix() {
        let mut store = PresetStore::in_memory();
        let index = store.import_preset(&preset("A", 1, 10.0), "[Pack]").unwrap();
        assert_eq!(index, 0);
        assert_eq!(store.name_at(0), Some("[Pack]A"));
    }

    #[test]
    fn test_import_replaces_same_identity() {
        let mut store = PresetStore::in_memory();
        store.import_preset(&preset("Other", 2, 5.0), "").unwrap();
        store.import_preset(&preset("A", 1, 10.0), "[Pack]").unwrap();

        let index = store.import_preset(&preset("A v2", 1, 10.0), "[Pack]").unwrap();
        assert_eq!(index, 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.name_at(1), Some("[Pack]A v2"));
    }

    #[test]
    fn test_import_rejects_empty_preset() {
        let mut store = PresetStore::in_memory();
        let empty = WaymarkPreset {
            name: "nothing".to_string(),
            ..WaymarkPreset::default()
        };
        let err = store.import_preset(&empty, "[Pack]").unwrap_err();
        assert!(matches!(err, LibraryError::Invalid { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_identity_lookup_not_found() {
        let store = PresetStore::in_memory();
        assert_eq!(store.identity_index_of(&preset("A", 1, 10.0)), None);
    }

    #[test]
    fn test_delete_out_of_range() {
        let mut store = PresetStore::in_memory();
        assert!(!store.delete_preset(0));
    }

    #[test]
    fn test_delete_tagged_only_removes_matching() {
        let mut store = PresetStore::in_memory();
        store.import_preset(&preset("A", 1, 1.0), "[Pack]").unwrap();
        store.import_preset(&preset("Mine", 1, 2.0), "").unwrap();
        store.import_preset(&preset("B", 1, 3.0), "[Pack]").unwrap();
        store.import_preset(&preset("C", 1, 4.0), "[Other]").unwrap();

        assert_eq!(store.delete_tagged("[Pack]"), 2);
        let names: Vec<&str> = (0..store.len()).filter_map(|i| store.name_at(i)).collect();
        assert_eq!(names, vec!["Mine", "[Other]C"]);
    }

    #[test]
    fn test_persisted_library_reopens() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("presets.json");

        let mut store = PresetStore::open(&path).unwrap();
        store.import_preset(&preset("A", 1, 1.0), "[Pack]").unwrap();
        store.import_preset(&preset("B", 1, 2.0), "[Pack]").unwrap();
        assert!(store.delete_preset(0));

        let reopened = PresetStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.name_at(0), Some("[Pack]B"));
    }

    #[test]
    fn test_open_corrupt_library() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("presets.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            PresetStore::open(&path).unwrap_err(),
            LibraryError::Corrupt { .. }
        ));
    }
}
