use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::definition::{Kind, TextureBindings};

/// A user-created visualizer as it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredVisualizer {
    #[serde(rename = "type")]
    pub kind: Kind,
    pub name: String,
    pub source: String,
    #[serde(default)]
    pub textures: TextureBindings,
}

/// Flat snapshot of everything the user changed: overrides of builtin
/// sources and textures plus user-created definitions, all keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub gl_customs: BTreeMap<String, String>,
    #[serde(default)]
    pub gl_custom_textures: BTreeMap<String, TextureBindings>,
    #[serde(default)]
    pub v2d_customs: BTreeMap<String, String>,
    #[serde(default)]
    pub user_visualizers: BTreeMap<String, StoredVisualizer>,
}

impl Document {
    pub fn is_empty(&self) -> bool {
        self.gl_customs.is_empty()
            && self.gl_custom_textures.is_empty()
            && self.v2d_customs.is_empty()
            && self.user_visualizers.is_empty()
    }
}

/// Where the document lives between runs.
pub trait DocumentStore {
    /// `None` when nothing has been saved yet.
    fn load(&self) -> Result<Option<Document>>;

    fn save(&self, document: &Document) -> Result<()>;
}

/// Pretty-printed JSON file on disk.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DocumentStore for JsonFileStore {
    fn load(&self) -> Result<Option<Document>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };
        let document = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        Ok(Some(document))
    }

    fn save(&self, document: &Document) -> Result<()> {
        let text = serde_json::to_string_pretty(document)?;
        fs::write(&self.path, text)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        info!("Saved visualizers to {}", self.path.display());
        Ok(())
    }
}

/// In-process store, for tests and one-shot headless runs.
#[derive(Default)]
pub struct MemoryStore {
    document: RefCell<Option<Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(document: Document) -> Self {
        Self {
            document: RefCell::new(Some(document)),
        }
    }
}

impl DocumentStore for MemoryStore {
    fn load(&self) -> Result<Option<Document>> {
        Ok(self.document.borrow().clone())
    }

    fn save(&self, document: &Document) -> Result<()> {
        *self.document.borrow_mut() = Some(document.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_default_to_empty() {
        let document: Document = serde_json::from_str(r#"{ "gl_customs": { "acid": "x" } }"#).unwrap();
        assert_eq!(document.gl_customs["acid"], "x");
        assert!(document.user_visualizers.is_empty());
    }

    #[test]
    fn user_entries_keep_their_type_tag() {
        let json = r#"{
            "user_visualizers": {
                "user_1": { "type": "gl", "name": "Mine", "source": "s", "textures": ["a.png", "", "", ""] }
            }
        }"#;
        let document: Document = serde_json::from_str(json).unwrap();
        let entry = &document.user_visualizers["user_1"];
        assert_eq!(entry.kind, Kind::Gpu);
        assert_eq!(entry.textures.slot(0), Some("a.png"));
    }

    #[test]
    fn file_store_round_trips() {
        let path = std::env::temp_dir().join(format!("particle9_store_{}.json", std::process::id()));
        let store = JsonFileStore::new(&path);
        let _ = fs::remove_file(&path);
        assert!(store.load().unwrap().is_none());

        let mut document = Document::default();
        document.v2d_customs.insert("retro".into(), "use vortex".into());
        store.save(&document).unwrap();
        assert_eq!(store.load().unwrap(), Some(document));
        fs::remove_file(&path).unwrap();
    }
}
