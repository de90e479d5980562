//! Narrow interfaces to the hosting runtime
//!
//! Settings files are named blobs stored per domain; assets are JSON
//! documents addressed by path. Both are traits so the engine runs against a
//! directory on disk, an in-memory map, or a real game host.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// Who owns authoritative setting values in the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionRole {
    /// Single player, everything is local
    #[default]
    Standalone,
    /// Authoritative host of a multiplayer session
    Server,
    /// Non-authoritative peer; only client-side settings are local
    Client,
}

/// Read/write a named blob
pub trait FileStore {
    /// `Ok(None)` when the file does not exist
    fn read(&self, name: &str) -> Result<Option<String>>;
    fn write(&self, name: &str, contents: &str) -> Result<()>;
}

/// Settings files under one directory
#[derive(Debug, Clone)]
pub struct DirFileStore {
    root: PathBuf,
}

impl DirFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl FileStore for DirFileStore {
    fn read(&self, name: &str) -> Result<Option<String>> {
        let path = self.path_of(name);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)
            .context(format!("Failed to read settings file at {}", path.display()))?;
        Ok(Some(contents))
    }

    fn write(&self, name: &str, contents: &str) -> Result<()> {
        let path = self.path_of(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create settings directory: {}", parent.display()))?;
        }
        fs::write(&path, contents).context(format!("Failed to write settings file to {}", path.display()))?;
        debug!(path = %path.display(), bytes = contents.len(), "Wrote settings file");
        Ok(())
    }
}

/// JSON asset access
pub trait AssetStore {
    /// `Ok(None)` when no asset exists at `path`
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;
    fn set(&mut self, path: &str, bytes: Vec<u8>) -> Result<()>;
    /// Assets only a server can see; clients skip patching them
    fn server_only(&self, path: &str) -> bool;
}

/// Assets stored as files under a directory; asset path = relative file path
#[derive(Debug, Clone)]
pub struct DirAssetStore {
    root: PathBuf,
    server_only: HashSet<String>,
}

impl DirAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            server_only: HashSet::new(),
        }
    }

    /// Mark an asset as only present on servers
    pub fn with_server_only(mut self, paths: impl IntoIterator<Item = String>) -> Self {
        self.server_only.extend(paths);
        self
    }
}

impl AssetStore for DirAssetStore {
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let full = self.root.join(path);
        if !full.is_file() {
            return Ok(None);
        }
        let bytes = fs::read(&full).context(format!("Failed to read asset {}", full.display()))?;
        Ok(Some(bytes))
    }

    fn set(&mut self, path: &str, bytes: Vec<u8>) -> Result<()> {
        let full = self.root.join(path);
        fs::write(&full, bytes).context(format!("Failed to write asset {}", full.display()))
    }

    fn server_only(&self, path: &str) -> bool {
        self.server_only.contains(path)
    }
}

/// In-memory assets
#[derive(Debug, Clone, Default)]
pub struct MemoryAssetStore {
    assets: BTreeMap<String, Vec<u8>>,
    server_only: HashSet<String>,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, bytes: impl Into<Vec<u8>>) {
        self.assets.insert(path.to_string(), bytes.into());
    }

    pub fn mark_server_only(&mut self, path: &str) {
        self.server_only.insert(path.to_string());
    }

    /// Parsed JSON of an asset, if present and valid
    pub fn json(&self, path: &str) -> Option<serde_json::Value> {
        self.assets.get(path).and_then(|bytes| serde_json::from_slice(bytes).ok())
    }
}

impl AssetStore for MemoryAssetStore {
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.assets.get(path).cloned())
    }

    fn set(&mut self, path: &str, bytes: Vec<u8>) -> Result<()> {
        self.assets.insert(path.to_string(), bytes);
        Ok(())
    }

    fn server_only(&self, path: &str) -> bool {
        self.server_only.contains(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_dir_file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = DirFileStore::new(dir.path().join("nested"));

        assert_eq!(store.read("mod.yaml").unwrap(), None);
        store.write("mod.yaml", "version: 1\n").unwrap();
        assert_eq!(store.read("mod.yaml").unwrap().as_deref(), Some("version: 1\n"));
    }

    #[test]
    fn test_dir_asset_store() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("unit.json"), br#"{"hp": 1}"#).unwrap();
        let mut store = DirAssetStore::new(dir.path()).with_server_only(vec!["loot.json".to_string()]);

        assert_eq!(store.get("unit.json").unwrap().unwrap(), br#"{"hp": 1}"#.to_vec());
        assert_eq!(store.get("missing.json").unwrap(), None);
        store.set("unit.json", b"{}".to_vec()).unwrap();
        assert_eq!(fs::read(dir.path().join("unit.json")).unwrap(), b"{}");
        assert!(store.server_only("loot.json"));
        assert!(!store.server_only("unit.json"));
    }

    #[test]
    fn test_memory_asset_store() {
        let mut store = MemoryAssetStore::new();
        store.insert("a.json", r#"{"x": 1}"#);
        assert_eq!(store.json("a.json"), Some(serde_json::json!({"x": 1})));
        store.set("a.json", b"not json".to_vec()).unwrap();
        assert_eq!(store.json("a.json"), None);
    }
}
