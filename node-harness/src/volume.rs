//! Node home directory files
//!
//! Each node's home directory lives on the host side of the bind mount, so
//! reading and writing `config/genesis.json`, gentx documents and uploaded
//! contract files is plain file I/O under `<host root>/<volume>/`.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{HarnessError, Result};

#[async_trait]
pub trait VolumeStore: Send + Sync {
    /// Read `rel_path` relative to the home directory of `volume`
    async fn read_file(&self, volume: &str, rel_path: &str) -> Result<Vec<u8>>;

    /// Write `content` to `rel_path`, creating parent directories
    async fn write_file(&self, volume: &str, rel_path: &str, content: &[u8]) -> Result<()>;

    /// Merge `patch` into the TOML file at `rel_path`.
    ///
    /// Nested tables merge key by key; any other value replaces what was there.
    async fn modify_toml(&self, volume: &str, rel_path: &str, patch: &toml::Table) -> Result<()> {
        let raw = self.read_file(volume, rel_path).await?;
        let text = String::from_utf8(raw)
            .map_err(|e| HarnessError::Decode(format!("{} is not UTF-8: {}", rel_path, e)))?;
        let mut doc: toml::Table = text
            .parse()
            .map_err(|e| HarnessError::Decode(format!("parsing {}: {}", rel_path, e)))?;

        merge_toml(&mut doc, patch);

        let rendered = toml::to_string(&doc)
            .map_err(|e| HarnessError::Decode(format!("rendering {}: {}", rel_path, e)))?;
        self.write_file(volume, rel_path, rendered.as_bytes()).await
    }
}

/// Recursively merge `patch` into `doc`
pub fn merge_toml(doc: &mut toml::Table, patch: &toml::Table) {
    for (key, value) in patch {
        match (doc.get_mut(key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(update)) => {
                merge_toml(existing, update);
            }
            _ => {
                doc.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Volume store backed by the host directory that is bind-mounted into every
/// node container
#[derive(Debug, Clone)]
pub struct HostVolumeStore {
    root: PathBuf,
}

impl HostVolumeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, volume: &str, rel_path: &str) -> Result<PathBuf> {
        let rel = Path::new(rel_path);
        let escapes = Path::new(volume)
            .components()
            .chain(rel.components())
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(HarnessError::Config(format!(
                "path {}/{} escapes the volume root",
                volume, rel_path
            )));
        }
        Ok(self.root.join(volume).join(rel))
    }
}

#[async_trait]
impl VolumeStore for HostVolumeStore {
    async fn read_file(&self, volume: &str, rel_path: &str) -> Result<Vec<u8>> {
        let path = self.resolve(volume, rel_path)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                HarnessError::NotFound(format!("failed to read file at {}", path.display()))
            }
            _ => HarnessError::Transport(format!(
                "failed to read file at {}: {}",
                path.display(),
                e
            )),
        })
    }

    async fn write_file(&self, volume: &str, rel_path: &str, content: &[u8]) -> Result<()> {
        let path = self.resolve(volume, rel_path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        debug!("Wrote {} bytes to {}", content.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_then_read_creates_parents() {
        let dir = TempDir::new().unwrap();
        let store = HostVolumeStore::new(dir.path());

        store
            .write_file("gaia-1-val-0", "config/gentx/gentx-abc.json", b"{}")
            .await
            .unwrap();
        let content = store
            .read_file("gaia-1-val-0", "config/gentx/gentx-abc.json")
            .await
            .unwrap();
        assert_eq!(content, b"{}");
        assert!(dir.path().join("gaia-1-val-0/config/gentx").is_dir());
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = HostVolumeStore::new(dir.path());

        let err = store.read_file("node", "config/genesis.json").await.unwrap_err();
        assert!(matches!(err, HarnessError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_parent_dir_rejected() {
        let dir = TempDir::new().unwrap();
        let store = HostVolumeStore::new(dir.path());

        let err = store.write_file("node", "../escape.txt", b"x").await.unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[tokio::test]
    async fn test_modify_toml_merges_nested_tables() {
        let dir = TempDir::new().unwrap();
        let store = HostVolumeStore::new(dir.path());

        let original = r#"
log_level = "debug"

[p2p]
laddr = "tcp://0.0.0.0:26656"
persistent_peers = ""
"#;
        store
            .write_file("node", "config/config.toml", original.as_bytes())
            .await
            .unwrap();

        let patch: toml::Table = r#"
log_level = "info"

[p2p]
persistent_peers = "abc@host:26656"
"#
        .parse()
        .unwrap();
        store.modify_toml("node", "config/config.toml", &patch).await.unwrap();

        let raw = store.read_file("node", "config/config.toml").await.unwrap();
        let doc: toml::Table = String::from_utf8(raw).unwrap().parse().unwrap();
        assert_eq!(doc["log_level"].as_str(), Some("info"));
        assert_eq!(doc["p2p"]["persistent_peers"].as_str(), Some("abc@host:26656"));
        // Untouched keys survive
        assert_eq!(doc["p2p"]["laddr"].as_str(), Some("tcp://0.0.0.0:26656"));
    }
}
