//! Storage for authentication artifacts.
//!
//! Each session owns exactly one opaque artifact file (the saved
//! authentication state the network client needs to reconnect without
//! re-authenticating). Files live in a single configured directory under a
//! name derived from a stable per-session seed, so the path never has to be
//! computed from user input at action time.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Derive the artifact file name for a stable session seed (typically
    /// the label the session was registered under).
    pub fn derive_name(seed: &str) -> String {
        let digest = Sha256::digest(seed.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        format!("{}.session", &hex[..16])
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub async fn save(&self, name: &str, blob: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating sessions dir {}", self.root.display()))?;
        let path = self.path_for(name);
        tokio::fs::write(&path, blob)
            .await
            .with_context(|| format!("writing artifact {}", path.display()))?;
        Ok(path)
    }

    pub async fn exists(&self, name: &str) -> bool {
        tokio::fs::try_exists(self.path_for(name))
            .await
            .unwrap_or(false)
    }

    pub async fn load(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_for(name);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading artifact {}", path.display()))
    }

    /// Remove the artifact file. Missing files are not an error: a delete
    /// cascade must succeed even when the artifact already disappeared.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing artifact {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_names_are_stable_and_distinct() {
        let a = ArtifactStore::derive_name("+15550001");
        let b = ArtifactStore::derive_name("+15550001");
        let c = ArtifactStore::derive_name("+15550002");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.ends_with(".session"));
    }

    #[tokio::test]
    async fn save_load_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let name = ArtifactStore::derive_name("+15550001");
        store.save(&name, b"opaque-bytes").await.unwrap();
        assert!(store.exists(&name).await);
        assert_eq!(store.load(&name).await.unwrap(), b"opaque-bytes");

        store.delete(&name).await.unwrap();
        assert!(!store.exists(&name).await);
        // Deleting again is a no-op, not an error.
        store.delete(&name).await.unwrap();
    }
}
