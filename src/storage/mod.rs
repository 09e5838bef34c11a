use std::path::{Component, Path, PathBuf};

use log::{debug, info, warn};
use tokio::fs;

use crate::manifest::SENTINEL_FILE;

/// The installation directory being reconciled.
#[derive(Clone)]
pub struct StorageManager {
    dest_dir: PathBuf,
}

impl StorageManager {
    pub fn new(dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            dest_dir: dest_dir.into(),
        }
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    pub async fn ensure_dest_dir(&self) -> Result<(), String> {
        fs::create_dir_all(&self.dest_dir)
            .await
            .map_err(|e| format!("unable to create install dir {}: {e}", self.dest_dir.display()))
    }

    /// A missing sentinel means the destination has never been set up.
    pub async fn sentinel_present(&self) -> bool {
        fs::metadata(self.dest_dir.join(SENTINEL_FILE)).await.is_ok()
    }

    /// Resolve a manifest-relative name inside the destination, refusing
    /// names that would escape it.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name);
        let contained = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        (contained && !name.is_empty()).then(|| self.dest_dir.join(relative))
    }

    /// Delete files the game no longer ships. Missing files are ignored;
    /// returns how many were removed.
    pub async fn remove_obsolete(&self, names: &[String]) -> usize {
        let mut removed = 0;
        for name in names {
            let Some(path) = self.resolve(name) else {
                warn!("storage: refusing to remove {name}: outside install dir");
                continue;
            };
            match fs::remove_file(&path).await {
                Ok(()) => {
                    debug!("storage: removed obsolete {}", path.display());
                    removed += 1;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!("storage: could not delete {name}: {err}"),
            }
        }
        if removed > 0 {
            info!("storage: removed {removed} obsolete file(s)");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_only_contained_names() {
        let storage = StorageManager::new("/games/swg");
        assert_eq!(
            storage.resolve("texture/a.dds"),
            Some(PathBuf::from("/games/swg/texture/a.dds"))
        );
        assert_eq!(storage.resolve("../etc/passwd"), None);
        assert_eq!(storage.resolve("/etc/passwd"), None);
        assert_eq!(storage.resolve(""), None);
    }

    #[tokio::test]
    async fn detects_sentinel_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::new(dir.path().join("game"));
        storage.ensure_dest_dir().await.unwrap();
        assert!(!storage.sentinel_present().await);
        std::fs::write(storage.dest_dir().join(SENTINEL_FILE), b"[ClientGame]").unwrap();
        assert!(storage.sentinel_present().await);
    }

    #[tokio::test]
    async fn removes_listed_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("keep.txt");
        std::fs::write(&outside, b"x").unwrap();
        let storage = StorageManager::new(dir.path().join("game"));
        storage.ensure_dest_dir().await.unwrap();
        std::fs::write(storage.dest_dir().join("old.tre"), b"x").unwrap();

        let removed = storage
            .remove_obsolete(&[
                "old.tre".to_owned(),
                "never-there.tre".to_owned(),
                "../keep.txt".to_owned(),
            ])
            .await;
        assert_eq!(removed, 1);
        assert!(!storage.dest_dir().join("old.tre").exists());
        assert!(outside.exists());
    }
}
