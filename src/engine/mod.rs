use std::path::Path;

use log::{info, warn};

use crate::manifest::{self, DEFAULT_BOOTSTRAP_URL, Manifest, ManifestEntry};
use crate::networking::NetworkClient;
use crate::storage::StorageManager;

pub mod decision;
pub mod models;
pub mod session;
pub mod transfer;
pub mod worker;

pub use models::{SessionOutcome, SessionProgress, SessionState};
pub use session::{SessionHandle, SessionOptions, start_session};

#[derive(Clone, Debug)]
pub struct PatcherConfig {
    /// Location of the authoritative `{ required: [...] }` document.
    pub manifest_url: String,
    pub bootstrap_url: String,
    /// Locally known files, overridden by the remote list on name clashes.
    pub baseline: Vec<ManifestEntry>,
    pub pool_size: usize,
    /// Files deleted from the destination before reconciling.
    pub obsolete_files: Vec<String>,
}

impl PatcherConfig {
    pub fn new(manifest_url: impl Into<String>) -> Self {
        Self {
            manifest_url: manifest_url.into(),
            bootstrap_url: DEFAULT_BOOTSTRAP_URL.into(),
            baseline: manifest::embedded_defaults(),
            pool_size: 1,
            obsolete_files: Vec::new(),
        }
    }
}

pub struct PatchEngine {
    config: PatcherConfig,
    network: NetworkClient,
}

impl PatchEngine {
    pub fn new(config: PatcherConfig, network: NetworkClient) -> Self {
        Self { config, network }
    }

    /// Merge the baseline (plus bootstrap files when needed) with the remote
    /// list. A failed fetch means no session can start.
    pub async fn build_manifest(
        &self,
        storage: &StorageManager,
        full_scan: bool,
    ) -> Result<Manifest, String> {
        let sentinel_present = storage.sentinel_present().await;
        let local = manifest::baseline(
            self.config.baseline.clone(),
            full_scan,
            sentinel_present,
            &self.config.bootstrap_url,
        );
        let remote = self
            .network
            .fetch_manifest(&self.config.manifest_url)
            .await
            .map_err(|e| format!("unable to fetch manifest: {e}"))?;
        info!(
            "manifest: {} local entries, {} remote entries",
            local.len(),
            remote.len()
        );
        let merged = manifest::merge(local, remote);
        let (safe, unsafe_names): (Vec<_>, Vec<_>) = merged
            .into_entries()
            .into_iter()
            .partition(|entry| storage.resolve(&entry.name).is_some());
        for entry in &unsafe_names {
            warn!("manifest: ignoring entry outside install dir: {}", entry.name);
        }
        Ok(Manifest::from_entries(safe))
    }

    /// Full reconciliation pass: optional cleanup, manifest construction,
    /// then a session over `dest_dir`.
    pub async fn install(
        &self,
        source_dir: &Path,
        dest_dir: &Path,
        full_scan: bool,
    ) -> Result<SessionHandle, String> {
        let storage = StorageManager::new(dest_dir);
        storage.ensure_dest_dir().await?;
        if !self.config.obsolete_files.is_empty() {
            storage.remove_obsolete(&self.config.obsolete_files).await;
        }
        let manifest = self.build_manifest(&storage, full_scan).await?;
        if manifest.is_empty() {
            warn!("install: manifest lists no files");
        }
        info!(
            "install: {} files from {} into {}",
            manifest.len(),
            source_dir.display(),
            dest_dir.display()
        );
        let options = SessionOptions {
            source_dir: source_dir.to_path_buf(),
            dest_dir: storage.dest_dir().to_path_buf(),
            full_scan,
            pool_size: self.config.pool_size,
        };
        Ok(start_session(manifest, options, self.network.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::SENTINEL_FILE;
    use crate::test_support::{Route, TestServer};

    fn config(server: &TestServer) -> PatcherConfig {
        let mut config = PatcherConfig::new(server.url("/required.json"));
        config.bootstrap_url = server.url("/launcher");
        config.baseline = Vec::new();
        config
    }

    #[tokio::test]
    async fn first_install_includes_bootstrap_files() {
        let server = TestServer::start(vec![(
            "/required.json",
            Route::body(
                r#"{"required":[{"name":"login.cfg","size":4,"md5":0,"url":"http://h/login.cfg"}]}"#,
            ),
        )])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::new(dir.path());
        let engine = PatchEngine::new(config(&server), NetworkClient::direct());

        let manifest = engine.build_manifest(&storage, false).await.unwrap();
        assert_eq!(manifest.len(), 9);
        let login = manifest
            .entries()
            .iter()
            .find(|e| e.name == "login.cfg")
            .unwrap();
        assert_eq!(login.url, "http://h/login.cfg");
        assert_eq!(manifest.entries().last().unwrap().name, "login.cfg");

        std::fs::write(dir.path().join(SENTINEL_FILE), b"x").unwrap();
        let manifest = engine.build_manifest(&storage, false).await.unwrap();
        assert_eq!(manifest.len(), 1);
    }

    #[tokio::test]
    async fn drops_entries_escaping_the_install_dir() {
        let server = TestServer::start(vec![(
            "/required.json",
            Route::body(r#"{"required":[{"name":"../evil.dll","size":1,"url":"http://h/e"}]}"#),
        )])
        .await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SENTINEL_FILE), b"x").unwrap();
        let engine = PatchEngine::new(config(&server), NetworkClient::direct());
        let manifest = engine
            .build_manifest(&StorageManager::new(dir.path()), false)
            .await
            .unwrap();
        assert!(manifest.is_empty());
    }

    #[tokio::test]
    async fn manifest_failure_prevents_session_start() {
        let server = TestServer::start(Vec::new()).await;
        let dir = tempfile::tempdir().unwrap();
        let engine = PatchEngine::new(config(&server), NetworkClient::direct());
        let result = engine.install(dir.path(), &dir.path().join("game"), false).await;
        let Err(err) = result else {
            panic!("install should fail without a manifest");
        };
        assert!(err.contains("unable to fetch manifest"), "{err}");
    }

    #[tokio::test]
    async fn install_cleans_up_then_reconciles() {
        let server = TestServer::start(vec![
            (
                "/required.json",
                Route::body(r#"{"required":[{"name":"a.txt","size":5,"md5":"5d41402abc4b2a76b9719d911017c592","url":"unused"}]}"#),
            ),
            ("/launcher/live/game_files/live.cfg", Route::body("live")),
            ("/launcher/initial_install/login.cfg", Route::body("login")),
        ])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let game = dir.path().join("game");
        std::fs::create_dir_all(&game).unwrap();
        std::fs::write(game.join("a.txt"), b"hello").unwrap();
        std::fs::write(game.join("stale.tre"), b"old").unwrap();
        std::fs::write(game.join(SENTINEL_FILE), b"x").unwrap();

        let mut config = config(&server);
        config.obsolete_files = vec!["stale.tre".into()];
        let engine = PatchEngine::new(config, NetworkClient::direct());
        let outcome = engine
            .install(&game, &game, true)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(outcome.state, SessionState::Completed);
        assert_eq!(outcome.completed_bytes, 5);
        assert!(!game.join("stale.tre").exists());
        assert_eq!(std::fs::read(game.join("live.cfg")).unwrap(), b"live");
    }
}
