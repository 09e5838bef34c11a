use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::Client;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::manifest::{self, ManifestEntry};

const MANIFEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("awakening-patcher/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct NetworkClient {
    client: Client,
}

impl NetworkClient {
    /// Downloads carry no overall timeout: a stalled transfer blocks its
    /// worker until the session is cancelled.
    pub fn new() -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|err| {
                warn!("network client: falling back to default HTTP client configuration ({err})");
                Client::new()
            });
        Self { client }
    }

    #[cfg(test)]
    pub fn direct() -> Self {
        let client = Client::builder()
            .no_proxy()
            .build()
            .expect("test http client");
        Self { client }
    }

    /// Fetch the authoritative `{ required: [...] }` list.
    pub async fn fetch_manifest(&self, url: &str) -> Result<Vec<ManifestEntry>, String> {
        debug!("network: fetching manifest {url}");
        let text = self
            .client
            .get(url)
            .timeout(MANIFEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| format!("manifest request failed: {e}"))?
            .error_for_status()
            .map_err(|e| format!("manifest request bad status: {e}"))?
            .text()
            .await
            .map_err(|e| format!("manifest body error: {e}"))?;
        manifest::parse_document(&text)
    }

    /// Stream `url` into `dest`, replacing whatever is there, and call
    /// `on_chunk` with the length of every chunk written. Any failure after
    /// the file is created removes the partial file.
    pub async fn download_to_path<F>(
        &self,
        url: &str,
        dest: &Path,
        mut on_chunk: F,
    ) -> Result<u64, String>
    where
        F: FnMut(u64),
    {
        match fs::remove_file(dest).await {
            Ok(()) => debug!("network: removed stale {}", dest.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(format!("failed to remove old file: {err}")),
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("failed to create download dir: {e}"))?;
        }
        let mut file = File::create(dest)
            .await
            .map_err(|e| format!("failed to create file: {e}"))?;

        let result = self.stream_into(url, &mut file, &mut on_chunk).await;
        drop(file);
        if result.is_err() {
            discard_partial(dest).await;
        }
        result
    }

    async fn stream_into<F>(
        &self,
        url: &str,
        file: &mut File,
        on_chunk: &mut F,
    ) -> Result<u64, String>
    where
        F: FnMut(u64),
    {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("download request failed: {e}"))?
            .error_for_status()
            .map_err(|e| format!("download status error: {e}"))?;

        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| format!("stream error: {e}"))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| format!("write error: {e}"))?;
            downloaded += chunk.len() as u64;
            on_chunk(chunk.len() as u64);
        }

        file.flush()
            .await
            .map_err(|e| format!("flush error: {e}"))?;
        Ok(downloaded)
    }
}

async fn discard_partial(dest: &Path) {
    if let Err(err) = fs::remove_file(dest).await
        && err.kind() != std::io::ErrorKind::NotFound
    {
        warn!("network: could not remove partial {}: {err}", dest.display());
    }
}
