use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use log::debug;
use md5::Md5;
use sha2::digest::Output;
use sha2::{Digest, Sha256};
use tokio::fs as async_fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use zip::read::ZipArchive;

use crate::engine::models::{Action, TransferUnit};
use crate::engine::worker::EventReporter;
use crate::manifest::DigestKind;
use crate::networking::NetworkClient;

const COPY_CHUNK: usize = 64 * 1024;
const HASH_CHUNK: usize = 8192;

/// Carry out the unit's decided action. Progress is credited through
/// `reporter` as bytes move; the closing true-up is left to the caller.
/// Extraction runs off the async runtime and stops at the next buffer once
/// `cancel` fires.
pub async fn execute(
    unit: &mut TransferUnit,
    dest_dir: &Path,
    network: &NetworkClient,
    reporter: &EventReporter,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let action = unit.action;
    match action {
        Action::Skip => Ok(()),
        Action::Copy => {
            if unit.src == unit.dst {
                return Ok(());
            }
            copy_file(unit, reporter).await?;
            if unit.entry.is_archive() {
                extract_archive(unit, dest_dir, reporter, cancel).await?;
            }
            Ok(())
        }
        Action::Download { extract } => {
            let url = unit.entry.url.clone();
            let dst = unit.dst.clone();
            reporter.diagnostic(format!("downloading {url} to {}", dst.display()));
            let received = network
                .download_to_path(&url, &dst, |bytes| reporter.progress(unit, bytes))
                .await?;
            debug!("transfer: received {received} bytes for {}", unit.entry.name);
            if extract {
                extract_archive(unit, dest_dir, reporter, cancel).await?;
            }
            Ok(())
        }
    }
}

async fn copy_file(unit: &mut TransferUnit, reporter: &EventReporter) -> Result<(), String> {
    let mut reader = async_fs::File::open(&unit.src)
        .await
        .map_err(|e| format!("copy open error {}: {e}", unit.src.display()))?;
    if let Some(parent) = unit.dst.parent() {
        async_fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create destination dir: {e}"))?;
    }
    let mut writer = async_fs::File::create(&unit.dst)
        .await
        .map_err(|e| format!("copy create error {}: {e}", unit.dst.display()))?;

    let mut buf = vec![0u8; COPY_CHUNK];
    loop {
        let read = reader
            .read(&mut buf)
            .await
            .map_err(|e| format!("copy read error: {e}"))?;
        if read == 0 {
            break;
        }
        writer
            .write_all(&buf[..read])
            .await
            .map_err(|e| format!("copy write error: {e}"))?;
        reporter.progress(unit, read as u64);
    }
    writer
        .flush()
        .await
        .map_err(|e| format!("copy flush error: {e}"))
}

/// Expand the archive at `unit.dst` into `dest_dir`, overwriting members.
/// Each member's compressed size is credited as extraction progress.
async fn extract_archive(
    unit: &mut TransferUnit,
    dest_dir: &Path,
    reporter: &EventReporter,
    cancel: &CancellationToken,
) -> Result<(), String> {
    reporter.diagnostic(format!("unzipping {}", unit.entry.name));
    let archive = unit.dst.clone();
    let target = dest_dir.to_path_buf();
    let cancel = cancel.clone();
    let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
    let job = tokio::task::spawn_blocking(move || {
        extract_zip(&archive, &target, &cancel, |bytes| {
            let _ = tx.send(bytes);
        })
    });
    while let Some(bytes) = rx.recv().await {
        reporter.progress(unit, bytes);
    }
    job.await
        .map_err(|e| format!("extraction task failed: {e}"))?
}

fn extract_zip<F>(
    archive_path: &Path,
    dest: &Path,
    cancel: &CancellationToken,
    mut on_member: F,
) -> Result<(), String>
where
    F: FnMut(u64),
{
    let file = fs::File::open(archive_path).map_err(|e| format!("zip open error: {e}"))?;
    let mut archive = ZipArchive::new(file).map_err(|e| format!("zip parse error: {e}"))?;

    for i in 0..archive.len() {
        if cancel.is_cancelled() {
            return Err("extraction cancelled".into());
        }
        let mut entry = archive
            .by_index(i)
            .map_err(|e| format!("zip entry error: {e}"))?;
        let out_path = dest.join(entry.mangled_name());
        if entry.name().ends_with('/') {
            fs::create_dir_all(&out_path).map_err(|e| format!("zip dir create error: {e}"))?;
            on_member(entry.compressed_size());
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| format!("zip parent dir error: {e}"))?;
        }
        let mut out_file =
            fs::File::create(&out_path).map_err(|e| format!("zip create file error: {e}"))?;
        let mut buf = vec![0u8; COPY_CHUNK];
        loop {
            if cancel.is_cancelled() {
                return Err("extraction cancelled".into());
            }
            let read = entry
                .read(&mut buf)
                .map_err(|e| format!("zip read error: {e}"))?;
            if read == 0 {
                break;
            }
            out_file
                .write_all(&buf[..read])
                .map_err(|e| format!("zip write error: {e}"))?;
        }
        on_member(entry.compressed_size());
    }

    Ok(())
}

/// Lower-case hex digest of the file at `path`. Gives up with an error
/// between buffers once `cancel` fires.
pub fn file_digest(
    path: &Path,
    kind: DigestKind,
    cancel: &CancellationToken,
) -> Result<String, String> {
    let file = fs::File::open(path).map_err(|e| format!("checksum open error: {e}"))?;
    match kind {
        DigestKind::Md5 => hash_reader::<Md5>(file, cancel).map(|d| format!("{d:x}")),
        DigestKind::Sha256 => hash_reader::<Sha256>(file, cancel).map(|d| format!("{d:x}")),
    }
}

fn hash_reader<D: Digest>(
    mut reader: impl Read,
    cancel: &CancellationToken,
) -> Result<Output<D>, String> {
    let mut hasher = D::new();
    let mut buf = [0u8; HASH_CHUNK];
    loop {
        if cancel.is_cancelled() {
            return Err("checksum cancelled".into());
        }
        let read = reader
            .read(&mut buf)
            .map_err(|e| format!("checksum read error: {e}"))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finalize())
}
