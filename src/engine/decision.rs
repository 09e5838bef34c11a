use std::fs;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::engine::models::Action;
use crate::engine::transfer::file_digest;
use crate::manifest::{ChecksumPolicy, ManifestEntry, SizeConstraint};

/// Extensions that are never trusted from a copy; they are always checked
/// against the installed file instead.
pub const FORCED_VERIFICATION_EXTENSIONS: [&str; 8] =
    [".cfg", ".iff", ".dat", ".exe", ".m3d", ".flt", ".asi", ".dll"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub src: PathBuf,
    pub dst: PathBuf,
    pub action: Action,
    pub reason: String,
}

pub fn requires_verification(name: &str) -> bool {
    let lower = name.to_lowercase();
    FORCED_VERIFICATION_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(ext))
}

/// Choose how to reconcile one entry. An existing destination file takes the
/// place of the nominal source, so an installed file is validated in place.
/// Checksums are abandoned once `cancel` fires.
pub fn decide(
    entry: &ManifestEntry,
    source_dir: &Path,
    dest_dir: &Path,
    full_scan: bool,
    cancel: &CancellationToken,
) -> Decision {
    let dst = dest_dir.join(&entry.name);
    let dst_exists = dst.exists();
    let src = if dst_exists {
        dst.clone()
    } else {
        source_dir.join(&entry.name)
    };
    let download = Action::Download {
        extract: entry.is_archive(),
    };
    let decision = |src: PathBuf, action: Action, reason: String| Decision {
        src,
        dst: dst.clone(),
        action,
        reason,
    };

    let meta = match fs::metadata(&src) {
        Ok(meta) => meta,
        Err(err) => {
            return decision(src.clone(), download, format!("{}: {err}", src.display()));
        }
    };

    if let SizeConstraint::Exact(expected) = entry.size
        && meta.len() != expected
    {
        let reason = format!(
            "size mismatch on {} actual: {} expected: {expected}",
            entry.name,
            meta.len()
        );
        return decision(src, download, reason);
    }

    if requires_verification(&entry.name) {
        if !dst_exists {
            let reason = format!(
                "forcing download due to extension (file not already in destination): {}",
                entry.name
            );
            return decision(src, download, reason);
        }
        return match verify(&dst, &entry.checksum, cancel) {
            Ok(()) => decision(
                src,
                Action::Skip,
                format!("checksum match for restricted extension file: {}", entry.name),
            ),
            Err(mismatch) => decision(
                src,
                download,
                format!("restricted extension file {}: {mismatch}", entry.name),
            ),
        };
    }

    if full_scan {
        return match verify(&src, &entry.checksum, cancel) {
            Ok(()) => decision(src, Action::Copy, format!("checksum matches {}", entry.name)),
            Err(mismatch) => decision(src, download, format!("{}: {mismatch}", entry.name)),
        };
    }

    let reason = format!("copying {}", entry.name);
    decision(src, Action::Copy, reason)
}

/// `SkipVerify` accepts any content without reading the file. An unreadable
/// file counts as a mismatch.
fn verify(
    path: &Path,
    policy: &ChecksumPolicy,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let ChecksumPolicy::Verify(expected) = policy else {
        return Ok(());
    };
    let actual = file_digest(path, expected.kind, cancel)?;
    if policy.accepts(&actual) {
        Ok(())
    } else {
        Err(format!(
            "checksum mismatch actual: {actual} expected: {}",
            expected.hex
        ))
    }
}
