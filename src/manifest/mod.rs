use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use serde::Deserialize;

/// Name of the file whose absence from the destination marks a first install.
pub const SENTINEL_FILE: &str = "swgemu.cfg";
pub const DEFAULT_BOOTSTRAP_URL: &str = "http://patcher.swgawakening.com/launcher";
const EMBEDDED_BASELINE: &str = include_str!("../../assets/required.json");
const ARCHIVE_SUFFIX: &str = ".zip";

/// Files fetched unconditionally on a first install or a full verification pass.
/// The first element is the path below the bootstrap host.
const BOOTSTRAP_FILES: [(&str, &str); 9] = [
    ("live/game_files", "live.cfg"),
    ("initial_install", "login.cfg"),
    ("initial_install", "options.cfg"),
    ("initial_install", "preload.cfg"),
    ("initial_install", "swgemu.cfg"),
    ("initial_install", "user.cfg"),
    ("initial_install", "swgemu_machineoptions.iff"),
    ("initial_install", "KSWGProfCalc.dat"),
    ("initial_install", "KSWGProfCalcEditor.exe"),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeConstraint {
    Exact(u64),
    Unconstrained,
}

impl SizeConstraint {
    /// Byte count used for progress accounting; unconstrained entries weigh nothing.
    pub fn declared(self) -> u64 {
        match self {
            SizeConstraint::Exact(size) => size,
            SizeConstraint::Unconstrained => 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DigestKind {
    Md5,
    Sha256,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checksum {
    pub kind: DigestKind,
    pub hex: String,
}

impl Checksum {
    pub fn parse(value: &str) -> Self {
        let hex = value.trim().to_lowercase();
        let kind = if hex.len() == 64 {
            DigestKind::Sha256
        } else {
            DigestKind::Md5
        };
        Self { kind, hex }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChecksumPolicy {
    Verify(Checksum),
    /// The file may be user-modified; any content is accepted.
    SkipVerify,
}

impl ChecksumPolicy {
    /// Whether `actual` (lower-case hex) satisfies this policy.
    pub fn accepts(&self, actual: &str) -> bool {
        match self {
            ChecksumPolicy::Verify(expected) => expected.hex == actual,
            ChecksumPolicy::SkipVerify => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub name: String,
    pub size: SizeConstraint,
    pub checksum: ChecksumPolicy,
    pub url: String,
}

impl ManifestEntry {
    pub fn is_archive(&self) -> bool {
        self.name.ends_with(ARCHIVE_SUFFIX)
    }

    /// Progress cost of this entry: its size, counted twice for archives
    /// (once for the transfer, once for extraction).
    pub fn session_weight(&self) -> u64 {
        let size = self.size.declared();
        if self.is_archive() {
            size.saturating_mul(2)
        } else {
            size
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawChecksum {
    Text(String),
    Number(serde_json::Number),
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    md5: Option<RawChecksum>,
    url: String,
}

#[derive(Debug, Deserialize)]
struct ManifestDocument {
    #[serde(default)]
    required: Vec<RawEntry>,
}

impl From<RawEntry> for ManifestEntry {
    fn from(raw: RawEntry) -> Self {
        let size = match raw.size {
            0 => SizeConstraint::Unconstrained,
            size => SizeConstraint::Exact(size),
        };
        let checksum = match raw.md5 {
            None => ChecksumPolicy::SkipVerify,
            Some(RawChecksum::Number(n)) if n.as_f64() == Some(0.0) => ChecksumPolicy::SkipVerify,
            Some(RawChecksum::Number(n)) => ChecksumPolicy::Verify(Checksum::parse(&n.to_string())),
            Some(RawChecksum::Text(text)) => {
                let trimmed = text.trim();
                if trimmed.is_empty() || trimmed == "0" {
                    ChecksumPolicy::SkipVerify
                } else {
                    ChecksumPolicy::Verify(Checksum::parse(trimmed))
                }
            }
        };
        ManifestEntry {
            name: raw.name,
            size,
            checksum,
            url: raw.url,
        }
    }
}

/// Parse a `{ "required": [...] }` document into entries, decoding sentinels once.
pub fn parse_document(text: &str) -> Result<Vec<ManifestEntry>, String> {
    let doc: ManifestDocument =
        serde_json::from_str(text).map_err(|e| format!("manifest parse error: {e}"))?;
    Ok(doc.required.into_iter().map(ManifestEntry::from).collect())
}

/// The baseline list compiled into the binary.
pub fn embedded_defaults() -> Vec<ManifestEntry> {
    parse_document(EMBEDDED_BASELINE).unwrap_or_else(|err| {
        warn!("manifest: embedded baseline unreadable ({err}); starting empty");
        Vec::new()
    })
}

pub fn bootstrap_entries(base_url: &str) -> Vec<ManifestEntry> {
    let base = base_url.trim_end_matches('/');
    BOOTSTRAP_FILES
        .iter()
        .map(|(dir, name)| ManifestEntry {
            name: (*name).to_owned(),
            size: SizeConstraint::Unconstrained,
            checksum: ChecksumPolicy::SkipVerify,
            url: format!("{base}/{dir}/{name}"),
        })
        .collect()
}

/// Build the local side of the merge. Bootstrap entries are appended when a
/// full scan was requested or the destination lacks the sentinel file.
pub fn baseline(
    defaults: Vec<ManifestEntry>,
    full_scan: bool,
    sentinel_present: bool,
    bootstrap_url: &str,
) -> Vec<ManifestEntry> {
    let mut files = defaults;
    if full_scan || !sentinel_present {
        debug!(
            "manifest: adding bootstrap entries (full_scan={full_scan}, sentinel_present={sentinel_present})"
        );
        files.extend(bootstrap_entries(bootstrap_url));
    }
    files
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Collapse duplicate names: the first position is kept, the last value wins.
    pub fn from_entries(entries: Vec<ManifestEntry>) -> Self {
        Self {
            entries: dedup_by_name(entries),
        }
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_weight(&self) -> u64 {
        self.entries.iter().map(ManifestEntry::session_weight).sum()
    }

    pub fn into_entries(self) -> Vec<ManifestEntry> {
        self.entries
    }
}

/// Name-keyed override union: baseline entries shadowed by a remote entry of
/// the same name are dropped, then every remote entry follows in remote order.
pub fn merge(baseline: Vec<ManifestEntry>, remote: Vec<ManifestEntry>) -> Manifest {
    let remote = dedup_by_name(remote);
    let overridden: HashSet<&str> = remote.iter().map(|e| e.name.as_str()).collect();
    let mut merged: Vec<ManifestEntry> = dedup_by_name(baseline)
        .into_iter()
        .filter(|entry| !overridden.contains(entry.name.as_str()))
        .collect();
    merged.extend(remote);
    Manifest { entries: merged }
}

fn dedup_by_name(entries: Vec<ManifestEntry>) -> Vec<ManifestEntry> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<ManifestEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
        match index.get(&entry.name) {
            Some(&pos) => {
                debug!("manifest: duplicate entry {}; keeping later value", entry.name);
                out[pos] = entry;
            }
            None => {
                index.insert(entry.name.clone(), out.len());
                out.push(entry);
            }
        }
    }
    out
}
