//! Manifest Store - Expression Registry and Marker State
//!
//! One JSON document per project library. It is read whole, mutated in
//! memory and written back whole. Every save takes a timestamped backup of
//! the previous file first and then replaces it with an atomic rename.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::hashing::sha256_hex;
use crate::naming::{character_from_asset_name, NameRegistry};

pub const MANIFEST_VERSION: &str = "1.1";

/// Session bucket that receives marker entries from manifests written
/// before marker state was keyed by session file.
pub const LEGACY_SESSION: &str = "_legacy";

const BACKUP_TAG: &str = "_BACKUP_";
const TOP_LEVEL_KEYS: [&str; 3] = ["expressions", "marker_state", "metadata"];

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Corrupt manifest {}: {reason}", .path.display())]
    CorruptManifest { path: PathBuf, reason: String },

    #[error("Asset already registered: {0}")]
    DuplicateAsset(String),

    #[error("Backup of {} failed, save aborted: {source}", .path.display())]
    BackupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type SessionMarkers = BTreeMap<String, MarkerState>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub expressions: BTreeMap<String, ExpressionRecord>,
    #[serde(default)]
    pub marker_state: BTreeMap<String, SessionMarkers>,
    #[serde(default)]
    pub metadata: ManifestMetadata,
    /// Top-level keys this version does not know about, kept as-is.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressionRecord {
    pub source_file: String,
    pub frame: i32,
    pub marker_name: Option<String>,
    pub export_date: String,
    pub character: String,
    pub notes: String,
    /// Fields written by other tools, kept as-is.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerState {
    pub processed: bool,
    pub asset_name: Option<String>,
    pub frame: i32,
    pub export_date: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestMetadata {
    pub version: String,
    pub last_updated: Option<String>,
    pub total_expressions: usize,
    pub total_markers: usize,
    pub processed_markers: usize,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for ManifestMetadata {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            last_updated: None,
            total_expressions: 0,
            total_markers: 0,
            processed_markers: 0,
            extra: BTreeMap::new(),
        }
    }
}

/// Counts derived from manifest contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestCounts {
    pub total_expressions: usize,
    pub total_markers: usize,
    pub processed_markers: usize,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new expression asset, stamped with today's date.
    ///
    /// The character is taken from the `FACE_<CHAR>_...` name; callers that
    /// know better can overwrite it through the returned record.
    pub fn record_expression(
        &mut self,
        asset_name: &str,
        source_file: &str,
        frame: i32,
        marker_name: Option<&str>,
        notes: &str,
    ) -> Result<&mut ExpressionRecord, ManifestError> {
        let character = character_from_asset_name(asset_name)
            .unwrap_or("Unknown")
            .to_string();

        match self.expressions.entry(asset_name.to_string()) {
            Entry::Occupied(_) => Err(ManifestError::DuplicateAsset(asset_name.to_string())),
            Entry::Vacant(slot) => {
                info!(asset = asset_name, source_file, frame, "Expression recorded");
                Ok(slot.insert(ExpressionRecord {
                    source_file: source_file.to_string(),
                    frame,
                    marker_name: marker_name.map(str::to_string),
                    export_date: today(),
                    character,
                    notes: notes.to_string(),
                    extra: BTreeMap::new(),
                }))
            }
        }
    }

    /// Upsert `marker_state[session_file][marker_name]` as processed.
    ///
    /// Unknown fields on an existing entry survive the upsert.
    pub fn mark_processed(
        &mut self,
        session_file: &str,
        marker_name: &str,
        asset_name: &str,
        frame: i32,
    ) {
        let state = self
            .marker_state
            .entry(session_file.to_string())
            .or_default()
            .entry(marker_name.to_string())
            .or_default();
        state.processed = true;
        state.asset_name = Some(asset_name.to_string());
        state.frame = frame;
        state.export_date = Some(today());
    }

    pub fn is_processed(&self, session_file: &str, marker_name: &str) -> bool {
        self.marker(session_file, marker_name)
            .map_or(false, |state| state.processed)
    }

    /// Asset a processed marker was exported as.
    pub fn processed_asset(&self, session_file: &str, marker_name: &str) -> Option<&str> {
        self.marker(session_file, marker_name)
            .filter(|state| state.processed)
            .and_then(|state| state.asset_name.as_deref())
    }

    /// Marker entry for a session, falling back to the legacy bucket.
    pub fn marker(&self, session_file: &str, marker_name: &str) -> Option<&MarkerState> {
        self.marker_state
            .get(session_file)
            .and_then(|markers| markers.get(marker_name))
            .or_else(|| {
                self.marker_state
                    .get(LEGACY_SESSION)
                    .and_then(|markers| markers.get(marker_name))
            })
    }

    pub fn counts(&self) -> ManifestCounts {
        let total_markers = self.marker_state.values().map(|m| m.len()).sum();
        let processed_markers = self
            .marker_state
            .values()
            .flat_map(|m| m.values())
            .filter(|state| state.processed)
            .count();

        ManifestCounts {
            total_expressions: self.expressions.len(),
            total_markers,
            processed_markers,
        }
    }

    pub fn recompute_metadata(&mut self) {
        let counts = self.counts();
        self.metadata.total_expressions = counts.total_expressions;
        self.metadata.total_markers = counts.total_markers;
        self.metadata.processed_markers = counts.processed_markers;
    }
}

impl NameRegistry for Manifest {
    fn contains_name(&self, name: &str) -> bool {
        self.expressions.contains_key(name)
    }
}

/// Result of [`load_with_report`]: the manifest plus what had to be fixed.
#[derive(Debug, Clone)]
pub struct LoadedManifest {
    pub manifest: Manifest,
    pub existed: bool,
    pub repairs: Vec<String>,
}

/// Load the manifest at `path`, or the empty skeleton if there is none.
pub fn load(path: &Path) -> Result<Manifest, ManifestError> {
    Ok(load_with_report(path)?.manifest)
}

pub fn load_with_report(path: &Path) -> Result<LoadedManifest, ManifestError> {
    if !path.exists() {
        debug!(path = %path.display(), "Manifest not found, starting fresh");
        return Ok(LoadedManifest {
            manifest: Manifest::default(),
            existed: false,
            repairs: vec![],
        });
    }

    let bytes = fs::read(path).map_err(io_error(path))?;
    if bytes.is_empty() {
        debug!(path = %path.display(), "Manifest file is empty, initializing fresh");
        return Ok(LoadedManifest {
            manifest: Manifest::default(),
            existed: true,
            repairs: vec![],
        });
    }

    let corrupt = |reason: String| ManifestError::CorruptManifest {
        path: path.to_path_buf(),
        reason,
    };

    let mut raw: Value = serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
    let repairs = repair_structure(&mut raw).map_err(corrupt)?;
    for repair in &repairs {
        warn!(path = %path.display(), "Manifest repaired: {}", repair);
    }

    let manifest: Manifest = serde_json::from_value(raw).map_err(|e| corrupt(e.to_string()))?;
    debug!(
        path = %path.display(),
        expressions = manifest.expressions.len(),
        sessions = manifest.marker_state.len(),
        "Manifest loaded"
    );

    Ok(LoadedManifest {
        manifest,
        existed: true,
        repairs,
    })
}

/// Bring a parsed document into the expected shape.
///
/// Missing top-level keys are recreated, flat legacy marker entries move to
/// [`LEGACY_SESSION`], and unusable marker/metadata values are dropped.
/// `expressions` is never rewritten: if it is not an object the document is
/// rejected.
fn repair_structure(raw: &mut Value) -> Result<Vec<String>, String> {
    let root = raw
        .as_object_mut()
        .ok_or_else(|| "root is not a JSON object".to_string())?;
    let mut repairs = vec![];

    for key in TOP_LEVEL_KEYS {
        match root.get(key).map(Value::is_object) {
            Some(true) => {}
            None => {
                root.insert(key.to_string(), Value::Object(Map::new()));
                repairs.push(format!("added missing '{}'", key));
            }
            Some(false) if key == "expressions" => {
                return Err("'expressions' is not an object".to_string());
            }
            Some(false) => {
                root.insert(key.to_string(), Value::Object(Map::new()));
                repairs.push(format!("reset malformed '{}'", key));
            }
        }
    }

    let metadata_readable = root
        .get("metadata")
        .map_or(true, |m| serde_json::from_value::<ManifestMetadata>(m.clone()).is_ok());
    if !metadata_readable {
        root.insert("metadata".to_string(), Value::Object(Map::new()));
        repairs.push("reset unreadable 'metadata'".to_string());
    }

    if let Some(Value::Object(marker_state)) = root.get_mut("marker_state") {
        repairs.extend(repair_marker_state(marker_state));
    }

    Ok(repairs)
}

fn repair_marker_state(marker_state: &mut Map<String, Value>) -> Vec<String> {
    let mut repairs = vec![];
    let mut legacy = Map::new();

    let sessions: Vec<String> = marker_state.keys().cloned().collect();
    for session in sessions {
        let Some(value) = marker_state.get(&session) else {
            continue;
        };

        if is_flat_marker_entry(value) {
            if let Some(entry) = marker_state.remove(&session) {
                if is_readable_marker(&entry) {
                    legacy.insert(session.clone(), entry);
                    repairs.push(format!("moved legacy marker '{}' to '{}'", session, LEGACY_SESSION));
                } else {
                    repairs.push(format!("dropped malformed legacy marker '{}'", session));
                }
            }
            continue;
        }

        if !value.is_object() {
            marker_state.remove(&session);
            repairs.push(format!("dropped malformed session '{}'", session));
            continue;
        }

        if let Some(Value::Object(markers)) = marker_state.get_mut(&session) {
            let bad: Vec<String> = markers
                .iter()
                .filter(|(_, entry)| !is_readable_marker(entry))
                .map(|(name, _)| name.clone())
                .collect();
            for name in bad {
                markers.remove(&name);
                repairs.push(format!("dropped malformed marker '{}' in '{}'", name, session));
            }
        }
    }

    if !legacy.is_empty() {
        let bucket = marker_state
            .entry(LEGACY_SESSION.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(bucket) = bucket {
            for (name, entry) in legacy {
                bucket.entry(name).or_insert(entry);
            }
        }
    }

    repairs
}

fn is_readable_marker(entry: &Value) -> bool {
    serde_json::from_value::<MarkerState>(entry.clone()).is_ok()
}

/// Pre-session manifests stored `marker_state[marker] = {processed: bool, ...}`.
fn is_flat_marker_entry(value: &Value) -> bool {
    value.get("processed").map_or(false, Value::is_boolean)
}

/// A backup copy written before a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupHandle {
    pub path: PathBuf,
    /// SHA-256 of the bytes that were copied.
    pub sha256: String,
}

impl BackupHandle {
    /// Whether the backup file still holds exactly the copied bytes.
    pub fn verify(&self) -> Result<bool, ManifestError> {
        let bytes = fs::read(&self.path).map_err(io_error(&self.path))?;
        Ok(sha256_hex(&bytes) == self.sha256)
    }
}

/// Copy the current manifest to `<stem>_BACKUP_<timestamp>.json`.
///
/// Returns `None` when there is no file to back up yet.
pub fn backup(path: &Path) -> Result<Option<BackupHandle>, ManifestError> {
    if !path.exists() {
        return Ok(None);
    }

    let failed = |source| ManifestError::BackupFailed {
        path: path.to_path_buf(),
        source,
    };

    let bytes = fs::read(path).map_err(failed)?;
    let target = backup_path_for(path, Local::now());
    fs::write(&target, &bytes).map_err(failed)?;

    debug!(backup = %target.display(), "Manifest backup created");
    Ok(Some(BackupHandle {
        path: target,
        sha256: sha256_hex(&bytes),
    }))
}

fn backup_path_for(path: &Path, now: DateTime<Local>) -> PathBuf {
    let dir = parent_dir(path);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "manifest".to_string());
    let stamp = now.format("%Y%m%d_%H%M%S");

    let mut candidate = dir.join(format!("{}{}{}.json", stem, BACKUP_TAG, stamp));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{}{}{}_{}.json", stem, BACKUP_TAG, stamp, n));
        n += 1;
    }
    candidate
}

/// Backups of `path` found next to it, oldest first.
pub fn list_backups(path: &Path) -> Result<Vec<PathBuf>, ManifestError> {
    let dir = parent_dir(path);
    let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
        return Ok(vec![]);
    };
    if !dir.exists() {
        return Ok(vec![]);
    }

    let prefix = format!("{}{}", stem, BACKUP_TAG);
    let mut backups = vec![];
    for entry in fs::read_dir(&dir).map_err(io_error(&dir))? {
        let entry = entry.map_err(io_error(&dir))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) && name.ends_with(".json") {
            backups.push(entry.path());
        }
    }
    backups.sort_by_cached_key(|path| backup_sort_key(path, &prefix));
    Ok(backups)
}

/// `(timestamp, clash suffix)`; a backup without a suffix sorts first.
fn backup_sort_key(path: &Path, prefix: &str) -> (String, u32) {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let rest = name.strip_prefix(prefix).unwrap_or(&name);
    // %Y%m%d_%H%M%S is 15 characters
    match rest.get(15..).and_then(|tail| tail.strip_prefix('_')) {
        Some(n) => match n.parse() {
            Ok(n) => (rest[..15].to_string(), n),
            Err(_) => (rest.to_string(), 0),
        },
        None => (rest.to_string(), 0),
    }
}

#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub path: PathBuf,
    pub backup: Option<BackupHandle>,
}

/// Back up the existing file, restamp metadata and write `manifest` to
/// `path` atomically.
///
/// A failed backup aborts before anything is written.
pub fn save(path: &Path, manifest: &mut Manifest) -> Result<SaveOutcome, ManifestError> {
    let backup = backup(path)?;

    manifest.recompute_metadata();
    manifest.metadata.version = MANIFEST_VERSION.to_string();
    manifest.metadata.last_updated = Some(Local::now().to_rfc3339());

    let mut body = serde_json::to_string_pretty(manifest)?;
    body.push('\n');
    write_atomic(path, body.as_bytes())?;

    debug!(
        path = %path.display(),
        expressions = manifest.metadata.total_expressions,
        processed = manifest.metadata.processed_markers,
        "Manifest saved"
    );
    Ok(SaveOutcome {
        path: path.to_path_buf(),
        backup,
    })
}

/// Load, apply `f`, save. If `f` fails nothing is written.
pub fn update<T, E, F>(path: &Path, f: F) -> Result<(T, SaveOutcome), E>
where
    F: FnOnce(&mut Manifest) -> Result<T, E>,
    E: From<ManifestError>,
{
    let mut manifest = load(path)?;
    let value = f(&mut manifest)?;
    let outcome = save(path, &mut manifest)?;
    Ok((value, outcome))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ManifestError> {
    let dir = parent_dir(path);
    fs::create_dir_all(&dir).map_err(io_error(&dir))?;

    let mut tmp = NamedTempFile::new_in(&dir).map_err(io_error(&dir))?;
    tmp.write_all(bytes).map_err(io_error(path))?;
    tmp.as_file().sync_all().map_err(io_error(path))?;
    tmp.persist(path).map_err(|e| ManifestError::Io {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ManifestError + '_ {
    move |source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}
