//! Library Layout
//!
//! Where sessions, expression assets and manifests live under a project
//! root. The library folder is `_Library` or `_<Project>_Library`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

const DEFAULT_LIBRARY: &str = "_Library";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ManifestKind {
    /// Facial expression poses
    Expression,
    /// Body poses
    Body,
}

/// Library directory for a project root.
///
/// `_Library` wins if it exists, then the first `_*_Library` directory,
/// otherwise `_Library` is assumed.
pub fn library_path(project_root: &Path) -> PathBuf {
    let default_lib = project_root.join(DEFAULT_LIBRARY);
    if default_lib.is_dir() {
        return default_lib;
    }

    let Ok(entries) = fs::read_dir(project_root) else {
        return default_lib;
    };

    let mut named: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with('_') && n.ends_with("_Library"))
        })
        .collect();
    // read_dir order is platform dependent
    named.sort();

    named.into_iter().next().unwrap_or(default_lib)
}

/// `<library>/Mocap/Face/LiveLink`
pub fn mocap_dir(project_root: &Path) -> PathBuf {
    library_path(project_root).join("Mocap").join("Face").join("LiveLink")
}

/// `<library>/Expressions/<character>`
pub fn expression_dir(project_root: &Path, character: &str) -> PathBuf {
    library_path(project_root).join("Expressions").join(character)
}

pub fn manifest_path(project_root: &Path, kind: ManifestKind) -> PathBuf {
    let lib = library_path(project_root);
    match kind {
        ManifestKind::Expression => lib.join("Mocap").join("Face").join("Expression_Manifest.json"),
        ManifestKind::Body => lib.join("Mocap").join("Body").join("Pose_Manifest.json"),
    }
}

/// Create `dir` (and parents) and hand it back.
pub fn ensure_dir(dir: PathBuf) -> io::Result<PathBuf> {
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Next free session number for `date` in `mocap_dir`.
///
/// Looks at `Session_<date>_<N>.blend` files and returns the highest `N`
/// plus one. Files whose suffix is not a number are ignored.
pub fn next_session_number(mocap_dir: &Path, date: NaiveDate) -> io::Result<u32> {
    if !mocap_dir.exists() {
        return Ok(1);
    }

    let prefix = format!("Session_{}_", date.format("%Y-%m-%d"));
    let mut max_num = 0;
    for entry in fs::read_dir(mocap_dir)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        let Some(number) = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".blend"))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        max_num = max_num.max(number);
    }
    Ok(max_num + 1)
}
