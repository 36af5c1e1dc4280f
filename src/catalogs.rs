//! Asset Catalogs
//!
//! The host keeps asset-browser catalogs in `blender_assets.cats.txt` at the
//! library root:
//!
//! ```text
//! VERSION 1
//!
//! <uuid>:<catalog/path>:<SimpleName>
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const CATALOG_FILE: &str = "blender_assets.cats.txt";
const CATALOG_HEADER: &str = "VERSION 1\n\n";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog file {} unreadable: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Catalog file {} could not be written: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid catalog path: '{0}'")]
    InvalidPath(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: Uuid,
    pub path: String,
    pub simple_name: String,
}

/// Parse catalog definitions, skipping comments and the version header.
pub fn parse_catalogs(text: &str) -> Vec<CatalogEntry> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with("VERSION"))
        .filter_map(|line| {
            let mut parts = line.splitn(3, ':');
            let id = parts.next()?;
            let path = parts.next()?;
            match Uuid::parse_str(id) {
                Ok(id) => Some(CatalogEntry {
                    id,
                    path: path.to_string(),
                    simple_name: parts.next().unwrap_or_default().to_string(),
                }),
                Err(_) => {
                    warn!(line, "Skipping catalog line with invalid UUID");
                    None
                }
            }
        })
        .collect()
}

pub fn read_catalogs(library_root: &Path) -> Result<Vec<CatalogEntry>, CatalogError> {
    let file = library_root.join(CATALOG_FILE);
    if !file.exists() {
        return Ok(vec![]);
    }
    let text = fs::read_to_string(&file).map_err(|source| CatalogError::Read {
        path: file.clone(),
        source,
    })?;
    Ok(parse_catalogs(&text))
}

/// Make sure `catalog_path` (e.g. `POSES/FACE`) exists and return its UUID.
///
/// Existing lines are left untouched; a new catalog is appended.
pub fn ensure_catalog(library_root: &Path, catalog_path: &str) -> Result<Uuid, CatalogError> {
    let catalog_path = catalog_path.trim().trim_matches('/');
    if catalog_path.is_empty() || catalog_path.contains(|c: char| c == ':' || c.is_control()) {
        return Err(CatalogError::InvalidPath(catalog_path.to_string()));
    }

    let file = library_root.join(CATALOG_FILE);
    let existing = if file.exists() {
        fs::read_to_string(&file).map_err(|source| CatalogError::Read {
            path: file.clone(),
            source,
        })?
    } else {
        String::new()
    };

    if let Some(entry) = parse_catalogs(&existing)
        .into_iter()
        .find(|e| e.path == catalog_path)
    {
        return Ok(entry.id);
    }

    let entry = CatalogEntry {
        id: Uuid::new_v4(),
        path: catalog_path.to_string(),
        simple_name: catalog_path.rsplit('/').next().unwrap_or(catalog_path).to_string(),
    };

    let mut text = if existing.trim().is_empty() {
        CATALOG_HEADER.to_string()
    } else {
        existing
    };
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(&format!("{}:{}:{}\n", entry.id, entry.path, entry.simple_name));

    let write_err = |source| CatalogError::Write {
        path: file.clone(),
        source,
    };
    fs::create_dir_all(library_root).map_err(write_err)?;
    fs::write(&file, text).map_err(write_err)?;

    info!(catalog = %entry.path, id = %entry.id, "Created new asset catalog");
    Ok(entry.id)
}
