//! Export Pipeline - Markers to Expression Assets
//!
//! One manifest load per batch and one backup+save at the end. A marker that
//! fails is reported in the batch and the remaining markers still run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::manifest::{self, Manifest, ManifestError};
use crate::naming::{self, NamingError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Save aborted for a batch of {} marker(s): {source}", .outcomes.len())]
    SaveAborted {
        outcomes: Vec<MarkerOutcome>,
        #[source]
        source: ManifestError,
    },
}

/// Host-side pose capture.
///
/// Implemented by the host binding: set the frame, bake the rig pose and
/// store it under `asset_name`. An `Err` fails that marker only.
pub trait PoseCapture {
    fn capture(&mut self, asset_name: &str, marker: &MarkerInput) -> Result<(), String>;
}

impl<F> PoseCapture for F
where
    F: FnMut(&str, &MarkerInput) -> Result<(), String>,
{
    fn capture(&mut self, asset_name: &str, marker: &MarkerInput) -> Result<(), String> {
        self(asset_name, marker)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarkerInput {
    pub name: String,
    pub frame: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequest {
    pub session_file: String,
    pub character: String,
    pub markers: Vec<MarkerInput>,
    #[serde(default = "default_true")]
    pub skip_processed: bool,
    /// Notes for every exported asset; defaults to `From marker: <name>`.
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    EmptyMarkerName,
    EmptyCharacterName,
    NameSpaceExhausted,
    DuplicateAsset,
    CaptureFailed,
}

impl From<&NamingError> for FailureKind {
    fn from(err: &NamingError) -> Self {
        match err {
            NamingError::EmptyMarkerName(_) => FailureKind::EmptyMarkerName,
            NamingError::EmptyCharacterName(_) => FailureKind::EmptyCharacterName,
            NamingError::NameSpaceExhausted(_) => FailureKind::NameSpaceExhausted,
        }
    }
}

/// Per-marker result. In a plan, `Exported` carries the name that would be
/// used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MarkerOutcome {
    Exported {
        marker: String,
        asset_name: String,
        frame: i32,
    },
    Skipped {
        marker: String,
        asset_name: Option<String>,
    },
    Failed {
        marker: String,
        kind: FailureKind,
        message: String,
    },
}

impl MarkerOutcome {
    fn failed(marker: &MarkerInput, kind: FailureKind, message: impl Into<String>) -> Self {
        MarkerOutcome::Failed {
            marker: marker.name.clone(),
            kind,
            message: message.into(),
        }
    }

    pub fn marker(&self) -> &str {
        match self {
            MarkerOutcome::Exported { marker, .. }
            | MarkerOutcome::Skipped { marker, .. }
            | MarkerOutcome::Failed { marker, .. } => marker,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub session_file: String,
    pub manifest_path: PathBuf,
    pub outcomes: Vec<MarkerOutcome>,
    pub saved: bool,
    pub backup: Option<PathBuf>,
}

impl BatchReport {
    pub fn exported(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                MarkerOutcome::Exported { asset_name, .. } => Some(asset_name.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<&MarkerOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, MarkerOutcome::Failed { .. }))
            .collect()
    }

    pub fn success(&self) -> bool {
        !self.exported().is_empty()
    }
}

/// The export pipeline - batch entry point for marker export
pub struct ExportPipeline {
    manifest_path: PathBuf,
}

impl ExportPipeline {
    pub fn new(manifest_path: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
        }
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Resolve names for a request without capturing or saving anything.
    ///
    /// Runs the export steps against an in-memory copy with a capture that
    /// always succeeds, so markers repeated in one batch plan the same way
    /// they export.
    pub fn plan(&self, request: &ExportRequest) -> Result<Vec<MarkerOutcome>, PipelineError> {
        let mut scratch = manifest::load(&self.manifest_path)?;
        let mut dry_run = |_: &str, _: &MarkerInput| -> Result<(), String> { Ok(()) };

        Ok(request
            .markers
            .iter()
            .map(|marker| export_marker(&mut scratch, request, marker, &mut dry_run))
            .collect())
    }

    /// Export every marker in the request.
    ///
    /// The manifest is saved once, and only if at least one marker was
    /// exported. A failed backup aborts that save.
    pub fn export(
        &self,
        request: &ExportRequest,
        capture: &mut dyn PoseCapture,
    ) -> Result<BatchReport, PipelineError> {
        let mut manifest = manifest::load(&self.manifest_path)?;

        let mut outcomes = Vec::with_capacity(request.markers.len());
        for marker in &request.markers {
            let outcome = export_marker(&mut manifest, request, marker, capture);
            match &outcome {
                MarkerOutcome::Exported { asset_name, .. } => {
                    info!(marker = %marker.name, asset = %asset_name, "Marker exported")
                }
                MarkerOutcome::Skipped { .. } => {
                    debug!(marker = %marker.name, "Marker already processed, skipped")
                }
                MarkerOutcome::Failed { message, .. } => {
                    warn!(marker = %marker.name, "Marker failed: {}", message)
                }
            }
            outcomes.push(outcome);
        }

        let mut report = BatchReport {
            session_file: request.session_file.clone(),
            manifest_path: self.manifest_path.clone(),
            outcomes,
            saved: false,
            backup: None,
        };

        if report.success() {
            match manifest::save(&self.manifest_path, &mut manifest) {
                Ok(outcome) => {
                    report.saved = true;
                    report.backup = outcome.backup.map(|b| b.path);
                }
                Err(source) => {
                    return Err(PipelineError::SaveAborted {
                        outcomes: report.outcomes,
                        source,
                    });
                }
            }
        }

        Ok(report)
    }
}

fn skip_outcome(manifest: &Manifest, request: &ExportRequest, marker: &MarkerInput) -> Option<MarkerOutcome> {
    if !request.skip_processed || !manifest.is_processed(&request.session_file, &marker.name) {
        return None;
    }
    Some(MarkerOutcome::Skipped {
        marker: marker.name.clone(),
        asset_name: manifest
            .processed_asset(&request.session_file, &marker.name)
            .map(str::to_string),
    })
}

fn export_marker(
    manifest: &mut Manifest,
    request: &ExportRequest,
    marker: &MarkerInput,
    capture: &mut dyn PoseCapture,
) -> MarkerOutcome {
    if let Some(skipped) = skip_outcome(manifest, request, marker) {
        return skipped;
    }

    let resolved = naming::character_token(&request.character).and_then(|character| {
        naming::resolve_asset_name(&request.character, &marker.name, &*manifest)
            .map(|asset_name| (character, asset_name))
    });
    let (character, asset_name) = match resolved {
        Ok(pair) => pair,
        Err(e) => return MarkerOutcome::failed(marker, FailureKind::from(&e), e.to_string()),
    };

    if let Err(message) = capture.capture(&asset_name, marker) {
        return MarkerOutcome::failed(marker, FailureKind::CaptureFailed, message);
    }

    let notes = request
        .notes
        .clone()
        .unwrap_or_else(|| format!("From marker: {}", marker.name));

    match manifest.record_expression(
        &asset_name,
        &request.session_file,
        marker.frame,
        Some(&marker.name),
        &notes,
    ) {
        Ok(record) => record.character = character,
        Err(e) => return MarkerOutcome::failed(marker, FailureKind::DuplicateAsset, e.to_string()),
    }
    manifest.mark_processed(&request.session_file, &marker.name, &asset_name, marker.frame);

    MarkerOutcome::Exported {
        marker: marker.name.clone(),
        asset_name,
        frame: marker.frame,
    }
}
