//! EK_PV Core - Expression Manifest and Naming
//!
//! # Ground Rules
//! 1. Asset names are unique across the manifest
//! 2. Processed markers point at recorded assets
//! 3. Metadata is recomputed on every save
//! 4. No save without a backup of what it replaces
//! 5. One failed marker never sinks the batch

pub mod catalogs;
pub mod hashing;
pub mod manifest;
pub mod naming;
pub mod paths;
pub mod pipeline;
pub mod scene;
pub mod validation;

pub use hashing::{canonical_json, content_digest, sha256_hex};
pub use manifest::{
    backup, load, load_with_report, save, update, BackupHandle, ExpressionRecord, Manifest,
    ManifestError, MarkerState, SaveOutcome,
};
pub use naming::{resolve_asset_name, sanitize, unique_asset_name, NameRegistry, NamingError};
pub use pipeline::{BatchReport, ExportPipeline, ExportRequest, MarkerInput, MarkerOutcome, PipelineError, PoseCapture};
pub use scene::{detect_mocap_state, MocapState, SceneInspector};
pub use validation::{AuditReport, Auditor, ManifestViolation, ViolationSeverity};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
