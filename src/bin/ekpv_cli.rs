//! EK_PV CLI - Bridge interface for the host add-on
//!
//! Commands: sanitize, resolve, status, record, plan, check, catalog,
//! session-name, paths
//! Outputs one JSON document to stdout, logs to stderr (`EKPV_LOG`)
//! Returns 2 when a request is rejected, 1 on usage or I/O failure

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use ekpv_core::{
    catalogs, content_digest,
    manifest::{self, ManifestError},
    naming::{self, NamingError},
    paths::{self, ManifestKind},
    pipeline::{ExportPipeline, ExportRequest},
    Auditor,
};

#[derive(Parser)]
#[command(name = "ekpv-cli")]
#[command(about = "EK_PV CLI - expression manifest and naming bridge")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project root containing the _Library folder
    #[arg(short, long, env = "EKPV_PROJECT_ROOT", default_value = ".")]
    project_root: PathBuf,

    /// Manifest file, overriding the library layout
    #[arg(short, long, env = "EKPV_MANIFEST")]
    manifest: Option<PathBuf>,

    /// Which manifest the layout resolves to
    #[arg(short, long, value_enum, default_value = "expression")]
    kind: ManifestKind,
}

#[derive(Subcommand)]
enum Commands {
    /// Sanitize a raw marker label
    Sanitize {
        label: String,
    },

    /// Resolve a unique asset name for a marker label
    Resolve {
        #[arg(short, long)]
        character: String,

        #[arg(short, long)]
        label: String,
    },

    /// Report whether a marker was processed in a session
    Status {
        /// Session file name, e.g. Session_2025-01-16_001.blend
        #[arg(short, long)]
        session: String,

        #[arg(long)]
        marker: String,
    },

    /// Record an exported asset and mark its marker processed
    Record {
        #[arg(short, long)]
        asset: String,

        /// Session file the pose came from
        #[arg(short, long)]
        session: String,

        #[arg(short, long, allow_hyphen_values = true)]
        frame: i32,

        /// Raw marker label; omit for assets not tied to a marker
        #[arg(long)]
        marker: Option<String>,

        #[arg(short, long)]
        character: Option<String>,

        #[arg(short, long, default_value = "")]
        notes: String,
    },

    /// Dry-run an export batch
    Plan {
        /// JSON payload (ExportRequest)
        #[arg(long)]
        payload: String,
    },

    /// Audit the manifest
    Check,

    /// Ensure an asset catalog exists in the library
    Catalog {
        #[arg(default_value = "POSES/FACE")]
        path: String,
    },

    /// Next free session file name
    SessionName {
        /// Session date (YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        date: Option<chrono::NaiveDate>,
    },

    /// Print the library layout
    Paths {
        #[arg(short, long)]
        character: Option<String>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("EKPV_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let manifest_path = cli
        .manifest
        .clone()
        .unwrap_or_else(|| paths::manifest_path(&cli.project_root, cli.kind));

    match cli.command {
        Commands::Sanitize { label } => {
            let sanitized = naming::sanitize(&label);
            if sanitized.is_empty() {
                return rejected(&NamingError::EmptyMarkerName(label).to_string());
            }
            emit(&json!({ "label": label, "sanitized": sanitized }));
            ExitCode::SUCCESS
        }

        Commands::Resolve { character, label } => {
            let manifest = match manifest::load(&manifest_path) {
                Ok(m) => m,
                Err(e) => return failed(&e),
            };
            match naming::resolve_asset_name(&character, &label, &manifest) {
                Ok(asset_name) => {
                    emit(&json!({
                        "success": true,
                        "sanitized": naming::sanitize(&label),
                        "asset_name": asset_name,
                    }));
                    ExitCode::SUCCESS
                }
                Err(e) => rejected(&e.to_string()),
            }
        }

        Commands::Status { session, marker } => match manifest::load(&manifest_path) {
            Ok(m) => {
                emit(&json!({
                    "session": session,
                    "marker": marker,
                    "processed": m.is_processed(&session, &marker),
                    "asset_name": m.processed_asset(&session, &marker),
                }));
                ExitCode::SUCCESS
            }
            Err(e) => failed(&e),
        },

        Commands::Record { asset, session, frame, marker, character, notes } => {
            let token = match character_override(character.as_deref()) {
                Ok(token) => token,
                Err(e) => return rejected(&e.to_string()),
            };
            let result = manifest::update(&manifest_path, |m| -> Result<(), ManifestError> {
                let record = m.record_expression(&asset, &session, frame, marker.as_deref(), &notes)?;
                if let Some(token) = token {
                    record.character = token;
                }
                if let Some(marker) = &marker {
                    m.mark_processed(&session, marker, &asset, frame);
                }
                Ok(())
            });

            match result {
                Ok(((), outcome)) => {
                    emit(&json!({
                        "success": true,
                        "asset_name": asset,
                        "manifest_path": outcome.path,
                        "backup_created": outcome.backup.is_some(),
                        "backup_path": outcome.backup.map(|b| b.path),
                        "marker_updated": marker.is_some(),
                    }));
                    ExitCode::SUCCESS
                }
                Err(e @ ManifestError::DuplicateAsset(_)) => rejected(&e.to_string()),
                Err(e) => failed(&e),
            }
        }

        Commands::Plan { payload } => {
            let request: ExportRequest = match serde_json::from_str(&payload) {
                Ok(r) => r,
                Err(e) => {
                    emit(&json!({ "success": false, "error": format!("Invalid payload: {}", e) }));
                    return ExitCode::FAILURE;
                }
            };

            match ExportPipeline::new(&manifest_path).plan(&request) {
                Ok(outcomes) => {
                    emit(&json!({ "success": true, "outcomes": outcomes }));
                    ExitCode::SUCCESS
                }
                Err(e) => failed(&e),
            }
        }

        Commands::Check => {
            let loaded = match manifest::load_with_report(&manifest_path) {
                Ok(l) => l,
                Err(e) => return failed(&e),
            };
            let report = Auditor::new().audit(&loaded.manifest);
            let digest = content_digest(&loaded.manifest).ok();
            let counts = loaded.manifest.counts();
            let backups = manifest::list_backups(&manifest_path).unwrap_or_default();

            emit(&json!({
                "manifest_path": manifest_path,
                "exists": loaded.existed,
                "repairs": loaded.repairs,
                "valid": report.valid,
                "violations": report.violations,
                "content_digest": digest,
                "total_expressions": counts.total_expressions,
                "total_markers": counts.total_markers,
                "processed_markers": counts.processed_markers,
                "backups": backups.len(),
            }));
            if report.valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }

        Commands::Catalog { path } => {
            let library = paths::library_path(&cli.project_root);
            match catalogs::ensure_catalog(&library, &path) {
                Ok(id) => {
                    emit(&json!({ "success": true, "catalog": path, "uuid": id }));
                    ExitCode::SUCCESS
                }
                Err(e) => failed(&e),
            }
        }

        Commands::SessionName { date } => {
            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let mocap_dir = paths::mocap_dir(&cli.project_root);
            match paths::next_session_number(&mocap_dir, date) {
                Ok(n) => {
                    let filename = naming::session_filename(date, n);
                    emit(&json!({
                        "filename": filename,
                        "path": mocap_dir.join(&filename),
                        "session_number": n,
                    }));
                    ExitCode::SUCCESS
                }
                Err(e) => failed(&e),
            }
        }

        Commands::Paths { character } => {
            emit(&layout(&cli.project_root, &manifest_path, character.as_deref()));
            ExitCode::SUCCESS
        }
    }
}

fn layout(root: &Path, manifest_path: &Path, character: Option<&str>) -> Value {
    json!({
        "project_root": root,
        "library": paths::library_path(root),
        "mocap_dir": paths::mocap_dir(root),
        "manifest": manifest_path,
        "expression_dir": character.map(|c| paths::expression_dir(root, c)),
    })
}

/// Sanitized character for `record --character`; an unusable name is an error.
fn character_override(character: Option<&str>) -> Result<Option<String>, NamingError> {
    character.map(naming::character_token).transpose()
}

fn emit(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("failed to serialize output: {}", e),
    }
}

/// Request understood but refused (duplicate, empty name, ...).
fn rejected(message: &str) -> ExitCode {
    emit(&json!({ "success": false, "error": message }));
    ExitCode::from(2)
}

fn failed(err: &dyn std::error::Error) -> ExitCode {
    emit(&json!({ "success": false, "error": err.to_string() }));
    ExitCode::FAILURE
}
