//! Contract Invariant Tests
//!
//! Manifest and naming guarantees exercised through the public API.

use std::collections::HashSet;
use std::fs;

use ekpv_core::{
    content_digest,
    manifest::{self, Manifest, ManifestError},
    naming::{sanitize, unique_asset_name, NamingError},
    pipeline::{ExportPipeline, ExportRequest, MarkerInput},
    Auditor,
};
use serde_json::Value;
use tempfile::tempdir;

fn populated_manifest() -> Manifest {
    let mut manifest = Manifest::new();
    for (i, (marker, session)) in [
        ("happy face", "SessionA.blend"),
        ("big SMILE", "SessionA.blend"),
        ("confused   look", "SessionB.blend"),
    ]
    .into_iter()
    .enumerate()
    {
        let frame = (i as i32 + 1) * 10;
        let asset = unique_asset_name("Patrick", &sanitize(marker), &manifest).unwrap();
        manifest
            .record_expression(&asset, session, frame, Some(marker), "")
            .unwrap();
        manifest.mark_processed(session, marker, &asset, frame);
    }
    // an unprocessed marker entry still counts toward total_markers
    manifest
        .marker_state
        .entry("SessionB.blend".to_string())
        .or_default()
        .insert("blink".to_string(), Default::default());
    manifest
}

#[test]
fn invariant_sanitize_examples() {
    assert_eq!(sanitize("happy face"), "Happy_Face");
    assert_eq!(sanitize("confused   look"), "Confused_Look");
    assert_eq!(sanitize("  trailing space "), "Trailing_Space");
    assert_eq!(sanitize("!!!"), "");

    let existing: HashSet<String> = HashSet::new();
    let err = unique_asset_name("Patrick", &sanitize("!!!"), &existing).unwrap_err();
    assert!(matches!(err, NamingError::EmptyMarkerName(_)));
}

#[test]
fn invariant_collision_gets_suffix() {
    let existing: HashSet<String> = ["FACE_PATRICK_Happy_Face".to_string()].into();
    assert_eq!(
        unique_asset_name("Patrick", "Happy_Face", &existing).unwrap(),
        "FACE_PATRICK_Happy_Face_01"
    );
}

#[test]
fn invariant_repeated_resolution_is_unique() {
    let mut existing: HashSet<String> = HashSet::new();
    for _ in 0..150 {
        let name = unique_asset_name("Patrick", "Smile", &existing).unwrap();
        assert!(existing.insert(name), "name handed out twice");
    }
    assert_eq!(existing.len(), 150);
}

#[test]
fn invariant_mark_processed_idempotent() {
    let mut manifest = populated_manifest();
    manifest.recompute_metadata();
    let before = manifest.clone();

    manifest.mark_processed("SessionA.blend", "happy face", "FACE_PATRICK_Happy_Face", 10);
    manifest.recompute_metadata();
    assert_eq!(before, manifest);
}

#[test]
fn invariant_session_isolation() {
    let mut manifest = Manifest::new();
    manifest.mark_processed("SessionA.blend", "smile", "FACE_PATRICK_Smile", 1);
    assert!(manifest.is_processed("SessionA.blend", "smile"));
    assert!(!manifest.is_processed("SessionB.blend", "smile"));

    manifest.mark_processed("SessionB.blend", "smile", "FACE_PATRICK_Smile_01", 7);
    assert_eq!(manifest.processed_asset("SessionA.blend", "smile"), Some("FACE_PATRICK_Smile"));
    assert_eq!(manifest.processed_asset("SessionB.blend", "smile"), Some("FACE_PATRICK_Smile_01"));
}

#[test]
fn invariant_save_load_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Expression_Manifest.json");

    let mut manifest = populated_manifest();
    let digest = content_digest(&manifest).unwrap();
    manifest::save(&path, &mut manifest).unwrap();

    let loaded = manifest::load(&path).unwrap();
    assert_eq!(loaded.expressions, manifest.expressions);
    assert_eq!(loaded.marker_state, manifest.marker_state);
    assert_eq!(content_digest(&loaded).unwrap(), digest);

    assert_eq!(loaded.metadata.total_expressions, 3);
    assert_eq!(loaded.metadata.total_markers, 4);
    assert_eq!(loaded.metadata.processed_markers, 3);
    assert!(Auditor::new().audit(&loaded).valid);
}

#[test]
fn invariant_save_is_deterministic() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.json");
    let b = dir.path().join("b.json");

    let mut first = populated_manifest();
    manifest::save(&a, &mut first).unwrap();
    let second = manifest::load(&a).unwrap();
    // same document, same timestamp: bytes must match
    let mut body = serde_json::to_string_pretty(&first).unwrap();
    body.push('\n');
    fs::write(&b, body).unwrap();

    assert_eq!(fs::read_to_string(&a).unwrap(), fs::read_to_string(&b).unwrap());
    assert_eq!(second, first);

    let raw: Value = serde_json::from_str(&fs::read_to_string(&a).unwrap()).unwrap();
    let names: Vec<_> = raw["expressions"].as_object().unwrap().keys().cloned().collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
}

#[test]
fn invariant_backup_reflects_prior_state() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Expression_Manifest.json");

    let mut manifest = populated_manifest();
    manifest::save(&path, &mut manifest).unwrap();
    let prior = fs::read(&path).unwrap();

    manifest
        .record_expression("FACE_PATRICK_Wink", "SessionC.blend", 99, Some("wink"), "")
        .unwrap();
    let outcome = manifest::save(&path, &mut manifest).unwrap();

    let handle = outcome.backup.expect("second save must back up the first");
    assert!(handle.verify().unwrap());
    assert_eq!(fs::read(&handle.path).unwrap(), prior);

    let backed_up = manifest::load(&handle.path).unwrap();
    assert_eq!(backed_up.expressions.len(), 3);
    assert!(!backed_up.expressions.contains_key("FACE_PATRICK_Wink"));
    assert_eq!(manifest::load(&path).unwrap().expressions.len(), 4);
}

#[test]
fn invariant_duplicate_asset_rejected() {
    let mut manifest = populated_manifest();
    let err = manifest
        .record_expression("FACE_PATRICK_Happy_Face", "SessionZ.blend", 1, None, "")
        .unwrap_err();
    assert!(matches!(err, ManifestError::DuplicateAsset(_)));
    assert_eq!(manifest.expressions["FACE_PATRICK_Happy_Face"].source_file, "SessionA.blend");
}

#[test]
fn invariant_corrupt_manifest_never_overwritten_by_export() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("m.json");
    fs::write(&path, b"{\"expressions\": ").unwrap();

    let pipeline = ExportPipeline::new(&path);
    let request = ExportRequest {
        session_file: "SessionA.blend".to_string(),
        character: "Patrick".to_string(),
        markers: vec![MarkerInput {
            name: "smile".to_string(),
            frame: 1,
        }],
        skip_processed: true,
        notes: None,
    };
    let mut capture = |_: &str, _: &MarkerInput| -> Result<(), String> { Ok(()) };
    assert!(pipeline.export(&request, &mut capture).is_err());
    assert_eq!(fs::read(&path).unwrap(), b"{\"expressions\": ");
}

#[test]
fn invariant_batch_export_end_to_end() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("_Library/Mocap/Face/Expression_Manifest.json");
    let pipeline = ExportPipeline::new(&path);

    let request: ExportRequest = serde_json::from_str(
        r#"{
            "session_file": "Session_2025-01-16_001.blend",
            "character": "Patrick",
            "markers": [
                {"name": "happy face", "frame": 10},
                {"name": "!!!", "frame": 20},
                {"name": "Happy Face", "frame": 30}
            ]
        }"#,
    )
    .unwrap();
    assert!(request.skip_processed);

    let mut captured = vec![];
    let mut capture = |asset: &str, marker: &MarkerInput| -> Result<(), String> {
        captured.push((asset.to_string(), marker.frame));
        Ok(())
    };
    let report = pipeline.export(&request, &mut capture).unwrap();

    assert_eq!(
        report.exported(),
        vec!["FACE_PATRICK_Happy_Face", "FACE_PATRICK_Happy_Face_01"]
    );
    assert_eq!(report.failures().len(), 1);
    assert_eq!(
        captured,
        vec![
            ("FACE_PATRICK_Happy_Face".to_string(), 10),
            ("FACE_PATRICK_Happy_Face_01".to_string(), 30)
        ]
    );

    let manifest = manifest::load(&path).unwrap();
    assert!(Auditor::new().audit(&manifest).valid);
    assert_eq!(manifest.metadata.processed_markers, 2);
}
