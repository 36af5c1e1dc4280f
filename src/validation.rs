//! Manifest Audit - Rule/Report Separation
//!
//! Rules inspect a loaded manifest and produce structured violations.
//! The auditor runs every rule and decides validity from severities.

use serde::{Deserialize, Serialize};

use crate::manifest::Manifest;
use crate::naming::ASSET_PREFIX;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestViolation {
    pub rule: String,
    pub severity: ViolationSeverity,
    pub message: String,
    /// Where in the document, e.g. `marker_state/Session_A.blend/smile`.
    pub location: Option<String>,
    pub remediation: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub valid: bool,
    pub violations: Vec<ManifestViolation>,
}

impl AuditReport {
    pub fn has_errors(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.severity == ViolationSeverity::Error)
    }

    pub fn by_rule<'a>(&'a self, rule: &'a str) -> impl Iterator<Item = &'a ManifestViolation> + 'a {
        self.violations.iter().filter(move |v| v.rule == rule)
    }
}

/// Audit rule - produces violations
pub trait ManifestRule {
    fn name(&self) -> &'static str;
    fn check(&self, manifest: &Manifest) -> Vec<ManifestViolation>;
}

fn marker_location(session: &str, marker: &str) -> String {
    format!("marker_state/{}/{}", session, marker)
}

/// Processed markers must point at an asset that exists.
pub struct DanglingAssetRule;

impl ManifestRule for DanglingAssetRule {
    fn name(&self) -> &'static str {
        "dangling_asset"
    }

    fn check(&self, manifest: &Manifest) -> Vec<ManifestViolation> {
        let mut violations = vec![];
        for (session, markers) in &manifest.marker_state {
            for (marker, state) in markers {
                let Some(asset) = state.asset_name.as_deref() else {
                    continue;
                };
                if state.processed && !manifest.expressions.contains_key(asset) {
                    violations.push(ManifestViolation {
                        rule: self.name().to_string(),
                        severity: ViolationSeverity::Error,
                        message: format!("Processed marker references unknown asset {}", asset),
                        location: Some(marker_location(session, marker)),
                        remediation: vec![
                            "Re-export the marker".to_string(),
                            "Restore the expression entry from a manifest backup".to_string(),
                        ],
                    });
                }
            }
        }
        violations
    }
}

pub struct ProcessedWithoutAssetRule;

impl ManifestRule for ProcessedWithoutAssetRule {
    fn name(&self) -> &'static str {
        "processed_without_asset"
    }

    fn check(&self, manifest: &Manifest) -> Vec<ManifestViolation> {
        manifest
            .marker_state
            .iter()
            .flat_map(|(session, markers)| {
                markers
                    .iter()
                    .filter(|(_, state)| state.processed && state.asset_name.is_none())
                    .map(move |(marker, _)| ManifestViolation {
                        rule: self.name().to_string(),
                        severity: ViolationSeverity::Error,
                        message: "Marker is processed but names no asset".to_string(),
                        location: Some(marker_location(session, marker)),
                        remediation: vec!["Re-export the marker".to_string()],
                    })
            })
            .collect()
    }
}

/// Cached counts drifted from contents (hand edits, older writers).
pub struct MetadataDriftRule;

impl ManifestRule for MetadataDriftRule {
    fn name(&self) -> &'static str {
        "metadata_drift"
    }

    fn check(&self, manifest: &Manifest) -> Vec<ManifestViolation> {
        let counts = manifest.counts();
        let meta = &manifest.metadata;
        let fields = [
            ("total_expressions", meta.total_expressions, counts.total_expressions),
            ("total_markers", meta.total_markers, counts.total_markers),
            ("processed_markers", meta.processed_markers, counts.processed_markers),
        ];

        fields
            .into_iter()
            .filter(|(_, cached, actual)| cached != actual)
            .map(|(field, cached, actual)| ManifestViolation {
                rule: self.name().to_string(),
                severity: ViolationSeverity::Warning,
                message: format!("metadata.{} is {} but contents hold {}", field, cached, actual),
                location: Some(format!("metadata/{}", field)),
                remediation: vec!["Save the manifest to recompute metadata".to_string()],
            })
            .collect()
    }
}

pub struct AssetNamingRule;

impl ManifestRule for AssetNamingRule {
    fn name(&self) -> &'static str {
        "asset_naming"
    }

    fn check(&self, manifest: &Manifest) -> Vec<ManifestViolation> {
        let prefix = format!("{}_", ASSET_PREFIX);
        manifest
            .expressions
            .keys()
            .filter(|name| !name.starts_with(&prefix) || name.split('_').count() < 3)
            .map(|name| ManifestViolation {
                rule: self.name().to_string(),
                severity: ViolationSeverity::Info,
                message: format!("Asset {} does not follow {}<CHARACTER>_<Label>", name, prefix),
                location: Some(format!("expressions/{}", name)),
                remediation: vec![],
            })
            .collect()
    }
}

/// Auditor orchestrates rules
pub struct Auditor {
    rules: Vec<Box<dyn ManifestRule>>,
}

impl Auditor {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(DanglingAssetRule),
                Box::new(ProcessedWithoutAssetRule),
                Box::new(MetadataDriftRule),
                Box::new(AssetNamingRule),
            ],
        }
    }

    pub fn with_rule(mut self, rule: Box<dyn ManifestRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn audit(&self, manifest: &Manifest) -> AuditReport {
        let violations: Vec<_> = self
            .rules
            .iter()
            .flat_map(|rule| rule.check(manifest))
            .collect();

        let valid = !violations
            .iter()
            .any(|v| v.severity == ViolationSeverity::Error);

        AuditReport { valid, violations }
    }
}

impl Default for Auditor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consistent_manifest() -> Manifest {
        let mut manifest = Manifest::new();
        manifest
            .record_expression("FACE_P_Smile", "Session_A.blend", 3, Some("smile"), "")
            .unwrap();
        manifest.mark_processed("Session_A.blend", "smile", "FACE_P_Smile", 3);
        manifest.recompute_metadata();
        manifest
    }

    #[test]
    fn test_consistent_manifest_is_clean() {
        let report = Auditor::new().audit(&consistent_manifest());
        assert!(report.valid);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn test_dangling_asset_is_error() {
        let mut manifest = consistent_manifest();
        manifest.expressions.clear();
        manifest.recompute_metadata();

        let report = Auditor::new().audit(&manifest);
        assert!(!report.valid);
        let dangling: Vec<_> = report.by_rule("dangling_asset").collect();
        assert_eq!(dangling.len(), 1);
        assert_eq!(
            dangling[0].location.as_deref(),
            Some("marker_state/Session_A.blend/smile")
        );
    }

    #[test]
    fn test_processed_without_asset_is_error() {
        let mut manifest = consistent_manifest();
        if let Some(state) = manifest
            .marker_state
            .get_mut("Session_A.blend")
            .and_then(|m| m.get_mut("smile"))
        {
            state.asset_name = None;
        }
        let report = Auditor::new().audit(&manifest);
        assert!(report.has_errors());
        assert_eq!(report.by_rule("processed_without_asset").count(), 1);
    }

    #[test]
    fn test_metadata_drift_is_warning_only() {
        let mut manifest = consistent_manifest();
        manifest.metadata.total_expressions = 7;
        let report = Auditor::new().audit(&manifest);
        assert!(report.valid);
        let drift: Vec<_> = report.by_rule("metadata_drift").collect();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].severity, ViolationSeverity::Warning);
    }

    #[test]
    fn test_off_pattern_name_is_info() {
        let mut manifest = consistent_manifest();
        manifest.record_expression("New", "File", 1, None, "").unwrap();
        manifest.recompute_metadata();
        let report = Auditor::new().audit(&manifest);
        assert!(report.valid);
        assert_eq!(report.by_rule("asset_naming").count(), 1);
    }
}
