//! Name Resolver - Marker Labels to Asset Identifiers
//!
//! Free-text marker labels become `FACE_<CHARACTER>_<Label>` asset names.
//! Uniqueness is checked against a [`NameRegistry`], normally the manifest's
//! `expressions` map.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::hash::BuildHasher;

use chrono::NaiveDate;
use thiserror::Error;

/// Prefix shared by every expression asset.
pub const ASSET_PREFIX: &str = "FACE";

/// Highest collision suffix tried before giving up (`_01` .. `_999`).
pub const MAX_SUFFIX: u32 = 999;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NamingError {
    #[error("Marker name '{0}' is empty after sanitization")]
    EmptyMarkerName(String),

    #[error("Character name '{0}' is empty after sanitization")]
    EmptyCharacterName(String),

    #[error("No free suffix left for asset name {0} (tried _01.._{max})", max = MAX_SUFFIX)]
    NameSpaceExhausted(String),
}

/// Anything that can answer "is this asset name already taken?"
pub trait NameRegistry {
    fn contains_name(&self, name: &str) -> bool;
}

impl<S: BuildHasher> NameRegistry for HashSet<String, S> {
    fn contains_name(&self, name: &str) -> bool {
        self.contains(name)
    }
}

impl NameRegistry for BTreeSet<String> {
    fn contains_name(&self, name: &str) -> bool {
        self.contains(name)
    }
}

impl<V> NameRegistry for BTreeMap<String, V> {
    fn contains_name(&self, name: &str) -> bool {
        self.contains_key(name)
    }
}

/// Sanitize a marker label for use in asset naming.
///
/// Whitespace runs become underscores, anything outside `[A-Za-z0-9_]` is
/// dropped, and the first letter of each underscore-separated word is
/// upper-cased. The rest of each word keeps its case: `"big SMILE"` becomes
/// `"Big_SMILE"`.
///
/// Returns an empty string when nothing survives; callers turn that into
/// [`NamingError::EmptyMarkerName`].
pub fn sanitize(raw_label: &str) -> String {
    let underscored = raw_label.split_whitespace().collect::<Vec<_>>().join("_");

    let cleaned: String = underscored
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();

    cleaned
        .split('_')
        .filter(|word| !word.is_empty())
        .map(capitalize_first)
        .collect::<Vec<_>>()
        .join("_")
}

fn capitalize_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// Canonical character token: sanitized, then upper-cased.
pub fn character_token(character: &str) -> Result<String, NamingError> {
    let token = sanitize(character).to_ascii_uppercase();
    if token.is_empty() {
        return Err(NamingError::EmptyCharacterName(character.to_string()));
    }
    Ok(token)
}

/// Build `FACE_{CHARACTER}_{label}` and, if taken, append the first free
/// zero-padded suffix (`_01`, `_02`, ...).
///
/// `sanitized_label` is expected to be the output of [`sanitize`].
pub fn unique_asset_name(
    character: &str,
    sanitized_label: &str,
    existing: &impl NameRegistry,
) -> Result<String, NamingError> {
    if sanitized_label.is_empty() {
        return Err(NamingError::EmptyMarkerName(sanitized_label.to_string()));
    }
    let base = format!("{}_{}_{}", ASSET_PREFIX, character_token(character)?, sanitized_label);

    if !existing.contains_name(&base) {
        return Ok(base);
    }

    (1..=MAX_SUFFIX)
        .map(|idx| format!("{}_{:02}", base, idx))
        .find(|candidate| !existing.contains_name(candidate))
        .ok_or(NamingError::NameSpaceExhausted(base))
}

/// Sanitize a raw marker label and resolve a unique asset name for it.
pub fn resolve_asset_name(
    character: &str,
    raw_label: &str,
    existing: &impl NameRegistry,
) -> Result<String, NamingError> {
    let label = sanitize(raw_label);
    if label.is_empty() {
        return Err(NamingError::EmptyMarkerName(raw_label.to_string()));
    }
    unique_asset_name(character, &label, existing)
}

/// Direct pose asset formatter: `FACE_<CHARACTER>_<Expression>[_NN]`.
///
/// Unlike [`sanitize`] this keeps the expression's case as typed and only
/// swaps spaces for underscores.
pub fn pose_asset_name(character: &str, expression: &str, index: Option<u32>) -> String {
    let clean: String = expression
        .trim()
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    let clean = clean.trim_matches('_');

    let name = format!("{}_{}_{}", ASSET_PREFIX, character.to_uppercase(), clean);
    match index {
        Some(idx) => format!("{}_{:02}", name, idx),
        None => name,
    }
}

/// Character segment of a `FACE_<CHAR>_<Label>` name.
pub fn character_from_asset_name(asset_name: &str) -> Option<&str> {
    asset_name.split('_').nth(1).filter(|s| !s.is_empty())
}

/// `Session_<YYYY-MM-DD>_<NNN>.blend`
pub fn session_filename(date: NaiveDate, session_number: u32) -> String {
    format!("Session_{}_{:03}.blend", date.format("%Y-%m-%d"), session_number)
}

/// Keep only characters safe in file names: `[A-Za-z0-9._-]`.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_examples() {
        assert_eq!(sanitize("happy face"), "Happy_Face");
        assert_eq!(sanitize("confused   look"), "Confused_Look");
        assert_eq!(sanitize("  trailing space "), "Trailing_Space");
        assert_eq!(sanitize("!!!"), "");
    }

    #[test]
    fn test_sanitize_preserves_tail_case() {
        assert_eq!(sanitize("big SMILE"), "Big_SMILE");
        assert_eq!(sanitize("eyeBrow raise"), "EyeBrow_Raise");
    }

    #[test]
    fn test_sanitize_tabs_and_specials() {
        assert_eq!(sanitize("wide\tgrin!"), "Wide_Grin");
        assert_eq!(sanitize("__snarl__ 2"), "Snarl_2");
        assert_eq!(sanitize("half-smile"), "Halfsmile");
    }

    #[test]
    fn test_unique_name_no_collision() {
        let existing: HashSet<String> = HashSet::new();
        let name = unique_asset_name("Patrick", "Happy_Face", &existing).unwrap();
        assert_eq!(name, "FACE_PATRICK_Happy_Face");
    }

    #[test]
    fn test_unique_name_collision() {
        let existing: HashSet<String> = ["FACE_PATRICK_Happy_Face".to_string()].into();
        let name = unique_asset_name("Patrick", "Happy_Face", &existing).unwrap();
        assert_eq!(name, "FACE_PATRICK_Happy_Face_01");
    }

    #[test]
    fn test_unique_name_skips_taken_suffixes() {
        let existing: BTreeSet<String> = [
            "FACE_PATRICK_Smile".to_string(),
            "FACE_PATRICK_Smile_01".to_string(),
            "FACE_PATRICK_Smile_02".to_string(),
        ]
        .into();
        let name = unique_asset_name("patrick", "Smile", &existing).unwrap();
        assert_eq!(name, "FACE_PATRICK_Smile_03");
    }

    #[test]
    fn test_unique_name_widens_past_two_digits() {
        let mut existing: HashSet<String> = HashSet::new();
        existing.insert("FACE_P_Smile".to_string());
        for idx in 1..=99 {
            existing.insert(format!("FACE_P_Smile_{:02}", idx));
        }
        let name = unique_asset_name("p", "Smile", &existing).unwrap();
        assert_eq!(name, "FACE_P_Smile_100");
    }

    #[test]
    fn test_unique_name_exhausted() {
        let mut existing: HashSet<String> = HashSet::new();
        existing.insert("FACE_P_Smile".to_string());
        for idx in 1..=MAX_SUFFIX {
            existing.insert(format!("FACE_P_Smile_{:02}", idx));
        }
        let err = unique_asset_name("p", "Smile", &existing).unwrap_err();
        assert_eq!(err, NamingError::NameSpaceExhausted("FACE_P_Smile".to_string()));
    }

    #[test]
    fn test_character_is_sanitized() {
        let existing: HashSet<String> = HashSet::new();
        let name = unique_asset_name("mary jane!", "Smile", &existing).unwrap();
        assert_eq!(name, "FACE_MARY_JANE_Smile");

        let err = unique_asset_name("???", "Smile", &existing).unwrap_err();
        assert!(matches!(err, NamingError::EmptyCharacterName(_)));
    }

    #[test]
    fn test_resolve_rejects_empty_label() {
        let existing: HashSet<String> = HashSet::new();
        let err = resolve_asset_name("Patrick", "!!!", &existing).unwrap_err();
        assert_eq!(err, NamingError::EmptyMarkerName("!!!".to_string()));
    }

    #[test]
    fn test_pose_asset_name() {
        assert_eq!(pose_asset_name("Patrick", "Smile Confident", None), "FACE_PATRICK_Smile_Confident");
        assert_eq!(pose_asset_name("Patrick", "Smile", Some(1)), "FACE_PATRICK_Smile_01");
        assert_eq!(pose_asset_name("Patrick", "Smile! @#$", None), "FACE_PATRICK_Smile");
    }

    #[test]
    fn test_session_filename() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 16).unwrap();
        assert_eq!(session_filename(date, 1), "Session_2025-01-16_001.blend");
    }

    #[test]
    fn test_character_from_asset_name() {
        assert_eq!(character_from_asset_name("FACE_TEST_Smile"), Some("TEST"));
        assert_eq!(character_from_asset_name("New"), None);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Take 01/a:b.blend"), "Take01ab.blend");
    }
}
