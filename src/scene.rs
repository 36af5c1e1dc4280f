//! Scene Inspection
//!
//! The host binding implements [`SceneInspector`]; the heuristics here only
//! see object names and a few flags through it. Manifest and naming code
//! never depend on this module.

use serde::{Deserialize, Serialize};

/// Mesh object names tried first when looking for the character body.
pub const MESH_NAME_CANDIDATES: [&str; 3] = ["HG_Body", "Body", "CharacterMesh"];

/// Character used when the rig name does not carry one.
pub const GENERIC_CHARACTER: &str = "GENERIC";

/// Read-only view of the host scene.
pub trait SceneInspector {
    /// Opaque host object reference.
    type Handle;

    fn find_character_mesh(&self) -> Option<Self::Handle>;
    fn find_control_rig(&self) -> Option<Self::Handle>;

    fn object_name(&self, handle: &Self::Handle) -> String;
    /// Whether the object has an active animation action.
    fn has_action(&self, handle: &Self::Handle) -> bool;
    /// Whether the object's animation data is in tweak mode.
    fn in_tweak_mode(&self, handle: &Self::Handle) -> bool;
}

/// Name heuristic for facial control rigs.
pub fn is_control_rig_name(name: &str) -> bool {
    name.contains("FaceitControlRig") || name.to_lowercase().contains("control_rig")
}

/// Position of `name` in [`MESH_NAME_CANDIDATES`]; lower is preferred.
pub fn mesh_name_rank(name: &str) -> Option<usize> {
    MESH_NAME_CANDIDATES.iter().position(|candidate| *candidate == name)
}

/// Bone name heuristic for rigs found by armature contents.
pub fn is_facial_control_bone(bone_name: &str) -> bool {
    bone_name.contains("c_eyelid") || bone_name.contains("c_eye")
}

/// Character name carried by a rig name such as `PATRICK_FaceitControlRig`.
///
/// The first `_`-segment counts only if it is all upper-case; anything else
/// yields [`GENERIC_CHARACTER`].
pub fn character_name(rig_name: &str) -> String {
    let Some((first, _)) = rig_name.split_once('_') else {
        return GENERIC_CHARACTER.to_string();
    };
    let has_letters = first.chars().any(char::is_alphabetic);
    if has_letters && first.chars().all(|c| !c.is_lowercase()) {
        first.to_string()
    } else {
        GENERIC_CHARACTER.to_string()
    }
}

pub fn character_for_scene<S: SceneInspector>(scene: &S) -> Option<String> {
    scene
        .find_control_rig()
        .map(|rig| character_name(&scene.object_name(&rig)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MocapState {
    /// No control rig action yet
    NoBake,
    /// Baked, but the mesh still carries its shape-key action
    NeedsCleanup,
    /// Cleaned, control rig action not in tweak mode
    NeedsActivation,
    ReadyToSave,
}

pub fn detect_mocap_state<S: SceneInspector>(scene: &S) -> MocapState {
    let Some(rig) = scene.find_control_rig().filter(|rig| scene.has_action(rig)) else {
        return MocapState::NoBake;
    };

    let mesh_has_action = scene
        .find_character_mesh()
        .map_or(false, |mesh| scene.has_action(&mesh));
    if mesh_has_action {
        return MocapState::NeedsCleanup;
    }

    if scene.in_tweak_mode(&rig) {
        MocapState::ReadyToSave
    } else {
        MocapState::NeedsActivation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeObject {
        name: String,
        action: bool,
        tweak: bool,
    }

    #[derive(Default)]
    struct FakeScene {
        mesh: Option<FakeObject>,
        rig: Option<FakeObject>,
    }

    impl SceneInspector for FakeScene {
        type Handle = usize;

        fn find_character_mesh(&self) -> Option<usize> {
            self.mesh.as_ref().map(|_| 0)
        }

        fn find_control_rig(&self) -> Option<usize> {
            self.rig.as_ref().map(|_| 1)
        }

        fn object_name(&self, handle: &usize) -> String {
            self.object(*handle).map(|o| o.name.clone()).unwrap_or_default()
        }

        fn has_action(&self, handle: &usize) -> bool {
            self.object(*handle).map_or(false, |o| o.action)
        }

        fn in_tweak_mode(&self, handle: &usize) -> bool {
            self.object(*handle).map_or(false, |o| o.tweak)
        }
    }

    impl FakeScene {
        fn object(&self, handle: usize) -> Option<&FakeObject> {
            match handle {
                0 => self.mesh.as_ref(),
                _ => self.rig.as_ref(),
            }
        }
    }

    fn rig(name: &str, action: bool, tweak: bool) -> Option<FakeObject> {
        Some(FakeObject {
            name: name.to_string(),
            action,
            tweak,
        })
    }

    #[test]
    fn test_character_name() {
        assert_eq!(character_name("PATRICK_FaceitControlRig"), "PATRICK");
        assert_eq!(character_name("Patrick_FaceitControlRig"), "GENERIC");
        assert_eq!(character_name("FaceitControlRig"), "GENERIC");
        assert_eq!(character_name("123_rig"), "GENERIC");
    }

    #[test]
    fn test_rig_name_heuristics() {
        assert!(is_control_rig_name("PATRICK_FaceitControlRig"));
        assert!(is_control_rig_name("face_Control_Rig.001"));
        assert!(!is_control_rig_name("Armature"));
        assert!(is_facial_control_bone("c_eyelid_upper.L"));
        assert!(!is_facial_control_bone("spine_01"));
        assert_eq!(mesh_name_rank("HG_Body"), Some(0));
        assert_eq!(mesh_name_rank("Body"), Some(1));
        assert_eq!(mesh_name_rank("Cube"), None);
    }

    #[test]
    fn test_detect_mocap_state() {
        let mut scene = FakeScene::default();
        assert_eq!(detect_mocap_state(&scene), MocapState::NoBake);

        scene.rig = rig("PATRICK_FaceitControlRig", true, false);
        scene.mesh = rig("HG_Body", true, false);
        assert_eq!(detect_mocap_state(&scene), MocapState::NeedsCleanup);

        scene.mesh = rig("HG_Body", false, false);
        assert_eq!(detect_mocap_state(&scene), MocapState::NeedsActivation);

        scene.rig = rig("PATRICK_FaceitControlRig", true, true);
        assert_eq!(detect_mocap_state(&scene), MocapState::ReadyToSave);
        assert_eq!(character_for_scene(&scene).as_deref(), Some("PATRICK"));
    }
}
