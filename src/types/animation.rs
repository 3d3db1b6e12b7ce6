//! Animation Command Types
//!
//! Ordered disassembly/reassembly operations produced by the generation
//! service. Each command targets one component and applies a single action.

use serde::{Deserialize, Serialize};

/// Action applied to a component, tagged by `action`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum AnimationAction {
    /// Move by an offset in model units
    Translate { x: f64, y: f64, z: f64 },
    /// Rotate about an axis by an angle in degrees
    Rotate { axis: [f64; 3], angle: f64 },
    /// Scale uniformly
    Scale { factor: f64 },
}

impl AnimationAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Translate { .. } => "translate",
            Self::Rotate { .. } => "rotate",
            Self::Scale { .. } => "scale",
        }
    }
}

/// One step of an animation script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationCommand {
    /// Component reference: the node name from the object hierarchy
    pub target: String,
    /// Viewer object id, when the generator resolved one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_id: Option<u64>,
    #[serde(flatten)]
    pub action: AnimationAction,
    /// Step duration in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Ordered animation script
pub type CommandSequence = Vec<AnimationCommand>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_shape() {
        let cmd = AnimationCommand {
            target: "Bolt:1".to_string(),
            db_id: Some(42),
            action: AnimationAction::Translate {
                x: 0.0,
                y: 0.0,
                z: 25.0,
            },
            duration_ms: Some(800),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["action"], "translate");
        assert_eq!(json["target"], "Bolt:1");
        assert_eq!(json["dbId"], 42);
        assert_eq!(json["durationMs"], 800);
        assert_eq!(json["z"], 25.0);
    }

    #[test]
    fn test_unknown_action_rejected() {
        let raw = r#"{"target": "Cover", "action": "explode", "factor": 2.0}"#;
        assert!(serde_json::from_str::<AnimationCommand>(raw).is_err());
    }

    #[test]
    fn test_rotate_parses() {
        let raw = r#"{"target": "Lid", "action": "rotate", "axis": [0, 0, 1], "angle": 90}"#;
        let cmd: AnimationCommand = serde_json::from_str(raw).unwrap();
        assert_eq!(cmd.action.kind(), "rotate");
        assert!(cmd.db_id.is_none());
    }
}
