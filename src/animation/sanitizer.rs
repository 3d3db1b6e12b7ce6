//! Response Sanitizer
//!
//! Recovers a command sequence from free-form generated text.
//!
//! Accepted shapes, after stripping one optional surrounding code fence
//! (```` ``` ```` or ```` ```json ````):
//! - a bare JSON array of commands
//! - an object with a `commands` array (what JSON-object response modes produce)
//!
//! Anything else is a [`CadError::MalformedGeneration`] carrying a preview of
//! the raw text. There is no repair and no retry.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::types::{AnimationCommand, CadError, CommandSequence, Result};

/// One surrounding fence with an optional language tag
static FENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)\A\s*```[A-Za-z0-9_+.\-]*[ \t]*\r?\n?(.*?)\s*```\s*\z").ok());

/// Remove a single surrounding code fence, if present
pub fn strip_fence(text: &str) -> &str {
    FENCE
        .as_ref()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|body| body.as_str())
        .unwrap_or(text)
        .trim()
}

/// Parse generated text into a command sequence
pub fn sanitize_commands(raw: &str) -> Result<CommandSequence> {
    let body = strip_fence(raw);
    if body.is_empty() {
        return Err(CadError::malformed_generation("empty response", raw));
    }

    let value: Value = serde_json::from_str(body)
        .map_err(|e| CadError::malformed_generation(format!("not valid JSON: {}", e), raw))?;

    let list = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("commands") {
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(CadError::malformed_generation(
                    "`commands` is not a list",
                    raw,
                ));
            }
            None => {
                return Err(CadError::malformed_generation(
                    "object has no `commands` list",
                    raw,
                ));
            }
        },
        _ => {
            return Err(CadError::malformed_generation(
                "expected a list of commands",
                raw,
            ));
        }
    };

    if list.is_empty() {
        return Err(CadError::malformed_generation("command list is empty", raw));
    }

    let commands = list
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value::<AnimationCommand>(item).map_err(|e| {
                CadError::malformed_generation(format!("command {} is invalid: {}", index, e), raw)
            })
        })
        .collect::<Result<CommandSequence>>()?;

    debug!("Sanitized {} animation commands", commands.len());
    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AnimationAction;
    use proptest::prelude::*;

    const VALID: &str = r#"[
        {"target": "Cover:1", "action": "translate", "x": 0, "y": 0, "z": 50},
        {"target": "Shaft:1", "dbId": 7, "action": "rotate", "axis": [0, 0, 1], "angle": 90, "durationMs": 500}
    ]"#;

    #[test]
    fn test_bare_array() {
        let commands = sanitize_commands(VALID).unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1].db_id, Some(7));
    }

    #[test]
    fn test_fenced_with_language_tag() {
        let raw = format!("```json\n{}\n```", VALID);
        assert_eq!(sanitize_commands(&raw).unwrap(), sanitize_commands(VALID).unwrap());
    }

    #[test]
    fn test_fenced_without_language_tag() {
        let raw = format!("```\n{}\n```\n", VALID);
        assert_eq!(sanitize_commands(&raw).unwrap().len(), 2);
    }

    #[test]
    fn test_single_line_fence() {
        let raw = r#"```[{"target": "Lid", "action": "scale", "factor": 1.5}]```"#;
        let commands = sanitize_commands(raw).unwrap();
        assert_eq!(commands[0].action, AnimationAction::Scale { factor: 1.5 });
    }

    #[test]
    fn test_commands_envelope() {
        let raw = format!(r#"{{"commands": {}}}"#, VALID);
        assert_eq!(sanitize_commands(&raw).unwrap().len(), 2);
    }

    #[test]
    fn test_prose_is_malformed_and_preserved() {
        let raw = "Sure! Here is a lovely animation for your gearbox.";
        match sanitize_commands(raw) {
            Err(CadError::MalformedGeneration { raw: preview, .. }) => assert_eq!(preview, raw),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_wrong_shape_is_malformed() {
        assert!(matches!(
            sanitize_commands(r#"{"steps": []}"#),
            Err(CadError::MalformedGeneration { .. })
        ));
        assert!(matches!(
            sanitize_commands("42"),
            Err(CadError::MalformedGeneration { .. })
        ));
        assert!(matches!(
            sanitize_commands("```json\n[]\n```"),
            Err(CadError::MalformedGeneration { .. })
        ));
    }

    #[test]
    fn test_invalid_command_reports_index() {
        let raw = r#"[{"target": "A", "action": "scale", "factor": 2}, {"target": "B", "action": "wobble"}]"#;
        match sanitize_commands(raw) {
            Err(CadError::MalformedGeneration { reason, .. }) => assert!(reason.contains("command 1")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_only_one_fence_stripped() {
        assert_eq!(strip_fence("```\n```inner```\n```"), "```inner```");
    }

    /// Values with an exact short decimal form
    fn quarter() -> impl Strategy<Value = f64> {
        (-4000i32..4000).prop_map(|q| q as f64 / 4.0)
    }

    fn arb_command() -> impl Strategy<Value = AnimationCommand> {
        let action = prop_oneof![
            (quarter(), quarter(), quarter())
                .prop_map(|(x, y, z)| AnimationAction::Translate { x, y, z }),
            quarter().prop_map(|angle| AnimationAction::Rotate {
                axis: [0.0, 1.0, 0.0],
                angle
            }),
            (1i32..400).prop_map(|q| AnimationAction::Scale {
                factor: q as f64 / 4.0
            }),
        ];
        (
            "[A-Za-z][A-Za-z0-9 _:]{0,20}",
            proptest::option::of(0u64..100_000),
            action,
            proptest::option::of(0u64..10_000),
        )
            .prop_map(|(target, db_id, action, duration_ms)| AnimationCommand {
                target,
                db_id,
                action,
                duration_ms,
            })
    }

    proptest! {
        #[test]
        fn fenced_lists_parse_unchanged(
            commands in proptest::collection::vec(arb_command(), 1..8),
            tag in "(json|JSON|javascript)?",
        ) {
            let body = serde_json::to_string_pretty(&commands).unwrap();
            let raw = format!("```{}\n{}\n```", tag, body);
            prop_assert_eq!(sanitize_commands(&raw).unwrap(), commands);
        }

        #[test]
        fn arbitrary_text_never_panics(raw in "\\PC{0,200}") {
            if let Err(err) = sanitize_commands(&raw) {
                let malformed = matches!(err, CadError::MalformedGeneration { .. });
                prop_assert!(malformed, "unexpected error: {:?}", err);
            }
        }
    }
}
