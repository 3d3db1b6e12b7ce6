//! Animation Prompt Construction
//!
//! Turns stored hierarchy and property artifacts into a bounded prompt.
//! The hierarchy is rendered as an indented outline (names plus object ids),
//! properties as compact JSON; each part is capped so very large assemblies
//! still fit the generator's context.

use serde_json::Value;

use crate::constants::generation::{MAX_HIERARCHY_CHARS, MAX_PROPERTIES_CHARS};

pub const SYSTEM_PROMPT: &str = "You are a mechanical engineer choreographing an exploded-view \
animation of a CAD assembly. Respond ONLY with a JSON object of the form \
{\"commands\": [...]}. Each command has: \"target\" (component name exactly as listed), \
optional \"dbId\" (the listed id), \"action\" (one of \"translate\", \"rotate\", \"scale\"), \
the action parameters (translate: \"x\", \"y\", \"z\" offsets in model units; rotate: \
\"axis\" as [x, y, z] and \"angle\" in degrees; scale: \"factor\"), and optional \
\"durationMs\". Order commands as a disassembly sequence followed by the reverse reassembly.";

/// Rendered prompt parts
#[derive(Debug, Clone)]
pub struct AnimationPrompt {
    pub system: &'static str,
    pub user: String,
}

/// Build the prompt for one translated model
pub fn build_prompt(hierarchy: &Value, properties: &Value) -> AnimationPrompt {
    let mut outline = String::new();
    render_outline(objects_of(hierarchy), 0, &mut outline);
    if outline.is_empty() {
        outline = serde_json::to_string(hierarchy).unwrap_or_default();
    }

    let properties = serde_json::to_string(properties_of(properties)).unwrap_or_default();

    let user = format!(
        "Component hierarchy:\n{}\n\nComponent properties:\n{}\n\nProduce the animation commands.",
        truncate(&outline, MAX_HIERARCHY_CHARS),
        truncate(&properties, MAX_PROPERTIES_CHARS),
    );

    AnimationPrompt {
        system: SYSTEM_PROMPT,
        user,
    }
}

/// `data.objects` of a hierarchy document, or the document itself
fn objects_of(hierarchy: &Value) -> &Value {
    hierarchy
        .pointer("/data/objects")
        .unwrap_or(hierarchy)
}

fn properties_of(properties: &Value) -> &Value {
    properties
        .pointer("/data/collection")
        .unwrap_or(properties)
}

fn render_outline(node: &Value, depth: usize, out: &mut String) {
    match node {
        Value::Array(items) => {
            for item in items {
                render_outline(item, depth, out);
            }
        }
        Value::Object(map) => {
            let name = map.get("name").and_then(Value::as_str);
            let id = map.get("objectid").and_then(Value::as_u64);
            let child_depth = if let Some(name) = name {
                out.push_str(&"  ".repeat(depth));
                out.push_str("- ");
                out.push_str(name);
                if let Some(id) = id {
                    out.push_str(&format!(" (dbId {})", id));
                }
                out.push('\n');
                depth + 1
            } else {
                depth
            };
            if let Some(children) = map.get("objects") {
                render_outline(children, child_depth, out);
            }
        }
        _ => {}
    }
}

/// Cap at `max` characters on a char boundary, marking the cut
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max).collect();
    cut.push_str("\n[truncated]");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outline_is_indented() {
        let hierarchy = json!({
            "data": {"objects": [{
                "objectid": 1, "name": "Gearbox",
                "objects": [{"objectid": 2, "name": "Housing:1"}]
            }]}
        });
        let prompt = build_prompt(&hierarchy, &json!({}));
        assert!(prompt.user.contains("- Gearbox (dbId 1)\n  - Housing:1 (dbId 2)"));
        assert!(prompt.system.contains("commands"));
    }

    #[test]
    fn test_properties_collection_used() {
        let properties = json!({"data": {"collection": [{"name": "Shaft:1"}]}});
        let prompt = build_prompt(&json!([]), &properties);
        assert!(prompt.user.contains(r#"[{"name":"Shaft:1"}]"#));
    }

    #[test]
    fn test_oversized_properties_truncated() {
        let big: Vec<Value> = (0..5000)
            .map(|i| json!({"objectid": i, "name": format!("Part{}", i)}))
            .collect();
        let prompt = build_prompt(&json!([]), &Value::Array(big));
        assert!(prompt.user.contains("[truncated]"));
        assert!(prompt.user.len() < MAX_PROPERTIES_CHARS + MAX_HIERARCHY_CHARS + 500);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("ääää", 2), "ää\n[truncated]");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
