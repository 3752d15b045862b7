use std::collections::BTreeMap;

use serde_json::Value;
use tracing::trace;

/// Node classes whose file inputs are staged per request.
const INPUT_CLASSES: &[&str] = &["LoadImage", "LoadImageMask", "VHS_LoadVideo"];
/// The inputs those classes load from.
const INPUT_FIELDS: &[&str] = &["image", "video"];

/// Replace logical input filenames with their staged counterparts.
///
/// Handles both graph shapes behind one accessor seam: the server-API shape
/// (a map of `node_id -> {class_type, inputs}`) and the editor shape (a
/// top-level `nodes` array). Unrecognized node classes are left untouched.
/// Returns how many references were rewritten.
pub(crate) fn rewrite_workflow(workflow: &mut Value, staged: &BTreeMap<String, String>) -> usize {
    if staged.is_empty() {
        return 0;
    }
    let mut rewritten = 0;
    for mut node in nodes_mut(workflow) {
        if !INPUT_CLASSES.contains(&node.class_type()) {
            continue;
        }
        rewritten += node.rewrite_file_inputs(staged);
    }
    rewritten
}

/// The per-shape node accessor.
enum NodeMut<'a> {
    /// `{"class_type": …, "inputs": {…}}`
    Api(&'a mut serde_json::Map<String, Value>),
    /// `{"type": …, "widgets_values": […]}`
    Editor(&'a mut serde_json::Map<String, Value>),
}

fn nodes_mut(workflow: &mut Value) -> Vec<NodeMut<'_>> {
    let Some(root) = workflow.as_object_mut() else {
        return Vec::new();
    };
    // The editor shape is identified by its top-level `nodes` array.
    if root.contains_key("nodes") {
        let Some(Value::Array(nodes)) = root.get_mut("nodes") else {
            return Vec::new();
        };
        return nodes
            .iter_mut()
            .filter_map(Value::as_object_mut)
            .map(NodeMut::Editor)
            .collect();
    }
    root.values_mut()
        .filter_map(Value::as_object_mut)
        .map(NodeMut::Api)
        .collect()
}

impl NodeMut<'_> {
    fn class_type(&self) -> &str {
        let (map, key) = match self {
            Self::Api(map) => (map, "class_type"),
            Self::Editor(map) => (map, "type"),
        };
        map.get(key).and_then(Value::as_str).unwrap_or_default()
    }

    fn rewrite_file_inputs(&mut self, staged: &BTreeMap<String, String>) -> usize {
        let mut rewritten = 0;
        match self {
            Self::Api(map) => {
                let Some(Value::Object(inputs)) = map.get_mut("inputs") else {
                    return 0;
                };
                for field in INPUT_FIELDS {
                    if let Some(value) = inputs.get_mut(*field) {
                        rewritten += rewrite_value(value, staged);
                    }
                }
            }
            Self::Editor(map) => {
                let Some(Value::Array(widgets)) = map.get_mut("widgets_values") else {
                    return 0;
                };
                for value in widgets {
                    rewritten += rewrite_value(value, staged);
                }
            }
        }
        rewritten
    }
}

fn rewrite_value(value: &mut Value, staged: &BTreeMap<String, String>) -> usize {
    let Some(current) = value.as_str() else {
        return 0;
    };
    let Some(materialized) = staged.get(current) else {
        return 0;
    };
    trace!("Rewriting input `{current}` -> `{materialized}`");
    *value = Value::String(materialized.clone());
    1
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::rewrite_workflow;

    fn staged() -> BTreeMap<String, String> {
        BTreeMap::from([(
            "img1.png".to_string(),
            "req-1_a1b2c3d4_img1.png".to_string(),
        )])
    }

    #[test]
    fn rewrites_the_api_shape() {
        let mut workflow = json!({
            "1": {"class_type": "LoadImage", "inputs": {"image": "img1.png"}},
            "2": {"class_type": "KSampler", "inputs": {"image": "img1.png", "seed": 7}},
            "3": {"class_type": "LoadImageMask", "inputs": {"image": "other.png"}}
        });
        let rewritten = rewrite_workflow(&mut workflow, &staged());
        assert_eq!(rewritten, 1);
        assert_eq!(workflow["1"]["inputs"]["image"], "req-1_a1b2c3d4_img1.png");
        // Unrecognized classes are untouched even if the name matches.
        assert_eq!(workflow["2"]["inputs"]["image"], "img1.png");
        // Unstaged names are untouched.
        assert_eq!(workflow["3"]["inputs"]["image"], "other.png");
    }

    #[test]
    fn rewrites_the_editor_shape() {
        let mut workflow = json!({
            "nodes": [
                {"id": 1, "type": "LoadImage", "widgets_values": ["img1.png", "image"]},
                {"id": 2, "type": "CLIPTextEncode", "widgets_values": ["img1.png"]}
            ],
            "links": []
        });
        let rewritten = rewrite_workflow(&mut workflow, &staged());
        assert_eq!(rewritten, 1);
        assert_eq!(
            workflow["nodes"][0]["widgets_values"][0],
            "req-1_a1b2c3d4_img1.png"
        );
        assert_eq!(workflow["nodes"][1]["widgets_values"][0], "img1.png");
    }

    #[test]
    fn video_inputs_rewrite_too() {
        let mut workflow = json!({
            "7": {"class_type": "VHS_LoadVideo", "inputs": {"video": "img1.png"}}
        });
        assert_eq!(rewrite_workflow(&mut workflow, &staged()), 1);
        assert_eq!(workflow["7"]["inputs"]["video"], "req-1_a1b2c3d4_img1.png");
    }

    #[test]
    fn empty_mapping_is_a_noop() {
        let mut workflow = json!({"1": {"class_type": "LoadImage", "inputs": {"image": "x.png"}}});
        let before = workflow.clone();
        assert_eq!(rewrite_workflow(&mut workflow, &BTreeMap::new()), 0);
        assert_eq!(workflow, before);
    }
}
