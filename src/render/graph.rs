//! Workflow graph model: node-id -> node, kept in source order so that
//! kind-based lookups follow the order the graph was authored in.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLink(pub String, pub u32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
    Link(NodeLink),
    Opaque(Value),
}

impl InputValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn integer(value: i64) -> Self {
        Self::Number(Number::from(value))
    }

    /// `None` for NaN and infinities, which have no JSON representation.
    pub fn float(value: f64) -> Option<Self> {
        Number::from_f64(value).map(Self::Number)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }
}

pub type NodeInputs = BTreeMap<String, InputValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    #[serde(rename = "class_type")]
    pub kind: String,
    pub inputs: NodeInputs,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<NodeMeta>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GraphNode {
    pub fn title(&self) -> Option<&str> {
        self.meta.as_ref().and_then(|meta| meta.title.as_deref())
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.inputs.contains_key(field)
    }

    /// Writes `field` only when the node already declares it.
    pub fn patch_field(&mut self, field: &str, value: InputValue) -> bool {
        match self.inputs.get_mut(field) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn set_field(&mut self, field: &str, value: InputValue) {
        self.inputs.insert(field.to_string(), value);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GraphEntry {
    Node(GraphNode),
    /// Anything under a node id that is not node-shaped. Carried through
    /// untouched and never patched.
    Opaque(Value),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("workflow is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("workflow JSON must be an object keyed by node id")]
    NotAnObject,
    #[error("workflow node '{id}' with type '{expected_kind}' not found")]
    NodeNotFound { id: String, expected_kind: String },
    #[error("workflow has no node of type {}", .kinds.join(" | "))]
    KindNotFound { kinds: Vec<String> },
    #[error("workflow needs at least {required} nodes of type '{kind}', found {found}")]
    InsufficientMatches {
        kind: String,
        required: usize,
        found: usize,
    },
    #[error("workflow node '{id}' is malformed: {reason}")]
    MalformedNode { id: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkflowGraph {
    entries: Vec<(String, GraphEntry)>,
}

impl WorkflowGraph {
    pub fn parse(text: &str) -> Result<Self, GraphError> {
        let value = serde_json::from_str::<Value>(text)
            .map_err(|e| GraphError::InvalidJson(e.to_string()))?;
        let Value::Object(root) = value else {
            return Err(GraphError::NotAnObject);
        };

        let entries = root
            .into_iter()
            .map(|(id, raw)| {
                let entry = if is_node_shaped(&raw) {
                    match serde_json::from_value::<GraphNode>(raw.clone()) {
                        Ok(node) => GraphEntry::Node(node),
                        Err(_) => GraphEntry::Opaque(raw),
                    }
                } else {
                    GraphEntry::Opaque(raw)
                };
                (id, entry)
            })
            .collect();
        Ok(Self { entries })
    }

    pub fn to_value(&self) -> Value {
        let mut root = Map::with_capacity(self.entries.len());
        for (id, entry) in self.entries.iter() {
            let value = match entry {
                GraphEntry::Node(node) => {
                    serde_json::to_value(node).unwrap_or_else(|_| Value::Null)
                }
                GraphEntry::Opaque(raw) => raw.clone(),
            };
            root.insert(id.clone(), value);
        }
        Value::Object(root)
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&str, &GraphNode)> {
        self.entries.iter().filter_map(|(id, entry)| match entry {
            GraphEntry::Node(node) => Some((id.as_str(), node)),
            GraphEntry::Opaque(_) => None,
        })
    }

    pub fn entry(&self, id: &str) -> Option<&GraphEntry> {
        self.entries
            .iter()
            .find(|(entry_id, _)| entry_id == id)
            .map(|(_, entry)| entry)
    }

    pub fn locate_by_id(&self, id: &str, expected_kind: &str) -> Result<&GraphNode, GraphError> {
        self.locate_by_id_among(id, &[expected_kind])
    }

    /// Like `locate_by_id`, accepting any of `kinds`.
    pub fn locate_by_id_among(&self, id: &str, kinds: &[&str]) -> Result<&GraphNode, GraphError> {
        let not_found = || GraphError::NodeNotFound {
            id: id.to_string(),
            expected_kind: kinds.join(" | "),
        };
        match self.entry(id).ok_or_else(not_found)? {
            GraphEntry::Node(node) if kinds.contains(&node.kind.as_str()) => Ok(node),
            GraphEntry::Node(_) => Err(not_found()),
            GraphEntry::Opaque(raw) => {
                let declared_kind = raw.get("class_type").and_then(Value::as_str);
                if declared_kind.is_some_and(|kind| kinds.contains(&kind)) {
                    Err(GraphError::MalformedNode {
                        id: id.to_string(),
                        reason: String::from("node is not shaped as {class_type, inputs}"),
                    })
                } else {
                    Err(not_found())
                }
            }
        }
    }

    /// First node, in graph order, whose kind is any of `kinds`.
    pub fn locate_by_kind(&self, kinds: &[&str]) -> Result<(&str, &GraphNode), GraphError> {
        self.nodes()
            .find(|(_, node)| kinds.contains(&node.kind.as_str()))
            .ok_or_else(|| GraphError::KindNotFound {
                kinds: kinds.iter().map(|k| k.to_string()).collect(),
            })
    }

    /// First two nodes of `kind` in graph order.
    pub fn locate_pair_by_kind(&self, kind: &str) -> Result<[String; 2], GraphError> {
        let matches = self
            .nodes()
            .filter(|(_, node)| node.kind == kind)
            .map(|(id, _)| id.to_string())
            .collect::<Vec<_>>();
        match matches.as_slice() {
            [first, second, ..] => Ok([first.clone(), second.clone()]),
            _ => Err(GraphError::InsufficientMatches {
                kind: kind.to_string(),
                required: 2,
                found: matches.len(),
            }),
        }
    }

    pub fn node_mut(&mut self, id: &str) -> Result<&mut GraphNode, GraphError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|(entry_id, _)| entry_id == id)
            .map(|(_, entry)| entry);
        match entry {
            Some(GraphEntry::Node(node)) => Ok(node),
            Some(GraphEntry::Opaque(_)) => Err(GraphError::MalformedNode {
                id: id.to_string(),
                reason: String::from("node is not shaped as {class_type, inputs}"),
            }),
            None => Err(GraphError::NodeNotFound {
                id: id.to_string(),
                expected_kind: String::new(),
            }),
        }
    }

    /// Writes `value` to each alias field already present on every node whose
    /// kind is in `kinds`. Returns how many fields were written.
    pub fn sweep_aliases(&mut self, kinds: &[&str], aliases: &[&str], value: &InputValue) -> usize {
        let mut written = 0usize;
        for (_, entry) in self.entries.iter_mut() {
            let GraphEntry::Node(node) = entry else {
                continue;
            };
            if !kinds.contains(&node.kind.as_str()) {
                continue;
            }
            for alias in aliases {
                if node.patch_field(alias, value.clone()) {
                    written += 1;
                }
            }
        }
        written
    }
}

fn is_node_shaped(raw: &Value) -> bool {
    raw.get("class_type").map(Value::is_string).unwrap_or(false)
        && raw.get("inputs").map(Value::is_object).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"{
        "3": {"class_type": "KSampler", "inputs": {"seed": 5, "steps": 20, "cfg": 7.5, "model": ["4", 0], "sampler_name": "euler", "denoise": 1}},
        "load_image_1": {"class_type": "LoadImage", "inputs": {"image": "placeholder.png", "upload": "image"}, "_meta": {"title": "Start frame"}},
        "load_image_2": {"class_type": "LoadImage", "inputs": {"image": "other.png"}},
        "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "", "clip": ["4", 1]}},
        "notes": {"class_type": "Note", "inputs": "not an object"},
        "version": 2
    }"#;

    #[test]
    fn parse_rejects_invalid_json_and_non_objects() {
        assert!(matches!(
            WorkflowGraph::parse("{not json"),
            Err(GraphError::InvalidJson(_))
        ));
        assert_eq!(WorkflowGraph::parse("[1,2]"), Err(GraphError::NotAnObject));
        assert_eq!(WorkflowGraph::parse("\"x\""), Err(GraphError::NotAnObject));
    }

    #[test]
    fn round_trip_preserves_values_and_node_order() {
        let graph = WorkflowGraph::parse(SAMPLE).expect("sample parses");
        let original: Value = serde_json::from_str(SAMPLE).expect("sample is json");

        assert_eq!(graph.to_value(), original);
        assert_eq!(
            graph.node_ids().collect::<Vec<_>>(),
            vec!["3", "load_image_1", "load_image_2", "6", "notes", "version"]
        );
        let reparsed = WorkflowGraph::parse(graph.to_json().as_str()).expect("reparse");
        assert_eq!(reparsed, graph);
    }

    #[test]
    fn input_values_are_tagged_by_shape() {
        let graph = WorkflowGraph::parse(SAMPLE).expect("sample parses");
        let sampler = graph.locate_by_id("3", "KSampler").expect("sampler");
        assert_eq!(sampler.inputs.get("seed"), Some(&InputValue::integer(5)));
        assert_eq!(
            sampler.inputs.get("model"),
            Some(&InputValue::Link(NodeLink(String::from("4"), 0)))
        );
        assert_eq!(sampler.inputs.get("sampler_name"), Some(&InputValue::text("euler")));
        assert_eq!(
            graph
                .locate_by_id("load_image_1", "LoadImage")
                .expect("load image")
                .title(),
            Some("Start frame")
        );
    }

    #[test]
    fn locate_by_id_never_matches_a_different_kind() {
        let graph = WorkflowGraph::parse(SAMPLE).expect("sample parses");
        assert_eq!(
            graph.locate_by_id("3", "LoadImage"),
            Err(GraphError::NodeNotFound {
                id: String::from("3"),
                expected_kind: String::from("LoadImage"),
            })
        );
        assert!(matches!(
            graph.locate_by_id("missing", "LoadImage"),
            Err(GraphError::NodeNotFound { .. })
        ));
        assert!(matches!(
            graph.locate_by_id("notes", "Note"),
            Err(GraphError::MalformedNode { .. })
        ));
        assert_eq!(
            graph.locate_by_id_among("6", &["CLIPTextEncodeFlux", "LoadImage"]),
            Err(GraphError::NodeNotFound {
                id: String::from("6"),
                expected_kind: String::from("CLIPTextEncodeFlux | LoadImage"),
            })
        );
        assert!(graph
            .locate_by_id_among("6", &["CLIPTextEncodeFlux", "CLIPTextEncode"])
            .is_ok());
    }

    #[test]
    fn locate_by_kind_takes_first_in_graph_order() {
        let graph = WorkflowGraph::parse(SAMPLE).expect("sample parses");
        let (id, node) = graph
            .locate_by_kind(&["TextEncodeAceStepAudio", "LoadImage"])
            .expect("load image present");
        assert_eq!(id, "load_image_1");
        assert_eq!(node.kind, "LoadImage");

        assert_eq!(
            graph.locate_by_kind(&["SaveVideo"]),
            Err(GraphError::KindNotFound {
                kinds: vec![String::from("SaveVideo")],
            })
        );
    }

    #[test]
    fn pair_lookup_requires_two_matches() {
        let graph = WorkflowGraph::parse(SAMPLE).expect("sample parses");
        assert_eq!(
            graph.locate_pair_by_kind("LoadImage"),
            Ok([String::from("load_image_1"), String::from("load_image_2")])
        );
        assert_eq!(
            graph.locate_pair_by_kind("KSampler"),
            Err(GraphError::InsufficientMatches {
                kind: String::from("KSampler"),
                required: 2,
                found: 1,
            })
        );
    }

    #[test]
    fn pair_lookup_with_three_matches_picks_first_two() {
        let graph = WorkflowGraph::parse(
            &json!({
                "z": {"class_type": "LoadImage", "inputs": {"image": "z.png"}},
                "a": {"class_type": "LoadImage", "inputs": {"image": "a.png"}},
                "m": {"class_type": "LoadImage", "inputs": {"image": "m.png"}}
            })
            .to_string(),
        )
        .expect("graph parses");
        assert_eq!(
            graph.locate_pair_by_kind("LoadImage"),
            Ok([String::from("z"), String::from("a")])
        );
    }

    #[test]
    fn patch_field_only_touches_existing_fields() {
        let mut graph = WorkflowGraph::parse(SAMPLE).expect("sample parses");
        let node = graph.node_mut("6").expect("prompt node");
        assert!(node.patch_field("text", InputValue::text("a cat")));
        assert!(!node.patch_field("negative", InputValue::text("dog")));
        assert!(!node.has_field("negative"));
        node.set_field("width", InputValue::integer(512));
        assert_eq!(node.inputs.get("width"), Some(&InputValue::integer(512)));
        assert!(matches!(
            graph.node_mut("notes"),
            Err(GraphError::MalformedNode { .. })
        ));
    }

    #[test]
    fn sweep_writes_present_aliases_on_recognized_kinds_only() {
        let mut graph = WorkflowGraph::parse(
            &json!({
                "1": {"class_type": "KSampler", "inputs": {"seed": 1}},
                "2": {"class_type": "KSamplerAdvanced", "inputs": {"noise_seed": 1}},
                "3": {"class_type": "RandomNoise", "inputs": {"noise_seed": 1}}
            })
            .to_string(),
        )
        .expect("graph parses");
        let written = graph.sweep_aliases(
            &["KSampler", "KSamplerAdvanced"],
            &["seed", "noise_seed"],
            &InputValue::integer(42),
        );
        assert_eq!(written, 2);
        let value = graph.to_value();
        assert_eq!(value["1"]["inputs"]["seed"], json!(42));
        assert_eq!(value["2"]["inputs"]["noise_seed"], json!(42));
        assert_eq!(value["3"]["inputs"]["noise_seed"], json!(1));
        assert!(value["1"]["inputs"].get("noise_seed").is_none());
    }

    #[test]
    fn non_finite_floats_are_not_representable() {
        assert!(InputValue::float(f64::NAN).is_none());
        assert_eq!(
            InputValue::float(1.5),
            Some(InputValue::Number(Number::from_f64(1.5).expect("finite")))
        );
    }
}
