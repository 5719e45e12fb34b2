//! Graph node and edge model.
//!
//! Nodes carry a closed [`NodeKind`] variant rather than an open string, one
//! case per entity kind the symbol mapping can produce, so every consumer
//! can match exhaustively.

use serde::{Deserialize, Serialize};

use crate::classify::ConfigType;
use crate::ids::{NodeId, ProjectId};

/// The kind of entity a graph node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Project,
    File,
    Config,
    Module,
    Namespace,
    Class,
    Interface,
    Function,
    Method,
    Variable,
    Enum,
    Annotation,
    Parameter,
    Other,
}

/// Relationship kind between two nodes, deduplicated per (source, target, kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    Contains,
    References,
    Calls,
    Imports,
    InheritsFrom,
    Implements,
    Overrides,
    PartOf,
    DependsOn,
    HasType,
    HasParameter,
    Returns,
    Throws,
    AnnotatedBy,
}

/// Source location of a code entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// One node in a project's code graph.
///
/// Created once per (id, uri) pair; effectively immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub uri: String,
    pub name: String,
    pub kind: NodeKind,
    pub project_id: ProjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fully_qualified_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_type: Option<ConfigType>,
}

impl GraphNode {
    #[must_use]
    pub fn new(uri: impl Into<String>, name: impl Into<String>, kind: NodeKind, project_id: ProjectId) -> Self {
        Self {
            id: NodeId::new(),
            uri: uri.into(),
            name: name.into(),
            kind,
            project_id,
            location: None,
            fully_qualified_name: None,
            config_type: None,
        }
    }

    #[must_use]
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    #[must_use]
    pub fn with_fully_qualified_name(mut self, fqn: impl Into<String>) -> Self {
        self.fully_qualified_name = Some(fqn.into());
        self
    }

    #[must_use]
    pub fn with_config_type(mut self, config_type: ConfigType) -> Self {
        self.config_type = Some(config_type);
        self
    }

    /// Key under which duplicate nodes collapse within one job's graph.
    #[must_use]
    pub fn dedup_key(&self) -> (NodeId, String) {
        (self.id, self.uri.clone())
    }
}

/// One relation in a project's code graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    #[serde(rename = "type")]
    pub kind: RelationKind,
}

impl Edge {
    #[must_use]
    pub fn new(source: NodeId, target: NodeId, kind: RelationKind) -> Self {
        Self {
            source,
            target,
            kind,
        }
    }

    /// Key under which duplicate edges collapse within one job's graph.
    #[must_use]
    pub fn dedup_key(&self) -> (NodeId, NodeId, RelationKind) {
        (self.source, self.target, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_kind_serializes_screaming_snake() {
        let json = serde_json::to_value(RelationKind::InheritsFrom).unwrap();
        assert_eq!(json, "INHERITS_FROM");
        assert_eq!(serde_json::to_value(RelationKind::Contains).unwrap(), "CONTAINS");
    }

    #[test]
    fn edge_kind_serializes_as_type_field() {
        let edge = Edge::new(NodeId::new(), NodeId::new(), RelationKind::Contains);
        let json = serde_json::to_value(edge).unwrap();
        assert_eq!(json["type"], "CONTAINS");
        assert!(json.get("kind").is_none());
    }

    #[test]
    fn node_optional_fields_omitted_when_absent() {
        let node = GraphNode::new("file:///a.py", "a.py", NodeKind::File, ProjectId::new());
        let json = serde_json::to_value(&node).unwrap();
        assert!(json.get("location").is_none());
        assert!(json.get("fully_qualified_name").is_none());
        assert!(json.get("config_type").is_none());
    }

    #[test]
    fn node_roundtrips_with_location() {
        let node = GraphNode::new("file:///a.py", "foo", NodeKind::Function, ProjectId::new())
            .with_location(Location {
                file: "/a.py".to_string(),
                start_line: 3,
                end_line: 9,
            })
            .with_fully_qualified_name("a.foo");
        let json = serde_json::to_value(&node).unwrap();
        let back: GraphNode = serde_json::from_value(json).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn dedup_keys_distinguish_kind() {
        let a = NodeId::new();
        let b = NodeId::new();
        let contains = Edge::new(a, b, RelationKind::Contains);
        let references = Edge::new(a, b, RelationKind::References);
        assert_ne!(contains.dedup_key(), references.dedup_key());
    }
}
