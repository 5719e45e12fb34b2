//! LSP symbol to graph node mapping.

use std::collections::HashMap;

use codemap_lsp::SymbolInformation;
use codemap_types::{GraphNode, Location, NodeId, NodeKind, ProjectId};

/// Total mapping from the LSP `SymbolKind` numeric space onto the closed
/// node-kind enum. Anything outside the protocol's 1..=26 range lands on
/// `Other` rather than failing.
#[must_use]
pub fn node_kind_for(symbol_kind: u32) -> NodeKind {
    match symbol_kind {
        1 | 2 | 4 => NodeKind::Module,
        3 => NodeKind::Namespace,
        5 | 23 => NodeKind::Class,
        6 => NodeKind::Method,
        7 | 8 | 13..=21 | 24 => NodeKind::Variable,
        9 | 12 | 25 => NodeKind::Function,
        10 | 22 => NodeKind::Enum,
        11 => NodeKind::Interface,
        26 => NodeKind::Parameter,
        _ => NodeKind::Other,
    }
}

/// Build a graph node for one returned symbol. The LSP `detail` string, when
/// a server provides one, is carried as the fully qualified name.
#[must_use]
pub fn map_symbol(symbol: &SymbolInformation, project_id: ProjectId, origin_file: &str) -> GraphNode {
    let location = Location {
        file: origin_file.to_string(),
        start_line: symbol.location.range.start.line,
        end_line: symbol.location.range.end.line,
    };
    let mut node = GraphNode::new(
        symbol.location.uri.clone(),
        symbol.name.clone(),
        node_kind_for(symbol.kind),
        project_id,
    )
    .with_location(location);
    if let Some(detail) = &symbol.detail {
        node = node.with_fully_qualified_name(detail.clone());
    }
    node
}

/// A symbol retained for later relationship resolution.
pub struct RegisteredSymbol {
    pub raw: serde_json::Value,
    pub name: String,
    pub kind: NodeKind,
    pub origin_file: String,
}

/// In-memory registry of every symbol node emitted during a run.
#[derive(Default)]
pub struct SymbolRegistry {
    entries: HashMap<NodeId, RegisteredSymbol>,
}

impl SymbolRegistry {
    pub fn record(&mut self, node: &GraphNode, raw: serde_json::Value, origin_file: &str) {
        self.entries.insert(
            node.id,
            RegisteredSymbol {
                raw,
                name: node.name.clone(),
                kind: node.kind,
                origin_file: origin_file.to_string(),
            },
        );
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&RegisteredSymbol> {
        self.entries.get(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemap_lsp::parse_symbol;

    #[test]
    fn mapping_covers_every_protocol_kind() {
        let expected = [
            (1, NodeKind::Module),
            (2, NodeKind::Module),
            (3, NodeKind::Namespace),
            (4, NodeKind::Module),
            (5, NodeKind::Class),
            (6, NodeKind::Method),
            (7, NodeKind::Variable),
            (8, NodeKind::Variable),
            (9, NodeKind::Function),
            (10, NodeKind::Enum),
            (11, NodeKind::Interface),
            (12, NodeKind::Function),
            (13, NodeKind::Variable),
            (14, NodeKind::Variable),
            (15, NodeKind::Variable),
            (16, NodeKind::Variable),
            (17, NodeKind::Variable),
            (18, NodeKind::Variable),
            (19, NodeKind::Variable),
            (20, NodeKind::Variable),
            (21, NodeKind::Variable),
            (22, NodeKind::Enum),
            (23, NodeKind::Class),
            (24, NodeKind::Variable),
            (25, NodeKind::Function),
            (26, NodeKind::Parameter),
        ];
        for (kind, node_kind) in expected {
            assert_eq!(node_kind_for(kind), node_kind, "symbol kind {kind}");
        }
    }

    #[test]
    fn mapping_is_total_outside_the_protocol_range() {
        assert_eq!(node_kind_for(0), NodeKind::Other);
        assert_eq!(node_kind_for(27), NodeKind::Other);
        assert_eq!(node_kind_for(99), NodeKind::Other);
    }

    fn sample_symbol() -> serde_json::Value {
        serde_json::json!({
            "name": "Foo",
            "kind": 5,
            "detail": "pkg.module.Foo",
            "location": {
                "uri": "file:///proj/a.py",
                "range": {
                    "start": { "line": 3, "character": 0 },
                    "end": { "line": 10, "character": 0 }
                }
            }
        })
    }

    #[test]
    fn maps_symbol_into_located_node() {
        let raw = sample_symbol();
        let symbol = parse_symbol(&raw).unwrap();
        let project_id = ProjectId::new();

        let node = map_symbol(&symbol, project_id, "/proj/a.py");
        assert_eq!(node.kind, NodeKind::Class);
        assert_eq!(node.name, "Foo");
        assert_eq!(node.project_id, project_id);
        assert_eq!(node.fully_qualified_name.as_deref(), Some("pkg.module.Foo"));
        let location = node.location.unwrap();
        assert_eq!((location.start_line, location.end_line), (3, 10));
    }

    #[test]
    fn registry_records_and_clears() {
        let raw = sample_symbol();
        let symbol = parse_symbol(&raw).unwrap();
        let node = map_symbol(&symbol, ProjectId::new(), "/proj/a.py");

        let mut registry = SymbolRegistry::default();
        registry.record(&node, raw, "/proj/a.py");
        assert_eq!(registry.len(), 1);
        let entry = registry.get(node.id).unwrap();
        assert_eq!(entry.name, "Foo");
        assert_eq!(entry.origin_file, "/proj/a.py");

        registry.clear();
        assert!(registry.is_empty());
    }
}
