//! Reachability between subgraphs via entity keys.
//!
//! Subgraphs are nodes; every key a pair of subgraphs shares (same entity
//! type, same key selection set, usable as source on one side and target on
//! the other) is its own directed edge. Connections between two subgraphs are
//! all acyclic edge paths, direct ones first.

use hashbrown::HashMap;
use indexmap::IndexMap;
use indexmap::IndexSet;
use petgraph::graph::DiGraph;
use petgraph::graph::EdgeIndex;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use serde::Serialize;

use crate::config::SubgraphHash;

/// One key of one entity type on one subgraph, with the directions it can be
/// used in. `source`: the subgraph can provide the key fields (none of them
/// is external and unprovided). `target`: the subgraph can be entered through
/// the key (its entity resolver is enabled).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyInfo {
    pub subgraph_hash: SubgraphHash,
    pub type_name: String,
    pub selection_set: String,
    pub field_paths: Vec<String>,
    pub source: bool,
    pub target: bool,
}

/// One hop between two subgraphs over a concrete key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyJump {
    pub from: SubgraphHash,
    pub to: SubgraphHash,
    pub type_name: String,
    pub selection_set: String,
    pub field_paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
pub enum ConnectionKind {
    Direct,
    Indirect,
}

/// A way to move an entity from one subgraph to another: one jump, or a chain
/// of them through intermediate subgraphs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceConnection {
    pub jumps: Vec<KeyJump>,
    pub kind: ConnectionKind,
}

impl SourceConnection {
    pub fn source(&self) -> SubgraphHash {
        self.jumps[0].from
    }

    pub fn target(&self) -> SubgraphHash {
        self.jumps[self.jumps.len() - 1].to
    }
}

#[derive(Debug, Clone)]
struct KeyEdge {
    type_name: String,
    selection_set: String,
    field_paths: Vec<String>,
}

/// The jump graph for one entity type family, rebuilt per selection pass from
/// the keys collected so far.
#[derive(Debug)]
pub struct KeyJumpGraph {
    graph: DiGraph<SubgraphHash, KeyEdge>,
    nodes: IndexMap<SubgraphHash, NodeIndex>,
    cache: HashMap<(SubgraphHash, SubgraphHash), Option<Vec<SourceConnection>>>,
}

impl KeyJumpGraph {
    pub fn new(keys: &IndexMap<SubgraphHash, Vec<KeyInfo>>) -> Self {
        let mut graph = DiGraph::new();
        let mut nodes = IndexMap::new();
        for &hash in keys.keys() {
            nodes.entry(hash).or_insert_with(|| graph.add_node(hash));
        }
        for (&from_hash, from_keys) in keys {
            for (&to_hash, to_keys) in keys {
                if from_hash == to_hash {
                    continue;
                }
                for from_key in from_keys.iter().filter(|k| k.source) {
                    for to_key in to_keys.iter().filter(|k| {
                        k.target
                            && k.type_name == from_key.type_name
                            && k.selection_set == from_key.selection_set
                    }) {
                        graph.add_edge(
                            nodes[&from_hash],
                            nodes[&to_hash],
                            KeyEdge {
                                type_name: to_key.type_name.clone(),
                                selection_set: to_key.selection_set.clone(),
                                field_paths: to_key.field_paths.clone(),
                            },
                        );
                    }
                }
            }
        }
        Self {
            graph,
            nodes,
            cache: HashMap::new(),
        }
    }

    /// All acyclic connections from `source` to `target`, direct jumps before
    /// indirect chains. `None` when the two subgraphs are not connected.
    pub fn paths(
        &mut self,
        source: SubgraphHash,
        target: SubgraphHash,
    ) -> Option<Vec<SourceConnection>> {
        if let Some(cached) = self.cache.get(&(source, target)) {
            return cached.clone();
        }
        let result = self.compute_paths(source, target);
        self.cache.insert((source, target), result.clone());
        result
    }

    fn compute_paths(
        &self,
        source: SubgraphHash,
        target: SubgraphHash,
    ) -> Option<Vec<SourceConnection>> {
        let (&from, &to) = match (self.nodes.get(&source), self.nodes.get(&target)) {
            (Some(f), Some(t)) => (f, t),
            _ => return None,
        };
        let mut connections = Vec::new();
        let mut visited: IndexSet<NodeIndex> = IndexSet::new();
        visited.insert(from);
        let mut trail: Vec<EdgeIndex> = Vec::new();
        self.dfs(from, to, &mut visited, &mut trail, &mut connections);
        if connections.is_empty() {
            return None;
        }
        // Direct before indirect; discovery order within each class.
        connections.sort_by_key(|c| c.jumps.len() > 1);
        Some(connections)
    }

    fn dfs(
        &self,
        current: NodeIndex,
        target: NodeIndex,
        visited: &mut IndexSet<NodeIndex>,
        trail: &mut Vec<EdgeIndex>,
        out: &mut Vec<SourceConnection>,
    ) {
        for edge in self.graph.edges(current) {
            let next = edge.target();
            if visited.contains(&next) {
                continue;
            }
            trail.push(edge.id());
            if next == target {
                out.push(self.connection_from_trail(trail));
            } else {
                visited.insert(next);
                self.dfs(next, target, visited, trail, out);
                visited.shift_remove(&next);
            }
            trail.pop();
        }
    }

    fn connection_from_trail(&self, trail: &[EdgeIndex]) -> SourceConnection {
        let jumps: Vec<KeyJump> = trail
            .iter()
            .map(|&edge| {
                let (from, to) = self
                    .graph
                    .edge_endpoints(edge)
                    .unwrap_or((NodeIndex::new(0), NodeIndex::new(0)));
                let weight = &self.graph[edge];
                KeyJump {
                    from: self.graph[from],
                    to: self.graph[to],
                    type_name: weight.type_name.clone(),
                    selection_set: weight.selection_set.clone(),
                    field_paths: weight.field_paths.clone(),
                }
            })
            .collect();
        let kind = if jumps.len() == 1 {
            ConnectionKind::Direct
        } else {
            ConnectionKind::Indirect
        };
        SourceConnection { jumps, kind }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn key(
        hash: SubgraphHash,
        type_name: &str,
        selection_set: &str,
        source: bool,
        target: bool,
    ) -> KeyInfo {
        KeyInfo {
            subgraph_hash: hash,
            type_name: type_name.to_string(),
            selection_set: selection_set.to_string(),
            field_paths: selection_set.split(' ').map(str::to_string).collect(),
            source,
            target,
        }
    }

    const A: SubgraphHash = SubgraphHash(11);
    const B: SubgraphHash = SubgraphHash(22);
    const C: SubgraphHash = SubgraphHash(33);
    const D: SubgraphHash = SubgraphHash(44);

    #[test]
    fn direct_connection_over_shared_key() {
        let mut keys = IndexMap::new();
        keys.insert(A, vec![key(A, "User", "id", true, true)]);
        keys.insert(B, vec![key(B, "User", "id", true, true)]);
        let mut graph = KeyJumpGraph::new(&keys);

        let paths = graph.paths(A, B).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].kind, ConnectionKind::Direct);
        assert_eq!(paths[0].jumps[0].from, A);
        assert_eq!(paths[0].jumps[0].to, B);
        assert_eq!(paths[0].jumps[0].selection_set, "id");
    }

    #[test]
    fn no_connection_when_keys_differ() {
        let mut keys = IndexMap::new();
        keys.insert(A, vec![key(A, "User", "id", true, true)]);
        keys.insert(B, vec![key(B, "User", "uuid", true, true)]);
        let mut graph = KeyJumpGraph::new(&keys);

        assert_eq!(graph.paths(A, B), None);
    }

    #[test]
    fn no_connection_into_disabled_resolver() {
        let mut keys = IndexMap::new();
        keys.insert(A, vec![key(A, "User", "id", true, true)]);
        keys.insert(B, vec![key(B, "User", "id", true, false)]);
        let mut graph = KeyJumpGraph::new(&keys);

        assert_eq!(graph.paths(A, B), None);
        // The other direction still works.
        assert!(graph.paths(B, A).is_some());
    }

    #[test]
    fn indirect_chain_through_intermediate_subgraphs() {
        // A can only reach D by hopping A -> B -> C -> D over three distinct keys.
        let mut keys = IndexMap::new();
        keys.insert(A, vec![key(A, "User", "id", true, true)]);
        keys.insert(
            B,
            vec![
                key(B, "User", "id", true, true),
                key(B, "User", "uuid", true, true),
            ],
        );
        keys.insert(
            C,
            vec![
                key(C, "User", "uuid", true, true),
                key(C, "User", "email", true, true),
            ],
        );
        keys.insert(D, vec![key(D, "User", "email", true, true)]);
        let mut graph = KeyJumpGraph::new(&keys);

        let paths = graph.paths(A, D).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].kind, ConnectionKind::Indirect);
        let hops: Vec<(SubgraphHash, SubgraphHash)> =
            paths[0].jumps.iter().map(|j| (j.from, j.to)).collect();
        assert_eq!(hops, vec![(A, B), (B, C), (C, D)]);
    }

    #[test]
    fn direct_sorts_before_indirect() {
        let mut keys = IndexMap::new();
        keys.insert(
            A,
            vec![
                key(A, "User", "id", true, true),
                key(A, "User", "uuid", true, true),
            ],
        );
        keys.insert(
            B,
            vec![
                key(B, "User", "uuid", true, true),
                key(B, "User", "email", true, true),
            ],
        );
        keys.insert(
            C,
            vec![
                key(C, "User", "id", true, true),
                key(C, "User", "email", true, true),
            ],
        );
        let mut graph = KeyJumpGraph::new(&keys);

        let paths = graph.paths(A, C).unwrap();
        assert!(paths.len() >= 2);
        assert_eq!(paths[0].kind, ConnectionKind::Direct);
        assert_eq!(paths[0].jumps.len(), 1);
        assert!(paths.iter().skip(1).all(|p| p.kind == ConnectionKind::Indirect
            || p.jumps.len() == 1));
    }

    #[test]
    fn unknown_subgraphs_have_no_paths() {
        let mut keys = IndexMap::new();
        keys.insert(A, vec![key(A, "User", "id", true, true)]);
        let mut graph = KeyJumpGraph::new(&keys);

        assert_eq!(graph.paths(A, SubgraphHash(99)), None);
        assert_eq!(graph.paths(SubgraphHash(99), A), None);
    }
}
