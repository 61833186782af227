//! The suggestion index: every (field, subgraph) pair that could serve a
//! field, arranged over a response-shaped tree for cheap neighborhood
//! queries during selection.

use hashbrown::HashMap;
use serde::Serialize;

use crate::config::SubgraphHash;
use crate::jumps::SourceConnection;
use crate::operation::FieldRef;

/// Synthetic id of a response-tree node. Offset so that field refs and tree
/// ids can never be confused in logs.
pub type TreeNodeId = u64;

pub const TREE_ROOT_ID: TreeNodeId = u64::MAX;
const TREE_ID_OFFSET: u64 = 100;

pub fn tree_node_id(field: FieldRef) -> TreeNodeId {
    TREE_ID_OFFSET + field.0 as u64
}

/// Why a suggestion was selected. Only recorded when reason tracking is
/// enabled; purely diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
pub enum SelectionReason {
    #[strum(serialize = "unique")]
    Unique,
    #[strum(serialize = "unique: ancestor on same subgraph")]
    UniqueAncestor,
    #[strum(serialize = "unique: leaf child on same subgraph")]
    UniqueLeafChild,
    #[strum(serialize = "unique: leaf sibling on same subgraph")]
    UniqueLeafSibling,
    #[strum(serialize = "duplicate: parent selected on same subgraph")]
    SameSourceParent,
    #[strum(serialize = "duplicate: child selected on same subgraph")]
    SameSourceChild,
    #[strum(serialize = "duplicate: sibling selected on same subgraph")]
    SameSourceSibling,
    #[strum(serialize = "duplicate: entity root reachable from selected ancestor")]
    ReachableEntityRoot,
    #[strum(serialize = "duplicate: chained to reachable entity root")]
    ReachableAncestorChain,
    #[strum(serialize = "duplicate: first resolvable leaf")]
    FirstLeaf,
    #[strum(serialize = "duplicate: most resolvable children")]
    MostChildren,
    #[strum(serialize = "pinned by earlier pass")]
    Pinned,
}

/// One way of resolving one field: a subgraph that can serve it, with the
/// facts selection needs to rank it.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSuggestion {
    pub subgraph_id: String,
    pub subgraph_hash: SubgraphHash,
    pub type_name: String,
    pub field_name: String,
    pub field_ref: FieldRef,
    pub path: String,
    pub parent_path: String,
    pub parent_path_without_fragment: Option<String>,
    pub on_fragment: bool,
    pub is_root_node: bool,
    pub is_external: bool,
    pub is_provided: bool,
    pub is_leaf: bool,
    pub is_typename: bool,
    /// The subgraph has the type but every key on it has its entity resolver
    /// disabled, so the type cannot be entered through this subgraph.
    pub disabled_entity_resolver: bool,
    pub is_entity_interface: bool,
    /// Field is part of a usable key, so the subgraph can always produce it
    /// even when it is marked external.
    pub is_required_key_field: bool,
    /// Suggestion belongs to a subtree replaced by an abstract rewrite.
    pub is_orphan: bool,
    pub possible_type_names: Vec<String>,
    pub selected: bool,
    pub selection_reasons: Vec<SelectionReason>,
    /// For entity roots picked via the jump graph: how to get there from the
    /// selected ancestor's subgraph.
    pub requires_key: Option<SourceConnection>,
}

impl NodeSuggestion {
    pub fn is_selectable(&self) -> bool {
        !self.is_orphan && (!self.is_external || self.is_provided || self.is_required_key_field)
    }
}

#[derive(Debug, Clone)]
struct TreeNode {
    id: TreeNodeId,
    parent: Option<usize>,
    children: Vec<usize>,
    removed: bool,
}

/// Tree mirroring the shape of the response, one node per field ref.
#[derive(Debug, Clone)]
pub struct ResponseTree {
    nodes: Vec<TreeNode>,
    index: HashMap<TreeNodeId, usize>,
}

impl Default for ResponseTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseTree {
    pub fn new() -> Self {
        let root = TreeNode {
            id: TREE_ROOT_ID,
            parent: None,
            children: Vec::new(),
            removed: false,
        };
        let mut index = HashMap::new();
        index.insert(TREE_ROOT_ID, 0);
        Self {
            nodes: vec![root],
            index,
        }
    }

    pub fn add_node(&mut self, parent: TreeNodeId, id: TreeNodeId) {
        if self.index.contains_key(&id) {
            return;
        }
        let parent_slot = match self.index.get(&parent) {
            Some(&slot) => slot,
            None => return,
        };
        let slot = self.nodes.len();
        self.nodes.push(TreeNode {
            id,
            parent: Some(parent_slot),
            children: Vec::new(),
            removed: false,
        });
        self.nodes[parent_slot].children.push(slot);
        self.index.insert(id, slot);
    }

    pub fn contains(&self, id: TreeNodeId) -> bool {
        self.index
            .get(&id)
            .is_some_and(|&slot| !self.nodes[slot].removed)
    }

    pub fn parent_of(&self, id: TreeNodeId) -> Option<TreeNodeId> {
        let slot = *self.index.get(&id)?;
        let parent = self.nodes[slot].parent?;
        if self.nodes[parent].removed || self.nodes[parent].id == TREE_ROOT_ID {
            return None;
        }
        Some(self.nodes[parent].id)
    }

    pub fn children_of(&self, id: TreeNodeId) -> Vec<TreeNodeId> {
        let Some(&slot) = self.index.get(&id) else {
            return Vec::new();
        };
        self.nodes[slot]
            .children
            .iter()
            .filter(|&&c| !self.nodes[c].removed)
            .map(|&c| self.nodes[c].id)
            .collect()
    }

    pub fn siblings_of(&self, id: TreeNodeId) -> Vec<TreeNodeId> {
        let Some(&slot) = self.index.get(&id) else {
            return Vec::new();
        };
        let Some(parent) = self.nodes[slot].parent else {
            return Vec::new();
        };
        self.nodes[parent]
            .children
            .iter()
            .filter(|&&c| c != slot && !self.nodes[c].removed)
            .map(|&c| self.nodes[c].id)
            .collect()
    }

    /// Breadth-first node ids, root excluded.
    pub fn bfs_order(&self) -> Vec<TreeNodeId> {
        let mut order = Vec::new();
        let mut queue = std::collections::VecDeque::from([0usize]);
        while let Some(slot) = queue.pop_front() {
            for &child in &self.nodes[slot].children {
                if self.nodes[child].removed {
                    continue;
                }
                order.push(self.nodes[child].id);
                queue.push_back(child);
            }
        }
        order
    }

    /// Drop the whole subtree below `id`, keeping the node itself. Returns
    /// the removed node ids.
    pub fn remove_children(&mut self, id: TreeNodeId) -> Vec<TreeNodeId> {
        let Some(&slot) = self.index.get(&id) else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        let mut queue: Vec<usize> = self.nodes[slot].children.clone();
        while let Some(current) = queue.pop() {
            if self.nodes[current].removed {
                continue;
            }
            self.nodes[current].removed = true;
            removed.push(self.nodes[current].id);
            self.index.remove(&self.nodes[current].id);
            queue.extend(self.nodes[current].children.iter().copied());
        }
        self.nodes[slot].children.clear();
        removed
    }
}

/// All suggestions of one planning pass plus the indexes selection works on.
#[derive(Debug, Default)]
pub struct NodeSuggestions {
    items: Vec<NodeSuggestion>,
    per_node: HashMap<TreeNodeId, Vec<usize>>,
    /// Selected suggestions by field path; rebuilt by [`Self::populate_path_index`].
    path_index: HashMap<String, Vec<usize>>,
    tree: ResponseTree,
}

impl NodeSuggestions {
    pub fn new(tree: ResponseTree) -> Self {
        Self {
            tree,
            ..Self::default()
        }
    }

    pub fn tree(&self) -> &ResponseTree {
        &self.tree
    }

    pub fn items(&self) -> &[NodeSuggestion] {
        &self.items
    }

    pub fn get(&self, idx: usize) -> &NodeSuggestion {
        &self.items[idx]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn add(&mut self, suggestion: NodeSuggestion) -> usize {
        let node_id = tree_node_id(suggestion.field_ref);
        let idx = self.items.len();
        self.items.push(suggestion);
        self.per_node.entry(node_id).or_default().push(idx);
        idx
    }

    pub fn select(&mut self, idx: usize, reason: SelectionReason, track_reasons: bool) {
        let item = &mut self.items[idx];
        item.selected = true;
        if track_reasons {
            item.selection_reasons.push(reason);
        }
    }

    pub fn set_requires_key(&mut self, idx: usize, connection: SourceConnection) {
        self.items[idx].requires_key = Some(connection);
    }

    /// Indices of live suggestions on the tree node of `field`.
    pub fn for_tree_node(&self, node_id: TreeNodeId) -> Vec<usize> {
        self.per_node
            .get(&node_id)
            .map(|indices| {
                indices
                    .iter()
                    .copied()
                    .filter(|&i| !self.items[i].is_orphan)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_node_unique(&self, idx: usize) -> bool {
        let node_id = tree_node_id(self.items[idx].field_ref);
        self.for_tree_node(node_id).len() == 1
    }

    pub fn duplicates_of(&self, idx: usize) -> Vec<usize> {
        let node_id = tree_node_id(self.items[idx].field_ref);
        self.for_tree_node(node_id)
            .into_iter()
            .filter(|&i| i != idx)
            .collect()
    }

    pub fn has_selected(&self, node_id: TreeNodeId) -> bool {
        self.for_tree_node(node_id)
            .iter()
            .any(|&i| self.items[i].selected)
    }

    /// Suggestions on the parent tree node sharing `idx`'s subgraph.
    pub fn parent_on_same_subgraph(&self, idx: usize) -> Option<usize> {
        let item = &self.items[idx];
        let parent = self.tree.parent_of(tree_node_id(item.field_ref))?;
        self.for_tree_node(parent)
            .into_iter()
            .find(|&i| self.items[i].subgraph_hash == item.subgraph_hash)
    }

    pub fn children_on_same_subgraph(&self, idx: usize) -> Vec<usize> {
        let item = &self.items[idx];
        self.tree
            .children_of(tree_node_id(item.field_ref))
            .into_iter()
            .flat_map(|child| self.for_tree_node(child))
            .filter(|&i| self.items[i].subgraph_hash == item.subgraph_hash)
            .collect()
    }

    pub fn siblings_on_same_subgraph(&self, idx: usize) -> Vec<usize> {
        let item = &self.items[idx];
        self.tree
            .siblings_of(tree_node_id(item.field_ref))
            .into_iter()
            .flat_map(|sibling| self.for_tree_node(sibling))
            .filter(|&i| self.items[i].subgraph_hash == item.subgraph_hash)
            .collect()
    }

    /// Selected suggestions of every ancestor tree node, nearest first.
    pub fn selected_ancestors(&self, idx: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut current = tree_node_id(self.items[idx].field_ref);
        while let Some(parent) = self.tree.parent_of(current) {
            out.extend(
                self.for_tree_node(parent)
                    .into_iter()
                    .filter(|&i| self.items[i].selected),
            );
            current = parent;
        }
        out
    }

    /// Rebuild the path index over selected suggestions. Must run after every
    /// selection stage; everything downstream queries paths, not indices.
    pub fn populate_path_index(&mut self) {
        self.path_index.clear();
        for (i, item) in self.items.iter().enumerate() {
            if item.selected && !item.is_orphan {
                self.path_index.entry(item.path.clone()).or_default().push(i);
            }
        }
    }

    /// Selected suggestions at a response path.
    pub fn selected_for_path(&self, path: &str) -> Vec<usize> {
        self.path_index.get(path).cloned().unwrap_or_default()
    }

    pub fn selected_hashes_for_path(&self, path: &str) -> Vec<SubgraphHash> {
        self.selected_for_path(path)
            .into_iter()
            .map(|i| self.items[i].subgraph_hash)
            .collect()
    }

    /// Orphan every suggestion below `field` and drop the matching subtree
    /// from the response tree. Orphans never count as duplicates and are
    /// never selected again.
    pub fn abandon_children(&mut self, field: FieldRef) {
        let removed = self.tree.remove_children(tree_node_id(field));
        for node_id in removed {
            if let Some(indices) = self.per_node.get(&node_id) {
                for &i in indices {
                    self.items[i].is_orphan = true;
                    self.items[i].selected = false;
                }
            }
        }
    }
}
