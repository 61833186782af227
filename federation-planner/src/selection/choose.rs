//! Source selection: the ordered strategy list that decides which subgraph
//! serves each field. Strategies run in strict order; each one only touches
//! fields the earlier ones left unresolved, and the path index is rebuilt
//! after every stage.

use indexmap::IndexMap;

use crate::config::SubgraphHash;
use crate::jumps::KeyJumpGraph;
use crate::operation::FieldRef;
use crate::suggestion::NodeSuggestions;
use crate::suggestion::SelectionReason;
use crate::suggestion::tree_node_id;

pub(crate) struct ChooseContext<'a> {
    pub suggestions: &'a mut NodeSuggestions,
    pub jumps: &'a mut KeyJumpGraph,
    /// Fields pinned to a subgraph by requirement injection in an earlier
    /// pass. Selection must not move them.
    pub landed: &'a IndexMap<FieldRef, SubgraphHash>,
    pub track_reasons: bool,
}

type Strategy = fn(&mut ChooseContext<'_>);

/// The stages, in the order they are allowed to decide.
const STRATEGIES: &[(&str, Strategy)] = &[
    ("pinned-fields", select_pinned),
    ("unique-nodes", select_unique_nodes),
    ("duplicates-near-selected", select_duplicates_near_selected),
    ("duplicates-by-reachability", select_duplicates_by_reachability),
];

pub(crate) fn choose_sources(cx: &mut ChooseContext<'_>) {
    for (name, strategy) in STRATEGIES {
        strategy(cx);
        cx.suggestions.populate_path_index();
        tracing::trace!(stage = name, "selection stage finished");
    }
}

/// Stage 0: re-apply decisions from earlier passes. A field whose requirement
/// injection landed it on a subgraph must stay there.
fn select_pinned(cx: &mut ChooseContext<'_>) {
    if cx.landed.is_empty() {
        return;
    }
    for idx in 0..cx.suggestions.len() {
        let item = cx.suggestions.get(idx);
        if item.selected || item.is_orphan {
            continue;
        }
        if cx.landed.get(&item.field_ref) == Some(&item.subgraph_hash) {
            cx.suggestions.select(idx, SelectionReason::Pinned, cx.track_reasons);
        }
    }
}

/// Stage 1: fields only one subgraph can serve, plus their same-subgraph
/// neighborhood (ancestor chain up to a root node, leaf children, leaf
/// siblings) so trivially co-located fields ride along.
fn select_unique_nodes(cx: &mut ChooseContext<'_>) {
    for idx in 0..cx.suggestions.len() {
        let item = cx.suggestions.get(idx);
        if item.selected || !item.is_selectable() {
            continue;
        }
        if !cx.suggestions.is_node_unique(idx) {
            continue;
        }
        cx.suggestions.select(idx, SelectionReason::Unique, cx.track_reasons);
        select_ancestor_chain(cx, idx, SelectionReason::UniqueAncestor);
        for child in cx.suggestions.children_on_same_subgraph(idx) {
            if rides_along(cx.suggestions, child) {
                cx.suggestions
                    .select(child, SelectionReason::UniqueLeafChild, cx.track_reasons);
            }
        }
        for sibling in cx.suggestions.siblings_on_same_subgraph(idx) {
            if rides_along(cx.suggestions, sibling) {
                cx.suggestions
                    .select(sibling, SelectionReason::UniqueLeafSibling, cx.track_reasons);
            }
        }
    }
}

/// A ride-along candidate must be a free leaf: nothing selected anywhere on
/// its node. Injected key fields are usually pinned to another subgraph by
/// the time their siblings become unique.
fn rides_along(suggestions: &NodeSuggestions, idx: usize) -> bool {
    let item = suggestions.get(idx);
    item.is_leaf
        && item.is_selectable()
        && !suggestions.has_selected(tree_node_id(item.field_ref))
}

/// Stage 2: duplicated fields that have an already-selected neighbor on the
/// same subgraph. Breadth-first over the response tree so parents decide
/// before their children; `__typename` waits for stage 3.
fn select_duplicates_near_selected(cx: &mut ChooseContext<'_>) {
    for node_id in cx.suggestions.tree().bfs_order() {
        let indices = cx.suggestions.for_tree_node(node_id);
        if indices.len() < 2 || indices.iter().any(|&i| cx.suggestions.get(i).selected) {
            continue;
        }
        if cx.suggestions.get(indices[0]).is_typename {
            continue;
        }
        let candidates: Vec<usize> = indices
            .into_iter()
            .filter(|&i| cx.suggestions.get(i).is_selectable())
            .collect();

        if let Some(&idx) = candidates.iter().find(|&&i| {
            cx.suggestions
                .parent_on_same_subgraph(i)
                .is_some_and(|p| cx.suggestions.get(p).selected)
        }) {
            cx.suggestions
                .select(idx, SelectionReason::SameSourceParent, cx.track_reasons);
            continue;
        }
        if let Some(&idx) = candidates.iter().find(|&&i| {
            cx.suggestions
                .children_on_same_subgraph(i)
                .iter()
                .any(|&c| cx.suggestions.get(c).selected)
        }) {
            cx.suggestions
                .select(idx, SelectionReason::SameSourceChild, cx.track_reasons);
            continue;
        }
        if let Some(&idx) = candidates.iter().find(|&&i| {
            cx.suggestions.siblings_on_same_subgraph(i).iter().any(|&s| {
                let sibling = cx.suggestions.get(s);
                // A sibling that only exists as injected key material must
                // not pull its requester onto its subgraph.
                sibling.selected && !sibling.is_required_key_field
            })
        }) {
            cx.suggestions
                .select(idx, SelectionReason::SameSourceSibling, cx.track_reasons);
        }
    }
}

/// Stage 3: everything still duplicated. Entity roots reachable from a
/// selected ancestor through the key-jump graph win; then chains up to such a
/// root; then the first resolvable leaf; then the candidate with the most
/// same-subgraph children. `__typename` participates here.
fn select_duplicates_by_reachability(cx: &mut ChooseContext<'_>) {
    for node_id in cx.suggestions.tree().bfs_order() {
        let indices = cx.suggestions.for_tree_node(node_id);
        if indices.is_empty() || indices.iter().any(|&i| cx.suggestions.get(i).selected) {
            continue;
        }
        let candidates: Vec<usize> = indices
            .into_iter()
            .filter(|&i| cx.suggestions.get(i).is_selectable())
            .collect();
        if candidates.is_empty() {
            continue;
        }

        if select_reachable_entity_root(cx, &candidates) {
            continue;
        }
        if select_chain_to_reachable_root(cx, &candidates) {
            continue;
        }
        if let Some(&idx) = candidates
            .iter()
            .find(|&&i| cx.suggestions.get(i).is_leaf && !cx.suggestions.get(i).is_external)
        {
            cx.suggestions.select(idx, SelectionReason::FirstLeaf, cx.track_reasons);
            continue;
        }
        select_most_children(cx, &candidates);
    }
}

/// (a) An entity root whose subgraph a selected ancestor can jump to.
fn select_reachable_entity_root(cx: &mut ChooseContext<'_>, candidates: &[usize]) -> bool {
    for &idx in candidates {
        let item = cx.suggestions.get(idx);
        if !item.is_root_node || item.disabled_entity_resolver {
            continue;
        }
        let target = item.subgraph_hash;
        for ancestor in cx.suggestions.selected_ancestors(idx) {
            let source = cx.suggestions.get(ancestor).subgraph_hash;
            if source == target {
                cx.suggestions
                    .select(idx, SelectionReason::ReachableEntityRoot, cx.track_reasons);
                return true;
            }
            if let Some(connections) = cx.jumps.paths(source, target) {
                cx.suggestions
                    .select(idx, SelectionReason::ReachableEntityRoot, cx.track_reasons);
                if let Some(best) = connections.into_iter().next() {
                    cx.suggestions.set_requires_key(idx, best);
                }
                return true;
            }
        }
    }
    false
}

/// (b) A candidate connected through a same-subgraph ancestor chain to an
/// entity root that stage (a) logic accepts; the whole chain is selected.
fn select_chain_to_reachable_root(cx: &mut ChooseContext<'_>, candidates: &[usize]) -> bool {
    for &idx in candidates {
        let mut chain = vec![idx];
        let mut current = idx;
        let root = loop {
            let Some(parent) = cx.suggestions.parent_on_same_subgraph(current) else {
                break None;
            };
            let p = cx.suggestions.get(parent);
            if !p.is_selectable() {
                break None;
            }
            chain.push(parent);
            if p.is_root_node && !p.disabled_entity_resolver {
                break Some(parent);
            }
            current = parent;
        };
        let Some(root) = root else {
            continue;
        };
        if cx.suggestions.get(root).selected {
            // Chain head already chosen; ride it.
            for &link in &chain {
                if !cx.suggestions.get(link).selected {
                    cx.suggestions
                        .select(link, SelectionReason::ReachableAncestorChain, cx.track_reasons);
                }
            }
            return true;
        }
        let target = cx.suggestions.get(root).subgraph_hash;
        let reachable = cx
            .suggestions
            .selected_ancestors(root)
            .into_iter()
            .any(|ancestor| {
                let source = cx.suggestions.get(ancestor).subgraph_hash;
                source == target || cx.jumps.paths(source, target).is_some()
            });
        if !reachable {
            continue;
        }
        for &link in &chain {
            if !cx.suggestions.get(link).selected {
                cx.suggestions
                    .select(link, SelectionReason::ReachableAncestorChain, cx.track_reasons);
            }
        }
        return true;
    }
    false
}

/// (d) The non-leaf candidate that can keep the most of its children on one
/// subgraph; ties fall to the earlier candidate, i.e. subgraph order.
fn select_most_children(cx: &mut ChooseContext<'_>, candidates: &[usize]) {
    let mut best: Option<(usize, usize)> = None;
    for &idx in candidates {
        if cx.suggestions.get(idx).is_leaf {
            continue;
        }
        let children = cx.suggestions.children_on_same_subgraph(idx);
        let resolvable: Vec<usize> = children
            .into_iter()
            .filter(|&c| cx.suggestions.get(c).is_selectable())
            .collect();
        let non_typename = resolvable
            .iter()
            .filter(|&&c| !cx.suggestions.get(c).is_typename)
            .count();
        if non_typename == 0 {
            continue;
        }
        let count = resolvable.len();
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((idx, count));
        }
    }
    if let Some((idx, _)) = best {
        cx.suggestions.select(idx, SelectionReason::MostChildren, cx.track_reasons);
    }
}

fn select_ancestor_chain(cx: &mut ChooseContext<'_>, idx: usize, reason: SelectionReason) {
    let mut current = idx;
    while let Some(parent) = cx.suggestions.parent_on_same_subgraph(current) {
        let p = cx.suggestions.get(parent);
        // A parent node decided elsewhere (selected or pinned) ends the chain.
        if !p.is_selectable()
            || cx.suggestions.has_selected(tree_node_id(p.field_ref))
        {
            break;
        }
        let is_root = p.is_root_node;
        cx.suggestions.select(parent, reason, cx.track_reasons);
        if is_root {
            break;
        }
        current = parent;
    }
}

/// Fields that ended this selection round with no subgraph. Reported by the
/// planner as unplannable once injection can no longer help.
pub(crate) fn unresolved_fields(suggestions: &NodeSuggestions) -> Vec<FieldRef> {
    let mut unresolved = Vec::new();
    let mut seen = indexmap::IndexSet::new();
    for item in suggestions.items() {
        if item.is_orphan || !seen.insert(item.field_ref) {
            continue;
        }
        if !suggestions.has_selected(tree_node_id(item.field_ref)) {
            unresolved.push(item.field_ref);
        }
    }
    unresolved
}
