//! Requirement injection: growing the operation with the `@key` and
//! `@requires` material cross-subgraph field resolution needs, and recording
//! who depends on whom.
//!
//! Requirements are registered while fields are entered and flushed when
//! their owning selection set is left, so fields appended here are only
//! walked by the next planning pass.

use indexmap::IndexMap;
use indexmap::IndexSet;

use crate::config::FederationFieldConfiguration;
use crate::config::SubgraphDescriptor;
use crate::config::SubgraphHash;
use crate::error::PlanError;
use crate::field_set::FieldSetItem;
use crate::field_set::parse_field_set;
use crate::jumps::KeyJumpGraph;
use crate::jumps::SourceConnection;
use crate::operation::FieldRef;
use crate::operation::OperationDocument;
use crate::operation::Selection;
use crate::operation::SelectionSetRef;
use crate::operation::walk::OperationVisitor;
use crate::operation::walk::VisitAction;
use crate::operation::walk::WalkContext;
use crate::rewrite;
use crate::schema::TYPENAME_FIELD;
use crate::suggestion::NodeSuggestions;

/// Bound on the key-requirement matching loop within one selection set.
const MAX_REQUIREMENT_ROUNDS: usize = 100;

/// Dependency bookkeeping shared by injection and path assembly. Survives
/// across planning passes.
#[derive(Debug, Default)]
pub(crate) struct DependencyMaps {
    /// Fields a (field, subgraph) pair needs fetched before it can resolve.
    pub field_depends_on: IndexMap<(FieldRef, SubgraphHash), Vec<FieldRef>>,
    /// Same dependencies, keyed by field alone; drives plan-order deferral.
    pub field_ref_depends_on: IndexMap<FieldRef, Vec<FieldRef>>,
    /// The key/requires configurations behind those dependencies; becomes
    /// the planner's required-fields manifest.
    pub field_requirements: IndexMap<(FieldRef, SubgraphHash), Vec<FederationFieldConfiguration>>,
    /// Subgraph each injected field must be fetched from.
    pub field_landed_to: IndexMap<FieldRef, SubgraphHash>,
}

impl DependencyMaps {
    fn record(&mut self, requester: FieldRef, subgraph: SubgraphHash, deps: &[FieldRef]) {
        let entry = self
            .field_depends_on
            .entry((requester, subgraph))
            .or_default();
        let flat = self.field_ref_depends_on.entry(requester).or_default();
        for &dep in deps {
            // A field never depends on itself; a requester that is part of
            // its own key would otherwise deadlock the assembler.
            if dep == requester {
                continue;
            }
            if !entry.contains(&dep) {
                entry.push(dep);
            }
            if !flat.contains(&dep) {
                flat.push(dep);
            }
        }
    }

    fn record_requirement(
        &mut self,
        requester: FieldRef,
        subgraph: SubgraphHash,
        config: FederationFieldConfiguration,
    ) {
        let entry = self
            .field_requirements
            .entry((requester, subgraph))
            .or_default();
        if !entry.contains(&config) {
            entry.push(config);
        }
    }
}

struct PendingFieldRequirement {
    requester: FieldRef,
    subgraph_hash: SubgraphHash,
    type_name: String,
    path: String,
    config: FederationFieldConfiguration,
}

struct PendingKeyRequirement {
    requester: FieldRef,
    type_name: String,
    field_name: String,
    path: String,
    target_hash: SubgraphHash,
    parent_hashes: Vec<SubgraphHash>,
    /// Jump chain picked during selection, when one was needed.
    connection: Option<SourceConnection>,
    /// Target already serves the parent fields; only a representation key is
    /// needed (the `@requires`-on-same-subgraph case).
    same_source: bool,
    parent_is_interface_object: bool,
    target_is_interface_object: bool,
    target_is_entity_interface: bool,
}

/// Visitor that injects requirements for the current pass.
pub(crate) struct RequirementInjector<'a> {
    pub subgraphs: &'a [SubgraphDescriptor],
    pub suggestions: &'a NodeSuggestions,
    pub jumps: &'a mut KeyJumpGraph,
    pub maps: &'a mut DependencyMaps,
    /// Fields whose `@requires` was already injected in an earlier pass.
    /// Marked at flush time, not registration: a rewrite can stop the walk
    /// with pendings still queued, and those must be retried next pass.
    pub visited_requires: &'a mut IndexSet<FieldRef>,
    /// (field, subgraph) pairs whose key requirement was already injected.
    /// Flush-time marking, same as `visited_requires`.
    pub visited_keys: &'a mut IndexSet<(FieldRef, SubgraphHash)>,
    pub visited_rewrites: &'a mut IndexSet<(FieldRef, SubgraphHash)>,

    set_stack: Vec<SelectionSetRef>,
    pending_fields: IndexMap<usize, Vec<PendingFieldRequirement>>,
    pending_keys: IndexMap<usize, Vec<PendingKeyRequirement>>,
    /// Per-pass registration dedup, separate from the cross-pass visited sets.
    registered_requires: IndexSet<FieldRef>,
    registered_keys: IndexSet<(FieldRef, SubgraphHash)>,

    pub has_new_fields: bool,
    /// Field rewritten by the abstract rewriter this pass; the walk stopped
    /// right after it.
    pub rewritten_field: Option<FieldRef>,
    /// Field copies the rewrite produced, for remapping recorded state.
    pub rewritten_changed: IndexMap<FieldRef, Vec<FieldRef>>,
}

impl<'a> RequirementInjector<'a> {
    pub(crate) fn new(
        subgraphs: &'a [SubgraphDescriptor],
        suggestions: &'a NodeSuggestions,
        jumps: &'a mut KeyJumpGraph,
        maps: &'a mut DependencyMaps,
        visited_requires: &'a mut IndexSet<FieldRef>,
        visited_keys: &'a mut IndexSet<(FieldRef, SubgraphHash)>,
        visited_rewrites: &'a mut IndexSet<(FieldRef, SubgraphHash)>,
    ) -> Self {
        Self {
            subgraphs,
            suggestions,
            jumps,
            maps,
            visited_requires,
            visited_keys,
            visited_rewrites,
            set_stack: Vec::new(),
            pending_fields: IndexMap::new(),
            pending_keys: IndexMap::new(),
            registered_requires: IndexSet::new(),
            registered_keys: IndexSet::new(),
            has_new_fields: false,
            rewritten_field: None,
            rewritten_changed: IndexMap::new(),
        }
    }

    fn subgraph(&self, hash: SubgraphHash) -> Result<&'a SubgraphDescriptor, PlanError> {
        self.subgraphs
            .iter()
            .find(|s| s.hash() == hash)
            .ok_or_else(|| PlanError::internal(format!("unknown subgraph hash {hash}")))
    }

    fn handle_requires(
        &mut self,
        cx: &WalkContext<'_>,
        field: FieldRef,
        field_name: &str,
        subgraph: &SubgraphDescriptor,
    ) -> Result<(), PlanError> {
        let type_name = cx.enclosing_type();
        let Some(config) = subgraph
            .metadata
            .requires
            .first_by_type_and_field(type_name, field_name)
        else {
            return Ok(());
        };
        if field_name == TYPENAME_FIELD {
            return Err(PlanError::internal(format!(
                "{type_name}.__typename must not carry a requires configuration"
            )));
        }
        if self.visited_requires.contains(&field) || !self.registered_requires.insert(field) {
            return Ok(());
        }
        let set = self.current_set()?;
        self.pending_fields
            .entry(set.0)
            .or_default()
            .push(PendingFieldRequirement {
                requester: field,
                subgraph_hash: subgraph.hash(),
                type_name: type_name.to_string(),
                path: cx.current_path().to_string(),
                config: config.clone(),
            });
        Ok(())
    }

    fn handle_key_requirement(
        &mut self,
        cx: &WalkContext<'_>,
        field: FieldRef,
        suggestion_idx: usize,
    ) -> Result<(), PlanError> {
        let item = self.suggestions.get(suggestion_idx);
        let parent_path = item
            .parent_path_without_fragment
            .clone()
            .unwrap_or_else(|| item.parent_path.clone());
        // Root fields are entry points; nothing to jump from.
        if parent_path == cx.operation_kind().root_path() {
            return Ok(());
        }
        let parent_hashes = self.suggestions.selected_hashes_for_path(&parent_path);
        if parent_hashes.is_empty() {
            return Ok(());
        }
        let target = self.subgraph(item.subgraph_hash)?;
        let has_requires = target
            .metadata
            .requires
            .first_by_type_and_field(&item.type_name, &item.field_name)
            .is_some();
        let same_source = parent_hashes.contains(&item.subgraph_hash);
        if same_source && !has_requires {
            return Ok(());
        }
        if !same_source && !item.is_root_node {
            // Child fields ride their entity root's jump.
            return Ok(());
        }
        if self.visited_keys.contains(&(field, item.subgraph_hash))
            || !self.registered_keys.insert((field, item.subgraph_hash))
        {
            return Ok(());
        }
        let parent_is_interface_object = parent_hashes.iter().any(|&hash| {
            self.subgraphs
                .iter()
                .find(|s| s.hash() == hash)
                .is_some_and(|s| s.metadata.has_interface_object(&item.type_name))
        });
        let pending = PendingKeyRequirement {
            requester: field,
            type_name: item.type_name.clone(),
            field_name: item.field_name.clone(),
            path: item.path.clone(),
            target_hash: item.subgraph_hash,
            parent_hashes,
            connection: item.requires_key.clone(),
            same_source,
            parent_is_interface_object,
            target_is_interface_object: target.metadata.has_interface_object(&item.type_name),
            target_is_entity_interface: target.metadata.has_entity_interface(&item.type_name),
        };
        let set = self.current_set()?;
        self.pending_keys.entry(set.0).or_default().push(pending);
        Ok(())
    }

    fn current_set(&self) -> Result<SelectionSetRef, PlanError> {
        self.set_stack
            .last()
            .copied()
            .ok_or_else(|| PlanError::internal("requirement registered outside a selection set"))
    }

    fn flush_field_requirements(
        &mut self,
        doc: &mut OperationDocument,
        set: SelectionSetRef,
    ) -> Result<(), PlanError> {
        let Some(pending) = self.pending_fields.shift_remove(&set.0) else {
            return Ok(());
        };
        for req in pending {
            let items = parse_field_set(&req.config.selection_set)?;
            let injected = inject_field_set(doc, set, &items, false)?;
            if !injected.new_refs.is_empty() {
                self.has_new_fields = true;
            }
            self.maps
                .record(req.requester, req.subgraph_hash, &injected.all_refs);
            self.maps
                .record_requirement(req.requester, req.subgraph_hash, req.config.clone());
            self.visited_requires.insert(req.requester);
            tracing::debug!(
                path = %req.path,
                type_name = %req.type_name,
                subgraph = %req.subgraph_hash,
                "injected requires fields"
            );
        }
        Ok(())
    }

    fn flush_key_requirements(
        &mut self,
        doc: &mut OperationDocument,
        set: SelectionSetRef,
    ) -> Result<(), PlanError> {
        let Some(mut pending) = self.pending_keys.shift_remove(&set.0) else {
            return Ok(());
        };
        // Resolving one requirement can make its target available as a
        // source for another; iterate until nothing more matches.
        let mut available: IndexSet<SubgraphHash> = pending
            .iter()
            .flat_map(|p| p.parent_hashes.iter().copied())
            .collect();
        let mut rounds = 0;
        loop {
            rounds += 1;
            if rounds > MAX_REQUIREMENT_ROUNDS {
                return Err(PlanError::internal(
                    "key requirement matching did not converge",
                ));
            }
            let mut progressed = false;
            let mut remaining = Vec::new();
            for req in pending {
                if self.try_resolve_key_requirement(doc, set, &req, &available)? {
                    available.insert(req.target_hash);
                    self.visited_keys.insert((req.requester, req.target_hash));
                    progressed = true;
                } else {
                    remaining.push(req);
                }
            }
            pending = remaining;
            if pending.is_empty() {
                return Ok(());
            }
            if !progressed {
                let req = &pending[0];
                return Err(PlanError::UnplannableField {
                    type_name: req.type_name.clone(),
                    field_name: req.field_name.clone(),
                    path: req.path.clone(),
                });
            }
        }
    }

    fn try_resolve_key_requirement(
        &mut self,
        doc: &mut OperationDocument,
        set: SelectionSetRef,
        req: &PendingKeyRequirement,
        available: &IndexSet<SubgraphHash>,
    ) -> Result<bool, PlanError> {
        if req.same_source {
            self.inject_representation_key(doc, set, req)?;
            return Ok(true);
        }
        let connection = match &req.connection {
            Some(connection) if available.contains(&connection.source()) => connection.clone(),
            _ => {
                let Some(connection) = available.iter().find_map(|&source| {
                    self.jumps
                        .paths(source, req.target_hash)
                        .and_then(|paths| paths.into_iter().next())
                }) else {
                    return Ok(false);
                };
                connection
            }
        };
        self.inject_jump_chain(doc, set, req, &connection)?;
        Ok(true)
    }

    /// Same-subgraph `@requires` case: the representation still needs a key,
    /// taken from the target's first key (resolvable ones preferred).
    fn inject_representation_key(
        &mut self,
        doc: &mut OperationDocument,
        set: SelectionSetRef,
        req: &PendingKeyRequirement,
    ) -> Result<(), PlanError> {
        let target = self.subgraph(req.target_hash)?;
        let keys = target
            .metadata
            .keys
            .filter_by_type_and_resolvability(&req.type_name, false);
        let key = match keys.first() {
            Some(key) => (*key).clone(),
            None => match target.metadata.keys.filter_by_type(&req.type_name).first() {
                Some(key) => (*key).clone(),
                None => {
                    return Err(PlanError::internal(format!(
                        "type {} has a requires configuration but no key on subgraph {}",
                        req.type_name, target.id
                    )));
                }
            },
        };
        let items = parse_field_set(&key.selection_set)?;
        let injected = inject_field_set(doc, set, &items, true)?;
        if !injected.new_refs.is_empty() {
            self.has_new_fields = true;
        }
        self.maps.record(req.requester, req.target_hash, &injected.all_refs);
        self.maps
            .record_requirement(req.requester, req.target_hash, key);
        Ok(())
    }

    fn inject_jump_chain(
        &mut self,
        doc: &mut OperationDocument,
        set: SelectionSetRef,
        req: &PendingKeyRequirement,
        connection: &SourceConnection,
    ) -> Result<(), PlanError> {
        // One __typename per representation, except between two interface
        // objects where the concrete type name must not leak.
        let suppress_typename = req.parent_is_interface_object && req.target_is_interface_object;
        let mut previous_refs: Vec<FieldRef> = Vec::new();
        let mut typename_dependency = None;

        for (hop, jump) in connection.jumps.iter().enumerate() {
            let items = parse_field_set(&jump.selection_set)?;
            let add_typename = hop == 0 && !suppress_typename;
            let injected = inject_field_set(doc, set, &items, add_typename)?;
            if !injected.new_refs.is_empty() {
                self.has_new_fields = true;
            }
            for &field in &injected.all_refs {
                self.maps.field_landed_to.entry(field).or_insert(jump.from);
            }
            if let Some(typename) = injected.typename_ref {
                self.maps.field_landed_to.entry(typename).or_insert(jump.from);
                // Entering a concrete type from an interface object needs the
                // concrete __typename in the representation.
                if req.parent_is_interface_object
                    && !req.target_is_interface_object
                    && !req.target_is_entity_interface
                {
                    typename_dependency = Some(typename);
                }
            }
            if hop > 0 {
                let config = key_config(&connection.jumps[hop - 1]);
                for &field in &injected.new_refs {
                    self.maps.record(field, jump.from, &previous_refs);
                    self.maps.record_requirement(field, jump.from, config.clone());
                }
            }
            previous_refs = injected.all_refs;
        }

        let last = &connection.jumps[connection.jumps.len() - 1];
        let mut deps = previous_refs;
        if let Some(typename) = typename_dependency {
            deps.push(typename);
        }
        self.maps.record(req.requester, req.target_hash, &deps);
        self.maps
            .record_requirement(req.requester, req.target_hash, key_config(last));
        tracing::debug!(
            path = %req.path,
            type_name = %req.type_name,
            jumps = connection.jumps.len(),
            "injected key requirements"
        );
        Ok(())
    }
}

fn key_config(jump: &crate::jumps::KeyJump) -> FederationFieldConfiguration {
    FederationFieldConfiguration::key(&jump.type_name, &jump.selection_set)
}

impl OperationVisitor for RequirementInjector<'_> {
    fn enter_selection_set(
        &mut self,
        _doc: &mut OperationDocument,
        _cx: &WalkContext<'_>,
        set: SelectionSetRef,
    ) -> Result<(), PlanError> {
        self.set_stack.push(set);
        Ok(())
    }

    fn leave_selection_set(
        &mut self,
        doc: &mut OperationDocument,
        _cx: &WalkContext<'_>,
        set: SelectionSetRef,
    ) -> Result<(), PlanError> {
        self.flush_field_requirements(doc, set)?;
        self.flush_key_requirements(doc, set)?;
        self.set_stack.pop();
        Ok(())
    }

    fn enter_field(
        &mut self,
        doc: &mut OperationDocument,
        cx: &WalkContext<'_>,
        field: FieldRef,
    ) -> Result<VisitAction, PlanError> {
        let field_name = doc.field(field).name.clone();
        let selected = self.suggestions.selected_for_path(cx.current_path());
        for idx in selected {
            if self.suggestions.get(idx).field_ref != field {
                continue;
            }
            let hash = self.suggestions.get(idx).subgraph_hash;
            let subgraph = self.subgraph(hash)?;
            self.handle_requires(cx, field, &field_name, subgraph)?;
            self.handle_key_requirement(cx, field, idx)?;

            // Abstract return types may need flattening for this subgraph.
            if doc.field(field).selection_set.is_some()
                && self.visited_rewrites.insert((field, hash))
            {
                let field_type = cx.field_type(doc, field)?;
                if cx.schema().is_abstract(&field_type.type_name) {
                    let subgraph = self.subgraph(hash)?;
                    let result = rewrite::rewrite_field_selection(
                        doc,
                        cx.schema(),
                        subgraph,
                        field,
                        &field_type.type_name,
                    )?;
                    if result.rewritten {
                        self.rewritten_field = Some(field);
                        self.rewritten_changed = result.changed_field_refs;
                        return Ok(VisitAction::Stop);
                    }
                }
            }
        }
        Ok(VisitAction::Continue)
    }
}

/// Result of merging a parsed field set into a selection set.
pub(crate) struct InjectResult {
    /// Fields appended by this call; always skip-listed.
    pub new_refs: Vec<FieldRef>,
    /// Every field the requirement covers, appended or pre-existing,
    /// nested fields included. `__typename` is reported separately.
    pub all_refs: Vec<FieldRef>,
    pub typename_ref: Option<FieldRef>,
}

/// Merge `items` into `set`: existing fields are reused, missing ones are
/// appended and skip-listed. With `add_typename`, a skip-listed `__typename`
/// is ensured as well.
pub(crate) fn inject_field_set(
    doc: &mut OperationDocument,
    set: SelectionSetRef,
    items: &[FieldSetItem],
    add_typename: bool,
) -> Result<InjectResult, PlanError> {
    let mut result = InjectResult {
        new_refs: Vec::new(),
        all_refs: Vec::new(),
        typename_ref: None,
    };
    inject_items(doc, set, items, &mut result)?;
    if add_typename {
        let typename = match doc.find_field(set, TYPENAME_FIELD) {
            Some(existing) => existing,
            None => {
                let field = doc.add_field(TYPENAME_FIELD, None, None);
                doc.push_selection(set, Selection::Field(field));
                doc.mark_skipped(field);
                result.new_refs.push(field);
                field
            }
        };
        result.typename_ref = Some(typename);
    }
    Ok(result)
}

fn inject_items(
    doc: &mut OperationDocument,
    set: SelectionSetRef,
    items: &[FieldSetItem],
    result: &mut InjectResult,
) -> Result<(), PlanError> {
    for item in items {
        match item {
            FieldSetItem::Field { name, selections } => {
                let field = match doc.find_field(set, name) {
                    Some(existing) => existing,
                    None => {
                        let field = doc.add_field(name.as_str(), None, None);
                        doc.push_selection(set, Selection::Field(field));
                        doc.mark_skipped(field);
                        result.new_refs.push(field);
                        field
                    }
                };
                result.all_refs.push(field);
                if !selections.is_empty() {
                    let subset = match doc.field(field).selection_set {
                        Some(subset) => subset,
                        None => {
                            let subset = doc.add_selection_set(Vec::new());
                            doc.set_field_selection_set(field, subset);
                            subset
                        }
                    };
                    inject_items(doc, subset, selections, result)?;
                }
            }
            FieldSetItem::InlineFragment {
                type_condition,
                selections,
            } => {
                let subset = match doc.find_fragment(set, type_condition) {
                    Some(fragment) => doc.fragment(fragment).selection_set,
                    None => {
                        let subset = doc.add_selection_set(Vec::new());
                        let fragment = doc.add_inline_fragment(type_condition.as_str(), subset);
                        doc.push_selection(set, Selection::InlineFragment(fragment));
                        subset
                    }
                };
                inject_items(doc, subset, selections, result)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::field_set::parse_field_set;
    use crate::operation::OperationKind;

    #[test]
    fn inject_reuses_existing_fields_and_skips_new_ones() {
        let mut doc = OperationDocument::new();
        let name = doc.add_field("name", None, None);
        let set = doc.add_selection_set(vec![Selection::Field(name)]);
        doc.add_operation(None, OperationKind::Query, set);

        let items = parse_field_set("name id info { age }").unwrap();
        let result = inject_field_set(&mut doc, set, &items, true).unwrap();

        // `name` was reused, `id`, `info`, `age` and `__typename` are new.
        assert_eq!(result.all_refs.len(), 4);
        assert_eq!(result.new_refs.len(), 4);
        assert!(result.all_refs.contains(&name));
        assert!(!doc.is_skipped(name));
        for &field in &result.new_refs {
            assert!(doc.is_skipped(field));
        }
        let typename = result.typename_ref.unwrap();
        assert_eq!(doc.field(typename).name, TYPENAME_FIELD);

        // Injecting the same set again changes nothing.
        let again = inject_field_set(&mut doc, set, &items, true).unwrap();
        assert!(again.new_refs.is_empty());
        assert_eq!(again.all_refs.len(), 4);
    }

    #[test]
    fn inject_creates_inline_fragments_for_conditional_keys() {
        let mut doc = OperationDocument::new();
        let set = doc.add_selection_set(vec![]);
        doc.add_operation(None, OperationKind::Query, set);

        let items = parse_field_set("id ... on Admin { permissions }").unwrap();
        let result = inject_field_set(&mut doc, set, &items, false).unwrap();

        assert_eq!(result.all_refs.len(), 2);
        let fragment = doc.find_fragment(set, "Admin").unwrap();
        let inner = doc.fragment(fragment).selection_set;
        assert!(doc.find_field(inner, "permissions").is_some());
    }

    #[test]
    fn dependencies_never_include_the_requester() {
        let mut maps = DependencyMaps::default();
        let requester = FieldRef(1);
        maps.record(
            requester,
            SubgraphHash(7),
            &[FieldRef(0), requester, FieldRef(2)],
        );
        assert_eq!(
            maps.field_depends_on[&(requester, SubgraphHash(7))],
            vec![FieldRef(0), FieldRef(2)]
        );
        assert_eq!(
            maps.field_ref_depends_on[&requester],
            vec![FieldRef(0), FieldRef(2)]
        );
    }
}
