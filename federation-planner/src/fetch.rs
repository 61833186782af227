//! Path assembly: turning selected suggestions into per-subgraph planner
//! configurations with response paths, required-fields manifests and fetch
//! ordering edges.

use indexmap::IndexMap;
use indexmap::IndexSet;
use itertools::Itertools;
use serde::Serialize;

use crate::config::FederationFieldConfiguration;
use crate::config::SubgraphDescriptor;
use crate::config::SubgraphHash;
use crate::error::PlanError;
use crate::operation::FieldRef;
use crate::operation::OperationDocument;
use crate::operation::OperationKind;
use crate::operation::walk::OperationVisitor;
use crate::operation::walk::VisitAction;
use crate::operation::walk::WalkContext;
use crate::requirements::DependencyMaps;
use crate::suggestion::NodeSuggestions;

/// Where a planner's parent path sits relative to list fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlannerPathType {
    Object,
    ArrayItem,
    NestedInArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PathKind {
    /// The scaffolding entry for the planner's own parent path.
    Parent,
    Field,
    Fragment,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationPath {
    pub path: String,
    pub type_name: String,
    pub field_ref: Option<FieldRef>,
    pub kind: PathKind,
}

/// One fetch against one subgraph: the unit of the final plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlannerConfiguration {
    pub fetch_id: usize,
    pub subgraph_id: String,
    pub subgraph_hash: SubgraphHash,
    pub parent_path: String,
    pub path_type: PlannerPathType,
    pub paths: Vec<OperationPath>,
    /// Key/requires selections the fetch must ship as representation input.
    pub required_fields: Vec<FederationFieldConfiguration>,
    /// Fetches that must complete first. Sorted, deduplicated, never self.
    pub depends_on_fetch_ids: Vec<usize>,
    /// Entity fetch nested inside the response rather than a root fetch.
    pub is_nested: bool,
}

impl PlannerConfiguration {
    pub fn has_path(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p.path == path)
    }

    fn add_path(&mut self, path: OperationPath) {
        if !self.has_path(&path.path) {
            self.paths.push(path);
        }
    }
}

/// Visitor building planner configurations out of the selected suggestions.
/// Planners persist across passes; the missing-path and waiting sets are per
/// pass and drive the revisit decision.
pub(crate) struct PathAssembler<'a> {
    pub subgraphs: &'a [SubgraphDescriptor],
    pub suggestions: &'a NodeSuggestions,
    pub maps: &'a mut DependencyMaps,
    pub planners: &'a mut Vec<PlannerConfiguration>,
    pub fields_planned_on: &'a mut IndexMap<FieldRef, Vec<usize>>,
    pub fields_waiting: IndexSet<FieldRef>,
    pub missing_paths: IndexSet<String>,
    pub secondary_run: bool,
    list_ancestry: Vec<bool>,
}

impl<'a> PathAssembler<'a> {
    pub(crate) fn new(
        subgraphs: &'a [SubgraphDescriptor],
        suggestions: &'a NodeSuggestions,
        maps: &'a mut DependencyMaps,
        planners: &'a mut Vec<PlannerConfiguration>,
        fields_planned_on: &'a mut IndexMap<FieldRef, Vec<usize>>,
        secondary_run: bool,
    ) -> Self {
        Self {
            subgraphs,
            suggestions,
            maps,
            planners,
            fields_planned_on,
            fields_waiting: IndexSet::new(),
            missing_paths: IndexSet::new(),
            secondary_run,
            list_ancestry: Vec::new(),
        }
    }

    pub(crate) fn should_revisit(&self) -> bool {
        !self.missing_paths.is_empty() || !self.fields_waiting.is_empty()
    }

    fn subgraph_id(&self, hash: SubgraphHash) -> String {
        self.subgraphs
            .iter()
            .find(|s| s.hash() == hash)
            .map(|s| s.id.clone())
            .unwrap_or_else(|| hash.to_string())
    }

    /// All dependencies of the field fetched, each on the subgraph it landed
    /// on.
    fn dependencies_planned(&self, field: FieldRef) -> bool {
        let Some(deps) = self.maps.field_ref_depends_on.get(&field) else {
            return true;
        };
        deps.iter().all(|dep| {
            let Some(planned) = self.fields_planned_on.get(dep) else {
                return false;
            };
            match self.maps.field_landed_to.get(dep) {
                Some(&landed) => planned
                    .iter()
                    .any(|&p| self.planners[p].subgraph_hash == landed),
                None => !planned.is_empty(),
            }
        })
    }

    fn record_planned(&mut self, field: FieldRef, planner: usize) {
        let entry = self.fields_planned_on.entry(field).or_default();
        if !entry.contains(&planner) {
            entry.push(planner);
        }
    }

    /// A planner may not serve a field whose dependencies were fetched by
    /// planners that themselves wait on this planner.
    fn would_cycle(&self, field: FieldRef, planner: usize) -> bool {
        let fetch_id = self.planners[planner].fetch_id;
        let Some(deps) = self.maps.field_ref_depends_on.get(&field) else {
            return false;
        };
        deps.iter().any(|dep| {
            self.fields_planned_on
                .get(dep)
                .into_iter()
                .flatten()
                .any(|&p| self.planners[p].depends_on_fetch_ids.contains(&fetch_id))
        })
    }

    fn plan_with_existing(
        &mut self,
        cx: &WalkContext<'_>,
        field: FieldRef,
        suggestion_idx: usize,
    ) -> Result<bool, PlanError> {
        let item = self.suggestions.get(suggestion_idx);
        let current = cx.current_path().to_string();
        let parent = cx.parent_path().to_string();
        let parent_without_fragment = cx.parent_path_without_fragment();
        let has_requirements = self
            .maps
            .field_requirements
            .contains_key(&(field, item.subgraph_hash));

        for planner_idx in 0..self.planners.len() {
            if self.planners[planner_idx].subgraph_hash != item.subgraph_hash {
                continue;
            }
            if self.secondary_run && self.planners[planner_idx].has_path(&current) {
                self.record_planned(field, planner_idx);
                return Ok(true);
            }
            // A field with requirements needs representation input; only an
            // entity fetch can carry it.
            if has_requirements && !self.planners[planner_idx].is_nested {
                continue;
            }
            if self.would_cycle(field, planner_idx) {
                continue;
            }
            let owns_parent = self.planners[planner_idx].has_path(&parent)
                || parent_without_fragment
                    .as_deref()
                    .is_some_and(|p| self.planners[planner_idx].has_path(p));
            if !owns_parent {
                continue;
            }
            if cx.on_fragment() && !self.planners[planner_idx].has_path(&parent) {
                self.planners[planner_idx].add_path(OperationPath {
                    path: parent.clone(),
                    type_name: cx.enclosing_type().to_string(),
                    field_ref: None,
                    kind: PathKind::Fragment,
                });
            }
            self.planners[planner_idx].add_path(OperationPath {
                path: current,
                type_name: cx.enclosing_type().to_string(),
                field_ref: Some(field),
                kind: PathKind::Field,
            });
            self.record_planned(field, planner_idx);
            self.add_field_dependencies(field, item.subgraph_hash, planner_idx)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn add_new_planner(
        &mut self,
        cx: &WalkContext<'_>,
        field: FieldRef,
        suggestion_idx: usize,
    ) -> Result<bool, PlanError> {
        let item = self.suggestions.get(suggestion_idx);
        if !item.is_root_node {
            return Ok(false);
        }
        let current = cx.current_path().to_string();
        let parent = item
            .parent_path_without_fragment
            .clone()
            .unwrap_or_else(|| item.parent_path.clone());
        let root_path = cx.operation_kind().root_path();
        let is_nested = parent != root_path;
        let fetch_id = self.planners.len();

        // Everything above the field, the field's own list wrapper excluded.
        let ancestry = &self.list_ancestry[..self.list_ancestry.len().saturating_sub(1)];
        let path_type = match ancestry.split_last() {
            Some((true, _)) => PlannerPathType::ArrayItem,
            Some((false, rest)) if rest.contains(&true) => PlannerPathType::NestedInArray,
            _ => PlannerPathType::Object,
        };

        let mut depends_on_fetch_ids = Vec::new();
        if cx.operation_kind() == OperationKind::Mutation && !is_nested {
            // Mutation root fields execute serially, in declaration order.
            depends_on_fetch_ids.extend(
                self.planners
                    .iter()
                    .filter(|p| p.parent_path == root_path)
                    .map(|p| p.fetch_id),
            );
        }

        let mut paths = vec![OperationPath {
            path: parent.clone(),
            type_name: cx.enclosing_type().to_string(),
            field_ref: None,
            kind: PathKind::Parent,
        }];
        if cx.on_fragment() {
            paths.push(OperationPath {
                path: cx.parent_path().to_string(),
                type_name: cx.enclosing_type().to_string(),
                field_ref: None,
                kind: PathKind::Fragment,
            });
        }
        paths.push(OperationPath {
            path: current,
            type_name: cx.enclosing_type().to_string(),
            field_ref: Some(field),
            kind: PathKind::Field,
        });

        self.planners.push(PlannerConfiguration {
            fetch_id,
            subgraph_id: self.subgraph_id(item.subgraph_hash),
            subgraph_hash: item.subgraph_hash,
            parent_path: parent,
            path_type,
            paths,
            required_fields: Vec::new(),
            depends_on_fetch_ids,
            is_nested,
        });
        self.record_planned(field, fetch_id);
        self.add_field_dependencies(field, item.subgraph_hash, fetch_id)?;
        Ok(true)
    }

    fn add_field_dependencies(
        &mut self,
        field: FieldRef,
        hash: SubgraphHash,
        planner_idx: usize,
    ) -> Result<(), PlanError> {
        let Some(deps) = self.maps.field_depends_on.shift_remove(&(field, hash)) else {
            return Ok(());
        };
        let configs = self
            .maps
            .field_requirements
            .get(&(field, hash))
            .cloned()
            .ok_or_else(|| {
                let item = self
                    .suggestions
                    .items()
                    .iter()
                    .find(|s| s.field_ref == field && s.subgraph_hash == hash);
                PlanError::MissingRequirementConfiguration {
                    type_name: item.map(|s| s.type_name.clone()).unwrap_or_default(),
                    field_name: item.map(|s| s.field_name.clone()).unwrap_or_default(),
                    subgraph_id: self.subgraph_id(hash),
                }
            })?;
        for config in configs {
            if !self.planners[planner_idx].required_fields.contains(&config) {
                self.planners[planner_idx].required_fields.push(config);
            }
        }
        let fetch_id = self.planners[planner_idx].fetch_id;
        let mut dependency_ids = Vec::new();
        for dep in deps {
            let landed = self.maps.field_landed_to.get(&dep).copied();
            for &p in self.fields_planned_on.get(&dep).into_iter().flatten() {
                let matches = match landed {
                    Some(l) => self.planners[p].subgraph_hash == l,
                    None => true,
                };
                if matches && self.planners[p].fetch_id != fetch_id {
                    dependency_ids.push(self.planners[p].fetch_id);
                }
            }
        }
        let planner = &mut self.planners[planner_idx];
        planner.depends_on_fetch_ids.extend(dependency_ids);
        planner.depends_on_fetch_ids = planner
            .depends_on_fetch_ids
            .iter()
            .copied()
            .sorted()
            .dedup()
            .collect();
        Ok(())
    }

    fn handle_missing_path(&mut self, path: &str) {
        self.missing_paths.insert(path.to_string());
    }
}

impl OperationVisitor for PathAssembler<'_> {
    fn enter_inline_fragment(
        &mut self,
        doc: &mut OperationDocument,
        cx: &WalkContext<'_>,
        fragment: crate::operation::FragmentRef,
    ) -> Result<VisitAction, PlanError> {
        let type_condition = doc.fragment(fragment).type_condition.clone();
        let parent = cx.parent_path().to_string();
        // Speculative: fragment paths with no fields beneath them are pruned
        // once assembly converges.
        for planner in self.planners.iter_mut() {
            if planner.has_path(&parent) {
                planner.add_path(OperationPath {
                    path: cx.current_path().to_string(),
                    type_name: type_condition.clone(),
                    field_ref: None,
                    kind: PathKind::Fragment,
                });
            }
        }
        Ok(VisitAction::Continue)
    }

    fn enter_field(
        &mut self,
        doc: &mut OperationDocument,
        cx: &WalkContext<'_>,
        field: FieldRef,
    ) -> Result<VisitAction, PlanError> {
        let is_list = cx
            .field_type(doc, field)
            .map(|t| t.is_list)
            .unwrap_or(false);
        self.list_ancestry.push(is_list);

        let current = cx.current_path().to_string();
        let selected: Vec<usize> = self
            .suggestions
            .selected_for_path(&current)
            .into_iter()
            .filter(|&i| self.suggestions.get(i).field_ref == field)
            .collect();

        if selected.is_empty() {
            if doc.field(field).is_typename() {
                // __typename is resolvable by whichever planner owns the
                // parent; it never warrants a fetch of its own.
                let parent = cx.parent_path().to_string();
                let mut placed = false;
                for planner in self.planners.iter_mut() {
                    if planner.has_path(&parent) {
                        planner.add_path(OperationPath {
                            path: current.clone(),
                            type_name: cx.enclosing_type().to_string(),
                            field_ref: Some(field),
                            kind: PathKind::Field,
                        });
                        placed = true;
                    }
                }
                if placed {
                    return Ok(VisitAction::SkipSubtree);
                }
            }
            self.handle_missing_path(&current);
            return Ok(VisitAction::SkipSubtree);
        }

        let shareable = selected.len() > 1;
        if !self.dependencies_planned(field) {
            self.fields_waiting.insert(field);
            self.handle_missing_path(&current);
            if !shareable {
                return Ok(VisitAction::SkipSubtree);
            }
        }

        let mut planned_everywhere = true;
        for idx in selected {
            if !self.dependencies_planned(field) {
                planned_everywhere = false;
                continue;
            }
            let planned = self.plan_with_existing(cx, field, idx)?
                || self.add_new_planner(cx, field, idx)?;
            if !planned {
                planned_everywhere = false;
            }
        }
        if !planned_everywhere {
            self.handle_missing_path(&current);
        }
        Ok(VisitAction::Continue)
    }

    fn leave_field(
        &mut self,
        _doc: &mut OperationDocument,
        _cx: &WalkContext<'_>,
        _field: FieldRef,
    ) -> Result<(), PlanError> {
        self.list_ancestry.pop();
        Ok(())
    }
}

/// Drop fragment scaffolding no field path ended up under.
pub(crate) fn prune_fragment_paths(planners: &mut [PlannerConfiguration]) {
    for planner in planners {
        let populated: Vec<String> = planner
            .paths
            .iter()
            .filter(|p| p.kind == PathKind::Field)
            .map(|p| p.path.clone())
            .collect();
        planner.paths.retain(|p| {
            if p.kind != PathKind::Fragment {
                return true;
            }
            let prefix = format!("{}.", p.path);
            populated.iter().any(|f| f.starts_with(&prefix))
        });
    }
}
