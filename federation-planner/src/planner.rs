//! The convergence driver: alternating node-selection and requirement
//! injection until the operation stops growing, then path assembly until no
//! field waits on a dependency.

use indexmap::IndexMap;
use indexmap::IndexSet;

use crate::config::PlannerOptions;
use crate::config::SubgraphDescriptor;
use crate::config::SubgraphHash;
use crate::error::PlanError;
use crate::error::PlanReport;
use crate::fetch::PathAssembler;
use crate::fetch::PlannerConfiguration;
use crate::fetch::prune_fragment_paths;
use crate::operation::FieldRef;
use crate::operation::OperationDocument;
use crate::operation::walk::walk_operation;
use crate::requirements::DependencyMaps;
use crate::requirements::RequirementInjector;
use crate::schema::SchemaDocument;
use crate::selection::SelectionRound;
use crate::selection::SourceSelector;

/// How many passes each phase took; useful when tuning configurations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanPasses {
    pub selection: usize,
    pub assembly: usize,
}

/// The assembled plan: one configuration per fetch, plus the synthesized
/// fields the response must hide.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub planners: Vec<PlannerConfiguration>,
    pub skip_fields: Vec<FieldRef>,
    pub passes: PlanPasses,
}

/// Plans operations against a fixed set of subgraphs. Reusable across
/// operations, but not concurrently: `plan` mutates the operation document
/// it is given.
#[derive(Debug)]
pub struct Planner {
    subgraphs: Vec<SubgraphDescriptor>,
    options: PlannerOptions,
}

impl Planner {
    pub fn new(
        subgraphs: Vec<SubgraphDescriptor>,
        options: PlannerOptions,
    ) -> Result<Self, PlanError> {
        let mut seen = IndexSet::new();
        for subgraph in &subgraphs {
            if !seen.insert(subgraph.id.clone()) {
                return Err(PlanError::internal(format!(
                    "duplicate subgraph id {:?}",
                    subgraph.id
                )));
            }
        }
        Ok(Self { subgraphs, options })
    }

    /// Decompose the operation into per-subgraph fetches. The document is
    /// mutated: key and requires fields are appended and skip-listed, and
    /// abstract selections may be flattened.
    pub fn plan(
        &self,
        doc: &mut OperationDocument,
        schema: &SchemaDocument,
        operation_name: Option<&str>,
    ) -> Result<QueryPlan, PlanReport> {
        let mut report = PlanReport::new();
        let operation_index = match doc.select_operation(operation_name) {
            Ok(index) => index,
            Err(error) => {
                report.add_error(error);
                return Err(report);
            }
        };

        let mut maps = DependencyMaps::default();
        let mut passes = PlanPasses::default();
        let round = match self.select_nodes(doc, schema, operation_index, &mut maps, &mut passes) {
            Ok(round) => round,
            Err(error) => {
                report.add_error(error);
                return Err(report);
            }
        };

        for field in &round.unresolved {
            let error = match round.infos.get(field) {
                Some(info) => PlanError::UnplannableField {
                    type_name: info.type_name.clone(),
                    field_name: info.field_name.clone(),
                    path: info.path.clone(),
                },
                None => PlanError::internal(format!("unresolved field {field:?} has no info")),
            };
            report.add_error(error);
        }
        if report.has_errors() {
            return Err(report);
        }

        let planners =
            match self.assemble_paths(doc, schema, operation_index, &round, &mut maps, &mut passes)
            {
                Ok(planners) => planners,
                Err(error) => {
                    report.add_error(error);
                    return Err(report);
                }
            };

        Ok(QueryPlan {
            planners,
            skip_fields: doc.skip_fields().iter().copied().collect(),
            passes,
        })
    }

    /// Selection loop: collect and choose, inject requirements, rewrite
    /// abstract selections, and repeat while the operation keeps growing.
    fn select_nodes(
        &self,
        doc: &mut OperationDocument,
        schema: &SchemaDocument,
        operation_index: usize,
        maps: &mut DependencyMaps,
        passes: &mut PlanPasses,
    ) -> Result<SelectionRound, PlanError> {
        let selector = SourceSelector {
            subgraphs: &self.subgraphs,
            options: &self.options,
        };
        let mut visited_requires: IndexSet<FieldRef> = IndexSet::new();
        let mut visited_keys: IndexSet<(FieldRef, SubgraphHash)> = IndexSet::new();
        let mut visited_rewrites: IndexSet<(FieldRef, SubgraphHash)> = IndexSet::new();

        loop {
            passes.selection += 1;
            if passes.selection > self.options.max_planning_passes {
                return Err(PlanError::NonConvergence {
                    passes: self.options.max_planning_passes,
                    missing_paths: Vec::new(),
                    waiting_on_dependencies: false,
                });
            }
            tracing::debug!(pass = passes.selection, "node selection pass");
            let mut round =
                selector.run_round(doc, schema, operation_index, &maps.field_landed_to)?;

            let mut injector = RequirementInjector::new(
                &self.subgraphs,
                &round.suggestions,
                &mut round.jumps,
                maps,
                &mut visited_requires,
                &mut visited_keys,
                &mut visited_rewrites,
            );
            walk_operation(doc, schema, operation_index, &mut injector)?;

            let has_new_fields = injector.has_new_fields;
            if injector.rewritten_field.is_some() {
                // The next pass re-collects over the rewritten selections;
                // only the recorded per-field state must follow the copies.
                let changed = std::mem::take(&mut injector.rewritten_changed);
                remap_after_rewrite(maps, &changed);
                continue;
            }
            if has_new_fields {
                continue;
            }
            return Ok(round);
        }
    }

    /// Assembly loop: build planner paths, deferring fields whose
    /// dependencies are not fetched yet, until a pass completes clean.
    fn assemble_paths(
        &self,
        doc: &mut OperationDocument,
        schema: &SchemaDocument,
        operation_index: usize,
        round: &SelectionRound,
        maps: &mut DependencyMaps,
        passes: &mut PlanPasses,
    ) -> Result<Vec<PlannerConfiguration>, PlanError> {
        let mut planners: Vec<PlannerConfiguration> = Vec::new();
        let mut fields_planned_on: IndexMap<FieldRef, Vec<usize>> = IndexMap::new();
        let mut secondary_run = false;

        loop {
            passes.assembly += 1;
            if passes.assembly > self.options.max_planning_passes {
                return Err(PlanError::NonConvergence {
                    passes: self.options.max_planning_passes,
                    missing_paths: Vec::new(),
                    waiting_on_dependencies: true,
                });
            }
            tracing::debug!(pass = passes.assembly, "path assembly pass");
            let mut assembler = PathAssembler::new(
                &self.subgraphs,
                &round.suggestions,
                maps,
                &mut planners,
                &mut fields_planned_on,
                secondary_run,
            );
            walk_operation(doc, schema, operation_index, &mut assembler)?;
            if !assembler.should_revisit() {
                break;
            }
            let missing: Vec<String> = assembler.missing_paths.iter().cloned().collect();
            let waiting = !assembler.fields_waiting.is_empty();
            if !secondary_run {
                secondary_run = true;
            } else if planners_stuck(&missing, passes.assembly, self.options.max_planning_passes) {
                return Err(PlanError::NonConvergence {
                    passes: passes.assembly,
                    missing_paths: missing,
                    waiting_on_dependencies: waiting,
                });
            }
        }

        prune_fragment_paths(&mut planners);
        if self.options.debug.print_planning_paths {
            for planner in &planners {
                tracing::debug!(
                    fetch_id = planner.fetch_id,
                    subgraph = %planner.subgraph_id,
                    paths = ?planner.paths.iter().map(|p| p.path.as_str()).collect::<Vec<_>>(),
                    depends_on = ?planner.depends_on_fetch_ids,
                    "planner paths"
                );
            }
        }
        Ok(planners)
    }
}

fn planners_stuck(missing: &[String], pass: usize, max: usize) -> bool {
    // Missing paths normally drain within a few passes; treat hitting the
    // cap's neighborhood as stuck so the error carries the paths instead of
    // an empty payload.
    !missing.is_empty() && pass + 1 >= max
}

/// After a rewrite copied fields into per-type fragments, pins and
/// dependencies recorded against the originals follow the copies.
fn remap_after_rewrite(maps: &mut DependencyMaps, changed: &IndexMap<FieldRef, Vec<FieldRef>>) {
    for (old, copies) in changed {
        if let Some(&landed) = maps.field_landed_to.get(old) {
            for &copy in copies {
                maps.field_landed_to.entry(copy).or_insert(landed);
            }
        }
        if let Some(deps) = maps.field_ref_depends_on.get(old).cloned() {
            for &copy in copies {
                maps.field_ref_depends_on.entry(copy).or_insert_with(|| deps.clone());
            }
        }
    }
}
