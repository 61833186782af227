//! Deciding which subgraph serves each field of the operation.
//!
//! One round = collect every (field, subgraph) capability into a suggestion
//! index, then run the selection strategies over it. The planner repeats
//! rounds whenever requirement injection or abstract rewrites grow the
//! operation.

mod choose;
mod collect;

pub(crate) use collect::FieldInfo;
use indexmap::IndexMap;

use crate::config::PlannerOptions;
use crate::config::SubgraphDescriptor;
use crate::config::SubgraphHash;
use crate::error::PlanError;
use crate::jumps::KeyJumpGraph;
use crate::operation::FieldRef;
use crate::operation::OperationDocument;
use crate::schema::SchemaDocument;
use crate::suggestion::NodeSuggestions;

pub(crate) struct SelectionRound {
    pub suggestions: NodeSuggestions,
    pub infos: IndexMap<FieldRef, FieldInfo>,
    pub jumps: KeyJumpGraph,
    /// Fields that ended the round with no selected suggestion.
    pub unresolved: Vec<FieldRef>,
}

pub(crate) struct SourceSelector<'a> {
    pub subgraphs: &'a [SubgraphDescriptor],
    pub options: &'a PlannerOptions,
}

impl SourceSelector<'_> {
    pub(crate) fn run_round(
        &self,
        doc: &mut OperationDocument,
        schema: &SchemaDocument,
        operation_index: usize,
        landed: &IndexMap<FieldRef, SubgraphHash>,
    ) -> Result<SelectionRound, PlanError> {
        let collected = collect::collect_nodes(doc, schema, self.subgraphs, operation_index)?;
        let mut suggestions = collected.suggestions;
        let mut jumps = KeyJumpGraph::new(&collected.keys_by_subgraph);

        let mut cx = choose::ChooseContext {
            suggestions: &mut suggestions,
            jumps: &mut jumps,
            landed,
            track_reasons: self.options.debug.track_selection_reasons,
        };
        choose::choose_sources(&mut cx);

        let unresolved = choose::unresolved_fields(&suggestions);
        if self.options.debug.print_node_suggestions {
            for item in suggestions.items() {
                tracing::debug!(
                    subgraph = %item.subgraph_id,
                    path = %item.path,
                    selected = item.selected,
                    reasons = ?item.selection_reasons,
                    suggestion = %serde_json::to_string(item).unwrap_or_default(),
                    "node suggestion"
                );
            }
        }
        Ok(SelectionRound {
            suggestions,
            infos: collected.infos,
            jumps,
            unresolved,
        })
    }
}
