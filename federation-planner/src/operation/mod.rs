//! Append-only arena for a normalized GraphQL operation document.
//!
//! The host normalizer is expected to have inlined named fragments and merged
//! duplicate selections before handing the document over. Planning mutates
//! the document only by appending nodes and relinking selection lists, so a
//! `FieldRef` handed out once stays valid for the lifetime of the document.

pub mod walk;

use indexmap::IndexSet;
use serde::Serialize;

use crate::error::PlanError;
use crate::schema::TYPENAME_FIELD;

/// Index of a field node in the operation arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FieldRef(pub usize);

/// Index of a selection set in the operation arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SelectionSetRef(pub usize);

/// Index of an inline fragment in the operation arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FragmentRef(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Selection {
    Field(FieldRef),
    InlineFragment(FragmentRef),
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldNode {
    pub name: String,
    pub alias: Option<String>,
    pub selection_set: Option<SelectionSetRef>,
}

impl FieldNode {
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn is_typename(&self) -> bool {
        self.name == TYPENAME_FIELD
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InlineFragmentNode {
    pub type_condition: String,
    pub selection_set: SelectionSetRef,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SelectionSetNode {
    pub selections: Vec<Selection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperationKind {
    Query,
    Mutation,
}

impl OperationKind {
    /// Leading segment of every dot-delimited path in this operation.
    pub fn root_path(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationDefinition {
    pub name: Option<String>,
    pub kind: OperationKind,
    pub selection_set: SelectionSetRef,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationDocument {
    fields: Vec<FieldNode>,
    selection_sets: Vec<SelectionSetNode>,
    fragments: Vec<InlineFragmentNode>,
    operations: Vec<OperationDefinition>,
    /// Fields synthesized for keys and requirements. They are fetched but
    /// must not appear in the user-visible response.
    skip_fields: IndexSet<FieldRef>,
}

impl OperationDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_selection_set(&mut self, selections: Vec<Selection>) -> SelectionSetRef {
        self.selection_sets.push(SelectionSetNode { selections });
        SelectionSetRef(self.selection_sets.len() - 1)
    }

    pub fn add_field(
        &mut self,
        name: impl Into<String>,
        alias: Option<String>,
        selection_set: Option<SelectionSetRef>,
    ) -> FieldRef {
        self.fields.push(FieldNode {
            name: name.into(),
            alias,
            selection_set,
        });
        FieldRef(self.fields.len() - 1)
    }

    pub fn add_inline_fragment(
        &mut self,
        type_condition: impl Into<String>,
        selection_set: SelectionSetRef,
    ) -> FragmentRef {
        self.fragments.push(InlineFragmentNode {
            type_condition: type_condition.into(),
            selection_set,
        });
        FragmentRef(self.fragments.len() - 1)
    }

    pub fn add_operation(
        &mut self,
        name: Option<&str>,
        kind: OperationKind,
        selection_set: SelectionSetRef,
    ) {
        self.operations.push(OperationDefinition {
            name: name.map(str::to_string),
            kind,
            selection_set,
        });
    }

    pub fn field(&self, field: FieldRef) -> &FieldNode {
        &self.fields[field.0]
    }

    pub fn field_mut(&mut self, field: FieldRef) -> &mut FieldNode {
        &mut self.fields[field.0]
    }

    pub fn selection_set(&self, set: SelectionSetRef) -> &SelectionSetNode {
        &self.selection_sets[set.0]
    }

    pub fn fragment(&self, fragment: FragmentRef) -> &InlineFragmentNode {
        &self.fragments[fragment.0]
    }

    pub fn operations(&self) -> &[OperationDefinition] {
        &self.operations
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field_refs(&self) -> impl Iterator<Item = FieldRef> + use<> {
        (0..self.fields.len()).map(FieldRef)
    }

    pub fn push_selection(&mut self, set: SelectionSetRef, selection: Selection) {
        self.selection_sets[set.0].selections.push(selection);
    }

    pub fn replace_selections(&mut self, set: SelectionSetRef, selections: Vec<Selection>) {
        self.selection_sets[set.0].selections = selections;
    }

    pub fn set_field_selection_set(&mut self, field: FieldRef, set: SelectionSetRef) {
        self.fields[field.0].selection_set = Some(set);
    }

    pub fn mark_skipped(&mut self, field: FieldRef) {
        self.skip_fields.insert(field);
    }

    pub fn is_skipped(&self, field: FieldRef) -> bool {
        self.skip_fields.contains(&field)
    }

    pub fn skip_fields(&self) -> &IndexSet<FieldRef> {
        &self.skip_fields
    }

    /// Find a direct (non-aliased) child field by name under a selection set.
    pub fn find_field(&self, set: SelectionSetRef, name: &str) -> Option<FieldRef> {
        self.selection_sets[set.0]
            .selections
            .iter()
            .find_map(|selection| match selection {
                Selection::Field(f) if self.fields[f.0].name == name
                    && self.fields[f.0].alias.is_none() =>
                {
                    Some(*f)
                }
                _ => None,
            })
    }

    /// Find a direct inline fragment by type condition under a selection set.
    pub fn find_fragment(&self, set: SelectionSetRef, type_condition: &str) -> Option<FragmentRef> {
        self.selection_sets[set.0]
            .selections
            .iter()
            .find_map(|selection| match selection {
                Selection::InlineFragment(f)
                    if self.fragments[f.0].type_condition == type_condition =>
                {
                    Some(*f)
                }
                _ => None,
            })
    }

    /// Resolve the operation to plan. With a name, the document is searched
    /// for it; without one, the document must define exactly one operation.
    pub fn select_operation(&self, name: Option<&str>) -> Result<usize, PlanError> {
        match name {
            Some(wanted) => self
                .operations
                .iter()
                .position(|op| op.name.as_deref() == Some(wanted))
                .ok_or_else(|| PlanError::UnknownOperation {
                    name: Some(wanted.to_string()),
                }),
            None => match self.operations.len() {
                0 => Err(PlanError::UnknownOperation { name: None }),
                1 => Ok(0),
                _ => Err(PlanError::OperationNameRequired),
            },
        }
    }

    /// Deep-copy a field with its entire selection subtree, returning the new
    /// ref and recording every copied descendant field pair.
    pub fn copy_field(
        &mut self,
        field: FieldRef,
        copied: &mut Vec<(FieldRef, FieldRef)>,
    ) -> FieldRef {
        let node = self.fields[field.0].clone();
        let selection_set = node.selection_set.map(|set| self.copy_selection_set(set, copied));
        self.fields.push(FieldNode {
            name: node.name,
            alias: node.alias,
            selection_set,
        });
        let new_ref = FieldRef(self.fields.len() - 1);
        if self.skip_fields.contains(&field) {
            self.skip_fields.insert(new_ref);
        }
        copied.push((field, new_ref));
        new_ref
    }

    fn copy_selection_set(
        &mut self,
        set: SelectionSetRef,
        copied: &mut Vec<(FieldRef, FieldRef)>,
    ) -> SelectionSetRef {
        let selections = self.selection_sets[set.0].selections.clone();
        let mut new_selections = Vec::with_capacity(selections.len());
        for selection in selections {
            match selection {
                Selection::Field(f) => {
                    new_selections.push(Selection::Field(self.copy_field(f, copied)));
                }
                Selection::InlineFragment(f) => {
                    let fragment = self.fragments[f.0].clone();
                    let inner = self.copy_selection_set(fragment.selection_set, copied);
                    self.fragments.push(InlineFragmentNode {
                        type_condition: fragment.type_condition,
                        selection_set: inner,
                    });
                    new_selections.push(Selection::InlineFragment(FragmentRef(
                        self.fragments.len() - 1,
                    )));
                }
            }
        }
        self.selection_sets.push(SelectionSetNode {
            selections: new_selections,
        });
        SelectionSetRef(self.selection_sets.len() - 1)
    }

    /// All field refs in the subtree rooted at `field`, the root included.
    pub fn subtree_field_refs(&self, field: FieldRef) -> Vec<FieldRef> {
        let mut refs = vec![field];
        if let Some(set) = self.fields[field.0].selection_set {
            self.collect_set_fields(set, &mut refs);
        }
        refs
    }

    fn collect_set_fields(&self, set: SelectionSetRef, refs: &mut Vec<FieldRef>) {
        for selection in &self.selection_sets[set.0].selections {
            match selection {
                Selection::Field(f) => {
                    refs.push(*f);
                    if let Some(inner) = self.fields[f.0].selection_set {
                        self.collect_set_fields(inner, refs);
                    }
                }
                Selection::InlineFragment(f) => {
                    self.collect_set_fields(self.fragments[f.0].selection_set, refs);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn two_level_doc() -> (OperationDocument, FieldRef, FieldRef) {
        let mut doc = OperationDocument::new();
        let name = doc.add_field("name", None, None);
        let me_set = doc.add_selection_set(vec![Selection::Field(name)]);
        let me = doc.add_field("me", None, Some(me_set));
        let root = doc.add_selection_set(vec![Selection::Field(me)]);
        doc.add_operation(None, OperationKind::Query, root);
        (doc, me, name)
    }

    #[test]
    fn select_operation_by_name_and_default() {
        let (mut doc, _, _) = two_level_doc();
        assert_eq!(doc.select_operation(None), Ok(0));

        let empty = doc.add_selection_set(vec![]);
        doc.add_operation(Some("Second"), OperationKind::Query, empty);
        assert_eq!(doc.select_operation(None), Err(PlanError::OperationNameRequired));
        assert_eq!(doc.select_operation(Some("Second")), Ok(1));
        assert_eq!(
            doc.select_operation(Some("Nope")),
            Err(PlanError::UnknownOperation {
                name: Some("Nope".to_string())
            })
        );
    }

    #[test]
    fn copy_field_duplicates_subtree_and_skip_marks() {
        let (mut doc, me, name) = two_level_doc();
        doc.mark_skipped(name);

        let mut copied = Vec::new();
        let me_copy = doc.copy_field(me, &mut copied);

        assert_ne!(me_copy, me);
        let name_copy = copied
            .iter()
            .find(|(old, _)| *old == name)
            .map(|(_, new)| *new)
            .unwrap();
        assert!(doc.is_skipped(name_copy));
        assert_eq!(doc.field(name_copy).name, "name");
        assert_eq!(doc.subtree_field_refs(me_copy).len(), 2);
    }

    #[test]
    fn find_field_ignores_aliased_entries() {
        let mut doc = OperationDocument::new();
        let aliased = doc.add_field("id", Some("key".to_string()), None);
        let set = doc.add_selection_set(vec![Selection::Field(aliased)]);
        assert_eq!(doc.find_field(set, "id"), None);

        let plain = doc.add_field("id", None, None);
        doc.push_selection(set, Selection::Field(plain));
        assert_eq!(doc.find_field(set, "id"), Some(plain));
    }
}
