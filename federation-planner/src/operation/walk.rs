//! Recursive-descent traversal of an operation document.
//!
//! The walker keeps explicit path and enclosing-type stacks and hands them to
//! visitors through [`WalkContext`]; visitors carry no positional state of
//! their own. Selection lists are snapshotted before descending, so a visitor
//! may append selections to the set it is currently leaving without the new
//! nodes being walked in the same pass.

use crate::error::PlanError;
use crate::operation::FieldRef;
use crate::operation::FragmentRef;
use crate::operation::OperationDocument;
use crate::operation::OperationKind;
use crate::operation::Selection;
use crate::operation::SelectionSetRef;
use crate::schema::FieldType;
use crate::schema::SchemaDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitAction {
    Continue,
    /// Do not descend into the current node's selections.
    SkipSubtree,
    /// Abort the whole walk. The pass will be re-run from scratch.
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentKind {
    Field,
    Fragment,
}

/// Positional state of an in-progress walk.
pub struct WalkContext<'s> {
    schema: &'s SchemaDocument,
    operation_kind: OperationKind,
    /// Full dot-delimited path at each depth; index 0 is the root path.
    paths: Vec<String>,
    segments: Vec<SegmentKind>,
    types: Vec<String>,
}

impl<'s> WalkContext<'s> {
    pub fn schema(&self) -> &'s SchemaDocument {
        self.schema
    }

    pub fn operation_kind(&self) -> OperationKind {
        self.operation_kind
    }

    /// Path of the node currently visited. For a field `me` at the root this
    /// is `query.me`; for a fragment on `User` under it, `query.me.$User`.
    pub fn current_path(&self) -> &str {
        self.paths.last().map(String::as_str).unwrap_or_default()
    }

    /// Path of the enclosing node, i.e. `current_path` minus its last segment.
    pub fn parent_path(&self) -> &str {
        if self.paths.len() < 2 {
            return self.current_path();
        }
        &self.paths[self.paths.len() - 2]
    }

    /// Type whose selection set is currently being walked. During
    /// `enter_field` this is the field's parent type.
    pub fn enclosing_type(&self) -> &str {
        self.types.last().map(String::as_str).unwrap_or_default()
    }

    /// Whether the currently visited field sits directly under an inline
    /// fragment.
    pub fn on_fragment(&self) -> bool {
        self.segments.len() >= 2
            && self.segments[self.segments.len() - 2] == SegmentKind::Fragment
    }

    /// The parent path with trailing fragment segments stripped, when the
    /// currently visited field sits under one or more inline fragments.
    pub fn parent_path_without_fragment(&self) -> Option<String> {
        if !self.on_fragment() {
            return None;
        }
        let mut i = self.segments.len() - 2;
        while i > 0 && self.segments[i] == SegmentKind::Fragment {
            i -= 1;
        }
        Some(self.paths[i].clone())
    }

    /// Return type of the currently visited field.
    pub fn field_type(
        &self,
        doc: &OperationDocument,
        field: FieldRef,
    ) -> Result<FieldType, PlanError> {
        let node = doc.field(field);
        self.schema
            .field_type(self.enclosing_type(), &node.name)
            .ok_or_else(|| {
                PlanError::internal(format!(
                    "field {}.{} is not defined in the schema",
                    self.enclosing_type(),
                    node.name
                ))
            })
    }

    fn push_field(&mut self, response_key: &str) {
        let path = format!("{}.{}", self.current_path(), response_key);
        self.paths.push(path);
        self.segments.push(SegmentKind::Field);
    }

    fn push_fragment(&mut self, type_condition: &str) {
        let path = format!("{}.${}", self.current_path(), type_condition);
        self.paths.push(path);
        self.segments.push(SegmentKind::Fragment);
    }

    fn pop(&mut self) {
        self.paths.pop();
        self.segments.pop();
    }
}

/// Visitor over an operation walk. Default implementations make every
/// callback optional.
pub trait OperationVisitor {
    fn enter_selection_set(
        &mut self,
        _doc: &mut OperationDocument,
        _cx: &WalkContext<'_>,
        _set: SelectionSetRef,
    ) -> Result<(), PlanError> {
        Ok(())
    }

    fn leave_selection_set(
        &mut self,
        _doc: &mut OperationDocument,
        _cx: &WalkContext<'_>,
        _set: SelectionSetRef,
    ) -> Result<(), PlanError> {
        Ok(())
    }

    fn enter_field(
        &mut self,
        _doc: &mut OperationDocument,
        _cx: &WalkContext<'_>,
        _field: FieldRef,
    ) -> Result<VisitAction, PlanError> {
        Ok(VisitAction::Continue)
    }

    fn leave_field(
        &mut self,
        _doc: &mut OperationDocument,
        _cx: &WalkContext<'_>,
        _field: FieldRef,
    ) -> Result<(), PlanError> {
        Ok(())
    }

    fn enter_inline_fragment(
        &mut self,
        _doc: &mut OperationDocument,
        _cx: &WalkContext<'_>,
        _fragment: FragmentRef,
    ) -> Result<VisitAction, PlanError> {
        Ok(VisitAction::Continue)
    }

    fn leave_inline_fragment(
        &mut self,
        _doc: &mut OperationDocument,
        _cx: &WalkContext<'_>,
        _fragment: FragmentRef,
    ) -> Result<(), PlanError> {
        Ok(())
    }
}

/// Walk one operation of the document with the given visitor.
pub fn walk_operation<V: OperationVisitor>(
    doc: &mut OperationDocument,
    schema: &SchemaDocument,
    operation_index: usize,
    visitor: &mut V,
) -> Result<(), PlanError> {
    let operation = doc
        .operations()
        .get(operation_index)
        .cloned()
        .ok_or_else(|| PlanError::internal("operation index out of bounds"))?;
    let root_type = match operation.kind {
        OperationKind::Query => schema.query_type().to_string(),
        OperationKind::Mutation => schema
            .mutation_type()
            .ok_or_else(|| PlanError::internal("the schema does not define a mutation type"))?
            .to_string(),
    };
    let mut cx = WalkContext {
        schema,
        operation_kind: operation.kind,
        paths: vec![operation.kind.root_path().to_string()],
        segments: vec![SegmentKind::Field],
        types: vec![root_type],
    };
    let mut walker = Walker {
        visitor,
        stopped: false,
    };
    walker.walk_selection_set(doc, &mut cx, operation.selection_set)?;
    Ok(())
}

struct Walker<'v, V> {
    visitor: &'v mut V,
    stopped: bool,
}

impl<V: OperationVisitor> Walker<'_, V> {
    fn walk_selection_set(
        &mut self,
        doc: &mut OperationDocument,
        cx: &mut WalkContext<'_>,
        set: SelectionSetRef,
    ) -> Result<(), PlanError> {
        self.visitor.enter_selection_set(doc, cx, set)?;
        // Snapshot: selections appended during this walk belong to the next pass.
        let selections = doc.selection_set(set).selections.clone();
        for selection in selections {
            if self.stopped {
                return Ok(());
            }
            match selection {
                Selection::Field(field) => self.walk_field(doc, cx, field)?,
                Selection::InlineFragment(fragment) => {
                    self.walk_inline_fragment(doc, cx, fragment)?;
                }
            }
        }
        if self.stopped {
            return Ok(());
        }
        self.visitor.leave_selection_set(doc, cx, set)
    }

    fn walk_field(
        &mut self,
        doc: &mut OperationDocument,
        cx: &mut WalkContext<'_>,
        field: FieldRef,
    ) -> Result<(), PlanError> {
        let node = doc.field(field);
        let response_key = node.response_key().to_string();
        let field_name = node.name.clone();
        cx.push_field(&response_key);
        let action = self.visitor.enter_field(doc, cx, field)?;
        match action {
            VisitAction::Stop => {
                self.stopped = true;
                cx.pop();
                return Ok(());
            }
            VisitAction::SkipSubtree => {}
            VisitAction::Continue => {
                // Re-read: the visitor may have attached a selection set.
                if let Some(subset) = doc.field(field).selection_set {
                    let field_type = cx
                        .schema
                        .field_type(cx.enclosing_type(), &field_name)
                        .ok_or_else(|| {
                            PlanError::internal(format!(
                                "field {}.{} is not defined in the schema",
                                cx.enclosing_type(),
                                field_name
                            ))
                        })?;
                    cx.types.push(field_type.type_name);
                    self.walk_selection_set(doc, cx, subset)?;
                    cx.types.pop();
                }
            }
        }
        if !self.stopped {
            self.visitor.leave_field(doc, cx, field)?;
        }
        cx.pop();
        Ok(())
    }

    fn walk_inline_fragment(
        &mut self,
        doc: &mut OperationDocument,
        cx: &mut WalkContext<'_>,
        fragment: FragmentRef,
    ) -> Result<(), PlanError> {
        let node = doc.fragment(fragment).clone();
        cx.push_fragment(&node.type_condition);
        cx.types.push(node.type_condition);
        let action = self.visitor.enter_inline_fragment(doc, cx, fragment)?;
        match action {
            VisitAction::Stop => self.stopped = true,
            VisitAction::SkipSubtree => {}
            VisitAction::Continue => {
                self.walk_selection_set(doc, cx, node.selection_set)?;
            }
        }
        if !self.stopped {
            self.visitor.leave_inline_fragment(doc, cx, fragment)?;
        }
        cx.types.pop();
        cx.pop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::schema::SchemaDocument;

    #[derive(Default)]
    struct Recorder {
        field_paths: Vec<(String, String, bool)>,
    }

    impl OperationVisitor for Recorder {
        fn enter_field(
            &mut self,
            _doc: &mut OperationDocument,
            cx: &WalkContext<'_>,
            _field: FieldRef,
        ) -> Result<VisitAction, PlanError> {
            self.field_paths.push((
                cx.current_path().to_string(),
                cx.enclosing_type().to_string(),
                cx.on_fragment(),
            ));
            Ok(VisitAction::Continue)
        }
    }

    fn schema() -> SchemaDocument {
        SchemaDocument::builder()
            .interface("Media", &[("title", "String")])
            .object_with("Book", &["Media"], &[("title", "String"), ("isbn", "String")])
            .object("Query", &[("media", "Media")])
            .build()
    }

    #[test]
    fn paths_types_and_fragment_flags() {
        let mut doc = OperationDocument::new();
        let isbn = doc.add_field("isbn", None, None);
        let book_set = doc.add_selection_set(vec![Selection::Field(isbn)]);
        let book_fragment = doc.add_inline_fragment("Book", book_set);
        let title = doc.add_field("title", None, None);
        let media_set = doc.add_selection_set(vec![
            Selection::Field(title),
            Selection::InlineFragment(book_fragment),
        ]);
        let media = doc.add_field("media", None, Some(media_set));
        let root = doc.add_selection_set(vec![Selection::Field(media)]);
        doc.add_operation(None, OperationKind::Query, root);

        let mut recorder = Recorder::default();
        walk_operation(&mut doc, &schema(), 0, &mut recorder).unwrap();

        assert_eq!(
            recorder.field_paths,
            vec![
                ("query.media".to_string(), "Query".to_string(), false),
                ("query.media.title".to_string(), "Media".to_string(), false),
                ("query.media.$Book.isbn".to_string(), "Book".to_string(), true),
            ]
        );
    }
}
