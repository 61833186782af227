//! Flattening of selections on abstract types for subgraphs with a narrower
//! view of the type than the supergraph.
//!
//! When a subgraph cannot satisfy an interface or union selection as written
//! (it misses member types, a fragment targets a type it does not know, or a
//! member cannot resolve the interface fields), the selection is rewritten
//! into one inline fragment per member type the subgraph does know. Fields of
//! members the subgraph cannot serve then surface as their own suggestions
//! and can be planned onto other subgraphs.

use indexmap::IndexMap;
use indexmap::IndexSet;

use crate::config::SubgraphDescriptor;
use crate::error::PlanError;
use crate::operation::FieldRef;
use crate::operation::OperationDocument;
use crate::operation::Selection;
use crate::operation::SelectionSetRef;
use crate::schema::SchemaDocument;
use crate::schema::TypeKind;

pub(crate) struct RewriteResult {
    pub rewritten: bool,
    /// Original field refs to the copies that replaced them.
    pub changed_field_refs: IndexMap<FieldRef, Vec<FieldRef>>,
}

impl RewriteResult {
    fn unchanged() -> Self {
        Self {
            rewritten: false,
            changed_field_refs: IndexMap::new(),
        }
    }
}

pub(crate) fn rewrite_field_selection(
    doc: &mut OperationDocument,
    schema: &SchemaDocument,
    subgraph: &SubgraphDescriptor,
    field: FieldRef,
    abstract_type: &str,
) -> Result<RewriteResult, PlanError> {
    let Some(kind) = schema.type_kind(abstract_type) else {
        return Err(PlanError::internal(format!(
            "unknown abstract type {abstract_type}"
        )));
    };
    if !kind.is_abstract() {
        return Ok(RewriteResult::unchanged());
    }
    // An interface object resolves interface selections directly; nothing to
    // flatten for this subgraph.
    if subgraph.metadata.has_interface_object(abstract_type) {
        return Ok(RewriteResult::unchanged());
    }
    let Some(set) = doc.field(field).selection_set else {
        return Ok(RewriteResult::unchanged());
    };

    let supergraph_types = schema.possible_type_names(abstract_type);
    let allowed: Vec<String> = supergraph_types
        .iter()
        .filter(|t| subgraph_knows_member(subgraph, abstract_type, t, kind))
        .cloned()
        .collect();

    let shape = SelectionShape::collect(doc, set);
    if !needs_rewrite(
        schema,
        subgraph,
        abstract_type,
        kind,
        &supergraph_types,
        &allowed,
        &shape,
    ) {
        return Ok(RewriteResult::unchanged());
    }

    flatten(doc, schema, set, &allowed, &shape)
}

fn subgraph_knows_member(
    subgraph: &SubgraphDescriptor,
    abstract_type: &str,
    member: &str,
    kind: TypeKind,
) -> bool {
    match kind {
        TypeKind::Interface => {
            subgraph.schema.has_type(member)
                && subgraph.schema.object_implements(member, abstract_type)
        }
        TypeKind::Union => subgraph.schema.is_union_member(abstract_type, member),
        _ => false,
    }
}

/// The structure of the existing selection set, split the way flattening
/// consumes it.
struct SelectionShape {
    typename_fields: Vec<FieldRef>,
    direct_fields: Vec<(FieldRef, String)>,
    fragments: Vec<(String, SelectionSetRef)>,
}

impl SelectionShape {
    fn collect(doc: &OperationDocument, set: SelectionSetRef) -> Self {
        let mut shape = Self {
            typename_fields: Vec::new(),
            direct_fields: Vec::new(),
            fragments: Vec::new(),
        };
        for selection in &doc.selection_set(set).selections {
            match selection {
                Selection::Field(f) => {
                    if doc.field(*f).is_typename() {
                        shape.typename_fields.push(*f);
                    } else {
                        shape.direct_fields.push((*f, doc.field(*f).name.clone()));
                    }
                }
                Selection::InlineFragment(f) => {
                    let fragment = doc.fragment(*f);
                    shape
                        .fragments
                        .push((fragment.type_condition.clone(), fragment.selection_set));
                }
            }
        }
        shape
    }
}

fn needs_rewrite(
    schema: &SchemaDocument,
    subgraph: &SubgraphDescriptor,
    abstract_type: &str,
    kind: TypeKind,
    supergraph_types: &[String],
    allowed: &[String],
    shape: &SelectionShape,
) -> bool {
    // A fragment on a type the subgraph does not know (or on a nested
    // abstract type) must be flattened or dropped.
    for (condition, _) in &shape.fragments {
        if schema.is_abstract(condition) {
            return true;
        }
        if !allowed.iter().any(|t| t == condition) {
            return true;
        }
    }
    // Members only the supergraph knows cannot answer fields selected on the
    // abstract type itself; per-type fragments let other subgraphs fill them.
    if !shape.direct_fields.is_empty() && allowed.len() != supergraph_types.len() {
        return true;
    }
    // Interface fields some member cannot resolve here force per-type plans.
    if kind == TypeKind::Interface {
        for member in allowed {
            let all_resolvable = shape.direct_fields.iter().all(|(_, name)| {
                resolvable_on(subgraph, member, name)
                    || resolvable_on(subgraph, abstract_type, name)
            });
            if !all_resolvable {
                return true;
            }
        }
    }
    false
}

fn resolvable_on(subgraph: &SubgraphDescriptor, type_name: &str, field_name: &str) -> bool {
    subgraph.has_root_node(type_name, field_name) || subgraph.has_child_node(type_name, field_name)
}

fn flatten(
    doc: &mut OperationDocument,
    schema: &SchemaDocument,
    set: SelectionSetRef,
    allowed: &[String],
    shape: &SelectionShape,
) -> Result<RewriteResult, PlanError> {
    let mut changed: IndexMap<FieldRef, Vec<FieldRef>> = IndexMap::new();
    let mut new_selections: Vec<Selection> =
        shape.typename_fields.iter().map(|&f| Selection::Field(f)).collect();

    for member in allowed {
        let mut member_fields: Vec<Selection> = Vec::new();
        let mut seen_keys: IndexSet<String> = IndexSet::new();

        for (field, _) in &shape.direct_fields {
            push_copy(doc, *field, &mut member_fields, &mut seen_keys, &mut changed);
        }
        for (condition, fragment_set) in &shape.fragments {
            if !fragment_matches(schema, condition, member) {
                continue;
            }
            collect_fragment_fields(
                doc,
                schema,
                *fragment_set,
                member,
                &mut member_fields,
                &mut seen_keys,
                &mut changed,
            );
        }
        if member_fields.is_empty() {
            continue;
        }
        let member_set = doc.add_selection_set(member_fields);
        let fragment = doc.add_inline_fragment(member.as_str(), member_set);
        new_selections.push(Selection::InlineFragment(fragment));
    }

    if new_selections.is_empty() {
        // Nothing this subgraph can provide; keep the selection valid with a
        // hidden __typename.
        let typename = doc.add_field(crate::schema::TYPENAME_FIELD, None, None);
        doc.mark_skipped(typename);
        new_selections.push(Selection::Field(typename));
    }
    doc.replace_selections(set, new_selections);
    Ok(RewriteResult {
        rewritten: true,
        changed_field_refs: changed,
    })
}

/// Whether a fragment on `condition` applies to the concrete `member` type.
fn fragment_matches(schema: &SchemaDocument, condition: &str, member: &str) -> bool {
    if condition == member {
        return true;
    }
    schema.is_abstract(condition)
        && schema
            .possible_type_names(condition)
            .iter()
            .any(|t| t == member)
}

fn collect_fragment_fields(
    doc: &mut OperationDocument,
    schema: &SchemaDocument,
    set: SelectionSetRef,
    member: &str,
    out: &mut Vec<Selection>,
    seen_keys: &mut IndexSet<String>,
    changed: &mut IndexMap<FieldRef, Vec<FieldRef>>,
) {
    let selections = doc.selection_set(set).selections.clone();
    for selection in selections {
        match selection {
            Selection::Field(field) => {
                push_copy(doc, field, out, seen_keys, changed);
            }
            Selection::InlineFragment(fragment) => {
                let node = doc.fragment(fragment).clone();
                if fragment_matches(schema, &node.type_condition, member) {
                    collect_fragment_fields(
                        doc,
                        schema,
                        node.selection_set,
                        member,
                        out,
                        seen_keys,
                        changed,
                    );
                }
            }
        }
    }
}

fn push_copy(
    doc: &mut OperationDocument,
    field: FieldRef,
    out: &mut Vec<Selection>,
    seen_keys: &mut IndexSet<String>,
    changed: &mut IndexMap<FieldRef, Vec<FieldRef>>,
) {
    let key = doc.field(field).response_key().to_string();
    if !seen_keys.insert(key) {
        return;
    }
    let mut copied = Vec::new();
    let copy = doc.copy_field(field, &mut copied);
    for (old, new) in copied {
        changed.entry(old).or_default().push(new);
    }
    out.push(Selection::Field(copy));
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::FederationMetadata;
    use crate::config::GraphqlPlannerFactory;
    use crate::config::SubgraphDescriptor;
    use crate::config::TypeField;
    use crate::config::TypeFields;
    use crate::operation::OperationKind;

    fn supergraph() -> SchemaDocument {
        SchemaDocument::builder()
            .interface("Media", &[("title", "String")])
            .object_with("Book", &["Media"], &[("title", "String"), ("isbn", "String")])
            .object_with("Movie", &["Media"], &[("title", "String"), ("runtime", "Int")])
            .union("Searchable", &["Book", "Movie"])
            .object("Query", &[("media", "Media"), ("search", "Searchable")])
            .build()
    }

    /// A subgraph that only knows Book, not Movie.
    fn book_subgraph() -> SubgraphDescriptor {
        let schema = SchemaDocument::builder()
            .interface("Media", &[("title", "String")])
            .object_with("Book", &["Media"], &[("title", "String"), ("isbn", "String")])
            .union("Searchable", &["Book"])
            .object("Query", &[("media", "Media"), ("search", "Searchable")])
            .build();
        SubgraphDescriptor::new(
            "books",
            TypeFields::new(vec![TypeField {
                type_name: "Query".to_string(),
                field_names: vec!["media".to_string(), "search".to_string()],
                external_field_names: vec![],
            }]),
            TypeFields::new(vec![TypeField {
                type_name: "Book".to_string(),
                field_names: vec!["title".to_string(), "isbn".to_string()],
                external_field_names: vec![],
            }]),
            FederationMetadata::default(),
            schema,
            Arc::new(GraphqlPlannerFactory),
        )
    }

    #[test]
    fn interface_selection_flattens_to_known_members() {
        let mut doc = OperationDocument::new();
        let title = doc.add_field("title", None, None);
        let media_set = doc.add_selection_set(vec![Selection::Field(title)]);
        let media = doc.add_field("media", None, Some(media_set));
        let root = doc.add_selection_set(vec![Selection::Field(media)]);
        doc.add_operation(None, OperationKind::Query, root);

        let result = rewrite_field_selection(
            &mut doc,
            &supergraph(),
            &book_subgraph(),
            media,
            "Media",
        )
        .unwrap();

        assert!(result.rewritten);
        let selections = &doc.selection_set(media_set).selections;
        assert_eq!(selections.len(), 1);
        let book_fragment = doc.find_fragment(media_set, "Book").unwrap();
        let inner = doc.fragment(book_fragment).selection_set;
        let title_copy = doc.find_field(inner, "title").unwrap();
        assert_ne!(title_copy, title);
        assert_eq!(result.changed_field_refs[&title], vec![title_copy]);
    }

    #[test]
    fn union_fragment_on_unknown_member_collapses_to_typename() {
        let mut doc = OperationDocument::new();
        let runtime = doc.add_field("runtime", None, None);
        let movie_set = doc.add_selection_set(vec![Selection::Field(runtime)]);
        let movie_fragment = doc.add_inline_fragment("Movie", movie_set);
        let search_set = doc.add_selection_set(vec![Selection::InlineFragment(movie_fragment)]);
        let search = doc.add_field("search", None, Some(search_set));
        let root = doc.add_selection_set(vec![Selection::Field(search)]);
        doc.add_operation(None, OperationKind::Query, root);

        let result = rewrite_field_selection(
            &mut doc,
            &supergraph(),
            &book_subgraph(),
            search,
            "Searchable",
        )
        .unwrap();

        assert!(result.rewritten);
        let selections = &doc.selection_set(search_set).selections;
        assert_eq!(selections.len(), 1);
        match selections[0] {
            Selection::Field(f) => {
                assert!(doc.field(f).is_typename());
                assert!(doc.is_skipped(f));
            }
            Selection::InlineFragment(_) => panic!("expected a bare __typename"),
        }
    }

    #[test]
    fn rewrite_is_idempotent() {
        let mut doc = OperationDocument::new();
        let title = doc.add_field("title", None, None);
        let media_set = doc.add_selection_set(vec![Selection::Field(title)]);
        let media = doc.add_field("media", None, Some(media_set));
        let root = doc.add_selection_set(vec![Selection::Field(media)]);
        doc.add_operation(None, OperationKind::Query, root);

        let schema = supergraph();
        let subgraph = book_subgraph();
        let first = rewrite_field_selection(&mut doc, &schema, &subgraph, media, "Media").unwrap();
        assert!(first.rewritten);
        let second = rewrite_field_selection(&mut doc, &schema, &subgraph, media, "Media").unwrap();
        assert!(!second.rewritten);
    }
}
