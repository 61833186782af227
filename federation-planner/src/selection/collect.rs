//! Suggestion collection: one walk to shape the response tree, then a
//! capability scan of every (field, subgraph) pair.

use indexmap::IndexMap;
use indexmap::IndexSet;

use crate::config::SubgraphDescriptor;
use crate::config::SubgraphHash;
use crate::error::PlanError;
use crate::field_set::field_set_paths;
use crate::field_set::parse_field_set;
use crate::jumps::KeyInfo;
use crate::operation::FieldRef;
use crate::operation::OperationDocument;
use crate::operation::walk::OperationVisitor;
use crate::operation::walk::VisitAction;
use crate::operation::walk::WalkContext;
use crate::operation::walk::walk_operation;
use crate::schema::SchemaDocument;
use crate::schema::TypeKind;
use crate::suggestion::NodeSuggestion;
use crate::suggestion::NodeSuggestions;
use crate::suggestion::ResponseTree;
use crate::suggestion::TREE_ROOT_ID;
use crate::suggestion::TreeNodeId;
use crate::suggestion::tree_node_id;

/// Positional facts about one field, captured during the tree walk so the
/// per-subgraph scan does not need to re-walk the operation.
#[derive(Debug, Clone)]
pub(crate) struct FieldInfo {
    pub field_ref: FieldRef,
    /// Enclosing type the field was selected on.
    pub type_name: String,
    pub field_name: String,
    pub path: String,
    pub parent_path: String,
    pub parent_path_without_fragment: Option<String>,
    pub on_fragment: bool,
    pub is_typename: bool,
    pub is_leaf: bool,
    /// Concrete types an abstract enclosing type may resolve to.
    pub possible_type_names: Vec<String>,
}

pub(crate) struct CollectedNodes {
    pub suggestions: NodeSuggestions,
    pub infos: IndexMap<FieldRef, FieldInfo>,
    pub keys_by_subgraph: IndexMap<SubgraphHash, Vec<KeyInfo>>,
}

struct TreeBuilder<'s> {
    schema: &'s SchemaDocument,
    tree: ResponseTree,
    infos: IndexMap<FieldRef, FieldInfo>,
    parent_nodes: Vec<TreeNodeId>,
}

impl OperationVisitor for TreeBuilder<'_> {
    fn enter_field(
        &mut self,
        doc: &mut OperationDocument,
        cx: &WalkContext<'_>,
        field: FieldRef,
    ) -> Result<VisitAction, PlanError> {
        let node = doc.field(field);
        let enclosing = cx.enclosing_type().to_string();
        let is_typename = node.is_typename();
        let is_leaf = if is_typename {
            true
        } else {
            let field_type = cx.field_type(doc, field)?;
            self.schema
                .type_kind(&field_type.type_name)
                .is_some_and(TypeKind::is_leaf)
                || doc.field(field).selection_set.is_none()
        };
        let possible_type_names = if self.schema.is_abstract(&enclosing) {
            self.schema.possible_type_names(&enclosing)
        } else {
            Vec::new()
        };
        self.infos.insert(
            field,
            FieldInfo {
                field_ref: field,
                field_name: doc.field(field).name.clone(),
                type_name: enclosing,
                path: cx.current_path().to_string(),
                parent_path: cx.parent_path().to_string(),
                parent_path_without_fragment: cx.parent_path_without_fragment(),
                on_fragment: cx.on_fragment(),
                is_typename,
                is_leaf,
                possible_type_names,
            },
        );
        let parent = *self.parent_nodes.last().unwrap_or(&TREE_ROOT_ID);
        self.tree.add_node(parent, tree_node_id(field));
        self.parent_nodes.push(tree_node_id(field));
        Ok(VisitAction::Continue)
    }

    fn leave_field(
        &mut self,
        _doc: &mut OperationDocument,
        _cx: &WalkContext<'_>,
        _field: FieldRef,
    ) -> Result<(), PlanError> {
        self.parent_nodes.pop();
        Ok(())
    }
}

/// Per-subgraph facts derived once from its key configurations.
struct SubgraphKeyFacts {
    /// Absolute operation paths (fragment segments stripped) of key fields
    /// the subgraph can always produce, external or not.
    key_field_paths: IndexSet<String>,
    keys: Vec<KeyInfo>,
}

pub(crate) fn collect_nodes(
    doc: &mut OperationDocument,
    schema: &SchemaDocument,
    subgraphs: &[SubgraphDescriptor],
    operation_index: usize,
) -> Result<CollectedNodes, PlanError> {
    let mut builder = TreeBuilder {
        schema,
        tree: ResponseTree::new(),
        infos: IndexMap::new(),
        parent_nodes: vec![TREE_ROOT_ID],
    };
    walk_operation(doc, schema, operation_index, &mut builder)?;
    let infos = builder.infos;
    let mut suggestions = NodeSuggestions::new(builder.tree);
    let mut keys_by_subgraph: IndexMap<SubgraphHash, Vec<KeyInfo>> = IndexMap::new();

    for subgraph in subgraphs {
        let provided_paths = provided_paths(subgraph, &infos)?;
        let mut key_facts: IndexMap<(String, String), SubgraphKeyFacts> = IndexMap::new();

        for info in infos.values() {
            collect_keys_for_path(subgraph, schema, info, &mut key_facts)?;
            let Some(capability) = field_capability(subgraph, info) else {
                continue;
            };
            let stripped_path = strip_fragments(&info.path);
            let is_provided = provided_paths.contains(&stripped_path);
            let facts = key_facts.get(&(info.type_name.clone(), entity_parent_path(info)));
            let is_required_key_field = facts
                .is_some_and(|f| f.key_field_paths.contains(&stripped_path));
            let is_external = capability.is_external && !is_provided && !is_required_key_field;

            let type_keys = subgraph.metadata.keys.filter_by_type(&info.type_name);
            let disabled_entity_resolver = capability.is_root_node
                && !type_keys.is_empty()
                && type_keys.iter().all(|k| k.disable_entity_resolver);

            suggestions.add(NodeSuggestion {
                subgraph_id: subgraph.id.clone(),
                subgraph_hash: subgraph.hash(),
                type_name: info.type_name.clone(),
                field_name: info.field_name.clone(),
                field_ref: info.field_ref,
                path: info.path.clone(),
                parent_path: info.parent_path.clone(),
                parent_path_without_fragment: info.parent_path_without_fragment.clone(),
                on_fragment: info.on_fragment,
                is_root_node: capability.is_root_node,
                is_external,
                is_provided,
                is_leaf: info.is_leaf,
                is_typename: info.is_typename,
                disabled_entity_resolver,
                is_entity_interface: subgraph.metadata.has_entity_interface(&info.type_name),
                is_required_key_field,
                is_orphan: false,
                possible_type_names: info.possible_type_names.clone(),
                selected: false,
                selection_reasons: Vec::new(),
                requires_key: None,
            });
        }

        let mut subgraph_keys: Vec<KeyInfo> = Vec::new();
        for facts in key_facts.values() {
            for key in &facts.keys {
                if !subgraph_keys
                    .iter()
                    .any(|k| k.type_name == key.type_name && k.selection_set == key.selection_set)
                {
                    subgraph_keys.push(key.clone());
                }
            }
        }
        if !subgraph_keys.is_empty() {
            keys_by_subgraph.insert(subgraph.hash(), subgraph_keys);
        }
    }

    Ok(CollectedNodes {
        suggestions,
        infos,
        keys_by_subgraph,
    })
}

struct Capability {
    is_root_node: bool,
    is_external: bool,
}

/// Whether the subgraph can serve this field at all, and how.
fn field_capability(subgraph: &SubgraphDescriptor, info: &FieldInfo) -> Option<Capability> {
    let type_name = &info.type_name;
    if info.is_typename {
        let metadata = &subgraph.metadata;
        // An interface object holds no concrete type names; it may only
        // answer __typename when the type doubles as an entity interface.
        if metadata.has_interface_object(type_name) && !metadata.has_entity_interface(type_name) {
            return None;
        }
        let known_union = subgraph
            .schema
            .type_kind(type_name)
            .is_some_and(|k| k == TypeKind::Union);
        if subgraph.root_nodes.has_type(type_name) {
            return Some(Capability {
                is_root_node: true,
                is_external: false,
            });
        }
        if subgraph.child_nodes.has_type(type_name) || known_union {
            return Some(Capability {
                is_root_node: false,
                is_external: false,
            });
        }
        return None;
    }

    // A concrete type a subgraph only knows through an interface object is
    // looked up under the interface object's name as well.
    let alias = subgraph
        .metadata
        .interface_object_for_concrete_type(type_name);
    let names = std::iter::once(type_name.as_str()).chain(alias);
    for name in names {
        if subgraph.has_root_node(name, &info.field_name) {
            return Some(Capability {
                is_root_node: true,
                is_external: false,
            });
        }
        if subgraph.has_child_node(name, &info.field_name) {
            return Some(Capability {
                is_root_node: false,
                is_external: false,
            });
        }
        if subgraph.has_external_node(name, &info.field_name) {
            let is_root = subgraph.root_nodes.has_external_node(name, &info.field_name);
            return Some(Capability {
                is_root_node: is_root,
                is_external: true,
            });
        }
    }
    None
}

/// Path of the entity instance this field belongs to, i.e. its parent path
/// with fragment segments stripped.
fn entity_parent_path(info: &FieldInfo) -> String {
    strip_fragments(&info.parent_path)
}

fn collect_keys_for_path(
    subgraph: &SubgraphDescriptor,
    schema: &SchemaDocument,
    info: &FieldInfo,
    key_facts: &mut IndexMap<(String, String), SubgraphKeyFacts>,
) -> Result<(), PlanError> {
    let entity_path = entity_parent_path(info);
    let facts_key = (info.type_name.clone(), entity_path.clone());
    if key_facts.contains_key(&facts_key) {
        return Ok(());
    }
    let mut facts = SubgraphKeyFacts {
        key_field_paths: IndexSet::new(),
        keys: Vec::new(),
    };
    for key in subgraph.metadata.keys.filter_by_type(&info.type_name) {
        let items = parse_field_set(&key.selection_set)?;
        let paths = field_set_paths(&items);
        let mut has_external_fields = false;
        for rel_path in &paths {
            if key_field_is_external(subgraph, schema, &info.type_name, rel_path) {
                has_external_fields = true;
            } else {
                facts
                    .key_field_paths
                    .insert(format!("{entity_path}.{rel_path}"));
            }
        }
        let source = !has_external_fields;
        let target = !key.disable_entity_resolver;
        if !source && !target {
            continue;
        }
        facts.keys.push(KeyInfo {
            subgraph_hash: subgraph.hash(),
            type_name: info.type_name.clone(),
            selection_set: key.selection_set.clone(),
            field_paths: paths,
            source,
            target,
        });
    }
    key_facts.insert(facts_key, facts);
    Ok(())
}

/// A key field is external when the subgraph lists it as external and nothing
/// marks it resolvable (fields listed both as regular and external nodes stay
/// resolvable).
fn key_field_is_external(
    subgraph: &SubgraphDescriptor,
    schema: &SchemaDocument,
    entity_type: &str,
    rel_path: &str,
) -> bool {
    let mut parent = entity_type.to_string();
    let mut segments = rel_path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            let resolvable = subgraph.has_root_node(&parent, segment)
                || subgraph.has_child_node(&parent, segment);
            return subgraph.has_external_node(&parent, segment) && !resolvable;
        }
        match schema.field_type(&parent, segment) {
            Some(field_type) => parent = field_type.type_name,
            None => return false,
        }
    }
    false
}

/// Absolute operation paths (fragment segments stripped) this subgraph
/// provides through `@provides` on fields present in the operation.
fn provided_paths(
    subgraph: &SubgraphDescriptor,
    infos: &IndexMap<FieldRef, FieldInfo>,
) -> Result<IndexSet<String>, PlanError> {
    let mut provided = IndexSet::new();
    if subgraph.metadata.provides.is_empty() {
        return Ok(provided);
    }
    for info in infos.values() {
        let Some(config) = subgraph
            .metadata
            .provides
            .first_by_type_and_field(&info.type_name, &info.field_name)
        else {
            continue;
        };
        // @provides only applies where the subgraph serves the field itself.
        if !subgraph.has_root_node(&info.type_name, &info.field_name)
            && !subgraph.has_child_node(&info.type_name, &info.field_name)
        {
            continue;
        }
        let items = parse_field_set(&config.selection_set)?;
        let base = strip_fragments(&info.path);
        for rel_path in field_set_paths(&items) {
            provided.insert(format!("{base}.{rel_path}"));
        }
    }
    Ok(provided)
}

/// Remove `$Type` fragment segments from a dot-delimited path.
pub(crate) fn strip_fragments(path: &str) -> String {
    path.split('.')
        .filter(|segment| !segment.starts_with('$'))
        .collect::<Vec<_>>()
        .join(".")
}
