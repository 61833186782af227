//! Planner configuration: subgraph descriptors, federation metadata and the
//! option structs callers tune planning with.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::schema::SchemaDocument;

/// Stable identity of a subgraph, hashed from its id. Cheap to copy and
/// compare; used as the key everywhere planning relates fields to subgraphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubgraphHash(pub u64);

impl SubgraphHash {
    pub fn of(subgraph_id: &str) -> Self {
        Self(fxhash::hash64(subgraph_id.as_bytes()))
    }
}

impl fmt::Display for SubgraphHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Fields of one type a subgraph can serve, with the subset it only knows
/// structurally (`@external`).
#[derive(Debug, Clone, Default, Serialize)]
pub struct TypeField {
    pub type_name: String,
    pub field_names: Vec<String>,
    pub external_field_names: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TypeFields {
    entries: Vec<TypeField>,
}

impl TypeFields {
    pub fn new(entries: Vec<TypeField>) -> Self {
        Self { entries }
    }

    pub fn has_node(&self, type_name: &str, field_name: &str) -> bool {
        self.entries.iter().any(|e| {
            e.type_name == type_name && e.field_names.iter().any(|f| f == field_name)
        })
    }

    pub fn has_external_node(&self, type_name: &str, field_name: &str) -> bool {
        self.entries.iter().any(|e| {
            e.type_name == type_name && e.external_field_names.iter().any(|f| f == field_name)
        })
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.entries.iter().any(|e| e.type_name == type_name)
    }
}

/// One `@key`, `@requires` or `@provides` configuration entry. For keys the
/// field name is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FederationFieldConfiguration {
    pub type_name: String,
    pub field_name: String,
    pub selection_set: String,
    pub disable_entity_resolver: bool,
}

impl FederationFieldConfiguration {
    pub fn key(type_name: &str, selection_set: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            selection_set: selection_set.to_string(),
            ..Self::default()
        }
    }

    pub fn unresolvable_key(type_name: &str, selection_set: &str) -> Self {
        Self {
            disable_entity_resolver: true,
            ..Self::key(type_name, selection_set)
        }
    }

    pub fn field(type_name: &str, field_name: &str, selection_set: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            field_name: field_name.to_string(),
            selection_set: selection_set.to_string(),
            disable_entity_resolver: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FederationFieldConfigurations {
    entries: Vec<FederationFieldConfiguration>,
}

impl FederationFieldConfigurations {
    pub fn new(entries: Vec<FederationFieldConfiguration>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FederationFieldConfiguration> {
        self.entries.iter()
    }

    pub fn filter_by_type(&self, type_name: &str) -> Vec<&FederationFieldConfiguration> {
        self.entries
            .iter()
            .filter(|e| e.type_name == type_name)
            .collect()
    }

    pub fn filter_by_type_and_resolvability(
        &self,
        type_name: &str,
        include_unresolvable: bool,
    ) -> Vec<&FederationFieldConfiguration> {
        self.entries
            .iter()
            .filter(|e| {
                e.type_name == type_name && (include_unresolvable || !e.disable_entity_resolver)
            })
            .collect()
    }

    pub fn first_by_type_and_field(
        &self,
        type_name: &str,
        field_name: &str,
    ) -> Option<&FederationFieldConfiguration> {
        self.entries
            .iter()
            .find(|e| e.type_name == type_name && e.field_name == field_name)
    }

    pub fn has_selection_set(&self, type_name: &str, selection_set: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.type_name == type_name && e.selection_set == selection_set)
    }
}

/// Mapping between an entity interface (or interface object) and the concrete
/// types it stands for.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EntityInterfaceConfiguration {
    pub interface_type_name: String,
    pub concrete_type_names: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FederationMetadata {
    pub keys: FederationFieldConfigurations,
    pub requires: FederationFieldConfigurations,
    pub provides: FederationFieldConfigurations,
    pub entity_interfaces: Vec<EntityInterfaceConfiguration>,
    pub interface_objects: Vec<EntityInterfaceConfiguration>,
}

impl FederationMetadata {
    pub fn has_entity_interface(&self, type_name: &str) -> bool {
        self.entity_interfaces
            .iter()
            .any(|e| e.interface_type_name == type_name)
    }

    pub fn has_interface_object(&self, type_name: &str) -> bool {
        self.interface_objects
            .iter()
            .any(|e| e.interface_type_name == type_name)
    }

    /// Whether `type_name` is a concrete member of an interface object in
    /// this subgraph (i.e. the subgraph only knows it through the interface).
    pub fn interface_object_for_concrete_type(&self, type_name: &str) -> Option<&str> {
        self.interface_objects
            .iter()
            .find(|e| e.concrete_type_names.iter().any(|c| c == type_name))
            .map(|e| e.interface_type_name.as_str())
    }
}

/// How a downstream planner wants the assembler to shape its paths.
#[derive(Debug, Clone, Copy)]
pub struct PlanningBehavior {
    /// Reuse one fetch for several aliased root fields. True for dynamic
    /// sources (GraphQL), false for static ones.
    pub merge_aliased_root_nodes: bool,
    /// Whether `__typename` fields should receive their own paths.
    pub include_typename_fields: bool,
}

/// Produced per subgraph by the host; consumed by the execution layer, not by
/// planning itself. The planner only reads the behavior.
pub trait PlannerFactory: fmt::Debug + Send + Sync {
    fn planning_behavior(&self) -> PlanningBehavior;
}

/// Factory for GraphQL subgraphs, the common case.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphqlPlannerFactory;

impl PlannerFactory for GraphqlPlannerFactory {
    fn planning_behavior(&self) -> PlanningBehavior {
        PlanningBehavior {
            merge_aliased_root_nodes: true,
            include_typename_fields: true,
        }
    }
}

/// Everything the planner knows about one subgraph.
#[derive(Debug, Clone)]
pub struct SubgraphDescriptor {
    pub id: String,
    pub root_nodes: TypeFields,
    pub child_nodes: TypeFields,
    pub metadata: FederationMetadata,
    /// The subgraph's own schema, as published. Drives abstract-selection
    /// rewrites: only types and memberships this schema knows exist for the
    /// subgraph.
    pub schema: SchemaDocument,
    pub factory: Arc<dyn PlannerFactory>,
    hash: SubgraphHash,
}

impl SubgraphDescriptor {
    pub fn new(
        id: &str,
        root_nodes: TypeFields,
        child_nodes: TypeFields,
        metadata: FederationMetadata,
        schema: SchemaDocument,
        factory: Arc<dyn PlannerFactory>,
    ) -> Self {
        Self {
            id: id.to_string(),
            root_nodes,
            child_nodes,
            metadata,
            schema,
            factory,
            hash: SubgraphHash::of(id),
        }
    }

    pub fn hash(&self) -> SubgraphHash {
        self.hash
    }

    pub fn has_root_node(&self, type_name: &str, field_name: &str) -> bool {
        self.root_nodes.has_node(type_name, field_name)
    }

    pub fn has_child_node(&self, type_name: &str, field_name: &str) -> bool {
        self.child_nodes.has_node(type_name, field_name)
    }

    pub fn has_external_node(&self, type_name: &str, field_name: &str) -> bool {
        self.root_nodes.has_external_node(type_name, field_name)
            || self.child_nodes.has_external_node(type_name, field_name)
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.root_nodes.has_type(type_name) || self.child_nodes.has_type(type_name)
    }
}

/// Debugging toggles. All of these are disabled by default; they only gate
/// log payloads and bookkeeping that cost something to produce.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugOptions {
    /// Emit the full suggestion index after every selection pass.
    pub print_node_suggestions: bool,
    /// Emit the planner paths after every assembly pass.
    pub print_planning_paths: bool,
    /// Record on every selected suggestion which selection stage picked it.
    pub track_selection_reasons: bool,
}

#[derive(Debug, Clone)]
pub struct PlannerOptions {
    /// Upper bound on node-selection and path-building passes. Exceeding it
    /// fails the plan rather than looping forever on a pathological
    /// configuration.
    pub max_planning_passes: usize,
    pub debug: DebugOptions,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            max_planning_passes: 100,
            debug: DebugOptions::default(),
        }
    }
}
