//! Indexed view of a GraphQL schema.
//!
//! The planner does not parse SDL. The host is expected to normalize its
//! schema (the composed supergraph, or an individual subgraph schema) into
//! this document ahead of time. Only the lookups planning actually performs
//! are modeled: type kinds, field return types, interface implementers and
//! union members.

use indexmap::IndexMap;
use serde::Serialize;

pub const TYPENAME_FIELD: &str = "__typename";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TypeKind {
    Scalar,
    Enum,
    Object,
    Interface,
    Union,
    InputObject,
}

impl TypeKind {
    pub fn is_abstract(self) -> bool {
        matches!(self, Self::Interface | Self::Union)
    }

    pub fn is_leaf(self) -> bool {
        matches!(self, Self::Scalar | Self::Enum)
    }
}

/// The return type of a field, reduced to the named type plus whether any
/// list wrapper is present. Nullability is irrelevant to planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldType {
    pub type_name: String,
    pub is_list: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeDefinition {
    pub name: String,
    pub kind: TypeKind,
    /// Field name to return type. Empty for scalars, enums and unions.
    pub fields: IndexMap<String, FieldType>,
    /// Interfaces this object or interface type implements.
    pub implements: Vec<String>,
    /// Members of a union type.
    pub union_members: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaDocument {
    types: IndexMap<String, TypeDefinition>,
    query_type: String,
    mutation_type: Option<String>,
}

impl SchemaDocument {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn query_type(&self) -> &str {
        &self.query_type
    }

    pub fn mutation_type(&self) -> Option<&str> {
        self.mutation_type.as_deref()
    }

    pub fn type_definition(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.get(name)
    }

    pub fn type_kind(&self, name: &str) -> Option<TypeKind> {
        self.types.get(name).map(|t| t.kind)
    }

    pub fn has_type(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn is_abstract(&self, name: &str) -> bool {
        self.type_kind(name).is_some_and(TypeKind::is_abstract)
    }

    /// Return type of `type_name.field_name`. `__typename` resolves on every
    /// composite type.
    pub fn field_type(&self, type_name: &str, field_name: &str) -> Option<FieldType> {
        if field_name == TYPENAME_FIELD {
            return Some(FieldType {
                type_name: "String".to_string(),
                is_list: false,
            });
        }
        self.types
            .get(type_name)
            .and_then(|t| t.fields.get(field_name))
            .cloned()
    }

    pub fn has_field(&self, type_name: &str, field_name: &str) -> bool {
        self.field_type(type_name, field_name).is_some()
    }

    /// Object types an inline fragment on `name` may concretely resolve to:
    /// the type itself for objects, implementers for interfaces, members for
    /// unions. Order follows the schema document.
    pub fn possible_type_names(&self, name: &str) -> Vec<String> {
        let Some(def) = self.types.get(name) else {
            return Vec::new();
        };
        match def.kind {
            TypeKind::Object => vec![def.name.clone()],
            TypeKind::Union => def.union_members.clone(),
            TypeKind::Interface => self
                .types
                .values()
                .filter(|t| t.kind == TypeKind::Object && t.implements.iter().any(|i| i == name))
                .map(|t| t.name.clone())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn object_implements(&self, object: &str, interface: &str) -> bool {
        self.types
            .get(object)
            .is_some_and(|t| t.implements.iter().any(|i| i == interface))
    }

    pub fn is_union_member(&self, union: &str, member: &str) -> bool {
        self.types
            .get(union)
            .is_some_and(|t| t.union_members.iter().any(|m| m == member))
    }
}

/// Programmatic construction of a [`SchemaDocument`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    types: IndexMap<String, TypeDefinition>,
    query_type: Option<String>,
    mutation_type: Option<String>,
}

impl SchemaBuilder {
    pub fn object(self, name: &str, fields: &[(&str, &str)]) -> Self {
        self.object_with(name, &[], fields)
    }

    /// Object type implementing the given interfaces. A `[Type]` field type
    /// spelling marks a list.
    pub fn object_with(mut self, name: &str, implements: &[&str], fields: &[(&str, &str)]) -> Self {
        self.types.insert(
            name.to_string(),
            TypeDefinition {
                name: name.to_string(),
                kind: TypeKind::Object,
                fields: parse_fields(fields),
                implements: implements.iter().map(|s| s.to_string()).collect(),
                union_members: Vec::new(),
            },
        );
        self
    }

    pub fn interface(mut self, name: &str, fields: &[(&str, &str)]) -> Self {
        self.types.insert(
            name.to_string(),
            TypeDefinition {
                name: name.to_string(),
                kind: TypeKind::Interface,
                fields: parse_fields(fields),
                implements: Vec::new(),
                union_members: Vec::new(),
            },
        );
        self
    }

    pub fn union(mut self, name: &str, members: &[&str]) -> Self {
        self.types.insert(
            name.to_string(),
            TypeDefinition {
                name: name.to_string(),
                kind: TypeKind::Union,
                fields: IndexMap::new(),
                implements: Vec::new(),
                union_members: members.iter().map(|s| s.to_string()).collect(),
            },
        );
        self
    }

    pub fn scalar(mut self, name: &str) -> Self {
        self.types.insert(
            name.to_string(),
            TypeDefinition {
                name: name.to_string(),
                kind: TypeKind::Scalar,
                fields: IndexMap::new(),
                implements: Vec::new(),
                union_members: Vec::new(),
            },
        );
        self
    }

    pub fn enum_type(mut self, name: &str) -> Self {
        self.types.insert(
            name.to_string(),
            TypeDefinition {
                name: name.to_string(),
                kind: TypeKind::Enum,
                fields: IndexMap::new(),
                implements: Vec::new(),
                union_members: Vec::new(),
            },
        );
        self
    }

    pub fn mutation_type(mut self, name: &str) -> Self {
        self.mutation_type = Some(name.to_string());
        self
    }

    pub fn query_type(mut self, name: &str) -> Self {
        self.query_type = Some(name.to_string());
        self
    }

    pub fn build(mut self) -> SchemaDocument {
        for builtin in ["String", "Int", "Float", "Boolean", "ID"] {
            if !self.types.contains_key(builtin) {
                self.types.insert(
                    builtin.to_string(),
                    TypeDefinition {
                        name: builtin.to_string(),
                        kind: TypeKind::Scalar,
                        fields: IndexMap::new(),
                        implements: Vec::new(),
                        union_members: Vec::new(),
                    },
                );
            }
        }
        SchemaDocument {
            types: self.types,
            query_type: self.query_type.unwrap_or_else(|| "Query".to_string()),
            mutation_type: self.mutation_type,
        }
    }
}

fn parse_fields(fields: &[(&str, &str)]) -> IndexMap<String, FieldType> {
    fields
        .iter()
        .map(|(name, ty)| {
            let is_list = ty.starts_with('[');
            let type_name = ty.trim_matches(|c| c == '[' || c == ']' || c == '!').to_string();
            (
                name.to_string(),
                FieldType {
                    type_name,
                    is_list,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn possible_types_of_interface_and_union() {
        let schema = SchemaDocument::builder()
            .interface("Node", &[("id", "ID")])
            .object_with("User", &["Node"], &[("id", "ID"), ("name", "String")])
            .object_with("Product", &["Node"], &[("id", "ID")])
            .object("Review", &[("body", "String")])
            .union("Entity", &["User", "Product"])
            .object("Query", &[("node", "Node")])
            .build();

        assert_eq!(schema.possible_type_names("Node"), vec!["User", "Product"]);
        assert_eq!(schema.possible_type_names("Entity"), vec!["User", "Product"]);
        assert_eq!(schema.possible_type_names("Review"), vec!["Review"]);
        assert!(schema.object_implements("User", "Node"));
        assert!(!schema.object_implements("Review", "Node"));
    }

    #[test]
    fn field_types_and_lists() {
        let schema = SchemaDocument::builder()
            .object("User", &[("reviews", "[Review]"), ("name", "String")])
            .object("Review", &[("body", "String")])
            .object("Query", &[("me", "User")])
            .build();

        let reviews = schema.field_type("User", "reviews").unwrap();
        assert!(reviews.is_list);
        assert_eq!(reviews.type_name, "Review");
        let typename = schema.field_type("Review", "__typename").unwrap();
        assert_eq!(typename.type_name, "String");
    }
}
