//! Query decomposition for federated GraphQL operations.
//!
//! Given an operation, the supergraph schema, and a set of subgraph
//! descriptors, the [`Planner`] decides which subgraph serves each field,
//! injects the key and `@requires` fields those decisions demand, and
//! assembles one fetch configuration per subgraph visit, wired together by
//! fetch dependencies.

#![warn(
    rustdoc::broken_intra_doc_links,
    unreachable_pub,
    unreachable_patterns,
    unused,
    unused_qualifications,
    dead_code,
    while_true,
    unconditional_panic,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod fetch;
pub mod field_set;
pub mod jumps;
pub mod operation;
pub mod planner;
pub mod schema;
pub mod suggestion;

mod requirements;
mod rewrite;
mod selection;

pub use crate::config::DebugOptions;
pub use crate::config::FederationFieldConfiguration;
pub use crate::config::FederationFieldConfigurations;
pub use crate::config::FederationMetadata;
pub use crate::config::GraphqlPlannerFactory;
pub use crate::config::PlannerFactory;
pub use crate::config::PlannerOptions;
pub use crate::config::PlanningBehavior;
pub use crate::config::SubgraphDescriptor;
pub use crate::config::SubgraphHash;
pub use crate::config::TypeField;
pub use crate::config::TypeFields;
pub use crate::error::PlanError;
pub use crate::error::PlanReport;
pub use crate::planner::PlanPasses;
pub use crate::planner::Planner;
pub use crate::planner::QueryPlan;
