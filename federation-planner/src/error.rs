use std::fmt;

use serde::Serialize;

/// A planning failure.
///
/// Planning never panics on bad input: every detected condition is represented
/// here and accumulated into a [`PlanReport`] so that callers see all problems
/// of an operation at once instead of the first one only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
pub enum PlanError {
    /// An internal invariant was violated. These indicate a bug in the planner
    /// or an inconsistent subgraph configuration, never a bad operation.
    #[error("internal: {message}")]
    Internal { message: String },

    /// The planning loops did not reach a fixed point within the pass cap.
    #[error(
        "could not create a plan: no stable plan was reached after {passes} passes \
         (missing paths: {missing_paths:?}, fields waiting on dependencies: {waiting_on_dependencies})"
    )]
    NonConvergence {
        passes: usize,
        missing_paths: Vec<String>,
        waiting_on_dependencies: bool,
    },

    /// No subgraph was selected for a field after all selection stages ran.
    #[error("could not select a subgraph for field {type_name}.{field_name} at path {path}")]
    UnplannableField {
        type_name: String,
        field_name: String,
        path: String,
    },

    /// A field recorded a dependency but no requirement configuration exists
    /// for it on the subgraph it was planned on.
    #[error(
        "missing field requirements configuration for field {type_name}.{field_name} on subgraph {subgraph_id}"
    )]
    MissingRequirementConfiguration {
        type_name: String,
        field_name: String,
        subgraph_id: String,
    },

    /// A `@key`, `@requires` or `@provides` selection-set string failed to parse.
    #[error("invalid field set {field_set:?}: {message}")]
    FieldSetSyntax { field_set: String, message: String },

    /// The requested operation is not defined in the document.
    #[error("operation {name:?} is not defined in the document")]
    UnknownOperation { name: Option<String> },

    /// The document defines more than one operation and no name was given.
    #[error("the document defines multiple operations, an operation name is required")]
    OperationNameRequired,
}

impl PlanError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Ordered accumulator of planning failures.
///
/// The planner pushes every error it detects and keeps going where it can, so
/// a report may carry several independent problems.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanReport {
    errors: Vec<PlanError>,
}

impl PlanReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: PlanError) {
        self.errors.push(error);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[PlanError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<PlanError> {
        self.errors
    }
}

impl From<PlanError> for PlanReport {
    fn from(error: PlanError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl fmt::Display for PlanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return write!(f, "no planning errors");
        }
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for PlanReport {}
