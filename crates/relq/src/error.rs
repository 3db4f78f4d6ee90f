//! Compile-time errors.
//!
//! Every failure carries a traceback of the user's own operator expressions
//! leading to the offender, innermost first. Errors are raised at the first
//! offending node; there is no partial recovery.

use crate::types::Symbol;
use std::fmt;
use thiserror::Error;

/// What went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileErrorKind {
    /// A node appeared in an impossible context (e.g. a scalar operator in
    /// tabular position).
    #[error("ill-formed query expression")]
    IllFormed,
    /// Two projection arguments produced the same output label.
    #[error("duplicate label `{0}`")]
    DuplicateLabel(Symbol),
    /// Reference to a column that is not visible in the current scope.
    #[error("cannot find `{0}`")]
    UndefinedName(Symbol),
    /// Reference to a subquery that is not visible in the current scope.
    #[error("subquery reference escapes its scope")]
    UndefinedHandle,
    /// Navigation through a name that is a plain column.
    #[error("`{0}` is a column, not a nested row")]
    UnexpectedScalarType(Symbol),
    /// A plain column reference hit a nested row.
    #[error("`{0}` is a nested row, not a column")]
    UnexpectedRowType(Symbol),
    /// The name collides across the branches of a join or append.
    #[error("`{0}` is ambiguous")]
    AmbiguousName(Symbol),
    /// The subquery reference collides across branches.
    #[error("subquery reference is ambiguous")]
    AmbiguousHandle,
    /// The aggregate could target more than one grouping scope.
    #[error("aggregate is ambiguous")]
    AmbiguousAggregate,
    /// An aggregate was used without an enclosing `Group` or `Partition`.
    #[error("aggregate used without a grouping scope")]
    UnexpectedAggregate,
}

/// A compilation failure with its user-visible traceback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    /// Compact summaries of the user nodes from the offender outwards.
    pub path: Vec<String>,
}

impl CompileError {
    pub(crate) fn new(kind: CompileErrorKind) -> Self {
        CompileError {
            kind,
            path: Vec::new(),
        }
    }

    pub(crate) fn with_path(mut self, path: Vec<String>) -> Self {
        self.path = path;
        self
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for frame in &self.path {
            write!(f, "\n  in {frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_traceback() {
        let err = CompileError::new(CompileErrorKind::UndefinedName(Symbol::new("z")))
            .with_path(vec!["Get.z".to_string(), "Select(Get.z)".to_string()]);
        assert_eq!(
            err.to_string(),
            "cannot find `z`\n  in Get.z\n  in Select(Get.z)"
        );
    }

    #[test]
    fn display_without_path_is_just_the_kind() {
        let err = CompileError::new(CompileErrorKind::AmbiguousAggregate);
        assert_eq!(err.to_string(), "aggregate is ambiguous");
    }

    #[test]
    fn error_trait_is_implemented() {
        let err = CompileError::new(CompileErrorKind::UndefinedHandle);
        let dyn_err: &dyn std::error::Error = &err;
        assert!(dyn_err.source().is_some());
    }
}
