//! The compiler middle end.
//!
//! Three passes run in order over a parallel, arena-backed copy of the user
//! tree:
//!
//! 1. annotate: structural rewrite. Every tabular node gains a `Box`
//!    wrapper, `Get` chains are normalised into `NameBound`/`HandleBound`,
//!    and `Join` and `Bind` become their extended forms.
//! 2. resolve: bottom-up propagation of `BoxType` through every box.
//! 3. link: top-down propagation of the references demanded by consumers,
//!    validated against each box's type and routed across joins.
//!
//! The output is the same annotated tree, fully decorated, ready for SQL
//! emission.

mod annotate;
mod context;
mod link;
mod resolve;

pub use context::{AnnId, AnnKind, AnnotatedTree};

use crate::error::CompileError;
use crate::nodes::SqlNode;

/// Runs the full middle end over a finished operator tree.
pub fn compile(root: &SqlNode) -> Result<AnnotatedTree, CompileError> {
    let mut tree = annotate::annotate_root(root)?;
    #[cfg(feature = "tracing")]
    tracing::debug!(
        nodes = tree.nodes.len(),
        boxes = tree.boxes.len(),
        "annotated"
    );
    resolve::resolve(&mut tree)?;
    link::link(&mut tree)?;
    #[cfg(feature = "tracing")]
    tracing::debug!(root = ?tree.root(), "compiled");
    Ok(tree)
}
