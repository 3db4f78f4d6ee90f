//! Pass 1: structural rewrite of the user tree into the annotated arena.

use super::context::{AnnId, AnnKind, AnnotatedTree};
use crate::error::CompileError;
use crate::error::CompileErrorKind;
use crate::nodes::{NodeKind, SqlNode};
use crate::types::BoxType;

pub(super) fn annotate_root(root: &SqlNode) -> Result<AnnotatedTree, CompileError> {
    let mut tree = AnnotatedTree::new();
    let root_box = annotate(&mut tree, Some(root))?;
    tree.root = root_box;
    Ok(tree)
}

/// Wraps an annotated tabular operator in a fresh box and records it.
fn wrap(tree: &mut AnnotatedTree, over: Option<AnnId>) -> AnnId {
    let id = tree.alloc(AnnKind::Box {
        over,
        handle: 0,
        ty: BoxType::empty(),
        refs: Vec::new(),
    });
    tree.boxes.push(id);
    id
}

/// Annotates a node in tabular context, returning the wrapping box. An
/// absent input produces an empty box for the implicit unit table.
fn annotate(tree: &mut AnnotatedTree, node: Option<&SqlNode>) -> Result<AnnId, CompileError> {
    let Some(node) = node else {
        return Ok(wrap(tree, None));
    };
    tree.grow_path(node);
    let result = annotate_op(tree, node).map(|op| wrap(tree, Some(op)));
    tree.shrink_path();
    result
}

fn annotate_op(tree: &mut AnnotatedTree, node: &SqlNode) -> Result<AnnId, CompileError> {
    let kind = match node.kind() {
        NodeKind::From { table } => AnnKind::From {
            table: table.clone(),
        },
        NodeKind::Select { over, args } => {
            let over = annotate(tree, over.as_ref())?;
            let args = annotate_scalars(tree, args)?;
            AnnKind::Select { over, args }
        }
        NodeKind::Where { over, condition } => {
            let over = annotate(tree, over.as_ref())?;
            let condition = annotate_scalar(tree, condition)?;
            AnnKind::Where { over, condition }
        }
        NodeKind::Join {
            over,
            joinee,
            on,
            left,
            right,
        } => {
            let over = annotate(tree, over.as_ref())?;
            let joinee = annotate(tree, Some(joinee))?;
            let on = annotate_scalar(tree, on)?;
            AnnKind::ExtendedJoin {
                over,
                joinee,
                on,
                left: *left,
                right: *right,
                lateral: Vec::new(),
                ty: BoxType::empty(),
            }
        }
        NodeKind::Group { over, by } => {
            let over = annotate(tree, over.as_ref())?;
            let by = annotate_scalars(tree, by)?;
            AnnKind::Group { over, by }
        }
        NodeKind::Partition { over, by, order_by } => {
            let over = annotate(tree, over.as_ref())?;
            let by = annotate_scalars(tree, by)?;
            let order_by = annotate_scalars(tree, order_by)?;
            AnnKind::Partition { over, by, order_by }
        }
        NodeKind::Append { over, list } => {
            let over = annotate(tree, over.as_ref())?;
            let mut branches = Vec::with_capacity(list.len());
            for branch in list {
                branches.push(annotate(tree, Some(branch))?);
            }
            AnnKind::Append {
                over,
                list: branches,
            }
        }
        NodeKind::As { over, name } => {
            let over = annotate(tree, over.as_ref())?;
            AnnKind::As {
                over,
                name: name.clone(),
            }
        }
        NodeKind::Define { over, args } => {
            let over = annotate(tree, over.as_ref())?;
            let args = annotate_scalars(tree, args)?;
            AnnKind::Define { over, args }
        }
        NodeKind::Order { over, by } => {
            let over = annotate(tree, over.as_ref())?;
            let by = annotate_scalars(tree, by)?;
            AnnKind::Order { over, by }
        }
        NodeKind::Limit {
            over,
            limit,
            offset,
        } => {
            let over = annotate(tree, over.as_ref())?;
            AnnKind::Limit {
                over,
                limit: *limit,
                offset: *offset,
            }
        }
        NodeKind::Highlight { over, .. } => {
            let over = annotate(tree, over.as_ref())?;
            AnnKind::Highlight { over }
        }
        NodeKind::Bind { over, args } => {
            let over = annotate(tree, over.as_ref())?;
            let args = annotate_scalars(tree, args)?;
            AnnKind::ExtendedBind {
                over,
                args,
                owned: false,
            }
        }
        // A scalar operator in tabular position.
        NodeKind::Get { .. }
        | NodeKind::Fun { .. }
        | NodeKind::Agg { .. }
        | NodeKind::Lit { .. }
        | NodeKind::Var { .. }
        | NodeKind::Sort { .. } => {
            return Err(tree.error_here(CompileErrorKind::IllFormed));
        }
    };
    Ok(tree.alloc(kind))
}

fn annotate_scalars(
    tree: &mut AnnotatedTree,
    nodes: &[SqlNode],
) -> Result<Vec<AnnId>, CompileError> {
    nodes
        .iter()
        .map(|node| annotate_scalar(tree, node))
        .collect()
}

/// Annotates a node in scalar context. A tabular node here is a subquery
/// used as a value: it is annotated tabularly and arrives boxed. `As` and
/// `Highlight` follow the context they appear in.
fn annotate_scalar(tree: &mut AnnotatedTree, node: &SqlNode) -> Result<AnnId, CompileError> {
    match node.kind() {
        NodeKind::As { .. } | NodeKind::Highlight { .. } => {}
        _ if node.is_tabular() => return annotate(tree, Some(node)),
        _ => {}
    }
    tree.grow_path(node);
    let result = annotate_scalar_op(tree, node);
    tree.shrink_path();
    result
}

fn annotate_scalar_op(tree: &mut AnnotatedTree, node: &SqlNode) -> Result<AnnId, CompileError> {
    match node.kind() {
        NodeKind::Get { over, name } => {
            let base = tree.alloc(AnnKind::Get { name: name.clone() });
            rebind(tree, over.as_ref(), base)
        }
        NodeKind::Fun { name, args } => {
            let args = annotate_scalars(tree, args)?;
            Ok(tree.alloc(AnnKind::Fun {
                name: name.clone(),
                args,
            }))
        }
        NodeKind::Agg {
            name,
            args,
            filter,
            over,
        } => {
            let args = annotate_scalars(tree, args)?;
            let filter = filter
                .as_ref()
                .map(|f| annotate_scalar(tree, f))
                .transpose()?;
            let base = tree.alloc(AnnKind::Agg {
                name: name.clone(),
                args,
                filter,
            });
            rebind(tree, over.as_ref(), base)
        }
        NodeKind::Lit { value } => Ok(tree.alloc(AnnKind::Lit {
            value: value.clone(),
        })),
        NodeKind::Var { name } => Ok(tree.alloc(AnnKind::Var { name: name.clone() })),
        NodeKind::Sort { over, dir, nulls } => {
            let over = annotate_scalar(tree, over)?;
            Ok(tree.alloc(AnnKind::Sort {
                over,
                dir: *dir,
                nulls: *nulls,
            }))
        }
        NodeKind::As { over, name } => match over {
            Some(over) => {
                let over = annotate_scalar(tree, over)?;
                Ok(tree.alloc(AnnKind::As {
                    over,
                    name: name.clone(),
                }))
            }
            None => Err(tree.error_here(CompileErrorKind::IllFormed)),
        },
        NodeKind::Highlight { over, .. } => match over {
            Some(over) => {
                let over = annotate_scalar(tree, over)?;
                Ok(tree.alloc(AnnKind::Highlight { over }))
            }
            None => Err(tree.error_here(CompileErrorKind::IllFormed)),
        },
        _ => unreachable!("tabular node in annotate_scalar_op"),
    }
}

/// Normalises the `over` chain of a `Get` or `Agg`: field navigation
/// becomes `NameBound` layers, and a terminal tabular node becomes a
/// `HandleBound` with a freshly allocated handle.
fn rebind(
    tree: &mut AnnotatedTree,
    mut node: Option<&SqlNode>,
    mut base: AnnId,
) -> Result<AnnId, CompileError> {
    while let Some(n) = node {
        match n.kind() {
            NodeKind::Get { over, name } => {
                base = tree.alloc(AnnKind::NameBound {
                    over: base,
                    name: name.clone(),
                });
                node = over.as_ref();
            }
            _ => break,
        }
    }
    match node {
        None => Ok(base),
        Some(q) if q.is_tabular() => {
            let handle = tree.make_handle(q);
            Ok(tree.alloc(AnnKind::HandleBound { over: base, handle }))
        }
        Some(_) => Err(tree.error_here(CompileErrorKind::IllFormed)),
    }
}
