//! Pass 3: top-down propagation of demanded references.
//!
//! The root box is seeded with one reference per scalar output column.
//! Boxes are then visited in reverse construction order (root first); each
//! box strips references that consumed its own handle and dispatches the
//! rest to its operator, which pushes them into the child boxes, gathers
//! the free references of its own scalar children, validates everything
//! against the child types, and routes references across joins.

use super::context::{AnnId, AnnKind, AnnotatedTree};
use crate::error::{CompileError, CompileErrorKind};
use crate::types::{BoxType, FieldType, GroupType, HandleType, RowType, Symbol};
use indexmap::IndexMap;
use std::collections::HashSet;

pub(super) fn link(tree: &mut AnnotatedTree) -> Result<(), CompileError> {
    seed_box(tree, tree.root());
    for i in (0..tree.boxes.len()).rev() {
        let b = tree.boxes[i];
        let Some(over) = tree.box_over(b) else {
            continue;
        };
        let refs: Vec<AnnId> = tree
            .box_refs(b)
            .iter()
            .map(|&r| tree.translate_ref(b, r))
            .collect();
        link_kind(tree, over, refs)?;
    }
    Ok(())
}

/// Seeds a box with one `Get` per scalar field of its row, in field order.
/// Used for the root and for subqueries appearing as values.
fn seed_box(tree: &mut AnnotatedTree, box_id: AnnId) {
    if !tree.box_refs(box_id).is_empty() {
        return;
    }
    let fields: Vec<Symbol> = tree
        .box_type(box_id)
        .row
        .fields
        .iter()
        .filter(|(_, ft)| matches!(ft, FieldType::Scalar))
        .map(|(name, _)| name.clone())
        .collect();
    for name in fields {
        let get = tree.alloc_like(box_id, AnnKind::Get { name });
        tree.push_ref(box_id, get);
    }
}

fn link_kind(tree: &mut AnnotatedTree, id: AnnId, refs: Vec<AnnId>) -> Result<(), CompileError> {
    let kind = tree.kind(id).clone();
    match kind {
        AnnKind::From { .. } => {}
        AnnKind::Where { over, condition } => {
            for r in refs {
                tree.push_ref(over, r);
            }
            gather_into(tree, condition, over)?;
        }
        AnnKind::Order { over, by } => {
            for r in refs {
                tree.push_ref(over, r);
            }
            for key in by {
                gather_into(tree, key, over)?;
            }
        }
        AnnKind::Limit { over, .. } | AnnKind::Highlight { over } => {
            for r in refs {
                tree.push_ref(over, r);
            }
        }
        AnnKind::Select { over, args } => {
            // Select cuts the outer scope; incoming refs are discarded.
            for arg in args {
                gather_into(tree, arg, over)?;
            }
        }
        AnnKind::As { over, name } => {
            for r in refs {
                let target = match tree.kind(r) {
                    AnnKind::NameBound { over: inner, name: n } if n == &name => *inner,
                    AnnKind::HandleBound { .. } => r,
                    other => unreachable!("unexpected reference at As: {other:?}"),
                };
                tree.push_ref(over, target);
            }
        }
        AnnKind::Define { over, args } => {
            let mut label_map: IndexMap<Symbol, AnnId> = IndexMap::new();
            for &arg in &args {
                label_map.insert(tree.ann_label(arg), arg);
            }
            let mut charged: HashSet<Symbol> = HashSet::new();
            for r in refs {
                let defined = match tree.kind(r) {
                    AnnKind::Get { name } if label_map.contains_key(name.as_str()) => {
                        Some(name.clone())
                    }
                    _ => None,
                };
                match defined {
                    Some(name) => {
                        // The defining expression is charged upstream once
                        // per distinct name.
                        if charged.insert(name.clone()) {
                            let expr = label_map[name.as_str()];
                            gather_into(tree, expr, over)?;
                        }
                    }
                    None => tree.push_ref(over, r),
                }
            }
        }
        AnnKind::Group { over, by } => {
            for key in by {
                gather_into(tree, key, over)?;
            }
            for r in refs {
                if let AnnKind::Agg { args, filter, .. } = tree.kind(r) {
                    let (args, filter) = (args.clone(), *filter);
                    for a in args {
                        gather_into(tree, a, over)?;
                    }
                    if let Some(f) = filter {
                        gather_into(tree, f, over)?;
                    }
                }
                // Anything else is a group key, already covered by `by`.
            }
        }
        AnnKind::Partition { over, by, order_by } => {
            for r in refs {
                if let AnnKind::Agg { args, filter, .. } = tree.kind(r) {
                    let (args, filter) = (args.clone(), *filter);
                    for a in args {
                        gather_into(tree, a, over)?;
                    }
                    if let Some(f) = filter {
                        gather_into(tree, f, over)?;
                    }
                } else {
                    tree.push_ref(over, r);
                }
            }
            for key in by {
                gather_into(tree, key, over)?;
            }
            for key in order_by {
                gather_into(tree, key, over)?;
            }
        }
        AnnKind::Append { over, list } => {
            for r in refs {
                tree.push_ref(over, r);
                for &branch in &list {
                    tree.push_ref(branch, r);
                }
            }
        }
        AnnKind::ExtendedBind { over, args, owned } => {
            if !owned {
                // A bind outside any enclosing query must not capture
                // columns.
                let empty = BoxType::empty();
                for arg in args {
                    let mut out = Vec::new();
                    gather(tree, arg, &mut out);
                    for r in &out {
                        validate(tree, &empty, *r)?;
                    }
                }
            }
            for r in refs {
                tree.push_ref(over, r);
            }
        }
        AnnKind::ExtendedJoin {
            over,
            joinee,
            on,
            ty,
            ..
        } => {
            // (a) Binding expressions escaping the joinee evaluate against
            // the left side; they decide laterality.
            let lt = tree.box_type(over).clone();
            let mut lateral = Vec::new();
            gather_bindings(tree, joinee, &mut lateral);
            for r in &lateral {
                validate(tree, &lt, *r)?;
            }
            if let AnnKind::ExtendedJoin { lateral: slot, .. } = tree.kind_mut(id) {
                *slot = lateral.clone();
            }
            for &r in &lateral {
                tree.push_ref(over, r);
            }
            // (b) The join condition sees both sides at once.
            let mut pending = Vec::new();
            gather(tree, on, &mut pending);
            for r in &pending {
                validate(tree, &ty, *r)?;
            }
            pending.extend(refs);
            // (c) Route everything to exactly one side.
            let rt = tree.box_type(joinee).clone();
            for r in pending {
                match route(tree, &lt, &rt, r) {
                    Side::Left => tree.push_ref(over, r),
                    Side::Right => tree.push_ref(joinee, r),
                }
            }
        }
        other => unreachable!("link on non-tabular node {other:?}"),
    }
    Ok(())
}

/// Gathers the free references of a scalar subtree, validates them against
/// the target box's type, and appends them to its refs.
fn gather_into(
    tree: &mut AnnotatedTree,
    expr: AnnId,
    target: AnnId,
) -> Result<(), CompileError> {
    let ty = tree.box_type(target).clone();
    let mut out = Vec::new();
    gather(tree, expr, &mut out);
    for r in &out {
        validate(tree, &ty, *r)?;
    }
    for r in out {
        tree.push_ref(target, r);
    }
    Ok(())
}

/// Collects the reference terminals of a scalar subtree.
///
/// A box encountered here is a subquery used as a value: it seals its
/// subtree (its own pass links the body) and is seeded with its output
/// columns. The one thing that crosses the boundary is an `ExtendedBind`
/// binding list, whose expressions belong to the enclosing scope; walking
/// through it also marks the bind as owned.
fn gather(tree: &mut AnnotatedTree, id: AnnId, out: &mut Vec<AnnId>) {
    let kind = tree.kind(id).clone();
    match kind {
        AnnKind::Get { .. }
        | AnnKind::Agg { .. }
        | AnnKind::NameBound { .. }
        | AnnKind::HandleBound { .. } => out.push(id),
        AnnKind::Fun { args, .. } => {
            for a in args {
                gather(tree, a, out);
            }
        }
        AnnKind::As { over, .. } | AnnKind::Highlight { over } | AnnKind::Sort { over, .. } => {
            gather(tree, over, out);
        }
        AnnKind::Box { over: Some(inner), .. }
            if matches!(tree.kind(inner), AnnKind::ExtendedBind { .. }) =>
        {
            gather(tree, inner, out);
        }
        AnnKind::Box { .. } => seed_box(tree, id),
        AnnKind::ExtendedBind { over, args, .. } => {
            if let AnnKind::ExtendedBind { owned, .. } = tree.kind_mut(id) {
                *owned = true;
            }
            for a in args {
                gather(tree, a, out);
            }
            gather(tree, over, out);
        }
        AnnKind::Lit { .. } | AnnKind::Var { .. } => {}
        other => unreachable!("gather on tabular node {other:?}"),
    }
}

/// Walks a joinee's chain of `Box`-wrapped binds, collecting binding
/// expressions' free refs and marking each bind owned. Stops at the first
/// non-bind body without seeding it; the join routes its refs instead.
fn gather_bindings(tree: &mut AnnotatedTree, box_id: AnnId, out: &mut Vec<AnnId>) {
    let Some(inner) = tree.box_over(box_id) else {
        return;
    };
    if let AnnKind::ExtendedBind { over, args, .. } = tree.kind(inner).clone() {
        if let AnnKind::ExtendedBind { owned, .. } = tree.kind_mut(inner) {
            *owned = true;
        }
        for a in args {
            gather(tree, a, out);
        }
        gather_bindings(tree, over, out);
    }
}

/// Checks a reference against a box type.
fn validate(tree: &AnnotatedTree, ty: &BoxType, r: AnnId) -> Result<(), CompileError> {
    match tree.kind(r) {
        AnnKind::HandleBound { over, handle } => match ty.handle_map.get(handle) {
            None => Err(tree.error_at(r, CompileErrorKind::UndefinedHandle)),
            Some(HandleType::Ambiguous) => {
                Err(tree.error_at(r, CompileErrorKind::AmbiguousHandle))
            }
            Some(HandleType::Row(row)) => validate_row(tree, row, *over),
        },
        _ => validate_row(tree, &ty.row, r),
    }
}

fn validate_row(tree: &AnnotatedTree, row: &RowType, r: AnnId) -> Result<(), CompileError> {
    match tree.kind(r) {
        AnnKind::NameBound { over, name } => match row.fields.get(name.as_str()) {
            None | Some(FieldType::Empty) => {
                Err(tree.error_at(r, CompileErrorKind::UndefinedName(name.clone())))
            }
            Some(FieldType::Scalar) => {
                Err(tree.error_at(r, CompileErrorKind::UnexpectedScalarType(name.clone())))
            }
            Some(FieldType::Ambiguous) => {
                Err(tree.error_at(r, CompileErrorKind::AmbiguousName(name.clone())))
            }
            Some(FieldType::Row(inner)) => validate_row(tree, inner, *over),
        },
        AnnKind::Get { name } => match row.fields.get(name.as_str()) {
            None | Some(FieldType::Empty) => {
                Err(tree.error_at(r, CompileErrorKind::UndefinedName(name.clone())))
            }
            Some(FieldType::Row(_)) => {
                Err(tree.error_at(r, CompileErrorKind::UnexpectedRowType(name.clone())))
            }
            Some(FieldType::Ambiguous) => {
                Err(tree.error_at(r, CompileErrorKind::AmbiguousName(name.clone())))
            }
            Some(FieldType::Scalar) => Ok(()),
        },
        AnnKind::Agg { .. } => match &row.group {
            GroupType::Empty => Err(tree.error_at(r, CompileErrorKind::UnexpectedAggregate)),
            GroupType::Ambiguous => Err(tree.error_at(r, CompileErrorKind::AmbiguousAggregate)),
            GroupType::Row(_) => Ok(()),
        },
        other => unreachable!("validate on non-reference node {other:?}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

/// Decides which side of a join a reference belongs to. The type layer has
/// already rejected ambiguous references, so exactly one side matches.
fn route(tree: &AnnotatedTree, lt: &BoxType, rt: &BoxType, r: AnnId) -> Side {
    match tree.kind(r) {
        AnnKind::HandleBound { handle, .. } => {
            if lt.handle_map.contains_key(handle) {
                Side::Left
            } else {
                Side::Right
            }
        }
        _ => route_row(tree, &lt.row, &rt.row, r),
    }
}

fn route_row(tree: &AnnotatedTree, lt: &RowType, rt: &RowType, r: AnnId) -> Side {
    match tree.kind(r) {
        AnnKind::NameBound { over, name } => {
            match (lt.fields.get(name.as_str()), rt.fields.get(name.as_str())) {
                (Some(FieldType::Row(lrow)), Some(FieldType::Row(rrow))) => {
                    route_row(tree, lrow, rrow, *over)
                }
                (Some(_), None) => Side::Left,
                _ => Side::Right,
            }
        }
        AnnKind::Get { name } => {
            if lt.fields.contains_key(name.as_str()) {
                Side::Left
            } else {
                Side::Right
            }
        }
        AnnKind::Agg { .. } => {
            if matches!(lt.group, GroupType::Row(_)) {
                Side::Left
            } else {
                Side::Right
            }
        }
        other => unreachable!("route on non-reference node {other:?}"),
    }
}
