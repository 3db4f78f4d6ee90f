//! Pass 2: bottom-up `BoxType` assignment.
//!
//! Boxes are visited in construction order, so every child box is resolved
//! before its parent. Alongside the type, each box learns its handle, and
//! the handle becomes visible in the type's handle map so outer references
//! can be checked against it.

use super::context::{AnnId, AnnKind, AnnotatedTree};
use crate::error::{CompileError, CompileErrorKind};
use crate::types::{BoxType, FieldType, GroupType, HandleType, RowType, Symbol};
use indexmap::IndexMap;
use std::collections::HashSet;

pub(super) fn resolve(tree: &mut AnnotatedTree) -> Result<(), CompileError> {
    for i in 0..tree.boxes.len() {
        let b = tree.boxes[i];
        let Some(over) = tree.box_over(b) else {
            // The implicit empty input keeps the empty type.
            continue;
        };
        let handle = tree.handle_of(over);
        let mut ty = resolve_kind(tree, over)?;
        if handle != 0 {
            let row = ty.row.clone();
            match ty.handle_map.get_mut(&handle) {
                Some(existing) => *existing = HandleType::Ambiguous,
                None => {
                    ty.handle_map.insert(handle, HandleType::Row(row));
                }
            }
        }
        tree.set_box_resolved(b, handle, ty);
    }
    Ok(())
}

fn resolve_kind(tree: &mut AnnotatedTree, id: AnnId) -> Result<BoxType, CompileError> {
    // Work on a copy of the node so child boxes can be read (and, for
    // joins, the cached type written) without fighting the arena borrow.
    let kind = tree.kind(id).clone();
    let ty = match kind {
        AnnKind::From { table } => {
            let mut fields: IndexMap<Symbol, FieldType> = table
                .columns
                .iter()
                .map(|c| (c.clone(), FieldType::Scalar))
                .collect();
            // The table's own name doubles as a namespace for its columns,
            // which is what lets `Get(:t, :c)` disambiguate across a join
            // without an explicit alias. A column claiming the name wins.
            let column_row = RowType {
                fields: fields.clone(),
                group: GroupType::Empty,
            };
            if !fields.contains_key(table.name.as_str()) {
                fields.insert(table.name.clone(), FieldType::Row(column_row));
            }
            BoxType::new(
                table.name.clone(),
                RowType {
                    fields,
                    group: GroupType::Empty,
                },
            )
        }
        AnnKind::As { over, name } => {
            let t = tree.box_type(over);
            let mut ty = BoxType::new(
                name.clone(),
                RowType::with_fields([(name, FieldType::Row(t.row.clone()))]),
            );
            ty.handle_map = t.handle_map.clone();
            ty
        }
        AnnKind::Select { over, args } => {
            let name = tree.box_type(over).name.clone();
            let mut fields = IndexMap::new();
            for arg in args {
                let label = tree.ann_label(arg);
                if fields.insert(label.clone(), FieldType::Scalar).is_some() {
                    return Err(tree.error_at(arg, CompileErrorKind::DuplicateLabel(label)));
                }
            }
            BoxType::new(
                name,
                RowType {
                    fields,
                    group: GroupType::Empty,
                },
            )
        }
        AnnKind::Define { over, args } => {
            let t = tree.box_type(over).clone();
            let mut row = t.row;
            let mut seen = HashSet::new();
            for arg in args {
                let label = tree.ann_label(arg);
                if !seen.insert(label.clone()) {
                    return Err(tree.error_at(arg, CompileErrorKind::DuplicateLabel(label)));
                }
                // Redefinition of an existing column keeps its position.
                row.fields.insert(label, FieldType::Scalar);
            }
            BoxType {
                name: t.name,
                row,
                handle_map: t.handle_map,
            }
        }
        AnnKind::Group { over, by } => {
            let t = tree.box_type(over);
            let name = t.name.clone();
            let base = t.row.clone();
            let mut fields = IndexMap::new();
            for key in by {
                let label = tree.ann_label(key);
                if fields.insert(label.clone(), FieldType::Scalar).is_some() {
                    return Err(tree.error_at(key, CompileErrorKind::DuplicateLabel(label)));
                }
            }
            BoxType::new(
                name,
                RowType {
                    fields,
                    group: GroupType::Row(Box::new(base)),
                },
            )
        }
        AnnKind::Partition { over, .. } => {
            let t = tree.box_type(over);
            let mut ty = BoxType::new(
                t.name.clone(),
                RowType {
                    fields: t.row.fields.clone(),
                    group: GroupType::Row(Box::new(t.row.clone())),
                },
            );
            ty.handle_map = t.handle_map.clone();
            ty
        }
        AnnKind::Append { over, list } => {
            let mut ty = tree.box_type(over).clone();
            for branch in list {
                ty = ty.intersect(tree.box_type(branch));
            }
            ty
        }
        AnnKind::ExtendedJoin { over, joinee, .. } => {
            let ty = tree.box_type(over).union(tree.box_type(joinee));
            if let AnnKind::ExtendedJoin { ty: cached, .. } = tree.kind_mut(id) {
                *cached = ty.clone();
            }
            ty
        }
        AnnKind::ExtendedBind { over, args, .. } => {
            let mut seen = HashSet::new();
            for arg in args {
                let label = tree.ann_label(arg);
                if !seen.insert(label.clone()) {
                    return Err(tree.error_at(arg, CompileErrorKind::DuplicateLabel(label)));
                }
            }
            tree.box_type(over).clone()
        }
        AnnKind::Where { over, .. }
        | AnnKind::Order { over, .. }
        | AnnKind::Limit { over, .. }
        | AnnKind::Highlight { over } => tree.box_type(over).clone(),
        other => unreachable!("resolve on non-tabular node {other:?}"),
    };
    Ok(ty)
}
