//! Shared state of one compilation: the annotated arena, the path map, and
//! the handle table.
//!
//! The annotated tree is a parallel copy of the user tree stored in an
//! arena and addressed by [`AnnId`]. Arena identity is per *occurrence*: a
//! user subquery spliced into two positions produces two annotated nodes,
//! each remembering its own position through the path map, while the handle
//! table stays keyed by the identity of the original user node.

use crate::catalog::Table;
use crate::error::{CompileError, CompileErrorKind};
use crate::nodes::{NodeId, NullsOrder, SortDir, SqlNode, Value};
use crate::types::{BoxType, Handle, Symbol};
use std::collections::HashMap;
use std::sync::Arc;

/// Index of a node in the annotated arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnnId(u32);

impl AnnId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// An annotated node.
///
/// Tabular children are always the [`AnnKind::Box`] wrapping the child
/// operator; scalar children are plain scalar nodes. `Get` chains have been
/// normalised away: a remaining `Get` is always a terminal column
/// reference, navigation is spelled with `NameBound`, and identity-based
/// navigation with `HandleBound`.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnKind {
    From {
        table: Arc<Table>,
    },
    Select {
        over: AnnId,
        args: Vec<AnnId>,
    },
    Where {
        over: AnnId,
        condition: AnnId,
    },
    ExtendedJoin {
        over: AnnId,
        joinee: AnnId,
        on: AnnId,
        left: bool,
        right: bool,
        /// References escaping the joinee into the left side; non-empty
        /// exactly when the join must be emitted as LATERAL.
        lateral: Vec<AnnId>,
        /// Cached union of the two sides, filled by the resolver.
        ty: BoxType,
    },
    Group {
        over: AnnId,
        by: Vec<AnnId>,
    },
    Partition {
        over: AnnId,
        by: Vec<AnnId>,
        order_by: Vec<AnnId>,
    },
    Append {
        over: AnnId,
        list: Vec<AnnId>,
    },
    As {
        over: AnnId,
        name: Symbol,
    },
    Define {
        over: AnnId,
        args: Vec<AnnId>,
    },
    Order {
        over: AnnId,
        by: Vec<AnnId>,
    },
    Limit {
        over: AnnId,
        limit: Option<u64>,
        offset: Option<u64>,
    },
    Highlight {
        over: AnnId,
    },
    ExtendedBind {
        over: AnnId,
        args: Vec<AnnId>,
        /// Set when the binding list is consumed inside a valid outer
        /// query; otherwise the list must not reference any columns.
        owned: bool,
    },
    /// Wrapper around every tabular node. `handle` is nonzero iff some
    /// outer reference addresses this node by identity; `ty` is filled by
    /// the resolver and `refs` by the linker.
    Box {
        over: Option<AnnId>,
        handle: Handle,
        ty: BoxType,
        refs: Vec<AnnId>,
    },
    /// Terminal column reference.
    Get {
        name: Symbol,
    },
    Fun {
        name: Symbol,
        args: Vec<AnnId>,
    },
    Agg {
        name: Symbol,
        args: Vec<AnnId>,
        filter: Option<AnnId>,
    },
    Lit {
        value: Value,
    },
    Var {
        name: Symbol,
    },
    Sort {
        over: AnnId,
        dir: SortDir,
        nulls: Option<NullsOrder>,
    },
    /// Navigation by field name into a nested row.
    NameBound {
        over: AnnId,
        name: Symbol,
    },
    /// Navigation into a tabular node addressed by identity.
    HandleBound {
        over: AnnId,
        handle: Handle,
    },
}

/// Traceback bookkeeping: a tree of user-visible positions plus the origin
/// position of every annotated node.
#[derive(Debug, Default)]
pub(crate) struct PathMap {
    /// `(user node, parent position)` pairs.
    paths: Vec<(SqlNode, Option<usize>)>,
    /// Stack of positions; the top is the position being annotated.
    stack: Vec<usize>,
    origins: HashMap<AnnId, usize>,
}

impl PathMap {
    fn grow(&mut self, node: &SqlNode) {
        let parent = self.stack.last().copied();
        self.paths.push((node.clone(), parent));
        self.stack.push(self.paths.len() - 1);
    }

    fn shrink(&mut self) {
        self.stack.pop();
    }

    fn mark(&mut self, id: AnnId) {
        if let Some(&top) = self.stack.last() {
            self.origins.insert(id, top);
        }
    }

    fn path_from(&self, mut position: Option<usize>) -> Vec<SqlNode> {
        let mut out = Vec::new();
        while let Some(idx) = position {
            let (node, parent) = &self.paths[idx];
            out.push(node.clone());
            position = *parent;
        }
        out
    }
}

/// The annotated tree: arena, box list in creation order, path map, and the
/// handle table keyed by original user-node identity.
#[derive(Debug)]
pub struct AnnotatedTree {
    pub(crate) nodes: Vec<AnnKind>,
    pub(crate) boxes: Vec<AnnId>,
    pub(crate) root: AnnId,
    pub(crate) path_map: PathMap,
    pub(crate) handles: HashMap<NodeId, Handle>,
    next_handle: Handle,
}

impl AnnotatedTree {
    pub(crate) fn new() -> Self {
        AnnotatedTree {
            nodes: Vec::new(),
            boxes: Vec::new(),
            root: AnnId(0),
            path_map: PathMap::default(),
            handles: HashMap::new(),
            next_handle: 1,
        }
    }

    /// The box wrapping the root operator.
    pub fn root(&self) -> AnnId {
        self.root
    }

    /// All boxes, in creation order (children before parents).
    pub fn boxes(&self) -> &[AnnId] {
        &self.boxes
    }

    pub fn kind(&self, id: AnnId) -> &AnnKind {
        &self.nodes[id.index()]
    }

    /// All annotated nodes with their ids, in allocation order.
    pub fn nodes(&self) -> impl Iterator<Item = (AnnId, &AnnKind)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, kind)| (AnnId(i as u32), kind))
    }

    pub(crate) fn kind_mut(&mut self, id: AnnId) -> &mut AnnKind {
        &mut self.nodes[id.index()]
    }

    /// Allocates a node, recording the current position as its origin.
    pub(crate) fn alloc(&mut self, kind: AnnKind) -> AnnId {
        let id = AnnId(self.nodes.len() as u32);
        self.nodes.push(kind);
        self.path_map.mark(id);
        id
    }

    /// Allocates a node that inherits the origin of an existing one (used
    /// by the linker for synthesized references).
    pub(crate) fn alloc_like(&mut self, like: AnnId, kind: AnnKind) -> AnnId {
        let id = AnnId(self.nodes.len() as u32);
        self.nodes.push(kind);
        if let Some(&origin) = self.path_map.origins.get(&like) {
            self.path_map.origins.insert(id, origin);
        }
        id
    }

    pub(crate) fn grow_path(&mut self, node: &SqlNode) {
        self.path_map.grow(node);
    }

    pub(crate) fn shrink_path(&mut self) {
        self.path_map.shrink();
    }

    /// The user nodes leading to `id`, innermost first.
    pub fn path_of(&self, id: AnnId) -> Vec<SqlNode> {
        self.path_map
            .path_from(self.path_map.origins.get(&id).copied())
    }

    /// The user node `id` originated from.
    pub(crate) fn origin_of(&self, id: AnnId) -> Option<&SqlNode> {
        let idx = self.path_map.origins.get(&id)?;
        Some(&self.path_map.paths[*idx].0)
    }

    /// Error at an annotated node's position.
    pub(crate) fn error_at(&self, id: AnnId, kind: CompileErrorKind) -> CompileError {
        CompileError::new(kind)
            .with_path(self.path_of(id).iter().map(SqlNode::describe).collect())
    }

    /// Error at the position currently being annotated.
    pub(crate) fn error_here(&self, kind: CompileErrorKind) -> CompileError {
        let path = self
            .path_map
            .path_from(self.path_map.stack.last().copied());
        CompileError::new(kind).with_path(path.iter().map(SqlNode::describe).collect())
    }

    /// Lazily assigns the handle of a user tabular node.
    pub(crate) fn make_handle(&mut self, node: &SqlNode) -> Handle {
        if let Some(&handle) = self.handles.get(&node.id()) {
            return handle;
        }
        let handle = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(node.id(), handle);
        handle
    }

    /// The handle of the user node `id` originated from, or zero.
    pub(crate) fn handle_of(&self, id: AnnId) -> Handle {
        self.origin_of(id)
            .and_then(|node| self.handles.get(&node.id()))
            .copied()
            .unwrap_or(0)
    }

    // Box accessors. These are only meaningful on `AnnKind::Box` entries;
    // calling them on anything else is a compiler bug.

    pub fn box_over(&self, id: AnnId) -> Option<AnnId> {
        match self.kind(id) {
            AnnKind::Box { over, .. } => *over,
            other => unreachable!("box_over on non-box node {other:?}"),
        }
    }

    pub fn box_type(&self, id: AnnId) -> &BoxType {
        match self.kind(id) {
            AnnKind::Box { ty, .. } => ty,
            other => unreachable!("box_type on non-box node {other:?}"),
        }
    }

    pub fn box_handle(&self, id: AnnId) -> Handle {
        match self.kind(id) {
            AnnKind::Box { handle, .. } => *handle,
            other => unreachable!("box_handle on non-box node {other:?}"),
        }
    }

    pub fn box_refs(&self, id: AnnId) -> &[AnnId] {
        match self.kind(id) {
            AnnKind::Box { refs, .. } => refs,
            other => unreachable!("box_refs on non-box node {other:?}"),
        }
    }

    pub(crate) fn set_box_resolved(&mut self, id: AnnId, handle: Handle, ty: BoxType) {
        match self.kind_mut(id) {
            AnnKind::Box {
                handle: h, ty: t, ..
            } => {
                *h = handle;
                *t = ty;
            }
            other => unreachable!("set_box_resolved on non-box node {other:?}"),
        }
    }

    pub(crate) fn push_ref(&mut self, id: AnnId, r: AnnId) {
        match self.kind_mut(id) {
            AnnKind::Box { refs, .. } => refs.push(r),
            other => unreachable!("push_ref on non-box node {other:?}"),
        }
    }

    /// Strips one layer of `HandleBound` when the handle is consumed by
    /// this box. Stored refs keep the wrapper; consumers reading a box's
    /// refs apply this first.
    pub fn translate_ref(&self, box_id: AnnId, r: AnnId) -> AnnId {
        let handle = self.box_handle(box_id);
        match self.kind(r) {
            AnnKind::HandleBound { over, handle: h } if handle != 0 && *h == handle => *over,
            _ => r,
        }
    }

    /// Output label of an annotated scalar argument.
    pub(crate) fn ann_label(&self, id: AnnId) -> Symbol {
        match self.kind(id) {
            AnnKind::Get { name }
            | AnnKind::Fun { name, .. }
            | AnnKind::Agg { name, .. }
            | AnnKind::Var { name }
            | AnnKind::As { name, .. } => name.clone(),
            AnnKind::NameBound { over, .. }
            | AnnKind::HandleBound { over, .. }
            | AnnKind::Highlight { over } => self.ann_label(*over),
            AnnKind::Sort { over, .. } => self.ann_label(*over),
            AnnKind::Box { ty, .. } => ty.name.clone(),
            _ => Symbol::new("_"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Table;
    use crate::nodes::{from, get};

    #[test]
    fn handles_are_stable_per_user_node() {
        let mut tree = AnnotatedTree::new();
        let q = from(Table::new("t", ["a"]));
        let other = from(Table::new("t", ["a"]));

        let h1 = tree.make_handle(&q);
        let h2 = tree.make_handle(&q.clone());
        let h3 = tree.make_handle(&other);

        assert_eq!(h1, 1);
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
    }

    #[test]
    fn path_map_records_origins() {
        let mut tree = AnnotatedTree::new();
        let outer = get("a").get("b");
        let inner = get("c");

        tree.grow_path(&outer);
        let first = tree.alloc(AnnKind::Get {
            name: Symbol::new("b"),
        });
        tree.grow_path(&inner);
        let second = tree.alloc(AnnKind::Get {
            name: Symbol::new("c"),
        });
        tree.shrink_path();
        tree.shrink_path();

        let first_path = tree.path_of(first);
        assert_eq!(first_path.len(), 1);
        assert_eq!(first_path[0].describe(), "Get.a.b");

        let second_path = tree.path_of(second);
        assert_eq!(second_path.len(), 2);
        assert_eq!(second_path[0].describe(), "Get.c");
        assert_eq!(second_path[1].describe(), "Get.a.b");
    }

    #[test]
    fn alloc_like_copies_the_origin() {
        let mut tree = AnnotatedTree::new();
        let node = get("a");
        tree.grow_path(&node);
        let original = tree.alloc(AnnKind::Get {
            name: Symbol::new("a"),
        });
        tree.shrink_path();

        let copy = tree.alloc_like(
            original,
            AnnKind::Get {
                name: Symbol::new("a"),
            },
        );
        assert_eq!(tree.path_of(copy).len(), 1);
    }
}
