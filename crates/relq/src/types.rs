//! Row and box types propagated through the compiled query tree.
//!
//! Every boxed tabular node is assigned a [`BoxType`]: its default alias, the
//! shape of the rows it produces, and the set of inner nodes an outer
//! reference may still address (the handle map). Shapes are combined with a
//! small lattice: joins take the *union* of the two sides, set operations
//! take the *intersection* of all branches, and irreconcilable collisions
//! degrade to [`FieldType::Ambiguous`] rather than failing outright. An
//! ambiguous entry only turns into an error when a reference actually
//! touches it, so unaffected queries keep compiling.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// A cheaply clonable identifier (column, label, alias, or parameter name).
///
/// Backed by a shared `Arc<str>`; equality and hashing are by content.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(Arc<str>);

impl Symbol {
    pub fn new(name: impl AsRef<str>) -> Self {
        Symbol(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol::new(name)
    }
}

impl From<String> for Symbol {
    fn from(name: String) -> Self {
        Symbol(Arc::from(name.as_str()))
    }
}

impl From<&String> for Symbol {
    fn from(name: &String) -> Self {
        Symbol::new(name)
    }
}

impl From<&Symbol> for Symbol {
    fn from(name: &Symbol) -> Self {
        name.clone()
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

/// Identity of a tabular node addressed by an outer reference.
///
/// Zero means "not addressed"; the annotator hands out small positive
/// integers lazily, one per distinct user node.
pub type Handle = u32;

/// The shape of a single visible name inside a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// A plain column.
    Scalar,
    /// A nested namespace (introduced by `As` or a table's own label).
    Row(RowType),
    /// Absent; the unit of the union operation.
    Empty,
    /// Two branches exposed conflicting meanings for this name.
    Ambiguous,
}

impl FieldType {
    /// Join-style merge of two meanings of the same name.
    fn union(&self, other: &FieldType) -> FieldType {
        match (self, other) {
            (FieldType::Empty, t) | (t, FieldType::Empty) => t.clone(),
            (FieldType::Row(lhs), FieldType::Row(rhs)) => FieldType::Row(lhs.union(rhs)),
            _ => FieldType::Ambiguous,
        }
    }

    /// Append-style merge of two meanings of the same name.
    fn intersect(&self, other: &FieldType) -> Option<FieldType> {
        match (self, other) {
            (FieldType::Empty, _) | (_, FieldType::Empty) => None,
            (FieldType::Scalar, FieldType::Scalar) => Some(FieldType::Scalar),
            (FieldType::Row(lhs), FieldType::Row(rhs)) => {
                Some(FieldType::Row(lhs.intersect(rhs)))
            }
            _ => Some(FieldType::Ambiguous),
        }
    }
}

/// The aggregate-eligible base of a row.
///
/// `Group` and `Partition` expose their input row here so aggregate
/// references can be checked for an enclosing grouping scope.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GroupType {
    #[default]
    Empty,
    Row(Box<RowType>),
    Ambiguous,
}

impl GroupType {
    fn union(&self, other: &GroupType) -> GroupType {
        match (self, other) {
            (GroupType::Empty, g) | (g, GroupType::Empty) => g.clone(),
            _ => GroupType::Ambiguous,
        }
    }

    fn intersect(&self, other: &GroupType) -> GroupType {
        match (self, other) {
            (GroupType::Empty, _) | (_, GroupType::Empty) => GroupType::Empty,
            (GroupType::Row(lhs), GroupType::Row(rhs)) => {
                GroupType::Row(Box::new(lhs.intersect(rhs)))
            }
            _ => GroupType::Ambiguous,
        }
    }
}

/// An ordered mapping of visible names, plus the grouping base.
///
/// Field insertion order is load-bearing: it determines the order of the
/// rendered SELECT list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowType {
    pub fields: IndexMap<Symbol, FieldType>,
    pub group: GroupType,
}

impl RowType {
    pub fn new() -> Self {
        RowType::default()
    }

    pub(crate) fn with_fields<I>(fields: I) -> Self
    where
        I: IntoIterator<Item = (Symbol, FieldType)>,
    {
        RowType {
            fields: fields.into_iter().collect(),
            group: GroupType::Empty,
        }
    }

    /// Merge for the two sides of a join. Left fields come first; a name
    /// claimed by both sides keeps its position and degrades per
    /// [`FieldType::union`].
    pub(crate) fn union(&self, other: &RowType) -> RowType {
        let mut fields = self.fields.clone();
        for (name, ft) in &other.fields {
            match fields.get_mut(name) {
                Some(existing) => *existing = existing.union(ft),
                None => {
                    fields.insert(name.clone(), ft.clone());
                }
            }
        }
        RowType {
            fields,
            group: self.group.union(&other.group),
        }
    }

    /// Merge for the branches of a set operation: only names present on
    /// both sides survive, in left order.
    pub(crate) fn intersect(&self, other: &RowType) -> RowType {
        let mut fields = IndexMap::new();
        for (name, ft) in &self.fields {
            if let Some(other_ft) = other.fields.get(name) {
                if let Some(merged) = ft.intersect(other_ft) {
                    fields.insert(name.clone(), merged);
                }
            }
        }
        RowType {
            fields,
            group: self.group.intersect(&other.group),
        }
    }
}

/// The row type reachable through a handle, or an ambiguity marker when the
/// same handle became visible along more than one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleType {
    Row(RowType),
    Ambiguous,
}

/// The resolved schema of a boxed tabular node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxType {
    /// Default alias for this table expression.
    pub name: Symbol,
    /// Visible columns and nested namespaces.
    pub row: RowType,
    /// Every inner tabular node an outer reference may still target.
    pub handle_map: IndexMap<Handle, HandleType>,
}

impl BoxType {
    pub(crate) fn new(name: Symbol, row: RowType) -> Self {
        BoxType {
            name,
            row,
            handle_map: IndexMap::new(),
        }
    }

    /// The type of the implicit empty input.
    pub(crate) fn empty() -> Self {
        BoxType::new(Symbol::new("_"), RowType::new())
    }

    /// Join merge: rows union, handle maps union, overlaps degrade.
    pub(crate) fn union(&self, other: &BoxType) -> BoxType {
        let mut handle_map = self.handle_map.clone();
        for (handle, ht) in &other.handle_map {
            match handle_map.get_mut(handle) {
                Some(existing) => *existing = HandleType::Ambiguous,
                None => {
                    handle_map.insert(*handle, ht.clone());
                }
            }
        }
        BoxType {
            name: self.name.clone(),
            row: self.row.union(&other.row),
            handle_map,
        }
    }

    /// Set-operation merge: rows intersect, handle maps keep handles known
    /// to both sides, unequal payloads degrade.
    pub(crate) fn intersect(&self, other: &BoxType) -> BoxType {
        let mut handle_map = IndexMap::new();
        for (handle, ht) in &self.handle_map {
            if let Some(other_ht) = other.handle_map.get(handle) {
                let merged = if ht == other_ht {
                    ht.clone()
                } else {
                    HandleType::Ambiguous
                };
                handle_map.insert(*handle, merged);
            }
        }
        BoxType {
            name: self.name.clone(),
            row: self.row.intersect(&other.row),
            handle_map,
        }
    }
}
