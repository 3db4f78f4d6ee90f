//! Table metadata consumed by `From`.
//!
//! A [`Table`] is the minimal shape the compiler needs: a name and the
//! declared column order. A [`Catalog`] is an ordered collection of tables,
//! typically deserialized from application-provided JSON; how that JSON is
//! obtained (introspection, migrations, hand-written fixtures) is outside
//! this crate.

use crate::types::Symbol;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A named table with its columns in declared order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: Symbol,
    pub columns: Vec<Symbol>,
}

impl Table {
    pub fn new<N, I, C>(name: N, columns: I) -> Self
    where
        N: Into<Symbol>,
        I: IntoIterator<Item = C>,
        C: Into<Symbol>,
    {
        Table {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// True when the table declares a column with this name.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.as_str() == name)
    }
}

/// An ordered set of tables keyed by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    tables: IndexMap<Symbol, Arc<Table>>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog::default()
    }

    /// Inserts a table, replacing any previous entry with the same name.
    pub fn insert(&mut self, table: Table) {
        self.tables.insert(table.name.clone(), Arc::new(table));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Table>> {
        self.tables.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Table>> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl FromIterator<Table> for Catalog {
    fn from_iter<I: IntoIterator<Item = Table>>(iter: I) -> Self {
        let mut catalog = Catalog::new();
        for table in iter {
            catalog.insert(table);
        }
        catalog
    }
}
