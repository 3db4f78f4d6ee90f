//! Compositional SQL query construction and compilation.
//!
//! Queries are built as pipelines of relational operators over table
//! metadata, then compiled and rendered to SQL text for a chosen dialect:
//!
//! ```
//! use relq::{from, fun, get, lit, Dialect, Table};
//!
//! let people = Table::new("people", ["name", "age"]);
//! let q = from(people)
//!     .filter(fun(">", vec![get("age"), lit(21)]))
//!     .select(vec![get("name")]);
//!
//! let sql = relq::to_sql(&q, Dialect::Postgres)?;
//! assert_eq!(
//!     sql,
//!     "SELECT \"people\".\"name\" FROM \"people\" WHERE \"people\".\"age\" > 21"
//! );
//! # Ok::<(), relq::CompileError>(())
//! ```
//!
//! The compiler middle end ([`compile`]) can also be used on its own: it
//! returns the annotated tree with every tabular node boxed, typed, and
//! linked to the references its consumers demand, which is what the SQL
//! renderer consumes.

pub mod catalog;
pub mod compiler;
pub mod dialect;
pub mod error;
pub mod nodes;
pub mod render;
pub mod types;

pub use catalog::{Catalog, Table};
pub use compiler::{compile, AnnId, AnnKind, AnnotatedTree};
pub use dialect::Dialect;
pub use error::{CompileError, CompileErrorKind};
pub use nodes::{
    agg, aggregate, count, from, fun, get, lit, select, var, NullsOrder, SortDir, SqlNode, Value,
};
pub use render::{render, render_tree, to_sql, RenderedSql};
pub use types::{BoxType, FieldType, GroupType, Handle, HandleType, RowType, Symbol};
