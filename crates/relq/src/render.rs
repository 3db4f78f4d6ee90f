//! SQL text generation: compile, translate, write.

mod sql;
mod translate;

use crate::compiler::{compile, AnnotatedTree};
use crate::dialect::Dialect;
use crate::error::CompileError;
use crate::nodes::SqlNode;
use crate::types::Symbol;

/// A rendered statement together with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedSql {
    pub sql: String,
    /// Unbound variable names, in placeholder order.
    pub params: Vec<Symbol>,
}

/// Compiles and renders a query for the given dialect.
pub fn render(query: &SqlNode, dialect: Dialect) -> Result<RenderedSql, CompileError> {
    let tree = compile(query)?;
    Ok(render_tree(&tree, dialect))
}

/// Renders an already-compiled tree.
pub fn render_tree(tree: &AnnotatedTree, dialect: Dialect) -> RenderedSql {
    let (query, params) = translate::translate(tree, dialect);
    let mut sql = String::new();
    sql::write_query(&query, dialect, &mut sql);
    #[cfg(feature = "tracing")]
    tracing::debug!(bytes = sql.len(), params = params.len(), "rendered");
    RenderedSql { sql, params }
}

/// Shorthand for [`render`] when only the text is needed.
pub fn to_sql(query: &SqlNode, dialect: Dialect) -> Result<String, CompileError> {
    render(query, dialect).map(|rendered| rendered.sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Table;
    use crate::nodes::{from, fun, get, lit, var};

    fn people() -> Table {
        Table::new("people", ["name", "age"])
    }

    #[test]
    fn simple_projection() {
        let q = from(people()).select(vec![get("name")]);
        let sql = to_sql(&q, Dialect::Postgres).expect("render");
        assert_eq!(sql, "SELECT \"people\".\"name\" FROM \"people\"");
    }

    #[test]
    fn filter_merges_into_the_same_statement() {
        let q = from(people())
            .filter(fun(">", vec![get("age"), lit(21)]))
            .select(vec![get("name")]);
        let sql = to_sql(&q, Dialect::Postgres).expect("render");
        assert_eq!(
            sql,
            "SELECT \"people\".\"name\" FROM \"people\" WHERE \"people\".\"age\" > 21"
        );
    }

    #[test]
    fn unbound_variables_become_ordered_params() {
        let q = from(people())
            .filter(fun(
                "and",
                vec![
                    fun(">", vec![get("age"), var("min_age")]),
                    fun("<", vec![get("age"), var("max_age")]),
                ],
            ))
            .select(vec![get("name")]);
        let rendered = render(&q, Dialect::Postgres).expect("render");
        assert!(rendered.sql.contains("$1"));
        assert!(rendered.sql.contains("$2"));
        let names: Vec<_> = rendered.params.iter().map(Symbol::as_str).collect();
        assert_eq!(names, ["min_age", "max_age"]);
    }

    #[test]
    fn repeated_variables_share_one_parameter() {
        let q = from(people())
            .filter(fun(
                "or",
                vec![
                    fun("=", vec![get("name"), var("who")]),
                    fun("=", vec![get("age"), var("who")]),
                ],
            ))
            .select(vec![get("name")]);
        let rendered = render(&q, Dialect::Postgres).expect("render");
        assert_eq!(rendered.params.len(), 1);
        assert!(!rendered.sql.contains("$2"));
    }
}
