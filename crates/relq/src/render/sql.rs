//! SQL syntax fragments and the text writer.
//!
//! The translator lowers the linked tree into this small syntax tree, which
//! is then written out in one line. Compound operands are parenthesized
//! unconditionally rather than tracking operator precedence.

use crate::dialect::Dialect;
use crate::nodes::{NullsOrder, SortDir, Value};
use crate::types::Symbol;

#[derive(Debug, Clone)]
pub(crate) enum SqlExpr {
    Column {
        table: Option<Symbol>,
        name: Symbol,
    },
    Literal(Value),
    Placeholder(String),
    Unary {
        op: &'static str,
        expr: Box<SqlExpr>,
    },
    Binary {
        op: String,
        lhs: Box<SqlExpr>,
        rhs: Box<SqlExpr>,
    },
    Postfix {
        op: &'static str,
        expr: Box<SqlExpr>,
    },
    InList {
        expr: Box<SqlExpr>,
        list: Vec<SqlExpr>,
        negated: bool,
    },
    Between {
        expr: Box<SqlExpr>,
        low: Box<SqlExpr>,
        high: Box<SqlExpr>,
        negated: bool,
    },
    Case {
        when: Box<SqlExpr>,
        then: Box<SqlExpr>,
    },
    Call {
        name: Symbol,
        args: Vec<SqlExpr>,
    },
    Aggregate {
        name: Symbol,
        args: Vec<SqlExpr>,
        filter: Option<Box<SqlExpr>>,
        window: Option<Window>,
    },
    Subquery(Box<SqlQuery>),
}

#[derive(Debug, Clone)]
pub(crate) struct Window {
    pub partition_by: Vec<SqlExpr>,
    pub order_by: Vec<OrderExpr>,
}

#[derive(Debug, Clone)]
pub(crate) struct OrderExpr {
    pub expr: SqlExpr,
    pub dir: Option<SortDir>,
    pub nulls: Option<NullsOrder>,
}

#[derive(Debug, Clone)]
pub(crate) enum TableRef {
    Table {
        name: Symbol,
        alias: Option<Symbol>,
    },
    Subquery {
        query: Box<SqlQuery>,
        alias: Symbol,
        lateral: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

#[derive(Debug, Clone)]
pub(crate) struct JoinClause {
    pub table: TableRef,
    pub on: SqlExpr,
    pub kind: JoinKind,
}

#[derive(Debug, Clone)]
pub(crate) struct SelectStmt {
    /// `(label, expression)` pairs; the label is dropped when it matches a
    /// plain column's own name.
    pub projection: Vec<(Symbol, SqlExpr)>,
    pub from: Option<TableRef>,
    pub joins: Vec<JoinClause>,
    pub selection: Option<SqlExpr>,
    pub group_by: Vec<SqlExpr>,
    pub order_by: Vec<OrderExpr>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone)]
pub(crate) enum SqlQuery {
    Select(SelectStmt),
    /// `UNION ALL` chain; every branch projects the same column list.
    Union(Vec<SelectStmt>),
}

pub(crate) fn write_query(query: &SqlQuery, dialect: Dialect, out: &mut String) {
    match query {
        SqlQuery::Select(stmt) => write_select(stmt, dialect, out),
        SqlQuery::Union(branches) => {
            for (i, branch) in branches.iter().enumerate() {
                if i > 0 {
                    out.push_str(" UNION ALL ");
                }
                write_select(branch, dialect, out);
            }
        }
    }
}

fn write_select(stmt: &SelectStmt, dialect: Dialect, out: &mut String) {
    out.push_str("SELECT ");
    for (i, (label, expr)) in stmt.projection.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_expr(expr, dialect, out);
        let implied = matches!(expr, SqlExpr::Column { name, .. } if name == label);
        if !implied {
            out.push_str(" AS ");
            dialect.quote_ident(label.as_str(), out);
        }
    }
    if let Some(from) = &stmt.from {
        out.push_str(" FROM ");
        write_table_ref(from, dialect, out);
    }
    for join in &stmt.joins {
        out.push_str(match join.kind {
            JoinKind::Inner => " JOIN ",
            JoinKind::Left => " LEFT JOIN ",
            JoinKind::Right => " RIGHT JOIN ",
            JoinKind::Full => " FULL JOIN ",
        });
        write_table_ref(&join.table, dialect, out);
        out.push_str(" ON ");
        write_expr(&join.on, dialect, out);
    }
    if let Some(selection) = &stmt.selection {
        out.push_str(" WHERE ");
        write_expr(selection, dialect, out);
    }
    if !stmt.group_by.is_empty() {
        out.push_str(" GROUP BY ");
        for (i, key) in stmt.group_by.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            write_expr(key, dialect, out);
        }
    }
    if !stmt.order_by.is_empty() {
        out.push_str(" ORDER BY ");
        for (i, key) in stmt.order_by.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            write_order(key, dialect, out);
        }
    }
    write_limit(stmt, dialect, out);
}

fn write_limit(stmt: &SelectStmt, dialect: Dialect, out: &mut String) {
    if stmt.limit.is_none() && stmt.offset.is_none() {
        return;
    }
    match dialect {
        Dialect::Sqlserver => {
            // OFFSET/FETCH needs an ORDER BY to attach to.
            if stmt.order_by.is_empty() {
                out.push_str(" ORDER BY (SELECT NULL)");
            }
            out.push_str(&format!(" OFFSET {} ROWS", stmt.offset.unwrap_or(0)));
            if let Some(limit) = stmt.limit {
                out.push_str(&format!(" FETCH NEXT {limit} ROWS ONLY"));
            }
        }
        _ => match (stmt.limit, stmt.offset) {
            (Some(limit), Some(offset)) => {
                out.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
            }
            (Some(limit), None) => out.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => match dialect {
                Dialect::Postgres => out.push_str(&format!(" OFFSET {offset}")),
                Dialect::Sqlite => out.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
                // MySQL has no bare OFFSET; the documented idiom is an
                // effectively unbounded limit.
                Dialect::Mysql => {
                    out.push_str(&format!(" LIMIT 18446744073709551615 OFFSET {offset}"));
                }
                Dialect::Sqlserver => unreachable!("handled above"),
            },
            (None, None) => unreachable!("guarded above"),
        },
    }
}

fn write_table_ref(table: &TableRef, dialect: Dialect, out: &mut String) {
    match table {
        TableRef::Table { name, alias } => {
            dialect.quote_ident(name.as_str(), out);
            if let Some(alias) = alias {
                out.push_str(" AS ");
                dialect.quote_ident(alias.as_str(), out);
            }
        }
        TableRef::Subquery {
            query,
            alias,
            lateral,
        } => {
            if *lateral {
                out.push_str("LATERAL ");
            }
            out.push('(');
            write_query(query, dialect, out);
            out.push_str(") AS ");
            dialect.quote_ident(alias.as_str(), out);
        }
    }
}

fn write_order(key: &OrderExpr, dialect: Dialect, out: &mut String) {
    write_expr(&key.expr, dialect, out);
    match key.dir {
        Some(SortDir::Asc) => out.push_str(" ASC"),
        Some(SortDir::Desc) => out.push_str(" DESC"),
        None => {}
    }
    if dialect.supports_nulls_order() {
        match key.nulls {
            Some(NullsOrder::NullsFirst) => out.push_str(" NULLS FIRST"),
            Some(NullsOrder::NullsLast) => out.push_str(" NULLS LAST"),
            None => {}
        }
    }
}

/// True for forms that need parentheses when used as an operand.
fn is_compound(expr: &SqlExpr) -> bool {
    matches!(
        expr,
        SqlExpr::Unary { .. }
            | SqlExpr::Binary { .. }
            | SqlExpr::Postfix { .. }
            | SqlExpr::InList { .. }
            | SqlExpr::Between { .. }
    )
}

fn write_operand(expr: &SqlExpr, dialect: Dialect, out: &mut String) {
    if is_compound(expr) {
        out.push('(');
        write_expr(expr, dialect, out);
        out.push(')');
    } else {
        write_expr(expr, dialect, out);
    }
}

/// Alphabetic operator names (`and`, `like`, …) are spelled upper-case.
fn operator_text(op: &str) -> String {
    if op.chars().all(|c| c.is_ascii_alphabetic() || c == '_') {
        op.to_uppercase().replace('_', " ")
    } else {
        op.to_string()
    }
}

pub(crate) fn write_expr(expr: &SqlExpr, dialect: Dialect, out: &mut String) {
    match expr {
        SqlExpr::Column { table, name } => {
            if let Some(table) = table {
                dialect.quote_ident(table.as_str(), out);
                out.push('.');
            }
            dialect.quote_ident(name.as_str(), out);
        }
        SqlExpr::Literal(value) => write_literal(value, dialect, out),
        SqlExpr::Placeholder(text) => out.push_str(text),
        SqlExpr::Unary { op, expr } => {
            out.push_str(op);
            out.push(' ');
            write_operand(expr, dialect, out);
        }
        SqlExpr::Binary { op, lhs, rhs } => {
            write_operand(lhs, dialect, out);
            out.push(' ');
            out.push_str(&operator_text(op));
            out.push(' ');
            write_operand(rhs, dialect, out);
        }
        SqlExpr::Postfix { op, expr } => {
            write_operand(expr, dialect, out);
            out.push(' ');
            out.push_str(op);
        }
        SqlExpr::InList {
            expr,
            list,
            negated,
        } => {
            write_operand(expr, dialect, out);
            out.push_str(if *negated { " NOT IN (" } else { " IN (" });
            for (i, item) in list.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_expr(item, dialect, out);
            }
            out.push(')');
        }
        SqlExpr::Between {
            expr,
            low,
            high,
            negated,
        } => {
            write_operand(expr, dialect, out);
            out.push_str(if *negated {
                " NOT BETWEEN "
            } else {
                " BETWEEN "
            });
            write_operand(low, dialect, out);
            out.push_str(" AND ");
            write_operand(high, dialect, out);
        }
        SqlExpr::Case { when, then } => {
            out.push_str("CASE WHEN ");
            write_expr(when, dialect, out);
            out.push_str(" THEN ");
            write_expr(then, dialect, out);
            out.push_str(" END");
        }
        SqlExpr::Call { name, args } => {
            out.push_str(&name.as_str().to_uppercase());
            out.push('(');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_expr(arg, dialect, out);
            }
            out.push(')');
        }
        SqlExpr::Aggregate {
            name,
            args,
            filter,
            window,
        } => {
            out.push_str(&name.as_str().to_uppercase());
            out.push('(');
            if args.is_empty() {
                out.push('*');
            } else {
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    write_expr(arg, dialect, out);
                }
            }
            out.push(')');
            if let Some(filter) = filter {
                out.push_str(" FILTER (WHERE ");
                write_expr(filter, dialect, out);
                out.push(')');
            }
            if let Some(window) = window {
                write_window(window, dialect, out);
            }
        }
        SqlExpr::Subquery(query) => {
            out.push('(');
            write_query(query, dialect, out);
            out.push(')');
        }
    }
}

fn write_window(window: &Window, dialect: Dialect, out: &mut String) {
    out.push_str(" OVER (");
    let mut need_space = false;
    if !window.partition_by.is_empty() {
        out.push_str("PARTITION BY ");
        for (i, key) in window.partition_by.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            write_expr(key, dialect, out);
        }
        need_space = true;
    }
    if !window.order_by.is_empty() {
        if need_space {
            out.push(' ');
        }
        out.push_str("ORDER BY ");
        for (i, key) in window.order_by.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            write_order(key, dialect, out);
        }
    }
    out.push(')');
}

fn write_literal(value: &Value, dialect: Dialect, out: &mut String) {
    match value {
        Value::Null => out.push_str("NULL"),
        Value::Bool(b) => out.push_str(dialect.bool_literal(*b)),
        Value::Int(v) => out.push_str(&v.to_string()),
        Value::Float(v) => out.push_str(&v.to_string()),
        Value::Text(s) => {
            out.push('\'');
            for ch in s.chars() {
                if ch == '\'' {
                    out.push('\'');
                }
                out.push(ch);
            }
            out.push('\'');
        }
    }
}
