//! The surface operator tree.
//!
//! A query is a composition of tabular operators (`From`, `Where`, `Select`,
//! `Join`, …) over scalar operators (`Get`, `Fun`, `Agg`, …). Nodes are
//! immutable and shared: [`SqlNode`] is a cheap handle, and cloning it
//! yields the *same* node. Node identity (not structure) is what the
//! compiler keys handle allocation and error tracebacks on, so a subquery
//! stored in a variable and spliced into two places is one node appearing
//! at two positions.
//!
//! Constructors perform no validation; the compiler reports ill-formed
//! shapes with a traceback of the offending position.

use crate::catalog::Table;
use crate::types::Symbol;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// A shared handle to one operator node.
#[derive(Clone)]
pub struct SqlNode {
    kind: Rc<NodeKind>,
}

/// Identity of a node handle; two clones of the same [`SqlNode`] share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(usize);

/// A literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Sort direction for `Order` and window ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

/// Explicit placement of NULLs in a sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsOrder {
    NullsFirst,
    NullsLast,
}

/// The operator alphabet. Tabular variants produce rows; scalar variants
/// produce values or predicates.
pub(crate) enum NodeKind {
    // Tabular operators.
    From {
        table: Arc<Table>,
    },
    Select {
        over: Option<SqlNode>,
        args: Vec<SqlNode>,
    },
    Where {
        over: Option<SqlNode>,
        condition: SqlNode,
    },
    Join {
        over: Option<SqlNode>,
        joinee: SqlNode,
        on: SqlNode,
        left: bool,
        right: bool,
    },
    Group {
        over: Option<SqlNode>,
        by: Vec<SqlNode>,
    },
    Partition {
        over: Option<SqlNode>,
        by: Vec<SqlNode>,
        order_by: Vec<SqlNode>,
    },
    Append {
        over: Option<SqlNode>,
        list: Vec<SqlNode>,
    },
    As {
        over: Option<SqlNode>,
        name: Symbol,
    },
    Define {
        over: Option<SqlNode>,
        args: Vec<SqlNode>,
    },
    Order {
        over: Option<SqlNode>,
        by: Vec<SqlNode>,
    },
    Limit {
        over: Option<SqlNode>,
        limit: Option<u64>,
        offset: Option<u64>,
    },
    Highlight {
        over: Option<SqlNode>,
        color: Symbol,
    },
    Bind {
        over: Option<SqlNode>,
        args: Vec<SqlNode>,
    },
    // Scalar operators.
    Get {
        over: Option<SqlNode>,
        name: Symbol,
    },
    Fun {
        name: Symbol,
        args: Vec<SqlNode>,
    },
    Agg {
        name: Symbol,
        args: Vec<SqlNode>,
        filter: Option<SqlNode>,
        over: Option<SqlNode>,
    },
    Lit {
        value: Value,
    },
    Var {
        name: Symbol,
    },
    Sort {
        over: SqlNode,
        dir: SortDir,
        nulls: Option<NullsOrder>,
    },
}

impl SqlNode {
    fn new(kind: NodeKind) -> Self {
        SqlNode {
            kind: Rc::new(kind),
        }
    }

    pub(crate) fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub(crate) fn id(&self) -> NodeId {
        NodeId(Rc::as_ptr(&self.kind) as usize)
    }

    pub(crate) fn is_tabular(&self) -> bool {
        matches!(
            self.kind(),
            NodeKind::From { .. }
                | NodeKind::Select { .. }
                | NodeKind::Where { .. }
                | NodeKind::Join { .. }
                | NodeKind::Group { .. }
                | NodeKind::Partition { .. }
                | NodeKind::Append { .. }
                | NodeKind::As { .. }
                | NodeKind::Define { .. }
                | NodeKind::Order { .. }
                | NodeKind::Limit { .. }
                | NodeKind::Highlight { .. }
                | NodeKind::Bind { .. }
        )
    }

    // Pipeline constructors. Each consumes the receiver and makes it the
    // input of the new operator; clone first to keep using the receiver.

    /// Projects the given scalar expressions, cutting the outer scope.
    pub fn select(self, args: Vec<SqlNode>) -> SqlNode {
        SqlNode::new(NodeKind::Select {
            over: Some(self),
            args,
        })
    }

    /// Filters rows by a boolean expression.
    pub fn filter(self, condition: SqlNode) -> SqlNode {
        SqlNode::new(NodeKind::Where {
            over: Some(self),
            condition,
        })
    }

    /// Inner join against `joinee` on the given condition.
    pub fn join(self, joinee: SqlNode, on: SqlNode) -> SqlNode {
        self.join_with(joinee, on, false, false)
    }

    /// Left outer join against `joinee`.
    pub fn left_join(self, joinee: SqlNode, on: SqlNode) -> SqlNode {
        self.join_with(joinee, on, true, false)
    }

    /// Join with explicit outer flags (`left` and `right` together make a
    /// full outer join).
    pub fn join_with(self, joinee: SqlNode, on: SqlNode, left: bool, right: bool) -> SqlNode {
        SqlNode::new(NodeKind::Join {
            over: Some(self),
            joinee,
            on,
            left,
            right,
        })
    }

    /// Groups rows by the given keys; aggregates become available upstream.
    pub fn group(self, by: Vec<SqlNode>) -> SqlNode {
        SqlNode::new(NodeKind::Group {
            over: Some(self),
            by,
        })
    }

    /// Windowed grouping: keeps the input rows and makes aggregates
    /// available over the given partition.
    pub fn partition(self, by: Vec<SqlNode>) -> SqlNode {
        self.partition_with(by, Vec::new())
    }

    /// Windowed grouping with an explicit window ordering.
    pub fn partition_with(self, by: Vec<SqlNode>, order_by: Vec<SqlNode>) -> SqlNode {
        SqlNode::new(NodeKind::Partition {
            over: Some(self),
            by,
            order_by,
        })
    }

    /// Concatenates the rows of this query and all queries in `list`.
    pub fn append(self, list: Vec<SqlNode>) -> SqlNode {
        SqlNode::new(NodeKind::Append {
            over: Some(self),
            list,
        })
    }

    /// Wraps the output row in a single named namespace (also usable on a
    /// scalar argument to label it).
    pub fn alias(self, name: impl Into<Symbol>) -> SqlNode {
        SqlNode::new(NodeKind::As {
            over: Some(self),
            name: name.into(),
        })
    }

    /// Adds (or replaces) calculated columns without cutting the scope.
    pub fn define(self, args: Vec<SqlNode>) -> SqlNode {
        SqlNode::new(NodeKind::Define {
            over: Some(self),
            args,
        })
    }

    /// Orders the output rows.
    pub fn order_by(self, by: Vec<SqlNode>) -> SqlNode {
        SqlNode::new(NodeKind::Order {
            over: Some(self),
            by,
        })
    }

    /// Truncates the output to `limit` rows.
    pub fn limit(self, limit: u64) -> SqlNode {
        SqlNode::new(NodeKind::Limit {
            over: Some(self),
            limit: Some(limit),
            offset: None,
        })
    }

    /// Skips `offset` rows, then keeps `limit` rows.
    pub fn limit_offset(self, limit: u64, offset: u64) -> SqlNode {
        SqlNode::new(NodeKind::Limit {
            over: Some(self),
            limit: Some(limit),
            offset: Some(offset),
        })
    }

    /// Marks this subtree for diagnostic highlighting; no effect on the
    /// compiled query.
    pub fn highlight(self, color: impl Into<Symbol>) -> SqlNode {
        SqlNode::new(NodeKind::Highlight {
            over: Some(self),
            color: color.into(),
        })
    }

    /// Binds the labeled expressions to the free variables of this query,
    /// evaluating them in the enclosing scope (correlated subqueries).
    pub fn bind(self, args: Vec<SqlNode>) -> SqlNode {
        SqlNode::new(NodeKind::Bind {
            over: Some(self),
            args,
        })
    }

    /// Navigates into a field of this node: a nested namespace on a scalar
    /// chain, or a column of a tabular node addressed by identity.
    pub fn get(self, name: impl Into<Symbol>) -> SqlNode {
        SqlNode::new(NodeKind::Get {
            over: Some(self),
            name: name.into(),
        })
    }

    /// Ascending sort key.
    pub fn asc(self) -> SqlNode {
        self.sort(SortDir::Asc, None)
    }

    /// Descending sort key.
    pub fn desc(self) -> SqlNode {
        self.sort(SortDir::Desc, None)
    }

    /// Sort key with explicit direction and NULL placement.
    pub fn sort(self, dir: SortDir, nulls: Option<NullsOrder>) -> SqlNode {
        SqlNode::new(NodeKind::Sort {
            over: self,
            dir,
            nulls,
        })
    }

    /// One-line summary used in error tracebacks.
    pub(crate) fn describe(&self) -> String {
        fn arg_list(args: &[SqlNode]) -> String {
            args.iter()
                .map(|a| a.short_label())
                .collect::<Vec<_>>()
                .join(", ")
        }
        match self.kind() {
            NodeKind::From { table } => format!("From({})", table.name),
            NodeKind::Select { args, .. } => format!("Select({})", arg_list(args)),
            NodeKind::Where { .. } => "Where(…)".to_string(),
            NodeKind::Join { .. } => "Join(…)".to_string(),
            NodeKind::Group { by, .. } => format!("Group({})", arg_list(by)),
            NodeKind::Partition { by, .. } => format!("Partition({})", arg_list(by)),
            NodeKind::Append { list, .. } => format!("Append(×{})", list.len() + 1),
            NodeKind::As { name, .. } => format!("As({name})"),
            NodeKind::Define { args, .. } => format!("Define({})", arg_list(args)),
            NodeKind::Order { by, .. } => format!("Order({})", arg_list(by)),
            NodeKind::Limit { limit, offset, .. } => match (limit, offset) {
                (Some(l), Some(o)) => format!("Limit({l}, offset {o})"),
                (Some(l), None) => format!("Limit({l})"),
                (None, Some(o)) => format!("Limit(offset {o})"),
                (None, None) => "Limit()".to_string(),
            },
            NodeKind::Highlight { color, .. } => format!("Highlight({color})"),
            NodeKind::Bind { args, .. } => format!("Bind({})", arg_list(args)),
            NodeKind::Get { .. } => self.short_label(),
            NodeKind::Fun { name, args } => format!("Fun({name}, {})", arg_list(args)),
            NodeKind::Agg { name, .. } => format!("Agg({name})"),
            NodeKind::Lit { value } => format!("Lit({value})"),
            NodeKind::Var { name } => format!("Var({name})"),
            NodeKind::Sort { dir, .. } => match dir {
                SortDir::Asc => "Asc(…)".to_string(),
                SortDir::Desc => "Desc(…)".to_string(),
            },
        }
    }

    /// Very short form used inside argument lists of [`Self::describe`].
    fn short_label(&self) -> String {
        match self.kind() {
            NodeKind::Get { over, name } => {
                let mut names = vec![name.as_str().to_string()];
                let mut node = over.as_ref();
                while let Some(n) = node {
                    match n.kind() {
                        NodeKind::Get { over, name } => {
                            names.push(name.as_str().to_string());
                            node = over.as_ref();
                        }
                        _ => {
                            names.push("…".to_string());
                            break;
                        }
                    }
                }
                names.reverse();
                format!("Get.{}", names.join("."))
            }
            NodeKind::Agg { name, .. } => format!("Agg({name})"),
            NodeKind::Fun { name, .. } => format!("Fun({name})"),
            NodeKind::Lit { value } => value.to_string(),
            NodeKind::Var { name } => format!("Var({name})"),
            NodeKind::As { name, .. } => format!("As({name})"),
            NodeKind::Sort { over, .. } => over.short_label(),
            _ => "…".to_string(),
        }
    }
}

impl fmt::Debug for SqlNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Leaf table reference.
pub fn from(table: impl Into<Arc<Table>>) -> SqlNode {
    SqlNode::new(NodeKind::From {
        table: table.into(),
    })
}

/// Projection with no input rows (`SELECT <exprs>` with an implicit unit
/// input).
pub fn select(args: Vec<SqlNode>) -> SqlNode {
    SqlNode::new(NodeKind::Select { over: None, args })
}

/// Column (or namespace) reference by name.
pub fn get(name: impl Into<Symbol>) -> SqlNode {
    SqlNode::new(NodeKind::Get {
        over: None,
        name: name.into(),
    })
}

/// Scalar function or operator application.
pub fn fun(name: impl Into<Symbol>, args: Vec<SqlNode>) -> SqlNode {
    SqlNode::new(NodeKind::Fun {
        name: name.into(),
        args,
    })
}

/// Aggregate application.
pub fn agg(name: impl Into<Symbol>, args: Vec<SqlNode>) -> SqlNode {
    aggregate(name, args, None, None)
}

/// Aggregate application with an optional `FILTER` condition and an
/// optional explicit grouping target (a `Group`/`Partition` node or a
/// navigation chain leading to one).
pub fn aggregate(
    name: impl Into<Symbol>,
    args: Vec<SqlNode>,
    filter: Option<SqlNode>,
    over: Option<SqlNode>,
) -> SqlNode {
    SqlNode::new(NodeKind::Agg {
        name: name.into(),
        args,
        filter,
        over,
    })
}

/// `COUNT(*)`.
pub fn count() -> SqlNode {
    agg("count", Vec::new())
}

/// Literal value.
pub fn lit(value: impl Into<Value>) -> SqlNode {
    SqlNode::new(NodeKind::Lit {
        value: value.into(),
    })
}

/// Query parameter; free occurrences become placeholders in the rendered
/// SQL, occurrences under a `Bind` are substituted.
pub fn var(name: impl Into<Symbol>) -> SqlNode {
    SqlNode::new(NodeKind::Var { name: name.into() })
}
