//! Lowers the linked tree into SQL syntax fragments.
//!
//! Each box chain is folded into an *assemblage*: a table source plus the
//! pending clauses and a scope that maps every demanded reference to the
//! expression producing it. Linear operators (`Where`, `Order`, `Limit`,
//! `Define`, `As`) merge into the open assemblage. `Select`, `Group`, and
//! `Partition` commit a projection; once committed, any further operator
//! wraps the assemblage into an aliased subquery. Joins flatten into join
//! clause lists, and `Append` renders aligned `UNION ALL` branches.

use super::sql::{
    JoinClause, JoinKind, OrderExpr, SelectStmt, SqlExpr, SqlQuery, TableRef, Window,
};
use crate::compiler::{AnnId, AnnKind, AnnotatedTree};
use crate::dialect::Dialect;
use crate::nodes::Value;
use crate::types::Symbol;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

/// Maps each demanded reference id to the expression that produces it in
/// the current FROM scope (or the committed output column it became).
type Scope = HashMap<AnnId, ScopeExpr>;

#[derive(Debug, Clone)]
enum ScopeExpr {
    Expr(SqlExpr),
    /// A committed projection label; renders as a bare output column and is
    /// only reachable from ORDER BY or through a collapse.
    Output(Symbol),
}

fn scope_sql(scope: &Scope, id: AnnId) -> SqlExpr {
    match scope.get(&id) {
        Some(ScopeExpr::Expr(expr)) => expr.clone(),
        Some(ScopeExpr::Output(label)) => SqlExpr::Column {
            table: None,
            name: label.clone(),
        },
        None => unreachable!("reference missing from the translation scope"),
    }
}

#[derive(Debug, Default)]
struct Assemblage {
    source: Option<TableRef>,
    joins: Vec<JoinClause>,
    selection: Option<SqlExpr>,
    group_by: Option<Vec<SqlExpr>>,
    order_by: Vec<OrderExpr>,
    limit: Option<u64>,
    offset: Option<u64>,
    projection: Option<Vec<(Symbol, SqlExpr)>>,
    scope: Scope,
    alias_hint: Option<Symbol>,
}

impl Assemblage {
    fn unit() -> Self {
        Assemblage::default()
    }

    fn committed(&self) -> bool {
        self.projection.is_some()
    }

    fn is_bare_table(&self) -> bool {
        matches!(self.source, Some(TableRef::Table { .. }))
            && self.joins.is_empty()
            && self.selection.is_none()
            && self.group_by.is_none()
            && self.order_by.is_empty()
            && self.limit.is_none()
            && self.offset.is_none()
            && self.projection.is_none()
    }
}

/// Deduplicating output-name allocator; collisions get numeric suffixes.
#[derive(Debug, Default)]
struct NameAllocator {
    used: HashMap<String, usize>,
}

impl NameAllocator {
    fn reserve(&mut self, name: &Symbol) {
        self.used.entry(name.to_string()).or_insert(1);
    }

    fn unique(&mut self, base: &Symbol) -> Symbol {
        let count = self.used.entry(base.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            base.clone()
        } else {
            Symbol::new(format!("{base}_{count}"))
        }
    }
}

fn and_expr(lhs: SqlExpr, rhs: SqlExpr) -> SqlExpr {
    SqlExpr::Binary {
        op: "and".to_string(),
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

fn ensure_projection(projection: &mut Vec<(Symbol, SqlExpr)>) {
    if projection.is_empty() {
        projection.push((Symbol::new("_"), SqlExpr::Literal(Value::Null)));
    }
}

const BINARY_OPS: &[&str] = &[
    "=", "<>", "!=", "<", "<=", ">", ">=", "+", "-", "*", "/", "%", "like", "ilike", "||", "and",
    "or",
];

pub(crate) fn translate(tree: &AnnotatedTree, dialect: Dialect) -> (SqlQuery, Vec<Symbol>) {
    let mut translator = Translator {
        tree,
        dialect,
        params: Vec::new(),
        alias_counts: HashMap::new(),
        bind_frames: Vec::new(),
        prerendered: HashMap::new(),
    };
    let root = tree.root();
    let assemblage = translator.assemble(root);
    let query = translator.finish(assemblage, root);
    (query, translator.params)
}

struct Translator<'a> {
    tree: &'a AnnotatedTree,
    dialect: Dialect,
    /// Unbound variables in first-use order; positions feed placeholders.
    params: Vec<Symbol>,
    alias_counts: HashMap<String, usize>,
    /// Stack of bind frames mapping variable names to substituted
    /// expressions.
    bind_frames: Vec<HashMap<Symbol, SqlExpr>>,
    /// Frames rendered against an enclosing scope, waiting for their bind
    /// node to be assembled.
    prerendered: HashMap<AnnId, HashMap<Symbol, SqlExpr>>,
}

impl<'a> Translator<'a> {
    fn unique_alias(&mut self, base: &Symbol) -> Symbol {
        let count = self.alias_counts.entry(base.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            base.clone()
        } else {
            Symbol::new(format!("{base}_{count}"))
        }
    }

    /// Strips label and highlight wrappers off a scalar argument.
    fn peel(&self, mut id: AnnId) -> AnnId {
        loop {
            match self.tree.kind(id) {
                AnnKind::As { over, .. } | AnnKind::Highlight { over } => id = *over,
                _ => return id,
            }
        }
    }

    /// The column name a reference chain bottoms out in.
    fn leaf_column(&self, mut id: AnnId) -> Symbol {
        loop {
            match self.tree.kind(id) {
                AnnKind::Get { name } | AnnKind::Agg { name, .. } => return name.clone(),
                AnnKind::NameBound { over, .. } | AnnKind::HandleBound { over, .. } => {
                    id = *over;
                }
                other => unreachable!("reference without a column terminal: {other:?}"),
            }
        }
    }

    /// Structural key of a reference chain, for sharing one exported column
    /// between equivalent references. Aggregates keep per-node identity.
    fn ref_shape(&self, id: AnnId) -> Option<String> {
        match self.tree.kind(id) {
            AnnKind::Get { name } => Some(name.to_string()),
            AnnKind::NameBound { over, name } => {
                self.ref_shape(*over).map(|tail| format!("{name}.{tail}"))
            }
            AnnKind::HandleBound { over, handle } => {
                self.ref_shape(*over).map(|tail| format!("#{handle}.{tail}"))
            }
            AnnKind::Agg { .. } => None,
            other => unreachable!("reference shape of {other:?}"),
        }
    }

    fn assemble(&mut self, box_id: AnnId) -> Assemblage {
        let Some(op) = self.tree.box_over(box_id) else {
            return Assemblage::unit();
        };
        let kind = self.tree.kind(op).clone();
        let mut a = match kind {
            AnnKind::From { table } => self.assemble_from(box_id, &table.name),
            AnnKind::Where { over, condition } => {
                let mut a = self.assemble(over);
                if a.committed()
                    || a.limit.is_some()
                    || a.offset.is_some()
                    || !a.order_by.is_empty()
                {
                    a = self.collapse_into(a, over);
                }
                let cond = self.render_scalar(condition, &a.scope);
                a.selection = Some(match a.selection.take() {
                    Some(prev) => and_expr(prev, cond),
                    None => cond,
                });
                a
            }
            AnnKind::Order { over, by } => {
                let mut a = self.assemble(over);
                if a.limit.is_some() || a.offset.is_some() {
                    a = self.collapse_into(a, over);
                }
                for key in by {
                    let item = self.render_order(key, &a.scope);
                    a.order_by.push(item);
                }
                a
            }
            AnnKind::Limit {
                over,
                limit,
                offset,
            } => {
                let mut a = self.assemble(over);
                if a.limit.is_some() || a.offset.is_some() {
                    a = self.collapse_into(a, over);
                }
                a.limit = limit;
                a.offset = offset;
                a
            }
            AnnKind::Select { over, args } => self.assemble_select(box_id, over, &args),
            AnnKind::Group { over, by } => self.assemble_group(box_id, over, &by),
            AnnKind::Partition { over, by, order_by } => {
                self.assemble_partition(box_id, over, &by, &order_by)
            }
            AnnKind::ExtendedJoin {
                over,
                joinee,
                on,
                left,
                right,
                lateral,
                ..
            } => self.assemble_join(over, joinee, on, left, right, !lateral.is_empty()),
            AnnKind::Append { over, list } => self.assemble_append(box_id, over, &list),
            AnnKind::As { over, name } => {
                let mut a = self.assemble(over);
                a.alias_hint = Some(name);
                for r in self.tree.box_refs(box_id).to_vec() {
                    if a.scope.contains_key(&r) {
                        continue;
                    }
                    let eff = self.tree.translate_ref(box_id, r);
                    if let AnnKind::NameBound { over: inner, .. } = self.tree.kind(eff) {
                        if let Some(entry) = a.scope.get(inner).cloned() {
                            a.scope.insert(r, entry);
                        }
                    }
                }
                a
            }
            AnnKind::Define { over, args } => {
                let mut a = self.assemble(over);
                if a.committed() {
                    a = self.collapse_into(a, over);
                }
                let mut label_map: IndexMap<Symbol, AnnId> = IndexMap::new();
                for &arg in &args {
                    label_map.insert(self.tree.ann_label(arg), arg);
                }
                for r in self.tree.box_refs(box_id).to_vec() {
                    if a.scope.contains_key(&r) {
                        continue;
                    }
                    let eff = self.tree.translate_ref(box_id, r);
                    if let AnnKind::Get { name } = self.tree.kind(eff) {
                        if let Some(&expr_id) = label_map.get(name.as_str()) {
                            let expr = self.render_scalar(expr_id, &a.scope);
                            a.scope.insert(r, ScopeExpr::Expr(expr));
                        }
                    }
                }
                a
            }
            AnnKind::Highlight { over } => self.assemble(over),
            AnnKind::ExtendedBind { over, args, .. } => {
                let frame = match self.prerendered.remove(&op) {
                    Some(frame) => frame,
                    None => {
                        // A bind with no enclosing query: the bindings were
                        // checked to be closed, so an empty scope suffices.
                        let empty = Scope::new();
                        self.render_bind_args(&args, &empty)
                    }
                };
                self.bind_frames.push(frame);
                let a = self.assemble(over);
                self.bind_frames.pop();
                a
            }
            other => unreachable!("assemble on non-tabular node {other:?}"),
        };
        // Cover stored refs whose handle this box consumed.
        for r in self.tree.box_refs(box_id).to_vec() {
            let eff = self.tree.translate_ref(box_id, r);
            if eff != r && !a.scope.contains_key(&r) {
                if let Some(entry) = a.scope.get(&eff).cloned() {
                    a.scope.insert(r, entry);
                }
            }
        }
        a
    }

    fn assemble_from(&mut self, box_id: AnnId, table_name: &Symbol) -> Assemblage {
        let alias = self.unique_alias(table_name);
        let mut a = Assemblage::unit();
        a.source = Some(TableRef::Table {
            name: table_name.clone(),
            alias: if alias == *table_name {
                None
            } else {
                Some(alias.clone())
            },
        });
        for r in self.tree.box_refs(box_id).to_vec() {
            if a.scope.contains_key(&r) {
                continue;
            }
            let eff = self.tree.translate_ref(box_id, r);
            let name = self.leaf_column(eff);
            a.scope.insert(
                r,
                ScopeExpr::Expr(SqlExpr::Column {
                    table: Some(alias.clone()),
                    name,
                }),
            );
        }
        a
    }

    fn assemble_select(&mut self, box_id: AnnId, over: AnnId, args: &[AnnId]) -> Assemblage {
        let mut a = self.assemble(over);
        if let Some(committed) = &a.projection {
            // A projection that merely subsets, reorders, or relabels the
            // committed outputs rewrites them in place instead of nesting.
            let mut rewritten = Vec::with_capacity(args.len());
            let mut foldable = true;
            for &arg in args {
                let terminal = self.peel(arg);
                let expr = match a.scope.get(&terminal) {
                    Some(ScopeExpr::Output(label)) => committed
                        .iter()
                        .find(|(committed_label, _)| committed_label == label)
                        .map(|(_, expr)| expr.clone()),
                    _ => None,
                };
                match expr {
                    Some(expr) => rewritten.push((self.tree.ann_label(arg), expr)),
                    None => {
                        foldable = false;
                        break;
                    }
                }
            }
            if foldable {
                a.projection = Some(rewritten);
            } else {
                a = self.collapse_into(a, over);
            }
        }
        if !a.committed() {
            let mut projection = Vec::new();
            for &arg in args {
                let label = self.tree.ann_label(arg);
                let expr = self.render_scalar(arg, &a.scope);
                projection.push((label, expr));
            }
            a.projection = Some(projection);
        }
        a.scope = Scope::new();
        for r in self.tree.box_refs(box_id).to_vec() {
            if a.scope.contains_key(&r) {
                continue;
            }
            let eff = self.tree.translate_ref(box_id, r);
            let label = self.leaf_column(eff);
            a.scope.insert(r, ScopeExpr::Output(label));
        }
        a
    }

    fn assemble_group(&mut self, box_id: AnnId, over: AnnId, by: &[AnnId]) -> Assemblage {
        let mut a = self.assemble(over);
        if a.committed() || a.limit.is_some() || a.offset.is_some() || !a.order_by.is_empty() {
            a = self.collapse_into(a, over);
        }
        let mut keys: Vec<(Symbol, SqlExpr)> = Vec::new();
        for &key in by {
            let label = self.tree.ann_label(key);
            let expr = self.render_scalar(key, &a.scope);
            keys.push((label, expr));
        }
        a.group_by = Some(keys.iter().map(|(_, expr)| expr.clone()).collect());

        let mut names = NameAllocator::default();
        for (label, _) in &keys {
            names.reserve(label);
        }
        let mut projection: Vec<(Symbol, SqlExpr)> = Vec::new();
        let mut scope = Scope::new();
        for r in self.tree.box_refs(box_id).to_vec() {
            if scope.contains_key(&r) {
                continue;
            }
            let eff = self.tree.translate_ref(box_id, r);
            match self.tree.kind(eff) {
                AnnKind::Get { name } => {
                    let name = name.clone();
                    if !projection.iter().any(|(label, _)| *label == name) {
                        let expr = keys
                            .iter()
                            .find(|(label, _)| *label == name)
                            .map(|(_, expr)| expr.clone())
                            .unwrap_or_else(|| {
                                unreachable!("group reference `{name}` has no matching key")
                            });
                        projection.push((name.clone(), expr));
                    }
                    scope.insert(r, ScopeExpr::Output(name));
                }
                AnnKind::Agg { .. } => {
                    let expr = self.render_aggregate(eff, &a.scope, None);
                    let label = names.unique(&self.tree.ann_label(eff));
                    projection.push((label.clone(), expr));
                    scope.insert(r, ScopeExpr::Output(label));
                }
                other => unreachable!("unexpected group reference {other:?}"),
            }
        }
        a.projection = Some(projection);
        a.scope = scope;
        a
    }

    fn assemble_partition(
        &mut self,
        box_id: AnnId,
        over: AnnId,
        by: &[AnnId],
        order_by: &[AnnId],
    ) -> Assemblage {
        let mut a = self.assemble(over);
        if a.committed() || a.limit.is_some() || a.offset.is_some() || !a.order_by.is_empty() {
            a = self.collapse_into(a, over);
        }
        let window = Window {
            partition_by: by
                .iter()
                .map(|&key| self.render_scalar(key, &a.scope))
                .collect(),
            order_by: order_by
                .iter()
                .map(|&key| self.render_order(key, &a.scope))
                .collect(),
        };
        let mut names = NameAllocator::default();
        let mut by_shape: HashMap<String, Symbol> = HashMap::new();
        let mut projection: Vec<(Symbol, SqlExpr)> = Vec::new();
        let mut scope = Scope::new();
        for r in self.tree.box_refs(box_id).to_vec() {
            if scope.contains_key(&r) {
                continue;
            }
            let eff = self.tree.translate_ref(box_id, r);
            match self.tree.kind(eff) {
                AnnKind::Agg { .. } => {
                    let expr = self.render_aggregate(eff, &a.scope, Some(window.clone()));
                    let label = names.unique(&self.tree.ann_label(eff));
                    projection.push((label.clone(), expr));
                    scope.insert(r, ScopeExpr::Output(label));
                }
                // Anything else passed through the partition unchanged.
                _ => {
                    let shape = self.ref_shape(eff);
                    let label = match shape.as_ref().and_then(|s| by_shape.get(s)).cloned() {
                        Some(existing) => existing,
                        None => {
                            let label = names.unique(&self.leaf_column(eff));
                            if let Some(shape) = shape {
                                by_shape.insert(shape, label.clone());
                            }
                            projection.push((label.clone(), scope_sql(&a.scope, eff)));
                            label
                        }
                    };
                    scope.insert(r, ScopeExpr::Output(label));
                }
            }
        }
        a.projection = Some(projection);
        a.scope = scope;
        a
    }

    fn assemble_join(
        &mut self,
        over: AnnId,
        joinee: AnnId,
        on: AnnId,
        left: bool,
        right: bool,
        lateral: bool,
    ) -> Assemblage {
        let mut a = self.assemble(over);
        if a.committed()
            || a.selection.is_some()
            || a.limit.is_some()
            || a.offset.is_some()
            || !a.order_by.is_empty()
        {
            a = self.collapse_into(a, over);
        }
        self.stage_bind_frames(joinee, &a.scope);
        let (table, right_scope) = self.as_table_ref(joinee, lateral);
        a.scope.extend(right_scope);
        let on = self.render_scalar(on, &a.scope);
        let kind = match (left, right) {
            (false, false) => JoinKind::Inner,
            (true, false) => JoinKind::Left,
            (false, true) => JoinKind::Right,
            (true, true) => JoinKind::Full,
        };
        a.joins.push(JoinClause { table, on, kind });
        a
    }

    fn assemble_append(&mut self, box_id: AnnId, over: AnnId, list: &[AnnId]) -> Assemblage {
        let refs = self.tree.box_refs(box_id).to_vec();
        let mut names = NameAllocator::default();
        let mut by_shape: HashMap<String, Symbol> = HashMap::new();
        let mut exports: Vec<(AnnId, Symbol)> = Vec::new();
        let mut name_of: HashMap<AnnId, Symbol> = HashMap::new();
        for &r in &refs {
            if name_of.contains_key(&r) {
                continue;
            }
            let eff = self.tree.translate_ref(box_id, r);
            let shape = self.ref_shape(eff);
            let label = match shape.as_ref().and_then(|s| by_shape.get(s)).cloned() {
                Some(existing) => existing,
                None => {
                    let label = names.unique(&self.leaf_column(eff));
                    if let Some(shape) = shape {
                        by_shape.insert(shape, label.clone());
                    }
                    exports.push((r, label.clone()));
                    label
                }
            };
            name_of.insert(r, label);
        }

        let mut branches = Vec::new();
        for branch in std::iter::once(over).chain(list.iter().copied()) {
            branches.push(self.branch_stmt(branch, &exports));
        }

        let alias_base = self.tree.box_type(box_id).name.clone();
        let alias = self.unique_alias(&alias_base);
        let mut a = Assemblage::unit();
        for (r, label) in name_of {
            a.scope.insert(
                r,
                ScopeExpr::Expr(SqlExpr::Column {
                    table: Some(alias.clone()),
                    name: label,
                }),
            );
        }
        a.source = Some(TableRef::Subquery {
            query: Box::new(SqlQuery::Union(branches)),
            alias,
            lateral: false,
        });
        a
    }

    /// One aligned `UNION ALL` branch: the shared export list selected from
    /// the branch relation.
    fn branch_stmt(&mut self, branch: AnnId, exports: &[(AnnId, Symbol)]) -> SelectStmt {
        let (table, scope) = self.as_table_ref(branch, false);
        let mut projection = Vec::new();
        for (r, label) in exports {
            projection.push((label.clone(), scope_sql(&scope, *r)));
        }
        ensure_projection(&mut projection);
        SelectStmt {
            projection,
            from: Some(table),
            joins: Vec::new(),
            selection: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Renders a box as something a FROM clause can hold: a bare table when
    /// nothing else accumulated, otherwise an aliased subquery.
    fn as_table_ref(&mut self, box_id: AnnId, lateral: bool) -> (TableRef, Scope) {
        let a = self.assemble(box_id);
        if a.is_bare_table() {
            let Assemblage { source, scope, .. } = a;
            match source {
                Some(table) => (table, scope),
                None => unreachable!("bare table without a source"),
            }
        } else {
            self.collapse(a, box_id, lateral)
        }
    }

    fn collapse_into(&mut self, a: Assemblage, box_id: AnnId) -> Assemblage {
        let (table, scope) = self.collapse(a, box_id, false);
        let mut out = Assemblage::unit();
        out.source = Some(table);
        out.scope = scope;
        out
    }

    /// Wraps an assemblage into an aliased subquery exporting exactly the
    /// columns the box's refs demand.
    fn collapse(&mut self, a: Assemblage, box_id: AnnId, lateral: bool) -> (TableRef, Scope) {
        let Assemblage {
            source,
            joins,
            selection,
            group_by,
            order_by,
            limit,
            offset,
            projection,
            scope: child_scope,
            alias_hint,
        } = a;
        let alias_base = alias_hint.unwrap_or_else(|| self.tree.box_type(box_id).name.clone());
        let alias = self.unique_alias(&alias_base);
        let refs = self.tree.box_refs(box_id).to_vec();
        let mut scope = Scope::new();
        let mut stmt_projection = match projection {
            Some(committed) => {
                for r in &refs {
                    if scope.contains_key(r) {
                        continue;
                    }
                    let label = match child_scope.get(r) {
                        Some(ScopeExpr::Output(label)) => label.clone(),
                        other => unreachable!("committed scope without a label: {other:?}"),
                    };
                    scope.insert(
                        *r,
                        ScopeExpr::Expr(SqlExpr::Column {
                            table: Some(alias.clone()),
                            name: label,
                        }),
                    );
                }
                committed
            }
            None => {
                let mut names = NameAllocator::default();
                let mut by_shape: HashMap<String, Symbol> = HashMap::new();
                let mut projection: Vec<(Symbol, SqlExpr)> = Vec::new();
                for r in &refs {
                    if scope.contains_key(r) {
                        continue;
                    }
                    let eff = self.tree.translate_ref(box_id, *r);
                    let shape = self.ref_shape(eff);
                    let label = match shape.as_ref().and_then(|s| by_shape.get(s)).cloned() {
                        Some(existing) => existing,
                        None => {
                            let label = names.unique(&self.leaf_column(eff));
                            if let Some(shape) = shape {
                                by_shape.insert(shape, label.clone());
                            }
                            projection.push((label.clone(), scope_sql(&child_scope, *r)));
                            label
                        }
                    };
                    scope.insert(
                        *r,
                        ScopeExpr::Expr(SqlExpr::Column {
                            table: Some(alias.clone()),
                            name: label,
                        }),
                    );
                }
                projection
            }
        };
        ensure_projection(&mut stmt_projection);
        let stmt = SelectStmt {
            projection: stmt_projection,
            from: source,
            joins,
            selection,
            group_by: group_by.unwrap_or_default(),
            order_by,
            limit,
            offset,
        };
        (
            TableRef::Subquery {
                query: Box::new(SqlQuery::Select(stmt)),
                alias,
                lateral,
            },
            scope,
        )
    }

    /// Produces the final query for a box: the committed projection, or a
    /// projection derived from its demanded refs.
    fn finish(&mut self, a: Assemblage, box_id: AnnId) -> SqlQuery {
        let Assemblage {
            source,
            joins,
            selection,
            group_by,
            order_by,
            limit,
            offset,
            projection,
            scope,
            ..
        } = a;
        let mut stmt_projection = match projection {
            Some(committed) => committed,
            None => {
                let refs = self.tree.box_refs(box_id).to_vec();
                let mut names = NameAllocator::default();
                let mut by_shape: HashSet<String> = HashSet::new();
                let mut seen: HashSet<AnnId> = HashSet::new();
                let mut projection = Vec::new();
                for r in refs {
                    if !seen.insert(r) {
                        continue;
                    }
                    let eff = self.tree.translate_ref(box_id, r);
                    if let Some(shape) = self.ref_shape(eff) {
                        if !by_shape.insert(shape) {
                            continue;
                        }
                    }
                    let label = names.unique(&self.leaf_column(eff));
                    projection.push((label, scope_sql(&scope, r)));
                }
                projection
            }
        };
        ensure_projection(&mut stmt_projection);
        SqlQuery::Select(SelectStmt {
            projection: stmt_projection,
            from: source,
            joins,
            selection,
            group_by: group_by.unwrap_or_default(),
            order_by,
            limit,
            offset,
        })
    }

    /// Renders the bind frames of a joinee (or scalar subquery) chain
    /// against the enclosing scope, to be picked up when the bind node is
    /// assembled.
    fn stage_bind_frames(&mut self, box_id: AnnId, scope: &Scope) {
        let Some(inner) = self.tree.box_over(box_id) else {
            return;
        };
        if let AnnKind::ExtendedBind { over, args, .. } = self.tree.kind(inner).clone() {
            let frame = self.render_bind_args(&args, scope);
            self.prerendered.insert(inner, frame);
            self.stage_bind_frames(over, scope);
        }
    }

    fn render_bind_args(&mut self, args: &[AnnId], scope: &Scope) -> HashMap<Symbol, SqlExpr> {
        let mut frame = HashMap::new();
        for &arg in args {
            let label = self.tree.ann_label(arg);
            let expr = self.render_scalar(arg, scope);
            frame.insert(label, expr);
        }
        frame
    }

    fn render_scalar(&mut self, id: AnnId, scope: &Scope) -> SqlExpr {
        match self.tree.kind(id).clone() {
            AnnKind::Get { .. }
            | AnnKind::NameBound { .. }
            | AnnKind::HandleBound { .. }
            | AnnKind::Agg { .. } => scope_sql(scope, id),
            AnnKind::Fun { name, args } => self.render_fun(&name, &args, scope),
            AnnKind::Lit { value } => SqlExpr::Literal(value),
            AnnKind::Var { name } => self.render_var(&name),
            AnnKind::As { over, .. } | AnnKind::Highlight { over } => {
                self.render_scalar(over, scope)
            }
            AnnKind::Sort { over, .. } => self.render_scalar(over, scope),
            AnnKind::Box { .. } => {
                self.stage_bind_frames(id, scope);
                SqlExpr::Subquery(Box::new(self.subquery(id)))
            }
            other => unreachable!("render_scalar on {other:?}"),
        }
    }

    fn subquery(&mut self, box_id: AnnId) -> SqlQuery {
        let a = self.assemble(box_id);
        self.finish(a, box_id)
    }

    fn render_var(&mut self, name: &Symbol) -> SqlExpr {
        for frame in self.bind_frames.iter().rev() {
            if let Some(expr) = frame.get(name) {
                return expr.clone();
            }
        }
        let position = match self.params.iter().position(|p| p == name) {
            Some(index) => index + 1,
            None => {
                self.params.push(name.clone());
                self.params.len()
            }
        };
        SqlExpr::Placeholder(self.dialect.placeholder(position, name))
    }

    fn render_fun(&mut self, name: &Symbol, args: &[AnnId], scope: &Scope) -> SqlExpr {
        let mut rendered: Vec<SqlExpr> = args
            .iter()
            .map(|&arg| self.render_scalar(arg, scope))
            .collect();
        let op = name.as_str();
        match (op, rendered.len()) {
            ("not", 1) | ("exists", 1) => SqlExpr::Unary {
                op: if op == "not" { "NOT" } else { "EXISTS" },
                expr: Box::new(rendered.remove(0)),
            },
            ("-", 1) => SqlExpr::Unary {
                op: "-",
                expr: Box::new(rendered.remove(0)),
            },
            ("is_null", 1) => SqlExpr::Postfix {
                op: "IS NULL",
                expr: Box::new(rendered.remove(0)),
            },
            ("is_not_null", 1) => SqlExpr::Postfix {
                op: "IS NOT NULL",
                expr: Box::new(rendered.remove(0)),
            },
            ("between", 3) | ("not_between", 3) => {
                let high = rendered.pop();
                let low = rendered.pop();
                let expr = rendered.pop();
                match (expr, low, high) {
                    (Some(expr), Some(low), Some(high)) => SqlExpr::Between {
                        expr: Box::new(expr),
                        low: Box::new(low),
                        high: Box::new(high),
                        negated: op == "not_between",
                    },
                    _ => unreachable!("arity checked above"),
                }
            }
            ("in", len) | ("not_in", len) if len >= 2 => {
                let negated = op == "not_in";
                let expr = rendered.remove(0);
                if rendered.len() == 1 && matches!(rendered[0], SqlExpr::Subquery(_)) {
                    SqlExpr::Binary {
                        op: op.to_string(),
                        lhs: Box::new(expr),
                        rhs: Box::new(rendered.remove(0)),
                    }
                } else {
                    SqlExpr::InList {
                        expr: Box::new(expr),
                        list: rendered,
                        negated,
                    }
                }
            }
            ("and", len) | ("or", len) if len != 2 => {
                let mut iter = rendered.into_iter();
                match iter.next() {
                    None => SqlExpr::Literal(Value::Bool(op == "and")),
                    Some(first) => iter.fold(first, |lhs, rhs| SqlExpr::Binary {
                        op: op.to_string(),
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    }),
                }
            }
            (op, 2) if BINARY_OPS.contains(&op) => {
                let rhs = rendered.pop();
                let lhs = rendered.pop();
                match (lhs, rhs) {
                    (Some(lhs), Some(rhs)) => SqlExpr::Binary {
                        op: op.to_string(),
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    _ => unreachable!("arity checked above"),
                }
            }
            _ => SqlExpr::Call {
                name: name.clone(),
                args: rendered,
            },
        }
    }

    fn render_aggregate(&mut self, id: AnnId, scope: &Scope, window: Option<Window>) -> SqlExpr {
        let AnnKind::Agg { name, args, filter } = self.tree.kind(id).clone() else {
            unreachable!("render_aggregate on non-aggregate node");
        };
        let mut rendered: Vec<SqlExpr> = args
            .iter()
            .map(|&arg| self.render_scalar(arg, scope))
            .collect();
        let mut filter_expr = filter.map(|f| self.render_scalar(f, scope));
        if !self.dialect.supports_agg_filter() {
            if let Some(cond) = filter_expr.take() {
                // No FILTER clause in this dialect; push the condition into
                // the arguments via CASE.
                if rendered.is_empty() {
                    rendered.push(SqlExpr::Case {
                        when: Box::new(cond),
                        then: Box::new(SqlExpr::Literal(Value::Int(1))),
                    });
                } else {
                    rendered = rendered
                        .into_iter()
                        .map(|arg| SqlExpr::Case {
                            when: Box::new(cond.clone()),
                            then: Box::new(arg),
                        })
                        .collect();
                }
            }
        }
        SqlExpr::Aggregate {
            name,
            args: rendered,
            filter: filter_expr.map(Box::new),
            window,
        }
    }

    fn render_order(&mut self, id: AnnId, scope: &Scope) -> OrderExpr {
        match self.tree.kind(id).clone() {
            AnnKind::Sort { over, dir, nulls } => OrderExpr {
                expr: self.render_scalar(over, scope),
                dir: Some(dir),
                nulls,
            },
            _ => OrderExpr {
                expr: self.render_scalar(id, scope),
                dir: None,
                nulls: None,
            },
        }
    }
}
