//! End-to-end middle-end scenarios: the compiled tree is inspected box by
//! box, checking types, handles, demanded references, and error tracebacks.

use proptest::prelude::*;
use relq::{
    agg, compile, from, fun, get, lit, var, AnnId, AnnKind, AnnotatedTree, CompileErrorKind,
    FieldType, GroupType, Table,
};

fn people() -> Table {
    Table::new("people", ["name", "age"])
}

fn orders() -> Table {
    Table::new("orders", ["customer_id", "total"])
}

/// Plain column names demanded from a box, handle wrappers stripped.
fn demanded(tree: &AnnotatedTree, b: AnnId) -> Vec<String> {
    tree.box_refs(b)
        .iter()
        .map(|&r| {
            let mut id = tree.translate_ref(b, r);
            loop {
                match tree.kind(id) {
                    AnnKind::Get { name } => return name.to_string(),
                    AnnKind::Agg { name, .. } => return format!("{name}()"),
                    AnnKind::NameBound { over, .. } => id = *over,
                    AnnKind::HandleBound { over, .. } => id = *over,
                    other => panic!("unexpected reference {other:?}"),
                }
            }
        })
        .collect()
}

fn field_names(tree: &AnnotatedTree, b: AnnId) -> Vec<String> {
    tree.box_type(b)
        .row
        .fields
        .keys()
        .map(|s| s.as_str().to_string())
        .collect()
}

#[test]
fn projection_demands_flow_to_the_leaf() {
    // From(people) |> Select(name)
    let q = from(people()).select(vec![get("name")]);
    let tree = compile(&q).expect("compile");

    let root = tree.root();
    assert_eq!(field_names(&tree, root), ["name"]);
    assert_eq!(demanded(&tree, root), ["name"]);
    assert_eq!(demanded(&tree, tree.boxes()[0]), ["name"]);
}

#[test]
fn filter_adds_its_condition_to_the_leaf_demands() {
    // From(people) |> Where(age > 21) |> Select(name)
    let q = from(people())
        .filter(fun(">", vec![get("age"), lit(21)]))
        .select(vec![get("name")]);
    let tree = compile(&q).expect("compile");

    assert_eq!(demanded(&tree, tree.boxes()[0]), ["name", "age"]);
}

#[test]
fn join_types_nest_both_sides_and_route_references() {
    // From(a) |> Join(From(b), a.k = b.k) |> Select(a.x)
    let a = Table::new("a", ["k", "x"]);
    let b = Table::new("b", ["k"]);
    let q = from(a)
        .join(
            from(b),
            fun("=", vec![get("a").get("k"), get("b").get("k")]),
        )
        .select(vec![get("a").get("x")]);
    let tree = compile(&q).expect("compile");

    let select_op = tree.box_over(tree.root()).expect("root operator");
    let join_box = match tree.kind(select_op) {
        AnnKind::Select { over, .. } => *over,
        other => panic!("expected Select, got {other:?}"),
    };
    let ty = tree.box_type(join_box);
    assert!(matches!(ty.row.fields["a"], FieldType::Row(_)));
    assert!(matches!(ty.row.fields["b"], FieldType::Row(_)));
    assert_eq!(ty.row.fields["k"], FieldType::Ambiguous);

    let left = tree.boxes()[0];
    let right = tree.boxes()[1];
    assert_eq!(demanded(&tree, left), ["k", "x"]);
    assert_eq!(demanded(&tree, right), ["k"]);

    // Routing totality: no reference lands on both sides.
    let left_refs: std::collections::HashSet<_> = tree.box_refs(left).iter().collect();
    assert!(tree.box_refs(right).iter().all(|r| !left_refs.contains(r)));
}

#[test]
fn grouping_exposes_aggregates_and_charges_their_arguments() {
    // From(orders) |> Group(customer_id) |> Select(customer_id, sum(total))
    let q = from(orders())
        .group(vec![get("customer_id")])
        .select(vec![get("customer_id"), agg("sum", vec![get("total")])]);
    let tree = compile(&q).expect("compile");

    let select_op = tree.box_over(tree.root()).expect("root operator");
    let group_box = match tree.kind(select_op) {
        AnnKind::Select { over, .. } => *over,
        other => panic!("expected Select, got {other:?}"),
    };
    let ty = tree.box_type(group_box);
    assert_eq!(field_names(&tree, group_box), ["customer_id"]);
    match &ty.row.group {
        GroupType::Row(base) => {
            assert!(base.fields.contains_key("customer_id"));
            assert!(base.fields.contains_key("total"));
        }
        other => panic!("expected a grouping base, got {other:?}"),
    }
    assert_eq!(demanded(&tree, group_box), ["customer_id", "sum()"]);
    assert_eq!(demanded(&tree, tree.boxes()[0]), ["customer_id", "total"]);
}

#[test]
fn aliased_join_reports_unknown_namespaces_at_the_reference() {
    // From(a) |> As(x) |> Join(From(b) |> As(y), x.k = y.k), then a lookup
    // through a namespace that does not exist.
    let q = from(Table::new("a", ["k"]))
        .alias("x")
        .join(
            from(Table::new("b", ["k"])).alias("y"),
            fun("=", vec![get("x").get("k"), get("y").get("k")]),
        )
        .select(vec![get("z").get("k")]);
    let err = compile(&q).expect_err("undefined namespace");

    assert!(matches!(
        err.kind,
        CompileErrorKind::UndefinedName(ref name) if name.as_str() == "z"
    ));
    // The innermost traceback frame is the offending reference itself.
    assert_eq!(err.path.first().map(String::as_str), Some("Get.z.k"));
}

#[test]
fn aggregates_require_a_grouping_scope() {
    let q = from(people()).select(vec![agg("count", vec![])]);
    let err = compile(&q).expect_err("aggregate without grouping");
    assert_eq!(err.kind, CompileErrorKind::UnexpectedAggregate);
}

#[test]
fn every_box_wraps_a_distinct_operator() {
    let q = from(people())
        .filter(fun(">", vec![get("age"), lit(21)]))
        .group(vec![get("name")])
        .select(vec![get("name"), agg("count", vec![])]);
    let tree = compile(&q).expect("compile");

    let mut wrapped = std::collections::HashSet::new();
    let mut box_count = 0;
    for (id, kind) in tree.nodes() {
        if let AnnKind::Box { over, .. } = kind {
            box_count += 1;
            assert!(tree.boxes().contains(&id), "box missing from the box list");
            if let Some(over) = over {
                assert!(
                    !matches!(tree.kind(*over), AnnKind::Box { .. }),
                    "box directly wrapping a box"
                );
                assert!(wrapped.insert(*over), "operator wrapped by two boxes");
            }
        }
    }
    assert_eq!(box_count, tree.boxes().len());
}

#[test]
fn stage_handles_are_assigned_only_when_referenced() {
    let plain = from(people()).select(vec![get("name")]);
    let tree = compile(&plain).expect("compile");
    assert!(tree.boxes().iter().all(|&b| tree.box_handle(b) == 0));

    let stage = from(people());
    let q = stage.clone().select(vec![stage.get("name")]);
    let tree = compile(&q).expect("compile");
    let handles: Vec<_> = tree
        .boxes()
        .iter()
        .map(|&b| tree.box_handle(b))
        .collect();
    assert_eq!(handles, [1, 0]);
}

#[test]
fn handle_references_survive_joins() {
    // Disambiguating a shared column through the identity of one pipeline
    // stage instead of an alias.
    let a = from(Table::new("a", ["k"]));
    let q = a
        .clone()
        .join(from(Table::new("b", ["k"])), lit(true))
        .select(vec![a.get("k")]);
    let tree = compile(&q).expect("compile");

    // The handle-bound projection routed to the left side and collapsed at
    // its box.
    assert_eq!(demanded(&tree, tree.boxes()[0]), ["k"]);
    assert!(tree.box_refs(tree.boxes()[1]).is_empty());
}

#[test]
fn bound_queries_check_their_bindings() {
    let escaping = from(people())
        .select(vec![get("name")])
        .bind(vec![get("age").alias("a")]);
    let err = compile(&escaping).expect_err("escaping binding");
    assert!(matches!(
        err.kind,
        CompileErrorKind::UndefinedName(ref name) if name.as_str() == "age"
    ));

    let closed = from(people())
        .filter(fun("=", vec![get("name"), var("who")]))
        .select(vec![get("age")])
        .bind(vec![lit("alice").alias("who")]);
    compile(&closed).expect("closed bindings compile");
}

#[test]
fn append_intersects_and_feeds_every_branch() {
    let q = from(Table::new("a", ["k", "x"]))
        .append(vec![from(Table::new("b", ["k", "y"]))])
        .select(vec![get("k")]);
    let tree = compile(&q).expect("compile");

    let select_op = tree.box_over(tree.root()).expect("root operator");
    let append_box = match tree.kind(select_op) {
        AnnKind::Select { over, .. } => *over,
        other => panic!("expected Select, got {other:?}"),
    };
    assert_eq!(field_names(&tree, append_box), ["k"]);
    assert_eq!(demanded(&tree, tree.boxes()[0]), ["k"]);
    assert_eq!(demanded(&tree, tree.boxes()[1]), ["k"]);
}

#[test]
fn duplicate_labels_are_rejected_with_a_traceback() {
    let q = from(people()).select(vec![get("name"), get("age").alias("name")]);
    let err = compile(&q).expect_err("duplicate label");
    assert!(matches!(
        err.kind,
        CompileErrorKind::DuplicateLabel(ref name) if name.as_str() == "name"
    ));
    assert!(!err.path.is_empty());
    assert!(err.to_string().contains("duplicate label"));
}

#[test]
fn scalar_operators_cannot_stand_as_tables() {
    let q = lit(1).select(vec![get("x")]);
    let err = compile(&q).expect_err("ill-formed");
    assert_eq!(err.kind, CompileErrorKind::IllFormed);
}

proptest! {
    /// Projection order always follows declaration order, whatever subset
    /// of columns is selected.
    #[test]
    fn projection_preserves_declaration_order(
        table in "[a-z]{1,8}",
        columns in proptest::collection::hash_set("[a-z]{1,8}", 1..6),
    ) {
        let columns: Vec<String> = columns.into_iter().collect();
        prop_assume!(!columns.contains(&table));

        let q = from(Table::new(table.as_str(), columns.clone()))
            .select(columns.iter().map(|c| get(c.as_str())).collect());
        let tree = compile(&q).expect("compile");

        let projected: Vec<String> = tree
            .box_type(tree.root())
            .row
            .fields
            .keys()
            .map(|s| s.as_str().to_string())
            .collect();
        prop_assert_eq!(projected, columns);
    }

    /// Compiling the same tree twice produces the same box types: the type
    /// layer is a pure function of the input.
    #[test]
    fn recompilation_is_stable(
        table in "[a-z]{1,8}",
        columns in proptest::collection::hash_set("[a-z]{1,8}", 2..5),
    ) {
        let columns: Vec<String> = columns.into_iter().collect();
        prop_assume!(!columns.contains(&table));

        let first_col = columns[0].clone();
        let q = from(Table::new(table.as_str(), columns))
            .filter(fun("is_not_null", vec![get(first_col.as_str())]))
            .select(vec![get(first_col.as_str())]);

        let one = compile(&q).expect("first compile");
        let two = compile(&q).expect("second compile");

        prop_assert_eq!(one.boxes().len(), two.boxes().len());
        for (&b1, &b2) in one.boxes().iter().zip(two.boxes()) {
            prop_assert_eq!(one.box_type(b1), two.box_type(b2));
            prop_assert_eq!(one.box_handle(b1), two.box_handle(b2));
        }
    }
}
