//! SQL text scenarios. Exact output is pinned for representative shapes,
//! and everything rendered must parse back through `sqlparser` under a
//! matching dialect.

use proptest::prelude::*;
use rstest::rstest;
use relq::{agg, aggregate, from, fun, get, lit, render, to_sql, var, Dialect, Table};
use sqlparser::dialect::{GenericDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;

fn people() -> Table {
    Table::new("people", ["name", "age"])
}

fn orders() -> Table {
    Table::new("orders", ["customer_id", "total"])
}

fn assert_parses(sql: &str, dialect: Dialect) {
    let statements = match dialect {
        Dialect::Postgres => Parser::parse_sql(&PostgreSqlDialect {}, sql),
        Dialect::Mysql => Parser::parse_sql(&MySqlDialect {}, sql),
        Dialect::Sqlserver => Parser::parse_sql(&MsSqlDialect {}, sql),
        Dialect::Sqlite => Parser::parse_sql(&GenericDialect {}, sql),
    };
    let statements = statements.unwrap_or_else(|e| panic!("`{sql}` does not parse: {e}"));
    assert_eq!(statements.len(), 1, "expected one statement from `{sql}`");
}

#[test]
fn join_renders_flat_with_qualified_columns() {
    let q = from(Table::new("a", ["k", "x"]))
        .join(
            from(Table::new("b", ["k"])),
            fun("=", vec![get("a").get("k"), get("b").get("k")]),
        )
        .select(vec![get("a").get("x")]);
    let sql = to_sql(&q, Dialect::Postgres).expect("render");
    assert_eq!(
        sql,
        "SELECT \"a\".\"x\" FROM \"a\" JOIN \"b\" ON \"a\".\"k\" = \"b\".\"k\""
    );
    assert_parses(&sql, Dialect::Postgres);
}

#[test]
fn grouping_renders_in_a_single_statement() {
    let q = from(orders())
        .group(vec![get("customer_id")])
        .select(vec![get("customer_id"), agg("sum", vec![get("total")])]);
    let sql = to_sql(&q, Dialect::Postgres).expect("render");
    assert_eq!(
        sql,
        "SELECT \"orders\".\"customer_id\", SUM(\"orders\".\"total\") AS \"sum\" \
         FROM \"orders\" GROUP BY \"orders\".\"customer_id\""
    );
    assert_parses(&sql, Dialect::Postgres);
}

#[test]
fn filtering_above_a_projection_wraps_a_subquery() {
    let q = from(orders())
        .group(vec![get("customer_id")])
        .select(vec![get("customer_id"), agg("sum", vec![get("total")])])
        .filter(fun(">", vec![get("sum"), lit(100)]));
    let sql = to_sql(&q, Dialect::Postgres).expect("render");
    assert_eq!(
        sql,
        "SELECT \"orders_2\".\"customer_id\", \"orders_2\".\"sum\" FROM \
         (SELECT \"orders\".\"customer_id\", SUM(\"orders\".\"total\") AS \"sum\" \
         FROM \"orders\" GROUP BY \"orders\".\"customer_id\") AS \"orders_2\" \
         WHERE \"orders_2\".\"sum\" > 100"
    );
    assert_parses(&sql, Dialect::Postgres);
}

#[test]
fn ordering_and_limit_attach_to_the_projection() {
    let q = from(people())
        .select(vec![get("name")])
        .order_by(vec![get("name").desc()])
        .limit(10);
    let sql = to_sql(&q, Dialect::Postgres).expect("render");
    assert_eq!(
        sql,
        "SELECT \"people\".\"name\" FROM \"people\" ORDER BY \"name\" DESC LIMIT 10"
    );
    assert_parses(&sql, Dialect::Postgres);
}

#[test]
fn defined_columns_inline_their_expressions() {
    let q = from(people())
        .define(vec![fun("+", vec![get("age"), lit(1)]).alias("age_next")])
        .select(vec![get("name"), get("age_next")]);
    let sql = to_sql(&q, Dialect::Postgres).expect("render");
    assert_eq!(
        sql,
        "SELECT \"people\".\"name\", \"people\".\"age\" + 1 AS \"age_next\" FROM \"people\""
    );
    assert_parses(&sql, Dialect::Postgres);
}

#[test]
fn append_renders_aligned_union_branches() {
    let q = from(Table::new("a", ["k", "x"]))
        .append(vec![from(Table::new("b", ["k", "y"]))])
        .select(vec![get("k")]);
    let sql = to_sql(&q, Dialect::Postgres).expect("render");
    assert_eq!(
        sql,
        "SELECT \"a_2\".\"k\" FROM (SELECT \"a\".\"k\" FROM \"a\" \
         UNION ALL SELECT \"b\".\"k\" FROM \"b\") AS \"a_2\""
    );
    assert_parses(&sql, Dialect::Postgres);
}

#[test]
fn bound_joinee_renders_lateral() {
    let person = Table::new("person", ["id", "name"]);
    let visit = Table::new("visit", ["person_id", "ts"]);
    let joinee = from(visit)
        .filter(fun("=", vec![get("person_id"), var("PID")]))
        .bind(vec![get("id").alias("PID")]);
    let q = from(person)
        .join(joinee, lit(true))
        .select(vec![get("name"), get("ts")]);
    let rendered = render(&q, Dialect::Postgres).expect("render");
    assert_eq!(
        rendered.sql,
        "SELECT \"person\".\"name\", \"visit_2\".\"ts\" FROM \"person\" \
         JOIN LATERAL (SELECT \"visit\".\"ts\" FROM \"visit\" \
         WHERE \"visit\".\"person_id\" = \"person\".\"id\") AS \"visit_2\" ON TRUE"
    );
    // The bound variable is substituted, not parameterized.
    assert!(rendered.params.is_empty());
    assert_parses(&rendered.sql, Dialect::Postgres);
}

#[test]
fn scalar_subqueries_render_inline() {
    let q = from(Table::new("a", ["k"]))
        .filter(fun(
            "in",
            vec![get("k"), from(Table::new("b", ["k2"])).select(vec![get("k2")])],
        ))
        .select(vec![get("k")]);
    let sql = to_sql(&q, Dialect::Postgres).expect("render");
    assert_eq!(
        sql,
        "SELECT \"a\".\"k\" FROM \"a\" WHERE \"a\".\"k\" IN (SELECT \"b\".\"k2\" FROM \"b\")"
    );
    assert_parses(&sql, Dialect::Postgres);
}

#[test]
fn window_aggregates_render_over_partitions() {
    let q = from(orders())
        .partition(vec![get("customer_id")])
        .select(vec![
            get("customer_id"),
            agg("sum", vec![get("total")]).alias("running"),
        ]);
    let sql = to_sql(&q, Dialect::Postgres).expect("render");
    assert_eq!(
        sql,
        "SELECT \"orders\".\"customer_id\", SUM(\"orders\".\"total\") \
         OVER (PARTITION BY \"orders\".\"customer_id\") AS \"running\" FROM \"orders\""
    );
    assert_parses(&sql, Dialect::Postgres);
}

#[test]
fn aggregate_filters_degrade_to_case_without_filter_support() {
    let q = from(orders())
        .group(vec![get("customer_id")])
        .select(vec![
            get("customer_id"),
            aggregate(
                "sum",
                vec![get("total")],
                Some(fun(">", vec![get("total"), lit(0)])),
                None,
            ),
        ]);

    let pg = to_sql(&q, Dialect::Postgres).expect("render");
    assert!(pg.contains("FILTER (WHERE"));
    assert_parses(&pg, Dialect::Postgres);

    let mysql = to_sql(&q, Dialect::Mysql).expect("render");
    assert!(mysql.contains("CASE WHEN"));
    assert!(!mysql.contains("FILTER"));
    assert_parses(&mysql, Dialect::Mysql);
}

#[rstest]
#[case(Dialect::Postgres, "\"people\"")]
#[case(Dialect::Mysql, "`people`")]
#[case(Dialect::Sqlserver, "[people]")]
fn quoting_follows_the_dialect(#[case] dialect: Dialect, #[case] quoted: &str) {
    let q = from(people()).select(vec![get("name")]);
    let sql = to_sql(&q, dialect).expect("render");
    assert!(sql.contains(quoted), "`{sql}` should contain `{quoted}`");
}

#[test]
fn sqlserver_limit_uses_offset_fetch() {
    let q = from(people()).select(vec![get("name")]).limit(5);
    let sql = to_sql(&q, Dialect::Sqlserver).expect("render");
    assert_eq!(
        sql,
        "SELECT [people].[name] FROM [people] ORDER BY (SELECT NULL) \
         OFFSET 0 ROWS FETCH NEXT 5 ROWS ONLY"
    );
}

#[test]
fn placeholder_styles_follow_the_dialect() {
    let q = from(people())
        .filter(fun("=", vec![get("name"), var("who")]))
        .select(vec![get("age")]);

    let pg = render(&q, Dialect::Postgres).expect("render");
    assert!(pg.sql.contains("$1"));
    let sqlite = render(&q, Dialect::Sqlite).expect("render");
    assert!(sqlite.sql.contains(":who"));
    let mysql = render(&q, Dialect::Mysql).expect("render");
    assert!(mysql.sql.contains("= ?"));
    let mssql = render(&q, Dialect::Sqlserver).expect("render");
    assert!(mssql.sql.contains("@who"));
}

#[test]
fn same_table_joined_twice_gets_distinct_aliases() {
    let left = from(Table::new("e", ["id", "boss_id", "name"])).alias("emp");
    let right = from(Table::new("e", ["id", "boss_id", "name"])).alias("boss");
    let q = left
        .join(
            right,
            fun("=", vec![get("emp").get("boss_id"), get("boss").get("id")]),
        )
        .select(vec![get("emp").get("name"), get("boss").get("name")]);
    let err = relq::compile(&q).expect_err("both outputs are labeled `name`");
    assert!(matches!(
        err.kind,
        relq::CompileErrorKind::DuplicateLabel(ref n) if n.as_str() == "name"
    ));

    // With distinct labels the rendered aliases stay distinct too.
    let left = from(Table::new("e", ["id", "boss_id", "name"])).alias("emp");
    let right = from(Table::new("e", ["id", "boss_id", "name"])).alias("boss");
    let q = left
        .join(
            right,
            fun("=", vec![get("emp").get("boss_id"), get("boss").get("id")]),
        )
        .select(vec![
            get("emp").get("name"),
            get("boss").get("name").alias("boss_name"),
        ]);
    let sql = to_sql(&q, Dialect::Postgres).expect("render");
    assert_eq!(
        sql,
        "SELECT \"e\".\"name\", \"e_2\".\"name\" AS \"boss_name\" FROM \"e\" \
         JOIN \"e\" AS \"e_2\" ON \"e\".\"boss_id\" = \"e_2\".\"id\""
    );
    assert_parses(&sql, Dialect::Postgres);
}

proptest! {
    /// Whatever simple pipeline we build from generated identifiers, the
    /// rendered statement parses under the target dialect's grammar.
    #[test]
    fn rendered_sql_parses(
        table in "[a-z]{1,8}",
        columns in proptest::collection::hash_set("[a-z]{1,8}", 2..5),
        threshold in 0i64..1000,
    ) {
        let columns: Vec<String> = columns.into_iter().collect();
        prop_assume!(!columns.contains(&table));

        let filter_col = columns[0].clone();
        let select_col = columns[1].clone();
        let q = from(Table::new(table.as_str(), columns.clone()))
            .filter(fun(">", vec![get(filter_col.as_str()), lit(threshold)]))
            .select(vec![get(select_col.as_str())]);

        for dialect in [Dialect::Postgres, Dialect::Mysql, Dialect::Sqlite] {
            let sql = to_sql(&q, dialect).expect("render");
            let parsed = match dialect {
                Dialect::Postgres => Parser::parse_sql(&PostgreSqlDialect {}, &sql),
                Dialect::Mysql => Parser::parse_sql(&MySqlDialect {}, &sql),
                _ => Parser::parse_sql(&GenericDialect {}, &sql),
            };
            prop_assert!(parsed.is_ok(), "`{}` failed to parse: {:?}", sql, parsed.err());
        }
    }
}
