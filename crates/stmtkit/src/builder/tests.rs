use super::*;
use crate::binds;
use serde_json::json;

#[test]
fn test_simple_select() {
    let qb = QueryBuilder::select_from("orders");
    let stmt = qb.compile().unwrap();
    assert_eq!(stmt.sql, "SELECT [orders].* FROM [orders]");
    assert!(stmt.binds.is_empty());
    assert_eq!(stmt.sources, vec!["orders"]);
}

#[test]
fn test_no_source_is_rejected() {
    let err = QueryBuilder::new().compile().unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn test_distinct_and_all() {
    let mut qb = QueryBuilder::select_from("users");
    qb.distinct(Some(true)).columns(&["city"]);
    assert_eq!(qb.compile().unwrap().sql, "SELECT DISTINCT city FROM [users]");

    qb.distinct(Some(false));
    assert_eq!(qb.compile().unwrap().sql, "SELECT ALL city FROM [users]");
}

#[test]
fn test_aliased_columns() {
    let mut qb = QueryBuilder::new();
    qb.from_as("users", "u")
        .column("u.id")
        .column_as("COUNT(*)", "total")
        .column_as("u.name", "[label]");
    assert_eq!(
        qb.compile().unwrap().sql,
        "SELECT u.id, COUNT(*) AS [total], u.name AS [label] FROM [users] AS [u]"
    );
}

#[test]
fn test_default_columns_per_source() {
    let mut qb = QueryBuilder::new();
    qb.from_as("users", "u").from("roles");
    assert_eq!(
        qb.compile().unwrap().sql,
        "SELECT [u].*, [roles].* FROM [users] AS [u], [roles]"
    );
}

#[test]
fn test_from_alias_replaces_entry() {
    let mut qb = QueryBuilder::new();
    qb.from_as("users", "u").from_as("admins", "u");
    let stmt = qb.compile().unwrap();
    assert_eq!(stmt.sql, "SELECT [u].* FROM [admins] AS [u]");
    assert_eq!(stmt.sources, vec!["admins"]);
}

#[test]
fn test_set_from_replaces_sources() {
    let mut qb = QueryBuilder::new();
    qb.from_as("users", "u").from("roles");
    qb.set_from("orders", Some("o"));
    let stmt = qb.compile().unwrap();
    assert_eq!(stmt.sql, "SELECT [o].* FROM [orders] AS [o]");
    assert_eq!(stmt.sources, vec!["orders"]);

    qb.set_from("invoices", None).from("customers");
    assert_eq!(
        qb.compile().unwrap().sql,
        "SELECT [invoices].*, [customers].* FROM [invoices], [customers]"
    );
}

#[test]
fn test_raw_source_is_not_resolved() {
    let qb = QueryBuilder::select_from("[reports].[daily]");
    let stmt = qb.compile().unwrap();
    assert_eq!(stmt.sql, "SELECT * FROM [reports].[daily]");
    assert!(stmt.sources.is_empty());
}

#[test]
fn test_joins() {
    let mut qb = QueryBuilder::new();
    qb.from_as("orders", "o")
        .inner_join("users", "u.id = o.user_id", Some("u"))
        .left_join("coupons", "c.id = o.coupon_id", Some("c"))
        .join("regions", None, None, None);
    let stmt = qb.compile().unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT [o].* FROM [orders] AS [o] \
         INNER JOIN [users] AS [u] ON u.id = o.user_id \
         LEFT JOIN [coupons] AS [c] ON c.id = o.coupon_id \
         JOIN [regions]"
    );
    assert_eq!(stmt.sources, vec!["orders", "users", "coupons", "regions"]);
}

#[test]
fn test_sources_are_distinct() {
    let mut qb = QueryBuilder::new();
    qb.from_as("users", "a")
        .right_join("users", "a.parent_id = b.id", Some("b"));
    assert_eq!(qb.compile().unwrap().sources, vec!["users"]);
}

#[test]
fn test_where_with_binds() {
    let mut qb = QueryBuilder::select_from("orders");
    qb.where_(("amount > :min:", binds! { "min" => 10 }))
        .and_where("status = 'paid'");
    let stmt = qb.compile().unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT [orders].* FROM [orders] WHERE (amount > :min:) AND (status = 'paid')"
    );
    assert_eq!(stmt.binds.get("min"), Some(&json!(10)));
}

#[test]
fn test_or_where_and_helpers() {
    let mut qb = QueryBuilder::select_from("items");
    qb.in_where("id", [1, 2])
        .or_where("featured = 1")
        .between_where("price", 5, 50);
    let stmt = qb.compile().unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT [items].* FROM [items] WHERE \
         ((id IN (:ABP0:, :ABP1:)) OR (featured = 1)) AND (price BETWEEN :ABP2: AND :ABP3:)"
    );
    assert_eq!(stmt.binds.len(), 4);
}

#[test]
fn test_empty_in_where_matches_nothing() {
    let mut qb = QueryBuilder::select_from("items");
    qb.not_in_where("id", Vec::<i64>::new());
    let stmt = qb.compile().unwrap();
    assert!(stmt.sql.ends_with("WHERE id != id"));
    assert!(stmt.binds.is_empty());
}

#[test]
fn test_group_by_and_having() {
    let mut qb = QueryBuilder::select_from("orders");
    qb.columns(&["user_id", "SUM(amount)"])
        .group_by(&["user_id", "o.region"])
        .having(("SUM(amount) > :floor:", binds! { "floor" => 100 }));
    let stmt = qb.compile().unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT user_id, SUM(amount) FROM [orders] GROUP BY [user_id], o.region HAVING SUM(amount) > :floor:"
    );
    assert_eq!(stmt.binds.get("floor"), Some(&json!(100)));

    qb.group_by_raw("DATE(created)");
    assert!(qb.compile().unwrap().sql.contains("GROUP BY DATE(created) HAVING"));
}

#[test]
fn test_order_by_items() {
    let mut qb = QueryBuilder::select_from("users");
    qb.order_by(&["name", "created desc", "u.id", "LENGTH(name) DESC"]);
    assert_eq!(
        qb.compile().unwrap().sql,
        "SELECT [users].* FROM [users] ORDER BY [name], [created] DESC, u.id, LENGTH(name) DESC"
    );

    qb.order_by_raw("RAND()");
    assert!(qb.compile().unwrap().sql.ends_with("ORDER BY RAND()"));
}

#[test]
fn test_limit_and_offset_are_bound() {
    let mut qb = QueryBuilder::select_from("users");
    qb.limit(20, Some(40));
    let stmt = qb.compile().unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT [users].* FROM [users] LIMIT :ABP_LIMIT: OFFSET :ABP_OFFSET:"
    );
    assert_eq!(stmt.binds.get(LIMIT_KEY), Some(&json!(20)));
    assert_eq!(stmt.binds.get(OFFSET_KEY), Some(&json!(40)));
    assert_eq!(stmt.types.get(&BindKey::name(LIMIT_KEY)), Some(&WireType::Int));
    assert_eq!(stmt.types.get(&BindKey::name(OFFSET_KEY)), Some(&WireType::Int));
}

#[test]
fn test_offset_without_limit() {
    let mut qb = QueryBuilder::select_from("users");
    qb.offset(10);
    let err = qb.compile().unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("limit is missing"));
}

#[test]
fn test_locking_clauses() {
    let mut qb = QueryBuilder::select_from("accounts");
    qb.for_update(true);
    assert!(qb.compile().unwrap().sql.ends_with(" FOR UPDATE"));

    qb.for_update(false).shared_lock(true);
    assert!(qb.compile().unwrap().sql.ends_with(" FOR SHARE"));

    qb.for_update(true);
    assert!(qb.compile().unwrap_err().is_configuration());
}

#[test]
fn test_builder_binds_override_filter_binds() {
    let mut qb = QueryBuilder::select_from("users");
    qb.where_(("age > :age:", binds! { "age" => 18 }))
        .bind("age", 21)
        .bind_type("age", WireType::Int);
    let stmt = qb.compile().unwrap();
    assert_eq!(stmt.binds.get("age"), Some(&json!(21)));
    assert_eq!(stmt.types.get(&BindKey::name("age")), Some(&WireType::Int));
}

#[test]
fn test_set_binds_replaces_builder_binds() {
    let mut qb = QueryBuilder::select_from("orders");
    qb.where_(("status = :status:", binds! { "status" => "paid" }))
        .bind("stale", 1)
        .set_binds(binds! { "region" => "eu" });
    let stmt = qb.compile().unwrap();
    assert_eq!(stmt.binds.get("status"), Some(&json!("paid")));
    assert_eq!(stmt.binds.get("region"), Some(&json!("eu")));
    assert!(!stmt.binds.contains("stale"));
}

#[test]
fn test_compile_is_repeatable() {
    let mut qb = QueryBuilder::select_from("orders");
    qb.where_(("amount > :min:", binds! { "min" => 10 }))
        .limit(5, None);
    let first = qb.compile().unwrap();
    let second = qb.compile().unwrap();
    assert_eq!(first, second);
    assert_eq!(
        first.sql,
        "SELECT [orders].* FROM [orders] WHERE amount > :min: LIMIT :ABP_LIMIT:"
    );
    assert_eq!(first.binds.get(LIMIT_KEY), Some(&json!(5)));
    assert_eq!(first.binds.get("min"), Some(&json!(10)));
}
