mod common;

use common::ORDER_STATUS;
use onetable_core::query::{
    compile_predicate, compile_query, Operand, QuerySpec, SortKeyCondition,
};
use onetable_core::{attr, QueryCompilationError, QueryError, SortKeyOperator};
use serde_json::json;

fn base_spec() -> QuerySpec {
    let mut spec = QuerySpec::new("shop", "PartitionKey", "SortKey");
    spec.partition_key = Some(json!("ORDER#o1"));
    spec
}

#[test]
fn enum_comparison_binds_variant_name() {
    let typed = compile_predicate(&attr("status").eq("Shipped")).unwrap();
    assert!(typed.statement.ends_with(" = ?"));
    assert_eq!(typed.parameters, vec![json!("Shipped")]);

    let inferred = compile_predicate(
        &attr("status")
            .of_enum(ORDER_STATUS)
            .eq(Operand::discriminant(1)),
    )
    .unwrap();
    assert_eq!(inferred.statement, r#""status" = ?"#);
    assert_eq!(inferred.parameters, vec![json!("Shipped")]);

    let from_integer = compile_predicate(&attr("status").of_enum(ORDER_STATUS).ne(2)).unwrap();
    assert_eq!(from_integer.parameters, vec![json!("Cancelled")]);
}

#[test]
fn nested_combinators_are_parenthesized_in_ast_order() {
    let predicate = attr("a").eq(1) & (attr("b").eq(2) | attr("c").eq(3));
    let compiled = compile_predicate(&predicate).unwrap();

    assert_eq!(
        compiled.statement,
        r#"("a" = ? AND ("b" = ? OR "c" = ?))"#
    );
    assert_eq!(compiled.parameters, vec![json!(1), json!(2), json!(3)]);
}

#[test]
fn flat_combinator_is_not_parenthesized() {
    let compiled = compile_predicate(&(attr("a").eq(1) & attr("b").lt(2))).unwrap();
    assert_eq!(compiled.statement, r#""a" = ? AND "b" < ?"#);
}

#[test]
fn function_and_range_fragments() {
    let compiled = compile_predicate(
        &(attr("name").begins_with("Al")
            & attr("tags").contains("vip")
            & !attr("total").between(10, 20)),
    )
    .unwrap();
    assert_eq!(
        compiled.statement,
        r#"((begins_with("name", ?) AND contains("tags", ?)) AND NOT ("total" BETWEEN ? AND ?))"#
    );
    assert_eq!(
        compiled.parameters,
        vec![json!("Al"), json!("vip"), json!(10), json!(20)]
    );
}

#[test]
fn membership_lists_and_collections() {
    let constants =
        compile_predicate(&attr("status").is_in(["Pending", "Shipped"])).unwrap();
    assert_eq!(constants.statement, r#""status" IN (?, ?)"#);
    assert_eq!(constants.parameters, vec![json!("Pending"), json!("Shipped")]);

    let ids = vec!["o1", "o2", "o3"];
    let collection = compile_predicate(&attr("id").in_collection(ids)).unwrap();
    assert_eq!(collection.statement, r#""id" IN [?, ?, ?]"#);
    assert_eq!(collection.parameters.len(), 3);

    let enum_members = compile_predicate(
        &attr("status")
            .of_enum(ORDER_STATUS)
            .is_in([Operand::discriminant(0), Operand::discriminant(2)]),
    )
    .unwrap();
    assert_eq!(
        enum_members.parameters,
        vec![json!("Pending"), json!("Cancelled")]
    );
}

#[test]
fn nested_attribute_paths_are_quoted_per_segment() {
    let compiled = compile_predicate(&attr("address.city").eq("Oslo")).unwrap();
    assert_eq!(compiled.statement, r#""address"."city" = ?"#);
}

#[test]
fn invalid_constructs_are_compilation_errors() {
    let null = compile_predicate(&attr("note").eq(None::<String>)).unwrap_err();
    assert_eq!(
        null,
        QueryCompilationError::NullConstant {
            context: "comparison"
        }
    );

    let empty = compile_predicate(&attr("status").is_in(Vec::<&str>::new())).unwrap_err();
    assert!(matches!(empty, QueryCompilationError::EmptyMembershipList { .. }));

    let untyped = compile_predicate(&attr("status").eq(Operand::discriminant(1))).unwrap_err();
    assert!(matches!(
        untyped,
        QueryCompilationError::UnresolvedEnum { discriminant: 1, .. }
    ));

    let unknown_variant =
        compile_predicate(&attr("status").of_enum(ORDER_STATUS).eq(Operand::discriminant(7)))
            .unwrap_err();
    assert!(matches!(
        unknown_variant,
        QueryCompilationError::UnresolvedEnum { discriminant: 7, .. }
    ));

    let not_a_collection = compile_predicate(&attr("id").in_collection("o1")).unwrap_err();
    assert!(matches!(
        not_a_collection,
        QueryCompilationError::UnsupportedOperand { .. }
    ));
}

#[test]
fn full_query_with_index_sort_key_filter_and_direction() {
    let mut spec = QuerySpec::new("shop", "GSI1PK", "GSI1SK");
    spec.index_name = Some("ByCustomer".to_string());
    spec.partition_key = Some(json!("CUSTOMER#c1"));
    spec.sort_key = Some(SortKeyCondition::new(
        SortKeyOperator::BeginsWith,
        vec![json!("DATE#2024")],
    ));
    spec.filter = Some(attr("status").eq("Shipped") & attr("total").gt(100));
    spec.descending = true;

    let compiled = compile_query(&spec).unwrap();
    assert_eq!(
        compiled.statement,
        r#"SELECT * FROM "shop"."ByCustomer" WHERE "GSI1PK" = ? AND begins_with("GSI1SK", ?) AND ("status" = ? AND "total" > ?) ORDER BY "GSI1SK" DESC"#
    );
    assert_eq!(
        compiled.parameters,
        vec![
            json!("CUSTOMER#c1"),
            json!("DATE#2024"),
            json!("Shipped"),
            json!(100)
        ]
    );
}

#[test]
fn between_sort_key_needs_two_values() {
    let mut spec = base_spec();
    spec.sort_key = Some(SortKeyCondition::new(
        SortKeyOperator::Between,
        vec![json!("LINE#a"), json!("LINE#m")],
    ));
    let compiled = compile_query(&spec).unwrap();
    assert!(compiled.statement.ends_with(r#""SortKey" BETWEEN ? AND ?"#));
    assert_eq!(compiled.parameters.len(), 3);

    spec.sort_key = Some(SortKeyCondition::new(
        SortKeyOperator::Between,
        vec![json!("LINE#a")],
    ));
    let err = compile_query(&spec).unwrap_err();
    assert!(matches!(
        err,
        QueryError::Compilation(QueryCompilationError::SortKeyArity {
            expected: 2,
            actual: 1,
            ..
        })
    ));
}

#[test]
fn missing_partition_key_fails_before_compiling() {
    let mut spec = base_spec();
    spec.partition_key = None;
    spec.filter = Some(attr("note").eq(None::<String>));
    assert!(matches!(
        compile_query(&spec),
        Err(QueryError::MissingPartitionKey { .. })
    ));

    spec.partition_key = Some(json!(""));
    assert!(matches!(
        compile_query(&spec),
        Err(QueryError::MissingPartitionKey { .. })
    ));
}
