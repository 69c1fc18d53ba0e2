// tests/integration_tests.rs
//
// Full pipeline: strip comments -> metadata -> parse -> macro rewrite ->
// time substitution.

use macroql::evaluator::EvalError;
use macroql::output::to_sql;
use macroql::parser::Parser;
use macroql::{DateTimeType, Evaluator, QueryContext};

fn ctx() -> QueryContext {
    QueryContext {
        interval: "15s".to_string(),
        from: 1545613320,
        to: 1546300740,
        database: "default".to_string(),
        table: "requests".to_string(),
        date_time_col: "d".to_string(),
        ..QueryContext::default()
    }
}

// ============================================================================
// Passthrough queries
// ============================================================================

#[test]
fn test_placeholder_only_query() {
    let sql = Evaluator::new(ctx())
        .expand("SELECT count() FROM $table WHERE $timeFilter")
        .unwrap();
    assert_eq!(
        sql,
        "SELECT count() FROM default.requests WHERE d >= toDateTime(1545613320) AND d <= toDateTime(1546300740)"
    );
}

#[test]
fn test_query_without_placeholders_is_untouched() {
    let sql = Evaluator::new(ctx())
        .expand("SELECT 1 FROM system.numbers LIMIT 1")
        .unwrap();
    assert_eq!(sql, "SELECT 1 FROM system.numbers LIMIT 1");
}

// ============================================================================
// Macro expansion end to end
// ============================================================================

#[test]
fn test_rate_full_expansion() {
    let sql = Evaluator::new(ctx())
        .expand("$rate(countIf(a) AS x) FROM t")
        .unwrap();
    assert_eq!(
        sql,
        "SELECT t, x/runningDifference(t/1000) xRate FROM ( SELECT (intDiv(toUInt32(d), 15) * 15) * 1000 AS t, countIf(a) AS x FROM t WHERE d >= toDateTime(1545613320) AND d <= toDateTime(1546300740) GROUP BY t ORDER BY t)"
    );
}

#[test]
fn test_columns_full_expansion() {
    let sql = Evaluator::new(ctx())
        .expand("$columns(OSName k, count(c) c) FROM requests")
        .unwrap();
    assert_eq!(
        sql,
        "SELECT t, groupArray((k, c)) AS groupArr FROM ( SELECT (intDiv(toUInt32(d), 15) * 15) * 1000 AS t, OSName k, count(c) c FROM requests WHERE d >= toDateTime(1545613320) AND d <= toDateTime(1546300740) GROUP BY t, k ORDER BY t) GROUP BY t ORDER BY t"
    );
}

#[test]
fn test_rate_expansion_with_timestamp_column() {
    let ctx = QueryContext {
        date_time_type: DateTimeType::Timestamp,
        ..ctx()
    };
    let sql = Evaluator::new(ctx).expand("$rate(a AS x) FROM t").unwrap();
    assert!(sql.contains("(intDiv(d, 15) * 15) * 1000 AS t"));
    assert!(sql.contains("WHERE d >= 1545613320 AND d <= 1546300740"));
}

#[test]
fn test_unescape_runs_after_placeholders() {
    let sql = Evaluator::new(ctx())
        .expand("SELECT $unescape('max(v)') FROM $table WHERE $timeFilter")
        .unwrap();
    assert_eq!(
        sql,
        "SELECT max(v) FROM default.requests WHERE d >= toDateTime(1545613320) AND d <= toDateTime(1546300740)"
    );
}

// ============================================================================
// Pipeline flags
// ============================================================================

#[test]
fn test_skip_comments() {
    let ctx = QueryContext {
        skip_comments: true,
        ..ctx()
    };
    let sql = Evaluator::new(ctx)
        .expand("-- dashboards add these\nSELECT 1 FROM t")
        .unwrap();
    assert_eq!(sql, "\nSELECT 1 FROM t");
}

#[test]
fn test_comments_kept_by_default() {
    let sql = Evaluator::new(ctx())
        .expand("-- keep\nSELECT 1 FROM t")
        .unwrap();
    assert_eq!(sql, "-- keep\nSELECT 1 FROM t");
}

#[test]
fn test_add_metadata_prepends_header() {
    let ctx = QueryContext {
        add_metadata: true,
        ..ctx()
    };
    let sql = Evaluator::new(ctx).expand("SELECT 1 FROM t").unwrap();
    assert!(sql.starts_with(
        "/* database=default, table=requests, from=1545613320, to=1546300740, interval=15s */\n"
    ));
    assert!(sql.ends_with("SELECT 1 FROM t"));
}

#[test]
fn test_leading_comment_survives_macro_rewrite() {
    let sql = Evaluator::new(ctx())
        .expand("/* per-host rate */ $rate(a AS x) FROM t")
        .unwrap();
    assert!(sql.starts_with("/* per-host rate */ SELECT t, x/runningDifference(t/1000) xRate"));
}

// ============================================================================
// Errors surface with their stage
// ============================================================================

#[test]
fn test_macro_error_is_surfaced() {
    let err = Evaluator::new(ctx())
        .expand("$rate(no_alias) FROM t")
        .unwrap_err();
    assert!(matches!(err, EvalError::Macro(_)));
}

#[test]
fn test_tokenizer_error_is_surfaced() {
    let err = Evaluator::new(ctx()).expand("SELECT #").unwrap_err();
    assert!(matches!(err, EvalError::Parse(_)));
}

#[test]
fn test_macro_without_from_is_surfaced() {
    let err = Evaluator::new(ctx()).expand("$rate(a AS x)").unwrap_err();
    assert!(matches!(err, EvalError::Parse(_)));
}

#[test]
fn test_malformed_interval_is_surfaced() {
    let ctx = QueryContext {
        interval: "soon".to_string(),
        ..ctx()
    };
    let err = Evaluator::new(ctx).expand("SELECT 1 FROM t").unwrap_err();
    assert!(matches!(err, EvalError::Substitute(_)));
}

// ============================================================================
// Secondary interfaces
// ============================================================================

#[test]
fn test_clause_extraction_after_parse() {
    let ast = Parser::parse("$columns(a k, b v) FROM t GROUP BY t, k").unwrap();
    assert_eq!(
        ast.clause_args("group by").unwrap(),
        vec!["t".to_string(), "k".to_string()]
    );
}

#[test]
fn test_context_record_comes_in_as_json() {
    let ctx: QueryContext = serde_json::from_str(
        r#"{
            "interval": "15s",
            "from": 1545613320,
            "to": 1546300740,
            "database": "default",
            "table": "requests",
            "date_time_col": "d",
            "date_time_type": "TIMESTAMP64_3"
        }"#,
    )
    .unwrap();
    assert_eq!(ctx.date_time_type, DateTimeType::Timestamp64Milli);
    let sql = Evaluator::new(ctx)
        .expand("SELECT 1 FROM t WHERE $timeFilter")
        .unwrap();
    assert_eq!(
        sql,
        "SELECT 1 FROM t WHERE d >= 1545613320 * 1000 AND d <= 1546300740 * 1000"
    );
}

#[test]
fn test_adhoc_filter_injection_via_ast() {
    // adhoc filters must not reparse macro text: mutate the tree, print it
    let mut ast = Parser::parse("SELECT x FROM t WHERE a = 1").unwrap();
    ast.add_where("host = 'web-1'");
    assert_eq!(
        to_sql(&ast),
        "SELECT x FROM t WHERE a = 1 AND host = 'web-1'"
    );
}
