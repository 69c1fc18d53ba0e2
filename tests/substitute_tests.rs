// tests/substitute_tests.rs

use macroql::context::{DateTimeType, QueryContext};
use macroql::substitute::{
    effective_interval, effective_range, escape_identifier, escape_table_identifier,
    parse_duration_seconds, range_predicate, substitute, table_identifier, time_filter,
    time_series, unescape, SubstituteError,
};

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

fn ctx_with(date_time_type: DateTimeType) -> QueryContext {
    QueryContext {
        date_time_type,
        ..ctx()
    }
}

// ============================================================================
// Interval resolution
// ============================================================================

#[test]
fn test_explicit_interval() {
    assert_eq!(effective_interval(&ctx()).unwrap(), 15);
}

#[test]
fn test_duration_units() {
    assert_eq!(parse_duration_seconds("90s").unwrap(), 90);
    assert_eq!(parse_duration_seconds("2m").unwrap(), 120);
    assert_eq!(parse_duration_seconds("1h").unwrap(), 3600);
    assert_eq!(parse_duration_seconds("1d").unwrap(), 86400);
    // sub-second intervals floor at one second
    assert_eq!(parse_duration_seconds("500ms").unwrap(), 1);
}

#[test]
fn test_malformed_interval_is_surfaced() {
    let err = parse_duration_seconds("soon").unwrap_err();
    assert!(matches!(err, SubstituteError::BadInterval(s) if s == "soon"));
}

#[test]
fn test_derived_interval_from_point_budget() {
    let ctx = QueryContext {
        interval: String::new(),
        from: 0,
        to: 600,
        max_data_points: 30,
        ..ctx()
    };
    assert_eq!(effective_interval(&ctx).unwrap(), 20);
}

#[test]
fn test_derived_interval_floors_at_one_second() {
    let ctx = QueryContext {
        interval: String::new(),
        from: 0,
        to: 10,
        max_data_points: 10000,
        ..ctx()
    };
    assert_eq!(effective_interval(&ctx).unwrap(), 1);
}

#[test]
fn test_interval_factor_scales() {
    let ctx = QueryContext {
        interval_factor: 4,
        ..ctx()
    };
    assert_eq!(effective_interval(&ctx).unwrap(), 60);
}

#[test]
fn test_interval_snaps_up_to_rounding_step() {
    let ctx = QueryContext {
        interval: "45s".to_string(),
        round: "30s".to_string(),
        ..ctx()
    };
    assert_eq!(effective_interval(&ctx).unwrap(), 60);
}

// ============================================================================
// Rounding
// ============================================================================

#[test]
fn test_no_rounding_keeps_range() {
    assert_eq!(effective_range(&ctx()).unwrap(), (1545613320, 1546300740));
}

#[test]
fn test_rounding_truncates_then_widens() {
    let ctx = QueryContext {
        round: "60s".to_string(),
        from: 125,
        to: 250,
        ..ctx()
    };
    // truncated to 120/240, widened by 2*60-1 on both ends
    assert_eq!(effective_range(&ctx).unwrap(), (1, 359));
}

// ============================================================================
// Time-bucket expressions
// ============================================================================

#[test]
fn test_time_series_datetime() {
    assert_eq!(
        time_series(&ctx(), 15),
        "(intDiv(toUInt32(d), 15) * 15) * 1000"
    );
}

#[test]
fn test_time_series_per_representation() {
    let cases = [
        (
            DateTimeType::DateTime64,
            "(intDiv(toFloat64(d) * 1000, (15 * 1000)) * (15 * 1000))",
        ),
        (
            DateTimeType::Float,
            "(intDiv(d * 1000, (15 * 1000)) * (15 * 1000))",
        ),
        (DateTimeType::Timestamp, "(intDiv(d, 15) * 15) * 1000"),
        (
            DateTimeType::Timestamp64Milli,
            "(intDiv(d, (15 * 1000)) * (15 * 1000))",
        ),
        (
            DateTimeType::Timestamp64Micro,
            "(intDiv(d / 1000, (15 * 1000)) * (15 * 1000))",
        ),
        (
            DateTimeType::Timestamp64Nano,
            "(intDiv(d / 1000000, (15 * 1000)) * (15 * 1000))",
        ),
    ];
    for (dtt, expected) in cases {
        assert_eq!(time_series(&ctx_with(dtt), 15), expected, "{:?}", dtt);
    }
}

// ============================================================================
// Range filters
// ============================================================================

#[test]
fn test_time_filter_datetime() {
    assert_eq!(
        time_filter(&ctx(), 1545613320, 1546300740),
        "d >= toDateTime(1545613320) AND d <= toDateTime(1546300740)"
    );
}

#[test]
fn test_time_filter_with_date_column() {
    let ctx = QueryContext {
        date_col: "day".to_string(),
        ..ctx()
    };
    assert_eq!(
        time_filter(&ctx, 1545613320, 1546300740),
        "day >= toDate(1545613320) AND day <= toDate(1546300740) AND d >= toDateTime(1545613320) AND d <= toDateTime(1546300740)"
    );
}

#[test]
fn test_range_filter_per_representation() {
    let cases = [
        (DateTimeType::DateTime64, "d >= toDateTime64(10, 3) AND d <= toDateTime64(20, 3)"),
        (DateTimeType::Float, "d >= 10 AND d <= 20"),
        (DateTimeType::Timestamp, "d >= 10 AND d <= 20"),
        (DateTimeType::Timestamp64Milli, "d >= 10 * 1000 AND d <= 20 * 1000"),
        (DateTimeType::Timestamp64Micro, "d >= 10 * 1000000 AND d <= 20 * 1000000"),
        (DateTimeType::Timestamp64Nano, "d >= 10 * 1000000000 AND d <= 20 * 1000000000"),
    ];
    for (dtt, expected) in cases {
        assert_eq!(range_predicate("d", dtt, 10, 20), expected, "{:?}", dtt);
    }
}

#[test]
fn test_filter_holds_at_both_endpoints() {
    // inclusive comparisons on both ends for every representation
    for dtt in [
        DateTimeType::DateTime,
        DateTimeType::DateTime64,
        DateTimeType::Float,
        DateTimeType::Timestamp,
        DateTimeType::Timestamp64Milli,
        DateTimeType::Timestamp64Micro,
        DateTimeType::Timestamp64Nano,
    ] {
        let predicate = range_predicate("d", dtt, 10, 20);
        assert!(predicate.contains("d >= "), "{:?}: {}", dtt, predicate);
        assert!(predicate.contains("d <= "), "{:?}: {}", dtt, predicate);
    }
}

#[test]
fn test_time_filter_by_column() {
    let out = substitute("WHERE $timeFilterByColumn(updated_at)", &ctx()).unwrap();
    assert_eq!(
        out,
        "WHERE updated_at >= toDateTime(1545613320) AND updated_at <= toDateTime(1546300740)"
    );
}

// ============================================================================
// Identifier escaping
// ============================================================================

#[test]
fn test_safe_identifiers_stay_bare() {
    assert_eq!(escape_identifier("EventTime"), "EventTime");
    assert_eq!(escape_identifier("col_1"), "col_1");
}

#[test]
fn test_expressions_stay_bare() {
    assert_eq!(escape_identifier("toStartOfHour(d)"), "toStartOfHour(d)");
    assert_eq!(escape_identifier("a+b"), "a+b");
    assert_eq!(escape_identifier("ts/1000"), "ts/1000");
}

#[test]
fn test_unsafe_identifier_is_double_quoted() {
    assert_eq!(escape_identifier("event time"), "\"event time\"");
    assert_eq!(escape_identifier("weird\"col"), "\"weird\\\"col\"");
}

#[test]
fn test_table_identifier_uses_backticks() {
    assert_eq!(escape_table_identifier("requests"), "requests");
    assert_eq!(escape_table_identifier("my-db"), "`my-db`");
    let ctx = QueryContext {
        database: "my-db".to_string(),
        ..ctx()
    };
    assert_eq!(table_identifier(&ctx), "`my-db`.requests");
}

// ============================================================================
// Scalar placeholders
// ============================================================================

#[test]
fn test_scalar_placeholders() {
    let out = substitute(
        "SELECT $from, $to, $__from, $__to, $interval, $__interval_ms, $dateTimeCol FROM $table",
        &ctx(),
    )
    .unwrap();
    assert_eq!(
        out,
        "SELECT 1545613320, 1546300740, 1545613320000, 1546300740000, 15, 15000, d FROM default.requests"
    );
}

#[test]
fn test_time_series_ms_is_replaced_before_time_series() {
    let out = substitute("SELECT $timeSeriesMs, $timeSeries", &ctx()).unwrap();
    assert_eq!(
        out,
        "SELECT (intDiv(toUInt32(d) * 1000, 15000) * 15000), (intDiv(toUInt32(d), 15) * 15) * 1000"
    );
}

// ============================================================================
// $unescape
// ============================================================================

#[test]
fn test_unescape_strips_one_quote_layer() {
    assert_eq!(unescape("SELECT $unescape('max(v)')").unwrap(), "SELECT max(v)");
}

#[test]
fn test_unescape_repeats_until_none_remain() {
    assert_eq!(
        unescape("$unescape('a') = $unescape('b')").unwrap(),
        "a = b"
    );
}

#[test]
fn test_unescape_without_close_is_an_error() {
    assert!(matches!(
        unescape("SELECT $unescape('x'").unwrap_err(),
        SubstituteError::UnbalancedUnescape(_)
    ));
}
