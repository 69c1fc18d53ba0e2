//! Time substitution: interval resolution, bucket and range-filter
//! generation per time representation, scalar placeholder replacement with
//! identifier escaping, and the `$unescape` pass.
//!
//! Runs over the macro-rewritten text, independent of the macro engine.

use std::sync::LazyLock;

use regex::Regex;

use crate::context::{DateTimeType, QueryContext};

static SAFE_IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][0-9a-zA-Z_]*$").unwrap());

// An argument that already carries a call or arithmetic is passed through:
// quoting `toStartOfHour(d)` would break it.
static CALL_OR_ARITH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[()*/+%-]").unwrap());

static INTERVAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)(ms|s|m|h|d|w|y)?$").unwrap());

static TIME_FILTER_BY_COL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$timeFilterByColumn\(([^)]+)\)").unwrap());

#[derive(Debug, Clone)]
pub enum SubstituteError {
    /// Interval or rounding string did not parse as a duration
    BadInterval(String),
    /// `$unescape(` without a closing parenthesis
    UnbalancedUnescape(String),
}

impl std::fmt::Display for SubstituteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubstituteError::BadInterval(s) => write!(f, "malformed interval: {:?}", s),
            SubstituteError::UnbalancedUnescape(s) => {
                write!(f, "$unescape without closing parenthesis: {}", s)
            }
        }
    }
}

impl std::error::Error for SubstituteError {}

/// Parse a duration string into whole seconds, floored at one.
pub fn parse_duration_seconds(s: &str) -> Result<i64, SubstituteError> {
    let caps = INTERVAL_RE
        .captures(s)
        .ok_or_else(|| SubstituteError::BadInterval(s.to_string()))?;
    let n: i64 = caps[1]
        .parse()
        .map_err(|_| SubstituteError::BadInterval(s.to_string()))?;
    let seconds = match caps.get(2).map(|m| m.as_str()).unwrap_or("s") {
        "ms" => n / 1000,
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        "d" => n * 86400,
        "w" => n * 604800,
        "y" => n * 31536000,
        _ => n,
    };
    Ok(seconds.max(1))
}

fn round_step(ctx: &QueryContext) -> Result<i64, SubstituteError> {
    let spec = ctx.round.trim();
    if spec.is_empty() || spec == "0" || spec == "0s" {
        return Ok(0);
    }
    parse_duration_seconds(spec)
}

/// Effective bucket width in seconds: explicit interval if given, otherwise
/// derived from the point budget over the span; floored at one second,
/// scaled by the interval factor, and snapped up to the rounding step.
pub fn effective_interval(ctx: &QueryContext) -> Result<i64, SubstituteError> {
    let mut seconds = if ctx.interval.trim().is_empty() {
        let span = (ctx.to - ctx.from).max(1);
        let budget = ctx.max_data_points.max(1);
        (span / budget).max(1)
    } else {
        parse_duration_seconds(ctx.interval.trim())?
    };
    seconds *= ctx.interval_factor.max(1);
    let step = round_step(ctx)?;
    if step > 0 {
        seconds = ((seconds + step - 1) / step) * step;
    }
    Ok(seconds)
}

/// The filtered time range in epoch seconds. An active rounding step
/// truncates both endpoints to the step, then widens the range on both ends
/// by `2*step - 1` seconds so boundary points cannot fall out.
pub fn effective_range(ctx: &QueryContext) -> Result<(i64, i64), SubstituteError> {
    let step = round_step(ctx)?;
    let (mut from, mut to) = (ctx.from, ctx.to);
    if step > 0 {
        from -= from.rem_euclid(step);
        to -= to.rem_euclid(step);
        from -= 2 * step - 1;
        to += 2 * step - 1;
    }
    Ok((from, to))
}

/// Column identifier escaping: bare when it is a safe identifier or already
/// an expression, double-quoted otherwise.
pub fn escape_identifier(identifier: &str) -> String {
    if SAFE_IDENT_RE.is_match(identifier) || CALL_OR_ARITH_RE.is_match(identifier) {
        identifier.to_string()
    } else {
        format!("\"{}\"", identifier.replace('"', "\\\""))
    }
}

/// Table and database parts use the backtick convention instead.
pub fn escape_table_identifier(identifier: &str) -> String {
    if SAFE_IDENT_RE.is_match(identifier) {
        identifier.to_string()
    } else {
        format!("`{}`", identifier.replace('`', "\\`"))
    }
}

/// Dot-qualified, escaped table reference for `$table`.
pub fn table_identifier(ctx: &QueryContext) -> String {
    if ctx.database.is_empty() {
        escape_table_identifier(&ctx.table)
    } else {
        format!(
            "{}.{}",
            escape_table_identifier(&ctx.database),
            escape_table_identifier(&ctx.table)
        )
    }
}

/// Time-bucket expression, always normalized to milliseconds output.
pub fn time_series(ctx: &QueryContext, interval: i64) -> String {
    let col = escape_identifier(&ctx.date_time_col);
    let i = interval;
    match ctx.date_time_type {
        DateTimeType::DateTime => {
            format!("(intDiv(toUInt32({}), {}) * {}) * 1000", col, i, i)
        }
        DateTimeType::DateTime64 => format!(
            "(intDiv(toFloat64({}) * 1000, ({} * 1000)) * ({} * 1000))",
            col, i, i
        ),
        DateTimeType::Float => {
            format!("(intDiv({} * 1000, ({} * 1000)) * ({} * 1000))", col, i, i)
        }
        DateTimeType::Timestamp => format!("(intDiv({}, {}) * {}) * 1000", col, i, i),
        DateTimeType::Timestamp64Milli => {
            format!("(intDiv({}, ({} * 1000)) * ({} * 1000))", col, i, i)
        }
        DateTimeType::Timestamp64Micro => {
            format!("(intDiv({} / 1000, ({} * 1000)) * ({} * 1000))", col, i, i)
        }
        DateTimeType::Timestamp64Nano => {
            format!("(intDiv({} / 1000000, ({} * 1000)) * ({} * 1000))", col, i, i)
        }
    }
}

/// Millisecond-resolution bucket for the Ms macro variants.
pub fn time_series_ms(ctx: &QueryContext, interval_ms: i64) -> String {
    let col = escape_identifier(&ctx.date_time_col);
    let m = interval_ms;
    match ctx.date_time_type {
        DateTimeType::DateTime => {
            format!("(intDiv(toUInt32({}) * 1000, {}) * {})", col, m, m)
        }
        DateTimeType::DateTime64 => {
            format!("(intDiv(toFloat64({}) * 1000, {}) * {})", col, m, m)
        }
        DateTimeType::Float | DateTimeType::Timestamp => {
            format!("(intDiv({} * 1000, {}) * {})", col, m, m)
        }
        DateTimeType::Timestamp64Milli => format!("(intDiv({}, {}) * {})", col, m, m),
        DateTimeType::Timestamp64Micro => format!("(intDiv({} / 1000, {}) * {})", col, m, m),
        DateTimeType::Timestamp64Nano => {
            format!("(intDiv({} / 1000000, {}) * {})", col, m, m)
        }
    }
}

fn convert_seconds(dtt: DateTimeType, ts: i64) -> String {
    match dtt {
        DateTimeType::DateTime => format!("toDateTime({})", ts),
        DateTimeType::DateTime64 => format!("toDateTime64({}, 3)", ts),
        DateTimeType::Float | DateTimeType::Timestamp => ts.to_string(),
        DateTimeType::Timestamp64Milli => format!("{} * 1000", ts),
        DateTimeType::Timestamp64Micro => format!("{} * 1000000", ts),
        DateTimeType::Timestamp64Nano => format!("{} * 1000000000", ts),
    }
}

fn convert_millis(dtt: DateTimeType, ms: i64) -> String {
    match dtt {
        DateTimeType::DateTime => format!("toDateTime({})", ms / 1000),
        DateTimeType::DateTime64 => format!("toDateTime64({:.3}, 3)", ms as f64 / 1000.0),
        DateTimeType::Float | DateTimeType::Timestamp => format!("{:.3}", ms as f64 / 1000.0),
        DateTimeType::Timestamp64Milli => ms.to_string(),
        DateTimeType::Timestamp64Micro => format!("{} * 1000", ms),
        DateTimeType::Timestamp64Nano => format!("{} * 1000000", ms),
    }
}

/// Range predicate over one column. True at both endpoints for any
/// `from <= to`.
pub fn range_predicate(column: &str, dtt: DateTimeType, from: i64, to: i64) -> String {
    format!(
        "{} >= {} AND {} <= {}",
        column,
        convert_seconds(dtt, from),
        column,
        convert_seconds(dtt, to)
    )
}

/// The `$timeFilter` predicate: optional date-column prefilter plus the
/// range predicate over the primary time column.
pub fn time_filter(ctx: &QueryContext, from: i64, to: i64) -> String {
    let range = range_predicate(
        &escape_identifier(&ctx.date_time_col),
        ctx.date_time_type,
        from,
        to,
    );
    if ctx.date_col.is_empty() {
        range
    } else {
        let date = escape_identifier(&ctx.date_col);
        format!(
            "{} >= toDate({}) AND {} <= toDate({}) AND {}",
            date, from, date, to, range
        )
    }
}

fn time_filter_ms(ctx: &QueryContext, from_ms: i64, to_ms: i64) -> String {
    let col = escape_identifier(&ctx.date_time_col);
    let range = format!(
        "{} >= {} AND {} <= {}",
        col,
        convert_millis(ctx.date_time_type, from_ms),
        col,
        convert_millis(ctx.date_time_type, to_ms)
    );
    if ctx.date_col.is_empty() {
        range
    } else {
        let date = escape_identifier(&ctx.date_col);
        format!(
            "{} >= toDate({}) AND {} <= toDate({}) AND {}",
            date,
            from_ms / 1000,
            date,
            to_ms / 1000,
            range
        )
    }
}

/// Strip one quoting layer from every `$unescape('...')`, repeating until
/// none remain. The closing parenthesis is found by paren counting alone;
/// escaped quotes inside the literal are not special-cased.
pub fn unescape(text: &str) -> Result<String, SubstituteError> {
    const OPEN: &str = "$unescape(";
    let mut query = text.to_string();
    while let Some(start) = query.find(OPEN) {
        let close = closing_paren(&query, start + OPEN.len()).ok_or_else(|| {
            SubstituteError::UnbalancedUnescape(query[start..].chars().take(40).collect())
        })?;
        let inner = query[start + OPEN.len()..close].trim();
        let inner = inner.strip_prefix('\'').unwrap_or(inner);
        let inner = inner.strip_suffix('\'').unwrap_or(inner);
        query = format!("{}{}{}", &query[..start], inner, &query[close + 1..]);
    }
    Ok(query)
}

fn closing_paren(text: &str, from: usize) -> Option<usize> {
    let mut depth = 1i32;
    for (i, b) in text.as_bytes().iter().enumerate().skip(from) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Resolve every placeholder in the text. Longer placeholder names are
/// replaced before their prefixes so `$timeSeriesMs` never decays into a
/// substituted `$timeSeries` plus a dangling `Ms`.
pub fn substitute(text: &str, ctx: &QueryContext) -> Result<String, SubstituteError> {
    let interval = effective_interval(ctx)?;
    let interval_ms = interval * 1000;
    let (from, to) = effective_range(ctx)?;
    let (from_ms, to_ms) = (from * 1000, to * 1000);

    let mut query = TIME_FILTER_BY_COL_RE
        .replace_all(text, |caps: &regex::Captures| {
            range_predicate(
                &escape_identifier(caps[1].trim()),
                ctx.date_time_type,
                from,
                to,
            )
        })
        .into_owned();
    query = query.replace("$timeSeriesMs", &time_series_ms(ctx, interval_ms));
    query = query.replace("$timeSeries", &time_series(ctx, interval));
    query = query.replace("$timeFilterMs", &time_filter_ms(ctx, from_ms, to_ms));
    query = query.replace("$timeFilter", &time_filter(ctx, from, to));
    query = query.replace("$table", &table_identifier(ctx));
    query = query.replace("$dateTimeCol", &escape_identifier(&ctx.date_time_col));
    query = query.replace("$dateCol", &escape_identifier(&ctx.date_col));
    query = query.replace("$__interval_ms", &interval_ms.to_string());
    query = query.replace("$interval", &interval.to_string());
    query = query.replace("$__from", &from_ms.to_string());
    query = query.replace("$__to", &to_ms.to_string());
    query = query.replace("$from", &from.to_string());
    query = query.replace("$to", &to.to_string());
    unescape(&query)
}
