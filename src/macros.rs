//! Macro dispatch and rewriting.
//!
//! The dispatcher inspects a parsed query for one supported macro key and
//! rewrites the raw query text around it: the macro's arguments come from
//! the tree, but everything from the FROM keyword onward is spliced back
//! verbatim, so comments and original line breaks inside the tail survive.
//! A query without a recognized macro passes through unchanged.

use crate::ast::{Arg, Clause, Query};
use crate::context::QueryContext;

/// Supported macro names, shared-prefix names first so textual search and
/// dispatch agree with the tokenizer tables.
pub const MACRO_NAMES: [&str; 14] = [
    "rateColumnsAggregated",
    "perSecondColumnsAggregated",
    "deltaColumnsAggregated",
    "increaseColumnsAggregated",
    "rateColumns",
    "perSecondColumns",
    "deltaColumns",
    "increaseColumns",
    "columnsMs",
    "columns",
    "rate",
    "perSecond",
    "delta",
    "increase",
];

#[derive(Debug, Clone)]
pub enum MacroError {
    WrongArity {
        name: String,
        expected: &'static str,
        args: Vec<String>,
    },
    MissingAlias {
        name: String,
        args: Vec<String>,
    },
    ClauseOrder {
        name: String,
        detail: String,
    },
    MissingFrom {
        name: String,
    },
}

impl std::fmt::Display for MacroError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MacroError::WrongArity {
                name,
                expected,
                args,
            } => write!(
                f,
                "{} requires {} arguments, parsed arguments are: {:?}",
                name, expected, args
            ),
            MacroError::MissingAlias { name, args } => write!(
                f,
                "some of the arguments passed to {} are without aliases: {:?}",
                name, args
            ),
            MacroError::ClauseOrder { name, detail } => {
                write!(f, "wrong clause order in {} tail: {}", name, detail)
            }
            MacroError::MissingFrom { name } => {
                write!(f, "{}(...) is not followed by a FROM clause", name)
            }
        }
    }
}

impl std::error::Error for MacroError {}

#[derive(Clone, Copy, PartialEq)]
enum Op {
    Rate,
    PerSecond,
    Delta,
    Increase,
}

impl Op {
    fn tag(self) -> &'static str {
        match self {
            Op::Rate => "Rate",
            Op::PerSecond => "PerSecond",
            Op::Delta => "Delta",
            Op::Increase => "Increase",
        }
    }
}

/// Scan the tree for a supported macro key with a non-empty argument array
/// and rewrite the query text around it. No key present: passthrough.
pub fn apply_macros(text: &str, ast: &Query, ctx: &QueryContext) -> Result<String, MacroError> {
    for key in ast.keys() {
        let Some(name) = key.strip_prefix('$') else {
            continue;
        };
        if !MACRO_NAMES.contains(&name) {
            continue;
        }
        let Some(Clause::Fragments(raw_args)) = ast.get(key) else {
            continue;
        };
        if raw_args.is_empty() {
            continue;
        }
        let args: Vec<String> = raw_args.iter().map(Arg::text).collect();
        let Some((before, tail)) = locate_macro(text, key)? else {
            continue;
        };
        let expanded = match name {
            "rate" => rate(key, &args, tail, ctx)?,
            "perSecond" => wrapped(Op::PerSecond, key, &args, tail, ctx)?,
            "delta" => wrapped(Op::Delta, key, &args, tail, ctx)?,
            "increase" => wrapped(Op::Increase, key, &args, tail, ctx)?,
            "columns" => columns(key, &args, tail, "$timeSeries")?,
            "columnsMs" => columns(key, &args, tail, "$timeSeriesMs")?,
            "rateColumns" => per_key(Op::Rate, key, &args, tail, ctx)?,
            "perSecondColumns" => per_key(Op::PerSecond, key, &args, tail, ctx)?,
            "deltaColumns" => per_key(Op::Delta, key, &args, tail, ctx)?,
            "increaseColumns" => per_key(Op::Increase, key, &args, tail, ctx)?,
            "rateColumnsAggregated" => aggregated(Op::Rate, key, &args, tail, ctx)?,
            "perSecondColumnsAggregated" => aggregated(Op::PerSecond, key, &args, tail, ctx)?,
            "deltaColumnsAggregated" => aggregated(Op::Delta, key, &args, tail, ctx)?,
            "increaseColumnsAggregated" => aggregated(Op::Increase, key, &args, tail, ctx)?,
            _ => continue,
        };
        return Ok(format!("{}{}", before, expanded));
    }
    Ok(text.to_string())
}

/// Locate the macro call in the original text: everything before `$name(`
/// is preserved verbatim, everything from the following FROM keyword onward
/// becomes the splice tail.
fn locate_macro<'a>(
    text: &'a str,
    key: &str,
) -> Result<Option<(&'a str, &'a str)>, MacroError> {
    let needle = format!("{}(", key);
    let Some(start) = text.find(&needle) else {
        return Ok(None);
    };
    let after_open = start + needle.len();
    let close = matching_paren(text, after_open).ok_or_else(|| MacroError::MissingFrom {
        name: key.to_string(),
    })?;
    let from_idx = find_keyword(&text[close..], "from")
        .map(|i| close + i)
        .ok_or_else(|| MacroError::MissingFrom {
            name: key.to_string(),
        })?;
    Ok(Some((&text[..start], &text[from_idx..])))
}

/// Byte offset just past the `)` matching an already-consumed `(`.
fn matching_paren(text: &str, mut i: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 1i32;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
        } else {
            match b {
                b'\'' | b'"' | b'`' => quote = Some(b),
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i + 1);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// First depth-0, word-bounded, case-insensitive occurrence of `word`.
/// Tracks paren depth only: by design this search is not quote-aware, so a
/// keyword inside a string literal can still match.
fn find_keyword(text: &str, word: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let wlen = word.len();
    let mut depth = 0i32;
    let mut i = 0;
    while i + wlen <= bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ => {
                if depth == 0
                    && (i == 0 || !is_word_byte(bytes[i - 1]))
                    && text[i..i + wlen].eq_ignore_ascii_case(word)
                    && bytes.get(i + wlen).map(|b| !is_word_byte(*b)).unwrap_or(true)
                {
                    return Some(i);
                }
            }
        }
        i += 1;
    }
    None
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// First depth-0 two-word clause occurrence, whitespace-run tolerant.
/// Returns the byte offset of the first word.
fn find_clause(text: &str, first: &str, second: Option<&str>) -> Option<usize> {
    let mut search_from = 0;
    while let Some(rel) = find_keyword(&text[search_from..], first) {
        let idx = search_from + rel;
        let Some(second) = second else {
            return Some(idx);
        };
        let after = &text[idx + first.len()..];
        let ws = after.len() - after.trim_start().len();
        if ws > 0 {
            let tail = &after[ws..];
            if tail.len() >= second.len()
                && tail.is_char_boundary(second.len())
                && tail[..second.len()].eq_ignore_ascii_case(second)
                && tail[second.len()..]
                    .bytes()
                    .next()
                    .map(|b| !is_word_byte(b))
                    .unwrap_or(true)
            {
                return Some(idx);
            }
        }
        search_from = idx + first.len();
    }
    None
}

struct TailClauses<'a> {
    head: &'a str,
    group_by: Option<&'a str>,
    having: Option<&'a str>,
    order_by: Option<&'a str>,
}

/// Pull depth-0 GROUP BY / HAVING / ORDER BY out of the raw tail so the
/// rewrite can relocate them. Required relative order is GROUP BY before
/// HAVING before ORDER BY; anything else is an authoring error.
fn extract_tail_clauses<'a>(name: &str, tail: &'a str) -> Result<TailClauses<'a>, MacroError> {
    let group_idx = find_clause(tail, "group", Some("by"));
    let having_idx = find_clause(tail, "having", None);
    let order_idx = find_clause(tail, "order", Some("by"));

    let ordered = |a: Option<usize>, b: Option<usize>| match (a, b) {
        (Some(x), Some(y)) => x < y,
        _ => true,
    };
    if !ordered(group_idx, having_idx) {
        return Err(MacroError::ClauseOrder {
            name: name.to_string(),
            detail: "GROUP BY must precede HAVING".to_string(),
        });
    }
    if !ordered(having_idx, order_idx) {
        return Err(MacroError::ClauseOrder {
            name: name.to_string(),
            detail: "HAVING must precede ORDER BY".to_string(),
        });
    }
    if !ordered(group_idx, order_idx) {
        return Err(MacroError::ClauseOrder {
            name: name.to_string(),
            detail: "GROUP BY must precede ORDER BY".to_string(),
        });
    }

    let mut boundaries: Vec<usize> = [group_idx, having_idx, order_idx]
        .into_iter()
        .flatten()
        .collect();
    boundaries.sort_unstable();
    let head_end = boundaries.first().copied().unwrap_or(tail.len());
    let slice = |start: Option<usize>| {
        start.map(|s| {
            let end = boundaries
                .iter()
                .copied()
                .find(|&b| b > s)
                .unwrap_or(tail.len());
            tail[s..end].trim()
        })
    };

    Ok(TailClauses {
        head: tail[..head_end].trim_end(),
        group_by: slice(group_idx),
        having: slice(having_idx),
        order_by: slice(order_idx),
    })
}

/// Inject the range filter into a raw tail: the first depth-0 WHERE gets
/// `$timeFilter AND` spliced in, a tail without one gets a WHERE appended.
fn apply_time_filter(tail: &str) -> String {
    match find_keyword(tail, "where") {
        Some(idx) => format!(
            "{}WHERE $timeFilter AND{}",
            &tail[..idx],
            &tail[idx + "where".len()..]
        ),
        None => format!("{} WHERE $timeFilter", tail),
    }
}

fn has_alias(arg: &str) -> bool {
    let trimmed = arg.trim();
    trimmed.contains(char::is_whitespace) && !trimmed.ends_with(')')
}

fn alias_of(arg: &str) -> &str {
    arg.trim()
        .rsplit(char::is_whitespace)
        .next()
        .unwrap_or(arg)
}

fn require_aliases(name: &str, args: &[String]) -> Result<(), MacroError> {
    if args.iter().all(|a| has_alias(a)) {
        Ok(())
    } else {
        Err(MacroError::MissingAlias {
            name: name.to_string(),
            args: args.to_vec(),
        })
    }
}

/// The two arithmetic strategies. Both must agree bit-for-bit on ordered
/// single-partition input, including the first-row zero of a running
/// difference, hence the self-defaulting lagInFrame.
struct Arith {
    window: bool,
    order: String,
}

impl Arith {
    fn new(window: bool, order: &str) -> Self {
        Arith {
            window,
            order: order.to_string(),
        }
    }

    fn time_delta(&self) -> String {
        if self.window {
            format!(
                "(t/1000 - lagInFrame(t/1000, 1, t/1000) OVER (ORDER BY {}))",
                self.order
            )
        } else {
            "runningDifference(t/1000)".to_string()
        }
    }

    fn value_delta(&self, x: &str) -> String {
        if self.window {
            format!(
                "({x} - lagInFrame({x}, 1, {x}) OVER (ORDER BY {}))",
                self.order,
                x = x
            )
        } else {
            format!("runningDifference({})", x)
        }
    }

    fn key_change(&self, k: &str) -> String {
        if self.window {
            format!(
                "{k} != lagInFrame({k}, 1, {k}) OVER (ORDER BY {})",
                self.order,
                k = k
            )
        } else {
            format!("{k} != neighbor({k}, -1, {k})", k = k)
        }
    }
}

fn rate(name: &str, args: &[String], tail: &str, ctx: &QueryContext) -> Result<String, MacroError> {
    require_aliases(name, args)?;
    let arith = Arith::new(ctx.use_window_funcs, "t");
    let cols: Vec<String> = args
        .iter()
        .map(|arg| {
            let alias = alias_of(arg);
            format!("{}/{} {}Rate", alias, arith.time_delta(), alias)
        })
        .collect();
    Ok(format!(
        "SELECT t, {} FROM ( SELECT $timeSeries AS t, {} {} GROUP BY t ORDER BY t)",
        cols.join(", "),
        args.join(", "),
        apply_time_filter(tail)
    ))
}

/// $perSecond / $delta / $increase: bare expressions auto-wrapped in max()
/// with synthetic aliases, derived in the outer row.
fn wrapped(
    op: Op,
    name: &str,
    args: &[String],
    tail: &str,
    ctx: &QueryContext,
) -> Result<String, MacroError> {
    if args.is_empty() {
        return Err(MacroError::WrongArity {
            name: name.to_string(),
            expected: "one or more",
            args: args.to_vec(),
        });
    }
    let arith = Arith::new(ctx.use_window_funcs, "t");
    let inner: Vec<String> = args
        .iter()
        .enumerate()
        .map(|(i, arg)| format!("max({}) AS max_{}", arg, i))
        .collect();
    let outer: Vec<String> = (0..args.len())
        .map(|i| {
            let vd = arith.value_delta(&format!("max_{}", i));
            let td = arith.time_delta();
            match op {
                Op::PerSecond => {
                    format!("if({vd} < 0, nan, {vd} / {td}) max_{i}PerSecondRate", vd = vd, td = td, i = i)
                }
                Op::Delta => format!("{} max_{}Delta", vd, i),
                Op::Increase => format!("if({vd} < 0, 0, {vd}) max_{i}Increase", vd = vd, i = i),
                Op::Rate => unreachable!("$rate uses explicit aliases"),
            }
        })
        .collect();
    Ok(format!(
        "SELECT t, {} FROM ( SELECT $timeSeries AS t, {} {} GROUP BY t ORDER BY t)",
        outer.join(", "),
        inner.join(", "),
        apply_time_filter(tail)
    ))
}

/// $columns / $columnsMs: inner time-bucketed select, outer pivot keyed by
/// the time bucket via groupArray.
fn columns(name: &str, args: &[String], tail: &str, bucket: &str) -> Result<String, MacroError> {
    if args.len() != 2 {
        return Err(MacroError::WrongArity {
            name: name.to_string(),
            expected: "exactly two",
            args: args.to_vec(),
        });
    }
    require_aliases(name, args)?;
    let (key, value) = (&args[0], &args[1]);
    let key_alias = alias_of(key);
    let value_alias = alias_of(value);

    let clauses = extract_tail_clauses(name, tail)?;
    let head = apply_time_filter(clauses.head);
    let group_by = clauses
        .group_by
        .map(str::to_string)
        .unwrap_or_else(|| format!("GROUP BY t, {}", key_alias));
    let having = clauses
        .having
        .map(|h| format!(" {}", h))
        .unwrap_or_default();
    let order_by = clauses
        .order_by
        .map(str::to_string)
        .unwrap_or_else(|| "ORDER BY t".to_string());

    Ok(format!(
        "SELECT t, groupArray(({key_alias}, {value_alias})) AS groupArr FROM ( SELECT {bucket} AS t, {key}, {value} {head} {group_by}{having} {order_by}) GROUP BY t ORDER BY t",
        key_alias = key_alias,
        value_alias = value_alias,
        bucket = bucket,
        key = key,
        value = value,
        head = head,
        group_by = group_by,
        having = having,
        order_by = order_by,
    ))
}

/// Per-key column macros: the derived value resets to the operator's
/// sentinel on every partition-key change between adjacent rows.
fn per_key(
    op: Op,
    name: &str,
    args: &[String],
    tail: &str,
    ctx: &QueryContext,
) -> Result<String, MacroError> {
    if args.len() != 2 {
        return Err(MacroError::WrongArity {
            name: name.to_string(),
            expected: "exactly two",
            args: args.to_vec(),
        });
    }
    require_aliases(name, args)?;
    let (key, value) = (&args[0], &args[1]);
    let key_alias = alias_of(key);
    let value_alias = alias_of(value);

    let order = format!("{}, t", key_alias);
    let arith = Arith::new(ctx.use_window_funcs, &order);
    let kc = arith.key_change(key_alias);
    let td = arith.time_delta();
    let vd = arith.value_delta(value_alias);
    let derived_alias = format!("{}{}", value_alias, op.tag());
    let derived = match op {
        Op::Rate => format!("if({kc}, 0, {v} / {td}) AS {a}", kc = kc, v = value_alias, td = td, a = derived_alias),
        Op::PerSecond => format!(
            "if({kc} OR {vd} < 0, nan, {vd} / {td}) AS {a}",
            kc = kc,
            vd = vd,
            td = td,
            a = derived_alias
        ),
        Op::Delta => format!("if({kc}, 0, {vd}) AS {a}", kc = kc, vd = vd, a = derived_alias),
        Op::Increase => format!(
            "if({kc} OR {vd} < 0, 0, {vd}) AS {a}",
            kc = kc,
            vd = vd,
            a = derived_alias
        ),
    };

    let clauses = extract_tail_clauses(name, tail)?;
    let head = apply_time_filter(clauses.head);
    let group_by = clauses
        .group_by
        .map(str::to_string)
        .unwrap_or_else(|| format!("GROUP BY t, {}", key_alias));
    let having = clauses
        .having
        .map(|h| format!(" {}", h))
        .unwrap_or_default();

    Ok(format!(
        "SELECT t, groupArray(({key_alias}, {derived_alias})) AS groupArr FROM ( SELECT t, {key_alias}, {derived} FROM ( SELECT $timeSeries AS t, {key}, {value} {head} {group_by}{having} ORDER BY {order})) GROUP BY t ORDER BY t",
        key_alias = key_alias,
        derived_alias = derived_alias,
        derived = derived,
        key = key,
        value = value,
        head = head,
        group_by = group_by,
        having = having,
        order = order,
    ))
}

/// $*ColumnsAggregated: raw per-(key, subkey, bucket) aggregation, per-row
/// derived metric with subkey-boundary reset, then re-aggregation over the
/// subkey with the caller-supplied aggregate per metric.
fn aggregated(
    op: Op,
    name: &str,
    args: &[String],
    tail: &str,
    ctx: &QueryContext,
) -> Result<String, MacroError> {
    if args.len() < 4 || (args.len() - 2) % 2 != 0 {
        return Err(MacroError::WrongArity {
            name: name.to_string(),
            expected: "key, subkey, then aggregate/value pairs",
            args: args.to_vec(),
        });
    }
    let (key, subkey) = (&args[0], &args[1]);
    require_aliases(name, &args[..2])?;
    let key_alias = alias_of(key);
    let sub_alias = alias_of(subkey);
    let pairs: Vec<(&String, &String)> = args[2..].chunks(2).map(|c| (&c[0], &c[1])).collect();

    let order = format!("{}, {}, t", key_alias, sub_alias);
    let arith = Arith::new(ctx.use_window_funcs, &order);
    let kc = arith.key_change(sub_alias);
    let td = arith.time_delta();

    let level1: Vec<String> = pairs
        .iter()
        .enumerate()
        .map(|(i, (_, value))| format!("max({}) AS max_{}", value, i))
        .collect();
    let level2: Vec<String> = (0..pairs.len())
        .map(|i| {
            let value = format!("max_{}", i);
            let vd = arith.value_delta(&value);
            let alias = format!("max_{}_{}", i, op.tag());
            match op {
                Op::Rate => format!("if({kc}, 0, {v} / {td}) AS {a}", kc = kc, v = value, td = td, a = alias),
                Op::PerSecond => format!(
                    "if({kc} OR {vd} < 0, nan, {vd} / {td}) AS {a}",
                    kc = kc,
                    vd = vd,
                    td = td,
                    a = alias
                ),
                Op::Delta => format!("if({kc}, 0, {vd}) AS {a}", kc = kc, vd = vd, a = alias),
                Op::Increase => format!(
                    "if({kc} OR {vd} < 0, 0, {vd}) AS {a}",
                    kc = kc,
                    vd = vd,
                    a = alias
                ),
            }
        })
        .collect();
    let level3: Vec<String> = pairs
        .iter()
        .enumerate()
        .map(|(i, (agg, _))| {
            let alias = format!("max_{}_{}", i, op.tag());
            format!("{}({}) AS {}Agg", agg.trim(), alias, alias)
        })
        .collect();

    let clauses = extract_tail_clauses(name, tail)?;
    let head = apply_time_filter(clauses.head);
    let having = clauses
        .having
        .map(|h| format!(" {}", h))
        .unwrap_or_default();

    Ok(format!(
        "SELECT t, {key_alias}, {level3} FROM ( SELECT t, {key_alias}, {sub_alias}, {level2} FROM ( SELECT $timeSeries AS t, {key}, {subkey}, {level1} {head} GROUP BY t, {key_alias}, {sub_alias}{having} ORDER BY {order})) GROUP BY t, {key_alias} ORDER BY t",
        key_alias = key_alias,
        sub_alias = sub_alias,
        level3 = level3.join(", "),
        level2 = level2.join(", "),
        level1 = level1.join(", "),
        key = key,
        subkey = subkey,
        head = head,
        having = having,
        order = order,
    ))
}
