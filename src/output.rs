//! SQL serialization for parsed queries.
//!
//! The printer walks the recognized clause keys in fixed SQL grammar order
//! (WITH, macro call, SELECT, FROM, joins, PREWHERE, WHERE, GROUP BY,
//! HAVING, ORDER BY, LIMIT, UNION ALL, FORMAT), regardless of the order the
//! clauses appeared in the source. It serves callers that mutate the tree
//! directly, e.g. splicing an extra WHERE predicate, as an alternative to
//! the macro engine's raw-text rewriting.
//!
//! # Examples
//!
//! ```
//! use macroql::parser::Parser;
//! use macroql::output::to_sql;
//!
//! let mut ast = Parser::parse("SELECT x FROM t WHERE a = 1").unwrap();
//! ast.add_where("b = 2");
//! assert_eq!(to_sql(&ast), "SELECT x FROM t WHERE a = 1 AND b = 2");
//! ```

use crate::ast::{Arg, Clause, Join, Query};

pub struct SqlPrinter {
    pretty: bool,
}

impl SqlPrinter {
    pub fn new(pretty: bool) -> Self {
        SqlPrinter { pretty }
    }

    pub fn print(&self, query: &Query) -> String {
        self.print_query(query, 0)
    }

    fn print_query(&self, query: &Query, depth: usize) -> String {
        let mut parts: Vec<String> = Vec::new();

        if let Some(args) = fragments(query, "root") {
            parts.push(self.join_args(args, " ", depth));
        }
        if let Some(args) = fragments(query, "with") {
            parts.push(format!("WITH {}", self.join_args(args, ", ", depth)));
        }
        for key in query.keys() {
            if key.starts_with('$') {
                if let Some(Clause::Fragments(args)) = query.get(key) {
                    if !args.is_empty() {
                        parts.push(format!("{}({})", key, self.join_args(args, ", ", depth)));
                    }
                }
            }
        }
        if let Some(args) = fragments(query, "select") {
            parts.push(format!("SELECT {}", self.join_args(args, ", ", depth)));
        }
        match query.get("from") {
            Some(Clause::Fragments(args)) if !args.is_empty() => {
                parts.push(format!("FROM {}", self.join_args(args, ", ", depth)));
            }
            Some(Clause::SubQuery(sub)) => {
                parts.push(format!("FROM ({})", self.print_nested(sub, depth)));
            }
            _ => {}
        }
        if let Some(Clause::Joins(joins)) = query.get("join") {
            for join in joins {
                parts.push(self.print_join(join, depth));
            }
        }
        if let Some(args) = fragments(query, "prewhere") {
            parts.push(format!("PREWHERE {}", self.join_args(args, " ", depth)));
        }
        if let Some(args) = fragments(query, "where") {
            parts.push(format!("WHERE {}", self.join_args(args, " ", depth)));
        }
        if let Some(args) = fragments(query, "group by") {
            parts.push(format!("GROUP BY {}", self.join_args(args, ", ", depth)));
        }
        if let Some(args) = fragments(query, "having") {
            parts.push(format!("HAVING {}", self.join_args(args, " ", depth)));
        }
        if let Some(args) = fragments(query, "order by") {
            parts.push(format!("ORDER BY {}", self.join_args(args, ", ", depth)));
        }
        if let Some(args) = fragments(query, "limit") {
            parts.push(format!("LIMIT {}", self.join_args(args, ", ", depth)));
        }
        if let Some(Clause::Fragments(args)) = query.get("union all") {
            for arg in args {
                parts.push("UNION ALL".to_string());
                parts.push(match arg {
                    Arg::Nested(sub) => self.print_query(sub, depth),
                    Arg::Literal(s) => s.clone(),
                });
            }
        }
        if let Some(args) = fragments(query, "format") {
            parts.push(format!("FORMAT {}", self.join_args(args, " ", depth)));
        }

        parts.join(&self.separator(depth))
    }

    fn print_join(&self, join: &Join, depth: usize) -> String {
        let mut out = join.kind.to_uppercase();
        out.push(' ');
        match &join.source {
            Clause::SubQuery(sub) => {
                out.push('(');
                out.push_str(&self.print_nested(sub, depth));
                out.push(')');
            }
            Clause::Fragments(args) => out.push_str(&self.join_args(args, " ", depth)),
            Clause::Joins(_) => {}
        }
        for alias in &join.aliases {
            out.push(' ');
            out.push_str(alias);
        }
        if !join.using_.is_empty() {
            out.push_str(" USING ");
            out.push_str(&join.using_.join(", "));
        } else if !join.on.is_empty() {
            out.push_str(" ON ");
            out.push_str(&join.on.join(" "));
        }
        out
    }

    fn print_nested(&self, sub: &Query, depth: usize) -> String {
        if self.pretty {
            format!(
                "{}{}{}",
                self.separator(depth + 1),
                self.print_query(sub, depth + 1),
                self.separator(depth)
            )
        } else {
            self.print_query(sub, depth)
        }
    }

    fn join_args(&self, args: &[Arg], sep: &str, depth: usize) -> String {
        args.iter()
            .map(|arg| match arg {
                Arg::Literal(s) => s.clone(),
                Arg::Nested(sub) => format!("({})", self.print_nested(sub, depth)),
            })
            .collect::<Vec<_>>()
            .join(sep)
    }

    fn separator(&self, depth: usize) -> String {
        if self.pretty {
            format!("\n{}", "  ".repeat(depth))
        } else {
            " ".to_string()
        }
    }
}

fn fragments<'a>(query: &'a Query, key: &str) -> Option<&'a [Arg]> {
    match query.get(key) {
        Some(Clause::Fragments(args)) if !args.is_empty() => Some(args),
        _ => None,
    }
}

/// Render a query on one line, clauses separated by single spaces.
pub fn to_sql(query: &Query) -> String {
    SqlPrinter::new(false).print(query)
}

/// Render a query one clause per line, subqueries indented two spaces per
/// nesting level.
pub fn to_sql_pretty(query: &Query) -> String {
    SqlPrinter::new(true).print(query)
}
