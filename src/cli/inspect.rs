use serde_json::{json, Value};

use crate::ast::{Arg, Clause, Query};
use crate::cli::CliError;
use crate::parser::Parser;

pub struct InspectOptions {
    pub query: String,
    pub pretty: bool,
}

/// Parse the query and dump the clause tree as JSON.
pub fn execute_inspect(options: &InspectOptions) -> Result<String, CliError> {
    let ast = Parser::parse(&options.query)?;
    let value = query_to_value(&ast);
    let out = if options.pretty {
        serde_json::to_string_pretty(&value)?
    } else {
        serde_json::to_string(&value)?
    };
    Ok(out)
}

fn query_to_value(query: &Query) -> Value {
    let mut map = serde_json::Map::new();
    for (key, clause) in query.iter() {
        if clause.is_empty() {
            continue;
        }
        map.insert(key.to_string(), clause_to_value(clause));
    }
    Value::Object(map)
}

fn clause_to_value(clause: &Clause) -> Value {
    match clause {
        Clause::Fragments(args) => Value::Array(
            args.iter()
                .map(|arg| match arg {
                    Arg::Literal(s) => Value::String(s.clone()),
                    Arg::Nested(sub) => query_to_value(sub),
                })
                .collect(),
        ),
        Clause::SubQuery(sub) => query_to_value(sub),
        Clause::Joins(joins) => Value::Array(
            joins
                .iter()
                .map(|join| {
                    json!({
                        "kind": join.kind,
                        "source": clause_to_value(&join.source),
                        "aliases": join.aliases,
                        "using": join.using_,
                        "on": join.on,
                    })
                })
                .collect(),
        ),
    }
}
