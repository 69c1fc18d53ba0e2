use crate::ast::query::Clause;

/// One join attached to a query.
///
/// `source` is either a `Fragments` table reference (`db.events e`) or a
/// `SubQuery`. `on` holds free-form boolean fragments; `using_` holds the
/// identifier list of a USING clause. A join carries at most one of the two.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Normalized join phrase, e.g. `any left join`.
    pub kind: String,
    pub source: Clause,
    pub aliases: Vec<String>,
    pub using_: Vec<String>,
    pub on: Vec<String>,
}

impl Join {
    pub fn new(kind: &str) -> Self {
        Join {
            kind: kind.to_string(),
            source: Clause::empty(),
            aliases: Vec::new(),
            using_: Vec::new(),
            on: Vec::new(),
        }
    }
}
