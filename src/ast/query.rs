use crate::ast::join::Join;

/// One argument of a clause: either a literal SQL fragment or a nested
/// sub-tree (subquery, union branch, macro argument block).
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Literal(String),
    Nested(Query),
}

impl Arg {
    /// The argument as flat text. Nested sub-trees are rendered compactly.
    pub fn text(&self) -> String {
        match self {
            Arg::Literal(s) => s.clone(),
            Arg::Nested(q) => crate::output::to_sql(q),
        }
    }
}

/// The value stored under one clause key.
///
/// A clause is in exactly one form: an ordered argument sequence, a full
/// nested query (only `from` takes this form), or a join-descriptor list
/// (only `join` takes this form).
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Fragments(Vec<Arg>),
    SubQuery(Query),
    Joins(Vec<Join>),
}

impl Clause {
    pub fn empty() -> Self {
        Clause::Fragments(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Clause::Fragments(args) => args.is_empty(),
            Clause::SubQuery(_) => false,
            Clause::Joins(joins) => joins.is_empty(),
        }
    }
}

/// The clause-keyed tree built by the parser.
///
/// Keys are lower-cased clause names (`select`, `from`, `where`, ...) plus
/// one key per macro name (`$rate`, `$columns`, ...). Insertion order is
/// preserved exactly as first encountered; the printer imposes SQL grammar
/// order on the fixed clauses itself and relies on insertion order only for
/// sibling lists (unions, joins).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    entries: Vec<(String, Clause)>,
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    pub fn get(&self, key: &str) -> Option<&Clause> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, c)| c)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Clause> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, c)| c)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace a clause, keeping the first-seen position on replace.
    pub fn insert(&mut self, key: &str, clause: Clause) {
        match self.get_mut(key) {
            Some(slot) => *slot = clause,
            None => self.entries.push((key.to_string(), clause)),
        }
    }

    /// Push one argument onto a `Fragments` clause, creating it if missing.
    /// Pushes into a `SubQuery` slot are dropped (a trailing alias after a
    /// parenthesized source has nowhere to live in the tree).
    pub fn push_arg(&mut self, key: &str, arg: Arg) {
        match self.get_mut(key) {
            Some(Clause::Fragments(args)) => args.push(arg),
            Some(_) => {}
            None => self.insert(key, Clause::Fragments(vec![arg])),
        }
    }

    pub fn push_join(&mut self, join: Join) {
        match self.get_mut("join") {
            Some(Clause::Joins(joins)) => joins.push(join),
            _ => self.insert("join", Clause::Joins(vec![join])),
        }
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Clause)> {
        self.entries.iter().map(|(k, c)| (k.as_str(), c))
    }

    /// True when the tree holds nothing but (possibly empty) `root` content,
    /// i.e. the parsed text contained no statement keywords.
    pub fn is_flat(&self) -> bool {
        self.keys().all(|k| k == "root")
    }

    /// Argument-list extraction for a caller's post-processing, e.g. reading
    /// the GROUP BY keys back out of a parsed query.
    pub fn clause_args(&self, key: &str) -> Option<Vec<String>> {
        match self.get(key)? {
            Clause::Fragments(args) => Some(args.iter().map(Arg::text).collect()),
            Clause::SubQuery(q) => Some(vec![crate::output::to_sql(q)]),
            Clause::Joins(_) => None,
        }
    }

    /// Splice one extra predicate into the WHERE clause, for callers that
    /// mutate the tree and print it back instead of editing query text.
    pub fn add_where(&mut self, condition: &str) {
        let prefixed = match self.get("where") {
            Some(c) if !c.is_empty() => format!("AND {}", condition),
            _ => condition.to_string(),
        };
        self.push_arg("where", Arg::Literal(prefixed));
    }
}
