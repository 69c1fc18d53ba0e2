//! The full expansion pipeline.
//!
//! One `Evaluator` holds one configuration record and turns macro-laden
//! query text into fully-resolved SQL: optional comment stripping, optional
//! metadata header, parse, macro rewrite, time substitution. Every call
//! allocates its own scan state, so concurrent callers are independent.

use crate::{
    context::QueryContext,
    lexer::{self, LexError},
    macros::{self, MacroError},
    parser::{ParseError, Parser},
    substitute::{self, SubstituteError},
};

/// Errors that can stop an expansion. Malformed input is an authoring error
/// in the query text: it is surfaced directly, never silently recovered.
#[derive(Debug, Clone)]
pub enum EvalError {
    /// Tokenize or structural parse failure
    Parse(ParseError),
    /// Macro arity/alias/ordering violation or a macro without FROM
    Macro(MacroError),
    /// Interval parsing or $unescape failure
    Substitute(SubstituteError),
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::Parse(e) => write!(f, "parse error: {}", e),
            EvalError::Macro(e) => write!(f, "macro error: {}", e),
            EvalError::Substitute(e) => write!(f, "substitution error: {}", e),
        }
    }
}

impl std::error::Error for EvalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EvalError::Parse(e) => Some(e),
            EvalError::Macro(e) => Some(e),
            EvalError::Substitute(e) => Some(e),
        }
    }
}

impl From<ParseError> for EvalError {
    fn from(e: ParseError) -> Self {
        EvalError::Parse(e)
    }
}

impl From<LexError> for EvalError {
    fn from(e: LexError) -> Self {
        EvalError::Parse(ParseError::Lex(e))
    }
}

impl From<MacroError> for EvalError {
    fn from(e: MacroError) -> Self {
        EvalError::Macro(e)
    }
}

impl From<SubstituteError> for EvalError {
    fn from(e: SubstituteError) -> Self {
        EvalError::Substitute(e)
    }
}

/// The main expansion engine.
///
/// # Examples
///
/// ```
/// use macroql::{Evaluator, QueryContext};
///
/// let ctx = QueryContext {
///     interval: "15s".to_string(),
///     from: 1545613320,
///     to: 1546300740,
///     table: "requests".to_string(),
///     date_time_col: "d".to_string(),
///     ..QueryContext::default()
/// };
/// let sql = Evaluator::new(ctx)
///     .expand("SELECT count() FROM $table WHERE $timeFilter")
///     .unwrap();
/// assert_eq!(
///     sql,
///     "SELECT count() FROM default.requests WHERE d >= toDateTime(1545613320) AND d <= toDateTime(1546300740)"
/// );
/// ```
pub struct Evaluator {
    ctx: QueryContext,
}

impl Evaluator {
    pub fn new(ctx: QueryContext) -> Self {
        Evaluator { ctx }
    }

    pub fn context(&self) -> &QueryContext {
        &self.ctx
    }

    /// Expand one query: the result contains no recognized macros or
    /// placeholders and is ready for execution by an external SQL engine.
    pub fn expand(&self, query: &str) -> Result<String, EvalError> {
        let mut text = if self.ctx.skip_comments {
            lexer::strip_comments(query)?
        } else {
            query.to_string()
        };
        if self.ctx.add_metadata {
            text = format!("{}{}", self.metadata_comment()?, text);
        }
        let ast = Parser::parse(&text)?;
        let rewritten = macros::apply_macros(&text, &ast, &self.ctx)?;
        Ok(substitute::substitute(&rewritten, &self.ctx)?)
    }

    fn metadata_comment(&self) -> Result<String, SubstituteError> {
        let interval = substitute::effective_interval(&self.ctx)?;
        Ok(format!(
            "/* database={}, table={}, from={}, to={}, interval={}s */\n",
            self.ctx.database, self.ctx.table, self.ctx.from, self.ctx.to, interval
        ))
    }
}
