pub mod ast;
pub mod context;
pub mod evaluator;
pub mod lexer;
pub mod macros;
pub mod output;
pub mod parser;
pub mod substitute;

#[cfg(feature = "cli")]
pub mod cli;

pub use ast::{Arg, Clause, Join, Query, Token};
pub use context::{DateTimeType, QueryContext};
pub use evaluator::{EvalError, Evaluator};
pub use lexer::{LexError, Lexer};
pub use macros::MacroError;
pub use output::{to_sql, to_sql_pretty};
pub use parser::{ParseError, Parser};
pub use substitute::SubstituteError;
