//! # Abstract syntax tree for macro-laden SQL
//!
//! The tree built here is a clause/argument intermediate representation,
//! not a general expression-level parse tree: the engine only needs to
//! recognize the clause and macro vocabulary it supports and pass every
//! other fragment through unchanged.
//!
//! ## Architecture Overview
//!
//! - **[tokens]** - Lexical tokens produced by the lexer
//! - **[query]** - The clause-keyed tree: `Query`, `Clause`, `Arg`
//! - **[join]** - Join descriptors reconstructed by the printer
//!
//! ## Shape
//!
//! A query maps clause keywords to their content, in first-seen order:
//!
//! ```text
//! SELECT x, y FROM t WHERE a = 1 AND b = 2
//! ```
//!
//! becomes
//!
//! ```text
//! select -> ["x", "y"]
//! from   -> ["t"]
//! where  -> ["a = 1", "AND b = 2"]
//! ```
//!
//! An argument is either a literal fragment or a nested query (subquery,
//! union branch, macro argument block). A fragment is only split from its
//! siblings once its brackets and quotes balance, so `countIf(a, b)` is
//! always one argument, never two.
pub mod join;
pub mod query;
pub mod tokens;

pub use join::Join;
pub use query::{Arg, Clause, Query};
pub use tokens::Token;
