use crate::{
    ast::{Arg, Clause, Join, Query, Token},
    lexer::{LexError, Lexer, Span},
    macros::MACRO_NAMES,
    output,
};

/// Table-valued functions: a `(` right after one of these inside FROM opens
/// an argument list, not a subquery.
const TABLE_FUNCTIONS: [&str; 19] = [
    "merge",
    "numbers",
    "remote",
    "remotesecure",
    "cluster",
    "clusterallreplicas",
    "url",
    "file",
    "input",
    "values",
    "generaterandom",
    "s3",
    "s3cluster",
    "hdfs",
    "mysql",
    "postgresql",
    "jdbc",
    "odbc",
    "view",
];

/// Words after which a `(` keeps its separating space in the buffer, so
/// `AND (x = 1)` survives while `countIf(a)` keeps its call shape.
const CONNECTIVES: [&str; 15] = [
    "and", "or", "not", "in", "as", "on", "using", "between", "like", "is", "then", "else", "when",
    "end", "global",
];

#[derive(Debug, Clone)]
pub enum ParseError {
    /// Tokenizer found no matching pattern
    Lex(LexError),
    /// A macro call was parsed but the statement has no FROM clause
    MacroWithoutFrom(String),
    /// IN operator at end of input, with nothing on its right-hand side
    MissingInOperand(String),
    /// A bracketed region never closed
    Unbalanced(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Lex(e) => write!(f, "{}", e),
            ParseError::MacroWithoutFrom(name) => {
                write!(f, "macro {}(...) requires a FROM clause", name)
            }
            ParseError::MissingInOperand(fragment) => {
                write!(f, "IN operator without right-hand side: {}", fragment)
            }
            ParseError::Unbalanced(fragment) => {
                write!(f, "unbalanced brackets in: {}", fragment)
            }
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::Lex(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError::Lex(e)
    }
}

/// Accumulates not-yet-committed clause text. Balance is tracked
/// incrementally per appended character, so the parser never rescans.
#[derive(Default)]
struct Buffer {
    text: String,
    parens: i32,
    brackets: i32,
    braces: i32,
    quote: Option<char>,
    escaped: bool,
}

impl Buffer {
    fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// A fragment may only be split from its siblings once it is closed.
    fn closed(&self) -> bool {
        self.parens == 0 && self.brackets == 0 && self.braces == 0 && self.quote.is_none()
    }

    fn append(&mut self, token: &str) {
        if self.needs_space(token) {
            self.text.push(' ');
        }
        self.push_tracked(token);
    }

    /// Append without spacing normalization (comments, pre-rendered SQL).
    fn append_raw(&mut self, fragment: &str) {
        self.push_tracked(fragment);
    }

    fn append_comment(&mut self, comment: &str) {
        if !self.text.is_empty() && !self.text.ends_with([' ', '\n']) {
            self.text.push(' ');
        }
        // verbatim, plus a newline so following text starts its own line
        self.text.push_str(comment);
        self.text.push('\n');
    }

    fn needs_space(&self, token: &str) -> bool {
        let Some(last) = self.text.chars().last() else {
            return false;
        };
        if matches!(last, '(' | '.' | '!' | ' ' | '[' | '\n') {
            return false;
        }
        if matches!(token, ")" | "]" | "," | "." | ";") {
            return false;
        }
        if token == "(" {
            // parameterized calls chain: quantile(0.9)(v)
            if matches!(last, ')' | ']') {
                return false;
            }
            if last.is_alphanumeric() || last == '_' {
                let word = trailing_word(&self.text).to_lowercase();
                return CONNECTIVES.contains(&word.as_str());
            }
        }
        true
    }

    fn push_tracked(&mut self, fragment: &str) {
        for ch in fragment.chars() {
            if let Some(q) = self.quote {
                if self.escaped {
                    self.escaped = false;
                } else if ch == '\\' {
                    self.escaped = true;
                } else if ch == q {
                    self.quote = None;
                }
            } else {
                match ch {
                    '\'' | '"' | '`' => self.quote = Some(ch),
                    '(' => self.parens += 1,
                    ')' => self.parens -= 1,
                    '[' => self.brackets += 1,
                    ']' => self.brackets -= 1,
                    '{' => self.braces += 1,
                    '}' => self.braces -= 1,
                    _ => {}
                }
            }
            self.text.push(ch);
        }
    }

    fn take(&mut self) -> String {
        let out = std::mem::take(&mut self.text).trim().to_string();
        *self = Buffer::default();
        out
    }
}

fn trailing_word(text: &str) -> &str {
    let end = text.len();
    let start = text
        .rfind(|c: char| !c.is_alphanumeric() && c != '_')
        .map(|i| i + 1)
        .unwrap_or(0);
    &text[start..end]
}

fn normalize_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct Parser<'a> {
    input: &'a str,
    tokens: Vec<(Token, Span)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    /// Parse a top-level statement. A macro call without a FROM clause is
    /// rejected here; any other imbalance is tolerated by folding into the
    /// running buffer.
    pub fn parse(input: &str) -> Result<Query, ParseError> {
        let ast = Self::parse_fragment(input)?;
        for name in MACRO_NAMES {
            let key = format!("${}", name);
            if ast.contains_key(&key) && !ast.contains_key("from") {
                return Err(ParseError::MacroWithoutFrom(key));
            }
        }
        Ok(ast)
    }

    /// Parse without top-level validation: subqueries, union branches, and
    /// macro argument blocks come through here.
    pub fn parse_fragment(input: &str) -> Result<Query, ParseError> {
        let tokens = Lexer::tokenize(input)?
            .into_iter()
            .filter(|(t, _)| !matches!(t, Token::Whitespace(_)))
            .collect();
        let mut parser = Parser {
            input,
            tokens,
            pos: 0,
        };
        parser.parse_query()
    }

    fn next(&mut self) -> Option<(Token, Span)> {
        let pair = self.tokens.get(self.pos).cloned();
        if pair.is_some() {
            self.pos += 1;
        }
        pair
    }

    fn peek(&self) -> Option<&(Token, Span)> {
        self.tokens.get(self.pos)
    }

    fn parse_query(&mut self) -> Result<Query, ParseError> {
        let mut ast = Query::new();
        ast.insert("root", Clause::empty());
        let mut current = "root".to_string();
        let mut buf = Buffer::default();

        while let Some((token, span)) = self.next() {
            match token {
                Token::Keyword(kw) => {
                    let key = normalize_spaces(&kw).to_lowercase();
                    // ORDER BY ... WITH FILL: not a new clause
                    if key == "with" && current == "order by" {
                        buf.append(&kw);
                        continue;
                    }
                    if !buf.closed() {
                        buf.append(&kw);
                        continue;
                    }
                    if key == "union all" {
                        flush(&mut ast, &current, &mut buf);
                        self.parse_union_tail(&mut ast, span.end)?;
                        break;
                    }
                    if ast.contains_key(&key) {
                        buf.append(&kw);
                        continue;
                    }
                    flush(&mut ast, &current, &mut buf);
                    ast.insert(&key, Clause::empty());
                    current = key;
                }
                Token::Punct(',') => {
                    if buf.closed() {
                        flush(&mut ast, &current, &mut buf);
                        if current == "where" || current == "prewhere" {
                            ast.push_arg(&current, Arg::Literal(",".to_string()));
                        }
                    } else {
                        buf.append(",");
                    }
                }
                Token::OpenBracket('(')
                    if current == "from"
                        && buf.closed()
                        && !is_table_function(trailing_word(&buf.text)) =>
                {
                    let inner = self.balanced_paren_span()?;
                    let sub = Self::parse_fragment(&self.input[inner.start..inner.end])?;
                    buf.take();
                    ast.insert("from", Clause::SubQuery(sub));
                }
                Token::MacroFunc(name) => {
                    flush(&mut ast, &current, &mut buf);
                    match self.next() {
                        Some((Token::OpenBracket('('), _)) => {}
                        _ => return Err(ParseError::Unbalanced(name)),
                    }
                    let inner = self.balanced_paren_span()?;
                    let sub = Self::parse_fragment(&self.input[inner.start..inner.end])?;
                    if sub.is_flat() {
                        let args = sub
                            .clause_args("root")
                            .unwrap_or_default()
                            .into_iter()
                            .filter(|a| !a.is_empty())
                            .map(Arg::Literal)
                            .collect();
                        ast.insert(&name, Clause::Fragments(args));
                    } else {
                        ast.insert(&name, Clause::SubQuery(sub));
                    }
                    // macros replace the SELECT clause
                    ast.insert("select", Clause::empty());
                    current = "select".to_string();
                }
                Token::InOperator(op) => {
                    buf.append(&normalize_spaces(&op).to_uppercase());
                    match self.peek() {
                        None => return Err(ParseError::MissingInOperand(buf.take())),
                        Some((Token::OpenBracket('('), _)) => {
                            self.pos += 1;
                            let inner = self.balanced_paren_span()?;
                            let text = &self.input[inner.start..inner.end];
                            let sub = Self::parse_fragment(text)?;
                            buf.append("(");
                            if sub.is_flat() {
                                let args = sub.clause_args("root").unwrap_or_default();
                                buf.append_raw(&args.join(", "));
                            } else {
                                buf.append_raw(&format!("\n{}\n", output::to_sql_pretty(&sub)));
                            }
                            buf.append(")");
                        }
                        Some(_) => {}
                    }
                }
                Token::Ident(id)
                    if (current == "where" || current == "prewhere")
                        && (id.eq_ignore_ascii_case("and") || id.eq_ignore_ascii_case("or")) =>
                {
                    if buf.closed() && !buf.is_empty() {
                        flush(&mut ast, &current, &mut buf);
                    }
                    buf.append(&id.to_uppercase());
                }
                Token::JoinPhrase(phrase) => {
                    if !buf.closed() {
                        buf.append(&phrase);
                        continue;
                    }
                    flush(&mut ast, &current, &mut buf);
                    let join = self.parse_join(normalize_spaces(&phrase).to_lowercase())?;
                    ast.push_join(join);
                    current = "join".to_string();
                }
                Token::Comment(comment) => buf.append_comment(&comment),
                Token::Whitespace(_) | Token::Eof => {}
                other => buf.append(&other.text()),
            }
        }
        flush(&mut ast, &current, &mut buf);
        Ok(ast)
    }

    /// Split everything after the first top-level UNION ALL at each further
    /// boundary, parse each segment, and append the siblings.
    fn parse_union_tail(&mut self, ast: &mut Query, rest_start: usize) -> Result<(), ParseError> {
        let rest = &self.input[rest_start..];
        for segment in split_union_all(rest) {
            let sub = Self::parse_fragment(segment)?;
            ast.push_arg("union all", Arg::Nested(sub));
        }
        self.pos = self.tokens.len();
        Ok(())
    }

    /// Called with the cursor just past an opening paren; returns the span
    /// between it and its matching close and leaves the cursor past the
    /// close. Quoted strings are single tokens, so quotes cannot fool the
    /// depth count.
    fn balanced_paren_span(&mut self) -> Result<Span, ParseError> {
        let start = self
            .tokens
            .get(self.pos)
            .map(|(_, s)| s.start)
            .unwrap_or(self.input.len());
        let mut depth = 1;
        while let Some((token, span)) = self.next() {
            match token {
                Token::OpenBracket('(') => depth += 1,
                Token::CloseBracket(')') => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(Span {
                            start,
                            end: span.start,
                        });
                    }
                }
                _ => {}
            }
        }
        Err(ParseError::Unbalanced(
            self.input[start..].chars().take(40).collect(),
        ))
    }

    fn parse_join(&mut self, kind: String) -> Result<Join, ParseError> {
        let mut join = Join::new(&kind);

        // source: parenthesized subquery or dotted table reference
        if let Some((Token::OpenBracket('('), _)) = self.peek() {
            self.pos += 1;
            let inner = self.balanced_paren_span()?;
            let sub = Self::parse_fragment(&self.input[inner.start..inner.end])?;
            join.source = Clause::SubQuery(sub);
        } else {
            let mut source = Buffer::default();
            while let Some((token, _)) = self.peek() {
                match token {
                    Token::Ident(id)
                        if id.eq_ignore_ascii_case("as")
                            || id.eq_ignore_ascii_case("on")
                            || id.eq_ignore_ascii_case("using") =>
                    {
                        break;
                    }
                    Token::Ident(_)
                    | Token::QuotedString(_)
                    | Token::Number(_)
                    | Token::Macro(_) => {
                        let text = token.text();
                        source.append(&text);
                        self.pos += 1;
                    }
                    Token::Punct('.') => {
                        source.append(".");
                        self.pos += 1;
                    }
                    _ => break,
                }
            }
            if !source.is_empty() {
                join.source = Clause::Fragments(vec![Arg::Literal(source.take())]);
            }
        }

        // aliases, then an optional ON or USING block
        while let Some((token, _)) = self.peek() {
            match token {
                Token::Ident(id) if id.eq_ignore_ascii_case("as") => {
                    self.pos += 1;
                }
                Token::Ident(id) if id.eq_ignore_ascii_case("on") => {
                    self.pos += 1;
                    self.parse_join_on(&mut join);
                    break;
                }
                Token::Ident(id) if id.eq_ignore_ascii_case("using") => {
                    self.pos += 1;
                    self.parse_join_using(&mut join);
                    break;
                }
                Token::Ident(id) => {
                    join.aliases.push(id.clone());
                    self.pos += 1;
                }
                _ => break,
            }
        }
        Ok(join)
    }

    /// Free-form boolean conditions; AND/OR upper-cased, fragments split at
    /// closed-buffer boundaries. Stops before the next statement keyword or
    /// join phrase.
    fn parse_join_on(&mut self, join: &mut Join) {
        let mut buf = Buffer::default();
        while let Some((token, _)) = self.peek() {
            match token {
                Token::Keyword(_) | Token::JoinPhrase(_) if buf.closed() => break,
                Token::Ident(id)
                    if id.eq_ignore_ascii_case("and") || id.eq_ignore_ascii_case("or") =>
                {
                    let op = id.to_uppercase();
                    if buf.closed() && !buf.is_empty() {
                        join.on.push(buf.take());
                    }
                    buf.append(&op);
                    self.pos += 1;
                }
                Token::Comment(c) => {
                    let c = c.clone();
                    buf.append_comment(&c);
                    self.pos += 1;
                }
                _ => {
                    let text = token.text();
                    buf.append(&text);
                    self.pos += 1;
                }
            }
        }
        if !buf.is_empty() {
            join.on.push(buf.take());
        }
    }

    /// USING identifier list, parenthesized or bare.
    fn parse_join_using(&mut self, join: &mut Join) {
        let parenthesized = matches!(self.peek(), Some((Token::OpenBracket('('), _)));
        if parenthesized {
            self.pos += 1;
        }
        while let Some((token, _)) = self.peek() {
            match token {
                Token::Ident(id) => {
                    join.using_.push(id.clone());
                    self.pos += 1;
                }
                Token::Punct(',') => self.pos += 1,
                Token::CloseBracket(')') if parenthesized => {
                    self.pos += 1;
                    break;
                }
                _ => break,
            }
        }
    }
}

fn flush(ast: &mut Query, current: &str, buf: &mut Buffer) {
    if !buf.is_empty() {
        let text = buf.take();
        ast.push_arg(current, Arg::Literal(text));
    } else {
        buf.take();
    }
}

fn is_table_function(word: &str) -> bool {
    let lower = word.to_lowercase();
    TABLE_FUNCTIONS.contains(&lower.as_str())
}

/// Split at every depth-0 `union all` boundary. Paren depth and quotes are
/// tracked over the raw text; segments are returned in order.
fn split_union_all(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut segments = Vec::new();
    let mut seg_start = 0;
    let mut i = 0;
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
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' | b'`' => {
                quote = Some(b);
                i += 1;
            }
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                depth -= 1;
                i += 1;
            }
            _ if depth == 0 && is_word_boundary(bytes, i) => {
                if let Some(len) = match_union_all(&text[i..]) {
                    segments.push(&text[seg_start..i]);
                    i += len;
                    seg_start = i;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    segments.push(&text[seg_start..]);
    segments
}

fn is_word_boundary(bytes: &[u8], i: usize) -> bool {
    i == 0 || !(bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'_')
}

fn match_union_all(rest: &str) -> Option<usize> {
    if rest.len() < 9 || !rest.is_char_boundary(5) || !rest[..5].eq_ignore_ascii_case("union") {
        return None;
    }
    let after = &rest[5..];
    let ws = after.len() - after.trim_start().len();
    if ws == 0 {
        return None;
    }
    let tail = &after[ws..];
    if tail.len() >= 3
        && tail.is_char_boundary(3)
        && tail[..3].eq_ignore_ascii_case("all")
        && tail[3..]
            .chars()
            .next()
            .map(|c| !c.is_alphanumeric() && c != '_')
            .unwrap_or(true)
    {
        Some(5 + ws + 3)
    } else {
        None
    }
}
