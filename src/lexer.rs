use std::sync::LazyLock;

use regex::Regex;

use crate::ast::Token;

// Pattern tables, compiled once and shared by every scan. All patterns are
// anchored so a match can only start at the current cursor position.

static KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(union\s+all|group\s+by|order\s+by|prewhere|select|having|format|where|limit|with|from)\b",
    )
    .unwrap()
});

// Shared-prefix names are ordered longest first: $rateColumnsAggregated must
// win over $rateColumns, and $rateColumns over $rate.
static MACRO_FUNC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\$(rateColumnsAggregated|perSecondColumnsAggregated|deltaColumnsAggregated|increaseColumnsAggregated|rateColumns|perSecondColumns|deltaColumns|increaseColumns|columnsMs|columns|rate|perSecond|delta|increase)\b",
    )
    .unwrap()
});

// Greedy optional prefixes give the longest phrase: `global any left outer
// join` is one token, never `global` + `any left join` + leftovers.
static JOIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:global\s+)?(?:(?:any|all|asof|semi|anti)\s+)?(?:(?:inner|left|right|full|cross)\s+)?(?:outer\s+)?join\b",
    )
    .unwrap()
});

static IN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(global\s+not\s+in|global\s+in|not\s+in|in)\b").unwrap());

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s+").unwrap());

static LINE_COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^--[^\n]*").unwrap());

static BLOCK_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^/\*.*?\*/").unwrap());

static STRING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^('(?:[^'\\\\]|\\\\.)*'|\"(?:[^\"\\\\]|\\\\.)*\"|`(?:[^`\\\\]|\\\\.)*`)").unwrap()
});

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(?:\.\d+)?(?:[eE][+-]?\d+)?").unwrap());

static IDENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z_][0-9a-zA-Z_]*").unwrap());

static OPERATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(<=|>=|!=|<>|==|->|\|\||[-+*/%=<>!?:])").unwrap());

static MACRO_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\$[a-zA-Z_][0-9a-zA-Z_]*").unwrap());

/// Byte range of one token in the original input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Scan failure: nothing matched at the cursor. Hard stop, no recovery.
#[derive(Debug, Clone)]
pub struct LexError {
    pub offset: usize,
    pub remainder: String,
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "no token pattern matches at offset {}: {:?}",
            self.offset, self.remainder
        )
    }
}

impl std::error::Error for LexError {}

pub struct Lexer<'a> {
    input: &'a str,
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer { input, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    fn rest(&self) -> &'a str {
        &self.input[self.position..]
    }

    /// Produce the next token by trying every pattern class at the cursor in
    /// fixed priority order. Within a class the tables are ordered so the
    /// longest alternative wins.
    pub fn next_token(&mut self) -> Result<Token, LexError> {
        let rest = self.rest();
        if rest.is_empty() {
            return Ok(Token::Eof);
        }

        if let Some(m) = KEYWORD_RE.find(rest) {
            return Ok(self.take(m.len(), Token::Keyword(m.as_str().to_string())));
        }
        if let Some(m) = MACRO_FUNC_RE.find(rest) {
            return Ok(self.take(m.len(), Token::MacroFunc(m.as_str().to_string())));
        }
        if let Some(m) = JOIN_RE.find(rest) {
            return Ok(self.take(m.len(), Token::JoinPhrase(m.as_str().to_string())));
        }
        if let Some(m) = IN_RE.find(rest) {
            return Ok(self.take(m.len(), Token::InOperator(m.as_str().to_string())));
        }
        if let Some(m) = WHITESPACE_RE.find(rest) {
            return Ok(self.take(m.len(), Token::Whitespace(m.as_str().to_string())));
        }
        if let Some(m) = LINE_COMMENT_RE.find(rest) {
            return Ok(self.take(m.len(), Token::Comment(m.as_str().to_string())));
        }
        if let Some(m) = BLOCK_COMMENT_RE.find(rest) {
            return Ok(self.take(m.len(), Token::Comment(m.as_str().to_string())));
        }
        if let Some(m) = STRING_RE.find(rest) {
            return Ok(self.take(m.len(), Token::QuotedString(m.as_str().to_string())));
        }
        if let Some(m) = NUMBER_RE.find(rest) {
            return Ok(self.take(m.len(), Token::Number(m.as_str().to_string())));
        }
        if let Some(m) = IDENT_RE.find(rest) {
            return Ok(self.take(m.len(), Token::Ident(m.as_str().to_string())));
        }
        if let Some(m) = OPERATOR_RE.find(rest) {
            return Ok(self.take(m.len(), Token::Operator(m.as_str().to_string())));
        }
        let ch = rest.chars().next().unwrap_or('\0');
        match ch {
            '(' | '[' | '{' => return Ok(self.take(1, Token::OpenBracket(ch))),
            ')' | ']' | '}' => return Ok(self.take(1, Token::CloseBracket(ch))),
            ',' | '.' | ';' => return Ok(self.take(1, Token::Punct(ch))),
            _ => {}
        }
        if let Some(m) = MACRO_RE.find(rest) {
            return Ok(self.take(m.len(), Token::Macro(m.as_str().to_string())));
        }

        Err(LexError {
            offset: self.position,
            remainder: rest.chars().take(40).collect(),
        })
    }

    fn take(&mut self, len: usize, token: Token) -> Token {
        self.position += len;
        token
    }

    /// Scan the whole input into `(token, span)` pairs, excluding the final
    /// `Eof`. Spans index into the original text so callers can splice raw
    /// fragments back out.
    pub fn tokenize(input: &str) -> Result<Vec<(Token, Span)>, LexError> {
        let mut lexer = Lexer::new(input);
        let mut out = Vec::new();
        loop {
            let start = lexer.position;
            let token = lexer.next_token()?;
            if token.is_eof() {
                return Ok(out);
            }
            out.push((
                token,
                Span {
                    start,
                    end: lexer.position,
                },
            ));
        }
    }
}

/// Remove every comment token, leaving the rest of the text byte-for-byte.
/// Token-level removal keeps `--` and `/*` inside quoted strings intact.
pub fn strip_comments(input: &str) -> Result<String, LexError> {
    let tokens = Lexer::tokenize(input)?;
    let mut out = String::with_capacity(input.len());
    for (token, span) in tokens {
        if !matches!(token, Token::Comment(_)) {
            out.push_str(&input[span.start..span.end]);
        }
    }
    Ok(out)
}

#[test]
fn test_keyword_and_macro_priority() {
    let mut lexer = Lexer::new("SELECT $rateColumns");
    assert_eq!(
        lexer.next_token().unwrap(),
        Token::Keyword("SELECT".to_string())
    );
    assert_eq!(
        lexer.next_token().unwrap(),
        Token::Whitespace(" ".to_string())
    );
    // $rateColumns must not decompose into $rate + Columns
    assert_eq!(
        lexer.next_token().unwrap(),
        Token::MacroFunc("$rateColumns".to_string())
    );
    assert_eq!(lexer.next_token().unwrap(), Token::Eof);
}

#[test]
fn test_join_phrase_longest_first() {
    let mut lexer = Lexer::new("global any left outer join x");
    assert_eq!(
        lexer.next_token().unwrap(),
        Token::JoinPhrase("global any left outer join".to_string())
    );
}
