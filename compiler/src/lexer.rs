// Lexer for textual IR modules.
//
// Tokenizes the generic operation syntax read by `parser.rs` and written by
// `printer.rs`. Uses the `logos` crate for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// IR token types.
///
/// Keywords and symbols are matched as fixed strings. Sigil-prefixed names
/// (`%v`, `@f`, `^bb0`, `!tf.string`) carry their text without the sigil,
/// except dialect types which keep the `!`.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+|//[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("module")]
    Module,
    #[token("attributes")]
    Attributes,
    #[token("func")]
    Func,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("unit")]
    Unit,

    // ── Symbols ──
    #[token("->")]
    Arrow,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token("=")]
    Equals,
    #[token("#")]
    Hash,

    // ── Sigil names ──
    /// SSA value name: `%0`, `%arg1`.
    #[regex(r"%[A-Za-z0-9_]+", |lex| lex.slice()[1..].to_string())]
    ValueId(String),

    /// Symbol reference: `@main`.
    #[regex(r"@[A-Za-z_][A-Za-z0-9_.$]*", |lex| lex.slice()[1..].to_string())]
    SymbolRef(String),

    /// Block label: `^bb0`.
    #[regex(r"\^[A-Za-z0-9_]+", |lex| lex.slice()[1..].to_string())]
    BlockLabel(String),

    // ── Types ──
    /// Whole tensor type; carries the text between the angle brackets.
    #[regex(r"tensor<[^<>]*>", |lex| {
        let s = lex.slice();
        s["tensor<".len()..s.len() - 1].to_string()
    })]
    TensorType(String),

    /// Dialect type: `!tf.string`.
    #[regex(r"![A-Za-z_][A-Za-z0-9_.]*", |lex| lex.slice().to_string())]
    DialectType(String),

    // ── Literals ──
    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    /// String literal with `\"`, `\\`, `\n`, `\t` escapes.
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    StringLit(String),

    // ── Identifier ──
    //
    // Placed after keywords (logos prioritises fixed `#[token]` matches
    // over regex for the same length, so `func` matches Func, not Ident).
    #[regex(r"[A-Za-z_][A-Za-z0-9_.$]*", |lex| lex.slice().to_string())]
    Ident(String),
}

impl Token {
    /// Keyword tokens spelled as identifiers (used where a keyword may
    /// appear as a plain name, e.g. the `func` attribute key).
    pub fn keyword_text(&self) -> Option<&'static str> {
        match self {
            Token::Module => Some("module"),
            Token::Attributes => Some("attributes"),
            Token::Func => Some("func"),
            Token::True => Some("true"),
            Token::False => Some("false"),
            Token::Unit => Some("unit"),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(kw) = self.keyword_text() {
            return f.write_str(kw);
        }
        match self {
            Token::Arrow => write!(f, "->"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            Token::Equals => write!(f, "="),
            Token::Hash => write!(f, "#"),
            Token::ValueId(name) => write!(f, "%{name}"),
            Token::SymbolRef(name) => write!(f, "@{name}"),
            Token::BlockLabel(name) => write!(f, "^{name}"),
            Token::TensorType(body) => write!(f, "tensor<{body}>"),
            Token::DialectType(name) => write!(f, "{name}"),
            Token::Int(v) => write!(f, "{v}"),
            Token::StringLit(s) => write!(f, "{:?}", s),
            Token::Ident(name) => write!(f, "{name}"),
            _ => Ok(()),
        }
    }
}

// ── Callbacks ──

fn parse_string(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1]; // strip quotes
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                '"' => result.push('"'),
                '\\' => result.push('\\'),
                'n' => result.push('\n'),
                't' => result.push('\t'),
                _ => return None,
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

/// Escape a string so that `parse_string` reads it back unchanged.
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

// ── Public API ──

/// Lex an IR source string into tokens.
///
/// Returns all successfully parsed tokens together with any errors for
/// unrecognised characters. Lexing is non-fatal: errors are collected and
/// the lexer continues past bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──
