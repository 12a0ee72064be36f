//! Streaming lexer for Lox source text.
//!
//! [`Scanner`] walks a byte slice and yields one `Result<Token>` per lexeme.
//! Whitespace and comments produce nothing.  A lexical problem is yielded as
//! an `Err` item without ending the stream, and the stream always finishes
//! with exactly one `EOF` token.  [`scan`] drains a scanner into tokens and
//! diagnostics.
//!
//! Recognized input:
//!
//! - punctuation `( ) { } , . - + : ; * ?` and the operators `! != = == < <= > >=`
//! - `//` line comments and non-nesting `/* ... */` block comments
//! - strings quoted with `"` or `'`, which may span lines
//! - numbers with an optional fractional part (`12.` is a number then a dot)
//! - identifiers and keywords
//!
//! A run of bytes that cannot start any lexeme is reported once.
//!
//! ```rust
//! use rox::scanner::Scanner;
//!
//! for item in Scanner::new(b"print 123; // example") {
//!     match item {
//!         Ok(token) => println!("{}", token),
//!         Err(err) => eprintln!("{}", err),
//!     }
//! }
//! ```

use crate::error::{LoxError, Result};
use crate::token::{Token, TokenType};
use log::{debug, info};
use memchr::memchr;
use phf::phf_map;
use std::iter::FusedIterator;

static KEYWORDS: phf::Map<&'static [u8], TokenType> = phf_map! {
    b"and"    => TokenType::AND,
    b"break"  => TokenType::BREAK,
    b"class"  => TokenType::CLASS,
    b"else"   => TokenType::ELSE,
    b"false"  => TokenType::FALSE,
    b"fun"    => TokenType::FUN,
    b"for"    => TokenType::FOR,
    b"if"     => TokenType::IF,
    b"nil"    => TokenType::NIL,
    b"or"     => TokenType::OR,
    b"print"  => TokenType::PRINT,
    b"return" => TokenType::RETURN,
    b"super"  => TokenType::SUPER,
    b"this"   => TokenType::THIS,
    b"trait"  => TokenType::TRAIT,
    b"true"   => TokenType::TRUE,
    b"var"    => TokenType::VAR,
    b"while"  => TokenType::WHILE,
    b"with"   => TokenType::WITH,
};

fn single_char(b: u8) -> Option<TokenType> {
    let tt = match b {
        b'(' => TokenType::LEFT_PAREN,
        b')' => TokenType::RIGHT_PAREN,
        b'{' => TokenType::LEFT_BRACE,
        b'}' => TokenType::RIGHT_BRACE,
        b',' => TokenType::COMMA,
        b'.' => TokenType::DOT,
        b'-' => TokenType::MINUS,
        b'+' => TokenType::PLUS,
        b':' => TokenType::COLON,
        b';' => TokenType::SEMICOLON,
        b'*' => TokenType::STAR,
        b'?' => TokenType::QUESTION_MARK,
        _ => return None,
    };

    Some(tt)
}

#[inline]
fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// True when `b` can begin a lexeme or is whitespace.
#[inline]
fn starts_lexeme(b: u8) -> bool {
    single_char(b).is_some()
        || is_ident_byte(b)
        || matches!(
            b,
            b'!' | b'=' | b'<' | b'>' | b'/' | b'"' | b'\'' | b' ' | b'\r' | b'\t' | b'\n'
        )
}

pub struct Scanner<'a> {
    source: &'a [u8],
    /// First byte of the lexeme being scanned.
    start: usize,
    /// Next byte to examine.
    current: usize,
    line: usize,
    finished: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a [u8]) -> Self {
        info!("Scanner created over {} bytes", source.len());

        Self {
            source,
            start: 0,
            current: 0,
            line: 1,
            finished: false,
        }
    }

    #[inline]
    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    /// Consume one byte.  Only called when not at the end.
    #[inline]
    fn bump(&mut self) -> u8 {
        let b = self.source[self.current];
        self.current += 1;
        b
    }

    /// Byte `offset` positions ahead, or `0` past the end.
    #[inline]
    fn peek_at(&self, offset: usize) -> u8 {
        self.source
            .get(self.current + offset)
            .copied()
            .unwrap_or(0)
    }

    #[inline]
    fn peek(&self) -> u8 {
        self.peek_at(0)
    }

    fn eat(&mut self, expected: u8) -> bool {
        let hit = !self.is_at_end() && self.peek() == expected;
        if hit {
            self.current += 1;
        }
        hit
    }

    /// `matched` when the next byte is `=`, otherwise `single`.
    fn with_equal(&mut self, matched: TokenType, single: TokenType) -> TokenType {
        if self.eat(b'=') {
            matched
        } else {
            single
        }
    }

    fn text(&self, from: usize, to: usize) -> String {
        String::from_utf8_lossy(&self.source[from..to]).into_owned()
    }

    fn lexeme(&self) -> String {
        self.text(self.start, self.current)
    }

    /// Scan one lexeme.  `Ok(None)` means whitespace or a comment was
    /// skipped.
    fn scan_token(&mut self) -> Result<Option<TokenType>> {
        let b = self.bump();

        if let Some(tt) = single_char(b) {
            return Ok(Some(tt));
        }

        let tt = match b {
            b'!' => self.with_equal(TokenType::BANG_EQUAL, TokenType::BANG),
            b'=' => self.with_equal(TokenType::EQUAL_EQUAL, TokenType::EQUAL),
            b'<' => self.with_equal(TokenType::LESS_EQUAL, TokenType::LESS),
            b'>' => self.with_equal(TokenType::GREATER_EQUAL, TokenType::GREATER),

            b' ' | b'\r' | b'\t' => return Ok(None),
            b'\n' => {
                self.line += 1;
                return Ok(None);
            }

            b'/' if self.eat(b'/') => {
                // The newline stays unconsumed so the line counter sees it.
                self.current = match memchr(b'\n', &self.source[self.current..]) {
                    Some(pos) => self.current + pos,
                    None => self.source.len(),
                };
                return Ok(None);
            }
            b'/' if self.eat(b'*') => {
                self.skip_block_comment()?;
                return Ok(None);
            }
            b'/' => TokenType::SLASH,

            b'"' | b'\'' => self.string(b)?,
            b'0'..=b'9' => self.number(),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.identifier(),

            _ => return Err(self.unexpected()),
        };

        Ok(Some(tt))
    }

    /// Swallow the rest of a run of unusable bytes and report it once.
    fn unexpected(&mut self) -> LoxError {
        while !self.is_at_end() && !starts_lexeme(self.peek()) {
            self.bump();
        }

        let bad = self.lexeme();
        let message = if bad.chars().count() == 1 {
            format!("Unexpected character '{}'.", bad)
        } else {
            format!("Unexpected characters \"{}\".", bad)
        };

        LoxError::lex(self.line, message)
    }

    /// Block comments end at the first `*/`; an inner `/*` is plain text.
    fn skip_block_comment(&mut self) -> Result<()> {
        while !self.is_at_end() {
            if self.peek() == b'*' && self.peek_at(1) == b'/' {
                self.current += 2;
                return Ok(());
            }

            if self.bump() == b'\n' {
                self.line += 1;
            }
        }

        Err(LoxError::lex(
            self.line,
            "Unterminated block comment; reached end of input.",
        ))
    }

    fn string(&mut self, quote: u8) -> Result<TokenType> {
        while !self.is_at_end() && self.peek() != quote {
            if self.bump() == b'\n' {
                self.line += 1;
            }
        }

        if self.is_at_end() {
            return Err(LoxError::lex(self.line, "Unterminated string."));
        }

        self.current += 1;

        Ok(TokenType::STRING(
            self.text(self.start + 1, self.current - 1),
        ))
    }

    fn number(&mut self) -> TokenType {
        while self.peek().is_ascii_digit() {
            self.current += 1;
        }

        if self.peek() == b'.' && self.peek_at(1).is_ascii_digit() {
            self.current += 1;
            while self.peek().is_ascii_digit() {
                self.current += 1;
            }
        }

        // Only ASCII digits and at most one '.' were consumed.
        let value = std::str::from_utf8(&self.source[self.start..self.current])
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);

        TokenType::NUMBER(value)
    }

    fn identifier(&mut self) -> TokenType {
        while is_ident_byte(self.peek()) {
            self.current += 1;
        }

        KEYWORDS
            .get(&self.source[self.start..self.current])
            .cloned()
            .unwrap_or(TokenType::IDENTIFIER)
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        while !self.is_at_end() {
            self.start = self.current;

            match self.scan_token() {
                Ok(Some(tt)) => {
                    debug!("Scanned token ({:?}) on line {}", tt, self.line);
                    return Some(Ok(Token::new(tt, self.lexeme(), self.line)));
                }
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }

        self.finished = true;
        Some(Ok(Token::new(TokenType::EOF, "", self.line)))
    }
}

impl<'a> FusedIterator for Scanner<'a> {}

/// Scan all of `source`.  The token vector always ends with one `EOF`;
/// every lexical problem lands in the diagnostics vector.
pub fn scan(source: &[u8]) -> (Vec<Token>, Vec<LoxError>) {
    let mut tokens: Vec<Token> = Vec::new();
    let mut errors: Vec<LoxError> = Vec::new();

    for item in Scanner::new(source) {
        match item {
            Ok(token) => tokens.push(token),
            Err(e) => errors.push(e),
        }
    }

    info!(
        "Scanned {} token(s) with {} diagnostic(s)",
        tokens.len(),
        errors.len()
    );

    (tokens, errors)
}
