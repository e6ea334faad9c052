/*
 * lexer.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template tokenizer.
//!
//! Splits template source into literal data, comments, and the tokens of
//! `{{ ... }}` and `{% ... %}` tags. Whitespace control is resolved here:
//! `-` markers are recorded on the neighbouring [`TokenKind::Data`] token's
//! [`Trim`], while `trim_blocks` and `lstrip_blocks` are applied directly to
//! the data text.

use crate::config::Config;
use crate::error::{TemplateError, TemplateResult};
use crate::nodes::{Position, Trim};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Data,
    Comment,
    VariableBegin,
    VariableEnd,
    BlockBegin,
    BlockEnd,
    Name,
    String,
    Integer,
    Float,
    Operator,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Token text; for strings, the unescaped contents.
    pub val: String,
    pub pos: Position,
    /// Only meaningful on [`TokenKind::Data`].
    pub trim: Trim,
}

impl Token {
    fn new(kind: TokenKind, val: impl Into<String>, pos: Position) -> Self {
        Self {
            kind,
            val: val.into(),
            pos,
            trim: Trim::default(),
        }
    }

    pub fn is_name(&self, name: &str) -> bool {
        self.kind == TokenKind::Name && self.val == name
    }

    pub fn is_operator(&self, op: &str) -> bool {
        self.kind == TokenKind::Operator && self.val == op
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Variable,
    Block,
    Comment,
}

const TWO_CHAR_OPERATORS: [&str; 5] = ["==", "!=", "<=", ">=", "//"];
const ONE_CHAR_OPERATORS: &str = "+-*/%~<>=()[]{},.|:";

/// Tokenize `source`. The result always ends with a [`TokenKind::Eof`] token.
pub fn tokenize(source: &str, config: &Config) -> TemplateResult<Vec<Token>> {
    Lexer::new(source, config).run()
}

pub(crate) fn parse_error(pos: Position, message: impl Into<String>) -> TemplateError {
    TemplateError::Parse {
        message: message.into(),
        line: pos.line,
        col: pos.col,
    }
}

struct Lexer<'s> {
    source: &'s str,
    config: &'s Config,
    offset: usize,
    line: usize,
    col: usize,
    tokens: Vec<Token>,
    // The previous tag closed with `-`.
    trim_next: bool,
}

impl<'s> Lexer<'s> {
    fn new(source: &'s str, config: &'s Config) -> Self {
        let source = if config.keep_trailing_newline {
            source
        } else {
            source.strip_suffix('\n').unwrap_or(source)
        };
        Self {
            source,
            config,
            offset: 0,
            line: 1,
            col: 1,
            tokens: Vec::new(),
            trim_next: false,
        }
    }

    fn rest(&self) -> &'s str {
        &self.source[self.offset..]
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.col)
    }

    fn advance(&mut self, len: usize) {
        for c in self.source[self.offset..self.offset + len].chars() {
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        self.offset += len;
    }

    fn run(mut self) -> TemplateResult<Vec<Token>> {
        while self.offset < self.source.len() {
            let rest = self.rest();
            match find_tag_start(rest) {
                Some((index, kind)) => {
                    self.lex_data(index, Some(kind));
                    match kind {
                        TagKind::Comment => self.lex_comment()?,
                        TagKind::Variable | TagKind::Block => self.lex_tag(kind)?,
                    }
                }
                None => self.lex_data(rest.len(), None),
            }
        }
        let pos = self.position();
        self.tokens.push(Token::new(TokenKind::Eof, "", pos));
        Ok(self.tokens)
    }

    fn at_line_start(&self) -> bool {
        self.offset == 0 || self.source[..self.offset].ends_with('\n')
    }

    fn lex_data(&mut self, len: usize, next: Option<TagKind>) {
        let pos = self.position();
        let mut text = &self.source[self.offset..self.offset + len];
        let next_trims = next.is_some() && self.source[self.offset + len + 2..].starts_with('-');

        if next == Some(TagKind::Block) && self.config.lstrip_blocks && !next_trims {
            let line_start = match text.rfind('\n') {
                Some(i) => Some(i + 1),
                None if self.at_line_start() => Some(0),
                None => None,
            };
            if let Some(start) = line_start {
                if text[start..].chars().all(|c| c == ' ' || c == '\t') {
                    text = &text[..start];
                }
            }
        }

        if !text.is_empty() {
            let mut token = Token::new(TokenKind::Data, text, pos);
            token.trim = Trim {
                left: self.trim_next,
                right: next_trims,
            };
            self.tokens.push(token);
        }
        self.trim_next = false;
        self.advance(len);
    }

    fn lex_comment(&mut self) -> TemplateResult<()> {
        let start = self.position();
        self.advance(2);
        if self.rest().starts_with('-') {
            self.advance(1);
        }
        let rest = self.rest();
        let end = rest
            .find("#}")
            .ok_or_else(|| parse_error(start, "Unclosed comment, expected '#}'"))?;
        let body = &rest[..end];
        let (body, trims) = match body.strip_suffix('-') {
            Some(body) => (body, true),
            None => (body, false),
        };
        self.tokens
            .push(Token::new(TokenKind::Comment, body.trim(), start));
        self.advance(end + 2);
        self.trim_next = trims;
        Ok(())
    }

    fn lex_tag(&mut self, kind: TagKind) -> TemplateResult<()> {
        let start = self.position();
        let (close, begin, end) = match kind {
            TagKind::Variable => ("}}", TokenKind::VariableBegin, TokenKind::VariableEnd),
            _ => ("%}", TokenKind::BlockBegin, TokenKind::BlockEnd),
        };
        let open_len = if self.source[self.offset + 2..].starts_with('-') {
            3
        } else {
            2
        };
        self.tokens.push(Token::new(
            begin,
            &self.source[self.offset..self.offset + open_len],
            start,
        ));
        self.advance(open_len);

        loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.is_empty() {
                return Err(parse_error(start, format!("Unclosed tag, expected '{close}'")));
            }
            let trimmed_close = rest.starts_with('-') && rest[1..].starts_with(close);
            if trimmed_close || rest.starts_with(close) {
                let len = if trimmed_close { 3 } else { 2 };
                let pos = self.position();
                self.tokens.push(Token::new(end, &rest[..len], pos));
                self.advance(len);
                self.trim_next = trimmed_close;
                if kind == TagKind::Block
                    && !trimmed_close
                    && self.config.trim_blocks
                    && self.rest().starts_with('\n')
                {
                    self.advance(1);
                }
                return Ok(());
            }
            self.lex_expression_token()?;
        }
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        let len = rest.len() - rest.trim_start().len();
        self.advance(len);
    }

    fn lex_expression_token(&mut self) -> TemplateResult<()> {
        let pos = self.position();
        let rest = self.rest();
        let Some(c) = rest.chars().next() else {
            return Ok(());
        };

        if c.is_alphabetic() || c == '_' {
            let len = rest
                .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            self.tokens.push(Token::new(TokenKind::Name, &rest[..len], pos));
            self.advance(len);
        } else if c.is_ascii_digit() {
            let int_len = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            let after = &rest[int_len..];
            let (kind, len) =
                if after.starts_with('.') && after[1..].starts_with(|c: char| c.is_ascii_digit()) {
                    let frac = after[1..]
                        .find(|c: char| !c.is_ascii_digit())
                        .unwrap_or(after.len() - 1);
                    (TokenKind::Float, int_len + 1 + frac)
                } else {
                    (TokenKind::Integer, int_len)
                };
            self.tokens.push(Token::new(kind, &rest[..len], pos));
            self.advance(len);
        } else if c == '"' || c == '\'' {
            self.lex_string(c, pos)?;
        } else if let Some(op) = TWO_CHAR_OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            self.tokens.push(Token::new(TokenKind::Operator, *op, pos));
            self.advance(2);
        } else if ONE_CHAR_OPERATORS.contains(c) {
            self.tokens
                .push(Token::new(TokenKind::Operator, c.to_string(), pos));
            self.advance(c.len_utf8());
        } else {
            return Err(parse_error(pos, format!("Unexpected character '{c}'")));
        }
        Ok(())
    }

    fn lex_string(&mut self, quote: char, pos: Position) -> TemplateResult<()> {
        let rest = self.rest();
        let mut value = String::new();
        let mut escaped = false;
        for (i, c) in rest.char_indices().skip(1) {
            if escaped {
                value.push(match c {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                self.tokens.push(Token::new(TokenKind::String, value, pos));
                self.advance(i + 1);
                return Ok(());
            } else {
                value.push(c);
            }
        }
        Err(parse_error(pos, "Unterminated string literal"))
    }
}

fn find_tag_start(text: &str) -> Option<(usize, TagKind)> {
    let bytes = text.as_bytes();
    let mut from = 0;
    while let Some(found) = text[from..].find('{') {
        let at = from + found;
        match bytes.get(at + 1) {
            Some(b'{') => return Some((at, TagKind::Variable)),
            Some(b'%') => return Some((at, TagKind::Block)),
            Some(b'#') => return Some((at, TagKind::Comment)),
            _ => from = at + 1,
        }
    }
    None
}
