//! Tokenizer for the traced Python subset.
//!
//! Produces a flat token stream with explicit `Newline`, `Indent` and
//! `Dedent` tokens. Newlines inside brackets and after a backslash are
//! joined, as in Python.

use num_bigint::BigInt;

use super::error::SyntaxError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    /// Integer literal outside the `i64` range.
    BigInt(BigInt),
    Float(f64),
    Str(String),
    /// Raw body of an f-string; placeholders are parsed later.
    FStr(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: u32,
}

const OPERATORS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "->", "**", "//", "==", "!=", "<=", ">=", "<<", ">>", "+=",
    "-=", "*=", "/=", "%=", "&=", "|=", "^=", ":=", "+", "-", "*", "/", "%", "<", ">", "=",
    "(", ")", "[", "]", "{", "}", ",", ":", ".", ";", "@", "&", "|", "^", "~",
];

/// Decode the digits of a `\x`, `\u` or `\U` escape into the character and
/// the number of digits consumed. `None` when the digits are short, not
/// hexadecimal, or name no character.
pub(super) fn hex_escape(kind: char, digits: &[char]) -> Option<(char, usize)> {
    let width = match kind {
        'x' => 2,
        'u' => 4,
        'U' => 8,
        _ => return None,
    };
    let digits = digits.get(..width)?;
    if !digits.iter().all(char::is_ascii_hexdigit) {
        return None;
    }
    let text: String = digits.iter().collect();
    let decoded = u32::from_str_radix(&text, 16).ok().and_then(char::from_u32)?;
    Some((decoded, width))
}

fn int_token(value: BigInt) -> Tok {
    match i64::try_from(&value) {
        Ok(small) => Tok::Int(small),
        Err(_) => Tok::BigInt(value),
    }
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            depth: 0,
            indents: vec![0],
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok, line: u32) {
        self.tokens.push(Token { tok, line });
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, self.line)
    }

    fn run(mut self) -> Result<Vec<Token>, SyntaxError> {
        let mut at_line_start = true;

        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                at_line_start = false;
                if self.handle_indentation()? {
                    at_line_start = true;
                    continue;
                }
            }

            let Some(ch) = self.peek() else { break };
            match ch {
                '\n' => {
                    self.pos += 1;
                    if self.depth == 0 {
                        self.push_newline();
                        at_line_start = true;
                    }
                    self.line += 1;
                }
                ' ' | '\t' | '\r' | '\x0c' => self.pos += 1,
                '#' => self.skip_comment(),
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '\\' if self.peek_at(1) == Some('\r') && self.peek_at(2) == Some('\n') => {
                    self.pos += 3;
                    self.line += 1;
                }
                c if c.is_ascii_digit() => self.number()?,
                '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.number()?,
                c if c == '_' || c.is_alphabetic() => self.name_or_string()?,
                '"' | '\'' => self.string(false, false)?,
                _ => self.operator()?,
            }
        }

        if !matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline)
        ) {
            let line = self.line;
            self.push(Tok::Newline, line);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            let line = self.line;
            self.push(Tok::Dedent, line);
        }
        let line = self.line;
        self.push(Tok::Eof, line);
        Ok(self.tokens)
    }

    fn push_newline(&mut self) {
        if matches!(
            self.tokens.last().map(|t| &t.tok),
            Some(Tok::Newline) | Some(Tok::Indent) | Some(Tok::Dedent) | None
        ) {
            return;
        }
        let line = self.line;
        self.push(Tok::Newline, line);
    }

    /// Measures leading whitespace. Returns `true` when the line is blank or a
    /// comment and has been consumed entirely.
    fn handle_indentation(&mut self) -> Result<bool, SyntaxError> {
        let mut width = 0usize;
        while let Some(ch) = self.peek() {
            match ch {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\x0c' => width = 0,
                _ => break,
            }
            self.pos += 1;
        }

        match self.peek() {
            None => return Ok(true),
            Some('\n') => {
                self.pos += 1;
                self.line += 1;
                return Ok(true);
            }
            Some('\r') if self.peek_at(1) == Some('\n') => {
                self.pos += 2;
                self.line += 1;
                return Ok(true);
            }
            Some('#') => {
                self.skip_comment();
                if self.peek() == Some('\n') {
                    self.pos += 1;
                    self.line += 1;
                }
                return Ok(true);
            }
            _ => {}
        }

        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            self.indents.push(width);
            let line = self.line;
            self.push(Tok::Indent, line);
        } else {
            while width < *self.indents.last().unwrap_or(&0) {
                self.indents.pop();
                let line = self.line;
                self.push(Tok::Dedent, line);
            }
            if width != *self.indents.last().unwrap_or(&0) {
                return Err(self.error("unindent does not match any outer indentation level"));
            }
        }
        Ok(false)
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn number(&mut self) -> Result<(), SyntaxError> {
        let line = self.line;
        let start = self.pos;

        if self.peek() == Some('0')
            && matches!(self.peek_at(1), Some('x' | 'X' | 'o' | 'O' | 'b' | 'B'))
        {
            let radix = match self.peek_at(1) {
                Some('x' | 'X') => 16,
                Some('o' | 'O') => 8,
                _ => 2,
            };
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
                self.pos += 1;
            }
            let digits: String = self.chars[digits_start..self.pos]
                .iter()
                .filter(|c| **c != '_')
                .collect();
            let value = BigInt::parse_bytes(digits.as_bytes(), radix)
                .filter(|_| !digits.starts_with(['+', '-']))
                .ok_or_else(|| self.error(format!("invalid integer literal '{digits}'")))?;
            self.push(int_token(value), line);
            return Ok(());
        }

        let mut is_float = false;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() || ch == '_' {
                self.pos += 1;
            } else if ch == '.' && !is_float {
                is_float = true;
                self.pos += 1;
            } else if (ch == 'e' || ch == 'E')
                && (self.peek_at(1).is_some_and(|c| c.is_ascii_digit())
                    || (matches!(self.peek_at(1), Some('+' | '-'))
                        && self.peek_at(2).is_some_and(|c| c.is_ascii_digit())))
            {
                is_float = true;
                self.pos += 2;
            } else {
                break;
            }
        }

        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        if is_float {
            let value = text
                .parse::<f64>()
                .map_err(|_| self.error(format!("invalid float literal '{text}'")))?;
            self.push(Tok::Float(value), line);
        } else {
            let value = text
                .parse::<BigInt>()
                .map_err(|_| self.error(format!("invalid integer literal '{text}'")))?;
            self.push(int_token(value), line);
        }
        Ok(())
    }

    fn name_or_string(&mut self) -> Result<(), SyntaxError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c == '_' || c.is_alphanumeric())
        {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();

        if matches!(self.peek(), Some('"' | '\'')) && word.len() <= 2 {
            let lower = word.to_ascii_lowercase();
            if lower.chars().all(|c| matches!(c, 'r' | 'b' | 'f' | 'u')) {
                return self.string(lower.contains('r'), lower.contains('f'));
            }
        }

        let line = self.line;
        self.push(Tok::Name(word), line);
        Ok(())
    }

    fn string(&mut self, raw: bool, formatted: bool) -> Result<(), SyntaxError> {
        let line = self.line;
        let quote = self.peek().unwrap_or('"');
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let mut value = String::new();
        loop {
            let Some(ch) = self.peek() else {
                return Err(SyntaxError::new("unterminated string literal", line));
            };
            if ch == quote {
                if !triple {
                    self.pos += 1;
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    break;
                }
            }
            if ch == '\n' {
                if !triple {
                    return Err(SyntaxError::new("unterminated string literal", line));
                }
                self.line += 1;
            }
            if ch == '\\' {
                let next = self.peek_at(1);
                if raw || formatted {
                    // f-string escapes are resolved after placeholder parsing.
                    value.push('\\');
                    if let Some(n) = next {
                        if n == '\n' {
                            self.line += 1;
                        }
                        value.push(n);
                    }
                    self.pos += 2;
                    continue;
                }
                self.pos += 2;
                match next {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some('0') => value.push('\0'),
                    Some('\\') => value.push('\\'),
                    Some('\'') => value.push('\''),
                    Some('"') => value.push('"'),
                    Some('\n') => self.line += 1,
                    Some(kind @ ('x' | 'u' | 'U')) => {
                        let (decoded, width) = hex_escape(kind, &self.chars[self.pos..])
                            .ok_or_else(|| {
                                SyntaxError::new(format!("truncated \\{kind} escape"), line)
                            })?;
                        value.push(decoded);
                        self.pos += width;
                    }
                    Some(other) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => return Err(SyntaxError::new("unterminated string literal", line)),
                }
                continue;
            }
            value.push(ch);
            self.pos += 1;
        }

        let tok = if formatted {
            Tok::FStr(value)
        } else {
            Tok::Str(value)
        };
        // Adjacent literals concatenate; f-strings keep their own token.
        if let (Tok::Str(next), Some(Token { tok: Tok::Str(prev), .. })) =
            (&tok, self.tokens.last_mut())
        {
            prev.push_str(next);
            return Ok(());
        }
        self.push(tok, line);
        Ok(())
    }

    fn operator(&mut self) -> Result<(), SyntaxError> {
        let line = self.line;
        for op in OPERATORS {
            let len = op.chars().count();
            if self.pos + len <= self.chars.len()
                && op
                    .chars()
                    .zip(&self.chars[self.pos..self.pos + len])
                    .all(|(a, b)| a == *b)
            {
                match *op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.pos += len;
                self.push(Tok::Op(op), line);
                return Ok(());
            }
        }
        let ch = self.peek().unwrap_or(' ');
        Err(self.error(format!("invalid character '{ch}'")))
    }
}
