//! Character-level scanner: source text -> token stream (spec §6).
//!
//! Spec §1 treats lexical scanning as an external collaborator the core
//! pipeline merely consumes; this module is that collaborator. It is kept
//! intentionally small: a single pass over the input characters with no
//! lookahead beyond one character.

use crate::error::{NSchemeError, Result};
use crate::symbol::{intern, Symbol};
use crate::token::{Position, Token, TokenType};

pub struct Scanner<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    file: Symbol,
    line: usize,
    column: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str, filename: &str) -> Self {
        Scanner {
            chars: source.chars().peekable(),
            file: intern(filename),
            line: 1,
            column: 1,
        }
    }

    /// Scan the entire input into a token vector, terminated by one `Eof`
    /// token, so downstream stages never need to special-case running off
    /// the end of the stream.
    pub fn scan_all(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.ty == TokenType::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn pos(&self) -> Position {
        Position::new(self.file, self.line, self.column)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn skip_atmosphere(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some(';') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        self.skip_atmosphere();
        let position = self.pos();
        let c = match self.peek() {
            None => return Ok(Token::new(TokenType::Eof, position)),
            Some(c) => c,
        };

        let ty = match c {
            '(' | '[' => {
                self.advance();
                TokenType::OpenParen
            }
            ')' | ']' => {
                self.advance();
                TokenType::CloseParen
            }
            '\'' => {
                self.advance();
                TokenType::Quote
            }
            '`' => {
                self.advance();
                TokenType::BackQuote
            }
            ',' => {
                self.advance();
                if self.peek() == Some('@') {
                    self.advance();
                    TokenType::CommaAt
                } else {
                    TokenType::Comma
                }
            }
            '"' => self.scan_string(position)?,
            '#' => self.scan_sharp(position)?,
            '.' if self.is_lone_period() => {
                self.advance();
                TokenType::Period
            }
            _ => self.scan_atom(position)?,
        };
        Ok(Token::new(ty, position))
    }

    /// A `.` is the Period token only when it is not the start of a
    /// longer identifier/number such as `.5` or `...`.
    fn is_lone_period(&mut self) -> bool {
        let mut probe = self.chars.clone();
        probe.next(); // the '.' itself
        match probe.peek() {
            None => true,
            Some(c) => is_delimiter(*c),
        }
    }

    fn scan_string(&mut self, position: Position) -> Result<TokenType> {
        self.advance(); // opening quote
        let mut s = String::new();
        loop {
            match self.advance() {
                None => return Err(NSchemeError::ReadError(position, "unterminated string".into())),
                Some('"') => break,
                Some('\\') => {
                    let escaped = self
                        .advance()
                        .ok_or_else(|| NSchemeError::ReadError(position, "unterminated string".into()))?;
                    s.push(match escaped {
                        '"' => '"',
                        '\\' => '\\',
                        't' => '\t',
                        'r' => '\r',
                        'n' => '\n',
                        other => {
                            return Err(NSchemeError::ReadError(
                                position,
                                format!("unknown escape: \\{other}"),
                            ))
                        }
                    });
                }
                Some(c) => s.push(c),
            }
        }
        Ok(TokenType::String(s))
    }

    fn scan_sharp(&mut self, position: Position) -> Result<TokenType> {
        self.advance(); // '#'
        match self.peek() {
            Some('(') => {
                self.advance();
                Ok(TokenType::SharpOpenParen)
            }
            Some('t') => {
                self.advance();
                Ok(TokenType::True)
            }
            Some('f') => {
                self.advance();
                Ok(TokenType::False)
            }
            Some('\\') => {
                self.advance();
                self.scan_character(position)
            }
            _ => Err(NSchemeError::ReadError(position, "unknown # syntax".into())),
        }
    }

    fn scan_character(&mut self, position: Position) -> Result<TokenType> {
        let mut name = String::new();
        // A character name is at least one character; subsequent
        // alphanumerics extend a named literal like `#\space`.
        if let Some(c) = self.advance() {
            name.push(c);
        } else {
            return Err(NSchemeError::ReadError(position, "unterminated character literal".into()));
        }
        if name.chars().next().map(|c| c.is_alphabetic()).unwrap_or(false) {
            while let Some(c) = self.peek() {
                if c.is_alphanumeric() {
                    name.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }
        let ch = match name.as_str() {
            "space" => ' ',
            "newline" => '\n',
            "tab" => '\t',
            "return" => '\r',
            "null" | "nul" => '\0',
            single if single.chars().count() == 1 => single.chars().next().unwrap(),
            other => {
                return Err(NSchemeError::ReadError(
                    position,
                    format!("unknown character name: {other}"),
                ))
            }
        };
        Ok(TokenType::Character(ch))
    }

    fn scan_atom(&mut self, position: Position) -> Result<TokenType> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if is_delimiter(c) {
                break;
            }
            text.push(c);
            self.advance();
        }
        if text.is_empty() {
            return Err(NSchemeError::ReadError(position, "unexpected character".to_string()));
        }
        if let Ok(n) = text.parse::<i64>() {
            return Ok(TokenType::Integer(n));
        }
        if text.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false)
            || (text.starts_with(['-', '+']) && text.len() > 1 && text.as_bytes()[1].is_ascii_digit())
        {
            if let Ok(r) = text.parse::<f64>() {
                return Ok(TokenType::Real(r));
            }
        }
        Ok(TokenType::Identifier(intern(&text)))
    }
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | '"' | ';' | '\'' | '`' | ',')
}
