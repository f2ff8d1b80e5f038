//! Reader: token stream -> `Value` datum tree (spec §4.2).
//!
//! A single-token-of-lookahead recursive descent over the already-scanned
//! `Token` slice, building `Pair`/`Vector`/`String`/`Real` objects directly
//! through the allocator as it goes. Every Pair and Vector it builds is
//! entered into the source map under its `ObjectId`.

use crate::allocator::Allocator;
use crate::error::{NSchemeError, Result};
use crate::symbol::intern;
use crate::token::{Position, Token, TokenType};
use crate::value::{Object, Value};
use std::cell::Cell;
use std::collections::HashMap;

pub type SourceMap = HashMap<crate::value::ObjectId, Position>;

pub struct Reader<'a> {
    tokens: &'a [Token],
    pos: usize,
    alloc: &'a mut Allocator,
    source_map: SourceMap,
}

impl<'a> Reader<'a> {
    pub fn new(tokens: &'a [Token], alloc: &'a mut Allocator) -> Self {
        Reader {
            tokens,
            pos: 0,
            alloc,
            source_map: SourceMap::new(),
        }
    }

    /// Read every top-level datum up to `Eof`, returning the datums and the
    /// source map built while reading them.
    pub fn read_program(mut self) -> Result<(Vec<Value>, SourceMap)> {
        let mut datums = Vec::new();
        while self.peek().ty != TokenType::Eof {
            datums.push(self.read_datum()?);
        }
        Ok((datums, self.source_map))
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn read_datum(&mut self) -> Result<Value> {
        let tok = self.peek().clone();
        match tok.ty {
            TokenType::True => {
                self.advance();
                Ok(Value::TRUE)
            }
            TokenType::False => {
                self.advance();
                Ok(Value::FALSE)
            }
            TokenType::Integer(n) => {
                self.advance();
                Ok(Value::integer(n))
            }
            TokenType::Real(r) => {
                self.advance();
                let id = self.alloc.alloc(Object::Real(r));
                Ok(Value::from_object(id))
            }
            TokenType::Character(c) => {
                self.advance();
                Ok(Value::character(c))
            }
            TokenType::String(s) => {
                self.advance();
                let id = self.alloc.alloc(Object::String(s));
                Ok(Value::from_object(id))
            }
            TokenType::Identifier(sym) => {
                self.advance();
                Ok(Value::symbol(sym))
            }
            TokenType::OpenParen => self.read_list(),
            TokenType::SharpOpenParen => self.read_vector(),
            TokenType::Quote | TokenType::BackQuote | TokenType::Comma | TokenType::CommaAt => {
                self.read_abbreviation()
            }
            _ => Err(NSchemeError::ReadError(tok.position, "unexpected token".into())),
        }
    }

    fn read_list(&mut self) -> Result<Value> {
        let position = self.peek().position;
        self.advance(); // '('
        let mut first: Option<crate::value::ObjectId> = None;
        let mut last: Option<crate::value::ObjectId> = None;
        loop {
            match self.peek().ty {
                TokenType::Eof => {
                    return Err(NSchemeError::ReadError(position, "unclosed list".into()))
                }
                TokenType::CloseParen => break,
                TokenType::Period if first.is_some() => {
                    self.advance(); // '.'
                    let tail = self.read_datum()?;
                    if let Object::Pair(_, cdr) = self.alloc.get(last.unwrap()) {
                        cdr.set(tail);
                    }
                    if self.peek().ty != TokenType::CloseParen {
                        return Err(NSchemeError::ReadError(
                            self.peek().position,
                            "expected ')' after dotted tail".into(),
                        ));
                    }
                    break;
                }
                _ => {
                    let elem_pos = self.peek().position;
                    let elem = self.read_datum()?;
                    let id = self.alloc.alloc(Object::Pair(Cell::new(elem), Cell::new(Value::NIL)));
                    self.source_map.insert(id, elem_pos);
                    match last {
                        None => {
                            first = Some(id);
                            last = Some(id);
                        }
                        Some(prev) => {
                            if let Object::Pair(_, cdr) = self.alloc.get(prev) {
                                cdr.set(Value::from_object(id));
                            }
                            last = Some(id);
                        }
                    }
                }
            }
        }
        self.advance(); // ')'
        match first {
            Some(id) => Ok(Value::from_object(id)),
            None => Ok(Value::NIL),
        }
    }

    fn read_vector(&mut self) -> Result<Value> {
        let position = self.peek().position;
        self.advance(); // '#('
        let mut elems = Vec::new();
        loop {
            match self.peek().ty {
                TokenType::Eof => {
                    return Err(NSchemeError::ReadError(position, "unclosed vector literal".into()))
                }
                TokenType::CloseParen => break,
                _ => elems.push(self.read_datum()?),
            }
        }
        self.advance(); // ')'
        let id = self.alloc.alloc(Object::Vector(std::cell::RefCell::new(elems)));
        self.source_map.insert(id, position);
        Ok(Value::from_object(id))
    }

    fn read_abbreviation(&mut self) -> Result<Value> {
        let position = self.peek().position;
        let name = match self.peek().ty {
            TokenType::Quote => "quote",
            TokenType::BackQuote => "quasiquote",
            TokenType::Comma => "unquote",
            TokenType::CommaAt => "unquote-splicing",
            _ => unreachable!(),
        };
        self.advance();
        let symbol = intern(name);
        let inner = self.read_datum()?;
        let inner_pair = self.alloc.alloc(Object::Pair(Cell::new(inner), Cell::new(Value::NIL)));
        let outer_pair = self.alloc.alloc(Object::Pair(
            Cell::new(Value::symbol(symbol)),
            Cell::new(Value::from_object(inner_pair)),
        ));
        self.source_map.insert(inner_pair, position);
        self.source_map.insert(outer_pair, position);
        Ok(Value::from_object(outer_pair))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Scanner;

    fn read_one(src: &str) -> (Value, Allocator) {
        let tokens = Scanner::new(src, "test").scan_all().unwrap();
        let mut alloc = Allocator::new(1 << 20);
        let (datums, _map) = {
            let reader = Reader::new(&tokens, &mut alloc);
            reader.read_program().unwrap()
        };
        (datums[0], alloc)
    }

    fn list_items(alloc: &Allocator, mut v: Value) -> Vec<Value> {
        let mut items = Vec::new();
        while let Some(id) = v.as_object() {
            match alloc.get(id) {
                Object::Pair(car, cdr) => {
                    items.push(car.get());
                    v = cdr.get();
                }
                _ => break,
            }
        }
        items
    }

    #[test]
    fn reads_proper_list() {
        let (v, alloc) = read_one("(1 2 3)");
        let items = list_items(&alloc, v);
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_integer(), Some(1));
        assert_eq!(items[2].as_integer(), Some(3));
    }

    #[test]
    fn reads_dotted_pair() {
        let (v, alloc) = read_one("(1 . 2)");
        let id = v.as_object().unwrap();
        match alloc.get(id) {
            Object::Pair(car, cdr) => {
                assert_eq!(car.get().as_integer(), Some(1));
                assert_eq!(cdr.get().as_integer(), Some(2));
            }
            _ => panic!("expected pair"),
        }
    }

    #[test]
    fn reads_empty_list_as_nil() {
        let (v, _alloc) = read_one("()");
        assert!(v.is_nil());
    }

    #[test]
    fn reads_vector_literal() {
        let (v, alloc) = read_one("#(1 2 3)");
        let id = v.as_object().unwrap();
        match alloc.get(id) {
            Object::Vector(elems) => assert_eq!(elems.borrow().len(), 3),
            _ => panic!("expected vector"),
        }
    }

    #[test]
    fn quote_abbreviation_expands_to_quote_form() {
        let (v, alloc) = read_one("'x");
        let items = list_items(&alloc, v);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_symbol().map(|s| s.as_str()), Some("quote"));
        assert_eq!(items[1].as_symbol().map(|s| s.as_str()), Some("x"));
    }

    #[test]
    fn unclosed_list_is_read_error() {
        let tokens = Scanner::new("(1 2", "test").scan_all().unwrap();
        let mut alloc = Allocator::new(1 << 20);
        let reader = Reader::new(&tokens, &mut alloc);
        let err = reader.read_program().unwrap_err();
        assert!(matches!(err, NSchemeError::ReadError(_, _)));
    }

    #[test]
    fn unexpected_close_paren_is_read_error() {
        let tokens = Scanner::new(")", "test").scan_all().unwrap();
        let mut alloc = Allocator::new(1 << 20);
        let reader = Reader::new(&tokens, &mut alloc);
        let err = reader.read_program().unwrap_err();
        assert!(matches!(err, NSchemeError::ReadError(_, _)));
    }
}
