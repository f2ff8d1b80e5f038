//! Symbol interning (spec §2, "Symbol table").
//!
//! A `Symbol` is a small `Copy` handle into an append-only table, stable for
//! the lifetime of the table, usable both as a `HashMap` key and embedded
//! directly in a tagged `Value` (spec §3).

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(u32);

impl Symbol {
    pub fn id(self) -> u32 {
        self.0
    }

    pub fn as_str(self) -> &'static str {
        SYMBOLS.with(|t| {
            let t = t.borrow();
            // Safe to extend lifetime: interned strings are never freed or
            // moved for the life of the process-local table.
            let s: &str = &t.names[self.0 as usize];
            unsafe { std::mem::transmute::<&str, &'static str>(s) }
        })
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Default)]
struct Table {
    names: Vec<Rc<str>>,
    lookup: HashMap<Rc<str>, Symbol>,
}

thread_local! {
    static SYMBOLS: RefCell<Table> = RefCell::new(Table::default());
}

/// Intern `name`, returning a stable `Symbol` handle.
///
/// There is deliberately no `SymbolTable` struct threaded through every
/// component: interning is process-global (thread-local, since the
/// interpreter is single-threaded per spec §5) so that a `Symbol` minted by
/// the scanner, the reader, the parser, or the built-in registry always
/// compares equal if the spelling matches.
/// Reconstruct a `Symbol` from a raw id previously obtained via
/// `Symbol::id`. Used only by `Value::as_symbol` to decode a tagged value
/// without leaking `Symbol`'s internal representation elsewhere.
pub fn intern_id(id: u32) -> Symbol {
    Symbol(id)
}

pub fn intern(name: &str) -> Symbol {
    SYMBOLS.with(|t| {
        let mut t = t.borrow_mut();
        if let Some(sym) = t.lookup.get(name) {
            return *sym;
        }
        let rc: Rc<str> = Rc::from(name);
        let sym = Symbol(t.names.len() as u32);
        t.names.push(rc.clone());
        t.lookup.insert(rc, sym);
        sym
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_spelling_interns_to_same_symbol() {
        let a = intern("hello");
        let b = intern("hello");
        assert_eq!(a, b);
    }

    #[test]
    fn different_spellings_intern_differently() {
        let a = intern("foo");
        let b = intern("bar");
        assert_ne!(a, b);
    }

    #[test]
    fn round_trips_spelling() {
        let s = intern("a-name-with-dashes!?");
        assert_eq!(s.as_str(), "a-name-with-dashes!?");
    }
}
