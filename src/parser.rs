//! Semantic parser: datum -> typed AST, resolving lexical addresses and
//! recognizing special forms by head-symbol equality (spec §4.2).
//!
//! The "current frame" a `define` writes into is, at the top level, the
//! global frame itself: the parser is constructed with the sorted built-in
//! names already occupying scope depth 0 (spec §4.6's registry/parser ABI),
//! and top-level `define`s simply extend that same scope with new slots —
//! there is no separate code path for "global" vs. "local" definitions.

use crate::allocator::Allocator;
use crate::ast::{Define, Expr, Lambda, Node};
use crate::error::{NSchemeError, Result};
use crate::reader::SourceMap;
use crate::symbol::Symbol;
use crate::token::Position;
use crate::value::{Object, Value};

pub struct Parser<'a> {
    alloc: &'a Allocator,
    source_map: &'a SourceMap,
    default_position: Position,
    scopes: Vec<Vec<Symbol>>,
    kwd_lambda: Symbol,
    kwd_if: Symbol,
    kwd_set_bang: Symbol,
    kwd_quote: Symbol,
    kwd_define: Symbol,
}

impl<'a> Parser<'a> {
    pub fn new(
        alloc: &'a Allocator,
        source_map: &'a SourceMap,
        default_position: Position,
        global_names: &[Symbol],
    ) -> Self {
        Parser {
            alloc,
            source_map,
            default_position,
            scopes: vec![global_names.to_vec()],
            kwd_lambda: crate::symbol::intern("lambda"),
            kwd_if: crate::symbol::intern("if"),
            kwd_set_bang: crate::symbol::intern("set!"),
            kwd_quote: crate::symbol::intern("quote"),
            kwd_define: crate::symbol::intern("define"),
        }
    }

    /// Returns the parsed forms together with the final size of the
    /// outermost scope (built-ins plus every top-level `define`): the VM
    /// sizes its global frame to exactly this many slots.
    pub fn parse_program(mut self, datums: &[Value]) -> Result<(Vec<Node>, usize)> {
        let nodes = self.parse_body(datums)?;
        let frame_size = self.scopes[0].len();
        Ok((nodes, frame_size))
    }

    fn position_of(&self, v: Value) -> Position {
        v.as_object()
            .and_then(|id| self.source_map.get(&id).copied())
            .unwrap_or(self.default_position)
    }

    fn as_pair(&self, v: Value) -> Option<(Value, Value)> {
        let id = v.as_object()?;
        match self.alloc.get(id) {
            Object::Pair(car, cdr) => Some((car.get(), cdr.get())),
            _ => None,
        }
    }

    fn is_self_evaluating(&self, v: Value) -> bool {
        if v.is_integer() || v.is_character() || v == Value::TRUE || v == Value::FALSE {
            return true;
        }
        match v.as_object() {
            Some(id) => matches!(self.alloc.get(id), Object::String(_) | Object::Real(_) | Object::Vector(_)),
            None => false,
        }
    }

    fn list_to_vec(&self, mut v: Value, position: Position) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        loop {
            if v.is_nil() {
                return Ok(out);
            }
            match self.as_pair(v) {
                Some((car, cdr)) => {
                    out.push(car);
                    v = cdr;
                }
                None => {
                    return Err(NSchemeError::ParseError(
                        position,
                        "improper list where a proper list is required".into(),
                    ))
                }
            }
        }
    }

    fn declare_local(&mut self, name: Symbol) -> usize {
        let scope = self.scopes.last_mut().expect("at least one scope always present");
        match scope.iter().position(|s| *s == name) {
            Some(i) => i,
            None => {
                scope.push(name);
                scope.len() - 1
            }
        }
    }

    fn resolve_name(&self, sym: Symbol, position: Position) -> Expr {
        for (i, scope) in self.scopes.iter().enumerate().rev() {
            if let Some(slot) = scope.iter().position(|s| *s == sym) {
                let depth = self.scopes.len() - 1 - i;
                return Expr::LocalVarRef(depth, slot, position);
            }
        }
        Expr::NamedVarRef(sym, position)
    }

    fn resolve_assign(&self, sym: Symbol, expr: Expr, position: Position) -> Expr {
        for (i, scope) in self.scopes.iter().enumerate().rev() {
            if let Some(slot) = scope.iter().position(|s| *s == sym) {
                let depth = self.scopes.len() - 1 - i;
                return Expr::LocalAssign(depth, slot, Box::new(expr), position);
            }
        }
        Expr::NamedAssign(sym, Box::new(expr), position)
    }

    /// Phase 1 collects every `define` name at this body's head and assigns
    /// it a slot (so mutually recursive definitions resolve lexically);
    /// phase 2 parses every form, definitions and expressions alike, in
    /// their original order.
    fn parse_body(&mut self, datums: &[Value]) -> Result<Vec<Node>> {
        for d in datums {
            if let Some(name) = self.define_name(*d)? {
                self.declare_local(name);
            }
        }
        datums.iter().map(|d| self.parse_node(*d)).collect()
    }

    fn define_name(&self, datum: Value) -> Result<Option<Symbol>> {
        let Some((car, cdr)) = self.as_pair(datum) else {
            return Ok(None);
        };
        if car.as_symbol() != Some(self.kwd_define) {
            return Ok(None);
        }
        let position = self.position_of(datum);
        let (target, _rest) = self
            .as_pair(cdr)
            .ok_or_else(|| NSchemeError::ParseError(position, "malformed define".into()))?;
        if let Some(sym) = target.as_symbol() {
            Ok(Some(sym))
        } else if let Some((name_val, _)) = self.as_pair(target) {
            let sym = name_val
                .as_symbol()
                .ok_or_else(|| NSchemeError::ParseError(position, "define target must be a symbol".into()))?;
            Ok(Some(sym))
        } else {
            Err(NSchemeError::ParseError(position, "invalid define target".into()))
        }
    }

    fn parse_node(&mut self, datum: Value) -> Result<Node> {
        let position = self.position_of(datum);
        if let Some((car, cdr)) = self.as_pair(datum) {
            if car.as_symbol() == Some(self.kwd_define) {
                return self.parse_define(cdr, position);
            }
        }
        Ok(Node::Expr(self.parse_expr(datum)?))
    }

    fn parse_expr(&mut self, datum: Value) -> Result<Expr> {
        let position = self.position_of(datum);
        if let Some(sym) = datum.as_symbol() {
            return Ok(self.resolve_name(sym, position));
        }
        if self.is_self_evaluating(datum) {
            return Ok(Expr::Literal(datum, position));
        }
        if let Some((car, cdr)) = self.as_pair(datum) {
            if let Some(sym) = car.as_symbol() {
                if sym == self.kwd_lambda {
                    return self.parse_lambda(cdr, position);
                }
                if sym == self.kwd_if {
                    return self.parse_if(cdr, position);
                }
                if sym == self.kwd_set_bang {
                    return self.parse_set(cdr, position);
                }
                if sym == self.kwd_quote {
                    return self.parse_quote(cdr, position);
                }
                if sym == self.kwd_define {
                    return Err(NSchemeError::ParseError(
                        position,
                        "define is only allowed at the head of a body".into(),
                    ));
                }
            }
            return self.parse_call(car, cdr, position);
        }
        Err(NSchemeError::ParseError(position, "invalid expression".into()))
    }

    fn parse_call(&mut self, callee: Value, args_val: Value, position: Position) -> Result<Expr> {
        let callee_expr = self.parse_expr(callee)?;
        let arg_vals = self.list_to_vec(args_val, position)?;
        let args = arg_vals
            .into_iter()
            .map(|a| self.parse_expr(a))
            .collect::<Result<Vec<_>>>()?;
        Ok(Expr::Call(Box::new(callee_expr), args, position))
    }

    fn parse_if(&mut self, cdr: Value, position: Position) -> Result<Expr> {
        let parts = self.list_to_vec(cdr, position)?;
        if parts.len() != 3 {
            return Err(NSchemeError::ParseError(position, "if requires exactly 3 sub-expressions".into()));
        }
        let cond = self.parse_expr(parts[0])?;
        let then_e = self.parse_expr(parts[1])?;
        let else_e = self.parse_expr(parts[2])?;
        Ok(Expr::If(Box::new(cond), Box::new(then_e), Box::new(else_e), position))
    }

    fn parse_set(&mut self, cdr: Value, position: Position) -> Result<Expr> {
        let parts = self.list_to_vec(cdr, position)?;
        if parts.len() != 2 {
            return Err(NSchemeError::ParseError(position, "set! requires a name and an expression".into()));
        }
        let name = parts[0]
            .as_symbol()
            .ok_or_else(|| NSchemeError::ParseError(position, "the first argument of set! must be a symbol".into()))?;
        let expr = self.parse_expr(parts[1])?;
        Ok(self.resolve_assign(name, expr, position))
    }

    fn parse_quote(&mut self, cdr: Value, position: Position) -> Result<Expr> {
        let parts = self.list_to_vec(cdr, position)?;
        if parts.len() != 1 {
            return Err(NSchemeError::ParseError(position, "quote requires exactly one datum".into()));
        }
        Ok(Expr::Literal(parts[0], position))
    }

    fn parse_lambda(&mut self, cdr: Value, position: Position) -> Result<Expr> {
        let (arg_spec, body_cdr) = self
            .as_pair(cdr)
            .ok_or_else(|| NSchemeError::ParseError(position, "malformed lambda".into()))?;
        self.build_lambda(arg_spec, body_cdr, position)
    }

    fn build_lambda(&mut self, arg_spec: Value, body_cdr: Value, position: Position) -> Result<Expr> {
        let (fixed_names, rest_name) = self.parse_arg_spec(arg_spec, position)?;
        let body_datums = self.list_to_vec(body_cdr, position)?;
        if body_datums.is_empty() {
            return Err(NSchemeError::ParseError(position, "lambda body must have at least one expression".into()));
        }
        let mut scope = fixed_names.clone();
        if let Some(r) = rest_name {
            scope.push(r);
        }
        self.scopes.push(scope);
        let body = self.parse_body(&body_datums)?;
        let frame_size = self.scopes.last().unwrap().len();
        self.scopes.pop();
        Ok(Expr::Lambda(Lambda {
            arg_count: fixed_names.len(),
            variadic: rest_name.is_some(),
            frame_size,
            body,
            position,
        }))
    }

    /// Accepts `()`, `(a b c)`, `(a b . rest)`, and a bare symbol (fully
    /// variadic, binding the whole argument list).
    fn parse_arg_spec(&self, arg_spec: Value, position: Position) -> Result<(Vec<Symbol>, Option<Symbol>)> {
        if let Some(sym) = arg_spec.as_symbol() {
            return Ok((Vec::new(), Some(sym)));
        }
        let mut names = Vec::new();
        let mut v = arg_spec;
        loop {
            if v.is_nil() {
                return Ok((names, None));
            }
            if let Some(sym) = v.as_symbol() {
                return Ok((names, Some(sym)));
            }
            match self.as_pair(v) {
                Some((car, cdr)) => {
                    let name = car
                        .as_symbol()
                        .ok_or_else(|| NSchemeError::ParseError(position, "lambda parameter must be a symbol".into()))?;
                    names.push(name);
                    v = cdr;
                }
                None => return Err(NSchemeError::ParseError(position, "malformed lambda parameter list".into())),
            }
        }
    }

    fn parse_define(&mut self, cdr: Value, position: Position) -> Result<Node> {
        let (target, rest) = self
            .as_pair(cdr)
            .ok_or_else(|| NSchemeError::ParseError(position, "malformed define".into()))?;
        if let Some(name) = target.as_symbol() {
            let exprs = self.list_to_vec(rest, position)?;
            if exprs.len() != 1 {
                return Err(NSchemeError::ParseError(position, "define requires exactly one expression".into()));
            }
            let slot = self.declare_local(name);
            let expr = self.parse_expr(exprs[0])?;
            Ok(Node::Define(Define { name, slot, expr, position }))
        } else if let Some((name_val, arg_spec)) = self.as_pair(target) {
            let name = name_val
                .as_symbol()
                .ok_or_else(|| NSchemeError::ParseError(position, "define target must be a symbol".into()))?;
            let slot = self.declare_local(name);
            let expr = self.build_lambda(arg_spec, rest, position)?;
            Ok(Node::Define(Define { name, slot, expr, position }))
        } else {
            Err(NSchemeError::ParseError(position, "invalid define target".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Allocator;
    use crate::reader::Reader;
    use crate::scanner::Scanner;
    use crate::symbol::intern;

    fn parse(src: &str, global_names: &[Symbol]) -> (Vec<Node>, Allocator) {
        let tokens = Scanner::new(src, "test").scan_all().unwrap();
        let mut alloc = Allocator::new(1 << 20);
        let (datums, map) = Reader::new(&tokens, &mut alloc).read_program().unwrap();
        let default_pos = Position::new(intern("test"), 1, 1);
        let (nodes, _frame_size) = Parser::new(&alloc, &map, default_pos, global_names)
            .parse_program(&datums)
            .unwrap();
        (nodes, alloc)
    }

    #[test]
    fn lambda_parameter_resolves_to_local_var_ref() {
        let (nodes, _alloc) = parse("(lambda (x) x)", &[]);
        assert_eq!(nodes.len(), 1);
        let Node::Expr(Expr::Lambda(lambda)) = &nodes[0] else { panic!("expected lambda") };
        assert_eq!(lambda.arg_count, 1);
        assert!(!lambda.variadic);
        assert_eq!(lambda.body.len(), 1);
        let Node::Expr(Expr::LocalVarRef(depth, slot, _)) = &lambda.body[0] else {
            panic!("expected local var ref")
        };
        assert_eq!((*depth, *slot), (0, 0));
    }

    #[test]
    fn free_identifier_becomes_named_var_ref() {
        let (nodes, _alloc) = parse("(foo)", &[]);
        let Node::Expr(Expr::Call(callee, _, _)) = &nodes[0] else { panic!("expected call") };
        assert!(matches!(**callee, Expr::NamedVarRef(_, _)));
    }

    #[test]
    fn builtin_name_resolves_to_global_slot() {
        let plus = intern("+");
        let (nodes, _alloc) = parse("(+ 1 2)", &[plus]);
        let Node::Expr(Expr::Call(callee, args, _)) = &nodes[0] else { panic!("expected call") };
        assert!(matches!(**callee, Expr::LocalVarRef(0, 0, _)));
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn mutually_recursive_internal_defines_resolve_lexically() {
        let (nodes, _alloc) = parse(
            "(lambda () (define (f n) (g n)) (define (g n) n) (f 1))",
            &[],
        );
        let Node::Expr(Expr::Lambda(outer)) = &nodes[0] else { panic!("expected lambda") };
        assert_eq!(outer.frame_size, 2); // f, g
        let Node::Define(f_def) = &outer.body[0] else { panic!("expected define") };
        let Expr::Lambda(f_lambda) = &f_def.expr else { panic!("expected lambda") };
        let Node::Expr(Expr::Call(callee, _, _)) = &f_lambda.body[0] else { panic!("expected call") };
        // g is one enclosing frame up (depth 1) from f's own frame.
        assert!(matches!(**callee, Expr::LocalVarRef(1, 1, _)));
    }

    #[test]
    fn if_requires_exactly_three_arms() {
        let tokens = Scanner::new("(if 1 2)", "test").scan_all().unwrap();
        let mut alloc = Allocator::new(1 << 20);
        let (datums, map) = Reader::new(&tokens, &mut alloc).read_program().unwrap();
        let default_pos = Position::new(intern("test"), 1, 1);
        let err = Parser::new(&alloc, &map, default_pos, &[]).parse_program(&datums).unwrap_err();
        assert!(matches!(err, NSchemeError::ParseError(_, _)));
    }

    #[test]
    fn variadic_lambda_binds_dotted_rest_parameter() {
        let (nodes, _alloc) = parse("(lambda (a . rest) rest)", &[]);
        let Node::Expr(Expr::Lambda(lambda)) = &nodes[0] else { panic!("expected lambda") };
        assert_eq!(lambda.arg_count, 1);
        assert!(lambda.variadic);
        assert_eq!(lambda.frame_size, 2);
    }

    #[test]
    fn quote_yields_unevaluated_datum() {
        let (nodes, _alloc) = parse("(quote (1 2))", &[]);
        assert!(matches!(nodes[0], Node::Expr(Expr::Literal(_, _))));
    }
}
