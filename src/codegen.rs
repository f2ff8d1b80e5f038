//! AST -> flat `Vec<Inst>` (spec §4.3).
//!
//! Each lambda's body is generated into its own block and appended after
//! the main stream once the whole program has been walked; `LoadClosure`
//! and branch instructions reference labels by an abstract id assigned
//! during generation, rewritten to final vector indices in one resolution
//! pass at the end.

use crate::ast::{Expr, Node};
use crate::inst::{Inst, LabelId};
use std::collections::HashMap;

struct Codegen {
    next_label: LabelId,
    blocks: Vec<Vec<Inst>>,
}

impl Codegen {
    fn new() -> Self {
        Codegen { next_label: 0, blocks: Vec::new() }
    }

    fn fresh_label(&mut self) -> LabelId {
        let id = self.next_label;
        self.next_label += 1;
        id
    }

    /// The top level has no caller to receive a result, so every form's
    /// value is discarded, including the last — unlike a lambda body.
    fn gen_program(&mut self, nodes: &[Node]) -> Vec<Inst> {
        let mut main = Vec::new();
        for node in nodes {
            self.gen_node(node, &mut main);
            main.push(Inst::Discard);
        }
        main.push(Inst::Quit);
        main
    }

    fn gen_lambda_body(&mut self, nodes: &[Node], out: &mut Vec<Inst>) {
        for (i, node) in nodes.iter().enumerate() {
            self.gen_node(node, out);
            if i + 1 != nodes.len() {
                out.push(Inst::Discard);
            }
        }
    }

    fn gen_node(&mut self, node: &Node, out: &mut Vec<Inst>) {
        match node {
            Node::Expr(e) => self.gen_expr(e, out),
            Node::Define(d) => {
                self.gen_expr(&d.expr, out);
                out.push(Inst::StoreLocal(0, d.slot));
            }
        }
    }

    fn gen_expr(&mut self, expr: &Expr, out: &mut Vec<Inst>) {
        match expr {
            Expr::NamedVarRef(sym, _) => out.push(Inst::LoadNamed(*sym)),
            Expr::LocalVarRef(depth, slot, _) => out.push(Inst::LoadLocal(*depth, *slot)),
            Expr::Literal(v, _) => out.push(Inst::LoadLiteral(*v)),
            Expr::Call(callee, args, _) => {
                // Evaluation order per spec §4.3: arguments left-to-right,
                // then the callee, then Apply.
                for arg in args {
                    self.gen_expr(arg, out);
                }
                self.gen_expr(callee, out);
                out.push(Inst::Apply(args.len()));
            }
            Expr::Lambda(lambda) => {
                let label = self.fresh_label();
                out.push(Inst::LoadClosure(label, lambda.arg_count, lambda.frame_size, lambda.variadic));
                let mut block = vec![Inst::Label(label)];
                self.gen_lambda_body(&lambda.body, &mut block);
                block.push(Inst::Return);
                self.blocks.push(block);
            }
            Expr::If(cond, then_e, else_e, _) => {
                let then_label = self.fresh_label();
                let end_label = self.fresh_label();
                self.gen_expr(cond, out);
                out.push(Inst::JumpIf(then_label));
                self.gen_expr(else_e, out);
                out.push(Inst::Jump(end_label));
                out.push(Inst::Label(then_label));
                self.gen_expr(then_e, out);
                out.push(Inst::Label(end_label));
            }
            Expr::NamedAssign(sym, expr, _) => {
                self.gen_expr(expr, out);
                out.push(Inst::StoreNamed(*sym));
            }
            Expr::LocalAssign(depth, slot, expr, _) => {
                self.gen_expr(expr, out);
                out.push(Inst::StoreLocal(*depth, *slot));
            }
        }
    }
}

/// Sets each `Label`'s payload — and every reference to it — to its own
/// final index in the assembled vector (spec §4.3's "Label resolution"),
/// so the VM can jump via label identity with no secondary table.
fn resolve_labels(insts: &mut [Inst]) {
    let mut map: HashMap<LabelId, usize> = HashMap::new();
    for (i, inst) in insts.iter().enumerate() {
        if let Inst::Label(id) = inst {
            map.insert(*id, i);
        }
    }
    for inst in insts.iter_mut() {
        match inst {
            Inst::Label(id) => *id = map[id],
            Inst::Jump(id) => *id = map[id],
            Inst::JumpIf(id) => *id = map[id],
            Inst::LoadClosure(id, _, _, _) => *id = map[id],
            _ => {}
        }
    }
}

pub fn generate(nodes: &[Node]) -> Vec<Inst> {
    let mut cg = Codegen::new();
    let mut insts = cg.gen_program(nodes);
    for block in cg.blocks {
        insts.extend(block);
    }
    resolve_labels(&mut insts);
    insts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Allocator;
    use crate::parser::Parser;
    use crate::reader::Reader;
    use crate::scanner::Scanner;
    use crate::symbol::intern;
    use crate::token::Position;

    fn compile(src: &str, global_names: &[crate::symbol::Symbol]) -> Vec<Inst> {
        let tokens = Scanner::new(src, "test").scan_all().unwrap();
        let mut alloc = Allocator::new(1 << 20);
        let (datums, map) = Reader::new(&tokens, &mut alloc).read_program().unwrap();
        let default_pos = Position::new(intern("test"), 1, 1);
        let (nodes, _frame_size) = Parser::new(&alloc, &map, default_pos, global_names)
            .parse_program(&datums)
            .unwrap();
        generate(&nodes)
    }

    #[test]
    fn literal_discarded_at_top_level_then_quit() {
        let insts = compile("1", &[]);
        assert!(matches!(insts[0], Inst::LoadLiteral(_)));
        assert!(matches!(insts[1], Inst::Discard));
        assert!(matches!(insts[2], Inst::Quit));
    }

    #[test]
    fn if_resolves_jump_targets_to_real_indices() {
        let insts = compile("(if 1 2 3)", &[]);
        let then_jump = insts.iter().find_map(|i| match i {
            Inst::JumpIf(target) => Some(*target),
            _ => None,
        });
        assert!(then_jump.is_some());
        let target = then_jump.unwrap();
        assert!(matches!(insts[target], Inst::Label(l) if l == target));
    }

    #[test]
    fn lambda_body_does_not_discard_final_expression() {
        let insts = compile("(lambda () 1 2)", &[]);
        // trailing block: Label, LoadLiteral(1), Discard, LoadLiteral(2), Return
        let return_pos = insts.iter().position(|i| matches!(i, Inst::Return)).unwrap();
        assert!(matches!(insts[return_pos - 1], Inst::LoadLiteral(_)));
        assert!(!matches!(insts[return_pos - 1], Inst::Discard));
    }

    #[test]
    fn call_evaluates_args_then_callee_then_applies() {
        let plus = intern("+");
        let insts = compile("(+ 1 2)", &[plus]);
        let apply_pos = insts.iter().position(|i| matches!(i, Inst::Apply(2))).unwrap();
        assert!(matches!(insts[apply_pos - 1], Inst::LoadLocal(0, 0)));
        assert!(matches!(insts[apply_pos - 2], Inst::LoadLiteral(_)));
        assert!(matches!(insts[apply_pos - 3], Inst::LoadLiteral(_)));
    }
}
