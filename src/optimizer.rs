//! Peephole optimizer (spec §4.4): tail-call marking and jump threading,
//! run to a fixpoint or a small pass cap, whichever comes first.
//!
//! Both passes only ever rewrite the payload of an existing instruction
//! (`Apply` -> `TailApply`, `Jump(L)` -> `Jump(L')`/`Return`); they never
//! insert or remove instructions, so every previously resolved label index
//! stays valid throughout optimization.

use crate::inst::Inst;

/// The original caps at this many passes; soundness does not depend on the
/// exact number, only on stopping once nothing more collapses.
const MAX_PASSES: usize = 7;

pub fn optimize(insts: &mut [Inst]) {
    optimize_with_passes(insts, MAX_PASSES);
}

/// Same as [`optimize`] but with a caller-supplied pass cap (see
/// `config.rs`, which lets this be tuned from the environment).
pub fn optimize_with_passes(insts: &mut [Inst], max_passes: usize) {
    for _ in 0..max_passes {
        let a = mark_tail_calls(insts);
        let b = thread_jumps(insts);
        if !a && !b {
            break;
        }
    }
}

fn first_non_label_at_or_after(insts: &[Inst], mut idx: usize) -> Option<usize> {
    while idx < insts.len() {
        if !insts[idx].is_label() {
            return Some(idx);
        }
        idx += 1;
    }
    None
}

/// For each `Apply(n)`, if the next non-label instruction is `Return`,
/// replace it with `TailApply(n)` — sound only because codegen always
/// terminates a body with an unconditional `Return` (spec §9).
fn mark_tail_calls(insts: &mut [Inst]) -> bool {
    let mut changed = false;
    for i in 0..insts.len() {
        if let Inst::Apply(n) = insts[i] {
            if let Some(next) = first_non_label_at_or_after(insts, i + 1) {
                if matches!(insts[next], Inst::Return) {
                    insts[i] = Inst::TailApply(n);
                    changed = true;
                }
            }
        }
    }
    changed
}

/// For each `Jump(L)`, follow from `L` across labels: a `Return` at the far
/// end makes the jump a `Return` outright; another `Jump(L')` makes this
/// jump target `L'` directly, shortening chains one hop per pass.
fn thread_jumps(insts: &mut [Inst]) -> bool {
    let mut changed = false;
    for i in 0..insts.len() {
        if let Inst::Jump(target) = insts[i] {
            if let Some(dest) = first_non_label_at_or_after(insts, target) {
                match insts[dest] {
                    Inst::Return => {
                        insts[i] = Inst::Return;
                        changed = true;
                    }
                    Inst::Jump(next_target) if next_target != target => {
                        insts[i] = Inst::Jump(next_target);
                        changed = true;
                    }
                    _ => {}
                }
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_followed_by_return_becomes_tail_apply() {
        let mut insts = vec![Inst::Apply(2), Inst::Return];
        optimize(&mut insts);
        assert!(matches!(insts[0], Inst::TailApply(2)));
    }

    #[test]
    fn apply_followed_by_labels_then_return_still_marked_tail() {
        let mut insts = vec![Inst::Apply(1), Inst::Label(1), Inst::Label(1), Inst::Return];
        optimize(&mut insts);
        assert!(matches!(insts[0], Inst::TailApply(1)));
    }

    #[test]
    fn apply_not_in_tail_position_is_unchanged() {
        let mut insts = vec![Inst::Apply(1), Inst::Discard, Inst::Return];
        optimize(&mut insts);
        assert!(matches!(insts[0], Inst::Apply(1)));
    }

    #[test]
    fn jump_to_return_collapses_to_return() {
        let mut insts = vec![Inst::Jump(2), Inst::Discard, Inst::Label(2), Inst::Return];
        optimize(&mut insts);
        assert!(matches!(insts[0], Inst::Return));
    }

    #[test]
    fn jump_chain_threads_to_final_target() {
        // Jump(1) -> Label(1)/Jump(3) -> Label(3)/Discard
        let mut insts = vec![
            Inst::Jump(1),
            Inst::Label(1),
            Inst::Jump(3),
            Inst::Label(3),
            Inst::Discard,
        ];
        optimize(&mut insts);
        assert!(matches!(insts[0], Inst::Jump(3)));
    }
}
