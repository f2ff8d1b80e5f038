//! The stack-based virtual machine (spec §4.5).
//!
//! State is exactly what the spec names: an instruction pointer into the
//! flat `Vec<Inst>`, a value stack, a control stack of return addresses, and
//! a frame stack. The frame at `frame_stack[0]` is the global frame — it is
//! pushed once at construction and never popped, so `LoadNamed`/`StoreNamed`
//! can always reach it without a separate heap structure (see the note on
//! the global/local unification in `parser.rs`).

use crate::allocator::{Allocator, Roots};
use crate::error::{NSchemeError, Result};
use crate::inst::Inst;
use crate::symbol::Symbol;
use crate::value::{Closure as ClosureObj, Continuation, Frame, NativeFn, Object, ObjectId, ReturnAddr, Value};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

pub struct Vm {
    insts: Vec<Inst>,
    ip: usize,
    value_stack: Vec<Value>,
    control_stack: Vec<ReturnAddr>,
    frame_stack: Vec<ObjectId>,
    alloc: Allocator,
    global_index: HashMap<Symbol, usize>,
    literal_pool: Vec<Value>,
    trace: bool,
    /// Set by a native that redirects control flow itself (only `call/cc`);
    /// tells `apply` not to fall through to the next instruction.
    ip_redirected: bool,
}

/// A dispatch target resolved out of the heap so the borrow on `alloc` ends
/// before `apply` needs to allocate a new frame or continuation.
enum Dispatch {
    Closure {
        entry_label: usize,
        captured_frame: ObjectId,
        arg_count: usize,
        frame_size: usize,
        variadic: bool,
    },
    Native(NativeFn),
    Continuation {
        ip: usize,
        value_stack: Vec<Value>,
        control_stack: Vec<ReturnAddr>,
        frame_stack: Vec<ObjectId>,
    },
}

impl Vm {
    pub fn new(
        insts: Vec<Inst>,
        mut alloc: Allocator,
        global_slots: Vec<Value>,
        global_index: HashMap<Symbol, usize>,
    ) -> Self {
        let literal_pool = insts
            .iter()
            .filter_map(|i| match i {
                Inst::LoadLiteral(v) if v.as_object().is_some() => Some(*v),
                _ => None,
            })
            .collect();
        let global_frame = alloc.alloc(Object::Frame(Frame {
            parent: None,
            slots: RefCell::new(global_slots),
        }));
        Vm {
            insts,
            ip: 0,
            value_stack: Vec::new(),
            control_stack: Vec::new(),
            frame_stack: vec![global_frame],
            alloc,
            global_index,
            literal_pool,
            trace: false,
            ip_redirected: false,
        }
    }

    pub fn set_trace(&mut self, on: bool) {
        self.trace = on;
    }

    pub fn current_ip(&self) -> usize {
        self.ip
    }

    pub fn pop_value(&mut self) -> Result<Value> {
        self.value_stack
            .pop()
            .ok_or_else(|| NSchemeError::RuntimeError("value stack underflow".into()))
    }

    pub fn push_value(&mut self, v: Value) {
        self.value_stack.push(v);
    }

    pub fn alloc_object(&mut self, object: Object) -> ObjectId {
        let id = self.alloc.alloc(object);
        self.collect_if_due();
        id
    }

    pub fn get_object(&self, id: ObjectId) -> &Object {
        self.alloc.get(id)
    }

    pub fn allocator(&self) -> &Allocator {
        &self.alloc
    }

    /// Builds a first-class continuation snapshotting the three stacks as
    /// they currently stand, resuming at `resume_ip` when later invoked.
    pub fn make_continuation(&mut self, resume_ip: usize) -> ObjectId {
        let id = self.alloc.alloc(Object::Continuation(Continuation {
            ip: resume_ip,
            value_stack: self.value_stack.clone(),
            control_stack: self.control_stack.clone(),
            frame_stack: self.frame_stack.clone(),
        }));
        self.collect_if_due();
        id
    }

    /// Performs the one-argument `Apply` that `call/cc` synthesizes once it
    /// has pushed the continuation and the callable onto the value stack.
    pub fn apply_nested(&mut self, n: usize) -> Result<()> {
        self.apply(n, false)
    }

    /// Tells the enclosing `apply` dispatch (the one that called into the
    /// native which called this) that `ip` has already been set correctly
    /// and must not be overwritten with a plain fallthrough.
    pub fn mark_ip_redirected(&mut self) {
        self.ip_redirected = true;
    }

    fn run_to_quit(&mut self) -> Result<()> {
        loop {
            let inst = self.insts[self.ip].clone();
            if self.trace {
                self.print_trace(&inst);
            }
            match inst {
                Inst::Label(_) => {
                    self.ip += 1;
                }
                Inst::LoadLiteral(v) => {
                    self.value_stack.push(v);
                    self.ip += 1;
                }
                Inst::LoadLocal(depth, slot) => {
                    let frame_id = self.frame_at_depth(depth)?;
                    let v = self.frame_slot(frame_id, slot);
                    self.value_stack.push(v);
                    self.ip += 1;
                }
                Inst::LoadNamed(sym) => {
                    let v = self.load_named(sym)?;
                    self.value_stack.push(v);
                    self.ip += 1;
                }
                Inst::LoadClosure(label, arg_count, frame_size, variadic) => {
                    let captured_frame = *self.frame_stack.last().expect("frame stack never empty");
                    let id = self.alloc_object(Object::Closure(ClosureObj {
                        entry_label: label,
                        captured_frame,
                        arg_count,
                        variadic,
                        frame_size,
                    }));
                    self.value_stack.push(Value::from_object(id));
                    self.ip += 1;
                }
                Inst::StoreLocal(depth, slot) => {
                    let v = self.pop_value()?;
                    let frame_id = self.frame_at_depth(depth)?;
                    self.set_frame_slot(frame_id, slot, v);
                    self.value_stack.push(Value::NIL);
                    self.ip += 1;
                }
                Inst::StoreNamed(sym) => {
                    let v = self.pop_value()?;
                    self.store_named(sym, v)?;
                    self.value_stack.push(Value::NIL);
                    self.ip += 1;
                }
                Inst::Apply(n) => self.apply(n, false)?,
                Inst::TailApply(n) => self.apply(n, true)?,
                Inst::Return => {
                    self.frame_stack
                        .pop()
                        .ok_or_else(|| NSchemeError::RuntimeError("frame stack underflow".into()))?;
                    let addr = self
                        .control_stack
                        .pop()
                        .ok_or_else(|| NSchemeError::RuntimeError("control stack underflow".into()))?;
                    self.ip = addr.0;
                }
                Inst::Discard => {
                    self.pop_value()?;
                    self.ip += 1;
                }
                Inst::Jump(target) => {
                    self.ip = target;
                }
                Inst::JumpIf(target) => {
                    let v = self.pop_value()?;
                    self.ip = if v.is_truthy() { target } else { self.ip + 1 };
                }
                Inst::Quit => return Err(NSchemeError::Quit),
            }
        }
    }

    /// Runs to completion, treating the `Quit` instruction's unwind as a
    /// normal, successful stop rather than an error to report.
    pub fn run(&mut self) -> Result<()> {
        match self.run_to_quit() {
            Ok(()) => Ok(()),
            Err(NSchemeError::Quit) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn frame_at_depth(&self, depth: usize) -> Result<ObjectId> {
        let mut id = *self.frame_stack.last().expect("frame stack never empty");
        for _ in 0..depth {
            id = match self.alloc.get(id) {
                Object::Frame(f) => f
                    .parent
                    .ok_or_else(|| NSchemeError::RuntimeError("lexical address exceeds frame chain depth".into()))?,
                _ => unreachable!("frame stack entries are always Frame objects"),
            };
        }
        Ok(id)
    }

    fn frame_slot(&self, frame_id: ObjectId, slot: usize) -> Value {
        match self.alloc.get(frame_id) {
            Object::Frame(f) => f.slots.borrow()[slot],
            _ => unreachable!("frame stack entries are always Frame objects"),
        }
    }

    fn set_frame_slot(&self, frame_id: ObjectId, slot: usize, v: Value) {
        match self.alloc.get(frame_id) {
            Object::Frame(f) => f.slots.borrow_mut()[slot] = v,
            _ => unreachable!("frame stack entries are always Frame objects"),
        }
    }

    fn load_named(&self, sym: Symbol) -> Result<Value> {
        let slot = *self
            .global_index
            .get(&sym)
            .ok_or_else(|| NSchemeError::NameError(sym.to_string()))?;
        Ok(self.frame_slot(self.frame_stack[0], slot))
    }

    fn store_named(&mut self, sym: Symbol, v: Value) -> Result<()> {
        let slot = *self
            .global_index
            .get(&sym)
            .ok_or_else(|| NSchemeError::NameError(sym.to_string()))?;
        self.set_frame_slot(self.frame_stack[0], slot, v);
        Ok(())
    }

    fn resolve_callee(&self, callee: Value) -> Result<Dispatch> {
        let id = callee
            .as_object()
            .ok_or_else(|| NSchemeError::TypeError("attempt to call a non-procedure value".into()))?;
        match self.alloc.get(id) {
            Object::Closure(c) => Ok(Dispatch::Closure {
                entry_label: c.entry_label,
                captured_frame: c.captured_frame,
                arg_count: c.arg_count,
                frame_size: c.frame_size,
                variadic: c.variadic,
            }),
            Object::NativeFunction(nf) => Ok(Dispatch::Native(nf.func)),
            Object::Continuation(k) => Ok(Dispatch::Continuation {
                ip: k.ip,
                value_stack: k.value_stack.clone(),
                control_stack: k.control_stack.clone(),
                frame_stack: k.frame_stack.clone(),
            }),
            _ => Err(NSchemeError::TypeError("attempt to call a non-procedure value".into())),
        }
    }

    /// `Apply(n)`/`TailApply(n)` (spec §4.5): pop the callee, pop its `n`
    /// arguments, and dispatch on what it actually is. `tail` only changes
    /// closure dispatch — a tail call replaces the current frame instead of
    /// growing the control stack.
    fn apply(&mut self, n: usize, tail: bool) -> Result<()> {
        let callee = self.pop_value()?;
        if self.value_stack.len() < n {
            return Err(NSchemeError::RuntimeError("value stack underflow".into()));
        }
        let args_start = self.value_stack.len() - n;
        let dispatch = self.resolve_callee(callee)?;
        match dispatch {
            Dispatch::Closure { entry_label, captured_frame, arg_count, frame_size, variadic } => {
                if variadic {
                    if n < arg_count {
                        return Err(NSchemeError::ArityError(format!(
                            "expected at least {arg_count} arguments, got {n}"
                        )));
                    }
                } else if n != arg_count {
                    return Err(NSchemeError::ArityError(format!("expected {arg_count} arguments, got {n}")));
                }
                let args: Vec<Value> = self.value_stack[args_start..].to_vec();
                self.value_stack.truncate(args_start);
                let mut slots = vec![Value::UNDEFINED; frame_size];
                if variadic {
                    slots[..arg_count].copy_from_slice(&args[..arg_count]);
                    let mut rest = Value::NIL;
                    for v in args[arg_count..].iter().rev() {
                        let pair_id = self.alloc.alloc(Object::Pair(Cell::new(*v), Cell::new(rest)));
                        rest = Value::from_object(pair_id);
                    }
                    slots[arg_count] = rest;
                } else {
                    slots[..n].copy_from_slice(&args);
                }
                let frame_id = self.alloc.alloc(Object::Frame(Frame {
                    parent: Some(captured_frame),
                    slots: RefCell::new(slots),
                }));
                if tail {
                    self.frame_stack.pop();
                } else {
                    self.control_stack.push(ReturnAddr(self.ip + 1));
                }
                self.frame_stack.push(frame_id);
                self.ip = entry_label;
            }
            Dispatch::Native(func) => {
                let fallthrough_ip = self.ip + 1;
                self.ip_redirected = false;
                func(self, n)?;
                self.ip = if self.ip_redirected { self.ip } else { fallthrough_ip };
            }
            Dispatch::Continuation { ip, value_stack, control_stack, frame_stack } => {
                let resumed_args: Vec<Value> = self.value_stack[args_start..].to_vec();
                self.value_stack = value_stack;
                self.value_stack.extend(resumed_args);
                self.control_stack = control_stack;
                self.frame_stack = frame_stack;
                self.ip = ip;
            }
        }
        self.collect_if_due();
        Ok(())
    }

    fn collect_if_due(&mut self) {
        let roots = Roots {
            value_stack: &self.value_stack,
            frame_stack: &self.frame_stack,
            globals: &[],
            literals: &self.literal_pool,
        };
        self.alloc.maybe_collect(roots);
    }

    fn print_trace(&self, inst: &Inst) {
        let stack: Vec<String> = self.value_stack.iter().map(|v| crate::printer::format_value(&self.alloc, *v)).collect();
        tracing::debug!(ip = self.ip, inst = ?inst, stack = %stack.join(" "), depth = self.frame_stack.len(), "step");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::Inst;
    use crate::symbol::intern;

    fn builtin_plus(vm: &mut Vm, n: usize) -> Result<()> {
        assert_eq!(n, 2);
        let b = vm.pop_value()?.as_integer().unwrap();
        let a = vm.pop_value()?.as_integer().unwrap();
        vm.push_value(Value::integer(a + b));
        Ok(())
    }

    fn vm_with_plus(insts: Vec<Inst>) -> Vm {
        let mut alloc = Allocator::new(1 << 20);
        let plus_sym = intern("+");
        let id = alloc.alloc(Object::NativeFunction(crate::value::NativeFunction {
            name: plus_sym,
            func: builtin_plus,
        }));
        let mut index = HashMap::new();
        index.insert(plus_sym, 0);
        Vm::new(insts, alloc, vec![Value::from_object(id)], index)
    }

    #[test]
    fn runs_a_native_call_and_halts_on_quit() {
        let mut vm = vm_with_plus(vec![
            Inst::LoadLiteral(Value::integer(1)),
            Inst::LoadLiteral(Value::integer(2)),
            Inst::LoadLocal(0, 0),
            Inst::Apply(2),
            Inst::Quit,
        ]);
        vm.run().unwrap();
        assert_eq!(vm.value_stack, vec![Value::integer(3)]);
    }

    #[test]
    fn tail_apply_does_not_grow_control_stack() {
        // A 0-arg closure whose body ends in a tail call to `+`; the
        // control stack must be empty again once it returns, since a
        // TailApply replaces the calling frame instead of stacking on it.
        let mut alloc = Allocator::new(1 << 20);
        let plus_sym = intern("+");
        let id = alloc.alloc(Object::NativeFunction(crate::value::NativeFunction {
            name: plus_sym,
            func: builtin_plus,
        }));
        let mut index = HashMap::new();
        index.insert(plus_sym, 0);
        // 0: LoadClosure -> entry at 3
        // 1: Apply(0)
        // 2: Quit
        // 3: Label(3)
        // 4: LoadLiteral(1)
        // 5: LoadLiteral(2)
        // 6: LoadLocal(1, 0)   (+ lives one frame up, in the global frame)
        // 7: TailApply(2)
        // 8: Return
        let insts = vec![
            Inst::LoadClosure(3, 0, 0, false),
            Inst::Apply(0),
            Inst::Quit,
            Inst::Label(3),
            Inst::LoadLiteral(Value::integer(1)),
            Inst::LoadLiteral(Value::integer(2)),
            Inst::LoadLocal(1, 0),
            Inst::TailApply(2),
            Inst::Return,
        ];

        let mut vm = Vm::new(insts, alloc, vec![Value::from_object(id)], index);
        vm.run().unwrap();
        assert_eq!(vm.value_stack, vec![Value::integer(3)]);
        assert!(vm.control_stack.is_empty());
    }

    #[test]
    fn arity_mismatch_on_closure_is_an_arity_error() {
        let alloc = Allocator::new(1 << 20);
        // A 1-argument closure (entry at label 3) applied with 0 arguments.
        let insts = vec![
            Inst::LoadClosure(3, 1, 1, false),
            Inst::Apply(0),
            Inst::Quit,
            Inst::Label(3),
            Inst::LoadLocal(0, 0),
            Inst::Return,
        ];
        let mut vm = Vm::new(insts, alloc, Vec::new(), HashMap::new());
        let err = vm.run().unwrap_err();
        assert!(matches!(err, NSchemeError::ArityError(_)));
    }

    #[test]
    fn calling_a_non_procedure_is_a_type_error() {
        let alloc = Allocator::new(1 << 20);
        let insts = vec![Inst::LoadLiteral(Value::integer(5)), Inst::Apply(0), Inst::Quit];
        let mut vm = Vm::new(insts, alloc, Vec::new(), HashMap::new());
        let err = vm.run().unwrap_err();
        assert!(matches!(err, NSchemeError::TypeError(_)));
    }

    #[test]
    fn unbound_name_is_a_name_error() {
        let alloc = Allocator::new(1 << 20);
        let insts = vec![Inst::LoadNamed(intern("nonexistent")), Inst::Quit];
        let mut vm = Vm::new(insts, alloc, Vec::new(), HashMap::new());
        let err = vm.run().unwrap_err();
        assert!(matches!(err, NSchemeError::NameError(_)));
    }
}
