//! Native procedure registry (spec §4.6).
//!
//! The VM's global frame is built here: every built-in is interned, sorted
//! lexicographically by name, and allocated a slot in that order. This
//! sorted order is the ABI the parser depends on — it constructs its
//! outermost scope from the very same sorted name list, so a builtin's
//! lexical address always lines up with the slot this module gave it.

use crate::allocator::Allocator;
use crate::error::{NSchemeError, Result};
use crate::symbol::{intern, Symbol};
use crate::value::{NativeFn, NativeFunction, Object, Value};
use crate::vm::Vm;
use std::cell::Cell;
use std::collections::HashMap;

/// Registers every built-in procedure, returning the sorted name list (the
/// parser's `global_names` argument), the matching slot values, and a
/// name -> slot index map (the VM's `global_index`).
pub fn register(alloc: &mut Allocator) -> (Vec<Symbol>, Vec<Value>, HashMap<Symbol, usize>) {
    let mut entries: Vec<(&str, NativeFn)> = vec![
        ("+", native_add),
        ("-", native_sub),
        ("*", native_mul),
        ("/", native_div),
        ("=", native_num_eq),
        ("<", native_num_lt),
        (">", native_num_gt),
        ("<=", native_num_le),
        (">=", native_num_ge),
        ("cons", native_cons),
        ("car", native_car),
        ("cdr", native_cdr),
        ("pair?", native_pair_p),
        ("null?", native_null_p),
        ("eq?", native_eq_p),
        ("not", native_not),
        ("print", native_print),
        ("call/cc", native_call_cc),
        ("call-with-current-continuation", native_call_cc),
    ];
    entries.sort_by_key(|(name, _)| *name);

    let mut names = Vec::with_capacity(entries.len());
    let mut slots = Vec::with_capacity(entries.len());
    let mut index = HashMap::with_capacity(entries.len());
    for (i, (name, func)) in entries.into_iter().enumerate() {
        let sym = intern(name);
        let id = alloc.alloc(Object::NativeFunction(NativeFunction { name: sym, func }));
        names.push(sym);
        slots.push(Value::from_object(id));
        index.insert(sym, i);
    }
    (names, slots, index)
}

fn pop_args(vm: &mut Vm, n: usize) -> Result<Vec<Value>> {
    let mut args = Vec::with_capacity(n);
    for _ in 0..n {
        args.push(vm.pop_value()?);
    }
    args.reverse();
    Ok(args)
}

fn as_int(v: Value) -> Result<i64> {
    v.as_integer().ok_or_else(|| NSchemeError::TypeError("expected an integer".into()))
}

fn as_pair(vm: &Vm, v: Value) -> Result<(Value, Value)> {
    let id = v.as_object().ok_or_else(|| NSchemeError::TypeError("expected a pair".into()))?;
    match vm.get_object(id) {
        Object::Pair(car, cdr) => Ok((car.get(), cdr.get())),
        _ => Err(NSchemeError::TypeError("expected a pair".into())),
    }
}

fn native_add(vm: &mut Vm, n: usize) -> Result<()> {
    let args = pop_args(vm, n)?;
    let mut sum = 0i64;
    for a in args {
        sum += as_int(a)?;
    }
    vm.push_value(Value::integer(sum));
    Ok(())
}

fn native_sub(vm: &mut Vm, n: usize) -> Result<()> {
    if n == 0 {
        return Err(NSchemeError::ArityError("- requires at least 1 argument".into()));
    }
    let args = pop_args(vm, n)?;
    let first = as_int(args[0])?;
    let result = if args.len() == 1 {
        -first
    } else {
        let mut acc = first;
        for a in &args[1..] {
            acc -= as_int(*a)?;
        }
        acc
    };
    vm.push_value(Value::integer(result));
    Ok(())
}

fn native_mul(vm: &mut Vm, n: usize) -> Result<()> {
    let args = pop_args(vm, n)?;
    let mut product = 1i64;
    for a in args {
        product *= as_int(a)?;
    }
    vm.push_value(Value::integer(product));
    Ok(())
}

fn native_div(vm: &mut Vm, n: usize) -> Result<()> {
    if n == 0 {
        return Err(NSchemeError::ArityError("/ requires at least 1 argument".into()));
    }
    let args = pop_args(vm, n)?;
    let first = as_int(args[0])?;
    let result = if args.len() == 1 {
        checked_div(1, first)?
    } else {
        let mut acc = first;
        for a in &args[1..] {
            acc = checked_div(acc, as_int(*a)?)?;
        }
        acc
    };
    vm.push_value(Value::integer(result));
    Ok(())
}

fn checked_div(a: i64, b: i64) -> Result<i64> {
    if b == 0 {
        Err(NSchemeError::RuntimeError("division by zero".into()))
    } else {
        Ok(a / b)
    }
}

fn chain_compare(vm: &mut Vm, n: usize, ok: impl Fn(i64, i64) -> bool) -> Result<()> {
    let args = pop_args(vm, n)?;
    let mut result = true;
    for pair in args.windows(2) {
        let a = as_int(pair[0])?;
        let b = as_int(pair[1])?;
        if !ok(a, b) {
            result = false;
            break;
        }
    }
    vm.push_value(Value::boolean(result));
    Ok(())
}

fn native_num_eq(vm: &mut Vm, n: usize) -> Result<()> {
    chain_compare(vm, n, |a, b| a == b)
}

fn native_num_lt(vm: &mut Vm, n: usize) -> Result<()> {
    chain_compare(vm, n, |a, b| a < b)
}

fn native_num_gt(vm: &mut Vm, n: usize) -> Result<()> {
    chain_compare(vm, n, |a, b| a > b)
}

fn native_num_le(vm: &mut Vm, n: usize) -> Result<()> {
    chain_compare(vm, n, |a, b| a <= b)
}

fn native_num_ge(vm: &mut Vm, n: usize) -> Result<()> {
    chain_compare(vm, n, |a, b| a >= b)
}

fn native_cons(vm: &mut Vm, n: usize) -> Result<()> {
    if n != 2 {
        return Err(NSchemeError::ArityError("cons requires exactly 2 arguments".into()));
    }
    let args = pop_args(vm, 2)?;
    let id = vm.alloc_object(Object::Pair(Cell::new(args[0]), Cell::new(args[1])));
    vm.push_value(Value::from_object(id));
    Ok(())
}

fn native_car(vm: &mut Vm, n: usize) -> Result<()> {
    if n != 1 {
        return Err(NSchemeError::ArityError("car requires exactly 1 argument".into()));
    }
    let v = vm.pop_value()?;
    let (car, _cdr) = as_pair(vm, v)?;
    vm.push_value(car);
    Ok(())
}

fn native_cdr(vm: &mut Vm, n: usize) -> Result<()> {
    if n != 1 {
        return Err(NSchemeError::ArityError("cdr requires exactly 1 argument".into()));
    }
    let v = vm.pop_value()?;
    let (_car, cdr) = as_pair(vm, v)?;
    vm.push_value(cdr);
    Ok(())
}

fn native_pair_p(vm: &mut Vm, n: usize) -> Result<()> {
    if n != 1 {
        return Err(NSchemeError::ArityError("pair? requires exactly 1 argument".into()));
    }
    let v = vm.pop_value()?;
    let is_pair = v.as_object().is_some_and(|id| matches!(vm.get_object(id), Object::Pair(..)));
    vm.push_value(Value::boolean(is_pair));
    Ok(())
}

fn native_null_p(vm: &mut Vm, n: usize) -> Result<()> {
    if n != 1 {
        return Err(NSchemeError::ArityError("null? requires exactly 1 argument".into()));
    }
    let v = vm.pop_value()?;
    vm.push_value(Value::boolean(v.is_nil()));
    Ok(())
}

fn native_eq_p(vm: &mut Vm, n: usize) -> Result<()> {
    if n != 2 {
        return Err(NSchemeError::ArityError("eq? requires exactly 2 arguments".into()));
    }
    let args = pop_args(vm, 2)?;
    vm.push_value(Value::boolean(args[0] == args[1]));
    Ok(())
}

fn native_not(vm: &mut Vm, n: usize) -> Result<()> {
    if n != 1 {
        return Err(NSchemeError::ArityError("not requires exactly 1 argument".into()));
    }
    let v = vm.pop_value()?;
    vm.push_value(Value::boolean(!v.is_truthy()));
    Ok(())
}

fn native_print(vm: &mut Vm, n: usize) -> Result<()> {
    if n != 1 {
        return Err(NSchemeError::ArityError("print requires exactly 1 argument".into()));
    }
    let v = vm.pop_value()?;
    println!("{}", crate::printer::format_value(vm.allocator(), v));
    vm.push_value(Value::NIL);
    Ok(())
}

/// `call/cc`: captures the current value/control/frame stacks into a new
/// `Continuation`, then synthesizes the one-argument `Apply` that invokes
/// the caller-supplied procedure with that continuation (spec §4.5).
fn native_call_cc(vm: &mut Vm, n: usize) -> Result<()> {
    if n != 1 {
        return Err(NSchemeError::ArityError("call/cc requires exactly 1 argument".into()));
    }
    let proc = vm.pop_value()?;
    let resume_ip = vm.current_ip() + 1;
    let k = vm.make_continuation(resume_ip);
    vm.push_value(Value::from_object(k));
    vm.push_value(proc);
    vm.apply_nested(1)?;
    vm.mark_ip_redirected();
    Ok(())
}
