//! Value printing (spec §6): the external representation `print` writes and
//! that `--trace` dumps use for the value stack.

use crate::allocator::Allocator;
use crate::value::{Object, Value};

pub fn format_value(alloc: &Allocator, v: Value) -> String {
    if v.is_nil() {
        return "()".to_string();
    }
    if v == Value::TRUE {
        return "#t".to_string();
    }
    if v == Value::FALSE {
        return "#f".to_string();
    }
    if v == Value::UNDEFINED {
        return "#<undefined>".to_string();
    }
    if let Some(n) = v.as_integer() {
        return n.to_string();
    }
    if let Some(c) = v.as_character() {
        return format_character(c);
    }
    if let Some(s) = v.as_symbol() {
        return s.as_str().to_string();
    }
    if let Some(id) = v.as_object() {
        return match alloc.get(id) {
            Object::String(s) => format_string(s),
            Object::Real(r) => format_real(*r),
            Object::Pair(..) => format_list(alloc, v),
            Object::Vector(items) => {
                let parts: Vec<String> = items.borrow().iter().map(|x| format_value(alloc, *x)).collect();
                format!("#({})", parts.join(" "))
            }
            Object::Frame(_) => "#<frame>".to_string(),
            Object::Closure(c) => format!("<closure {}>", c.entry_label),
            Object::NativeFunction(nf) => format!("<c_function {}>", nf.name),
            Object::Continuation(_) => "<continuation>".to_string(),
        };
    }
    "#<unknown>".to_string()
}

fn format_character(c: char) -> String {
    match c {
        ' ' => "#\\space".to_string(),
        '\n' => "#\\newline".to_string(),
        '\t' => "#\\tab".to_string(),
        '\r' => "#\\return".to_string(),
        '\0' => "#\\null".to_string(),
        c if !c.is_control() => format!("#\\{c}"),
        c => format!("#\\x{:x}", c as u32),
    }
}

fn format_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            c if c.is_control() => out.push_str(&format!("\\x{:02X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn format_real(r: f64) -> String {
    if r.is_finite() && r.fract() == 0.0 {
        format!("{r:.1}")
    } else {
        r.to_string()
    }
}

fn format_list(alloc: &Allocator, mut v: Value) -> String {
    let mut parts = Vec::new();
    loop {
        let Some(id) = v.as_object() else { break };
        match alloc.get(id) {
            Object::Pair(car, cdr) => {
                parts.push(format_value(alloc, car.get()));
                v = cdr.get();
            }
            _ => break,
        }
    }
    if v.is_nil() {
        format!("({})", parts.join(" "))
    } else {
        format!("({} . {})", parts.join(" "), format_value(alloc, v))
    }
}
