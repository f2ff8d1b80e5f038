//! `nscheme`: a batch interpreter for a small Scheme-family language.
//!
//! The pipeline is a straight line from source text to a result: scan into
//! tokens, read tokens into datums (values already living on the GC heap),
//! parse datums into a lexically-addressed AST, compile the AST to flat
//! bytecode, peephole-optimize it, then run it on the stack VM.

pub mod allocator;
pub mod ast;
pub mod builtins;
pub mod codegen;
pub mod config;
pub mod error;
pub mod inst;
pub mod optimizer;
pub mod parser;
pub mod printer;
pub mod reader;
pub mod scanner;
pub mod symbol;
pub mod token;
pub mod value;
pub mod vm;

use crate::allocator::Allocator;
use crate::config::Config;
use crate::error::Result;
use crate::parser::Parser;
use crate::reader::Reader;
use crate::scanner::Scanner;
use crate::token::Position;
use crate::vm::Vm;

/// Runs a complete program from source text: scan, read, parse, compile,
/// optimize, execute. `source_name` is used only for diagnostic positions.
pub fn run_source(source: &str, source_name: &str, config: Config, trace: bool) -> Result<()> {
    let tokens = Scanner::new(source, source_name).scan_all()?;

    let mut alloc = Allocator::new(config.gc_initial_threshold);
    let (datums, source_map) = Reader::new(&tokens, &mut alloc).read_program()?;

    let (global_names, global_slots, global_index) = builtins::register(&mut alloc);

    let default_position = Position::new(crate::symbol::intern(source_name), 1, 1);
    let (nodes, frame_size) =
        Parser::new(&alloc, &source_map, default_position, &global_names).parse_program(&datums)?;

    let mut global_slots = global_slots;
    global_slots.resize(frame_size, crate::value::Value::UNDEFINED);

    let mut insts = codegen::generate(&nodes);
    optimizer::optimize_with_passes(&mut insts, config.optimizer_max_passes);

    let mut vm = Vm::new(insts, alloc, global_slots, global_index);
    vm.set_trace(trace);
    vm.run()
}
