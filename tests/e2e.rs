//! End-to-end CLI behavior (spec §8): each test runs the built binary
//! against a small program on stdin and checks stdout/exit code.

use assert_cmd::Command;
use predicates::prelude::*;

fn run(src: &str) -> assert_cmd::assert::Assert {
    Command::cargo_bin("nscheme").unwrap().write_stdin(src).assert()
}

#[test]
fn prints_sum_of_integers() {
    run("(print (+ 1 2 3))").success().stdout(predicate::eq("6\n"));
}

#[test]
fn tail_recursive_loop_reaches_large_count_without_overflow() {
    let src = "\
        (define (loop n acc) (if (= n 0) acc (loop (- n 1) (+ acc 1)))) \
        (print (loop 100000 0))";
    run(src).success().stdout(predicate::eq("100000\n"));
}

#[test]
fn call_cc_escapes_before_the_rest_of_the_body_runs() {
    // k is invoked with 2 before 999 is ever evaluated, so the whole
    // call/cc expression yields 2, and the surrounding (+ 1 ...) yields 3.
    run("(print (+ 1 (call/cc (lambda (k) (k 2) 999))))")
        .success()
        .stdout(predicate::eq("3\n"));
}

#[test]
fn division_by_zero_exits_with_failure() {
    run("(/ 1 0)").failure().code(1);
}

#[test]
fn arity_mismatch_exits_with_failure() {
    run("((lambda (x) x))").failure().code(1);
}

#[test]
fn unbound_variable_is_a_name_error() {
    run("(totally-unbound-name)")
        .failure()
        .code(1)
        .stderr(predicate::str::contains("unbound variable"));
}

#[test]
fn deeply_nested_lambda_calls_resolve_lexically() {
    const DEPTH: u32 = 32;
    let mut src = String::from("(define (f0 x) (+ x 1))\n");
    for i in 1..=DEPTH {
        src.push_str(&format!("(define (f{i} x) (f{prev} (+ x 1)))\n", prev = i - 1));
    }
    src.push_str(&format!("(print (f{DEPTH} 0))"));
    run(&src).success().stdout(predicate::eq(format!("{}\n", DEPTH + 1)));
}

#[test]
fn quote_and_pair_accessors_round_trip() {
    run("(print (car (cdr (quote (1 2 3)))))").success().stdout(predicate::eq("2\n"));
}

#[test]
fn if_selects_the_correct_branch() {
    run("(print (if (< 1 2) (quote yes) (quote no)))").success().stdout(predicate::eq("yes\n"));
}

#[test]
fn malformed_arguments_exit_with_failure_not_claps_default_code() {
    // clap's own default for a bad CLI invocation is exit code 2; this
    // interpreter routes it through ArgumentError/exit_code() instead, so
    // every error path — CLI, read, parse, run — agrees on exit code 1.
    Command::cargo_bin("nscheme")
        .unwrap()
        .arg("--not-a-real-flag")
        .assert()
        .failure()
        .code(1);
}
