//! Invariant checks over whole compilation records.
//!
//! These cover the structural guarantees every compile must uphold: paired
//! value/type slots, patched self-calls, unique pages, deterministic
//! re-compilation, and the return-pair discipline at function ends.

use tarn_codegen::compiler::Func;
use tarn_codegen::hack::object_hack;
use tarn_codegen::op::{Instr, Op};
use tarn_codegen::{compile, CompileOutput, Options};
use tarn_types::Node;

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

fn program(body: Vec<Node>) -> Node {
    Node::Program { body }
}

fn expr_stmt(e: Node) -> Node {
    Node::ExpressionStatement {
        expression: Box::new(e),
    }
}

fn decl(name: &str, init: Node) -> Node {
    Node::VariableDeclaration {
        declarations: vec![Node::VariableDeclarator {
            id: Box::new(Node::ident(name)),
            init: Some(Box::new(init)),
        }],
        kind: "let".into(),
    }
}

fn binary(op: &str, left: Node, right: Node) -> Node {
    Node::BinaryExpression {
        operator: op.into(),
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn call(name: &str, arguments: Vec<Node>) -> Node {
    Node::CallExpression {
        callee: Box::new(Node::ident(name)),
        arguments,
        optional: false,
    }
}

fn member(object: Node, property: &str, computed: bool) -> Node {
    Node::MemberExpression {
        object: Box::new(object),
        property: Box::new(Node::ident(property)),
        computed,
        optional: false,
    }
}

fn func_decl(name: &str, params: Vec<&str>, body: Vec<Node>) -> Node {
    Node::FunctionDeclaration {
        id: Some(Box::new(Node::ident(name))),
        params: params.into_iter().map(Node::ident).collect(),
        body: Box::new(Node::BlockStatement { body }),
        generator: false,
        is_async: false,
    }
}

/// A program touching most lowering paths at once.
fn kitchen_sink() -> Node {
    program(vec![
        decl("s", Node::str("ab")),
        decl("a", Node::ArrayExpression {
            elements: vec![Some(Node::num(1.0)), Some(Node::num(2.0))],
        }),
        decl("n", Node::num(0.0)),
        func_decl(
            "bump",
            vec!["x"],
            vec![Node::ReturnStatement {
                argument: Some(Box::new(binary("+", Node::ident("x"), Node::num(1.0)))),
            }],
        ),
        Node::ForOfStatement {
            left: Box::new(decl("v", Node::ident("undefined"))),
            right: Box::new(Node::ident("a")),
            body: Box::new(Node::BlockStatement {
                body: vec![expr_stmt(Node::AssignmentExpression {
                    operator: "+=".into(),
                    left: Box::new(Node::ident("n")),
                    right: Box::new(call("bump", vec![Node::ident("v")])),
                })],
            }),
        },
        expr_stmt(Node::AssignmentExpression {
            operator: "+=".into(),
            left: Box::new(Node::ident("s")),
            right: Box::new(Node::str("cd")),
        }),
        Node::TryStatement {
            block: Box::new(Node::BlockStatement {
                body: vec![Node::ThrowStatement {
                    argument: Box::new(Node::str("oops")),
                }],
            }),
            handler: Some(Box::new(Node::CatchClause {
                param: None,
                body: Box::new(Node::BlockStatement {
                    body: vec![expr_stmt(Node::ident("n"))],
                }),
            })),
            finalizer: None,
        },
    ])
}

fn compile_ok(node: &Node) -> CompileOutput {
    compile(node, &Options::default()).unwrap_or_else(|e| panic!("codegen failed: {e}"))
}

// ══════════════════════════════════════════════════════════════════════════════
// Slot pairing
// ══════════════════════════════════════════════════════════════════════════════

fn assert_paired(locals: &std::collections::HashMap<String, tarn_codegen::scope::Binding>) {
    for (name, binding) in locals {
        if name.contains('#') {
            continue;
        }
        let sibling = locals
            .get(&format!("{name}#type"))
            .unwrap_or_else(|| panic!("{name} has no type-slot sibling"));
        assert_eq!(sibling.idx, binding.idx + 1, "pairing broken for {name}");
        assert_eq!(sibling.valtype, tarn_codegen::Valtype::I32);
    }
}

#[test]
fn every_named_binding_has_a_type_slot() {
    let out = compile_ok(&kitchen_sink());
    for f in &out.funcs {
        assert_paired(&f.locals);
    }
    // globals pair as well
    for g in &out.globals {
        if g.name.contains('#') {
            continue;
        }
        let sibling = out
            .globals
            .iter()
            .find(|s| s.name == format!("{}#type", g.name))
            .unwrap_or_else(|| panic!("global {} has no type slot", g.name));
        assert_eq!(sibling.idx, g.idx + 1);
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Self-call patching
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn no_unresolved_call_sentinel_survives() {
    let out = compile_ok(&program(vec![
        func_decl(
            "fib",
            vec!["n"],
            vec![Node::ReturnStatement {
                argument: Some(Box::new(binary(
                    "+",
                    call("fib", vec![binary("-", Node::ident("n"), Node::num(1.0))]),
                    call("fib", vec![binary("-", Node::ident("n"), Node::num(2.0))]),
                ))),
            }],
        ),
        expr_stmt(call("fib", vec![Node::num(10.0)])),
    ]));
    for f in &out.funcs {
        assert!(
            !f.wasm.iter().any(|i| i.call_target() == Some(-1)),
            "unpatched self-call in {}",
            f.name
        );
    }
    // and the recursion did bind to fib's own index
    let fib = out.func("fib").unwrap();
    assert!(fib
        .wasm
        .iter()
        .filter_map(Instr::call_target)
        .any(|t| t == fib.index as i32));
}

// ══════════════════════════════════════════════════════════════════════════════
// Page uniqueness
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn live_pages_have_unique_indices() {
    let out = compile_ok(&kitchen_sink());
    let mut seen = std::collections::HashSet::new();
    for p in &out.pages.entries {
        assert!(seen.insert(p.index), "page index {} reused", p.index);
    }
    assert!(out.pages.has_array);
    assert!(out.pages.has_string);
}

#[test]
fn flags_track_page_kinds() {
    let out = compile_ok(&program(vec![expr_stmt(Node::num(1.0))]));
    assert!(!out.pages.has_array);
    assert!(!out.pages.has_string);
    assert!(out.pages.entries.is_empty());
}

// ══════════════════════════════════════════════════════════════════════════════
// Determinism
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn recompilation_is_identical() {
    let prog = kitchen_sink();
    let a = compile_ok(&prog);
    let b = compile_ok(&prog);

    assert_eq!(a.funcs.len(), b.funcs.len());
    for (fa, fb) in a.funcs.iter().zip(&b.funcs) {
        assert_eq!(fa.name, fb.name);
        assert_eq!(fa.index, fb.index);
        assert_eq!(fa.wasm, fb.wasm, "wasm differs for {}", fa.name);
        assert_eq!(fa.params, fb.params);
        assert_eq!(fa.returns, fb.returns);
    }
    assert_eq!(a.exceptions, b.exceptions);
    assert_eq!(a.data.len(), b.data.len());
    for (da, db) in a.data.iter().zip(&b.data) {
        assert_eq!(da, db);
    }
    let pages = |o: &CompileOutput| -> Vec<(String, u32)> {
        o.pages
            .entries
            .iter()
            .map(|p| (p.reason.clone(), p.index))
            .collect()
    };
    assert_eq!(pages(&a), pages(&b));
}

// ══════════════════════════════════════════════════════════════════════════════
// Object-hack idempotence
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn object_hack_is_idempotent_over_a_program() {
    let mut prog = program(vec![
        expr_stmt(call("log", vec![member(Node::ident("Math"), "PI", false)])),
        expr_stmt(member(member(Node::ident("a"), "b", false), "length", false)),
        expr_stmt(member(Node::ident("a"), "i", true)),
    ]);
    object_hack(&mut prog);
    let once = prog.clone();
    object_hack(&mut prog);
    assert_eq!(prog, once);
}

// ══════════════════════════════════════════════════════════════════════════════
// Return discipline
// ══════════════════════════════════════════════════════════════════════════════

/// A function body must end in an explicit return or leave exactly a
/// (payload, i32 tag) pair for the function-end implicit return.
fn assert_return_shape(f: &Func) {
    let last = f.wasm.last().unwrap_or_else(|| panic!("{} is empty", f.name));
    if last.op == Op::Return || last.op == Op::End || f.returns.len() != 2 {
        return;
    }
    assert_eq!(last.op, Op::I32Const, "{} does not end with a tag", f.name);
    let prev = &f.wasm[f.wasm.len() - 2];
    assert!(
        matches!(
            prev.op,
            Op::F64Const | Op::I32Const | Op::I64Const | Op::LocalGet | Op::GlobalGet | Op::End
        ),
        "{} has no payload before its tag: {:?}",
        f.name,
        prev.op
    );
}

#[test]
fn bodies_end_with_a_return_pair() {
    let out = compile_ok(&kitchen_sink());
    for f in out.funcs.iter().filter(|f| !f.internal) {
        assert_return_shape(f);
    }
}

#[test]
fn every_return_is_preceded_by_a_payload_and_tag() {
    let out = compile_ok(&program(vec![func_decl(
        "f",
        vec!["x"],
        vec![Node::ReturnStatement {
            argument: Some(Box::new(Node::ident("x"))),
        }],
    )]));
    let f = out.func("f").unwrap();
    let ret_pos = f.wasm.iter().position(|i| i.op == Op::Return).unwrap();
    assert!(ret_pos >= 2);
    // payload slot read, then its type slot read, then return
    assert_eq!(f.wasm[ret_pos - 2], Instr::local_get(0));
    assert_eq!(f.wasm[ret_pos - 1], Instr::local_get(1));
}

// ══════════════════════════════════════════════════════════════════════════════
// State isolation between runs
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn compilations_do_not_leak_state() {
    let with_strings = program(vec![decl("s", Node::str("hello"))]);
    let without = program(vec![expr_stmt(Node::num(1.0))]);

    let a = compile_ok(&with_strings);
    assert!(a.pages.has_string);
    assert_eq!(a.funcs.len(), 1);

    // a fresh compile starts from nothing
    let b = compile_ok(&without);
    assert!(!b.pages.has_string);
    assert!(b.data.is_empty());
    assert!(b.exceptions.is_empty());
    assert!(b.globals.is_empty());
}
