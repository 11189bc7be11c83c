//! Integration tests for the code generator.
//!
//! Tests validate:
//! - Minimal programs compile to a well-formed module IR
//! - The exported `main` and its implicit-return discipline
//! - Expression compilation (arithmetic, strings, logicals, members, calls)
//! - Statement compilation (declarations, control flow, try/throw, for-of)
//! - Built-in, prototype, and constructor dispatch
//! - The host hooks (eval parser, regex compiler) and template intrinsics

use tarn_codegen::compiler::Func;
use tarn_codegen::op::{Imm, Instr, Marker, Op};
use tarn_codegen::types::{
    TYPE_ARRAY, TYPE_BOOLEAN, TYPE_NUMBER, TYPE_STRING, TYPE_UNDEFINED,
};
use tarn_codegen::{compile, CompileOutput, Options};
use tarn_types::{LitValue, Node, RegexLiteral, TemplateChunk};

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

fn assign(op: &str, left: Node, right: Node) -> Node {
    Node::AssignmentExpression {
        operator: op.into(),
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn unary(op: &str, argument: Node) -> Node {
    Node::UnaryExpression {
        operator: op.into(),
        argument: Box::new(argument),
    }
}

fn member(object: Node, property: &str) -> Node {
    Node::MemberExpression {
        object: Box::new(object),
        property: Box::new(Node::ident(property)),
        computed: false,
        optional: false,
    }
}

fn index(object: Node, idx: Node) -> Node {
    Node::MemberExpression {
        object: Box::new(object),
        property: Box::new(idx),
        computed: true,
        optional: false,
    }
}

fn call(callee: Node, arguments: Vec<Node>) -> Node {
    Node::CallExpression {
        callee: Box::new(callee),
        arguments,
        optional: false,
    }
}

fn array(elements: Vec<Node>) -> Node {
    Node::ArrayExpression {
        elements: elements.into_iter().map(Some).collect(),
    }
}

fn block(body: Vec<Node>) -> Node {
    Node::BlockStatement { body }
}

fn func_decl(name: &str, params: Vec<&str>, body: Vec<Node>) -> Node {
    Node::FunctionDeclaration {
        id: Some(Box::new(Node::ident(name))),
        params: params.into_iter().map(Node::ident).collect(),
        body: Box::new(block(body)),
        generator: false,
        is_async: false,
    }
}

fn ret(argument: Node) -> Node {
    Node::ReturnStatement {
        argument: Some(Box::new(argument)),
    }
}

fn template(raw: &str, expressions: Vec<Node>) -> Node {
    Node::TemplateLiteral {
        quasis: vec![Node::TemplateElement {
            value: TemplateChunk {
                raw: raw.into(),
                cooked: Some(raw.into()),
            },
            tail: true,
        }],
        expressions,
    }
}

fn compile_prog(body: Vec<Node>) -> CompileOutput {
    compile(&program(body), &Options::default()).unwrap_or_else(|e| panic!("codegen failed: {e}"))
}

fn main_of(out: &CompileOutput) -> &Func {
    out.func("main").expect("missing main")
}

fn has_op(wasm: &[Instr], op: Op) -> bool {
    wasm.iter().any(|i| i.op == op)
}

fn call_targets(wasm: &[Instr]) -> Vec<i32> {
    wasm.iter().filter_map(|i| i.call_target()).collect()
}

// ══════════════════════════════════════════════════════════════════════════════
// Module shape
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn empty_program_compiles_to_exported_main() {
    let out = compile_prog(vec![]);
    assert_eq!(out.funcs.len(), 1);
    let main = main_of(&out);
    assert!(main.export);
    assert_eq!(main.params.len(), 0);
    assert_eq!(main.returns.len(), 2);
    // undefined payload plus the undefined type tag
    assert_eq!(
        main.wasm,
        vec![
            Instr::f64(Op::F64Const, 0.0),
            Instr::i32(Op::I32Const, TYPE_UNDEFINED),
        ]
    );
}

#[test]
fn trailing_expression_feeds_the_implicit_return() {
    let out = compile_prog(vec![expr_stmt(binary("+", Node::num(1.0), Node::num(2.0)))]);
    let main = main_of(&out);
    assert!(has_op(&main.wasm, Op::F64Add));
    // the final type tag is number, with no undefined pair appended after it
    assert_eq!(main.wasm.last(), Some(&Instr::i32(Op::I32Const, TYPE_NUMBER)));
}

#[test]
fn non_final_expression_statements_are_dropped() {
    let out = compile_prog(vec![
        expr_stmt(Node::num(1.0)),
        expr_stmt(Node::num(2.0)),
    ]);
    let main = main_of(&out);
    assert!(has_op(&main.wasm, Op::Drop));
}

// ══════════════════════════════════════════════════════════════════════════════
// Functions and calls
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn exported_add_function() {
    let out = compile_prog(vec![Node::ExportNamedDeclaration {
        declaration: Some(Box::new(func_decl(
            "add",
            vec!["a", "b"],
            vec![ret(binary("+", Node::ident("a"), Node::ident("b")))],
        ))),
    }]);
    let add = out.func("add").expect("missing add");
    assert!(add.export);
    assert!(!add.internal);
    // two user parameters, each a (payload, tag) pair
    assert_eq!(add.params.len(), 4);
    assert_eq!(add.returns.len(), 2);
    assert!(has_op(&add.wasm, Op::F64Add));
    assert_eq!(add.wasm.last(), Some(&Instr::op(Op::Return)));
    assert_eq!(add.return_type, Some(TYPE_NUMBER));
}

#[test]
fn calls_push_typed_argument_pairs() {
    let out = compile_prog(vec![
        func_decl("id", vec!["x"], vec![ret(Node::ident("x"))]),
        expr_stmt(call(Node::ident("id"), vec![Node::num(7.0)])),
    ]);
    let id = out.func("id").expect("missing id");
    let main = main_of(&out);
    assert!(call_targets(&main.wasm).contains(&(id.index as i32)));
    // the call site captured the returned type tag
    assert!(main.locals.contains_key("#last_type"));
}

#[test]
fn missing_arguments_become_undefined() {
    let out = compile_prog(vec![
        func_decl("two", vec!["a", "b"], vec![ret(Node::ident("b"))]),
        expr_stmt(call(Node::ident("two"), vec![Node::num(1.0)])),
    ]);
    let main = main_of(&out);
    // padded pair: undefined payload + undefined tag
    assert!(main
        .wasm
        .windows(2)
        .any(|w| w[0] == Instr::f64(Op::F64Const, 0.0)
            && w[1] == Instr::i32(Op::I32Const, TYPE_UNDEFINED)));
}

#[test]
fn self_recursive_calls_are_patched() {
    let out = compile_prog(vec![func_decl(
        "loop_",
        vec!["n"],
        vec![ret(call(Node::ident("loop_"), vec![Node::ident("n")]))],
    )]);
    let f = out.func("loop_").expect("missing loop_");
    assert!(!f.wasm.iter().any(|i| i.call_target() == Some(-1)));
    assert!(call_targets(&f.wasm).contains(&(f.index as i32)));
}

#[test]
fn calling_a_plain_variable_throws_type_error() {
    let out = compile_prog(vec![
        decl("x", Node::num(1.0)),
        expr_stmt(call(Node::ident("x"), vec![])),
    ]);
    assert_eq!(
        out.exceptions[0].constructor.as_deref(),
        Some("TypeError")
    );
    assert!(main_of(&out).throws);
}

#[test]
fn calling_an_unknown_name_throws_reference_error() {
    let out = compile_prog(vec![expr_stmt(call(Node::ident("nope"), vec![]))]);
    assert_eq!(
        out.exceptions[0].constructor.as_deref(),
        Some("ReferenceError")
    );
    assert_eq!(out.exceptions[0].message.as_deref(), Some("nope is not defined"));
}

#[test]
fn builtin_math_is_included_once() {
    let out = compile_prog(vec![
        expr_stmt(call(member(Node::ident("Math"), "sqrt"), vec![Node::num(4.0)])),
        expr_stmt(call(member(Node::ident("Math"), "sqrt"), vec![Node::num(9.0)])),
    ]);
    let sqrt: Vec<&Func> = out.funcs.iter().filter(|f| f.name == "__Math_sqrt").collect();
    assert_eq!(sqrt.len(), 1);
    assert!(sqrt[0].internal);
    assert!(has_op(&sqrt[0].wasm, Op::F64Sqrt));
    // unpaired asm-intrinsic parameter list
    assert_eq!(sqrt[0].params.len(), 1);
    assert_eq!(sqrt[0].return_type, Some(TYPE_NUMBER));
}

#[test]
fn builtin_vars_resolve_to_constants() {
    let out = compile_prog(vec![expr_stmt(member(Node::ident("Math"), "PI"))]);
    let main = main_of(&out);
    assert!(main
        .wasm
        .iter()
        .any(|i| i.op == Op::F64Const && i.imms == vec![Imm::F64(std::f64::consts::PI)]));
}

// ══════════════════════════════════════════════════════════════════════════════
// Strings
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn string_literal_lands_in_the_data_section() {
    let out = compile_prog(vec![decl("s", Node::str("ab"))]);
    assert!(out.pages.has_string);
    assert!(out.pages.entries.iter().any(|p| p.reason == "string:s"));
    let seg = &out.data[0];
    assert_eq!(seg.offset, 0);
    assert_eq!(seg.bytes, vec![2, 0, 0, 0, 0x61, 0, 0x62, 0]);
}

#[test]
fn compound_concat_reuses_the_target_page() {
    let out = compile_prog(vec![
        decl("s", Node::str("ab")),
        expr_stmt(assign("+=", Node::ident("s"), Node::str("cd"))),
        expr_stmt(member(Node::ident("s"), "length")),
    ]);
    let main = main_of(&out);
    // two bulk copies per concatenation
    assert_eq!(main.wasm.iter().filter(|i| i.op == Op::MemoryCopy).count(), 2);
    // both operand strings own pages, but no fresh concat page was made
    let reasons: Vec<&str> = out.pages.entries.iter().map(|p| p.reason.as_str()).collect();
    assert!(reasons.contains(&"string:s"));
    assert!(reasons.contains(&"string:cd"));
    assert!(!reasons.iter().any(|r| r.starts_with("string:#concat")));
    // the final length read flows out as a number
    assert!(has_op(&main.wasm, Op::I32Load));
    assert_eq!(main.wasm.last(), Some(&Instr::i32(Op::I32Const, TYPE_NUMBER)));
}

#[test]
fn plain_concat_allocates_a_fresh_page() {
    let out = compile_prog(vec![expr_stmt(binary(
        "+",
        Node::str("a"),
        Node::str("b"),
    ))]);
    assert!(out
        .pages
        .entries
        .iter()
        .any(|p| p.reason.starts_with("string:#concat")));
}

#[test]
fn string_equality_marks_its_string_path() {
    let out = compile_prog(vec![expr_stmt(binary(
        "===",
        Node::str("a"),
        Node::str("b"),
    ))]);
    let main = main_of(&out);
    assert!(main
        .wasm
        .iter()
        .any(|i| i.marker == Some(Marker::StringOnlyStart)));
    assert!(main
        .wasm
        .iter()
        .any(|i| i.marker == Some(Marker::StringOnlyEnd)));
    // 16-bit code-unit loop
    assert!(has_op(&main.wasm, Op::I32Load16U));
    assert!(has_op(&main.wasm, Op::Loop));
}

#[test]
fn string_paths_are_pruned_under_i32() {
    let options = Options::from_args(["-valtype=i32"]);
    let out = compile(
        &program(vec![expr_stmt(binary("===", Node::str("a"), Node::str("b")))]),
        &options,
    )
    .unwrap();
    let main = main_of(&out);
    assert!(main.wasm.iter().all(|i| i.marker.is_none()));
    assert!(!has_op(&main.wasm, Op::I32Load16U));
    assert!(has_op(&main.wasm, Op::I32Eq));
}

#[test]
fn concat_sites_annotated_under_the_aot_flag() {
    let options = Options::from_args(["-aot-well-formed-string-approximation"]);
    let out = compile(
        &program(vec![expr_stmt(binary("+", Node::str("a"), Node::str("b")))]),
        &options,
    )
    .unwrap();
    assert!(main_of(&out)
        .wasm
        .iter()
        .any(|i| i.marker == Some(Marker::WellFormedApprox)));
}

#[test]
fn string_index_uses_the_scratch_page() {
    let out = compile_prog(vec![
        decl("s", Node::str("hey")),
        expr_stmt(index(Node::ident("s"), Node::num(1.0))),
    ]);
    assert!(out
        .pages
        .entries
        .iter()
        .any(|p| p.reason == "string scratch"));
    assert!(has_op(&main_of(&out).wasm, Op::MemoryCopy));
}

// ══════════════════════════════════════════════════════════════════════════════
// Arrays
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn constant_array_literal_lands_in_the_data_section() {
    let out = compile_prog(vec![decl(
        "a",
        array(vec![Node::num(1.0), Node::num(2.0), Node::num(3.0)]),
    )]);
    assert!(out.pages.has_array);
    assert!(out.pages.entries.iter().any(|p| p.reason == "array:a"));
    let seg = &out.data[0];
    let mut expected = vec![3, 0, 0, 0];
    for v in [1.0f64, 2.0, 3.0] {
        expected.extend_from_slice(&v.to_le_bytes());
    }
    assert_eq!(seg.bytes, expected);
}

#[test]
fn dynamic_array_literal_stores_each_element() {
    let out = compile_prog(vec![decl(
        "a",
        array(vec![Node::num(1.0), Node::ident("undefined"), call(Node::ident("f"), vec![])]),
    )]);
    let main = main_of(&out);
    // runtime stores: one i32 length store plus one f64 store per element
    assert!(has_op(&main.wasm, Op::F64Store));
    assert!(has_op(&main.wasm, Op::I32Store));
}

#[test]
fn array_length_read_and_write() {
    let out = compile_prog(vec![
        decl("a", array(vec![])),
        expr_stmt(assign("=", member(Node::ident("a"), "length"), Node::num(2.0))),
        expr_stmt(member(Node::ident("a"), "length")),
    ]);
    let main = main_of(&out);
    assert!(has_op(&main.wasm, Op::I32Store));
    assert!(has_op(&main.wasm, Op::I32Load));
    assert_eq!(main.wasm.last(), Some(&Instr::i32(Op::I32Const, TYPE_NUMBER)));
    // the empty literal still owns a zero-length data segment
    assert_eq!(out.data[0].bytes, vec![0, 0, 0, 0]);
}

#[test]
fn known_array_index_reads_inline() {
    let out = compile_prog(vec![
        decl("a", array(vec![Node::num(5.0)])),
        expr_stmt(index(Node::ident("a"), Node::num(0.0))),
    ]);
    let main = main_of(&out);
    assert!(has_op(&main.wasm, Op::F64Load));
    // statically typed receiver: no type switch needed
    assert!(!has_op(&main.wasm, Op::Unreachable));
}

#[test]
fn unknown_index_target_type_switches_and_traps() {
    let out = compile_prog(vec![
        func_decl("f", vec!["x"], vec![ret(index(Node::ident("x"), Node::num(0.0)))]),
    ]);
    let f = out.func("f").expect("missing f");
    assert!(has_op(&f.wasm, Op::Unreachable));
    assert!(f.locals.contains_key("#typeswitch_tmp"));
}

#[test]
fn indexed_assignment_to_non_array_throws() {
    let out = compile_prog(vec![func_decl(
        "f",
        vec!["x"],
        vec![expr_stmt(assign(
            "=",
            index(Node::ident("x"), Node::num(0.0)),
            Node::num(1.0),
        ))],
    )]);
    assert!(out
        .exceptions
        .iter()
        .any(|e| e.constructor.as_deref() == Some("TypeError")));
}

// ══════════════════════════════════════════════════════════════════════════════
// Constructors
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn new_array_with_length_stores_it() {
    let out = compile_prog(vec![decl(
        "a",
        Node::NewExpression {
            callee: Box::new(Node::ident("Array")),
            arguments: vec![Node::num(5.0)],
        },
    )]);
    assert!(out.pages.entries.iter().any(|p| p.reason == "array:a"));
    let main = main_of(&out);
    assert!(main
        .wasm
        .iter()
        .any(|i| i.op == Op::I32Const && i.imms == vec![Imm::I32(5)]));
    assert!(out.exceptions.is_empty());
}

#[test]
fn new_array_with_bad_lengths_throws_range_error() {
    for bad in [-1.0, f64::INFINITY, 4_294_967_296.0 * 2.0] {
        let out = compile_prog(vec![expr_stmt(Node::NewExpression {
            callee: Box::new(Node::ident("Array")),
            arguments: vec![Node::num(bad)],
        })]);
        assert_eq!(
            out.exceptions[0].constructor.as_deref(),
            Some("RangeError"),
            "length {bad}"
        );
        assert_eq!(
            out.exceptions[0].message.as_deref(),
            Some("Invalid array length")
        );
    }
}

#[test]
fn array_of_builds_an_array() {
    let out = compile_prog(vec![expr_stmt(call(
        member(Node::ident("Array"), "of"),
        vec![Node::num(1.0), Node::num(2.0)],
    ))]);
    assert!(out.pages.has_array);
}

// ══════════════════════════════════════════════════════════════════════════════
// Prototype dispatch
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn array_push_on_known_receiver_is_inline() {
    let out = compile_prog(vec![
        decl("a", array(vec![Node::num(1.0)])),
        expr_stmt(call(member(Node::ident("a"), "push"), vec![Node::num(4.0)])),
    ]);
    let main = main_of(&out);
    // element store plus length store, no dispatch switch
    assert!(has_op(&main.wasm, Op::F64Store));
    assert!(has_op(&main.wasm, Op::I32Store));
    assert!(!main.locals.contains_key("#typeswitch_tmp"));
}

#[test]
fn array_pop_sets_last_type_at_runtime() {
    let out = compile_prog(vec![
        decl("a", array(vec![Node::num(1.0)])),
        expr_stmt(call(member(Node::ident("a"), "pop"), vec![])),
    ]);
    let main = main_of(&out);
    assert!(main.locals.contains_key("#last_type"));
    assert!(has_op(&main.wasm, Op::If));
}

#[test]
fn char_at_uses_the_scratch_page() {
    let out = compile_prog(vec![
        decl("s", Node::str("ab")),
        expr_stmt(call(member(Node::ident("s"), "charAt"), vec![Node::num(0.0)])),
    ]);
    assert!(out
        .pages
        .entries
        .iter()
        .any(|p| p.reason == "string scratch"));
}

#[test]
fn unknown_receiver_dispatches_over_types() {
    let out = compile_prog(vec![func_decl(
        "f",
        vec!["x"],
        vec![ret(call(member(Node::ident("x"), "pop"), vec![]))],
    )]);
    let f = out.func("f").expect("missing f");
    assert!(f.locals.contains_key("#typeswitch_tmp"));
    // the default arm raises TypeError
    assert!(out
        .exceptions
        .iter()
        .any(|e| e.constructor.as_deref() == Some("TypeError")));
}

// ══════════════════════════════════════════════════════════════════════════════
// Control flow
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn while_loop_shape() {
    let out = compile_prog(vec![Node::WhileStatement {
        test: Box::new(Node::num(1.0)),
        body: Box::new(block(vec![Node::BreakStatement { label: None }])),
    }]);
    let main = main_of(&out);
    assert!(has_op(&main.wasm, Op::Loop));
    // break exits through the body guard, continue would re-enter the loop
    assert!(main.wasm.contains(&Instr::u32(Op::Br, 0)));
    assert!(main.wasm.contains(&Instr::u32(Op::Br, 1)));
}

#[test]
fn for_loop_runs_update_on_continue() {
    let out = compile_prog(vec![Node::ForStatement {
        init: Some(Box::new(decl("i", Node::num(0.0)))),
        test: Some(Box::new(binary("<", Node::ident("i"), Node::num(3.0)))),
        update: Some(Box::new(Node::UpdateExpression {
            operator: "++".into(),
            prefix: false,
            argument: Box::new(Node::ident("i")),
        })),
        body: Box::new(block(vec![Node::ContinueStatement { label: None }])),
    }]);
    let main = main_of(&out);
    // continue targets the inner body block (depth 0 from the body)
    assert!(main.wasm.contains(&Instr::u32(Op::Br, 0)));
    assert!(has_op(&main.wasm, Op::Block));
    assert!(has_op(&main.wasm, Op::Loop));
}

#[test]
fn for_of_over_an_array_sums() {
    let out = compile_prog(vec![
        decl("a", array(vec![Node::num(1.0), Node::num(2.0), Node::num(3.0)])),
        decl("n", Node::num(0.0)),
        Node::ForOfStatement {
            left: Box::new(decl("x", Node::ident("undefined"))),
            right: Box::new(Node::ident("a")),
            body: Box::new(block(vec![expr_stmt(assign(
                "+=",
                Node::ident("n"),
                Node::ident("x"),
            ))])),
        },
        expr_stmt(Node::ident("n")),
    ]);
    let main = main_of(&out);
    assert!(has_op(&main.wasm, Op::Loop));
    assert!(has_op(&main.wasm, Op::F64Add));
    // the trailing `n` flows out with a static number tag
    assert_eq!(main.wasm.last(), Some(&Instr::i32(Op::I32Const, TYPE_NUMBER)));
    // a TypeError arm guards non-iterables
    assert!(out
        .exceptions
        .iter()
        .any(|e| e.constructor.as_deref() == Some("TypeError")));
}

#[test]
fn for_of_over_a_string_rewrites_the_scratch_page() {
    let out = compile_prog(vec![
        decl("s", Node::str("ab")),
        Node::ForOfStatement {
            left: Box::new(decl("c", Node::ident("undefined"))),
            right: Box::new(Node::ident("s")),
            body: Box::new(block(vec![])),
        },
    ]);
    assert!(out
        .pages
        .entries
        .iter()
        .any(|p| p.reason == "string scratch"));
    assert!(has_op(&main_of(&out).wasm, Op::MemoryCopy));
}

#[test]
fn ternary_notes_both_arm_types() {
    let out = compile_prog(vec![expr_stmt(Node::ConditionalExpression {
        test: Box::new(Node::num(1.0)),
        consequent: Box::new(Node::num(2.0)),
        alternate: Box::new(Node::str("x")),
    })]);
    let main = main_of(&out);
    assert!(main.locals.contains_key("#last_type"));
    assert!(has_op(&main.wasm, Op::If));
}

#[test]
fn logical_or_branches_on_truthiness() {
    let out = compile_prog(vec![
        decl("a", Node::num(0.0)),
        expr_stmt(Node::LogicalExpression {
            operator: "||".into(),
            left: Box::new(Node::ident("a")),
            right: Box::new(Node::num(2.0)),
        }),
    ]);
    let main = main_of(&out);
    assert!(main.locals.contains_key("#logicinner_tmp"));
    assert!(main.locals.contains_key("#last_type"));
}

// ══════════════════════════════════════════════════════════════════════════════
// try / throw
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn try_catch_returns_the_catch_value() {
    let out = compile_prog(vec![Node::TryStatement {
        block: Box::new(block(vec![Node::ThrowStatement {
            argument: Box::new(Node::NewExpression {
                callee: Box::new(Node::ident("TypeError")),
                arguments: vec![Node::str("x")],
            }),
        }])),
        handler: Some(Box::new(Node::CatchClause {
            param: None,
            body: Box::new(block(vec![expr_stmt(Node::num(42.0))])),
        })),
        finalizer: None,
    }]);
    let main = main_of(&out);
    assert!(has_op(&main.wasm, Op::Try));
    assert!(has_op(&main.wasm, Op::CatchAll));
    assert!(has_op(&main.wasm, Op::Throw));
    // the catch value escapes through an inserted return
    assert!(has_op(&main.wasm, Op::Return));
    assert!(main.wasm.contains(&Instr::f64(Op::F64Const, 42.0)));
    assert!(main.throws);

    assert_eq!(out.tags.len(), 1);
    assert_eq!(out.tags[0].params, vec![tarn_codegen::Valtype::I32]);
    assert_eq!(out.exceptions[0].constructor.as_deref(), Some("TypeError"));
    assert_eq!(out.exceptions[0].message.as_deref(), Some("x"));
}

#[test]
fn bare_string_throws_record_no_constructor() {
    let out = compile_prog(vec![Node::ThrowStatement {
        argument: Box::new(Node::str("boom")),
    }]);
    assert_eq!(out.exceptions[0].constructor, None);
    assert_eq!(out.exceptions[0].message.as_deref(), Some("boom"));
}

#[test]
fn finally_is_rejected() {
    let err = compile(
        &program(vec![Node::TryStatement {
            block: Box::new(block(vec![])),
            handler: None,
            finalizer: Some(Box::new(block(vec![]))),
        }]),
        &Options::default(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("finally"));
}

#[test]
fn throw_flag_propagates_to_callers() {
    let out = compile_prog(vec![
        func_decl(
            "boom",
            vec![],
            vec![Node::ThrowStatement {
                argument: Box::new(Node::str("x")),
            }],
        ),
        expr_stmt(call(Node::ident("boom"), vec![])),
    ]);
    assert!(out.func("boom").unwrap().throws);
    assert!(main_of(&out).throws);
}

// ══════════════════════════════════════════════════════════════════════════════
// typeof / delete / eval
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn typeof_arrow_is_the_function_string() {
    let out = compile_prog(vec![expr_stmt(unary(
        "typeof",
        Node::ArrowFunctionExpression {
            params: vec![],
            body: Box::new(Node::num(0.0)),
            expression: true,
            is_async: false,
        },
    ))]);
    assert!(out
        .pages
        .entries
        .iter()
        .any(|p| p.reason == "string:function"));
    let seg = out
        .data
        .iter()
        .find(|d| d.bytes.len() == 4 + 2 * 8)
        .expect("missing function string data");
    assert_eq!(&seg.bytes[..4], &[8, 0, 0, 0]);
    assert_eq!(seg.bytes[4], b'f');
    // the arrow itself was compiled
    assert!(out.funcs.iter().any(|f| f.name.starts_with("#anonymous")));
    // typeof's own result is a static string
    assert_eq!(
        main_of(&out).wasm.last(),
        Some(&Instr::i32(Op::I32Const, TYPE_STRING))
    );
}

#[test]
fn typeof_unknown_value_type_switches() {
    let options = Options::from_args(["-typeswitch-use-brtable"]);
    let prog = program(vec![func_decl(
        "f",
        vec!["a"],
        vec![ret(unary("typeof", Node::ident("a")))],
    )]);
    let out = compile(&prog, &options).unwrap();
    assert!(has_op(&out.func("f").unwrap().wasm, Op::BrTable));

    let out = compile(&prog, &Options::default()).unwrap();
    assert!(!has_op(&out.func("f").unwrap().wasm, Op::BrTable));
}

#[test]
fn delete_reports_binding_presence() {
    let out = compile_prog(vec![expr_stmt(unary("delete", Node::ident("ghost")))]);
    let main = main_of(&out);
    assert!(main.wasm.contains(&Instr::f64(Op::F64Const, 1.0)));
    assert_eq!(main.wasm.last(), Some(&Instr::i32(Op::I32Const, TYPE_BOOLEAN)));

    let out = compile_prog(vec![
        decl("x", Node::num(1.0)),
        expr_stmt(unary("delete", Node::ident("x"))),
    ]);
    assert!(main_of(&out).wasm.contains(&Instr::f64(Op::F64Const, 0.0)));
}

fn eval_stub(_source: &str) -> Result<Node, String> {
    Ok(Node::Program {
        body: vec![Node::ExpressionStatement {
            expression: Box::new(Node::num(42.0)),
        }],
    })
}

#[test]
fn eval_of_a_literal_lowers_inline() {
    let options = Options {
        eval_parser: Some(eval_stub),
        ..Options::default()
    };
    let out = compile(
        &program(vec![expr_stmt(call(Node::ident("eval"), vec![Node::str("42")]))]),
        &options,
    )
    .unwrap();
    let main = main_of(&out);
    assert!(main.wasm.contains(&Instr::f64(Op::F64Const, 42.0)));
    // no extra function was created
    assert_eq!(out.funcs.len(), 1);
}

#[test]
fn eval_of_a_non_literal_throws_reference_error() {
    let options = Options {
        eval_parser: Some(eval_stub),
        ..Options::default()
    };
    let out = compile(
        &program(vec![
            decl("x", Node::str("1")),
            expr_stmt(call(Node::ident("eval"), vec![Node::ident("x")])),
        ]),
        &options,
    )
    .unwrap();
    assert!(out
        .exceptions
        .iter()
        .any(|e| e.constructor.as_deref() == Some("ReferenceError")));
}

#[test]
fn eval_without_a_parser_is_unsupported() {
    let err = compile(
        &program(vec![expr_stmt(call(Node::ident("eval"), vec![Node::str("1")]))]),
        &Options::default(),
    )
    .unwrap_err();
    assert!(matches!(err, tarn_codegen::CodegenError::Todo(_)));
}

// ══════════════════════════════════════════════════════════════════════════════
// Template intrinsics and regex
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn asm_template_assembles_lines() {
    let out = compile_prog(vec![expr_stmt(Node::TaggedTemplateExpression {
        tag: Box::new(Node::ident("asm")),
        quasi: Box::new(template(
            "local acc f64\nf64.const 2\nlocal.set acc\nlocal.get acc",
            vec![],
        )),
    })]);
    let main = main_of(&out);
    assert!(main.locals.contains_key("acc"));
    let acc = main.locals["acc"].idx;
    assert!(main.wasm.contains(&Instr::local_set(acc)));
    assert!(main.wasm.contains(&Instr::local_get(acc)));
    assert!(main.wasm.contains(&Instr::f64(Op::F64Const, 2.0)));
}

#[test]
fn asm_memory_directive_reserves_the_intrinsic_page() {
    let out = compile_prog(vec![expr_stmt(Node::TaggedTemplateExpression {
        tag: Box::new(Node::ident("asm")),
        quasi: Box::new(template("memory\ni32.const 0", vec![])),
    })]);
    assert!(out
        .pages
        .entries
        .iter()
        .any(|p| p.reason == "asm intrinsic"));
}

#[test]
fn internal_print_type_prints_tag_and_newline() {
    let out = compile_prog(vec![expr_stmt(Node::TaggedTemplateExpression {
        tag: Box::new(Node::ident("__internal_print_type")),
        quasi: Box::new(template("", vec![Node::num(5.0)])),
    })]);
    let main = main_of(&out);
    let targets = call_targets(&main.wasm);
    // import 0 is the number printer, import 1 the character printer
    assert!(targets.contains(&0));
    assert!(targets.contains(&1));
    assert!(main.wasm.contains(&Instr::i32(Op::I32Const, 10)));
}

fn regex_stub(_pattern: &str, _flags: &str) -> tarn_codegen::RegexFunc {
    tarn_codegen::RegexFunc {
        params: vec![tarn_codegen::Valtype::F64],
        locals: vec![],
        returns: vec![tarn_codegen::Valtype::F64],
        return_type: TYPE_BOOLEAN,
        wasm: vec![Instr::local_get(0)],
    }
}

#[test]
fn regex_literal_calls_compile_through_the_hook() {
    let options = Options {
        regex_compiler: Some(regex_stub),
        ..Options::default()
    };
    let regex_lit = Node::Literal {
        value: LitValue::Null,
        raw: None,
        regex: Some(RegexLiteral {
            pattern: "a+".into(),
            flags: "g".into(),
        }),
    };
    let out = compile(
        &program(vec![expr_stmt(call(
            member(regex_lit, "test"),
            vec![Node::str("aaa")],
        ))]),
        &options,
    )
    .unwrap();
    let re = out.func("regex:/a+/g").expect("missing compiled regex");
    assert!(re.internal);
    assert_eq!(re.return_type, Some(TYPE_BOOLEAN));
    assert!(call_targets(&main_of(&out).wasm).contains(&(re.index as i32)));
}

#[test]
fn regex_without_a_compiler_is_unsupported() {
    let regex_lit = Node::Literal {
        value: LitValue::Null,
        raw: None,
        regex: Some(RegexLiteral {
            pattern: "a".into(),
            flags: String::new(),
        }),
    };
    let err = compile(
        &program(vec![expr_stmt(call(member(regex_lit, "test"), vec![]))]),
        &Options::default(),
    )
    .unwrap_err();
    assert!(matches!(err, tarn_codegen::CodegenError::Todo(_)));
}

// ══════════════════════════════════════════════════════════════════════════════
// Unsupported constructs halt compilation
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn generators_are_rejected() {
    let err = compile(
        &program(vec![Node::FunctionDeclaration {
            id: Some(Box::new(Node::ident("g"))),
            params: vec![],
            body: Box::new(block(vec![])),
            generator: true,
            is_async: false,
        }]),
        &Options::default(),
    )
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "todo: generator functions are not supported"
    );
}

#[test]
fn unknown_statements_are_skipped_silently() {
    // A TS declaration deserializes to Unknown and lowers to nothing.
    let out = compile_prog(vec![Node::Unknown, expr_stmt(Node::num(1.0))]);
    assert!(main_of(&out).wasm.contains(&Instr::f64(Op::F64Const, 1.0)));
}

#[test]
fn array_known_type_helps_typeof() {
    let out = compile_prog(vec![
        decl("a", array(vec![])),
        expr_stmt(unary("typeof", Node::ident("a"))),
    ]);
    // internal array tag reads back as "object"
    assert!(out
        .pages
        .entries
        .iter()
        .any(|p| p.reason == "string:object"));
    assert_eq!(
        main_of(&out).wasm.last(),
        Some(&Instr::i32(Op::I32Const, TYPE_STRING))
    );
}

#[test]
fn globals_pair_payload_and_tag_slots() {
    let out = compile_prog(vec![decl("x", Node::num(1.0)), decl("y", Node::str("s"))]);
    let find = |name: &str| out.globals.iter().find(|g| g.name == name).unwrap();
    assert_eq!(find("x").idx + 1, find("x#type").idx);
    assert_eq!(find("y").idx + 1, find("y#type").idx);
    assert_eq!(find("x").valtype, tarn_codegen::Valtype::F64);
    assert_eq!(find("x#type").valtype, tarn_codegen::Valtype::I32);
}

#[test]
fn redeclaring_a_global_is_a_syntax_error_throw() {
    let out = compile_prog(vec![decl("x", Node::num(1.0)), decl("x", Node::num(2.0))]);
    assert_eq!(out.exceptions[0].constructor.as_deref(), Some("SyntaxError"));
}

#[test]
fn member_sentinel_misses_read_as_undefined() {
    // `Missing.prop` rewrites to `__Missing_prop`, which resolves silently.
    let out = compile_prog(vec![expr_stmt(member(Node::ident("Missing"), "prop"))]);
    assert!(out.exceptions.is_empty());
    let main = main_of(&out);
    assert!(main.wasm.contains(&Instr::f64(Op::F64Const, 0.0)));
    assert_eq!(
        main.wasm.last(),
        Some(&Instr::i32(Op::I32Const, TYPE_UNDEFINED))
    );
}

#[test]
fn arrays_map_declared_names_to_pointers() {
    let out = compile_prog(vec![
        decl("a", array(vec![Node::num(1.0)])),
        decl("b", array(vec![Node::num(2.0)])),
    ]);
    let a = out.pages.entries.iter().find(|p| p.reason == "array:a").unwrap();
    let b = out.pages.entries.iter().find(|p| p.reason == "array:b").unwrap();
    assert_ne!(a.index, b.index);
    assert_eq!(out.pages.page_size, 65536);
    assert_eq!(out.data[1].offset, b.index * out.pages.page_size);
}

#[test]
fn array_tag_is_internal() {
    assert_eq!(TYPE_ARRAY, 0x10);
    assert_eq!(TYPE_STRING, 0x02);
}
