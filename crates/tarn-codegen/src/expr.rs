//! Expression lowering.
//!
//! Every expression pushes exactly one payload in the module valtype.  Its
//! type tag is either statically known (see [`known_type`]) or readable
//! through the `#last_type` temporary, which every dynamic site (calls,
//! logical results, dynamic member reads) keeps current.  [`emit_type`]
//! pushes the tag as an i32 either way.

use tarn_types::{LitValue, Node};

use crate::builtins::{internal_ctor, InternalCtor, LengthCache, ProtoCtx};
use crate::compiler::Compilation;
use crate::error::{CodegenError, CodegenResult};
use crate::memory::{Data, PageKind};
use crate::op::{BlockType, Imm, Instr, Marker, Op};
use crate::scope::{lookup_name, Scope};
use crate::stmt;
use crate::types::{
    typeof_name, TypeTag, Valtype, ALL_TYPES, NULL, TYPE_ARRAY, TYPE_BOOLEAN, TYPE_FUNCTION,
    TYPE_NUMBER, TYPE_OBJECT, TYPE_REGEXP, TYPE_STRING, TYPE_UNDEFINED, UNDEFINED,
};

/// Predicates used by logical operators and control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pred {
    Truthy,
    Falsy,
    Nullish,
}

// ══════════════════════════════════════════════════════════════════════════════
// Entry points
// ══════════════════════════════════════════════════════════════════════════════

/// Lower an expression; one payload lands on the stack.
pub fn emit_expr(
    comp: &mut Compilation,
    scope: &mut Scope,
    node: &Node,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    emit_expr_named(comp, scope, node, None, out)
}

/// Lower an expression with an optional binding-name hint, used to key the
/// pages of array/string initializers to the declared name.
pub fn emit_expr_named(
    comp: &mut Compilation,
    scope: &mut Scope,
    node: &Node,
    name_hint: Option<&str>,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    match node {
        Node::Literal { regex: Some(_), .. } => Err(CodegenError::Todo(
            "regular expression literals are only supported as call receivers".into(),
        )),
        Node::Literal { value, .. } => {
            match value {
                LitValue::Num(n) => out.push(comp.ops.konst(*n)),
                LitValue::Bool(b) => out.push(comp.ops.konst(if *b { 1.0 } else { 0.0 })),
                LitValue::Str(s) => {
                    let s = s.clone();
                    make_string(comp, &s, name_hint, out);
                }
                LitValue::Null => out.push(comp.ops.konst(NULL)),
            }
            Ok(())
        }
        Node::TemplateLiteral {
            quasis,
            expressions,
        } => {
            if !expressions.is_empty() {
                return Err(CodegenError::Todo(
                    "template literals with substitutions are not supported".into(),
                ));
            }
            let s = template_text(quasis);
            make_string(comp, &s, name_hint, out);
            Ok(())
        }
        Node::Identifier { name, .. } => emit_ident(comp, scope, name, out),
        Node::BinaryExpression {
            operator,
            left,
            right,
        } => emit_binary(comp, scope, operator, left, right, out),
        Node::LogicalExpression {
            operator,
            left,
            right,
        } => emit_logical(comp, scope, operator, left, right, out),
        Node::UnaryExpression { operator, argument } => {
            emit_unary(comp, scope, operator, argument, out)
        }
        Node::UpdateExpression {
            operator,
            prefix,
            argument,
        } => emit_update(comp, scope, operator, *prefix, argument, out),
        Node::ConditionalExpression {
            test,
            consequent,
            alternate,
        } => emit_conditional(comp, scope, test, consequent, alternate, out),
        Node::AssignmentExpression {
            operator,
            left,
            right,
        } => emit_assign(comp, scope, operator, left, right, out),
        Node::MemberExpression {
            object,
            property,
            computed,
            ..
        } => emit_member(comp, scope, object, property, *computed, out),
        Node::CallExpression {
            callee, arguments, ..
        } => emit_call(comp, scope, callee, arguments, out),
        Node::NewExpression { callee, arguments } => {
            emit_new(comp, scope, callee, arguments, name_hint, out)
        }
        Node::ArrayExpression { elements } => {
            make_array(comp, scope, elements, name_hint, out)
        }
        Node::ArrowFunctionExpression {
            params,
            body,
            is_async,
            ..
        } => {
            let is_expr_body = !matches!(**body, Node::BlockStatement { .. });
            emit_func_expr(comp, None, params, body, *is_async, false, is_expr_body, out)
        }
        Node::FunctionExpression {
            id,
            params,
            body,
            generator,
            is_async,
        } => {
            let name = id.as_deref().and_then(Node::ident_name).map(str::to_string);
            emit_func_expr(
                comp,
                name.as_deref(),
                params,
                body,
                *is_async,
                *generator,
                false,
                out,
            )
        }
        Node::TaggedTemplateExpression { tag, quasi } => {
            emit_tagged(comp, scope, tag, quasi, out)
        }
        Node::Unknown => {
            out.push(comp.ops.konst(UNDEFINED));
            Ok(())
        }
        other => Err(CodegenError::Todo(format!(
            "unsupported expression: {}",
            node_kind(other)
        ))),
    }
}

/// Push the i32 type tag of an expression's value.
pub fn emit_type(
    comp: &mut Compilation,
    scope: &mut Scope,
    node: &Node,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    if let Some(tag) = known_type(comp, scope, node) {
        out.push(Instr::i32(Op::I32Const, tag));
        return Ok(());
    }
    match node {
        Node::Identifier { name, .. } => {
            if let Some((b, is_global)) = lookup_name(scope, &comp.globals, name) {
                let idx = b.idx + 1;
                out.push(if is_global {
                    Instr::global_get(idx)
                } else {
                    Instr::local_get(idx)
                });
                return Ok(());
            }
            out.push(Instr::i32(Op::I32Const, TYPE_UNDEFINED));
            Ok(())
        }
        Node::AssignmentExpression { left, .. } => {
            if let Some(name) = left.ident_name() {
                if let Some((b, is_global)) = lookup_name(scope, &comp.globals, name) {
                    let idx = b.idx + 1;
                    out.push(if is_global {
                        Instr::global_get(idx)
                    } else {
                        Instr::local_get(idx)
                    });
                    return Ok(());
                }
            }
            push_last_type(scope, out);
            Ok(())
        }
        Node::CallExpression { .. }
        | Node::LogicalExpression { .. }
        | Node::ConditionalExpression { .. }
        | Node::MemberExpression { .. }
        | Node::TaggedTemplateExpression { .. } => {
            push_last_type(scope, out);
            Ok(())
        }
        _ => {
            out.push(Instr::i32(Op::I32Const, TYPE_NUMBER));
            Ok(())
        }
    }
}

/// The statically-known type tag of an expression, when the lowering can
/// prove one.
pub fn known_type(comp: &Compilation, scope: &Scope, node: &Node) -> Option<TypeTag> {
    match node {
        Node::Literal { regex: Some(_), .. } => Some(TYPE_REGEXP),
        Node::Literal { value, .. } => Some(match value {
            LitValue::Num(_) => TYPE_NUMBER,
            LitValue::Bool(_) => TYPE_BOOLEAN,
            LitValue::Str(_) => TYPE_STRING,
            LitValue::Null => TYPE_OBJECT,
        }),
        Node::TemplateLiteral { expressions, .. } if expressions.is_empty() => Some(TYPE_STRING),
        Node::Identifier { name, .. } => {
            if let Some((b, _)) = lookup_name(scope, &comp.globals, name) {
                return b.metadata;
            }
            if name == "undefined" {
                return Some(TYPE_UNDEFINED);
            }
            if let Some(v) = comp.builtins.var(name) {
                return Some(v.type_tag);
            }
            if comp.find_func(name).is_some() {
                return Some(TYPE_FUNCTION);
            }
            // Unbound names lower to `undefined` (silently for the member
            // sentinel, after a thrown ReferenceError otherwise).
            Some(TYPE_UNDEFINED)
        }
        Node::ArrayExpression { .. } => Some(TYPE_ARRAY),
        Node::ArrowFunctionExpression { .. } | Node::FunctionExpression { .. } => {
            Some(TYPE_FUNCTION)
        }
        Node::UnaryExpression { operator, .. } => match operator.as_str() {
            "!" | "delete" => Some(TYPE_BOOLEAN),
            "+" | "-" | "~" => Some(TYPE_NUMBER),
            "typeof" => Some(TYPE_STRING),
            "void" => Some(TYPE_UNDEFINED),
            _ => None,
        },
        Node::UpdateExpression { .. } => Some(TYPE_NUMBER),
        Node::BinaryExpression {
            operator,
            left,
            right,
        } => Some(binary_result_type(
            operator,
            known_type(comp, scope, left),
            known_type(comp, scope, right),
        )),
        Node::LogicalExpression { left, right, .. } => {
            merge_types(known_type(comp, scope, left), known_type(comp, scope, right))
        }
        Node::ConditionalExpression {
            consequent,
            alternate,
            ..
        } => merge_types(
            known_type(comp, scope, consequent),
            known_type(comp, scope, alternate),
        ),
        Node::AssignmentExpression {
            operator,
            left,
            right,
        } => match operator.as_str() {
            "=" => known_type(comp, scope, right),
            "||=" | "&&=" | "??=" => {
                merge_types(known_type(comp, scope, left), known_type(comp, scope, right))
            }
            op => {
                let base = op.strip_suffix('=').unwrap_or(op);
                Some(binary_result_type(
                    base,
                    known_type(comp, scope, left),
                    known_type(comp, scope, right),
                ))
            }
        },
        Node::MemberExpression {
            object,
            property,
            computed,
            ..
        } => {
            if !computed && property.ident_name() == Some("length") {
                return Some(TYPE_NUMBER);
            }
            if *computed {
                return match known_type(comp, scope, object) {
                    Some(TYPE_ARRAY) => Some(TYPE_NUMBER),
                    Some(TYPE_STRING) => Some(TYPE_STRING),
                    _ => None,
                };
            }
            None
        }
        Node::NewExpression { callee, .. } => callee
            .ident_name()
            .and_then(internal_ctor)
            .map(|(_, tag)| tag),
        Node::CallExpression { callee, .. } => known_call_type(comp, scope, callee),
        Node::TaggedTemplateExpression { tag, .. } => match tag.ident_name() {
            Some("asm") => Some(TYPE_NUMBER),
            Some("__internal_print_type") => Some(TYPE_UNDEFINED),
            _ => None,
        },
        _ => None,
    }
}

fn known_call_type(comp: &Compilation, scope: &Scope, callee: &Node) -> Option<TypeTag> {
    let name = match callee.ident_name() {
        Some(n) => n,
        None => {
            // Prototype dispatch through a member callee: the
            // single-candidate fast path gives a static type.
            if let Node::MemberExpression {
                property,
                computed: false,
                ..
            } = callee
            {
                let method = property.ident_name()?;
                let candidates = comp.builtins.proto_candidates(method);
                if candidates.len() == 1 {
                    return candidates[0].1.return_type;
                }
            }
            return None;
        }
    };

    if name == "eval" {
        return None;
    }
    if let Some(f) = comp.find_func(name) {
        return f.return_type;
    }
    if let Some(i) = comp.find_import(name) {
        return comp.imports[i as usize].returns.is_empty().then_some(TYPE_UNDEFINED);
    }
    if let Some(b) = comp.builtins.func(name) {
        return b.return_type;
    }
    if let Some((_, tag)) = internal_ctor(name) {
        return Some(tag);
    }
    if let Some((recv, method)) = split_proto_name(name) {
        if lookup_name(scope, &comp.globals, recv).is_some() {
            let candidates = comp.builtins.proto_candidates(method);
            if candidates.len() == 1 {
                return candidates[0].1.return_type;
            }
            if !candidates.is_empty() {
                return None;
            }
        }
    }
    if name == scope.name {
        return scope.return_type;
    }
    // Unresolvable callees lower to a thrown error plus `undefined`.
    Some(TYPE_UNDEFINED)
}

// ══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ══════════════════════════════════════════════════════════════════════════════

fn emit_ident(
    comp: &mut Compilation,
    scope: &mut Scope,
    name: &str,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    if let Some((b, is_global)) = lookup_name(scope, &comp.globals, name) {
        let idx = b.idx;
        out.push(if is_global {
            Instr::global_get(idx)
        } else {
            Instr::local_get(idx)
        });
        return Ok(());
    }
    if name == "undefined" {
        out.push(comp.ops.konst(UNDEFINED));
        return Ok(());
    }
    if let Some(v) = comp.builtins.var(name) {
        if v.float_only && comp.options.valtype != Valtype::F64 {
            return Err(CodegenError::Todo(format!(
                "{name} is only supported under the f64 valtype"
            )));
        }
        out.push(comp.ops.konst(v.value));
        return Ok(());
    }
    if let Some(f) = comp.find_func(name) {
        let index = f.index;
        out.push(comp.ops.konst(index as f64));
        return Ok(());
    }
    if name.starts_with("__") {
        // A rewritten member access on an unknown namespace: behave like a
        // missing property.
        out.push(comp.ops.konst(UNDEFINED));
        return Ok(());
    }
    comp.emit_throw(
        scope,
        "ReferenceError",
        &format!("{name} is not defined"),
        out,
    );
    out.push(comp.ops.konst(UNDEFINED));
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
// Binary operators
// ══════════════════════════════════════════════════════════════════════════════

fn emit_binary(
    comp: &mut Compilation,
    scope: &mut Scope,
    operator: &str,
    left: &Node,
    right: &Node,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    let lk = known_type(comp, scope, left);
    let rk = known_type(comp, scope, right);

    if operator == "+" && (lk == Some(TYPE_STRING) || rk == Some(TYPE_STRING)) {
        return emit_concat(comp, scope, left, right, None, out);
    }

    match operator {
        "==" | "!=" => emit_equality(comp, scope, left, right, false, operator == "!=", out),
        "===" | "!==" => emit_equality(comp, scope, left, right, true, operator == "!==", out),
        "<" | "<=" | ">" | ">=" => {
            emit_expr(comp, scope, left, out)?;
            emit_expr(comp, scope, right, out)?;
            out.push(compare_op(comp.ops.valtype, operator));
            out.extend(comp.ops.i32_from());
            Ok(())
        }
        "+" | "-" | "*" | "/" => {
            emit_expr(comp, scope, left, out)?;
            emit_expr(comp, scope, right, out)?;
            out.push(match operator {
                "+" => comp.ops.add(),
                "-" => comp.ops.sub(),
                "*" => comp.ops.mul(),
                _ => Instr::op(match comp.ops.valtype {
                    Valtype::I32 => Op::I32DivS,
                    Valtype::I64 => Op::I64DivS,
                    Valtype::F64 => Op::F64Div,
                }),
            });
            Ok(())
        }
        "%" => {
            emit_expr(comp, scope, left, out)?;
            emit_expr(comp, scope, right, out)?;
            match comp.ops.valtype {
                Valtype::I32 => out.push(Instr::op(Op::I32RemS)),
                Valtype::I64 => out.push(Instr::op(Op::I64RemS)),
                Valtype::F64 => {
                    // a - trunc(a / b) * b
                    let a = scope.alloc_tmp("#rem_l", Valtype::F64);
                    let b = scope.alloc_tmp("#rem_r", Valtype::F64);
                    out.push(Instr::local_set(b));
                    out.push(Instr::local_set(a));
                    out.push(Instr::local_get(a));
                    out.push(Instr::local_get(a));
                    out.push(Instr::local_get(b));
                    out.push(Instr::op(Op::F64Div));
                    out.push(Instr::op(Op::F64Trunc));
                    out.push(Instr::local_get(b));
                    out.push(Instr::op(Op::F64Mul));
                    out.push(Instr::op(Op::F64Sub));
                }
            }
            Ok(())
        }
        "&" | "|" | "^" | "<<" | ">>" => {
            emit_expr(comp, scope, left, out)?;
            out.extend(comp.ops.i32_to());
            emit_expr(comp, scope, right, out)?;
            out.extend(comp.ops.i32_to());
            out.push(Instr::op(match operator {
                "&" => Op::I32And,
                "|" => Op::I32Or,
                "^" => Op::I32Xor,
                "<<" => Op::I32Shl,
                _ => Op::I32ShrS,
            }));
            out.extend(comp.ops.i32_from());
            Ok(())
        }
        ">>>" => {
            emit_expr(comp, scope, left, out)?;
            out.extend(comp.ops.i32_to_u());
            emit_expr(comp, scope, right, out)?;
            out.extend(comp.ops.i32_to_u());
            out.push(Instr::op(Op::I32ShrU));
            out.extend(comp.ops.i32_from_u());
            Ok(())
        }
        other => Err(CodegenError::Todo(format!(
            "operator {other} is not supported"
        ))),
    }
}

/// Comparison opcode from the (valtype, operator) table.
fn compare_op(valtype: Valtype, operator: &str) -> Instr {
    Instr::op(match (valtype, operator) {
        (Valtype::I32, "<") => Op::I32LtS,
        (Valtype::I32, "<=") => Op::I32LeS,
        (Valtype::I32, ">") => Op::I32GtS,
        (Valtype::I32, ">=") => Op::I32GeS,
        (Valtype::I64, "<") => Op::I64LtS,
        (Valtype::I64, "<=") => Op::I64LeS,
        (Valtype::I64, ">") => Op::I64GtS,
        (Valtype::I64, ">=") => Op::I64GeS,
        (Valtype::F64, "<") => Op::F64Lt,
        (Valtype::F64, "<=") => Op::F64Le,
        (Valtype::F64, ">") => Op::F64Gt,
        (_, _) => Op::F64Ge,
    })
}

fn binary_result_type(operator: &str, lk: Option<TypeTag>, rk: Option<TypeTag>) -> TypeTag {
    match operator {
        "==" | "!=" | "===" | "!==" | "<" | "<=" | ">" | ">=" => TYPE_BOOLEAN,
        "+" if lk == Some(TYPE_STRING) || rk == Some(TYPE_STRING) => TYPE_STRING,
        _ => TYPE_NUMBER,
    }
}

fn merge_types(a: Option<TypeTag>, b: Option<TypeTag>) -> Option<TypeTag> {
    match (a, b) {
        (Some(x), Some(y)) if x == y => Some(x),
        _ => None,
    }
}

/// Equality with the speculative string path.
///
/// When either operand could be a string at runtime, the numeric compare is
/// wrapped in a block that checks the type tags and branches to an inline
/// string compare: pointer-equality fast path, length-inequality fast path,
/// then a 16-bit code-unit loop.  The whole string run carries `string_only`
/// markers so a later pass can drop it under non-string-capable valtypes.
fn emit_equality(
    comp: &mut Compilation,
    scope: &mut Scope,
    left: &Node,
    right: &Node,
    strict: bool,
    negate: bool,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    let lk = known_type(comp, scope, left);
    let rk = known_type(comp, scope, right);
    let maybe_string = |k: Option<TypeTag>| k.is_none() || k == Some(TYPE_STRING);

    if !maybe_string(lk) && !maybe_string(rk) {
        emit_expr(comp, scope, left, out)?;
        emit_expr(comp, scope, right, out)?;
        out.push(comp.ops.eq());
        if strict {
            out.push(Instr::i32(Op::I32Const, lk.unwrap_or(TYPE_NUMBER)));
            out.push(Instr::i32(Op::I32Const, rk.unwrap_or(TYPE_NUMBER)));
            out.push(Instr::op(Op::I32Eq));
            out.push(Instr::op(Op::I32And));
        }
        if negate {
            out.push(Instr::op(Op::I32Eqz));
        }
        out.extend(comp.ops.i32_from());
        return Ok(());
    }

    // Tmps are suffixed per call site: operand evaluation can itself contain
    // an equality.
    let uid = comp.anon_id();
    let l = scope.alloc_tmp(&format!("#eq_l{uid}"), comp.ops.valtype);
    let r = scope.alloc_tmp(&format!("#eq_r{uid}"), comp.ops.valtype);
    let tl = scope.alloc_tmp(&format!("#eq_tl{uid}"), Valtype::I32);
    let tr = scope.alloc_tmp(&format!("#eq_tr{uid}"), Valtype::I32);

    emit_expr(comp, scope, left, out)?;
    out.push(Instr::local_set(l));
    emit_type(comp, scope, left, out)?;
    out.push(Instr::local_set(tl));
    emit_expr(comp, scope, right, out)?;
    out.push(Instr::local_set(r));
    emit_type(comp, scope, right, out)?;
    out.push(Instr::local_set(tr));

    out.push(Instr::block(Op::Block, BlockType::Val(Valtype::I32)));

    // String path (prunable run).
    let mut run = Vec::new();
    run.push(Instr::local_get(tl));
    run.push(Instr::i32(Op::I32Const, TYPE_STRING));
    run.push(Instr::op(Op::I32Eq));
    run.push(Instr::local_get(tr));
    run.push(Instr::i32(Op::I32Const, TYPE_STRING));
    run.push(Instr::op(Op::I32Eq));
    run.push(Instr::op(Op::I32Or));
    run.push(Instr::block(Op::If, BlockType::Void));
    emit_string_eq(comp, scope, uid, l, r, &mut run);
    run.push(Instr::op(Op::End));
    mark_string_only(&mut run);
    out.extend(run);

    // Numeric path.
    out.push(Instr::local_get(l));
    out.push(Instr::local_get(r));
    out.push(comp.ops.eq());
    out.push(Instr::op(Op::End));

    if strict {
        out.push(Instr::local_get(tl));
        out.push(Instr::local_get(tr));
        out.push(Instr::op(Op::I32Eq));
        out.push(Instr::op(Op::I32And));
    }
    if negate {
        out.push(Instr::op(Op::I32Eqz));
    }
    out.extend(comp.ops.i32_from());
    Ok(())
}

/// The inline string compare.  Emitted inside `block(i32) { if(void) { … } }`
/// so results branch out two levels (plus loop nesting) to the enclosing
/// block.
fn emit_string_eq(
    comp: &mut Compilation,
    scope: &mut Scope,
    uid: u32,
    l: u32,
    r: u32,
    out: &mut Vec<Instr>,
) {
    let lp = scope.alloc_tmp(&format!("#eq_lp{uid}"), Valtype::I32);
    let rp = scope.alloc_tmp(&format!("#eq_rp{uid}"), Valtype::I32);
    let ll = scope.alloc_tmp(&format!("#eq_ll{uid}"), Valtype::I32);
    let rl = scope.alloc_tmp(&format!("#eq_rl{uid}"), Valtype::I32);
    let i = scope.alloc_tmp(&format!("#eq_i{uid}"), Valtype::I32);

    out.push(Instr::local_get(l));
    out.extend(comp.ops.i32_to_u());
    out.push(Instr::local_set(lp));
    out.push(Instr::local_get(r));
    out.extend(comp.ops.i32_to_u());
    out.push(Instr::local_set(rp));

    // Same pointer: equal.
    out.push(Instr::local_get(lp));
    out.push(Instr::local_get(rp));
    out.push(Instr::op(Op::I32Eq));
    out.push(Instr::block(Op::If, BlockType::Void));
    out.push(Instr::i32(Op::I32Const, 1));
    out.push(Instr::u32(Op::Br, 2));
    out.push(Instr::op(Op::End));

    // Different lengths: not equal.
    out.push(Instr::local_get(lp));
    out.push(Instr::mem(Op::I32Load, 2, 0));
    out.push(Instr::local_set(ll));
    out.push(Instr::local_get(rp));
    out.push(Instr::mem(Op::I32Load, 2, 0));
    out.push(Instr::local_set(rl));
    out.push(Instr::local_get(ll));
    out.push(Instr::local_get(rl));
    out.push(Instr::op(Op::I32Ne));
    out.push(Instr::block(Op::If, BlockType::Void));
    out.push(Instr::i32(Op::I32Const, 0));
    out.push(Instr::u32(Op::Br, 2));
    out.push(Instr::op(Op::End));

    // Code-unit loop.
    out.push(Instr::i32(Op::I32Const, 0));
    out.push(Instr::local_set(i));
    out.push(Instr::block(Op::Loop, BlockType::Void));

    out.push(Instr::local_get(i));
    out.push(Instr::local_get(ll));
    out.push(Instr::op(Op::I32GeS));
    out.push(Instr::block(Op::If, BlockType::Void));
    out.push(Instr::i32(Op::I32Const, 1));
    out.push(Instr::u32(Op::Br, 3));
    out.push(Instr::op(Op::End));

    out.push(Instr::local_get(lp));
    out.push(Instr::local_get(i));
    out.push(Instr::i32(Op::I32Const, 2));
    out.push(Instr::op(Op::I32Mul));
    out.push(Instr::op(Op::I32Add));
    out.push(Instr::mem(Op::I32Load16U, 1, 4));
    out.push(Instr::local_get(rp));
    out.push(Instr::local_get(i));
    out.push(Instr::i32(Op::I32Const, 2));
    out.push(Instr::op(Op::I32Mul));
    out.push(Instr::op(Op::I32Add));
    out.push(Instr::mem(Op::I32Load16U, 1, 4));
    out.push(Instr::op(Op::I32Ne));
    out.push(Instr::block(Op::If, BlockType::Void));
    out.push(Instr::i32(Op::I32Const, 0));
    out.push(Instr::u32(Op::Br, 3));
    out.push(Instr::op(Op::End));

    out.push(Instr::local_get(i));
    out.push(Instr::i32(Op::I32Const, 1));
    out.push(Instr::op(Op::I32Add));
    out.push(Instr::local_set(i));
    out.push(Instr::u32(Op::Br, 0));
    out.push(Instr::op(Op::End));

    out.push(Instr::op(Op::Unreachable));
}

fn mark_string_only(run: &mut [Instr]) {
    let len = run.len();
    for (i, instr) in run.iter_mut().enumerate() {
        instr.marker = Some(if i == 0 {
            Marker::StringOnlyStart
        } else if i == len - 1 {
            Marker::StringOnlyEnd
        } else {
            Marker::StringOnly
        });
    }
}

/// String concatenation into a fresh page (or a reused target page for
/// compound assignment): store `leftLen + rightLen`, bulk-copy left then
/// right character buffers, push the page pointer.
fn emit_concat(
    comp: &mut Compilation,
    scope: &mut Scope,
    left: &Node,
    right: &Node,
    target_reason: Option<String>,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    let uid = comp.anon_id();
    let reason = match target_reason {
        Some(r) => r,
        None => format!("string:#concat{uid}"),
    };
    let dst = comp.pages.alloc_ptr(&reason, PageKind::String);

    let cl = scope.alloc_tmp(&format!("#concat_l{uid}"), Valtype::I32);
    let cr = scope.alloc_tmp(&format!("#concat_r{uid}"), Valtype::I32);
    let ll = scope.alloc_tmp(&format!("#concat_ll{uid}"), Valtype::I32);
    let rl = scope.alloc_tmp(&format!("#concat_rl{uid}"), Valtype::I32);

    let start = out.len();
    emit_expr(comp, scope, left, out)?;
    out.extend(comp.ops.i32_to_u());
    out.push(Instr::local_set(cl));
    emit_expr(comp, scope, right, out)?;
    out.extend(comp.ops.i32_to_u());
    out.push(Instr::local_set(cr));

    out.push(Instr::local_get(cl));
    out.push(Instr::mem(Op::I32Load, 2, 0));
    out.push(Instr::local_set(ll));
    out.push(Instr::local_get(cr));
    out.push(Instr::mem(Op::I32Load, 2, 0));
    out.push(Instr::local_set(rl));

    // total length
    out.push(Instr::i32(Op::I32Const, dst as i32));
    out.push(Instr::local_get(ll));
    out.push(Instr::local_get(rl));
    out.push(Instr::op(Op::I32Add));
    out.push(Instr::mem(Op::I32Store, 2, 0));

    // copy left characters
    out.push(Instr::i32(Op::I32Const, (dst + 4) as i32));
    out.push(Instr::local_get(cl));
    out.push(Instr::i32(Op::I32Const, 4));
    out.push(Instr::op(Op::I32Add));
    out.push(Instr::local_get(ll));
    out.push(Instr::i32(Op::I32Const, 2));
    out.push(Instr::op(Op::I32Mul));
    out.push(memory_copy());

    // copy right characters after them
    out.push(Instr::i32(Op::I32Const, (dst + 4) as i32));
    out.push(Instr::local_get(ll));
    out.push(Instr::i32(Op::I32Const, 2));
    out.push(Instr::op(Op::I32Mul));
    out.push(Instr::op(Op::I32Add));
    out.push(Instr::local_get(cr));
    out.push(Instr::i32(Op::I32Const, 4));
    out.push(Instr::op(Op::I32Add));
    out.push(Instr::local_get(rl));
    out.push(Instr::i32(Op::I32Const, 2));
    out.push(Instr::op(Op::I32Mul));
    out.push(memory_copy());

    out.push(comp.ops.konst(dst as f64));

    if comp.options.aot_well_formed_string_approx {
        if let Some(first) = out.get_mut(start) {
            first.marker = Some(Marker::WellFormedApprox);
        }
    }
    Ok(())
}

fn memory_copy() -> Instr {
    Instr {
        op: Op::MemoryCopy,
        imms: vec![Imm::U32(0), Imm::U32(0)],
        marker: None,
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Logical operators and predicates
// ══════════════════════════════════════════════════════════════════════════════

fn emit_logical(
    comp: &mut Compilation,
    scope: &mut Scope,
    operator: &str,
    left: &Node,
    right: &Node,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    let (pred, left_on_true) = match operator {
        "||" => (Pred::Truthy, true),
        "&&" => (Pred::Falsy, true),
        "??" => (Pred::Nullish, false),
        other => {
            return Err(CodegenError::Todo(format!(
                "logical operator {other} is not supported"
            )))
        }
    };

    let tmp = scope.alloc_tmp("#logicinner_tmp", comp.ops.valtype);
    emit_expr(comp, scope, left, out)?;
    out.push(Instr::local_set(tmp));

    let mut typ = Vec::new();
    emit_type(comp, scope, left, &mut typ)?;
    emit_pred(comp, scope, vec![Instr::local_get(tmp)], typ, pred, out)?;

    // left branch: reuse the temporary; right branch: evaluate fresh.
    let mut take_left = vec![Instr::local_get(tmp)];
    {
        let mut t = Vec::new();
        emit_type(comp, scope, left, &mut t)?;
        take_left.extend(t);
        take_left.push(Instr::local_set(last_type_local(scope)));
    }
    let mut take_right = Vec::new();
    emit_expr(comp, scope, right, &mut take_right)?;
    {
        let mut t = Vec::new();
        emit_type(comp, scope, right, &mut t)?;
        take_right.extend(t);
        take_right.push(Instr::local_set(last_type_local(scope)));
    }

    out.push(Instr::block(Op::If, BlockType::Val(comp.ops.valtype)));
    if left_on_true {
        out.extend(take_left);
        out.push(Instr::op(Op::Else));
        out.extend(take_right);
    } else {
        out.extend(take_right);
        out.push(Instr::op(Op::Else));
        out.extend(take_left);
    }
    out.push(Instr::op(Op::End));
    Ok(())
}

/// Emit a truthiness predicate over (value, type) instruction sequences,
/// leaving an i32.
///
/// Arrays are always truthy; strings are truthy iff their length is
/// non-zero; everything else tests the payload against zero.  Nullish is
/// true for `undefined` and for the zero-valued `object` (null).
pub fn emit_pred(
    comp: &mut Compilation,
    scope: &mut Scope,
    value: Vec<Instr>,
    typ: Vec<Instr>,
    pred: Pred,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    let mut arms: Vec<(Vec<TypeTag>, Vec<Instr>)> = Vec::new();
    let default;

    match pred {
        Pred::Truthy | Pred::Falsy => {
            let invert = pred == Pred::Falsy;

            arms.push((
                vec![TYPE_ARRAY],
                vec![Instr::i32(Op::I32Const, if invert { 0 } else { 1 })],
            ));

            let mut s = value.clone();
            s.extend(comp.ops.i32_to_u());
            s.push(Instr::mem(Op::I32Load, 2, 0));
            s.push(Instr::op(Op::I32Eqz));
            if !invert {
                s.push(Instr::op(Op::I32Eqz));
            }
            arms.push((vec![TYPE_STRING], s));

            let mut d = value.clone();
            d.extend(comp.ops.eqz());
            if !invert {
                d.push(Instr::op(Op::I32Eqz));
            }
            default = d;
        }
        Pred::Nullish => {
            arms.push((vec![TYPE_UNDEFINED], vec![Instr::i32(Op::I32Const, 1)]));
            let mut o = value.clone();
            o.extend(comp.ops.eqz());
            arms.push((vec![TYPE_OBJECT], o));
            default = vec![Instr::i32(Op::I32Const, 0)];
        }
    }

    let switched = type_switch(
        comp,
        scope,
        typ,
        arms,
        default,
        BlockType::Val(Valtype::I32),
    );
    out.extend(switched);
    Ok(())
}

/// Build a type switch over an i32 tag: either an if-chain or, under
/// `-typeswitch-use-brtable`, a `br_table`.
pub fn type_switch(
    comp: &mut Compilation,
    scope: &mut Scope,
    typ: Vec<Instr>,
    arms: Vec<(Vec<TypeTag>, Vec<Instr>)>,
    default: Vec<Instr>,
    result: BlockType,
) -> Vec<Instr> {
    let tmp = scope.alloc_tmp("#typeswitch_tmp", Valtype::I32);
    let mut out = typ;
    out.push(Instr::local_set(tmp));

    if comp.options.typeswitch_brtable {
        return brtable_switch(tmp, out, arms, default, result);
    }

    for (tags, body) in &arms {
        for (i, tag) in tags.iter().enumerate() {
            out.push(Instr::local_get(tmp));
            out.push(Instr::i32(Op::I32Const, *tag));
            out.push(Instr::op(Op::I32Eq));
            if i > 0 {
                out.push(Instr::op(Op::I32Or));
            }
        }
        out.push(Instr::block(Op::If, result));
        out.extend(body.clone());
        out.push(Instr::op(Op::Else));
    }
    out.extend(default);
    for _ in 0..arms.len() {
        out.push(Instr::op(Op::End));
    }
    out
}

fn brtable_switch(
    tmp: u32,
    mut out: Vec<Instr>,
    arms: Vec<(Vec<TypeTag>, Vec<Instr>)>,
    default: Vec<Instr>,
    result: BlockType,
) -> Vec<Instr> {
    let n = arms.len() as u32;
    let max_tag = *ALL_TYPES.last().unwrap_or(&0);

    out.push(Instr::block(Op::Block, result));
    out.push(Instr::block(Op::Block, BlockType::Void));
    for _ in 0..n {
        out.push(Instr::block(Op::Block, BlockType::Void));
    }

    // Dispatch: tag t jumps to its arm's block, anything else to default.
    out.push(Instr::local_get(tmp));
    let mut table = Vec::with_capacity(max_tag as usize + 2);
    for t in 0..=max_tag {
        let label = arms
            .iter()
            .position(|(tags, _)| tags.contains(&t))
            .map(|i| i as u32)
            .unwrap_or(n);
        table.push(label);
    }
    table.push(n);
    out.push(Instr {
        op: Op::BrTable,
        imms: vec![Imm::Table(table)],
        marker: None,
    });

    for (i, (_, body)) in arms.iter().enumerate() {
        out.push(Instr::op(Op::End));
        out.extend(body.clone());
        out.push(Instr::u32(Op::Br, n - i as u32));
    }
    out.push(Instr::op(Op::End));
    out.extend(default);
    out.push(Instr::op(Op::End));
    out
}

// ══════════════════════════════════════════════════════════════════════════════
// Unary, update, conditional
// ══════════════════════════════════════════════════════════════════════════════

fn emit_unary(
    comp: &mut Compilation,
    scope: &mut Scope,
    operator: &str,
    argument: &Node,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    match operator {
        "+" => emit_expr(comp, scope, argument, out),
        "-" => {
            // Constant-fold literal negation.
            if let Node::Literal {
                value: LitValue::Num(n),
                regex: None,
                ..
            } = argument
            {
                out.push(comp.ops.konst(-n));
                return Ok(());
            }
            emit_expr(comp, scope, argument, out)?;
            out.push(comp.ops.konst(-1.0));
            out.push(comp.ops.mul());
            Ok(())
        }
        "!" => {
            let tmp = scope.alloc_tmp("#logicinner_tmp", comp.ops.valtype);
            emit_expr(comp, scope, argument, out)?;
            out.push(Instr::local_set(tmp));
            let mut typ = Vec::new();
            emit_type(comp, scope, argument, &mut typ)?;
            emit_pred(
                comp,
                scope,
                vec![Instr::local_get(tmp)],
                typ,
                Pred::Falsy,
                out,
            )?;
            out.extend(comp.ops.i32_from());
            Ok(())
        }
        "~" => {
            emit_expr(comp, scope, argument, out)?;
            out.extend(comp.ops.i32_to());
            out.push(Instr::i32(Op::I32Const, -1));
            out.push(Instr::op(Op::I32Xor));
            out.extend(comp.ops.i32_from());
            Ok(())
        }
        "void" => {
            emit_expr(comp, scope, argument, out)?;
            out.push(Instr::op(Op::Drop));
            out.push(comp.ops.konst(UNDEFINED));
            Ok(())
        }
        "typeof" => emit_typeof(comp, scope, argument, out),
        "delete" => {
            match argument {
                Node::Identifier { name, .. } => {
                    let bound = lookup_name(scope, &comp.globals, name).is_some()
                        || comp.builtins.var(name).is_some()
                        || comp.find_func(name).is_some();
                    out.push(comp.ops.konst(if bound { 0.0 } else { 1.0 }));
                    Ok(())
                }
                _ => Err(CodegenError::Todo(
                    "delete of member expressions is not supported".into(),
                )),
            }
        }
        other => Err(CodegenError::Todo(format!(
            "unary operator {other} is not supported"
        ))),
    }
}

fn emit_typeof(
    comp: &mut Compilation,
    scope: &mut Scope,
    argument: &Node,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    // `typeof missing` is "undefined", not a ReferenceError.
    if let Node::Identifier { name, .. } = argument {
        let unbound = lookup_name(scope, &comp.globals, name).is_none()
            && name != "undefined"
            && comp.builtins.var(name).is_none()
            && comp.find_func(name).is_none();
        if unbound {
            make_string(comp, "undefined", None, out);
            return Ok(());
        }
    }

    if let Some(tag) = known_type(comp, scope, argument) {
        let name = typeof_name(tag);
        emit_expr(comp, scope, argument, out)?;
        out.push(Instr::op(Op::Drop));
        make_string(comp, name, None, out);
        return Ok(());
    }

    emit_expr(comp, scope, argument, out)?;
    out.push(Instr::op(Op::Drop));
    let mut typ = Vec::new();
    emit_type(comp, scope, argument, &mut typ)?;

    let mut arms = Vec::new();
    for &tag in ALL_TYPES {
        let mut body = Vec::new();
        make_string(comp, typeof_name(tag), None, &mut body);
        arms.push((vec![tag], body));
    }
    let mut default = Vec::new();
    make_string(comp, "object", None, &mut default);

    let switched = type_switch(
        comp,
        scope,
        typ,
        arms,
        default,
        BlockType::Val(comp.ops.valtype),
    );
    out.extend(switched);
    Ok(())
}

fn emit_update(
    comp: &mut Compilation,
    scope: &mut Scope,
    operator: &str,
    prefix: bool,
    argument: &Node,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    let name = match argument.ident_name() {
        Some(n) => n,
        None => {
            return Err(CodegenError::Todo(
                "update expressions on members are not supported".into(),
            ))
        }
    };
    let (idx, is_global) = match lookup_name(scope, &comp.globals, name) {
        Some((b, g)) => (b.idx, g),
        None => {
            comp.emit_throw(
                scope,
                "ReferenceError",
                &format!("{name} is not defined"),
                out,
            );
            out.push(comp.ops.konst(UNDEFINED));
            return Ok(());
        }
    };

    let get = |i: u32| -> Instr {
        if is_global {
            Instr::global_get(i)
        } else {
            Instr::local_get(i)
        }
    };
    let set = |i: u32| -> Instr {
        if is_global {
            Instr::global_set(i)
        } else {
            Instr::local_set(i)
        }
    };
    let delta = if operator == "++" {
        comp.ops.add()
    } else {
        comp.ops.sub()
    };

    if prefix {
        out.push(get(idx));
        out.push(comp.ops.konst(1.0));
        out.push(delta);
        out.push(set(idx));
        out.push(get(idx));
    } else {
        // Duplicate the original value before mutating.
        out.push(get(idx));
        out.push(get(idx));
        out.push(comp.ops.konst(1.0));
        out.push(delta);
        out.push(set(idx));
    }
    out.push(Instr::i32(Op::I32Const, TYPE_NUMBER));
    out.push(set(idx + 1));
    if !is_global {
        scope.set_metadata(name, Some(TYPE_NUMBER));
    } else {
        comp.globals.set_metadata(name, Some(TYPE_NUMBER));
    }
    Ok(())
}

fn emit_conditional(
    comp: &mut Compilation,
    scope: &mut Scope,
    test: &Node,
    consequent: &Node,
    alternate: &Node,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    emit_condition(comp, scope, test, out)?;
    out.push(Instr::block(Op::If, BlockType::Val(comp.ops.valtype)));
    emit_expr(comp, scope, consequent, out)?;
    let mut t = Vec::new();
    emit_type(comp, scope, consequent, &mut t)?;
    out.extend(t);
    out.push(Instr::local_set(last_type_local(scope)));
    out.push(Instr::op(Op::Else));
    emit_expr(comp, scope, alternate, out)?;
    let mut t = Vec::new();
    emit_type(comp, scope, alternate, &mut t)?;
    out.extend(t);
    out.push(Instr::local_set(last_type_local(scope)));
    out.push(Instr::op(Op::End));
    Ok(())
}

/// Lower `test` to a truthiness i32 for `if`/`while`/`for`/ternary guards.
pub fn emit_condition(
    comp: &mut Compilation,
    scope: &mut Scope,
    test: &Node,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    let tmp = scope.alloc_tmp("#logicinner_tmp", comp.ops.valtype);
    emit_expr(comp, scope, test, out)?;
    out.push(Instr::local_set(tmp));
    let mut typ = Vec::new();
    emit_type(comp, scope, test, &mut typ)?;
    emit_pred(
        comp,
        scope,
        vec![Instr::local_get(tmp)],
        typ,
        Pred::Truthy,
        out,
    )
}

// ══════════════════════════════════════════════════════════════════════════════
// Member access
// ══════════════════════════════════════════════════════════════════════════════

fn emit_member(
    comp: &mut Compilation,
    scope: &mut Scope,
    object: &Node,
    property: &Node,
    computed: bool,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    if !computed && property.ident_name() == Some("length") {
        emit_expr(comp, scope, object, out)?;
        out.extend(comp.ops.i32_to_u());
        out.push(Instr::mem(Op::I32Load, 2, 0));
        out.extend(comp.ops.i32_from_u());
        return Ok(());
    }

    if !computed {
        // The object hack rewrites resolvable member reads away; anything
        // left here is dynamic property lookup on an arbitrary object.
        return Err(CodegenError::Todo(
            "dynamic property lookup is not supported".into(),
        ));
    }

    let elem_size = comp.ops.valtype.size();
    let (align, _) = load_align(comp.ops.valtype);

    match known_type(comp, scope, object) {
        Some(TYPE_ARRAY) => {
            emit_expr(comp, scope, object, out)?;
            out.extend(comp.ops.i32_to_u());
            emit_expr(comp, scope, property, out)?;
            out.extend(comp.ops.i32_to());
            out.push(Instr::i32(Op::I32Const, elem_size as i32));
            out.push(Instr::op(Op::I32Mul));
            out.push(Instr::op(Op::I32Add));
            out.push(comp.ops.load(align, 4));
            Ok(())
        }
        Some(TYPE_STRING) => {
            let uid = comp.anon_id();
            let p = scope.alloc_tmp(&format!("#member_ptr{uid}"), Valtype::I32);
            let i = scope.alloc_tmp(&format!("#member_idx{uid}"), Valtype::I32);
            emit_expr(comp, scope, object, out)?;
            out.extend(comp.ops.i32_to_u());
            out.push(Instr::local_set(p));
            emit_expr(comp, scope, property, out)?;
            out.extend(comp.ops.i32_to());
            out.push(Instr::local_set(i));
            out.extend(char_scratch(comp, p, i));
            Ok(())
        }
        _ => {
            let uid = comp.anon_id();
            let obj = scope.alloc_tmp(&format!("#member_obj{uid}"), comp.ops.valtype);
            let i = scope.alloc_tmp(&format!("#member_idx{uid}"), Valtype::I32);
            let p = scope.alloc_tmp(&format!("#member_ptr{uid}"), Valtype::I32);

            emit_expr(comp, scope, object, out)?;
            out.push(Instr::local_set(obj));
            emit_expr(comp, scope, property, out)?;
            out.extend(comp.ops.i32_to());
            out.push(Instr::local_set(i));

            let mut typ = Vec::new();
            emit_type(comp, scope, object, &mut typ)?;

            let mut array_arm = vec![Instr::local_get(obj)];
            array_arm.extend(comp.ops.i32_to_u());
            array_arm.push(Instr::local_get(i));
            array_arm.push(Instr::i32(Op::I32Const, elem_size as i32));
            array_arm.push(Instr::op(Op::I32Mul));
            array_arm.push(Instr::op(Op::I32Add));
            array_arm.push(comp.ops.load(align, 4));
            array_arm.push(Instr::i32(Op::I32Const, TYPE_NUMBER));
            array_arm.push(Instr::local_set(last_type_local(scope)));

            let mut string_arm = vec![Instr::local_get(obj)];
            string_arm.extend(comp.ops.i32_to_u());
            string_arm.push(Instr::local_set(p));
            string_arm.extend(char_scratch(comp, p, i));
            string_arm.push(Instr::i32(Op::I32Const, TYPE_STRING));
            string_arm.push(Instr::local_set(last_type_local(scope)));

            // Indexing any other type is an impossible state for the value
            // discipline: trap.
            let default = vec![Instr::op(Op::Unreachable)];

            let switched = type_switch(
                comp,
                scope,
                typ,
                vec![
                    (vec![TYPE_ARRAY], array_arm),
                    (vec![TYPE_STRING], string_arm),
                ],
                default,
                BlockType::Val(comp.ops.valtype),
            );
            out.extend(switched);
            Ok(())
        }
    }
}

/// Copy the code unit at `ptr[idx]` into the shared single-char scratch page
/// and push the scratch pointer.
fn char_scratch(comp: &mut Compilation, ptr_local: u32, idx_local: u32) -> Vec<Instr> {
    let scratch = comp.pages.alloc_ptr("string scratch", PageKind::String);
    let mut out = Vec::new();
    out.push(Instr::i32(Op::I32Const, scratch as i32));
    out.push(Instr::i32(Op::I32Const, 1));
    out.push(Instr::mem(Op::I32Store, 2, 0));
    out.push(Instr::i32(Op::I32Const, (scratch + 4) as i32));
    out.push(Instr::local_get(ptr_local));
    out.push(Instr::local_get(idx_local));
    out.push(Instr::i32(Op::I32Const, 2));
    out.push(Instr::op(Op::I32Mul));
    out.push(Instr::op(Op::I32Add));
    out.push(Instr::i32(Op::I32Const, 4));
    out.push(Instr::op(Op::I32Add));
    out.push(Instr::i32(Op::I32Const, 2));
    out.push(memory_copy());
    out.push(comp.ops.konst(scratch as f64));
    out
}

fn load_align(valtype: Valtype) -> (u32, u32) {
    match valtype {
        Valtype::I32 => (2, 4),
        Valtype::I64 | Valtype::F64 => (3, 8),
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Literals with pages
// ══════════════════════════════════════════════════════════════════════════════

/// Push a string literal: allocate its page, emit the contents into the data
/// section once, push the page pointer.
pub fn make_string(
    comp: &mut Compilation,
    s: &str,
    name_hint: Option<&str>,
    out: &mut Vec<Instr>,
) {
    let mut reason = match name_hint {
        Some(n) => format!("string:{n}"),
        None => format!("string:{s}"),
    };
    // A rebound name keeps its original page; the new literal gets a
    // content-keyed one.
    if name_hint.is_some() && comp.pages.get(&reason).is_some() {
        reason = format!("string:{s}");
    }
    let fresh = comp.pages.get(&reason).is_none();
    let ptr = comp.pages.alloc_ptr(&reason, PageKind::String);
    if fresh {
        let units: Vec<u16> = s.encode_utf16().collect();
        let mut bytes = Vec::with_capacity(4 + units.len() * 2);
        bytes.extend_from_slice(&crate::encode::u32_le(units.len() as u32));
        for u in units {
            bytes.extend_from_slice(&crate::encode::u16_le(u));
        }
        comp.data.push(Data { offset: ptr, bytes });
    }
    if let Some(n) = name_hint {
        comp.arrays.insert(n.to_string(), ptr);
    }
    out.push(comp.ops.konst(ptr as f64));
}

/// Push an array literal.  All-constant contents go straight into the data
/// section; anything else stores the length and each element in turn.
pub fn make_array(
    comp: &mut Compilation,
    scope: &mut Scope,
    elements: &[Option<Node>],
    name_hint: Option<&str>,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    let mut reason = match name_hint {
        Some(n) => format!("array:{n}"),
        None => format!("array:#anon{}", comp.anon_id()),
    };
    if name_hint.is_some() && comp.pages.get(&reason).is_some() {
        reason = format!("array:#anon{}", comp.anon_id());
    }
    let ptr = comp.pages.alloc_ptr(&reason, PageKind::Array);
    if let Some(n) = name_hint {
        comp.arrays.insert(n.to_string(), ptr);
    }

    let len = elements.len() as u32;
    let const_values: Option<Vec<f64>> = elements
        .iter()
        .map(|e| match e {
            None => Some(UNDEFINED),
            Some(Node::Literal {
                value,
                regex: None,
                ..
            }) => match value {
                LitValue::Num(n) => Some(*n),
                LitValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                LitValue::Null => Some(NULL),
                LitValue::Str(_) => None,
            },
            _ => None,
        })
        .collect();

    if let Some(values) = const_values {
        let mut bytes = Vec::with_capacity(4 + values.len() * 8);
        bytes.extend_from_slice(&crate::encode::u32_le(len));
        for v in values {
            match comp.ops.valtype {
                Valtype::I32 => bytes.extend_from_slice(&(v as i32).to_le_bytes()),
                Valtype::I64 => bytes.extend_from_slice(&crate::encode::i64_le(v as i64)),
                Valtype::F64 => bytes.extend_from_slice(&crate::encode::ieee754_f64(v)),
            }
        }
        comp.data.push(Data { offset: ptr, bytes });
        out.push(comp.ops.konst(ptr as f64));
        return Ok(());
    }

    let elem_size = comp.ops.valtype.size();
    let (align, _) = load_align(comp.ops.valtype);

    out.push(Instr::i32(Op::I32Const, ptr as i32));
    out.push(Instr::i32(Op::I32Const, len as i32));
    out.push(Instr::mem(Op::I32Store, 2, 0));
    for (i, e) in elements.iter().enumerate() {
        out.push(Instr::i32(Op::I32Const, ptr as i32));
        match e {
            Some(n) => emit_expr(comp, scope, n, out)?,
            None => out.push(comp.ops.konst(UNDEFINED)),
        }
        out.push(comp.ops.store(align, 4 + i as u32 * elem_size));
    }
    out.push(comp.ops.konst(ptr as f64));
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
// Calls
// ══════════════════════════════════════════════════════════════════════════════

fn emit_call(
    comp: &mut Compilation,
    scope: &mut Scope,
    callee: &Node,
    arguments: &[Node],
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    if let Some(name) = callee.ident_name() {
        let name = name.to_string();
        return emit_named_call(comp, scope, &name, arguments, out);
    }

    if let Node::MemberExpression {
        object,
        property,
        computed: false,
        ..
    } = callee
    {
        let method = match property.ident_name() {
            Some(m) => m.to_string(),
            None => {
                return Err(CodegenError::Todo(
                    "computed method calls are not supported".into(),
                ))
            }
        };
        if let Node::Literal {
            regex: Some(regex), ..
        } = &**object
        {
            let regex = regex.clone();
            return emit_regex_call(comp, scope, &regex.pattern, &regex.flags, arguments, out);
        }
        return emit_proto_call(comp, scope, object, &method, arguments, out);
    }

    Err(CodegenError::Todo(
        "calling a computed expression is not supported".into(),
    ))
}

fn emit_named_call(
    comp: &mut Compilation,
    scope: &mut Scope,
    name: &str,
    arguments: &[Node],
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    if name == "eval" {
        return emit_eval(comp, scope, arguments, out);
    }

    // 1. user (or already-included) functions
    if let Some(f) = comp.find_func(name) {
        let index = f.index;
        return emit_call_to(comp, scope, index, arguments, out);
    }

    // 2. imported functions
    if let Some(i) = comp.find_import(name) {
        let params = comp.imports[i as usize].params.clone();
        for (pi, param) in params.iter().enumerate() {
            match arguments.get(pi) {
                Some(a) => {
                    emit_expr(comp, scope, a, out)?;
                    convert_payload(comp, *param, out)?;
                }
                None => out.push(comp.ops.konst(UNDEFINED)),
            }
        }
        out.push(Instr::call(i as i32));
        out.push(comp.ops.konst(UNDEFINED));
        return Ok(());
    }

    // 3. built-in functions
    if comp.builtins.func(name).is_some() {
        let index = comp.include_builtin(name)?;
        return emit_call_to(comp, scope, index, arguments, out);
    }

    // 4. internal constructors
    if let Some((ctor, _)) = internal_ctor(name) {
        return emit_ctor(comp, scope, ctor, arguments, None, out);
    }

    // 5. prototype dispatch through the member-sentinel spelling
    if let Some((recv, method)) = split_proto_name(name) {
        let recv = recv.to_string();
        let method = method.to_string();
        if lookup_name(scope, &comp.globals, &recv).is_some()
            && !comp.builtins.proto_candidates(&method).is_empty()
        {
            let receiver = Node::ident(recv);
            return emit_proto_call(comp, scope, &receiver, &method, arguments, out);
        }
    }

    // 6. self-recursion placeholder
    if name == scope.name {
        let pairs = scope.params.len() / 2;
        for i in 0..pairs {
            match arguments.get(i) {
                Some(a) => {
                    emit_expr(comp, scope, a, out)?;
                    emit_type(comp, scope, a, out)?;
                }
                None => {
                    out.push(comp.ops.konst(UNDEFINED));
                    out.push(Instr::i32(Op::I32Const, TYPE_UNDEFINED));
                }
            }
        }
        out.push(Instr::call(-1));
        out.push(Instr::local_set(last_type_local(scope)));
        return Ok(());
    }

    // 7. bound but not callable / 8. unbound
    if name.starts_with("__") {
        // A rewritten member spelling with no registered target: calling a
        // missing property.
        comp.emit_throw(
            scope,
            "TypeError",
            &format!("{name} is not a function"),
            out,
        );
        out.push(comp.ops.konst(UNDEFINED));
        return Ok(());
    }
    if lookup_name(scope, &comp.globals, name).is_some() {
        comp.emit_throw(
            scope,
            "TypeError",
            &format!("{name} is not a function"),
            out,
        );
    } else {
        comp.emit_throw(
            scope,
            "ReferenceError",
            &format!("{name} is not defined"),
            out,
        );
    }
    out.push(comp.ops.konst(UNDEFINED));
    Ok(())
}

/// Call a function record by absolute index with argument normalization.
fn emit_call_to(
    comp: &mut Compilation,
    scope: &mut Scope,
    index: u32,
    arguments: &[Node],
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    let import_count = comp.import_count();
    let f = &comp.funcs[(index - import_count) as usize];
    let internal = f.internal;
    let params = f.params.clone();
    let returns = f.returns.len();
    let throws = f.throws;

    if internal {
        // asm-intrinsic convention: unpaired payload parameters.
        for (i, param) in params.iter().enumerate() {
            match arguments.get(i) {
                Some(a) => {
                    emit_expr(comp, scope, a, out)?;
                    convert_payload(comp, *param, out)?;
                }
                None => out.push(comp.ops.konst(UNDEFINED)),
            }
        }
    } else {
        let pairs = params.len() / 2;
        for i in 0..pairs {
            match arguments.get(i) {
                Some(a) => {
                    emit_expr(comp, scope, a, out)?;
                    emit_type(comp, scope, a, out)?;
                }
                None => {
                    out.push(comp.ops.konst(UNDEFINED));
                    out.push(Instr::i32(Op::I32Const, TYPE_UNDEFINED));
                }
            }
        }
    }

    out.push(Instr::call(index as i32));
    match returns {
        2 => out.push(Instr::local_set(last_type_local(scope))),
        1 => {}
        _ => out.push(comp.ops.konst(UNDEFINED)),
    }
    if throws {
        scope.throws = true;
    }
    Ok(())
}

/// Convert a payload on the stack to a parameter valtype.
fn convert_payload(comp: &Compilation, target: Valtype, out: &mut Vec<Instr>) -> CodegenResult<()> {
    if target == comp.ops.valtype {
        return Ok(());
    }
    match target {
        Valtype::I32 => {
            out.extend(comp.ops.i32_to());
            Ok(())
        }
        _ => Err(CodegenError::Internal(format!(
            "cannot convert payload to parameter type {}",
            target.name()
        ))),
    }
}

/// Split a `__recv_method` spelling produced by the object hack.
fn split_proto_name(name: &str) -> Option<(&str, &str)> {
    let rest = name.strip_prefix("__")?;
    let (recv, method) = rest.rsplit_once('_')?;
    if recv.is_empty() || method.is_empty() {
        return None;
    }
    Some((recv, method))
}

fn emit_proto_call(
    comp: &mut Compilation,
    scope: &mut Scope,
    receiver: &Node,
    method: &str,
    arguments: &[Node],
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    let candidates = comp.builtins.proto_candidates(method);
    if candidates.is_empty() {
        comp.emit_throw(
            scope,
            "TypeError",
            &format!("{method} is not a function"),
            out,
        );
        out.push(comp.ops.konst(UNDEFINED));
        set_last_type_const(scope, TYPE_UNDEFINED, out);
        return Ok(());
    }

    let recv_tmp = {
        let uid = comp.anon_id();
        scope.alloc_tmp(&format!("#proto_recv{uid}"), comp.ops.valtype)
    };
    emit_expr(comp, scope, receiver, out)?;
    out.push(Instr::local_set(recv_tmp));

    let mut args = Vec::with_capacity(arguments.len());
    for a in arguments {
        let mut buf = Vec::new();
        emit_expr(comp, scope, a, &mut buf)?;
        args.push(buf);
    }

    let mut pointer = vec![Instr::local_get(recv_tmp)];
    pointer.extend(comp.ops.i32_to_u());

    let known = known_type(comp, scope, receiver);
    if let Some(tag) = known {
        let entry = match candidates.iter().find(|(t, _)| *t == tag) {
            Some((_, e)) => *e,
            None => {
                comp.emit_throw(
                    scope,
                    "TypeError",
                    &format!("{method} is not a function"),
                    out,
                );
                out.push(comp.ops.konst(UNDEFINED));
                set_last_type_const(scope, TYPE_UNDEFINED, out);
                return Ok(());
            }
        };
        let body = run_proto_gen(comp, scope, entry.gen, &pointer, &args, tag)?;
        out.extend(body);
        return Ok(());
    }

    let mut typ = Vec::new();
    emit_type(comp, scope, receiver, &mut typ)?;

    let mut arms = Vec::new();
    for (tag, entry) in &candidates {
        let mut body = run_proto_gen(comp, scope, entry.gen, &pointer, &args, *tag)?;
        if let Some(rt) = entry.return_type {
            set_last_type_const(scope, rt, &mut body);
        }
        arms.push((vec![*tag], body));
    }

    let mut default = Vec::new();
    comp.emit_throw(
        scope,
        "TypeError",
        &format!("{method} is not a function"),
        &mut default,
    );
    default.push(comp.ops.konst(UNDEFINED));
    set_last_type_const(scope, TYPE_UNDEFINED, &mut default);

    let switched = type_switch(
        comp,
        scope,
        typ,
        arms,
        default,
        BlockType::Val(comp.ops.valtype),
    );
    out.extend(switched);
    Ok(())
}

fn run_proto_gen(
    comp: &mut Compilation,
    scope: &mut Scope,
    gen: crate::builtins::ProtoGen,
    pointer: &[Instr],
    args: &[Vec<Instr>],
    tag: TypeTag,
) -> CodegenResult<Vec<Instr>> {
    let uid = comp.anon_id();
    let length = LengthCache {
        local: scope.alloc_tmp(&format!("#proto_len{uid}"), Valtype::I32),
    };
    let elem_size = if tag == TYPE_STRING {
        2
    } else {
        comp.ops.valtype.size()
    };
    let ops = comp.ops;
    let mut ctx = ProtoCtx {
        pointer: pointer.to_vec(),
        args: args.to_vec(),
        length,
        scope,
        pages: &mut comp.pages,
        ops,
        elem_size,
        uid,
    };
    gen(&mut ctx)
}

fn emit_regex_call(
    comp: &mut Compilation,
    scope: &mut Scope,
    pattern: &str,
    flags: &str,
    arguments: &[Node],
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    let index = comp.include_regex(pattern, flags)?;
    let return_type = comp.funcs[(index - comp.import_count()) as usize].return_type;
    match arguments.first() {
        Some(a) => emit_expr(comp, scope, a, out)?,
        None => out.push(comp.ops.konst(UNDEFINED)),
    }
    out.push(Instr::call(index as i32));
    if let Some(rt) = return_type {
        set_last_type_const(scope, rt, out);
    }
    Ok(())
}

fn emit_eval(
    comp: &mut Compilation,
    scope: &mut Scope,
    arguments: &[Node],
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    let source = match arguments.first() {
        Some(Node::Literal {
            value: LitValue::Str(s),
            regex: None,
            ..
        }) => s.clone(),
        _ => {
            // Only literal-string eval is supported.
            comp.emit_throw(scope, "ReferenceError", "eval is not supported", out);
            out.push(comp.ops.konst(UNDEFINED));
            set_last_type_const(scope, TYPE_UNDEFINED, out);
            return Ok(());
        }
    };

    let parser = comp.options.eval_parser.ok_or_else(|| {
        CodegenError::Todo("eval of a string literal requires a registered parser".into())
    })?;
    let parsed = parser(&source).map_err(CodegenError::Parse)?;
    let body = match parsed {
        Node::Program { body } | Node::BlockStatement { body } => body,
        other => vec![other],
    };

    // Lower inline as a block, keeping the final expression's value and type.
    if let Some((last, rest)) = body.split_last() {
        for s in rest {
            stmt::emit_stmt_dropped(comp, scope, s, out)?;
        }
        if let Node::ExpressionStatement { expression } = last {
            emit_expr(comp, scope, expression, out)?;
            emit_type(comp, scope, expression, out)?;
            out.push(Instr::local_set(last_type_local(scope)));
            return Ok(());
        }
        stmt::emit_stmt_dropped(comp, scope, last, out)?;
    }
    out.push(comp.ops.konst(UNDEFINED));
    set_last_type_const(scope, TYPE_UNDEFINED, out);
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
// new / constructors
// ══════════════════════════════════════════════════════════════════════════════

fn emit_new(
    comp: &mut Compilation,
    scope: &mut Scope,
    callee: &Node,
    arguments: &[Node],
    name_hint: Option<&str>,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    let name = callee
        .ident_name()
        .ok_or_else(|| CodegenError::Todo("computed constructors are not supported".into()))?;
    match internal_ctor(name) {
        Some((ctor, _)) => emit_ctor(comp, scope, ctor, arguments, name_hint, out),
        None => Err(CodegenError::Todo(format!(
            "constructor {name} is not supported"
        ))),
    }
}

pub(crate) fn emit_ctor(
    comp: &mut Compilation,
    scope: &mut Scope,
    ctor: InternalCtor,
    arguments: &[Node],
    name_hint: Option<&str>,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    match ctor {
        InternalCtor::Array => {
            let reason = match name_hint {
                Some(n) => format!("array:{n}"),
                None => format!("array:#anon{}", comp.anon_id()),
            };
            let ptr = comp.pages.alloc_ptr(&reason, PageKind::Array);
            if let Some(n) = name_hint {
                comp.arrays.insert(n.to_string(), ptr);
            }

            match arguments.first() {
                None => {
                    out.push(Instr::i32(Op::I32Const, ptr as i32));
                    out.push(Instr::i32(Op::I32Const, 0));
                    out.push(Instr::mem(Op::I32Store, 2, 0));
                }
                Some(Node::Literal {
                    value: LitValue::Num(n),
                    regex: None,
                    ..
                }) => {
                    if *n < 0.0 || !n.is_finite() || *n > u32::MAX as f64 {
                        comp.emit_throw(scope, "RangeError", "Invalid array length", out);
                        out.push(comp.ops.konst(UNDEFINED));
                        return Ok(());
                    }
                    out.push(Instr::i32(Op::I32Const, ptr as i32));
                    out.push(Instr::i32(Op::I32Const, *n as u32 as i32));
                    out.push(Instr::mem(Op::I32Store, 2, 0));
                }
                Some(len) => {
                    out.push(Instr::i32(Op::I32Const, ptr as i32));
                    emit_expr(comp, scope, len, out)?;
                    out.extend(comp.ops.i32_to_u());
                    out.push(Instr::mem(Op::I32Store, 2, 0));
                }
            }
            out.push(comp.ops.konst(ptr as f64));
            Ok(())
        }
        InternalCtor::ArrayOf => {
            let elements: Vec<Option<Node>> = arguments.iter().cloned().map(Some).collect();
            make_array(comp, scope, &elements, name_hint, out)
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Assignment
// ══════════════════════════════════════════════════════════════════════════════

fn emit_assign(
    comp: &mut Compilation,
    scope: &mut Scope,
    operator: &str,
    left: &Node,
    right: &Node,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    match left {
        Node::Identifier { name, .. } => {
            let name = name.clone();
            emit_assign_ident(comp, scope, operator, &name, right, out)
        }
        Node::MemberExpression {
            object,
            property,
            computed,
            ..
        } => {
            if operator != "=" {
                return Err(CodegenError::Todo(
                    "compound assignment to members is not supported".into(),
                ));
            }
            if !computed && property.ident_name() == Some("length") {
                return emit_assign_length(comp, scope, object, right, out);
            }
            if *computed {
                return emit_assign_index(comp, scope, object, property, right, out);
            }
            Err(CodegenError::Todo(
                "assignment to arbitrary properties is not supported".into(),
            ))
        }
        Node::ObjectPattern { .. } => {
            // Ignored by design: evaluate the right side, bind nothing.
            emit_expr(comp, scope, right, out)
        }
        _ => Err(CodegenError::Todo(
            "unsupported assignment target".into(),
        )),
    }
}

fn emit_assign_ident(
    comp: &mut Compilation,
    scope: &mut Scope,
    operator: &str,
    name: &str,
    right: &Node,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    // Assignment to an undeclared name creates a module global.
    if lookup_name(scope, &comp.globals, name).is_none() {
        comp.globals.alloc_var(name, comp.ops.valtype);
    }
    let (idx, is_global) = match lookup_name(scope, &comp.globals, name) {
        Some((b, g)) => (b.idx, g),
        None => return Err(CodegenError::Internal(format!("missing binding {name}"))),
    };

    // Value and its type instructions.
    let mut value = Vec::new();
    let mut typ = Vec::new();
    let result_type: Option<TypeTag>;

    match operator {
        "=" => {
            emit_expr_named(comp, scope, right, Some(name), &mut value)?;
            emit_type(comp, scope, right, &mut typ)?;
            result_type = known_type(comp, scope, right);
        }
        "||=" | "&&=" | "??=" => {
            let op = &operator[..operator.len() - 1];
            let lhs = Node::ident(name);
            emit_logical(comp, scope, op, &lhs, right, &mut value)?;
            typ.push(Instr::local_get(last_type_local(scope)));
            result_type = merge_types(
                known_type(comp, scope, &lhs),
                known_type(comp, scope, right),
            );
        }
        _ => {
            let op = operator.strip_suffix('=').unwrap_or(operator);
            let lhs = Node::ident(name);
            let lk = known_type(comp, scope, &lhs);
            let rk = known_type(comp, scope, right);
            if op == "+" && (lk == Some(TYPE_STRING) || rk == Some(TYPE_STRING)) {
                // Reuse the target's page when it owns one.
                let target = comp
                    .arrays
                    .contains_key(name)
                    .then(|| format!("string:{name}"));
                emit_concat(comp, scope, &lhs, right, target, &mut value)?;
                typ.push(Instr::i32(Op::I32Const, TYPE_STRING));
                result_type = Some(TYPE_STRING);
            } else {
                emit_binary(comp, scope, op, &lhs, right, &mut value)?;
                let rt = binary_result_type(op, lk, rk);
                typ.push(Instr::i32(Op::I32Const, rt));
                result_type = Some(rt);
            }
        }
    }

    out.extend(value);
    if is_global {
        out.push(Instr::global_set(idx));
        out.extend(typ);
        out.push(Instr::global_set(idx + 1));
        out.push(Instr::global_get(idx));
    } else {
        out.push(Instr::local_tee(idx));
        out.extend(typ);
        out.push(Instr::local_set(idx + 1));
    }

    // Keep metadata only while it stays consistent.
    let target = if is_global { &mut comp.globals } else { scope };
    let current = target.lookup(name).and_then(|b| b.metadata);
    if current != result_type {
        target.set_metadata(name, None);
    }
    Ok(())
}

fn emit_assign_length(
    comp: &mut Compilation,
    scope: &mut Scope,
    object: &Node,
    right: &Node,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    let uid = comp.anon_id();
    let v = scope.alloc_tmp(&format!("#assign_tmp{uid}"), comp.ops.valtype);
    emit_expr(comp, scope, right, out)?;
    out.push(Instr::local_set(v));
    emit_expr(comp, scope, object, out)?;
    out.extend(comp.ops.i32_to_u());
    out.push(Instr::local_get(v));
    out.extend(comp.ops.i32_to_u());
    out.push(Instr::mem(Op::I32Store, 2, 0));
    // Assignments evaluate to the assigned value.
    out.push(Instr::local_get(v));
    set_last_type_const(scope, TYPE_NUMBER, out);
    Ok(())
}

fn emit_assign_index(
    comp: &mut Compilation,
    scope: &mut Scope,
    object: &Node,
    property: &Node,
    right: &Node,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    let elem_size = comp.ops.valtype.size();
    let (align, _) = load_align(comp.ops.valtype);
    let uid = comp.anon_id();
    let i = scope.alloc_tmp(&format!("#assign_idx{uid}"), Valtype::I32);
    let v = scope.alloc_tmp(&format!("#assign_tmp{uid}"), comp.ops.valtype);

    if known_type(comp, scope, object) == Some(TYPE_ARRAY) {
        let p = scope.alloc_tmp(&format!("#assign_ptr{uid}"), Valtype::I32);
        emit_expr(comp, scope, object, out)?;
        out.extend(comp.ops.i32_to_u());
        out.push(Instr::local_set(p));
        emit_expr(comp, scope, property, out)?;
        out.extend(comp.ops.i32_to());
        out.push(Instr::local_set(i));
        emit_expr(comp, scope, right, out)?;
        out.push(Instr::local_set(v));

        out.push(Instr::local_get(p));
        out.push(Instr::local_get(i));
        out.push(Instr::i32(Op::I32Const, elem_size as i32));
        out.push(Instr::op(Op::I32Mul));
        out.push(Instr::op(Op::I32Add));
        out.push(Instr::local_get(v));
        out.push(comp.ops.store(align, 4));
        out.push(Instr::local_get(v));
        let mut t = Vec::new();
        emit_type(comp, scope, right, &mut t)?;
        out.extend(t);
        out.push(Instr::local_set(last_type_local(scope)));
        return Ok(());
    }

    let obj = scope.alloc_tmp(&format!("#assign_obj{uid}"), comp.ops.valtype);
    emit_expr(comp, scope, object, out)?;
    out.push(Instr::local_set(obj));
    emit_expr(comp, scope, property, out)?;
    out.extend(comp.ops.i32_to());
    out.push(Instr::local_set(i));
    emit_expr(comp, scope, right, out)?;
    out.push(Instr::local_set(v));

    let mut typ = Vec::new();
    emit_type(comp, scope, object, &mut typ)?;

    let mut array_arm = vec![Instr::local_get(obj)];
    array_arm.extend(comp.ops.i32_to_u());
    array_arm.push(Instr::local_get(i));
    array_arm.push(Instr::i32(Op::I32Const, elem_size as i32));
    array_arm.push(Instr::op(Op::I32Mul));
    array_arm.push(Instr::op(Op::I32Add));
    array_arm.push(Instr::local_get(v));
    array_arm.push(comp.ops.store(align, 4));
    array_arm.push(Instr::local_get(v));

    let mut default = Vec::new();
    comp.emit_throw(
        scope,
        "TypeError",
        "can only assign to elements of arrays",
        &mut default,
    );
    default.push(comp.ops.konst(UNDEFINED));

    let switched = type_switch(
        comp,
        scope,
        typ,
        vec![(vec![TYPE_ARRAY], array_arm)],
        default,
        BlockType::Val(comp.ops.valtype),
    );
    out.extend(switched);

    let mut t = Vec::new();
    emit_type(comp, scope, right, &mut t)?;
    out.extend(t);
    out.push(Instr::local_set(last_type_local(scope)));
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
// Function expressions, template tags
// ══════════════════════════════════════════════════════════════════════════════

#[allow(clippy::too_many_arguments)]
fn emit_func_expr(
    comp: &mut Compilation,
    name: Option<&str>,
    params: &[Node],
    body: &Node,
    is_async: bool,
    generator: bool,
    arrow_expr: bool,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    if generator {
        return Err(CodegenError::Todo(
            "generator functions are not supported".into(),
        ));
    }
    if is_async {
        return Err(CodegenError::Todo(
            "async functions are not supported".into(),
        ));
    }
    let name = match name {
        Some(n) => n.to_string(),
        None => format!("#anonymous{}", comp.anon_id()),
    };
    let index = crate::func::emit_function(comp, &name, params, body, false, arrow_expr)?;
    out.push(comp.ops.konst(index as f64));
    Ok(())
}

fn emit_tagged(
    comp: &mut Compilation,
    scope: &mut Scope,
    tag: &Node,
    quasi: &Node,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    match tag.ident_name() {
        Some("asm") => crate::asm::emit_asm(comp, scope, quasi, out),
        Some("__internal_print_type") => {
            let arg = match quasi {
                Node::TemplateLiteral { expressions, .. } => expressions.first().cloned(),
                _ => None,
            };
            let arg = arg.ok_or_else(|| {
                CodegenError::Todo("__internal_print_type requires one substitution".into())
            })?;
            emit_type(comp, scope, &arg, out)?;
            out.extend(comp.ops.i32_from());
            let print = comp
                .find_import("print")
                .ok_or_else(|| CodegenError::Internal("missing print import".into()))?;
            out.push(Instr::call(print as i32));
            let print_char = comp
                .find_import("printChar")
                .ok_or_else(|| CodegenError::Internal("missing printChar import".into()))?;
            out.push(Instr::i32(Op::I32Const, '\n' as i32));
            out.push(Instr::call(print_char as i32));
            out.push(comp.ops.konst(UNDEFINED));
            Ok(())
        }
        _ => Err(CodegenError::Todo(
            "tagged templates besides asm are not supported".into(),
        )),
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Small helpers
// ══════════════════════════════════════════════════════════════════════════════

/// The `#last_type` temporary of this scope.
pub fn last_type_local(scope: &mut Scope) -> u32 {
    scope.alloc_tmp("#last_type", Valtype::I32)
}

fn push_last_type(scope: &mut Scope, out: &mut Vec<Instr>) {
    out.push(Instr::local_get(last_type_local(scope)));
}

/// `[i32.const tag, local.set #last_type]`.
pub fn set_last_type_const(scope: &mut Scope, tag: TypeTag, out: &mut Vec<Instr>) {
    out.push(Instr::i32(Op::I32Const, tag));
    out.push(Instr::local_set(last_type_local(scope)));
}

fn template_text(quasis: &[Node]) -> String {
    let mut s = String::new();
    for q in quasis {
        if let Node::TemplateElement { value, .. } = q {
            match &value.cooked {
                Some(c) => s.push_str(c),
                None => s.push_str(&value.raw),
            }
        }
    }
    s
}

fn node_kind(node: &Node) -> &'static str {
    match node {
        Node::Program { .. } => "Program",
        Node::BlockStatement { .. } => "BlockStatement",
        Node::ExpressionStatement { .. } => "ExpressionStatement",
        Node::VariableDeclaration { .. } => "VariableDeclaration",
        Node::VariableDeclarator { .. } => "VariableDeclarator",
        Node::FunctionDeclaration { .. } => "FunctionDeclaration",
        Node::ReturnStatement { .. } => "ReturnStatement",
        Node::IfStatement { .. } => "IfStatement",
        Node::ForStatement { .. } => "ForStatement",
        Node::WhileStatement { .. } => "WhileStatement",
        Node::ForOfStatement { .. } => "ForOfStatement",
        Node::BreakStatement { .. } => "BreakStatement",
        Node::ContinueStatement { .. } => "ContinueStatement",
        Node::TryStatement { .. } => "TryStatement",
        Node::CatchClause { .. } => "CatchClause",
        Node::ThrowStatement { .. } => "ThrowStatement",
        Node::ExportNamedDeclaration { .. } => "ExportNamedDeclaration",
        Node::TemplateLiteral { .. } => "TemplateLiteral",
        Node::TemplateElement { .. } => "TemplateElement",
        Node::ObjectPattern { .. } => "ObjectPattern",
        _ => "node",
    }
}
