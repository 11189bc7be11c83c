//! Statement lowering.
//!
//! Statements leave nothing on the stack except expression statements, which
//! leave a (payload, type-tag) pair for the trailing-drop policy to consume
//! — or to flow into the implicit return when they end `main`.  Control flow
//! uses `block`/`loop`/`br`/`br_if`; every open construct is recorded on the
//! compilation's depth stack so `break`/`continue` can compute branch depths.

use tarn_types::{LitValue, Node};

use crate::compiler::{Compilation, DepthKind};
use crate::error::{CodegenError, CodegenResult};
use crate::expr::{
    emit_condition, emit_expr, emit_expr_named, emit_type, known_type, type_switch,
};
use crate::func;
use crate::op::{BlockType, Instr, Op};
use crate::scope::Scope;
use crate::types::{
    TypeTag, Valtype, TYPE_NUMBER, TYPE_STRING, TYPE_UNDEFINED, UNDEFINED,
};

/// Lower one statement.  Expression statements leave a value/type pair;
/// everything else is balanced.
pub fn emit_stmt(
    comp: &mut Compilation,
    scope: &mut Scope,
    node: &Node,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    match node {
        Node::ExpressionStatement { expression } => {
            emit_expr(comp, scope, expression, out)?;
            emit_type(comp, scope, expression, out)
        }
        Node::BlockStatement { body } => emit_block_items(comp, scope, body, out, false),
        Node::VariableDeclaration { declarations, .. } => {
            for d in declarations {
                emit_declarator(comp, scope, d, out)?;
            }
            Ok(())
        }
        Node::FunctionDeclaration {
            id,
            params,
            body,
            generator,
            is_async,
        } => {
            if *generator {
                return Err(CodegenError::Todo(
                    "generator functions are not supported".into(),
                ));
            }
            if *is_async {
                return Err(CodegenError::Todo("async functions are not supported".into()));
            }
            let name = id
                .as_deref()
                .and_then(Node::ident_name)
                .ok_or_else(|| {
                    CodegenError::Todo("function declarations need a name".into())
                })?
                .to_string();
            func::emit_function(comp, &name, params, body, false, false)?;
            Ok(())
        }
        Node::ExportNamedDeclaration { declaration } => match declaration.as_deref() {
            Some(Node::FunctionDeclaration {
                id,
                params,
                body,
                generator,
                is_async,
            }) => {
                if *generator {
                    return Err(CodegenError::Todo(
                        "generator functions are not supported".into(),
                    ));
                }
                if *is_async {
                    return Err(CodegenError::Todo(
                        "async functions are not supported".into(),
                    ));
                }
                let name = id
                    .as_deref()
                    .and_then(Node::ident_name)
                    .ok_or_else(|| {
                        CodegenError::Todo("function declarations need a name".into())
                    })?
                    .to_string();
                func::emit_function(comp, &name, params, body, true, false)?;
                Ok(())
            }
            Some(decl) => emit_stmt(comp, scope, decl, out),
            None => Ok(()),
        },
        Node::ReturnStatement { argument } => emit_return(comp, scope, argument.as_deref(), out),
        Node::IfStatement {
            test,
            consequent,
            alternate,
        } => emit_if(comp, scope, test, consequent, alternate.as_deref(), out),
        Node::WhileStatement { test, body } => emit_while(comp, scope, test, body, out),
        Node::ForStatement {
            init,
            test,
            update,
            body,
        } => emit_for(
            comp,
            scope,
            init.as_deref(),
            test.as_deref(),
            update.as_deref(),
            body,
            out,
        ),
        Node::ForOfStatement { left, right, body } => {
            emit_forof(comp, scope, left, right, body, out)
        }
        Node::BreakStatement { label } => {
            if label.is_some() {
                return Err(CodegenError::Todo("labeled break is not supported".into()));
            }
            emit_break(comp, out)
        }
        Node::ContinueStatement { label } => {
            if label.is_some() {
                return Err(CodegenError::Todo(
                    "labeled continue is not supported".into(),
                ));
            }
            emit_continue(comp, out)
        }
        Node::ThrowStatement { argument } => emit_throw_stmt(comp, scope, argument, out),
        Node::TryStatement {
            block,
            handler,
            finalizer,
        } => emit_try(comp, scope, block, handler.as_deref(), finalizer.as_deref(), out),
        Node::EmptyStatement {} | Node::DebuggerStatement {} | Node::Unknown => Ok(()),
        Node::TSTypeAnnotation { .. }
        | Node::TSNumberKeyword {}
        | Node::TSStringKeyword {}
        | Node::TSBooleanKeyword {}
        | Node::TSAnyKeyword {} => Ok(()),
        // Bare expressions appear in for-init/update position.
        expr => {
            emit_expr(comp, scope, expr, out)?;
            emit_type(comp, scope, expr, out)
        }
    }
}

/// Lower a statement and drop whatever it left on the stack.
pub fn emit_stmt_dropped(
    comp: &mut Compilation,
    scope: &mut Scope,
    node: &Node,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    let start = out.len();
    emit_stmt(comp, scope, node, out)?;
    let leftover = func::count_leftover(comp, &out[start..], Some(scope));
    for _ in 0..leftover.max(0) {
        out.push(Instr::op(Op::Drop));
    }
    Ok(())
}

/// Lower a statement list.  With `keep_last`, the final statement's leftover
/// (an expression statement's value/type pair) stays on the stack to feed
/// the implicit return.
pub fn emit_block_items(
    comp: &mut Compilation,
    scope: &mut Scope,
    stmts: &[Node],
    out: &mut Vec<Instr>,
    keep_last: bool,
) -> CodegenResult<()> {
    let last = stmts.len().saturating_sub(1);
    for (i, stmt) in stmts.iter().enumerate() {
        if keep_last && i == last {
            emit_stmt(comp, scope, stmt, out)?;
        } else {
            emit_stmt_dropped(comp, scope, stmt, out)?;
        }
    }
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
// Declarations
// ══════════════════════════════════════════════════════════════════════════════

fn emit_declarator(
    comp: &mut Compilation,
    scope: &mut Scope,
    node: &Node,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    let (id, init) = match node {
        Node::VariableDeclarator { id, init } => (id, init.as_deref()),
        other => {
            return Err(CodegenError::Internal(format!(
                "expected VariableDeclarator, got {other:?}"
            )))
        }
    };
    let (name, annotation) = match &**id {
        Node::Identifier {
            name,
            type_annotation,
        } => (name.clone(), type_annotation.as_deref()),
        _ => {
            return Err(CodegenError::Todo(
                "destructuring declarations are not supported".into(),
            ))
        }
    };

    let global = scope.name == "main";
    if global {
        // Re-declaring an existing global or a built-in is a syntax error,
        // surfaced at runtime.
        if comp.globals.lookup(&name).is_some() || comp.builtins.var(&name).is_some() {
            comp.emit_throw(
                scope,
                "SyntaxError",
                &format!("identifier '{name}' has already been declared"),
                out,
            );
            return Ok(());
        }
    }

    let valtype = comp.ops.valtype;
    let idx = if global {
        comp.globals.alloc_var(&name, valtype)
    } else {
        scope.alloc_var(&name, valtype)
    };

    let ann_tag = annotation.and_then(annotation_tag);

    match init {
        Some(init) => {
            emit_expr_named(comp, scope, init, Some(&name), out)?;
            push_set(out, idx, global);
            emit_type(comp, scope, init, out)?;
            push_set(out, idx + 1, global);
            let meta = ann_tag.or_else(|| known_type(comp, scope, init));
            set_meta(comp, scope, &name, global, meta);
        }
        None => {
            out.push(comp.ops.konst(UNDEFINED));
            push_set(out, idx, global);
            out.push(Instr::i32(Op::I32Const, TYPE_UNDEFINED));
            push_set(out, idx + 1, global);
            set_meta(comp, scope, &name, global, ann_tag.or(Some(TYPE_UNDEFINED)));
        }
    }
    Ok(())
}

fn annotation_tag(ann: &Node) -> Option<TypeTag> {
    let inner = match ann {
        Node::TSTypeAnnotation { type_annotation } => type_annotation,
        _ => return None,
    };
    match &**inner {
        Node::TSNumberKeyword {} => Some(TYPE_NUMBER),
        Node::TSStringKeyword {} => Some(TYPE_STRING),
        Node::TSBooleanKeyword {} => Some(crate::types::TYPE_BOOLEAN),
        _ => None,
    }
}

fn push_set(out: &mut Vec<Instr>, idx: u32, global: bool) {
    out.push(if global {
        Instr::global_set(idx)
    } else {
        Instr::local_set(idx)
    });
}

fn set_meta(
    comp: &mut Compilation,
    scope: &mut Scope,
    name: &str,
    global: bool,
    tag: Option<TypeTag>,
) {
    if global {
        comp.globals.set_metadata(name, tag);
    } else {
        scope.set_metadata(name, tag);
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Control flow
// ══════════════════════════════════════════════════════════════════════════════

fn emit_return(
    comp: &mut Compilation,
    scope: &mut Scope,
    argument: Option<&Node>,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    match argument {
        Some(a) => {
            emit_expr(comp, scope, a, out)?;
            emit_type(comp, scope, a, out)?;
            scope.note_return_type(known_type(comp, scope, a));
        }
        None => {
            out.push(comp.ops.konst(UNDEFINED));
            out.push(Instr::i32(Op::I32Const, TYPE_UNDEFINED));
            scope.note_return_type(Some(TYPE_UNDEFINED));
        }
    }
    out.push(Instr::op(Op::Return));
    Ok(())
}

fn emit_if(
    comp: &mut Compilation,
    scope: &mut Scope,
    test: &Node,
    consequent: &Node,
    alternate: Option<&Node>,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    emit_condition(comp, scope, test, out)?;
    out.push(Instr::block(Op::If, BlockType::Void));
    comp.depth.push(DepthKind::If);
    emit_stmt_dropped(comp, scope, consequent, out)?;
    if let Some(alt) = alternate {
        out.push(Instr::op(Op::Else));
        emit_stmt_dropped(comp, scope, alt, out)?;
    }
    out.push(Instr::op(Op::End));
    comp.depth.pop();
    Ok(())
}

/// `while`: `loop { cond; if { body; br loop } }`.  Falling out of the `if`
/// exits the loop, so `break` branches to the `if` label and `continue` to
/// the loop label one shallower in the stack.
fn emit_while(
    comp: &mut Compilation,
    scope: &mut Scope,
    test: &Node,
    body: &Node,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    out.push(Instr::block(Op::Loop, BlockType::Void));
    comp.depth.push(DepthKind::While);
    emit_condition(comp, scope, test, out)?;
    out.push(Instr::block(Op::If, BlockType::Void));
    comp.depth.push(DepthKind::If);
    emit_stmt_dropped(comp, scope, body, out)?;
    out.push(Instr::u32(Op::Br, 1));
    out.push(Instr::op(Op::End));
    out.push(Instr::op(Op::End));
    comp.depth.pop();
    comp.depth.pop();
    Ok(())
}

/// `for`: the body sits in an extra block so `continue` falls through to the
/// update expression.
fn emit_for(
    comp: &mut Compilation,
    scope: &mut Scope,
    init: Option<&Node>,
    test: Option<&Node>,
    update: Option<&Node>,
    body: &Node,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    if let Some(init) = init {
        emit_stmt_dropped(comp, scope, init, out)?;
    }

    out.push(Instr::block(Op::Loop, BlockType::Void));
    comp.depth.push(DepthKind::For);
    match test {
        Some(test) => emit_condition(comp, scope, test, out)?,
        None => out.push(Instr::i32(Op::I32Const, 1)),
    }
    out.push(Instr::block(Op::If, BlockType::Void));
    comp.depth.push(DepthKind::If);
    out.push(Instr::block(Op::Block, BlockType::Void));
    comp.depth.push(DepthKind::Block);
    emit_stmt_dropped(comp, scope, body, out)?;
    out.push(Instr::op(Op::End));
    comp.depth.pop();
    if let Some(update) = update {
        emit_stmt_dropped(comp, scope, update, out)?;
    }
    out.push(Instr::u32(Op::Br, 1));
    out.push(Instr::op(Op::End));
    out.push(Instr::op(Op::End));
    comp.depth.pop();
    comp.depth.pop();
    Ok(())
}

fn emit_forof(
    comp: &mut Compilation,
    scope: &mut Scope,
    left: &Node,
    right: &Node,
    body: &Node,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    let bind_name = forof_binding(left)?;
    let bind = scope.alloc_var(&bind_name, comp.ops.valtype);
    scope.set_metadata(&bind_name, None);

    // Temporaries are suffixed by nesting depth so inner for-ofs get their
    // own set.
    let suffix = comp.depth.len();
    let iter = scope.alloc_tmp(&format!("#forof_iter{suffix}"), comp.ops.valtype);
    let ptr = scope.alloc_tmp(&format!("#forof_ptr{suffix}"), Valtype::I32);
    let len = scope.alloc_tmp(&format!("#forof_len{suffix}"), Valtype::I32);
    let counter = scope.alloc_tmp(&format!("#forof_counter{suffix}"), Valtype::I32);

    emit_expr(comp, scope, right, out)?;
    out.push(Instr::local_set(iter));
    let mut typ = Vec::new();
    emit_type(comp, scope, right, &mut typ)?;

    let elem_size = comp.ops.valtype.size();
    let align = match comp.ops.valtype {
        Valtype::I32 => 2,
        _ => 3,
    };

    // Array arm: load each element into the binding as a number.
    let mut array_arm = Vec::new();
    {
        let out = &mut array_arm;
        out.push(Instr::local_get(iter));
        out.extend(comp.ops.i32_to_u());
        out.push(Instr::local_set(ptr));
        out.push(Instr::local_get(ptr));
        out.push(Instr::mem(Op::I32Load, 2, 0));
        out.push(Instr::local_set(len));
        out.push(Instr::i32(Op::I32Const, 0));
        out.push(Instr::local_set(counter));

        out.push(Instr::block(Op::Loop, BlockType::Void));
        comp.depth.push(DepthKind::ForOf);
        out.push(Instr::local_get(counter));
        out.push(Instr::local_get(len));
        out.push(Instr::op(Op::I32LtU));
        out.push(Instr::block(Op::If, BlockType::Void));
        comp.depth.push(DepthKind::If);
        out.push(Instr::block(Op::Block, BlockType::Void));
        comp.depth.push(DepthKind::Block);

        out.push(Instr::local_get(ptr));
        out.push(Instr::local_get(counter));
        out.push(Instr::i32(Op::I32Const, elem_size as i32));
        out.push(Instr::op(Op::I32Mul));
        out.push(Instr::op(Op::I32Add));
        out.push(comp.ops.load(align, 4));
        out.push(Instr::local_set(bind));
        out.push(Instr::i32(Op::I32Const, TYPE_NUMBER));
        out.push(Instr::local_set(bind + 1));

        emit_stmt_dropped(comp, scope, body, out)?;

        out.push(Instr::op(Op::End));
        comp.depth.pop();
        out.push(Instr::local_get(counter));
        out.push(Instr::i32(Op::I32Const, 1));
        out.push(Instr::op(Op::I32Add));
        out.push(Instr::local_set(counter));
        out.push(Instr::u32(Op::Br, 1));
        out.push(Instr::op(Op::End));
        out.push(Instr::op(Op::End));
        comp.depth.pop();
        comp.depth.pop();
    }

    // String arm: one scratch page, rewritten per iteration.
    let mut string_arm = Vec::new();
    {
        let scratch = comp
            .pages
            .alloc_ptr("string scratch", crate::memory::PageKind::String);
        let out = &mut string_arm;
        out.push(Instr::local_get(iter));
        out.extend(comp.ops.i32_to_u());
        out.push(Instr::local_set(ptr));
        out.push(Instr::local_get(ptr));
        out.push(Instr::mem(Op::I32Load, 2, 0));
        out.push(Instr::local_set(len));
        out.push(Instr::i32(Op::I32Const, 0));
        out.push(Instr::local_set(counter));

        out.push(Instr::block(Op::Loop, BlockType::Void));
        comp.depth.push(DepthKind::ForOf);
        out.push(Instr::local_get(counter));
        out.push(Instr::local_get(len));
        out.push(Instr::op(Op::I32LtU));
        out.push(Instr::block(Op::If, BlockType::Void));
        comp.depth.push(DepthKind::If);
        out.push(Instr::block(Op::Block, BlockType::Void));
        comp.depth.push(DepthKind::Block);

        out.push(Instr::i32(Op::I32Const, scratch as i32));
        out.push(Instr::i32(Op::I32Const, 1));
        out.push(Instr::mem(Op::I32Store, 2, 0));
        out.push(Instr::i32(Op::I32Const, (scratch + 4) as i32));
        out.push(Instr::local_get(ptr));
        out.push(Instr::local_get(counter));
        out.push(Instr::i32(Op::I32Const, 2));
        out.push(Instr::op(Op::I32Mul));
        out.push(Instr::op(Op::I32Add));
        out.push(Instr::i32(Op::I32Const, 4));
        out.push(Instr::op(Op::I32Add));
        out.push(Instr::i32(Op::I32Const, 2));
        out.push(Instr {
            op: Op::MemoryCopy,
            imms: vec![crate::op::Imm::U32(0), crate::op::Imm::U32(0)],
            marker: None,
        });
        out.push(comp.ops.konst(scratch as f64));
        out.push(Instr::local_set(bind));
        out.push(Instr::i32(Op::I32Const, TYPE_STRING));
        out.push(Instr::local_set(bind + 1));

        emit_stmt_dropped(comp, scope, body, out)?;

        out.push(Instr::op(Op::End));
        comp.depth.pop();
        out.push(Instr::local_get(counter));
        out.push(Instr::i32(Op::I32Const, 1));
        out.push(Instr::op(Op::I32Add));
        out.push(Instr::local_set(counter));
        out.push(Instr::u32(Op::Br, 1));
        out.push(Instr::op(Op::End));
        out.push(Instr::op(Op::End));
        comp.depth.pop();
        comp.depth.pop();
    }

    let mut default = Vec::new();
    comp.emit_throw(
        scope,
        "TypeError",
        "cannot iterate over non-iterable value",
        &mut default,
    );

    let switched = type_switch(
        comp,
        scope,
        typ,
        vec![
            (vec![crate::types::TYPE_ARRAY], array_arm),
            (vec![TYPE_STRING], string_arm),
        ],
        default,
        BlockType::Void,
    );
    out.extend(switched);
    Ok(())
}

fn forof_binding(left: &Node) -> CodegenResult<String> {
    match left {
        Node::Identifier { name, .. } => Ok(name.clone()),
        Node::VariableDeclaration { declarations, .. } => match declarations.first() {
            Some(Node::VariableDeclarator { id, .. }) => id
                .ident_name()
                .map(str::to_string)
                .ok_or_else(|| CodegenError::Todo("destructuring for-of is not supported".into())),
            _ => Err(CodegenError::Internal(
                "for-of declaration without declarator".into(),
            )),
        },
        _ => Err(CodegenError::Todo(
            "unsupported for-of binding target".into(),
        )),
    }
}

fn nearest_loop(comp: &Compilation) -> Option<(usize, DepthKind)> {
    comp.depth
        .iter()
        .enumerate()
        .rev()
        .find(|(_, k)| matches!(k, DepthKind::While | DepthKind::For | DepthKind::ForOf))
        .map(|(i, k)| (i, *k))
}

fn emit_break(comp: &mut Compilation, out: &mut Vec<Instr>) -> CodegenResult<()> {
    let (j, _) = nearest_loop(comp)
        .ok_or_else(|| CodegenError::Todo("break used outside of a loop".into()))?;
    let len = comp.depth.len();
    // The break target is the `if` guarding the loop body, right above the
    // loop entry.
    let depth = (len - j)
        .checked_sub(2)
        .ok_or_else(|| CodegenError::Internal("malformed depth stack for break".into()))?;
    out.push(Instr::u32(Op::Br, depth as u32));
    Ok(())
}

fn emit_continue(comp: &mut Compilation, out: &mut Vec<Instr>) -> CodegenResult<()> {
    let (j, kind) = nearest_loop(comp)
        .ok_or_else(|| CodegenError::Todo("continue used outside of a loop".into()))?;
    let len = comp.depth.len();
    let depth = match kind {
        // Branch back to the loop header.
        DepthKind::While => len - j - 1,
        // Branch to the body block's end so the update runs first.
        _ => (len - j)
            .checked_sub(3)
            .ok_or_else(|| CodegenError::Internal("malformed depth stack for continue".into()))?,
    };
    out.push(Instr::u32(Op::Br, depth as u32));
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
// throw / try / catch
// ══════════════════════════════════════════════════════════════════════════════

fn emit_throw_stmt(
    comp: &mut Compilation,
    scope: &mut Scope,
    argument: &Node,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    let (constructor, message) = match argument {
        Node::NewExpression { callee, arguments } => {
            let ctor = callee.ident_name().map(str::to_string);
            let msg = match arguments.first() {
                Some(Node::Literal {
                    value: LitValue::Str(s),
                    regex: None,
                    ..
                }) => Some(s.clone()),
                None => None,
                _ => {
                    return Err(CodegenError::Todo(
                        "can only throw constructors with literal messages".into(),
                    ))
                }
            };
            (ctor, msg)
        }
        Node::Literal {
            value: LitValue::Str(s),
            regex: None,
            ..
        } => (None, Some(s.clone())),
        _ => {
            return Err(CodegenError::Todo(
                "can only throw new <Error>(<message>) or string literals".into(),
            ))
        }
    };

    let exc = comp.add_exception(constructor.as_deref(), message.as_deref());
    let tag = comp.ensure_tag();
    out.push(Instr::i32(Op::I32Const, exc as i32));
    out.push(Instr::u32(Op::Throw, tag));
    scope.throws = true;
    Ok(())
}

fn emit_try(
    comp: &mut Compilation,
    scope: &mut Scope,
    block: &Node,
    handler: Option<&Node>,
    finalizer: Option<&Node>,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    if finalizer.is_some() {
        return Err(CodegenError::Todo("finally is not supported".into()));
    }

    out.push(Instr::block(Op::Try, BlockType::Void));
    comp.depth.push(DepthKind::Try);
    emit_stmt_dropped(comp, scope, block, out)?;

    out.push(Instr::op(Op::CatchAll));
    comp.depth.pop();
    comp.depth.push(DepthKind::Catch);

    if let Some(Node::CatchClause { param, body }) = handler {
        if let Some(p) = param.as_deref().and_then(Node::ident_name) {
            // The caught value is not materialized; the binding reads as
            // undefined.
            let idx = scope.alloc_var(p, comp.ops.valtype);
            out.push(comp.ops.konst(UNDEFINED));
            out.push(Instr::local_set(idx));
            out.push(Instr::i32(Op::I32Const, TYPE_UNDEFINED));
            out.push(Instr::local_set(idx + 1));
            scope.set_metadata(p, Some(TYPE_UNDEFINED));
        }
        emit_stmt_dropped(comp, scope, body, out)?;
    }

    out.push(Instr::op(Op::End));
    comp.depth.pop();
    Ok(())
}
