//! Function lowering and the stack-balance scan.
//!
//! Generation runs through four states: body lowering, self-call patching,
//! finalization (implicit-return insertion, string-path pruning), then the
//! push into the function table.  `main` is the synthesized top-level
//! function; its final expression statement flows into the implicit return.

use tarn_types::Node;

use crate::compiler::{Compilation, Func};
use crate::error::{CodegenError, CodegenResult};
use crate::op::{BlockType, Imm, Instr, Op};
use crate::scope::Scope;
use crate::stmt;
use crate::types::{Valtype, TYPE_UNDEFINED, UNDEFINED};

/// Synthesize and emit the exported `main` function from the program body.
pub fn emit_main(comp: &mut Compilation, body: &[Node]) -> CodegenResult<()> {
    let mut scope = Scope::new("main");
    scope.returns = vec![comp.ops.valtype, Valtype::I32];

    // The program's value is its trailing expression.  A bare expression
    // statement flows into the implicit return; a trailing block construct
    // (try, if, block) gets its inner trailing expressions turned into
    // returns instead.
    let mut body = body.to_vec();
    if let Some(last) = body.last_mut() {
        if !matches!(last, Node::ExpressionStatement { .. }) {
            returnify(last);
        }
    }

    let mut wasm = Vec::new();
    stmt::emit_block_items(comp, &mut scope, &body, &mut wasm, true)?;
    finalize(comp, scope, wasm, true, false);
    Ok(())
}

/// Rewrite the trailing expression statements of a block construct into
/// returns, so the value escapes the void blocks wrapping it.
fn returnify(node: &mut Node) {
    match node {
        Node::ExpressionStatement { expression } => {
            *node = Node::ReturnStatement {
                argument: Some(expression.clone()),
            };
        }
        Node::BlockStatement { body } => {
            if let Some(last) = body.last_mut() {
                returnify(last);
            }
        }
        Node::TryStatement { block, handler, .. } => {
            returnify(block);
            if let Some(h) = handler {
                if let Node::CatchClause { body, .. } = &mut **h {
                    returnify(body);
                }
            }
        }
        Node::IfStatement {
            consequent,
            alternate,
            ..
        } => {
            returnify(consequent);
            if let Some(alt) = alternate {
                returnify(alt);
            }
        }
        _ => {}
    }
}

/// Lower a function declaration or expression into the function table and
/// return its absolute index.
pub fn emit_function(
    comp: &mut Compilation,
    name: &str,
    params: &[Node],
    body: &Node,
    export: bool,
    arrow_expr: bool,
) -> CodegenResult<u32> {
    // A body lowered more than once (specialized loops re-walk their body)
    // reuses the first definition.
    if let Some(f) = comp.find_func(name) {
        return Ok(f.index);
    }

    let mut scope = Scope::new(name);
    scope.returns = vec![comp.ops.valtype, Valtype::I32];

    for param in params {
        match param {
            Node::Identifier {
                name: pname,
                type_annotation,
            } => {
                scope.alloc_var(pname, comp.ops.valtype);
                scope.params.push(comp.ops.valtype);
                scope.params.push(Valtype::I32);
                if let Some(tag) = type_annotation.as_deref().and_then(annotation_tag) {
                    scope.set_metadata(pname, Some(tag));
                }
            }
            _ => {
                return Err(CodegenError::Todo(
                    "parameter patterns are not supported".into(),
                ))
            }
        }
    }

    let mut wasm = Vec::new();
    if arrow_expr {
        // Arrow-expression bodies get a synthetic return.
        crate::expr::emit_expr(comp, &mut scope, body, &mut wasm)?;
        crate::expr::emit_type(comp, &mut scope, body, &mut wasm)?;
        scope.note_return_type(crate::expr::known_type(comp, &scope, body));
        wasm.push(Instr::op(Op::Return));
    } else {
        match body {
            Node::BlockStatement { body } => {
                stmt::emit_block_items(comp, &mut scope, body, &mut wasm, false)?;
            }
            other => stmt::emit_stmt_dropped(comp, &mut scope, other, &mut wasm)?,
        }
    }

    Ok(finalize(comp, scope, wasm, export, false))
}

fn annotation_tag(ann: &Node) -> Option<crate::types::TypeTag> {
    match ann {
        Node::TSTypeAnnotation { type_annotation } => match &**type_annotation {
            Node::TSNumberKeyword {} => Some(crate::types::TYPE_NUMBER),
            Node::TSStringKeyword {} => Some(crate::types::TYPE_STRING),
            Node::TSBooleanKeyword {} => Some(crate::types::TYPE_BOOLEAN),
            _ => None,
        },
        _ => None,
    }
}

/// Patch, balance, prune, and push a generated function.
fn finalize(comp: &mut Compilation, scope: Scope, mut wasm: Vec<Instr>, export: bool, internal: bool) -> u32 {
    let index = comp.next_func_index();

    // Bind self-referential call sites to the assigned index.
    for instr in &mut wasm {
        if instr.call_target() == Some(-1) {
            instr.imms[0] = Imm::I32(index as i32);
        }
    }

    // Append an implicit `return undefined` pair when nothing flows out.
    let leftover = count_leftover(comp, &wasm, Some(&scope));
    let ends_in_return = wasm.last().map(|i| i.op) == Some(Op::Return);
    if !ends_in_return && leftover == 0 {
        wasm.push(comp.ops.konst(UNDEFINED));
        wasm.push(Instr::i32(Op::I32Const, TYPE_UNDEFINED));
    }

    // Drop speculative string paths under non-string-capable valtypes.
    if !comp.string_capable() {
        wasm.retain(|i| !i.marker.is_some_and(|m| m.is_string_only()));
    }

    comp.funcs.push(Func {
        name: scope.name.clone(),
        params: scope.params.clone(),
        locals: scope.locals.clone(),
        returns: scope.returns.clone(),
        wasm,
        index,
        export,
        internal,
        throws: scope.throws,
        return_type: scope.return_type,
    });
    index
}

// ══════════════════════════════════════════════════════════════════════════════
// Stack-balance scan
// ══════════════════════════════════════════════════════════════════════════════

/// Net stack effect of an instruction buffer at block depth zero.
///
/// A linear approximation, not a validator: inner blocks are skipped, calls
/// consult the callee's arity (`self_scope` resolves the `-1` sentinel), and
/// `return` resets the count.  The result seeds the trailing-drop policy and
/// the implicit-return decision.
pub fn count_leftover(comp: &Compilation, wasm: &[Instr], self_scope: Option<&Scope>) -> i32 {
    let mut count = 0i32;
    let mut depth = 0i32;

    for instr in wasm {
        if instr.op == Op::End {
            if depth > 0 {
                depth -= 1;
            }
            continue;
        }

        if depth == 0 {
            count += stack_effect(comp, instr, self_scope);
        }

        if matches!(instr.op, Op::Block | Op::Loop | Op::If | Op::Try) {
            depth += 1;
        }
        if depth == 0 && instr.op == Op::Return {
            count = 0;
        }
    }
    count
}

fn stack_effect(comp: &Compilation, instr: &Instr, self_scope: Option<&Scope>) -> i32 {
    use Op::*;
    match instr.op {
        Block | Loop | Try => match instr.block_type() {
            Some(BlockType::Val(_)) => 1,
            _ => 0,
        },
        If => match instr.block_type() {
            Some(BlockType::Val(_)) => 0,
            _ => -1,
        },
        I32Const | I64Const | F64Const | LocalGet | GlobalGet | MemorySize => 1,
        Drop | LocalSet | GlobalSet | BrIf | BrTable | Throw => -1,
        I32Store | I64Store | F64Store | I32Store8 | I32Store16 => -2,
        MemoryCopy | MemoryFill | MemoryInit => -3,
        Call => {
            let target = instr.call_target().unwrap_or(0);
            let (params, returns) = if target < 0 {
                match self_scope {
                    Some(s) => (s.params.len(), s.returns.len()),
                    None => (0, 0),
                }
            } else {
                comp.call_arity(target as u32).unwrap_or((0, 0))
            };
            returns as i32 - params as i32
        }
        // Binary numeric and comparison operators pop two, push one.
        I32Eq | I32Ne | I32LtS | I32LtU | I32GtS | I32GtU | I32LeS | I32LeU | I32GeS | I32GeU
        | I64Eq | I64Ne | I64LtS | I64GtS | I64LeS | I64GeS | F64Eq | F64Ne | F64Lt | F64Gt
        | F64Le | F64Ge | I32Add | I32Sub | I32Mul | I32DivS | I32RemS | I32And | I32Or
        | I32Xor | I32Shl | I32ShrS | I32ShrU | I64Add | I64Sub | I64Mul | I64DivS | I64RemS
        | F64Add | F64Sub | F64Mul | F64Div | F64Min | F64Max => -1,
        // Loads pop an address and push a value; conversions, unary math,
        // tees, branches, and structural opcodes are neutral here.
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;

    fn comp_for(options: &Options) -> Compilation<'_> {
        Compilation::new(options)
    }

    #[test]
    fn constants_and_drops_balance() {
        let options = Options::default();
        let comp = comp_for(&options);
        let wasm = vec![
            Instr::f64(Op::F64Const, 1.0),
            Instr::f64(Op::F64Const, 2.0),
            Instr::op(Op::F64Add),
            Instr::i32(Op::I32Const, 0),
        ];
        assert_eq!(count_leftover(&comp, &wasm, None), 2);
    }

    #[test]
    fn inner_blocks_are_skipped() {
        let options = Options::default();
        let comp = comp_for(&options);
        let wasm = vec![
            Instr::i32(Op::I32Const, 1),
            Instr::block(Op::If, BlockType::Val(Valtype::F64)),
            Instr::f64(Op::F64Const, 1.0),
            Instr::op(Op::Else),
            Instr::f64(Op::F64Const, 2.0),
            Instr::op(Op::End),
        ];
        // condition +1, if -1 then +1 for its result
        assert_eq!(count_leftover(&comp, &wasm, None), 1);
    }

    #[test]
    fn return_resets() {
        let options = Options::default();
        let comp = comp_for(&options);
        let wasm = vec![
            Instr::f64(Op::F64Const, 1.0),
            Instr::i32(Op::I32Const, 0),
            Instr::op(Op::Return),
        ];
        assert_eq!(count_leftover(&comp, &wasm, None), 0);
    }

    #[test]
    fn stores_and_copies_pop() {
        let options = Options::default();
        let comp = comp_for(&options);
        let wasm = vec![
            Instr::i32(Op::I32Const, 0),
            Instr::i32(Op::I32Const, 4),
            Instr::mem(Op::I32Store, 2, 0),
            Instr::i32(Op::I32Const, 0),
            Instr::i32(Op::I32Const, 0),
            Instr::i32(Op::I32Const, 2),
            Instr {
                op: Op::MemoryCopy,
                imms: vec![Imm::U32(0), Imm::U32(0)],
                marker: None,
            },
        ];
        assert_eq!(count_leftover(&comp, &wasm, None), 0);
    }
}
