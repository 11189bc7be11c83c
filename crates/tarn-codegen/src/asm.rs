//! The `asm` tagged-template intrinsic: a line-oriented assembler.
//!
//! Directives:
//!   `local <name> [<idx>] <type>` — allocate a named unpaired local
//!   `returns [<types…>]`          — set the enclosing scope's result types
//!   `memory`                      — reserve the asm-intrinsic page
//!
//! Every other line is `<op.name> imm imm …` in WASM text-format spelling.
//! `local.*` immediates accept declared names; `call` accepts a function or
//! import name.  Lines starting with `;;` are comments.

use tarn_types::Node;

use crate::compiler::Compilation;
use crate::error::{CodegenError, CodegenResult};
use crate::memory::PageKind;
use crate::op::{BlockType, Imm, Instr, Op};
use crate::scope::Scope;
use crate::types::Valtype;

/// Lower an `asm` template into instructions.
pub fn emit_asm(
    comp: &mut Compilation,
    scope: &mut Scope,
    quasi: &Node,
    out: &mut Vec<Instr>,
) -> CodegenResult<()> {
    let quasis = match quasi {
        Node::TemplateLiteral {
            quasis,
            expressions,
        } => {
            if !expressions.is_empty() {
                return Err(CodegenError::Todo(
                    "asm templates cannot interpolate expressions".into(),
                ));
            }
            quasis
        }
        _ => {
            return Err(CodegenError::Internal(
                "asm tag applied to a non-template".into(),
            ))
        }
    };

    let mut source = String::new();
    for q in quasis {
        if let Node::TemplateElement { value, .. } = q {
            source.push_str(&value.raw);
        }
    }

    for line in source.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(";;") {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens[0] {
            "local" => emit_local_directive(scope, &tokens)?,
            "returns" => {
                let mut returns = Vec::with_capacity(tokens.len() - 1);
                for t in &tokens[1..] {
                    returns.push(parse_valtype(t)?);
                }
                scope.returns = returns;
            }
            "memory" => {
                comp.pages.alloc("asm intrinsic", PageKind::Other);
            }
            _ => out.push(parse_op_line(comp, scope, &tokens)?),
        }
    }
    Ok(())
}

fn emit_local_directive(scope: &mut Scope, tokens: &[&str]) -> CodegenResult<()> {
    // `local <name> <type>` or `local <name> <idx> <type>` — the explicit
    // index form is accepted for readability but allocation decides.
    let (name, ty) = match tokens {
        [_, name, ty] => (*name, *ty),
        [_, name, _, ty] => (*name, *ty),
        _ => {
            return Err(CodegenError::Todo(format!(
                "asm: malformed local directive: {}",
                tokens.join(" ")
            )))
        }
    };
    let valtype = parse_valtype(ty)?;
    scope.alloc_tmp(name, valtype);
    Ok(())
}

fn parse_valtype(token: &str) -> CodegenResult<Valtype> {
    Valtype::parse(token)
        .ok_or_else(|| CodegenError::Todo(format!("asm: unknown value type {token}")))
}

fn parse_op_line(comp: &mut Compilation, scope: &Scope, tokens: &[&str]) -> CodegenResult<Instr> {
    let op = Op::from_name(tokens[0])
        .ok_or_else(|| CodegenError::Todo(format!("asm: unknown opcode {}", tokens[0])))?;
    let rest = &tokens[1..];

    let instr = match op {
        Op::LocalGet | Op::LocalSet | Op::LocalTee => {
            let token = one_imm(tokens)?;
            let idx = match token.parse::<u32>() {
                Ok(i) => i,
                Err(_) => scope
                    .lookup(token)
                    .map(|b| b.idx)
                    .ok_or_else(|| CodegenError::Todo(format!("asm: unknown local {token}")))?,
            };
            Instr::u32(op, idx)
        }
        Op::GlobalGet | Op::GlobalSet | Op::Br | Op::BrIf | Op::Throw => {
            let token = one_imm(tokens)?;
            let idx = token
                .parse::<u32>()
                .map_err(|_| CodegenError::Todo(format!("asm: bad immediate {token}")))?;
            Instr::u32(op, idx)
        }
        Op::Call => {
            let token = one_imm(tokens)?;
            let idx = if let Ok(i) = token.parse::<i32>() {
                i
            } else if let Some(i) = comp.find_func(token).map(|f| f.index) {
                i as i32
            } else if let Some(i) = comp.find_import(token) {
                i as i32
            } else if comp.builtins.func(token).is_some() {
                comp.include_builtin(token)? as i32
            } else {
                return Err(CodegenError::Todo(format!(
                    "asm: unknown call target {token}"
                )));
            };
            Instr::call(idx)
        }
        Op::I32Const => {
            let token = one_imm(tokens)?;
            let v = token
                .parse::<i32>()
                .map_err(|_| CodegenError::Todo(format!("asm: bad i32 constant {token}")))?;
            Instr::i32(op, v)
        }
        Op::I64Const => {
            let token = one_imm(tokens)?;
            let v = token
                .parse::<i64>()
                .map_err(|_| CodegenError::Todo(format!("asm: bad i64 constant {token}")))?;
            Instr::i64(op, v)
        }
        Op::F64Const => {
            let token = one_imm(tokens)?;
            let v = token
                .parse::<f64>()
                .map_err(|_| CodegenError::Todo(format!("asm: bad f64 constant {token}")))?;
            Instr::f64(op, v)
        }
        Op::Block | Op::Loop | Op::If | Op::Try => {
            let bt = match rest.first() {
                None | Some(&"void") => BlockType::Void,
                Some(t) => BlockType::Val(parse_valtype(t)?),
            };
            Instr::block(op, bt)
        }
        Op::I32Load | Op::I64Load | Op::F64Load | Op::I32Load8U | Op::I32Load16U
        | Op::I32Store | Op::I64Store | Op::F64Store | Op::I32Store8 | Op::I32Store16 => {
            let align = parse_or(rest.first(), 0)?;
            let offset = parse_or(rest.get(1), 0)?;
            Instr::mem(op, align, offset)
        }
        Op::MemoryCopy | Op::MemoryFill => Instr {
            op,
            imms: vec![Imm::U32(0), Imm::U32(0)],
            marker: None,
        },
        Op::BrTable => {
            let mut table = Vec::with_capacity(rest.len());
            for t in rest {
                table.push(t.parse::<u32>().map_err(|_| {
                    CodegenError::Todo(format!("asm: bad br_table label {t}"))
                })?);
            }
            Instr {
                op,
                imms: vec![Imm::Table(table)],
                marker: None,
            }
        }
        _ => {
            if !rest.is_empty() {
                return Err(CodegenError::Todo(format!(
                    "asm: {} takes no immediates",
                    tokens[0]
                )));
            }
            Instr::op(op)
        }
    };
    Ok(instr)
}

fn one_imm<'a>(tokens: &[&'a str]) -> CodegenResult<&'a str> {
    match tokens {
        [_, imm] => Ok(*imm),
        _ => Err(CodegenError::Todo(format!(
            "asm: expected one immediate: {}",
            tokens.join(" ")
        ))),
    }
}

fn parse_or(token: Option<&&str>, default: u32) -> CodegenResult<u32> {
    match token {
        None => Ok(default),
        Some(t) => t
            .parse::<u32>()
            .map_err(|_| CodegenError::Todo(format!("asm: bad memory immediate {t}"))),
    }
}
