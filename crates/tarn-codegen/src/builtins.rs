//! The built-in registry: variables, functions, prototype methods, and
//! internal constructors.
//!
//! Four independently-queryable tables.  Function entries carry pre-written
//! opcode bodies that get included into the module on first call; prototype
//! entries carry generators that emit inline code specialized to a receiver
//! type, given the receiver pointer, a cached-length accessor, the lowered
//! argument sequences, and a local-allocation helper.

use std::collections::HashMap;

use crate::error::CodegenResult;
use crate::memory::{PageKind, Pages};
use crate::op::{BlockType, GenOps, Instr, Op};
use crate::scope::Scope;
use crate::types::{
    TypeTag, Valtype, TYPE_ARRAY, TYPE_NUMBER, TYPE_STRING, TYPE_UNDEFINED, UNDEFINED,
};

// ══════════════════════════════════════════════════════════════════════════════
// Table entry shapes
// ══════════════════════════════════════════════════════════════════════════════

/// A named constant or host value.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinVar {
    pub value: f64,
    pub type_tag: TypeTag,
    /// Only usable when the module valtype is `f64`.
    pub float_only: bool,
}

/// A pre-written opcode body callable by name.
#[derive(Debug, Clone)]
pub struct BuiltinFunc {
    /// Flattened parameter valtypes.  Unpaired: one entry per payload.
    pub params: Vec<Valtype>,
    pub locals: Vec<Valtype>,
    pub returns: Vec<Valtype>,
    /// Statically-known result tag when `typed_return` is false.
    pub return_type: Option<TypeTag>,
    pub wasm: Vec<Instr>,
    pub float_only: bool,
    /// Whether callers pass (payload, tag) pairs per argument.
    pub typed_params: bool,
    /// Whether the body returns a (payload, tag) pair itself.
    pub typed_return: bool,
}

/// Cached-length accessor bundle handed to prototype generators.
///
/// The length lives in a scratch i32 local so generators read it once and
/// reuse it.
#[derive(Debug, Clone, Copy)]
pub struct LengthCache {
    pub local: u32,
}

impl LengthCache {
    /// Load the u32 length prefix at `pointer` into the cache local.
    pub fn cache(&self, pointer: &[Instr]) -> Vec<Instr> {
        let mut out = pointer.to_vec();
        out.push(Instr::mem(Op::I32Load, 2, 0));
        out.push(Instr::local_set(self.local));
        out
    }

    /// Push the cached i32 length.
    pub fn get_cached_i32(&self) -> Instr {
        Instr::local_get(self.local)
    }

    /// Store `value` (i32 instrs) as the new length at `pointer`.
    pub fn set_i32(&self, pointer: &[Instr], value: &[Instr]) -> Vec<Instr> {
        let mut out = pointer.to_vec();
        out.extend_from_slice(value);
        out.push(Instr::mem(Op::I32Store, 2, 0));
        out
    }
}

/// Everything a prototype generator needs to emit inline code without
/// knowing the caller's locals.
pub struct ProtoCtx<'a> {
    /// Pushes the receiver pointer as i32.
    pub pointer: Vec<Instr>,
    /// Lowered argument payload sequences.
    pub args: Vec<Vec<Instr>>,
    pub length: LengthCache,
    pub scope: &'a mut Scope,
    pub pages: &'a mut Pages,
    pub ops: GenOps,
    /// Element byte size of the receiver's storage.
    pub elem_size: u32,
    /// Call-site ordinal keeping scratch locals distinct across nesting.
    pub uid: u32,
}

impl ProtoCtx<'_> {
    /// Allocate (or find) a scratch local for this call site.
    pub fn new_local(&mut self, hint: &str, valtype: Valtype) -> u32 {
        let uid = self.uid;
        self.scope.alloc_tmp(&format!("#proto_{hint}_{uid}"), valtype)
    }

    fn arg(&self, i: usize) -> Vec<Instr> {
        self.args
            .get(i)
            .cloned()
            .unwrap_or_else(|| vec![self.ops.konst(UNDEFINED)])
    }
}

/// A prototype-method inline generator.
pub type ProtoGen = fn(&mut ProtoCtx) -> CodegenResult<Vec<Instr>>;

/// One (type tag, method) entry.
#[derive(Clone, Copy)]
pub struct ProtoEntry {
    pub gen: ProtoGen,
    /// Statically-known result tag; `None` means the generated code sets
    /// `#last_type` itself.
    pub return_type: Option<TypeTag>,
}

/// Internal constructors reachable through `new` / call resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalCtor {
    Array,
    ArrayOf,
}

/// Constructor table lookup.  Returns the constructor and its result tag.
pub fn internal_ctor(name: &str) -> Option<(InternalCtor, TypeTag)> {
    match name {
        "Array" => Some((InternalCtor::Array, TYPE_ARRAY)),
        "__Array_of" => Some((InternalCtor::ArrayOf, TYPE_ARRAY)),
        _ => None,
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Registry
// ══════════════════════════════════════════════════════════════════════════════

/// The assembled registry, built once per compilation.
pub struct Builtins {
    vars: HashMap<&'static str, BuiltinVar>,
    funcs: HashMap<&'static str, BuiltinFunc>,
    protos: HashMap<(TypeTag, &'static str), ProtoEntry>,
}

impl Builtins {
    pub fn new() -> Builtins {
        let mut vars = HashMap::new();
        vars.insert(
            "NaN",
            BuiltinVar {
                value: f64::NAN,
                type_tag: TYPE_NUMBER,
                float_only: true,
            },
        );
        vars.insert(
            "Infinity",
            BuiltinVar {
                value: f64::INFINITY,
                type_tag: TYPE_NUMBER,
                float_only: true,
            },
        );
        vars.insert(
            "__Math_PI",
            BuiltinVar {
                value: std::f64::consts::PI,
                type_tag: TYPE_NUMBER,
                float_only: true,
            },
        );
        vars.insert(
            "__Math_E",
            BuiltinVar {
                value: std::f64::consts::E,
                type_tag: TYPE_NUMBER,
                float_only: true,
            },
        );

        let mut funcs = HashMap::new();
        funcs.insert("__Math_sqrt", float_unop(Op::F64Sqrt));
        funcs.insert("__Math_abs", float_unop(Op::F64Abs));
        funcs.insert("__Math_floor", float_unop(Op::F64Floor));
        funcs.insert("__Math_ceil", float_unop(Op::F64Ceil));
        funcs.insert("__Math_trunc", float_unop(Op::F64Trunc));
        funcs.insert("__Math_round", float_unop(Op::F64Nearest));

        let mut protos: HashMap<(TypeTag, &'static str), ProtoEntry> = HashMap::new();
        protos.insert(
            (TYPE_ARRAY, "push"),
            ProtoEntry {
                gen: proto_array_push,
                return_type: Some(TYPE_NUMBER),
            },
        );
        protos.insert(
            (TYPE_ARRAY, "pop"),
            ProtoEntry {
                gen: proto_array_pop,
                return_type: None,
            },
        );
        protos.insert(
            (TYPE_STRING, "charCodeAt"),
            ProtoEntry {
                gen: proto_string_char_code_at,
                return_type: Some(TYPE_NUMBER),
            },
        );
        protos.insert(
            (TYPE_STRING, "charAt"),
            ProtoEntry {
                gen: proto_string_char_at,
                return_type: Some(TYPE_STRING),
            },
        );

        Builtins {
            vars,
            funcs,
            protos,
        }
    }

    pub fn var(&self, name: &str) -> Option<&BuiltinVar> {
        self.vars.get(name)
    }

    pub fn func(&self, name: &str) -> Option<&BuiltinFunc> {
        self.funcs.get(name)
    }

    pub fn proto(&self, tag: TypeTag, method: &'static str) -> Option<&ProtoEntry> {
        self.protos.get(&(tag, method))
    }

    /// Every (tag, entry) registered for `method`, ascending by tag.
    pub fn proto_candidates(&self, method: &str) -> Vec<(TypeTag, ProtoEntry)> {
        let mut out: Vec<_> = self
            .protos
            .iter()
            .filter(|((_, m), _)| *m == method)
            .map(|((tag, _), entry)| (*tag, *entry))
            .collect();
        out.sort_by_key(|(tag, _)| *tag);
        out
    }
}

impl Default for Builtins {
    fn default() -> Builtins {
        Builtins::new()
    }
}

/// An f64-only one-argument math body: `(x: f64) -> f64`.
fn float_unop(op: Op) -> BuiltinFunc {
    BuiltinFunc {
        params: vec![Valtype::F64],
        locals: vec![],
        returns: vec![Valtype::F64],
        return_type: Some(TYPE_NUMBER),
        wasm: vec![Instr::local_get(0), Instr::op(op)],
        float_only: true,
        typed_params: false,
        typed_return: false,
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Prototype generators
// ══════════════════════════════════════════════════════════════════════════════

/// `arr.push(x)` — append one element, grow the length, yield the new length.
fn proto_array_push(ctx: &mut ProtoCtx) -> CodegenResult<Vec<Instr>> {
    let ptr = ctx.new_local("push_ptr", Valtype::I32);
    let arg = ctx.arg(0);
    let elem_size = ctx.elem_size;
    let (align, _) = elem_align(ctx.ops.valtype);

    let mut out = ctx.pointer.clone();
    out.push(Instr::local_set(ptr));
    out.extend(ctx.length.cache(&[Instr::local_get(ptr)]));

    // arr[len] = x
    out.push(Instr::local_get(ptr));
    out.push(ctx.length.get_cached_i32());
    out.push(Instr::i32(Op::I32Const, elem_size as i32));
    out.push(Instr::op(Op::I32Mul));
    out.push(Instr::op(Op::I32Add));
    out.extend(arg);
    out.push(ctx.ops.store(align, 4));

    // length = len + 1
    let bumped = vec![
        ctx.length.get_cached_i32(),
        Instr::i32(Op::I32Const, 1),
        Instr::op(Op::I32Add),
    ];
    out.extend(ctx.length.set_i32(&[Instr::local_get(ptr)], &bumped));

    // yield the new length
    out.extend(bumped);
    out.extend(ctx.ops.i32_from_u());
    Ok(out)
}

/// `arr.pop()` — remove and yield the last element, `undefined` when empty.
fn proto_array_pop(ctx: &mut ProtoCtx) -> CodegenResult<Vec<Instr>> {
    let ptr = ctx.new_local("pop_ptr", Valtype::I32);
    let last = ctx.new_local("pop_idx", Valtype::I32);
    let last_type = ctx.scope.alloc_tmp("#last_type", Valtype::I32);
    let elem_size = ctx.elem_size;
    let (align, _) = elem_align(ctx.ops.valtype);
    let valtype = ctx.ops.valtype;

    let mut out = ctx.pointer.clone();
    out.push(Instr::local_set(ptr));
    out.extend(ctx.length.cache(&[Instr::local_get(ptr)]));

    out.push(ctx.length.get_cached_i32());
    out.push(Instr::op(Op::I32Eqz));
    out.push(Instr::block(Op::If, BlockType::Val(valtype)));
    out.push(ctx.ops.konst(UNDEFINED));
    out.push(Instr::i32(Op::I32Const, TYPE_UNDEFINED));
    out.push(Instr::local_set(last_type));
    out.push(Instr::op(Op::Else));
    // last = len - 1
    out.push(ctx.length.get_cached_i32());
    out.push(Instr::i32(Op::I32Const, 1));
    out.push(Instr::op(Op::I32Sub));
    out.push(Instr::local_set(last));
    // yield arr[last]
    out.push(Instr::local_get(ptr));
    out.push(Instr::local_get(last));
    out.push(Instr::i32(Op::I32Const, elem_size as i32));
    out.push(Instr::op(Op::I32Mul));
    out.push(Instr::op(Op::I32Add));
    out.push(ctx.ops.load(align, 4));
    // length = last
    out.extend(
        ctx.length
            .set_i32(&[Instr::local_get(ptr)], &[Instr::local_get(last)]),
    );
    out.push(Instr::i32(Op::I32Const, TYPE_NUMBER));
    out.push(Instr::local_set(last_type));
    out.push(Instr::op(Op::End));
    Ok(out)
}

/// `s.charCodeAt(i)` — load one 16-bit code unit.
fn proto_string_char_code_at(ctx: &mut ProtoCtx) -> CodegenResult<Vec<Instr>> {
    let ptr = ctx.new_local("cca_ptr", Valtype::I32);
    let arg = ctx.arg(0);

    let mut out = ctx.pointer.clone();
    out.push(Instr::local_set(ptr));
    out.push(Instr::local_get(ptr));
    out.extend(arg);
    out.extend(ctx.ops.i32_to());
    out.push(Instr::i32(Op::I32Const, 2));
    out.push(Instr::op(Op::I32Mul));
    out.push(Instr::op(Op::I32Add));
    out.push(Instr::mem(Op::I32Load16U, 1, 4));
    out.extend(ctx.ops.i32_from_u());
    Ok(out)
}

/// `s.charAt(i)` — copy one code unit into a scratch single-char page.
fn proto_string_char_at(ctx: &mut ProtoCtx) -> CodegenResult<Vec<Instr>> {
    let ptr = ctx.new_local("ca_ptr", Valtype::I32);
    let arg = ctx.arg(0);
    let scratch = ctx.pages.alloc_ptr("string scratch", PageKind::String);

    let mut out = ctx.pointer.clone();
    out.push(Instr::local_set(ptr));
    // scratch length = 1
    out.push(Instr::i32(Op::I32Const, scratch as i32));
    out.push(Instr::i32(Op::I32Const, 1));
    out.push(Instr::mem(Op::I32Store, 2, 0));
    // copy the code unit
    out.push(Instr::i32(Op::I32Const, (scratch + 4) as i32));
    out.push(Instr::local_get(ptr));
    out.extend(arg);
    out.extend(ctx.ops.i32_to());
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
    // yield the scratch pointer
    out.push(ctx.ops.konst(scratch as f64));
    Ok(out)
}

/// Natural alignment exponent for element loads/stores of this valtype.
fn elem_align(valtype: Valtype) -> (u32, u32) {
    match valtype {
        Valtype::I32 => (2, 4),
        Valtype::I64 | Valtype::F64 => (3, 8),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_are_queryable() {
        let b = Builtins::new();
        assert!(b.var("NaN").is_some());
        assert!(b.var("__Math_PI").is_some());
        assert!(b.var("PI").is_none());
        assert!(b.func("__Math_sqrt").is_some());
        assert!(b.proto(TYPE_ARRAY, "push").is_some());
        assert!(b.proto(TYPE_STRING, "push").is_none());
        assert!(internal_ctor("Array").is_some());
        assert!(internal_ctor("Object").is_none());
    }

    #[test]
    fn float_only_flags() {
        let b = Builtins::new();
        assert!(b.var("Infinity").unwrap().float_only);
        assert!(b.func("__Math_floor").unwrap().float_only);
        assert!(!b.func("__Math_floor").unwrap().typed_params);
    }

    #[test]
    fn single_candidate_lookup() {
        let b = Builtins::new();
        let push = b.proto_candidates("push");
        assert_eq!(push.len(), 1);
        assert_eq!(push[0].0, TYPE_ARRAY);
        assert_eq!(push[0].1.return_type, Some(TYPE_NUMBER));

        let pop = b.proto_candidates("pop");
        assert_eq!(pop[0].1.return_type, None);

        assert!(b.proto_candidates("splice").is_empty());
    }
}
