//! The driver: compilation state, traversal orchestration, output assembly.
//!
//! All process-wide registers of a compilation — the function table, the
//! global scope, tags, exceptions, pages, data, the block-depth stack — live
//! in one [`Compilation`] value created fresh per [`compile`] call, so state
//! never leaks between runs.

use std::collections::HashMap;

use serde::Serialize;
use tarn_types::Node;

use crate::builtins::Builtins;
use crate::error::{CodegenError, CodegenResult};
use crate::func;
use crate::hack;
use crate::memory::{Data, PageKind, Pages};
use crate::op::{GenOps, Instr, Op};
use crate::options::Options;
use crate::scope::{Binding, Scope};
use crate::types::{TypeTag, Valtype};

// ══════════════════════════════════════════════════════════════════════════════
// Public API
// ══════════════════════════════════════════════════════════════════════════════

/// Compile a `Program` node into a module IR.
///
/// The result holds everything an external encoder needs to produce a binary
/// WASM module: functions, globals, exception tags, the page map, and data
/// segments.
pub fn compile(program: &Node, options: &Options) -> CodegenResult<CompileOutput> {
    let body = match program {
        Node::Program { body } => body.clone(),
        other => {
            return Err(CodegenError::Internal(format!(
                "expected a Program node at the top level, got {other:?}"
            )))
        }
    };

    let mut program = Node::Program { body };
    hack::object_hack(&mut program);
    if options.ast_log {
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&program).unwrap_or_default()
        );
    }

    let body = match program {
        Node::Program { body } => body,
        _ => Vec::new(),
    };

    let mut comp = Compilation::new(options);
    func::emit_main(&mut comp, &body)?;
    Ok(comp.finish())
}

// ══════════════════════════════════════════════════════════════════════════════
// Output shapes
// ══════════════════════════════════════════════════════════════════════════════

/// A compiled function record.
#[derive(Debug, Clone, Serialize)]
pub struct Func {
    pub name: String,
    /// Flattened parameter valtypes: (payload, tag) pair per user parameter,
    /// unpaired for asm-intrinsic helpers.
    pub params: Vec<Valtype>,
    pub locals: HashMap<String, Binding>,
    pub returns: Vec<Valtype>,
    pub wasm: Vec<Instr>,
    /// Absolute function index (imports precede all generated functions).
    pub index: u32,
    pub export: bool,
    pub internal: bool,
    pub throws: bool,
    /// Statically-known result tag, when every return site agrees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<TypeTag>,
}

/// A host-imported function occupying indices `0..imports.len()`.
#[derive(Debug, Clone, Serialize)]
pub struct ImportFunc {
    pub name: &'static str,
    pub module: &'static str,
    pub params: Vec<Valtype>,
    pub returns: Vec<Valtype>,
}

/// The fixed import set: a number printer and a character printer.
pub fn imported_funcs(valtype: Valtype) -> Vec<ImportFunc> {
    vec![
        ImportFunc {
            name: "print",
            module: "env",
            params: vec![valtype],
            returns: vec![],
        },
        ImportFunc {
            name: "printChar",
            module: "env",
            params: vec![Valtype::I32],
            returns: vec![],
        },
    ]
}

/// A WASM exception tag.
#[derive(Debug, Clone, Serialize)]
pub struct Tag {
    pub params: Vec<Valtype>,
}

/// One compile-time-assigned exception record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exception {
    pub constructor: Option<String>,
    pub message: Option<String>,
}

/// One module global slot.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalEntry {
    pub name: String,
    pub idx: u32,
    pub valtype: Valtype,
}

/// The page map in output form.
#[derive(Debug, Clone, Serialize)]
pub struct PagesOut {
    pub page_size: u32,
    pub has_array: bool,
    pub has_string: bool,
    pub entries: Vec<PageEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageEntry {
    pub reason: String,
    pub index: u32,
    pub kind: PageKind,
}

/// The complete compilation record.
#[derive(Debug, Serialize)]
pub struct CompileOutput {
    pub funcs: Vec<Func>,
    pub globals: Vec<GlobalEntry>,
    pub tags: Vec<Tag>,
    pub exceptions: Vec<Exception>,
    pub pages: PagesOut,
    pub data: Vec<Data>,
}

impl CompileOutput {
    /// Find a function record by name.
    pub fn func(&self, name: &str) -> Option<&Func> {
        self.funcs.iter().find(|f| f.name == name)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Compilation state
// ══════════════════════════════════════════════════════════════════════════════

/// Kind of an open structured block, for break/continue depth computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthKind {
    If,
    While,
    For,
    ForOf,
    Block,
    Try,
    Catch,
}

/// All mutable state of one compilation run.
pub struct Compilation<'o> {
    pub options: &'o Options,
    pub ops: GenOps,
    pub builtins: Builtins,
    pub imports: Vec<ImportFunc>,
    pub funcs: Vec<Func>,
    /// Module-scope bindings (paired slots, like any scope).
    pub globals: Scope,
    pub tags: Vec<Tag>,
    pub exceptions: Vec<Exception>,
    pub pages: Pages,
    pub data: Vec<Data>,
    /// Declared array/string names to their page byte pointers.
    pub arrays: HashMap<String, u32>,
    /// Open structured blocks, innermost last.
    pub depth: Vec<DepthKind>,
    /// Counter for anonymous page/function names.
    pub anon: u32,
}

impl<'o> Compilation<'o> {
    pub fn new(options: &'o Options) -> Compilation<'o> {
        Compilation {
            options,
            ops: GenOps::new(options.valtype),
            builtins: Builtins::new(),
            imports: imported_funcs(options.valtype),
            funcs: Vec::new(),
            globals: Scope::new("#global"),
            tags: Vec::new(),
            exceptions: Vec::new(),
            pages: Pages::new(options.page_size),
            data: Vec::new(),
            arrays: HashMap::new(),
            depth: Vec::new(),
            anon: 0,
        }
    }

    pub fn import_count(&self) -> u32 {
        self.imports.len() as u32
    }

    /// Next absolute function index.
    pub fn next_func_index(&self) -> u32 {
        self.import_count() + self.funcs.len() as u32
    }

    pub fn find_import(&self, name: &str) -> Option<u32> {
        self.imports
            .iter()
            .position(|i| i.name == name)
            .map(|p| p as u32)
    }

    pub fn find_func(&self, name: &str) -> Option<&Func> {
        self.funcs.iter().find(|f| f.name == name)
    }

    /// Resolve an absolute call index to (params, returns) lengths.
    pub fn call_arity(&self, index: u32) -> Option<(usize, usize)> {
        let imports = self.import_count();
        if index < imports {
            let i = &self.imports[index as usize];
            return Some((i.params.len(), i.returns.len()));
        }
        self.funcs
            .get((index - imports) as usize)
            .map(|f| (f.params.len(), f.returns.len()))
    }

    /// Include a registered built-in body into the module, memoized by name.
    pub fn include_builtin(&mut self, name: &str) -> CodegenResult<u32> {
        if let Some(f) = self.find_func(name) {
            return Ok(f.index);
        }
        let b = self
            .builtins
            .func(name)
            .ok_or_else(|| CodegenError::Internal(format!("unknown builtin {name}")))?
            .clone();
        if b.float_only && self.options.valtype != Valtype::F64 {
            return Err(CodegenError::Todo(format!(
                "{name} is only supported under the f64 valtype"
            )));
        }

        let mut locals = HashMap::new();
        for (i, vt) in b.params.iter().enumerate() {
            locals.insert(
                format!("#p{i}"),
                Binding {
                    idx: i as u32,
                    valtype: *vt,
                    metadata: None,
                },
            );
        }
        for (i, vt) in b.locals.iter().enumerate() {
            locals.insert(
                format!("#l{i}"),
                Binding {
                    idx: (b.params.len() + i) as u32,
                    valtype: *vt,
                    metadata: None,
                },
            );
        }

        let index = self.next_func_index();
        self.funcs.push(Func {
            name: name.to_string(),
            params: b.params,
            locals,
            returns: b.returns,
            wasm: b.wasm,
            index,
            export: false,
            internal: true,
            throws: false,
            return_type: b.return_type,
        });
        Ok(index)
    }

    /// Compile a regex literal through the external hook, memoized by source.
    pub fn include_regex(&mut self, pattern: &str, flags: &str) -> CodegenResult<u32> {
        let name = format!("regex:/{pattern}/{flags}");
        if let Some(f) = self.find_func(&name) {
            return Ok(f.index);
        }
        let compiler = self.options.regex_compiler.ok_or_else(|| {
            CodegenError::Todo("regular expressions require a registered regex compiler".into())
        })?;
        let r = compiler(pattern, flags);

        let mut locals = HashMap::new();
        for (i, vt) in r.params.iter().chain(r.locals.iter()).enumerate() {
            locals.insert(
                format!("#r{i}"),
                Binding {
                    idx: i as u32,
                    valtype: *vt,
                    metadata: None,
                },
            );
        }
        let index = self.next_func_index();
        let return_type = r.return_type;
        self.funcs.push(Func {
            name,
            params: r.params,
            locals,
            returns: r.returns,
            wasm: r.wasm,
            index,
            export: false,
            internal: true,
            throws: false,
            return_type: Some(return_type),
        });
        Ok(index)
    }

    /// The shared user-throw tag: one tag, one i32 parameter.
    pub fn ensure_tag(&mut self) -> u32 {
        if self.tags.is_empty() {
            self.tags.push(Tag {
                params: vec![Valtype::I32],
            });
        }
        0
    }

    /// Register an exception record, returning its compile-time index.
    pub fn add_exception(&mut self, constructor: Option<&str>, message: Option<&str>) -> u32 {
        self.exceptions.push(Exception {
            constructor: constructor.map(str::to_string),
            message: message.map(str::to_string),
        });
        (self.exceptions.len() - 1) as u32
    }

    /// Emit a `throw new <kind>("<message>")` sequence.
    ///
    /// This is how compile-time semantic errors surface at runtime (stratum
    /// two of the error design).
    pub fn emit_throw(
        &mut self,
        scope: &mut Scope,
        kind: &str,
        message: &str,
        out: &mut Vec<Instr>,
    ) {
        let exc = self.add_exception(Some(kind), Some(message));
        let tag = self.ensure_tag();
        out.push(Instr::i32(Op::I32Const, exc as i32));
        out.push(Instr::u32(Op::Throw, tag));
        scope.throws = true;
    }

    /// A fresh ordinal for anonymous names.
    pub fn anon_id(&mut self) -> u32 {
        let id = self.anon;
        self.anon += 1;
        id
    }

    pub fn string_capable(&self) -> bool {
        self.options.string_capable()
    }

    /// Assemble the compilation record.
    pub fn finish(self) -> CompileOutput {
        let mut globals: Vec<GlobalEntry> = self
            .globals
            .locals
            .iter()
            .map(|(name, b)| GlobalEntry {
                name: name.clone(),
                idx: b.idx,
                valtype: b.valtype,
            })
            .collect();
        globals.sort_by_key(|g| g.idx);

        let pages = PagesOut {
            page_size: self.pages.page_size(),
            has_array: self.pages.has_array,
            has_string: self.pages.has_string,
            entries: self
                .pages
                .entries()
                .into_iter()
                .map(|(reason, index, kind)| PageEntry {
                    reason,
                    index,
                    kind,
                })
                .collect(),
        };

        CompileOutput {
            funcs: self.funcs,
            globals,
            tags: self.tags,
            exceptions: self.exceptions,
            pages,
            data: self.data,
        }
    }
}
