//! tarn code generator: lowers an ESTree AST subset to a WASM module IR.
//!
//! # Architecture
//!
//! The generator walks a [`tarn_types::Node`] tree (after the object-hack
//! rewrite) and produces a [`CompileOutput`]: a function table of typed
//! stack-machine instructions plus the globals, exception tags, page map,
//! and data segments an external encoder serializes into a binary module.
//!
//! ## Value discipline
//!
//! Every runtime value is a pair *(payload : valtype, type tag : i32)*.
//! Named bindings take two consecutive slots; dynamic expression sites keep
//! the `#last_type` temporary current.  Arrays and strings live in linear
//! memory, one page per name: a u32 element count at offset 0, elements
//! from offset 4 (16-bit code units for strings, payloads for arrays).
//!
//! ## Entry point
//!
//! ```no_run
//! use tarn_codegen::{compile, Options};
//! use tarn_types::Node;
//!
//! let program: Node = serde_json::from_str("{\"type\":\"Program\",\"body\":[]}").unwrap();
//! let output = compile(&program, &Options::default()).unwrap();
//! assert_eq!(output.funcs.last().unwrap().name, "main");
//! ```

pub mod asm;
pub mod builtins;
pub mod compiler;
pub mod encode;
pub mod error;
pub mod expr;
pub mod func;
pub mod hack;
pub mod memory;
pub mod op;
pub mod options;
pub mod scope;
pub mod stmt;
pub mod types;

pub use compiler::{compile, CompileOutput, Exception, Func, GlobalEntry, Tag};
pub use error::{CodegenError, CodegenResult};
pub use options::{Options, RegexFunc};
pub use types::Valtype;
