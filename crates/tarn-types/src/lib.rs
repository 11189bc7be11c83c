//! Shared types for the tarn compiler.
//!
//! This crate defines the ESTree-shaped AST subset that the code generator
//! consumes.  The nodes deserialize directly from the JSON a host JavaScript
//! parser produces, using the ESTree `"type"` field as the discriminator.

mod ast;

pub use ast::{LitValue, Node, RegexLiteral, TemplateChunk};
