//! Codegen error types.

use thiserror::Error;

/// Errors that can occur during code generation.
///
/// These are the *compile-time* failures (stratum one of the error design).
/// Semantic errors in the input program compile to runtime throws instead,
/// and impossible states compile to `unreachable`.
#[derive(Debug, Error)]
pub enum CodegenError {
    /// An input construct the generator does not support.
    #[error("todo: {0}")]
    Todo(String),

    /// An internal consistency check failed.
    #[error("internal codegen error: {0}")]
    Internal(String),

    /// The host parser hook failed while parsing an `eval` literal.
    #[error("eval parse error: {0}")]
    Parse(String),
}

/// Codegen result type alias.
pub type CodegenResult<T> = Result<T, CodegenError>;
