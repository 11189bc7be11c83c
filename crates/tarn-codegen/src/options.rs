//! Compiler configuration.
//!
//! Flags arrive as an argument vector (the driver CLI forwards what it does
//! not recognize); everything defaults sensibly so `Options::default()` is a
//! working configuration.  The two host hooks — the `eval` parser and the
//! regex compiler — are fixed registration interfaces: the generator never
//! looks inside what they produce.

use tarn_types::Node;

use crate::op::Instr;
use crate::types::{TypeTag, Valtype};

/// Host parser hook, used only for `eval` of a string literal.
pub type EvalParser = fn(&str) -> Result<Node, String>;

/// External regex→WASM compiler hook.
pub type RegexCompiler = fn(pattern: &str, flags: &str) -> RegexFunc;

/// A compiled regex matcher produced by the [`RegexCompiler`] hook.
///
/// The function takes one unpaired parameter (the subject-string pointer as
/// a payload) and returns one payload whose static type is `return_type`.
#[derive(Debug, Clone)]
pub struct RegexFunc {
    pub params: Vec<Valtype>,
    pub locals: Vec<Valtype>,
    pub returns: Vec<Valtype>,
    pub return_type: TypeTag,
    pub wasm: Vec<Instr>,
}

/// Compiler options.
#[derive(Debug, Clone)]
pub struct Options {
    /// Module value type (`-valtype=`).
    pub valtype: Valtype,
    /// Page size in bytes (`-page-size=` takes KiB).
    pub page_size: u32,
    /// Emit `br_table` type switches instead of if-chains
    /// (`-typeswitch-use-brtable`).
    pub typeswitch_brtable: bool,
    /// Annotate string-concat sites (`-aot-well-formed-string-approximation`).
    pub aot_well_formed_string_approx: bool,
    /// Dump the rewritten AST to stderr (`-ast-log`).
    pub ast_log: bool,
    pub eval_parser: Option<EvalParser>,
    pub regex_compiler: Option<RegexCompiler>,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            valtype: Valtype::F64,
            page_size: 64 * 1024,
            typeswitch_brtable: false,
            aot_well_formed_string_approx: false,
            ast_log: false,
            eval_parser: None,
            regex_compiler: None,
        }
    }
}

impl Options {
    /// Parse flags from an argument vector.  Unrecognized arguments are
    /// ignored (the driver owns the rest of its command line).
    pub fn from_args<I, S>(args: I) -> Options
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut opts = Options::default();
        for arg in args {
            let arg = arg.as_ref();
            if let Some(v) = arg.strip_prefix("-valtype=") {
                if let Some(vt) = Valtype::parse(v) {
                    opts.valtype = vt;
                }
            } else if let Some(v) = arg.strip_prefix("-page-size=") {
                if let Ok(kib) = v.parse::<u32>() {
                    opts.page_size = kib * 1024;
                }
            } else if arg == "-typeswitch-use-brtable" {
                opts.typeswitch_brtable = true;
            } else if arg == "-aot-well-formed-string-approximation" {
                opts.aot_well_formed_string_approx = true;
            } else if arg == "-ast-log" {
                opts.ast_log = true;
            }
        }
        opts
    }

    /// Whether the configured valtype can carry the speculative string paths.
    pub fn string_capable(&self) -> bool {
        self.valtype == Valtype::F64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let o = Options::default();
        assert_eq!(o.valtype, Valtype::F64);
        assert_eq!(o.page_size, 65536);
        assert!(!o.typeswitch_brtable);
        assert!(o.string_capable());
    }

    #[test]
    fn parses_flags() {
        let o = Options::from_args([
            "-valtype=i32",
            "-page-size=16",
            "-typeswitch-use-brtable",
            "-ast-log",
            "--something-else",
        ]);
        assert_eq!(o.valtype, Valtype::I32);
        assert_eq!(o.page_size, 16 * 1024);
        assert!(o.typeswitch_brtable);
        assert!(o.ast_log);
        assert!(!o.aot_well_formed_string_approx);
        assert!(!o.string_capable());
    }
}
