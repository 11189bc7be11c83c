//! AST node types for the supported scripting-language subset.
//!
//! The shape mirrors ESTree: one [`Node`] enum internally tagged on `"type"`,
//! so a tree serialized by a host parser (acorn, meriyah, …) deserializes
//! without an adaptation layer.  Extra ESTree fields (`start`, `end`, `loc`)
//! are ignored on the way in.  Unsupported node kinds — all `TS…` nodes among
//! them — collapse into [`Node::Unknown`] and are skipped by the generator.

use serde::{Deserialize, Serialize};

/// A single AST node.
///
/// Recursive positions are boxed to keep the enum size reasonable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Node {
    // ── Top level & statements ───────────────────────────────────────────
    Program {
        body: Vec<Node>,
    },
    BlockStatement {
        body: Vec<Node>,
    },
    ExpressionStatement {
        expression: Box<Node>,
    },
    EmptyStatement {},
    VariableDeclaration {
        declarations: Vec<Node>,
        #[serde(default)]
        kind: String,
    },
    VariableDeclarator {
        id: Box<Node>,
        #[serde(default)]
        init: Option<Box<Node>>,
    },
    FunctionDeclaration {
        #[serde(default)]
        id: Option<Box<Node>>,
        params: Vec<Node>,
        body: Box<Node>,
        #[serde(default)]
        generator: bool,
        #[serde(default, rename = "async")]
        is_async: bool,
    },
    ReturnStatement {
        #[serde(default)]
        argument: Option<Box<Node>>,
    },
    IfStatement {
        test: Box<Node>,
        consequent: Box<Node>,
        #[serde(default)]
        alternate: Option<Box<Node>>,
    },
    ForStatement {
        #[serde(default)]
        init: Option<Box<Node>>,
        #[serde(default)]
        test: Option<Box<Node>>,
        #[serde(default)]
        update: Option<Box<Node>>,
        body: Box<Node>,
    },
    WhileStatement {
        test: Box<Node>,
        body: Box<Node>,
    },
    ForOfStatement {
        left: Box<Node>,
        right: Box<Node>,
        body: Box<Node>,
    },
    BreakStatement {
        #[serde(default)]
        label: Option<Box<Node>>,
    },
    ContinueStatement {
        #[serde(default)]
        label: Option<Box<Node>>,
    },
    TryStatement {
        block: Box<Node>,
        #[serde(default)]
        handler: Option<Box<Node>>,
        #[serde(default)]
        finalizer: Option<Box<Node>>,
    },
    CatchClause {
        #[serde(default)]
        param: Option<Box<Node>>,
        body: Box<Node>,
    },
    ThrowStatement {
        argument: Box<Node>,
    },
    DebuggerStatement {},
    ExportNamedDeclaration {
        #[serde(default)]
        declaration: Option<Box<Node>>,
    },

    // ── Expressions ──────────────────────────────────────────────────────
    ArrowFunctionExpression {
        params: Vec<Node>,
        body: Box<Node>,
        #[serde(default)]
        expression: bool,
        #[serde(default, rename = "async")]
        is_async: bool,
    },
    FunctionExpression {
        #[serde(default)]
        id: Option<Box<Node>>,
        params: Vec<Node>,
        body: Box<Node>,
        #[serde(default)]
        generator: bool,
        #[serde(default, rename = "async")]
        is_async: bool,
    },
    BinaryExpression {
        operator: String,
        left: Box<Node>,
        right: Box<Node>,
    },
    LogicalExpression {
        operator: String,
        left: Box<Node>,
        right: Box<Node>,
    },
    UnaryExpression {
        operator: String,
        argument: Box<Node>,
    },
    UpdateExpression {
        operator: String,
        #[serde(default)]
        prefix: bool,
        argument: Box<Node>,
    },
    AssignmentExpression {
        operator: String,
        left: Box<Node>,
        right: Box<Node>,
    },
    ConditionalExpression {
        test: Box<Node>,
        consequent: Box<Node>,
        alternate: Box<Node>,
    },
    Identifier {
        name: String,
        #[serde(default, rename = "typeAnnotation")]
        type_annotation: Option<Box<Node>>,
    },
    Literal {
        #[serde(default)]
        value: LitValue,
        #[serde(default)]
        raw: Option<String>,
        #[serde(default)]
        regex: Option<RegexLiteral>,
    },
    MemberExpression {
        object: Box<Node>,
        property: Box<Node>,
        #[serde(default)]
        computed: bool,
        #[serde(default)]
        optional: bool,
    },
    CallExpression {
        callee: Box<Node>,
        arguments: Vec<Node>,
        #[serde(default)]
        optional: bool,
    },
    NewExpression {
        callee: Box<Node>,
        arguments: Vec<Node>,
    },
    ArrayExpression {
        elements: Vec<Option<Node>>,
    },
    TaggedTemplateExpression {
        tag: Box<Node>,
        quasi: Box<Node>,
    },
    TemplateLiteral {
        quasis: Vec<Node>,
        expressions: Vec<Node>,
    },
    TemplateElement {
        value: TemplateChunk,
        #[serde(default)]
        tail: bool,
    },
    ObjectPattern {
        #[serde(default)]
        properties: Vec<Node>,
    },

    // ── TypeScript annotation carriers ───────────────────────────────────
    TSTypeAnnotation {
        #[serde(rename = "typeAnnotation")]
        type_annotation: Box<Node>,
    },
    TSNumberKeyword {},
    TSStringKeyword {},
    TSBooleanKeyword {},
    TSAnyKeyword {},

    /// Any node kind the generator does not understand, `TS…` statements
    /// included.  Skipped silently.
    #[serde(other)]
    Unknown,
}

/// The payload of a `Literal` node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LitValue {
    Bool(bool),
    Num(f64),
    Str(String),
    #[default]
    Null,
}

/// The `regex` field of a regex `Literal`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegexLiteral {
    pub pattern: String,
    #[serde(default)]
    pub flags: String,
}

/// The `value` field of a `TemplateElement`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateChunk {
    pub raw: String,
    #[serde(default)]
    pub cooked: Option<String>,
}

impl Node {
    /// Build a plain identifier.
    pub fn ident(name: impl Into<String>) -> Node {
        Node::Identifier {
            name: name.into(),
            type_annotation: None,
        }
    }

    /// Build a number literal.
    pub fn num(value: f64) -> Node {
        Node::Literal {
            value: LitValue::Num(value),
            raw: None,
            regex: None,
        }
    }

    /// Build a string literal.
    pub fn str(value: impl Into<String>) -> Node {
        Node::Literal {
            value: LitValue::Str(value.into()),
            raw: None,
            regex: None,
        }
    }

    /// The identifier name, if this node is an `Identifier`.
    pub fn ident_name(&self) -> Option<&str> {
        match self {
            Node::Identifier { name, .. } => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_estree_json() {
        let src = r#"{
            "type": "Program",
            "start": 0,
            "end": 8,
            "body": [
                {
                    "type": "ExpressionStatement",
                    "expression": {
                        "type": "BinaryExpression",
                        "operator": "+",
                        "left": { "type": "Literal", "value": 1, "raw": "1" },
                        "right": { "type": "Literal", "value": 2, "raw": "2" }
                    }
                }
            ]
        }"#;
        let node: Node = serde_json::from_str(src).expect("parse failed");
        match node {
            Node::Program { body } => assert_eq!(body.len(), 1),
            other => panic!("expected Program, got {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_collapses() {
        let src = r#"{ "type": "TSInterfaceDeclaration", "id": { "type": "Identifier", "name": "X" } }"#;
        let node: Node = serde_json::from_str(src).expect("parse failed");
        assert_eq!(node, Node::Unknown);
    }

    #[test]
    fn literal_values() {
        let n: Node = serde_json::from_str(r#"{ "type": "Literal", "value": true }"#).unwrap();
        assert_eq!(
            n,
            Node::Literal {
                value: LitValue::Bool(true),
                raw: None,
                regex: None
            }
        );

        let n: Node = serde_json::from_str(r#"{ "type": "Literal", "value": null }"#).unwrap();
        match n {
            Node::Literal { value, .. } => assert_eq!(value, LitValue::Null),
            other => panic!("expected Literal, got {other:?}"),
        }
    }

    #[test]
    fn regex_literal() {
        let src = r#"{ "type": "Literal", "value": null, "regex": { "pattern": "a+", "flags": "g" } }"#;
        let n: Node = serde_json::from_str(src).unwrap();
        match n {
            Node::Literal { regex: Some(r), .. } => {
                assert_eq!(r.pattern, "a+");
                assert_eq!(r.flags, "g");
            }
            other => panic!("expected regex Literal, got {other:?}"),
        }
    }

    #[test]
    fn type_annotation_consumed() {
        let src = r#"{
            "type": "Identifier",
            "name": "x",
            "typeAnnotation": {
                "type": "TSTypeAnnotation",
                "typeAnnotation": { "type": "TSNumberKeyword" }
            }
        }"#;
        let n: Node = serde_json::from_str(src).unwrap();
        match n {
            Node::Identifier {
                type_annotation: Some(ann),
                ..
            } => match *ann {
                Node::TSTypeAnnotation { type_annotation } => {
                    assert_eq!(*type_annotation, Node::TSNumberKeyword {});
                }
                other => panic!("expected TSTypeAnnotation, got {other:?}"),
            },
            other => panic!("expected annotated Identifier, got {other:?}"),
        }
    }
}
