//! Pre-lowering AST rewrite: collapse known member accesses into flat
//! identifiers.
//!
//! Every non-computed, non-optional `MemberExpression` whose object is (or
//! rewrites into) an `Identifier` and whose property is not `length` becomes
//! a single `Identifier` named `__<object>_<property>`.  This binds reserved
//! namespaces (`Math.sqrt` → `__Math_sqrt`) and prototype-method spellings
//! (`a.push` → `__a_push`) at compile time.  The rewrite is only sound for
//! reserved namespaces and registered prototype methods; member access on
//! arbitrary user objects is unsupported.  `.length` is left intact so the
//! length read keeps its memory semantics.  The rewrite is idempotent.

use tarn_types::Node;

/// Rewrite a tree in place.
pub fn object_hack(node: &mut Node) {
    walk_children(node);

    if let Node::MemberExpression {
        object,
        property,
        computed: false,
        optional: false,
    } = node
    {
        let prop = match property.ident_name() {
            Some(p) if p != "length" => p.to_string(),
            _ => return,
        };
        if let Some(obj) = object.ident_name() {
            *node = Node::ident(format!("__{obj}_{prop}"));
        }
    }
}

/// Recurse into every child position.
fn walk_children(node: &mut Node) {
    match node {
        Node::Program { body } | Node::BlockStatement { body } => {
            for n in body {
                object_hack(n);
            }
        }
        Node::ExpressionStatement { expression } => object_hack(expression),
        Node::VariableDeclaration { declarations, .. } => {
            for n in declarations {
                object_hack(n);
            }
        }
        Node::VariableDeclarator { id, init } => {
            object_hack(id);
            if let Some(init) = init {
                object_hack(init);
            }
        }
        Node::FunctionDeclaration { params, body, .. }
        | Node::FunctionExpression { params, body, .. }
        | Node::ArrowFunctionExpression { params, body, .. } => {
            for n in params {
                object_hack(n);
            }
            object_hack(body);
        }
        Node::ReturnStatement { argument } => {
            if let Some(a) = argument {
                object_hack(a);
            }
        }
        Node::IfStatement {
            test,
            consequent,
            alternate,
        } => {
            object_hack(test);
            object_hack(consequent);
            if let Some(a) = alternate {
                object_hack(a);
            }
        }
        Node::ForStatement {
            init,
            test,
            update,
            body,
        } => {
            if let Some(n) = init {
                object_hack(n);
            }
            if let Some(n) = test {
                object_hack(n);
            }
            if let Some(n) = update {
                object_hack(n);
            }
            object_hack(body);
        }
        Node::WhileStatement { test, body } => {
            object_hack(test);
            object_hack(body);
        }
        Node::ForOfStatement { left, right, body } => {
            object_hack(left);
            object_hack(right);
            object_hack(body);
        }
        Node::TryStatement {
            block,
            handler,
            finalizer,
        } => {
            object_hack(block);
            if let Some(h) = handler {
                object_hack(h);
            }
            if let Some(f) = finalizer {
                object_hack(f);
            }
        }
        Node::CatchClause { param, body } => {
            if let Some(p) = param {
                object_hack(p);
            }
            object_hack(body);
        }
        Node::ThrowStatement { argument } => object_hack(argument),
        Node::ExportNamedDeclaration { declaration } => {
            if let Some(d) = declaration {
                object_hack(d);
            }
        }
        Node::BinaryExpression { left, right, .. }
        | Node::LogicalExpression { left, right, .. }
        | Node::AssignmentExpression { left, right, .. } => {
            object_hack(left);
            object_hack(right);
        }
        Node::UnaryExpression { argument, .. } | Node::UpdateExpression { argument, .. } => {
            object_hack(argument)
        }
        Node::ConditionalExpression {
            test,
            consequent,
            alternate,
        } => {
            object_hack(test);
            object_hack(consequent);
            object_hack(alternate);
        }
        Node::MemberExpression {
            object, property, ..
        } => {
            object_hack(object);
            object_hack(property);
        }
        Node::CallExpression {
            callee, arguments, ..
        }
        | Node::NewExpression { callee, arguments } => {
            object_hack(callee);
            for a in arguments {
                object_hack(a);
            }
        }
        Node::ArrayExpression { elements } => {
            for e in elements.iter_mut().flatten() {
                object_hack(e);
            }
        }
        Node::TaggedTemplateExpression { tag, quasi } => {
            object_hack(tag);
            object_hack(quasi);
        }
        Node::TemplateLiteral { expressions, .. } => {
            for e in expressions {
                object_hack(e);
            }
        }
        Node::ObjectPattern { properties } => {
            for p in properties {
                object_hack(p);
            }
        }
        // Leaves and skipped kinds.
        Node::EmptyStatement {}
        | Node::BreakStatement { .. }
        | Node::ContinueStatement { .. }
        | Node::DebuggerStatement {}
        | Node::Identifier { .. }
        | Node::Literal { .. }
        | Node::TemplateElement { .. }
        | Node::TSTypeAnnotation { .. }
        | Node::TSNumberKeyword {}
        | Node::TSStringKeyword {}
        | Node::TSBooleanKeyword {}
        | Node::TSAnyKeyword {}
        | Node::Unknown => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(object: Node, property: &str) -> Node {
        Node::MemberExpression {
            object: Box::new(object),
            property: Box::new(Node::ident(property)),
            computed: false,
            optional: false,
        }
    }

    #[test]
    fn rewrites_namespace_member() {
        let mut n = member(Node::ident("Math"), "sqrt");
        object_hack(&mut n);
        assert_eq!(n, Node::ident("__Math_sqrt"));
    }

    #[test]
    fn rewrites_nested_chain() {
        let mut n = member(member(Node::ident("a"), "b"), "c");
        object_hack(&mut n);
        assert_eq!(n, Node::ident("____a_b_c"));
    }

    #[test]
    fn preserves_length() {
        let mut n = member(Node::ident("a"), "length");
        let before = n.clone();
        object_hack(&mut n);
        assert_eq!(n, before);
    }

    #[test]
    fn preserves_computed_and_optional() {
        let mut computed = Node::MemberExpression {
            object: Box::new(Node::ident("a")),
            property: Box::new(Node::ident("i")),
            computed: true,
            optional: false,
        };
        let before = computed.clone();
        object_hack(&mut computed);
        assert_eq!(computed, before);

        let mut optional = Node::MemberExpression {
            object: Box::new(Node::ident("a")),
            property: Box::new(Node::ident("b")),
            computed: false,
            optional: true,
        };
        let before = optional.clone();
        object_hack(&mut optional);
        assert_eq!(optional, before);
    }

    #[test]
    fn idempotent() {
        let mut n = Node::CallExpression {
            callee: Box::new(member(Node::ident("Math"), "sqrt")),
            arguments: vec![member(Node::ident("a"), "length")],
            optional: false,
        };
        object_hack(&mut n);
        let once = n.clone();
        object_hack(&mut n);
        assert_eq!(n, once);
    }
}
