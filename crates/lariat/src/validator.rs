pub mod issues;

use serde::Serialize;

use crate::ast::{AttributeOp, Expr, Program, VariableName};
use crate::location::Span;

pub use issues::Severity;

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatorOptions {
    /// Compiling for tasks: catalog-producing forms are rejected.
    pub tasks: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub code: &'static str,
    pub severity: Severity,
    pub message: String,
    pub span: Span,
}

impl Issue {
    pub fn is_hard(&self) -> bool {
        self.severity == Severity::Hard
    }
}

/// Walk the program and collect issues. Hard issues make the program
/// invalid; soft issues only warn. The traversal never stops early.
pub fn validate(program: &Program, options: ValidatorOptions) -> Vec<Issue> {
    let mut checker = Checker {
        options,
        issues: Vec::new(),
    };
    checker.check(&program.body, Context::Statement);
    checker.issues
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    Statement,
    Rvalue,
}

struct Checker {
    options: ValidatorOptions,
    issues: Vec<Issue>,
}

impl Checker {
    fn accept(&mut self, code: &'static str, span: Span, args: &[&str]) {
        self.issues.push(Issue {
            code,
            severity: issues::severity(code),
            message: issues::message(code, args),
            span,
        });
    }

    fn check(&mut self, expr: &Expr, ctx: Context) {
        use Expr::*;
        match expr {
            Block { statements, .. } => {
                let last = statements.len().saturating_sub(1);
                for (i, statement) in statements.iter().enumerate() {
                    if i != last && is_idem(statement) {
                        self.accept(
                            issues::VALIDATE_IDEM_EXPRESSION_NOT_LAST,
                            statement.span(),
                            &[statement.label()],
                        );
                    }
                    self.check(statement, Context::Statement);
                }
            }

            Binary { op, left, right, span } => match *op {
                "=" => {
                    self.check_assign(left, *span);
                    self.check(left, Context::Rvalue);
                    self.check(right, Context::Rvalue);
                }
                "+=" | "-=" => {
                    self.accept(
                        issues::VALIDATE_APPENDS_DELETES_NO_LONGER_SUPPORTED,
                        *span,
                        &[*op],
                    );
                    self.check_assign(left, *span);
                    self.check(left, Context::Rvalue);
                    self.check(right, Context::Rvalue);
                }
                "->" | "~>" | "<-" | "<~" => {
                    if self.options.tasks {
                        self.accept(
                            issues::VALIDATE_CATALOG_OPERATION_NOT_SUPPORTED,
                            *span,
                            &["a relationship operation"],
                        );
                    }
                    self.check(left, Context::Statement);
                    self.check(right, Context::Statement);
                }
                _ => {
                    self.check(left, Context::Rvalue);
                    self.check(right, Context::Rvalue);
                }
            },
            Unary { expr, .. } | Paren { expr, .. } | Text { expr, .. } => {
                self.check(expr, Context::Rvalue);
            }

            Case { test, options, span, .. } => {
                self.check(test, Context::Rvalue);
                let mut defaults = 0;
                for option in options {
                    for value in &option.values {
                        if matches!(value, LiteralDefault { .. }) {
                            defaults += 1;
                        }
                        self.check(value, Context::Rvalue);
                    }
                    for statement in &option.then {
                        self.check(statement, Context::Statement);
                    }
                }
                if defaults > 1 {
                    self.accept(issues::VALIDATE_DUPLICATE_DEFAULT, *span, &["case expression"]);
                }
            }
            Selector { lhs, entries, span } => {
                self.check(lhs, Context::Rvalue);
                let mut defaults = 0;
                for entry in entries {
                    if let KeyedEntry { key, value, .. } = entry {
                        if matches!(key.as_ref(), LiteralDefault { .. }) {
                            defaults += 1;
                        }
                        self.check(key, Context::Rvalue);
                        self.check(value, Context::Rvalue);
                    }
                }
                if defaults > 1 {
                    self.accept(
                        issues::VALIDATE_DUPLICATE_DEFAULT,
                        *span,
                        &["selector expression"],
                    );
                }
            }

            Resource { type_expr, bodies, span, .. } => {
                self.catalog_operation("a resource expression", *span);
                self.check(type_expr, Context::Rvalue);
                for body in bodies {
                    self.check(&body.title, Context::Rvalue);
                    self.check_ops(&body.ops, "a resource expression", false);
                }
            }
            ResourceDefaults { type_expr, ops, span, .. } => {
                self.catalog_operation("a resource defaults expression", *span);
                self.check(type_expr, Context::Rvalue);
                self.check_ops(ops, "a resource defaults expression", false);
            }
            ResourceOverride { resources, ops, span, .. } => {
                self.catalog_operation("a resource override", *span);
                self.check(resources, Context::Rvalue);
                self.check_ops(ops, "a resource override", true);
            }
            Collect { type_expr, query, ops, span } => {
                self.catalog_operation("a collect expression", *span);
                self.check(type_expr, Context::Rvalue);
                self.check(query, Context::Rvalue);
                self.check_ops(ops, "a collect expression", true);
            }
            VirtualQuery { expr, .. } | ExportedQuery { expr, .. } => {
                if let Some(expr) = expr {
                    self.check(expr, Context::Rvalue);
                }
            }
            CapabilityMapping { component, ops, .. } => {
                self.check(component, Context::Rvalue);
                self.check_ops(ops, "a capability mapping", false);
            }

            Class { body, span, .. } => {
                self.definition(expr, ctx);
                self.catalog_operation("a class definition", *span);
                self.check_body(body);
            }
            Define { body, span, .. } => {
                self.definition(expr, ctx);
                self.catalog_operation("a resource type definition", *span);
                self.check_body(body);
            }
            Node { matches, parent, body, span } => {
                self.definition(expr, ctx);
                self.catalog_operation("a node definition", *span);
                for m in matches {
                    self.check(m, Context::Rvalue);
                }
                if let Some(parent) = parent {
                    self.check(parent, Context::Rvalue);
                }
                self.check_body(body);
            }
            Site { body, span } => {
                self.definition(expr, ctx);
                self.catalog_operation("a site definition", *span);
                self.check_body(body);
            }
            Function { body, .. } | Plan { body, .. } | Application { body, .. } => {
                self.definition(expr, ctx);
                self.check_body(body);
            }
            Activity { properties, definition, .. } => {
                self.definition(expr, ctx);
                if let Some(properties) = properties {
                    self.check(properties, Context::Rvalue);
                }
                if let Some(definition) = definition {
                    self.check(definition, Context::Statement);
                }
            }
            TypeAlias { value, .. } => {
                self.definition(expr, ctx);
                self.check(value, Context::Rvalue);
            }
            TypeDefinition { body, .. } => {
                self.definition(expr, ctx);
                self.check_body(body);
            }
            TypeMapping { mapping, value, .. } => {
                self.definition(expr, ctx);
                self.check(mapping, Context::Rvalue);
                self.check(value, Context::Rvalue);
            }

            QualifiedReference { name, span } => {
                let valid = name
                    .trim_start_matches("::")
                    .split("::")
                    .all(|seg| seg.chars().next().is_some_and(|c| c.is_ascii_uppercase()));
                if !valid {
                    self.accept(issues::VALIDATE_ILLEGAL_CLASSREF, *span, &[name.as_str()]);
                }
            }

            ConcatString { segments, .. } => {
                for segment in segments {
                    self.check(segment, Context::Rvalue);
                }
            }
            Heredoc { text, .. } => self.check(text, Context::Rvalue),
            Array { elements, .. } => {
                for element in elements {
                    self.check(element, Context::Rvalue);
                }
            }
            Hash { entries, .. } => {
                for entry in entries {
                    self.check(entry, Context::Rvalue);
                }
            }
            KeyedEntry { key, value, .. } => {
                self.check(key, Context::Rvalue);
                self.check(value, Context::Rvalue);
            }
            Access { receiver, keys, .. } => {
                self.check(receiver, Context::Rvalue);
                for key in keys {
                    self.check(key, Context::Rvalue);
                }
            }
            Call { functor, args, lambda, .. } => {
                self.check(functor, Context::Rvalue);
                for arg in args {
                    self.check(arg, Context::Rvalue);
                }
                if let Some(lambda) = lambda {
                    self.check(lambda, Context::Rvalue);
                }
            }
            MethodCall { receiver, args, lambda, .. } => {
                self.check(receiver, Context::Rvalue);
                for arg in args {
                    self.check(arg, Context::Rvalue);
                }
                if let Some(lambda) = lambda {
                    self.check(lambda, Context::Rvalue);
                }
            }
            Lambda { params, body, .. } => {
                if let Some(params) = params {
                    for param in params {
                        if let Some(value) = &param.value {
                            self.check(value, Context::Rvalue);
                        }
                    }
                }
                self.check_body(body);
            }
            If { test, then, else_, .. } | Unless { test, then, else_, .. } => {
                self.check(test, Context::Rvalue);
                self.check_body(then);
                if let Some(else_) = else_ {
                    self.check_body(else_);
                }
            }
            Epp { body, .. } => self.check_body(body),
            Render { expr, .. } => self.check(expr, Context::Rvalue),

            _ => {}
        }
    }

    fn check_body(&mut self, body: &[Expr]) {
        for statement in body {
            self.check(statement, Context::Statement);
        }
    }

    fn definition(&mut self, expr: &Expr, ctx: Context) {
        if ctx == Context::Rvalue {
            self.accept(issues::VALIDATE_NOT_RVALUE, expr.span(), &[expr.label()]);
        }
    }

    fn catalog_operation(&mut self, label: &str, span: Span) {
        if self.options.tasks {
            self.accept(issues::VALIDATE_CATALOG_OPERATION_NOT_SUPPORTED, span, &[label]);
        }
    }

    fn check_ops(&mut self, ops: &[AttributeOp], container: &str, append_allowed: bool) {
        for attribute in ops {
            match attribute {
                AttributeOp::Regular { op, name, value, span } => {
                    if *op == "+>" && !append_allowed {
                        self.accept(
                            issues::VALIDATE_ILLEGAL_ATTRIBUTE_APPEND,
                            *span,
                            &[name.as_str(), container],
                        );
                    }
                    self.check(value, Context::Rvalue);
                }
                AttributeOp::Splat { value, .. } => {
                    self.check(value, Context::Rvalue);
                }
            }
        }
    }

    fn check_assign(&mut self, lhs: &Expr, span: Span) {
        match lhs {
            Expr::Variable { name: VariableName::Name(name), .. } => {
                if name.contains("::") {
                    self.accept(
                        issues::VALIDATE_CROSS_SCOPE_ASSIGNMENT,
                        lhs.span(),
                        &[format!("${name}").as_str()],
                    );
                }
            }
            Expr::Variable { name: VariableName::Index(index), .. } => {
                self.accept(
                    issues::VALIDATE_ILLEGAL_NUMERIC_ASSIGNMENT,
                    lhs.span(),
                    &[index.to_string().as_str()],
                );
            }
            Expr::Access { .. } => {
                self.accept(issues::VALIDATE_ILLEGAL_ASSIGNMENT_VIA_INDEX, lhs.span(), &[]);
            }
            Expr::Array { elements, .. } => {
                for element in elements {
                    self.check_assign(element, span);
                }
            }
            other => {
                self.accept(
                    issues::VALIDATE_ILLEGAL_EXPRESSION,
                    other.span(),
                    &[other.label(), "an lvalue", "an assignment expression"],
                );
            }
        }
    }
}

/// Expressions that only produce a value. One of these anywhere but the
/// tail of a block means the value is computed and dropped.
fn is_idem(expr: &Expr) -> bool {
    use Expr::*;
    match expr {
        LiteralInteger { .. }
        | LiteralFloat { .. }
        | LiteralBoolean { .. }
        | LiteralUndef { .. }
        | LiteralDefault { .. }
        | LiteralString { .. }
        | Regexp { .. }
        | QualifiedName { .. }
        | QualifiedReference { .. }
        | ReservedWord { .. }
        | Variable { .. }
        | ConcatString { .. }
        | Heredoc { .. }
        | Array { .. }
        | Hash { .. }
        | KeyedEntry { .. }
        | Access { .. }
        | Selector { .. } => true,
        Paren { expr, .. } => is_idem(expr),
        Unary { expr, .. } => is_idem(expr),
        Binary { op, left, right, .. } => {
            !matches!(*op, "=" | "+=" | "-=" | "->" | "~>" | "<-" | "<~")
                && is_idem(left)
                && is_idem(right)
        }
        If { then, else_, .. } | Unless { then, else_, .. } => {
            then.iter().all(is_idem)
                && else_.as_ref().map(|e| e.iter().all(is_idem)).unwrap_or(true)
        }
        Case { options, .. } => options.iter().all(|o| o.then.iter().all(is_idem)),
        Block { statements, .. } => statements.iter().all(is_idem),
        _ => false,
    }
}
