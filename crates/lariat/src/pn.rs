use std::fmt;
use std::io::{self, Write};

use serde_json::Value;

use crate::ast::{AttributeOp, Expr, Parameter, VariableName};

/// Symbolic form of an AST node: atoms, tagged lists, plain lists, and
/// ordered string-keyed mappings. The textual rendering is canonical
/// and stable; the JSON rendering mirrors it structurally.
#[derive(Debug, Clone, PartialEq)]
pub enum Pn {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// `(tag arg …)`
    Call(String, Vec<Pn>),
    /// `[e …]`
    List(Vec<Pn>),
    /// `{:key v …}` with insertion order preserved.
    Map(Vec<(String, Pn)>),
}

impl Pn {
    pub fn call(tag: &str, args: Vec<Pn>) -> Pn {
        Pn::Call(tag.to_string(), args)
    }

    pub fn format(&self, out: &mut String) {
        match self {
            Pn::Nil => out.push_str("nil"),
            Pn::Bool(v) => out.push_str(if *v { "true" } else { "false" }),
            Pn::Int(v) => out.push_str(&v.to_string()),
            Pn::Float(v) => out.push_str(&format_float(*v)),
            Pn::Str(s) => quote_into(s, out),
            Pn::Call(tag, args) => {
                out.push('(');
                out.push_str(tag);
                for arg in args {
                    out.push(' ');
                    arg.format(out);
                }
                out.push(')');
            }
            Pn::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    item.format(out);
                }
                out.push(']');
            }
            Pn::Map(entries) => {
                out.push('{');
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    out.push(':');
                    out.push_str(key);
                    out.push(' ');
                    value.format(out);
                }
                out.push('}');
            }
        }
    }

    /// JSON rendering: atoms map to primitives, a tagged list becomes an
    /// array led by its tag, and a mapping becomes an object that keeps
    /// insertion order.
    pub fn to_data(&self) -> Value {
        match self {
            Pn::Nil => Value::Null,
            Pn::Bool(v) => Value::Bool(*v),
            Pn::Int(v) => Value::from(*v),
            Pn::Float(v) => Value::from(*v),
            Pn::Str(s) => Value::String(s.clone()),
            Pn::Call(tag, args) => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(tag.clone()));
                items.extend(args.iter().map(Pn::to_data));
                Value::Array(items)
            }
            Pn::List(items) => Value::Array(items.iter().map(Pn::to_data).collect()),
            Pn::Map(entries) => {
                let mut map = serde_json::Map::new();
                for (key, value) in entries {
                    map.insert(key.clone(), value.to_data());
                }
                Value::Object(map)
            }
        }
    }
}

impl fmt::Display for Pn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.format(&mut out);
        f.write_str(&out)
    }
}

/// Emit the JSON rendering of an expression's PN form. HTML characters
/// are never escaped.
pub fn encode<W: Write>(expr: &Expr, mut out: W) -> io::Result<()> {
    serde_json::to_writer(&mut out, &expr.to_pn().to_data())?;
    out.write_all(b"\n")
}

/// Shortest round-trip decimal, switching to exponent form when the
/// decimal exponent leaves [-4, 21) or when the plain rendering would
/// not read back as a float.
fn format_float(value: f64) -> String {
    let sci = format!("{value:e}");
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m.to_string(), e.parse::<i32>().unwrap_or(0)),
        None => (sci.clone(), 0),
    };
    let exponent_form = {
        let (sign, abs) = if exp < 0 { ('-', -exp) } else { ('+', exp) };
        format!("{mantissa}e{sign}{abs:02}")
    };
    if !(-4..21).contains(&exp) {
        return exponent_form;
    }
    let plain = format!("{value}");
    if plain.contains('.') {
        plain
    } else {
        exponent_form
    }
}

fn quote_into(s: &str, out: &mut String) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if (c as u32) < 0x20 || (c as u32) == 0x7f => {
                out.push_str(&format!("\\o{:03o}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn body_list(body: &[Expr]) -> Pn {
    Pn::List(body.iter().map(Expr::to_pn).collect())
}

fn param_map(param: &Parameter) -> Pn {
    let mut entries = Vec::new();
    if let Some(type_expr) = &param.type_expr {
        entries.push(("type".to_string(), type_expr.to_pn()));
    }
    if param.splat {
        entries.push(("splat".to_string(), Pn::Bool(true)));
    }
    if let Some(value) = &param.value {
        entries.push(("value".to_string(), value.to_pn()));
    }
    Pn::Map(entries)
}

fn params_entry(params: &Option<Vec<Parameter>>) -> Option<(String, Pn)> {
    let params = params.as_ref()?;
    if params.is_empty() {
        return None;
    }
    let entries = params
        .iter()
        .map(|p| (p.name.clone(), param_map(p)))
        .collect();
    Some(("params".to_string(), Pn::Map(entries)))
}

fn op_pn(op: &AttributeOp) -> Pn {
    match op {
        AttributeOp::Regular { op, name, value, .. } => {
            Pn::call(op, vec![Pn::Str(name.clone()), value.to_pn()])
        }
        AttributeOp::Splat { value, .. } => Pn::call("splat-hash", vec![value.to_pn()]),
    }
}

fn ops_list(ops: &[AttributeOp]) -> Pn {
    Pn::List(ops.iter().map(op_pn).collect())
}

/// Node matches and definition parents render as their string value
/// when they are literal strings.
fn name_pn(expr: &Expr) -> Pn {
    match expr {
        Expr::LiteralString { value, .. } => Pn::Str(value.clone()),
        other => other.to_pn(),
    }
}

impl Expr {
    pub fn to_pn(&self) -> Pn {
        use Expr::*;
        match self {
            Block { statements, .. } => {
                Pn::call("block", statements.iter().map(Expr::to_pn).collect())
            }

            LiteralInteger { value, radix, .. } => {
                if *radix == 10 {
                    Pn::Int(*value)
                } else {
                    Pn::call(
                        "int",
                        vec![Pn::Map(vec![
                            ("radix".to_string(), Pn::Int(i64::from(*radix))),
                            ("value".to_string(), Pn::Int(*value)),
                        ])],
                    )
                }
            }
            LiteralFloat { value, .. } => Pn::Float(*value),
            LiteralBoolean { value, .. } => Pn::Bool(*value),
            LiteralUndef { .. } => Pn::Nil,
            LiteralDefault { .. } => Pn::call("default", vec![]),
            LiteralString { value, .. } => Pn::Str(value.clone()),
            Regexp { pattern, .. } => Pn::call("regexp", vec![Pn::Str(pattern.clone())]),

            QualifiedName { name, .. } => Pn::call("qn", vec![Pn::Str(name.clone())]),
            QualifiedReference { name, .. } => Pn::call("qr", vec![Pn::Str(name.clone())]),
            ReservedWord { word, .. } => Pn::call("reserved", vec![Pn::Str(word.clone())]),
            Variable { name, .. } => match name {
                VariableName::Name(n) => Pn::call("var", vec![Pn::Str(n.clone())]),
                VariableName::Index(i) => Pn::call("var", vec![Pn::Int(*i)]),
            },

            ConcatString { segments, .. } => {
                Pn::call("concat", segments.iter().map(Expr::to_pn).collect())
            }
            Text { expr, .. } => Pn::call("str", vec![expr.to_pn()]),
            Heredoc { text, syntax, .. } => {
                let mut entries = Vec::new();
                if !syntax.is_empty() {
                    entries.push(("syntax".to_string(), Pn::Str(syntax.clone())));
                }
                entries.push(("text".to_string(), text.to_pn()));
                Pn::call("heredoc", vec![Pn::Map(entries)])
            }

            Array { elements, .. } => {
                Pn::call("array", elements.iter().map(Expr::to_pn).collect())
            }
            Hash { entries, .. } => Pn::call("hash", entries.iter().map(Expr::to_pn).collect()),
            KeyedEntry { key, value, .. } => Pn::call("=>", vec![key.to_pn(), value.to_pn()]),

            Unary { op, expr, .. } => Pn::call(op, vec![expr.to_pn()]),
            Binary { op, left, right, .. } => Pn::call(op, vec![left.to_pn(), right.to_pn()]),
            Paren { expr, .. } => Pn::call("paren", vec![expr.to_pn()]),

            Access { receiver, keys, .. } => {
                let mut args = vec![receiver.to_pn()];
                args.extend(keys.iter().map(Expr::to_pn));
                Pn::call("access", args)
            }
            Call { functor, args, lambda, statement, .. } => {
                let tag = if *statement { "invoke" } else { "call" };
                let mut entries = vec![
                    ("functor".to_string(), functor.to_pn()),
                    ("args".to_string(), body_list(args)),
                ];
                if let Some(lambda) = lambda {
                    entries.push(("block".to_string(), lambda.to_pn()));
                }
                Pn::call(tag, vec![Pn::Map(entries)])
            }
            MethodCall { receiver, name, args, lambda, .. } => {
                let functor = Pn::call(".", vec![receiver.to_pn(), name.to_pn()]);
                let mut entries = vec![
                    ("functor".to_string(), functor),
                    ("args".to_string(), body_list(args)),
                ];
                if let Some(lambda) = lambda {
                    entries.push(("block".to_string(), lambda.to_pn()));
                }
                Pn::call("call-method", vec![Pn::Map(entries)])
            }
            Lambda { params, returns, body, .. } => {
                let mut entries = Vec::new();
                entries.extend(params_entry(params));
                if let Some(returns) = returns {
                    entries.push(("returns".to_string(), returns.to_pn()));
                }
                entries.push(("body".to_string(), body_list(body)));
                Pn::call("lambda", vec![Pn::Map(entries)])
            }

            If { test, then, else_, .. } | Unless { test, then, else_, .. } => {
                let tag = if matches!(self, If { .. }) { "if" } else { "unless" };
                let mut entries = vec![
                    ("test".to_string(), test.to_pn()),
                    ("then".to_string(), body_list(then)),
                ];
                if let Some(else_) = else_ {
                    entries.push(("else".to_string(), body_list(else_)));
                }
                Pn::call(tag, vec![Pn::Map(entries)])
            }
            Case { test, options, .. } => {
                let opts = options
                    .iter()
                    .map(|option| {
                        Pn::Map(vec![
                            ("when".to_string(), body_list(&option.values)),
                            ("then".to_string(), body_list(&option.then)),
                        ])
                    })
                    .collect();
                Pn::call("case", vec![test.to_pn(), Pn::List(opts)])
            }
            Selector { lhs, entries, .. } => {
                Pn::call("?", vec![lhs.to_pn(), body_list(entries)])
            }

            Resource { form, type_expr, bodies, .. } => {
                let body_maps = bodies
                    .iter()
                    .map(|body| {
                        Pn::Map(vec![
                            ("title".to_string(), body.title.to_pn()),
                            ("ops".to_string(), ops_list(&body.ops)),
                        ])
                    })
                    .collect();
                let mut entries = vec![
                    ("type".to_string(), type_expr.to_pn()),
                    ("bodies".to_string(), Pn::List(body_maps)),
                ];
                if let Some(label) = form.label() {
                    entries.push(("form".to_string(), Pn::Str(label.to_string())));
                }
                Pn::call("resource", vec![Pn::Map(entries)])
            }
            ResourceDefaults { form, type_expr, ops, .. } => {
                let mut entries = vec![
                    ("type".to_string(), type_expr.to_pn()),
                    ("ops".to_string(), ops_list(ops)),
                ];
                if let Some(label) = form.label() {
                    entries.push(("form".to_string(), Pn::Str(label.to_string())));
                }
                Pn::call("resource-defaults", vec![Pn::Map(entries)])
            }
            ResourceOverride { form, resources, ops, .. } => {
                let mut entries = vec![
                    ("resources".to_string(), resources.to_pn()),
                    ("ops".to_string(), ops_list(ops)),
                ];
                if let Some(label) = form.label() {
                    entries.push(("form".to_string(), Pn::Str(label.to_string())));
                }
                Pn::call("resource-override", vec![Pn::Map(entries)])
            }
            Collect { type_expr, query, ops, .. } => {
                let mut entries = vec![
                    ("type".to_string(), type_expr.to_pn()),
                    ("query".to_string(), query.to_pn()),
                ];
                if !ops.is_empty() {
                    entries.push(("ops".to_string(), ops_list(ops)));
                }
                Pn::call("collect", vec![Pn::Map(entries)])
            }
            VirtualQuery { expr, .. } => {
                Pn::call("virtual-query", expr.iter().map(|e| e.to_pn()).collect())
            }
            ExportedQuery { expr, .. } => {
                Pn::call("exported-query", expr.iter().map(|e| e.to_pn()).collect())
            }

            CapabilityMapping { kind, component, capability, ops, .. } => {
                let mut list = vec![Pn::Str(capability.clone())];
                list.extend(ops.iter().map(op_pn));
                Pn::call(kind, vec![component.to_pn(), Pn::List(list)])
            }

            Function { name, params, body, returns, .. } => {
                let mut entries = vec![("name".to_string(), Pn::Str(name.clone()))];
                entries.extend(params_entry(params));
                entries.push(("body".to_string(), body_list(body)));
                if let Some(returns) = returns {
                    entries.push(("returns".to_string(), returns.to_pn()));
                }
                Pn::call("function", vec![Pn::Map(entries)])
            }
            Plan { name, params, body, .. } => {
                let mut entries = vec![("name".to_string(), Pn::Str(name.clone()))];
                entries.extend(params_entry(params));
                entries.push(("body".to_string(), body_list(body)));
                Pn::call("plan", vec![Pn::Map(entries)])
            }
            Class { name, parent, params, body, .. } => {
                let mut entries = vec![("name".to_string(), Pn::Str(name.clone()))];
                if let Some(parent) = parent {
                    entries.push(("parent".to_string(), Pn::Str(parent.clone())));
                }
                entries.extend(params_entry(params));
                entries.push(("body".to_string(), body_list(body)));
                Pn::call("class", vec![Pn::Map(entries)])
            }
            Define { name, params, body, .. } => {
                let mut entries = vec![("name".to_string(), Pn::Str(name.clone()))];
                entries.extend(params_entry(params));
                entries.push(("body".to_string(), body_list(body)));
                Pn::call("define", vec![Pn::Map(entries)])
            }
            Node { matches, parent, body, .. } => {
                let mut entries = vec![(
                    "matches".to_string(),
                    Pn::List(matches.iter().map(name_pn).collect()),
                )];
                if let Some(parent) = parent {
                    entries.push(("parent".to_string(), name_pn(parent)));
                }
                entries.push(("body".to_string(), body_list(body)));
                Pn::call("node", vec![Pn::Map(entries)])
            }
            Site { body, .. } => Pn::call("site", body.iter().map(Expr::to_pn).collect()),
            Application { name, params, body, .. } => {
                let mut entries = vec![("name".to_string(), Pn::Str(name.clone()))];
                entries.extend(params_entry(params));
                entries.push(("body".to_string(), body_list(body)));
                Pn::call("application", vec![Pn::Map(entries)])
            }
            Activity { name, style, properties, definition, .. } => {
                let mut entries = vec![
                    ("name".to_string(), Pn::Str(name.clone())),
                    ("style".to_string(), Pn::Str(style.to_string())),
                ];
                if let Some(properties) = properties {
                    entries.push(("properties".to_string(), properties.to_pn()));
                }
                if let Some(definition) = definition {
                    entries.push(("definition".to_string(), definition.to_pn()));
                }
                Pn::call("activity", vec![Pn::Map(entries)])
            }
            TypeAlias { name, value, .. } => {
                Pn::call("type-alias", vec![Pn::Str(name.clone()), value.to_pn()])
            }
            TypeDefinition { name, parent, body, .. } => Pn::call(
                "type-definition",
                vec![
                    Pn::Str(name.clone()),
                    Pn::Str(parent.clone()),
                    Pn::call("block", body.iter().map(Expr::to_pn).collect()),
                ],
            ),
            TypeMapping { mapping, value, .. } => {
                Pn::call("type-mapping", vec![mapping.to_pn(), value.to_pn()])
            }

            ParameterExpr { param, .. } => {
                let mut entries = vec![("name".to_string(), Pn::Str(param.name.clone()))];
                if let Some(type_expr) = &param.type_expr {
                    entries.push(("type".to_string(), type_expr.to_pn()));
                }
                if let Some(value) = &param.value {
                    entries.push(("value".to_string(), value.to_pn()));
                }
                Pn::call("param", vec![Pn::Map(entries)])
            }

            Epp { body, .. } => Pn::call("epp", body.iter().map(Expr::to_pn).collect()),
            RenderString { value, .. } => Pn::call("render-s", vec![Pn::Str(value.clone())]),
            Render { expr, .. } => Pn::call("render", vec![expr.to_pn()]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Span;

    #[test]
    fn floats_render_in_go_compatible_form() {
        assert_eq!(format_float(42.0), "4.2e+01");
        assert_eq!(format_float(23.5), "23.5");
        assert_eq!(format_float(0.123), "0.123");
        assert_eq!(format_float(12e12), "1.2e+13");
        assert_eq!(format_float(12.23e12), "1.223e+13");
        assert_eq!(format_float(12e-12), "1.2e-11");
        assert_eq!(format_float(-123.32), "-123.32");
    }

    #[test]
    fn strings_escape_control_characters_as_octal() {
        let pn = Pn::Str("control \u{14}".to_string());
        assert_eq!(pn.to_string(), "\"control \\o024\"");
        let pn = Pn::Str("x\u{1f452}y".to_string());
        assert_eq!(pn.to_string(), "\"x\u{1f452}y\"");
    }

    #[test]
    fn radix_integers_render_as_int_maps() {
        let expr = Expr::LiteralInteger {
            value: 2748,
            radix: 16,
            span: Span::new(0, 5),
        };
        assert_eq!(expr.to_pn().to_string(), "(int {:radix 16 :value 2748})");
    }

    #[test]
    fn data_form_keeps_tag_first_and_map_order() {
        let pn = Pn::call(
            "heredoc",
            vec![Pn::Map(vec![
                ("syntax".to_string(), Pn::Str("json".to_string())),
                ("text".to_string(), Pn::Str("x".to_string())),
            ])],
        );
        let data = serde_json::to_string(&pn.to_data()).expect("serialize");
        assert_eq!(data, r#"["heredoc",{"syntax":"json","text":"x"}]"#);
    }
}
