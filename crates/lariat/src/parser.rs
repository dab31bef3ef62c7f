mod expr;

use crate::ast::{
    AttributeOp, Expr, Parameter, ResourceBody, ResourceForm, VariableName,
};
use crate::error::ParseError;
use crate::lexer::{Lexer, LexerModes};
use crate::location::Span;
use crate::syntax;
use crate::token::{Token, TokenKind, TokenValue};

/// Recursive-descent parser. Statements are dispatched here; the
/// precedence-climbing expression grammar lives in `expr`.
pub(crate) struct Parser<'a> {
    lexer: Lexer<'a>,
    src: &'a [u8],
    file: &'a str,
    modes: LexerModes,
    tok: Token,
    peeked: Option<Token>,
    /// Span of the most recently consumed token.
    prev_span: Span,
    /// Nonzero while parsing positions where a `|` closes a parameter
    /// list rather than opening a trailing lambda.
    no_lambda: u32,
    name_stack: Vec<String>,
}

pub(crate) fn parse_source(
    src: &[u8],
    file: &str,
    modes: LexerModes,
    single_expression: bool,
) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(src, file, modes)?;
    if modes.epp {
        return parser.parse_epp_program();
    }
    if single_expression {
        let expr = parser.parse_expression()?;
        if parser.tok.kind != TokenKind::End {
            return Err(parser.unexpected());
        }
        return Ok(expr);
    }
    let statements = parser.parse_statements(TokenKind::End)?;
    Ok(Expr::Block {
        statements,
        span: Span::new(0, src.len()),
    })
}

impl<'a> Parser<'a> {
    fn new(src: &'a [u8], file: &'a str, modes: LexerModes) -> Result<Self, ParseError> {
        Parser::fragment(src, file, 0, src.len(), modes)
    }

    fn fragment(
        src: &'a [u8],
        file: &'a str,
        start: usize,
        end: usize,
        modes: LexerModes,
    ) -> Result<Self, ParseError> {
        let mut lexer = Lexer::fragment(src, file, start, end, modes);
        let tok = lexer.next_token()?;
        Ok(Parser {
            lexer,
            src,
            file,
            modes,
            tok,
            peeked: None,
            prev_span: Span::new(start, 0),
            no_lambda: 0,
            name_stack: Vec::new(),
        })
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        self.prev_span = self.tok.span;
        self.tok = match self.peeked.take() {
            Some(token) => token,
            None => self.lexer.next_token()?,
        };
        Ok(())
    }

    fn peek(&mut self) -> Result<&Token, ParseError> {
        if self.peeked.is_none() {
            self.peeked = Some(self.lexer.next_token()?);
        }
        Ok(self.peeked.as_ref().expect("peeked token"))
    }

    fn error_at(&self, offset: usize, message: impl Into<String>) -> ParseError {
        ParseError::at(self.src, self.file, offset, message)
    }

    /// Error anchored at the current token's start.
    fn error_token(&self, message: impl Into<String>) -> ParseError {
        self.error_at(self.tok.span.offset, message)
    }

    /// Error anchored at the scanner position following the current
    /// token. Several messages report this position rather than the
    /// token start.
    fn error_here(&self, message: impl Into<String>) -> ParseError {
        self.error_at(self.tok.span.end(), message)
    }

    fn unexpected(&self) -> ParseError {
        self.error_token(format!("unexpected token '{}'", self.tok.kind.display()))
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.tok.kind != kind {
            return Err(self.error_token(format!(
                "expected token '{}', got '{}'",
                kind.display(),
                self.tok.kind.display()
            )));
        }
        let token = self.tok.clone();
        self.advance()?;
        Ok(token)
    }

    fn qualify(&self, name: &str) -> String {
        let base = name.trim_start_matches("::");
        match self.name_stack.last() {
            Some(outer) => format!("{outer}::{base}"),
            None => base.to_string(),
        }
    }

    fn parse_statements(&mut self, terminator: TokenKind) -> Result<Vec<Expr>, ParseError> {
        let mut statements = Vec::new();
        loop {
            if self.tok.kind == terminator || self.tok.kind == TokenKind::End {
                return Ok(statements);
            }
            match self.tok.kind {
                TokenKind::Comma => {
                    return Err(self.error_here("Extraneous comma between statements"));
                }
                TokenKind::Semicolon => self.advance()?,
                _ => statements.push(self.parse_statement()?),
            }
        }
    }

    fn parse_statement(&mut self) -> Result<Expr, ParseError> {
        use TokenKind::*;
        match self.tok.kind {
            KwClass => self.class_statement(),
            KwDefine => self.define_statement(),
            KwNode => self.node_statement(),
            KwSite => self.site_statement(),
            KwPlan => self.plan_definition(),
            KwWorkflow => self.activity_statement("workflow"),
            At | AtAt => self.prefixed_resource(),
            RenderString => self.render_string(),
            RenderExpr => self.render_expression(),
            KwApplication => {
                if self.peek()?.kind == Name {
                    self.application_statement()
                } else {
                    self.expression_statement()
                }
            }
            KwFunction => {
                if self.peek()?.kind == Name {
                    self.function_definition()
                } else {
                    self.expression_statement()
                }
            }
            KwType => {
                if self.peek()?.kind == TypeRef {
                    self.type_statement()
                } else {
                    self.expression_statement()
                }
            }
            Name => {
                if self.modes.workflow && syntax::ACTIVITY_STYLES.contains(&self.tok.text()) {
                    if self.peek()?.kind == Name {
                        let style = match self.tok.text() {
                            "resource" => "resource",
                            "action" => "action",
                            _ => "workflow",
                        };
                        return self.activity_statement(style);
                    }
                } else if syntax::is_statement_call(self.tok.text())
                    && self.statement_call_follows()?
                {
                    return self.statement_call();
                }
                self.expression_statement()
            }
            _ => self.expression_statement(),
        }
    }

    fn expression_statement(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_expression()?;
        self.statement_level(expr)
    }

    /// Statement-style call arguments follow when the next token can
    /// begin an expression and is not an adjacent call parenthesis.
    fn statement_call_follows(&mut self) -> Result<bool, ParseError> {
        use TokenKind::*;
        let name_end = self.tok.span.end();
        let next = self.peek()?;
        if next.kind == LeftParen && next.span.offset == name_end {
            return Ok(false);
        }
        Ok(matches!(
            next.kind,
            Name | TypeRef
                | Variable
                | Integer
                | Float
                | Str
                | InterpolatedStr
                | HeredocTok
                | KwTrue
                | KwFalse
                | KwUndef
                | KwDefault
                | ListStart
                | LeftBrace
                | LeftParen
                | Minus
                | Not
                | Multiply
        ))
    }

    fn statement_call(&mut self) -> Result<Expr, ParseError> {
        let start = self.tok.span;
        let functor = Expr::QualifiedName {
            name: self.tok.text().to_string(),
            span: start,
        };
        self.advance()?;

        if self.tok.kind == TokenKind::LeftBrace {
            let hash = self.hash_literal()?;
            let span = start.through(hash.span());
            return Ok(Expr::Call {
                functor: Box::new(functor),
                args: vec![hash],
                lambda: None,
                statement: true,
                span,
            });
        }

        let mut args = Vec::new();
        loop {
            args.push(self.parse_expression()?);
            if self.tok.kind == TokenKind::Comma {
                self.advance()?;
                continue;
            }
            break;
        }
        let lambda = if self.tok.kind == TokenKind::Pipe {
            Some(Box::new(self.lambda()?))
        } else {
            None
        };
        let end = args.last().map(|a| a.span()).unwrap_or(start);
        Ok(Expr::Call {
            functor: Box::new(functor),
            args,
            lambda,
            statement: true,
            span: start.through(end),
        })
    }

    /// Resource forms, relationship arrows, and the statement-position
    /// call conversion.
    fn statement_level(&mut self, expr: Expr) -> Result<Expr, ParseError> {
        let mut expr = self.maybe_resource(expr, ResourceForm::Regular)?;
        loop {
            let op = match self.tok.kind {
                TokenKind::InEdge => "->",
                TokenKind::InEdgeSub => "~>",
                TokenKind::OutEdge => "<-",
                TokenKind::OutEdgeSub => "<~",
                _ => break,
            };
            self.advance()?;
            let rhs = self.parse_expression()?;
            let rhs = self.maybe_resource(rhs, ResourceForm::Regular)?;
            let span = expr.span().through(rhs.span());
            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(rhs),
                span,
            };
        }
        Ok(Self::to_statement_call(expr))
    }

    fn to_statement_call(expr: Expr) -> Expr {
        match expr {
            Expr::Call {
                functor,
                args,
                lambda,
                statement: false,
                span,
            } if matches!(*functor, Expr::QualifiedName { .. }) => Expr::Call {
                functor,
                args,
                lambda,
                statement: true,
                span,
            },
            other => other,
        }
    }

    /// When the parsed expression is followed by `{`, it may introduce a
    /// resource declaration, resource defaults, or an override.
    fn maybe_resource(&mut self, expr: Expr, form: ResourceForm) -> Result<Expr, ParseError> {
        if self.tok.kind != TokenKind::LeftBrace {
            return Ok(expr);
        }
        match &expr {
            Expr::QualifiedName { .. } => self.resource_declaration(expr, form),
            Expr::QualifiedReference { .. } => self.resource_defaults(expr, form),
            Expr::Access { receiver, .. } => match receiver.as_ref() {
                Expr::QualifiedReference { name, .. } if name == "Resource" => {
                    self.resource_defaults(expr, form)
                }
                Expr::QualifiedReference { .. } => self.resource_override(expr, form),
                _ => Err(self.error_at(expr.span().offset, "invalid resource expression")),
            },
            Expr::LiteralString { .. } | Expr::ConcatString { .. } => {
                Err(self.error_at(expr.span().offset, "invalid resource expression"))
            }
            _ => Ok(expr),
        }
    }

    fn prefixed_resource(&mut self) -> Result<Expr, ParseError> {
        let start = self.tok.span;
        let form = if self.tok.kind == TokenKind::AtAt {
            ResourceForm::Exported
        } else {
            ResourceForm::Virtual
        };
        self.advance()?;
        if self.tok.kind == TokenKind::KwClass && self.peek()?.kind == TokenKind::LeftBrace {
            let functor = Expr::QualifiedName {
                name: "class".to_string(),
                span: self.tok.span,
            };
            self.advance()?;
            return self.resource_declaration(functor, form);
        }
        let expr = self.parse_expression()?;
        if self.tok.kind != TokenKind::LeftBrace {
            return Err(self.error_at(start.offset, "invalid resource expression"));
        }
        self.maybe_resource(expr, form)
    }

    fn resource_declaration(&mut self, type_expr: Expr, form: ResourceForm) -> Result<Expr, ParseError> {
        let start = type_expr.span();
        self.advance()?; // {
        let mut bodies = Vec::new();
        loop {
            if self.tok.kind == TokenKind::RightBrace {
                self.advance()?;
                break;
            }
            if self.tok.kind == TokenKind::End {
                self.expect(TokenKind::RightBrace)?;
            }
            let title = self.parse_expression()?;
            if self.tok.kind != TokenKind::Colon {
                if bodies.is_empty() {
                    if let Expr::QualifiedName { name, .. } = &type_expr {
                        return Err(self.error_at(
                            start.offset,
                            format!(
                                "This expression is invalid. Did you try declaring a '{name}' resource without a title?"
                            ),
                        ));
                    }
                }
                return Err(self.error_at(title.span().offset, "resource title expected"));
            }
            self.advance()?;
            let ops = self.attribute_operations()?;
            let body_span = title.span();
            bodies.push(ResourceBody {
                title,
                ops,
                span: body_span,
            });
            if self.tok.kind == TokenKind::Semicolon {
                self.advance()?;
                continue;
            }
            self.expect(TokenKind::RightBrace)?;
            break;
        }
        let span = start.through(self.prev_span);
        Ok(Expr::Resource {
            form,
            type_expr: Box::new(type_expr),
            bodies,
            span,
        })
    }

    fn resource_defaults(&mut self, type_expr: Expr, form: ResourceForm) -> Result<Expr, ParseError> {
        let start = type_expr.span();
        self.advance()?; // {
        let ops = self.attribute_operations()?;
        self.expect(TokenKind::RightBrace)?;
        let span = start.through(self.prev_span);
        Ok(Expr::ResourceDefaults {
            form,
            type_expr: Box::new(type_expr),
            ops,
            span,
        })
    }

    fn resource_override(&mut self, resources: Expr, form: ResourceForm) -> Result<Expr, ParseError> {
        let start = resources.span();
        self.advance()?; // {
        let ops = self.attribute_operations()?;
        self.expect(TokenKind::RightBrace)?;
        let span = start.through(self.prev_span);
        Ok(Expr::ResourceOverride {
            form,
            resources: Box::new(resources),
            ops,
            span,
        })
    }

    fn attribute_name(&self) -> Option<String> {
        use TokenKind::*;
        match self.tok.kind {
            Name | ReservedWord | KwType | KwFunction | KwApplication | KwConsumes
            | KwProduces | KwSite | KwIn | KwPlan | KwWorkflow => {
                Some(self.tok.text().to_string())
            }
            _ => None,
        }
    }

    fn attribute_operations(&mut self) -> Result<Vec<AttributeOp>, ParseError> {
        let mut ops = Vec::new();
        loop {
            match self.tok.kind {
                TokenKind::RightBrace | TokenKind::Semicolon | TokenKind::End => break,
                TokenKind::Multiply => {
                    let start = self.tok.span;
                    self.advance()?;
                    if self.tok.kind != TokenKind::Arrow {
                        return Err(self.error_here("invalid attribute operation"));
                    }
                    self.advance()?;
                    let value = self.parse_expression()?;
                    let span = start.through(value.span());
                    ops.push(AttributeOp::Splat { value, span });
                }
                TokenKind::Str | TokenKind::InterpolatedStr => {
                    return Err(self.error_token("expected attribute name"));
                }
                _ => {
                    let Some(name) = self.attribute_name() else {
                        return Err(self.error_token("expected attribute name"));
                    };
                    let start = self.tok.span;
                    self.advance()?;
                    let op = match self.tok.kind {
                        TokenKind::Arrow => "=>",
                        TokenKind::PlusArrow => "+>",
                        _ => return Err(self.error_here("invalid attribute operation")),
                    };
                    self.advance()?;
                    let value = self.parse_expression()?;
                    let span = start.through(value.span());
                    ops.push(AttributeOp::Regular { op, name, value, span });
                }
            }
            if self.tok.kind == TokenKind::Comma {
                self.advance()?;
                continue;
            }
            break;
        }
        Ok(ops)
    }

    fn class_statement(&mut self) -> Result<Expr, ParseError> {
        let start = self.tok.span;
        if self.peek()?.kind == TokenKind::LeftBrace {
            // `class { title: … }` declares a resource of the built-in
            // class type.
            let functor = Expr::QualifiedName {
                name: "class".to_string(),
                span: start,
            };
            self.advance()?;
            return self.resource_declaration(functor, ResourceForm::Regular);
        }
        self.advance()?;
        let name = match self.tok.kind {
            TokenKind::Name => self.tok.text().to_string(),
            TokenKind::Str | TokenKind::InterpolatedStr => {
                return Err(self.error_token("a quoted string is not valid as a name at this location"));
            }
            TokenKind::KwClass => {
                return Err(self.error_token("'class' keyword not allowed at this location"));
            }
            _ => return Err(self.error_token("expected name of class")),
        };
        let qualified = self.qualify(&name);
        self.advance()?;
        let params = self.optional_paren_params()?;
        let parent = if self.tok.kind == TokenKind::KwInherits {
            self.advance()?;
            let parent = match self.tok.kind {
                TokenKind::Name => self.tok.text().trim_start_matches("::").to_string(),
                TokenKind::KwDefault => "default".to_string(),
                _ => return Err(self.error_token("expected name of class")),
            };
            self.advance()?;
            Some(parent)
        } else {
            None
        };
        self.expect(TokenKind::LeftBrace)?;
        self.name_stack.push(qualified.clone());
        let body = self.parse_statements(TokenKind::RightBrace)?;
        self.name_stack.pop();
        let end = self.expect(TokenKind::RightBrace)?.span;
        Ok(Expr::Class {
            name: qualified,
            parent,
            params,
            body,
            span: start.through(end),
        })
    }

    fn define_statement(&mut self) -> Result<Expr, ParseError> {
        let start = self.tok.span;
        self.advance()?;
        if self.tok.kind != TokenKind::Name {
            return Err(self.error_token("expected a name to follow keyword 'define'"));
        }
        let name = self.qualify(self.tok.text());
        self.advance()?;
        let params = self.optional_paren_params()?;
        self.expect(TokenKind::LeftBrace)?;
        self.name_stack.push(name.clone());
        let body = self.parse_statements(TokenKind::RightBrace)?;
        self.name_stack.pop();
        let end = self.expect(TokenKind::RightBrace)?.span;
        Ok(Expr::Define {
            name,
            params,
            body,
            span: start.through(end),
        })
    }

    fn node_statement(&mut self) -> Result<Expr, ParseError> {
        let start = self.tok.span;
        self.advance()?;
        let mut matches = Vec::new();
        loop {
            matches.push(self.node_match()?);
            if self.tok.kind == TokenKind::Comma {
                self.advance()?;
                if self.tok.kind == TokenKind::LeftBrace {
                    break;
                }
                continue;
            }
            break;
        }
        let parent = if self.tok.kind == TokenKind::KwInherits {
            self.advance()?;
            Some(Box::new(self.node_match()?))
        } else {
            None
        };
        self.expect(TokenKind::LeftBrace)?;
        let body = self.parse_statements(TokenKind::RightBrace)?;
        let end = self.expect(TokenKind::RightBrace)?.span;
        Ok(Expr::Node {
            matches,
            parent,
            body,
            span: start.through(end),
        })
    }

    /// A node match: dotted bareword (name and number segments joined by
    /// `.`), quoted string, regex, or `default`.
    fn node_match(&mut self) -> Result<Expr, ParseError> {
        use TokenKind::*;
        match self.tok.kind {
            Str => {
                let expr = Expr::LiteralString {
                    value: self.tok.text().to_string(),
                    span: self.tok.span,
                };
                self.advance()?;
                Ok(expr)
            }
            InterpolatedStr => {
                let segments = match &self.tok.value {
                    TokenValue::Segments(segments) => segments.clone(),
                    _ => Vec::new(),
                };
                let span = self.tok.span;
                self.advance()?;
                self.build_concat(&segments, span)
            }
            Regexp => {
                let expr = Expr::Regexp {
                    pattern: self.tok.text().to_string(),
                    span: self.tok.span,
                };
                self.advance()?;
                Ok(expr)
            }
            KwDefault => {
                let expr = Expr::LiteralDefault { span: self.tok.span };
                self.advance()?;
                Ok(expr)
            }
            Name | Integer | Float => {
                let start = self.tok.span.offset;
                let mut end = self.tok.span.end();
                self.advance()?;
                while self.tok.kind == Dot {
                    self.advance()?;
                    match self.tok.kind {
                        Name | Integer | Float => {
                            end = self.tok.span.end();
                            self.advance()?;
                        }
                        _ => return Err(self.error_here("expected name or number to follow '.'")),
                    }
                }
                Ok(Expr::LiteralString {
                    value: String::from_utf8_lossy(&self.src[start..end]).into_owned(),
                    span: Span::new(start, end - start),
                })
            }
            _ => Err(self.error_here("hostname expected")),
        }
    }

    fn site_statement(&mut self) -> Result<Expr, ParseError> {
        let start = self.tok.span;
        self.advance()?;
        self.expect(TokenKind::LeftBrace)?;
        let body = self.parse_statements(TokenKind::RightBrace)?;
        let end = self.expect(TokenKind::RightBrace)?.span;
        Ok(Expr::Site {
            body,
            span: start.through(end),
        })
    }

    fn function_definition(&mut self) -> Result<Expr, ParseError> {
        let start = self.tok.span;
        self.advance()?;
        if self.tok.kind != TokenKind::Name {
            return Err(self.error_token("expected a name to follow keyword 'function'"));
        }
        let name = self.tok.text().to_string();
        self.advance()?;
        let params = self.optional_paren_params()?;
        let returns = if self.tok.kind == TokenKind::RightShift {
            self.advance()?;
            Some(Box::new(self.return_type()?))
        } else {
            None
        };
        self.expect(TokenKind::LeftBrace)?;
        let body = self.parse_statements(TokenKind::RightBrace)?;
        let end = self.expect(TokenKind::RightBrace)?.span;
        Ok(Expr::Function {
            name,
            params,
            body,
            returns,
            span: start.through(end),
        })
    }

    fn plan_definition(&mut self) -> Result<Expr, ParseError> {
        let start = self.tok.span;
        self.advance()?;
        if self.tok.kind != TokenKind::Name {
            return Err(self.error_token("expected a name to follow keyword 'plan'"));
        }
        let name = self.tok.text().to_string();
        self.advance()?;
        let params = self.optional_paren_params()?;
        self.expect(TokenKind::LeftBrace)?;
        let body = self.parse_statements(TokenKind::RightBrace)?;
        let end = self.expect(TokenKind::RightBrace)?.span;
        Ok(Expr::Plan {
            name,
            params,
            body,
            span: start.through(end),
        })
    }

    fn application_statement(&mut self) -> Result<Expr, ParseError> {
        let start = self.tok.span;
        self.advance()?;
        if self.tok.kind != TokenKind::Name {
            return Err(self.error_token("expected a name to follow keyword 'application'"));
        }
        let name = self.tok.text().to_string();
        self.advance()?;
        let params = self.optional_paren_params()?;
        self.expect(TokenKind::LeftBrace)?;
        let body = self.parse_statements(TokenKind::RightBrace)?;
        let end = self.expect(TokenKind::RightBrace)?.span;
        Ok(Expr::Application {
            name,
            params,
            body,
            span: start.through(end),
        })
    }

    fn type_statement(&mut self) -> Result<Expr, ParseError> {
        let start = self.tok.span;
        self.advance()?; // now at the type reference
        let name = self.tok.text().to_string();
        let name_span = self.tok.span;
        self.advance()?;
        match self.tok.kind {
            TokenKind::Assign => {
                self.advance()?;
                let value = self.parse_expression()?;
                let span = start.through(value.span());
                Ok(Expr::TypeAlias {
                    name,
                    value: Box::new(value),
                    span,
                })
            }
            TokenKind::LeftBracket => {
                self.advance()?;
                let keys = self.expression_list(TokenKind::RightBracket, "]")?;
                let receiver = Expr::QualifiedReference {
                    name,
                    span: name_span,
                };
                let mapping = Expr::Access {
                    receiver: Box::new(receiver),
                    keys,
                    span: name_span.through(self.tok.span),
                };
                if self.tok.kind != TokenKind::Assign {
                    return Err(self.error_here("expected type name to follow 'type'"));
                }
                self.advance()?;
                let value = self.parse_expression()?;
                let span = start.through(value.span());
                Ok(Expr::TypeMapping {
                    mapping: Box::new(mapping),
                    value: Box::new(value),
                    span,
                })
            }
            TokenKind::KwInherits => {
                self.advance()?;
                if self.tok.kind != TokenKind::TypeRef {
                    return Err(self.error_here("expected type name to follow 'inherits'"));
                }
                let parent = self.tok.text().to_string();
                self.advance()?;
                self.expect(TokenKind::LeftBrace)?;
                let body = self.parse_statements(TokenKind::RightBrace)?;
                let end = self.expect(TokenKind::RightBrace)?.span;
                Ok(Expr::TypeDefinition {
                    name,
                    parent,
                    body,
                    span: start.through(end),
                })
            }
            TokenKind::LeftBrace => {
                self.advance()?;
                let body = self.parse_statements(TokenKind::RightBrace)?;
                let end = self.expect(TokenKind::RightBrace)?.span;
                Ok(Expr::TypeDefinition {
                    name,
                    parent: String::new(),
                    body,
                    span: start.through(end),
                })
            }
            _ => Err(self.error_here(format!(
                "unexpected token '{}'",
                self.tok.kind.display()
            ))),
        }
    }

    fn activity_statement(&mut self, style: &'static str) -> Result<Expr, ParseError> {
        let start = self.tok.span;
        self.advance()?;
        if self.tok.kind != TokenKind::Name {
            return Err(self.error_token(format!(
                "expected a name to follow keyword '{style}'"
            )));
        }
        let name = self.qualify(self.tok.text());
        self.advance()?;
        if self.tok.kind != TokenKind::LeftBrace {
            return Err(self.error_token(format!(
                "expected token '{{', got '{}'",
                self.tok.kind.display()
            )));
        }
        let properties = self.hash_literal()?;
        let properties = match Self::lower_activity_hash(properties, false) {
            Expr::Hash { entries, .. } if entries.is_empty() => None,
            lowered => Some(Box::new(lowered)),
        };
        let mut end = self.tok.span;
        let definition = if self.tok.kind == TokenKind::LeftBrace {
            if style == "resource" {
                let hash = self.hash_literal()?;
                end = hash.span();
                Some(Box::new(Self::lower_activity_hash(hash, false)))
            } else {
                self.advance()?;
                self.name_stack.push(name.clone());
                let statements = self.parse_statements(TokenKind::RightBrace)?;
                self.name_stack.pop();
                let close = self.expect(TokenKind::RightBrace)?.span;
                end = close;
                Some(Box::new(Expr::Block {
                    statements,
                    span: close,
                }))
            }
        } else {
            None
        };
        Ok(Expr::Activity {
            name,
            style,
            properties,
            definition,
            span: start.through(end),
        })
    }

    /// Workflow activity hashes defer variable references: `$x` becomes
    /// `Deferred.new("$x")`, and a `repeat` entry's `as` list becomes
    /// parameter declarations.
    fn lower_activity_hash(expr: Expr, in_repeat: bool) -> Expr {
        let Expr::Hash { entries, span } = expr else {
            return expr;
        };
        let entries = entries
            .into_iter()
            .map(|entry| match entry {
                Expr::KeyedEntry { key, value, span } => {
                    let key_name = match key.as_ref() {
                        Expr::QualifiedName { name, .. } => name.clone(),
                        _ => String::new(),
                    };
                    let value = match *value {
                        Expr::Variable { ref name, span } if in_repeat && key_name == "as" => {
                            Expr::Array {
                                elements: vec![Self::as_parameter(name, span)],
                                span,
                            }
                        }
                        Expr::Array { elements, span } if in_repeat && key_name == "as" => {
                            let elements = elements
                                .into_iter()
                                .map(|e| match e {
                                    Expr::Variable { ref name, span } => {
                                        Self::as_parameter(name, span)
                                    }
                                    other => other,
                                })
                                .collect();
                            Expr::Array { elements, span }
                        }
                        Expr::Variable { ref name, span } => Self::deferred_reference(name, span),
                        hash @ Expr::Hash { .. } => {
                            Self::lower_activity_hash(hash, key_name == "repeat")
                        }
                        other => other,
                    };
                    Expr::KeyedEntry {
                        key,
                        value: Box::new(value),
                        span,
                    }
                }
                other => other,
            })
            .collect();
        Expr::Hash { entries, span }
    }

    fn variable_text(name: &VariableName) -> String {
        match name {
            VariableName::Name(n) => format!("${n}"),
            VariableName::Index(i) => format!("${i}"),
        }
    }

    fn as_parameter(name: &VariableName, span: Span) -> Expr {
        let text = match name {
            VariableName::Name(n) => n.clone(),
            VariableName::Index(i) => i.to_string(),
        };
        Expr::ParameterExpr {
            param: Box::new(Parameter {
                name: text,
                type_expr: None,
                value: None,
                splat: false,
                span,
            }),
            span,
        }
    }

    /// The deferred call keeps the variable's surface span while taking
    /// the lowered `Deferred.new("$x")` shape.
    fn deferred_reference(name: &VariableName, span: Span) -> Expr {
        Expr::MethodCall {
            receiver: Box::new(Expr::QualifiedReference {
                name: "Deferred".to_string(),
                span,
            }),
            name: Box::new(Expr::QualifiedName {
                name: "new".to_string(),
                span,
            }),
            args: vec![Expr::LiteralString {
                value: Self::variable_text(name),
                span,
            }],
            lambda: None,
            span,
        }
    }

    fn capability_mapping(&mut self, component: Expr) -> Result<Expr, ParseError> {
        let kind = if self.tok.kind == TokenKind::KwProduces {
            "produces"
        } else {
            "consumes"
        };
        self.advance()?;
        if self.tok.kind != TokenKind::TypeRef {
            return Err(self.error_token(format!(
                "expected type name to follow '{kind}'"
            )));
        }
        let capability = self.tok.text().to_string();
        self.advance()?;
        self.expect(TokenKind::LeftBrace)?;
        let ops = self.attribute_operations()?;
        let end = self.expect(TokenKind::RightBrace)?.span;
        // Reserved words name components in capability mappings.
        let component = match component {
            Expr::ReservedWord { word, span } => Expr::QualifiedName { name: word, span },
            other => other,
        };
        let span = component.span().through(end);
        Ok(Expr::CapabilityMapping {
            kind,
            component: Box::new(component),
            capability,
            ops,
            span,
        })
    }

    fn render_string(&mut self) -> Result<Expr, ParseError> {
        let expr = Expr::RenderString {
            value: self.tok.text().to_string(),
            span: self.tok.span,
        };
        self.advance()?;
        Ok(expr)
    }

    fn render_expression(&mut self) -> Result<Expr, ParseError> {
        let start = self.tok.span;
        self.advance()?;
        let expr = self.parse_expression()?;
        let span = start.through(expr.span());
        Ok(Expr::Render {
            expr: Box::new(expr),
            span,
        })
    }

    /// EPP programs parse to a lambda wrapping an `epp` node whose body
    /// interleaves rendered text, rendered expressions, and statements.
    fn parse_epp_program(&mut self) -> Result<Expr, ParseError> {
        let mut params = None;
        if self.tok.kind == TokenKind::Pipe {
            self.advance()?;
            params = Some(self.params_list(TokenKind::Pipe)?);
        }
        let mut items = Vec::new();
        loop {
            match self.tok.kind {
                TokenKind::End => break,
                TokenKind::RenderString => items.push(self.render_string()?),
                TokenKind::RenderExpr => items.push(self.render_expression()?),
                TokenKind::Pipe => {
                    let whitespace_only = items.iter().all(|item| {
                        matches!(item, Expr::RenderString { value, .. } if value.trim().is_empty())
                    });
                    if params.is_none() && whitespace_only {
                        return Err(self.error_here(
                            "Ambiguous EPP parameter expression. Probably missing '<%-' before parameters to remove leading whitespace",
                        ));
                    }
                    return Err(self.unexpected());
                }
                _ => items.push(self.parse_statement()?),
            }
        }
        let span = Span::new(0, self.src.len());
        let epp = Expr::Epp { body: items, span };
        Ok(Expr::Lambda {
            params,
            returns: None,
            body: vec![epp],
            span,
        })
    }
}
