use super::Parser;
use crate::ast::{CaseOption, Expr, Parameter, VariableName};
use crate::error::ParseError;
use crate::lexer::LexerModes;
use crate::location::Span;
use crate::token::{HeredocValue, StringSegment, TokenKind, TokenValue};

impl<'a> Parser<'a> {
    /// Lowest tier: assignment (right associative), selector, and
    /// capability mappings.
    pub(super) fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_or()?;
        loop {
            match self.tok.kind {
                TokenKind::Assign => {
                    self.advance()?;
                    let rhs = self.parse_expression()?;
                    expr = Self::binary("=", expr, rhs);
                }
                TokenKind::AddAssign => {
                    self.advance()?;
                    let rhs = self.parse_expression()?;
                    expr = Self::binary("+=", expr, rhs);
                }
                TokenKind::SubtractAssign => {
                    self.advance()?;
                    let rhs = self.parse_expression()?;
                    expr = Self::binary("-=", expr, rhs);
                }
                TokenKind::QuestionMark => expr = self.selector(expr)?,
                TokenKind::KwProduces | TokenKind::KwConsumes => {
                    expr = self.capability_mapping(expr)?;
                }
                _ => return Ok(expr),
            }
        }
    }

    fn binary(op: &'static str, left: Expr, right: Expr) -> Expr {
        let span = left.span().through(right.span());
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            span,
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_and()?;
        while self.tok.kind == TokenKind::KwOr {
            self.advance()?;
            let rhs = self.parse_and()?;
            expr = Self::binary("or", expr, rhs);
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_comparison()?;
        while self.tok.kind == TokenKind::KwAnd {
            self.advance()?;
            let rhs = self.parse_comparison()?;
            expr = Self::binary("and", expr, rhs);
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_equality()?;
        loop {
            let op = match self.tok.kind {
                TokenKind::Less => "<",
                TokenKind::LessEqual => "<=",
                TokenKind::Greater => ">",
                TokenKind::GreaterEqual => ">=",
                _ => return Ok(expr),
            };
            self.advance()?;
            let rhs = self.parse_equality()?;
            expr = Self::binary(op, expr, rhs);
        }
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_shift()?;
        loop {
            let op = match self.tok.kind {
                TokenKind::Equal => "==",
                TokenKind::NotEqual => "!=",
                _ => return Ok(expr),
            };
            self.advance()?;
            let rhs = self.parse_shift()?;
            expr = Self::binary(op, expr, rhs);
        }
    }

    fn parse_shift(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_additive()?;
        loop {
            let op = match self.tok.kind {
                TokenKind::LeftShift => "<<",
                TokenKind::RightShift => ">>",
                _ => return Ok(expr),
            };
            self.advance()?;
            let rhs = self.parse_additive()?;
            expr = Self::binary(op, expr, rhs);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_multiplicative()?;
        loop {
            let op = match self.tok.kind {
                TokenKind::Plus => "+",
                TokenKind::Minus => "-",
                _ => return Ok(expr),
            };
            self.advance()?;
            let rhs = self.parse_multiplicative()?;
            expr = Self::binary(op, expr, rhs);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_match()?;
        loop {
            let op = match self.tok.kind {
                TokenKind::Multiply => "*",
                TokenKind::Divide => "/",
                TokenKind::Modulo => "%",
                _ => return Ok(expr),
            };
            self.advance()?;
            let rhs = self.parse_match()?;
            expr = Self::binary(op, expr, rhs);
        }
    }

    fn parse_match(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_in()?;
        loop {
            let op = match self.tok.kind {
                TokenKind::Match => "=~",
                TokenKind::NotMatch => "!~",
                _ => return Ok(expr),
            };
            self.advance()?;
            let rhs = self.parse_in()?;
            expr = Self::binary(op, expr, rhs);
        }
    }

    fn parse_in(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_unary()?;
        while self.tok.kind == TokenKind::KwIn {
            self.advance()?;
            let rhs = self.parse_unary()?;
            expr = Self::binary("in", expr, rhs);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        match self.tok.kind {
            TokenKind::Minus => {
                let start = self.tok.span;
                self.advance()?;
                match self.tok.value.clone() {
                    TokenValue::Int { value, radix } if self.tok.kind == TokenKind::Integer => {
                        let span = start.through(self.tok.span);
                        self.advance()?;
                        Ok(Expr::LiteralInteger {
                            value: -value,
                            radix,
                            span,
                        })
                    }
                    TokenValue::Float(value) if self.tok.kind == TokenKind::Float => {
                        let span = start.through(self.tok.span);
                        self.advance()?;
                        Ok(Expr::LiteralFloat { value: -value, span })
                    }
                    _ => {
                        let operand = self.parse_unary()?;
                        let span = start.through(operand.span());
                        Ok(Expr::Unary {
                            op: "-",
                            expr: Box::new(operand),
                            span,
                        })
                    }
                }
            }
            TokenKind::Plus => {
                // A leading `+` folds into a numeric literal and is
                // invalid in front of anything else.
                let start = self.tok.span;
                self.advance()?;
                match self.tok.kind {
                    TokenKind::Integer | TokenKind::Float => {
                        let mut literal = self.parse_primary()?;
                        if let Expr::LiteralInteger { span, .. } | Expr::LiteralFloat { span, .. } =
                            &mut literal
                        {
                            *span = start.through(*span);
                        }
                        Ok(literal)
                    }
                    _ => Err(self.error_at(start.end(), "unexpected token '+'")),
                }
            }
            TokenKind::Not | TokenKind::KwNot => {
                let start = self.tok.span;
                self.advance()?;
                let operand = self.parse_unary()?;
                let span = start.through(operand.span());
                Ok(Expr::Unary {
                    op: "!",
                    expr: Box::new(operand),
                    span,
                })
            }
            TokenKind::Multiply => {
                let start = self.tok.span;
                self.advance()?;
                let operand = self.parse_unary()?;
                let span = start.through(operand.span());
                Ok(Expr::Unary {
                    op: "unfold",
                    expr: Box::new(operand),
                    span,
                })
            }
            _ => self.parse_postfix(),
        }
    }

    pub(super) fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.tok.kind {
                TokenKind::LeftBracket => {
                    self.advance()?;
                    let keys = self.expression_list(TokenKind::RightBracket, "]")?;
                    let span = expr.span().through(self.prev_span);
                    expr = Expr::Access {
                        receiver: Box::new(expr),
                        keys,
                        span,
                    };
                }
                TokenKind::Dot => {
                    self.advance()?;
                    let name = self.method_name()?;
                    let name_end = name.span().end();
                    let args = if self.tok.kind == TokenKind::LeftParen
                        && self.tok.span.offset == name_end
                    {
                        self.advance()?;
                        self.expression_list(TokenKind::RightParen, ")")?
                    } else {
                        Vec::new()
                    };
                    let span = expr.span().through(self.prev_span).through(name.span());
                    expr = Expr::MethodCall {
                        receiver: Box::new(expr),
                        name: Box::new(name),
                        args,
                        lambda: None,
                        span,
                    };
                }
                TokenKind::LeftParen if self.tok.span.offset == expr.span().end() => {
                    self.advance()?;
                    let args = self.expression_list(TokenKind::RightParen, ")")?;
                    let span = expr.span().through(self.prev_span);
                    expr = Expr::Call {
                        functor: Box::new(expr),
                        args,
                        lambda: None,
                        statement: false,
                        span,
                    };
                }
                TokenKind::Pipe if self.no_lambda == 0 && Self::takes_lambda(&expr) => {
                    let lambda = self.lambda()?;
                    let span = expr.span().through(lambda.span());
                    expr = match expr {
                        Expr::Call {
                            functor,
                            args,
                            statement,
                            ..
                        } => Expr::Call {
                            functor,
                            args,
                            lambda: Some(Box::new(lambda)),
                            statement,
                            span,
                        },
                        Expr::MethodCall {
                            receiver,
                            name,
                            args,
                            ..
                        } => Expr::MethodCall {
                            receiver,
                            name,
                            args,
                            lambda: Some(Box::new(lambda)),
                            span,
                        },
                        functor => Expr::Call {
                            functor: Box::new(functor),
                            args: Vec::new(),
                            lambda: Some(Box::new(lambda)),
                            statement: false,
                            span,
                        },
                    };
                }
                TokenKind::CollectStart | TokenKind::ExportStart
                    if matches!(expr, Expr::QualifiedReference { .. }) =>
                {
                    expr = self.collect_expression(expr)?;
                }
                _ => return Ok(expr),
            }
        }
    }

    fn takes_lambda(expr: &Expr) -> bool {
        matches!(
            expr,
            Expr::QualifiedName { .. }
                | Expr::QualifiedReference { .. }
                | Expr::Call { lambda: None, .. }
                | Expr::MethodCall { lambda: None, .. }
        )
    }

    fn method_name(&mut self) -> Result<Expr, ParseError> {
        use TokenKind::*;
        match self.tok.kind {
            Name | KwType | KwFunction | KwApplication | KwConsumes | KwProduces | KwSite
            | KwIn | KwPlan | KwWorkflow => {
                let expr = Expr::QualifiedName {
                    name: self.tok.text().to_string(),
                    span: self.tok.span,
                };
                self.advance()?;
                Ok(expr)
            }
            _ => Err(self.error_token("expected name after '.'")),
        }
    }

    pub(super) fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        use TokenKind::*;
        match self.tok.kind {
            Integer => {
                let (value, radix) = match &self.tok.value {
                    TokenValue::Int { value, radix } => (*value, *radix),
                    _ => return Err(self.unexpected()),
                };
                let span = self.tok.span;
                self.advance()?;
                Ok(Expr::LiteralInteger { value, radix, span })
            }
            Float => {
                let value = match &self.tok.value {
                    TokenValue::Float(value) => *value,
                    _ => return Err(self.unexpected()),
                };
                let span = self.tok.span;
                self.advance()?;
                Ok(Expr::LiteralFloat { value, span })
            }
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
            HeredocTok => {
                let value = match &self.tok.value {
                    TokenValue::Heredoc(value) => value.clone(),
                    _ => HeredocValue {
                        syntax: String::new(),
                        segments: Vec::new(),
                    },
                };
                let span = self.tok.span;
                self.advance()?;
                self.build_heredoc(&value, span)
            }
            Regexp => {
                let expr = Expr::Regexp {
                    pattern: self.tok.text().to_string(),
                    span: self.tok.span,
                };
                self.advance()?;
                Ok(expr)
            }
            Variable => {
                let expr = Self::variable_from_text(self.tok.text(), self.tok.span);
                self.advance()?;
                Ok(expr)
            }
            Name => {
                let expr = Expr::QualifiedName {
                    name: self.tok.text().to_string(),
                    span: self.tok.span,
                };
                self.advance()?;
                Ok(expr)
            }
            TypeRef => {
                let expr = Expr::QualifiedReference {
                    name: self.tok.text().to_string(),
                    span: self.tok.span,
                };
                self.advance()?;
                Ok(expr)
            }
            ReservedWord => {
                let expr = Expr::ReservedWord {
                    word: self.tok.text().to_string(),
                    span: self.tok.span,
                };
                self.advance()?;
                Ok(expr)
            }
            KwTrue | KwFalse => {
                let expr = Expr::LiteralBoolean {
                    value: self.tok.kind == KwTrue,
                    span: self.tok.span,
                };
                self.advance()?;
                Ok(expr)
            }
            KwUndef => {
                let expr = Expr::LiteralUndef { span: self.tok.span };
                self.advance()?;
                Ok(expr)
            }
            KwDefault => {
                let expr = Expr::LiteralDefault { span: self.tok.span };
                self.advance()?;
                Ok(expr)
            }
            KwIf => self.if_expression(false),
            KwUnless => self.if_expression(true),
            KwCase => self.case_expression(),
            KwFunction => {
                if self.peek()?.kind == Name {
                    self.function_definition()
                } else {
                    self.name_keyword()
                }
            }
            KwPlan => self.plan_definition(),
            KwWorkflow => {
                if self.peek()?.kind == Name {
                    self.activity_statement("workflow")
                } else {
                    self.name_keyword()
                }
            }
            KwType | KwApplication | KwConsumes | KwProduces | KwSite => self.name_keyword(),
            LeftParen => {
                let start = self.tok.span;
                self.advance()?;
                let inner = self.parse_expression()?;
                let end = self.expect(RightParen)?.span;
                Ok(Expr::Paren {
                    expr: Box::new(inner),
                    span: start.through(end),
                })
            }
            ListStart | LeftBracket => {
                let start = self.tok.span;
                self.advance()?;
                let elements = self.expression_list(RightBracket, "]")?;
                Ok(Expr::Array {
                    elements,
                    span: start.through(self.prev_span),
                })
            }
            LeftBrace => self.hash_literal(),
            _ => Err(self.unexpected()),
        }
    }

    fn name_keyword(&mut self) -> Result<Expr, ParseError> {
        let expr = Expr::QualifiedName {
            name: self.tok.text().to_string(),
            span: self.tok.span,
        };
        self.advance()?;
        Ok(expr)
    }

    fn variable_from_text(text: &str, span: Span) -> Expr {
        let name = if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
            match text.parse::<i64>() {
                Ok(index) => VariableName::Index(index),
                Err(_) => VariableName::Name(text.to_string()),
            }
        } else {
            VariableName::Name(text.to_string())
        };
        Expr::Variable { name, span }
    }

    /// Comma-separated expressions terminated by `terminator`.
    /// Consecutive `key => value` pairs collapse into one hash element.
    pub(super) fn expression_list(
        &mut self,
        terminator: TokenKind,
        closer: &str,
    ) -> Result<Vec<Expr>, ParseError> {
        let mut elements: Vec<Expr> = Vec::new();
        let mut pending: Vec<Expr> = Vec::new();
        loop {
            if self.tok.kind == terminator {
                self.advance()?;
                break;
            }
            if self.tok.kind == TokenKind::End {
                return Err(self.error_token(format!(
                    "expected one of ',' or '{closer}', got 'EOF'"
                )));
            }
            let expr = self.parse_expression()?;
            if self.tok.kind == TokenKind::Arrow {
                self.advance()?;
                let value = self.parse_expression()?;
                let span = expr.span().through(value.span());
                pending.push(Expr::KeyedEntry {
                    key: Box::new(expr),
                    value: Box::new(value),
                    span,
                });
            } else {
                if !pending.is_empty() {
                    elements.push(Self::entries_hash(std::mem::take(&mut pending)));
                }
                elements.push(expr);
            }
            if self.tok.kind == TokenKind::Comma {
                self.advance()?;
                continue;
            }
            if self.tok.kind == terminator {
                self.advance()?;
                break;
            }
            return Err(self.error_token(format!(
                "expected one of ',' or '{closer}', got '{}'",
                self.tok.kind.display()
            )));
        }
        if !pending.is_empty() {
            elements.push(Self::entries_hash(pending));
        }
        Ok(elements)
    }

    fn entries_hash(entries: Vec<Expr>) -> Expr {
        let span = entries
            .first()
            .map(|first| first.span().through(entries.last().expect("entry").span()))
            .unwrap_or(Span::new(0, 0));
        Expr::Hash { entries, span }
    }

    pub(super) fn hash_literal(&mut self) -> Result<Expr, ParseError> {
        let start = self.tok.span;
        self.advance()?; // {
        let mut entries = Vec::new();
        loop {
            if self.tok.kind == TokenKind::RightBrace {
                self.advance()?;
                break;
            }
            if self.tok.kind == TokenKind::End {
                return Err(self.error_token("expected one of ',' or '}', got 'EOF'"));
            }
            let key = self.parse_expression()?;
            if self.tok.kind != TokenKind::Arrow {
                return Err(self.error_here("expected '=>' to follow hash key"));
            }
            self.advance()?;
            let value = self.parse_expression()?;
            let span = key.span().through(value.span());
            entries.push(Expr::KeyedEntry {
                key: Box::new(key),
                value: Box::new(value),
                span,
            });
            if self.tok.kind == TokenKind::Comma {
                self.advance()?;
                continue;
            }
            if self.tok.kind == TokenKind::RightBrace {
                self.advance()?;
                break;
            }
            return Err(self.error_token(format!(
                "expected one of ',' or '}}', got '{}'",
                self.tok.kind.display()
            )));
        }
        Ok(Expr::Hash {
            entries,
            span: start.through(self.prev_span),
        })
    }

    fn selector(&mut self, lhs: Expr) -> Result<Expr, ParseError> {
        self.advance()?; // ?
        let mut entries = Vec::new();
        if self.tok.kind == TokenKind::LeftBrace {
            self.advance()?;
            loop {
                if self.tok.kind == TokenKind::RightBrace {
                    self.advance()?;
                    break;
                }
                let key = self.parse_expression()?;
                if self.tok.kind != TokenKind::Arrow {
                    return Err(self.error_here("expected '=>' to follow hash key"));
                }
                self.advance()?;
                let value = self.parse_expression()?;
                let span = key.span().through(value.span());
                entries.push(Expr::KeyedEntry {
                    key: Box::new(key),
                    value: Box::new(value),
                    span,
                });
                if self.tok.kind == TokenKind::Comma {
                    self.advance()?;
                    continue;
                }
                self.expect(TokenKind::RightBrace)?;
                break;
            }
        } else {
            let key = self.parse_expression()?;
            if self.tok.kind != TokenKind::Arrow {
                return Err(self.error_here("expected '=>' to follow hash key"));
            }
            self.advance()?;
            let value = self.parse_expression()?;
            let span = key.span().through(value.span());
            entries.push(Expr::KeyedEntry {
                key: Box::new(key),
                value: Box::new(value),
                span,
            });
        }
        let span = lhs.span().through(self.prev_span);
        Ok(Expr::Selector {
            lhs: Box::new(lhs),
            entries,
            span,
        })
    }

    fn collect_expression(&mut self, type_expr: Expr) -> Result<Expr, ParseError> {
        let exported = self.tok.kind == TokenKind::ExportStart;
        let query_start = self.tok.span;
        self.advance()?;
        let terminator = if exported {
            TokenKind::ExportEnd
        } else {
            TokenKind::CollectEnd
        };
        let inner = if self.tok.kind == terminator {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        self.expect(terminator)?;
        let query_span = query_start.through(self.prev_span);
        let query = if exported {
            Expr::ExportedQuery {
                expr: inner,
                span: query_span,
            }
        } else {
            Expr::VirtualQuery {
                expr: inner,
                span: query_span,
            }
        };
        let ops = if self.tok.kind == TokenKind::LeftBrace {
            self.advance()?;
            let ops = self.attribute_operations()?;
            self.expect(TokenKind::RightBrace)?;
            ops
        } else {
            Vec::new()
        };
        let span = type_expr.span().through(self.prev_span);
        Ok(Expr::Collect {
            type_expr: Box::new(type_expr),
            query: Box::new(query),
            ops,
            span,
        })
    }

    pub(super) fn lambda(&mut self) -> Result<Expr, ParseError> {
        let start = self.tok.span; // |
        self.advance()?;
        let params = self.params_list(TokenKind::Pipe)?;
        let returns = if self.tok.kind == TokenKind::RightShift {
            self.advance()?;
            Some(Box::new(self.return_type()?))
        } else {
            None
        };
        self.expect(TokenKind::LeftBrace)?;
        let body = self.parse_statements(TokenKind::RightBrace)?;
        let end = self.expect(TokenKind::RightBrace)?.span;
        Ok(Expr::Lambda {
            params: Some(params),
            returns,
            body,
            span: start.through(end),
        })
    }

    pub(super) fn optional_paren_params(&mut self) -> Result<Option<Vec<Parameter>>, ParseError> {
        if self.tok.kind != TokenKind::LeftParen {
            return Ok(None);
        }
        self.advance()?;
        Ok(Some(self.params_list(TokenKind::RightParen)?))
    }

    /// Parameter declarations: `[Type] $name [= default]` with at most
    /// one trailing `*$splat`. The opener has already been consumed.
    pub(super) fn params_list(&mut self, terminator: TokenKind) -> Result<Vec<Parameter>, ParseError> {
        let mut params = Vec::new();
        loop {
            if self.tok.kind == terminator {
                self.advance()?;
                break;
            }
            let start = self.tok.span;
            let type_expr = if self.tok.kind == TokenKind::TypeRef {
                let type_span = self.tok.span;
                let mut type_expr = Expr::QualifiedReference {
                    name: self.tok.text().to_string(),
                    span: type_span,
                };
                self.advance()?;
                if self.tok.kind == TokenKind::LeftBracket {
                    self.advance()?;
                    let keys = self.expression_list(TokenKind::RightBracket, "]")?;
                    type_expr = Expr::Access {
                        receiver: Box::new(type_expr),
                        keys,
                        span: type_span.through(self.prev_span),
                    };
                }
                Some(Box::new(type_expr))
            } else {
                None
            };
            let splat = if self.tok.kind == TokenKind::Multiply {
                self.advance()?;
                true
            } else {
                false
            };
            if self.tok.kind != TokenKind::Variable {
                return Err(self.error_here("expected variable declaration"));
            }
            let name = self.tok.text().to_string();
            if name.is_empty()
                || name.contains("::")
                || name.bytes().all(|b| b.is_ascii_digit())
            {
                return Err(self.error_here("expected variable declaration"));
            }
            let name_span = self.tok.span;
            self.advance()?;
            let value = if self.tok.kind == TokenKind::Assign {
                self.advance()?;
                self.no_lambda += 1;
                let value = self.parse_expression();
                self.no_lambda -= 1;
                Some(value?)
            } else {
                None
            };
            let span = start.through(value.as_ref().map(|v| v.span()).unwrap_or(name_span));
            params.push(Parameter {
                name,
                type_expr,
                value,
                splat,
                span,
            });
            if self.tok.kind == TokenKind::Comma {
                self.advance()?;
                continue;
            }
            self.expect(terminator)?;
            break;
        }
        Ok(params)
    }

    pub(super) fn return_type(&mut self) -> Result<Expr, ParseError> {
        if self.tok.kind != TokenKind::TypeRef {
            return Err(self.error_here("expected type name"));
        }
        let type_span = self.tok.span;
        let mut type_expr = Expr::QualifiedReference {
            name: self.tok.text().to_string(),
            span: type_span,
        };
        self.advance()?;
        if self.tok.kind == TokenKind::LeftBracket {
            self.advance()?;
            let keys = self.expression_list(TokenKind::RightBracket, "]")?;
            type_expr = Expr::Access {
                receiver: Box::new(type_expr),
                keys,
                span: type_span.through(self.prev_span),
            };
        }
        Ok(type_expr)
    }

    pub(super) fn if_expression(&mut self, unless: bool) -> Result<Expr, ParseError> {
        let start = self.tok.span;
        self.advance()?;
        let test = self.parse_expression()?;
        self.expect(TokenKind::LeftBrace)?;
        let then = self.parse_statements(TokenKind::RightBrace)?;
        let mut end = self.expect(TokenKind::RightBrace)?.span;
        let else_ = match self.tok.kind {
            TokenKind::KwElsif => {
                if unless {
                    return Err(self.error_here("elsif not supported in unless expression"));
                }
                let nested = self.if_expression(false)?;
                end = nested.span();
                Some(vec![nested])
            }
            TokenKind::KwElse => {
                self.advance()?;
                self.expect(TokenKind::LeftBrace)?;
                let body = self.parse_statements(TokenKind::RightBrace)?;
                end = self.expect(TokenKind::RightBrace)?.span;
                Some(body)
            }
            _ => None,
        };
        let span = start.through(end);
        let test = Box::new(test);
        Ok(if unless {
            Expr::Unless { test, then, else_, span }
        } else {
            Expr::If { test, then, else_, span }
        })
    }

    pub(super) fn case_expression(&mut self) -> Result<Expr, ParseError> {
        let start = self.tok.span;
        self.advance()?;
        let test = self.parse_expression()?;
        self.expect(TokenKind::LeftBrace)?;
        let mut options = Vec::new();
        while self.tok.kind != TokenKind::RightBrace {
            if self.tok.kind == TokenKind::End {
                self.expect(TokenKind::RightBrace)?;
            }
            let mut values = vec![self.parse_expression()?];
            while self.tok.kind == TokenKind::Comma {
                self.advance()?;
                values.push(self.parse_expression()?);
            }
            self.expect(TokenKind::Colon)?;
            self.expect(TokenKind::LeftBrace)?;
            let then = self.parse_statements(TokenKind::RightBrace)?;
            self.expect(TokenKind::RightBrace)?;
            let span = values
                .first()
                .map(|v| v.span().through(self.prev_span))
                .unwrap_or(self.prev_span);
            options.push(CaseOption { values, then, span });
        }
        let end = self.expect(TokenKind::RightBrace)?.span;
        Ok(Expr::Case {
            test: Box::new(test),
            options,
            span: start.through(end),
        })
    }

    /// Assemble an interpolated string from scanner segments. Embedded
    /// expressions re-enter the parser over their original byte range so
    /// that error positions stay in outer coordinates.
    pub(super) fn build_concat(
        &self,
        segments: &[StringSegment],
        span: Span,
    ) -> Result<Expr, ParseError> {
        let mut parts = Vec::new();
        for segment in segments {
            match segment {
                StringSegment::Literal(text) => {
                    if !text.is_empty() {
                        parts.push(Expr::LiteralString {
                            value: text.clone(),
                            span,
                        });
                    }
                }
                StringSegment::Variable { name, offset, length } => {
                    let seg_span = Span::new(*offset, *length);
                    let variable = Self::variable_from_text(name, seg_span);
                    parts.push(Expr::Text {
                        expr: Box::new(variable),
                        span: seg_span,
                    });
                }
                StringSegment::Expr { offset, length } => {
                    let seg_span = Span::new(*offset, *length);
                    let inner = self.sub_parse(*offset, *length)?;
                    parts.push(Expr::Text {
                        expr: Box::new(inner),
                        span: seg_span,
                    });
                }
            }
        }
        Ok(Expr::ConcatString {
            segments: parts,
            span,
        })
    }

    pub(super) fn build_heredoc(
        &self,
        value: &HeredocValue,
        span: Span,
    ) -> Result<Expr, ParseError> {
        let text = match value.segments.as_slice() {
            [StringSegment::Literal(text)] => Expr::LiteralString {
                value: text.clone(),
                span,
            },
            segments => self.build_concat(segments, span)?,
        };
        Ok(Expr::Heredoc {
            text: Box::new(text),
            syntax: value.syntax.clone(),
            span,
        })
    }

    fn sub_parse(&self, offset: usize, length: usize) -> Result<Expr, ParseError> {
        let bytes = &self.src[offset..offset + length];
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Expr::LiteralUndef {
                span: Span::new(offset, length),
            });
        }
        let modes = LexerModes {
            epp: false,
            ..self.modes
        };
        let mut sub = Parser::fragment(self.src, self.file, offset, offset + length, modes)?;
        let expr = sub.parse_expression()?;
        if sub.tok.kind != TokenKind::End {
            return Err(sub.unexpected());
        }
        Ok(Self::interpolated_var(expr))
    }

    /// `${name}` means the variable `name`; the rewrite follows the
    /// leftmost receiver through accesses and method calls.
    fn interpolated_var(expr: Expr) -> Expr {
        match expr {
            Expr::QualifiedName { name, span } => Expr::Variable {
                name: VariableName::Name(name),
                span,
            },
            Expr::Access { receiver, keys, span } => Expr::Access {
                receiver: Box::new(Self::interpolated_var(*receiver)),
                keys,
                span,
            },
            Expr::MethodCall {
                receiver,
                name,
                args,
                lambda,
                span,
            } => Expr::MethodCall {
                receiver: Box::new(Self::interpolated_var(*receiver)),
                name,
                args,
                lambda,
                span,
            },
            other => other,
        }
    }
}
