use super::Lexer;
use crate::error::ParseError;
use crate::location::Span;
use crate::token::{StringSegment, Token, TokenKind, TokenValue};

/// Result of examining a `$` inside an interpolated literal.
pub(super) enum DollarScan {
    Variable { name: String, end: usize },
    Expr { start: usize, end: usize, resume: usize },
    Literal,
}

impl<'a> Lexer<'a> {
    pub(super) fn scan_single_quoted(&mut self, start: usize) -> Result<Token, ParseError> {
        let mut p = start + 1;
        let mut value = String::new();
        loop {
            if p >= self.end {
                return Err(self.error(start, "unterminated single quoted string"));
            }
            match self.src[p] {
                b'\'' => {
                    p += 1;
                    break;
                }
                b'\\' => match self.at(p + 1) {
                    b'\\' => {
                        value.push('\\');
                        p += 2;
                    }
                    b'\'' => {
                        value.push('\'');
                        p += 2;
                    }
                    _ => {
                        value.push('\\');
                        p += 1;
                    }
                },
                _ => {
                    let (ch, len) = self.decode_char(p)?;
                    value.push(ch);
                    p += len;
                }
            }
        }
        self.pos = p;
        Ok(Token::new(
            TokenKind::Str,
            TokenValue::Str(value),
            Span::new(start, p - start),
        ))
    }

    pub(super) fn scan_double_quoted(&mut self, start: usize) -> Result<Token, ParseError> {
        let mut p = start + 1;
        let mut segments: Vec<StringSegment> = Vec::new();
        let mut buf = String::new();
        loop {
            if p >= self.end {
                return Err(self.error(start, "unterminated double quoted string"));
            }
            match self.src[p] {
                b'"' => {
                    p += 1;
                    break;
                }
                b'\\' => match self.at(p + 1) {
                    b'n' => {
                        buf.push('\n');
                        p += 2;
                    }
                    b't' => {
                        buf.push('\t');
                        p += 2;
                    }
                    b'r' => {
                        buf.push('\r');
                        p += 2;
                    }
                    b's' => {
                        buf.push(' ');
                        p += 2;
                    }
                    b'$' => {
                        buf.push('$');
                        p += 2;
                    }
                    b'"' => {
                        buf.push('"');
                        p += 2;
                    }
                    b'\\' => {
                        buf.push('\\');
                        p += 2;
                    }
                    b'u' => {
                        let (ch, resume) = self.unicode_escape(p)?;
                        buf.push(ch);
                        p = resume;
                    }
                    _ => {
                        // Unknown escapes keep their backslash; the
                        // escaped character is scanned on its own.
                        buf.push('\\');
                        p += 1;
                    }
                },
                b'$' => match self.scan_dollar(p, self.end, start)? {
                    DollarScan::Variable { name, end } => {
                        if !buf.is_empty() {
                            segments.push(StringSegment::Literal(std::mem::take(&mut buf)));
                        }
                        segments.push(StringSegment::Variable {
                            name,
                            offset: p,
                            length: end - p,
                        });
                        p = end;
                    }
                    DollarScan::Expr { start: s, end: e, resume } => {
                        if !buf.is_empty() {
                            segments.push(StringSegment::Literal(std::mem::take(&mut buf)));
                        }
                        segments.push(StringSegment::Expr {
                            offset: s,
                            length: e - s,
                        });
                        p = resume;
                    }
                    DollarScan::Literal => {
                        buf.push('$');
                        p += 1;
                    }
                },
                _ => {
                    let (ch, len) = self.decode_char(p)?;
                    buf.push(ch);
                    p += len;
                }
            }
        }
        self.pos = p;
        if segments.is_empty() {
            return Ok(Token::new(
                TokenKind::Str,
                TokenValue::Str(buf),
                Span::new(start, p - start),
            ));
        }
        if !buf.is_empty() {
            segments.push(StringSegment::Literal(buf));
        }
        Ok(Token::new(
            TokenKind::InterpolatedStr,
            TokenValue::Segments(segments),
            Span::new(start, p - start),
        ))
    }

    /// Classify the `$` at `at`: a bare variable, a `${…}` expression
    /// whose raw byte range is preserved for re-parsing, or a plain
    /// dollar character.
    pub(super) fn scan_dollar(
        &self,
        at: usize,
        limit: usize,
        opener: usize,
    ) -> Result<DollarScan, ParseError> {
        let b = self.at(at + 1);
        if b.is_ascii_uppercase() {
            return Err(self.error(at, "malformed interpolation expression"));
        }
        if b == b'{' {
            let start = at + 2;
            let Some(end) = self.find_expr_end(start, limit)? else {
                return Err(self.error(opener, "unterminated double quoted string"));
            };
            return Ok(DollarScan::Expr {
                start,
                end,
                resume: end + 1,
            });
        }
        if b.is_ascii_digit() {
            let mut i = at + 1;
            while i < limit && self.at(i).is_ascii_digit() {
                i += 1;
            }
            let name = String::from_utf8_lossy(&self.src[at + 1..i]).into_owned();
            return Ok(DollarScan::Variable { name, end: i });
        }
        let leading = b == b':' && self.at(at + 2) == b':';
        if !(b.is_ascii_lowercase() || b == b'_' || leading) {
            return Ok(DollarScan::Literal);
        }
        let mut i = at + 1;
        if leading {
            i += 2;
        }
        loop {
            while i < limit && Self::is_word(self.at(i)) {
                i += 1;
            }
            let c = self.at(i + 2);
            if self.at(i) == b':'
                && self.at(i + 1) == b':'
                && i + 2 < limit
                && (c.is_ascii_alphabetic() || c == b'_')
            {
                i += 2;
                continue;
            }
            break;
        }
        let name = String::from_utf8_lossy(&self.src[at + 1..i]).into_owned();
        Ok(DollarScan::Variable { name, end: i })
    }

    /// Find the `}` closing a `${` whose body starts at `from`. Brace
    /// counting skips nested quoted strings, which may themselves
    /// contain interpolations.
    pub(super) fn find_expr_end(&self, from: usize, limit: usize) -> Result<Option<usize>, ParseError> {
        let mut depth = 1usize;
        let mut i = from;
        while i < limit {
            match self.src[i] {
                b'{' => {
                    depth += 1;
                    i += 1;
                }
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(Some(i));
                    }
                    i += 1;
                }
                b'\'' => i = self.skip_single_quoted(i, limit)?,
                b'"' => i = self.skip_double_quoted(i, limit)?,
                _ => i += 1,
            }
        }
        Ok(None)
    }

    fn skip_single_quoted(&self, opener: usize, limit: usize) -> Result<usize, ParseError> {
        let mut i = opener + 1;
        while i < limit {
            match self.src[i] {
                b'\\' => i += 2,
                b'\'' => return Ok(i + 1),
                _ => i += 1,
            }
        }
        Err(self.error(opener, "unterminated single quoted string"))
    }

    fn skip_double_quoted(&self, opener: usize, limit: usize) -> Result<usize, ParseError> {
        let mut i = opener + 1;
        while i < limit {
            match self.src[i] {
                b'\\' => i += 2,
                b'$' if self.at(i + 1) == b'{' => {
                    match self.find_expr_end(i + 2, limit)? {
                        Some(end) => i = end + 1,
                        None => break,
                    }
                }
                b'"' => return Ok(i + 1),
                _ => i += 1,
            }
        }
        Err(self.error(opener, "unterminated double quoted string"))
    }

    /// `\uXXXX` (exactly four hex digits) or `\u{HH…}` (two to six).
    /// `at` points at the backslash; returns the decoded character and
    /// the offset to resume scanning from.
    pub(super) fn unicode_escape(&self, at: usize) -> Result<(char, usize), ParseError> {
        let malformed = || self.error(at, "malformed unicode escape sequence");
        let i = at + 2;
        if self.at(i) == b'{' {
            let mut j = i + 1;
            while j < self.end && self.at(j).is_ascii_hexdigit() {
                j += 1;
            }
            if self.at(j) != b'}' {
                return Err(malformed());
            }
            let digits = j - (i + 1);
            if !(2..=6).contains(&digits) {
                return Err(malformed());
            }
            let text = std::str::from_utf8(&self.src[i + 1..j]).unwrap_or("");
            let code = u32::from_str_radix(text, 16).map_err(|_| malformed())?;
            let ch = char::from_u32(code).ok_or_else(malformed)?;
            return Ok((ch, j + 1));
        }
        if i + 4 > self.end || !self.src[i..i + 4].iter().all(|b| b.is_ascii_hexdigit()) {
            return Err(malformed());
        }
        let text = std::str::from_utf8(&self.src[i..i + 4]).unwrap_or("");
        let code = u32::from_str_radix(text, 16).map_err(|_| malformed())?;
        let ch = char::from_u32(code).ok_or_else(malformed)?;
        Ok((ch, i + 4))
    }
}
