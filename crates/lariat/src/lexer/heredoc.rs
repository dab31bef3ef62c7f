use super::strings::DollarScan;
use super::Lexer;
use crate::error::ParseError;
use crate::location::Span;
use crate::token::{HeredocValue, StringSegment, Token, TokenKind, TokenValue};

#[derive(Debug, Clone, Copy, Default)]
struct EscapeFlags {
    tab: bool,
    cr: bool,
    nl: bool,
    space: bool,
    unicode: bool,
    dollar: bool,
    line_join: bool,
}

fn is_blank(b: u8) -> bool {
    b == b' ' || b == b'\t' || b == b'\r'
}

/// Match a candidate end-marker line: `[ws][|[ws]][-[ws]]TAG[ws]`.
/// Returns the `|` column (the margin) and whether the final newline is
/// trimmed.
fn parse_end_marker(line: &[u8], tag: &str) -> Option<(Option<usize>, bool)> {
    let mut i = 0;
    while i < line.len() && is_blank(line[i]) {
        i += 1;
    }
    let mut margin = None;
    if i < line.len() && line[i] == b'|' {
        margin = Some(i);
        i += 1;
        while i < line.len() && is_blank(line[i]) {
            i += 1;
        }
    }
    let mut trim = false;
    if i < line.len() && line[i] == b'-' {
        trim = true;
        i += 1;
        while i < line.len() && is_blank(line[i]) {
            i += 1;
        }
    }
    let tag_bytes = tag.as_bytes();
    if !line[i..].starts_with(tag_bytes) {
        return None;
    }
    i += tag_bytes.len();
    while i < line.len() && is_blank(line[i]) {
        i += 1;
    }
    (i == line.len()).then_some((margin, trim))
}

impl<'a> Lexer<'a> {
    /// Scan a `@(TAG[:syntax][/flags])` opener and consume the body it
    /// refers to. The body starts after the opener line's newline, or
    /// after the previous pending heredoc's end marker when several
    /// openers share a line.
    pub(super) fn scan_heredoc(&mut self, start: usize) -> Result<Token, ParseError> {
        let mut p = start + 2;
        let mut tag: Option<String> = None;
        let mut quoted = false;
        let mut syntax = String::new();
        let mut syntax_seen = false;
        let mut flags: Option<EscapeFlags> = None;

        loop {
            if p >= self.end {
                return Err(self.error(start, "unterminated @("));
            }
            match self.src[p] {
                b'\n' => return Err(self.error(start, "unterminated @(")),
                b')' => {
                    p += 1;
                    break;
                }
                b' ' | b'\t' | b'\r' => p += 1,
                b'"' => {
                    if tag.is_some() {
                        return Err(self.error(p, "more than one tag declaration in heredoc"));
                    }
                    let mut i = p + 1;
                    let mut text = String::new();
                    loop {
                        if i >= self.end || self.src[i] == b'\n' {
                            return Err(self.error(start, "unterminated @("));
                        }
                        if self.src[i] == b'"' {
                            i += 1;
                            break;
                        }
                        let (ch, len) = self.decode_char(i)?;
                        text.push(ch);
                        i += len;
                    }
                    quoted = true;
                    tag = Some(text);
                    p = i;
                }
                b':' => {
                    if syntax_seen {
                        return Err(self.error(p, "more than one syntax declaration in heredoc"));
                    }
                    syntax_seen = true;
                    p += 1;
                    let from = p;
                    while p < self.end
                        && !matches!(self.src[p], b':' | b'/' | b')' | b'"' | b'\n' | b' ' | b'\t' | b'\r')
                    {
                        p += 1;
                    }
                    syntax = String::from_utf8_lossy(&self.src[from..p]).into_owned();
                }
                b'/' => {
                    if flags.is_some() {
                        return Err(self.error(
                            p,
                            "more than one declaration of escape flags in heredoc",
                        ));
                    }
                    p += 1;
                    let mut set = EscapeFlags::default();
                    while p < self.end
                        && !matches!(self.src[p], b':' | b'/' | b')' | b'"' | b'\n' | b' ' | b'\t' | b'\r')
                    {
                        match self.src[p] {
                            b't' => set.tab = true,
                            b'r' => set.cr = true,
                            b'n' => set.nl = true,
                            b's' => set.space = true,
                            b'u' => set.unicode = true,
                            b'$' => set.dollar = true,
                            b'L' => set.line_join = true,
                            c => {
                                return Err(self.error(
                                    p,
                                    format!("illegal heredoc escape '{}'", c as char),
                                ))
                            }
                        }
                        p += 1;
                    }
                    flags = Some(set);
                }
                _ => {
                    if tag.is_some() {
                        return Err(self.error(p, "more than one tag declaration in heredoc"));
                    }
                    let from = p;
                    while p < self.end
                        && !matches!(self.src[p], b':' | b'/' | b')' | b'"' | b'\n' | b' ' | b'\t' | b'\r')
                    {
                        p += 1;
                    }
                    tag = Some(String::from_utf8_lossy(&self.src[from..p]).into_owned());
                }
            }
        }

        let tag = tag.unwrap_or_default();
        if tag.is_empty() {
            return Err(self.error(start, "empty heredoc tag"));
        }
        let flags = flags.unwrap_or_default();
        let token_span = Span::new(start, p - start);
        self.pos = p;

        let mut line_end = p;
        while line_end < self.end && self.src[line_end] != b'\n' {
            line_end += 1;
        }
        if line_end >= self.end {
            return Err(self.error(start, "unterminated heredoc"));
        }
        let body_start = self.heredoc_skip.take().unwrap_or(line_end + 1);

        let mut lines: Vec<(usize, usize)> = Vec::new();
        let mut marker = None;
        let mut resume = self.end;
        let mut ls = body_start;
        while ls < self.end {
            let mut le = ls;
            while le < self.end && self.src[le] != b'\n' {
                le += 1;
            }
            if let Some(found) = parse_end_marker(&self.src[ls..le], &tag) {
                marker = Some(found);
                resume = (le + 1).min(self.end);
                break;
            }
            lines.push((ls, le));
            if le >= self.end {
                break;
            }
            ls = le + 1;
        }
        let Some((margin, trim_nl)) = marker else {
            return Err(self.error(start, "unterminated heredoc"));
        };
        self.heredoc_skip = Some(resume);

        let segments = self.heredoc_segments(&lines, margin, trim_nl, flags, quoted)?;
        Ok(Token::new(
            TokenKind::HeredocTok,
            TokenValue::Heredoc(HeredocValue { syntax, segments }),
            token_span,
        ))
    }

    /// Strip the margin, apply escape flags and (for quoted tags)
    /// interpolation in one pass, then trim the final newline when the
    /// end marker asked for it.
    fn heredoc_segments(
        &self,
        lines: &[(usize, usize)],
        margin: Option<usize>,
        trim_nl: bool,
        flags: EscapeFlags,
        interpolate: bool,
    ) -> Result<Vec<StringSegment>, ParseError> {
        let margin = margin.unwrap_or(0);
        let mut segments: Vec<StringSegment> = Vec::new();
        let mut buf = String::new();

        for (idx, &(ls, le)) in lines.iter().enumerate() {
            let mut i = ls;
            if margin > 0
                && le - ls >= margin
                && self.src[ls..ls + margin].iter().all(|b| *b == b' ' || *b == b'\t')
            {
                i = ls + margin;
            }
            let mut join = false;
            while i < le {
                match self.src[i] {
                    b'\\' => {
                        let at_line_end =
                            i + 1 >= le || self.src[i + 1..le].iter().all(|b| *b == b'\r');
                        if at_line_end {
                            if flags.line_join && idx + 1 < lines.len() {
                                join = true;
                                i = le;
                                continue;
                            }
                            buf.push('\\');
                            i += 1;
                            continue;
                        }
                        match self.src[i + 1] {
                            b't' if flags.tab => {
                                buf.push('\t');
                                i += 2;
                            }
                            b'r' if flags.cr => {
                                buf.push('\r');
                                i += 2;
                            }
                            b'n' if flags.nl => {
                                buf.push('\n');
                                i += 2;
                            }
                            b's' if flags.space => {
                                buf.push(' ');
                                i += 2;
                            }
                            b'$' if flags.dollar => {
                                buf.push('$');
                                i += 2;
                            }
                            b'u' if flags.unicode => {
                                let (ch, resume) = self.unicode_escape(i)?;
                                buf.push(ch);
                                i = resume;
                            }
                            _ => {
                                buf.push('\\');
                                i += 1;
                            }
                        }
                    }
                    b'$' if interpolate => match self.scan_dollar(i, le, i)? {
                        DollarScan::Variable { name, end } => {
                            if !buf.is_empty() {
                                segments.push(StringSegment::Literal(std::mem::take(&mut buf)));
                            }
                            segments.push(StringSegment::Variable {
                                name,
                                offset: i,
                                length: end - i,
                            });
                            i = end;
                        }
                        DollarScan::Expr { start, end, resume } => {
                            if !buf.is_empty() {
                                segments.push(StringSegment::Literal(std::mem::take(&mut buf)));
                            }
                            segments.push(StringSegment::Expr {
                                offset: start,
                                length: end - start,
                            });
                            i = resume;
                        }
                        DollarScan::Literal => {
                            buf.push('$');
                            i += 1;
                        }
                    },
                    _ => {
                        let (ch, len) = self.decode_char(i)?;
                        buf.push(ch);
                        i += len;
                    }
                }
            }
            if !join {
                buf.push('\n');
            }
        }

        if trim_nl && buf.ends_with('\n') {
            buf.pop();
            if buf.ends_with('\r') {
                buf.pop();
            }
        }
        if !buf.is_empty() || segments.is_empty() {
            segments.push(StringSegment::Literal(buf));
        }
        Ok(segments)
    }
}
