use serde::Serialize;

/// Byte range into the source buffer that produced a token or AST node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub offset: usize,
    pub length: usize,
}

impl Span {
    pub fn new(offset: usize, length: usize) -> Self {
        Span { offset, length }
    }

    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    /// Smallest span covering both `self` and `other`.
    pub fn through(&self, other: Span) -> Span {
        let offset = self.offset.min(other.offset);
        Span {
            offset,
            length: self.end().max(other.end()) - offset,
        }
    }
}

/// 1-based line and column derived from a byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

/// Translates byte offsets into positions. Lines are separated by `\n`,
/// `\r\n` (counted once), or a lone `\r`; columns count characters, not
/// bytes, from the line start.
#[derive(Debug, Clone)]
pub struct Locator<'a> {
    source: &'a [u8],
}

impl<'a> Locator<'a> {
    pub fn new(source: &'a [u8]) -> Self {
        Locator { source }
    }

    pub fn position(&self, offset: usize) -> Position {
        let offset = offset.min(self.source.len());
        let mut line = 1;
        let mut line_start = 0;
        let mut i = 0;
        while i < offset {
            match self.source[i] {
                b'\n' => {
                    line += 1;
                    line_start = i + 1;
                }
                b'\r' => {
                    if self.source.get(i + 1) != Some(&b'\n') {
                        line += 1;
                        line_start = i + 1;
                    }
                }
                _ => {}
            }
            i += 1;
        }
        let column = 1 + self.source[line_start..offset]
            .iter()
            .filter(|b| (**b & 0xc0) != 0x80)
            .count();
        Position { line, column }
    }
}
