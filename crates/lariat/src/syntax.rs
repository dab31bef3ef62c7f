/// Bareword functions that may be called statement-style without
/// parentheses around their arguments.
pub const STATEMENT_CALLS: &[&str] = &[
    "require", "realize", "include", "contain", "tag", "debug", "info", "notice", "warning",
    "err", "fail", "import", "break", "next", "return",
];

/// Words reserved for future use; in expression position they parse to
/// `reserved` nodes rather than names.
pub const RESERVED_WORDS: &[&str] = &["attr", "private"];

/// Activity styles recognized inside workflow definitions.
pub const ACTIVITY_STYLES: &[&str] = &["workflow", "resource", "action"];

pub fn is_statement_call(name: &str) -> bool {
    STATEMENT_CALLS.contains(&name)
}

pub fn is_reserved_word(name: &str) -> bool {
    RESERVED_WORDS.contains(&name)
}
