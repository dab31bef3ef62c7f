//! Front-end compiler for the Lariat infrastructure configuration
//! language: a mode-aware scanner, a recursive-descent parser with
//! precedence-climbing expressions, a post-parse validator, and the PN
//! symbolic serialization used for round-tripping and golden tests.
//!
//! Parsing a buffer performs no I/O and shares no state with other
//! parses; the only process-wide piece is the read-only issue catalog.

pub mod ast;
mod error;
mod lexer;
pub mod location;
mod parser;
pub mod pn;
mod syntax;
mod token;
pub mod validator;

pub use ast::{Expr, Program};
pub use error::ParseError;
pub use pn::{encode, Pn};
pub use validator::{validate, Issue, Severity, ValidatorOptions};

use lexer::LexerModes;

/// Feature switches for a parser instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParserOptions {
    /// Allow `plan` definitions; catalog-producing forms are rejected
    /// by the validator.
    pub tasks: bool,
    /// Allow `workflow`, `resource`, and `action` activities.
    pub workflow: bool,
    /// Parse embedded-template input rather than plain manifests.
    pub epp: bool,
}

impl ParserOptions {
    pub fn tasks() -> Self {
        ParserOptions {
            tasks: true,
            ..Default::default()
        }
    }

    pub fn workflow() -> Self {
        ParserOptions {
            workflow: true,
            ..Default::default()
        }
    }

    pub fn epp() -> Self {
        ParserOptions {
            epp: true,
            ..Default::default()
        }
    }
}

/// Build a parser with the given feature switches.
pub fn create_parser(options: ParserOptions) -> LariatParser {
    LariatParser::new(options)
}

/// A configured parser. Instances are cheap and hold no parse state;
/// independent parses may run on separate threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct LariatParser {
    options: ParserOptions,
}

impl LariatParser {
    pub fn new(options: ParserOptions) -> Self {
        LariatParser { options }
    }

    /// Parse `source` into a program. With `single_expression` the
    /// input must hold exactly one expression; otherwise the result is
    /// a block of zero or more statements.
    pub fn parse(
        &self,
        file: &str,
        source: &str,
        single_expression: bool,
    ) -> Result<Program, ParseError> {
        self.parse_bytes(file, source.as_bytes(), single_expression)
    }

    /// Like [`LariatParser::parse`] but accepts raw bytes; invalid
    /// UTF-8 is reported with the byte offset of the offending byte.
    pub fn parse_bytes(
        &self,
        file: &str,
        source: &[u8],
        single_expression: bool,
    ) -> Result<Program, ParseError> {
        let modes = LexerModes {
            tasks: self.options.tasks,
            workflow: self.options.workflow,
            epp: self.options.epp,
        };
        let body = parser::parse_source(source, file, modes, single_expression)?;
        Ok(Program {
            file: file.to_string(),
            source: source.to_vec(),
            body,
        })
    }
}
