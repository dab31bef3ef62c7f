use std::collections::HashMap;
use std::sync::OnceLock;

use serde::Serialize;

pub const VALIDATE_APPENDS_DELETES_NO_LONGER_SUPPORTED: &str =
    "VALIDATE_APPENDS_DELETES_NO_LONGER_SUPPORTED";
pub const VALIDATE_CATALOG_OPERATION_NOT_SUPPORTED: &str =
    "VALIDATE_CATALOG_OPERATION_NOT_SUPPORTED";
pub const VALIDATE_CROSS_SCOPE_ASSIGNMENT: &str = "VALIDATE_CROSS_SCOPE_ASSIGNMENT";
pub const VALIDATE_DUPLICATE_DEFAULT: &str = "VALIDATE_DUPLICATE_DEFAULT";
pub const VALIDATE_IDEM_EXPRESSION_NOT_LAST: &str = "VALIDATE_IDEM_EXPRESSION_NOT_LAST";
pub const VALIDATE_ILLEGAL_ASSIGNMENT_VIA_INDEX: &str = "VALIDATE_ILLEGAL_ASSIGNMENT_VIA_INDEX";
pub const VALIDATE_ILLEGAL_ATTRIBUTE_APPEND: &str = "VALIDATE_ILLEGAL_ATTRIBUTE_APPEND";
pub const VALIDATE_ILLEGAL_CLASSREF: &str = "VALIDATE_ILLEGAL_CLASSREF";
pub const VALIDATE_ILLEGAL_EXPRESSION: &str = "VALIDATE_ILLEGAL_EXPRESSION";
pub const VALIDATE_ILLEGAL_NUMERIC_ASSIGNMENT: &str = "VALIDATE_ILLEGAL_NUMERIC_ASSIGNMENT";
pub const VALIDATE_NOT_RVALUE: &str = "VALIDATE_NOT_RVALUE";
pub const VALIDATE_UNSUPPORTED_OPERATOR_IN_CONTEXT: &str =
    "VALIDATE_UNSUPPORTED_OPERATOR_IN_CONTEXT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Hard,
    Soft,
}

struct IssueDef {
    severity: Severity,
    format: &'static str,
}

/// Process-wide issue catalog, filled once and read-only afterwards.
fn registry() -> &'static HashMap<&'static str, IssueDef> {
    static REGISTRY: OnceLock<HashMap<&'static str, IssueDef>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map = HashMap::new();
        let mut hard = |code: &'static str, format: &'static str| {
            map.insert(code, IssueDef { severity: Severity::Hard, format });
        };
        hard(
            VALIDATE_APPENDS_DELETES_NO_LONGER_SUPPORTED,
            "The operator '%s' is no longer supported. See http://links.puppet.com/remove-plus-equals",
        );
        hard(
            VALIDATE_CATALOG_OPERATION_NOT_SUPPORTED,
            "%s is not available when compiling for tasks",
        );
        hard(
            VALIDATE_CROSS_SCOPE_ASSIGNMENT,
            "Illegal attempt to assign to '%s'. Cannot assign to variables in other namespaces",
        );
        hard(
            VALIDATE_DUPLICATE_DEFAULT,
            "This %s already has a 'default' entry - this is a duplicate",
        );
        hard(
            VALIDATE_ILLEGAL_ASSIGNMENT_VIA_INDEX,
            "Illegal attempt to assign via [index/key]. Not an assignable reference",
        );
        hard(
            VALIDATE_ILLEGAL_ATTRIBUTE_APPEND,
            "Illegal +> operation on attribute %s. This operator can not be used in %s",
        );
        hard(
            VALIDATE_ILLEGAL_CLASSREF,
            "Illegal type reference. The given name '%s' does not conform to the naming rule",
        );
        hard(
            VALIDATE_ILLEGAL_EXPRESSION,
            "Illegal expression. %s is unacceptable as %s in %s",
        );
        hard(
            VALIDATE_ILLEGAL_NUMERIC_ASSIGNMENT,
            "Illegal attempt to assign to the numeric match result variable '$%s'. Numeric variables are not assignable",
        );
        hard(
            VALIDATE_NOT_RVALUE,
            "Invalid use of expression. %s does not produce a value",
        );
        hard(
            VALIDATE_UNSUPPORTED_OPERATOR_IN_CONTEXT,
            "The operator '%s' in %s is not supported",
        );
        map.insert(
            VALIDATE_IDEM_EXPRESSION_NOT_LAST,
            IssueDef {
                severity: Severity::Soft,
                format: "This %s has no effect. A value was produced and then forgotten (one or more preceding expressions may have the wrong form)",
            },
        );
        map
    })
}

pub fn severity(code: &str) -> Severity {
    registry()
        .get(code)
        .map(|def| def.severity)
        .unwrap_or(Severity::Hard)
}

/// Substitute `%s` placeholders positionally, the way the issue catalog
/// formats have always been written.
pub fn message(code: &str, args: &[&str]) -> String {
    let format = registry().get(code).map(|def| def.format).unwrap_or(code);
    let mut out = String::with_capacity(format.len());
    let mut args = args.iter();
    let mut rest = format;
    while let Some(at) = rest.find("%s") {
        out.push_str(&rest[..at]);
        out.push_str(args.next().copied().unwrap_or("%s"));
        rest = &rest[at + 2..];
    }
    out.push_str(rest);
    out
}
