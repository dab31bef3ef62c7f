use lariat::{Expr, LariatParser, ParserOptions};

fn single(source: &str) -> Expr {
    let program = LariatParser::new(ParserOptions::default())
        .parse("", source, false)
        .expect("parse failed");
    match program.body {
        Expr::Block { statements, .. } if statements.len() == 1 => {
            statements.into_iter().next().expect("statement")
        }
        other => other,
    }
}

fn expect_dump(source: &str, expected: &str) {
    assert_eq!(single(source).to_pn().to_string(), expected, "source: {source}");
}

fn expect_error(source: &str, expected: &str) {
    let err = LariatParser::new(ParserOptions::default())
        .parse("", source, false)
        .expect_err("expected a parse error");
    assert_eq!(err.to_string(), expected, "source: {source}");
}

/// When the heredoc body is a plain string, `expected` is the body
/// text; otherwise it is the PN rendering of the whole heredoc.
fn expect_heredoc(source: &str, expected: &str) {
    expect_heredoc_syntax(source, expected, "");
}

fn expect_heredoc_syntax(source: &str, expected: &str, syntax: &str) {
    let expr = single(source);
    let Expr::Heredoc { ref text, syntax: ref actual_syntax, .. } = expr else {
        panic!("'{source}' did not result in a heredoc expression");
    };
    assert_eq!(actual_syntax, syntax, "syntax of {source}");
    if let Expr::LiteralString { value, .. } = text.as_ref() {
        assert_eq!(value, expected, "source: {source}");
    } else {
        assert_eq!(expr.to_pn().to_string(), expected, "source: {source}");
    }
}

#[test]
fn plain_heredocs() {
    expect_heredoc("@(END)\nEND", "");
    expect_heredoc("@(END)\nThis is\nheredoc text\nEND", "This is\nheredoc text\n");
    expect_error(
        "@(END)\nThis is\nheredoc text",
        "unterminated heredoc (line: 1, column: 1)",
    );
    expect_error(
        "@(END\n/t)\nThis\\nis\\nheredoc\\ntext\n-END",
        "unterminated @( (line: 1, column: 1)",
    );
    expect_error(
        "@(END)\nThis\\nis\\nheredoc\\ntext\n\n",
        "unterminated heredoc (line: 1, column: 1)",
    );
    expect_error("@(END)", "unterminated heredoc (line: 1, column: 1)");
}

#[test]
fn queued_heredocs_drain_in_order() {
    expect_dump(
        "{ a => @(ONE), b => @(TWO) }\nThe first\nheredoc text\n-ONE\nThe second\nheredoc text\n-TWO",
        r#"(hash (=> (qn "a") (heredoc {:text "The first\nheredoc text"})) (=> (qn "b") (heredoc {:text "The second\nheredoc text"})))"#,
    );
    expect_dump(
        "['first', @(SECOND), 'third', @(FOURTH), 'fifth',\n  This is the text of the\n  second entry\n  |-SECOND\n  And here is the text of the\n  fourth entry\n  |-FOURTH\n  'sixth']",
        r#"(array "first" (heredoc {:text "This is the text of the\nsecond entry"}) "third" (heredoc {:text "And here is the text of the\nfourth entry"}) "fifth" "sixth")"#,
    );
}

#[test]
fn heredoc_syntax_declarations() {
    expect_dump(
        "@(END:syntax)\nThis is\nheredoc text\nEND",
        r#"(heredoc {:syntax "syntax" :text "This is\nheredoc text\n"})"#,
    );
    expect_error(
        "@(END:json:yaml)\nThis is\nheredoc text",
        "more than one syntax declaration in heredoc (line: 1, column: 11)",
    );
}

#[test]
fn heredoc_escape_flags() {
    expect_heredoc("@(END/t)\nThis\\tis\\t\nheredoc text\n-END", "This\tis\t\nheredoc text");
    expect_heredoc("@(END/s)\nThis\\sis\\sheredoc\\stext\n-END", "This is heredoc text");
    expect_heredoc("@(END/r)\nThis\\ris\\rheredoc\\rtext\n-END", "This\ris\rheredoc\rtext");
    expect_heredoc("@(END/n)\nThis\\nis\\nheredoc\\ntext\n-END", "This\nis\nheredoc\ntext");
    expect_heredoc_syntax(
        "@(END:syntax/n)\nThis\\nis\\nheredoc\\ntext\n-END",
        "This\nis\nheredoc\ntext",
        "syntax",
    );
    expect_error(
        "@(END/k)\nThis\\nis\\nheredoc\\ntext\n-END",
        "illegal heredoc escape 'k' (line: 1, column: 7)",
    );
    expect_error(
        "@(END/t/s)\nThis\\nis\\nheredoc\\ntext\n-END",
        "more than one declaration of escape flags in heredoc (line: 1, column: 8)",
    );
}

#[test]
fn crlf_bodies_keep_their_line_endings() {
    expect_heredoc(
        "@(END)\r\nThis is\r\nheredoc text\r\n-END",
        "This is\r\nheredoc text",
    );
}

#[test]
fn margin_stripping() {
    expect_heredoc(
        "@(END/t)\n  This\\tis\n  heredoc text\n  | END\n",
        "This\tis\nheredoc text\n",
    );
    expect_heredoc("@(END)\n  | END\n", "");
    // Lines with less margin than the marker defines are untouched.
    expect_heredoc(
        "@(END/t)\n  This\\tis\n heredoc text\n  | END\n",
        "This\tis\n heredoc text\n",
    );
}

#[test]
fn margin_and_newline_trim() {
    expect_heredoc(
        "@(END/t)\n  This\\tis\n  heredoc text\n  |- END",
        "This\tis\nheredoc text",
    );
    expect_heredoc("@(END)\n  |-END\n", "");
}

#[test]
fn interpolated_heredocs() {
    expect_heredoc(
        "@(\"END\")\n  This is\n  heredoc $text\n  |- END",
        r#"(heredoc {:text (concat "This is\nheredoc " (str (var "text")))})"#,
    );
    expect_heredoc(
        "@(\"END\")\n  This is\n  heredoc $a \\$b\n  |- END",
        r#"(heredoc {:text (concat "This is\nheredoc " (str (var "a")) " \\" (str (var "b")))})"#,
    );
    expect_heredoc(
        "@(\"END\"/$)\n  This is\n  heredoc $a \\$b\n  |- END",
        r#"(heredoc {:text (concat "This is\nheredoc " (str (var "a")) " $b")})"#,
    );
    expect_heredoc(
        "@(END)\n  This is\n  heredoc $text\n  |- END",
        "This is\nheredoc $text",
    );
    expect_error(
        "@(\"END\"\"MORE\")\n  This is\n  heredoc $text\n  |- END",
        "more than one tag declaration in heredoc (line: 1, column: 8)",
    );
    expect_error(
        "@(\"END\n\")\n  This is\n  heredoc $text\n  |- END",
        "unterminated @( (line: 1, column: 1)",
    );
    expect_error(
        "@(\"\")\n  This is\n  heredoc $text\n  |-",
        "empty heredoc tag (line: 1, column: 1)",
    );
    expect_error(
        "@()\n  This is\n  heredoc $text\n  |-",
        "empty heredoc tag (line: 1, column: 1)",
    );
}

#[test]
fn line_continuation_escapes() {
    expect_heredoc(
        "@(END/L)\n  Do not break \\\n  this line\n  |- END",
        "Do not break this line",
    );
    expect_heredoc(
        "@(END/L)\n  Do not break \\\n  this line\\\n  |- END",
        "Do not break this line\\",
    );
    expect_heredoc(
        "@(END/t)\n  Do break \\\n  this line\n  |- END",
        "Do break \\\nthis line",
    );
    expect_heredoc(
        "@(END/u)\n  A checkmark \\u2713 symbol\n  |- END",
        "A checkmark \u{2713} symbol",
    );
}

#[test]
fn unicode_escapes() {
    expect_heredoc(
        "@(END/u)\n  A hat \\u{1f452} symbol\n  |- END",
        "A hat \u{1f452} symbol",
    );
    expect_error(
        "@(END/u)\n  A hat \\u{1f452 symbol\n  |- END",
        "malformed unicode escape sequence (line: 2, column: 9)",
    );
    expect_error(
        "@(END/u)\n  A hat \\u{1f45234} symbol\n  |- END",
        "malformed unicode escape sequence (line: 2, column: 9)",
    );
    expect_error(
        "@(END/u)\n  A hat \\u{1} symbol\n  |- END",
        "malformed unicode escape sequence (line: 2, column: 9)",
    );
    expect_error(
        "@(END/u)\n  A checkmark \\u271 symbol\n  |- END",
        "malformed unicode escape sequence (line: 2, column: 15)",
    );
    expect_error(
        "@(END/u)\n  A checkmark \\ux271 symbol\n  |- END",
        "malformed unicode escape sequence (line: 2, column: 15)",
    );
}

#[test]
fn comments_may_trail_the_opener() {
    expect_heredoc(
        "@(END) /* comment after tag */\nThis is\nheredoc text\nEND",
        "This is\nheredoc text\n",
    );
    expect_heredoc(
        "@(END) # comment after tag\nThis is\nheredoc text\nEND",
        "This is\nheredoc text\n",
    );
}
