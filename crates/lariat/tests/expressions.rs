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
    assert_eq!(
        single(source).to_pn().to_string(),
        expected,
        "source: {source}"
    );
}

fn expect_block(source: &str, expected: &str) {
    let program = LariatParser::new(ParserOptions::default())
        .parse("", source, false)
        .expect("parse failed");
    assert_eq!(program.body.to_pn().to_string(), expected, "source: {source}");
}

fn expect_error(source: &str, expected: &str) {
    let err = LariatParser::new(ParserOptions::default())
        .parse("", source, false)
        .expect_err("expected a parse error");
    assert_eq!(err.to_string(), expected, "source: {source}");
}

#[test]
fn empty_input_is_an_empty_block() {
    expect_block("", "(block)");
}

#[test]
fn invalid_utf8_reports_byte_offsets() {
    let parser = LariatParser::new(ParserOptions::default());
    let err = parser
        .parse_bytes("", b"$var = \"\xa0\xa1\"", false)
        .expect_err("expected error");
    assert_eq!(err.to_string(), "invalid unicode character at offset 8");
    let err = parser
        .parse_bytes("", b"$var = 23\xa0\xa1", false)
        .expect_err("expected error");
    assert_eq!(err.to_string(), "invalid unicode character at offset 9");
}

#[test]
fn integers() {
    expect_dump("0", "0");
    expect_dump("123", "123");
    expect_dump("+123", "123");
    expect_dump("0XABC", "(int {:radix 16 :value 2748})");
    expect_dump("0772", "(int {:radix 8 :value 506})");
    expect_error("3g", "digit expected (line: 1, column: 2)");
    expect_error("3ö", "digit expected (line: 1, column: 2)");
    expect_error("0x3g21", "hexadecimal digit expected (line: 1, column: 4)");
    expect_error("078", "octal digit expected (line: 1, column: 3)");
}

#[test]
fn negative_integers_fold_into_the_literal() {
    expect_dump("-123", "-123");
}

#[test]
fn floats() {
    expect_dump("0.123", "0.123");
    expect_dump("123.32", "123.32");
    expect_dump("+123.32", "123.32");
    expect_dump("-123.32", "-123.32");
    expect_dump("12e12", "1.2e+13");
    expect_dump("12e-12", "1.2e-11");
    expect_dump("12.23e12", "1.223e+13");
    expect_dump("12.23e-12", "1.223e-11");

    expect_error("123.a", "digit expected (line: 1, column: 5)");
    expect_error("123.4a", "digit expected (line: 1, column: 6)");
    expect_error("123.45ex", "digit expected (line: 1, column: 8)");
    expect_error("123.45e3x", "digit expected (line: 1, column: 9)");
}

#[test]
fn booleans_undef_and_default() {
    expect_dump("false", "false");
    expect_dump("true", "true");
    expect_dump("default", "(default)");
    expect_dump("undef", "nil");
}

#[test]
fn single_quoted_strings() {
    expect_dump("'undef'", r#""undef""#);
    expect_dump(r"'escaped single \''", r#""escaped single '""#);
    expect_dump(r"'unknown escape \k'", r#""unknown escape \\k""#);
    expect_dump("$x = 'a string'", r#"(= (var "x") "a string")"#);
    expect_dump(r"$x = 'a \'string\' with \\'", r#"(= (var "x") "a 'string' with \\")"#);
    expect_error(
        "$x = 'y\nnotice($x)",
        "unterminated single quoted string (line: 1, column: 6)",
    );
    expect_error(
        "$x = 'y\\",
        "unterminated single quoted string (line: 1, column: 6)",
    );
}

#[test]
fn double_quoted_strings() {
    expect_dump(
        r#""string\nwith\t\\t,\s\\s, \\r, and \\n\r\n""#,
        r#""string\nwith\t\\t, \\s, \\r, and \\n\r\n""#,
    );
    expect_dump(r#""unknown \k escape""#, r#""unknown \\k escape""#);
    expect_dump(r#""control \u{14}""#, r#""control \o024""#);
    expect_dump(r#""x\u2713y""#, "\"x\u{2713}y\"");
    expect_dump(r#""x\u{1f452}y""#, "\"x\u{1f452}y\"");
}

#[test]
fn string_interpolation() {
    expect_dump(r#""$var""#, r#"(concat (str (var "var")))"#);
    expect_dump(r#""hello $var""#, r#"(concat "hello " (str (var "var")))"#);
    expect_dump(r#""hello ${var}""#, r#"(concat "hello " (str (var "var")))"#);
    expect_dump(r#""hello ${}""#, r#"(concat "hello " (str nil))"#);
    expect_dump(
        r#""Before ${{ a => true, b => "hello"}} and after""#,
        r#"(concat "Before " (str (hash (=> (qn "a") true) (=> (qn "b") "hello"))) " and after")"#,
    );
    expect_error(
        r#""$Var""#,
        "malformed interpolation expression (line: 1, column: 2)",
    );
    expect_error(
        "$x = \"y\nnotice($x)",
        "unterminated double quoted string (line: 1, column: 6)",
    );
    expect_error(
        "$x = \"y${var\"",
        "unterminated double quoted string (line: 1, column: 13)",
    );
}

#[test]
fn regexp_literals() {
    expect_dump("$a = /.*/", r#"(= (var "a") (regexp ".*"))"#);
    expect_dump(r"/pattern\/with\/slash/", r#"(regexp "pattern/with/slash")"#);
    expect_dump(r"/pattern\/with\\\/slash/", r#"(regexp "pattern/with\\\\/slash")"#);
    expect_dump(r"/escaped \t/", r#"(regexp "escaped \\t")"#);
    expect_dump(
        "/escaped #rx comment\ncontinues\n.*/",
        r#"(regexp "escaped #rx comment\ncontinues\n.*")"#,
    );
    expect_error("$a = /.*", "unexpected token '/' (line: 1, column: 6)");
}

#[test]
fn reserved_words() {
    expect_dump("$a = attr", r#"(= (var "a") (reserved "attr"))"#);
    expect_dump("$a = private", r#"(= (var "a") (reserved "private"))"#);
}

#[test]
fn variables() {
    expect_dump("$var", r#"(var "var")"#);
    expect_dump("$var::b", r#"(var "var::b")"#);
    expect_dump("$::var::b", r#"(var "::var::b")"#);
    expect_dump("$::var::_b", r#"(var "::var::_b")"#);
    expect_dump("$2", "(var 2)");
    expect_dump("$", r#"(var "")"#);

    expect_error("$var:b", "unexpected token ':' (line: 1, column: 5)");
    expect_error("$Var", "invalid variable name (line: 1, column: 2)");
    expect_error("$:var::b", "invalid variable name (line: 1, column: 1)");
    expect_error("$::var::B", "invalid variable name (line: 1, column: 1)");
    expect_error("$::var::_b::c", "invalid variable name (line: 1, column: 1)");
    expect_error("$::_var::b", "unexpected token '_' (line: 1, column: 4)");
}

#[test]
fn arrays() {
    expect_dump("[1,2,3]", "(array 1 2 3)");
    expect_dump("[1,2,3,]", "(array 1 2 3)");
    expect_dump("[1,2,a=>3]", r#"(array 1 2 (hash (=> (qn "a") 3)))"#);
    expect_dump(
        "[1,2,a=>3,b=>4]",
        r#"(array 1 2 (hash (=> (qn "a") 3) (=> (qn "b") 4)))"#,
    );
    expect_dump(
        "[1,2,a=>3,b=>4,5]",
        r#"(array 1 2 (hash (=> (qn "a") 3) (=> (qn "b") 4)) 5)"#,
    );
    expect_dump(
        "[1,2,{a=>3},b=>4,5]",
        r#"(array 1 2 (hash (=> (qn "a") 3)) (hash (=> (qn "b") 4)) 5)"#,
    );
    expect_error(
        "[1,2 3]",
        "expected one of ',' or ']', got 'integer literal' (line: 1, column: 6)",
    );
    expect_error(
        "[1,2,3",
        "expected one of ',' or ']', got 'EOF' (line: 1, column: 7)",
    );
}

#[test]
fn hashes() {
    expect_dump(
        "{ a => true, b => false, c => undef, d => 12, e => 23.5, c => 'hello' }",
        r#"(hash (=> (qn "a") true) (=> (qn "b") false) (=> (qn "c") nil) (=> (qn "d") 12) (=> (qn "e") 23.5) (=> (qn "c") "hello"))"#,
    );
    expect_dump(
        "{a => 1, b => 2,}",
        r#"(hash (=> (qn "a") 1) (=> (qn "b") 2))"#,
    );
    expect_dump(
        "{type => consumes, function => site, application => produces,}",
        r#"(hash (=> (qn "type") (qn "consumes")) (=> (qn "function") (qn "site")) (=> (qn "application") (qn "produces")))"#,
    );
    expect_error(
        "{a => 1, b, 2}",
        "expected '=>' to follow hash key (line: 1, column: 12)",
    );
    expect_error(
        "{a => 1 b => 2}",
        "expected one of ',' or '}', got 'identifier' (line: 1, column: 9)",
    );
    expect_error(
        "{a => 1, b => 2",
        "expected one of ',' or '}', got 'EOF' (line: 1, column: 16)",
    );
}

#[test]
fn statement_blocks() {
    let expected = concat!(
        r#"(block "#,
        r#"(= (var "t") "the") "#,
        r#"(= (var "r") "revealed") "#,
        r#"(= (var "map") (hash (=> "ipl" "meaning") (=> 4.2e+01 "life"))) "#,
        r#"(concat (str (var "t")) " " (str (access (var "map") "ipl")) " of " (str (access (var "map") 4.2e+01)) (str (access (array 3 (concat " is not " (str (var "r")))) 1)) " here"))"#,
    );
    expect_block(
        "$t = 'the'\n$r = 'revealed'\n$map = {'ipl' => 'meaning', 42.0 => 'life'}\n\"$t ${map['ipl']} of ${map[42.0]}${[3, \" is not ${r}\"][1]} here\"",
        expected,
    );
    expect_block(
        "$t = 'the';\n$r = 'revealed';\n$map = {'ipl' => 'meaning', 42.0 => 'life'};\n\"$t ${map['ipl']} of ${map[42.0]}${[3, \" is not ${r}\"][1]} here\"",
        expected,
    );
    expect_error(
        "$a = 'a',\n$b = 'b'",
        "Extraneous comma between statements (line: 1, column: 10)",
    );
}

#[test]
fn identifiers() {
    expect_dump("name", r#"(qn "name")"#);
    expect_dump("Name", r#"(qr "Name")"#);
    expect_dump("Ab::Bc", r#"(qr "Ab::Bc")"#);
    expect_dump(
        "$x = ::assertType(::TheType, $y)",
        r#"(= (var "x") (call {:functor (qn "::assertType") :args [(qr "::TheType") (var "y")]}))"#,
    );
    expect_error("abc:cde", "unexpected token ':' (line: 1, column: 4)");
    expect_error("Ab::bc", "invalid type name (line: 1, column: 1)");
    expect_error("$x = ::3m", ":: not followed by name segment (line: 1, column: 6)");
}

#[test]
fn comments_are_skipped() {
    expect_block(
        "$x = 'y'\n# The above is a variable assignment\n# and here is a notice of the assigned\n# value\n#\nnotice($y)",
        r#"(block (= (var "x") "y") (invoke {:functor (qn "notice") :args [(var "y")]}))"#,
    );
    expect_block(
        "$x = 'y' # A variable assignment\nnotice($y)",
        r#"(block (= (var "x") "y") (invoke {:functor (qn "notice") :args [(var "y")]}))"#,
    );
    expect_block(
        "# [*version*]\n#   The package version to install, used to set the package name.\n#   Defaults to undefined",
        "(block)",
    );
    expect_block(
        "$x = 'y'\n/* The above is a variable assignment\n   and here is a notice of the assigned\n   value\n*/\nnotice($y)",
        r#"(block (= (var "x") "y") (invoke {:functor (qn "notice") :args [(var "y")]}))"#,
    );
    expect_error(
        "$x = 'y'\n/* The above is a variable assignment\nnotice($y)",
        "unterminated /* */ comment (line: 2, column: 1)",
    );
}

#[test]
fn stray_operator_characters() {
    expect_error("$x ~ 'y'\nnotice($x)", "unexpected token '~' (line: 1, column: 4)");
    expect_error("$x ^ 'y'\nnotice($x)", "unexpected token '^' (line: 1, column: 4)");
}

#[test]
fn if_expressions() {
    expect_dump(
        "$x = if $y {\n  true\n} else {\n  false\n}",
        r#"(= (var "x") (if {:test (var "y") :then [true] :else [false]}))"#,
    );
    expect_dump(
        "$x = if $y > 2 {\n} else {\n  false\n}",
        r#"(= (var "x") (if {:test (> (var "y") 2) :then [] :else [false]}))"#,
    );
    expect_dump(
        "$x = if $y != 34 {\n  true\n} else {\n}",
        r#"(= (var "x") (if {:test (!= (var "y") 34) :then [true] :else []}))"#,
    );
    expect_dump(
        "$x = if $y {\n  1\n} elsif $z {\n  2\n} else {\n  3\n}",
        r#"(= (var "x") (if {:test (var "y") :then [1] :else [(if {:test (var "z") :then [2] :else [3]})]}))"#,
    );
    expect_dump(
        "$x = if $y == if $x {\n  true\n} { false }",
        r#"(= (var "x") (if {:test (== (var "y") (if {:test (var "x") :then [true]})) :then [false]}))"#,
    );
    expect_error("$x = else { 3 }", "unexpected token 'else' (line: 1, column: 6)");
}

#[test]
fn unless_expressions() {
    expect_dump(
        "$x = unless $y {\n  true\n} else {\n  false\n}",
        r#"(= (var "x") (unless {:test (var "y") :then [true] :else [false]}))"#,
    );
    expect_dump(
        "$x = unless $y {\n} else {\n  false\n}",
        r#"(= (var "x") (unless {:test (var "y") :then [] :else [false]}))"#,
    );
    expect_dump(
        "$x = unless $y {\n  true\n} else {\n}",
        r#"(= (var "x") (unless {:test (var "y") :then [true] :else []}))"#,
    );
    expect_dump(
        "$x = if $y == unless $x {\n  true\n} { false }",
        r#"(= (var "x") (if {:test (== (var "y") (unless {:test (var "x") :then [true]})) :then [false]}))"#,
    );
    expect_error(
        "$x = unless $y {\n  1\n} elsif $z {\n  2\n} else {\n  3\n}",
        "elsif not supported in unless expression (line: 3, column: 8)",
    );
}

#[test]
fn selectors() {
    expect_dump(
        "$rootgroup = $facts['os']['family'] ? 'Solaris' => 'wheel'",
        r#"(= (var "rootgroup") (? (access (access (var "facts") "os") "family") [(=> "Solaris" "wheel")]))"#,
    );
    let expected = r#"(= (var "rootgroup") (? (access (access (var "facts") "os") "family") [(=> "Solaris" "wheel") (=> (regexp "(Darwin|FreeBSD)") "wheel") (=> (default) "root")]))"#;
    expect_dump(
        "$rootgroup = $facts['os']['family'] ? {\n  'Solaris'          => 'wheel',\n  /(Darwin|FreeBSD)/ => 'wheel',\n  default            => 'root'\n}",
        expected,
    );
    expect_dump(
        "$rootgroup = $facts['os']['family'] ? {\n  'Solaris'          => 'wheel',\n  /(Darwin|FreeBSD)/ => 'wheel',\n  default            => 'root',\n}",
        expected,
    );
}

#[test]
fn case_expressions() {
    expect_dump(
        "case $facts['os']['name'] {\n  'Solaris':           { include role::solaris }\n  'RedHat', 'CentOS':  { include role::redhat  }\n  /^(Debian|Ubuntu)$/: { include role::debian  }\n  default:             { include role::generic }\n}",
        concat!(
            r#"(case (access (access (var "facts") "os") "name") ["#,
            r#"{:when ["Solaris"] :then [(invoke {:functor (qn "include") :args [(qn "role::solaris")]})]} "#,
            r#"{:when ["RedHat" "CentOS"] :then [(invoke {:functor (qn "include") :args [(qn "role::redhat")]})]} "#,
            r#"{:when [(regexp "^(Debian|Ubuntu)$")] :then [(invoke {:functor (qn "include") :args [(qn "role::debian")]})]} "#,
            r#"{:when [(default)] :then [(invoke {:functor (qn "include") :args [(qn "role::generic")]})]}])"#,
        ),
    );
}

#[test]
fn access_expressions() {
    let expected = concat!(
        r#"(access (qr "Struct") "#,
        r#"(hash "#,
        r#"(=> (access (qr "Optional") (qn "description")) (qr "String")) "#,
        r#"(=> (access (qr "Optional") (qn "sensitive")) (qr "Boolean")) "#,
        r#"(=> (qn "type") (qr "Type"))))"#,
    );
    expect_dump(
        "Struct[{\n  Optional[description] => String,\n  Optional[sensitive] => Boolean,\n  type => Type}]",
        expected,
    );
    expect_dump(
        "Struct[\n  Optional[description] => String,\n  Optional[sensitive] => Boolean,\n  type => Type]",
        expected,
    );
}

#[test]
fn operator_precedence() {
    expect_dump(
        "$x = a or b and c < d == e << f + g * -h",
        r#"(= (var "x") (or (qn "a") (and (qn "b") (< (qn "c") (== (qn "d") (<< (qn "e") (+ (qn "f") (* (qn "g") (- (qn "h"))))))))))"#,
    );
    expect_dump(
        "$x = -h / g + f << e == d <= c and b or a",
        r#"(= (var "x") (or (and (<= (== (<< (+ (/ (- (qn "h")) (qn "g")) (qn "f")) (qn "e")) (qn "d")) (qn "c")) (qn "b")) (qn "a")))"#,
    );
    expect_dump("$x = !a == b", r#"(= (var "x") (== (! (qn "a")) (qn "b")))"#);
    expect_dump("$x = a > b", r#"(= (var "x") (> (qn "a") (qn "b")))"#);
    expect_dump("$x = a >= b", r#"(= (var "x") (>= (qn "a") (qn "b")))"#);
    expect_dump("$x = a +b", r#"(= (var "x") (+ (qn "a") (qn "b")))"#);
    expect_dump("$x = +4", r#"(= (var "x") 4)"#);
    expect_dump("$x = 10 - 5 - 3", r#"(= (var "x") (- (- 10 5) 3))"#);
    expect_dump("$x = 10 - 5 * 3", r#"(= (var "x") (- 10 (* 5 3)))"#);
    expect_dump("$x = a * (b + c)", r#"(= (var "x") (* (qn "a") (paren (+ (qn "b") (qn "c")))))"#);
    expect_dump("$x = $y -= $z", r#"(= (var "x") (-= (var "y") (var "z")))"#);
    expect_dump("$x = $y + $z % 5", r#"(= (var "x") (+ (var "y") (% (var "z") 5)))"#);
    expect_dump("$x = $y += $z", r#"(= (var "x") (+= (var "y") (var "z")))"#);
    expect_error("$x = +b", "unexpected token '+' (line: 1, column: 7)");
}

#[test]
fn match_operators() {
    expect_dump("a =~ /^[a-z]+$/", r#"(=~ (qn "a") (regexp "^[a-z]+$"))"#);
    expect_dump("a !~ /^[a-z]+$/", r#"(!~ (qn "a") (regexp "^[a-z]+$"))"#);
}

#[test]
fn in_operator() {
    expect_dump("'eat' in 'eaten'", r#"(in "eat" "eaten")"#);
    expect_dump("'eat' in ['eat', 'ate', 'eating']", r#"(in "eat" (array "eat" "ate" "eating"))"#);
}

#[test]
fn interpolated_method_calls() {
    expect_dump(
        r#""${x[3].y}""#,
        r#"(concat (str (call-method {:functor (. (access (var "x") 3) (qn "y")) :args []})))"#,
    );
    expect_dump(
        r#""${x[3].y.z}""#,
        r#"(concat (str (call-method {:functor (. (call-method {:functor (. (access (var "x") 3) (qn "y")) :args []}) (qn "z")) :args []})))"#,
    );
}
