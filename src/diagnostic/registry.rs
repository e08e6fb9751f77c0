/// An entry in the error code registry.
pub struct ErrorEntry {
    pub code: &'static str,
    pub short: &'static str,  // brief description for tooling
    pub long: &'static str,   // full explanation for `blockstep explain`
}

/// All stable codegen error codes. Every one of them means the block code
/// generator emitted source the engine cannot run.
pub static REGISTRY: &[ErrorEntry] = &[
    // ── Lexer ────────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "BLK-L001",
        short: "unexpected character",
        long: r#"## BLK-L001: unexpected character

The generated program contains a character that is not part of the
supported JavaScript subset.

**Example:**

    highlightBlock('a'); x = 1 # 2;

`#` is not an operator. Bitwise operators (`&`, `|`, `^`, `~`, `<<`) and
regular expression literals are not supported either; a generator that
emits them must be changed to use arithmetic or helper blocks instead.
"#,
    },
    ErrorEntry {
        code: "BLK-L002",
        short: "malformed string literal",
        long: r#"## BLK-L002: malformed string literal

A string literal was not closed on the same line, or contains a bad
escape sequence.

**Example:**

    highlightBlock('b1);

Strings may use single or double quotes and the escapes `\n \t \r \b
\f \v \0 \xHH \uHHHH`. Multi-line strings must use `\n`.
"#,
    },
    // ── Parser ───────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "BLK-P001",
        short: "unexpected token",
        long: r#"## BLK-P001: unexpected token

The parser found a token where it expected something else: a missing
`)`, a stray `,`, or an identifier missing after `var`.

**Example:**

    move(1, );

Check the template that generates the offending block.
"#,
    },
    ErrorEntry {
        code: "BLK-P002",
        short: "unexpected end of input",
        long: r#"## BLK-P002: unexpected end of input

The program ended in the middle of a statement or expression, usually
because a generated `{` or `(` was never closed.

**Example:**

    while (loopTrap > 0) { highlightBlock('a');
"#,
    },
    ErrorEntry {
        code: "BLK-P003",
        short: "invalid assignment target",
        long: r#"## BLK-P003: invalid assignment target

Only variables, `object.property` and `object[index]` can be assigned or
incremented.

**Example:**

    f() = 3;
    5++;
"#,
    },
    ErrorEntry {
        code: "BLK-P004",
        short: "function expressions are not supported",
        long: r#"## BLK-P004: function expressions are not supported

Functions may only be declared at the top level of the program with
`function name(params) { ... }`. Anonymous functions, closures and
arrow functions are not part of the supported subset.

**Example:**

    var f = function (x) { return x; };

**Fix:**

    function f(x) { return x; }
"#,
    },
    // ── Compiler ─────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "BLK-C001",
        short: "'break' outside of a loop",
        long: r#"## BLK-C001: 'break' outside of a loop

A `break` statement appeared where there is no enclosing `while`,
`do ... while` or `for` loop. Labels and `switch` are not supported.
"#,
    },
    ErrorEntry {
        code: "BLK-C002",
        short: "'continue' outside of a loop",
        long: r#"## BLK-C002: 'continue' outside of a loop

A `continue` statement appeared where there is no enclosing loop.
"#,
    },
    ErrorEntry {
        code: "BLK-C003",
        short: "'return' outside of a function",
        long: r#"## BLK-C003: 'return' outside of a function

The top level of a block program cannot `return`. To end the program
early, call `exit(success, message)`.

**Example:**

    if (done) return;

**Fix:**

    if (done) exit(true, 'finished early');
"#,
    },
    ErrorEntry {
        code: "BLK-C004",
        short: "nested function declaration",
        long: r#"## BLK-C004: nested function declaration

Function declarations are only allowed at the top level. A function
declared inside another function would need a closure, which the
engine does not support. Generate procedure definitions as top-level
functions and pass values through parameters or globals.
"#,
    },
    ErrorEntry {
        code: "BLK-C005",
        short: "program too large",
        long: r#"## BLK-C005: program too large

A single function needs more than 65535 distinct constants, a call has
more than 255 arguments, or a literal has more than 65535 elements.
Split the generated program into procedures.
"#,
    },
];

/// Look up an error entry by code (e.g. `"BLK-P001"`).
pub fn lookup(code: &str) -> Option<&'static ErrorEntry> {
    REGISTRY.iter().find(|e| e.code == code)
}
