//! Structural syntax check for Python snippets.
//!
//! This is not a parser. It tokenizes just enough of the host grammar to reject the
//! failures generated code actually shows: unbalanced brackets, unterminated strings,
//! block headers without a colon or body, bad dedents, dangling operators, operands
//! or operators placed back to back, clauses with no opening block, and statements
//! outside the block they need.

use serde::{Deserialize, Serialize};

/// First problem found, located by 1-based physical line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxIssue {
    pub line: usize,
    pub message: String,
}

impl SyntaxIssue {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

const BLOCK_KEYWORDS: &[&str] = &[
    "if", "elif", "else", "for", "while", "try", "except", "finally", "with", "def", "class",
    "async",
];

const DANGLING_OPERATORS: &[char] = &['=', '+', '-', '/', '%', '&', '|', '^', '<', '>'];

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

/// Names that start a statement only in some positions
const SOFT_KEYWORDS: &[&str] = &["match", "case", "type"];

const STRING_PREFIXES: &[&str] = &[
    "r", "u", "b", "f", "t", "br", "rb", "fr", "rf", "tr", "rt",
];

/// Longest first, so `**=` wins over `**` and `*`
const OPERATORS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "...", "->", ":=", "**", "//", "<<", ">>", "<=", ">=", "==",
    "!=", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "@=", "+", "-", "*", "/", "%", "@",
    "&", "|", "^", "~", "<", ">", "=", ".", ",", ":", ";", "(", ")", "[", "]", "{", "}",
];

/// Operators that need a left operand
const BINARY_ONLY: &[&str] = &[
    "*", "**", "/", "//", "%", "@", "<<", ">>", "&", "|", "^", "<", ">", "<=", ">=", "==",
    "!=", "=", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "@=", "**=", "//=", ">>=",
    "<<=", ":=",
];

const EXPRESSION_OPERATORS: &[&str] = &[
    "+", "-", "*", "**", "/", "//", "%", "@", "<<", ">>", "&", "|", "^", "~", "<", ">", "<=",
    ">=", "==", "!=",
];

const ASSIGNMENTS: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "@=", "**=", "//=", ">>=", "<<=",
    ":=",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Name(&'a str),
    Number,
    Str,
    Op(&'a str),
}

impl Token<'_> {
    fn is_value_name(name: &str) -> bool {
        !KEYWORDS.contains(&name) || matches!(name, "True" | "False" | "None")
    }

    fn ends_operand(self) -> bool {
        match self {
            Token::Name(name) => Self::is_value_name(name),
            Token::Number | Token::Str => true,
            Token::Op(op) => matches!(op, ")" | "]" | "}" | "..."),
        }
    }

    fn starts_operand(self) -> bool {
        match self {
            Token::Name(name) => Self::is_value_name(name),
            Token::Number | Token::Str => true,
            Token::Op(op) => matches!(op, "{" | "..."),
        }
    }

    fn is_op(self, set: &[&str]) -> bool {
        matches!(self, Token::Op(op) if set.contains(&op))
    }
}

fn number_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    let hex = text.starts_with("0x") || text.starts_with("0X");
    let mut end = 0;
    while end < bytes.len() {
        let b = bytes[end];
        let exponent_sign =
            matches!(b, b'+' | b'-') && end > 0 && !hex && matches!(bytes[end - 1], b'e' | b'E');
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || exponent_sign {
            end += 1;
        } else {
            break;
        }
    }
    end
}

fn tokenize(logical: &LogicalLine) -> Result<Vec<Token<'_>>, SyntaxIssue> {
    let mut tokens = Vec::new();
    let mut rest = logical.text.as_str();

    while let Some(ch) = rest.chars().next() {
        if ch.is_whitespace() {
            rest = &rest[ch.len_utf8()..];
        } else if ch == '"' {
            tokens.push(Token::Str);
            rest = &rest[1..];
        } else if ch.is_ascii_digit()
            || (ch == '.' && rest[1..].starts_with(|c: char| c.is_ascii_digit()))
        {
            tokens.push(Token::Number);
            rest = &rest[number_len(rest)..];
        } else if ch.is_alphabetic() || ch == '_' {
            let len = rest
                .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            let word = &rest[..len];
            rest = &rest[len..];
            if rest.starts_with('"') && STRING_PREFIXES.contains(&word.to_ascii_lowercase().as_str())
            {
                tokens.push(Token::Str);
                rest = &rest[1..];
            } else {
                tokens.push(Token::Name(word));
            }
        } else {
            let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)).copied() else {
                return Err(SyntaxIssue::new(
                    logical.line,
                    format!("invalid character '{ch}'"),
                ));
            };
            tokens.push(Token::Op(op));
            rest = &rest[op.len()..];
        }
    }
    Ok(tokens)
}

/// Token adjacency rules within one logical line
fn check_tokens(logical: &LogicalLine) -> Result<(), SyntaxIssue> {
    let tokens = tokenize(logical)?;
    let invalid = |message: &str| Err(SyntaxIssue::new(logical.line, message));
    let first = tokens.first().copied();
    let relative_import = first == Some(Token::Name("from"));
    let soft_statement = matches!(first, Some(Token::Name(name)) if SOFT_KEYWORDS.contains(&name));

    for (i, pair) in tokens.windows(2).enumerate() {
        let (prev, next) = (pair[0], pair[1]);

        if prev.ends_operand() && next.starts_operand() {
            let strings = prev == Token::Str && next == Token::Str;
            if strings || (i == 0 && soft_statement) {
                continue;
            }
            if i == 0 && prev == Token::Name("print") {
                return invalid("Missing parentheses in call to 'print'. Did you mean print(...)?");
            }
            return invalid("invalid syntax. Perhaps you forgot a comma?");
        }

        if prev == Token::Op(".") && !relative_import {
            let follows_operand = i > 0 && tokens[i - 1].ends_operand();
            if !follows_operand || !matches!(next, Token::Name(_)) {
                return invalid("invalid syntax");
            }
        }

        let dangling_binary = (prev.is_op(EXPRESSION_OPERATORS) && next.is_op(BINARY_ONLY))
            || (prev.is_op(ASSIGNMENTS) && next.is_op(BINARY_ONLY) && next != Token::Op("*"));
        if dangling_binary {
            return invalid("invalid syntax");
        }

        if prev.is_op(&["(", "{"]) && next == Token::Op(":") {
            return invalid("invalid syntax");
        }
    }

    if tokens.last() == Some(&Token::Op(".")) && !relative_import {
        return invalid("invalid syntax");
    }
    Ok(())
}

/// `line` up to its comment; a `#` inside a string literal does not start one
pub fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (pos, ch) in line.char_indices() {
        match quote {
            Some(open) => {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == open {
                    quote = None;
                }
            }
            None => match ch {
                '#' => return &line[..pos],
                '\'' | '"' => quote = Some(ch),
                _ => {}
            },
        }
    }
    line
}

/// A logical line with strings blanked out and comments removed
struct LogicalLine {
    line: usize,
    indent: usize,
    text: String,
}

/// Check `code`; `Ok` when no structural problem was found
pub fn check(code: &str) -> Result<(), SyntaxIssue> {
    let lines = logical_lines(code)?;
    check_blocks(&lines)
}

fn indent_width(line: &str) -> usize {
    let mut width = 0;
    for ch in line.chars() {
        match ch {
            ' ' => width += 1,
            '\t' => width = (width / 8 + 1) * 8,
            _ => break,
        }
    }
    width
}

/// Split into logical lines, validating brackets and string literals on the way
fn logical_lines(code: &str) -> Result<Vec<LogicalLine>, SyntaxIssue> {
    let chars: Vec<char> = code.chars().collect();
    let mut lines = Vec::new();
    let mut brackets: Vec<(char, usize)> = Vec::new();
    let mut current = String::new();
    let mut line_no = 1;
    let mut start_line = 1;
    let mut at_line_start = true;
    let mut indent = 0;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];

        if at_line_start {
            let rest: String = chars[i..].iter().take_while(|c| **c != '\n').collect();
            indent = indent_width(&rest);
            start_line = line_no;
            at_line_start = false;
        }

        match ch {
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '\'' | '"' => {
                let triple = i + 2 < chars.len() && chars[i + 1] == ch && chars[i + 2] == ch;
                let opened_at = line_no;
                i += if triple { 3 } else { 1 };
                let mut closed = false;
                while i < chars.len() {
                    let c = chars[i];
                    if c == '\\' {
                        if i + 1 < chars.len() && chars[i + 1] == '\n' {
                            line_no += 1;
                        }
                        i += 2;
                        continue;
                    }
                    if c == '\n' {
                        if !triple {
                            return Err(SyntaxIssue::new(opened_at, "unterminated string literal"));
                        }
                        line_no += 1;
                    }
                    if c == ch
                        && (!triple
                            || (i + 2 < chars.len() && chars[i + 1] == ch && chars[i + 2] == ch))
                    {
                        i += if triple { 3 } else { 1 };
                        closed = true;
                        break;
                    }
                    i += 1;
                }
                if !closed {
                    let message = if triple {
                        "unterminated triple-quoted string literal"
                    } else {
                        "unterminated string literal"
                    };
                    return Err(SyntaxIssue::new(opened_at, message));
                }
                current.push('"');
                continue;
            }
            '(' | '[' | '{' => brackets.push((ch, line_no)),
            ')' | ']' | '}' => {
                let expected = match ch {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match brackets.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, _)) => {
                        return Err(SyntaxIssue::new(
                            line_no,
                            format!("closing parenthesis '{ch}' does not match opening parenthesis '{open}'"),
                        ));
                    }
                    None => {
                        return Err(SyntaxIssue::new(line_no, format!("unmatched '{ch}'")));
                    }
                }
            }
            '\\' if i + 1 < chars.len() && chars[i + 1] == '\n' => {
                line_no += 1;
                i += 2;
                current.push(' ');
                continue;
            }
            '\n' => {
                line_no += 1;
                if brackets.is_empty() {
                    flush(&mut lines, &mut current, start_line, indent);
                    at_line_start = true;
                } else {
                    current.push(' ');
                }
                i += 1;
                continue;
            }
            _ => {}
        }

        current.push(ch);
        i += 1;
    }

    if let Some((open, line)) = brackets.pop() {
        let pending = LogicalLine {
            line: start_line,
            indent,
            text: current.trim().to_string(),
        };
        check_tokens(&pending)?;
        return Err(SyntaxIssue::new(line, format!("'{open}' was never closed")));
    }
    flush(&mut lines, &mut current, start_line, indent);
    Ok(lines)
}

fn flush(lines: &mut Vec<LogicalLine>, current: &mut String, line: usize, indent: usize) {
    let text = current.trim().to_string();
    current.clear();
    if !text.is_empty() {
        lines.push(LogicalLine { line, indent, text });
    }
}

fn first_word(text: &str) -> &str {
    let end = text
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(text.len());
    &text[..end]
}

const ELIF_PARENTS: &[&str] = &["if", "elif"];
const ELSE_PARENTS: &[&str] = &["if", "elif", "for", "while", "async", "except"];
const EXCEPT_PARENTS: &[&str] = &["try", "except"];
const FINALLY_PARENTS: &[&str] = &["try", "except", "else"];

/// Clauses that continue a compound statement, with the clauses they may follow
fn clause_parents(word: &str) -> Option<&'static [&'static str]> {
    match word {
        "elif" => Some(ELIF_PARENTS),
        "else" => Some(ELSE_PARENTS),
        "except" => Some(EXCEPT_PARENTS),
        "finally" => Some(FINALLY_PARENTS),
        _ => None,
    }
}

/// Header keyword, looking past `async`
fn header_kind(text: &str) -> &str {
    let word = first_word(text);
    if word == "async" {
        first_word(text[word.len()..].trim_start())
    } else {
        word
    }
}

/// Statements that only make sense inside an enclosing def or loop
fn check_placement(line: usize, word: &str, scopes: &[(usize, &str)]) -> Result<(), SyntaxIssue> {
    let innermost = |kinds: &[&str]| {
        scopes
            .iter()
            .rev()
            .map(|(_, kind)| *kind)
            .find(|kind| kinds.contains(kind))
    };
    match word {
        "return" | "yield" if !scopes.iter().any(|(_, kind)| *kind == "def") => Err(
            SyntaxIssue::new(line, format!("'{word}' outside function")),
        ),
        "break" if !matches!(innermost(&["for", "while", "def", "class"]), Some("for" | "while")) => {
            Err(SyntaxIssue::new(line, "'break' outside loop"))
        }
        "continue"
            if !matches!(innermost(&["for", "while", "def", "class"]), Some("for" | "while")) =>
        {
            Err(SyntaxIssue::new(line, "'continue' not properly in loop"))
        }
        _ => Ok(()),
    }
}

/// Indentation, block structure and token rules over logical lines
fn check_blocks(lines: &[LogicalLine]) -> Result<(), SyntaxIssue> {
    let mut stack = vec![0usize];
    // last statement at each open indentation level
    let mut siblings: Vec<(usize, &str)> = Vec::new();
    // enclosing def, class and loop headers
    let mut scopes: Vec<(usize, &str)> = Vec::new();
    let mut expect_body = false;
    let mut last_line = 0;

    for logical in lines {
        let top = *stack.last().unwrap_or(&0);
        if expect_body {
            if logical.indent <= top {
                return Err(SyntaxIssue::new(logical.line, "expected an indented block"));
            }
            stack.push(logical.indent);
        } else if logical.indent > top {
            return Err(SyntaxIssue::new(logical.line, "unexpected indent"));
        } else if logical.indent < top {
            while stack.last().is_some_and(|level| *level > logical.indent) {
                stack.pop();
            }
            if stack.last() != Some(&logical.indent) {
                return Err(SyntaxIssue::new(
                    logical.line,
                    "unindent does not match any outer indentation level",
                ));
            }
        }

        let text = logical.text.as_str();
        check_tokens(logical)?;
        if let Some(op) = text.chars().last().filter(|c| DANGLING_OPERATORS.contains(c)) {
            return Err(SyntaxIssue::new(
                logical.line,
                format!("invalid syntax: line ends with '{op}'"),
            ));
        }

        let word = first_word(text);
        while siblings.last().is_some_and(|(indent, _)| *indent > logical.indent) {
            siblings.pop();
        }
        let previous = siblings
            .last()
            .filter(|(indent, _)| *indent == logical.indent)
            .map(|(_, word)| *word);
        if let Some(parents) = clause_parents(word) {
            if !previous.is_some_and(|p| parents.contains(&p)) {
                return Err(SyntaxIssue::new(logical.line, "invalid syntax"));
            }
        }
        match siblings.last_mut() {
            Some(last) if last.0 == logical.indent => last.1 = word,
            _ => siblings.push((logical.indent, word)),
        }

        while scopes.last().is_some_and(|(indent, _)| *indent >= logical.indent) {
            scopes.pop();
        }
        check_placement(logical.line, word, &scopes)?;

        expect_body = false;
        let soft_header = matches!(word, "match" | "case") && text.ends_with(':');
        if BLOCK_KEYWORDS.contains(&word) || soft_header {
            if text.ends_with(':') {
                expect_body = true;
                let kind = header_kind(text);
                if matches!(kind, "def" | "class" | "for" | "while") {
                    scopes.push((logical.indent, kind));
                }
            } else if !text.contains(':') {
                return Err(SyntaxIssue::new(logical.line, "expected ':'"));
            }
        }
        last_line = logical.line;
    }

    if expect_body {
        return Err(SyntaxIssue::new(last_line, "expected an indented block"));
    }
    Ok(())
}
