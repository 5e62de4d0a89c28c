//! A host that never runs anything.
//!
//! Used for offline previews: patched source is checked for balanced
//! delimiters instead of being evaluated, and compiled factories are no-ops.

use std::{cell::Cell, rc::Rc};

use {chunkhook_common::ModuleId, serde_json::Value, tracing::trace};

use crate::{
    error::HostError,
    host::{Factory, FactoryRef, Host, Module},
    runtime::BundlerRuntime,
};

#[derive(Debug, Default)]
pub struct InertHost {
    compiles: Cell<usize>,
}

impl InertHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful compiles so far.
    pub fn compile_count(&self) -> usize {
        self.compiles.get()
    }
}

struct InertFactory {
    source: String,
}

impl Factory<InertHost> for InertFactory {
    fn source(&self) -> String {
        self.source.clone()
    }

    fn invoke(
        &self,
        _module: &mut Module<InertHost>,
        _require: &BundlerRuntime<InertHost>,
    ) -> Result<(), HostError> {
        Ok(())
    }
}

impl Host for InertHost {
    type Exports = Value;

    fn compile(&self, module: &ModuleId, source: &str) -> Result<FactoryRef<Self>, HostError> {
        check_syntax(source)?;
        trace!(module = %module, bytes = source.len(), "inert compile");
        self.compiles.set(self.compiles.get() + 1);
        Ok(Rc::new(InertFactory {
            source: source.to_string(),
        }))
    }

    fn is_global_object(&self, _exports: &Value) -> bool {
        false
    }

    fn default_export(&self, exports: &Value) -> Option<Value> {
        exports.get("default").filter(|v| is_truthy(v)).cloned()
    }

    fn is_truthy(&self, exports: &Value) -> bool {
        is_truthy(exports)
    }
}

/// JavaScript truthiness of a JSON value.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Paren,
    Bracket,
    Brace,
    /// Inside the text of a template literal.
    Template,
    /// Inside `${ ... }` of a template literal.
    TemplateExpr,
}

/// Words after which `/` starts a regex literal rather than a division.
const REGEX_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "do", "else", "in", "of", "new", "delete", "void", "throw",
    "instanceof", "yield", "await",
];

fn regex_allowed(prev: Option<char>, last_word: &str) -> bool {
    match prev {
        None => true,
        Some(c) if is_word_char(c) => REGEX_KEYWORDS.contains(&last_word),
        Some(c) => "(,=:[!&|?{};+-*%<>~^".contains(c),
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn syntax(message: impl Into<String>) -> HostError {
    HostError::syntax(message)
}

/// Cheap structural check: balanced brackets outside strings, comments,
/// template text and regex literals.
pub fn check_syntax(source: &str) -> Result<(), HostError> {
    let chars: Vec<char> = source.chars().collect();
    let mut stack: Vec<Frame> = Vec::new();
    let mut prev: Option<char> = None;
    let mut last_word = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if stack.last() == Some(&Frame::Template) {
            match c {
                '\\' => i += 2,
                '`' => {
                    stack.pop();
                    prev = Some('`');
                    i += 1;
                },
                '$' if next == Some('{') => {
                    stack.push(Frame::TemplateExpr);
                    prev = Some('{');
                    i += 2;
                },
                _ => i += 1,
            }
            continue;
        }

        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while chars.get(i).is_some_and(|&w| is_word_char(w)) {
                i += 1;
            }
            last_word = chars[start..i].iter().collect();
            prev = Some('a');
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit())) {
            i += 1;
            while let Some(&d) = chars.get(i) {
                let signed_exponent =
                    matches!(d, '+' | '-') && matches!(chars[i - 1], 'e' | 'E');
                if !(is_word_char(d) || d == '.' || signed_exponent) {
                    break;
                }
                i += 1;
            }
            last_word.clear();
            prev = Some('0');
            continue;
        }

        match c {
            '/' if next == Some('/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            },
            '/' if next == Some('*') => {
                i += 2;
                loop {
                    match (chars.get(i), chars.get(i + 1)) {
                        (Some('*'), Some('/')) => break,
                        (Some(_), _) => i += 1,
                        (None, _) => return Err(syntax("unterminated comment")),
                    }
                }
                i += 2;
                continue;
            },
            '/' if regex_allowed(prev, &last_word) => {
                i += 1;
                let mut in_class = false;
                loop {
                    match chars.get(i) {
                        Some('\\') => i += 1,
                        Some('[') => in_class = true,
                        Some(']') => in_class = false,
                        Some('/') if !in_class => break,
                        Some('\n') | None => return Err(syntax("unterminated regular expression")),
                        Some(_) => {},
                    }
                    i += 1;
                }
                i += 1;
                while chars.get(i).is_some_and(|f| f.is_ascii_alphabetic()) {
                    i += 1;
                }
                prev = Some('a');
                last_word.clear();
                continue;
            },
            '"' | '\'' => {
                i += 1;
                loop {
                    match chars.get(i) {
                        Some('\\') => i += 1,
                        Some(q) if *q == c => break,
                        Some('\n') | None => return Err(syntax("unterminated string literal")),
                        Some(_) => {},
                    }
                    i += 1;
                }
            },
            '`' => stack.push(Frame::Template),
            '(' => stack.push(Frame::Paren),
            '[' => stack.push(Frame::Bracket),
            '{' => stack.push(Frame::Brace),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => Frame::Paren,
                    ']' => Frame::Bracket,
                    _ => Frame::Brace,
                };
                match stack.pop() {
                    Some(top) if top == expected => {},
                    Some(Frame::TemplateExpr) if c == '}' => {},
                    _ => return Err(syntax(format!("unexpected token '{c}'"))),
                }
            },
            _ => {},
        }
        last_word.clear();
        prev = Some(c);
        i += 1;
    }

    if stack.is_empty() {
        Ok(())
    } else {
        Err(syntax("unexpected end of input"))
    }
}
