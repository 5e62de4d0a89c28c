//! Dev-mode context for failed patches: the code around the match before
//! and after the attempt, and a word-level diff between the two.

use std::ops::Range;

use serde::Serialize;

use crate::canonical::Matcher;

/// Characters of context kept on each side of a match.
pub const CONTEXT_RADIUS: usize = 200;

/// Token-pair budget for the LCS table; larger inputs diff as a full swap.
const MAX_DIFF_CELLS: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", content = "text", rename_all = "snake_case")]
pub enum DiffOp {
    Equal(String),
    Removed(String),
    Added(String),
}

/// Source excerpt around a failed replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchContext {
    pub before: String,
    pub after: String,
    pub diff: Vec<DiffOp>,
}

impl PatchContext {
    /// `before` is the code the rule ran against, `after` what it produced
    /// (equal to `before` when the rule itself errored).
    pub fn capture(before: &str, after: &str, matcher: &Matcher) -> Option<Self> {
        let span = locate(before, matcher)?;
        let (before, after) = context_window(before, after, span, CONTEXT_RADIUS);
        let diff = word_diff(&before, &after);
        Some(Self {
            before,
            after,
            diff,
        })
    }

    pub fn render_diff(&self) -> String {
        render_diff(&self.diff)
    }
}

/// Span of the first match of `matcher` in `code`.
pub fn locate(code: &str, matcher: &Matcher) -> Option<Range<usize>> {
    match matcher {
        Matcher::Literal(needle) => code
            .find(needle.as_str())
            .map(|start| start..start + needle.len()),
        Matcher::Pattern(p) => p.compiled().ok()?.first(code).ok()?.map(|m| m.span()),
    }
}

fn floor_boundary(s: &str, mut i: usize) -> usize {
    i = i.min(s.len());
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(s: &str, mut i: usize) -> usize {
    i = i.min(s.len());
    while !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Cut `radius` bytes around `span` out of `before`, and the same window,
/// shifted by the change in length, out of `after`.
pub fn context_window(
    before: &str,
    after: &str,
    span: Range<usize>,
    radius: usize,
) -> (String, String) {
    let start = floor_boundary(before, span.start.saturating_sub(radius));
    let end = ceil_boundary(before, span.end.saturating_add(radius));

    let shifted = (end + after.len()).saturating_sub(before.len());
    let after_start = floor_boundary(after, start);
    let after_end = ceil_boundary(after, shifted.max(after_start));

    (
        before[start..end].to_string(),
        after[after_start..after_end].to_string(),
    )
}

fn tokenize(s: &str) -> Vec<&str> {
    #[derive(PartialEq)]
    enum Class {
        Word,
        Space,
        Punct,
    }
    let class = |c: char| {
        if c.is_alphanumeric() || c == '_' || c == '$' {
            Class::Word
        } else if c.is_whitespace() {
            Class::Space
        } else {
            Class::Punct
        }
    };

    let mut tokens = Vec::new();
    let mut start = 0;
    let mut prev: Option<Class> = None;
    for (i, c) in s.char_indices() {
        let cls = class(c);
        let split = match &prev {
            Some(p) => *p != cls || cls == Class::Punct,
            None => false,
        };
        if split {
            tokens.push(&s[start..i]);
            start = i;
        }
        prev = Some(cls);
    }
    if start < s.len() {
        tokens.push(&s[start..]);
    }
    tokens
}

fn push_op(ops: &mut Vec<DiffOp>, op: DiffOp) {
    if let Some(last) = ops.last_mut() {
        match (last, &op) {
            (DiffOp::Equal(a), DiffOp::Equal(b))
            | (DiffOp::Removed(a), DiffOp::Removed(b))
            | (DiffOp::Added(a), DiffOp::Added(b)) => {
                a.push_str(b);
                return;
            },
            _ => {},
        }
    }
    ops.push(op);
}

/// Word-level diff that keeps whitespace and punctuation as their own tokens.
pub fn word_diff(old: &str, new: &str) -> Vec<DiffOp> {
    let a = tokenize(old);
    let b = tokenize(new);
    let mut ops = Vec::new();

    if a.len().saturating_mul(b.len()) > MAX_DIFF_CELLS {
        if !old.is_empty() {
            ops.push(DiffOp::Removed(old.to_string()));
        }
        if !new.is_empty() {
            ops.push(DiffOp::Added(new.to_string()));
        }
        return ops;
    }

    // lcs[i][j] = LCS length of a[i..] and b[j..]
    let width = b.len() + 1;
    let mut lcs = vec![0_u32; (a.len() + 1) * width];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            lcs[i * width + j] = if a[i] == b[j] {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            push_op(&mut ops, DiffOp::Equal(a[i].to_string()));
            i += 1;
            j += 1;
        } else if lcs[(i + 1) * width + j] >= lcs[i * width + j + 1] {
            push_op(&mut ops, DiffOp::Removed(a[i].to_string()));
            i += 1;
        } else {
            push_op(&mut ops, DiffOp::Added(b[j].to_string()));
            j += 1;
        }
    }
    for t in &a[i..] {
        push_op(&mut ops, DiffOp::Removed((*t).to_string()));
    }
    for t in &b[j..] {
        push_op(&mut ops, DiffOp::Added((*t).to_string()));
    }
    ops
}

/// `[-removed-]{+added+}` rendering for log lines.
pub fn render_diff(ops: &[DiffOp]) -> String {
    let mut out = String::new();
    for op in ops {
        match op {
            DiffOp::Equal(t) => out.push_str(t),
            DiffOp::Removed(t) => {
                out.push_str("[-");
                out.push_str(t);
                out.push_str("-]");
            },
            DiffOp::Added(t) => {
                out.push_str("{+");
                out.push_str(t);
                out.push_str("+}");
            },
        }
    }
    out
}
