//! JavaScript regex dialect on top of `fancy-regex`.
//!
//! Patch patterns are written for the host's JavaScript engine. Two things
//! need bridging before they compile here:
//!
//! - braces that do not form a `{n}`, `{n,}` or `{n,m}` quantifier are
//!   literals in JavaScript and get escaped;
//! - a leading lookbehind whose body is not fixed-length (`(?<=\i,{a:\i,)`)
//!   is rewritten into a consumed prefix followed by an empty marker group,
//!   and the reported match starts at the marker.

use std::ops::Range;

use fancy_regex::{Captures, Regex};

use crate::{
    canonical::PatternFlags,
    error::{Error, Result},
    replace::MatchGroups,
};

/// Internal group marking where the match starts after a rewritten lookbehind.
const MATCH_START_GROUP: &str = "chunkhook_match_start";

/// A compiled pattern with group numbering as the pattern's author wrote it.
#[derive(Debug)]
pub struct CompiledPattern {
    regex: Regex,
    /// Internal index of the match-start marker, if the pattern was rewritten.
    marker: Option<usize>,
    /// Named groups with their author-facing indices.
    names: Vec<(String, usize)>,
}

impl CompiledPattern {
    pub(crate) fn new(source: &str, flags: PatternFlags) -> std::result::Result<Self, String> {
        let source = escape_literal_braces(source);
        match Regex::new(&with_flags(&source, flags)) {
            Ok(regex) => Ok(Self::from_regex(regex, None)),
            Err(direct) => {
                let Some((behind, rest)) = split_leading_lookbehind(&source) else {
                    return Err(direct.to_string());
                };
                let before = count_groups(behind);
                let rewritten = format!(
                    "(?:{behind})(?<{MATCH_START_GROUP}>){}",
                    shift_backreferences(rest, before)
                );
                let regex =
                    Regex::new(&with_flags(&rewritten, flags)).map_err(|_| direct.to_string())?;
                Ok(Self::from_regex(regex, Some(before + 1)))
            },
        }
    }

    fn from_regex(regex: Regex, marker: Option<usize>) -> Self {
        let names = regex
            .capture_names()
            .enumerate()
            .filter_map(|(i, name)| {
                let name = name.filter(|n| *n != MATCH_START_GROUP)?;
                Some((name.to_string(), external_index(i, marker)))
            })
            .collect();
        Self {
            regex,
            marker,
            names,
        }
    }

    /// Every non-overlapping match, left to right.
    pub fn matches<'p, 'h>(
        &'p self,
        haystack: &'h str,
    ) -> impl Iterator<Item = Result<MatchGroups<'h>>> + use<'p, 'h> {
        self.regex.captures_iter(haystack).map(move |caps| {
            caps.map(|caps| self.groups(haystack, &caps))
                .map_err(|e| self.match_failed(&e))
        })
    }

    pub fn first<'h>(&self, haystack: &'h str) -> Result<Option<MatchGroups<'h>>> {
        self.matches(haystack).next().transpose()
    }

    pub fn is_match(&self, haystack: &str) -> Result<bool> {
        self.regex
            .is_match(haystack)
            .map_err(|e| self.match_failed(&e))
    }

    fn groups<'h>(&self, haystack: &'h str, caps: &Captures<'h>) -> MatchGroups<'h> {
        let mut spans: Vec<Option<Range<usize>>> = (0..caps.len())
            .filter(|i| Some(*i) != self.marker)
            .map(|i| caps.get(i).map(|m| m.range()))
            .collect();
        if let Some(start) = self.marker.and_then(|i| caps.get(i))
            && let Some(Some(whole)) = spans.first_mut()
        {
            whole.start = start.start();
        }
        MatchGroups::new(haystack, spans, self.names.clone())
    }

    fn match_failed(&self, e: &fancy_regex::Error) -> Error {
        Error::MatchFailed {
            pattern: self.regex.as_str().to_string(),
            reason: e.to_string(),
        }
    }
}

fn external_index(internal: usize, marker: Option<usize>) -> usize {
    match marker {
        Some(m) if internal > m => internal - 1,
        _ => internal,
    }
}

fn with_flags(source: &str, flags: PatternFlags) -> String {
    let mut inline = String::new();
    for (set, c) in [
        (flags.ignore_case, 'i'),
        (flags.multiline, 'm'),
        (flags.dot_all, 's'),
    ] {
        if set {
            inline.push(c);
        }
    }
    if inline.is_empty() {
        source.to_string()
    } else {
        format!("(?{inline}){source}")
    }
}

/// Length in bytes of a `{n}`, `{n,}` or `{n,m}` quantifier at the start of `s`.
fn quantifier_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let digits = |from: usize| {
        bytes[from..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count()
    };
    let mut i = 1;
    let lo = digits(i);
    if lo == 0 {
        return None;
    }
    i += lo;
    if bytes.get(i) == Some(&b',') {
        i += 1;
        i += digits(i);
    }
    (bytes.get(i) == Some(&b'}')).then_some(i + 1)
}

/// Escape braces that are literals in JavaScript, and `[` inside classes.
fn escape_literal_braces(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut in_class = false;
    let mut i = 0;
    while let Some(c) = source[i..].chars().next() {
        match c {
            '\\' => {
                let len = source[i + 1..].chars().next().map_or(0, char::len_utf8);
                out.push_str(&source[i..i + 1 + len]);
                i += 1 + len;
                continue;
            },
            '[' if in_class => out.push_str(r"\["),
            '[' => {
                in_class = true;
                out.push('[');
            },
            ']' if in_class => {
                in_class = false;
                out.push(']');
            },
            '{' if !in_class => match quantifier_len(&source[i..]) {
                Some(len) => {
                    out.push_str(&source[i..i + len]);
                    i += len;
                    continue;
                },
                None => out.push_str(r"\{"),
            },
            '}' if !in_class => out.push_str(r"\}"),
            _ => out.push(c),
        }
        i += c.len_utf8();
    }
    out
}

/// Split `(?<=X)Y` into `(X, Y)`.
fn split_leading_lookbehind(source: &str) -> Option<(&str, &str)> {
    let body = source.strip_prefix("(?<=")?;
    let mut depth = 1usize;
    let mut in_class = false;
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            },
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '(' if !in_class => depth += 1,
            ')' if !in_class => {
                depth -= 1;
                if depth == 0 {
                    return Some((&body[..i], &body[i + 1..]));
                }
            },
            _ => {},
        }
    }
    None
}

/// Number of capturing groups in `source`.
fn count_groups(source: &str) -> usize {
    let mut count = 0;
    let mut in_class = false;
    let mut chars = source.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            },
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '(' if !in_class => {
                let rest = &source[i + 1..];
                let lookbehind = rest.starts_with("?<=") || rest.starts_with("?<!");
                let named = (rest.starts_with("?<") && !lookbehind) || rest.starts_with("?P<");
                if !rest.starts_with('?') || named {
                    count += 1;
                }
            },
            _ => {},
        }
    }
    count
}

/// Renumber `\N` backreferences above `after` by one.
fn shift_backreferences(source: &str, after: usize) -> String {
    let mut out = String::with_capacity(source.len());
    let mut in_class = false;
    let mut i = 0;
    while let Some(c) = source[i..].chars().next() {
        if c == '\\' {
            let digits = source[i + 1..]
                .bytes()
                .take_while(u8::is_ascii_digit)
                .count();
            if !in_class
                && digits > 0
                && let Ok(n) = source[i + 1..i + 1 + digits].parse::<usize>()
                && n > after
            {
                out.push_str(&format!("\\{}", n + 1));
                i += 1 + digits;
                continue;
            }
            let len = source[i + 1..].chars().next().map_or(0, char::len_utf8);
            out.push_str(&source[i..i + 1 + len]);
            i += 1 + len;
            continue;
        }
        match c {
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            _ => {},
        }
        out.push(c);
        i += c.len_utf8();
    }
    out
}
