//! `String.prototype.replace` semantics over compiled patterns.

use std::ops::Range;

use crate::{
    canonical::{Matcher, PluginScope, Replace},
    error::{Error, Result},
};

/// One match and its capture groups, borrowed from the searched text.
#[derive(Debug, Clone)]
pub struct MatchGroups<'h> {
    haystack: &'h str,
    /// Index 0 is the whole match.
    spans: Vec<Option<Range<usize>>>,
    names: Vec<(String, usize)>,
}

impl<'h> MatchGroups<'h> {
    /// A match with no capture groups, as produced by a literal matcher.
    pub fn whole_match(haystack: &'h str, span: Range<usize>) -> Self {
        Self {
            haystack,
            spans: vec![Some(span)],
            names: Vec::new(),
        }
    }

    pub(crate) fn new(
        haystack: &'h str,
        spans: Vec<Option<Range<usize>>>,
        names: Vec<(String, usize)>,
    ) -> Self {
        Self {
            haystack,
            spans,
            names,
        }
    }

    pub(crate) fn span(&self) -> Range<usize> {
        self.spans
            .first()
            .cloned()
            .flatten()
            .unwrap_or(0..0)
    }

    /// The matched text (`$&`).
    pub fn whole(&self) -> &'h str {
        &self.haystack[self.span()]
    }

    /// Byte offset of the match in the searched text.
    pub fn start(&self) -> usize {
        self.span().start
    }

    /// Group `index`; `None` if it did not participate.
    pub fn get(&self, index: usize) -> Option<&'h str> {
        let span = self.spans.get(index)?.clone()?;
        Some(&self.haystack[span])
    }

    pub fn name(&self, name: &str) -> Option<&'h str> {
        let (_, index) = self.names.iter().find(|(n, _)| n == name)?;
        self.get(*index)
    }

    /// Number of capture groups, not counting the whole match.
    pub fn group_count(&self) -> usize {
        self.spans.len().saturating_sub(1)
    }

    pub fn has_named_groups(&self) -> bool {
        !self.names.is_empty()
    }

    /// Text before the match (`` $` ``).
    pub fn before(&self) -> &'h str {
        &self.haystack[..self.span().start]
    }

    /// Text after the match (`$'`).
    pub fn after(&self) -> &'h str {
        &self.haystack[self.span().end..]
    }
}

/// Expand a replacement template the way JavaScript's `GetSubstitution` does.
pub fn expand_template(template: &str, groups: &MatchGroups<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    let mut literal_start = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' || i + 1 >= bytes.len() {
            i += 1;
            continue;
        }
        out.push_str(&template[literal_start..i]);
        let (expansion, consumed) = substitution(&template[i + 1..], groups);
        match expansion {
            Some(text) => {
                out.push_str(text);
                i += 1 + consumed;
            },
            None => {
                out.push('$');
                i += 1;
            },
        }
        literal_start = i;
    }
    out.push_str(&template[literal_start..]);
    out
}

/// Resolve the token following a `$`. Returns the text and how many bytes
/// after the `$` it consumed, or `None` to keep the `$` literally.
fn substitution<'a>(rest: &'a str, groups: &MatchGroups<'a>) -> (Option<&'a str>, usize) {
    let bytes = rest.as_bytes();
    match bytes.first() {
        Some(b'$') => (Some("$"), 1),
        Some(b'&') => (Some(groups.whole()), 1),
        Some(b'`') => (Some(groups.before()), 1),
        Some(b'\'') => (Some(groups.after()), 1),
        Some(d) if d.is_ascii_digit() => {
            let m = groups.group_count();
            let first = usize::from(d - b'0');
            if let Some(d2) = bytes.get(1).filter(|b| b.is_ascii_digit()) {
                let two = first * 10 + usize::from(d2 - b'0');
                if (1..=m).contains(&two) {
                    return (Some(groups.get(two).unwrap_or("")), 2);
                }
            }
            if (1..=m).contains(&first) {
                return (Some(groups.get(first).unwrap_or("")), 1);
            }
            (None, 0)
        },
        Some(b'<') if groups.has_named_groups() => match rest.find('>') {
            Some(close) => (Some(groups.name(&rest[1..close]).unwrap_or("")), close + 1),
            None => (None, 0),
        },
        _ => (None, 0),
    }
}

fn substitute(groups: &MatchGroups<'_>, replace: &Replace, scope: &PluginScope) -> Result<String> {
    match replace {
        Replace::Template(t) => Ok(expand_template(t, groups)),
        Replace::Function(f) => f.call(groups, scope).map_err(|source| Error::ReplaceFailed {
            plugin: scope.plugin.clone(),
            source,
        }),
    }
}

/// Apply one replacement to `code`.
///
/// Literal matchers and non-global patterns replace the first occurrence;
/// global patterns replace every occurrence. No match returns `code` as is.
pub fn apply_rule(
    code: &str,
    matcher: &Matcher,
    replace: &Replace,
    scope: &PluginScope,
) -> Result<String> {
    match matcher {
        Matcher::Literal(needle) => {
            let Some(start) = code.find(needle.as_str()) else {
                return Ok(code.to_string());
            };
            let groups = MatchGroups::whole_match(code, start..start + needle.len());
            let text = substitute(&groups, replace, scope)?;
            Ok([&code[..start], text.as_str(), &code[start + needle.len()..]].concat())
        },
        Matcher::Pattern(pattern) => {
            let compiled = pattern.compiled()?;
            let limit = if pattern.is_global() { usize::MAX } else { 1 };

            let mut out = String::with_capacity(code.len());
            let mut last = 0;
            for groups in compiled.matches(code).take(limit) {
                let groups = groups?;
                let span = groups.span();
                out.push_str(&code[last..span.start]);
                out.push_str(&substitute(&groups, replace, scope)?);
                last = span.end;
            }
            out.push_str(&code[last..]);
            Ok(out)
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::canonical::{Pattern, canonicalize_match, canonicalize_replace},
        chunkhook_common::PluginId,
        rstest::rstest,
    };

    fn scope() -> PluginScope {
        PluginScope::new(PluginId::from("test"), "P[{id}]")
    }

    fn replace_once(code: &str, pattern: &str, template: &str) -> String {
        apply_rule(
            code,
            &Matcher::pattern(pattern),
            &Replace::template(template),
            &scope(),
        )
        .unwrap()
    }

    #[rstest]
    #[case("$&!", "x(bar)y", "x(bar!)y")]
    #[case("$1-$2", "x(bar)y", "x(b-ar)y")]
    #[case("$$1", "x(bar)y", "x($1)y")]
    #[case("[$`]", "x(bar)y", "x([x(])y")]
    #[case("[$']", "x(bar)y", "x([)y])y")]
    #[case("$3", "x(bar)y", "x($3)y")]
    #[case("$01", "x(bar)y", "x(b)y")]
    #[case("$", "x(bar)y", "x($)y")]
    #[case("$<n>", "x(bar)y", "x($<n>)y")]
    fn template_expansion(#[case] template: &str, #[case] code: &str, #[case] expected: &str) {
        assert_eq!(replace_once(code, "(b)(ar)", template), expected);
    }

    #[test]
    fn named_groups_expand() {
        assert_eq!(
            replace_once("a=1", r"(?<key>\w)=(?<val>\d)", "$<val>=$<key>$<none>"),
            "1=a"
        );
    }

    #[test]
    fn non_participating_group_is_empty() {
        assert_eq!(replace_once("ac", "a(b)?c", "[$1]"), "[]");
    }

    #[test]
    fn global_flag_replaces_all() {
        let g = Matcher::Pattern(Pattern::with_flags("o", "g").unwrap());
        let out = apply_rule("foo boo", &g, &Replace::template("0"), &scope()).unwrap();
        assert_eq!(out, "f00 b00");
        assert_eq!(replace_once("foo boo", "o", "0"), "f0o boo");
    }

    #[test]
    fn literal_replaces_first_occurrence_with_template() {
        let out = apply_rule(
            "a.b.c",
            &Matcher::literal("."),
            &Replace::template("[$&]"),
            &scope(),
        )
        .unwrap();
        assert_eq!(out, "a[.]b.c");
    }

    #[test]
    fn no_match_returns_input() {
        assert_eq!(replace_once("abc", "z", "y"), "abc");
    }

    #[test]
    fn function_replacement_sees_groups_and_self() {
        let replace = canonicalize_replace(
            &Replace::function(|g, _| Ok(format!("$self.wrap({})", g.get(1).unwrap_or("")))),
            &scope(),
        );
        let matcher = canonicalize_match(&Matcher::pattern(r"render\((\i)\)"));
        let out = apply_rule("x=render(e);", &matcher, &replace, &scope()).unwrap();
        assert_eq!(out, r#"x=P["test"].wrap(e);"#);
    }

    #[test]
    fn function_errors_name_the_plugin() {
        let replace = Replace::function(|_, _| anyhow::bail!("nope"));
        let err = apply_rule("abc", &Matcher::literal("b"), &replace, &scope()).unwrap_err();
        assert!(matches!(
            err,
            Error::ReplaceFailed { ref plugin, .. } if plugin.as_str() == "test"
        ));
    }
}
