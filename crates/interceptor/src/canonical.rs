//! Matchers, replacements and their canonical forms.
//!
//! Patch authors write patterns against minified code using `\i` for "any
//! identifier", and replacements using `$self` for "this plugin's exported
//! instance". Canonicalization expands both. It is pure and idempotent: the
//! canonical form of a canonical value is the value itself.

use std::{cell::OnceCell, fmt, rc::Rc};

use chunkhook_common::PluginId;

use crate::{
    error::{Error, Result},
    js_regex::CompiledPattern,
    replace::MatchGroups,
};

/// What `\i` expands to: an identifier as emitted by minifiers.
pub const IDENTIFIER_PATTERN: &str = "(?:[A-Za-z_$][A-Za-z0-9_$]*)";

/// Placeholder in replacements for the plugin's exported instance.
pub const SELF_PLACEHOLDER: &str = "$self";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatternFlags {
    pub global: bool,
    pub ignore_case: bool,
    pub multiline: bool,
    pub dot_all: bool,
}

impl PatternFlags {
    /// Parse JavaScript-style flags (`g`, `i`, `m`, `s`, `u`).
    pub fn parse(flags: &str) -> Result<Self> {
        let mut out = Self::default();
        for flag in flags.chars() {
            match flag {
                'g' => out.global = true,
                'i' => out.ignore_case = true,
                'm' => out.multiline = true,
                's' => out.dot_all = true,
                // patterns are always unicode-aware here
                'u' => {},
                other => {
                    return Err(Error::InvalidFlags {
                        flags: flags.to_string(),
                        flag: other,
                    });
                },
            }
        }
        Ok(out)
    }
}

impl fmt::Display for PatternFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (set, c) in [
            (self.global, 'g'),
            (self.ignore_case, 'i'),
            (self.multiline, 'm'),
            (self.dot_all, 's'),
        ] {
            if set {
                write!(f, "{c}")?;
            }
        }
        Ok(())
    }
}

struct PatternInner {
    source: String,
    flags: PatternFlags,
    canonical: bool,
    compiled: OnceCell<std::result::Result<CompiledPattern, String>>,
}

/// A regular expression in source form, compiled on first use.
#[derive(Clone)]
pub struct Pattern(Rc<PatternInner>);

impl Pattern {
    pub fn new(source: impl Into<String>) -> Self {
        Self::from_parts(source.into(), PatternFlags::default(), false)
    }

    pub fn with_flags(source: impl Into<String>, flags: &str) -> Result<Self> {
        Ok(Self::from_parts(source.into(), PatternFlags::parse(flags)?, false))
    }

    fn from_parts(source: String, flags: PatternFlags, canonical: bool) -> Self {
        Self(Rc::new(PatternInner {
            source,
            flags,
            canonical,
            compiled: OnceCell::new(),
        }))
    }

    pub fn source(&self) -> &str {
        &self.0.source
    }

    pub fn flags(&self) -> PatternFlags {
        self.0.flags
    }

    pub fn is_global(&self) -> bool {
        self.0.flags.global
    }

    pub fn is_canonical(&self) -> bool {
        self.0.canonical
    }

    /// The compiled pattern, built on first use. Patterns the dialect cannot
    /// express surface here as [`Error::InvalidPattern`].
    pub fn compiled(&self) -> Result<&CompiledPattern> {
        let compiled = self
            .0
            .compiled
            .get_or_init(|| CompiledPattern::new(&self.0.source, self.0.flags));
        compiled.as_ref().map_err(|reason| Error::InvalidPattern {
            pattern: self.0.source.clone(),
            reason: reason.clone(),
        })
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.0.source == other.0.source
            && self.0.flags == other.0.flags
            && self.0.canonical == other.0.canonical
    }
}

impl Eq for Pattern {}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.0.source, self.0.flags)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Left-hand side of a replacement rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// Replace the first literal occurrence.
    Literal(String),
    Pattern(Pattern),
}

impl Matcher {
    pub fn literal(text: impl Into<String>) -> Self {
        Self::Literal(text.into())
    }

    pub fn pattern(source: impl Into<String>) -> Self {
        Self::Pattern(Pattern::new(source))
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => write!(f, "{s:?}"),
            Self::Pattern(p) => write!(f, "{p}"),
        }
    }
}

/// The plugin a replacement runs on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginScope {
    pub plugin: PluginId,
    /// Expression `$self` expands to.
    pub self_reference: Rc<str>,
}

impl PluginScope {
    /// `template` is the configured self-reference, with `{id}` standing for
    /// the JSON-quoted plugin name.
    pub fn new(plugin: PluginId, template: &str) -> Self {
        let self_reference = render_self_reference(template, &plugin).into();
        Self {
            plugin,
            self_reference,
        }
    }
}

pub fn render_self_reference(template: &str, plugin: &PluginId) -> String {
    let quoted = serde_json::Value::from(plugin.as_str()).to_string();
    template.replace("{id}", &quoted)
}

type ReplaceBody = dyn Fn(&MatchGroups<'_>, &PluginScope) -> anyhow::Result<String>;

/// A replacement computed from the match.
#[derive(Clone)]
pub struct ReplaceFn {
    inner: Rc<ReplaceBody>,
    /// Set once canonicalized: `$self` in the output expands to this.
    self_reference: Option<Rc<str>>,
}

impl ReplaceFn {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&MatchGroups<'_>, &PluginScope) -> anyhow::Result<String> + 'static,
    {
        Self {
            inner: Rc::new(f),
            self_reference: None,
        }
    }

    pub fn is_canonical(&self) -> bool {
        self.self_reference.is_some()
    }

    pub fn call(&self, groups: &MatchGroups<'_>, scope: &PluginScope) -> anyhow::Result<String> {
        let out = (self.inner)(groups, scope)?;
        Ok(match &self.self_reference {
            Some(expr) => out.replace(SELF_PLACEHOLDER, expr),
            None => out,
        })
    }
}

impl PartialEq for ReplaceFn {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner) && self.self_reference == other.self_reference
    }
}

impl fmt::Debug for ReplaceFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplaceFn")
            .field("self_reference", &self.self_reference)
            .finish_non_exhaustive()
    }
}

/// Right-hand side of a replacement rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Replace {
    /// A JavaScript replacement template (`$&`, `$1`, `$<name>`, ...).
    Template(String),
    Function(ReplaceFn),
}

impl Replace {
    pub fn template(text: impl Into<String>) -> Self {
        Self::Template(text.into())
    }

    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&MatchGroups<'_>, &PluginScope) -> anyhow::Result<String> + 'static,
    {
        Self::Function(ReplaceFn::new(f))
    }
}

/// Expand every `\i` in a pattern. Literals pass through.
pub fn canonicalize_match(matcher: &Matcher) -> Matcher {
    match matcher {
        Matcher::Literal(_) => matcher.clone(),
        Matcher::Pattern(p) if p.is_canonical() => matcher.clone(),
        Matcher::Pattern(p) => Matcher::Pattern(Pattern::from_parts(
            expand_identifier_escapes(p.source()),
            p.flags(),
            true,
        )),
    }
}

fn expand_identifier_escapes(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('i') => out.push_str(IDENTIFIER_PATTERN),
            Some(next) => {
                out.push('\\');
                out.push(next);
            },
            None => out.push('\\'),
        }
    }
    out
}

/// Expand `$self` for `scope`.
pub fn canonicalize_replace(replace: &Replace, scope: &PluginScope) -> Replace {
    match replace {
        Replace::Template(t) => {
            Replace::Template(t.replace(SELF_PLACEHOLDER, &scope.self_reference))
        },
        Replace::Function(f) if f.is_canonical() => replace.clone(),
        Replace::Function(f) => Replace::Function(ReplaceFn {
            inner: Rc::clone(&f.inner),
            self_reference: Some(Rc::clone(&scope.self_reference)),
        }),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn scope() -> PluginScope {
        PluginScope::new(PluginId::from("pinDms"), "Chunkhook.plugins[{id}]")
    }

    #[rstest]
    #[case(r"\i\.foo", r"(?:[A-Za-z_$][A-Za-z0-9_$]*)\.foo")]
    #[case(r"a\\i", r"a\\i")]
    #[case(r"\\\i", r"\\(?:[A-Za-z_$][A-Za-z0-9_$]*)")]
    #[case(r"\(\i,\i\)", r"\((?:[A-Za-z_$][A-Za-z0-9_$]*),(?:[A-Za-z_$][A-Za-z0-9_$]*)\)")]
    #[case(r"trailing\", r"trailing\")]
    fn expands_identifier_escapes(#[case] input: &str, #[case] expected: &str) {
        let Matcher::Pattern(p) = canonicalize_match(&Matcher::pattern(input)) else {
            panic!("pattern expected");
        };
        assert_eq!(p.source(), expected);
        assert!(p.is_canonical());
    }

    #[test]
    fn canonical_match_is_idempotent() {
        let once = canonicalize_match(&Matcher::pattern(r"\i=\i\.default"));
        let twice = canonicalize_match(&once);
        assert_eq!(once, twice);

        let lit = Matcher::literal(r"\i");
        assert_eq!(canonicalize_match(&lit), lit);
    }

    #[test]
    fn self_reference_uses_json_quoting() {
        assert_eq!(scope().self_reference.as_ref(), r#"Chunkhook.plugins["pinDms"]"#);
        let odd = PluginScope::new(PluginId::from(r#"a"b"#), "P[{id}]");
        assert_eq!(odd.self_reference.as_ref(), r#"P["a\"b"]"#);
    }

    #[test]
    fn canonical_template_is_idempotent() {
        let once = canonicalize_replace(&Replace::template("$&$self._instance=this;"), &scope());
        assert_eq!(
            once,
            Replace::template(r#"$&Chunkhook.plugins["pinDms"]._instance=this;"#)
        );
        assert_eq!(canonicalize_replace(&once, &scope()), once);
    }

    #[test]
    fn function_is_wrapped_once() {
        let raw = Replace::function(|_, _| Ok("$self.run()".into()));
        let once = canonicalize_replace(&raw, &scope());
        let other = PluginScope::new(PluginId::from("other"), "X[{id}]");
        let twice = canonicalize_replace(&once, &other);
        assert_eq!(once, twice);
        assert_ne!(raw, once);

        let Replace::Function(f) = twice else {
            panic!("function expected");
        };
        let groups = MatchGroups::whole_match("abc", 0..1);
        assert_eq!(
            f.call(&groups, &scope()).unwrap(),
            r#"Chunkhook.plugins["pinDms"].run()"#
        );
    }

    #[test]
    fn flags_parse_and_reject() {
        let flags = PatternFlags::parse("gi").unwrap();
        assert!(flags.global && flags.ignore_case);
        assert_eq!(flags.to_string(), "gi");
        assert!(matches!(
            PatternFlags::parse("gy"),
            Err(Error::InvalidFlags { flag: 'y', .. })
        ));
    }

    #[test]
    fn canonical_lookbehind_pattern_matches() {
        let source = r"(?<=\i===\i\.ME\?)\i\.\i\.getPrivateChannelIds\(\)";
        let Matcher::Pattern(p) = canonicalize_match(&Matcher::pattern(source)) else {
            panic!("pattern expected");
        };
        let code = "n===r.ME?s.Z.getPrivateChannelIds():[]";
        let m = p.compiled().unwrap().first(code).unwrap().unwrap();
        assert_eq!(m.whole(), "s.Z.getPrivateChannelIds()");
    }

    #[test]
    fn unbalanced_pattern_is_invalid() {
        let p = Pattern::new(r"(a");
        assert!(matches!(p.compiled(), Err(Error::InvalidPattern { .. })));
    }
}
