//! Trying a single replacement against one module before shipping it.

use {chunkhook_common::ModuleId, serde::Serialize};

use crate::{
    canonical::{Matcher, PluginScope, canonicalize_match, canonicalize_replace},
    diagnostics::{CONTEXT_RADIUS, DiffOp, context_window, locate, word_diff},
    host::{FactoryMap, Host},
    patch::ReplacementRule,
    patcher::normalize_source,
    replace::apply_rule,
};

/// What a rule would do to a module.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RulePreview {
    /// The whole match, if the rule matched at all.
    pub matched: Option<String>,
    /// Capture groups 1..n; `None` for groups that did not participate.
    pub groups: Vec<Option<String>>,
    /// Full patched code, when it differs from the input.
    pub patched: Option<String>,
    /// Word diff of the context window around the match.
    pub diff: Vec<DiffOp>,
    /// Why the replacement or the compile failed.
    pub error: Option<String>,
}

impl RulePreview {
    pub fn is_effective(&self) -> bool {
        self.patched.is_some() && self.error.is_none()
    }
}

/// Run `rule` against `source` the way the patcher would, then compile the
/// result through `host`.
pub fn preview_rule<H: Host>(
    host: &H,
    module: &ModuleId,
    source: &str,
    rule: &ReplacementRule,
    scope: &PluginScope,
) -> RulePreview {
    let code = normalize_source(source, true);
    let matcher = canonicalize_match(&rule.matcher);
    let replace = canonicalize_replace(&rule.replace, scope);
    let mut preview = RulePreview::default();

    match &matcher {
        Matcher::Literal(needle) => {
            if code.contains(needle.as_str()) {
                preview.matched = Some(needle.clone());
            }
        },
        Matcher::Pattern(p) => match p.compiled().and_then(|c| c.first(&code)) {
            Ok(Some(m)) => {
                preview.matched = Some(m.whole().to_string());
                preview.groups = (1..=m.group_count())
                    .map(|i| m.get(i).map(str::to_string))
                    .collect();
            },
            Ok(None) => {},
            Err(e) => {
                preview.error = Some(e.to_string());
                return preview;
            },
        },
    }
    if preview.matched.is_none() {
        return preview;
    }

    let patched = match apply_rule(&code, &matcher, &replace, scope) {
        Ok(patched) => patched,
        Err(e) => {
            preview.error = Some(e.to_string());
            return preview;
        },
    };
    if patched == code {
        return preview;
    }

    if let Some(span) = locate(&code, &matcher) {
        let (before, after) = context_window(&code, &patched, span, CONTEXT_RADIUS);
        preview.diff = word_diff(&before, &after);
    }
    if let Err(e) = host.compile(module, &patched) {
        preview.error = Some(e.to_string());
    }
    preview.patched = Some(patched);
    preview
}

/// Outcome of looking up the single module a `find` should select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindResult {
    Unique(ModuleId),
    NoMatch,
    Multiple(Vec<ModuleId>),
}

/// Modules whose normalized source contains `find`.
pub fn find_module<H: Host>(factories: &FactoryMap<H>, find: &str) -> FindResult {
    let mut hits: Vec<ModuleId> = factories
        .iter()
        .filter(|(_, f)| normalize_source(&f.source(), true).contains(find))
        .map(|(id, _)| id.clone())
        .collect();
    match hits.len() {
        0 => FindResult::NoMatch,
        1 => FindResult::Unique(hits.remove(0)),
        _ => FindResult::Multiple(hits),
    }
}
