//! `PATCHES.toml` parsing.
//!
//! A plugin directory carries its patches as a TOML manifest:
//! ```text
//! name = "noTrack"
//! description = "Disable analytics"
//!
//! [[patches]]
//! find = "window.DiscordSentry"
//! when = "blockSentry"
//!
//! [[patches.replacement]]
//! match = '(\i)\.DiscordSentry=\i'
//! replace = "$1.DiscordSentry=void 0"
//!
//! [[patches.replacement]]
//! match = "trackEvent("
//! literal = true
//! replace = "(()=>{})("
//! when = "!keepTracking"
//! ```
//!
//! `when` names a plugin setting; a leading `!` negates it.

use std::path::Path;

use {
    chunkhook_common::PluginId,
    chunkhook_interceptor::{
        Matcher, Pattern, PatchDescriptor, Replace, ReplacementRule, canonical::canonicalize_match,
    },
    serde::{Deserialize, Serialize},
};

use crate::{
    error::{Context, Error, Result},
    settings::SettingsStore,
};

pub const MANIFEST_FILE: &str = "PATCHES.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub patches: Vec<PatchSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchSpec {
    pub find: String,
    #[serde(default)]
    pub group: bool,
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub no_warn: bool,
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default, rename = "replacement")]
    pub replacements: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    #[serde(rename = "match")]
    pub pattern: String,
    #[serde(default)]
    pub flags: String,
    /// Treat `match` as plain text instead of a pattern.
    #[serde(default)]
    pub literal: bool,
    pub replace: String,
    #[serde(default)]
    pub when: Option<String>,
}

/// A parsed `when` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub key: String,
    pub negated: bool,
}

impl Condition {
    pub fn parse(expr: &str) -> Option<Self> {
        let expr = expr.trim();
        let (negated, key) = match expr.strip_prefix('!') {
            Some(rest) => (true, rest.trim()),
            None => (false, expr),
        };
        if key.is_empty() || key.contains(char::is_whitespace) {
            return None;
        }
        Some(Self {
            key: key.to_string(),
            negated,
        })
    }

    /// Predicate reading `plugin`'s setting from `store` each time it runs.
    pub fn predicate(&self, plugin: &PluginId, store: &SettingsStore) -> impl Fn() -> bool + use<> {
        let (store, plugin, key, negated) =
            (store.clone(), plugin.to_string(), self.key.clone(), self.negated);
        move || store.is_on(&plugin, &key) != negated
    }
}

impl PatchManifest {
    pub fn plugin_id(&self) -> Result<PluginId> {
        PluginId::parse(&self.name).context("invalid plugin name")
    }

    /// Structural checks that serde cannot express.
    pub fn validate(&self, path: &Path) -> Result<()> {
        self.plugin_id()
            .map_err(|e| Error::invalid_manifest(path, e.to_string()))?;
        for (i, patch) in self.patches.iter().enumerate() {
            let at =
                |reason: String| Error::invalid_manifest(path, format!("patches[{i}]: {reason}"));
            if patch.find.is_empty() {
                return Err(at("find must not be empty".into()));
            }
            if patch.replacements.is_empty() {
                return Err(at("at least one replacement is required".into()));
            }
            check_condition(patch.when.as_deref()).map_err(at)?;
            for (j, rule) in patch.replacements.iter().enumerate() {
                rule_matcher(rule)
                    .map_err(|reason| at(format!("replacement[{j}]: {reason}")))?;
                check_condition(rule.when.as_deref())
                    .map_err(|reason| at(format!("replacement[{j}]: {reason}")))?;
            }
        }
        Ok(())
    }

    /// Build engine descriptors whose conditions read from `store`.
    pub fn descriptors(&self, path: &Path, store: &SettingsStore) -> Result<Vec<PatchDescriptor>> {
        self.validate(path)?;
        let plugin = self.plugin_id()?;
        let mut out = Vec::with_capacity(self.patches.len());
        for patch in &self.patches {
            let mut descriptor = PatchDescriptor::new(plugin.clone(), patch.find.as_str())
                .group(patch.group)
                .all(patch.all)
                .no_warn(patch.no_warn);
            if let Some(cond) = patch.when.as_deref().and_then(Condition::parse) {
                descriptor = descriptor.when(cond.predicate(&plugin, store));
            }
            for rule in &patch.replacements {
                let matcher =
                    rule_matcher(rule).map_err(|reason| Error::invalid_manifest(path, reason))?;
                let replace = Replace::template(rule.replace.as_str());
                let mut replacement = ReplacementRule::new(matcher, replace);
                if let Some(cond) = rule.when.as_deref().and_then(Condition::parse) {
                    replacement = replacement.when(cond.predicate(&plugin, store));
                }
                descriptor = descriptor.replacement(replacement);
            }
            out.push(descriptor);
        }
        Ok(out)
    }
}

fn check_condition(expr: Option<&str>) -> std::result::Result<(), String> {
    match expr {
        Some(expr) if Condition::parse(expr).is_none() => {
            Err(format!("invalid condition {expr:?}"))
        },
        _ => Ok(()),
    }
}

/// The rule's matcher, with patterns compiled once to surface errors early.
fn rule_matcher(rule: &RuleSpec) -> std::result::Result<Matcher, String> {
    if rule.pattern.is_empty() {
        return Err("match must not be empty".into());
    }
    if rule.literal {
        return Ok(Matcher::literal(rule.pattern.as_str()));
    }
    let pattern =
        Pattern::with_flags(rule.pattern.as_str(), &rule.flags).map_err(|e| e.to_string())?;
    let matcher = Matcher::Pattern(pattern);
    if let Matcher::Pattern(canonical) = canonicalize_match(&matcher) {
        canonical.compiled().map_err(|e| e.to_string())?;
    }
    Ok(matcher)
}

/// Parse and validate a manifest file's content.
pub fn parse_manifest(content: &str, path: &Path) -> Result<PatchManifest> {
    let manifest: PatchManifest =
        toml::from_str(content).map_err(|e| Error::invalid_manifest(path, e.to_string()))?;
    manifest.validate(path)?;
    Ok(manifest)
}
