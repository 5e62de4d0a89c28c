use std::{fmt, rc::Rc};

use chunkhook_common::PluginId;

use crate::canonical::{Matcher, Replace};

/// Evaluated lazily, every time it is consulted.
pub type Predicate = Rc<dyn Fn() -> bool>;

/// One find/replace step of a patch.
#[derive(Clone)]
pub struct ReplacementRule {
    pub matcher: Matcher,
    pub replace: Replace,
    pub predicate: Option<Predicate>,
}

impl ReplacementRule {
    pub fn new(matcher: Matcher, replace: Replace) -> Self {
        Self {
            matcher,
            replace,
            predicate: None,
        }
    }

    #[must_use]
    pub fn when(mut self, predicate: impl Fn() -> bool + 'static) -> Self {
        self.predicate = Some(Rc::new(predicate));
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.predicate.as_ref().is_none_or(|p| p())
    }
}

impl fmt::Debug for ReplacementRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplacementRule")
            .field("matcher", &self.matcher)
            .field("replace", &self.replace)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

/// A plugin's request to rewrite every module whose source contains `find`.
#[derive(Clone)]
pub struct PatchDescriptor {
    pub plugin: PluginId,
    /// Must occur literally in the normalized module source.
    pub find: String,
    pub replacements: Vec<ReplacementRule>,
    pub predicate: Option<Predicate>,
    /// All replacements apply, or none do.
    pub group: bool,
    /// Keep applying to every matching module instead of retiring after
    /// the first effective change.
    pub all: bool,
    /// Suppress the warning for replacements that change nothing.
    pub no_warn: bool,
}

impl PatchDescriptor {
    pub fn new(plugin: impl Into<PluginId>, find: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            find: find.into(),
            replacements: Vec::new(),
            predicate: None,
            group: false,
            all: false,
            no_warn: false,
        }
    }

    #[must_use]
    pub fn replacement(mut self, rule: ReplacementRule) -> Self {
        self.replacements.push(rule);
        self
    }

    /// Shorthand for a rule without its own predicate.
    #[must_use]
    pub fn replace(self, matcher: Matcher, replace: Replace) -> Self {
        self.replacement(ReplacementRule::new(matcher, replace))
    }

    #[must_use]
    pub fn when(mut self, predicate: impl Fn() -> bool + 'static) -> Self {
        self.predicate = Some(Rc::new(predicate));
        self
    }

    #[must_use]
    pub fn group(mut self, group: bool) -> Self {
        self.group = group;
        self
    }

    #[must_use]
    pub fn all(mut self, all: bool) -> Self {
        self.all = all;
        self
    }

    #[must_use]
    pub fn no_warn(mut self, no_warn: bool) -> Self {
        self.no_warn = no_warn;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.predicate.as_ref().is_none_or(|p| p())
    }
}

impl fmt::Debug for PatchDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchDescriptor")
            .field("plugin", &self.plugin)
            .field("find", &self.find)
            .field("replacements", &self.replacements)
            .field("predicate", &self.predicate.is_some())
            .field("group", &self.group)
            .field("all", &self.all)
            .field("no_warn", &self.no_warn)
            .finish()
    }
}
