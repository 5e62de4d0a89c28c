use std::rc::Rc;

use {
    chunkhook_common::{ModuleId, PluginId},
    tracing::{debug, error, warn},
};

use crate::{
    canonical::{Matcher, canonicalize_match, canonicalize_replace},
    diagnostics::PatchContext,
    error::Error,
    host::{FactoryMap, FactoryRef, Host},
    interceptor::Shared,
    registry::RegisteredPatch,
    replace::apply_rule,
    stats::Outcome,
    wrapper::InstrumentedFactory,
};

/// Result of running the registry over one factory.
pub(crate) struct PatchOutcome<H: Host> {
    pub(crate) current: FactoryRef<H>,
    pub(crate) patched_by: Vec<PluginId>,
    /// Compiled source of `current`, when it differs from the original.
    pub(crate) patched_source: Option<String>,
}

/// Source text patches are matched against.
pub fn normalize_source(source: &str, strip_newlines: bool) -> String {
    if strip_newlines {
        format!("0,{}", source.replace('\n', ""))
    } else {
        format!("0,{source}")
    }
}

/// Factory, code and compiled source at some point of the pipeline.
struct Checkpoint<H: Host> {
    factory: FactoryRef<H>,
    code: String,
    patched_source: Option<String>,
}

impl<H: Host> Clone for Checkpoint<H> {
    fn clone(&self) -> Self {
        Self {
            factory: Rc::clone(&self.factory),
            code: self.code.clone(),
            patched_source: self.patched_source.clone(),
        }
    }
}

struct ModulePatcher<'a, H: Host> {
    shared: &'a Shared<H>,
    module: &'a ModuleId,
    state: Checkpoint<H>,
    patched_by: Vec<PluginId>,
}

impl<H: Host> ModulePatcher<'_, H> {
    fn header(&self, code: &str) -> String {
        let plugins: Vec<&str> = self.patched_by.iter().map(PluginId::as_str).collect();
        format!(
            "// Webpack Module {id} - Patched by {plugins}\n{code}\n//# sourceURL={prefix}{id}",
            id = self.module,
            plugins = plugins.join(", "),
            prefix = self.shared.config.source_url_prefix,
        )
    }

    fn drop_plugin(&mut self, plugin: &PluginId) {
        self.patched_by.retain(|p| p != plugin);
    }

    /// Apply every enabled rule of `entry`. Returns true if the module code
    /// changed.
    fn apply(&mut self, entry: &RegisteredPatch) -> bool {
        let patch = &entry.descriptor;
        let plugin = &patch.plugin;
        let newly_listed = !self.patched_by.contains(plugin);
        if newly_listed {
            self.patched_by.push(plugin.clone());
        }
        let previous = self.state.clone();

        for rule in &patch.replacements {
            if !rule.is_enabled() {
                continue;
            }
            let last = self.state.clone();
            let matcher = canonicalize_match(&rule.matcher);
            let replace = canonicalize_replace(&rule.replace, &entry.scope);

            let failure = match apply_rule(&self.state.code, &matcher, &replace, &entry.scope) {
                Ok(code) if code == self.state.code => {
                    self.shared.stats.record(plugin, Outcome::NoOp);
                    if !patch.no_warn {
                        warn!(
                            plugin = %plugin,
                            module = %self.module,
                            rule = %matcher,
                            "patch had no effect"
                        );
                        if self.shared.config.dev_mode {
                            debug!(
                                module = %self.module,
                                source = %self.state.code,
                                "function source"
                            );
                        }
                    }
                    if patch.group {
                        warn!(
                            plugin = %plugin,
                            module = %self.module,
                            find = %patch.find,
                            rule = %matcher,
                            "undoing patch group because a replacement had no effect"
                        );
                        self.state = previous.clone();
                        break;
                    }
                    continue;
                },
                Ok(code) => {
                    if !self.patched_by.contains(plugin) {
                        self.patched_by.push(plugin.clone());
                    }
                    let source = self.header(&code);
                    match self.shared.host.compile(self.module, &source) {
                        Ok(factory) => {
                            self.state = Checkpoint {
                                factory,
                                code,
                                patched_source: Some(source),
                            };
                            continue;
                        },
                        Err(source) => (
                            Error::Compile {
                                module: self.module.clone(),
                                source,
                            },
                            code,
                        ),
                    }
                },
                Err(e) => (e, last.code.clone()),
            };

            let (err, attempted) = failure;
            self.report_failure(entry, &matcher, &err, &last.code, &attempted);

            if patch.group {
                warn!(
                    plugin = %plugin,
                    module = %self.module,
                    find = %patch.find,
                    rule = %matcher,
                    "undoing patch group because a replacement errored"
                );
                self.state = previous.clone();
                break;
            }
            self.state = last;
            if newly_listed && self.state.code == previous.code {
                self.drop_plugin(plugin);
            }
        }

        let changed = self.state.code != previous.code;
        if changed {
            if !self.patched_by.contains(plugin) {
                self.patched_by.push(plugin.clone());
            }
        } else if newly_listed {
            self.drop_plugin(plugin);
        }
        changed
    }

    fn report_failure(
        &self,
        entry: &RegisteredPatch,
        matcher: &Matcher,
        err: &Error,
        before: &str,
        attempted: &str,
    ) {
        let plugin = &entry.descriptor.plugin;
        self.shared.stats.record(plugin, Outcome::Failed);
        error!(
            plugin = %plugin,
            module = %self.module,
            rule = %matcher,
            error = %err,
            "patch errored"
        );

        if !self.shared.config.dev_mode {
            return;
        }
        if let Some(ctx) = PatchContext::capture(before, attempted, matcher) {
            error!(
                plugin = %plugin,
                module = %self.module,
                before = %ctx.before,
                after = %ctx.after,
                diff = %ctx.render_diff(),
                "patch context"
            );
        }
    }
}

/// Run every matching patch over `original`, cumulatively.
pub(crate) fn patch_source<H: Host>(
    shared: &Shared<H>,
    module: &ModuleId,
    original: &FactoryRef<H>,
) -> PatchOutcome<H> {
    let initial = normalize_source(&original.source(), shared.config.normalize_newlines);

    // Snapshot first: entries retired below stay visible to this pass.
    let (entries, hits) = {
        let registry = shared.registry.borrow();
        (registry.snapshot(), registry.find_hits(&initial))
    };

    let mut patcher = ModulePatcher {
        shared,
        module,
        state: Checkpoint {
            factory: Rc::clone(original),
            code: initial.clone(),
            patched_source: None,
        },
        patched_by: Vec::new(),
    };

    for entry in entries {
        let patch = &entry.descriptor;
        // The automaton saw the initial code; later patches see the
        // cumulative result.
        let found = if patcher.state.code == initial {
            hits.contains(&entry.id)
        } else {
            patcher.state.code.contains(patch.find.as_str())
        };
        if !found || !patch.is_enabled() {
            continue;
        }

        if patcher.apply(&entry) {
            shared.stats.record(&patch.plugin, Outcome::Applied);
            if !patch.all {
                shared.registry.borrow_mut().retire(entry.id);
            }
        }
    }

    PatchOutcome {
        current: patcher.state.factory,
        patched_by: patcher.patched_by,
        patched_source: patcher.state.patched_source,
    }
}

/// Patch and wrap every factory in `factories`. Factories that are already
/// instrumented are left alone.
pub(crate) fn patch_factories<H: Host>(shared: &Rc<Shared<H>>, factories: &mut FactoryMap<H>) {
    for id in factories.ids() {
        let Some(factory) = factories.get(&id) else {
            continue;
        };
        if factory.original().is_some() {
            continue;
        }

        let outcome = patch_source(shared, &id, &factory);
        if !outcome.patched_by.is_empty() {
            debug!(module = %id, plugins = ?outcome.patched_by, "patched module");
        }
        let wrapped: FactoryRef<H> = Rc::new(InstrumentedFactory::new(
            id.clone(),
            factory,
            outcome,
            Rc::clone(shared),
        ));
        factories.insert(id, Rc::clone(&wrapped));
        shared.listeners.notify_factory(&wrapped);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            canonical::{Pattern, Replace},
            interceptor::Interceptor,
            patch::{PatchDescriptor, ReplacementRule},
            testing::{ScriptHost, script_factory},
        },
        chunkhook_config::InterceptorConfig,
    };

    fn engine(dev_mode: bool) -> Interceptor<ScriptHost> {
        let config = InterceptorConfig {
            dev_mode,
            ..InterceptorConfig::default()
        };
        Interceptor::new(ScriptHost::default(), &config).unwrap()
    }

    fn run(engine: &Interceptor<ScriptHost>, source: &str) -> PatchOutcome<ScriptHost> {
        patch_source(&engine.shared, &ModuleId::from("42"), &script_factory(source))
    }

    #[test]
    fn normalizes_with_prefix_and_strips_newlines() {
        assert_eq!(
            normalize_source("function(){\nreturn 1\n}", true),
            "0,function(){return 1}"
        );
        assert_eq!(normalize_source("a\nb", false), "0,a\nb");
    }

    #[test]
    fn compiled_source_carries_header_and_source_url() {
        let engine = engine(false);
        engine.register_patches("a", [
            PatchDescriptor::new("a", "foo(bar)")
                .replace(Matcher::pattern("bar"), Replace::template("baz")),
        ]);

        let out = run(&engine, "function(e){return foo(bar)}");
        assert_eq!(
            out.patched_source.as_deref(),
            Some(concat!(
                "// Webpack Module 42 - Patched by a\n",
                "0,function(e){return foo(baz)}\n",
                "//# sourceURL=WebpackModule42",
            ))
        );
        assert_eq!(out.patched_by, vec![PluginId::from("a")]);
    }

    #[test]
    fn non_group_no_op_continues_with_next_rule() {
        let engine = engine(false);
        engine.register_patch(
            PatchDescriptor::new("a", "foo")
                .replace(Matcher::literal("missing"), Replace::template("x"))
                .replace(Matcher::literal("foo"), Replace::template("bar")),
        );
        let out = run(&engine, "foo()");
        assert_eq!(
            out.current.source(),
            "// Webpack Module 42 - Patched by a\n0,bar()\n//# sourceURL=WebpackModule42"
        );
        let stats = engine.report().plugins[&PluginId::from("a")];
        assert_eq!((stats.no_op, stats.applied), (1, 1));
    }

    #[test]
    fn group_no_op_rolls_back_whole_patch() {
        let engine = engine(false);
        engine.register_patch(
            PatchDescriptor::new("a", "foo")
                .group(true)
                .replace(Matcher::literal("foo"), Replace::template("bar"))
                .replace(Matcher::literal("missing"), Replace::template("x")),
        );
        let original = script_factory("foo()");
        let out = patch_source(&engine.shared, &ModuleId::from("1"), &original);
        assert!(Rc::ptr_eq(&out.current, &original));
        assert!(out.patched_by.is_empty());
        assert!(out.patched_source.is_none());
        // still pending: it never left a change
        assert_eq!(engine.report().pending.len(), 1);
    }

    #[test]
    fn group_error_rolls_back_earlier_rules() {
        let engine = engine(false);
        engine.register_patch(
            PatchDescriptor::new("a", "foo")
                .group(true)
                .replace(Matcher::literal("foo"), Replace::template("bar"))
                .replace(Matcher::literal("bar"), Replace::function(|_, _| anyhow::bail!("boom"))),
        );
        let original = script_factory("foo()");
        let out = patch_source(&engine.shared, &ModuleId::from("1"), &original);
        assert!(Rc::ptr_eq(&out.current, &original));
        assert!(out.patched_source.is_none());
        assert!(out.patched_by.is_empty());
        assert_eq!(engine.report().pending.len(), 1);
        assert_eq!(engine.report().plugins[&PluginId::from("a")].failed, 1);
    }

    #[test]
    fn header_names_plugin_whose_first_rule_errored() {
        let engine = engine(false);
        engine.register_patch(
            PatchDescriptor::new("a", "foo")
                .replace(Matcher::literal("foo"), Replace::function(|_, _| anyhow::bail!("boom")))
                .replace(Matcher::literal("()"), Replace::template("(1)")),
        );
        let out = run(&engine, "foo()");
        assert_eq!(out.patched_by, vec![PluginId::from("a")]);
        assert!(
            out.patched_source
                .as_deref()
                .unwrap()
                .starts_with("// Webpack Module 42 - Patched by a\n0,foo(1)")
        );
    }

    #[test]
    fn errored_rule_rolls_back_only_itself() {
        let engine = engine(true);
        engine.register_patch(
            PatchDescriptor::new("a", "foo")
                .replace(Matcher::literal("foo"), Replace::template("bar"))
                .replace(Matcher::literal("bar"), Replace::function(|_, _| anyhow::bail!("boom")))
                .replace(Matcher::literal("()"), Replace::template("(1)")),
        );
        let out = run(&engine, "foo()");
        assert!(out.current.source().contains("0,bar(1)"));
        assert_eq!(engine.report().plugins[&PluginId::from("a")].failed, 1);
    }

    #[test]
    fn compile_failure_is_rolled_back() {
        let engine = engine(true);
        engine.register_patch(
            PatchDescriptor::new("a", "foo")
                .replace(Matcher::literal("foo()"), Replace::template("foo(")),
        );
        let original = script_factory("foo()");
        let out = patch_source(&engine.shared, &ModuleId::from("1"), &original);
        assert!(Rc::ptr_eq(&out.current, &original));
        assert!(out.patched_by.is_empty());
    }

    #[test]
    fn lookbehind_patterns_apply() {
        let engine = engine(false);
        engine.register_patch(PatchDescriptor::new("pinDms", "privateChannelIds").replace(
            Matcher::pattern(r"(?<=\i,{channels:\i,)privateChannelIds:(\i)"),
            Replace::template("privateChannelIds:$self.sort($1)"),
        ));
        let out = run(&engine, "function(e){return x(n,{channels:a,privateChannelIds:b})}");
        let patched = out.patched_source.unwrap();
        assert!(patched.contains("0,function(e){return x(n,{channels:a,privateChannelIds:"));
        assert!(patched.contains(r#"privateChannelIds:Chunkhook.plugins["pinDms"].sort(b)})}"#));
        let stats = engine.report().plugins[&PluginId::from("pinDms")];
        assert_eq!((stats.applied, stats.failed), (1, 0));
    }

    #[test]
    fn malformed_pattern_is_a_rule_error() {
        let engine = engine(false);
        engine.register_patch(
            PatchDescriptor::new("a", "foo")
                .replace(Matcher::Pattern(Pattern::new(r"foo(")), Replace::template("[")),
        );
        let out = run(&engine, "foo()");
        assert!(out.patched_source.is_none());
        assert_eq!(engine.report().plugins[&PluginId::from("a")].failed, 1);
    }

    #[test]
    fn disabled_rules_and_patches_are_skipped() {
        let engine = engine(false);
        engine.register_patch(
            PatchDescriptor::new("a", "foo")
                .replacement(
                    ReplacementRule::new(Matcher::literal("foo"), Replace::template("x"))
                        .when(|| false),
                ),
        );
        engine.register_patch(
            PatchDescriptor::new("b", "foo")
                .when(|| false)
                .replace(Matcher::literal("foo"), Replace::template("y")),
        );
        let out = run(&engine, "foo()");
        assert!(out.patched_source.is_none());
        assert!(out.patched_by.is_empty());
    }

    #[test]
    fn one_shot_patches_retire_after_effect_and_all_patches_stay() {
        let engine = engine(false);
        engine.register_patch(
            PatchDescriptor::new("once", "foo")
                .replace(Matcher::literal("foo"), Replace::template("fooo")),
        );
        engine.register_patch(
            PatchDescriptor::new("every", "foo")
                .all(true)
                .replace(Matcher::literal("foo"), Replace::template("foo/*x*/")),
        );

        let first = run(&engine, "foo()");
        assert_eq!(
            first.patched_by,
            vec![PluginId::from("once"), PluginId::from("every")]
        );
        let second = run(&engine, "foo()");
        assert_eq!(second.patched_by, vec![PluginId::from("every")]);

        let pending = engine.report().pending;
        assert_eq!(pending.len(), 1);
        assert!(pending[0].all);
    }

    #[test]
    fn later_patch_sees_cumulative_source() {
        let engine = engine(false);
        engine.register_patch(
            PatchDescriptor::new("first", "foo(bar)")
                .replace(Matcher::pattern("bar"), Replace::template("marker")),
        );
        engine.register_patch(
            PatchDescriptor::new("second", "foo(marker)")
                .replace(Matcher::literal("marker"), Replace::template("done")),
        );
        let out = run(&engine, "function(e){return foo(bar)}");
        assert!(out.current.source().contains("0,function(e){return foo(done)}"));
        assert_eq!(out.patched_by.len(), 2);
    }
}
