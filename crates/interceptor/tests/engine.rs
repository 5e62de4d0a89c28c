#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Drives the engine the way host glue would: detection, chunk loading,
//! initialization and module loads through the runtime's require.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use {
    chunkhook_common::{ChunkId, ModuleId, PluginId},
    chunkhook_config::InterceptorConfig,
    chunkhook_interceptor::{
        BundlerRuntime, Chunk, ChunkQueue, ChunksLoadedCall, ChunksLoadedFn, FactoryMap,
        FactoryRef, FnFactory, HookState, Host, HostError, InitCallback, Interceptor, Matcher,
        Module, PatchDescriptor, PluginScope, PushFn, Replace,
        canonical::{canonicalize_match, canonicalize_replace},
        inert::check_syntax,
    },
    serde_json::{Value, json},
};

const STACK: &str = "Error\n    at Function.set (https://discord.com/assets/web.5f1e.js:1:777)";
const ENSURE: &str = "function(e){return Promise.all(Object.keys(r.f).map(t=>r.f[t](e)))}";

/// Modules look like `function(e){e.exports=<json>}`; running one parses
/// the JSON, and a module whose JSON does not parse throws.
#[derive(Debug, Default)]
struct JsonHost {
    compiles: Cell<usize>,
}

fn evaluate(source: &str, module: &mut Module<JsonHost>) -> Result<(), HostError> {
    let start = source
        .find("e.exports=")
        .ok_or_else(|| HostError::thrown("no exports"))?
        + "e.exports=".len();
    let end = source
        .rfind('}')
        .filter(|end| *end >= start)
        .ok_or_else(|| HostError::thrown("no body"))?;
    module.exports =
        serde_json::from_str(&source[start..end]).map_err(|e| HostError::thrown(e.to_string()))?;
    Ok(())
}

fn factory(source: &str) -> FactoryRef<JsonHost> {
    let text = source.to_string();
    FnFactory::new(source, move |m: &mut Module<JsonHost>, _| evaluate(&text, m))
}

impl Host for JsonHost {
    type Exports = Value;

    fn compile(&self, _module: &ModuleId, source: &str) -> Result<FactoryRef<Self>, HostError> {
        check_syntax(source)?;
        self.compiles.set(self.compiles.get() + 1);
        Ok(factory(source))
    }

    fn is_global_object(&self, exports: &Value) -> bool {
        exports.get("window") == Some(&Value::Bool(true))
    }

    fn default_export(&self, exports: &Value) -> Option<Value> {
        exports.get("default").filter(|v| !v.is_null()).cloned()
    }

    fn is_truthy(&self, exports: &Value) -> bool {
        !exports.is_null()
    }
}

fn engine() -> Interceptor<JsonHost> {
    let engine = Interceptor::new(JsonHost::default(), &InterceptorConfig::default()).unwrap();
    engine.arm();
    engine
}

/// Let the host runtime register its chunks-loaded function and run the
/// init callback through it.
fn boot(engine: &Interceptor<JsonHost>) -> Rc<BundlerRuntime<JsonHost>> {
    let runtime = BundlerRuntime::new(Some(ENSURE.into()));
    let signal = runtime.identity_signal(Some(STACK.into()), true);
    let chunks_loaded = ChunksLoadedFn::new("function(e,t,n,r){...}", |_, call: ChunksLoadedCall| {
        match call.callback {
            Some(callback) => callback.call(),
            None => Ok(()),
        }
    });
    assert!(engine
        .on_chunks_loaded_assigned(&runtime, &signal, chunks_loaded)
        .is_genuine());
    runtime
        .run_chunks_loaded(ChunksLoadedCall {
            callback: Some(InitCallback::new(r#"function(){return r("4711")}"#, || Ok(()))),
            ..Default::default()
        })
        .unwrap();
    assert!(engine.is_initialized());
    runtime
}

fn install(
    engine: &Interceptor<JsonHost>,
    runtime: &BundlerRuntime<JsonHost>,
    modules: &[(&str, &str)],
) {
    let mut map: FactoryMap<JsonHost> =
        modules.iter().map(|(id, src)| (*id, factory(src))).collect();
    engine.patch_factories(&mut map);
    runtime.install_factories(&map);
}

#[test]
fn scenario_a_rewrites_and_compiles() {
    let engine = engine();
    engine.register_patch(
        PatchDescriptor::new("a", "foo(bar)")
            .replace(Matcher::pattern("bar"), Replace::template("baz")),
    );
    let patched = engine.patch_factory("1", factory("function(e){return foo(bar)}"));
    let source = patched.patched_source().unwrap();
    assert!(source.contains("\n0,function(e){return foo(baz)}\n"));
    assert_eq!(engine.host().compiles.get(), 1);
    assert_eq!(patched.patched_by(), &[PluginId::from("a")]);
}

#[test]
fn scenario_b_absent_find_leaves_factory_alone() {
    let engine = engine();
    engine.register_patch(
        PatchDescriptor::new("a", "foo(bar)")
            .replace(Matcher::pattern("bar"), Replace::template("baz")),
    );
    let original = factory("function(e){return foo(qux)}");
    let wrapped = engine.patch_factory("1", Rc::clone(&original));
    assert!(Rc::ptr_eq(&wrapped.original().unwrap(), &original));
    assert!(wrapped.patched_source().is_none());
    assert!(wrapped.patched_by().is_empty());
    assert_eq!(engine.host().compiles.get(), 0);
    assert!(engine.report().plugins.is_empty());
}

#[test]
fn scenario_c_no_op_replacement_compiles_nothing() {
    let engine = engine();
    engine.register_patch(
        PatchDescriptor::new("a", "foo(bar)")
            .replace(Matcher::pattern("bar"), Replace::template("bar")),
    );
    let wrapped = engine.patch_factory("1", factory("function(e){return foo(bar)}"));
    assert!(wrapped.patched_source().is_none());
    assert_eq!(engine.host().compiles.get(), 0);
    assert_eq!(engine.report().plugins[&PluginId::from("a")].no_op, 1);
}

#[test]
fn scenario_d_later_find_sees_earlier_change() {
    let engine = engine();
    engine.register_patch(
        PatchDescriptor::new("first", "foo(bar)")
            .replace(Matcher::pattern("bar"), Replace::template("qux")),
    );
    engine.register_patch(
        PatchDescriptor::new("second", "foo(qux)")
            .replace(Matcher::literal("qux"), Replace::template("done")),
    );
    let wrapped = engine.patch_factory("1", factory("function(e){return foo(bar)}"));
    assert!(wrapped.patched_source().unwrap().contains("foo(done)"));
    assert_eq!(wrapped.patched_by(), &[PluginId::from("first"), PluginId::from("second")]);
    assert!(wrapped
        .patched_source()
        .unwrap()
        .starts_with("// Webpack Module 1 - Patched by first, second\n"));
}

#[test]
fn group_rolls_back_every_rule_of_the_descriptor() {
    let engine = engine();
    engine.register_patch(
        PatchDescriptor::new("grouped", "\"count\"")
            .group(true)
            .replace(Matcher::literal("1"), Replace::template("2"))
            .replace(Matcher::literal("missing"), Replace::template("x")),
    );
    let wrapped = engine.patch_factory("1", factory(r#"function(e){e.exports={"count":1}}"#));
    assert!(wrapped.patched_source().is_none());
    assert!(wrapped.patched_by().is_empty());
}

#[test]
fn group_rolls_back_earlier_rules_when_a_later_one_fails() {
    let engine = engine();
    engine.register_patch(
        PatchDescriptor::new("grouped", "foo")
            .group(true)
            .replace(Matcher::literal("foo"), Replace::template("bar"))
            .replace(Matcher::literal("bar"), Replace::function(|_, _| anyhow::bail!("boom"))),
    );
    let wrapped = engine.patch_factory("1", factory(r#"function(e){e.exports={"foo":1}}"#));
    assert!(wrapped.patched_source().is_none());
    assert!(wrapped.patched_by().is_empty());

    let report = engine.report();
    assert_eq!(report.pending.len(), 1);
    assert_eq!(report.plugins[&PluginId::from("grouped")].failed, 1);
}

#[test]
fn throwing_patch_falls_back_to_original_exports() {
    let engine = engine();
    engine.register_patch(
        PatchDescriptor::new("broken", "\"ok\"")
            .replace(Matcher::literal("1"), Replace::template("oops")),
    );
    let runtime = boot(&engine);
    install(&engine, &runtime, &[("7", r#"function(e){e.exports={"ok":1}}"#)]);

    let exports = runtime.require(&ModuleId::from("7")).unwrap();
    assert_eq!(exports, json!({"ok": 1}));
    assert_eq!(engine.report().plugins[&PluginId::from("broken")].fallbacks, 1);
}

#[test]
fn modules_run_unpatched_until_initialized() {
    let engine = engine();
    engine.register_patch(
        PatchDescriptor::new("a", "\"v\"").replace(Matcher::literal("1"), Replace::template("2")),
    );
    let runtime = BundlerRuntime::new(Some(ENSURE.into()));
    install(&engine, &runtime, &[("1", r#"function(e){e.exports={"v":1}}"#)]);
    assert_eq!(runtime.require(&ModuleId::from("1")).unwrap(), json!({"v": 1}));
}

#[test]
fn subscriptions_fire_once_in_load_order() {
    let engine = engine();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    engine.subscribe(
        |exports: &Value| exports.get("name") == Some(&json!("Store")),
        move |_, module| {
            log.borrow_mut().push(module.clone());
            Ok(())
        },
    );
    let menus = Rc::new(Cell::new(0));
    let counter = Rc::clone(&menus);
    engine.subscribe(
        |exports: &Value| exports.get("name") == Some(&json!("Menu")),
        move |_, _| {
            counter.set(counter.get() + 1);
            Ok(())
        },
    );

    let runtime = boot(&engine);
    install(&engine, &runtime, &[
        ("1", r#"function(e){e.exports={"name":"Other"}}"#),
        ("2", r#"function(e){e.exports={"name":"Store"}}"#),
        ("3", r#"function(e){e.exports={"name":"Store"}}"#),
        ("4", r#"function(e){e.exports={"default":{"name":"Menu"}}}"#),
    ]);
    for id in ["1", "2", "3", "4"] {
        runtime.require(&ModuleId::from(id)).unwrap();
    }

    assert_eq!(*seen.borrow(), vec![ModuleId::from("2")]);
    assert_eq!(menus.get(), 1);
    assert_eq!(engine.subscription_count(), 0);
}

#[test]
fn one_shot_patch_applies_to_first_match_only() {
    let engine = engine();
    engine.register_patch(
        PatchDescriptor::new("once", "\"flag\"")
            .replace(Matcher::literal("false"), Replace::template("true")),
    );
    let first = engine.patch_factory("1", factory(r#"function(e){e.exports={"flag":false}}"#));
    let second = engine.patch_factory("2", factory(r#"function(e){e.exports={"flag":false}}"#));
    assert!(first.patched_source().is_some());
    assert!(second.patched_source().is_none());
    assert!(engine.report().pending.is_empty());
}

#[test]
fn canonicalization_is_idempotent() {
    let scope = PluginScope::new(PluginId::from("p"), "Chunkhook.plugins[{id}]");
    let matcher = canonicalize_match(&Matcher::pattern(r"(\i)\.render\(\)"));
    assert_eq!(canonicalize_match(&matcher), matcher);

    let replace = canonicalize_replace(&Replace::template("$self.render($1)"), &scope);
    assert_eq!(replace, Replace::template(r#"Chunkhook.plugins["p"].render($1)"#));
    assert_eq!(canonicalize_replace(&replace, &scope), replace);
}

#[test]
fn global_object_exports_are_hidden_from_cache_searches() {
    let engine = engine();
    let fired = Rc::new(Cell::new(false));
    let flag = Rc::clone(&fired);
    engine.on_module_loaded(move |_, _| {
        flag.set(true);
        Ok(())
    });
    let runtime = boot(&engine);
    install(&engine, &runtime, &[("9", r#"function(e){e.exports={"window":true}}"#)]);

    runtime.require(&ModuleId::from("9")).unwrap();
    assert!(runtime.is_cache_entry_hidden(&ModuleId::from("9")));
    assert!(runtime.find(|_| true).is_none());
    assert!(!fired.get());
}

#[test]
fn chunks_pushed_before_init_run_patched_after_it() {
    let engine = engine();
    engine.register_patch(
        PatchDescriptor::new("theme", "\"theme\"")
            .replace(Matcher::literal("\"light\""), Replace::template("\"dark\"")),
    );
    let queue = ChunkQueue::new();
    assert!(engine.on_chunk_global_assigned(&queue));

    let runtime = BundlerRuntime::new(Some(ENSURE.into()));
    let parent = queue.push_fn().bind();
    let rt = Rc::clone(&runtime);
    queue.set_push(PushFn::new("function(e){...}", move |chunk: Chunk<JsonHost>| {
        rt.install_factories(&chunk.factories);
        parent.call(chunk)
    }));

    let factories: FactoryMap<JsonHost> =
        [("12", factory(r#"function(e){e.exports={"theme":"light"}}"#))].into_iter().collect();
    queue.push(Chunk::new(vec![ChunkId::from("12")], factories));
    assert_eq!(queue.len(), 1);

    let signal = runtime.identity_signal(Some(STACK.into()), true);
    engine.on_chunks_loaded_assigned(
        &runtime,
        &signal,
        ChunksLoadedFn::new("function(e,t,n,r){...}", |_, call: ChunksLoadedCall| {
            match call.callback {
                Some(callback) => callback.call(),
                None => Ok(()),
            }
        }),
    );
    runtime
        .run_chunks_loaded(ChunksLoadedCall {
            chunk_ids: vec![ChunkId::from("12")],
            callback: Some(InitCallback::new(r#"()=>{return r("12")}"#, || Ok(()))),
            priority: 0,
        })
        .unwrap();

    assert_eq!(engine.state(), HookState::Disarmed);
    assert_eq!(runtime.require(&ModuleId::from("12")).unwrap(), json!({"theme": "dark"}));
}
