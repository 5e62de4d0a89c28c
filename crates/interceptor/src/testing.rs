//! A scriptable host for unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{cell::Cell, rc::Rc};

use {chunkhook_common::ModuleId, chunkhook_config::InterceptorConfig, serde_json::{Value, json}};

use crate::{
    error::HostError,
    host::{FactoryRef, FnFactory, Host, Module},
    inert::{check_syntax, is_truthy},
    interceptor::Interceptor,
    runtime::BundlerRuntime,
};

pub(crate) const HOST_STACK: &str = concat!(
    "Error\n",
    "    at Function.set (https://discord.com/assets/web.abc.js:1:4242)\n",
    "    at https://discord.com/assets/web.abc.js:1:99",
);

/// Compiles anything with balanced delimiters. Compiled modules throw when
/// their source mentions `throw`, otherwise export `{patched, source}`.
/// Exports with a truthy `window` key stand in for the global object.
#[derive(Debug, Default)]
pub(crate) struct ScriptHost {
    pub(crate) compiles: Cell<usize>,
}

impl Host for ScriptHost {
    type Exports = Value;

    fn compile(&self, _module: &ModuleId, source: &str) -> Result<FactoryRef<Self>, HostError> {
        if source.contains("SYNTAX_ERROR") {
            return Err(HostError::syntax("SYNTAX_ERROR"));
        }
        check_syntax(source)?;
        self.compiles.set(self.compiles.get() + 1);
        let text = source.to_string();
        Ok(FnFactory::new(source, move |m: &mut Module<Self>, _| {
            if text.contains("throw") {
                return Err(HostError::thrown("patched module threw"));
            }
            m.exports = json!({"patched": true, "source": text});
            Ok(())
        }))
    }

    fn is_global_object(&self, exports: &Value) -> bool {
        exports.get("window").is_some_and(is_truthy)
    }

    fn default_export(&self, exports: &Value) -> Option<Value> {
        exports.get("default").filter(|v| is_truthy(v)).cloned()
    }

    fn is_truthy(&self, exports: &Value) -> bool {
        is_truthy(exports)
    }
}

/// An unpatched factory exporting `{original: true, source}`.
pub(crate) fn script_factory(source: &str) -> FactoryRef<ScriptHost> {
    let text = source.to_string();
    FnFactory::new(source, move |m: &mut Module<ScriptHost>, _| {
        m.exports = json!({"original": true, "source": text});
        Ok(())
    })
}

pub(crate) fn engine() -> Interceptor<ScriptHost> {
    Interceptor::new(ScriptHost::default(), &InterceptorConfig::default())
        .expect("default config compiles")
}

/// A runtime whose ensure-chunk function looks like the host's.
pub(crate) fn host_runtime() -> Rc<BundlerRuntime<ScriptHost>> {
    let ensure_chunk = concat!(
        "function(e){return Promise.all(",
        "Object.keys(n.f).reduce((t,r)=>(n.f[r](e,t),t),[]))}",
    );
    BundlerRuntime::new(Some(ensure_chunk.into()))
}
