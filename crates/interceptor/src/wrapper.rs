use std::rc::Rc;

use {
    chunkhook_common::{ModuleId, PluginId},
    tracing::error,
};

use crate::{
    error::HostError,
    host::{Factory, FactoryRef, Host, Module},
    interceptor::Shared,
    patcher::PatchOutcome,
    runtime::BundlerRuntime,
    stats::Outcome,
};

/// What actually sits in the host's factory map after patching.
///
/// Runs the patched factory once the engine has seen the host initialize,
/// falls back to the original when the patched one throws, and reports the
/// loaded exports to listeners.
pub(crate) struct InstrumentedFactory<H: Host> {
    id: ModuleId,
    original: FactoryRef<H>,
    current: FactoryRef<H>,
    patched_by: Vec<PluginId>,
    patched_source: Option<String>,
    shared: Rc<Shared<H>>,
}

impl<H: Host> InstrumentedFactory<H> {
    pub(crate) fn new(
        id: ModuleId,
        original: FactoryRef<H>,
        outcome: PatchOutcome<H>,
        shared: Rc<Shared<H>>,
    ) -> Self {
        Self {
            id,
            original,
            current: outcome.current,
            patched_by: outcome.patched_by,
            patched_source: outcome.patched_source,
            shared,
        }
    }

    fn is_patched(&self) -> bool {
        self.patched_source.is_some()
    }

    fn after_load(&self, exports: &H::Exports, require: &BundlerRuntime<H>) {
        let host = &self.shared.host;
        if !host.is_truthy(exports) {
            return;
        }
        // Modules exporting the global object would slow every cache search.
        if host.is_global_object(exports) {
            require.hide_cache_entry(&self.id);
            return;
        }
        self.shared.listeners.dispatch_loaded(host, exports, &self.id);
    }
}

impl<H: Host> Factory<H> for InstrumentedFactory<H> {
    fn source(&self) -> String {
        self.original.source()
    }

    fn invoke(&self, module: &mut Module<H>, require: &BundlerRuntime<H>) -> Result<(), HostError> {
        if !self.shared.is_initialized() {
            if !self.shared.uninitialized_logged.replace(true) {
                error!("bundler require was not initialized, running modules unpatched");
            }
            return self.original.invoke(module, require);
        }

        if let Err(e) = self.current.invoke(module, require) {
            if !self.is_patched() {
                return Err(e);
            }
            error!(
                module = %self.id,
                plugins = ?self.patched_by,
                error = %e,
                "patched module threw, running the original instead"
            );
            for plugin in &self.patched_by {
                self.shared.stats.record(plugin, Outcome::Fallback);
            }
            module.exports = H::Exports::default();
            return self.original.invoke(module, require);
        }

        self.after_load(&module.exports, require);
        Ok(())
    }

    fn original(&self) -> Option<FactoryRef<H>> {
        Some(Rc::clone(&self.original))
    }

    fn patched_by(&self) -> &[PluginId] {
        &self.patched_by
    }

    fn patched_source(&self) -> Option<&str> {
        self.patched_source.as_deref()
    }
}
