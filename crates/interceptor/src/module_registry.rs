//! Hooks on the runtime's factory-map and chunks-loaded slots.
//!
//! The host glue reports every write to those slots, together with a
//! [`HostIdentitySignal`] gathered at the write, and stores whatever these
//! hooks hand back.

use std::rc::{Rc, Weak};

use tracing::{debug, info};

use crate::{
    detection::{HookState, HostIdentitySignal, IdentityRules, Verdict},
    host::{FactoryMap, Host},
    interceptor::{Interceptor, Shared},
    patcher,
    runtime::{BundlerRuntime, ChunksLoadedFn, InitCallback},
};

impl<H: Host> Interceptor<H> {
    /// A runtime's factory-map slot was written.
    ///
    /// Genuine maps are patched in place before being stored. Every map is
    /// stored as a plain value on `runtime`.
    pub fn on_factory_map_assigned(
        &self,
        runtime: &BundlerRuntime<H>,
        signal: &HostIdentitySignal,
        mut factories: FactoryMap<H>,
    ) -> Verdict {
        let shared = &self.shared;
        let verdict = if shared.state.get().is_armed() {
            shared.rules.judge_factory_map(signal)
        } else {
            Verdict::Ignored
        };

        match verdict {
            Verdict::Genuine => {
                let asset = signal
                    .stack_trace
                    .as_deref()
                    .and_then(IdentityRules::asset_name)
                    .unwrap_or_default();
                info!(
                    property = %shared.config.factory_map_property,
                    asset,
                    modules = factories.len(),
                    "found bundler factory map"
                );
                patcher::patch_factories(shared, &mut factories);
            },
            Verdict::Decoy(reason) => {
                debug!(%reason, "ignoring factory map of a foreign runtime");
            },
            Verdict::Ignored => {},
        }

        runtime.set_factories(factories);
        verdict
    }

    /// A runtime's chunks-loaded slot was written.
    ///
    /// The first genuine write gets wrapped so the engine sees the host's
    /// init callback; everything else is stored unchanged.
    pub fn on_chunks_loaded_assigned(
        &self,
        runtime: &Rc<BundlerRuntime<H>>,
        signal: &HostIdentitySignal,
        chunks_loaded: ChunksLoadedFn<H>,
    ) -> Verdict {
        let shared = &self.shared;
        let verdict = if shared.state.get() == HookState::Armed {
            shared.rules.judge_chunks_loaded(signal)
        } else {
            Verdict::Ignored
        };

        match verdict {
            Verdict::Genuine => {
                info!(
                    property = %shared.config.chunks_loaded_property,
                    "found main chunks-loaded function"
                );
                shared.state.set(HookState::Detected);
                runtime.set_chunks_loaded(wrap_chunks_loaded(
                    Rc::clone(shared),
                    Rc::downgrade(runtime),
                    chunks_loaded,
                ));
            },
            Verdict::Decoy(reason) => {
                debug!(%reason, "ignoring chunks-loaded function of a foreign runtime");
                runtime.set_chunks_loaded(chunks_loaded);
            },
            Verdict::Ignored => runtime.set_chunks_loaded(chunks_loaded),
        }
        verdict
    }
}

fn wrap_chunks_loaded<H: Host>(
    shared: Rc<Shared<H>>,
    runtime: Weak<BundlerRuntime<H>>,
    original: ChunksLoadedFn<H>,
) -> ChunksLoadedFn<H> {
    let source = original.source().to_string();
    ChunksLoadedFn::new(source, move |rt: &BundlerRuntime<H>, mut call| {
        if let Some(callback) = call.callback.take() {
            let is_init = shared
                .init_callback
                .compiled()
                .and_then(|c| c.is_match(callback.source()));
            call.callback = Some(if matches!(is_init, Ok(true)) {
                // One-shot: the slot goes back to the plain original.
                rt.set_chunks_loaded(original.clone());
                debug!("intercepted host init callback");
                let (shared, runtime) = (Rc::clone(&shared), runtime.clone());
                let inner = callback.clone();
                InitCallback::new(callback.source(), move || {
                    if let Some(rt) = runtime.upgrade() {
                        shared.initialize(&rt);
                    }
                    inner.call()
                })
            } else {
                callback
            });
        }
        original.call(rt, call)
    })
}
