//! The engine handle plugins and host glue talk to.

use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
};

use {
    chunkhook_common::{ModuleId, PluginId},
    chunkhook_config::InterceptorConfig,
    tracing::{debug, info},
};

use crate::{
    canonical::{Matcher, Pattern, canonicalize_match},
    detection::{HookState, IdentityRules},
    error::{Error, Result},
    host::{FactoryMap, FactoryRef, Host},
    listeners::{Listeners, SubscriptionId},
    patch::PatchDescriptor,
    patcher,
    registry::{PatchId, PatchRegistry},
    runtime::BundlerRuntime,
    stats::{PatchReport, PatchStats, PendingPatch},
};

pub(crate) struct Shared<H: Host> {
    pub(crate) host: H,
    pub(crate) config: InterceptorConfig,
    pub(crate) rules: IdentityRules,
    pub(crate) init_callback: Pattern,
    pub(crate) state: Cell<HookState>,
    pub(crate) registry: RefCell<PatchRegistry>,
    pub(crate) listeners: Listeners<H>,
    pub(crate) stats: PatchStats,
    require: RefCell<Option<Weak<BundlerRuntime<H>>>>,
    initialized: Cell<bool>,
    pub(crate) uninitialized_logged: Cell<bool>,
}

impl<H: Host> Shared<H> {
    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    pub(crate) fn require(&self) -> Option<Rc<BundlerRuntime<H>>> {
        self.require.borrow().as_ref().and_then(Weak::upgrade)
    }

    /// Record the live require handle and fire before-init listeners once.
    pub(crate) fn initialize(&self, runtime: &Rc<BundlerRuntime<H>>) {
        if self.initialized.replace(true) {
            return;
        }
        *self.require.borrow_mut() = Some(Rc::downgrade(runtime));
        self.state.set(HookState::Disarmed);
        info!("bundler require initialized");
        self.listeners.run_before_init(runtime);
    }
}

/// Interception and patch engine bound to one host.
///
/// Cloning is cheap and every clone drives the same engine.
pub struct Interceptor<H: Host> {
    pub(crate) shared: Rc<Shared<H>>,
}

impl<H: Host> Clone for Interceptor<H> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<H: Host> fmt::Debug for Interceptor<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("state", &self.shared.state.get())
            .field("initialized", &self.shared.is_initialized())
            .field("registry", &*self.shared.registry.borrow())
            .finish_non_exhaustive()
    }
}

impl<H: Host> Interceptor<H> {
    /// Fails when the configured init-callback pattern does not compile.
    pub fn new(host: H, config: &InterceptorConfig) -> Result<Self> {
        let Matcher::Pattern(pattern) =
            canonicalize_match(&Matcher::pattern(config.init_callback_pattern.as_str()))
        else {
            return Err(Error::message("init callback pattern must be a pattern"));
        };
        pattern.compiled()?;

        Ok(Self {
            shared: Rc::new(Shared {
                host,
                config: config.clone(),
                rules: IdentityRules::from_config(config),
                init_callback: pattern,
                state: Cell::new(HookState::Unarmed),
                registry: RefCell::new(PatchRegistry::new(config.self_reference.as_str())),
                listeners: Listeners::new(),
                stats: PatchStats::default(),
                require: RefCell::new(None),
                initialized: Cell::new(false),
                uninitialized_logged: Cell::new(false),
            }),
        })
    }

    pub fn host(&self) -> &H {
        &self.shared.host
    }

    pub fn config(&self) -> &InterceptorConfig {
        &self.shared.config
    }

    pub fn state(&self) -> HookState {
        self.shared.state.get()
    }

    /// Start observing slot assignments. Call before the host bundle runs.
    pub fn arm(&self) {
        if self.shared.state.get() == HookState::Unarmed {
            info!(global = %self.shared.config.chunk_global, "arming bundler hooks");
            self.shared.state.set(HookState::Armed);
        }
    }

    pub fn register_patches(
        &self,
        plugin: impl Into<PluginId>,
        descriptors: impl IntoIterator<Item = PatchDescriptor>,
    ) -> Vec<PatchId> {
        let plugin = plugin.into();
        let ids = self
            .shared
            .registry
            .borrow_mut()
            .register_plugin(&plugin, descriptors);
        debug!(plugin = %plugin, count = ids.len(), "registered plugin patches");
        ids
    }

    pub fn register_patch(&self, descriptor: PatchDescriptor) -> PatchId {
        self.shared.registry.borrow_mut().register(descriptor)
    }

    pub fn retire_patch(&self, id: PatchId) -> bool {
        self.shared.registry.borrow_mut().retire(id)
    }

    /// Fire `callback` once, for the first loaded module whose exports (or
    /// `exports.default`) satisfy `filter`.
    pub fn subscribe<F, C>(&self, filter: F, callback: C) -> SubscriptionId
    where
        F: Fn(&H::Exports) -> bool + 'static,
        C: Fn(&H::Exports, &ModuleId) -> anyhow::Result<()> + 'static,
    {
        self.shared
            .listeners
            .subscribe(Rc::new(filter), Rc::new(callback))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.listeners.unsubscribe(id)
    }

    /// Called with the exports of every module that loads successfully.
    pub fn on_module_loaded<F>(&self, callback: F)
    where
        F: Fn(&H::Exports, &ModuleId) -> anyhow::Result<()> + 'static,
    {
        self.shared.listeners.add_module_listener(Rc::new(callback));
    }

    /// Called with every instrumented factory as it is created.
    pub fn on_factory<F>(&self, callback: F)
    where
        F: Fn(&FactoryRef<H>) -> anyhow::Result<()> + 'static,
    {
        self.shared.listeners.add_factory_listener(Rc::new(callback));
    }

    /// Called with the live require handle just before the host initializes.
    /// Registered after that point, the callback runs immediately.
    pub fn on_before_init<F>(&self, callback: F)
    where
        F: Fn(&Rc<BundlerRuntime<H>>) -> anyhow::Result<()> + 'static,
    {
        if let Some(runtime) = self.shared.require() {
            if let Err(e) = callback(&runtime) {
                tracing::error!(error = %e, "before-init listener failed");
            }
            return;
        }
        self.shared.listeners.add_before_init(Rc::new(callback));
    }

    /// Patch and instrument every factory in `factories`, in place.
    pub fn patch_factories(&self, factories: &mut FactoryMap<H>) {
        patcher::patch_factories(&self.shared, factories);
    }

    /// Patch and instrument a single factory.
    pub fn patch_factory(&self, id: impl Into<ModuleId>, factory: FactoryRef<H>) -> FactoryRef<H> {
        let id = id.into();
        let mut map = FactoryMap::new();
        map.insert(id.clone(), Rc::clone(&factory));
        patcher::patch_factories(&self.shared, &mut map);
        map.get(&id).unwrap_or(factory)
    }

    /// The host's require handle, once initialization has been observed.
    pub fn require(&self) -> Option<Rc<BundlerRuntime<H>>> {
        self.shared.require()
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.is_initialized()
    }

    pub fn subscription_count(&self) -> usize {
        self.shared.listeners.subscription_count()
    }

    pub fn report(&self) -> PatchReport {
        let pending = self
            .shared
            .registry
            .borrow()
            .pending()
            .iter()
            .map(|p| PendingPatch {
                plugin: p.descriptor.plugin.clone(),
                find: p.descriptor.find.clone(),
                all: p.descriptor.all,
            })
            .collect();
        PatchReport {
            state: self.shared.state.get(),
            initialized: self.shared.is_initialized(),
            plugins: self.shared.stats.snapshot(),
            pending,
        }
    }
}
