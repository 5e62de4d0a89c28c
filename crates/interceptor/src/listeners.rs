//! Plugin callbacks fired as modules load.
//!
//! Every dispatch iterates a snapshot, so callbacks may register further
//! listeners or trigger nested module loads. Callback errors are logged and
//! never reach the host.

use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

use {
    chunkhook_common::ModuleId,
    tracing::error,
};

use crate::{
    host::{FactoryRef, Host},
    runtime::BundlerRuntime,
};

/// Handle for removing a subscription before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

pub type ModuleListener<H> = Rc<dyn Fn(&<H as Host>::Exports, &ModuleId) -> anyhow::Result<()>>;
pub type FactoryListener<H> = Rc<dyn Fn(&FactoryRef<H>) -> anyhow::Result<()>>;
pub type BeforeInitListener<H> = Rc<dyn Fn(&Rc<BundlerRuntime<H>>) -> anyhow::Result<()>>;
pub type ExportsFilter<H> = Rc<dyn Fn(&<H as Host>::Exports) -> bool>;

struct Subscription<H: Host> {
    id: SubscriptionId,
    filter: ExportsFilter<H>,
    callback: ModuleListener<H>,
}

pub(crate) struct Listeners<H: Host> {
    modules: RefCell<Vec<ModuleListener<H>>>,
    factories: RefCell<Vec<FactoryListener<H>>>,
    before_init: RefCell<Vec<BeforeInitListener<H>>>,
    subscriptions: RefCell<Vec<Rc<Subscription<H>>>>,
    next_subscription: Cell<u64>,
}

impl<H: Host> Listeners<H> {
    pub(crate) fn new() -> Self {
        Self {
            modules: RefCell::new(Vec::new()),
            factories: RefCell::new(Vec::new()),
            before_init: RefCell::new(Vec::new()),
            subscriptions: RefCell::new(Vec::new()),
            next_subscription: Cell::new(0),
        }
    }

    pub(crate) fn add_module_listener(&self, listener: ModuleListener<H>) {
        self.modules.borrow_mut().push(listener);
    }

    pub(crate) fn add_factory_listener(&self, listener: FactoryListener<H>) {
        self.factories.borrow_mut().push(listener);
    }

    pub(crate) fn add_before_init(&self, listener: BeforeInitListener<H>) {
        self.before_init.borrow_mut().push(listener);
    }

    pub(crate) fn subscribe(
        &self,
        filter: ExportsFilter<H>,
        callback: ModuleListener<H>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.get());
        self.next_subscription.set(id.0 + 1);
        self.subscriptions.borrow_mut().push(Rc::new(Subscription {
            id,
            filter,
            callback,
        }));
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.borrow_mut();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    pub(crate) fn subscription_count(&self) -> usize {
        self.subscriptions.borrow().len()
    }

    pub(crate) fn notify_factory(&self, factory: &FactoryRef<H>) {
        let snapshot = self.factories.borrow().clone();
        for listener in snapshot {
            if let Err(e) = listener(factory) {
                error!(error = %e, "factory listener failed");
            }
        }
    }

    /// Drain before-init listeners; each fires at most once.
    pub(crate) fn run_before_init(&self, runtime: &Rc<BundlerRuntime<H>>) {
        let drained = std::mem::take(&mut *self.before_init.borrow_mut());
        for listener in drained {
            if let Err(e) = listener(runtime) {
                error!(error = %e, "before-init listener failed");
            }
        }
    }

    /// Module listeners first, then matching subscriptions.
    pub(crate) fn dispatch_loaded(&self, host: &H, exports: &H::Exports, module: &ModuleId) {
        let modules = self.modules.borrow().clone();
        for listener in modules {
            if let Err(e) = listener(exports, module) {
                error!(module = %module, error = %e, "module listener failed");
            }
        }

        let subscriptions = self.subscriptions.borrow().clone();
        if subscriptions.is_empty() {
            return;
        }
        let default_export = host.default_export(exports);
        for sub in subscriptions {
            let target = if (sub.filter)(exports) {
                exports
            } else {
                match default_export.as_ref() {
                    Some(default) if (sub.filter)(default) => default,
                    _ => continue,
                }
            };
            // An earlier callback in this pass may have consumed it.
            if !self.unsubscribe(sub.id) {
                continue;
            }
            if let Err(e) = (sub.callback)(target, module) {
                error!(
                    module = %module,
                    subscription = %sub.id,
                    error = %e,
                    "subscription callback failed"
                );
            }
        }
    }
}
