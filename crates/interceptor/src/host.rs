//! The seam between the engine and the JavaScript host.
//!
//! The engine never evaluates code itself. Everything that needs a live
//! host (turning source text back into a callable, inspecting exports) goes
//! through [`Host`].

use std::{fmt, rc::Rc};

use chunkhook_common::{ModuleId, PluginId};

use crate::{error::HostError, runtime::BundlerRuntime};

/// Capabilities the engine borrows from the host environment.
pub trait Host: Sized + 'static {
    /// A module's `module.exports` value.
    type Exports: Clone + Default + fmt::Debug + 'static;

    /// Evaluate patched factory source into a new callable.
    fn compile(&self, module: &ModuleId, source: &str) -> Result<FactoryRef<Self>, HostError>;

    /// Whether `exports` is the host's global object (`window`).
    fn is_global_object(&self, exports: &Self::Exports) -> bool;

    /// `exports.default`, if present and truthy.
    fn default_export(&self, exports: &Self::Exports) -> Option<Self::Exports>;

    /// JavaScript truthiness of `exports`.
    fn is_truthy(&self, exports: &Self::Exports) -> bool;
}

/// A module factory: `(module, exports, require) => void`.
pub trait Factory<H: Host> {
    /// Source text, as `Function.prototype.toString` would return it.
    fn source(&self) -> String;

    /// Run the factory, populating `module.exports`.
    fn invoke(&self, module: &mut Module<H>, require: &BundlerRuntime<H>) -> Result<(), HostError>;

    /// The untouched host factory behind an instrumentation wrapper.
    fn original(&self) -> Option<FactoryRef<H>> {
        None
    }

    /// Plugins whose patches are baked into this factory.
    fn patched_by(&self) -> &[PluginId] {
        &[]
    }

    /// Source that was compiled for the patched variant, if any.
    fn patched_source(&self) -> Option<&str> {
        None
    }
}

pub type FactoryRef<H> = Rc<dyn Factory<H>>;

/// The `module` object handed to a factory.
pub struct Module<H: Host> {
    pub id: ModuleId,
    pub exports: H::Exports,
}

impl<H: Host> Module<H> {
    pub fn new(id: ModuleId) -> Self {
        Self {
            id,
            exports: H::Exports::default(),
        }
    }
}

impl<H: Host> fmt::Debug for Module<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("exports", &self.exports)
            .finish()
    }
}

type FactoryBody<H> = dyn Fn(&mut Module<H>, &BundlerRuntime<H>) -> Result<(), HostError>;

/// A factory backed by a Rust closure, with the source text it reports.
pub struct FnFactory<H: Host> {
    source: String,
    body: Box<FactoryBody<H>>,
}

impl<H: Host> FnFactory<H> {
    pub fn new<F>(source: impl Into<String>, body: F) -> FactoryRef<H>
    where
        F: Fn(&mut Module<H>, &BundlerRuntime<H>) -> Result<(), HostError> + 'static,
    {
        Rc::new(Self {
            source: source.into(),
            body: Box::new(body),
        })
    }
}

impl<H: Host> Factory<H> for FnFactory<H> {
    fn source(&self) -> String {
        self.source.clone()
    }

    fn invoke(&self, module: &mut Module<H>, require: &BundlerRuntime<H>) -> Result<(), HostError> {
        (self.body)(module, require)
    }
}

/// Factory map keyed by module id, in insertion order like a JS object.
pub struct FactoryMap<H: Host> {
    entries: Vec<(ModuleId, FactoryRef<H>)>,
}

impl<H: Host> FactoryMap<H> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert or overwrite, keeping the original position on overwrite.
    pub fn insert(&mut self, id: impl Into<ModuleId>, factory: FactoryRef<H>) {
        let id = id.into();
        match self.entries.iter_mut().find(|(k, _)| *k == id) {
            Some(slot) => slot.1 = factory,
            None => self.entries.push((id, factory)),
        }
    }

    pub fn get(&self, id: &ModuleId) -> Option<FactoryRef<H>> {
        self.entries
            .iter()
            .find(|(k, _)| k == id)
            .map(|(_, f)| Rc::clone(f))
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.entries.iter().any(|(k, _)| k == id)
    }

    pub fn ids(&self) -> Vec<ModuleId> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ModuleId, &FactoryRef<H>)> {
        self.entries.iter().map(|(k, f)| (k, f))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy every entry of `other` into this map (webpack's chunk install).
    pub fn extend_from(&mut self, other: &FactoryMap<H>) {
        for (id, factory) in other.iter() {
            self.insert(id.clone(), Rc::clone(factory));
        }
    }
}

impl<H: Host> Default for FactoryMap<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Host> Clone for FactoryMap<H> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<H: Host> fmt::Debug for FactoryMap<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(k, _)| k))
            .finish()
    }
}

impl<H: Host, I: Into<ModuleId>> FromIterator<(I, FactoryRef<H>)> for FactoryMap<H> {
    fn from_iter<T: IntoIterator<Item = (I, FactoryRef<H>)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (id, factory) in iter {
            map.insert(id, factory);
        }
        map
    }
}
