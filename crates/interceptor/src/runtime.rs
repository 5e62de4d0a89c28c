//! Model of the bundler's `require` function and the slots hanging off it.

use std::{
    cell::RefCell,
    fmt,
    rc::Rc,
};

use {chunkhook_common::{ChunkId, ModuleId}, tracing::trace};

use crate::{
    detection::HostIdentitySignal,
    error::HostError,
    host::{FactoryMap, Host, Module},
};

/// The "all chunks loaded" callback the runtime calls to defer startup.
pub struct InitCallback {
    source: Rc<str>,
    run: Rc<dyn Fn() -> Result<(), HostError>>,
}

impl InitCallback {
    pub fn new<F>(source: impl Into<Rc<str>>, run: F) -> Self
    where
        F: Fn() -> Result<(), HostError> + 'static,
    {
        Self {
            source: source.into(),
            run: Rc::new(run),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn call(&self) -> Result<(), HostError> {
        (self.run)()
    }
}

impl Clone for InitCallback {
    fn clone(&self) -> Self {
        Self {
            source: Rc::clone(&self.source),
            run: Rc::clone(&self.run),
        }
    }
}

impl fmt::Debug for InitCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitCallback")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Arguments of one chunks-loaded invocation.
#[derive(Debug, Clone, Default)]
pub struct ChunksLoadedCall {
    pub chunk_ids: Vec<ChunkId>,
    pub callback: Option<InitCallback>,
    pub priority: i32,
}

type ChunksLoadedBody<H> = dyn Fn(&BundlerRuntime<H>, ChunksLoadedCall) -> Result<(), HostError>;

/// Value stored in the runtime's chunks-loaded slot.
pub struct ChunksLoadedFn<H: Host> {
    source: Rc<str>,
    call: Rc<ChunksLoadedBody<H>>,
}

impl<H: Host> ChunksLoadedFn<H> {
    pub fn new<F>(source: impl Into<Rc<str>>, call: F) -> Self
    where
        F: Fn(&BundlerRuntime<H>, ChunksLoadedCall) -> Result<(), HostError> + 'static,
    {
        Self {
            source: source.into(),
            call: Rc::new(call),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn call(
        &self,
        runtime: &BundlerRuntime<H>,
        args: ChunksLoadedCall,
    ) -> Result<(), HostError> {
        (self.call)(runtime, args)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.call, &other.call)
    }
}

impl<H: Host> Clone for ChunksLoadedFn<H> {
    fn clone(&self) -> Self {
        Self {
            source: Rc::clone(&self.source),
            call: Rc::clone(&self.call),
        }
    }
}

impl<H: Host> fmt::Debug for ChunksLoadedFn<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunksLoadedFn")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

struct CacheEntry<H: Host> {
    id: ModuleId,
    exports: H::Exports,
    enumerable: bool,
}

/// One bundler runtime instance (`__webpack_require__` and its properties).
///
/// A page can host several of these: the application's own, plus whatever
/// devtools or crash reporters bring along.
pub struct BundlerRuntime<H: Host> {
    ensure_chunk_source: Option<String>,
    factories: RefCell<FactoryMap<H>>,
    cache: RefCell<Vec<CacheEntry<H>>>,
    chunks_loaded: RefCell<Option<ChunksLoadedFn<H>>>,
}

impl<H: Host> BundlerRuntime<H> {
    /// `ensure_chunk_source` is the text of the runtime's ensure-chunk
    /// function, when it has one.
    pub fn new(ensure_chunk_source: Option<String>) -> Rc<Self> {
        Rc::new(Self {
            ensure_chunk_source,
            factories: RefCell::new(FactoryMap::new()),
            cache: RefCell::new(Vec::new()),
            chunks_loaded: RefCell::new(None),
        })
    }

    pub fn ensure_chunk_source(&self) -> Option<&str> {
        self.ensure_chunk_source.as_deref()
    }

    /// Build the identity signal for an assignment made from `stack_trace`.
    /// `receiver_is_function` is what the glue saw of the object whose slot
    /// was written: the runtime function itself, or some other object.
    pub fn identity_signal(
        &self,
        stack_trace: Option<String>,
        receiver_is_function: bool,
    ) -> HostIdentitySignal {
        HostIdentitySignal {
            stack_trace,
            receiver_is_function,
            ensure_chunk_source: self.ensure_chunk_source.clone(),
        }
    }

    /// Store the factory map as a plain value.
    pub fn set_factories(&self, factories: FactoryMap<H>) {
        *self.factories.borrow_mut() = factories;
    }

    /// Merge a chunk's factories into the map, as the JSONP loader does.
    pub fn install_factories(&self, factories: &FactoryMap<H>) {
        self.factories.borrow_mut().extend_from(factories);
    }

    pub fn factories(&self) -> FactoryMap<H> {
        self.factories.borrow().clone()
    }

    /// `require(id)`: return cached exports or run the module's factory.
    pub fn require(&self, id: &ModuleId) -> Result<H::Exports, HostError> {
        if let Some(entry) = self.cache.borrow().iter().find(|e| &e.id == id) {
            return Ok(entry.exports.clone());
        }

        let factory = self
            .factories
            .borrow()
            .get(id)
            .ok_or_else(|| HostError::MissingModule(id.clone()))?;

        // Circular requires observe the placeholder, as in webpack.
        self.cache.borrow_mut().push(CacheEntry {
            id: id.clone(),
            exports: H::Exports::default(),
            enumerable: true,
        });

        trace!(module = %id, "running factory");
        let mut module = Module::new(id.clone());
        if let Err(e) = factory.invoke(&mut module, self) {
            self.cache.borrow_mut().retain(|e| &e.id != id);
            return Err(e);
        }

        if let Some(entry) = self.cache.borrow_mut().iter_mut().find(|e| &e.id == id) {
            entry.exports = module.exports.clone();
        }
        Ok(module.exports)
    }

    /// Make a cache slot non-enumerable so searches skip it.
    pub fn hide_cache_entry(&self, id: &ModuleId) {
        if let Some(entry) = self.cache.borrow_mut().iter_mut().find(|e| &e.id == id) {
            entry.enumerable = false;
        }
    }

    pub fn is_cache_entry_hidden(&self, id: &ModuleId) -> bool {
        self.cache
            .borrow()
            .iter()
            .any(|e| &e.id == id && !e.enumerable)
    }

    /// Search loaded modules, skipping hidden cache slots.
    pub fn find<F>(&self, filter: F) -> Option<(ModuleId, H::Exports)>
    where
        F: Fn(&H::Exports) -> bool,
    {
        let snapshot: Vec<(ModuleId, H::Exports)> = self
            .cache
            .borrow()
            .iter()
            .filter(|e| e.enumerable)
            .map(|e| (e.id.clone(), e.exports.clone()))
            .collect();
        snapshot.into_iter().find(|(_, exports)| filter(exports))
    }

    pub fn chunks_loaded(&self) -> Option<ChunksLoadedFn<H>> {
        self.chunks_loaded.borrow().clone()
    }

    /// Plain write of the chunks-loaded slot.
    pub fn set_chunks_loaded(&self, f: ChunksLoadedFn<H>) {
        *self.chunks_loaded.borrow_mut() = Some(f);
    }

    /// Invoke whatever currently sits in the chunks-loaded slot.
    pub fn run_chunks_loaded(&self, call: ChunksLoadedCall) -> Result<(), HostError> {
        let current = self.chunks_loaded.borrow().clone();
        match current {
            Some(f) => f.call(self, call),
            None => Err(HostError::thrown("chunks-loaded slot is empty")),
        }
    }
}

impl<H: Host> fmt::Debug for BundlerRuntime<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundlerRuntime")
            .field("factories", &*self.factories.borrow())
            .field("cached", &self.cache.borrow().len())
            .finish_non_exhaustive()
    }
}
