//! The global chunk queue (`self.webpackChunk<app>`) and its `push`.
//!
//! The bundler replaces `push` with its own loader, which wraps whatever
//! `push` was there before. The wrapper installed here stays in front of
//! that chain: replacing `push` after installation swaps the function behind
//! the wrapper, and `bind` hands out the function behind it so the bundler
//! never wraps the wrapper.

use std::{cell::RefCell, fmt, rc::Rc};

use {chunkhook_common::ChunkId, tracing::info};

use crate::{
    host::{FactoryMap, Host},
    interceptor::Interceptor,
    patcher,
};

/// One entry pushed onto the queue: chunk ids plus their factories.
pub struct Chunk<H: Host> {
    pub ids: Vec<ChunkId>,
    pub factories: FactoryMap<H>,
}

impl<H: Host> Chunk<H> {
    pub fn new(ids: Vec<ChunkId>, factories: FactoryMap<H>) -> Self {
        Self { ids, factories }
    }
}

impl<H: Host> Clone for Chunk<H> {
    fn clone(&self) -> Self {
        Self {
            ids: self.ids.clone(),
            factories: self.factories.clone(),
        }
    }
}

impl<H: Host> fmt::Debug for Chunk<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("ids", &self.ids)
            .field("factories", &self.factories)
            .finish()
    }
}

type PushBody<H> = dyn Fn(Chunk<H>) -> usize;

struct PushWrapper<H: Host> {
    original: RefCell<PushFn<H>>,
}

/// Value of the queue's `push` property.
pub struct PushFn<H: Host> {
    source: Rc<str>,
    call: Rc<PushBody<H>>,
    wrapper: Option<Rc<PushWrapper<H>>>,
}

impl<H: Host> PushFn<H> {
    pub fn new<F>(source: impl Into<Rc<str>>, call: F) -> Self
    where
        F: Fn(Chunk<H>) -> usize + 'static,
    {
        Self {
            source: source.into(),
            call: Rc::new(call),
            wrapper: None,
        }
    }

    /// Returns the new queue length, like `Array.prototype.push`.
    pub fn call(&self, chunk: Chunk<H>) -> usize {
        (self.call)(chunk)
    }

    /// Source text; an installed wrapper reports the function behind it.
    pub fn source(&self) -> String {
        match &self.wrapper {
            Some(w) => w.original.borrow().source(),
            None => self.source.to_string(),
        }
    }

    /// `push.bind(...)`: an installed wrapper hands out the function behind it.
    pub fn bind(&self) -> PushFn<H> {
        match &self.wrapper {
            Some(w) => w.original.borrow().clone(),
            None => self.clone(),
        }
    }

    pub fn is_intercepted(&self) -> bool {
        self.wrapper.is_some()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.call, &other.call)
    }
}

impl<H: Host> Clone for PushFn<H> {
    fn clone(&self) -> Self {
        Self {
            source: Rc::clone(&self.source),
            call: Rc::clone(&self.call),
            wrapper: self.wrapper.clone(),
        }
    }
}

impl<H: Host> fmt::Debug for PushFn<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushFn")
            .field("source", &self.source())
            .field("intercepted", &self.is_intercepted())
            .finish()
    }
}

/// The global chunk array.
pub struct ChunkQueue<H: Host> {
    chunks: Rc<RefCell<Vec<Chunk<H>>>>,
    push: RefCell<PushFn<H>>,
}

impl<H: Host> ChunkQueue<H> {
    /// An empty array whose `push` is the plain array push.
    pub fn new() -> Rc<Self> {
        let chunks: Rc<RefCell<Vec<Chunk<H>>>> = Rc::new(RefCell::new(Vec::new()));
        let store = Rc::clone(&chunks);
        let push = PushFn::new("function push() { [native code] }", move |chunk| {
            let mut chunks = store.borrow_mut();
            chunks.push(chunk);
            chunks.len()
        });
        Rc::new(Self {
            chunks,
            push: RefCell::new(push),
        })
    }

    /// `queue.push(chunk)` through whatever `push` currently is.
    pub fn push(&self, chunk: Chunk<H>) -> usize {
        let push = self.push.borrow().clone();
        push.call(chunk)
    }

    pub fn push_fn(&self) -> PushFn<H> {
        self.push.borrow().clone()
    }

    /// Assign `queue.push`. Behind an installed wrapper this replaces the
    /// wrapped function instead of the wrapper.
    pub fn set_push(&self, push: PushFn<H>) {
        let current = self.push.borrow().clone();
        match &current.wrapper {
            Some(w) => *w.original.borrow_mut() = push,
            None => *self.push.borrow_mut() = push,
        }
    }

    pub fn is_intercepted(&self) -> bool {
        self.push.borrow().is_intercepted()
    }

    pub fn chunks(&self) -> Vec<Chunk<H>> {
        self.chunks.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.chunks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.borrow().is_empty()
    }
}

impl<H: Host> Interceptor<H> {
    /// The chunk global was assigned `queue`.
    ///
    /// Installs the patching `push` wrapper when armed. Returns whether a
    /// wrapper was installed; a queue that already has one is left alone.
    pub fn on_chunk_global_assigned(&self, queue: &ChunkQueue<H>) -> bool {
        if !self.shared.state.get().is_armed() || queue.is_intercepted() {
            return false;
        }
        info!(global = %self.shared.config.chunk_global, "patching chunk queue push");

        let wrapper = Rc::new(PushWrapper {
            original: RefCell::new(queue.push_fn()),
        });
        let shared = Rc::clone(&self.shared);
        let behind = Rc::clone(&wrapper);
        let handle_push = move |mut chunk: Chunk<H>| {
            patcher::patch_factories(&shared, &mut chunk.factories);
            let original = behind.original.borrow().clone();
            original.call(chunk)
        };

        *queue.push.borrow_mut() = PushFn {
            source: "handlePush".into(),
            call: Rc::new(handle_push),
            wrapper: Some(wrapper),
        };
        true
    }
}
