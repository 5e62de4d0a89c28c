//! Webpack interception and patch engine.
//!
//! The engine sits between a host bundler and its module factories. It
//! observes the three places factories enter the host (the global chunk
//! queue, the runtime's pre-populated factory map, and the "all chunks
//! loaded" callback), rewrites factory source with plugin-registered
//! find/replace patches, recompiles the result through the [`Host`], and
//! wraps every factory so a broken patch degrades to the original module
//! instead of taking the host down.

pub mod canonical;
pub mod chunk_loader;
pub mod detection;
pub mod diagnostics;
pub mod error;
pub mod helper;
pub mod host;
pub mod inert;
pub mod js_regex;
pub mod interceptor;
pub mod listeners;
pub mod module_registry;
pub mod patch;
mod patcher;
pub mod registry;
pub mod replace;
pub mod runtime;
pub mod stats;
mod wrapper;

#[cfg(test)]
pub(crate) mod testing;

pub use {
    canonical::{Matcher, Pattern, PluginScope, Replace, ReplaceFn},
    chunk_loader::{Chunk, ChunkQueue, PushFn},
    detection::{DecoyReason, HookState, HostIdentitySignal, IdentityRules, Verdict},
    diagnostics::{DiffOp, PatchContext},
    error::{Error, HostError, Result},
    helper::{FindResult, RulePreview, find_module, preview_rule},
    host::{Factory, FactoryMap, FactoryRef, FnFactory, Host, Module},
    inert::InertHost,
    js_regex::CompiledPattern,
    interceptor::Interceptor,
    listeners::SubscriptionId,
    patch::{PatchDescriptor, Predicate, ReplacementRule},
    patcher::normalize_source,
    registry::{PatchId, PatchRegistry},
    runtime::{BundlerRuntime, ChunksLoadedCall, ChunksLoadedFn, InitCallback},
    stats::{PatchReport, PendingPatch, PluginPatchStats},
};
