//! Ordered store of registered patches.
//!
//! Registration order is application order. Lookups are gated by a single
//! Aho-Corasick pass over the module source for every registered `find`
//! string; the automaton is rebuilt lazily after the set changes.

use std::{cell::OnceCell, collections::HashSet, fmt, rc::Rc};

use {
    aho_corasick::AhoCorasick,
    chunkhook_common::PluginId,
    serde::Serialize,
    tracing::{debug, warn},
};

use crate::{
    canonical::{PluginScope, canonicalize_match, canonicalize_replace},
    patch::{PatchDescriptor, ReplacementRule},
};

/// Stable handle of a registered patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PatchId(u64);

impl fmt::Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
pub struct RegisteredPatch {
    pub id: PatchId,
    pub scope: PluginScope,
    pub descriptor: PatchDescriptor,
}

struct FindIndex {
    automaton: Option<AhoCorasick>,
    /// Patches owning each automaton pattern, by pattern index.
    owners: Vec<Vec<PatchId>>,
    /// Patches with an empty `find`, which every source contains.
    always: Vec<PatchId>,
}

impl FindIndex {
    fn build(entries: &[Rc<RegisteredPatch>]) -> Self {
        let mut finds: Vec<&str> = Vec::new();
        let mut owners: Vec<Vec<PatchId>> = Vec::new();
        let mut always = Vec::new();

        for entry in entries {
            let find = entry.descriptor.find.as_str();
            if find.is_empty() {
                always.push(entry.id);
                continue;
            }
            match finds.iter().position(|f| *f == find) {
                Some(i) => owners[i].push(entry.id),
                None => {
                    finds.push(find);
                    owners.push(vec![entry.id]);
                },
            }
        }

        let automaton = if finds.is_empty() {
            None
        } else {
            match AhoCorasick::new(&finds) {
                Ok(ac) => Some(ac),
                Err(e) => {
                    warn!(error = %e, "failed to build find automaton, using substring scans");
                    None
                },
            }
        };
        debug!(finds = finds.len(), "built find automaton");

        Self {
            automaton,
            owners,
            always,
        }
    }
}

/// Registered patches, in registration order.
pub struct PatchRegistry {
    self_reference: String,
    entries: Vec<Rc<RegisteredPatch>>,
    next_id: u64,
    index: OnceCell<FindIndex>,
}

impl PatchRegistry {
    /// `self_reference` is the `$self` template (`{id}` is the quoted plugin).
    pub fn new(self_reference: impl Into<String>) -> Self {
        Self {
            self_reference: self_reference.into(),
            entries: Vec::new(),
            next_id: 0,
            index: OnceCell::new(),
        }
    }

    /// Append a patch. Its matchers and replacements are canonicalized here.
    pub fn register(&mut self, mut descriptor: PatchDescriptor) -> PatchId {
        let scope = PluginScope::new(descriptor.plugin.clone(), &self.self_reference);
        descriptor.replacements = descriptor
            .replacements
            .into_iter()
            .map(|rule| ReplacementRule {
                matcher: canonicalize_match(&rule.matcher),
                replace: canonicalize_replace(&rule.replace, &scope),
                predicate: rule.predicate,
            })
            .collect();

        let id = PatchId(self.next_id);
        self.next_id += 1;
        debug!(
            plugin = %descriptor.plugin,
            find = %descriptor.find,
            patch = %id,
            "registered patch"
        );
        self.entries.push(Rc::new(RegisteredPatch {
            id,
            scope,
            descriptor,
        }));
        self.index.take();
        id
    }

    /// Register several patches for one plugin, overriding their `plugin`.
    pub fn register_plugin(
        &mut self,
        plugin: &PluginId,
        descriptors: impl IntoIterator<Item = PatchDescriptor>,
    ) -> Vec<PatchId> {
        descriptors
            .into_iter()
            .map(|mut d| {
                d.plugin = plugin.clone();
                self.register(d)
            })
            .collect()
    }

    /// Remove a patch. Snapshots taken earlier keep their copy.
    pub fn retire(&mut self, id: PatchId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        let removed = self.entries.len() != before;
        if removed {
            self.index.take();
        }
        removed
    }

    /// Every registered patch, in order.
    pub fn snapshot(&self) -> Vec<Rc<RegisteredPatch>> {
        self.entries.clone()
    }

    /// Ids of patches whose `find` occurs in `source`.
    pub fn find_hits(&self, source: &str) -> HashSet<PatchId> {
        let index = self.index.get_or_init(|| FindIndex::build(&self.entries));
        let mut hits: HashSet<PatchId> = index.always.iter().copied().collect();

        match &index.automaton {
            Some(ac) => {
                for m in ac.find_overlapping_iter(source) {
                    if let Some(owners) = index.owners.get(m.pattern().as_usize()) {
                        hits.extend(owners.iter().copied());
                    }
                }
            },
            None => hits.extend(
                self.entries
                    .iter()
                    .filter(|e| source.contains(e.descriptor.find.as_str()))
                    .map(|e| e.id),
            ),
        }
        hits
    }

    /// Patches whose `find` occurs in `source` and whose predicate currently
    /// holds, in registration order. Predicates run on every call.
    pub fn query(&self, source: &str) -> Vec<Rc<RegisteredPatch>> {
        let hits = self.find_hits(source);
        self.entries
            .iter()
            .filter(|e| hits.contains(&e.id) && e.descriptor.is_enabled())
            .cloned()
            .collect()
    }

    /// Patches still registered; one-shot patches disappear once applied.
    pub fn pending(&self) -> Vec<Rc<RegisteredPatch>> {
        self.snapshot()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for PatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchRegistry")
            .field("entries", &self.entries.len())
            .field("indexed", &self.index.get().is_some())
            .finish()
    }
}
