//! Per-plugin patch outcome counters.

use std::{cell::RefCell, collections::BTreeMap};

use {chunkhook_common::PluginId, serde::Serialize};

use crate::detection::HookState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PluginPatchStats {
    /// Modules that ended up carrying at least one of the plugin's changes.
    pub applied: u64,
    /// Replacements that matched nothing.
    pub no_op: u64,
    /// Replacements that errored or failed to compile.
    pub failed: u64,
    /// Patched factories that threw and fell back to the original.
    pub fallbacks: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Applied,
    NoOp,
    Failed,
    Fallback,
}

#[derive(Debug, Default)]
pub(crate) struct PatchStats {
    plugins: RefCell<BTreeMap<PluginId, PluginPatchStats>>,
}

impl PatchStats {
    pub(crate) fn record(&self, plugin: &PluginId, outcome: Outcome) {
        let mut plugins = self.plugins.borrow_mut();
        let entry = plugins.entry(plugin.clone()).or_default();
        match outcome {
            Outcome::Applied => entry.applied += 1,
            Outcome::NoOp => entry.no_op += 1,
            Outcome::Failed => entry.failed += 1,
            Outcome::Fallback => entry.fallbacks += 1,
        }
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<PluginId, PluginPatchStats> {
        self.plugins.borrow().clone()
    }
}

/// A registered patch that has not been retired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingPatch {
    pub plugin: PluginId,
    pub find: String,
    pub all: bool,
}

/// Snapshot returned by [`Interceptor::report`](crate::Interceptor::report).
#[derive(Debug, Clone, Serialize)]
pub struct PatchReport {
    pub state: HookState,
    pub initialized: bool,
    pub plugins: BTreeMap<PluginId, PluginPatchStats>,
    pub pending: Vec<PendingPatch>,
}

impl PatchReport {
    /// One-shot patches that never found their module.
    pub fn unmatched(&self) -> impl Iterator<Item = &PendingPatch> {
        self.pending.iter().filter(|p| !p.all)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_plugin() {
        let stats = PatchStats::default();
        let a = PluginId::from("a");
        stats.record(&a, Outcome::Applied);
        stats.record(&a, Outcome::Failed);
        stats.record(&PluginId::from("b"), Outcome::NoOp);

        let snap = stats.snapshot();
        assert_eq!(snap[&a], PluginPatchStats {
            applied: 1,
            failed: 1,
            ..Default::default()
        });
        assert_eq!(snap[&PluginId::from("b")].no_op, 1);
    }

    #[test]
    fn report_serializes() {
        let report = PatchReport {
            state: HookState::Armed,
            initialized: false,
            plugins: BTreeMap::new(),
            pending: vec![
                PendingPatch {
                    plugin: PluginId::from("a"),
                    find: "x".into(),
                    all: false,
                },
                PendingPatch {
                    plugin: PluginId::from("b"),
                    find: "y".into(),
                    all: true,
                },
            ],
        };
        assert_eq!(report.unmatched().count(), 1);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["state"], "armed");
        assert_eq!(json["pending"][0]["plugin"], "a");
    }
}
