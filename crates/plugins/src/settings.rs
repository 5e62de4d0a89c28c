//! Live plugin settings read by manifest `when` conditions.

use std::{cell::RefCell, collections::HashMap, fmt, rc::Rc};

use chunkhook_config::{PluginsConfig, SettingValue};

type SettingsMap = HashMap<String, HashMap<String, SettingValue>>;

/// Shared, mutable view of every plugin's settings.
///
/// Clones share storage, so predicates built from a store see later
/// updates.
#[derive(Clone, Default)]
pub struct SettingsStore {
    inner: Rc<RefCell<SettingsMap>>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &PluginsConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(config.settings.clone())),
        }
    }

    pub fn get(&self, plugin: &str, key: &str) -> Option<SettingValue> {
        self.inner
            .borrow()
            .get(plugin)
            .and_then(|settings| settings.get(key))
            .cloned()
    }

    pub fn set(&self, plugin: &str, key: &str, value: SettingValue) {
        self.inner
            .borrow_mut()
            .entry(plugin.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    /// Missing settings count as off.
    pub fn is_on(&self, plugin: &str, key: &str) -> bool {
        self.get(plugin, key).is_some_and(|v| v.is_truthy())
    }
}

impl fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsStore")
            .field("plugins", &self.inner.borrow().len())
            .finish()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_are_visible_through_clones() {
        let store = SettingsStore::new();
        let view = store.clone();
        assert!(!view.is_on("pinDms", "enabled"));

        store.set("pinDms", "enabled", SettingValue::Bool(true));
        assert!(view.is_on("pinDms", "enabled"));
        store.set("pinDms", "enabled", SettingValue::Integer(0));
        assert!(!view.is_on("pinDms", "enabled"));
    }

    #[test]
    fn seeded_from_config() {
        let mut config = PluginsConfig::default();
        config
            .settings
            .entry("search".into())
            .or_default()
            .insert("mode".into(), SettingValue::Text("fuzzy".into()));
        let store = SettingsStore::from_config(&config);
        assert_eq!(store.get("search", "mode"), Some(SettingValue::Text("fuzzy".into())));
        assert!(store.get("search", "other").is_none());
    }
}
