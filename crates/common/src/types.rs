//! Identifier newtypes shared by the interceptor, plugin loader, and CLI.

use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id! {
    /// Key of a module factory in a bundler runtime's factory map.
    ///
    /// Bundlers emit both numeric and string keys; both are kept as text.
    ModuleId
}

string_id! {
    /// Name of the plugin that contributed a patch or listener.
    PluginId
}

string_id! {
    /// Identifier of a chunk delivered through the chunk queue.
    ChunkId
}

impl From<u64> for ModuleId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<u64> for ChunkId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl PluginId {
    /// Validate a plugin name coming from an external manifest.
    pub fn parse(value: &str) -> crate::Result<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_control) {
            return Err(crate::Error::invalid_identifier("plugin", value));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_module_ids_render_as_text() {
        assert_eq!(ModuleId::from(417_u64).as_str(), "417");
        assert_eq!(ModuleId::from(417_u64), ModuleId::from("417"));
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&PluginId::from("pinDms")).unwrap();
        assert_eq!(json, "\"pinDms\"");
    }

    #[test]
    fn plugin_parse_rejects_blank_names() {
        assert!(PluginId::parse("   ").is_err());
        assert!(PluginId::parse("bad\nname").is_err());
        assert_eq!(PluginId::parse(" search ").unwrap().as_str(), "search");
    }
}
