use {chunkhook_common::{ModuleId, PluginId}, thiserror::Error};

/// Errors raised while preparing or applying patches.
///
/// None of these reach the host: the patcher logs them and rolls back.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported regex flag {flag:?} in {flags:?}")]
    InvalidFlags { flags: String, flag: char },

    #[error("invalid pattern /{pattern}/: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("matching /{pattern}/ failed: {reason}")]
    MatchFailed { pattern: String, reason: String },

    #[error("replacement by {plugin} failed: {source}")]
    ReplaceFailed {
        plugin: PluginId,
        #[source]
        source: anyhow::Error,
    },

    #[error("patched module {module} failed to compile: {source}")]
    Compile {
        module: ModuleId,
        #[source]
        source: HostError,
    },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

impl chunkhook_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

chunkhook_common::impl_context!();

/// Something the host runtime threw.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// A factory, callback, or push threw at runtime.
    #[error("{0}")]
    Thrown(String),

    /// The host refused to evaluate source text.
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("cannot find module {0}")]
    MissingModule(ModuleId),
}

impl HostError {
    #[must_use]
    pub fn thrown(message: impl Into<String>) -> Self {
        Self::Thrown(message.into())
    }

    #[must_use]
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax(message.into())
    }
}
