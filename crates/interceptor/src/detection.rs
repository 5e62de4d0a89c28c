//! Deciding whether an intercepted runtime belongs to the host application.
//!
//! Browser extensions, devtools and crash reporters ship their own copies of
//! the bundler runtime. Their assignments go through the same slots as the
//! application's, so each assignment is judged from a [`HostIdentitySignal`]
//! before the engine touches it.

use {chunkhook_config::InterceptorConfig, serde::Serialize};

/// Progress of the runtime detection hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookState {
    /// Nothing installed yet.
    #[default]
    Unarmed,
    /// Observers are installed and waiting for the host runtime.
    Armed,
    /// The host's chunks-loaded function has been wrapped.
    Detected,
    /// The init callback ran; detection is permanently off.
    Disarmed,
}

impl HookState {
    pub fn is_armed(self) -> bool {
        !matches!(self, Self::Unarmed)
    }
}

/// Independent facts gathered at the moment a runtime slot is written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostIdentitySignal {
    /// Stack trace of the assignment, if the host could produce one.
    pub stack_trace: Option<String>,
    /// Whether the object receiving the slot is the runtime function itself.
    pub receiver_is_function: bool,
    /// Source of the receiver's ensure-chunk function.
    pub ensure_chunk_source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoyReason {
    MissingStack,
    ForeignOrigin,
    NotARuntime,
    MissingEnsureChunk,
    EnsureChunkMismatch,
}

impl std::fmt::Display for DecoyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::MissingStack => "no stack trace",
            Self::ForeignOrigin => "assignment did not originate from the host",
            Self::NotARuntime => "receiver is not a runtime function",
            Self::MissingEnsureChunk => "runtime has no ensure-chunk function",
            Self::EnsureChunkMismatch => "ensure-chunk function does not match",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Genuine,
    Decoy(DecoyReason),
    /// The hook was not armed or has already fired.
    Ignored,
}

impl Verdict {
    pub fn is_genuine(self) -> bool {
        matches!(self, Self::Genuine)
    }
}

/// Pure decision rules over [`HostIdentitySignal`].
#[derive(Debug, Clone)]
pub struct IdentityRules {
    pub origin_marker: String,
    pub ensure_chunk_signature: String,
}

impl IdentityRules {
    pub fn from_config(config: &InterceptorConfig) -> Self {
        Self {
            origin_marker: config.origin_marker.clone(),
            ensure_chunk_signature: config.ensure_chunk_signature.clone(),
        }
    }

    fn check_origin(&self, signal: &HostIdentitySignal) -> Result<(), DecoyReason> {
        let stack = signal
            .stack_trace
            .as_deref()
            .ok_or(DecoyReason::MissingStack)?;
        if !stack.contains(&self.origin_marker) {
            return Err(DecoyReason::ForeignOrigin);
        }
        if !signal.receiver_is_function {
            return Err(DecoyReason::NotARuntime);
        }
        Ok(())
    }

    /// Factory-map writes only need the origin corroborated.
    pub fn judge_factory_map(&self, signal: &HostIdentitySignal) -> Verdict {
        match self.check_origin(signal) {
            Ok(()) => Verdict::Genuine,
            Err(reason) => Verdict::Decoy(reason),
        }
    }

    /// Chunks-loaded writes also need the ensure-chunk function to look right.
    pub fn judge_chunks_loaded(&self, signal: &HostIdentitySignal) -> Verdict {
        if let Err(reason) = self.check_origin(signal) {
            return Verdict::Decoy(reason);
        }
        match signal.ensure_chunk_source.as_deref() {
            None => Verdict::Decoy(DecoyReason::MissingEnsureChunk),
            Some(src) if !src.contains(&self.ensure_chunk_signature) => {
                Verdict::Decoy(DecoyReason::EnsureChunkMismatch)
            },
            Some(_) => Verdict::Genuine,
        }
    }

    /// Script name (`/assets/<name>.js`) the assignment came from.
    pub fn asset_name(stack: &str) -> Option<&str> {
        let start = stack.find("/assets/")? + "/assets/".len();
        let rest = &stack[start..];
        let end = rest.find(".js")? + ".js".len();
        Some(&rest[..end])
    }
}
