//! Host-side error types
//!
//! Errors the guest sees are always [`Errno`](wasi_sock_abi::Errno) codes.
//! The types here cover the embedder-facing side: configuration, import
//! wiring, the poll driver and guest exit.

use thiserror::Error;
use wasi_sock_abi::Fd;

/// Errors raised while configuring or wiring the shim
#[derive(Debug, Error)]
pub enum HostError {
    /// Configuration value rejected at build time
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Caller instance has no `memory` export
    #[error("Guest does not export a linear memory named 'memory'")]
    MissingMemory,

    /// Guest called an import this shim deliberately leaves unimplemented
    #[error("Unsupported WASI import called: {0}")]
    UnsupportedImport(&'static str),

    /// Registering an import with the linker failed
    #[error("Failed to register import '{name}': {source}")]
    Linker {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl HostError {
    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    /// Whether the guest hit an import it must never call
    pub fn is_unsupported_import(&self) -> bool {
        matches!(self, Self::UnsupportedImport(_))
    }
}

/// Errors surfaced by the poll driver to the embedding runtime
#[derive(Debug, Error)]
pub enum PollError {
    /// Handle is unknown or does not name a socket
    #[error("Bad descriptor {0}: not an open socket")]
    BadDescriptor(Fd),
}

/// Guest called `proc_exit`; unwinds the guest as a trap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Guest exited with code {0}")]
pub struct ProcExit(pub u32);
