//! The engine side of the gateway.
//!
//! A [`Sandbox`] is one isolated script-engine instance reached through a
//! small guest ABI: a one-time startup routine, script evaluation, and a
//! call entry point that takes and returns MessagePack bytes. The gateway
//! owns lifecycle ordering and marshaling checks; a sandbox only moves
//! bytes across the boundary and reports what the guest said.
//!
//! [`WasmtimeSandbox`] runs a compiled WASM module under wasmtime with WASI
//! preview1.

pub mod abi;
pub mod wasm;

pub use abi::{GuestAbi, GuestSlice};
pub use wasm::WasmtimeSandbox;

use std::path::PathBuf;
use thiserror::Error;

use crate::target::{CallTarget, Resolution};

/// What the guest reported after evaluating a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    Completed,
    /// The script threw or failed to parse. Carries the guest status code.
    Raised(i32),
}

impl ExecStatus {
    /// Maps a guest status code (`0` is success) to a status.
    pub fn from_code(code: i32) -> ExecStatus {
        if code == 0 {
            ExecStatus::Completed
        } else {
            ExecStatus::Raised(code)
        }
    }
}

/// Host-level faults. Unlike script errors these leave the instance in an
/// unknown state, so the gateway disposes of it.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to read module {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to compile module: {0}")]
    Compile(String),
    #[error("failed to configure WASI: {0}")]
    Wasi(String),
    #[error("failed to instantiate module: {0}")]
    Instantiate(String),
    #[error("module does not export {0}")]
    MissingExport(String),
    #[error("export {name} has an unexpected signature: {reason}")]
    ExportSignature { name: String, reason: String },
    #[error("guest trapped in {export}: {message}")]
    Trap { export: String, message: String },
    #[error("guest exited with status {0}")]
    Exit(i32),
    #[error("guest memory: {0}")]
    Memory(String),
    #[error("payload of {len} bytes does not fit in guest memory")]
    TooLarge { len: usize },
}

/// One sandboxed engine instance.
///
/// Implementations are driven strictly in order by the gateway: `initialize`
/// exactly once, then any sequence of `exec`, `resolve` and `invoke`.
pub trait Sandbox {
    /// Handle to a resolved function, valid until the next operation.
    type Callable;

    /// Runs the engine's one-time startup routine.
    fn initialize(&mut self) -> Result<(), SandboxError>;

    /// Evaluates script source for its side effects.
    fn exec(&mut self, source: &str) -> Result<ExecStatus, SandboxError>;

    /// Looks `target` up against the engine's current global bindings.
    fn resolve(&mut self, target: &CallTarget) -> Result<Resolution<Self::Callable>, SandboxError>;

    /// Calls a resolved function with a MessagePack-encoded argument array.
    ///
    /// `Ok(None)` means the guest reported failure: the function threw, or
    /// its return value could not be encoded.
    fn invoke(&mut self, callable: &Self::Callable, args: &[u8]) -> Result<Option<Vec<u8>>, SandboxError>;
}
