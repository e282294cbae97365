//! The UDF call gateway.
//!
//! A [`Gateway`] owns exactly one sandboxed engine instance and enforces its
//! lifecycle:
//!
//! ```text
//! Uninitialized --initialize()--> Ready --execute()/call()--> Ready
//!       |                           |
//!       +-------- dispose() --------+--> Disposed
//! ```
//!
//! Script errors, unresolved targets and malformed payloads are reported as
//! errors and leave the instance `Ready`. A failed startup or a host-level
//! sandbox fault disposes the instance; it cannot be used again.

use std::fmt;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ConfigError, GatewayConfig};
use crate::msgpack::{self, DecodeError, EncodeError, Value};
use crate::sandbox::{ExecStatus, Sandbox, SandboxError, WasmtimeSandbox};
use crate::target::{CallTarget, Resolution, TargetError};

/// Lifecycle state of an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Uninitialized,
    Ready,
    Disposed,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceState::Uninitialized => "uninitialized",
            InstanceState::Ready => "ready",
            InstanceState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Broad classes of [`GatewayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Startup,
    Lifecycle,
    Script,
    Resolution,
    Decode,
    Invocation,
    Encode,
    Sandbox,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("engine startup failed: {0}")]
    Startup(#[source] SandboxError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("engine instance is not initialized")]
    NotInitialized,
    #[error("engine instance is already initialized")]
    AlreadyInitialized,
    #[error("engine instance has been disposed")]
    Disposed,
    #[error("script raised an error (status {status})")]
    Script { status: i32 },
    #[error(transparent)]
    InvalidTarget(#[from] TargetError),
    #[error("call target {target} does not resolve to a function")]
    Unresolved { target: String },
    #[error("malformed call arguments: {0}")]
    Decode(#[source] DecodeError),
    #[error("call arguments must be an array, got {kind}")]
    ArgsNotArray { kind: &'static str },
    #[error("call to {target} produced no result")]
    Invocation { target: String },
    #[error("failed to encode call arguments: {0}")]
    Encode(#[from] EncodeError),
    #[error("call to {target} returned a malformed result: {source}")]
    MalformedResult {
        target: String,
        #[source]
        source: DecodeError,
    },
    #[error("sandbox fault: {0}")]
    Sandbox(#[source] SandboxError),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Startup(_) | GatewayError::Config(_) => ErrorKind::Startup,
            GatewayError::NotInitialized | GatewayError::AlreadyInitialized | GatewayError::Disposed => {
                ErrorKind::Lifecycle
            }
            GatewayError::Script { .. } => ErrorKind::Script,
            GatewayError::InvalidTarget(_) | GatewayError::Unresolved { .. } => ErrorKind::Resolution,
            GatewayError::Decode(_) | GatewayError::ArgsNotArray { .. } => ErrorKind::Decode,
            GatewayError::Invocation { .. } => ErrorKind::Invocation,
            GatewayError::Encode(_) | GatewayError::MalformedResult { .. } => ErrorKind::Encode,
            GatewayError::Sandbox(_) => ErrorKind::Sandbox,
        }
    }

    /// Whether this error disposed of an instance.
    ///
    /// A [`GatewayError::Config`] is not fatal: it is raised before any
    /// instance exists.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::Startup(_) | GatewayError::Sandbox(_))
    }
}

/// Host-side handle to one sandboxed engine instance.
pub struct Gateway<S: Sandbox> {
    sandbox: Option<S>,
    state: InstanceState,
}

impl<S: Sandbox> Gateway<S> {
    /// Wraps a freshly created, not yet initialized sandbox.
    pub fn new(sandbox: S) -> Self {
        Gateway {
            sandbox: Some(sandbox),
            state: InstanceState::Uninitialized,
        }
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// The underlying sandbox, until the instance is disposed.
    pub fn sandbox(&self) -> Option<&S> {
        self.sandbox.as_ref()
    }

    /// Runs the engine's one-time startup routine.
    ///
    /// Must be called exactly once, before anything else. On failure the
    /// instance is disposed.
    pub fn initialize(&mut self) -> Result<(), GatewayError> {
        match self.state {
            InstanceState::Uninitialized => {}
            InstanceState::Ready => return Err(GatewayError::AlreadyInitialized),
            InstanceState::Disposed => return Err(GatewayError::Disposed),
        }
        let sandbox = self.sandbox.as_mut().ok_or(GatewayError::Disposed)?;
        match sandbox.initialize() {
            Ok(()) => {
                self.state = InstanceState::Ready;
                debug!("engine instance ready");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "engine startup failed");
                self.dispose();
                Err(GatewayError::Startup(e))
            }
        }
    }

    /// Evaluates `script` in the engine. Definitions it makes are visible to
    /// later calls.
    pub fn execute(&mut self, script: &str) -> Result<(), GatewayError> {
        let status = self.ready()?.exec(script);
        match status.map_err(|e| self.fault(e))? {
            ExecStatus::Completed => Ok(()),
            ExecStatus::Raised(status) => {
                debug!(status, "script raised");
                Err(GatewayError::Script { status })
            }
        }
    }

    /// Calls the function at `target` with MessagePack-encoded positional
    /// arguments, returning the MessagePack-encoded result.
    pub fn call(&mut self, target: &str, args: &[u8]) -> Result<Vec<u8>, GatewayError> {
        self.ready()?;
        let target = CallTarget::parse(target)?;
        self.call_target(&target, args)
    }

    /// [`Gateway::call`] with an already parsed target.
    pub fn call_target(&mut self, target: &CallTarget, args: &[u8]) -> Result<Vec<u8>, GatewayError> {
        self.ready()?;
        check_args(args)?;

        let resolution = self.ready()?.resolve(target);
        let callable = match resolution.map_err(|e| self.fault(e))? {
            Resolution::Found(callable) => callable,
            Resolution::NotFound => {
                debug!(function = %target, "call target not found");
                return Err(GatewayError::Unresolved {
                    target: target.to_string(),
                });
            }
        };

        let invoked = self.ready()?.invoke(&callable, args);
        let result = match invoked.map_err(|e| self.fault(e))? {
            Some(bytes) => bytes,
            None => {
                debug!(function = %target, "call produced no result");
                return Err(GatewayError::Invocation {
                    target: target.to_string(),
                });
            }
        };

        msgpack::validate(&result).map_err(|source| GatewayError::MalformedResult {
            target: target.to_string(),
            source,
        })?;
        debug!(function = %target, args = args.len(), result = result.len(), "call completed");
        Ok(result)
    }

    /// Encodes `args`, calls `target`, and decodes the result.
    pub fn call_values(&mut self, target: &str, args: &[Value]) -> Result<Value, GatewayError> {
        let encoded = msgpack::encode_args(args)?;
        let result = self.call(target, &encoded)?;
        msgpack::decode(&result).map_err(|source| GatewayError::MalformedResult {
            target: target.to_string(),
            source,
        })
    }

    /// Tears the instance down. Later operations fail with
    /// [`GatewayError::Disposed`].
    pub fn dispose(&mut self) {
        if self.sandbox.take().is_some() {
            debug!(from = %self.state, "engine instance disposed");
        }
        self.state = InstanceState::Disposed;
    }

    fn ready(&mut self) -> Result<&mut S, GatewayError> {
        match self.state {
            InstanceState::Uninitialized => Err(GatewayError::NotInitialized),
            InstanceState::Disposed => Err(GatewayError::Disposed),
            InstanceState::Ready => self.sandbox.as_mut().ok_or(GatewayError::Disposed),
        }
    }

    /// Disposes the instance after a host-level fault.
    fn fault(&mut self, err: SandboxError) -> GatewayError {
        warn!(error = %err, "sandbox fault, disposing engine instance");
        self.dispose();
        GatewayError::Sandbox(err)
    }
}

impl Gateway<WasmtimeSandbox> {
    /// Loads the module named by `config` into a new, uninitialized gateway.
    pub fn open(config: &GatewayConfig) -> Result<Self, GatewayError> {
        Self::from_file(config.module_path()?, config)
    }

    /// Loads the module at `path` into a new, uninitialized gateway.
    pub fn from_file(path: impl AsRef<Path>, config: &GatewayConfig) -> Result<Self, GatewayError> {
        let sandbox = WasmtimeSandbox::from_file(path, config).map_err(GatewayError::Startup)?;
        Ok(Gateway::new(sandbox))
    }
}

/// Arguments must be exactly one well-formed value, and that value an array.
/// Only the encoding is checked; no tree is built.
fn check_args(args: &[u8]) -> Result<(), GatewayError> {
    match msgpack::validate(args).map_err(GatewayError::Decode)? {
        "array" => Ok(()),
        kind => Err(GatewayError::ArgsNotArray { kind }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sandbox that echoes its arguments back and records what it was asked.
    #[derive(Default)]
    struct Echo {
        started: u32,
        execs: Vec<String>,
        fail_startup: bool,
    }

    impl Sandbox for Echo {
        type Callable = ();

        fn initialize(&mut self) -> Result<(), SandboxError> {
            self.started += 1;
            if self.fail_startup {
                return Err(SandboxError::MissingExport("_initialize".to_string()));
            }
            Ok(())
        }

        fn exec(&mut self, source: &str) -> Result<ExecStatus, SandboxError> {
            self.execs.push(source.to_string());
            Ok(ExecStatus::Completed)
        }

        fn resolve(&mut self, target: &CallTarget) -> Result<Resolution<()>, SandboxError> {
            Ok(if target.as_str() == "echo" {
                Resolution::Found(())
            } else {
                Resolution::NotFound
            })
        }

        fn invoke(&mut self, _: &(), args: &[u8]) -> Result<Option<Vec<u8>>, SandboxError> {
            Ok(Some(args.to_vec()))
        }
    }

    #[test]
    fn lifecycle() {
        let mut gw = Gateway::new(Echo::default());
        assert_eq!(gw.state(), InstanceState::Uninitialized);
        assert!(matches!(gw.execute("x"), Err(GatewayError::NotInitialized)));
        assert!(matches!(gw.call("echo", &[0x90]), Err(GatewayError::NotInitialized)));
        assert!(gw.sandbox().unwrap().execs.is_empty());

        gw.initialize().unwrap();
        assert_eq!(gw.state(), InstanceState::Ready);
        assert!(matches!(gw.initialize(), Err(GatewayError::AlreadyInitialized)));
        assert_eq!(gw.sandbox().unwrap().started, 1);

        gw.dispose();
        assert_eq!(gw.state(), InstanceState::Disposed);
        assert!(gw.sandbox().is_none());
        assert!(matches!(gw.execute("x"), Err(GatewayError::Disposed)));
        assert!(matches!(gw.initialize(), Err(GatewayError::Disposed)));
    }

    #[test]
    fn failed_startup_disposes() {
        let mut gw = Gateway::new(Echo {
            fail_startup: true,
            ..Echo::default()
        });
        let err = gw.initialize().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Startup);
        assert!(err.is_fatal());
        assert_eq!(gw.state(), InstanceState::Disposed);
        assert!(matches!(gw.initialize(), Err(GatewayError::Disposed)));
    }

    #[test]
    fn call_checks_arguments_before_resolving() {
        let mut gw = Gateway::new(Echo::default());
        gw.initialize().unwrap();

        assert_eq!(gw.call("echo", &[0x91]).unwrap_err().kind(), ErrorKind::Decode);
        assert!(matches!(gw.call("echo", &[0x01]), Err(GatewayError::ArgsNotArray { kind: "int" })));
        assert!(matches!(gw.call("echo", &[]), Err(GatewayError::Decode(DecodeError::Empty))));
        assert!(matches!(gw.call("nope", &[0x90]), Err(GatewayError::Unresolved { .. })));
        assert!(matches!(gw.call("no pe", &[0x90]), Err(GatewayError::InvalidTarget(_))));
        assert_eq!(gw.call("echo", &[0x91, 0x01]).unwrap(), vec![0x91, 0x01]);
        assert_eq!(gw.state(), InstanceState::Ready);
    }

    #[test]
    fn deep_arguments_are_checked_without_decoding() {
        let mut gw = Gateway::new(Echo::default());
        gw.initialize().unwrap();

        let mut args = vec![0x91; 1_000_000];
        args.push(0xc0);
        assert_eq!(gw.call("echo", &args).unwrap().len(), args.len());

        args.pop();
        assert!(matches!(
            gw.call("echo", &args),
            Err(GatewayError::Decode(DecodeError::UnexpectedEof { .. }))
        ));
        assert_eq!(gw.state(), InstanceState::Ready);
    }

    #[test]
    fn call_values_round_trips() {
        let mut gw = Gateway::new(Echo::default());
        gw.initialize().unwrap();
        let result = gw.call_values("echo", &[Value::from("hello"), Value::from(2)]).unwrap();
        assert_eq!(result, Value::Array(vec![Value::from("hello"), Value::Int(2)]));
    }

    #[test]
    fn error_kinds() {
        assert_eq!(GatewayError::Script { status: -1 }.kind(), ErrorKind::Script);
        assert!(!GatewayError::Script { status: -1 }.is_fatal());
        assert!(GatewayError::Sandbox(SandboxError::Exit(1)).is_fatal());
        let config = GatewayError::Config(ConfigError::NoModule);
        assert_eq!(config.kind(), ErrorKind::Startup);
        assert!(!config.is_fatal());
        assert_eq!(GatewayError::NotInitialized.kind(), ErrorKind::Lifecycle);
        assert_eq!(
            GatewayError::Invocation { target: "f".into() }.to_string(),
            "call to f produced no result"
        );
    }
}
