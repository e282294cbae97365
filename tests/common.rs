//! Common test utilities shared between integration tests
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};

use udf_gateway::msgpack::{self, Value};
use udf_gateway::sandbox::{ExecStatus, Sandbox, SandboxError};
use udf_gateway::{CallTarget, Resolution};

/// A host function standing in for a script-defined one. `None` plays the
/// part of a thrown exception.
pub type HostFn = fn(&[Value]) -> Option<Value>;

#[derive(Clone, Copy)]
pub enum Global {
    Function(HostFn),
    /// Calling it traps the engine.
    Trap,
}

/// In-process sandbox with a scripted global scope.
///
/// Scripts are not interpreted: each known source text maps to the
/// definitions it makes. Unknown scripts raise, and the source `exit` makes
/// the guest exit.
#[derive(Default)]
pub struct ScriptedSandbox {
    pub initialized: bool,
    pub globals: BTreeMap<String, Global>,
    pub scripts: HashMap<String, Vec<(String, Global)>>,
    pub execs: Vec<String>,
    pub invocations: Vec<(String, Vec<u8>)>,
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a script that defines `path` when executed.
    pub fn script(mut self, source: &str, path: &str, global: Global) -> Self {
        self.scripts
            .entry(source.to_string())
            .or_default()
            .push((path.to_string(), global));
        self
    }
}

impl Sandbox for ScriptedSandbox {
    type Callable = String;

    fn initialize(&mut self) -> Result<(), SandboxError> {
        assert!(!self.initialized, "initialize called twice");
        self.initialized = true;
        self.globals.insert("main.sqrt".to_string(), Global::Function(sqrt));
        Ok(())
    }

    fn exec(&mut self, source: &str) -> Result<ExecStatus, SandboxError> {
        assert!(self.initialized, "exec before initialize");
        self.execs.push(source.to_string());
        if source == "exit" {
            return Err(SandboxError::Exit(1));
        }
        match self.scripts.get(source) {
            Some(defs) => {
                for (path, global) in defs {
                    self.globals.insert(path.clone(), *global);
                }
                Ok(ExecStatus::Completed)
            }
            None => Ok(ExecStatus::Raised(-1)),
        }
    }

    fn resolve(&mut self, target: &CallTarget) -> Result<Resolution<String>, SandboxError> {
        assert!(self.initialized, "resolve before initialize");
        Ok(match self.globals.contains_key(target.as_str()) {
            true => Resolution::Found(target.as_str().to_string()),
            false => Resolution::NotFound,
        })
    }

    fn invoke(&mut self, path: &String, args: &[u8]) -> Result<Option<Vec<u8>>, SandboxError> {
        assert!(self.initialized, "invoke before initialize");
        self.invocations.push((path.clone(), args.to_vec()));
        let Some(args) = msgpack::decode(args).ok().and_then(Value::into_array) else {
            return Ok(None);
        };
        match self.globals.get(path) {
            Some(Global::Function(f)) => Ok(f(&args).map(|v| msgpack::encode(&v).expect("encodable result"))),
            Some(Global::Trap) => Err(SandboxError::Trap {
                export: "call".to_string(),
                message: "wasm trap: wasm `unreachable` instruction executed".to_string(),
            }),
            None => Ok(None),
        }
    }
}

/// `x => x`
pub fn identity(args: &[Value]) -> Option<Value> {
    args.first().cloned()
}

/// Throws unless given a number.
pub fn sqrt(args: &[Value]) -> Option<Value> {
    args.first().and_then(Value::as_f64).map(|x| Value::F64(x.sqrt()))
}

/// Always throws.
pub fn throws(_: &[Value]) -> Option<Value> {
    None
}

/// A module source for `wasmtime::Module::new`; wasmtime accepts the text
/// format directly.
pub fn read_fixture(name: &str) -> String {
    let path = format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"));
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("failed to read {path}: {e}"))
}
