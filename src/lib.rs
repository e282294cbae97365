//! Host-side gateway for a QuickJS-in-WebAssembly user-defined-function runtime.
//!
//! udf-gateway loads a compiled UDF module (a script engine built for WASI),
//! instantiates it with the host's stdio, and drives its two entry points:
//! evaluating arbitrary script text, and calling a named function with
//! MessagePack-encoded arguments.
//!
//! # Modules
//!
//! - [`msgpack`] -- The wire format: value model, encoder and decoder.
//! - [`target`] -- Dotted call targets and the resolution result.
//! - [`sandbox`] -- The guest ABI as a trait, and its wasmtime implementation.
//! - [`gateway`] -- Instance lifecycle and the `initialize`/`execute`/`call` operations.
//! - [`config`] -- JSON configuration for the module path, WASI and ABI names.
//!
//! # Example
//!
//! ```no_run
//! use udf_gateway::config::GatewayConfig;
//! use udf_gateway::gateway::Gateway;
//! use udf_gateway::msgpack::Value;
//!
//! let mut config = GatewayConfig::default();
//! config.module = Some("s2-udf-quickjs.wasm".into());
//!
//! let mut gw = Gateway::open(&config)?;
//! gw.initialize()?;
//! gw.execute("globalThis.foo = function(x) { return x; };")?;
//! let out = gw.call_values("foo", &[Value::from("hello")])?;
//! assert_eq!(out, Value::from("hello"));
//! # Ok::<(), udf_gateway::gateway::GatewayError>(())
//! ```
//!
//! # Threading
//!
//! An instance runs one operation at a time to completion; every operation
//! takes `&mut self`. Hosts that need parallelism create one [`Gateway`]
//! per worker. There is no timeout: a script that never returns blocks its
//! caller.
//!
//! [`Gateway`]: gateway::Gateway

pub mod config;
pub mod gateway;
pub mod msgpack;
pub mod sandbox;
pub mod target;

pub use gateway::{Gateway, GatewayError, InstanceState};
pub use msgpack::Value;
pub use target::{CallTarget, Resolution};
