//! wasmtime-backed sandbox
//!
//! The module is compiled and instantiated once, with WASI preview1 linked
//! in and configured from [`WasiConfig`]. Each sandbox owns its own store,
//! so instances never share memory or globals.

use std::path::Path;

use tracing::{debug, trace};
use wasmtime::{Engine, Func, Instance, Linker, Memory, Module, Store, Trap, TypedFunc, WasmParams, WasmResults};
use wasmtime_wasi::preview1::{self, WasiP1Ctx};
use wasmtime_wasi::{DirPerms, FilePerms, I32Exit, WasiCtxBuilder};

use super::abi::{GuestAbi, GuestSlice};
use super::{ExecStatus, Sandbox, SandboxError};
use crate::config::{GatewayConfig, WasiConfig};
use crate::target::{CallTarget, Resolution};

/// Typed handles to the guest's exports.
struct Exports {
    initialize: TypedFunc<(), ()>,
    exec: TypedFunc<(i32, i32), i32>,
    call: TypedFunc<(i32, i32, i32, i32), i32>,
    realloc: TypedFunc<(i32, i32, i32, i32), i32>,
    free: Option<TypedFunc<(i32, i32, i32), ()>>,
    post_call: Option<TypedFunc<i32, ()>>,
}

/// A UDF module instantiated under wasmtime.
pub struct WasmtimeSandbox {
    store: Store<WasiP1Ctx>,
    memory: Memory,
    exports: Exports,
    abi: GuestAbi,
    probe_targets: bool,
}

impl WasmtimeSandbox {
    /// Loads and instantiates the module at `path`.
    pub fn from_file(path: impl AsRef<Path>, config: &GatewayConfig) -> Result<Self, SandboxError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| SandboxError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(module = %path.display(), size = bytes.len(), "loading UDF module");
        Self::from_bytes(&bytes, config)
    }

    /// Instantiates a module from its binary (or WAT text) form.
    pub fn from_bytes(bytes: &[u8], config: &GatewayConfig) -> Result<Self, SandboxError> {
        let engine = Engine::default();
        let module = Module::new(&engine, bytes).map_err(|e| SandboxError::Compile(format!("{e:#}")))?;

        let mut linker: Linker<WasiP1Ctx> = Linker::new(&engine);
        preview1::add_to_linker_sync(&mut linker, |cx: &mut WasiP1Ctx| cx)
            .map_err(|e| SandboxError::Wasi(format!("{e:#}")))?;

        let mut store = Store::new(&engine, build_wasi(&config.wasi)?);
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| SandboxError::Instantiate(format!("{e:#}")))?;

        let abi = config.abi.clone();
        let memory = instance
            .get_memory(&mut store, &abi.memory)
            .ok_or_else(|| SandboxError::MissingExport(abi.memory.clone()))?;
        let exports = Exports::lookup(&instance, &mut store, &abi)?;

        Ok(WasmtimeSandbox {
            store,
            memory,
            exports,
            abi,
            probe_targets: config.probe_targets,
        })
    }

    /// Copies `bytes` into freshly allocated guest memory.
    fn write_guest(&mut self, bytes: &[u8]) -> Result<GuestSlice, SandboxError> {
        if bytes.is_empty() {
            return Ok(GuestSlice::EMPTY);
        }
        let len = i32::try_from(bytes.len()).map_err(|_| SandboxError::TooLarge { len: bytes.len() })?;
        let ptr = self
            .exports
            .realloc
            .call(&mut self.store, (0, 0, 1, len))
            .map_err(|e| guest_fault("realloc", e))?;
        if ptr == 0 {
            return Err(SandboxError::Memory(format!("guest failed to allocate {len} bytes")));
        }
        self.memory
            .write(&mut self.store, ptr as u32 as usize, bytes)
            .map_err(|e| SandboxError::Memory(format!("write of {len} bytes at {ptr:#x}: {e}")))?;
        Ok(GuestSlice::new(ptr as u32, len as u32))
    }

    fn read_guest(&self, slice: GuestSlice) -> Result<Vec<u8>, SandboxError> {
        let data = self.memory.data(&self.store);
        let range = slice.range_in(data.len()).ok_or_else(|| {
            SandboxError::Memory(format!(
                "read of {} bytes at {:#x} is outside {} bytes of memory",
                slice.len,
                slice.ptr,
                data.len()
            ))
        })?;
        Ok(data[range].to_vec())
    }

    /// Reads the result list out of the return area at `ret_ptr`.
    fn read_result(&self, ret_ptr: i32) -> Result<GuestSlice, SandboxError> {
        let area = self.read_guest(GuestSlice::new(ret_ptr as u32, self.abi.return_area_size() as u32))?;
        GuestSlice::from_return_area(&area, &self.abi)
            .ok_or_else(|| SandboxError::Memory(format!("malformed return area at {ret_ptr:#x}")))
    }

    /// Releases the guest's result buffer once it has been copied out.
    fn release_result(&mut self, ret_ptr: i32, result: GuestSlice) -> Result<(), SandboxError> {
        if let Some(post_call) = &self.exports.post_call {
            return post_call
                .call(&mut self.store, ret_ptr)
                .map_err(|e| guest_fault("post_call", e));
        }
        match &self.exports.free {
            Some(free) if !result.is_empty() => {
                let (ptr, len) = result.as_params();
                free.call(&mut self.store, (ptr, len, 1))
                    .map_err(|e| guest_fault("free", e))
            }
            _ => Ok(()),
        }
    }
}

impl Sandbox for WasmtimeSandbox {
    /// The guest re-resolves the path itself, so a found target is its own
    /// handle.
    type Callable = CallTarget;

    fn initialize(&mut self) -> Result<(), SandboxError> {
        self.exports
            .initialize
            .call(&mut self.store, ())
            .map_err(|e| guest_fault(&self.abi.initialize, e))
    }

    fn exec(&mut self, source: &str) -> Result<ExecStatus, SandboxError> {
        let code = self.write_guest(source.as_bytes())?;
        let status = self
            .exports
            .exec
            .call(&mut self.store, code.as_params())
            .map_err(|e| guest_fault(&self.abi.exec, e))?;
        trace!(status, len = source.len(), "exec returned");
        Ok(ExecStatus::from_code(status))
    }

    fn resolve(&mut self, target: &CallTarget) -> Result<Resolution<CallTarget>, SandboxError> {
        if !self.probe_targets {
            return Ok(Resolution::Found(target.clone()));
        }
        let resolution = match self.exec(&target.probe_script())? {
            ExecStatus::Completed => Resolution::Found(target.clone()),
            ExecStatus::Raised(_) => Resolution::NotFound,
        };
        Ok(resolution)
    }

    fn invoke(&mut self, target: &CallTarget, args: &[u8]) -> Result<Option<Vec<u8>>, SandboxError> {
        let name = self.write_guest(target.as_str().as_bytes())?;
        let args = self.write_guest(args)?;
        let (name_ptr, name_len) = name.as_params();
        let (args_ptr, args_len) = args.as_params();

        let ret_ptr = self
            .exports
            .call
            .call(&mut self.store, (name_ptr, name_len, args_ptr, args_len))
            .map_err(|e| guest_fault(&self.abi.call, e))?;

        let result = self.read_result(ret_ptr)?;
        let bytes = if result.is_empty() {
            None
        } else {
            Some(self.read_guest(result)?)
        };
        self.release_result(ret_ptr, result)?;
        trace!(function = %target, len = result.len, "call returned");
        Ok(bytes)
    }
}

impl Exports {
    fn lookup(instance: &Instance, store: &mut Store<WasiP1Ctx>, abi: &GuestAbi) -> Result<Self, SandboxError> {
        let realloc = first_export(instance, store, &abi.realloc)?
            .ok_or_else(|| SandboxError::MissingExport(abi.realloc.join(" or ")))?;

        Ok(Exports {
            initialize: required(instance, store, &abi.initialize)?,
            exec: required(instance, store, &abi.exec)?,
            call: required(instance, store, &abi.call)?,
            realloc,
            free: first_export(instance, store, &abi.free)?,
            post_call: first_export(instance, store, &abi.post_call)?,
        })
    }
}

fn typed<P, R>(func: Func, store: &Store<WasiP1Ctx>, name: &str) -> Result<TypedFunc<P, R>, SandboxError>
where
    P: WasmParams,
    R: WasmResults,
{
    func.typed::<P, R>(store).map_err(|e| SandboxError::ExportSignature {
        name: name.to_string(),
        reason: format!("{e:#}"),
    })
}

fn required<P, R>(instance: &Instance, store: &mut Store<WasiP1Ctx>, name: &str) -> Result<TypedFunc<P, R>, SandboxError>
where
    P: WasmParams,
    R: WasmResults,
{
    let func = instance
        .get_func(&mut *store, name)
        .ok_or_else(|| SandboxError::MissingExport(name.to_string()))?;
    typed(func, store, name)
}

/// The first of `names` that the module exports, if any.
fn first_export<P, R>(
    instance: &Instance,
    store: &mut Store<WasiP1Ctx>,
    names: &[String],
) -> Result<Option<TypedFunc<P, R>>, SandboxError>
where
    P: WasmParams,
    R: WasmResults,
{
    for name in names {
        if let Some(func) = instance.get_func(&mut *store, name) {
            return typed(func, store, name).map(Some);
        }
    }
    Ok(None)
}

fn build_wasi(config: &WasiConfig) -> Result<WasiP1Ctx, SandboxError> {
    let mut builder = WasiCtxBuilder::new();
    if config.inherit_stdin {
        builder.inherit_stdin();
    }
    if config.inherit_stdout {
        builder.inherit_stdout();
    }
    if config.inherit_stderr {
        builder.inherit_stderr();
    }
    for arg in &config.args {
        builder.arg(arg);
    }
    for (key, value) in &config.env {
        builder.env(key, value);
    }
    for preopen in &config.preopens {
        let (dir_perms, file_perms) = if preopen.read_only {
            (DirPerms::READ, FilePerms::READ)
        } else {
            (DirPerms::all(), FilePerms::all())
        };
        builder
            .preopened_dir(&preopen.host, &preopen.guest, dir_perms, file_perms)
            .map_err(|e| SandboxError::Wasi(format!("preopen {} as {}: {e:#}", preopen.host.display(), preopen.guest)))?;
        debug!(host = %preopen.host.display(), guest = %preopen.guest, "preopened directory");
    }
    Ok(builder.build_p1())
}

/// Classifies an error raised while the guest was running.
fn guest_fault(export: &str, err: wasmtime::Error) -> SandboxError {
    if let Some(exit) = err.downcast_ref::<I32Exit>() {
        return SandboxError::Exit(exit.0);
    }
    let message = match err.downcast_ref::<Trap>() {
        Some(trap) => trap.to_string(),
        None => format!("{err:#}"),
    };
    SandboxError::Trap {
        export: export.to_string(),
        message,
    }
}
