//! WebAssembly guests.
//!
//! A guest is a core wasm module with this ABI:
//!
//! | export                           | purpose                              |
//! |----------------------------------|--------------------------------------|
//! | `memory`                         | linear memory                        |
//! | `weft_alloc(len: i32) -> i32`    | buffer for an incoming message       |
//! | `weft_on_message(ptr, len)`      | handle one JSON [`HostMessage`]      |
//!
//! | import              | purpose                                       |
//! |---------------------|-----------------------------------------------|
//! | `weft.post(ptr,len)`| send one JSON [`GuestMessage`] to the host    |
//! | `weft.log(ptr,len)` | debug log line (UTF-8)                        |
//!
//! Each guest runs in its own `wasmtime::Store` with a memory ceiling and a
//! fresh fuel budget per call.
//!
//! [`HostMessage`]: crate::HostMessage
//! [`GuestMessage`]: crate::GuestMessage

use crate::error::SandboxError;
use crate::guest::{GuestApi, GuestFactory, GuestFault, GuestLoader, WidgetGuest};
use crate::limits::{GuestMemoryLimiter, SandboxLimits};
use crate::protocol::HostMessage;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use wasmtime::{Caller, Engine, Instance, Linker, Memory, Module, Store, Trap, TypedFunc};
use weft_types::{WidgetId, WidgetManifest};

/// Shared engine plus a compiled-module cache keyed by SHA-256 of the
/// module bytes.
pub struct WasmEngine {
    engine: Engine,
    modules: Mutex<HashMap<String, Module>>,
}

impl WasmEngine {
    pub fn new() -> Result<Self, SandboxError> {
        let mut config = wasmtime::Config::new();
        config.consume_fuel(true);
        let engine = Engine::new(&config)?;
        Ok(Self {
            engine,
            modules: Mutex::new(HashMap::new()),
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Compiles module bytes (binary or WAT text), reusing a cached module
    /// when the same bytes were compiled before.
    pub fn compile(&self, bytes: &[u8]) -> Result<Module, SandboxError> {
        let hash = hex::encode(Sha256::digest(bytes));
        if let Some(module) = self
            .modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&hash)
        {
            debug!(hash = %hash, "Using cached wasm module");
            return Ok(module.clone());
        }

        let module = Module::new(&self.engine, bytes)?;
        info!(hash = %hash, "Compiled wasm module");
        self.modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(hash, module.clone());
        Ok(module)
    }

    pub fn cached_modules(&self) -> usize {
        self.modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Loads guest modules from a directory of compiled entries, or from
/// generated code supplied with the sandbox config.
pub struct WasmGuestLoader {
    engine: Arc<WasmEngine>,
    module_root: Option<PathBuf>,
}

impl WasmGuestLoader {
    pub fn new(engine: Arc<WasmEngine>, module_root: Option<PathBuf>) -> Self {
        Self {
            engine,
            module_root,
        }
    }

    fn read_entry(&self, manifest: &WidgetManifest) -> Result<Vec<u8>, SandboxError> {
        let load_error = |message: String| SandboxError::GuestLoad {
            def_id: manifest.id.clone(),
            message,
        };
        let entry = manifest
            .entry
            .as_deref()
            .ok_or_else(|| load_error("manifest has no entry".into()))?;
        let root = self
            .module_root
            .as_deref()
            .ok_or_else(|| load_error("no module root configured".into()))?;
        let relative = Path::new(entry);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(load_error(format!("entry '{entry}' escapes the module root")));
        }
        let path = root.join(relative);
        std::fs::read(&path).map_err(|e| load_error(format!("failed to read {}: {e}", path.display())))
    }
}

impl GuestLoader for WasmGuestLoader {
    fn prepare(
        &self,
        manifest: &WidgetManifest,
        generated_code: Option<&str>,
        limits: &SandboxLimits,
    ) -> Result<Box<dyn GuestFactory>, SandboxError> {
        let bytes = match generated_code {
            Some(code) => code.as_bytes().to_vec(),
            None => self.read_entry(manifest)?,
        };
        let module = self.engine.compile(&bytes)?;
        Ok(Box::new(WasmGuestFactory {
            engine: self.engine.engine().clone(),
            module,
            limits: limits.clone(),
        }))
    }
}

struct WasmGuestFactory {
    engine: Engine,
    module: Module,
    limits: SandboxLimits,
}

impl GuestFactory for WasmGuestFactory {
    fn instantiate(self: Box<Self>, widget_id: &WidgetId) -> Result<Box<dyn WidgetGuest>, GuestFault> {
        let guest = WasmGuest::instantiate(&self.engine, &self.module, widget_id, &self.limits)?;
        Ok(Box::new(guest))
    }
}

/// State stored in each guest's `wasmtime::Store`.
struct GuestState {
    widget_id: WidgetId,
    max_payload_bytes: usize,
    /// Raw messages posted during the current call.
    outbox: Vec<Vec<u8>>,
    logs: Vec<String>,
    limiter: GuestMemoryLimiter,
}

/// A running wasm guest.
pub struct WasmGuest {
    store: Store<GuestState>,
    memory: Memory,
    alloc: TypedFunc<i32, i32>,
    on_message: TypedFunc<(i32, i32), ()>,
    fuel_per_call: u64,
}

impl WasmGuest {
    pub fn instantiate(
        engine: &Engine,
        module: &Module,
        widget_id: &WidgetId,
        limits: &SandboxLimits,
    ) -> Result<Self, GuestFault> {
        let state = GuestState {
            widget_id: widget_id.clone(),
            max_payload_bytes: limits.payload.max_bytes,
            outbox: Vec::new(),
            logs: Vec::new(),
            limiter: GuestMemoryLimiter::new(limits.max_memory_bytes),
        };
        let mut store = Store::new(engine, state);
        store.limiter(|s| &mut s.limiter);
        store.set_fuel(limits.fuel_per_call).ok();

        let mut linker: Linker<GuestState> = Linker::new(engine);
        linker
            .func_wrap("weft", "post", |mut caller: Caller<'_, GuestState>, ptr: i32, len: i32| {
                if let Some(bytes) = read_guest_bytes(&mut caller, ptr, len) {
                    caller.data_mut().outbox.push(bytes);
                }
            })
            .map_err(|e| GuestFault::Instantiate(e.to_string()))?;
        linker
            .func_wrap("weft", "log", |mut caller: Caller<'_, GuestState>, ptr: i32, len: i32| {
                if let Some(bytes) = read_guest_bytes(&mut caller, ptr, len) {
                    let line = String::from_utf8_lossy(&bytes).into_owned();
                    caller.data_mut().logs.push(line);
                }
            })
            .map_err(|e| GuestFault::Instantiate(e.to_string()))?;

        let instance: Instance = linker
            .instantiate(&mut store, module)
            .map_err(classify)?;
        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| GuestFault::Instantiate("module does not export memory".into()))?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, "weft_alloc")
            .map_err(|e| GuestFault::Instantiate(format!("weft_alloc: {e}")))?;
        let on_message = instance
            .get_typed_func::<(i32, i32), ()>(&mut store, "weft_on_message")
            .map_err(|e| GuestFault::Instantiate(format!("weft_on_message: {e}")))?;

        info!(widget_id = %widget_id, "Wasm guest instantiated");
        Ok(Self {
            store,
            memory,
            alloc,
            on_message,
            fuel_per_call: limits.fuel_per_call,
        })
    }

    pub fn memory_used_bytes(&self) -> usize {
        self.store.data().limiter.current_memory_bytes()
    }

    fn call(&mut self, bytes: &[u8]) -> Result<(), GuestFault> {
        let len = i32::try_from(bytes.len())
            .map_err(|_| GuestFault::Protocol("message too large for guest".into()))?;

        self.store.set_fuel(self.fuel_per_call).ok();
        let ptr = self.alloc.call(&mut self.store, len).map_err(classify)?;
        let offset = usize::try_from(ptr)
            .map_err(|_| GuestFault::Protocol(format!("weft_alloc returned {ptr}")))?;
        self.memory
            .write(&mut self.store, offset, bytes)
            .map_err(|e| GuestFault::Protocol(format!("weft_alloc returned unusable buffer: {e}")))?;

        self.store.set_fuel(self.fuel_per_call).ok();
        let result = self.on_message.call(&mut self.store, (ptr, len));
        self.track_fuel_consumption();
        result.map_err(classify)
    }

    fn track_fuel_consumption(&self) {
        match self.store.get_fuel() {
            Ok(remaining) => debug!(
                widget_id = %self.store.data().widget_id,
                budget = self.fuel_per_call,
                consumed = self.fuel_per_call.saturating_sub(remaining),
                "Fuel consumption tracked"
            ),
            Err(e) => warn!(
                widget_id = %self.store.data().widget_id,
                error = %e,
                "Failed to get fuel remaining"
            ),
        }
    }
}

impl WidgetGuest for WasmGuest {
    fn on_message(&mut self, message: &HostMessage, api: &mut GuestApi) -> Result<(), GuestFault> {
        let bytes = serde_json::to_vec(message).map_err(|e| GuestFault::Protocol(e.to_string()))?;
        let result = self.call(&bytes);

        // Messages posted before a fault are still delivered.
        let state = self.store.data_mut();
        let outbox = std::mem::take(&mut state.outbox);
        let logs = std::mem::take(&mut state.logs);
        for line in logs {
            if let Err(e) = api.debug_log(&line) {
                debug!(widget_id = %api.widget_id(), error = %e, "Guest log dropped");
            }
        }
        for raw in outbox {
            api.accept_raw(&raw);
        }
        result
    }
}

/// Copies `len` bytes at `ptr` out of the caller's memory. Out-of-range or
/// oversized requests are dropped with a warning.
fn read_guest_bytes(caller: &mut Caller<'_, GuestState>, ptr: i32, len: i32) -> Option<Vec<u8>> {
    let widget_id = caller.data().widget_id.clone();
    let (Ok(start), Ok(len)) = (usize::try_from(ptr), usize::try_from(len)) else {
        warn!(widget_id = %widget_id, ptr, len, "Guest passed a negative pointer or length");
        return None;
    };
    if len > caller.data().max_payload_bytes {
        warn!(widget_id = %widget_id, len, "Dropping oversized guest message");
        return None;
    }
    let memory = caller.get_export("memory").and_then(|e| e.into_memory())?;
    let data = memory.data(&*caller);
    match start.checked_add(len).and_then(|end| data.get(start..end)) {
        Some(slice) => Some(slice.to_vec()),
        None => {
            warn!(widget_id = %widget_id, ptr = start, len, "Guest message out of bounds");
            None
        }
    }
}

fn classify(err: wasmtime::Error) -> GuestFault {
    match err.downcast_ref::<Trap>() {
        Some(Trap::OutOfFuel) => GuestFault::OutOfFuel,
        Some(trap) => GuestFault::Trap(trap.to_string()),
        None => GuestFault::Trap(err.to_string()),
    }
}
