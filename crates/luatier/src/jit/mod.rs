// Per-prototype compilation
// A prototype is compiled on the first call of any closure over it, once per
// prototype identity. The pipeline is pre-scan, lowering, then a backend:
// the threaded backend is always available; with the `jit` feature the
// prototype is also emitted as a Cranelift function. Units are shared by
// every closure and, through `Arc<CodeCache>`, by every VM holding the cache.

mod lower;
#[cfg(feature = "jit")]
mod native;
#[cfg(feature = "jit")]
mod runtime;
mod threaded;

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use ahash::AHashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

pub use lower::{LoweredOp, LoweredProto, lower};

use crate::lua_value::{LuaClosure, ProtoId, Prototype};
use crate::lua_vm::{JitMode, LuaError, LuaResult, LuaVM};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JitError {
    #[error("malformed prototype at pc {pc}: {reason}")]
    Malformed { pc: usize, reason: String },
    #[error("unsupported {op} at pc {pc}")]
    Unsupported { pc: usize, op: String },
    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Threaded,
    Native,
}

/// Executable form of one prototype.
pub struct CompiledUnit {
    pub(crate) proto_id: ProtoId,
    pub(crate) lowered: LoweredProto,
    #[cfg(feature = "jit")]
    pub(crate) native: Option<native::NativeCode>,
}

impl CompiledUnit {
    pub fn proto_id(&self) -> ProtoId {
        self.proto_id
    }

    pub fn lowered(&self) -> &LoweredProto {
        &self.lowered
    }

    pub fn backend(&self) -> Backend {
        if self.is_native() {
            Backend::Native
        } else {
            Backend::Threaded
        }
    }

    #[cfg(feature = "jit")]
    fn is_native(&self) -> bool {
        self.native.is_some()
    }

    #[cfg(not(feature = "jit"))]
    fn is_native(&self) -> bool {
        false
    }
}

impl std::fmt::Debug for CompiledUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledUnit")
            .field("proto", &self.proto_id)
            .field("ops", &self.lowered.len())
            .field("backend", &self.backend())
            .finish()
    }
}

/// Compilation counters of a code cache.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JitStats {
    /// Units compiled successfully
    pub compiled: u64,
    /// Prototypes whose compilation failed
    pub failed: u64,
    /// Lookups answered by an existing unit or cached failure
    pub cache_hits: u64,
    /// Units carrying native code
    pub native_units: u64,
}

type UnitSlot = Arc<OnceLock<Result<Arc<CompiledUnit>, JitError>>>;

/// Compiled units keyed by prototype identity.
///
/// Concurrent requests for one prototype block on a single compilation; the
/// outcome, success or failure, is kept for the lifetime of the cache.
pub struct CodeCache {
    units: Mutex<AHashMap<ProtoId, UnitSlot>>,
    compiled: AtomicU64,
    failed: AtomicU64,
    cache_hits: AtomicU64,
    native_units: AtomicU64,
    #[cfg(feature = "jit")]
    native: OnceLock<Result<Arc<native::NativeCompiler>, JitError>>,
}

impl Default for CodeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeCache {
    pub fn new() -> Self {
        CodeCache {
            units: Mutex::new(AHashMap::new()),
            compiled: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            native_units: AtomicU64::new(0),
            #[cfg(feature = "jit")]
            native: OnceLock::new(),
        }
    }

    pub fn stats(&self) -> JitStats {
        JitStats {
            compiled: self.compiled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            native_units: self.native_units.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.units.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.lock().is_empty()
    }

    /// Cached outcome for `id`, if that prototype was ever compiled.
    pub fn lookup(&self, id: ProtoId) -> Option<Result<Arc<CompiledUnit>, JitError>> {
        let slot = self.units.lock().get(&id).cloned()?;
        slot.get().cloned()
    }

    /// Unit for `proto`, compiling it (and its nested prototypes) on first
    /// request.
    pub fn get_or_compile(&self, proto: &Arc<Prototype>) -> Result<Arc<CompiledUnit>, JitError> {
        let slot = self
            .units
            .lock()
            .entry(proto.id())
            .or_insert_with(|| Arc::new(OnceLock::new()))
            .clone();

        let mut compiled_here = false;
        let result = slot.get_or_init(|| {
            compiled_here = true;
            let result = self.compile(proto);
            match &result {
                Ok(unit) => {
                    self.compiled.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        proto = %unit.proto_id,
                        ops = unit.lowered.len(),
                        backend = ?unit.backend(),
                        "compiled prototype"
                    );
                }
                Err(err) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(proto = %proto.id(), error = %err, "compilation failed");
                }
            }
            result
        });
        if !compiled_here {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        result.clone()
    }

    fn compile(&self, proto: &Arc<Prototype>) -> Result<Arc<CompiledUnit>, JitError> {
        let lowered = lower(proto)?;
        for child in &proto.protos {
            self.get_or_compile(child)?;
        }

        #[cfg(feature = "jit")]
        let native = {
            let compiler = self
                .native
                .get_or_init(|| native::NativeCompiler::new().map(Arc::new))
                .clone()?;
            let code = compiler.compile(proto.id(), &lowered)?;
            self.native_units.fetch_add(1, Ordering::Relaxed);
            Some(code)
        };

        Ok(Arc::new(CompiledUnit {
            proto_id: proto.id(),
            lowered,
            #[cfg(feature = "jit")]
            native,
        }))
    }
}

impl LuaVM {
    /// Compiled unit to run `cl` with, per the configured `JitMode`.
    pub(crate) fn tier_up(&self, cl: &Rc<LuaClosure>) -> LuaResult<Option<Arc<CompiledUnit>>> {
        let mode = self.option.jit;
        if mode == JitMode::Off {
            return Ok(None);
        }
        let result = cl
            .unit
            .get_or_init(|| self.code_cache.get_or_compile(&cl.proto));
        match result {
            Ok(unit) => Ok(Some(unit.clone())),
            Err(err) if mode == JitMode::Strict => Err(LuaError::Compile(err.clone())),
            Err(_) => Ok(None),
        }
    }
}

/// Run the top frame with its compiled unit until the frame changes.
#[cfg(feature = "jit")]
pub(crate) fn run_unit(vm: &mut LuaVM, unit: &CompiledUnit) -> LuaResult<()> {
    match &unit.native {
        Some(code) => native::run(vm, unit, code),
        None => threaded::run(vm, unit),
    }
}

#[cfg(not(feature = "jit"))]
pub(crate) fn run_unit(vm: &mut LuaVM, unit: &CompiledUnit) -> LuaResult<()> {
    threaded::run(vm, unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua_value::ProtoBuilder;
    use crate::lua_vm::OpCode;

    fn returns_nothing() -> Arc<Prototype> {
        let mut b = ProtoBuilder::main("=cache");
        b.abc(OpCode::Return, 0, 1, 0);
        b.build()
    }

    #[test]
    fn compiles_once_per_prototype() {
        let cache = CodeCache::new();
        let proto = returns_nothing();
        let first = cache.get_or_compile(&proto).unwrap();
        let second = cache.get_or_compile(&proto).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        let stats = cache.stats();
        assert_eq!(stats.compiled, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn child_failure_fails_parent_and_is_cached() {
        let mut bad = ProtoBuilder::new("=cache");
        bad.asbx(OpCode::Jmp, 0, 40);
        bad.abc(OpCode::Return, 0, 1, 0);

        let mut b = ProtoBuilder::main("=cache");
        b.child(bad.build());
        b.abc(OpCode::Return, 0, 1, 0);
        let proto = b.build();

        let cache = CodeCache::new();
        assert!(matches!(
            cache.get_or_compile(&proto),
            Err(JitError::Malformed { .. })
        ));
        assert!(cache.get_or_compile(&proto).is_err());
        let stats = cache.stats();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.compiled, 0);
        assert_eq!(stats.cache_hits, 1);
    }

    #[test]
    fn cache_is_shared_across_threads() {
        let cache = Arc::new(CodeCache::new());
        let proto = returns_nothing();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let proto = proto.clone();
                std::thread::spawn(move || cache.get_or_compile(&proto).map(|u| u.proto_id()))
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), Ok(proto.id()));
        }
        let stats = cache.stats();
        assert_eq!(stats.compiled, 1);
        assert_eq!(stats.cache_hits, 3);
    }
}
