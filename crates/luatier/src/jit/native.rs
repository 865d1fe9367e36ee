// Native backend (Cranelift)
// Each lowered prototype becomes one function `fn(ctx, entry_pc) -> status`
// with a block per pc. The entry block switches on the re-entry pc; every op
// calls its runtime helper and branches on the returned status, so jumps,
// skips and loop back-edges are native branches while the op semantics stay
// in the shared op functions.

use std::sync::Arc;

use ahash::AHashMap;
use cranelift_codegen::Context;
use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{AbiParam, Block, FuncRef, InstBuilder, Signature, UserFuncName, types};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext, Switch};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module, default_libcall_names};
use parking_lot::Mutex;
use tracing::trace;

use super::lower::{LoweredOp, LoweredProto};
use super::runtime::{
    self, NativeContext, STATUS_BAD_ENTRY, STATUS_ERROR, STATUS_FRAME,
};
use super::{CompiledUnit, JitError};
use crate::lua_value::ProtoId;
use crate::lua_vm::execute::Frame;
use crate::lua_vm::{LuaError, LuaResult, LuaVM};

/// Longest prototype handed to Cranelift
const MAX_NATIVE_OPS: usize = 8192;

type NativeFn = unsafe extern "C" fn(*mut NativeContext, i64) -> i64;

fn backend_err(e: impl std::fmt::Display) -> JitError {
    JitError::Backend(e.to_string())
}

struct ModuleState {
    module: JITModule,
    ctx: Context,
    func_ctx: FunctionBuilderContext,
    helpers: AHashMap<&'static str, FuncId>,
    helper_sig: Signature,
    entry_sig: Signature,
    func_counter: usize,
}

// SAFETY: the module is only reached through the compiler's mutex and the
// code it emits is immutable once finalized.
unsafe impl Send for ModuleState {}

/// Cranelift module shared by all units of one code cache.
pub(crate) struct NativeCompiler {
    state: Mutex<ModuleState>,
}

/// Finalized machine code of one unit. Keeps its module alive.
pub(crate) struct NativeCode {
    func: NativeFn,
    _owner: Arc<NativeCompiler>,
}

impl NativeCompiler {
    pub(crate) fn new() -> Result<NativeCompiler, JitError> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("use_colocated_libcalls", "false")
            .map_err(backend_err)?;
        flag_builder.set("is_pic", "false").map_err(backend_err)?;
        flag_builder.set("opt_level", "speed").map_err(backend_err)?;

        let isa_builder = cranelift_native::builder().map_err(backend_err)?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(backend_err)?;

        let mut builder = JITBuilder::with_isa(isa, default_libcall_names());
        for (name, f) in runtime::HELPERS {
            builder.symbol(*name, *f as *const u8);
        }
        let mut module = JITModule::new(builder);

        let ptr = module.target_config().pointer_type();
        let mut helper_sig = module.make_signature();
        helper_sig.params.push(AbiParam::new(ptr)); // ctx
        helper_sig.params.push(AbiParam::new(types::I64)); // pc
        helper_sig.params.push(AbiParam::new(types::I64)); // a
        helper_sig.params.push(AbiParam::new(types::I64)); // b
        helper_sig.params.push(AbiParam::new(types::I64)); // c
        helper_sig.returns.push(AbiParam::new(types::I64));

        let mut entry_sig = module.make_signature();
        entry_sig.params.push(AbiParam::new(ptr)); // ctx
        entry_sig.params.push(AbiParam::new(types::I64)); // entry pc
        entry_sig.returns.push(AbiParam::new(types::I64));

        let mut helpers = AHashMap::new();
        for (name, _) in runtime::HELPERS {
            let id = module
                .declare_function(name, Linkage::Import, &helper_sig)
                .map_err(backend_err)?;
            helpers.insert(*name, id);
        }

        let ctx = module.make_context();
        Ok(NativeCompiler {
            state: Mutex::new(ModuleState {
                module,
                ctx,
                func_ctx: FunctionBuilderContext::new(),
                helpers,
                helper_sig,
                entry_sig,
                func_counter: 0,
            }),
        })
    }

    pub(crate) fn compile(
        self: &Arc<Self>,
        id: ProtoId,
        lowered: &LoweredProto,
    ) -> Result<NativeCode, JitError> {
        if lowered.len() > MAX_NATIVE_OPS {
            return Err(JitError::Unsupported {
                pc: 0,
                op: format!("prototype of {} instructions", lowered.len()),
            });
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let name = format!("lua_proto_{}", state.func_counter);
        state.func_counter += 1;

        let func_id = state
            .module
            .declare_function(&name, Linkage::Local, &state.entry_sig)
            .map_err(backend_err)?;
        state.ctx.func.signature = state.entry_sig.clone();
        state.ctx.func.name = UserFuncName::user(0, func_id.as_u32());

        let built = build_function(state, lowered);
        let defined = built.and_then(|()| {
            state
                .module
                .define_function(func_id, &mut state.ctx)
                .map_err(backend_err)
        });
        state.module.clear_context(&mut state.ctx);
        defined?;
        state.module.finalize_definitions().map_err(backend_err)?;

        let code_ptr = state.module.get_finalized_function(func_id);
        trace!(proto = %id, symbol = %name, "emitted native code");
        // SAFETY: the function was built with `entry_sig`, which matches `NativeFn`.
        let func: NativeFn = unsafe { std::mem::transmute(code_ptr) };
        Ok(NativeCode {
            func,
            _owner: self.clone(),
        })
    }
}

fn build_function(state: &mut ModuleState, lowered: &LoweredProto) -> Result<(), JitError> {
    let n = lowered.len();
    let mut b = FunctionBuilder::new(&mut state.ctx.func, &mut state.func_ctx);

    let entry = b.create_block();
    b.append_block_params_for_function_params(entry);
    let blocks: Vec<Block> = (0..n).map(|_| b.create_block()).collect();
    let err_block = b.create_block();
    let frame_block = b.create_block();
    let bad_block = b.create_block();

    b.switch_to_block(entry);
    let ctx_ptr = b.block_params(entry)[0];
    let entry_pc = b.block_params(entry)[1];
    let mut switch = Switch::new();
    for &pc in lowered.entries.iter() {
        if pc < n {
            switch.set_entry(pc as u128, blocks[pc]);
        }
    }
    switch.emit(&mut b, entry_pc, bad_block);

    for (block, status) in [
        (err_block, STATUS_ERROR),
        (frame_block, STATUS_FRAME),
        (bad_block, STATUS_BAD_ENTRY),
    ] {
        b.switch_to_block(block);
        let v = b.ins().iconst(types::I64, status);
        b.ins().return_(&[v]);
    }

    let block_at = |pc: usize| blocks.get(pc).copied().unwrap_or(bad_block);
    let mut refs: AHashMap<&'static str, FuncRef> = AHashMap::new();

    for (pc, op) in lowered.ops.iter().enumerate() {
        b.switch_to_block(blocks[pc]);
        let next = lowered.fallthrough(pc).map_or(bad_block, block_at);

        let (symbol, [oa, ob, oc]) = match op {
            LoweredOp::Jmp { target } => {
                b.ins().jump(block_at(*target), &[]);
                continue;
            }
            LoweredOp::Data => {
                b.ins().jump(bad_block, &[]);
                continue;
            }
            _ => match runtime::helper_call(op) {
                Some(call) => call,
                None => {
                    return Err(JitError::Unsupported {
                        pc,
                        op: format!("{:?}", op),
                    });
                }
            },
        };

        let fref = match refs.get(symbol) {
            Some(f) => *f,
            None => {
                let Some(&id) = state.helpers.get(symbol) else {
                    return Err(backend_err(format!("missing helper {}", symbol)));
                };
                let f = state.module.declare_func_in_func(id, b.func);
                refs.insert(symbol, f);
                f
            }
        };
        let args = [
            ctx_ptr,
            b.ins().iconst(types::I64, pc as i64),
            b.ins().iconst(types::I64, oa as i64),
            b.ins().iconst(types::I64, ob as i64),
            b.ins().iconst(types::I64, oc as i64),
        ];
        let call = b.ins().call(fref, &args);
        let status = b.inst_results(call)[0];
        let failed = b.ins().icmp_imm(IntCC::SignedLessThan, status, 0);

        match op {
            LoweredOp::LoadBool { skip: true, .. } => {
                b.ins().brif(failed, err_block, &[], block_at(pc + 2), &[]);
            }
            LoweredOp::ForPrep { target, .. } => {
                b.ins().brif(failed, err_block, &[], block_at(*target), &[]);
            }
            LoweredOp::Return { .. } => {
                b.ins().brif(failed, err_block, &[], frame_block, &[]);
            }
            LoweredOp::ForLoop { target, .. } => {
                let ok = b.create_block();
                b.ins().brif(failed, err_block, &[], ok, &[]);
                b.switch_to_block(ok);
                b.ins().brif(status, block_at(*target), &[], next, &[]);
            }
            LoweredOp::Call { .. } | LoweredOp::TailCall { .. } => {
                let ok = b.create_block();
                b.ins().brif(failed, err_block, &[], ok, &[]);
                b.switch_to_block(ok);
                let changed = b.ins().icmp_imm(IntCC::Equal, status, STATUS_FRAME);
                b.ins().brif(changed, frame_block, &[], next, &[]);
            }
            op if op.is_test() => {
                let ok = b.create_block();
                b.ins().brif(failed, err_block, &[], ok, &[]);
                b.switch_to_block(ok);
                b.ins().brif(status, block_at(pc + 2), &[], next, &[]);
            }
            _ => {
                b.ins().brif(failed, err_block, &[], next, &[]);
            }
        }
    }

    b.seal_all_blocks();
    b.finalize();
    Ok(())
}

/// Run the top frame with native code until the frame changes.
pub(crate) fn run(vm: &mut LuaVM, unit: &CompiledUnit, code: &NativeCode) -> LuaResult<()> {
    let (fr, pc) = Frame::top(vm)?;
    if !unit.lowered.is_entry(pc) {
        return Err(LuaError::MalformedBytecode(format!(
            "{} entered at pc {}",
            unit.proto_id, pc
        )));
    }
    let mut ctx = NativeContext {
        vm: vm as *mut LuaVM,
        frame: &fr,
        unit,
        error: None,
    };
    // SAFETY: `ctx` outlives the call and the helpers are its only users.
    let status = unsafe { (code.func)(&mut ctx, pc as i64) };
    match status {
        STATUS_FRAME => Ok(()),
        STATUS_ERROR => Err(ctx.error.take().unwrap_or_else(|| {
            LuaError::MalformedBytecode(format!("{} failed without an error", unit.proto_id))
        })),
        other => Err(LuaError::MalformedBytecode(format!(
            "{} left native code with status {}",
            unit.proto_id, other
        ))),
    }
}
