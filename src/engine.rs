//! Host-facing runtime API: compile, instantiate, call, close.
//!
//! A `Runtime` owns the machine backend and registered host modules. A
//! `CompiledModule` holds a published, immutable code segment shared by all
//! of its instances. Each `Instance` owns its module context, memory,
//! tables, and globals; closing an instance marks it and poisons in-flight
//! invocations' stack limits, and the segment mapping is released when the
//! last reference drops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::{Config, ModuleConfig};
use crate::errors::{CompileError, RuntimeError, TrapKind};
use crate::exec::code::{CodeSegment, ExecutableCode};
use crate::exec::context::{
    ExecContext, ExitCode, FunctionDescriptor, ModuleContextLayout, STACK_LIMIT_POISON,
};
use crate::exec::memory::{GuestStack, LinearMemory};
use crate::frontend::{
    Builtin, CompileCtx, NUM_BUILTINS, builtin_types, signature_of, translate_function,
};
use crate::ssa::opt::Pipeline;
use crate::ssa::verify::verify_function;
use crate::targets::arm64::Arm64Machine;
use crate::targets::Machine;
use crate::wasm::{ConstExpr, ExternKind, FuncType, ImportDesc, Limits, Module, decode_module};

// ── Host call plumbing ───────────────────────────────────────────────────

/// Per-invocation state. The execution context must stay the first field:
/// generated code holds a pointer to it and the dispatcher recovers the
/// containing state by casting back.
#[repr(C)]
struct InvocationState {
    ctx: ExecContext,
    host_error: Option<RuntimeError>,
    instance: *const InstanceInner,
}

/// Environment handed to host callbacks. Builtins use it to reach the
/// calling instance; user functions normally ignore it.
pub struct HostCallEnv<'a> {
    state: &'a mut InvocationState,
}

impl<'a> HostCallEnv<'a> {
    fn instance(&self) -> Option<&InstanceInner> {
        if self.state.instance.is_null() {
            None
        } else {
            Some(unsafe { &*self.state.instance })
        }
    }

    /// Records a trap to be re-raised by the pending-trap check in the
    /// caller's generated code.
    pub fn trap(&mut self, code: ExitCode) {
        self.state.ctx.exit_code = code as u64;
    }
}

type HostFn = Box<dyn Fn(&mut HostCallEnv<'_>, &mut [u64]) -> Result<(), RuntimeError> + Send + Sync>;

struct HostFuncDef {
    name: String,
    ty: FuncType,
    /// u64 slots in the shared buffer: max of params and results.
    slots: usize,
    callback: HostFn,
}

fn slot_count(ty: &FuncType) -> usize {
    let params: usize = ty.params.iter().map(|ty| ty.slot_count()).sum();
    let results: usize = ty.results.iter().map(|ty| ty.slot_count()).sum();
    params.max(results)
}

/// The runtime dispatcher generated host stubs call into. `host_ctx` is the
/// host module's context buffer; its first word points at the function
/// table.
unsafe extern "C" fn host_dispatcher(exec: *mut ExecContext, host_ctx: *mut u8) {
    let funcs = &*((host_ctx as *const u64).read() as *const Vec<HostFuncDef>);
    let state_ptr = exec as *mut InvocationState;
    let index = (*state_ptr).ctx.host_call_index as usize;
    let Some(func) = funcs.get(index) else {
        (*state_ptr).host_error = Some(RuntimeError::Host(format!(
            "host function index {index} out of range"
        )));
        (*state_ptr).ctx.exit_code = ExitCode::HostCall as u64;
        return;
    };
    let buffer = std::slice::from_raw_parts_mut(
        (*state_ptr).ctx.host_call_buffer as *mut u64,
        func.slots.max(1),
    );
    let outcome = {
        let mut env = HostCallEnv {
            state: &mut *state_ptr,
        };
        (func.callback)(&mut env, buffer)
    };
    if let Err(error) = outcome {
        (*state_ptr).host_error = Some(error);
        (*state_ptr).ctx.exit_code = ExitCode::HostCall as u64;
    }
}

struct HostModule {
    name: String,
    funcs: Arc<Vec<HostFuncDef>>,
    stub_offsets: Vec<usize>,
    executable: Arc<ExecutableCode>,
    /// Context buffer: `[funcs ptr, 0, 0, dispatcher ptr]`.
    ctx: Box<[u64; 4]>,
}

impl HostModule {
    fn ctx_ptr(&self) -> u64 {
        self.ctx.as_ptr() as u64
    }

    fn func_index(&self, name: &str) -> Option<usize> {
        self.funcs.iter().position(|func| func.name == name)
    }
}

/// Builder for a named collection of host functions.
pub struct HostModuleBuilder {
    runtime: Runtime,
    name: String,
    funcs: Vec<HostFuncDef>,
}

impl HostModuleBuilder {
    /// Adds a function. The callback reads its arguments from the slice
    /// (one `u64` per scalar) and writes results back into the same slice.
    pub fn func(
        mut self,
        name: impl Into<String>,
        ty: FuncType,
        callback: impl Fn(&mut [u64]) -> Result<(), RuntimeError> + Send + Sync + 'static,
    ) -> Self {
        let slots = slot_count(&ty);
        self.funcs.push(HostFuncDef {
            name: name.into(),
            ty,
            slots,
            callback: Box::new(move |_env, buffer| callback(buffer)),
        });
        self
    }

    /// Compiles the host-call stubs and registers the module.
    pub fn register(self) -> Result<(), RuntimeError> {
        let module = self.runtime.inner.build_host_module(self.name, self.funcs)?;
        self.runtime
            .inner
            .host_modules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(module.name.clone(), Arc::new(module));
        Ok(())
    }
}

// ── Runtime ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    config: Config,
    machine: Arm64Machine,
    host_modules: Mutex<HashMap<String, Arc<HostModule>>>,
    builtins: Mutex<Option<Arc<HostModule>>>,
}

impl Runtime {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                machine: Arm64Machine::new(),
                host_modules: Mutex::new(HashMap::new()),
                builtins: Mutex::new(None),
            }),
        }
    }

    pub fn host_module(&self, name: impl Into<String>) -> HostModuleBuilder {
        HostModuleBuilder {
            runtime: self.clone(),
            name: name.into(),
            funcs: Vec::new(),
        }
    }

    /// Compiles a Wasm binary into a published code segment.
    pub fn compile(&self, bytes: &[u8]) -> Result<CompiledModule, CompileError> {
        let module = decode_module(bytes)?;
        let layout = ModuleContextLayout::compute(
            module
                .imported_global_types()
                .map(|ty| ty.val_type)
                .chain(module.globals.iter().map(|global| global.ty.val_type)),
        );

        let mut sigs: Vec<_> = module.types.iter().map(signature_of).collect();
        for ty in builtin_types() {
            sigs.push(signature_of(&ty));
        }

        let ctx = CompileCtx {
            module: &module,
            layout: &layout,
            sigs: &sigs,
        };

        let mut pipeline = Pipeline::new();
        let mut segment = CodeSegment::new();
        let mut func_offsets = Vec::with_capacity(module.func_type_indices.len());
        let mut pending_fixups: Vec<(usize, u32, u32)> = Vec::new();

        for local in 0..module.func_type_indices.len() as u32 {
            let mut func = translate_function(&ctx, local)?;
            pipeline.run(&mut func);
            if self.inner.config.verify_ssa {
                verify_function(&func)
                    .map_err(|error| CompileError::bug(error.to_string()))?;
            }
            let code = self
                .inner
                .machine
                .compile_function(&func, &sigs, &self.inner.config)?;
            let offset = segment.append(&code.bytes);
            for (at, callee) in &code.call_fixups {
                pending_fixups.push((offset, *at, *callee));
            }
            func_offsets.push(offset);
        }

        // Preambles for every signature reachable from the host.
        let mut preambles: HashMap<u32, usize> = HashMap::new();
        let mut wanted: Vec<u32> = module
            .exports
            .values()
            .filter_map(|kind| match kind {
                ExternKind::Func(index) => module.func_type_index(*index),
                _ => None,
            })
            .collect();
        if let Some(start) = module.start {
            if let Some(type_index) = module.func_type_index(start) {
                wanted.push(type_index);
            }
        }
        wanted.sort_unstable();
        wanted.dedup();
        for type_index in wanted {
            let code = self
                .inner
                .machine
                .build_entry_preamble(&sigs[type_index as usize])?;
            preambles.insert(type_index, segment.append(&code.bytes));
        }

        // Resolve module-local direct calls.
        let num_imported = module.num_imported_funcs();
        for (func_offset, at, callee) in pending_fixups {
            let local = callee
                .checked_sub(num_imported)
                .ok_or_else(|| CompileError::bug("direct call to imported function".to_string()))?;
            let callee_offset = *func_offsets
                .get(local as usize)
                .ok_or_else(|| CompileError::bug(format!("call to unknown function {callee}")))?;
            let from = func_offset + at as usize;
            let disp = callee_offset as i64 - from as i64;
            let imm26 = ((disp / 4) as u32) & 0x03FF_FFFF;
            segment.patch_u32(from, 0x9400_0000 | imm26)?;
        }

        let executable = ExecutableCode::install(&segment)
            .map_err(|error| CompileError::bug(format!("installing code segment: {error}")))?;

        tracing::debug!(
            funcs = func_offsets.len(),
            bytes = segment.len(),
            "compiled module"
        );

        Ok(CompiledModule {
            inner: Arc::new(CompiledModuleInner {
                module,
                layout,
                executable: Arc::new(executable),
                func_offsets,
                preambles,
            }),
        })
    }

    /// Instantiates a compiled module, resolving imports against registered
    /// host modules.
    pub fn instantiate(
        &self,
        compiled: &CompiledModule,
        config: ModuleConfig,
    ) -> Result<Instance, RuntimeError> {
        let inner = self.inner.instantiate(compiled, config)?;
        let instance = Instance { inner };
        if let Some(start) = instance.inner.compiled.module.start {
            let function = instance.function_by_index(start)?;
            function.call(&[])?;
        }
        Ok(instance)
    }
}

impl RuntimeInner {
    fn build_host_module(
        &self,
        name: String,
        funcs: Vec<HostFuncDef>,
    ) -> Result<HostModule, RuntimeError> {
        let mut segment = CodeSegment::new();
        let mut stub_offsets = Vec::with_capacity(funcs.len());
        for (index, func) in funcs.iter().enumerate() {
            let sig = signature_of(&func.ty);
            let code = self.machine.build_host_stub(&sig, index as u32)?;
            stub_offsets.push(segment.append(&code.bytes));
        }
        let executable = ExecutableCode::install(&segment)
            .map_err(|error| RuntimeError::Host(format!("installing host stubs: {error}")))?;

        let funcs = Arc::new(funcs);
        let ctx = Box::new([
            Arc::as_ptr(&funcs) as u64,
            0,
            0,
            host_dispatcher as usize as u64,
        ]);
        Ok(HostModule {
            name,
            funcs,
            stub_offsets,
            executable: Arc::new(executable),
            ctx,
        })
    }

    /// The internal host module backing the compiler builtins.
    fn builtins(&self) -> Result<Arc<HostModule>, RuntimeError> {
        let mut slot = self
            .builtins
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(module) = slot.as_ref() {
            return Ok(module.clone());
        }
        let types = builtin_types();
        let mut funcs: Vec<HostFuncDef> = Vec::with_capacity(NUM_BUILTINS as usize);
        for (index, ty) in types.into_iter().enumerate() {
            let builtin = BUILTIN_ORDER[index];
            funcs.push(HostFuncDef {
                name: format!("{builtin:?}"),
                slots: slot_count(&ty),
                ty,
                callback: Box::new(move |env, buffer| builtin_call(builtin, env, buffer)),
            });
        }
        let module = Arc::new(self.build_host_module("kelpie.builtin".to_string(), funcs)?);
        *slot = Some(module.clone());
        Ok(module)
    }

    fn instantiate(
        &self,
        compiled: &CompiledModule,
        config: ModuleConfig,
    ) -> Result<Arc<InstanceInner>, RuntimeError> {
        let module = &compiled.inner.module;
        let layout = &compiled.inner.layout;

        // Resolve function imports against host modules.
        let mut host_deps: Vec<Arc<HostModule>> = Vec::new();
        let mut import_descriptors: Vec<FunctionDescriptor> = Vec::new();
        let mut import_targets: Vec<(Arc<HostModule>, usize)> = Vec::new();
        let host_modules = self
            .host_modules
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for import in &module.imports {
            match import.desc {
                ImportDesc::Func(type_index) => {
                    let host = host_modules.get(&import.module).ok_or_else(|| {
                        RuntimeError::Validation(format!(
                            "unknown import module {:?}",
                            import.module
                        ))
                    })?;
                    let index = host.func_index(&import.name).ok_or_else(|| {
                        RuntimeError::Validation(format!(
                            "unknown import {:?} in module {:?}",
                            import.name, import.module
                        ))
                    })?;
                    let expected = &module.types[type_index as usize];
                    if host.funcs[index].ty != *expected {
                        return Err(RuntimeError::Validation(format!(
                            "import {:?}.{:?} has type {}, expected {}",
                            import.module, import.name, host.funcs[index].ty, expected
                        )));
                    }
                    import_descriptors.push(FunctionDescriptor {
                        code_ptr: host.executable.ptr_at(host.stub_offsets[index]) as u64,
                        module_ctx: host.ctx_ptr(),
                        type_id: type_index as u64,
                    });
                    import_targets.push((host.clone(), index));
                    if !host_deps.iter().any(|dep| Arc::ptr_eq(dep, host)) {
                        host_deps.push(host.clone());
                    }
                }
                _ => {
                    return Err(RuntimeError::Validation(
                        "table, memory, and global imports are not supported".to_string(),
                    ));
                }
            }
        }
        drop(host_modules);

        // Builtins follow the real imports in the descriptor array.
        let builtins = self.builtins()?;
        for builtin_index in 0..NUM_BUILTINS {
            import_descriptors.push(FunctionDescriptor {
                code_ptr: builtins
                    .executable
                    .ptr_at(builtins.stub_offsets[builtin_index as usize])
                    as u64,
                module_ctx: builtins.ctx_ptr(),
                type_id: module.types.len() as u64 + builtin_index as u64,
            });
        }
        host_deps.push(builtins.clone());

        let memory = LinearMemory::new(module.memory().map(|m| m.limits).unwrap_or(Limits {
            min: 0,
            max: Some(0),
        }));
        let table_limits = module.table().map(|t| t.limits).unwrap_or(Limits {
            min: 0,
            max: Some(0),
        });
        let table = vec![0u64; table_limits.min as usize];

        let ctx_buf = vec![0u8; layout.size as usize].into_boxed_slice();
        let import_descriptors = import_descriptors.into_boxed_slice();

        // Function descriptors for the combined index space, for funcrefs
        // and call_indirect.
        let num_imported = module.num_imported_funcs();
        let mut func_descriptors = Vec::with_capacity(module.num_funcs() as usize);
        for index in 0..module.num_funcs() {
            if index < num_imported {
                func_descriptors.push(import_descriptors[index as usize]);
            } else {
                let local = (index - num_imported) as usize;
                func_descriptors.push(FunctionDescriptor {
                    code_ptr: compiled
                        .inner
                        .executable
                        .ptr_at(compiled.inner.func_offsets[local])
                        as u64,
                    module_ctx: ctx_buf.as_ptr() as u64,
                    type_id: module.func_type_index(index).unwrap_or(0) as u64,
                });
            }
        }
        let func_descriptors = func_descriptors.into_boxed_slice();

        let elem_segs: Vec<Option<Vec<u64>>> = module
            .elements
            .iter()
            .map(|segment| {
                Some(
                    segment
                        .func_indices
                        .iter()
                        .map(|func| match func {
                            Some(index) => {
                                &func_descriptors[*index as usize] as *const FunctionDescriptor
                                    as u64
                            }
                            None => 0,
                        })
                        .collect(),
                )
            })
            .collect();
        let data_segs: Vec<Option<Vec<u8>>> = module
            .data
            .iter()
            .map(|segment| Some(segment.bytes.clone()))
            .collect();

        let mut inner = InstanceInner {
            compiled: compiled.inner.clone(),
            config: self.config.clone(),
            ctx_buf,
            memory: Mutex::new(memory),
            table: Mutex::new(table),
            max_table: table_limits.max.unwrap_or(u32::MAX),
            func_descriptors,
            import_descriptors,
            import_targets,
            data_segs: Mutex::new(data_segs),
            elem_segs: Mutex::new(elem_segs),
            host_deps,
            closed: AtomicBool::new(false),
            active: Mutex::new(Vec::new()),
            name: config.name,
        };

        inner.write_context_fields()?;
        inner.init_globals()?;
        inner.apply_active_segments()?;

        tracing::debug!(name = ?inner.name, "instantiated module");
        Ok(Arc::new(inner))
    }
}

const BUILTIN_ORDER: [Builtin; NUM_BUILTINS as usize] = [
    Builtin::MemoryGrow,
    Builtin::MemoryCopy,
    Builtin::MemoryFill,
    Builtin::MemoryInit,
    Builtin::DataDrop,
    Builtin::TableGrow,
    Builtin::TableCopy,
    Builtin::TableInit,
    Builtin::TableFill,
    Builtin::ElemDrop,
];

// ── Compiled module ──────────────────────────────────────────────────────

#[derive(Clone)]
pub struct CompiledModule {
    inner: Arc<CompiledModuleInner>,
}

struct CompiledModuleInner {
    module: Module,
    layout: ModuleContextLayout,
    executable: Arc<ExecutableCode>,
    /// Section offsets of local function bodies.
    func_offsets: Vec<usize>,
    /// Entry preamble offsets by type index.
    preambles: HashMap<u32, usize>,
}

impl CompiledModule {
    pub fn exports(&self) -> impl Iterator<Item = (&str, &ExternKind)> {
        self.inner
            .module
            .exports
            .iter()
            .map(|(name, kind)| (name.as_str(), kind))
    }
}

// ── Instance ─────────────────────────────────────────────────────────────

struct InstanceInner {
    compiled: Arc<CompiledModuleInner>,
    config: Config,
    ctx_buf: Box<[u8]>,
    memory: Mutex<LinearMemory>,
    table: Mutex<Vec<u64>>,
    max_table: u32,
    func_descriptors: Box<[FunctionDescriptor]>,
    import_descriptors: Box<[FunctionDescriptor]>,
    import_targets: Vec<(Arc<HostModule>, usize)>,
    data_segs: Mutex<Vec<Option<Vec<u8>>>>,
    elem_segs: Mutex<Vec<Option<Vec<u64>>>>,
    host_deps: Vec<Arc<HostModule>>,
    closed: AtomicBool,
    /// Execution contexts of in-flight invocations, for stop poisoning.
    active: Mutex<Vec<usize>>,
    name: Option<String>,
}

// The context buffer and descriptor arrays are written during
// instantiation and only read (or raced on by guest code, which is the
// Wasm memory model's concern) afterwards.
unsafe impl Send for InstanceInner {}
unsafe impl Sync for InstanceInner {}

impl InstanceInner {
    fn ctx_write_u64(&mut self, offset: u32, value: u64) {
        let offset = offset as usize;
        self.ctx_buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    fn write_context_fields(&mut self) -> Result<(), RuntimeError> {
        let layout = self.compiled.layout.clone();
        self.ctx_write_u64(layout.imported_functions, self.import_descriptors.as_ptr() as u64);
        self.ctx_write_u64(layout.function_descriptors, self.func_descriptors.as_ptr() as u64);
        self.refresh_memory_fields();
        self.refresh_table_fields();
        Ok(())
    }

    /// Re-publishes the memory base and length after allocation changes.
    fn refresh_memory_fields(&self) {
        let layout = &self.compiled.layout;
        let mut memory = self.memory.lock().unwrap_or_else(|e| e.into_inner());
        let base = memory.base_ptr() as u64;
        let len = memory.len() as u64;
        drop(memory);
        self.ctx_write_u64_shared(layout.memory_base, base);
        self.ctx_write_u64_shared(layout.memory_len, len);
    }

    fn refresh_table_fields(&self) {
        let layout = &self.compiled.layout;
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let base = table.as_mut_ptr() as u64;
        let len = table.len() as u64;
        drop(table);
        self.ctx_write_u64_shared(layout.table_base, base);
        self.ctx_write_u64_shared(layout.table_len, len);
    }

    /// Context-buffer write through a shared reference; the buffer address
    /// is stable and guest-visible, so this goes through a raw pointer.
    fn ctx_write_u64_shared(&self, offset: u32, value: u64) {
        unsafe {
            let ptr = self.ctx_buf.as_ptr().add(offset as usize) as *mut u64;
            ptr.write_volatile(value);
        }
    }

    fn init_globals(&mut self) -> Result<(), RuntimeError> {
        if self.compiled.module.num_imported_globals() > 0 {
            return Err(RuntimeError::Validation(
                "global imports are not supported".to_string(),
            ));
        }
        let layout = self.compiled.layout.clone();
        let globals = self.compiled.module.globals.clone();
        for (index, global) in globals.iter().enumerate() {
            let offset = layout.globals[index];
            match global.init {
                ConstExpr::I32(value) => self.ctx_write_u64(offset, value as u32 as u64),
                ConstExpr::I64(value) => self.ctx_write_u64(offset, value as u64),
                ConstExpr::F32(value) => self.ctx_write_u64(offset, value.to_bits() as u64),
                ConstExpr::F64(value) => self.ctx_write_u64(offset, value.to_bits()),
                ConstExpr::V128(value) => {
                    self.ctx_write_u64(offset, value as u64);
                    self.ctx_write_u64(offset + 8, (value >> 64) as u64);
                }
                ConstExpr::RefNull => self.ctx_write_u64(offset, 0),
                ConstExpr::RefFunc(func) => {
                    let descriptor =
                        &self.func_descriptors[func as usize] as *const FunctionDescriptor;
                    self.ctx_write_u64(offset, descriptor as u64);
                }
                ConstExpr::GlobalGet(_) => {
                    return Err(RuntimeError::Validation(
                        "global initializers referencing imported globals are not supported"
                            .to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn eval_offset(&self, expr: &ConstExpr) -> Result<u32, RuntimeError> {
        match expr {
            ConstExpr::I32(value) => Ok(*value as u32),
            _ => Err(RuntimeError::Validation(
                "segment offsets must be i32 constants".to_string(),
            )),
        }
    }

    fn apply_active_segments(&mut self) -> Result<(), RuntimeError> {
        let module = self.compiled.module.clone();
        for segment in &module.data {
            let Some(offset) = &segment.offset else {
                continue;
            };
            let offset = self.eval_offset(offset)? as usize;
            let mut memory = self.memory.lock().unwrap_or_else(|e| e.into_inner());
            let end = offset
                .checked_add(segment.bytes.len())
                .filter(|end| *end <= memory.len())
                .ok_or(RuntimeError::Trap(TrapKind::MemoryOutOfBounds))?;
            memory.as_mut_slice()[offset..end].copy_from_slice(&segment.bytes);
        }

        for (index, segment) in module.elements.iter().enumerate() {
            let Some(offset) = &segment.offset else {
                continue;
            };
            let offset = self.eval_offset(offset)? as usize;
            let entries = {
                let segs = self.elem_segs.lock().unwrap_or_else(|e| e.into_inner());
                segs[index].clone().unwrap_or_default()
            };
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            let end = offset
                .checked_add(entries.len())
                .filter(|end| *end <= table.len())
                .ok_or(RuntimeError::Trap(TrapKind::TableOutOfBounds))?;
            table[offset..end].copy_from_slice(&entries);
        }
        self.refresh_memory_fields();
        self.refresh_table_fields();
        Ok(())
    }

    fn register_active(&self, state: *mut InvocationState) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(state as usize);
    }

    fn unregister_active(&self, state: *mut InvocationState) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|entry| *entry != state as usize);
    }
}

#[derive(Clone)]
pub struct Instance {
    inner: Arc<InstanceInner>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance").finish_non_exhaustive()
    }
}

impl Instance {
    /// Looks up an exported function by name.
    pub fn exported_function(&self, name: &str) -> Option<Function> {
        match self.inner.compiled.module.exports.get(name) {
            Some(ExternKind::Func(index)) => self.function_by_index(*index).ok(),
            _ => None,
        }
    }

    fn function_by_index(&self, index: u32) -> Result<Function, RuntimeError> {
        let type_index = self
            .inner
            .compiled
            .module
            .func_type_index(index)
            .ok_or_else(|| RuntimeError::Validation(format!("no function {index}")))?;
        Ok(Function {
            instance: self.inner.clone(),
            index,
            type_index,
        })
    }

    /// Marks the instance closed. In-flight calls complete naturally; each
    /// reports `ModuleClosed` once done. The code segment is unmapped when
    /// the last reference is released.
    pub fn close(&self) -> Result<(), RuntimeError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let active = self
            .inner
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for entry in active.iter() {
            let state = *entry as *mut InvocationState;
            unsafe {
                std::ptr::addr_of_mut!((*state).ctx.stack_limit)
                    .write_volatile(STACK_LIMIT_POISON);
            }
        }
        tracing::debug!(name = ?self.inner.name, in_flight = active.len(), "closed instance");
        Ok(())
    }
}

/// A callable exported function.
pub struct Function {
    instance: Arc<InstanceInner>,
    index: u32,
    type_index: u32,
}

impl Function {
    pub fn ty(&self) -> &FuncType {
        &self.instance.compiled.module.types[self.type_index as usize]
    }

    /// Calls the function with raw `u64`-encoded arguments (one slot per
    /// scalar, two per v128) and returns the results in the same encoding.
    pub fn call(&self, args: &[u64]) -> Result<Vec<u64>, RuntimeError> {
        if self.instance.closed.load(Ordering::SeqCst) {
            return Err(RuntimeError::ModuleClosed);
        }

        let ty = self.ty().clone();
        let param_slots: usize = ty.params.iter().map(|ty| ty.slot_count()).sum();
        let result_slots: usize = ty.results.iter().map(|ty| ty.slot_count()).sum();
        if args.len() != param_slots {
            return Err(RuntimeError::Validation(format!(
                "expected {param_slots} argument slots, got {}",
                args.len()
            )));
        }

        let num_imported = self.instance.compiled.module.num_imported_funcs();
        let result = if self.index < num_imported {
            self.call_host(args, param_slots.max(result_slots))
        } else {
            self.call_native(args, param_slots.max(result_slots))
        };

        // Calls that were in flight when the instance closed finish with
        // the closed status, whatever their own outcome.
        if self.instance.closed.load(Ordering::SeqCst) {
            return Err(RuntimeError::ModuleClosed);
        }
        result.map(|mut buffer| {
            buffer.truncate(result_slots);
            buffer
        })
    }

    /// Re-exported imports dispatch straight to the host callback.
    fn call_host(&self, args: &[u64], slots: usize) -> Result<Vec<u64>, RuntimeError> {
        let (host, index) = self
            .instance
            .import_targets
            .get(self.index as usize)
            .ok_or_else(|| RuntimeError::Validation("import target missing".to_string()))?
            .clone();
        let mut buffer = vec![0u64; slots.max(1)];
        buffer[..args.len()].copy_from_slice(args);

        let mut state = Box::new(InvocationState {
            ctx: ExecContext::new(),
            host_error: None,
            instance: Arc::as_ptr(&self.instance),
        });
        let state_ptr: *mut InvocationState = &mut *state;
        self.instance.register_active(state_ptr);
        let outcome = {
            let mut env = HostCallEnv { state: &mut state };
            (host.funcs[index].callback)(&mut env, &mut buffer)
        };
        self.instance.unregister_active(state_ptr);
        outcome?;
        if let Some(error) = state.host_error.take() {
            return Err(error);
        }
        Ok(buffer)
    }

    #[cfg(target_arch = "aarch64")]
    fn call_native(&self, args: &[u64], slots: usize) -> Result<Vec<u64>, RuntimeError> {
        let compiled = &self.instance.compiled;
        let local = (self.index - compiled.module.num_imported_funcs()) as usize;
        let body = compiled.executable.ptr_at(compiled.func_offsets[local]);
        let preamble_offset = *compiled
            .preambles
            .get(&self.type_index)
            .ok_or_else(|| RuntimeError::Validation("function has no entry preamble".to_string()))?;
        let preamble = compiled.executable.ptr_at(preamble_offset);

        let mut buffer = vec![0u64; slots.max(1)];
        buffer[..args.len()].copy_from_slice(args);
        let mut stack = GuestStack::new(self.instance.config.guest_stack_size);

        let mut state = Box::new(InvocationState {
            ctx: ExecContext::new(),
            host_error: None,
            instance: Arc::as_ptr(&self.instance),
        });
        state.ctx.module_ctx = self.instance.ctx_buf.as_ptr() as u64;
        state.ctx.stack_limit = stack.limit();

        let state_ptr: *mut InvocationState = &mut *state;
        self.instance.register_active(state_ptr);

        type EntryFn = unsafe extern "C" fn(*mut ExecContext, *mut u8, *mut u8, *mut u64, *const u8);
        let entry: EntryFn = unsafe { std::mem::transmute(preamble) };
        unsafe {
            entry(
                &mut state.ctx,
                self.instance.ctx_buf.as_ptr() as *mut u8,
                stack.top(),
                buffer.as_mut_ptr(),
                body,
            );
        }

        self.instance.unregister_active(state_ptr);

        match state.ctx.exit_code() {
            Some(ExitCode::Ok) => Ok(buffer),
            Some(ExitCode::HostCall) => Err(state
                .host_error
                .take()
                .unwrap_or_else(|| RuntimeError::Host("host call failed".to_string()))),
            Some(ExitCode::Stop) => Err(RuntimeError::ModuleClosed),
            Some(ExitCode::CallStackOverflow)
                if self.instance.closed.load(Ordering::SeqCst) =>
            {
                Err(RuntimeError::ModuleClosed)
            }
            Some(code) => match TrapKind::from_exit_code(code) {
                Some(kind) => Err(RuntimeError::Trap(kind)),
                None => Err(RuntimeError::Host(format!("unexpected exit code {code:?}"))),
            },
            None => Err(RuntimeError::Host("corrupt exit code".to_string())),
        }
    }

    #[cfg(not(target_arch = "aarch64"))]
    fn call_native(&self, _args: &[u64], _slots: usize) -> Result<Vec<u64>, RuntimeError> {
        Err(RuntimeError::UnsupportedHost)
    }
}

// ── Builtins ─────────────────────────────────────────────────────────────

fn builtin_call(
    builtin: Builtin,
    env: &mut HostCallEnv<'_>,
    buffer: &mut [u64],
) -> Result<(), RuntimeError> {
    let Some(instance) = env.instance() else {
        return Err(RuntimeError::Host("builtin called without instance".to_string()));
    };

    match builtin {
        Builtin::MemoryGrow => {
            let delta = buffer[0] as u32;
            let mut memory = instance.memory.lock().unwrap_or_else(|e| e.into_inner());
            let result = match memory.grow(delta) {
                Some(old_pages) => old_pages,
                None => u32::MAX,
            };
            drop(memory);
            instance.refresh_memory_fields();
            buffer[0] = result as u64;
        }
        Builtin::MemoryCopy => {
            let (dst, src, len) = (buffer[0] as usize, buffer[1] as usize, buffer[2] as usize);
            let mut memory = instance.memory.lock().unwrap_or_else(|e| e.into_inner());
            let size = memory.len();
            if dst.checked_add(len).map_or(true, |end| end > size)
                || src.checked_add(len).map_or(true, |end| end > size)
            {
                drop(memory);
                env.trap(ExitCode::MemoryOutOfBounds);
                return Ok(());
            }
            memory.as_mut_slice().copy_within(src..src + len, dst);
        }
        Builtin::MemoryFill => {
            let (dst, value, len) = (buffer[0] as usize, buffer[1] as u8, buffer[2] as usize);
            let mut memory = instance.memory.lock().unwrap_or_else(|e| e.into_inner());
            let size = memory.len();
            if dst.checked_add(len).map_or(true, |end| end > size) {
                drop(memory);
                env.trap(ExitCode::MemoryOutOfBounds);
                return Ok(());
            }
            memory.as_mut_slice()[dst..dst + len].fill(value);
        }
        Builtin::MemoryInit => {
            let seg = buffer[0] as usize;
            let (dst, src, len) = (buffer[1] as usize, buffer[2] as usize, buffer[3] as usize);
            let segs = instance.data_segs.lock().unwrap_or_else(|e| e.into_inner());
            let data = segs.get(seg).and_then(|seg| seg.as_deref()).unwrap_or(&[]);
            let mut memory = instance.memory.lock().unwrap_or_else(|e| e.into_inner());
            if src.checked_add(len).map_or(true, |end| end > data.len())
                || dst.checked_add(len).map_or(true, |end| end > memory.len())
            {
                drop(memory);
                drop(segs);
                env.trap(ExitCode::MemoryOutOfBounds);
                return Ok(());
            }
            memory.as_mut_slice()[dst..dst + len].copy_from_slice(&data[src..src + len]);
        }
        Builtin::DataDrop => {
            let seg = buffer[0] as usize;
            let mut segs = instance.data_segs.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = segs.get_mut(seg) {
                *entry = None;
            }
        }
        Builtin::TableGrow => {
            let init = buffer[0];
            let delta = buffer[1] as u32;
            let mut table = instance.table.lock().unwrap_or_else(|e| e.into_inner());
            let old_len = table.len() as u32;
            let result = match old_len.checked_add(delta) {
                Some(new_len) if new_len <= instance.max_table => {
                    table.resize(new_len as usize, init);
                    old_len
                }
                _ => u32::MAX,
            };
            drop(table);
            instance.refresh_table_fields();
            buffer[0] = result as u64;
        }
        Builtin::TableCopy => {
            let (dst, src, len) = (buffer[0] as usize, buffer[1] as usize, buffer[2] as usize);
            let mut table = instance.table.lock().unwrap_or_else(|e| e.into_inner());
            let size = table.len();
            if dst.checked_add(len).map_or(true, |end| end > size)
                || src.checked_add(len).map_or(true, |end| end > size)
            {
                drop(table);
                env.trap(ExitCode::TableOutOfBounds);
                return Ok(());
            }
            table.copy_within(src..src + len, dst);
        }
        Builtin::TableInit => {
            let seg = buffer[0] as usize;
            let (dst, src, len) = (buffer[1] as usize, buffer[2] as usize, buffer[3] as usize);
            let segs = instance.elem_segs.lock().unwrap_or_else(|e| e.into_inner());
            let entries: &[u64] = segs.get(seg).and_then(|seg| seg.as_deref()).unwrap_or(&[]);
            let mut table = instance.table.lock().unwrap_or_else(|e| e.into_inner());
            if src.checked_add(len).map_or(true, |end| end > entries.len())
                || dst.checked_add(len).map_or(true, |end| end > table.len())
            {
                drop(table);
                drop(segs);
                env.trap(ExitCode::TableOutOfBounds);
                return Ok(());
            }
            let slice = entries[src..src + len].to_vec();
            table[dst..dst + len].copy_from_slice(&slice);
        }
        Builtin::TableFill => {
            let (dst, value, len) = (buffer[0] as usize, buffer[1], buffer[2] as usize);
            let mut table = instance.table.lock().unwrap_or_else(|e| e.into_inner());
            if dst.checked_add(len).map_or(true, |end| end > table.len()) {
                drop(table);
                env.trap(ExitCode::TableOutOfBounds);
                return Ok(());
            }
            table[dst..dst + len].fill(value);
        }
        Builtin::ElemDrop => {
            let seg = buffer[0] as usize;
            let mut segs = instance.elem_segs.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = segs.get_mut(seg) {
                *entry = None;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/t_engine.rs"]
mod tests;
