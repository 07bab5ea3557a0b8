// Shared state and the `Lua` owner type.
//
// One `Lua` value is one interpreter instance: it owns the object pool,
// the collector, the string table, the registry and every thread. All
// threads of the instance share this state; the embedding API operates
// on the *current* thread, which `resume` switches. There is no process
// level mutable state anywhere: everything hangs off this struct, which
// is an explicit parameter to every operation.

use crate::gc::{
    ClosureId, GC, GcId, GcRoots, ObjectPool, ProtoId, StringId, StringTable, TableId, ThreadId,
    UpvalueId, UserdataId, make_seed,
};
use crate::lua_value::{
    Closure, LuaTable, LuaUserdata, LuaValue, Proto, TableOpError, Upvalue,
};
use crate::lua_vm::lua_error::{LuaError, LuaResult};
use crate::lua_vm::lua_limits::{
    EXTRA_STACK, LUA_NUMTAGS, LUA_RIDX_GLOBALS, LUA_RIDX_MAINTHREAD, LUAI_MAXSHORTLEN,
    LUAI_MAXSTACK, ERRORSTACKSIZE, LUNO_VERSION_NUM,
};
use crate::lua_vm::lua_thread::LuaThread;
use crate::lua_vm::metamethod::{EVENT_NAMES, TM_N, TmKind};
use crate::lua_vm::zio::Zio;
use crate::lua_vm::{PanicFunction, WarnFunction};

/// How `load` lets the chunk loader interpret its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Text,
    Binary,
    Both,
}

/// The external compiler: turns a chunk of source (or precompiled)
/// bytes into a function prototype. A plain function pointer so the
/// loader can re-enter the runtime freely.
pub type ChunkLoader =
    fn(&mut Lua, &mut Zio<'_>, chunkname: &str, mode: LoadMode) -> Result<ProtoId, String>;

/// The external bytecode VM: runs the language-closure frame on top of
/// the current thread until it returns, yields or errors, leaving the
/// frame's results on the stack and returning their count. A function
/// pointer, so nested calls re-enter it naturally.
pub type Executor = fn(&mut Lua) -> LuaResult<i32>;

/// Host-tunable knobs of a state.
#[derive(Debug, Clone)]
pub struct LuaOptions {
    /// Ceiling on accounted bytes; crossing it behaves like physical
    /// exhaustion (emergency collection, then a memory error).
    pub memory_limit: usize,
    /// Fixed string-hash seed, for reproducible runs; `None` randomizes.
    pub hash_seed: Option<u32>,
}

impl Default for LuaOptions {
    fn default() -> Self {
        LuaOptions {
            memory_limit: usize::MAX,
            hash_seed: None,
        }
    }
}

/// State shared by every thread of one instance.
pub struct GlobalState {
    pub strt: StringTable,
    /// The registry table; slot 1 is the main thread, slot 2 the
    /// globals table.
    pub registry: LuaValue,
    pub seed: u32,
    /// Metatables for the primitive types.
    pub mt: [Option<TableId>; LUA_NUMTAGS],
    /// Interned metamethod event names, fixed for the state's lifetime.
    pub tmname: [StringId; TM_N],
    pub mainthread: ThreadId,
    pub panic: Option<PanicFunction>,
    pub warn: Option<WarnFunction>,
    pub version: i64,
}

pub struct Lua {
    pub(crate) g: GlobalState,
    pub(crate) gc: GC,
    pub(crate) pool: ObjectPool,
    /// The running thread; all positional API operations target it.
    pub(crate) current: ThreadId,
    pub(crate) loader: Option<ChunkLoader>,
    pub(crate) executor: Option<Executor>,
    /// Nesting depth of protected calls; an error with no protection
    /// left reaches the panic handler.
    pub(crate) protection_depth: u32,
    closed: bool,
}

impl Lua {
    pub fn new() -> Self {
        Self::with_options(LuaOptions::default())
    }

    pub fn with_options(options: LuaOptions) -> Self {
        let mut gc = GC::new(options.memory_limit);
        let mut pool = ObjectPool::new();
        let seed = options.hash_seed.unwrap_or_else(make_seed);
        let mut strt = StringTable::new(seed);

        // the memory-error message exists before anything can fail
        let size = strt.init(&mut pool.strings, gc.current_white);
        gc.track_new_object(size);

        // metamethod names are interned once and never collected
        let mut tmname = [StringId(0); TM_N];
        for (i, name) in EVENT_NAMES.iter().enumerate() {
            let (id, created) = strt.intern(name.as_bytes(), &mut pool.strings, gc.current_white);
            if let Some(sz) = created {
                gc.track_new_object(sz);
            }
            if let Some(s) = pool.strings.get_mut(id.0) {
                s.header.set_fixed();
            }
            tmname[i] = id;
        }

        // the main thread lives exactly as long as the state
        let main = LuaThread::new(0);
        let main_size = main.mem_size();
        let main_id = ThreadId(pool.threads.alloc(main, gc.current_white, main_size as u32));
        gc.track_new_object(main_size);
        if let Some(t) = pool.threads.get_mut(main_id.0) {
            t.header.set_fixed();
        }

        let mut lua = Lua {
            g: GlobalState {
                strt,
                registry: LuaValue::nil(),
                seed,
                mt: [None; LUA_NUMTAGS],
                tmname,
                mainthread: main_id,
                panic: None,
                warn: None,
                version: LUNO_VERSION_NUM,
            },
            gc,
            pool,
            current: main_id,
            loader: None,
            executor: None,
            protection_depth: 0,
            closed: false,
        };
        lua.init_registry();
        lua
    }

    /// Build the registry with its two reserved slots.
    fn init_registry(&mut self) {
        let registry = match self.new_table_sized(LUA_RIDX_GLOBALS as usize, 0) {
            Ok(t) => t,
            Err(_) => return, // fresh state, cannot actually fail
        };
        self.g.registry = LuaValue::table(registry);
        let main = LuaValue::thread(self.g.mainthread);
        let _ = self.pool.table_set_int(registry, LUA_RIDX_MAINTHREAD, main);
        let globals = match self.new_table_sized(0, 0) {
            Ok(t) => t,
            Err(_) => return,
        };
        let _ = self
            .pool
            .table_set_int(registry, LUA_RIDX_GLOBALS, LuaValue::table(globals));
    }

    // ===== Collaborators and handlers =====

    pub fn set_loader(&mut self, loader: ChunkLoader) {
        self.loader = Some(loader);
    }

    pub fn set_executor(&mut self, executor: Executor) {
        self.executor = Some(executor);
    }

    /// Install the handler of last resort; returns the previous one.
    pub fn at_panic(&mut self, panic: Option<PanicFunction>) -> Option<PanicFunction> {
        std::mem::replace(&mut self.g.panic, panic)
    }

    pub fn set_warn(&mut self, warn: Option<WarnFunction>) {
        self.g.warn = warn;
    }

    pub(crate) fn warn(&self, msg: &str) {
        match self.g.warn {
            Some(w) => w(msg),
            None => eprintln!("luno warning: {}", msg),
        }
    }

    pub fn version(&self) -> i64 {
        self.g.version
    }

    /// Id of the main thread.
    pub fn main_thread(&self) -> ThreadId {
        self.g.mainthread
    }

    /// Id of the running thread.
    pub fn running_thread(&self) -> ThreadId {
        self.current
    }

    /// The registry value.
    pub fn registry(&self) -> LuaValue {
        self.g.registry
    }

    /// The globals table from the registry.
    pub(crate) fn globals_table(&self) -> LuaValue {
        match self.g.registry.as_table_id() {
            Some(reg) => self.pool.table_get_int(reg, LUA_RIDX_GLOBALS),
            None => LuaValue::nil(),
        }
    }

    // ===== Current thread access =====

    #[inline]
    pub(crate) fn th(&self) -> &LuaThread {
        match self.pool.threads.get(self.current.0) {
            Some(t) => &t.data,
            None => unreachable!("current thread is always live"),
        }
    }

    #[inline]
    pub(crate) fn th_mut(&mut self) -> &mut LuaThread {
        match self.pool.threads.get_mut(self.current.0) {
            Some(t) => &mut t.data,
            None => unreachable!("current thread is always live"),
        }
    }

    #[inline]
    pub(crate) fn thread_ref(&self, id: ThreadId) -> Option<&LuaThread> {
        self.pool.thread(id)
    }

    // ===== Stack plumbing =====

    /// Make room for at least `n` more slots on the current thread,
    /// growing by doubling. Past the hard limit the stack is extended
    /// into the red zone once so the overflow error itself can run.
    pub(crate) fn grow_stack(&mut self, n: usize) -> LuaResult<()> {
        let (size, top) = {
            let th = self.th();
            (th.stack_size(), th.top)
        };
        if size > LUAI_MAXSTACK {
            // already handling a stack error
            return Err(LuaError::ErrErr);
        }
        let needed = top + n + EXTRA_STACK;
        let mut newsize = (2 * size).min(LUAI_MAXSTACK);
        if newsize < needed {
            newsize = needed;
        }
        if newsize > LUAI_MAXSTACK {
            // red zone: room for the error machinery, then complain
            self.resize_current_stack(ERRORSTACKSIZE);
            return Err(self.run_error("stack overflow"));
        }
        self.resize_current_stack(newsize);
        Ok(())
    }

    fn resize_current_stack(&mut self, newsize: usize) {
        let current = self.current;
        let delta = {
            let th = self.th_mut();
            let before = th.stack.len();
            th.realloc_stack(newsize);
            (th.stack.len() as isize - before as isize)
                * std::mem::size_of::<LuaValue>() as isize
        };
        self.gc.mem.account_delta(delta);
        if let Some(t) = self.pool.threads.get_mut(current.0) {
            t.header.size = (t.header.size as isize + delta).max(0) as u32;
        }
    }

    /// Ensure `n` free slots above the current top.
    pub(crate) fn ensure_stack(&mut self, n: usize) -> LuaResult<()> {
        if self.th().stack_space() < n {
            self.grow_stack(n)?;
        }
        Ok(())
    }

    /// Push onto the current thread, growing if needed.
    pub(crate) fn push_raw(&mut self, v: LuaValue) -> LuaResult<()> {
        self.ensure_stack(1)?;
        let th = self.th_mut();
        let top = th.top;
        th.stack[top] = v;
        th.top = top + 1;
        Ok(())
    }

    #[inline]
    pub(crate) fn pop_raw(&mut self) -> LuaValue {
        let th = self.th_mut();
        debug_assert!(th.top > th.ci().func + 1 || th.top > 0);
        th.top -= 1;
        th.stack[th.top]
    }

    #[inline]
    pub(crate) fn stack_at(&self, abs: usize) -> LuaValue {
        self.th().stack.get(abs).copied().unwrap_or_default()
    }

    #[inline]
    pub(crate) fn stack_write(&mut self, abs: usize, v: LuaValue) {
        let th = self.th_mut();
        if abs < th.stack.len() {
            th.stack[abs] = v;
        }
    }

    // ===== Allocation =====

    /// Gate a prospective allocation of `size` bytes against the memory
    /// limit: on pressure run an emergency full collection, then give up
    /// with a memory error.
    pub(crate) fn check_alloc(&mut self, size: usize) -> LuaResult<()> {
        if self.gc.mem.would_exceed(size) {
            self.full_gc_internal(true);
            if self.gc.mem.would_exceed(size) {
                return Err(self.throw_memory_error());
            }
        }
        Ok(())
    }

    /// Intern or create a string value from raw bytes.
    pub(crate) fn new_string_value(&mut self, bytes: &[u8]) -> LuaResult<LuaValue> {
        if bytes.len() <= LUAI_MAXSHORTLEN {
            self.check_alloc(bytes.len() + 32)?;
            let GlobalState { strt, .. } = &mut self.g;
            let (id, created) = strt.intern(bytes, &mut self.pool.strings, self.gc.current_white);
            if let Some(size) = created {
                self.gc.track_new_object(size);
            }
            Ok(LuaValue::short_string(id))
        } else {
            self.check_alloc(bytes.len() + 32)?;
            let (id, size) =
                self.g
                    .strt
                    .new_long(bytes, &mut self.pool.strings, self.gc.current_white);
            self.gc.track_new_object(size);
            Ok(LuaValue::long_string(id))
        }
    }

    /// String creation through the pointer-keyed literal cache.
    pub(crate) fn new_cached_string(&mut self, s: &str) -> LuaResult<LuaValue> {
        self.check_alloc(s.len() + 32)?;
        let GlobalState { strt, .. } = &mut self.g;
        let (id, created) = strt.new_cached(s, &mut self.pool.strings, self.gc.current_white);
        if let Some(size) = created {
            self.gc.track_new_object(size);
        }
        let long = self
            .pool
            .strings
            .get(id.0)
            .map(|s| s.data.is_long())
            .unwrap_or(false);
        Ok(if long {
            LuaValue::long_string(id)
        } else {
            LuaValue::short_string(id)
        })
    }

    pub(crate) fn new_table_sized(&mut self, narray: usize, nhash: usize) -> LuaResult<TableId> {
        let t = match LuaTable::with_capacity(narray, nhash, &self.pool.strings) {
            Ok(t) => t,
            Err(e) => return Err(self.table_op_error(e)),
        };
        let size = t.mem_size();
        self.check_alloc(size)?;
        let id = TableId(self.pool.tables.alloc(t, self.gc.current_white, size as u32));
        self.gc.track_new_object(size);
        Ok(id)
    }

    pub(crate) fn new_closure_obj(&mut self, c: Closure) -> LuaResult<ClosureId> {
        let size = c.mem_size();
        self.check_alloc(size)?;
        let id = ClosureId(self.pool.closures.alloc(c, self.gc.current_white, size as u32));
        self.gc.track_new_object(size);
        Ok(id)
    }

    pub(crate) fn new_upvalue_obj(&mut self, u: Upvalue) -> LuaResult<UpvalueId> {
        let size = std::mem::size_of::<Upvalue>() + 16;
        self.check_alloc(size)?;
        let id = UpvalueId(self.pool.upvalues.alloc(u, self.gc.current_white, size as u32));
        self.gc.track_new_object(size);
        Ok(id)
    }

    pub(crate) fn new_userdata_obj(&mut self, size: usize) -> LuaResult<UserdataId> {
        let u = LuaUserdata::new(size);
        let mem = u.mem_size();
        self.check_alloc(mem)?;
        let id = UserdataId(self.pool.userdata.alloc(u, self.gc.current_white, mem as u32));
        self.gc.track_new_object(mem);
        Ok(id)
    }

    pub(crate) fn new_thread_obj(&mut self) -> LuaResult<ThreadId> {
        let extra = self
            .pool
            .thread(self.g.mainthread)
            .map(|t| t.extra_space)
            .unwrap_or(0);
        let th = LuaThread::new(extra);
        let size = th.mem_size();
        self.check_alloc(size)?;
        let id = ThreadId(self.pool.threads.alloc(th, self.gc.current_white, size as u32));
        self.gc.track_new_object(size);
        Ok(id)
    }

    /// Register a prototype built by the chunk loader.
    pub fn new_proto(&mut self, p: Proto) -> LuaResult<ProtoId> {
        let size = p.mem_size();
        self.check_alloc(size)?;
        let id = ProtoId(self.pool.protos.alloc(p, self.gc.current_white, size as u32));
        self.gc.track_new_object(size);
        Ok(id)
    }

    // ===== Metamethods =====

    /// Metatable governing a value: its own for tables and userdata, the
    /// per-type one otherwise.
    pub(crate) fn metatable_of(&self, v: &LuaValue) -> Option<TableId> {
        self.pool
            .own_metatable(v)
            .or_else(|| self.g.mt[v.ttype() as usize])
    }

    /// Metamethod lookup through the absence cache: a flag bit set on
    /// the metatable proves the event absent without a table lookup.
    pub(crate) fn fast_tm(&mut self, mt: Option<TableId>, ev: TmKind) -> Option<LuaValue> {
        let mt = mt?;
        if ev.has_flag() {
            if let Some(tb) = self.pool.tables.get(mt.0) {
                if tb.data.flags & ev.flag_bit() != 0 {
                    return None;
                }
            }
        }
        let name = LuaValue::short_string(self.g.tmname[ev as usize]);
        let tm = self.pool.table_get(mt, &name);
        if tm.is_nil() {
            if ev.has_flag() {
                if let Some(tb) = self.pool.tables.get_mut(mt.0) {
                    tb.data.flags |= ev.flag_bit();
                }
            }
            None
        } else {
            Some(tm)
        }
    }

    pub(crate) fn tm_by_value(&mut self, v: &LuaValue, ev: TmKind) -> Option<LuaValue> {
        let mt = self.metatable_of(v);
        self.fast_tm(mt, ev)
    }

    /// Attaching a metatable with `__gc` migrates the object to the
    /// finalizable population, exactly once.
    pub(crate) fn check_finalizer(&mut self, obj: &LuaValue) {
        let id = match obj.as_gc_id() {
            Some(id @ (GcId::Table(_) | GcId::Userdata(_))) => id,
            _ => return,
        };
        let already = self
            .pool
            .header(id)
            .map(|h| h.to_finalize())
            .unwrap_or(true);
        if already {
            return;
        }
        if self.tm_by_value(obj, TmKind::Gc).is_some() {
            if let Some(h) = self.pool.header_mut(id) {
                h.set_finalized();
            }
        }
    }

    // ===== Barriers =====

    /// Forward barrier wrapper: fires only on a black container taking a
    /// white referent.
    pub(crate) fn gc_barrier(&mut self, owner: GcId, v: &LuaValue) {
        let Some(vid) = v.as_gc_id() else { return };
        let owner_black = self
            .pool
            .header(owner)
            .map(|h| h.is_black())
            .unwrap_or(false);
        let ref_white = self
            .pool
            .header(vid)
            .map(|h| h.is_white())
            .unwrap_or(false);
        if owner_black && ref_white {
            self.gc.barrier(owner, vid, &mut self.pool);
        }
    }

    /// Backward barrier wrapper for table writes.
    pub(crate) fn table_barrier(&mut self, t: TableId, v: &LuaValue) {
        let table_black = self
            .pool
            .header(GcId::Table(t))
            .map(|h| h.is_black())
            .unwrap_or(false);
        if !table_black {
            return;
        }
        let ref_white = v
            .as_gc_id()
            .and_then(|id| self.pool.header(id))
            .map(|h| h.is_white())
            .unwrap_or(false);
        if ref_white {
            self.gc.barrier_back(t, &mut self.pool);
        }
    }

    // ===== Errors =====

    /// Raise with the error value already on top of the stack: run the
    /// active message handler (never re-entered), then unwind.
    pub(crate) fn raise_error_value(&mut self) -> LuaError {
        let ef = self.th().errfunc;
        if ef != 0 {
            self.th_mut().errfunc = 0;
            let handler = self.stack_at(ef);
            if handler.is_function() || handler.is_cfunction() {
                // stack: ... err  ->  ... handler err
                let err = self.pop_raw();
                let func_slot = self.th().top;
                if self.push_raw(handler).is_err() || self.push_raw(err).is_err() {
                    self.th_mut().errfunc = ef;
                    return LuaError::ErrErr;
                }
                let r = self.do_call(func_slot, 1);
                self.th_mut().errfunc = ef;
                if r.is_err() {
                    return LuaError::ErrErr;
                }
            } else {
                self.th_mut().errfunc = ef;
            }
        }
        LuaError::Runtime
    }

    /// Raise a runtime error with a message.
    pub fn run_error(&mut self, msg: &str) -> LuaError {
        match self.new_string_value(msg.as_bytes()) {
            Ok(v) => {
                if self.push_raw(v).is_err() {
                    return LuaError::Memory;
                }
                self.raise_error_value()
            }
            Err(e) => e,
        }
    }

    /// Raise the memory error: the preallocated message, no handler.
    pub(crate) fn throw_memory_error(&mut self) -> LuaError {
        let msg = LuaValue::short_string(self.g.strt.memerrmsg);
        let _ = self.push_raw(msg);
        LuaError::Memory
    }

    pub(crate) fn table_op_error(&mut self, e: TableOpError) -> LuaError {
        match e {
            TableOpError::NilIndex => self.run_error("table index is nil"),
            TableOpError::NanIndex => self.run_error("table index is NaN"),
            TableOpError::Overflow => self.run_error("table overflow"),
        }
    }

    /// Place the proper error value for `e` at `level`, truncating the
    /// stack there.
    pub(crate) fn set_error_obj(&mut self, e: LuaError, level: usize) {
        let v = match e {
            LuaError::Memory => LuaValue::short_string(self.g.strt.memerrmsg),
            LuaError::ErrErr => self
                .new_string_value(b"error in error handling")
                .unwrap_or_else(|_| LuaValue::short_string(self.g.strt.memerrmsg)),
            // runtime and syntax errors left their value on top
            _ => {
                let th = self.th();
                if th.top > 0 {
                    th.stack[th.top - 1]
                } else {
                    LuaValue::nil()
                }
            }
        };
        let th = self.th_mut();
        if level < th.stack.len() {
            th.stack[level] = v;
            th.top = level + 1;
        }
    }

    // ===== GC driving =====

    pub(crate) fn gc_roots(&self) -> GcRoots {
        GcRoots {
            registry: self.g.registry,
            mainthread: self.g.mainthread,
            running: self.current,
            mt: self.g.mt,
            tmname: self.g.tmname,
        }
    }

    /// Safe point: run a collector step when the debt asks for one.
    #[inline]
    pub(crate) fn check_gc(&mut self) {
        if self.gc.should_step() {
            self.gc_step_internal();
        }
    }

    /// One incremental step sized by the debt and the step multiplier.
    pub(crate) fn gc_step_internal(&mut self) {
        use crate::gc::StepResult;
        let mut work = self.gc.step_budget();
        loop {
            let roots = self.gc_roots();
            let res = self
                .gc
                .single_step(&roots, &mut self.pool, &mut self.g.strt, false);
            match res {
                StepResult::Work(w) => {
                    work -= w as isize;
                    if work <= 0 {
                        break;
                    }
                }
                StepResult::Atomic => break,
                StepResult::Finalize => {
                    self.run_one_finalizer();
                    work -= 100;
                    if work <= 0 {
                        break;
                    }
                }
                StepResult::Pause => {
                    self.gc.set_pause();
                    return;
                }
            }
        }
        self.gc.pay_step_debt();
    }

    /// Run a complete collection cycle right now.
    pub fn full_gc(&mut self) {
        self.full_gc_internal(false);
    }

    pub(crate) fn full_gc_internal(&mut self, emergency: bool) {
        use crate::gc::{GcState, StepResult};
        self.gc.emergency = emergency;
        // finish whatever cycle is in flight
        self.run_until_pause(emergency);
        // then run one entire fresh cycle
        loop {
            let roots = self.gc_roots();
            match self
                .gc
                .single_step(&roots, &mut self.pool, &mut self.g.strt, true)
            {
                StepResult::Pause => break,
                StepResult::Finalize => {
                    if emergency {
                        // finalizers cannot run mid-allocation; keep them queued
                        self.gc.state = GcState::Pause;
                        break;
                    }
                    self.run_one_finalizer();
                }
                _ => {}
            }
        }
        self.gc.set_pause();
        self.gc.emergency = false;
    }

    fn run_until_pause(&mut self, emergency: bool) {
        use crate::gc::{GcState, StepResult};
        while self.gc.state != GcState::Pause {
            let roots = self.gc_roots();
            match self
                .gc
                .single_step(&roots, &mut self.pool, &mut self.g.strt, true)
            {
                StepResult::Pause => break,
                StepResult::Finalize => {
                    if emergency {
                        self.gc.state = GcState::Pause;
                        break;
                    }
                    self.run_one_finalizer();
                }
                _ => {}
            }
        }
    }

    /// Pop one object from the to-be-finalized queue and run its `__gc`
    /// metamethod in protected mode. Errors are reported through the
    /// warning surface and discarded so collection can continue.
    pub(crate) fn run_one_finalizer(&mut self) {
        if self.gc.tobefnz.is_empty() {
            return;
        }
        let id = self.gc.tobefnz.remove(0);
        // back to the ordinary population: a later death is final
        if let Some(h) = self.pool.header_mut(id) {
            h.clear_finalized();
        }
        let obj = match id {
            GcId::Table(t) => LuaValue::table(t),
            GcId::Userdata(u) => LuaValue::userdata(u),
            _ => return,
        };
        let Some(tm) = self.tm_by_value(&obj, TmKind::Gc) else {
            return;
        };
        if !(tm.is_function() || tm.is_cfunction()) {
            return;
        }
        let was_running = self.gc.running;
        self.gc.running = false; // no collection inside a finalizer
        let (saved_nny, saved_hook) = {
            let th = self.th_mut();
            let saved = (th.nny, th.allow_hook);
            th.nny += 1; // finalizers may not yield
            th.allow_hook = false;
            saved
        };
        let base = self.th().top;
        let status = (|| -> LuaResult<()> {
            self.push_raw(tm)?;
            self.push_raw(obj)?;
            self.protected_body(base, 0)
        })();
        {
            let th = self.th_mut();
            th.nny = saved_nny;
            th.allow_hook = saved_hook;
        }
        self.gc.running = was_running;
        if let Err(e) = status {
            let msg = match e {
                LuaError::Memory => "not enough memory in __gc metamethod".to_string(),
                _ => {
                    let v = if self.th().top > base {
                        self.stack_at(self.th().top - 1)
                    } else {
                        LuaValue::nil()
                    };
                    format!("error in __gc metamethod ({})", self.describe_value(&v))
                }
            };
            self.warn(&msg);
        }
        // drop anything the finalizer left behind
        self.th_mut().top = base;
    }

    /// Short human-readable rendering for diagnostics.
    pub(crate) fn describe_value(&self, v: &LuaValue) -> String {
        if let Some(id) = v.as_string_id() {
            if let Some(bytes) = self.pool.string_bytes(id) {
                return String::from_utf8_lossy(bytes).into_owned();
            }
        }
        format!("{:?}", v)
    }

    // ===== Teardown =====

    /// Run every pending finalizer and release the state. Dropping the
    /// state does the same.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.current = self.g.mainthread;
        // every finalizable object gets its __gc now, reachable or not
        self.gc.separate_tobefnz(true, &mut self.pool);
        while !self.gc.tobefnz.is_empty() {
            self.run_one_finalizer();
        }
        // arenas, stacks and the string table are dropped with the value
    }
}

impl Drop for Lua {
    fn drop(&mut self) {
        self.close();
    }
}

impl Default for Lua {
    fn default() -> Self {
        Lua::new()
    }
}
