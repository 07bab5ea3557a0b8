// Call machinery: frame entry and exit, protected calls, coroutines
// and chunk loading.
//
// Errors unwind as `Err` values; every protected call is a recovery
// point that restores the saved top and call-info depth and converts
// the error kind into a status. A yield is the same mechanism with a
// distinguished kind that only `resume` catches.

use crate::gc::{GcId, ObjectPool, ThreadId, UpvalueId};
use crate::lua_value::{Closure, LClosure, LuaValue, Upvalue};
use crate::lua_vm::call_info::{CallInfo, CallKind, call_status};
use crate::lua_vm::lua_error::{LuaError, LuaResult, ThreadStatus};
use crate::lua_vm::lua_limits::{
    EXTRA_STACK, LUA_MINSTACK, LUA_MULTRET, LUAI_MAXCCALLS, MAXTAGLOOP,
};
use crate::lua_vm::metamethod::TmKind;
use crate::lua_vm::zio::{Reader, Zio};
use crate::lua_vm::{
    CFunction, Hook, HookEvent, KFunction, LoadMode, LUA_MASKCALL, LUA_MASKRET, Lua,
};

use super::stack::Place;

impl Lua {
    // ===== Core call path =====

    /// Invoke the value at `func_slot` with the arguments above it.
    /// On return the results start at `func_slot`.
    pub(crate) fn do_call(&mut self, func_slot: usize, nresults: i32) -> LuaResult<()> {
        let ncalls = {
            let th = self.th_mut();
            th.n_ccalls += 1;
            th.n_ccalls
        };
        if ncalls >= LUAI_MAXCCALLS {
            let r = if ncalls == LUAI_MAXCCALLS {
                Err(self.run_error("C stack overflow"))
            } else {
                // error while handling the overflow error
                Err(LuaError::ErrErr)
            };
            self.th_mut().n_ccalls -= 1;
            return r;
        }
        let r = self.precall_dispatch(func_slot, nresults);
        self.th_mut().n_ccalls -= 1;
        r
    }

    fn precall_dispatch(&mut self, func_slot: usize, nresults: i32) -> LuaResult<()> {
        let mut loops = 0usize;
        loop {
            let func = self.stack_at(func_slot);
            if func.is_cfunction() {
                return self.precall_host(func_slot, nresults, func.fvalue());
            }
            if func.is_host_closure() {
                let f = func
                    .as_closure_id()
                    .and_then(|id| self.pool.closure(id))
                    .and_then(|c| c.as_host())
                    .map(|c| c.f);
                match f {
                    Some(f) => return self.precall_host(func_slot, nresults, f),
                    None => return Err(self.run_error("attempt to call a stale closure")),
                }
            }
            if func.is_lua_closure() {
                return self.precall_lua(func_slot, nresults);
            }
            // not a function: try its __call metamethod with the original
            // value as first argument
            loops += 1;
            if loops > MAXTAGLOOP {
                return Err(self.run_error("'__call' chain too long; possible loop"));
            }
            let Some(tm) = self.tm_by_value(&func, TmKind::Call) else {
                let name = func.type_name();
                return Err(self.run_error(&format!("attempt to call a {} value", name)));
            };
            self.ensure_stack(1)?;
            let th = self.th_mut();
            let top = th.top;
            let mut i = top;
            while i > func_slot {
                th.stack[i] = th.stack[i - 1];
                i -= 1;
            }
            th.top = top + 1;
            th.stack[func_slot] = tm;
        }
    }

    fn precall_host(&mut self, func_slot: usize, nresults: i32, f: CFunction) -> LuaResult<()> {
        self.ensure_stack(LUA_MINSTACK)?;
        {
            let th = self.th_mut();
            let errfunc = th.errfunc;
            let ci = CallInfo::new_host(func_slot, th.top + LUA_MINSTACK, nresults, errfunc);
            th.push_ci(ci);
        }
        self.call_hook(HookEvent::Call);
        let n = f(self)?;
        let n = n.max(0) as usize;
        self.call_hook(HookEvent::Return);
        self.poscall(n, nresults);
        Ok(())
    }

    fn precall_lua(&mut self, func_slot: usize, nresults: i32) -> LuaResult<()> {
        let func = self.stack_at(func_slot);
        let proto = func
            .as_closure_id()
            .and_then(|id| self.pool.closure(id))
            .and_then(|c| c.as_lua())
            .map(|l| l.proto)
            .and_then(|p| self.pool.proto(p));
        let (nparams, maxstack) = match proto {
            Some(p) => (p.num_params as usize, p.max_stack_size as usize),
            None => return Err(self.run_error("attempt to call a stale closure")),
        };
        let nargs = self.th().top - func_slot - 1;
        if nargs < nparams {
            self.ensure_stack(nparams - nargs)?;
            let th = self.th_mut();
            for _ in nargs..nparams {
                let top = th.top;
                th.stack[top] = LuaValue::nil();
                th.top += 1;
            }
        }
        self.ensure_stack(maxstack + EXTRA_STACK)?;
        let base = func_slot + 1;
        {
            let th = self.th_mut();
            let ci = CallInfo::new_lua(func_slot, base, base + maxstack, nresults);
            th.push_ci(ci);
            th.top = base + maxstack;
        }
        self.call_hook(HookEvent::Call);
        let n = self.execute_frame()?;
        let n = n.max(0) as usize;
        self.call_hook(HookEvent::Return);
        self.poscall(n, nresults);
        Ok(())
    }

    /// Run the current language-closure frame through the external VM.
    fn execute_frame(&mut self) -> LuaResult<i32> {
        match self.executor {
            Some(execute) => {
                let n = execute(self)?;
                Ok(n.max(0))
            }
            None => Err(self.run_error("no bytecode executor installed")),
        }
    }

    /// Finish a call: move the top `nres` values down over the function
    /// slot, pad or truncate to what the caller expects, pop the frame.
    pub(crate) fn poscall(&mut self, nres: usize, wanted: i32) {
        let th = self.th_mut();
        let func = th.ci().func;
        let first = th.top - nres;
        let want = if wanted == LUA_MULTRET {
            nres
        } else {
            wanted.max(0) as usize
        };
        for i in 0..want.min(nres) {
            th.stack[func + i] = th.stack[first + i];
        }
        for i in nres..want {
            th.stack[func + i] = LuaValue::nil();
        }
        th.top = func + want;
        th.pop_ci();
    }

    // ===== Public call surface =====

    /// Call: pops the function and `nargs` arguments, pushes `nresults`
    /// results (all of them for LUA_MULTRET). Not yieldable.
    pub fn call(&mut self, nargs: i32, nresults: i32) -> LuaResult<()> {
        let func_slot = self.th().top - nargs as usize - 1;
        let saved_nny = self.th().nny;
        self.th_mut().nny += 1;
        let r = self.do_call(func_slot, nresults);
        self.th_mut().nny = saved_nny;
        if let Err(e) = r {
            if e != LuaError::Yield && self.protection_depth == 0 {
                self.unprotected_error();
            }
            return Err(e);
        }
        self.check_gc();
        Ok(())
    }

    /// Call with a continuation: yieldable. The continuation is invoked
    /// in place of the return path if the callee yields and is later
    /// resumed.
    pub fn call_k(&mut self, nargs: i32, nresults: i32, ctx: i64, k: KFunction) -> LuaResult<()> {
        {
            let th = self.th_mut();
            if let CallKind::Host {
                k: slot_k,
                ctx: slot_ctx,
                ..
            } = &mut th.ci_mut().u
            {
                *slot_k = Some(k);
                *slot_ctx = ctx;
            }
        }
        let func_slot = self.th().top - nargs as usize - 1;
        let r = self.do_call(func_slot, nresults);
        if let Err(e) = r {
            if e != LuaError::Yield && self.protection_depth == 0 {
                self.unprotected_error();
            }
            return Err(e);
        }
        self.check_gc();
        Ok(())
    }

    /// Protected call. Pops function and arguments; on success pushes
    /// the results, on error pushes exactly the error value. Returns the
    /// outcome as a status.
    pub fn pcall(&mut self, nargs: i32, nresults: i32, errfunc: i32) -> ThreadStatus {
        let func_slot = self.th().top - nargs as usize - 1;
        let ef_abs = if errfunc == 0 {
            0
        } else {
            match self.resolve_index(errfunc) {
                Place::Stack(abs) => abs,
                _ => 0,
            }
        };
        let saved_ef = self.th().errfunc;
        let saved_nny = self.th().nny;
        {
            let th = self.th_mut();
            th.errfunc = ef_abs;
            th.nny += 1;
        }
        let r = self.protected_body(func_slot, nresults);
        {
            let th = self.th_mut();
            th.errfunc = saved_ef;
            th.nny = saved_nny;
        }
        match r {
            Ok(()) => {
                self.check_gc();
                ThreadStatus::Ok
            }
            Err(e) => ThreadStatus::from_error(e),
        }
    }

    /// Protected call with a continuation: yields pass through and the
    /// continuation finishes the call after resumption.
    pub fn pcall_k(
        &mut self,
        nargs: i32,
        nresults: i32,
        errfunc: i32,
        ctx: i64,
        k: KFunction,
    ) -> LuaResult<ThreadStatus> {
        let func_slot = self.th().top - nargs as usize - 1;
        let ef_abs = if errfunc == 0 {
            0
        } else {
            match self.resolve_index(errfunc) {
                Place::Stack(abs) => abs,
                _ => 0,
            }
        };
        {
            let th = self.th_mut();
            th.ci_mut().callstatus |= call_status::CIST_YPCALL;
            if let CallKind::Host {
                k: slot_k,
                ctx: slot_ctx,
                ..
            } = &mut th.ci_mut().u
            {
                *slot_k = Some(k);
                *slot_ctx = ctx;
            }
        }
        let saved_ef = self.th().errfunc;
        self.th_mut().errfunc = ef_abs;
        let r = self.protected_body(func_slot, nresults);
        self.th_mut().errfunc = saved_ef;
        match r {
            Ok(()) => {
                self.check_gc();
                Ok(ThreadStatus::Ok)
            }
            Err(LuaError::Yield) => Err(LuaError::Yield),
            Err(e) => Ok(ThreadStatus::from_error(e)),
        }
    }

    /// The recovery point shared by `pcall`, `resume` and the finalizer
    /// runner: run the call, and on error restore the frame chain, close
    /// upvalues and leave the proper error value at the function slot.
    pub(crate) fn protected_body(&mut self, func_slot: usize, nresults: i32) -> LuaResult<()> {
        let (saved_ci, saved_nny, saved_ccalls) = {
            let th = self.th();
            (th.ci_depth, th.nny, th.n_ccalls)
        };
        self.protection_depth += 1;
        let r = self.do_call(func_slot, nresults);
        self.protection_depth -= 1;
        match r {
            Ok(()) => Ok(()),
            Err(LuaError::Yield) => Err(LuaError::Yield),
            Err(e) => {
                self.close_upvalues(self.current, func_slot);
                {
                    let th = self.th_mut();
                    th.ci_depth = saved_ci;
                    th.nny = saved_nny;
                    th.n_ccalls = saved_ccalls;
                }
                self.set_error_obj(e, func_slot);
                self.th_mut().shrink_ci();
                Err(e)
            }
        }
    }

    /// An error escaped every protected call: give the panic handler its
    /// chance before returning to the host.
    fn unprotected_error(&mut self) {
        if let Some(panic) = self.g.panic {
            panic(self);
        }
    }

    /// Raise an error with the value on top of the stack. Returns the
    /// kind to propagate with `Err`; this function never succeeds.
    pub fn error(&mut self) -> LuaError {
        self.raise_error_value()
    }

    // ===== Upvalues =====

    /// Find or create the open upvalue of `thread` at stack `level`.
    pub fn find_upvalue(&mut self, thread: ThreadId, level: usize) -> LuaResult<UpvalueId> {
        let existing = self.pool.thread(thread).and_then(|th| {
            th.open_upvals.iter().copied().find(|&u| {
                self.pool
                    .upvalues
                    .get(u.0)
                    .and_then(|b| b.data.open_level())
                    == Some(level)
            })
        });
        if let Some(u) = existing {
            return Ok(u);
        }
        let u = self.new_upvalue_obj(Upvalue::Open { thread, level })?;
        // keep the list sorted by descending stack level
        let levels: Vec<(UpvalueId, usize)> = {
            let ObjectPool { threads, upvalues, .. } = &mut self.pool;
            let Some(th) = threads.get_mut(thread.0) else {
                return Ok(u);
            };
            th.data.open_upvals.push(u);
            th.data
                .open_upvals
                .iter()
                .map(|&e| {
                    let l = upvalues
                        .get(e.0)
                        .and_then(|b| b.data.open_level())
                        .unwrap_or(0);
                    (e, l)
                })
                .collect()
        };
        let mut sorted = levels;
        sorted.sort_unstable_by(|a, b| b.1.cmp(&a.1));
        if let Some(th) = self.pool.thread_mut(thread) {
            th.open_upvals = sorted.into_iter().map(|(e, _)| e).collect();
        }
        Ok(u)
    }

    /// Close every open upvalue of `thread` at or above `level`, moving
    /// the current stack values into detached cells.
    pub(crate) fn close_upvalues(&mut self, thread: ThreadId, level: usize) {
        let list = match self.pool.thread_mut(thread) {
            Some(th) => std::mem::take(&mut th.open_upvals),
            None => return,
        };
        let mut keep = Vec::with_capacity(list.len());
        let mut close = Vec::new();
        for u in list {
            match self
                .pool
                .upvalues
                .get(u.0)
                .and_then(|b| b.data.open_level())
            {
                Some(l) if l >= level => {
                    let v = self
                        .pool
                        .thread(thread)
                        .and_then(|th| th.stack.get(l).copied())
                        .unwrap_or_default();
                    close.push((u, v));
                }
                Some(_) => keep.push(u),
                None => {}
            }
        }
        if let Some(th) = self.pool.thread_mut(thread) {
            th.open_upvals = keep;
        }
        for (u, v) in close {
            if let Some(up) = self.pool.upvalues.get_mut(u.0) {
                up.data = Upvalue::Closed(v);
            }
            self.gc_barrier(GcId::Upvalue(u), &v);
        }
    }

    /// Read upvalue `n` (1-based) of the closure at `idx`, pushing it.
    pub fn get_upvalue(&mut self, idx: i32, n: usize) -> LuaResult<bool> {
        let Some(cid) = self.value_or_nil(idx).as_closure_id() else {
            return Ok(false);
        };
        let v = match self.pool.closure(cid) {
            Some(Closure::Host(h)) => match h.upvalue.get(n - 1) {
                Some(v) => *v,
                None => return Ok(false),
            },
            Some(Closure::Lua(l)) => match l.upvals.get(n - 1) {
                Some(&u) => self.pool.upvalue_value(u),
                None => return Ok(false),
            },
            None => return Ok(false),
        };
        self.push_raw(v)?;
        Ok(true)
    }

    /// Pop a value into upvalue `n` of the closure at `idx`.
    pub fn set_upvalue(&mut self, idx: i32, n: usize) -> LuaResult<bool> {
        let Some(cid) = self.value_or_nil(idx).as_closure_id() else {
            return Ok(false);
        };
        let v = self.pop_raw();
        let ok = match self.pool.closures.get_mut(cid.0).map(|c| &mut c.data) {
            Some(Closure::Host(h)) => match h.upvalue.get_mut(n - 1) {
                Some(slot) => {
                    *slot = v;
                    true
                }
                None => false,
            },
            Some(Closure::Lua(l)) => match l.upvals.get(n - 1).copied() {
                Some(u) => {
                    self.pool.set_upvalue_value(u, v);
                    self.gc_barrier(GcId::Upvalue(u), &v);
                    true
                }
                None => false,
            },
            None => false,
        };
        if ok {
            self.gc_barrier(GcId::Closure(cid), &v);
        }
        Ok(ok)
    }

    /// Make upvalue `n1` of the closure at `idx1` refer to the same cell
    /// as upvalue `n2` of the closure at `idx2`. Both must be
    /// language-level closures.
    pub fn upvalue_join(&mut self, idx1: i32, n1: usize, idx2: i32, n2: usize) -> LuaResult<()> {
        let c1 = self.value_or_nil(idx1).as_closure_id();
        let c2 = self.value_or_nil(idx2).as_closure_id();
        let (Some(c1), Some(c2)) = (c1, c2) else {
            return Err(self.run_error("closure expected"));
        };
        let shared = match self.pool.closure(c2) {
            Some(Closure::Lua(l)) => l.upvals.get(n2 - 1).copied(),
            _ => None,
        };
        let Some(shared) = shared else {
            return Err(self.run_error("invalid upvalue index"));
        };
        match self.pool.closures.get_mut(c1.0).map(|c| &mut c.data) {
            Some(Closure::Lua(l)) => {
                if n1 == 0 || n1 > l.upvals.len() {
                    return Err(self.run_error("invalid upvalue index"));
                }
                l.upvals[n1 - 1] = shared;
            }
            _ => return Err(self.run_error("closure expected")),
        }
        self.gc_barrier(GcId::Closure(c1), &LuaValue::nil());
        Ok(())
    }

    // ===== Coroutines =====

    /// Create a suspended thread and push it.
    pub fn new_thread(&mut self) -> LuaResult<ThreadId> {
        let id = self.new_thread_obj()?;
        self.push_raw(LuaValue::thread(id))?;
        self.check_gc();
        Ok(id)
    }

    /// Resume `co` with `nargs` arguments already pushed on its stack
    /// (after the body function, for a first resume). Yielded values or
    /// results stay on the coroutine's stack; errors leave the error
    /// value there.
    pub fn resume(&mut self, co: ThreadId, nargs: i32) -> ThreadStatus {
        if co == self.current {
            return self.resume_error(co, "cannot resume non-suspended coroutine");
        }
        let status = match self.pool.thread(co) {
            Some(th) => th.status,
            None => return ThreadStatus::ErrRun,
        };
        let fresh = match status {
            ThreadStatus::Ok => {
                let at_base = self.pool.thread(co).map(|t| t.at_base()).unwrap_or(false);
                if !at_base {
                    return self.resume_error(co, "cannot resume non-suspended coroutine");
                }
                true
            }
            ThreadStatus::Yield => false,
            _ => return self.resume_error(co, "cannot resume dead coroutine"),
        };

        let prev = self.current;
        self.current = co;
        {
            let th = self.th_mut();
            th.status = ThreadStatus::Ok;
            th.nny = 0; // the body may yield
        }
        self.protection_depth += 1;
        let r = if fresh {
            let func_slot = self.th().top - nargs as usize - 1;
            self.do_call(func_slot, LUA_MULTRET)
        } else {
            self.finish_suspended(nargs)
        };
        self.protection_depth -= 1;

        let out = match r {
            Ok(()) => ThreadStatus::Ok,
            Err(LuaError::Yield) => {
                self.th_mut().status = ThreadStatus::Yield;
                ThreadStatus::Yield
            }
            Err(e) => {
                let st = ThreadStatus::from_error(e);
                self.th_mut().status = st;
                // the error value is already on top (set by the raise
                // path); keep the stack otherwise intact for inspection
                st
            }
        };
        self.th_mut().nny = 1; // no yields while not running
        self.current = prev;
        out
    }

    /// Continue a thread suspended inside a host call: restore the
    /// narrowed frame, run its continuation, then unwind the remaining
    /// interrupted frames.
    fn finish_suspended(&mut self, nargs: i32) -> LuaResult<()> {
        let entry_depth;
        {
            let th = self.th_mut();
            entry_depth = 1;
            let extra = th.ci().extra;
            th.ci_mut().func = extra;
        }
        let ci = *self.th().ci();
        if ci.is_host() {
            let nres = match ci.continuation() {
                Some((k, ctx)) => k(self, ThreadStatus::Yield, ctx)?.max(0) as usize,
                None => nargs.max(0) as usize, // resume arguments become results
            };
            let wanted = ci.nresults;
            self.poscall(nres, wanted);
        }
        self.unroll(entry_depth)
    }

    /// Re-drive every frame left suspended below a yield.
    fn unroll(&mut self, entry_depth: usize) -> LuaResult<()> {
        while self.th().ci_depth > entry_depth {
            let ci = *self.th().ci();
            if ci.is_lua() {
                let n = self.execute_frame()?;
                self.poscall(n as usize, ci.nresults);
            } else {
                let nres = match ci.continuation() {
                    Some((k, ctx)) => k(self, ThreadStatus::Yield, ctx)?.max(0) as usize,
                    None => 0,
                };
                self.poscall(nres, ci.nresults);
            }
        }
        Ok(())
    }

    fn resume_error(&mut self, co: ThreadId, msg: &str) -> ThreadStatus {
        let v = self
            .new_string_value(msg.as_bytes())
            .unwrap_or(LuaValue::nil());
        if let Some(th) = self.pool.thread_mut(co) {
            let top = th.top;
            if top < th.stack.len() {
                th.stack[top] = v;
                th.top = top + 1;
            }
        }
        ThreadStatus::ErrRun
    }

    /// Suspend the running coroutine, returning the top `nresults`
    /// values to `resume`. Returns the unwind signal to propagate; use
    /// as `return lua.yield_k(n, 0, None)` from a host function.
    pub fn yield_k(
        &mut self,
        nresults: i32,
        ctx: i64,
        k: Option<KFunction>,
    ) -> LuaResult<i32> {
        if self.th().nny > 0 {
            let msg = if self.current == self.g.mainthread {
                "attempt to yield from outside a coroutine"
            } else {
                "attempt to yield across a C-call boundary"
            };
            return Err(self.run_error(msg));
        }
        {
            let th = self.th_mut();
            th.status = ThreadStatus::Yield;
            let top = th.top;
            let func = th.ci().func;
            let ci = th.ci_mut();
            ci.extra = func; // restored on resume
            // narrow the frame so only the yielded values are visible
            ci.func = top - nresults.max(0) as usize - 1;
            if let CallKind::Host {
                k: slot_k,
                ctx: slot_ctx,
                ..
            } = &mut ci.u
            {
                *slot_k = k;
                *slot_ctx = ctx;
            }
        }
        Err(LuaError::Yield)
    }

    /// Yield without a continuation.
    pub fn do_yield(&mut self, nresults: i32) -> LuaResult<i32> {
        self.yield_k(nresults, 0, None)
    }

    /// Whether the current frame may yield.
    pub fn is_yieldable(&self) -> bool {
        self.th().nny == 0
    }

    /// Status of a thread as the API reports it.
    pub fn thread_status(&self, co: ThreadId) -> ThreadStatus {
        self.pool.thread(co).map(|t| t.status).unwrap_or_default()
    }

    // ===== Chunk loading =====

    /// Compile a chunk through the installed loader and push the
    /// resulting closure; its first upvalue is set to the globals table.
    pub fn load(&mut self, reader: &mut dyn Reader, chunkname: &str, mode: LoadMode) -> ThreadStatus {
        let Some(loader) = self.loader else {
            let _ = self.push_string("no chunk loader installed");
            return ThreadStatus::ErrSyntax;
        };
        let mut zio = Zio::new(reader);
        match loader(self, &mut zio, chunkname, mode) {
            Ok(proto) => {
                // anchor the prototype on the stack while the closure is
                // assembled, so an emergency collection cannot take it
                if self.push_raw(LuaValue::proto(proto)).is_err() {
                    return ThreadStatus::ErrMem;
                }
                let nupvals = self
                    .pool
                    .proto(proto)
                    .map(|p| p.upvalues.len())
                    .unwrap_or(0);
                let build = (|| -> LuaResult<()> {
                    let cid = self.new_closure_obj(Closure::Lua(LClosure {
                        proto,
                        upvals: Vec::new(),
                    }))?;
                    // the closure replaces the prototype as the anchor
                    let top = self.th().top;
                    self.stack_write(top - 1, LuaValue::lua_closure(cid));
                    // fresh upvalues become reachable through the closure
                    // as soon as each one exists
                    for _ in 0..nupvals {
                        let u = self.new_upvalue_obj(Upvalue::Closed(LuaValue::nil()))?;
                        if let Some(c) = self.pool.closures.get_mut(cid.0) {
                            if let Closure::Lua(l) = &mut c.data {
                                l.upvals.push(u);
                            }
                        }
                    }
                    if nupvals >= 1 {
                        let globals = self.globals_table();
                        let u = self
                            .pool
                            .closure(cid)
                            .and_then(|c| c.as_lua())
                            .and_then(|l| l.upvals.first().copied());
                        if let Some(u) = u {
                            self.pool.set_upvalue_value(u, globals);
                            self.gc_barrier(GcId::Upvalue(u), &globals);
                        }
                    }
                    Ok(())
                })();
                match build {
                    Ok(()) => {
                        self.check_gc();
                        ThreadStatus::Ok
                    }
                    Err(e) => {
                        // stack holds [anchor, error value]; drop the anchor
                        self.remove(-2);
                        ThreadStatus::from_error(e)
                    }
                }
            }
            Err(msg) => {
                if self.push_lstring(msg.as_bytes()).is_err() {
                    return ThreadStatus::ErrMem;
                }
                ThreadStatus::ErrSyntax
            }
        }
    }

    // ===== Hooks =====

    /// Install (or clear) the debug hook of the current thread.
    pub fn set_hook(&mut self, hook: Option<Hook>, mask: u8) {
        let th = self.th_mut();
        th.hook = hook;
        th.hook_mask = if hook.is_some() { mask } else { 0 };
    }

    pub fn get_hook_mask(&self) -> u8 {
        self.th().hook_mask
    }

    pub(crate) fn call_hook(&mut self, event: HookEvent) {
        let (hook, mask, allow) = {
            let th = self.th();
            (th.hook, th.hook_mask, th.allow_hook)
        };
        let bit = match event {
            HookEvent::Call => LUA_MASKCALL,
            HookEvent::Return => LUA_MASKRET,
        };
        if !allow || mask & bit == 0 {
            return;
        }
        let Some(hook) = hook else { return };
        self.th_mut().allow_hook = false; // no recursive hooks
        hook(self, event);
        self.th_mut().allow_hook = true;
    }
}
