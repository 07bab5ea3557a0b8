// Positional stack API: index resolution, push operations, reads and
// stack shuffling.
//
// Positive indices count from the current frame's function slot;
// negative ones from the top; pseudo-indices name the registry and the
// running host closure's upvalues.

use crate::gc::{ClosureId, GcId};
use crate::lua_value::{CClosure, Closure, LuaValue};
use crate::lua_vm::lua_error::{LuaError, LuaResult};
use crate::lua_vm::lua_limits::{
    EXTRA_STACK, LUA_REGISTRYINDEX, LUAI_MAXSTACK, MAXUPVAL,
};
use crate::lua_vm::{CFunction, Lua};

/// Basic value types as seen through the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaType {
    None,
    Nil,
    Boolean,
    LightUserdata,
    Number,
    String,
    Table,
    Function,
    Userdata,
    Thread,
}

impl LuaType {
    pub fn name(self) -> &'static str {
        match self {
            LuaType::None => "no value",
            LuaType::Nil => "nil",
            LuaType::Boolean => "boolean",
            LuaType::LightUserdata | LuaType::Userdata => "userdata",
            LuaType::Number => "number",
            LuaType::String => "string",
            LuaType::Table => "table",
            LuaType::Function => "function",
            LuaType::Thread => "thread",
        }
    }
}

/// Where an API index points.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Place {
    Stack(usize),
    Registry,
    /// Upvalue `i` (0-based) of the running host closure.
    Upvalue(ClosureId, usize),
    /// Acceptable but empty (beyond the top, or a missing upvalue).
    None,
}

impl Lua {
    // ===== Index resolution =====

    pub(crate) fn resolve_index(&self, idx: i32) -> Place {
        let th = self.th();
        let func = th.ci().func;
        if idx > 0 {
            let abs = func + idx as usize;
            if abs >= th.top {
                Place::None
            } else {
                Place::Stack(abs)
            }
        } else if idx > LUA_REGISTRYINDEX {
            if idx == 0 || (-idx) as usize > th.top - (func + 1) {
                Place::None
            } else {
                Place::Stack((th.top as i64 + idx as i64) as usize)
            }
        } else if idx == LUA_REGISTRYINDEX {
            Place::Registry
        } else {
            // upvalues of the running host closure
            let i = (LUA_REGISTRYINDEX - idx) as usize; // 1-based
            let fv = self.stack_at(func);
            match fv.as_closure_id() {
                Some(cid) if fv.is_host_closure() => {
                    let n = self
                        .pool
                        .closure(cid)
                        .map(|c| c.n_upvalues())
                        .unwrap_or(0);
                    if i <= n {
                        Place::Upvalue(cid, i - 1)
                    } else {
                        Place::None
                    }
                }
                _ => Place::None,
            }
        }
    }

    /// Value at an index; `None` for invalid/absent indices.
    pub(crate) fn value_at(&self, idx: i32) -> Option<LuaValue> {
        match self.resolve_index(idx) {
            Place::Stack(abs) => Some(self.stack_at(abs)),
            Place::Registry => Some(self.g.registry),
            Place::Upvalue(cid, i) => self
                .pool
                .closure(cid)
                .and_then(|c| c.as_host())
                .and_then(|c| c.upvalue.get(i).copied()),
            Place::None => None,
        }
    }

    /// Value at an index, nil when absent.
    #[inline]
    pub(crate) fn value_or_nil(&self, idx: i32) -> LuaValue {
        self.value_at(idx).unwrap_or_default()
    }

    /// Store into an index; fires the barrier needed for upvalue slots.
    pub(crate) fn set_index(&mut self, idx: i32, v: LuaValue) {
        match self.resolve_index(idx) {
            Place::Stack(abs) => self.stack_write(abs, v),
            Place::Registry => {} // the registry slot itself is immutable
            Place::Upvalue(cid, i) => {
                if let Some(c) = self.pool.closures.get_mut(cid.0) {
                    if let Closure::Host(h) = &mut c.data {
                        if let Some(slot) = h.upvalue.get_mut(i) {
                            *slot = v;
                        }
                    }
                }
                self.gc_barrier(GcId::Closure(cid), &v);
            }
            Place::None => {}
        }
    }

    /// Convert an acceptable index to an absolute positive one.
    pub fn abs_index(&self, idx: i32) -> i32 {
        if idx > 0 || idx <= LUA_REGISTRYINDEX {
            idx
        } else {
            let th = self.th();
            (th.top - th.ci().func) as i32 + idx
        }
    }

    // ===== Top management =====

    /// Number of values on the current frame.
    pub fn get_top(&self) -> i32 {
        let th = self.th();
        (th.top - (th.ci().func + 1)) as i32
    }

    /// Set the frame's value count: grows with nils, or truncates.
    pub fn set_top(&mut self, idx: i32) -> LuaResult<()> {
        let (func, top) = {
            let th = self.th();
            (th.ci().func, th.top)
        };
        let new_top = if idx >= 0 {
            func + 1 + idx as usize
        } else {
            debug_assert!((-(idx + 1)) as usize <= top - (func + 1));
            (top as i64 + idx as i64 + 1) as usize
        };
        if new_top > top {
            self.ensure_stack(new_top - top)?;
        }
        let th = self.th_mut();
        for i in top..new_top {
            th.stack[i] = LuaValue::nil();
        }
        th.top = new_top;
        Ok(())
    }

    /// Pop `n` values.
    pub fn pop(&mut self, n: i32) {
        let _ = self.set_top(-n - 1);
    }

    /// Ensure `n` free stack slots, growing within the hard limit.
    /// Returns false (without raising) when the space cannot be granted.
    pub fn check_stack(&mut self, n: usize) -> bool {
        let (space, top) = {
            let th = self.th();
            (th.stack_space(), th.top)
        };
        let ok = if space > n {
            true
        } else if top.saturating_add(n).saturating_add(EXTRA_STACK) > LUAI_MAXSTACK {
            false
        } else {
            self.grow_stack(n).is_ok()
        };
        if ok {
            let th = self.th_mut();
            let wanted = th.top + n;
            let ci = th.ci_mut();
            if ci.top < wanted {
                ci.top = wanted;
            }
        }
        ok
    }

    // ===== Push group =====

    pub fn push_nil(&mut self) -> LuaResult<()> {
        self.push_raw(LuaValue::nil())
    }

    pub fn push_boolean(&mut self, b: bool) -> LuaResult<()> {
        self.push_raw(LuaValue::boolean(b))
    }

    pub fn push_integer(&mut self, i: i64) -> LuaResult<()> {
        self.push_raw(LuaValue::integer(i))
    }

    pub fn push_number(&mut self, n: f64) -> LuaResult<()> {
        self.push_raw(LuaValue::float(n))
    }

    /// Push a byte string (interned when short). May allocate, hence may
    /// run a collection step.
    pub fn push_lstring(&mut self, bytes: &[u8]) -> LuaResult<()> {
        let v = self.new_string_value(bytes)?;
        self.push_raw(v)?;
        self.check_gc();
        Ok(())
    }

    /// Push a string literal through the pointer-keyed cache.
    pub fn push_string(&mut self, s: &str) -> LuaResult<()> {
        let v = self.new_cached_string(s)?;
        self.push_raw(v)?;
        self.check_gc();
        Ok(())
    }

    pub fn push_light_userdata(&mut self, p: *mut std::ffi::c_void) -> LuaResult<()> {
        self.push_raw(LuaValue::light_userdata(p))
    }

    /// Bind the top `n` values as upvalues of a host closure. With
    /// `n == 0` no allocation happens: the value pushed is a bare
    /// function pointer.
    pub fn push_cclosure(&mut self, f: CFunction, n: usize) -> LuaResult<()> {
        if n == 0 {
            return self.push_raw(LuaValue::cfunction(f));
        }
        if n > MAXUPVAL {
            return Err(self.run_error("upvalue index too large"));
        }
        let top = self.th().top;
        debug_assert!(self.get_top() >= n as i32);
        let upvalue: Vec<LuaValue> = (top - n..top).map(|i| self.stack_at(i)).collect();
        let id = self.new_closure_obj(Closure::Host(CClosure { f, upvalue }))?;
        self.th_mut().top -= n;
        self.push_raw(LuaValue::host_closure(id))?;
        self.check_gc();
        Ok(())
    }

    /// Push the current thread; true when it is the main thread.
    pub fn push_thread(&mut self) -> LuaResult<bool> {
        let id = self.current;
        self.push_raw(LuaValue::thread(id))?;
        Ok(id == self.g.mainthread)
    }

    /// Push a copy of the value at `idx`.
    pub fn push_value(&mut self, idx: i32) -> LuaResult<()> {
        let v = self.value_or_nil(idx);
        self.push_raw(v)
    }

    // ===== Stack shuffling =====

    /// Rotate the segment from `idx` to the top by `n` positions:
    /// `[A|B] -> [B|A]` through three reversals.
    pub fn rotate(&mut self, idx: i32, n: i32) {
        let Place::Stack(p) = self.resolve_index(idx) else {
            return;
        };
        let top = self.th().top;
        if top == 0 || p >= top {
            return;
        }
        let t = top - 1;
        let len = (t - p + 1) as i32;
        debug_assert!(n.abs() <= len);
        let m = if n >= 0 {
            t - n as usize
        } else {
            (p as i64 - n as i64 - 1) as usize
        };
        let th = self.th_mut();
        th.stack[p..=m].reverse();
        th.stack[m + 1..=t].reverse();
        th.stack[p..=t].reverse();
    }

    /// Move the top value into `idx`, shifting the segment up.
    pub fn insert(&mut self, idx: i32) {
        self.rotate(idx, 1);
    }

    /// Remove the value at `idx`, shifting the segment down.
    pub fn remove(&mut self, idx: i32) {
        self.rotate(idx, -1);
        self.pop(1);
    }

    /// Replace the value at `idx` with the popped top.
    pub fn replace(&mut self, idx: i32) {
        let v = self.pop_raw();
        self.set_index(idx, v);
    }

    /// Copy the value at `from` into `to`, overwriting it.
    pub fn copy(&mut self, from: i32, to: i32) {
        let v = self.value_or_nil(from);
        self.set_index(to, v);
    }

    /// Move `n` values from the top of thread `from` to thread `to`.
    pub fn xmove(
        &mut self,
        from: crate::gc::ThreadId,
        to: crate::gc::ThreadId,
        n: usize,
    ) -> LuaResult<()> {
        if from == to {
            return Ok(());
        }
        let values: Vec<LuaValue> = {
            let Some(f) = self.pool.thread(from) else {
                return Ok(());
            };
            debug_assert!(f.top - (f.ci().func + 1) >= n);
            (f.top - n..f.top).map(|i| f.stack[i]).collect()
        };
        {
            let Some(t) = self.pool.thread_mut(to) else {
                return Ok(());
            };
            if t.stack_space() < n {
                let newsize = (t.stack_size() * 2)
                    .max(t.top + n + EXTRA_STACK)
                    .min(LUAI_MAXSTACK);
                t.realloc_stack(newsize);
            }
            if t.stack_space() < n {
                return Err(LuaError::Runtime);
            }
            for v in &values {
                let top = t.top;
                t.stack[top] = *v;
                t.top += 1;
            }
        }
        if let Some(f) = self.pool.thread_mut(from) {
            f.top -= n;
        }
        Ok(())
    }

    // ===== Type queries =====

    pub fn type_of(&self, idx: i32) -> LuaType {
        match self.value_at(idx) {
            None => LuaType::None,
            Some(v) => {
                use crate::lua_value::*;
                match v.ttype() {
                    LUA_TNIL => LuaType::Nil,
                    LUA_TBOOLEAN => LuaType::Boolean,
                    LUA_TLIGHTUSERDATA => LuaType::LightUserdata,
                    LUA_TNUMBER => LuaType::Number,
                    LUA_TSTRING => LuaType::String,
                    LUA_TTABLE => LuaType::Table,
                    LUA_TFUNCTION => LuaType::Function,
                    LUA_TUSERDATA => LuaType::Userdata,
                    LUA_TTHREAD => LuaType::Thread,
                    _ => LuaType::None,
                }
            }
        }
    }

    pub fn type_name_at(&self, idx: i32) -> &'static str {
        self.type_of(idx).name()
    }

    pub fn is_nil(&self, idx: i32) -> bool {
        matches!(self.value_at(idx), Some(v) if v.is_nil())
    }

    pub fn is_none_or_nil(&self, idx: i32) -> bool {
        self.value_at(idx).map(|v| v.is_nil()).unwrap_or(true)
    }

    pub fn is_boolean(&self, idx: i32) -> bool {
        matches!(self.value_at(idx), Some(v) if v.is_boolean())
    }

    pub fn is_integer(&self, idx: i32) -> bool {
        matches!(self.value_at(idx), Some(v) if v.is_integer())
    }

    pub fn is_number(&self, idx: i32) -> bool {
        self.to_number_x(idx).is_some()
    }

    pub fn is_string(&self, idx: i32) -> bool {
        matches!(self.value_at(idx), Some(v) if v.is_string() || v.is_number())
    }

    pub fn is_table(&self, idx: i32) -> bool {
        matches!(self.value_at(idx), Some(v) if v.is_table())
    }

    pub fn is_function(&self, idx: i32) -> bool {
        matches!(self.value_at(idx), Some(v) if v.is_function())
    }

    pub fn is_cfunction(&self, idx: i32) -> bool {
        matches!(self.value_at(idx), Some(v) if v.is_cfunction() || v.is_host_closure())
    }

    pub fn is_userdata(&self, idx: i32) -> bool {
        matches!(self.value_at(idx), Some(v) if v.is_full_userdata() || v.is_light_userdata())
    }

    pub fn is_thread(&self, idx: i32) -> bool {
        matches!(self.value_at(idx), Some(v) if v.is_thread())
    }

    // ===== Read group =====

    /// Language truth of the value (only nil and false are falsy).
    pub fn to_boolean(&self, idx: i32) -> bool {
        self.value_at(idx).map(|v| v.is_truthy()).unwrap_or(false)
    }

    /// Integer value, converting exact floats and numeric strings.
    pub fn to_integer_x(&self, idx: i32) -> Option<i64> {
        let v = self.value_at(idx)?;
        self.coerce_to_integer(&v)
    }

    pub fn to_integer(&self, idx: i32) -> i64 {
        self.to_integer_x(idx).unwrap_or(0)
    }

    /// Float value, converting integers and numeric strings.
    pub fn to_number_x(&self, idx: i32) -> Option<f64> {
        let v = self.value_at(idx)?;
        self.coerce_to_number(&v)
    }

    pub fn to_number(&self, idx: i32) -> f64 {
        self.to_number_x(idx).unwrap_or(0.0)
    }

    /// String bytes without coercion.
    pub fn to_str(&self, idx: i32) -> Option<&[u8]> {
        let v = self.value_at(idx)?;
        let id = v.as_string_id()?;
        self.pool.string_bytes(id)
    }

    /// String content as UTF-8, lossy, without coercion.
    pub fn to_string_lossy(&self, idx: i32) -> Option<String> {
        self.to_str(idx).map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// String bytes, coercing numbers; the coerced string replaces the
    /// number in its stack slot, exactly like the C API.
    pub fn to_lstring(&mut self, idx: i32) -> LuaResult<Option<Vec<u8>>> {
        let Some(v) = self.value_at(idx) else {
            return Ok(None);
        };
        if v.is_string() {
            return Ok(v
                .as_string_id()
                .and_then(|id| self.pool.string_bytes(id))
                .map(|b| b.to_vec()));
        }
        if v.is_number() {
            let s = crate::api::aux::number_to_string(&v);
            let sv = self.new_string_value(s.as_bytes())?;
            self.set_index(idx, sv);
            self.check_gc();
            return Ok(Some(s.into_bytes()));
        }
        Ok(None)
    }

    /// Host function pointer of a light function or host closure.
    pub fn to_cfunction(&self, idx: i32) -> Option<CFunction> {
        let v = self.value_at(idx)?;
        if v.is_cfunction() {
            return Some(v.fvalue());
        }
        if v.is_host_closure() {
            return self
                .pool
                .closure(v.as_closure_id()?)
                .and_then(|c| c.as_host())
                .map(|c| c.f);
        }
        None
    }

    /// Raw byte block of a full userdata, or the pointer payload of a
    /// light userdata.
    pub fn to_userdata(&self, idx: i32) -> Option<*mut std::ffi::c_void> {
        let v = self.value_at(idx)?;
        if v.is_light_userdata() {
            return Some(v.pvalue());
        }
        let id = v.as_userdata_id()?;
        self.pool
            .userdata_ref(id)
            .map(|u| u.data.as_ptr() as *mut std::ffi::c_void)
    }

    /// Borrow the bytes of a full userdata.
    pub fn userdata_bytes(&self, idx: i32) -> Option<&[u8]> {
        let v = self.value_at(idx)?;
        let id = v.as_userdata_id()?;
        self.pool.userdata_ref(id).map(|u| &u.data[..])
    }

    pub fn userdata_bytes_mut(&mut self, idx: i32) -> Option<&mut [u8]> {
        let v = self.value_at(idx)?;
        let id = v.as_userdata_id()?;
        self.pool
            .userdata
            .get_mut(id.0)
            .map(|u| &mut u.data.data[..])
    }

    pub fn to_thread(&self, idx: i32) -> Option<crate::gc::ThreadId> {
        self.value_at(idx)?.as_thread_id()
    }

    /// A stable identity for the value, unique per live object.
    pub fn to_pointer(&self, idx: i32) -> *const std::ffi::c_void {
        let Some(v) = self.value_at(idx) else {
            return std::ptr::null();
        };
        if v.is_light_userdata() {
            return v.pvalue();
        }
        if v.is_cfunction() {
            return v.fvalue() as usize as *const std::ffi::c_void;
        }
        if v.is_collectable() {
            let kind = v.ttype() as u64;
            let id = v.raw_gc() as u64;
            return (((kind + 1) << 32) | id) as usize as *const std::ffi::c_void;
        }
        std::ptr::null()
    }
}
