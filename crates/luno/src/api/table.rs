// Table API: raw and metamethod-aware access, metatables, iteration
// and length.

use crate::gc::{GcId, TableId};
use crate::lua_value::LuaValue;
use crate::lua_vm::lua_error::LuaResult;
use crate::lua_vm::lua_limits::MAXTAGLOOP;
use crate::lua_vm::metamethod::TmKind;
use crate::lua_vm::Lua;

use super::stack::LuaType;

impl Lua {
    // ===== Creation =====

    /// Push a fresh table with preallocated room for `narray` sequence
    /// entries and `nhash` other entries.
    pub fn create_table(&mut self, narray: usize, nhash: usize) -> LuaResult<()> {
        let id = self.new_table_sized(narray, nhash)?;
        self.push_raw(LuaValue::table(id))?;
        self.check_gc();
        Ok(())
    }

    pub fn new_table(&mut self) -> LuaResult<()> {
        self.create_table(0, 0)
    }

    // ===== Raw access =====

    /// Raw set on the table value at `idx` with the popped key/value
    /// pair: no metamethods, fires the write barrier, accounts resizes.
    pub fn raw_set(&mut self, idx: i32) -> LuaResult<()> {
        let t = self.table_arg(idx)?;
        let value = self.pop_raw();
        let key = self.pop_raw();
        self.raw_set_checked(t, key, value)
    }

    /// Raw set under an integer key with the popped value.
    pub fn raw_set_i(&mut self, idx: i32, key: i64) -> LuaResult<()> {
        let t = self.table_arg(idx)?;
        let value = self.pop_raw();
        self.raw_set_checked(t, LuaValue::integer(key), value)
    }

    /// Raw get with the popped key; pushes the value.
    pub fn raw_get(&mut self, idx: i32) -> LuaResult<LuaType> {
        let t = self.table_arg(idx)?;
        let key = self.pop_raw();
        let v = self.pool.table_get(t, &key);
        self.push_raw(v)?;
        Ok(self.type_of(-1))
    }

    /// Raw get under an integer key; pushes the value.
    pub fn raw_get_i(&mut self, idx: i32, key: i64) -> LuaResult<LuaType> {
        let t = self.table_arg(idx)?;
        let v = self.pool.table_get_int(t, key);
        self.push_raw(v)?;
        Ok(self.type_of(-1))
    }

    /// Raw length: bytes for strings, boundary for tables, 0 otherwise.
    pub fn raw_len(&self, idx: i32) -> usize {
        let Some(v) = self.value_at(idx) else {
            return 0;
        };
        if let Some(id) = v.as_string_id() {
            return self.pool.string_bytes(id).map(|b| b.len()).unwrap_or(0);
        }
        if let Some(t) = v.as_table_id() {
            return self.pool.table_length(t).max(0) as usize;
        }
        if let Some(u) = v.as_userdata_id() {
            return self.pool.userdata_ref(u).map(|u| u.len()).unwrap_or(0);
        }
        0
    }

    /// Raw equality of two indices (no `__eq`).
    pub fn raw_equal(&self, a: i32, b: i32) -> bool {
        match (self.value_at(a), self.value_at(b)) {
            (Some(va), Some(vb)) => self.pool.raw_equal(&va, &vb),
            _ => false,
        }
    }

    /// The raw-set workhorse shared by every table write path.
    pub(crate) fn raw_set_checked(
        &mut self,
        t: TableId,
        key: LuaValue,
        value: LuaValue,
    ) -> LuaResult<()> {
        match self.pool.table_set(t, key, value) {
            Ok(info) => {
                if info.mem_delta != 0 {
                    self.gc.mem.account_delta(info.mem_delta);
                    if let Some(tb) = self.pool.tables.get_mut(t.0) {
                        tb.header.size =
                            (tb.header.size as isize + info.mem_delta).max(0) as u32;
                    }
                }
                self.table_barrier(t, &value);
                if info.new_key {
                    self.table_barrier(t, &key);
                }
                Ok(())
            }
            Err(e) => Err(self.table_op_error(e)),
        }
    }

    fn table_arg(&mut self, idx: i32) -> LuaResult<TableId> {
        match self.value_at(idx).and_then(|v| v.as_table_id()) {
            Some(t) => Ok(t),
            None => {
                let name = self.type_name_at(idx);
                Err(self.run_error(&format!("table expected, got {}", name)))
            }
        }
    }

    // ===== Metamethod-aware access =====

    /// `t[k]` with `__index` chains; consumes the key from the top and
    /// pushes the result.
    pub fn get_table(&mut self, idx: i32) -> LuaResult<LuaType> {
        let t = self.value_or_nil(idx);
        let key = self.pop_raw();
        let v = self.table_get_with_meta(t, key)?;
        self.push_raw(v)?;
        Ok(self.type_of(-1))
    }

    /// `t[name]` pushing the result.
    pub fn get_field(&mut self, idx: i32, name: &str) -> LuaResult<LuaType> {
        let t = self.value_or_nil(idx);
        let key = self.new_cached_string(name)?;
        let v = self.table_get_with_meta(t, key)?;
        self.push_raw(v)?;
        Ok(self.type_of(-1))
    }

    /// `t[i]` pushing the result.
    pub fn get_i(&mut self, idx: i32, i: i64) -> LuaResult<LuaType> {
        let t = self.value_or_nil(idx);
        let v = self.table_get_with_meta(t, LuaValue::integer(i))?;
        self.push_raw(v)?;
        Ok(self.type_of(-1))
    }

    /// A field of the globals table.
    pub fn get_global(&mut self, name: &str) -> LuaResult<LuaType> {
        let g = self.globals_table();
        let key = self.new_cached_string(name)?;
        let v = self.table_get_with_meta(g, key)?;
        self.push_raw(v)?;
        Ok(self.type_of(-1))
    }

    /// `t[k] = v` with `__newindex` chains; pops value then key.
    pub fn set_table(&mut self, idx: i32) -> LuaResult<()> {
        let t = self.value_or_nil(idx);
        let value = self.pop_raw();
        let key = self.pop_raw();
        self.table_set_with_meta(t, key, value)
    }

    /// `t[name] = v`, popping the value.
    pub fn set_field(&mut self, idx: i32, name: &str) -> LuaResult<()> {
        let t = self.value_or_nil(idx);
        // intern the key before popping: interning may collect, and the
        // value must stay anchored on the stack until then
        let key = self.new_cached_string(name)?;
        let value = self.pop_raw();
        self.table_set_with_meta(t, key, value)
    }

    /// `t[i] = v`, popping the value.
    pub fn set_i(&mut self, idx: i32, i: i64) -> LuaResult<()> {
        let t = self.value_or_nil(idx);
        let value = self.pop_raw();
        self.table_set_with_meta(t, LuaValue::integer(i), value)
    }

    /// Assign a field of the globals table, popping the value.
    pub fn set_global(&mut self, name: &str) -> LuaResult<()> {
        let g = self.globals_table();
        let key = self.new_cached_string(name)?;
        let value = self.pop_raw();
        self.table_set_with_meta(g, key, value)
    }

    /// `__index` resolution loop.
    pub(crate) fn table_get_with_meta(
        &mut self,
        t: LuaValue,
        key: LuaValue,
    ) -> LuaResult<LuaValue> {
        let mut t = t;
        for _ in 0..MAXTAGLOOP {
            if let Some(tid) = t.as_table_id() {
                let v = self.pool.table_get(tid, &key);
                if !v.is_nil() {
                    return Ok(v);
                }
                let mt = self.pool.tables.get(tid.0).and_then(|tb| tb.data.metatable);
                let Some(tm) = self.fast_tm(mt, TmKind::Index) else {
                    return Ok(LuaValue::nil());
                };
                if tm.is_function() || tm.is_cfunction() {
                    return self.call_tm_result(tm, &[t, key]);
                }
                t = tm;
            } else {
                let Some(tm) = self.tm_by_value(&t, TmKind::Index) else {
                    let name = t.type_name();
                    return Err(self.run_error(&format!("attempt to index a {} value", name)));
                };
                if tm.is_function() || tm.is_cfunction() {
                    return self.call_tm_result(tm, &[t, key]);
                }
                t = tm;
            }
        }
        Err(self.run_error("'__index' chain too long; possible loop"))
    }

    /// `__newindex` resolution loop.
    pub(crate) fn table_set_with_meta(
        &mut self,
        t: LuaValue,
        key: LuaValue,
        value: LuaValue,
    ) -> LuaResult<()> {
        let mut t = t;
        for _ in 0..MAXTAGLOOP {
            if let Some(tid) = t.as_table_id() {
                let existing = self.pool.table_get(tid, &key);
                if !existing.is_nil() {
                    return self.raw_set_checked(tid, key, value);
                }
                let mt = self.pool.tables.get(tid.0).and_then(|tb| tb.data.metatable);
                let Some(tm) = self.fast_tm(mt, TmKind::NewIndex) else {
                    return self.raw_set_checked(tid, key, value);
                };
                if tm.is_function() || tm.is_cfunction() {
                    return self.call_tm_effect(tm, &[t, key, value]);
                }
                t = tm;
            } else {
                let Some(tm) = self.tm_by_value(&t, TmKind::NewIndex) else {
                    let name = t.type_name();
                    return Err(self.run_error(&format!("attempt to index a {} value", name)));
                };
                if tm.is_function() || tm.is_cfunction() {
                    return self.call_tm_effect(tm, &[t, key, value]);
                }
                t = tm;
            }
        }
        Err(self.run_error("'__newindex' chain too long; possible loop"))
    }

    // ===== Metatables =====

    /// Push the metatable of the value at `idx`; false (and nothing
    /// pushed) when it has none.
    pub fn get_metatable(&mut self, idx: i32) -> LuaResult<bool> {
        let v = self.value_or_nil(idx);
        match self.metatable_of(&v) {
            Some(mt) => {
                self.push_raw(LuaValue::table(mt))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pop a table (or nil) and install it as the metatable of the value
    /// at `idx`; for non-container types this sets the per-type
    /// metatable shared by all values of that type.
    pub fn set_metatable(&mut self, idx: i32) -> LuaResult<()> {
        let v = self.value_or_nil(idx);
        let mtv = self.pop_raw();
        let mt = if mtv.is_nil() {
            None
        } else {
            match mtv.as_table_id() {
                Some(t) => Some(t),
                None => return Err(self.run_error("nil or table expected")),
            }
        };
        if let Some(tid) = v.as_table_id() {
            if let Some(tb) = self.pool.tables.get_mut(tid.0) {
                tb.data.metatable = mt;
                tb.data.flags = 0;
            }
            if let Some(mt) = mt {
                self.table_barrier(tid, &LuaValue::table(mt));
                self.check_finalizer(&v);
            }
        } else if let Some(uid) = v.as_userdata_id() {
            if let Some(ud) = self.pool.userdata.get_mut(uid.0) {
                ud.data.metatable = mt;
            }
            if let Some(mt) = mt {
                self.gc_barrier(GcId::Userdata(uid), &LuaValue::table(mt));
                self.check_finalizer(&v);
            }
        } else {
            self.g.mt[v.ttype() as usize] = mt;
        }
        Ok(())
    }

    // ===== Userdata =====

    /// Push a fresh full userdata of `size` bytes.
    pub fn new_userdata(&mut self, size: usize) -> LuaResult<()> {
        let id = self.new_userdata_obj(size)?;
        self.push_raw(LuaValue::userdata(id))?;
        self.check_gc();
        Ok(())
    }

    /// Push the user value associated with the userdata at `idx`.
    pub fn get_uservalue(&mut self, idx: i32) -> LuaResult<LuaType> {
        let v = self.value_or_nil(idx);
        let uv = v
            .as_userdata_id()
            .and_then(|id| self.pool.userdata_ref(id))
            .map(|u| u.user_value)
            .unwrap_or_default();
        self.push_raw(uv)?;
        Ok(self.type_of(-1))
    }

    /// Pop a value and associate it with the userdata at `idx`.
    pub fn set_uservalue(&mut self, idx: i32) -> LuaResult<()> {
        let v = self.value_or_nil(idx);
        let uv = self.pop_raw();
        if let Some(id) = v.as_userdata_id() {
            if let Some(ud) = self.pool.userdata.get_mut(id.0) {
                ud.data.user_value = uv;
            }
            self.gc_barrier(GcId::Userdata(id), &uv);
        }
        Ok(())
    }

    // ===== Iteration =====

    /// Pop a key and push the next key/value pair of the table at `idx`;
    /// false (and nothing pushed) when the traversal is over.
    pub fn next(&mut self, idx: i32) -> LuaResult<bool> {
        let t = self.table_arg(idx)?;
        let key = self.pop_raw();
        match self.pool.table_next(t, &key) {
            Ok(Some((k, v))) => {
                self.push_raw(k)?;
                self.push_raw(v)?;
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(()) => Err(self.run_error("invalid key to 'next'")),
        }
    }

    // ===== Length =====

    /// Push the length of the value at `idx`: byte length for strings,
    /// `__len` when defined, the raw boundary for plain tables.
    pub fn len(&mut self, idx: i32) -> LuaResult<()> {
        let v = self.value_or_nil(idx);
        if v.is_string() {
            let n = self.raw_len(idx) as i64;
            return self.push_raw(LuaValue::integer(n));
        }
        if let Some(tm) = self.tm_by_value(&v, TmKind::Len) {
            let r = self.call_tm_result(tm, &[v])?;
            return self.push_raw(r);
        }
        if let Some(t) = v.as_table_id() {
            let n = self.pool.table_length(t);
            return self.push_raw(LuaValue::integer(n));
        }
        let name = v.type_name();
        Err(self.run_error(&format!("attempt to get length of a {} value", name)))
    }
}
