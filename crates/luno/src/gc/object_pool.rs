// Object pool: one dense arena per collectable kind.
//
// Arenas map a u32 id to the object plus its GC header. An id-indexed
// IndexMap gives O(1) lookup, O(live) iteration for mark and sweep, and
// free-list id recycling. Arenas are separate struct fields on purpose:
// operations that mutate one kind while reading another (a table keyed
// by strings, an upvalue aliasing a thread stack) split-borrow the pool
// instead of fighting over it.

use ahash::RandomState;
use indexmap::IndexMap;

use crate::gc::gc_header::GcHeader;
use crate::gc::gc_id::{
    ClosureId, GcId, ProtoId, StringId, TableId, ThreadId, UpvalueId, UserdataId,
};
use crate::lua_value::{
    Closure, LuaString, LuaTable, LuaUserdata, LuaValue, Proto, SetInfo, TableOpError, Upvalue,
    raw_equal,
};
use crate::lua_vm::lua_thread::LuaThread;

pub struct GcBox<T> {
    pub header: GcHeader,
    pub data: T,
}

/// Dense id→object arena with free-list id recycling.
pub struct GcArena<T> {
    map: IndexMap<u32, GcBox<T>, RandomState>,
    free_list: Vec<u32>,
    next_id: u32,
}

impl<T> GcArena<T> {
    pub fn new() -> Self {
        GcArena {
            map: IndexMap::with_hasher(RandomState::new()),
            free_list: Vec::new(),
            next_id: 0,
        }
    }

    /// Insert a new object born white with the given parity.
    pub fn alloc(&mut self, data: T, current_white: u8, size: u32) -> u32 {
        let id = match self.free_list.pop() {
            Some(id) => id,
            None => {
                let id = self.next_id;
                self.next_id = self.next_id.wrapping_add(1);
                debug_assert!(self.next_id != 0, "arena exhausted u32 ids");
                id
            }
        };
        self.map.insert(
            id,
            GcBox {
                header: GcHeader::with_white(current_white, size),
                data,
            },
        );
        id
    }

    #[inline(always)]
    pub fn get(&self, id: u32) -> Option<&GcBox<T>> {
        self.map.get(&id)
    }

    #[inline(always)]
    pub fn get_mut(&mut self, id: u32) -> Option<&mut GcBox<T>> {
        self.map.get_mut(&id)
    }

    #[inline(always)]
    pub fn contains(&self, id: u32) -> bool {
        self.map.contains_key(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Remove an object, recycling its id. Returns its accounted size.
    pub fn free(&mut self, id: u32) -> usize {
        if let Some(obj) = self.map.swap_remove(&id) {
            self.free_list.push(id);
            obj.header.size as usize
        } else {
            0
        }
    }

    /// Positional access for the sweep cursor.
    #[inline]
    pub fn get_index_mut(&mut self, pos: usize) -> Option<(u32, &mut GcBox<T>)> {
        self.map.get_index_mut(pos).map(|(&id, obj)| (id, obj))
    }

    /// Positional removal for the sweep cursor; the last entry is swapped
    /// into the hole, so a forward scan revisits it at the same position.
    pub fn swap_remove_index(&mut self, pos: usize) -> Option<(u32, GcBox<T>)> {
        let (id, obj) = self.map.swap_remove_index(pos)?;
        self.free_list.push(id);
        Some((id, obj))
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &GcBox<T>)> + '_ {
        self.map.iter().map(|(&id, obj)| (id, obj))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut GcBox<T>)> + '_ {
        self.map.iter_mut().map(|(&id, obj)| (id, obj))
    }
}

impl<T> Default for GcArena<T> {
    fn default() -> Self {
        GcArena::new()
    }
}

// ============ The pool ============

pub struct ObjectPool {
    pub strings: GcArena<LuaString>,
    pub tables: GcArena<LuaTable>,
    pub closures: GcArena<Closure>,
    pub protos: GcArena<Proto>,
    pub userdata: GcArena<LuaUserdata>,
    pub threads: GcArena<LuaThread>,
    pub upvalues: GcArena<Upvalue>,
}

impl ObjectPool {
    pub fn new() -> Self {
        ObjectPool {
            strings: GcArena::new(),
            tables: GcArena::new(),
            closures: GcArena::new(),
            protos: GcArena::new(),
            userdata: GcArena::new(),
            threads: GcArena::new(),
            upvalues: GcArena::new(),
        }
    }

    pub fn header(&self, id: GcId) -> Option<&GcHeader> {
        match id {
            GcId::String(i) => self.strings.get(i.0).map(|o| &o.header),
            GcId::Table(i) => self.tables.get(i.0).map(|o| &o.header),
            GcId::Closure(i) => self.closures.get(i.0).map(|o| &o.header),
            GcId::Proto(i) => self.protos.get(i.0).map(|o| &o.header),
            GcId::Userdata(i) => self.userdata.get(i.0).map(|o| &o.header),
            GcId::Thread(i) => self.threads.get(i.0).map(|o| &o.header),
            GcId::Upvalue(i) => self.upvalues.get(i.0).map(|o| &o.header),
        }
    }

    pub fn header_mut(&mut self, id: GcId) -> Option<&mut GcHeader> {
        match id {
            GcId::String(i) => self.strings.get_mut(i.0).map(|o| &mut o.header),
            GcId::Table(i) => self.tables.get_mut(i.0).map(|o| &mut o.header),
            GcId::Closure(i) => self.closures.get_mut(i.0).map(|o| &mut o.header),
            GcId::Proto(i) => self.protos.get_mut(i.0).map(|o| &mut o.header),
            GcId::Userdata(i) => self.userdata.get_mut(i.0).map(|o| &mut o.header),
            GcId::Thread(i) => self.threads.get_mut(i.0).map(|o| &mut o.header),
            GcId::Upvalue(i) => self.upvalues.get_mut(i.0).map(|o| &mut o.header),
        }
    }

    /// Total number of live objects across all arenas.
    pub fn object_count(&self) -> usize {
        self.strings.len()
            + self.tables.len()
            + self.closures.len()
            + self.protos.len()
            + self.userdata.len()
            + self.threads.len()
            + self.upvalues.len()
    }

    // ===== Value helpers =====

    /// Raw equality, resolving long-string content.
    #[inline]
    pub fn raw_equal(&self, a: &LuaValue, b: &LuaValue) -> bool {
        raw_equal(a, b, &self.strings)
    }

    pub fn string_bytes(&self, id: StringId) -> Option<&[u8]> {
        self.strings.get(id.0).map(|s| s.data.as_bytes())
    }

    // ===== Table operations (split-borrow wrappers) =====

    pub fn table_get(&self, t: TableId, key: &LuaValue) -> LuaValue {
        match self.tables.get(t.0) {
            Some(tb) => tb.data.get(key, &self.strings),
            None => LuaValue::nil(),
        }
    }

    pub fn table_get_int(&self, t: TableId, key: i64) -> LuaValue {
        match self.tables.get(t.0) {
            Some(tb) => tb.data.get_int(key),
            None => LuaValue::nil(),
        }
    }

    /// Raw set; clears the table's metamethod-absence cache. The caller
    /// still owes the write barrier and the allocation accounting for
    /// `SetInfo::mem_delta`.
    pub fn table_set(
        &mut self,
        t: TableId,
        key: LuaValue,
        value: LuaValue,
    ) -> Result<SetInfo, TableOpError> {
        let ObjectPool {
            tables, strings, ..
        } = self;
        match tables.get_mut(t.0) {
            Some(tb) => {
                tb.data.flags = 0;
                tb.data.set(key, value, strings)
            }
            None => Ok(SetInfo {
                new_key: false,
                mem_delta: 0,
            }),
        }
    }

    pub fn table_set_int(
        &mut self,
        t: TableId,
        key: i64,
        value: LuaValue,
    ) -> Result<SetInfo, TableOpError> {
        self.table_set(t, LuaValue::integer(key), value)
    }

    pub fn table_length(&self, t: TableId) -> i64 {
        match self.tables.get(t.0) {
            Some(tb) => tb.data.length(),
            None => 0,
        }
    }

    pub fn table_next(
        &self,
        t: TableId,
        key: &LuaValue,
    ) -> Result<Option<(LuaValue, LuaValue)>, ()> {
        match self.tables.get(t.0) {
            Some(tb) => tb.data.next(key, &self.strings),
            None => Ok(None),
        }
    }

    pub fn table_resize(
        &mut self,
        t: TableId,
        nasize: usize,
        nhsize: usize,
    ) -> Result<isize, TableOpError> {
        let ObjectPool {
            tables, strings, ..
        } = self;
        match tables.get_mut(t.0) {
            Some(tb) => tb.data.resize(nasize, nhsize, strings),
            None => Ok(0),
        }
    }

    // ===== Upvalue operations =====

    /// Read through an upvalue, following an open one into its thread's
    /// stack.
    pub fn upvalue_value(&self, id: UpvalueId) -> LuaValue {
        match self.upvalues.get(id.0).map(|u| &u.data) {
            Some(Upvalue::Closed(v)) => *v,
            Some(Upvalue::Open { thread, level }) => self
                .threads
                .get(thread.0)
                .and_then(|th| th.data.stack.get(*level).copied())
                .unwrap_or_else(LuaValue::nil),
            None => LuaValue::nil(),
        }
    }

    /// Write through an upvalue. The caller owes the forward barrier for
    /// closed upvalues.
    pub fn set_upvalue_value(&mut self, id: UpvalueId, value: LuaValue) {
        let ObjectPool {
            upvalues, threads, ..
        } = self;
        match upvalues.get_mut(id.0).map(|u| &mut u.data) {
            Some(Upvalue::Closed(v)) => *v = value,
            Some(Upvalue::Open { thread, level }) => {
                if let Some(th) = threads.get_mut(thread.0) {
                    if *level < th.data.stack.len() {
                        th.data.stack[*level] = value;
                    }
                }
            }
            None => {}
        }
    }

    // ===== Typed views =====

    pub fn closure(&self, id: ClosureId) -> Option<&Closure> {
        self.closures.get(id.0).map(|c| &c.data)
    }

    pub fn proto(&self, id: ProtoId) -> Option<&Proto> {
        self.protos.get(id.0).map(|p| &p.data)
    }

    pub fn thread(&self, id: ThreadId) -> Option<&LuaThread> {
        self.threads.get(id.0).map(|t| &t.data)
    }

    pub fn thread_mut(&mut self, id: ThreadId) -> Option<&mut LuaThread> {
        self.threads.get_mut(id.0).map(|t| &mut t.data)
    }

    pub fn userdata_ref(&self, id: UserdataId) -> Option<&LuaUserdata> {
        self.userdata.get(id.0).map(|u| &u.data)
    }

    /// Metatable of a table or full-userdata value, if any.
    pub fn own_metatable(&self, v: &LuaValue) -> Option<TableId> {
        if let Some(t) = v.as_table_id() {
            self.tables.get(t.0).and_then(|tb| tb.data.metatable)
        } else if let Some(u) = v.as_userdata_id() {
            self.userdata.get(u.0).and_then(|ud| ud.data.metatable)
        } else {
            None
        }
    }

    /// Drop one object by id, returning its accounted size.
    pub fn free_object(&mut self, id: GcId) -> usize {
        match id {
            GcId::String(i) => self.strings.free(i.0),
            GcId::Table(i) => self.tables.free(i.0),
            GcId::Closure(i) => self.closures.free(i.0),
            GcId::Proto(i) => self.protos.free(i.0),
            GcId::Userdata(i) => self.userdata.free(i.0),
            GcId::Thread(i) => self.threads.free(i.0),
            GcId::Upvalue(i) => self.upvalues.free(i.0),
        }
    }
}

impl Default for ObjectPool {
    fn default() -> Self {
        ObjectPool::new()
    }
}
