// Tables: the language's only compound data type.
//
// A table keeps its elements in two parts. Non-negative integer keys are
// candidates for the array part, whose size is the largest power of two
// `n` such that more than half the slots 1..n are in use. Everything else
// lives in a power-of-two node array using a chained scatter scheme with
// Brent's variation: if an element is not in its main position, then the
// element colliding with it *is* in its own main position. Collision
// links are signed offsets between node indices, so the whole node array
// can be reallocated without rewriting the chains.

use crate::gc::object_pool::GcArena;
use crate::gc::TableId;
use crate::lua_value::lua_string::LuaString;
use crate::lua_value::lua_value::LuaValue;
use crate::lua_vm::lua_limits::{MAXABITS, MAXHBITS};

/// One slot of the hash part: a key, a value, and the signed offset to
/// the next node of its collision chain (0 ends the chain).
#[derive(Clone, Copy)]
pub struct Node {
    pub i_val: LuaValue,
    pub i_key: LuaValue,
    pub next: i32,
}

impl Node {
    #[inline(always)]
    fn empty() -> Self {
        Node {
            i_val: LuaValue::nil(),
            i_key: LuaValue::nil(),
            next: 0,
        }
    }
}

/// Errors a table mutation can report; the caller turns them into
/// runtime errors with the proper message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableOpError {
    NilIndex,
    NanIndex,
    Overflow,
}

/// Outcome of a successful `set`.
pub struct SetInfo {
    /// A key was inserted (as opposed to an existing slot overwritten).
    pub new_key: bool,
    /// Change in the table's backing storage, in bytes (from resizes).
    pub mem_delta: isize,
}

pub struct LuaTable {
    /// Bit `1 << event` set means "this table, used as a metatable, is
    /// known not to define that event". Cleared on any mutation.
    pub flags: u8,
    /// log2 of the node array size; meaningless while the hash part is
    /// the shared empty sentinel.
    lsizenode: u8,
    pub metatable: Option<TableId>,
    /// Dense prefix for integer keys 1..=array.len().
    pub(crate) array: Vec<LuaValue>,
    /// Hash part; empty vector plays the role of the shared sentinel
    /// node, so lookups need no special case and inserts always miss.
    pub(crate) node: Vec<Node>,
    /// Free-slot search cursor: all positions >= lastfree are known to be
    /// taken. Counts down as slots are consumed.
    lastfree: usize,
}

impl LuaTable {
    pub fn new() -> Self {
        LuaTable {
            flags: !0,
            lsizenode: 0,
            metatable: None,
            array: Vec::new(),
            node: Vec::new(),
            lastfree: 0,
        }
    }

    /// Preallocate room for `narray` array entries and `nhash` hash
    /// entries.
    pub fn with_capacity(
        narray: usize,
        nhash: usize,
        strings: &GcArena<LuaString>,
    ) -> Result<Self, TableOpError> {
        let mut t = LuaTable::new();
        if narray > 0 || nhash > 0 {
            t.resize(narray, nhash, strings)?;
        }
        Ok(t)
    }

    #[inline(always)]
    pub fn sizearray(&self) -> usize {
        self.array.len()
    }

    #[inline(always)]
    fn sizenode(&self) -> usize {
        self.node.len()
    }

    #[inline(always)]
    fn is_dummy(&self) -> bool {
        self.node.is_empty()
    }

    /// Bytes accounted to the allocator for the two parts.
    pub fn mem_size(&self) -> usize {
        std::mem::size_of::<LuaTable>()
            + self.array.len() * std::mem::size_of::<LuaValue>()
            + self.node.len() * std::mem::size_of::<Node>()
    }

    // ============ Hashing ============

    /// Index of the main position of `key` in the node array.
    /// The caller must guarantee a non-empty hash part.
    fn mainposition(&self, key: &LuaValue, strings: &GcArena<LuaString>) -> usize {
        debug_assert!(!self.is_dummy());
        let mask = self.sizenode() - 1;
        if key.is_integer() {
            return (key.ivalue() as u64 as usize) & mask;
        }
        if key.is_float() {
            return self.hashmod(l_hashfloat(key.fltvalue()) as usize);
        }
        if key.is_string() {
            let h = key
                .as_string_id()
                .and_then(|id| strings.get(id.0))
                .map(|s| s.data.hash())
                .unwrap_or(0);
            return (h as usize) & mask;
        }
        if key.is_boolean() {
            return (key.bvalue() as usize) & mask;
        }
        if key.is_light_userdata() {
            return self.hashmod(key.pvalue() as usize);
        }
        if key.is_cfunction() {
            return self.hashmod(unsafe { key.value_.f });
        }
        debug_assert!(!key.is_dead_key());
        // remaining collectable kinds hash their id bits
        self.hashmod(key.raw_gc() as usize)
    }

    /// Modulus hash for types whose bit patterns tend to share factors of
    /// two; `(size - 1) | 1` is odd, which spreads them better than a
    /// power-of-two mask.
    #[inline(always)]
    fn hashmod(&self, h: usize) -> usize {
        h % ((self.sizenode() - 1) | 1)
    }

    // ============ Get ============

    /// Search for an integer key.
    pub fn get_int(&self, key: i64) -> LuaValue {
        if (key as u64).wrapping_sub(1) < self.array.len() as u64 {
            return self.array[(key - 1) as usize];
        }
        if self.is_dummy() {
            return LuaValue::nil();
        }
        let mut i = (key as u64 as usize) & (self.sizenode() - 1);
        loop {
            let n = &self.node[i];
            if n.i_key.is_integer() && n.i_key.ivalue() == key {
                return n.i_val;
            }
            let nx = n.next;
            if nx == 0 {
                return LuaValue::nil();
            }
            i = (i as isize + nx as isize) as usize;
        }
    }

    /// Main search function. Never allocates; returns nil when absent.
    pub fn get(&self, key: &LuaValue, strings: &GcArena<LuaString>) -> LuaValue {
        if key.is_integer() {
            return self.get_int(key.ivalue());
        }
        if key.is_nil() {
            return LuaValue::nil();
        }
        if key.is_float() {
            // a float with an exact integer value indexes as that integer
            if let Some(k) = key.float_to_integer() {
                return self.get_int(k);
            }
        }
        self.get_generic(key, strings)
    }

    fn get_generic(&self, key: &LuaValue, strings: &GcArena<LuaString>) -> LuaValue {
        if self.is_dummy() {
            return LuaValue::nil();
        }
        let mut i = self.mainposition(key, strings);
        loop {
            let n = &self.node[i];
            if raw_equal(&n.i_key, key, strings) {
                return n.i_val;
            }
            let nx = n.next;
            if nx == 0 {
                return LuaValue::nil();
            }
            i = (i as isize + nx as isize) as usize;
        }
    }

    /// Position of `key` in the node array, if it is present there.
    fn find_node(&self, key: &LuaValue, strings: &GcArena<LuaString>) -> Option<usize> {
        if self.is_dummy() {
            return None;
        }
        let mut i = self.mainposition(key, strings);
        loop {
            let n = &self.node[i];
            if raw_equal(&n.i_key, key, strings) {
                return Some(i);
            }
            let nx = n.next;
            if nx == 0 {
                return None;
            }
            i = (i as isize + nx as isize) as usize;
        }
    }

    // ============ Set ============

    /// Store `value` under `key`, inserting the key if needed. The caller
    /// is responsible for the write barrier and for invalidating the
    /// metamethod cache.
    pub fn set(
        &mut self,
        key: LuaValue,
        value: LuaValue,
        strings: &GcArena<LuaString>,
    ) -> Result<SetInfo, TableOpError> {
        // canonicalize float keys with an exact integer value
        let key = if key.is_float() {
            match key.float_to_integer() {
                Some(k) => LuaValue::integer(k),
                None if key.fltvalue().is_nan() => return Err(TableOpError::NanIndex),
                None => key,
            }
        } else {
            key
        };
        if key.is_nil() {
            return Err(TableOpError::NilIndex);
        }

        if key.is_integer() {
            let k = key.ivalue();
            if (k as u64).wrapping_sub(1) < self.array.len() as u64 {
                self.array[(k - 1) as usize] = value;
                return Ok(SetInfo {
                    new_key: false,
                    mem_delta: 0,
                });
            }
        }

        if let Some(i) = self.find_node(&key, strings) {
            self.node[i].i_val = value;
            return Ok(SetInfo {
                new_key: false,
                mem_delta: 0,
            });
        }

        self.new_key(key, value, strings)
    }

    /// Integer-key convenience used by the resize path and the API.
    pub fn set_int(
        &mut self,
        key: i64,
        value: LuaValue,
        strings: &GcArena<LuaString>,
    ) -> Result<SetInfo, TableOpError> {
        self.set(LuaValue::integer(key), value, strings)
    }

    /// Insert a new key into the hash part. The key's main position is
    /// claimed if free; otherwise the occupant is relocated to a free
    /// slot when it is itself out of its main position (Brent's
    /// variation), or the new key goes to the free slot and is chained
    /// behind the occupant.
    fn new_key(
        &mut self,
        key: LuaValue,
        value: LuaValue,
        strings: &GcArena<LuaString>,
    ) -> Result<SetInfo, TableOpError> {
        let mut mem_delta = 0isize;

        let mut mp = if self.is_dummy() {
            usize::MAX
        } else {
            self.mainposition(&key, strings)
        };

        if self.is_dummy() || !self.node[mp].i_val.is_nil() {
            let f = match self.get_free_pos() {
                Some(f) => f,
                None => {
                    // no free slot: grow, then retry the whole insert
                    mem_delta += self.rehash(&key, strings)?;
                    let mut info = self.set(key, value, strings)?;
                    info.mem_delta += mem_delta;
                    return Ok(info);
                }
            };
            debug_assert!(!self.is_dummy());
            let occupant_key = self.node[mp].i_key;
            let othern = self.mainposition(&occupant_key, strings);
            if othern != mp {
                // colliding node is out of its main position: move it to
                // the free slot and take its place
                let mut prev = othern;
                loop {
                    let next = (prev as isize + self.node[prev].next as isize) as usize;
                    if next == mp {
                        break;
                    }
                    prev = next;
                }
                self.node[prev].next = (f as isize - prev as isize) as i32;
                self.node[f] = self.node[mp];
                if self.node[mp].next != 0 {
                    // the copied offset was relative to mp; rebase it to f
                    self.node[f].next += (mp as isize - f as isize) as i32;
                    self.node[mp].next = 0;
                }
                self.node[mp].i_val = LuaValue::nil();
            } else {
                // colliding node is in its own main position: the new key
                // goes to the free slot, chained right after it
                if self.node[mp].next != 0 {
                    let after = (mp as isize + self.node[mp].next as isize) as usize;
                    self.node[f].next = (after as isize - f as isize) as i32;
                } else {
                    debug_assert_eq!(self.node[f].next, 0);
                }
                self.node[mp].next = (f as isize - mp as isize) as i32;
                mp = f;
            }
        }

        self.node[mp].i_key = key;
        self.node[mp].i_val = value;
        Ok(SetInfo {
            new_key: true,
            mem_delta,
        })
    }

    /// Scan the free-slot cursor downwards for a node with a nil key.
    fn get_free_pos(&mut self) -> Option<usize> {
        while self.lastfree > 0 {
            self.lastfree -= 1;
            if self.node[self.lastfree].i_key.is_nil() {
                return Some(self.lastfree);
            }
        }
        None
    }

    // ============ Rehash ============

    /// Recompute optimal sizes for both parts and resize, counting the
    /// key about to be inserted.
    fn rehash(
        &mut self,
        extra: &LuaValue,
        strings: &GcArena<LuaString>,
    ) -> Result<isize, TableOpError> {
        let mut nums = [0u32; MAXABITS + 1];
        let mut na = self.num_use_array(&mut nums);
        let mut totaluse = na as usize;
        totaluse += self.num_use_hash(&mut nums, &mut na);
        na += count_int(extra, &mut nums);
        totaluse += 1;
        let (asize, na) = compute_sizes(&nums, na);
        self.resize(asize as usize, totaluse - na as usize, strings)
    }

    /// Count keys in the array part into log2-sized slices of `nums`.
    fn num_use_array(&self, nums: &mut [u32; MAXABITS + 1]) -> u32 {
        let mut ause = 0u32;
        let mut i = 1usize;
        let mut ttlg = 1usize; // 2^lg
        for lg in 0..=MAXABITS {
            let mut lc = 0u32;
            let mut lim = ttlg;
            if lim > self.array.len() {
                lim = self.array.len();
                if i > lim {
                    break;
                }
            }
            // count elements in range (2^(lg - 1), 2^lg]
            while i <= lim {
                if !self.array[i - 1].is_nil() {
                    lc += 1;
                }
                i += 1;
            }
            nums[lg] += lc;
            ause += lc;
            ttlg = ttlg.saturating_mul(2);
        }
        ause
    }

    /// Count live keys in the hash part; integer keys also feed `nums`.
    fn num_use_hash(&self, nums: &mut [u32; MAXABITS + 1], na: &mut u32) -> usize {
        let mut totaluse = 0usize;
        for n in &self.node {
            if !n.i_val.is_nil() {
                *na += count_int(&n.i_key, nums);
                totaluse += 1;
            }
        }
        totaluse
    }

    /// Resize both parts; entries falling out of a shrinking array move
    /// into the hash part, and every live hash entry is re-inserted.
    /// Returns the change in backing storage, in bytes.
    pub fn resize(
        &mut self,
        nasize: usize,
        nhsize: usize,
        strings: &GcArena<LuaString>,
    ) -> Result<isize, TableOpError> {
        let old_mem = self.mem_size() as isize;
        let old_asize = self.array.len();

        if nasize > old_asize {
            self.array.resize(nasize, LuaValue::nil());
        }

        let old_node = std::mem::take(&mut self.node);
        self.set_node_vector(nhsize)?;

        if nasize < old_asize {
            // re-insert elements from the vanishing slice
            let tail: Vec<(i64, LuaValue)> = (nasize..old_asize)
                .filter(|&i| !self.array[i].is_nil())
                .map(|i| ((i + 1) as i64, self.array[i]))
                .collect();
            self.array.truncate(nasize);
            self.array.shrink_to_fit();
            for (k, v) in tail {
                self.set_int(k, v, strings)?;
            }
        }

        // re-insert live entries from the old hash part; entries whose
        // value is nil are dropped here, which is the only point where a
        // dead key actually disappears
        for n in &old_node {
            if !n.i_val.is_nil() {
                self.set(n.i_key, n.i_val, strings)?;
            }
        }

        Ok(self.mem_size() as isize - old_mem)
    }

    fn set_node_vector(&mut self, size: usize) -> Result<(), TableOpError> {
        if size == 0 {
            self.node = Vec::new();
            self.lsizenode = 0;
            self.lastfree = 0;
            return Ok(());
        }
        let lsize = ceil_log2(size);
        if lsize > MAXHBITS as u32 {
            return Err(TableOpError::Overflow);
        }
        let size = 1usize << lsize;
        self.node = vec![Node::empty(); size];
        self.lsizenode = lsize as u8;
        self.lastfree = size; // all positions are free
        Ok(())
    }

    // ============ Length ============

    /// A boundary: an index `i` with `t[i]` non-nil and `t[i+1]` nil
    /// (or 0 when `t[1]` is nil).
    pub fn length(&self) -> i64 {
        let mut j = self.array.len();
        if j > 0 && self.array[j - 1].is_nil() {
            // boundary is inside the array part: binary search
            let mut i = 0usize;
            while j - i > 1 {
                let m = (i + j) / 2;
                if self.array[m - 1].is_nil() {
                    j = m;
                } else {
                    i = m;
                }
            }
            return i as i64;
        }
        if self.is_dummy() {
            return j as i64;
        }
        self.unbound_search(j as i64)
    }

    /// Boundary search in the hash part: double `j` until a nil is found,
    /// then binary-search between the last two probes.
    fn unbound_search(&self, j: i64) -> i64 {
        let mut i = j; // zero or a present index
        let mut j = j + 1;
        while !self.get_int(j).is_nil() {
            i = j;
            if j > i64::MAX / 2 {
                // pathological table: fall back to linear search
                let mut i = 1i64;
                while !self.get_int(i).is_nil() {
                    i += 1;
                }
                return i - 1;
            }
            j *= 2;
        }
        while j - i > 1 {
            let m = (i + j) / 2;
            if self.get_int(m).is_nil() {
                j = m;
            } else {
                i = m;
            }
        }
        i
    }

    // ============ Iteration ============

    /// Traversal index of `key`: array entries come first, then hash
    /// nodes in physical order. 0 starts a traversal; `Err` means the
    /// key is not in the table.
    fn find_index(&self, key: &LuaValue, strings: &GcArena<LuaString>) -> Result<usize, ()> {
        if key.is_nil() {
            return Ok(0);
        }
        let ai = array_index(key);
        if ai != 0 && ai as usize <= self.array.len() {
            return Ok(ai as usize);
        }
        if self.is_dummy() {
            return Err(());
        }
        let mut i = self.mainposition(key, strings);
        loop {
            let n = &self.node[i];
            // the key may already have been removed; its dead marker
            // still identifies the slot
            let found = raw_equal(&n.i_key, key, strings)
                || (n.i_key.is_dead_key()
                    && key.is_collectable()
                    && n.i_key.raw_gc() == key.raw_gc());
            if found {
                return Ok(i + 1 + self.array.len());
            }
            let nx = n.next;
            if nx == 0 {
                return Err(());
            }
            i = (i as isize + nx as isize) as usize;
        }
    }

    /// Next present entry after `key` in traversal order; `None` when the
    /// traversal is finished, `Err` when `key` is not a valid seed.
    pub fn next(
        &self,
        key: &LuaValue,
        strings: &GcArena<LuaString>,
    ) -> Result<Option<(LuaValue, LuaValue)>, ()> {
        let mut i = self.find_index(key, strings)?;
        while i < self.array.len() {
            if !self.array[i].is_nil() {
                return Ok(Some((LuaValue::integer(i as i64 + 1), self.array[i])));
            }
            i += 1;
        }
        let mut i = i - self.array.len();
        while i < self.sizenode() {
            let n = &self.node[i];
            if !n.i_val.is_nil() {
                return Ok(Some((n.i_key, n.i_val)));
            }
            i += 1;
        }
        Ok(None)
    }
}

impl Default for LuaTable {
    fn default() -> Self {
        LuaTable::new()
    }
}

// ============ Key helpers ============

/// Raw (metamethod-free) equality, resolving long-string content through
/// the string arena.
pub fn raw_equal(a: &LuaValue, b: &LuaValue, strings: &GcArena<LuaString>) -> bool {
    if a.is_long_string() && b.is_long_string() {
        if a.raw_gc() == b.raw_gc() {
            return true;
        }
        return match (
            a.as_string_id().and_then(|id| strings.get(id.0)),
            b.as_string_id().and_then(|id| strings.get(id.0)),
        ) {
            (Some(sa), Some(sb)) => sa.data.eq_long(&sb.data),
            _ => false,
        };
    }
    a.raw_eq_bits(b)
}

/// The index of `key` if it is fit to live in the array part, 0 otherwise.
fn array_index(key: &LuaValue) -> u32 {
    if key.is_integer() {
        let k = key.ivalue();
        if 0 < k && (k as u64) <= (1u64 << MAXABITS) {
            return k as u32;
        }
    }
    0
}

fn count_int(key: &LuaValue, nums: &mut [u32; MAXABITS + 1]) -> u32 {
    let k = array_index(key);
    if k != 0 {
        nums[ceil_log2(k as usize) as usize] += 1;
        1
    } else {
        0
    }
}

/// Optimal array size: the largest power of two such that more than half
/// of the slots below it would be used. Returns (size, keys that go to
/// the array part).
fn compute_sizes(nums: &[u32; MAXABITS + 1], total_int_keys: u32) -> (u32, u32) {
    let mut a = 0u32; // elements smaller than 2^i
    let mut na = 0u32;
    let mut optimal = 0u32;
    let mut twotoi = 1u64;
    let mut i = 0usize;
    while total_int_keys > (twotoi / 2) as u32 && i <= MAXABITS {
        if nums[i] > 0 {
            a += nums[i];
            if a as u64 > twotoi / 2 {
                optimal = twotoi as u32;
                na = a;
            }
        }
        i += 1;
        twotoi *= 2;
    }
    debug_assert!(optimal == 0 || (optimal / 2 < na && na <= optimal));
    (optimal, na)
}

/// Smallest `l` with `2^l >= x` (for x >= 1).
fn ceil_log2(x: usize) -> u32 {
    debug_assert!(x >= 1);
    usize::BITS - (x - 1).leading_zeros()
}

// ============ Float key hashing ============

/// Decompose a float as `m * 2^e` with `0.5 <= |m| < 1`.
fn frexp(x: f64) -> (f64, i32) {
    if x == 0.0 || !x.is_finite() {
        return (x, 0);
    }
    let bits = x.to_bits();
    let raw_exp = ((bits >> 52) & 0x7ff) as i32;
    if raw_exp == 0 {
        // subnormal: normalize first
        let scaled = x * 2f64.powi(64);
        let bits = scaled.to_bits();
        let raw_exp = ((bits >> 52) & 0x7ff) as i32;
        let m = f64::from_bits((bits & !(0x7ffu64 << 52)) | (1022u64 << 52));
        (m, raw_exp - 1022 - 64)
    } else {
        let m = f64::from_bits((bits & !(0x7ffu64 << 52)) | (1022u64 << 52));
        (m, raw_exp - 1022)
    }
}

/// Hash for float keys: fold mantissa and exponent into a non-negative
/// int. Infinities and NaN hash to 0 (NaN never gets inserted).
fn l_hashfloat(n: f64) -> u32 {
    let (m, e) = frexp(n);
    let scaled = m * -(i32::MIN as f64);
    if !scaled.is_finite() {
        return 0;
    }
    let ni = scaled as i64;
    let u = (e as u32).wrapping_add(ni as u32);
    if u <= i32::MAX as u32 { u } else { !u }
}
