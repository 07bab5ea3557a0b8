// String table: the per-state intern table for short strings, plus the
// small pointer-keyed cache that speeds up repeated interning of host
// literals.
//
// Only short strings are interned; equal short strings are the same
// object, so equality is id comparison. Long strings are created as
// plain heap objects. The table is a power-of-two bucket array with
// chained entries, doubled when the entry count reaches the bucket
// count. Hashes are seeded per state so bucket order differs between
// runs and crafted collisions do not survive a restart.

use crate::gc::gc_id::StringId;
use crate::gc::object_pool::GcArena;
use crate::lua_value::{LuaString, str_hash};
use crate::lua_vm::lua_limits::{LUAI_MAXSHORTLEN, MINSTRTABSIZE, STRCACHE_M, STRCACHE_N};

pub struct StringTable {
    /// Buckets of (hash, id); the hash copy avoids an arena hop on the
    /// common miss.
    buckets: Vec<Vec<(u32, StringId)>>,
    /// Number of interned strings.
    nuse: usize,
    /// Per-state hash seed.
    pub seed: u32,
    /// Cache for host literals, keyed by their pointer address. Entries
    /// are never empty; sweep replaces dying entries with `memerrmsg`.
    cache: [[StringId; STRCACHE_M]; STRCACHE_N],
    /// The preallocated "not enough memory" string; fixed, never
    /// collected, and the filler for scrubbed cache slots.
    pub memerrmsg: StringId,
}

pub const MEMERRMSG: &str = "not enough memory";

impl StringTable {
    pub fn new(seed: u32) -> Self {
        StringTable {
            buckets: (0..MINSTRTABSIZE).map(|_| Vec::new()).collect(),
            nuse: 0,
            seed,
            cache: [[StringId(0); STRCACHE_M]; STRCACHE_N],
            memerrmsg: StringId(0),
        }
    }

    /// Intern the memory-error message and fill the literal cache with
    /// it. Called once while building the state; the returned size is
    /// what the caller must account.
    pub fn init(&mut self, strings: &mut GcArena<LuaString>, current_white: u8) -> usize {
        let (id, created) = self.intern(MEMERRMSG.as_bytes(), strings, current_white);
        if let Some(s) = strings.get_mut(id.0) {
            s.header.set_fixed();
        }
        self.memerrmsg = id;
        for row in self.cache.iter_mut() {
            for slot in row.iter_mut() {
                *slot = id;
            }
        }
        created.unwrap_or(0)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nuse
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nuse == 0
    }

    /// Locate or create a short string. Returns the id and, when a new
    /// object was created, its accounted size.
    pub fn intern(
        &mut self,
        bytes: &[u8],
        strings: &mut GcArena<LuaString>,
        current_white: u8,
    ) -> (StringId, Option<usize>) {
        debug_assert!(bytes.len() <= LUAI_MAXSHORTLEN);
        let h = str_hash(bytes, self.seed);
        let mask = self.buckets.len() - 1;
        let bucket = (h as usize) & mask;

        for &(eh, id) in &self.buckets[bucket] {
            if eh != h {
                continue;
            }
            if let Some(s) = strings.get_mut(id.0) {
                if s.data.as_bytes() == bytes {
                    // dead but not collected yet: resurrect
                    let other_white = current_white ^ 1;
                    if s.header.is_dead(other_white) {
                        s.header.change_white();
                    }
                    return (id, None);
                }
            }
        }

        if self.nuse >= self.buckets.len() && self.buckets.len() <= usize::MAX / 2 {
            let newsize = self.buckets.len() * 2;
            self.resize(newsize);
        }

        let s = LuaString::new_short(bytes, h);
        let size = s.mem_size();
        let id = StringId(strings.alloc(s, current_white, size as u32));
        let bucket = (h as usize) & (self.buckets.len() - 1);
        self.buckets[bucket].push((h, id));
        self.nuse += 1;
        (id, Some(size))
    }

    /// Create a long string (not interned). Returns the id and its
    /// accounted size.
    pub fn new_long(
        &self,
        bytes: &[u8],
        strings: &mut GcArena<LuaString>,
        current_white: u8,
    ) -> (StringId, usize) {
        let s = LuaString::new_long(bytes, self.seed);
        let size = s.mem_size();
        let id = StringId(strings.alloc(s, current_white, size as u32));
        (id, size)
    }

    /// Redistribute entries over a new power-of-two bucket count.
    pub fn resize(&mut self, newsize: usize) {
        debug_assert!(newsize.is_power_of_two());
        let old = std::mem::take(&mut self.buckets);
        self.buckets = (0..newsize).map(|_| Vec::new()).collect();
        let mask = newsize - 1;
        for bucket in old {
            for (h, id) in bucket {
                self.buckets[(h as usize) & mask].push((h, id));
            }
        }
    }

    /// Unlink a short string while it is being swept.
    pub fn remove(&mut self, id: StringId, hash: u32) {
        let mask = self.buckets.len() - 1;
        let bucket = (hash as usize) & mask;
        let before = self.buckets[bucket].len();
        self.buckets[bucket].retain(|&(_, eid)| eid != id);
        if self.buckets[bucket].len() < before {
            self.nuse -= 1;
        }
    }

    /// Intern a host literal through the pointer-keyed cache. A hit costs
    /// one content comparison; a miss evicts the row's oldest slot.
    pub fn new_cached(
        &mut self,
        s: &str,
        strings: &mut GcArena<LuaString>,
        current_white: u8,
    ) -> (StringId, Option<usize>) {
        let row = (s.as_ptr() as usize) % STRCACHE_N;
        for j in 0..STRCACHE_M {
            let id = self.cache[row][j];
            if let Some(cached) = strings.get(id.0) {
                if cached.data.as_bytes() == s.as_bytes() {
                    return (id, None);
                }
            }
        }
        // miss: make room in the row and intern normally
        for j in (1..STRCACHE_M).rev() {
            self.cache[row][j] = self.cache[row][j - 1];
        }
        let (id, created) = if s.len() <= LUAI_MAXSHORTLEN {
            self.intern(s.as_bytes(), strings, current_white)
        } else {
            let (id, size) = self.new_long(s.as_bytes(), strings, current_white);
            (id, Some(size))
        };
        self.cache[row][0] = id;
        (id, created)
    }

    /// Replace would-be-collected cache entries with the fixed
    /// memory-error string so the cache never pins garbage. Called when
    /// the collector enters its sweep phase.
    pub fn clear_cache(&mut self, strings: &GcArena<LuaString>) {
        for row in self.cache.iter_mut() {
            for slot in row.iter_mut() {
                let white = strings
                    .get(slot.0)
                    .map(|s| s.header.is_white())
                    .unwrap_or(true);
                if white {
                    *slot = self.memerrmsg;
                }
            }
        }
    }
}

/// Build the per-state hash seed: current time mixed with a few
/// process-specific addresses, so hashes differ between runs and between
/// states.
pub fn make_seed() -> u32 {
    let now = chrono::Utc::now();
    let t = now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp()) as u64;
    let mut h = (t as u32) ^ ((t >> 32) as u32);
    let local = &h as *const u32 as u64;
    let code = make_seed as usize as u64;
    h = h
        .wrapping_mul(0x9e37_79b9)
        .wrapping_add((local as u32) ^ ((local >> 32) as u32));
    h = h
        .wrapping_mul(0x9e37_79b9)
        .wrapping_add((code as u32) ^ ((code >> 32) as u32));
    h
}
