//! Centralized runtime limits and configuration constants.
//!
//! Every magic number that controls runtime behavior is collected here
//! for easy tuning.

// ===== Stack =====

/// Extra stack slots above a frame's top, used by metamethod calls and
/// other internal temporaries.
pub const EXTRA_STACK: usize = 5;

/// Minimum guaranteed stack slots available to a host function.
pub const LUA_MINSTACK: usize = 20;

/// Initial stack size for new threads.
pub const BASIC_STACK_SIZE: usize = 2 * LUA_MINSTACK;

/// Maximum stack size (number of slots).
pub const LUAI_MAXSTACK: usize = 1_000_000;

/// Stack size granted while handling a stack-overflow error, so that the
/// message handler itself has room to run.
pub const ERRORSTACKSIZE: usize = LUAI_MAXSTACK + 200;

/// Maximum nesting of host-function calls (guards the native stack).
pub const LUAI_MAXCCALLS: u32 = 200;

/// Initial number of call-info records preallocated for a thread.
pub const BASIC_CI_SIZE: usize = 8;

// ===== Strings =====

/// Maximum length for "short" strings (interned in the string table).
pub const LUAI_MAXSHORTLEN: usize = 40;

/// Initial bucket count of the string table (power of two).
pub const MINSTRTABSIZE: usize = 128;

/// Shift controlling how many bytes of a string take part in its hash:
/// at most `2^STR_HASHLIMIT` bytes are sampled.
pub const STR_HASHLIMIT: u32 = 5;

/// Rows of the literal-string cache.
pub const STRCACHE_N: usize = 53;

/// Entries per row of the literal-string cache.
pub const STRCACHE_M: usize = 2;

// ===== Closures =====

/// Maximum number of upvalues in a closure.
pub const MAXUPVAL: usize = 255;

// ===== Tables =====

/// Maximum bits for an array-part index; the array part is limited to
/// `2^MAXABITS` entries.
pub const MAXABITS: usize = 31;

/// Maximum bits for the hash-part size.
pub const MAXHBITS: usize = MAXABITS - 1;

// ===== Metamethods =====

/// Maximum depth of an `__index`/`__newindex` chain before the runtime
/// assumes a loop.
pub const MAXTAGLOOP: usize = 2000;

// ===== API =====

/// Result-count sentinel: return all results of a call.
pub const LUA_MULTRET: i32 = -1;

/// Pseudo-index of the registry.
pub const LUA_REGISTRYINDEX: i32 = -(LUAI_MAXSTACK as i32) - 1000;

/// Pseudo-index of the i-th upvalue of the running host closure.
#[inline(always)]
pub const fn lua_upvalueindex(i: i32) -> i32 {
    LUA_REGISTRYINDEX - i
}

/// Registry slot of the main thread.
pub const LUA_RIDX_MAINTHREAD: i64 = 1;

/// Registry slot of the globals table.
pub const LUA_RIDX_GLOBALS: i64 = 2;

/// Number of basic value types (nil..thread), used to size the
/// primitive-metatable array.
pub const LUA_NUMTAGS: usize = 9;

// ===== Memory / growable arrays =====

/// Smallest size a growable array jumps to.
pub const MINSIZEARRAY: usize = 4;

// ===== GC defaults =====

/// Pause between successive collections, as a percentage of the memory in
/// use at the end of the previous cycle (200 = wait until usage doubles).
pub const DEFAULT_GCPAUSE: i32 = 200;

/// Collector "granularity": how much marking work is done per unit of
/// allocation debt, as a percentage.
pub const DEFAULT_GCSTEPMUL: i32 = 200;

/// Credit granted after each incremental step, in bytes.
pub const GCSTEPSIZE: isize = 13 * 1024;

/// Maximum number of objects swept per sweep step.
pub const GCSWEEPMAX: usize = 100;

/// Maximum number of finalizers run per collector step.
pub const GCFINMAX: usize = 10;

/// Version tag reported by the API.
pub const LUNO_VERSION_NUM: i64 = 503;
