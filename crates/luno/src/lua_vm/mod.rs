// Thread state, shared state and the plumbing between them.

pub mod call_info;
pub mod global;
pub mod lua_error;
pub mod lua_limits;
pub mod lua_thread;
pub mod mem;
pub mod metamethod;
pub mod zio;

pub use call_info::{CallInfo, CallKind, call_status};
pub use global::{ChunkLoader, Executor, GlobalState, LoadMode, Lua, LuaOptions};
pub use lua_error::{LuaError, LuaResult, ThreadStatus};
pub use lua_thread::LuaThread;
pub use metamethod::TmKind;
pub use zio::{Reader, SliceReader, Zio};

/// Host function callable from the language. Results are the top `n`
/// stack values, with `n` returned.
pub type CFunction = fn(&mut Lua) -> LuaResult<i32>;

/// Continuation installed by a yieldable call: invoked with the status
/// of the interrupted call and the context word saved alongside it.
pub type KFunction = fn(&mut Lua, ThreadStatus, i64) -> LuaResult<i32>;

/// Handler of last resort for errors no protected call catches; runs
/// with the error value on the stack.
pub type PanicFunction = fn(&mut Lua) -> i32;

/// Sink for runtime warnings (finalizer errors and the like).
pub type WarnFunction = fn(&str);

/// Debug hook callback surface.
pub type Hook = fn(&mut Lua, HookEvent);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    Call,
    Return,
}

pub const LUA_MASKCALL: u8 = 1 << 0;
pub const LUA_MASKRET: u8 = 1 << 1;
