// Runtime core of a Lua-style scripting language: the tagged value
// model, interned strings, hybrid array/hash tables, threads with
// explicit value stacks and call-info chains, an incremental tri-color
// garbage collector, and a stack-based embedding API. The bytecode
// compiler and the VM are external collaborators behind function-pointer
// seams.

#[cfg(test)]
mod test;

pub mod api;
pub mod gc;
pub mod lua_value;
pub mod lua_vm;

pub use api::{ArithOp, CompareOp, GcCommand, LuaType};
pub use gc::{
    ClosureId, GcId, ObjectPool, ProtoId, StringId, TableId, ThreadId, UpvalueId, UserdataId,
};
pub use lua_value::{LuaString, LuaTable, LuaValue, Proto, UpvalDesc};
pub use lua_vm::{
    CFunction, ChunkLoader, Executor, KFunction, LoadMode, Lua, LuaError, LuaOptions, LuaResult,
    Reader, SliceReader, ThreadStatus,
};
pub use lua_vm::lua_limits::{LUA_MULTRET, LUA_REGISTRYINDEX, lua_upvalueindex};
