// Value representation: the tagged cell and every heap object kind it
// can refer to.

mod lua_closure;
mod lua_string;
mod lua_table;
mod lua_userdata;
#[allow(clippy::module_inception)]
mod lua_value;

pub use lua_closure::{CClosure, Closure, LClosure, Proto, UpvalDesc, Upvalue};
pub use lua_string::{LuaString, str_hash};
pub use lua_table::{LuaTable, Node, SetInfo, TableOpError, raw_equal};
pub use lua_userdata::LuaUserdata;
pub use lua_value::*;
