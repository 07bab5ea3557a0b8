// Closures, upvalues and function prototypes.
//
// A language-level closure pairs a prototype with an array of upvalue
// references; a host closure owns its upvalue cells directly. Prototypes
// are produced by the external chunk loader and treated here as
// collectable immutable objects.

use crate::gc::{ProtoId, StringId, ThreadId, UpvalueId};
use crate::lua_value::lua_value::LuaValue;
use crate::lua_vm::CFunction;

/// A variable captured by a closure. Open upvalues alias a live slot of
/// a thread's stack (by offset, so stack reallocation needs no fixup);
/// closed upvalues own a detached cell.
pub enum Upvalue {
    Open { thread: ThreadId, level: usize },
    Closed(LuaValue),
}

impl Upvalue {
    #[inline(always)]
    pub fn is_open(&self) -> bool {
        matches!(self, Upvalue::Open { .. })
    }

    /// Stack level this upvalue aliases, if still open.
    #[inline(always)]
    pub fn open_level(&self) -> Option<usize> {
        match self {
            Upvalue::Open { level, .. } => Some(*level),
            Upvalue::Closed(_) => None,
        }
    }

    #[inline(always)]
    pub fn closed_value(&self) -> Option<LuaValue> {
        match self {
            Upvalue::Closed(v) => Some(*v),
            Upvalue::Open { .. } => None,
        }
    }
}

/// Description of one upvalue of a prototype.
#[derive(Debug, Clone)]
pub struct UpvalDesc {
    pub name: Option<StringId>,
    /// Captured from the enclosing function's stack (true) or from its
    /// upvalue array (false).
    pub in_stack: bool,
    pub idx: u8,
}

/// A compiled function description: bytecode, constants, nested
/// prototypes, upvalue descriptors and debug info. Opaque to the runtime
/// core; only the collector and the external VM look inside.
pub struct Proto {
    pub code: Vec<u32>,
    pub constants: Vec<LuaValue>,
    pub protos: Vec<ProtoId>,
    pub upvalues: Vec<UpvalDesc>,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    // debug info
    pub source: Option<StringId>,
    pub line_defined: i32,
    pub last_line_defined: i32,
    pub line_info: Vec<i32>,
}

impl Proto {
    pub fn new() -> Self {
        Proto {
            code: Vec::new(),
            constants: Vec::new(),
            protos: Vec::new(),
            upvalues: Vec::new(),
            num_params: 0,
            is_vararg: false,
            max_stack_size: 2,
            source: None,
            line_defined: 0,
            last_line_defined: 0,
            line_info: Vec::new(),
        }
    }

    pub fn mem_size(&self) -> usize {
        std::mem::size_of::<Proto>()
            + self.code.len() * 4
            + self.constants.len() * std::mem::size_of::<LuaValue>()
            + self.protos.len() * 4
            + self.upvalues.len() * std::mem::size_of::<UpvalDesc>()
            + self.line_info.len() * 4
    }
}

impl Default for Proto {
    fn default() -> Self {
        Proto::new()
    }
}

/// Language closure: prototype plus shared upvalue references.
pub struct LClosure {
    pub proto: ProtoId,
    pub upvals: Vec<UpvalueId>,
}

/// Host closure: function pointer plus owned upvalue cells.
pub struct CClosure {
    pub f: CFunction,
    pub upvalue: Vec<LuaValue>,
}

pub enum Closure {
    Lua(LClosure),
    Host(CClosure),
}

impl Closure {
    #[inline(always)]
    pub fn is_host(&self) -> bool {
        matches!(self, Closure::Host(_))
    }

    #[inline(always)]
    pub fn as_lua(&self) -> Option<&LClosure> {
        match self {
            Closure::Lua(c) => Some(c),
            Closure::Host(_) => None,
        }
    }

    #[inline(always)]
    pub fn as_host(&self) -> Option<&CClosure> {
        match self {
            Closure::Host(c) => Some(c),
            Closure::Lua(_) => None,
        }
    }

    pub fn n_upvalues(&self) -> usize {
        match self {
            Closure::Lua(c) => c.upvals.len(),
            Closure::Host(c) => c.upvalue.len(),
        }
    }

    pub fn mem_size(&self) -> usize {
        std::mem::size_of::<Closure>()
            + match self {
                Closure::Lua(c) => c.upvals.len() * 4,
                Closure::Host(c) => c.upvalue.len() * std::mem::size_of::<LuaValue>(),
            }
    }
}
