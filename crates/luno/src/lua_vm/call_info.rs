// Call-info records: one per active frame of a thread.
//
// The records live in a vector that only grows; `ci_depth` marks the
// live prefix and spent records above it are reused by later calls, so
// deep call chains do not reallocate per call.

use crate::lua_vm::KFunction;

/// Call status bits.
pub mod call_status {
    /// Frame is running a language-level function.
    pub const CIST_LUA: u32 = 1 << 0;
    /// Frame is running a host function.
    pub const CIST_HOST: u32 = 1 << 1;
    /// Frame is a yieldable protected call.
    pub const CIST_YPCALL: u32 = 1 << 2;
    /// Frame was entered through a tail call.
    pub const CIST_TAIL: u32 = 1 << 3;
    /// Frame is running a debug hook.
    pub const CIST_HOOKED: u32 = 1 << 4;
    /// Frame is running a finalizer.
    pub const CIST_FIN: u32 = 1 << 5;
}

/// Per-kind frame state.
#[derive(Clone, Copy)]
pub enum CallKind {
    /// A language-closure frame: its register base and the saved program
    /// counter of the external VM.
    Lua { base: usize, saved_pc: usize },
    /// A host frame: the continuation installed for resumption after a
    /// yield, its context word, and the error handler active below this
    /// frame.
    Host {
        k: Option<KFunction>,
        ctx: i64,
        old_errfunc: usize,
    },
}

#[derive(Clone, Copy)]
pub struct CallInfo {
    /// Stack slot of the function being run in this frame.
    pub func: usize,
    /// Highest stack slot this frame may use (one past).
    pub top: usize,
    /// Results expected by the caller; LUA_MULTRET keeps them all.
    pub nresults: i32,
    pub callstatus: u32,
    /// Scratch word: the saved `func` while a frame is suspended by a
    /// yield (the frame's stack is narrowed to the yielded values).
    pub extra: usize,
    pub u: CallKind,
}

impl CallInfo {
    pub fn new_host(func: usize, top: usize, nresults: i32, old_errfunc: usize) -> Self {
        CallInfo {
            func,
            top,
            nresults,
            callstatus: call_status::CIST_HOST,
            extra: 0,
            u: CallKind::Host {
                k: None,
                ctx: 0,
                old_errfunc,
            },
        }
    }

    pub fn new_lua(func: usize, base: usize, top: usize, nresults: i32) -> Self {
        CallInfo {
            func,
            top,
            nresults,
            callstatus: call_status::CIST_LUA,
            extra: 0,
            u: CallKind::Lua { base, saved_pc: 0 },
        }
    }

    #[inline(always)]
    pub fn is_lua(&self) -> bool {
        self.callstatus & call_status::CIST_LUA != 0
    }

    #[inline(always)]
    pub fn is_host(&self) -> bool {
        self.callstatus & call_status::CIST_HOST != 0
    }

    /// Continuation of a host frame, if one was installed.
    pub fn continuation(&self) -> Option<(KFunction, i64)> {
        match self.u {
            CallKind::Host { k: Some(k), ctx, .. } => Some((k, ctx)),
            _ => None,
        }
    }
}

impl Default for CallInfo {
    fn default() -> Self {
        CallInfo {
            func: 0,
            top: 0,
            nresults: 0,
            callstatus: 0,
            extra: 0,
            u: CallKind::Host {
                k: None,
                ctx: 0,
                old_errfunc: 0,
            },
        }
    }
}
