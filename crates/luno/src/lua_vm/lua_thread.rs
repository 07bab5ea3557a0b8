// Per-thread execution state: the value stack, the call-info chain and
// the coroutine bookkeeping.
//
// Stack positions are plain offsets from the stack base. Everything that
// refers into the stack (call infos, open upvalues, saved error-handler
// slots) stores an offset too, so growing the stack is a single Vec
// resize with no pointer fixups.

use crate::gc::UpvalueId;
use crate::lua_value::LuaValue;
use crate::lua_vm::call_info::{CallInfo, CallKind, call_status};
use crate::lua_vm::lua_error::ThreadStatus;
use crate::lua_vm::lua_limits::{BASIC_CI_SIZE, BASIC_STACK_SIZE, EXTRA_STACK, LUA_MINSTACK};

pub struct LuaThread {
    /// The value stack. `stack[0]` is a sentinel function slot for the
    /// base frame.
    pub stack: Vec<LuaValue>,
    /// One past the last in-use slot.
    pub top: usize,
    /// Highest slot ordinary code may use; EXTRA_STACK more exist above
    /// it for metamethod calls and the error machinery.
    pub stack_last: usize,
    /// Call-info records; `0..ci_depth` are live, the rest are spares.
    pub ci: Vec<CallInfo>,
    pub ci_depth: usize,
    pub status: ThreadStatus,
    /// Open upvalues into this stack, sorted by descending stack level.
    pub open_upvals: Vec<UpvalueId>,
    /// Stack slot of the active message handler; 0 means none.
    pub errfunc: usize,
    /// Number of non-yieldable frames currently on the stack.
    pub nny: u32,
    /// Nesting depth of host calls (guards the native stack).
    pub n_ccalls: u32,
    /// Hook callback surface.
    pub hook: Option<crate::lua_vm::Hook>,
    pub hook_mask: u8,
    pub allow_hook: bool,
    /// Embedder scratch word, copied from the main thread at creation.
    pub extra_space: usize,
}

impl LuaThread {
    pub fn new(extra_space: usize) -> Self {
        let mut stack = vec![LuaValue::nil(); BASIC_STACK_SIZE + EXTRA_STACK];
        stack[0] = LuaValue::nil(); // sentinel "function" of the base frame
        let mut ci = Vec::with_capacity(BASIC_CI_SIZE);
        ci.push(CallInfo {
            func: 0,
            top: 1 + LUA_MINSTACK,
            nresults: 0,
            callstatus: call_status::CIST_HOST,
            extra: 0,
            u: CallKind::Host {
                k: None,
                ctx: 0,
                old_errfunc: 0,
            },
        });
        LuaThread {
            stack,
            top: 1,
            stack_last: BASIC_STACK_SIZE,
            ci,
            ci_depth: 1,
            status: ThreadStatus::Ok,
            open_upvals: Vec::new(),
            errfunc: 0,
            nny: 1, // not yieldable until a resume says otherwise
            n_ccalls: 0,
            hook: None,
            hook_mask: 0,
            allow_hook: true,
            extra_space,
        }
    }

    /// Current frame.
    #[inline(always)]
    pub fn ci(&self) -> &CallInfo {
        &self.ci[self.ci_depth - 1]
    }

    #[inline(always)]
    pub fn ci_mut(&mut self) -> &mut CallInfo {
        &mut self.ci[self.ci_depth - 1]
    }

    /// Enter a new frame, reusing a spare record when one exists.
    pub fn push_ci(&mut self, ci: CallInfo) {
        if self.ci_depth < self.ci.len() {
            self.ci[self.ci_depth] = ci;
        } else {
            self.ci.push(ci);
        }
        self.ci_depth += 1;
    }

    /// Leave the current frame. The record stays as a spare.
    pub fn pop_ci(&mut self) {
        debug_assert!(self.ci_depth > 1);
        self.ci_depth -= 1;
    }

    /// Drop half of the spare call-info records after a deep recursion
    /// unwinds.
    pub fn shrink_ci(&mut self) {
        let keep = (self.ci_depth + self.ci.len()).div_ceil(2).max(BASIC_CI_SIZE);
        if keep < self.ci.len() {
            self.ci.truncate(keep);
            self.ci.shrink_to_fit();
        }
    }

    /// Free slots between the current top and the usable limit.
    #[inline(always)]
    pub fn stack_space(&self) -> usize {
        self.stack_last.saturating_sub(self.top)
    }

    #[inline(always)]
    pub fn stack_size(&self) -> usize {
        self.stack_last
    }

    /// Resize the stack to `newsize` usable slots (plus the extra
    /// reserve). Offsets everywhere else stay valid.
    pub fn realloc_stack(&mut self, newsize: usize) {
        self.stack.resize(newsize + EXTRA_STACK, LuaValue::nil());
        self.stack_last = newsize;
    }

    /// Bytes accounted to the allocator for this thread.
    pub fn mem_size(&self) -> usize {
        std::mem::size_of::<LuaThread>()
            + self.stack.len() * std::mem::size_of::<LuaValue>()
            + self.ci.len() * std::mem::size_of::<CallInfo>()
    }

    /// True when the thread has returned to its base frame with nothing
    /// left on the stack (a finished or not-yet-started coroutine body).
    pub fn at_base(&self) -> bool {
        self.ci_depth == 1
    }
}
