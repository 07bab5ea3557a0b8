/// Lightweight error kind used for nonlocal unwinding.
///
/// The error *value* (an arbitrary language value) does not travel inside
/// the `Err`; it is left on the erroring thread's stack, exactly like the
/// C API does. Keeping this enum `Copy` keeps every `LuaResult` two words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaError {
    /// Error raised by the running program (type error, bad index,
    /// explicit raise). Error value on the stack.
    Runtime,
    /// Allocation failed even after a full collection. The error value is
    /// the preallocated memory-error string.
    Memory,
    /// The chunk loader rejected the source; the message is on the stack.
    Syntax,
    /// Error raised while running an error handler.
    ErrErr,
    /// Error raised inside a finalizer.
    GcMeta,
    /// Internal unwind signal for `yield`; never escapes `resume`.
    Yield,
}

impl std::fmt::Display for LuaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LuaError::Runtime => write!(f, "runtime error"),
            LuaError::Memory => write!(f, "not enough memory"),
            LuaError::Syntax => write!(f, "syntax error"),
            LuaError::ErrErr => write!(f, "error in error handling"),
            LuaError::GcMeta => write!(f, "error in __gc metamethod"),
            LuaError::Yield => write!(f, "yield"),
        }
    }
}

impl std::error::Error for LuaError {}

pub type LuaResult<T> = Result<T, LuaError>;

/// Status code returned by `pcall`, `resume` and `load`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadStatus {
    #[default]
    Ok,
    Yield,
    ErrRun,
    ErrSyntax,
    ErrMem,
    ErrGcMeta,
    ErrErr,
}

impl ThreadStatus {
    #[inline]
    pub fn is_ok(self) -> bool {
        self == ThreadStatus::Ok
    }

    #[inline]
    pub fn is_error(self) -> bool {
        !matches!(self, ThreadStatus::Ok | ThreadStatus::Yield)
    }

    pub fn from_error(e: LuaError) -> Self {
        match e {
            LuaError::Runtime => ThreadStatus::ErrRun,
            LuaError::Memory => ThreadStatus::ErrMem,
            LuaError::Syntax => ThreadStatus::ErrSyntax,
            LuaError::ErrErr => ThreadStatus::ErrErr,
            LuaError::GcMeta => ThreadStatus::ErrGcMeta,
            LuaError::Yield => ThreadStatus::Yield,
        }
    }
}
