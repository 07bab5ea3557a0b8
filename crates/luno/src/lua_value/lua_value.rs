// Tagged value cell.
//
// A value is 16 bytes: an 8-byte payload union and a one-byte type tag.
// The tag encodes the basic type in bits 0-3, a variant in bits 4-5, and
// the "is collectable" marker in bit 6. Collectable payloads hold a u32
// arena id rather than a pointer, so values stay `Copy` and the object
// pool can be reorganized without touching live cells.

use crate::gc::{ClosureId, GcId, ProtoId, StringId, TableId, ThreadId, UpvalueId, UserdataId};
use crate::lua_vm::CFunction;

// ============ Basic type tags (bits 0-3) ============

pub const LUA_TNIL: u8 = 0;
pub const LUA_TBOOLEAN: u8 = 1;
pub const LUA_TLIGHTUSERDATA: u8 = 2;
pub const LUA_TNUMBER: u8 = 3;
pub const LUA_TSTRING: u8 = 4;
pub const LUA_TTABLE: u8 = 5;
pub const LUA_TFUNCTION: u8 = 6;
pub const LUA_TUSERDATA: u8 = 7;
pub const LUA_TTHREAD: u8 = 8;

pub const LUA_NUMTYPES: u8 = 9;
/// Function prototypes (only visible to the collector).
pub const LUA_TPROTO: u8 = LUA_NUMTYPES;
/// Upvalue cells (only visible to the collector).
pub const LUA_TUPVAL: u8 = LUA_NUMTYPES + 1;
/// Key of a removed table entry whose slot is still chained.
pub const LUA_TDEADKEY: u8 = LUA_NUMTYPES + 2;

/// Pseudo-type returned when an API index is out of range.
pub const LUA_TNONE: i32 = -1;

// ============ Variant tags (bits 4-5) ============

#[inline(always)]
pub const fn makevariant(t: u8, v: u8) -> u8 {
    t | (v << 4)
}

pub const LUA_VNIL: u8 = makevariant(LUA_TNIL, 0);

pub const LUA_VFALSE: u8 = makevariant(LUA_TBOOLEAN, 0);
pub const LUA_VTRUE: u8 = makevariant(LUA_TBOOLEAN, 1);

pub const LUA_VNUMINT: u8 = makevariant(LUA_TNUMBER, 0);
pub const LUA_VNUMFLT: u8 = makevariant(LUA_TNUMBER, 1);

pub const LUA_VLIGHTUSERDATA: u8 = makevariant(LUA_TLIGHTUSERDATA, 0);

/// Light host function: a bare function pointer, not collectable.
pub const LUA_VLCF: u8 = makevariant(LUA_TFUNCTION, 0);

/// Collectable marker (bit 6).
pub const BIT_ISCOLLECTABLE: u8 = 1 << 6;

#[inline(always)]
pub const fn ctb(t: u8) -> u8 {
    t | BIT_ISCOLLECTABLE
}

pub const LUA_VSHRSTR: u8 = ctb(makevariant(LUA_TSTRING, 0));
pub const LUA_VLNGSTR: u8 = ctb(makevariant(LUA_TSTRING, 1));
pub const LUA_VTABLE: u8 = ctb(makevariant(LUA_TTABLE, 0));
/// Language-level closure (prototype + upvalues).
pub const LUA_VLCL: u8 = ctb(makevariant(LUA_TFUNCTION, 1));
/// Host closure (function pointer + owned upvalues).
pub const LUA_VCCL: u8 = ctb(makevariant(LUA_TFUNCTION, 2));
pub const LUA_VUSERDATA: u8 = ctb(makevariant(LUA_TUSERDATA, 0));
pub const LUA_VTHREAD: u8 = ctb(makevariant(LUA_TTHREAD, 0));
pub const LUA_VPROTO: u8 = ctb(makevariant(LUA_TPROTO, 0));
pub const LUA_VUPVAL: u8 = ctb(makevariant(LUA_TUPVAL, 0));
pub const LUA_VDEADKEY: u8 = ctb(makevariant(LUA_TDEADKEY, 0));

#[inline(always)]
pub const fn novariant(tt: u8) -> u8 {
    tt & 0x0F
}

#[inline(always)]
pub const fn withvariant(tt: u8) -> u8 {
    tt & 0x3F
}

// ============ Payload union ============

#[derive(Clone, Copy)]
#[repr(C)]
pub union Value {
    /// Arena id of a collectable object.
    pub gc: u32,
    /// Light userdata pointer.
    pub p: usize,
    /// Light host-function pointer.
    pub f: usize,
    /// Integer number.
    pub i: i64,
    /// Float number.
    pub n: f64,
}

// ============ Tagged cell ============

#[derive(Clone, Copy)]
#[repr(C)]
pub struct LuaValue {
    pub value_: Value,
    pub tt_: u8,
}

impl LuaValue {
    // ===== Constructors =====

    #[inline(always)]
    pub const fn nil() -> Self {
        LuaValue {
            value_: Value { i: 0 },
            tt_: LUA_VNIL,
        }
    }

    #[inline(always)]
    pub const fn boolean(b: bool) -> Self {
        LuaValue {
            value_: Value { i: 0 },
            tt_: if b { LUA_VTRUE } else { LUA_VFALSE },
        }
    }

    #[inline(always)]
    pub const fn integer(i: i64) -> Self {
        LuaValue {
            value_: Value { i },
            tt_: LUA_VNUMINT,
        }
    }

    #[inline(always)]
    pub const fn float(n: f64) -> Self {
        LuaValue {
            value_: Value { n },
            tt_: LUA_VNUMFLT,
        }
    }

    #[inline(always)]
    pub fn light_userdata(p: *mut std::ffi::c_void) -> Self {
        LuaValue {
            value_: Value { p: p as usize },
            tt_: LUA_VLIGHTUSERDATA,
        }
    }

    #[inline(always)]
    pub fn cfunction(f: CFunction) -> Self {
        LuaValue {
            value_: Value { f: f as usize },
            tt_: LUA_VLCF,
        }
    }

    #[inline(always)]
    pub fn short_string(id: StringId) -> Self {
        LuaValue {
            value_: Value { gc: id.0 },
            tt_: LUA_VSHRSTR,
        }
    }

    #[inline(always)]
    pub fn long_string(id: StringId) -> Self {
        LuaValue {
            value_: Value { gc: id.0 },
            tt_: LUA_VLNGSTR,
        }
    }

    #[inline(always)]
    pub fn table(id: TableId) -> Self {
        LuaValue {
            value_: Value { gc: id.0 },
            tt_: LUA_VTABLE,
        }
    }

    #[inline(always)]
    pub fn lua_closure(id: ClosureId) -> Self {
        LuaValue {
            value_: Value { gc: id.0 },
            tt_: LUA_VLCL,
        }
    }

    #[inline(always)]
    pub fn host_closure(id: ClosureId) -> Self {
        LuaValue {
            value_: Value { gc: id.0 },
            tt_: LUA_VCCL,
        }
    }

    #[inline(always)]
    pub fn userdata(id: UserdataId) -> Self {
        LuaValue {
            value_: Value { gc: id.0 },
            tt_: LUA_VUSERDATA,
        }
    }

    #[inline(always)]
    pub fn thread(id: ThreadId) -> Self {
        LuaValue {
            value_: Value { gc: id.0 },
            tt_: LUA_VTHREAD,
        }
    }

    #[inline(always)]
    pub fn proto(id: ProtoId) -> Self {
        LuaValue {
            value_: Value { gc: id.0 },
            tt_: LUA_VPROTO,
        }
    }

    /// Dead-key marker keeping the id bits of a removed collectable key so
    /// that an in-progress `next` can still locate its slot.
    #[inline(always)]
    pub fn dead_key(raw: u32) -> Self {
        LuaValue {
            value_: Value { gc: raw },
            tt_: LUA_VDEADKEY,
        }
    }

    // ===== Tag queries =====

    #[inline(always)]
    pub fn rawtt(&self) -> u8 {
        self.tt_
    }

    /// Basic type without variant bits.
    #[inline(always)]
    pub fn ttype(&self) -> u8 {
        novariant(self.tt_)
    }

    /// Type tag with variant bits (no collectable marker).
    #[inline(always)]
    pub fn ttypetag(&self) -> u8 {
        withvariant(self.tt_)
    }

    #[inline(always)]
    pub fn checktag(&self, t: u8) -> bool {
        self.tt_ == t
    }

    #[inline(always)]
    pub fn is_collectable(&self) -> bool {
        (self.tt_ & BIT_ISCOLLECTABLE) != 0
    }

    #[inline(always)]
    pub fn is_nil(&self) -> bool {
        self.ttype() == LUA_TNIL
    }

    #[inline(always)]
    pub fn is_boolean(&self) -> bool {
        self.ttype() == LUA_TBOOLEAN
    }

    #[inline(always)]
    pub fn is_false(&self) -> bool {
        self.checktag(LUA_VFALSE)
    }

    /// Language truth: everything except nil and false.
    #[inline(always)]
    pub fn is_truthy(&self) -> bool {
        !(self.is_nil() || self.is_false())
    }

    #[inline(always)]
    pub fn is_number(&self) -> bool {
        self.ttype() == LUA_TNUMBER
    }

    #[inline(always)]
    pub fn is_integer(&self) -> bool {
        self.checktag(LUA_VNUMINT)
    }

    #[inline(always)]
    pub fn is_float(&self) -> bool {
        self.checktag(LUA_VNUMFLT)
    }

    #[inline(always)]
    pub fn is_string(&self) -> bool {
        self.ttype() == LUA_TSTRING
    }

    #[inline(always)]
    pub fn is_short_string(&self) -> bool {
        self.checktag(LUA_VSHRSTR)
    }

    #[inline(always)]
    pub fn is_long_string(&self) -> bool {
        self.checktag(LUA_VLNGSTR)
    }

    #[inline(always)]
    pub fn is_table(&self) -> bool {
        self.checktag(LUA_VTABLE)
    }

    #[inline(always)]
    pub fn is_function(&self) -> bool {
        self.ttype() == LUA_TFUNCTION
    }

    #[inline(always)]
    pub fn is_lua_closure(&self) -> bool {
        self.checktag(LUA_VLCL)
    }

    #[inline(always)]
    pub fn is_host_closure(&self) -> bool {
        self.checktag(LUA_VCCL)
    }

    #[inline(always)]
    pub fn is_cfunction(&self) -> bool {
        self.checktag(LUA_VLCF)
    }

    #[inline(always)]
    pub fn is_full_userdata(&self) -> bool {
        self.checktag(LUA_VUSERDATA)
    }

    #[inline(always)]
    pub fn is_light_userdata(&self) -> bool {
        self.checktag(LUA_VLIGHTUSERDATA)
    }

    #[inline(always)]
    pub fn is_thread(&self) -> bool {
        self.checktag(LUA_VTHREAD)
    }

    #[inline(always)]
    pub fn is_dead_key(&self) -> bool {
        self.checktag(LUA_VDEADKEY)
    }

    // ===== Payload access =====

    #[inline(always)]
    pub fn ivalue(&self) -> i64 {
        debug_assert!(self.is_integer());
        unsafe { self.value_.i }
    }

    #[inline(always)]
    pub fn fltvalue(&self) -> f64 {
        debug_assert!(self.is_float());
        unsafe { self.value_.n }
    }

    /// Numeric value as a float, for either representation.
    #[inline(always)]
    pub fn nvalue(&self) -> f64 {
        if self.is_integer() {
            self.ivalue() as f64
        } else {
            self.fltvalue()
        }
    }

    #[inline(always)]
    pub fn bvalue(&self) -> bool {
        debug_assert!(self.is_boolean());
        self.checktag(LUA_VTRUE)
    }

    #[inline(always)]
    pub fn pvalue(&self) -> *mut std::ffi::c_void {
        debug_assert!(self.is_light_userdata());
        unsafe { self.value_.p as *mut std::ffi::c_void }
    }

    #[inline(always)]
    pub fn fvalue(&self) -> CFunction {
        debug_assert!(self.is_cfunction());
        unsafe { std::mem::transmute::<usize, CFunction>(self.value_.f) }
    }

    /// Raw id bits of a collectable payload.
    #[inline(always)]
    pub fn raw_gc(&self) -> u32 {
        debug_assert!(self.is_collectable());
        unsafe { self.value_.gc }
    }

    #[inline(always)]
    pub fn as_string_id(&self) -> Option<StringId> {
        if self.is_string() {
            Some(StringId(unsafe { self.value_.gc }))
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn as_table_id(&self) -> Option<TableId> {
        if self.is_table() {
            Some(TableId(unsafe { self.value_.gc }))
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn as_closure_id(&self) -> Option<ClosureId> {
        if self.is_lua_closure() || self.is_host_closure() {
            Some(ClosureId(unsafe { self.value_.gc }))
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn as_userdata_id(&self) -> Option<UserdataId> {
        if self.is_full_userdata() {
            Some(UserdataId(unsafe { self.value_.gc }))
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn as_thread_id(&self) -> Option<ThreadId> {
        if self.is_thread() {
            Some(ThreadId(unsafe { self.value_.gc }))
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn as_proto_id(&self) -> Option<ProtoId> {
        if self.checktag(LUA_VPROTO) {
            Some(ProtoId(unsafe { self.value_.gc }))
        } else {
            None
        }
    }

    /// The GC identity of a collectable value.
    pub fn as_gc_id(&self) -> Option<GcId> {
        let id = if self.is_collectable() {
            unsafe { self.value_.gc }
        } else {
            return None;
        };
        match self.ttypetag() {
            t if t == withvariant(LUA_VSHRSTR) || t == withvariant(LUA_VLNGSTR) => {
                Some(GcId::String(StringId(id)))
            }
            t if t == withvariant(LUA_VTABLE) => Some(GcId::Table(TableId(id))),
            t if t == withvariant(LUA_VLCL) || t == withvariant(LUA_VCCL) => {
                Some(GcId::Closure(ClosureId(id)))
            }
            t if t == withvariant(LUA_VUSERDATA) => Some(GcId::Userdata(UserdataId(id))),
            t if t == withvariant(LUA_VTHREAD) => Some(GcId::Thread(ThreadId(id))),
            t if t == withvariant(LUA_VPROTO) => Some(GcId::Proto(ProtoId(id))),
            t if t == withvariant(LUA_VUPVAL) => Some(GcId::Upvalue(UpvalueId(id))),
            _ => None,
        }
    }

    /// Exact-representation integer view of a float, when it has one.
    #[inline]
    pub fn float_to_integer(&self) -> Option<i64> {
        debug_assert!(self.is_float());
        let n = self.fltvalue();
        if n.floor() == n && n >= -(2f64.powi(63)) && n < 2f64.powi(63) {
            Some(n as i64)
        } else {
            None
        }
    }

    /// Name of the basic type, as reported in error messages.
    pub fn type_name(&self) -> &'static str {
        match self.ttype() {
            LUA_TNIL => "nil",
            LUA_TBOOLEAN => "boolean",
            LUA_TLIGHTUSERDATA | LUA_TUSERDATA => "userdata",
            LUA_TNUMBER => "number",
            LUA_TSTRING => "string",
            LUA_TTABLE => "table",
            LUA_TFUNCTION => "function",
            LUA_TTHREAD => "thread",
            _ => "no value",
        }
    }

    /// Raw (metamethod-free) equality for values whose comparison does not
    /// need the object pool: numbers compare across representations,
    /// everything else compares by tag and payload bits. Long strings are
    /// the one case that needs content comparison; the pool-level
    /// `raw_equal` handles them and falls back here.
    pub fn raw_eq_bits(&self, other: &LuaValue) -> bool {
        if self.is_number() && other.is_number() {
            return match (self.is_integer(), other.is_integer()) {
                (true, true) => self.ivalue() == other.ivalue(),
                (false, false) => self.fltvalue() == other.fltvalue(),
                (true, false) => (self.ivalue() as f64) == other.fltvalue(),
                (false, true) => self.fltvalue() == (other.ivalue() as f64),
            };
        }
        if self.ttypetag() != other.ttypetag() {
            return false;
        }
        match self.ttypetag() {
            t if t == withvariant(LUA_VNIL) => true,
            t if t == withvariant(LUA_VFALSE) || t == withvariant(LUA_VTRUE) => true,
            t if t == withvariant(LUA_VLIGHTUSERDATA) => unsafe {
                self.value_.p == other.value_.p
            },
            t if t == withvariant(LUA_VLCF) => unsafe { self.value_.f == other.value_.f },
            _ => unsafe { self.value_.gc == other.value_.gc },
        }
    }
}

impl Default for LuaValue {
    fn default() -> Self {
        LuaValue::nil()
    }
}

impl std::fmt::Debug for LuaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ttypetag() {
            t if t == withvariant(LUA_VNIL) => write!(f, "nil"),
            t if t == withvariant(LUA_VFALSE) => write!(f, "false"),
            t if t == withvariant(LUA_VTRUE) => write!(f, "true"),
            t if t == withvariant(LUA_VNUMINT) => write!(f, "{}", self.ivalue()),
            t if t == withvariant(LUA_VNUMFLT) => write!(f, "{}", self.fltvalue()),
            _ => write!(f, "{}: #{}", self.type_name(), unsafe { self.value_.gc }),
        }
    }
}
