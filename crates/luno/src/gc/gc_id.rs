// Typed handles for objects living in the object pool.
// All heap references inside a LuaValue are one of these ids; the payload
// is a bare u32 index into the arena of the matching kind.

macro_rules! define_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u32);

        impl $name {
            #[inline(always)]
            pub fn index(self) -> u32 {
                self.0
            }
        }
    };
}

define_id!(StringId);
define_id!(TableId);
define_id!(ClosureId);
define_id!(ProtoId);
define_id!(UserdataId);
define_id!(ThreadId);
define_id!(UpvalueId);

/// Unified identifier for any collectable object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcId {
    String(StringId),
    Table(TableId),
    Closure(ClosureId),
    Proto(ProtoId),
    Userdata(UserdataId),
    Thread(ThreadId),
    Upvalue(UpvalueId),
}
