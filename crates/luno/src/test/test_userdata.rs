// Tests for full and light userdata
use crate::*;

#[test]
fn test_full_userdata_bytes() {
    let mut lua = Lua::new();
    lua.new_userdata(16).unwrap();
    assert_eq!(lua.type_of(-1), LuaType::Userdata);
    assert_eq!(lua.raw_len(-1), 16);

    {
        let bytes = lua.userdata_bytes_mut(-1).unwrap();
        bytes[0] = 0xAB;
        bytes[15] = 0xCD;
    }
    let bytes = lua.userdata_bytes(-1).unwrap();
    assert_eq!(bytes[0], 0xAB);
    assert_eq!(bytes[15], 0xCD);
}

#[test]
fn test_light_userdata_is_a_bare_pointer() {
    let mut lua = Lua::new();
    let mut host_value = 7i64;
    let p = &mut host_value as *mut i64 as *mut std::ffi::c_void;
    lua.push_light_userdata(p).unwrap();
    assert_eq!(lua.type_of(-1), LuaType::LightUserdata);
    assert_eq!(lua.to_userdata(-1), Some(p));

    // same pointer pushed twice is raw-equal
    lua.push_light_userdata(p).unwrap();
    assert!(lua.raw_equal(-1, -2));
}

#[test]
fn test_userdata_metatable() {
    let mut lua = Lua::new();
    lua.new_userdata(4).unwrap();
    assert!(!lua.get_metatable(1).unwrap());

    lua.create_table(0, 1).unwrap();
    lua.push_string("tag").unwrap();
    lua.set_field(2, "kind").unwrap();
    lua.set_metatable(1).unwrap();

    assert!(lua.get_metatable(1).unwrap());
    lua.get_field(-1, "kind").unwrap();
    assert_eq!(lua.to_string_lossy(-1).as_deref(), Some("tag"));
}

#[test]
fn test_uservalue_round_trip() {
    let mut lua = Lua::new();
    lua.new_userdata(1).unwrap();
    lua.get_uservalue(1).unwrap();
    assert!(lua.is_nil(-1));
    lua.pop(1);

    lua.create_table(0, 0).unwrap();
    lua.push_integer(31).unwrap();
    lua.set_field(-2, "inner").unwrap();
    lua.set_uservalue(1).unwrap();

    lua.get_uservalue(1).unwrap();
    assert_eq!(lua.type_of(-1), LuaType::Table);
    lua.get_field(-1, "inner").unwrap();
    assert_eq!(lua.to_integer(-1), 31);
}

#[test]
fn test_uservalue_keeps_object_alive() {
    let mut lua = Lua::new();
    lua.new_userdata(1).unwrap();
    lua.create_table(0, 0).unwrap();
    lua.push_integer(5).unwrap();
    lua.set_field(-2, "x").unwrap();
    lua.set_uservalue(1).unwrap(); // table only reachable through the userdata

    lua.full_gc();
    lua.full_gc();

    lua.get_uservalue(1).unwrap();
    lua.get_field(-1, "x").unwrap();
    assert_eq!(lua.to_integer(-1), 5);
}

#[test]
fn test_index_metamethod_on_userdata() {
    let mut lua = Lua::new();

    fn index_fn(lua: &mut Lua) -> LuaResult<i32> {
        // (userdata, key) -> 100
        lua.push_integer(100)?;
        Ok(1)
    }

    lua.new_userdata(1).unwrap();
    lua.create_table(0, 1).unwrap();
    lua.push_cclosure(index_fn, 0).unwrap();
    lua.set_field(2, "__index").unwrap();
    lua.set_metatable(1).unwrap();

    lua.get_field(1, "whatever").unwrap();
    assert_eq!(lua.to_integer(-1), 100);
}
