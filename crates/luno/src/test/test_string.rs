// Tests for string interning and coercion
use crate::*;

#[test]
fn test_short_strings_intern_to_same_object() {
    let mut lua = Lua::new();
    lua.push_lstring(b"interned").unwrap();
    lua.push_lstring(b"interned").unwrap();
    // identity, not just content
    assert_eq!(lua.to_pointer(1), lua.to_pointer(2));
    assert!(lua.raw_equal(1, 2));
}

#[test]
fn test_long_strings_compare_by_content() {
    let mut lua = Lua::new();
    let long: Vec<u8> = (0..100).map(|i| b'a' + (i % 26)).collect();
    lua.push_lstring(&long).unwrap();
    lua.push_lstring(&long).unwrap();
    // two distinct objects with equal bytes
    assert_ne!(lua.to_pointer(1), lua.to_pointer(2));
    assert!(lua.raw_equal(1, 2));
}

#[test]
fn test_embedded_nul_bytes() {
    let mut lua = Lua::new();
    lua.push_lstring(b"a\0b\0c").unwrap();
    assert_eq!(lua.raw_len(1), 5);
    assert_eq!(lua.to_str(1), Some(&b"a\0b\0c"[..]));
}

#[test]
fn test_literal_cache_hits_same_object() {
    let mut lua = Lua::new();
    let lit = "a literal that stays put";
    lua.push_string(lit).unwrap();
    lua.push_string(lit).unwrap();
    assert_eq!(lua.to_pointer(1), lua.to_pointer(2));
}

#[test]
fn test_to_lstring_coerces_numbers_in_place() {
    let mut lua = Lua::new();
    lua.push_integer(42).unwrap();
    lua.push_number(2.5).unwrap();
    lua.push_number(3.0).unwrap();

    assert_eq!(lua.to_lstring(1).unwrap(), Some(b"42".to_vec()));
    assert_eq!(lua.to_lstring(2).unwrap(), Some(b"2.5".to_vec()));
    assert_eq!(lua.to_lstring(3).unwrap(), Some(b"3.0".to_vec()));
    // the coercion wrote the string back into the slot
    assert_eq!(lua.type_of(1), LuaType::String);
}

#[test]
fn test_to_lstring_leaves_non_numbers_alone() {
    let mut lua = Lua::new();
    lua.push_boolean(true).unwrap();
    assert_eq!(lua.to_lstring(1).unwrap(), None);
    assert_eq!(lua.type_of(1), LuaType::Boolean);
}

#[test]
fn test_string_identity_survives_collection() {
    let mut lua = Lua::new();
    lua.push_lstring(b"pinned by the stack").unwrap();
    let before = lua.to_pointer(1);
    lua.full_gc();
    lua.full_gc();
    assert_eq!(lua.to_pointer(1), before);
    assert_eq!(lua.to_str(1), Some(&b"pinned by the stack"[..]));
    // interning again finds the same object
    lua.push_lstring(b"pinned by the stack").unwrap();
    assert_eq!(lua.to_pointer(-1), before);
}

#[test]
fn test_seeded_hash_is_stable_within_a_state() {
    let mut lua = Lua::with_options(LuaOptions {
        hash_seed: Some(0x5eed),
        ..Default::default()
    });
    // keys must be found again regardless of the seed in use
    lua.create_table(0, 0).unwrap();
    for i in 0..200 {
        let key = format!("key-{}", i);
        lua.push_integer(i).unwrap();
        lua.set_field(1, &key).unwrap();
    }
    for i in (0..200).rev() {
        let key = format!("key-{}", i);
        lua.get_field(1, &key).unwrap();
        assert_eq!(lua.to_integer(-1), i);
        lua.pop(1);
    }
}
