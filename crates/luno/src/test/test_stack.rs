// Tests for the positional stack API
use crate::*;

#[test]
fn test_push_and_read_primitives() {
    let mut lua = Lua::new();
    lua.push_nil().unwrap();
    lua.push_boolean(true).unwrap();
    lua.push_integer(42).unwrap();
    lua.push_number(0.5).unwrap();
    lua.push_string("hello").unwrap();

    assert_eq!(lua.get_top(), 5);
    assert_eq!(lua.type_of(1), LuaType::Nil);
    assert_eq!(lua.type_of(2), LuaType::Boolean);
    assert_eq!(lua.type_of(3), LuaType::Number);
    assert!(lua.is_integer(3));
    assert_eq!(lua.to_integer(3), 42);
    assert_eq!(lua.to_number(4), 0.5);
    assert!(!lua.is_integer(4));
    assert_eq!(lua.to_string_lossy(5).as_deref(), Some("hello"));
}

#[test]
fn test_negative_indices_and_absindex() {
    let mut lua = Lua::new();
    lua.push_integer(1).unwrap();
    lua.push_integer(2).unwrap();
    lua.push_integer(3).unwrap();

    assert_eq!(lua.to_integer(-1), 3);
    assert_eq!(lua.to_integer(-3), 1);
    assert_eq!(lua.abs_index(-1), 3);
    assert_eq!(lua.abs_index(-3), 1);
    assert_eq!(lua.abs_index(2), 2);
}

#[test]
fn test_out_of_range_index_is_none() {
    let mut lua = Lua::new();
    lua.push_integer(1).unwrap();
    assert_eq!(lua.type_of(2), LuaType::None);
    assert_eq!(lua.type_of(10), LuaType::None);
    assert!(lua.is_none_or_nil(10));
}

#[test]
fn test_set_top_fills_with_nil() {
    let mut lua = Lua::new();
    lua.push_integer(7).unwrap();
    lua.set_top(4).unwrap();
    assert_eq!(lua.get_top(), 4);
    assert_eq!(lua.to_integer(1), 7);
    assert!(lua.is_nil(4));
    lua.set_top(1).unwrap();
    assert_eq!(lua.get_top(), 1);
}

#[test]
fn test_rotate_round_trip_leaves_stack_unchanged() {
    let mut lua = Lua::new();
    for i in 1..=6 {
        lua.push_integer(i).unwrap();
    }
    for n in -2..=2 {
        lua.rotate(2, n);
        lua.rotate(2, -n);
        for i in 1..=6 {
            assert_eq!(lua.to_integer(i), i as i64, "rotate({}) broke slot {}", n, i);
        }
    }
}

#[test]
fn test_rotate_moves_prefix() {
    let mut lua = Lua::new();
    for i in 1..=5 {
        lua.push_integer(i).unwrap();
    }
    // [1 2 3 4 5] rotated by 2 at index 1 -> [4 5 1 2 3]
    lua.rotate(1, 2);
    let got: Vec<i64> = (1..=5).map(|i| lua.to_integer(i)).collect();
    assert_eq!(got, vec![4, 5, 1, 2, 3]);
}

#[test]
fn test_insert_remove_replace_copy() {
    let mut lua = Lua::new();
    lua.push_integer(10).unwrap();
    lua.push_integer(20).unwrap();
    lua.push_integer(30).unwrap();

    lua.insert(1); // [30 10 20]
    assert_eq!(lua.to_integer(1), 30);
    assert_eq!(lua.to_integer(3), 20);

    lua.remove(1); // [10 20]
    assert_eq!(lua.to_integer(1), 10);
    assert_eq!(lua.get_top(), 2);

    lua.push_integer(99).unwrap();
    lua.replace(1); // [99 20]
    assert_eq!(lua.to_integer(1), 99);
    assert_eq!(lua.get_top(), 2);

    lua.copy(2, 1); // [20 20]
    assert_eq!(lua.to_integer(1), 20);
}

#[test]
fn test_push_value_duplicates() {
    let mut lua = Lua::new();
    lua.push_string("dup").unwrap();
    lua.push_value(1).unwrap();
    assert_eq!(lua.get_top(), 2);
    assert!(lua.raw_equal(1, 2));
}

#[test]
fn test_check_stack_grows_and_refuses() {
    let mut lua = Lua::new();
    assert!(lua.check_stack(100));
    for i in 0..100 {
        lua.push_integer(i).unwrap();
    }
    // an absurd request must fail without raising
    assert!(!lua.check_stack(usize::MAX / 2));
}

#[test]
fn test_registry_pseudo_index() {
    let mut lua = Lua::new();
    lua.push_integer(1234).unwrap();
    lua.set_field(LUA_REGISTRYINDEX, "answer").unwrap();
    assert_eq!(lua.get_top(), 0);
    lua.get_field(LUA_REGISTRYINDEX, "answer").unwrap();
    assert_eq!(lua.to_integer(-1), 1234);
}

#[test]
fn test_xmove_between_threads() {
    let mut lua = Lua::new();
    let main = lua.main_thread();
    let co = lua.new_thread().unwrap();
    lua.pop(1);

    lua.push_integer(5).unwrap();
    lua.push_integer(6).unwrap();
    lua.xmove(main, co, 2).unwrap();
    assert_eq!(lua.get_top(), 0);
    let th = lua.thread_ref(co).unwrap();
    assert_eq!(th.top, 3); // base sentinel + the two moved values
}
