// Tests for arithmetic, comparison and concatenation
use crate::*;

#[test]
fn test_integer_addition() {
    let mut lua = Lua::new();
    lua.push_integer(2).unwrap();
    lua.push_integer(3).unwrap();
    lua.arith(ArithOp::Add).unwrap();
    assert!(lua.is_integer(-1));
    assert_eq!(lua.to_integer(-1), 5);
}

#[test]
fn test_mixed_addition_is_float() {
    let mut lua = Lua::new();
    lua.push_integer(2).unwrap();
    lua.push_number(3.0).unwrap();
    lua.arith(ArithOp::Add).unwrap();
    assert!(!lua.is_integer(-1));
    assert_eq!(lua.to_number(-1), 5.0);
}

#[test]
fn test_division_is_always_float() {
    let mut lua = Lua::new();
    lua.push_integer(7).unwrap();
    lua.push_integer(2).unwrap();
    lua.arith(ArithOp::Div).unwrap();
    assert!(!lua.is_integer(-1));
    assert_eq!(lua.to_number(-1), 3.5);
}

#[test]
fn test_floor_division_and_modulo_signs() {
    let mut lua = Lua::new();
    lua.push_integer(-7).unwrap();
    lua.push_integer(2).unwrap();
    lua.arith(ArithOp::IDiv).unwrap();
    assert_eq!(lua.to_integer(-1), -4);
    lua.pop(1);

    lua.push_integer(-7).unwrap();
    lua.push_integer(2).unwrap();
    lua.arith(ArithOp::Mod).unwrap();
    assert_eq!(lua.to_integer(-1), 1); // result takes the divisor's sign
}

#[test]
fn test_integer_division_by_zero_raises() {
    let mut lua = Lua::new();
    fn body(lua: &mut Lua) -> LuaResult<i32> {
        lua.push_integer(1)?;
        lua.push_integer(0)?;
        lua.arith(ArithOp::IDiv)?;
        Ok(1)
    }
    lua.push_cclosure(body, 0).unwrap();
    let status = lua.pcall(0, 0, 0);
    assert_eq!(status, ThreadStatus::ErrRun);
}

#[test]
fn test_wrapping_integer_arithmetic() {
    let mut lua = Lua::new();
    lua.push_integer(i64::MAX).unwrap();
    lua.push_integer(1).unwrap();
    lua.arith(ArithOp::Add).unwrap();
    assert_eq!(lua.to_integer(-1), i64::MIN);
}

#[test]
fn test_bitwise_ops_need_integer_representation() {
    let mut lua = Lua::new();
    lua.push_integer(0b1100).unwrap();
    lua.push_integer(0b1010).unwrap();
    lua.arith(ArithOp::BAnd).unwrap();
    assert_eq!(lua.to_integer(-1), 0b1000);
    lua.pop(1);

    // 2.0 has an integer representation
    lua.push_number(2.0).unwrap();
    lua.push_integer(1).unwrap();
    lua.arith(ArithOp::Shl).unwrap();
    assert_eq!(lua.to_integer(-1), 4);
    lua.pop(1);

    // 2.5 does not
    fn body(lua: &mut Lua) -> LuaResult<i32> {
        lua.push_number(2.5)?;
        lua.push_integer(1)?;
        lua.arith(ArithOp::BOr)?;
        Ok(1)
    }
    lua.push_cclosure(body, 0).unwrap();
    assert_eq!(lua.pcall(0, 0, 0), ThreadStatus::ErrRun);
}

#[test]
fn test_shift_past_width_is_zero() {
    let mut lua = Lua::new();
    lua.push_integer(1).unwrap();
    lua.push_integer(64).unwrap();
    lua.arith(ArithOp::Shl).unwrap();
    assert_eq!(lua.to_integer(-1), 0);
}

#[test]
fn test_unary_minus() {
    let mut lua = Lua::new();
    lua.push_integer(5).unwrap();
    lua.arith(ArithOp::Unm).unwrap();
    assert_eq!(lua.to_integer(-1), -5);
}

#[test]
fn test_numeric_strings_coerce() {
    let mut lua = Lua::new();
    lua.push_string("10").unwrap();
    lua.push_integer(5).unwrap();
    lua.arith(ArithOp::Add).unwrap();
    assert_eq!(lua.to_integer(-1), 15);
}

#[test]
fn test_add_metamethod() {
    let mut lua = Lua::new();

    fn add_fn(lua: &mut Lua) -> LuaResult<i32> {
        // both operands are the same table; answer something fixed
        lua.push_integer(777)?;
        Ok(1)
    }

    lua.create_table(0, 0).unwrap();
    lua.create_table(0, 1).unwrap();
    lua.push_cclosure(add_fn, 0).unwrap();
    lua.set_field(2, "__add").unwrap();
    lua.set_metatable(1).unwrap();

    lua.push_value(1).unwrap();
    lua.push_integer(1).unwrap();
    lua.arith(ArithOp::Add).unwrap();
    assert_eq!(lua.to_integer(-1), 777);
}

#[test]
fn test_compare_numbers_across_representations() {
    let mut lua = Lua::new();
    lua.push_integer(1).unwrap();
    lua.push_number(1.0).unwrap();
    assert!(lua.compare(1, 2, CompareOp::Eq).unwrap());
    assert!(lua.compare(1, 2, CompareOp::Le).unwrap());
    assert!(!lua.compare(1, 2, CompareOp::Lt).unwrap());
}

#[test]
fn test_compare_strings_by_bytes() {
    let mut lua = Lua::new();
    lua.push_string("abc").unwrap();
    lua.push_string("abd").unwrap();
    assert!(lua.compare(1, 2, CompareOp::Lt).unwrap());
    assert!(!lua.compare(2, 1, CompareOp::Lt).unwrap());
}

#[test]
fn test_eq_metamethod_for_tables() {
    let mut lua = Lua::new();

    fn eq_fn(lua: &mut Lua) -> LuaResult<i32> {
        lua.push_boolean(true)?;
        Ok(1)
    }

    lua.create_table(0, 0).unwrap();
    lua.create_table(0, 0).unwrap();
    // distinct tables are raw-unequal
    assert!(!lua.raw_equal(1, 2));

    lua.create_table(0, 1).unwrap();
    lua.push_cclosure(eq_fn, 0).unwrap();
    lua.set_field(3, "__eq").unwrap();
    lua.push_value(3).unwrap();
    lua.set_metatable(1).unwrap();
    lua.set_metatable(2).unwrap();

    assert!(lua.compare(1, 2, CompareOp::Eq).unwrap());
    // identical references never consult __eq but are equal anyway
    assert!(lua.compare(1, 1, CompareOp::Eq).unwrap());
}

#[test]
fn test_concat_strings_and_numbers() {
    let mut lua = Lua::new();
    lua.push_string("n = ").unwrap();
    lua.push_integer(4).unwrap();
    lua.push_string("!").unwrap();
    lua.concat(3).unwrap();
    assert_eq!(lua.get_top(), 1);
    assert_eq!(lua.to_string_lossy(-1).as_deref(), Some("n = 4!"));
}

#[test]
fn test_concat_zero_pushes_empty_string() {
    let mut lua = Lua::new();
    lua.concat(0).unwrap();
    assert_eq!(lua.raw_len(-1), 0);
    assert_eq!(lua.type_of(-1), LuaType::String);
}
