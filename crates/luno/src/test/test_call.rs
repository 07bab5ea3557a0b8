// Tests for host functions, closures and protected calls
use crate::*;

fn add_two(lua: &mut Lua) -> LuaResult<i32> {
    let a = lua.to_integer(1);
    let b = lua.to_integer(2);
    lua.push_integer(a + b)?;
    Ok(1)
}

#[test]
fn test_call_light_host_function() {
    let mut lua = Lua::new();
    lua.push_cclosure(add_two, 0).unwrap();
    assert_eq!(lua.type_of(-1), LuaType::Function);
    assert!(lua.is_cfunction(-1));

    lua.push_integer(2).unwrap();
    lua.push_integer(3).unwrap();
    lua.call(2, 1).unwrap();
    assert_eq!(lua.get_top(), 1);
    assert_eq!(lua.to_integer(-1), 5);
}

#[test]
fn test_call_adjusts_result_count() {
    let mut lua = Lua::new();

    fn three_results(lua: &mut Lua) -> LuaResult<i32> {
        lua.push_integer(1)?;
        lua.push_integer(2)?;
        lua.push_integer(3)?;
        Ok(3)
    }

    // ask for more results than returned: padded with nil
    lua.push_cclosure(three_results, 0).unwrap();
    lua.call(0, 5).unwrap();
    assert_eq!(lua.get_top(), 5);
    assert_eq!(lua.to_integer(3), 3);
    assert!(lua.is_nil(4));
    lua.set_top(0).unwrap();

    // ask for fewer: truncated
    lua.push_cclosure(three_results, 0).unwrap();
    lua.call(0, 1).unwrap();
    assert_eq!(lua.get_top(), 1);
    assert_eq!(lua.to_integer(1), 1);
    lua.set_top(0).unwrap();

    // multret keeps them all
    lua.push_cclosure(three_results, 0).unwrap();
    lua.call(0, LUA_MULTRET).unwrap();
    assert_eq!(lua.get_top(), 3);
}

#[test]
fn test_host_closure_reads_its_upvalues() {
    let mut lua = Lua::new();

    fn report(lua: &mut Lua) -> LuaResult<i32> {
        lua.push_value(lua_upvalueindex(1))?;
        lua.push_value(lua_upvalueindex(2))?;
        Ok(2)
    }

    lua.push_string("a").unwrap();
    lua.push_integer(1).unwrap();
    lua.push_cclosure(report, 2).unwrap();
    assert_eq!(lua.get_top(), 1); // the upvalues were consumed

    lua.call(0, 2).unwrap();
    assert_eq!(lua.to_string_lossy(1).as_deref(), Some("a"));
    assert_eq!(lua.to_integer(2), 1);
}

#[test]
fn test_upvalue_access_is_bounds_checked() {
    let mut lua = Lua::new();

    fn probe(lua: &mut Lua) -> LuaResult<i32> {
        // one upvalue exists; index 2 is out of range
        assert_eq!(lua.type_of(lua_upvalueindex(1)), LuaType::Number);
        assert_eq!(lua.type_of(lua_upvalueindex(2)), LuaType::None);
        Ok(0)
    }

    lua.push_integer(9).unwrap();
    lua.push_cclosure(probe, 1).unwrap();
    lua.call(0, 0).unwrap();
}

#[test]
fn test_get_and_set_upvalue_from_outside() {
    let mut lua = Lua::new();

    fn noop(_lua: &mut Lua) -> LuaResult<i32> {
        Ok(0)
    }

    lua.push_integer(10).unwrap();
    lua.push_cclosure(noop, 1).unwrap();

    assert!(lua.get_upvalue(1, 1).unwrap());
    assert_eq!(lua.to_integer(-1), 10);
    lua.pop(1);

    lua.push_integer(20).unwrap();
    assert!(lua.set_upvalue(1, 1).unwrap());
    assert!(lua.get_upvalue(1, 1).unwrap());
    assert_eq!(lua.to_integer(-1), 20);
    lua.pop(1);

    assert!(!lua.get_upvalue(1, 2).unwrap());
}

#[test]
fn test_pcall_catches_error_and_leaves_value() {
    let mut lua = Lua::new();

    fn boom(lua: &mut Lua) -> LuaResult<i32> {
        lua.push_string("boom")?;
        Err(lua.error())
    }

    let base = lua.get_top();
    lua.push_cclosure(boom, 0).unwrap();
    let status = lua.pcall(0, 0, 0);
    assert_eq!(status, ThreadStatus::ErrRun);
    // exactly the error value was pushed
    assert_eq!(lua.get_top(), base + 1);
    assert_eq!(lua.to_string_lossy(-1).as_deref(), Some("boom"));
}

#[test]
fn test_pcall_success_keeps_results() {
    let mut lua = Lua::new();
    lua.push_cclosure(add_two, 0).unwrap();
    lua.push_integer(30).unwrap();
    lua.push_integer(12).unwrap();
    let status = lua.pcall(2, 1, 0);
    assert_eq!(status, ThreadStatus::Ok);
    assert_eq!(lua.to_integer(-1), 42);
}

#[test]
fn test_pcall_with_message_handler() {
    let mut lua = Lua::new();

    fn boom(lua: &mut Lua) -> LuaResult<i32> {
        lua.push_string("original")?;
        Err(lua.error())
    }

    fn handler(lua: &mut Lua) -> LuaResult<i32> {
        let msg = lua.to_string_lossy(1).unwrap_or_default();
        lua.push_string(&format!("wrapped: {}", msg))?;
        Ok(1)
    }

    lua.push_cclosure(handler, 0).unwrap(); // slot 1
    lua.push_cclosure(boom, 0).unwrap();
    let status = lua.pcall(0, 0, 1);
    assert_eq!(status, ThreadStatus::ErrRun);
    assert_eq!(lua.to_string_lossy(-1).as_deref(), Some("wrapped: original"));
}

#[test]
fn test_nested_pcall_inner_catches() {
    let mut lua = Lua::new();

    fn inner_boom(lua: &mut Lua) -> LuaResult<i32> {
        lua.push_string("inner")?;
        Err(lua.error())
    }

    fn outer(lua: &mut Lua) -> LuaResult<i32> {
        lua.push_cclosure(inner_boom, 0)?;
        let status = lua.pcall(0, 0, 0);
        assert_eq!(status, ThreadStatus::ErrRun);
        // the outer call itself succeeds
        lua.push_boolean(status.is_error())?;
        Ok(1)
    }

    lua.push_cclosure(outer, 0).unwrap();
    let status = lua.pcall(0, 1, 0);
    assert_eq!(status, ThreadStatus::Ok);
    assert!(lua.to_boolean(-1));
}

#[test]
fn test_error_with_non_string_value() {
    let mut lua = Lua::new();

    fn throw_table(lua: &mut Lua) -> LuaResult<i32> {
        lua.create_table(0, 0)?;
        lua.push_integer(123)?;
        lua.set_field(-2, "code")?;
        Err(lua.error())
    }

    lua.push_cclosure(throw_table, 0).unwrap();
    let status = lua.pcall(0, 0, 0);
    assert_eq!(status, ThreadStatus::ErrRun);
    assert_eq!(lua.type_of(-1), LuaType::Table);
    lua.get_field(-1, "code").unwrap();
    assert_eq!(lua.to_integer(-1), 123);
}

#[test]
fn test_call_metamethod_on_tables() {
    let mut lua = Lua::new();

    fn dispatcher(lua: &mut Lua) -> LuaResult<i32> {
        // called as (the table, arg); return arg doubled
        let n = lua.to_integer(2);
        lua.push_integer(n * 2)?;
        Ok(1)
    }

    lua.create_table(0, 0).unwrap();
    lua.create_table(0, 1).unwrap();
    lua.push_cclosure(dispatcher, 0).unwrap();
    lua.set_field(2, "__call").unwrap();
    lua.set_metatable(1).unwrap();

    lua.push_value(1).unwrap(); // the callable table
    lua.push_integer(21).unwrap();
    lua.call(1, 1).unwrap();
    assert_eq!(lua.to_integer(-1), 42);
}

#[test]
fn test_panic_handler_sees_unprotected_error() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static PANICS: AtomicUsize = AtomicUsize::new(0);

    fn on_panic(_lua: &mut Lua) -> i32 {
        PANICS.fetch_add(1, Ordering::SeqCst);
        0
    }

    fn boom(lua: &mut Lua) -> LuaResult<i32> {
        lua.push_string("unprotected")?;
        Err(lua.error())
    }

    let mut lua = Lua::new();
    lua.at_panic(Some(on_panic));
    lua.push_cclosure(boom, 0).unwrap();
    let r = lua.call(0, 0);
    assert!(r.is_err());
    assert_eq!(PANICS.load(Ordering::SeqCst), 1);
}

#[test]
fn test_load_without_loader_reports_syntax_error() {
    let mut lua = Lua::new();
    let mut reader = SliceReader::new(b"return 1");
    let status = lua.load(&mut reader, "chunk", LoadMode::Text);
    assert_eq!(status, ThreadStatus::ErrSyntax);
    assert!(lua.to_str(-1).is_some());
}

#[test]
fn test_load_builds_closure_with_globals_upvalue() {
    let mut lua = Lua::new();

    fn loader(
        lua: &mut Lua,
        zio: &mut lua_vm::Zio<'_>,
        _chunkname: &str,
        _mode: LoadMode,
    ) -> Result<ProtoId, String> {
        let source = zio.read_all();
        if source.is_empty() {
            return Err("empty chunk".to_string());
        }
        let mut p = Proto::new();
        p.upvalues.push(UpvalDesc {
            name: None,
            in_stack: false,
            idx: 0,
        });
        lua.new_proto(p).map_err(|_| "out of memory".to_string())
    }

    lua.set_loader(loader);
    let mut reader = SliceReader::new(b"anything");
    let status = lua.load(&mut reader, "chunk", LoadMode::Text);
    assert_eq!(status, ThreadStatus::Ok);
    assert_eq!(lua.type_of(-1), LuaType::Function);

    // first upvalue is the globals table
    assert!(lua.get_upvalue(-1, 1).unwrap());
    assert_eq!(lua.type_of(-1), LuaType::Table);

    // empty input surfaces the loader's message
    let mut empty = SliceReader::new(b"");
    let status = lua.load(&mut empty, "chunk", LoadMode::Text);
    assert_eq!(status, ThreadStatus::ErrSyntax);
    assert_eq!(lua.to_string_lossy(-1).as_deref(), Some("empty chunk"));
}

#[test]
fn test_calling_language_closure_without_executor_fails() {
    let mut lua = Lua::new();

    fn loader(
        lua: &mut Lua,
        _zio: &mut lua_vm::Zio<'_>,
        _chunkname: &str,
        _mode: LoadMode,
    ) -> Result<ProtoId, String> {
        lua.new_proto(Proto::new()).map_err(|_| "oom".to_string())
    }

    lua.set_loader(loader);
    let mut reader = SliceReader::new(b"x");
    assert_eq!(
        lua.load(&mut reader, "chunk", LoadMode::Text),
        ThreadStatus::Ok
    );
    let status = lua.pcall(0, 0, 0);
    assert_eq!(status, ThreadStatus::ErrRun);
}

#[test]
fn test_executor_runs_language_frames() {
    let mut lua = Lua::new();

    fn loader(
        lua: &mut Lua,
        _zio: &mut lua_vm::Zio<'_>,
        _chunkname: &str,
        _mode: LoadMode,
    ) -> Result<ProtoId, String> {
        let mut p = Proto::new();
        p.constants.push(LuaValue::integer(2026));
        lua.new_proto(p).map_err(|_| "oom".to_string())
    }

    // a toy VM: every function returns its first constant
    fn execute(lua: &mut Lua) -> LuaResult<i32> {
        let ci = *lua.th().ci();
        let func = lua.stack_at(ci.func);
        let k = func
            .as_closure_id()
            .and_then(|id| lua.pool.closure(id))
            .and_then(|c| c.as_lua())
            .map(|l| l.proto)
            .and_then(|p| lua.pool.proto(p))
            .and_then(|p| p.constants.first().copied())
            .unwrap_or_default();
        lua.push_raw(k)?;
        Ok(1)
    }

    lua.set_loader(loader);
    lua.set_executor(execute);
    let mut reader = SliceReader::new(b"x");
    assert_eq!(
        lua.load(&mut reader, "chunk", LoadMode::Text),
        ThreadStatus::Ok
    );
    lua.call(0, 1).unwrap();
    assert_eq!(lua.to_integer(-1), 2026);
}

#[test]
fn test_upvalue_join_shares_the_cell() {
    let mut lua = Lua::new();

    fn loader(
        lua: &mut Lua,
        _zio: &mut lua_vm::Zio<'_>,
        _chunkname: &str,
        _mode: LoadMode,
    ) -> Result<ProtoId, String> {
        let mut p = Proto::new();
        p.upvalues.push(UpvalDesc {
            name: None,
            in_stack: false,
            idx: 0,
        });
        lua.new_proto(p).map_err(|_| "oom".to_string())
    }

    lua.set_loader(loader);
    let mut r1 = SliceReader::new(b"x");
    let mut r2 = SliceReader::new(b"y");
    assert_eq!(lua.load(&mut r1, "c1", LoadMode::Text), ThreadStatus::Ok);
    assert_eq!(lua.load(&mut r2, "c2", LoadMode::Text), ThreadStatus::Ok);

    lua.upvalue_join(1, 1, 2, 1).unwrap();
    // writing through closure 2 is visible through closure 1
    lua.push_integer(321).unwrap();
    assert!(lua.set_upvalue(2, 1).unwrap());
    assert!(lua.get_upvalue(1, 1).unwrap());
    assert_eq!(lua.to_integer(-1), 321);
}
