// Tests for yield/resume
use crate::*;

fn yield7_cont(lua: &mut Lua, _status: ThreadStatus, _ctx: i64) -> LuaResult<i32> {
    lua.push_integer(8)?;
    Ok(1)
}

fn yield7_body(lua: &mut Lua) -> LuaResult<i32> {
    lua.push_integer(7)?;
    lua.yield_k(1, 0, Some(yield7_cont))
}

#[test]
fn test_yield_then_return() {
    let mut lua = Lua::new();
    let main = lua.main_thread();
    let co = lua.new_thread().unwrap();
    lua.pop(1);

    // push the body onto the coroutine's stack
    lua.push_cclosure(yield7_body, 0).unwrap();
    lua.xmove(main, co, 1).unwrap();

    // first resume: the body yields 7
    let status = lua.resume(co, 0);
    assert_eq!(status, ThreadStatus::Yield);
    assert_eq!(lua.thread_status(co), ThreadStatus::Yield);
    lua.xmove(co, main, 1).unwrap();
    assert_eq!(lua.to_integer(-1), 7);
    lua.pop(1);

    // second resume: the continuation returns 8
    let status = lua.resume(co, 0);
    assert_eq!(status, ThreadStatus::Ok);
    lua.xmove(co, main, 1).unwrap();
    assert_eq!(lua.to_integer(-1), 8);
    lua.pop(1);

    // third resume: nothing left to run
    let status = lua.resume(co, 0);
    assert!(status.is_error());
}

#[test]
fn test_resume_passes_arguments_to_body() {
    let mut lua = Lua::new();

    fn body(lua: &mut Lua) -> LuaResult<i32> {
        let a = lua.to_integer(1);
        let b = lua.to_integer(2);
        lua.push_integer(a * b)?;
        Ok(1)
    }

    let main = lua.main_thread();
    let co = lua.new_thread().unwrap();
    lua.pop(1);

    lua.push_cclosure(body, 0).unwrap();
    lua.push_integer(6).unwrap();
    lua.push_integer(7).unwrap();
    lua.xmove(main, co, 3).unwrap();

    let status = lua.resume(co, 2);
    assert_eq!(status, ThreadStatus::Ok);
    lua.xmove(co, main, 1).unwrap();
    assert_eq!(lua.to_integer(-1), 42);
}

#[test]
fn test_resume_arguments_become_yield_results() {
    use std::sync::atomic::{AtomicI64, Ordering};
    static SEEN: AtomicI64 = AtomicI64::new(0);

    // yields once without a continuation; the values passed to the next
    // resume become the results of the interrupted call frame
    fn body(lua: &mut Lua) -> LuaResult<i32> {
        lua.push_integer(1)?;
        lua.yield_k(1, 0, Some(cont))
    }

    fn cont(lua: &mut Lua, _status: ThreadStatus, _ctx: i64) -> LuaResult<i32> {
        // the resume argument is on top of the stack
        SEEN.store(lua.to_integer(-1), Ordering::SeqCst);
        Ok(0)
    }

    let mut lua = Lua::new();
    let main = lua.main_thread();
    let co = lua.new_thread().unwrap();
    lua.pop(1);

    lua.push_cclosure(body, 0).unwrap();
    lua.xmove(main, co, 1).unwrap();
    assert_eq!(lua.resume(co, 0), ThreadStatus::Yield);
    lua.xmove(co, main, 1).unwrap();
    lua.pop(1);

    // pass 55 back into the coroutine
    lua.push_integer(55).unwrap();
    lua.xmove(main, co, 1).unwrap();
    assert_eq!(lua.resume(co, 1), ThreadStatus::Ok);
    assert_eq!(SEEN.load(Ordering::SeqCst), 55);
}

#[test]
fn test_yield_from_main_thread_fails() {
    let mut lua = Lua::new();

    fn try_yield(lua: &mut Lua) -> LuaResult<i32> {
        lua.push_integer(1)?;
        lua.yield_k(1, 0, None)
    }

    lua.push_cclosure(try_yield, 0).unwrap();
    let status = lua.pcall(0, 0, 0);
    assert_eq!(status, ThreadStatus::ErrRun);
    let msg = lua.to_string_lossy(-1).unwrap_or_default();
    assert!(msg.contains("outside a coroutine"), "got: {}", msg);
}

#[test]
fn test_yield_across_nonyieldable_call_fails() {
    let mut lua = Lua::new();

    fn inner(lua: &mut Lua) -> LuaResult<i32> {
        lua.push_integer(1)?;
        lua.yield_k(1, 0, None)
    }

    fn outer(lua: &mut Lua) -> LuaResult<i32> {
        // a plain call is a non-yieldable boundary
        lua.push_cclosure(inner, 0)?;
        lua.call(0, 0)?;
        Ok(0)
    }

    let main = lua.main_thread();
    let co = lua.new_thread().unwrap();
    lua.pop(1);
    lua.push_cclosure(outer, 0).unwrap();
    lua.xmove(main, co, 1).unwrap();

    let status = lua.resume(co, 0);
    assert_eq!(status, ThreadStatus::ErrRun);
    lua.xmove(co, main, 1).unwrap();
    let msg = lua.to_string_lossy(-1).unwrap_or_default();
    assert!(msg.contains("C-call boundary"), "got: {}", msg);
}

#[test]
fn test_error_inside_coroutine_marks_it_dead() {
    let mut lua = Lua::new();

    fn body(lua: &mut Lua) -> LuaResult<i32> {
        lua.push_string("inner failure")?;
        Err(lua.error())
    }

    let main = lua.main_thread();
    let co = lua.new_thread().unwrap();
    lua.pop(1);
    lua.push_cclosure(body, 0).unwrap();
    lua.xmove(main, co, 1).unwrap();

    let status = lua.resume(co, 0);
    assert_eq!(status, ThreadStatus::ErrRun);
    // the error value stays on the coroutine's stack
    lua.xmove(co, main, 1).unwrap();
    assert_eq!(lua.to_string_lossy(-1).as_deref(), Some("inner failure"));

    // a dead coroutine cannot be resumed
    let status = lua.resume(co, 0);
    assert!(status.is_error());
}

#[test]
fn test_is_yieldable() {
    use std::sync::atomic::{AtomicBool, Ordering};
    static INSIDE: AtomicBool = AtomicBool::new(false);

    fn body(lua: &mut Lua) -> LuaResult<i32> {
        INSIDE.store(lua.is_yieldable(), Ordering::SeqCst);
        Ok(0)
    }

    let mut lua = Lua::new();
    assert!(!lua.is_yieldable()); // main thread

    let main = lua.main_thread();
    let co = lua.new_thread().unwrap();
    lua.pop(1);
    lua.push_cclosure(body, 0).unwrap();
    lua.xmove(main, co, 1).unwrap();
    assert_eq!(lua.resume(co, 0), ThreadStatus::Ok);
    assert!(INSIDE.load(Ordering::SeqCst));
}
