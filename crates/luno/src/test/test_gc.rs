// Tests for the incremental collector: liveness, barriers, weak tables
// and finalizers
use crate::*;

#[test]
fn test_unreachable_objects_are_collected() {
    let mut lua = Lua::new();
    lua.full_gc();
    let baseline = lua.pool.object_count();
    for _ in 0..100 {
        lua.create_table(4, 4).unwrap();
        lua.pop(1);
    }
    lua.full_gc();
    lua.full_gc();
    assert!(
        lua.pool.object_count() <= baseline + 2,
        "garbage tables survived: {} vs {}",
        lua.pool.object_count(),
        baseline
    );
}

#[test]
fn test_stack_values_survive_collection() {
    let mut lua = Lua::new();
    lua.create_table(0, 0).unwrap();
    lua.push_integer(5).unwrap();
    lua.set_field(1, "x").unwrap();
    lua.full_gc();
    lua.full_gc();
    lua.get_field(1, "x").unwrap();
    assert_eq!(lua.to_integer(-1), 5);
}

#[test]
fn test_registry_values_survive_collection() {
    let mut lua = Lua::new();
    lua.create_table(0, 0).unwrap();
    lua.push_integer(11).unwrap();
    lua.set_field(-2, "k").unwrap();
    lua.set_field(LUA_REGISTRYINDEX, "anchored").unwrap();
    assert_eq!(lua.get_top(), 0);

    lua.full_gc();
    lua.full_gc();

    lua.get_field(LUA_REGISTRYINDEX, "anchored").unwrap();
    assert_eq!(lua.type_of(-1), LuaType::Table);
    lua.get_field(-1, "k").unwrap();
    assert_eq!(lua.to_integer(-1), 11);
}

#[test]
fn test_upvalues_keep_objects_alive() {
    let mut lua = Lua::new();

    fn noop(_lua: &mut Lua) -> LuaResult<i32> {
        Ok(0)
    }

    lua.create_table(0, 0).unwrap();
    lua.push_integer(77).unwrap();
    lua.set_field(-2, "payload").unwrap();
    lua.push_cclosure(noop, 1).unwrap(); // the table is now only in the upvalue

    lua.full_gc();
    lua.full_gc();

    assert!(lua.get_upvalue(1, 1).unwrap());
    assert_eq!(lua.type_of(-1), LuaType::Table);
    lua.get_field(-1, "payload").unwrap();
    assert_eq!(lua.to_integer(-1), 77);
}

#[test]
fn test_backward_barrier_keeps_new_reference_alive() {
    use crate::gc::{GC, GcId, GcRoots, GcState, ObjectPool, StepResult, StringTable};
    use crate::lua_value::LuaTable;
    use crate::lua_vm::lua_thread::LuaThread;
    use crate::lua_vm::metamethod::TM_N;

    let mut pool = ObjectPool::new();
    let mut gc = GC::new(usize::MAX);
    let mut strt = StringTable::new(1);
    let main = ThreadId(pool.threads.alloc(LuaThread::new(0), gc.current_white, 64));
    let reg = TableId(pool.tables.alloc(LuaTable::new(), gc.current_white, 64));
    let roots = GcRoots {
        registry: LuaValue::table(reg),
        mainthread: main,
        running: main,
        mt: [None; 9],
        tmname: [StringId(u32::MAX); TM_N],
    };

    // march the collector until the registry table is black mid-cycle
    let mut guard = 0;
    loop {
        gc.single_step(&roots, &mut pool, &mut strt, false);
        let black = pool
            .header(GcId::Table(reg))
            .map(|h| h.is_black())
            .unwrap_or(false);
        if black && gc.state == GcState::Propagate {
            break;
        }
        guard += 1;
        assert!(guard < 1000, "collector never blackened the registry");
    }

    // write a brand-new white table into the black registry; the
    // backward barrier queues the registry for re-traversal
    let fresh = TableId(pool.tables.alloc(LuaTable::new(), gc.current_white, 64));
    pool.table_set_int(reg, 1, LuaValue::table(fresh)).unwrap();
    gc.barrier_back(reg, &mut pool);

    // finish the cycle
    let mut guard = 0;
    loop {
        match gc.single_step(&roots, &mut pool, &mut strt, false) {
            StepResult::Pause => break,
            StepResult::Finalize => unreachable!("nothing is finalizable here"),
            _ => {}
        }
        guard += 1;
        assert!(guard < 10_000, "collector never finished the cycle");
    }

    assert!(
        pool.tables.contains(fresh.0),
        "barrier failed: the new table was collected"
    );
}

#[test]
fn test_weak_value_entries_are_cleared() {
    let mut lua = Lua::new();
    // t with __mode = "v"
    lua.create_table(0, 0).unwrap();
    lua.create_table(0, 1).unwrap();
    lua.push_string("v").unwrap();
    lua.set_field(2, "__mode").unwrap();
    lua.set_metatable(1).unwrap();

    // t[1] = {} (only weakly reachable), t[2] = a string (never cleared)
    lua.create_table(0, 0).unwrap();
    lua.set_i(1, 1).unwrap();
    lua.push_string("strings are values").unwrap();
    lua.set_i(1, 2).unwrap();

    lua.full_gc();

    lua.raw_get_i(1, 1).unwrap();
    assert!(lua.is_nil(-1), "weak value was not cleared");
    lua.pop(1);
    lua.raw_get_i(1, 2).unwrap();
    assert_eq!(
        lua.to_string_lossy(-1).as_deref(),
        Some("strings are values")
    );
}

#[test]
fn test_weak_value_entry_kept_while_value_is_reachable() {
    let mut lua = Lua::new();
    lua.create_table(0, 0).unwrap();
    lua.create_table(0, 1).unwrap();
    lua.push_string("v").unwrap();
    lua.set_field(2, "__mode").unwrap();
    lua.set_metatable(1).unwrap();

    lua.create_table(0, 0).unwrap(); // stays on the stack: reachable
    lua.push_value(2).unwrap();
    lua.set_i(1, 1).unwrap();

    lua.full_gc();

    lua.raw_get_i(1, 1).unwrap();
    assert_eq!(lua.type_of(-1), LuaType::Table);
}

#[test]
fn test_ephemeron_entry_dies_with_its_key() {
    let mut lua = Lua::new();
    // t with weak keys
    lua.create_table(0, 0).unwrap();
    lua.create_table(0, 1).unwrap();
    lua.push_string("k").unwrap();
    lua.set_field(2, "__mode").unwrap();
    lua.set_metatable(1).unwrap();

    // entry with an unreachable key
    lua.create_table(0, 0).unwrap();
    lua.push_integer(1).unwrap();
    lua.raw_set(1).unwrap();

    lua.full_gc();

    // the table must now be empty
    lua.push_nil().unwrap();
    assert!(!lua.next(1).unwrap(), "ephemeron entry survived its key");
}

#[test]
fn test_ephemeron_entry_survives_while_key_lives() {
    let mut lua = Lua::new();
    lua.create_table(0, 0).unwrap();
    lua.create_table(0, 1).unwrap();
    lua.push_string("k").unwrap();
    lua.set_field(2, "__mode").unwrap();
    lua.set_metatable(1).unwrap();

    lua.create_table(0, 0).unwrap(); // the key, kept on the stack
    lua.push_value(2).unwrap();
    lua.push_integer(9).unwrap();
    lua.raw_set(1).unwrap();

    lua.full_gc();

    lua.push_value(2).unwrap();
    lua.raw_get(1).unwrap();
    assert_eq!(lua.to_integer(-1), 9);
}

#[test]
fn test_finalizer_runs_exactly_once() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static RUNS: AtomicUsize = AtomicUsize::new(0);

    fn finalizer(lua: &mut Lua) -> LuaResult<i32> {
        RUNS.fetch_add(1, Ordering::SeqCst);
        assert_eq!(lua.type_of(1), LuaType::Table);
        Ok(0)
    }

    RUNS.store(0, Ordering::SeqCst);
    let mut lua = Lua::new();
    lua.create_table(0, 0).unwrap();
    lua.create_table(0, 1).unwrap();
    lua.push_cclosure(finalizer, 0).unwrap();
    lua.set_field(2, "__gc").unwrap();
    lua.set_metatable(1).unwrap();
    lua.pop(1); // the table is now garbage

    lua.full_gc(); // detects death, resurrects, runs the finalizer
    assert_eq!(RUNS.load(Ordering::SeqCst), 1);
    lua.full_gc(); // actually frees it; the finalizer must not rerun
    lua.full_gc();
    assert_eq!(RUNS.load(Ordering::SeqCst), 1);
}

#[test]
fn test_finalizer_error_is_discarded_with_a_warning() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static WARNINGS: AtomicUsize = AtomicUsize::new(0);

    fn failing_finalizer(lua: &mut Lua) -> LuaResult<i32> {
        lua.push_string("finalizer exploded")?;
        Err(lua.error())
    }

    fn count_warning(_msg: &str) {
        WARNINGS.fetch_add(1, Ordering::SeqCst);
    }

    WARNINGS.store(0, Ordering::SeqCst);
    let mut lua = Lua::new();
    lua.set_warn(Some(count_warning));
    lua.create_table(0, 0).unwrap();
    lua.create_table(0, 1).unwrap();
    lua.push_cclosure(failing_finalizer, 0).unwrap();
    lua.set_field(2, "__gc").unwrap();
    lua.set_metatable(1).unwrap();
    lua.pop(1);

    lua.full_gc();
    assert_eq!(WARNINGS.load(Ordering::SeqCst), 1);
    // collection continues normally afterwards
    lua.full_gc();
}

#[test]
fn test_close_runs_pending_finalizers() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static RUNS: AtomicUsize = AtomicUsize::new(0);

    fn finalizer(_lua: &mut Lua) -> LuaResult<i32> {
        RUNS.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    RUNS.store(0, Ordering::SeqCst);
    {
        let mut lua = Lua::new();
        lua.create_table(0, 0).unwrap();
        lua.create_table(0, 1).unwrap();
        lua.push_cclosure(finalizer, 0).unwrap();
        lua.set_field(2, "__gc").unwrap();
        lua.set_metatable(1).unwrap();
        // still reachable from the stack; close finalizes anyway
    }
    assert_eq!(RUNS.load(Ordering::SeqCst), 1);
}

#[test]
fn test_memory_limit_raises_memory_error() {
    let mut lua = Lua::with_options(LuaOptions {
        memory_limit: 512 * 1024,
        hash_seed: Some(7),
    });
    let blob = vec![0x61u8; 4096];
    let mut hit = false;
    for i in 0..100_000 {
        // unique long strings anchored on the stack: nothing to free
        let mut chunk = blob.clone();
        chunk.extend_from_slice(format!("{}", i).as_bytes());
        match lua.push_lstring(&chunk) {
            Ok(()) => {}
            Err(e) => {
                assert_eq!(e, LuaError::Memory);
                hit = true;
                break;
            }
        }
    }
    assert!(hit, "the memory limit never triggered");
}

#[test]
fn test_gc_count_tracks_usage() {
    let mut lua = Lua::new();
    let before = lua.gc(GcCommand::Count);
    lua.create_table(1024, 0).unwrap();
    let after = lua.gc(GcCommand::Count);
    assert!(after > before, "allocation not reflected: {} -> {}", before, after);
}

#[test]
fn test_gc_stop_and_restart() {
    let mut lua = Lua::new();
    assert_eq!(lua.gc(GcCommand::IsRunning), 1);
    lua.gc(GcCommand::Stop);
    assert_eq!(lua.gc(GcCommand::IsRunning), 0);
    lua.gc(GcCommand::Restart);
    assert_eq!(lua.gc(GcCommand::IsRunning), 1);
}

#[test]
fn test_incremental_steps_eventually_collect() {
    let mut lua = Lua::new();
    lua.full_gc();
    let baseline = lua.pool.object_count();
    for _ in 0..50 {
        lua.create_table(2, 2).unwrap();
        lua.pop(1);
    }
    // drive whole cycles through explicit steps only
    lua.gc(GcCommand::Stop);
    let mut finished_cycles = 0;
    for _ in 0..10_000 {
        if lua.gc(GcCommand::Step(4)) == 1 {
            finished_cycles += 1;
            if finished_cycles >= 2 {
                break;
            }
        }
    }
    assert!(finished_cycles >= 2, "stepping never completed a cycle");
    assert!(lua.pool.object_count() <= baseline + 2);
}

#[test]
fn test_setpause_and_setstepmul_report_old_values() {
    let mut lua = Lua::new();
    let old = lua.gc(GcCommand::SetPause(150));
    assert_eq!(old, 200);
    assert_eq!(lua.gc(GcCommand::SetPause(200)), 150);
    let old = lua.gc(GcCommand::SetStepMul(300));
    assert_eq!(old, 200);
    lua.gc(GcCommand::SetStepMul(old as i32));
}
