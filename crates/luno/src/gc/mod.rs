// Incremental tri-color mark-and-sweep collector.
//
// Colors: white (two parities), gray (reachable, references not yet
// scanned) and black (fully scanned). New objects are born with the
// current white; the atomic step flips the parity, so everything still
// carrying the old white during sweep is garbage. While marking is in
// progress the invariant "black never points to white" is maintained by
// write barriers: tables take the backward barrier (the table goes back
// to gray, queued for re-traversal in the atomic step), everything else
// takes the forward barrier (the referent is marked immediately).
//
// Phases: Pause -> Propagate -> (atomic) -> SwpAllGc -> SwpFin -> SwpEnd
// -> CallFin -> Pause. The atomic step re-marks mutated roots, converges
// ephemeron tables to a fixed point, clears weak entries whose referents
// died, separates unreachable finalizable objects and resurrects them
// for one more cycle. Sweeping walks the arenas with a cursor, freeing
// dead objects and repainting survivors, a bounded number per step.
//
// Work is driven by allocation debt: every allocation adds to the debt
// and safe points run steps that do `gcstepmul` percent of the debt in
// marking/sweeping work. `gcpause` decides how much the heap may grow
// after a cycle before the next one starts.

pub mod gc_header;
pub mod gc_id;
pub mod object_pool;
pub mod string_table;

pub use gc_header::GcHeader;
pub use gc_id::*;
pub use object_pool::{GcArena, GcBox, ObjectPool};
pub use string_table::{MEMERRMSG, StringTable, make_seed};

use crate::lua_value::{LuaValue, Upvalue};
use crate::lua_vm::lua_limits::{
    DEFAULT_GCPAUSE, DEFAULT_GCSTEPMUL, GCSTEPSIZE, GCSWEEPMAX, LUA_NUMTAGS,
};
use crate::lua_vm::mem::AllocGauge;
use crate::lua_vm::metamethod::{TM_N, TmKind};

/// Collector phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcState {
    Propagate,
    EnterAtomic,
    /// Sweeping ordinary objects.
    SwpAllGc,
    /// Repainting objects owned by the finalizer machinery.
    SwpFin,
    SwpEnd,
    /// Running pending finalizers.
    CallFin,
    Pause,
}

impl GcState {
    /// While marking, the black-to-white invariant must hold.
    #[inline]
    pub fn keep_invariant(self) -> bool {
        matches!(self, GcState::Propagate | GcState::EnterAtomic)
    }

    #[inline]
    pub fn is_sweep_phase(self) -> bool {
        matches!(self, GcState::SwpAllGc | GcState::SwpFin | GcState::SwpEnd)
    }
}

/// Result of one collector micro-step.
pub enum StepResult {
    /// Marking or sweeping work done, in accounted bytes.
    Work(usize),
    /// The atomic step just ran.
    Atomic,
    /// A finalizer is pending; the caller must run it (the collector
    /// cannot call back into the runtime).
    Finalize,
    /// The cycle finished.
    Pause,
}

/// Everything the collector treats as a root, snapshotted by the state.
pub struct GcRoots {
    pub registry: LuaValue,
    pub mainthread: ThreadId,
    pub running: ThreadId,
    pub mt: [Option<TableId>; LUA_NUMTAGS],
    pub tmname: [StringId; TM_N],
}

/// Sweep order over the arenas.
const SWEEP_ARENAS: usize = 7;

pub struct GC {
    /// Byte accounting; the debt drives stepping.
    pub mem: AllocGauge,
    pub state: GcState,
    pub current_white: u8,
    /// False while stopped by the host (`gc(stop)`).
    pub running: bool,
    /// Collection forced by an allocation failure.
    pub emergency: bool,
    pub gcpause: i32,
    pub gcstepmul: i32,
    /// Memory in use at the end of the previous cycle.
    estimate: isize,

    gray: Vec<GcId>,
    grayagain: Vec<GcId>,
    /// Weak-value tables found this cycle.
    weak: Vec<TableId>,
    /// Ephemeron (weak-key) tables found this cycle.
    ephemeron: Vec<TableId>,
    /// All-weak tables found this cycle.
    allweak: Vec<TableId>,
    /// Unreachable objects whose finalizer must run, oldest first.
    pub tobefnz: Vec<GcId>,

    sweep_arena: usize,
    sweep_pos: usize,

    /// Interned `__mode` name, stashed at cycle start so traversal can
    /// read weakness without the global state.
    mode_key: StringId,
}

impl GC {
    pub fn new(memory_limit: usize) -> Self {
        GC {
            mem: AllocGauge::new(memory_limit),
            state: GcState::Pause,
            current_white: 0,
            running: true,
            emergency: false,
            gcpause: DEFAULT_GCPAUSE,
            gcstepmul: DEFAULT_GCSTEPMUL,
            estimate: 0,
            gray: Vec::with_capacity(64),
            grayagain: Vec::with_capacity(32),
            weak: Vec::new(),
            ephemeron: Vec::new(),
            allweak: Vec::new(),
            tobefnz: Vec::new(),
            sweep_arena: 0,
            sweep_pos: 0,
            mode_key: StringId(0),
        }
    }

    #[inline(always)]
    pub fn other_white(&self) -> u8 {
        self.current_white ^ 1
    }

    /// Account a freshly created object.
    #[inline]
    pub fn track_new_object(&mut self, size: usize) {
        self.mem.account_alloc(size);
    }

    /// A positive debt at a safe point means it is time to step.
    #[inline(always)]
    pub fn should_step(&self) -> bool {
        self.running && self.mem.gc_debt > 0
    }

    // ============ Marking ============

    /// Mark the object behind a value, if it is collectable and white.
    fn mark_value(&mut self, v: &LuaValue, pool: &mut ObjectPool) {
        if let Some(id) = v.as_gc_id() {
            self.mark_object(id, pool);
        }
    }

    /// White objects become gray and enter the work list; strings have no
    /// references and blacken immediately.
    pub fn mark_object(&mut self, id: GcId, pool: &mut ObjectPool) {
        let Some(h) = pool.header_mut(id) else {
            return;
        };
        if !h.is_white() {
            return;
        }
        match id {
            GcId::String(_) => h.make_black(),
            _ => {
                h.make_gray();
                self.gray.push(id);
            }
        }
    }

    /// Traverse one gray object; returns the work done in bytes.
    fn propagate_mark(&mut self, pool: &mut ObjectPool) -> usize {
        let Some(id) = self.gray.pop() else {
            return 0;
        };
        let size = pool.header(id).map(|h| h.size as usize).unwrap_or(0);
        match id {
            GcId::Table(t) => self.traverse_table(t, pool),
            GcId::Closure(c) => self.traverse_closure(c, pool),
            GcId::Proto(p) => self.traverse_proto(p, pool),
            GcId::Userdata(u) => self.traverse_userdata(u, pool),
            GcId::Thread(t) => self.traverse_thread(t, pool),
            GcId::Upvalue(u) => self.traverse_upvalue(u, pool),
            GcId::String(_) => {}
        }
        size
    }

    fn propagate_all(&mut self, pool: &mut ObjectPool) -> usize {
        let mut work = 0;
        while !self.gray.is_empty() {
            work += self.propagate_mark(pool);
        }
        work
    }

    /// Weakness of a table, from its metatable's `__mode` string:
    /// (weak keys, weak values).
    fn table_mode(&self, t: TableId, pool: &ObjectPool, tmname_mode: StringId) -> (bool, bool) {
        let Some(mt) = pool.tables.get(t.0).and_then(|tb| tb.data.metatable) else {
            return (false, false);
        };
        let mode = pool.table_get(mt, &LuaValue::short_string(tmname_mode));
        let Some(id) = mode.as_string_id() else {
            return (false, false);
        };
        match pool.string_bytes(id) {
            Some(bytes) => (bytes.contains(&b'k'), bytes.contains(&b'v')),
            None => (false, false),
        }
    }

    /// A weak entry's key or value is cleared when its referent died.
    /// Strings behave as values here: a white string key is marked and
    /// kept rather than cleared.
    fn is_cleared(&mut self, v: &LuaValue, pool: &mut ObjectPool) -> bool {
        let Some(id) = v.as_gc_id() else {
            return false;
        };
        if v.is_string() {
            self.mark_object(id, pool);
            return false;
        }
        pool.header(id).map(|h| h.is_white()).unwrap_or(false)
    }

    fn traverse_table(&mut self, t: TableId, pool: &mut ObjectPool) {
        let metatable = pool.tables.get(t.0).and_then(|tb| tb.data.metatable);
        if let Some(mt) = metatable {
            self.mark_object(GcId::Table(mt), pool);
        }
        let (weak_key, weak_value) = self.table_mode(t, pool, self.mode_key);

        match (weak_key, weak_value) {
            (false, false) => self.traverse_strong_table(t, pool),
            (false, true) => self.traverse_weak_value_table(t, pool),
            (true, false) => {
                self.traverse_ephemeron(t, pool);
            }
            (true, true) => {
                // nothing to mark now; entries are cleared in the atomic
                if let Some(h) = pool.header_mut(GcId::Table(t)) {
                    h.make_black();
                }
                self.allweak.push(t);
            }
        }
    }

    fn traverse_strong_table(&mut self, t: TableId, pool: &mut ObjectPool) {
        let mut to_mark: Vec<LuaValue> = Vec::new();
        if let Some(tb) = pool.tables.get_mut(t.0) {
            tb.header.make_black();
            for v in &tb.data.array {
                if !v.is_nil() {
                    to_mark.push(*v);
                }
            }
            for n in tb.data.node.iter_mut() {
                if n.i_val.is_nil() {
                    // entry is dead: keep only the key's identity so an
                    // ongoing traversal can still find the slot
                    if n.i_key.is_collectable() {
                        n.i_key = LuaValue::dead_key(n.i_key.raw_gc());
                    }
                } else {
                    to_mark.push(n.i_key);
                    to_mark.push(n.i_val);
                }
            }
        }
        for v in &to_mark {
            self.mark_value(v, pool);
        }
    }

    /// Weak values: keys are strong. During propagate the table is
    /// queued for re-traversal in the atomic step; in the atomic it is
    /// linked for value clearing if any value may die.
    fn traverse_weak_value_table(&mut self, t: TableId, pool: &mut ObjectPool) {
        let mut keys: Vec<LuaValue> = Vec::new();
        let mut has_white_values = false;
        if let Some(tb) = pool.tables.get_mut(t.0) {
            for n in tb.data.node.iter_mut() {
                if n.i_val.is_nil() {
                    if n.i_key.is_collectable() {
                        n.i_key = LuaValue::dead_key(n.i_key.raw_gc());
                    }
                } else {
                    keys.push(n.i_key);
                }
            }
        }
        for k in &keys {
            self.mark_value(k, pool);
        }
        // array part entries count as values too; strings behave as
        // values that are never cleared, so mark them instead
        let mut string_values: Vec<LuaValue> = Vec::new();
        if let Some(tb) = pool.tables.get(t.0) {
            for v in tb
                .data
                .array
                .iter()
                .chain(tb.data.node.iter().map(|n| &n.i_val))
            {
                if v.is_string() {
                    string_values.push(*v);
                } else if self.value_is_white(v, pool) {
                    has_white_values = true;
                }
            }
        }
        for v in &string_values {
            self.mark_value(v, pool);
        }
        if self.state == GcState::Propagate {
            if let Some(h) = pool.header_mut(GcId::Table(t)) {
                h.make_gray();
            }
            self.grayagain.push(GcId::Table(t));
        } else {
            if let Some(h) = pool.header_mut(GcId::Table(t)) {
                h.make_black();
            }
            if has_white_values {
                self.weak.push(t);
            }
        }
    }

    /// Ephemeron: a value is only reachable through its key. Marks the
    /// values whose keys are already marked; returns whether anything
    /// was marked (the convergence loop repeats until nothing is).
    fn traverse_ephemeron(&mut self, t: TableId, pool: &mut ObjectPool) -> bool {
        let mut marked = false;
        let mut has_clears = false; // some key may be collected
        let mut has_ww = false; // white key with white value

        let mut array_vals: Vec<LuaValue> = Vec::new();
        let mut entries: Vec<(LuaValue, LuaValue)> = Vec::new();
        if let Some(tb) = pool.tables.get_mut(t.0) {
            tb.header.make_black();
            for v in &tb.data.array {
                if !v.is_nil() {
                    array_vals.push(*v);
                }
            }
            for n in tb.data.node.iter_mut() {
                if n.i_val.is_nil() {
                    if n.i_key.is_collectable() {
                        n.i_key = LuaValue::dead_key(n.i_key.raw_gc());
                    }
                } else {
                    entries.push((n.i_key, n.i_val));
                }
            }
        }
        // array part keys are integers, hence strong
        for v in &array_vals {
            if self.value_is_white(v, pool) {
                marked = true;
            }
            self.mark_value(v, pool);
        }
        for (k, v) in &entries {
            if self.is_cleared(k, pool) {
                has_clears = true;
                if self.value_is_white(v, pool) {
                    has_ww = true;
                }
            } else if self.value_is_white(v, pool) {
                marked = true;
                self.mark_value(v, pool);
            }
        }

        if self.state == GcState::Propagate {
            if let Some(h) = pool.header_mut(GcId::Table(t)) {
                h.make_gray();
            }
            self.grayagain.push(GcId::Table(t));
        } else if has_ww {
            self.ephemeron.push(t);
        } else if has_clears {
            self.allweak.push(t);
        }
        marked
    }

    fn value_is_white(&self, v: &LuaValue, pool: &ObjectPool) -> bool {
        v.as_gc_id()
            .and_then(|id| pool.header(id))
            .map(|h| h.is_white())
            .unwrap_or(false)
    }

    fn traverse_closure(&mut self, c: ClosureId, pool: &mut ObjectPool) {
        use crate::lua_value::Closure;
        let mut to_mark: Vec<LuaValue> = Vec::new();
        let mut upvals: Vec<UpvalueId> = Vec::new();
        let mut proto: Option<ProtoId> = None;
        if let Some(cl) = pool.closures.get_mut(c.0) {
            cl.header.make_black();
            match &cl.data {
                Closure::Lua(l) => {
                    proto = Some(l.proto);
                    upvals.extend_from_slice(&l.upvals);
                }
                Closure::Host(h) => {
                    to_mark.extend_from_slice(&h.upvalue);
                }
            }
        }
        if let Some(p) = proto {
            self.mark_object(GcId::Proto(p), pool);
        }
        for u in upvals {
            self.mark_object(GcId::Upvalue(u), pool);
        }
        for v in &to_mark {
            self.mark_value(v, pool);
        }
    }

    fn traverse_proto(&mut self, p: ProtoId, pool: &mut ObjectPool) {
        let mut to_mark: Vec<LuaValue> = Vec::new();
        let mut children: Vec<ProtoId> = Vec::new();
        let mut strs: Vec<StringId> = Vec::new();
        if let Some(pr) = pool.protos.get_mut(p.0) {
            pr.header.make_black();
            to_mark.extend_from_slice(&pr.data.constants);
            children.extend_from_slice(&pr.data.protos);
            if let Some(s) = pr.data.source {
                strs.push(s);
            }
            for uv in &pr.data.upvalues {
                if let Some(n) = uv.name {
                    strs.push(n);
                }
            }
        }
        for v in &to_mark {
            self.mark_value(v, pool);
        }
        for c in children {
            self.mark_object(GcId::Proto(c), pool);
        }
        for s in strs {
            self.mark_object(GcId::String(s), pool);
        }
    }

    fn traverse_userdata(&mut self, u: UserdataId, pool: &mut ObjectPool) {
        let mut mt: Option<TableId> = None;
        let mut uv = LuaValue::nil();
        if let Some(ud) = pool.userdata.get_mut(u.0) {
            ud.header.make_black();
            mt = ud.data.metatable;
            uv = ud.data.user_value;
        }
        if let Some(mt) = mt {
            self.mark_object(GcId::Table(mt), pool);
        }
        self.mark_value(&uv, pool);
    }

    /// Threads mutate their stacks without barriers, so a thread stays
    /// gray during propagate and is re-traversed in the atomic step.
    fn traverse_thread(&mut self, t: ThreadId, pool: &mut ObjectPool) {
        let atomic = self.state != GcState::Propagate;
        let mut slots: Vec<LuaValue> = Vec::new();
        let mut upvals: Vec<UpvalueId> = Vec::new();
        if let Some(th) = pool.threads.get_mut(t.0) {
            let top = th.data.top;
            slots.extend_from_slice(&th.data.stack[..top.min(th.data.stack.len())]);
            upvals.extend_from_slice(&th.data.open_upvals);
            if atomic {
                th.header.make_black();
                // clear the dead part of the stack
                for v in th.data.stack[top..].iter_mut() {
                    *v = LuaValue::nil();
                }
            } else {
                th.header.make_gray();
            }
        }
        for v in &slots {
            self.mark_value(v, pool);
        }
        for u in upvals {
            self.mark_object(GcId::Upvalue(u), pool);
        }
        if !atomic {
            self.grayagain.push(GcId::Thread(t));
        }
    }

    fn traverse_upvalue(&mut self, u: UpvalueId, pool: &mut ObjectPool) {
        let mut v = LuaValue::nil();
        let mut open = false;
        if let Some(up) = pool.upvalues.get_mut(u.0) {
            up.header.make_black();
            match &up.data {
                Upvalue::Closed(c) => v = *c,
                Upvalue::Open { .. } => open = true,
            }
        }
        if open {
            // read through the thread stack it aliases
            v = pool.upvalue_value(u);
        }
        self.mark_value(&v, pool);
    }

    // ============ Cycle control ============

    /// Begin a new cycle: mark the roots.
    fn restart_collection(&mut self, roots: &GcRoots, pool: &mut ObjectPool) {
        self.gray.clear();
        self.grayagain.clear();
        self.weak.clear();
        self.ephemeron.clear();
        self.allweak.clear();
        self.mode_key = roots.tmname[TmKind::Mode as usize];
        self.mark_roots(roots, pool);
    }

    fn mark_roots(&mut self, roots: &GcRoots, pool: &mut ObjectPool) {
        self.mark_object(GcId::Thread(roots.mainthread), pool);
        self.mark_object(GcId::Thread(roots.running), pool);
        self.mark_value(&roots.registry, pool);
        for mt in roots.mt.iter().flatten() {
            self.mark_object(GcId::Table(*mt), pool);
        }
        for s in roots.tmname {
            self.mark_object(GcId::String(s), pool);
        }
        // objects waiting for their finalizer stay alive until it runs
        let pending: Vec<GcId> = self.tobefnz.clone();
        for id in pending {
            self.mark_object(id, pool);
        }
    }

    /// The stop-the-world tail of marking.
    fn atomic(&mut self, roots: &GcRoots, pool: &mut ObjectPool, strt: &mut StringTable) {
        self.state = GcState::EnterAtomic;

        // roots may have changed since the cycle started
        self.mark_roots(roots, pool);
        self.propagate_all(pool);

        // open upvalues work without barriers: re-read them
        let open: Vec<UpvalueId> = pool
            .upvalues
            .iter()
            .filter(|(_, u)| !u.header.is_white() && u.data.is_open())
            .map(|(id, _)| UpvalueId(id))
            .collect();
        for u in open {
            let v = pool.upvalue_value(u);
            self.mark_value(&v, pool);
        }
        self.propagate_all(pool);

        // re-traverse everything the barriers and the weak logic queued
        let grayagain = std::mem::take(&mut self.grayagain);
        for id in grayagain {
            if let Some(h) = pool.header_mut(id) {
                if h.is_gray() {
                    h.make_gray();
                    self.gray.push(id);
                }
            }
        }
        self.propagate_all(pool);

        self.converge_ephemerons(pool);
        // clear values of weak tables before finalizers resurrect anything
        self.clear_values(0, 0, pool);
        let orig_weak = self.weak.len();
        let orig_allweak = self.allweak.len();

        // unreachable finalizable objects get one more cycle to run __gc
        self.separate_tobefnz(false, pool);
        let pending: Vec<GcId> = self.tobefnz.clone();
        for id in pending {
            self.mark_object(id, pool);
        }
        self.propagate_all(pool);
        self.converge_ephemerons(pool);

        // drop entries whose weak key died, then values resurrected weak
        // tables may have exposed
        self.clear_keys(pool);
        self.clear_values(orig_weak, orig_allweak, pool);

        strt.clear_cache(&pool.strings);
        self.current_white = self.other_white();
    }

    /// Repeat ephemeron traversal until no value gets marked.
    fn converge_ephemerons(&mut self, pool: &mut ObjectPool) {
        loop {
            let mut changed = false;
            let list = std::mem::take(&mut self.ephemeron);
            for t in list {
                if self.traverse_ephemeron(t, pool) {
                    self.propagate_all(pool);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Nil out entries of weak(-value) tables whose value died. Only
    /// tables linked after the given list offsets are touched when the
    /// offsets are nonzero.
    fn clear_values(&mut self, from_weak: usize, from_allweak: usize, pool: &mut ObjectPool) {
        let targets: Vec<TableId> = self.weak[from_weak..]
            .iter()
            .chain(self.allweak[from_allweak..].iter())
            .copied()
            .collect();
        for t in targets {
            let white: Vec<usize>;
            let mut array_white: Vec<usize> = Vec::new();
            {
                let Some(tb) = pool.tables.get(t.0) else {
                    continue;
                };
                // string values are never cleared
                for (i, v) in tb.data.array.iter().enumerate() {
                    if !v.is_string() && self.value_is_white(v, pool) {
                        array_white.push(i);
                    }
                }
                white = tb
                    .data
                    .node
                    .iter()
                    .enumerate()
                    .filter(|(_, n)| {
                        !n.i_val.is_nil()
                            && !n.i_val.is_string()
                            && self.value_is_white(&n.i_val, pool)
                    })
                    .map(|(i, _)| i)
                    .collect();
            }
            if let Some(tb) = pool.tables.get_mut(t.0) {
                for i in array_white {
                    tb.data.array[i] = LuaValue::nil();
                }
                for i in white {
                    let n = &mut tb.data.node[i];
                    n.i_val = LuaValue::nil();
                    if n.i_key.is_collectable() {
                        n.i_key = LuaValue::dead_key(n.i_key.raw_gc());
                    }
                }
            }
        }
    }

    /// Drop entries of weak-key tables whose key died.
    fn clear_keys(&mut self, pool: &mut ObjectPool) {
        let targets: Vec<TableId> = self
            .ephemeron
            .iter()
            .chain(self.allweak.iter())
            .copied()
            .collect();
        for t in targets {
            let cleared: Vec<usize>;
            {
                let Some(tb) = pool.tables.get(t.0) else {
                    continue;
                };
                cleared = tb
                    .data
                    .node
                    .iter()
                    .enumerate()
                    .filter(|(_, n)| {
                        !n.i_val.is_nil()
                            && n.i_key.is_collectable()
                            && !n.i_key.is_string()
                            && self.value_is_white(&n.i_key, pool)
                    })
                    .map(|(i, _)| i)
                    .collect();
            }
            if let Some(tb) = pool.tables.get_mut(t.0) {
                for i in cleared {
                    let n = &mut tb.data.node[i];
                    n.i_val = LuaValue::nil();
                    n.i_key = LuaValue::dead_key(n.i_key.raw_gc());
                }
            }
        }
    }

    /// Move unreachable (or, at close time, all) finalizable objects to
    /// the to-be-finalized queue.
    pub fn separate_tobefnz(&mut self, all: bool, pool: &mut ObjectPool) {
        let other = self.other_white();
        macro_rules! scan {
            ($arena:expr, $wrap:expr) => {
                for (id, obj) in $arena.iter() {
                    if obj.header.to_finalize() && (all || obj.header.is_dead(other)) {
                        let gid = $wrap(id);
                        if !self.tobefnz.contains(&gid) {
                            self.tobefnz.push(gid);
                        }
                    }
                }
            };
        }
        scan!(pool.tables, |i| GcId::Table(TableId(i)));
        scan!(pool.userdata, |i| GcId::Userdata(UserdataId(i)));
    }

    // ============ Sweep ============

    fn enter_sweep(&mut self) {
        self.state = GcState::SwpAllGc;
        self.sweep_arena = 0;
        self.sweep_pos = 0;
    }

    /// Sweep up to GCSWEEPMAX objects: free the dead, repaint survivors
    /// with the current white. Returns true when the pass is complete.
    fn sweep_step(&mut self, pool: &mut ObjectPool, strt: &mut StringTable) -> bool {
        let other = self.other_white();
        let white = self.current_white;
        let mut budget = GCSWEEPMAX;

        while budget > 0 {
            if self.sweep_arena >= SWEEP_ARENAS {
                return true;
            }
            let done = match self.sweep_arena {
                0 => Self::sweep_strings(&mut self.sweep_pos, &mut budget, other, white, pool, strt, &mut self.mem),
                1 => Self::sweep_arena_generic(&mut pool.tables, &mut self.sweep_pos, &mut budget, other, white, &mut self.mem),
                2 => Self::sweep_arena_generic(&mut pool.closures, &mut self.sweep_pos, &mut budget, other, white, &mut self.mem),
                3 => Self::sweep_arena_generic(&mut pool.protos, &mut self.sweep_pos, &mut budget, other, white, &mut self.mem),
                4 => Self::sweep_arena_generic(&mut pool.userdata, &mut self.sweep_pos, &mut budget, other, white, &mut self.mem),
                5 => Self::sweep_threads(&mut self.sweep_pos, &mut budget, other, white, pool, &mut self.mem),
                6 => Self::sweep_arena_generic(&mut pool.upvalues, &mut self.sweep_pos, &mut budget, other, white, &mut self.mem),
                _ => true,
            };
            if done {
                self.sweep_arena += 1;
                self.sweep_pos = 0;
            }
        }
        false
    }

    fn sweep_arena_generic<T>(
        arena: &mut GcArena<T>,
        pos: &mut usize,
        budget: &mut usize,
        other: u8,
        white: u8,
        mem: &mut AllocGauge,
    ) -> bool {
        while *budget > 0 {
            let Some((_, obj)) = arena.get_index_mut(*pos) else {
                return true;
            };
            *budget -= 1;
            let h = &mut obj.header;
            if h.is_fixed() {
                // never freed, but must be re-whitened so the next cycle
                // traverses it again
                h.make_white(white);
                *pos += 1;
            } else if h.to_finalize() {
                // finalizable objects are swept by the finalizer passes
                *pos += 1;
            } else if h.is_dead(other) {
                if let Some((_, dead)) = arena.swap_remove_index(*pos) {
                    mem.account_free(dead.header.size as usize);
                }
                // the swapped-in entry is revisited at the same position
            } else {
                h.make_white(white);
                *pos += 1;
            }
        }
        false
    }

    fn sweep_strings(
        pos: &mut usize,
        budget: &mut usize,
        other: u8,
        white: u8,
        pool: &mut ObjectPool,
        strt: &mut StringTable,
        mem: &mut AllocGauge,
    ) -> bool {
        while *budget > 0 {
            let Some((id, obj)) = pool.strings.get_index_mut(*pos) else {
                return true;
            };
            *budget -= 1;
            let h = &mut obj.header;
            if h.is_fixed() {
                h.make_white(white);
                *pos += 1;
            } else if h.is_dead(other) {
                let short = !obj.data.is_long();
                let hash = if short { obj.data.short_hash() } else { 0 };
                if let Some((_, dead)) = pool.strings.swap_remove_index(*pos) {
                    if short {
                        strt.remove(StringId(id), hash);
                    }
                    mem.account_free(dead.header.size as usize);
                }
            } else {
                h.make_white(white);
                *pos += 1;
            }
        }
        false
    }

    /// Dead threads close their open upvalues before going away, so a
    /// surviving closure sees the last value instead of a dangling level.
    fn sweep_threads(
        pos: &mut usize,
        budget: &mut usize,
        other: u8,
        white: u8,
        pool: &mut ObjectPool,
        mem: &mut AllocGauge,
    ) -> bool {
        let ObjectPool {
            threads, upvalues, ..
        } = pool;
        while *budget > 0 {
            let Some((_, obj)) = threads.get_index_mut(*pos) else {
                return true;
            };
            *budget -= 1;
            let h = &mut obj.header;
            if h.is_fixed() {
                h.make_white(white);
                *pos += 1;
            } else if h.to_finalize() {
                *pos += 1;
            } else if h.is_dead(other) {
                let open: Vec<(UpvalueId, LuaValue)> = obj
                    .data
                    .open_upvals
                    .iter()
                    .filter_map(|&u| {
                        let level = upvalues.get(u.0)?.data.open_level()?;
                        Some((u, obj.data.stack.get(level).copied().unwrap_or_default()))
                    })
                    .collect();
                for (u, v) in open {
                    if let Some(up) = upvalues.get_mut(u.0) {
                        up.data = Upvalue::Closed(v);
                    }
                }
                if let Some((_, dead)) = threads.swap_remove_index(*pos) {
                    mem.account_free(dead.header.size as usize);
                }
            } else {
                h.make_white(white);
                *pos += 1;
            }
        }
        false
    }

    /// Repaint the finalizer population (finobj members and the
    /// to-be-finalized queue); nothing there can be dead.
    fn sweep_finobj(&mut self, pool: &mut ObjectPool) {
        let white = self.current_white;
        macro_rules! repaint {
            ($arena:expr) => {
                for (_, obj) in $arena.iter_mut() {
                    if obj.header.to_finalize() && !obj.header.is_fixed() {
                        obj.header.make_white(white);
                    }
                }
            };
        }
        repaint!(pool.tables);
        repaint!(pool.userdata);
    }

    // ============ Stepping ============

    /// One micro-step of the collector state machine.
    pub fn single_step(
        &mut self,
        roots: &GcRoots,
        pool: &mut ObjectPool,
        strt: &mut StringTable,
        fast: bool,
    ) -> StepResult {
        match self.state {
            GcState::Pause => {
                self.restart_collection(roots, pool);
                self.state = GcState::Propagate;
                StepResult::Work(1)
            }
            GcState::Propagate => {
                if self.gray.is_empty() || fast {
                    self.state = GcState::EnterAtomic;
                    StepResult::Work(1)
                } else {
                    StepResult::Work(self.propagate_mark(pool))
                }
            }
            GcState::EnterAtomic => {
                self.atomic(roots, pool, strt);
                self.enter_sweep();
                StepResult::Atomic
            }
            GcState::SwpAllGc => {
                let complete = self.sweep_step(pool, strt);
                if complete {
                    self.state = GcState::SwpFin;
                }
                StepResult::Work(GCSWEEPMAX)
            }
            GcState::SwpFin => {
                self.sweep_finobj(pool);
                self.state = GcState::SwpEnd;
                StepResult::Work(GCSWEEPMAX)
            }
            GcState::SwpEnd => {
                self.estimate = self.mem.in_use();
                self.state = GcState::CallFin;
                StepResult::Work(1)
            }
            GcState::CallFin => {
                if self.tobefnz.is_empty() {
                    self.state = GcState::Pause;
                    StepResult::Pause
                } else {
                    // the runtime layer pops and runs one finalizer
                    StepResult::Finalize
                }
            }
        }
    }

    /// Set the debt so that the next cycle starts once memory in use
    /// reaches `gcpause` percent of the last cycle's survivors.
    pub fn set_pause(&mut self) {
        let estimate = (self.estimate / 100).max(1);
        let threshold = estimate.saturating_mul(self.gcpause as isize);
        let debt = self.mem.in_use() - threshold;
        self.mem.set_debt(debt);
    }

    /// Grant allocation credit before the next step.
    pub fn pay_step_debt(&mut self) {
        let stepsize = GCSTEPSIZE;
        self.mem.set_debt(-stepsize);
    }

    /// Marking work budget for one incremental step.
    pub fn step_budget(&self) -> isize {
        let debt = self.mem.gc_debt.max(1);
        debt.saturating_mul(self.gcstepmul as isize) / 100
    }

    // ============ Barriers ============

    /// Forward barrier: a black object was wired to white `v`. While the
    /// invariant must hold, mark `v` now; during sweep, repaint the
    /// container white instead so the barrier does not fire again.
    pub fn barrier(&mut self, o: GcId, v: GcId, pool: &mut ObjectPool) {
        if self.state.keep_invariant() {
            self.mark_object(v, pool);
        } else if self.state.is_sweep_phase() {
            if let Some(h) = pool.header_mut(o) {
                h.make_white(self.current_white);
            }
        }
    }

    /// Backward barrier (tables): turn the container gray again and queue
    /// it for re-traversal in the atomic step.
    pub fn barrier_back(&mut self, t: TableId, pool: &mut ObjectPool) {
        if let Some(h) = pool.header_mut(GcId::Table(t)) {
            debug_assert!(h.is_black());
            h.make_gray();
        }
        self.grayagain.push(GcId::Table(t));
    }
}
