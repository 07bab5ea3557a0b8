// Value operations above the raw table/stack layer: arithmetic with
// metamethod fallback, comparison, concatenation, numeric coercions and
// the collector control verbs.

use crate::lua_value::LuaValue;
use crate::lua_vm::Lua;
use crate::lua_vm::lua_error::LuaResult;
use crate::lua_vm::metamethod::TmKind;

/// Arithmetic and bitwise operations over the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Unm,
    BNot,
}

impl ArithOp {
    fn event(self) -> TmKind {
        match self {
            ArithOp::Add => TmKind::Add,
            ArithOp::Sub => TmKind::Sub,
            ArithOp::Mul => TmKind::Mul,
            ArithOp::Mod => TmKind::Mod,
            ArithOp::Pow => TmKind::Pow,
            ArithOp::Div => TmKind::Div,
            ArithOp::IDiv => TmKind::IDiv,
            ArithOp::BAnd => TmKind::BAnd,
            ArithOp::BOr => TmKind::BOr,
            ArithOp::BXor => TmKind::BXor,
            ArithOp::Shl => TmKind::Shl,
            ArithOp::Shr => TmKind::Shr,
            ArithOp::Unm => TmKind::Unm,
            ArithOp::BNot => TmKind::BNot,
        }
    }

    fn is_unary(self) -> bool {
        matches!(self, ArithOp::Unm | ArithOp::BNot)
    }

    fn is_bitwise(self) -> bool {
        matches!(
            self,
            ArithOp::BAnd | ArithOp::BOr | ArithOp::BXor | ArithOp::Shl | ArithOp::Shr | ArithOp::BNot
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Lt,
    Le,
}

/// Collector control verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcCommand {
    Stop,
    Restart,
    /// Run a full collection cycle.
    Collect,
    /// Memory in use, in kilobytes.
    Count,
    /// Remainder of the count, in bytes.
    CountBytes,
    /// Advance the collector by roughly `kb` kilobytes of work.
    Step(usize),
    SetPause(i32),
    SetStepMul(i32),
    IsRunning,
}

impl Lua {
    // ===== Coercions =====

    /// A numeric view of the value, preserving the integer/float split;
    /// numeric strings convert to the number they spell.
    pub(crate) fn to_numeric(&self, v: &LuaValue) -> Option<LuaValue> {
        if v.is_number() {
            return Some(*v);
        }
        if let Some(id) = v.as_string_id() {
            let bytes = self.pool.string_bytes(id)?;
            return str_to_number(bytes);
        }
        None
    }

    pub(crate) fn coerce_to_number(&self, v: &LuaValue) -> Option<f64> {
        if v.is_integer() {
            return Some(v.ivalue() as f64);
        }
        if v.is_float() {
            return Some(v.fltvalue());
        }
        if let Some(id) = v.as_string_id() {
            let bytes = self.pool.string_bytes(id)?;
            return str_to_number(bytes).map(|n| n.nvalue());
        }
        None
    }

    pub(crate) fn coerce_to_integer(&self, v: &LuaValue) -> Option<i64> {
        if v.is_integer() {
            return Some(v.ivalue());
        }
        if v.is_float() {
            return v.float_to_integer();
        }
        if let Some(id) = v.as_string_id() {
            let bytes = self.pool.string_bytes(id)?;
            let n = str_to_number(bytes)?;
            return if n.is_integer() {
                Some(n.ivalue())
            } else {
                n.float_to_integer()
            };
        }
        None
    }

    // ===== Metamethod call helpers =====

    /// Call a metamethod with `args`, keeping one result.
    pub(crate) fn call_tm_result(
        &mut self,
        tm: LuaValue,
        args: &[LuaValue],
    ) -> LuaResult<LuaValue> {
        self.ensure_stack(args.len() + 2)?;
        let slot = self.th().top;
        self.push_raw(tm)?;
        for a in args {
            self.push_raw(*a)?;
        }
        self.do_call(slot, 1)?;
        Ok(self.pop_raw())
    }

    /// Call a metamethod for effect only.
    pub(crate) fn call_tm_effect(&mut self, tm: LuaValue, args: &[LuaValue]) -> LuaResult<()> {
        self.ensure_stack(args.len() + 2)?;
        let slot = self.th().top;
        self.push_raw(tm)?;
        for a in args {
            self.push_raw(*a)?;
        }
        self.do_call(slot, 0)
    }

    // ===== Arithmetic =====

    /// Pop the operands (two, or one for unary operations), perform the
    /// operation with the usual numeric rules, and push the result.
    /// Non-numeric operands fall back to the matching metamethod.
    pub fn arith(&mut self, op: ArithOp) -> LuaResult<()> {
        let (a, b) = if op.is_unary() {
            let a = self.pop_raw();
            (a, a)
        } else {
            let b = self.pop_raw();
            let a = self.pop_raw();
            (a, b)
        };
        match self.arith_numeric(op, &a, &b)? {
            Some(r) => {
                self.push_raw(r)?;
                Ok(())
            }
            None => {
                // metamethod of the first operand, then of the second
                let tm = self
                    .tm_by_value(&a, op.event())
                    .or_else(|| self.tm_by_value(&b, op.event()));
                match tm {
                    Some(tm) => {
                        let r = self.call_tm_result(tm, &[a, b])?;
                        self.push_raw(r)?;
                        Ok(())
                    }
                    None => {
                        let which = if self.coerce_to_number(&a).is_none() {
                            a
                        } else {
                            b
                        };
                        let msg = if op.is_bitwise() {
                            if self.coerce_to_number(&which).is_some() {
                                "number has no integer representation".to_string()
                            } else {
                                format!(
                                    "attempt to perform bitwise operation on a {} value",
                                    which.type_name()
                                )
                            }
                        } else {
                            format!(
                                "attempt to perform arithmetic on a {} value",
                                which.type_name()
                            )
                        };
                        Err(self.run_error(&msg))
                    }
                }
            }
        }
    }

    /// The numeric core; `None` means "not numeric, try metamethods".
    fn arith_numeric(
        &mut self,
        op: ArithOp,
        a: &LuaValue,
        b: &LuaValue,
    ) -> LuaResult<Option<LuaValue>> {
        if op.is_bitwise() {
            let (Some(ia), Some(ib)) = (self.coerce_to_integer(a), self.coerce_to_integer(b))
            else {
                // distinguish "no integer representation" at the caller
                return Ok(None);
            };
            let r = match op {
                ArithOp::BAnd => ia & ib,
                ArithOp::BOr => ia | ib,
                ArithOp::BXor => ia ^ ib,
                ArithOp::Shl => shift_left(ia, ib),
                ArithOp::Shr => shift_left(ia, ib.wrapping_neg()),
                ArithOp::BNot => !ia,
                _ => 0,
            };
            return Ok(Some(LuaValue::integer(r)));
        }

        // numeric strings behave as the number they spell
        let a = match self.to_numeric(a) {
            Some(v) => v,
            None => return Ok(None),
        };
        let b = match self.to_numeric(b) {
            Some(v) => v,
            None => return Ok(None),
        };
        let (a, b) = (&a, &b);

        // integer arithmetic when both operands are integers, except for
        // true division and exponentiation which are always floats
        let both_int = a.is_integer() && b.is_integer();
        if both_int && !matches!(op, ArithOp::Div | ArithOp::Pow) {
            let ia = a.ivalue();
            let ib = b.ivalue();
            let r = match op {
                ArithOp::Add => ia.wrapping_add(ib),
                ArithOp::Sub => ia.wrapping_sub(ib),
                ArithOp::Mul => ia.wrapping_mul(ib),
                ArithOp::Mod => {
                    if ib == 0 {
                        return Err(self.run_error("attempt to perform 'n%0'"));
                    }
                    let r = ia.wrapping_rem(ib);
                    if r != 0 && (r ^ ib) < 0 { r + ib } else { r }
                }
                ArithOp::IDiv => {
                    if ib == 0 {
                        return Err(self.run_error("attempt to perform 'n//0'"));
                    }
                    let q = ia.wrapping_div(ib);
                    if (ia ^ ib) < 0 && q.wrapping_mul(ib) != ia {
                        q - 1
                    } else {
                        q
                    }
                }
                ArithOp::Unm => ia.wrapping_neg(),
                _ => 0,
            };
            return Ok(Some(LuaValue::integer(r)));
        }

        let (Some(na), Some(nb)) = (self.coerce_to_number(a), self.coerce_to_number(b)) else {
            return Ok(None);
        };
        let r = match op {
            ArithOp::Add => na + nb,
            ArithOp::Sub => na - nb,
            ArithOp::Mul => na * nb,
            ArithOp::Div => na / nb,
            ArithOp::Pow => na.powf(nb),
            ArithOp::IDiv => (na / nb).floor(),
            ArithOp::Mod => {
                let r = na % nb;
                if r * nb < 0.0 { r + nb } else { r }
            }
            ArithOp::Unm => -na,
            _ => return Ok(None),
        };
        Ok(Some(LuaValue::float(r)))
    }

    // ===== Comparison =====

    /// Compare the values at two indices under language equality or
    /// ordering, honoring `__eq`, `__lt` and `__le`.
    pub fn compare(&mut self, idx1: i32, idx2: i32, op: CompareOp) -> LuaResult<bool> {
        let (Some(a), Some(b)) = (self.value_at(idx1), self.value_at(idx2)) else {
            return Ok(false);
        };
        match op {
            CompareOp::Eq => self.equal_values(&a, &b),
            CompareOp::Lt => self.less_than(&a, &b, false),
            CompareOp::Le => self.less_than(&a, &b, true),
        }
    }

    fn equal_values(&mut self, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
        if self.pool.raw_equal(a, b) {
            return Ok(true);
        }
        // only container values of the same type consult __eq
        let same_container = (a.is_table() && b.is_table())
            || (a.is_full_userdata() && b.is_full_userdata());
        if !same_container {
            return Ok(false);
        }
        let tm = self
            .tm_by_value(a, TmKind::Eq)
            .or_else(|| self.tm_by_value(b, TmKind::Eq));
        match tm {
            Some(tm) => {
                let r = self.call_tm_result(tm, &[*a, *b])?;
                Ok(r.is_truthy())
            }
            None => Ok(false),
        }
    }

    fn less_than(&mut self, a: &LuaValue, b: &LuaValue, or_equal: bool) -> LuaResult<bool> {
        if a.is_number() && b.is_number() {
            let (na, nb) = (a.nvalue(), b.nvalue());
            // exact integer comparison when both are integers
            if a.is_integer() && b.is_integer() {
                let (ia, ib) = (a.ivalue(), b.ivalue());
                return Ok(if or_equal { ia <= ib } else { ia < ib });
            }
            return Ok(if or_equal { na <= nb } else { na < nb });
        }
        if a.is_string() && b.is_string() {
            let ba = a
                .as_string_id()
                .and_then(|id| self.pool.string_bytes(id))
                .unwrap_or(&[]);
            let bb = b
                .as_string_id()
                .and_then(|id| self.pool.string_bytes(id))
                .unwrap_or(&[]);
            return Ok(if or_equal { ba <= bb } else { ba < bb });
        }
        let ev = if or_equal { TmKind::Le } else { TmKind::Lt };
        let tm = self
            .tm_by_value(a, ev)
            .or_else(|| self.tm_by_value(b, ev));
        if let Some(tm) = tm {
            let r = self.call_tm_result(tm, &[*a, *b])?;
            return Ok(r.is_truthy());
        }
        if or_equal {
            // no __le: try 'not (b < a)'
            let tm = self
                .tm_by_value(a, TmKind::Lt)
                .or_else(|| self.tm_by_value(b, TmKind::Lt));
            if let Some(tm) = tm {
                let r = self.call_tm_result(tm, &[*b, *a])?;
                return Ok(!r.is_truthy());
            }
        }
        Err(self.run_error(&format!(
            "attempt to compare {} with {}",
            a.type_name(),
            b.type_name()
        )))
    }

    // ===== Concatenation =====

    /// Concatenate the top `n` values into one, with number coercion and
    /// `__concat` fallback. `n == 0` pushes the empty string.
    pub fn concat(&mut self, n: usize) -> LuaResult<()> {
        if n == 0 {
            return self.push_lstring(b"");
        }
        let mut remaining = n;
        while remaining > 1 {
            let top = self.th().top;
            let a = self.stack_at(top - 2);
            let b = self.stack_at(top - 1);
            let a_ok = a.is_string() || a.is_number();
            let b_ok = b.is_string() || b.is_number();
            if a_ok && b_ok {
                let mut bytes = self.value_to_bytes(&a);
                bytes.extend_from_slice(&self.value_to_bytes(&b));
                self.th_mut().top -= 2;
                self.push_lstring(&bytes)?;
            } else {
                let tm = self
                    .tm_by_value(&a, TmKind::Concat)
                    .or_else(|| self.tm_by_value(&b, TmKind::Concat));
                let Some(tm) = tm else {
                    let bad = if a_ok { b } else { a };
                    return Err(self.run_error(&format!(
                        "attempt to concatenate a {} value",
                        bad.type_name()
                    )));
                };
                let r = self.call_tm_result(tm, &[a, b])?;
                self.th_mut().top -= 2;
                self.push_raw(r)?;
            }
            remaining -= 1;
        }
        Ok(())
    }

    fn value_to_bytes(&self, v: &LuaValue) -> Vec<u8> {
        if let Some(id) = v.as_string_id() {
            return self
                .pool
                .string_bytes(id)
                .map(|b| b.to_vec())
                .unwrap_or_default();
        }
        number_to_string(v).into_bytes()
    }

    // ===== Collector control =====

    pub fn gc(&mut self, cmd: GcCommand) -> i64 {
        match cmd {
            GcCommand::Stop => {
                self.gc.running = false;
                0
            }
            GcCommand::Restart => {
                self.gc.running = true;
                self.gc.mem.set_debt(0);
                0
            }
            GcCommand::Collect => {
                self.full_gc();
                0
            }
            GcCommand::Count => self.gc.mem.in_use().max(0) as i64 >> 10,
            GcCommand::CountBytes => self.gc.mem.in_use().max(0) as i64 & 0x3ff,
            GcCommand::Step(kb) => {
                let was_running = self.gc.running;
                self.gc.running = true;
                if kb == 0 {
                    // one basic step
                    self.gc.mem.set_debt(1);
                } else {
                    let debt = self.gc.mem.gc_debt + (kb as isize) * 1024;
                    self.gc.mem.set_debt(debt);
                }
                self.gc_step_internal();
                self.gc.running = was_running;
                (self.gc.state == crate::gc::GcState::Pause) as i64
            }
            GcCommand::SetPause(p) => {
                let old = self.gc.gcpause;
                self.gc.gcpause = p;
                old as i64
            }
            GcCommand::SetStepMul(m) => {
                let old = self.gc.gcstepmul;
                self.gc.gcstepmul = m;
                old as i64
            }
            GcCommand::IsRunning => self.gc.running as i64,
        }
    }
}

// ===== Number formatting and parsing =====

/// Render a number the way the language prints it: integers verbatim,
/// floats with a trailing `.0` when they look integral.
pub(crate) fn number_to_string(v: &LuaValue) -> String {
    if v.is_integer() {
        let mut buf = itoa::Buffer::new();
        return buf.format(v.ivalue()).to_string();
    }
    let n = v.fltvalue();
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    let s = format!("{}", n);
    if s.bytes().all(|b| b.is_ascii_digit() || b == b'-') {
        format!("{}.0", s)
    } else {
        s
    }
}

/// Parse a numeral: optional sign, decimal or `0x` hexadecimal, integer
/// or float. Returns an integer value when the numeral is integral.
pub(crate) fn str_to_number(bytes: &[u8]) -> Option<LuaValue> {
    let s = std::str::from_utf8(bytes).ok()?;
    let s = s.trim_matches(|c: char| c.is_ascii_whitespace());
    if s.is_empty() {
        return None;
    }
    let (neg, body) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    if body.len() > 2 && (body.starts_with("0x") || body.starts_with("0X")) {
        // hexadecimal integers wrap around like the lexer's
        let mut acc: u64 = 0;
        for c in body[2..].bytes() {
            let d = (c as char).to_digit(16)?;
            acc = acc.wrapping_mul(16).wrapping_add(d as u64);
        }
        let i = if neg {
            (acc as i64).wrapping_neg()
        } else {
            acc as i64
        };
        return Some(LuaValue::integer(i));
    }
    // reject spellings the lexer would not produce (inf, nan, ...)
    if !body
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
    {
        return None;
    }
    if let Ok(i) = body.parse::<i64>() {
        return Some(LuaValue::integer(if neg { i.wrapping_neg() } else { i }));
    }
    if let Ok(f) = body.parse::<f64>() {
        return Some(LuaValue::float(if neg { -f } else { f }));
    }
    None
}

/// Shift with the language's semantics: negative counts shift the other
/// way, and any count past the width yields zero.
fn shift_left(a: i64, b: i64) -> i64 {
    if b < 0 {
        let b = b.wrapping_neg();
        if !(0..64).contains(&b) {
            0
        } else {
            ((a as u64) >> b) as i64
        }
    } else if b >= 64 {
        0
    } else {
        ((a as u64) << b) as i64
    }
}
