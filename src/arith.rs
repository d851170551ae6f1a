use crate::cell::*;
use crate::error::*;
use crate::machine::Machine;
use crate::word::WordFn;

// ( n1 n2 -- n3 )
fn binary_int(xs: &mut Machine, op: fn(Qint, Qint) -> Qint) -> Qresult {
    let b = xs.ds.pop()?.int();
    let a = xs.ds.pop()?.int();
    xs.ds.push(Cell(op(a, b)))
}

// ( u1 u2 -- u3 )
fn binary_uint(xs: &mut Machine, op: fn(Quint, Quint) -> Quint) -> Qresult {
    let b = xs.ds.pop()?.uint();
    let a = xs.ds.pop()?.uint();
    xs.ds.push(Cell::from_uint(op(a, b)))
}

// ( x1 x2 -- flag )
fn compare(xs: &mut Machine, op: fn(Qint, Qint) -> bool) -> Qresult {
    let b = xs.ds.pop()?.int();
    let a = xs.ds.pop()?.int();
    xs.ds.push(Cell::from_bool(op(a, b)))
}

fn core_word_add(xs: &mut Machine) -> Qresult {
    binary_int(xs, Qint::wrapping_add)
}

fn core_word_sub(xs: &mut Machine) -> Qresult {
    binary_int(xs, Qint::wrapping_sub)
}

fn core_word_mul(xs: &mut Machine) -> Qresult {
    binary_int(xs, Qint::wrapping_mul)
}

fn core_word_div(xs: &mut Machine) -> Qresult {
    let b = xs.ds.pop()?.int();
    let a = xs.ds.pop()?.int();
    if b == 0 {
        return Err(Qerr::DivisionByZero);
    }
    xs.ds.push(Cell(a.wrapping_div(b)))
}

fn core_word_mod(xs: &mut Machine) -> Qresult {
    let b = xs.ds.pop()?.int();
    let a = xs.ds.pop()?.int();
    if b == 0 {
        return Err(Qerr::DivisionByZero);
    }
    xs.ds.push(Cell(a.wrapping_rem(b)))
}

// ( n1 n2 -- rem quot )
fn core_word_div_mod(xs: &mut Machine) -> Qresult {
    let b = xs.ds.pop()?.int();
    let a = xs.ds.pop()?.int();
    if b == 0 {
        return Err(Qerr::DivisionByZero);
    }
    xs.ds.push(Cell(a.wrapping_rem(b)))?;
    xs.ds.push(Cell(a.wrapping_div(b)))
}

fn core_word_abs(xs: &mut Machine) -> Qresult {
    let n = xs.ds.pop()?.int();
    xs.ds.push(Cell(n.wrapping_abs()))
}

fn core_word_negate(xs: &mut Machine) -> Qresult {
    let n = xs.ds.pop()?.int();
    xs.ds.push(Cell(n.wrapping_neg()))
}

fn core_word_min(xs: &mut Machine) -> Qresult {
    binary_int(xs, Qint::min)
}

fn core_word_max(xs: &mut Machine) -> Qresult {
    binary_int(xs, Qint::max)
}

fn core_word_one_plus(xs: &mut Machine) -> Qresult {
    let n = xs.ds.pop()?.int();
    xs.ds.push(Cell(n.wrapping_add(1)))
}

fn core_word_one_minus(xs: &mut Machine) -> Qresult {
    let n = xs.ds.pop()?.int();
    xs.ds.push(Cell(n.wrapping_sub(1)))
}

fn core_word_and(xs: &mut Machine) -> Qresult {
    binary_uint(xs, std::ops::BitAnd::bitand)
}

fn core_word_or(xs: &mut Machine) -> Qresult {
    binary_uint(xs, std::ops::BitOr::bitor)
}

fn core_word_xor(xs: &mut Machine) -> Qresult {
    binary_uint(xs, std::ops::BitXor::bitxor)
}

fn core_word_invert(xs: &mut Machine) -> Qresult {
    let u = xs.ds.pop()?.uint();
    xs.ds.push(Cell::from_uint(!u))
}

fn core_word_lshift(xs: &mut Machine) -> Qresult {
    binary_uint(xs, |u, n| u.wrapping_shl(n as u32))
}

fn core_word_rshift(xs: &mut Machine) -> Qresult {
    binary_uint(xs, |u, n| u.wrapping_shr(n as u32))
}

// ( n1 n2 -- d-lo d-hi )
fn core_word_m_star(xs: &mut Machine) -> Qresult {
    let b = xs.ds.pop()?.int() as i128;
    let a = xs.ds.pop()?.int() as i128;
    let d = a.wrapping_mul(b);
    xs.ds.push(Cell(d as Qint))?;
    xs.ds.push(Cell((d >> 64) as Qint))
}

// ( u1 u2 -- ud-lo ud-hi )
fn core_word_um_star(xs: &mut Machine) -> Qresult {
    let b = xs.ds.pop()?.uint() as u128;
    let a = xs.ds.pop()?.uint() as u128;
    let d = a.wrapping_mul(b);
    xs.ds.push(Cell::from_uint(d as Quint))?;
    xs.ds.push(Cell::from_uint((d >> 64) as Quint))
}

// ( ud-lo ud-hi u -- rem quot )
fn core_word_um_div_mod(xs: &mut Machine) -> Qresult {
    let dsor = xs.ds.pop()?.uint();
    let hi = xs.ds.pop()?.uint();
    let lo = xs.ds.pop()?.uint();
    if dsor == 0 {
        return Err(Qerr::DivisionByZero);
    }
    if dsor <= hi {
        // quotient will not fit a cell; largest possible results
        xs.ds.push(Cell::from_uint(!0))?;
        return xs.ds.push(Cell::from_uint(!0));
    }
    let ud = ((hi as u128) << 64) | lo as u128;
    let rem = (ud % dsor as u128) as Quint;
    let quot = (ud / dsor as u128) as Quint;
    xs.ds.push(Cell::from_uint(rem))?;
    xs.ds.push(Cell::from_uint(quot))
}

// ( d-lo d-hi n -- rem quot )  Symmetric division.
fn core_word_sm_div_rem(xs: &mut Machine) -> Qresult {
    let dsor = xs.ds.pop()?.int();
    let hi = xs.ds.pop()?.int();
    let lo = xs.ds.pop()?.uint();
    if dsor == 0 {
        return Err(Qerr::DivisionByZero);
    }
    let d = ((hi as i128) << 64) | lo as i128;
    let rem = (d % dsor as i128) as Qint;
    let quot = (d / dsor as i128) as Qint;
    xs.ds.push(Cell(rem))?;
    xs.ds.push(Cell(quot))
}

// ( n -- d-lo d-hi )
fn core_word_s_to_d(xs: &mut Machine) -> Qresult {
    let n = xs.ds.pop()?.int();
    xs.ds.push(Cell(n))?;
    xs.ds.push(Cell(n >> 63))
}

fn core_word_eq0(xs: &mut Machine) -> Qresult {
    let x = xs.ds.pop()?.int();
    xs.ds.push(Cell::from_bool(x == 0))
}

fn core_word_lt0(xs: &mut Machine) -> Qresult {
    let x = xs.ds.pop()?.int();
    xs.ds.push(Cell::from_bool(x < 0))
}

fn core_word_gt0(xs: &mut Machine) -> Qresult {
    let x = xs.ds.pop()?.int();
    xs.ds.push(Cell::from_bool(x > 0))
}

fn core_word_eq(xs: &mut Machine) -> Qresult {
    compare(xs, |a, b| a == b)
}

fn core_word_ne(xs: &mut Machine) -> Qresult {
    compare(xs, |a, b| a != b)
}

fn core_word_lt(xs: &mut Machine) -> Qresult {
    compare(xs, |a, b| a < b)
}

fn core_word_gt(xs: &mut Machine) -> Qresult {
    compare(xs, |a, b| a > b)
}

fn core_word_u_lt(xs: &mut Machine) -> Qresult {
    let b = xs.ds.pop()?.uint();
    let a = xs.ds.pop()?.uint();
    xs.ds.push(Cell::from_bool(a < b))
}

fn core_word_true(xs: &mut Machine) -> Qresult {
    xs.ds.push(TRUE)
}

fn core_word_false(xs: &mut Machine) -> Qresult {
    xs.ds.push(FALSE)
}

fn core_word_hex(xs: &mut Machine) -> Qresult {
    xs.set_radix(16);
    OK
}

fn core_word_decimal(xs: &mut Machine) -> Qresult {
    xs.set_radix(10);
    OK
}

/*
 * Float stack.
 */

fn binary_float(xs: &mut Machine, op: fn(Qfloat, Qfloat) -> Qfloat) -> Qresult {
    let b = xs.fs.pop()?.float();
    let a = xs.fs.pop()?.float();
    xs.fs.push(Cell::from_float(op(a, b)))
}

fn core_word_f_add(xs: &mut Machine) -> Qresult {
    binary_float(xs, std::ops::Add::add)
}

fn core_word_f_sub(xs: &mut Machine) -> Qresult {
    binary_float(xs, std::ops::Sub::sub)
}

fn core_word_f_mul(xs: &mut Machine) -> Qresult {
    binary_float(xs, std::ops::Mul::mul)
}

fn core_word_f_div(xs: &mut Machine) -> Qresult {
    let b = xs.fs.pop()?.float();
    let a = xs.fs.pop()?.float();
    if b == 0.0 {
        return Err(Qerr::DivisionByZero);
    }
    xs.fs.push(Cell::from_float(a / b))
}

// ( aaddr -- ) (F: -- f )
fn core_word_f_fetch(xs: &mut Machine) -> Qresult {
    let addr = xs.ds.pop()?.addr();
    let x = xs.fetch_cell(addr)?;
    xs.fs.push(x)
}

// ( aaddr -- ) (F: f -- )
fn core_word_f_store(xs: &mut Machine) -> Qresult {
    let addr = xs.ds.pop()?.addr();
    let x = xs.fs.pop()?;
    xs.store_cell(addr, x)
}

fn core_word_f_dot(xs: &mut Machine) -> Qresult {
    if xs.radix() != 10 {
        return Err(Qerr::BadBase);
    }
    let f = xs.fs.pop()?.float();
    let text = format!("{:.*} ", xs.precision, f);
    xs.print(&text);
    OK
}

fn core_word_fs_dot(xs: &mut Machine) -> Qresult {
    if xs.radix() != 10 {
        return Err(Qerr::BadBase);
    }
    let f = xs.fs.pop()?.float();
    let text = format!("{:.*E} ", xs.precision, f);
    xs.print(&text);
    OK
}

fn core_word_f_eq0(xs: &mut Machine) -> Qresult {
    let f = xs.fs.pop()?.float();
    xs.ds.push(Cell::from_bool(f == 0.0))
}

fn core_word_f_lt0(xs: &mut Machine) -> Qresult {
    let f = xs.fs.pop()?.float();
    xs.ds.push(Cell::from_bool(f < 0.0))
}

fn core_word_f_dup(xs: &mut Machine) -> Qresult {
    let x = xs.fs.top()?;
    xs.fs.push(x)
}

fn core_word_f_drop(xs: &mut Machine) -> Qresult {
    xs.fs.pop()?;
    OK
}

fn core_word_f_swap(xs: &mut Machine) -> Qresult {
    let a = xs.fs.pop()?;
    let b = xs.fs.pop()?;
    xs.fs.push(a)?;
    xs.fs.push(b)
}

fn core_word_f_sqrt(xs: &mut Machine) -> Qresult {
    let f = xs.fs.pop()?.float();
    xs.fs.push(Cell::from_float(f.sqrt()))
}

fn core_word_f_min(xs: &mut Machine) -> Qresult {
    binary_float(xs, Qfloat::min)
}

fn core_word_f_max(xs: &mut Machine) -> Qresult {
    binary_float(xs, Qfloat::max)
}

// ( n -- ) (F: -- f )
fn core_word_s_to_f(xs: &mut Machine) -> Qresult {
    let n = xs.ds.pop()?.int();
    xs.fs.push(Cell::from_float(n as Qfloat))
}

// (F: f -- ) ( -- n )
fn core_word_f_to_s(xs: &mut Machine) -> Qresult {
    let f = xs.fs.pop()?.float();
    xs.ds.push(Cell(f as Qint))
}

// ( caddr u -- flag ) (F: -- f | )
fn core_word_to_float(xs: &mut Machine) -> Qresult {
    let len = xs.ds.pop()?.addr();
    let addr = xs.ds.pop()?.addr();
    let bytes = xs.bytes(addr, len)?.to_vec();
    let parsed = std::str::from_utf8(&bytes)
        .ok()
        .and_then(|s| s.trim().parse::<Qfloat>().ok());
    match parsed {
        Some(f) => {
            xs.fs.push(Cell::from_float(f))?;
            xs.ds.push(TRUE)
        }
        None => xs.ds.push(FALSE),
    }
}

pub fn arith_load(xs: &mut Machine) -> Qresult {
    struct Def(&'static str, WordFn);
    for Def(name, xf) in [
        Def("+", core_word_add),
        Def("-", core_word_sub),
        Def("*", core_word_mul),
        Def("/", core_word_div),
        Def("MOD", core_word_mod),
        Def("/MOD", core_word_div_mod),
        Def("ABS", core_word_abs),
        Def("NEGATE", core_word_negate),
        Def("MIN", core_word_min),
        Def("MAX", core_word_max),
        Def("1+", core_word_one_plus),
        Def("1-", core_word_one_minus),
        Def("AND", core_word_and),
        Def("OR", core_word_or),
        Def("XOR", core_word_xor),
        Def("INVERT", core_word_invert),
        Def("LSHIFT", core_word_lshift),
        Def("RSHIFT", core_word_rshift),
        Def("M*", core_word_m_star),
        Def("UM*", core_word_um_star),
        Def("UM/MOD", core_word_um_div_mod),
        Def("SM/REM", core_word_sm_div_rem),
        Def("S>D", core_word_s_to_d),
        Def("0=", core_word_eq0),
        Def("0<", core_word_lt0),
        Def("0>", core_word_gt0),
        Def("=", core_word_eq),
        Def("<>", core_word_ne),
        Def("<", core_word_lt),
        Def(">", core_word_gt),
        Def("U<", core_word_u_lt),
        Def("TRUE", core_word_true),
        Def("FALSE", core_word_false),
        Def("HEX", core_word_hex),
        Def("DECIMAL", core_word_decimal),
        Def("F+", core_word_f_add),
        Def("F-", core_word_f_sub),
        Def("F*", core_word_f_mul),
        Def("F/", core_word_f_div),
        Def("F@", core_word_f_fetch),
        Def("F!", core_word_f_store),
        Def("F.", core_word_f_dot),
        Def("FS.", core_word_fs_dot),
        Def("F0=", core_word_f_eq0),
        Def("F0<", core_word_f_lt0),
        Def("FDUP", core_word_f_dup),
        Def("FDROP", core_word_f_drop),
        Def("FSWAP", core_word_f_swap),
        Def("FSQRT", core_word_f_sqrt),
        Def("FMIN", core_word_f_min),
        Def("FMAX", core_word_f_max),
        Def("S>F", core_word_s_to_f),
        Def("F>S", core_word_f_to_s),
        Def(">FLOAT", core_word_to_float),
    ] {
        xs.insert_native(name, xf, 0)?;
    }
    OK
}

#[cfg(test)]
mod tests {
    use crate::error::Qerr;
    use crate::machine::{Machine, Options};

    fn boot() -> Machine {
        Machine::new(Options::default()).unwrap()
    }

    fn pop(xs: &mut Machine) -> i64 {
        xs.pop_data().unwrap().int()
    }

    #[test]
    fn test_arith() {
        let mut xs = boot();
        xs.interpret("5 4 -").unwrap();
        assert_eq!(1, pop(&mut xs));
        xs.interpret("4 5 -").unwrap();
        assert_eq!(-1, pop(&mut xs));
        xs.interpret("4 5 *").unwrap();
        assert_eq!(20, pop(&mut xs));
        xs.interpret("20 4 /").unwrap();
        assert_eq!(5, pop(&mut xs));
        xs.interpret("7 3 MOD").unwrap();
        assert_eq!(1, pop(&mut xs));
        xs.interpret("7 3 /MOD").unwrap();
        assert_eq!(2, pop(&mut xs));
        assert_eq!(1, pop(&mut xs));
        xs.interpret("-7 NEGATE ABS").unwrap();
        assert_eq!(7, pop(&mut xs));
        xs.interpret("3 9 MIN 5 MAX").unwrap();
        assert_eq!(5, pop(&mut xs));
        xs.interpret("41 1+ 1-").unwrap();
        assert_eq!(41, pop(&mut xs));
        assert_eq!(Err(Qerr::DivisionByZero), xs.interpret("1 0 /"));
        assert_eq!(Err(Qerr::DivisionByZero), xs.interpret("1 0 MOD"));
        assert_eq!(Err(Qerr::StackUnderflow), xs.interpret("+"));
    }

    #[test]
    fn test_symmetric_division() {
        let mut xs = boot();
        for (a, b, rem, quot) in
            [(10, 7, 3, 1), (-10, 7, -3, -1), (10, -7, 3, -1), (-10, -7, -3, 1)]
        {
            xs.interpret(&format!("{} {} /MOD", a, b)).unwrap();
            assert_eq!(quot, pop(&mut xs));
            assert_eq!(rem, pop(&mut xs));
        }
    }

    #[test]
    fn test_bitwise() {
        let mut xs = boot();
        xs.interpret("$F0 $0F OR").unwrap();
        assert_eq!(0xff, pop(&mut xs));
        xs.interpret("$FF $0F AND").unwrap();
        assert_eq!(0x0f, pop(&mut xs));
        xs.interpret("$FF $0F XOR").unwrap();
        assert_eq!(0xf0, pop(&mut xs));
        xs.interpret("0 INVERT").unwrap();
        assert_eq!(-1, pop(&mut xs));
        xs.interpret("1 3 LSHIFT").unwrap();
        assert_eq!(8, pop(&mut xs));
        xs.interpret("16 3 RSHIFT").unwrap();
        assert_eq!(2, pop(&mut xs));
    }

    #[test]
    fn test_double_cell() {
        let mut xs = boot();
        // 2^64 = 0 lo, 1 hi when squaring 2^32
        xs.interpret("$100000000 $100000000 UM*").unwrap();
        assert_eq!(1, pop(&mut xs));
        assert_eq!(0, pop(&mut xs));
        xs.interpret("-1 -1 M*").unwrap();
        assert_eq!(0, pop(&mut xs));
        assert_eq!(1, pop(&mut xs));
        xs.interpret("1 0 2 UM/MOD").unwrap();
        assert_eq!(0, pop(&mut xs));
        assert_eq!(1, pop(&mut xs));
        // 2^64 / 2 = 2^63, remainder zero
        xs.interpret("0 1 2 UM/MOD").unwrap();
        assert_eq!(i64::MIN, pop(&mut xs));
        assert_eq!(0, pop(&mut xs));
        xs.interpret("-10 S>D 7 SM/REM").unwrap();
        assert_eq!(-1, pop(&mut xs));
        assert_eq!(-3, pop(&mut xs));
        xs.interpret("5 S>D").unwrap();
        assert_eq!(0, pop(&mut xs));
        assert_eq!(5, pop(&mut xs));
        xs.interpret("-5 S>D").unwrap();
        assert_eq!(-1, pop(&mut xs));
        assert_eq!(-5, pop(&mut xs));
        assert_eq!(Err(Qerr::DivisionByZero), xs.interpret("1 0 0 UM/MOD"));
    }

    #[test]
    fn test_comparison() {
        let mut xs = boot();
        xs.interpret("-1 0 <").unwrap();
        assert_eq!(-1, pop(&mut xs));
        xs.interpret("10 5 <").unwrap();
        assert_eq!(0, pop(&mut xs));
        xs.interpret("2 3 =").unwrap();
        assert_eq!(0, pop(&mut xs));
        xs.interpret("4 4 =").unwrap();
        assert_eq!(-1, pop(&mut xs));
        xs.interpret("4 5 <>").unwrap();
        assert_eq!(-1, pop(&mut xs));
        xs.interpret("0 0=").unwrap();
        assert_eq!(-1, pop(&mut xs));
        xs.interpret("-3 0<").unwrap();
        assert_eq!(-1, pop(&mut xs));
        xs.interpret("-3 0>").unwrap();
        assert_eq!(0, pop(&mut xs));
        // -1 is the largest unsigned cell
        xs.interpret("-1 0 U<").unwrap();
        assert_eq!(0, pop(&mut xs));
        xs.interpret("0 -1 U<").unwrap();
        assert_eq!(-1, pop(&mut xs));
        xs.interpret("TRUE FALSE").unwrap();
        assert_eq!(0, pop(&mut xs));
        assert_eq!(-1, pop(&mut xs));
    }

    #[test]
    fn test_float_words() {
        let mut xs = boot();
        xs.interpret("1.5 2.5 F+").unwrap();
        assert_eq!(4.0, xs.pop_float().unwrap());
        xs.interpret("1.0 4.0 F/").unwrap();
        assert_eq!(0.25, xs.pop_float().unwrap());
        xs.interpret("9.0 FSQRT").unwrap();
        assert_eq!(3.0, xs.pop_float().unwrap());
        xs.interpret("3 S>F").unwrap();
        assert_eq!(3.0, xs.pop_float().unwrap());
        xs.interpret("2.9 F>S").unwrap();
        assert_eq!(2, pop(&mut xs));
        xs.interpret("0.0 F0=").unwrap();
        assert_eq!(-1, pop(&mut xs));
        xs.interpret("-0.5 F0<").unwrap();
        assert_eq!(-1, pop(&mut xs));
        assert_eq!(Err(Qerr::DivisionByZero), xs.interpret("1.0 0.0 F/"));
        assert_eq!(Err(Qerr::FloatStackUnderflow), xs.interpret("F+"));
    }

    #[test]
    fn test_f_dot_needs_decimal() {
        let mut xs = boot();
        xs.capture_output();
        xs.interpret("1.5 2.5 F+ F.").unwrap();
        assert_eq!("4.000000 ", xs.take_output());
        assert_eq!(Err(Qerr::BadBase), xs.interpret("1.0 HEX F."));
        xs.interpret("DECIMAL FDROP").unwrap();
    }

    #[test]
    fn test_to_float() {
        let mut xs = boot();
        xs.interpret("S\" 2.75\" >FLOAT").unwrap();
        assert_eq!(-1, pop(&mut xs));
        assert_eq!(2.75, xs.pop_float().unwrap());
        xs.interpret("S\" banana\" >FLOAT").unwrap();
        assert_eq!(0, pop(&mut xs));
    }
}
