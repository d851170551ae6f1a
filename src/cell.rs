use crate::error::{Qerr, Qresult1};
use crate::word::Xt;

pub type Qint = i64;
pub type Quint = u64;
pub type Qfloat = f64;

/// Size of a cell in address units.
pub const CELL: usize = std::mem::size_of::<Qint>();

pub const TRUE: Cell = Cell(-1);
pub const FALSE: Cell = Cell(0);

/// One machine word.  A cell is read as a signed integer, an unsigned
/// integer, a data-space address, an execution token or a float bit
/// pattern; which one is decided by the consuming primitive, never
/// tracked at runtime.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Cell(pub Qint);

impl Cell {
    pub fn int(self) -> Qint {
        self.0
    }

    pub fn uint(self) -> Quint {
        self.0 as Quint
    }

    pub fn addr(self) -> usize {
        self.0 as usize
    }

    pub fn float(self) -> Qfloat {
        Qfloat::from_bits(self.0 as u64)
    }

    pub fn is_true(self) -> bool {
        self.0 != 0
    }

    /// Execution tokens are encoded off by one so that zero stays free
    /// for the FIND-NAME not-found value.
    pub fn xt(self) -> Qresult1<Xt> {
        if self.0 > 0 {
            Ok(Xt(self.0 as usize - 1))
        } else {
            Err(Qerr::InvalidAddress)
        }
    }

    pub fn from_uint(u: Quint) -> Cell {
        Cell(u as Qint)
    }

    pub fn from_addr(a: usize) -> Cell {
        Cell(a as Qint)
    }

    pub fn from_float(f: Qfloat) -> Cell {
        Cell(f.to_bits() as Qint)
    }

    pub fn from_bool(t: bool) -> Cell {
        if t {
            TRUE
        } else {
            FALSE
        }
    }

    pub fn from_xt(xt: Xt) -> Cell {
        Cell(xt.0 as Qint + 1)
    }
}

use std::fmt;

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Round a byte count up to the next cell boundary.
pub fn cell_align(n: usize) -> usize {
    (n + (CELL - 1)) & !(CELL - 1)
}
