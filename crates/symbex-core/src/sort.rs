//! Sort system for symbex terms.

use std::fmt;

/// A sort (type) of a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sort {
    /// Boolean sort
    Bool,
    /// Bit-vector sort with width in bits (1..=64)
    BitVec(u32),
    /// Heap address sort
    Address,
}

impl Sort {
    /// Bit-vector width, if this is a bit-vector sort.
    #[must_use]
    pub fn bv_width(self) -> Option<u32> {
        match self {
            Sort::BitVec(w) => Some(w),
            _ => None,
        }
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sort::Bool => write!(f, "Bool"),
            Sort::BitVec(w) => write!(f, "(_ BitVec {w})"),
            Sort::Address => write!(f, "Address"),
        }
    }
}
