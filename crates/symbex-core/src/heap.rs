//! Heap references.
//!
//! A heap reference identifies an object location. Static references carry
//! a concrete address fixed by the memory subsystem (allocations and
//! compile-time-known singletons); symbolic references stand for unknown
//! locations and include the distinguished symbolic null.

use std::fmt;

/// Concrete address of a static (already-known) heap location.
pub type ConcreteAddr = u32;

/// Identifier of a symbolic heap reference.
pub type SymbolicId = u32;

/// A reference to a heap object location.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HeapRef {
    /// A concrete location with a known address.
    Static(ConcreteAddr),
    /// The distinguished symbolic null reference.
    Null,
    /// A symbolic location.
    Symbolic(SymbolicId),
}

impl HeapRef {
    /// True for static (concrete) references.
    #[must_use]
    pub fn is_static(&self) -> bool {
        matches!(self, HeapRef::Static(_))
    }

    /// True for symbolic references, including null.
    #[must_use]
    pub fn is_symbolic(&self) -> bool {
        !self.is_static()
    }

    /// True for the null reference.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, HeapRef::Null)
    }
}

impl fmt::Debug for HeapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapRef::Static(addr) => write!(f, "@{addr}"),
            HeapRef::Null => write!(f, "null"),
            HeapRef::Symbolic(id) => write!(f, "?{id}"),
        }
    }
}
