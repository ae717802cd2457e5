//! Model interface.
//!
//! The external SMT solver produces models that assign concrete addresses
//! to heap references. Only that address view is needed by the constraint
//! core (for the type verification handoff), so the model is abstracted to
//! a single query.

use crate::heap::{ConcreteAddr, HeapRef};

/// A concrete address assignment produced by the external solver.
pub trait AddressModel {
    /// The concrete address the model assigns to `heap_ref`.
    ///
    /// Static references evaluate to their own address; symbolic references
    /// evaluate to whatever location the model chose for them.
    fn address_of(&self, heap_ref: HeapRef) -> ConcreteAddr;
}
