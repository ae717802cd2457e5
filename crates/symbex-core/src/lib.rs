//! Symbex Core - Common types for the symbex symbolic execution engine
//!
//! This crate provides the foundational types shared across all symbex
//! components:
//! - Term representation (hash-consed DAG)
//! - Sort system
//! - Fixed-width signed bit-vector values
//! - Heap references (static / null / symbolic)
//! - Spatial regions (generic trait + integer intervals)
//! - Type system oracle (subtyping queries, type enumeration)
//! - Model interface (concrete address assignments)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bv;
pub mod heap;
pub mod model;
pub mod region;
pub mod sort;
pub mod term;
pub mod types;

pub use bv::BvValue;
pub use heap::{ConcreteAddr, HeapRef, SymbolicId};
pub use model::AddressModel;
pub use region::{IntIntervals, Region, RegionComparison};
pub use sort::Sort;
pub use term::{Symbol, TermData, TermId, TermStore};
pub use types::{TypeName, TypeSystem, TypesResult};
