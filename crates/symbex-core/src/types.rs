//! Type system oracle.
//!
//! The constraint core is generic over the target language's types. All
//! subtyping knowledge is supplied by the engine through the [`TypeSystem`]
//! trait; the core never inspects type handles beyond equality and hashing.

use std::fmt;
use std::hash::Hash;

/// Bound required of type handles flowing through terms and regions.
pub trait TypeName: Clone + Eq + Hash + fmt::Debug {}

impl<T: Clone + Eq + Hash + fmt::Debug> TypeName for T {}

/// Result of enumerating types under a budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypesResult<T> {
    /// At least one admissible type was found; the first element is the
    /// preferred candidate.
    Types(Vec<T>),
    /// No type satisfies the constraints.
    Empty,
    /// The enumeration budget was exhausted before a verdict.
    Undecided,
}

/// Subtyping oracle supplied by the engine at construction.
pub trait TypeSystem {
    /// The engine's type handle.
    type Ty: TypeName;

    /// True if `sup` is a supertype of (or equal to) `sub`.
    fn is_supertype(&self, sup: &Self::Ty, sub: &Self::Ty) -> bool;

    /// True if `ty` cannot have proper subtypes.
    fn is_final(&self, ty: &Self::Ty) -> bool;

    /// True if a type may inherit from `ty` alongside other unrelated
    /// supertypes.
    fn allows_multiple_inheritance(&self, ty: &Self::Ty) -> bool;

    /// True if concrete objects of type `ty` can exist.
    fn is_instantiable(&self, ty: &Self::Ty) -> bool;

    /// Enumerate up to `budget` instantiable types that are subtypes of all
    /// of `supertypes`, subtypes of none of `not_supertypes`, supertypes of
    /// all of `subtypes` and supertypes of none of `not_subtypes`.
    ///
    /// Implementations stop once `budget` candidate types have been
    /// examined and report [`TypesResult::Undecided`] if no verdict was
    /// reached by then.
    fn types_satisfying(
        &self,
        supertypes: &[Self::Ty],
        not_supertypes: &[Self::Ty],
        subtypes: &[Self::Ty],
        not_subtypes: &[Self::Ty],
        budget: usize,
    ) -> TypesResult<Self::Ty>;
}
