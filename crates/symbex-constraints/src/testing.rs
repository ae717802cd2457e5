//! Shared fixtures for unit tests: a small class/interface hierarchy.
//!
//! ```text
//!   Object
//!   ├── A           (class)
//!   │   ├── B       (class, implements I)
//!   │   └── C       (class, final)
//!   └── D           (class, implements I)
//!   I, J            (interfaces, multiple inheritance allowed)
//! ```
//!
//! `J` has no implementors, which makes it handy for unsatisfiable type
//! constraints.

use symbex_core::{TypeSystem, TypesResult};

/// A type handle in the test hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TestTy(pub &'static str);

/// Shorthand constructor.
pub(crate) fn ty(name: &'static str) -> TestTy {
    TestTy(name)
}

/// Table-driven test type system.
#[derive(Debug, Default)]
pub(crate) struct TestTypeSystem;

const ALL_TYPES: &[&str] = &["Object", "A", "B", "C", "D", "I", "J"];

/// Reflexive-transitive supertype pairs `(sup, sub)`.
const SUPERTYPE_PAIRS: &[(&str, &str)] = &[
    ("Object", "A"),
    ("Object", "B"),
    ("Object", "C"),
    ("Object", "D"),
    ("A", "B"),
    ("A", "C"),
    ("I", "B"),
    ("I", "D"),
];

impl TypeSystem for TestTypeSystem {
    type Ty = TestTy;

    fn is_supertype(&self, sup: &TestTy, sub: &TestTy) -> bool {
        sup == sub || SUPERTYPE_PAIRS.contains(&(sup.0, sub.0))
    }

    fn is_final(&self, ty: &TestTy) -> bool {
        ty.0 == "C"
    }

    fn allows_multiple_inheritance(&self, ty: &TestTy) -> bool {
        matches!(ty.0, "I" | "J")
    }

    fn is_instantiable(&self, ty: &TestTy) -> bool {
        !matches!(ty.0, "I" | "J")
    }

    fn types_satisfying(
        &self,
        supertypes: &[TestTy],
        not_supertypes: &[TestTy],
        subtypes: &[TestTy],
        not_subtypes: &[TestTy],
        budget: usize,
    ) -> TypesResult<TestTy> {
        let mut matches = Vec::new();
        for (examined, name) in ALL_TYPES.iter().enumerate() {
            if examined == budget {
                return if matches.is_empty() {
                    TypesResult::Undecided
                } else {
                    TypesResult::Types(matches)
                };
            }
            let candidate = TestTy(name);
            let admissible = self.is_instantiable(&candidate)
                && supertypes.iter().all(|u| self.is_supertype(u, &candidate))
                && not_supertypes.iter().all(|u| !self.is_supertype(u, &candidate))
                && subtypes.iter().all(|u| self.is_supertype(&candidate, u))
                && not_subtypes.iter().all(|u| !self.is_supertype(&candidate, u));
            if admissible {
                matches.push(candidate);
            }
        }
        if matches.is_empty() {
            TypesResult::Empty
        } else {
            TypesResult::Types(matches)
        }
    }
}
