//! Ownership tokens.
//!
//! Every execution state owns its constraint containers through a token
//! minted once per clone. A container mutation is applied in place only
//! when the caller presents the container's recorded owner token; any other
//! token forces a copy and re-owns the result. Since forking always hands
//! the clone a fresh token, a stale token can never observe or corrupt the
//! other copy's state.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_OWNERSHIP: AtomicU64 = AtomicU64::new(1);

/// A capability proving exclusive mutation rights over constraint
/// containers. Process-unique; compared by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ownership(u64);

impl Ownership {
    /// Mint a fresh token, distinct from every token minted before.
    #[allow(clippy::new_without_default)]
    #[must_use]
    pub fn new() -> Self {
        Ownership(NEXT_OWNERSHIP.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique() {
        let a = Ownership::new();
        let b = Ownership::new();
        assert_ne!(a, b);
        assert_eq!(a, a);
    }
}
