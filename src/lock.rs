use crate::ident::{Resource, Transaction};
use std::fmt::{Display, Formatter};

/// Units every resource starts with. An exclusive holder owns all of them.
pub const TOTAL_UNITS: u64 = u32::MAX as u64;
pub const SHARED_UNITS: u64 = 1;
/// What a shared holder still needs to become the exclusive holder.
pub const UPGRADE_UNITS: u64 = TOTAL_UNITS - SHARED_UNITS;

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    pub fn units(&self) -> u64 {
        match *self {
            LockMode::Shared => SHARED_UNITS,
            LockMode::Exclusive => TOTAL_UNITS,
        }
    }

    /// Holding `self` is enough to satisfy a request for `require_lock`.
    pub fn covers(&self, require_lock: LockMode) -> bool {
        use LockMode::*;
        match *self {
            Exclusive => true,
            Shared => require_lock == Shared,
        }
    }

    pub fn upgradable(&self, require_lock: LockMode) -> bool {
        use LockMode::*;
        match *self {
            Shared => require_lock == Exclusive,
            Exclusive => false,
        }
    }
}

impl Display for LockMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LockMode::Shared => write!(f, "S"),
            LockMode::Exclusive => write!(f, "X"),
        }
    }
}

/// A lock currently held by `txn`.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Lock<R: Resource, T: Transaction> {
    pub txn: T,
    pub lock_mode: LockMode,
    pub rid: R,
}

impl<R: Resource, T: Transaction> Lock<R, T> {
    pub fn new(lock_mode: LockMode, txn: T, rid: R) -> Self {
        Self {
            txn,
            lock_mode,
            rid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LockMode::*;
    use super::*;

    #[test]
    pub fn test_mode_relations() {
        assert!(Exclusive.covers(Shared));
        assert!(Exclusive.covers(Exclusive));
        assert!(!Shared.covers(Exclusive));
        assert!(Shared.upgradable(Exclusive));
        assert!(!Exclusive.upgradable(Shared));
    }

    #[test]
    pub fn test_upgrade_completes_exclusive() {
        assert_eq!(Shared.units() + UPGRADE_UNITS, Exclusive.units());
    }
}
