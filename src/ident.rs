use std::fmt::{Debug, Display, Formatter};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// A lockable unit. The lock manager only compares and hashes it.
pub trait Resource: Clone + Eq + Hash + Debug + Send + Sync {}

impl<X> Resource for X where X: Clone + Eq + Hash + Debug + Send + Sync {}

/// The unit of work that owns locks.
pub trait Transaction: Clone + Eq + Hash + Debug + Send + Sync {
    /// `true` for the "no transaction" sentinel. Requests made on behalf of an
    /// absent transaction bypass locking entirely.
    fn is_absent(&self) -> bool {
        false
    }
}

macro_rules! impl_transaction_for {
    ($($ty:ty),*) => {
        $(impl Transaction for $ty {})*
    };
}

impl_transaction_for!(u32, u64, usize, String);

impl<T: Transaction> Transaction for Option<T> {
    fn is_absent(&self) -> bool {
        self.as_ref().map_or(true, |txn| txn.is_absent())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Lock-free execution context.
    pub const NONE: TransactionId = TransactionId(0);

    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Transaction for TransactionId {
    fn is_absent(&self) -> bool {
        *self == Self::NONE
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct PageId {
    pub table_id: u32,
    pub page_no: u32,
}

impl PageId {
    pub fn new(table_id: u32, page_no: u32) -> Self {
        Self { table_id, page_no }
    }
}

impl Display for PageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.table_id, self.page_no)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_txn_ids_are_unique() {
        let a = TransactionId::new();
        let b = TransactionId::new();
        assert_ne!(a, b);
        assert!(!a.is_absent());
        assert!(TransactionId::NONE.is_absent());
    }

    #[test]
    pub fn test_option_sentinel() {
        assert!(None::<u64>.is_absent());
        assert!(!Some(7_u64).is_absent());
        assert!(Some(TransactionId::NONE).is_absent());
        assert!(!"t1".to_string().is_absent());
    }
}
