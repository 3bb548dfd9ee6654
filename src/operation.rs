use crate::ident::{Resource, Transaction};
use crate::lock::LockMode;

#[derive(Eq, PartialEq, Hash, Debug, Copy, Clone)]
pub enum OpType {
    Read,
    Write,
}

impl From<OpType> for LockMode {
    fn from(op_type: OpType) -> Self {
        match op_type {
            OpType::Read => LockMode::Shared,
            OpType::Write => LockMode::Exclusive,
        }
    }
}

/// One page access issued by a transaction.
#[derive(Debug, Hash, Eq, PartialEq, Clone)]
pub struct Operation<R: Resource, T: Transaction> {
    pub op_type: OpType,
    pub txn: T,
    pub resource: R,
}

impl<R: Resource, T: Transaction> Operation<R, T> {
    pub fn new(txn: T, resource: R, op_type: OpType) -> Self {
        Self {
            op_type,
            txn,
            resource,
        }
    }

    pub fn op_type(&self) -> OpType {
        self.op_type
    }

    pub fn lock_mode(&self) -> LockMode {
        self.op_type.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_op_lock_mapping() {
        let read = Operation::new(1_u64, "p1", OpType::Read);
        let write = Operation::new(1_u64, "p1", OpType::Write);
        assert_eq!(LockMode::Shared, read.lock_mode());
        assert_eq!(LockMode::Exclusive, write.lock_mode());
    }
}
