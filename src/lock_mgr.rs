use crate::dead_lock_detector::{Cycle, WaitsForGraph};
use crate::ident::{PageId, Resource, Transaction, TransactionId};
use crate::lock::{Lock, LockMode, SHARED_UNITS, TOTAL_UNITS, UPGRADE_UNITS};
use crate::lock_mgr::LockError::DeadlockDetected;
use crate::locks_table::LocksTable;
use crate::semaphore::{Admission, FairSemaphore};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Resources each transaction holds in shared mode.
type SharedLockTable<T, R> = LocksTable<T, R>;
/// Resources each transaction holds in exclusive mode.
type ExclusiveLockTable<T, R> = LocksTable<T, R>;

static GLOBAL_LOCK_MANAGER: Lazy<LockManager<PageId, TransactionId>> =
    Lazy::new(LockManager::new);

/// Process-wide page lock manager.
pub fn global_lock_manager() -> &'static LockManager<PageId, TransactionId> {
    &GLOBAL_LOCK_MANAGER
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum LockError {
    #[error("Deadlock detected for TXN {txn} waiting on RES {resource}. Cycle {cycle:?}")]
    DeadlockDetected {
        txn: String,
        resource: String,
        cycle: Vec<String>,
    },
}

impl LockError {
    fn deadlock<R: Resource, T: Transaction>(txn: &T, rid: &R, cycle: Cycle<T>) -> Self {
        DeadlockDetected {
            txn: format!("{:?}", txn),
            resource: format!("{:?}", rid),
            cycle: cycle.0.iter().map(|t| format!("{:?}", t)).collect(),
        }
    }

    pub fn is_deadlock(&self) -> bool {
        matches!(self, DeadlockDetected { .. })
    }
}

#[derive(Debug)]
struct LockTable<R: Resource, T: Transaction> {
    semaphores: HashMap<R, Arc<FairSemaphore<T>>>,
    shared_locks: SharedLockTable<T, R>,
    exclusive_locks: ExclusiveLockTable<T, R>,
    waits_for: WaitsForGraph<R, T>,
}

impl<R: Resource, T: Transaction> LockTable<R, T> {
    fn new() -> Self {
        Self {
            semaphores: HashMap::new(),
            shared_locks: SharedLockTable::new(),
            exclusive_locks: ExclusiveLockTable::new(),
            waits_for: WaitsForGraph::new(),
        }
    }

    fn semaphore(&mut self, rid: &R) -> Arc<FairSemaphore<T>> {
        self.semaphores
            .entry(rid.clone())
            .or_insert_with(|| Arc::new(FairSemaphore::new(TOTAL_UNITS)))
            .clone()
    }

    fn lock_mode(&self, rid: &R, txn: &T) -> Option<LockMode> {
        if self.exclusive_locks.contains(txn, rid) {
            Some(LockMode::Exclusive)
        } else if self.shared_locks.contains(txn, rid) {
            Some(LockMode::Shared)
        } else {
            None
        }
    }

    /// Waiters woken by the semaphore own their units from this moment on.
    fn record_grants(&mut self, rid: &R, woken: Vec<T>) {
        for txn in woken {
            trace!(?rid, ?txn, "handed lock to waiter");
            self.waits_for.grant(&txn, rid);
        }
    }

    fn release_units(&mut self, rid: &R, txn: &T, units: u64) {
        let woken = self.semaphore(rid).release(units);
        self.waits_for.release(txn, rid);
        self.record_grants(rid, woken);
    }
}

/// Grants shared and exclusive locks on resources to transactions.
///
/// `acquire` blocks until the lock is available. A request that would block and
/// close a cycle in the waits-for graph fails with [`LockError::DeadlockDetected`]
/// instead; the caller is expected to roll the transaction back and call
/// [`LockManager::release_all`].
///
/// A transaction must be driven by one thread at a time.
#[derive(Debug)]
pub struct LockManager<R: Resource, T: Transaction> {
    table: RwLock<LockTable<R, T>>,
}

impl<R: Resource, T: Transaction> Default for LockManager<R, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource, T: Transaction> LockManager<R, T> {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(LockTable::new()),
        }
    }

    /// Grant `txn` a `lock_mode` lock on `rid`, blocking until it is available.
    ///
    /// Already holding a lock that covers the request is a no-op. A shared holder
    /// asking for exclusive is upgraded in place: it keeps its shared lock until the
    /// remaining units are granted.
    pub fn acquire(&self, rid: &R, txn: &T, lock_mode: LockMode) -> Result<(), LockError> {
        if txn.is_absent() {
            return Ok(());
        }
        let mut table = self.table.write();
        let (units, promote) = match table.lock_mode(rid, txn) {
            Some(held) if held.covers(lock_mode) => return Ok(()),
            Some(held) => {
                debug_assert!(held.upgradable(lock_mode));
                (UPGRADE_UNITS, true)
            }
            None => (lock_mode.units(), false),
        };
        debug!(?rid, ?txn, mode = %lock_mode, promote, "acquiring lock");

        let semaphore = table.semaphore(rid);
        match semaphore.admit(units, txn.clone(), promote) {
            Admission::Granted => table.waits_for.grant(txn, rid),
            Admission::Queued(ticket) => {
                if let Err(cycle) = table.waits_for.request(txn, rid) {
                    let woken = semaphore.cancel(ticket);
                    table.record_grants(rid, woken);
                    let err = LockError::deadlock(txn, rid, cycle);
                    warn!(?rid, ?txn, mode = %lock_mode, "{}", err);
                    return Err(err);
                }
                trace!(?rid, ?txn, mode = %lock_mode, ticket, "waiting for lock");
                drop(table);
                semaphore.wait(ticket);
                table = self.table.write();
            }
        }

        match lock_mode {
            LockMode::Shared => {
                table.shared_locks.insert(txn, rid.clone());
            }
            LockMode::Exclusive => {
                table.exclusive_locks.insert(txn, rid.clone());
                table.shared_locks.remove(txn, rid);
            }
        }
        debug!(?rid, ?txn, mode = %lock_mode, "acquired lock");
        Ok(())
    }

    /// Release whatever lock `txn` holds on `rid`. Releasing nothing is fine.
    pub fn release(&self, rid: &R, txn: &T) {
        if txn.is_absent() {
            return;
        }
        let mut table = self.table.write();
        let Some(held) = table.lock_mode(rid, txn) else {
            return;
        };
        table.release_units(rid, txn, held.units());
        match held {
            LockMode::Shared => table.shared_locks.remove(txn, rid),
            LockMode::Exclusive => table.exclusive_locks.remove(txn, rid),
        };
        debug!(?rid, ?txn, mode = %held, "released lock");
    }

    /// Release every lock `txn` holds. Call once when the transaction commits or aborts.
    pub fn release_all(&self, txn: &T) {
        if txn.is_absent() {
            return;
        }
        let mut table = self.table.write();
        let shared = table.shared_locks.take(txn);
        let exclusive = table.exclusive_locks.take(txn);
        for rid in shared.iter() {
            table.release_units(rid, txn, SHARED_UNITS);
        }
        for rid in exclusive.iter() {
            table.release_units(rid, txn, TOTAL_UNITS);
        }
        debug!(
            ?txn,
            shared = shared.len(),
            exclusive = exclusive.len(),
            "released all locks"
        );
    }

    pub fn has_lock(&self, rid: &R, txn: &T) -> bool {
        self.lock_mode(rid, txn).is_some()
    }

    /// `true` if the lock `txn` holds on `rid` is enough for `lock_mode`.
    ///
    /// This is a sufficiency check, not the recorded mode: an exclusive holder
    /// also answers `true` for [`LockMode::Shared`]. Use [`LockManager::lock_mode`]
    /// to see exactly what is held.
    pub fn has_lock_mode(&self, rid: &R, txn: &T, lock_mode: LockMode) -> bool {
        self.lock_mode(rid, txn)
            .map_or(false, |held| held.covers(lock_mode))
    }

    /// The mode `txn` is recorded as holding on `rid`.
    pub fn lock_mode(&self, rid: &R, txn: &T) -> Option<LockMode> {
        self.table.read().lock_mode(rid, txn)
    }

    pub fn shared_locked(&self, txn: &T) -> HashSet<R> {
        self.table.read().shared_locks.values(txn).cloned().collect()
    }

    pub fn exclusive_locked(&self, txn: &T) -> HashSet<R> {
        self.table.read().exclusive_locks.values(txn).cloned().collect()
    }

    pub fn held_locks(&self, txn: &T) -> Vec<Lock<R, T>> {
        let table = &*self.table.read();
        let shared = table
            .shared_locks
            .values(txn)
            .map(|rid| Lock::new(LockMode::Shared, txn.clone(), rid.clone()));
        let exclusive = table
            .exclusive_locks
            .values(txn)
            .map(|rid| Lock::new(LockMode::Exclusive, txn.clone(), rid.clone()));
        shared.chain(exclusive).collect()
    }

    /// Transactions that own units of `rid`, including waiters already woken.
    pub fn holders(&self, rid: &R) -> HashSet<T> {
        self.table.read().waits_for.holding(rid)
    }

    pub fn available_units(&self, rid: &R) -> u64 {
        self.table
            .read()
            .semaphores
            .get(rid)
            .map_or(TOTAL_UNITS, |sem| sem.available_permits())
    }

    /// Requests queued on `rid`.
    pub fn waiting_count(&self, rid: &R) -> usize {
        self.table
            .read()
            .semaphores
            .get(rid)
            .map_or(0, |sem| sem.queue_len())
    }
}
