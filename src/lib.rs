pub mod dead_lock_detector;
pub mod ident;
pub mod lock;
pub mod lock_mgr;
mod locks_table;
pub mod operation;
pub mod operation_scheduler;
pub mod segment;
pub mod semaphore;

pub use ident::{PageId, Resource, Transaction, TransactionId};
pub use lock::{Lock, LockMode};
pub use lock_mgr::{global_lock_manager, LockError, LockManager};
