use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::errors::{LedgerError, Result};
use crate::types::{AccountId, MonthKey};

/// one mutex per account, serializing balance-changing writes
#[derive(Clone, Default)]
pub struct AccountLocks {
    inner: Arc<Mutex<HashMap<AccountId, Arc<Mutex<()>>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// the mutex of `account_id`, created on first use
    pub fn handle(&self, account_id: AccountId) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .inner
            .lock()
            .map_err(|_| LedgerError::storage("account lock table poisoned"))?;
        Ok(locks.entry(account_id).or_default().clone())
    }

    /// drop the mutex of a deleted account
    pub fn forget(&self, account_id: AccountId) {
        if let Ok(mut locks) = self.inner.lock() {
            locks.remove(&account_id);
        }
    }
}

/// hold an account mutex for the duration of `f`
pub fn with_account_lock<T>(handle: &Mutex<()>, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let _guard: MutexGuard<'_, ()> = handle
        .lock()
        .map_err(|_| LedgerError::storage("account lock poisoned"))?;
    f()
}

/// months with a closing run in flight
#[derive(Clone, Default)]
pub struct ClosingGuard {
    running: Arc<Mutex<HashSet<MonthKey>>>,
}

impl ClosingGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// claim `month`, failing with `ClosingInProgress` if already claimed
    pub fn acquire(&self, month: MonthKey) -> Result<ClosingPermit> {
        let mut running = self
            .running
            .lock()
            .map_err(|_| LedgerError::storage("closing guard poisoned"))?;
        if !running.insert(month) {
            return Err(LedgerError::ClosingInProgress { month });
        }
        debug!(%month, "closing permit acquired");
        Ok(ClosingPermit {
            month,
            running: Arc::clone(&self.running),
        })
    }

    pub fn is_running(&self, month: MonthKey) -> bool {
        self.running
            .lock()
            .map(|running| running.contains(&month))
            .unwrap_or(false)
    }
}

/// released when dropped
#[derive(Debug)]
pub struct ClosingPermit {
    month: MonthKey,
    running: Arc<Mutex<HashSet<MonthKey>>>,
}

impl ClosingPermit {
    pub fn month(&self) -> MonthKey {
        self.month
    }
}

impl Drop for ClosingPermit {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.lock() {
            running.remove(&self.month);
        }
    }
}

/// cooperative cancellation flag shared with a closing run
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
