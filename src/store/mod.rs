pub mod disk;
pub mod memory;

use crate::decimal::{Money, Rate};
use crate::errors::Result;
use crate::state::{Account, InterestRate, MonthlyBalance, Transaction};
use crate::types::{AccountId, MonthKey, TimeRange, TransactionId};

pub use disk::DiskLedgerStore;
pub use memory::MemoryLedgerStore;

/// single write applied inside a batch
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerWrite {
    /// insert or replace the account record
    PutAccount(Account),
    /// remove the account with its transactions and checkpoints
    DeleteAccount(AccountId),
    /// `balance = balance + delta`, evaluated inside the commit
    AdjustBalance { account_id: AccountId, delta: Money },
    PutTransaction(Transaction),
    DeleteTransaction(TransactionId),
    PutInterestRate(InterestRate),
    PutCheckpoint(MonthlyBalance),
}

/// ordered writes committed atomically
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<LedgerWrite>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, write: LedgerWrite) -> &mut Self {
        self.writes.push(write);
        self
    }

    pub fn put_account(&mut self, account: Account) -> &mut Self {
        self.push(LedgerWrite::PutAccount(account))
    }

    pub fn delete_account(&mut self, account_id: AccountId) -> &mut Self {
        self.push(LedgerWrite::DeleteAccount(account_id))
    }

    pub fn adjust_balance(&mut self, account_id: AccountId, delta: Money) -> &mut Self {
        self.push(LedgerWrite::AdjustBalance { account_id, delta })
    }

    pub fn put_transaction(&mut self, tx: Transaction) -> &mut Self {
        self.push(LedgerWrite::PutTransaction(tx))
    }

    pub fn delete_transaction(&mut self, id: TransactionId) -> &mut Self {
        self.push(LedgerWrite::DeleteTransaction(id))
    }

    pub fn put_interest_rate(&mut self, rate: InterestRate) -> &mut Self {
        self.push(LedgerWrite::PutInterestRate(rate))
    }

    pub fn put_checkpoint(&mut self, checkpoint: MonthlyBalance) -> &mut Self {
        self.push(LedgerWrite::PutCheckpoint(checkpoint))
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn writes(&self) -> &[LedgerWrite] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<LedgerWrite> {
        self.writes
    }
}

/// durable keyed storage behind the engine
///
/// Reads observe committed state only. `commit` applies a whole batch or
/// nothing: a failing write (unknown account, unknown transaction) aborts
/// the batch and leaves the store untouched.
pub trait LedgerStore: Send + Sync {
    fn get_account(&self, id: AccountId) -> Result<Option<Account>>;

    /// all accounts ordered by name
    fn list_accounts(&self) -> Result<Vec<Account>>;

    fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>>;

    /// transactions of one account inside `range`, oldest first
    fn list_transactions(
        &self,
        account_id: AccountId,
        range: TimeRange,
    ) -> Result<Vec<Transaction>>;

    fn get_interest_rate(&self, month: MonthKey) -> Result<Option<InterestRate>>;

    /// all rates ordered by month
    fn list_interest_rates(&self) -> Result<Vec<InterestRate>>;

    fn get_checkpoint(
        &self,
        account_id: AccountId,
        month: MonthKey,
    ) -> Result<Option<MonthlyBalance>>;

    /// checkpoints of one account ordered by month
    fn list_checkpoints(&self, account_id: AccountId) -> Result<Vec<MonthlyBalance>>;

    fn commit(&self, batch: WriteBatch) -> Result<()>;

    fn list_account_ids(&self) -> Result<Vec<AccountId>> {
        Ok(self.list_accounts()?.into_iter().map(|a| a.id).collect())
    }

    fn adjust_account_balance(&self, account_id: AccountId, delta: Money) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.adjust_balance(account_id, delta);
        self.commit(batch)
    }

    fn insert_transaction(&self, tx: Transaction) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put_transaction(tx);
        self.commit(batch)
    }

    fn delete_transaction(&self, id: TransactionId) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete_transaction(id);
        self.commit(batch)
    }

    fn upsert_interest_rate(&self, month: MonthKey, rate: Rate) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put_interest_rate(InterestRate { month, rate });
        self.commit(batch)
    }

    fn upsert_checkpoint(&self, checkpoint: MonthlyBalance) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put_checkpoint(checkpoint);
        self.commit(batch)
    }
}

impl<S: LedgerStore + ?Sized> LedgerStore for std::sync::Arc<S> {
    fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        (**self).get_account(id)
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        (**self).list_accounts()
    }

    fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        (**self).get_transaction(id)
    }

    fn list_transactions(
        &self,
        account_id: AccountId,
        range: TimeRange,
    ) -> Result<Vec<Transaction>> {
        (**self).list_transactions(account_id, range)
    }

    fn get_interest_rate(&self, month: MonthKey) -> Result<Option<InterestRate>> {
        (**self).get_interest_rate(month)
    }

    fn list_interest_rates(&self) -> Result<Vec<InterestRate>> {
        (**self).list_interest_rates()
    }

    fn get_checkpoint(
        &self,
        account_id: AccountId,
        month: MonthKey,
    ) -> Result<Option<MonthlyBalance>> {
        (**self).get_checkpoint(account_id, month)
    }

    fn list_checkpoints(&self, account_id: AccountId) -> Result<Vec<MonthlyBalance>> {
        (**self).list_checkpoints(account_id)
    }

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        (**self).commit(batch)
    }
}
