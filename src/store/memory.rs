use chrono::NaiveDateTime;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::errors::{LedgerError, Result};
use crate::state::{Account, InterestRate, MonthlyBalance, Transaction};
use crate::store::{LedgerStore, LedgerWrite, WriteBatch};
use crate::types::{AccountId, MonthKey, TimeRange, TransactionId};

/// previous value of a key touched by a batch
enum Undo {
    Account(AccountId, Option<Account>),
    Transaction(TransactionId, Option<Transaction>),
    Rate(MonthKey, Option<InterestRate>),
    Checkpoint((AccountId, MonthKey), Option<MonthlyBalance>),
}

#[derive(Default)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    transactions: HashMap<TransactionId, Transaction>,
    by_account: BTreeSet<(AccountId, NaiveDateTime, TransactionId)>,
    rates: BTreeMap<MonthKey, InterestRate>,
    checkpoints: BTreeMap<(AccountId, MonthKey), MonthlyBalance>,
}

impl Tables {
    fn set_account(&mut self, id: AccountId, value: Option<Account>) -> Option<Account> {
        match value {
            Some(account) => self.accounts.insert(id, account),
            None => self.accounts.remove(&id),
        }
    }

    fn set_transaction(
        &mut self,
        id: TransactionId,
        value: Option<Transaction>,
    ) -> Option<Transaction> {
        let previous = self.transactions.remove(&id);
        if let Some(old) = &previous {
            self.by_account.remove(&(old.account_id, old.timestamp, old.id));
        }
        if let Some(tx) = value {
            self.by_account.insert((tx.account_id, tx.timestamp, tx.id));
            self.transactions.insert(id, tx);
        }
        previous
    }

    fn set_rate(&mut self, month: MonthKey, value: Option<InterestRate>) -> Option<InterestRate> {
        match value {
            Some(rate) => self.rates.insert(month, rate),
            None => self.rates.remove(&month),
        }
    }

    fn set_checkpoint(
        &mut self,
        key: (AccountId, MonthKey),
        value: Option<MonthlyBalance>,
    ) -> Option<MonthlyBalance> {
        match value {
            Some(checkpoint) => self.checkpoints.insert(key, checkpoint),
            None => self.checkpoints.remove(&key),
        }
    }

    fn require_account(&self, id: AccountId) -> Result<&Account> {
        self.accounts.get(&id).ok_or(LedgerError::AccountNotFound { id })
    }

    fn apply(&mut self, write: LedgerWrite, undo: &mut Vec<Undo>) -> Result<()> {
        match write {
            LedgerWrite::PutAccount(account) => {
                let id = account.id;
                let previous = self.set_account(id, Some(account));
                undo.push(Undo::Account(id, previous));
            }
            LedgerWrite::DeleteAccount(id) => {
                self.require_account(id)?;
                let tx_ids: Vec<TransactionId> = self
                    .by_account
                    .range((id, NaiveDateTime::MIN, TransactionId::nil())..)
                    .take_while(|(account_id, _, _)| *account_id == id)
                    .map(|(_, _, tx_id)| *tx_id)
                    .collect();
                for tx_id in tx_ids {
                    let previous = self.set_transaction(tx_id, None);
                    undo.push(Undo::Transaction(tx_id, previous));
                }
                let months: Vec<MonthKey> = self
                    .checkpoints
                    .keys()
                    .filter(|(account_id, _)| *account_id == id)
                    .map(|(_, month)| *month)
                    .collect();
                for month in months {
                    let previous = self.set_checkpoint((id, month), None);
                    undo.push(Undo::Checkpoint((id, month), previous));
                }
                let previous = self.set_account(id, None);
                undo.push(Undo::Account(id, previous));
            }
            LedgerWrite::AdjustBalance { account_id, delta } => {
                let mut account = self.require_account(account_id)?.clone();
                account.balance += delta;
                let previous = self.set_account(account_id, Some(account));
                undo.push(Undo::Account(account_id, previous));
            }
            LedgerWrite::PutTransaction(tx) => {
                self.require_account(tx.account_id)?;
                let id = tx.id;
                let previous = self.set_transaction(id, Some(tx));
                undo.push(Undo::Transaction(id, previous));
            }
            LedgerWrite::DeleteTransaction(id) => {
                if !self.transactions.contains_key(&id) {
                    return Err(LedgerError::TransactionNotFound { id });
                }
                let previous = self.set_transaction(id, None);
                undo.push(Undo::Transaction(id, previous));
            }
            LedgerWrite::PutInterestRate(rate) => {
                let previous = self.set_rate(rate.month, Some(rate));
                undo.push(Undo::Rate(rate.month, previous));
            }
            LedgerWrite::PutCheckpoint(checkpoint) => {
                self.require_account(checkpoint.account_id)?;
                let key = (checkpoint.account_id, checkpoint.month);
                let previous = self.set_checkpoint(key, Some(checkpoint));
                undo.push(Undo::Checkpoint(key, previous));
            }
        }
        Ok(())
    }

    fn rollback(&mut self, undo: Vec<Undo>) {
        for entry in undo.into_iter().rev() {
            match entry {
                Undo::Account(id, previous) => {
                    self.set_account(id, previous);
                }
                Undo::Transaction(id, previous) => {
                    self.set_transaction(id, previous);
                }
                Undo::Rate(month, previous) => {
                    self.set_rate(month, previous);
                }
                Undo::Checkpoint(key, previous) => {
                    self.set_checkpoint(key, previous);
                }
            }
        }
    }
}

/// in-process ledger store
///
/// A single mutex serializes commits, which gives every batch the same
/// atomicity the disk store gets from its write transaction.
#[derive(Default)]
pub struct MemoryLedgerStore {
    tables: Mutex<Tables>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| LedgerError::Storage {
            message: "memory store lock poisoned".to_string(),
        })
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        Ok(self.tables()?.accounts.get(&id).cloned())
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let mut accounts: Vec<Account> = self.tables()?.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(accounts)
    }

    fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        Ok(self.tables()?.transactions.get(&id).cloned())
    }

    fn list_transactions(
        &self,
        account_id: AccountId,
        range: TimeRange,
    ) -> Result<Vec<Transaction>> {
        let tables = self.tables()?;
        let start = range.start.unwrap_or(NaiveDateTime::MIN);
        let found = tables
            .by_account
            .range((account_id, start, TransactionId::nil())..)
            .take_while(|(id, ts, _)| *id == account_id && range.end.map_or(true, |end| *ts < end))
            .filter_map(|(_, _, tx_id)| tables.transactions.get(tx_id).cloned())
            .collect::<Vec<_>>();
        debug!(account = %account_id, count = found.len(), "listed transactions");
        Ok(found)
    }

    fn get_interest_rate(&self, month: MonthKey) -> Result<Option<InterestRate>> {
        Ok(self.tables()?.rates.get(&month).copied())
    }

    fn list_interest_rates(&self) -> Result<Vec<InterestRate>> {
        Ok(self.tables()?.rates.values().copied().collect())
    }

    fn get_checkpoint(
        &self,
        account_id: AccountId,
        month: MonthKey,
    ) -> Result<Option<MonthlyBalance>> {
        Ok(self.tables()?.checkpoints.get(&(account_id, month)).cloned())
    }

    fn list_checkpoints(&self, account_id: AccountId) -> Result<Vec<MonthlyBalance>> {
        Ok(self
            .tables()?
            .checkpoints
            .iter()
            .filter(|((id, _), _)| *id == account_id)
            .map(|(_, checkpoint)| checkpoint.clone())
            .collect())
    }

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut tables = self.tables()?;
        let writes = batch.len();
        let mut undo = Vec::with_capacity(writes);
        for write in batch.into_writes() {
            if let Err(e) = tables.apply(write, &mut undo) {
                tables.rollback(undo);
                debug!(error = %e, "memory batch rolled back");
                return Err(e);
            }
        }
        debug!(writes, "memory batch committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::{Money, Rate};
    use crate::types::parse_timestamp;

    fn ts(s: &str) -> NaiveDateTime {
        parse_timestamp(s).unwrap()
    }

    #[test]
    fn test_range_scan_is_ordered_and_half_open() {
        let store = MemoryLedgerStore::new();
        let account = Account::new("checking");
        let other = Account::new("other");
        let mut batch = WriteBatch::new();
        batch.put_account(account.clone()).put_account(other.clone());
        for (id, amount, at) in [
            (account.id, 3, "2024-03-01 00:00:00"),
            (account.id, 1, "2024-02-10 09:00:00"),
            (account.id, 2, "2024-02-20 09:00:00"),
            (other.id, 9, "2024-02-15 09:00:00"),
        ] {
            batch.put_transaction(Transaction::regular(id, Money::from_major(amount), ts(at)));
        }
        store.commit(batch).unwrap();

        let month: MonthKey = "2024-02".parse().unwrap();
        let feb = store.list_transactions(account.id, TimeRange::month(month)).unwrap();
        let amounts: Vec<Money> = feb.iter().map(|t| t.amount).collect();
        assert_eq!(amounts, vec![Money::from_major(1), Money::from_major(2)]);

        let all = store.list_transactions(account.id, TimeRange::all()).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_failed_batch_leaves_store_untouched() {
        let store = MemoryLedgerStore::new();
        let account = Account::new("checking");
        let mut setup = WriteBatch::new();
        setup.put_account(account.clone());
        store.commit(setup).unwrap();

        let deposit =
            Transaction::regular(account.id, Money::from_major(50), ts("2024-01-05 10:00:00"));
        let mut batch = WriteBatch::new();
        batch
            .put_transaction(deposit)
            .adjust_balance(account.id, Money::from_major(50))
            .adjust_balance(AccountId::new_v4(), Money::from_major(1));

        let err = store.commit(batch).unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound { .. }));

        assert_eq!(store.get_account(account.id).unwrap().unwrap().balance, Money::ZERO);
        assert!(store.list_transactions(account.id, TimeRange::all()).unwrap().is_empty());
    }

    #[test]
    fn test_delete_account_cascades() {
        let store = MemoryLedgerStore::new();
        let account = Account::new("checking");
        let month: MonthKey = "2024-01".parse().unwrap();
        let tx = Transaction::regular(account.id, Money::from_major(5), ts("2024-01-05 10:00:00"));
        let mut batch = WriteBatch::new();
        batch
            .put_account(account.clone())
            .put_transaction(tx.clone())
            .put_checkpoint(MonthlyBalance {
                account_id: account.id,
                month,
                end_balance: Money::from_major(5),
                interest_accrued: Money::ZERO,
                capitalization: None,
            });
        store.commit(batch).unwrap();
        store.upsert_interest_rate(month, Rate::from_whole_percent(5)).unwrap();

        let mut delete = WriteBatch::new();
        delete.delete_account(account.id);
        store.commit(delete).unwrap();

        assert!(store.get_account(account.id).unwrap().is_none());
        assert!(store.get_transaction(tx.id).unwrap().is_none());
        assert!(store.get_checkpoint(account.id, month).unwrap().is_none());
        // rates are global and survive
        assert!(store.get_interest_rate(month).unwrap().is_some());
    }

    #[test]
    fn test_delete_unknown_transaction() {
        let store = MemoryLedgerStore::new();
        let err = store.delete_transaction(TransactionId::new_v4()).unwrap_err();
        assert!(matches!(err, LedgerError::TransactionNotFound { .. }));
    }
}
