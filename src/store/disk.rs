use fjall::{
    Config, PartitionCreateOptions, PersistMode, ReadTransaction, TransactionalKeyspace,
    TransactionalPartitionHandle, WriteTransaction,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

use crate::errors::{LedgerError, Result};
use crate::state::{Account, InterestRate, MonthlyBalance, Transaction};
use crate::store::{LedgerStore, LedgerWrite, WriteBatch};
use crate::types::{format_timestamp, AccountId, MonthKey, TimeRange, TransactionId};

const ACCOUNTS: &str = "accounts";
const TRANSACTIONS: &str = "transactions";
const TRANSACTIONS_BY_ACCOUNT: &str = "transactions_by_account";
const INTEREST_RATES: &str = "interest_rates";
const MONTHLY_BALANCES: &str = "monthly_balances";

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn account_prefix(account_id: AccountId) -> String {
    format!("{account_id}/")
}

/// `<account>/<YYYY-MM-DD HH:MM:SS>/<tx>`; sorts by time within an account
fn index_key(tx: &Transaction) -> String {
    format!("{}/{}/{}", tx.account_id, format_timestamp(&tx.timestamp), tx.id)
}

fn checkpoint_key(account_id: AccountId, month: MonthKey) -> String {
    format!("{account_id}/{month}")
}

/// ledger store persisted in a fjall transactional keyspace
///
/// Every batch runs in one write transaction, so balance deltas and the
/// records they belong to land together or not at all.
pub struct DiskLedgerStore {
    keyspace: TransactionalKeyspace,
    accounts: TransactionalPartitionHandle,
    transactions: TransactionalPartitionHandle,
    by_account: TransactionalPartitionHandle,
    rates: TransactionalPartitionHandle,
    checkpoints: TransactionalPartitionHandle,
}

impl DiskLedgerStore {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path).map_err(LedgerError::storage)?;
        let keyspace = Config::new(path)
            .open_transactional()
            .map_err(LedgerError::storage)?;

        let partition = |name: &str| {
            keyspace
                .open_partition(name, PartitionCreateOptions::default())
                .map_err(LedgerError::storage)
        };
        let accounts = partition(ACCOUNTS)?;
        let transactions = partition(TRANSACTIONS)?;
        let by_account = partition(TRANSACTIONS_BY_ACCOUNT)?;
        let rates = partition(INTEREST_RATES)?;
        let checkpoints = partition(MONTHLY_BALANCES)?;

        info!(path = %path.display(), "opened ledger store");
        Ok(Self {
            keyspace,
            accounts,
            transactions,
            by_account,
            rates,
            checkpoints,
        })
    }

    fn read_value<T: DeserializeOwned>(
        &self,
        rtx: &ReadTransaction,
        partition: &TransactionalPartitionHandle,
        key: &str,
    ) -> Result<Option<T>> {
        match rtx.get(partition, key).map_err(LedgerError::storage)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_values<T: DeserializeOwned>(
        &self,
        rtx: &ReadTransaction,
        partition: &TransactionalPartitionHandle,
        prefix: &str,
    ) -> Result<Vec<T>> {
        let mut values = Vec::new();
        for item in rtx.prefix(partition, prefix) {
            let (_, bytes) = item.map_err(LedgerError::storage)?;
            values.push(decode(&bytes)?);
        }
        Ok(values)
    }

    fn write_value<T: DeserializeOwned>(
        wtx: &mut WriteTransaction,
        partition: &TransactionalPartitionHandle,
        key: &str,
    ) -> Result<Option<T>> {
        match wtx.get(partition, key).map_err(LedgerError::storage)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_keys(
        wtx: &mut WriteTransaction,
        partition: &TransactionalPartitionHandle,
        prefix: &str,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut pairs = Vec::new();
        for item in wtx.prefix(partition, prefix) {
            let (key, value) = item.map_err(LedgerError::storage)?;
            pairs.push((key.to_vec(), value.to_vec()));
        }
        Ok(pairs)
    }

    fn apply(&self, wtx: &mut WriteTransaction, write: LedgerWrite) -> Result<()> {
        match write {
            LedgerWrite::PutAccount(account) => {
                wtx.insert(&self.accounts, account.id.to_string(), encode(&account)?);
            }
            LedgerWrite::DeleteAccount(id) => {
                let key = id.to_string();
                if Self::write_value::<Account>(wtx, &self.accounts, &key)?.is_none() {
                    return Err(LedgerError::AccountNotFound { id });
                }
                let prefix = account_prefix(id);
                for (index_key, tx_id) in Self::scan_keys(wtx, &self.by_account, &prefix)? {
                    wtx.remove(&self.by_account, index_key);
                    wtx.remove(&self.transactions, tx_id);
                }
                for (checkpoint_key, _) in Self::scan_keys(wtx, &self.checkpoints, &prefix)? {
                    wtx.remove(&self.checkpoints, checkpoint_key);
                }
                wtx.remove(&self.accounts, key);
            }
            LedgerWrite::AdjustBalance { account_id, delta } => {
                let key = account_id.to_string();
                let mut account: Account = Self::write_value(wtx, &self.accounts, &key)?
                    .ok_or(LedgerError::AccountNotFound { id: account_id })?;
                account.balance += delta;
                wtx.insert(&self.accounts, key, encode(&account)?);
            }
            LedgerWrite::PutTransaction(tx) => {
                let account_key = tx.account_id.to_string();
                if Self::write_value::<Account>(wtx, &self.accounts, &account_key)?.is_none() {
                    return Err(LedgerError::AccountNotFound { id: tx.account_id });
                }
                let key = tx.id.to_string();
                let previous = Self::write_value::<Transaction>(wtx, &self.transactions, &key)?;
                if let Some(old) = previous {
                    wtx.remove(&self.by_account, index_key(&old));
                }
                wtx.insert(&self.by_account, index_key(&tx), key.as_bytes());
                wtx.insert(&self.transactions, key, encode(&tx)?);
            }
            LedgerWrite::DeleteTransaction(id) => {
                let key = id.to_string();
                let old: Transaction = Self::write_value(wtx, &self.transactions, &key)?
                    .ok_or(LedgerError::TransactionNotFound { id })?;
                wtx.remove(&self.by_account, index_key(&old));
                wtx.remove(&self.transactions, key);
            }
            LedgerWrite::PutInterestRate(rate) => {
                wtx.insert(&self.rates, rate.month.to_string(), encode(&rate)?);
            }
            LedgerWrite::PutCheckpoint(checkpoint) => {
                let account_key = checkpoint.account_id.to_string();
                if Self::write_value::<Account>(wtx, &self.accounts, &account_key)?.is_none() {
                    return Err(LedgerError::AccountNotFound { id: checkpoint.account_id });
                }
                wtx.insert(
                    &self.checkpoints,
                    checkpoint_key(checkpoint.account_id, checkpoint.month),
                    encode(&checkpoint)?,
                );
            }
        }
        Ok(())
    }
}

impl LedgerStore for DiskLedgerStore {
    fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let rtx = self.keyspace.read_tx();
        self.read_value(&rtx, &self.accounts, &id.to_string())
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let rtx = self.keyspace.read_tx();
        let mut accounts: Vec<Account> = self.scan_values(&rtx, &self.accounts, "")?;
        accounts.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(accounts)
    }

    fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let rtx = self.keyspace.read_tx();
        self.read_value(&rtx, &self.transactions, &id.to_string())
    }

    fn list_transactions(
        &self,
        account_id: AccountId,
        range: TimeRange,
    ) -> Result<Vec<Transaction>> {
        let rtx = self.keyspace.read_tx();
        let prefix = account_prefix(account_id);
        let start = match range.start {
            Some(start) => format!("{prefix}{}", format_timestamp(&start)),
            None => prefix.clone(),
        };
        let end = range.end.map(|end| format!("{prefix}{}", format_timestamp(&end)));

        let mut found = Vec::new();
        for item in rtx.range(&self.by_account, start..) {
            let (key, tx_id) = item.map_err(LedgerError::storage)?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            if let Some(end) = &end {
                if &key[..] >= end.as_bytes() {
                    break;
                }
            }
            let tx_key = String::from_utf8_lossy(&tx_id).into_owned();
            match self.read_value(&rtx, &self.transactions, &tx_key)? {
                Some(tx) => found.push(tx),
                None => {
                    return Err(LedgerError::Storage {
                        message: format!("index entry without transaction: {tx_key}"),
                    })
                }
            }
        }
        debug!(account = %account_id, count = found.len(), "listed transactions");
        Ok(found)
    }

    fn get_interest_rate(&self, month: MonthKey) -> Result<Option<InterestRate>> {
        let rtx = self.keyspace.read_tx();
        self.read_value(&rtx, &self.rates, &month.to_string())
    }

    fn list_interest_rates(&self) -> Result<Vec<InterestRate>> {
        let rtx = self.keyspace.read_tx();
        self.scan_values(&rtx, &self.rates, "")
    }

    fn get_checkpoint(
        &self,
        account_id: AccountId,
        month: MonthKey,
    ) -> Result<Option<MonthlyBalance>> {
        let rtx = self.keyspace.read_tx();
        self.read_value(&rtx, &self.checkpoints, &checkpoint_key(account_id, month))
    }

    fn list_checkpoints(&self, account_id: AccountId) -> Result<Vec<MonthlyBalance>> {
        let rtx = self.keyspace.read_tx();
        self.scan_values(&rtx, &self.checkpoints, &account_prefix(account_id))
    }

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        let writes = batch.len();
        let mut wtx = self.keyspace.write_tx();
        for write in batch.into_writes() {
            if let Err(e) = self.apply(&mut wtx, write) {
                // dropping the transaction discards its writes
                debug!(error = %e, "disk batch abandoned");
                return Err(e);
            }
        }
        wtx.commit().map_err(LedgerError::storage)?;
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(LedgerError::storage)?;
        debug!(writes, "disk batch committed");
        Ok(())
    }
}
