use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::state::Transaction;
use crate::store::LedgerStore;
use crate::types::{AccountId, MonthKey, TimeRange};

/// default size above which an inception scan logs a cost warning
pub const DEFAULT_SCAN_WARN_THRESHOLD: usize = 10_000;

/// where a reconstructed balance was anchored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceSource {
    /// end balance of the checkpoint for `month`
    Checkpoint { month: MonthKey },
    /// sum of every transaction since the account was opened
    Inception { scanned: usize },
}

/// balance in effect immediately before an instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub balance: Money,
    pub source: BalanceSource,
}

impl BalanceSnapshot {
    /// true when no checkpoint anchored the sum
    pub fn is_approximate(&self) -> bool {
        matches!(self.source, BalanceSource::Inception { .. })
    }

    /// month whose checkpoint anchored the balance
    pub fn checkpoint_month(&self) -> Option<MonthKey> {
        match self.source {
            BalanceSource::Checkpoint { month } => Some(month),
            BalanceSource::Inception { .. } => None,
        }
    }

    /// whether `tx` is already contained in the anchoring checkpoint
    ///
    /// The capitalization entry for month M is dated at the start of M+1
    /// while checkpoint M already holds that interest.
    pub fn covers(&self, tx: &Transaction) -> bool {
        match (self.checkpoint_month(), tx.capitalized_month()) {
            (Some(anchor), Some(capitalized)) => anchor == capitalized,
            _ => false,
        }
    }
}

/// rebuilds balances from the checkpoint chain plus transaction deltas
pub struct BalanceReconstructor<'a, S: LedgerStore + ?Sized> {
    store: &'a S,
    scan_warn_threshold: usize,
}

impl<'a, S: LedgerStore + ?Sized> BalanceReconstructor<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            scan_warn_threshold: DEFAULT_SCAN_WARN_THRESHOLD,
        }
    }

    pub fn with_scan_warn_threshold(mut self, threshold: usize) -> Self {
        self.scan_warn_threshold = threshold;
        self
    }

    /// balance immediately before `instant`
    pub fn balance_at(&self, account_id: AccountId, instant: NaiveDateTime) -> Result<Money> {
        Ok(self.reconstruct(account_id, instant)?.balance)
    }

    /// balance immediately before `instant` together with its anchor
    pub fn reconstruct(
        &self,
        account_id: AccountId,
        instant: NaiveDateTime,
    ) -> Result<BalanceSnapshot> {
        if self.store.get_account(account_id)?.is_none() {
            return Err(LedgerError::AccountNotFound { id: account_id });
        }

        let month = MonthKey::from_date(instant.date());
        let checkpoint_month = month.previous();

        match self.store.get_checkpoint(account_id, checkpoint_month)? {
            Some(checkpoint) => {
                let window = TimeRange::between(month.first_instant(), instant);
                let snapshot = BalanceSnapshot {
                    balance: checkpoint.end_balance,
                    source: BalanceSource::Checkpoint {
                        month: checkpoint_month,
                    },
                };
                let delta: Money = self
                    .store
                    .list_transactions(account_id, window)?
                    .iter()
                    .filter(|tx| !snapshot.covers(tx))
                    .map(|tx| tx.amount)
                    .sum();

                let balance = checkpoint.end_balance + delta;
                debug!(
                    %account_id,
                    %instant,
                    checkpoint = %checkpoint_month,
                    base = %checkpoint.end_balance,
                    %delta,
                    "balance reconstructed from checkpoint"
                );
                Ok(BalanceSnapshot { balance, ..snapshot })
            }
            None => {
                let transactions = self
                    .store
                    .list_transactions(account_id, TimeRange::before(instant))?;
                let scanned = transactions.len();
                let balance: Money = transactions.iter().map(|tx| tx.amount).sum();

                warn!(
                    %account_id,
                    %instant,
                    missing = %checkpoint_month,
                    scanned,
                    "no checkpoint for previous month, balance summed from inception is approximate"
                );
                if scanned > self.scan_warn_threshold {
                    warn!(
                        %account_id,
                        scanned,
                        threshold = self.scan_warn_threshold,
                        "inception scan exceeded threshold, close earlier months"
                    );
                }

                Ok(BalanceSnapshot {
                    balance,
                    source: BalanceSource::Inception { scanned },
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Account, MonthlyBalance, TransactionKind};
    use crate::store::{MemoryLedgerStore, WriteBatch};
    use crate::types::parse_timestamp;
    use rust_decimal_macros::dec;

    fn month(s: &str) -> MonthKey {
        s.parse().unwrap()
    }

    fn ts(s: &str) -> NaiveDateTime {
        parse_timestamp(s).unwrap()
    }

    fn seed(store: &MemoryLedgerStore, entries: &[(&str, Money)]) -> AccountId {
        let account = Account::new("savings");
        let id = account.id;
        let mut batch = WriteBatch::new();
        batch.put_account(account);
        for (at, amount) in entries {
            batch
                .put_transaction(Transaction::regular(id, *amount, ts(at)))
                .adjust_balance(id, *amount);
        }
        store.commit(batch).unwrap();
        id
    }

    #[test]
    fn test_unknown_account() {
        let store = MemoryLedgerStore::new();
        let reconstructor = BalanceReconstructor::new(&store);
        let err = reconstructor
            .balance_at(uuid::Uuid::new_v4(), ts("2024-03-01 00:00:00"))
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound { .. }));
    }

    #[test]
    fn test_inception_fallback_is_approximate() {
        let store = MemoryLedgerStore::new();
        let id = seed(
            &store,
            &[
                ("2024-01-05 10:00:00", Money::from_major(1_000)),
                ("2024-02-10 09:30:00", Money::from(dec!(-250.50))),
                ("2024-03-01 00:00:00", Money::from_major(99)),
            ],
        );

        let snapshot = BalanceReconstructor::new(&store)
            .reconstruct(id, ts("2024-03-01 00:00:00"))
            .unwrap();

        // the entry at the instant itself is excluded
        assert_eq!(snapshot.balance, Money::from(dec!(749.50)));
        assert!(snapshot.is_approximate());
        assert_eq!(snapshot.source, BalanceSource::Inception { scanned: 2 });
    }

    #[test]
    fn test_checkpoint_anchors_window() {
        let store = MemoryLedgerStore::new();
        let id = seed(
            &store,
            &[
                ("2024-01-05 10:00:00", Money::from_major(1_000)),
                ("2024-02-03 12:00:00", Money::from_major(40)),
                ("2024-02-20 12:00:00", Money::from_major(60)),
            ],
        );
        store
            .upsert_checkpoint(MonthlyBalance {
                account_id: id,
                month: month("2024-01"),
                end_balance: Money::from(dec!(1010.00)),
                interest_accrued: Money::from(dec!(10.00)),
                capitalization: None,
            })
            .unwrap();

        let reconstructor = BalanceReconstructor::new(&store);
        let snapshot = reconstructor.reconstruct(id, ts("2024-02-10 00:00:00")).unwrap();
        assert_eq!(snapshot.balance, Money::from(dec!(1050.00)));
        assert_eq!(snapshot.checkpoint_month(), Some(month("2024-01")));
        assert!(!snapshot.is_approximate());

        assert_eq!(
            reconstructor.balance_at(id, ts("2024-02-01 00:00:00")).unwrap(),
            Money::from(dec!(1010.00))
        );
    }

    #[test]
    fn test_capitalization_of_anchor_month_not_counted_twice() {
        let store = MemoryLedgerStore::new();
        let id = seed(&store, &[("2024-01-05 10:00:00", Money::from_major(1_000))]);

        let interest = Money::from(dec!(5.25));
        let capitalization = Transaction::new(
            id,
            interest,
            month("2024-02").first_instant(),
            None,
            TransactionKind::InterestCapitalization { month: month("2024-01") },
        );
        let mut batch = WriteBatch::new();
        batch
            .put_checkpoint(MonthlyBalance {
                account_id: id,
                month: month("2024-01"),
                end_balance: Money::from(dec!(1005.25)),
                interest_accrued: interest,
                capitalization: Some(capitalization.id),
            })
            .put_transaction(capitalization)
            .adjust_balance(id, interest);
        store.commit(batch).unwrap();

        let reconstructor = BalanceReconstructor::new(&store);
        let balance = reconstructor.balance_at(id, ts("2024-02-15 00:00:00")).unwrap();
        assert_eq!(balance, Money::from(dec!(1005.25)));

        let account = store.get_account(id).unwrap().unwrap();
        assert_eq!(account.balance, balance);
    }
}
