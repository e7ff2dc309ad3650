use std::sync::Mutex;

use chrono::{NaiveDate, NaiveDateTime};
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::balance::BalanceReconstructor;
use crate::closing::{ClosingSummary, MonthlyClosing};
use crate::config::LedgerConfig;
use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::events::{EventStore, LedgerEvent};
use crate::interest::{AccrualEngine, MonthlyAccrual};
use crate::locks::{with_account_lock, AccountLocks, CancellationToken, ClosingGuard};
use crate::state::{Account, InterestRate, Transaction, TransactionKind};
use crate::store::{LedgerStore, WriteBatch};
use crate::types::{AccountId, MonthKey, TimeRange, TransactionId};

/// correction applied to an existing transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionAmendment {
    pub amount: Option<Money>,
    /// new calendar date; the time of day is kept
    pub date: Option<NaiveDate>,
    pub comment: Option<String>,
}

impl TransactionAmendment {
    pub fn is_empty(&self) -> bool {
        self.amount.is_none() && self.date.is_none() && self.comment.is_none()
    }
}

/// a closed month as shown in the overview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthOverview {
    pub month: MonthKey,
    pub end_balance: Option<Money>,
    pub interest_accrued: Option<Money>,
    pub rate: Option<Rate>,
}

/// projection of the running month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentPeriod {
    pub month: MonthKey,
    pub rate: Option<Rate>,
    pub start_balance: Money,
    pub current_balance: Money,
    pub projected_interest: Money,
    pub projected_eom_balance: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountOverview {
    pub account: Account,
    /// the three months before the current one, oldest first
    pub history: Vec<MonthOverview>,
    pub current: CurrentPeriod,
}

/// account, transaction and rate operations on top of a ledger store
pub struct LedgerService<S: LedgerStore> {
    store: S,
    config: LedgerConfig,
    locks: AccountLocks,
    closings: ClosingGuard,
    events: Mutex<EventStore>,
}

impl<S: LedgerStore> LedgerService<S> {
    pub fn new(store: S, config: LedgerConfig) -> Self {
        Self {
            store,
            config,
            locks: AccountLocks::new(),
            closings: ClosingGuard::new(),
            events: Mutex::new(EventStore::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// drain events emitted so far
    pub fn take_events(&self) -> Vec<LedgerEvent> {
        self.events
            .lock()
            .map(|mut events| events.take_events())
            .unwrap_or_default()
    }

    fn emit(&self, event: LedgerEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.emit(event);
        }
    }

    fn emit_all(&self, batch: Vec<LedgerEvent>) {
        if let Ok(mut events) = self.events.lock() {
            for event in batch {
                events.emit(event);
            }
        }
    }

    fn locked<T>(&self, account_id: AccountId, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let handle = self.locks.handle(account_id)?;
        with_account_lock(&handle, f)
    }

    // accounts

    /// open an account, booking a non-zero initial balance as a transaction
    pub fn create_account(
        &self,
        name: &str,
        initial_balance: Money,
        initial_rate: Option<Rate>,
        time_provider: &SafeTimeProvider,
    ) -> Result<Account> {
        let name = validate_name(name)?;
        if initial_balance.is_negative() {
            return Err(LedgerError::NegativeInitialBalance {
                amount: initial_balance,
            });
        }
        if let Some(rate) = initial_rate.filter(Rate::is_negative) {
            return Err(LedgerError::NegativeInterestRate { rate });
        }

        let now = time_provider.now().naive_utc();
        let account = Account::new(name);
        let account_id = account.id;

        let mut batch = WriteBatch::new();
        batch.put_account(account);
        if !initial_balance.is_zero() {
            let opening = Transaction::new(
                account_id,
                initial_balance,
                now,
                Some(self.config.opening_balance_comment.clone()),
                TransactionKind::OpeningBalance,
            );
            batch
                .put_transaction(opening)
                .adjust_balance(account_id, initial_balance);
        }
        let rate = initial_rate.map(|rate| InterestRate {
            month: MonthKey::from_date(now.date()),
            rate,
        });
        if let Some(rate) = rate {
            batch.put_interest_rate(rate);
        }
        self.store.commit(batch)?;

        let account = self.get_account(account_id)?;
        info!(%account_id, name = %account.name, balance = %account.balance, "account created");
        self.emit(LedgerEvent::AccountOpened {
            account_id,
            name: account.name.clone(),
            initial_balance,
        });
        if let Some(InterestRate { month, rate }) = rate {
            self.emit(LedgerEvent::InterestRateSet { month, rate });
        }
        Ok(account)
    }

    pub fn rename_account(&self, account_id: AccountId, name: &str) -> Result<Account> {
        let name = validate_name(name)?;
        self.locked(account_id, || {
            let mut account = self.get_account(account_id)?;
            account.name = name.to_string();
            let mut batch = WriteBatch::new();
            batch.put_account(account.clone());
            self.store.commit(batch)?;
            info!(%account_id, %name, "account renamed");
            self.emit(LedgerEvent::AccountRenamed {
                account_id,
                name: account.name.clone(),
            });
            Ok(account)
        })
    }

    pub fn get_account(&self, account_id: AccountId) -> Result<Account> {
        self.store
            .get_account(account_id)?
            .ok_or(LedgerError::AccountNotFound { id: account_id })
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        self.store.list_accounts()
    }

    /// remove an account with its transactions and checkpoints
    pub fn delete_account(&self, account_id: AccountId) -> Result<()> {
        self.locked(account_id, || {
            self.get_account(account_id)?;
            let mut batch = WriteBatch::new();
            batch.delete_account(account_id);
            self.store.commit(batch)
        })?;
        self.locks.forget(account_id);
        info!(%account_id, "account deleted");
        self.emit(LedgerEvent::AccountDeleted { account_id });
        Ok(())
    }

    // transactions

    /// record a credit or debit, dated today unless `date` is given
    pub fn record_transaction(
        &self,
        account_id: AccountId,
        amount: Money,
        date: Option<NaiveDate>,
        comment: Option<String>,
        time_provider: &SafeTimeProvider,
    ) -> Result<Transaction> {
        let now = time_provider.now().naive_utc();
        let timestamp = match date {
            Some(date) => {
                reject_future(date, now)?;
                date.and_time(now.time())
            }
            None => now,
        };
        let tx = Transaction::new(
            account_id,
            amount,
            timestamp,
            normalize_comment(comment),
            TransactionKind::Regular,
        );

        self.locked(account_id, || {
            self.get_account(account_id)?;
            let mut batch = WriteBatch::new();
            batch
                .put_transaction(tx.clone())
                .adjust_balance(account_id, amount);
            self.store.commit(batch)
        })?;

        info!(
            %account_id,
            transaction_id = %tx.id,
            %amount,
            timestamp = %tx.timestamp,
            "transaction recorded"
        );
        self.emit(LedgerEvent::TransactionRecorded {
            account_id,
            transaction_id: tx.id,
            amount,
            timestamp: tx.timestamp,
        });
        Ok(tx)
    }

    /// rewrite amount, date or comment; the balance moves by the amount delta
    pub fn amend_transaction(
        &self,
        transaction_id: TransactionId,
        amendment: TransactionAmendment,
        time_provider: &SafeTimeProvider,
    ) -> Result<Transaction> {
        if amendment.is_empty() {
            return Err(LedgerError::EmptyAmendment);
        }
        let now = time_provider.now().naive_utc();
        if let Some(date) = amendment.date {
            reject_future(date, now)?;
        }

        let account_id = self.get_transaction(transaction_id)?.account_id;
        let (updated, delta) = self.locked(account_id, || {
            let current = self.get_transaction(transaction_id)?;
            let mut updated = current.clone();
            if let Some(amount) = amendment.amount {
                updated.amount = amount;
            }
            if let Some(date) = amendment.date {
                updated.timestamp = date.and_time(current.timestamp.time());
            }
            if let Some(comment) = amendment.comment.clone() {
                updated.comment = normalize_comment(Some(comment));
            }

            let delta = updated.amount - current.amount;
            let mut batch = WriteBatch::new();
            batch.put_transaction(updated.clone());
            if !delta.is_zero() {
                batch.adjust_balance(account_id, delta);
            }
            self.store.commit(batch)?;
            Ok((updated, delta))
        })?;

        info!(%account_id, %transaction_id, %delta, "transaction amended");
        self.emit(LedgerEvent::TransactionAmended {
            account_id,
            transaction_id,
            delta,
        });
        Ok(updated)
    }

    /// delete a transaction, reversing its amount on the live balance
    pub fn delete_transaction(&self, transaction_id: TransactionId) -> Result<Transaction> {
        let account_id = self.get_transaction(transaction_id)?.account_id;
        let removed = self.locked(account_id, || {
            let tx = self.get_transaction(transaction_id)?;
            let mut batch = WriteBatch::new();
            batch
                .delete_transaction(transaction_id)
                .adjust_balance(account_id, -tx.amount);
            self.store.commit(batch)?;
            Ok(tx)
        })?;

        info!(%account_id, %transaction_id, amount = %removed.amount, "transaction deleted");
        self.emit(LedgerEvent::TransactionDeleted {
            account_id,
            transaction_id,
            amount: removed.amount,
        });
        Ok(removed)
    }

    pub fn get_transaction(&self, transaction_id: TransactionId) -> Result<Transaction> {
        self.store
            .get_transaction(transaction_id)?
            .ok_or(LedgerError::TransactionNotFound { id: transaction_id })
    }

    /// transactions of an account, newest first
    pub fn list_transactions(
        &self,
        account_id: AccountId,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>> {
        self.get_account(account_id)?;
        let mut transactions = self.store.list_transactions(account_id, TimeRange::all())?;
        transactions.reverse();
        if let Some(limit) = limit.filter(|l| *l > 0) {
            transactions.truncate(limit);
        }
        debug!(%account_id, count = transactions.len(), "listed transactions");
        Ok(transactions)
    }

    // rates

    pub fn set_interest_rate(&self, month: MonthKey, rate: Rate) -> Result<InterestRate> {
        if rate.is_negative() {
            return Err(LedgerError::NegativeInterestRate { rate });
        }
        self.store.upsert_interest_rate(month, rate)?;
        info!(%month, %rate, "interest rate set");
        self.emit(LedgerEvent::InterestRateSet { month, rate });
        Ok(InterestRate { month, rate })
    }

    /// rate of `month`, 0.00 when none was set
    pub fn get_interest_rate(&self, month: MonthKey) -> Result<Rate> {
        Ok(self
            .store
            .get_interest_rate(month)?
            .map_or(Rate::ZERO, |r| r.rate))
    }

    pub fn list_interest_rates(&self) -> Result<Vec<InterestRate>> {
        self.store.list_interest_rates()
    }

    // engine

    pub fn balance_at(&self, account_id: AccountId, instant: NaiveDateTime) -> Result<Money> {
        BalanceReconstructor::new(&self.store)
            .with_scan_warn_threshold(self.config.fallback_scan_warn_threshold)
            .balance_at(account_id, instant)
    }

    pub fn accrue(&self, account_id: AccountId, month: MonthKey) -> Result<(Money, Money)> {
        self.accrue_month(account_id, month)
            .map(|accrual| (accrual.interest, accrual.end_balance))
    }

    pub fn accrue_month(&self, account_id: AccountId, month: MonthKey) -> Result<MonthlyAccrual> {
        AccrualEngine::new(&self.store)
            .with_scan_warn_threshold(self.config.fallback_scan_warn_threshold)
            .accrue_month(account_id, month)
    }

    pub fn close_month(
        &self,
        month: MonthKey,
        time_provider: &SafeTimeProvider,
    ) -> Result<ClosingSummary> {
        self.close_month_with(month, time_provider, CancellationToken::new())
    }

    /// close `month`, stopping between accounts once `token` is cancelled
    pub fn close_month_with(
        &self,
        month: MonthKey,
        time_provider: &SafeTimeProvider,
        token: CancellationToken,
    ) -> Result<ClosingSummary> {
        let mut closing =
            MonthlyClosing::new(&self.store, &self.config, &self.locks, &self.closings)
                .with_cancellation(token);
        let summary = closing.close_month(month, time_provider);
        self.emit_all(closing.take_events());
        summary
    }

    // reporting

    /// live balance, the last three closed months and a projection of the current one
    pub fn account_overview(
        &self,
        account_id: AccountId,
        time_provider: &SafeTimeProvider,
    ) -> Result<AccountOverview> {
        let account = self.get_account(account_id)?;
        let current_month = MonthKey::from_date(time_provider.now().date_naive());

        let mut history = Vec::with_capacity(3);
        for month in current_month.preceding(3) {
            let checkpoint = self.store.get_checkpoint(account_id, month)?;
            let rate = self.store.get_interest_rate(month)?.map(|r| r.rate);
            history.push(MonthOverview {
                month,
                end_balance: checkpoint.as_ref().map(|c| c.end_balance),
                interest_accrued: checkpoint.as_ref().map(|c| c.interest_accrued),
                rate,
            });
        }

        let projection = self.accrue_month(account_id, current_month)?;
        let current = CurrentPeriod {
            month: current_month,
            rate: projection.rate,
            start_balance: projection.opening_balance,
            current_balance: account.balance,
            projected_interest: projection.interest,
            projected_eom_balance: projection.end_balance,
        };

        Ok(AccountOverview {
            account,
            history,
            current,
        })
    }
}

fn validate_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LedgerError::InvalidInput {
            message: "account name cannot be empty".to_string(),
        });
    }
    Ok(name)
}

fn reject_future(date: NaiveDate, now: NaiveDateTime) -> Result<()> {
    if date > now.date() {
        return Err(LedgerError::FutureDated { date });
    }
    Ok(())
}

fn normalize_comment(comment: Option<String>) -> Option<String> {
    comment
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::store::MemoryLedgerStore;
    use chrono::{Duration, TimeZone, Utc};
    use hourglass_rs::TimeSource;
    use rust_decimal_macros::dec;

    fn service() -> LedgerService<MemoryLedgerStore> {
        LedgerService::new(MemoryLedgerStore::new(), LedgerConfig::default())
    }

    fn clock() -> SafeTimeProvider {
        SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(2024, 5, 20, 14, 30, 0).unwrap(),
        ))
    }

    fn date(s: &str) -> NaiveDate {
        crate::types::parse_date(s).unwrap()
    }

    #[test]
    fn test_create_account_books_opening_balance() {
        let ledger = service();
        let time = clock();
        let account = ledger
            .create_account(
                "  Savings ",
                Money::from(dec!(1200.50)),
                Some(Rate::from_whole_percent(4)),
                &time,
            )
            .unwrap();

        assert_eq!(account.name, "Savings");
        assert_eq!(account.balance, Money::from(dec!(1200.50)));

        let transactions = ledger.list_transactions(account.id, None).unwrap();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].kind, TransactionKind::OpeningBalance);
        assert_eq!(transactions[0].comment.as_deref(), Some("opening balance"));

        let may: MonthKey = "2024-05".parse().unwrap();
        assert_eq!(ledger.get_interest_rate(may).unwrap(), Rate::from_whole_percent(4));

        let events = ledger.take_events();
        assert!(matches!(events[0], LedgerEvent::AccountOpened { .. }));
        assert!(matches!(events[1], LedgerEvent::InterestRateSet { .. }));
    }

    #[test]
    fn test_create_account_validation() {
        let ledger = service();
        let time = clock();

        let err = ledger.create_account("   ", Money::ZERO, None, &time).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = ledger
            .create_account("x", Money::from_major(-1), None, &time)
            .unwrap_err();
        assert!(matches!(err, LedgerError::NegativeInitialBalance { .. }));

        let err = ledger
            .create_account("x", Money::ZERO, Some(Rate::from_percentage(dec!(-0.5))), &time)
            .unwrap_err();
        assert!(matches!(err, LedgerError::NegativeInterestRate { .. }));
        assert!(ledger.list_accounts().unwrap().is_empty());

        let empty = ledger.create_account("empty", Money::ZERO, None, &time).unwrap();
        assert!(ledger.list_transactions(empty.id, None).unwrap().is_empty());
    }

    #[test]
    fn test_record_transaction_dates() {
        let ledger = service();
        let time = clock();
        let account = ledger.create_account("a", Money::ZERO, None, &time).unwrap();

        let backdated = ledger
            .record_transaction(
                account.id,
                Money::from_major(50),
                Some(date("2024-05-02")),
                None,
                &time,
            )
            .unwrap();
        let expected = crate::types::parse_timestamp("2024-05-02 14:30:00").unwrap();
        assert_eq!(backdated.timestamp, expected);

        let err = ledger
            .record_transaction(
                account.id,
                Money::from_major(50),
                Some(date("2024-05-21")),
                None,
                &time,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::FutureDated { .. }));

        let err = ledger
            .record_transaction(uuid::Uuid::new_v4(), Money::from_major(1), None, None, &time)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        assert_eq!(ledger.get_account(account.id).unwrap().balance, Money::from_major(50));
    }

    #[test]
    fn test_insert_then_delete_restores_balance() {
        let ledger = service();
        let time = clock();
        let account = ledger.create_account("a", Money::from(dec!(99.99)), None, &time).unwrap();

        let tx = ledger
            .record_transaction(
                account.id,
                Money::from(dec!(500.00)),
                None,
                Some("bonus".into()),
                &time,
            )
            .unwrap();
        assert_eq!(ledger.get_account(account.id).unwrap().balance, Money::from(dec!(599.99)));

        ledger.delete_transaction(tx.id).unwrap();
        assert_eq!(ledger.get_account(account.id).unwrap().balance, Money::from(dec!(99.99)));
        assert!(matches!(
            ledger.delete_transaction(tx.id),
            Err(LedgerError::TransactionNotFound { .. })
        ));
    }

    #[test]
    fn test_amend_transaction() {
        let ledger = service();
        let time = clock();
        let account = ledger.create_account("a", Money::ZERO, None, &time).unwrap();
        let tx = ledger
            .record_transaction(
                account.id,
                Money::from_major(100),
                Some(date("2024-05-10")),
                None,
                &time,
            )
            .unwrap();

        let err = ledger
            .amend_transaction(tx.id, TransactionAmendment::default(), &time)
            .unwrap_err();
        assert!(matches!(err, LedgerError::EmptyAmendment));

        let amended = ledger
            .amend_transaction(
                tx.id,
                TransactionAmendment {
                    amount: Some(Money::from_major(60)),
                    date: Some(date("2024-04-30")),
                    comment: Some("corrected".into()),
                },
                &time,
            )
            .unwrap();
        assert_eq!(amended.amount, Money::from_major(60));
        assert_eq!(amended.timestamp.time(), tx.timestamp.time());
        assert_eq!(amended.date(), date("2024-04-30"));
        assert_eq!(ledger.get_account(account.id).unwrap().balance, Money::from_major(60));

        let listed = ledger.list_transactions(account.id, Some(1)).unwrap();
        assert_eq!(listed[0].comment.as_deref(), Some("corrected"));
    }

    #[test]
    fn test_list_transactions_newest_first() {
        let ledger = service();
        let time = clock();
        let account = ledger.create_account("a", Money::from_major(1), None, &time).unwrap();
        ledger
            .record_transaction(
                account.id,
                Money::from_major(2),
                Some(date("2024-05-01")),
                None,
                &time,
            )
            .unwrap();
        ledger
            .record_transaction(
                account.id,
                Money::from_major(3),
                Some(date("2024-05-15")),
                None,
                &time,
            )
            .unwrap();

        let all = ledger.list_transactions(account.id, None).unwrap();
        let amounts: Vec<_> = all.iter().map(|t| t.amount).collect();
        assert_eq!(amounts, vec![Money::from_major(1), Money::from_major(3), Money::from_major(2)]);
        assert_eq!(ledger.list_transactions(account.id, Some(2)).unwrap().len(), 2);
    }

    #[test]
    fn test_rates() {
        let ledger = service();
        let june: MonthKey = "2024-06".parse().unwrap();

        assert_eq!(ledger.get_interest_rate(june).unwrap(), Rate::ZERO);
        assert!(ledger.set_interest_rate(june, Rate::from_percentage(dec!(-1))).is_err());

        ledger.set_interest_rate(june, Rate::from_percentage(dec!(15.5))).unwrap();
        ledger.set_interest_rate(june, Rate::from_percentage(dec!(14.25))).unwrap();
        assert_eq!(ledger.get_interest_rate(june).unwrap(), Rate::from_percentage(dec!(14.25)));
        assert_eq!(ledger.list_interest_rates().unwrap().len(), 1);
    }

    #[test]
    fn test_rename_and_delete_account() {
        let ledger = service();
        let time = clock();
        let account = ledger.create_account("old", Money::from_major(10), None, &time).unwrap();

        assert!(ledger.rename_account(account.id, " ").is_err());
        assert_eq!(ledger.rename_account(account.id, "new").unwrap().name, "new");

        ledger.delete_account(account.id).unwrap();
        assert_eq!(ledger.get_account(account.id).unwrap_err().kind(), ErrorKind::NotFound);
        assert!(ledger.delete_account(account.id).is_err());
    }

    #[test]
    fn test_account_overview() {
        let ledger = service();
        let time = SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap(),
        ));
        let control = time.test_control().unwrap();
        let account = ledger
            .create_account(
                "a",
                Money::from_major(3_000),
                Some(Rate::from_whole_percent(12)),
                &time,
            )
            .unwrap();

        control.advance(Duration::days(30));
        ledger.close_month("2024-03".parse().unwrap(), &time).unwrap();
        ledger
            .set_interest_rate("2024-04".parse().unwrap(), Rate::from_whole_percent(12))
            .unwrap();

        let overview = ledger.account_overview(account.id, &time).unwrap();
        assert_eq!(overview.history.len(), 3);
        let march = &overview.history[2];
        assert_eq!(march.month.to_string(), "2024-03");
        assert!(march.end_balance.is_some());
        assert_eq!(march.rate, Some(Rate::from_whole_percent(12)));
        assert!(overview.history[0].end_balance.is_none());

        let current = &overview.current;
        assert_eq!(current.month.to_string(), "2024-04");
        assert_eq!(Some(current.start_balance), march.end_balance);
        assert_eq!(current.current_balance, current.start_balance);
        // 30 days on the same balance at 12% / 366
        assert!(current.projected_interest.is_positive());
        assert_eq!(
            current.projected_eom_balance,
            current.start_balance + current.projected_interest
        );
    }
}
