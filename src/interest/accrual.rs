use tracing::{debug, warn};

use crate::balance::{BalanceReconstructor, DEFAULT_SCAN_WARN_THRESHOLD};
use crate::decimal::Money;
use crate::errors::{ErrorKind, LedgerError, Result};
use crate::interest::simulation::{simulate_month, MonthlyAccrual};
use crate::store::LedgerStore;
use crate::types::{AccountId, MonthKey, TimeRange};

/// store-backed daily-balance interest engine
///
/// Reads the month's rate, the opening balance and the month's transactions
/// once each, then runs [`simulate_month`]. Nothing is written.
pub struct AccrualEngine<'a, S: LedgerStore + ?Sized> {
    store: &'a S,
    scan_warn_threshold: usize,
}

impl<'a, S: LedgerStore + ?Sized> AccrualEngine<'a, S> {
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

    /// interest and post-interest end balance of `month`
    pub fn accrue(&self, account_id: AccountId, month: MonthKey) -> Result<(Money, Money)> {
        let accrual = self.accrue_month(account_id, month)?;
        Ok((accrual.interest, accrual.end_balance))
    }

    /// full simulation of `month` for one account
    pub fn accrue_month(&self, account_id: AccountId, month: MonthKey) -> Result<MonthlyAccrual> {
        let wrap = |e: LedgerError| match e.kind() {
            ErrorKind::Storage => LedgerError::computation(account_id, month, e),
            _ => e,
        };

        if self.store.get_account(account_id).map_err(wrap)?.is_none() {
            return Err(LedgerError::AccountNotFound { id: account_id });
        }

        let rate = self
            .store
            .get_interest_rate(month)
            .map_err(wrap)?
            .map(|r| r.rate);
        if rate.is_none() {
            warn!(%account_id, %month, "no interest rate set, month accrues no interest");
        }

        let opening = BalanceReconstructor::new(self.store)
            .with_scan_warn_threshold(self.scan_warn_threshold)
            .reconstruct(account_id, month.first_instant())
            .map_err(wrap)?;

        let transactions: Vec<_> = self
            .store
            .list_transactions(account_id, TimeRange::month(month))
            .map_err(wrap)?
            .into_iter()
            .filter(|tx| !opening.covers(tx))
            .collect();

        let mut accrual = simulate_month(month, opening, rate, &transactions);
        if rate.is_none() {
            let end_balance = BalanceReconstructor::new(self.store)
                .with_scan_warn_threshold(self.scan_warn_threshold)
                .balance_at(account_id, month.next().first_instant())
                .map_err(wrap)?;
            accrual.closing_balance_before_interest = end_balance;
            accrual.end_balance = end_balance;
        }
        debug!(
            %account_id,
            %month,
            opening = %accrual.opening_balance,
            interest = %accrual.interest,
            end_balance = %accrual.end_balance,
            transactions = transactions.len(),
            "month accrued"
        );
        Ok(accrual)
    }
}
