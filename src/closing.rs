use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::{EventStore, LedgerEvent};
use crate::interest::{AccrualEngine, MonthlyAccrual};
use crate::locks::{with_account_lock, AccountLocks, CancellationToken, ClosingGuard};
use crate::state::{MonthlyBalance, Transaction, TransactionKind};
use crate::store::{LedgerStore, WriteBatch};
use crate::types::{AccountId, MonthKey, TransactionId};

/// counts reported by a closing run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosingSummary {
    pub month: MonthKey,
    pub processed: usize,
    pub capitalized: usize,
    pub failed: usize,
    /// stopped early by the cancellation token
    pub cancelled: bool,
}

impl ClosingSummary {
    fn new(month: MonthKey) -> Self {
        Self {
            month,
            processed: 0,
            capitalized: 0,
            failed: 0,
            cancelled: false,
        }
    }
}

/// what closing one account produced
#[derive(Debug, Clone, PartialEq)]
pub struct AccountClosing {
    pub accrual: MonthlyAccrual,
    pub checkpoint: MonthlyBalance,
    /// capitalization entry booked by this run
    pub credited: Option<TransactionId>,
}

/// monthly closing orchestrator
///
/// Every account is closed independently: accrue, write the checkpoint,
/// capitalize strictly positive interest once. Writes of one account are
/// committed as one batch, so a failing account leaves nothing behind and
/// never affects the others.
pub struct MonthlyClosing<'a, S: LedgerStore + ?Sized> {
    store: &'a S,
    config: &'a LedgerConfig,
    locks: &'a AccountLocks,
    guard: &'a ClosingGuard,
    cancellation: CancellationToken,
    events: EventStore,
}

impl<'a, S: LedgerStore + ?Sized> MonthlyClosing<'a, S> {
    pub fn new(
        store: &'a S,
        config: &'a LedgerConfig,
        locks: &'a AccountLocks,
        guard: &'a ClosingGuard,
    ) -> Self {
        Self {
            store,
            config,
            locks,
            guard,
            cancellation: CancellationToken::new(),
            events: EventStore::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn take_events(&mut self) -> Vec<LedgerEvent> {
        self.events.take_events()
    }

    /// close `month` for every account
    pub fn close_month(
        &mut self,
        month: MonthKey,
        time_provider: &SafeTimeProvider,
    ) -> Result<ClosingSummary> {
        let current = MonthKey::from_date(time_provider.now().date_naive());
        if month >= current {
            return Err(LedgerError::MonthNotClosable { month, current });
        }

        let _permit = self.guard.acquire(month)?;
        let account_ids = self.store.list_account_ids()?;
        info!(%month, accounts = account_ids.len(), "closing month");

        let mut summary = ClosingSummary::new(month);
        for account_id in account_ids {
            if self.cancellation.is_cancelled() {
                warn!(%month, processed = summary.processed, "closing cancelled");
                summary.cancelled = true;
                break;
            }

            match self.close_account(account_id, month) {
                Ok(closing) => {
                    summary.processed += 1;
                    self.events.emit(LedgerEvent::CheckpointWritten {
                        account_id,
                        month,
                        end_balance: closing.checkpoint.end_balance,
                        interest_accrued: closing.checkpoint.interest_accrued,
                    });
                    if let Some(transaction_id) = closing.credited {
                        summary.capitalized += 1;
                        self.events.emit(LedgerEvent::InterestCapitalized {
                            account_id,
                            month,
                            transaction_id,
                            amount: closing.accrual.interest,
                        });
                    }
                }
                Err(e) => {
                    error!(%account_id, %month, error = %e, "closing account failed");
                    summary.failed += 1;
                    self.events.emit(LedgerEvent::AccountClosingFailed {
                        account_id,
                        month,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            %month,
            processed = summary.processed,
            capitalized = summary.capitalized,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "month closed"
        );
        self.events.emit(LedgerEvent::MonthClosed {
            month,
            processed: summary.processed,
            capitalized: summary.capitalized,
            failed: summary.failed,
            cancelled: summary.cancelled,
        });
        Ok(summary)
    }

    /// close one account under its lock
    pub fn close_account(&self, account_id: AccountId, month: MonthKey) -> Result<AccountClosing> {
        let handle = self.locks.handle(account_id)?;
        with_account_lock(&handle, || self.close_account_locked(account_id, month))
    }

    fn close_account_locked(
        &self,
        account_id: AccountId,
        month: MonthKey,
    ) -> Result<AccountClosing> {
        // a first close of `month` would date its credit inside an already closed month
        let existing = self.store.get_checkpoint(account_id, month)?;
        let later = month.next();
        if existing.is_none() && self.store.get_checkpoint(account_id, later)?.is_some() {
            return Err(LedgerError::LaterMonthClosed {
                account_id,
                month,
                later,
            });
        }

        let accrual = AccrualEngine::new(self.store)
            .with_scan_warn_threshold(self.config.fallback_scan_warn_threshold)
            .accrue_month(account_id, month)?;

        let mut capitalization = existing.as_ref().and_then(|c| c.capitalization);
        if let Some(previous) = existing.as_ref().filter(|c| c.is_capitalized()) {
            if previous.interest_accrued != accrual.interest {
                warn!(
                    %account_id,
                    %month,
                    capitalized = %previous.interest_accrued,
                    recomputed = %accrual.interest,
                    "interest changed after capitalization, live balance keeps the booked amount"
                );
            }
        }

        let mut batch = WriteBatch::new();
        let mut credited = None;
        let eligible = accrual.is_capitalizable() && self.config.capitalize_interest;
        if capitalization.is_none() && eligible {
            let credit = self.capitalization_entry(account_id, month, accrual.interest);
            credited = Some(credit.id);
            capitalization = Some(credit.id);
            batch
                .put_transaction(credit)
                .adjust_balance(account_id, accrual.interest);
        }

        let checkpoint = MonthlyBalance {
            account_id,
            month,
            end_balance: accrual.end_balance,
            interest_accrued: accrual.interest,
            capitalization,
        };
        batch.put_checkpoint(checkpoint.clone());
        self.store.commit(batch)?;

        if accrual.is_approximate() {
            warn!(%account_id, %month, "checkpoint written from an approximate opening balance");
        }
        info!(
            %account_id,
            %month,
            end_balance = %checkpoint.end_balance,
            interest = %checkpoint.interest_accrued,
            capitalized = credited.is_some(),
            "checkpoint written"
        );

        Ok(AccountClosing {
            accrual,
            checkpoint,
            credited,
        })
    }

    fn capitalization_entry(
        &self,
        account_id: AccountId,
        month: MonthKey,
        interest: Money,
    ) -> Transaction {
        Transaction::new(
            account_id,
            interest,
            month.next().first_instant(),
            Some(self.config.capitalization_comment_for(month)),
            TransactionKind::InterestCapitalization { month },
        )
    }
}
