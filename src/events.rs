use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::types::{AccountId, MonthKey, TransactionId};

/// all events that can be emitted by the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerEvent {
    // account events
    AccountOpened {
        account_id: AccountId,
        name: String,
        initial_balance: Money,
    },
    AccountRenamed {
        account_id: AccountId,
        name: String,
    },
    AccountDeleted {
        account_id: AccountId,
    },

    // transaction events
    TransactionRecorded {
        account_id: AccountId,
        transaction_id: TransactionId,
        amount: Money,
        timestamp: NaiveDateTime,
    },
    TransactionAmended {
        account_id: AccountId,
        transaction_id: TransactionId,
        delta: Money,
    },
    TransactionDeleted {
        account_id: AccountId,
        transaction_id: TransactionId,
        amount: Money,
    },

    // rate events
    InterestRateSet {
        month: MonthKey,
        rate: Rate,
    },

    // closing events
    CheckpointWritten {
        account_id: AccountId,
        month: MonthKey,
        end_balance: Money,
        interest_accrued: Money,
    },
    InterestCapitalized {
        account_id: AccountId,
        month: MonthKey,
        transaction_id: TransactionId,
        amount: Money,
    },
    AccountClosingFailed {
        account_id: AccountId,
        month: MonthKey,
        reason: String,
    },
    MonthClosed {
        month: MonthKey,
        processed: usize,
        capitalized: usize,
        failed: usize,
        cancelled: bool,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<LedgerEvent>,
}

impl EventStore {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
        }
    }

    pub fn emit(&mut self, event: LedgerEvent) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }
}
