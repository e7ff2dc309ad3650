use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::types::{timestamp_format, truncate_to_seconds, AccountId, MonthKey, TransactionId};

/// account with its live balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    /// sum of every transaction ever applied, maintained by deltas
    pub balance: Money,
}

impl Account {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            balance: Money::ZERO,
        }
    }
}

/// origin of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// user-entered credit or debit
    Regular,
    /// balance supplied when the account was opened
    OpeningBalance,
    /// interest credited by the closing run for `month`
    InterestCapitalization { month: MonthKey },
}

/// signed ledger entry; positive credits, negative debits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub amount: Money,
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    pub comment: Option<String>,
    pub kind: TransactionKind,
}

impl Transaction {
    pub fn new(
        account_id: AccountId,
        amount: Money,
        timestamp: NaiveDateTime,
        comment: Option<String>,
        kind: TransactionKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            amount,
            timestamp: truncate_to_seconds(timestamp),
            comment,
            kind,
        }
    }

    /// regular user transaction
    pub fn regular(account_id: AccountId, amount: Money, timestamp: NaiveDateTime) -> Self {
        Self::new(account_id, amount, timestamp, None, TransactionKind::Regular)
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    /// month this entry capitalizes, if it is a capitalization entry
    pub fn capitalized_month(&self) -> Option<MonthKey> {
        match self.kind {
            TransactionKind::InterestCapitalization { month } => Some(month),
            _ => None,
        }
    }
}

/// global per-month annual rate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InterestRate {
    pub month: MonthKey,
    pub rate: Rate,
}

/// closed month checkpoint for one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyBalance {
    pub account_id: AccountId,
    pub month: MonthKey,
    /// closing balance including this month's interest
    pub end_balance: Money,
    pub interest_accrued: Money,
    /// capitalization entry already booked for this month
    #[serde(default)]
    pub capitalization: Option<TransactionId>,
}

impl MonthlyBalance {
    pub fn is_capitalized(&self) -> bool {
        self.capitalization.is_some()
    }
}
