use thiserror::Error;
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::types::MonthKey;

/// coarse error taxonomy surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    Computation,
    Storage,
    Conflict,
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("account not found: {id}")]
    AccountNotFound {
        id: Uuid,
    },

    #[error("transaction not found: {id}")]
    TransactionNotFound {
        id: Uuid,
    },

    #[error("invalid input: {message}")]
    InvalidInput {
        message: String,
    },

    #[error("initial balance cannot be negative: {amount}")]
    NegativeInitialBalance {
        amount: Money,
    },

    #[error("interest rate cannot be negative: {rate}")]
    NegativeInterestRate {
        rate: Rate,
    },

    #[error("invalid month '{value}', expected YYYY-MM")]
    InvalidMonth {
        value: String,
    },

    #[error("invalid date: {message}")]
    InvalidDate {
        message: String,
    },

    #[error("transaction date {date} is in the future")]
    FutureDated {
        date: chrono::NaiveDate,
    },

    #[error("month {month} cannot be closed before it has ended (current month {current})")]
    MonthNotClosable {
        month: MonthKey,
        current: MonthKey,
    },

    #[error("no update data provided")]
    EmptyAmendment,

    #[error("interest computation failed for account {account_id} in {month}: {source}")]
    Computation {
        account_id: Uuid,
        month: MonthKey,
        #[source]
        source: Box<LedgerError>,
    },

    #[error("account {account_id} already has a checkpoint for {later}, close {month} first")]
    LaterMonthClosed {
        account_id: Uuid,
        month: MonthKey,
        later: MonthKey,
    },

    #[error("closing for {month} is already running")]
    ClosingInProgress {
        month: MonthKey,
    },

    #[error("storage error: {message}")]
    Storage {
        message: String,
    },
}

impl LedgerError {
    /// classify the error for callers
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::AccountNotFound { .. }
            | LedgerError::TransactionNotFound { .. } => ErrorKind::NotFound,
            LedgerError::InvalidInput { .. }
            | LedgerError::NegativeInitialBalance { .. }
            | LedgerError::NegativeInterestRate { .. }
            | LedgerError::InvalidMonth { .. }
            | LedgerError::InvalidDate { .. }
            | LedgerError::FutureDated { .. }
            | LedgerError::MonthNotClosable { .. }
            | LedgerError::EmptyAmendment => ErrorKind::InvalidInput,
            LedgerError::Computation { .. } => ErrorKind::Computation,
            LedgerError::ClosingInProgress { .. } | LedgerError::LaterMonthClosed { .. } => {
                ErrorKind::Conflict
            }
            LedgerError::Storage { .. } => ErrorKind::Storage,
        }
    }

    /// wrap a failure raised while accruing interest
    pub fn computation(account_id: Uuid, month: MonthKey, source: LedgerError) -> Self {
        match source {
            already @ LedgerError::Computation { .. } => already,
            other => LedgerError::Computation {
                account_id,
                month,
                source: Box::new(other),
            },
        }
    }

    /// storage failure from any backend error
    pub fn storage<E: std::fmt::Display>(err: E) -> Self {
        LedgerError::Storage {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::storage(err)
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let id = Uuid::new_v4();
        assert_eq!(LedgerError::AccountNotFound { id }.kind(), ErrorKind::NotFound);
        assert_eq!(LedgerError::EmptyAmendment.kind(), ErrorKind::InvalidInput);

        let month: MonthKey = "2024-02".parse().unwrap();
        let wrapped = LedgerError::computation(id, month, LedgerError::storage("disk gone"));
        assert_eq!(wrapped.kind(), ErrorKind::Computation);
        assert!(wrapped.to_string().contains("disk gone"));

        // wrapping twice keeps a single layer
        let again = LedgerError::computation(id, month, wrapped);
        match again {
            LedgerError::Computation { source, .. } => {
                assert_eq!(source.kind(), ErrorKind::Storage);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
