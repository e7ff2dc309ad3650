pub mod balance;
pub mod closing;
pub mod config;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod interest;
pub mod ledger;
pub mod locks;
pub mod logging;
pub mod state;
pub mod store;
pub mod types;

// re-export key types
pub use balance::{BalanceReconstructor, BalanceSnapshot, BalanceSource};
pub use closing::{AccountClosing, ClosingSummary, MonthlyClosing};
pub use config::LedgerConfig;
pub use decimal::{Money, Rate};
pub use errors::{ErrorKind, LedgerError, Result};
pub use events::{EventStore, LedgerEvent};
pub use interest::{simulate_month, AccrualEngine, DailyAccrual, MonthlyAccrual};
pub use ledger::{
    AccountOverview, CurrentPeriod, LedgerService, MonthOverview, TransactionAmendment,
};
pub use locks::{AccountLocks, CancellationToken, ClosingGuard};
pub use state::{Account, InterestRate, MonthlyBalance, Transaction, TransactionKind};
pub use store::{DiskLedgerStore, LedgerStore, LedgerWrite, MemoryLedgerStore, WriteBatch};
pub use types::{AccountId, MonthKey, TimeRange, TransactionId};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
