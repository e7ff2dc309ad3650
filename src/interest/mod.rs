pub mod accrual;
pub mod simulation;

pub use accrual::AccrualEngine;
pub use simulation::{simulate_month, DailyAccrual, MonthlyAccrual};
