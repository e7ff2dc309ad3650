use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::balance::{BalanceSnapshot, BalanceSource};
use crate::decimal::{Money, Rate};
use crate::state::Transaction;
use crate::types::MonthKey;

/// one simulated day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAccrual {
    pub date: NaiveDate,
    /// balance interest was charged on for this day
    pub balance: Money,
    /// unrounded interest of the day
    pub interest: Decimal,
    /// sum of the day's transactions, effective from the next day
    pub net_transactions: Money,
}

/// result of simulating one month on the daily-balance method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyAccrual {
    pub month: MonthKey,
    pub opening_balance: Money,
    pub opening_source: BalanceSource,
    /// opening balance plus every transaction of the month
    pub closing_balance_before_interest: Money,
    pub interest: Money,
    /// closing balance including the month's own interest
    pub end_balance: Money,
    /// `None` when no rate was set for the month
    pub rate: Option<Rate>,
    pub days_in_month: u32,
    pub days_in_year: u32,
    pub daily: Vec<DailyAccrual>,
}

impl MonthlyAccrual {
    pub fn is_approximate(&self) -> bool {
        matches!(self.opening_source, BalanceSource::Inception { .. })
    }

    /// interest eligible for capitalization
    pub fn is_capitalizable(&self) -> bool {
        self.interest.is_positive()
    }
}

/// simulate `month` day by day
///
/// Each day first accrues `balance * daily_rate` at full precision, then
/// applies that day's transactions so they take effect from the next day.
/// Interest is quantized once at the end. Transactions outside `month` are
/// ignored. A missing rate runs the same walk with no interest.
pub fn simulate_month(
    month: MonthKey,
    opening: BalanceSnapshot,
    rate: Option<Rate>,
    transactions: &[Transaction],
) -> MonthlyAccrual {
    let days_in_year = month.days_in_year();
    let daily_rate = rate.map_or(Decimal::ZERO, |r| r.daily_fraction(days_in_year));

    let mut by_day: BTreeMap<NaiveDate, Money> = BTreeMap::new();
    for tx in transactions.iter().filter(|tx| month.contains(tx.date())) {
        *by_day.entry(tx.date()).or_default() += tx.amount;
    }

    let mut balance = opening.balance;
    let mut total_interest = Decimal::ZERO;
    let mut daily = Vec::with_capacity(month.days_in_month() as usize);

    for date in month.days() {
        let interest = balance.as_decimal() * daily_rate;
        total_interest += interest;

        let net_transactions = by_day.get(&date).copied().unwrap_or(Money::ZERO);
        daily.push(DailyAccrual {
            date,
            balance,
            interest,
            net_transactions,
        });
        balance += net_transactions;
    }

    let interest = Money::from_decimal(total_interest);
    let end_balance = Money::from_decimal(balance.as_decimal() + total_interest);

    MonthlyAccrual {
        month,
        opening_balance: opening.balance,
        opening_source: opening.source,
        closing_balance_before_interest: balance,
        interest,
        end_balance,
        rate,
        days_in_month: month.days_in_month(),
        days_in_year,
        daily,
    }
}
