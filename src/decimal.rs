use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

/// fractional digits carried by money and rate values
pub const SCALE: u32 = 2;

/// quantize to two places, ties away from zero
pub fn round_half_up(d: Decimal) -> Decimal {
    let mut rounded = d.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(SCALE);
    if rounded.is_zero() {
        rounded.set_sign_positive(true);
    }
    rounded
}

/// Money type with exactly 2 decimal places
///
/// Every constructor and every arithmetic result is quantized with
/// round-half-up, so values never drift off the cent grid. Raw `Decimal`
/// is used for intermediate full-precision work such as daily interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::from_parts(0, 0, 0, false, SCALE));
    pub const CENT: Money = Money(Decimal::from_parts(1, 0, 0, false, SCALE));

    /// create from decimal
    pub fn from_decimal(d: Decimal) -> Self {
        Money(round_half_up(d))
    }

    /// create from string with exact parsing
    pub fn from_str_exact(s: &str) -> Result<Self, rust_decimal::Error> {
        Ok(Money::from_decimal(Decimal::from_str_exact(s.trim())?))
    }

    /// create from integer amount
    pub fn from_major(amount: i64) -> Self {
        Money::from_decimal(Decimal::from(amount))
    }

    /// create from cents
    pub fn from_minor(cents: i64) -> Self {
        Money(Decimal::new(cents, SCALE))
    }

    /// get underlying decimal
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// strictly greater than zero
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// strictly less than zero
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::ZERO
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::from_str_exact(s)
    }
}

impl From<Decimal> for Money {
    fn from(d: Decimal) -> Self {
        Money::from_decimal(d)
    }
}

impl From<Money> for Decimal {
    fn from(m: Money) -> Self {
        m.0
    }
}

impl From<i32> for Money {
    fn from(i: i32) -> Self {
        Money::from_major(i as i64)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, other: Money) -> Money {
        Money::from_decimal(self.0 + other.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, other: Money) {
        *self = *self + other;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, other: Money) -> Money {
        Money::from_decimal(self.0 - other.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, other: Money) {
        *self = *self - other;
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        if self.0.is_zero() {
            return Money::ZERO;
        }
        Money::from_decimal(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + *m)
    }
}

/// annual interest rate stored as a percentage (15.00 == 15% per year)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Rate(Decimal);

impl Rate {
    pub const ZERO: Rate = Rate(Decimal::from_parts(0, 0, 0, false, SCALE));

    /// create from a percentage, e.g. 12.5 for 12.5%
    pub fn from_percentage(p: Decimal) -> Self {
        Rate(round_half_up(p))
    }

    /// create from whole percent
    pub fn from_whole_percent(p: u32) -> Self {
        Rate::from_percentage(Decimal::from(p))
    }

    pub fn from_str_exact(s: &str) -> Result<Self, rust_decimal::Error> {
        Ok(Rate::from_percentage(Decimal::from_str_exact(s.trim())?))
    }

    /// get as percentage
    pub fn as_percentage(&self) -> Decimal {
        self.0
    }

    /// get as a fraction (0.15 for 15%)
    pub fn as_fraction(&self) -> Decimal {
        self.0 / Decimal::ONE_HUNDRED
    }

    /// per-day fraction for a year of `days_in_year` days
    pub fn daily_fraction(&self, days_in_year: u32) -> Decimal {
        self.as_fraction() / Decimal::from(days_in_year)
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl Default for Rate {
    fn default() -> Self {
        Rate::ZERO
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

impl FromStr for Rate {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rate::from_str_exact(s)
    }
}

impl From<Decimal> for Rate {
    fn from(d: Decimal) -> Self {
        Rate::from_percentage(d)
    }
}

impl From<Rate> for Decimal {
    fn from(r: Rate) -> Self {
        r.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money_precision() {
        let m = Money::from_str_exact("100.123456789").unwrap();
        assert_eq!(m.to_string(), "100.12");

        let whole = Money::from_major(5);
        assert_eq!(whole.to_string(), "5.00");
    }

    #[test]
    fn test_round_half_up_not_bankers() {
        // banker's rounding would give 0.12 and 0.14
        assert_eq!(Money::from_decimal(dec!(0.125)).as_decimal(), dec!(0.13));
        assert_eq!(Money::from_decimal(dec!(0.135)).as_decimal(), dec!(0.14));
        assert_eq!(Money::from_decimal(dec!(-0.125)).as_decimal(), dec!(-0.13));
        assert_eq!(Money::from_decimal(dec!(95.0819)).as_decimal(), dec!(95.08));
    }

    #[test]
    fn test_arithmetic_stays_on_cent_grid() {
        let a = Money::from_str_exact("10.10").unwrap();
        let b = Money::from_str_exact("0.05").unwrap();

        assert_eq!((a + b).to_string(), "10.15");
        assert_eq!((a - b).to_string(), "10.05");
        assert_eq!((-a).to_string(), "-10.10");

        let total: Money = vec![a, b, Money::CENT].into_iter().sum();
        assert_eq!(total, Money::from_minor(1016));
    }

    #[test]
    fn test_sign_checks() {
        assert!(!Money::ZERO.is_positive());
        assert!(!Money::ZERO.is_negative());
        assert!(Money::CENT.is_positive());
        assert!((-Money::CENT).is_negative());
    }

    #[test]
    fn test_serde_as_string() {
        let m = Money::from_str_exact("1234.5").unwrap();
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, "\"1234.50\"");

        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_rate_fractions() {
        let rate = Rate::from_str_exact("12.00").unwrap();
        assert_eq!(rate.as_fraction(), dec!(0.12));
        assert_eq!(rate.daily_fraction(366), dec!(0.12) / dec!(366));
        assert_eq!(rate.to_string(), "12.00%");

        let odd = Rate::from_percentage(dec!(7.255));
        assert_eq!(odd.as_percentage(), dec!(7.26));
    }
}
