use crate::error::{AppError, AppResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Largest amount a single fee or ledger entry may carry (10 digits, 2 decimal places).
pub const MAX_CENTS: i64 = 9_999_999_999;

/// A money amount held in minor units (cents). Negative values only appear
/// in balances, never in fee schedules or ledger entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    pub fn cents(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Parses a decimal such as `"10000"`, `"10000.5"` or `"10000.50"`.
    pub fn parse(text: &str) -> AppResult<Self> {
        let t = text.trim();
        if t.is_empty() {
            return Err(AppError::validation("amount must not be empty"));
        }
        let d = Decimal::from_str(t)
            .map_err(|_| AppError::validation(format!("invalid amount: {}", t)))?;
        Self::from_decimal(d)
    }

    fn from_decimal(d: Decimal) -> AppResult<Self> {
        let d = d.normalize();
        if d.scale() > 2 {
            return Err(AppError::validation(
                "amount must have at most 2 decimal places",
            ));
        }
        let cents = d
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|c| c.to_i64())
            .ok_or_else(|| AppError::validation("amount is out of range"))?;
        if cents.abs() > MAX_CENTS {
            return Err(AppError::validation("amount is out of range"));
        }
        Ok(Money(cents))
    }

    /// Reads an amount that the presentation layer may send either as a
    /// decimal string or as a JSON number.
    pub fn from_json(v: &serde_json::Value) -> AppResult<Self> {
        match v {
            serde_json::Value::String(s) => Self::parse(s),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Self::from_decimal(Decimal::from(i));
                }
                Self::parse(&n.to_string())
            }
            _ => Err(AppError::validation("amount must be a number or string")),
        }
    }

    /// Same as [`Money::from_json`] but additionally requires a value > 0.
    pub fn positive_from_json(v: &serde_json::Value) -> AppResult<Self> {
        let m = Self::from_json(v)?;
        if !m.is_positive() {
            return Err(AppError::validation("amount must be greater than zero"));
        }
        Ok(m)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// Serialized as a decimal string so the front end never sees float rounding.
impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl std::ops::Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |a, b| a + b)
    }
}
