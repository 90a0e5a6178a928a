use std::fmt;
use std::ops::{Add, AddAssign, Sub};

use serde::{Deserialize, Serialize};

/// Fixed-point monetary amount, stored as millionths of a dollar (six decimal
/// places) so arithmetic never drifts through float rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_micros(micros: i64) -> Self {
        Money(micros)
    }

    pub fn from_dollars(dollars: f64) -> Self {
        Money((dollars * 1_000_000.0).round() as i64)
    }

    pub fn micros(self) -> i64 {
        self.0
    }

    pub fn as_dollars(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn from_tokens(tokens: u64, price_per_million: f64) -> Self {
        Money(((tokens as f64) * price_per_million).round() as i64)
    }

    pub fn ratio_of(self, other: Money) -> f64 {
        if other.0 == 0 {
            return 0.0;
        }
        self.0 as f64 / other.0 as f64
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.6}", self.as_dollars())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::ZERO
    }
}
