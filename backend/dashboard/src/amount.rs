//! Exact conversion between 18-decimal base units and decimal strings.
//!
//! Amounts travel to and from the contract as `uint256` base units. Display
//! follows the wallet convention: trailing zeros are trimmed but at least one
//! fractional digit is kept (`1.5`, `1000.0`, `0.0`).

use std::fmt;
use std::iter::Sum;
use std::ops::Add;
use std::str::FromStr;

use alloy_primitives::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::DashboardError;

pub const DECIMALS: usize = 18;

const ONE_ETHER: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(U256);

impl Amount {
    pub const ZERO: Self = Self(U256::ZERO);

    pub fn from_base_units(units: U256) -> Self {
        Self(units)
    }

    pub fn base_units(self) -> U256 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / ONE_ETHER;
        let frac = self.0 % ONE_ETHER;
        let padded = format!("{:0>width$}", frac.to_string(), width = DECIMALS);
        let trimmed = padded.trim_end_matches('0');
        let frac = if trimmed.is_empty() { "0" } else { trimmed };
        write!(f, "{whole}.{frac}")
    }
}

impl FromStr for Amount {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DashboardError::InvalidAmount(s.to_string());
        let s_trim = s.trim();

        let (whole, frac) = match s_trim.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s_trim, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }
        if frac.len() > DECIMALS {
            return Err(invalid());
        }

        let whole: U256 = if whole.is_empty() {
            U256::ZERO
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let frac: U256 = if frac.is_empty() {
            U256::ZERO
        } else {
            format!("{frac:0<width$}", width = DECIMALS)
                .parse()
                .map_err(|_| invalid())?
        };

        whole
            .checked_mul(ONE_ETHER)
            .and_then(|w| w.checked_add(frac))
            .map(Self)
            .ok_or_else(invalid)
    }
}

impl Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Share of `budget` consumed by `spent`, rounded to one decimal place.
pub fn progress_percentage(spent: Amount, budget: Amount) -> String {
    if budget.is_zero() {
        return "0.0%".to_string();
    }
    // tenths of a percent, rounded half up
    let budget = budget.base_units();
    let numerator = spent
        .base_units()
        .saturating_mul(U256::from(2000u64))
        .saturating_add(budget);
    let tenths = numerator / budget.saturating_mul(U256::from(2u64));
    let ten = U256::from(10u64);
    format!("{}.{}%", tenths / ten, tenths % ten)
}
