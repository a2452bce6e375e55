use std::cmp::Ordering;
use std::fmt;

use alloy::primitives::U256;
use chrono::{DateTime, Utc};

use crate::error::ValueError;

/// Largest scale we accept; 10^36 still leaves headroom inside 256 bits
pub const MAX_SCALE: u32 = 36;

/// Unsigned fixed-point quantity: `mantissa / 10^scale`.
///
/// The mantissa is what the contract stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedPoint {
    mantissa: U256,
    scale: u32,
}

impl FixedPoint {
    pub fn new(mantissa: U256, scale: u32) -> Result<Self, ValueError> {
        if scale > MAX_SCALE {
            return Err(ValueError::ScaleTooLarge(scale));
        }
        Ok(Self { mantissa, scale })
    }

    pub fn zero(scale: u32) -> Result<Self, ValueError> {
        Self::new(U256::ZERO, scale)
    }

    /// Parse a plain decimal literal ("123.456") into `scale` fractional digits.
    ///
    /// Digits past `scale` are truncated, never rounded up. Signs, exponents and
    /// thousands separators are rejected.
    pub fn parse(literal: &str, scale: u32) -> Result<Self, ValueError> {
        if scale > MAX_SCALE {
            return Err(ValueError::ScaleTooLarge(scale));
        }

        let trimmed = literal.trim();
        let invalid = || ValueError::InvalidLiteral(literal.to_string());

        let (whole, fraction) = match trimmed.split_once('.') {
            Some((w, f)) => (w, f),
            None => (trimmed, ""),
        };

        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let kept: String = fraction.chars().take(scale as usize).collect();
        let padding = "0".repeat(scale as usize - kept.len());
        let digits = format!("{}{}{}", whole, kept, padding);
        let digits = digits.trim_start_matches('0');

        let mantissa = if digits.is_empty() {
            U256::ZERO
        } else {
            U256::from_str_radix(digits, 10).map_err(|_| ValueError::Overflow)?
        };

        Ok(Self { mantissa, scale })
    }

    pub fn mantissa(&self) -> U256 {
        self.mantissa
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa.is_zero()
    }

    /// Same quantity expressed with more fractional digits
    pub fn rescale(&self, scale: u32) -> Result<Self, ValueError> {
        if scale < self.scale {
            return Err(ValueError::ScaleTooLarge(self.scale));
        }
        let factor = pow10(scale - self.scale)?;
        let mantissa = self
            .mantissa
            .checked_mul(factor)
            .ok_or(ValueError::Overflow)?;
        Self::new(mantissa, scale)
    }

    /// Mantissas of both operands at their common (larger) scale
    pub fn aligned(&self, other: &FixedPoint) -> Result<(U256, U256, u32), ValueError> {
        let scale = self.scale.max(other.scale);
        let lhs = self.rescale(scale)?;
        let rhs = other.rescale(scale)?;
        Ok((lhs.mantissa, rhs.mantissa, scale))
    }

    /// `|self - other|` at the common scale
    pub fn abs_diff(&self, other: &FixedPoint) -> Result<FixedPoint, ValueError> {
        let (lhs, rhs, scale) = self.aligned(other)?;
        let diff = if lhs >= rhs { lhs - rhs } else { rhs - lhs };
        Self::new(diff, scale)
    }

    pub fn cmp_value(&self, other: &FixedPoint) -> Result<Ordering, ValueError> {
        let (lhs, rhs, _) = self.aligned(other)?;
        Ok(lhs.cmp(&rhs))
    }
}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.mantissa.to_string();
        let scale = self.scale as usize;
        if scale == 0 {
            return write!(f, "{}", digits);
        }
        let padded = if digits.len() <= scale {
            format!("{}{}", "0".repeat(scale + 1 - digits.len()), digits)
        } else {
            digits
        };
        let (whole, fraction) = padded.split_at(padded.len() - scale);
        write!(f, "{}.{}", whole, fraction)
    }
}

/// 10^exp as a U256
pub fn pow10(exp: u32) -> Result<U256, ValueError> {
    if exp > MAX_SCALE {
        return Err(ValueError::ScaleTooLarge(exp));
    }
    let ten = U256::from(10u64);
    Ok((0..exp).fold(U256::from(1u64), |acc, _| acc * ten))
}

/// Off-chain observation produced by a reference source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceValue {
    pub asset: String,
    pub value: FixedPoint,
    pub fetched_at: DateTime<Utc>,
}

impl ReferenceValue {
    pub fn new(asset: impl Into<String>, value: FixedPoint) -> Self {
        Self {
            asset: asset.into(),
            value,
            fetched_at: Utc::now(),
        }
    }
}

/// Snapshot of the contract's stored value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub value: FixedPoint,
    pub read_at: DateTime<Utc>,
}

impl StoredValue {
    pub fn new(value: FixedPoint) -> Self {
        Self {
            value,
            read_at: Utc::now(),
        }
    }
}
