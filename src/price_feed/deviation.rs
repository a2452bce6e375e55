use std::fmt;
use std::str::FromStr;

use alloy::primitives::{U256, U512};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ValueError;
use crate::price_feed::fixed_point::{pow10, FixedPoint, ReferenceValue, StoredValue};

/// Minimum relative deviation (as a fraction, 0.005 = 0.5%) that justifies an update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Threshold(Decimal);

impl Threshold {
    pub fn new(fraction: Decimal) -> Result<Self, ValueError> {
        if fraction <= Decimal::ZERO {
            return Err(ValueError::NonPositiveThreshold(fraction.to_string()));
        }
        Ok(Self(fraction.normalize()))
    }

    pub fn fraction(&self) -> Decimal {
        self.0
    }

    pub fn as_percent(&self) -> Decimal {
        self.0 * Decimal::ONE_HUNDRED
    }

    /// `reference * threshold`, truncated to the reference's scale
    pub fn value_for(&self, reference: &FixedPoint) -> Result<FixedPoint, ValueError> {
        let (numerator, scale) = self.parts();
        let product = reference
            .mantissa()
            .checked_mul(U256::from(numerator))
            .ok_or(ValueError::Overflow)?;
        FixedPoint::new(product / pow10(scale)?, reference.scale())
    }

    fn parts(&self) -> (u128, u32) {
        // Positive by construction, so the mantissa fits in u128
        (self.0.mantissa().unsigned_abs(), self.0.scale())
    }
}

impl FromStr for Threshold {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fraction =
            Decimal::from_str(s.trim()).map_err(|_| ValueError::InvalidLiteral(s.to_string()))?;
        Self::new(fraction)
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.as_percent().normalize())
    }
}

/// Result of comparing the reference against the stored value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    NoActionNeeded,
    UpdateRequired { candidate: FixedPoint },
}

impl Decision {
    pub fn is_update(&self) -> bool {
        matches!(self, Decision::UpdateRequired { .. })
    }
}

/// Whether updates are gated on the threshold or pushed every cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePolicy {
    #[default]
    Threshold,
    Always,
}

impl FromStr for UpdatePolicy {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "threshold" => Ok(UpdatePolicy::Threshold),
            "always" => Ok(UpdatePolicy::Always),
            other => Err(ValueError::InvalidLiteral(other.to_string())),
        }
    }
}

impl UpdatePolicy {
    pub fn decide(
        &self,
        reference: &ReferenceValue,
        stored: &StoredValue,
        threshold: &Threshold,
    ) -> Result<Decision, ValueError> {
        match self {
            UpdatePolicy::Threshold => evaluate(&reference.value, &stored.value, threshold),
            UpdatePolicy::Always => {
                if reference.value.abs_diff(&stored.value)?.is_zero() {
                    Ok(Decision::NoActionNeeded)
                } else {
                    Ok(Decision::UpdateRequired {
                        candidate: reference.value,
                    })
                }
            }
        }
    }
}

/// Pure deviation check.
///
/// `UpdateRequired` iff `|reference - stored| > reference * threshold`. The
/// comparison is cross-multiplied in 512-bit integers:
/// `diff * 10^t_scale > reference * t_mantissa`, so nothing is divided and
/// `stored == 0` needs no special case. A tie is not an update.
pub fn evaluate(
    reference: &FixedPoint,
    stored: &FixedPoint,
    threshold: &Threshold,
) -> Result<Decision, ValueError> {
    let (reference_m, stored_m, _) = reference.aligned(stored)?;
    let diff = if reference_m >= stored_m {
        reference_m - stored_m
    } else {
        stored_m - reference_m
    };

    let (numerator, t_scale) = threshold.parts();
    let lhs = U512::from(diff) * U512::from(pow10(t_scale)?);
    let rhs = U512::from(reference_m) * U512::from(numerator);

    if lhs > rhs {
        Ok(Decision::UpdateRequired {
            candidate: *reference,
        })
    } else {
        Ok(Decision::NoActionNeeded)
    }
}
