use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::ValueError;
use crate::execution::ledger::FeeMode;

pub const WEI_PER_GWEI: u64 = 1_000_000_000;

/// Fee escalation settings, fixed at startup
#[derive(Debug, Clone)]
pub struct FeePolicy {
    pub mode: FeeMode,
    /// Initial fee price (wei per gas)
    pub base_price: u128,
    /// Step added on every `FeeTooLow`
    pub increment: u128,
    /// Conservative legacy price used when the configured mode is unsupported
    pub fallback_price: u128,
    /// EIP-1559 tip, capped at the fee price
    pub priority_fee: u128,
    /// Escalation never goes past this
    pub max_price: Option<u128>,
    pub max_attempts: u32,
    pub gas_limit: u64,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            mode: FeeMode::Legacy,
            base_price: 20 * WEI_PER_GWEI as u128,
            increment: WEI_PER_GWEI as u128,
            fallback_price: 20 * WEI_PER_GWEI as u128,
            priority_fee: WEI_PER_GWEI as u128,
            max_price: None,
            max_attempts: 10,
            gas_limit: 100_000,
        }
    }
}

impl FeePolicy {
    /// Next price after a `FeeTooLow`, or `None` once the ceiling would be crossed
    pub fn escalate(&self, current: u128) -> Option<u128> {
        let next = current.checked_add(self.increment)?;
        match self.max_price {
            Some(ceiling) if next > ceiling => None,
            _ => Some(next),
        }
    }

    /// Legacy price to use after an `UnsupportedFeeMode`; never lower than what we
    /// already offered, `None` when it would be above the ceiling
    pub fn fallback(&self, current: u128) -> Option<u128> {
        let price = current.max(self.fallback_price);
        match self.max_price {
            Some(ceiling) if price > ceiling => None,
            _ => Some(price),
        }
    }

    pub fn priority_for(&self, fee_price: u128) -> u128 {
        self.priority_fee.min(fee_price)
    }
}

/// Exact gwei -> wei conversion; fractional wei is rejected
pub fn gwei_to_wei(gwei: Decimal) -> Result<u128, ValueError> {
    if gwei.is_sign_negative() {
        return Err(ValueError::InvalidLiteral(gwei.to_string()));
    }
    let wei = gwei
        .checked_mul(Decimal::from(WEI_PER_GWEI))
        .ok_or(ValueError::Overflow)?;
    if !wei.fract().is_zero() {
        return Err(ValueError::InvalidLiteral(gwei.to_string()));
    }
    wei.to_u128().ok_or(ValueError::Overflow)
}
