use alloy::primitives::U256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{ReadError, SubmitError, ValueError};
use crate::price_feed::{FixedPoint, StoredValue};

/// Fee mechanism used when pricing a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeMode {
    /// Single `gasPrice`
    Legacy,
    /// `maxFeePerGas` / `maxPriorityFeePerGas`
    Eip1559,
}

impl FromStr for FeeMode {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(FeeMode::Legacy),
            "eip1559" | "eip-1559" => Ok(FeeMode::Eip1559),
            other => Err(ValueError::InvalidLiteral(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptStatus {
    Pending,
    Confirmed { tx_hash: String },
    Rejected(SubmitError),
}

/// One submission try for a candidate value
#[derive(Debug, Clone)]
pub struct UpdateAttempt {
    pub candidate: FixedPoint,
    pub nonce: u64,
    /// wei per gas; `gasPrice` in legacy mode, `maxFeePerGas` otherwise
    pub fee_price: u128,
    pub priority_fee: u128,
    pub fee_mode: FeeMode,
    pub gas_limit: u64,
    pub status: AttemptStatus,
}

impl UpdateAttempt {
    /// The value written on-chain
    pub fn calldata_value(&self) -> U256 {
        self.candidate.mantissa()
    }
}

/// Receipt of a confirmed update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: Option<u64>,
}

/// Ledger-side capabilities the keeper needs.
///
/// `send_update` covers both broadcast and confirmation: it only returns once the
/// transaction reached a terminal state (or the implementation's own timeout fired).
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Address that signs updates
    fn operator(&self) -> String;

    async fn read_value(&self) -> Result<StoredValue, ReadError>;

    /// Next usable sequence number for the operator account
    async fn sequence(&self) -> Result<u64, SubmitError>;

    async fn send_update(&self, attempt: &UpdateAttempt) -> Result<TxReceipt, SubmitError>;

    /// Operator balance in wei
    async fn balance(&self) -> Result<U256, ReadError>;
}
