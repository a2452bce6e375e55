use std::time::Duration;

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::eth::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolCall;
use alloy::transports::BoxTransport;
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, ReadError, SubmitError};
use crate::execution::ledger::{FeeMode, LedgerClient, TxReceipt, UpdateAttempt};
use crate::price_feed::{FixedPoint, StoredValue};

alloy::sol! {
    interface IPriceFeed {
        function updatePrice(uint256 newPrice) external;
        function getPrice() external view returns (uint256);
    }
}

#[derive(Debug, Clone)]
pub struct EvmConfig {
    pub rpc_url: String,
    pub contract: Address,
    /// Decimals of the on-chain integer
    pub scale: u32,
    pub rpc_timeout: Duration,
    pub confirmation_timeout: Duration,
}

/// Price feed contract on an EVM chain, signed for by a local key
pub struct EvmLedger {
    config: EvmConfig,
    provider: RootProvider<BoxTransport>,
    signer: PrivateKeySigner,
    wallet: EthereumWallet,
    /// Fetched on the first send
    chain_id: OnceCell<u64>,
}

impl EvmLedger {
    /// Builds the provider only; the node is not contacted until the first call
    pub async fn connect(config: EvmConfig, signer: PrivateKeySigner) -> AppResult<Self> {
        let provider = ProviderBuilder::new()
            .on_builtin(&config.rpc_url)
            .await
            .map_err(|e| AppError::Config(format!("Invalid RPC_URL {}: {}", config.rpc_url, e)))?;

        info!(
            "🔗 RPC provider ready for {} (contract {:#x}, operator {:#x})",
            config.rpc_url,
            config.contract,
            signer.address()
        );

        let wallet = EthereumWallet::from(signer.clone());
        Ok(Self {
            config,
            provider,
            signer,
            wallet,
            chain_id: OnceCell::new(),
        })
    }

    async fn chain_id(&self) -> Result<u64, SubmitError> {
        self.chain_id
            .get_or_try_init(|| async {
                let chain_id = tokio::time::timeout(self.config.rpc_timeout, self.provider.get_chain_id())
                    .await
                    .map_err(|_| SubmitError::Timeout("chain id lookup".to_string()))?
                    .map_err(|e| SubmitError::Other(format!("chain id lookup failed: {}", e)))?;
                info!("🔗 Connected to chain {}", chain_id);
                Ok::<u64, SubmitError>(chain_id)
            })
            .await
            .copied()
    }

    fn build_request(&self, attempt: &UpdateAttempt, chain_id: u64) -> TransactionRequest {
        let input = IPriceFeed::updatePriceCall {
            newPrice: attempt.calldata_value(),
        }
        .abi_encode();

        let request = TransactionRequest::default()
            .with_to(self.config.contract)
            .with_input(input)
            .with_chain_id(chain_id)
            .with_nonce(attempt.nonce)
            .with_gas_limit(attempt.gas_limit);

        let mut request = match attempt.fee_mode {
            FeeMode::Legacy => request.with_gas_price(attempt.fee_price),
            FeeMode::Eip1559 => request
                .with_max_fee_per_gas(attempt.fee_price)
                .with_max_priority_fee_per_gas(attempt.priority_fee),
        };
        request.from = Some(self.signer.address());
        request
    }
}

#[async_trait]
impl LedgerClient for EvmLedger {
    fn operator(&self) -> String {
        format!("{:#x}", self.signer.address())
    }

    async fn read_value(&self) -> Result<StoredValue, ReadError> {
        let request = TransactionRequest::default()
            .with_to(self.config.contract)
            .with_input(IPriceFeed::getPriceCall {}.abi_encode());

        let raw = tokio::time::timeout(self.config.rpc_timeout, self.provider.call(&request))
            .await
            .map_err(|_| ReadError::Unavailable("getPrice timed out".to_string()))?
            .map_err(|e| ReadError::Unavailable(format!("getPrice failed: {}", e)))?;

        let value = decode_price(&raw, self.config.scale)?;
        debug!("Stored value read: {}", value);
        Ok(StoredValue::new(value))
    }

    async fn sequence(&self) -> Result<u64, SubmitError> {
        let address = self.signer.address();
        tokio::time::timeout(
            self.config.rpc_timeout,
            self.provider.get_transaction_count(address),
        )
        .await
        .map_err(|_| SubmitError::Timeout("nonce lookup".to_string()))?
        .map_err(|e| SubmitError::Other(format!("nonce lookup failed: {}", e)))
    }

    async fn send_update(&self, attempt: &UpdateAttempt) -> Result<TxReceipt, SubmitError> {
        let chain_id = self.chain_id().await?;
        let signed = self
            .build_request(attempt, chain_id)
            .build(&self.wallet)
            .await
            .map_err(|e| SubmitError::Other(format!("signing failed: {}", e)))?;
        let raw = Bytes::from(signed.encoded_2718());

        let pending = tokio::time::timeout(
            self.config.rpc_timeout,
            self.provider.send_raw_transaction(&raw),
        )
        .await
        .map_err(|_| SubmitError::Timeout("broadcast".to_string()))?
        .map_err(|e| classify_rpc_error(&e.to_string()))?;

        let tx_hash = format!("{:#x}", pending.tx_hash());
        info!("📨 Broadcast {} (nonce {})", tx_hash, attempt.nonce);

        let receipt = tokio::time::timeout(self.config.confirmation_timeout, pending.get_receipt())
            .await
            .map_err(|_| SubmitError::Timeout(format!("confirmation of {}", tx_hash)))?
            .map_err(|e| classify_rpc_error(&e.to_string()))?;

        if !receipt.status() {
            warn!("Transaction {} reverted", tx_hash);
            return Err(SubmitError::Other(format!("transaction {} reverted", tx_hash)));
        }

        Ok(TxReceipt {
            tx_hash,
            block_number: receipt.block_number,
        })
    }

    async fn balance(&self) -> Result<U256, ReadError> {
        tokio::time::timeout(
            self.config.rpc_timeout,
            self.provider.get_balance(self.signer.address()),
        )
        .await
        .map_err(|_| ReadError::Unavailable("balance lookup timed out".to_string()))?
        .map_err(|e| ReadError::Unavailable(e.to_string()))
    }
}

/// Decode `getPrice()` return data into a value at `scale`
pub fn decode_price(raw: &[u8], scale: u32) -> Result<FixedPoint, ReadError> {
    if raw.is_empty() {
        return Err(ReadError::Unavailable(
            "getPrice returned no data (is CONTRACT_ADDRESS a price feed?)".to_string(),
        ));
    }
    let decoded = <IPriceFeed::getPriceCall as SolCall>::abi_decode_returns(raw, true)
        .map_err(|e| ReadError::Unavailable(format!("undecodable getPrice result: {}", e)))?;
    FixedPoint::new(decoded._0, scale).map_err(|e| ReadError::Unavailable(e.to_string()))
}

/// Map a node's rejection message onto the submission error taxonomy
pub fn classify_rpc_error(message: &str) -> SubmitError {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&[
        "underpriced",
        "fee too low",
        "max fee per gas less than block base fee",
    ]) {
        SubmitError::FeeTooLow(message.to_string())
    } else if has(&["nonce too low", "nonce has already been used", "nonce expired"]) {
        SubmitError::SequenceStale(message.to_string())
    } else if has(&[
        "transaction type not supported",
        "unsupported transaction type",
        "eip-1559 not supported",
        "method not found",
    ]) {
        SubmitError::UnsupportedFeeMode(message.to_string())
    } else {
        SubmitError::Other(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_fee_errors() {
        for msg in [
            "replacement transaction underpriced",
            "transaction underpriced: tip needed 1, tip permitted 0",
            "Fee too low",
            "max fee per gas less than block base fee: address 0x.., maxFeePerGas: 1 baseFee: 7",
        ] {
            assert!(
                matches!(classify_rpc_error(msg), SubmitError::FeeTooLow(_)),
                "{msg}"
            );
        }
    }

    #[test]
    fn test_classify_nonce_errors() {
        for msg in ["nonce too low: next nonce 5, tx nonce 4", "Nonce has already been used", "nonce expired"] {
            assert!(
                matches!(classify_rpc_error(msg), SubmitError::SequenceStale(_)),
                "{msg}"
            );
        }
    }

    #[test]
    fn test_classify_fee_mode_errors() {
        assert!(matches!(
            classify_rpc_error("transaction type not supported"),
            SubmitError::UnsupportedFeeMode(_)
        ));
        assert!(matches!(
            classify_rpc_error("the method eth_maxPriorityFeePerGas does not exist/is not available: Method not found"),
            SubmitError::UnsupportedFeeMode(_)
        ));
    }

    #[test]
    fn test_classify_everything_else_as_other() {
        let err = classify_rpc_error("execution reverted: Ownable: caller is not the owner");
        assert_eq!(
            err,
            SubmitError::Other("execution reverted: Ownable: caller is not the owner".to_string())
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_decode_price_word() {
        let mut word = [0u8; 32];
        word[24..].copy_from_slice(&10_500_000_000u64.to_be_bytes());
        let value = decode_price(&word, 8).unwrap();
        assert_eq!(value, FixedPoint::parse("105", 8).unwrap());
    }

    #[test]
    fn test_decode_price_empty_is_unavailable() {
        assert!(matches!(decode_price(&[], 8), Err(ReadError::Unavailable(_))));
        assert!(decode_price(&[1, 2, 3], 8).is_err());
    }

    fn unreachable_ledger() -> EvmConfig {
        EvmConfig {
            rpc_url: "http://127.0.0.1:9".to_string(),
            contract: Address::repeat_byte(0x11),
            scale: 8,
            rpc_timeout: Duration::from_secs(2),
            confirmation_timeout: Duration::from_secs(2),
        }
    }

    fn devnet_signer() -> PrivateKeySigner {
        "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
            .parse()
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_does_not_need_a_live_node() {
        let ledger = EvmLedger::connect(unreachable_ledger(), devnet_signer())
            .await
            .unwrap();

        assert!(ledger.chain_id.get().is_none());
        // the outage surfaces per call instead of at startup
        assert!(matches!(ledger.read_value().await, Err(ReadError::Unavailable(_))));
        assert!(ledger.balance().await.is_err());
    }

    #[tokio::test]
    async fn test_send_without_node_fails_the_attempt() {
        let ledger = EvmLedger::connect(unreachable_ledger(), devnet_signer())
            .await
            .unwrap();
        let attempt = UpdateAttempt {
            candidate: FixedPoint::parse("105", 8).unwrap(),
            nonce: 0,
            fee_price: 1_000_000_000,
            priority_fee: 1_000_000_000,
            fee_mode: FeeMode::Legacy,
            gas_limit: 100_000,
            status: crate::execution::ledger::AttemptStatus::Pending,
        };

        let err = ledger.send_update(&attempt).await.unwrap_err();
        assert!(matches!(err, SubmitError::Other(_) | SubmitError::Timeout(_)), "{err:?}");
        assert!(ledger.chain_id.get().is_none());
    }

    #[test]
    fn test_update_calldata_encodes_mantissa() {
        let input = IPriceFeed::updatePriceCall {
            newPrice: U256::from(10_500_000_000u64),
        }
        .abi_encode();
        assert_eq!(&input[..4], IPriceFeed::updatePriceCall::SELECTOR.as_slice());
        assert_eq!(U256::from_be_slice(&input[4..36]), U256::from(10_500_000_000u64));
    }
}
