//! Relayer abstraction and the fee quotes relayers return.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::envelope::Call;
use crate::error::SignerKitResult;
use crate::primitives::{Address, Bytes, U256};

/// Token a relayer accepts as fee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeToken {
    /// Chain the token lives on.
    pub chain_id: u64,
    /// Display name.
    pub name: String,
    /// Ticker.
    pub symbol: String,
    /// Decimals.
    pub decimals: u8,
    /// ERC-20 contract, `None` for the native token.
    #[serde(default)]
    pub contract_address: Option<Address>,
}

/// A fee quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeOption {
    /// Token paid.
    pub token: FeeToken,
    /// Fee recipient.
    pub to: Address,
    /// Amount, in the token's smallest unit.
    pub value: U256,
    /// Gas limit the quote assumes.
    pub gas_limit: u64,
}

/// Fee quotes of one relayer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeOptions {
    /// The options.
    pub options: Vec<FeeOption>,
    /// Opaque quote to pass back when relaying.
    pub quote: Option<String>,
}

/// Progress of a relayed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum OperationStatus {
    /// The relayer does not know the operation.
    Unknown,
    /// Accepted, not yet sent.
    Queued,
    /// Sent, not yet mined.
    Pending,
    /// Mined successfully.
    Confirmed {
        /// Transaction hash.
        #[serde(rename = "txHash")]
        tx_hash: String,
    },
    /// Mined and reverted, or dropped.
    Failed {
        /// Why.
        reason: String,
    },
}

impl OperationStatus {
    /// Whether the status can no longer change.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        matches!(self, Self::Confirmed { .. } | Self::Failed { .. })
    }
}

/// A service submitting wallet transactions on chain.
#[async_trait]
pub trait Relayer: Send + Sync + std::fmt::Debug {
    /// Stable identifier of the relayer.
    fn id(&self) -> &str;

    /// Whether the relayer serves `chain_id`.
    async fn is_available(&self, wallet: Address, chain_id: u64) -> SignerKitResult<bool>;

    /// Quotes the fee of executing `calls`.
    async fn fee_options(
        &self,
        wallet: Address,
        chain_id: u64,
        calls: &[Call],
    ) -> SignerKitResult<FeeOptions>;

    /// Submits `data` to `to`. Returns the operation hash.
    async fn relay(
        &self,
        to: Address,
        data: Bytes,
        chain_id: u64,
        quote: Option<String>,
    ) -> SignerKitResult<String>;

    /// Progress of a submitted operation.
    async fn status(&self, op_hash: &str, chain_id: u64) -> SignerKitResult<OperationStatus>;
}
