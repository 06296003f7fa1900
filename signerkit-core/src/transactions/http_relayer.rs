//! Relayer backed by an HTTP relaying service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::relayer::{FeeOption, FeeOptions, OperationStatus, Relayer};
use crate::envelope::{Call, Payload};
use crate::error::{SignerKitError, SignerKitResult};
use crate::http_request::Request;
use crate::primitives::{Address, Bytes, U256};

#[derive(Serialize)]
struct FeeOptionsRequest {
    wallet: Address,
    to: Address,
    data: Bytes,
}

#[derive(Deserialize)]
struct FeeOptionsResponse {
    options: Vec<FeeOption>,
    #[serde(default)]
    sponsored: bool,
    #[serde(default)]
    quote: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetaTxn {
    wallet_address: Address,
    contract: Address,
    input: Bytes,
}

#[derive(Serialize)]
struct SendMetaTxnRequest {
    call: MetaTxn,
    #[serde(skip_serializing_if = "Option::is_none")]
    quote: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMetaTxnResponse {
    status: bool,
    txn_hash: String,
}

#[derive(Serialize)]
struct ReceiptRequest<'a> {
    #[serde(rename = "metaTxID")]
    meta_tx_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Receipt {
    status: String,
    #[serde(default)]
    txn_hash: Option<String>,
    #[serde(default)]
    revert_reason: Option<String>,
}

#[derive(Deserialize)]
struct ReceiptResponse {
    receipt: Receipt,
}

impl From<Receipt> for OperationStatus {
    fn from(receipt: Receipt) -> Self {
        match receipt.status.as_str() {
            "QUEUED" => Self::Queued,
            "SENT" | "PENDING_PRECONDITION" => Self::Pending,
            "SUCCEEDED" => Self::Confirmed {
                tx_hash: receipt.txn_hash.unwrap_or_default(),
            },
            "FAILED" | "PARTIALLY_FAILED" | "DROPPED" => Self::Failed {
                reason: receipt
                    .revert_reason
                    .unwrap_or_else(|| receipt.status.to_lowercase()),
            },
            _ => Self::Unknown,
        }
    }
}

/// [`Relayer`] speaking the relayer service's JSON-RPC over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpRelayer {
    id: String,
    url: String,
    chain_ids: Vec<u64>,
    request: Request,
}

impl HttpRelayer {
    /// Creates a client for the relayer at `url`, serving `chain_ids`.
    ///
    /// # Errors
    ///
    /// Returns [`SignerKitError::InvalidInput`] if `url` is not HTTPS.
    pub fn new(id: &str, url: &str, chain_ids: Vec<u64>) -> SignerKitResult<Self> {
        if !cfg!(test) && !url.starts_with("https://") {
            return Err(SignerKitError::InvalidInput {
                attribute: "relayer_url".to_string(),
                reason: "relayer must be reached over https".to_string(),
            });
        }
        Ok(Self {
            id: id.to_string(),
            url: url.trim_end_matches('/').to_string(),
            chain_ids,
            request: Request::new(),
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/rpc/Relayer/{method}", self.url)
    }
}

#[async_trait]
impl Relayer for HttpRelayer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn is_available(&self, _wallet: Address, chain_id: u64) -> SignerKitResult<bool> {
        Ok(self.chain_ids.contains(&chain_id))
    }

    async fn fee_options(
        &self,
        wallet: Address,
        _chain_id: u64,
        calls: &[Call],
    ) -> SignerKitResult<FeeOptions> {
        let data = Payload::Calls {
            space: U256::ZERO,
            nonce: U256::ZERO,
            calls: calls.to_vec(),
        }
        .encode();
        let response: FeeOptionsResponse = self
            .request
            .post_json(
                &self.endpoint("FeeOptions"),
                &FeeOptionsRequest {
                    wallet,
                    to: wallet,
                    data,
                },
            )
            .await?;
        debug!(
            relayer = %self.id,
            options = response.options.len(),
            sponsored = response.sponsored,
            "fee options received"
        );
        Ok(FeeOptions {
            options: if response.sponsored {
                Vec::new()
            } else {
                response.options
            },
            quote: response.quote,
        })
    }

    async fn relay(
        &self,
        to: Address,
        data: Bytes,
        _chain_id: u64,
        quote: Option<String>,
    ) -> SignerKitResult<String> {
        let response: SendMetaTxnResponse = self
            .request
            .post_json(
                &self.endpoint("SendMetaTxn"),
                &SendMetaTxnRequest {
                    call: MetaTxn {
                        wallet_address: to,
                        contract: to,
                        input: data,
                    },
                    quote,
                },
            )
            .await?;
        if !response.status {
            return Err(SignerKitError::Relayer(format!(
                "{} refused the transaction",
                self.id
            )));
        }
        info!(relayer = %self.id, op_hash = %response.txn_hash, "transaction relayed");
        Ok(response.txn_hash)
    }

    async fn status(&self, op_hash: &str, _chain_id: u64) -> SignerKitResult<OperationStatus> {
        let response: ReceiptResponse = self
            .request
            .post_json(
                &self.endpoint("GetMetaTxnReceipt"),
                &ReceiptRequest {
                    meta_tx_id: op_hash,
                },
            )
            .await?;
        Ok(response.receipt.into())
    }
}
