//! The transaction lifecycle: `requested → defined → formed → relayed`.

use std::sync::Arc;
use std::time::Duration;

use alloy_core::sol_types::SolValue;
use tracing::{debug, info, warn};

use crate::chain::{on_chain_view, ChainProvider};
use crate::config::WalletContext;
use crate::envelope::{function_call, BehaviorOnError, Call, Envelope, Payload};
use crate::error::{SignerKitError, SignerKitResult};
use crate::primitives::{new_id, Address, Bytes, Clock, U256};
use crate::signatures::{Action, SignatureRequests};
use crate::state::StateProvider;
use crate::store::RecordStore;
use crate::subscription::{watch, Subscription};

pub mod http_relayer;
pub mod relayer;
mod types;

pub use http_relayer::HttpRelayer;
pub use relayer::{FeeOption, FeeOptions, FeeToken, OperationStatus, Relayer};
pub use types::{
    DefineChanges, RelayerOption, RelayerOptionKind, Transaction, TransactionOptions,
    TransactionStatus,
};

const STATUS_POLLS: u32 = 30;
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Drives transactions from a list of calls to a relayed operation.
#[derive(Clone)]
pub struct Transactions {
    store: Arc<dyn RecordStore<String, Transaction>>,
    requests: Arc<SignatureRequests>,
    state: Arc<dyn StateProvider>,
    chain: Arc<dyn ChainProvider>,
    relayers: Vec<Arc<dyn Relayer>>,
    context: WalletContext,
    clock: Arc<dyn Clock>,
    default_origin: String,
}

impl std::fmt::Debug for Transactions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transactions")
            .field("relayers", &self.relayers)
            .finish_non_exhaustive()
    }
}

impl Transactions {
    /// Creates the lifecycle.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore<String, Transaction>>,
        requests: Arc<SignatureRequests>,
        state: Arc<dyn StateProvider>,
        chain: Arc<dyn ChainProvider>,
        relayers: Vec<Arc<dyn Relayer>>,
        context: WalletContext,
        clock: Arc<dyn Clock>,
        default_origin: String,
    ) -> Self {
        Self {
            store,
            requests,
            state,
            chain,
            relayers,
            context,
            clock,
            default_origin,
        }
    }

    /// Prepares a transaction executing `calls` from `wallet`.
    ///
    /// Calls revert the batch on error and carry no gas limit. The envelope is prepared against
    /// the latest configuration, or the one set on chain with `no_config_update`.
    ///
    /// # Errors
    ///
    /// Returns [`SignerKitError::WalletNotFound`] for unknown wallets, or a collaborator failure.
    pub async fn request(
        &self,
        wallet: Address,
        chain_id: u64,
        calls: Vec<Call>,
        options: TransactionOptions,
    ) -> SignerKitResult<String> {
        let configuration = if options.no_config_update {
            let deploy = self
                .state
                .get_deploy(wallet)
                .await?
                .ok_or(SignerKitError::WalletNotFound(wallet))?;
            let image_hash = self
                .chain
                .image_hash(wallet, chain_id)
                .await?
                .unwrap_or(deploy);
            self.state
                .get_configuration(image_hash)
                .await?
                .ok_or_else(|| {
                    SignerKitError::ImpossibleState(format!(
                        "configuration {image_hash} of {wallet} is unknown"
                    ))
                })?
        } else {
            self.state.latest_configuration(wallet).await?
        };

        let space = options.space.unwrap_or_default();
        let nonce = self.chain.nonce(wallet, chain_id, space).await?;
        let calls = calls
            .into_iter()
            .map(|call| Call {
                gas_limit: U256::ZERO,
                behavior_on_error: BehaviorOnError::Revert,
                ..call
            })
            .collect();

        let transaction = Transaction {
            id: new_id(),
            wallet,
            chain_id,
            source: options
                .source
                .unwrap_or_else(|| self.default_origin.clone()),
            created_at: self.clock.now_millis(),
            envelope: Envelope::new(
                wallet,
                chain_id,
                Payload::Calls {
                    space,
                    nonce,
                    calls,
                },
                configuration,
            ),
            status: TransactionStatus::Requested,
        };
        let id = transaction.id.clone();
        info!(%id, %wallet, chain_id, "transaction requested");
        self.store.set(id.clone(), transaction).await?;
        Ok(id)
    }

    /// Applies `changes` and collects relayer options.
    ///
    /// # Errors
    ///
    /// Fails with [`SignerKitError::InvalidTransactionStatus`] unless the transaction is
    /// `requested`, and with [`SignerKitError::MismatchedCallOverrides`] if the gas limits do not
    /// match the calls.
    pub async fn define(&self, id: &str, changes: Option<DefineChanges>) -> SignerKitResult<()> {
        let mut transaction = self.get(id).await?;
        expect_status(&transaction, "requested")?;

        if let Some(changes) = changes {
            apply_changes(&mut transaction.envelope.payload, changes)?;
        }

        let mut relayer_options = Vec::new();
        for relayer in &self.relayers {
            if !relayer
                .is_available(transaction.wallet, transaction.chain_id)
                .await?
            {
                continue;
            }
            let quoted = relayer
                .fee_options(transaction.wallet, transaction.chain_id, transaction.calls())
                .await?;
            let options: Vec<_> = quoted
                .options
                .into_iter()
                .filter(|option| option.token.chain_id == transaction.chain_id)
                .collect();
            if options.is_empty() {
                relayer_options.push(RelayerOption {
                    id: new_id(),
                    relayer_id: relayer.id().to_string(),
                    kind: RelayerOptionKind::Manual,
                });
            } else {
                relayer_options.extend(options.into_iter().map(|option| RelayerOption {
                    id: new_id(),
                    relayer_id: relayer.id().to_string(),
                    kind: RelayerOptionKind::Fee {
                        option,
                        quote: quoted.quote.clone(),
                    },
                }));
            }
        }

        debug!(%id, options = relayer_options.len(), "transaction defined");
        transaction.status = TransactionStatus::Defined { relayer_options };
        self.store.set(transaction.id.clone(), transaction).await
    }

    /// Chooses a relayer option, adds its fee call and opens the `send-transaction` request.
    /// Returns the id of the signature request.
    ///
    /// # Errors
    ///
    /// Fails with [`SignerKitError::InvalidTransactionStatus`] unless the transaction is
    /// `defined`, and with [`SignerKitError::RelayerOptionNotFound`] for unknown options.
    pub async fn select_relayer(&self, id: &str, option_id: &str) -> SignerKitResult<String> {
        let mut transaction = self.get(id).await?;
        let TransactionStatus::Defined { relayer_options } = &transaction.status else {
            return Err(invalid_status(&transaction, "defined"));
        };
        let relayer_option = relayer_options
            .iter()
            .find(|option| option.id == option_id)
            .cloned()
            .ok_or_else(|| SignerKitError::RelayerOptionNotFound(option_id.to_string()))?;

        if let RelayerOptionKind::Fee { option, .. } = &relayer_option.kind {
            if let Payload::Calls { calls, .. } = &mut transaction.envelope.payload {
                calls.insert(0, fee_call(option));
            }
        }

        let signature_id = self
            .requests
            .request(
                transaction.envelope.clone(),
                Action::SendTransaction,
                Some(transaction.source.clone()),
            )
            .await?;
        info!(%id, %signature_id, relayer = %relayer_option.relayer_id, "transaction formed");
        transaction.status = TransactionStatus::Formed {
            relayer_option,
            signature_id: signature_id.clone(),
        };
        self.store.set(transaction.id.clone(), transaction).await?;
        Ok(signature_id)
    }

    /// Relays a formed transaction once its signature request reaches the threshold. Accepts the
    /// transaction id or the id of its signature request. Returns the operation hash.
    ///
    /// # Errors
    ///
    /// Fails with [`SignerKitError::InvalidTransactionStatus`] unless the transaction is
    /// `formed`, with [`SignerKitError::SignatureRequestNotPending`] once its signature request
    /// was cancelled or completed, with [`SignerKitError::InsufficientWeight`] below the
    /// threshold, or when the relayer fails.
    pub async fn relay(&self, id_or_signature_id: &str) -> SignerKitResult<String> {
        let mut transaction = self.find(id_or_signature_id).await?;
        let TransactionStatus::Formed {
            relayer_option,
            signature_id,
        } = transaction.status.clone()
        else {
            return Err(invalid_status(&transaction, "formed"));
        };

        let signed = self
            .requests
            .get_pending(&signature_id, Action::SendTransaction)
            .await?;
        let (weight, threshold) = (signed.envelope.weight(), signed.envelope.threshold());
        if weight < threshold {
            return Err(SignerKitError::InsufficientWeight { weight, threshold });
        }

        let relayer = self
            .relayers
            .iter()
            .find(|relayer| relayer.id() == relayer_option.relayer_id)
            .cloned()
            .ok_or_else(|| SignerKitError::RelayerNotFound(relayer_option.relayer_id.clone()))?;

        let (to, data) = self.build_execution(&signed.envelope).await?;
        let quote = match &relayer_option.kind {
            RelayerOptionKind::Fee { quote, .. } => quote.clone(),
            RelayerOptionKind::Manual => None,
        };
        let op_hash = relayer
            .relay(to, data, transaction.chain_id, quote)
            .await?;

        info!(id = %transaction.id, %op_hash, "transaction relayed");
        transaction.status = TransactionStatus::Relayed {
            relayer_option,
            signature_id: signature_id.clone(),
            op_hash: op_hash.clone(),
            op_status: None,
        };
        self.store
            .set(transaction.id.clone(), transaction.clone())
            .await?;
        self.spawn_status_refresh(relayer, transaction.id, transaction.chain_id, op_hash.clone());
        self.requests.complete(&signature_id).await?;
        Ok(op_hash)
    }

    /// On-chain target and calldata executing a signed envelope. Undeployed wallets are deployed
    /// in the same bundle through the guest module.
    async fn build_execution(&self, envelope: &Envelope) -> SignerKitResult<(Address, Bytes)> {
        let view = on_chain_view(
            self.state.as_ref(),
            self.chain.as_ref(),
            envelope.wallet,
            envelope.chain_id,
        )
        .await?;
        let signature = envelope.encode_chained_signature(&view.pending_updates);
        let execute = function_call(
            "execute(bytes,bytes)",
            &(envelope.payload.encode(), signature).abi_encode_params(),
        );
        if view.deployed {
            return Ok((envelope.wallet, execute));
        }

        debug!(wallet = %envelope.wallet, "bundling deployment with the transaction");
        let bundle = Payload::Calls {
            space: U256::ZERO,
            nonce: U256::ZERO,
            calls: vec![
                self.context.deploy_call(view.deploy_image_hash),
                Call::new(envelope.wallet, U256::ZERO, execute),
            ],
        };
        Ok((self.context.guest, bundle.encode()))
    }

    fn spawn_status_refresh(
        &self,
        relayer: Arc<dyn Relayer>,
        id: String,
        chain_id: u64,
        op_hash: String,
    ) {
        let store = self.store.clone();
        tokio::spawn(async move {
            for _ in 0..STATUS_POLLS {
                tokio::time::sleep(STATUS_POLL_INTERVAL).await;
                let status = match relayer.status(&op_hash, chain_id).await {
                    Ok(status) => status,
                    Err(err) => {
                        warn!(%id, %op_hash, "operation status refresh failed: {err}");
                        continue;
                    }
                };
                let Ok(Some(mut transaction)) = store.get(&id).await else {
                    return;
                };
                let is_final = status.is_final();
                if let TransactionStatus::Relayed { op_status, .. } = &mut transaction.status {
                    if op_status.as_ref() != Some(&status) {
                        debug!(%id, ?status, "operation status changed");
                        *op_status = Some(status);
                        if store.set(id.clone(), transaction).await.is_err() {
                            return;
                        }
                    }
                }
                if is_final {
                    return;
                }
            }
        });
    }

    /// Deletes a transaction in any state. A formed transaction's signature request is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`SignerKitError::TransactionNotFound`] if there is no such transaction.
    pub async fn delete(&self, id: &str) -> SignerKitResult<()> {
        let transaction = self.get(id).await?;
        if let TransactionStatus::Formed { signature_id, .. } = &transaction.status {
            match self.requests.cancel(signature_id).await {
                Ok(()) | Err(SignerKitError::SignatureRequestNotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        debug!(%id, status = transaction.status.name(), "transaction deleted");
        self.store.del(&transaction.id).await
    }

    /// Reads a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`SignerKitError::TransactionNotFound`] if there is no such transaction.
    pub async fn get(&self, id: &str) -> SignerKitResult<Transaction> {
        self.store
            .get(&id.to_string())
            .await?
            .ok_or_else(|| SignerKitError::TransactionNotFound(id.to_string()))
    }

    async fn find(&self, id_or_signature_id: &str) -> SignerKitResult<Transaction> {
        if let Some(transaction) = self.store.get(&id_or_signature_id.to_string()).await? {
            return Ok(transaction);
        }
        self.store
            .list()
            .await?
            .into_iter()
            .find(|transaction| transaction.status.signature_id() == Some(id_or_signature_id))
            .ok_or_else(|| SignerKitError::TransactionNotFound(id_or_signature_id.to_string()))
    }

    /// Lists every transaction, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list(&self) -> SignerKitResult<Vec<Transaction>> {
        self.store.list().await
    }

    /// Pushes transaction `id` whenever it changes.
    #[must_use]
    pub fn on_transaction_update(&self, id: &str, trigger: bool) -> Subscription<Transaction> {
        let store = self.store.clone();
        let id = id.to_string();
        let watched = id.clone();
        watch(
            self.store.subscribe(),
            Vec::new(),
            move |key: &String| *key == watched,
            trigger,
            move || {
                let store = store.clone();
                let id = id.clone();
                async move { store.get(&id).await.ok().flatten() }
            },
        )
    }

    /// Pushes the transaction list whenever any transaction changes.
    #[must_use]
    pub fn on_transactions_update(&self, trigger: bool) -> Subscription<Vec<Transaction>> {
        let store = self.store.clone();
        watch(
            self.store.subscribe(),
            Vec::new(),
            |_: &String| true,
            trigger,
            move || {
                let store = store.clone();
                async move { store.list().await.ok() }
            },
        )
    }
}

fn invalid_status(transaction: &Transaction, expected: &'static str) -> SignerKitError {
    SignerKitError::InvalidTransactionStatus {
        id: transaction.id.clone(),
        expected,
        found: transaction.status.name(),
    }
}

fn expect_status(transaction: &Transaction, expected: &'static str) -> SignerKitResult<()> {
    if transaction.status.name() == expected {
        Ok(())
    } else {
        Err(invalid_status(transaction, expected))
    }
}

fn apply_changes(payload: &mut Payload, changes: DefineChanges) -> SignerKitResult<()> {
    let Payload::Calls {
        space,
        nonce,
        calls,
    } = payload
    else {
        return Err(SignerKitError::ImpossibleState(
            "transaction payload is not a call batch".to_string(),
        ));
    };
    if let Some(gas_limits) = changes.gas_limits {
        if gas_limits.len() != calls.len() {
            return Err(SignerKitError::MismatchedCallOverrides {
                expected: calls.len(),
                found: gas_limits.len(),
            });
        }
        for (call, gas_limit) in calls.iter_mut().zip(gas_limits) {
            call.gas_limit = gas_limit;
        }
    }
    if let Some(new_space) = changes.space {
        *space = new_space;
    }
    if let Some(new_nonce) = changes.nonce {
        *nonce = new_nonce;
    }
    Ok(())
}

/// Call paying `option`: a native transfer, or an ERC-20 `transfer` on the token contract.
fn fee_call(option: &FeeOption) -> Call {
    match option.token.contract_address {
        None => Call::new(option.to, option.value, Bytes::new()),
        Some(token) => Call::new(
            token,
            U256::ZERO,
            function_call(
                "transfer(address,uint256)",
                &(option.to, option.value).abi_encode_params(),
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::chain::MemoryChainProvider;
    use crate::envelope::SignerSignature;
    use crate::primitives::ManualClock;
    use crate::signatures::RequestStatus;
    use crate::state::MemoryStateProvider;
    use crate::store::MemoryStore;
    use crate::topology::{Configuration, Topology};

    #[derive(Debug, Default)]
    struct ManualRelayer {
        relayed: AtomicUsize,
    }

    #[async_trait]
    impl Relayer for ManualRelayer {
        fn id(&self) -> &str {
            "manual"
        }

        async fn is_available(&self, _wallet: Address, _chain_id: u64) -> SignerKitResult<bool> {
            Ok(true)
        }

        async fn fee_options(
            &self,
            _wallet: Address,
            _chain_id: u64,
            _calls: &[Call],
        ) -> SignerKitResult<FeeOptions> {
            Ok(FeeOptions::default())
        }

        async fn relay(
            &self,
            _to: Address,
            _data: Bytes,
            _chain_id: u64,
            _quote: Option<String>,
        ) -> SignerKitResult<String> {
            self.relayed.fetch_add(1, Ordering::SeqCst);
            Ok("0xop".to_string())
        }

        async fn status(&self, _op_hash: &str, _chain_id: u64) -> SignerKitResult<OperationStatus> {
            Ok(OperationStatus::Pending)
        }
    }

    const WALLET: Address = Address::repeat_byte(0x11);
    const DEVICE: Address = Address::repeat_byte(0xd1);

    async fn transactions() -> Transactions {
        transactions_with(Arc::new(ManualRelayer::default())).await
    }

    async fn transactions_with(relayer: Arc<ManualRelayer>) -> Transactions {
        let state = Arc::new(MemoryStateProvider::new());
        state
            .save_wallet(
                WALLET,
                Configuration {
                    checkpoint: 0,
                    threshold: 1,
                    topology: Topology::signer(DEVICE, 1),
                },
            )
            .await
            .unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let requests = Arc::new(SignatureRequests::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            600_000,
            "test".to_string(),
        ));
        Transactions::new(
            Arc::new(MemoryStore::new()),
            requests,
            state,
            Arc::new(MemoryChainProvider::new()),
            vec![relayer],
            WalletContext::default(),
            clock,
            "test".to_string(),
        )
    }

    fn call() -> Call {
        Call {
            gas_limit: U256::from(50_000u64),
            behavior_on_error: BehaviorOnError::Ignore,
            ..Call::new(Address::repeat_byte(0x22), U256::from(1u64), Bytes::new())
        }
    }

    async fn formed(transactions: &Transactions) -> (String, String) {
        let id = transactions
            .request(WALLET, 1, vec![call()], TransactionOptions::default())
            .await
            .unwrap();
        transactions.define(&id, None).await.unwrap();
        let TransactionStatus::Defined { relayer_options } =
            transactions.get(&id).await.unwrap().status
        else {
            panic!("transaction is not defined");
        };
        let signature_id = transactions
            .select_relayer(&id, &relayer_options[0].id)
            .await
            .unwrap();
        (id, signature_id)
    }

    #[tokio::test]
    async fn test_request_normalizes_calls() {
        let transactions = transactions().await;
        let id = transactions
            .request(WALLET, 1, vec![call()], TransactionOptions::default())
            .await
            .unwrap();
        let transaction = transactions.get(&id).await.unwrap();
        assert_eq!(transaction.status, TransactionStatus::Requested);
        assert_eq!(transaction.calls()[0].gas_limit, U256::ZERO);
        assert_eq!(
            transaction.calls()[0].behavior_on_error,
            BehaviorOnError::Revert
        );
    }

    #[tokio::test]
    async fn test_select_relayer_requires_defined() {
        let transactions = transactions().await;
        let id = transactions
            .request(WALLET, 1, vec![call()], TransactionOptions::default())
            .await
            .unwrap();
        let err = transactions.select_relayer(&id, "any").await.unwrap_err();
        assert!(matches!(
            err,
            SignerKitError::InvalidTransactionStatus {
                expected: "defined",
                found: "requested",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_gas_limit_overrides_must_match_calls() {
        let transactions = transactions().await;
        let id = transactions
            .request(WALLET, 1, vec![call()], TransactionOptions::default())
            .await
            .unwrap();
        let err = transactions
            .define(
                &id,
                Some(DefineChanges {
                    gas_limits: Some(vec![U256::from(1u64), U256::from(2u64)]),
                    ..DefineChanges::default()
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SignerKitError::MismatchedCallOverrides {
                expected: 1,
                found: 2
            }
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_delete_formed_cancels_signature_request() {
        let transactions = transactions().await;
        let (id, signature_id) = formed(&transactions).await;

        transactions.delete(&id).await.unwrap();
        assert!(matches!(
            transactions.get(&id).await,
            Err(SignerKitError::TransactionNotFound(_))
        ));
        let request = transactions.requests.get_base(&signature_id).await.unwrap();
        assert!(matches!(request.status, RequestStatus::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_relay_by_signature_id() {
        let transactions = transactions().await;
        let (id, signature_id) = formed(&transactions).await;

        assert!(matches!(
            transactions.relay(&signature_id).await,
            Err(SignerKitError::InsufficientWeight { .. })
        ));

        transactions
            .requests
            .add_signature(
                &signature_id,
                SignerSignature::Ecdsa {
                    address: DEVICE,
                    signature: Bytes::from_static(&[1; 65]),
                },
            )
            .await
            .unwrap();
        let op_hash = transactions.relay(&signature_id).await.unwrap();
        assert_eq!(op_hash, "0xop");
        assert_eq!(
            transactions.get(&id).await.unwrap().status.name(),
            "relayed"
        );
        let request = transactions.requests.get_base(&signature_id).await.unwrap();
        assert!(matches!(request.status, RequestStatus::Completed { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_request_is_never_relayed() {
        let relayer = Arc::new(ManualRelayer::default());
        let transactions = transactions_with(relayer.clone()).await;
        let (id, signature_id) = formed(&transactions).await;
        transactions
            .requests
            .add_signature(
                &signature_id,
                SignerSignature::Ecdsa {
                    address: DEVICE,
                    signature: Bytes::from_static(&[1; 65]),
                },
            )
            .await
            .unwrap();
        transactions.requests.cancel(&signature_id).await.unwrap();

        assert!(matches!(
            transactions.relay(&id).await,
            Err(SignerKitError::SignatureRequestNotPending(_))
        ));
        assert_eq!(relayer.relayed.load(Ordering::SeqCst), 0);
        assert_eq!(transactions.get(&id).await.unwrap().status.name(), "formed");
    }

    #[test]
    fn test_erc20_fee_call() {
        let token = Address::repeat_byte(0x70);
        let call = fee_call(&FeeOption {
            token: FeeToken {
                chain_id: 1,
                name: "USD Coin".to_string(),
                symbol: "USDC".to_string(),
                decimals: 6,
                contract_address: Some(token),
            },
            to: Address::repeat_byte(0x33),
            value: U256::from(5u64),
            gas_limit: 0,
        });
        assert_eq!(call.to, token);
        assert_eq!(call.value, U256::ZERO);
        assert_eq!(&call.data[..4], &[0xa9, 0x05, 0x9c, 0xbb]);
    }
}
