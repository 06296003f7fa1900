//! Message signing.

use std::sync::Arc;

use alloy_core::sol_types::SolValue;
use alloy_primitives::hex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chain::{on_chain_view, ChainProvider};
use crate::config::WalletContext;
use crate::envelope::{Envelope, Payload};
use crate::error::{SignerKitError, SignerKitResult};
use crate::primitives::{new_id, Address, Bytes};
use crate::signatures::{Action, SignatureRequests};
use crate::state::StateProvider;
use crate::store::RecordStore;
use crate::subscription::{watch, Subscription};

/// Suffix marking an ERC-6492 signature of a counterfactual wallet.
pub const ERC6492_MAGIC: [u8; 32] =
    hex!("6492649264926492649264926492649264926492649264926492649264926492");

/// Progress of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum MessageStatus {
    /// Waiting for signatures.
    Requested,
    /// Signed by the wallet.
    Signed {
        /// Wallet signature, ERC-6492 wrapped if the wallet was not deployed.
        #[serde(rename = "messageSignature")]
        message_signature: Bytes,
    },
}

/// A message the wallet is asked to sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Time-ordered unique id.
    pub id: String,
    /// Signing wallet.
    pub wallet: Address,
    /// Message bytes.
    pub message: Bytes,
    /// Chain the signature is for; zero for every chain.
    pub chain_id: u64,
    /// Who asked for the signature.
    pub source: String,
    /// Companion `sign-message` request.
    pub signature_id: String,
    /// Progress.
    #[serde(flatten)]
    pub status: MessageStatus,
}

/// Drives message signatures.
#[derive(Clone)]
pub struct Messages {
    store: Arc<dyn RecordStore<String, MessageRecord>>,
    requests: Arc<SignatureRequests>,
    state: Arc<dyn StateProvider>,
    chain: Arc<dyn ChainProvider>,
    context: WalletContext,
    default_origin: String,
}

impl std::fmt::Debug for Messages {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Messages").finish_non_exhaustive()
    }
}

impl Messages {
    /// Creates the controller.
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore<String, MessageRecord>>,
        requests: Arc<SignatureRequests>,
        state: Arc<dyn StateProvider>,
        chain: Arc<dyn ChainProvider>,
        context: WalletContext,
        default_origin: String,
    ) -> Self {
        Self {
            store,
            requests,
            state,
            chain,
            context,
            default_origin,
        }
    }

    /// Asks `wallet` to sign `message`. Returns the id of the `sign-message` request.
    ///
    /// # Errors
    ///
    /// Fails if the wallet is unknown or a collaborator fails.
    pub async fn request(
        &self,
        wallet: Address,
        message: Bytes,
        chain_id: Option<u64>,
        origin: Option<String>,
    ) -> SignerKitResult<String> {
        let configuration = self.state.latest_configuration(wallet).await?;
        let chain_id = chain_id.unwrap_or_default();
        let source = origin.unwrap_or_else(|| self.default_origin.clone());
        let envelope = Envelope::new(
            wallet,
            chain_id,
            Payload::Message {
                message: message.clone(),
            },
            configuration,
        );
        let signature_id = self
            .requests
            .request(envelope, Action::SignMessage, Some(source.clone()))
            .await?;

        let record = MessageRecord {
            id: new_id(),
            wallet,
            message,
            chain_id,
            source,
            signature_id: signature_id.clone(),
            status: MessageStatus::Requested,
        };
        debug!(id = %record.id, %signature_id, "message requested");
        self.store.set(record.id.clone(), record).await?;
        Ok(signature_id)
    }

    /// Builds the wallet signature once the request reaches the threshold. Accepts the message
    /// id or the id of its signature request.
    ///
    /// Signatures of undeployed wallets are wrapped per ERC-6492 with the deployment call.
    ///
    /// # Errors
    ///
    /// [`SignerKitError::InsufficientWeight`] below the threshold, or the failure of a
    /// collaborator.
    pub async fn complete(&self, id_or_signature_id: &str) -> SignerKitResult<Bytes> {
        let mut record = self.find(id_or_signature_id).await?;
        if let MessageStatus::Signed { message_signature } = &record.status {
            return Ok(message_signature.clone());
        }

        let request = self
            .requests
            .get_pending(&record.signature_id, Action::SignMessage)
            .await?;
        let (weight, threshold) = (request.envelope.weight(), request.envelope.threshold());
        if weight < threshold {
            return Err(SignerKitError::InsufficientWeight { weight, threshold });
        }

        let view = on_chain_view(
            self.state.as_ref(),
            self.chain.as_ref(),
            record.wallet,
            record.chain_id,
        )
        .await?;
        let signature = request
            .envelope
            .encode_chained_signature(&view.pending_updates);
        let message_signature = if view.deployed {
            signature
        } else {
            let deploy = self.context.deploy_call(view.deploy_image_hash);
            let mut wrapped = (deploy.to, deploy.data, signature).abi_encode_params();
            wrapped.extend_from_slice(&ERC6492_MAGIC);
            Bytes::from(wrapped)
        };

        self.requests.complete(&record.signature_id).await?;
        record.status = MessageStatus::Signed {
            message_signature: message_signature.clone(),
        };
        info!(id = %record.id, wallet = %record.wallet, "message signed");
        self.store.set(record.id.clone(), record).await?;
        Ok(message_signature)
    }

    /// Deletes a message, cancelling its request if it is still pending.
    ///
    /// # Errors
    ///
    /// [`SignerKitError::MessageNotFound`] if there is no such message.
    pub async fn delete(&self, id_or_signature_id: &str) -> SignerKitResult<()> {
        let record = self.find(id_or_signature_id).await?;
        match self.requests.get_base(&record.signature_id).await {
            Ok(request) if request.status.is_pending() => {
                self.requests.cancel(&record.signature_id).await?;
            }
            Ok(_) | Err(SignerKitError::SignatureRequestNotFound(_)) => {}
            Err(err) => return Err(err),
        }
        self.store.del(&record.id).await
    }

    /// Reads a message by its id or the id of its signature request.
    ///
    /// # Errors
    ///
    /// [`SignerKitError::MessageNotFound`] if there is no such message.
    pub async fn get(&self, id_or_signature_id: &str) -> SignerKitResult<MessageRecord> {
        self.find(id_or_signature_id).await
    }

    async fn find(&self, id_or_signature_id: &str) -> SignerKitResult<MessageRecord> {
        if let Some(record) = self.store.get(&id_or_signature_id.to_string()).await? {
            return Ok(record);
        }
        self.store
            .list()
            .await?
            .into_iter()
            .find(|record| record.signature_id == id_or_signature_id)
            .ok_or_else(|| SignerKitError::MessageNotFound(id_or_signature_id.to_string()))
    }

    /// Lists every message, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list(&self) -> SignerKitResult<Vec<MessageRecord>> {
        self.store.list().await
    }

    /// Pushes the message list whenever a message changes.
    #[must_use]
    pub fn on_messages_update(&self, trigger: bool) -> Subscription<Vec<MessageRecord>> {
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
