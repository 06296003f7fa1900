//! The host-facing entry point wiring every controller together.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chain::ChainProvider;
use crate::config::{OAuthProvider, SignerKitConfig};
use crate::error::{SignerKitError, SignerKitResult};
use crate::handlers::identity::{IdentityInstrument, IdentityKeys};
use crate::handlers::{
    DevicesHandler, GuardHandler, GuardService, HandlerRegistry, MnemonicHandler, MnemonicUi,
    OAuthHandler, OAuthRedirectUi, OtpHandler, OtpUi, PasskeyAuthenticator, PasskeyHandler,
    RecoveryHandler,
};
use crate::kinds::{SignerKind, SignerResolver};
use crate::messages::{MessageRecord, Messages};
use crate::primitives::{Address, Clock};
use crate::recovery::{QueuedRecoveryPayload, Recovery};
use crate::sessions::{Attestation, Sessions};
use crate::signatures::{BaseSignatureRequest, SignatureRequests, Signatures};
use crate::signer::{DeviceKeyStore, SignerFactory};
use crate::state::StateProvider;
use crate::store::{MemoryStore, RecordStore};
use crate::transactions::{Relayer, Transaction, Transactions};
use crate::wallets::{
    ConfigurationUpdates, LoginHandlers, WalletRecord, WalletSelector, WalletSettings, Wallets,
};

/// Host-provided services.
#[derive(Debug, Clone)]
pub struct Collaborators {
    /// Witnesses, configurations and trees.
    pub state: Arc<dyn StateProvider>,
    /// On-chain reads.
    pub chain: Arc<dyn ChainProvider>,
    /// Relayers, tried in order when collecting fee options.
    pub relayers: Vec<Arc<dyn Relayer>>,
    /// Keys of this device.
    pub device_keys: Arc<dyn DeviceKeyStore>,
    /// Key generation and mnemonic derivation.
    pub signer_factory: Arc<dyn SignerFactory>,
    /// Identity instrument for email OTP and OAuth logins.
    pub identity: Option<Arc<dyn IdentityInstrument>>,
    /// Platform passkey authenticator.
    pub passkeys: Option<Arc<dyn PasskeyAuthenticator>>,
    /// Guard co-signing service.
    pub guard: Option<Arc<dyn GuardService>>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

/// Record stores backing the controllers.
#[derive(Debug, Clone)]
pub struct Databases {
    /// Signature requests.
    pub signatures: Arc<dyn RecordStore<String, BaseSignatureRequest>>,
    /// Transactions.
    pub transactions: Arc<dyn RecordStore<String, Transaction>>,
    /// Messages.
    pub messages: Arc<dyn RecordStore<String, MessageRecord>>,
    /// Wallets logged in on this device.
    pub wallets: Arc<dyn RecordStore<Address, WalletRecord>>,
    /// Payloads queued on the recovery module.
    pub recovery_queue: Arc<dyn RecordStore<String, QueuedRecoveryPayload>>,
    /// Attestations awaiting the identity signer.
    pub authorizations: Arc<dyn RecordStore<String, Attestation>>,
}

impl Databases {
    /// Volatile stores, lost when the process exits.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            signatures: Arc::new(MemoryStore::new()),
            transactions: Arc::new(MemoryStore::new()),
            messages: Arc::new(MemoryStore::new()),
            wallets: Arc::new(MemoryStore::new()),
            recovery_queue: Arc::new(MemoryStore::new()),
            authorizations: Arc::new(MemoryStore::new()),
        }
    }
}

/// Every controller of a wallet client, sharing one set of stores and collaborators.
#[derive(Debug)]
pub struct Manager {
    signatures: Signatures,
    transactions: Transactions,
    wallets: Wallets,
    messages: Messages,
    recovery: Recovery,
    sessions: Sessions,
    mnemonic: Arc<MnemonicHandler>,
    otp: Option<Arc<OtpHandler>>,
    google: Option<Arc<OAuthHandler>>,
    apple: Option<Arc<OAuthHandler>>,
}

impl Manager {
    /// Wires the controllers.
    #[allow(clippy::too_many_lines)]
    #[must_use]
    pub fn new(config: &SignerKitConfig, collaborators: Collaborators, databases: Databases) -> Self {
        let Collaborators {
            state,
            chain,
            relayers,
            device_keys,
            signer_factory,
            identity,
            passkeys,
            guard,
            clock,
        } = collaborators;

        let requests = Arc::new(SignatureRequests::new(
            databases.signatures,
            clock.clone(),
            config.signature_prune_delay_ms,
            config.default_origin.clone(),
        ));
        let guard_address = config.guard.map(|guard| guard.address);
        let extensions = config.extensions;

        let identity_keys = Arc::new(IdentityKeys::new());
        let mnemonic = Arc::new(MnemonicHandler::new(
            signer_factory.clone(),
            requests.clone(),
        ));
        let otp = identity.as_ref().map(|instrument| {
            Arc::new(OtpHandler::new(
                instrument.clone(),
                signer_factory.clone(),
                identity_keys.clone(),
                requests.clone(),
                databases.wallets.clone(),
            ))
        });
        let oauth = |kind, provider: Option<&OAuthProvider>| {
            identity
                .as_ref()
                .zip(provider)
                .map(|(instrument, provider)| {
                    Arc::new(OAuthHandler::new(
                        kind,
                        provider.clone(),
                        instrument.clone(),
                        signer_factory.clone(),
                        identity_keys.clone(),
                        requests.clone(),
                    ))
                })
        };
        let google = oauth(SignerKind::LoginGooglePkce, config.oauth.google.as_ref());
        let apple = oauth(SignerKind::LoginApple, config.oauth.apple.as_ref());
        let passkey = passkeys.map(|authenticator| {
            Arc::new(PasskeyHandler::new(
                authenticator,
                extensions.passkeys,
                requests.clone(),
            ))
        });

        let mut handlers = HandlerRegistry::new();
        handlers.register(Arc::new(DevicesHandler::new(
            device_keys.clone(),
            requests.clone(),
        )));
        handlers.register(mnemonic.clone());
        handlers.register(Arc::new(RecoveryHandler::new(
            databases.recovery_queue.clone(),
            state.clone(),
            extensions.recovery,
            requests.clone(),
            clock.clone(),
        )));
        if let Some(handler) = &otp {
            handlers.register(handler.clone());
        }
        for handler in [&google, &apple].into_iter().flatten() {
            handlers.register(handler.clone());
        }
        if let Some(handler) = &passkey {
            handlers.register(handler.clone());
        }
        match (guard, guard_address) {
            (Some(service), Some(_)) => {
                handlers.register(Arc::new(GuardHandler::new(service, requests.clone())));
            }
            (None, Some(address)) => {
                warn!(%address, "guard configured without a guard service, it will not sign");
            }
            _ => {}
        }

        let signatures = Signatures::new(
            requests.clone(),
            SignerResolver::new(state.clone(), extensions, guard_address),
            Arc::new(handlers),
        );
        let updates = ConfigurationUpdates::new(state.clone(), requests.clone());
        let transactions = Transactions::new(
            databases.transactions,
            requests.clone(),
            state.clone(),
            chain.clone(),
            relayers,
            config.context.clone(),
            clock.clone(),
            config.default_origin.clone(),
        );
        let wallets = Wallets::new(
            databases.wallets,
            state.clone(),
            updates.clone(),
            device_keys,
            LoginHandlers {
                mnemonic: mnemonic.clone(),
                otp: otp.clone(),
                google: google.clone(),
                apple: apple.clone(),
                passkeys: passkey,
            },
            WalletSettings {
                context: config.context.clone(),
                extensions,
                guard: guard_address,
                recovery: config.recovery,
            },
            clock.clone(),
        );
        let messages = Messages::new(
            databases.messages,
            requests,
            state.clone(),
            chain.clone(),
            config.context.clone(),
            config.default_origin.clone(),
        );
        let recovery = Recovery::new(
            databases.recovery_queue,
            updates.clone(),
            state.clone(),
            chain,
            mnemonic.clone(),
            extensions.recovery,
            config.recovery,
            config.networks.clone(),
            clock,
        );
        let sessions = Sessions::new(updates, state, databases.authorizations, extensions.sessions);

        info!(environment = %config.environment, "manager ready");
        Self {
            signatures,
            transactions,
            wallets,
            messages,
            recovery,
            sessions,
            mnemonic,
            otp,
            google,
            apple,
        }
    }

    /// Signature requests.
    #[must_use]
    pub const fn signatures(&self) -> &Signatures {
        &self.signatures
    }

    /// Transactions.
    #[must_use]
    pub const fn transactions(&self) -> &Transactions {
        &self.transactions
    }

    /// Signup, login, logout and devices.
    #[must_use]
    pub const fn wallets(&self) -> &Wallets {
        &self.wallets
    }

    /// Message signatures.
    #[must_use]
    pub const fn messages(&self) -> &Messages {
        &self.messages
    }

    /// Recovery signers and queued recovery payloads.
    #[must_use]
    pub const fn recovery(&self) -> &Recovery {
        &self.recovery
    }

    /// Session manager tree and implicit sessions.
    #[must_use]
    pub const fn sessions(&self) -> &Sessions {
        &self.sessions
    }

    /// Registers the prompt asking for mnemonic phrases.
    pub fn register_mnemonic_ui(&self, ui: Arc<dyn MnemonicUi>) {
        self.mnemonic.register_ui(ui);
    }

    /// Registers the prompt collecting email one-time passwords.
    ///
    /// # Errors
    ///
    /// [`SignerKitError::IdentityNotConfigured`] without an identity instrument.
    pub fn register_otp_ui(&self, ui: Arc<dyn OtpUi>) -> SignerKitResult<()> {
        let handler = self
            .otp
            .as_ref()
            .ok_or(SignerKitError::IdentityNotConfigured)?;
        handler.register_ui(ui);
        Ok(())
    }

    /// Registers the redirect flow of the OAuth provider behind `kind`.
    ///
    /// # Errors
    ///
    /// [`SignerKitError::InvalidInput`] if `kind` is not an OAuth login, and
    /// [`SignerKitError::IdentityNotConfigured`] if the provider is not configured.
    pub fn register_oauth_ui(
        &self,
        kind: SignerKind,
        ui: Arc<dyn OAuthRedirectUi>,
    ) -> SignerKitResult<()> {
        let handler = match kind {
            SignerKind::LoginGooglePkce => self.google.as_ref(),
            SignerKind::LoginApple => self.apple.as_ref(),
            _ => {
                return Err(SignerKitError::InvalidInput {
                    attribute: "kind".to_string(),
                    reason: format!("{kind} is not an OAuth login"),
                })
            }
        };
        handler
            .ok_or(SignerKitError::IdentityNotConfigured)?
            .register_ui(ui);
        Ok(())
    }

    /// Registers the prompt choosing among existing wallets at signup.
    pub fn register_wallet_selector(&self, selector: Arc<dyn WalletSelector>) {
        self.wallets.register_wallet_selector(selector);
    }

    /// Prunes terminal signature requests every `interval` until the returned task is aborted.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start_pruning(&self, interval: Duration) -> JoinHandle<()> {
        let requests = self.signatures.requests().clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match requests.prune().await {
                    Ok(pruned) => debug!(pruned, "pruning pass finished"),
                    Err(error) => warn!(%error, "pruning pass failed"),
                }
            }
        })
    }
}
