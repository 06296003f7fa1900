//! The wallet lifecycle: signup, login, logout and device management.
//!
//! Every change to a wallet's signers is a configuration update signed by the current
//! configuration (see [`ConfigurationUpdates`]). Local session state lives in a
//! [`WalletRecord`] per wallet.

use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::config::{Extensions, RecoveryDefaults, WalletContext};
use crate::envelope::{Payload, SignerSignature};
use crate::error::{SignerKitError, SignerKitResult};
use crate::handlers::{MnemonicHandler, OAuthHandler, OtpHandler, PasskeyCredential, PasskeyHandler};
use crate::kinds::{sign_witness, SignerKind, WitnessMessage};
use crate::primitives::{Address, Clock};
use crate::signatures::Action;
use crate::signer::{DeviceKeyStore, Signer};
use crate::state::{StateProvider, StoredTree};
use crate::store::RecordStore;
use crate::subscription::{watch, Subscription};
use crate::topology::recovery::RecoveryLeaf;
use crate::topology::sessions::SessionsTopology;
use crate::topology::{build_capped_tree, CappedMember, Topology, WalletTopology};

mod types;
mod updates;

pub use types::{
    LoginArgs, SignupArgs, SignupCredential, SignupOutcome, WalletRecord, WalletSelection,
    WalletSelector, WalletStatus,
};
pub use updates::ConfigurationUpdates;

/// Handlers able to create login signers.
#[derive(Debug, Clone)]
pub struct LoginHandlers {
    /// Mnemonic logins.
    pub mnemonic: Arc<MnemonicHandler>,
    /// Email OTP logins, when an identity instrument is configured.
    pub otp: Option<Arc<OtpHandler>>,
    /// Google logins.
    pub google: Option<Arc<OAuthHandler>>,
    /// Apple logins.
    pub apple: Option<Arc<OAuthHandler>>,
    /// Passkey logins.
    pub passkeys: Option<Arc<PasskeyHandler>>,
}

/// Deployment settings the lifecycle composes configurations with.
#[derive(Debug, Clone)]
pub struct WalletSettings {
    /// Factory and modules used to derive wallet addresses.
    pub context: WalletContext,
    /// Module addresses.
    pub extensions: Extensions,
    /// Guard co-signer, if any.
    pub guard: Option<Address>,
    /// Timelock of new recovery signers.
    pub recovery: RecoveryDefaults,
}

enum LoginSigner {
    Key(Arc<dyn Signer>),
    Passkey {
        handler: Arc<PasskeyHandler>,
        credential: PasskeyCredential,
    },
}

impl LoginSigner {
    fn member(&self) -> CappedMember {
        match self {
            Self::Key(signer) => CappedMember::signer(signer.address()),
            Self::Passkey {
                handler,
                credential,
            } => CappedMember::sapient(handler.module(), credential.image_hash),
        }
    }

    async fn witness(
        &self,
        wallet: Address,
        kind: SignerKind,
        timestamp: u64,
    ) -> SignerKitResult<(Payload, SignerSignature)> {
        match self {
            Self::Key(signer) => sign_witness(signer.as_ref(), wallet, kind, timestamp).await,
            Self::Passkey {
                handler,
                credential,
            } => {
                let payload = WitnessMessage::new(wallet, kind, timestamp).payload()?;
                let signature = handler
                    .sign(credential, payload.hash(wallet, 0))
                    .await?
                    .ok_or(SignerKitError::UserCancelled)?;
                Ok((payload, signature))
            }
        }
    }
}

/// Drives wallets through signup, login and logout on this device.
#[derive(Debug)]
pub struct Wallets {
    store: Arc<dyn RecordStore<Address, WalletRecord>>,
    state: Arc<dyn StateProvider>,
    updates: ConfigurationUpdates,
    devices: Arc<dyn DeviceKeyStore>,
    login: LoginHandlers,
    settings: WalletSettings,
    clock: Arc<dyn Clock>,
    selector: RwLock<Option<Arc<dyn WalletSelector>>>,
}

impl Wallets {
    /// Creates the lifecycle.
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore<Address, WalletRecord>>,
        state: Arc<dyn StateProvider>,
        updates: ConfigurationUpdates,
        devices: Arc<dyn DeviceKeyStore>,
        login: LoginHandlers,
        settings: WalletSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            state,
            updates,
            devices,
            login,
            settings,
            clock,
            selector: RwLock::new(None),
        }
    }

    /// Registers the prompt used when a login signer already has wallets.
    pub fn register_wallet_selector(&self, selector: Arc<dyn WalletSelector>) {
        if let Ok(mut slot) = self.selector.write() {
            *slot = Some(selector);
        }
    }

    async fn select(&self, signer: Address, wallets: &[Address]) -> Option<WalletSelection> {
        let selector = self.selector.read().ok()?.clone()?;
        Some(selector.select(signer, wallets).await)
    }

    /// Creates a wallet for a new login signer, or logs in to one of its wallets if the wallet
    /// selector says so.
    ///
    /// Without a registered selector a new wallet is always created.
    ///
    /// # Errors
    ///
    /// Fails if the login flow fails or is cancelled ([`SignerKitError::UserCancelled`]), if a
    /// guard is requested but not configured, or if a collaborator fails.
    pub async fn signup(&self, args: SignupArgs) -> SignerKitResult<SignupOutcome> {
        let (login, kind, login_email) = self.login_signer(args.credential).await?;
        let member = login.member();

        if !args.force_create {
            let existing = self
                .state
                .wallets_for_signer(member.address, member.image_hash)
                .await?;
            if !existing.is_empty() {
                match self.select(member.address, &existing).await {
                    None | Some(WalletSelection::CreateNew) => {
                        debug!(signer = %member.address, "creating another wallet for signer");
                    }
                    Some(WalletSelection::UseExisting(wallet)) => {
                        if !existing.contains(&wallet) {
                            return Err(SignerKitError::InvalidInput {
                                attribute: "wallet".to_string(),
                                reason: format!("{wallet} does not belong to the signer"),
                            });
                        }
                        let request_id = self.login_existing(wallet, login_email).await?;
                        return Ok(SignupOutcome::LoggingIn { wallet, request_id });
                    }
                    Some(WalletSelection::Abort) => return Ok(SignupOutcome::Aborted),
                }
            }
        }

        let guard = if args.use_guard {
            Some(self.settings.guard.ok_or(SignerKitError::GuardNotConfigured)?)
        } else {
            None
        };
        let device = self.devices.create().await?;
        let mut parts = WalletTopology {
            login: build_capped_tree(&[member]),
            devices: build_capped_tree(&[CappedMember::signer(device.address())]),
            guard: guard.map(|guard| build_capped_tree(&[CappedMember::signer(guard)])),
            modules: Topology::empty(),
        };

        let identity_signer = match &login {
            LoginSigner::Key(signer) => signer.address(),
            LoginSigner::Passkey { .. } => device.address(),
        };
        let sessions = StoredTree::Sessions {
            sessions: SessionsTopology::new(identity_signer),
        };
        parts.upsert_module(self.settings.extensions.sessions, sessions.image_hash()?);
        self.state.save_tree(sessions).await?;
        if args.use_recovery {
            let recovery = StoredTree::Recovery {
                leaves: vec![self.recovery_leaf(device.address())],
            };
            parts.upsert_module(self.settings.extensions.recovery, recovery.image_hash()?);
            self.state.save_tree(recovery).await?;
        }

        let configuration = parts.to_config(0);
        let wallet = self
            .settings
            .context
            .counterfactual_address(configuration.image_hash());
        self.state.save_wallet(wallet, configuration).await?;

        let now = self.clock.now_millis();
        self.save_witness(wallet, &LoginSigner::Key(device.clone()), SignerKind::LocalDevice, now)
            .await?;
        self.save_witness(wallet, &login, kind, now).await?;

        self.store
            .set(
                wallet,
                WalletRecord {
                    address: wallet,
                    status: WalletStatus::Ready,
                    device: device.address(),
                    login_type: kind,
                    login_email,
                    login_date: now,
                    use_guard: guard.is_some(),
                },
            )
            .await?;
        info!(%wallet, login = %kind, device = %device.address(), "wallet created");
        Ok(SignupOutcome::Created(wallet))
    }

    async fn login_signer(
        &self,
        credential: SignupCredential,
    ) -> SignerKitResult<(LoginSigner, SignerKind, Option<String>)> {
        match credential {
            SignupCredential::Mnemonic(mnemonic) => {
                let signer = self.login.mnemonic.signer_from_mnemonic(&mnemonic)?;
                self.login.mnemonic.add_ready_signer(signer.clone());
                Ok((LoginSigner::Key(signer), SignerKind::LoginMnemonic, None))
            }
            SignupCredential::EmailOtp { email } => {
                let otp = self
                    .login
                    .otp
                    .as_ref()
                    .ok_or(SignerKitError::IdentityNotConfigured)?;
                let signer = otp
                    .authenticate(&email)
                    .await?
                    .ok_or(SignerKitError::UserCancelled)?;
                Ok((LoginSigner::Key(signer), SignerKind::LoginEmailOtp, Some(email)))
            }
            SignupCredential::OAuth { kind } => {
                let handler = match kind {
                    SignerKind::LoginGooglePkce => self.login.google.as_ref(),
                    SignerKind::LoginApple => self.login.apple.as_ref(),
                    other => {
                        return Err(SignerKitError::InvalidInput {
                            attribute: "kind".to_string(),
                            reason: format!("{other} is not an OAuth login"),
                        })
                    }
                }
                .ok_or(SignerKitError::IdentityNotConfigured)?;
                let signer = handler
                    .authenticate()
                    .await?
                    .ok_or(SignerKitError::UserCancelled)?;
                Ok((LoginSigner::Key(signer), kind, None))
            }
            SignupCredential::Passkey { name } => {
                let handler = self
                    .login
                    .passkeys
                    .clone()
                    .ok_or(SignerKitError::PasskeysNotConfigured)?;
                let credential = handler.create_credential(&name).await?;
                Ok((
                    LoginSigner::Passkey {
                        handler,
                        credential,
                    },
                    SignerKind::LoginPasskey,
                    None,
                ))
            }
        }
    }

    async fn save_witness(
        &self,
        wallet: Address,
        signer: &LoginSigner,
        kind: SignerKind,
        timestamp: u64,
    ) -> SignerKitResult<()> {
        let (payload, signature) = signer.witness(wallet, kind, timestamp).await?;
        self.state
            .save_witnesses(wallet, 0, payload, vec![signature])
            .await
    }

    const fn recovery_leaf(&self, signer: Address) -> RecoveryLeaf {
        RecoveryLeaf {
            signer,
            required_delta_time: self.settings.recovery.required_delta_time,
            min_timestamp: self.settings.recovery.min_timestamp,
        }
    }

    /// Adds this device to an existing wallet. Returns the id of the `login` request, which
    /// the wallet's login signer must sign.
    ///
    /// # Errors
    ///
    /// [`SignerKitError::WalletAlreadyLoggedIn`] if this device already has the wallet,
    /// [`SignerKitError::UiNotRegistered`] if a mnemonic has several wallets and no selector is
    /// registered, or a collaborator failure.
    pub async fn login(&self, args: LoginArgs) -> SignerKitResult<String> {
        let (wallet, email) = match args {
            LoginArgs::Wallet { address, email } => (address, email),
            LoginArgs::Mnemonic(mnemonic) => {
                let signer = self.login.mnemonic.signer_from_mnemonic(&mnemonic)?;
                let wallets = self.state.wallets_for_signer(signer.address(), None).await?;
                self.login.mnemonic.add_ready_signer(signer.clone());
                let wallet = match wallets.as_slice() {
                    [] => {
                        return Err(SignerKitError::InvalidInput {
                            attribute: "mnemonic".to_string(),
                            reason: "the mnemonic signer has no wallets".to_string(),
                        })
                    }
                    [wallet] => *wallet,
                    _ => match self.select(signer.address(), &wallets).await {
                        None => return Err(SignerKitError::UiNotRegistered("wallet-selector")),
                        Some(WalletSelection::UseExisting(wallet)) if wallets.contains(&wallet) => {
                            wallet
                        }
                        Some(_) => return Err(SignerKitError::UserCancelled),
                    },
                };
                (wallet, None)
            }
        };
        self.login_existing(wallet, email).await
    }

    async fn login_existing(
        &self,
        wallet: Address,
        login_email: Option<String>,
    ) -> SignerKitResult<String> {
        if self.store.get(&wallet).await?.is_some() {
            return Err(SignerKitError::WalletAlreadyLoggedIn(wallet));
        }
        let (_, mut parts) = self.updates.latest(wallet).await?;
        let login_type = self.login_kind(wallet, &parts).await?;

        let device = self.devices.create().await?;
        let now = self.clock.now_millis();
        self.save_witness(wallet, &LoginSigner::Key(device.clone()), SignerKind::LocalDevice, now)
            .await?;

        let mut members = parts.device_members();
        members.push(CappedMember::signer(device.address()));
        parts.devices = build_capped_tree(&members);
        let leaf = self.recovery_leaf(device.address());
        self.updates
            .edit_recovery(&mut parts, self.settings.extensions.recovery, |leaves| {
                leaves.push(leaf);
            })
            .await?;

        let request_id = self
            .updates
            .request(wallet, &parts, Action::Login, None)
            .await?;
        self.store
            .set(
                wallet,
                WalletRecord {
                    address: wallet,
                    status: WalletStatus::LoggingIn,
                    device: device.address(),
                    login_type,
                    login_email,
                    login_date: now,
                    use_guard: parts.guard.is_some(),
                },
            )
            .await?;
        info!(%wallet, device = %device.address(), %request_id, "login requested");
        Ok(request_id)
    }

    async fn login_kind(&self, wallet: Address, parts: &WalletTopology) -> SignerKitResult<SignerKind> {
        let Some(member) = parts.login_members().into_iter().next() else {
            return Ok(SignerKind::Unknown);
        };
        let witness = match member.image_hash {
            Some(image_hash) => {
                self.state
                    .get_witness_for_sapient(wallet, member.address, image_hash)
                    .await?
            }
            None => self.state.get_witness_for(wallet, member.address).await?,
        };
        Ok(witness
            .as_ref()
            .map_or(SignerKind::Unknown, WitnessMessage::kind_of))
    }

    /// Applies a signed `login` request.
    ///
    /// # Errors
    ///
    /// Fails if `id` is not a pending `login` request or lacks weight.
    pub async fn complete_login(&self, id: &str) -> SignerKitResult<()> {
        self.updates.requests().get_pending(id, Action::Login).await?;
        self.complete_configuration_update(id).await
    }

    /// Removes this device from `wallet`. Returns the id of the `logout` request, or `None`
    /// with `skip_remove_device`, which only forgets the wallet locally.
    ///
    /// # Errors
    ///
    /// [`SignerKitError::WalletNotFound`] if this device does not have the wallet.
    pub async fn logout(
        &self,
        wallet: Address,
        skip_remove_device: bool,
    ) -> SignerKitResult<Option<String>> {
        let mut record = self.record(wallet).await?;
        if skip_remove_device {
            self.forget(&record).await?;
            return Ok(None);
        }

        let parts = self.without_device(wallet, record.device).await?;
        let request_id = self
            .updates
            .request(wallet, &parts, Action::Logout, None)
            .await?;
        record.status = WalletStatus::LoggingOut;
        self.store.set(wallet, record).await?;
        info!(%wallet, %request_id, "logout requested");
        Ok(Some(request_id))
    }

    /// Applies a signed `logout` request and forgets the wallet and the device key.
    ///
    /// # Errors
    ///
    /// Fails if `id` is not a pending `logout` request or lacks weight.
    pub async fn complete_logout(&self, id: &str) -> SignerKitResult<()> {
        self.updates.requests().get_pending(id, Action::Logout).await?;
        self.complete_configuration_update(id).await
    }

    /// Removes another device from `wallet`. Returns the id of the `remote-logout` request.
    ///
    /// # Errors
    ///
    /// [`SignerKitError::InvalidInput`] for this device (use [`Wallets::logout`]) or a device
    /// the wallet does not have.
    pub async fn remote_logout(&self, wallet: Address, device: Address) -> SignerKitResult<String> {
        let record = self.record(wallet).await?;
        if device == record.device {
            return Err(SignerKitError::InvalidInput {
                attribute: "device".to_string(),
                reason: "use logout to remove this device".to_string(),
            });
        }
        let parts = self.without_device(wallet, device).await?;
        self.updates
            .request(wallet, &parts, Action::RemoteLogout, None)
            .await
    }

    async fn without_device(
        &self,
        wallet: Address,
        device: Address,
    ) -> SignerKitResult<WalletTopology> {
        let (_, mut parts) = self.updates.latest(wallet).await?;
        let mut members = parts.device_members();
        let before = members.len();
        members.retain(|member| member.address != device);
        if members.len() == before {
            return Err(SignerKitError::InvalidInput {
                attribute: "device".to_string(),
                reason: format!("{device} is not a device of {wallet}"),
            });
        }
        parts.devices = build_capped_tree(&members);
        self.updates
            .edit_recovery(&mut parts, self.settings.extensions.recovery, |leaves| {
                leaves.retain(|leaf| leaf.signer != device);
            })
            .await?;
        Ok(parts)
    }

    async fn forget(&self, record: &WalletRecord) -> SignerKitResult<()> {
        self.store.del(&record.address).await?;
        self.devices.remove(record.device).await?;
        info!(wallet = %record.address, "wallet forgotten on this device");
        Ok(())
    }

    async fn record(&self, wallet: Address) -> SignerKitResult<WalletRecord> {
        self.store
            .get(&wallet)
            .await?
            .ok_or(SignerKitError::WalletNotFound(wallet))
    }

    /// Device keys of `wallet`'s latest configuration.
    ///
    /// # Errors
    ///
    /// Fails if the wallet is unknown.
    pub async fn list_devices(&self, wallet: Address) -> SignerKitResult<Vec<Address>> {
        let (_, parts) = self.updates.latest(wallet).await?;
        Ok(parts
            .device_members()
            .into_iter()
            .map(|member| member.address)
            .collect())
    }

    /// Latest configuration of `wallet`, decomposed.
    ///
    /// # Errors
    ///
    /// Fails if the wallet is unknown or its configuration has an unknown shape.
    pub async fn get_configuration(&self, wallet: Address) -> SignerKitResult<WalletTopology> {
        Ok(self.updates.latest(wallet).await?.1)
    }

    /// Wallets this device has.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list(&self) -> SignerKitResult<Vec<WalletRecord>> {
        self.store.list().await
    }

    /// Record of `wallet`, if this device has it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn get(&self, wallet: Address) -> SignerKitResult<Option<WalletRecord>> {
        self.store.get(&wallet).await
    }

    /// Opens a request moving `wallet` to `parts` at the next checkpoint.
    ///
    /// # Errors
    ///
    /// Fails if the wallet is unknown or a collaborator fails.
    pub async fn request_configuration_update(
        &self,
        wallet: Address,
        parts: &WalletTopology,
        action: Action,
        origin: Option<String>,
    ) -> SignerKitResult<String> {
        self.updates.request(wallet, parts, action, origin).await
    }

    /// Applies a signed configuration update. A `login` marks the wallet ready; a `logout`
    /// forgets it.
    ///
    /// # Errors
    ///
    /// Fails if the request is not a pending configuration update or lacks weight.
    pub async fn complete_configuration_update(&self, id: &str) -> SignerKitResult<()> {
        let completed = self.updates.complete(id).await?;
        let Some(mut record) = self.store.get(&completed.wallet).await? else {
            return Ok(());
        };
        match completed.action {
            Action::Login => {
                record.status = WalletStatus::Ready;
                self.store.set(record.address, record).await?;
                info!(wallet = %completed.wallet, "logged in");
            }
            Action::Logout => self.forget(&record).await?,
            _ => {}
        }
        Ok(())
    }

    /// Pushes the wallet list whenever a wallet record changes.
    #[must_use]
    pub fn on_wallets_update(&self, trigger: bool) -> Subscription<Vec<WalletRecord>> {
        let store = self.store.clone();
        watch(
            self.store.subscribe(),
            Vec::new(),
            |_: &Address| true,
            trigger,
            move || {
                let store = store.clone();
                async move { store.list().await.ok() }
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::ManualClock;
    use crate::signatures::SignatureRequests;
    use crate::signer::MemoryDeviceKeys;
    use crate::state::MemoryStateProvider;
    use crate::store::MemoryStore;
    use crate::test_support::{mnemonic, FakeSignerFactory};
    use crate::topology::get_signers;

    fn wallets(guard: Option<Address>) -> Wallets {
        let clock = Arc::new(ManualClock::new(1_000));
        let state: Arc<dyn StateProvider> = Arc::new(MemoryStateProvider::new());
        let requests = Arc::new(SignatureRequests::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            600_000,
            "test".to_string(),
        ));
        let factory = Arc::new(FakeSignerFactory::default());
        Wallets::new(
            Arc::new(MemoryStore::new()),
            state.clone(),
            ConfigurationUpdates::new(state, requests.clone()),
            Arc::new(MemoryDeviceKeys::new(factory.clone())),
            LoginHandlers {
                mnemonic: Arc::new(MnemonicHandler::new(factory, requests)),
                otp: None,
                google: None,
                apple: None,
                passkeys: None,
            },
            WalletSettings {
                context: WalletContext::default(),
                extensions: Extensions::default(),
                guard,
                recovery: RecoveryDefaults::default(),
            },
            clock,
        )
    }

    fn mnemonic_signup() -> SignupArgs {
        SignupArgs {
            credential: SignupCredential::Mnemonic(mnemonic()),
            use_guard: false,
            use_recovery: false,
            force_create: false,
        }
    }

    #[tokio::test]
    async fn test_signup_composes_wallet_configuration() {
        let wallets = wallets(None);
        let SignupOutcome::Created(wallet) = wallets.signup(mnemonic_signup()).await.unwrap() else {
            panic!("wallet not created");
        };

        let record = wallets.get(wallet).await.unwrap().unwrap();
        assert_eq!(record.status, WalletStatus::Ready);
        assert_eq!(record.login_type, SignerKind::LoginMnemonic);

        let parts = wallets.get_configuration(wallet).await.unwrap();
        assert!(parts.guard.is_none());
        assert_eq!(parts.login_members().len(), 1);
        assert_eq!(parts.device_members(), vec![CappedMember::signer(record.device)]);

        let configuration = parts.to_config(0);
        assert_eq!(configuration.threshold, 1);
        assert!(get_signers(&configuration.topology).is_complete);
    }

    #[tokio::test]
    async fn test_guard_requires_configuration() {
        let wallets = wallets(None);
        let err = wallets
            .signup(SignupArgs {
                use_guard: true,
                ..mnemonic_signup()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SignerKitError::GuardNotConfigured));

        let guard = Address::repeat_byte(0x9a);
        let wallets = self::wallets(Some(guard));
        let SignupOutcome::Created(wallet) = wallets
            .signup(SignupArgs {
                use_guard: true,
                ..mnemonic_signup()
            })
            .await
            .unwrap()
        else {
            panic!("wallet not created");
        };
        let parts = wallets.get_configuration(wallet).await.unwrap();
        assert_eq!(parts.guard, Some(Topology::signer(guard, 1)));
        assert_eq!(parts.to_config(0).threshold, 2);
    }

    #[tokio::test]
    async fn test_login_rejects_logged_in_wallet() {
        let wallets = wallets(None);
        let SignupOutcome::Created(wallet) = wallets.signup(mnemonic_signup()).await.unwrap() else {
            panic!("wallet not created");
        };
        let err = wallets
            .login(LoginArgs::Mnemonic(mnemonic()))
            .await
            .unwrap_err();
        assert!(matches!(err, SignerKitError::WalletAlreadyLoggedIn(w) if w == wallet));
    }

    #[tokio::test]
    async fn test_remote_logout_of_own_device_is_rejected() {
        let wallets = wallets(None);
        let SignupOutcome::Created(wallet) = wallets.signup(mnemonic_signup()).await.unwrap() else {
            panic!("wallet not created");
        };
        let device = wallets.get(wallet).await.unwrap().unwrap().device;
        assert!(matches!(
            wallets.remote_logout(wallet, device).await,
            Err(SignerKitError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_logout_skipping_device_removal_forgets_locally() {
        let wallets = wallets(None);
        let SignupOutcome::Created(wallet) = wallets.signup(mnemonic_signup()).await.unwrap() else {
            panic!("wallet not created");
        };
        assert_eq!(wallets.logout(wallet, true).await.unwrap(), None);
        assert!(wallets.get(wallet).await.unwrap().is_none());
        assert!(wallets.devices.list().await.unwrap().is_empty());
    }
}
