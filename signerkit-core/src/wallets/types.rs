use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

use crate::kinds::SignerKind;
use crate::primitives::Address;

/// Session state of a wallet on this device.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum WalletStatus {
    /// Usable.
    Ready,
    /// Waiting for the login configuration update to be signed.
    LoggingIn,
    /// Waiting for the logout configuration update to be signed.
    LoggingOut,
}

/// A wallet this device is logged in to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRecord {
    /// Wallet address.
    pub address: Address,
    /// Session state.
    pub status: WalletStatus,
    /// Device key of this device.
    pub device: Address,
    /// Kind of the wallet's login signer.
    pub login_type: SignerKind,
    /// Email of the login identity, for email OTP logins.
    #[serde(default)]
    pub login_email: Option<String>,
    /// Login time, in milliseconds.
    pub login_date: u64,
    /// Whether the wallet is co-signed by the guard.
    pub use_guard: bool,
}

/// Login signer created at signup.
#[derive(Debug, Clone)]
pub enum SignupCredential {
    /// A mnemonic phrase.
    Mnemonic(SecretString),
    /// An identity key behind an email one-time password.
    EmailOtp {
        /// Email receiving the code.
        email: String,
    },
    /// An identity key behind an OAuth provider.
    OAuth {
        /// [`SignerKind::LoginGooglePkce`] or [`SignerKind::LoginApple`].
        kind: SignerKind,
    },
    /// A new passkey.
    Passkey {
        /// Display name of the credential.
        name: String,
    },
}

/// Arguments of [`super::Wallets::signup`].
#[derive(Debug, Clone)]
pub struct SignupArgs {
    /// Login signer.
    pub credential: SignupCredential,
    /// Add the guard co-signer.
    pub use_guard: bool,
    /// Register the device on the recovery module.
    pub use_recovery: bool,
    /// Create a new wallet even if the login signer already has wallets.
    pub force_create: bool,
}

/// Arguments of [`super::Wallets::login`].
#[derive(Debug, Clone)]
pub enum LoginArgs {
    /// A known wallet.
    Wallet {
        /// Wallet address.
        address: Address,
        /// Email of the login identity, needed to sign with an email OTP login.
        email: Option<String>,
    },
    /// The wallet of a mnemonic signer.
    Mnemonic(SecretString),
}

/// Choice made by the [`WalletSelector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletSelection {
    /// Create a fresh wallet anyway.
    CreateNew,
    /// Log in to one of the existing wallets.
    UseExisting(Address),
    /// Stop.
    Abort,
}

/// Host prompt choosing among the wallets of a login signer.
#[async_trait]
pub trait WalletSelector: Send + Sync + std::fmt::Debug {
    /// Picks what to do given the wallets `signer` already belongs to.
    async fn select(&self, signer: Address, wallets: &[Address]) -> WalletSelection;
}

/// Result of [`super::Wallets::signup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignupOutcome {
    /// A new wallet was created and is ready.
    Created(Address),
    /// An existing wallet was chosen; its login request awaits signatures.
    LoggingIn {
        /// Wallet address.
        wallet: Address,
        /// The `login` signature request.
        request_id: String,
    },
    /// The selector aborted.
    Aborted,
}
