//! Identity-backed login signers.
//!
//! Email OTP and OAuth logins do not hold the login key locally. The identity instrument holds
//! it and signs on behalf of an ephemeral auth key once the user proved control of the
//! identity. Authentication is two-phase: [`IdentityInstrument::commit_verifier`] opens a
//! challenge, [`IdentityInstrument::complete_auth`] answers it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::UpdateNotifier;
use crate::error::{SignerKitError, SignerKitResult};
use crate::primitives::{Address, Bytes, B256};
use crate::signer::Signer;

/// A challenge the identity instrument can verify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Challenge {
    /// One-time password sent to `email`.
    EmailOtp {
        /// Address the code is sent to.
        email: String,
    },
    /// OAuth authorization code flow with PKCE.
    #[serde(rename_all = "camelCase")]
    AuthCodePkce {
        /// Token issuer.
        issuer: String,
        /// OAuth client id.
        audience: String,
        /// Redirect URI the code is delivered to.
        redirect_uri: String,
        /// `base64url(sha256(code_verifier))`.
        code_challenge: String,
    },
}

/// Result of opening a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResult {
    /// Identifier of the opened challenge.
    pub verifier: String,
    /// Hint to show the user (masked email, account name).
    pub login_hint: String,
    /// Server challenge mixed into OTP answers.
    pub challenge: String,
}

/// An answer to an opened challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Answer {
    /// `keccak256(challenge ‖ code)` of the one-time password.
    Otp {
        /// Hex answer.
        answer: String,
    },
    /// Authorization code returned by the OAuth provider.
    #[serde(rename_all = "camelCase")]
    AuthCode {
        /// The code.
        code: String,
        /// PKCE verifier the challenge was derived from.
        code_verifier: String,
    },
}

/// The authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Issuer of the identity.
    pub issuer: String,
    /// Subject within the issuer.
    pub subject: String,
    /// Email, when known.
    pub email: Option<String>,
}

/// Result of a completed authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    /// Login signer bound to the identity.
    pub signer: Address,
    /// The identity.
    pub identity: Identity,
}

/// Failures reported by the identity instrument.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Wrong answer; the challenge stays open.
    #[error("answer incorrect")]
    AnswerIncorrect,
    /// The challenge expired.
    #[error("challenge expired")]
    ChallengeExpired,
    /// Too many wrong answers.
    #[error("too many attempts")]
    TooManyAttempts,
    /// Any other service failure.
    #[error("identity service: {0}")]
    Service(String),
}

impl From<IdentityError> for SignerKitError {
    fn from(error: IdentityError) -> Self {
        match error {
            IdentityError::AnswerIncorrect => Self::AnswerIncorrect,
            IdentityError::ChallengeExpired => Self::ChallengeExpired,
            IdentityError::TooManyAttempts => Self::TooManyAttempts,
            IdentityError::Service(reason) => Self::Identity(reason),
        }
    }
}

/// The identity instrument service.
#[async_trait]
pub trait IdentityInstrument: Send + Sync + std::fmt::Debug {
    /// Opens `challenge` for `auth_key`.
    async fn commit_verifier(
        &self,
        auth_key: Address,
        challenge: &Challenge,
    ) -> Result<CommitResult, IdentityError>;

    /// Answers the challenge opened by `commit_verifier`.
    async fn complete_auth(
        &self,
        auth_key: Address,
        verifier: &str,
        answer: &Answer,
    ) -> Result<AuthResult, IdentityError>;

    /// Signs `digest` with the login signer bound to `auth_key`.
    async fn sign(
        &self,
        auth_key: Address,
        signer: Address,
        digest: B256,
    ) -> Result<Bytes, IdentityError>;
}

/// A login signer held by the identity instrument.
#[derive(Debug, Clone)]
pub struct IdentitySigner {
    instrument: Arc<dyn IdentityInstrument>,
    auth_key: Arc<dyn Signer>,
    address: Address,
}

impl IdentitySigner {
    pub(crate) fn new(
        instrument: Arc<dyn IdentityInstrument>,
        auth_key: Arc<dyn Signer>,
        address: Address,
    ) -> Self {
        Self {
            instrument,
            auth_key,
            address,
        }
    }
}

#[async_trait]
impl Signer for IdentitySigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_digest(&self, digest: B256) -> SignerKitResult<Bytes> {
        Ok(self
            .instrument
            .sign(self.auth_key.address(), self.address, digest)
            .await?)
    }
}

/// Authenticated identity signers, shared by the identity handlers.
#[derive(Debug)]
pub struct IdentityKeys {
    signers: RwLock<HashMap<Address, Arc<dyn Signer>>>,
    updates: UpdateNotifier,
}

impl IdentityKeys {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            signers: RwLock::new(HashMap::new()),
            updates: UpdateNotifier::new(),
        }
    }

    pub(crate) fn insert(&self, signer: Arc<dyn Signer>) {
        if let Ok(mut signers) = self.signers.write() {
            signers.insert(signer.address(), signer);
        }
        self.updates.notify();
    }

    pub(crate) fn get(&self, address: Address) -> Option<Arc<dyn Signer>> {
        self.signers.read().ok()?.get(&address).cloned()
    }

    pub(crate) fn subscribe(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.updates.subscribe()
    }
}

impl Default for IdentityKeys {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_errors_map_to_interaction_failures() {
        assert!(matches!(
            SignerKitError::from(IdentityError::AnswerIncorrect),
            SignerKitError::AnswerIncorrect
        ));
        assert!(matches!(
            SignerKitError::from(IdentityError::Service("down".to_string())),
            SignerKitError::Identity(_)
        ));
    }
}
