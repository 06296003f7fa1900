use std::sync::{Arc, Mutex, RwLock};

use alloy_primitives::keccak256;
use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info};

use super::identity::{
    Answer, AuthResult, Challenge, IdentityError, IdentityInstrument, IdentityKeys, IdentitySigner,
};
use super::{ecdsa_handle, ActionMessage, Handler, SignerHandle, SignerStatus, UnavailableReason};
use crate::error::{SignerKitError, SignerKitResult};
use crate::kinds::SignerKind;
use crate::primitives::{Address, ImageHash};
use crate::signatures::{BaseSignatureRequest, SignatureRequests};
use crate::signer::{Signer, SignerFactory};
use crate::store::RecordStore;
use crate::wallets::WalletRecord;

/// Host prompt collecting the one-time password.
pub trait OtpUi: Send + Sync + std::fmt::Debug {
    /// Shows the prompt. The host answers through `responder`, possibly several times.
    fn present(&self, login_hint: String, responder: OtpResponder);
}

type Outcome = SignerKitResult<AuthResult>;

#[derive(Debug)]
struct ResponderInner {
    instrument: Arc<dyn IdentityInstrument>,
    auth_key: Address,
    verifier: String,
    challenge: String,
    done: Mutex<Option<oneshot::Sender<Outcome>>>,
}

/// Answers an open OTP challenge.
///
/// A wrong code leaves the challenge open for another attempt. Expiry, too many attempts and
/// [`OtpResponder::cancel`] close it.
#[derive(Debug, Clone)]
pub struct OtpResponder {
    inner: Arc<ResponderInner>,
}

impl OtpResponder {
    /// Submits `code`.
    ///
    /// # Errors
    ///
    /// [`SignerKitError::AnswerIncorrect`] if the code is wrong, or the error that closed the
    /// challenge.
    pub async fn respond(&self, code: &str) -> SignerKitResult<()> {
        if self.is_closed() {
            return Err(SignerKitError::ChallengeExpired);
        }
        let mut preimage = self.inner.challenge.as_bytes().to_vec();
        preimage.extend_from_slice(code.trim().as_bytes());
        let answer = Answer::Otp {
            answer: hex::encode(keccak256(preimage)),
        };
        match self
            .inner
            .instrument
            .complete_auth(self.inner.auth_key, &self.inner.verifier, &answer)
            .await
        {
            Ok(result) => {
                self.finish(Ok(result));
                Ok(())
            }
            Err(IdentityError::AnswerIncorrect) => Err(SignerKitError::AnswerIncorrect),
            Err(error) => {
                self.finish(Err(error.clone().into()));
                Err(error.into())
            }
        }
    }

    /// Abandons the challenge.
    pub fn cancel(&self) {
        self.finish(Err(SignerKitError::UserCancelled));
    }

    /// Whether the challenge is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner
            .done
            .lock()
            .map_or(true, |done| done.as_ref().map_or(true, oneshot::Sender::is_closed))
    }

    fn finish(&self, outcome: Outcome) {
        if let Some(sender) = self.inner.done.lock().ok().and_then(|mut done| done.take()) {
            let _ = sender.send(outcome);
        }
    }
}

/// Signs with identity keys authenticated by email one-time password.
#[derive(Debug)]
pub struct OtpHandler {
    instrument: Arc<dyn IdentityInstrument>,
    factory: Arc<dyn SignerFactory>,
    keys: Arc<IdentityKeys>,
    requests: Arc<SignatureRequests>,
    wallets: Arc<dyn RecordStore<Address, WalletRecord>>,
    ui: RwLock<Option<Arc<dyn OtpUi>>>,
}

impl OtpHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(
        instrument: Arc<dyn IdentityInstrument>,
        factory: Arc<dyn SignerFactory>,
        keys: Arc<IdentityKeys>,
        requests: Arc<SignatureRequests>,
        wallets: Arc<dyn RecordStore<Address, WalletRecord>>,
    ) -> Self {
        Self {
            instrument,
            factory,
            keys,
            requests,
            wallets,
            ui: RwLock::new(None),
        }
    }

    /// Registers the OTP prompt.
    pub fn register_ui(&self, ui: Arc<dyn OtpUi>) {
        if let Ok(mut slot) = self.ui.write() {
            *slot = Some(ui);
        }
    }

    fn ui(&self) -> Option<Arc<dyn OtpUi>> {
        self.ui.read().ok()?.clone()
    }

    /// Runs the OTP flow for `email`. `None` means the user cancelled.
    ///
    /// # Errors
    ///
    /// [`SignerKitError::UiNotRegistered`] without a prompt, the identity error that closed
    /// the challenge otherwise.
    pub async fn authenticate(&self, email: &str) -> SignerKitResult<Option<Arc<dyn Signer>>> {
        let ui = self.ui().ok_or(SignerKitError::UiNotRegistered("otp"))?;
        otp_flow(
            self.instrument.clone(),
            self.factory.clone(),
            self.keys.clone(),
            ui,
            email.to_string(),
        )
        .await
    }
}

async fn otp_flow(
    instrument: Arc<dyn IdentityInstrument>,
    factory: Arc<dyn SignerFactory>,
    keys: Arc<IdentityKeys>,
    ui: Arc<dyn OtpUi>,
    email: String,
) -> SignerKitResult<Option<Arc<dyn Signer>>> {
    let auth_key = factory.random();
    let commit = instrument
        .commit_verifier(auth_key.address(), &Challenge::EmailOtp { email })
        .await?;
    let (sender, receiver) = oneshot::channel();
    let responder = OtpResponder {
        inner: Arc::new(ResponderInner {
            instrument: instrument.clone(),
            auth_key: auth_key.address(),
            verifier: commit.verifier,
            challenge: commit.challenge,
            done: Mutex::new(Some(sender)),
        }),
    };
    ui.present(commit.login_hint, responder);

    let result = match receiver.await {
        Ok(Ok(result)) => result,
        Ok(Err(SignerKitError::UserCancelled)) | Err(_) => {
            debug!("otp challenge abandoned");
            return Ok(None);
        }
        Ok(Err(error)) => return Err(error),
    };
    info!(signer = %result.signer, "email identity authenticated");
    let signer: Arc<dyn Signer> = Arc::new(IdentitySigner::new(instrument, auth_key, result.signer));
    keys.insert(signer.clone());
    Ok(Some(signer))
}

#[async_trait]
impl Handler for OtpHandler {
    fn kind(&self) -> SignerKind {
        SignerKind::LoginEmailOtp
    }

    async fn status(
        &self,
        address: Address,
        _image_hash: Option<ImageHash>,
        request: &BaseSignatureRequest,
    ) -> SignerKitResult<SignerStatus> {
        let digest = request.envelope.digest();
        if let Some(signer) = self.keys.get(address) {
            return Ok(SignerStatus::Ready {
                handle: ecdsa_handle(self.requests.clone(), request.id.clone(), digest, signer),
            });
        }
        let Some(ui) = self.ui() else {
            return Ok(SignerStatus::unavailable(UnavailableReason::UiNotRegistered));
        };
        let Some(email) = self
            .wallets
            .get(&request.wallet)
            .await?
            .and_then(|record| record.login_email)
        else {
            return Ok(SignerStatus::unavailable(UnavailableReason::MissingLoginEmail));
        };

        let instrument = self.instrument.clone();
        let factory = self.factory.clone();
        let keys = self.keys.clone();
        let requests = self.requests.clone();
        let id = request.id.clone();
        Ok(SignerStatus::Actionable {
            message: ActionMessage::EnterOtp,
            handle: SignerHandle::new(move || {
                let flow = otp_flow(
                    instrument.clone(),
                    factory.clone(),
                    keys.clone(),
                    ui.clone(),
                    email.clone(),
                );
                let requests = requests.clone();
                let id = id.clone();
                async move {
                    let Some(signer) = flow.await? else {
                        return Ok(false);
                    };
                    if signer.address() != address {
                        return Err(SignerKitError::Identity(format!(
                            "authenticated signer {} does not match {address}",
                            signer.address()
                        )));
                    }
                    ecdsa_handle(requests, id, digest, signer).handle().await
                }
            }),
        })
    }

    fn updates(&self) -> Option<broadcast::Receiver<()>> {
        Some(self.keys.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use test_case::test_case;
    use tokio::sync::mpsc;

    use super::*;
    use crate::handlers::identity::{CommitResult, Identity};
    use crate::primitives::{Bytes, ManualClock, B256};
    use crate::store::MemoryStore;
    use crate::test_support::{digest_request, signature_requests, FakeSignerFactory};
    use crate::topology::Topology;
    use crate::wallets::WalletStatus;

    const CODE: &str = "123456";
    const EMAIL: &str = "user@example.com";
    const WALLET: Address = Address::repeat_byte(0x11);
    const LOGIN_SIGNER: Address = Address::repeat_byte(0x0e);

    /// Accepts `CODE` on every challenge; wrong answers fail with the scripted errors, then
    /// with `AnswerIncorrect`.
    #[derive(Debug, Default)]
    struct ScriptedInstrument {
        commits: AtomicUsize,
        failures: Mutex<VecDeque<IdentityError>>,
    }

    impl ScriptedInstrument {
        fn failing_with(error: IdentityError) -> Self {
            Self {
                failures: Mutex::new(VecDeque::from([error])),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl IdentityInstrument for ScriptedInstrument {
        async fn commit_verifier(
            &self,
            _auth_key: Address,
            challenge: &Challenge,
        ) -> Result<CommitResult, IdentityError> {
            let Challenge::EmailOtp { email } = challenge else {
                return Err(IdentityError::Service("unexpected challenge".to_string()));
            };
            let n = self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(CommitResult {
                verifier: n.to_string(),
                login_hint: email.clone(),
                challenge: format!("challenge-{n}"),
            })
        }

        async fn complete_auth(
            &self,
            _auth_key: Address,
            verifier: &str,
            answer: &Answer,
        ) -> Result<AuthResult, IdentityError> {
            let mut preimage = format!("challenge-{verifier}").into_bytes();
            preimage.extend_from_slice(CODE.as_bytes());
            let expected = Answer::Otp {
                answer: hex::encode(keccak256(preimage)),
            };
            if *answer == expected {
                return Ok(AuthResult {
                    signer: LOGIN_SIGNER,
                    identity: Identity {
                        issuer: "email".to_string(),
                        subject: EMAIL.to_string(),
                        email: Some(EMAIL.to_string()),
                    },
                });
            }
            Err(self
                .failures
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(IdentityError::AnswerIncorrect))
        }

        async fn sign(
            &self,
            _auth_key: Address,
            _signer: Address,
            digest: B256,
        ) -> Result<Bytes, IdentityError> {
            Ok(Bytes::from(digest.to_vec()))
        }
    }

    /// Hands every presented challenge to the test.
    #[derive(Debug)]
    struct ChannelUi(mpsc::UnboundedSender<(String, OtpResponder)>);

    impl OtpUi for ChannelUi {
        fn present(&self, login_hint: String, responder: OtpResponder) {
            let _ = self.0.send((login_hint, responder));
        }
    }

    struct Fixture {
        handler: Arc<OtpHandler>,
        instrument: Arc<ScriptedInstrument>,
        requests: Arc<SignatureRequests>,
        prompts: mpsc::UnboundedReceiver<(String, OtpResponder)>,
    }

    async fn fixture(instrument: ScriptedInstrument) -> Fixture {
        let instrument = Arc::new(instrument);
        let requests = signature_requests(Arc::new(ManualClock::new(0)));
        let wallets: Arc<MemoryStore<Address, WalletRecord>> = Arc::new(MemoryStore::new());
        wallets
            .set(
                WALLET,
                WalletRecord {
                    address: WALLET,
                    status: WalletStatus::Ready,
                    device: Address::repeat_byte(0xd1),
                    login_type: SignerKind::LoginEmailOtp,
                    login_email: Some(EMAIL.to_string()),
                    login_date: 0,
                    use_guard: false,
                },
            )
            .await
            .unwrap();
        let handler = Arc::new(OtpHandler::new(
            instrument.clone(),
            Arc::new(FakeSignerFactory::default()),
            Arc::new(IdentityKeys::new()),
            requests.clone(),
            wallets,
        ));
        let (sender, prompts) = mpsc::unbounded_channel();
        handler.register_ui(Arc::new(ChannelUi(sender)));
        Fixture {
            handler,
            instrument,
            requests,
            prompts,
        }
    }

    #[tokio::test]
    async fn test_wrong_code_keeps_challenge_open() {
        let mut fixture = fixture(ScriptedInstrument::default()).await;
        let handler = fixture.handler.clone();
        let flow = tokio::spawn(async move { handler.authenticate(EMAIL).await });

        let (login_hint, responder) = fixture.prompts.recv().await.unwrap();
        assert_eq!(login_hint, EMAIL);
        assert!(matches!(
            responder.respond("000000").await,
            Err(SignerKitError::AnswerIncorrect)
        ));
        assert!(!responder.is_closed());

        responder.respond(CODE).await.unwrap();
        assert!(responder.is_closed());
        let signer = flow.await.unwrap().unwrap().unwrap();
        assert_eq!(signer.address(), LOGIN_SIGNER);

        let request = digest_request(
            &fixture.requests,
            WALLET,
            Topology::signer(LOGIN_SIGNER, 1),
        )
        .await;
        let status = fixture
            .handler
            .status(LOGIN_SIGNER, None, &request)
            .await
            .unwrap();
        assert!(status.is_ready());
    }

    #[test_case(IdentityError::ChallengeExpired ; "expired challenge")]
    #[test_case(IdentityError::TooManyAttempts ; "too many attempts")]
    #[tokio::test]
    async fn test_terminal_failure_closes_challenge(error: IdentityError) {
        let mut fixture = fixture(ScriptedInstrument::failing_with(error.clone())).await;
        let request = digest_request(
            &fixture.requests,
            WALLET,
            Topology::signer(LOGIN_SIGNER, 1),
        )
        .await;

        let status = fixture
            .handler
            .status(LOGIN_SIGNER, None, &request)
            .await
            .unwrap();
        let SignerStatus::Actionable {
            message: ActionMessage::EnterOtp,
            handle,
        } = status
        else {
            panic!("expected an actionable otp signer");
        };
        let attempt = tokio::spawn(async move { handle.handle().await });
        let (_, responder) = fixture.prompts.recv().await.unwrap();
        let expected = SignerKitError::from(error).to_string();
        assert_eq!(
            responder.respond("000000").await.unwrap_err().to_string(),
            expected
        );
        assert!(responder.is_closed());
        assert_eq!(
            attempt.await.unwrap().unwrap_err().to_string(),
            expected
        );

        let status = fixture
            .handler
            .status(LOGIN_SIGNER, None, &request)
            .await
            .unwrap();
        let SignerStatus::Actionable { handle, .. } = status else {
            panic!("expected a fresh otp challenge");
        };
        let attempt = tokio::spawn(async move { handle.handle().await });
        let (_, responder) = fixture.prompts.recv().await.unwrap();
        responder.respond(CODE).await.unwrap();
        assert!(attempt.await.unwrap().unwrap());
        assert_eq!(fixture.instrument.commits.load(Ordering::SeqCst), 2);
        assert_eq!(
            fixture
                .requests
                .get_base(&request.id)
                .await
                .unwrap()
                .envelope
                .signatures
                .len(),
            1
        );
    }
}
