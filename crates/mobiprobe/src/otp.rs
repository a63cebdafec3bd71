//! One-time-passcode service client.
//!
//! Test flows that log in with SMS or e-mail codes reserve a phone number or
//! mailbox from the OTP service, trigger the code in the app, then poll the
//! service until the code arrives. The reservation is released as soon as a
//! code has been read.

use crate::config::ProbeConfig;
use crate::result::{ProbeError, ProbeResult};
use crate::retry::{retry, RetryPolicy};
use reqwest::header::AUTHORIZATION;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What a reservation holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtpTarget {
    /// Phone number receiving SMS codes, as returned by the service
    PhoneNumber(String),
    /// Mailbox receiving e-mailed codes
    EmailAddress(String),
}

impl std::fmt::Display for OtpTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PhoneNumber(number) => write!(f, "phone number {number}"),
            Self::EmailAddress(address) => write!(f, "email address {address}"),
        }
    }
}

/// The phone number or mailbox currently reserved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpReservation {
    /// Reserved target
    pub target: OtpTarget,
    /// The service has been told to release it
    pub released: bool,
}

#[derive(Debug, Deserialize)]
struct OtpCodeBody {
    #[serde(rename = "otpCode", default)]
    otp_code: Option<String>,
}

/// Basic-auth client for the OTP service
#[derive(Debug, Clone)]
pub struct OtpClient {
    base_url: String,
    client: reqwest::Client,
    authorization: Option<String>,
    policy: RetryPolicy,
    reservation: Option<OtpReservation>,
}

impl OtpClient {
    /// Client for the service at `base_url`, with the default retry budget
    pub fn new(base_url: impl Into<String>) -> Self {
        let defaults = crate::config::OtpConfig::default();
        Self::with_timeout(base_url, Duration::from_millis(defaults.timeout_ms))
            .with_policy(defaults.retry.policy())
    }

    fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            authorization: None,
            policy: RetryPolicy::once(),
            reservation: None,
        }
    }

    /// Client using the configured service URL, budget and credentials
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::with_timeout(
            config.otp.api_url.clone(),
            Duration::from_millis(config.otp.timeout_ms),
        )
        .with_policy(config.otp.retry.policy())
        .with_authorization(config.basic_auth())
    }

    /// Send this `Authorization` header with every request
    #[must_use]
    pub fn with_authorization(mut self, header: Option<String>) -> Self {
        self.authorization = header;
        self
    }

    /// Retry budget for reservations and code lookups
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Abort polling when `token` is cancelled
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.policy = self.policy.with_cancel(token);
        self
    }

    /// Adopt a target reserved earlier, e.g. by another process
    #[must_use]
    pub fn with_reservation(mut self, target: OtpTarget) -> Self {
        self.reserve(target);
        self
    }

    /// Current reservation, if any
    pub fn reservation(&self) -> Option<&OtpReservation> {
        self.reservation.as_ref()
    }

    /// Reserve a phone number in the given country
    pub async fn reserve_phone_number(&mut self, country_code: &str) -> ProbeResult<String> {
        info!(country_code, "finding an available phone number for OTP");
        let url = self.url("/v1/otp/phone-numbers/available", &[("countryCode", country_code)])?;
        let number = self.poll_text(url).await?;
        if number.is_empty() {
            return Err(ProbeError::unexpected(
                "no available phone number to receive OTP code",
            ));
        }
        info!(number = %number, "reserved phone number");
        self.reserve(OtpTarget::PhoneNumber(number.clone()));
        Ok(number)
    }

    /// Reserve an e-mail address
    pub async fn reserve_email_address(&mut self) -> ProbeResult<String> {
        info!("finding an available email address for OTP");
        let url = self.url("/v1/otp/email-address/available", &[])?;
        let address = self.poll_text(url).await?;
        if address.is_empty() {
            return Err(ProbeError::unexpected(
                "no available email address to receive OTP code",
            ));
        }
        info!(address = %address, "reserved email address");
        self.reserve(OtpTarget::EmailAddress(address.clone()));
        Ok(address)
    }

    fn reserve(&mut self, target: OtpTarget) {
        self.reservation = Some(OtpReservation {
            target,
            released: false,
        });
    }

    /// Poll for the code sent to the reserved target, then release it
    pub async fn otp_code(&mut self) -> ProbeResult<String> {
        let target = self
            .reservation
            .as_ref()
            .map(|r| r.target.clone())
            .ok_or_else(|| {
                ProbeError::config("reserve a phone number or email address before reading a code")
            })?;
        info!(%target, "finding OTP code");
        let url = match &target {
            OtpTarget::PhoneNumber(number) => {
                self.url(&format!("/v1/otp/phone-numbers/{number}/otp-code"), &[])?
            }
            OtpTarget::EmailAddress(address) => self.url(
                "/v1/otp/email-address/otp-code",
                &[("emailAddress", address.as_str())],
            )?,
        };

        let policy = self.policy.clone().abort_when(ProbeError::is_authorization);
        let code = retry(
            self,
            &policy,
            move |c, attempt| {
                let url = url.clone();
                Box::pin(async move {
                    let body: OtpCodeBody = serde_json::from_str(&c.get_text(url).await?)?;
                    match body.otp_code.filter(|code| !code.is_empty()) {
                        Some(code) => Ok(code),
                        None => Err(ProbeError::unexpected(format!(
                            "no OTP code yet after attempt {attempt}"
                        ))),
                    }
                })
            },
            log_failure,
        )
        .await?;
        info!(%target, "received OTP code");
        self.release().await;
        Ok(code)
    }

    /// Release the reservation. Failures are logged; releasing twice is a no-op.
    pub async fn release(&mut self) {
        let Some(reservation) = self.reservation.as_ref().filter(|r| !r.released) else {
            return;
        };
        let target = reservation.target.clone();
        info!(%target, "releasing OTP reservation");
        let url = match &target {
            OtpTarget::PhoneNumber(number) => {
                self.url(&format!("/v1/otp/phone-numbers/{number}/unbook"), &[])
            }
            OtpTarget::EmailAddress(address) => self.url(
                "/v1/otp/email-address/unbook",
                &[("emailAddress", address.as_str())],
            ),
        };
        let sent = match url {
            Ok(url) => self.authorized(self.client.post(url)).send().await,
            Err(err) => {
                warn!(%target, error = %err, "cannot build release URL");
                return;
            }
        };
        match sent {
            Ok(response) => {
                if !response.status().is_success() {
                    warn!(%target, status = response.status().as_u16(), "release rejected");
                }
                if let Some(reservation) = self.reservation.as_mut() {
                    reservation.released = true;
                }
            }
            Err(err) => warn!(%target, error = %err, "cannot release OTP reservation"),
        }
    }

    async fn poll_text(&mut self, url: Url) -> ProbeResult<String> {
        let policy = self.policy.clone().abort_when(ProbeError::is_authorization);
        let text = retry(
            self,
            &policy,
            move |c, _| {
                let url = url.clone();
                Box::pin(async move { c.get_text(url).await })
            },
            log_failure,
        )
        .await?;
        Ok(text.trim().to_string())
    }

    async fn get_text(&self, url: Url) -> ProbeResult<String> {
        let response = self.authorized(self.client.get(url)).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProbeError::from_status(status.as_u16(), body));
        }
        Ok(body)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.authorization {
            Some(header) => request.header(AUTHORIZATION, header),
            None => request,
        }
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> ProbeResult<Url> {
        let url = format!("{}{path}", self.base_url);
        let parsed = if params.is_empty() {
            Url::parse(&url)
        } else {
            Url::parse_with_params(&url, params)
        };
        parsed.map_err(|e| ProbeError::config(format!("invalid OTP service URL: {e}")))
    }
}

fn log_failure<'a>(
    _client: &'a mut OtpClient,
    err: &'a ProbeError,
    attempt: u32,
) -> futures::future::BoxFuture<'a, ProbeResult<()>> {
    let message = err.to_string();
    Box::pin(async move {
        warn!(attempt, error = %message, "OTP request failed");
        Ok(())
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode, Uri};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeOtp {
        log: Mutex<Vec<String>>,
        polls: AtomicUsize,
        ready_after: usize,
        unauthorized: bool,
    }

    impl FakeOtp {
        fn record(&self, method: &str, uri: &Uri, headers: &HeaderMap) {
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-");
            self.log.lock().unwrap().push(format!("{method} {uri} {auth}"));
        }

        fn entries(&self, prefix: &str) -> Vec<String> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.starts_with(prefix))
                .cloned()
                .collect()
        }

        fn status(&self) -> StatusCode {
            if self.unauthorized {
                StatusCode::UNAUTHORIZED
            } else {
                StatusCode::OK
            }
        }

        fn code(&self) -> Json<serde_json::Value> {
            let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            let code = if polls >= self.ready_after { "123456" } else { "" };
            Json(json!({ "otpCode": code }))
        }
    }

    async fn phone_available(
        State(fake): State<Arc<FakeOtp>>,
        uri: Uri,
        headers: HeaderMap,
    ) -> (StatusCode, &'static str) {
        fake.record("GET", &uri, &headers);
        (fake.status(), "+15550001111\n")
    }

    async fn email_available(
        State(fake): State<Arc<FakeOtp>>,
        uri: Uri,
        headers: HeaderMap,
    ) -> &'static str {
        fake.record("GET", &uri, &headers);
        "qa@example.com"
    }

    async fn phone_code(
        State(fake): State<Arc<FakeOtp>>,
        Path(_number): Path<String>,
        uri: Uri,
        headers: HeaderMap,
    ) -> Json<serde_json::Value> {
        fake.record("GET", &uri, &headers);
        fake.code()
    }

    async fn email_code(
        State(fake): State<Arc<FakeOtp>>,
        uri: Uri,
        headers: HeaderMap,
    ) -> Json<serde_json::Value> {
        fake.record("GET", &uri, &headers);
        fake.code()
    }

    async fn unbook(State(fake): State<Arc<FakeOtp>>, uri: Uri, headers: HeaderMap) -> StatusCode {
        fake.record("POST", &uri, &headers);
        StatusCode::OK
    }

    async fn spawn(fake: Arc<FakeOtp>) -> String {
        let app = Router::new()
            .route("/v1/otp/phone-numbers/available", get(phone_available))
            .route("/v1/otp/email-address/available", get(email_available))
            .route("/v1/otp/phone-numbers/{number}/otp-code", get(phone_code))
            .route("/v1/otp/email-address/otp-code", get(email_code))
            .route("/v1/otp/phone-numbers/{number}/unbook", post(unbook))
            .route("/v1/otp/email-address/unbook", post(unbook))
            .with_state(fake);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    fn client(url: &str, attempts: u32) -> OtpClient {
        OtpClient::new(url)
            .with_policy(RetryPolicy::new(attempts, Duration::from_millis(5)))
            .with_authorization(Some("Basic cWE6a2V5".to_string()))
    }

    mod phone_tests {
        use super::*;

        #[tokio::test]
        async fn test_phone_code_polled_until_present_then_released() {
            let fake = Arc::new(FakeOtp {
                ready_after: 3,
                ..FakeOtp::default()
            });
            let url = spawn(Arc::clone(&fake)).await;
            let mut otp = client(&url, 5);

            let number = otp.reserve_phone_number("1").await.unwrap();
            assert_eq!(number, "+15550001111");
            assert_eq!(
                fake.entries("GET /v1/otp/phone-numbers/available"),
                vec!["GET /v1/otp/phone-numbers/available?countryCode=1 Basic cWE6a2V5"]
            );

            assert_eq!(otp.otp_code().await.unwrap(), "123456");
            assert_eq!(fake.polls.load(Ordering::SeqCst), 3);
            assert_eq!(fake.entries("POST").len(), 1);
            assert!(otp.reservation().unwrap().released);

            otp.release().await;
            assert_eq!(fake.entries("POST").len(), 1);
        }

        #[tokio::test]
        async fn test_unauthorized_aborts_after_one_attempt() {
            let fake = Arc::new(FakeOtp {
                unauthorized: true,
                ..FakeOtp::default()
            });
            let url = spawn(Arc::clone(&fake)).await;
            let mut otp = client(&url, 5);

            let err = otp.reserve_phone_number("44").await.unwrap_err();
            assert!(matches!(err, ProbeError::Unauthorized { status: 401, .. }));
            assert_eq!(fake.entries("GET").len(), 1);
            assert!(otp.reservation().is_none());
        }

        #[tokio::test]
        async fn test_code_never_arrives() {
            let fake = Arc::new(FakeOtp {
                ready_after: 10,
                ..FakeOtp::default()
            });
            let url = spawn(Arc::clone(&fake)).await;
            let mut otp = client(&url, 2);

            otp.reserve_phone_number("1").await.unwrap();
            let err = otp.otp_code().await.unwrap_err();
            assert!(err.to_string().contains("no OTP code yet after attempt 2"));
            assert!(fake.entries("POST").is_empty());
            assert!(!otp.reservation().unwrap().released);
        }
    }

    mod email_tests {
        use super::*;

        #[tokio::test]
        async fn test_email_flow_encodes_address() {
            let fake = Arc::new(FakeOtp {
                ready_after: 1,
                ..FakeOtp::default()
            });
            let url = spawn(Arc::clone(&fake)).await;
            let mut otp = client(&url, 3);

            assert_eq!(otp.reserve_email_address().await.unwrap(), "qa@example.com");
            assert_eq!(otp.otp_code().await.unwrap(), "123456");
            assert_eq!(
                fake.entries("POST"),
                vec!["POST /v1/otp/email-address/unbook?emailAddress=qa%40example.com Basic cWE6a2V5"]
            );
            assert_eq!(
                otp.reservation().unwrap().target,
                OtpTarget::EmailAddress("qa@example.com".to_string())
            );
        }

        #[tokio::test]
        async fn test_adopted_reservation_released_once() {
            let fake = Arc::new(FakeOtp::default());
            let url = spawn(Arc::clone(&fake)).await;
            let mut otp = client(&url, 1)
                .with_reservation(OtpTarget::PhoneNumber("+15550001111".to_string()));
            otp.release().await;
            otp.release().await;
            assert_eq!(
                fake.entries("POST"),
                vec!["POST /v1/otp/phone-numbers/+15550001111/unbook Basic cWE6a2V5"]
            );
        }

        #[tokio::test]
        async fn test_code_requires_reservation() {
            let mut otp = OtpClient::new("http://127.0.0.1:9");
            let err = otp.otp_code().await.unwrap_err();
            assert!(matches!(err, ProbeError::Config { .. }));
        }
    }
}
