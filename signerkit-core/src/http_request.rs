use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{SignerKitError, SignerKitResult};

/// Thin wrapper on an HTTP client for JSON-RPC style calls. Sets timeouts and the user agent,
/// and retries transient failures with exponential backoff.
#[derive(Debug, Clone)]
pub(crate) struct Request {
    client: reqwest::Client,
    timeout: Duration,
    max_retries: usize,
}

impl Request {
    pub(crate) fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
            max_retries: 3, // total attempts = 4
        }
    }

    #[cfg(test)]
    pub(crate) const fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn post(&self, url: &str) -> RequestBuilder {
        self.client
            .request(Method::POST, url)
            .timeout(self.timeout)
            .header(
                "User-Agent",
                format!("signerkit-core/{}", env!("CARGO_PKG_VERSION")),
            )
    }

    /// POSTs `body` as JSON and decodes the JSON response.
    pub(crate) async fn post_json<B, R>(&self, url: &str, body: &B) -> SignerKitResult<R>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.handle(self.post(url).json(body)).await?;
        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(SignerKitError::NetworkError {
                url: url.to_string(),
                status: Some(status.as_u16()),
                error,
            });
        }
        Ok(response.json::<R>().await?)
    }

    async fn handle(&self, request_builder: RequestBuilder) -> SignerKitResult<Response> {
        let Some(template) = request_builder.try_clone() else {
            return execute(request_builder).await.map_err(Into::into);
        };

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(self.max_retries);

        (|| async {
            let request_builder = template.try_clone().ok_or_else(|| {
                HandleError::permanent(
                    "<unknown>".to_string(),
                    None,
                    "request body is not cloneable".to_string(),
                )
            })?;
            execute(request_builder).await
        })
        .retry(backoff)
        .when(|err: &HandleError| err.retryable)
        .notify(|err: &HandleError, after: Duration| {
            debug!(url = %err.url, ?after, "retrying request: {}", err.error);
        })
        .await
        .map_err(Into::into)
    }
}

#[derive(Debug)]
struct HandleError {
    url: String,
    status: Option<u16>,
    error: String,
    retryable: bool,
}

impl HandleError {
    const fn retryable(url: String, status: Option<u16>, error: String) -> Self {
        Self {
            url,
            status,
            error,
            retryable: true,
        }
    }

    const fn permanent(url: String, status: Option<u16>, error: String) -> Self {
        Self {
            url,
            status,
            error,
            retryable: false,
        }
    }
}

impl From<HandleError> for SignerKitError {
    fn from(value: HandleError) -> Self {
        Self::NetworkError {
            url: value.url,
            status: value.status,
            error: value.error,
        }
    }
}

async fn execute(request_builder: RequestBuilder) -> Result<Response, HandleError> {
    let (client, request) = request_builder.build_split();
    let request = request.map_err(|err| {
        HandleError::permanent(
            err.url()
                .map_or_else(|| "<unknown>".to_string(), ToString::to_string),
            None,
            format!("request build failed: {err}"),
        )
    })?;
    let url = request.url().to_string();

    match client.execute(request).await {
        Ok(response) => {
            let status = response.status().as_u16();
            if status == 429 || (500..600).contains(&status) {
                return Err(HandleError::retryable(
                    url,
                    Some(status),
                    format!("request error with bad status code {status}"),
                ));
            }
            Ok(response)
        }
        Err(err) if err.is_timeout() || err.is_connect() => Err(HandleError::retryable(
            url,
            None,
            format!("request timeout/connect error: {err}"),
        )),
        Err(err) => Err(HandleError::permanent(
            url,
            None,
            format!("request failed: {err}"),
        )),
    }
}
