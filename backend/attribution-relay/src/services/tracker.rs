/// Outbound postbacks to the tracking endpoint.
///
/// `RetryingHttpClient` wraps reqwest with the flat retry policy from the
/// `resilience` crate: every failure (HTTP status, connection, timeout or any
/// other request error) is logged, then the call is repeated after a fixed
/// delay until the attempt budget is spent.
use crate::config::TrackerConfig;
use crate::error::{RelayError, Result};
use crate::models::Postback;
use reqwest::{Method, Response, StatusCode};
use resilience::{with_retry, RetryConfig};
use thiserror::Error;
use tracing::{debug, error, info};

/// A single failed attempt, classified by failure kind.
#[derive(Debug, Error)]
pub enum HttpCallError {
    #[error("Http Error: {0}")]
    Status(reqwest::Error),

    #[error("Connection Error: {0}")]
    Connect(reqwest::Error),

    #[error("Timeout Error: {0}")]
    Timeout(reqwest::Error),

    #[error("Unexpected Error: {0}")]
    Request(reqwest::Error),
}

impl HttpCallError {
    pub fn classify(err: reqwest::Error) -> Self {
        if err.is_status() {
            HttpCallError::Status(err)
        } else if err.is_timeout() {
            HttpCallError::Timeout(err)
        } else if err.is_connect() {
            HttpCallError::Connect(err)
        } else {
            HttpCallError::Request(err)
        }
    }

    /// HTTP status of the response, when one was received.
    pub fn status(&self) -> Option<StatusCode> {
        self.inner().status()
    }

    fn inner(&self) -> &reqwest::Error {
        match self {
            HttpCallError::Status(e)
            | HttpCallError::Connect(e)
            | HttpCallError::Timeout(e)
            | HttpCallError::Request(e) => e,
        }
    }
}

/// Returned once the retry budget is exhausted.
#[derive(Debug, Error)]
#[error("{method} {url} failed after {attempts} attempts: {last_error}")]
pub struct CallFailure {
    pub method: Method,
    pub url: String,
    pub attempts: u32,
    /// Status of the last response received, if any attempt got that far
    pub last_status: Option<StatusCode>,
    #[source]
    pub last_error: HttpCallError,
}

pub struct RetryingHttpClient {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl RetryingHttpClient {
    pub fn new(client: reqwest::Client, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Issue `method url?params`, retrying on any failure.
    pub async fn call(
        &self,
        method: Method,
        url: &str,
        params: &[(&str, String)],
    ) -> std::result::Result<Response, CallFailure> {
        let max_attempts = self.retry.effective_attempts();

        let outcome = with_retry(&self.retry, |attempt| {
            let request = self.client.request(method.clone(), url).query(params);
            let method = method.clone();
            async move {
                debug!(%method, url, attempt, max_attempts, "Try request");

                match request.send().await.and_then(Response::error_for_status) {
                    Ok(response) => {
                        info!(
                            status = %response.status(),
                            attempt,
                            "Got answer from tracker"
                        );
                        Ok(response)
                    }
                    Err(e) => {
                        let e = HttpCallError::classify(e);
                        error!(%method, url, attempt, max_attempts, error = %e, "Request failed");
                        Err(e)
                    }
                }
            }
        })
        .await;

        outcome.map_err(|exhausted| {
            let attempts = exhausted.attempts();
            let last_error = exhausted.into_last_error();
            CallFailure {
                method,
                url: url.to_string(),
                attempts,
                last_status: last_error.status(),
                last_error,
            }
        })
    }
}

/// Sends one GET postback per event to the tracker base URL.
pub struct TrackerClient {
    http: RetryingHttpClient,
    base_url: String,
}

impl TrackerClient {
    pub fn new(config: &TrackerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RelayError::HttpClient(e.to_string()))?;

        Ok(Self {
            http: RetryingHttpClient::new(
                client,
                RetryConfig::new(config.max_attempts, config.retry_delay),
            ),
            base_url: config.base_url.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn send(
        &self,
        postback: Postback,
        subscriber_id: &str,
    ) -> std::result::Result<StatusCode, CallFailure> {
        let params = postback.query_params(subscriber_id);
        let response = self.http.call(Method::GET, &self.base_url, &params).await?;

        debug!(
            subscriber_id = %subscriber_id,
            cnv_status = postback.status(),
            status = %response.status(),
            "Postback delivered"
        );
        Ok(response.status())
    }
}
