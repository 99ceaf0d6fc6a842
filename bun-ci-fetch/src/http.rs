use backoff::Error as Attempt;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use crate::error::HttpError;
use crate::retry::{is_terminal_status, with_retry, RetryConfig};
use crate::token::TokenProvider;

/// How the body of a successful response is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseMode {
    Text,
    Json,
    Bytes,
    /// Stream the body into this file.
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Text(String),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
    File(PathBuf),
}

impl Body {
    pub fn into_text(self) -> Option<String> {
        match self {
            Body::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn into_json(self) -> Option<serde_json::Value> {
        match self {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Body::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Vec<u8>>,
    pub headers: HeaderMap,
    /// Overrides the client's configured number of attempts.
    pub retries: Option<u32>,
    pub mode: ResponseMode,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            body: None,
            headers: HeaderMap::new(),
            retries: None,
            mode: ResponseMode::Text,
        }
    }
}

impl RequestOptions {
    pub fn new(mode: ResponseMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

/// Outcome of [`HttpClient::request`]; never an `Err`.
#[derive(Debug, Default)]
pub struct FetchResult {
    pub status: Option<u16>,
    pub status_text: Option<String>,
    pub error: Option<HttpError>,
    pub body: Option<Body>,
}

impl FetchResult {
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug)]
struct Failure {
    status: Option<u16>,
    status_text: Option<String>,
    error: HttpError,
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

#[derive(Debug)]
struct Success {
    status: u16,
    status_text: String,
    body: Body,
}

/// HTTP client with bounded retries and automatic credentials for the
/// trusted API host.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    retry_config: RetryConfig,
    trusted_host: Option<String>,
    tokens: Option<TokenProvider>,
}

impl HttpClient {
    pub fn new(user_agent: &str, retry_config: RetryConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().user_agent(user_agent).build()?;

        Ok(Self {
            client,
            retry_config,
            trusted_host: None,
            tokens: None,
        })
    }

    /// Attach a bearer token to requests for `host` that carry no
    /// `Authorization` header of their own.
    pub fn with_credentials(mut self, host: impl Into<String>, tokens: TokenProvider) -> Self {
        self.trusted_host = Some(host.into());
        self.tokens = Some(tokens);
        self
    }

    pub async fn request(&self, url: &str, options: RequestOptions) -> FetchResult {
        let method = options.method.as_str().to_string();
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(source) => {
                return FetchResult {
                    error: Some(HttpError::InvalidUrl {
                        url: url.to_string(),
                        source,
                    }),
                    ..FetchResult::default()
                };
            }
        };

        let mut headers = options.headers.clone();
        if !headers.contains_key(AUTHORIZATION) && self.is_trusted(&parsed) {
            if let Some(value) = self.bearer_header().await {
                headers.insert(AUTHORIZATION, value);
            }
        }

        let retry_config = match options.retries {
            Some(retries) => RetryConfig::new(retries, self.retry_config.interval),
            None => self.retry_config.clone(),
        };
        let operation_name = format!("{method} {url}");

        let outcome = with_retry(&operation_name, &retry_config, || {
            let request = self
                .client
                .request(options.method.clone(), parsed.clone())
                .headers(headers.clone());
            let request = match &options.body {
                Some(body) => request.body(body.clone()),
                None => request,
            };
            let method = method.clone();
            let url = url.to_string();
            let mode = options.mode.clone();

            async move {
                let response = request.send().await.map_err(|source| {
                    debug!("$ curl {} -> error", url);
                    Attempt::transient(Failure {
                        status: None,
                        status_text: None,
                        error: HttpError::Transport {
                            method: method.clone(),
                            url: url.clone(),
                            source,
                        },
                    })
                })?;

                attempt_response(response, &method, &url, &mode).await
            }
        })
        .await;

        match outcome {
            Ok(success) => FetchResult {
                status: Some(success.status),
                status_text: Some(success.status_text),
                error: None,
                body: Some(success.body),
            },
            Err(failure) => FetchResult {
                status: failure.status,
                status_text: failure.status_text,
                error: Some(failure.error),
                body: None,
            },
        }
    }

    /// Like [`HttpClient::request`], but any unresolved error becomes an `Err`.
    pub async fn request_safe(&self, url: &str, options: RequestOptions) -> Result<Body, HttpError> {
        let result = self.request(url, options).await;
        match (result.error, result.body) {
            (Some(error), _) => Err(error),
            (None, Some(body)) => Ok(body),
            // A successful result always carries a body.
            (None, None) => Ok(Body::Bytes(Vec::new())),
        }
    }

    /// GET `url` and deserialize the JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, HttpError> {
        let body = self.request_safe(url, RequestOptions::new(ResponseMode::Json)).await?;
        let value = body.into_json().unwrap_or_default();
        serde_json::from_value(value).map_err(|source| HttpError::Json {
            method: "GET".to_string(),
            url: url.to_string(),
            source,
        })
    }

    /// Existence probe: a HEAD request answered with anything but 404.
    ///
    /// A request that never receives a status is treated as missing.
    pub async fn exists(&self, url: &str) -> bool {
        let result = self
            .request(url, RequestOptions::default().method(Method::HEAD))
            .await;
        matches!(result.status, Some(status) if status != 404)
    }

    fn is_trusted(&self, url: &Url) -> bool {
        match (&self.trusted_host, url.host_str()) {
            (Some(trusted), Some(host)) => trusted.eq_ignore_ascii_case(host),
            _ => false,
        }
    }

    async fn bearer_header(&self) -> Option<HeaderValue> {
        let token = self.tokens.as_ref()?.token().await?;
        HeaderValue::from_str(&format!("Bearer {token}")).ok()
    }
}

/// Turn one response into a success, or a retryable/terminal failure.
async fn attempt_response(
    response: Response,
    method: &str,
    url: &str,
    mode: &ResponseMode,
) -> Result<Success, Attempt<Failure>> {
    let status = response.status();
    let status_text = status.canonical_reason().unwrap_or_default().to_string();
    debug!("$ curl {} -> {} {}", url, status.as_u16(), status_text);

    let failure = |error: HttpError| Failure {
        status: Some(status.as_u16()),
        status_text: Some(status_text.clone()),
        error,
    };

    if !status.is_success() {
        let explanation = response.text().await.unwrap_or_default();
        let error = failure(HttpError::Status {
            method: method.to_string(),
            url: url.to_string(),
            status: status.as_u16(),
            status_text: status_text.clone(),
            explanation,
        });
        return Err(if is_terminal_status(status.as_u16()) {
            Attempt::permanent(error)
        } else {
            Attempt::transient(error)
        });
    }

    let body = decode_body(response, method, url, mode)
        .await
        .map_err(|e| Attempt::transient(failure(e)))?;

    Ok(Success {
        status: status.as_u16(),
        status_text,
        body,
    })
}

async fn decode_body(
    response: Response,
    method: &str,
    url: &str,
    mode: &ResponseMode,
) -> Result<Body, HttpError> {
    let body_error = |source: reqwest::Error| HttpError::Body {
        method: method.to_string(),
        url: url.to_string(),
        source,
    };

    match mode {
        ResponseMode::Text => response.text().await.map(Body::Text).map_err(body_error),
        ResponseMode::Bytes => response
            .bytes()
            .await
            .map(|bytes| Body::Bytes(bytes.to_vec()))
            .map_err(body_error),
        ResponseMode::Json => {
            let bytes = response.bytes().await.map_err(body_error)?;
            serde_json::from_slice(&bytes)
                .map(Body::Json)
                .map_err(|source| HttpError::Json {
                    method: method.to_string(),
                    url: url.to_string(),
                    source,
                })
        }
        ResponseMode::File(path) => {
            let write_error = |source: std::io::Error| HttpError::Write {
                method: method.to_string(),
                url: url.to_string(),
                path: path.display().to_string(),
                source,
            };

            let mut file = tokio::fs::File::create(path).await.map_err(write_error)?;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(body_error)?;
                file.write_all(&chunk).await.map_err(write_error)?;
            }
            file.flush().await.map_err(write_error)?;
            Ok(Body::File(path.clone()))
        }
    }
}
