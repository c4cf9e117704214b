//! # HTTP Retrieval Utilities
//!
//! An asynchronous API client wrapper around `reqwest`, with middleware for
//! exponential backoff retries and standardized JSON response handling.

use std::time::Duration;

use anyhow::{bail, Context};
use reqwest::{
    header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE},
    Method, Url,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};

/// A standardized container for API responses.
///
/// Wraps the deserialized data along with metadata about the HTTP
/// transaction, such as status codes and headers.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The successfully deserialized response body, if any.
    pub data: Option<T>,
    /// The raw error body returned by the server if the request failed.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
}

/// Transport knobs for an `ApiClient`.
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    /// Whole-request timeout, including reading the body.
    pub timeout: Duration,
    /// Retries on transient failures (connect errors, 5xx, 429).
    pub max_retries: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_retries: 2,
        }
    }
}

/// A flexible asynchronous HTTP client.
///
/// Built on top of `reqwest_middleware`, it handles base URLs,
/// authentication tokens, and automatic retries.
#[derive(Clone)]
pub struct ApiClient {
    /// The underlying middleware-enabled client.
    inner: ClientWithMiddleware,
    /// The base URL to which all relative paths are joined. Always ends in `/`.
    base_url: Url,
    /// An optional Bearer token used for authorization.
    auth_token: Option<String>,
}

impl ApiClient {
    /// Creates a client with default [`ClientOptions`].
    ///
    /// # Errors
    /// Fails if `base_url` is not an absolute http(s) URL.
    pub fn new(base_url: &str, auth_token: Option<String>) -> anyhow::Result<Self> {
        Self::with_options(base_url, auth_token, ClientOptions::default())
    }

    /// Creates a client with explicit timeout and retry settings.
    ///
    /// A missing trailing slash is added to `base_url` so that a path prefix
    /// such as `http://host/api` survives `Url::join`.
    pub fn with_options(
        base_url: &str,
        auth_token: Option<String>,
        options: ClientOptions,
    ) -> anyhow::Result<Self> {
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let url = Url::parse(&normalized)
            .with_context(|| format!("invalid base URL `{base_url}` (must be absolute)"))?;
        if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
            bail!("base URL `{base_url}` must be an http(s) URL");
        }

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(options.max_retries);
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .user_agent("GreenTrack/1.0")
            .build()
            .context("failed to build HTTP client")?;

        let client = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner: client,
            base_url: url,
            auth_token,
        })
    }

    /// The normalized base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs a generic HTTP request and handles the response.
    ///
    /// Non-2xx statuses are not errors: they come back with `success: false`
    /// and the raw body in `error_body`.
    ///
    /// # Errors
    /// Returns an `anyhow::Error` if URL joining, body serialization, the
    /// network exchange, or decoding a 2xx body as `T` fails.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        headers: Option<HeaderMap>,
        body: Option<&B>,
    ) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        // 1. Construct the full absolute URL
        let full_url = self.base_url.join(path.trim_start_matches('/'))?;
        let mut req = self.inner.request(method, full_url);

        // 2. Add Custom Headers if provided
        if let Some(h) = headers {
            req = req.headers(h);
        }

        // 3. Inject Bearer Authentication if a token is present
        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        // 4. Serialize and attach the JSON body if present
        if let Some(b) = body {
            let json_body = serde_json::to_string(b)?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        // 5. Execute the request and capture response metadata
        let response: reqwest::Response = req.send().await?;
        let status = response.status();
        let resp_headers = response.headers().clone();

        // 6. Handle the result based on success status
        if status.is_success() {
            let data = response.json::<T>().await?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers: resp_headers,
            })
        } else {
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
                headers: resp_headers,
            })
        }
    }

    /// `GET path` decoded as `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<ApiResponse<T>> {
        self.request::<T, ()>(Method::GET, path, None, None).await
    }

    /// `POST path` with `body` as JSON, reply decoded as `T`.
    pub async fn post_json<T, B>(&self, path: &str, body: &B) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request::<T, B>(Method::POST, path, None, Some(body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_keeps_path_prefix() {
        let client = ApiClient::new("http://localhost:4000/api", None).unwrap();
        assert_eq!(client.base_url().as_str(), "http://localhost:4000/api/");
        assert_eq!(
            client.base_url().join("ai/analyze").unwrap().as_str(),
            "http://localhost:4000/api/ai/analyze"
        );
    }

    #[test]
    fn trailing_slashes_are_collapsed() {
        let client = ApiClient::new("http://localhost:4003//", None).unwrap();
        assert_eq!(client.base_url().as_str(), "http://localhost:4003/");
    }

    #[test]
    fn rejects_relative_and_non_http_urls() {
        assert!(ApiClient::new("localhost:4000", None).is_err());
        assert!(ApiClient::new("/relative", None).is_err());
        assert!(ApiClient::new("ws://localhost:4003", None).is_err());
    }
}
