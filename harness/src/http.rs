use crate::error::{self, Result};
use log::trace;
use reqwest::header::{AUTHORIZATION, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder, StatusCode};
use snafu::{ensure, ResultExt};
use std::time::Duration;

/// Per-request timeout for every HTTP check.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A response that was fully read.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    /// The `Location` header, only seen when redirects are not followed.
    pub location: Option<String>,
    pub body: String,
}

impl HttpResponse {
    /// A `200`, or a redirect into the login flow (`/ui/login` or `/oauth`).
    pub fn is_ok_or_login_redirect(&self) -> bool {
        if self.status == StatusCode::OK {
            return true;
        }
        matches!(
            self.status,
            StatusCode::FOUND | StatusCode::MOVED_PERMANENTLY
        ) && self
            .location
            .as_deref()
            .map(|location| location.contains("/ui/login") || location.contains("/oauth"))
            .unwrap_or_default()
    }
}

/// An HTTP client that accepts self-signed certificates.
#[derive(Debug, Clone)]
pub struct InsecureClient {
    client: Client,
}

impl InsecureClient {
    pub fn new() -> Result<Self> {
        Self::build(Client::builder())
    }

    /// A client that returns redirects instead of following them.
    pub fn without_redirects() -> Result<Self> {
        Self::build(Client::builder().redirect(Policy::none()))
    }

    fn build(builder: ClientBuilder) -> Result<Self> {
        let client = builder
            .danger_accept_invalid_certs(true)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context(error::HttpClientSnafu)?;
        Ok(Self { client })
    }

    pub async fn get(&self, url: &str, bearer: Option<&str>) -> Result<HttpResponse> {
        let mut request = self.client.get(url);
        if let Some(token) = bearer {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        read(url, request.send().await).await
    }

    /// POSTs `form` url-encoded.
    pub async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpResponse> {
        let response = self.client.post(url).form(form).send().await;
        read(url, response).await
    }

    /// Fails unless `url` answers with `expected`.
    pub async fn expect_status(&self, url: &str, expected: u16) -> Result<HttpResponse> {
        let response = self.get(url, None).await?;
        ensure!(
            response.status.as_u16() == expected,
            error::HttpStatusSnafu {
                url,
                expected: expected.to_string(),
                actual: response.status.as_u16(),
            }
        );
        Ok(response)
    }

    /// Fails if `url` answers with a server error.
    pub async fn expect_below_500(&self, url: &str) -> Result<HttpResponse> {
        let response = self.get(url, None).await?;
        ensure!(
            !response.status.is_server_error(),
            error::HttpStatusSnafu {
                url,
                expected: "< 500",
                actual: response.status.as_u16(),
            }
        );
        Ok(response)
    }
}

async fn read(
    url: &str,
    response: std::result::Result<reqwest::Response, reqwest::Error>,
) -> Result<HttpResponse> {
    let response = response.context(error::HttpSnafu { url })?;
    let status = response.status();
    let location = response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.context(error::HttpSnafu { url })?;
    trace!("GET '{}' returned {}", url, status);
    Ok(HttpResponse {
        status,
        location,
        body,
    })
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=
