//! Transport seam
//!
//! The retry policy and the refresh coordinator never talk to reqwest
//! directly; they go through `Transport`, which turns an `ApiRequest` into a
//! fully read `ApiResponse`. Non-success statuses are responses, not errors,
//! at this layer. Only failures to get a response at all (connect, timeout,
//! body read) are `Error::Http`.
//!
//! Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
//! (`Arc<dyn Transport>`).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};
use crate::request::{ApiRequest, ApiResponse, RequestBody};

/// Sends requests to the storefront API.
pub trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>>;
}

/// reqwest-backed transport.
///
/// With `cookies` enabled the client keeps a cookie jar, which is the implicit
/// credential-bearing channel the backend uses for the refresh credential.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration, cookies: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .cookie_store(cookies)
            .build()
            .map_err(|e| Error::Http(format!("building HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send_inner(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let url = join_url(&self.base_url, &request.path);
        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(request.headers.clone());

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(parts) => {
                let mut form = reqwest::multipart::Form::new();
                for part in parts {
                    let mut field = reqwest::multipart::Part::bytes(part.data.to_vec());
                    if let Some(file_name) = &part.file_name {
                        field = field.file_name(file_name.clone());
                    }
                    if let Some(content_type) = &part.content_type {
                        field = field.mime_str(content_type).map_err(|e| {
                            Error::InvalidRequest(format!(
                                "invalid content type for part {}: {e}",
                                part.name
                            ))
                        })?;
                    }
                    form = form.part(part.name.clone(), field);
                }
                builder.multipart(form)
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Http(format!("{} {}: {e}", request.method, request.path)))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| {
            Error::Http(format!(
                "reading response body for {} {}: {e}",
                request.method, request.path
            ))
        })?;

        debug!(method = %request.method, path = %request.path, %status, bytes = body.len(), "response received");
        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

impl Transport for ReqwestTransport {
    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>> {
        Box::pin(self.send_inner(request))
    }
}

/// Join the base URL and a request path with exactly one slash between them.
fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() {
        base.to_string()
    } else if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}
