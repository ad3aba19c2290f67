//! Upload-service HTTP transport.
//!
//! [`UploadApi`] is the seam the coordinator and workers are written
//! against; [`HttpTransport`] implements it with `reqwest`.

use std::future::Future;
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use fus_protocol::constants::{CORRELATION_ID_HEADER, TOKEN_QUERY_PARAM};
use fus_protocol::{ChunkResponse, Endpoint, FinishedResponse, ServiceResponse, SetMetadataResponse};
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::settings::UploadSettings;

/// Boxed future returned by [`UploadApi`] calls.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Calls exposed by the upload service.
///
/// Implementations are bound to one asset. Using a trait keeps the upload
/// state machine decoupled from HTTP and testable with mocks.
pub trait UploadApi: Send + Sync {
    fn set_metadata(
        &self,
        file_name: &str,
        file_size: u64,
        content_type: Option<&str>,
    ) -> ApiFuture<'_, SetMetadataResponse>;

    fn upload_chunk(&self, block_number: u32, data: Bytes) -> ApiFuture<'_, ChunkResponse>;

    /// Asks the service to assemble the uploaded chunks.
    fn finish(&self, callback_url: &str) -> ApiFuture<'_, FinishedResponse>;

    fn restart(&self) -> ApiFuture<'_, ServiceResponse>;

    fn cancel(&self) -> ApiFuture<'_, ServiceResponse>;

    fn status(&self) -> ApiFuture<'_, ServiceResponse>;

    /// POSTs to a fully qualified completion URL, without auth.
    fn invoke_callback(&self, url: &str) -> ApiFuture<'_, ()>;
}

/// A single upload-service request.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    /// Path relative to the upload domain, or a full URL when
    /// `use_base_domain` is false.
    pub path: String,
    pub use_auth: bool,
    pub use_base_domain: bool,
    /// Appends a timestamp so intermediaries cannot serve a cached answer.
    pub cache_bust: bool,
    pub body: Option<Bytes>,
}

impl RequestOptions {
    /// An authenticated POST relative to the upload domain.
    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            use_auth: true,
            use_base_domain: true,
            cache_bust: false,
            body: None,
        }
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }
}

/// `reqwest`-backed upload-service client for one asset.
pub struct HttpTransport {
    http: reqwest::Client,
    upload_domain: String,
    asset_id: String,
    url_encoded_token: String,
}

impl HttpTransport {
    /// Creates a client that stamps the correlation id on every request.
    pub fn new(settings: &UploadSettings) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        let name = HeaderName::from_bytes(CORRELATION_ID_HEADER.as_bytes())
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let value = HeaderValue::from_str(settings.correlation_id()).map_err(|_| {
            TransportError::Request(format!("invalid {CORRELATION_ID_HEADER} value"))
        })?;
        headers.insert(name, value);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        Ok(Self {
            http,
            upload_domain: settings.upload_domain.clone(),
            asset_id: settings.asset_id.clone(),
            url_encoded_token: settings.url_encoded_token.clone(),
        })
    }

    /// Builds the target URL for `options`.
    pub fn build_url(&self, options: &RequestOptions) -> String {
        let mut url = if options.use_base_domain {
            format!("{}/{}", self.upload_domain, options.path)
        } else {
            options.path.clone()
        };

        if options.use_auth {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(TOKEN_QUERY_PARAM);
            url.push('=');
            url.push_str(&self.url_encoded_token);
        }

        if options.cache_bust {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis();
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&format!("_={millis}"));
        }

        url
    }

    /// Sends a request and returns the raw body of a 2xx answer.
    pub async fn send(&self, options: RequestOptions) -> Result<(u16, Bytes), TransportError> {
        let url = self.build_url(&options);
        trace!(method = %options.method, url = %url, "upload service request");

        let mut req = self.http.request(options.method, &url);
        if let Some(body) = options.body {
            req = req.body(body);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_builder() {
                TransportError::Request(e.to_string())
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), url = %url, "upload service rejected request");
            return Err(TransportError::Http {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok((status.as_u16(), body))
    }

    /// Sends a request and decodes its JSON answer.
    pub async fn request<T: DeserializeOwned>(
        &self,
        options: RequestOptions,
    ) -> Result<T, TransportError> {
        let (status, body) = self.send(options).await?;
        serde_json::from_slice(&body).map_err(|_| TransportError::Decode {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }

    fn path(&self, endpoint: Endpoint<'_>) -> String {
        endpoint.path(&self.asset_id)
    }
}

impl UploadApi for HttpTransport {
    fn set_metadata(
        &self,
        file_name: &str,
        file_size: u64,
        content_type: Option<&str>,
    ) -> ApiFuture<'_, SetMetadataResponse> {
        let path = self.path(Endpoint::SetMetadata {
            file_name,
            file_size,
            content_type,
        });
        Box::pin(async move { self.request(RequestOptions::post(path)).await })
    }

    fn upload_chunk(&self, block_number: u32, data: Bytes) -> ApiFuture<'_, ChunkResponse> {
        let path = self.path(Endpoint::UploadChunk { block_number });
        Box::pin(async move { self.request(RequestOptions::post(path).with_body(data)).await })
    }

    fn finish(&self, callback_url: &str) -> ApiFuture<'_, FinishedResponse> {
        let path = self.path(Endpoint::UploadFinished {
            callback: callback_url,
        });
        Box::pin(async move { self.request(RequestOptions::post(path)).await })
    }

    fn restart(&self) -> ApiFuture<'_, ServiceResponse> {
        let path = self.path(Endpoint::Restart);
        Box::pin(async move { self.request(RequestOptions::post(path)).await })
    }

    fn cancel(&self) -> ApiFuture<'_, ServiceResponse> {
        let path = self.path(Endpoint::Cancel);
        Box::pin(async move { self.request(RequestOptions::post(path)).await })
    }

    fn status(&self) -> ApiFuture<'_, ServiceResponse> {
        let mut options = RequestOptions::post(self.path(Endpoint::Status));
        options.cache_bust = true;
        Box::pin(async move { self.request(options).await })
    }

    fn invoke_callback(&self, url: &str) -> ApiFuture<'_, ()> {
        let options = RequestOptions {
            method: Method::POST,
            path: url.to_string(),
            use_auth: false,
            use_base_domain: false,
            cache_bust: false,
            body: None,
        };
        Box::pin(async move {
            self.send(options).await?;
            Ok(())
        })
    }
}
