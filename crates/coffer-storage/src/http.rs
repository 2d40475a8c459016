//! reqwest-backed gateway for the vault backend
//!
//! JSON calls carry the bearer token and the request timeout and are never
//! retried. Presigned byte transfers carry no auth header, use the longer
//! transfer timeout and are retried on connection errors and timeouts, since
//! repeating them only costs bandwidth.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use coffer_core::api::{
    CompleteUploadRequest, CompleteUploadResponse, CreatePendingRequest, CreatePendingResponse,
    DownloadUrlResponse, FileEnvelope, FileListEnvelope, PresignedUrlRequest, UpdateFileRequest,
    UploadUrlResponse,
};
use coffer_core::config::CloudConfig;
use coffer_core::{CofferError, CofferResult, RemoteFile};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::gateway::RemoteGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpOptions {
    pub request_timeout: Duration,
    pub transfer_timeout: Duration,
    pub transfer_retries: u32,
    /// Base delay between transfer attempts; grows linearly per attempt
    pub retry_delay: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            transfer_timeout: Duration::from_secs(3600),
            transfer_retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    token: SecretString,
    options: HttpOptions,
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .field("options", &self.options)
            .finish()
    }
}

impl HttpGateway {
    pub fn new(
        base_url: &str,
        token: SecretString,
        options: HttpOptions,
    ) -> CofferResult<Self> {
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(CofferError::Config(format!(
                "backend base URL must be http(s), got {base_url}"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(options.transfer_timeout)
            .build()
            .map_err(|e| CofferError::Config(format!("building HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            options,
        })
    }

    /// Build a gateway from the `[cloud]` config section.
    ///
    /// If `enforce_tls` is true and the base URL uses HTTP, this returns an
    /// error. Otherwise a warning is logged for non-HTTPS URLs.
    pub fn from_config(cloud: &CloudConfig, token: SecretString) -> CofferResult<Self> {
        if cloud.base_url.starts_with("http://") {
            if cloud.enforce_tls {
                return Err(CofferError::Config(format!(
                    "backend URL uses plaintext HTTP ({}), but enforce_tls is enabled. \
                     Use an HTTPS URL or set cloud.enforce_tls = false for local development.",
                    cloud.base_url
                )));
            }
            warn!(
                base_url = %cloud.base_url,
                "backend URL uses plaintext HTTP; the access token is sent unencrypted"
            );
        }

        Self::new(
            &cloud.base_url,
            token,
            HttpOptions {
                request_timeout: cloud.request_timeout(),
                transfer_timeout: cloud.transfer_timeout(),
                transfer_retries: cloud.transfer_retries,
                ..HttpOptions::default()
            },
        )
    }

    fn api(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(self.token.expose_secret())
            .timeout(self.options.request_timeout)
    }

    async fn call_json<B, T>(
        &self,
        method: Method,
        path: &str,
        resource: &str,
        body: Option<&B>,
    ) -> CofferResult<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let mut request = self.api(method, path);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| send_error(e, self.options.request_timeout))?;
        let response = error_for_status(response, resource).await?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| send_error(e, self.options.request_timeout))?;
        serde_json::from_slice(&bytes).map_err(|e| CofferError::Transport {
            status,
            body: format!("malformed response body: {e}"),
        })
    }

    /// Retry `f` on connection errors and timeouts only.
    async fn with_transfer_retries<T, F, Fut>(&self, what: &str, mut f: F) -> CofferResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CofferResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match f().await {
                Ok(value) => break Ok(value),
                Err(err @ (CofferError::Connection(_) | CofferError::Timeout(_))) => err,
                Err(err) => break Err(err),
            };
            if attempt > self.options.transfer_retries {
                break Err(err);
            }
            warn!(error = %err, attempt, what, "transfer failed, will retry");
            tokio::time::sleep(self.options.retry_delay * attempt).await;
        }
    }
}

fn file_path(file_id: &str, suffix: &str) -> CofferResult<String> {
    validate_id("file_id", file_id)?;
    Ok(format!("/files/{file_id}{suffix}"))
}

fn validate_id(field: &'static str, id: &str) -> CofferResult<()> {
    if id.trim().is_empty() {
        return Err(CofferError::validation(field, "must not be empty"));
    }
    if id.contains(['/', '?', '#']) {
        return Err(CofferError::validation(field, "contains reserved characters"));
    }
    Ok(())
}

/// Presigned URLs carry credentials in the query string.
fn redact_url(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

fn send_error(err: reqwest::Error, timeout: Duration) -> CofferError {
    if err.is_timeout() {
        CofferError::Timeout(timeout)
    } else {
        CofferError::Connection(err.to_string())
    }
}

async fn error_for_status(response: Response, resource: &str) -> CofferResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => CofferError::NotFoundInCloud(resource.to_string()),
        StatusCode::CONFLICT => CofferError::Conflict(resource.to_string()),
        _ => CofferError::Transport {
            status: status.as_u16(),
            body,
        },
    })
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn create_pending(
        &self,
        req: &CreatePendingRequest,
    ) -> CofferResult<CreatePendingResponse> {
        validate_id("collection_id", &req.collection_id)?;
        let resp: CreatePendingResponse = self
            .call_json(Method::POST, "/files/pending", &req.collection_id, Some(req))
            .await?;
        debug!(file_id = %resp.file_id, "created pending remote file");
        Ok(resp)
    }

    async fn put_object(&self, url: &str, bytes: &[u8]) -> CofferResult<()> {
        let target = redact_url(url);
        self.with_transfer_retries("put", || async move {
            let response = self
                .client
                .put(url)
                .timeout(self.options.transfer_timeout)
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(bytes.to_vec())
                .send()
                .await
                .map_err(|e| send_error(e, self.options.transfer_timeout))?;
            error_for_status(response, target).await?;
            Ok(())
        })
        .await?;
        debug!(url = target, bytes = bytes.len(), "uploaded object");
        Ok(())
    }

    async fn complete_upload(
        &self,
        file_id: &str,
        req: &CompleteUploadRequest,
    ) -> CofferResult<CompleteUploadResponse> {
        let path = file_path(file_id, "/complete")?;
        self.call_json(Method::POST, &path, file_id, Some(req)).await
    }

    async fn upload_url(
        &self,
        file_id: &str,
        req: PresignedUrlRequest,
    ) -> CofferResult<UploadUrlResponse> {
        let path = file_path(file_id, "/upload-url")?;
        self.call_json(Method::POST, &path, file_id, Some(&req)).await
    }

    async fn download_url(
        &self,
        file_id: &str,
        req: PresignedUrlRequest,
    ) -> CofferResult<DownloadUrlResponse> {
        let path = file_path(file_id, "/download-url")?;
        self.call_json(Method::POST, &path, file_id, Some(&req)).await
    }

    async fn get_file(&self, file_id: &str) -> CofferResult<RemoteFile> {
        let path = file_path(file_id, "")?;
        let envelope: FileEnvelope = self
            .call_json::<(), _>(Method::GET, &path, file_id, None)
            .await?;
        Ok(envelope.into_inner())
    }

    async fn update_file(
        &self,
        file_id: &str,
        req: &UpdateFileRequest,
    ) -> CofferResult<RemoteFile> {
        let path = file_path(file_id, "")?;
        let envelope: FileEnvelope = self
            .call_json(Method::PUT, &path, file_id, Some(req))
            .await?;
        Ok(envelope.into_inner())
    }

    async fn list_files(&self, collection_id: &str) -> CofferResult<Vec<RemoteFile>> {
        validate_id("collection_id", collection_id)?;
        let path = format!("/collections/{collection_id}/files");
        let envelope: FileListEnvelope = self
            .call_json::<(), _>(Method::GET, &path, collection_id, None)
            .await?;
        Ok(envelope.into_inner())
    }

    async fn delete_file(&self, file_id: &str) -> CofferResult<()> {
        let path = file_path(file_id, "")?;
        let response = self
            .api(Method::DELETE, &path)
            .send()
            .await
            .map_err(|e| send_error(e, self.options.request_timeout))?;
        error_for_status(response, file_id).await?;
        debug!(file_id, "deleted remote file");
        Ok(())
    }

    async fn get_object(&self, url: &str) -> CofferResult<Vec<u8>> {
        let target = redact_url(url);
        let bytes = self
            .with_transfer_retries("get", || async move {
                let response = self
                    .client
                    .get(url)
                    .timeout(self.options.transfer_timeout)
                    .send()
                    .await
                    .map_err(|e| send_error(e, self.options.transfer_timeout))?;
                let response = error_for_status(response, target).await?;
                response
                    .bytes()
                    .await
                    .map_err(|e| send_error(e, self.options.transfer_timeout))
            })
            .await?;
        debug!(url = target, bytes = bytes.len(), "downloaded object");
        Ok(bytes.to_vec())
    }
}
