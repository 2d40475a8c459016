use async_trait::async_trait;
use coffer_core::api::{
    CompleteUploadRequest, CompleteUploadResponse, CreatePendingRequest, CreatePendingResponse,
    DownloadUrlResponse, PresignedUrlRequest, UpdateFileRequest, UploadUrlResponse,
};
use coffer_core::{CofferResult, RemoteFile};

/// Backend operations the orchestrators depend on.
///
/// `404` answers surface as `CofferError::NotFoundInCloud`, `409` on update
/// as `CofferError::Conflict`, any other non-2xx as `CofferError::Transport`.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// `POST /files/pending`
    async fn create_pending(&self, req: &CreatePendingRequest)
        -> CofferResult<CreatePendingResponse>;

    /// `PUT <presigned url>` with `Content-Type: application/octet-stream`
    async fn put_object(&self, url: &str, bytes: &[u8]) -> CofferResult<()>;

    /// `POST /files/{id}/complete`. Safe to repeat with the same body.
    async fn complete_upload(
        &self,
        file_id: &str,
        req: &CompleteUploadRequest,
    ) -> CofferResult<CompleteUploadResponse>;

    /// `POST /files/{id}/upload-url`
    async fn upload_url(
        &self,
        file_id: &str,
        req: PresignedUrlRequest,
    ) -> CofferResult<UploadUrlResponse>;

    /// `POST /files/{id}/download-url`
    async fn download_url(
        &self,
        file_id: &str,
        req: PresignedUrlRequest,
    ) -> CofferResult<DownloadUrlResponse>;

    /// `GET /files/{id}`
    async fn get_file(&self, file_id: &str) -> CofferResult<RemoteFile>;

    /// `PUT /files/{id}`
    ///
    /// Answers `409` on a stale `version`. The file is `pending` again until
    /// `complete` verifies the new bytes.
    async fn update_file(&self, file_id: &str, req: &UpdateFileRequest)
        -> CofferResult<RemoteFile>;

    /// `GET /collections/{id}/files`
    async fn list_files(&self, collection_id: &str) -> CofferResult<Vec<RemoteFile>>;

    /// `DELETE /files/{id}`
    async fn delete_file(&self, file_id: &str) -> CofferResult<()>;

    /// `GET <presigned url>`
    async fn get_object(&self, url: &str) -> CofferResult<Vec<u8>>;
}
