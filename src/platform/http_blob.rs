use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE, LOCATION};
use tracing::{debug, warn};
use url::Url;

use super::{BlobStorage, TransferSink, UploadTask, object_url};
use crate::error::{StudioError, UploadError};

/// Bucket endpoint speaking a resumable upload protocol over HTTP.
#[derive(Clone)]
pub struct HttpBlobStorage {
    client: reqwest::Client,
    api_url: Arc<Url>,
    public_url: Arc<Url>,
    token: Option<Arc<str>>,
    chunk_size: usize,
}

impl HttpBlobStorage {
    pub fn new(api_url: Url, public_url: Url, token: Option<String>, chunk_size: usize) -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_url: Arc::new(api_url),
            public_url: Arc::new(public_url),
            token: token.map(Arc::from),
            chunk_size: chunk_size.max(1),
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    async fn open_session(
        &self,
        path: &str,
        content_type: &str,
        length: usize,
    ) -> Result<Url, UploadError> {
        let mut url = object_url(&self.api_url, "upload").map_err(|e| UploadError::Other(e.to_string()))?;
        url.query_pairs_mut().append_pair("name", path);

        let response = self
            .authorized(self.client.post(url))
            .header("x-upload-content-type", content_type)
            .header("x-upload-content-length", length.to_string())
            .send()
            .await
            .map_err(|e| UploadError::Other(e.to_string()))?;
        if !response.status().is_success() {
            return Err(UploadError::Other(format!(
                "opening upload session returned {}",
                response.status()
            )));
        }
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| UploadError::Other("upload session without Location".into()))?;
        self.api_url
            .join(location)
            .map_err(|e| UploadError::Other(format!("bad session URL: {e}")))
    }

    async fn transfer(self, path: String, data: Vec<u8>, content_type: String, sink: TransferSink) {
        let session = match self.open_session(&path, &content_type, data.len()).await {
            Ok(session) => session,
            Err(err) => {
                sink.fail(err).await;
                return;
            }
        };
        debug!(%path, %session, "upload session opened");

        let total = data.len();
        let mut offset = 0usize;
        sink.progress(0.0).await;

        for chunk in data.chunks(self.chunk_size) {
            let end = offset + chunk.len();
            let request = self
                .authorized(self.client.put(session.clone()))
                .header(CONTENT_TYPE, content_type.as_str())
                .header(CONTENT_RANGE, format!("bytes {}-{}/{}", offset, end - 1, total))
                .body(chunk.to_vec());

            let response = tokio::select! {
                _ = sink.canceled() => {
                    self.abort_session(&session).await;
                    sink.fail(UploadError::Canceled).await;
                    return;
                }
                response = request.send() => response,
            };
            let status = match response {
                Ok(response) => response.status(),
                Err(err) => {
                    sink.fail(UploadError::Other(err.to_string())).await;
                    return;
                }
            };

            offset = end;
            match status {
                StatusCode::PERMANENT_REDIRECT if offset < total => {
                    sink.progress(offset as f32 / total as f32).await;
                }
                StatusCode::OK | StatusCode::CREATED if offset == total => {
                    sink.progress(1.0).await;
                    sink.complete().await;
                    return;
                }
                other => {
                    sink.fail(UploadError::Other(format!(
                        "chunk ending at byte {offset} returned {other}"
                    )))
                    .await;
                    return;
                }
            }
        }
        sink.fail(UploadError::Other("upload ended without confirmation".into()))
            .await;
    }

    async fn abort_session(&self, session: &Url) {
        if let Err(err) = self.authorized(self.client.delete(session.clone())).send().await {
            warn!(%session, error = %err, "failed to abort upload session");
        }
    }
}

impl BlobStorage for HttpBlobStorage {
    fn start_upload(&self, path: &str, data: Vec<u8>, content_type: &str) -> UploadTask {
        let (task, sink) = UploadTask::channel();
        tokio::spawn(
            self.clone()
                .transfer(path.to_string(), data, content_type.to_string(), sink),
        );
        task
    }

    fn download_url<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Url, StudioError>> {
        async move { object_url(&self.public_url, path) }.boxed()
    }

    fn delete<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(), StudioError>> {
        async move {
            let mut url = object_url(&self.api_url, "o")?;
            url.path_segments_mut()
                .map_err(|_| StudioError::Internal("blob API URL cannot be a base".into()))?
                .push(path);
            let response = self.authorized(self.client.delete(url)).send().await?;
            match response.status() {
                status if status.is_success() => Ok(()),
                StatusCode::NOT_FOUND => Err(StudioError::NotFound(format!("object {path}"))),
                status => Err(StudioError::Internal(format!(
                    "deleting {path} returned {status}"
                ))),
            }
        }
        .boxed()
    }
}
