//! Writes the caller does not wait for. They run on spawned tasks, are
//! retried a bounded number of times, and end up on the [`NoticeBoard`] when
//! they finally fail. Nothing is rolled back.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::error::StudioError;
use crate::platform::{DocPath, Document, DocumentStore, SetMode};

const NOTICE_CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Notice {
    pub title: String,
    pub description: String,
    #[schema(value_type = String, format = DateTime)]
    pub at: DateTime<Utc>,
}

/// Recent failures an administrator should know about, newest first.
#[derive(Debug, Default)]
pub struct NoticeBoard {
    notices: Mutex<VecDeque<Notice>>,
}

impl NoticeBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, title: impl Into<String>, description: impl Into<String>) {
        let mut notices = self.notices.lock().unwrap_or_else(PoisonError::into_inner);
        notices.push_front(Notice {
            title: title.into(),
            description: description.into(),
            at: Utc::now(),
        });
        notices.truncate(NOTICE_CAPACITY);
    }

    pub fn recent(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            backoff: Duration::from_millis(100),
        }
    }

    pub async fn run<F>(&self, label: &str, mut op: F) -> Result<(), StudioError>
    where
        F: FnMut() -> BoxFuture<'static, Result<(), StudioError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    debug!(%label, attempt, error = %err, "retrying write");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Handle on a write already in flight. Dropping it does not cancel the write.
#[derive(Debug)]
pub struct PendingWrite {
    handle: JoinHandle<Result<(), StudioError>>,
}

impl PendingWrite {
    pub async fn outcome(self) -> Result<(), StudioError> {
        self.handle
            .await
            .unwrap_or_else(|err| Err(StudioError::Internal(format!("write task failed: {err}"))))
    }
}

#[derive(Clone)]
pub struct BackgroundWrites {
    documents: Arc<dyn DocumentStore>,
    notices: Arc<NoticeBoard>,
    policy: RetryPolicy,
}

impl BackgroundWrites {
    pub fn new(documents: Arc<dyn DocumentStore>, notices: Arc<NoticeBoard>, policy: RetryPolicy) -> Self {
        Self {
            documents,
            notices,
            policy,
        }
    }

    pub fn notices(&self) -> &Arc<NoticeBoard> {
        &self.notices
    }

    pub fn spawn<F>(&self, label: impl Into<String>, op: F) -> PendingWrite
    where
        F: FnMut() -> BoxFuture<'static, Result<(), StudioError>> + Send + 'static,
    {
        self.spawn_with(label, op, |_| {})
    }

    /// Like [`BackgroundWrites::spawn`], running `on_failure` once the last attempt failed.
    pub fn spawn_with<F, G>(&self, label: impl Into<String>, op: F, on_failure: G) -> PendingWrite
    where
        F: FnMut() -> BoxFuture<'static, Result<(), StudioError>> + Send + 'static,
        G: FnOnce(&StudioError) + Send + 'static,
    {
        let label = label.into();
        let notices = self.notices.clone();
        let policy = self.policy;
        let handle = tokio::spawn(async move {
            let result = policy.run(&label, op).await;
            if let Err(err) = &result {
                warn!(%label, error = %err, "background write failed");
                notices.post(format!("{label} failed"), err.to_string());
                on_failure(err);
            }
            result
        });
        PendingWrite { handle }
    }

    pub fn set(&self, label: impl Into<String>, path: DocPath, data: Document, mode: SetMode) -> PendingWrite {
        let documents = self.documents.clone();
        self.spawn(label, move || {
            let documents = documents.clone();
            let path = path.clone();
            let data = data.clone();
            async move { documents.set(&path, data, mode).await }.boxed()
        })
    }

    pub fn update(&self, label: impl Into<String>, path: DocPath, fields: Document) -> PendingWrite {
        self.update_with(label, path, fields, |_| {})
    }

    pub fn update_with<G>(&self, label: impl Into<String>, path: DocPath, fields: Document, on_failure: G) -> PendingWrite
    where
        G: FnOnce(&StudioError) + Send + 'static,
    {
        let documents = self.documents.clone();
        self.spawn_with(
            label,
            move || {
                let documents = documents.clone();
                let path = path.clone();
                let fields = fields.clone();
                async move { documents.update(&path, fields).await }.boxed()
            },
            on_failure,
        )
    }
}
