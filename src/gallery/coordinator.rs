//! Background image uploads for gallery items.
//!
//! Every upload lives in a provisional map until its transfer resolves. The
//! map is the only shared mutable state: the spawned driver, progress
//! callbacks and cancellations all go through it, and any operation on an
//! id that is no longer there is a silent no-op.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{FutureExt, join_all};
use serde::{Serialize, Serializer};
use serde_json::{Value, json};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use url::Url;
use utoipa::ToSchema;

use crate::error::{StudioError, UploadError};
use crate::models::{self, GalleryItem, ImageRef, ItemType, Record, paths};
use crate::platform::{
    BlobStorage, Document, DocumentStore, SetMode, TransferEvent, TransferHandle,
};
use crate::validation::optional_text;
use crate::writes::{NoticeBoard, RetryPolicy};

static NEXT_TEMP_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique key of a provisional upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempId(u64);

impl TempId {
    fn next() -> Self {
        TempId(NEXT_TEMP_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upload-{}", self.0)
    }
}

impl Serialize for TempId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum UploadPhase {
    /// Record not confirmed by the store yet.
    PendingMetadata,
    Uploading,
}

#[derive(Debug, Clone, Default)]
pub struct GalleryDraft {
    /// Set when editing an existing item.
    pub item_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub item_type: Option<ItemType>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ImageFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadTicket {
    #[schema(value_type = String, example = "upload-7")]
    pub temp_id: TempId,
    pub item: GalleryItem,
}

#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Saved(GalleryItem),
    Uploading(UploadTicket),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum CancelOutcome {
    UploadCanceled,
    Deleted,
    AlreadyGone,
}

/// A provisional upload as the admin console renders it.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatus {
    #[schema(value_type = String, example = "upload-7")]
    pub temp_id: TempId,
    pub item: GalleryItem,
    pub phase: UploadPhase,
    pub progress: f32,
}

#[derive(Debug)]
struct InFlight {
    item: GalleryItem,
    phase: UploadPhase,
    progress: f32,
    transfer: Option<TransferHandle>,
    storage_path: String,
    previous_path: Option<String>,
}

#[derive(Debug, Default)]
struct Uploads {
    active: HashMap<TempId, InFlight>,
    /// Item ids canceled while their driver still runs.
    dismissed: HashSet<String>,
    running: usize,
}

impl Uploads {
    fn find(&self, item_id: &str) -> Option<TempId> {
        self.active
            .iter()
            .find(|(_, entry)| entry.item.id == item_id)
            .map(|(temp_id, _)| *temp_id)
    }
}

pub struct UploadCoordinator {
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStorage>,
    notices: Arc<NoticeBoard>,
    policy: RetryPolicy,
    max_bytes: usize,
    state: Mutex<Uploads>,
    idle: Notify,
}

impl UploadCoordinator {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStorage>,
        notices: Arc<NoticeBoard>,
        policy: RetryPolicy,
        max_bytes: usize,
    ) -> Self {
        Self {
            documents,
            blobs,
            notices,
            policy,
            max_bytes,
            state: Mutex::new(Uploads::default()),
            idle: Notify::new(),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut Uploads) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Saves metadata, or starts a background upload and returns at once.
    pub async fn submit(
        self: &Arc<Self>,
        draft: GalleryDraft,
        file: Option<ImageFile>,
    ) -> Result<SubmitOutcome, StudioError> {
        let existing = match draft.item_id.as_deref() {
            Some(id) => {
                let path = paths::gallery_item(id)?;
                let snapshot = self
                    .documents
                    .get(&path)
                    .await?
                    .ok_or_else(|| StudioError::NotFound(format!("Gallery item {id}")))?;
                Some(GalleryItem::from_snapshot(&snapshot)?)
            }
            None => None,
        };
        let item_type = draft
            .item_type
            .or(existing.as_ref().map(|item| item.item_type))
            .ok_or_else(|| StudioError::Validation("itemType is required".into()))?;

        match file {
            None => self.save_metadata(draft, existing, item_type).await,
            Some(file) => self.start(draft, existing, item_type, file),
        }
    }

    async fn save_metadata(
        &self,
        draft: GalleryDraft,
        existing: Option<GalleryItem>,
        item_type: ItemType,
    ) -> Result<SubmitOutcome, StudioError> {
        let supplied = draft
            .image_url
            .map(ImageRef::from)
            .filter(ImageRef::is_resolved);
        let (image_url, storage_path) = match (supplied, &existing) {
            (Some(url), Some(current)) if url == current.image_url => {
                (url, current.storage_path.clone())
            }
            (Some(url), _) => (url, None),
            (None, Some(current)) if current.image_url.is_resolved() => {
                (current.image_url.clone(), current.storage_path.clone())
            }
            (None, _) => {
                return Err(StudioError::Validation(
                    "an image file or an http(s) image URL is required, there is no image to display".into(),
                ));
            }
        };

        let item = GalleryItem {
            id: existing
                .as_ref()
                .map(|current| current.id.clone())
                .unwrap_or_else(models::new_id),
            title: optional_text(draft.title.as_deref()),
            description: optional_text(draft.description.as_deref()),
            image_url,
            item_type,
            storage_path,
        };
        if let Some(item_id) = &draft.item_id {
            if self.with_state(|state| state.find(item_id).is_some()) {
                return Err(StudioError::Conflict(
                    "an image upload for this item is still running".into(),
                ));
            }
        }

        let path = paths::gallery_item(&item.id)?;
        let document = item.to_document()?;
        let documents = self.documents.clone();
        self.policy
            .run("Saving gallery item", move || {
                let documents = documents.clone();
                let path = path.clone();
                let document = document.clone();
                async move { documents.set(&path, document, SetMode::Overwrite).await }.boxed()
            })
            .await?;

        let replaced = existing.and_then(|current| current.storage_path);
        if let Some(previous) = replaced.filter(|previous| item.storage_path.as_ref() != Some(previous)) {
            self.delete_blob_best_effort(&previous).await;
        }
        info!(item_id = %item.id, "gallery item saved");
        Ok(SubmitOutcome::Saved(item))
    }

    fn start(
        self: &Arc<Self>,
        draft: GalleryDraft,
        existing: Option<GalleryItem>,
        item_type: ItemType,
        file: ImageFile,
    ) -> Result<SubmitOutcome, StudioError> {
        if file.bytes.is_empty() {
            return Err(StudioError::Validation("the image file is empty".into()));
        }
        if !file.content_type.starts_with("image/") {
            return Err(StudioError::Validation(format!(
                "{} is not an image type",
                file.content_type
            )));
        }
        if file.bytes.len() > self.max_bytes {
            return Err(StudioError::Validation(format!(
                "images are limited to {} bytes",
                self.max_bytes
            )));
        }

        let item_id = existing
            .as_ref()
            .map(|current| current.id.clone())
            .unwrap_or_else(models::new_id);
        let previous_path = existing.and_then(|current| current.storage_path);
        let storage_path = format!(
            "gallery/{item_id}/{}-{}",
            uuid::Uuid::new_v4().simple(),
            object_name(&file.file_name)
        );
        let item = GalleryItem {
            id: item_id,
            title: optional_text(draft.title.as_deref()),
            description: optional_text(draft.description.as_deref()),
            image_url: ImageRef::Uploading,
            item_type,
            storage_path: previous_path.clone(),
        };

        let temp_id = TempId::next();
        self.with_state(|state| {
            if state.find(&item.id).is_some() {
                return Err(StudioError::Conflict(
                    "an image upload for this item is still running".into(),
                ));
            }
            state.dismissed.remove(&item.id);
            state.active.insert(
                temp_id,
                InFlight {
                    item: item.clone(),
                    phase: UploadPhase::PendingMetadata,
                    progress: 0.0,
                    transfer: None,
                    storage_path: storage_path.clone(),
                    previous_path,
                },
            );
            state.running += 1;
            Ok(())
        })?;

        info!(%temp_id, item_id = %item.id, bytes = file.bytes.len(), "gallery upload queued");
        tokio::spawn(self.clone().drive(temp_id, item.clone(), storage_path, file));
        Ok(SubmitOutcome::Uploading(UploadTicket { temp_id, item }))
    }

    async fn drive(self: Arc<Self>, temp_id: TempId, item: GalleryItem, storage_path: String, file: ImageFile) {
        self.transfer(temp_id, &item, &storage_path, file).await;
        self.with_state(|state| {
            state.running -= 1;
            state.dismissed.remove(&item.id);
        });
        self.idle.notify_waiters();
    }

    async fn transfer(&self, temp_id: TempId, item: &GalleryItem, storage_path: &str, file: ImageFile) {
        if let Err(err) = self.write_provisional(item).await {
            if self.with_state(|state| state.active.remove(&temp_id)).is_some() {
                warn!(%temp_id, error = %err, "gallery metadata write failed");
                self.notices.post(
                    "Upload failed",
                    format!("\"{}\" could not be saved: {err}", item.label()),
                );
            }
            return;
        }

        let tracked = self.with_state(|state| match state.active.get_mut(&temp_id) {
            Some(entry) => {
                entry.phase = UploadPhase::Uploading;
                true
            }
            None => false,
        });
        if !tracked {
            self.discard_record(&item.id).await;
            return;
        }

        let mut task = self
            .blobs
            .start_upload(storage_path, file.bytes, &file.content_type);
        let tracked = self.with_state(|state| match state.active.get_mut(&temp_id) {
            Some(entry) => {
                entry.transfer = Some(task.handle.clone());
                true
            }
            None => false,
        });
        if !tracked {
            task.handle.cancel();
            self.discard_record(&item.id).await;
            return;
        }

        while let Some(event) = task.events.recv().await {
            match event {
                TransferEvent::Progress(fraction) => self.on_progress(temp_id, fraction),
                TransferEvent::Completed => {
                    let applied = match self.blobs.download_url(storage_path).await {
                        Ok(url) => self.on_success(temp_id, url).await,
                        Err(err) => {
                            self.on_failure(temp_id, UploadError::Other(err.to_string())).await;
                            false
                        }
                    };
                    if !applied {
                        self.delete_blob_best_effort(storage_path).await;
                    }
                    return;
                }
                TransferEvent::Failed(reason) => {
                    self.on_failure(temp_id, reason).await;
                    return;
                }
            }
        }
        self.on_failure(
            temp_id,
            UploadError::Other("transfer ended without a result".into()),
        )
        .await;
    }

    async fn write_provisional(&self, item: &GalleryItem) -> Result<(), StudioError> {
        let path = paths::gallery_item(&item.id)?;
        let document = item.to_document()?;
        let documents = self.documents.clone();
        self.policy
            .run("Saving gallery item", move || {
                let documents = documents.clone();
                let path = path.clone();
                let document = document.clone();
                async move { documents.set(&path, document, SetMode::Overwrite).await }.boxed()
            })
            .await
    }

    pub fn on_progress(&self, temp_id: TempId, fraction: f32) {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        self.with_state(|state| {
            if let Some(entry) = state.active.get_mut(&temp_id) {
                entry.progress = fraction;
            }
        });
    }

    /// Points the record at `url`. Returns false when the upload was canceled
    /// meanwhile, in which case the stored blob is an orphan.
    pub async fn on_success(&self, temp_id: TempId, url: Url) -> bool {
        let Some((item_id, storage_path)) = self.with_state(|state| {
            state
                .active
                .get(&temp_id)
                .map(|entry| (entry.item.id.clone(), entry.storage_path.clone()))
        }) else {
            return false;
        };

        let fields = document(json!({
            "imageUrl": url.as_str(),
            "storagePath": storage_path,
        }));
        if let Err(err) = self.update_record(&item_id, fields).await {
            if err.is_not_found() {
                self.with_state(|state| state.active.remove(&temp_id));
                return false;
            }
            self.on_failure(temp_id, UploadError::Other(err.to_string())).await;
            return false;
        }

        let Some(entry) = self.with_state(|state| state.active.remove(&temp_id)) else {
            return false;
        };
        info!(%temp_id, %item_id, %url, "gallery upload completed");
        if let Some(previous) = entry.previous_path.filter(|previous| *previous != storage_path) {
            self.delete_blob_best_effort(&previous).await;
        }
        true
    }

    pub async fn on_failure(&self, temp_id: TempId, reason: UploadError) {
        let Some(entry) = self.with_state(|state| state.active.remove(&temp_id)) else {
            return;
        };
        match reason {
            UploadError::Canceled => {
                debug!(%temp_id, item_id = %entry.item.id, "gallery upload canceled");
                self.discard_record(&entry.item.id).await;
            }
            UploadError::Other(message) => {
                let fields = document(json!({ "imageUrl": models::FAILED }));
                if let Err(err) = self.update_record(&entry.item.id, fields).await {
                    warn!(item_id = %entry.item.id, error = %err, "could not mark gallery item as failed");
                }
                warn!(%temp_id, item_id = %entry.item.id, reason = %message, "gallery upload failed");
                self.notices.post(
                    "Upload failed",
                    format!("\"{}\" could not be uploaded: {message}", entry.item.label()),
                );
            }
        }
    }

    /// Cancels an in-flight upload or deletes a finished item. Idempotent.
    pub async fn cancel(&self, item_id: &str) -> Result<CancelOutcome, StudioError> {
        let canceled = self.with_state(|state| {
            if state.dismissed.contains(item_id) {
                return Err(());
            }
            let entry = state.find(item_id).and_then(|temp_id| state.active.remove(&temp_id));
            if entry.is_some() {
                state.dismissed.insert(item_id.to_string());
            }
            Ok(entry)
        });
        let entry = match canceled {
            Err(()) => return Ok(CancelOutcome::AlreadyGone),
            Ok(entry) => entry,
        };

        if let Some(entry) = entry {
            if let Some(transfer) = &entry.transfer {
                transfer.cancel();
            }
            self.delete_record(item_id).await?;
            if let Some(previous) = &entry.previous_path {
                self.delete_blob_best_effort(previous).await;
            }
            info!(%item_id, "gallery upload canceled");
            return Ok(CancelOutcome::UploadCanceled);
        }

        let path = paths::gallery_item(item_id)?;
        let Some(snapshot) = self.documents.get(&path).await? else {
            return Ok(CancelOutcome::AlreadyGone);
        };
        let storage_path = snapshot
            .data
            .get("storagePath")
            .and_then(Value::as_str)
            .map(str::to_string);
        match self.documents.delete(&path).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => return Ok(CancelOutcome::AlreadyGone),
            Err(err) => return Err(err),
        }
        if let Some(storage_path) = storage_path {
            self.delete_blob_best_effort(&storage_path).await;
        }
        info!(%item_id, "gallery item deleted");
        Ok(CancelOutcome::Deleted)
    }

    /// Cancels every in-flight upload and returns how many there were.
    pub async fn cancel_all(&self) -> usize {
        let entries: Vec<InFlight> = self.with_state(|state| {
            let entries: Vec<InFlight> = state.active.drain().map(|(_, entry)| entry).collect();
            state
                .dismissed
                .extend(entries.iter().map(|entry| entry.item.id.clone()));
            entries
        });
        for transfer in entries.iter().filter_map(|entry| entry.transfer.as_ref()) {
            transfer.cancel();
        }
        let deletions = entries.iter().map(|entry| self.delete_record(&entry.item.id));
        let mut replaced = Vec::new();
        for (entry, result) in entries.iter().zip(join_all(deletions).await) {
            match result {
                Ok(()) => replaced.extend(entry.previous_path.as_deref()),
                Err(err) => {
                    warn!(item_id = %entry.item.id, error = %err, "could not delete canceled gallery item")
                }
            }
        }
        join_all(replaced.into_iter().map(|previous| self.delete_blob_best_effort(previous))).await;
        info!(count = entries.len(), "all gallery uploads canceled");
        entries.len()
    }

    pub fn snapshot(&self) -> Vec<UploadStatus> {
        let mut uploads: Vec<UploadStatus> = self.with_state(|state| {
            state
                .active
                .iter()
                .map(|(temp_id, entry)| UploadStatus {
                    temp_id: *temp_id,
                    item: entry.item.clone(),
                    phase: entry.phase,
                    progress: entry.progress,
                })
                .collect()
        });
        uploads.sort_by_key(|upload| upload.temp_id);
        uploads
    }

    /// Ids of items canceled whose cleanup has not finished yet.
    pub fn dismissed(&self) -> HashSet<String> {
        self.with_state(|state| state.dismissed.clone())
    }

    /// Resolves once no upload driver is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.with_state(|state| state.running == 0) {
                return;
            }
            notified.await;
        }
    }

    async fn update_record(&self, item_id: &str, fields: Document) -> Result<(), StudioError> {
        let path = paths::gallery_item(item_id)?;
        let documents = self.documents.clone();
        self.policy
            .run("Updating gallery item", move || {
                let documents = documents.clone();
                let path = path.clone();
                let fields = fields.clone();
                async move { documents.update(&path, fields).await }.boxed()
            })
            .await
    }

    /// Deletes the record; an absent record counts as deleted.
    async fn delete_record(&self, item_id: &str) -> Result<(), StudioError> {
        let path = paths::gallery_item(item_id)?;
        let documents = self.documents.clone();
        let result = self
            .policy
            .run("Deleting gallery item", move || {
                let documents = documents.clone();
                let path = path.clone();
                async move { documents.delete(&path).await }.boxed()
            })
            .await;
        match result {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }

    async fn discard_record(&self, item_id: &str) {
        if let Err(err) = self.delete_record(item_id).await {
            warn!(%item_id, error = %err, "could not delete canceled gallery item");
        }
    }

    async fn delete_blob_best_effort(&self, storage_path: &str) {
        match self.blobs.delete(storage_path).await {
            Ok(()) => debug!(%storage_path, "blob deleted"),
            Err(err) if err.is_not_found() => {}
            Err(err) => warn!(%storage_path, error = %err, "could not delete blob"),
        }
    }
}

fn document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

/// Keeps file names readable in object paths without letting them add segments.
fn object_name(file_name: &str) -> String {
    let name: String = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.trim_matches('.').is_empty() {
        "image".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::platform::memory::{MemoryBlobStorage, MemoryDocumentStore};

    struct Fixture {
        documents: Arc<MemoryDocumentStore>,
        blobs: Arc<MemoryBlobStorage>,
        notices: Arc<NoticeBoard>,
        coordinator: Arc<UploadCoordinator>,
    }

    fn fixture() -> Fixture {
        let documents = Arc::new(MemoryDocumentStore::new());
        let blobs = Arc::new(MemoryBlobStorage::new(
            Url::parse("https://cdn.test/media/").unwrap(),
            4,
        ));
        let notices = Arc::new(NoticeBoard::new());
        let coordinator = Arc::new(UploadCoordinator::new(
            documents.clone(),
            blobs.clone(),
            notices.clone(),
            RetryPolicy {
                retries: 0,
                backoff: Duration::from_millis(1),
            },
            1024,
        ));
        Fixture {
            documents,
            blobs,
            notices,
            coordinator,
        }
    }

    fn draft(title: &str) -> GalleryDraft {
        GalleryDraft {
            title: Some(title.into()),
            item_type: Some(ItemType::Venue),
            ..Default::default()
        }
    }

    fn jpeg(len: usize) -> ImageFile {
        ImageFile {
            file_name: "strength zone.jpg".into(),
            content_type: "image/jpeg".into(),
            bytes: vec![7u8; len],
        }
    }

    async fn stored(fixture: &Fixture, item_id: &str) -> Option<GalleryItem> {
        let path = paths::gallery_item(item_id).unwrap();
        fixture
            .documents
            .get(&path)
            .await
            .unwrap()
            .map(|snapshot| GalleryItem::from_snapshot(&snapshot).unwrap())
    }

    fn ticket(outcome: SubmitOutcome) -> UploadTicket {
        match outcome {
            SubmitOutcome::Uploading(ticket) => ticket,
            SubmitOutcome::Saved(item) => panic!("expected an upload, got {item:?}"),
        }
    }

    #[tokio::test]
    async fn test_upload_resolves_record() {
        let fx = fixture();
        let ticket = ticket(fx.coordinator.submit(draft("Strength Zone"), Some(jpeg(10))).await.unwrap());
        assert_eq!(ticket.item.image_url, ImageRef::Uploading);

        fx.coordinator.wait_idle().await;

        let item = stored(&fx, &ticket.item.id).await.unwrap();
        let url = item.image_url.url().unwrap();
        assert!(url.as_str().starts_with("https://cdn.test/media/gallery/"));
        let storage_path = item.storage_path.unwrap();
        assert!(storage_path.ends_with("strength_zone.jpg"));
        assert!(fx.blobs.object(&storage_path).is_some());
        assert!(fx.coordinator.snapshot().is_empty());
        assert!(fx.notices.recent().is_empty());
    }

    #[tokio::test]
    async fn test_progress_is_tracked_while_paused() {
        let fx = fixture();
        fx.blobs.pause();
        let ticket = ticket(fx.coordinator.submit(draft("Zone"), Some(jpeg(10))).await.unwrap());

        let uploads = fx.coordinator.snapshot();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].temp_id, ticket.temp_id);
        assert_eq!(uploads[0].progress, 0.0);

        fx.coordinator.on_progress(ticket.temp_id, 1.7);
        assert_eq!(fx.coordinator.snapshot()[0].progress, 1.0);
        fx.coordinator.on_progress(TempId(u64::MAX), 0.5);

        fx.blobs.resume();
        fx.coordinator.wait_idle().await;
        assert!(stored(&fx, &ticket.item.id).await.unwrap().image_url.is_resolved());
    }

    #[tokio::test]
    async fn test_failed_upload_marks_record_and_posts_notice() {
        let fx = fixture();
        fx.blobs.fail_next_upload("bucket unavailable");
        let ticket = ticket(fx.coordinator.submit(draft("Zone"), Some(jpeg(10))).await.unwrap());
        fx.coordinator.wait_idle().await;

        let item = stored(&fx, &ticket.item.id).await.unwrap();
        assert_eq!(item.image_url, ImageRef::Failed);
        let notices = fx.notices.recent();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].description.contains("bucket unavailable"));
    }

    #[tokio::test]
    async fn test_cancel_in_flight_removes_everything() {
        let fx = fixture();
        fx.blobs.pause();
        let ticket = ticket(fx.coordinator.submit(draft("Zone"), Some(jpeg(10))).await.unwrap());

        let outcome = fx.coordinator.cancel(&ticket.item.id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::UploadCanceled);
        assert!(fx.coordinator.snapshot().is_empty());
        assert_eq!(
            fx.coordinator.cancel(&ticket.item.id).await.unwrap(),
            CancelOutcome::AlreadyGone
        );

        fx.blobs.resume();
        fx.coordinator.wait_idle().await;
        assert!(stored(&fx, &ticket.item.id).await.is_none());
        assert!(fx.notices.recent().is_empty());
        assert_eq!(
            fx.coordinator.cancel(&ticket.item.id).await.unwrap(),
            CancelOutcome::AlreadyGone
        );
    }

    #[tokio::test]
    async fn test_cancel_completed_deletes_record_and_blob() {
        let fx = fixture();
        let ticket = ticket(fx.coordinator.submit(draft("Zone"), Some(jpeg(10))).await.unwrap());
        fx.coordinator.wait_idle().await;
        let storage_path = stored(&fx, &ticket.item.id).await.unwrap().storage_path.unwrap();

        let outcome = fx.coordinator.cancel(&ticket.item.id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Deleted);
        assert!(stored(&fx, &ticket.item.id).await.is_none());
        assert!(fx.blobs.object(&storage_path).is_none());
    }

    #[tokio::test]
    async fn test_cancel_tolerates_missing_blob() {
        let fx = fixture();
        let path = paths::gallery_item("g1").unwrap();
        fx.documents
            .set(
                &path,
                document(json!({
                    "imageUrl": "https://cdn.test/media/gallery/g1/a.jpg",
                    "itemType": "venue",
                    "storagePath": "gallery/g1/a.jpg"
                })),
                SetMode::Overwrite,
            )
            .await
            .unwrap();

        assert_eq!(fx.coordinator.cancel("g1").await.unwrap(), CancelOutcome::Deleted);
        assert_eq!(fx.coordinator.cancel("g1").await.unwrap(), CancelOutcome::AlreadyGone);
    }

    #[tokio::test]
    async fn test_cancel_all_counts_transfers() {
        let fx = fixture();
        fx.blobs.pause();
        let a = ticket(fx.coordinator.submit(draft("A"), Some(jpeg(10))).await.unwrap());
        let b = ticket(fx.coordinator.submit(draft("B"), Some(jpeg(10))).await.unwrap());

        assert_eq!(fx.coordinator.cancel_all().await, 2);
        fx.blobs.resume();
        fx.coordinator.wait_idle().await;
        assert!(stored(&fx, &a.item.id).await.is_none());
        assert!(stored(&fx, &b.item.id).await.is_none());
        assert_eq!(fx.coordinator.cancel_all().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_all_removes_replaced_blob() {
        let fx = fixture();
        let first = ticket(fx.coordinator.submit(draft("Zone"), Some(jpeg(10))).await.unwrap());
        fx.coordinator.wait_idle().await;
        let old_path = stored(&fx, &first.item.id).await.unwrap().storage_path.unwrap();

        fx.blobs.pause();
        let again = GalleryDraft {
            item_id: Some(first.item.id.clone()),
            ..draft("Zone")
        };
        fx.coordinator.submit(again, Some(jpeg(6))).await.unwrap();
        assert_eq!(fx.coordinator.cancel_all().await, 1);
        fx.blobs.resume();
        fx.coordinator.wait_idle().await;

        assert!(stored(&fx, &first.item.id).await.is_none());
        assert!(fx.blobs.object(&old_path).is_none());
        assert!(fx.notices.recent().is_empty());
    }

    #[tokio::test]
    async fn test_failed_upload_can_be_retried() {
        let fx = fixture();
        fx.blobs.fail_next_upload("bucket unavailable");
        let first = ticket(fx.coordinator.submit(draft("Zone"), Some(jpeg(10))).await.unwrap());
        fx.coordinator.wait_idle().await;
        assert_eq!(stored(&fx, &first.item.id).await.unwrap().image_url, ImageRef::Failed);
        assert_eq!(fx.notices.recent().len(), 1);

        fx.blobs.pause();
        let again = GalleryDraft {
            item_id: Some(first.item.id.clone()),
            ..draft("Zone")
        };
        let retry = ticket(fx.coordinator.submit(again, Some(jpeg(10))).await.unwrap());
        assert_eq!(retry.item.id, first.item.id);
        assert_eq!(retry.item.image_url, ImageRef::Uploading);
        wait_for_uploading(&fx, &first.item.id).await;

        fx.blobs.resume();
        fx.coordinator.wait_idle().await;
        let item = stored(&fx, &first.item.id).await.unwrap();
        assert!(item.image_url.is_resolved());
        assert!(fx.blobs.object(&item.storage_path.unwrap()).is_some());
        assert_eq!(fx.notices.recent().len(), 1);
    }

    async fn wait_for_uploading(fixture: &Fixture, item_id: &str) {
        for _ in 0..200 {
            let current = stored(fixture, item_id).await.map(|item| item.image_url);
            if current == Some(ImageRef::Uploading) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("record never showed the upload in progress");
    }

    #[tokio::test]
    async fn test_second_upload_for_same_item_conflicts() {
        let fx = fixture();
        let first = ticket(fx.coordinator.submit(draft("Zone"), Some(jpeg(10))).await.unwrap());
        fx.coordinator.wait_idle().await;

        fx.blobs.pause();
        let again = GalleryDraft {
            item_id: Some(first.item.id.clone()),
            ..draft("Zone")
        };
        fx.coordinator.submit(again.clone(), Some(jpeg(8))).await.unwrap();
        let err = fx.coordinator.submit(again, Some(jpeg(8))).await.unwrap_err();
        assert!(matches!(err, StudioError::Conflict(_)));
        fx.blobs.resume();
        fx.coordinator.wait_idle().await;
    }

    #[tokio::test]
    async fn test_reupload_replaces_previous_blob() {
        let fx = fixture();
        let first = ticket(fx.coordinator.submit(draft("Zone"), Some(jpeg(10))).await.unwrap());
        fx.coordinator.wait_idle().await;
        let old_path = stored(&fx, &first.item.id).await.unwrap().storage_path.unwrap();

        let again = GalleryDraft {
            item_id: Some(first.item.id.clone()),
            ..draft("Zone")
        };
        fx.coordinator.submit(again, Some(jpeg(6))).await.unwrap();
        fx.coordinator.wait_idle().await;

        let item = stored(&fx, &first.item.id).await.unwrap();
        assert!(item.image_url.is_resolved());
        assert_ne!(item.storage_path.as_deref(), Some(old_path.as_str()));
        assert!(fx.blobs.object(&old_path).is_none());
    }

    #[tokio::test]
    async fn test_metadata_only_submissions() {
        let fx = fixture();
        let err = fx.coordinator.submit(draft("No image"), None).await.unwrap_err();
        assert!(matches!(err, StudioError::Validation(_)));

        let with_url = GalleryDraft {
            image_url: Some("https://images.test/zone.jpg".into()),
            ..draft("Linked")
        };
        let SubmitOutcome::Saved(item) = fx.coordinator.submit(with_url, None).await.unwrap() else {
            panic!("expected a saved item");
        };
        assert!(stored(&fx, &item.id).await.unwrap().image_url.is_resolved());

        let renamed = GalleryDraft {
            item_id: Some(item.id.clone()),
            ..draft("Renamed")
        };
        let SubmitOutcome::Saved(renamed) = fx.coordinator.submit(renamed, None).await.unwrap() else {
            panic!("expected a saved item");
        };
        assert_eq!(renamed.title.as_deref(), Some("Renamed"));
        assert_eq!(renamed.image_url, item.image_url);
    }

    #[tokio::test]
    async fn test_rejects_bad_files() {
        let fx = fixture();
        let not_image = ImageFile {
            content_type: "application/pdf".into(),
            ..jpeg(10)
        };
        assert!(fx.coordinator.submit(draft("x"), Some(not_image)).await.is_err());
        assert!(fx.coordinator.submit(draft("x"), Some(jpeg(0))).await.is_err());
        assert!(fx.coordinator.submit(draft("x"), Some(jpeg(2048))).await.is_err());
        assert!(fx.documents.is_empty());
    }

    #[tokio::test]
    async fn test_callbacks_for_unknown_uploads_are_noops() {
        let fx = fixture();
        let stranger = TempId(u64::MAX - 1);
        let applied = fx
            .coordinator
            .on_success(stranger, Url::parse("https://cdn.test/a.jpg").unwrap())
            .await;
        assert!(!applied);
        fx.coordinator
            .on_failure(stranger, UploadError::Other("late".into()))
            .await;
        assert!(fx.notices.recent().is_empty());
        assert!(fx.documents.is_empty());
    }

    #[test]
    fn test_object_name() {
        assert_eq!(object_name("../../etc/passwd"), "passwd");
        assert_eq!(object_name("my photo (1).png"), "my_photo__1_.png");
        assert_eq!(object_name(".."), "image");
    }
}
