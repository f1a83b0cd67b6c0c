pub mod coordinator;

use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;

use crate::error::StudioError;
use crate::models::{GALLERY_ITEMS, GalleryItem, ItemType, decode_all};
use crate::platform::{DocumentStore, FilterOp, Query};

pub use coordinator::{
    CancelOutcome, GalleryDraft, ImageFile, SubmitOutcome, TempId, UploadCoordinator,
    UploadPhase, UploadStatus, UploadTicket,
};

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    #[schema(value_type = String, example = "upload-7")]
    pub temp_id: TempId,
    pub phase: UploadPhase,
    pub progress: f32,
}

/// One row of the admin gallery table.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdminGalleryEntry {
    #[serde(flatten)]
    pub item: GalleryItem,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<UploadProgress>,
}

#[derive(Clone)]
pub struct GalleryService {
    documents: Arc<dyn DocumentStore>,
    uploads: Arc<UploadCoordinator>,
}

impl GalleryService {
    pub fn new(documents: Arc<dyn DocumentStore>, uploads: Arc<UploadCoordinator>) -> Self {
        Self { documents, uploads }
    }

    pub fn uploads(&self) -> &Arc<UploadCoordinator> {
        &self.uploads
    }

    /// Items safe to show publicly: only those with a resolved image.
    pub async fn public_items(&self, item_type: Option<ItemType>) -> Result<Vec<GalleryItem>, StudioError> {
        let mut query = Query::collection(GALLERY_ITEMS);
        if let Some(item_type) = item_type {
            query = query.filter("itemType", FilterOp::Eq, serde_json::to_value(item_type)?);
        }
        let snapshots = self.documents.query(&query).await?;
        Ok(decode_all::<GalleryItem>(&snapshots)
            .into_iter()
            .filter(|item| item.image_url.is_resolved())
            .collect())
    }

    /// Every record, overlaid with the uploads still in flight.
    pub async fn admin_items(&self) -> Result<Vec<AdminGalleryEntry>, StudioError> {
        let snapshots = self.documents.query(&Query::collection(GALLERY_ITEMS)).await?;
        let dismissed = self.uploads.dismissed();
        let mut pending = self.uploads.snapshot();

        let mut entries: Vec<AdminGalleryEntry> = decode_all::<GalleryItem>(&snapshots)
            .into_iter()
            .filter(|item| !dismissed.contains(&item.id))
            .map(|item| {
                let upload = pending
                    .iter()
                    .position(|status| status.item.id == item.id)
                    .map(|index| pending.swap_remove(index))
                    .map(progress_of);
                AdminGalleryEntry { item, upload }
            })
            .collect();

        entries.extend(pending.into_iter().map(|status| AdminGalleryEntry {
            item: status.item.clone(),
            upload: Some(progress_of(status)),
        }));
        Ok(entries)
    }
}

fn progress_of(status: UploadStatus) -> UploadProgress {
    UploadProgress {
        temp_id: status.temp_id,
        phase: status.phase,
        progress: status.progress,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{Value, json};
    use url::Url;

    use super::*;
    use crate::platform::memory::{MemoryBlobStorage, MemoryDocumentStore};
    use crate::platform::{DocPath, SetMode};
    use crate::writes::{NoticeBoard, RetryPolicy};

    fn service() -> (Arc<MemoryDocumentStore>, Arc<MemoryBlobStorage>, GalleryService) {
        let documents = Arc::new(MemoryDocumentStore::new());
        let blobs = Arc::new(MemoryBlobStorage::new(
            Url::parse("https://cdn.test/media/").unwrap(),
            4,
        ));
        let uploads = Arc::new(UploadCoordinator::new(
            documents.clone(),
            blobs.clone(),
            Arc::new(NoticeBoard::new()),
            RetryPolicy {
                retries: 0,
                backoff: Duration::from_millis(1),
            },
            1024,
        ));
        (documents.clone(), blobs, GalleryService::new(documents, uploads))
    }

    async fn seed(documents: &MemoryDocumentStore, id: &str, value: Value) {
        documents
            .set(
                &DocPath::new(&[GALLERY_ITEMS, id]).unwrap(),
                value.as_object().cloned().unwrap(),
                SetMode::Overwrite,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_public_items_hide_unresolved_images() {
        let (documents, _, gallery) = service();
        seed(&documents, "a", json!({"imageUrl": "https://cdn.test/a.jpg", "itemType": "venue"})).await;
        seed(&documents, "b", json!({"imageUrl": "uploading", "itemType": "venue"})).await;
        seed(&documents, "c", json!({"imageUrl": "failed", "itemType": "venue"})).await;
        seed(&documents, "d", json!({"imageUrl": "", "itemType": "competition"})).await;
        seed(&documents, "e", json!({"imageUrl": "https://cdn.test/e.jpg", "itemType": "competition"})).await;

        let all = gallery.public_items(None).await.unwrap();
        let ids: Vec<_> = all.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(ids, ["a", "e"]);

        let competitions = gallery.public_items(Some(ItemType::Competition)).await.unwrap();
        assert_eq!(competitions.len(), 1);
        assert_eq!(competitions[0].id, "e");
    }

    #[tokio::test]
    async fn test_admin_items_overlay_uploads() {
        let (documents, blobs, gallery) = service();
        seed(&documents, "a", json!({"imageUrl": "https://cdn.test/a.jpg", "itemType": "venue"})).await;
        blobs.pause();
        let draft = GalleryDraft {
            title: Some("Competition day".into()),
            item_type: Some(ItemType::Competition),
            ..Default::default()
        };
        let file = ImageFile {
            file_name: "day.png".into(),
            content_type: "image/png".into(),
            bytes: vec![1; 12],
        };
        let SubmitOutcome::Uploading(ticket) = gallery.uploads().submit(draft, Some(file)).await.unwrap() else {
            panic!("expected an upload");
        };

        let entries = gallery.admin_items().await.unwrap();
        assert_eq!(entries.len(), 2);
        let uploading = entries.iter().find(|entry| entry.item.id == ticket.item.id).unwrap();
        assert_eq!(uploading.upload.as_ref().unwrap().temp_id, ticket.temp_id);
        assert!(entries.iter().any(|entry| entry.item.id == "a" && entry.upload.is_none()));

        gallery.uploads().cancel(&ticket.item.id).await.unwrap();
        let entries = gallery.admin_items().await.unwrap();
        assert_eq!(entries.len(), 1);

        blobs.resume();
        gallery.uploads().wait_idle().await;
        assert!(gallery.public_items(None).await.unwrap().iter().all(|item| item.id == "a"));
    }
}
