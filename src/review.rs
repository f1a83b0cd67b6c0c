//! Admin review of pending bookings.
//!
//! Decisions apply optimistically: a decided booking disappears from the
//! pending list at once, while the store update runs in the background.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::error::StudioError;
use crate::models::{BOOKINGS, Booking, BookingStatus, Record, UserProfile, paths};
use crate::platform::{DocPath, DocumentStore, FilterOp, Query};
use crate::validation::optional_text;
use crate::writes::{BackgroundWrites, PendingWrite};

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PendingBooking {
    pub booking: Booking,
    /// Missing when the user has no profile document.
    pub user: Option<UserProfile>,
}

#[derive(Clone)]
pub struct BookingReview {
    documents: Arc<dyn DocumentStore>,
    writes: BackgroundWrites,
    decided: Arc<Mutex<HashMap<DocPath, BookingStatus>>>,
}

impl BookingReview {
    pub fn new(documents: Arc<dyn DocumentStore>, writes: BackgroundWrites) -> Self {
        Self {
            documents,
            writes,
            decided: Default::default(),
        }
    }

    fn decided(&self) -> std::sync::MutexGuard<'_, HashMap<DocPath, BookingStatus>> {
        self.decided.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pending bookings of every user, oldest first, with their profiles.
    pub async fn list_pending(&self) -> Result<Vec<PendingBooking>, StudioError> {
        let query = Query::group(BOOKINGS).filter("status", FilterOp::Eq, BookingStatus::Pending.as_str());
        let snapshots = self.documents.query(&query).await?;

        let visible: Vec<_> = {
            let mut decided = self.decided();
            decided.retain(|path, _| snapshots.iter().any(|snapshot| snapshot.path == *path));
            snapshots
                .iter()
                .filter(|snapshot| !decided.contains_key(&snapshot.path))
                .cloned()
                .collect()
        };

        let mut profiles: HashMap<String, Option<UserProfile>> = HashMap::new();
        let mut pending = Vec::with_capacity(visible.len());
        for snapshot in &visible {
            let booking = match Booking::from_snapshot(snapshot) {
                Ok(booking) => booking,
                Err(err) => {
                    warn!(path = %snapshot.path, error = %err, "skipping malformed booking");
                    continue;
                }
            };
            let owner = snapshot.path.parent_id().unwrap_or(booking.user_id.as_str()).to_string();
            let user = match profiles.get(&owner) {
                Some(profile) => profile.clone(),
                None => {
                    let profile = self.load_profile(&owner).await;
                    profiles.insert(owner, profile.clone());
                    profile
                }
            };
            pending.push(PendingBooking { booking, user });
        }
        pending.sort_by(|a, b| a.booking.booking_date.cmp(&b.booking.booking_date));
        Ok(pending)
    }

    async fn load_profile(&self, uid: &str) -> Option<UserProfile> {
        let path = paths::user(uid).ok()?;
        match self.documents.get(&path).await {
            Ok(Some(snapshot)) => UserProfile::from_snapshot(&snapshot)
                .map_err(|err| warn!(%uid, error = %err, "unreadable user profile"))
                .ok(),
            Ok(None) => None,
            Err(err) => {
                warn!(%uid, error = %err, "could not load user profile");
                None
            }
        }
    }

    /// Records the decision locally and updates the store in the background.
    pub fn set_status(
        &self,
        user_id: &str,
        booking_id: &str,
        status: BookingStatus,
        reason: Option<&str>,
    ) -> Result<PendingWrite, StudioError> {
        if !status.is_terminal() {
            return Err(StudioError::Validation(
                "status must be approved or rejected".into(),
            ));
        }
        let path = paths::booking(user_id, booking_id)?;

        let mut fields = Map::new();
        fields.insert("status".into(), Value::String(status.as_str().into()));
        if status == BookingStatus::Rejected {
            if let Some(reason) = optional_text(reason) {
                fields.insert("rejectionReason".into(), Value::String(reason));
            }
        }

        self.decided().insert(path.clone(), status);
        info!(%user_id, %booking_id, status = status.as_str(), "booking decided");

        let decided = self.decided.clone();
        let forget = path.clone();
        Ok(self.writes.update_with(
            format!("Marking booking as {}", status.as_str()),
            path,
            fields,
            move |_| {
                decided
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&forget);
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::platform::SetMode;
    use crate::platform::memory::MemoryDocumentStore;
    use crate::writes::{NoticeBoard, RetryPolicy};

    fn review() -> (Arc<MemoryDocumentStore>, BackgroundWrites, BookingReview) {
        let documents = Arc::new(MemoryDocumentStore::new());
        let writes = BackgroundWrites::new(
            documents.clone(),
            Arc::new(NoticeBoard::new()),
            RetryPolicy {
                retries: 0,
                backoff: Duration::from_millis(1),
            },
        );
        let review = BookingReview::new(documents.clone(), writes.clone());
        (documents, writes, review)
    }

    async fn put(documents: &MemoryDocumentStore, segments: &[&str], value: Value) {
        documents
            .set(
                &DocPath::new(segments).unwrap(),
                value.as_object().cloned().unwrap(),
                SetMode::Overwrite,
            )
            .await
            .unwrap();
    }

    async fn seed(documents: &MemoryDocumentStore) {
        put(documents, &["users", "u1"], json!({"firstName": "Asha", "lastName": "K", "email": "asha@studio.test"})).await;
        for (id, date, status) in [
            ("b1", "2025-11-20T10:00:00.000Z", "pending"),
            ("b2", "2025-11-19T10:00:00.000Z", "pending"),
            ("b3", "2025-11-18T10:00:00.000Z", "approved"),
        ] {
            put(
                documents,
                &["users", "u1", "bookings", id],
                json!({"classScheduleId": "c1", "userId": "u1", "bookingDate": date, "status": status}),
            )
            .await;
        }
        put(
            documents,
            &["users", "u2", "bookings", "b4"],
            json!({"classScheduleId": "c1", "userId": "u2", "bookingDate": "2025-11-21T10:00:00.000Z", "status": "pending"}),
        )
        .await;
    }

    #[tokio::test]
    async fn test_list_pending_across_users() {
        let (documents, _, review) = review();
        seed(&documents).await;

        let pending = review.list_pending().await.unwrap();
        let ids: Vec<_> = pending.iter().map(|p| p.booking.id.as_str()).collect();
        assert_eq!(ids, ["b2", "b1", "b4"]);
        assert_eq!(pending[0].user.as_ref().unwrap().first_name, "Asha");
        assert!(pending[2].user.is_none());
    }

    #[tokio::test]
    async fn test_decision_hides_booking_immediately() {
        let (documents, _, review) = review();
        seed(&documents).await;
        documents.hold_writes();

        let write = review
            .set_status("u1", "b1", BookingStatus::Rejected, Some("Class cancelled"))
            .unwrap();
        let ids: Vec<_> = review
            .list_pending()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.booking.id)
            .collect();
        assert_eq!(ids, ["b2", "b4"]);

        documents.release_writes();
        write.outcome().await.unwrap();
        let stored = documents
            .get(&paths::booking("u1", "b1").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.data["status"], "rejected");
        assert_eq!(stored.data["rejectionReason"], "Class cancelled");
        assert_eq!(review.list_pending().await.unwrap().len(), 2);
        assert!(review.decided().is_empty());
    }

    #[tokio::test]
    async fn test_failed_decision_reappears_with_notice() {
        let (documents, writes, review) = review();
        seed(&documents).await;
        documents.reject_writes(true);

        let result = review
            .set_status("u1", "b1", BookingStatus::Approved, None)
            .unwrap()
            .outcome()
            .await;
        assert!(result.is_err());
        assert_eq!(writes.notices().recent().len(), 1);
        assert_eq!(review.list_pending().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_pending_is_not_a_decision() {
        let (_, _, review) = review();
        let err = review
            .set_status("u1", "b1", BookingStatus::Pending, None)
            .unwrap_err();
        assert!(matches!(err, StudioError::Validation(_)));
    }

    #[tokio::test]
    async fn test_decision_on_missing_booking_surfaces_as_notice() {
        let (_, writes, review) = review();
        let result = review
            .set_status("u1", "nope", BookingStatus::Approved, None)
            .unwrap()
            .outcome()
            .await;
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(writes.notices().recent().len(), 1);
    }
}
