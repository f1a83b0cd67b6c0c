use std::sync::Arc;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;

use crate::error::StudioError;
use crate::models::{CLASS_SCHEDULES, ClassSchedule, Difficulty, Record, decode_all, new_id, paths};
use crate::platform::{Direction, DocumentStore, FilterOp, Query, SetMode};
use crate::validation::{
    Confirmed, optional_text, parse_class_date, parse_start_time, require_text, validate_capacity,
    validate_duration,
};
use crate::writes::{BackgroundWrites, PendingWrite};

/// Class fields as an administrator submits them.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClassDraft {
    pub class_name: String,
    pub instructor: String,
    #[schema(example = "2025-11-24")]
    pub class_date: String,
    #[schema(example = "06:30")]
    pub start_time: String,
    pub duration_minutes: Option<u32>,
    pub capacity: Option<u32>,
    pub difficulty: Option<Difficulty>,
    pub icon: Option<String>,
}

impl ClassDraft {
    pub fn into_schedule(self, id: String) -> Result<ClassSchedule, StudioError> {
        Ok(ClassSchedule {
            id,
            class_name: require_text("className", &self.class_name)?,
            instructor: require_text("instructor", &self.instructor)?,
            class_date: parse_class_date(&self.class_date)?,
            start_time: parse_start_time(&self.start_time)?,
            duration_minutes: validate_duration(self.duration_minutes.unwrap_or(60))?,
            capacity: validate_capacity(self.capacity.unwrap_or(10))?,
            difficulty: self.difficulty.unwrap_or(Difficulty::Intermediate),
            icon: optional_text(self.icon.as_deref()),
        })
    }
}

#[derive(Clone)]
pub struct ScheduleService {
    documents: Arc<dyn DocumentStore>,
    writes: BackgroundWrites,
}

impl ScheduleService {
    pub fn new(documents: Arc<dyn DocumentStore>, writes: BackgroundWrites) -> Self {
        Self { documents, writes }
    }

    /// Classes on or after `today`, by date then start time.
    pub async fn upcoming(&self, today: NaiveDate) -> Result<Vec<ClassSchedule>, StudioError> {
        let query = Query::collection(CLASS_SCHEDULES)
            .filter("classDate", FilterOp::Gte, today.format("%Y-%m-%d").to_string())
            .order_by("classDate", Direction::Asc)
            .order_by("startTime", Direction::Asc);
        let snapshots = self.documents.query(&query).await?;
        Ok(decode_all(&snapshots))
    }

    pub async fn all(&self) -> Result<Vec<ClassSchedule>, StudioError> {
        let query = Query::collection(CLASS_SCHEDULES)
            .order_by("classDate", Direction::Desc)
            .order_by("startTime", Direction::Asc);
        let snapshots = self.documents.query(&query).await?;
        Ok(decode_all(&snapshots))
    }

    pub async fn get(&self, id: &str) -> Result<ClassSchedule, StudioError> {
        let path = paths::schedule(id)?;
        let snapshot = self
            .documents
            .get(&path)
            .await?
            .ok_or_else(|| StudioError::NotFound(format!("Class {id}")))?;
        ClassSchedule::from_snapshot(&snapshot)
    }

    pub async fn create(&self, draft: ClassDraft) -> Result<ClassSchedule, StudioError> {
        let schedule = draft.into_schedule(new_id())?;
        let path = paths::schedule(&schedule.id)?;
        self.documents
            .set(&path, schedule.to_document()?, SetMode::Overwrite)
            .await?;
        info!(class_id = %schedule.id, class_name = %schedule.class_name, "class created");
        Ok(schedule)
    }

    /// Returns as soon as the write is issued.
    pub async fn update(&self, id: &str, draft: ClassDraft) -> Result<(ClassSchedule, PendingWrite), StudioError> {
        self.get(id).await?;
        let schedule = draft.into_schedule(id.to_string())?;
        let path = paths::schedule(id)?;
        let label = format!("Updating class \"{}\"", schedule.class_name);
        let write = self
            .writes
            .set(label, path, schedule.to_document()?, SetMode::Overwrite);
        Ok((schedule, write))
    }

    pub async fn delete(&self, id: &str, _confirmed: Confirmed) -> Result<(), StudioError> {
        let path = paths::schedule(id)?;
        self.documents.delete(&path).await.map_err(|err| match err {
            StudioError::NotFound(_) => StudioError::NotFound(format!("Class {id}")),
            other => other,
        })?;
        info!(class_id = %id, "class deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::platform::memory::MemoryDocumentStore;
    use crate::writes::{NoticeBoard, RetryPolicy};

    fn service() -> (Arc<MemoryDocumentStore>, ScheduleService) {
        let documents = Arc::new(MemoryDocumentStore::new());
        let writes = BackgroundWrites::new(
            documents.clone(),
            Arc::new(NoticeBoard::new()),
            RetryPolicy {
                retries: 0,
                backoff: Duration::from_millis(1),
            },
        );
        (documents.clone(), ScheduleService::new(documents, writes))
    }

    fn draft(name: &str, date: &str, time: &str) -> ClassDraft {
        ClassDraft {
            class_name: name.into(),
            instructor: "Anil".into(),
            class_date: date.into(),
            start_time: time.into(),
            duration_minutes: None,
            capacity: None,
            difficulty: None,
            icon: None,
        }
    }

    #[tokio::test]
    async fn test_create_applies_defaults() {
        let (_, schedules) = service();
        let created = schedules.create(draft("Strength", "2025-11-24", "06:30")).await.unwrap();
        assert_eq!(created.duration_minutes, 60);
        assert_eq!(created.capacity, 10);
        assert_eq!(created.difficulty, Difficulty::Intermediate);
        assert_eq!(schedules.get(&created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_drafts() {
        let (documents, schedules) = service();
        assert!(schedules.create(draft(" ", "2025-11-24", "06:30")).await.is_err());
        assert!(schedules.create(draft("Yoga", "24.11.2025", "06:30")).await.is_err());
        let mut long = draft("Yoga", "2025-11-24", "06:30");
        long.duration_minutes = Some(601);
        assert!(schedules.create(long).await.is_err());
        assert!(documents.is_empty());
    }

    #[tokio::test]
    async fn test_upcoming_orders_by_date_then_time() {
        let (_, schedules) = service();
        schedules.create(draft("Past", "2025-11-01", "06:00")).await.unwrap();
        schedules.create(draft("Late", "2025-11-24", "18:00")).await.unwrap();
        schedules.create(draft("Early", "2025-11-24", "06:00")).await.unwrap();
        schedules.create(draft("Next", "2025-11-25", "05:00")).await.unwrap();

        let today = NaiveDate::from_ymd_opt(2025, 11, 24).unwrap();
        let names: Vec<_> = schedules
            .upcoming(today)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.class_name)
            .collect();
        assert_eq!(names, ["Early", "Late", "Next"]);

        let all = schedules.all().await.unwrap();
        assert_eq!(all.first().unwrap().class_name, "Next");
        assert_eq!(all.last().unwrap().class_name, "Past");
    }

    #[tokio::test]
    async fn test_update_returns_before_write_lands() {
        let (documents, schedules) = service();
        let created = schedules.create(draft("Strength", "2025-11-24", "06:30")).await.unwrap();

        documents.hold_writes();
        let (updated, write) = schedules
            .update(&created.id, draft("Strength+", "2025-11-24", "07:00"))
            .await
            .unwrap();
        assert_eq!(updated.class_name, "Strength+");
        assert_eq!(schedules.get(&created.id).await.unwrap().class_name, "Strength");

        documents.release_writes();
        write.outcome().await.unwrap();
        assert_eq!(schedules.get(&created.id).await.unwrap().class_name, "Strength+");
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_class() {
        let (_, schedules) = service();
        let err = schedules
            .update("nope", draft("x", "2025-11-24", "06:30"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let confirmed = Confirmed::from_flag(true).unwrap();
        assert!(schedules.delete("nope", confirmed).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_removes_class() {
        let (_, schedules) = service();
        let created = schedules.create(draft("Strength", "2025-11-24", "06:30")).await.unwrap();
        schedules
            .delete(&created.id, Confirmed::from_flag(true).unwrap())
            .await
            .unwrap();
        assert!(schedules.get(&created.id).await.unwrap_err().is_not_found());
    }
}
