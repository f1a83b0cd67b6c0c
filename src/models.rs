use chrono::{DateTime, NaiveDate, NaiveTime, SubsecRound, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use utoipa::ToSchema;

use crate::error::StudioError;
use crate::platform::{DocPath, Document, Snapshot};
use crate::validation::{require_text, validate_capacity, validate_duration, validate_email};

pub const CLASS_SCHEDULES: &str = "classSchedules";
pub const USERS: &str = "users";
pub const BOOKINGS: &str = "bookings";
pub const GALLERY_ITEMS: &str = "galleryItems";

pub mod paths {
    use super::*;

    pub fn schedule(id: &str) -> Result<DocPath, StudioError> {
        DocPath::new(&[CLASS_SCHEDULES, id])
    }

    pub fn user(uid: &str) -> Result<DocPath, StudioError> {
        DocPath::new(&[USERS, uid])
    }

    pub fn booking(uid: &str, id: &str) -> Result<DocPath, StudioError> {
        DocPath::new(&[USERS, uid, BOOKINGS, id])
    }

    pub fn bookings(uid: &str) -> String {
        format!("{USERS}/{uid}/{BOOKINGS}")
    }

    pub fn gallery_item(id: &str) -> Result<DocPath, StudioError> {
        DocPath::new(&[GALLERY_ITEMS, id])
    }
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Typed view of a stored document. The id always comes from the path.
pub trait Record: Serialize + DeserializeOwned {
    fn set_id(&mut self, id: String);

    fn validate(&self) -> Result<(), StudioError> {
        Ok(())
    }

    fn from_snapshot(snapshot: &Snapshot) -> Result<Self, StudioError> {
        let mut data = snapshot.data.clone();
        data.insert("id".into(), Value::String(snapshot.id().to_string()));
        let mut record: Self = serde_json::from_value(Value::Object(data))
            .map_err(|err| StudioError::Validation(format!("{}: {err}", snapshot.path)))?;
        record.set_id(snapshot.id().to_string());
        record.validate()?;
        Ok(record)
    }

    fn to_document(&self) -> Result<Document, StudioError> {
        match serde_json::to_value(self)? {
            Value::Object(mut map) => {
                map.remove("id");
                Ok(map)
            }
            other => Err(StudioError::Internal(format!(
                "record serialized to {other}, expected an object"
            ))),
        }
    }
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        crate::validation::parse_start_time(&raw).map_err(serde::de::Error::custom)
    }
}

mod rfc3339_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|at| at.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClassSchedule {
    #[serde(default)]
    pub id: String,
    pub class_name: String,
    pub instructor: String,
    #[schema(value_type = String, format = Date, example = "2025-11-24")]
    pub class_date: NaiveDate,
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "06:30")]
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    pub capacity: u32,
    pub difficulty: Difficulty,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl Record for ClassSchedule {
    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn validate(&self) -> Result<(), StudioError> {
        require_text("className", &self.class_name)?;
        require_text("instructor", &self.instructor)?;
        validate_duration(self.duration_minutes)?;
        validate_capacity(self.capacity)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Approved => "approved",
            BookingStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BookingStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    #[serde(default)]
    pub id: String,
    pub class_schedule_id: String,
    pub user_id: String,
    #[serde(with = "rfc3339_millis")]
    #[schema(value_type = String, format = DateTime)]
    pub booking_date: DateTime<Utc>,
    pub status: BookingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_date: Option<String>,
    /// Weekday name written by older clients; never written anymore.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_day: Option<String>,
}

impl Booking {
    pub fn pending(schedule: &ClassSchedule, user_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            class_schedule_id: schedule.id.clone(),
            user_id: user_id.to_string(),
            booking_date: at.trunc_subsecs(3),
            status: BookingStatus::Pending,
            rejection_reason: None,
            class_name: Some(schedule.class_name.clone()),
            class_start_time: Some(schedule.start_time.format("%H:%M").to_string()),
            class_date: Some(schedule.class_date.format("%Y-%m-%d").to_string()),
            class_day: None,
        }
    }
}

impl Record for Booking {
    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn validate(&self) -> Result<(), StudioError> {
        require_text("userId", &self.user_id)?;
        require_text("classScheduleId", &self.class_schedule_id)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl Record for UserProfile {
    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn validate(&self) -> Result<(), StudioError> {
        validate_email(&self.email).map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Venue,
    Competition,
}

pub const UPLOADING: &str = "uploading";
pub const FAILED: &str = "failed";
pub const PLACEHOLDER: &str = "placeholder";

/// Image reference of a gallery item: a fetchable URL or a sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ImageRef {
    Resolved(Url),
    Uploading,
    Failed,
    /// Empty, `placeholder`, or anything that is not an http(s) URL.
    Placeholder(String),
}

impl ImageRef {
    pub fn is_resolved(&self) -> bool {
        matches!(self, ImageRef::Resolved(_))
    }

    pub fn url(&self) -> Option<&Url> {
        match self {
            ImageRef::Resolved(url) => Some(url),
            _ => None,
        }
    }
}

impl From<String> for ImageRef {
    fn from(value: String) -> Self {
        match value.trim() {
            UPLOADING => return ImageRef::Uploading,
            FAILED => return ImageRef::Failed,
            _ => {}
        }
        match Url::parse(value.trim()) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {
                ImageRef::Resolved(url)
            }
            _ => ImageRef::Placeholder(value),
        }
    }
}

impl From<ImageRef> for String {
    fn from(value: ImageRef) -> Self {
        match value {
            ImageRef::Resolved(url) => url.into(),
            ImageRef::Uploading => UPLOADING.to_string(),
            ImageRef::Failed => FAILED.to_string(),
            ImageRef::Placeholder(raw) if raw.is_empty() => PLACEHOLDER.to_string(),
            ImageRef::Placeholder(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GalleryItem {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[schema(value_type = String, example = "uploading")]
    pub image_url: ImageRef,
    pub item_type: ItemType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
}

impl GalleryItem {
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or("Gallery image")
    }
}

impl Record for GalleryItem {
    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

/// Decodes every snapshot, skipping (and logging) the ones that fail validation.
pub fn decode_all<T: Record>(snapshots: &[Snapshot]) -> Vec<T> {
    snapshots
        .iter()
        .filter_map(|snapshot| {
            T::from_snapshot(snapshot)
                .map_err(|err| tracing::warn!(path = %snapshot.path, error = %err, "skipping malformed record"))
                .ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn snapshot(path: DocPath, value: Value) -> Snapshot {
        Snapshot {
            path,
            data: value.as_object().cloned().unwrap(),
        }
    }

    fn sample_schedule() -> ClassSchedule {
        ClassSchedule {
            id: "c1".into(),
            class_name: "Strength".into(),
            instructor: "Anil".into(),
            class_date: NaiveDate::from_ymd_opt(2025, 11, 24).unwrap(),
            start_time: NaiveTime::from_hms_opt(6, 30, 0).unwrap(),
            duration_minutes: 60,
            capacity: 12,
            difficulty: Difficulty::Intermediate,
            icon: None,
        }
    }

    #[test]
    fn test_schedule_document_shape() {
        let document = sample_schedule().to_document().unwrap();
        assert!(document.get("id").is_none());
        assert_eq!(document["className"], "Strength");
        assert_eq!(document["classDate"], "2025-11-24");
        assert_eq!(document["startTime"], "06:30");
        assert_eq!(document["difficulty"], "Intermediate");
    }

    #[test]
    fn test_schedule_from_snapshot_takes_id_from_path() {
        let snap = snapshot(
            paths::schedule("abc").unwrap(),
            json!({
                "id": "spoofed",
                "className": "HIIT",
                "instructor": "Meera",
                "classDate": "2025-12-01",
                "startTime": "18:00:00",
                "durationMinutes": 45,
                "capacity": 8,
                "difficulty": "Advanced"
            }),
        );
        let schedule = ClassSchedule::from_snapshot(&snap).unwrap();
        assert_eq!(schedule.id, "abc");
        assert_eq!(schedule.start_time, NaiveTime::from_hms_opt(18, 0, 0).unwrap());
        assert!(Difficulty::Beginner < schedule.difficulty);
    }

    #[test]
    fn test_schedule_missing_fields_rejected() {
        let snap = snapshot(
            paths::schedule("abc").unwrap(),
            json!({"className": "HIIT", "classDate": "2025-12-01"}),
        );
        assert!(matches!(
            ClassSchedule::from_snapshot(&snap),
            Err(StudioError::Validation(_))
        ));
    }

    #[test]
    fn test_booking_pending_denormalizes_class() {
        let at = Utc.with_ymd_and_hms(2025, 11, 20, 9, 15, 0).unwrap();
        let booking = Booking::pending(&sample_schedule(), "u1", at);
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.class_name.as_deref(), Some("Strength"));
        assert_eq!(booking.class_date.as_deref(), Some("2025-11-24"));
        assert_eq!(booking.class_start_time.as_deref(), Some("06:30"));
        assert!(booking.class_day.is_none());

        let document = booking.to_document().unwrap();
        assert_eq!(document["bookingDate"], "2025-11-20T09:15:00.000Z");
        assert_eq!(document["status"], "pending");
    }

    #[test]
    fn test_legacy_booking_with_class_day() {
        let snap = snapshot(
            paths::booking("u1", "b1").unwrap(),
            json!({
                "classScheduleId": "c1",
                "userId": "u1",
                "bookingDate": "2024-03-01T10:00:00Z",
                "status": "approved",
                "classDay": "Monday"
            }),
        );
        let booking = Booking::from_snapshot(&snap).unwrap();
        assert_eq!(booking.class_day.as_deref(), Some("Monday"));
        assert!(booking.class_date.is_none());
        assert!(booking.status.is_terminal());
    }

    #[test]
    fn test_image_ref_sentinels() {
        assert_eq!(ImageRef::from("uploading".to_string()), ImageRef::Uploading);
        assert_eq!(ImageRef::from("failed".to_string()), ImageRef::Failed);
        assert!(!ImageRef::from(String::new()).is_resolved());
        assert!(!ImageRef::from("placeholder".to_string()).is_resolved());
        assert!(!ImageRef::from("data:image/png;base64,AAAA".to_string()).is_resolved());
        assert!(!ImageRef::from("/local/path.jpg".to_string()).is_resolved());
        assert!(ImageRef::from("https://cdn.test/a.jpg".to_string()).is_resolved());
        assert_eq!(String::from(ImageRef::Placeholder(String::new())), "placeholder");
    }

    #[test]
    fn test_gallery_item_type_round_trip() {
        for kind in [ItemType::Venue, ItemType::Competition] {
            let item = GalleryItem {
                id: "g1".into(),
                title: Some("Strength Zone".into()),
                description: None,
                image_url: ImageRef::Uploading,
                item_type: kind,
                storage_path: None,
            };
            let snap = snapshot(
                paths::gallery_item("g1").unwrap(),
                Value::Object(item.to_document().unwrap()),
            );
            let fetched = GalleryItem::from_snapshot(&snap).unwrap();
            assert_eq!(fetched.item_type, kind);
            assert_eq!(fetched, item);
        }
    }

    #[test]
    fn test_decode_all_skips_malformed() {
        let good = snapshot(
            paths::gallery_item("g1").unwrap(),
            json!({"imageUrl": "https://cdn.test/a.jpg", "itemType": "venue"}),
        );
        let bad = snapshot(
            paths::gallery_item("g2").unwrap(),
            json!({"imageUrl": "https://cdn.test/b.jpg", "itemType": "garden"}),
        );
        let items: Vec<GalleryItem> = decode_all(&[good, bad]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "g1");
    }
}
