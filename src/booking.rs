use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;
use utoipa::ToSchema;

use crate::capacity::CapacityEstimator;
use crate::error::StudioError;
use crate::models::{Booking, ClassSchedule, Record, decode_all, paths};
use crate::platform::{Direction, Document, DocumentStore, Identity, Query, SetMode};
use crate::schedule::ScheduleService;
use crate::validation::validate_phone;
use crate::writes::{BackgroundWrites, PendingWrite};

pub const BOOK_LABEL: &str = "Book Demo";
pub const FULL_LABEL: &str = "Full";

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Availability {
    pub bookable: bool,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClassListing {
    #[serde(flatten)]
    pub schedule: ClassSchedule,
    pub spots_left: u32,
    pub availability: Availability,
}

/// A booking that was handed to the store. The writes may still be in flight.
#[derive(Debug)]
pub struct BookingReceipt {
    pub booking: Booking,
    pub writes: Vec<PendingWrite>,
}

#[derive(Clone)]
pub struct BookingService {
    documents: Arc<dyn DocumentStore>,
    writes: BackgroundWrites,
    schedules: ScheduleService,
    capacity: Arc<dyn CapacityEstimator>,
}

impl BookingService {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        writes: BackgroundWrites,
        schedules: ScheduleService,
        capacity: Arc<dyn CapacityEstimator>,
    ) -> Self {
        Self {
            documents,
            writes,
            schedules,
            capacity,
        }
    }

    pub async fn listings(&self, today: NaiveDate) -> Result<Vec<ClassListing>, StudioError> {
        let schedules = self.schedules.upcoming(today).await?;
        Ok(schedules
            .into_iter()
            .map(|schedule| {
                let spots_left = self.capacity.spots_left(&schedule);
                let bookable = spots_left > 0;
                ClassListing {
                    schedule,
                    spots_left,
                    availability: Availability {
                        bookable,
                        label: if bookable { BOOK_LABEL } else { FULL_LABEL }.to_string(),
                    },
                }
            })
            .collect())
    }

    /// Books a demo class for a signed-in user without waiting for the store.
    pub async fn submit(
        &self,
        schedule: &ClassSchedule,
        viewer: Option<&Identity>,
        phone: Option<&str>,
    ) -> Result<BookingReceipt, StudioError> {
        let identity = viewer
            .filter(|identity| !identity.is_anonymous())
            .ok_or(StudioError::AuthRequired)?;
        if self.capacity.spots_left(schedule) == 0 {
            return Err(StudioError::Conflict(format!(
                "{} is full",
                schedule.class_name
            )));
        }
        let phone = validate_phone(phone.unwrap_or_default())?;

        let booking = Booking::pending(schedule, &identity.uid, Utc::now());
        let mut writes = vec![self.writes.set(
            format!("Booking \"{}\"", schedule.class_name),
            paths::booking(&identity.uid, &booking.id)?,
            booking.to_document()?,
            SetMode::Overwrite,
        )];

        if let Some(phone) = phone {
            let profile_path = paths::user(&identity.uid)?;
            let stored = self
                .documents
                .get(&profile_path)
                .await?
                .and_then(|snapshot| snapshot.data.get("phone").and_then(Value::as_str).map(str::to_string));
            if stored.as_deref() != Some(phone.as_str()) {
                writes.push(self.writes.set(
                    "Saving phone number",
                    profile_path,
                    fields(json!({ "phone": phone })),
                    SetMode::Merge,
                ));
            }
        }

        info!(
            booking_id = %booking.id,
            user_id = %identity.uid,
            class_id = %schedule.id,
            "booking submitted"
        );
        Ok(BookingReceipt { booking, writes })
    }

    /// The user's bookings, newest first.
    pub async fn history(&self, uid: &str) -> Result<Vec<Booking>, StudioError> {
        let query = Query::collection(paths::bookings(uid)).order_by("bookingDate", Direction::Desc);
        let snapshots = self.documents.query(&query).await?;
        Ok(decode_all(&snapshots))
    }
}

fn fields(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}
