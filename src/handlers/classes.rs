use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use utoipa::ToSchema;

use super::studio_today;
use crate::AppState;
use crate::auth::{Viewer, require_member};
use crate::booking::ClassListing;
use crate::error::ApiError;
use crate::models::Booking;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct BookingRequest {
    /// Saved to the profile when it differs from the stored phone.
    #[serde(default)]
    pub phone: Option<String>,
}

#[utoipa::path(
    get,
    path = "/classes",
    responses((status = 200, description = "Upcoming classes, by date then start time", body = [ClassListing])),
    tag = "classes"
)]
pub async fn list_classes(State(state): State<AppState>) -> Result<Json<Vec<ClassListing>>, ApiError> {
    let listings = state.bookings.listings(studio_today(&state)).await?;
    Ok(Json(listings))
}

#[utoipa::path(
    get,
    path = "/classes.ical",
    responses(
        (status = 200, description = "iCal file", content_type = "text/calendar"),
        (status = 404, description = "No classes found")
    ),
    tag = "classes"
)]
pub async fn get_ical(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let classes = state.schedules.upcoming(studio_today(&state)).await?;
    if classes.is_empty() {
        return Err(ApiError::NotFound("No classes found".into()));
    }

    let body = state.exporter.generate(&classes);
    Ok((
        StatusCode::OK,
        [
            ("content-type", "text/calendar"),
            ("content-disposition", "attachment; filename=classes.ics"),
        ],
        body,
    ))
}

#[utoipa::path(
    post,
    path = "/classes/{id}/bookings",
    params(("id" = String, Path, description = "Class schedule id")),
    request_body = BookingRequest,
    responses(
        (status = 202, description = "Booking submitted, pending approval", body = Booking),
        (status = 401, description = "Sign in with an account first"),
        (status = 404, description = "Class not found"),
        (status = 409, description = "Class is full")
    ),
    security(("bearer_auth" = [])),
    tag = "classes"
)]
pub async fn book_class(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Path(id): Path<String>,
    Json(request): Json<BookingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let member = require_member(viewer)?;
    let schedule = state.schedules.get(&id).await?;
    let receipt = state
        .bookings
        .submit(&schedule, Some(&member), request.phone.as_deref())
        .await?;
    Ok((StatusCode::ACCEPTED, Json(receipt.booking)))
}
