use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use super::ConfirmQuery;
use crate::AppState;
use crate::auth::Admin;
use crate::error::ApiError;
use crate::gallery::{
    AdminGalleryEntry, CancelOutcome, GalleryDraft, ImageFile, SubmitOutcome, UploadStatus,
    UploadTicket,
};
use crate::models::{BookingStatus, ClassSchedule, GalleryItem, ItemType};
use crate::review::PendingBooking;
use crate::schedule::ClassDraft;
use crate::validation::Confirmed;
use crate::writes::Notice;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub status: BookingStatus,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusAccepted {
    pub status: BookingStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CancelResult {
    pub outcome: CancelOutcome,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CancelAllResult {
    pub canceled: usize,
}

/// Multipart body of the gallery form.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GalleryForm {
    pub title: Option<String>,
    pub description: Option<String>,
    pub item_type: Option<ItemType>,
    /// External http(s) image, used when no file is sent.
    pub image_url: Option<String>,
    #[schema(value_type = Option<String>, format = Binary)]
    pub image: Option<Vec<u8>>,
}

#[utoipa::path(
    get,
    path = "/admin/classes",
    responses((status = 200, description = "All classes, newest date first", body = [ClassSchedule])),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn list_classes(
    State(state): State<AppState>,
    _admin: Admin,
) -> Result<Json<Vec<ClassSchedule>>, ApiError> {
    Ok(Json(state.schedules.all().await?))
}

#[utoipa::path(
    post,
    path = "/admin/classes",
    request_body = ClassDraft,
    responses(
        (status = 201, description = "Class created", body = ClassSchedule),
        (status = 400, description = "Invalid class fields")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn create_class(
    State(state): State<AppState>,
    _admin: Admin,
    Json(draft): Json<ClassDraft>,
) -> Result<impl IntoResponse, ApiError> {
    let schedule = state.schedules.create(draft).await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

#[utoipa::path(
    put,
    path = "/admin/classes/{id}",
    params(("id" = String, Path, description = "Class schedule id")),
    request_body = ClassDraft,
    responses(
        (status = 202, description = "Update issued", body = ClassSchedule),
        (status = 404, description = "Class not found")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn update_class(
    State(state): State<AppState>,
    _admin: Admin,
    Path(id): Path<String>,
    Json(draft): Json<ClassDraft>,
) -> Result<impl IntoResponse, ApiError> {
    let (schedule, _write) = state.schedules.update(&id, draft).await?;
    Ok((StatusCode::ACCEPTED, Json(schedule)))
}

#[utoipa::path(
    delete,
    path = "/admin/classes/{id}",
    params(("id" = String, Path, description = "Class schedule id"), ConfirmQuery),
    responses(
        (status = 204, description = "Class deleted"),
        (status = 404, description = "Class not found"),
        (status = 428, description = "Missing confirm=true")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn delete_class(
    State(state): State<AppState>,
    _admin: Admin,
    Path(id): Path<String>,
    Query(query): Query<ConfirmQuery>,
) -> Result<StatusCode, ApiError> {
    let confirmed = Confirmed::from_flag(query.confirm)?;
    state.schedules.delete(&id, confirmed).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/admin/bookings/pending",
    responses((status = 200, description = "Bookings awaiting review, oldest first", body = [PendingBooking])),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn pending_bookings(
    State(state): State<AppState>,
    _admin: Admin,
) -> Result<Json<Vec<PendingBooking>>, ApiError> {
    Ok(Json(state.review.list_pending().await?))
}

#[utoipa::path(
    post,
    path = "/admin/bookings/{user_id}/{booking_id}/status",
    params(
        ("user_id" = String, Path, description = "Owner of the booking"),
        ("booking_id" = String, Path, description = "Booking id")
    ),
    request_body = StatusChange,
    responses(
        (status = 202, description = "Decision recorded, update issued", body = StatusAccepted),
        (status = 400, description = "Status must be approved or rejected")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn set_booking_status(
    State(state): State<AppState>,
    _admin: Admin,
    Path((user_id, booking_id)): Path<(String, String)>,
    Json(change): Json<StatusChange>,
) -> Result<impl IntoResponse, ApiError> {
    let _write = state.review.set_status(
        &user_id,
        &booking_id,
        change.status,
        change.rejection_reason.as_deref(),
    )?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StatusAccepted {
            status: change.status,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/admin/gallery",
    responses((status = 200, description = "All gallery items with upload progress", body = [AdminGalleryEntry])),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn list_gallery(
    State(state): State<AppState>,
    _admin: Admin,
) -> Result<Json<Vec<AdminGalleryEntry>>, ApiError> {
    Ok(Json(state.gallery.admin_items().await?))
}

#[utoipa::path(
    post,
    path = "/admin/gallery",
    request_body(content = GalleryForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Item saved with an external image", body = GalleryItem),
        (status = 202, description = "Upload started", body = UploadTicket),
        (status = 400, description = "No image to display or invalid file")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn create_gallery_item(
    State(state): State<AppState>,
    _admin: Admin,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let (draft, file) = read_gallery_form(multipart, None).await?;
    submit(&state, draft, file).await
}

#[utoipa::path(
    put,
    path = "/admin/gallery/{id}",
    params(("id" = String, Path, description = "Gallery item id")),
    request_body(content = GalleryForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Item saved", body = GalleryItem),
        (status = 202, description = "Replacement upload started", body = UploadTicket),
        (status = 404, description = "Gallery item not found"),
        (status = 409, description = "An upload for this item is still running")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn update_gallery_item(
    State(state): State<AppState>,
    _admin: Admin,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let (draft, file) = read_gallery_form(multipart, Some(id)).await?;
    submit(&state, draft, file).await
}

async fn submit(state: &AppState, draft: GalleryDraft, file: Option<ImageFile>) -> Result<Response, ApiError> {
    match state.gallery.uploads().submit(draft, file).await? {
        SubmitOutcome::Saved(item) => Ok((StatusCode::CREATED, Json(item)).into_response()),
        SubmitOutcome::Uploading(ticket) => Ok((StatusCode::ACCEPTED, Json(ticket)).into_response()),
    }
}

async fn read_gallery_form(
    mut multipart: Multipart,
    item_id: Option<String>,
) -> Result<(GalleryDraft, Option<ImageFile>), ApiError> {
    let mut draft = GalleryDraft {
        item_id,
        ..Default::default()
    };
    let mut file = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await?;
                // Browsers send an empty part when no file was picked.
                if bytes.is_empty() && file_name.is_empty() {
                    continue;
                }
                file = Some(ImageFile {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            "title" => draft.title = Some(field.text().await?),
            "description" => draft.description = Some(field.text().await?),
            "imageUrl" => draft.image_url = Some(field.text().await?),
            "itemType" => {
                let raw = field.text().await?;
                let item_type = serde_json::from_value(Value::String(raw.trim().to_string()))
                    .map_err(|_| ApiError::BadRequest("itemType must be venue or competition".into()))?;
                draft.item_type = Some(item_type);
            }
            _ => {}
        }
    }
    Ok((draft, file))
}

#[utoipa::path(
    delete,
    path = "/admin/gallery/{id}",
    params(("id" = String, Path, description = "Gallery item id"), ConfirmQuery),
    responses(
        (status = 200, description = "Upload canceled, item deleted, or already gone", body = CancelResult),
        (status = 428, description = "Missing confirm=true")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn delete_gallery_item(
    State(state): State<AppState>,
    _admin: Admin,
    Path(id): Path<String>,
    Query(query): Query<ConfirmQuery>,
) -> Result<Json<CancelResult>, ApiError> {
    Confirmed::from_flag(query.confirm)?;
    let outcome = state.gallery.uploads().cancel(&id).await?;
    Ok(Json(CancelResult { outcome }))
}

#[utoipa::path(
    get,
    path = "/admin/gallery/uploads",
    responses((status = 200, description = "Uploads in flight", body = [UploadStatus])),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn list_uploads(State(state): State<AppState>, _admin: Admin) -> Json<Vec<UploadStatus>> {
    Json(state.gallery.uploads().snapshot())
}

#[utoipa::path(
    delete,
    path = "/admin/gallery/uploads",
    params(ConfirmQuery),
    responses(
        (status = 200, description = "Every in-flight upload canceled", body = CancelAllResult),
        (status = 428, description = "Missing confirm=true")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn cancel_uploads(
    State(state): State<AppState>,
    _admin: Admin,
    Query(query): Query<ConfirmQuery>,
) -> Result<Json<CancelAllResult>, ApiError> {
    Confirmed::from_flag(query.confirm)?;
    let canceled = state.gallery.uploads().cancel_all().await;
    Ok(Json(CancelAllResult { canceled }))
}

#[utoipa::path(
    get,
    path = "/admin/notices",
    responses((status = 200, description = "Recent background failures, newest first", body = [Notice])),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn notices(State(state): State<AppState>, _admin: Admin) -> Json<Vec<Notice>> {
    Json(state.notices.recent())
}
