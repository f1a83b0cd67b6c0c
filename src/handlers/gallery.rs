use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::AppState;
use crate::error::ApiError;
use crate::models::{GalleryItem, ItemType};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct GalleryQuery {
    /// `venue` or `competition`; everything when absent.
    pub item_type: Option<ItemType>,
}

#[utoipa::path(
    get,
    path = "/gallery",
    params(GalleryQuery),
    responses((status = 200, description = "Gallery items with a displayable image", body = [GalleryItem])),
    tag = "gallery"
)]
pub async fn list_gallery(
    State(state): State<AppState>,
    Query(query): Query<GalleryQuery>,
) -> Result<Json<Vec<GalleryItem>>, ApiError> {
    Ok(Json(state.gallery.public_items(query.item_type).await?))
}
