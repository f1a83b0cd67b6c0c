pub mod account;
pub mod admin;
pub mod classes;
pub mod gallery;

use axum::{Json, extract::State, response::IntoResponse};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::AppState;

/// `?confirm=true` guard of destructive endpoints.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ConfirmQuery {
    /// Must be `true` for the action to run.
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub name: String,
    pub address: String,
    pub phone: String,
    pub email: String,
    pub latitude: f64,
    pub longitude: f64,
    pub map_url: String,
}

pub(crate) fn studio_today(state: &AppState) -> NaiveDate {
    Utc::now().with_timezone(&state.timezone).date_naive()
}

#[utoipa::path(get, path = "/", tag = "studio")]
pub async fn root(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "message": format!("{} API", state.settings.studio_name),
        "endpoints": {
            "/classes": "Upcoming classes with availability",
            "/classes.ical": "Upcoming classes as an iCal feed",
            "/gallery": "Public gallery, optionally filtered by itemType",
            "/contact": "Studio contact details",
            "/auth/signup": "Create an account",
            "/me/bookings": "Your booking history"
        }
    }))
}

#[utoipa::path(get, path = "/healthz/live", tag = "studio")]
pub async fn healthz_live() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[utoipa::path(get, path = "/healthz/ready", tag = "studio")]
pub async fn healthz_ready() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[utoipa::path(
    get,
    path = "/contact",
    responses((status = 200, description = "Studio contact details", body = Contact)),
    tag = "studio"
)]
pub async fn contact(State(state): State<AppState>) -> Json<Contact> {
    let settings = &state.settings;
    Json(Contact {
        name: settings.studio_name.clone(),
        address: settings.studio_address.clone(),
        phone: settings.studio_phone.clone(),
        email: settings.studio_email.clone(),
        latitude: settings.studio_latitude,
        longitude: settings.studio_longitude,
        map_url: format!(
            "https://www.google.com/maps/search/?api=1&query={},{}",
            settings.studio_latitude, settings.studio_longitude
        ),
    })
}
