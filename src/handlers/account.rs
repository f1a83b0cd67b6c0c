use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use utoipa::ToSchema;

use crate::AppState;
use crate::accounts::{SignIn, SignUp};
use crate::auth::{Member, Viewer};
use crate::error::{ApiError, StudioError};
use crate::models::{Booking, UserProfile};
use crate::platform::{AuthSession, FederatedAssertion, Identity};

#[derive(Debug, Serialize, ToSchema)]
pub struct SignUpResponse {
    pub session: AuthSession,
    pub profile: UserProfile,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Me {
    pub identity: Identity,
    /// Absent for guests and until the profile write lands.
    pub profile: Option<UserProfile>,
}

#[utoipa::path(
    post,
    path = "/auth/anonymous",
    responses((status = 200, description = "Guest session", body = AuthSession)),
    tag = "account"
)]
pub async fn sign_in_anonymously(State(state): State<AppState>) -> Result<Json<AuthSession>, ApiError> {
    Ok(Json(state.accounts.sign_in_anonymously().await?))
}

#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignUp,
    responses(
        (status = 201, description = "Account created", body = SignUpResponse),
        (status = 400, description = "Invalid email, password or name"),
        (status = 409, description = "Email already registered")
    ),
    tag = "account"
)]
pub async fn sign_up(
    State(state): State<AppState>,
    Json(form): Json<SignUp>,
) -> Result<impl IntoResponse, ApiError> {
    let (session, profile, _write) = state.accounts.sign_up(form).await?;
    Ok((StatusCode::CREATED, Json(SignUpResponse { session, profile })))
}

#[utoipa::path(
    post,
    path = "/auth/signin",
    request_body = SignIn,
    responses(
        (status = 200, description = "Signed in", body = AuthSession),
        (status = 401, description = "Invalid email or password")
    ),
    tag = "account"
)]
pub async fn sign_in(
    State(state): State<AppState>,
    Json(form): Json<SignIn>,
) -> Result<Json<AuthSession>, ApiError> {
    Ok(Json(state.accounts.sign_in(form).await?))
}

#[utoipa::path(
    post,
    path = "/auth/google",
    request_body = FederatedAssertion,
    responses(
        (status = 200, description = "Signed in with Google", body = AuthSession),
        (status = 401, description = "Google sign-in is disabled or the credential is not signed")
    ),
    tag = "account"
)]
pub async fn sign_in_with_google(
    State(state): State<AppState>,
    Json(assertion): Json<FederatedAssertion>,
) -> Result<Json<AuthSession>, ApiError> {
    let (session, _write) = state.accounts.sign_in_with_google(assertion).await?;
    Ok(Json(session))
}

#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Current identity and profile", body = Me),
        (status = 401, description = "Not signed in")
    ),
    security(("bearer_auth" = [])),
    tag = "account"
)]
pub async fn me(State(state): State<AppState>, Viewer(viewer): Viewer) -> Result<Json<Me>, ApiError> {
    let identity = viewer.ok_or(StudioError::AuthRequired)?;
    let profile = match state.accounts.profile(&identity.uid).await {
        Ok(profile) => Some(profile),
        Err(err) if err.is_not_found() => None,
        Err(err) => return Err(err.into()),
    };
    Ok(Json(Me { identity, profile }))
}

#[utoipa::path(
    get,
    path = "/me/bookings",
    responses(
        (status = 200, description = "Your bookings, newest first", body = [Booking]),
        (status = 401, description = "Sign in with an account first")
    ),
    security(("bearer_auth" = [])),
    tag = "account"
)]
pub async fn my_bookings(
    State(state): State<AppState>,
    Member(identity): Member,
) -> Result<Json<Vec<Booking>>, ApiError> {
    Ok(Json(state.bookings.history(&identity.uid).await?))
}
