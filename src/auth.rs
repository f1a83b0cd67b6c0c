use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;

use crate::AppState;
use crate::error::{ApiError, StudioError};
use crate::platform::{AuthProvider, Identity};

/// Resolves an optional bearer token. A token that does not verify is an error.
pub async fn identify(
    auth: &dyn AuthProvider,
    bearer: Option<Authorization<Bearer>>,
) -> Result<Option<Identity>, StudioError> {
    match bearer {
        Some(bearer) => auth.verify(bearer.token()).await.map(Some),
        None => Ok(None),
    }
}

pub fn require_member(viewer: Option<Identity>) -> Result<Identity, StudioError> {
    viewer
        .filter(|identity| !identity.is_anonymous())
        .ok_or(StudioError::AuthRequired)
}

pub fn require_admin(viewer: Option<Identity>) -> Result<Identity, StudioError> {
    let identity = viewer.ok_or(StudioError::AuthRequired)?;
    if identity.is_admin() {
        Ok(identity)
    } else {
        Err(StudioError::Forbidden(
            "Administrator access is required".into(),
        ))
    }
}

async fn viewer_from_parts(parts: &mut Parts, state: &AppState) -> Result<Option<Identity>, ApiError> {
    let bearer = <TypedHeader<Authorization<Bearer>> as OptionalFromRequestParts<AppState>>::from_request_parts(parts, state)
        .await
        .map_err(|_| ApiError::Unauthorized("Malformed Authorization header".into()))?
        .map(|TypedHeader(bearer)| bearer);
    Ok(identify(state.platform.auth.as_ref(), bearer).await?)
}

/// Whoever is calling, possibly nobody.
#[derive(Debug, Clone)]
pub struct Viewer(pub Option<Identity>);

impl FromRequestParts<AppState> for Viewer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(Viewer(viewer_from_parts(parts, state).await?))
    }
}

/// A signed-in, non-anonymous user.
#[derive(Debug, Clone)]
pub struct Member(pub Identity);

impl FromRequestParts<AppState> for Member {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let viewer = viewer_from_parts(parts, state).await?;
        Ok(Member(require_member(viewer)?))
    }
}

/// A user carrying the `admin` claim.
#[derive(Debug, Clone)]
pub struct Admin(pub Identity);

impl FromRequestParts<AppState> for Admin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let viewer = viewer_from_parts(parts, state).await?;
        Ok(Admin(require_admin(viewer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::MemoryAuthProvider;
    use crate::platform::{Claims, SignInMethod};

    fn identity(method: SignInMethod, admin: bool) -> Identity {
        Identity {
            uid: "u1".into(),
            email: None,
            display_name: None,
            method,
            claims: Claims { admin },
        }
    }

    #[test]
    fn test_require_member() {
        assert_eq!(require_member(None).unwrap_err(), StudioError::AuthRequired);
        assert_eq!(
            require_member(Some(identity(SignInMethod::Anonymous, false))).unwrap_err(),
            StudioError::AuthRequired
        );
        assert!(require_member(Some(identity(SignInMethod::Google, false))).is_ok());
    }

    #[test]
    fn test_require_admin() {
        assert_eq!(require_admin(None).unwrap_err(), StudioError::AuthRequired);
        assert!(matches!(
            require_admin(Some(identity(SignInMethod::Password, false))),
            Err(StudioError::Forbidden(_))
        ));
        assert!(require_admin(Some(identity(SignInMethod::Password, true))).is_ok());
    }

    #[tokio::test]
    async fn test_identify_header() {
        let auth = MemoryAuthProvider::new();
        let session = auth.sign_in_anonymously().await.unwrap();

        let bearer = Authorization::bearer(&session.token).unwrap();
        let viewer = identify(&auth, Some(bearer)).await.unwrap();
        assert_eq!(viewer.unwrap().uid, session.identity.uid);

        assert_eq!(identify(&auth, None).await.unwrap(), None);

        let forged = Authorization::bearer("forged").unwrap();
        assert!(matches!(
            identify(&auth, Some(forged)).await,
            Err(StudioError::Unauthorized(_))
        ));
    }
}
