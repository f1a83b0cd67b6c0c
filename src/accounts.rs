use std::sync::Arc;

use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;

use crate::error::StudioError;
use crate::models::{Record, UserProfile, paths};
use crate::platform::{AuthProvider, AuthSession, DocumentStore, FederatedAssertion, SetMode};
use crate::validation::{require_text, validate_email, validate_password};
use crate::writes::{BackgroundWrites, PendingWrite};

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignUp {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SignIn {
    pub email: String,
    pub password: String,
}

/// Splits a display name into first name and the rest.
pub fn split_display_name(display_name: Option<&str>) -> (String, String) {
    let mut words = display_name.unwrap_or_default().split_whitespace();
    let first = words.next().unwrap_or_default().to_string();
    let rest = words.collect::<Vec<_>>().join(" ");
    (first, rest)
}

#[derive(Clone)]
pub struct AccountService {
    auth: Arc<dyn AuthProvider>,
    documents: Arc<dyn DocumentStore>,
    writes: BackgroundWrites,
}

impl AccountService {
    pub fn new(auth: Arc<dyn AuthProvider>, documents: Arc<dyn DocumentStore>, writes: BackgroundWrites) -> Self {
        Self {
            auth,
            documents,
            writes,
        }
    }

    pub async fn sign_in_anonymously(&self) -> Result<AuthSession, StudioError> {
        self.auth.sign_in_anonymously().await
    }

    /// Creates the account and writes its profile without waiting for the store.
    pub async fn sign_up(&self, form: SignUp) -> Result<(AuthSession, UserProfile, PendingWrite), StudioError> {
        let email = validate_email(&form.email)?;
        validate_password(&form.password)?;
        let first_name = require_text("firstName", &form.first_name)?;
        let last_name = require_text("lastName", &form.last_name)?;

        let session = self.auth.sign_up(&email, &form.password).await?;
        let profile = UserProfile {
            id: session.identity.uid.clone(),
            first_name,
            last_name,
            email: session.identity.email.clone().unwrap_or(email),
            phone: None,
        };
        let write = self.writes.set(
            "Saving profile",
            paths::user(&profile.id)?,
            profile.to_document()?,
            SetMode::Overwrite,
        );
        info!(uid = %profile.id, "account created");
        Ok((session, profile, write))
    }

    pub async fn sign_in(&self, form: SignIn) -> Result<AuthSession, StudioError> {
        let email = validate_email(&form.email)?;
        self.auth.sign_in(&email, &form.password).await
    }

    /// Signs in with a federated assertion; first-time users get a profile.
    pub async fn sign_in_with_google(
        &self,
        assertion: FederatedAssertion,
    ) -> Result<(AuthSession, Option<PendingWrite>), StudioError> {
        validate_email(&assertion.email)?;
        let session = self.auth.sign_in_federated(&assertion).await?;
        let path = paths::user(&session.identity.uid)?;
        if self.documents.get(&path).await?.is_some() {
            return Ok((session, None));
        }

        let (first_name, last_name) = split_display_name(
            assertion
                .display_name
                .as_deref()
                .or(session.identity.display_name.as_deref()),
        );
        let profile = UserProfile {
            id: session.identity.uid.clone(),
            first_name,
            last_name,
            email: assertion.email.clone(),
            phone: None,
        };
        let write = self
            .writes
            .set("Saving profile", path, profile.to_document()?, SetMode::Overwrite);
        info!(uid = %profile.id, "profile created from federated sign-in");
        Ok((session, Some(write)))
    }

    pub async fn profile(&self, uid: &str) -> Result<UserProfile, StudioError> {
        let path = paths::user(uid)?;
        let snapshot = self
            .documents
            .get(&path)
            .await?
            .ok_or_else(|| StudioError::NotFound("Profile".into()))?;
        UserProfile::from_snapshot(&snapshot)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::platform::memory::{MemoryAuthProvider, MemoryDocumentStore};
    use crate::platform::SignInMethod;
    use crate::writes::{NoticeBoard, RetryPolicy};

    fn service() -> AccountService {
        let documents = Arc::new(MemoryDocumentStore::new());
        let writes = BackgroundWrites::new(
            documents.clone(),
            Arc::new(NoticeBoard::new()),
            RetryPolicy {
                retries: 0,
                backoff: Duration::from_millis(1),
            },
        );
        let auth = MemoryAuthProvider::new().with_federation_key("federation-secret");
        AccountService::new(Arc::new(auth), documents, writes)
    }

    fn sign_up_form(email: &str, password: &str) -> SignUp {
        SignUp {
            email: email.into(),
            password: password.into(),
            first_name: "Asha".into(),
            last_name: "Kumar".into(),
        }
    }

    #[test]
    fn test_split_display_name() {
        assert_eq!(
            split_display_name(Some("Asha Rani Kumar")),
            ("Asha".to_string(), "Rani Kumar".to_string())
        );
        assert_eq!(split_display_name(Some("Asha")), ("Asha".to_string(), String::new()));
        assert_eq!(split_display_name(None), (String::new(), String::new()));
    }

    #[tokio::test]
    async fn test_sign_up_writes_profile() {
        let accounts = service();
        let (session, profile, write) = accounts
            .sign_up(sign_up_form("asha@studio.test", "secret1"))
            .await
            .unwrap();
        write.outcome().await.unwrap();

        assert_eq!(session.identity.method, SignInMethod::Password);
        assert_eq!(accounts.profile(&session.identity.uid).await.unwrap(), profile);

        let again = accounts
            .sign_in(SignIn {
                email: "asha@studio.test".into(),
                password: "secret1".into(),
            })
            .await
            .unwrap();
        assert_eq!(again.identity.uid, session.identity.uid);
    }

    #[tokio::test]
    async fn test_sign_up_validation() {
        let accounts = service();
        assert!(matches!(
            accounts.sign_up(sign_up_form("asha@studio.test", "12345")).await,
            Err(StudioError::Validation(_))
        ));
        assert!(matches!(
            accounts.sign_up(sign_up_form("not-an-email", "secret1")).await,
            Err(StudioError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_google_sign_in_creates_profile_once() {
        let accounts = service();
        let assertion = FederatedAssertion {
            subject: "google-123".into(),
            email: "meera@studio.test".into(),
            display_name: Some("Meera S Iyer".into()),
            signature: MemoryAuthProvider::sign_assertion(
                "federation-secret",
                "google-123",
                "meera@studio.test",
            ),
        };

        let (session, write) = accounts.sign_in_with_google(assertion.clone()).await.unwrap();
        write.unwrap().outcome().await.unwrap();
        let profile = accounts.profile(&session.identity.uid).await.unwrap();
        assert_eq!(profile.first_name, "Meera");
        assert_eq!(profile.last_name, "S Iyer");

        let (again, write) = accounts.sign_in_with_google(assertion).await.unwrap();
        assert_eq!(again.identity.uid, session.identity.uid);
        assert!(write.is_none());
    }

    #[tokio::test]
    async fn test_missing_profile() {
        let accounts = service();
        let session = accounts.sign_in_anonymously().await.unwrap();
        assert!(session.identity.is_anonymous());
        assert!(accounts.profile(&session.identity.uid).await.unwrap_err().is_not_found());
    }
}
