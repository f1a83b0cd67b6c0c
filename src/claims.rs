//! Grants the `admin` custom claim through the auth provider's admin API.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use config::{Config, ConfigError, Environment};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

pub const UID_PLACEHOLDER: &str = "PASTE_YOUR_USER_ID_HERE";

#[derive(Debug, Error)]
pub enum ClaimsError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("APP_ADMIN_UID must be set to the UID of the user to promote")]
    MissingUid,
    #[error("Could not read service account {path}: {source}")]
    ServiceAccount {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed service account: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("authUrl {0} cannot be a base URL")]
    BadAuthUrl(Url),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("User {0} not found")]
    NotFound(String),
    #[error("Claims request rejected with {0}")]
    Rejected(StatusCode),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimsSettings {
    pub admin_uid: String,
    pub service_account_path: PathBuf,
}

impl ClaimsSettings {
    pub fn from_env() -> Result<Self, ClaimsError> {
        let _ = dotenvy::dotenv();

        let settings: Self = Config::builder()
            .add_source(Environment::with_prefix("APP"))
            .set_default("admin_uid", "")?
            .set_default("service_account_path", "serviceAccountKey.json")?
            .build()?
            .try_deserialize()?;

        let uid = settings.admin_uid.trim();
        if uid.is_empty() || uid == UID_PLACEHOLDER {
            return Err(ClaimsError::MissingUid);
        }
        Ok(settings)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccount {
    pub project_id: String,
    pub auth_url: Url,
    pub client_email: String,
    pub token: String,
}

impl ServiceAccount {
    pub fn load(path: &Path) -> Result<Self, ClaimsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ClaimsError::ServiceAccount {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

pub struct ClaimsClient {
    client: reqwest::Client,
    account: ServiceAccount,
}

impl ClaimsClient {
    pub fn new(account: ServiceAccount) -> Self {
        Self {
            client: reqwest::Client::new(),
            account,
        }
    }

    fn claims_url(&self, uid: &str) -> Result<Url, ClaimsError> {
        let mut url = self.account.auth_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClaimsError::BadAuthUrl(self.account.auth_url.clone()))?
            .pop_if_empty()
            .extend(["v1", "projects", self.account.project_id.as_str(), "accounts", uid, "claims"]);
        Ok(url)
    }

    /// Sets `{"admin": true}` on the user. Repeating it is harmless.
    pub async fn grant_admin(&self, uid: &str) -> Result<(), ClaimsError> {
        let response = self
            .client
            .put(self.claims_url(uid)?)
            .bearer_auth(&self.account.token)
            .json(&json!({ "admin": true }))
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(ClaimsError::NotFound(uid.to_string())),
            status => Err(ClaimsError::Rejected(status)),
        }
    }
}

pub async fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .without_time()
        .init();

    match grant().await {
        Ok(uid) => {
            info!("Successfully set admin claim for user: {uid}");
            info!("The user can open the admin console after signing out and back in");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("Error setting custom claim: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn grant() -> Result<String, ClaimsError> {
    let settings = ClaimsSettings::from_env()?;
    let account = ServiceAccount::load(&settings.service_account_path)?;
    info!(client = %account.client_email, project = %account.project_id, "service account loaded");
    let uid = settings.admin_uid.trim().to_string();
    ClaimsClient::new(account).grant_admin(&uid).await?;
    Ok(uid)
}
