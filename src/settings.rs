use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    Memory,
    Http,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    pub debug: bool,
    pub enable_swagger: bool,
    pub port: u16,
    pub studio_name: String,
    pub studio_address: String,
    pub studio_phone: String,
    pub studio_email: String,
    pub studio_latitude: f64,
    pub studio_longitude: f64,
    pub timezone: String,
    pub blob_backend: BlobBackend,
    pub blob_api_url: Option<Url>,
    pub blob_public_url: Url,
    pub blob_api_token: Option<String>,
    pub upload_chunk_size: usize,
    pub max_upload_bytes: usize,
    pub write_retries: u32,
    #[serde(default)]
    pub admin_emails: Vec<String>,
    /// Shared key federated assertions are signed with. Google sign-in is
    /// refused while it is unset.
    #[serde(default)]
    pub google_assertion_key: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let config = Config::builder()
            // Load from environment variables with APP_ prefix
            .add_source(
                Environment::with_prefix("APP")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("admin_emails"),
            )
            .set_default("debug", false)?
            .set_default("enable_swagger", true)?
            .set_default("port", 8080)?
            .set_default("studio_name", "One Fitness Studio")?
            .set_default(
                "studio_address",
                "Kaggadasapura Main Rd, Nagavarapalya, Bengaluru, Karnataka 560093",
            )?
            .set_default("studio_phone", "+91 7981304029")?
            .set_default("studio_email", "onefitnessstudios@gmail.com")?
            .set_default("studio_latitude", 12.985074)?
            .set_default("studio_longitude", 77.6734407)?
            .set_default("timezone", "Asia/Kolkata")?
            .set_default("blob_backend", "memory")?
            .set_default("blob_public_url", "http://localhost:8080/media/")?
            .set_default("upload_chunk_size", 256 * 1024)?
            .set_default("max_upload_bytes", 10 * 1024 * 1024)?
            .set_default("write_retries", 2)?
            .build()?;

        config.try_deserialize()
    }

    pub fn studio_timezone(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.timezone
            .parse()
            .map_err(|err| ConfigError::Message(format!("invalid timezone: {err}")))
    }

    pub fn is_admin_email(&self, email: &str) -> bool {
        self.admin_emails
            .iter()
            .any(|candidate| candidate.trim().eq_ignore_ascii_case(email))
    }
}
