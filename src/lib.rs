pub mod accounts;
pub mod auth;
pub mod booking;
pub mod capacity;
pub mod claims;
pub mod error;
pub mod gallery;
pub mod handlers;
pub mod ical;
pub mod models;
pub mod openapi;
pub mod platform;
pub mod review;
pub mod schedule;
pub mod settings;
pub mod validation;
pub mod writes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    routing::{get, post, put},
};
use config::ConfigError;
use tower_http::LatencyUnit;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::accounts::AccountService;
use crate::booking::BookingService;
use crate::capacity::{CapacityEstimator, NominalCapacity};
use crate::gallery::{GalleryService, UploadCoordinator};
use crate::handlers::{account, admin, classes, gallery as public_gallery};
use crate::ical::ICalExporter;
use crate::openapi::ApiDoc;
use crate::platform::http_blob::HttpBlobStorage;
use crate::platform::memory::{MemoryAuthProvider, MemoryBlobStorage, MemoryDocumentStore};
use crate::platform::{AuthProvider, BlobStorage, DocumentStore};
use crate::review::BookingReview;
use crate::schedule::ScheduleService;
use crate::settings::{BlobBackend, Settings};
use crate::writes::{BackgroundWrites, NoticeBoard, RetryPolicy};

/// Room for multipart framing on top of the image itself.
const MULTIPART_SLACK: usize = 64 * 1024;

/// The three remote collaborators the service is built on.
#[derive(Clone)]
pub struct Platform {
    pub documents: Arc<dyn DocumentStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub blobs: Arc<dyn BlobStorage>,
}

impl Platform {
    pub fn in_memory(settings: &Settings) -> Self {
        let mut auth = MemoryAuthProvider::with_admin_emails(&settings.admin_emails);
        if let Some(key) = settings.google_assertion_key.as_deref() {
            auth = auth.with_federation_key(key);
        }
        Self {
            documents: Arc::new(MemoryDocumentStore::new()),
            auth: Arc::new(auth),
            blobs: Arc::new(MemoryBlobStorage::new(
                settings.blob_public_url.clone(),
                settings.upload_chunk_size,
            )),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let mut platform = Self::in_memory(settings);
        if settings.blob_backend == BlobBackend::Http {
            let api_url = settings.blob_api_url.clone().ok_or_else(|| {
                ConfigError::Message("APP_BLOB_API_URL is required for the http blob backend".into())
            })?;
            platform.blobs = Arc::new(HttpBlobStorage::new(
                api_url,
                settings.blob_public_url.clone(),
                settings.blob_api_token.clone(),
                settings.upload_chunk_size,
            ));
        }
        Ok(platform)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub timezone: chrono_tz::Tz,
    pub platform: Platform,
    pub notices: Arc<NoticeBoard>,
    pub schedules: ScheduleService,
    pub bookings: BookingService,
    pub review: BookingReview,
    pub gallery: GalleryService,
    pub accounts: AccountService,
    pub exporter: Arc<ICalExporter>,
}

impl AppState {
    pub fn new(settings: Settings, platform: Platform) -> Result<Self, ConfigError> {
        Self::with_capacity(settings, platform, Arc::new(NominalCapacity))
    }

    pub fn with_capacity(
        settings: Settings,
        platform: Platform,
        capacity: Arc<dyn CapacityEstimator>,
    ) -> Result<Self, ConfigError> {
        let timezone = settings.studio_timezone()?;
        let notices = Arc::new(NoticeBoard::new());
        let policy = RetryPolicy::new(settings.write_retries);
        let writes = BackgroundWrites::new(platform.documents.clone(), notices.clone(), policy);

        let schedules = ScheduleService::new(platform.documents.clone(), writes.clone());
        let bookings = BookingService::new(
            platform.documents.clone(),
            writes.clone(),
            schedules.clone(),
            capacity,
        );
        let review = BookingReview::new(platform.documents.clone(), writes.clone());
        let uploads = Arc::new(UploadCoordinator::new(
            platform.documents.clone(),
            platform.blobs.clone(),
            notices.clone(),
            policy,
            settings.max_upload_bytes,
        ));
        let gallery = GalleryService::new(platform.documents.clone(), uploads);
        let accounts = AccountService::new(platform.auth.clone(), platform.documents.clone(), writes);
        let exporter = Arc::new(ICalExporter::new(
            settings.studio_name.clone(),
            settings.studio_address.clone(),
            timezone,
        ));

        Ok(Self {
            settings,
            timezone,
            platform,
            notices,
            schedules,
            bookings,
            review,
            gallery,
            accounts,
            exporter,
        })
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;

    let env_filter = if settings.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .without_time()
        .init();

    let platform = Platform::from_settings(&settings)?;
    let state = AppState::new(settings, platform)?;
    let app = build_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], state.settings.port));
    info!("Starting {} API on {addr}", state.settings.studio_name);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    let canceled = state.gallery.uploads().cancel_all().await;
    if canceled > 0 {
        info!(canceled, "canceled uploads still running at shutdown");
    }
    state.gallery.uploads().wait_idle().await;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    let gallery_admin = Router::new()
        .route(
            "/admin/gallery",
            get(admin::list_gallery).post(admin::create_gallery_item),
        )
        .route(
            "/admin/gallery/{id}",
            put(admin::update_gallery_item).delete(admin::delete_gallery_item),
        )
        .layer(DefaultBodyLimit::max(
            state.settings.max_upload_bytes + MULTIPART_SLACK,
        ));

    let mut router = Router::new()
        .route("/", get(handlers::root))
        .route("/healthz/live", get(handlers::healthz_live))
        .route("/healthz/ready", get(handlers::healthz_ready))
        .route("/contact", get(handlers::contact))
        .route("/classes", get(classes::list_classes))
        .route("/classes.ical", get(classes::get_ical))
        .route("/classes/{id}/bookings", post(classes::book_class))
        .route("/gallery", get(public_gallery::list_gallery))
        .route("/auth/anonymous", post(account::sign_in_anonymously))
        .route("/auth/signup", post(account::sign_up))
        .route("/auth/signin", post(account::sign_in))
        .route("/auth/google", post(account::sign_in_with_google))
        .route("/me", get(account::me))
        .route("/me/bookings", get(account::my_bookings))
        .route(
            "/admin/classes",
            get(admin::list_classes).post(admin::create_class),
        )
        .route(
            "/admin/classes/{id}",
            put(admin::update_class).delete(admin::delete_class),
        )
        .route("/admin/bookings/pending", get(admin::pending_bookings))
        .route(
            "/admin/bookings/{user_id}/{booking_id}/status",
            post(admin::set_booking_status),
        )
        .route(
            "/admin/gallery/uploads",
            get(admin::list_uploads).delete(admin::cancel_uploads),
        )
        .route("/admin/notices", get(admin::notices))
        .merge(gallery_admin)
        .with_state(state.clone());

    if state.settings.enable_swagger {
        let openapi = ApiDoc::openapi();
        let swagger = SwaggerUi::new("/docs").url("/openapi.json", openapi);
        router = router.merge(swagger);
    }

    router.layer(trace_layer)
}
