use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::accounts::{SignIn, SignUp};
use crate::booking::{Availability, ClassListing};
use crate::gallery::{
    AdminGalleryEntry, CancelOutcome, UploadPhase, UploadProgress, UploadStatus, UploadTicket,
};
use crate::handlers::Contact;
use crate::handlers::account::{Me, SignUpResponse};
use crate::handlers::admin::{CancelAllResult, CancelResult, GalleryForm, StatusAccepted, StatusChange};
use crate::handlers::classes::BookingRequest;
use crate::models::{Booking, BookingStatus, ClassSchedule, Difficulty, GalleryItem, ItemType, UserProfile};
use crate::platform::{AuthSession, Claims, FederatedAssertion, Identity, SignInMethod};
use crate::review::PendingBooking;
use crate::schedule::ClassDraft;
use crate::writes::Notice;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("session token")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz_live,
        crate::handlers::healthz_ready,
        crate::handlers::contact,
        crate::handlers::classes::list_classes,
        crate::handlers::classes::get_ical,
        crate::handlers::classes::book_class,
        crate::handlers::gallery::list_gallery,
        crate::handlers::account::sign_in_anonymously,
        crate::handlers::account::sign_up,
        crate::handlers::account::sign_in,
        crate::handlers::account::sign_in_with_google,
        crate::handlers::account::me,
        crate::handlers::account::my_bookings,
        crate::handlers::admin::list_classes,
        crate::handlers::admin::create_class,
        crate::handlers::admin::update_class,
        crate::handlers::admin::delete_class,
        crate::handlers::admin::pending_bookings,
        crate::handlers::admin::set_booking_status,
        crate::handlers::admin::list_gallery,
        crate::handlers::admin::create_gallery_item,
        crate::handlers::admin::update_gallery_item,
        crate::handlers::admin::delete_gallery_item,
        crate::handlers::admin::list_uploads,
        crate::handlers::admin::cancel_uploads,
        crate::handlers::admin::notices
    ),
    components(schemas(
        ClassSchedule, Difficulty, ClassListing, Availability, ClassDraft, BookingRequest,
        Booking, BookingStatus, PendingBooking, StatusChange, StatusAccepted,
        GalleryItem, ItemType, GalleryForm, AdminGalleryEntry, UploadTicket, UploadStatus,
        UploadProgress, UploadPhase, CancelOutcome, CancelResult, CancelAllResult,
        UserProfile, SignUp, SignIn, SignUpResponse, Me, AuthSession, Identity, Claims,
        SignInMethod, FederatedAssertion, Contact, Notice
    )),
    tags(
        (name = "studio", description = "Service and studio information"),
        (name = "classes", description = "Class schedule and demo bookings"),
        (name = "gallery", description = "Public gallery"),
        (name = "account", description = "Sign-up, sign-in and profile"),
        (name = "admin", description = "Administration console")
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;
