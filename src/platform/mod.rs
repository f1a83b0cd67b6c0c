//! Contracts of the managed platform the studio runs on: a document store,
//! an authentication provider and a blob store. Everything above this module
//! talks to them only through these traits.

pub mod http_blob;
pub mod memory;

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use url::Url;
use utoipa::ToSchema;

use crate::error::{StudioError, UploadError};

pub type Document = serde_json::Map<String, Value>;

/// Slash separated path of a document, e.g. `users/u1/bookings/b1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath(String);

impl DocPath {
    pub fn new(segments: &[&str]) -> Result<Self, StudioError> {
        if segments.is_empty() || segments.len() % 2 != 0 {
            return Err(StudioError::Internal(format!(
                "document path needs collection/id pairs: {segments:?}"
            )));
        }
        if segments
            .iter()
            .any(|segment| segment.is_empty() || segment.contains('/'))
        {
            return Err(StudioError::Validation(format!(
                "invalid document path segment in {segments:?}"
            )));
        }
        Ok(Self(segments.join("/")))
    }

    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// Path of the collection holding this document.
    pub fn collection(&self) -> &str {
        self.0.rsplit_once('/').map(|(parent, _)| parent).unwrap_or_default()
    }

    /// Last segment of [`DocPath::collection`], the collection-group name.
    pub fn collection_name(&self) -> &str {
        self.collection().rsplit('/').next().unwrap_or_default()
    }

    /// Id of the document owning this document's sub-collection, if any.
    pub fn parent_id(&self) -> Option<&str> {
        let mut segments = self.0.rsplit('/');
        segments.nth(2)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: DocPath,
    pub data: Document,
}

impl Snapshot {
    pub fn id(&self) -> &str {
        self.path.id()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    Overwrite,
    Merge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Collection(String),
    /// Every collection with this name, at any depth.
    Group(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gte,
    Lte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub source: Source,
    pub filters: Vec<Filter>,
    pub order_by: Vec<(String, Direction)>,
}

impl Query {
    pub fn collection(path: impl Into<String>) -> Self {
        Self {
            source: Source::Collection(path.into()),
            filters: Vec::new(),
            order_by: Vec::new(),
        }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self {
            source: Source::Group(name.into()),
            filters: Vec::new(),
            order_by: Vec::new(),
        }
    }

    pub fn filter(mut self, field: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by.push((field.to_string(), direction));
        self
    }

    pub fn matches(&self, path: &DocPath, data: &Document) -> bool {
        let in_source = match &self.source {
            Source::Collection(collection) => path.collection() == collection,
            Source::Group(name) => path.collection_name() == name,
        };
        in_source
            && self.filters.iter().all(|filter| {
                let Some(actual) = data.get(&filter.field) else {
                    return false;
                };
                match (filter.op, compare_values(actual, &filter.value)) {
                    (FilterOp::Eq, Some(Ordering::Equal)) => true,
                    (FilterOp::Gte, Some(Ordering::Greater | Ordering::Equal)) => true,
                    (FilterOp::Lte, Some(Ordering::Less | Ordering::Equal)) => true,
                    _ => false,
                }
            })
    }

    pub fn sort(&self, snapshots: &mut [Snapshot]) {
        snapshots.sort_by(|a, b| {
            for (field, direction) in &self.order_by {
                let ordering = match (a.data.get(field), b.data.get(field)) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Greater,
                    (None, Some(_)) => Ordering::Less,
                    (None, None) => Ordering::Equal,
                };
                let ordering = match direction {
                    Direction::Asc => ordering,
                    Direction::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.path.cmp(&b.path)
        });
    }
}

/// Values of different kinds are not comparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

pub trait DocumentStore: Send + Sync {
    /// Reads one document.
    fn get<'a>(&'a self, path: &'a DocPath) -> BoxFuture<'a, Result<Option<Snapshot>, StudioError>>;

    /// Creates or replaces a document, or merges fields into it.
    fn set<'a>(
        &'a self,
        path: &'a DocPath,
        data: Document,
        mode: SetMode,
    ) -> BoxFuture<'a, Result<(), StudioError>>;

    /// Merges fields into an existing document; `NotFound` when absent.
    fn update<'a>(
        &'a self,
        path: &'a DocPath,
        fields: Document,
    ) -> BoxFuture<'a, Result<(), StudioError>>;

    /// Removes a document; `NotFound` when absent.
    fn delete<'a>(&'a self, path: &'a DocPath) -> BoxFuture<'a, Result<(), StudioError>>;

    fn query<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<Vec<Snapshot>, StudioError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub struct Claims {
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SignInMethod {
    Anonymous,
    Password,
    Google,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub method: SignInMethod,
    pub claims: Claims,
}

impl Identity {
    pub fn is_anonymous(&self) -> bool {
        self.method == SignInMethod::Anonymous
    }

    pub fn is_admin(&self) -> bool {
        self.claims.admin
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub token: String,
    pub identity: Identity,
}

/// Identity asserted by a federated provider after its popup flow.
///
/// Providers only accept it when `signature` checks out against the
/// issuer's key. It never carries claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FederatedAssertion {
    pub subject: String,
    pub email: String,
    pub display_name: Option<String>,
    /// Hex keyed hash over subject and email, issued by the identity provider.
    pub signature: String,
}

pub trait AuthProvider: Send + Sync {
    fn sign_in_anonymously(&self) -> BoxFuture<'_, Result<AuthSession, StudioError>>;

    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<AuthSession, StudioError>>;

    fn sign_in<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<AuthSession, StudioError>>;

    fn sign_in_federated<'a>(
        &'a self,
        assertion: &'a FederatedAssertion,
    ) -> BoxFuture<'a, Result<AuthSession, StudioError>>;

    /// Resolves a session token, claims included.
    fn verify<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Identity, StudioError>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// Fraction of bytes acknowledged, in `0.0..=1.0`.
    Progress(f32),
    Completed,
    Failed(UploadError),
}

/// Cancels the transfer it was issued with. Cancelling twice is harmless.
#[derive(Debug, Clone)]
pub struct TransferHandle {
    cancel: Arc<watch::Sender<bool>>,
}

impl TransferHandle {
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }
}

pub struct UploadTask {
    pub events: mpsc::Receiver<TransferEvent>,
    pub handle: TransferHandle,
}

impl UploadTask {
    pub fn channel() -> (UploadTask, TransferSink) {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        (
            UploadTask {
                events: events_rx,
                handle: TransferHandle {
                    cancel: Arc::new(cancel_tx),
                },
            },
            TransferSink {
                events: events_tx,
                canceled: cancel_rx,
            },
        )
    }
}

/// Producer side of an [`UploadTask`], owned by the storage implementation.
pub struct TransferSink {
    events: mpsc::Sender<TransferEvent>,
    canceled: watch::Receiver<bool>,
}

impl TransferSink {
    pub async fn progress(&self, fraction: f32) {
        let _ = self.events.send(TransferEvent::Progress(fraction)).await;
    }

    pub async fn complete(self) {
        let _ = self.events.send(TransferEvent::Completed).await;
    }

    pub async fn fail(self, reason: UploadError) {
        let _ = self.events.send(TransferEvent::Failed(reason)).await;
    }

    pub fn is_canceled(&self) -> bool {
        *self.canceled.borrow()
    }

    /// Resolves once cancellation was requested; never if the handle is gone.
    pub async fn canceled(&self) {
        let mut canceled = self.canceled.clone();
        if canceled.wait_for(|flag| *flag).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub trait BlobStorage: Send + Sync {
    /// Starts a resumable upload and returns immediately.
    fn start_upload(&self, path: &str, data: Vec<u8>, content_type: &str) -> UploadTask;

    fn download_url<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Url, StudioError>>;

    /// `NotFound` when there is no object at `path`.
    fn delete<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(), StudioError>>;
}

/// Builds `base/<path segments>` with every segment percent-encoded.
pub fn object_url(base: &Url, path: &str) -> Result<Url, StudioError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| StudioError::Internal(format!("{base} cannot be a base URL")))?
        .pop_if_empty()
        .extend(path.split('/'));
    Ok(url)
}

/// A latch that tests and the in-memory backends use to hold work back.
#[derive(Debug, Clone)]
pub struct Gate {
    open: Arc<watch::Sender<bool>>,
}

impl Gate {
    pub fn opened() -> Self {
        Self {
            open: Arc::new(watch::channel(true).0),
        }
    }

    pub fn close(&self) {
        self.open.send_replace(false);
    }

    pub fn release(&self) {
        self.open.send_replace(true);
    }

    pub async fn pass(&self) {
        let mut open = self.open.subscribe();
        let _ = open.wait_for(|flag| *flag).await;
    }
}
