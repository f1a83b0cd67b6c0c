//! In-process implementations of the platform contracts. The default binary
//! runs on them and every test uses them as the remote side.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use futures::future::{BoxFuture, FutureExt};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use super::{
    AuthProvider, AuthSession, BlobStorage, Claims, DocPath, Document, DocumentStore,
    FederatedAssertion, Gate, Identity, Query, SetMode, SignInMethod, Snapshot, TransferSink,
    UploadTask, object_url,
};
use crate::error::{StudioError, UploadError};

/// Document store kept in a sorted map keyed by full path.
#[derive(Debug)]
pub struct MemoryDocumentStore {
    documents: RwLock<BTreeMap<DocPath, Document>>,
    writes: Gate,
    reject_writes: AtomicBool,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            writes: Gate::opened(),
            reject_writes: AtomicBool::new(false),
        }
    }

    /// Writes issued from now on wait until [`MemoryDocumentStore::release_writes`].
    pub fn hold_writes(&self) {
        self.writes.close();
    }

    pub fn release_writes(&self) {
        self.writes.release();
    }

    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<DocPath, Document>> {
        self.documents.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<DocPath, Document>> {
        self.documents.write().unwrap_or_else(PoisonError::into_inner)
    }

    async fn admit_write(&self, path: &DocPath) -> Result<(), StudioError> {
        self.writes.pass().await;
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StudioError::RemoteWrite(format!("write to {path} rejected")));
        }
        Ok(())
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn get<'a>(&'a self, path: &'a DocPath) -> BoxFuture<'a, Result<Option<Snapshot>, StudioError>> {
        async move {
            Ok(self.read().get(path).map(|data| Snapshot {
                path: path.clone(),
                data: data.clone(),
            }))
        }
        .boxed()
    }

    fn set<'a>(
        &'a self,
        path: &'a DocPath,
        data: Document,
        mode: SetMode,
    ) -> BoxFuture<'a, Result<(), StudioError>> {
        async move {
            self.admit_write(path).await?;
            let mut documents = self.write();
            match (mode, documents.get_mut(path)) {
                (SetMode::Merge, Some(existing)) => existing.extend(data),
                _ => {
                    documents.insert(path.clone(), data);
                }
            }
            debug!(%path, "document set");
            Ok(())
        }
        .boxed()
    }

    fn update<'a>(
        &'a self,
        path: &'a DocPath,
        fields: Document,
    ) -> BoxFuture<'a, Result<(), StudioError>> {
        async move {
            self.admit_write(path).await?;
            let mut documents = self.write();
            let existing = documents
                .get_mut(path)
                .ok_or_else(|| StudioError::NotFound(format!("document {path}")))?;
            existing.extend(fields);
            debug!(%path, "document updated");
            Ok(())
        }
        .boxed()
    }

    fn delete<'a>(&'a self, path: &'a DocPath) -> BoxFuture<'a, Result<(), StudioError>> {
        async move {
            self.admit_write(path).await?;
            self.write()
                .remove(path)
                .map(|_| debug!(%path, "document deleted"))
                .ok_or_else(|| StudioError::NotFound(format!("document {path}")))
        }
        .boxed()
    }

    fn query<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<Vec<Snapshot>, StudioError>> {
        async move {
            let mut snapshots: Vec<Snapshot> = self
                .read()
                .iter()
                .filter(|(path, data)| query.matches(path, data))
                .map(|(path, data)| Snapshot {
                    path: path.clone(),
                    data: data.clone(),
                })
                .collect();
            query.sort(&mut snapshots);
            Ok(snapshots)
        }
        .boxed()
    }
}

#[derive(Debug, Clone)]
struct PasswordHash {
    salt: String,
    digest: String,
}

impl PasswordHash {
    fn new(password: &str) -> Self {
        let salt = Uuid::new_v4().simple().to_string();
        let digest = Self::digest(&salt, password);
        Self { salt, digest }
    }

    fn digest(salt: &str, password: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(salt.as_bytes());
        hasher.update(b":");
        hasher.update(password.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    fn verify(&self, password: &str) -> bool {
        Self::digest(&self.salt, password) == self.digest
    }
}

#[derive(Debug, Clone)]
struct Account {
    identity: Identity,
    password: Option<PasswordHash>,
}

#[derive(Debug, Default)]
struct AuthState {
    accounts: HashMap<String, Account>,
    by_email: HashMap<String, String>,
    by_subject: HashMap<String, String>,
    sessions: HashMap<String, String>,
}

const ASSERTION_CONTEXT: &str = "fitness-studio 2025 federated assertion";

fn assertion_hash(key: &[u8; 32], subject: &str, email: &str) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new_keyed(key);
    for field in [subject, email] {
        hasher.update(&(field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hasher.finalize()
}

/// Authentication provider holding accounts and sessions in memory.
///
/// Federated sign-in is off until a key is configured with
/// [`MemoryAuthProvider::with_federation_key`].
#[derive(Debug, Default)]
pub struct MemoryAuthProvider {
    state: RwLock<AuthState>,
    admin_emails: HashSet<String>,
    federation_key: Option<[u8; 32]>,
}

impl MemoryAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accounts created with one of these emails carry the admin claim.
    pub fn with_admin_emails<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            state: RwLock::default(),
            admin_emails: emails
                .into_iter()
                .map(|email| email.as_ref().trim().to_lowercase())
                .collect(),
            federation_key: None,
        }
    }

    /// Accepts federated assertions signed with `secret`.
    pub fn with_federation_key(mut self, secret: &str) -> Self {
        self.federation_key = Some(blake3::derive_key(ASSERTION_CONTEXT, secret.as_bytes()));
        self
    }

    /// Issuer side of [`MemoryAuthProvider::with_federation_key`].
    pub fn sign_assertion(secret: &str, subject: &str, email: &str) -> String {
        let key = blake3::derive_key(ASSERTION_CONTEXT, secret.as_bytes());
        assertion_hash(&key, subject, email).to_hex().to_string()
    }

    fn check_assertion(&self, assertion: &FederatedAssertion) -> Result<(), StudioError> {
        let key = self
            .federation_key
            .as_ref()
            .ok_or_else(|| StudioError::Unauthorized("Google sign-in is not enabled".into()))?;
        let expected = assertion_hash(key, &assertion.subject, &assertion.email);
        match blake3::Hash::from_hex(assertion.signature.trim()) {
            // Hash equality is constant time.
            Ok(signature) if signature == expected => Ok(()),
            _ => Err(StudioError::Unauthorized("Invalid Google credential".into())),
        }
    }

    /// Out-of-band claim assignment, the counterpart of the claims CLI.
    pub fn set_custom_claims(&self, uid: &str, claims: Claims) -> Result<(), StudioError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let account = state
            .accounts
            .get_mut(uid)
            .ok_or_else(|| StudioError::NotFound(format!("user {uid}")))?;
        account.identity.claims = claims;
        Ok(())
    }

    fn create_account(
        &self,
        email: Option<&str>,
        display_name: Option<String>,
        method: SignInMethod,
        password: Option<&str>,
    ) -> Result<AuthSession, StudioError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let email = email.map(str::to_lowercase);
        if let Some(email) = &email {
            if state.by_email.contains_key(email) {
                return Err(StudioError::Conflict(format!(
                    "an account with {email} already exists"
                )));
            }
        }
        let uid = Uuid::new_v4().simple().to_string();
        // Only a password sign-up proves control of the email address here.
        let admin = method == SignInMethod::Password
            && email
                .as_ref()
                .is_some_and(|email| self.admin_emails.contains(email));
        let identity = Identity {
            uid: uid.clone(),
            email: email.clone(),
            display_name,
            method,
            claims: Claims { admin },
        };
        if let Some(email) = email {
            state.by_email.insert(email, uid.clone());
        }
        state.accounts.insert(
            uid.clone(),
            Account {
                identity,
                password: password.map(PasswordHash::new),
            },
        );
        Ok(Self::open_session(&mut state, &uid))
    }

    fn open_session(state: &mut AuthState, uid: &str) -> AuthSession {
        let token = Uuid::new_v4().simple().to_string();
        state.sessions.insert(token.clone(), uid.to_string());
        let identity = state.accounts[uid].identity.clone();
        AuthSession { token, identity }
    }
}

impl AuthProvider for MemoryAuthProvider {
    fn sign_in_anonymously(&self) -> BoxFuture<'_, Result<AuthSession, StudioError>> {
        async move { self.create_account(None, None, SignInMethod::Anonymous, None) }.boxed()
    }

    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<AuthSession, StudioError>> {
        async move { self.create_account(Some(email), None, SignInMethod::Password, Some(password)) }
            .boxed()
    }

    fn sign_in<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<AuthSession, StudioError>> {
        async move {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let uid = state
                .by_email
                .get(&email.to_lowercase())
                .cloned()
                .filter(|uid| {
                    state.accounts[uid]
                        .password
                        .as_ref()
                        .is_some_and(|hash| hash.verify(password))
                })
                .ok_or_else(|| StudioError::Unauthorized("Invalid email or password".into()))?;
            Ok(Self::open_session(&mut state, &uid))
        }
        .boxed()
    }

    fn sign_in_federated<'a>(
        &'a self,
        assertion: &'a FederatedAssertion,
    ) -> BoxFuture<'a, Result<AuthSession, StudioError>> {
        async move {
            self.check_assertion(assertion)?;
            {
                let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
                if let Some(uid) = state.by_subject.get(&assertion.subject).cloned() {
                    return Ok(Self::open_session(&mut state, &uid));
                }
            }
            let session = self.create_account(
                Some(&assertion.email),
                assertion.display_name.clone(),
                SignInMethod::Google,
                None,
            )?;
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state
                .by_subject
                .insert(assertion.subject.clone(), session.identity.uid.clone());
            Ok(session)
        }
        .boxed()
    }

    fn verify<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Identity, StudioError>> {
        async move {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            state
                .sessions
                .get(token)
                .and_then(|uid| state.accounts.get(uid))
                .map(|account| account.identity.clone())
                .ok_or_else(|| StudioError::Unauthorized("Invalid authentication token".into()))
        }
        .boxed()
    }
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Blob store that moves bytes chunk by chunk so progress is observable.
#[derive(Debug)]
pub struct MemoryBlobStorage {
    objects: std::sync::Arc<RwLock<HashMap<String, StoredObject>>>,
    public_url: Url,
    chunk_size: usize,
    transfers: Gate,
    injected_failure: Mutex<Option<String>>,
}

impl MemoryBlobStorage {
    pub fn new(public_url: Url, chunk_size: usize) -> Self {
        Self {
            objects: Default::default(),
            public_url,
            chunk_size: chunk_size.max(1),
            transfers: Gate::opened(),
            injected_failure: Mutex::new(None),
        }
    }

    /// Running transfers stop before their next chunk until [`MemoryBlobStorage::resume`].
    pub fn pause(&self) {
        self.transfers.close();
    }

    pub fn resume(&self) {
        self.transfers.release();
    }

    /// The next transfer fails after its first chunk with `reason`.
    pub fn fail_next_upload(&self, reason: impl Into<String>) {
        *self
            .injected_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
    }

    pub fn object(&self, path: &str) -> Option<StoredObject> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }
}

impl BlobStorage for MemoryBlobStorage {
    fn start_upload(&self, path: &str, data: Vec<u8>, content_type: &str) -> UploadTask {
        let (task, sink) = UploadTask::channel();
        let transfer = MemoryTransfer {
            objects: self.objects.clone(),
            path: path.to_string(),
            content_type: content_type.to_string(),
            chunk_size: self.chunk_size,
            gate: self.transfers.clone(),
            failure: self
                .injected_failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        };
        tokio::spawn(transfer.run(data, sink));
        task
    }

    fn download_url<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Url, StudioError>> {
        async move {
            if self.object(path).is_none() {
                return Err(StudioError::NotFound(format!("object {path}")));
            }
            object_url(&self.public_url, path)
        }
        .boxed()
    }

    fn delete<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(), StudioError>> {
        async move {
            self.objects
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(path)
                .map(|_| ())
                .ok_or_else(|| StudioError::NotFound(format!("object {path}")))
        }
        .boxed()
    }
}

struct MemoryTransfer {
    objects: std::sync::Arc<RwLock<HashMap<String, StoredObject>>>,
    path: String,
    content_type: String,
    chunk_size: usize,
    gate: Gate,
    failure: Option<String>,
}

impl MemoryTransfer {
    async fn run(mut self, data: Vec<u8>, sink: TransferSink) {
        let total = data.len().max(1) as f32;
        let mut sent = 0usize;
        sink.progress(0.0).await;

        for chunk in data.chunks(self.chunk_size) {
            tokio::select! {
                _ = sink.canceled() => {
                    sink.fail(UploadError::Canceled).await;
                    return;
                }
                _ = self.gate.pass() => {}
            }
            sent += chunk.len();
            sink.progress(sent as f32 / total).await;
            if let Some(reason) = self.failure.take() {
                sink.fail(UploadError::Other(reason)).await;
                return;
            }
            tokio::task::yield_now().await;
        }

        if sink.is_canceled() {
            sink.fail(UploadError::Canceled).await;
            return;
        }
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                self.path.clone(),
                StoredObject {
                    content_type: self.content_type.clone(),
                    data,
                },
            );
        debug!(path = %self.path, bytes = sent, "object stored");
        sink.complete().await;
    }
}
