use crate::auth::SESSION_ID_LEN;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Lifetime of a record after its last save, two weeks.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Opaque session identifier carried by the session cookie.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Create a random identifier made of alphanumeric characters.
    pub fn random() -> SessionId {
        let mut rng = rand::thread_rng();
        let id: String = (&mut rng)
            .sample_iter(rand::distributions::Alphanumeric)
            .take(SESSION_ID_LEN)
            .map(char::from)
            .collect();
        SessionId(id)
    }

    /// Accepts a cookie value only if it has the shape of an id we issue.
    pub fn parse(value: &str) -> Option<SessionId> {
        if value.len() == SESSION_ID_LEN && value.bytes().all(|b| b.is_ascii_alphanumeric()) {
            Some(SessionId(value.to_string()))
        } else {
            None
        }
    }

    /// The cookie value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Snapshot of the user taken at login.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    /// Textual user id, validated again by the resolver on every request.
    pub id: String,
    /// Email at login time.
    pub email: String,
    /// Admin flag at login time. Authorization never trusts it.
    pub is_admin: bool,
}

/// Form values and error message stashed for the next render of a form.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InputData {
    /// Whether the form should show `message`.
    pub has_error: bool,
    /// Error shown above the form.
    pub message: String,
    /// Submitted email.
    pub email: String,
    /// Submitted confirmation email. Only the signup form has one.
    pub confirm_email: Option<String>,
    /// Submitted password.
    pub password: String,
}

impl InputData {
    /// A form error echoing the submitted values.
    pub fn error(
        message: &str,
        email: &str,
        confirm_email: Option<&str>,
        password: &str,
    ) -> InputData {
        InputData {
            has_error: true,
            message: message.to_string(),
            email: email.to_string(),
            confirm_email: confirm_email.map(|x| x.to_string()),
            password: password.to_string(),
        }
    }
}

/// Server side state of one client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Set by a successful login.
    pub user: Option<SessionUser>,
    /// Set by a successful login.
    pub is_authenticated: bool,
    /// One-shot form repopulation data.
    pub input_data: Option<InputData>,
}

/// Errors of the session store.
#[derive(Debug, Error)]
pub enum SessionStoreError {
    /// The backing database failed.
    #[error("session database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A stored record could not be encoded or decoded.
    #[error("session encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Key-value storage of session records.
///
/// Every save pushes the expiry of the record `ttl` into the future. Expired
/// records are never returned by `load`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// `None` if the id is unknown or expired.
    async fn load(&self, id: &SessionId) -> Result<Option<SessionRecord>, SessionStoreError>;
    /// Create or overwrite the record.
    async fn save(&self, id: &SessionId, record: SessionRecord) -> Result<(), SessionStoreError>;
    /// Forget the record. Unknown ids are fine.
    async fn destroy(&self, id: &SessionId) -> Result<(), SessionStoreError>;
    /// Drop every expired record and return how many went.
    async fn remove_expired(&self) -> Result<u64, SessionStoreError>;
}

/// Run [`SessionStore::remove_expired`] every `period` until the runtime
/// shuts down.
pub fn spawn_session_sweeper(sessions: Arc<dyn SessionStore>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match sessions.remove_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!("removed {} expired sessions", removed),
                Err(err) => tracing::error!("could not remove expired sessions: {}", err),
            }
        }
    })
}

#[derive(Default)]
struct MemorySessions {
    records: HashMap<SessionId, (SessionRecord, Instant)>,
    // Entries go stale when a record is saved again; the map holds the truth.
    expiry_queue: BinaryHeap<Reverse<(Instant, SessionId)>>,
}

/// Session store kept in process memory, lost on restart.
#[derive(Clone)]
pub struct MemorySessionStore {
    sessions: Arc<Mutex<MemorySessions>>,
    ttl: Duration,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        MemorySessionStore::with_ttl(DEFAULT_SESSION_TTL)
    }
}

impl MemorySessionStore {
    /// An empty store with the default lifetime.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty store whose records expire `ttl` after their last save.
    pub fn with_ttl(ttl: Duration) -> Self {
        MemorySessionStore {
            sessions: Arc::new(Mutex::new(MemorySessions::default())),
            ttl,
        }
    }

    /// Number of stored sessions, expired ones included until swept.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.records.len()
    }

    /// Whether no session is stored.
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.records.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &SessionId) -> Result<Option<SessionRecord>, SessionStoreError> {
        let mut sessions = self.sessions.lock().await;
        match sessions.records.get(id) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                sessions.records.remove(id);
                Ok(None)
            }
            Some((record, _)) => Ok(Some(record.clone())),
            None => Ok(None),
        }
    }

    async fn save(&self, id: &SessionId, record: SessionRecord) -> Result<(), SessionStoreError> {
        let expires_at = Instant::now() + self.ttl;
        let mut sessions = self.sessions.lock().await;
        sessions.records.insert(id.clone(), (record, expires_at));
        sessions.expiry_queue.push(Reverse((expires_at, id.clone())));
        Ok(())
    }

    async fn destroy(&self, id: &SessionId) -> Result<(), SessionStoreError> {
        self.sessions.lock().await.records.remove(id);
        Ok(())
    }

    async fn remove_expired(&self) -> Result<u64, SessionStoreError> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        let mut removed = 0;
        while sessions
            .expiry_queue
            .peek()
            .is_some_and(|Reverse((expiry, _))| *expiry <= now)
        {
            let Some(Reverse((_, id))) = sessions.expiry_queue.pop() else {
                break;
            };
            let expired = sessions
                .records
                .get(&id)
                .is_some_and(|(_, expires_at)| *expires_at <= now);
            if expired {
                sessions.records.remove(&id);
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Session store backed by the `sessions` table. Records are kept as JSON.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
    ttl: Duration,
}

impl PgSessionStore {
    /// Wraps an existing connection pool.
    pub fn new(pool: &PgPool, ttl: Duration) -> PgSessionStore {
        PgSessionStore {
            pool: pool.clone(),
            ttl,
        }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn load(&self, id: &SessionId) -> Result<Option<SessionRecord>, SessionStoreError> {
        let row: Option<(String,)> =
            sqlx::query_as(r#"SELECT data FROM sessions WHERE id=$1 AND expires_at > now()"#)
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((data,)) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, id: &SessionId, record: SessionRecord) -> Result<(), SessionStoreError> {
        let data = serde_json::to_string(&record)?;
        sqlx::query(
            r#"INSERT INTO sessions (id, data, expires_at)
               VALUES ( $1, $2, now() + make_interval(secs => $3) )
               ON CONFLICT (id) DO UPDATE SET data=EXCLUDED.data, expires_at=EXCLUDED.expires_at"#,
        )
        .bind(id.as_str())
        .bind(data)
        .bind(self.ttl.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn destroy(&self, id: &SessionId) -> Result<(), SessionStoreError> {
        sqlx::query(r#"DELETE FROM sessions WHERE id=$1"#)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_expired(&self) -> Result<u64, SessionStoreError> {
        let res = sqlx::query(r#"DELETE FROM sessions WHERE expires_at <= now()"#)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }
}

/// The session of the current request.
///
/// Handlers mutate `record` and persist it explicitly with [`Session::save`].
/// A session that was never saved has no id and no cookie.
#[derive(Clone, Debug, Default)]
pub struct Session {
    id: Option<SessionId>,
    /// The record as loaded at the start of the request.
    pub record: SessionRecord,
}

impl Session {
    /// Resolve the cookie value against the store. Unknown or malformed ids
    /// give an empty session.
    pub async fn load(
        store: &dyn SessionStore,
        cookie: Option<&str>,
    ) -> Result<Session, SessionStoreError> {
        let id = match cookie.and_then(SessionId::parse) {
            Some(id) => id,
            None => return Ok(Session::default()),
        };
        match store.load(&id).await? {
            Some(record) => Ok(Session {
                id: Some(id),
                record,
            }),
            None => Ok(Session::default()),
        }
    }

    /// The id, if the session exists in the store.
    pub fn id(&self) -> Option<&SessionId> {
        self.id.as_ref()
    }

    /// Take the one-shot form data, leaving none behind.
    pub fn take_input_data(&mut self) -> Option<InputData> {
        self.record.input_data.take()
    }

    /// Persist the record, allocating an id on first save. Returns `true`
    /// if the id is new and the client needs a cookie.
    pub async fn save(&mut self, store: &dyn SessionStore) -> Result<bool, SessionStoreError> {
        let (id, is_new) = match &self.id {
            Some(id) => (id.clone(), false),
            None => (SessionId::random(), true),
        };
        store.save(&id, self.record.clone()).await?;
        self.id = Some(id);
        Ok(is_new)
    }

    /// Remove the record from the store and reset to an anonymous session.
    pub async fn destroy(&mut self, store: &dyn SessionStore) -> Result<(), SessionStoreError> {
        if let Some(id) = self.id.take() {
            store.destroy(&id).await?;
        }
        self.record = SessionRecord::default();
        Ok(())
    }
}
