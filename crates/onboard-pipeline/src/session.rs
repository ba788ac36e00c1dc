//! Session storage keyed by `(app_name, user_id, session_id)`.
//!
//! A session holds the conversation turns and the context snapshot of the
//! last run. Two stores: in-memory and SQLite.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::sync::RwLock;

use onboard_types::{OnboardError, Result, Turn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    pub history: Vec<Turn>,
    pub state: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            history: Vec::new(),
            state: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, app_name: &str, user_id: &str, session_id: &str) -> Result<Option<Session>>;

    /// Create an empty session. Fails with [`OnboardError::SessionExists`] if
    /// the id is taken.
    async fn create(&self, app_name: &str, user_id: &str, session_id: &str) -> Result<Session>;

    /// Insert or overwrite.
    async fn save(&self, session: &Session) -> Result<()>;

    /// Append `turns` to the stored history under `session`'s key and replace
    /// the stored state with `session.state`. The stored history is read
    /// inside the write, so concurrent appends to one session keep every
    /// turn. A missing session is created.
    async fn append(&self, session: &Session, turns: &[Turn]) -> Result<()>;
}

/// Fetch a session, creating it if absent.
///
/// A concurrent create of the same id is tolerated: the loser logs, re-reads,
/// and if that also fails proceeds with a fresh unsaved session.
pub async fn get_or_create(
    store: &dyn SessionStore,
    app_name: &str,
    user_id: &str,
    session_id: &str,
) -> Result<Session> {
    if let Some(session) = store.get(app_name, user_id, session_id).await? {
        return Ok(session);
    }

    match store.create(app_name, user_id, session_id).await {
        Ok(session) => {
            tracing::info!(session_id, "Created session");
            Ok(session)
        }
        Err(OnboardError::SessionExists { .. }) => {
            tracing::warn!(session_id, "Session was created concurrently; re-reading");
            match store.get(app_name, user_id, session_id).await {
                Ok(Some(session)) => Ok(session),
                Ok(None) | Err(_) => Ok(Session::new(app_name, user_id, session_id)),
            }
        }
        Err(e) => Err(e),
    }
}

// ---------------------------------------------------------------------------
// InMemorySessionStore
// ---------------------------------------------------------------------------

type SessionKey = (String, String, String);

fn key(app_name: &str, user_id: &str, session_id: &str) -> SessionKey {
    (app_name.to_string(), user_id.to_string(), session_id.to_string())
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionKey, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, app_name: &str, user_id: &str, session_id: &str) -> Result<Option<Session>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(&key(app_name, user_id, session_id))
            .cloned())
    }

    async fn create(&self, app_name: &str, user_id: &str, session_id: &str) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        let k = key(app_name, user_id, session_id);
        if sessions.contains_key(&k) {
            return Err(OnboardError::SessionExists {
                session_id: session_id.to_string(),
            });
        }
        let session = Session::new(app_name, user_id, session_id);
        sessions.insert(k, session.clone());
        Ok(session)
    }

    async fn save(&self, session: &Session) -> Result<()> {
        self.sessions.write().await.insert(
            key(&session.app_name, &session.user_id, &session.session_id),
            session.clone(),
        );
        Ok(())
    }

    async fn append(&self, session: &Session, turns: &[Turn]) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions
            .entry(key(&session.app_name, &session.user_id, &session.session_id))
            .or_insert_with(|| Session {
                history: Vec::new(),
                ..session.clone()
            });
        stored.history.extend_from_slice(turns);
        stored.state = session.state.clone();
        stored.updated_at = Utc::now();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SqliteSessionStore
// ---------------------------------------------------------------------------

fn db_err(e: sqlx::Error) -> OnboardError {
    OnboardError::SessionError(e.to_string())
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| OnboardError::SessionError(format!("bad timestamp '{s}': {e}")))
}

pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Open (creating if needed) the database at `url` and ensure the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(db_err)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        // Create tables (idempotent)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                app_name    TEXT NOT NULL,
                user_id     TEXT NOT NULL,
                session_id  TEXT NOT NULL,
                history     TEXT NOT NULL DEFAULT '[]',
                state       TEXT NOT NULL DEFAULT '{}',
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                PRIMARY KEY (app_name, user_id, session_id)
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(db_err)?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get(&self, app_name: &str, user_id: &str, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query_as::<_, (String, String, String, String)>(
            r#"
            SELECT history, state, created_at, updated_at
            FROM sessions
            WHERE app_name = ? AND user_id = ? AND session_id = ?
            "#,
        )
        .bind(app_name)
        .bind(user_id)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some((history, state, created_at, updated_at)) = row else {
            return Ok(None);
        };
        Ok(Some(Session {
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            history: serde_json::from_str(&history)?,
            state: serde_json::from_str(&state)?,
            created_at: parse_time(&created_at)?,
            updated_at: parse_time(&updated_at)?,
        }))
    }

    async fn create(&self, app_name: &str, user_id: &str, session_id: &str) -> Result<Session> {
        let session = Session::new(app_name, user_id, session_id);
        let now = session.created_at.to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO sessions (app_name, user_id, session_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(app_name)
        .bind(user_id)
        .bind(session_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(session),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(OnboardError::SessionExists {
                    session_id: session_id.to_string(),
                })
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let history = serde_json::to_string(&session.history)?;
        let state = serde_json::to_string(&session.state)?;
        sqlx::query(
            r#"
            INSERT INTO sessions (app_name, user_id, session_id, history, state, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (app_name, user_id, session_id) DO UPDATE SET
                history = excluded.history,
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&session.app_name)
        .bind(&session.user_id)
        .bind(&session.session_id)
        .bind(history)
        .bind(state)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn append(&self, session: &Session, turns: &[Turn]) -> Result<()> {
        let state = serde_json::to_string(&session.state)?;
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO sessions (app_name, user_id, session_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (app_name, user_id, session_id) DO NOTHING
            "#,
        )
        .bind(&session.app_name)
        .bind(&session.user_id)
        .bind(&session.session_id)
        .bind(session.created_at.to_rfc3339())
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for turn in turns {
            sqlx::query(
                r#"
                UPDATE sessions SET history = json_insert(history, '$[#]', json(?))
                WHERE app_name = ? AND user_id = ? AND session_id = ?
                "#,
            )
            .bind(serde_json::to_string(turn)?)
            .bind(&session.app_name)
            .bind(&session.user_id)
            .bind(&session.session_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        sqlx::query(
            r#"
            UPDATE sessions SET state = ?, updated_at = ?
            WHERE app_name = ? AND user_id = ? AND session_id = ?
            "#,
        )
        .bind(state)
        .bind(&now)
        .bind(&session.app_name)
        .bind(&session.user_id)
        .bind(&session.session_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)
    }
}
