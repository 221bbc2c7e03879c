use std::sync::Arc;

use axum::http::StatusCode;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::application::errors::{DispatchError, DispatchResult, StorageError};
use crate::infrastructure::database::Database;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);
";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created_at: String,
}

impl UserRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

/// Lookup by id or email; field names are lowercase so query strings bind
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FindUser {
    pub userid: Option<i64>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Deleted {
    pub deleted: i64,
}

/// Service for managing users.
///
/// rusqlite is synchronous, so every public call runs its statements on the
/// blocking pool and never on a runtime worker.
pub struct UserService {
    db: Arc<Database>,
}

impl UserService {
    /// Migrates the schema; call from a blocking context
    pub fn new(db: Arc<Database>) -> Result<Self, StorageError> {
        db.migrate(SCHEMA)?;
        Ok(Self { db })
    }

    pub async fn find(&self, query: FindUser) -> DispatchResult<UserRecord> {
        self.blocking(move |db| find(db, &query)).await
    }

    pub async fn find_by_id(&self, id: i64) -> DispatchResult<Option<UserRecord>> {
        self.blocking(move |db| Ok(find_by_id(db, id)?)).await
    }

    pub async fn find_by_email(&self, email: String) -> DispatchResult<Option<UserRecord>> {
        self.blocking(move |db| Ok(find_by_email(db, &email)?)).await
    }

    /// Create a user; the email must not be registered yet
    pub async fn create(&self, user: NewUser) -> DispatchResult<UserRecord> {
        self.blocking(move |db| create(db, &user)).await
    }

    pub async fn delete(&self, query: FindUser) -> DispatchResult<Deleted> {
        self.blocking(move |db| delete(db, &query)).await
    }

    async fn blocking<T, F>(&self, f: F) -> DispatchResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> DispatchResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(DispatchError::internal)?
    }
}

fn find(db: &Database, query: &FindUser) -> DispatchResult<UserRecord> {
    let found = match (query.userid, query.email.as_deref()) {
        (Some(id), _) => find_by_id(db, id)?,
        (None, Some(email)) => find_by_email(db, email)?,
        (None, None) => {
            return Err(DispatchError::classified(
                StatusCode::BAD_REQUEST,
                "userid or email is required",
            ))
        }
    };
    found.ok_or_else(|| DispatchError::classified(StatusCode::NOT_FOUND, "user not found"))
}

fn find_by_id(db: &Database, id: i64) -> Result<Option<UserRecord>, StorageError> {
    db.get(
        "find_user_by_id",
        "SELECT id, name, email, created_at FROM users WHERE id = ?1",
        params![id],
        UserRecord::from_row,
    )
}

fn find_by_email(db: &Database, email: &str) -> Result<Option<UserRecord>, StorageError> {
    db.get(
        "find_user_by_email",
        "SELECT id, name, email, created_at FROM users WHERE email = ?1",
        params![email.to_lowercase()],
        UserRecord::from_row,
    )
}

fn create(db: &Database, user: &NewUser) -> DispatchResult<UserRecord> {
    let name = user.name.trim();
    let email = user.email.trim().to_lowercase();
    if name.is_empty() || !email.contains('@') {
        return Err(DispatchError::classified(
            StatusCode::BAD_REQUEST,
            "name and a valid email are required",
        ));
    }

    db.execute_tx("create_user", |tx| {
        let taken = tx
            .query_row("SELECT 1 FROM users WHERE email = ?1", params![email], |_| Ok(()))
            .optional()
            .map_err(StorageError::from)?
            .is_some();
        if taken {
            return Err(DispatchError::classified(
                StatusCode::CONFLICT,
                "email already registered",
            ));
        }

        let created_at = chrono::Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO users (name, email, created_at) VALUES (?1, ?2, ?3)",
            params![name, email, created_at],
        )
        .map_err(StorageError::from)?;

        Ok(UserRecord {
            id: tx.last_insert_rowid(),
            name: name.to_string(),
            email: email.clone(),
            created_at,
        })
    })
}

fn delete(db: &Database, query: &FindUser) -> DispatchResult<Deleted> {
    let Some(id) = query.userid else {
        return Err(DispatchError::classified(StatusCode::BAD_REQUEST, "userid is required"));
    };

    let removed = db.delete("delete_user", "DELETE FROM users WHERE id = ?1", params![id])?;
    if removed == 0 {
        return Err(DispatchError::classified(StatusCode::NOT_FOUND, "user not found"));
    }
    Ok(Deleted { deleted: id })
}
