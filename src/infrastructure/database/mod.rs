//! SQLite persistence collaborator
//!
//! Thin wrappers over one `rusqlite` connection that log every statement with
//! the caller's command name. Transactions go through [`Database::execute_tx`].

use std::fmt::Display;
use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, Params, Row, Transaction};

use crate::application::errors::StorageError;
use crate::infrastructure::config::DatabaseConfig;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(config: &DatabaseConfig) -> Result<Self, StorageError> {
        if let Err(e) = config.validate() {
            tracing::error!(error = %e, "db: invalid database configuration");
            return Err(e.into());
        }

        let conn = Self::connect(&config.path).map_err(|e| {
            tracing::error!(path = %config.path.display(), error = %e, "db: failed to open database");
            e
        })?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;

        tracing::info!(path = %config.path.display(), "db: database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn connect(path: &Path) -> Result<Connection, StorageError> {
        Ok(Connection::open(path)?)
    }

    /// Run schema statements
    pub fn migrate(&self, sql: &str) -> Result<(), StorageError> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    /// Point lookup; `Ok(None)` when no row matches
    pub fn get<T, P, F>(&self, name: &str, sql: &str, params: P, map: F) -> Result<Option<T>, StorageError>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        tracing::info!(command = name, query = sql, "db: execute sql");

        let conn = self.conn.lock();
        match conn.query_row(sql, params, map) {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                tracing::debug!(command = name, query = sql, "db: empty response");
                Ok(None)
            }
            Err(e) => {
                tracing::error!(command = name, query = sql, error = %e, "db: failed sql");
                Err(e.into())
            }
        }
    }

    pub fn fetch_all<T, P, F>(&self, name: &str, sql: &str, params: P, map: F) -> Result<Vec<T>, StorageError>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        tracing::info!(command = name, query = sql, "db: execute sql");

        let conn = self.conn.lock();
        let run = || -> rusqlite::Result<Vec<T>> {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params, map)?;
            rows.collect()
        };
        run().map_err(|e| {
            tracing::error!(command = name, query = sql, error = %e, "db: failed sql");
            e.into()
        })
    }

    /// Insert a row, returning its rowid
    pub fn create<P: Params>(&self, name: &str, sql: &str, params: P) -> Result<i64, StorageError> {
        let conn = self.conn.lock();
        Self::exec(&conn, name, sql, params)?;
        Ok(conn.last_insert_rowid())
    }

    /// Returns the number of rows changed
    pub fn update<P: Params>(&self, name: &str, sql: &str, params: P) -> Result<usize, StorageError> {
        Self::exec(&self.conn.lock(), name, sql, params)
    }

    /// Returns the number of rows removed
    pub fn delete<P: Params>(&self, name: &str, sql: &str, params: P) -> Result<usize, StorageError> {
        Self::exec(&self.conn.lock(), name, sql, params)
    }

    fn exec<P: Params>(conn: &Connection, name: &str, sql: &str, params: P) -> Result<usize, StorageError> {
        tracing::info!(command = name, query = sql, "db: execute sql");
        conn.execute(sql, params).map_err(|e| {
            tracing::error!(command = name, query = sql, error = %e, "db: failed sql");
            e.into()
        })
    }

    /// Run `f` inside one transaction.
    ///
    /// An error from `f` rolls the transaction back and is returned as is; a
    /// failed rollback is logged and never replaces it. A failed commit is
    /// returned, and rusqlite rolls the transaction back when it is dropped.
    pub fn execute_tx<T, E, F>(&self, name: &str, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
        E: From<StorageError> + Display,
    {
        tracing::info!(command = name, "db: execute sql in transaction");

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(|e| {
            tracing::error!(command = name, error = %e, "db: failed to begin transaction");
            E::from(StorageError::from(e))
        })?;

        match f(&tx) {
            Ok(value) => {
                tx.commit().map_err(|e| {
                    tracing::error!(command = name, error = %e, "db: failed to commit transaction");
                    E::from(StorageError::from(e))
                })?;
                tracing::info!(command = name, "db: transaction executed successfully");
                Ok(value)
            }
            Err(err) => {
                tracing::error!(command = name, error = %err, "db: transaction function failed");
                if let Err(rollback) = tx.rollback() {
                    tracing::error!(
                        command = name,
                        error = %err,
                        rollback_error = %rollback,
                        "db: failed to rollback transaction"
                    );
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::errors::DispatchError;
    use axum::http::StatusCode;
    use rusqlite::params;

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE)")
            .unwrap();
        db
    }

    fn count(db: &Database) -> i64 {
        db.get("count", "SELECT COUNT(*) FROM items", [], |row| row.get(0))
            .unwrap()
            .unwrap_or_default()
    }

    #[test]
    fn test_crud() {
        let db = db();
        let id = db
            .create("add", "INSERT INTO items (name) VALUES (?1)", params!["bolt"])
            .unwrap();
        assert!(id > 0);

        let name: Option<String> = db
            .get("find", "SELECT name FROM items WHERE id = ?1", params![id], |row| row.get(0))
            .unwrap();
        assert_eq!(name.as_deref(), Some("bolt"));

        assert_eq!(
            db.update("rename", "UPDATE items SET name = ?1 WHERE id = ?2", params!["nut", id])
                .unwrap(),
            1
        );
        let names: Vec<String> = db
            .fetch_all("list", "SELECT name FROM items ORDER BY id", [], |row| row.get(0))
            .unwrap();
        assert_eq!(names, vec!["nut".to_string()]);

        assert_eq!(db.delete("remove", "DELETE FROM items WHERE id = ?1", params![id]).unwrap(), 1);
        assert_eq!(db.delete("remove", "DELETE FROM items WHERE id = ?1", params![id]).unwrap(), 0);
    }

    #[test]
    fn test_get_missing_row_is_none() {
        let db = db();
        let name: Option<String> = db
            .get("find", "SELECT name FROM items WHERE id = ?1", params![99], |row| row.get(0))
            .unwrap();
        assert!(name.is_none());
    }

    #[test]
    fn test_bad_sql_is_error() {
        let db = db();
        assert!(matches!(
            db.update("broken", "UPDATE nowhere SET x = 1", []),
            Err(StorageError::Sqlite(_))
        ));
    }

    #[test]
    fn test_tx_commits() {
        let db = db();
        let ids = db
            .execute_tx("bulk", |tx| -> Result<Vec<i64>, StorageError> {
                let mut ids = Vec::new();
                for name in ["a", "b"] {
                    tx.execute("INSERT INTO items (name) VALUES (?1)", params![name])?;
                    ids.push(tx.last_insert_rowid());
                }
                Ok(ids)
            })
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(count(&db), 2);
    }

    #[test]
    fn test_tx_rolls_back_and_returns_original_error() {
        let db = db();
        let err = db
            .execute_tx("bulk", |tx| -> Result<(), DispatchError> {
                tx.execute("INSERT INTO items (name) VALUES (?1)", params!["a"])
                    .map_err(StorageError::from)?;
                Err(DispatchError::classified(StatusCode::CONFLICT, "duplicate batch"))
            })
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Classified { status, .. } if status == StatusCode::CONFLICT
        ));
        assert_eq!(count(&db), 0);
    }

    #[test]
    fn test_tx_statement_failure_rolls_back() {
        let db = db();
        let result = db.execute_tx("bulk", |tx| -> Result<(), StorageError> {
            tx.execute("INSERT INTO items (name) VALUES (?1)", params!["a"])?;
            tx.execute("INSERT INTO items (name) VALUES (?1)", params!["a"])?;
            Ok(())
        });
        assert!(matches!(result, Err(StorageError::Sqlite(_))));
        assert_eq!(count(&db), 0);
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let config = DatabaseConfig {
            path: std::path::PathBuf::from("unused.db"),
            busy_timeout_ms: 0,
        };
        assert!(matches!(Database::open(&config), Err(StorageError::Config(_))));
    }
}
