//! SQLite StateStore
//! rusqlite-backed implementation of the storage port. A file-backed
//! connection reports `DatabaseKind::Sqlite`; `:memory:` reports
//! `DatabaseKind::Memory`. Statements of a batch run inside one transaction.

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::ports::{DatabaseKind, SqlRow, SqlValue, StateStore, Statement};
use crate::domain::{Result, SupervisorError};

/// rusqlite-backed state store
pub struct SqliteStore {
    connection: Mutex<Connection>,
    kind: DatabaseKind,
}

impl SqliteStore {
    /// Open (creating if needed) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let connection = Connection::open(path).map_err(storage_err)?;
        debug!(path = %path.display(), "Opened sqlite state store");
        Ok(Self {
            connection: Mutex::new(connection),
            kind: DatabaseKind::Sqlite,
        })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let connection = Connection::open_in_memory().map_err(storage_err)?;
        Ok(Self {
            connection: Mutex::new(connection),
            kind: DatabaseKind::Memory,
        })
    }
}

fn storage_err(e: rusqlite::Error) -> SupervisorError {
    SupervisorError::Storage(e.to_string())
}

impl rusqlite::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, Value};
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            SqlValue::Text(v) => ToSqlOutput::Borrowed(rusqlite::types::ValueRef::Text(
                v.as_bytes(),
            )),
        })
    }
}

fn row_from_sqlite(row: &rusqlite::Row<'_>, columns: usize) -> rusqlite::Result<SqlRow> {
    let mut values = Vec::with_capacity(columns);
    for index in 0..columns {
        values.push(match row.get_ref(index)? {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(v) => SqlValue::Integer(v),
            ValueRef::Real(v) => SqlValue::Real(v),
            ValueRef::Text(v) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
        });
    }
    Ok(SqlRow::new(values))
}

#[async_trait]
impl StateStore for SqliteStore {
    fn kind(&self) -> DatabaseKind {
        self.kind
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let connection = self.connection.lock().await;
        let affected = connection
            .execute(sql, params_from_iter(params.iter()))
            .map_err(storage_err)?;
        Ok(affected as u64)
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        let connection = self.connection.lock().await;
        let mut statement = connection.prepare(sql).map_err(storage_err)?;
        let columns = statement.column_count();

        let rows = statement
            .query_map(params_from_iter(params.iter()), |row| {
                row_from_sqlite(row, columns)
            })
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<SqlRow>>>()
            .map_err(storage_err)?;

        Ok(rows)
    }

    async fn query_single(&self, sql: &str, params: &[SqlValue]) -> Result<Option<SqlRow>> {
        let mut rows = self.query(sql, params).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    async fn execute_batch(&self, statements: &[Statement]) -> Result<()> {
        let mut connection = self.connection.lock().await;
        let tx = connection.transaction().map_err(storage_err)?;

        for statement in statements {
            tx.execute(&statement.sql, params_from_iter(statement.params.iter()))
                .map_err(storage_err)?;
        }

        tx.commit().map_err(storage_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_table() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .execute(
                "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT, score REAL)",
                &[],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_execute_and_query() {
        let store = store_with_table().await;
        let affected = store
            .execute(
                "INSERT INTO items (name, score) VALUES (?1, ?2)",
                &[SqlValue::from("alpha"), SqlValue::from(1.5)],
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let rows = store
            .query("SELECT id, name, score FROM items", &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_text(1).unwrap(), "alpha");
        assert_eq!(rows[0].get_f64(2).unwrap(), 1.5);
    }

    #[tokio::test]
    async fn test_query_single() {
        let store = store_with_table().await;
        assert!(store
            .query_single("SELECT id FROM items", &[])
            .await
            .unwrap()
            .is_none());

        store
            .execute(
                "INSERT INTO items (name) VALUES (?1)",
                &[SqlValue::from("only")],
            )
            .await
            .unwrap();

        let row = store
            .query_single("SELECT name FROM items", &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get_text(0).unwrap(), "only");
    }

    #[tokio::test]
    async fn test_batch_rolls_back_on_failure() {
        let store = store_with_table().await;

        let result = store
            .execute_batch(&[
                Statement::new(
                    "INSERT INTO items (name) VALUES (?1)",
                    vec![SqlValue::from("kept?")],
                ),
                Statement::new("INSERT INTO nonexistent (x) VALUES (1)", vec![]),
            ])
            .await;
        assert!(result.is_err());

        let rows = store.query("SELECT id FROM items", &[]).await.unwrap();
        assert!(rows.is_empty(), "failed batch must not leave partial writes");
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            assert_eq!(store.kind(), DatabaseKind::Sqlite);
            store
                .execute("CREATE TABLE t (v TEXT)", &[])
                .await
                .unwrap();
            store
                .execute("INSERT INTO t (v) VALUES (?1)", &[SqlValue::from("x")])
                .await
                .unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        let rows = reopened.query("SELECT v FROM t", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}
