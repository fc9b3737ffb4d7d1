//! Read queries outside the repository contract.
//!
//! [`SqlQuery`] runs one closure per call on a fresh connection.
//! [`SqlContextQuery`] hands out [`QueryScope`]s that keep one transaction
//! open until committed or dropped, one scope at a time.

use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;

use cleanarch_domain::DomainResult;

use super::lock::{SessionGuard, SessionLock};
use super::sql_impl::{SqlClient, Transaction};

const QUERY_LABEL: &str = "SqlQuery";

/// Stateless read query.
#[derive(Debug, Clone)]
pub struct SqlQuery {
    client: Arc<SqlClient>,
}

impl SqlQuery {
    pub fn new(client: Arc<SqlClient>) -> Self {
        Self { client }
    }

    pub fn run<T>(&self, query: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> DomainResult<T> {
        self.client.query(query)
    }
}

/// Query with a scoped transaction.
#[derive(Debug, Clone)]
pub struct SqlContextQuery {
    client: Arc<SqlClient>,
    lock: SessionLock,
}

impl SqlContextQuery {
    pub fn new(client: Arc<SqlClient>) -> Self {
        Self {
            client,
            lock: SessionLock::new(QUERY_LABEL),
        }
    }

    /// Open a scope; fails fast while another scope is open.
    pub fn begin(&self) -> DomainResult<QueryScope> {
        let guard = self.lock.try_acquire()?;
        self.open(guard)
    }

    /// Open a scope, waiting up to `timeout` for the current one to end.
    pub async fn begin_timeout(&self, timeout: Duration) -> DomainResult<QueryScope> {
        let guard = self.lock.acquire_timeout(timeout).await?;
        self.open(guard)
    }

    fn open(&self, guard: SessionGuard) -> DomainResult<QueryScope> {
        Ok(QueryScope {
            tx: Transaction::begin(&self.client, QUERY_LABEL)?,
            _guard: guard,
        })
    }
}

/// One open transaction of a [`SqlContextQuery`].
#[derive(Debug)]
pub struct QueryScope {
    tx: Transaction,
    _guard: SessionGuard,
}

impl QueryScope {
    pub fn run<T>(&self, query: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> DomainResult<T> {
        self.tx.run(query)
    }

    pub fn commit(&mut self) -> DomainResult<()> {
        self.tx.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::sql_impl::SqlConfig;
    use cleanarch_domain::DomainError;

    fn client(dir: &tempfile::TempDir) -> Arc<SqlClient> {
        let path = dir.path().join("notes.db");
        let client = SqlClient::open(SqlConfig::with_path(path.to_string_lossy())).unwrap();
        client
            .connect()
            .unwrap()
            .execute_batch("CREATE TABLE notes (body TEXT NOT NULL)")
            .unwrap();
        Arc::new(client)
    }

    fn count(query: &SqlQuery) -> i64 {
        query
            .run(|conn| conn.query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0)))
            .unwrap()
    }

    #[test]
    fn test_scope_commit_is_visible_to_queries() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(&dir);
        let query = SqlQuery::new(Arc::clone(&client));
        let context = SqlContextQuery::new(client);

        let mut scope = context.begin().unwrap();
        scope
            .run(|conn| conn.execute("INSERT INTO notes (body) VALUES ('kept')", []))
            .unwrap();
        tokio_test::assert_ok!(scope.commit());
        drop(scope);
        assert_eq!(count(&query), 1);

        let scope = context.begin().unwrap();
        scope
            .run(|conn| conn.execute("INSERT INTO notes (body) VALUES ('lost')", []))
            .unwrap();
        drop(scope);
        assert_eq!(count(&query), 1);
    }

    #[test]
    fn test_second_scope_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let context = SqlContextQuery::new(client(&dir));
        let _scope = context.begin().unwrap();
        assert!(matches!(
            context.begin(),
            Err(DomainError::ConcurrencyViolation { .. })
        ));
    }

    #[test]
    fn test_begin_timeout_reports_busy() {
        let dir = tempfile::tempdir().unwrap();
        let context = SqlContextQuery::new(client(&dir));
        let _scope = context.begin().unwrap();
        let waited = tokio_test::block_on(context.begin_timeout(Duration::from_millis(30)));
        assert!(matches!(waited, Err(DomainError::ResourceBusy { .. })));
    }

    #[test]
    fn test_query_errors_are_backend_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let query = SqlQuery::new(client(&dir));
        let err = query
            .run(|conn| conn.execute("INSERT INTO missing VALUES (1)", []))
            .unwrap_err();
        assert!(matches!(err, DomainError::BackendUnavailable { backend: "sqlite", .. }));
    }
}
