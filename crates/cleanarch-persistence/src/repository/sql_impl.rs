//! SQLite repository implementation.
//!
//! Storage, filtering, ordering and pagination are delegated to the engine.
//! Each session owns one connection with an open transaction; dropping the
//! session rolls it back. File databases run in WAL mode so a session reads
//! the snapshot its transaction started on while another instance writes.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{ffi, params_from_iter, Connection, Row};
use uuid::Uuid;

use cleanarch_domain::{
    DomainError, DomainResult, Entity, EntityKey, FieldDef, FieldKind, FieldValue, Filter,
    LimitOffset, ID_FIELD, UUID_FIELD,
};

use super::fields::{pinned_filter, update_fields, validate_filter, validate_values};
use super::lock::{SessionGuard, SessionLock};
use super::traits::{Repository, RepositorySession};
use crate::error::{PersistenceError, Result};

// =============================================================================
// SQLITE CONFIGURATION
// =============================================================================

/// SQLite connection configuration.
#[derive(Debug, Clone)]
pub struct SqlConfig {
    /// File path or `file:` URI.
    pub path: String,
    pub busy_timeout: Duration,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            path: "cleanarch.db".to_string(),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl SqlConfig {
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Named in-memory database shared by every connection of the process.
    ///
    /// Shared-cache connections lock whole tables, so concurrent sessions
    /// on separate instances block each other instead of reading snapshots.
    pub fn in_memory(name: &str) -> Self {
        Self::with_path(format!("file:{name}?mode=memory&cache=shared"))
    }
}

// =============================================================================
// SQLITE CLIENT
// =============================================================================

/// Opens connections for repositories and queries.
///
/// Holds one idle connection for its whole lifetime so a named in-memory
/// database outlives individual sessions. Opening switches a file database
/// to WAL journaling, which persists in the file.
#[derive(Debug)]
pub struct SqlClient {
    pub config: SqlConfig,
    _keep_alive: Mutex<Connection>,
}

impl SqlClient {
    /// Create a new SQLite client.
    pub fn open(config: SqlConfig) -> Result<Self> {
        if config.path.trim().is_empty() {
            return Err(PersistenceError::Configuration("sqlite path is empty".into()));
        }
        let keep_alive = Self::connect_with(&config)?;
        let journal: String = keep_alive
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|err| PersistenceError::sqlite(err, config.busy_timeout))?;
        tracing::info!(path = %config.path, %journal, "opened sqlite database");
        Ok(Self {
            config,
            _keep_alive: Mutex::new(keep_alive),
        })
    }

    fn connect_with(config: &SqlConfig) -> Result<Connection> {
        let fail = |err| PersistenceError::sqlite(err, config.busy_timeout);
        let conn = Connection::open(&config.path).map_err(fail)?;
        conn.busy_timeout(config.busy_timeout).map_err(fail)?;
        Ok(conn)
    }

    /// Fresh connection with the configured busy timeout.
    pub fn connect(&self) -> Result<Connection> {
        Self::connect_with(&self.config)
    }

    /// Run a read-only closure on a fresh connection.
    pub fn query<T>(&self, run: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> DomainResult<T> {
        let conn = self.connect()?;
        run(&conn).map_err(|err| self.error(err))
    }

    /// Map a driver error raised on one of this client's connections.
    pub fn error(&self, err: rusqlite::Error) -> DomainError {
        PersistenceError::sqlite(err, self.config.busy_timeout).into()
    }
}

// =============================================================================
// TRANSACTION
// =============================================================================

fn poisoned(label: &str) -> DomainError {
    PersistenceError::Poisoned(format!("{label} connection")).into()
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                || failure.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

/// A connection with an open transaction, rolled back on drop.
#[derive(Debug)]
pub(crate) struct Transaction {
    conn: Mutex<Connection>,
    label: &'static str,
    busy_timeout: Duration,
}

impl Transaction {
    pub(crate) fn begin(client: &SqlClient, label: &'static str) -> DomainResult<Self> {
        let conn = client.connect()?;
        conn.execute_batch("BEGIN").map_err(|err| client.error(err))?;
        tracing::debug!(entity = label, "sqlite transaction opened");
        Ok(Self {
            conn: Mutex::new(conn),
            label,
            busy_timeout: client.config.busy_timeout,
        })
    }

    fn error(&self, err: rusqlite::Error) -> DomainError {
        PersistenceError::sqlite(err, self.busy_timeout).into()
    }

    pub(crate) fn run<T>(&self, run: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> DomainResult<T> {
        let conn = self.conn.lock().map_err(|_| poisoned(self.label))?;
        run(&conn).map_err(|err| self.error(err))
    }

    /// Commit and immediately open the next transaction.
    pub(crate) fn commit(&mut self) -> DomainResult<()> {
        let busy_timeout = self.busy_timeout;
        let fail = |err| DomainError::from(PersistenceError::sqlite(err, busy_timeout));
        let conn = self.conn.get_mut().map_err(|_| poisoned(self.label))?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT").map_err(fail)?;
        }
        conn.execute_batch("BEGIN").map_err(fail)?;
        tracing::debug!(entity = self.label, "sqlite transaction committed");
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let Ok(conn) = self.conn.get_mut() else {
            return;
        };
        if conn.is_autocommit() {
            return;
        }
        match conn.execute_batch("ROLLBACK") {
            Ok(()) => tracing::debug!(entity = self.label, "sqlite transaction rolled back"),
            Err(err) => tracing::warn!(entity = self.label, error = %err, "sqlite rollback failed"),
        }
    }
}

// =============================================================================
// VALUE MAPPING
// =============================================================================

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

const fn column_type(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Bool | FieldKind::Int | FieldKind::Timestamp => "INTEGER",
        FieldKind::Float => "REAL",
        FieldKind::Text | FieldKind::Uuid => "TEXT",
    }
}

fn to_sql(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Bool(v) => Value::Integer(i64::from(*v)),
        FieldValue::Int(v) => Value::Integer(*v),
        FieldValue::Float(v) => Value::Real(*v),
        FieldValue::Text(v) => Value::Text(v.clone()),
        FieldValue::Uuid(v) => Value::Text(v.to_string()),
        FieldValue::Timestamp(v) => Value::Integer(v.timestamp_micros()),
    }
}

fn from_sql<E: Entity>(def: &FieldDef, value: Value) -> DomainResult<FieldValue> {
    let corrupted = |message: String| DomainError::Corrupted {
        entity_type: E::NAME,
        key: format!("{}.{}", E::COLLECTION, def.name),
        message,
    };
    Ok(match (def.kind, value) {
        (_, Value::Null) => FieldValue::Null,
        (FieldKind::Bool, Value::Integer(v)) => FieldValue::Bool(v != 0),
        (FieldKind::Int, Value::Integer(v)) => FieldValue::Int(v),
        (FieldKind::Float, Value::Real(v)) => FieldValue::Float(v),
        #[allow(clippy::cast_precision_loss)]
        (FieldKind::Float, Value::Integer(v)) => FieldValue::Float(v as f64),
        (FieldKind::Text, Value::Text(v)) => FieldValue::Text(v),
        (FieldKind::Uuid, Value::Text(v)) => {
            FieldValue::Uuid(Uuid::parse_str(&v).map_err(|err| corrupted(err.to_string()))?)
        }
        (FieldKind::Timestamp, Value::Integer(v)) => FieldValue::timestamp_from_micros(v)
            .ok_or_else(|| corrupted(format!("timestamp out of range: {v}")))?,
        (kind, other) => {
            return Err(corrupted(format!("{kind} column holds {:?}", other.data_type())));
        }
    })
}

fn parse_row<E: Entity>(raw: Vec<Value>) -> DomainResult<E> {
    let mut entity = E::default();
    for (def, value) in E::schema().iter().zip(raw) {
        entity.set_field(def.name, from_sql::<E>(def, value)?)?;
    }
    Ok(entity)
}

fn limit_param(page: LimitOffset) -> Value {
    if page.is_unbounded() {
        Value::Integer(-1)
    } else {
        Value::Integer(i64::try_from(page.limit).unwrap_or(i64::MAX))
    }
}

/// Statement text and bound values for the entity table.
struct Statements<E> {
    table: String,
    columns: String,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Statements<E> {
    fn new() -> Self {
        let columns = E::schema()
            .iter()
            .map(|def| quote(def.name))
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            table: quote(E::COLLECTION),
            columns,
            _entity: PhantomData,
        }
    }

    fn create_table(&self) -> String {
        let mut definitions = vec![
            format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote(ID_FIELD)),
            format!("{} TEXT NOT NULL UNIQUE", quote(UUID_FIELD)),
        ];
        definitions.extend(E::schema().iter().filter(|def| !def.is_identity()).map(|def| {
            let null = if def.nullable { "" } else { " NOT NULL" };
            format!("{} {}{null}", quote(def.name), column_type(def.kind))
        }));
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table,
            definitions.join(", ")
        )
    }

    /// ` WHERE ...` for the filter's predicates, or an empty string.
    fn where_clause(filter: Option<&Filter>, binds: &mut Vec<Value>) -> String {
        let Some(filter) = filter.filter(|filter| !filter.is_empty()) else {
            return String::new();
        };
        let terms = filter
            .predicates()
            .iter()
            .map(|(field, value)| {
                if value.is_null() {
                    format!("{} IS NULL", quote(field))
                } else {
                    binds.push(to_sql(value));
                    format!("{} = ?", quote(field))
                }
            })
            .collect::<Vec<_>>();
        format!(" WHERE {}", terms.join(" AND "))
    }

    fn order_clause(filter: Option<&Filter>) -> String {
        let mut terms: Vec<String> = filter
            .map(Filter::order_keys)
            .unwrap_or_default()
            .iter()
            .map(|key| {
                let direction = if key.descending { "DESC" } else { "ASC" };
                format!("{} {direction}", quote(&key.field))
            })
            .collect();
        terms.push(format!("{} ASC", quote(ID_FIELD)));
        format!(" ORDER BY {}", terms.join(", "))
    }

    fn select(&self, filter: Option<&Filter>, page: LimitOffset) -> (String, Vec<Value>) {
        let mut binds = Vec::new();
        let where_clause = Self::where_clause(filter, &mut binds);
        let sql = format!(
            "SELECT {} FROM {}{where_clause}{} LIMIT ? OFFSET ?",
            self.columns,
            self.table,
            Self::order_clause(filter),
        );
        binds.push(limit_param(page));
        binds.push(Value::Integer(i64::try_from(page.offset).unwrap_or(i64::MAX)));
        (sql, binds)
    }

    fn count(&self, filter: Option<&Filter>) -> (String, Vec<Value>) {
        let mut binds = Vec::new();
        let where_clause = Self::where_clause(filter, &mut binds);
        (format!("SELECT COUNT(*) FROM {}{where_clause}", self.table), binds)
    }

    fn insert(&self, entity: &E) -> (String, Vec<Value>) {
        let values: Vec<(&'static str, FieldValue)> = entity
            .values()
            .into_iter()
            .filter(|(name, _)| *name != ID_FIELD)
            .collect();
        let columns = values
            .iter()
            .map(|(name, _)| quote(name))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; values.len()].join(", ");
        let binds = values.iter().map(|(_, value)| to_sql(value)).collect();
        (
            format!("INSERT INTO {} ({columns}) VALUES ({placeholders})", self.table),
            binds,
        )
    }

    fn update(&self, values: &[(&str, FieldValue)], filter: &Filter) -> (String, Vec<Value>) {
        let assignments = values
            .iter()
            .map(|(name, _)| format!("{} = ?", quote(name)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut binds: Vec<Value> = values.iter().map(|(_, value)| to_sql(value)).collect();
        let where_clause = Self::where_clause(Some(filter), &mut binds);
        (
            format!("UPDATE {} SET {assignments}{where_clause}", self.table),
            binds,
        )
    }

    fn delete(&self, filter: &Filter) -> (String, Vec<Value>) {
        let mut binds = Vec::new();
        let where_clause = Self::where_clause(Some(filter), &mut binds);
        (format!("DELETE FROM {}{where_clause}", self.table), binds)
    }
}

/// Raw column values of every row, in schema order.
fn fetch_rows<E: Entity>(
    conn: &Connection,
    sql: &str,
    binds: Vec<Value>,
) -> rusqlite::Result<Vec<Vec<Value>>> {
    let width = E::schema().len();
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(binds), |row: &Row<'_>| {
        (0..width)
            .map(|index| row.get::<_, Value>(index))
            .collect::<rusqlite::Result<Vec<_>>>()
    })?;
    rows.collect()
}

fn execute(conn: &Connection, sql: &str, binds: Vec<Value>) -> rusqlite::Result<u64> {
    Ok(conn.execute(sql, params_from_iter(binds))? as u64)
}

// =============================================================================
// SQLITE REPOSITORY
// =============================================================================

/// Repository over one SQLite table named after `E::COLLECTION`.
pub struct SqlRepository<E> {
    client: Arc<SqlClient>,
    lock: SessionLock,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> SqlRepository<E> {
    pub fn new(client: Arc<SqlClient>) -> Self {
        Self {
            client,
            lock: SessionLock::new(E::NAME),
            _entity: PhantomData,
        }
    }

    pub fn client(&self) -> &Arc<SqlClient> {
        &self.client
    }

    /// Create the entity table if it does not exist.
    pub fn ensure_table(&self) -> DomainResult<()> {
        let sql = Statements::<E>::new().create_table();
        self.client.query(|conn| conn.execute_batch(&sql))?;
        tracing::debug!(entity = E::NAME, table = E::COLLECTION, "table ensured");
        Ok(())
    }

    fn open(&self, guard: SessionGuard) -> DomainResult<SqlSession<E>> {
        Ok(SqlSession {
            tx: Transaction::begin(&self.client, E::NAME)?,
            statements: Statements::new(),
            _guard: guard,
        })
    }
}

impl<E> std::fmt::Debug for SqlRepository<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlRepository")
            .field("config", &self.client.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for SqlRepository<E> {
    type Session = SqlSession<E>;

    async fn begin(&self) -> DomainResult<SqlSession<E>> {
        let guard = self.lock.try_acquire()?;
        self.open(guard)
    }

    async fn begin_timeout(&self, timeout: Duration) -> DomainResult<SqlSession<E>> {
        let guard = self.lock.acquire_timeout(timeout).await?;
        self.open(guard)
    }
}

// =============================================================================
// SQLITE SESSION
// =============================================================================

/// Unit of work over a [`SqlRepository`]: one native transaction.
pub struct SqlSession<E> {
    tx: Transaction,
    statements: Statements<E>,
    _guard: SessionGuard,
}

impl<E: Entity> SqlSession<E> {
    fn select(&self, filter: Option<&Filter>, page: LimitOffset) -> DomainResult<Vec<E>> {
        let (sql, binds) = self.statements.select(filter, page);
        self.tx
            .run(|conn| fetch_rows::<E>(conn, &sql, binds))?
            .into_iter()
            .map(parse_row)
            .collect()
    }

    fn first(&self, filter: &Filter) -> DomainResult<Option<E>> {
        Ok(self
            .select(Some(filter), LimitOffset::new(1, 0))?
            .into_iter()
            .next())
    }
}

#[async_trait]
impl<E: Entity> RepositorySession<E> for SqlSession<E> {
    async fn get(&self, key: EntityKey) -> DomainResult<Option<E>> {
        let filter = match key {
            EntityKey::Id(id) => Filter::by_id(id),
            EntityKey::Uuid(uuid) => Filter::by_uuid(uuid),
            EntityKey::Key(key) => {
                let filter = E::filter_for_key(&key)?;
                filter.validate::<E>()?;
                filter
            }
        };
        self.first(&filter)
    }

    async fn list(&self, page: LimitOffset, filter: Option<&Filter>) -> DomainResult<Vec<E>> {
        validate_filter::<E>(filter)?;
        if page.limit == 0 {
            return Ok(Vec::new());
        }
        self.select(filter, page)
    }

    async fn count(&self, filter: Option<&Filter>) -> DomainResult<u64> {
        validate_filter::<E>(filter)?;
        let (sql, binds) = self.statements.count(filter);
        let count: i64 = self
            .tx
            .run(|conn| conn.query_row(&sql, params_from_iter(binds), |row| row.get(0)))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn add(&mut self, entity: E) -> DomainResult<E> {
        let uuid = entity.uuid();
        let (sql, binds) = self.statements.insert(&entity);
        let id = self
            .tx
            .run(|conn| match conn.execute(&sql, params_from_iter(binds)) {
                Ok(_) => Ok(Some(conn.last_insert_rowid())),
                Err(err) if is_unique_violation(&err) => Ok(None),
                Err(err) => Err(err),
            })?
            .ok_or_else(|| DomainError::already_exists(E::NAME, uuid))?;
        tracing::debug!(entity = E::NAME, key = %uuid, id, "inserted");
        self.first(&Filter::by_id(id))?
            .ok_or_else(|| DomainError::not_found(E::NAME, id))
    }

    async fn update(
        &mut self,
        entity: &E,
        filter: Option<&Filter>,
        fields: Option<&[&str]>,
    ) -> DomainResult<u64> {
        let fields = update_fields::<E>(fields)?;
        validate_filter::<E>(filter)?;
        let Some(pinned) = pinned_filter(entity, filter) else {
            return Ok(0);
        };
        let values: Vec<(&str, FieldValue)> = fields
            .iter()
            .map(|name| (*name, entity.field(name).unwrap_or(FieldValue::Null)))
            .collect();
        if values.is_empty() {
            return self.count(Some(&pinned)).await;
        }
        let (sql, binds) = self.statements.update(&values, &pinned);
        self.tx.run(|conn| execute(conn, &sql, binds))
    }

    async fn update_by_filter(
        &mut self,
        filter: &Filter,
        values: &[(&str, FieldValue)],
    ) -> DomainResult<u64> {
        filter.validate::<E>()?;
        validate_values::<E>(values)?;
        if values.is_empty() {
            return self.count(Some(filter)).await;
        }
        let (sql, binds) = self.statements.update(values, filter);
        let count = self.tx.run(|conn| execute(conn, &sql, binds))?;
        tracing::debug!(entity = E::NAME, count, "bulk update");
        Ok(count)
    }

    async fn remove(&mut self, filter: &Filter) -> DomainResult<u64> {
        filter.validate::<E>()?;
        let (sql, binds) = self.statements.delete(filter);
        let count = self.tx.run(|conn| execute(conn, &sql, binds))?;
        tracing::debug!(entity = E::NAME, count, "removed");
        Ok(count)
    }

    async fn commit(&mut self) -> DomainResult<()> {
        self.tx.commit()
    }
}
