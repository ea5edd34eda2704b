//! SQLite persistence backend
//!
//! Implements the Unit-of-Work backend contract over one `rusqlite`
//! connection. Schema is the caller's: tables must already exist, with
//! generated identifiers declared `INTEGER PRIMARY KEY`.

#![allow(clippy::result_large_err)]

use std::path::Path;
use std::sync::Arc;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use tracing::debug;
use unitas_core::backend::{LinkSide, PersistenceBackend, RowSource, VersionGuard};
use unitas_core::metadata::{EntityMetadata, FieldKind, JoinTableMetadata, MetadataRegistry};
use unitas_core::model::{KeyPart, PrimaryKey, Row, Value};
use unitas_core::UnitasError;

use crate::db;
use crate::errors::{sqlite, Result};
use crate::repo::hydration::{self, column_kinds, decode_key, decode_row, key_to_sql, to_sql};
use crate::repo::statements;

/// Backend over one SQLite connection
pub struct SqliteBackend {
    conn: Connection,
    registry: Arc<MetadataRegistry>,
}

impl SqliteBackend {
    /// Wrap an already configured connection
    ///
    /// The registry resolves key kinds of foreign-key and link columns, so
    /// it must be the one the Unit of Work is built with.
    pub fn new(conn: Connection, registry: Arc<MetadataRegistry>) -> Self {
        Self { conn, registry }
    }

    /// # Errors
    ///
    /// Returns `Backend` if the database cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, registry: Arc<MetadataRegistry>) -> Result<Self> {
        Ok(Self::new(db::open(path)?, registry))
    }

    /// # Errors
    ///
    /// Returns `Backend` if SQLite cannot allocate the database.
    pub fn open_in_memory(registry: Arc<MetadataRegistry>) -> Result<Self> {
        Ok(Self::new(db::open_in_memory()?, registry))
    }

    /// Direct access, for schema setup and inspection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn query_rows(
        &self,
        op: &'static str,
        meta: &EntityMetadata,
        sql: &str,
        params: Vec<SqlValue>,
    ) -> Result<Vec<Row>> {
        let columns = column_kinds(&self.registry, meta)?;
        let width = columns.len();
        let mut stmt = self.conn.prepare(sql).map_err(sqlite(op))?;
        let raw: Vec<Vec<SqlValue>> = stmt
            .query_map(params_from_iter(params), |row| {
                (0..width)
                    .map(|i| row.get::<_, SqlValue>(i))
                    .collect::<rusqlite::Result<Vec<SqlValue>>>()
            })
            .map_err(sqlite(op))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(sqlite(op))?;
        debug!(op, table = %meta.table, rows = raw.len(), "sqlite read");
        raw.into_iter()
            .map(|values| decode_row(&meta.table, &columns, values))
            .collect()
    }

    fn execute(&self, op: &'static str, table: &str, sql: &str, params: Vec<SqlValue>) -> Result<u64> {
        let affected = self
            .conn
            .execute(sql, params_from_iter(params))
            .map_err(sqlite(op))?;
        debug!(op, table, affected, "sqlite write");
        Ok(affected as u64)
    }

    fn require_transaction(&self, op: &'static str) -> Result<()> {
        if self.in_transaction() {
            Ok(())
        } else {
            Err(UnitasError::backend(op, "no active transaction"))
        }
    }
}

fn selected_columns(columns: &[(String, FieldKind)]) -> Vec<&str> {
    columns.iter().map(|(c, _)| c.as_str()).collect()
}

fn key_params(key: &PrimaryKey) -> Vec<SqlValue> {
    key.parts().iter().map(key_to_sql).collect()
}

impl RowSource for SqliteBackend {
    fn fetch_by_key(&self, meta: &EntityMetadata, key: &PrimaryKey) -> Result<Option<Row>> {
        meta.check_key(key)?;
        let columns = column_kinds(&self.registry, meta)?;
        let sql = statements::select_by_key(
            &meta.table,
            &selected_columns(&columns),
            &meta.id_columns(),
        );
        let mut rows = self.query_rows("fetch_by_key", meta, &sql, key_params(key))?;
        Ok(rows.pop())
    }

    fn fetch_all(&self, meta: &EntityMetadata) -> Result<Vec<Row>> {
        let columns = column_kinds(&self.registry, meta)?;
        let sql = statements::select_all(
            &meta.table,
            &selected_columns(&columns),
            &meta.id_columns(),
        );
        self.query_rows("fetch_all", meta, &sql, Vec::new())
    }

    fn fetch_where(&self, meta: &EntityMetadata, column: &str, value: &Value) -> Result<Vec<Row>> {
        let columns = column_kinds(&self.registry, meta)?;
        let sql = statements::select_where(
            &meta.table,
            &selected_columns(&columns),
            column,
            &meta.id_columns(),
        );
        self.query_rows("fetch_where", meta, &sql, vec![to_sql(value)])
    }

    fn fetch_links(
        &self,
        join: &JoinTableMetadata,
        side: LinkSide,
        key: &KeyPart,
    ) -> Result<Vec<KeyPart>> {
        let (owner_kind, target_kind) = hydration::link_kinds(&self.registry, join)?;
        let returned_kind = match side {
            LinkSide::Owner => target_kind,
            LinkSide::Target => owner_kind,
        };
        let (matched, returned) = side.columns(join);
        let sql = statements::select_links(&join.table, matched, returned);

        let mut stmt = self.conn.prepare(&sql).map_err(sqlite("fetch_links"))?;
        let raw: Vec<SqlValue> = stmt
            .query_map([key_to_sql(key)], |row| row.get::<_, SqlValue>(0))
            .map_err(sqlite("fetch_links"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(sqlite("fetch_links"))?;
        raw.into_iter()
            .map(|value| decode_key(&join.table, returned, returned_kind, value))
            .collect()
    }
}

impl PersistenceBackend for SqliteBackend {
    fn begin_transaction(&mut self) -> Result<()> {
        if self.in_transaction() {
            return Err(UnitasError::backend(
                "begin_transaction",
                "transaction already active",
            ));
        }
        // IMMEDIATE takes the write lock up front so the flush cannot
        // fail halfway on a lock upgrade
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(sqlite("begin_transaction"))?;
        debug!("sqlite begin");
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.require_transaction("commit")?;
        self.conn.execute_batch("COMMIT").map_err(sqlite("commit"))?;
        debug!("sqlite commit");
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction() {
            return Ok(());
        }
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(sqlite("rollback"))?;
        debug!("sqlite rollback");
        Ok(())
    }

    fn execute_insert(&mut self, meta: &EntityMetadata, row: &Row) -> Result<Option<KeyPart>> {
        self.require_transaction("execute_insert")?;
        let id_columns = meta.id_columns();
        let generate = meta.is_generated()
            && id_columns
                .first()
                .map_or(false, |c| row.get(*c).map_or(true, Value::is_null));

        let (columns, params): (Vec<&str>, Vec<SqlValue>) = row
            .iter()
            .filter(|(column, _)| !(generate && id_columns.contains(&column.as_str())))
            .map(|(column, value)| (column.as_str(), to_sql(value)))
            .unzip();
        let sql = statements::insert(&meta.table, &columns);
        self.execute("execute_insert", &meta.table, &sql, params)?;

        if generate {
            let id = self.conn.last_insert_rowid();
            debug!(table = %meta.table, id, "generated key");
            return Ok(Some(KeyPart::Int(id)));
        }
        Ok(None)
    }

    fn execute_update(
        &mut self,
        meta: &EntityMetadata,
        key: &PrimaryKey,
        changes: &Row,
        guard: Option<&VersionGuard>,
    ) -> Result<u64> {
        self.require_transaction("execute_update")?;
        meta.check_key(key)?;
        let id_columns = meta.id_columns();
        let guard_column = guard.map(|g| g.column.as_str());

        let mut params: Vec<SqlValue> = changes.values().map(to_sql).collect();
        params.extend(key_params(key));
        if let Some(g) = guard {
            params.push(to_sql(&g.expected));
        }

        if changes.is_empty() {
            let sql = statements::count_by_key(&meta.table, &id_columns, guard_column);
            let count: i64 = self
                .conn
                .query_row(&sql, params_from_iter(params), |row| row.get(0))
                .map_err(sqlite("execute_update"))?;
            return Ok(count as u64);
        }

        let set: Vec<&str> = changes.keys().map(String::as_str).collect();
        let sql = statements::update(&meta.table, &set, &id_columns, guard_column);
        self.execute("execute_update", &meta.table, &sql, params)
    }

    fn execute_delete(
        &mut self,
        meta: &EntityMetadata,
        key: &PrimaryKey,
        guard: Option<&VersionGuard>,
    ) -> Result<u64> {
        self.require_transaction("execute_delete")?;
        meta.check_key(key)?;
        let mut params = key_params(key);
        if let Some(g) = guard {
            params.push(to_sql(&g.expected));
        }
        let sql = statements::delete(
            &meta.table,
            &meta.id_columns(),
            guard.map(|g| g.column.as_str()),
        );
        self.execute("execute_delete", &meta.table, &sql, params)
    }

    fn insert_link(
        &mut self,
        join: &JoinTableMetadata,
        owner: &KeyPart,
        target: &KeyPart,
    ) -> Result<()> {
        self.require_transaction("insert_link")?;
        let sql = statements::insert_link(&join.table, &join.owner_column, &join.target_column);
        self.execute(
            "insert_link",
            &join.table,
            &sql,
            vec![key_to_sql(owner), key_to_sql(target)],
        )?;
        Ok(())
    }

    fn delete_link(
        &mut self,
        join: &JoinTableMetadata,
        owner: &KeyPart,
        target: &KeyPart,
    ) -> Result<u64> {
        self.require_transaction("delete_link")?;
        let sql = statements::delete_link(&join.table, &join.owner_column, &join.target_column);
        self.execute(
            "delete_link",
            &join.table,
            &sql,
            vec![key_to_sql(owner), key_to_sql(target)],
        )
    }

    fn delete_links(
        &mut self,
        join: &JoinTableMetadata,
        side: LinkSide,
        key: &KeyPart,
    ) -> Result<u64> {
        self.require_transaction("delete_links")?;
        let (matched, _) = side.columns(join);
        let sql = statements::delete_links(&join.table, matched);
        self.execute("delete_links", &join.table, &sql, vec![key_to_sql(key)])
    }
}
