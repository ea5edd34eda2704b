//! In-memory persistence backend
//!
//! A [`MemoryDatabase`] is the shared storage; each [`MemoryBackend`] is one
//! connection to it. A connection stages its writes on a private copy taken
//! at `begin_transaction` and publishes the copy on `commit`, so a rolled
//! back flush leaves nothing behind. Primary-key, not-null and foreign-key
//! constraints are checked per statement, foreign keys with RESTRICT on
//! delete.
//!
//! Every connection also carries a [`MemoryProbe`]: a read counter, a
//! statement log and a fault switch, which tests clone before handing the
//! connection to a Unit of Work.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::{LinkSide, PersistenceBackend, RowSource, VersionGuard};
use crate::errors::{Result, UnitasError};
use crate::metadata::{EntityMetadata, JoinTableMetadata, MetadataRegistry};
use crate::model::{KeyPart, PrimaryKey, Row, Value};

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: BTreeMap<String, BTreeMap<PrimaryKey, Row>>,
    links: BTreeMap<String, BTreeSet<(KeyPart, KeyPart)>>,
    sequences: BTreeMap<String, i64>,
}

#[derive(Debug)]
struct ForeignKey {
    column: String,
    target_table: String,
}

#[derive(Debug)]
struct LinkSchema {
    owner_table: String,
    target_table: String,
}

#[derive(Debug, Default)]
struct Schema {
    foreign_keys: BTreeMap<String, Vec<ForeignKey>>,
    links: BTreeMap<String, LinkSchema>,
}

impl Schema {
    fn from_registry(registry: &MetadataRegistry) -> Self {
        let mut schema = Schema::default();
        for meta in registry.iter() {
            let mut fks = Vec::new();
            for assoc in &meta.associations {
                let Ok(target) = registry.get(&assoc.target) else {
                    continue;
                };
                if let Some((column, _)) = assoc.join_column() {
                    fks.push(ForeignKey {
                        column: column.to_string(),
                        target_table: target.table.clone(),
                    });
                }
                if let Some(join) = assoc.join_table() {
                    schema.links.insert(
                        join.table.clone(),
                        LinkSchema {
                            owner_table: meta.table.clone(),
                            target_table: target.table.clone(),
                        },
                    );
                }
            }
            schema.foreign_keys.insert(meta.table.clone(), fks);
        }
        schema
    }
}

#[derive(Debug, Default)]
struct Shared {
    generation: u64,
    tables: Tables,
}

fn violation(message: impl Into<String>) -> UnitasError {
    UnitasError::ConstraintViolation {
        message: message.into(),
    }
}

/// Shared in-memory storage, cheap to clone
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    schema: Arc<Schema>,
    shared: Arc<Mutex<Shared>>,
}

impl MemoryDatabase {
    /// Create empty tables for every type in `registry`
    pub fn new(registry: &MetadataRegistry) -> Self {
        let schema = Schema::from_registry(registry);
        let mut tables = Tables::default();
        for meta in registry.iter() {
            tables.rows.insert(meta.table.clone(), BTreeMap::new());
        }
        for table in schema.links.keys() {
            tables.links.insert(table.clone(), BTreeSet::new());
        }
        Self {
            schema: Arc::new(schema),
            shared: Arc::new(Mutex::new(Shared {
                generation: 0,
                tables,
            })),
        }
    }

    /// Open a new connection
    pub fn connect(&self) -> MemoryBackend {
        MemoryBackend {
            db: self.clone(),
            txn: None,
            probe: MemoryProbe::default(),
        }
    }

    fn lock(&self, op: &str) -> Result<MutexGuard<'_, Shared>> {
        self.shared
            .lock()
            .map_err(|_| UnitasError::backend(op, "memory database lock poisoned"))
    }

    /// Insert a row outside any Unit of Work (fixtures)
    ///
    /// # Errors
    ///
    /// Returns `ConstraintViolation` under the same rules as a flush.
    pub fn seed(&self, meta: &EntityMetadata, row: Row) -> Result<Option<KeyPart>> {
        let mut shared = self.lock("seed")?;
        let generated = insert_row(&self.schema, &mut shared.tables, meta, row)?;
        shared.generation += 1;
        Ok(generated)
    }

    /// Link two rows outside any Unit of Work (fixtures)
    ///
    /// # Errors
    ///
    /// Returns `ConstraintViolation` for dangling or duplicate links.
    pub fn seed_link(&self, join: &JoinTableMetadata, owner: KeyPart, target: KeyPart) -> Result<()> {
        let mut shared = self.lock("seed_link")?;
        insert_link_row(&self.schema, &mut shared.tables, join, owner, target)?;
        shared.generation += 1;
        Ok(())
    }

    /// Overwrite one column of a committed row, as a concurrent writer would
    ///
    /// # Errors
    ///
    /// Returns `Backend` if the row does not exist.
    pub fn raw_update(&self, table: &str, key: &PrimaryKey, column: &str, value: Value) -> Result<()> {
        let mut shared = self.lock("raw_update")?;
        let row = shared
            .tables
            .rows
            .get_mut(table)
            .and_then(|rows| rows.get_mut(key))
            .ok_or_else(|| UnitasError::backend("raw_update", format!("no row {} in {}", key, table)))?;
        row.insert(column.to_string(), value);
        shared.generation += 1;
        Ok(())
    }

    /// Delete a committed row without constraint checks
    ///
    /// # Errors
    ///
    /// Returns `Backend` if the lock is poisoned.
    pub fn raw_delete(&self, table: &str, key: &PrimaryKey) -> Result<bool> {
        let mut shared = self.lock("raw_delete")?;
        let removed = shared
            .tables
            .rows
            .get_mut(table)
            .and_then(|rows| rows.remove(key))
            .is_some();
        shared.generation += 1;
        Ok(removed)
    }

    /// Committed row by key
    pub fn row(&self, table: &str, key: &PrimaryKey) -> Option<Row> {
        let shared = self.lock("row").ok()?;
        shared.tables.rows.get(table)?.get(key).cloned()
    }

    /// Committed rows of a table, in key order
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock("rows")
            .map(|shared| {
                shared
                    .tables
                    .rows
                    .get(table)
                    .map(|rows| rows.values().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.rows(table).len()
    }

    /// Committed (owner, target) pairs of a link table
    pub fn links(&self, table: &str) -> Vec<(KeyPart, KeyPart)> {
        self.lock("links")
            .map(|shared| {
                shared
                    .tables
                    .links
                    .get(table)
                    .map(|links| links.iter().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

/// Kind of a logged statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Begin,
    Commit,
    Rollback,
    Insert,
    Update,
    Delete,
    InsertLink,
    DeleteLink,
}

impl StatementKind {
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            StatementKind::Begin | StatementKind::Commit | StatementKind::Rollback
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementRecord {
    pub kind: StatementKind,
    pub table: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Default)]
struct ProbeState {
    reads: AtomicUsize,
    statements: Mutex<Vec<StatementRecord>>,
    failing_tables: Mutex<HashSet<String>>,
}

/// Test-side view of one connection's activity
#[derive(Debug, Clone, Default)]
pub struct MemoryProbe {
    inner: Arc<ProbeState>,
}

impl MemoryProbe {
    /// Number of read calls issued so far
    pub fn reads(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<StatementRecord> {
        self.inner
            .statements
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, kind: StatementKind) -> usize {
        self.statements().iter().filter(|s| s.kind == kind).count()
    }

    pub fn count_for(&self, kind: StatementKind, table: &str) -> usize {
        self.statements()
            .iter()
            .filter(|s| s.kind == kind && s.table.as_deref() == Some(table))
            .count()
    }

    /// Write statements in issue order
    pub fn writes(&self) -> Vec<StatementRecord> {
        self.statements()
            .into_iter()
            .filter(|s| s.kind.is_write())
            .collect()
    }

    /// Reset the read counter and the statement log
    pub fn reset(&self) {
        self.inner.reads.store(0, Ordering::SeqCst);
        if let Ok(mut s) = self.inner.statements.lock() {
            s.clear();
        }
    }

    /// Make every write to `table` fail with a constraint violation
    pub fn fail_writes_to(&self, table: &str) {
        if let Ok(mut failing) = self.inner.failing_tables.lock() {
            failing.insert(table.to_string());
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut failing) = self.inner.failing_tables.lock() {
            failing.clear();
        }
    }

    fn record_read(&self) {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
    }

    fn record(&self, kind: StatementKind, table: Option<&str>, key: Option<String>) {
        if let Ok(mut s) = self.inner.statements.lock() {
            s.push(StatementRecord {
                kind,
                table: table.map(str::to_string),
                key,
            });
        }
    }

    fn check_fault(&self, table: &str) -> Result<()> {
        let failing = self
            .inner
            .failing_tables
            .lock()
            .map(|f| f.contains(table))
            .unwrap_or(false);
        if failing {
            return Err(violation(format!("injected failure writing to {}", table)));
        }
        Ok(())
    }
}

struct Transaction {
    base_generation: u64,
    tables: Tables,
}

/// One connection to a [`MemoryDatabase`]
pub struct MemoryBackend {
    db: MemoryDatabase,
    txn: Option<Transaction>,
    probe: MemoryProbe,
}

impl MemoryBackend {
    /// Shorthand for a fresh database with a single connection
    pub fn new(registry: &MetadataRegistry) -> Self {
        MemoryDatabase::new(registry).connect()
    }

    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }

    pub fn probe(&self) -> MemoryProbe {
        self.probe.clone()
    }

    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    fn read<T>(&self, op: &str, f: impl FnOnce(&Tables) -> T) -> Result<T> {
        self.probe.record_read();
        match &self.txn {
            Some(txn) => Ok(f(&txn.tables)),
            None => {
                let shared = self.db.lock(op)?;
                Ok(f(&shared.tables))
            }
        }
    }

}

fn staged<'a>(txn: &'a mut Option<Transaction>, op: &str) -> Result<&'a mut Tables> {
    txn.as_mut()
        .map(|txn| &mut txn.tables)
        .ok_or_else(|| UnitasError::backend(op, "no active transaction"))
}

fn table_rows<'a>(tables: &'a Tables, table: &str) -> Result<&'a BTreeMap<PrimaryKey, Row>> {
    tables
        .rows
        .get(table)
        .ok_or_else(|| UnitasError::backend("fetch", format!("no such table: {}", table)))
}

fn check_not_null(meta: &EntityMetadata, row: &Row, only: Option<&Row>) -> Result<()> {
    let applies = |column: &str| only.map(|changes| changes.contains_key(column)).unwrap_or(true);
    for field in &meta.fields {
        if !field.nullable && applies(&field.column) && row.get(&field.column).map_or(true, Value::is_null) {
            return Err(violation(format!(
                "NOT NULL constraint failed: {}.{}",
                meta.table, field.column
            )));
        }
    }
    for assoc in &meta.associations {
        if let Some((column, false)) = assoc.join_column() {
            if applies(column) && row.get(column).map_or(true, Value::is_null) {
                return Err(violation(format!(
                    "NOT NULL constraint failed: {}.{}",
                    meta.table, column
                )));
            }
        }
    }
    Ok(())
}

fn check_foreign_keys(
    schema: &Schema,
    tables: &Tables,
    table: &str,
    own_key: &PrimaryKey,
    row: &Row,
    only: Option<&Row>,
) -> Result<()> {
    let Some(fks) = schema.foreign_keys.get(table) else {
        return Ok(());
    };
    for fk in fks {
        if let Some(changes) = only {
            if !changes.contains_key(&fk.column) {
                continue;
            }
        }
        let Some(part) = row.get(&fk.column).and_then(KeyPart::from_value) else {
            continue;
        };
        let target_key = PrimaryKey::from(part);
        let self_reference = fk.target_table == table && target_key == *own_key;
        let exists = tables
            .rows
            .get(&fk.target_table)
            .map(|rows| rows.contains_key(&target_key))
            .unwrap_or(false);
        if !exists && !self_reference {
            return Err(violation(format!(
                "FOREIGN KEY constraint failed: {}.{} -> {}",
                table, fk.column, fk.target_table
            )));
        }
    }
    Ok(())
}

fn insert_row(
    schema: &Schema,
    tables: &mut Tables,
    meta: &EntityMetadata,
    mut row: Row,
) -> Result<Option<KeyPart>> {
    if !tables.rows.contains_key(&meta.table) {
        return Err(UnitasError::backend(
            "execute_insert",
            format!("no such table: {}", meta.table),
        ));
    }
    for field in &meta.fields {
        row.entry(field.column.clone()).or_insert(Value::Null);
    }
    for assoc in &meta.associations {
        if let Some((column, _)) = assoc.join_column() {
            row.entry(column.to_string()).or_insert(Value::Null);
        }
    }

    let mut generated = None;
    if meta.is_generated() {
        let id_column = meta.id_columns().first().map(|c| c.to_string()).unwrap_or_default();
        let sequence = tables.sequences.entry(meta.table.clone()).or_insert(0);
        match row.get(&id_column).and_then(Value::as_int) {
            Some(explicit) => *sequence = (*sequence).max(explicit),
            None => {
                *sequence += 1;
                row.insert(id_column, Value::Int(*sequence));
                generated = Some(KeyPart::Int(*sequence));
            }
        }
    }

    check_not_null(meta, &row, None)?;
    let key = meta
        .key_from_row(&row)
        .map_err(|e| violation(e.to_string()))?;
    let exists = tables
        .rows
        .get(&meta.table)
        .map(|rows| rows.contains_key(&key))
        .unwrap_or(false);
    if exists {
        return Err(violation(format!(
            "UNIQUE constraint failed: {} key {}",
            meta.table, key
        )));
    }
    check_foreign_keys(schema, tables, &meta.table, &key, &row, None)?;
    if let Some(rows) = tables.rows.get_mut(&meta.table) {
        rows.insert(key, row);
    }
    Ok(generated)
}

fn insert_link_row(
    schema: &Schema,
    tables: &mut Tables,
    join: &JoinTableMetadata,
    owner: KeyPart,
    target: KeyPart,
) -> Result<()> {
    let link = schema.links.get(&join.table).ok_or_else(|| {
        UnitasError::backend("insert_link", format!("no such table: {}", join.table))
    })?;
    let present = |table: &str, part: &KeyPart| {
        tables
            .rows
            .get(table)
            .map(|rows| rows.contains_key(&PrimaryKey::from(part.clone())))
            .unwrap_or(false)
    };
    if !present(&link.owner_table, &owner) || !present(&link.target_table, &target) {
        return Err(violation(format!(
            "FOREIGN KEY constraint failed: {}",
            join.table
        )));
    }
    let links = tables.links.entry(join.table.clone()).or_default();
    if !links.insert((owner, target)) {
        return Err(violation(format!("UNIQUE constraint failed: {}", join.table)));
    }
    Ok(())
}

fn guard_holds(row: &Row, guard: Option<&VersionGuard>) -> bool {
    guard
        .map(|g| row.get(&g.column) == Some(&g.expected))
        .unwrap_or(true)
}

impl RowSource for MemoryBackend {
    fn fetch_by_key(&self, meta: &EntityMetadata, key: &PrimaryKey) -> Result<Option<Row>> {
        self.read("fetch_by_key", |tables: &Tables| -> Result<Option<Row>> {
            Ok(table_rows(tables, &meta.table)?.get(key).cloned())
        })?
    }

    fn fetch_all(&self, meta: &EntityMetadata) -> Result<Vec<Row>> {
        self.read("fetch_all", |tables: &Tables| -> Result<Vec<Row>> {
            Ok(table_rows(tables, &meta.table)?.values().cloned().collect())
        })?
    }

    fn fetch_where(&self, meta: &EntityMetadata, column: &str, value: &Value) -> Result<Vec<Row>> {
        self.read("fetch_where", |tables: &Tables| -> Result<Vec<Row>> {
            Ok(table_rows(tables, &meta.table)?
                .values()
                .filter(|row| row.get(column) == Some(value))
                .cloned()
                .collect())
        })?
    }

    fn fetch_links(
        &self,
        join: &JoinTableMetadata,
        side: LinkSide,
        key: &KeyPart,
    ) -> Result<Vec<KeyPart>> {
        self.read("fetch_links", |tables| {
            tables
                .links
                .get(&join.table)
                .map(|links| {
                    links
                        .iter()
                        .filter_map(|(owner, target)| match side {
                            LinkSide::Owner if owner == key => Some(target.clone()),
                            LinkSide::Target if target == key => Some(owner.clone()),
                            _ => None,
                        })
                        .collect()
                })
                .unwrap_or_default()
        })
    }
}

impl PersistenceBackend for MemoryBackend {
    fn begin_transaction(&mut self) -> Result<()> {
        if self.txn.is_some() {
            return Err(UnitasError::backend(
                "begin_transaction",
                "transaction already active",
            ));
        }
        let shared = self.db.lock("begin_transaction")?;
        self.txn = Some(Transaction {
            base_generation: shared.generation,
            tables: shared.tables.clone(),
        });
        drop(shared);
        self.probe.record(StatementKind::Begin, None, None);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let txn = self
            .txn
            .take()
            .ok_or_else(|| UnitasError::backend("commit", "no active transaction"))?;
        let mut shared = self.db.lock("commit")?;
        if shared.generation != txn.base_generation {
            return Err(UnitasError::backend(
                "commit",
                "another connection committed first; transaction discarded",
            ));
        }
        shared.tables = txn.tables;
        shared.generation += 1;
        drop(shared);
        self.probe.record(StatementKind::Commit, None, None);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.txn = None;
        self.probe.record(StatementKind::Rollback, None, None);
        Ok(())
    }

    fn execute_insert(&mut self, meta: &EntityMetadata, row: &Row) -> Result<Option<KeyPart>> {
        self.probe.check_fault(&meta.table)?;
        let schema = self.db.schema.clone();
        let tables = staged(&mut self.txn, "execute_insert")?;
        let generated = insert_row(&schema, tables, meta, row.clone())?;
        debug!(table = %meta.table, generated = ?generated, "memory insert");
        self.probe.record(
            StatementKind::Insert,
            Some(&meta.table),
            generated.as_ref().map(ToString::to_string),
        );
        Ok(generated)
    }

    fn execute_update(
        &mut self,
        meta: &EntityMetadata,
        key: &PrimaryKey,
        changes: &Row,
        guard: Option<&VersionGuard>,
    ) -> Result<u64> {
        self.probe.check_fault(&meta.table)?;
        let schema = self.db.schema.clone();
        let tables = staged(&mut self.txn, "execute_update")?;
        let Some(current) = tables.rows.get(&meta.table).and_then(|rows| rows.get(key)) else {
            self.probe
                .record(StatementKind::Update, Some(&meta.table), Some(key.to_string()));
            return Ok(0);
        };
        if !guard_holds(current, guard) {
            self.probe
                .record(StatementKind::Update, Some(&meta.table), Some(key.to_string()));
            return Ok(0);
        }
        let mut updated = current.clone();
        for (column, value) in changes {
            updated.insert(column.clone(), value.clone());
        }
        check_not_null(meta, &updated, Some(changes))?;
        check_foreign_keys(&schema, tables, &meta.table, key, &updated, Some(changes))?;
        if let Some(rows) = tables.rows.get_mut(&meta.table) {
            rows.insert(key.clone(), updated);
        }
        self.probe
            .record(StatementKind::Update, Some(&meta.table), Some(key.to_string()));
        Ok(1)
    }

    fn execute_delete(
        &mut self,
        meta: &EntityMetadata,
        key: &PrimaryKey,
        guard: Option<&VersionGuard>,
    ) -> Result<u64> {
        self.probe.check_fault(&meta.table)?;
        let schema = self.db.schema.clone();
        let tables = staged(&mut self.txn, "execute_delete")?;
        let matches = tables
            .rows
            .get(&meta.table)
            .and_then(|rows| rows.get(key))
            .map(|row| guard_holds(row, guard))
            .unwrap_or(false);
        self.probe
            .record(StatementKind::Delete, Some(&meta.table), Some(key.to_string()));
        if !matches {
            return Ok(0);
        }

        if let Some(part) = key.single() {
            let referenced = part.to_value();
            for (table, fks) in &schema.foreign_keys {
                for fk in fks.iter().filter(|fk| fk.target_table == meta.table) {
                    let blocked = tables.rows.get(table).map_or(false, |rows| {
                        rows.iter().any(|(row_key, row)| {
                            row.get(&fk.column) == Some(&referenced)
                                && !(table == &meta.table && row_key == key)
                        })
                    });
                    if blocked {
                        return Err(violation(format!(
                            "FOREIGN KEY constraint failed: {}.{} still references {} {}",
                            table, fk.column, meta.table, key
                        )));
                    }
                }
            }
            for (table, link) in &schema.links {
                let blocked = tables.links.get(table).map_or(false, |links| {
                    links.iter().any(|(owner, target)| {
                        (link.owner_table == meta.table && owner == part)
                            || (link.target_table == meta.table && target == part)
                    })
                });
                if blocked {
                    return Err(violation(format!(
                        "FOREIGN KEY constraint failed: {} still links {} {}",
                        table, meta.table, key
                    )));
                }
            }
        }

        if let Some(rows) = tables.rows.get_mut(&meta.table) {
            rows.remove(key);
        }
        Ok(1)
    }

    fn insert_link(&mut self, join: &JoinTableMetadata, owner: &KeyPart, target: &KeyPart) -> Result<()> {
        self.probe.check_fault(&join.table)?;
        let schema = self.db.schema.clone();
        let tables = staged(&mut self.txn, "insert_link")?;
        insert_link_row(&schema, tables, join, owner.clone(), target.clone())?;
        self.probe.record(
            StatementKind::InsertLink,
            Some(&join.table),
            Some(format!("{}->{}", owner, target)),
        );
        Ok(())
    }

    fn delete_link(&mut self, join: &JoinTableMetadata, owner: &KeyPart, target: &KeyPart) -> Result<u64> {
        self.probe.check_fault(&join.table)?;
        let tables = staged(&mut self.txn, "delete_link")?;
        let removed = tables
            .links
            .get_mut(&join.table)
            .map(|links| links.remove(&(owner.clone(), target.clone())))
            .unwrap_or(false);
        self.probe.record(
            StatementKind::DeleteLink,
            Some(&join.table),
            Some(format!("{}->{}", owner, target)),
        );
        Ok(u64::from(removed))
    }

    fn delete_links(&mut self, join: &JoinTableMetadata, side: LinkSide, key: &KeyPart) -> Result<u64> {
        self.probe.check_fault(&join.table)?;
        let tables = staged(&mut self.txn, "delete_links")?;
        let mut removed = 0u64;
        if let Some(links) = tables.links.get_mut(&join.table) {
            let before = links.len();
            links.retain(|(owner, target)| match side {
                LinkSide::Owner => owner != key,
                LinkSide::Target => target != key,
            });
            removed = (before - links.len()) as u64;
        }
        self.probe
            .record(StatementKind::DeleteLink, Some(&join.table), Some(key.to_string()));
        Ok(removed)
    }
}
