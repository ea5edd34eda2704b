#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use rusqlite::Connection;
use tempfile::TempDir;
use unitas_core::{
    AssociationMetadata, CascadeFlags, EntityMetadata, FieldKind, MetadataRegistry, UnitOfWork,
};
use unitas_store::SqliteBackend;

/// Catalog mirrored by [`SCHEMA`]
///
/// - Category (assigned id) 1..* Product (generated id, versioned)
/// - Product *..* Tag through `product_tags`
/// - Customer 0..1 Address, Address 1 Customer
/// - Document keyed by UUID, carrying every non-key value kind
pub fn catalog() -> Arc<MetadataRegistry> {
    Arc::new(
        MetadataRegistry::build(vec![
            EntityMetadata::builder("Category")
                .id("id", FieldKind::Int)
                .field("name", FieldKind::Text)
                .association(AssociationMetadata::one_to_many("products", "Product", "category"))
                .build(),
            EntityMetadata::builder("Product")
                .id("id", FieldKind::Int)
                .generated()
                .field("name", FieldKind::Text)
                .nullable_field("price", FieldKind::Float)
                .version("version")
                .association(
                    AssociationMetadata::many_to_one("category", "Category", "category_id")
                        .nullable()
                        .cascade(CascadeFlags::PERSIST),
                )
                .association(
                    AssociationMetadata::many_to_many(
                        "tags",
                        "Tag",
                        "product_tags",
                        "product_id",
                        "tag_id",
                    )
                    .cascade(CascadeFlags::PERSIST),
                )
                .build(),
            EntityMetadata::builder("Tag")
                .id("id", FieldKind::Int)
                .field("label", FieldKind::Text)
                .association(AssociationMetadata::many_to_many_inverse("products", "Product", "tags"))
                .build(),
            EntityMetadata::builder("Customer")
                .id("id", FieldKind::Int)
                .generated()
                .field("name", FieldKind::Text)
                .association(
                    AssociationMetadata::one_to_one("address", "Address", "address_id")
                        .nullable()
                        .cascade(CascadeFlags::ALL),
                )
                .build(),
            EntityMetadata::builder("Address")
                .id("id", FieldKind::Int)
                .generated()
                .field("street", FieldKind::Text)
                .association(AssociationMetadata::many_to_one("resident", "Customer", "resident_id"))
                .build(),
            EntityMetadata::builder("Document")
                .id("id", FieldKind::Uuid)
                .field("title", FieldKind::Text)
                .field("published", FieldKind::Bool)
                .nullable_field("issued_at", FieldKind::Timestamp)
                .nullable_field("attributes", FieldKind::Json)
                .nullable_field("thumbnail", FieldKind::Bytes)
                .version("version")
                .build(),
        ])
        .expect("catalog metadata is valid"),
    )
}

pub const SCHEMA: &str = "
    CREATE TABLE category (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL
    );
    CREATE TABLE product (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        price REAL,
        version INTEGER,
        category_id INTEGER REFERENCES category(id)
    );
    CREATE TABLE tag (
        id INTEGER PRIMARY KEY,
        label TEXT NOT NULL
    );
    CREATE TABLE product_tags (
        product_id INTEGER NOT NULL REFERENCES product(id),
        tag_id INTEGER NOT NULL REFERENCES tag(id),
        PRIMARY KEY (product_id, tag_id)
    );
    CREATE TABLE customer (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        address_id INTEGER REFERENCES address(id)
    );
    CREATE TABLE address (
        id INTEGER PRIMARY KEY,
        street TEXT NOT NULL,
        resident_id INTEGER NOT NULL REFERENCES customer(id)
    );
    CREATE TABLE document (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        published INTEGER NOT NULL,
        issued_at TEXT,
        attributes TEXT,
        thumbnail BLOB,
        version INTEGER
    );
";

/// Scope over a fresh in-memory database
pub fn memory_scope() -> UnitOfWork<SqliteBackend> {
    let registry = catalog();
    let backend = SqliteBackend::open_in_memory(Arc::clone(&registry)).expect("open database");
    backend
        .connection()
        .execute_batch(SCHEMA)
        .expect("create schema");
    UnitOfWork::new(registry, backend)
}

/// On-disk database shared by several connections
pub struct DiskDb {
    pub registry: Arc<MetadataRegistry>,
    dir: TempDir,
}

impl DiskDb {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let db = Self {
            registry: catalog(),
            dir,
        };
        db.connection()
            .execute_batch(SCHEMA)
            .expect("create schema");
        db
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().join("unitas.db")
    }

    /// A raw configured connection, for seeding and inspection
    pub fn connection(&self) -> Connection {
        unitas_store::db::open(self.path()).expect("open database")
    }

    /// A fresh scope on its own connection
    pub fn scope(&self) -> UnitOfWork<SqliteBackend> {
        let backend =
            SqliteBackend::open(self.path(), Arc::clone(&self.registry)).expect("open database");
        UnitOfWork::new(Arc::clone(&self.registry), backend)
    }

    pub fn execute(&self, sql: &str) {
        self.connection().execute_batch(sql).expect("execute");
    }

    pub fn count(&self, table: &str) -> i64 {
        self.connection()
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .expect("count rows")
    }
}

pub fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })
    .expect("count rows")
}
