#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use unitas_core::{
    AssociationMetadata, CascadeFlags, EntityHandle, EntityMetadata, EntityType, FieldKind, KeyPart,
    LifecycleEvent, LifecycleListener, MemoryBackend, MemoryDatabase, MetadataRegistry, Result,
    Row, UnitOfWork, Value,
};

/// Catalog used across the scenario tests
///
/// - Category (assigned id) 1..* Product (generated id, versioned)
/// - Product *..* Tag through `product_tags`
/// - Customer 0..1 Address, Address 1 Customer (a nullable/required cycle)
/// - Customer 1..* Order (versioned) 1..* OrderLine, lines cascade and are
///   orphan-removed
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
                        .cascade(CascadeFlags::PERSIST | CascadeFlags::MERGE),
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
                .association(AssociationMetadata::one_to_many("orders", "Order", "customer"))
                .build(),
            EntityMetadata::builder("Address")
                .id("id", FieldKind::Int)
                .generated()
                .field("street", FieldKind::Text)
                .association(AssociationMetadata::many_to_one("resident", "Customer", "resident_id"))
                .build(),
            EntityMetadata::builder("Order")
                .table("orders")
                .id("id", FieldKind::Int)
                .generated()
                .field("reference", FieldKind::Text)
                .version("version")
                .association(AssociationMetadata::many_to_one("customer", "Customer", "customer_id"))
                .association(
                    AssociationMetadata::one_to_many("lines", "OrderLine", "order")
                        .cascade(CascadeFlags::ALL)
                        .orphan_removal(),
                )
                .build(),
            EntityMetadata::builder("OrderLine")
                .table("order_line")
                .id("id", FieldKind::Int)
                .generated()
                .field("quantity", FieldKind::Int)
                .association(AssociationMetadata::many_to_one("order", "Order", "order_id"))
                .build(),
        ])
        .expect("catalog metadata is valid"),
    )
}

pub struct Fixture {
    pub registry: Arc<MetadataRegistry>,
    pub db: MemoryDatabase,
}

impl Fixture {
    pub fn new() -> Self {
        let registry = catalog();
        let db = MemoryDatabase::new(&registry);
        Self { registry, db }
    }

    /// A fresh scope on its own connection
    pub fn scope(&self) -> UnitOfWork<MemoryBackend> {
        UnitOfWork::new(Arc::clone(&self.registry), self.db.connect())
    }

    pub fn meta(&self, entity_type: &str) -> &EntityMetadata {
        self.registry
            .get(&EntityType::new(entity_type))
            .expect("registered type")
    }

    pub fn seed(&self, entity_type: &str, columns: &[(&str, Value)]) -> Value {
        let row: Row = columns
            .iter()
            .map(|(c, v)| (c.to_string(), v.clone()))
            .collect();
        let generated = self
            .db
            .seed(self.meta(entity_type), row.clone())
            .expect("seed row");
        match generated {
            Some(part) => part.to_value(),
            None => row.get("id").cloned().unwrap_or(Value::Null),
        }
    }

    pub fn seed_category(&self, id: i64, name: &str) {
        self.seed("Category", &[("id", Value::Int(id)), ("name", name.into())]);
    }

    /// Product row at version 1; returns its generated id
    pub fn seed_product(&self, name: &str, category: Option<i64>) -> i64 {
        self.seed(
            "Product",
            &[
                ("name", name.into()),
                ("price", Value::Float(9.5)),
                ("version", Value::Int(1)),
                ("category_id", category.map(Value::Int).unwrap_or(Value::Null)),
            ],
        )
        .as_int()
        .expect("generated id")
    }

    pub fn seed_tag(&self, id: i64, label: &str) {
        self.seed("Tag", &[("id", Value::Int(id)), ("label", label.into())]);
    }

    /// Link row in `product_tags`
    pub fn tag_product(&self, product: i64, tag: i64) {
        let join = self
            .meta("Product")
            .association("tags")
            .and_then(|a| a.join_table())
            .expect("tags is a link-table association");
        self.db
            .seed_link(join, KeyPart::Int(product), KeyPart::Int(tag))
            .expect("seed link");
    }

    /// `(product_id, tag_id)` pairs currently stored
    pub fn product_tags(&self) -> Vec<(i64, i64)> {
        let mut links: Vec<(i64, i64)> = self
            .db
            .links("product_tags")
            .into_iter()
            .filter_map(|(p, t)| Some((p.to_value().as_int()?, t.to_value().as_int()?)))
            .collect();
        links.sort();
        links
    }

    pub fn seed_customer(&self, name: &str) -> i64 {
        self.seed("Customer", &[("name", name.into())])
            .as_int()
            .expect("generated id")
    }

    pub fn seed_order(&self, customer: i64, reference: &str) -> i64 {
        self.seed(
            "Order",
            &[
                ("reference", reference.into()),
                ("version", Value::Int(1)),
                ("customer_id", Value::Int(customer)),
            ],
        )
        .as_int()
        .expect("generated id")
    }

    pub fn seed_line(&self, order: i64, quantity: i64) -> i64 {
        self.seed(
            "OrderLine",
            &[("quantity", Value::Int(quantity)), ("order_id", Value::Int(order))],
        )
        .as_int()
        .expect("generated id")
    }
}

/// NEW product with a name and price
pub fn new_product(uow: &mut UnitOfWork<MemoryBackend>, name: &str) -> EntityHandle {
    let p = uow.new_entity("Product").unwrap();
    uow.entity_mut(p)
        .unwrap()
        .set("name", name)
        .unwrap()
        .set("price", 12.5)
        .unwrap();
    p
}

/// NEW category with an assigned id
pub fn new_category(uow: &mut UnitOfWork<MemoryBackend>, id: i64, name: &str) -> EntityHandle {
    let c = uow.new_entity("Category").unwrap();
    uow.set(c, "id", id).unwrap();
    uow.set(c, "name", name).unwrap();
    c
}

/// Records every callback it receives, optionally vetoing one kind
#[derive(Default)]
pub struct RecordingListener {
    pub calls: Mutex<Vec<String>>,
    pub veto: Option<&'static str>,
}

impl RecordingListener {
    pub fn vetoing(hook: &'static str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            veto: Some(hook),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn note(&self, hook: &'static str, event: &LifecycleEvent<'_>) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}:{}", hook, event.entity_type));
        if self.veto == Some(hook) {
            return Err(unitas_core::UnitasError::InvalidState {
                op: hook.to_string(),
                entity: event.entity_type.to_string(),
                state: "MANAGED".to_string(),
                reason: "vetoed by listener".to_string(),
            });
        }
        Ok(())
    }
}

impl LifecycleListener for RecordingListener {
    fn pre_persist(&self, event: &LifecycleEvent<'_>) -> Result<()> {
        self.note("pre_persist", event)
    }

    fn pre_update(&self, event: &LifecycleEvent<'_>) -> Result<()> {
        self.note("pre_update", event)
    }

    fn pre_remove(&self, event: &LifecycleEvent<'_>) -> Result<()> {
        self.note("pre_remove", event)
    }

    fn post_load(&self, event: &LifecycleEvent<'_>) {
        let _ = self.note("post_load", event);
    }
}
