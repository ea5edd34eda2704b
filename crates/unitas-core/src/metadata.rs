//! Read-only mapping descriptor
//!
//! Describes, per entity type, the table it lives in, its identifier and
//! scalar fields, its associations, and an optional version column. The Unit
//! of Work never mutates metadata; a [`MetadataRegistry`] is validated once
//! and then shared behind an `Arc`.

use std::collections::{BTreeMap, HashSet};
use std::ops::BitOr;

use crate::errors::{Result, UnitasError};
use crate::model::{EntityType, KeyPart, PrimaryKey, Row, Value};

/// Storage kind of a scalar field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    Uuid,
    Timestamp,
    Json,
}

impl FieldKind {
    /// Whether `value` may be stored in a field of this kind
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (FieldKind::Bool, Value::Bool(_))
                | (FieldKind::Int, Value::Int(_))
                | (FieldKind::Float, Value::Float(_))
                | (FieldKind::Float, Value::Int(_))
                | (FieldKind::Text, Value::Text(_))
                | (FieldKind::Bytes, Value::Bytes(_))
                | (FieldKind::Uuid, Value::Uuid(_))
                | (FieldKind::Timestamp, Value::Timestamp(_))
                | (FieldKind::Json, Value::Json(_))
        )
    }

    fn can_be_key(&self) -> bool {
        matches!(self, FieldKind::Int | FieldKind::Text | FieldKind::Uuid)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldMetadata {
    pub name: String,
    pub column: String,
    pub kind: FieldKind,
    pub nullable: bool,
}

impl FieldMetadata {
    /// A non-null field stored in a column of the same name
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            kind,
            nullable: false,
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// How primary keys come into existence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdGeneration {
    /// The application sets the identifier fields before persist
    Assigned,
    /// The backend generates a single integer key on insert
    Generated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    ManyToOne,
    OneToOne,
    OneToMany,
    ManyToMany,
}

impl Cardinality {
    pub fn is_to_one(&self) -> bool {
        matches!(self, Cardinality::ManyToOne | Cardinality::OneToOne)
    }
}

/// Link table backing a to-many association
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinTableMetadata {
    pub table: String,
    /// Column holding the key of the owning entity
    pub owner_column: String,
    /// Column holding the key of the associated entity
    pub target_column: String,
}

/// Which side of an association is authoritative for storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ownership {
    /// Foreign-key column on this entity's table
    Owning { join_column: String, nullable: bool },
    /// Read-derived view of an association owned by the target
    Inverse { mapped_by: String },
    /// Owning side of a link-table association
    JoinTable(JoinTableMetadata),
}

/// Per-operation cascade switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CascadeFlags {
    pub persist: bool,
    pub remove: bool,
    pub merge: bool,
    pub detach: bool,
    pub refresh: bool,
}

impl CascadeFlags {
    pub const NONE: CascadeFlags = CascadeFlags {
        persist: false,
        remove: false,
        merge: false,
        detach: false,
        refresh: false,
    };
    pub const ALL: CascadeFlags = CascadeFlags {
        persist: true,
        remove: true,
        merge: true,
        detach: true,
        refresh: true,
    };
    pub const PERSIST: CascadeFlags = CascadeFlags {
        persist: true,
        ..CascadeFlags::NONE
    };
    pub const REMOVE: CascadeFlags = CascadeFlags {
        remove: true,
        ..CascadeFlags::NONE
    };
    pub const MERGE: CascadeFlags = CascadeFlags {
        merge: true,
        ..CascadeFlags::NONE
    };
    pub const DETACH: CascadeFlags = CascadeFlags {
        detach: true,
        ..CascadeFlags::NONE
    };
    pub const REFRESH: CascadeFlags = CascadeFlags {
        refresh: true,
        ..CascadeFlags::NONE
    };
}

impl BitOr for CascadeFlags {
    type Output = CascadeFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        CascadeFlags {
            persist: self.persist || rhs.persist,
            remove: self.remove || rhs.remove,
            merge: self.merge || rhs.merge,
            detach: self.detach || rhs.detach,
            refresh: self.refresh || rhs.refresh,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    Eager,
    #[default]
    Lazy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssociationMetadata {
    pub name: String,
    pub target: EntityType,
    pub cardinality: Cardinality,
    pub ownership: Ownership,
    pub cascade: CascadeFlags,
    pub fetch: FetchMode,
    pub orphan_removal: bool,
}

impl AssociationMetadata {
    fn new(
        name: impl Into<String>,
        target: impl AsRef<str>,
        cardinality: Cardinality,
        ownership: Ownership,
    ) -> Self {
        Self {
            name: name.into(),
            target: EntityType::new(target),
            cardinality,
            ownership,
            cascade: CascadeFlags::NONE,
            fetch: FetchMode::Lazy,
            orphan_removal: false,
        }
    }

    /// Owning many-to-one with a non-null foreign key
    pub fn many_to_one(
        name: impl Into<String>,
        target: impl AsRef<str>,
        join_column: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            target,
            Cardinality::ManyToOne,
            Ownership::Owning {
                join_column: join_column.into(),
                nullable: false,
            },
        )
    }

    /// Owning one-to-one with a non-null foreign key
    pub fn one_to_one(
        name: impl Into<String>,
        target: impl AsRef<str>,
        join_column: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            target,
            Cardinality::OneToOne,
            Ownership::Owning {
                join_column: join_column.into(),
                nullable: false,
            },
        )
    }

    /// Inverse side of a one-to-one owned by `mapped_by` on the target
    pub fn one_to_one_inverse(
        name: impl Into<String>,
        target: impl AsRef<str>,
        mapped_by: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            target,
            Cardinality::OneToOne,
            Ownership::Inverse {
                mapped_by: mapped_by.into(),
            },
        )
    }

    /// Inverse one-to-many, the children's many-to-one owns the key
    pub fn one_to_many(
        name: impl Into<String>,
        target: impl AsRef<str>,
        mapped_by: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            target,
            Cardinality::OneToMany,
            Ownership::Inverse {
                mapped_by: mapped_by.into(),
            },
        )
    }

    /// Owning many-to-many stored in a link table
    pub fn many_to_many(
        name: impl Into<String>,
        target: impl AsRef<str>,
        table: impl Into<String>,
        owner_column: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            target,
            Cardinality::ManyToMany,
            Ownership::JoinTable(JoinTableMetadata {
                table: table.into(),
                owner_column: owner_column.into(),
                target_column: target_column.into(),
            }),
        )
    }

    /// Inverse many-to-many, the target's link-table association owns it
    pub fn many_to_many_inverse(
        name: impl Into<String>,
        target: impl AsRef<str>,
        mapped_by: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            target,
            Cardinality::ManyToMany,
            Ownership::Inverse {
                mapped_by: mapped_by.into(),
            },
        )
    }

    /// Make an owning foreign key nullable
    pub fn nullable(mut self) -> Self {
        if let Ownership::Owning { nullable, .. } = &mut self.ownership {
            *nullable = true;
        }
        self
    }

    pub fn cascade(mut self, flags: CascadeFlags) -> Self {
        self.cascade = flags;
        self
    }

    pub fn fetch(mut self, fetch: FetchMode) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn eager(self) -> Self {
        self.fetch(FetchMode::Eager)
    }

    pub fn orphan_removal(mut self) -> Self {
        self.orphan_removal = true;
        self
    }

    pub fn is_to_one(&self) -> bool {
        self.cardinality.is_to_one()
    }

    /// Whether this side's state is written to storage
    pub fn is_owning(&self) -> bool {
        !matches!(self.ownership, Ownership::Inverse { .. })
    }

    /// Foreign-key column and nullability for an owning to-one
    pub fn join_column(&self) -> Option<(&str, bool)> {
        match &self.ownership {
            Ownership::Owning {
                join_column,
                nullable,
            } => Some((join_column.as_str(), *nullable)),
            _ => None,
        }
    }

    pub fn join_table(&self) -> Option<&JoinTableMetadata> {
        match &self.ownership {
            Ownership::JoinTable(join) => Some(join),
            _ => None,
        }
    }

    pub fn mapped_by(&self) -> Option<&str> {
        match &self.ownership {
            Ownership::Inverse { mapped_by } => Some(mapped_by),
            _ => None,
        }
    }

    /// Remove cascade, which orphan removal implies
    pub fn cascades_remove(&self) -> bool {
        self.cascade.remove || self.orphan_removal
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityMetadata {
    pub entity_type: EntityType,
    pub table: String,
    pub id_fields: Vec<String>,
    pub id_generation: IdGeneration,
    pub fields: Vec<FieldMetadata>,
    pub associations: Vec<AssociationMetadata>,
    pub version_field: Option<String>,
}

impl EntityMetadata {
    pub fn builder(entity_type: impl AsRef<str>) -> EntityMetadataBuilder {
        EntityMetadataBuilder::new(entity_type)
    }

    pub fn field(&self, name: &str) -> Option<&FieldMetadata> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn association(&self, name: &str) -> Option<&AssociationMetadata> {
        self.associations.iter().find(|a| a.name == name)
    }

    /// Look up a field, reporting unknown names as a mapping error
    pub fn require_field(&self, name: &str) -> Result<&FieldMetadata> {
        self.field(name).ok_or_else(|| {
            UnitasError::mapping(format!(
                "unknown field '{}' on {}",
                name, self.entity_type
            ))
        })
    }

    /// Look up an association, reporting unknown names as a mapping error
    pub fn require_association(&self, name: &str) -> Result<&AssociationMetadata> {
        self.association(name).ok_or_else(|| {
            UnitasError::mapping(format!(
                "unknown association '{}' on {}",
                name, self.entity_type
            ))
        })
    }

    pub fn is_id_field(&self, name: &str) -> bool {
        self.id_fields.iter().any(|f| f == name)
    }

    pub fn is_version_field(&self, name: &str) -> bool {
        self.version_field.as_deref() == Some(name)
    }

    pub fn is_generated(&self) -> bool {
        self.id_generation == IdGeneration::Generated
    }

    /// Columns of the identifier fields, in declaration order
    pub fn id_columns(&self) -> Vec<&str> {
        self.id_fields
            .iter()
            .filter_map(|name| self.field(name).map(|f| f.column.as_str()))
            .collect()
    }

    pub fn version_column(&self) -> Option<&str> {
        self.version_field
            .as_deref()
            .and_then(|name| self.field(name))
            .map(|f| f.column.as_str())
    }

    /// Build a primary key from field values; `None` if any part is unset
    pub fn key_from_fields(&self, fields: &BTreeMap<String, Value>) -> Option<PrimaryKey> {
        let parts: Option<Vec<KeyPart>> = self
            .id_fields
            .iter()
            .map(|name| fields.get(name).and_then(KeyPart::from_value))
            .collect();
        parts.map(PrimaryKey::from_parts)
    }

    /// Build a primary key from a storage row
    ///
    /// # Errors
    ///
    /// Returns `Mapping` if an identifier column is missing or null.
    pub fn key_from_row(&self, row: &Row) -> Result<PrimaryKey> {
        let mut parts = Vec::with_capacity(self.id_fields.len());
        for name in &self.id_fields {
            let field = self.require_field(name)?;
            let part = row.get(&field.column).and_then(KeyPart::from_value).ok_or_else(|| {
                UnitasError::mapping(format!(
                    "row for {} has no usable identifier in column '{}'",
                    self.entity_type, field.column
                ))
            })?;
            parts.push(part);
        }
        Ok(PrimaryKey::from_parts(parts))
    }

    /// Validate a caller-provided key against the identifier arity
    ///
    /// # Errors
    ///
    /// Returns `Mapping` if the key has the wrong number of parts.
    pub fn check_key(&self, key: &PrimaryKey) -> Result<()> {
        if key.len() != self.id_fields.len() {
            return Err(UnitasError::mapping(format!(
                "{} expects a {}-part key, got {}",
                self.entity_type,
                self.id_fields.len(),
                key
            )));
        }
        Ok(())
    }

    /// Identifier columns paired with the key parts, for WHERE clauses
    pub fn key_columns<'a>(&'a self, key: &'a PrimaryKey) -> Vec<(&'a str, &'a KeyPart)> {
        self.id_columns().into_iter().zip(key.parts().iter()).collect()
    }
}

/// Fluent construction of [`EntityMetadata`]
#[derive(Debug, Clone)]
pub struct EntityMetadataBuilder {
    meta: EntityMetadata,
}

impl EntityMetadataBuilder {
    fn new(entity_type: impl AsRef<str>) -> Self {
        let entity_type = EntityType::new(entity_type);
        Self {
            meta: EntityMetadata {
                table: entity_type.as_str().to_lowercase(),
                entity_type,
                id_fields: Vec::new(),
                id_generation: IdGeneration::Assigned,
                fields: Vec::new(),
                associations: Vec::new(),
                version_field: None,
            },
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.meta.table = table.into();
        self
    }

    /// Add an identifier field; call more than once for composite keys
    pub fn id(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        let field = FieldMetadata::new(name, kind);
        self.meta.id_fields.push(field.name.clone());
        self.meta.fields.push(field);
        self
    }

    /// Let the backend generate the (single integer) identifier
    pub fn generated(mut self) -> Self {
        self.meta.id_generation = IdGeneration::Generated;
        self
    }

    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.meta.fields.push(FieldMetadata::new(name, kind));
        self
    }

    pub fn nullable_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.meta.fields.push(FieldMetadata::new(name, kind).nullable());
        self
    }

    pub fn field_metadata(mut self, field: FieldMetadata) -> Self {
        self.meta.fields.push(field);
        self
    }

    /// Add an integer version column used for optimistic locking
    pub fn version(mut self, name: impl Into<String>) -> Self {
        let field = FieldMetadata::new(name, FieldKind::Int);
        self.meta.version_field = Some(field.name.clone());
        self.meta.fields.push(field);
        self
    }

    pub fn association(mut self, association: AssociationMetadata) -> Self {
        self.meta.associations.push(association);
        self
    }

    pub fn build(self) -> EntityMetadata {
        self.meta
    }
}

/// Validated set of entity descriptors
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    entities: BTreeMap<EntityType, EntityMetadata>,
    order: Vec<EntityType>,
}

impl MetadataRegistry {
    /// Register and cross-check a set of descriptors
    ///
    /// # Errors
    ///
    /// Returns `Mapping` for duplicate types, missing or malformed
    /// identifiers, unknown association targets, and inverse sides that do
    /// not match an owning side on the target.
    pub fn build(entities: Vec<EntityMetadata>) -> Result<Self> {
        let mut registry = MetadataRegistry::default();
        for meta in entities {
            if registry.entities.contains_key(&meta.entity_type) {
                return Err(UnitasError::mapping(format!(
                    "entity type {} registered twice",
                    meta.entity_type
                )));
            }
            registry.order.push(meta.entity_type.clone());
            registry.entities.insert(meta.entity_type.clone(), meta);
        }
        for meta in registry.entities.values() {
            registry.validate_entity(meta)?;
        }
        Ok(registry)
    }

    pub fn get(&self, entity_type: &EntityType) -> Result<&EntityMetadata> {
        self.entities.get(entity_type).ok_or_else(|| {
            UnitasError::mapping(format!("unknown entity type {}", entity_type))
        })
    }

    pub fn contains(&self, entity_type: &EntityType) -> bool {
        self.entities.contains_key(entity_type)
    }

    /// Descriptors in registration order
    pub fn iter(&self) -> impl Iterator<Item = &EntityMetadata> {
        self.order.iter().filter_map(|ty| self.entities.get(ty))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn validate_entity(&self, meta: &EntityMetadata) -> Result<()> {
        let ty = &meta.entity_type;
        let fail = |msg: String| Err(UnitasError::mapping(format!("{}: {}", ty, msg)));

        if meta.table.is_empty() {
            return fail("table name is empty".to_string());
        }
        if meta.id_fields.is_empty() {
            return fail("no identifier field".to_string());
        }

        let mut names = HashSet::new();
        let mut columns = HashSet::new();
        for field in &meta.fields {
            if !names.insert(field.name.as_str()) {
                return fail(format!("duplicate member '{}'", field.name));
            }
            if !columns.insert(field.column.as_str()) {
                return fail(format!("duplicate column '{}'", field.column));
            }
        }
        for id in &meta.id_fields {
            let Some(field) = meta.field(id) else {
                return fail(format!("identifier '{}' is not a field", id));
            };
            if !field.kind.can_be_key() || field.nullable {
                return fail(format!("identifier '{}' must be a non-null int, text or uuid", id));
            }
        }
        if meta.is_generated() {
            let single_int = meta.id_fields.len() == 1
                && meta
                    .field(&meta.id_fields[0])
                    .map(|f| f.kind == FieldKind::Int)
                    .unwrap_or(false);
            if !single_int {
                return fail("generated identifiers must be a single int field".to_string());
            }
        }
        if let Some(version) = &meta.version_field {
            match meta.field(version) {
                Some(field) if field.kind == FieldKind::Int => {}
                _ => return fail(format!("version field '{}' must be an int field", version)),
            }
        }

        for assoc in &meta.associations {
            if !names.insert(assoc.name.as_str()) {
                return fail(format!("duplicate member '{}'", assoc.name));
            }
            let Some(target) = self.entities.get(&assoc.target) else {
                return fail(format!(
                    "association '{}' targets unknown type {}",
                    assoc.name, assoc.target
                ));
            };
            match &assoc.ownership {
                Ownership::Owning { join_column, .. } => {
                    if !assoc.is_to_one() {
                        return fail(format!(
                            "to-many association '{}' cannot own a foreign-key column",
                            assoc.name
                        ));
                    }
                    if target.id_fields.len() != 1 {
                        return fail(format!(
                            "association '{}' targets composite-key type {}",
                            assoc.name, target.entity_type
                        ));
                    }
                    if !columns.insert(join_column.as_str()) {
                        return fail(format!("duplicate column '{}'", join_column));
                    }
                }
                Ownership::JoinTable(_) => {
                    if assoc.is_to_one() {
                        return fail(format!(
                            "to-one association '{}' cannot use a link table",
                            assoc.name
                        ));
                    }
                    if meta.id_fields.len() != 1 || target.id_fields.len() != 1 {
                        return fail(format!(
                            "link-table association '{}' requires single-part keys",
                            assoc.name
                        ));
                    }
                }
                Ownership::Inverse { mapped_by } => {
                    let Some(owner) = target.association(mapped_by) else {
                        return fail(format!(
                            "association '{}' is mapped by unknown {}.{}",
                            assoc.name, target.entity_type, mapped_by
                        ));
                    };
                    if owner.target != *ty {
                        return fail(format!(
                            "{}.{} does not point back at {}",
                            target.entity_type, mapped_by, ty
                        ));
                    }
                    let compatible = match assoc.cardinality {
                        Cardinality::OneToMany => {
                            owner.cardinality == Cardinality::ManyToOne
                                && owner.join_column().is_some()
                        }
                        Cardinality::OneToOne => {
                            owner.cardinality == Cardinality::OneToOne
                                && owner.join_column().is_some()
                        }
                        Cardinality::ManyToMany => owner.join_table().is_some(),
                        Cardinality::ManyToOne => false,
                    };
                    if !compatible {
                        return fail(format!(
                            "association '{}' cannot be the inverse of {}.{}",
                            assoc.name, target.entity_type, mapped_by
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category() -> EntityMetadata {
        EntityMetadata::builder("Category")
            .table("categories")
            .id("id", FieldKind::Int)
            .generated()
            .field("name", FieldKind::Text)
            .association(AssociationMetadata::one_to_many("products", "Product", "category"))
            .build()
    }

    fn product() -> EntityMetadata {
        EntityMetadata::builder("Product")
            .table("products")
            .id("id", FieldKind::Int)
            .field("name", FieldKind::Text)
            .version("version")
            .association(
                AssociationMetadata::many_to_one("category", "Category", "category_id")
                    .nullable()
                    .cascade(CascadeFlags::PERSIST | CascadeFlags::MERGE),
            )
            .build()
    }

    #[test]
    fn test_valid_registry_builds() {
        let registry = MetadataRegistry::build(vec![category(), product()]).unwrap();
        assert_eq!(registry.len(), 2);
        let product = registry.get(&EntityType::new("Product")).unwrap();
        assert_eq!(product.version_column(), Some("version"));
        let assoc = product.association("category").unwrap();
        assert_eq!(assoc.join_column(), Some(("category_id", true)));
        assert!(assoc.cascade.persist && assoc.cascade.merge && !assoc.cascade.remove);
        let order: Vec<_> = registry.iter().map(|m| m.entity_type.to_string()).collect();
        assert_eq!(order, vec!["Category", "Product"]);
    }

    #[test]
    fn test_unknown_target_is_mapping_error() {
        let err = MetadataRegistry::build(vec![product()]).unwrap_err();
        assert!(matches!(err, UnitasError::Mapping { .. }));
    }

    #[test]
    fn test_inverse_must_point_back() {
        let bad = EntityMetadata::builder("Category")
            .id("id", FieldKind::Int)
            .association(AssociationMetadata::one_to_many("products", "Product", "missing"))
            .build();
        assert!(MetadataRegistry::build(vec![bad, product()]).is_err());
    }

    #[test]
    fn test_generated_requires_single_int() {
        let bad = EntityMetadata::builder("Sku")
            .id("code", FieldKind::Text)
            .generated()
            .build();
        assert!(MetadataRegistry::build(vec![bad]).is_err());
    }

    #[test]
    fn test_key_from_row_and_fields() {
        let meta = product();
        let mut row = Row::new();
        row.insert("id".to_string(), Value::Int(7));
        assert_eq!(meta.key_from_row(&row).unwrap(), PrimaryKey::from(7));

        let mut fields = BTreeMap::new();
        assert_eq!(meta.key_from_fields(&fields), None);
        fields.insert("id".to_string(), Value::Int(7));
        assert_eq!(meta.key_from_fields(&fields), Some(PrimaryKey::from(7)));

        assert!(meta.check_key(&PrimaryKey::from(1)).is_ok());
        let composite = PrimaryKey::from_parts(vec![KeyPart::Int(1), KeyPart::Int(2)]);
        assert!(meta.check_key(&composite).is_err());
    }

    #[test]
    fn test_field_kind_accepts() {
        assert!(FieldKind::Int.accepts(&Value::Int(1)));
        assert!(FieldKind::Int.accepts(&Value::Null));
        assert!(!FieldKind::Int.accepts(&Value::Text("x".into())));
        assert!(FieldKind::Float.accepts(&Value::Int(1)));
    }
}
