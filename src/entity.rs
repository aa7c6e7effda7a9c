//! # Entity Descriptors
//!
//! The typed description of a record shape as supplied by the modeling layer:
//! topic, ordered key and value columns, per-column nullability, decimal
//! precision/scale and ignore markers.
//!
//! Descriptors are built eagerly and passed explicitly to the DDL adapter and
//! the projection validator; nothing is discovered or cached behind the
//! caller's back.
//!
//! ```rust
//! use ksqlweave::entity::{ColumnDescriptor, EntityDescriptor, ObjectKind};
//! use ksqlweave::expr::ValueType;
//!
//! let entity = EntityDescriptor::new("Order", "orders")
//!   .with_column(ColumnDescriptor::new("Id", ValueType::Int).key(0))
//!   .with_column(ColumnDescriptor::new("Name", ValueType::String));
//! assert_eq!(entity.object_kind(), ObjectKind::Stream);
//! assert_eq!(entity.key_columns()[0].name, "Id");
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::expr::ValueType;

/// Stream or table classification of a ksqlDB object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ObjectKind {
  /// Append-only stream
  #[default]
  Stream,
  /// Changelog table
  Table,
}

impl ObjectKind {
  /// Dialect keyword.
  pub fn keyword(self) -> &'static str {
    match self {
      ObjectKind::Stream => "STREAM",
      ObjectKind::Table => "TABLE",
    }
  }
}

impl fmt::Display for ObjectKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.keyword())
  }
}

/// One column (property) of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
  /// Property name
  pub name: String,
  /// Property type; a nullable type implies a nullable column
  pub ty: ValueType,
  /// Explicit nullability
  pub nullable: bool,
  /// Decimal precision annotation
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub precision: Option<u32>,
  /// Decimal scale annotation
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub scale: Option<u32>,
  /// Position among key columns, when the column is part of the key
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub key_order: Option<u32>,
  /// Excluded from schemas and projections
  #[serde(default)]
  pub ignored: bool,
  /// Event-time column
  #[serde(default)]
  pub timestamp: bool,
}

impl ColumnDescriptor {
  /// Value column of the given type.
  pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
    let nullable = ty.is_nullable();
    Self {
      name: name.into(),
      ty,
      nullable,
      precision: None,
      scale: None,
      key_order: None,
      ignored: false,
      timestamp: false,
    }
  }

  /// Marks the column as a key at the given position.
  pub fn key(mut self, order: u32) -> Self {
    self.key_order = Some(order);
    self
  }

  /// Marks the column nullable.
  pub fn nullable(mut self) -> Self {
    self.nullable = true;
    self
  }

  /// Sets the decimal precision/scale annotation.
  pub fn decimal(mut self, precision: u32, scale: u32) -> Self {
    self.precision = Some(precision);
    self.scale = Some(scale);
    self
  }

  /// Marks the column ignored.
  pub fn ignored(mut self) -> Self {
    self.ignored = true;
    self
  }

  /// Marks the column as the event-time column.
  pub fn timestamp(mut self) -> Self {
    self.timestamp = true;
    self
  }

  /// True for key columns.
  pub fn is_key(&self) -> bool {
    self.key_order.is_some()
  }

  /// True when the column or its type is nullable.
  pub fn is_nullable(&self) -> bool {
    self.nullable || self.ty.is_nullable()
  }
}

/// Typed record shape bound to a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDescriptor {
  /// Record type name, e.g. `Order`
  pub type_name: String,
  /// Backing topic
  pub topic: String,
  /// Explicit stream/table classification
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub kind: Option<ObjectKind>,
  /// Columns in declared order
  pub columns: Vec<ColumnDescriptor>,
}

impl EntityDescriptor {
  /// Descriptor with no columns.
  pub fn new(type_name: impl Into<String>, topic: impl Into<String>) -> Self {
    Self {
      type_name: type_name.into(),
      topic: topic.into(),
      kind: None,
      columns: Vec::new(),
    }
  }

  /// Appends a column.
  pub fn with_column(mut self, column: ColumnDescriptor) -> Self {
    self.columns.push(column);
    self
  }

  /// Sets the explicit classification.
  pub fn with_kind(mut self, kind: ObjectKind) -> Self {
    self.kind = Some(kind);
    self
  }

  /// Non-ignored columns in declared order.
  pub fn properties(&self) -> impl Iterator<Item = &ColumnDescriptor> {
    self.columns.iter().filter(|c| !c.ignored)
  }

  /// Column by name (case-insensitive).
  pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
    self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
  }

  /// Key columns sorted by key order; ties keep declared order.
  pub fn key_columns(&self) -> Vec<&ColumnDescriptor> {
    let mut keys: Vec<&ColumnDescriptor> = self.properties().filter(|c| c.is_key()).collect();
    keys.sort_by_key(|c| c.key_order);
    keys
  }

  /// Non-key columns in declared order.
  pub fn value_columns(&self) -> Vec<&ColumnDescriptor> {
    self.properties().filter(|c| !c.is_key()).collect()
  }

  /// True when any column is a key.
  pub fn has_key(&self) -> bool {
    self.properties().any(ColumnDescriptor::is_key)
  }

  /// Event-time column, if annotated.
  pub fn timestamp_column(&self) -> Option<&ColumnDescriptor> {
    self.properties().find(|c| c.timestamp)
  }

  /// Explicit kind, else stream.
  pub fn object_kind(&self) -> ObjectKind {
    self.kind.unwrap_or_default()
  }
}

/// Entity descriptors keyed by record type name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Catalog {
  entities: BTreeMap<String, EntityDescriptor>,
}

impl Catalog {
  /// Empty catalog.
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers a descriptor under its type name.
  pub fn with(mut self, entity: EntityDescriptor) -> Self {
    self.insert(entity);
    self
  }

  /// Registers a descriptor under its type name, replacing any previous one.
  pub fn insert(&mut self, entity: EntityDescriptor) {
    self.entities.insert(entity.type_name.clone(), entity);
  }

  /// Descriptor for a record type.
  pub fn get(&self, type_name: &str) -> Option<&EntityDescriptor> {
    self.entities.get(type_name)
  }

  /// Object kind of a record type; unknown types are streams.
  pub fn kind_of(&self, type_name: &str) -> ObjectKind {
    self.get(type_name).map(EntityDescriptor::object_kind).unwrap_or_default()
  }

  /// Source name used in FROM/JOIN: the upper-cased object name of the
  /// topic, or the type name when the type is not registered.
  pub fn source_name(&self, type_name: &str) -> String {
    match self.get(type_name) {
      Some(e) if !e.topic.trim().is_empty() => crate::naming::object_name(e.topic.trim()).to_uppercase(),
      _ => type_name.to_string(),
    }
  }

  /// True when the record type declares key columns.
  pub fn has_key(&self, type_name: &str) -> bool {
    self.get(type_name).is_some_and(EntityDescriptor::has_key)
  }
}
