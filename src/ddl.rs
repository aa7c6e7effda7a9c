//! # Schema Adapter and DDL Generator
//!
//! [`SchemaAdapter`] turns an [`EntityDescriptor`] into a [`SchemaDefinition`]:
//! key columns first in key order, then value columns in declared order,
//! with ignored columns dropped, reserved identifiers backtick-quoted and
//! decimal precision/scale resolved through the configured defaults.
//!
//! [`create_statement`] renders the definition as
//!
//! ```text
//! CREATE STREAM|TABLE IF NOT EXISTS <name> (<col> <type> [KEY|PRIMARY KEY], ...)
//!   WITH (KAFKA_TOPIC='<topic>', VALUE_FORMAT='AVRO', PARTITIONS=<n>, REPLICAS=<n>
//!         [, TIMESTAMP='<col>'] [, VALUE_AVRO_SCHEMA_FULL_NAME='<name>']);
//! ```
//!
//! A table with a single key column declares it `PRIMARY KEY`. Every other
//! key column is declared `KEY`, since ksqlDB has no multi-column primary key.

use serde::{Deserialize, Serialize};

use crate::config::{CompilerOptions, DecimalPrecisionConfig, TopicSettingsResolver};
use crate::entity::{ColumnDescriptor, EntityDescriptor, ObjectKind};
use crate::error::{ClauseKind, CompileError, Result};
use crate::expr::ValueType;
use crate::naming;

/// One rendered column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
  /// Identifier, quoted when reserved
  pub name: String,
  /// Dialect type
  pub sql_type: String,
  /// Part of the key
  pub is_key: bool,
}

/// Object definition produced by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDefinition {
  /// Object name
  pub object_name: String,
  /// Stream or table
  pub kind: ObjectKind,
  /// Keys first, then values
  pub columns: Vec<ColumnDefinition>,
  /// Backing topic
  pub topic: String,
  /// Partition count
  pub partitions: u32,
  /// Replication factor
  pub replicas: u32,
  /// Event-time column
  pub timestamp_column: Option<String>,
  /// Key wire-schema name hint
  pub key_schema_full_name: Option<String>,
  /// Value wire-schema name hint
  pub value_schema_full_name: Option<String>,
}

impl SchemaDefinition {
  /// Key columns in key order.
  pub fn key_columns(&self) -> impl Iterator<Item = &ColumnDefinition> {
    self.columns.iter().filter(|c| c.is_key)
  }

  /// Value columns in declared order.
  pub fn value_columns(&self) -> impl Iterator<Item = &ColumnDefinition> {
    self.columns.iter().filter(|c| !c.is_key)
  }
}

/// Converts entity descriptors into schema definitions.
#[derive(Debug, Clone, Default)]
pub struct SchemaAdapter {
  decimals: DecimalPrecisionConfig,
  topics: TopicSettingsResolver,
  namespace: Option<String>,
}

impl SchemaAdapter {
  /// Adapter over the compiler options.
  pub fn new(options: &CompilerOptions) -> Self {
    Self {
      decimals: options.decimal_config(),
      topics: options.topic_resolver(),
      namespace: options.namespace().map(str::to_string),
    }
  }

  /// Decimal defaults in use.
  pub fn decimals(&self) -> &DecimalPrecisionConfig {
    &self.decimals
  }

  /// Full definition for an entity.
  pub fn adapt(&self, entity: &EntityDescriptor) -> Result<SchemaDefinition> {
    let topic = entity.topic.trim();
    if topic.is_empty() {
      return Err(CompileError::semantic(
        ClauseKind::Ddl,
        format!("Entity '{}' has no topic", entity.type_name),
      ));
    }
    let object_name = naming::object_name(topic);
    let sink = self.topics.resolve(topic);
    Ok(SchemaDefinition {
      value_schema_full_name: self.namespace.as_ref().map(|ns| format!("{}.{}_valueAvro", ns, object_name)),
      object_name,
      kind: entity.object_kind(),
      columns: self.columns(entity)?,
      topic: topic.to_string(),
      partitions: sink.partitions,
      replicas: sink.replicas,
      timestamp_column: entity.timestamp_column().map(|c| naming::quote_if_reserved(&c.name)),
      key_schema_full_name: None,
    })
  }

  /// Columns of an entity: keys in key order, then values.
  pub fn columns(&self, entity: &EntityDescriptor) -> Result<Vec<ColumnDefinition>> {
    entity
      .key_columns()
      .into_iter()
      .map(|c| self.column(entity, c, true))
      .chain(entity.value_columns().into_iter().map(|c| self.column(entity, c, false)))
      .collect()
  }

  fn column(&self, entity: &EntityDescriptor, column: &ColumnDescriptor, is_key: bool) -> Result<ColumnDefinition> {
    let precision = self
      .decimals
      .resolve_precision(column.precision, &entity.type_name, &column.name);
    let scale = self.decimals.resolve_scale(column.scale, &entity.type_name, &column.name);
    Ok(ColumnDefinition {
      name: naming::quote_if_reserved(&column.name),
      sql_type: sql_type(&column.ty, precision, scale)?,
      is_key,
    })
  }
}

/// Dialect column type for a value type.
pub fn sql_type(ty: &ValueType, precision: u32, scale: u32) -> Result<String> {
  Ok(match ty.underlying() {
    ValueType::Int | ValueType::Short => "INT".to_string(),
    ValueType::Long => "BIGINT".to_string(),
    ValueType::Float | ValueType::Double => "DOUBLE".to_string(),
    ValueType::Decimal => format!("DECIMAL({}, {})", precision, scale),
    ValueType::String | ValueType::Char | ValueType::Guid => "VARCHAR".to_string(),
    ValueType::Bool => "BOOLEAN".to_string(),
    ValueType::DateTime | ValueType::DateTimeOffset => "TIMESTAMP".to_string(),
    ValueType::Bytes => "BYTES".to_string(),
    ValueType::Map(key, value) => {
      if !key.is_string() {
        return Err(CompileError::semantic(ClauseKind::Ddl, "ksqlDB MAP key must be STRING."));
      }
      if !value.is_string() {
        return Err(CompileError::not_supported(
          ClauseKind::Ddl,
          format!("MAP value type '{}'", value),
        ));
      }
      "MAP<STRING, STRING>".to_string()
    }
    ValueType::List(inner) => format!("ARRAY<{}>", sql_type(inner, precision, scale)?),
    other => {
      return Err(CompileError::not_supported(ClauseKind::Ddl, format!("Column type '{}'", other)));
    }
  })
}

/// `name TYPE [KEY|PRIMARY KEY]` list joined with `, `.
pub fn column_list(columns: &[ColumnDefinition], kind: ObjectKind) -> String {
  let key_count = columns.iter().filter(|c| c.is_key).count();
  columns
    .iter()
    .map(|c| match (c.is_key, kind, key_count) {
      (true, ObjectKind::Table, 1) => format!("{} {} PRIMARY KEY", c.name, c.sql_type),
      (true, ..) => format!("{} {} KEY", c.name, c.sql_type),
      (false, ..) => format!("{} {}", c.name, c.sql_type),
    })
    .collect::<Vec<_>>()
    .join(", ")
}

/// Renders the CREATE STREAM/TABLE statement for a definition.
pub fn create_statement(schema: &SchemaDefinition) -> Result<String> {
  if schema.columns.is_empty() {
    return Err(CompileError::semantic(
      ClauseKind::Ddl,
      format!("Object '{}' has no columns", schema.object_name),
    ));
  }
  let mut with = vec![
    format!("KAFKA_TOPIC='{}'", schema.topic),
    "VALUE_FORMAT='AVRO'".to_string(),
    format!("PARTITIONS={}", schema.partitions),
    format!("REPLICAS={}", schema.replicas),
  ];
  if let Some(ts) = &schema.timestamp_column {
    with.push(format!("TIMESTAMP='{}'", ts));
  }
  if let Some(name) = &schema.value_schema_full_name {
    with.push(format!("VALUE_AVRO_SCHEMA_FULL_NAME='{}'", name));
  }
  let statement = format!(
    "CREATE {} IF NOT EXISTS {} ({}) WITH ({});",
    schema.kind,
    schema.object_name,
    column_list(&schema.columns, schema.kind),
    with.join(", ")
  );
  tracing::debug!(object = %schema.object_name, "generated DDL");
  Ok(statement)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{DecimalOverride, TopicSettings};

  fn orders() -> EntityDescriptor {
    EntityDescriptor::new("Order", "orders")
      .with_column(ColumnDescriptor::new("Id", ValueType::Int).key(0))
      .with_column(ColumnDescriptor::new("Name", ValueType::String))
  }

  fn adapter() -> SchemaAdapter {
    SchemaAdapter::new(&CompilerOptions::default())
  }

  #[test]
  fn test_plain_stream_statement() {
    let schema = adapter().adapt(&orders()).unwrap();
    assert_eq!(
      create_statement(&schema).unwrap(),
      "CREATE STREAM IF NOT EXISTS orders (Id INT KEY, Name VARCHAR) WITH (KAFKA_TOPIC='orders', VALUE_FORMAT='AVRO', PARTITIONS=1, REPLICAS=1);"
    );
  }

  #[test]
  fn test_table_primary_key_only_for_single_key() {
    let single = adapter().adapt(&orders().with_kind(ObjectKind::Table)).unwrap();
    assert!(create_statement(&single).unwrap().contains("(Id INT PRIMARY KEY, Name VARCHAR)"));

    let composite = EntityDescriptor::new("Bar", "bars")
      .with_kind(ObjectKind::Table)
      .with_column(ColumnDescriptor::new("Broker", ValueType::String).key(0))
      .with_column(ColumnDescriptor::new("Symbol", ValueType::String).key(1))
      .with_column(ColumnDescriptor::new("Close", ValueType::Double));
    let schema = adapter().adapt(&composite).unwrap();
    assert!(create_statement(&schema)
      .unwrap()
      .contains("(Broker VARCHAR KEY, Symbol VARCHAR KEY, Close DOUBLE)"));
  }

  #[test]
  fn test_reserved_columns_are_quoted() {
    let entity = EntityDescriptor::new("Msg", "messages")
      .with_column(ColumnDescriptor::new("Topic", ValueType::String).key(0))
      .with_column(ColumnDescriptor::new("Partition", ValueType::Int).key(1))
      .with_column(ColumnDescriptor::new("Offset", ValueType::Long).key(2))
      .with_column(ColumnDescriptor::new("Payload", ValueType::String));
    let sql = create_statement(&adapter().adapt(&entity).unwrap()).unwrap();
    assert!(sql.contains("`Topic` VARCHAR KEY, `Partition` INT KEY, `Offset` BIGINT KEY, Payload VARCHAR"));
  }

  #[test]
  fn test_decimal_resolution_and_timestamp() {
    let options = CompilerOptions {
      decimals: [("Quote.Ask".to_string(), DecimalOverride::new(20, 6))].into_iter().collect(),
      ..CompilerOptions::default()
    }
    .with_schema_namespace("acme")
    .with_topic("quotes", TopicSettings { partitions: Some(6), replicas: Some(3), retention_ms: None });
    let entity = EntityDescriptor::new("Quote", "quotes")
      .with_column(ColumnDescriptor::new("Bid", ValueType::Decimal).decimal(18, 4))
      .with_column(ColumnDescriptor::new("Ask", ValueType::Decimal).decimal(18, 4))
      .with_column(ColumnDescriptor::new("Mid", ValueType::Decimal))
      .with_column(ColumnDescriptor::new("Debug", ValueType::String).ignored())
      .with_column(ColumnDescriptor::new("Ts", ValueType::DateTime).timestamp());
    let sql = create_statement(&SchemaAdapter::new(&options).adapt(&entity).unwrap()).unwrap();
    assert_eq!(
      sql,
      "CREATE STREAM IF NOT EXISTS quotes (Bid DECIMAL(18, 4), Ask DECIMAL(20, 6), Mid DECIMAL(18, 2), Ts TIMESTAMP) \
       WITH (KAFKA_TOPIC='quotes', VALUE_FORMAT='AVRO', PARTITIONS=6, REPLICAS=3, TIMESTAMP='Ts', VALUE_AVRO_SCHEMA_FULL_NAME='acme.quotes_valueAvro');"
    );
  }

  #[test]
  fn test_type_mapping() {
    let map = ValueType::Map(Box::new(ValueType::String), Box::new(ValueType::String));
    assert_eq!(sql_type(&map, 18, 2).unwrap(), "MAP<STRING, STRING>");
    let bad = ValueType::Map(Box::new(ValueType::Int), Box::new(ValueType::String));
    assert_eq!(sql_type(&bad, 18, 2).unwrap_err().to_string(), "DDL: ksqlDB MAP key must be STRING.");
    assert_eq!(sql_type(&ValueType::Long.nullable(), 18, 2).unwrap(), "BIGINT");
    assert_eq!(sql_type(&ValueType::Guid, 18, 2).unwrap(), "VARCHAR");
    assert!(sql_type(&ValueType::record("Nested"), 18, 2).is_err());
  }

  #[test]
  fn test_topic_names_become_object_names() {
    let entity = EntityDescriptor::new("Rate", "fx-rates")
      .with_column(ColumnDescriptor::new("Pair", ValueType::String).key(0));
    assert_eq!(adapter().adapt(&entity).unwrap().object_name, "fx_rates");
  }
}
