//! `WITH (...)` property lists for CREATE statements.
//!
//! Parts render in a fixed order: `KAFKA_TOPIC`, `CLEANUP_POLICY`,
//! `KEY_FORMAT`, `VALUE_FORMAT`, `VALUE_AVRO_SCHEMA_FULL_NAME`, `TIMESTAMP`,
//! `PARTITIONS`, `REPLICAS`, `RETENTION_MS`. Everything except the topic and
//! the value format is optional.

use serde::{Deserialize, Serialize};

use crate::entity::ObjectKind;
use crate::error::{ClauseKind, CompileError, Result};

/// Whether `RETENTION_MS` is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RetentionPolicy {
  /// Emit when configured, except for non-windowed tables
  #[default]
  Auto,
  /// Emit, failing when no value is configured
  Require,
  /// Never emit
  Disallow,
}

/// Inputs of one `WITH (...)` clause.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithOptions {
  /// Backing topic
  pub topic: String,
  /// Output object kind
  pub kind: ObjectKind,
  /// The object is produced by a windowed aggregation
  pub windowed: bool,
  /// Emit `KEY_FORMAT='AVRO'`
  pub key_format: bool,
  /// `CLEANUP_POLICY` value, e.g. `compact`
  pub cleanup_policy: Option<String>,
  /// `VALUE_AVRO_SCHEMA_FULL_NAME` value
  pub value_schema_full_name: Option<String>,
  /// `TIMESTAMP` column
  pub timestamp: Option<String>,
  /// Partition count
  pub partitions: Option<u32>,
  /// Replication factor
  pub replicas: Option<u32>,
  /// Retention in milliseconds
  pub retention_ms: Option<i64>,
  /// Retention emission policy
  pub retention: RetentionPolicy,
}

impl WithOptions {
  /// Options for a topic with nothing optional set.
  pub fn new(topic: impl Into<String>, kind: ObjectKind) -> Self {
    Self {
      topic: topic.into(),
      kind,
      ..Self::default()
    }
  }

  /// Marks the object windowed.
  pub fn windowed(mut self, windowed: bool) -> Self {
    self.windowed = windowed;
    self
  }

  /// Enables `KEY_FORMAT`.
  pub fn with_key_format(mut self, enabled: bool) -> Self {
    self.key_format = enabled;
    self
  }

  /// Sets the cleanup policy.
  pub fn with_cleanup_policy(mut self, policy: Option<String>) -> Self {
    self.cleanup_policy = policy;
    self
  }

  /// Sets the value schema full name.
  pub fn with_value_schema(mut self, name: Option<String>) -> Self {
    self.value_schema_full_name = name;
    self
  }

  /// Sets the event-time column.
  pub fn with_timestamp(mut self, column: Option<String>) -> Self {
    self.timestamp = column;
    self
  }

  /// Sets partitions and replicas.
  pub fn with_sizing(mut self, partitions: u32, replicas: u32) -> Self {
    self.partitions = Some(partitions);
    self.replicas = Some(replicas);
    self
  }

  /// Sets the retention and its policy.
  pub fn with_retention(mut self, retention_ms: Option<i64>, policy: RetentionPolicy) -> Self {
    self.retention_ms = retention_ms;
    self.retention = policy;
    self
  }

  /// Renders `WITH (...)`.
  pub fn build(&self) -> Result<String> {
    if self.topic.trim().is_empty() {
      return Err(CompileError::semantic(ClauseKind::With, "KAFKA_TOPIC must not be empty"));
    }
    let mut parts = vec![format!("KAFKA_TOPIC='{}'", quoted(self.topic.trim()))];
    if let Some(policy) = non_blank(&self.cleanup_policy) {
      parts.push(format!("CLEANUP_POLICY='{}'", quoted(policy)));
    }
    if self.key_format {
      parts.push("KEY_FORMAT='AVRO'".to_string());
    }
    parts.push("VALUE_FORMAT='AVRO'".to_string());
    if let Some(name) = non_blank(&self.value_schema_full_name) {
      parts.push(format!("VALUE_AVRO_SCHEMA_FULL_NAME='{}'", quoted(name)));
    }
    if let Some(column) = non_blank(&self.timestamp) {
      parts.push(format!("TIMESTAMP='{}'", quoted(column)));
    }
    if let Some(p) = self.partitions {
      parts.push(format!("PARTITIONS={}", p));
    }
    if let Some(r) = self.replicas {
      parts.push(format!("REPLICAS={}", r));
    }
    if let Some(ms) = self.resolved_retention()? {
      parts.push(format!("RETENTION_MS={}", ms));
    }
    Ok(format!("WITH ({})", parts.join(", ")))
  }

  fn resolved_retention(&self) -> Result<Option<i64>> {
    match self.retention {
      RetentionPolicy::Disallow => Ok(None),
      RetentionPolicy::Require => match self.retention_ms {
        Some(ms) if ms > 0 => Ok(Some(ms)),
        _ => Err(CompileError::semantic(
          ClauseKind::With,
          "RETENTION_MS is required but no value was provided.",
        )),
      },
      RetentionPolicy::Auto => {
        if self.kind == ObjectKind::Table && !self.windowed {
          return Ok(None);
        }
        Ok(self.retention_ms.filter(|ms| *ms > 0))
      }
    }
  }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
  value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Body of a single-quoted property literal; embedded quotes are doubled.
fn quoted(value: &str) -> String {
  value.replace('\'', "''")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_clause() {
    let with = WithOptions::new("orders", ObjectKind::Stream).build().unwrap();
    assert_eq!(with, "WITH (KAFKA_TOPIC='orders', VALUE_FORMAT='AVRO')");
  }

  #[test]
  fn test_full_part_order() {
    let with = WithOptions::new("bars_1m", ObjectKind::Table)
      .windowed(true)
      .with_key_format(true)
      .with_cleanup_policy(Some("compact".to_string()))
      .with_value_schema(Some("acme.bars_valueAvro".to_string()))
      .with_timestamp(Some("Ts".to_string()))
      .with_sizing(3, 2)
      .with_retention(Some(86_400_000), RetentionPolicy::Auto)
      .build()
      .unwrap();
    assert_eq!(
      with,
      "WITH (KAFKA_TOPIC='bars_1m', CLEANUP_POLICY='compact', KEY_FORMAT='AVRO', VALUE_FORMAT='AVRO', \
       VALUE_AVRO_SCHEMA_FULL_NAME='acme.bars_valueAvro', TIMESTAMP='Ts', PARTITIONS=3, REPLICAS=2, RETENTION_MS=86400000)"
    );
  }

  #[test]
  fn test_auto_skips_retention_for_plain_table() {
    let with = WithOptions::new("totals", ObjectKind::Table)
      .with_retention(Some(1000), RetentionPolicy::Auto)
      .build()
      .unwrap();
    assert!(!with.contains("RETENTION_MS"));
    let stream = WithOptions::new("events", ObjectKind::Stream)
      .with_retention(Some(1000), RetentionPolicy::Auto)
      .build()
      .unwrap();
    assert!(stream.ends_with("RETENTION_MS=1000)"));
  }

  #[test]
  fn test_require_and_disallow() {
    let err = WithOptions::new("t", ObjectKind::Stream)
      .with_retention(None, RetentionPolicy::Require)
      .build()
      .unwrap_err();
    assert!(err.to_string().contains("RETENTION_MS is required but no value was provided."));
    let with = WithOptions::new("t", ObjectKind::Stream)
      .with_retention(Some(5), RetentionPolicy::Disallow)
      .build()
      .unwrap();
    assert!(!with.contains("RETENTION_MS"));
  }

  #[test]
  fn test_quotes_in_values_are_doubled() {
    let with = WithOptions::new("o'brien_orders", ObjectKind::Stream)
      .with_value_schema(Some("acme.it's_valueAvro".to_string()))
      .with_timestamp(Some("Ts'".to_string()))
      .build()
      .unwrap();
    assert_eq!(
      with,
      "WITH (KAFKA_TOPIC='o''brien_orders', VALUE_FORMAT='AVRO', \
       VALUE_AVRO_SCHEMA_FULL_NAME='acme.it''s_valueAvro', TIMESTAMP='Ts''')"
    );
  }

  #[test]
  fn test_blank_topic_rejected() {
    assert!(WithOptions::new("  ", ObjectKind::Stream).build().is_err());
  }
}
