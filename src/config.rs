//! # Compiler Configuration
//!
//! Decimal defaults, per-topic sink settings and the options bundle handed to
//! the planners.
//!
//! ## Overview
//!
//! - [`DecimalPrecisionConfig`]: global precision/scale plus per-property
//!   overrides keyed by `Entity.Property`
//! - [`TopicSettings`] / [`TopicSettingsResolver`]: partitions, replicas and
//!   retention per topic, with the `<base>_<tf>` to `<base>_<tf>_live` cascade
//! - [`CompilerOptions`]: everything above, loadable from JSON
//!
//! ## Example
//!
//! ```rust
//! use ksqlweave::config::CompilerOptions;
//!
//! let options = CompilerOptions::from_json(r#"{
//!   "decimalPrecision": 20,
//!   "decimals": { "Trade.Price": { "precision": 28, "scale": 8 } },
//!   "topics": { "bar_1m": { "retentionMs": 3600000 } }
//! }"#).unwrap();
//!
//! let decimals = options.decimal_config();
//! assert_eq!(decimals.resolve_precision(None, "Trade", "Price"), 28);
//! assert_eq!(decimals.resolve_precision(None, "Trade", "Qty"), 20);
//!
//! let sink = options.topic_resolver().resolve("bar_1m_live");
//! assert_eq!(sink.retention_ms, Some(3_600_000));
//! assert_eq!(sink.partitions, 1);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{CompileError, Result};

/// Default decimal precision when neither an override nor an annotation exists.
pub const DEFAULT_DECIMAL_PRECISION: u32 = 18;

/// Default decimal scale when neither an override nor an annotation exists.
pub const DEFAULT_DECIMAL_SCALE: u32 = 2;

/// Default stream-stream join window in seconds.
pub const DEFAULT_WITHIN_SECONDS: u64 = 300;

/// Largest precision the dialect accepts for `DECIMAL(p, s)`.
pub const MAX_DECIMAL_PRECISION: u32 = 38;

/// Per-property decimal override. Either half may be omitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DecimalOverride {
  /// Overriding precision
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub precision: Option<u32>,
  /// Overriding scale
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub scale: Option<u32>,
}

impl DecimalOverride {
  /// Override carrying both precision and scale.
  pub fn new(precision: u32, scale: u32) -> Self {
    Self {
      precision: Some(precision),
      scale: Some(scale),
    }
  }
}

/// Global and per-property decimal precision/scale.
///
/// Resolution order for one property: override, then the explicit column
/// annotation, then the global default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecimalPrecisionConfig {
  /// Global precision
  pub precision: u32,
  /// Global scale
  pub scale: u32,
  /// Overrides keyed by `Entity.Property`
  #[serde(default)]
  pub overrides: BTreeMap<String, DecimalOverride>,
}

impl Default for DecimalPrecisionConfig {
  fn default() -> Self {
    Self {
      precision: DEFAULT_DECIMAL_PRECISION,
      scale: DEFAULT_DECIMAL_SCALE,
      overrides: BTreeMap::new(),
    }
  }
}

impl DecimalPrecisionConfig {
  /// Creates a config with the given global precision and scale.
  pub fn new(precision: u32, scale: u32) -> Self {
    Self {
      precision,
      scale,
      ..Default::default()
    }
  }

  /// Adds a per-property override.
  pub fn with_override(
    mut self,
    entity: &str,
    property: &str,
    value: DecimalOverride,
  ) -> Self {
    self.overrides.insert(override_key(entity, property), value);
    self
  }

  /// Effective precision for `entity.property`.
  pub fn resolve_precision(&self, explicit: Option<u32>, entity: &str, property: &str) -> u32 {
    self
      .lookup(entity, property)
      .and_then(|o| o.precision)
      .or(explicit)
      .unwrap_or(self.precision)
  }

  /// Effective scale for `entity.property`.
  pub fn resolve_scale(&self, explicit: Option<u32>, entity: &str, property: &str) -> u32 {
    self
      .lookup(entity, property)
      .and_then(|o| o.scale)
      .or(explicit)
      .unwrap_or(self.scale)
  }

  /// Validates precision bounds and that scale never exceeds precision.
  pub fn validate(&self) -> Result<()> {
    check_decimal("decimalPrecision", self.precision, self.scale)?;
    for (key, o) in &self.overrides {
      let precision = o.precision.unwrap_or(self.precision);
      let scale = o.scale.unwrap_or(self.scale);
      check_decimal(key, precision, scale)?;
    }
    Ok(())
  }

  fn lookup(&self, entity: &str, property: &str) -> Option<&DecimalOverride> {
    let key = override_key(entity, property);
    self.overrides.get(&key).or_else(|| {
      self
        .overrides
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(&key))
        .map(|(_, v)| v)
    })
  }
}

fn override_key(entity: &str, property: &str) -> String {
  format!("{}.{}", entity, property)
}

fn check_decimal(name: &str, precision: u32, scale: u32) -> Result<()> {
  if precision == 0 || precision > MAX_DECIMAL_PRECISION {
    return Err(CompileError::Config(format!(
      "{}: precision ({}) must be between 1 and {}",
      name, precision, MAX_DECIMAL_PRECISION
    )));
  }
  if scale > precision {
    return Err(CompileError::Config(format!(
      "{}: scale ({}) must be <= precision ({})",
      name, scale, precision
    )));
  }
  Ok(())
}

/// Sink settings for one topic as configured. Unset fields inherit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSettings {
  /// Partition count
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub partitions: Option<u32>,
  /// Replication factor
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub replicas: Option<u32>,
  /// Retention in milliseconds
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retention_ms: Option<i64>,
}

impl TopicSettings {
  /// Settings with only a retention value.
  pub fn retention(retention_ms: i64) -> Self {
    Self {
      retention_ms: Some(retention_ms),
      ..Default::default()
    }
  }

  /// Fills unset fields from `base`.
  pub fn inherit(self, base: &TopicSettings) -> Self {
    Self {
      partitions: self.partitions.or(base.partitions),
      replicas: self.replicas.or(base.replicas),
      retention_ms: self.retention_ms.or(base.retention_ms),
    }
  }
}

/// Fully resolved sink settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkSettings {
  /// Partition count, at least 1
  pub partitions: u32,
  /// Replication factor, at least 1
  pub replicas: u32,
  /// Retention in milliseconds, when configured
  pub retention_ms: Option<i64>,
}

impl Default for SinkSettings {
  fn default() -> Self {
    Self {
      partitions: 1,
      replicas: 1,
      retention_ms: None,
    }
  }
}

/// Resolves per-topic settings, cascading from `<base>_<tf>` onto
/// `<base>_<tf>_live`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TopicSettingsResolver {
  topics: BTreeMap<String, TopicSettings>,
}

impl TopicSettingsResolver {
  /// Creates a resolver over the given topic map.
  pub fn new(topics: BTreeMap<String, TopicSettings>) -> Self {
    Self { topics }
  }

  /// Registers settings for one topic.
  pub fn with_topic(mut self, topic: impl Into<String>, settings: TopicSettings) -> Self {
    self.topics.insert(topic.into(), settings);
    self
  }

  /// Settings configured for exactly this topic, with the live cascade applied.
  pub fn configured(&self, topic: &str) -> TopicSettings {
    let own = self.topics.get(topic).copied().unwrap_or_default();
    match topic.strip_suffix("_live") {
      Some(base) => match self.topics.get(base) {
        Some(inherited) => own.inherit(inherited),
        None => own,
      },
      None => own,
    }
  }

  /// Resolved settings; partitions and replicas default to 1.
  pub fn resolve(&self, topic: &str) -> SinkSettings {
    let configured = self.configured(topic);
    SinkSettings {
      partitions: configured.partitions.filter(|p| *p > 0).unwrap_or(1),
      replicas: configured.replicas.filter(|r| *r > 0).unwrap_or(1),
      retention_ms: configured.retention_ms.filter(|r| *r > 0),
    }
  }

  /// True when no topic is configured.
  pub fn is_empty(&self) -> bool {
    self.topics.is_empty()
  }
}

/// Options bundle consumed by the planners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompilerOptions {
  /// Global decimal precision
  pub decimal_precision: u32,
  /// Global decimal scale
  pub decimal_scale: u32,
  /// Per-property decimal overrides keyed by `Entity.Property`
  pub decimals: BTreeMap<String, DecimalOverride>,
  /// Per-topic sink settings
  pub topics: BTreeMap<String, TopicSettings>,
  /// Namespace used to derive value-schema full names
  #[serde(skip_serializing_if = "Option::is_none")]
  pub schema_namespace: Option<String>,
  /// Stream-stream join window applied when the model sets none
  pub default_within_seconds: u64,
}

impl Default for CompilerOptions {
  fn default() -> Self {
    Self {
      decimal_precision: DEFAULT_DECIMAL_PRECISION,
      decimal_scale: DEFAULT_DECIMAL_SCALE,
      decimals: BTreeMap::new(),
      topics: BTreeMap::new(),
      schema_namespace: None,
      default_within_seconds: DEFAULT_WITHIN_SECONDS,
    }
  }
}

impl CompilerOptions {
  /// Default options.
  pub fn new() -> Self {
    Self::default()
  }

  /// Parses and validates options from JSON.
  pub fn from_json(json: &str) -> Result<Self> {
    let options: CompilerOptions = serde_json::from_str(json)?;
    options.validate()?;
    Ok(options)
  }

  /// Serializes the options back to JSON.
  pub fn to_json(&self) -> Result<String> {
    Ok(serde_json::to_string_pretty(self)?)
  }

  /// Sets the schema namespace.
  pub fn with_schema_namespace(mut self, namespace: impl Into<String>) -> Self {
    self.schema_namespace = Some(namespace.into());
    self
  }

  /// Registers settings for one topic.
  pub fn with_topic(mut self, topic: impl Into<String>, settings: TopicSettings) -> Self {
    self.topics.insert(topic.into(), settings);
    self
  }

  /// Validates decimal bounds, the join window and topic sizing.
  pub fn validate(&self) -> Result<()> {
    self.decimal_config().validate()?;
    if self.default_within_seconds == 0 {
      return Err(CompileError::Config(
        "defaultWithinSeconds must be > 0".to_string(),
      ));
    }
    for (topic, settings) in &self.topics {
      if settings.partitions == Some(0) || settings.replicas == Some(0) {
        return Err(CompileError::Config(format!(
          "topics.{}: partitions and replicas must be > 0 when set",
          topic
        )));
      }
    }
    Ok(())
  }

  /// Decimal configuration view.
  pub fn decimal_config(&self) -> DecimalPrecisionConfig {
    DecimalPrecisionConfig {
      precision: self.decimal_precision,
      scale: self.decimal_scale,
      overrides: self.decimals.clone(),
    }
  }

  /// Topic settings view.
  pub fn topic_resolver(&self) -> TopicSettingsResolver {
    TopicSettingsResolver::new(self.topics.clone())
  }

  /// Non-blank schema namespace, if configured.
  pub fn namespace(&self) -> Option<&str> {
    self
      .schema_namespace
      .as_deref()
      .map(str::trim)
      .filter(|ns| !ns.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_decimal_resolution_order() {
    let cfg = DecimalPrecisionConfig::default().with_override("Trade", "Price", DecimalOverride::new(28, 8));
    assert_eq!(cfg.resolve_precision(Some(10), "Trade", "Price"), 28);
    assert_eq!(cfg.resolve_scale(Some(1), "Trade", "Price"), 8);
    assert_eq!(cfg.resolve_precision(Some(10), "Trade", "Qty"), 10);
    assert_eq!(cfg.resolve_precision(None, "Trade", "Qty"), 18);
    assert_eq!(cfg.resolve_scale(None, "Trade", "Qty"), 2);
  }

  #[test]
  fn test_partial_override_falls_through() {
    let half = DecimalOverride {
      precision: Some(24),
      scale: None,
    };
    let cfg = DecimalPrecisionConfig::new(18, 4).with_override("Trade", "Price", half);
    assert_eq!(cfg.resolve_precision(None, "Trade", "Price"), 24);
    assert_eq!(cfg.resolve_scale(Some(6), "Trade", "Price"), 6);
    assert_eq!(cfg.resolve_scale(None, "trade", "price"), 4);
  }

  #[test]
  fn test_decimal_validation() {
    assert!(DecimalPrecisionConfig::default().validate().is_ok());
    assert!(DecimalPrecisionConfig::new(0, 0).validate().is_err());
    assert!(DecimalPrecisionConfig::new(10, 12).validate().is_err());
    let bad = DecimalPrecisionConfig::default().with_override("A", "B", DecimalOverride::new(40, 2));
    assert!(bad.validate().is_err());
  }

  #[test]
  fn test_live_topic_inherits_from_base() {
    let resolver = TopicSettingsResolver::default()
      .with_topic("bar_5m", TopicSettings { partitions: Some(3), replicas: None, retention_ms: Some(1000) })
      .with_topic("bar_5m_live", TopicSettings { partitions: None, replicas: Some(2), retention_ms: None });
    let live = resolver.resolve("bar_5m_live");
    assert_eq!(live.partitions, 3);
    assert_eq!(live.replicas, 2);
    assert_eq!(live.retention_ms, Some(1000));
  }

  #[test]
  fn test_explicit_live_value_wins() {
    let resolver = TopicSettingsResolver::default()
      .with_topic("bar_1h", TopicSettings::retention(1000))
      .with_topic("bar_1h_live", TopicSettings::retention(5000));
    assert_eq!(resolver.resolve("bar_1h_live").retention_ms, Some(5000));
  }

  #[test]
  fn test_unknown_topic_defaults() {
    let sink = TopicSettingsResolver::default().resolve("missing");
    assert_eq!(sink, SinkSettings::default());
  }

  #[test]
  fn test_options_from_json() {
    let json = r#"{
      "decimalPrecision": 20,
      "decimalScale": 4,
      "schemaNamespace": "com.acme",
      "topics": { "bar_1m": { "partitions": 6, "retentionMs": 60000 } }
    }"#;
    let options = CompilerOptions::from_json(json).unwrap();
    assert_eq!(options.decimal_precision, 20);
    assert_eq!(options.default_within_seconds, DEFAULT_WITHIN_SECONDS);
    assert_eq!(options.namespace(), Some("com.acme"));
    assert_eq!(options.topic_resolver().resolve("bar_1m").partitions, 6);
  }

  #[test]
  fn test_options_json_roundtrip() {
    let options = CompilerOptions::new()
      .with_schema_namespace("com.acme")
      .with_topic("bar_1m", TopicSettings::retention(1));
    let back = CompilerOptions::from_json(&options.to_json().unwrap()).unwrap();
    assert_eq!(back, options);
  }

  #[test]
  fn test_options_reject_malformed_input() {
    let err = CompilerOptions::from_json("{ not json").unwrap_err();
    assert!(matches!(err, CompileError::Config(_)));
    let err = CompilerOptions::from_json(r#"{ "defaultWithinSeconds": 0 }"#).unwrap_err();
    assert!(err.to_string().contains("defaultWithinSeconds"));
    let err = CompilerOptions::from_json(r#"{ "topics": { "t": { "replicas": 0 } } }"#).unwrap_err();
    assert!(err.to_string().contains("partitions and replicas"));
  }
}
