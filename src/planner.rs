//! # Statement Planner
//!
//! Assembles clause fragments into complete statements:
//!
//! ```text
//! CREATE TABLE|STREAM IF NOT EXISTS <name> WITH (...) AS
//! SELECT <projection>
//! FROM <left> [o] [JOIN <right> i [WITHIN n SECONDS] ON (...)]
//! [WINDOW TUMBLING|HOPPING (...)]
//! [WHERE ...]
//! [GROUP BY ...]
//! [HAVING ...]
//! EMIT CHANGES;
//! ```
//!
//! Clauses are built in a fixed order: JOIN, WHERE, GROUP BY, then SELECT
//! and HAVING, so the keys produced by GROUP BY reach the later builders
//! through the [`CompileContext`].
//!
//! ## Example
//!
//! ```rust
//! use ksqlweave::config::CompilerOptions;
//! use ksqlweave::entity::Catalog;
//! use ksqlweave::expr::{Expr, Lambda, ValueType};
//! use ksqlweave::planner::StatementPlanner;
//! use ksqlweave::stage::QueryBuilder;
//!
//! let o = Expr::param("o", ValueType::record("Order"));
//! let model = QueryBuilder::from("Order")
//!   .filter(Lambda::single("o", ValueType::record("Order"), o.member("Qty", ValueType::Int).gt(Expr::int(0))))
//!   .unwrap()
//!   .select(Lambda::single("o", ValueType::record("Order"), Expr::param("o", ValueType::record("Order"))))
//!   .unwrap()
//!   .build()
//!   .unwrap();
//! let catalog = Catalog::new();
//! let options = CompilerOptions::default();
//! let sql = StatementPlanner::new(&catalog, &options).create_as_select(&model, "big_orders").unwrap();
//! assert!(sql.starts_with("CREATE STREAM IF NOT EXISTS big_orders WITH (KAFKA_TOPIC='big_orders'"));
//! assert!(sql.contains("\nWHERE (Qty > 0)\n"));
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::clauses::group_by::GroupByBuilder;
use crate::clauses::having::HavingBuilder;
use crate::clauses::join::join_operator;
use crate::clauses::select::SelectBuilder;
use crate::clauses::where_clause::WhereBuilder;
use crate::clauses::{ClauseBuilder, CompileContext};
use crate::config::CompilerOptions;
use crate::ddl::{self, SchemaAdapter};
use crate::entity::{Catalog, EntityDescriptor, ObjectKind};
use crate::error::{ClauseKind, CompileError, Result};
use crate::expr::{Expr, Lambda};
use crate::model::{keys, BasedOnSpec, HoppingSpec, QueryModel};
use crate::naming;
use crate::timeframe::Timeframe;
use crate::validator;
use crate::with_clause::{RetentionPolicy, WithOptions};

/// Alias of the primary (left) source.
pub const PRIMARY_ALIAS: &str = "o";
/// Alias of the joined (right) source.
pub const JOINED_ALIAS: &str = "i";
/// Alias of the schedule source of a time-frame join.
pub const SCHEDULE_ALIAS: &str = "s";

/// Window applied to one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowSpec {
  /// Tumbling window of one timeframe
  Tumbling {
    /// Window size
    timeframe: Timeframe,
    /// Grace period
    grace_seconds: Option<u64>,
  },
  /// Hopping window
  Hopping(HoppingSpec),
}

impl WindowSpec {
  /// Dialect `WINDOW ...` clause.
  pub fn clause(&self) -> String {
    match self {
      WindowSpec::Tumbling {
        timeframe,
        grace_seconds,
      } => {
        let (size, unit) = timeframe.window_size();
        match grace_seconds {
          Some(g) => format!("WINDOW TUMBLING (SIZE {} {}, GRACE PERIOD {} SECONDS)", size, unit, g),
          None => format!("WINDOW TUMBLING (SIZE {} {})", size, unit),
        }
      }
      WindowSpec::Hopping(spec) => {
        let mut clause = format!(
          "WINDOW HOPPING (SIZE {}, ADVANCE BY {}",
          duration_clause(spec.size),
          duration_clause(spec.advance)
        );
        if let Some(grace) = spec.grace {
          clause.push_str(&format!(", GRACE PERIOD {}", duration_clause(grace)));
        }
        clause.push(')');
        clause
      }
    }
  }
}

/// `n UNIT` using the largest of DAYS, HOURS, MINUTES, SECONDS that divides
/// the duration exactly. Sub-second remainders round up.
pub fn duration_clause(duration: Duration) -> String {
  let mut seconds = duration.as_secs();
  if duration.subsec_nanos() > 0 {
    seconds += 1;
  }
  for (unit_seconds, unit) in [(86_400, "DAYS"), (3_600, "HOURS"), (60, "MINUTES")] {
    if seconds >= unit_seconds && seconds % unit_seconds == 0 {
      return format!("{} {}", seconds / unit_seconds, unit);
    }
  }
  format!("{} SECONDS", seconds)
}

/// Output object of one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementTarget {
  /// Object name
  pub object_name: String,
  /// Sink topic
  pub topic: String,
  /// Kind override; otherwise inferred from the model
  pub kind: Option<ObjectKind>,
  /// Window applied to this statement
  pub window: Option<WindowSpec>,
  /// Source that replaces the primary source in FROM
  pub input: Option<String>,
  /// Emit a value-schema full name
  pub value_schema: bool,
  /// Retention used when nothing else configures one
  pub default_retention_ms: Option<i64>,
}

impl StatementTarget {
  /// Target named after its topic.
  pub fn new(topic: impl Into<String>) -> Self {
    let topic = topic.into();
    Self {
      object_name: naming::object_name(&topic),
      topic,
      kind: None,
      window: None,
      input: None,
      value_schema: true,
      default_retention_ms: None,
    }
  }

  /// Sets the window.
  pub fn with_window(mut self, window: WindowSpec) -> Self {
    self.window = Some(window);
    self
  }

  /// Reads from `input` instead of the primary source.
  pub fn with_input(mut self, input: impl Into<String>) -> Self {
    self.input = Some(input.into());
    self
  }

  /// Forces the object kind.
  pub fn with_kind(mut self, kind: ObjectKind) -> Self {
    self.kind = Some(kind);
    self
  }

  /// Omits the value-schema full name.
  pub fn without_value_schema(mut self) -> Self {
    self.value_schema = false;
    self
  }

  /// Sets the fallback retention.
  pub fn with_default_retention(mut self, retention_ms: i64) -> Self {
    self.default_retention_ms = Some(retention_ms);
    self
  }
}

/// Builds CREATE statements from query models and entity descriptors.
#[derive(Debug, Clone, Copy)]
pub struct StatementPlanner<'a> {
  catalog: &'a Catalog,
  options: &'a CompilerOptions,
}

impl<'a> StatementPlanner<'a> {
  /// Planner over a catalog and options.
  pub fn new(catalog: &'a Catalog, options: &'a CompilerOptions) -> Self {
    Self { catalog, options }
  }

  /// Catalog in use.
  pub fn catalog(&self) -> &'a Catalog {
    self.catalog
  }

  /// Options in use.
  pub fn options(&self) -> &'a CompilerOptions {
    self.options
  }

  /// `CREATE STREAM|TABLE` for an entity.
  pub fn entity_ddl(&self, entity: &EntityDescriptor) -> Result<String> {
    ddl::create_statement(&SchemaAdapter::new(self.options).adapt(entity)?)
  }

  /// CTAS/CSAS for a model, inferring the window from the model.
  ///
  /// A model registering several tumbling windows has to go through
  /// [`crate::derivation::DerivationPlanner`], which plans one statement per
  /// timeframe.
  pub fn create_as_select(&self, model: &QueryModel, topic: &str) -> Result<String> {
    let mut target = StatementTarget::new(topic);
    if let Some(spec) = model.hopping {
      target = target.with_window(WindowSpec::Hopping(spec));
    } else {
      match model.windows.as_slice() {
        [] => {}
        [tf] => {
          let timeframe: Timeframe = tf.parse()?;
          target = target.with_window(WindowSpec::Tumbling {
            timeframe,
            grace_seconds: Some(model.grace_seconds_for(&timeframe.to_string())),
          });
        }
        _ => {
          return Err(CompileError::semantic(
            ClauseKind::Window,
            "Several tumbling windows are registered; plan one statement per timeframe",
          ));
        }
      }
    }
    self.plan(model, &target)
  }

  /// CTAS/CSAS for a model and an explicit target.
  pub fn plan(&self, model: &QueryModel, target: &StatementTarget) -> Result<String> {
    let Some(left) = model.source_types.first() else {
      return Err(CompileError::semantic(ClauseKind::Model, "Source types are required"));
    };
    if model.source_types.len() > 2 {
      return Err(CompileError::semantic(ClauseKind::Join, "Only up to 2 tables are supported in JOIN"));
    }
    if model.has_hopping() {
      if !model.has_group_by() {
        return Err(CompileError::semantic(ClauseKind::Window, "Hopping window requires GroupBy()."));
      }
      validator::validate_hopping(model, self.catalog)?;
    }
    if model.has_join() && model.based_on.is_some() {
      return Err(CompileError::not_supported(ClauseKind::Join, "TimeFrame on a joined query"));
    }

    let aliased = model.primary_source_requires_alias || model.has_join() || model.based_on.is_some();
    let base = CompileContext {
      decimal_precision: self.options.decimal_precision,
      decimal_scale: self.options.decimal_scale,
      ..CompileContext::default()
    };

    let source = target.input.clone().unwrap_or_else(|| self.catalog.source_name(left));
    let mut from = if aliased {
      format!("FROM {} {}", source, PRIMARY_ALIAS)
    } else {
      format!("FROM {}", source)
    };
    let mut filters = Vec::new();
    if model.has_join() {
      from.push(' ');
      from.push_str(&self.join_clause(model, &base)?);
    }
    if let Some(spec) = &model.based_on {
      let (join, boundaries) = self.schedule_join(model, spec, left)?;
      from.push(' ');
      from.push_str(&join);
      filters.extend(boundaries);
    }

    if let Some(condition) = &model.where_condition {
      let ctx = lambda_context(&base, condition, aliased);
      filters.push(WhereBuilder::new().build_lambda(condition, &ctx)?.text);
    }

    let mut grouped = base.clone();
    let group_by = match &model.group_by_expression {
      Some(key_selector) => {
        let ctx = lambda_context(&base, key_selector, aliased);
        let output = GroupByBuilder::new().build_lambda(key_selector, &ctx)?;
        grouped.apply(&output);
        Some(output.text)
      }
      None => None,
    };

    let select = match &model.select_projection {
      Some(projection) => {
        let mut ctx = lambda_context(&grouped, projection, aliased);
        if model.has_hopping() {
          if let Some(bucket) = &model.bucket_column_name {
            ctx = ctx.excluding(bucket.clone());
          }
        }
        SelectBuilder::new().build_lambda(projection, &ctx)?.text
      }
      None => "*".to_string(),
    };

    let having = match &model.having_condition {
      Some(condition) => {
        let ctx = lambda_context(&grouped, condition, aliased);
        Some(HavingBuilder::new().build_lambda(condition, &ctx)?.text)
      }
      None => None,
    };

    let kind = target.kind.unwrap_or_else(|| model.determine_kind());
    let with = self.with_options(model, target, kind)?.build()?;

    let mut lines = vec![
      format!("CREATE {} IF NOT EXISTS {} {} AS", kind, target.object_name, with),
      format!("SELECT {}", select),
      from,
    ];
    if let Some(window) = &target.window {
      lines.push(window.clause());
    }
    if !filters.is_empty() {
      lines.push(format!("WHERE {}", filters.join(" AND ")));
    }
    if let Some(keys) = group_by {
      lines.push(format!("GROUP BY {}", keys));
    }
    if let Some(having) = having {
      lines.push(format!("HAVING {}", having));
    }
    lines.push("EMIT CHANGES;".to_string());

    let statement = lines.join("\n");
    tracing::debug!(object = %target.object_name, kind = %kind, "planned statement");
    Ok(statement)
  }

  fn with_options(&self, model: &QueryModel, target: &StatementTarget, kind: ObjectKind) -> Result<WithOptions> {
    let sink = self.options.topic_resolver().resolve(&target.topic);
    let partitions = positive_u32(model.extras.positive(keys::SINK_PARTITIONS)).unwrap_or(sink.partitions);
    let replicas = positive_u32(model.extras.positive(keys::SINK_REPLICAS)).unwrap_or(sink.replicas);
    let retention = model
      .extras
      .positive(keys::SINK_RETENTION_MS)
      .or(sink.retention_ms)
      .or(target.default_retention_ms);
    let cleanup = model
      .extras
      .str(keys::SINK_CLEANUP_POLICY)
      .or_else(|| model.extras.str(keys::SINK_CLEANUP_POLICY_DOTTED))
      .map(str::to_string);
    let value_schema = if target.value_schema {
      model
        .extras
        .str(keys::VALUE_SCHEMA_FULL_NAME)
        .map(str::to_string)
        .or_else(|| {
          self
            .options
            .namespace()
            .map(|ns| format!("{}.{}_valueAvro", ns, target.object_name))
        })
    } else {
      None
    };
    Ok(
      WithOptions::new(target.topic.clone(), kind)
        .windowed(target.window.is_some())
        .with_key_format(kind == ObjectKind::Table)
        .with_cleanup_policy(cleanup)
        .with_value_schema(value_schema)
        .with_timestamp(model.extras.str(keys::TIMESTAMP_COLUMN).map(str::to_string))
        .with_sizing(partitions, replicas)
        .with_retention(retention, RetentionPolicy::Auto),
    )
  }

  fn join_clause(&self, model: &QueryModel, base: &CompileContext) -> Result<String> {
    let right = &model.source_types[1];
    let condition = model
      .join_condition
      .as_ref()
      .ok_or_else(|| CompileError::semantic(ClauseKind::Join, "Join condition required for two table join"))?;
    if condition.params.len() < 2 {
      return Err(CompileError::semantic(
        ClauseKind::Join,
        "Primary source alias missing for join condition.",
      ));
    }
    if condition
      .body
      .any(&|e| matches!(e, Expr::Member { .. }) && e.root_param().is_none())
    {
      return Err(CompileError::semantic(
        ClauseKind::Join,
        "Unqualified column access in JOIN condition is not allowed.",
      ));
    }
    let mut rejected = None;
    condition.body.walk(&mut |e| {
      if let Expr::Binary { op, .. } = e {
        if !op.is_logical() && rejected.is_none() {
          rejected = join_operator(*op).err();
        }
      }
    });
    if let Some(err) = rejected {
      return Err(err);
    }
    let ctx = lambda_context(base, condition, true);
    let on = parenthesize(WhereBuilder::new().build_lambda(condition, &ctx)?.text);
    let within = self.within_clause(model, &model.source_types[0], right)?;
    Ok(format!(
      "JOIN {} {}{} ON {}",
      self.catalog.source_name(right),
      JOINED_ALIAS,
      within,
      on
    ))
  }

  fn within_clause(&self, model: &QueryModel, left: &str, right: &str) -> Result<String> {
    let stream_stream =
      self.catalog.kind_of(left) == ObjectKind::Stream && self.catalog.kind_of(right) == ObjectKind::Stream;
    if !stream_stream {
      return Ok(String::new());
    }
    let seconds = match model.within_seconds {
      Some(s) => s,
      None if model.forbid_default_within => {
        return Err(CompileError::semantic(
          ClauseKind::Join,
          "Stream-Stream JOIN requires explicit Within(...) when default is disabled.",
        ));
      }
      None => {
        let s = self.options.default_within_seconds;
        tracing::warn!(left, right, seconds = s, "stream-stream join without Within(); applying default window");
        s
      }
    };
    Ok(format!(" WITHIN {} SECONDS", seconds))
  }

  /// `JOIN <schedule> s ON (...)` plus the boundary predicates for WHERE.
  fn schedule_join(&self, model: &QueryModel, spec: &BasedOnSpec, left: &str) -> Result<(String, Vec<String>)> {
    if spec.join_keys.is_empty() {
      return Err(CompileError::semantic(
        ClauseKind::Join,
        "TimeFrame requires at least one key equality between the row and the schedule",
      ));
    }
    let on = spec
      .join_keys
      .iter()
      .map(|k| format!("{}.{} = {}.{}", PRIMARY_ALIAS, k, SCHEDULE_ALIAS, k))
      .collect::<Vec<_>>()
      .join(" AND ");
    let within = self.within_clause(model, left, &spec.schedule_type)?;
    let join = format!(
      "JOIN {} {}{} ON ({})",
      self.catalog.source_name(&spec.schedule_type),
      SCHEDULE_ALIAS,
      within,
      on
    );

    let time = spec.time_column.as_deref().or(model.time_key.as_deref());
    let mut boundaries = Vec::new();
    if spec.open.is_some() || spec.close.is_some() {
      let Some(time) = time else {
        return Err(CompileError::semantic(
          ClauseKind::Where,
          "TimeFrame boundaries require an event-time column",
        ));
      };
      if let Some(open) = &spec.open {
        let op = if spec.open_inclusive { "<=" } else { "<" };
        boundaries.push(format!("({}.{} {} {}.{})", SCHEDULE_ALIAS, open, op, PRIMARY_ALIAS, time));
      }
      if let Some(close) = &spec.close {
        let op = if spec.close_inclusive { "<=" } else { "<" };
        boundaries.push(format!("({}.{} {} {}.{})", PRIMARY_ALIAS, time, op, SCHEDULE_ALIAS, close));
      }
    }
    Ok((join, boundaries))
  }
}

/// Context for one clause lambda: first parameter `o`, second `i`.
fn lambda_context(base: &CompileContext, lambda: &Lambda, aliased: bool) -> CompileContext {
  let mut ctx = base.clone();
  if aliased {
    if let Some(first) = lambda.params.first() {
      ctx = ctx.with_alias(first.name.clone(), PRIMARY_ALIAS);
    }
  }
  if let Some(second) = lambda.params.get(1) {
    ctx = ctx.with_alias(second.name.clone(), JOINED_ALIAS);
  }
  ctx
}

fn parenthesize(text: String) -> String {
  if text.starts_with('(') && text.ends_with(')') {
    text
  } else {
    format!("({})", text)
  }
}

fn positive_u32(value: Option<i64>) -> Option<u32> {
  value.and_then(|v| u32::try_from(v).ok()).filter(|v| *v > 0)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::TopicSettings;
  use crate::entity::ColumnDescriptor;
  use crate::expr::{Param, ValueType};
  use crate::stage::{QueryBuilder, Windows};

  fn init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
  }

  fn order() -> Expr {
    Expr::param("o", ValueType::record("Order"))
  }

  fn on_order(body: Expr) -> Lambda {
    Lambda::single("o", ValueType::record("Order"), body)
  }

  fn catalog() -> Catalog {
    Catalog::new()
      .with(
        EntityDescriptor::new("Order", "orders")
          .with_column(ColumnDescriptor::new("Id", ValueType::Int).key(0))
          .with_column(ColumnDescriptor::new("CustomerId", ValueType::Int)),
      )
      .with(EntityDescriptor::new("Customer", "customers").with_kind(ObjectKind::Table))
      .with(EntityDescriptor::new("Payment", "payments"))
  }

  fn join_on(right: &str) -> Lambda {
    Lambda::pair(
      Param::new("o", ValueType::record("Order")),
      Param::new("c", ValueType::record(right)),
      order()
        .member("CustomerId", ValueType::Int)
        .equals(Expr::param("c", ValueType::record(right)).member("Id", ValueType::Int)),
    )
  }

  fn plan(model: &QueryModel, topic: &str) -> Result<String> {
    init();
    let catalog = catalog();
    let options = CompilerOptions::default();
    StatementPlanner::new(&catalog, &options).create_as_select(model, topic)
  }

  #[test]
  fn test_filtered_stream_layout() {
    let model = QueryBuilder::from("Order")
      .filter(on_order(order().member("CustomerId", ValueType::Int).gt(Expr::int(10))))
      .unwrap()
      .select(on_order(Expr::construct(vec![("Id", order().member("Id", ValueType::Int))])))
      .unwrap()
      .build()
      .unwrap();
    assert_eq!(
      plan(&model, "vip-orders").unwrap(),
      "CREATE STREAM IF NOT EXISTS vip_orders WITH (KAFKA_TOPIC='vip-orders', VALUE_FORMAT='AVRO', PARTITIONS=1, REPLICAS=1) AS\n\
       SELECT ID AS Id\n\
       FROM ORDERS\n\
       WHERE (CustomerId > 10)\n\
       EMIT CHANGES;"
    );
  }

  #[test]
  fn test_stream_table_join_has_no_within() {
    let model = QueryBuilder::from("Order")
      .join("Customer", join_on("Customer"))
      .unwrap()
      .select(on_order(order()))
      .unwrap()
      .build()
      .unwrap();
    let sql = plan(&model, "enriched").unwrap();
    assert!(sql.contains("\nFROM ORDERS o JOIN CUSTOMERS i ON (o.CustomerId = i.Id)\n"));
  }

  #[test]
  fn test_stream_stream_join_within() {
    let model = QueryBuilder::from("Order")
      .join("Payment", join_on("Payment"))
      .unwrap()
      .select(on_order(order()))
      .unwrap()
      .build()
      .unwrap();
    assert!(plan(&model, "paid").unwrap().contains("JOIN PAYMENTS i WITHIN 300 SECONDS ON"));

    let explicit = QueryBuilder::from("Order")
      .join("Payment", join_on("Payment"))
      .unwrap()
      .within(Duration::from_secs(30))
      .unwrap()
      .select(on_order(order()))
      .unwrap()
      .build()
      .unwrap();
    assert!(plan(&explicit, "paid").unwrap().contains("WITHIN 30 SECONDS"));

    let strict = QueryBuilder::from("Order")
      .join("Payment", join_on("Payment"))
      .unwrap()
      .require_explicit_within()
      .unwrap()
      .select(on_order(order()))
      .unwrap()
      .build()
      .unwrap();
    let err = plan(&strict, "paid").unwrap_err();
    assert!(err.to_string().contains("requires explicit Within(...)"));
  }

  #[test]
  fn test_join_model_errors() {
    let mut model = QueryModel::from_source("Order");
    model.source_types.push("Payment".into());
    let err = plan(&model, "x").unwrap_err();
    assert!(err.to_string().contains("Join condition required for two table join"));

    model.source_types.push("Customer".into());
    let err = plan(&model, "x").unwrap_err();
    assert!(err.to_string().contains("Only up to 2 tables are supported in JOIN"));

    let err = plan(&QueryModel::default(), "x").unwrap_err();
    assert!(err.to_string().contains("Source types are required"));

    let mut unqualified = QueryModel::from_source("Order");
    unqualified.source_types.push("Payment".into());
    unqualified.join_condition = Some(Lambda::pair(
      Param::new("o", ValueType::record("Order")),
      Param::new("p", ValueType::record("Payment")),
      Expr::source("Order")
        .member("Id", ValueType::Int)
        .equals(Expr::param("p", ValueType::record("Payment")).member("OrderId", ValueType::Int)),
    ));
    let err = plan(&unqualified, "x").unwrap_err();
    assert!(err.to_string().contains("Unqualified column access in JOIN condition"));

    let mut arithmetic = QueryModel::from_source("Order");
    arithmetic.source_types.push("Payment".into());
    arithmetic.join_condition = Some(Lambda::pair(
      Param::new("o", ValueType::record("Order")),
      Param::new("p", ValueType::record("Payment")),
      order()
        .member("Id", ValueType::Int)
        .plus(Expr::int(1))
        .equals(Expr::param("p", ValueType::record("Payment")).member("OrderId", ValueType::Int)),
    ));
    let err = plan(&arithmetic, "x").unwrap_err();
    assert!(err.to_string().contains("in JOIN clause is not supported"));
  }

  #[test]
  fn test_grouped_table_with_sink_extras() {
    let g = Expr::param("g", ValueType::Grouping);
    let model = QueryBuilder::from("Order")
      .group_by(on_order(order().member("CustomerId", ValueType::Int)))
      .unwrap()
      .select(Lambda::single(
        "g",
        ValueType::Grouping,
        Expr::construct(vec![
          ("CustomerId", g.clone().member("Key", ValueType::Int)),
          ("Orders", Expr::aggregate(g, "Count", None, ValueType::Long)),
        ]),
      ))
      .unwrap()
      .with_extra(keys::SINK_PARTITIONS, 6)
      .with_extra(keys::SINK_REPLICAS, "3")
      .with_extra(keys::SINK_RETENTION_MS, 1000)
      .build()
      .unwrap();
    let sql = plan(&model, "orders_per_customer").unwrap();
    assert!(sql.starts_with(
      "CREATE TABLE IF NOT EXISTS orders_per_customer WITH (KAFKA_TOPIC='orders_per_customer', KEY_FORMAT='AVRO', VALUE_FORMAT='AVRO', PARTITIONS=6, REPLICAS=3) AS\n"
    ));
    assert!(sql.contains("\nGROUP BY CustomerId\n"));
    assert!(sql.contains("COUNT(*) AS Orders"));
  }

  #[test]
  fn test_single_tumbling_window_with_grace_and_retention() {
    let g = Expr::param("g", ValueType::Grouping);
    let ts = on_order(order().member("Ts", ValueType::DateTime));
    let model = QueryBuilder::from("Order")
      .tumbling(&ts, &Windows::minutes([5]), 10, Some(Duration::from_secs(3)), false)
      .unwrap()
      .group_by(on_order(order().member("CustomerId", ValueType::Int)))
      .unwrap()
      .select(Lambda::single(
        "g",
        ValueType::Grouping,
        Expr::construct(vec![("Orders", Expr::aggregate(g, "Count", None, ValueType::Long))]),
      ))
      .unwrap()
      .build()
      .unwrap();
    init();
    let catalog = catalog();
    let options = CompilerOptions::default().with_topic("orders_5m", TopicSettings::retention(7_200_000));
    let sql = StatementPlanner::new(&catalog, &options)
      .create_as_select(&model, "orders_5m")
      .unwrap();
    assert!(sql.contains("\nFROM ORDERS\nWINDOW TUMBLING (SIZE 5 MINUTES, GRACE PERIOD 3 SECONDS)\nGROUP BY"));
    assert!(sql.contains("RETENTION_MS=7200000"));
  }

  fn one_minute_counts(grace: Option<Duration>) -> QueryBuilder<crate::stage::markers::Selected> {
    let g = Expr::param("g", ValueType::Grouping);
    QueryBuilder::from("Order")
      .tumbling(&on_order(order().member("Ts", ValueType::DateTime)), &Windows::minutes([1]), 1, grace, false)
      .unwrap()
      .group_by(on_order(order().member("CustomerId", ValueType::Int)))
      .unwrap()
      .select(Lambda::single(
        "g",
        ValueType::Grouping,
        Expr::construct(vec![("Orders", Expr::aggregate(g, "Count", None, ValueType::Long))]),
      ))
      .unwrap()
  }

  #[test]
  fn test_single_tumbling_window_grace_defaults() {
    let defaulted = one_minute_counts(None).build().unwrap();
    let sql = plan(&defaulted, "orders_1m").unwrap();
    assert!(sql.contains("\nWINDOW TUMBLING (SIZE 1 MINUTES, GRACE PERIOD 1 SECONDS)\n"));

    let from_extra = one_minute_counts(None)
      .with_extra(format!("{}1m", keys::GRACE_SECONDS_PREFIX), 9)
      .build()
      .unwrap();
    let sql = plan(&from_extra, "orders_1m").unwrap();
    assert!(sql.contains("WINDOW TUMBLING (SIZE 1 MINUTES, GRACE PERIOD 9 SECONDS)"));

    let extra_over_model = one_minute_counts(Some(Duration::from_secs(4)))
      .with_extra(format!("{}1m", keys::GRACE_SECONDS_PREFIX), 9)
      .build()
      .unwrap();
    assert!(plan(&extra_over_model, "orders_1m").unwrap().contains("GRACE PERIOD 9 SECONDS"));
  }

  #[test]
  fn test_hopping_window_requires_group_by_and_strips_window_start() {
    let ts = on_order(order().member("Ts", ValueType::DateTime));
    let ungrouped = QueryBuilder::from("Order")
      .hopping(&ts, Duration::from_secs(3600), Duration::from_secs(300), None)
      .unwrap()
      .select(on_order(order()))
      .unwrap()
      .build()
      .unwrap();
    let err = plan(&ungrouped, "x").unwrap_err();
    assert!(err.to_string().contains("Hopping window requires GroupBy()."));

    let g = Expr::param("g", ValueType::Grouping);
    let model = QueryBuilder::from("Order")
      .hopping(&ts, Duration::from_secs(3600), Duration::from_secs(300), Some(Duration::from_secs(90)))
      .unwrap()
      .group_by(on_order(order().member("CustomerId", ValueType::Int)))
      .unwrap()
      .select(Lambda::single(
        "g",
        ValueType::Grouping,
        Expr::construct(vec![
          ("Bucket", g.clone().call("WindowStart", vec![], ValueType::DateTime)),
          ("Orders", Expr::aggregate(g, "Count", None, ValueType::Long)),
        ]),
      ))
      .unwrap()
      .build()
      .unwrap();
    let sql = plan(&model, "hourly").unwrap();
    assert!(sql.contains("WINDOW HOPPING (SIZE 1 HOURS, ADVANCE BY 5 MINUTES, GRACE PERIOD 90 SECONDS)"));
    assert!(!sql.contains("WINDOWSTART"));
  }

  #[test]
  fn test_schedule_join_synthesizes_boundaries() {
    let s = Expr::param("s", ValueType::record("Session"));
    let predicate = Lambda::pair(
      Param::new("o", ValueType::record("Order")),
      Param::new("s", ValueType::record("Session")),
      order()
        .member("Desk", ValueType::String)
        .equals(s.clone().member("Desk", ValueType::String))
        .and_also(s.clone().member("Open", ValueType::DateTime).le(order().member("Ts", ValueType::DateTime)))
        .and_also(order().member("Ts", ValueType::DateTime).lt(s.member("Close", ValueType::DateTime))),
    );
    let model = QueryBuilder::from("Order")
      .time_frame("Session", &predicate, None)
      .unwrap()
      .select(on_order(order()))
      .unwrap()
      .build()
      .unwrap();
    let catalog = catalog().with(EntityDescriptor::new("Session", "sessions").with_kind(ObjectKind::Table));
    let options = CompilerOptions::default();
    let sql = StatementPlanner::new(&catalog, &options)
      .create_as_select(&model, "in_session")
      .unwrap();
    assert!(sql.contains("\nFROM ORDERS o JOIN SESSIONS s ON (o.Desk = s.Desk)\n"));
    assert!(sql.contains("\nWHERE (s.Open <= o.Ts) AND (o.Ts < s.Close)\n"));
  }

  #[test]
  fn test_duration_clause_units() {
    assert_eq!(duration_clause(Duration::from_secs(86_400 * 2)), "2 DAYS");
    assert_eq!(duration_clause(Duration::from_secs(7_200)), "2 HOURS");
    assert_eq!(duration_clause(Duration::from_secs(90)), "90 SECONDS");
    assert_eq!(duration_clause(Duration::from_secs(120)), "2 MINUTES");
    assert_eq!(duration_clause(Duration::from_millis(1500)), "2 SECONDS");
  }

  #[test]
  fn test_entity_ddl_and_value_schema() {
    let catalog = catalog();
    let options = CompilerOptions::default().with_schema_namespace("shop");
    let planner = StatementPlanner::new(&catalog, &options);
    let entity = catalog.get("Order").unwrap();
    assert!(planner
      .entity_ddl(entity)
      .unwrap()
      .ends_with("VALUE_AVRO_SCHEMA_FULL_NAME='shop.orders_valueAvro');"));
    let model = QueryModel::from_source("Order");
    let sql = planner.create_as_select(&model, "copy").unwrap();
    assert!(sql.contains("VALUE_AVRO_SCHEMA_FULL_NAME='shop.copy_valueAvro'"));
    let bare = planner.plan(&model, &StatementTarget::new("copy").without_value_schema()).unwrap();
    assert!(!bare.contains("VALUE_AVRO_SCHEMA_FULL_NAME"));
  }
}
