//! # Windowed Derivation
//!
//! Expands a tumbling model into the objects that materialize it:
//!
//! - `<base>_1s_rows`: a stream mirroring the source entity's columns at the
//!   one-second base granularity
//! - `<base>_<tf>_live`: one windowed CTAS per coarser timeframe, reading
//!   from the rows stream
//!
//! Entities come back in execution order, the rows stream first.

use serde::{Deserialize, Serialize};

use crate::config::CompilerOptions;
use crate::ddl::{self, ColumnDefinition, SchemaAdapter};
use crate::entity::{Catalog, EntityDescriptor, ObjectKind};
use crate::error::{ClauseKind, CompileError, Result};
use crate::model::{ProjectionMetadata, QueryModel};
use crate::naming;
use crate::planner::{StatementPlanner, StatementTarget, WindowSpec};
use crate::timeframe::{self, Timeframe};
use crate::with_clause::{RetentionPolicy, WithOptions};

/// Retention of the rows stream when its topic configures none (7 days).
pub const DEFAULT_ROWS_RETENTION_MS: i64 = 604_800_000;

/// Role of a derived object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedRole {
  /// One-second rows stream
  Rows,
  /// Windowed aggregate over the rows stream
  Live,
}

/// One object to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedEntity {
  /// Role in the pipeline
  pub role: DerivedRole,
  /// Granularity
  pub timeframe: Timeframe,
  /// Object name
  pub object_name: String,
  /// Backing topic
  pub topic: String,
  /// Stream or table
  pub kind: ObjectKind,
  /// Object read by the statement, if any
  pub input: Option<String>,
  /// Statement text
  pub statement: String,
}

/// Objects derived from one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivationPlan {
  /// Base name
  pub base: String,
  /// Entities in execution order
  pub entities: Vec<DerivedEntity>,
  /// Schedule day-key member carried for bucket alignment
  pub day_key: Option<String>,
}

impl DerivationPlan {
  /// Statements in execution order.
  pub fn statements(&self) -> Vec<&str> {
    self.entities.iter().map(|e| e.statement.as_str()).collect()
  }

  /// Entity for a timeframe token such as `5m`.
  pub fn entity(&self, timeframe: &str) -> Option<&DerivedEntity> {
    let tf = timeframe.parse::<Timeframe>().ok()?;
    self.entities.iter().find(|e| e.timeframe == tf)
  }

  /// The rows stream.
  pub fn rows(&self) -> Option<&DerivedEntity> {
    self.entities.iter().find(|e| e.role == DerivedRole::Rows)
  }

  /// Live tables, finest first.
  pub fn live(&self) -> impl Iterator<Item = &DerivedEntity> {
    self.entities.iter().filter(|e| e.role == DerivedRole::Live)
  }
}

/// Plans the rows stream and the live tables of a tumbling model.
#[derive(Debug, Clone, Copy)]
pub struct DerivationPlanner<'a> {
  catalog: &'a Catalog,
  options: &'a CompilerOptions,
}

impl<'a> DerivationPlanner<'a> {
  /// Planner over a catalog and options.
  pub fn new(catalog: &'a Catalog, options: &'a CompilerOptions) -> Self {
    Self { catalog, options }
  }

  /// Derives every object for `model`, naming them after `base`.
  pub fn plan(&self, model: &QueryModel, base: &str) -> Result<DerivationPlan> {
    if !model.has_tumbling() {
      return Err(CompileError::semantic(
        ClauseKind::Window,
        "Derivation requires at least one Tumbling() window",
      ));
    }
    if model.has_join() {
      return Err(CompileError::not_supported(ClauseKind::Window, "Tumbling derivation over a join"));
    }
    let Some(source) = model.source_types.first() else {
      return Err(CompileError::semantic(ClauseKind::Model, "Source types are required"));
    };
    let entity = self.catalog.get(source).ok_or_else(|| {
      CompileError::semantic(ClauseKind::Ddl, format!("No entity descriptor for source '{}'", source))
    })?;
    let time_key = model
      .time_key
      .as_deref()
      .ok_or_else(|| CompileError::semantic(ClauseKind::Window, "Tumbling() requires an event-time member"))?;

    let mut tokens = vec![Timeframe::one_second().to_string()];
    tokens.extend(model.windows.iter().cloned());
    let timeframes = timeframe::normalize_set(tokens)
      .iter()
      .map(|t| t.parse::<Timeframe>())
      .collect::<Result<Vec<_>>>()?;

    let base = naming::object_name(base);
    let rows = self.rows_entity(entity, time_key, &base)?;
    let mut entities = Vec::with_capacity(timeframes.len());

    let planner = StatementPlanner::new(self.catalog, self.options);
    let mut live_model = model.clone();
    if let Some(projection) = &model.select_projection {
      live_model.select_projection_metadata = Some(ProjectionMetadata::analyze(projection, true));
    }
    live_model.primary_source_requires_alias = live_model.decide_primary_alias();

    for tf in timeframes.into_iter().filter(|tf| *tf != Timeframe::one_second()) {
      let token = tf.to_string();
      let grace = model.grace_seconds_for(&token);
      live_model.windows = vec![token.clone()];
      let target = StatementTarget::new(format!("{}_{}_live", base, token))
        .with_input(rows.object_name.as_str())
        .with_window(WindowSpec::Tumbling {
          timeframe: tf,
          grace_seconds: Some(grace),
        })
        .without_value_schema();
      let statement = planner.plan(&live_model, &target)?;
      entities.push(DerivedEntity {
        role: DerivedRole::Live,
        timeframe: tf,
        object_name: target.object_name,
        topic: target.topic,
        kind: live_model.determine_kind(),
        input: Some(rows.object_name.clone()),
        statement,
      });
    }
    entities.insert(0, rows);

    let plan = DerivationPlan {
      base,
      entities,
      day_key: model
        .based_on
        .as_ref()
        .and_then(|b| b.day_key_member())
        .map(str::to_string),
    };
    tracing::debug!(
      base = %plan.base,
      objects = plan.entities.len(),
      timeframes = ?plan.entities.iter().map(|e| e.timeframe.to_string()).collect::<Vec<_>>(),
      "planned windowed derivation"
    );
    Ok(plan)
  }

  /// `CREATE STREAM` for the one-second rows: the entity's own columns plus
  /// the event-time member.
  fn rows_entity(&self, entity: &EntityDescriptor, time_key: &str, base: &str) -> Result<DerivedEntity> {
    let adapter = SchemaAdapter::new(self.options);
    let mut columns = adapter.columns(entity)?;
    let time_column = naming::quote_if_reserved(time_key);
    if !columns.iter().any(|c| c.name.eq_ignore_ascii_case(&time_column)) {
      columns.push(ColumnDefinition {
        name: time_column.clone(),
        sql_type: "TIMESTAMP".to_string(),
        is_key: false,
      });
    }

    let object_name = format!("{}_1s_rows", base);
    let sink = self.options.topic_resolver().resolve(&object_name);
    let with = WithOptions::new(object_name.clone(), ObjectKind::Stream)
      .with_value_schema(
        self
          .options
          .namespace()
          .map(|ns| format!("{}.{}_valueAvro", ns, object_name)),
      )
      .with_timestamp(Some(time_column))
      .with_sizing(sink.partitions, sink.replicas)
      .with_retention(
        Some(sink.retention_ms.unwrap_or(DEFAULT_ROWS_RETENTION_MS)),
        RetentionPolicy::Auto,
      )
      .build()?;
    let statement = format!(
      "CREATE STREAM IF NOT EXISTS {} ({}) {};",
      object_name,
      ddl::column_list(&columns, ObjectKind::Stream),
      with
    );
    Ok(DerivedEntity {
      role: DerivedRole::Rows,
      timeframe: Timeframe::one_second(),
      topic: object_name.clone(),
      object_name,
      kind: ObjectKind::Stream,
      input: None,
      statement,
    })
  }
}
