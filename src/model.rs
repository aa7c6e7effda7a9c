//! # Query Model
//!
//! The in-memory description of one query, filled in by the fluent builder
//! in [`crate::stage`] and read by the statement planners.
//!
//! ## Overview
//!
//! A [`QueryModel`] holds the source record types, the clause lambdas
//! (join, where, group by, having, select), window registrations (tumbling
//! tokens or one hopping spec), the optional schedule (`based_on`) join, and
//! a free-form [`Extras`] map for planner hints.
//!
//! The model is mutable only while the builder owns it. After `build()` it
//! is handed out by value; callers that want to reuse it across threads
//! clone it first.
//!
//! ## Primary Source Alias
//!
//! [`QueryModel::decide_primary_alias`] decides whether the primary source is
//! referenced as `o` in generated text:
//!
//! 1. joined models always alias
//! 2. a boolean `select/requireAlias` extra forces the answer either way
//! 3. hub-input projection metadata aliases
//! 4. otherwise the projection aliases when it reads a member of a member of
//!    a parameter (`o.Address.City`, `g.Key.Symbol`)

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use crate::analysis;
use crate::entity::ObjectKind;
use crate::expr::{Expr, Lambda};
use crate::functions;
use crate::timeframe;

/// Grace applied to a tumbling window when neither extras nor the model set
/// one.
pub const DEFAULT_GRACE_SECONDS: u64 = 1;

/// Well-known [`Extras`] keys.
pub mod keys {
  /// Forces the primary-source alias decision (bool)
  pub const REQUIRE_ALIAS: &str = "select/requireAlias";
  /// Sink partitions (int)
  pub const SINK_PARTITIONS: &str = "sink/partitions";
  /// Sink replicas (int)
  pub const SINK_REPLICAS: &str = "sink/replicas";
  /// Sink retention in milliseconds (int or numeric string)
  pub const SINK_RETENTION_MS: &str = "sink/retentionMs";
  /// Sink cleanup policy (string)
  pub const SINK_CLEANUP_POLICY: &str = "sink/cleanupPolicy";
  /// Dotted spelling of the cleanup policy key
  pub const SINK_CLEANUP_POLICY_DOTTED: &str = "sink/cleanup.policy";
  /// Value schema full name (string)
  pub const VALUE_SCHEMA_FULL_NAME: &str = "valueSchemaFullName";
  /// Event-time column override (string)
  pub const TIMESTAMP_COLUMN: &str = "timestampColumn";
  /// Prefix of per-timeframe grace overrides, e.g. `graceSeconds/5m`
  pub const GRACE_SECONDS_PREFIX: &str = "graceSeconds/";
  /// Set when a tumbling window is registered
  pub const HAS_TUMBLING_WINDOW: &str = "HasTumblingWindow";
  /// Mirrors [`super::QueryModel::continuation`]
  pub const CONTINUATION: &str = "continuation";
}

/// Free-form planner hints.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Extras(BTreeMap<String, Value>);

impl Extras {
  /// Empty map.
  pub fn new() -> Self {
    Self::default()
  }

  /// Stores a value.
  pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
    self.0.insert(key.into(), value.into());
  }

  /// Stores a value only when the key is absent.
  pub fn set_default(&mut self, key: impl Into<String>, value: impl Into<Value>) {
    self.0.entry(key.into()).or_insert_with(|| value.into());
  }

  /// Raw value.
  pub fn get(&self, key: &str) -> Option<&Value> {
    self.0.get(key)
  }

  /// Removes a value.
  pub fn remove(&mut self, key: &str) -> Option<Value> {
    self.0.remove(key)
  }

  /// True when the key is present.
  pub fn contains(&self, key: &str) -> bool {
    self.0.contains_key(key)
  }

  /// Boolean value; other JSON types yield `None`.
  pub fn bool(&self, key: &str) -> Option<bool> {
    self.get(key).and_then(Value::as_bool)
  }

  /// Integer value. Numeric strings are accepted.
  pub fn i64(&self, key: &str) -> Option<i64> {
    match self.get(key)? {
      Value::Number(n) => n.as_i64(),
      Value::String(s) => s.trim().parse().ok(),
      _ => None,
    }
  }

  /// Positive integer value.
  pub fn positive(&self, key: &str) -> Option<i64> {
    self.i64(key).filter(|v| *v > 0)
  }

  /// Non-blank string value.
  pub fn str(&self, key: &str) -> Option<&str> {
    self
      .get(key)
      .and_then(Value::as_str)
      .map(str::trim)
      .filter(|s| !s.is_empty())
  }

  /// Grace override for one timeframe (`graceSeconds/<tf>`).
  pub fn grace_for(&self, timeframe: &str) -> Option<i64> {
    self.i64(&format!("{}{}", keys::GRACE_SECONDS_PREFIX, timeframe))
  }

  /// Iterates entries in key order.
  pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
    self.0.iter()
  }

  /// Number of entries.
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// True when empty.
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

/// Hopping window registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoppingSpec {
  /// Window size
  pub size: Duration,
  /// Advance interval
  pub advance: Duration,
  /// Grace period
  pub grace: Option<Duration>,
}

/// Schedule-bounded ("based-on") join registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasedOnSpec {
  /// Schedule record type
  pub schedule_type: String,
  /// Accessor that yields the schedule day key
  pub day_key: Option<Lambda>,
  /// Row-side member names equated with the schedule
  pub join_keys: Vec<String>,
  /// Row-side event-time member compared against the boundaries
  pub time_column: Option<String>,
  /// Schedule column opening a session
  pub open: Option<String>,
  /// Schedule column closing a session
  pub close: Option<String>,
  /// `open <= t` rather than `open < t`
  pub open_inclusive: bool,
  /// `t <= close` rather than `t < close`
  pub close_inclusive: bool,
}

impl BasedOnSpec {
  /// Spec with no keys or boundaries yet.
  pub fn new(schedule_type: impl Into<String>) -> Self {
    Self {
      schedule_type: schedule_type.into(),
      day_key: None,
      join_keys: Vec::new(),
      time_column: None,
      open: None,
      close: None,
      open_inclusive: true,
      close_inclusive: false,
    }
  }

  /// Member name of the day-key accessor, when it is a plain member.
  pub fn day_key_member(&self) -> Option<&str> {
    self.day_key.as_ref().and_then(|l| l.body.unwrap_convert().member_name())
  }
}

/// What a projection member computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberRole {
  /// A grouping key (`g.Key.X`)
  Key,
  /// An aggregate call
  Aggregate,
  /// The window-start pseudo column
  WindowStart,
  /// Anything else
  Value,
}

/// One projection member and its role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionMember {
  /// Output alias
  pub alias: String,
  /// Member role
  pub role: MemberRole,
  /// Aggregate method, for aggregate members
  pub aggregate: Option<String>,
}

/// Static facts about the SELECT projection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectionMetadata {
  /// The projection reads from the `_1s_rows` hub stream
  pub is_hub_input: bool,
  /// Members in declared order
  pub members: Vec<ProjectionMember>,
}

impl ProjectionMetadata {
  /// Classifies the members of a projection lambda.
  pub fn analyze(projection: &Lambda, is_hub_input: bool) -> Self {
    let members = match projection.body.unwrap_convert() {
      Expr::Construct { members, .. } => members
        .iter()
        .map(|(alias, e)| ProjectionMember {
          alias: alias.clone(),
          role: role_of(e),
          aggregate: aggregate_of(e),
        })
        .collect(),
      _ => Vec::new(),
    };
    Self {
      is_hub_input,
      members,
    }
  }

  /// Aliases carrying the given role.
  pub fn aliases(&self, role: MemberRole) -> Vec<&str> {
    self
      .members
      .iter()
      .filter(|m| m.role == role)
      .map(|m| m.alias.as_str())
      .collect()
  }
}

fn role_of(expr: &Expr) -> MemberRole {
  let expr = expr.unwrap_convert();
  match expr {
    Expr::Call { method, .. } if method == "WindowStart" => MemberRole::WindowStart,
    Expr::Member { target, .. } if expr.is_group_key() || target.is_group_key() => MemberRole::Key,
    _ if analysis::contains_aggregate(expr) => MemberRole::Aggregate,
    _ => MemberRole::Value,
  }
}

fn aggregate_of(expr: &Expr) -> Option<String> {
  match expr.unwrap_convert() {
    Expr::Call { method, .. } if functions::is_aggregate(method) => Some(method.clone()),
    other => analysis::aggregate_methods(other).into_iter().next(),
  }
}

/// The query being compiled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryModel {
  /// Source record types; one, or left and right of a join
  pub source_types: Vec<String>,
  /// Join predicate over (left, right)
  pub join_condition: Option<Lambda>,
  /// Row filter
  pub where_condition: Option<Lambda>,
  /// Output projection
  pub select_projection: Option<Lambda>,
  /// Grouping key selector
  pub group_by_expression: Option<Lambda>,
  /// Post-aggregation filter
  pub having_condition: Option<Lambda>,
  /// Normalized tumbling timeframe tokens, sorted by duration
  pub windows: Vec<String>,
  /// First day of a weekly bucket
  pub week_anchor: Weekday,
  /// Event-time member used for windowing
  pub time_key: Option<String>,
  /// Output alias bound to the window start
  pub bucket_column_name: Option<String>,
  /// Explicit stream-stream join window
  pub within_seconds: Option<u64>,
  /// Reject joins that would fall back to the default window
  pub forbid_default_within: bool,
  /// Base aggregation unit for tumbling windows
  pub base_unit_seconds: u32,
  /// Model-wide grace period
  pub grace_seconds: Option<u64>,
  /// Carry the previous bucket forward when a bucket is empty
  pub continuation: bool,
  /// Primary source must be referenced through an alias
  pub primary_source_requires_alias: bool,
  /// Fluent calls in invocation order
  pub operation_sequence: Vec<String>,
  /// Planner hints
  pub extras: Extras,
  /// Hopping window, distinct from tumbling windows
  pub hopping: Option<HoppingSpec>,
  /// Projection facts attached by the planner
  pub select_projection_metadata: Option<ProjectionMetadata>,
  /// Schedule-bounded join
  pub based_on: Option<BasedOnSpec>,
}

impl Default for QueryModel {
  fn default() -> Self {
    Self {
      source_types: Vec::new(),
      join_condition: None,
      where_condition: None,
      select_projection: None,
      group_by_expression: None,
      having_condition: None,
      windows: Vec::new(),
      week_anchor: Weekday::Mon,
      time_key: None,
      bucket_column_name: None,
      within_seconds: None,
      forbid_default_within: false,
      base_unit_seconds: 10,
      grace_seconds: None,
      continuation: false,
      primary_source_requires_alias: false,
      operation_sequence: Vec::new(),
      extras: Extras::new(),
      hopping: None,
      select_projection_metadata: None,
      based_on: None,
    }
  }
}

impl QueryModel {
  /// Model over a single source.
  pub fn from_source(source: impl Into<String>) -> Self {
    Self {
      source_types: vec![source.into()],
      ..Self::default()
    }
  }

  /// A GROUP BY is registered.
  pub fn has_group_by(&self) -> bool {
    self.group_by_expression.is_some()
  }

  /// At least one tumbling window is registered.
  pub fn has_tumbling(&self) -> bool {
    !self.windows.is_empty()
  }

  /// A hopping window is registered.
  pub fn has_hopping(&self) -> bool {
    self.hopping.is_some()
  }

  /// The model joins two sources.
  pub fn has_join(&self) -> bool {
    self.source_types.len() > 1
  }

  /// The projection calls an aggregate anywhere.
  pub fn has_aggregates(&self) -> bool {
    self
      .select_projection
      .as_ref()
      .is_some_and(|p| analysis::contains_aggregate(&p.body))
  }

  /// Grouping, windowing or aggregation makes the output a table.
  pub fn is_aggregate_query(&self) -> bool {
    self.has_group_by() || self.has_tumbling() || self.has_hopping() || self.has_aggregates()
  }

  /// Output object kind.
  pub fn determine_kind(&self) -> ObjectKind {
    if self.is_aggregate_query() {
      ObjectKind::Table
    } else {
      ObjectKind::Stream
    }
  }

  /// Deduplicates window tokens and orders them by duration.
  pub fn normalize_windows(&mut self) {
    self.windows = timeframe::normalize_set(&self.windows);
  }

  /// Registers tumbling tokens and renormalizes.
  pub fn add_windows<I, S>(&mut self, tokens: I)
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.windows.extend(tokens.into_iter().map(Into::into));
    self.normalize_windows();
  }

  /// Grace for one tumbling timeframe: the `graceSeconds/<tf>` extra, then
  /// the model grace, then [`DEFAULT_GRACE_SECONDS`].
  pub fn grace_seconds_for(&self, timeframe: &str) -> u64 {
    self
      .extras
      .grace_for(timeframe)
      .and_then(|g| u64::try_from(g).ok())
      .or(self.grace_seconds)
      .unwrap_or(DEFAULT_GRACE_SECONDS)
  }

  /// Ordinal position of a fluent call, if it was made.
  pub fn position_of(&self, operation: &str) -> Option<usize> {
    self.operation_sequence.iter().position(|op| op == operation)
  }

  /// Number of times a fluent call was made.
  pub fn count_of(&self, operation: &str) -> usize {
    self.operation_sequence.iter().filter(|op| *op == operation).count()
  }

  /// Decides whether the primary source needs an alias.
  pub fn decide_primary_alias(&self) -> bool {
    if self.has_join() {
      return true;
    }
    if let Some(forced) = self.extras.bool(keys::REQUIRE_ALIAS) {
      return forced;
    }
    if self
      .select_projection_metadata
      .as_ref()
      .is_some_and(|m| m.is_hub_input)
    {
      return true;
    }
    match &self.select_projection {
      Some(projection) => requires_alias(&projection.body),
      None => false,
    }
  }

  /// Debug summary, one line per populated field.
  pub fn dump(&self) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Sources: [{}]", self.source_types.join(", "));
    let clauses = [
      ("Join", &self.join_condition),
      ("Where", &self.where_condition),
      ("GroupBy", &self.group_by_expression),
      ("Having", &self.having_condition),
      ("Select", &self.select_projection),
    ];
    for (name, lambda) in clauses {
      if let Some(l) = lambda {
        let _ = writeln!(out, "{}: {}", name, l.body);
      }
    }
    if self.has_tumbling() {
      let _ = writeln!(out, "Windows: [{}]", self.windows.join(", "));
    }
    if let Some(h) = &self.hopping {
      let _ = writeln!(out, "Hopping: size={:?} advance={:?} grace={:?}", h.size, h.advance, h.grace);
    }
    if let Some(b) = &self.based_on {
      let _ = writeln!(
        out,
        "BasedOn: {} keys=[{}] open={:?} close={:?}",
        b.schedule_type,
        b.join_keys.join(", "),
        b.open,
        b.close
      );
    }
    let _ = writeln!(out, "Operations: [{}]", self.operation_sequence.join(" -> "));
    let _ = write!(out, "Aggregate: {} Kind: {}", self.is_aggregate_query(), self.determine_kind());
    out
  }
}

/// Member-of-member-of-parameter anywhere in the projection. Nested lambdas
/// (aggregate selectors) are not inspected.
fn requires_alias(expr: &Expr) -> bool {
  match expr {
    Expr::Member { target, .. } => match target.as_ref() {
      Expr::Parameter(_) => false,
      Expr::Member { target: inner, .. } if matches!(inner.as_ref(), Expr::Parameter(_)) => true,
      other => requires_alias(other),
    },
    Expr::Call { target, args, .. } => {
      args.iter().any(requires_alias) || target.as_deref().is_some_and(requires_alias)
    }
    Expr::Unary { operand, .. } => requires_alias(operand),
    Expr::Binary { left, right, .. } => requires_alias(left) || requires_alias(right),
    Expr::Conditional {
      test,
      if_true,
      if_false,
    } => requires_alias(test) || requires_alias(if_true) || requires_alias(if_false),
    Expr::Construct { members, .. } => members.iter().any(|(_, e)| requires_alias(e)),
    Expr::Parameter(_) | Expr::Constant(_) | Expr::Lambda(_) | Expr::Source { .. } => false,
  }
}
