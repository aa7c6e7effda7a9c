//! # Fluent Query Builder
//!
//! Accumulates a [`QueryModel`] from a sequence of fluent calls while
//! enforcing the clause grammar:
//!
//! ```text
//! From -> [Join [Within]] -> [Where] -> [Tumbling | Hopping | TimeFrame]
//!      -> [GroupBy -> [Having]] -> Select -> build()
//! ```
//!
//! Two front ends share one implementation:
//!
//! - [`StageValidator`] checks the order at runtime, for models composed
//!   dynamically (for example from configuration)
//! - [`QueryBuilder`] is a typestate wrapper whose stage markers expose only
//!   the calls valid next, so most ordering mistakes fail to compile
//!
//! ## Example
//!
//! ```rust
//! use ksqlweave::expr::{Expr, Lambda, ValueType};
//! use ksqlweave::stage::QueryBuilder;
//!
//! let o = Expr::param("o", ValueType::record("Order"));
//! let model = QueryBuilder::from("Order")
//!   .filter(Lambda::single("o", ValueType::record("Order"), o.clone().member("Qty", ValueType::Int).gt(Expr::int(0))))
//!   .unwrap()
//!   .select(Lambda::single("o", ValueType::record("Order"), Expr::construct(vec![
//!     ("Id", o.member("Id", ValueType::Int)),
//!   ])))
//!   .unwrap()
//!   .build()
//!   .unwrap();
//! assert_eq!(model.operation_sequence, vec!["From", "Where", "Select"]);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use std::time::Duration;

use crate::error::{ClauseKind, CompileError, Result};
use crate::expr::{BinaryOp, Expr, Lambda, Param};
use crate::model::{keys, BasedOnSpec, HoppingSpec, QueryModel};

/// Grammar position of the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
  /// Nothing called yet
  Start,
  /// Source registered
  From,
  /// Second source joined
  Join,
  /// Row filter registered
  Where,
  /// Grouping registered
  GroupBy,
  /// Post-aggregation filter registered
  Having,
  /// Projection registered; terminal
  Select,
}

/// Tumbling window sizes, rendered into timeframe tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Windows {
  /// Minute windows (`{n}m`)
  pub minutes: Vec<u32>,
  /// Hour windows (`{n}h`)
  pub hours: Vec<u32>,
  /// Day windows (`{n}d`)
  pub days: Vec<u32>,
  /// Month windows (`{n}mo`)
  pub months: Vec<u32>,
}

impl Windows {
  /// Minute windows.
  pub fn minutes(values: impl IntoIterator<Item = u32>) -> Self {
    Self {
      minutes: values.into_iter().collect(),
      ..Self::default()
    }
  }

  /// Adds hour windows.
  pub fn and_hours(mut self, values: impl IntoIterator<Item = u32>) -> Self {
    self.hours.extend(values);
    self
  }

  /// Adds day windows.
  pub fn and_days(mut self, values: impl IntoIterator<Item = u32>) -> Self {
    self.days.extend(values);
    self
  }

  /// Adds month windows.
  pub fn and_months(mut self, values: impl IntoIterator<Item = u32>) -> Self {
    self.months.extend(values);
    self
  }

  /// Tokens in minutes, hours, days, months order.
  pub fn tokens(&self) -> Vec<String> {
    let groups: [(&[u32], &str); 4] = [
      (&self.minutes, "m"),
      (&self.hours, "h"),
      (&self.days, "d"),
      (&self.months, "mo"),
    ];
    groups
      .iter()
      .flat_map(|(values, suffix)| values.iter().map(move |v| format!("{}{}", v, suffix)))
      .collect()
  }

  /// True when no window is listed.
  pub fn is_empty(&self) -> bool {
    self.minutes.is_empty() && self.hours.is_empty() && self.days.is_empty() && self.months.is_empty()
  }
}

/// Runtime-checked builder over a [`QueryModel`].
#[derive(Debug, Clone)]
pub struct StageValidator {
  stage: Stage,
  model: QueryModel,
}

impl Default for StageValidator {
  fn default() -> Self {
    Self::new()
  }
}

impl StageValidator {
  /// Empty builder at [`Stage::Start`].
  pub fn new() -> Self {
    Self {
      stage: Stage::Start,
      model: QueryModel::default(),
    }
  }

  /// Current stage.
  pub fn stage(&self) -> Stage {
    self.stage
  }

  /// Model built so far.
  pub fn model(&self) -> &QueryModel {
    &self.model
  }

  /// Stores a planner hint.
  pub fn set_extra(&mut self, key: impl Into<String>, value: impl Into<Value>) {
    self.model.extras.set(key, value);
  }

  /// Registers the primary source.
  pub fn from(&mut self, source: impl Into<String>) -> Result<()> {
    if self.stage != Stage::Start {
      return Err(CompileError::grammar("From", "exactly once, before any other call"));
    }
    self.model.source_types = vec![source.into()];
    self.record("From", Stage::From);
    Ok(())
  }

  /// Joins a second source on a two-parameter predicate.
  pub fn join(&mut self, right: impl Into<String>, condition: Lambda) -> Result<()> {
    if self.stage != Stage::From {
      return Err(CompileError::grammar("Join", "immediately after From()"));
    }
    if condition.params.len() != 2 {
      return Err(CompileError::semantic(
        ClauseKind::Join,
        "Join condition must take the left and right rows as parameters",
      ));
    }
    self.model.source_types.push(right.into());
    self.model.join_condition = Some(condition);
    self.model.primary_source_requires_alias = true;
    self.record("Join", Stage::Join);
    Ok(())
  }

  /// Registers the row filter.
  pub fn filter(&mut self, predicate: Lambda) -> Result<()> {
    self.require_started("Where")?;
    if matches!(self.stage, Stage::Select | Stage::GroupBy | Stage::Having) {
      return Err(CompileError::grammar("Where", "before GroupBy/Having/Select()"));
    }
    self.model.where_condition = Some(predicate);
    self.record("Where", Stage::Where);
    Ok(())
  }

  /// Registers tumbling windows over the event-time member selected by `time`.
  pub fn tumbling(
    &mut self,
    time: &Lambda,
    windows: &Windows,
    base_unit_seconds: u32,
    grace: Option<Duration>,
    continuation: bool,
  ) -> Result<()> {
    self.require_windowable("Tumbling")?;
    if windows.is_empty() {
      return Err(CompileError::semantic(
        ClauseKind::Window,
        "Tumbling() requires at least one window size",
      ));
    }
    if base_unit_seconds == 0 {
      return Err(CompileError::semantic(ClauseKind::Window, "baseUnitSeconds must be > 0"));
    }
    self.model.time_key = Some(time_member(time, "Tumbling")?);
    self.model.extras.set(keys::HAS_TUMBLING_WINDOW, true);
    self.model.extras.set(keys::CONTINUATION, continuation);
    self.model.continuation = continuation;
    self.model.base_unit_seconds = base_unit_seconds;
    if let Some(grace) = grace {
      self.model.grace_seconds = Some(ceil_seconds(grace));
    }
    self.model.add_windows(windows.tokens());
    self.record("Tumbling", self.stage);
    Ok(())
  }

  /// Registers a hopping window. A GROUP BY is required before planning.
  pub fn hopping(
    &mut self,
    time: &Lambda,
    size: Duration,
    advance: Duration,
    grace: Option<Duration>,
  ) -> Result<()> {
    self.require_windowable("Hopping")?;
    if size.is_zero() || advance.is_zero() {
      return Err(CompileError::semantic(
        ClauseKind::Window,
        "Hopping size and advance must be > 0",
      ));
    }
    if advance > size {
      return Err(CompileError::semantic(
        ClauseKind::Window,
        "Hopping advance must not exceed the window size",
      ));
    }
    self.model.time_key = Some(time_member(time, "Hopping")?);
    self.model.hopping = Some(HoppingSpec { size, advance, grace });
    self.record("Hopping", self.stage);
    Ok(())
  }

  /// Sets the stream-stream join window, rounded up to whole seconds.
  pub fn within(&mut self, interval: Duration) -> Result<()> {
    if !self.model.has_join() {
      return Err(CompileError::grammar("Within", "after Join()"));
    }
    if interval.is_zero() {
      return Err(CompileError::semantic(ClauseKind::Join, "interval must be > 0"));
    }
    self.model.within_seconds = Some(ceil_seconds(interval));
    Ok(())
  }

  /// Turns a missing `within` into a planning error.
  pub fn require_explicit_within(&mut self) -> Result<()> {
    if !self.model.has_join() {
      return Err(CompileError::grammar("RequireExplicitWithin", "after Join()"));
    }
    self.model.forbid_default_within = true;
    Ok(())
  }

  /// Bounds rows by a schedule: `predicate(row, schedule)` is a conjunction of
  /// key equalities and open/close comparisons.
  pub fn time_frame(
    &mut self,
    schedule_type: impl Into<String>,
    predicate: &Lambda,
    day_key: Option<Lambda>,
  ) -> Result<()> {
    self.require_windowable("TimeFrame")?;
    if self.model.based_on.is_some() {
      return Err(CompileError::grammar("TimeFrame", "only once"));
    }
    let (Some(row), Some(schedule)) = (predicate.params.first(), predicate.params.get(1)) else {
      return Err(CompileError::semantic(
        ClauseKind::Model,
        "TimeFrame predicate must take the row and the schedule as parameters",
      ));
    };
    let mut spec = BasedOnSpec::new(schedule_type);
    spec.day_key = day_key;
    ScheduleParser { row, schedule }.parse(&predicate.body, &mut spec)?;
    self.model.based_on = Some(spec);
    self.record("TimeFrame", self.stage);
    Ok(())
  }

  /// Registers the grouping key selector.
  pub fn group_by(&mut self, key_selector: Lambda) -> Result<()> {
    self.require_started("GroupBy")?;
    if self.stage == Stage::Select {
      return Err(CompileError::grammar("GroupBy", "before Select()"));
    }
    if matches!(self.stage, Stage::GroupBy | Stage::Having) {
      return Err(CompileError::grammar("GroupBy", "only once"));
    }
    self.model.group_by_expression = Some(key_selector);
    self.record("GroupBy", Stage::GroupBy);
    Ok(())
  }

  /// Registers the post-aggregation filter.
  pub fn having(&mut self, predicate: Lambda) -> Result<()> {
    if self.model.has_tumbling() {
      return Err(CompileError::not_supported(
        ClauseKind::Having,
        "HAVING over a tumbling window (filter at emit time or downstream)",
      ));
    }
    if self.stage != Stage::GroupBy {
      return Err(CompileError::grammar("Having", "immediately after GroupBy()"));
    }
    self.model.having_condition = Some(predicate);
    self.record("Having", Stage::Having);
    Ok(())
  }

  /// Registers the projection; terminal.
  pub fn select(&mut self, projection: Lambda) -> Result<()> {
    match self.stage {
      Stage::Select => return Err(CompileError::grammar("Select", "only once")),
      Stage::Start => return Err(CompileError::grammar("Select", "after From()")),
      _ => {}
    }
    self.model.bucket_column_name = window_start_alias(&projection);
    self.model.select_projection = Some(projection);
    self.record("Select", Stage::Select);
    Ok(())
  }

  /// Finalizes the alias decision and returns the model.
  pub fn build(mut self) -> Result<QueryModel> {
    self.require_started("Build")?;
    self.model.primary_source_requires_alias = self.model.decide_primary_alias();
    tracing::debug!(
      sources = ?self.model.source_types,
      alias = self.model.primary_source_requires_alias,
      "query model built"
    );
    Ok(self.model)
  }

  fn record(&mut self, operation: &str, next: Stage) {
    self.model.operation_sequence.push(operation.to_string());
    self.stage = next;
  }

  fn require_started(&self, call: &str) -> Result<()> {
    if self.stage == Stage::Start {
      return Err(CompileError::grammar(call, "after From()"));
    }
    Ok(())
  }

  fn require_windowable(&self, call: &str) -> Result<()> {
    self.require_started(call)?;
    if matches!(self.stage, Stage::GroupBy | Stage::Having | Stage::Select) {
      return Err(CompileError::grammar(call, "before GroupBy/Having/Select()"));
    }
    Ok(())
  }
}

fn ceil_seconds(d: Duration) -> u64 {
  let whole = d.as_secs();
  if d.subsec_nanos() > 0 { whole + 1 } else { whole }
}

fn time_member(time: &Lambda, call: &str) -> Result<String> {
  time
    .body
    .unwrap_convert()
    .member_name()
    .map(str::to_string)
    .ok_or_else(|| {
      CompileError::semantic(
        ClauseKind::Window,
        format!("{}() time selector must be a member access", call),
      )
    })
}

fn window_start_alias(projection: &Lambda) -> Option<String> {
  match projection.body.unwrap_convert() {
    Expr::Construct { members, .. } => members
      .iter()
      .find(|(_, e)| matches!(e.unwrap_convert(), Expr::Call { method, .. } if method == "WindowStart"))
      .map(|(alias, _)| alias.clone()),
    _ => None,
  }
}

struct ScheduleParser<'p> {
  row: &'p Param,
  schedule: &'p Param,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
  Row,
  Schedule,
}

impl ScheduleParser<'_> {
  fn parse(&self, expr: &Expr, spec: &mut BasedOnSpec) -> Result<()> {
    let Expr::Binary { op, left, right } = expr.unwrap_convert() else {
      return Err(self.unsupported(expr));
    };
    match op {
      BinaryOp::AndAlso => {
        self.parse(left, spec)?;
        self.parse(right, spec)
      }
      BinaryOp::Equal => match (self.side(left), self.side(right)) {
        (Some((Side::Row, name)), Some((Side::Schedule, _)))
        | (Some((Side::Schedule, _)), Some((Side::Row, name))) => {
          if !spec.join_keys.iter().any(|k| k == name) {
            spec.join_keys.push(name.to_string());
          }
          Ok(())
        }
        _ => Err(self.unsupported(expr)),
      },
      BinaryOp::LessThan
      | BinaryOp::LessThanOrEqual
      | BinaryOp::GreaterThan
      | BinaryOp::GreaterThanOrEqual => {
        let (Some((l_side, l_name)), Some((r_side, r_name))) = (self.side(left), self.side(right)) else {
          return Err(self.unsupported(expr));
        };
        if l_side == r_side {
          return Err(self.unsupported(expr));
        }
        let schedule_left = l_side == Side::Schedule;
        let (column, row_column) = if schedule_left { (l_name, r_name) } else { (r_name, l_name) };
        let less = matches!(op, BinaryOp::LessThan | BinaryOp::LessThanOrEqual);
        let inclusive = matches!(op, BinaryOp::LessThanOrEqual | BinaryOp::GreaterThanOrEqual);
        let is_open = if schedule_left { less } else { !less };
        if is_open {
          spec.open = Some(column.to_string());
          spec.open_inclusive = inclusive;
        } else {
          spec.close = Some(column.to_string());
          spec.close_inclusive = inclusive;
        }
        spec.time_column.get_or_insert_with(|| row_column.to_string());
        Ok(())
      }
      _ => Err(self.unsupported(expr)),
    }
  }

  /// Which parameter a direct member access hangs off, with its name.
  fn side<'e>(&self, expr: &'e Expr) -> Option<(Side, &'e str)> {
    let Expr::Member { target, name, .. } = expr.unwrap_convert() else {
      return None;
    };
    match target.unwrap_convert() {
      Expr::Parameter(p) if p.name == self.schedule.name => Some((Side::Schedule, name)),
      Expr::Parameter(p) if p.name == self.row.name => Some((Side::Row, name)),
      _ => None,
    }
  }

  fn unsupported(&self, expr: &Expr) -> CompileError {
    CompileError::not_supported(ClauseKind::Model, format!("TimeFrame predicate '{}'", expr))
  }
}

/// Typestate markers for [`QueryBuilder`].
pub mod markers {
  /// After `from`
  #[derive(Debug, Clone, Copy)]
  pub struct Sourced;
  /// After `join`
  #[derive(Debug, Clone, Copy)]
  pub struct Joined;
  /// After `filter`
  #[derive(Debug, Clone, Copy)]
  pub struct Filtered;
  /// After `group_by`
  #[derive(Debug, Clone, Copy)]
  pub struct Grouped;
  /// After `having`
  #[derive(Debug, Clone, Copy)]
  pub struct HavingApplied;
  /// After `select`
  #[derive(Debug, Clone, Copy)]
  pub struct Selected;
}

mod sealed {
  pub trait Sealed {}
  impl Sealed for super::markers::Sourced {}
  impl Sealed for super::markers::Joined {}
  impl Sealed for super::markers::Filtered {}
}

/// Stages that still accept filters, windows, grouping and projection.
pub trait PreGrouping: sealed::Sealed {}
impl PreGrouping for markers::Sourced {}
impl PreGrouping for markers::Joined {}
impl PreGrouping for markers::Filtered {}

use markers::{Filtered, Grouped, HavingApplied, Joined, Selected, Sourced};

/// Compile-time staged builder. Each stage exposes only the calls valid next.
#[derive(Debug, Clone)]
pub struct QueryBuilder<S> {
  inner: StageValidator,
  _stage: PhantomData<S>,
}

impl<S> QueryBuilder<S> {
  fn advance<N>(self) -> QueryBuilder<N> {
    QueryBuilder {
      inner: self.inner,
      _stage: PhantomData,
    }
  }

  /// Model built so far.
  pub fn model(&self) -> &QueryModel {
    self.inner.model()
  }

  /// Stores a planner hint.
  pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.inner.set_extra(key, value);
    self
  }
}

impl QueryBuilder<Sourced> {
  /// Starts a query over `source`.
  pub fn from(source: impl Into<String>) -> Self {
    let mut inner = StageValidator::new();
    let source = source.into();
    inner.model.source_types = vec![source];
    inner.record("From", Stage::From);
    QueryBuilder {
      inner,
      _stage: PhantomData,
    }
  }

  /// Joins a second source.
  pub fn join(mut self, right: impl Into<String>, condition: Lambda) -> Result<QueryBuilder<Joined>> {
    self.inner.join(right, condition)?;
    Ok(self.advance())
  }
}

impl QueryBuilder<Joined> {
  /// Sets the join window.
  pub fn within(mut self, interval: Duration) -> Result<Self> {
    self.inner.within(interval)?;
    Ok(self)
  }

  /// Disables the default join window.
  pub fn require_explicit_within(mut self) -> Result<Self> {
    self.inner.require_explicit_within()?;
    Ok(self)
  }
}

impl<S: PreGrouping> QueryBuilder<S> {
  /// Row filter (WHERE).
  pub fn filter(mut self, predicate: Lambda) -> Result<QueryBuilder<Filtered>> {
    self.inner.filter(predicate)?;
    Ok(self.advance())
  }

  /// Tumbling windows.
  pub fn tumbling(
    mut self,
    time: &Lambda,
    windows: &Windows,
    base_unit_seconds: u32,
    grace: Option<Duration>,
    continuation: bool,
  ) -> Result<Self> {
    self.inner.tumbling(time, windows, base_unit_seconds, grace, continuation)?;
    Ok(self)
  }

  /// Hopping window.
  pub fn hopping(
    mut self,
    time: &Lambda,
    size: Duration,
    advance: Duration,
    grace: Option<Duration>,
  ) -> Result<Self> {
    self.inner.hopping(time, size, advance, grace)?;
    Ok(self)
  }

  /// Schedule-bounded rows.
  pub fn time_frame(
    mut self,
    schedule_type: impl Into<String>,
    predicate: &Lambda,
    day_key: Option<Lambda>,
  ) -> Result<Self> {
    self.inner.time_frame(schedule_type, predicate, day_key)?;
    Ok(self)
  }

  /// Grouping key selector.
  pub fn group_by(mut self, key_selector: Lambda) -> Result<QueryBuilder<Grouped>> {
    self.inner.group_by(key_selector)?;
    Ok(self.advance())
  }

  /// Ungrouped projection.
  pub fn select(mut self, projection: Lambda) -> Result<QueryBuilder<Selected>> {
    self.inner.select(projection)?;
    Ok(self.advance())
  }
}

impl QueryBuilder<Grouped> {
  /// Post-aggregation filter.
  pub fn having(mut self, predicate: Lambda) -> Result<QueryBuilder<HavingApplied>> {
    self.inner.having(predicate)?;
    Ok(self.advance())
  }

  /// Grouped projection.
  pub fn select(mut self, projection: Lambda) -> Result<QueryBuilder<Selected>> {
    self.inner.select(projection)?;
    Ok(self.advance())
  }
}

impl QueryBuilder<HavingApplied> {
  /// Grouped projection.
  pub fn select(mut self, projection: Lambda) -> Result<QueryBuilder<Selected>> {
    self.inner.select(projection)?;
    Ok(self.advance())
  }
}

impl QueryBuilder<Selected> {
  /// Finalizes the model.
  pub fn build(self) -> Result<QueryModel> {
    self.inner.build()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::expr::ValueType;

  fn row() -> Expr {
    Expr::param("o", ValueType::record("Trade"))
  }

  fn lam(body: Expr) -> Lambda {
    Lambda::single("o", ValueType::record("Trade"), body)
  }

  fn ts() -> Lambda {
    lam(row().member("Ts", ValueType::DateTime))
  }

  fn started() -> StageValidator {
    let mut v = StageValidator::new();
    v.from("Trade").unwrap();
    v
  }

  #[test]
  fn test_where_after_group_by_fails() {
    let mut v = started();
    v.group_by(lam(row().member("Symbol", ValueType::String))).unwrap();
    let err = v.filter(lam(Expr::bool(true))).unwrap_err();
    assert!(err.is_grammar());
    assert_eq!(err.to_string(), "Where() must be called before GroupBy/Having/Select()");
  }

  #[test]
  fn test_select_twice_and_group_by_after_select() {
    let mut v = started();
    v.select(lam(row())).unwrap();
    assert!(v.select(lam(row())).unwrap_err().is_grammar());
    let err = v.group_by(lam(row().member("Symbol", ValueType::String))).unwrap_err();
    assert_eq!(err.to_string(), "GroupBy() must be called before Select()");
  }

  #[test]
  fn test_join_only_after_from() {
    let cond = Lambda::pair(
      Param::new("o", ValueType::record("Trade")),
      Param::new("i", ValueType::record("Rate")),
      Expr::bool(true),
    );
    let mut v = started();
    v.filter(lam(Expr::bool(true))).unwrap();
    let err = v.join("Rate", cond.clone()).unwrap_err();
    assert_eq!(err.to_string(), "Join() must be called immediately after From()");

    let mut v = started();
    v.join("Rate", cond).unwrap();
    assert_eq!(v.model().source_types, vec!["Trade", "Rate"]);
    assert!(v.model().primary_source_requires_alias);
  }

  #[test]
  fn test_having_rules() {
    let mut v = started();
    let err = v.having(lam(Expr::bool(true))).unwrap_err();
    assert_eq!(err.to_string(), "Having() must be called immediately after GroupBy()");

    let mut v = started();
    v.tumbling(&ts(), &Windows::minutes([1]), 10, None, false).unwrap();
    v.group_by(lam(row().member("Symbol", ValueType::String))).unwrap();
    let err = v.having(lam(Expr::bool(true))).unwrap_err();
    assert!(matches!(err, CompileError::NotSupported { clause: ClauseKind::Having, .. }));
  }

  #[test]
  fn test_tumbling_registration() {
    let mut v = started();
    let windows = Windows::minutes([5, 1]).and_hours([1]).and_months([1]);
    v.tumbling(&ts(), &windows, 10, Some(Duration::from_millis(2500)), true).unwrap();
    let m = v.model();
    assert_eq!(m.windows, vec!["1m", "5m", "1h", "1mo"]);
    assert_eq!(m.time_key.as_deref(), Some("Ts"));
    assert_eq!(m.grace_seconds, Some(3));
    assert!(m.continuation);
    assert_eq!(m.extras.bool(keys::HAS_TUMBLING_WINDOW), Some(true));
    assert_eq!(m.operation_sequence, vec!["From", "Tumbling"]);
  }

  #[test]
  fn test_within_rules() {
    let mut v = started();
    assert!(v.within(Duration::from_secs(10)).unwrap_err().is_grammar());
    let cond = Lambda::pair(
      Param::new("o", ValueType::record("Trade")),
      Param::new("i", ValueType::record("Rate")),
      Expr::bool(true),
    );
    v.join("Rate", cond).unwrap();
    let err = v.within(Duration::ZERO).unwrap_err();
    assert!(err.to_string().contains("interval must be > 0"));
    v.within(Duration::from_millis(1500)).unwrap();
    assert_eq!(v.model().within_seconds, Some(2));
  }

  #[test]
  fn test_select_records_bucket_column() {
    let g = Expr::param("g", ValueType::Grouping);
    let mut v = started();
    v.group_by(lam(row().member("Symbol", ValueType::String))).unwrap();
    v.select(Lambda::single(
      "g",
      ValueType::Grouping,
      Expr::construct(vec![("BucketStart", g.call("WindowStart", vec![], ValueType::DateTime))]),
    ))
    .unwrap();
    assert_eq!(v.model().bucket_column_name.as_deref(), Some("BucketStart"));
  }

  #[test]
  fn test_time_frame_parsing() {
    let s = Expr::param("s", ValueType::record("Session"));
    let body = row()
      .member("Broker", ValueType::String)
      .equals(s.clone().member("Broker", ValueType::String))
      .and_also(s.clone().member("Open", ValueType::DateTime).le(row().member("Ts", ValueType::DateTime)))
      .and_also(row().member("Ts", ValueType::DateTime).lt(s.clone().member("Close", ValueType::DateTime)));
    let predicate = Lambda::pair(
      Param::new("o", ValueType::record("Trade")),
      Param::new("s", ValueType::record("Session")),
      body,
    );
    let day_key = Lambda::single("s", ValueType::record("Session"), s.member("Date", ValueType::DateTime));
    let mut v = started();
    v.time_frame("Session", &predicate, Some(day_key)).unwrap();
    let spec = v.model().based_on.clone().unwrap();
    assert_eq!(spec.join_keys, vec!["Broker"]);
    assert_eq!(spec.open.as_deref(), Some("Open"));
    assert!(spec.open_inclusive);
    assert_eq!(spec.close.as_deref(), Some("Close"));
    assert!(!spec.close_inclusive);
    assert_eq!(spec.time_column.as_deref(), Some("Ts"));
    assert_eq!(spec.day_key_member(), Some("Date"));
    assert_eq!(v.model().operation_sequence, vec!["From", "TimeFrame"]);

    let err = v.time_frame("Session", &predicate, None).unwrap_err();
    assert!(err.is_grammar());
    assert_eq!(v.model().based_on.as_ref().and_then(|b| b.day_key_member()), Some("Date"));
  }

  #[test]
  fn test_time_frame_rejects_other_shapes() {
    let predicate = Lambda::pair(
      Param::new("o", ValueType::record("Trade")),
      Param::new("s", ValueType::record("Session")),
      row().member("Qty", ValueType::Int).gt(Expr::int(0)),
    );
    let mut v = started();
    let err = v.time_frame("Session", &predicate, None).unwrap_err();
    assert!(err.to_string().contains("TimeFrame predicate"));
  }

  #[test]
  fn test_build_computes_alias_and_requires_from() {
    assert!(StageValidator::new().build().unwrap_err().is_grammar());
    let mut v = started();
    let nested = row().member("Address", ValueType::record("Address")).member("City", ValueType::String);
    v.select(lam(Expr::construct(vec![("City", nested)]))).unwrap();
    assert!(v.build().unwrap().primary_source_requires_alias);
  }

  #[test]
  fn test_typestate_grouped_pipeline() {
    let g = Expr::param("g", ValueType::Grouping);
    let model = QueryBuilder::from("Trade")
      .hopping(&ts(), Duration::from_secs(300), Duration::from_secs(60), None)
      .unwrap()
      .group_by(lam(row().member("Symbol", ValueType::String)))
      .unwrap()
      .having(Lambda::single(
        "g",
        ValueType::Grouping,
        Expr::aggregate(g.clone(), "Count", None, ValueType::Long).gt(Expr::int(1)),
      ))
      .unwrap()
      .select(Lambda::single(
        "g",
        ValueType::Grouping,
        Expr::construct(vec![("N", Expr::aggregate(g, "Count", None, ValueType::Long))]),
      ))
      .unwrap()
      .with_extra(keys::SINK_PARTITIONS, 3)
      .build()
      .unwrap();
    assert_eq!(model.operation_sequence, vec!["From", "Hopping", "GroupBy", "Having", "Select"]);
    assert!(model.has_hopping());
    assert_eq!(model.extras.i64(keys::SINK_PARTITIONS), Some(3));
  }

  #[test]
  fn test_hopping_validation() {
    let mut v = started();
    let err = v
      .hopping(&ts(), Duration::from_secs(60), Duration::from_secs(120), None)
      .unwrap_err();
    assert!(err.to_string().contains("advance must not exceed"));
  }
}
