//! # Clause Builders
//!
//! One builder per SQL clause. Each builder pairs an expression visitor with
//! clause-specific semantic checks and runs the shared pipeline:
//!
//! 1. input checks (depth, node count, CASE branch types)
//! 2. builder-specific validation
//! 3. the visitor itself
//! 4. output checks (non-empty, no denylisted token)
//!
//! ## Compile Context
//!
//! Builders are stateless. Anything one clause needs from another (most
//! notably the GROUP BY key list the SELECT builder checks key order against)
//! travels through an explicit [`CompileContext`]. The planner owns the
//! context and folds each [`ClauseOutput`] back into it with
//! [`CompileContext::apply`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::analysis;
use crate::error::{ClauseKind, Result};
use crate::expr::{BinaryOp, Expr, Lambda};

pub mod group_by;
pub mod having;
pub mod join;
pub mod order_by;
pub mod select;
pub mod where_clause;

pub use group_by::GroupByBuilder;
pub use having::HavingBuilder;
pub use join::JoinBuilder;
pub use order_by::OrderByBuilder;
pub use select::SelectBuilder;
pub use where_clause::WhereBuilder;

/// Redirects one SELECT output alias onto a pre-aggregated column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateOverride {
  /// Column the output alias should aggregate instead
  pub target_column: String,
  /// Registry method name of the aggregate to apply (`Sum`, `Max`, ...)
  pub function: Option<String>,
  /// Only rewrite aggregate projections; plain members stay untouched
  pub aggregate_only: bool,
}

impl AggregateOverride {
  /// Override to `column` with the given aggregate.
  pub fn new(column: impl Into<String>, function: impl Into<String>) -> Self {
    Self {
      target_column: column.into(),
      function: Some(function.into()),
      aggregate_only: false,
    }
  }

  /// Override that applies to aggregate projections only.
  pub fn aggregate_only(mut self) -> Self {
    self.aggregate_only = true;
    self
  }
}

/// Cross-clause state for one compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileContext {
  /// Lambda parameter name to source alias (`o`, `i`)
  pub param_aliases: BTreeMap<String, String>,
  /// Keys produced by the most recent GROUP BY build, in order
  pub group_by_keys: Vec<String>,
  /// Per-alias aggregate redirection for SELECT
  pub aggregate_overrides: BTreeMap<String, AggregateOverride>,
  /// Per-alias decimal cast hints (precision, scale)
  pub decimal_hints: BTreeMap<String, (u32, u32)>,
  /// Output aliases dropped from SELECT
  pub exclude_aliases: BTreeSet<String>,
  /// Prefix and upper-case every GROUP BY column, not just keys
  pub force_prefix_all: bool,
  /// Alias prefixed onto override columns
  pub override_source_alias: String,
  /// Default decimal precision for casts
  pub decimal_precision: u32,
  /// Default decimal scale for casts
  pub decimal_scale: u32,
}

impl Default for CompileContext {
  fn default() -> Self {
    Self {
      param_aliases: BTreeMap::new(),
      group_by_keys: Vec::new(),
      aggregate_overrides: BTreeMap::new(),
      decimal_hints: BTreeMap::new(),
      exclude_aliases: BTreeSet::new(),
      force_prefix_all: false,
      override_source_alias: "o".to_string(),
      decimal_precision: 18,
      decimal_scale: 2,
    }
  }
}

impl CompileContext {
  /// Empty context with default decimal precision.
  pub fn new() -> Self {
    Self::default()
  }

  /// Maps a lambda parameter onto a source alias.
  pub fn with_alias(mut self, param: impl Into<String>, alias: impl Into<String>) -> Self {
    self.param_aliases.insert(param.into(), alias.into());
    self
  }

  /// Seeds the GROUP BY key list.
  pub fn with_group_by_keys<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
    self.group_by_keys = keys.into_iter().map(Into::into).collect();
    self
  }

  /// Adds an aggregate override for an output alias.
  pub fn with_override(mut self, alias: impl Into<String>, rule: AggregateOverride) -> Self {
    self.aggregate_overrides.insert(alias.into(), rule);
    self
  }

  /// Adds a decimal cast hint for an output alias.
  pub fn with_decimal_hint(mut self, alias: impl Into<String>, precision: u32, scale: u32) -> Self {
    self.decimal_hints.insert(alias.into(), (precision, scale));
    self
  }

  /// Drops an output alias from SELECT.
  pub fn excluding(mut self, alias: impl Into<String>) -> Self {
    self.exclude_aliases.insert(alias.into());
    self
  }

  /// Alias for a lambda parameter, if mapped.
  pub fn alias_for(&self, param: &str) -> Option<&str> {
    self
      .param_aliases
      .get(param)
      .map(String::as_str)
      .filter(|a| !a.trim().is_empty())
  }

  /// First non-empty alias in parameter-name order.
  pub fn first_alias(&self) -> Option<&str> {
    self.param_aliases.values().map(String::as_str).find(|a| !a.trim().is_empty())
  }

  /// Folds a clause result back into the context.
  pub fn apply(&mut self, output: &ClauseOutput) {
    if output.kind == ClauseKind::GroupBy {
      self.group_by_keys = output.keys.clone();
    }
  }
}

/// Text plus metadata produced by one clause build.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClauseOutput {
  /// Clause that produced the fragment
  pub kind: ClauseKind,
  /// Clause-internal text (without the leading keyword)
  pub text: String,
  /// True when the fragment contains an aggregate call
  pub has_aggregates: bool,
  /// Columns referenced, in first-seen order
  pub columns: Vec<String>,
  /// Output aliases emitted (SELECT)
  pub aliases: Vec<String>,
  /// Key expressions emitted (GROUP BY)
  pub keys: Vec<String>,
  /// Alias of the window-start member, when projected (SELECT)
  pub bucket_column: Option<String>,
}

impl ClauseOutput {
  /// Output carrying only text.
  pub fn text(kind: ClauseKind, text: impl Into<String>) -> Self {
    Self {
      kind,
      text: text.into(),
      ..Self::default()
    }
  }
}

/// Shared pipeline for every clause builder.
pub trait ClauseBuilder {
  /// Clause produced by this builder.
  fn kind(&self) -> ClauseKind;

  /// Builder-specific semantic checks, run before the visitor.
  fn validate(&self, _expr: &Expr, _ctx: &CompileContext) -> Result<()> {
    Ok(())
  }

  /// Visitor pass producing the clause text.
  fn build_internal(&self, expr: &Expr, ctx: &CompileContext) -> Result<ClauseOutput>;

  /// Runs input checks, validation, the visitor and output checks.
  fn build(&self, expr: &Expr, ctx: &CompileContext) -> Result<ClauseOutput> {
    validate_input(expr)?;
    self.validate(expr, ctx)?;
    let output = self.build_internal(expr, ctx)?;
    analysis::check_output(self.kind(), &output.text)?;
    Ok(output)
  }

  /// Convenience wrapper for a lambda-shaped input.
  fn build_lambda(&self, lambda: &Lambda, ctx: &CompileContext) -> Result<ClauseOutput> {
    self.build(&Expr::lambda(lambda.clone()), ctx)
  }
}

/// Depth/node bounds plus CASE branch type agreement.
pub fn validate_input(expr: &Expr) -> Result<()> {
  analysis::check_complexity(expr)?;
  let mut branches = Vec::new();
  expr.walk(&mut |e| {
    if let Expr::Conditional { if_true, if_false, .. } = e {
      branches.push((if_true.as_ref(), if_false.as_ref()));
    }
  });
  for (a, b) in branches {
    analysis::check_conditional_types(a, b)?;
  }
  Ok(())
}

/// Strips a lambda wrapper, returning its body.
pub fn lambda_body(expr: &Expr) -> &Expr {
  match expr {
    Expr::Lambda(l) => lambda_body(&l.body),
    other => other,
  }
}

/// Dialect spelling of an operator, `None` for operators with no infix form.
pub fn arithmetic_or_comparison_operator(op: BinaryOp) -> Option<&'static str> {
  Some(match op {
    BinaryOp::Add => "+",
    BinaryOp::Subtract => "-",
    BinaryOp::Multiply => "*",
    BinaryOp::Divide => "/",
    BinaryOp::Modulo => "%",
    BinaryOp::Equal => "=",
    BinaryOp::NotEqual => "<>",
    BinaryOp::GreaterThan => ">",
    BinaryOp::GreaterThanOrEqual => ">=",
    BinaryOp::LessThan => "<",
    BinaryOp::LessThanOrEqual => "<=",
    BinaryOp::AndAlso => "AND",
    BinaryOp::OrElse => "OR",
    BinaryOp::Coalesce | BinaryOp::And | BinaryOp::Or => return None,
  })
}

fn push_unique(out: &mut Vec<String>, value: String) {
  if !out.contains(&value) {
    out.push(value);
  }
}

/// Column names referenced by a tree, in first-seen order.
pub fn referenced_columns(expr: &Expr) -> Vec<String> {
  let mut out = Vec::new();
  expr.walk(&mut |e| {
    if let Expr::Member { name, target, .. } = e {
      if matches!(target.unwrap_convert(), Expr::Parameter(_)) && name != "Key" {
        push_unique(&mut out, name.clone());
      }
    }
  });
  out
}
