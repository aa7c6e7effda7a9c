//! # SELECT Builder
//!
//! Renders a projection lambda into the column list of a SELECT clause.
//!
//! ## Overview
//!
//! - record construction emits `expr AS alias` pairs in declared member order
//! - a bare row parameter (identity projection) emits `*`
//! - `g.Key` as a whole expands to the GROUP BY keys held by the context
//! - aggregate calls are translated through the function registry, and may be
//!   redirected per output alias onto pre-aggregated columns
//! - a `WindowStart()` member is recorded as the bucket column
//!
//! Column references are upper-cased and, when the context maps the lambda
//! parameter to a source alias, prefixed with it (`o.PRICE`).

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use super::{lambda_body, referenced_columns, ClauseBuilder, ClauseOutput, CompileContext};
use crate::analysis;
use crate::error::{ClauseKind, CompileError, Result};
use crate::expr::{BinaryOp, Expr, UnaryOp, ValueType};
use crate::functions::{self, FunctionTranslator};
use crate::naming;

const MIX_RULE: &str = "SELECT clause cannot mix aggregate functions with non-aggregate columns without GROUP BY";

static KEY_ALIAS: LazyLock<Option<Regex>> =
  LazyLock::new(|| Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)\)?$").ok());

/// SELECT clause builder.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectBuilder;

impl SelectBuilder {
  /// Creates the builder.
  pub fn new() -> Self {
    Self
  }
}

impl ClauseBuilder for SelectBuilder {
  fn kind(&self) -> ClauseKind {
    ClauseKind::Select
  }

  fn validate(&self, expr: &Expr, _ctx: &CompileContext) -> Result<()> {
    let body = lambda_body(expr);
    analysis::check_no_nested_aggregates(ClauseKind::Select, body)?;
    if matches!(body.unwrap_convert(), Expr::Call { .. })
      && analysis::contains_aggregate(body)
      && analysis::has_non_aggregate_columns(body)
    {
      return Err(CompileError::semantic(ClauseKind::Select, MIX_RULE));
    }
    Ok(())
  }

  fn build_internal(&self, expr: &Expr, ctx: &CompileContext) -> Result<ClauseOutput> {
    let body = lambda_body(expr);
    let mut visitor = SelectVisitor::new(ctx);
    visitor.visit(body)?;
    let mut output = ClauseOutput::text(ClauseKind::Select, visitor.result());
    output.has_aggregates = analysis::contains_aggregate(body);
    output.columns = referenced_columns(body);
    output.aliases = visitor.aliases;
    output.bucket_column = visitor.bucket_column;
    Ok(output)
  }
}

struct SelectVisitor<'c> {
  ctx: &'c CompileContext,
  columns: Vec<String>,
  aliases: Vec<String>,
  used_aliases: HashSet<String>,
  selected_group_keys: HashSet<String>,
  saw_aggregate: bool,
  saw_non_aggregate: bool,
  in_grouping_context: bool,
  bucket_column: Option<String>,
}

impl<'c> SelectVisitor<'c> {
  fn new(ctx: &'c CompileContext) -> Self {
    Self {
      ctx,
      columns: Vec::new(),
      aliases: Vec::new(),
      used_aliases: HashSet::new(),
      selected_group_keys: HashSet::new(),
      saw_aggregate: false,
      saw_non_aggregate: false,
      in_grouping_context: false,
      bucket_column: None,
    }
  }

  fn result(&self) -> String {
    if self.columns.is_empty() {
      "*".to_string()
    } else {
      self.columns.join(", ")
    }
  }

  fn visit(&mut self, expr: &Expr) -> Result<()> {
    match expr {
      Expr::Construct { type_name, members } => {
        self.in_grouping_context = self.in_grouping_context || contains_grouping_parameter(expr);
        if type_name.is_some() {
          self.validate_group_key_order(members)?;
        }
        for (name, arg) in members {
          self.visit_member_binding(name, arg)?;
        }
        Ok(())
      }
      Expr::Member { .. } => {
        if expr.root_param().is_some_and(|p| p.ty == ValueType::Grouping) {
          self.in_grouping_context = true;
        }
        if expr.is_group_key() {
          self.add_group_key_columns();
        } else {
          let column = self.render_member(expr, None)?;
          self.columns.push(column);
        }
        Ok(())
      }
      Expr::Parameter(_) => {
        self.columns.push("*".to_string());
        Ok(())
      }
      Expr::Unary {
        op: UnaryOp::Convert(_),
        operand,
      } => self.visit(operand),
      Expr::Lambda(l) => self.visit(&l.body),
      other => {
        let text = self.process(other, None)?;
        self.columns.push(text);
        Ok(())
      }
    }
  }

  fn visit_member_binding(&mut self, name: &str, arg: &Expr) -> Result<()> {
    if arg.is_group_key() {
      self.add_group_key_columns();
      return Ok(());
    }
    self.enforce_no_mix(arg)?;
    if matches!(arg.unwrap_convert(), Expr::Call { method, .. } if method == "WindowStart") {
      self.bucket_column = Some(name.to_string());
    }

    let text = self.process(arg, Some(name))?;
    let text = self.apply_non_aggregate_override(text, arg, name);
    let alias = self.unique_alias(name);
    if self.ctx.exclude_aliases.contains(name) || self.ctx.exclude_aliases.contains(&alias) {
      self.used_aliases.remove(&alias);
      return Ok(());
    }
    let column = self.alias_with_cast(&text, &alias);
    self.columns.push(column);
    self.aliases.push(alias);
    Ok(())
  }

  fn enforce_no_mix(&mut self, arg: &Expr) -> Result<()> {
    if self.in_grouping_context {
      return Ok(());
    }
    if analysis::contains_aggregate(arg) {
      if self.saw_non_aggregate {
        return Err(CompileError::semantic(ClauseKind::Select, MIX_RULE));
      }
      self.saw_aggregate = true;
    } else {
      if self.saw_aggregate {
        return Err(CompileError::semantic(ClauseKind::Select, MIX_RULE));
      }
      self.saw_non_aggregate = true;
    }
    Ok(())
  }

  fn unique_alias(&mut self, base: &str) -> String {
    let mut alias = base.to_string();
    let mut counter = 1;
    while self.used_aliases.contains(&alias) {
      alias = format!("{}_{}", base, counter);
      counter += 1;
    }
    self.used_aliases.insert(alias.clone());
    alias
  }

  fn alias_with_cast(&self, text: &str, alias: &str) -> String {
    if let Some((precision, scale)) = self.ctx.decimal_hints.get(alias) {
      if !text.trim_start().to_ascii_uppercase().starts_with("CAST(") {
        return format!("CAST({} AS DECIMAL({}, {})) AS {}", text, precision, scale, alias);
      }
    }
    format!("{} AS {}", text, alias)
  }

  fn group_key_columns(&self) -> Vec<(String, String)> {
    self
      .ctx
      .group_by_keys
      .iter()
      .map(|k| k.trim())
      .filter(|k| !k.is_empty())
      .map(|k| {
        let alias = KEY_ALIAS
          .as_ref()
          .and_then(|re| re.captures(k))
          .and_then(|c| c.get(1))
          .map(|m| m.as_str().to_string())
          .unwrap_or_else(|| k.to_string());
        (k.to_string(), alias)
      })
      .collect()
  }

  fn add_group_key_columns(&mut self) {
    for (expr, alias) in self.group_key_columns() {
      if self.ctx.exclude_aliases.contains(&alias) || self.selected_group_keys.contains(&alias) {
        continue;
      }
      self.selected_group_keys.insert(alias.clone());
      self.used_aliases.insert(alias.clone());
      self.columns.push(format!("{} AS {}", expr, alias));
      self.aliases.push(alias);
    }
  }

  fn validate_group_key_order(&self, members: &[(String, Expr)]) -> Result<()> {
    let keys: Vec<String> = self.group_key_columns().into_iter().map(|(_, a)| a).collect();
    if keys.is_empty() {
      return Ok(());
    }
    let declared: Vec<&str> = members
      .iter()
      .filter(|(_, e)| is_group_key_member(e))
      .map(|(n, _)| n.as_str())
      .collect();
    let same = declared.len() == keys.len()
      && declared.iter().zip(keys.iter()).all(|(d, k)| d.eq_ignore_ascii_case(k));
    if !same {
      return Err(CompileError::semantic(
        ClauseKind::Select,
        "The order of GroupBy keys does not match the output DTO definition. Please ensure they are the same order.",
      ));
    }
    Ok(())
  }

  fn process(&self, expr: &Expr, alias: Option<&str>) -> Result<String> {
    match expr {
      Expr::Member { .. } => self.render_member(expr, alias),
      Expr::Call { .. } => self.translate_call(expr, alias),
      Expr::Constant(lit) => Ok(analysis::safe_to_string(lit)),
      Expr::Parameter(_) => Ok("*".to_string()),
      Expr::Lambda(l) => self.process(&l.body, alias),
      Expr::Unary { op, operand } => match op {
        UnaryOp::Convert(_) => self.process(operand, alias),
        UnaryOp::Not => Ok(format!("NOT ({})", self.process(operand, alias)?)),
        UnaryOp::Negate => Ok(format!("-{}", self.process(operand, alias)?)),
      },
      Expr::Binary {
        op: BinaryOp::Coalesce,
        left,
        right,
      } => Ok(format!(
        "COALESCE({}, {})",
        self.process(left, alias)?,
        self.process(right, alias)?
      )),
      Expr::Binary { op, left, right } => {
        let symbol = super::arithmetic_or_comparison_operator(*op).ok_or_else(|| {
          CompileError::not_supported(ClauseKind::Select, format!("Operator {}", op))
        })?;
        Ok(format!(
          "({} {} {})",
          self.process(left, alias)?,
          symbol,
          self.process(right, alias)?
        ))
      }
      Expr::Conditional {
        test,
        if_true,
        if_false,
      } => {
        analysis::check_conditional_types(if_true, if_false)?;
        Ok(format!(
          "CASE WHEN {} THEN {} ELSE {} END",
          self.process(test, alias)?,
          self.process(if_true, alias)?,
          self.process(if_false, alias)?
        ))
      }
      Expr::Construct { .. } | Expr::Source { .. } => Err(CompileError::not_supported(
        ClauseKind::Select,
        format!("Nested projection '{}'", expr),
      )),
    }
  }

  fn translate_call(&self, call: &Expr, alias: Option<&str>) -> Result<String> {
    if let (Some(alias), Expr::Call { method, .. }) = (alias, call) {
      if let Some(rendered) = self.aggregate_override(method, alias)? {
        return Ok(rendered);
      }
    }
    let render = |e: &Expr| self.render_member(e, alias).ok();
    FunctionTranslator::new(ClauseKind::Select)
      .with_member_renderer(&render)
      .with_decimal(self.ctx.decimal_precision, self.ctx.decimal_scale)
      .translate(call)
  }

  fn aggregate_override(&self, method: &str, alias: &str) -> Result<Option<String>> {
    let Some(mapping) = functions::mapping(method) else {
      return Ok(None);
    };
    if !functions::is_aggregate(method) {
      return Ok(None);
    }
    let Some(rule) = self.ctx.aggregate_overrides.get(alias) else {
      return Ok(None);
    };
    let column = rule.target_column.trim();
    if column.is_empty() {
      return Ok(None);
    }
    let source = self.ctx.override_source_alias.trim();
    let qualified = if !source.is_empty() && !column.contains('.') {
      format!("{}.{}", source, column)
    } else {
      column.to_string()
    };
    tracing::debug!(alias, function = method, column, "applying aggregate override");

    let upper = method.to_ascii_uppercase();
    if upper == "AVERAGE" || upper == "AVG" {
      let column_upper = column.to_ascii_uppercase();
      let base = column_upper.rsplit('.').next().unwrap_or(column_upper.as_str());
      if base.starts_with("SUM") {
        let count = if source.is_empty() {
          "CNT".to_string()
        } else {
          format!("{}.CNT", source)
        };
        return Ok(Some(format!("(SUM({}) / SUM({}))", qualified, count)));
      }
      return Ok(Some(format!("AVG({})", qualified)));
    }
    mapping.generate_call(&[qualified]).map(Some)
  }

  fn apply_non_aggregate_override(&self, text: String, arg: &Expr, alias: &str) -> String {
    let original = arg.unwrap_convert();
    if matches!(original, Expr::Call { method, .. } if functions::is_aggregate(method) && functions::has_mapping(method))
    {
      return text;
    }
    if is_group_key_member(original) {
      return text;
    }
    let Some(rule) = self.ctx.aggregate_overrides.get(alias) else {
      return text;
    };
    let target = rule.target_column.trim();
    if target.is_empty() {
      return text;
    }
    if analysis::contains_aggregate(original) {
      let same_alias = target.eq_ignore_ascii_case(alias);
      if rule.aggregate_only || (same_alias && rule.function.is_some()) {
        return text;
      }
    }
    if rule.aggregate_only {
      return text;
    }
    rule
      .function
      .as_deref()
      .and_then(functions::mapping)
      .and_then(|m| m.generate_call(&[target.to_string()]).ok())
      .unwrap_or_else(|| format!("LATEST_BY_OFFSET({})", target))
  }

  fn render_member(&self, expr: &Expr, alias: Option<&str>) -> Result<String> {
    let Expr::Member { target, name, .. } = expr else {
      return self.process(expr, alias);
    };
    if name == "Length" && target.ty().is_string() {
      return Ok(format!("LEN({})", self.render_member(target, alias)?));
    }

    let mut path = Vec::new();
    let mut cursor = expr;
    while let Expr::Member { target, name, .. } = cursor {
      path.push(name.as_str());
      cursor = target.unwrap_convert();
    }
    path.reverse();
    let Expr::Parameter(param) = cursor else {
      return Err(CompileError::semantic(
        ClauseKind::Select,
        "Unqualified column access is not allowed. Use source parameter properties.",
      ));
    };

    if path.first() == Some(&"Key") && param.ty == ValueType::Grouping {
      let column = upper_path(&path[1..]);
      return Ok(match self.ctx.alias_for(&param.name) {
        Some(prefix) => format!("{}.{}", prefix, column),
        None => column,
      });
    }

    let column = upper_path(&path);
    let overridden = alias.is_some_and(|a| self.ctx.aggregate_overrides.contains_key(a));
    let source = self
      .ctx
      .alias_for(&param.name)
      .or_else(|| {
        let s = self.ctx.override_source_alias.trim();
        (overridden && !s.is_empty()).then_some(s)
      })
      .or_else(|| self.ctx.first_alias());
    Ok(match source {
      Some(s) => format!("{}.{}", s, column),
      None => column,
    })
  }
}

fn upper_path(path: &[&str]) -> String {
  path
    .iter()
    .map(|p| naming::sanitize(p).to_ascii_uppercase())
    .collect::<Vec<_>>()
    .join(".")
}

fn contains_grouping_parameter(expr: &Expr) -> bool {
  expr.any(&|e| matches!(e, Expr::Parameter(p) if p.ty == ValueType::Grouping))
}

fn is_group_key_member(expr: &Expr) -> bool {
  let expr = expr.unwrap_convert();
  if expr.is_group_key() {
    return true;
  }
  matches!(expr, Expr::Member { target, .. } if target.is_group_key())
}
