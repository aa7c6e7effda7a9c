//! GROUP BY builder: key selectors into an ordered, comma-joined key list.
//!
//! A key selector is a single member, a scalar function over members, or an
//! anonymous/record construction whose members become the keys in declared
//! order. Nested constructions are flattened. The produced key list is
//! returned in [`ClauseOutput::keys`] so later clauses can check against it.

use super::{lambda_body, referenced_columns, ClauseBuilder, ClauseOutput, CompileContext};
use crate::analysis;
use crate::error::{ClauseKind, CompileError, Result};
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::functions::{self, FunctionTranslator};
use crate::naming;

/// Maximum number of GROUP BY keys.
pub const MAX_KEYS: usize = 10;

/// GROUP BY clause builder.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupByBuilder;

impl GroupByBuilder {
  /// Creates the builder.
  pub fn new() -> Self {
    Self
  }
}

impl ClauseBuilder for GroupByBuilder {
  fn kind(&self) -> ClauseKind {
    ClauseKind::GroupBy
  }

  fn validate(&self, expr: &Expr, _ctx: &CompileContext) -> Result<()> {
    let body = lambda_body(expr);
    if analysis::contains_aggregate(body) {
      return Err(CompileError::semantic(
        ClauseKind::GroupBy,
        "Aggregate functions are not allowed in GROUP BY clause",
      ));
    }
    let count = key_count(body);
    if count > MAX_KEYS {
      return Err(CompileError::semantic(
        ClauseKind::GroupBy,
        format!(
          "GROUP BY supports maximum {} keys for optimal performance. Found {} keys. Consider using composite keys or data denormalization.",
          MAX_KEYS, count
        ),
      ));
    }
    Ok(())
  }

  fn build_internal(&self, expr: &Expr, ctx: &CompileContext) -> Result<ClauseOutput> {
    let body = lambda_body(expr);
    let mut keys = Vec::new();
    KeyVisitor { ctx }.collect(body, &mut keys)?;
    if keys.is_empty() {
      return Err(CompileError::semantic(
        ClauseKind::GroupBy,
        "Unable to extract GROUP BY keys from expression",
      ));
    }
    let mut output = ClauseOutput::text(ClauseKind::GroupBy, keys.join(", "));
    output.keys = keys;
    output.columns = referenced_columns(body);
    Ok(output)
  }
}

fn key_count(expr: &Expr) -> usize {
  match expr.unwrap_convert() {
    Expr::Construct { members, .. } => members.iter().map(|(_, e)| key_count(e)).sum(),
    Expr::Lambda(l) => key_count(&l.body),
    _ => 1,
  }
}

/// Short node-kind label used in diagnostics.
pub(crate) fn node_kind(expr: &Expr) -> &'static str {
  match expr {
    Expr::Parameter(_) => "Parameter",
    Expr::Member { .. } => "MemberAccess",
    Expr::Constant(_) => "Constant",
    Expr::Binary { .. } => "Binary",
    Expr::Unary { .. } => "Unary",
    Expr::Call { .. } => "Call",
    Expr::Conditional { .. } => "Conditional",
    Expr::Construct { .. } => "New",
    Expr::Lambda(_) => "Lambda",
    Expr::Source { .. } => "Source",
  }
}

struct KeyVisitor<'c> {
  ctx: &'c CompileContext,
}

impl KeyVisitor<'_> {
  fn collect(&self, expr: &Expr, keys: &mut Vec<String>) -> Result<()> {
    match expr.unwrap_convert() {
      Expr::Construct { members, .. } => {
        for (_, member) in members {
          self.collect(member, keys)?;
        }
        Ok(())
      }
      Expr::Lambda(l) => self.collect(&l.body, keys),
      other => {
        keys.push(self.key(other)?);
        Ok(())
      }
    }
  }

  fn key(&self, expr: &Expr) -> Result<String> {
    match expr {
      Expr::Member { .. } => Ok(self.member(expr)),
      Expr::Call { method, .. } => {
        let allowed = functions::mapping(method).is_some_and(|m| m.allowed_in_group_by);
        if !allowed {
          return Err(CompileError::semantic(
            ClauseKind::GroupBy,
            format!("Function '{}' is not allowed in GROUP BY clause", method),
          ));
        }
        let render = |e: &Expr| match e {
          Expr::Member { .. } => Some(self.member(e)),
          _ => None,
        };
        FunctionTranslator::new(ClauseKind::GroupBy)
          .with_member_renderer(&render)
          .with_decimal(self.ctx.decimal_precision, self.ctx.decimal_scale)
          .translate(expr)
      }
      Expr::Binary {
        op: BinaryOp::Coalesce,
        left,
        right,
      } => Ok(format!("COALESCE({}, {})", self.key(left)?, self.key(right)?)),
      Expr::Binary { op, left, right } => {
        let symbol = super::arithmetic_or_comparison_operator(*op).ok_or_else(|| {
          CompileError::not_supported(ClauseKind::GroupBy, format!("Operator {}", op))
        })?;
        Ok(format!("{} {} {}", self.key(left)?, symbol, self.key(right)?))
      }
      Expr::Unary {
        op: UnaryOp::Convert(_),
        operand,
      } => self.key(operand),
      Expr::Constant(_) => Err(CompileError::not_supported(
        ClauseKind::GroupBy,
        "Constant expression",
      )),
      Expr::Lambda(l) => self.key(&l.body),
      other => Err(CompileError::not_supported(
        ClauseKind::GroupBy,
        format!("Expression type '{}'", node_kind(other)),
      )),
    }
  }

  fn member(&self, expr: &Expr) -> String {
    let Expr::Member { name, .. } = expr else {
      return expr.to_string();
    };
    let alias = expr.root_param().and_then(|p| self.ctx.alias_for(&p.name));
    if self.ctx.force_prefix_all {
      let prefix = alias.unwrap_or(self.ctx.override_source_alias.as_str());
      return format!("{}.{}", prefix, naming::sanitize(name).to_uppercase());
    }
    match alias {
      Some(alias) => format!("{}.{}", alias, name),
      None => name.clone(),
    }
  }
}
