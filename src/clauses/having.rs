//! HAVING builder: post-aggregation filters.
//!
//! Every leaf column must either sit inside an aggregate call or be one of
//! the GROUP BY keys carried by the [`CompileContext`] (a `g.Key.X` access
//! always qualifies).

use super::{lambda_body, ClauseBuilder, ClauseOutput, CompileContext};
use crate::analysis;
use crate::error::{ClauseKind, CompileError, Result};
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::functions::{self, FunctionTranslator};

/// HAVING clause builder.
#[derive(Debug, Clone, Copy, Default)]
pub struct HavingBuilder;

impl HavingBuilder {
  /// Creates the builder.
  pub fn new() -> Self {
    Self
  }
}

impl ClauseBuilder for HavingBuilder {
  fn kind(&self) -> ClauseKind {
    ClauseKind::Having
  }

  fn validate(&self, expr: &Expr, ctx: &CompileContext) -> Result<()> {
    let body = lambda_body(expr);
    analysis::check_no_nested_aggregates(ClauseKind::Having, body)?;
    for column in analysis::non_aggregate_columns(body) {
      if !is_group_key(ctx, &column) {
        return Err(CompileError::semantic(
          ClauseKind::Having,
          "HAVING clause can only reference aggregate functions or columns in GROUP BY clause",
        ));
      }
    }
    Ok(())
  }

  fn build_internal(&self, expr: &Expr, ctx: &CompileContext) -> Result<ClauseOutput> {
    let body = lambda_body(expr);
    let text = HavingVisitor { ctx }.render(body)?;
    let mut output = ClauseOutput::text(ClauseKind::Having, text);
    output.has_aggregates = analysis::contains_aggregate(body);
    output.columns = analysis::non_aggregate_columns(body);
    Ok(output)
  }
}

/// Keys may be alias-qualified (`o.Broker`); compare on the leaf name.
fn is_group_key(ctx: &CompileContext, column: &str) -> bool {
  ctx.group_by_keys.iter().any(|key| {
    let leaf = key.rsplit('.').next().unwrap_or(key);
    leaf.eq_ignore_ascii_case(column)
  })
}

struct HavingVisitor<'c> {
  ctx: &'c CompileContext,
}

impl HavingVisitor<'_> {
  fn render(&self, expr: &Expr) -> Result<String> {
    match expr {
      Expr::Binary {
        op: BinaryOp::Coalesce,
        left,
        right,
      } => Ok(format!("COALESCE({}, {})", self.render(left)?, self.render(right)?)),
      Expr::Binary { op, left, right } => {
        let symbol = super::arithmetic_or_comparison_operator(*op).ok_or_else(|| {
          CompileError::not_supported(ClauseKind::Having, format!("Operator {}", op))
        })?;
        Ok(format!("({} {} {})", self.render(left)?, symbol, self.render(right)?))
      }
      Expr::Unary { op, operand } => match op {
        UnaryOp::Not => Ok(format!("NOT ({})", self.render(operand)?)),
        UnaryOp::Negate => Ok(format!("-{}", self.render(operand)?)),
        UnaryOp::Convert(_) => self.render(operand),
      },
      Expr::Member { .. } => Ok(self.member(expr, false)),
      Expr::Constant(lit) => Ok(analysis::safe_to_string(lit)),
      Expr::Call { method, .. } if functions::is_aggregate(method) => self.aggregate(expr),
      Expr::Call { .. } => {
        let render = |e: &Expr| matches!(e, Expr::Member { .. }).then(|| self.member(e, false));
        FunctionTranslator::new(ClauseKind::Having)
          .with_member_renderer(&render)
          .with_decimal(self.ctx.decimal_precision, self.ctx.decimal_scale)
          .translate(expr)
      }
      Expr::Conditional {
        test,
        if_true,
        if_false,
      } => Ok(format!(
        "CASE WHEN {} THEN {} ELSE {} END",
        self.render(test)?,
        self.render(if_true)?,
        self.render(if_false)?
      )),
      Expr::Lambda(l) => self.render(&l.body),
      other => Err(CompileError::not_supported(
        ClauseKind::Having,
        format!("Expression type '{}'", super::group_by::node_kind(other)),
      )),
    }
  }

  fn aggregate(&self, expr: &Expr) -> Result<String> {
    let Expr::Call {
      target,
      method,
      args,
      ..
    } = expr
    else {
      return self.render(expr);
    };
    let effective = functions::effective_args(target.as_deref(), args);
    let explicit_source = target.is_none() && !args.is_empty();
    if method == "Count" {
      if explicit_source && args.len() == 2 {
        return Err(CompileError::semantic(
          ClauseKind::Having,
          "Conditional Count is not supported in KSQL HAVING clause. Use WHERE clause instead.",
        ));
      }
      return match effective.as_slice() {
        [] | [Expr::Lambda(_)] => Ok("COUNT(*)".to_string()),
        [only] if only.is_implicit_receiver() => Ok("COUNT(*)".to_string()),
        [first, ..] => Ok(format!("COUNT({})", self.render(first)?)),
      };
    }
    let function = functions::aggregate_name(method);
    let selector = effective
      .iter()
      .find(|a| matches!(a, Expr::Lambda(_)))
      .or_else(|| effective.iter().rev().find(|a| !a.is_implicit_receiver()));
    match selector {
      Some(arg) => Ok(format!("{}({})", function, self.column(arg)?)),
      None => Ok(format!("{}(*)", function)),
    }
  }

  fn column(&self, arg: &Expr) -> Result<String> {
    let body = lambda_body(arg);
    match body.unwrap_convert() {
      member @ Expr::Member { .. } => Ok(self.member(member, true)),
      other => self.render(other),
    }
  }

  /// Member name, prefixed with its source alias when the context maps one.
  /// Aggregate selector parameters fall back to the first mapped alias.
  fn member(&self, expr: &Expr, in_aggregate: bool) -> String {
    let Expr::Member { name, .. } = expr else {
      return expr.to_string();
    };
    let alias = expr
      .root_param()
      .and_then(|p| self.ctx.alias_for(&p.name))
      .or_else(|| if in_aggregate { self.ctx.first_alias() } else { None });
    match alias {
      Some(alias) => format!("{}.{}", alias, name),
      None => name.clone(),
    }
  }
}
