//! ORDER BY builder: `column direction` pairs from an ordering chain.
//!
//! The input is either a single key-selector lambda (ascending) or a chain of
//! `OrderBy`/`OrderByDescending`/`ThenBy`/`ThenByDescending` calls whose
//! receivers link back to the source.

use super::{ClauseBuilder, ClauseOutput, CompileContext};
use crate::error::{ClauseKind, CompileError, Result};
use crate::expr::{Expr, Lambda};
use crate::functions::{self, FunctionTranslator};

/// Maximum number of sort columns.
pub const MAX_COLUMNS: usize = 5;

/// Sort direction of one ORDER BY column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  /// Ascending
  Asc,
  /// Descending
  Desc,
}

impl Direction {
  fn keyword(self) -> &'static str {
    match self {
      Direction::Asc => "ASC",
      Direction::Desc => "DESC",
    }
  }
}

/// ORDER BY clause builder.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderByBuilder;

impl OrderByBuilder {
  /// Creates the builder.
  pub fn new() -> Self {
    Self
  }
}

impl ClauseBuilder for OrderByBuilder {
  fn kind(&self) -> ClauseKind {
    ClauseKind::OrderBy
  }

  fn validate(&self, expr: &Expr, _ctx: &CompileContext) -> Result<()> {
    tracing::info!(
      "ORDER BY in KSQL is limited to Pull Queries and specific scenarios. Push Queries (streaming) do not guarantee order due to distributed processing."
    );
    let selectors = key_selectors(expr)?;
    for (_, lambda) in &selectors {
      if is_complex(&lambda.body) {
        return Err(CompileError::semantic(
          ClauseKind::OrderBy,
          "ORDER BY in KSQL should use simple column references. Complex expressions in ORDER BY may not be supported.",
        ));
      }
    }
    if selectors.len() > MAX_COLUMNS {
      return Err(CompileError::semantic(
        ClauseKind::OrderBy,
        format!(
          "ORDER BY supports maximum {} columns for optimal performance. Found {} columns. Consider reducing sort columns.",
          MAX_COLUMNS,
          selectors.len()
        ),
      ));
    }
    Ok(())
  }

  fn build_internal(&self, expr: &Expr, ctx: &CompileContext) -> Result<ClauseOutput> {
    let mut parts = Vec::new();
    let mut columns = Vec::new();
    for (direction, lambda) in key_selectors(expr)? {
      let column = column_name(&lambda.body, ctx)?;
      parts.push(format!("{} {}", column, direction.keyword()));
      columns.push(column);
    }
    if parts.is_empty() {
      return Err(CompileError::semantic(
        ClauseKind::OrderBy,
        "Unable to extract ORDER BY columns from expression",
      ));
    }
    let mut output = ClauseOutput::text(ClauseKind::OrderBy, parts.join(", "));
    output.columns = columns;
    Ok(output)
  }
}

/// Key selectors in application order, innermost call first.
fn key_selectors(expr: &Expr) -> Result<Vec<(Direction, &Lambda)>> {
  let mut out = Vec::new();
  collect(expr, &mut out)?;
  Ok(out)
}

fn collect<'e>(expr: &'e Expr, out: &mut Vec<(Direction, &'e Lambda)>) -> Result<()> {
  match expr.unwrap_convert() {
    Expr::Lambda(l) => {
      out.push((Direction::Asc, l.as_ref()));
      Ok(())
    }
    Expr::Call {
      target,
      method,
      args,
      ..
    } => {
      let direction = match method.as_str() {
        "OrderBy" | "ThenBy" => Direction::Asc,
        "OrderByDescending" | "ThenByDescending" => Direction::Desc,
        other => {
          return Err(CompileError::not_supported(
            ClauseKind::OrderBy,
            format!("Method '{}' in an ordering chain", other),
          ));
        }
      };
      if let Some(t) = target {
        collect(t, out)?;
      }
      if let Some(Expr::Lambda(l)) = args.iter().map(Expr::unwrap_convert).find(|a| matches!(a, Expr::Lambda(_))) {
        out.push((direction, l.as_ref()));
      }
      Ok(())
    }
    Expr::Source { .. } | Expr::Parameter(_) => Ok(()),
    other => Err(CompileError::not_supported(
      ClauseKind::OrderBy,
      format!("Unsupported ORDER BY expression: {}", super::group_by::node_kind(other)),
    )),
  }
}

fn is_complex(body: &Expr) -> bool {
  match body.unwrap_convert() {
    Expr::Binary { .. } | Expr::Conditional { .. } => true,
    Expr::Call { method, .. } => {
      method != "RowTime" && !functions::mapping(method).is_some_and(|m| m.allowed_in_order_by)
    }
    _ => false,
  }
}

fn column_name(body: &Expr, ctx: &CompileContext) -> Result<String> {
  match body.unwrap_convert() {
    member @ Expr::Member { name, .. } => Ok(
      match member.root_param().and_then(|p| ctx.alias_for(&p.name)) {
        Some(alias) => format!("{}.{}", alias, name),
        None => name.clone(),
      },
    ),
    Expr::Call { method, .. } if method == "RowTime" => Ok("ROWTIME".to_string()),
    call @ Expr::Call { method, .. } => {
      if !functions::mapping(method).is_some_and(|m| m.allowed_in_order_by) {
        return Err(CompileError::semantic(
          ClauseKind::OrderBy,
          format!("Function '{}' is not supported in ORDER BY clause", method),
        ));
      }
      FunctionTranslator::new(ClauseKind::OrderBy).translate(call)
    }
    other => Err(CompileError::not_supported(
      ClauseKind::OrderBy,
      format!("Unsupported ORDER BY expression: {}", super::group_by::node_kind(other)),
    )),
  }
}
