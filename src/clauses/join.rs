//! JOIN builder: two-source equality joins.
//!
//! Input is a `Join` call shaped as
//! `Join(outer, inner, outerKey, innerKey[, result])`, where a call receiver
//! counts as the first argument. The builder emits a complete
//! `SELECT ... FROM outer o JOIN inner i ON ...` fragment.

use super::{ClauseBuilder, ClauseOutput, CompileContext};
use crate::error::{ClauseKind, CompileError, Result};
use crate::expr::{BinaryOp, Expr, Lambda, UnaryOp};

/// Maximum number of tables in one streaming join.
pub const MAX_TABLES: usize = 2;

const JOIN_METHODS: [&str; 6] = ["Join", "LeftJoin", "GroupJoin", "FullOuterJoin", "RightJoin", "CrossJoin"];

const UNSUPPORTED_PATTERNS: [(&str, &str); 4] = [
  ("GroupJoin", "GROUP JOIN (use regular JOIN with GROUP BY instead)"),
  ("FullOuterJoin", "FULL OUTER JOIN (not supported in KSQL)"),
  ("RightJoin", "RIGHT JOIN (use LEFT JOIN with swapped operands)"),
  ("CrossJoin", "CROSS JOIN (performance risk in streaming)"),
];

/// JOIN clause builder.
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinBuilder;

impl JoinBuilder {
  /// Creates the builder.
  pub fn new() -> Self {
    Self
  }
}

impl ClauseBuilder for JoinBuilder {
  fn kind(&self) -> ClauseKind {
    ClauseKind::Join
  }

  fn validate(&self, expr: &Expr, _ctx: &CompileContext) -> Result<()> {
    let tables = count_joins(expr) + 1;
    if tables > MAX_TABLES {
      return Err(CompileError::semantic(
        ClauseKind::Join,
        format!(
          "Stream processing supports maximum {} table joins. Found {} tables. Consider data denormalization or use batch processing for complex relationships. Alternative: Create materialized views or use event sourcing patterns.",
          MAX_TABLES, tables
        ),
      ));
    }
    let mut found = Vec::new();
    expr.walk(&mut |e| {
      if let Expr::Call { method, .. } = e {
        if let Some((_, label)) = UNSUPPORTED_PATTERNS.iter().find(|(m, _)| m == method) {
          if !found.contains(label) {
            found.push(*label);
          }
        }
      }
    });
    if !found.is_empty() {
      return Err(CompileError::semantic(
        ClauseKind::Join,
        format!(
          "Unsupported join patterns detected: {}. Supported: INNER, LEFT OUTER joins with co-partitioned data.",
          found.join(", ")
        ),
      ));
    }
    Ok(())
  }

  fn build_internal(&self, expr: &Expr, _ctx: &CompileContext) -> Result<ClauseOutput> {
    let Expr::Call {
      target,
      method,
      args,
      ..
    } = expr
    else {
      return Err(CompileError::not_supported(
        ClauseKind::Join,
        format!("Expression '{}' as a join", expr),
      ));
    };
    if method != "Join" {
      return Err(CompileError::semantic(
        ClauseKind::Join,
        "Only INNER JOIN is supported. Use Join() method for INNER JOIN operations.",
      ));
    }
    let all: Vec<&Expr> = target.iter().map(|t| t.as_ref()).chain(args.iter()).collect();
    if all.len() < 4 {
      return Err(CompileError::semantic(
        ClauseKind::Join,
        format!("JOIN operation requires at least 4 arguments, but got {}", all.len()),
      ));
    }

    let outer = source_name(all[0]);
    let inner = source_name(all[1]);
    let outer_key = as_lambda(all[2])?;
    let inner_key = as_lambda(all[3])?;
    let result = all.get(4).map(|e| as_lambda(e)).transpose()?;

    let outer_alias = outer_key.first_param().map(|p| p.name.as_str()).unwrap_or("o");
    let inner_alias = inner_key.first_param().map(|p| p.name.as_str()).unwrap_or("i");

    let outer_keys = key_members(&outer_key.body);
    let inner_keys = key_members(&inner_key.body);
    if outer_keys.is_empty() || outer_keys.len() != inner_keys.len() {
      return Err(CompileError::semantic(ClauseKind::Join, "JOIN keys mismatch or empty"));
    }
    for (o, i) in outer_keys.iter().zip(&inner_keys) {
      let (ot, it) = (o.ty(), i.ty());
      if ot.underlying() != it.underlying() {
        return Err(CompileError::semantic(
          ClauseKind::Join,
          format!(
            "JOIN key types must match. Outer key: {}, Inner key: {}. Ensure both tables are partitioned by the same key type for optimal performance.",
            ot, it
          ),
        ));
      }
    }

    tracing::warn!(
      outer = %outer,
      inner = %inner,
      "JOIN performance optimization: Ensure topics '{}' and '{}' have same partition count and key distribution.",
      outer,
      inner
    );

    let mut columns = Vec::new();
    let conditions = outer_keys
      .iter()
      .zip(&inner_keys)
      .map(|(o, i)| {
        let (l, r) = (leaf_name(o)?, leaf_name(i)?);
        columns.push(l.clone());
        Ok(format!("{}.{} = {}.{}", outer_alias, l, inner_alias, r))
      })
      .collect::<Result<Vec<_>>>()?;

    let projection = match result {
      Some(lambda) => Projection {
        lambda: &lambda,
        aliases: [outer_alias, inner_alias],
      }
      .render()?,
      None => format!("{}.*, {}.*", outer_alias, inner_alias),
    };

    let text = format!(
      "SELECT {} FROM {} {} JOIN {} {} ON {}",
      projection,
      outer,
      outer_alias,
      inner,
      inner_alias,
      conditions.join(" AND ")
    );
    let mut output = ClauseOutput::text(ClauseKind::Join, text);
    output.columns = columns;
    output.aliases = vec![outer_alias.to_string(), inner_alias.to_string()];
    Ok(output)
  }
}

fn count_joins(expr: &Expr) -> usize {
  let mut count = 0;
  expr.walk(&mut |e| {
    if matches!(e, Expr::Call { method, .. } if JOIN_METHODS.contains(&method.as_str())) {
      count += 1;
    }
  });
  count
}

fn source_name(expr: &Expr) -> String {
  match expr.unwrap_convert() {
    Expr::Source { name } => name.clone(),
    other => match other.ty() {
      crate::expr::ValueType::Record(name) => name,
      _ => other.to_string(),
    },
  }
}

fn as_lambda(expr: &Expr) -> Result<Lambda> {
  match expr.unwrap_convert() {
    Expr::Lambda(l) => Ok(l.as_ref().clone()),
    other => Err(CompileError::not_supported(
      ClauseKind::Join,
      format!("Key selector '{}'", other),
    )),
  }
}

fn key_members(body: &Expr) -> Vec<&Expr> {
  match body.unwrap_convert() {
    Expr::Construct { members, .. } => members.iter().map(|(_, e)| e.unwrap_convert()).collect(),
    member @ Expr::Member { .. } => vec![member],
    _ => Vec::new(),
  }
}

fn leaf_name(expr: &Expr) -> Result<String> {
  expr
    .member_name()
    .map(str::to_string)
    .ok_or_else(|| CompileError::not_supported(ClauseKind::Join, format!("Join key '{}'", expr)))
}

/// `=`, `!=`, `>`, `>=`, `<`, `<=`; anything else is rejected.
pub fn join_operator(op: BinaryOp) -> Result<&'static str> {
  Ok(match op {
    BinaryOp::Equal => "=",
    BinaryOp::NotEqual => "!=",
    BinaryOp::GreaterThan => ">",
    BinaryOp::GreaterThanOrEqual => ">=",
    BinaryOp::LessThan => "<",
    BinaryOp::LessThanOrEqual => "<=",
    other => {
      return Err(CompileError::not_supported(
        ClauseKind::Join,
        format!("Operator {} in JOIN clause", other),
      ));
    }
  })
}

struct Projection<'a> {
  lambda: &'a Lambda,
  aliases: [&'a str; 2],
}

impl Projection<'_> {
  fn render(&self) -> Result<String> {
    match self.lambda.body.unwrap_convert() {
      Expr::Construct { members, .. } => members
        .iter()
        .map(|(name, e)| Ok(format!("{} AS {}", self.value(e)?, name)))
        .collect::<Result<Vec<_>>>()
        .map(|parts| parts.join(", ")),
      other => self.value(other),
    }
  }

  fn value(&self, expr: &Expr) -> Result<String> {
    match expr {
      Expr::Member { name, .. } => Ok(format!("{}.{}", self.alias_of(expr), name)),
      Expr::Binary { op, left, right } => Ok(format!(
        "({} {} {})",
        self.value(left)?,
        join_operator(*op)?,
        self.value(right)?
      )),
      Expr::Unary {
        op: UnaryOp::Convert(_),
        operand,
      } => self.value(operand),
      Expr::Constant(lit) => Ok(crate::analysis::safe_to_string(lit)),
      other => Err(CompileError::not_supported(
        ClauseKind::Join,
        format!("Projection expression '{}'", other),
      )),
    }
  }

  /// Result-selector parameters map positionally onto the source aliases.
  fn alias_of(&self, expr: &Expr) -> String {
    let Some(root) = expr.root_param() else {
      return self.aliases[0].to_string();
    };
    match self.lambda.params.iter().position(|p| p.name == root.name) {
      Some(index) if index < 2 => self.aliases[index].to_string(),
      _ => root.name.clone(),
    }
  }
}
