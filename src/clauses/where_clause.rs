//! WHERE builder: boolean predicates into `AND`/`OR`/comparison text.
//!
//! Column references keep their declared casing and only the leaf member name
//! is emitted, prefixed with the source alias when the context maps the
//! predicate parameter to one.

use super::{lambda_body, referenced_columns, ClauseBuilder, ClauseOutput, CompileContext};
use crate::analysis;
use crate::error::{ClauseKind, CompileError, Result};
use crate::expr::{BinaryOp, Expr, Literal, UnaryOp, ValueType};
use crate::functions::FunctionTranslator;

/// WHERE clause builder.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhereBuilder;

impl WhereBuilder {
  /// Creates the builder.
  pub fn new() -> Self {
    Self
  }
}

impl ClauseBuilder for WhereBuilder {
  fn kind(&self) -> ClauseKind {
    ClauseKind::Where
  }

  fn validate(&self, expr: &Expr, _ctx: &CompileContext) -> Result<()> {
    let body = lambda_body(expr);
    if analysis::contains_aggregate(body) {
      return Err(CompileError::semantic(
        ClauseKind::Where,
        "Aggregate functions are not allowed in WHERE clause. Use HAVING clause instead.",
      ));
    }
    if body.to_string().to_uppercase().contains("SELECT") {
      return Err(CompileError::semantic(
        ClauseKind::Where,
        "Subqueries are not supported in WHERE clause in KSQL",
      ));
    }
    Ok(())
  }

  fn build_internal(&self, expr: &Expr, ctx: &CompileContext) -> Result<ClauseOutput> {
    let body = lambda_body(expr);
    let text = WhereVisitor { ctx }.condition(body)?;
    let mut output = ClauseOutput::text(ClauseKind::Where, text);
    output.columns = referenced_columns(body);
    Ok(output)
  }
}

struct WhereVisitor<'c> {
  ctx: &'c CompileContext,
}

impl WhereVisitor<'_> {
  fn condition(&self, expr: &Expr) -> Result<String> {
    match expr {
      Expr::Binary { op, left, right } => self.binary(*op, left, right),
      Expr::Unary { op: UnaryOp::Not, operand } => self.negation(operand),
      Expr::Unary {
        op: UnaryOp::Convert(_),
        operand,
      } => self.condition(operand),
      Expr::Member { .. } => self.member_access(expr),
      Expr::Lambda(l) => self.condition(&l.body),
      other => self.operand(other),
    }
  }

  fn operand(&self, expr: &Expr) -> Result<String> {
    match expr {
      Expr::Member { .. } => self.member_name(expr),
      Expr::Constant(lit) => Ok(analysis::safe_to_string(lit)),
      Expr::Call { .. } => self.method_call(expr),
      Expr::Binary { op, left, right } => self.binary(*op, left, right),
      Expr::Unary { op, operand } => match op {
        UnaryOp::Convert(_) => self.operand(operand),
        UnaryOp::Not => self.negation(operand),
        UnaryOp::Negate => Ok(format!("-{}", self.operand(operand)?)),
      },
      Expr::Conditional {
        test,
        if_true,
        if_false,
      } => Ok(format!(
        "CASE WHEN {} THEN {} ELSE {} END",
        self.condition(test)?,
        self.operand(if_true)?,
        self.operand(if_false)?
      )),
      Expr::Lambda(l) => self.operand(&l.body),
      Expr::Parameter(_) | Expr::Construct { .. } | Expr::Source { .. } => Err(CompileError::not_supported(
        ClauseKind::Where,
        format!("Expression '{}'", expr),
      )),
    }
  }

  fn binary(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<String> {
    let is_null = |e: &Expr| matches!(e.unwrap_convert(), Expr::Constant(Literal::Null));
    match op {
      BinaryOp::Equal | BinaryOp::NotEqual if is_null(left) || is_null(right) => {
        let subject = if is_null(left) { right } else { left };
        let not = if op == BinaryOp::NotEqual { "NOT " } else { "" };
        return Ok(format!("{} IS {}NULL", self.operand(subject)?, not));
      }
      BinaryOp::Equal => {
        if let (Expr::Construct { members: l, .. }, Expr::Construct { members: r, .. }) =
          (left.unwrap_convert(), right.unwrap_convert())
        {
          return self.composite_key(l, r);
        }
      }
      BinaryOp::Coalesce => {
        return Ok(format!("COALESCE({}, {})", self.operand(left)?, self.operand(right)?));
      }
      _ => {}
    }
    let (l, r) = if op.is_logical() {
      (self.condition(left)?, self.condition(right)?)
    } else {
      (self.operand(left)?, self.operand(right)?)
    };
    Ok(format!("({} {} {})", l, where_operator(op)?, r))
  }

  fn composite_key(&self, left: &[(String, Expr)], right: &[(String, Expr)]) -> Result<String> {
    if left.len() != right.len() {
      return Err(CompileError::semantic(
        ClauseKind::Where,
        "Composite key expressions must have the same number of properties",
      ));
    }
    let conditions = left
      .iter()
      .zip(right)
      .map(|((_, l), (_, r))| Ok(format!("{} = {}", self.operand(l)?, self.operand(r)?)))
      .collect::<Result<Vec<_>>>()?;
    Ok(match conditions.as_slice() {
      [single] => single.clone(),
      _ => format!("({})", conditions.join(" AND ")),
    })
  }

  fn negation(&self, operand: &Expr) -> Result<String> {
    let operand = operand.unwrap_convert();
    if let Some(inner) = nullable_bool_value(operand) {
      return Ok(format!("({} = false)", self.member_name(inner)?));
    }
    if matches!(operand, Expr::Member { ty, .. } if ty.is_bool()) {
      return Ok(format!("({} = false)", self.member_name(operand)?));
    }
    if let Some((values, item)) = list_contains(operand) {
      return self.in_list(values, item, true);
    }
    Ok(format!("NOT ({})", self.condition(operand)?))
  }

  fn member_access(&self, expr: &Expr) -> Result<String> {
    if let Some(inner) = nullable_bool_value(expr) {
      return Ok(format!("({} = true)", self.member_name(inner)?));
    }
    if let Expr::Member { target, name, ty } = expr {
      if name == "HasValue" && target.ty().is_nullable() {
        return Ok(format!("{} IS NOT NULL", self.member_name(target)?));
      }
      if ty.is_bool() {
        return Ok(format!("({} = true)", self.member_name(expr)?));
      }
    }
    self.member_name(expr)
  }

  fn member_name(&self, expr: &Expr) -> Result<String> {
    let Expr::Member { name, .. } = expr.unwrap_convert() else {
      return self.operand(expr);
    };
    Ok(match expr.root_param().and_then(|p| self.ctx.alias_for(&p.name)) {
      Some(alias) => format!("{}.{}", alias, name),
      None => name.clone(),
    })
  }

  fn method_call(&self, expr: &Expr) -> Result<String> {
    let Expr::Call {
      target,
      method,
      args,
      ..
    } = expr
    else {
      return self.operand(expr);
    };
    if let Some((values, item)) = list_contains(expr) {
      return self.in_list(values, item, false);
    }
    match (method.as_str(), target.as_deref(), args.as_slice()) {
      ("Contains", Some(t), [value]) => {
        return Ok(format!("INSTR({}, {}) > 0", self.operand(t)?, self.operand(value)?));
      }
      ("StartsWith", Some(t), [value]) => {
        return Ok(format!("STARTS_WITH({}, {})", self.operand(t)?, self.operand(value)?));
      }
      ("EndsWith", Some(t), [value]) => {
        return Ok(format!("ENDS_WITH({}, {})", self.operand(t)?, self.operand(value)?));
      }
      _ => {}
    }
    let render = |e: &Expr| self.member_name(e).ok();
    FunctionTranslator::new(ClauseKind::Where)
      .with_member_renderer(&render)
      .with_decimal(self.ctx.decimal_precision, self.ctx.decimal_scale)
      .translate(expr)
  }

  fn in_list(&self, values: &Expr, item: &Expr, negated: bool) -> Result<String> {
    let Expr::Constant(Literal::List(items)) = values.unwrap_convert() else {
      return Err(CompileError::not_supported(
        ClauseKind::Where,
        format!("Contains over non-constant collection '{}'", values),
      ));
    };
    let joined = items.iter().map(analysis::safe_to_string).collect::<Vec<_>>().join(", ");
    let op = if negated { "NOT IN" } else { "IN" };
    Ok(format!("{} {} ({})", self.operand(item)?, op, joined))
  }
}

fn where_operator(op: BinaryOp) -> Result<&'static str> {
  if op == BinaryOp::NotEqual {
    return Ok("!=");
  }
  super::arithmetic_or_comparison_operator(op).ok_or_else(|| {
    CompileError::not_supported(ClauseKind::Where, format!("Operator {}", op))
  })
}

/// `m.Value` on a nullable boolean member, returning `m`.
fn nullable_bool_value(expr: &Expr) -> Option<&Expr> {
  match expr {
    Expr::Member { target, name, .. }
      if name == "Value" && matches!(target.ty(), ValueType::Nullable(ref inner) if inner.is_bool()) =>
    {
      Some(target)
    }
    _ => None,
  }
}

/// `list.Contains(item)` or `Contains(list, item)` over a collection.
fn list_contains(expr: &Expr) -> Option<(&Expr, &Expr)> {
  match expr {
    Expr::Call {
      target: Some(t),
      method,
      args,
      ..
    } if method == "Contains" && args.len() == 1 && t.ty().is_list() => Some((t, &args[0])),
    Expr::Call {
      target: None,
      method,
      args,
      ..
    } if method == "Contains" && args.len() == 2 && args[0].ty().is_list() => Some((&args[0], &args[1])),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::expr::{Lambda, Param};

  fn o() -> Expr {
    Expr::param("o", ValueType::record("Order"))
  }

  fn build(body: Expr, ctx: &CompileContext) -> Result<String> {
    let lambda = Lambda::single("o", ValueType::record("Order"), body);
    WhereBuilder::new().build_lambda(&lambda, ctx).map(|o| o.text)
  }

  fn plain(body: Expr) -> String {
    build(body, &CompileContext::new()).unwrap()
  }

  #[test]
  fn test_simple_comparison() {
    assert_eq!(plain(o().member("Id", ValueType::Int).equals(Expr::int(1))), "(Id = 1)");
    assert_eq!(
      plain(o().member("Id", ValueType::Int).not_equals(Expr::int(1))),
      "(Id != 1)"
    );
  }

  #[test]
  fn test_null_comparisons() {
    let name = o().member("Name", ValueType::String);
    assert_eq!(plain(name.clone().equals(Expr::null())), "Name IS NULL");
    assert_eq!(plain(Expr::null().not_equals(name)), "Name IS NOT NULL");
  }

  #[test]
  fn test_has_value_and_bool_members() {
    let discount = o().member("Discount", ValueType::Decimal.nullable());
    assert_eq!(plain(discount.member("HasValue", ValueType::Bool)), "Discount IS NOT NULL");
    let active = o().member("IsActive", ValueType::Bool);
    assert_eq!(plain(active.clone()), "(IsActive = true)");
    assert_eq!(plain(Expr::logical_not(active)), "(IsActive = false)");
    let flag = o().member("Flag", ValueType::Bool.nullable());
    assert_eq!(plain(flag.member("Value", ValueType::Bool)), "(Flag = true)");
  }

  #[test]
  fn test_logical_operators() {
    let e = o()
      .member("Price", ValueType::Double)
      .gt(Expr::int(10))
      .and_also(o().member("Name", ValueType::String).not_equals(Expr::null()));
    assert_eq!(plain(e), "((Price > 10) AND Name IS NOT NULL)");
  }

  #[test]
  fn test_composite_key_equality_with_aliases() {
    let i = Expr::param("i", ValueType::record("Customer"));
    let e = Expr::construct(vec![
      ("A", o().member("A", ValueType::Int)),
      ("B", o().member("B", ValueType::Int)),
    ])
    .equals(Expr::construct(vec![
      ("A", i.clone().member("A", ValueType::Int)),
      ("B", i.member("B", ValueType::Int)),
    ]));
    let lambda = Lambda::pair(
      Param::new("o", ValueType::record("Order")),
      Param::new("i", ValueType::record("Customer")),
      e,
    );
    let ctx = CompileContext::new().with_alias("o", "o").with_alias("i", "i");
    let out = WhereBuilder::new().build_lambda(&lambda, &ctx).unwrap();
    assert_eq!(out.text, "(o.A = i.A AND o.B = i.B)");
  }

  #[test]
  fn test_contains_variants() {
    let name = o().member("Name", ValueType::String);
    assert_eq!(
      plain(name.call("Contains", vec![Expr::string("abc")], ValueType::Bool)),
      "INSTR(Name, 'abc') > 0"
    );
    let regions = Expr::constant(Literal::List(vec![
      Literal::String("EU".into()),
      Literal::String("US".into()),
    ]));
    let region = o().member("Region", ValueType::String);
    let contains = regions.call("Contains", vec![region], ValueType::Bool);
    assert_eq!(plain(contains.clone()), "Region IN ('EU', 'US')");
    assert_eq!(plain(Expr::logical_not(contains)), "Region NOT IN ('EU', 'US')");
  }

  #[test]
  fn test_starts_and_ends_with() {
    let name = o().member("Name", ValueType::String);
    assert_eq!(
      plain(name.clone().call("StartsWith", vec![Expr::string("A")], ValueType::Bool)),
      "STARTS_WITH(Name, 'A')"
    );
    assert_eq!(
      plain(name.call("EndsWith", vec![Expr::string("z")], ValueType::Bool)),
      "ENDS_WITH(Name, 'z')"
    );
  }

  #[test]
  fn test_aggregate_is_rejected() {
    let g = Expr::param("g", ValueType::Grouping);
    let e = Expr::aggregate(g, "Count", None, ValueType::Long).gt(Expr::int(1));
    let err = build(e, &CompileContext::new()).unwrap_err();
    assert!(err.to_string().contains("Use HAVING clause instead"));
  }

  #[test]
  fn test_subquery_trace_is_rejected() {
    let items = o().member("Items", ValueType::List(Box::new(ValueType::Int)));
    let e = items
      .call("Select", vec![], ValueType::List(Box::new(ValueType::Int)))
      .call("Any", vec![], ValueType::Bool);
    let err = build(e, &CompileContext::new()).unwrap_err();
    assert!(err.to_string().contains("Subqueries are not supported"));
  }

  #[test]
  fn test_function_in_condition() {
    let e = o()
      .member("Name", ValueType::String)
      .call("ToUpper", vec![], ValueType::String)
      .equals(Expr::string("X"));
    assert_eq!(plain(e), "(UPPER(Name) = 'X')");
  }
}
