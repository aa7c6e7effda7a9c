//! # Expression Analyzers
//!
//! Read-only walkers shared by every clause builder.
//!
//! ## Overview
//!
//! - [`contains_aggregate`]: any aggregate call anywhere in the tree
//! - [`has_nested_aggregates`]: an aggregate whose argument subtree holds another
//! - [`has_non_aggregate_columns`]: a row column read outside any aggregate
//! - [`check_complexity`]: depth at most 50 and at most 1000 nodes
//! - [`check_output`]: non-empty output free of denylisted tokens
//!
//! The analyzers hold no state between calls and may be shared freely.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{ClauseKind, CompileError, Result};
use crate::expr::{Expr, Literal, ValueType};
use crate::functions;

/// Maximum nesting depth accepted by [`check_complexity`].
pub const MAX_DEPTH: usize = 50;

/// Maximum node count accepted by [`check_complexity`].
pub const MAX_NODES: usize = 1000;

/// Tokens that must never appear in generated clause text.
pub const DANGEROUS_PATTERNS: [&str; 15] = [
  "--", "/*", "*/", ";--", "';", "DROP", "DELETE", "INSERT", "UPDATE", "EXEC", "EXECUTE", "SP_",
  "XP_", "UNION", "SCRIPT",
];

// Keywords match on word boundaries so identifiers such as `UpdatedAt` pass.
static DANGEROUS_KEYWORDS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
  DANGEROUS_PATTERNS
    .iter()
    .filter(|p| p.chars().all(|c| c.is_ascii_alphabetic() || c == '_'))
    .filter_map(|p| {
      let pattern = if p.ends_with('_') {
        format!(r"\b{}", regex::escape(p))
      } else {
        format!(r"\b{}\b", regex::escape(p))
      };
      Regex::new(&pattern).ok().map(|re| (*p, re))
    })
    .collect()
});

/// Depth and node count of an expression tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Complexity {
  /// Longest root-to-leaf path, root at depth 0
  pub depth: usize,
  /// Total number of nodes
  pub nodes: usize,
}

/// Measures an expression tree.
pub fn measure(expr: &Expr) -> Complexity {
  fn go(e: &Expr, depth: usize, acc: &mut Complexity) {
    acc.nodes += 1;
    acc.depth = acc.depth.max(depth);
    for child in e.children() {
      go(child, depth + 1, acc);
    }
  }
  let mut acc = Complexity::default();
  go(expr, 0, &mut acc);
  acc
}

/// Rejects trees deeper than [`MAX_DEPTH`] or larger than [`MAX_NODES`].
pub fn check_complexity(expr: &Expr) -> Result<()> {
  let c = measure(expr);
  if c.depth > MAX_DEPTH {
    return Err(CompileError::semantic(
      ClauseKind::Model,
      format!(
        "Expression depth exceeds maximum allowed depth of {}. Consider simplifying the expression or breaking it into multiple operations.",
        MAX_DEPTH
      ),
    ));
  }
  if c.nodes > MAX_NODES {
    return Err(CompileError::semantic(
      ClauseKind::Model,
      format!(
        "Expression complexity exceeds maximum allowed nodes of {}. Current expression has {} nodes. Consider simplifying the expression or breaking it into multiple operations.",
        MAX_NODES, c.nodes
      ),
    ));
  }
  Ok(())
}

fn is_aggregate_call(expr: &Expr) -> bool {
  matches!(expr, Expr::Call { method, .. } if functions::is_aggregate(method))
}

/// True when any aggregate call occurs in the tree.
pub fn contains_aggregate(expr: &Expr) -> bool {
  expr.any(&is_aggregate_call)
}

/// Names of the aggregate methods used, in first-seen order.
pub fn aggregate_methods(expr: &Expr) -> Vec<String> {
  let mut found: Vec<String> = Vec::new();
  expr.walk(&mut |e| {
    if let Expr::Call { method, .. } = e {
      if functions::is_aggregate(method) && !found.iter().any(|m| m == method) {
        found.push(method.clone());
      }
    }
  });
  found
}

/// True when an aggregate call's arguments contain another aggregate call.
pub fn has_nested_aggregates(expr: &Expr) -> bool {
  fn go(e: &Expr, depth: usize) -> bool {
    if is_aggregate_call(e) {
      if depth > 0 {
        return true;
      }
      return e.children().into_iter().any(|c| go(c, depth + 1));
    }
    e.children().into_iter().any(|c| go(c, depth))
  }
  go(expr, 0)
}

/// Rejects nested aggregates for the given clause.
pub fn check_no_nested_aggregates(clause: ClauseKind, expr: &Expr) -> Result<()> {
  if has_nested_aggregates(expr) {
    return Err(CompileError::not_supported(clause, "Nested aggregate functions"));
  }
  Ok(())
}

/// Column names read outside aggregate arguments.
///
/// Grouping-key access (`g.Key.X`) is not a raw column and is not reported.
pub fn non_aggregate_columns(expr: &Expr) -> Vec<String> {
  fn go(e: &Expr, out: &mut Vec<String>) {
    if is_aggregate_call(e) {
      return;
    }
    if let Expr::Member { name, .. } = e {
      if let Some(p) = e.root_param() {
        if p.ty != ValueType::Grouping {
          out.push(name.clone());
          return;
        }
      }
    }
    for child in e.children() {
      go(child, out);
    }
  }
  let mut out = Vec::new();
  go(expr, &mut out);
  out
}

/// True when [`non_aggregate_columns`] is non-empty.
pub fn has_non_aggregate_columns(expr: &Expr) -> bool {
  !non_aggregate_columns(expr).is_empty()
}

/// CASE branches must share a type; untyped NULL matches anything.
pub fn check_conditional_types(if_true: &Expr, if_false: &Expr) -> Result<()> {
  let (a, b) = (if_true.ty(), if_false.ty());
  if a == ValueType::Unknown || b == ValueType::Unknown || a.underlying() == b.underlying() {
    return Ok(());
  }
  Err(CompileError::not_supported(
    ClauseKind::Select,
    format!("CASE expression type mismatch: {} and {}", a, b),
  ))
}

/// Renders a constant: NULL, single-quoted strings, lower-case booleans.
pub fn safe_to_string(lit: &Literal) -> String {
  match lit {
    Literal::Null => "NULL".to_string(),
    Literal::String(s) => format!("'{}'", s.replace('\'', "''")),
    Literal::Bool(b) => b.to_string(),
    Literal::Int(i) => i.to_string(),
    Literal::Float(f) => f.to_string(),
    Literal::List(items) => items.iter().map(safe_to_string).collect::<Vec<_>>().join(", "),
  }
}

/// Finds the first denylisted token in generated text.
pub fn find_dangerous_pattern(text: &str) -> Option<&'static str> {
  let upper = text.to_uppercase();
  for pattern in DANGEROUS_PATTERNS {
    let keyword = DANGEROUS_KEYWORDS.iter().find(|(p, _)| *p == pattern);
    let hit = match keyword {
      Some((_, re)) => re.is_match(&upper),
      None => upper.contains(pattern),
    };
    if hit {
      return Some(pattern);
    }
  }
  None
}

/// Output guard run on every clause builder result.
pub fn check_output(clause: ClauseKind, text: &str) -> Result<()> {
  if text.trim().is_empty() {
    return Err(CompileError::internal(format!(
      "{} builder produced empty result. This indicates an issue with the expression processing logic.",
      clause
    )));
  }
  if let Some(pattern) = find_dangerous_pattern(text) {
    return Err(CompileError::internal(format!(
      "Generated SQL contains potentially dangerous pattern: '{}'. Generated SQL: {}",
      pattern, text
    )));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::expr::Lambda;

  fn row() -> Expr {
    Expr::param("o", ValueType::record("Trade"))
  }

  fn sum_of(e: Expr) -> Expr {
    Expr::aggregate(
      Expr::param("g", ValueType::Grouping),
      "Sum",
      Some(Lambda::single("x", ValueType::record("Trade"), e)),
      ValueType::Double,
    )
  }

  #[test]
  fn test_aggregate_detection() {
    let agg = sum_of(row().member("Qty", ValueType::Int));
    assert!(contains_aggregate(&agg));
    assert!(!contains_aggregate(&row().member("Qty", ValueType::Int)));
    assert_eq!(aggregate_methods(&agg), vec!["Sum"]);
  }

  #[test]
  fn test_nested_aggregates() {
    let inner = sum_of(row().member("Qty", ValueType::Int));
    let outer = sum_of(inner.clone());
    assert!(has_nested_aggregates(&outer));
    assert!(!has_nested_aggregates(&inner));
    let side_by_side = inner.clone().plus(inner);
    assert!(!has_nested_aggregates(&side_by_side));
    assert!(check_no_nested_aggregates(ClauseKind::Having, &outer).is_err());
  }

  #[test]
  fn test_non_aggregate_columns() {
    let e = Expr::construct(vec![
      ("Total", sum_of(Expr::param("x", ValueType::record("Trade")).member("Qty", ValueType::Int))),
      ("Sym", row().member("Symbol", ValueType::String)),
    ]);
    assert_eq!(non_aggregate_columns(&e), vec!["Symbol"]);
    let key = Expr::param("g", ValueType::Grouping)
      .member("Key", ValueType::record("K"))
      .member("Symbol", ValueType::String);
    assert!(!has_non_aggregate_columns(&key));
  }

  #[test]
  fn test_depth_limit() {
    let mut e = row().member("A", ValueType::Int);
    for _ in 0..60 {
      e = Expr::negate(e);
    }
    let err = check_complexity(&e).unwrap_err();
    assert!(err.to_string().contains("maximum allowed depth of 50"));
  }

  #[test]
  fn test_node_limit() {
    let members: Vec<(String, Expr)> = (0..600)
      .map(|i| (format!("C{}", i), row().member(format!("C{}", i), ValueType::Int)))
      .collect();
    let e = Expr::construct(members);
    let err = check_complexity(&e).unwrap_err();
    assert!(err.to_string().contains("maximum allowed nodes of 1000"));
  }

  #[test]
  fn test_dangerous_patterns() {
    assert_eq!(find_dangerous_pattern("a = 1; DROP TABLE x"), Some("DROP"));
    assert_eq!(find_dangerous_pattern("a -- comment"), Some("--"));
    assert_eq!(find_dangerous_pattern("x UNION y"), Some("UNION"));
    assert_eq!(find_dangerous_pattern("UpdatedAt > 5"), None);
    assert_eq!(find_dangerous_pattern("sp_who"), Some("SP_"));
    assert!(check_output(ClauseKind::Where, "(Id = 1)").is_ok());
  }

  #[test]
  fn test_empty_output_is_internal() {
    let err = check_output(ClauseKind::GroupBy, "  ").unwrap_err();
    assert!(err.is_internal());
    assert!(err.to_string().contains("GROUP BY builder produced empty result"));
  }

  #[test]
  fn test_safe_to_string() {
    assert_eq!(safe_to_string(&Literal::Null), "NULL");
    assert_eq!(safe_to_string(&Literal::String("abc".into())), "'abc'");
    assert_eq!(safe_to_string(&Literal::Bool(true)), "true");
    assert_eq!(safe_to_string(&Literal::String("it's".into())), "'it''s'");
  }

  #[test]
  fn test_conditional_types() {
    assert!(check_conditional_types(&Expr::int(1), &Expr::int(2)).is_ok());
    assert!(check_conditional_types(&Expr::int(1), &Expr::null()).is_ok());
    assert!(check_conditional_types(&Expr::int(1), &Expr::string("x")).is_err());
  }
}
