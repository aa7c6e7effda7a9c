//! # Function Registry and Translation
//!
//! Maps host-language method names (`ToUpper`, `Sum`, `AddDays`, ...) to
//! ksqlDB functions and renders method-call nodes into dialect text.
//!
//! ## Overview
//!
//! The registry is a process-wide, read-only table built on first use. Each
//! entry records the dialect function (or a `{0}`/`{1}` placeholder
//! template), its argument-count range, whether it needs special handling,
//! and whether it may appear inside GROUP BY or ORDER BY keys.
//!
//! Member rendering is pluggable: clause visitors hand the translator a
//! closure that renders column references their own way (upper-casing,
//! alias prefixing). The translator never reaches for ambient state.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::analysis;
use crate::error::{ClauseKind, CompileError, Result};
use crate::expr::{BinaryOp, Expr, UnaryOp, ValueType};

/// Dialect mapping for one host method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionMapping {
  /// Dialect function name, or the template text for templated mappings
  pub function: &'static str,
  /// Minimum effective argument count
  pub min_args: usize,
  /// Maximum effective argument count (`usize::MAX` when unbounded)
  pub max_args: usize,
  /// Rendered by a dedicated handler rather than `NAME(args)`
  pub special: bool,
  /// Placeholder template (`{0}`, `{1}`, ...)
  pub template: Option<&'static str>,
  /// Accepted as (part of) a GROUP BY key
  pub allowed_in_group_by: bool,
  /// Accepted as an ORDER BY key
  pub allowed_in_order_by: bool,
}

impl FunctionMapping {
  const fn range(function: &'static str, min_args: usize, max_args: usize) -> Self {
    Self {
      function,
      min_args,
      max_args,
      special: false,
      template: None,
      allowed_in_group_by: false,
      allowed_in_order_by: false,
    }
  }

  const fn exact(function: &'static str, args: usize) -> Self {
    Self::range(function, args, args)
  }

  const fn templated(template: &'static str, args: usize) -> Self {
    let mut m = Self::exact(template, args);
    m.template = Some(template);
    m
  }

  const fn special(mut self) -> Self {
    self.special = true;
    self
  }

  const fn group_by(mut self) -> Self {
    self.allowed_in_group_by = true;
    self
  }

  const fn order_by(mut self) -> Self {
    self.allowed_in_order_by = true;
    self
  }

  /// True when `count` falls within the accepted range.
  pub fn is_valid_arg_count(&self, count: usize) -> bool {
    count >= self.min_args && count <= self.max_args
  }

  fn expected_range(&self) -> String {
    if self.max_args == usize::MAX {
      format!("at least {}", self.min_args)
    } else {
      format!("{}-{}", self.min_args, self.max_args)
    }
  }

  /// Renders `NAME(a, b)` or applies the template.
  pub fn generate_call(&self, args: &[String]) -> Result<String> {
    if !self.is_valid_arg_count(args.len()) {
      return Err(CompileError::semantic(
        ClauseKind::Select,
        format!(
          "Invalid argument count for {}. Expected {}, got {}",
          self.function,
          self.expected_range(),
          args.len()
        ),
      ));
    }
    Ok(match self.template {
      Some(template) => apply_template(template, args),
      None => format!("{}({})", self.function, args.join(", ")),
    })
  }
}

fn apply_template(template: &str, args: &[String]) -> String {
  args
    .iter()
    .enumerate()
    .fold(template.to_string(), |acc, (i, a)| acc.replace(&format!("{{{}}}", i), a))
}

const UNBOUNDED: usize = usize::MAX;

const RIGHT_TEMPLATE: &str =
  "SUBSTRING({0}, CASE WHEN LEN({0}) - {1} + 1 < 1 THEN 1 ELSE LEN({0}) - {1} + 1 END, {1})";

static REGISTRY: LazyLock<HashMap<&'static str, FunctionMapping>> = LazyLock::new(|| {
  use FunctionMapping as M;
  HashMap::from([
    // string
    ("ToUpper", M::exact("UPPER", 1).group_by().order_by()),
    ("ToLower", M::exact("LOWER", 1).group_by().order_by()),
    ("Upper", M::exact("UPPER", 1).group_by().order_by()),
    ("Lower", M::exact("LOWER", 1).group_by().order_by()),
    ("Substring", M::range("SUBSTRING", 2, 3).group_by()),
    ("Length", M::exact("LEN", 1)),
    ("Trim", M::exact("TRIM", 1)),
    ("Replace", M::exact("REPLACE", 3)),
    ("Contains", M::templated("INSTR({0}, {1}) > 0", 2)),
    ("StartsWith", M::exact("STARTS_WITH", 2)),
    ("EndsWith", M::exact("ENDS_WITH", 2)),
    ("Split", M::exact("SPLIT", 2)),
    ("Concat", M::range("CONCAT", 2, UNBOUNDED)),
    ("IndexOf", M::exact("INSTR", 2)),
    ("PadLeft", M::range("LPAD", 2, 3)),
    ("PadRight", M::range("RPAD", 2, 3)),
    ("Left", M::templated("SUBSTRING({0}, 1, {1})", 2).group_by()),
    ("Right", M::templated(RIGHT_TEMPLATE, 2).group_by()),
    // math
    ("Abs", M::exact("ABS", 1).order_by()),
    ("Round", M::range("ROUND", 1, 2).group_by()),
    ("Floor", M::exact("FLOOR", 1).group_by()),
    ("Ceiling", M::exact("CEIL", 1).group_by()),
    ("Sqrt", M::exact("SQRT", 1)),
    ("Power", M::exact("POWER", 2)),
    ("Sign", M::exact("SIGN", 1)),
    ("Sin", M::exact("SIN", 1)),
    ("Cos", M::exact("COS", 1)),
    ("Tan", M::exact("TAN", 1)),
    ("Log", M::range("LOG", 1, 2)),
    ("Log10", M::exact("LOG10", 1)),
    ("Exp", M::exact("EXP", 1)),
    // date
    ("Year", M::templated("EXTRACT(YEAR FROM CAST({0} AS TIMESTAMP))", 1).group_by().order_by()),
    ("Month", M::templated("EXTRACT(MONTH FROM CAST({0} AS TIMESTAMP))", 1).group_by().order_by()),
    ("Day", M::templated("EXTRACT(DAY FROM CAST({0} AS TIMESTAMP))", 1).group_by().order_by()),
    ("Hour", M::templated("EXTRACT(HOUR FROM CAST({0} AS TIMESTAMP))", 1).group_by()),
    ("Minute", M::templated("EXTRACT(MINUTE FROM CAST({0} AS TIMESTAMP))", 1).group_by()),
    ("Second", M::templated("EXTRACT(SECOND FROM CAST({0} AS TIMESTAMP))", 1).group_by()),
    ("AddDays", M::templated("DATEADD('day', {1}, {0})", 2)),
    ("AddHours", M::templated("DATEADD('hour', {1}, {0})", 2)),
    ("AddMinutes", M::templated("DATEADD('minute', {1}, {0})", 2)),
    ("AddSeconds", M::templated("DATEADD('second', {1}, {0})", 2)),
    ("AddMilliseconds", M::templated("DATEADD('millisecond', {1}, {0})", 2)),
    ("DayOfWeek", M::exact("DAYOFWEEK", 1).group_by()),
    ("DayOfYear", M::exact("DAYOFYEAR", 1).group_by()),
    (
      "WeekOfYear",
      M::templated("CAST(FORMAT_TIMESTAMP(CAST({0} AS TIMESTAMP), 'w', 'UTC') AS INT)", 1).group_by(),
    ),
    // aggregate
    ("Sum", M::exact("SUM", 1)),
    ("Count", M::range("COUNT", 0, 1).special()),
    ("Max", M::exact("MAX", 1)),
    ("Min", M::exact("MIN", 1)),
    ("Average", M::exact("AVG", 1)),
    ("LatestByOffset", M::exact("LATEST_BY_OFFSET", 1)),
    ("EarliestByOffset", M::exact("EARLIEST_BY_OFFSET", 1)),
    ("CollectList", M::exact("COLLECT_LIST", 1)),
    ("CollectSet", M::exact("COLLECT_SET", 1)),
    ("CountDistinct", M::exact("COUNT_DISTINCT", 1)),
    ("Histogram", M::exact("HISTOGRAM", 1)),
    ("TopK", M::exact("TOPK", 2)),
    ("TopKDistinct", M::exact("TOPKDISTINCT", 2)),
    // array
    ("ArrayLength", M::exact("ARRAY_LENGTH", 1)),
    ("ArrayContains", M::exact("ARRAY_CONTAINS", 2)),
    ("ArraySlice", M::exact("ARRAY_SLICE", 3)),
    ("ArrayJoin", M::exact("ARRAY_JOIN", 2)),
    ("ArrayDistinct", M::exact("ARRAY_DISTINCT", 1)),
    ("ArrayExcept", M::exact("ARRAY_EXCEPT", 2)),
    ("ArrayIntersect", M::exact("ARRAY_INTERSECT", 2)),
    ("ArrayUnion", M::exact("ARRAY_UNION", 2)),
    ("ArraySort", M::exact("ARRAY_SORT", 1)),
    ("ArrayMax", M::exact("ARRAY_MAX", 1)),
    ("ArrayMin", M::exact("ARRAY_MIN", 1)),
    // json
    ("JsonExtractString", M::exact("JSON_EXTRACT_STRING", 2)),
    ("JsonArrayLength", M::exact("JSON_ARRAY_LENGTH", 1)),
    ("JsonKeys", M::exact("JSON_KEYS", 1)),
    ("JsonArrayContains", M::exact("JSON_ARRAY_CONTAINS", 2)),
    ("JsonConcat", M::range("JSON_CONCAT", 2, UNBOUNDED)),
    ("JsonRecords", M::exact("JSON_RECORDS", 1)),
    // cast
    ("ToString", M::templated("CAST({0} AS VARCHAR)", 1).special().group_by()),
    ("Parse", M::exact("PARSE", 1).special()),
    ("Convert", M::exact("CAST", 1).special()),
    ("ToInt", M::templated("CAST({0} AS INTEGER)", 1)),
    ("ToLong", M::templated("CAST({0} AS BIGINT)", 1)),
    ("ToDouble", M::templated("CAST({0} AS DOUBLE)", 1)),
    ("ToDecimal", M::templated("CAST({0} AS DECIMAL)", 1)),
    // conditional
    ("Case", M::range("CASE", 2, UNBOUNDED).special()),
    ("Coalesce", M::range("COALESCE", 1, UNBOUNDED)),
    ("IfNull", M::exact("IFNULL", 2)),
    ("NullIf", M::exact("NULLIF", 2)),
    // url
    ("UrlExtractHost", M::exact("URL_EXTRACT_HOST", 1)),
    ("UrlExtractPath", M::exact("URL_EXTRACT_PATH", 1)),
    ("UrlExtractQuery", M::exact("URL_EXTRACT_QUERY", 1)),
    ("UrlExtractProtocol", M::exact("URL_EXTRACT_PROTOCOL", 1)),
    // geo
    ("GeoDistance", M::exact("GEO_DISTANCE", 4)),
    ("AsGeoJson", M::exact("AS_GEOJSON", 2)),
    // crypto
    ("Md5", M::exact("MD5", 1)),
    ("Sha1", M::exact("SHA1", 1)),
    ("Sha256", M::exact("SHA256", 1)),
    // window pseudo-columns
    ("WindowStart", M::templated("WINDOWSTART", 0)),
    ("RowTime", M::exact("ROWTIME", 0).order_by()),
    ("RowKey", M::exact("ROWKEY", 0)),
  ])
});

const AGGREGATES: [&str; 13] = [
  "Sum",
  "Count",
  "Max",
  "Min",
  "Average",
  "LatestByOffset",
  "EarliestByOffset",
  "CollectList",
  "CollectSet",
  "CountDistinct",
  "Histogram",
  "TopK",
  "TopKDistinct",
];

/// Looks up the mapping for a host method name.
pub fn mapping(method: &str) -> Option<&'static FunctionMapping> {
  REGISTRY.get(method)
}

/// True when the registry knows the method.
pub fn has_mapping(method: &str) -> bool {
  REGISTRY.contains_key(method)
}

/// True for aggregate methods (`Sum`, `Count`, `EarliestByOffset`, ...).
pub fn is_aggregate(method: &str) -> bool {
  AGGREGATES.contains(&method)
}

/// Dialect name of an aggregate method, upper-casing unknown names.
pub fn aggregate_name(method: &str) -> String {
  match mapping(method) {
    Some(m) if is_aggregate(method) => m.function.to_string(),
    _ => method.to_ascii_uppercase(),
  }
}

/// Result type inferred from a `To*`/aggregate method name.
pub fn infer_type_from_method(method: &str, precision: u32, scale: u32) -> String {
  match method.to_ascii_uppercase().as_str() {
    "SUM" | "AVG" | "TODOUBLE" => "DOUBLE".to_string(),
    "COUNT" | "TOLONG" | "TOINT64" => "BIGINT".to_string(),
    "MAX" | "MIN" => "ANY".to_string(),
    "TOPK" => "ARRAY".to_string(),
    "HISTOGRAM" => "MAP".to_string(),
    "TOINT" | "TOINT32" => "INTEGER".to_string(),
    "TODECIMAL" => format!("DECIMAL({}, {})", precision, scale),
    "TOSTRING" => "VARCHAR".to_string(),
    "TOBOOL" | "TOBOOLEAN" => "BOOLEAN".to_string(),
    _ => "UNKNOWN".to_string(),
  }
}

/// Dialect type name used inside `CAST(... AS <type>)`.
pub fn cast_type_name(ty: &ValueType, precision: u32, scale: u32) -> Result<String> {
  Ok(match ty.underlying() {
    ValueType::Int | ValueType::Short => "INTEGER".to_string(),
    ValueType::Long => "BIGINT".to_string(),
    ValueType::Float | ValueType::Double => "DOUBLE".to_string(),
    ValueType::Decimal => format!("DECIMAL({}, {})", precision, scale),
    ValueType::String | ValueType::Char | ValueType::Guid => "VARCHAR".to_string(),
    ValueType::Bool => "BOOLEAN".to_string(),
    ValueType::DateTime | ValueType::DateTimeOffset => "TIMESTAMP".to_string(),
    ValueType::Bytes => "BYTES".to_string(),
    other => {
      return Err(CompileError::not_supported(
        ClauseKind::Select,
        format!("Type '{}'", other),
      ));
    }
  })
}

fn type_matrix(function: &str) -> Option<&'static [&'static str]> {
  const NUMERIC: &[&str] = &["INT", "BIGINT", "DOUBLE"];
  const ORDERED: &[&str] = &["INT", "BIGINT", "DOUBLE", "DECIMAL", "STRING", "BOOLEAN", "DATETIME"];
  const ANY: &[&str] = &["INT", "BIGINT", "DOUBLE", "DECIMAL", "STRING", "BOOLEAN", "DATETIME", "STRUCT"];
  const TEXT: &[&str] = &["STRING"];
  match function {
    "SUM" | "AVG" => Some(NUMERIC),
    "MIN" | "MAX" | "TOPK" => Some(ORDERED),
    "COUNT" | "COLLECT_LIST" => Some(ANY),
    "LOWER" | "UPPER" | "LEN" => Some(TEXT),
    _ => None,
  }
}

/// Signature of a member-rendering override.
pub type MemberRenderer<'a> = dyn Fn(&Expr) -> Option<String> + 'a;

/// Renders call nodes (and their argument subtrees) into dialect text.
pub struct FunctionTranslator<'a> {
  clause: ClauseKind,
  member_override: Option<&'a MemberRenderer<'a>>,
  decimal: (u32, u32),
}

impl<'a> FunctionTranslator<'a> {
  /// Creates a translator attributing errors to `clause`.
  pub fn new(clause: ClauseKind) -> Self {
    Self {
      clause,
      member_override: None,
      decimal: (18, 2),
    }
  }

  /// Routes member access rendering through `render`.
  pub fn with_member_renderer(mut self, render: &'a MemberRenderer<'a>) -> Self {
    self.member_override = Some(render);
    self
  }

  /// Sets the precision/scale used for decimal casts.
  pub fn with_decimal(mut self, precision: u32, scale: u32) -> Self {
    self.decimal = (precision, scale);
    self
  }

  /// Translates a call node. Non-call nodes are rendered as plain expressions.
  pub fn translate(&self, expr: &Expr) -> Result<String> {
    let Expr::Call {
      target,
      method,
      args,
      ty,
    } = expr
    else {
      return self.render(expr);
    };
    analysis::check_complexity(expr)?;

    let Some(mapping) = mapping(method) else {
      return self.unknown_method(target.as_deref(), method, args);
    };

    let effective = effective_args(target.as_deref(), args);
    if !mapping.is_valid_arg_count(effective.len()) {
      return Err(CompileError::semantic(
        self.clause,
        format!(
          "Method '{}' expects {} arguments, but got {}",
          method,
          mapping.expected_range(),
          effective.len()
        ),
      ));
    }
    self.check_argument_types(mapping, &effective)?;

    if mapping.special {
      return self.special(method, target.as_deref(), args, &effective, ty, mapping);
    }
    let rendered = self.render_all(&effective)?;
    mapping.generate_call(&rendered)
  }

  fn check_argument_types(&self, mapping: &FunctionMapping, args: &[&Expr]) -> Result<()> {
    let Some(allowed) = type_matrix(mapping.function) else {
      return Ok(());
    };
    for arg in args {
      let ty = match arg {
        Expr::Lambda(l) => l.body.ty(),
        other => other.ty(),
      };
      let category = ty.category();
      if category != "UNKNOWN" && !allowed.contains(&category) {
        return Err(CompileError::not_supported(
          self.clause,
          format!("Function '{}' with argument type {}", mapping.function, ty),
        ));
      }
    }
    Ok(())
  }

  fn special(
    &self,
    method: &str,
    target: Option<&Expr>,
    args: &[Expr],
    effective: &[&Expr],
    ty: &ValueType,
    mapping: &FunctionMapping,
  ) -> Result<String> {
    let (precision, scale) = self.decimal;
    match method {
      "ToString" => {
        let source = effective.first().copied().or(target);
        let Some(source) = source else {
          return Err(CompileError::semantic(self.clause, "ToString requires a value"));
        };
        let rendered = self.render(source)?;
        if matches!(source.ty().underlying(), ValueType::DateTime | ValueType::DateTimeOffset) {
          Ok(format!(
            "FORMAT_TIMESTAMP(CAST({} AS TIMESTAMP), 'yyyy-MM-dd''T''HH:mm:ssXXX', 'UTC')",
            rendered
          ))
        } else {
          Ok(format!("CAST({} AS VARCHAR)", rendered))
        }
      }
      "Parse" | "Convert" => {
        let Some(source) = effective.first() else {
          return Err(CompileError::semantic(self.clause, format!("{} requires a value", method)));
        };
        Ok(format!(
          "CAST({} AS {})",
          self.render(source)?,
          cast_type_name(ty, precision, scale)?
        ))
      }
      "Case" => {
        let rendered = self.render_all(effective)?;
        let mut out = String::from("CASE");
        for pair in rendered.chunks(2) {
          match pair {
            [when, then] => out.push_str(&format!(" WHEN {} THEN {}", when, then)),
            [otherwise] => out.push_str(&format!(" ELSE {}", otherwise)),
            _ => {}
          }
        }
        out.push_str(" END");
        Ok(out)
      }
      "Count" => match args {
        [] | [Expr::Lambda(_)] => Ok("COUNT(*)".to_string()),
        [first, ..] => Ok(format!("COUNT({})", self.render(first)?)),
      },
      _ => mapping.generate_call(&self.render_all(effective)?),
    }
  }

  fn unknown_method(&self, target: Option<&Expr>, method: &str, args: &[Expr]) -> Result<String> {
    if method.starts_with("To") && args.len() <= 1 {
      let (precision, scale) = self.decimal;
      let source = match (args.first(), target) {
        (Some(arg), _) => self.render(arg)?,
        (None, Some(t)) => self.render(t)?,
        (None, None) => "NULL".to_string(),
      };
      return Ok(format!(
        "CAST({} AS {})",
        source,
        infer_type_from_method(method, precision, scale)
      ));
    }
    Err(CompileError::not_supported(
      self.clause,
      format!("Function '{}'", method),
    ))
  }

  fn render_all(&self, exprs: &[&Expr]) -> Result<Vec<String>> {
    exprs.iter().map(|e| self.render(e)).collect()
  }

  /// Renders an arbitrary argument subtree.
  pub fn render(&self, expr: &Expr) -> Result<String> {
    match expr {
      Expr::Call { .. } => self.translate(expr),
      Expr::Member { name, .. } => Ok(
        self
          .member_override
          .and_then(|f| f(expr))
          .unwrap_or_else(|| name.clone()),
      ),
      Expr::Constant(lit) => Ok(analysis::safe_to_string(lit)),
      Expr::Parameter(p) => Ok(p.name.clone()),
      Expr::Lambda(l) => self.render(&l.body),
      Expr::Unary { op, operand } => match op {
        UnaryOp::Convert(_) => self.render(operand),
        UnaryOp::Not => Ok(format!("NOT {}", self.render(operand)?)),
        UnaryOp::Negate => Ok(format!("-{}", self.render(operand)?)),
      },
      Expr::Binary {
        op: BinaryOp::Coalesce,
        left,
        right,
      } => Ok(format!("COALESCE({}, {})", self.render(left)?, self.render(right)?)),
      Expr::Binary { op, left, right } => Ok(format!(
        "({} {} {})",
        self.render(left)?,
        self.operator(*op)?,
        self.render(right)?
      )),
      Expr::Conditional {
        test,
        if_true,
        if_false,
      } => {
        analysis::check_conditional_types(if_true, if_false)?;
        Ok(format!(
          "CASE WHEN {} THEN {} ELSE {} END",
          self.render(test)?,
          self.render(if_true)?,
          self.render(if_false)?
        ))
      }
      Expr::Construct { .. } | Expr::Source { .. } => Err(CompileError::not_supported(
        self.clause,
        format!("Expression '{}' as a function argument", expr),
      )),
    }
  }

  fn operator(&self, op: BinaryOp) -> Result<&'static str> {
    crate::clauses::arithmetic_or_comparison_operator(op)
      .ok_or_else(|| CompileError::not_supported(self.clause, format!("Operator '{}'", op)))
  }
}

/// Arguments of a call as the dialect sees them: an instance receiver counts
/// as the first argument unless it is an implicit (grouping/source) receiver.
pub fn effective_args<'e>(target: Option<&'e Expr>, args: &'e [Expr]) -> Vec<&'e Expr> {
  target
    .filter(|t| !t.is_implicit_receiver())
    .into_iter()
    .chain(args.iter())
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::expr::Lambda;

  fn name() -> Expr {
    Expr::param("o", ValueType::record("Order")).member("Name", ValueType::String)
  }

  fn translate(e: &Expr) -> Result<String> {
    FunctionTranslator::new(ClauseKind::Select).translate(e)
  }

  #[test]
  fn test_instance_string_call() {
    let e = name().call("ToUpper", vec![], ValueType::String);
    assert_eq!(translate(&e).unwrap(), "UPPER(Name)");
  }

  #[test]
  fn test_template_substitution() {
    let e = name().call("Left", vec![Expr::int(3)], ValueType::String);
    assert_eq!(translate(&e).unwrap(), "SUBSTRING(Name, 1, 3)");
    let e = name().call("Contains", vec![Expr::string("x")], ValueType::Bool);
    assert_eq!(translate(&e).unwrap(), "INSTR(Name, 'x') > 0");
  }

  #[test]
  fn test_date_add_swaps_arguments() {
    let ts = Expr::param("o", ValueType::record("Order")).member("At", ValueType::DateTime);
    let e = ts.call("AddDays", vec![Expr::int(1)], ValueType::DateTime);
    assert_eq!(translate(&e).unwrap(), "DATEADD('day', 1, At)");
  }

  #[test]
  fn test_count_renders_star() {
    let g = Expr::param("g", ValueType::Grouping);
    let e = Expr::aggregate(g.clone(), "Count", None, ValueType::Long);
    assert_eq!(translate(&e).unwrap(), "COUNT(*)");
    let pred = Lambda::single("x", ValueType::record("Order"), Expr::bool(true));
    let e = Expr::aggregate(g, "Count", Some(pred), ValueType::Long);
    assert_eq!(translate(&e).unwrap(), "COUNT(*)");
  }

  #[test]
  fn test_aggregate_over_group_skips_receiver() {
    let g = Expr::param("g", ValueType::Grouping);
    let sel = Lambda::single(
      "x",
      ValueType::record("Order"),
      Expr::param("x", ValueType::record("Order")).member("Amount", ValueType::Double),
    );
    let e = Expr::aggregate(g, "Sum", Some(sel), ValueType::Double);
    assert_eq!(translate(&e).unwrap(), "SUM(Amount)");
  }

  #[test]
  fn test_argument_count_is_checked() {
    let e = Expr::static_call("Power", vec![Expr::int(2)], ValueType::Double);
    let err = translate(&e).unwrap_err();
    assert!(err.to_string().contains("Method 'Power' expects 2-2 arguments, but got 1"));
  }

  #[test]
  fn test_type_matrix_rejects_string_sum() {
    let g = Expr::param("g", ValueType::Grouping);
    let sel = Lambda::single("x", ValueType::record("Order"), name());
    let e = Expr::aggregate(g, "Sum", Some(sel), ValueType::Double);
    assert!(translate(&e).is_err());
  }

  #[test]
  fn test_unknown_to_method_casts() {
    let e = name().call("ToInt32", vec![], ValueType::Int);
    assert_eq!(translate(&e).unwrap(), "CAST(Name AS INTEGER)");
    let e = name().call("Frobnicate", vec![], ValueType::Int);
    assert!(translate(&e).is_err());
  }

  #[test]
  fn test_to_string_on_timestamp_formats() {
    let ts = Expr::param("o", ValueType::record("Order")).member("At", ValueType::DateTime);
    let e = ts.call("ToString", vec![], ValueType::String);
    assert!(translate(&e).unwrap().starts_with("FORMAT_TIMESTAMP(CAST(At AS TIMESTAMP)"));
  }

  #[test]
  fn test_case_function() {
    let e = Expr::static_call(
      "Case",
      vec![Expr::bool(true), Expr::int(1), Expr::int(0)],
      ValueType::Int,
    );
    assert_eq!(translate(&e).unwrap(), "CASE WHEN true THEN 1 ELSE 0 END");
  }

  #[test]
  fn test_member_override_is_used() {
    let render = |e: &Expr| e.member_name().map(|n| format!("o.{}", n.to_uppercase()));
    let t = FunctionTranslator::new(ClauseKind::Select).with_member_renderer(&render);
    let e = name().call("ToLower", vec![], ValueType::String);
    assert_eq!(t.translate(&e).unwrap(), "LOWER(o.NAME)");
  }

  #[test]
  fn test_registry_flags() {
    assert!(mapping("Left").map(|m| m.allowed_in_group_by).unwrap_or(false));
    assert!(!mapping("Trim").map(|m| m.allowed_in_group_by).unwrap_or(true));
    assert!(mapping("RowTime").map(|m| m.allowed_in_order_by).unwrap_or(false));
    assert!(is_aggregate("EarliestByOffset"));
    assert!(!is_aggregate("ToUpper"));
    assert_eq!(aggregate_name("Average"), "AVG");
    assert_eq!(aggregate_name("Custom"), "CUSTOM");
    assert!(has_mapping("WindowStart"));
  }
}
