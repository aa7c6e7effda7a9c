//! # Expression Trees
//!
//! The closed expression AST that every clause visitor walks.
//!
//! ## Overview
//!
//! Callers describe predicates, projections and key selectors as lambdas over
//! typed row parameters. The tree is a plain tagged union, so every visitor
//! matches exhaustively and adding a node kind is a compile error until each
//! clause decides how to render it.
//!
//! ## Node Kinds
//!
//! - **Parameter**: a lambda parameter (row, grouping, or schedule)
//! - **Member**: field access on another expression (`o.Price`, `g.Key.Symbol`)
//! - **Constant**: literal value
//! - **Binary** / **Unary**: operators and conversions
//! - **Call**: method call, either on a receiver or free-standing
//! - **Conditional**: `test ? a : b`
//! - **Construct**: anonymous or named record construction with ordered members
//! - **Lambda**: nested lambda (aggregate selectors)
//! - **Source**: a queryable source referenced by a join chain
//!
//! ## Example
//!
//! ```rust
//! use ksqlweave::expr::{Expr, Lambda, ValueType};
//!
//! let o = Expr::param("o", ValueType::record("Order"));
//! let projection = Lambda::single(
//!   "o",
//!   ValueType::record("Order"),
//!   Expr::construct(vec![
//!     ("Id", o.clone().member("Id", ValueType::Int)),
//!     ("Name", o.member("Name", ValueType::String)),
//!   ]),
//! );
//! assert_eq!(projection.constructed_members(), vec!["Id", "Name"]);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Static type of an expression node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
  /// 32-bit integer
  Int,
  /// 16-bit integer
  Short,
  /// 64-bit integer
  Long,
  /// 32-bit float
  Float,
  /// 64-bit float
  Double,
  /// Fixed-point decimal; precision/scale come from annotations or config
  Decimal,
  /// Text
  String,
  /// Single character
  Char,
  /// Boolean
  Bool,
  /// Timestamp without offset
  DateTime,
  /// Timestamp with offset
  DateTimeOffset,
  /// UUID, rendered as text
  Guid,
  /// Raw bytes
  Bytes,
  /// Key/value map
  Map(Box<ValueType>, Box<ValueType>),
  /// Homogeneous collection
  List(Box<ValueType>),
  /// Named record shape
  Record(String),
  /// A group produced by GROUP BY; its `Key` member exposes the keys
  Grouping,
  /// Optional value of the inner type
  Nullable(Box<ValueType>),
  /// Type not known to the caller
  Unknown,
}

impl ValueType {
  /// Shorthand for [`ValueType::Record`].
  pub fn record(name: impl Into<String>) -> Self {
    ValueType::Record(name.into())
  }

  /// Wraps this type as nullable (idempotent).
  pub fn nullable(self) -> Self {
    match self {
      ValueType::Nullable(_) => self,
      other => ValueType::Nullable(Box::new(other)),
    }
  }

  /// Unwraps a nullable type.
  pub fn underlying(&self) -> &ValueType {
    match self {
      ValueType::Nullable(inner) => inner.underlying(),
      other => other,
    }
  }

  /// True when this type is nullable.
  pub fn is_nullable(&self) -> bool {
    matches!(self, ValueType::Nullable(_))
  }

  /// True for decimal and nullable decimal.
  pub fn is_decimal(&self) -> bool {
    matches!(self.underlying(), ValueType::Decimal)
  }

  /// True for a boolean (nullable or not).
  pub fn is_bool(&self) -> bool {
    matches!(self.underlying(), ValueType::Bool)
  }

  /// True for text and character types.
  pub fn is_string(&self) -> bool {
    matches!(self.underlying(), ValueType::String | ValueType::Char)
  }

  /// True for list types.
  pub fn is_list(&self) -> bool {
    matches!(self.underlying(), ValueType::List(_))
  }

  /// Coarse category used by the function argument type matrix.
  pub fn category(&self) -> &'static str {
    match self.underlying() {
      ValueType::Int | ValueType::Short => "INT",
      ValueType::Long => "BIGINT",
      ValueType::Float | ValueType::Double => "DOUBLE",
      ValueType::Decimal => "DECIMAL",
      ValueType::String | ValueType::Char => "STRING",
      ValueType::Bool => "BOOLEAN",
      ValueType::DateTime | ValueType::DateTimeOffset => "DATETIME",
      ValueType::Record(_) | ValueType::Map(..) | ValueType::List(_) | ValueType::Guid | ValueType::Bytes => {
        "STRUCT"
      }
      ValueType::Grouping | ValueType::Nullable(_) | ValueType::Unknown => "UNKNOWN",
    }
  }
}

impl fmt::Display for ValueType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ValueType::Int => write!(f, "int"),
      ValueType::Short => write!(f, "short"),
      ValueType::Long => write!(f, "long"),
      ValueType::Float => write!(f, "float"),
      ValueType::Double => write!(f, "double"),
      ValueType::Decimal => write!(f, "decimal"),
      ValueType::String => write!(f, "string"),
      ValueType::Char => write!(f, "char"),
      ValueType::Bool => write!(f, "bool"),
      ValueType::DateTime => write!(f, "DateTime"),
      ValueType::DateTimeOffset => write!(f, "DateTimeOffset"),
      ValueType::Guid => write!(f, "Guid"),
      ValueType::Bytes => write!(f, "byte[]"),
      ValueType::Map(k, v) => write!(f, "Dictionary<{}, {}>", k, v),
      ValueType::List(inner) => write!(f, "List<{}>", inner),
      ValueType::Record(name) => write!(f, "{}", name),
      ValueType::Grouping => write!(f, "IGrouping"),
      ValueType::Nullable(inner) => write!(f, "{}?", inner),
      ValueType::Unknown => write!(f, "?"),
    }
  }
}

/// Literal constant values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
  /// NULL
  Null,
  /// Boolean literal
  Bool(bool),
  /// Integer literal
  Int(i64),
  /// Floating-point literal
  Float(f64),
  /// String literal
  String(String),
  /// Constant collection, used by `Contains` membership tests
  List(Vec<Literal>),
}

impl Literal {
  /// Static type of the literal.
  pub fn ty(&self) -> ValueType {
    match self {
      Literal::Null => ValueType::Unknown,
      Literal::Bool(_) => ValueType::Bool,
      Literal::Int(_) => ValueType::Int,
      Literal::Float(_) => ValueType::Double,
      Literal::String(_) => ValueType::String,
      Literal::List(items) => ValueType::List(Box::new(
        items.first().map(Literal::ty).unwrap_or(ValueType::Unknown),
      )),
    }
  }
}

impl fmt::Display for Literal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Literal::Null => write!(f, "NULL"),
      Literal::Bool(b) => write!(f, "{}", b),
      Literal::Int(i) => write!(f, "{}", i),
      Literal::Float(v) => write!(f, "{}", v),
      Literal::String(s) => write!(f, "'{}'", s),
      Literal::List(items) => {
        let rendered: Vec<String> = items.iter().map(|i| i.to_string()).collect();
        write!(f, "{}", rendered.join(", "))
      }
    }
  }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
  /// `+`
  Add,
  /// `-`
  Subtract,
  /// `*`
  Multiply,
  /// `/`
  Divide,
  /// `%`
  Modulo,
  /// `==`
  Equal,
  /// `!=`
  NotEqual,
  /// `>`
  GreaterThan,
  /// `>=`
  GreaterThanOrEqual,
  /// `<`
  LessThan,
  /// `<=`
  LessThanOrEqual,
  /// `&&`
  AndAlso,
  /// `||`
  OrElse,
  /// `??`
  Coalesce,
  /// `&` (bitwise)
  And,
  /// `|` (bitwise)
  Or,
}

impl BinaryOp {
  /// True for `==`, `!=`, `<`, `<=`, `>`, `>=`.
  pub fn is_comparison(self) -> bool {
    matches!(
      self,
      BinaryOp::Equal
        | BinaryOp::NotEqual
        | BinaryOp::GreaterThan
        | BinaryOp::GreaterThanOrEqual
        | BinaryOp::LessThan
        | BinaryOp::LessThanOrEqual
    )
  }

  /// True for `&&` and `||`.
  pub fn is_logical(self) -> bool {
    matches!(self, BinaryOp::AndAlso | BinaryOp::OrElse)
  }

  /// Source-language spelling, used in diagnostics.
  pub fn symbol(self) -> &'static str {
    match self {
      BinaryOp::Add => "+",
      BinaryOp::Subtract => "-",
      BinaryOp::Multiply => "*",
      BinaryOp::Divide => "/",
      BinaryOp::Modulo => "%",
      BinaryOp::Equal => "==",
      BinaryOp::NotEqual => "!=",
      BinaryOp::GreaterThan => ">",
      BinaryOp::GreaterThanOrEqual => ">=",
      BinaryOp::LessThan => "<",
      BinaryOp::LessThanOrEqual => "<=",
      BinaryOp::AndAlso => "&&",
      BinaryOp::OrElse => "||",
      BinaryOp::Coalesce => "??",
      BinaryOp::And => "&",
      BinaryOp::Or => "|",
    }
  }
}

impl fmt::Display for BinaryOp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.symbol())
  }
}

/// Unary operators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
  /// Logical negation
  Not,
  /// Arithmetic negation
  Negate,
  /// Type conversion to the given type
  Convert(ValueType),
}

/// A lambda parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Param {
  /// Parameter name as written by the caller
  pub name: String,
  /// Parameter type
  pub ty: ValueType,
}

impl Param {
  /// Creates a parameter.
  pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
    Self {
      name: name.into(),
      ty,
    }
  }
}

/// A lambda: ordered parameters plus a body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
  /// Parameters in declaration order
  pub params: Vec<Param>,
  /// Lambda body
  pub body: Expr,
}

impl Lambda {
  /// Creates a lambda with the given parameters.
  pub fn new(params: Vec<Param>, body: Expr) -> Self {
    Self { params, body }
  }

  /// Creates a single-parameter lambda.
  pub fn single(name: impl Into<String>, ty: ValueType, body: Expr) -> Self {
    Self::new(vec![Param::new(name, ty)], body)
  }

  /// Creates a two-parameter lambda (join and schedule predicates).
  pub fn pair(left: Param, right: Param, body: Expr) -> Self {
    Self::new(vec![left, right], body)
  }

  /// Member names of a construction body, in declared order; empty otherwise.
  pub fn constructed_members(&self) -> Vec<&str> {
    match self.body.unwrap_convert() {
      Expr::Construct { members, .. } => members.iter().map(|(n, _)| n.as_str()).collect(),
      _ => Vec::new(),
    }
  }

  /// The first parameter, if any.
  pub fn first_param(&self) -> Option<&Param> {
    self.params.first()
  }
}

/// Expression tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
  /// Reference to a lambda parameter
  Parameter(Param),
  /// Field access
  Member {
    /// Expression whose member is accessed
    target: Box<Expr>,
    /// Member name
    name: String,
    /// Member type
    ty: ValueType,
  },
  /// Literal constant
  Constant(Literal),
  /// Binary operation
  Binary {
    /// Operator
    op: BinaryOp,
    /// Left operand
    left: Box<Expr>,
    /// Right operand
    right: Box<Expr>,
  },
  /// Unary operation
  Unary {
    /// Operator
    op: UnaryOp,
    /// Operand
    operand: Box<Expr>,
  },
  /// Method call. A receiver of grouping or source type is not counted as
  /// an argument (extension-style call such as `g.Sum(x => x.Amount)`).
  Call {
    /// Receiver, for instance and extension calls
    target: Option<Box<Expr>>,
    /// Method name as written in the host language
    method: String,
    /// Arguments excluding the receiver
    args: Vec<Expr>,
    /// Return type
    ty: ValueType,
  },
  /// Ternary conditional
  Conditional {
    /// Condition
    test: Box<Expr>,
    /// Value when true
    if_true: Box<Expr>,
    /// Value when false
    if_false: Box<Expr>,
  },
  /// Record construction with ordered member bindings
  Construct {
    /// `None` for anonymous shapes, otherwise the record type name
    type_name: Option<String>,
    /// Member name and value, in declared order
    members: Vec<(String, Expr)>,
  },
  /// Nested lambda
  Lambda(Box<Lambda>),
  /// Queryable source (a topic-backed stream or table)
  Source {
    /// Record type name of the source
    name: String,
  },
}

impl Expr {
  /// Parameter reference.
  pub fn param(name: impl Into<String>, ty: ValueType) -> Self {
    Expr::Parameter(Param::new(name, ty))
  }

  /// Field access on `self`.
  pub fn member(self, name: impl Into<String>, ty: ValueType) -> Self {
    Expr::Member {
      target: Box::new(self),
      name: name.into(),
      ty,
    }
  }

  /// Literal constant.
  pub fn constant(value: Literal) -> Self {
    Expr::Constant(value)
  }

  /// Integer constant.
  pub fn int(value: i64) -> Self {
    Expr::Constant(Literal::Int(value))
  }

  /// Float constant.
  pub fn float(value: f64) -> Self {
    Expr::Constant(Literal::Float(value))
  }

  /// String constant.
  pub fn string(value: impl Into<String>) -> Self {
    Expr::Constant(Literal::String(value.into()))
  }

  /// Boolean constant.
  pub fn bool(value: bool) -> Self {
    Expr::Constant(Literal::Bool(value))
  }

  /// NULL constant.
  pub fn null() -> Self {
    Expr::Constant(Literal::Null)
  }

  /// Binary operation.
  pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
    Expr::Binary {
      op,
      left: Box::new(left),
      right: Box::new(right),
    }
  }

  /// `self == other`
  pub fn equals(self, other: Expr) -> Self {
    Expr::binary(BinaryOp::Equal, self, other)
  }

  /// `self != other`
  pub fn not_equals(self, other: Expr) -> Self {
    Expr::binary(BinaryOp::NotEqual, self, other)
  }

  /// `self > other`
  pub fn gt(self, other: Expr) -> Self {
    Expr::binary(BinaryOp::GreaterThan, self, other)
  }

  /// `self >= other`
  pub fn ge(self, other: Expr) -> Self {
    Expr::binary(BinaryOp::GreaterThanOrEqual, self, other)
  }

  /// `self < other`
  pub fn lt(self, other: Expr) -> Self {
    Expr::binary(BinaryOp::LessThan, self, other)
  }

  /// `self <= other`
  pub fn le(self, other: Expr) -> Self {
    Expr::binary(BinaryOp::LessThanOrEqual, self, other)
  }

  /// `self && other`
  pub fn and_also(self, other: Expr) -> Self {
    Expr::binary(BinaryOp::AndAlso, self, other)
  }

  /// `self || other`
  pub fn or_else(self, other: Expr) -> Self {
    Expr::binary(BinaryOp::OrElse, self, other)
  }

  /// `self + other`
  pub fn plus(self, other: Expr) -> Self {
    Expr::binary(BinaryOp::Add, self, other)
  }

  /// `self - other`
  pub fn minus(self, other: Expr) -> Self {
    Expr::binary(BinaryOp::Subtract, self, other)
  }

  /// `self * other`
  pub fn times(self, other: Expr) -> Self {
    Expr::binary(BinaryOp::Multiply, self, other)
  }

  /// `self / other`
  pub fn divided_by(self, other: Expr) -> Self {
    Expr::binary(BinaryOp::Divide, self, other)
  }

  /// `self ?? other`
  pub fn coalesce(self, other: Expr) -> Self {
    Expr::binary(BinaryOp::Coalesce, self, other)
  }

  /// `!operand`
  pub fn logical_not(operand: Expr) -> Self {
    Expr::Unary {
      op: UnaryOp::Not,
      operand: Box::new(operand),
    }
  }

  /// `-operand`
  pub fn negate(operand: Expr) -> Self {
    Expr::Unary {
      op: UnaryOp::Negate,
      operand: Box::new(operand),
    }
  }

  /// Conversion of `self` to `ty`.
  pub fn convert(self, ty: ValueType) -> Self {
    Expr::Unary {
      op: UnaryOp::Convert(ty),
      operand: Box::new(self),
    }
  }

  /// Method call with `self` as receiver.
  pub fn call(self, method: impl Into<String>, args: Vec<Expr>, ty: ValueType) -> Self {
    Expr::Call {
      target: Some(Box::new(self)),
      method: method.into(),
      args,
      ty,
    }
  }

  /// Free-standing (static) call.
  pub fn static_call(method: impl Into<String>, args: Vec<Expr>, ty: ValueType) -> Self {
    Expr::Call {
      target: None,
      method: method.into(),
      args,
      ty,
    }
  }

  /// Aggregate over a group, e.g. `g.Sum(x => x.Amount)`.
  pub fn aggregate(group: Expr, method: impl Into<String>, selector: Option<Lambda>, ty: ValueType) -> Self {
    let args = selector
      .map(|l| vec![Expr::Lambda(Box::new(l))])
      .unwrap_or_default();
    group.call(method, args, ty)
  }

  /// `test ? if_true : if_false`
  pub fn conditional(test: Expr, if_true: Expr, if_false: Expr) -> Self {
    Expr::Conditional {
      test: Box::new(test),
      if_true: Box::new(if_true),
      if_false: Box::new(if_false),
    }
  }

  /// Anonymous record construction.
  pub fn construct<S: Into<String>>(members: Vec<(S, Expr)>) -> Self {
    Expr::Construct {
      type_name: None,
      members: members.into_iter().map(|(n, e)| (n.into(), e)).collect(),
    }
  }

  /// Named record construction.
  pub fn record<S: Into<String>>(type_name: impl Into<String>, members: Vec<(S, Expr)>) -> Self {
    Expr::Construct {
      type_name: Some(type_name.into()),
      members: members.into_iter().map(|(n, e)| (n.into(), e)).collect(),
    }
  }

  /// Nested lambda.
  pub fn lambda(lambda: Lambda) -> Self {
    Expr::Lambda(Box::new(lambda))
  }

  /// Queryable source.
  pub fn source(name: impl Into<String>) -> Self {
    Expr::Source { name: name.into() }
  }

  /// Static type of the node.
  pub fn ty(&self) -> ValueType {
    match self {
      Expr::Parameter(p) => p.ty.clone(),
      Expr::Member { ty, .. } | Expr::Call { ty, .. } => ty.clone(),
      Expr::Constant(lit) => lit.ty(),
      Expr::Binary { op, left, right } => {
        if op.is_comparison() || op.is_logical() {
          ValueType::Bool
        } else if *op == BinaryOp::Coalesce {
          right.ty()
        } else {
          left.ty()
        }
      }
      Expr::Unary { op, operand } => match op {
        UnaryOp::Not => ValueType::Bool,
        UnaryOp::Negate => operand.ty(),
        UnaryOp::Convert(ty) => ty.clone(),
      },
      Expr::Conditional { if_true, .. } => if_true.ty(),
      Expr::Construct { type_name, .. } => {
        ValueType::Record(type_name.clone().unwrap_or_else(|| "<anonymous>".to_string()))
      }
      Expr::Lambda(l) => l.body.ty(),
      Expr::Source { name } => ValueType::Record(name.clone()),
    }
  }

  /// Strips any number of conversion wrappers.
  pub fn unwrap_convert(&self) -> &Expr {
    match self {
      Expr::Unary {
        op: UnaryOp::Convert(_),
        operand,
      } => operand.unwrap_convert(),
      other => other,
    }
  }

  /// Direct child nodes, in evaluation order.
  pub fn children(&self) -> Vec<&Expr> {
    match self {
      Expr::Parameter(_) | Expr::Constant(_) | Expr::Source { .. } => Vec::new(),
      Expr::Member { target, .. } => vec![target.as_ref()],
      Expr::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
      Expr::Unary { operand, .. } => vec![operand.as_ref()],
      Expr::Call { target, args, .. } => target
        .iter()
        .map(|t| t.as_ref())
        .chain(args.iter())
        .collect(),
      Expr::Conditional {
        test,
        if_true,
        if_false,
      } => vec![test.as_ref(), if_true.as_ref(), if_false.as_ref()],
      Expr::Construct { members, .. } => members.iter().map(|(_, e)| e).collect(),
      Expr::Lambda(l) => vec![&l.body],
    }
  }

  /// Pre-order traversal invoking `visit` on every node.
  pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
    visit(self);
    for child in self.children() {
      child.walk(visit);
    }
  }

  /// True when any node satisfies the predicate.
  pub fn any(&self, pred: &dyn Fn(&Expr) -> bool) -> bool {
    pred(self) || self.children().into_iter().any(|c| c.any(pred))
  }

  /// Member name when this node is a field access.
  pub fn member_name(&self) -> Option<&str> {
    match self {
      Expr::Member { name, .. } => Some(name),
      _ => None,
    }
  }

  /// The parameter at the root of a member chain (`o` for `o.A.B`).
  pub fn root_param(&self) -> Option<&Param> {
    match self.unwrap_convert() {
      Expr::Parameter(p) => Some(p),
      Expr::Member { target, .. } => target.root_param(),
      _ => None,
    }
  }

  /// True for `g.Key` where `g` is a grouping parameter.
  pub fn is_group_key(&self) -> bool {
    match self.unwrap_convert() {
      Expr::Member { target, name, .. } if name == "Key" => {
        matches!(target.unwrap_convert(), Expr::Parameter(p) if p.ty == ValueType::Grouping)
      }
      _ => false,
    }
  }

  /// True for a call receiver that is not rendered as an argument.
  pub fn is_implicit_receiver(&self) -> bool {
    match self.unwrap_convert() {
      Expr::Parameter(p) => p.ty == ValueType::Grouping,
      Expr::Source { .. } => true,
      Expr::Call { ty, .. } => *ty == ValueType::Grouping,
      _ => false,
    }
  }
}

impl fmt::Display for Expr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Expr::Parameter(p) => write!(f, "{}", p.name),
      Expr::Member { target, name, .. } => write!(f, "{}.{}", target, name),
      Expr::Constant(lit) => write!(f, "{}", lit),
      Expr::Binary { op, left, right } => write!(f, "({} {} {})", left, op, right),
      Expr::Unary { op, operand } => match op {
        UnaryOp::Not => write!(f, "!{}", operand),
        UnaryOp::Negate => write!(f, "-{}", operand),
        UnaryOp::Convert(ty) => write!(f, "({}){}", ty, operand),
      },
      Expr::Call {
        target,
        method,
        args,
        ..
      } => {
        if let Some(t) = target {
          write!(f, "{}.", t)?;
        }
        let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        write!(f, "{}({})", method, rendered.join(", "))
      }
      Expr::Conditional {
        test,
        if_true,
        if_false,
      } => write!(f, "({} ? {} : {})", test, if_true, if_false),
      Expr::Construct { type_name, members } => {
        let rendered: Vec<String> = members.iter().map(|(n, e)| format!("{} = {}", n, e)).collect();
        match type_name {
          Some(t) => write!(f, "new {} {{ {} }}", t, rendered.join(", ")),
          None => write!(f, "new {{ {} }}", rendered.join(", ")),
        }
      }
      Expr::Lambda(l) => {
        let names: Vec<&str> = l.params.iter().map(|p| p.name.as_str()).collect();
        write!(f, "({}) => {}", names.join(", "), l.body)
      }
      Expr::Source { name } => write!(f, "{}", name),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn order() -> Expr {
    Expr::param("o", ValueType::record("Order"))
  }

  #[test]
  fn test_member_chain_root() {
    let e = order().member("Customer", ValueType::record("Customer")).member("Name", ValueType::String);
    assert_eq!(e.root_param().map(|p| p.name.as_str()), Some("o"));
    assert_eq!(e.member_name(), Some("Name"));
  }

  #[test]
  fn test_types_of_operators() {
    let price = order().member("Price", ValueType::Decimal);
    assert_eq!(price.clone().gt(Expr::int(5)).ty(), ValueType::Bool);
    assert_eq!(price.clone().times(Expr::int(2)).ty(), ValueType::Decimal);
    assert_eq!(price.convert(ValueType::Double).ty(), ValueType::Double);
  }

  #[test]
  fn test_group_key_detection() {
    let g = Expr::param("g", ValueType::Grouping);
    assert!(g.clone().member("Key", ValueType::record("K")).is_group_key());
    assert!(!order().member("Key", ValueType::Int).is_group_key());
    assert!(g.is_implicit_receiver());
  }

  #[test]
  fn test_display_is_readable() {
    let e = order().member("Id", ValueType::Int).equals(Expr::int(3));
    assert_eq!(e.to_string(), "(o.Id == 3)");
  }

  #[test]
  fn test_walk_visits_every_node() {
    let e = Expr::construct(vec![
      ("A", order().member("A", ValueType::Int)),
      ("B", Expr::int(1)),
    ]);
    let mut count = 0;
    e.walk(&mut |_| count += 1);
    assert_eq!(count, 4);
  }

  #[test]
  fn test_nullable_helpers() {
    let t = ValueType::Decimal.nullable().nullable();
    assert!(t.is_nullable());
    assert!(t.is_decimal());
    assert_eq!(t.underlying(), &ValueType::Decimal);
    assert_eq!(t.category(), "DECIMAL");
  }
}
