//! # Projection and Pipeline Validation
//!
//! Cross-checks that no single clause builder can see:
//!
//! - [`ProjectionValidator`] compares the SELECT projection against the
//!   target entity descriptor: member count and names, member order, types,
//!   effective decimal precision/scale, and the order of key members
//! - [`validate_hopping`] checks the fluent call order of hopping queries
//!   and the source kinds of a hopping join
//!
//! All failures other than stage ordering are [`CompileError::Invariant`].

use crate::config::DecimalPrecisionConfig;
use crate::entity::{Catalog, ColumnDescriptor, EntityDescriptor, ObjectKind};
use crate::error::{CompileError, Result};
use crate::expr::{Expr, ValueType};
use crate::model::QueryModel;

const WINDOW_COLUMNS: [&str; 2] = ["WindowStart", "WindowEnd"];

/// Checks a model's projection against a target entity.
#[derive(Debug, Clone, Copy)]
pub struct ProjectionValidator<'a> {
  catalog: &'a Catalog,
  decimals: &'a DecimalPrecisionConfig,
}

struct Member<'e> {
  name: &'e str,
  expr: &'e Expr,
}

impl<'a> ProjectionValidator<'a> {
  /// Validator resolving source columns through `catalog`.
  pub fn new(catalog: &'a Catalog, decimals: &'a DecimalPrecisionConfig) -> Self {
    Self { catalog, decimals }
  }

  /// Fails when the projection cannot populate `target` positionally.
  pub fn validate(&self, target: &EntityDescriptor, model: &QueryModel) -> Result<()> {
    let Some(projection) = &model.select_projection else {
      return Ok(());
    };
    let Expr::Construct { members, .. } = projection.body.unwrap_convert() else {
      // identity projection
      return Ok(());
    };
    let windowed = model.has_tumbling() || model.has_hopping();
    let is_window_column = |name: &str| windowed && WINDOW_COLUMNS.iter().any(|w| w.eq_ignore_ascii_case(name));

    let columns: Vec<&ColumnDescriptor> = target.properties().filter(|c| !is_window_column(c.name.as_str())).collect();
    let members: Vec<Member<'_>> = members
      .iter()
      .filter(|(name, _)| !is_window_column(name.as_str()))
      .map(|(name, expr)| Member { name: name.as_str(), expr })
      .collect();

    let same_names = members.len() == columns.len()
      && members
        .iter()
        .all(|m| columns.iter().any(|c| c.name.eq_ignore_ascii_case(m.name)));
    if !same_names {
      return Err(CompileError::invariant("Select projection does not match POCO properties."));
    }
    if members
      .iter()
      .zip(&columns)
      .any(|(m, c)| !m.name.eq_ignore_ascii_case(&c.name))
    {
      return Err(CompileError::invariant("Select projection does not match POCO property order."));
    }

    for (member, column) in members.iter().zip(&columns) {
      let ty = member.expr.ty();
      if ty != ValueType::Unknown && ty.underlying() != column.ty.underlying() {
        tracing::debug!(member = member.name, projected = %ty, declared = %column.ty, "projection type mismatch");
        return Err(CompileError::invariant("Select projection property types do not match POCO."));
      }
      if column.ty.is_decimal() && !self.decimal_matches(target, column, member.expr) {
        return Err(CompileError::invariant("Select projection decimal precision does not match POCO."));
      }
    }

    let declared_keys: Vec<&str> = target.key_columns().iter().map(|c| c.name.as_str()).collect();
    let projected_keys: Vec<&str> = members
      .iter()
      .map(|m| m.name)
      .filter(|name| declared_keys.iter().any(|k| k.eq_ignore_ascii_case(name)))
      .collect();
    let keys_match = projected_keys.len() == declared_keys.len()
      && projected_keys
        .iter()
        .zip(&declared_keys)
        .all(|(p, d)| p.eq_ignore_ascii_case(d));
    if !keys_match {
      return Err(CompileError::invariant("Select projection key order does not match POCO."));
    }
    Ok(())
  }

  fn decimal_matches(&self, target: &EntityDescriptor, column: &ColumnDescriptor, expr: &Expr) -> bool {
    let Some((source_type, source_column)) = source_member(expr) else {
      return true;
    };
    let explicit = self.catalog.get(source_type).and_then(|e| e.column(source_column));
    let source_precision =
      self
        .decimals
        .resolve_precision(explicit.and_then(|c| c.precision), source_type, source_column);
    let source_scale = self
      .decimals
      .resolve_scale(explicit.and_then(|c| c.scale), source_type, source_column);
    let precision = self
      .decimals
      .resolve_precision(column.precision, &target.type_name, &column.name);
    let scale = self.decimals.resolve_scale(column.scale, &target.type_name, &column.name);
    source_precision == precision && source_scale == scale
  }
}

/// First direct member of a record-typed parameter inside `expr`.
fn source_member(expr: &Expr) -> Option<(&str, &str)> {
  let mut found = None;
  expr.walk(&mut |e| {
    if found.is_some() {
      return;
    }
    if let Expr::Member { target, name, .. } = e {
      if let Expr::Parameter(p) = target.unwrap_convert() {
        if let ValueType::Record(record) = p.ty.underlying() {
          found = Some((record.as_str(), name.as_str()));
        }
      }
    }
  });
  found
}

/// Call-order and source-kind rules for models with a hopping window.
pub fn validate_hopping(model: &QueryModel, catalog: &Catalog) -> Result<()> {
  if !model.has_hopping() {
    return Ok(());
  }
  let hopping = model.position_of("Hopping");
  let group_by = model.position_of("GroupBy");
  let select = model.position_of("Select");

  if !model.has_join() {
    if model.count_of("Hopping") > 1 {
      return Err(CompileError::invariant("Multiple hopping windows are not supported."));
    }
    if model.has_tumbling() {
      return Err(CompileError::invariant(
        "Hopping and tumbling windows cannot be combined on one query.",
      ));
    }
    if let (Some(g), Some(s)) = (group_by, select) {
      if !(hopping.is_none_or(|h| h < g) && g < s) {
        return Err(CompileError::invariant("Hopping requires GroupBy then Select in order."));
      }
    }
    return Ok(());
  }

  let Some(join) = model.position_of("Join") else {
    return Err(CompileError::invariant(
      "Hopping with join requires Join() before defining the window.",
    ));
  };
  let Some(hopping) = hopping else {
    return Err(CompileError::invariant("Hopping window is missing for the join query."));
  };
  let (Some(group_by), Some(select)) = (group_by, select) else {
    return Err(CompileError::invariant(
      "Hopping with join requires GroupBy() followed by Select().",
    ));
  };
  if join > hopping {
    return Err(CompileError::invariant("Join after hopping is not supported."));
  }
  let from = model.position_of("From").unwrap_or(0);
  if !(from < join && join < hopping && hopping < group_by && group_by < select) {
    return Err(CompileError::invariant(
      "Allowed order: From -> Join -> Hopping -> GroupBy -> Select.",
    ));
  }
  if model.count_of("Hopping") > 1 {
    return Err(CompileError::invariant("Multiple hopping windows are not supported."));
  }
  if model.has_tumbling() {
    return Err(CompileError::invariant("Window-to-window join is not supported."));
  }
  let (Some(left), Some(right)) = (model.source_types.first(), model.source_types.get(1)) else {
    return Err(CompileError::internal("join model without two sources"));
  };
  if catalog.kind_of(left) != ObjectKind::Stream {
    return Err(CompileError::invariant("Only stream-to-table join is supported for hopping."));
  }
  if catalog.kind_of(right) != ObjectKind::Table {
    return Err(CompileError::invariant("Only Stream -> Table join is supported for hopping."));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::DecimalOverride;
  use crate::expr::{Lambda, Param};
  use crate::model::HoppingSpec;
  use proptest::prelude::*;
  use std::time::Duration;

  fn tick() -> EntityDescriptor {
    EntityDescriptor::new("Tick", "ticks")
      .with_column(ColumnDescriptor::new("Broker", ValueType::String).key(0))
      .with_column(ColumnDescriptor::new("Symbol", ValueType::String).key(1))
      .with_column(ColumnDescriptor::new("Bid", ValueType::Decimal).decimal(18, 4))
  }

  fn row() -> Expr {
    Expr::param("o", ValueType::record("Tick"))
  }

  fn projected(members: &[&str]) -> QueryModel {
    let types = [("Broker", ValueType::String), ("Symbol", ValueType::String), ("Bid", ValueType::Decimal)];
    let body = Expr::construct(
      members
        .iter()
        .map(|m| {
          let ty = types.iter().find(|(n, _)| n == m).map(|(_, t)| t.clone()).unwrap_or(ValueType::Int);
          (m.to_string(), row().member(*m, ty))
        })
        .collect(),
    );
    let mut model = QueryModel::from_source("Tick");
    model.select_projection = Some(Lambda::single("o", ValueType::record("Tick"), body));
    model
  }

  fn validate(target: &EntityDescriptor, model: &QueryModel) -> Result<()> {
    let catalog = Catalog::new().with(tick());
    let decimals = DecimalPrecisionConfig::default();
    ProjectionValidator::new(&catalog, &decimals).validate(target, model)
  }

  #[test]
  fn test_identity_and_matching_projection_pass() {
    assert!(validate(&tick(), &QueryModel::from_source("Tick")).is_ok());
    let mut identity = QueryModel::from_source("Tick");
    identity.select_projection = Some(Lambda::single("o", ValueType::record("Tick"), row()));
    assert!(validate(&tick(), &identity).is_ok());
    assert!(validate(&tick(), &projected(&["Broker", "Symbol", "Bid"])).is_ok());
  }

  #[test]
  fn test_count_and_order_mismatches() {
    let err = validate(&tick(), &projected(&["Broker", "Symbol"])).unwrap_err();
    assert_eq!(err, CompileError::invariant("Select projection does not match POCO properties."));
    let err = validate(&tick(), &projected(&["Broker", "Bid", "Symbol"])).unwrap_err();
    assert_eq!(err, CompileError::invariant("Select projection does not match POCO property order."));
  }

  #[test]
  fn test_swapped_key_annotations_fail() {
    let target = EntityDescriptor::new("Bar", "bars")
      .with_column(ColumnDescriptor::new("Broker", ValueType::String).key(1))
      .with_column(ColumnDescriptor::new("Symbol", ValueType::String).key(0))
      .with_column(ColumnDescriptor::new("Bid", ValueType::Decimal).decimal(18, 4));
    let err = validate(&target, &projected(&["Broker", "Symbol", "Bid"])).unwrap_err();
    assert_eq!(err, CompileError::invariant("Select projection key order does not match POCO."));
  }

  #[test]
  fn test_type_mismatch() {
    let target = EntityDescriptor::new("Bar", "bars")
      .with_column(ColumnDescriptor::new("Broker", ValueType::String).key(0))
      .with_column(ColumnDescriptor::new("Symbol", ValueType::Int).key(1))
      .with_column(ColumnDescriptor::new("Bid", ValueType::Decimal).decimal(18, 4));
    let err = validate(&target, &projected(&["Broker", "Symbol", "Bid"])).unwrap_err();
    assert!(err.to_string().contains("types do not match"));
  }

  #[test]
  fn test_decimal_precision_mismatch_and_override() {
    let target = EntityDescriptor::new("Bar", "bars")
      .with_column(ColumnDescriptor::new("Broker", ValueType::String).key(0))
      .with_column(ColumnDescriptor::new("Symbol", ValueType::String).key(1))
      .with_column(ColumnDescriptor::new("Bid", ValueType::Decimal).decimal(18, 2));
    let model = projected(&["Broker", "Symbol", "Bid"]);
    let err = validate(&target, &model).unwrap_err();
    assert!(err.to_string().contains("decimal precision"));

    let catalog = Catalog::new().with(tick());
    let decimals = DecimalPrecisionConfig::default().with_override("Bar", "Bid", DecimalOverride::new(18, 4));
    assert!(ProjectionValidator::new(&catalog, &decimals).validate(&target, &model).is_ok());
  }

  #[test]
  fn test_window_columns_excluded_for_windowed_models() {
    let target = tick().with_column(ColumnDescriptor::new("WindowStart", ValueType::DateTime));
    let mut model = projected(&["Broker", "Symbol", "Bid"]);
    assert!(validate(&target, &model).is_err());
    model.add_windows(["1m"]);
    assert!(validate(&target, &model).is_ok());
  }

  fn hopping_join(sequence: &[&str]) -> QueryModel {
    let mut model = QueryModel::from_source("Trade");
    model.source_types.push("Rate".to_string());
    model.join_condition = Some(Lambda::pair(
      Param::new("o", ValueType::record("Trade")),
      Param::new("i", ValueType::record("Rate")),
      Expr::bool(true),
    ));
    model.hopping = Some(HoppingSpec {
      size: Duration::from_secs(300),
      advance: Duration::from_secs(60),
      grace: None,
    });
    model.operation_sequence = sequence.iter().map(|s| s.to_string()).collect();
    model
  }

  fn kinds() -> Catalog {
    Catalog::new()
      .with(EntityDescriptor::new("Trade", "trades"))
      .with(EntityDescriptor::new("Rate", "rates").with_kind(ObjectKind::Table))
  }

  #[test]
  fn test_hopping_join_order_rules() {
    let ok = hopping_join(&["From", "Join", "Hopping", "GroupBy", "Select"]);
    assert!(validate_hopping(&ok, &kinds()).is_ok());

    let cases = [
      (vec!["From", "Hopping", "GroupBy", "Select"], "requires Join() before defining the window"),
      (vec!["From", "Join", "GroupBy", "Select"], "Hopping window is missing"),
      (vec!["From", "Join", "Hopping", "GroupBy"], "GroupBy() followed by Select()"),
      (vec!["From", "Hopping", "Join", "GroupBy", "Select"], "Join after hopping"),
      (vec!["From", "Join", "Hopping", "Select", "GroupBy"], "Allowed order"),
      (vec!["From", "Join", "Hopping", "GroupBy", "Hopping", "Select"], "Multiple hopping windows"),
      (vec!["From", "Join", "Hopping", "Hopping", "GroupBy", "Select"], "Multiple hopping windows"),
    ];
    for (sequence, expected) in cases {
      let err = validate_hopping(&hopping_join(&sequence), &kinds()).unwrap_err();
      assert!(err.to_string().contains(expected), "{:?}: {}", sequence, err);
    }
  }

  #[test]
  fn test_hopping_join_kinds() {
    let model = hopping_join(&["From", "Join", "Hopping", "GroupBy", "Select"]);
    let both_streams = Catalog::new().with(EntityDescriptor::new("Rate", "rates"));
    let err = validate_hopping(&model, &both_streams).unwrap_err();
    assert!(err.to_string().contains("Only Stream -> Table join"));
    let table_left = kinds().with(EntityDescriptor::new("Trade", "trades").with_kind(ObjectKind::Table));
    let err = validate_hopping(&model, &table_left).unwrap_err();
    assert!(err.to_string().contains("Only stream-to-table join"));

    let mut windowed = model.clone();
    windowed.add_windows(["1m"]);
    let err = validate_hopping(&windowed, &kinds()).unwrap_err();
    assert!(err.to_string().contains("Window-to-window join"));
  }

  #[test]
  fn test_hopping_single_source_order() {
    let mut model = hopping_join(&["From", "Hopping", "Select", "GroupBy"]);
    model.source_types.truncate(1);
    let err = validate_hopping(&model, &kinds()).unwrap_err();
    assert!(err.to_string().contains("Hopping requires GroupBy then Select in order."));
    model.operation_sequence = vec!["From".into(), "Hopping".into(), "GroupBy".into(), "Select".into()];
    assert!(validate_hopping(&model, &kinds()).is_ok());
  }

  fn string_projection(names: &[String]) -> QueryModel {
    let body = Expr::construct(
      names
        .iter()
        .map(|n| (n.clone(), row().member(n.as_str(), ValueType::String)))
        .collect(),
    );
    let mut model = QueryModel::from_source("Tick");
    model.select_projection = Some(Lambda::single("o", ValueType::record("Tick"), body));
    model
  }

  proptest! {
    #[test]
    fn test_keys_out_of_declared_order_are_rejected(
      bases in prop::collection::vec("[A-Z][a-z]{2,6}", 2..8),
      picks in (0usize..8, 0usize..8)
    ) {
      let names: Vec<String> = bases.iter().enumerate().map(|(i, b)| format!("{}{}", b, i)).collect();
      let (first, second) = (picks.0 % names.len(), picks.1 % names.len());
      prop_assume!(first != second);
      let (first, second) = (first.min(second), first.max(second));

      let target = |first_key: u32, second_key: u32| {
        names.iter().enumerate().fold(EntityDescriptor::new("Bar", "bars"), |entity, (i, n)| {
          let column = ColumnDescriptor::new(n.as_str(), ValueType::String);
          entity.with_column(match i {
            i if i == first => column.key(first_key),
            i if i == second => column.key(second_key),
            _ => column,
          })
        })
      };

      let in_order = string_projection(&names);
      prop_assert!(validate(&target(0, 1), &in_order).is_ok());
      prop_assert_eq!(
        validate(&target(1, 0), &in_order).unwrap_err(),
        CompileError::invariant("Select projection key order does not match POCO.")
      );

      let mut swapped = names.clone();
      swapped.swap(first, second);
      prop_assert!(validate(&target(0, 1), &string_projection(&swapped)).is_err());
    }
  }
}
