//! Window-size tokens and their dialect renderings.
//!
//! A timeframe token is a compact string such as `"1s"`, `"5m"`, `"1h"`,
//! `"1d"`, `"1wk"` or `"1mo"`. Every place that registers, compares or renders
//! a window goes through this module so the same token always normalizes to
//! the same value.
//!
//! Months are approximated as 30 days and weeks as 7 days when converting to
//! seconds; the dialect rendering keeps `MONTHS` as a native unit and expands
//! weeks into days.
//!
//! ```rust
//! use ksqlweave::timeframe::{self, Timeframe};
//!
//! assert_eq!(timeframe::to_seconds("5m"), 300);
//! assert_eq!(timeframe::to_window_clause("1wk"), "WINDOW TUMBLING (SIZE 7 DAYS)");
//!
//! let tf: Timeframe = "1h".parse().unwrap();
//! assert!(tf > "5m".parse().unwrap());
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ClauseKind, CompileError};

/// Window rendered when no timeframe is supplied.
pub const DEFAULT_WINDOW_CLAUSE: &str = "WINDOW TUMBLING (SIZE 1 MINUTES)";

const SECONDS_PER_DAY: i64 = 86_400;

/// Unit of a timeframe token.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimeUnit {
  /// `s`
  Seconds,
  /// `m`
  Minutes,
  /// `h`
  Hours,
  /// `d`
  Days,
  /// `wk`, seven days
  Weeks,
  /// `mo`, approximated as thirty days
  Months,
}

impl TimeUnit {
  /// Compact suffix used in tokens.
  pub const fn suffix(self) -> &'static str {
    match self {
      TimeUnit::Seconds => "s",
      TimeUnit::Minutes => "m",
      TimeUnit::Hours => "h",
      TimeUnit::Days => "d",
      TimeUnit::Weeks => "wk",
      TimeUnit::Months => "mo",
    }
  }

  /// Long lower-case unit name, e.g. `minutes`.
  pub const fn name(self) -> &'static str {
    match self {
      TimeUnit::Seconds => "seconds",
      TimeUnit::Minutes => "minutes",
      TimeUnit::Hours => "hours",
      TimeUnit::Days => "days",
      TimeUnit::Weeks => "weeks",
      TimeUnit::Months => "months",
    }
  }

  /// Seconds in one unit.
  pub const fn seconds(self) -> i64 {
    match self {
      TimeUnit::Seconds => 1,
      TimeUnit::Minutes => 60,
      TimeUnit::Hours => 3_600,
      TimeUnit::Days => SECONDS_PER_DAY,
      TimeUnit::Weeks => 7 * SECONDS_PER_DAY,
      TimeUnit::Months => 30 * SECONDS_PER_DAY,
    }
  }

  /// Parses either a compact suffix (`m`) or a long name (`minutes`).
  pub fn from_name(name: &str) -> Option<TimeUnit> {
    match name.trim().to_ascii_lowercase().as_str() {
      "s" | "sec" | "second" | "seconds" => Some(TimeUnit::Seconds),
      "m" | "min" | "minute" | "minutes" => Some(TimeUnit::Minutes),
      "h" | "hour" | "hours" => Some(TimeUnit::Hours),
      "d" | "day" | "days" => Some(TimeUnit::Days),
      "wk" | "week" | "weeks" => Some(TimeUnit::Weeks),
      "mo" | "month" | "months" => Some(TimeUnit::Months),
      _ => None,
    }
  }
}

/// A parsed, normalized timeframe token.
///
/// Ordering compares durations, so `1m < 5m < 1h < 1d < 1wk < 1mo`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct Timeframe {
  /// Number of units; always at least 1.
  pub value: u32,
  /// Unit of the token.
  pub unit: TimeUnit,
}

impl Timeframe {
  /// Creates a timeframe, clamping non-positive values to 1.
  pub fn new(value: i64, unit: TimeUnit) -> Self {
    let value = u32::try_from(value.max(1)).unwrap_or(u32::MAX);
    Self { value, unit }
  }

  /// The one-second base granularity.
  pub const fn one_second() -> Self {
    Self {
      value: 1,
      unit: TimeUnit::Seconds,
    }
  }

  /// Total length in seconds.
  pub fn seconds(&self) -> i64 {
    i64::from(self.value) * self.unit.seconds()
  }

  /// Total length as a [`Duration`].
  pub fn duration(&self) -> Duration {
    Duration::from_secs(self.seconds().unsigned_abs())
  }

  /// Renders the dialect `WINDOW TUMBLING (...)` clause for this timeframe.
  pub fn window_clause(&self) -> String {
    let (size, unit) = self.window_size();
    format!("WINDOW TUMBLING (SIZE {} {})", size, unit)
  }

  /// Size and dialect unit keyword used inside a window clause.
  pub fn window_size(&self) -> (i64, &'static str) {
    let value = i64::from(self.value);
    match self.unit {
      TimeUnit::Seconds => (value, "SECONDS"),
      TimeUnit::Minutes => (value, "MINUTES"),
      TimeUnit::Hours => (value, "HOURS"),
      TimeUnit::Days => (value, "DAYS"),
      TimeUnit::Weeks => (value.saturating_mul(7), "DAYS"),
      TimeUnit::Months => (value, "MONTHS"),
    }
  }
}

impl fmt::Display for Timeframe {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{}", self.value, self.unit.suffix())
  }
}

impl FromStr for Timeframe {
  type Err = CompileError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let tf = s.trim();
    let (value, unit) = split_token(tf)
      .ok_or_else(|| CompileError::semantic(ClauseKind::Window, format!("Invalid timeframe token '{}'", s)))?;
    let unit = unit
      .ok_or_else(|| CompileError::semantic(ClauseKind::Window, format!("Unknown timeframe unit in '{}'", s)))?;
    Ok(Timeframe::new(value, unit))
  }
}

impl PartialOrd for Timeframe {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for Timeframe {
  fn cmp(&self, other: &Self) -> Ordering {
    self.seconds()
      .cmp(&other.seconds())
      .then_with(|| self.unit.cmp(&other.unit))
  }
}

/// Splits a trimmed token into its numeric part and its unit.
///
/// Returns `None` for an empty token. Unparseable numbers count as 0, which
/// mirrors the permissive behaviour relied upon when tokens come from
/// configuration files.
fn split_token(tf: &str) -> Option<(i64, Option<TimeUnit>)> {
  if tf.is_empty() {
    return None;
  }
  let lower = tf.to_ascii_lowercase();
  for (suffix, unit) in [("mo", TimeUnit::Months), ("wk", TimeUnit::Weeks)] {
    if let Some(num) = lower.strip_suffix(suffix) {
      return Some((parse_int(num), Some(unit)));
    }
  }
  let split = lower.len() - lower.chars().last().map_or(0, char::len_utf8);
  let (num, unit) = lower.split_at(split);
  Some((parse_int(num), TimeUnit::from_name(unit)))
}

fn parse_int(num: &str) -> i64 {
  num.trim().parse::<i64>().unwrap_or(0)
}

/// Converts a token to seconds. An empty token yields `i64::MAX` so it sorts
/// after every real window; an unknown unit is treated as raw seconds.
/// Oversized tokens saturate.
pub fn to_seconds(timeframe: &str) -> i64 {
  match split_token(timeframe.trim()) {
    None => i64::MAX,
    Some((value, Some(unit))) => value.saturating_mul(unit.seconds()),
    Some((value, None)) => value,
  }
}

/// Converts a token to whole minutes.
pub fn to_minutes(timeframe: &str) -> i64 {
  let seconds = to_seconds(timeframe);
  if seconds == i64::MAX {
    return i64::MAX;
  }
  seconds / 60
}

/// Converts a token to milliseconds; `None` for empty, non-positive or
/// oversized tokens.
pub fn to_milliseconds(timeframe: &str) -> Option<i64> {
  let seconds = to_seconds(timeframe);
  if seconds == i64::MAX || seconds <= 0 {
    return None;
  }
  seconds.checked_mul(1000)
}

/// Orders two tokens by duration.
pub fn compare(a: &str, b: &str) -> Ordering {
  to_seconds(a).cmp(&to_seconds(b))
}

/// Renders the tumbling window clause for a token.
pub fn to_window_clause(timeframe: &str) -> String {
  match split_token(timeframe.trim()) {
    None => DEFAULT_WINDOW_CLAUSE.to_string(),
    Some((value, unit)) => {
      Timeframe::new(value, unit.unwrap_or(TimeUnit::Minutes)).window_clause()
    }
  }
}

/// Splits a token into its value and long unit name, e.g. `("5", "minutes")`.
///
/// This is the inverse of [`normalize`]: `normalize(denormalize(t)) == t` for
/// every canonical token.
pub fn denormalize(timeframe: &str) -> (i64, &'static str) {
  let (value, unit) = decompose(timeframe);
  (value, unit.name())
}

/// Splits a token into its value and unit. Empty tokens decompose to one minute.
pub fn decompose(timeframe: &str) -> (i64, TimeUnit) {
  match split_token(timeframe.trim()) {
    None => (1, TimeUnit::Minutes),
    Some((value, unit)) => (value.max(1), unit.unwrap_or(TimeUnit::Minutes)),
  }
}

/// Builds a compact token from a value and a unit name (`minutes` → `m`).
///
/// Non-positive values are clamped to 1; an unrecognised unit yields the bare
/// number.
pub fn normalize(value: i64, unit_name: &str) -> String {
  let value = value.max(1);
  match TimeUnit::from_name(unit_name) {
    Some(unit) => format!("{}{}", value, unit.suffix()),
    None => value.to_string(),
  }
}

/// Deduplicates tokens and orders them by duration.
pub fn normalize_set<I, S>(tokens: I) -> Vec<String>
where
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{
  let mut parsed: Vec<Timeframe> = tokens
    .into_iter()
    .filter_map(|t| t.as_ref().parse::<Timeframe>().ok())
    .collect();
  parsed.sort();
  parsed.dedup();
  parsed.into_iter().map(|t| t.to_string()).collect()
}
