//! Identifier helpers: sanitizing and reserved-word quoting.

use regex::Regex;
use std::sync::LazyLock;

/// Identifiers that must be backtick-quoted in column lists.
pub const RESERVED_WORDS: [&str; 7] = [
  "KEY",
  "VALUE",
  "WINDOWSTART",
  "WINDOWEND",
  "TOPIC",
  "PARTITION",
  "OFFSET",
];

static INVALID_CHARS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_]").ok());

/// Replaces every character outside `[A-Za-z0-9_]` with `_`.
pub fn sanitize(name: &str) -> String {
  let name = name.trim();
  match INVALID_CHARS.as_ref() {
    Some(re) => re.replace_all(name, "_").into_owned(),
    None => name
      .chars()
      .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
      .collect(),
  }
}

/// True when the identifier collides with a reserved word (case-insensitive).
pub fn is_reserved(name: &str) -> bool {
  RESERVED_WORDS.iter().any(|w| w.eq_ignore_ascii_case(name))
}

/// Wraps reserved identifiers in backticks, leaving others untouched.
pub fn quote_if_reserved(name: &str) -> String {
  if is_reserved(name) {
    format!("`{}`", name)
  } else {
    name.to_string()
  }
}

/// Stream/table object name derived from a topic name.
pub fn object_name(topic: &str) -> String {
  topic.replace('-', "_")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_sanitize_replaces_invalid_characters() {
    assert_eq!(sanitize("order-id"), "order_id");
    assert_eq!(sanitize(" a.b c "), "a_b_c");
    assert_eq!(sanitize("Plain_1"), "Plain_1");
  }

  #[test]
  fn test_reserved_words_are_quoted() {
    assert_eq!(quote_if_reserved("Topic"), "`Topic`");
    assert_eq!(quote_if_reserved("partition"), "`partition`");
    assert_eq!(quote_if_reserved("KEY"), "`KEY`");
    assert_eq!(quote_if_reserved("Name"), "Name");
  }

  #[test]
  fn test_object_name() {
    assert_eq!(object_name("trade-events"), "trade_events");
  }
}
