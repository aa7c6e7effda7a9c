//! # Compiler Errors
//!
//! Error types produced while building a query model or compiling it into
//! ksqlDB statement text.
//!
//! ## Overview
//!
//! Every failure is synchronous and fatal to the current build call; no
//! partial statement is ever returned. Errors fall into four families:
//!
//! - **Grammar**: a fluent call was made out of order
//! - **Semantic** / **NotSupported**: a clause rule was broken, or a node
//!   kind, operator or function has no dialect equivalent
//! - **Invariant**: a projection disagrees with the target entity descriptor
//! - **Internal**: generated text tripped a defensive output check, which
//!   signals a code-generation defect rather than caller misuse
//!
//! ## Example
//!
//! ```rust
//! use ksqlweave::error::{ClauseKind, CompileError};
//!
//! let err = CompileError::semantic(ClauseKind::Where, "Aggregate functions are not allowed");
//! assert!(err.is_semantic());
//! assert_eq!(err.to_string(), "WHERE: Aggregate functions are not allowed");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The statement clause (or compiler stage) an error originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ClauseKind {
  /// SELECT projection
  #[default]
  Select,
  /// WHERE filter
  Where,
  /// GROUP BY keys
  GroupBy,
  /// HAVING filter
  Having,
  /// JOIN clause
  Join,
  /// ORDER BY clause
  OrderBy,
  /// WINDOW clause
  Window,
  /// WITH (...) property list
  With,
  /// CREATE STREAM / CREATE TABLE column definitions
  Ddl,
  /// Query model construction
  Model,
}

impl fmt::Display for ClauseKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ClauseKind::Select => "SELECT",
      ClauseKind::Where => "WHERE",
      ClauseKind::GroupBy => "GROUP BY",
      ClauseKind::Having => "HAVING",
      ClauseKind::Join => "JOIN",
      ClauseKind::OrderBy => "ORDER BY",
      ClauseKind::Window => "WINDOW",
      ClauseKind::With => "WITH",
      ClauseKind::Ddl => "DDL",
      ClauseKind::Model => "MODEL",
    };
    write!(f, "{}", name)
  }
}

/// Errors raised by the query compiler.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
  /// A fluent builder method was invoked at the wrong stage.
  #[error("{call}() must be called {expected}")]
  Grammar {
    /// The offending call, e.g. `Where`.
    call: String,
    /// Human-readable description of the valid predecessor stage.
    expected: String,
  },
  /// A clause-level semantic rule was violated.
  #[error("{clause}: {rule}")]
  Semantic {
    /// Clause the rule belongs to.
    clause: ClauseKind,
    /// Description of the violated rule.
    rule: String,
  },
  /// The input uses a construct the dialect cannot express.
  #[error("{clause}: {feature} is not supported")]
  NotSupported {
    /// Clause being compiled when the construct was found.
    clause: ClauseKind,
    /// What was found.
    feature: String,
  },
  /// A cross-cutting invariant between model and entity descriptor failed.
  #[error("invariant violation: {0}")]
  Invariant(String),
  /// Defensive output check failed; indicates a generator defect.
  #[error("internal compiler error: {0}")]
  Internal(String),
  /// Configuration input could not be read.
  #[error("configuration error: {0}")]
  Config(String),
}

impl CompileError {
  /// Creates a grammar (stage ordering) error.
  pub fn grammar(call: impl Into<String>, expected: impl Into<String>) -> Self {
    CompileError::Grammar {
      call: call.into(),
      expected: expected.into(),
    }
  }

  /// Creates a semantic rule violation for the given clause.
  pub fn semantic(clause: ClauseKind, rule: impl Into<String>) -> Self {
    CompileError::Semantic {
      clause,
      rule: rule.into(),
    }
  }

  /// Creates an unsupported-construct error for the given clause.
  pub fn not_supported(clause: ClauseKind, feature: impl Into<String>) -> Self {
    CompileError::NotSupported {
      clause,
      feature: feature.into(),
    }
  }

  /// Creates an invariant violation.
  pub fn invariant(message: impl Into<String>) -> Self {
    CompileError::Invariant(message.into())
  }

  /// Creates an internal compiler error.
  pub fn internal(message: impl Into<String>) -> Self {
    CompileError::Internal(message.into())
  }

  /// Returns true for stage ordering errors.
  pub fn is_grammar(&self) -> bool {
    matches!(self, CompileError::Grammar { .. })
  }

  /// Returns true for semantic and unsupported-construct errors.
  pub fn is_semantic(&self) -> bool {
    matches!(
      self,
      CompileError::Semantic { .. } | CompileError::NotSupported { .. }
    )
  }

  /// Returns true for internal (generator defect) errors.
  pub fn is_internal(&self) -> bool {
    matches!(self, CompileError::Internal(_))
  }

  /// The clause this error is attributed to, if any.
  pub fn clause(&self) -> Option<ClauseKind> {
    match self {
      CompileError::Semantic { clause, .. } | CompileError::NotSupported { clause, .. } => {
        Some(*clause)
      }
      _ => None,
    }
  }
}

impl From<serde_json::Error> for CompileError {
  fn from(err: serde_json::Error) -> Self {
    CompileError::Config(err.to_string())
  }
}

/// Result alias used throughout the compiler.
pub type Result<T> = std::result::Result<T, CompileError>;
