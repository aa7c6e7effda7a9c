//! # ksqlweave
//!
//! Compiles typed query models into ksqlDB statements.
//!
//! A query is composed through the fluent [`stage::QueryBuilder`] over an
//! explicit expression tree ([`expr`]), then planned into `CREATE STREAM` /
//! `CREATE TABLE ... AS SELECT` text by [`planner::StatementPlanner`]. Tumbling
//! models expand into a one-second rows stream plus one live table per
//! timeframe through [`derivation::DerivationPlanner`].
//!
//! ## Quick Start
//!
//! ```rust
//! use ksqlweave::config::CompilerOptions;
//! use ksqlweave::entity::{Catalog, ColumnDescriptor, EntityDescriptor};
//! use ksqlweave::expr::ValueType;
//! use ksqlweave::planner::StatementPlanner;
//!
//! let customers = EntityDescriptor::new("Customer", "customers")
//!   .with_column(ColumnDescriptor::new("Id", ValueType::Int).key(0))
//!   .with_column(ColumnDescriptor::new("Name", ValueType::String));
//! let catalog = Catalog::new().with(customers.clone());
//! let options = CompilerOptions::default();
//! let ddl = StatementPlanner::new(&catalog, &options).entity_ddl(&customers)?;
//! assert_eq!(
//!   ddl,
//!   "CREATE STREAM IF NOT EXISTS customers (Id INT KEY, Name VARCHAR) \
//!    WITH (KAFKA_TOPIC='customers', VALUE_FORMAT='AVRO', PARTITIONS=1, REPLICAS=1);"
//! );
//! # Ok::<(), ksqlweave::error::CompileError>(())
//! ```
//!
//! Compilation is synchronous and performs no I/O. Builders and analyzers are
//! stateless; a [`model::QueryModel`] is built once and then read.

// Documentation enforcement - treat missing docs as errors
#![deny(missing_docs)]

/// Depth, complexity and output checks over expressions and generated text.
pub mod analysis;
/// Clause builders: SELECT, WHERE, GROUP BY, HAVING, JOIN, ORDER BY.
pub mod clauses;
/// Compiler options: decimals, topic settings, schema namespace.
pub mod config;
/// Entity DDL: column mapping and `CREATE STREAM|TABLE` statements.
pub mod ddl;
/// Rows stream and live tables for tumbling models.
pub mod derivation;
/// Entity descriptors and the catalog of known sources.
pub mod entity;
/// Compile errors.
pub mod error;
/// Expression tree consumed by the clause builders.
pub mod expr;
/// Method-to-function translation table.
pub mod functions;
/// Query model accumulated by the builder.
pub mod model;
/// Identifier quoting and object naming.
pub mod naming;
/// CTAS/CSAS statement assembly.
pub mod planner;
/// Fluent builder and clause-order validation.
pub mod stage;
/// Timeframe tokens such as `5m` or `1mo`.
pub mod timeframe;
/// Projection and hopping-pipeline validation.
pub mod validator;
/// `WITH (...)` property lists.
pub mod with_clause;
