//! Schema-driven document mapping and store layer over a search/index engine.
//!
//! This crate is the core of the triage-odm project and provides:
//!
//! - **Fields and models** ([`field`], [`model`]) - Typed schema primitives with per-kind validation
//! - **Schema registry** ([`registry`]) - Boot-time namespace extension by plugins, sealed before use
//! - **Documents** ([`document`]) - Validated value trees bound to a model
//! - **Index mappings** ([`mapping`]) - Engine mapping generation and compatibility checks
//! - **Queries** ([`query`], [`parser`]) - Filter expressions and a pluggable query string parser
//! - **Backend abstraction** ([`backend`]) - The trait search engines are plugged in through
//! - **Collections and store** ([`collection`], [`store`]) - CRUD, search and aggregation per model
//! - **Resilience** ([`retry`]) - Bounded exponential backoff with an injectable clock
//! - **Results, configuration and errors** ([`result`], [`config`], [`error`])
//!
//! # Example
//!
//! ```ignore
//! use triage_odm_core::{field::Field, model::Model, registry::SchemaRegistry};
//!
//! let howler = Model::builder("howler")
//!     .field("id", Field::keyword())
//!     .field("analytic", Field::keyword())
//!     .field("status", Field::enumeration(["open", "in-progress", "resolved"]))
//!     .build()?;
//!
//! let mut schema = SchemaRegistry::new();
//! schema.register(Model::builder("hit").field("howler", Field::compound(howler)))?;
//! let registry = schema.seal()?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as triage_odm_core;

pub mod backend;
pub mod collection;
pub mod config;
pub mod document;
pub mod error;
pub mod field;
pub mod mapping;
pub mod model;
pub mod parser;
pub mod query;
pub mod registry;
pub mod result;
pub mod retry;
pub mod store;
