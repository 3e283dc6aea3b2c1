//! papertext - PDF-to-text conversion coordination.
//!
//! Documents are registered in a database, conversions are requested through
//! [`services::ConversionService`], and a pool of [`worker::ConversionWorker`]s
//! pulls jobs from an in-process [`dispatch::DispatchQueue`]. The database is
//! the source of truth: every attempt starts with an atomic claim on the
//! document's conversion record, so duplicate queue entries and workers in
//! other processes never convert the same document twice at once.

pub mod cli;
pub mod config;
pub mod converter;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod repository;
pub mod schema;
pub mod services;
pub mod worker;

pub use config::Settings;
pub use dispatch::{DispatchQueue, JobDescriptor};
pub use error::{CoordinationError, DispatchError};
pub use services::ConversionService;
pub use worker::ConversionWorker;
