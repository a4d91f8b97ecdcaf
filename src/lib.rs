//! rts-bridge - Typed access layer over a RedisTimeSeries-compatible store
//!
//! This library provides:
//! - A command builder translating structured time-series requests into the
//!   store's textual command grammar
//! - Aggregation window conversion from human-readable durations to
//!   milliseconds
//! - A relational "last write" ledger tracking every mutated series key
//! - A background cleanup service that purges series with no recent writes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod command;
pub mod config;
pub mod convert;
pub mod error;
pub mod ledger;
pub mod services;
pub mod store;
pub mod types;

// Re-export main types
pub use client::TimeSeries;
pub use command::TsCommand;
pub use error::{Error, Result};
pub use ledger::WriteLedger;
pub use services::CleanerService;
pub use types::{Aggregations, DataPoint, DuplicatePolicy, Labels, SeriesKey};
