//! Background services
//!
//! The service framework manages lifecycle and graceful shutdown; the
//! cleaner service reconciles the write ledger with the series store on a
//! fixed cadence.

pub mod cleaner;
pub mod framework;

pub use cleaner::{CleanerConfig, CleanerService, CleanerStats};
pub use framework::{Service, ServiceConfig, ServiceError, ServiceManager, ServiceStatus};
