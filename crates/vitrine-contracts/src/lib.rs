//! Data contracts for the catalog-image pipeline: request and diagnostics records,
//! the failure taxonomy, model and provider registries, and the event log.

pub mod events;
pub mod failures;
pub mod images;
pub mod models;
pub mod providers;
pub mod runs;
pub mod store;
pub mod transparency;
