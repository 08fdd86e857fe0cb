//! # Worker
//!
//! The consuming side: topology declaration, subscriptions, and settlement of
//! each delivery according to its dispatch result.

mod consumer;
mod runtime;

pub use consumer::RegistryDeliveryHandler;
pub use runtime::WorkerRuntime;
