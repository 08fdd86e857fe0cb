//! # Handler Registry
//!
//! Maps task types to application handlers and tracks interrupts for running
//! instances.
//!
//! ## Architecture
//!
//! ```text
//! TaskHandlerRegistry
//! ├── handlers: task type -> Arc<dyn TaskHandler>
//! └── InterruptTracker
//!     ├── active:  (task type, instance id) -> watch::Sender  (one per running instance)
//!     └── pending: (task type, instance id) -> buffered interrupt (grace window)
//! ```

pub mod interrupts;
pub mod task_handler_registry;
pub mod traits;

pub use interrupts::{
    ActiveTask, InterruptDisposition, InterruptNotice, InterruptSignal, InterruptTracker,
};
pub use task_handler_registry::{DispatchOutcome, TaskHandlerRegistry};
pub use traits::{handler_fn, FnHandler, TaskCompletion, TaskHandler};
