//! # Client
//!
//! Publish-side API. Any process, worker or not, can enqueue tasks and send
//! interrupts through a [`DispatchClient`].

mod dispatch_client;

pub use dispatch_client::{ClientState, DispatchClient, PublishReceipt};
