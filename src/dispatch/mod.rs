//! Cross-thread hand-off of work onto the single consumer thread
//!
//! 1. [`action_queue`] - lock-guarded FIFO of deferred tasks
//! 2. [`dispatcher`] - registration, producer handles and the per-tick drain
//!
//! # Architecture
//!
//! ```text
//! producer thread ─┐
//! producer thread ─┼─► DispatchHandle ──► ActionQueue ──► Dispatcher::tick(&mut C)
//! producer thread ─┘                                       (consumer thread)
//! ```
//!
//! Tasks receive the consumer-owned context `C` by mutable reference, so state
//! touched by tasks is never shared and needs no lock of its own.

pub mod action_queue;
pub mod dispatcher;

pub use action_queue::{ActionQueue, ActionTask, DrainReport};
pub use dispatcher::{
    DispatchError, DispatchHandle, Dispatcher, DispatcherRegistry, DispatcherSettings, Routed,
};
