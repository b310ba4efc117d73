//! Common orchestration abstractions for the SONiC DASH agents.
//!
//! - [`Orch`]: base trait for orchestration agents driven by a task loop
//! - [`Consumer`]: deduplicating queue of table entries awaiting processing
//! - [`SyncMap`]: map without auto-vivification, with checked refcounts
//! - [`TaskStatus`] / [`TaskError`]: outcome of processing one entry
//!
//! Configuration changes arrive as [`KeyOpFieldsValues`] in a [`Consumer`].
//! The owning [`Orch`] drains them in `do_task`, translates them into
//! backend calls and re-queues entries that must be retried.

mod consumer;
mod orch;
mod sync_map;
mod task;

pub use consumer::{Consumer, ConsumerConfig, FieldValue, KeyOpFieldsValues, Operation};
pub use orch::Orch;
pub use sync_map::{HasRefCount, SyncMap, SyncMapError};
pub use task::{TaskError, TaskResult, TaskStatus};
