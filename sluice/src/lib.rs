//! Storage and queueing primitives for the resource-provider runtime.
//!
//! This crate provides the two external collaborators the runtime is built
//! against, each as a trait with interchangeable backends:
//!
//! - [`store`]: a key-addressable object store with ETag-based optimistic
//!   concurrency. Every mutation is `read -> mutate -> save(with_etag)`; a
//!   lost race surfaces as [`store::StoreError::Concurrency`] and the caller
//!   retries a bounded number of times.
//! - [`queue`]: an at-least-once work queue with exclusive message leases.
//!   Dequeued [`queue::Message`]s stay invisible to other consumers until
//!   their lease expires; consumers extend the lease while working and
//!   acknowledge on completion. A consumer that walks away without
//!   acknowledging gets the message redelivered.
//!
//! In-memory implementations back the test suites and single-node
//! deployments; PostgreSQL implementations live behind the `postgres`
//! feature.

pub mod queue;
pub mod store;

pub use queue::{InMemoryQueue, Message, MessageId, MessageLease, QueueClient, QueueError, QueueOptions};
pub use store::{ETag, InMemoryStore, Object, StoreClient, StoreError};
