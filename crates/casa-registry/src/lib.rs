//! The `casa-registry` library crate is the engine behind a
//! device-management service for networked home appliances: it owns every
//! registered device and pool, enforces the connection lifecycle, fans
//! broadcast commands out to pool members, and samples device data on a
//! per-device cadence.
//!
//! Core functionalities of this crate include:
//!
//! - Owning every registered entity in a single authoritative store, with
//!   create/read/modify/delete operations and global invariants:
//!   identifier uniqueness, existence checks, and no dangling pool
//!   references
//! - Enforcing the connection state machine, where `connect` is accepted
//!   from every state and the remaining lifecycle actions require a
//!   connected device
//! - Grouping same-kind devices into pools that receive broadcast
//!   commands, with all-or-nothing membership changes and per-member
//!   fan-out outcomes
//! - Sampling each device's data payload through a cancellable periodic
//!   task into a bounded per-device history
//!
//! To optimize system resource usage, `casa-registry` leverages `tokio` as
//! an asynchronous executor: operations on distinct entities proceed
//! concurrently, while a per-entity lock serializes the operations
//! targeting the same identifier.

#![forbid(unsafe_code)]

/// Lifecycle dispatch and pool fan-out.
pub mod dispatch;
/// Error management.
pub mod error;
/// The authoritative entity store.
pub mod registry;
/// Metrics histories and the periodic sampling task.
pub mod sampler;

mod entity;
mod pool;
