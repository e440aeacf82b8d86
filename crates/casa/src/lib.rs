//! The entity model shared between the `casa` registry engine and the
//! transport adapters that call into it.
//!
//! This crate provides APIs to:
//!
//! - Describe the supported appliance kinds, their connection states, and
//!   the identifiers the registry hands out.
//! - Look up the capability catalog of a kind: the configuration fields it
//!   accepts and the command fields it honors during execution.
//! - Validate device configuration, including the sampling cadence bounds.
//! - Merge command payloads into a device's data payload under the
//!   permissive rules of the capability catalog.
//! - Encode the responses and views a transport adapter serializes back to
//!   its callers.
//!
//! Every type here is a plain value: the crate holds no state and spawns no
//! tasks, so adapters and the engine can exchange these structures freely
//! across task boundaries.

#![forbid(unsafe_code)]

/// The capability catalog of each device kind.
pub mod catalog;
/// Command payloads and the data-merge rules.
pub mod command;
/// Device kinds, connection states, and identifiers.
pub mod device;
/// Device configuration and its bounds.
pub mod properties;
/// Responses and views returned to transport adapters.
pub mod response;
