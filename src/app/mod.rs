//! Application core — pure domain logic, zero I/O.
//!
//! This module contains the business rules for the rain gauge node:
//! debounce, hourly accumulation, clock readiness gating and publish
//! sequencing. All interaction with hardware and the network happens
//! through **port traits** defined in [`ports`], keeping this layer fully
//! testable without real peripherals or a broker.

pub mod events;
pub mod ports;
pub mod service;
