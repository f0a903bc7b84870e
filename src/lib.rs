//! Rainfall sensor node library.
//!
//! Exposes the pure-logic modules for integration testing and external
//! inspection. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module, so the crate
//! builds and tests on the host with simulated adapters.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod error;
pub mod events;
pub mod gauge;
pub mod timekeeping;

pub mod adapters;
pub mod drivers;
