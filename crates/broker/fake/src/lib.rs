//! fake-db: reference service module
//!
//! A complete [`ServiceManager`](broker_engine::ServiceManager) over an
//! in-memory vendor control plane. It exists to exercise the engine end to
//! end and to show what a real module has to provide:
//!
//! - plan-aware validation with immutable fields
//! - idempotent provisioning, updating and deprovisioning steps, including
//!   a long-running server creation reported as pending
//! - create-or-return binds keyed by the bind request fingerprint
//! - a pure credential projection

#![deny(unsafe_code)]

pub mod client;
pub mod error;
pub mod manager;
pub mod plans;
pub mod steps;

pub use client::{ControlPlane, InMemoryControlPlane};
pub use error::ControlPlaneError;
pub use manager::FakeDbManager;
