//! Storage layer for instances and bindings
//!
//! Persistence is a seam: the engine only needs the operations below. The
//! in-memory implementation backs tests and the demo daemon.

mod memory;
mod traits;

pub use memory::InMemoryStore;
pub use traits::{BindingStore, BrokerStore, InstanceStore};
