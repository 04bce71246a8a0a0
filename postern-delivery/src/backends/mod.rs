//! Collaborator implementations bundled with the gateway
//!
//! Production deployments implement the collaborator traits against their
//! own directory, storage and queue systems. The `memory` module provides
//! in-process implementations for tests and single-node experiments.

pub mod memory;

pub use memory::{MemoryDirectory, MemoryFilterEngine, MemoryOutboundQueue, MemoryStore};
