//! Compute control plane library.
//!
//! This crate primarily ships a `control-plane` binary, but we expose a small
//! library surface to enable integration testing and reuse.

pub mod api;
pub mod config;
pub mod coordinator;
pub mod executor;
pub mod handoff;
pub mod inventory;
pub mod registry;
pub mod scheduler;
pub mod sink;
pub mod state;
pub mod tracker;
pub mod worker;
