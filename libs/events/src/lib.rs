//! # compute-events
//!
//! Types exchanged between the compute control plane and its collaborators.
//!
//! ## Design Principles
//!
//! - Everything here is plain data: no scheduling state lives in this crate
//! - Types crossing a process boundary are serde-serializable with snake_case names
//! - Resource quantities are always expressed as a [`Dimensions`] vector
//!
//! ## Contents
//!
//! - Resource vectors (`Dimensions`)
//! - Job submissions, replica observations and job updates (`job`)
//! - Node inventory snapshots from the cluster (`inventory`)
//! - Coarse queue availability reported to clients (`queue`)

mod dimensions;
mod error;
mod inventory;
mod job;
mod queue;

pub use dimensions::Dimensions;
pub use error::EventError;
pub use inventory::*;
pub use job::*;
pub use queue::*;
