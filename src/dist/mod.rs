//! Distributed-memory construction: a replicated top tree built
//! cooperatively over rank-local point slices, then independently built
//! subtrees shipped to owner ranks.

pub mod comm;

mod build;

pub use build::{DistBuildParams, DistCoverTree};
pub use comm::{local_group, Communicator, LocalComm};
