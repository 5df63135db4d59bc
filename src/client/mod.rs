//! Client Module
//!
//! The caller-side orchestrator that turns filesystem calls into RPCs
//! against the fleet.
//!
//! ## Core Concepts
//! - **Routing**: File-scoped calls go to the path's owner; namespace-scoped calls (mkdir, rmdir, directory links and renames, listings, export) are broadcast to every node.
//! - **Classification**: Whether a path is a directory is decided once, by probing its attributes on the presumed owner.
//! - **RPC Discipline**: One call in flight per client, bounded retry on transport faults, remote protocol errors are fatal.
//! - **Read-Ahead**: Opening a file queues its siblings for promotion on a bounded worker pool.

pub mod prefetch;
pub mod router;
pub mod rpc;
pub mod types;
