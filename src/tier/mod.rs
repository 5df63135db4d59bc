//! Tiered Storage Module
//!
//! Per-node storage with two roots: a fast **local** tier and a bulk
//! **secondary** tier shared by the fleet.
//!
//! ## Core Concepts
//! - **Layout**: Every path has a local and a secondary location; the *target* is local when present, otherwise secondary.
//! - **Promotion**: Opening a file that exists only on secondary copies it into the local tier first.
//! - **Handle Table**: Open descriptors are tracked per path, so a path can be force-closed as a unit.
//! - **Virtual Links**: Symlinks and hard links that cannot exist natively are stored as one-line files with a reserved suffix.

pub mod handles;
pub mod layout;
pub mod manager;
pub mod types;
pub mod vlink;

#[cfg(test)]
mod tests;
