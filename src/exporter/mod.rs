//! Write-Back Export Module
//!
//! Asynchronously pushes dirty local files down to the secondary tier.
//!
//! ## Core Concepts
//! - **Registration**: A file is registered once its writer releases it; the registry remembers its local mtime.
//! - **Sweep**: On every tick, each registered file is copied to secondary when secondary is missing or older.
//! - **Pruning**: Entries whose local file disappeared are dropped at the end of the sweep.
//! - **Rescan**: The registry can be rebuilt from a full walk of the local tier.

pub mod exporter;

#[cfg(test)]
mod tests;
