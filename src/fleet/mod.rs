//! Fleet Placement Module
//!
//! Maps every path to exactly one owning server node.
//!
//! ## Core Concepts
//! - **Fleet**: The ordered list of server nodes. Order defines ring order and never changes at runtime.
//! - **Key Space**: A path is hashed (MD5 or SHA-1) into an unsigned integer of `B` bits.
//! - **Ring**: `[0, 2^B)` is cut into `len(fleet)` contiguous ranges; the last range absorbs the remainder.
//! - **Lookup**: A path belongs to the first node whose upper boundary is `>=` its hash.

pub mod hash;
pub mod router;
pub mod types;

#[cfg(test)]
mod tests;
